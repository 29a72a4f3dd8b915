use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use distrobaker::buildsys::Credentials;
use distrobaker::config::{self, Cloner, Config};
use distrobaker::dispatcher::{self, TaggingEvent};
use distrobaker::error::DistroBakerError;
use distrobaker::retry::Reporter;
use distrobaker::types::ComponentRecord;
use distrobaker::Engine;

#[derive(Parser, Debug)]
#[command(name = "distrobaker", version)]
#[command(about = "One-way synchronizer between two distribution build ecosystems")]
struct Cli {
    /// SCM URL of the repository holding the DistroBaker configuration document.
    #[arg(long, env = "DISTROBAKER_CONFIG_URL")]
    config_url: String,

    /// Branch or tag to check the configuration out at.
    #[arg(long, env = "DISTROBAKER_CONFIG_REF", default_value = "master")]
    config_ref: String,

    /// Path, relative to the repository root, of the configuration document.
    #[arg(long, env = "DISTROBAKER_CONFIG_FILE", default_value = "distrobaker.yaml")]
    config_file: String,

    /// Don't push, upload, or submit builds; log what would happen instead.
    #[arg(long)]
    dry_run: bool,

    /// Attempts per retried remote operation.
    #[arg(long, default_value_t = 3)]
    retry: u32,

    /// Bearer token for the destination build system, if it takes one.
    #[arg(long, env = "DISTROBAKER_DEST_TOKEN")]
    dest_token: Option<String>,

    /// Kerberos principal for the destination build system, for diagnostics only.
    #[arg(long, env = "DISTROBAKER_DEST_PRINCIPAL")]
    dest_principal: Option<String>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Handle a single tagging event, as would arrive over a message bus.
    Event {
        #[arg(long, default_value = "org.example.buildsys.tag")]
        topic: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        version: String,
        #[arg(long)]
        release: String,
        #[arg(long)]
        tag: String,
    },
    /// Process a bulk set of components (`rpms/<name>` or `modules/<name>:<stream>`).
    /// An empty set is filled in from the latest tagged builds in both trigger tags.
    Sweep {
        /// Components to process; omit to sweep everything currently tagged.
        components: Vec<String>,
    },
}

struct CliReporter;

impl CliReporter {
    fn emit(&self, level: &str, msg: &str) {
        eprintln!("{} [{level}] {msg}", chrono::Utc::now().to_rfc3339());
    }
}

impl Reporter for CliReporter {
    fn info(&mut self, msg: &str) {
        self.emit("info", msg);
    }

    fn warn(&mut self, msg: &str) {
        self.emit("warn", msg);
    }

    fn error(&mut self, msg: &str) {
        self.emit("error", msg);
    }
}

/// Shells out to the system `git` binary to satisfy [`Cloner`], reusing the
/// `DISTROBAKER_GIT_BIN` override the rest of the crate honors.
struct GitCloner;

impl Cloner for GitCloner {
    fn clone_and_checkout(&self, url: &str, git_ref: &str, dest: &Path) -> Result<(), DistroBakerError> {
        let program = std::env::var("DISTROBAKER_GIT_BIN").unwrap_or_else(|_| "git".to_string());
        let status = Command::new(program)
            .args(["clone", "--branch", git_ref, url, "."])
            .current_dir(dest)
            .status()
            .map_err(|e| DistroBakerError::config("config.clone", e.to_string()))?;
        if !status.success() {
            return Err(DistroBakerError::config(
                "config.clone",
                format!("git clone exited with {status}"),
            ));
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut reporter = CliReporter;

    let raw = config::load(&GitCloner, &cli.config_url, &cli.config_ref, &cli.config_file)
        .with_context(|| format!("loading {} from {}", cli.config_file, cli.config_url))?;
    let validated = Config::from_raw(raw, &mut reporter).context("validating configuration")?;

    let mut engine = Engine::new(validated, cli.dry_run, cli.retry);
    if cli.dest_token.is_some() || cli.dest_principal.is_some() {
        engine.set_destination_credentials(Credentials {
            principal: cli.dest_principal.clone(),
            keytab: None,
            token: cli.dest_token.clone(),
        });
    }

    match cli.cmd {
        Commands::Event {
            topic,
            name,
            version,
            release,
            tag,
        } => {
            let event = TaggingEvent {
                topic,
                name,
                version,
                release,
                tag,
            };
            dispatcher::handle_event(&engine, &event, &mut reporter);
        }
        Commands::Sweep { components } => {
            let mut compset = Vec::new();
            for record in &components {
                match ComponentRecord::parse(record) {
                    Some(rec) => compset.push(rec),
                    None => reporter.error(&format!("Cannot process {record}; looks like garbage.")),
                }
            }
            let summary = dispatcher::sweep(&engine, compset, &mut reporter)?;
            println!(
                "processed: {}, skipped: {}, module_lookup_failures: {}",
                summary.processed, summary.skipped, summary.module_lookup_failures
            );
        }
    }

    Ok(())
}
