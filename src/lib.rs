pub mod config;
pub mod error;
pub mod layout;
pub mod remote;
pub mod signing;
pub mod sync;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use config::{MirrorConfig, resolve_config_path};
use layout::ArtifactLayout;
use remote::SshConnector;
use signing::{ExternalSigner, SignResult, SignTarget, SigningPipeline};
use sync::{SyncOrchestrator, SyncOutcome};

/// Command-line interface.
#[derive(Parser, Debug)]
#[command(
    name = "rpm-mirror",
    version,
    about = "Sign locally built RPMs and mirror them into a remote yum repository"
)]
pub struct Cli {
    /// Path to the config file (defaults to the platform config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv everything)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sign packages with the configured signer
    Sign {
        /// Which batch to sign
        #[arg(long, value_enum, default_value_t = SignTarget::All)]
        class: SignTarget,
    },
    /// Upload packages to the remote repository and refresh its metadata
    Upload {
        /// Sign all packages first; fails if no passphrase is configured
        #[arg(long)]
        sign: bool,
    },
    /// Show which local directories map to which remote directories
    Layout {
        #[arg(long)]
        json: bool,
    },
    /// Validate the config file
    Check {
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completions to stdout
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate man page to stdout
    Man,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "rpm-mirror", &mut std::io::stdout());
            Ok(())
        }
        Commands::Man => {
            let man = clap_mangen::Man::new(Cli::command());
            man.render(&mut std::io::stdout())?;
            Ok(())
        }
        Commands::Check { json } => run_check(cli.config, json),
        Commands::Sign { class } => {
            let config = load_config(cli.config)?;
            run_sign(&config, &config.artifact_layout(), class).map(|_| ())
        }
        Commands::Upload { sign } => {
            let config = load_config(cli.config)?;
            run_upload(&config, &config.artifact_layout(), sign)
        }
        Commands::Layout { json } => {
            let config = load_config(cli.config)?;
            run_layout(&config, &config.artifact_layout(), json)
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "rpm_mirror=info",
        1 => "rpm_mirror=debug",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn load_config(explicit: Option<PathBuf>) -> Result<MirrorConfig> {
    match resolve_config_path(explicit) {
        Some(path) => Ok(MirrorConfig::load(&path)?),
        None => Ok(MirrorConfig::default()),
    }
}

fn run_check(explicit: Option<PathBuf>, json: bool) -> Result<()> {
    let config = load_config(explicit)?;
    let validation = config.validate();
    if json {
        println!("{}", serde_json::to_string_pretty(&validation)?);
    } else {
        for warning in &validation.warnings {
            println!("{} {warning}", "warning:".yellow());
        }
        println!("{}", "Configuration OK".green());
    }
    Ok(())
}

fn run_sign(
    config: &MirrorConfig,
    layout: &ArtifactLayout,
    target: SignTarget,
) -> Result<Vec<SignResult>> {
    let pipeline = SigningPipeline::new(layout, ExternalSigner::new(&config.signing.signer));
    let results = pipeline.sign_all(config.signing_secret(), target)?;
    for result in &results {
        if result.success {
            println!("{}", result.message().green());
        } else {
            println!("{}", result.message().yellow());
        }
    }
    Ok(results)
}

fn run_upload(config: &MirrorConfig, layout: &ArtifactLayout, sign: bool) -> Result<()> {
    if sign {
        run_sign(config, layout, SignTarget::All)?;
    }
    let outcome = SyncOrchestrator::new(layout, SshConnector).run(config.connection.as_ref())?;
    print_summary(&outcome);
    Ok(())
}

fn run_layout(config: &MirrorConfig, layout: &ArtifactLayout, json: bool) -> Result<()> {
    let root = config
        .connection
        .as_ref()
        .map_or("$REMOTE", |c| c.remote_path.as_str());
    let mut leaves = layout.rpm_leaves(root);
    leaves.push(layout.srpm_leaf(root));

    if json {
        println!("{}", serde_json::to_string_pretty(&leaves)?);
        return Ok(());
    }
    for leaf in &leaves {
        println!(
            "{} -> {}",
            leaf.local_dir.display(),
            leaf.remote_dir.as_str().cyan()
        );
    }
    Ok(())
}

fn print_summary(outcome: &SyncOutcome) {
    println!(
        "{} {} uploaded ({} kB), {} skipped, {} directories created, {} metadata refreshes in {} ms",
        "Sync complete:".green().bold(),
        outcome.files_uploaded,
        outcome.bytes_uploaded / 1024,
        outcome.files_skipped,
        outcome.directories_created,
        outcome.metadata_refreshes,
        outcome.duration_ms
    );
}
