use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use nvsync_cli::commands::{self, TransferArgs};
use nvsync_cli::{exit_code, EXIT_FATAL};
use nvsync_config::{Config, DEFAULT_TRANSFER_THREADS};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(author, version, about = "Sync a local workspace with an S3 network volume")]
struct Cli {
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List objects in the volume, or the available buckets when none is configured
    Ls {
        #[arg(long, default_value = "", help = "Filter by prefix/directory")]
        prefix: String,
        #[arg(long, action = ArgAction::Set, default_value_t = true, help = "List recursively")]
        recursive: bool,
        #[arg(long)]
        json: bool,
    },
    /// Download new or modified objects into the local workspace
    Pull {
        #[arg(long, default_value = "", help = "Pull only specific prefix")]
        prefix: String,
        #[arg(long, help = "Preview without executing")]
        dry_run: bool,
        #[arg(long, help = "Delete local files not in remote")]
        delete: bool,
        #[arg(short, long, default_value_t = DEFAULT_TRANSFER_THREADS)]
        threads: usize,
        #[arg(long)]
        limit_mb: Option<u64>,
        #[arg(long)]
        json: bool,
    },
    /// Upload new or modified local files to the volume
    Push {
        #[arg(long, default_value = "", help = "Push only specific prefix")]
        prefix: String,
        #[arg(long, help = "Preview without executing")]
        dry_run: bool,
        #[arg(long, help = "Delete remote files not in local")]
        delete: bool,
        #[arg(long, help = "Exclude pattern (can be repeated)")]
        exclude: Vec<String>,
        #[arg(short, long, default_value_t = DEFAULT_TRANSFER_THREADS)]
        threads: usize,
        #[arg(long)]
        limit_mb: Option<u64>,
        #[arg(long)]
        json: bool,
    },
    /// Remove objects by key, or everything under a prefix
    Rm {
        keys: Vec<String>,
        #[arg(long, help = "Remove all files under this prefix")]
        prefix: Option<String>,
        #[arg(long, action = ArgAction::Set, default_value_t = true)]
        recursive: bool,
        #[arg(long, help = "Preview without executing")]
        dry_run: bool,
    },
}

/// Ctrl-C cancels the token; in-flight items abort and the run reports what finished.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted, stopping...");
            child.cancel();
        }
    });
    token
}

async fn run(command: Commands) -> anyhow::Result<u8> {
    let cfg = Config::load().context("failed to load configuration")?;
    tracing::debug!("Loaded configuration: {:?}", cfg);

    let report = match command {
        Commands::Ls {
            prefix,
            recursive,
            json,
        } => {
            commands::cmd_ls(&cfg, &prefix, recursive, json).await?;
            return Ok(0);
        }
        Commands::Pull {
            prefix,
            dry_run,
            delete,
            threads,
            limit_mb,
            json,
        } => {
            let args = TransferArgs {
                prefix,
                dry_run,
                delete,
                exclude: Vec::new(),
                threads,
                limit_mb,
                json,
            };
            commands::cmd_pull(&cfg, &args, cancel_on_ctrl_c()).await?
        }
        Commands::Push {
            prefix,
            dry_run,
            delete,
            exclude,
            threads,
            limit_mb,
            json,
        } => {
            let args = TransferArgs {
                prefix,
                dry_run,
                delete,
                exclude,
                threads,
                limit_mb,
                json,
            };
            commands::cmd_push(&cfg, &args, cancel_on_ctrl_c()).await?
        }
        Commands::Rm {
            keys,
            prefix,
            recursive,
            dry_run,
        } => {
            commands::cmd_rm(&cfg, keys, prefix, recursive, dry_run, cancel_on_ctrl_c()).await?
        }
    };

    Ok(exit_code(&report))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("warning: could not install log subscriber");
    }

    match run(cli.command).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(EXIT_FATAL)
        }
    }
}
