use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use git_cadence::{
    server::{self, ServeConfig},
    settings::{AppConfig, DEFAULT_CONFIG_PATH},
    utils::logging,
    AppContext,
};

#[derive(Parser)]
#[command(
    name = "git-cadence",
    version,
    about = "Commit pending work on a jittered schedule"
)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, short, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[command(subcommand)]
    cmd: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler loop until interrupted (default)
    Run,
    /// Run a single commit cycle; exits non-zero unless a commit was made
    Once,
    /// Print repository and configuration status
    Status,
    /// Serve the HTTP control surface
    Serve {
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        #[arg(long, default_value = "5000")]
        port: u16,
        /// Do not start the scheduler loop alongside the server
        #[arg(long)]
        no_scheduler: bool,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    logging::init(&config.logging)?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let ctx = AppContext::build(config).await?;
        match cli.cmd.unwrap_or(Command::Run) {
            Command::Run => cmd_run(ctx).await,
            Command::Once => cmd_once(ctx).await,
            Command::Status => cmd_status(ctx).await,
            Command::Serve {
                host,
                port,
                no_scheduler,
            } => cmd_serve(ctx, host, port, no_scheduler).await,
        }
    })
}

fn load_config(path: &Path) -> Result<AppConfig> {
    AppConfig::load(path).with_context(|| format!("failed to load {}", path.display()))
}

async fn cmd_run(ctx: AppContext) -> Result<ExitCode> {
    ctx.scheduler.start().await;
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("Shutdown requested");
    ctx.scheduler.shutdown().await;
    Ok(ExitCode::SUCCESS)
}

async fn cmd_once(ctx: AppContext) -> Result<ExitCode> {
    if ctx.runner().run_once().await {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

async fn cmd_status(ctx: AppContext) -> Result<ExitCode> {
    let repo = &ctx.repo;
    let branch = repo
        .current_branch()
        .await
        .unwrap_or_else(|_| "unknown".to_string());
    let pending = repo.has_pending_changes().await.unwrap_or(false);
    let last_message = repo.last_commit_message().await.unwrap_or_default();

    println!("Repository:       {}", repo.path().display());
    println!("Branch:           {branch}");
    println!("Pending changes:  {pending}");
    println!("Commit count:     {}", repo.commit_count().await);
    println!(
        "Last commit:      {}",
        last_message.chars().take(50).collect::<String>()
    );

    println!("Ollama available: {}", ctx.generation_available);
    if let Some(generator) = ctx.generator.as_ref().filter(|_| ctx.generation_available) {
        if let Some(models) = generator.list_models().await {
            println!("Ollama models:    {}", models.join(", "));
        }
    }

    let schedule = &ctx.config.schedule;
    println!("Base interval:    {}s", schedule.base_interval);
    println!("Jitter range:     ±{}s", schedule.jitter_range);
    println!("Push enabled:     {}", ctx.config.push.enabled);
    Ok(ExitCode::SUCCESS)
}

async fn cmd_serve(
    ctx: AppContext,
    host: String,
    port: u16,
    no_scheduler: bool,
) -> Result<ExitCode> {
    if !no_scheduler {
        ctx.scheduler.start().await;
    }
    let config = ServeConfig { bind: host, port };
    server::serve(ctx.clone(), config, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;
    ctx.scheduler.shutdown().await;
    Ok(ExitCode::SUCCESS)
}
