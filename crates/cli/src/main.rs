use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use iview_engine::{PollOutcome, Viewer};
use iview_types::NodePath;
use iview_util::{ViewerConfig, expand_tilde};
use tracing::warn;
use tracing_subscriber::EnvFilter;

mod render;

#[derive(Debug, Parser)]
#[command(name = "iview", version, about = "Browse and run an interactive test report")]
struct Cli {
    /// Root of the interactive API (overrides config and IVIEW_API_BASE).
    #[arg(long, global = true)]
    api_base: Option<String>,

    /// Configuration file to read instead of the default location.
    #[arg(long, global = true)]
    config: Option<String>,

    /// Permit plain http for hosts other than localhost.
    #[arg(long, global = true)]
    allow_insecure: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the report tree.
    Tree {
        /// Fetch every level before printing.
        #[arg(long)]
        all: bool,
    },
    /// Select a node by the uids below the plan and show its content.
    Show {
        uids: Vec<String>,
        /// Print assertion content as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Run the plan, or the node named by the uids below the plan.
    Run {
        uids: Vec<String>,
        /// Poll until the run reaches a terminal status.
        #[arg(long)]
        wait: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let viewer = Viewer::connect(&config).context("could not create API client")?;

    let code = match cli.command {
        Command::Tree { all } => tree_cmd(&viewer, all).await?,
        Command::Show { uids, json } => show_cmd(&viewer, &uids, json).await?,
        Command::Run { uids, wait } => run_cmd(&viewer, &uids, wait).await?,
    };
    viewer.shutdown();
    Ok(code)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(log_filter())
        .with_writer(std::io::stderr)
        .try_init();
}

/// Filter from `RUST_LOG`, defaulting to `info`.
fn log_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn load_config(cli: &Cli) -> Result<ViewerConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let path = expand_tilde(path);
            let mut config = ViewerConfig::load_from_path(&path)
                .with_context(|| format!("could not read config {}", path.display()))?;
            config.apply_env_overrides();
            config
        }
        None => ViewerConfig::load().context("could not load config")?,
    };
    if let Some(api_base) = &cli.api_base {
        config.api_base = api_base.clone();
    }
    if cli.allow_insecure {
        config.allow_insecure = true;
    }
    config.validate()?;
    Ok(config)
}

async fn tree_cmd(viewer: &Viewer, all: bool) -> Result<ExitCode> {
    viewer.load().await.context("could not load the report")?;
    if all {
        expand_all(viewer).await;
    }
    render::print_tree(viewer);
    Ok(ExitCode::SUCCESS)
}

async fn show_cmd(viewer: &Viewer, uids: &[String], json: bool) -> Result<ExitCode> {
    viewer.load().await.context("could not load the report")?;
    if !uids.is_empty() {
        let path = target_path(viewer, uids)?;
        viewer
            .select_path(&path)
            .await
            .with_context(|| format!("could not select {path}"))?;
    }

    let contents = viewer.selected_assertions();
    if json {
        println!("{}", serde_json::to_string_pretty(&contents)?);
    } else {
        render::print_selection(viewer, &contents);
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_cmd(viewer: &Viewer, uids: &[String], wait: bool) -> Result<ExitCode> {
    viewer.load().await.context("could not load the report")?;
    let path = target_path(viewer, uids)?;
    viewer
        .select_path(&path)
        .await
        .with_context(|| format!("could not select {path}"))?;

    let handle = viewer.run(&path).await?;
    println!("triggered {path}");
    if !wait {
        return Ok(ExitCode::SUCCESS);
    }

    let outcome = tokio::select! {
        outcome = handle.finished() => outcome,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted; stopping status polling");
            viewer.shutdown();
            PollOutcome::Cancelled
        }
    };
    match outcome {
        PollOutcome::Terminal(status) => {
            println!("{path}: {}", render::status_label(status));
            render::print_tree(viewer);
            Ok(if status.is_successful() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        PollOutcome::Removed => {
            println!("{path} is no longer part of the report");
            Ok(ExitCode::FAILURE)
        }
        PollOutcome::TimedOut => {
            println!("{path} did not finish before the poll timeout");
            Ok(ExitCode::FAILURE)
        }
        PollOutcome::Cancelled => Ok(ExitCode::FAILURE),
    }
}

fn target_path(viewer: &Viewer, uids: &[String]) -> Result<NodePath> {
    let tree = viewer.tree();
    let root = tree.root_path().cloned().context("the report has no plan")?;
    Ok(uids.iter().fold(root, |path, uid| path.child(uid.clone())))
}

/// Fetch every level of the tree; failures are logged and skipped.
async fn expand_all(viewer: &Viewer) {
    let Some(root) = viewer.tree().root_path().cloned() else {
        return;
    };
    let mut pending = vec![root];
    while let Some(path) = pending.pop() {
        if let Err(error) = viewer.expand(&path).await {
            warn!(node = %path, %error, "could not expand");
            continue;
        }
        let tree = viewer.tree();
        if let Some(children) = tree.children(&path) {
            pending.extend(
                children
                    .into_iter()
                    .filter(|child| !child.is_testcase())
                    .map(|child| path.child(child.uid().to_string())),
            );
        }
    }
}
