use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use commit_composer::ai::{AgentGateway, Outcome};
use commit_composer::compose::{DraftCommit, FinalizeOutcome, HunkOrigin, INITIAL_DRAFT_ID};
use commit_composer::config::{self, ComposerConfig};
use commit_composer::git::{get_repo_root_in, GitCliResolver};
use commit_composer::session::{ComposerEvent, SessionController, SessionView};
use serde::Deserialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Reorganize uncommitted changes into a sequence of commits
#[derive(Parser)]
#[command(name = "compose", version, about)]
struct Cli {
    /// Repository to work in (defaults to the current directory)
    #[arg(long, global = true)]
    repo: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the hunks, the initial draft and what is unassigned
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Ask the agent to group all hunks into commits
    Group {
        /// Extra instructions for the agent
        #[arg(long)]
        instructions: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Generate a commit message for a draft of the initial plan
    Message {
        #[arg(default_value = INITIAL_DRAFT_ID)]
        draft_id: String,
    },
    /// Create the commits and move the branch onto them
    Commit(CommitArgs),
    /// Show or initialize the configuration
    Config {
        /// Write the default config to the global config file
        #[arg(long)]
        init: bool,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct CommitArgs {
    /// JSON plan: {"commits":[{"message":"..","hunks":[1,2]}]}
    #[arg(long)]
    plan: Option<PathBuf>,
    /// Commit the initial draft with this message
    #[arg(short, long)]
    message: Option<String>,
    /// Let the agent group the hunks, then commit its plan
    #[arg(long)]
    ai: bool,
}

#[derive(Debug, Deserialize)]
struct PlanFile {
    commits: Vec<PlanCommit>,
}

#[derive(Debug, Deserialize)]
struct PlanCommit {
    message: String,
    #[serde(default)]
    hunks: Vec<usize>,
}

impl PlanFile {
    fn into_drafts(self) -> Vec<DraftCommit> {
        self.commits
            .into_iter()
            .enumerate()
            .map(|(i, c)| {
                let mut draft = DraftCommit::new(format!("draft-commit-{}", i + 1), c.message);
                draft.hunk_indices = c.hunks;
                draft
            })
            .collect()
    }
}

/// Exit code used when the user interrupts an operation
const EXIT_CANCELLED: i32 = 130;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let start = match &cli.repo {
        Some(path) => path.clone(),
        None => std::env::current_dir().context("Failed to read current directory")?,
    };

    if let Command::Config { init } = cli.command {
        return run_config(&start, init);
    }

    let root = get_repo_root_in(&start).ok();
    let config = root
        .as_deref()
        .map(config::load_config)
        .unwrap_or_default();

    let (tx, mut events) = unbounded_channel();
    let resolver = GitCliResolver {
        default_dir: Some(start),
    };
    let gateway = AgentGateway::new(config.agent.clone());
    let ctrl = SessionController::new(Arc::new(resolver), Arc::new(gateway), config, tx);

    let result = run(&ctrl, cli.command).await;
    report_events(&mut events);
    result
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_env("COMPOSE_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

async fn run(ctrl: &SessionController, command: Command) -> Result<()> {
    let view = ctrl.load(None).await?;

    match command {
        Command::Status { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(&view)?);
            } else {
                print_status(&view);
            }
        }
        Command::Group { instructions, json } => {
            let outcome =
                interruptible(ctrl.generate_grouping(instructions), || ctrl.cancel_grouping()).await?;
            let drafts = settle(outcome)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&drafts)?);
            } else if let Some(view) = ctrl.view() {
                print_drafts(&view);
            }
        }
        Command::Message { draft_id } => {
            let outcome =
                interruptible(ctrl.generate_message(&draft_id), || ctrl.cancel_message()).await?;
            println!("{}", settle(outcome)?);
        }
        Command::Commit(args) => {
            if let Some(path) = args.plan {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                let plan: PlanFile = serde_json::from_str(&text)
                    .with_context(|| format!("Invalid plan file {}", path.display()))?;
                ctrl.replace_drafts(plan.into_drafts())?;
            } else if let Some(message) = args.message {
                ctrl.set_draft_message(INITIAL_DRAFT_ID, &message)?;
            } else if args.ai {
                let outcome =
                    interruptible(ctrl.generate_grouping(None), || ctrl.cancel_grouping()).await?;
                settle(outcome)?;
            }

            let outcome = interruptible(ctrl.finalize(), || ctrl.cancel_finalize()).await?;
            match outcome {
                FinalizeOutcome::Completed(report) => {
                    for sha in &report.shas {
                        println!("{sha}");
                    }
                    if report.cancel_ignored {
                        eprintln!("Interrupted after the branch moved; the new commits were kept.");
                    }
                }
                FinalizeOutcome::Cancelled { before } => {
                    eprintln!("cancelled before {}", before.label());
                    std::process::exit(EXIT_CANCELLED);
                }
            }
        }
        Command::Config { .. } => {}
    }
    Ok(())
}

fn run_config(start: &Path, init: bool) -> Result<()> {
    if init {
        let path = config::save_config(&ComposerConfig::default())?;
        println!("Wrote {}", path.display());
        return Ok(());
    }
    let config = get_repo_root_in(start)
        .map(|root| config::load_config(&root))
        .unwrap_or_default();
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

/// Drive `fut` to completion; the first Ctrl-C calls `on_interrupt` so the
/// operation can wind down on its own
async fn interruptible<F, C>(fut: F, on_interrupt: C) -> F::Output
where
    F: Future,
    C: Fn() -> bool,
{
    tokio::pin!(fut);
    let mut interrupted = false;
    loop {
        tokio::select! {
            out = &mut fut => return out,
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                if on_interrupt() {
                    eprintln!("cancelling...");
                }
            }
        }
    }
}

fn settle<T>(outcome: Outcome<T>) -> Result<T> {
    match outcome {
        Outcome::Completed(value) => Ok(value),
        Outcome::Cancelled => {
            eprintln!("cancelled");
            std::process::exit(EXIT_CANCELLED);
        }
        Outcome::Failed(error) => anyhow::bail!("Generation failed: {error}"),
    }
}

fn report_events(events: &mut UnboundedReceiver<ComposerEvent>) {
    while let Ok(event) = events.try_recv() {
        if let ComposerEvent::SafetyError { errors } = &event {
            for error in errors {
                eprintln!("  {error}");
            }
            eprintln!("Run the command again to compose against the current state.");
        }
    }
}

fn print_status(view: &SessionView) {
    let summary = view.base.message.lines().next().unwrap_or_default();
    let short: String = view.base.sha.chars().take(8).collect();
    println!(
        "{} on {} at {} {}",
        view.base.repo_name, view.base.branch_name, short, summary
    );
    println!();
    println!("Hunks:");
    for hunk in &view.hunks {
        let origin = match &hunk.origin {
            HunkOrigin::Staged => "staged",
            HunkOrigin::Unstaged => "unstaged",
            HunkOrigin::Commit(_) => "commit",
        };
        println!(
            "  [{:>3}] {:<8} {}  {}  +{} -{}",
            hunk.index, origin, hunk.file_name, hunk.hunk_header, hunk.additions, hunk.deletions
        );
    }
    println!();
    print_drafts(view);
}

fn print_drafts(view: &SessionView) {
    println!("Drafts:");
    for draft in &view.drafts {
        let message = draft.message.lines().next().unwrap_or("(no message)");
        let indices: Vec<String> = draft.hunk_indices.iter().map(usize::to_string).collect();
        println!("  {:<16} {:<40} [{}]", draft.id, message, indices.join(", "));
        if let Some(explanation) = draft.ai_explanation.as_deref().filter(|e| !e.is_empty()) {
            println!("  {:<16} {}", "", explanation);
        }
    }
    if !view.unassigned.is_empty() {
        let indices: Vec<String> = view.unassigned.iter().map(usize::to_string).collect();
        println!("Unassigned: {}", indices.join(", "));
    }
}
