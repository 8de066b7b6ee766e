use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use hangar_lib::commands::{self, AppState};
use hangar_lib::models::{Patch, Subscription};
use hangar_lib::utils::get_app_data_dir;

#[derive(Parser, Debug)]
#[command(name = "hangar")]
#[command(
    about = "Merge proxy subscriptions, version the result and serve it locally",
    long_about = None
)]
struct Cli {
    /// Data directory (defaults to ~/.hangar)
    #[arg(long, global = true, env = "HANGAR_HOME")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage subscriptions
    #[command(subcommand)]
    Sub(SubCommand),
    /// Manage rule sources
    #[command(subcommand)]
    Rules(RulesCommand),
    /// Merge subscriptions and rule sources into a new version
    Build,
    /// Apply a patch file ({"description": ..., "operations": [...]})
    Patch {
        file: PathBuf,
        /// Reject the patch if the active version is no longer this one
        #[arg(long)]
        base: Option<String>,
    },
    /// Serve the active version over HTTP until interrupted
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Ask the model for a patch
    Ai(AiArgs),
    /// Inspect and manage config versions
    #[command(subcommand)]
    History(HistoryCommand),
    /// Show notifications recorded in this session
    Notifications,
}

#[derive(Subcommand, Debug)]
enum SubCommand {
    List,
    Add {
        name: String,
        url: String,
    },
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long, conflicts_with = "disable")]
        enable: bool,
        #[arg(long)]
        disable: bool,
    },
    Rm {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    Enable {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    Disable {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Refresh the given subscriptions, or all enabled ones
    Refresh {
        ids: Vec<String>,
    },
    Export {
        path: PathBuf,
    },
    Import {
        path: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum RulesCommand {
    /// List builtin rule sets and custom rule sources
    List,
    Add {
        name: String,
        url: String,
    },
    Rm {
        id: String,
    },
    Enable {
        id: String,
    },
    Disable {
        id: String,
    },
    /// Download every enabled rule source
    Refresh,
}

#[derive(Args, Debug)]
struct AiArgs {
    prompt: String,
    /// Extra files to include in the prompt
    #[arg(long = "context")]
    context: Vec<PathBuf>,
    /// Apply the proposal right away
    #[arg(long)]
    apply: bool,
}

#[derive(Subcommand, Debug)]
enum HistoryCommand {
    List,
    Show { id: String },
    /// Diff two versions (the second defaults to the active one)
    Diff { from: String, to: Option<String> },
    Rollback { id: String },
    Rm { id: String },
    Snapshot { description: Option<String> },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => get_app_data_dir()?,
    };
    let state = AppState::init(data_dir)?;

    match cli.command {
        Command::Sub(cmd) => run_sub(&state, cmd).await,
        Command::Rules(cmd) => run_rules(&state, cmd).await,
        Command::Build => {
            let version = commands::config::rebuild_config(&state)
                .await
                .map_err(anyhow::Error::msg)?;
            println!("Active version: {} ({})", version.id, version.description);
            Ok(())
        }
        Command::Patch { file, base } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("read {}", file.display()))?;
            let patch: Patch = serde_json::from_str(&content)
                .with_context(|| format!("parse {}", file.display()))?;
            let version = commands::config::apply_patch(&state, patch, base)
                .await
                .map_err(anyhow::Error::msg)?;
            println!("Created version {}", version.id);
            Ok(())
        }
        Command::Serve { host, port } => serve(&state, host, port).await,
        Command::Ai(args) => run_ai(&state, args).await,
        Command::History(cmd) => run_history(&state, cmd).await,
        Command::Notifications => {
            let notifications = commands::notification::get_notifications(&state)
                .await
                .map_err(anyhow::Error::msg)?;
            if notifications.is_empty() {
                println!("No notifications");
            }
            for n in notifications {
                println!("[{:?}] {}: {}", n.severity, n.title, n.message);
            }
            Ok(())
        }
    }
}

async fn run_sub(state: &AppState, cmd: SubCommand) -> Result<()> {
    use commands::subscription as sub;

    match cmd {
        SubCommand::List => {
            let subs = sub::get_subscriptions(state).await.map_err(anyhow::Error::msg)?;
            if subs.is_empty() {
                println!("No subscriptions");
            }
            for s in &subs {
                print_subscription(s);
            }
        }
        SubCommand::Add { name, url } => {
            let s = sub::add_subscription(state, name, url).await.map_err(anyhow::Error::msg)?;
            print_subscription(&s);
        }
        SubCommand::Update {
            id,
            name,
            url,
            enable,
            disable,
        } => {
            let current = sub::get_subscriptions(state)
                .await
                .map_err(anyhow::Error::msg)?
                .into_iter()
                .find(|s| s.id == id)
                .with_context(|| format!("subscription not found: {}", id))?;
            let enabled = if enable {
                true
            } else if disable {
                false
            } else {
                current.enabled
            };
            let s = sub::update_subscription(
                state,
                id,
                name.unwrap_or(current.name),
                url.unwrap_or(current.url),
                enabled,
            )
            .await
            .map_err(anyhow::Error::msg)?;
            print_subscription(&s);
        }
        SubCommand::Rm { ids } => {
            for outcome in sub::batch_delete_subscriptions(state, ids)
                .await
                .map_err(anyhow::Error::msg)?
            {
                print_outcome(&outcome.id, outcome.error.as_deref());
            }
        }
        SubCommand::Enable { ids } => {
            for outcome in sub::batch_toggle_subscriptions(state, ids, true)
                .await
                .map_err(anyhow::Error::msg)?
            {
                print_outcome(&outcome.id, outcome.error.as_deref());
            }
        }
        SubCommand::Disable { ids } => {
            for outcome in sub::batch_toggle_subscriptions(state, ids, false)
                .await
                .map_err(anyhow::Error::msg)?
            {
                print_outcome(&outcome.id, outcome.error.as_deref());
            }
        }
        SubCommand::Refresh { ids } if ids.is_empty() => {
            for outcome in sub::refresh_all_subscriptions(state)
                .await
                .map_err(anyhow::Error::msg)?
            {
                print_outcome(&outcome.id, outcome.error.as_deref());
            }
        }
        SubCommand::Refresh { ids } => {
            for id in ids {
                match sub::refresh_subscription(state, id.clone()).await {
                    Ok(s) => print_subscription(&s),
                    Err(e) => print_outcome(&id, Some(&e)),
                }
            }
        }
        SubCommand::Export { path } => {
            let count = sub::export_subscriptions(state, path.to_string_lossy().to_string())
                .await
                .map_err(anyhow::Error::msg)?;
            println!("Exported {} subscriptions to {}", count, path.display());
        }
        SubCommand::Import { path } => {
            let subs = sub::import_subscriptions(state, path.to_string_lossy().to_string())
                .await
                .map_err(anyhow::Error::msg)?;
            println!("{} subscriptions after import", subs.len());
        }
    }
    Ok(())
}

async fn run_rules(state: &AppState, cmd: RulesCommand) -> Result<()> {
    use commands::rules;

    match cmd {
        RulesCommand::List => {
            let settings = state.settings();
            let status = if settings.builtin_rules { "enabled" } else { "disabled" };
            println!("Builtin rule sets ({}):", status);
            for rule in rules::get_builtin_rules().await.map_err(anyhow::Error::msg)? {
                println!("  {:<14} {:<10} {}", rule.name, rule.behavior, rule.description);
            }
            println!("Rule sources:");
            for source in settings.rule_sources {
                println!(
                    "  {}  {:<16} {:<8} updated={}  {}",
                    source.id,
                    source.name,
                    if source.enabled { "enabled" } else { "disabled" },
                    source.last_updated.as_deref().unwrap_or("never"),
                    source.url
                );
            }
        }
        RulesCommand::Add { name, url } => {
            let source = rules::add_rule_source(state, name, url)
                .await
                .map_err(anyhow::Error::msg)?;
            println!("Added rule source {} ({})", source.id, source.name);
        }
        RulesCommand::Rm { id } => {
            rules::remove_rule_source(state, id.clone()).await.map_err(anyhow::Error::msg)?;
            println!("Removed {}", id);
        }
        RulesCommand::Enable { id } => {
            rules::toggle_rule_source(state, id, true).await.map_err(anyhow::Error::msg)?;
        }
        RulesCommand::Disable { id } => {
            rules::toggle_rule_source(state, id, false).await.map_err(anyhow::Error::msg)?;
        }
        RulesCommand::Refresh => {
            let outcomes = rules::refresh_rule_sources(state).await.map_err(anyhow::Error::msg)?;
            if outcomes.is_empty() {
                println!("No rule sources enabled");
            }
            for outcome in outcomes {
                print_outcome(&outcome.id, outcome.error.as_deref());
            }
        }
    }
    Ok(())
}

async fn run_ai(state: &AppState, args: AiArgs) -> Result<()> {
    let files = args
        .context
        .iter()
        .map(|p| p.to_string_lossy().to_string())
        .collect();
    let proposal = commands::ai::generate_ai_patch(state, args.prompt, files)
        .await
        .map_err(anyhow::Error::msg)?;

    println!("{}", proposal.description);
    println!("{}", serde_json::to_string_pretty(&proposal.operations)?);

    if args.apply {
        let version = commands::ai::apply_ai_patch(
            state,
            proposal.description,
            proposal.operations,
            proposal.base_version,
        )
        .await
        .map_err(anyhow::Error::msg)?;
        println!("Created version {}", version.id);
    }
    Ok(())
}

async fn run_history(state: &AppState, cmd: HistoryCommand) -> Result<()> {
    use commands::config as cfg;

    match cmd {
        HistoryCommand::List => {
            let active = state.versions.active_id();
            for v in cfg::list_versions(state).await.map_err(anyhow::Error::msg)? {
                let marker = if active.as_deref() == Some(v.id.as_str()) { "*" } else { " " };
                let time = chrono::DateTime::from_timestamp(v.timestamp, 0)
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default();
                println!(
                    "{} {}  {:<8} {}  {}",
                    marker,
                    v.id,
                    v.origin.to_string(),
                    time,
                    v.description
                );
            }
        }
        HistoryCommand::Show { id } => {
            print!("{}", cfg::get_version_content(state, id).await.map_err(anyhow::Error::msg)?);
        }
        HistoryCommand::Diff { from, to } => {
            for line in cfg::get_versions_diff(state, from, to).await.map_err(anyhow::Error::msg)? {
                println!("{}", line.render());
            }
        }
        HistoryCommand::Rollback { id } => {
            let version = cfg::rollback_version(state, id).await.map_err(anyhow::Error::msg)?;
            println!("Created version {} ({})", version.id, version.description);
        }
        HistoryCommand::Rm { id } => {
            cfg::delete_version(state, id.clone()).await.map_err(anyhow::Error::msg)?;
            println!("Deleted {}", id);
        }
        HistoryCommand::Snapshot { description } => {
            let version = cfg::create_manual_snapshot(state, description.unwrap_or_default())
                .await
                .map_err(anyhow::Error::msg)?;
            println!("Created version {}", version.id);
        }
    }
    Ok(())
}

async fn serve(state: &AppState, host: Option<String>, port: Option<u16>) -> Result<()> {
    let settings = state.settings();
    let host = host.unwrap_or(settings.server.host);
    let port = port.unwrap_or(settings.server.port);

    let addr = state.server.start(&host, port).await?;
    println!("Serving http://{}/config (Ctrl+C to stop)", addr);

    tokio::signal::ctrl_c().await.context("wait for Ctrl+C")?;
    state.server.stop().await?;
    Ok(())
}

fn print_subscription(s: &Subscription) {
    println!(
        "{}  {:<20} {:<8} nodes={:<5} updated={}  {}",
        s.id,
        s.name,
        if s.enabled { "enabled" } else { "disabled" },
        s.node_count.map(|n| n.to_string()).unwrap_or_else(|| "-".into()),
        s.last_updated.as_deref().unwrap_or("never"),
        s.url
    );
}

fn print_outcome(id: &str, error: Option<&str>) {
    match error {
        None => println!("ok     {}", id),
        Some(e) => println!("failed {}: {}", id, e),
    }
}
