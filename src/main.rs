use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use flowdeck_core::config::AppConfig;
use flowdeck_core::event::EventBus;
use flowdeck_core::traits::RuntimeClient;
use flowdeck_core::types::{SyncEvent, WorkflowDefinition};
use flowdeck_graph::{
    serialize, verify_round_trip, BuildReport, ExecutionStatus, Graph, GraphBuilder,
    NodeTypeRegistry, OutputPreview, TopologicalLayout,
};
use flowdeck_sync::{HttpRuntimeClient, IntervalTicks, SyncDriver, TickOutcome};

#[derive(Parser)]
#[command(name = "flowdeck", version, about = "Edit, lay out and monitor agent workflow graphs")]
struct Cli {
    /// Path to config file (defaults to ./flowdeck.toml, then ~/.flowdeck/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Runtime base URL, overriding the config file
    #[arg(long, env = "FLOWDECK_BASE_URL")]
    base_url: Option<String>,

    /// Value for the Authorization header on mutating calls
    #[arg(long, env = "FLOWDECK_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute rank columns and coordinates for a definition file
    Layout {
        file: PathBuf,
        /// Print positions as JSON
        #[arg(long)]
        json: bool,
    },
    /// Build a definition file and report structural problems
    Validate {
        file: PathBuf,
        /// Also fail when serialize-then-rebuild changes the graph
        #[arg(long)]
        strict: bool,
    },
    /// Rebuild a definition and write it back out in canonical form
    Export {
        file: PathBuf,
        #[arg(long, value_enum, default_value = "yaml")]
        format: Format,
        /// Write here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Follow the first live instance until Ctrl-C
    Watch,
    /// List recent runs
    History {
        /// Number of runs (defaults to sync.history_limit)
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show the final node states of a finished run
    Inspect { run_id: String },
    /// Answer the gate the live instance is waiting on
    Approve {
        /// Request id; defaults to whichever request is outstanding
        request_id: Option<String>,
        /// Deny instead of approve (local only, the runtime is not told)
        #[arg(long)]
        deny: bool,
    },
    /// Upload a local definition file to the runtime
    Save {
        file: PathBuf,
        /// Name to save under (defaults to the file name)
        #[arg(long)]
        name: Option<String>,
    },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Yaml,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("flowdeck=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "flowdeck", &mut std::io::stdout());
        return Ok(());
    }

    let mut config = AppConfig::discover(cli.config.as_deref())?;
    if let Some(url) = cli.base_url {
        config.runtime.base_url = url;
    }
    if cli.api_key.is_some() {
        config.runtime.api_key = cli.api_key;
    }
    let registry = NodeTypeRegistry::from_config(&config);

    match cli.command {
        Commands::Layout { file, json } => {
            let report = build_file(&registry, &file)?;
            let layout = TopologicalLayout::new(config.layout).layout(&report.graph)?;
            if json {
                let positions: serde_json::Map<String, serde_json::Value> = layout
                    .positions()
                    .iter()
                    .map(|(id, pos)| (id.clone(), serde_json::json!({"x": pos.x, "y": pos.y})))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&positions)?);
            } else {
                for (rank, column) in layout.columns.iter().enumerate() {
                    println!("rank {}: {}", rank, column.join(", "));
                }
            }
        }
        Commands::Validate { file, strict } => {
            let report = build_file(&registry, &file)?;
            println!(
                "{}: {} nodes, {} edges",
                file.display(),
                report.graph.len(),
                report.graph.edges().len()
            );
            for diag in &report.diagnostics {
                println!("  {}", diag);
            }
            if let Err(e) = TopologicalLayout::new(config.layout).layout(&report.graph) {
                println!("  {}", e);
            }
            let round_trip = verify_round_trip(&report.graph, &registry);
            if let Err(ref e) = round_trip {
                println!("  {}", e);
            }
            if !report.is_clean() {
                bail!("{} structural problem(s)", report.diagnostics.len());
            }
            if strict {
                round_trip?;
            }
            println!("OK");
        }
        Commands::Export {
            file,
            format,
            output,
        } => {
            let report = build_file(&registry, &file)?;
            let definition = serialize(&report.graph);
            let text = match format {
                Format::Yaml => definition.to_yaml()?,
                Format::Json => definition.to_json_pretty()?,
            };
            match output {
                Some(path) => {
                    std::fs::write(&path, text)
                        .with_context(|| format!("writing {}", path.display()))?;
                    info!(path = %path.display(), "Definition exported");
                }
                None => print!("{}", text),
            }
        }
        Commands::Watch => {
            let event_bus = EventBus::default();
            spawn_event_printer(&event_bus);
            let mut driver = connect(&config, event_bus)?;

            let cancel = CancellationToken::new();
            let cancel_clone = cancel.clone();
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                info!("Shutting down watch...");
                cancel_clone.cancel();
            });

            driver.start_polling().await;
            driver
                .run(IntervalTicks::new(config.poll_interval()), cancel)
                .await;
        }
        Commands::History { limit } => {
            let client = HttpRuntimeClient::new(&config.runtime)?;
            let limit = limit.unwrap_or(config.sync.history_limit);
            let runs = client.fetch_history(limit).await?;
            if runs.is_empty() {
                println!("No runs recorded yet.");
            }
            for run in runs {
                println!(
                    "  {:<38} {:<10} {}  {}",
                    run.id,
                    run.status,
                    format_time(run.start_time),
                    run.workflow_name
                );
                if let Some(error) = run.error {
                    println!("      error: {}", error);
                }
            }
        }
        Commands::Inspect { run_id } => {
            let mut driver = connect(&config, EventBus::default())?;
            let run = driver.load_historical_run(&run_id).await?;
            println!(
                "Run {} ({}): {}",
                run_id,
                run.workflow_name,
                run.status.as_deref().unwrap_or("unknown")
            );
            print_statuses(driver.session().graph());
            if let Some(error) = run.error {
                println!("error: {}", error);
            }
        }
        Commands::Approve { request_id, deny } => {
            let mut driver = connect(&config, EventBus::default())?;
            driver.start_polling().await;
            if let TickOutcome::Degraded = driver.tick().await {
                bail!("runtime at {} is unreachable", config.runtime.base_url);
            }
            let outstanding = driver
                .session()
                .outstanding_approval()
                .map(|r| r.request_id.clone());
            let Some(request_id) = request_id.or(outstanding) else {
                bail!("no gate is waiting for approval");
            };
            match driver.submit_approval(&request_id, !deny).await? {
                Some(ack) => println!("{}", ack.message),
                None => println!("Denied {} (not sent to the runtime)", request_id),
            }
            driver.stop_polling();
        }
        Commands::Save { file, name } => {
            let name = match name {
                Some(n) => n,
                None => file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .context("file has no name")?,
            };
            let mut driver = connect(&config, EventBus::default())?;
            let report = build_file(driver.registry(), &file)?;
            if !report.is_clean() {
                warn!(problems = report.diagnostics.len(), "Saving definition with structural problems");
            }
            driver.session_mut().load_definition(&name, report);
            let ack = driver.save(&name).await?;
            println!("{}", ack.message);
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        // Handled before config loading
        Commands::Completions { .. } => {}
    }

    Ok(())
}

fn connect(config: &AppConfig, event_bus: EventBus) -> anyhow::Result<SyncDriver<HttpRuntimeClient>> {
    let client = HttpRuntimeClient::new(&config.runtime)?;
    info!(base_url = %client.base_url(), "Using runtime");
    Ok(SyncDriver::new(client, config, event_bus))
}

fn build_file(registry: &NodeTypeRegistry, path: &Path) -> anyhow::Result<BuildReport> {
    let definition = WorkflowDefinition::from_path(path)
        .with_context(|| format!("loading {}", path.display()))?;
    Ok(GraphBuilder::new(registry).build(&definition))
}

fn spawn_event_printer(event_bus: &EventBus) {
    let mut rx = event_bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "Event printer lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

fn print_event(event: &SyncEvent) {
    match event {
        SyncEvent::StateChanged { from, to } => println!("[state] {} -> {}", from, to),
        SyncEvent::DefinitionLoaded {
            name,
            nodes,
            edges,
            diagnostics,
        } => println!(
            "[definition] {}: {} nodes, {} edges, {} problems",
            name, nodes, edges, diagnostics
        ),
        SyncEvent::StatusesChanged { request_id, executed } => println!(
            "[{}] executed: {}",
            request_id.as_deref().unwrap_or("-"),
            executed.join(", ")
        ),
        SyncEvent::ApprovalRequested { request } => {
            let preview = OutputPreview::of(&request.tool_call);
            println!(
                "[gate] {} waiting at {}: {}",
                request.request_id,
                request.node_id,
                preview.as_ref().map_or("", |p| p.label())
            );
            println!("       run `flowdeck approve {}` to continue", request.request_id);
        }
        SyncEvent::ApprovalResolved {
            request_id,
            approved,
        } => println!(
            "[gate] {} {}",
            request_id,
            if *approved { "approved" } else { "denied" }
        ),
        SyncEvent::ApprovalCleared { request_id } => {
            println!("[gate] {} moved on without approval", request_id)
        }
        SyncEvent::ConnectionDegraded { error } => println!("[runtime] unreachable: {}", error),
        SyncEvent::ConnectionRestored => println!("[runtime] reachable again"),
    }
}

fn print_statuses(graph: &Graph) {
    for node in graph.nodes() {
        let status = match node.status {
            ExecutionStatus::Default => "-",
            ExecutionStatus::Executed => "executed",
            ExecutionStatus::Gated => "gated",
            ExecutionStatus::Failed => "FAILED",
        };
        let preview = node.last_output().and_then(OutputPreview::of);
        println!(
            "  {:<28} {:<9} {}",
            node.id,
            status,
            preview.as_ref().map_or("", |p| p.label())
        );
    }
}

fn format_time(epoch_secs: f64) -> String {
    chrono::DateTime::from_timestamp(epoch_secs.trunc() as i64, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}
