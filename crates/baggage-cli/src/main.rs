//! Baggage CLI: drive the baggage lifecycle orchestrator from a terminal.
//!
//! Uses the same `baggage-core` service that embeds into other hosts; every
//! command prints JSON to stdout and logs to stderr.

use baggage_cli::commands;
use clap::{Parser, Subcommand};

/// Baggage lifecycle orchestrator CLI
#[derive(Parser)]
#[command(name = "baggage", version, about = "Baggage lifecycle orchestrator CLI")]
pub struct Cli {
    /// Path to the SQLite database file
    #[arg(long, env = "BAGGAGE_DB_PATH", default_value = "baggage.db")]
    db: String,

    /// YAML config file (environment variables still override it)
    #[arg(long, env = "BAGGAGE_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a canned journey end to end
    Demo {
        /// happy-path, tight-connection, missed-connection, high-value, mishandled or all
        #[arg(default_value = "all")]
        scenario: String,
    },

    /// Check a bag in and run it until it is delivered or waits for a human
    Init {
        /// Trip facts as JSON, or @path to a JSON file
        trip: String,
    },

    /// Inspect bags
    Bag {
        #[command(subcommand)]
        action: BagAction,
    },

    /// Submit an external event for a bag
    Event {
        /// Bag ID
        bag_id: String,
        /// scan, flight_delay, status_override or approval_decision
        #[arg(long = "type")]
        event_type: String,
        /// Event payload as a JSON string
        #[arg(long, default_value = "{}")]
        payload: String,
        /// low, medium, high or critical
        #[arg(long, default_value = "medium")]
        priority: String,
    },

    /// Manage approvals
    Approval {
        #[command(subcommand)]
        action: ApprovalAction,
    },

    /// Resolve approvals past their deadline
    Sweep {
        /// Keep sweeping on the configured interval until Ctrl-C
        #[arg(long)]
        watch: bool,
    },
}

#[derive(Subcommand)]
enum BagAction {
    /// List every bag with its latest summary
    List {
        /// Only ids of bags currently at this node (e.g. wait_approval)
        #[arg(long)]
        node: Option<String>,
    },
    /// Show a bag's state summary
    Get {
        bag_id: String,
        /// Include the journey log, alerts and agent calls
        #[arg(long)]
        full: bool,
    },
    /// Show a bag's checkpoint history
    History {
        bag_id: String,
        /// Only checkpoints of this lifecycle run
        #[arg(long)]
        workflow: Option<String>,
    },
    /// Acknowledge one of a bag's alerts
    Ack { bag_id: String, alert_id: String },
    /// Resume a bag that is not waiting on a human
    Advance { bag_id: String },
}

#[derive(Subcommand)]
enum ApprovalAction {
    /// List pending approvals
    List {
        /// Only approvals for this role (supervisor or manager)
        #[arg(long)]
        role: Option<String>,
    },
    /// Record a decision and resume the bag
    Decide {
        /// Approval ID
        approval_id: String,
        /// approve or reject
        #[arg(long)]
        decision: String,
        /// Who decided
        #[arg(long)]
        by: String,
        #[arg(long)]
        comments: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "baggage_core=info,baggage_cli=info".into()),
        )
        .init();

    let Some(command) = cli.command else {
        use clap::CommandFactory;
        let mut cmd = Cli::command();
        let _ = cmd.print_help();
        println!();
        return;
    };

    let service = match commands::init_service(&cli.db, cli.config.as_deref()) {
        Ok(service) => service,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let result = match command {
        Commands::Demo { scenario } => commands::demo::run(&service, &scenario).await,
        Commands::Init { trip } => commands::init::run(&service, &trip).await,
        Commands::Bag { action } => match action {
            BagAction::List { node } => commands::state::list(&service, node.as_deref()).await,
            BagAction::Get { bag_id, full: false } => commands::state::get(&service, &bag_id).await,
            BagAction::Get { bag_id, full: true } => commands::state::full(&service, &bag_id).await,
            BagAction::History { bag_id, workflow } => {
                commands::state::history(&service, &bag_id, workflow.as_deref()).await
            }
            BagAction::Ack { bag_id, alert_id } => {
                commands::state::acknowledge(&service, &bag_id, &alert_id).await
            }
            BagAction::Advance { bag_id } => commands::state::advance(&service, &bag_id).await,
        },
        Commands::Event {
            bag_id,
            event_type,
            payload,
            priority,
        } => commands::event::submit(&service, &bag_id, &event_type, &payload, &priority).await,
        Commands::Approval { action } => match action {
            ApprovalAction::List { role } => {
                commands::approvals::list(&service, role.as_deref()).await
            }
            ApprovalAction::Decide {
                approval_id,
                decision,
                by,
                comments,
            } => {
                commands::approvals::decide(
                    &service,
                    &approval_id,
                    &decision,
                    &by,
                    comments.as_deref(),
                )
                .await
            }
        },
        Commands::Sweep { watch: true } => commands::sweep::watch(&service)
            .await
            .map(|()| serde_json::Value::Null),
        Commands::Sweep { watch: false } => commands::sweep::once(&service).await,
    };

    match result {
        Ok(serde_json::Value::Null) => {}
        Ok(value) => commands::print_json(&value),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
