use clap::{Parser, Subcommand};
use serde::Serialize;
use std::error::Error;
use std::sync::Arc;
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pcrf::control::NewPolicy;
use pcrf::{PcrfConfig, PersistenceGateway, SessionManager};

/// Operator front end for the policy and charging control core.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file. `PCRF_*` environment variables override it.
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the schema and the default policy.
    Init,
    /// Onboard a subscriber on the default policy.
    Onboard { external_id: String },
    /// Soft-delete a subscriber without an active session.
    Remove { external_id: String },
    /// Show a subscriber with usage and assigned policies.
    Subscriber { external_id: String },
    /// Open a session for a subscriber's UE address.
    Open { external_id: String, ue_ip: String },
    /// Close a session with its final byte counters.
    Close {
        session_id: i32,
        tx_bytes: i64,
        rx_bytes: i64,
    },
    /// Show one session.
    Session { session_id: i32 },
    /// List active sessions, or the active session of one subscriber.
    Active { external_id: Option<String> },
    /// List every session of a subscriber.
    Sessions { external_id: String },
    /// Flows of a subscriber's active session.
    Flows { external_id: String },
    /// Cumulative usage of a subscriber.
    Usage { external_id: String },
    #[command(subcommand)]
    Policy(PolicyCommand),
    #[command(subcommand)]
    Reroute(RerouteCommand),
    #[command(subcommand)]
    Cdr(CdrCommand),
}

/// Policy administration.
#[derive(Subcommand, Debug)]
enum PolicyCommand {
    List,
    Show {
        policy_id: i32,
    },
    /// Policy currently in force for a subscriber.
    Applicable {
        external_id: String,
    },
    Create {
        #[arg(long)]
        data_cap: i64,
        #[arg(long)]
        downlink: i64,
        #[arg(long)]
        uplink: i64,
        #[arg(long, default_value_t = 0)]
        burst: i64,
    },
    Update {
        policy_id: i32,
        #[arg(long)]
        data_cap: Option<i64>,
        #[arg(long)]
        downlink: Option<i64>,
        #[arg(long)]
        uplink: Option<i64>,
        #[arg(long)]
        burst: Option<i64>,
    },
    /// Put a policy at `position` in a subscriber's assignment list.
    Assign {
        external_id: String,
        policy_id: i32,
        #[arg(long, default_value_t = 0)]
        position: usize,
    },
}

/// Reroute target administration.
#[derive(Subcommand, Debug)]
enum RerouteCommand {
    Show { reroute_id: i32 },
    Create { target_ip: String },
    Move { reroute_id: i32, target_ip: String },
}

/// Charging records of completed sessions.
#[derive(Subcommand, Debug)]
enum CdrCommand {
    Session { session_id: i32 },
    Subscriber { external_id: String },
}

fn init_logging(log_dir: &str) {
    // JSON file log, rotated daily.
    let file_appender = rolling::daily(log_dir, "pcrfd.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    // Human-readable log on stderr; stdout carries command output.
    let stderr_layer = fmt::layer().with_writer(std::io::stderr);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sea_orm=warn,sqlx::query=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(manager: &SessionManager, command: Command) -> Result<(), Box<dyn Error>> {
    match command {
        Command::Init => {
            let policy = manager.policies().create_default_policy().await?;
            let reroute = manager.reroutes().default_target().await?;
            print_json(&serde_json::json!({ "default_policy": policy, "default_reroute": reroute }))
        }
        Command::Onboard { external_id } => {
            print_json(&manager.onboard_subscriber(&external_id).await?)
        }
        Command::Remove { external_id } => {
            manager.remove_subscriber(&external_id).await?;
            print_json(&serde_json::json!({ "removed": external_id }))
        }
        Command::Subscriber { external_id } => {
            print_json(&manager.get_subscriber(&external_id).await?)
        }
        Command::Open { external_id, ue_ip } => {
            print_json(&manager.open_session(&external_id, &ue_ip).await?)
        }
        Command::Close {
            session_id,
            tx_bytes,
            rx_bytes,
        } => print_json(&manager.close_session(session_id, tx_bytes, rx_bytes).await?),
        Command::Session { session_id } => print_json(&manager.get_session(session_id).await?),
        Command::Active { external_id: None } => {
            print_json(&manager.list_active_sessions().await?)
        }
        Command::Active {
            external_id: Some(external_id),
        } => print_json(&manager.get_active_session(&external_id).await?),
        Command::Sessions { external_id } => {
            print_json(&manager.sessions_for_subscriber(&external_id).await?)
        }
        Command::Flows { external_id } => {
            print_json(&manager.flows_for_subscriber(&external_id).await?)
        }
        Command::Usage { external_id } => {
            print_json(&manager.usage().get_usage_record(&external_id).await?)
        }
        Command::Policy(command) => run_policy(manager, command).await,
        Command::Reroute(RerouteCommand::Show { reroute_id }) => {
            print_json(&manager.reroutes().get_reroute(reroute_id).await?)
        }
        Command::Reroute(RerouteCommand::Create { target_ip }) => {
            print_json(&manager.reroutes().create_reroute(&target_ip).await?)
        }
        Command::Reroute(RerouteCommand::Move {
            reroute_id,
            target_ip,
        }) => print_json(
            &manager
                .reroutes()
                .update_reroute_target(reroute_id, &target_ip)
                .await?,
        ),
        Command::Cdr(CdrCommand::Session { session_id }) => {
            print_json(&manager.charging_record(session_id).await?)
        }
        Command::Cdr(CdrCommand::Subscriber { external_id }) => {
            print_json(&manager.charging_records(&external_id).await?)
        }
    }
}

async fn run_policy(manager: &SessionManager, command: PolicyCommand) -> Result<(), Box<dyn Error>> {
    let policies = manager.policies();
    match command {
        PolicyCommand::List => print_json(&policies.list_policies().await?),
        PolicyCommand::Show { policy_id } => print_json(&policies.get_policy(policy_id).await?),
        PolicyCommand::Applicable { external_id } => {
            print_json(&policies.get_applicable_policy(&external_id).await?)
        }
        PolicyCommand::Create {
            data_cap,
            downlink,
            uplink,
            burst,
        } => {
            let created = policies
                .create_policy(NewPolicy {
                    data_cap,
                    downlink_limit: downlink,
                    uplink_limit: uplink,
                    burst,
                    start_time: None,
                    end_time: None,
                })
                .await?;
            print_json(&created)
        }
        PolicyCommand::Update {
            policy_id,
            data_cap,
            downlink,
            uplink,
            burst,
        } => {
            let mut policy = policies.get_policy(policy_id).await?;
            policy.data_cap = data_cap.unwrap_or(policy.data_cap);
            policy.downlink_limit = downlink.unwrap_or(policy.downlink_limit);
            policy.uplink_limit = uplink.unwrap_or(policy.uplink_limit);
            policy.burst = burst.unwrap_or(policy.burst);
            print_json(&policies.update_policy(policy).await?)
        }
        PolicyCommand::Assign {
            external_id,
            policy_id,
            position,
        } => print_json(
            &policies
                .assign_policy(&external_id, policy_id, position)
                .await?,
        ),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let config = PcrfConfig::load(args.config.as_deref())?;
    init_logging(&config.log_dir);
    info!(version = env!("CARGO_PKG_VERSION"), "Starting pcrfd...");

    let gateway = Arc::new(PersistenceGateway::connect(&config).await?);
    gateway.init_schema().await?;

    let manager = SessionManager::new(gateway, &config);
    manager.policies().create_default_policy().await?;

    if let Err(e) = run(&manager, args.command).await {
        error!(error = %e, "Command failed.");
        return Err(e);
    }
    Ok(())
}
