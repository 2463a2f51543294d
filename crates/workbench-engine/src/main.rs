//! workbench-engine: operator CLI for the environment reconciliation engine
//!
//! Registers hosting accounts and environment records, reconciles account
//! onboarding state against the real trust roles, and offers a debug path
//! for feeding status events through the reconciliation handler.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use workbench_common::defaults::DEFAULT_SESSION_DURATION_SECS;
use workbench_common::event::StatusEvent;
use workbench_common::ids::{AccountId, EnvTypeId, EnvironmentId, InstanceId, ProjectId};
use workbench_common::status::RawStatusMap;
use workbench_common::timestamp_millis;
use workbench_engine::broker::StsBroker;
use workbench_engine::config::{AwsSettings, StoreConfig};
use workbench_engine::dispatch::BackendRegistry;
use workbench_engine::handlers::{AccountHandler, StatusHandler};
use workbench_engine::store::{NewEnvironment, Store};

#[derive(Parser, Debug)]
#[command(name = "workbench-engine")]
#[command(about = "Environment lifecycle reconciliation engine")]
#[command(version)]
struct Args {
    /// Record database path (default: platform data directory)
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage hosting accounts
    #[command(subcommand)]
    Account(AccountCommand),

    /// Inspect and debug environment records
    #[command(subcommand)]
    Env(EnvCommand),
}

#[derive(Subcommand, Debug)]
enum AccountCommand {
    /// Register a hosting account (or update its trust role)
    Register {
        /// Hosting account identifier
        #[arg(long)]
        account_id: String,

        /// Cross-account trust role to exchange for credentials
        #[arg(long)]
        role_arn: String,

        /// External-id secret required by the trust policy
        #[arg(long)]
        external_id: Option<String>,
    },

    /// List registered accounts and their onboarding status
    List,

    /// Probe delegated roles and update account status
    Reconcile {
        /// Reconcile a single account instead of all
        #[arg(long)]
        account_id: Option<String>,

        /// AWS region
        #[arg(long, default_value = workbench_common::defaults::DEFAULT_REGION)]
        region: String,

        /// AWS profile to use (overrides AWS_PROFILE env var)
        #[arg(long)]
        aws_profile: Option<String>,

        /// Requested credential lifetime in seconds
        #[arg(long, default_value_t = DEFAULT_SESSION_DURATION_SECS)]
        session_duration: i32,
    },
}

#[derive(Subcommand, Debug)]
enum EnvCommand {
    /// Create an environment record in pending status
    Register {
        #[arg(long)]
        environment_id: String,

        #[arg(long)]
        project_id: String,

        #[arg(long)]
        env_type: String,

        /// Hosting account the environment will run in
        #[arg(long)]
        account_id: String,
    },

    /// List environment records
    List {
        /// Only show environments owned by this project
        #[arg(long)]
        project: Option<String>,
    },

    /// Show one environment record as JSON
    Show {
        environment_id: String,
    },

    /// Apply a status event through the reconciliation handler.
    ///
    /// The status is interpreted in the canonical vocabulary (name or
    /// stable code); intended for operator repair and debugging.
    Ingest {
        /// Backend instance the observation is about
        #[arg(long)]
        instance_id: String,

        /// Canonical status name (e.g. "started") or stable code
        #[arg(long)]
        status: String,

        /// Event timestamp, epoch milliseconds (default: now)
        #[arg(long)]
        occurred_at: Option<i64>,

        /// Failure reason to record with a failure status
        #[arg(long)]
        reason: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&e);
        std::process::exit(1);
    }
}

/// Print error in a user-friendly way
fn print_error(e: &anyhow::Error) {
    use std::io::Write;

    let mut stderr = std::io::stderr();

    let _ = writeln!(stderr, "\n\x1b[1;31mError:\x1b[0m {e}");

    let mut source = e.source();
    while let Some(cause) = source {
        let _ = writeln!(stderr, "  \x1b[33mCaused by:\x1b[0m {cause}");
        source = cause.source();
    }
}

async fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    let store = Store::open(&StoreConfig {
        db_path: args.db_path.clone(),
    })
    .await?;

    match args.command {
        Command::Account(cmd) => handle_account(store, cmd).await,
        Command::Env(cmd) => handle_env(store, cmd).await,
    }
}

async fn handle_account(store: Store, cmd: AccountCommand) -> Result<()> {
    match cmd {
        AccountCommand::Register {
            account_id,
            role_arn,
            external_id,
        } => {
            let account_id = AccountId::new(account_id);
            store
                .insert_account(&account_id, &role_arn, external_id.as_deref())
                .await
                .context("Failed to register account")?;
            info!(account_id = %account_id, "Account registered");
            println!("Registered account {account_id} (pending reconciliation)");
        }

        AccountCommand::List => {
            let accounts = store.list_accounts().await?;
            if accounts.is_empty() {
                println!("No registered accounts.");
                return Ok(());
            }

            println!("{:<15} {:<10} {:<25} {}", "ACCOUNT", "STATUS", "RECONCILED_AT", "REASON");
            println!("{}", "-".repeat(75));
            for account in &accounts {
                println!(
                    "{:<15} {:<10} {:<25} {}",
                    account.account_id,
                    account.status,
                    account
                        .reconciled_at
                        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    account.failure_reason.as_deref().unwrap_or("-"),
                );
            }
        }

        AccountCommand::Reconcile {
            account_id,
            region,
            aws_profile,
            session_duration,
        } => {
            let settings = AwsSettings {
                region,
                profile: aws_profile,
                session_duration_secs: session_duration,
            };
            let broker = Arc::new(StsBroker::new(&settings).await);
            let handler = AccountHandler::new(store, broker, None);

            match account_id {
                Some(id) => {
                    let status = handler.execute(&AccountId::new(id.clone())).await?;
                    println!("{id}: {status}");
                }
                None => {
                    let results = handler.reconcile_all().await?;
                    if results.is_empty() {
                        println!("No registered accounts.");
                    }
                    for (id, status) in results {
                        println!("{id}: {status}");
                    }
                }
            }
        }
    }

    Ok(())
}

async fn handle_env(store: Store, cmd: EnvCommand) -> Result<()> {
    match cmd {
        EnvCommand::Register {
            environment_id,
            project_id,
            env_type,
            account_id,
        } => {
            let record = store
                .insert_environment(&NewEnvironment {
                    environment_id: EnvironmentId::new(environment_id),
                    project_id: ProjectId::new(project_id),
                    env_type: EnvTypeId::new(env_type),
                    account_id: AccountId::new(account_id),
                })
                .await
                .context("Failed to register environment")?;
            println!(
                "Registered environment {} ({})",
                record.environment_id, record.status
            );
        }

        EnvCommand::List { project } => {
            let project = project.map(ProjectId::new);
            let environments = store.list_environments(project.as_ref()).await?;
            if environments.is_empty() {
                println!("No environment records.");
                return Ok(());
            }

            println!(
                "{:<20} {:<12} {:<12} {:<18} {:<10}",
                "ENVIRONMENT", "PROJECT", "TYPE", "STATUS", "INSTANCE"
            );
            println!("{}", "-".repeat(76));
            for env in &environments {
                println!(
                    "{:<20} {:<12} {:<12} {:<18} {:<10}",
                    env.environment_id,
                    env.project_id,
                    env.env_type,
                    env.status,
                    env.instance_id
                        .as_ref()
                        .map(ToString::to_string)
                        .unwrap_or_else(|| "-".to_string()),
                );
            }
        }

        EnvCommand::Show { environment_id } => {
            let record = store
                .environment(&EnvironmentId::new(environment_id.clone()))
                .await?
                .with_context(|| format!("No environment record '{environment_id}'"))?;

            let json = serde_json::json!({
                "environment_id": record.environment_id.as_str(),
                "project_id": record.project_id.as_str(),
                "env_type": record.env_type.as_str(),
                "account_id": record.account_id.as_str(),
                "status": record.status.to_string(),
                "status_code": record.status.code(),
                "status_version": record.status_version,
                "last_event_at": record.last_event_at,
                "instance_id": record.instance_id.as_ref().map(|i| i.as_str()),
                "failure_reason": record.failure_reason,
                "created_at": record.created_at.to_rfc3339(),
                "updated_at": record.updated_at.to_rfc3339(),
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }

        EnvCommand::Ingest {
            instance_id,
            status,
            occurred_at,
            reason,
        } => {
            let instance_id = InstanceId::new(instance_id);
            let record = store
                .environment_by_instance(&instance_id)
                .await?
                .with_context(|| format!("No environment maps to instance '{instance_id}'"))?;

            // Operator ingest speaks the canonical vocabulary directly.
            let registry = BackendRegistry::builder()
                .status_map(record.env_type.clone(), RawStatusMap::canonical())
                .build();
            let handler = StatusHandler::new(store, Arc::new(registry), None);

            let mut event = StatusEvent::new(
                instance_id,
                status,
                occurred_at.unwrap_or_else(timestamp_millis),
            );
            if let Some(reason) = reason {
                event = event.with_detail("reason", &reason);
            }

            let outcome = handler
                .execute(&event)
                .await
                .map_err(|e| anyhow::anyhow!("{e} (disposition: {})", e.disposition()))
                .context("Event was not applied")?;
            println!("{outcome:?}");
        }
    }

    Ok(())
}
