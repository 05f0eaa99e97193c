use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand};
use eyre::{eyre, Result};
use sqlx::postgres::PgPoolOptions;

use sol_watch_core::config::{Args as ConfigArgs, Config};
use sol_watch_core::credentials::CredentialCustodian;
use sol_watch_core::error;
use sol_watch_core::ledger::Ledger;
use sol_watch_core::rate_controller::RateController;
use sol_watch_core::registry::{AddOutcome, RemoveOutcome, WatchRegistry};
use sol_watch_core::rpc::RpcClient;
use sol_watch_core::scheduler::PollScheduler;
use sol_watch_core::supervisor::Supervisor;

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the monitoring core: poll scheduler + supervisor, forever.
    Serve,

    /// Register a new watch for `account` under `subscriber`.
    AddWatch {
        #[arg(long)]
        subscriber: i64,
        #[arg(long)]
        account: String,
        /// Plaintext credential; encrypted at rest before storage.
        #[arg(long)]
        credential: String,
        #[arg(long)]
        nickname: Option<String>,
    },

    /// Deactivate a watch.
    RemoveWatch {
        #[arg(long)]
        subscriber: i64,
        #[arg(long)]
        account: String,
    },

    /// Re-assign every active watch to a single subscriber (operator
    /// handoff).
    TransferAll {
        #[arg(long)]
        to: i64,
    },

    /// Update the persisted minimum notification amount.
    SetMinAmount {
        #[arg(long)]
        amount: f64,
    },
}

#[derive(Parser, Debug)]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    Config::load_dotenv();
    let cli = Cli::parse();
    let cfg = Config::from_args(cli.config).map_err(|e| eyre!("configuration error: {e}"))?;

    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_max_connections)
        .connect(&cfg.database_url)
        .await
        .map_err(|e| eyre!("failed to connect to storage: {e}"))?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(error::StorageError::from)
        .map_err(|e| eyre!("failed to run migrations: {e}"))?;

    let registry = Arc::new(WatchRegistry::new(pool.clone()));
    let ledger = Arc::new(Ledger::new(pool));

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(cfg, registry, ledger).await,
        Command::AddWatch {
            subscriber,
            account,
            credential,
            nickname,
        } => {
            let custodian = CredentialCustodian::load(&cfg.key_file)
                .map_err(|e| eyre!("credential custodian error: {e}"))?;
            let encrypted = custodian
                .encrypt(&credential)
                .map_err(|e| eyre!("failed to encrypt credential: {e}"))?;

            match registry
                .add(subscriber, &account, &encrypted, nickname.as_deref(), unix_now())
                .await
                .map_err(|e| eyre!("registry error: {e}"))?
            {
                AddOutcome::Added => {
                    tracing::info!(subscriber, account, "watch added");
                    Ok(())
                }
                AddOutcome::Duplicate => Err(eyre!(
                    "subscriber {subscriber} already watches {account}"
                )),
            }
        }
        Command::RemoveWatch { subscriber, account } => {
            match registry
                .remove(subscriber, &account)
                .await
                .map_err(|e| eyre!("registry error: {e}"))?
            {
                RemoveOutcome::Removed => {
                    tracing::info!(subscriber, account, "watch removed");
                    Ok(())
                }
                RemoveOutcome::NotFound => Err(eyre!("no active watch for {subscriber}/{account}")),
            }
        }
        Command::TransferAll { to } => {
            let stats = registry
                .transfer_all_to(to)
                .await
                .map_err(|e| eyre!("registry error: {e}"))?;
            tracing::info!(to, transferred = stats.transferred, "transfer complete");
            Ok(())
        }
        Command::SetMinAmount { amount } => {
            registry
                .write_setting("min_notification_amount", &amount.to_string())
                .await
                .map_err(|e| eyre!("registry error: {e}"))?;
            tracing::info!(amount, "minimum notification amount updated");
            Ok(())
        }
    }
}

async fn serve(
    cfg: Config,
    registry: Arc<WatchRegistry>,
    ledger: Arc<Ledger>,
) -> Result<()> {
    let rate_controller = Arc::new(RateController::new());
    let rpc = Arc::new(RpcClient::new(cfg.rpc_url.clone(), rate_controller.clone()));

    let scheduler = Arc::new(PollScheduler::new(
        rpc,
        rate_controller.clone(),
        registry.clone(),
        ledger,
        cfg.admin_id,
    ));

    let supervisor = Supervisor::new(scheduler, rate_controller, registry);

    tracing::info!(rpc_url = %cfg.rpc_url, admin_id = cfg.admin_id, "sol-watch core starting");

    tokio::select! {
        _ = supervisor.run() => unreachable!("supervisor.run() never returns"),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received shutdown signal");
            Ok(())
        }
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
