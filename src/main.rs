use std::sync::Arc;

use arbiter::bus::EventBus;
use arbiter::config::AppConfig;
use arbiter::conflict::ConflictDetector;
use arbiter::error::{ArbiterError, Result};
use arbiter::manager::OrderManager;
use arbiter::ownership::OwnershipService;
use arbiter::recovery::OrderRecovery;
use arbiter::store::{PostgresStore, TradeStore};
use arbiter::EventType;
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "arbiter", about = "Multi-strategy order arbitration engine")]
struct Cli {
    /// Directory holding default.toml and environment overlays
    #[arg(long, default_value = "config")]
    config_dir: String,

    /// Run startup recovery, print the summary, and exit
    #[arg(long)]
    recover_only: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config_dir)?;
    init_logging(&config);

    if let Err(errors) = config.validate() {
        for e in &errors {
            error!("Config: {}", e);
        }
        return Err(ArbiterError::Validation(format!(
            "{} configuration error(s)",
            errors.len()
        )));
    }

    // Composition root: every service is constructed here and injected;
    // nothing in the crate reaches for ambient state.
    let store = PostgresStore::new(&config.database.url, config.database.max_connections).await?;
    store.migrate().await?;
    let store: Arc<dyn TradeStore> = Arc::new(store);

    let bus = Arc::new(EventBus::new(config.events.history_capacity));
    subscribe_event_log(&bus);

    let detector = Arc::new(ConflictDetector::new(store.clone(), bus.clone()));
    let ownership = Arc::new(OwnershipService::new(store.clone(), bus.clone()));
    let manager = Arc::new(OrderManager::new(
        store.clone(),
        bus.clone(),
        detector,
        ownership,
    ));

    // Broker integration is deployment-specific; without one, recovery
    // flags every pending order for manual review rather than guessing.
    let recovery = OrderRecovery::new(manager.clone(), store.clone(), None);
    let summary = recovery.run().await?;

    if !summary.fully_reconciled() {
        warn!(
            "{} order(s) need manual review: {:?}",
            summary.failed, summary.manual_review
        );
        if config.recovery.strict {
            return Err(ArbiterError::Validation(
                "recovery left unresolved orders and recovery.strict is set".to_string(),
            ));
        }
    }

    if cli.recover_only {
        info!(
            "Recovery-only run: total={}, recovered={}, failed={}",
            summary.total, summary.recovered, summary.failed
        );
        return Ok(());
    }

    info!("arbiter ready; press Ctrl-C to stop");
    signal::ctrl_c().await?;
    info!("Shutdown signal received");
    Ok(())
}

fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Mirror every published event into the process log.
fn subscribe_event_log(bus: &Arc<EventBus>) {
    for event_type in [
        EventType::OrderSent,
        EventType::OrderFilled,
        EventType::OrderCancelled,
        EventType::OrderRejected,
        EventType::OrderFailed,
        EventType::ConflictDetected,
        EventType::OrderBlockedByConflict,
        EventType::PriorityOverride,
        EventType::OwnershipTransferred,
    ] {
        bus.subscribe(
            event_type,
            Arc::new(|event| {
                info!(
                    "event {} ticker={} order={}",
                    event.event_type,
                    event.ticker.as_deref().unwrap_or("-"),
                    event
                        .order_id
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "-".to_string())
                );
                Ok(())
            }),
        );
    }
}
