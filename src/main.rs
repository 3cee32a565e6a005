// SplitIt client entry point.
//
// Startup sequence:
// 1. Initialize tracing (log to file)
// 2. Load config
// 3. Open the local client-state database, report any saved draft
// 4. Build the API client
// 5. Start the balance watcher
// 6. Consume watcher events until Ctrl+C

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::info;

use splitit_client::api::ApiClient;
use splitit_client::config;
use splitit_client::store::{DraftStore, SqliteStore};
use splitit_client::watcher::{BalanceWatcher, WatcherEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing
    init_tracing()?;
    info!("SplitIt client starting up");

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: group={}, api={}, poll every {}ms",
        config.group_id, config.base_url, config.poll_interval_ms
    );

    // 3. Open the local client-state database
    let store = SqliteStore::open(&config.db_path).context("failed to open client database")?;
    info!("Client database opened at {}", config.db_path);

    let drafts = DraftStore::new(store);
    if let Some(draft) = drafts.load() {
        info!(
            "Saved expense draft found ('{}', {} split members); it will be restored when composing",
            draft.title,
            draft.split_among.len()
        );
    }

    // 4. Build the API client
    let api = Arc::new(ApiClient::new(&config.base_url));

    // 5. Start the balance watcher
    let (event_tx, mut event_rx) = mpsc::channel(64);
    let mut watcher = BalanceWatcher::new(config.group_id, api, event_tx);
    watcher.start(Duration::from_millis(config.poll_interval_ms));
    println!(
        "Watching group {} for payments (every {}ms). Ctrl+C to stop.",
        config.group_id, config.poll_interval_ms
    );

    // 6. Consume watcher events until Ctrl+C
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down");
                break;
            }
            event = event_rx.recv() => match event {
                Some(WatcherEvent::PaymentObserved(payment)) => {
                    info!("payment observed: {}", payment.message());
                    println!("{}", payment.message());
                }
                Some(WatcherEvent::Refresh { balances, expenses }) => {
                    info!(
                        "group state refreshed: {} balances, {} settlements, {} expenses",
                        balances.balances.len(),
                        balances.settlements.len(),
                        expenses.len()
                    );
                }
                None => break,
            }
        }
    }

    watcher.stop();
    info!("SplitIt client shut down cleanly");
    Ok(())
}

/// Initialize tracing to log to a file, keeping stdout for notifications.
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::File::create(log_dir.join("splitit.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("splitit_client=info,warn")),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
