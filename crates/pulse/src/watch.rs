//! Watch command: keep views live and print every change.

use std::sync::Arc;

use miette::{IntoDiagnostic, Result};
use pulse_query::{CacheEvent, QueryClient, QueryKey};
use pulse_scheduler::{RefreshScheduler, SettingsStore};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::output;

/// Subscribe to `keys` and print each committed result until Ctrl-C.
pub async fn run(
    client: Arc<QueryClient>,
    settings: Arc<dyn SettingsStore>,
    keys: Vec<QueryKey>,
) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("received Ctrl-C, shutting down"),
            Err(e) => warn!(error = %e, "failed to listen for Ctrl-C"),
        }
        let _ = shutdown_tx.send(true);
    });

    watch_until(client, settings, keys, shutdown_rx, |key, view| {
        output::print(key, view)
    })
    .await
}

/// Drive the scheduler for `keys` and hand every committed view to `emit`
/// until `shutdown_rx` flips to true.
pub async fn watch_until<F>(
    client: Arc<QueryClient>,
    settings: Arc<dyn SettingsStore>,
    keys: Vec<QueryKey>,
    mut shutdown_rx: watch::Receiver<bool>,
    mut emit: F,
) -> Result<()>
where
    F: FnMut(&QueryKey, &pulse_query::View),
{
    // Listen before subscribing so the first commit is not missed.
    let mut events = client.cache().events();

    let scheduler = RefreshScheduler::new(client.clone(), settings);
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx.clone()));

    let subscriptions: Vec<_> = keys.iter().map(|key| client.subscribe(key)).collect();
    info!(views = keys.len(), "watching");

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            event = events.recv() => match event {
                Ok(CacheEvent::Committed { key, .. }) if keys.contains(&key) => {
                    emit(&key, &client.view(&key));
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "missed cache events, printing current views");
                    for key in &keys {
                        emit(key, &client.view(key));
                    }
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    for subscription in subscriptions {
        client.unsubscribe(subscription);
    }
    scheduler_task.await.into_diagnostic()?;
    Ok(())
}
