mod config;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fleetlive_connection::{ConnectionManager, Predicate, SseTransport};
use fleetlive_notify::{NotificationLayer, RefreshTrigger};
use fleetlive_protocol::kinds;

use config::MonitorConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,fleetlive=debug")),
        )
        .init();

    let path = config::config_path()?;
    let cfg = if path.exists() {
        MonitorConfig::load_from(&path)?
    } else {
        let defaults = MonitorConfig::default();
        if let Err(e) = defaults.save_to(&path) {
            warn!(path = %path.display(), error = %e, "failed to write default config");
        }
        defaults
    };
    info!(endpoint = %cfg.endpoint, "starting fleetlive monitor");

    let transport = SseTransport::new(cfg.endpoint.clone()).with_config(&cfg.live);
    let manager = ConnectionManager::new(cfg.live.clone(), transport)?;

    let notifications_enabled = Arc::new(AtomicBool::new(cfg.notifications_enabled));
    let notifications = NotificationLayer::attach(manager.dispatcher(), notifications_enabled);
    let updates = RefreshTrigger::attach(
        manager.dispatcher(),
        Predicate::types([kinds::UPDATE_AVAILABLE, kinds::UPDATE_APPLIED]),
    );

    // Toasts have nowhere to render here, so log and dismiss them.
    let (_, mut toasts) = manager.dispatcher().subscribe_channel(Predicate::all(), 64);
    let mut status = manager.watch_status();
    let mut refresh = updates.subscribe();

    manager.start()?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
            Ok(()) = status.changed() => {
                let current = *status.borrow_and_update();
                info!(status = ?current, indicator = ?current.indicator(), "connection status");
            }
            Ok(()) = refresh.changed() => {
                let generation = *refresh.borrow_and_update();
                info!(generation, "update list changed");
            }
            Some(_) = toasts.recv() => {
                for toast in notifications.toasts() {
                    info!(
                        title = %toast.title,
                        message = toast.message.as_deref().unwrap_or(""),
                        event_type = toast.event_type.as_deref().unwrap_or(""),
                        "notification"
                    );
                    notifications.dismiss(toast.id);
                }
            }
        }
    }

    manager.stop();
    Ok(())
}
