use std::{net::SocketAddr, sync::Arc};

use tokio::{signal, sync::mpsc};
use tracing::info;

use storefront_api as api;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    // Init DB
    let db = api::db::establish_connection(&cfg).await?;
    if cfg.auto_migrate {
        api::db::ensure_schema(&db).await?;
    }
    let db = Arc::new(db);

    // Init events
    let (event_tx, event_rx) = mpsc::channel(1024);
    let event_sender = api::events::EventSender::new(event_tx);
    tokio::spawn(api::events::process_events(event_rx));

    // Notification worker (fire-and-forget delivery queue)
    let (notifications, _notification_worker) = api::services::NotificationService::start(
        cfg.notification_relay_url.clone(),
        cfg.admin_alert_address.clone(),
    );

    let config = Arc::new(cfg);

    // External collaborators
    let gateway: Arc<dyn api::clients::PaymentGateway> =
        Arc::new(api::clients::HttpPaymentGateway::new(&config)?);
    let dispatcher: Arc<dyn api::clients::ShipmentDispatcher> =
        Arc::new(api::clients::HttpShipmentDispatcher::new(&config)?);

    // Aggregate app services used by HTTP handlers
    let services = api::handlers::AppServices::new(
        db.clone(),
        Arc::new(event_sender.clone()),
        config.clone(),
        gateway,
        dispatcher,
        Arc::new(notifications),
    );

    let state = Arc::new(api::AppState {
        db,
        config: config.clone(),
        event_sender,
        services,
    });

    let app = api::app_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("storefront-api listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    info!("Shutdown signal received, draining connections");
}
