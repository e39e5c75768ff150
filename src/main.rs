use std::{net::SocketAddr, sync::Arc};

use tokio::{signal, sync::mpsc};
use tracing::{error, info};

use checkout_api as api;
use rust_decimal_macros::dec;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    let db = api::db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db).await.map_err(|e| {
            error!("failed running migrations: {}", e);
            e
        })?;
    }
    let db = Arc::new(db);

    let (event_tx, event_rx) = mpsc::channel(1024);
    let event_sender = api::events::EventSender::new(event_tx);
    tokio::spawn(api::events::process_events(event_rx));

    // Integration point for the catalog's coupon service. Until a real one
    // is wired, a seeded in-memory book keeps the flow exercisable.
    let coupons = Arc::new(
        api::services::coupons::StaticCouponBook::new()
            .with_coupon("WELCOME50", "Welcome ₹50 Off", dec!(50), dec!(299))
            .with_coupon("SAVE100", "Flat ₹100 Off", dec!(100), dec!(999)),
    );

    let state = api::AppState::new(db, cfg.clone(), event_sender, coupons);
    tokio::spawn(
        state
            .sessions
            .clone()
            .prune_loop(std::time::Duration::from_secs(60)),
    );
    let app = api::app(state);

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port).parse()?;
    info!(%addr, environment = %cfg.environment, "checkout service listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
