use std::{sync::Arc, time::Duration};

use ledger::{Ledger, StopSignal};
use migration::{Migrator, MigratorTrait};
use tracing_subscriber::EnvFilter;

mod settings;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let settings = settings::Settings::new()?;
    let mut tasks = tokio::task::JoinSet::new();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "walletd={level},server={level},ledger={level},migration={level}",
            level = settings.app.level
        ))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let db = ledger::connect(&settings.database_settings()).await?;
    Migrator::up(&db, None).await?;

    let ledger = Ledger::builder()
        .database(db)
        .config(settings.ledger_config())
        .commission(settings.commission_settings()?)
        .converter(Arc::new(settings.converter()?))
        .build()
        .await?;

    let (stop, signal) = StopSignal::new();

    if settings.reconciliation.enabled {
        tracing::info!(
            interval_secs = settings.reconciliation.interval_secs,
            lookback_hours = settings.reconciliation.lookback_hours,
            "starting periodic reconciliation"
        );
        let sweep = ledger::spawn_periodic_reconciliation(
            ledger.clone(),
            settings.reconcile_interval(),
            settings.reconcile_lookback(),
            signal.clone(),
        );
        tasks.spawn(async move {
            if let Err(err) = sweep.await {
                tracing::error!("reconciliation task failed: {err}");
            }
        });
    }

    if let Some(server) = &settings.server {
        tracing::info!("Found server settings...");
        let bind = server.bind.clone().unwrap_or_else(|| "127.0.0.1".to_string());
        let addr = format!("{}:{}", bind, server.port);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let ledger = ledger.clone();
        let mut signal = signal.clone();
        tasks.spawn(async move {
            let shutdown = async move { signal.stopped().await };
            if let Err(err) = server::run_with_listener(ledger, listener, shutdown).await {
                tracing::error!("server failed: {err}");
            }
        });
    }

    shutdown_signal().await;
    tracing::info!("shutdown requested");
    stop.stop();
    while tasks.join_next().await.is_some() {}

    let grace = Duration::from_secs(settings.app.shutdown_grace_secs);
    let remaining = ledger.shutdown(grace).await?;
    tracing::info!(remaining, "walletd stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
