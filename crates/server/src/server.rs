use std::{future::Future, sync::Arc};

use axum::{
    Router,
    routing::{get, post},
};

use crate::{commissions, health, wallets, webhooks};
use ledger::{Ledger, ReconcileTrigger};

#[derive(Clone)]
pub struct ServerState {
    pub ledger: Arc<Ledger>,
}

/// Reconciles one user in the background after a balance-affecting call.
/// Failures are only logged; the periodic sweep covers them.
pub(crate) fn spawn_targeted_reconcile(ledger: &Arc<Ledger>, user_id: String, source: &str) {
    let ledger = Arc::clone(ledger);
    let trigger = ReconcileTrigger::Targeted(source.to_string());
    tokio::spawn(async move {
        if let Err(err) = ledger.reconcile_user(&user_id, trigger).await {
            tracing::warn!(user_id = %user_id, error = %err, "targeted reconciliation failed");
        }
    });
}

pub fn router(ledger: Ledger) -> Router {
    let state = ServerState {
        ledger: Arc::new(ledger),
    };
    Router::new()
        .route("/webhooks/payments", post(webhooks::payment))
        .route("/wallets/{user_id}/deposits", post(wallets::deposit))
        .route("/wallets/{user_id}/reconcile", post(wallets::reconcile))
        .route("/wallets/{user_id}/{currency}", get(wallets::overview))
        .route("/commissions/bookings", post(commissions::booking_completed))
        .route("/commissions/rentals", post(commissions::rental_completed))
        .route(
            "/commissions/{source_type}/{source_id}/cancel",
            post(commissions::cancel),
        )
        .route("/health/pool", get(health::pool))
        .with_state(state)
}

/// Serves until `shutdown` resolves, then lets in-flight requests finish.
pub async fn run_with_listener<F>(
    ledger: Ledger,
    listener: tokio::net::TcpListener,
    shutdown: F,
) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, router(ledger))
        .with_graceful_shutdown(shutdown)
        .await
}

pub fn spawn_with_listener(
    ledger: Ledger,
    listener: tokio::net::TcpListener,
) -> Result<std::net::SocketAddr, std::io::Error> {
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        if let Err(err) = run_with_listener(ledger, listener, std::future::pending()).await {
            tracing::error!("server failed: {err}");
        }
    });

    Ok(addr)
}
