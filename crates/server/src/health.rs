use api_types::health::PoolHealth;
use axum::{Json, extract::State};

use crate::server::ServerState;

pub async fn pool(State(state): State<ServerState>) -> Json<PoolHealth> {
    let stats = state.ledger.pool_stats();
    Json(PoolHealth {
        waiting: stats.waiting,
        in_flight: stats.in_flight,
        acquired_total: stats.acquired_total,
        timeouts_total: stats.timeouts_total,
        last_acquire_us: stats.last_acquire_us,
        max_acquire_us: stats.max_acquire_us,
        closing: stats.closing,
    })
}
