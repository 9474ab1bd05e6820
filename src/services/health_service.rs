use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report degraded mode while logging connectivity issues.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.stores().await {
        Some(stores) => {
            if let Err(err) = stores.health_check().await {
                warn!(error = %err, "storage health check failed");
            }
        }
        None => warn!("storage unavailable (degraded mode)"),
    }

    HealthResponse::from_degraded(state.is_degraded())
}
