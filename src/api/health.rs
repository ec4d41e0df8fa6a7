use crate::model::stats::HealthStatus;
use crate::response::ApiResponse;
use tracing::debug;

/// Liveness probe. Always 200 with `{"status":"OK"}` as data; the store is not consulted.
pub async fn health() -> ApiResponse<HealthStatus> {
    debug!("Health check");
    ApiResponse::ok(HealthStatus {
        status: "OK".to_string(),
    })
}
