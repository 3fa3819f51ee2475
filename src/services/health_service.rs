use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Ping the session store and report whether the backend is serving.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let reachable = match state.require_session_store().await {
        Ok(store) => match store.health_check().await {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "storage health check failed");
                false
            }
        },
        Err(_) => {
            warn!("storage unavailable (degraded mode)");
            false
        }
    };

    if !reachable || state.is_degraded().await {
        HealthResponse::degraded(reachable)
    } else {
        HealthResponse::ok()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{config::AppConfig, dao::session_store::memory::MemorySessionStore, state::AppState};

    #[tokio::test]
    async fn reports_degraded_until_a_store_is_installed() {
        let state = AppState::new(AppConfig::default());
        let status = health_status(&state).await;
        assert_eq!(status.status, "degraded");
        assert!(!status.storage_reachable);

        state
            .set_session_store(Arc::new(MemorySessionStore::new()))
            .await;
        let status = health_status(&state).await;
        assert_eq!(status.status, "ok");
        assert!(status.storage_reachable);
    }
}
