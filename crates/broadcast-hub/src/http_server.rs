//! HTTP Server
//!
//! Read-only `GET /health` for load balancers and dashboards.

use crate::{error::HubError, hub::BroadcastHub};
use agar_types::HealthStatus;
use axum::{
    extract::State,
    http::{header, Method},
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// HTTP Server
pub struct HttpServer {
    hub: Arc<BroadcastHub>,
}

impl HttpServer {
    pub fn new(hub: Arc<BroadcastHub>) -> Self {
        Self { hub }
    }

    /// Create the Axum router
    pub fn router(self) -> Router {
        // CORS layer to allow browser clients
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

        Router::new()
            .route("/health", get(handle_health))
            .layer(cors)
            .with_state(self.hub)
    }

    /// Run the server
    pub async fn run(self, addr: &str) -> Result<(), HubError> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("HTTP server listening on {}", addr);

        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

async fn handle_health(State(hub): State<Arc<BroadcastHub>>) -> Json<HealthStatus> {
    Json(hub.health())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HubConfig;
    use agar_state::{ActionTracker, BlockCursor, ParticipantStore};
    use chain_relay::{ChainRelay, MockLedger, RelayConfig};

    #[tokio::test]
    async fn test_health_payload() {
        let ledger = MockLedger::new();
        ledger.set_height(321);
        let relay = ChainRelay::new(
            RelayConfig::default(),
            Arc::new(ledger.clone()),
            ParticipantStore::new(),
            ActionTracker::new(),
            BlockCursor::new(),
        );
        relay.connect().await.unwrap();
        let hub = Arc::new(BroadcastHub::new(relay, HubConfig::default()));

        let Json(status) = handle_health(State(hub)).await;
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["connected"], true);
        assert_eq!(value["height"], 321);
        assert_eq!(value["participantCount"], 0);
    }
}
