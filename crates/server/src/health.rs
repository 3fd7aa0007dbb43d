use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use steamguard_dashboard::{LinkHandle, LinkState, LinkStats};
use tracing::{error, info};

#[derive(Clone)]
pub struct HealthState {
    link: LinkHandle,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DashboardCheck {
    pub state: LinkState,
    pub url: String,
    pub stats: LinkStats,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub bot_id: String,
    pub dashboard: DashboardCheck,
    pub checked_at: String,
}

pub fn router(link: LinkHandle) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { link })
}

pub async fn spawn(bind_address: &str, port: u16, link: LinkHandle) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.health.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "health endpoint started"
    );

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router(link)).await {
            error!(
                event_name = "system.health.error",
                correlation_id = "bootstrap",
                error = %error,
                "health endpoint server terminated unexpectedly"
            );
        }
    });

    Ok(())
}

/// Ready only while the dashboard link is open.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let link_state = state.link.state();
    let ready = link_state == LinkState::Open;

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        bot_id: state.link.identity().to_string(),
        dashboard: DashboardCheck {
            state: link_state,
            url: state.link.url().to_owned(),
            stats: state.link.stats(),
        },
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::{
        body::Body,
        extract::State,
        http::{Request, StatusCode},
        Json,
    };
    use futures::{sink, stream, SinkExt};
    use steamguard_core::BotIdentity;
    use steamguard_dashboard::{
        LinkChannel, LinkManager, LinkSettings, LinkState, LinkTransport, TransportError,
    };
    use tower::ServiceExt;

    use crate::health::{health, router, HealthState};

    struct AcceptingTransport;

    #[async_trait]
    impl LinkTransport for AcceptingTransport {
        async fn connect(&self, _url: &str) -> Result<LinkChannel, TransportError> {
            Ok(LinkChannel {
                outbound: Box::pin(sink::drain::<String>().sink_map_err(|_| TransportError::Send("drain".to_owned()))),
                inbound: Box::pin(stream::pending::<Result<String, TransportError>>()),
            })
        }
    }

    fn link_handle() -> steamguard_dashboard::LinkHandle {
        LinkManager::new(
            LinkSettings::default(),
            BotIdentity::from_raw("steamguard-7"),
            Arc::new(AcceptingTransport),
        )
        .handle()
    }

    #[tokio::test]
    async fn health_is_degraded_until_link_opens() {
        let link = link_handle();

        let (status, Json(payload)) = health(State(HealthState { link: link.clone() })).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        assert_eq!(payload.bot_id, "steamguard-7");
        assert_eq!(payload.dashboard.state, LinkState::Disconnected);

        link.connect();
        link.subscribe_state()
            .wait_for(|state| *state == LinkState::Open)
            .await
            .expect("link should open");

        let (status, Json(payload)) = health(State(HealthState { link: link.clone() })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert_eq!(payload.dashboard.stats.sessions_opened, 1);

        link.shutdown();
    }

    #[tokio::test]
    async fn health_route_serves_json() {
        let response = router(link_handle())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let value: serde_json::Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(value["dashboard"]["state"], "disconnected");
        assert_eq!(value["dashboard"]["url"], "ws://localhost:5000/ws");
    }
}
