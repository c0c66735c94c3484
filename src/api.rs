//! HTTP API endpoints.
//!
//! Read-only views of the shared game state for dashboards and debugging.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

use crate::game::election::elect_leader;
use crate::presence;
use crate::state::AppState;
use crate::types::*;

#[derive(Debug, Clone, Serialize)]
pub struct ImposterStatusView {
    pub status: ImposterStatus,
    /// Players in turn order
    pub players: Vec<Username>,
    pub current_turn: Option<Username>,
    pub leader: Option<Username>,
    pub votes_cast: usize,
    pub discussion_end_time: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WordleStatusView {
    pub active: bool,
    pub guesses: u32,
    pub start_time: Option<String>,
}

/// Response of `GET /api/status`. Secrets (roles, topics, the Wordle word)
/// are never included.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub imposter: ImposterStatusView,
    pub wordle: WordleStatusView,
    pub online: Vec<Username>,
}

/// GET /api/status
pub async fn status(State(state): State<Arc<AppState>>) -> Response {
    // An observer coordinator never writes
    let observer = state.coordinator("api");

    let result = async {
        let imposter = observer.imposter_session().await?;
        let wordle = observer.wordle_session().await?;
        let online =
            presence::online_users(state.store.as_ref(), state.config.game.presence_interval * 2)
                .await?;
        Ok::<_, crate::game::GameError>(StatusResponse {
            imposter: ImposterStatusView {
                status: imposter.status,
                players: imposter.players.iter().map(|p| p.username.clone()).collect(),
                current_turn: imposter.current_player().map(|p| p.username.clone()),
                leader: elect_leader(&imposter.players).map(str::to_string),
                votes_cast: imposter.votes_cast(),
                discussion_end_time: imposter.discussion_end_time.clone(),
            },
            wordle: WordleStatusView {
                active: wordle.active,
                guesses: wordle.guesses,
                start_time: wordle.start_time,
            },
            online,
        })
    }
    .await;

    match result {
        Ok(body) => Json(body).into_response(),
        Err(e) => {
            tracing::error!("Failed to build status: {:?}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "store unavailable").into_response()
        }
    }
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/status", get(status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn get_status(state: Arc<AppState>) -> serde_json::Value {
        let app = routes().with_state(state);
        let response = app
            .oneshot(Request::builder().uri("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_status_when_idle() {
        let json = get_status(Arc::new(AppState::default())).await;
        assert_eq!(json["imposter"]["status"], "idle");
        assert_eq!(json["wordle"]["active"], false);
        assert_eq!(json["online"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_status_hides_secrets() {
        let state = Arc::new(AppState::default());
        let alice = state.coordinator("alice");
        alice.start_wordle_with("CRANE").await.unwrap();
        alice.handle_line(&Channel::Lobby, "/imposter").await.unwrap();
        alice.handle_line(&Channel::Lobby, "/imposter join").await.unwrap();

        let json = get_status(state).await;
        assert_eq!(json["imposter"]["status"], "lobby");
        assert_eq!(json["imposter"]["players"], serde_json::json!(["alice"]));
        assert_eq!(json["imposter"]["leader"], "alice");
        assert_eq!(json["wordle"]["active"], true);
        assert!(!json.to_string().contains("CRANE"));
    }
}
