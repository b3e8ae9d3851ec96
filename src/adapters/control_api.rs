//! HTTP surface for the authoring command protocol.
//!
//! | Method | Path       | Command      |
//! |--------|------------|--------------|
//! | GET    | `/rules`   | `GetRules`   |
//! | PUT    | `/rules`   | `SaveRules`  |
//! | PUT    | `/enabled` | `SetEnabled` |
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, put},
};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::{
    config::models::RuleTable,
    sync::authority::{AuthoringClient, Command, CommandResponse},
};

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct SaveRulesBody {
    #[serde(default)]
    rules: RuleTable,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

#[derive(Debug, Deserialize)]
struct EnabledBody {
    enabled: bool,
}

/// Build the control router around a running authoring service.
pub fn router(client: AuthoringClient) -> Router {
    Router::new()
        .route("/rules", get(get_rules).put(put_rules))
        .route("/enabled", put(put_enabled))
        .layer(TraceLayer::new_for_http())
        .with_state(client)
}

async fn get_rules(State(client): State<AuthoringClient>) -> Response {
    dispatch(&client, Command::GetRules).await
}

async fn put_rules(
    State(client): State<AuthoringClient>,
    Json(body): Json<SaveRulesBody>,
) -> Response {
    dispatch(
        &client,
        Command::SaveRules {
            rules: body.rules,
            enabled: body.enabled,
        },
    )
    .await
}

async fn put_enabled(
    State(client): State<AuthoringClient>,
    Json(body): Json<EnabledBody>,
) -> Response {
    dispatch(
        &client,
        Command::SetEnabled {
            enabled: body.enabled,
        },
    )
    .await
}

async fn dispatch(client: &AuthoringClient, command: Command) -> Response {
    match client.request(command).await {
        Ok(response @ CommandResponse::Failed { .. }) => {
            (StatusCode::INTERNAL_SERVER_ERROR, Json(response)).into_response()
        }
        Ok(response) => Json(response).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "authoring service unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "success": false, "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::Value;

    use super::*;
    use crate::{adapters::stores::MemoryRuleStore, sync::authority::AuthoringService};

    async fn serve() -> String {
        let service = Arc::new(AuthoringService::new(Arc::new(MemoryRuleStore::new())));
        let (client, _loop) = service.spawn();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(client)).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_rules_round_trip_over_http() {
        let base = serve().await;
        let http = reqwest::Client::new();

        let initial: Value = http
            .get(format!("{base}/rules"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(initial, json!({"rules": {}, "enabled": true}));

        let ack: Value = http
            .put(format!("{base}/rules"))
            .json(&json!({"rules": {"/z": {"response": "z"}, "/a": {"status": 404}}}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(ack, json!({"success": true}));

        let response = http
            .put(format!("{base}/enabled"))
            .json(&json!({"enabled": false}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let text = http
            .get(format!("{base}/rules"))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        // insertion order survives the trip
        assert!(text.find("/z").unwrap() < text.find("/a").unwrap());
        let current: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(current["enabled"], json!(false));
    }

    #[tokio::test]
    async fn test_bad_body_is_rejected() {
        let base = serve().await;
        let response = reqwest::Client::new()
            .put(format!("{base}/enabled"))
            .json(&json!({"nope": 1}))
            .send()
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }
}
