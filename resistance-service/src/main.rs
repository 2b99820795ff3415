// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

mod bridge;
mod config;
mod dispatcher;
mod error;
mod fanout;
mod store;

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use rand::{SeedableRng, rngs::StdRng};
use resistance_common::{ClientCommand, Reply, User};
use serde::Deserialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::{
    config::ServiceConfig,
    dispatcher::{Dispatcher, DispatcherHandle},
    fanout::FanoutHandle,
    store::{DynamoGameStore, GameStore, MemoryGameStore, PersistenceGateway},
};

#[derive(Clone)]
struct AppState {
    dispatcher: DispatcherHandle,
    fanout: FanoutHandle,
}

impl AppState {
    fn new(config: &ServiceConfig, store: Arc<dyn GameStore>) -> Self {
        let fanout = FanoutHandle::spawn(config.fanout_poll_interval());
        let dispatcher = Dispatcher::new(
            PersistenceGateway::new(store),
            fanout.clone(),
            config.rule_options(),
            StdRng::from_os_rng(),
        )
        .spawn(config.dispatcher_queue_capacity);
        Self { dispatcher, fanout }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "resistance_service=debug,tower_http=info".to_string()),
        )
        .init();

    let config = ServiceConfig::from_env()?;
    let store: Arc<dyn GameStore> = match DynamoGameStore::from_env().await {
        Some(store) => {
            info!("persisting games to DynamoDB");
            Arc::new(store)
        }
        None => {
            info!("no DynamoDB configured, keeping games in memory");
            Arc::new(MemoryGameStore::default())
        }
    };

    let app = build_router(AppState::new(&config, store));
    let bind_addr = parse_bind_addr("RESISTANCE_BIND", "0.0.0.0:8080")?;
    info!(%bind_addr, "resistance-service listening");
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/v1/games",
            get(list_games_handler).post(create_game_handler),
        )
        .route("/v1/socket", get(socket_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn parse_bind_addr(var_name: &str, default: &str) -> anyhow::Result<SocketAddr> {
    let value = std::env::var(var_name)
        .ok()
        .unwrap_or_else(|| default.to_string());
    value.parse().context(format!("invalid {var_name}"))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true, "service": "resistance-service"}))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateGameRequest {
    title: String,
    host_id: String,
    host_username: Option<String>,
}

async fn create_game_handler(
    State(state): State<AppState>,
    Json(request): Json<CreateGameRequest>,
) -> Result<(StatusCode, Json<Reply>), ApiError> {
    if request.host_id.trim().is_empty() {
        return Err(ApiError::bad_request("hostId is required"));
    }
    let username = request
        .host_username
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| request.host_id.clone());
    let host = User::new(request.host_id, username);

    let reply = state
        .dispatcher
        .dispatch(
            host,
            ClientCommand::CreateGame {
                title: request.title,
                host_id: None,
            },
        )
        .await;
    Ok((StatusCode::CREATED, reply_json(reply)?))
}

async fn list_games_handler(State(state): State<AppState>) -> Result<Json<Reply>, ApiError> {
    let viewer = User::new("http", "http");
    let reply = state
        .dispatcher
        .dispatch(viewer, ClientCommand::GetAllGames)
        .await;
    reply_json(reply)
}

fn reply_json(reply: Reply) -> Result<Json<Reply>, ApiError> {
    match reply {
        Reply::Failure { error } => Err(ApiError::bad_request(error)),
        other => Ok(Json(other)),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SocketQuery {
    user_id: Option<String>,
    username: Option<String>,
}

impl SocketQuery {
    fn into_user(self) -> Result<User, ApiError> {
        let user_id = self
            .user_id
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| ApiError::unauthorized("userId is required"))?;
        let username = self
            .username
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| ApiError::unauthorized("username is required"))?;
        Ok(User::new(user_id, username))
    }
}

async fn socket_handler(
    State(state): State<AppState>,
    Query(query): Query<SocketQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let user = query.into_user()?;
    Ok(ws.on_upgrade(move |socket| {
        bridge::run_session(socket, state.dispatcher, state.fanout, user)
    }))
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!(status = %self.status, message = %self.message, "request failed");
        (
            self.status,
            Json(serde_json::json!({"error": self.message})),
        )
            .into_response()
    }
}
