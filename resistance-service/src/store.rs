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

use std::{collections::HashMap, sync::Arc};

use anyhow::Context;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::{Client as DynamoClient, types::AttributeValue};
use chrono::Utc;
use resistance_common::{Game, GameId, GameStatus};
use tracing::{debug, warn};

/// Durable home of game aggregates. Each write replaces the whole game, so
/// missions, teams and votes are saved together with it.
#[async_trait]
pub trait GameStore: Send + Sync {
    async fn read_game(&self, game_id: &str) -> anyhow::Result<Option<Game>>;
    async fn write_game(&self, game: &Game) -> anyhow::Result<()>;
    async fn list_games(&self, status: GameStatus) -> anyhow::Result<Vec<Game>>;
}

#[derive(Default)]
pub struct MemoryGameStore {
    games: tokio::sync::Mutex<HashMap<GameId, Game>>,
}

#[async_trait]
impl GameStore for MemoryGameStore {
    async fn read_game(&self, game_id: &str) -> anyhow::Result<Option<Game>> {
        Ok(self.games.lock().await.get(game_id).cloned())
    }

    async fn write_game(&self, game: &Game) -> anyhow::Result<()> {
        self.games
            .lock()
            .await
            .insert(game.game_id.clone(), game.clone());
        Ok(())
    }

    async fn list_games(&self, status: GameStatus) -> anyhow::Result<Vec<Game>> {
        Ok(self
            .games
            .lock()
            .await
            .values()
            .filter(|game| game.status == status)
            .cloned()
            .collect())
    }
}

pub struct DynamoGameStore {
    client: DynamoClient,
    table_name: String,
}

impl DynamoGameStore {
    /// Only configured when a DynamoDB endpoint or AWS region is present.
    pub async fn from_env() -> Option<Self> {
        if std::env::var("DYNAMODB_ENDPOINT").is_err() && std::env::var("AWS_REGION").is_err() {
            return None;
        }

        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Ok(endpoint) = std::env::var("DYNAMODB_ENDPOINT") {
            loader = loader.endpoint_url(endpoint);
        }
        let config = loader.load().await;
        Some(Self {
            client: DynamoClient::new(&config),
            table_name: std::env::var("GAMES_TABLE")
                .ok()
                .unwrap_or_else(|| "games".to_string()),
        })
    }
}

fn status_attribute(status: GameStatus) -> anyhow::Result<AttributeValue> {
    Ok(AttributeValue::S(
        serde_json::to_string(&status)?.trim_matches('"').to_string(),
    ))
}

fn decode_game(item: &HashMap<String, AttributeValue>) -> anyhow::Result<Game> {
    let raw = item
        .get("game")
        .and_then(|value| value.as_s().ok())
        .context("game item has no game attribute")?;
    serde_json::from_str(raw).context("failed to decode stored game")
}

#[async_trait]
impl GameStore for DynamoGameStore {
    async fn read_game(&self, game_id: &str) -> anyhow::Result<Option<Game>> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("game_id", AttributeValue::S(game_id.to_string()))
            .send()
            .await
            .context("failed to get item from games table")?;
        output.item().map(decode_game).transpose()
    }

    async fn write_game(&self, game: &Game) -> anyhow::Result<()> {
        let mut item = HashMap::new();
        item.insert(
            "game_id".to_string(),
            AttributeValue::S(game.game_id.clone()),
        );
        item.insert("game_status".to_string(), status_attribute(game.status)?);
        item.insert(
            "game".to_string(),
            AttributeValue::S(serde_json::to_string(game).context("failed to encode game")?),
        );
        item.insert(
            "updated_at".to_string(),
            AttributeValue::S(Utc::now().to_rfc3339()),
        );

        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(item))
            .send()
            .await
            .context("failed to put item into games table")?;
        Ok(())
    }

    async fn list_games(&self, status: GameStatus) -> anyhow::Result<Vec<Game>> {
        let mut games = Vec::new();
        let mut start_key = None;
        loop {
            let output = self
                .client
                .scan()
                .table_name(&self.table_name)
                .filter_expression("game_status = :status")
                .expression_attribute_values(":status", status_attribute(status)?)
                .set_exclusive_start_key(start_key)
                .send()
                .await
                .context("failed to scan games table")?;

            for item in output.items() {
                match decode_game(item) {
                    Ok(game) => games.push(game),
                    Err(error) => warn!(error = %error, "skipping undecodable game item"),
                }
            }

            start_key = output.last_evaluated_key().cloned();
            if start_key.is_none() {
                return Ok(games);
            }
        }
    }
}

/// Cache-first access to games. Owned by the dispatcher task, so the cache
/// needs no lock; once a game is cached the cached copy wins over the store.
pub struct PersistenceGateway {
    cache: HashMap<GameId, Game>,
    store: Arc<dyn GameStore>,
}

impl PersistenceGateway {
    pub fn new(store: Arc<dyn GameStore>) -> Self {
        Self {
            cache: HashMap::new(),
            store,
        }
    }

    pub async fn read(&mut self, game_id: &str) -> anyhow::Result<Option<Game>> {
        if let Some(game) = self.cache.get(game_id) {
            return Ok(Some(game.clone()));
        }

        let loaded = self.store.read_game(game_id).await?;
        if let Some(game) = loaded.as_ref() {
            debug!(game_id = %game_id, "cached game from store");
            self.cache.insert(game.game_id.clone(), game.clone());
        }
        Ok(loaded)
    }

    /// Caches the game and writes it through. The cached copy is kept even
    /// when the write fails.
    pub async fn write(&mut self, game: Game) -> anyhow::Result<()> {
        let result = self.store.write_game(&game).await;
        self.cache.insert(game.game_id.clone(), game);
        result
    }

    /// Games in the lobby, cached copies taking precedence over stored ones.
    pub async fn list_lobby(&mut self) -> Vec<Game> {
        let mut games: HashMap<GameId, Game> = match self.store.list_games(GameStatus::Lobby).await
        {
            Ok(stored) => stored
                .into_iter()
                .map(|game| (game.game_id.clone(), game))
                .collect(),
            Err(error) => {
                warn!(error = %format!("{error:#}"), "failed to list stored games");
                HashMap::new()
            }
        };
        for (game_id, game) in &self.cache {
            games.insert(game_id.clone(), game.clone());
        }

        let mut lobby: Vec<Game> = games
            .into_values()
            .filter(|game| game.status == GameStatus::Lobby)
            .collect();
        lobby.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        lobby
    }
}
