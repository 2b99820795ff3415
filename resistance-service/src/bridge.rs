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

use axum::extract::ws::{Message, WebSocket};
use resistance_common::{ClientCommand, GameId, Reply, ServerMessage, User};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    dispatcher::DispatcherHandle,
    error::CommandError,
    fanout::{FanoutHandle, Subscription},
};

/// Per-client relay state: the game this socket joined and its event feed.
struct Relay {
    user: User,
    dispatcher: DispatcherHandle,
    fanout: FanoutHandle,
    joined: Option<GameId>,
    subscription: Option<Subscription>,
}

impl Relay {
    async fn handle_frame(&mut self, raw: &str) -> Reply {
        let command = match parse_frame(raw) {
            Ok(command) => command,
            Err(error) => {
                warn!(user_id = %self.user.id, error = %error, "ignoring client frame");
                return Reply::empty();
            }
        };

        let leaving = matches!(command, ClientCommand::PlayerDisconnect { .. });
        if leaving && command.game_id() != self.joined.as_deref() {
            debug!(user_id = %self.user.id, game_id = ?command.game_id(), "disconnect for a game this socket has not joined");
            return Reply::empty();
        }
        let reply = self.dispatcher.dispatch(self.user.clone(), command).await;

        if leaving {
            self.detach().await;
            self.joined = None;
        } else if let Reply::Message(ServerMessage::PlayerConnectSuccessful {
            game_id,
            accept_user: true,
            ..
        }) = &reply
        {
            self.join(game_id.clone()).await;
        }
        reply
    }

    /// Follows a newly joined game. A game joined earlier on this socket is
    /// left first, so its connection count stays balanced.
    async fn join(&mut self, game_id: GameId) {
        self.detach().await;
        let subscription = self.fanout.subscribe(&game_id);
        if let Some(previous) = self.joined.replace(game_id) {
            self.dispatcher
                .dispatch(
                    self.user.clone(),
                    ClientCommand::PlayerDisconnect { game_id: previous },
                )
                .await;
        }
        self.subscription = Some(subscription);
    }

    async fn detach(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            debug!(user_id = %self.user.id, game_id = %subscription.game_id(), "leaving game feed");
            self.fanout.unsubscribe(subscription).await;
        }
    }

    async fn next_event(&mut self) -> Option<ServerMessage> {
        match self.subscription.as_mut() {
            Some(subscription) => subscription.next().await,
            None => std::future::pending().await,
        }
    }

    async fn close(mut self) {
        self.detach().await;
        if let Some(game_id) = self.joined.take() {
            self.dispatcher
                .dispatch(self.user, ClientCommand::PlayerDisconnect { game_id })
                .await;
        }
    }
}

fn parse_frame(raw: &str) -> Result<ClientCommand, CommandError> {
    Ok(serde_json::from_str(raw)?)
}

async fn send_json(socket: &mut WebSocket, value: &impl Serialize) -> anyhow::Result<()> {
    let payload = serde_json::to_string(value)?;
    socket.send(Message::Text(payload.into())).await?;
    Ok(())
}

/// Runs one client session until the socket closes. Commands are answered in
/// order; events of the joined game are pushed in between.
pub async fn run_session(
    mut socket: WebSocket,
    dispatcher: DispatcherHandle,
    fanout: FanoutHandle,
    user: User,
) {
    info!(user_id = %user.id, "client connected");
    let mut relay = Relay {
        user,
        dispatcher,
        fanout,
        joined: None,
        subscription: None,
    };

    loop {
        tokio::select! {
            frame = socket.recv() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        let reply = relay.handle_frame(text.as_str()).await;
                        if let Err(error) = send_json(&mut socket, &reply).await {
                            debug!(user_id = %relay.user.id, error = %error, "failed to send reply");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        debug!(user_id = %relay.user.id, error = %error, "socket error");
                        break;
                    }
                }
            }
            event = relay.next_event() => {
                match event {
                    Some(event) => {
                        if let Err(error) = send_json(&mut socket, &event).await {
                            debug!(user_id = %relay.user.id, error = %error, "failed to push event");
                            break;
                        }
                    }
                    None => relay.subscription = None,
                }
            }
        }
    }

    info!(user_id = %relay.user.id, game_id = ?relay.joined, "client disconnected");
    relay.close().await;
}
