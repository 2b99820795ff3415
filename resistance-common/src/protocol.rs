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

//! JSON messages exchanged with clients. Every command and server message is
//! an object keyed by a `message` discriminator with camelCase fields.

use serde::{Deserialize, Serialize};

use crate::{Faction, GameId, GameStatus, MissionPhase, Role, User, UserId};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "message", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientCommand {
    CreateGame {
        title: String,
        #[serde(default)]
        host_id: Option<UserId>,
    },
    GetAllGames,
    IsValidGame {
        game_id: GameId,
    },
    PlayerConnect {
        game_id: GameId,
    },
    PlayerDisconnect {
        game_id: GameId,
    },
    GetPlayers {
        game_id: GameId,
    },
    StartGame {
        game_id: GameId,
    },
    QueryRole {
        game_id: GameId,
    },
    QueryLeader {
        game_id: GameId,
    },
    StartMission {
        game_id: GameId,
        team: Vec<UserId>,
    },
    ApproveTeam {
        game_id: GameId,
        vote: bool,
    },
    QueryIsOnMission {
        game_id: GameId,
    },
    MissionOutcome {
        game_id: GameId,
        outcome: bool,
    },
    UpdateGameProgress {
        game_id: GameId,
    },
}

impl ClientCommand {
    /// The game a command targets, if it targets an existing one.
    pub fn game_id(&self) -> Option<&str> {
        match self {
            ClientCommand::CreateGame { .. } | ClientCommand::GetAllGames => None,
            ClientCommand::IsValidGame { game_id }
            | ClientCommand::PlayerConnect { game_id }
            | ClientCommand::PlayerDisconnect { game_id }
            | ClientCommand::GetPlayers { game_id }
            | ClientCommand::StartGame { game_id }
            | ClientCommand::QueryRole { game_id }
            | ClientCommand::QueryLeader { game_id }
            | ClientCommand::StartMission { game_id, .. }
            | ClientCommand::ApproveTeam { game_id, .. }
            | ClientCommand::QueryIsOnMission { game_id }
            | ClientCommand::MissionOutcome { game_id, .. }
            | ClientCommand::UpdateGameProgress { game_id } => Some(game_id),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientCommand::CreateGame { .. } => "createGame",
            ClientCommand::GetAllGames => "getAllGames",
            ClientCommand::IsValidGame { .. } => "isValidGame",
            ClientCommand::PlayerConnect { .. } => "playerConnect",
            ClientCommand::PlayerDisconnect { .. } => "playerDisconnect",
            ClientCommand::GetPlayers { .. } => "getPlayers",
            ClientCommand::StartGame { .. } => "startGame",
            ClientCommand::QueryRole { .. } => "queryRole",
            ClientCommand::QueryLeader { .. } => "queryLeader",
            ClientCommand::StartMission { .. } => "startMission",
            ClientCommand::ApproveTeam { .. } => "approveTeam",
            ClientCommand::QueryIsOnMission { .. } => "queryIsOnMission",
            ClientCommand::MissionOutcome { .. } => "missionOutcome",
            ClientCommand::UpdateGameProgress { .. } => "updateGameProgress",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSummary {
    pub user_id: UserId,
    pub username: String,
}

impl From<&User> for PlayerSummary {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id.clone(),
            username: user.username.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PublicVote {
    pub username: String,
    pub approve: bool,
}

/// What every player may see about a mission record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MissionInfo {
    pub mission_num: u8,
    pub leader: String,
    pub team: Vec<String>,
    pub votes: Vec<PublicVote>,
    pub fails: Option<usize>,
    pub winner: Option<Faction>,
    pub phase: MissionPhase,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GameSummary {
    pub game_id: GameId,
    pub title: String,
    pub host: String,
    pub status: GameStatus,
    pub connected_players: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "message", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    PlayerConnectSuccessful {
        game_id: GameId,
        accept_user: bool,
        user_id: UserId,
        is_host: bool,
        update_game_progress: bool,
        players: Vec<PlayerSummary>,
    },
    Players {
        game_id: GameId,
        players: Vec<PlayerSummary>,
    },
    GameStarted {
        game_id: GameId,
    },
    QueryRoleResult {
        role: Role,
    },
    QueryLeaderResult {
        is_leader: bool,
        players: Vec<PlayerSummary>,
        team_size: usize,
    },
    MissionPreparation {
        mission_num: u8,
        leader: String,
    },
    TeamApproval {
        team: Vec<String>,
    },
    ApproveTeamUpdate {
        username: String,
        vote: bool,
    },
    MissionStarted {
        team: Vec<String>,
    },
    QueryIsOnMissionResult {
        is_on_mission: bool,
    },
    GameOver {
        winner: Faction,
    },
    Missions {
        missions: Vec<MissionInfo>,
    },
    ShowText {
        text: String,
    },
    GamePause,
    GameResume,
}

impl ServerMessage {
    pub fn show_text(text: impl Into<String>) -> Self {
        ServerMessage::ShowText { text: text.into() }
    }
}

/// Direct answer to the client that sent a command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Reply {
    Message(ServerMessage),
    #[serde(rename_all = "camelCase")]
    GameValid {
        game_id: GameId,
        title: String,
    },
    #[serde(rename_all = "camelCase")]
    GameCreated {
        game_id: GameId,
    },
    Games {
        games: Vec<GameSummary>,
    },
    Failure {
        error: String,
    },
    Empty {},
}

impl Reply {
    pub fn failure(error: impl ToString) -> Self {
        Reply::Failure {
            error: error.to_string(),
        }
    }

    pub fn empty() -> Self {
        Reply::Empty {}
    }
}

impl From<ServerMessage> for Reply {
    fn from(message: ServerMessage) -> Self {
        Reply::Message(message)
    }
}
