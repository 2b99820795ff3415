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

use thiserror::Error;

use crate::{GameStatus, UserId};

/// Reasons the rules engine refuses an operation. The message text is what
/// the originating client sees.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RulesError {
    #[error("No host found for this game.")]
    NoHost,
    #[error("Resistance does not support {0} players")]
    InvalidPlayerCount(usize),
    #[error("Not all players are connected")]
    PlayersDisconnected,
    #[error("Game is {0:?}, expected {1:?}")]
    WrongStatus(GameStatus, GameStatus),
    #[error("Only the host can start the game.")]
    NotHost,
    #[error("User {0} is not a player of this game.")]
    NotSeated(UserId),
    #[error("No mission is in progress.")]
    NoMission,
    #[error("Only the mission leader can propose a team.")]
    NotLeader,
    #[error("A team was already proposed for this mission.")]
    TeamAlreadyProposed,
    #[error("Team must have {expected} players, got {actual}.")]
    TeamSize { expected: usize, actual: usize },
    #[error("Team members must be distinct.")]
    DuplicateTeamMember,
    #[error("The team is not being voted on.")]
    NotVoting,
    #[error("The mission is not underway.")]
    MissionNotUnderway,
    #[error("You are not on this mission.")]
    NotOnTeam,
}
