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

use resistance_common::RulesError;
use thiserror::Error;

/// Why a client command produced no state change.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Rules(#[from] RulesError),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("failed to load game: {0:#}")]
    Persistence(anyhow::Error),
    #[error("malformed command: {0}")]
    Protocol(String),
}

impl CommandError {
    pub fn validation(message: impl Into<String>) -> Self {
        CommandError::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        CommandError::NotFound(message.into())
    }
}

impl From<serde_json::Error> for CommandError {
    fn from(error: serde_json::Error) -> Self {
        CommandError::Protocol(error.to_string())
    }
}
