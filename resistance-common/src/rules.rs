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

//! Fixed business rules keyed by seated player count.

use serde::{Deserialize, Serialize};

pub const MIN_PLAYERS: usize = 5;
pub const MAX_PLAYERS: usize = 10;
pub const MISSIONS_PER_GAME: u8 = 5;
/// Mission wins a faction needs to take the game.
pub const WINS_TO_END_GAME: usize = 3;

/// Spies per game, indexed by `players - MIN_PLAYERS`.
const SPIES_BY_PLAYERS: [usize; 6] = [2, 2, 3, 3, 3, 4];

/// Team sizes per mission, indexed by `players - MIN_PLAYERS` then `mission - 1`.
const TEAM_SIZES: [[usize; 5]; 6] = [
    [2, 3, 2, 3, 3],
    [2, 3, 4, 3, 4],
    [2, 3, 3, 4, 4],
    [3, 4, 4, 5, 5],
    [3, 4, 4, 5, 5],
    [3, 4, 4, 5, 5],
];

pub fn supports_player_count(players: usize) -> bool {
    (MIN_PLAYERS..=MAX_PLAYERS).contains(&players)
}

/// Number of spies for a game of `players`, or `None` outside 5..=10.
pub fn spy_count(players: usize) -> Option<usize> {
    supports_player_count(players).then(|| SPIES_BY_PLAYERS[players - MIN_PLAYERS])
}

/// Required team size for `mission_num` (1..=5) in a game of `players`.
pub fn team_size(players: usize, mission_num: u8) -> Option<usize> {
    if !supports_player_count(players) || !(1..=MISSIONS_PER_GAME).contains(&mission_num) {
        return None;
    }
    Some(TEAM_SIZES[players - MIN_PLAYERS][usize::from(mission_num - 1)])
}

/// Fail cards needed for the spies to win a mission. The fourth mission of a
/// game with seven or more players needs two.
pub fn fails_required(players: usize, mission_num: u8) -> usize {
    if players >= 7 && mission_num == 4 { 2 } else { 1 }
}

/// Tunable rules that the table-driven game leaves open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleOptions {
    /// Consecutive rejected proposals for one mission after which the mission
    /// goes to the spies. `None` lets proposals be rejected indefinitely.
    #[serde(default)]
    pub max_consecutive_rejections: Option<u8>,
}

impl RuleOptions {
    /// The tabletop rule: five rejections in a row lose the mission.
    pub fn classic() -> Self {
        Self {
            max_consecutive_rejections: Some(5),
        }
    }
}
