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

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    Faction, GameId, GameStatus, Mission, MissionInfo, PublicVote, Role, RuleOptions,
    RulesError, Seat, UserId, VoteValue, rules,
};

/// Identity handed to the game by the session layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub username: String,
}

impl User {
    pub fn new(id: impl Into<UserId>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Player {
    pub user: User,
    pub role: Role,
    /// Live transport sessions for this user in this game.
    pub connections: u32,
}

impl Player {
    fn new(user: User, connections: u32) -> Self {
        Self {
            user,
            role: Role::Unassigned,
            connections,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connections > 0
    }
}

/// The game aggregate. Players keep their seat for the lifetime of the game
/// once it has started; missions are appended in play order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Game {
    pub game_id: GameId,
    pub title: String,
    pub host: UserId,
    pub status: GameStatus,
    pub players: Vec<Player>,
    pub missions: Vec<Mission>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Game {
    /// A new lobby whose only seat is the host, not yet connected.
    pub fn new(title: impl Into<String>, host: User) -> Self {
        Self {
            game_id: Uuid::new_v4().to_string(),
            title: title.into(),
            host: host.id.clone(),
            status: GameStatus::Lobby,
            players: vec![Player::new(host, 0)],
            missions: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn seat_of(&self, user_id: &str) -> Option<Seat> {
        self.players
            .iter()
            .position(|player| player.user.id == user_id)
            .map(Seat)
    }

    pub fn player(&self, seat: Seat) -> Option<&Player> {
        self.players.get(seat.0)
    }

    pub fn player_by_user(&self, user_id: &str) -> Option<&Player> {
        self.players.iter().find(|player| player.user.id == user_id)
    }

    pub fn is_player(&self, user_id: &str) -> bool {
        self.seat_of(user_id).is_some()
    }

    pub fn is_host(&self, user_id: &str) -> bool {
        self.host == user_id
    }

    pub fn username(&self, seat: Seat) -> String {
        self.player(seat)
            .map(|player| player.user.username.clone())
            .unwrap_or_default()
    }

    /// Players with at least one live connection, in seat order.
    pub fn connected_users(&self) -> Vec<&User> {
        self.players
            .iter()
            .filter(|player| player.is_connected())
            .map(|player| &player.user)
            .collect()
    }

    /// Seats held by a connected player or by the host, who keeps a seat
    /// while away.
    pub fn occupied_seats(&self) -> usize {
        self.players
            .iter()
            .filter(|player| player.is_connected() || self.is_host(&player.user.id))
            .count()
    }

    /// Seats the user, or counts one more connection if they already have a
    /// seat.
    pub fn add_player(&mut self, user: User) -> &Player {
        match self.seat_of(&user.id) {
            Some(seat) => {
                let player = &mut self.players[seat.0];
                player.connections += 1;
                player.user.username = user.username;
                &self.players[seat.0]
            }
            None => {
                self.players.push(Player::new(user, 1));
                &self.players[self.players.len() - 1]
            }
        }
    }

    /// Drops one connection. The seat itself is never given up.
    pub fn disconnect(&mut self, user_id: &str) -> Option<&Player> {
        let seat = self.seat_of(user_id)?;
        let player = &mut self.players[seat.0];
        player.connections = player.connections.saturating_sub(1);
        Some(&self.players[seat.0])
    }

    pub fn validate(&self) -> Result<(), RulesError> {
        validate_roster(&self.host, &self.players, self.status)
    }

    /// Drops seats nobody connected to, checks the remaining roster and deals
    /// the secret roles. Nothing changes when validation fails.
    pub fn start_game<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<(), RulesError> {
        if self.status != GameStatus::Lobby {
            return Err(RulesError::WrongStatus(self.status, GameStatus::Lobby));
        }

        let mut seated: Vec<Player> = self
            .players
            .iter()
            .filter(|player| player.is_connected())
            .cloned()
            .collect();
        validate_roster(&self.host, &seated, GameStatus::InProgress)?;

        let spies = rules::spy_count(seated.len())
            .ok_or(RulesError::InvalidPlayerCount(seated.len()))?;
        for player in &mut seated {
            player.role = Role::Resistance;
        }
        for index in rand::seq::index::sample(rng, seated.len(), spies).iter() {
            seated[index].role = Role::Spy;
        }

        self.players = seated;
        self.status = GameStatus::InProgress;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// First leader is drawn at random; after that leadership passes to the
    /// next seat in join order.
    pub fn get_next_leader<R: Rng + ?Sized>(
        &self,
        current_leader: Option<Seat>,
        rng: &mut R,
    ) -> Option<Seat> {
        let seats = self.players.len();
        if seats == 0 {
            return None;
        }
        Some(match current_leader {
            None => Seat(rng.random_range(0..seats)),
            Some(Seat(index)) => Seat((index + 1) % seats),
        })
    }

    pub fn current_mission(&self) -> Option<&Mission> {
        self.missions.last()
    }

    pub fn current_mission_mut(&mut self) -> Option<&mut Mission> {
        self.missions.last_mut()
    }

    /// Opens the next mission record. A mission whose proposal was rejected
    /// keeps its number; a decided mission advances it.
    pub fn new_mission<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<&Mission, RulesError> {
        if self.status != GameStatus::InProgress {
            return Err(RulesError::WrongStatus(self.status, GameStatus::InProgress));
        }

        let (mission_num, previous_leader) = match self.current_mission() {
            None => (1, None),
            Some(previous) if previous.winner.is_none() => {
                (previous.mission_num, Some(previous.leader))
            }
            Some(previous) => (previous.mission_num + 1, Some(previous.leader)),
        };
        let leader = self
            .get_next_leader(previous_leader, rng)
            .ok_or(RulesError::InvalidPlayerCount(0))?;

        self.missions
            .push(Mission::new(mission_num, leader, self.players.len()));
        Ok(&self.missions[self.missions.len() - 1])
    }

    /// Team size the current mission requires.
    pub fn current_team_size(&self) -> Option<usize> {
        let mission = self.current_mission()?;
        rules::team_size(self.players.len(), mission.mission_num)
    }

    /// Rejected proposals recorded for `mission_num`.
    pub fn rejected_proposals(&self, mission_num: u8) -> usize {
        self.missions
            .iter()
            .filter(|mission| mission.mission_num == mission_num && mission.is_rejected())
            .count()
    }

    /// Rejected proposals in a row at the tail of the mission list.
    pub fn consecutive_rejections(&self) -> usize {
        self.missions
            .iter()
            .rev()
            .take_while(|mission| mission.is_rejected())
            .count()
    }

    /// Hands a rejected mission to the spies once the configured number of
    /// rejections for it is reached. Returns whether that happened.
    pub fn apply_rejection_cap(&mut self, options: RuleOptions) -> bool {
        let Some(cap) = options.max_consecutive_rejections else {
            return false;
        };
        let Some(mission_num) = self
            .current_mission()
            .filter(|mission| mission.is_rejected())
            .map(|mission| mission.mission_num)
        else {
            return false;
        };

        if self.rejected_proposals(mission_num) < usize::from(cap) {
            return false;
        }
        if let Some(mission) = self.current_mission_mut() {
            mission.end_mission(Faction::Spy);
        }
        true
    }

    pub fn mission_wins(&self, faction: Faction) -> usize {
        self.missions
            .iter()
            .filter(|mission| mission.winner == Some(faction))
            .count()
    }

    pub fn is_game_over(&self) -> Option<Faction> {
        if self.mission_wins(Faction::Resistance) >= rules::WINS_TO_END_GAME {
            Some(Faction::Resistance)
        } else if self.mission_wins(Faction::Spy) >= rules::WINS_TO_END_GAME {
            Some(Faction::Spy)
        } else {
            None
        }
    }

    pub fn end_game(&mut self) {
        self.status = GameStatus::Done;
        self.finished_at = Some(Utc::now());
    }

    /// Public view of every mission record. Individual outcomes stay secret;
    /// votes are revealed once the whole table has voted.
    pub fn mission_info(&self) -> Vec<MissionInfo> {
        self.missions
            .iter()
            .map(|mission| {
                let votes = if mission.is_all_votes_collected() {
                    mission
                        .votes
                        .iter()
                        .map(|(seat, vote)| PublicVote {
                            username: self.username(*seat),
                            approve: *vote == VoteValue::Approve,
                        })
                        .collect()
                } else {
                    Vec::new()
                };

                MissionInfo {
                    mission_num: mission.mission_num,
                    leader: self.username(mission.leader),
                    team: mission
                        .team
                        .iter()
                        .map(|member| self.username(member.seat))
                        .collect(),
                    votes,
                    fails: mission.is_mission_over().map(|_| mission.fails()),
                    winner: mission.winner,
                    phase: mission.phase(),
                }
            })
            .collect()
    }
}

fn validate_roster(host: &str, players: &[Player], status: GameStatus) -> Result<(), RulesError> {
    if !players.iter().any(|player| player.user.id == host) {
        return Err(RulesError::NoHost);
    }

    if !rules::supports_player_count(players.len()) {
        return Err(RulesError::InvalidPlayerCount(players.len()));
    }

    if status == GameStatus::InProgress && players.iter().any(|player| !player.is_connected()) {
        return Err(RulesError::PlayersDisconnected);
    }

    Ok(())
}
