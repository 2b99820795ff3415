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

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Faction, RulesError, Seat, rules};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Pending,
    Pass,
    Fail,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoteValue {
    Approve,
    Reject,
}

impl From<bool> for VoteValue {
    fn from(approve: bool) -> Self {
        if approve {
            VoteValue::Approve
        } else {
            VoteValue::Reject
        }
    }
}

/// Where a mission record stands, derived from its team, votes and winner.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MissionPhase {
    AwaitingTeam,
    Voting,
    Rejected,
    InProgress,
    Complete,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TeamMember {
    pub seat: Seat,
    pub outcome: Outcome,
}

/// One team proposal for a mission number. A rejected proposal is followed
/// by a fresh record with the same `mission_num` and the next leader.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Mission {
    pub mission_num: u8,
    pub leader: Seat,
    /// Seated players when the mission was created; every one of them votes.
    pub seated_players: usize,
    pub team: Vec<TeamMember>,
    pub votes: BTreeMap<Seat, VoteValue>,
    pub winner: Option<Faction>,
}

impl Mission {
    pub fn new(mission_num: u8, leader: Seat, seated_players: usize) -> Self {
        Self {
            mission_num,
            leader,
            seated_players,
            team: Vec::new(),
            votes: BTreeMap::new(),
            winner: None,
        }
    }

    /// Records the proposed team with every outcome pending. Sizing against
    /// [`rules::team_size`] is the caller's job.
    pub fn create_team(&mut self, seats: &[Seat]) {
        self.team = seats
            .iter()
            .map(|&seat| TeamMember {
                seat,
                outcome: Outcome::Pending,
            })
            .collect();
    }

    /// A repeated vote from the same seat replaces the earlier one.
    pub fn add_vote(&mut self, seat: Seat, approve: bool) {
        self.votes.insert(seat, VoteValue::from(approve));
    }

    pub fn vote_of(&self, seat: Seat) -> Option<VoteValue> {
        self.votes.get(&seat).copied()
    }

    pub fn is_all_votes_collected(&self) -> bool {
        self.votes.len() == self.seated_players
    }

    pub fn approvals(&self) -> usize {
        self.votes
            .values()
            .filter(|vote| **vote == VoteValue::Approve)
            .count()
    }

    /// Strict majority of the votes cast; a tie rejects the team.
    pub fn is_team_approved(&self) -> bool {
        2 * self.approvals() > self.votes.len()
    }

    pub fn is_on_team(&self, seat: Seat) -> bool {
        self.team.iter().any(|member| member.seat == seat)
    }

    pub fn outcome_of(&self, seat: Seat) -> Option<Outcome> {
        self.team
            .iter()
            .find(|member| member.seat == seat)
            .map(|member| member.outcome)
    }

    /// Records a team member's pass/fail. A repeated report replaces the
    /// earlier one.
    pub fn add_outcome(&mut self, seat: Seat, success: bool) -> Result<(), RulesError> {
        let member = self
            .team
            .iter_mut()
            .find(|member| member.seat == seat)
            .ok_or(RulesError::NotOnTeam)?;
        member.outcome = if success { Outcome::Pass } else { Outcome::Fail };
        Ok(())
    }

    pub fn fails(&self) -> usize {
        self.team
            .iter()
            .filter(|member| member.outcome == Outcome::Fail)
            .count()
    }

    /// The winning faction once every team member has reported, `None` while
    /// any outcome is still pending.
    pub fn is_mission_over(&self) -> Option<Faction> {
        if self.team.is_empty()
            || self
                .team
                .iter()
                .any(|member| member.outcome == Outcome::Pending)
        {
            return None;
        }

        if self.fails() >= rules::fails_required(self.seated_players, self.mission_num) {
            Some(Faction::Spy)
        } else {
            Some(Faction::Resistance)
        }
    }

    pub fn end_mission(&mut self, winner: Faction) {
        self.winner = Some(winner);
    }

    pub fn is_rejected(&self) -> bool {
        self.phase() == MissionPhase::Rejected
    }

    pub fn phase(&self) -> MissionPhase {
        if self.winner.is_some() {
            MissionPhase::Complete
        } else if self.team.is_empty() {
            MissionPhase::AwaitingTeam
        } else if !self.is_all_votes_collected() {
            MissionPhase::Voting
        } else if !self.is_team_approved() {
            MissionPhase::Rejected
        } else {
            MissionPhase::InProgress
        }
    }
}
