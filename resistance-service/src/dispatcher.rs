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

//! Serializes every client command through one task. The task owns the
//! persistence gateway, so game state is never shared between threads.

use std::collections::HashSet;

use rand::rngs::StdRng;
use resistance_common::{
    ClientCommand, Game, GameStatus, GameSummary, MissionPhase, Outcome, PlayerSummary, Reply,
    RuleOptions, RulesError, Seat, ServerMessage, User, UserId, rules,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::{error::CommandError, fanout::FanoutHandle, store::PersistenceGateway};

const PAUSED: &str = "Game is paused until all players reconnect.";

pub struct DispatchRequest {
    pub user: User,
    pub command: ClientCommand,
    pub reply: oneshot::Sender<Reply>,
}

#[derive(Clone)]
pub struct DispatcherHandle {
    requests: mpsc::Sender<DispatchRequest>,
}

impl DispatcherHandle {
    pub async fn dispatch(&self, user: User, command: ClientCommand) -> Reply {
        let (reply, answer) = oneshot::channel();
        let request = DispatchRequest {
            user,
            command,
            reply,
        };
        if self.requests.send(request).await.is_err() {
            warn!("dispatcher is not running");
            return Reply::failure("Server is shutting down.");
        }
        answer
            .await
            .unwrap_or_else(|_| Reply::failure("Server is shutting down."))
    }
}

pub struct Dispatcher {
    gateway: PersistenceGateway,
    fanout: FanoutHandle,
    options: RuleOptions,
    rng: StdRng,
}

impl Dispatcher {
    pub fn new(
        gateway: PersistenceGateway,
        fanout: FanoutHandle,
        options: RuleOptions,
        rng: StdRng,
    ) -> Self {
        Self {
            gateway,
            fanout,
            options,
            rng,
        }
    }

    pub fn spawn(self, queue_capacity: usize) -> DispatcherHandle {
        let (requests, receiver) = mpsc::channel(queue_capacity);
        tokio::spawn(self.run(receiver));
        DispatcherHandle { requests }
    }

    async fn run(mut self, mut requests: mpsc::Receiver<DispatchRequest>) {
        while let Some(request) = requests.recv().await {
            let reply = self.handle(&request.user, request.command).await;
            if request.reply.send(reply).is_err() {
                debug!(user_id = %request.user.id, "requester left before the reply");
            }
        }
        info!("dispatcher stopped");
    }

    async fn handle(&mut self, user: &User, command: ClientCommand) -> Reply {
        let name = command.name();
        let game_id = command.game_id().map(str::to_string);
        match self.execute(user, command).await {
            Ok(reply) => reply,
            Err(error) => {
                debug!(user_id = %user.id, command = name, game_id = ?game_id, error = %error, "command rejected");
                Reply::failure(error)
            }
        }
    }

    async fn execute(&mut self, user: &User, command: ClientCommand) -> Result<Reply, CommandError> {
        match command {
            ClientCommand::CreateGame { title, host_id } => {
                self.create_game(user, title, host_id).await
            }
            ClientCommand::GetAllGames => Ok(self.get_all_games().await),
            ClientCommand::IsValidGame { game_id } => {
                let game = self.load(&game_id).await?;
                check_admission(&game, user)?;
                Ok(Reply::GameValid {
                    game_id: game.game_id,
                    title: game.title,
                })
            }
            ClientCommand::PlayerConnect { game_id } => self.player_connect(user, &game_id).await,
            ClientCommand::PlayerDisconnect { game_id } => {
                self.player_disconnect(user, &game_id).await
            }
            ClientCommand::GetPlayers { game_id } => {
                let game = self.load(&game_id).await?;
                Ok(players_message(&game).into())
            }
            ClientCommand::StartGame { game_id } => self.start_game(user, &game_id).await,
            ClientCommand::QueryRole { game_id } => {
                let game = self.load(&game_id).await?;
                let seat = seat_of(&game, user)?;
                let role = game.players[seat.0].role;
                Ok(ServerMessage::QueryRoleResult { role }.into())
            }
            ClientCommand::QueryLeader { game_id } => {
                let game = self.load(&game_id).await?;
                let seat = seat_of(&game, user)?;
                leader_reply(&game, seat)
            }
            ClientCommand::StartMission { game_id, team } => {
                self.start_mission(user, &game_id, team).await
            }
            ClientCommand::ApproveTeam { game_id, vote } => {
                self.approve_team(user, &game_id, vote).await
            }
            ClientCommand::QueryIsOnMission { game_id } => {
                let game = self.load(&game_id).await?;
                let seat = seat_of(&game, user)?;
                on_mission_reply(&game, seat)
            }
            ClientCommand::MissionOutcome { game_id, outcome } => {
                self.mission_outcome(user, &game_id, outcome).await
            }
            ClientCommand::UpdateGameProgress { game_id } => {
                self.update_game_progress(user, &game_id).await
            }
        }
    }

    async fn load(&mut self, game_id: &str) -> Result<Game, CommandError> {
        self.gateway
            .read(game_id)
            .await
            .map_err(CommandError::Persistence)?
            .ok_or_else(|| CommandError::not_found("Game does not exist."))
    }

    /// Persists the game, then broadcasts what happened to it.
    async fn commit(&mut self, game: Game, events: Vec<ServerMessage>) {
        let game_id = game.game_id.clone();
        if let Err(error) = self.gateway.write(game).await {
            warn!(game_id = %game_id, error = %format!("{error:#}"), "failed to persist game, continuing from memory");
        }
        for event in events {
            self.fanout.publish(&game_id, event);
        }
    }

    async fn create_game(
        &mut self,
        user: &User,
        title: String,
        host_id: Option<UserId>,
    ) -> Result<Reply, CommandError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(CommandError::validation("Game title is required."));
        }

        let host = match host_id {
            Some(host_id) if host_id != user.id => User::new(host_id.clone(), host_id),
            _ => user.clone(),
        };
        let game = Game::new(title, host);
        let game_id = game.game_id.clone();
        info!(game_id = %game_id, host = %game.host, "game created");
        self.commit(game, Vec::new()).await;
        Ok(Reply::GameCreated { game_id })
    }

    async fn get_all_games(&mut self) -> Reply {
        let games = self
            .gateway
            .list_lobby()
            .await
            .iter()
            .map(summarize)
            .collect();
        Reply::Games { games }
    }

    async fn player_connect(&mut self, user: &User, game_id: &str) -> Result<Reply, CommandError> {
        let mut game = self.load(game_id).await?;
        check_admission(&game, user)?;

        let was_paused = is_paused(&game);
        game.add_player(user.clone());
        let mut events = vec![players_message(&game)];
        if was_paused && !is_paused(&game) {
            info!(game_id = %game_id, "all players back, resuming game");
            events.push(ServerMessage::GameResume);
        }

        let reply = ServerMessage::PlayerConnectSuccessful {
            game_id: game.game_id.clone(),
            accept_user: true,
            user_id: user.id.clone(),
            is_host: game.is_host(&user.id),
            update_game_progress: game.status == GameStatus::InProgress,
            players: connected_players(&game),
        };
        self.commit(game, events).await;
        Ok(reply.into())
    }

    async fn player_disconnect(
        &mut self,
        user: &User,
        game_id: &str,
    ) -> Result<Reply, CommandError> {
        let mut game = self.load(game_id).await?;
        if game.disconnect(&user.id).is_none() {
            return Ok(Reply::empty());
        }

        let mut events = vec![players_message(&game)];
        if is_paused(&game) {
            info!(game_id = %game_id, user_id = %user.id, "player left, pausing game");
            events.push(ServerMessage::GamePause);
        }
        self.commit(game, events).await;
        Ok(Reply::empty())
    }

    async fn start_game(&mut self, user: &User, game_id: &str) -> Result<Reply, CommandError> {
        let mut game = self.load(game_id).await?;
        if !game.is_host(&user.id) {
            return Err(RulesError::NotHost.into());
        }

        game.start_game(&mut self.rng)?;
        info!(game_id = %game_id, players = game.players.len(), "game started");

        let mut events = vec![ServerMessage::GameStarted {
            game_id: game.game_id.clone(),
        }];
        let preparation = self.open_mission(&mut game)?;
        events.push(missions_message(&game));
        events.push(preparation);
        self.commit(game, events).await;
        Ok(Reply::empty())
    }

    async fn start_mission(
        &mut self,
        user: &User,
        game_id: &str,
        team: Vec<UserId>,
    ) -> Result<Reply, CommandError> {
        let mut game = self.load(game_id).await?;
        ensure_playable(&game)?;
        let seat = seat_of(&game, user)?;

        let mission = game.current_mission().ok_or(RulesError::NoMission)?;
        if mission.leader != seat {
            return Err(RulesError::NotLeader.into());
        }
        if mission.phase() != MissionPhase::AwaitingTeam {
            return Err(RulesError::TeamAlreadyProposed.into());
        }

        let mut seats = Vec::with_capacity(team.len());
        let mut distinct = HashSet::new();
        for member in &team {
            let member_seat = game
                .seat_of(member)
                .ok_or_else(|| RulesError::NotSeated(member.clone()))?;
            if !distinct.insert(member_seat) {
                return Err(RulesError::DuplicateTeamMember.into());
            }
            seats.push(member_seat);
        }

        let expected = game.current_team_size().ok_or(RulesError::NoMission)?;
        if seats.len() != expected {
            return Err(RulesError::TeamSize {
                expected,
                actual: seats.len(),
            }
            .into());
        }

        if let Some(mission) = game.current_mission_mut() {
            mission.create_team(&seats);
        }
        let events = vec![
            ServerMessage::TeamApproval {
                team: team_usernames(&game),
            },
            missions_message(&game),
        ];
        self.commit(game, events).await;
        Ok(Reply::empty())
    }

    async fn approve_team(
        &mut self,
        user: &User,
        game_id: &str,
        vote: bool,
    ) -> Result<Reply, CommandError> {
        let mut game = self.load(game_id).await?;
        ensure_playable(&game)?;
        let seat = seat_of(&game, user)?;

        let mission = game.current_mission_mut().ok_or(RulesError::NoMission)?;
        if mission.phase() != MissionPhase::Voting {
            return Err(RulesError::NotVoting.into());
        }
        mission.add_vote(seat, vote);
        let all_in = mission.is_all_votes_collected();
        let approved = mission.is_team_approved();

        let mut events = vec![ServerMessage::ApproveTeamUpdate {
            username: user.username.clone(),
            vote,
        }];
        if all_in {
            if approved {
                events.push(ServerMessage::MissionStarted {
                    team: team_usernames(&game),
                });
                events.push(missions_message(&game));
            } else {
                debug!(
                    game_id = %game_id,
                    in_a_row = game.consecutive_rejections(),
                    "team rejected"
                );
                if game.apply_rejection_cap(self.options) {
                    info!(game_id = %game_id, "rejection limit reached, mission goes to the spies");
                }
                let next = self.advance(&mut game)?;
                events.extend(next);
            }
        }
        self.commit(game, events).await;
        Ok(Reply::empty())
    }

    async fn mission_outcome(
        &mut self,
        user: &User,
        game_id: &str,
        outcome: bool,
    ) -> Result<Reply, CommandError> {
        let mut game = self.load(game_id).await?;
        ensure_playable(&game)?;
        let seat = seat_of(&game, user)?;

        let mission = game.current_mission_mut().ok_or(RulesError::NoMission)?;
        if mission.phase() != MissionPhase::InProgress {
            return Err(RulesError::MissionNotUnderway.into());
        }
        mission.add_outcome(seat, outcome)?;

        let mut events = Vec::new();
        if let Some(winner) = mission.is_mission_over() {
            mission.end_mission(winner);
            info!(game_id = %game_id, mission = mission.mission_num, ?winner, "mission decided");
            events = self.advance(&mut game)?;
        }
        self.commit(game, events).await;
        Ok(Reply::empty())
    }

    async fn update_game_progress(
        &mut self,
        user: &User,
        game_id: &str,
    ) -> Result<Reply, CommandError> {
        let game = self.load(game_id).await?;
        let seat = seat_of(&game, user)?;

        self.fanout.publish(game_id, missions_message(&game));
        if is_paused(&game) {
            self.fanout.publish(game_id, ServerMessage::GamePause);
        }

        match game.status {
            GameStatus::Lobby => Ok(Reply::empty()),
            GameStatus::Done => Ok(game
                .is_game_over()
                .map(|winner| Reply::from(ServerMessage::GameOver { winner }))
                .unwrap_or_else(Reply::empty)),
            GameStatus::InProgress => {
                let Some(mission) = game.current_mission() else {
                    return Ok(Reply::empty());
                };
                match mission.phase() {
                    MissionPhase::AwaitingTeam => leader_reply(&game, seat),
                    MissionPhase::Voting if mission.vote_of(seat).is_none() => {
                        Ok(ServerMessage::TeamApproval {
                            team: team_usernames(&game),
                        }
                        .into())
                    }
                    MissionPhase::Voting => Ok(ServerMessage::show_text(
                        "You have already voted. Waiting for all votes to come in.",
                    )
                    .into()),
                    MissionPhase::InProgress
                        if matches!(
                            mission.outcome_of(seat),
                            Some(Outcome::Pass | Outcome::Fail)
                        ) =>
                    {
                        Ok(ServerMessage::show_text(
                            "You have already submitted the mission outcome. Waiting for all outcomes to come in.",
                        )
                        .into())
                    }
                    MissionPhase::InProgress => on_mission_reply(&game, seat),
                    MissionPhase::Rejected | MissionPhase::Complete => Ok(Reply::empty()),
                }
            }
        }
    }

    /// After a mission record closes: finish the game or open the next
    /// mission. Returns the events to broadcast.
    fn advance(&mut self, game: &mut Game) -> Result<Vec<ServerMessage>, CommandError> {
        let mut events = Vec::new();
        if let Some(winner) = game.is_game_over() {
            game.end_game();
            info!(game_id = %game.game_id, ?winner, "game over");
            events.push(ServerMessage::GameOver { winner });
        } else {
            events.push(self.open_mission(game)?);
        }
        events.push(missions_message(game));
        Ok(events)
    }

    fn open_mission(&mut self, game: &mut Game) -> Result<ServerMessage, CommandError> {
        let mission = game.new_mission(&mut self.rng)?;
        let (mission_num, leader) = (mission.mission_num, mission.leader);
        debug!(game_id = %game.game_id, mission_num, leader = leader.0, "mission opened");
        Ok(ServerMessage::MissionPreparation {
            mission_num,
            leader: game.username(leader),
        })
    }
}

/// Whether `user` may enter the game.
fn check_admission(game: &Game, user: &User) -> Result<(), CommandError> {
    let member = game.is_player(&user.id);
    match game.status {
        GameStatus::Done => Err(CommandError::validation(
            "Cannot join a game that is already done.",
        )),
        GameStatus::InProgress if !member => Err(CommandError::validation(
            "Cannot join a game that is in progress",
        )),
        GameStatus::Lobby if !member && game.occupied_seats() >= rules::MAX_PLAYERS => {
            Err(CommandError::validation("Game has reached maximum capacity"))
        }
        _ => Ok(()),
    }
}

fn is_paused(game: &Game) -> bool {
    game.status == GameStatus::InProgress && game.validate().is_err()
}

fn ensure_playable(game: &Game) -> Result<(), CommandError> {
    if game.status != GameStatus::InProgress {
        return Err(RulesError::WrongStatus(game.status, GameStatus::InProgress).into());
    }
    if is_paused(game) {
        return Err(CommandError::validation(PAUSED));
    }
    Ok(())
}

fn seat_of(game: &Game, user: &User) -> Result<Seat, CommandError> {
    game.seat_of(&user.id)
        .ok_or_else(|| RulesError::NotSeated(user.id.clone()).into())
}

fn leader_reply(game: &Game, seat: Seat) -> Result<Reply, CommandError> {
    let mission = game.current_mission().ok_or(RulesError::NoMission)?;
    if mission.leader != seat {
        return Ok(ServerMessage::show_text("You are not the leader.").into());
    }
    Ok(ServerMessage::QueryLeaderResult {
        is_leader: true,
        players: game
            .players
            .iter()
            .map(|player| PlayerSummary::from(&player.user))
            .collect(),
        team_size: game.current_team_size().unwrap_or_default(),
    }
    .into())
}

fn on_mission_reply(game: &Game, seat: Seat) -> Result<Reply, CommandError> {
    let on_mission = game.current_mission().is_some_and(|mission| {
        mission.phase() == MissionPhase::InProgress && mission.is_on_team(seat)
    });
    if on_mission {
        Ok(ServerMessage::QueryIsOnMissionResult {
            is_on_mission: true,
        }
        .into())
    } else {
        Ok(ServerMessage::show_text("Waiting for mission to finish...").into())
    }
}

fn connected_players(game: &Game) -> Vec<PlayerSummary> {
    game.connected_users()
        .into_iter()
        .map(PlayerSummary::from)
        .collect()
}

fn players_message(game: &Game) -> ServerMessage {
    ServerMessage::Players {
        game_id: game.game_id.clone(),
        players: connected_players(game),
    }
}

fn missions_message(game: &Game) -> ServerMessage {
    ServerMessage::Missions {
        missions: game.mission_info(),
    }
}

fn team_usernames(game: &Game) -> Vec<String> {
    game.current_mission()
        .map(|mission| {
            mission
                .team
                .iter()
                .map(|member| game.username(member.seat))
                .collect()
        })
        .unwrap_or_default()
}

fn summarize(game: &Game) -> GameSummary {
    GameSummary {
        game_id: game.game_id.clone(),
        title: game.title.clone(),
        host: game
            .player_by_user(&game.host)
            .map(|player| player.user.username.clone())
            .unwrap_or_else(|| game.host.clone()),
        status: game.status,
        connected_players: game.connected_users().len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{GameStore, MemoryGameStore};
    use async_trait::async_trait;
    use rand::SeedableRng;
    use resistance_common::{Faction, Role};
    use std::{sync::Arc, time::Duration};

    use crate::fanout::Subscription;

    struct Harness {
        dispatcher: DispatcherHandle,
        fanout: FanoutHandle,
        store: Arc<MemoryGameStore>,
    }

    impl Harness {
        fn new(options: RuleOptions) -> Self {
            let store = Arc::new(MemoryGameStore::default());
            Self::with_store(options, store.clone(), store)
        }

        fn with_store(
            options: RuleOptions,
            backend: Arc<dyn GameStore>,
            store: Arc<MemoryGameStore>,
        ) -> Self {
            let fanout = FanoutHandle::spawn(Duration::from_millis(50));
            let dispatcher = Dispatcher::new(
                PersistenceGateway::new(backend),
                fanout.clone(),
                options,
                StdRng::seed_from_u64(42),
            )
            .spawn(64);
            Self {
                dispatcher,
                fanout,
                store,
            }
        }

        async fn send(&self, user: &User, command: ClientCommand) -> Reply {
            self.dispatcher.dispatch(user.clone(), command).await
        }

        async fn stored(&self, game_id: &str) -> Game {
            self.store.read_game(game_id).await.unwrap().unwrap()
        }

        /// A lobby hosted by `users[0]` with every user connected.
        async fn lobby(&self, users: &[User]) -> String {
            let reply = self
                .send(
                    &users[0],
                    ClientCommand::CreateGame {
                        title: "friday night".to_string(),
                        host_id: None,
                    },
                )
                .await;
            let Reply::GameCreated { game_id } = reply else {
                panic!("unexpected reply {reply:?}");
            };
            for user in users {
                let reply = self
                    .send(
                        user,
                        ClientCommand::PlayerConnect {
                            game_id: game_id.clone(),
                        },
                    )
                    .await;
                assert!(matches!(
                    reply,
                    Reply::Message(ServerMessage::PlayerConnectSuccessful { .. })
                ));
            }
            game_id
        }

        async fn started(&self, users: &[User]) -> String {
            let game_id = self.lobby(users).await;
            let reply = self
                .send(
                    &users[0],
                    ClientCommand::StartGame {
                        game_id: game_id.clone(),
                    },
                )
                .await;
            assert_eq!(reply, Reply::empty());
            game_id
        }

        async fn leader(&self, game_id: &str, users: &[User]) -> User {
            let game = self.stored(game_id).await;
            let seat = game.current_mission().unwrap().leader;
            let id = &game.players[seat.0].user.id;
            users.iter().find(|user| &user.id == id).unwrap().clone()
        }

        async fn propose(&self, game_id: &str, users: &[User], team: &[&User]) {
            let leader = self.leader(game_id, users).await;
            let reply = self
                .send(
                    &leader,
                    ClientCommand::StartMission {
                        game_id: game_id.to_string(),
                        team: team.iter().map(|user| user.id.clone()).collect(),
                    },
                )
                .await;
            assert_eq!(reply, Reply::empty());
        }

        async fn vote(&self, game_id: &str, user: &User, vote: bool) -> Reply {
            self.send(
                user,
                ClientCommand::ApproveTeam {
                    game_id: game_id.to_string(),
                    vote,
                },
            )
            .await
        }
    }

    fn users(count: usize) -> Vec<User> {
        (0..count)
            .map(|n| User::new(format!("u{n}"), format!("player{n}")))
            .collect()
    }

    async fn drain(subscription: &mut Subscription) -> Vec<ServerMessage> {
        let mut events = Vec::new();
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(200), subscription.next()).await
        {
            events.push(event);
        }
        events
    }

    fn error_of(reply: Reply) -> String {
        match reply {
            Reply::Failure { error } => error,
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn create_game_requires_title() {
        let harness = Harness::new(RuleOptions::default());
        let user = User::new("u0", "ann");
        let reply = harness
            .send(
                &user,
                ClientCommand::CreateGame {
                    title: "  ".to_string(),
                    host_id: None,
                },
            )
            .await;
        assert_eq!(error_of(reply), "Game title is required.");
    }

    #[tokio::test]
    async fn admission_messages() {
        let harness = Harness::new(RuleOptions::default());
        let outsider = User::new("stranger", "stranger");

        let reply = harness
            .send(
                &outsider,
                ClientCommand::IsValidGame {
                    game_id: "nope".to_string(),
                },
            )
            .await;
        assert_eq!(error_of(reply), "Game does not exist.");

        let table = users(10);
        let game_id = harness.lobby(&table).await;
        let reply = harness
            .send(
                &outsider,
                ClientCommand::IsValidGame {
                    game_id: game_id.clone(),
                },
            )
            .await;
        assert_eq!(error_of(reply), "Game has reached maximum capacity");

        // Members can always come back.
        let reply = harness
            .send(
                &table[3],
                ClientCommand::IsValidGame {
                    game_id: game_id.clone(),
                },
            )
            .await;
        assert_eq!(
            reply,
            Reply::GameValid {
                game_id: game_id.clone(),
                title: "friday night".to_string()
            }
        );

        let started = harness.started(&users(5)).await;
        let reply = harness
            .send(&outsider, ClientCommand::PlayerConnect { game_id: started })
            .await;
        assert_eq!(error_of(reply), "Cannot join a game that is in progress");
    }

    #[tokio::test]
    async fn absent_host_keeps_a_seat_under_the_cap() {
        let harness = Harness::new(RuleOptions::default());
        let table = users(10);
        let reply = harness
            .send(
                &table[0],
                ClientCommand::CreateGame {
                    title: "hosted elsewhere".to_string(),
                    host_id: Some("boss".to_string()),
                },
            )
            .await;
        let Reply::GameCreated { game_id } = reply else {
            panic!("unexpected reply {reply:?}");
        };

        for user in &table[..9] {
            let reply = harness
                .send(user, ClientCommand::PlayerConnect { game_id: game_id.clone() })
                .await;
            assert!(matches!(
                reply,
                Reply::Message(ServerMessage::PlayerConnectSuccessful { .. })
            ));
        }
        let reply = harness
            .send(&table[9], ClientCommand::PlayerConnect { game_id: game_id.clone() })
            .await;
        assert_eq!(error_of(reply), "Game has reached maximum capacity");

        let boss = User::new("boss", "boss");
        let reply = harness
            .send(&boss, ClientCommand::PlayerConnect { game_id: game_id.clone() })
            .await;
        assert!(matches!(
            reply,
            Reply::Message(ServerMessage::PlayerConnectSuccessful { is_host: true, .. })
        ));
        let reply = harness
            .send(&boss, ClientCommand::StartGame { game_id: game_id.clone() })
            .await;
        assert_eq!(reply, Reply::empty());
        assert_eq!(harness.stored(&game_id).await.players.len(), rules::MAX_PLAYERS);
    }

    #[tokio::test]
    async fn done_game_cannot_be_joined() {
        let harness = Harness::new(RuleOptions::default());
        let table = users(5);
        let game_id = harness.lobby(&table).await;
        let mut game = harness.stored(&game_id).await;
        game.end_game();
        harness.store.write_game(&game).await.unwrap();

        // Fresh dispatcher so the cache does not hold the lobby copy.
        let store = harness.store.clone();
        let fresh = Harness::with_store(RuleOptions::default(), store.clone(), store);
        let reply = fresh
            .send(&table[0], ClientCommand::IsValidGame { game_id })
            .await;
        assert_eq!(error_of(reply), "Cannot join a game that is already done.");
    }

    #[tokio::test]
    async fn only_host_starts_and_needs_five_players() {
        let harness = Harness::new(RuleOptions::default());
        let table = users(4);
        let game_id = harness.lobby(&table).await;

        let reply = harness
            .send(
                &table[1],
                ClientCommand::StartGame {
                    game_id: game_id.clone(),
                },
            )
            .await;
        assert_eq!(error_of(reply), RulesError::NotHost.to_string());

        let reply = harness
            .send(&table[0], ClientCommand::StartGame { game_id: game_id.clone() })
            .await;
        assert_eq!(error_of(reply), RulesError::InvalidPlayerCount(4).to_string());
        assert_eq!(harness.stored(&game_id).await.status, GameStatus::Lobby);
    }

    #[tokio::test]
    async fn get_all_games_lists_lobbies_only() {
        let harness = Harness::new(RuleOptions::default());
        let lobby_id = harness.lobby(&users(3)).await;
        harness.started(&users(5)).await;

        let reply = harness
            .send(&User::new("x", "x"), ClientCommand::GetAllGames)
            .await;
        let Reply::Games { games } = reply else {
            panic!("unexpected reply {reply:?}");
        };
        assert_eq!(games.len(), 1);
        assert_eq!(games[0].game_id, lobby_id);
        assert_eq!(games[0].host, "player0");
        assert_eq!(games[0].connected_players, 3);
    }

    #[tokio::test]
    async fn six_player_game_runs_first_mission_end_to_end() {
        let harness = Harness::new(RuleOptions::default());
        let table = users(6);
        let game_id = harness.lobby(&table).await;
        let mut observer = harness.fanout.subscribe(&game_id);

        let reply = harness
            .send(&table[0], ClientCommand::StartGame { game_id: game_id.clone() })
            .await;
        assert_eq!(reply, Reply::empty());

        let mut spies = 0;
        for user in &table {
            let reply = harness
                .send(user, ClientCommand::QueryRole { game_id: game_id.clone() })
                .await;
            let Reply::Message(ServerMessage::QueryRoleResult { role }) = reply else {
                panic!("unexpected reply {reply:?}");
            };
            assert_ne!(role, Role::Unassigned);
            if role == Role::Spy {
                spies += 1;
            }
        }
        assert_eq!(spies, 2);

        let leader = harness.leader(&game_id, &table).await;
        let reply = harness
            .send(&leader, ClientCommand::QueryLeader { game_id: game_id.clone() })
            .await;
        assert!(matches!(
            reply,
            Reply::Message(ServerMessage::QueryLeaderResult {
                is_leader: true,
                team_size: 2,
                ..
            })
        ));
        let bystander = table.iter().find(|user| user.id != leader.id).unwrap();
        let reply = harness
            .send(bystander, ClientCommand::QueryLeader { game_id: game_id.clone() })
            .await;
        assert_eq!(
            reply,
            Reply::from(ServerMessage::show_text("You are not the leader."))
        );

        let team = [&table[1], &table[2]];
        harness.propose(&game_id, &table, &team).await;
        for (n, user) in table.iter().enumerate() {
            assert_eq!(harness.vote(&game_id, user, n < 4).await, Reply::empty());
        }

        for member in team {
            let reply = harness
                .send(member, ClientCommand::QueryIsOnMission { game_id: game_id.clone() })
                .await;
            assert_eq!(
                reply,
                Reply::from(ServerMessage::QueryIsOnMissionResult { is_on_mission: true })
            );
        }
        let reply = harness
            .send(&table[5], ClientCommand::QueryIsOnMission { game_id: game_id.clone() })
            .await;
        assert_eq!(
            reply,
            Reply::from(ServerMessage::show_text("Waiting for mission to finish..."))
        );

        for member in team {
            let reply = harness
                .send(
                    member,
                    ClientCommand::MissionOutcome {
                        game_id: game_id.clone(),
                        outcome: true,
                    },
                )
                .await;
            assert_eq!(reply, Reply::empty());
        }

        let game = harness.stored(&game_id).await;
        assert_eq!(game.status, GameStatus::InProgress);
        assert_eq!(game.missions[0].winner, Some(Faction::Resistance));
        assert_eq!(game.current_mission().unwrap().mission_num, 2);

        let events = drain(&mut observer).await;
        assert!(matches!(events[0], ServerMessage::GameStarted { .. }));
        assert!(events.contains(&ServerMessage::MissionStarted {
            team: vec!["player1".to_string(), "player2".to_string()],
        }));
        assert!(events.iter().any(|event| matches!(
            event,
            ServerMessage::MissionPreparation { mission_num: 2, .. }
        )));
        let votes = events
            .iter()
            .filter(|event| matches!(event, ServerMessage::ApproveTeamUpdate { .. }))
            .count();
        assert_eq!(votes, 6);
    }

    #[tokio::test]
    async fn concurrent_votes_are_all_recorded() {
        let harness = Harness::new(RuleOptions::default());
        let table = users(5);
        let game_id = harness.started(&table).await;
        harness.propose(&game_id, &table, &[&table[0], &table[1]]).await;

        let mut tasks = Vec::new();
        for user in table.clone() {
            let dispatcher = harness.dispatcher.clone();
            let game_id = game_id.clone();
            tasks.push(tokio::spawn(async move {
                dispatcher
                    .dispatch(user, ClientCommand::ApproveTeam { game_id, vote: true })
                    .await
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap(), Reply::empty());
        }

        let game = harness.stored(&game_id).await;
        let mission = &game.missions[0];
        assert_eq!(mission.votes.len(), 5);
        assert_eq!(mission.phase(), MissionPhase::InProgress);
    }

    #[tokio::test]
    async fn rejected_team_reopens_same_mission_with_next_leader() {
        let harness = Harness::new(RuleOptions::default());
        let table = users(5);
        let game_id = harness.started(&table).await;
        let first_leader = harness.stored(&game_id).await.missions[0].leader;

        harness.propose(&game_id, &table, &[&table[0], &table[1]]).await;
        for (n, user) in table.iter().enumerate() {
            harness.vote(&game_id, user, n < 2).await;
        }

        let game = harness.stored(&game_id).await;
        assert_eq!(game.missions.len(), 2);
        let retry = game.current_mission().unwrap();
        assert_eq!(retry.mission_num, 1);
        assert_eq!(retry.leader, Seat((first_leader.0 + 1) % 5));
    }

    #[tokio::test]
    async fn rejection_cap_gives_mission_to_spies() {
        let harness = Harness::new(RuleOptions {
            max_consecutive_rejections: Some(2),
        });
        let table = users(5);
        let game_id = harness.started(&table).await;

        for _ in 0..2 {
            harness.propose(&game_id, &table, &[&table[0], &table[1]]).await;
            for user in &table {
                harness.vote(&game_id, user, false).await;
            }
        }

        let game = harness.stored(&game_id).await;
        assert_eq!(game.mission_wins(Faction::Spy), 1);
        assert_eq!(game.current_mission().unwrap().mission_num, 2);
    }

    #[tokio::test]
    async fn voting_twice_and_out_of_phase_commands() {
        let harness = Harness::new(RuleOptions::default());
        let table = users(5);
        let game_id = harness.started(&table).await;

        let reply = harness.vote(&game_id, &table[0], true).await;
        assert_eq!(error_of(reply), RulesError::NotVoting.to_string());

        let leader = harness.leader(&game_id, &table).await;
        let not_leader = table.iter().find(|user| user.id != leader.id).unwrap();
        let reply = harness
            .send(
                not_leader,
                ClientCommand::StartMission {
                    game_id: game_id.clone(),
                    team: vec!["u0".to_string(), "u1".to_string()],
                },
            )
            .await;
        assert_eq!(error_of(reply), RulesError::NotLeader.to_string());

        let reply = harness
            .send(
                &leader,
                ClientCommand::StartMission {
                    game_id: game_id.clone(),
                    team: vec!["u0".to_string(), "u0".to_string()],
                },
            )
            .await;
        assert_eq!(error_of(reply), RulesError::DuplicateTeamMember.to_string());

        let reply = harness
            .send(
                &leader,
                ClientCommand::StartMission {
                    game_id: game_id.clone(),
                    team: vec!["u0".to_string(), "u1".to_string(), "u2".to_string()],
                },
            )
            .await;
        assert_eq!(
            error_of(reply),
            RulesError::TeamSize {
                expected: 2,
                actual: 3
            }
            .to_string()
        );

        harness.propose(&game_id, &table, &[&table[0], &table[1]]).await;
        harness.vote(&game_id, &table[2], true).await;
        let reply = harness
            .send(
                &table[2],
                ClientCommand::UpdateGameProgress {
                    game_id: game_id.clone(),
                },
            )
            .await;
        assert_eq!(
            reply,
            Reply::from(ServerMessage::show_text(
                "You have already voted. Waiting for all votes to come in."
            ))
        );
        let reply = harness
            .send(
                &table[3],
                ClientCommand::UpdateGameProgress {
                    game_id: game_id.clone(),
                },
            )
            .await;
        assert!(matches!(
            reply,
            Reply::Message(ServerMessage::TeamApproval { .. })
        ));

        let reply = harness
            .send(
                &table[0],
                ClientCommand::MissionOutcome {
                    game_id: game_id.clone(),
                    outcome: true,
                },
            )
            .await;
        assert_eq!(error_of(reply), RulesError::MissionNotUnderway.to_string());
    }

    #[tokio::test]
    async fn disconnect_pauses_and_reconnect_resumes() {
        let harness = Harness::new(RuleOptions::default());
        let table = users(5);
        let game_id = harness.started(&table).await;
        let mut observer = harness.fanout.subscribe(&game_id);

        let reply = harness
            .send(&table[3], ClientCommand::PlayerDisconnect { game_id: game_id.clone() })
            .await;
        assert_eq!(reply, Reply::empty());

        let leader = harness.leader(&game_id, &table).await;
        let reply = harness
            .send(
                &leader,
                ClientCommand::StartMission {
                    game_id: game_id.clone(),
                    team: vec!["u0".to_string(), "u1".to_string()],
                },
            )
            .await;
        assert_eq!(error_of(reply), PAUSED);
        assert_eq!(
            harness.stored(&game_id).await.current_mission().unwrap().phase(),
            MissionPhase::AwaitingTeam
        );

        let reply = harness
            .send(&table[3], ClientCommand::PlayerConnect { game_id: game_id.clone() })
            .await;
        assert!(matches!(
            reply,
            Reply::Message(ServerMessage::PlayerConnectSuccessful {
                update_game_progress: true,
                ..
            })
        ));

        let events = drain(&mut observer).await;
        let pause = events
            .iter()
            .position(|event| *event == ServerMessage::GamePause)
            .unwrap();
        let resume = events
            .iter()
            .position(|event| *event == ServerMessage::GameResume)
            .unwrap();
        assert!(pause < resume);

        harness.propose(&game_id, &table, &[&table[0], &table[1]]).await;
    }

    struct WriteFailingStore;

    #[async_trait]
    impl GameStore for WriteFailingStore {
        async fn read_game(&self, _game_id: &str) -> anyhow::Result<Option<Game>> {
            Ok(None)
        }

        async fn write_game(&self, _game: &Game) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }

        async fn list_games(&self, _status: GameStatus) -> anyhow::Result<Vec<Game>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn persistence_failure_does_not_block_play() {
        let harness = Harness::with_store(
            RuleOptions::default(),
            Arc::new(WriteFailingStore),
            Arc::new(MemoryGameStore::default()),
        );
        let table = users(5);
        let game_id = harness.started(&table).await;

        let reply = harness
            .send(&table[2], ClientCommand::QueryRole { game_id: game_id.clone() })
            .await;
        assert!(matches!(
            reply,
            Reply::Message(ServerMessage::QueryRoleResult { .. })
        ));
        let reply = harness
            .send(&table[2], ClientCommand::GetPlayers { game_id })
            .await;
        let Reply::Message(ServerMessage::Players { players, .. }) = reply else {
            panic!("unexpected reply {reply:?}");
        };
        assert_eq!(players.len(), 5);
    }
}
