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

//! Game-scoped broadcast. One coordinator task owns every subscriber and is
//! driven by a single ordered control channel, so events for a game reach
//! each subscriber in the order they were published.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use resistance_common::{GameId, ServerMessage};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

pub type SessionId = u64;

enum Control {
    Publish {
        game_id: GameId,
        event: ServerMessage,
    },
    Subscribe {
        game_id: GameId,
        session: SessionId,
        events: mpsc::UnboundedSender<ServerMessage>,
    },
    /// Stops deliveries until the initiator answers on `resume`.
    Pause {
        acknowledge: oneshot::Sender<()>,
        resume: oneshot::Receiver<Resume>,
    },
}

enum Resume {
    Detach(SessionId),
}

/// Events for one game from the moment of subscribing. Ends when the
/// coordinator stops.
pub struct Subscription {
    session: SessionId,
    game_id: GameId,
    events: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Subscription {
    pub fn game_id(&self) -> &str {
        &self.game_id
    }

    pub async fn next(&mut self) -> Option<ServerMessage> {
        self.events.recv().await
    }
}

#[derive(Clone)]
pub struct FanoutHandle {
    control: mpsc::UnboundedSender<Control>,
    next_session: Arc<AtomicU64>,
}

impl FanoutHandle {
    /// Starts the coordinator. It wakes at least every `poll_interval` to drop
    /// subscriptions whose receiver went away without unsubscribing.
    pub fn spawn(poll_interval: Duration) -> Self {
        let (control, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run_coordinator(receiver, poll_interval));
        Self {
            control,
            next_session: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn publish(&self, game_id: &str, event: ServerMessage) {
        let control = Control::Publish {
            game_id: game_id.to_string(),
            event,
        };
        if self.control.send(control).is_err() {
            warn!(game_id = %game_id, "fan-out coordinator is gone, dropping event");
        }
    }

    pub fn subscribe(&self, game_id: &str) -> Subscription {
        let session = self.next_session.fetch_add(1, Ordering::Relaxed);
        let (sender, events) = mpsc::unbounded_channel();
        let control = Control::Subscribe {
            game_id: game_id.to_string(),
            session,
            events: sender,
        };
        if self.control.send(control).is_err() {
            warn!(game_id = %game_id, session, "fan-out coordinator is gone, subscription stays empty");
        }
        Subscription {
            session,
            game_id: game_id.to_string(),
            events,
        }
    }

    /// Detaches a subscription between two delivery passes: pause the
    /// coordinator, close our receiver, then let it drop the entry and go on.
    pub async fn unsubscribe(&self, subscription: Subscription) {
        let (acknowledge, acknowledged) = oneshot::channel();
        let (resume, resume_receiver) = oneshot::channel();
        let pause = Control::Pause {
            acknowledge,
            resume: resume_receiver,
        };
        if self.control.send(pause).is_err() || acknowledged.await.is_err() {
            return;
        }

        let Subscription {
            session,
            game_id,
            mut events,
        } = subscription;
        events.close();
        drop(events);

        debug!(game_id = %game_id, session, "detaching subscription");
        let _ = resume.send(Resume::Detach(session));
    }
}

type Subscribers = HashMap<GameId, BTreeMap<SessionId, mpsc::UnboundedSender<ServerMessage>>>;

async fn run_coordinator(mut control: mpsc::UnboundedReceiver<Control>, poll_interval: Duration) {
    let mut subscribers: Subscribers = HashMap::new();

    loop {
        match tokio::time::timeout(poll_interval, control.recv()).await {
            Ok(Some(Control::Publish { game_id, event })) => {
                deliver(&mut subscribers, &game_id, &event);
            }
            Ok(Some(Control::Subscribe {
                game_id,
                session,
                events,
            })) => {
                subscribers
                    .entry(game_id)
                    .or_default()
                    .insert(session, events);
            }
            Ok(Some(Control::Pause {
                acknowledge,
                resume,
            })) => {
                if acknowledge.send(()).is_err() {
                    continue;
                }
                // A dropped resume sender means the initiator gave up.
                if let Ok(Resume::Detach(session)) = resume.await {
                    detach(&mut subscribers, session);
                }
            }
            Ok(None) => break,
            Err(_) => reap_closed(&mut subscribers),
        }
    }
}

fn deliver(subscribers: &mut Subscribers, game_id: &str, event: &ServerMessage) {
    let Some(sessions) = subscribers.get_mut(game_id) else {
        return;
    };
    sessions.retain(|_, sender| sender.send(event.clone()).is_ok());
    if sessions.is_empty() {
        subscribers.remove(game_id);
    }
}

fn detach(subscribers: &mut Subscribers, session: SessionId) {
    for sessions in subscribers.values_mut() {
        sessions.remove(&session);
    }
    subscribers.retain(|_, sessions| !sessions.is_empty());
}

fn reap_closed(subscribers: &mut Subscribers) {
    for (game_id, sessions) in subscribers.iter_mut() {
        let before = sessions.len();
        sessions.retain(|_, sender| !sender.is_closed());
        if sessions.len() < before {
            debug!(game_id = %game_id, reaped = before - sessions.len(), "reaped dropped subscriptions");
        }
    }
    subscribers.retain(|_, sessions| !sessions.is_empty());
}
