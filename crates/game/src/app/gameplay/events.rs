use std::collections::VecDeque;

use errand_engine::Vec2;

use super::world::{InteractionId, RoomId};

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum GameplayEvent {
    PlayerEnteredRoom {
        room: RoomId,
    },
    AgentEnteredRoom {
        room: RoomId,
    },
    /// Raised on behalf of the interaction's owning room.
    InteractionTouched {
        interaction: InteractionId,
        room: RoomId,
    },
    RoomActivationChanged {
        room: RoomId,
        active: bool,
    },
    DestinationAssigned {
        interaction: InteractionId,
        room: RoomId,
    },
    DestinationRedirected {
        room: RoomId,
        point: Vec2,
    },
    /// Exactly one per accepted destination.
    DestinationOutcome {
        success: bool,
        interaction: Option<InteractionId>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GameplayEventKind {
    PlayerEnteredRoom,
    AgentEnteredRoom,
    InteractionTouched,
    RoomActivationChanged,
    DestinationAssigned,
    DestinationRedirected,
    DestinationOutcome,
}

impl GameplayEventKind {
    pub(crate) const ALL: [GameplayEventKind; 7] = [
        Self::PlayerEnteredRoom,
        Self::AgentEnteredRoom,
        Self::InteractionTouched,
        Self::RoomActivationChanged,
        Self::DestinationAssigned,
        Self::DestinationRedirected,
        Self::DestinationOutcome,
    ];
}

impl GameplayEvent {
    pub(crate) fn kind(self) -> GameplayEventKind {
        match self {
            Self::PlayerEnteredRoom { .. } => GameplayEventKind::PlayerEnteredRoom,
            Self::AgentEnteredRoom { .. } => GameplayEventKind::AgentEnteredRoom,
            Self::InteractionTouched { .. } => GameplayEventKind::InteractionTouched,
            Self::RoomActivationChanged { .. } => GameplayEventKind::RoomActivationChanged,
            Self::DestinationAssigned { .. } => GameplayEventKind::DestinationAssigned,
            Self::DestinationRedirected { .. } => GameplayEventKind::DestinationRedirected,
            Self::DestinationOutcome { .. } => GameplayEventKind::DestinationOutcome,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct GameplayEventCounts {
    pub(crate) total: u32,
    pub(crate) player_entered_room: u32,
    pub(crate) agent_entered_room: u32,
    pub(crate) interaction_touched: u32,
    pub(crate) room_activation_changed: u32,
    pub(crate) destination_assigned: u32,
    pub(crate) destination_redirected: u32,
    pub(crate) destination_outcome: u32,
}

impl GameplayEventCounts {
    fn record(&mut self, kind: GameplayEventKind) {
        self.total = self.total.saturating_add(1);
        let slot = match kind {
            GameplayEventKind::PlayerEnteredRoom => &mut self.player_entered_room,
            GameplayEventKind::AgentEnteredRoom => &mut self.agent_entered_room,
            GameplayEventKind::InteractionTouched => &mut self.interaction_touched,
            GameplayEventKind::RoomActivationChanged => &mut self.room_activation_changed,
            GameplayEventKind::DestinationAssigned => &mut self.destination_assigned,
            GameplayEventKind::DestinationRedirected => &mut self.destination_redirected,
            GameplayEventKind::DestinationOutcome => &mut self.destination_outcome,
        };
        *slot = slot.saturating_add(1);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SubscriberId(usize);

#[derive(Debug)]
struct Subscription {
    kinds: Vec<GameplayEventKind>,
    queue: VecDeque<GameplayEvent>,
}

/// Publish/subscribe registry owned by the loaded scene. Subscribers register for a set of
/// kinds and drain their own queue; a subscriber never observes events emitted before it
/// subscribed.
#[derive(Debug, Default)]
pub(crate) struct GameplayEventBus {
    subscriptions: Vec<Subscription>,
    current_tick_events: Vec<GameplayEvent>,
    last_tick_counts: GameplayEventCounts,
    lifetime_counts: GameplayEventCounts,
}

impl GameplayEventBus {
    pub(crate) fn subscribe(&mut self, kinds: &[GameplayEventKind]) -> SubscriberId {
        let id = SubscriberId(self.subscriptions.len());
        self.subscriptions.push(Subscription {
            kinds: kinds.to_vec(),
            queue: VecDeque::new(),
        });
        id
    }

    pub(crate) fn emit(&mut self, event: GameplayEvent) {
        let kind = event.kind();
        for subscription in &mut self.subscriptions {
            if subscription.kinds.contains(&kind) {
                subscription.queue.push_back(event);
            }
        }
        self.lifetime_counts.record(kind);
        self.current_tick_events.push(event);
    }

    /// Unknown subscribers drain nothing.
    pub(crate) fn drain(&mut self, subscriber: SubscriberId) -> Vec<GameplayEvent> {
        self.subscriptions
            .get_mut(subscriber.0)
            .map(|subscription| subscription.queue.drain(..).collect())
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn iter_emitted_so_far(&self) -> impl Iterator<Item = &GameplayEvent> {
        self.current_tick_events.iter()
    }

    pub(crate) fn finish_tick_rollover(&mut self) {
        let mut counts = GameplayEventCounts::default();
        for event in &self.current_tick_events {
            counts.record(event.kind());
        }
        self.last_tick_counts = counts;
        self.current_tick_events.clear();
    }

    pub(crate) fn last_tick_counts(&self) -> GameplayEventCounts {
        self.last_tick_counts
    }

    pub(crate) fn lifetime_counts(&self) -> GameplayEventCounts {
        self.lifetime_counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(success: bool) -> GameplayEvent {
        GameplayEvent::DestinationOutcome {
            success,
            interaction: None,
        }
    }

    #[test]
    fn subscribers_only_receive_their_kinds() {
        let mut bus = GameplayEventBus::default();
        let outcomes = bus.subscribe(&[GameplayEventKind::DestinationOutcome]);
        let rooms = bus.subscribe(&[
            GameplayEventKind::PlayerEnteredRoom,
            GameplayEventKind::AgentEnteredRoom,
        ]);

        bus.emit(GameplayEvent::PlayerEnteredRoom { room: RoomId(1) });
        bus.emit(outcome(true));
        bus.emit(GameplayEvent::AgentEnteredRoom { room: RoomId(0) });

        assert_eq!(bus.drain(outcomes), vec![outcome(true)]);
        assert_eq!(
            bus.drain(rooms),
            vec![
                GameplayEvent::PlayerEnteredRoom { room: RoomId(1) },
                GameplayEvent::AgentEnteredRoom { room: RoomId(0) },
            ]
        );
        assert!(bus.drain(outcomes).is_empty());
    }

    #[test]
    fn late_subscriber_misses_earlier_events() {
        let mut bus = GameplayEventBus::default();
        bus.emit(outcome(false));
        let late = bus.subscribe(&GameplayEventKind::ALL);
        assert!(bus.drain(late).is_empty());
        assert!(bus.drain(SubscriberId(42)).is_empty());
    }

    #[test]
    fn rollover_counts_previous_tick_and_clears() {
        let mut bus = GameplayEventBus::default();
        bus.emit(outcome(true));
        bus.emit(GameplayEvent::RoomActivationChanged {
            room: RoomId(0),
            active: false,
        });
        assert_eq!(bus.iter_emitted_so_far().count(), 2);

        bus.finish_tick_rollover();
        let counts = bus.last_tick_counts();
        assert_eq!(counts.total, 2);
        assert_eq!(counts.destination_outcome, 1);
        assert_eq!(counts.room_activation_changed, 1);
        assert_eq!(bus.iter_emitted_so_far().count(), 0);

        bus.emit(outcome(false));
        bus.finish_tick_rollover();
        assert_eq!(bus.last_tick_counts().total, 1);
        assert_eq!(bus.lifetime_counts().destination_outcome, 2);
    }
}
