use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::controller::{AgentController, ControllerContext};
use super::events::{GameplayEvent, GameplayEventBus, GameplayEventKind, SubscriberId};
use super::tuning::PickerTuning;
use super::world::{InteractionId, RoomId, RoomRegistry};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum RepeatPolicy {
    #[default]
    AllowRepeat,
    /// Never pick the room of the most recently finished trip.
    AvoidLastCompleted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub(crate) struct PickerStats {
    pub(crate) assignments: u32,
    pub(crate) busy_retries: u32,
    pub(crate) exhausted_selections: u32,
    pub(crate) rejected_assignments: u32,
}

/// Feeds random destinations to the controller whenever it is idle.
#[derive(Debug)]
pub(crate) struct DestinationPicker {
    tuning: PickerTuning,
    rng: SmallRng,
    subscriber: SubscriberId,
    player_room: Option<RoomId>,
    assigned_room: Option<RoomId>,
    last_completed_room: Option<RoomId>,
    cooldown_seconds: f32,
    stats: PickerStats,
}

impl DestinationPicker {
    pub(crate) fn new(tuning: PickerTuning, seed: u64, events: &mut GameplayEventBus) -> Self {
        let subscriber = events.subscribe(&[
            GameplayEventKind::PlayerEnteredRoom,
            GameplayEventKind::DestinationOutcome,
        ]);
        Self {
            tuning,
            rng: SmallRng::seed_from_u64(seed),
            subscriber,
            player_room: None,
            assigned_room: None,
            last_completed_room: None,
            cooldown_seconds: 0.0,
            stats: PickerStats::default(),
        }
    }

    pub(crate) fn player_room(&self) -> Option<RoomId> {
        self.player_room
    }

    #[cfg(test)]
    pub(crate) fn last_completed_room(&self) -> Option<RoomId> {
        self.last_completed_room
    }

    pub(crate) fn stats(&self) -> PickerStats {
        self.stats
    }

    pub(crate) fn observe(&mut self, events: &mut GameplayEventBus) {
        for event in events.drain(self.subscriber) {
            match event {
                GameplayEvent::PlayerEnteredRoom { room } => self.player_room = Some(room),
                GameplayEvent::DestinationOutcome { .. } => {
                    if let Some(room) = self.assigned_room.take() {
                        self.last_completed_room = Some(room);
                    }
                    self.cooldown_seconds = 0.0;
                }
                _ => {}
            }
        }
    }

    /// Samples rooms uniformly, skipping the player's room, rooms with nothing available,
    /// and (by policy) the last completed room. Gives up after `max_attempts` draws.
    pub(crate) fn get_random_interaction_and_room(
        &mut self,
        registry: &RoomRegistry,
    ) -> Option<(InteractionId, RoomId)> {
        let room_count = registry.room_count();
        if room_count == 0 {
            return None;
        }

        for _ in 0..self.tuning.max_attempts {
            let Some(room) = registry.room_ids().nth(self.rng.random_range(0..room_count)) else {
                continue;
            };
            if Some(room) == self.player_room {
                continue;
            }
            if self.tuning.repeat_policy == RepeatPolicy::AvoidLastCompleted
                && Some(room) == self.last_completed_room
            {
                continue;
            }
            let available: Vec<InteractionId> = registry.available_interactions(room).collect();
            if available.is_empty() {
                continue;
            }
            let interaction = available[self.rng.random_range(0..available.len())];
            return Some((interaction, room));
        }
        None
    }

    pub(crate) fn update(
        &mut self,
        fixed_dt_seconds: f32,
        controller: &mut AgentController,
        ctx: &mut ControllerContext<'_>,
    ) {
        self.observe(ctx.events);

        self.cooldown_seconds -= fixed_dt_seconds;
        if self.cooldown_seconds > 0.0 {
            return;
        }
        self.cooldown_seconds = 0.0;

        if controller.is_busy() {
            self.stats.busy_retries = self.stats.busy_retries.saturating_add(1);
            self.cooldown_seconds = self.tuning.busy_retry_delay_seconds;
            return;
        }

        let Some((interaction, room)) = self.get_random_interaction_and_room(ctx.registry) else {
            self.stats.exhausted_selections = self.stats.exhausted_selections.saturating_add(1);
            self.cooldown_seconds = self.tuning.retry_delay_seconds;
            debug!(
                attempts = self.tuning.max_attempts,
                retry_in_seconds = self.cooldown_seconds,
                "selection_exhausted"
            );
            return;
        };

        match controller.set_destination(ctx, interaction, room) {
            Ok(()) => {
                self.assigned_room = Some(room);
                self.stats.assignments = self.stats.assignments.saturating_add(1);
            }
            Err(rejection) => {
                self.stats.rejected_assignments = self.stats.rejected_assignments.saturating_add(1);
                self.cooldown_seconds = self.tuning.busy_retry_delay_seconds;
                warn!(reason = %rejection, "assignment_rejected");
            }
        }
    }
}
