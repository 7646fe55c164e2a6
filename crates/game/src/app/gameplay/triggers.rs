use std::collections::HashSet;

use errand_engine::{EntityTag, RoomBounds, Vec2};

use super::world::{InteractionId, RoomId, RoomRegistry};

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Collider {
    pub(crate) tag: EntityTag,
    pub(crate) position: Vec2,
    pub(crate) radius: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum VolumeKey {
    Room(RoomId),
    Interaction(InteractionId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TriggerSignal {
    RoomEntered {
        collider: EntityTag,
        room: RoomId,
    },
    InteractionTouched {
        collider: EntityTag,
        interaction: InteractionId,
    },
}

/// Edge-triggered overlap tracking: a signal fires only when a collider goes from outside
/// to inside a volume. Room volumes are always live; interaction volumes only while active.
#[derive(Debug, Default)]
pub(crate) struct TriggerSystem {
    inside: HashSet<(EntityTag, VolumeKey)>,
}

impl TriggerSystem {
    #[cfg(test)]
    pub(crate) fn clear(&mut self) {
        self.inside.clear();
    }

    /// Room entries are reported before interaction touches, each in handle order.
    pub(crate) fn update(
        &mut self,
        registry: &RoomRegistry,
        colliders: &[Collider],
    ) -> Vec<TriggerSignal> {
        let mut signals = Vec::new();

        for collider in colliders {
            for room_id in registry.room_ids() {
                let Some(room) = registry.room(room_id) else {
                    continue;
                };
                let overlapping = circle_overlaps_rect(collider.position, collider.radius, room.bounds);
                if self.track(collider.tag, VolumeKey::Room(room_id), overlapping) {
                    signals.push(TriggerSignal::RoomEntered {
                        collider: collider.tag,
                        room: room_id,
                    });
                }
            }
        }

        for collider in colliders {
            for interaction_id in registry.interaction_ids() {
                let Some(interaction) = registry.interaction(interaction_id) else {
                    continue;
                };
                let overlapping = registry.interaction_is_active(interaction_id)
                    && collider.position.distance(interaction.position)
                        <= collider.radius + interaction.trigger_radius;
                if self.track(
                    collider.tag,
                    VolumeKey::Interaction(interaction_id),
                    overlapping,
                ) {
                    signals.push(TriggerSignal::InteractionTouched {
                        collider: collider.tag,
                        interaction: interaction_id,
                    });
                }
            }
        }

        signals
    }

    /// Returns true on the outside-to-inside edge.
    fn track(&mut self, tag: EntityTag, key: VolumeKey, overlapping: bool) -> bool {
        if overlapping {
            self.inside.insert((tag, key))
        } else {
            self.inside.remove(&(tag, key));
            false
        }
    }
}

fn circle_overlaps_rect(center: Vec2, radius: f32, bounds: RoomBounds) -> bool {
    let closest = bounds.clamp(center);
    closest.distance(center) <= radius
}
