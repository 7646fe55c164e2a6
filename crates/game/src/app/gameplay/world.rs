use errand_engine::{LayoutDatabase, RoomBounds, RoomCategoryDef, Vec2};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct RoomId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct InteractionId(pub(crate) usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RoomCategory {
    Fixed,
    Mutant(String),
}

impl RoomCategory {
    pub(crate) fn label(&self) -> String {
        match self {
            Self::Fixed => "fixed".to_string(),
            Self::Mutant(variant) => format!("mutant:{variant}"),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Room {
    pub(crate) def_name: String,
    pub(crate) category: RoomCategory,
    pub(crate) bounds: RoomBounds,
    active: bool,
    wrong_destination: Option<Vec2>,
    interactions: Vec<InteractionId>,
}

#[derive(Debug, Clone)]
pub(crate) struct Interaction {
    pub(crate) def_name: String,
    pub(crate) text: String,
    pub(crate) room: RoomId,
    pub(crate) position: Vec2,
    pub(crate) trigger_radius: f32,
    active_self: bool,
}

/// Owns every room and interaction for the lifetime of a loaded scene. Other components
/// hold `RoomId`/`InteractionId` handles and re-query activation through the registry.
#[derive(Debug, Default)]
pub(crate) struct RoomRegistry {
    rooms: Vec<Room>,
    interactions: Vec<Interaction>,
}

impl RoomRegistry {
    pub(crate) fn from_layout(layout: &LayoutDatabase) -> Self {
        let mut registry = Self::default();
        for room_def in layout.rooms() {
            let room_id = RoomId(registry.rooms.len());
            let mut interaction_ids = Vec::with_capacity(room_def.interactions.len());
            for interaction_def in &room_def.interactions {
                let interaction_id = InteractionId(registry.interactions.len());
                registry.interactions.push(Interaction {
                    def_name: interaction_def.def_name.clone(),
                    text: interaction_def.text.clone(),
                    room: room_id,
                    position: interaction_def.position,
                    trigger_radius: interaction_def.trigger_radius,
                    active_self: interaction_def.active,
                });
                interaction_ids.push(interaction_id);
            }
            let category = match &room_def.category {
                RoomCategoryDef::Fixed => RoomCategory::Fixed,
                RoomCategoryDef::Mutant(variant) => RoomCategory::Mutant(variant.clone()),
            };
            debug!(
                room = %room_def.def_name,
                label = %room_def.label,
                category = %category.label(),
                interactions = interaction_ids.len(),
                "room_registered"
            );
            registry.rooms.push(Room {
                def_name: room_def.def_name.clone(),
                category,
                bounds: room_def.bounds,
                active: room_def.active,
                wrong_destination: room_def.wrong_destination,
                interactions: interaction_ids,
            });
        }
        registry
    }

    pub(crate) fn room(&self, id: RoomId) -> Option<&Room> {
        self.rooms.get(id.0)
    }

    pub(crate) fn interaction(&self, id: InteractionId) -> Option<&Interaction> {
        self.interactions.get(id.0)
    }

    pub(crate) fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub(crate) fn room_ids(&self) -> impl Iterator<Item = RoomId> {
        (0..self.rooms.len()).map(RoomId)
    }

    pub(crate) fn interaction_ids(&self) -> impl Iterator<Item = InteractionId> {
        (0..self.interactions.len()).map(InteractionId)
    }

    pub(crate) fn room_by_name(&self, def_name: &str) -> Option<RoomId> {
        self.rooms
            .iter()
            .position(|room| room.def_name == def_name)
            .map(RoomId)
    }

    pub(crate) fn interaction_by_name(&self, def_name: &str) -> Option<InteractionId> {
        self.interactions
            .iter()
            .position(|interaction| interaction.def_name == def_name)
            .map(InteractionId)
    }

    pub(crate) fn room_name(&self, id: RoomId) -> &str {
        self.room(id).map_or("<unknown>", |room| room.def_name.as_str())
    }

    pub(crate) fn interaction_name(&self, id: InteractionId) -> &str {
        self.interaction(id)
            .map_or("<unknown>", |interaction| interaction.def_name.as_str())
    }

    pub(crate) fn room_is_active(&self, id: RoomId) -> bool {
        self.room(id).is_some_and(|room| room.active)
    }

    /// Returns false for an unknown handle.
    pub(crate) fn set_room_active(&mut self, id: RoomId, active: bool) -> bool {
        match self.rooms.get_mut(id.0) {
            Some(room) => {
                room.active = active;
                true
            }
            None => false,
        }
    }

    pub(crate) fn set_interaction_active(&mut self, id: InteractionId, active: bool) -> bool {
        match self.interactions.get_mut(id.0) {
            Some(interaction) => {
                interaction.active_self = active;
                true
            }
            None => false,
        }
    }

    /// Active iff both the interaction itself and its owning room are active.
    pub(crate) fn interaction_is_active(&self, id: InteractionId) -> bool {
        self.interaction(id).is_some_and(|interaction| {
            interaction.active_self && self.room_is_active(interaction.room)
        })
    }

    /// Computed on every call; activation may change between ticks.
    pub(crate) fn available_interactions(
        &self,
        room: RoomId,
    ) -> impl Iterator<Item = InteractionId> + '_ {
        self.room(room)
            .map(|room| room.interactions.as_slice())
            .unwrap_or_default()
            .iter()
            .copied()
            .filter(|id| self.interaction_is_active(*id))
    }

    pub(crate) fn is_valid_destination(&self, room: RoomId, interaction: InteractionId) -> bool {
        self.room_is_active(room)
            && self.interaction_is_active(interaction)
            && self
                .available_interactions(room)
                .any(|candidate| candidate == interaction)
    }

    /// Always `None` for fixed rooms, whatever the layout declared.
    pub(crate) fn wrong_destination_point(&self, room: RoomId) -> Option<Vec2> {
        let room = self.room(room)?;
        match room.category {
            RoomCategory::Fixed => None,
            RoomCategory::Mutant(_) => room.wrong_destination,
        }
    }

    pub(crate) fn walkable_bounds(&self) -> Vec<RoomBounds> {
        self.rooms.iter().map(|room| room.bounds).collect()
    }

    pub(crate) fn mutant_rooms(&self) -> Vec<RoomId> {
        self.room_ids()
            .filter(|id| {
                self.room(*id)
                    .is_some_and(|room| matches!(room.category, RoomCategory::Mutant(_)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use errand_engine::parse_layout_document;

    use super::*;

    const TWO_ROOM_LAYOUT: &str = r#"<Defs>
        <RoomDef>
            <defName>hall</defName>
            <category>Fixed</category>
            <bounds>0,0,4,4</bounds>
            <interactions>
                <InteractionDef><defName>hall.lamp</defName><text>Lamp</text><position>1,1</position></InteractionDef>
                <InteractionDef><defName>hall.rug</defName><text>Rug</text><position>3,3</position><active>false</active></InteractionDef>
            </interactions>
        </RoomDef>
        <RoomDef>
            <defName>lab</defName>
            <category>Mutant:toxic</category>
            <bounds>4,0,8,4</bounds>
            <wrongDestination>6,2</wrongDestination>
            <interactions>
                <InteractionDef><defName>lab.bench</defName><text>Bench</text><position>7,1</position></InteractionDef>
            </interactions>
        </RoomDef>
    </Defs>"#;

    fn registry() -> RoomRegistry {
        let layout = parse_layout_document("test", Path::new("test.xml"), TWO_ROOM_LAYOUT)
            .expect("layout");
        RoomRegistry::from_layout(&layout)
    }

    #[test]
    fn handles_resolve_by_name() {
        let registry = registry();
        let hall = registry.room_by_name("hall").expect("hall");
        let lamp = registry.interaction_by_name("hall.lamp").expect("lamp");
        assert_eq!(registry.interaction(lamp).map(|i| i.room), Some(hall));
        assert_eq!(registry.room_name(hall), "hall");
        assert_eq!(registry.interaction_name(InteractionId(99)), "<unknown>");
        assert_eq!(registry.room_count(), 2);
        assert_eq!(registry.interaction_ids().count(), 3);
    }

    #[test]
    fn available_interactions_follow_live_activation() {
        let mut registry = registry();
        let hall = registry.room_by_name("hall").expect("hall");
        let lamp = registry.interaction_by_name("hall.lamp").expect("lamp");
        let rug = registry.interaction_by_name("hall.rug").expect("rug");

        assert_eq!(registry.available_interactions(hall).collect::<Vec<_>>(), vec![lamp]);

        registry.set_interaction_active(rug, true);
        assert_eq!(
            registry.available_interactions(hall).collect::<Vec<_>>(),
            vec![lamp, rug]
        );

        registry.set_room_active(hall, false);
        assert_eq!(registry.available_interactions(hall).count(), 0);
        assert!(!registry.interaction_is_active(lamp));
    }

    #[test]
    fn validity_requires_room_interaction_and_membership() {
        let mut registry = registry();
        let hall = registry.room_by_name("hall").expect("hall");
        let lab = registry.room_by_name("lab").expect("lab");
        let lamp = registry.interaction_by_name("hall.lamp").expect("lamp");
        let bench = registry.interaction_by_name("lab.bench").expect("bench");

        assert!(registry.is_valid_destination(hall, lamp));
        assert!(!registry.is_valid_destination(hall, bench));

        registry.set_room_active(lab, false);
        assert!(!registry.is_valid_destination(lab, bench));
        registry.set_room_active(lab, true);
        registry.set_interaction_active(bench, false);
        assert!(!registry.is_valid_destination(lab, bench));
    }

    #[test]
    fn wrong_destination_only_for_mutant_rooms() {
        let registry = registry();
        let hall = registry.room_by_name("hall").expect("hall");
        let lab = registry.room_by_name("lab").expect("lab");
        assert_eq!(registry.wrong_destination_point(hall), None);
        assert_eq!(registry.wrong_destination_point(lab), Some(Vec2::new(6.0, 2.0)));
        assert_eq!(registry.wrong_destination_point(RoomId(7)), None);
        assert_eq!(registry.mutant_rooms(), vec![lab]);
    }

    #[test]
    fn unknown_handles_are_inert() {
        let mut registry = registry();
        assert!(!registry.set_room_active(RoomId(5), false));
        assert!(!registry.set_interaction_active(InteractionId(5), false));
        assert!(!registry.room_is_active(RoomId(5)));
        assert_eq!(registry.available_interactions(RoomId(5)).count(), 0);
    }
}
