use crate::app::Vec2;

pub const AGENT_ACTOR_DEF: &str = "errand.agent";
pub const PLAYER_ACTOR_DEF: &str = "errand.player";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoomBounds {
    pub min: Vec2,
    pub max: Vec2,
}

impl RoomBounds {
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    /// Inclusive on every edge.
    pub fn contains(&self, point: Vec2) -> bool {
        point.x >= self.min.x && point.x <= self.max.x && point.y >= self.min.y && point.y <= self.max.y
    }

    pub fn center(&self) -> Vec2 {
        self.min.add(self.max).scale(0.5)
    }

    pub fn clamp(&self, point: Vec2) -> Vec2 {
        Vec2::new(
            point.x.clamp(self.min.x, self.max.x),
            point.y.clamp(self.min.y, self.max.y),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomCategoryDef {
    Fixed,
    Mutant(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct InteractionDef {
    pub def_name: String,
    pub text: String,
    pub position: Vec2,
    pub trigger_radius: f32,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoomDef {
    pub def_name: String,
    pub label: String,
    pub category: RoomCategoryDef,
    pub active: bool,
    pub bounds: RoomBounds,
    pub wrong_destination: Option<Vec2>,
    pub interactions: Vec<InteractionDef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActorDef {
    pub def_name: String,
    pub spawn: Vec2,
    pub collider_radius: f32,
}

/// Compiled, merged layout: rooms are ordered by `defName` so indices are stable across runs.
#[derive(Debug, Default, Clone)]
pub struct LayoutDatabase {
    rooms: Vec<RoomDef>,
    actors: Vec<ActorDef>,
}

impl LayoutDatabase {
    pub fn from_defs(rooms: Vec<RoomDef>, actors: Vec<ActorDef>) -> Self {
        Self { rooms, actors }
    }

    pub fn rooms(&self) -> &[RoomDef] {
        &self.rooms
    }

    #[cfg(test)]
    pub(crate) fn room(&self, def_name: &str) -> Option<&RoomDef> {
        self.rooms.iter().find(|room| room.def_name == def_name)
    }

    pub fn actors(&self) -> &[ActorDef] {
        &self.actors
    }

    pub fn actor(&self, def_name: &str) -> Option<&ActorDef> {
        self.actors.iter().find(|actor| actor.def_name == def_name)
    }

    pub fn interaction_count(&self) -> usize {
        self.rooms.iter().map(|room| room.interactions.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(def_name: &str, min: (f32, f32), max: (f32, f32)) -> RoomDef {
        RoomDef {
            def_name: def_name.to_string(),
            label: def_name.to_string(),
            category: RoomCategoryDef::Fixed,
            active: true,
            bounds: RoomBounds::new(Vec2::new(min.0, min.1), Vec2::new(max.0, max.1)),
            wrong_destination: None,
            interactions: Vec::new(),
        }
    }

    #[test]
    fn bounds_are_inclusive_and_clamp() {
        let bounds = RoomBounds::new(Vec2::ZERO, Vec2::new(4.0, 2.0));
        assert!(bounds.contains(Vec2::new(4.0, 2.0)));
        assert!(!bounds.contains(Vec2::new(4.01, 1.0)));
        assert_eq!(bounds.center(), Vec2::new(2.0, 1.0));
        assert_eq!(bounds.clamp(Vec2::new(-3.0, 9.0)), Vec2::new(0.0, 2.0));
    }

    #[test]
    fn lookups_by_name() {
        let db = LayoutDatabase::from_defs(
            vec![room("a", (0.0, 0.0), (5.0, 5.0)), room("b", (6.0, 0.0), (10.0, 5.0))],
            vec![ActorDef {
                def_name: AGENT_ACTOR_DEF.to_string(),
                spawn: Vec2::new(1.0, 1.0),
                collider_radius: 0.3,
            }],
        );
        assert_eq!(db.room("b").map(|room| room.label.as_str()), Some("b"));
        assert!(db.room("missing").is_none());
        assert!(db.actor(AGENT_ACTOR_DEF).is_some());
        assert!(db.actor(PLAYER_ACTOR_DEF).is_none());
    }
}
