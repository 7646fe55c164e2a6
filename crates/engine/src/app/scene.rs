use serde::{Deserialize, Serialize};

use crate::content::LayoutDatabase;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneCommand {
    None,
    Quit,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SceneDebugCommand {
    SetRoomActive { room: String, active: bool },
    SetInteractionActive { interaction: String, active: bool },
    MovePlayer { x: f32, y: f32 },
    AssignDestination { interaction: String },
    ResetProgress,
    DumpState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SceneDebugCommandResult {
    Unsupported,
    Success(String),
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityId(pub u64);

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn add(self, other: Self) -> Self {
        Self {
            x: self.x + other.x,
            y: self.y + other.y,
        }
    }

    pub fn sub(self, other: Self) -> Self {
        Self {
            x: self.x - other.x,
            y: self.y - other.y,
        }
    }

    pub fn scale(self, factor: f32) -> Self {
        Self {
            x: self.x * factor,
            y: self.y * factor,
        }
    }

    pub fn length_squared(self) -> f32 {
        self.x * self.x + self.y * self.y
    }

    pub fn length(self) -> f32 {
        self.length_squared().sqrt()
    }

    pub fn distance(self, other: Self) -> f32 {
        other.sub(self).length()
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Transform {
    pub position: Vec2,
    pub rotation_radians: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityTag {
    Agent,
    Player,
}

#[derive(Debug, Clone)]
pub struct Entity {
    pub id: EntityId,
    pub tag: EntityTag,
    pub debug_name: &'static str,
    pub transform: Transform,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DebugInfoSnapshot {
    pub controller_state: String,
    pub current_target: Option<String>,
    pub target_room: Option<String>,
    pub current_room: Option<String>,
    pub player_room: Option<String>,
    pub speed: f32,
    pub success_count: u32,
    pub failure_count: u32,
    pub thinking_seconds: f32,
    pub entity_count: usize,
    pub system_order: String,
}

#[derive(Debug, Default)]
struct EntityIdAllocator {
    next: u64,
}

impl EntityIdAllocator {
    fn allocate(&mut self) -> EntityId {
        let id = EntityId(self.next);
        self.next = self.next.saturating_add(1);
        id
    }
}

#[derive(Debug, Default)]
pub struct SceneWorld {
    allocator: EntityIdAllocator,
    entities: Vec<Entity>,
    pending_spawns: Vec<Entity>,
    pending_despawns: Vec<EntityId>,
    layout: Option<LayoutDatabase>,
}

impl SceneWorld {
    pub fn spawn(&mut self, tag: EntityTag, debug_name: &'static str, position: Vec2) -> EntityId {
        let id = self.allocator.allocate();
        self.pending_spawns.push(Entity {
            id,
            tag,
            debug_name,
            transform: Transform {
                position,
                rotation_radians: 0.0,
            },
        });
        id
    }

    pub fn despawn(&mut self, id: EntityId) -> bool {
        let exists_now = self.entities.iter().any(|entity| entity.id == id);
        let pending_spawn = self.pending_spawns.iter().any(|entity| entity.id == id);
        if !exists_now && !pending_spawn {
            return false;
        }
        self.pending_despawns.push(id);
        true
    }

    pub fn apply_pending(&mut self) {
        if !self.pending_despawns.is_empty() {
            self.pending_despawns.sort_by_key(|id| id.0);
            self.pending_despawns.dedup();
            let pending = &self.pending_despawns;
            self.entities.retain(|entity| {
                pending
                    .binary_search_by_key(&entity.id.0, |id| id.0)
                    .is_err()
            });
            self.pending_spawns.retain(|entity| {
                pending
                    .binary_search_by_key(&entity.id.0, |id| id.0)
                    .is_err()
            });
            self.pending_despawns.clear();
        }

        self.entities.append(&mut self.pending_spawns);
    }

    /// Drops every entity but keeps the layout resource so the scene can be reloaded.
    pub fn clear(&mut self) {
        self.entities.clear();
        self.pending_spawns.clear();
        self.pending_despawns.clear();
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn find_entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.iter().find(|entity| entity.id == id)
    }

    pub fn find_entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.iter_mut().find(|entity| entity.id == id)
    }

    pub fn first_with_tag(&self, tag: EntityTag) -> Option<&Entity> {
        self.entities.iter().find(|entity| entity.tag == tag)
    }

    pub fn set_layout(&mut self, layout: LayoutDatabase) {
        self.layout = Some(layout);
    }

    pub fn layout(&self) -> Option<&LayoutDatabase> {
        self.layout.as_ref()
    }
}

pub trait Scene {
    fn load(&mut self, world: &mut SceneWorld);
    fn update(&mut self, fixed_dt_seconds: f32, world: &mut SceneWorld) -> SceneCommand;
    fn unload(&mut self, world: &mut SceneWorld);
    fn debug_info_snapshot(&self, _world: &SceneWorld) -> Option<DebugInfoSnapshot> {
        None
    }
    fn execute_debug_command(
        &mut self,
        _command: SceneDebugCommand,
        _world: &mut SceneWorld,
    ) -> SceneDebugCommandResult {
        SceneDebugCommandResult::Unsupported
    }
}

/// Owns the single live scene and its world; `load`/`unload` bracket the lifetime of
/// everything the scene builds (registries, event bus, controller).
pub struct SceneHost {
    scene: Box<dyn Scene>,
    world: SceneWorld,
    is_loaded: bool,
}

impl SceneHost {
    pub fn new(scene: Box<dyn Scene>) -> Self {
        Self {
            scene,
            world: SceneWorld::default(),
            is_loaded: false,
        }
    }

    pub fn set_layout(&mut self, layout: LayoutDatabase) {
        self.world.set_layout(layout);
    }

    pub fn load(&mut self) {
        if self.is_loaded {
            return;
        }
        self.scene.load(&mut self.world);
        self.world.apply_pending();
        self.is_loaded = true;
    }

    pub fn update(&mut self, fixed_dt_seconds: f32) -> SceneCommand {
        if !self.is_loaded {
            return SceneCommand::None;
        }
        let command = self.scene.update(fixed_dt_seconds, &mut self.world);
        self.world.apply_pending();
        command
    }

    pub fn hard_reset(&mut self) {
        if self.is_loaded {
            self.scene.unload(&mut self.world);
        }
        self.world.clear();
        self.is_loaded = false;
        self.load();
    }

    pub fn shutdown(&mut self) {
        if self.is_loaded {
            self.scene.unload(&mut self.world);
            self.world.clear();
            self.is_loaded = false;
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.is_loaded
    }

    pub fn world(&self) -> &SceneWorld {
        &self.world
    }

    pub fn debug_info_snapshot(&self) -> Option<DebugInfoSnapshot> {
        self.scene.debug_info_snapshot(&self.world)
    }

    pub fn execute_debug_command(&mut self, command: SceneDebugCommand) -> SceneDebugCommandResult {
        if !self.is_loaded {
            return SceneDebugCommandResult::Error("scene is not loaded".to_string());
        }
        let result = self.scene.execute_debug_command(command, &mut self.world);
        self.world.apply_pending();
        result
    }
}
