use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use errand_engine::{
    DebugInfoSnapshot, EntityId, EntityTag, LayoutDatabase, Scene, SceneCommand,
    SceneDebugCommand, SceneDebugCommandResult, SceneWorld, Vec2, AGENT_ACTOR_DEF,
    PLAYER_ACTOR_DEF,
};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use super::controller::{AgentController, ControllerContext};
use super::events::{GameplayEvent, GameplayEventBus, GameplayEventKind, SubscriberId};
use super::nav::{KinematicNavAgent, NavObstacle, NavigationAgent};
use super::picker::{DestinationPicker, PickerStats};
use super::triggers::{Collider, TriggerSignal, TriggerSystem};
use super::tuning::GameplayTuning;
use super::world::RoomRegistry;

pub(crate) const SYSTEM_ORDER_TEXT: &str =
    "RoomSelector>Navigation>Triggers>Controller>Picker>EventLog";
const DEFAULT_COLLIDER_RADIUS: f32 = 0.3;
/// Gap kept between the agent's collider and trigger volumes it is not heading for.
const NAV_CLEARANCE: f32 = 0.15;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub(crate) struct RunSummary {
    pub(crate) seed: u64,
    pub(crate) ticks: u64,
    pub(crate) simulated_seconds: f64,
    pub(crate) trips_assigned: u32,
    pub(crate) successes: u32,
    pub(crate) failures: u32,
    pub(crate) redirects: u32,
    pub(crate) room_activation_changes: u32,
    pub(crate) final_speed: f32,
    pub(crate) final_thinking_seconds: f32,
    pub(crate) completed_by_room: BTreeMap<String, u32>,
    pub(crate) picker: PickerStats,
}

#[derive(Debug, Serialize)]
struct ControllerDump {
    state: &'static str,
    speed_factor: f32,
    nav_speed: f32,
    has_reached_destination: bool,
    is_going_to_wrong_destination: bool,
    has_validated_room: bool,
}

/// `DumpState` payload: the running summary plus the controller's trip flags.
#[derive(Debug, Serialize)]
struct StateDump<'a> {
    #[serde(flatten)]
    summary: &'a RunSummary,
    controller: ControllerDump,
}

#[derive(Debug, Error)]
pub(crate) enum SummaryWriteError {
    #[error("failed to serialize run summary: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write run summary {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub(crate) fn write_run_summary(path: &Path, summary: &RunSummary) -> Result<(), SummaryWriteError> {
    let json = serde_json::to_string_pretty(summary)?;
    fs::write(path, json).map_err(|source| SummaryWriteError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Everything built at load and dropped at unload.
struct LoadedState {
    registry: RoomRegistry,
    events: GameplayEventBus,
    nav: KinematicNavAgent,
    controller: AgentController,
    picker: DestinationPicker,
    triggers: TriggerSystem,
    behavior_rng: SmallRng,
    selector_rng: SmallRng,
    log_subscriber: SubscriberId,
    agent_id: EntityId,
    player_id: EntityId,
    agent_radius: f32,
    player_radius: f32,
    player_position: Vec2,
    shuffle_elapsed_seconds: f32,
    summary: RunSummary,
}

pub(crate) struct ErrandScene {
    tuning: GameplayTuning,
    seed: u64,
    summary_path: Option<PathBuf>,
    state: Option<LoadedState>,
}

impl ErrandScene {
    pub(crate) fn new(tuning: GameplayTuning, seed: u64) -> Self {
        Self {
            tuning,
            seed,
            summary_path: None,
            state: None,
        }
    }

    pub(crate) fn with_summary_path(mut self, path: Option<PathBuf>) -> Self {
        self.summary_path = path;
        self
    }

    fn build_state(&self, layout: &LayoutDatabase, world: &mut SceneWorld) -> Option<LoadedState> {
        let registry = RoomRegistry::from_layout(layout);
        let fallback_spawn = layout.rooms().first().map(|room| room.bounds.center())?;
        let (agent_spawn, agent_radius) = actor_spawn(layout, AGENT_ACTOR_DEF, fallback_spawn);
        let (player_spawn, player_radius) = actor_spawn(layout, PLAYER_ACTOR_DEF, fallback_spawn);

        let agent_tuning = &self.tuning.agent;
        let nav = KinematicNavAgent::new(
            agent_spawn,
            agent_tuning.base_speed,
            agent_tuning.stopping_distance,
            registry.walkable_bounds(),
            agent_tuning.path_latency_ticks,
        )
        .with_obstacles(interaction_obstacles(&registry, agent_radius + NAV_CLEARANCE));
        let mut events = GameplayEventBus::default();
        let log_subscriber = events.subscribe(&GameplayEventKind::ALL);
        let picker = DestinationPicker::new(self.tuning.picker.clone(), self.seed, &mut events);
        let controller = AgentController::new(
            agent_tuning,
            self.tuning.behavior.clone(),
            self.tuning.trip_timeout_seconds,
        );

        let agent_id = world.spawn(EntityTag::Agent, "agent", agent_spawn);
        let player_id = world.spawn(EntityTag::Player, "player", player_spawn);

        Some(LoadedState {
            registry,
            events,
            nav,
            controller,
            picker,
            triggers: TriggerSystem::default(),
            behavior_rng: SmallRng::seed_from_u64(self.seed.wrapping_add(1)),
            selector_rng: SmallRng::seed_from_u64(self.seed.wrapping_add(2)),
            log_subscriber,
            agent_id,
            player_id,
            agent_radius,
            player_radius,
            player_position: player_spawn,
            shuffle_elapsed_seconds: 0.0,
            summary: RunSummary {
                seed: self.seed,
                ..RunSummary::default()
            },
        })
    }
}

/// Every trigger volume, grown by `clearance`, so the mover only touches the interaction
/// it was sent to.
fn interaction_obstacles(registry: &RoomRegistry, clearance: f32) -> Vec<NavObstacle> {
    registry
        .interaction_ids()
        .filter_map(|id| registry.interaction(id))
        .map(|interaction| NavObstacle {
            center: interaction.position,
            radius: interaction.trigger_radius + clearance,
        })
        .collect()
}

fn actor_spawn(layout: &LayoutDatabase, def_name: &str, fallback: Vec2) -> (Vec2, f32) {
    match layout.actor(def_name) {
        Some(actor) => (actor.spawn, actor.collider_radius),
        None => {
            warn!(actor = def_name, "actor_def_missing");
            (fallback, DEFAULT_COLLIDER_RADIUS)
        }
    }
}

impl Scene for ErrandScene {
    fn load(&mut self, world: &mut SceneWorld) {
        let Some(layout) = world.layout().cloned() else {
            error!("layout_missing");
            self.state = None;
            return;
        };
        self.state = self.build_state(&layout, world);
        match &self.state {
            Some(state) => info!(
                rooms = state.registry.room_count(),
                interactions = state.registry.interaction_ids().count(),
                seed = self.seed,
                sys = SYSTEM_ORDER_TEXT,
                "scene_loaded"
            ),
            None => error!("layout_has_no_rooms"),
        }
    }

    fn update(&mut self, fixed_dt_seconds: f32, world: &mut SceneWorld) -> SceneCommand {
        let Some(state) = self.state.as_mut() else {
            error!("scene_not_ready");
            return SceneCommand::Quit;
        };
        state.summary.ticks = state.summary.ticks.saturating_add(1);
        state.summary.simulated_seconds += f64::from(fixed_dt_seconds);

        if let Some(interval) = self.tuning.room_shuffle_interval_seconds {
            run_room_selector(state, fixed_dt_seconds, interval);
        }

        state.nav.tick(fixed_dt_seconds);

        let colliders = [
            Collider {
                tag: EntityTag::Agent,
                position: state.nav.position(),
                radius: state.agent_radius,
            },
            Collider {
                tag: EntityTag::Player,
                position: state.player_position,
                radius: state.player_radius,
            },
        ];
        let signals = state.triggers.update(&state.registry, &colliders);

        let mut ctx = ControllerContext {
            registry: &state.registry,
            agent: &mut state.nav,
            events: &mut state.events,
            rng: &mut state.behavior_rng,
        };
        for signal in signals {
            dispatch_trigger_signal(signal, &mut state.controller, &mut ctx);
        }
        state.controller.tick(&mut ctx, fixed_dt_seconds);
        state.picker.update(fixed_dt_seconds, &mut state.controller, &mut ctx);

        record_events(state);
        sync_entities(state, world);
        state.events.finish_tick_rollover();
        let counts = state.events.last_tick_counts();
        if counts.total > 0 {
            trace!(
                total = counts.total,
                assigned = counts.destination_assigned,
                redirected = counts.destination_redirected,
                outcomes = counts.destination_outcome,
                "tick_events"
            );
        }
        SceneCommand::None
    }

    fn unload(&mut self, world: &mut SceneWorld) {
        let Some(state) = self.state.take() else {
            return;
        };
        let mut summary = state.summary;
        summary.final_speed = state.controller.speed();
        summary.final_thinking_seconds = state.controller.difficulty().thinking_seconds();
        summary.picker = state.picker.stats();
        info!(
            entity_count = world.entity_count(),
            ticks = summary.ticks,
            trips_assigned = summary.trips_assigned,
            successes = summary.successes,
            failures = summary.failures,
            redirects = summary.redirects,
            final_speed = summary.final_speed,
            events_emitted = state.events.lifetime_counts().total,
            "scene_unload"
        );
        if let Some(path) = &self.summary_path {
            match write_run_summary(path, &summary) {
                Ok(()) => info!(path = %path.display(), "run_summary_written"),
                Err(error) => warn!(error = %error, "run_summary_write_failed"),
            }
        }
    }

    fn debug_info_snapshot(&self, world: &SceneWorld) -> Option<DebugInfoSnapshot> {
        let state = self.state.as_ref()?;
        let registry = &state.registry;
        let controller = &state.controller;
        let target = controller.current_target();
        Some(DebugInfoSnapshot {
            controller_state: controller.state().label().to_string(),
            current_target: target
                .map(|(interaction, _)| registry.interaction_name(interaction).to_string()),
            target_room: target.map(|(_, room)| registry.room_name(room).to_string()),
            current_room: controller
                .current_room()
                .map(|room| registry.room_name(room).to_string()),
            player_room: state
                .picker
                .player_room()
                .map(|room| registry.room_name(room).to_string()),
            speed: controller.speed(),
            success_count: controller.difficulty().success_count(),
            failure_count: controller.difficulty().failure_count(),
            thinking_seconds: controller.difficulty().thinking_seconds(),
            entity_count: world.entity_count(),
            system_order: SYSTEM_ORDER_TEXT.to_string(),
        })
    }

    fn execute_debug_command(
        &mut self,
        command: SceneDebugCommand,
        _world: &mut SceneWorld,
    ) -> SceneDebugCommandResult {
        let Some(state) = self.state.as_mut() else {
            return SceneDebugCommandResult::Error("scene has no loaded layout".to_string());
        };
        match command {
            SceneDebugCommand::SetRoomActive { room, active } => {
                let Some(room_id) = state.registry.room_by_name(&room) else {
                    return SceneDebugCommandResult::Error(format!("unknown room '{room}'"));
                };
                state.registry.set_room_active(room_id, active);
                state.events.emit(GameplayEvent::RoomActivationChanged {
                    room: room_id,
                    active,
                });
                info!(room = %room, active, "room_activation_changed");
                SceneDebugCommandResult::Success(format!("room '{room}' active={active}"))
            }
            SceneDebugCommand::SetInteractionActive {
                interaction,
                active,
            } => {
                let Some(interaction_id) = state.registry.interaction_by_name(&interaction) else {
                    return SceneDebugCommandResult::Error(format!(
                        "unknown interaction '{interaction}'"
                    ));
                };
                state.registry.set_interaction_active(interaction_id, active);
                SceneDebugCommandResult::Success(format!(
                    "interaction '{interaction}' active={active}"
                ))
            }
            SceneDebugCommand::MovePlayer { x, y } => {
                let position = Vec2::new(x, y);
                if !position.is_finite() {
                    return SceneDebugCommandResult::Error(
                        "player position must be finite".to_string(),
                    );
                }
                state.player_position = position;
                SceneDebugCommandResult::Success(format!("player moved to ({x:.2}, {y:.2})"))
            }
            SceneDebugCommand::AssignDestination { interaction } => {
                let Some(interaction_id) = state.registry.interaction_by_name(&interaction) else {
                    return SceneDebugCommandResult::Error(format!(
                        "unknown interaction '{interaction}'"
                    ));
                };
                let Some(room_id) = state
                    .registry
                    .interaction(interaction_id)
                    .map(|interaction| interaction.room)
                else {
                    return SceneDebugCommandResult::Error(format!(
                        "interaction '{interaction}' has no room"
                    ));
                };
                let mut ctx = ControllerContext {
                    registry: &state.registry,
                    agent: &mut state.nav,
                    events: &mut state.events,
                    rng: &mut state.behavior_rng,
                };
                match state
                    .controller
                    .set_destination(&mut ctx, interaction_id, room_id)
                {
                    Ok(()) => SceneDebugCommandResult::Success(format!(
                        "agent sent to '{interaction}'"
                    )),
                    Err(rejection) => SceneDebugCommandResult::Error(rejection.to_string()),
                }
            }
            SceneDebugCommand::ResetProgress => {
                state.controller.reset_progress();
                SceneDebugCommandResult::Success("progress reset".to_string())
            }
            SceneDebugCommand::DumpState => {
                let mut summary = state.summary.clone();
                summary.final_speed = state.controller.speed();
                summary.final_thinking_seconds = state.controller.difficulty().thinking_seconds();
                summary.picker = state.picker.stats();
                let controller = &state.controller;
                let dump = StateDump {
                    summary: &summary,
                    controller: ControllerDump {
                        state: controller.state().label(),
                        speed_factor: controller.speed_factor(),
                        nav_speed: state.nav.speed(),
                        has_reached_destination: controller.has_reached_destination(),
                        is_going_to_wrong_destination: controller.is_going_to_wrong_destination(),
                        has_validated_room: controller.has_validated_room(),
                    },
                };
                match serde_json::to_string(&dump) {
                    Ok(json) => SceneDebugCommandResult::Success(json),
                    Err(error) => SceneDebugCommandResult::Error(error.to_string()),
                }
            }
        }
    }
}

fn run_room_selector(state: &mut LoadedState, fixed_dt_seconds: f32, interval_seconds: f32) {
    state.shuffle_elapsed_seconds += fixed_dt_seconds;
    if state.shuffle_elapsed_seconds < interval_seconds {
        return;
    }
    state.shuffle_elapsed_seconds = 0.0;

    let mutant_rooms = state.registry.mutant_rooms();
    if mutant_rooms.is_empty() {
        return;
    }
    let room = mutant_rooms[state.selector_rng.random_range(0..mutant_rooms.len())];
    let active = !state.registry.room_is_active(room);
    state.registry.set_room_active(room, active);
    state
        .events
        .emit(GameplayEvent::RoomActivationChanged { room, active });
    info!(
        room = state.registry.room_name(room),
        active, "room_activation_changed"
    );
}

fn dispatch_trigger_signal(
    signal: TriggerSignal,
    controller: &mut AgentController,
    ctx: &mut ControllerContext<'_>,
) {
    match signal {
        TriggerSignal::RoomEntered {
            collider: EntityTag::Agent,
            room,
        } => {
            ctx.events.emit(GameplayEvent::AgentEnteredRoom { room });
            controller.on_room_entered(ctx, room);
        }
        TriggerSignal::RoomEntered {
            collider: EntityTag::Player,
            room,
        } => {
            ctx.events.emit(GameplayEvent::PlayerEnteredRoom { room });
        }
        TriggerSignal::InteractionTouched {
            collider: EntityTag::Agent,
            interaction,
        } => {
            if let Some(room) = ctx.registry.interaction(interaction).map(|i| i.room) {
                ctx.events
                    .emit(GameplayEvent::InteractionTouched { interaction, room });
            }
            controller.notify_interaction_reached(ctx, interaction);
        }
        // Only the agent's collider validates destinations.
        TriggerSignal::InteractionTouched {
            collider: EntityTag::Player,
            ..
        } => {}
    }
}

fn record_events(state: &mut LoadedState) {
    let summary = &mut state.summary;
    let registry = &state.registry;
    for event in state.events.drain(state.log_subscriber) {
        match event {
            GameplayEvent::DestinationAssigned { .. } => {
                summary.trips_assigned = summary.trips_assigned.saturating_add(1);
            }
            GameplayEvent::DestinationRedirected { .. } => {
                summary.redirects = summary.redirects.saturating_add(1);
            }
            GameplayEvent::DestinationOutcome {
                success,
                interaction,
            } => {
                if success {
                    summary.successes = summary.successes.saturating_add(1);
                    if let Some(room) = interaction
                        .and_then(|id| registry.interaction(id))
                        .map(|interaction| interaction.room)
                    {
                        *summary
                            .completed_by_room
                            .entry(registry.room_name(room).to_string())
                            .or_default() += 1;
                    }
                } else {
                    summary.failures = summary.failures.saturating_add(1);
                }
            }
            GameplayEvent::RoomActivationChanged { .. } => {
                summary.room_activation_changes = summary.room_activation_changes.saturating_add(1);
            }
            GameplayEvent::PlayerEnteredRoom { room } => {
                debug!(room = registry.room_name(room), "player_entered_room");
            }
            GameplayEvent::AgentEnteredRoom { room } => {
                debug!(room = registry.room_name(room), "agent_entered_room");
            }
            GameplayEvent::InteractionTouched { interaction, .. } => {
                debug!(
                    interaction = registry.interaction_name(interaction),
                    "interaction_touched"
                );
            }
        }
    }
}

fn sync_entities(state: &LoadedState, world: &mut SceneWorld) {
    if let Some(agent) = world.find_entity_mut(state.agent_id) {
        agent.transform.position = state.nav.position();
        agent.transform.rotation_radians = state.controller.heading();
    }
    if let Some(player) = world.find_entity_mut(state.player_id) {
        player.transform.position = state.player_position;
    }
}
