use errand_engine::Vec2;
use rand::RngCore;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::behavior::{BehaviorSequence, OutcomeKind, SequenceStep};
use super::difficulty::DifficultyCurve;
use super::events::{GameplayEvent, GameplayEventBus};
use super::nav::{has_arrived, NavigationAgent};
use super::tuning::{AgentTuning, BehaviorTuning};
use super::world::{InteractionId, RoomId, RoomRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ControllerState {
    Idle,
    EnRouteToInteraction,
    ValidatingAtRoom,
    EnRouteToWrongDestination,
    RunningOutcomeSequence,
}

impl ControllerState {
    pub(crate) fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::EnRouteToInteraction => "en_route_to_interaction",
            Self::ValidatingAtRoom => "validating_at_room",
            Self::EnRouteToWrongDestination => "en_route_to_wrong_destination",
            Self::RunningOutcomeSequence => "running_outcome_sequence",
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DestinationRejected {
    #[error("agent is busy with an unfinished trip")]
    Busy,
    #[error("unknown room handle {0:?}")]
    UnknownRoom(RoomId),
    #[error("unknown interaction handle {0:?}")]
    UnknownInteraction(InteractionId),
}

/// Everything the controller touches besides its own state, borrowed for one call.
pub(crate) struct ControllerContext<'a> {
    pub(crate) registry: &'a RoomRegistry,
    pub(crate) agent: &'a mut dyn NavigationAgent,
    pub(crate) events: &'a mut GameplayEventBus,
    pub(crate) rng: &'a mut dyn RngCore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TripTarget {
    interaction: InteractionId,
    room: RoomId,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct TripFlags {
    has_reached_destination: bool,
    is_going_to_wrong_destination: bool,
    has_validated_room: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingOutcome {
    success: bool,
    interaction: Option<InteractionId>,
}

/// Single-agent trip state machine. Every accepted destination ends in exactly one
/// `DestinationOutcome`, after which the controller is idle again.
#[derive(Debug)]
pub(crate) struct AgentController {
    state: ControllerState,
    target: Option<TripTarget>,
    flags: TripFlags,
    current_room: Option<RoomId>,
    difficulty: DifficultyCurve,
    behavior_tuning: BehaviorTuning,
    trip_timeout_seconds: Option<f32>,
    trip_elapsed_seconds: f32,
    sequence: Option<BehaviorSequence>,
    pending_outcome: Option<PendingOutcome>,
    heading: f32,
    last_position: Option<Vec2>,
}

impl AgentController {
    pub(crate) fn new(
        agent_tuning: &AgentTuning,
        behavior_tuning: BehaviorTuning,
        trip_timeout_seconds: Option<f32>,
    ) -> Self {
        Self {
            state: ControllerState::Idle,
            target: None,
            flags: TripFlags::default(),
            current_room: None,
            difficulty: DifficultyCurve::new(agent_tuning),
            behavior_tuning,
            trip_timeout_seconds,
            trip_elapsed_seconds: 0.0,
            sequence: None,
            pending_outcome: None,
            heading: 0.0,
            last_position: None,
        }
    }

    /// True from an accepted destination until its outcome has been emitted.
    pub(crate) fn is_busy(&self) -> bool {
        self.state != ControllerState::Idle
    }

    pub(crate) fn state(&self) -> ControllerState {
        self.state
    }

    pub(crate) fn current_target(&self) -> Option<(InteractionId, RoomId)> {
        self.target.map(|target| (target.interaction, target.room))
    }

    pub(crate) fn current_room(&self) -> Option<RoomId> {
        self.current_room
    }

    pub(crate) fn difficulty(&self) -> &DifficultyCurve {
        &self.difficulty
    }

    pub(crate) fn speed(&self) -> f32 {
        self.difficulty.speed()
    }

    pub(crate) fn speed_factor(&self) -> f32 {
        self.difficulty.speed_factor()
    }

    pub(crate) fn heading(&self) -> f32 {
        self.heading
    }

    pub(crate) fn has_reached_destination(&self) -> bool {
        self.flags.has_reached_destination
    }

    pub(crate) fn is_going_to_wrong_destination(&self) -> bool {
        self.flags.is_going_to_wrong_destination
    }

    pub(crate) fn has_validated_room(&self) -> bool {
        self.flags.has_validated_room
    }

    /// Rewinds the speed and think-time curve. Does not touch an in-flight trip.
    pub(crate) fn reset_progress(&mut self) {
        self.difficulty.reset();
        info!(speed = self.difficulty.speed(), "progress_reset");
    }

    pub(crate) fn set_destination(
        &mut self,
        ctx: &mut ControllerContext<'_>,
        interaction: InteractionId,
        room: RoomId,
    ) -> Result<(), DestinationRejected> {
        let (position, text) = match self.check_destination(ctx.registry, interaction, room) {
            Ok(target) => target,
            Err(rejection) => {
                warn!(
                    state = self.state.label(),
                    reason = %rejection,
                    "destination_rejected"
                );
                return Err(rejection);
            }
        };

        self.sequence = None;
        self.pending_outcome = None;
        self.flags = TripFlags::default();
        self.trip_elapsed_seconds = 0.0;
        self.target = Some(TripTarget { interaction, room });
        self.state = ControllerState::EnRouteToInteraction;
        self.last_position = Some(ctx.agent.position());

        ctx.agent.set_speed(self.difficulty.speed());
        ctx.events
            .emit(GameplayEvent::DestinationAssigned { interaction, room });
        info!(
            interaction = ctx.registry.interaction_name(interaction),
            room = ctx.registry.room_name(room),
            text,
            speed = self.difficulty.speed(),
            "destination_assigned"
        );

        if !ctx.agent.set_destination(position) {
            warn!(
                interaction = ctx.registry.interaction_name(interaction),
                x = position.x,
                y = position.y,
                "navigation_refused"
            );
            self.flags.has_reached_destination = true;
            self.start_outcome(ctx, false, None);
        }
        Ok(())
    }

    fn check_destination<'r>(
        &self,
        registry: &'r RoomRegistry,
        interaction: InteractionId,
        room: RoomId,
    ) -> Result<(Vec2, &'r str), DestinationRejected> {
        if self.is_busy() {
            return Err(DestinationRejected::Busy);
        }
        if registry.room(room).is_none() {
            return Err(DestinationRejected::UnknownRoom(room));
        }
        registry
            .interaction(interaction)
            .map(|target| (target.position, target.text.as_str()))
            .ok_or(DestinationRejected::UnknownInteraction(interaction))
    }

    /// The agent's collider entered a room volume.
    pub(crate) fn on_room_entered(&mut self, ctx: &mut ControllerContext<'_>, room: RoomId) {
        self.current_room = Some(room);
        if self.state == ControllerState::Idle
            || self.sequence.is_some()
            || self.flags.has_reached_destination
            || self.flags.is_going_to_wrong_destination
        {
            return;
        }
        let Some(target) = self.target else {
            return;
        };
        if target.room != room {
            return;
        }

        if ctx.registry.is_valid_destination(room, target.interaction) {
            self.flags.has_validated_room = true;
            self.state = ControllerState::ValidatingAtRoom;
            debug!(room = ctx.registry.room_name(room), "room_validated");
        } else {
            self.redirect(ctx, room);
        }
    }

    /// The agent's collider touched an interaction volume.
    pub(crate) fn notify_interaction_reached(
        &mut self,
        ctx: &mut ControllerContext<'_>,
        interaction: InteractionId,
    ) {
        if self.state == ControllerState::Idle
            || self.sequence.is_some()
            || self.flags.has_reached_destination
            || self.flags.is_going_to_wrong_destination
        {
            debug!(
                interaction = ctx.registry.interaction_name(interaction),
                state = self.state.label(),
                "touch_ignored"
            );
            return;
        }
        let Some(target) = self.target else {
            return;
        };

        self.flags.has_reached_destination = true;
        let success = interaction == target.interaction
            && ctx
                .registry
                .is_valid_destination(target.room, target.interaction);
        self.start_outcome(ctx, success, Some(interaction));
    }

    pub(crate) fn tick(&mut self, ctx: &mut ControllerContext<'_>, fixed_dt_seconds: f32) {
        if let Some(sequence) = self.sequence.as_mut() {
            let step = sequence.step(fixed_dt_seconds, ctx.agent, ctx.rng);
            self.heading = sequence.heading();
            if step == SequenceStep::Finished {
                self.finish_trip(ctx);
            }
            return;
        }
        if self.state == ControllerState::Idle {
            return;
        }

        self.track_travel_heading(ctx.agent.position());
        self.trip_elapsed_seconds += fixed_dt_seconds;
        if let Some(timeout) = self.trip_timeout_seconds {
            if self.trip_elapsed_seconds >= timeout {
                warn!(
                    elapsed_seconds = self.trip_elapsed_seconds,
                    state = self.state.label(),
                    "trip_timeout"
                );
                self.flags.has_reached_destination = true;
                self.start_outcome(ctx, false, None);
                return;
            }
        }

        if self.flags.has_reached_destination || !has_arrived(&*ctx.agent) {
            return;
        }
        self.flags.has_reached_destination = true;

        if self.flags.is_going_to_wrong_destination {
            self.start_outcome(ctx, false, None);
            return;
        }
        let Some(target) = self.target else {
            return;
        };
        if ctx
            .registry
            .is_valid_destination(target.room, target.interaction)
        {
            self.start_outcome(ctx, true, Some(target.interaction));
        } else {
            self.redirect(ctx, target.room);
        }
    }

    fn redirect(&mut self, ctx: &mut ControllerContext<'_>, room: RoomId) {
        let Some(point) = ctx.registry.wrong_destination_point(room) else {
            warn!(room = ctx.registry.room_name(room), "wrong_destination_missing");
            ctx.agent.reset_path();
            self.flags.has_reached_destination = true;
            self.start_outcome(ctx, false, None);
            return;
        };
        if !ctx.agent.set_destination(point) {
            warn!(
                room = ctx.registry.room_name(room),
                x = point.x,
                y = point.y,
                "navigation_refused"
            );
            ctx.agent.reset_path();
            self.flags.has_reached_destination = true;
            self.start_outcome(ctx, false, None);
            return;
        }

        self.flags.is_going_to_wrong_destination = true;
        self.flags.has_reached_destination = false;
        self.state = ControllerState::EnRouteToWrongDestination;
        ctx.events
            .emit(GameplayEvent::DestinationRedirected { room, point });
        info!(
            room = ctx.registry.room_name(room),
            x = point.x,
            y = point.y,
            "destination_redirected"
        );
    }

    fn start_outcome(
        &mut self,
        ctx: &mut ControllerContext<'_>,
        success: bool,
        interaction: Option<InteractionId>,
    ) {
        let speed = if success {
            self.difficulty.record_success()
        } else {
            self.difficulty.record_failure()
        };
        ctx.agent.set_speed(speed);
        ctx.agent.reset_path();

        let kind = if success {
            OutcomeKind::Success
        } else {
            OutcomeKind::Failure
        };
        self.sequence = Some(BehaviorSequence::start(
            kind,
            &self.behavior_tuning,
            self.difficulty.thinking_seconds(),
            self.difficulty.speed_factor(),
            ctx.agent.position(),
            self.heading,
        ));
        self.pending_outcome = Some(PendingOutcome {
            success,
            interaction,
        });
        self.state = ControllerState::RunningOutcomeSequence;
        info!(
            success,
            touched = interaction.map(|id| ctx.registry.interaction_name(id)),
            speed,
            success_count = self.difficulty.success_count(),
            failure_count = self.difficulty.failure_count(),
            thinking_seconds = self.difficulty.thinking_seconds(),
            "outcome_sequence_started"
        );
    }

    fn finish_trip(&mut self, ctx: &mut ControllerContext<'_>) {
        let outcome = self.pending_outcome.take().unwrap_or(PendingOutcome {
            success: false,
            interaction: None,
        });
        self.sequence = None;
        self.target = None;
        self.flags = TripFlags::default();
        self.trip_elapsed_seconds = 0.0;
        self.state = ControllerState::Idle;
        ctx.agent.reset_path();

        ctx.events.emit(GameplayEvent::DestinationOutcome {
            success: outcome.success,
            interaction: outcome.interaction,
        });
        info!(
            success = outcome.success,
            interaction = outcome
                .interaction
                .map(|id| ctx.registry.interaction_name(id)),
            "destination_outcome"
        );
    }

    fn track_travel_heading(&mut self, position: Vec2) {
        if let Some(previous) = self.last_position {
            let delta = position.sub(previous);
            if delta.length_squared() > f32::EPSILON {
                self.heading = delta.y.atan2(delta.x);
            }
        }
        self.last_position = Some(position);
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use errand_engine::{parse_layout_document, EntityTag};
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    use super::*;
    use crate::app::gameplay::events::{GameplayEventKind, SubscriberId};
    use crate::app::gameplay::nav::KinematicNavAgent;
    use crate::app::gameplay::triggers::{Collider, TriggerSignal, TriggerSystem};

    const DT: f32 = 0.05;

    const LAYOUT: &str = r#"<Defs>
        <RoomDef>
            <defName>a</defName>
            <category>Fixed</category>
            <bounds>0,0,6,6</bounds>
            <interactions>
                <InteractionDef><defName>a.lamp</defName><text>Lamp</text><position>5,3</position></InteractionDef>
            </interactions>
        </RoomDef>
        <RoomDef>
            <defName>b</defName>
            <category>Mutant:flooded</category>
            <bounds>6,0,12,6</bounds>
            <wrongDestination>7,5</wrongDestination>
            <interactions>
                <InteractionDef><defName>b.sink</defName><text>Sink</text><position>11,3</position></InteractionDef>
            </interactions>
        </RoomDef>
        <RoomDef>
            <defName>c</defName>
            <category>Mutant:dark</category>
            <bounds>0,6,6,12</bounds>
            <interactions>
                <InteractionDef><defName>c.desk</defName><text>Desk</text><position>3,10</position></InteractionDef>
            </interactions>
        </RoomDef>
    </Defs>"#;

    fn agent_tuning() -> AgentTuning {
        AgentTuning {
            base_speed: 4.0,
            max_speed: 6.0,
            success_speed_increment: 0.5,
            failure_multiplier: 2.0,
            stopping_distance: 0.25,
            initial_thinking_seconds: 0.5,
            thinking_decay: 0.5,
            thinking_floor_seconds: 0.25,
            path_latency_ticks: 1,
        }
    }

    fn behavior_tuning() -> BehaviorTuning {
        BehaviorTuning {
            engaged_seconds: 0.25,
            wander_points: 0,
            wander_radius: 1.0,
            wander_point_timeout_seconds: 0.5,
            frustration_seconds: 0.25,
            scale_durations_with_speed: false,
        }
    }

    /// Counts movement commands and can be told to refuse every destination.
    struct CountingNav {
        inner: KinematicNavAgent,
        set_destination_calls: u32,
        refuse: bool,
    }

    impl NavigationAgent for CountingNav {
        fn set_destination(&mut self, target: Vec2) -> bool {
            self.set_destination_calls += 1;
            !self.refuse && self.inner.set_destination(target)
        }
        fn reset_path(&mut self) {
            self.inner.reset_path();
        }
        fn path_pending(&self) -> bool {
            self.inner.path_pending()
        }
        fn has_path(&self) -> bool {
            self.inner.has_path()
        }
        fn remaining_distance(&self) -> f32 {
            self.inner.remaining_distance()
        }
        fn stopping_distance(&self) -> f32 {
            self.inner.stopping_distance()
        }
        fn velocity_magnitude(&self) -> f32 {
            self.inner.velocity_magnitude()
        }
        fn speed(&self) -> f32 {
            self.inner.speed()
        }
        fn set_speed(&mut self, speed: f32) {
            self.inner.set_speed(speed);
        }
        fn position(&self) -> Vec2 {
            self.inner.position()
        }
        fn sample_position(&self, near: Vec2, max_distance: f32) -> Option<Vec2> {
            self.inner.sample_position(near, max_distance)
        }
        fn tick(&mut self, fixed_dt_seconds: f32) {
            self.inner.tick(fixed_dt_seconds);
        }
    }

    struct Harness {
        registry: RoomRegistry,
        nav: CountingNav,
        events: GameplayEventBus,
        rng: SmallRng,
        triggers: TriggerSystem,
        controller: AgentController,
        observer: SubscriberId,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_tuning(agent_tuning(), Some(30.0))
        }

        fn with_tuning(agent_tuning: AgentTuning, trip_timeout_seconds: Option<f32>) -> Self {
            let layout =
                parse_layout_document("test", Path::new("layout.xml"), LAYOUT).expect("layout");
            let registry = RoomRegistry::from_layout(&layout);
            let nav = CountingNav {
                inner: KinematicNavAgent::new(
                    Vec2::new(1.0, 3.0),
                    agent_tuning.base_speed,
                    agent_tuning.stopping_distance,
                    registry.walkable_bounds(),
                    agent_tuning.path_latency_ticks,
                ),
                set_destination_calls: 0,
                refuse: false,
            };
            let mut events = GameplayEventBus::default();
            let observer = events.subscribe(&GameplayEventKind::ALL);
            Self {
                registry,
                nav,
                events,
                rng: SmallRng::seed_from_u64(11),
                triggers: TriggerSystem::default(),
                controller: AgentController::new(
                    &agent_tuning,
                    behavior_tuning(),
                    trip_timeout_seconds,
                ),
                observer,
            }
        }

        fn room(&self, name: &str) -> RoomId {
            self.registry.room_by_name(name).expect("room")
        }

        fn interaction(&self, name: &str) -> InteractionId {
            self.registry.interaction_by_name(name).expect("interaction")
        }

        fn set_destination(&mut self, interaction: &str, room: &str) -> Result<(), DestinationRejected> {
            let interaction = self.interaction(interaction);
            let room = self.room(room);
            let mut ctx = ControllerContext {
                registry: &self.registry,
                agent: &mut self.nav,
                events: &mut self.events,
                rng: &mut self.rng,
            };
            self.controller.set_destination(&mut ctx, interaction, room)
        }

        fn touch(&mut self, interaction: InteractionId) {
            let mut ctx = ControllerContext {
                registry: &self.registry,
                agent: &mut self.nav,
                events: &mut self.events,
                rng: &mut self.rng,
            };
            self.controller.notify_interaction_reached(&mut ctx, interaction);
        }

        fn room_entered(&mut self, room: RoomId) {
            let mut ctx = ControllerContext {
                registry: &self.registry,
                agent: &mut self.nav,
                events: &mut self.events,
                rng: &mut self.rng,
            };
            self.controller.on_room_entered(&mut ctx, room);
        }

        fn controller_tick(&mut self) {
            let mut ctx = ControllerContext {
                registry: &self.registry,
                agent: &mut self.nav,
                events: &mut self.events,
                rng: &mut self.rng,
            };
            self.controller.tick(&mut ctx, DT);
        }

        /// Navigation, triggers, then controller, the same order the scene runs.
        fn step(&mut self) {
            self.nav.tick(DT);
            let colliders = [Collider {
                tag: EntityTag::Agent,
                position: self.nav.position(),
                radius: 0.3,
            }];
            for signal in self.triggers.update(&self.registry, &colliders) {
                match signal {
                    TriggerSignal::RoomEntered { room, .. } => self.room_entered(room),
                    TriggerSignal::InteractionTouched { interaction, .. } => {
                        self.touch(interaction)
                    }
                }
            }
            self.controller_tick();
        }

        fn run_until_idle(&mut self, max_ticks: u32) -> Vec<GameplayEvent> {
            let mut seen = Vec::new();
            for _ in 0..max_ticks {
                self.step();
                seen.extend(self.events.drain(self.observer));
                if !self.controller.is_busy() {
                    return seen;
                }
            }
            panic!("controller still busy after {max_ticks} ticks: {seen:?}");
        }

        fn drain(&mut self) -> Vec<GameplayEvent> {
            self.events.drain(self.observer)
        }
    }

    fn outcomes(events: &[GameplayEvent]) -> Vec<GameplayEvent> {
        events
            .iter()
            .copied()
            .filter(|event| matches!(event, GameplayEvent::DestinationOutcome { .. }))
            .collect()
    }

    #[test]
    fn arrival_then_touch_yields_single_success() {
        let mut harness = Harness::new();
        let lamp = harness.interaction("a.lamp");
        let room_a = harness.room("a");
        harness.set_destination("a.lamp", "a").expect("accepted");
        assert!(harness.controller.is_busy());
        assert_eq!(harness.controller.current_target(), Some((lamp, room_a)));

        // Drive navigation directly so the touch arrives before any arrival poll.
        for _ in 0..1_000 {
            harness.nav.tick(DT);
            if !harness.nav.path_pending()
                && harness.nav.remaining_distance() <= harness.nav.stopping_distance()
            {
                break;
            }
        }
        harness.touch(lamp);
        harness.touch(lamp);
        assert_eq!(harness.controller.state(), ControllerState::RunningOutcomeSequence);

        let events = harness.run_until_idle(1_000);
        assert_eq!(
            outcomes(&events),
            vec![GameplayEvent::DestinationOutcome {
                success: true,
                interaction: Some(lamp)
            }]
        );
        assert_eq!(harness.controller.difficulty().success_count(), 1);
        assert!((harness.controller.speed() - 4.5).abs() < 1e-5);
        assert_eq!(harness.controller.state(), ControllerState::Idle);
        assert_eq!(harness.controller.current_target(), None);
    }

    #[test]
    fn trip_through_triggers_succeeds_once() {
        let mut harness = Harness::new();
        let lamp = harness.interaction("a.lamp");
        harness.set_destination("a.lamp", "a").expect("accepted");

        let events = harness.run_until_idle(2_000);
        assert_eq!(events.first(), Some(&GameplayEvent::DestinationAssigned {
            interaction: lamp,
            room: harness.room("a"),
        }));
        assert_eq!(
            outcomes(&events),
            vec![GameplayEvent::DestinationOutcome {
                success: true,
                interaction: Some(lamp)
            }]
        );
        assert_eq!(harness.controller.current_room(), Some(harness.room("a")));
    }

    #[test]
    fn deactivated_mutant_room_redirects_to_wrong_destination() {
        let mut harness = Harness::new();
        let room_b = harness.room("b");
        let sink = harness.interaction("b.sink");
        harness.set_destination("b.sink", "b").expect("accepted");
        harness.registry.set_room_active(room_b, false);

        let mut events = Vec::new();
        for _ in 0..2_000 {
            harness.step();
            events.extend(harness.drain());
            if harness.controller.is_going_to_wrong_destination() {
                break;
            }
        }
        assert_eq!(harness.controller.state(), ControllerState::EnRouteToWrongDestination);
        assert!(events.contains(&GameplayEvent::DestinationRedirected {
            room: room_b,
            point: Vec2::new(7.0, 5.0),
        }));

        // Touches are ignored while heading to the fallback point.
        harness.touch(sink);
        assert_eq!(harness.controller.state(), ControllerState::EnRouteToWrongDestination);

        events.extend(harness.run_until_idle(2_000));
        assert_eq!(
            outcomes(&events),
            vec![GameplayEvent::DestinationOutcome {
                success: false,
                interaction: None
            }]
        );
        assert_eq!(harness.controller.difficulty().failure_count(), 1);
        assert!(harness.nav.position().distance(Vec2::new(7.0, 5.0)) <= 0.25);
    }

    #[test]
    fn missing_fallback_fails_without_extra_movement() {
        let mut harness = Harness::new();
        let room_c = harness.room("c");
        harness.set_destination("c.desk", "c").expect("accepted");
        harness.registry.set_room_active(room_c, false);

        let events = harness.run_until_idle(2_000);
        assert_eq!(harness.nav.set_destination_calls, 1);
        assert!(!events
            .iter()
            .any(|event| matches!(event, GameplayEvent::DestinationRedirected { .. })));
        assert_eq!(
            outcomes(&events),
            vec![GameplayEvent::DestinationOutcome {
                success: false,
                interaction: None
            }]
        );
    }

    #[test]
    fn busy_controller_rejects_new_destination_without_events() {
        let mut harness = Harness::new();
        harness.set_destination("a.lamp", "a").expect("accepted");
        harness.drain();
        let target = harness.controller.current_target();

        let rejected = harness.set_destination("b.sink", "b");
        assert_eq!(rejected, Err(DestinationRejected::Busy));
        assert_eq!(harness.controller.current_target(), target);
        assert!(harness.drain().is_empty());
        assert_eq!(harness.nav.set_destination_calls, 1);
    }

    #[test]
    fn unknown_handles_are_rejected() {
        let mut harness = Harness::new();
        let lamp = harness.interaction("a.lamp");
        let mut ctx = ControllerContext {
            registry: &harness.registry,
            agent: &mut harness.nav,
            events: &mut harness.events,
            rng: &mut harness.rng,
        };
        assert_eq!(
            harness.controller.set_destination(&mut ctx, lamp, RoomId(42)),
            Err(DestinationRejected::UnknownRoom(RoomId(42)))
        );
        assert_eq!(
            harness
                .controller
                .set_destination(&mut ctx, InteractionId(42), RoomId(0)),
            Err(DestinationRejected::UnknownInteraction(InteractionId(42)))
        );
        assert!(!harness.controller.is_busy());
    }

    #[test]
    fn entering_target_room_validates_it() {
        let mut harness = Harness::new();
        harness.set_destination("b.sink", "b").expect("accepted");
        for _ in 0..2_000 {
            harness.step();
            if harness.controller.has_validated_room() {
                break;
            }
        }
        assert_eq!(harness.controller.state(), ControllerState::ValidatingAtRoom);
        assert_eq!(harness.controller.current_room(), Some(harness.room("b")));
        assert!(!harness.controller.has_reached_destination());
    }

    #[test]
    fn touching_another_interaction_fails_the_trip() {
        let mut harness = Harness::new();
        let sink = harness.interaction("b.sink");
        harness.set_destination("a.lamp", "a").expect("accepted");
        harness.touch(sink);
        let events = harness.run_until_idle(1_000);
        assert_eq!(
            outcomes(&events),
            vec![GameplayEvent::DestinationOutcome {
                success: false,
                interaction: Some(sink)
            }]
        );
    }

    #[test]
    fn refused_navigation_fails_immediately() {
        let mut harness = Harness::new();
        harness.nav.refuse = true;
        harness.set_destination("a.lamp", "a").expect("accepted");
        assert_eq!(harness.controller.state(), ControllerState::RunningOutcomeSequence);
        let events = harness.run_until_idle(1_000);
        assert_eq!(
            outcomes(&events),
            vec![GameplayEvent::DestinationOutcome {
                success: false,
                interaction: None
            }]
        );
    }

    #[test]
    fn trip_timeout_ends_in_failure() {
        let tuning = AgentTuning {
            base_speed: 0.1,
            max_speed: 0.5,
            ..agent_tuning()
        };
        let mut harness = Harness::with_tuning(tuning, Some(1.0));
        harness.set_destination("b.sink", "b").expect("accepted");
        let events = harness.run_until_idle(200);
        assert_eq!(
            outcomes(&events),
            vec![GameplayEvent::DestinationOutcome {
                success: false,
                interaction: None
            }]
        );
        assert!((harness.controller.speed() - 0.5).abs() < 1e-5);
    }

    #[test]
    fn every_accepted_trip_emits_exactly_one_outcome() {
        let mut harness = Harness::new();
        let trips = [("a.lamp", "a"), ("b.sink", "b"), ("a.lamp", "a"), ("c.desk", "c")];
        for (interaction, room) in trips {
            harness.set_destination(interaction, room).expect("accepted");
            let events = harness.run_until_idle(5_000);
            assert_eq!(outcomes(&events).len(), 1, "{interaction}: {events:?}");
        }
        let difficulty = harness.controller.difficulty();
        assert_eq!(difficulty.success_count() + difficulty.failure_count(), 4);
        assert!(harness.controller.speed() <= 6.0);
    }

    #[test]
    fn thinking_time_decays_across_successful_trips() {
        let mut harness = Harness::new();
        for k in 1..=3i32 {
            harness.set_destination("a.lamp", "a").expect("accepted");
            harness.run_until_idle(5_000);
            harness.set_destination("b.sink", "b").expect("accepted");
            harness.run_until_idle(5_000);
            let successes = harness.controller.difficulty().success_count() as i32;
            assert_eq!(successes, 2 * k);
            let expected = (0.5 * 0.5f32.powi(successes)).max(0.25);
            assert!((harness.controller.difficulty().thinking_seconds() - expected).abs() < 1e-5);
        }
    }
}
