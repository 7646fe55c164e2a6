use std::env;
use std::mem;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{info, warn};

use crate::content::{compile_layout_database, ContentCompileError, LayoutRequest};
use crate::{resolve_app_paths, StartupError};

use super::metrics::MetricsAccumulator;
use super::{MetricsHandle, Scene, SceneCommand, SceneHost};

pub const SLOW_FRAME_ENV_VAR: &str = "ERRAND_SLOW_FRAME_MS";

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub target_tps: u32,
    pub max_frame_delta: Duration,
    pub max_ticks_per_frame: u32,
    pub metrics_log_interval: Duration,
    pub simulated_slow_frame_ms: u64,
    /// `None` runs until the scene asks to quit.
    pub max_ticks: Option<u64>,
    /// When false every frame advances exactly one fixed step without sleeping.
    pub realtime: bool,
    pub layout_request: LayoutRequest,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            target_tps: 60,
            max_frame_delta: Duration::from_millis(250),
            max_ticks_per_frame: 5,
            metrics_log_interval: Duration::from_secs(1),
            simulated_slow_frame_ms: 0,
            max_ticks: None,
            realtime: true,
            layout_request: LayoutRequest::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    QuitRequested { ticks_run: u64 },
    TickBudgetReached { ticks_run: u64 },
}

impl RunOutcome {
    pub fn ticks_run(self) -> u64 {
        match self {
            Self::QuitRequested { ticks_run } | Self::TickBudgetReached { ticks_run } => ticks_run,
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Startup(#[from] StartupError),
    #[error("failed to compile room layout: {0}")]
    Layout(#[from] ContentCompileError),
}

pub fn run_app(config: LoopConfig, scene: Box<dyn Scene>) -> Result<RunOutcome, AppError> {
    run_app_with_metrics(config, scene, MetricsHandle::default())
}

pub fn run_app_with_metrics(
    config: LoopConfig,
    scene: Box<dyn Scene>,
    metrics_handle: MetricsHandle,
) -> Result<RunOutcome, AppError> {
    let app_paths = resolve_app_paths()?;
    info!(
        root = %app_paths.root.display(),
        base_layout_dir = %app_paths.base_layout_dir.display(),
        overlays_dir = %app_paths.overlays_dir.display(),
        "startup"
    );
    let layout = compile_layout_database(&app_paths, &config.layout_request)?;
    info!(
        room_count = layout.rooms().len(),
        interaction_count = layout.interaction_count(),
        "layout_loaded"
    );

    let mut host = SceneHost::new(scene);
    host.set_layout(layout);
    Ok(run_scene_host(&config, &mut host, &metrics_handle))
}

/// Drives an already-constructed host until the tick budget runs out or the scene quits.
pub fn run_scene_host(
    config: &LoopConfig,
    host: &mut SceneHost,
    metrics_handle: &MetricsHandle,
) -> RunOutcome {
    let mut clock = FixedStepClock::from_config(config);
    let step_seconds = clock.step.as_secs_f32();
    let metrics_interval = non_zero_or(config.metrics_log_interval, Duration::from_secs(1));
    let slow_frame_delay = slow_frame_delay(read_slow_frame_env(), config.simulated_slow_frame_ms);

    host.load();
    info!(entity_count = host.world().entity_count(), "scene_loaded");
    info!(
        target_tps = config.target_tps.max(1),
        max_frame_delta_ms = clock.max_frame_delta.as_millis() as u64,
        max_ticks_per_frame = clock.max_ticks_per_frame,
        metrics_interval_ms = metrics_interval.as_millis() as u64,
        slow_frame_delay_ms = slow_frame_delay.as_millis() as u64,
        max_ticks = %format_tick_budget(config.max_ticks),
        realtime = config.realtime,
        "loop_config"
    );

    let mut metrics = MetricsAccumulator::new(metrics_interval);
    let mut frame_start = Instant::now();

    let outcome = 'frames: loop {
        if !slow_frame_delay.is_zero() {
            // Debug perturbation only.
            thread::sleep(slow_frame_delay);
        }

        let now = Instant::now();
        let frame_dt = if config.realtime {
            now.saturating_duration_since(frame_start)
        } else {
            clock.step
        };
        frame_start = now;

        let plan = clock.advance(frame_dt);
        for _ in 0..plan.ticks {
            if config
                .max_ticks
                .is_some_and(|budget| metrics.total_ticks() >= budget)
            {
                break 'frames RunOutcome::TickBudgetReached {
                    ticks_run: metrics.total_ticks(),
                };
            }

            let tick_start = Instant::now();
            let command = host.update(step_seconds);
            metrics.record_tick(tick_start.elapsed());

            match command {
                SceneCommand::None => {}
                SceneCommand::Quit => {
                    info!(reason = "scene_request", "shutdown_requested");
                    break 'frames RunOutcome::QuitRequested {
                        ticks_run: metrics.total_ticks(),
                    };
                }
            }
        }

        if !plan.dropped.is_zero() {
            metrics.record_dropped_backlog(plan.dropped);
            warn!(
                dropped_ms = plan.dropped.as_millis() as u64,
                max_ticks_per_frame = clock.max_ticks_per_frame,
                "sim_clamp_triggered"
            );
        }

        if let Some(snapshot) = metrics.maybe_snapshot(Instant::now()) {
            metrics_handle.publish(snapshot);
            info!(
                tps = snapshot.tps,
                tick_time_ms = snapshot.tick_time_ms,
                max_tick_time_ms = snapshot.max_tick_time_ms,
                total_ticks = snapshot.total_ticks,
                dropped_backlog_ms = snapshot.dropped_backlog_ms,
                entity_count = host.world().entity_count(),
                "loop_metrics"
            );
        }

        if config.realtime {
            let spent = Instant::now().saturating_duration_since(frame_start);
            let idle = clock.step.saturating_sub(spent);
            if !idle.is_zero() {
                thread::sleep(idle);
            }
        }
    };

    host.shutdown();
    info!(ticks_run = outcome.ticks_run(), "shutdown");
    outcome
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StepPlan {
    ticks: u32,
    dropped: Duration,
}

/// Accumulates clamped frame time and pays it out in whole fixed steps.
#[derive(Debug)]
struct FixedStepClock {
    step: Duration,
    max_frame_delta: Duration,
    max_ticks_per_frame: u32,
    backlog: Duration,
}

impl FixedStepClock {
    fn from_config(config: &LoopConfig) -> Self {
        Self::new(
            Duration::from_secs_f64(1.0 / f64::from(config.target_tps.max(1))),
            non_zero_or(config.max_frame_delta, Duration::from_millis(250)),
            config.max_ticks_per_frame,
        )
    }

    fn new(step: Duration, max_frame_delta: Duration, max_ticks_per_frame: u32) -> Self {
        Self {
            step,
            // A frame always buys at least one step.
            max_frame_delta: max_frame_delta.max(step),
            max_ticks_per_frame: max_ticks_per_frame.max(1),
            backlog: Duration::ZERO,
        }
    }

    /// Whole steps past `max_ticks_per_frame` are discarded, not carried to the next frame.
    fn advance(&mut self, frame_dt: Duration) -> StepPlan {
        self.backlog = self
            .backlog
            .saturating_add(frame_dt.min(self.max_frame_delta));

        let mut ticks = 0;
        while self.backlog >= self.step && ticks < self.max_ticks_per_frame {
            self.backlog -= self.step;
            ticks += 1;
        }
        let dropped = if self.backlog >= self.step {
            mem::take(&mut self.backlog)
        } else {
            Duration::ZERO
        };
        StepPlan { ticks, dropped }
    }
}

fn non_zero_or(value: Duration, fallback: Duration) -> Duration {
    if value.is_zero() {
        fallback
    } else {
        value
    }
}

fn format_tick_budget(max_ticks: Option<u64>) -> String {
    max_ticks.map_or_else(|| "unbounded".to_string(), |budget| budget.to_string())
}

fn read_slow_frame_env() -> Option<String> {
    match env::var(SLOW_FRAME_ENV_VAR) {
        Ok(value) => Some(value),
        Err(env::VarError::NotPresent) => None,
        Err(err) => {
            warn!(env_var = SLOW_FRAME_ENV_VAR, error = %err, "slow_frame_env_unreadable");
            None
        }
    }
}

/// The env override wins over the configured delay when it parses.
fn slow_frame_delay(raw: Option<String>, configured_ms: u64) -> Duration {
    let Some(raw) = raw else {
        return Duration::from_millis(configured_ms);
    };
    match raw.trim().parse::<u64>() {
        Ok(ms) => Duration::from_millis(ms),
        Err(_) => {
            warn!(
                env_var = SLOW_FRAME_ENV_VAR,
                value = raw.as_str(),
                configured_ms,
                "slow_frame_env_invalid"
            );
            Duration::from_millis(configured_ms)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{EntityTag, SceneWorld, Vec2};

    const STEP: Duration = Duration::from_millis(10);

    struct QuitAfter {
        ticks_until_quit: u32,
        seen_ticks: u32,
    }

    impl Scene for QuitAfter {
        fn load(&mut self, world: &mut SceneWorld) {
            world.spawn(EntityTag::Agent, "agent", Vec2::ZERO);
        }

        fn update(&mut self, _fixed_dt_seconds: f32, _world: &mut SceneWorld) -> SceneCommand {
            self.seen_ticks += 1;
            if self.seen_ticks >= self.ticks_until_quit {
                SceneCommand::Quit
            } else {
                SceneCommand::None
            }
        }

        fn unload(&mut self, _world: &mut SceneWorld) {}
    }

    fn batch_config(max_ticks: Option<u64>) -> LoopConfig {
        LoopConfig {
            max_ticks,
            realtime: false,
            ..LoopConfig::default()
        }
    }

    #[test]
    fn clock_carries_partial_steps_between_frames() {
        let mut clock = FixedStepClock::new(STEP, Duration::from_millis(100), 5);
        assert_eq!(
            clock.advance(Duration::from_millis(25)),
            StepPlan { ticks: 2, dropped: Duration::ZERO }
        );
        assert_eq!(clock.advance(Duration::from_millis(5)).ticks, 1);
        assert_eq!(clock.advance(Duration::from_millis(9)).ticks, 0);
    }

    #[test]
    fn clock_clamps_long_frames_before_stepping() {
        let mut clock = FixedStepClock::new(STEP, Duration::from_millis(50), 10);
        assert_eq!(
            clock.advance(Duration::from_secs(1)),
            StepPlan { ticks: 5, dropped: Duration::ZERO }
        );
    }

    #[test]
    fn clock_drops_backlog_past_the_tick_cap() {
        let mut clock = FixedStepClock::new(STEP, Duration::from_millis(100), 3);
        assert_eq!(
            clock.advance(Duration::from_millis(75)),
            StepPlan { ticks: 3, dropped: Duration::from_millis(45) }
        );
        assert_eq!(clock.advance(Duration::ZERO).ticks, 0);
    }

    #[test]
    fn slow_tick_rates_still_step_once_per_batch_frame() {
        let config = LoopConfig {
            target_tps: 1,
            ..LoopConfig::default()
        };
        let mut clock = FixedStepClock::from_config(&config);
        assert_eq!(clock.step, Duration::from_secs(1));
        assert_eq!(clock.advance(clock.step).ticks, 1);
    }

    #[test]
    fn zero_config_values_fall_back() {
        assert_eq!(non_zero_or(Duration::ZERO, STEP), STEP);
        assert_eq!(non_zero_or(Duration::from_millis(3), STEP), Duration::from_millis(3));
        let clock = FixedStepClock::new(STEP, Duration::ZERO, 0);
        assert_eq!(clock.max_ticks_per_frame, 1);
        assert_eq!(clock.max_frame_delta, STEP);
    }

    #[test]
    fn slow_frame_override_parses_or_falls_back() {
        assert_eq!(slow_frame_delay(None, 4), Duration::from_millis(4));
        assert_eq!(
            slow_frame_delay(Some(" 12 ".to_string()), 4),
            Duration::from_millis(12)
        );
        assert_eq!(
            slow_frame_delay(Some("fast".to_string()), 4),
            Duration::from_millis(4)
        );
    }

    #[test]
    fn batch_run_stops_at_tick_budget() {
        let mut host = SceneHost::new(Box::new(QuitAfter {
            ticks_until_quit: u32::MAX,
            seen_ticks: 0,
        }));
        let outcome = run_scene_host(&batch_config(Some(25)), &mut host, &MetricsHandle::default());

        assert_eq!(outcome, RunOutcome::TickBudgetReached { ticks_run: 25 });
        assert!(!host.is_loaded());
    }

    #[test]
    fn batch_run_stops_when_scene_quits() {
        let mut host = SceneHost::new(Box::new(QuitAfter {
            ticks_until_quit: 7,
            seen_ticks: 0,
        }));
        let outcome = run_scene_host(&batch_config(Some(100)), &mut host, &MetricsHandle::default());

        assert_eq!(outcome, RunOutcome::QuitRequested { ticks_run: 7 });
    }

    #[test]
    fn tick_budget_formatting() {
        assert_eq!(format_tick_budget(None), "unbounded");
        assert_eq!(format_tick_budget(Some(12)), "12");
    }
}
