use std::f32::consts::TAU;

use errand_engine::Vec2;
use rand::{Rng, RngCore};
use tracing::debug;

use super::nav::{has_arrived, NavigationAgent};
use super::tuning::BehaviorTuning;

const THINKING_SWAY_RADIANS: f32 = 0.6;
const THINKING_SWAY_HZ: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutcomeKind {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SequenceStep {
    Running,
    Finished,
}

#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BehaviorPhaseKind {
    Engaged,
    Wander,
    Frustration,
    Thinking,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BehaviorPhase {
    Engaged {
        elapsed: f32,
    },
    Wander {
        points_left: u32,
        target: Option<Vec2>,
        point_elapsed: f32,
    },
    Frustration {
        elapsed: f32,
    },
    Thinking {
        elapsed: f32,
    },
    Done,
}

#[cfg(test)]
impl BehaviorPhase {
    fn kind(self) -> BehaviorPhaseKind {
        match self {
            Self::Engaged { .. } => BehaviorPhaseKind::Engaged,
            Self::Wander { .. } => BehaviorPhaseKind::Wander,
            Self::Frustration { .. } => BehaviorPhaseKind::Frustration,
            Self::Thinking { .. } => BehaviorPhaseKind::Thinking,
            Self::Done => BehaviorPhaseKind::Done,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PhaseDurations {
    engaged: f32,
    wander_point_timeout: f32,
    frustration: f32,
    thinking: f32,
}

/// Resumable outcome routine stepped once per tick. Dropping the value cancels it; nothing
/// it would have done later is applied.
#[derive(Debug, Clone)]
pub(crate) struct BehaviorSequence {
    kind: OutcomeKind,
    phase: BehaviorPhase,
    durations: PhaseDurations,
    wander_points: u32,
    wander_radius: f32,
    origin: Vec2,
    start_heading: f32,
    heading: f32,
}

impl BehaviorSequence {
    /// `speed_factor` shortens every phase when `scale_durations_with_speed` is set.
    pub(crate) fn start(
        kind: OutcomeKind,
        tuning: &BehaviorTuning,
        thinking_seconds: f32,
        speed_factor: f32,
        origin: Vec2,
        heading: f32,
    ) -> Self {
        let scale = if tuning.scale_durations_with_speed && speed_factor > 0.0 {
            1.0 / speed_factor
        } else {
            1.0
        };
        let durations = PhaseDurations {
            engaged: tuning.engaged_seconds * scale,
            wander_point_timeout: tuning.wander_point_timeout_seconds * scale,
            frustration: tuning.frustration_seconds * scale,
            thinking: thinking_seconds * scale,
        };
        let phase = match kind {
            OutcomeKind::Success => BehaviorPhase::Engaged { elapsed: 0.0 },
            OutcomeKind::Failure => BehaviorPhase::Frustration { elapsed: 0.0 },
        };
        Self {
            kind,
            phase,
            durations,
            wander_points: tuning.wander_points,
            wander_radius: tuning.wander_radius,
            origin,
            start_heading: heading,
            heading,
        }
    }

    #[cfg(test)]
    pub(crate) fn kind(&self) -> OutcomeKind {
        self.kind
    }

    #[cfg(test)]
    pub(crate) fn phase(&self) -> BehaviorPhaseKind {
        self.phase.kind()
    }

    pub(crate) fn heading(&self) -> f32 {
        self.heading
    }

    pub(crate) fn step(
        &mut self,
        dt: f32,
        agent: &mut dyn NavigationAgent,
        rng: &mut dyn RngCore,
    ) -> SequenceStep {
        match self.phase {
            BehaviorPhase::Engaged { elapsed } => {
                let elapsed = elapsed + dt;
                if elapsed >= self.durations.engaged {
                    self.phase = BehaviorPhase::Wander {
                        points_left: self.wander_points,
                        target: None,
                        point_elapsed: 0.0,
                    };
                } else {
                    self.phase = BehaviorPhase::Engaged { elapsed };
                }
            }
            BehaviorPhase::Wander {
                points_left,
                target,
                point_elapsed,
            } => self.step_wander(dt, points_left, target, point_elapsed, agent, rng),
            BehaviorPhase::Frustration { elapsed } => {
                let elapsed = elapsed + dt;
                let progress = if self.durations.frustration > 0.0 {
                    (elapsed / self.durations.frustration).min(1.0)
                } else {
                    1.0
                };
                self.heading = self.start_heading + TAU * progress;
                if progress >= 1.0 {
                    self.heading = self.start_heading;
                    self.enter_thinking();
                } else {
                    self.phase = BehaviorPhase::Frustration { elapsed };
                }
            }
            BehaviorPhase::Thinking { elapsed } => {
                let elapsed = elapsed + dt;
                if elapsed >= self.durations.thinking {
                    self.heading = self.start_heading;
                    self.phase = BehaviorPhase::Done;
                    debug!(kind = ?self.kind, "behavior_sequence_finished");
                } else {
                    self.heading = self.start_heading
                        + THINKING_SWAY_RADIANS * (elapsed * THINKING_SWAY_HZ * TAU).sin();
                    self.phase = BehaviorPhase::Thinking { elapsed };
                }
            }
            BehaviorPhase::Done => {}
        }

        if self.phase == BehaviorPhase::Done {
            SequenceStep::Finished
        } else {
            SequenceStep::Running
        }
    }

    fn step_wander(
        &mut self,
        dt: f32,
        points_left: u32,
        target: Option<Vec2>,
        point_elapsed: f32,
        agent: &mut dyn NavigationAgent,
        rng: &mut dyn RngCore,
    ) {
        if let Some(target) = target {
            let point_elapsed = point_elapsed + dt;
            let timed_out = point_elapsed >= self.durations.wander_point_timeout;
            if !timed_out && !has_arrived(agent) {
                self.phase = BehaviorPhase::Wander {
                    points_left,
                    target: Some(target),
                    point_elapsed,
                };
                return;
            }
            if timed_out {
                debug!(x = target.x, y = target.y, "wander_point_timeout");
            }
        }

        if points_left == 0 {
            agent.reset_path();
            self.enter_thinking();
            return;
        }

        // An unreachable sample still spends one of the points.
        let next_target = self
            .sample_wander_point(agent, rng)
            .filter(|point| agent.set_destination(*point));
        if let Some(point) = next_target {
            self.heading = heading_toward(agent.position(), point).unwrap_or(self.heading);
        }
        self.phase = BehaviorPhase::Wander {
            points_left: points_left - 1,
            target: next_target,
            point_elapsed: 0.0,
        };
    }

    fn sample_wander_point(
        &self,
        agent: &dyn NavigationAgent,
        rng: &mut dyn RngCore,
    ) -> Option<Vec2> {
        let angle = rng.random_range(0.0..TAU);
        let distance = rng.random_range(0.0..=self.wander_radius);
        let candidate = self
            .origin
            .add(Vec2::new(angle.cos(), angle.sin()).scale(distance));
        agent.sample_position(candidate, self.wander_radius)
    }

    fn enter_thinking(&mut self) {
        self.start_heading = self.heading;
        self.phase = BehaviorPhase::Thinking { elapsed: 0.0 };
    }
}

fn heading_toward(from: Vec2, to: Vec2) -> Option<f32> {
    let delta = to.sub(from);
    if delta.length_squared() <= f32::EPSILON {
        return None;
    }
    Some(delta.y.atan2(delta.x))
}
