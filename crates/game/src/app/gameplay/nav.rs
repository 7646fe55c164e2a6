use errand_engine::{RoomBounds, Vec2};

/// Path-following capability the controller drives. Pathfinding itself lives behind this
/// boundary.
pub(crate) trait NavigationAgent {
    /// Returns false when the target cannot be reached; the previous path is kept.
    fn set_destination(&mut self, target: Vec2) -> bool;
    fn reset_path(&mut self);
    fn path_pending(&self) -> bool;
    fn has_path(&self) -> bool;
    fn remaining_distance(&self) -> f32;
    fn stopping_distance(&self) -> f32;
    fn velocity_magnitude(&self) -> f32;
    fn speed(&self) -> f32;
    fn set_speed(&mut self, speed: f32);
    fn position(&self) -> Vec2;
    /// Nearest reachable point to `near` within `max_distance`.
    fn sample_position(&self, near: Vec2, max_distance: f32) -> Option<Vec2>;
    fn tick(&mut self, fixed_dt_seconds: f32);
}

/// Not pending, stopped or out of path, and inside the stopping tolerance.
pub(crate) fn has_arrived(agent: &dyn NavigationAgent) -> bool {
    !agent.path_pending()
        && (!agent.has_path() || agent.velocity_magnitude() <= f32::EPSILON)
        && agent.remaining_distance() <= agent.stopping_distance()
}

#[derive(Debug, Clone, PartialEq)]
struct NavigationPathState {
    waypoints_world: Vec<Vec2>,
    next_waypoint_index: usize,
}

impl NavigationPathState {
    fn current_waypoint(&self) -> Option<Vec2> {
        self.waypoints_world.get(self.next_waypoint_index).copied()
    }

    fn advance_waypoint(&mut self) {
        if self.next_waypoint_index < self.waypoints_world.len() {
            self.next_waypoint_index = self.next_waypoint_index.saturating_add(1);
        }
    }

    fn is_complete(&self) -> bool {
        self.next_waypoint_index >= self.waypoints_world.len()
    }
}

/// Circle the mover steers around. It is ignored when the destination lies inside it; an
/// agent already inside may only move away from its center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct NavObstacle {
    pub(crate) center: Vec2,
    pub(crate) radius: f32,
}

impl NavObstacle {
    fn contains(&self, point: Vec2) -> bool {
        point.distance(self.center) < self.radius
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PendingPath {
    target: Vec2,
    ticks_remaining: u32,
}

/// Straight-line mover constrained to a union of walkable rectangles. A new destination
/// stays pending for `path_latency_ticks` ticks before movement starts. Steps that would
/// enter an obstacle slide along its rim instead.
#[derive(Debug, Clone)]
pub(crate) struct KinematicNavAgent {
    position: Vec2,
    speed: f32,
    stopping_distance: f32,
    walkable: Vec<RoomBounds>,
    obstacles: Vec<NavObstacle>,
    path_latency_ticks: u32,
    destination: Option<Vec2>,
    pending: Option<PendingPath>,
    path: Option<NavigationPathState>,
    velocity_magnitude: f32,
}

impl KinematicNavAgent {
    pub(crate) fn new(
        position: Vec2,
        speed: f32,
        stopping_distance: f32,
        walkable: Vec<RoomBounds>,
        path_latency_ticks: u32,
    ) -> Self {
        Self {
            position,
            speed: speed.max(0.0),
            stopping_distance,
            walkable,
            obstacles: Vec::new(),
            path_latency_ticks,
            destination: None,
            pending: None,
            path: None,
            velocity_magnitude: 0.0,
        }
    }

    pub(crate) fn with_obstacles(mut self, obstacles: Vec<NavObstacle>) -> Self {
        self.obstacles = obstacles
            .into_iter()
            .filter(|obstacle| obstacle.center.is_finite() && obstacle.radius > 0.0)
            .collect();
        self
    }

    #[cfg(test)]
    pub(crate) fn destination(&self) -> Option<Vec2> {
        self.destination
    }

    fn is_walkable(&self, point: Vec2) -> bool {
        point.is_finite() && self.walkable.iter().any(|bounds| bounds.contains(point))
    }

    /// First obstacle the move from the current position to `next` would enter or push
    /// deeper into.
    fn obstacle_entered_by(&self, next: Vec2) -> Option<NavObstacle> {
        self.obstacles.iter().copied().find(|obstacle| {
            obstacle.contains(next)
                && next.distance(obstacle.center) < self.position.distance(obstacle.center)
                && !self
                    .destination
                    .is_some_and(|destination| obstacle.contains(destination))
        })
    }

    /// Moves `step` along the obstacle tangent that turns toward `goal`, falling back to
    /// the other tangent when the first leaves the walkable area or enters another
    /// obstacle.
    fn slide_around(&self, obstacle: NavObstacle, goal: Vec2, step: f32) -> Option<Vec2> {
        let outward = self.position.sub(obstacle.center);
        let distance = outward.length();
        if distance <= f32::EPSILON {
            return None;
        }
        let normal = outward.scale(1.0 / distance);
        let left = Vec2::new(-normal.y, normal.x);
        let to_goal = goal.sub(self.position);
        let turns_left = left.x * to_goal.x + left.y * to_goal.y >= 0.0;
        let (first, second) = if turns_left {
            (left, left.scale(-1.0))
        } else {
            (left.scale(-1.0), left)
        };
        [first, second]
            .into_iter()
            .map(|tangent| self.position.add(tangent.scale(step)))
            .find(|candidate| {
                self.is_walkable(*candidate) && self.obstacle_entered_by(*candidate).is_none()
            })
    }

    fn start_path(&mut self, target: Vec2) {
        self.path = Some(NavigationPathState {
            waypoints_world: vec![target],
            next_waypoint_index: 0,
        });
    }
}

impl NavigationAgent for KinematicNavAgent {
    fn set_destination(&mut self, target: Vec2) -> bool {
        if !self.is_walkable(target) {
            return false;
        }
        self.destination = Some(target);
        self.path = None;
        self.velocity_magnitude = 0.0;
        if self.path_latency_ticks == 0 {
            self.pending = None;
            self.start_path(target);
        } else {
            self.pending = Some(PendingPath {
                target,
                ticks_remaining: self.path_latency_ticks,
            });
        }
        true
    }

    fn reset_path(&mut self) {
        self.destination = None;
        self.pending = None;
        self.path = None;
        self.velocity_magnitude = 0.0;
    }

    fn path_pending(&self) -> bool {
        self.pending.is_some()
    }

    fn has_path(&self) -> bool {
        self.path.is_some()
    }

    fn remaining_distance(&self) -> f32 {
        self.destination
            .map_or(0.0, |destination| self.position.distance(destination))
    }

    fn stopping_distance(&self) -> f32 {
        self.stopping_distance
    }

    fn velocity_magnitude(&self) -> f32 {
        self.velocity_magnitude
    }

    fn speed(&self) -> f32 {
        self.speed
    }

    fn set_speed(&mut self, speed: f32) {
        if speed.is_finite() {
            self.speed = speed.max(0.0);
        }
    }

    fn position(&self) -> Vec2 {
        self.position
    }

    fn sample_position(&self, near: Vec2, max_distance: f32) -> Option<Vec2> {
        if !near.is_finite() {
            return None;
        }
        if self.is_walkable(near) {
            return Some(near);
        }
        self.walkable
            .iter()
            .map(|bounds| bounds.clamp(near))
            .filter(|candidate| candidate.distance(near) <= max_distance)
            .min_by(|a, b| a.distance(near).total_cmp(&b.distance(near)))
    }

    fn tick(&mut self, fixed_dt_seconds: f32) {
        self.velocity_magnitude = 0.0;

        if let Some(mut pending) = self.pending.take() {
            pending.ticks_remaining = pending.ticks_remaining.saturating_sub(1);
            if pending.ticks_remaining == 0 {
                self.start_path(pending.target);
            } else {
                self.pending = Some(pending);
            }
            return;
        }

        let Some(waypoint) = self.path.as_ref().and_then(NavigationPathState::current_waypoint)
        else {
            self.path = None;
            return;
        };

        let previous = self.position;
        let (next, arrived) = step_toward(
            self.position,
            waypoint,
            self.speed,
            fixed_dt_seconds,
            self.stopping_distance,
        );
        let (next, arrived) = match self.obstacle_entered_by(next) {
            Some(obstacle) => self
                .slide_around(obstacle, waypoint, self.speed * fixed_dt_seconds)
                .map_or((next, arrived), |detour| (detour, false)),
            None => (next, arrived),
        };
        self.position = next;
        if fixed_dt_seconds > 0.0 {
            self.velocity_magnitude = previous.distance(next) / fixed_dt_seconds;
        }
        if arrived {
            if let Some(path) = self.path.as_mut() {
                path.advance_waypoint();
                if path.is_complete() {
                    self.path = None;
                }
            }
        }
    }
}

pub(crate) fn step_toward(
    current: Vec2,
    target: Vec2,
    speed: f32,
    fixed_dt_seconds: f32,
    arrival_threshold: f32,
) -> (Vec2, bool) {
    let delta = target.sub(current);
    let distance_sq = delta.length_squared();
    if distance_sq <= arrival_threshold * arrival_threshold {
        return (target, true);
    }

    let distance = distance_sq.sqrt();
    let max_step = speed * fixed_dt_seconds;
    if max_step >= distance {
        return (target, true);
    }

    (current.add(delta.scale(max_step / distance)), false)
}
