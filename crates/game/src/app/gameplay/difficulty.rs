use super::tuning::AgentTuning;

/// Speed and think-time progression. Persists across trips; only `reset` rewinds it.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DifficultyCurve {
    base_speed: f32,
    max_speed: f32,
    success_increment: f32,
    failure_multiplier: f32,
    initial_thinking_seconds: f32,
    thinking_decay: f32,
    thinking_floor_seconds: f32,
    speed: f32,
    thinking_seconds: f32,
    success_count: u32,
    failure_count: u32,
}

impl DifficultyCurve {
    pub(crate) fn new(tuning: &AgentTuning) -> Self {
        Self {
            base_speed: tuning.base_speed,
            max_speed: tuning.max_speed,
            success_increment: tuning.success_speed_increment,
            failure_multiplier: tuning.failure_multiplier,
            initial_thinking_seconds: tuning.initial_thinking_seconds,
            thinking_decay: tuning.thinking_decay,
            thinking_floor_seconds: tuning.thinking_floor_seconds,
            speed: tuning.base_speed,
            thinking_seconds: tuning.initial_thinking_seconds,
            success_count: 0,
            failure_count: 0,
        }
    }

    /// Success speed is derived from the base, so it never inherits failure penalties.
    pub(crate) fn record_success(&mut self) -> f32 {
        self.success_count = self.success_count.saturating_add(1);
        self.speed = self
            .max_speed
            .min(self.base_speed + self.success_count as f32 * self.success_increment);
        self.thinking_seconds =
            (self.thinking_seconds * self.thinking_decay).max(self.thinking_floor_seconds);
        self.speed
    }

    /// Failure compounds on the current speed.
    pub(crate) fn record_failure(&mut self) -> f32 {
        self.failure_count = self.failure_count.saturating_add(1);
        self.speed = self
            .max_speed
            .min(self.speed + self.success_increment * self.failure_multiplier);
        self.speed
    }

    pub(crate) fn reset(&mut self) {
        self.speed = self.base_speed;
        self.thinking_seconds = self.initial_thinking_seconds;
        self.success_count = 0;
        self.failure_count = 0;
    }

    pub(crate) fn speed(&self) -> f32 {
        self.speed
    }

    #[cfg(test)]
    pub(crate) fn base_speed(&self) -> f32 {
        self.base_speed
    }

    pub(crate) fn speed_factor(&self) -> f32 {
        self.speed / self.base_speed
    }

    pub(crate) fn thinking_seconds(&self) -> f32 {
        self.thinking_seconds
    }

    pub(crate) fn success_count(&self) -> u32 {
        self.success_count
    }

    pub(crate) fn failure_count(&self) -> u32 {
        self.failure_count
    }
}
