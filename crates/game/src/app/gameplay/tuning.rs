use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::picker::RepeatPolicy;

#[derive(Debug, Error)]
pub(crate) enum TuningError {
    #[error("failed to read tuning file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse tuning file {} at {field_path}: {message}", path.display())]
    Parse {
        path: PathBuf,
        field_path: String,
        message: String,
    },
    #[error("invalid tuning value at {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct AgentTuning {
    pub(crate) base_speed: f32,
    pub(crate) max_speed: f32,
    pub(crate) success_speed_increment: f32,
    pub(crate) failure_multiplier: f32,
    pub(crate) stopping_distance: f32,
    pub(crate) initial_thinking_seconds: f32,
    pub(crate) thinking_decay: f32,
    pub(crate) thinking_floor_seconds: f32,
    /// Ticks a freshly requested path stays pending before the agent starts moving.
    pub(crate) path_latency_ticks: u32,
}

impl Default for AgentTuning {
    fn default() -> Self {
        Self {
            base_speed: 3.5,
            max_speed: 8.0,
            success_speed_increment: 0.5,
            failure_multiplier: 2.0,
            stopping_distance: 0.25,
            initial_thinking_seconds: 3.0,
            thinking_decay: 0.9,
            thinking_floor_seconds: 0.5,
            path_latency_ticks: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct BehaviorTuning {
    pub(crate) engaged_seconds: f32,
    pub(crate) wander_points: u32,
    pub(crate) wander_radius: f32,
    pub(crate) wander_point_timeout_seconds: f32,
    pub(crate) frustration_seconds: f32,
    pub(crate) scale_durations_with_speed: bool,
}

impl Default for BehaviorTuning {
    fn default() -> Self {
        Self {
            engaged_seconds: 1.5,
            wander_points: 3,
            wander_radius: 2.5,
            wander_point_timeout_seconds: 2.0,
            frustration_seconds: 1.2,
            scale_durations_with_speed: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct PickerTuning {
    pub(crate) max_attempts: u32,
    pub(crate) retry_delay_seconds: f32,
    pub(crate) busy_retry_delay_seconds: f32,
    pub(crate) repeat_policy: RepeatPolicy,
}

impl Default for PickerTuning {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            retry_delay_seconds: 1.0,
            busy_retry_delay_seconds: 0.5,
            repeat_policy: RepeatPolicy::AllowRepeat,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct GameplayTuning {
    pub(crate) agent: AgentTuning,
    pub(crate) behavior: BehaviorTuning,
    pub(crate) picker: PickerTuning,
    pub(crate) trip_timeout_seconds: Option<f32>,
    pub(crate) room_shuffle_interval_seconds: Option<f32>,
}

impl Default for GameplayTuning {
    fn default() -> Self {
        Self {
            agent: AgentTuning::default(),
            behavior: BehaviorTuning::default(),
            picker: PickerTuning::default(),
            trip_timeout_seconds: Some(60.0),
            room_shuffle_interval_seconds: None,
        }
    }
}

impl GameplayTuning {
    pub(crate) fn validate(&self) -> Result<(), TuningError> {
        let agent = &self.agent;
        require_positive("agent.base_speed", agent.base_speed)?;
        require_finite("agent.max_speed", agent.max_speed)?;
        if agent.max_speed < agent.base_speed {
            return Err(invalid("agent.max_speed", "must be >= agent.base_speed"));
        }
        require_non_negative("agent.success_speed_increment", agent.success_speed_increment)?;
        require_finite("agent.failure_multiplier", agent.failure_multiplier)?;
        if agent.failure_multiplier < 1.0 {
            return Err(invalid("agent.failure_multiplier", "must be >= 1"));
        }
        require_positive("agent.stopping_distance", agent.stopping_distance)?;
        require_non_negative("agent.thinking_floor_seconds", agent.thinking_floor_seconds)?;
        require_finite("agent.initial_thinking_seconds", agent.initial_thinking_seconds)?;
        if agent.initial_thinking_seconds < agent.thinking_floor_seconds {
            return Err(invalid(
                "agent.initial_thinking_seconds",
                "must be >= agent.thinking_floor_seconds",
            ));
        }
        require_finite("agent.thinking_decay", agent.thinking_decay)?;
        if agent.thinking_decay <= 0.0 || agent.thinking_decay > 1.0 {
            return Err(invalid("agent.thinking_decay", "must be in (0, 1]"));
        }

        let behavior = &self.behavior;
        require_non_negative("behavior.engaged_seconds", behavior.engaged_seconds)?;
        require_non_negative("behavior.wander_radius", behavior.wander_radius)?;
        require_non_negative(
            "behavior.wander_point_timeout_seconds",
            behavior.wander_point_timeout_seconds,
        )?;
        require_non_negative("behavior.frustration_seconds", behavior.frustration_seconds)?;

        let picker = &self.picker;
        if picker.max_attempts == 0 {
            return Err(invalid("picker.max_attempts", "must be >= 1"));
        }
        require_positive("picker.retry_delay_seconds", picker.retry_delay_seconds)?;
        require_positive(
            "picker.busy_retry_delay_seconds",
            picker.busy_retry_delay_seconds,
        )?;

        if let Some(timeout) = self.trip_timeout_seconds {
            require_positive("trip_timeout_seconds", timeout)?;
        }
        if let Some(interval) = self.room_shuffle_interval_seconds {
            require_positive("room_shuffle_interval_seconds", interval)?;
        }
        Ok(())
    }
}

pub(crate) fn load_tuning_file(path: &Path) -> Result<GameplayTuning, TuningError> {
    let raw = fs::read_to_string(path).map_err(|source| TuningError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_tuning(&raw, path)
}

pub(crate) fn parse_tuning(raw: &str, path: &Path) -> Result<GameplayTuning, TuningError> {
    let mut deserializer = serde_json::Deserializer::from_str(raw);
    let tuning = serde_path_to_error::deserialize::<_, GameplayTuning>(&mut deserializer)
        .map_err(|error| {
            let field_path = error.path().to_string();
            TuningError::Parse {
                path: path.to_path_buf(),
                field_path: if field_path.is_empty() {
                    ".".to_string()
                } else {
                    field_path
                },
                message: error.into_inner().to_string(),
            }
        })?;
    tuning.validate()?;
    Ok(tuning)
}

fn invalid(field: &'static str, reason: &str) -> TuningError {
    TuningError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

fn require_finite(field: &'static str, value: f32) -> Result<(), TuningError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(invalid(field, "must be finite"))
    }
}

fn require_positive(field: &'static str, value: f32) -> Result<(), TuningError> {
    require_finite(field, value)?;
    if value > 0.0 {
        Ok(())
    } else {
        Err(invalid(field, "must be > 0"))
    }
}

fn require_non_negative(field: &'static str, value: f32) -> Result<(), TuningError> {
    require_finite(field, value)?;
    if value >= 0.0 {
        Ok(())
    } else {
        Err(invalid(field, "must be >= 0"))
    }
}
