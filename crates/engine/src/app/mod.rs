mod loop_runner;
mod metrics;
mod scene;

pub use loop_runner::{
    run_app, run_app_with_metrics, run_scene_host, AppError, LoopConfig, RunOutcome,
    SLOW_FRAME_ENV_VAR,
};
pub use metrics::{LoopMetricsSnapshot, MetricsHandle};
pub use scene::{
    DebugInfoSnapshot, Entity, EntityId, EntityTag, Scene, SceneCommand, SceneDebugCommand,
    SceneDebugCommandResult, SceneHost, SceneWorld, Transform, Vec2,
};
