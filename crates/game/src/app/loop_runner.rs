use std::process::ExitCode;

use errand_engine::{run_app_with_metrics, MetricsHandle, RunOutcome};
use tracing::{error, info};

use super::bootstrap::AppWiring;

pub(crate) fn run(app: AppWiring) -> ExitCode {
    let metrics = MetricsHandle::default();
    let outcome = match run_app_with_metrics(app.config, app.scene, metrics.clone()) {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(error = %err, "startup_failed");
            return ExitCode::FAILURE;
        }
    };

    let reason = match outcome {
        RunOutcome::QuitRequested { .. } => "scene_quit",
        RunOutcome::TickBudgetReached { .. } => "tick_budget",
    };
    let last = metrics.snapshot();
    info!(
        reason,
        ticks_run = outcome.ticks_run(),
        last_tps = last.tps,
        last_tick_time_ms = last.tick_time_ms,
        "run_finished"
    );
    ExitCode::SUCCESS
}
