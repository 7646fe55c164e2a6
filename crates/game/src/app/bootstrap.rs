use std::env;
use std::path::PathBuf;

use errand_engine::{LayoutRequest, LoopConfig, Scene};
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use super::gameplay::{load_tuning_file, ErrandScene, GameplayTuning, TuningError};

const OVERLAYS_ENV_VAR: &str = "ERRAND_OVERLAYS";
const TUNING_ENV_VAR: &str = "ERRAND_TUNING";
const SEED_ENV_VAR: &str = "ERRAND_SEED";
const MAX_TICKS_ENV_VAR: &str = "ERRAND_MAX_TICKS";
const REALTIME_ENV_VAR: &str = "ERRAND_REALTIME";
const SUMMARY_PATH_ENV_VAR: &str = "ERRAND_SUMMARY_PATH";

const DEFAULT_SEED: u64 = 0x5eed;

#[derive(Debug, Error)]
pub(crate) enum BootstrapError {
    #[error("invalid value for {var}: '{value}' ({reason})")]
    InvalidEnv {
        var: &'static str,
        value: String,
        reason: &'static str,
    },
    #[error(transparent)]
    Tuning(#[from] TuningError),
}

pub(crate) struct AppWiring {
    pub(crate) config: LoopConfig,
    pub(crate) scene: Box<dyn Scene>,
}

#[derive(Debug, Clone, PartialEq)]
struct EnvSettings {
    layout_request: LayoutRequest,
    tuning_path: Option<PathBuf>,
    seed: u64,
    max_ticks: Option<u64>,
    realtime: bool,
    summary_path: Option<PathBuf>,
}

pub(crate) fn build_app() -> Result<AppWiring, BootstrapError> {
    init_tracing();
    info!("=== Errand Startup ===");

    let settings = read_env_settings(|var| env::var(var).ok())?;
    let tuning = match &settings.tuning_path {
        Some(path) => load_tuning_file(path)?,
        None => GameplayTuning::default(),
    };
    info!(
        seed = settings.seed,
        overlays = ?settings.layout_request.enabled_overlays,
        tuning = ?settings.tuning_path,
        max_ticks = ?settings.max_ticks,
        realtime = settings.realtime,
        "bootstrap_config"
    );

    let scene = ErrandScene::new(tuning, settings.seed).with_summary_path(settings.summary_path);
    let config = LoopConfig {
        max_ticks: settings.max_ticks,
        realtime: settings.realtime,
        layout_request: settings.layout_request,
        ..LoopConfig::default()
    };

    Ok(AppWiring {
        config,
        scene: Box::new(scene),
    })
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .init();
}

/// Blank values count as unset.
fn read_env_settings(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<EnvSettings, BootstrapError> {
    let read = |var: &str| {
        lookup(var)
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
    };

    let layout_request = read(OVERLAYS_ENV_VAR)
        .map(|raw| LayoutRequest::from_overlay_list(&raw))
        .unwrap_or_default();
    let seed = match read(SEED_ENV_VAR) {
        Some(raw) => parse_u64(SEED_ENV_VAR, raw)?,
        None => DEFAULT_SEED,
    };
    let max_ticks = match read(MAX_TICKS_ENV_VAR) {
        Some(raw) => Some(parse_u64(MAX_TICKS_ENV_VAR, raw)?),
        None => None,
    };
    let realtime = match read(REALTIME_ENV_VAR) {
        Some(raw) => parse_flag(REALTIME_ENV_VAR, raw)?,
        None => true,
    };

    Ok(EnvSettings {
        layout_request,
        tuning_path: read(TUNING_ENV_VAR).map(PathBuf::from),
        seed,
        max_ticks,
        realtime,
        summary_path: read(SUMMARY_PATH_ENV_VAR).map(PathBuf::from),
    })
}

fn parse_u64(var: &'static str, raw: String) -> Result<u64, BootstrapError> {
    raw.parse::<u64>().map_err(|_| BootstrapError::InvalidEnv {
        var,
        value: raw,
        reason: "expected a non-negative integer",
    })
}

fn parse_flag(var: &'static str, raw: String) -> Result<bool, BootstrapError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(BootstrapError::InvalidEnv {
            var,
            value: raw,
            reason: "expected one of 1/0, true/false, yes/no, on/off",
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;

    use super::*;

    fn settings_from(pairs: &[(&str, &str)]) -> Result<EnvSettings, BootstrapError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        read_env_settings(|var| vars.get(var).cloned())
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let settings = settings_from(&[]).expect("settings");
        assert_eq!(settings.seed, DEFAULT_SEED);
        assert!(settings.realtime);
        assert_eq!(settings.max_ticks, None);
        assert_eq!(settings.tuning_path, None);
        assert_eq!(settings.summary_path, None);
        assert!(settings.layout_request.enabled_overlays.is_empty());
    }

    #[test]
    fn reads_every_variable() {
        let settings = settings_from(&[
            ("ERRAND_OVERLAYS", " lights_out , ,flooded"),
            ("ERRAND_TUNING", "tuning.json"),
            ("ERRAND_SEED", "42"),
            ("ERRAND_MAX_TICKS", "600"),
            ("ERRAND_REALTIME", "Off"),
            ("ERRAND_SUMMARY_PATH", "out/summary.json"),
        ])
        .expect("settings");

        assert_eq!(
            settings.layout_request.enabled_overlays,
            vec!["lights_out".to_string(), "flooded".to_string()]
        );
        assert_eq!(settings.tuning_path, Some(PathBuf::from("tuning.json")));
        assert_eq!(settings.seed, 42);
        assert_eq!(settings.max_ticks, Some(600));
        assert!(!settings.realtime);
        assert_eq!(settings.summary_path, Some(PathBuf::from("out/summary.json")));
    }

    #[test]
    fn blank_values_are_treated_as_unset() {
        let settings = settings_from(&[("ERRAND_SEED", "   "), ("ERRAND_TUNING", "")])
            .expect("settings");
        assert_eq!(settings.seed, DEFAULT_SEED);
        assert_eq!(settings.tuning_path, None);
    }

    #[test]
    fn invalid_numbers_name_the_variable() {
        let err = settings_from(&[("ERRAND_MAX_TICKS", "-5")]).expect_err("negative ticks");
        match err {
            BootstrapError::InvalidEnv { var, value, .. } => {
                assert_eq!(var, "ERRAND_MAX_TICKS");
                assert_eq!(value, "-5");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn realtime_flag_rejects_unknown_words() {
        assert!(settings_from(&[("ERRAND_REALTIME", "yes")])
            .expect("yes")
            .realtime);
        let err = settings_from(&[("ERRAND_REALTIME", "maybe")]).expect_err("maybe");
        assert!(err.to_string().contains("ERRAND_REALTIME"), "{err}");
    }
}
