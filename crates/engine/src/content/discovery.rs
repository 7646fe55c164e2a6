use std::collections::HashSet;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::AppPaths;

pub const BASE_LAYER_ID: &str = "base";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayoutRequest {
    /// Overlay directory names under `overlays/`, applied in order after the base layer.
    pub enabled_overlays: Vec<String>,
}

impl LayoutRequest {
    /// Parses a comma separated overlay list; blank entries are skipped.
    pub fn from_overlay_list(raw: &str) -> Self {
        Self {
            enabled_overlays: raw
                .split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub(crate) enum LayerDiscoveryError {
    #[error("enabled overlay id must not be empty")]
    EmptyOverlayId,
    #[error("overlay '{layer_id}' is enabled more than once")]
    DuplicateOverlay { layer_id: String },
    #[error("overlay '{layer_id}' not found at {}", expected_dir.display())]
    OverlayMissing {
        layer_id: String,
        expected_dir: PathBuf,
    },
    #[error("base layout directory not found at {}", expected_dir.display())]
    BaseMissing { expected_dir: PathBuf },
}

#[derive(Debug, Clone)]
pub(crate) struct LayerSource {
    pub layer_id: String,
    pub source_dir: PathBuf,
}

pub(crate) fn discover_layer_sources(
    app_paths: &AppPaths,
    request: &LayoutRequest,
) -> Result<Vec<LayerSource>, LayerDiscoveryError> {
    if !app_paths.base_layout_dir.is_dir() {
        return Err(LayerDiscoveryError::BaseMissing {
            expected_dir: app_paths.base_layout_dir.clone(),
        });
    }

    let mut seen = HashSet::<String>::new();
    let mut sources = vec![LayerSource {
        layer_id: BASE_LAYER_ID.to_string(),
        source_dir: app_paths.base_layout_dir.clone(),
    }];

    for layer_id in &request.enabled_overlays {
        let trimmed = layer_id.trim();
        if trimmed.is_empty() {
            return Err(LayerDiscoveryError::EmptyOverlayId);
        }
        if !seen.insert(trimmed.to_string()) {
            return Err(LayerDiscoveryError::DuplicateOverlay {
                layer_id: trimmed.to_string(),
            });
        }
        let overlay_dir = app_paths.overlays_dir.join(trimmed);
        ensure_dir_exists(trimmed, &overlay_dir)?;
        sources.push(LayerSource {
            layer_id: trimmed.to_string(),
            source_dir: overlay_dir,
        });
    }

    Ok(sources)
}

fn ensure_dir_exists(layer_id: &str, path: &Path) -> Result<(), LayerDiscoveryError> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(LayerDiscoveryError::OverlayMissing {
            layer_id: layer_id.to_string(),
            expected_dir: path.to_path_buf(),
        })
    }
}
