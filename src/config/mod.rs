use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::CanvasSize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigPathError {
    MissingHomeDirectory,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read engine config: {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse engine config: {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

const APP_DIR: &str = "tilepaint";
const APP_CONFIG_FILE: &str = "config.json";
const MIN_TILE_SIZE: u32 = 16;

pub const DEFAULT_CANVAS_WIDTH: u32 = 2048;
pub const DEFAULT_CANVAS_HEIGHT: u32 = 2048;
pub const DEFAULT_TILE_SIZE: u32 = 512;
pub const DEFAULT_RENDER_BATCH_SIZE: usize = 4;
pub const DEFAULT_MAX_BACKGROUND_TILES: usize = 64;
pub const DEFAULT_HISTORY_CAP: usize = crate::history::DEFAULT_HISTORY_CAP;
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 50;
pub const DEFAULT_FILL_MAX_ITERATIONS: usize = 4_000_000;
pub const DEFAULT_FILL_ALGORITHM_THRESHOLD: usize = 10_000;

/// Flood-fill tuning shared by every fill action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FillSettings {
    pub tolerance: u8,
    pub max_iterations: usize,
    pub algorithm_threshold: usize,
}

impl Default for FillSettings {
    fn default() -> Self {
        Self {
            tolerance: 0,
            max_iterations: DEFAULT_FILL_MAX_ITERATIONS,
            algorithm_threshold: DEFAULT_FILL_ALGORITHM_THRESHOLD,
        }
    }
}

/// Hit-test geometry for the interactive selection handles, in display pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionSettings {
    pub handle_radius: f64,
    pub rotate_handle_offset: f64,
    pub min_scale: f64,
}

impl Default for SelectionSettings {
    fn default() -> Self {
        Self {
            handle_radius: 12.0,
            rotate_handle_offset: 32.0,
            min_scale: 0.05,
        }
    }
}

/// Engine-level settings from `config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub tile_size: u32,
    pub render_batch_size: usize,
    pub max_background_tiles: usize,
    pub history_cap: usize,
    pub cache_max_entries: usize,
    pub fill: FillSettings,
    pub selection: SelectionSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            canvas_width: DEFAULT_CANVAS_WIDTH,
            canvas_height: DEFAULT_CANVAS_HEIGHT,
            tile_size: DEFAULT_TILE_SIZE,
            render_batch_size: DEFAULT_RENDER_BATCH_SIZE,
            max_background_tiles: DEFAULT_MAX_BACKGROUND_TILES,
            history_cap: DEFAULT_HISTORY_CAP,
            cache_max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            fill: FillSettings::default(),
            selection: SelectionSettings::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_canvas(width: u32, height: u32) -> Self {
        Self {
            canvas_width: width,
            canvas_height: height,
            ..Self::default()
        }
    }

    pub const fn canvas_size(&self) -> CanvasSize {
        CanvasSize::new(self.canvas_width, self.canvas_height)
    }

    /// Raises out-of-range values to the smallest usable setting.
    pub fn sanitized(mut self) -> Self {
        self.canvas_width = self.canvas_width.max(1);
        self.canvas_height = self.canvas_height.max(1);
        self.tile_size = self.tile_size.max(MIN_TILE_SIZE);
        self.render_batch_size = self.render_batch_size.max(1);
        self.max_background_tiles = self.max_background_tiles.max(1);
        self.history_cap = self.history_cap.max(1);
        self.cache_max_entries = self.cache_max_entries.max(1);
        self.fill.max_iterations = self.fill.max_iterations.max(1);
        if !self.selection.min_scale.is_finite() || self.selection.min_scale <= 0.0 {
            self.selection.min_scale = SelectionSettings::default().min_scale;
        }
        self
    }
}

pub fn load_engine_config() -> EngineConfig {
    let (xdg_config_home, home) = config_env_dirs();
    load_engine_config_with(xdg_config_home.as_deref(), home.as_deref())
}

fn load_engine_config_with(xdg_config_home: Option<&Path>, home: Option<&Path>) -> EngineConfig {
    let path = match app_config_path(APP_DIR, APP_CONFIG_FILE, xdg_config_home, home) {
        Ok(p) => p,
        Err(_) => return EngineConfig::default(),
    };
    if !path.exists() {
        return EngineConfig::default();
    }
    load_from_path(&path).unwrap_or_else(|err| {
        tracing::warn!(%err, ?path, "failed to load config.json; using defaults");
        EngineConfig::default()
    })
}

pub fn load_from_path(path: &Path) -> ConfigResult<EngineConfig> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: EngineConfig =
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(config.sanitized())
}

pub(crate) fn config_env_dirs() -> (Option<PathBuf>, Option<PathBuf>) {
    (
        std::env::var_os("XDG_CONFIG_HOME").map(PathBuf::from),
        std::env::var_os("HOME").map(PathBuf::from),
    )
}

pub(crate) fn app_config_path(
    app_dir: &str,
    file_name: &str,
    xdg_config_home: Option<&Path>,
    home: Option<&Path>,
) -> Result<PathBuf, ConfigPathError> {
    let mut path = xdg_root(xdg_config_home, home, ".config")?;
    path.push(app_dir);
    path.push(file_name);
    Ok(path)
}

pub(crate) fn app_data_path(
    app_dir: &str,
    xdg_data_home: Option<&Path>,
    home: Option<&Path>,
) -> Result<PathBuf, ConfigPathError> {
    let mut path = xdg_root(xdg_data_home, home, ".local/share")?;
    path.push(app_dir);
    Ok(path)
}

fn xdg_root(
    xdg_dir: Option<&Path>,
    home: Option<&Path>,
    home_fallback: &str,
) -> Result<PathBuf, ConfigPathError> {
    if let Some(xdg) = xdg_dir.filter(|path| !path.as_os_str().is_empty()) {
        return Ok(xdg.to_path_buf());
    }

    let home = home.ok_or(ConfigPathError::MissingHomeDirectory)?;
    Ok(home.join(home_fallback))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config_root(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("tilepaint-config-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&path);
        std::fs::create_dir_all(path.join(APP_DIR)).expect("config dir should be creatable");
        path
    }

    #[test]
    fn app_config_path_prefers_xdg_config_home() {
        let path = app_config_path(
            "tilepaint",
            "config.json",
            Some(Path::new("/tmp/config-root")),
            Some(Path::new("/tmp/home")),
        )
        .expect("path should resolve");

        assert_eq!(path, PathBuf::from("/tmp/config-root/tilepaint/config.json"));
    }

    #[test]
    fn app_config_path_falls_back_to_home_dot_config() {
        let path = app_config_path("tilepaint", "config.json", None, Some(Path::new("/tmp/home")))
            .expect("path should resolve");

        assert_eq!(path, PathBuf::from("/tmp/home/.config/tilepaint/config.json"));
    }

    #[test]
    fn app_data_path_falls_back_to_local_share() {
        let path = app_data_path("tilepaint", Some(Path::new("")), Some(Path::new("/tmp/home")))
            .expect("path should resolve");

        assert_eq!(path, PathBuf::from("/tmp/home/.local/share/tilepaint"));
    }

    #[test]
    fn app_config_path_errors_when_home_missing_and_xdg_unset() {
        let error = app_config_path("tilepaint", "config.json", None, None).unwrap_err();
        assert_eq!(error, ConfigPathError::MissingHomeDirectory);
    }

    #[test]
    fn partial_config_keeps_defaults_for_missing_fields() {
        let root = temp_config_root("partial");
        std::fs::write(
            root.join(APP_DIR).join(APP_CONFIG_FILE),
            r#"{ "tile_size": 256, "fill": { "tolerance": 12 } }"#,
        )
        .expect("config should be writable");

        let config = load_engine_config_with(Some(root.as_path()), None);
        assert_eq!(config.tile_size, 256);
        assert_eq!(config.fill.tolerance, 12);
        assert_eq!(config.fill.algorithm_threshold, DEFAULT_FILL_ALGORITHM_THRESHOLD);
        assert_eq!(config.history_cap, DEFAULT_HISTORY_CAP);

        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn malformed_config_falls_back_to_defaults() {
        let root = temp_config_root("malformed");
        std::fs::write(root.join(APP_DIR).join(APP_CONFIG_FILE), "{ not json")
            .expect("config should be writable");

        assert_eq!(load_engine_config_with(Some(root.as_path()), None), EngineConfig::default());
        let err = load_from_path(&root.join(APP_DIR).join(APP_CONFIG_FILE))
            .expect_err("explicit load should surface parse errors");
        assert!(matches!(err, ConfigError::Parse { .. }));

        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn sanitized_raises_zero_values() {
        let config = EngineConfig {
            tile_size: 0,
            render_batch_size: 0,
            history_cap: 0,
            cache_max_entries: 0,
            ..EngineConfig::default()
        }
        .sanitized();
        assert_eq!(config.tile_size, MIN_TILE_SIZE);
        assert_eq!(config.render_batch_size, 1);
        assert_eq!(config.history_cap, 1);
        assert_eq!(config.cache_max_entries, 1);
    }
}
