// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use prism_render::{RenderSettings, RenderSize};
use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct WindowCfg {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            width: RenderSize::DEFAULT.width,
            height: RenderSize::DEFAULT.height,
            title: "prism".to_owned(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RenderCfg {
    pub frame_timeout_ms: u64,
    /// Unset means the SPIR-V compiled with the backend.
    pub shader_dir: Option<PathBuf>,
}

impl Default for RenderCfg {
    fn default() -> Self {
        let d = RenderSettings::default();
        RenderCfg {
            frame_timeout_ms: u64::try_from(d.frame_timeout.as_millis()).unwrap_or(u64::MAX),
            shader_dir: d.shader_dir,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SceneCfg {
    pub monkey_mesh: PathBuf,
    pub grid_radius: i32,
}

impl Default for SceneCfg {
    fn default() -> Self {
        let d = RenderSettings::default();
        SceneCfg {
            monkey_mesh: d.monkey_mesh,
            grid_radius: d.grid_radius,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(default)]
pub struct AppCfg {
    pub window: WindowCfg,
    pub render: RenderCfg,
    pub scene: SceneCfg,
}

impl AppCfg {
    pub fn window_size(&self) -> RenderSize {
        RenderSize {
            width: self.window.width.max(1),
            height: self.window.height.max(1),
        }
    }

    pub fn into_settings(self) -> RenderSettings {
        RenderSettings {
            app_name: self.window.title,
            // A zero timeout would make every frame a timeout.
            frame_timeout: Duration::from_millis(self.render.frame_timeout_ms.max(1)),
            shader_dir: self.render.shader_dir,
            monkey_mesh: self.scene.monkey_mesh,
            grid_radius: self.scene.grid_radius.max(0),
        }
    }
}

/// Reads the config file. Missing means defaults; unparsable means defaults
/// plus a warning.
pub fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => match toml::from_str::<AppCfg>(&s) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!("{}: {e}; using defaults", path.display());
                AppCfg::default()
            }
        },
        Err(_) => {
            debug!("{} not found, using defaults", path.display());
            AppCfg::default()
        }
    }
}
