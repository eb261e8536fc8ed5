// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::path::Path;

use frameline_render_vk::{ChainConfig, PresentPolicy, MAX_FRAMES_IN_FLIGHT};
use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Debug, Deserialize, Default)]
pub struct AppCfg {
    #[serde(default)]
    pub render: RenderCfg,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct RenderCfg {
    #[serde(default = "default_clear")]
    pub clear_color: [f32; 4],
    #[serde(default)]
    pub present_mode: PresentModeCfg,
    #[serde(default = "default_frames_in_flight")]
    pub frames_in_flight: usize,
    #[serde(default = "default_validation")]
    pub validation: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PresentModeCfg {
    #[default]
    Fifo,
    Mailbox,
}

impl From<PresentModeCfg> for PresentPolicy {
    fn from(mode: PresentModeCfg) -> Self {
        match mode {
            PresentModeCfg::Fifo => PresentPolicy::Fifo,
            PresentModeCfg::Mailbox => PresentPolicy::Mailbox,
        }
    }
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: default_clear(),
            present_mode: PresentModeCfg::default(),
            frames_in_flight: default_frames_in_flight(),
            validation: default_validation(),
        }
    }
}

impl RenderCfg {
    pub fn chain_config(&self) -> ChainConfig {
        ChainConfig {
            frames_in_flight: self.frames_in_flight,
            present_policy: self.present_mode.into(),
        }
    }
}

fn default_clear() -> [f32; 4] {
    [0.02, 0.02, 0.04, 1.0]
}
fn default_frames_in_flight() -> usize {
    MAX_FRAMES_IN_FLIGHT
}
fn default_validation() -> bool {
    cfg!(debug_assertions)
}

pub fn parse_cfg(text: &str) -> Result<AppCfg, toml::de::Error> {
    toml::from_str::<AppCfg>(text)
}

/// Missing file means defaults; a malformed one is reported and ignored.
pub fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => parse_cfg(&s).unwrap_or_else(|e| {
            warn!("ignoring {}: {e}", path.display());
            AppCfg::default()
        }),
        Err(e) => {
            debug!("no config at {} ({e}), using defaults", path.display());
            AppCfg::default()
        }
    }
}
