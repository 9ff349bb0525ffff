/*
 * This file is part of nvfan.
 *
 * Copyright (C) 2025 nvfan contributors
 *
 * nvfan is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * nvfan is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with nvfan. If not, see <https://www.gnu.org/licenses/>.
 */

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::curve::{Curve, CurveBounds};
use crate::error::{NvfanError, Result};
use crate::registry::{FanId, GpuId};

pub const DEFAULT_NVIDIA_SETTINGS: &str = "/usr/bin/nvidia-settings";

/// Which bounds a rate-limited target speed is clamped into
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClampPolicy {
    /// Lowest and highest speed the fan's curve can produce
    #[default]
    Curve,
    /// The fan's configured `min_speed` / `max_speed`
    Fan,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FanConfig {
    /// GPU whose core temperature drives this fan
    pub gpu_id: GpuId,
    #[serde(default = "default_min_speed")]
    pub min_speed: i32,
    #[serde(default = "default_max_speed")]
    pub max_speed: i32,
    /// Temperature (°C) -> fan speed (%)
    pub control_curve: Curve,
}

fn default_min_speed() -> i32 { 0 }
fn default_max_speed() -> i32 { 100 }

/// Axis window of the status graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GraphConfig {
    pub min: i32,
    pub max: i32,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self { min: 30, max: 100 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub fans: BTreeMap<FanId, FanConfig>,
    #[serde(default)]
    pub graph: GraphConfig,
    /// X display number passed to nvidia-settings as `-c :N`
    #[serde(default)]
    pub x_display: Option<u32>,
    #[serde(default = "default_nvidia_settings")]
    pub nvidia_settings: PathBuf,
    #[serde(default)]
    pub curve_bounds: CurveBounds,
    #[serde(default)]
    pub clamp: ClampPolicy,
}

fn default_nvidia_settings() -> PathBuf { PathBuf::from(DEFAULT_NVIDIA_SETTINGS) }

impl Config {
    /// GPUs referenced by any configured fan, ascending
    pub fn gpu_ids(&self) -> Vec<GpuId> {
        let mut gpus: Vec<GpuId> = self.fans.values().map(|f| f.gpu_id).collect();
        gpus.sort();
        gpus.dedup();
        gpus
    }
}

pub fn parse_config(data: &str) -> std::result::Result<Config, serde_json::Error> {
    serde_json::from_str(data)
}

/// Read and parse a configuration file.
///
/// This only checks the shape of the file; hardware and curve checks happen
/// in [`crate::validator`].
pub fn load_config(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path).map_err(|source| NvfanError::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&data).map_err(|source| NvfanError::ConfigParse {
        path: path.to_path_buf(),
        source,
    })
}
