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

//! Startup checks
//!
//! Runs once before any fan is touched. Every failure is fatal.

use std::collections::BTreeMap;

use tracing::debug;

use crate::config::Config;
use crate::error::{NvfanError, Result};
use crate::hardware::Hardware;
use crate::registry::{FanId, GpuId};

/// Smallest allowed graph window, in axis units
pub const MIN_GRAPH_SPAN: i32 = 10;
/// Largest allowed graph window, in axis units
pub const MAX_GRAPH_SPAN: i32 = 500;

/// Check the graph window
pub fn validate_graph(config: &Config) -> Result<()> {
    let graph = &config.graph;
    if graph.max < graph.min {
        return Err(NvfanError::config(format!(
            "Graph maximum '{}' is less than the graph minimum '{}'",
            graph.max, graph.min
        )));
    }
    if (graph.max as i64) - (graph.min as i64) < MIN_GRAPH_SPAN as i64 {
        return Err(NvfanError::config(format!(
            "Graph minimum '{}' and maximum '{}' are less than {}C away from each other",
            graph.min, graph.max, MIN_GRAPH_SPAN
        )));
    }
    if (graph.max as i64) - (graph.min as i64) > MAX_GRAPH_SPAN as i64 {
        return Err(NvfanError::config(format!(
            "Graph minimum '{}' and maximum '{}' are more than {}C away from each other",
            graph.min, graph.max, MAX_GRAPH_SPAN
        )));
    }
    Ok(())
}

/// Check every fan's speed bounds and control curve
pub fn validate_fans(config: &Config) -> Result<()> {
    let bounds = &config.curve_bounds;
    if bounds.temp_min > bounds.temp_max || bounds.speed_min > bounds.speed_max {
        return Err(NvfanError::config(format!("invalid curve bounds {:?}", bounds)));
    }

    for (&fan, fan_cfg) in &config.fans {
        if fan_cfg.min_speed > fan_cfg.max_speed {
            return Err(NvfanError::config(format!(
                "Fan {}'s min_speed {}% is above its max_speed {}%",
                fan, fan_cfg.min_speed, fan_cfg.max_speed
            )));
        }
        for speed in [fan_cfg.min_speed, fan_cfg.max_speed] {
            if speed < bounds.speed_min || speed > bounds.speed_max {
                return Err(NvfanError::config(format!(
                    "Fan {}'s speed bound {}% is outside {}%..{}%",
                    fan, speed, bounds.speed_min, bounds.speed_max
                )));
            }
        }

        if fan_cfg.control_curve.is_empty() {
            return Err(NvfanError::FanCurveEmpty { fan });
        }
        fan_cfg
            .control_curve
            .validate(bounds)
            .map_err(|v| NvfanError::InvalidCurve {
                fan,
                point: v.point,
                previous: v.previous,
                reason: v.reason,
            })?;
    }
    Ok(())
}

/// Check the configured fans against the live topology
pub fn validate_topology(config: &Config, live: &BTreeMap<FanId, GpuId>) -> Result<()> {
    for &fan in live.keys() {
        if !config.fans.contains_key(&fan) {
            return Err(NvfanError::UnconfiguredFan(fan));
        }
    }

    for (&fan, fan_cfg) in &config.fans {
        let Some(&actual) = live.get(&fan) else {
            return Err(NvfanError::UnknownFan(fan));
        };
        if fan_cfg.gpu_id != actual {
            return Err(NvfanError::OwnerMismatch {
                fan,
                declared: fan_cfg.gpu_id,
                actual,
            });
        }
    }
    Ok(())
}

/// Full startup check, querying the hardware for its topology
pub fn validate_config<H: Hardware + ?Sized>(config: &Config, hardware: &H) -> Result<()> {
    validate_graph(config)?;
    let live = hardware.list_devices()?;
    debug!("live topology: {:?}", live);
    validate_topology(config, &live)?;
    validate_fans(config)
}
