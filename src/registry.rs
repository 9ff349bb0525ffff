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

//! In-memory device registry
//!
//! Holds every GPU temperature sensor and every fan the controller drives.
//! Built once from a validated configuration and never resized afterwards.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::curve::Curve;
use crate::error::{NvfanError, Result};

/// nvidia-settings GPU target index (`[gpu:N]`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GpuId(pub u32);

/// nvidia-settings fan target index (`[fan:N]`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FanId(pub u32);

impl fmt::Display for GpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for FanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Temperature source, last reading in °C
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sensor {
    pub temperature: i32,
}

/// Controllable fan
#[derive(Debug, Clone)]
pub struct Actuator {
    pub gpu: GpuId,
    pub min_speed: i32,
    pub max_speed: i32,
    /// Speed last reported by the hardware
    pub current_speed: i32,
    /// Speed last computed by the controller
    pub target_speed: i32,
    pub curve: Arc<Curve>,
}

impl Actuator {
    pub fn new(gpu: GpuId, min_speed: i32, max_speed: i32, curve: Arc<Curve>) -> Self {
        Self {
            gpu,
            min_speed,
            max_speed,
            current_speed: 0,
            target_speed: 0,
            curve,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    sensors: BTreeMap<GpuId, Sensor>,
    actuators: BTreeMap<FanId, Actuator>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from a configuration.
    ///
    /// Every GPU referenced by a fan gets a sensor.
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::new();
        for (&fan, fan_cfg) in &config.fans {
            registry.add_fan(
                fan,
                Actuator::new(
                    fan_cfg.gpu_id,
                    fan_cfg.min_speed,
                    fan_cfg.max_speed,
                    Arc::new(fan_cfg.control_curve.clone()),
                ),
            );
        }
        registry
    }

    pub fn add_fan(&mut self, fan: FanId, actuator: Actuator) {
        self.sensors.entry(actuator.gpu).or_default();
        self.actuators.insert(fan, actuator);
    }

    pub fn gpu_ids(&self) -> Vec<GpuId> {
        self.sensors.keys().copied().collect()
    }

    pub fn fan_ids(&self) -> Vec<FanId> {
        self.actuators.keys().copied().collect()
    }

    pub fn sensors(&self) -> impl Iterator<Item = (GpuId, &Sensor)> {
        self.sensors.iter().map(|(&id, s)| (id, s))
    }

    pub fn actuators(&self) -> impl Iterator<Item = (FanId, &Actuator)> {
        self.actuators.iter().map(|(&id, a)| (id, a))
    }

    pub fn sensors_mut(&mut self) -> impl Iterator<Item = (GpuId, &mut Sensor)> {
        self.sensors.iter_mut().map(|(&id, s)| (id, s))
    }

    pub fn actuators_mut(&mut self) -> impl Iterator<Item = (FanId, &mut Actuator)> {
        self.actuators.iter_mut().map(|(&id, a)| (id, a))
    }

    /// Temperature of the GPU that owns `fan`
    pub fn temperature_for(&self, fan: FanId) -> Result<i32> {
        let gpu = self.actuators.get(&fan).ok_or(NvfanError::UnknownFan(fan))?.gpu;
        self.sensors
            .get(&gpu)
            .map(|s| s.temperature)
            .ok_or_else(|| NvfanError::config(format!("Fan {}'s GPU {} has no temperature sensor", fan, gpu)))
    }
}
