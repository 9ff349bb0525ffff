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

//! Fan control loop
//!
//! Once per tick, in order:
//!
//! 1. **Sample**: one batched query of every GPU temperature and every fan's
//!    current and target speed.
//! 2. **Compute**: map each fan's GPU temperature through its curve, let the
//!    speed fall by at most 1% per tick, clamp into the allowed range.
//! 3. **Actuate**: one batched assignment of every fan's target speed.
//! 4. **Render**: print one status line with the ASCII graph.
//! 5. Sleep.
//!
//! Fan control is taken with [`FanController::enable`], which hands back a
//! [`ControlGuard`]. Dropping the guard gives control back to the driver, so
//! every way out of [`FanController::run`] (error return or panic) releases
//! the fans.

use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{error, info, trace};

use crate::config::{ClampPolicy, Config};
use crate::error::{NvfanError, Result};
use crate::graph::{AsciiGraph, FAN_SPEED_RUNE, GPU_TEMP_RUNE};
use crate::hardware::{Attribute, Hardware};
use crate::registry::{Actuator, DeviceRegistry, GpuId};

pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Min and max joined together: keeps `x` within `[min_x, max_x]`.
///
/// Unlike `Ord::clamp` this never panics when `min_x > max_x`; the lower
/// bound wins.
pub fn min_max(min_x: i32, x: i32, max_x: i32) -> i32 {
    min_x.max(x.min(max_x))
}

/// Next target speed for a fan whose GPU reads `temperature`.
///
/// Rising temperature is followed immediately; falling temperature lowers
/// the speed by at most 1% per tick. The result is then clamped, because the
/// reported current speed may lie outside anything the curve produces.
pub fn target_speed(actuator: &Actuator, temperature: i32, policy: ClampPolicy) -> Result<i32> {
    let curve = &actuator.curve;
    let raw = curve.interpolate(temperature)?;
    let speed = raw.max(actuator.current_speed.saturating_sub(1));

    let (low, high) = match policy {
        ClampPolicy::Curve => (curve.floor()?, curve.ceiling()?),
        ClampPolicy::Fan => (actuator.min_speed, actuator.max_speed),
    };
    Ok(min_max(low, speed, high))
}

fn set_control_state<H: Hardware + ?Sized>(hardware: &H, gpus: &[GpuId], state: i32) -> Result<()> {
    let assignments: Vec<(Attribute, i32)> = gpus
        .iter()
        .map(|&gpu| (Attribute::GpuFanControlState(gpu), state))
        .collect();
    hardware.write_attributes(&assignments)
}

/// Put every GPU's fans under software control
pub fn enable_fan_control<H: Hardware + ?Sized>(hardware: &H, gpus: &[GpuId]) -> Result<()> {
    info!("Enabling fan control on {} GPU(s)", gpus.len());
    set_control_state(hardware, gpus, 1)
}

/// Hand every GPU's fans back to the driver
pub fn disable_fan_control<H: Hardware + ?Sized>(hardware: &H, gpus: &[GpuId]) -> Result<()> {
    info!("Disabling fan control on {} GPU(s)", gpus.len());
    set_control_state(hardware, gpus, 0)
}

/// Fan control held by the process; released on drop
#[must_use = "fan control is released as soon as the guard is dropped"]
pub struct ControlGuard<H: Hardware + ?Sized> {
    hardware: Arc<H>,
    gpus: Vec<GpuId>,
    released: bool,
}

impl<H: Hardware + ?Sized> ControlGuard<H> {
    /// Release control now and report the outcome
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        disable_fan_control(&*self.hardware, &self.gpus)
    }
}

impl<H: Hardware + ?Sized> Drop for ControlGuard<H> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = disable_fan_control(&*self.hardware, &self.gpus) {
            error!("Failed to give fan control back to the driver: {}", e);
        }
    }
}

pub struct FanController<H: Hardware + ?Sized> {
    hardware: Arc<H>,
    registry: DeviceRegistry,
    graph: AsciiGraph,
    clamp: ClampPolicy,
    interval: Duration,
}

impl<H: Hardware + ?Sized> FanController<H> {
    pub fn new(config: &Config, hardware: Arc<H>) -> Result<Self> {
        Ok(Self {
            hardware,
            registry: DeviceRegistry::from_config(config),
            graph: AsciiGraph::for_status(config.graph.min, config.graph.max)?,
            clamp: config.clamp,
            interval: TICK_INTERVAL,
        })
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn enable(&self) -> Result<ControlGuard<H>> {
        let gpus = self.registry.gpu_ids();
        enable_fan_control(&*self.hardware, &gpus)?;
        Ok(ControlGuard { hardware: self.hardware.clone(), gpus, released: false })
    }

    /// Takes fan control and runs the control loop. Only returns on error.
    pub fn run<W: Write>(&mut self, out: &mut W) -> Result<()> {
        let _guard = self.enable()?;
        self.control_loop(out)
    }

    /// Header, then one tick per interval. Fan control must already be
    /// held by the caller.
    pub fn control_loop<W: Write>(&mut self, out: &mut W) -> Result<()> {
        writeln!(out, "{}", self.header_line())?;
        loop {
            self.tick(out)?;
            thread::sleep(self.interval);
        }
    }

    /// One full sample / compute / actuate / render cycle
    pub fn tick<W: Write>(&mut self, out: &mut W) -> Result<()> {
        self.update_stats()?;
        self.calculate_target_fan_speeds()?;
        self.push_target_fan_speeds()?;
        writeln!(out, "{}", self.status_line())?;
        out.flush()?;
        Ok(())
    }

    /// Pull temperatures and fan speeds from the hardware
    pub fn update_stats(&mut self) -> Result<()> {
        let gpus = self.registry.gpu_ids();
        let fans = self.registry.fan_ids();

        let mut attributes: Vec<Attribute> = gpus.iter().map(|&g| Attribute::GpuCoreTemp(g)).collect();
        for &fan in &fans {
            attributes.push(Attribute::FanCurrentSpeed(fan));
            attributes.push(Attribute::FanTargetSpeed(fan));
        }

        let values = self.hardware.read_attributes(&attributes)?;
        if values.len() < attributes.len() {
            return Err(NvfanError::ShortRead {
                requested: attributes.len(),
                received: values.len(),
            });
        }

        let (temps, speeds) = values.split_at(gpus.len());
        for ((_, sensor), &temp) in self.registry.sensors_mut().zip(temps) {
            sensor.temperature = temp;
        }
        for ((_, fan), pair) in self.registry.actuators_mut().zip(speeds.chunks_exact(2)) {
            fan.current_speed = pair[0];
            fan.target_speed = pair[1];
        }
        Ok(())
    }

    pub fn calculate_target_fan_speeds(&mut self) -> Result<()> {
        let temps = self
            .registry
            .fan_ids()
            .into_iter()
            .map(|fan| self.registry.temperature_for(fan))
            .collect::<Result<Vec<i32>>>()?;

        let clamp = self.clamp;
        for ((id, fan), temp) in self.registry.actuators_mut().zip(temps) {
            fan.target_speed = target_speed(fan, temp, clamp)?;
            trace!("fan {}: {}C current {}% -> target {}%", id, temp, fan.current_speed, fan.target_speed);
        }
        Ok(())
    }

    pub fn push_target_fan_speeds(&self) -> Result<()> {
        let assignments: Vec<(Attribute, i32)> = self
            .registry
            .actuators()
            .map(|(id, fan)| (Attribute::FanTargetSpeed(id), fan.target_speed))
            .collect();
        self.hardware.write_attributes(&assignments)
    }

    pub fn header_line(&self) -> String {
        let mut headers: Vec<String> = Vec::new();
        headers.extend(self.registry.sensors().map(|(id, _)| format!("GPU {} TEMP", id)));
        headers.extend(self.registry.actuators().map(|(id, _)| format!("FAN {} CURRENT SPEED", id)));
        headers.extend(self.registry.actuators().map(|(id, _)| format!("FAN {} TARGET SPEED", id)));
        headers.push("GRAPH".to_string());
        headers.join(",")
    }

    /// Render the current readings; starts a new graph line
    pub fn status_line(&mut self) -> String {
        self.graph.reset();

        let mut values: Vec<String> = Vec::new();
        for (_, gpu) in self.registry.sensors() {
            values.push(format!("{:>3}", gpu.temperature));
            self.graph.set_mark(gpu.temperature, GPU_TEMP_RUNE);
        }
        for (_, fan) in self.registry.actuators() {
            values.push(format!("{:>3}", fan.current_speed));
            self.graph.set_mark(fan.current_speed, FAN_SPEED_RUNE);
        }
        for (_, fan) in self.registry.actuators() {
            values.push(format!("{:>3}", fan.target_speed));
        }
        values.push(self.graph.render());
        values.join(",")
    }
}
