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

//! Hardware access seam
//!
//! The controller and validator only ever talk to the GPU through this
//! trait. Reads and writes are batched: one call covers every attribute a
//! tick needs, since each call may be a separate process invocation.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::Result;
use crate::registry::{FanId, GpuId};

/// GPU or fan attribute understood by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    /// Core temperature in °C
    GpuCoreTemp(GpuId),
    /// 1 = fan speed under software control, 0 = driver default
    GpuFanControlState(GpuId),
    /// Speed the fan is actually spinning at, in %
    FanCurrentSpeed(FanId),
    /// Speed the fan is asked to spin at, in %
    FanTargetSpeed(FanId),
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GpuCoreTemp(gpu) => write!(f, "[gpu:{}]/GPUCoreTemp", gpu),
            Self::GpuFanControlState(gpu) => write!(f, "[gpu:{}]/GPUFanControlState", gpu),
            Self::FanCurrentSpeed(fan) => write!(f, "[fan:{}]/GPUCurrentFanSpeed", fan),
            Self::FanTargetSpeed(fan) => write!(f, "[fan:{}]/GPUTargetFanSpeed", fan),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait Hardware: Send + Sync {
    /// Query every attribute in one call.
    ///
    /// Returns one value per attribute, in the same order. Fewer values than
    /// requested is an error.
    fn read_attributes(&self, attributes: &[Attribute]) -> Result<Vec<i32>>;

    /// Assign every attribute in one call
    fn write_attributes(&self, assignments: &[(Attribute, i32)]) -> Result<()>;

    /// Live topology: each fan and the GPU it belongs to
    fn list_devices(&self) -> Result<BTreeMap<FanId, GpuId>>;
}
