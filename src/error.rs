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

//! Unified error handling for nvfan
//!
//! Every failure in this crate is terminal for the process: configuration
//! problems stop it before any fan is touched, hardware problems stop the
//! control loop. The variants exist so the message carries enough context
//! (fan id, offending curve points, expected vs. actual owner) to fix the
//! configuration or the driver setup.

use std::io;
use std::path::PathBuf;

use crate::curve::CurvePoint;
use crate::registry::{FanId, GpuId};

/// Result type alias using NvfanError
pub type Result<T> = std::result::Result<T, NvfanError>;

#[derive(thiserror::Error, Debug)]
pub enum NvfanError {
    // ============================================================================
    // I/O and Configuration Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    // ============================================================================
    // Curve Errors
    // ============================================================================
    #[error("Cannot interpolate on a curve with no anchors")]
    EmptyCurve,

    #[error("Fan {fan}'s control curve doesn't contain any points")]
    FanCurveEmpty { fan: FanId },

    #[error("Fan {fan}'s control curve contains {point}, which {reason} (previous point {previous})")]
    InvalidCurve {
        fan: FanId,
        point: CurvePoint,
        previous: CurvePoint,
        reason: String,
    },

    // ============================================================================
    // Topology Errors
    // ============================================================================
    #[error("Missing config for fan {0}, which exists according to nvidia-settings")]
    UnconfiguredFan(FanId),

    #[error("Configuration for fan {0} found, but fan {0} does not exist according to nvidia-settings")]
    UnknownFan(FanId),

    #[error("Fan {fan} is configured to monitor GPU {declared}'s temperature, but belongs to GPU {actual} according to nvidia-settings")]
    OwnerMismatch {
        fan: FanId,
        declared: GpuId,
        actual: GpuId,
    },

    // ============================================================================
    // Hardware Errors
    // ============================================================================
    #[error("Failed to execute {command}: {reason}")]
    Command {
        command: String,
        reason: String,
    },

    #[error("Short read from nvidia-settings: requested {requested} attributes, got {received}")]
    ShortRead {
        requested: usize,
        received: usize,
    },

    #[error("Failed to parse attribute value '{value}': {reason}")]
    AttributeParse {
        value: String,
        reason: String,
    },
}

impl NvfanError {
    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a command failure for the given argv
    pub fn command(argv: &[String], reason: impl Into<String>) -> Self {
        Self::Command {
            command: argv.join(" "),
            reason: reason.into(),
        }
    }

    /// True for failures that are caught before any fan is actuated
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigRead { .. }
                | Self::ConfigParse { .. }
                | Self::Config(_)
                | Self::EmptyCurve
                | Self::FanCurveEmpty { .. }
                | Self::InvalidCurve { .. }
                | Self::UnconfiguredFan(_)
                | Self::UnknownFan(_)
                | Self::OwnerMismatch { .. }
        )
    }
}
