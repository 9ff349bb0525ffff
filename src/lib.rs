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

//! nvfan - curve-driven NVIDIA GPU fan control
//!
//! This library provides the control loop, fan curves, the one-line ASCII
//! status graph and the `nvidia-settings` hardware backend.

pub mod config;
pub mod controller;
pub mod curve;
pub mod error;
pub mod graph;
pub mod hardware;
pub mod nvidia;
pub mod registry;
pub mod validator;

pub use error::{NvfanError, Result};
