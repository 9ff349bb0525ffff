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

//! One-line ASCII graph
//!
//! Each status line carries a strip of characters covering the axis window
//! `[min, max]`, one character per integer. Every `grid_size`-th line is a
//! grid line with the tens digit printed at each multiple of ten, so that
//! successive lines scroll like a chart:
//!
//! ```text
//! #....4.........5.........6....#
//! #         |    :              #
//! ```

use crate::error::{NvfanError, Result};

pub const BORDER_RUNE: char = '#';
pub const GRID_RUNE: char = '.';
pub const DEFAULT_RUNE: char = ' ';

/// GPU temperature overlay
pub const GPU_TEMP_RUNE: char = '|';
/// Fan speed overlay
pub const FAN_SPEED_RUNE: char = ':';
/// Overlay marks, highest priority first
pub const GRAPH_RUNE_PRIORITY: &str = "|:";
/// Lines between two grid lines
pub const GRID_SIZE: i64 = 10;
/// Widest graph, in cells, that still fits a status line
pub const MAX_WIDTH: i64 = 512;

#[derive(Debug, Clone)]
pub struct AsciiGraph {
    grid_size: i64,
    iteration: i64,
    min: i32,
    max: i32,
    runes: Vec<char>,
    rune_priority: Vec<char>,
}

impl AsciiGraph {
    pub fn new(min: i32, max: i32, grid_size: i64, rune_priority: &str) -> Result<Self> {
        if max < min {
            return Err(NvfanError::config(format!(
                "Graph maximum '{}' is less than the graph minimum '{}'",
                max, min
            )));
        }
        if grid_size <= 0 {
            return Err(NvfanError::config("Graph grid size must be positive"));
        }

        let width = max as i64 - min as i64 + 1;
        if width > MAX_WIDTH {
            return Err(NvfanError::config(format!(
                "Graph window {}..{} is {} cells wide, more than {}",
                min, max, width, MAX_WIDTH
            )));
        }
        let width = width as usize;
        let mut graph = Self {
            grid_size,
            // The first per-tick reset lands on iteration 0, a grid line
            iteration: -2,
            min,
            max,
            runes: vec![DEFAULT_RUNE; width],
            rune_priority: rune_priority.chars().collect(),
        };
        graph.reset();
        Ok(graph)
    }

    /// Graph with the status line defaults
    pub fn for_status(min: i32, max: i32) -> Result<Self> {
        Self::new(min, max, GRID_SIZE, GRAPH_RUNE_PRIORITY)
    }

    pub fn width(&self) -> usize {
        self.runes.len()
    }

    pub fn iteration(&self) -> i64 {
        self.iteration
    }

    pub fn is_grid_line(&self) -> bool {
        self.iteration.rem_euclid(self.grid_size) == 0
    }

    /// Start a new line: advance the counter and redraw the background.
    pub fn reset(&mut self) {
        self.iteration += 1;
        let grid_line = self.is_grid_line();
        let last = self.runes.len() - 1;

        for (i, rune) in self.runes.iter_mut().enumerate() {
            let location = self.min as i64 + i as i64;

            *rune = if i == 0 || i == last {
                BORDER_RUNE
            } else if !grid_line {
                DEFAULT_RUNE
            } else if location.rem_euclid(10) == 0 {
                digit_rune(location)
            } else {
                GRID_RUNE
            };
        }
    }

    /// Overlay `mark` at `location`, clamped into the axis window.
    ///
    /// The cell keeps whatever it holds if that symbol comes before `mark`
    /// in the priority list. Marks missing from the list are ignored.
    pub fn set_mark(&mut self, location: i32, mark: char) {
        let index = (location.clamp(self.min, self.max) as i64 - self.min as i64) as usize;
        let current = self.runes[index];

        for &c in &self.rune_priority {
            if c == current {
                return;
            }
            if c == mark {
                self.runes[index] = mark;
                return;
            }
        }
    }

    pub fn render(&self) -> String {
        self.runes.iter().collect()
    }
}

fn digit_rune(location: i64) -> char {
    let digit = (location / 10).rem_euclid(10) as u32;
    char::from_digit(digit, 10).unwrap_or(GRID_RUNE)
}
