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

//! Fan control curves
//!
//! A curve maps an integer GPU temperature (°C) to an integer fan speed (%).
//! Between anchors the speed is linearly interpolated with truncating integer
//! division; outside the anchors the nearest anchor's speed is held flat.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound::{Excluded, Unbounded};

use serde::{Deserialize, Serialize};

use crate::error::{NvfanError, Result};

pub const CURVE_TEMP_MIN: i32 = 30;
pub const CURVE_TEMP_MAX: i32 = 90;
pub const CURVE_SPEED_MIN: i32 = 0;
pub const CURVE_SPEED_MAX: i32 = 100;

/// A single (temperature, speed) anchor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurvePoint {
    pub temp: i32,
    pub speed: i32,
}

impl fmt::Display for CurvePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}C, {}%)", self.temp, self.speed)
    }
}

/// Closed bounds a control curve must stay within
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CurveBounds {
    #[serde(default = "default_temp_min")] pub temp_min: i32,
    #[serde(default = "default_temp_max")] pub temp_max: i32,
    #[serde(default = "default_speed_min")] pub speed_min: i32,
    #[serde(default = "default_speed_max")] pub speed_max: i32,
}

fn default_temp_min() -> i32 { CURVE_TEMP_MIN }
fn default_temp_max() -> i32 { CURVE_TEMP_MAX }
fn default_speed_min() -> i32 { CURVE_SPEED_MIN }
fn default_speed_max() -> i32 { CURVE_SPEED_MAX }

impl Default for CurveBounds {
    fn default() -> Self {
        Self {
            temp_min: CURVE_TEMP_MIN,
            temp_max: CURVE_TEMP_MAX,
            speed_min: CURVE_SPEED_MIN,
            speed_max: CURVE_SPEED_MAX,
        }
    }
}

/// First anchor that breaks the curve rules, with the anchor before it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurveViolation {
    pub point: CurvePoint,
    pub previous: CurvePoint,
    pub reason: String,
}

/// Temperature -> speed mapping.
///
/// Anchors live in a `BTreeMap`, so they are unique per temperature and
/// always iterate in ascending temperature order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<i32, i32>", into = "BTreeMap<i32, i32>")]
pub struct Curve {
    anchors: BTreeMap<i32, i32>,
}

impl From<BTreeMap<i32, i32>> for Curve {
    fn from(anchors: BTreeMap<i32, i32>) -> Self {
        Self { anchors }
    }
}

impl From<Curve> for BTreeMap<i32, i32> {
    fn from(curve: Curve) -> Self {
        curve.anchors
    }
}

impl<const N: usize> From<[(i32, i32); N]> for Curve {
    fn from(points: [(i32, i32); N]) -> Self {
        Self { anchors: points.into_iter().collect() }
    }
}

impl Curve {
    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    /// Anchors in ascending temperature order
    pub fn points(&self) -> impl Iterator<Item = CurvePoint> + '_ {
        self.anchors.iter().map(|(&temp, &speed)| CurvePoint { temp, speed })
    }

    /// Speed for temperature `x`.
    ///
    /// Exact anchors are returned as-is. Between two anchors the result is
    /// `(y0*(x1-x) + y1*(x-x0)) / (x1-x0)`, truncated toward zero. Outside the
    /// anchors the closest anchor's speed is returned.
    pub fn interpolate(&self, x: i32) -> Result<i32> {
        if let Some(&y) = self.anchors.get(&x) {
            return Ok(y);
        }

        let left = self.anchors.range(..x).next_back();
        let right = self.anchors.range((Excluded(x), Unbounded)).next();

        match (left, right) {
            (Some((_, &y0)), None) => Ok(y0),
            (None, Some((_, &y1))) => Ok(y1),
            (Some((&x0, &y0)), Some((&x1, &y1))) => {
                let (x, x0, y0, x1, y1) = (x as i64, x0 as i64, y0 as i64, x1 as i64, y1 as i64);
                let y = (y0 * (x1 - x) + y1 * (x - x0)) / (x1 - x0);
                // Lies between y0 and y1, so it always fits back into i32
                Ok(y as i32)
            }
            (None, None) => Err(NvfanError::EmptyCurve),
        }
    }

    /// Lowest speed the curve can ever produce
    pub fn floor(&self) -> Result<i32> {
        self.interpolate(i32::MIN)
    }

    /// Highest speed the curve can ever produce
    pub fn ceiling(&self) -> Result<i32> {
        self.interpolate(i32::MAX)
    }

    /// Check bounds and monotonicity.
    ///
    /// Walks the anchors in temperature order starting from the virtual point
    /// `(temp_min, speed_min)`; neither temperature nor speed may decrease
    /// from one point to the next.
    pub fn validate(&self, bounds: &CurveBounds) -> std::result::Result<(), CurveViolation> {
        let mut previous = CurvePoint { temp: bounds.temp_min, speed: bounds.speed_min };

        for point in self.points() {
            let violation = |reason: String| CurveViolation { point, previous, reason };

            if point.temp < bounds.temp_min {
                return Err(violation(format!("is below {} degrees", bounds.temp_min)));
            }
            if point.temp > bounds.temp_max {
                return Err(violation(format!("is above {} degrees", bounds.temp_max)));
            }
            if point.temp < previous.temp {
                return Err(violation("is below the temperature of the previous point".to_string()));
            }

            if point.speed < bounds.speed_min {
                return Err(violation(format!("is below {}% fan speed", bounds.speed_min)));
            }
            if point.speed > bounds.speed_max {
                return Err(violation(format!("is above {}% fan speed", bounds.speed_max)));
            }
            if point.speed < previous.speed {
                return Err(violation("is below the speed of the previous point".to_string()));
            }

            previous = point;
        }
        Ok(())
    }
}
