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

//! `nvidia-settings` backend
//!
//! Requires X11 and `nvidia-settings` with Coolbits enabled for fan control.
//! Every batch of queries or assignments is a single invocation:
//!
//! ```text
//! nvidia-settings -c :0 --query [gpu:0]/GPUCoreTemp --query [fan:0]/GPUCurrentFanSpeed
//! nvidia-settings -c :0 --assign [fan:0]/GPUTargetFanSpeed=42
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Command;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::error::{NvfanError, Result};
use crate::hardware::{Attribute, Hardware};
use crate::registry::{FanId, GpuId};

lazy_static! {
    /// `  Attribute 'GPUCoreTemp' (host:0[gpu:0]): 45.`
    static ref ATTRIBUTE_QUERY_LINE: Regex =
        Regex::new(r"Attribute '.*' \(.*\): (-?[0-9]+)\.").expect("valid regex");
    /// `    [0] host:0[gpu:0] (NVIDIA GeForce RTX 3080)`
    static ref GPU_HEADER_LINE: Regex =
        Regex::new(r"^\s*\[\d+\]\s+\S*\[gpu:(\d+)\]").expect("valid regex");
    static ref FAN_TARGET: Regex = Regex::new(r"\[fan:(\d+)\]").expect("valid regex");
}

#[derive(Debug, Clone)]
pub struct NvidiaSettings {
    binary: PathBuf,
    display: Option<u32>,
}

impl NvidiaSettings {
    pub fn new(binary: impl Into<PathBuf>, display: Option<u32>) -> Self {
        Self { binary: binary.into(), display }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.nvidia_settings.clone(), config.x_display)
    }

    fn base_args(&self) -> Vec<String> {
        let mut args = vec![self.binary.display().to_string()];
        if let Some(display) = self.display {
            args.push("-c".to_string());
            args.push(format!(":{}", display));
        }
        args
    }

    pub fn query_args(&self, attributes: &[Attribute]) -> Vec<String> {
        let mut args = self.base_args();
        for attribute in attributes {
            args.push("--query".to_string());
            args.push(attribute.to_string());
        }
        args
    }

    pub fn assign_args(&self, assignments: &[(Attribute, i32)]) -> Vec<String> {
        let mut args = self.base_args();
        for (attribute, value) in assignments {
            args.push("--assign".to_string());
            args.push(format!("{}={}", attribute, value));
        }
        args
    }

    pub fn topology_args(&self) -> Vec<String> {
        let mut args = self.base_args();
        args.extend(["--query", "gpus", "--verbose"].map(String::from));
        args
    }

    /// Run the command and return stdout.
    ///
    /// Fails on spawn errors, a non-zero exit, or `ERROR` on stderr
    /// (nvidia-settings exits 0 for some rejected assignments).
    fn run(&self, argv: &[String]) -> Result<String> {
        debug!("exec: {}", argv.join(" "));
        let output = Command::new(&argv[0])
            .args(&argv[1..])
            .output()
            .map_err(|e| NvfanError::command(argv, e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            return Err(NvfanError::command(
                argv,
                format!("{}: {}", output.status, stderr.trim()),
            ));
        }
        if stderr.contains("ERROR") {
            return Err(NvfanError::command(
                argv,
                format!("stderr contains 'ERROR':\nstdout:\n{}stderr:\n{}", stdout, stderr),
            ));
        }
        if !stderr.trim().is_empty() {
            warn!("nvidia-settings stderr: {}", stderr.trim());
        }
        trace!("stdout: {}", stdout);
        Ok(stdout)
    }
}

impl Hardware for NvidiaSettings {
    fn read_attributes(&self, attributes: &[Attribute]) -> Result<Vec<i32>> {
        if attributes.is_empty() {
            return Ok(Vec::new());
        }
        let stdout = self.run(&self.query_args(attributes))?;
        parse_query_output(&stdout, attributes.len())
    }

    fn write_attributes(&self, assignments: &[(Attribute, i32)]) -> Result<()> {
        if assignments.is_empty() {
            return Ok(());
        }
        self.run(&self.assign_args(assignments)).map(|_| ())
    }

    fn list_devices(&self) -> Result<BTreeMap<FanId, GpuId>> {
        let stdout = self.run(&self.topology_args())?;
        Ok(parse_topology(&stdout))
    }
}

/// Values of the first `requested` attribute lines, in output order
pub fn parse_query_output(stdout: &str, requested: usize) -> Result<Vec<i32>> {
    let mut values = Vec::with_capacity(requested);

    for caps in stdout.lines().filter_map(|line| ATTRIBUTE_QUERY_LINE.captures(line)) {
        let raw = &caps[1];
        let value = raw.parse::<i32>().map_err(|e| NvfanError::AttributeParse {
            value: raw.to_string(),
            reason: e.to_string(),
        })?;
        values.push(value);
    }

    if values.len() < requested {
        return Err(NvfanError::ShortRead { requested, received: values.len() });
    }
    if values.len() > requested {
        debug!("ignoring {} extra attribute line(s)", values.len() - requested);
        values.truncate(requested);
    }
    Ok(values)
}

/// Fan -> GPU map from `nvidia-settings --query gpus --verbose`.
///
/// Each GPU header line opens a section; every `[fan:N]` target printed
/// inside that section belongs to the GPU.
pub fn parse_topology(stdout: &str) -> BTreeMap<FanId, GpuId> {
    let mut fans = BTreeMap::new();
    let mut current: Option<GpuId> = None;

    for line in stdout.lines() {
        if let Some(caps) = GPU_HEADER_LINE.captures(line) {
            current = caps[1].parse().ok().map(GpuId);
            continue;
        }
        let Some(gpu) = current else { continue };
        for caps in FAN_TARGET.captures_iter(line) {
            if let Ok(fan) = caps[1].parse() {
                fans.insert(FanId(fan), gpu);
            }
        }
    }
    fans
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUERY_OUTPUT: &str = "
  Attribute 'GPUCoreTemp' (desktop:0[gpu:0]): 45.
  Attribute 'GPUCurrentFanSpeed' (desktop:0[fan:0]): 38.
  Attribute 'GPUTargetFanSpeed' (desktop:0[fan:0]): 40.
";

    const TOPOLOGY_OUTPUT: &str = "
2 GPUs on desktop:0

    [0] desktop:0[gpu:0] (NVIDIA GeForce RTX 3080)

      Has the following names:
        GPU-0

      Is connected to the following fans:
        [fan:0] [fan:1]

    [1] desktop:0[gpu:1] (NVIDIA GeForce RTX 3070)

      Has the following names:
        GPU-1

      Is connected to the following fans:
        [fan:2]
";

    #[test]
    fn test_parse_query_output_in_order() {
        assert_eq!(parse_query_output(QUERY_OUTPUT, 3).unwrap(), vec![45, 38, 40]);
    }

    #[test]
    fn test_parse_query_output_short_read() {
        let err = parse_query_output(QUERY_OUTPUT, 4).unwrap_err();
        assert!(matches!(err, NvfanError::ShortRead { requested: 4, received: 3 }));
    }

    #[test]
    fn test_parse_query_output_ignores_noise() {
        let out = "\nERROR-free chatter\n  Attribute 'GPUCoreTemp' (h:0[gpu:0]): 71.\n  'GPUCoreTemp' is an integer attribute.\n";
        assert_eq!(parse_query_output(out, 1).unwrap(), vec![71]);
    }

    #[test]
    fn test_parse_query_output_overflow_is_parse_error() {
        let out = "  Attribute 'GPUCoreTemp' (h:0[gpu:0]): 99999999999.\n";
        assert!(matches!(parse_query_output(out, 1), Err(NvfanError::AttributeParse { .. })));
    }

    #[test]
    fn test_parse_topology() {
        let fans = parse_topology(TOPOLOGY_OUTPUT);
        assert_eq!(fans.len(), 3);
        assert_eq!(fans[&FanId(0)], GpuId(0));
        assert_eq!(fans[&FanId(1)], GpuId(0));
        assert_eq!(fans[&FanId(2)], GpuId(1));
    }

    #[test]
    fn test_parse_topology_no_gpus() {
        assert!(parse_topology("No GPUs found\n").is_empty());
    }

    #[test]
    fn test_query_args_batch_every_attribute() {
        let nv = NvidiaSettings::new("/usr/bin/nvidia-settings", Some(0));
        let args = nv.query_args(&[
            Attribute::GpuCoreTemp(GpuId(0)),
            Attribute::FanCurrentSpeed(FanId(1)),
        ]);
        assert_eq!(
            args,
            vec![
                "/usr/bin/nvidia-settings",
                "-c",
                ":0",
                "--query",
                "[gpu:0]/GPUCoreTemp",
                "--query",
                "[fan:1]/GPUCurrentFanSpeed",
            ]
        );
    }

    #[test]
    fn test_assign_args_without_display() {
        let nv = NvidiaSettings::new("nvidia-settings", None);
        let args = nv.assign_args(&[
            (Attribute::FanTargetSpeed(FanId(0)), 42),
            (Attribute::GpuFanControlState(GpuId(1)), 0),
        ]);
        assert_eq!(
            args,
            vec![
                "nvidia-settings",
                "--assign",
                "[fan:0]/GPUTargetFanSpeed=42",
                "--assign",
                "[gpu:1]/GPUFanControlState=0",
            ]
        );
    }

    #[test]
    fn test_missing_binary_is_command_error() {
        let nv = NvidiaSettings::new("/nonexistent/nvidia-settings", None);
        let err = nv.read_attributes(&[Attribute::GpuCoreTemp(GpuId(0))]).unwrap_err();
        assert!(matches!(err, NvfanError::Command { .. }));
    }

    #[test]
    fn test_empty_batches_skip_invocation() {
        let nv = NvidiaSettings::new("/nonexistent/nvidia-settings", None);
        assert!(nv.read_attributes(&[]).unwrap().is_empty());
        assert!(nv.write_attributes(&[]).is_ok());
    }
}
