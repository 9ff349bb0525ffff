/*
 * Integration tests for nvfan
 *
 * These drive the validator and the control loop end to end against an
 * in-memory GPU whose fans reach their target speed instantly.
 */

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use nvfan::config::{parse_config, ClampPolicy, Config};
use nvfan::controller::FanController;
use nvfan::hardware::{Attribute, Hardware};
use nvfan::registry::{FanId, GpuId};
use nvfan::validator::validate_config;
use nvfan::{NvfanError, Result};
use proptest::prelude::*;

#[derive(Default)]
struct GpuState {
    temps: BTreeMap<GpuId, i32>,
    /// fan -> (current, target)
    fans: BTreeMap<FanId, (i32, i32)>,
    control_state: BTreeMap<GpuId, i32>,
    writes: Vec<Vec<(Attribute, i32)>>,
    reads: usize,
}

struct FakeGpu {
    topology: BTreeMap<FanId, GpuId>,
    state: Mutex<GpuState>,
}

impl FakeGpu {
    fn new(topology: BTreeMap<FanId, GpuId>) -> Self {
        let mut state = GpuState::default();
        for (&fan, &gpu) in &topology {
            state.temps.insert(gpu, 0);
            state.fans.insert(fan, (0, 0));
        }
        Self { topology, state: Mutex::new(state) }
    }

    fn set_temp(&self, gpu: GpuId, temp: i32) {
        self.state.lock().unwrap().temps.insert(gpu, temp);
    }

    fn set_current_speed(&self, fan: FanId, speed: i32) {
        self.state.lock().unwrap().fans.entry(fan).or_default().0 = speed;
    }

    fn target(&self, fan: FanId) -> i32 {
        self.state.lock().unwrap().fans[&fan].1
    }

    fn control_state(&self, gpu: GpuId) -> Option<i32> {
        self.state.lock().unwrap().control_state.get(&gpu).copied()
    }
}

impl Hardware for FakeGpu {
    fn read_attributes(&self, attributes: &[Attribute]) -> Result<Vec<i32>> {
        let mut state = self.state.lock().unwrap();
        state.reads += 1;
        attributes
            .iter()
            .map(|a| match a {
                Attribute::GpuCoreTemp(gpu) => state.temps.get(gpu).copied(),
                Attribute::GpuFanControlState(gpu) => state.control_state.get(gpu).copied(),
                Attribute::FanCurrentSpeed(fan) => state.fans.get(fan).map(|f| f.0),
                Attribute::FanTargetSpeed(fan) => state.fans.get(fan).map(|f| f.1),
            })
            .collect::<Option<Vec<i32>>>()
            .ok_or(NvfanError::ShortRead { requested: attributes.len(), received: 0 })
    }

    fn write_attributes(&self, assignments: &[(Attribute, i32)]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.writes.push(assignments.to_vec());
        for &(attribute, value) in assignments {
            match attribute {
                Attribute::GpuFanControlState(gpu) => {
                    state.control_state.insert(gpu, value);
                }
                Attribute::FanTargetSpeed(fan) => {
                    state.fans.insert(fan, (value, value));
                }
                other => panic!("read-only attribute assigned: {other}"),
            }
        }
        Ok(())
    }

    fn list_devices(&self) -> Result<BTreeMap<FanId, GpuId>> {
        Ok(self.topology.clone())
    }
}

fn single_fan_config() -> Config {
    parse_config(
        r#"{
            "fans": { "0": { "gpu_id": 0, "min_speed": 35, "max_speed": 100,
                             "control_curve": { "30": 35, "60": 50, "70": 100 } } },
            "graph": { "min": 30, "max": 100 }
        }"#,
    )
    .unwrap()
}

fn single_fan_gpu() -> Arc<FakeGpu> {
    Arc::new(FakeGpu::new(BTreeMap::from([(FanId(0), GpuId(0))])))
}

#[test]
fn test_validate_then_enable_and_tick() {
    let config = single_fan_config();
    let gpu = single_fan_gpu();
    validate_config(&config, &*gpu).unwrap();

    let mut controller = FanController::new(&config, gpu.clone()).unwrap();
    let guard = controller.enable().unwrap();
    assert_eq!(gpu.control_state(GpuId(0)), Some(1));

    gpu.set_temp(GpuId(0), 45);
    let mut out = Vec::new();
    controller.tick(&mut out).unwrap();
    // interpolate(45) = (35*15 + 50*15) / 30 = 42
    assert_eq!(gpu.target(FanId(0)), 42);

    drop(guard);
    assert_eq!(gpu.control_state(GpuId(0)), Some(0));
}

#[test]
fn test_steady_temperature_converges_one_step_per_tick() {
    let config = single_fan_config();
    let gpu = single_fan_gpu();
    gpu.set_temp(GpuId(0), 45);
    gpu.set_current_speed(FanId(0), 60);

    let mut controller = FanController::new(&config, gpu.clone()).unwrap();
    let mut out = Vec::new();
    let mut targets = Vec::new();
    for _ in 0..25 {
        controller.tick(&mut out).unwrap();
        targets.push(gpu.target(FanId(0)));
    }

    let mut expected: Vec<i32> = (42..=59).rev().collect();
    expected.resize(25, 42);
    assert_eq!(targets, expected);
}

#[test]
fn test_rising_temperature_followed_immediately() {
    let config = single_fan_config();
    let gpu = single_fan_gpu();
    let mut controller = FanController::new(&config, gpu.clone()).unwrap();
    let mut out = Vec::new();

    gpu.set_temp(GpuId(0), 30);
    controller.tick(&mut out).unwrap();
    assert_eq!(gpu.target(FanId(0)), 35);

    gpu.set_temp(GpuId(0), 70);
    controller.tick(&mut out).unwrap();
    assert_eq!(gpu.target(FanId(0)), 100);

    gpu.set_temp(GpuId(0), 30);
    controller.tick(&mut out).unwrap();
    assert_eq!(gpu.target(FanId(0)), 99);
}

#[test]
fn test_status_stream_format() {
    let config = single_fan_config();
    let gpu = single_fan_gpu();
    gpu.set_temp(GpuId(0), 45);
    gpu.set_current_speed(FanId(0), 50);

    let mut controller = FanController::new(&config, gpu.clone()).unwrap();
    let mut out = Vec::new();
    controller.tick(&mut out).unwrap();
    controller.tick(&mut out).unwrap();

    let text = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(controller.header_line(), "GPU 0 TEMP,FAN 0 CURRENT SPEED,FAN 0 TARGET SPEED,GRAPH");
    assert_eq!(lines.len(), 2);

    let fields: Vec<&str> = lines[0].split(',').collect();
    assert_eq!(&fields[..3], &[" 45", " 50", " 49"]);
    let graph = fields[3];
    assert_eq!(graph.len(), 71);
    assert_eq!(graph.chars().nth(15), Some('|'));
    assert_eq!(graph.chars().nth(20), Some(':'));

    // Second line is not a grid line: only borders and marks
    let fields: Vec<&str> = lines[1].split(',').collect();
    assert_eq!(&fields[..3], &[" 45", " 49", " 48"]);
    assert!(fields[3].chars().all(|c| matches!(c, '#' | ' ' | '|' | ':')));
}

#[test]
fn test_example_config_is_valid() {
    let config = parse_config(include_str!("../nvfan.example.json")).unwrap();
    let gpu = FakeGpu::new(BTreeMap::from([(FanId(0), GpuId(0)), (FanId(1), GpuId(0))]));
    validate_config(&config, &gpu).unwrap();
    assert_eq!(config.gpu_ids(), vec![GpuId(0)]);
}

#[test]
fn test_topology_mismatch_stops_before_actuation() {
    let config = single_fan_config();
    let gpu = Arc::new(FakeGpu::new(BTreeMap::from([(FanId(0), GpuId(1))])));

    let err = validate_config(&config, &*gpu).unwrap_err();
    assert!(matches!(err, NvfanError::OwnerMismatch { .. }));
    assert!(gpu.state.lock().unwrap().writes.is_empty());
}

#[test]
fn test_two_gpus_batched_in_one_read_and_one_write() {
    let config = parse_config(
        r#"{
            "fans": {
                "0": { "gpu_id": 0, "control_curve": { "30": 30, "80": 80 } },
                "1": { "gpu_id": 0, "control_curve": { "30": 30, "80": 80 } },
                "2": { "gpu_id": 1, "control_curve": { "40": 20, "90": 100 } }
            },
            "graph": { "min": 0, "max": 100 }
        }"#,
    )
    .unwrap();
    let gpu = Arc::new(FakeGpu::new(BTreeMap::from([
        (FanId(0), GpuId(0)),
        (FanId(1), GpuId(0)),
        (FanId(2), GpuId(1)),
    ])));
    validate_config(&config, &*gpu).unwrap();

    gpu.set_temp(GpuId(0), 55);
    gpu.set_temp(GpuId(1), 65);
    let mut controller = FanController::new(&config, gpu.clone()).unwrap();
    let mut out = Vec::new();
    controller.tick(&mut out).unwrap();

    let state = gpu.state.lock().unwrap();
    assert_eq!(state.reads, 1);
    assert_eq!(state.writes.len(), 1);
    assert_eq!(
        state.writes[0],
        vec![
            (Attribute::FanTargetSpeed(FanId(0)), 55),
            (Attribute::FanTargetSpeed(FanId(1)), 55),
            // (20*25 + 100*25) / 50 = 60
            (Attribute::FanTargetSpeed(FanId(2)), 60),
        ]
    );
}

#[test]
fn test_fan_clamp_policy_holds_configured_minimum() {
    let mut config = single_fan_config();
    config.clamp = ClampPolicy::Fan;
    config.fans.get_mut(&FanId(0)).unwrap().min_speed = 40;

    let gpu = single_fan_gpu();
    gpu.set_temp(GpuId(0), 30);
    let mut controller = FanController::new(&config, gpu.clone()).unwrap();
    let mut out = Vec::new();
    controller.tick(&mut out).unwrap();
    assert_eq!(gpu.target(FanId(0)), 40);
}

proptest! {
    #[test]
    fn target_stays_in_curve_range_and_falls_slowly(
        readings in prop::collection::vec((-40i32..150, -50i32..200), 1..40),
    ) {
        let config = single_fan_config();
        let gpu = single_fan_gpu();
        let mut controller = FanController::new(&config, gpu.clone()).unwrap();
        let mut out = Vec::new();

        for (temp, current) in readings {
            gpu.set_temp(GpuId(0), temp);
            gpu.set_current_speed(FanId(0), current);
            controller.tick(&mut out).unwrap();

            let target = gpu.target(FanId(0));
            prop_assert!((35..=100).contains(&target));
            prop_assert!(target >= (current - 1).min(100));
        }
    }
}
