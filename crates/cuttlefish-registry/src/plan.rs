//! YAML task plans.
//!
//! A plan lists the tasks to program into one device. Loading validates the
//! plan; [`apply_plan`] clears the device, writes every task and checks the
//! task count the device reports back.
//!
//! ```yaml
//! model: cuttlefish_fip
//! start: false
//! tasks:
//!   - pwm_port: 0
//!     duty_cycle: 0.25
//!     frequency: 10000
//!     trigger_ports: [1]
//!     deltas: [15350, 666, 600, 50]
//! ```

use crate::cuttlefish::{self, PwmTaskPayload, TaskControlPayload};
use crate::fip::{self, Port, TaskPayload};
use crate::{Device, DeviceModel, EnableFlag, RegistryError, TaskState};
use anyhow::Context;
use harp_transport::HarpLink;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Task slots available on either device.
pub const MAX_TASKS: usize = 8;
pub const MIN_FREQUENCY_HZ: f32 = 5_000.0;
pub const MAX_FREQUENCY_HZ: f32 = 100_000.0;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("plan has {count} tasks, at most {max} fit on the device")]
    TooManyTasks { count: usize, max: usize },
    #[error("task {task}: duty cycle {value} outside [0, 1]")]
    DutyCycle { task: usize, value: f32 },
    #[error("task {task}: frequency {value} Hz outside [5000, 100000]")]
    Frequency { task: usize, value: f32 },
    #[error("task {task}: port index {index} outside 0-7")]
    PortIndex { task: usize, index: u8 },
    #[error("task {task}: on time {on_time} us exceeds period {period} us")]
    PwmTiming {
        task: usize,
        on_time: u32,
        period: u32,
    },
    #[error("plan targets {plan} but the device is {device}")]
    ModelMismatch {
        plan: DeviceModel,
        device: DeviceModel,
    },
    #[error("device reports {actual} tasks after programming {expected}")]
    TaskCountMismatch { expected: usize, actual: u8 },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

fn default_frequency() -> f32 {
    10_000.0
}

fn default_true() -> bool {
    true
}

fn mask_from_indices(task: usize, indices: &[u8]) -> Result<u8, PlanError> {
    indices.iter().try_fold(0u8, |mask, &index| {
        if index >= 8 {
            return Err(PlanError::PortIndex { task, index });
        }
        Ok(mask | (1 << index))
    })
}

/// One Cuttlefish PWM task. Times are microseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PwmTaskSpec {
    #[serde(default)]
    pub delay_us: u32,
    pub on_time_us: u32,
    pub period_us: u32,
    pub ports: Vec<u8>,
    #[serde(default)]
    pub repeats: u32,
    #[serde(default)]
    pub invert: bool,
}

impl PwmTaskSpec {
    pub fn to_payload(&self, task: usize) -> Result<PwmTaskPayload, PlanError> {
        if self.on_time_us > self.period_us {
            return Err(PlanError::PwmTiming {
                task,
                on_time: self.on_time_us,
                period: self.period_us,
            });
        }
        let mask = mask_from_indices(task, &self.ports)?;
        Ok(PwmTaskPayload {
            delay: self.delay_us,
            on_time: self.on_time_us,
            period: self.period_us,
            port_mask: cuttlefish::Ports::from_bits_retain(mask),
            repeats: self.repeats,
            invert: self.invert.into(),
        })
    }
}

/// One CuttlefishFip task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FipTaskSpec {
    /// IO line driven by the PWM, 0-7.
    pub pwm_port: u8,
    pub duty_cycle: f32,
    #[serde(default = "default_frequency")]
    pub frequency: f32,
    #[serde(default)]
    pub trigger_ports: Vec<u8>,
    #[serde(default = "default_true")]
    pub events: bool,
    #[serde(default)]
    pub mute: bool,
    #[serde(default)]
    pub deltas: [u32; 4],
}

impl FipTaskSpec {
    pub fn to_payload(&self, task: usize) -> Result<TaskPayload, PlanError> {
        if !(0.0..=1.0).contains(&self.duty_cycle) {
            return Err(PlanError::DutyCycle {
                task,
                value: self.duty_cycle,
            });
        }
        if !(MIN_FREQUENCY_HZ..=MAX_FREQUENCY_HZ).contains(&self.frequency) {
            return Err(PlanError::Frequency {
                task,
                value: self.frequency,
            });
        }
        let pwm_port = Port::from_index(self.pwm_port).map_err(|_| PlanError::PortIndex {
            task,
            index: self.pwm_port,
        })?;
        let trigger = mask_from_indices(task, &self.trigger_ports)?;
        let [delta1, delta2, delta3, delta4] = self.deltas;
        Ok(TaskPayload {
            pwm_port,
            duty_cycle: self.duty_cycle,
            frequency: self.frequency,
            trigger_ports: fip::Ports::from_bits_retain(trigger).into(),
            events_enabled: self.events.into(),
            is_muted: self.mute.into(),
            delta1,
            delta2,
            delta3,
            delta4,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum TaskPlan {
    Cuttlefish {
        tasks: Vec<PwmTaskSpec>,
        /// Fire the software start trigger once programmed.
        #[serde(default)]
        start: bool,
    },
    CuttlefishFip {
        tasks: Vec<FipTaskSpec>,
        /// Start the schedule once programmed.
        #[serde(default)]
        start: bool,
    },
}

/// Payloads of a validated plan, ready to write.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanPayloads {
    Cuttlefish(Vec<PwmTaskPayload>),
    CuttlefishFip(Vec<TaskPayload>),
}

impl TaskPlan {
    pub fn model(&self) -> DeviceModel {
        match self {
            TaskPlan::Cuttlefish { .. } => DeviceModel::Cuttlefish,
            TaskPlan::CuttlefishFip { .. } => DeviceModel::CuttlefishFip,
        }
    }

    pub fn task_count(&self) -> usize {
        match self {
            TaskPlan::Cuttlefish { tasks, .. } => tasks.len(),
            TaskPlan::CuttlefishFip { tasks, .. } => tasks.len(),
        }
    }

    pub fn starts(&self) -> bool {
        match self {
            TaskPlan::Cuttlefish { start, .. } | TaskPlan::CuttlefishFip { start, .. } => *start,
        }
    }

    pub fn validate(&self) -> Result<(), PlanError> {
        self.payloads().map(|_| ())
    }

    pub fn payloads(&self) -> Result<PlanPayloads, PlanError> {
        let count = self.task_count();
        if count > MAX_TASKS {
            return Err(PlanError::TooManyTasks {
                count,
                max: MAX_TASKS,
            });
        }
        Ok(match self {
            TaskPlan::Cuttlefish { tasks, .. } => PlanPayloads::Cuttlefish(
                tasks
                    .iter()
                    .enumerate()
                    .map(|(i, t)| t.to_payload(i))
                    .collect::<Result<_, _>>()?,
            ),
            TaskPlan::CuttlefishFip { tasks, .. } => PlanPayloads::CuttlefishFip(
                tasks
                    .iter()
                    .enumerate()
                    .map(|(i, t)| t.to_payload(i))
                    .collect::<Result<_, _>>()?,
            ),
        })
    }
}

pub fn parse_task_plan(raw: &str) -> anyhow::Result<TaskPlan> {
    let plan: TaskPlan = serde_yaml::from_str(raw).context("decoding task plan")?;
    plan.validate().context("validating task plan")?;
    Ok(plan)
}

pub fn load_task_plan(path: impl AsRef<Path>) -> anyhow::Result<TaskPlan> {
    let path = path.as_ref();
    let raw =
        fs::read_to_string(path).with_context(|| format!("reading plan: {}", path.display()))?;
    parse_task_plan(&raw).with_context(|| format!("loading plan: {}", path.display()))
}

/// Outcome of [`apply_plan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub tasks_written: usize,
    pub task_count: u8,
    pub started: bool,
}

/// Clears the device, programs every task of `plan` and verifies the count.
pub fn apply_plan<L: HarpLink>(
    device: &mut Device<L>,
    plan: &TaskPlan,
) -> Result<ApplyReport, PlanError> {
    if plan.model() != device.model() {
        return Err(PlanError::ModelMismatch {
            plan: plan.model(),
            device: device.model(),
        });
    }
    let payloads = plan.payloads()?;
    let expected = plan.task_count();
    let task_count = match &payloads {
        PlanPayloads::Cuttlefish(tasks) => {
            device.write::<cuttlefish::TaskControl>(&TaskControlPayload {
                clear_all_tasks: EnableFlag::ENABLE,
                ..Default::default()
            })?;
            for (i, task) in tasks.iter().enumerate() {
                tracing::debug!(task = i, ?task, "adding pwm task");
                device.write::<cuttlefish::PwmTask>(task)?;
            }
            device.read::<cuttlefish::TaskControl>()?.task_count
        }
        PlanPayloads::CuttlefishFip(tasks) => {
            device.write::<fip::SetTaskState>(&TaskState::STOP)?;
            device.write::<fip::ClearAllTasks>(&EnableFlag::ENABLE)?;
            for (i, task) in tasks.iter().enumerate() {
                tracing::debug!(task = i, ?task, "adding fip task");
                device.write::<fip::AddTask>(task)?;
            }
            device.read::<fip::TaskCount>()?
        }
    };
    if usize::from(task_count) != expected {
        return Err(PlanError::TaskCountMismatch {
            expected,
            actual: task_count,
        });
    }
    if plan.starts() {
        match plan {
            TaskPlan::Cuttlefish { .. } => {
                device.write::<cuttlefish::SoftwareStartTrigger>(&1)?;
            }
            TaskPlan::CuttlefishFip { .. } => {
                device.write::<fip::SetTaskState>(&TaskState::START)?;
            }
        }
    }
    tracing::info!(
        model = %device.model(),
        tasks = expected,
        started = plan.starts(),
        "plan applied"
    );
    Ok(ApplyReport {
        tasks_written: expected,
        task_count,
        started: plan.starts(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const FIP_PLAN: &str = "
model: cuttlefish_fip
start: true
tasks:
  - pwm_port: 0
    duty_cycle: 0.25
    trigger_ports: [1]
    deltas: [15350, 666, 600, 50]
  - pwm_port: 2
    duty_cycle: 0.75
    frequency: 20000
    trigger_ports: [3]
    events: false
";

    #[test]
    fn test_parse_fip_plan() {
        let plan = parse_task_plan(FIP_PLAN).unwrap();
        assert_eq!(plan.model(), DeviceModel::CuttlefishFip);
        let PlanPayloads::CuttlefishFip(tasks) = plan.payloads().unwrap() else {
            panic!("expected fip payloads");
        };
        assert_eq!(tasks[0].pwm_port, Port::IO0);
        assert_eq!(tasks[0].frequency, 10_000.0);
        assert_eq!(tasks[0].trigger_ports.ports(), fip::Ports::IO1);
        assert_eq!(tasks[0].delta1, 15_350);
        assert!(tasks[0].events_enabled.is_set());
        assert_eq!(tasks[1].pwm_port, Port::IO2);
        assert!(!tasks[1].events_enabled.is_set());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FIP_PLAN.as_bytes()).unwrap();
        let plan = load_task_plan(file.path()).unwrap();
        assert_eq!(plan.task_count(), 2);
        assert!(load_task_plan("/nonexistent/plan.yaml").is_err());
    }

    fn fip_task(duty_cycle: f32, frequency: f32) -> FipTaskSpec {
        FipTaskSpec {
            pwm_port: 0,
            duty_cycle,
            frequency,
            trigger_ports: vec![1],
            events: true,
            mute: false,
            deltas: [0; 4],
        }
    }

    #[test]
    fn test_validation_ranges() {
        assert!(matches!(
            fip_task(1.5, 10_000.0).to_payload(0),
            Err(PlanError::DutyCycle { task: 0, .. })
        ));
        assert!(matches!(
            fip_task(f32::NAN, 10_000.0).to_payload(0),
            Err(PlanError::DutyCycle { .. })
        ));
        assert!(matches!(
            fip_task(0.5, 4_999.0).to_payload(3),
            Err(PlanError::Frequency { task: 3, .. })
        ));
        assert!(fip_task(0.0, 5_000.0).to_payload(0).is_ok());
        assert!(fip_task(1.0, 100_000.0).to_payload(0).is_ok());

        let mut bad_port = fip_task(0.5, 10_000.0);
        bad_port.pwm_port = 8;
        assert!(matches!(
            bad_port.to_payload(1),
            Err(PlanError::PortIndex { task: 1, index: 8 })
        ));
    }

    #[test]
    fn test_too_many_tasks() {
        let plan = TaskPlan::CuttlefishFip {
            tasks: vec![fip_task(0.5, 10_000.0); 9],
            start: false,
        };
        assert!(matches!(
            plan.validate(),
            Err(PlanError::TooManyTasks { count: 9, max: 8 })
        ));
    }

    #[test]
    fn test_pwm_spec() {
        let spec = PwmTaskSpec {
            delay_us: 0,
            on_time_us: 500,
            period_us: 1000,
            ports: vec![0, 7],
            repeats: 0,
            invert: false,
        };
        let payload = spec.to_payload(0).unwrap();
        assert_eq!(
            payload.port_mask,
            cuttlefish::Ports::PORT0 | cuttlefish::Ports::PORT7
        );
        let late = PwmTaskSpec {
            on_time_us: 2000,
            ..spec
        };
        assert!(matches!(
            late.to_payload(2),
            Err(PlanError::PwmTiming { task: 2, .. })
        ));
    }

    #[test]
    fn test_unknown_model_rejected() {
        assert!(parse_task_plan("model: other\ntasks: []\n").is_err());
    }
}
