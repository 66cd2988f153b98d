//! In-process device emulation on top of [`MockLink`].
//!
//! Registers start zeroed. Task registers follow the firmware's rules: at most
//! eight tasks, no task edits while the FIP schedule runs, and error replies
//! for writes to read-only registers or with the wrong payload width.

use crate::{cuttlefish, fip, Access, DeviceModel, Register, Result};
use harp_transport::{MockLink, PayloadType, RegisterFile, WriteHook};

const MAX_TASKS: u8 = 8;

fn byte(regs: &RegisterFile, address: u8) -> u8 {
    regs.get(address)
        .and_then(|p| p.first().copied())
        .unwrap_or(0)
}

fn store(regs: &mut RegisterFile, address: u8, payload: &[u8]) {
    regs.set(address, PayloadType::U8, payload);
}

fn sized(
    width: usize,
    mut hook: impl FnMut(&[u8], &mut RegisterFile) -> bool + Send + 'static,
) -> WriteHook {
    Box::new(move |payload, regs| payload.len() == width && hook(payload, regs))
}

fn plain(address: u8, width: usize) -> WriteHook {
    sized(width, move |payload, regs| {
        store(regs, address, payload);
        true
    })
}

fn cuttlefish_hooks(link: &mut MockLink) {
    const CONTROL: u8 = cuttlefish::TaskControl::ADDRESS;
    link.on_write(
        cuttlefish::PwmTask::ADDRESS,
        sized(18, |payload, regs| {
            let count = byte(regs, CONTROL) >> 4;
            if count >= MAX_TASKS {
                return false;
            }
            store(regs, cuttlefish::PwmTask::ADDRESS, payload);
            store(regs, CONTROL, &[(count + 1) << 4]);
            true
        }),
    );
    link.on_write(
        CONTROL,
        sized(1, |payload, regs| {
            let mut count = byte(regs, CONTROL) >> 4;
            if payload[0] & 0x01 != 0 {
                count = 0;
            }
            if payload[0] & 0x02 != 0 {
                let task = regs.get(cuttlefish::PwmTask::ADDRESS).unwrap_or_default();
                tracing::debug!(tasks = count, last = ?task, "task dump requested");
            }
            store(regs, CONTROL, &[count << 4]);
            true
        }),
    );
}

fn settings_address(index: u8) -> u8 {
    fip::Task0Settings::ADDRESS + index
}

fn fip_hooks(link: &mut MockLink) {
    const STATE: u8 = fip::SetTaskState::ADDRESS;
    const COUNT: u8 = fip::TaskCount::ADDRESS;
    link.on_write(
        STATE,
        sized(1, |payload, regs| {
            if payload[0] > 2 {
                return false;
            }
            store(regs, STATE, payload);
            true
        }),
    );
    link.on_write(
        fip::AddTask::ADDRESS,
        sized(34, |payload, regs| {
            let count = byte(regs, COUNT);
            if byte(regs, STATE) != 0 || count >= MAX_TASKS {
                return false;
            }
            store(regs, fip::AddTask::ADDRESS, payload);
            store(regs, settings_address(count), payload);
            store(regs, COUNT, &[count + 1]);
            true
        }),
    );
    link.on_write(
        fip::RemoveTask::ADDRESS,
        sized(1, |payload, regs| {
            let index = payload[0];
            let count = byte(regs, COUNT);
            if byte(regs, STATE) != 0 || index >= count {
                return false;
            }
            for i in index..count - 1 {
                let next = regs.get(settings_address(i + 1)).unwrap_or_default().to_vec();
                store(regs, settings_address(i), &next);
            }
            store(regs, settings_address(count - 1), &[0; 34]);
            store(regs, fip::RemoveTask::ADDRESS, payload);
            store(regs, COUNT, &[count - 1]);
            true
        }),
    );
    link.on_write(
        fip::ClearAllTasks::ADDRESS,
        sized(1, |payload, regs| {
            if payload[0] > 1 {
                return false;
            }
            if payload[0] == 1 {
                for i in 0..MAX_TASKS {
                    store(regs, settings_address(i), &[0; 34]);
                }
                store(regs, COUNT, &[0]);
            }
            store(regs, fip::ClearAllTasks::ADDRESS, payload);
            true
        }),
    );
    for index in 0..MAX_TASKS {
        let address = settings_address(index);
        link.on_write(
            address,
            sized(34, move |payload, regs| {
                if index >= byte(regs, COUNT) {
                    return false;
                }
                store(regs, address, payload);
                true
            }),
        );
    }
}

/// A mock link that behaves like a freshly reset device of `model`.
pub fn emulated_link(model: DeviceModel) -> Result<MockLink> {
    let mut link = MockLink::with_who_am_i(model.who_am_i());
    for desc in model.catalog()?.descriptors() {
        link.set_register(desc.address, desc.payload_type, &vec![0; desc.width]);
        let hook: WriteHook = if desc.access.contains(Access::WRITE) {
            plain(desc.address, desc.width)
        } else {
            Box::new(|_, _| false)
        };
        link.on_write(desc.address, hook);
    }
    match model {
        DeviceModel::Cuttlefish => cuttlefish_hooks(&mut link),
        DeviceModel::CuttlefishFip => fip_hooks(&mut link),
    }
    tracing::debug!(%model, "emulated device ready");
    Ok(link)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fip::{Port, TaskPayload};
    use crate::plan::{apply_plan, parse_task_plan, PlanError};
    use crate::{Device, EnableFlag, RegistryError, TaskIndex, TaskState};
    use harp_transport::TransportError;

    fn fip_device() -> Device<MockLink> {
        let link = emulated_link(DeviceModel::CuttlefishFip).unwrap();
        Device::connect(link, DeviceModel::CuttlefishFip).unwrap()
    }

    fn task_on(port: Port) -> TaskPayload {
        TaskPayload {
            pwm_port: port,
            ..TaskPayload::default()
        }
    }

    fn is_device_error<T>(r: Result<T>) -> bool {
        matches!(r, Err(RegistryError::Transport(TransportError::Device { .. })))
    }

    #[test]
    fn test_add_and_remove_tasks() {
        let mut dev = fip_device();
        for port in [Port::IO0, Port::IO2, Port::IO4] {
            dev.write::<fip::AddTask>(&task_on(port)).unwrap();
        }
        assert_eq!(dev.read::<fip::TaskCount>().unwrap(), 3);
        assert_eq!(dev.read::<fip::Task1Settings>().unwrap().pwm_port, Port::IO2);

        dev.write::<fip::RemoveTask>(&TaskIndex(1)).unwrap();
        assert_eq!(dev.read::<fip::TaskCount>().unwrap(), 2);
        assert_eq!(dev.read::<fip::Task1Settings>().unwrap().pwm_port, Port::IO4);

        // slot 3 is past the task count
        assert!(is_device_error(dev.write::<fip::Task3Settings>(&task_on(Port::IO1))));
        assert!(is_device_error(dev.write::<fip::RemoveTask>(&TaskIndex(5))));
    }

    #[test]
    fn test_task_limit_and_running_schedule() {
        let mut dev = fip_device();
        for _ in 0..8 {
            dev.write::<fip::AddTask>(&TaskPayload::default()).unwrap();
        }
        assert!(is_device_error(dev.write::<fip::AddTask>(&TaskPayload::default())));

        dev.write::<fip::ClearAllTasks>(&EnableFlag::ENABLE).unwrap();
        assert_eq!(dev.read::<fip::TaskCount>().unwrap(), 0);

        dev.write::<fip::SetTaskState>(&TaskState::START).unwrap();
        assert!(is_device_error(dev.write::<fip::AddTask>(&TaskPayload::default())));
    }

    #[test]
    fn test_read_only_register() {
        let mut dev = fip_device();
        assert!(is_device_error(dev.write::<fip::TaskCount>(&3)));
    }

    #[test]
    fn test_apply_fip_plan() {
        let plan = parse_task_plan(
            "
model: cuttlefish_fip
start: true
tasks:
  - {pwm_port: 0, duty_cycle: 0.25, trigger_ports: [1]}
  - {pwm_port: 2, duty_cycle: 0.75, trigger_ports: [3]}
  - {pwm_port: 4, duty_cycle: 0.5, trigger_ports: [5]}
  - {pwm_port: 6, duty_cycle: 0.25, trigger_ports: [7]}
",
        )
        .unwrap();
        let mut dev = fip_device();
        dev.write::<fip::AddTask>(&TaskPayload::default()).unwrap();
        let report = apply_plan(&mut dev, &plan).unwrap();
        assert_eq!(report.task_count, 4);
        assert!(report.started);
        assert_eq!(dev.read::<fip::SetTaskState>().unwrap(), TaskState::START);
        let task3 = dev.read::<fip::Task3Settings>().unwrap();
        assert_eq!(task3.pwm_port, Port::IO6);
        assert_eq!(task3.trigger_ports.ports(), fip::Ports::IO7);
    }

    #[test]
    fn test_apply_cuttlefish_plan() {
        let plan = parse_task_plan(
            "
model: cuttlefish
tasks:
  - {on_time_us: 500, period_us: 1000, ports: [0]}
  - {on_time_us: 1000, period_us: 2500, ports: [1]}
",
        )
        .unwrap();
        let link = emulated_link(DeviceModel::Cuttlefish).unwrap();
        let mut dev = Device::connect(link, DeviceModel::Cuttlefish).unwrap();
        dev.write::<cuttlefish::PwmTask>(&Default::default()).unwrap();
        let report = apply_plan(&mut dev, &plan).unwrap();
        assert_eq!(report.task_count, 2);
        assert!(!report.started);
        let last = dev.read::<cuttlefish::PwmTask>().unwrap();
        assert_eq!(last.period, 2500);
    }

    #[test]
    fn test_task_control_dump_keeps_count() {
        let link = emulated_link(DeviceModel::Cuttlefish).unwrap();
        let mut dev = Device::connect(link, DeviceModel::Cuttlefish).unwrap();
        dev.write::<cuttlefish::PwmTask>(&Default::default()).unwrap();
        dev.write::<cuttlefish::PwmTask>(&Default::default()).unwrap();
        let dump = cuttlefish::TaskControlPayload {
            dump_all_tasks: EnableFlag::ENABLE,
            ..Default::default()
        };
        dev.write::<cuttlefish::TaskControl>(&dump).unwrap();
        assert_eq!(dev.read::<cuttlefish::TaskControl>().unwrap().task_count, 2);
    }

    #[test]
    fn test_apply_rejects_other_model() {
        let plan = parse_task_plan("model: cuttlefish\ntasks: []\n").unwrap();
        let mut dev = fip_device();
        assert!(matches!(
            apply_plan(&mut dev, &plan),
            Err(PlanError::ModelMismatch { .. })
        ));
    }
}
