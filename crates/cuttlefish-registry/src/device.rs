//! Typed register access over a Harp link.

use crate::{
    decode_message, Catalog, DeviceMetrics, DeviceModel, PayloadCodec, Register,
    RegisterDescriptor, RegisterRecord, RegisterShape, RegisterValue, RegistryError, Result,
    Timestamped,
};
use harp_transport::{read_who_am_i, HarpLink, HarpMessage, TransportError};

/// A connected Cuttlefish or CuttlefishFip device.
///
/// Only registers of the connected model are accepted; reads and writes go
/// through the model's catalog so that typed and dynamic access agree.
pub struct Device<L: HarpLink> {
    link: L,
    model: DeviceModel,
    catalog: &'static Catalog,
    metrics: Option<DeviceMetrics>,
}

impl<L: HarpLink> Device<L> {
    /// Checks the device identity and takes ownership of the link.
    pub fn connect(mut link: L, model: DeviceModel) -> Result<Self> {
        let catalog = model.catalog()?;
        let actual = read_who_am_i(&mut link)?;
        if actual != model.who_am_i() {
            return Err(RegistryError::DeviceIdentityMismatch {
                expected: model.who_am_i(),
                actual,
            });
        }
        tracing::info!(%model, who_am_i = actual, "connected to device");
        Ok(Self {
            link,
            model,
            catalog,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: DeviceMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn model(&self) -> DeviceModel {
        self.model
    }

    pub fn catalog(&self) -> &'static Catalog {
        self.catalog
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn into_link(self) -> L {
        self.link
    }

    pub fn read<R: Register>(&mut self) -> Result<R::Payload> {
        let desc = self.descriptor_of::<R>()?;
        let reply = self.exchange(HarpMessage::read(desc.address, desc.payload_type))?;
        self.decode_reply(desc, &reply, R::Payload::decode)
    }

    /// Like [`Device::read`], also returning the device time of the reply.
    pub fn read_timestamped<R: Register>(&mut self) -> Result<Timestamped<R::Payload>> {
        let desc = self.descriptor_of::<R>()?;
        let reply = self.exchange(HarpMessage::read(desc.address, desc.payload_type))?;
        let seconds = reply
            .timestamp
            .ok_or(RegistryError::MissingTimestamp { register: R::NAME })?
            .seconds();
        let value = self.decode_reply(desc, &reply, R::Payload::decode)?;
        Ok(Timestamped::new(value, seconds))
    }

    pub fn write<R: Register>(&mut self, payload: &R::Payload) -> Result<()> {
        let desc = self.descriptor_of::<R>()?;
        let bytes = payload.encode()?;
        self.send_write(desc, &bytes)
    }

    /// Reads any register of this model by address.
    pub fn read_address(&mut self, address: u8) -> Result<RegisterValue> {
        let desc = self.catalog.lookup_by_address(address)?;
        let reply = self.exchange(HarpMessage::read(desc.address, desc.payload_type))?;
        self.decode_reply(desc, &reply, |bytes| desc.decode(bytes))
    }

    /// Writes a dynamically typed value to the register named by `shape`.
    pub fn write_value(&mut self, shape: RegisterShape, value: &RegisterValue) -> Result<()> {
        let desc = self.catalog.descriptor_for_shape(shape)?;
        let bytes = desc.encode(value)?;
        self.send_write(desc, &bytes)
    }

    /// Waits for the next message from the device and decodes it.
    pub fn recv_record(&mut self, timeout_ms: Option<u64>) -> Result<RegisterRecord> {
        let msg = self.link.recv(timeout_ms)?;
        if let Some(m) = &self.metrics {
            m.rx_messages.inc();
        }
        decode_message(self.catalog, &msg).inspect_err(|e| {
            tracing::warn!(address = msg.address, error = %e, "undecodable message");
            if let Some(m) = &self.metrics {
                m.decode_errors.inc();
            }
        })
    }

    fn descriptor_of<R: Register>(&self) -> Result<&'static RegisterDescriptor> {
        if R::MODEL != self.model {
            return Err(RegistryError::ForeignRegister {
                register: R::NAME,
                model: self.model,
            });
        }
        self.catalog.descriptor_for_shape(R::SHAPE)
    }

    fn send_write(&mut self, desc: &RegisterDescriptor, bytes: &[u8]) -> Result<()> {
        tracing::debug!(register = desc.name, address = desc.address, ?bytes, "write");
        let reply = self.exchange(HarpMessage::write(desc.address, desc.payload_type, bytes))?;
        Self::check_payload_type(desc, &reply)
    }

    fn exchange(&mut self, request: HarpMessage) -> Result<HarpMessage> {
        if let Some(m) = &self.metrics {
            m.tx_messages.inc();
        }
        match self.link.command(&request) {
            Ok(reply) => {
                if let Some(m) = &self.metrics {
                    m.rx_messages.inc();
                }
                Ok(reply)
            }
            Err(e) => {
                if let (TransportError::Device { .. }, Some(m)) = (&e, &self.metrics) {
                    m.rx_messages.inc();
                    m.device_errors.inc();
                }
                tracing::warn!(address = request.address, error = %e, "request failed");
                Err(e.into())
            }
        }
    }

    fn check_payload_type(desc: &RegisterDescriptor, reply: &HarpMessage) -> Result<()> {
        if reply.payload_type != desc.payload_type {
            return Err(RegistryError::PayloadTypeMismatch {
                register: desc.name,
                expected: desc.payload_type,
                actual: reply.payload_type,
            });
        }
        Ok(())
    }

    fn decode_reply<T>(
        &self,
        desc: &RegisterDescriptor,
        reply: &HarpMessage,
        decode: impl FnOnce(&[u8]) -> Result<T>,
    ) -> Result<T> {
        Self::check_payload_type(desc, reply)?;
        decode(&reply.payload).inspect_err(|e| {
            tracing::warn!(register = desc.name, error = %e, "reply failed to decode");
            if let Some(m) = &self.metrics {
                m.decode_errors.inc();
            }
        })
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::cuttlefish::{self, Ports, PwmTaskPayload};
    use crate::{fip, MetricsHub, TaskState};
    use harp_transport::{MockLink, PayloadType};

    fn cuttlefish_link() -> MockLink {
        let mut link = MockLink::with_who_am_i(1403);
        for desc in DeviceModel::Cuttlefish.catalog().unwrap().descriptors() {
            link.set_register(desc.address, desc.payload_type, &vec![0; desc.width]);
        }
        link
    }

    #[test]
    fn test_identity_mismatch() {
        let link = MockLink::with_who_am_i(1407);
        assert!(matches!(
            Device::connect(link, DeviceModel::Cuttlefish),
            Err(RegistryError::DeviceIdentityMismatch {
                expected: 1403,
                actual: 1407
            })
        ));
    }

    #[test]
    fn test_typed_write_then_read() {
        let mut dev = Device::connect(cuttlefish_link(), DeviceModel::Cuttlefish).unwrap();
        let task = PwmTaskPayload {
            delay: 10,
            on_time: 500,
            period: 1000,
            port_mask: Ports::PORT1,
            repeats: 4,
            invert: crate::Toggle::OFF,
        };
        dev.write::<cuttlefish::PwmTask>(&task).unwrap();
        assert_eq!(dev.read::<cuttlefish::PwmTask>().unwrap(), task);

        let sent = dev.link_mut().sent();
        let write = &sent[sent.len() - 2];
        assert_eq!(write.address, 34);
        assert_eq!(write.payload.len(), 18);
    }

    #[test]
    fn test_read_timestamped() {
        let mut dev = Device::connect(cuttlefish_link(), DeviceModel::Cuttlefish).unwrap();
        dev.write::<cuttlefish::PortState>(&(Ports::PORT0 | Ports::PORT7))
            .unwrap();
        let stamped = dev.read_timestamped::<cuttlefish::PortState>().unwrap();
        assert_eq!(stamped.value, Ports::PORT0 | Ports::PORT7);
        assert!(stamped.seconds >= 0.0);
    }

    #[test]
    fn test_foreign_register() {
        let mut dev = Device::connect(cuttlefish_link(), DeviceModel::Cuttlefish).unwrap();
        assert_eq!(
            dev.read::<fip::TaskCount>(),
            Err(RegistryError::ForeignRegister {
                register: "TaskCount",
                model: DeviceModel::Cuttlefish
            })
        );
        assert!(dev.write::<fip::SetTaskState>(&TaskState::START).is_err());
    }

    #[test]
    fn test_payload_type_mismatch() {
        let mut link = cuttlefish_link();
        link.set_register(33, PayloadType::U16, &[1, 0]);
        let mut dev = Device::connect(link, DeviceModel::Cuttlefish).unwrap();
        assert!(matches!(
            dev.read::<cuttlefish::PortState>(),
            Err(RegistryError::PayloadTypeMismatch {
                register: "PortState",
                expected: PayloadType::U8,
                actual: PayloadType::U16
            })
        ));
    }

    #[test]
    fn test_encode_error_sends_nothing() {
        let mut dev = Device::connect(cuttlefish_link(), DeviceModel::Cuttlefish).unwrap();
        let before = dev.link_mut().sent().len();
        let ctl = cuttlefish::TaskControlPayload {
            task_count: 16,
            ..Default::default()
        };
        assert!(matches!(
            dev.write::<cuttlefish::TaskControl>(&ctl),
            Err(RegistryError::ValueOutOfRange { .. })
        ));
        assert_eq!(dev.link_mut().sent().len(), before);
    }

    #[test]
    fn test_dynamic_access() {
        let mut dev = Device::connect(cuttlefish_link(), DeviceModel::Cuttlefish).unwrap();
        dev.write_value(RegisterShape::SoftwareStartTrigger, &RegisterValue::Byte(1))
            .unwrap();
        assert_eq!(dev.read_address(39).unwrap(), RegisterValue::Byte(1));
        assert!(matches!(
            dev.write_value(RegisterShape::PortDirection, &RegisterValue::Byte(1)),
            Err(RegistryError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            dev.write_value(RegisterShape::AddTask, &RegisterValue::Byte(1)),
            Err(RegistryError::UnknownRegisterShape { .. })
        ));
        assert!(matches!(
            dev.read_address(50),
            Err(RegistryError::UnknownRegister { address: 50, .. })
        ));
    }

    #[test]
    fn test_metrics_and_device_errors() {
        let hub = MetricsHub::new().unwrap();
        let mut link = cuttlefish_link();
        link.on_write(39, Box::new(|_, _| false));
        let mut dev = Device::connect(link, DeviceModel::Cuttlefish)
            .unwrap()
            .with_metrics(hub.dev.clone());
        dev.read::<cuttlefish::PortDirection>().unwrap();
        assert!(matches!(
            dev.write::<cuttlefish::SoftwareStartTrigger>(&1),
            Err(RegistryError::Transport(TransportError::Device { address: 39, .. }))
        ));
        assert_eq!(hub.dev.tx_messages.get(), 2);
        assert_eq!(hub.dev.rx_messages.get(), 2);
        assert_eq!(hub.dev.device_errors.get(), 1);
    }

    #[test]
    fn test_recv_record_decodes_events() {
        let mut dev = Device::connect(cuttlefish_link(), DeviceModel::Cuttlefish).unwrap();
        dev.link_mut().push_event(33, PayloadType::U8, &[0x03]);
        let rec = dev.recv_record(Some(10)).unwrap();
        assert_eq!(rec.register, "PortState");
        assert_eq!(
            rec.value,
            Some(RegisterValue::CuttlefishPorts(Ports::PORT0 | Ports::PORT1))
        );
        assert!(matches!(
            dev.recv_record(Some(10)),
            Err(RegistryError::Transport(TransportError::Timeout))
        ));
    }

    #[test]
    fn test_events_during_command_are_kept() {
        let mut dev = Device::connect(cuttlefish_link(), DeviceModel::Cuttlefish).unwrap();
        dev.link_mut().push_event(33, PayloadType::U8, &[0x80]);
        dev.read::<cuttlefish::PortDirection>().unwrap();
        let rec = dev.recv_record(Some(10)).unwrap();
        assert_eq!(rec.register, "PortState");
        assert_eq!(rec.value, Some(RegisterValue::CuttlefishPorts(Ports::PORT7)));
    }
}
