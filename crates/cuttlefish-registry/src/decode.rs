use crate::{Catalog, DeviceModel, RegisterValue, RegistryError, Result};
use core::fmt;
use harp_transport::{HarpMessage, MessageType};
use serde::Serialize;
use time::OffsetDateTime;

/// A Harp message resolved against a register catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegisterRecord {
    pub model: DeviceModel,
    pub register: &'static str,
    pub address: u8,
    pub message_type: MessageType,
    pub error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_ts: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<RegisterValue>,
}

impl RegisterRecord {
    /// Stamps the record with the host wall-clock time (RFC 3339).
    pub fn with_host_time(mut self, ts: OffsetDateTime) -> Self {
        self.host_ts = ts
            .format(&time::format_description::well_known::Rfc3339)
            .ok();
        self
    }
}

impl fmt::Display for RegisterRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {}({})", self.message_type, self.register, self.address)?;
        if self.error {
            f.write_str(" error")?;
        }
        if let Some(value) = &self.value {
            write!(f, " {value}")?;
        }
        if let Some(seconds) = self.seconds {
            write!(f, " @ {seconds:.6}s")?;
        }
        Ok(())
    }
}

/// Decodes one message against `catalog`.
///
/// Messages without payload bytes (read requests, error replies) produce a
/// record with no value.
pub fn decode_message(catalog: &Catalog, msg: &HarpMessage) -> Result<RegisterRecord> {
    let desc = catalog.lookup_by_address(msg.address)?;
    let value = if msg.payload.is_empty() {
        None
    } else {
        if msg.payload_type != desc.payload_type {
            return Err(RegistryError::PayloadTypeMismatch {
                register: desc.name,
                expected: desc.payload_type,
                actual: msg.payload_type,
            });
        }
        Some(desc.decode(&msg.payload)?)
    };
    Ok(RegisterRecord {
        model: catalog.model(),
        register: desc.name,
        address: desc.address,
        message_type: msg.message_type,
        error: msg.error,
        seconds: msg.timestamp.map(|t| t.seconds()),
        host_ts: None,
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fip;
    use harp_transport::{PayloadType, Timestamp};

    fn fip_catalog() -> &'static Catalog {
        DeviceModel::CuttlefishFip.catalog().unwrap()
    }

    #[test]
    fn test_decode_event() {
        let msg = HarpMessage::new(MessageType::Event, 37, PayloadType::U8, &[0x06])
            .with_timestamp(Timestamp::from_parts(2, 15_625));
        let rec = decode_message(fip_catalog(), &msg).unwrap();
        assert_eq!(rec.register, "TaskRisingEdgeEvent");
        assert_eq!(
            rec.value,
            Some(RegisterValue::FipPorts(fip::Ports::IO1 | fip::Ports::IO2))
        );
        assert!((rec.seconds.unwrap() - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_decode_request_without_value() {
        let msg = HarpMessage::read(36, PayloadType::U8);
        let rec = decode_message(fip_catalog(), &msg).unwrap();
        assert_eq!(rec.register, "TaskCount");
        assert!(rec.value.is_none());
        let json = serde_json::to_value(&rec).unwrap();
        assert!(json.get("value").is_none());
        assert_eq!(json["message_type"], "read");
    }

    #[test]
    fn test_decode_errors() {
        let unknown = HarpMessage::write(99, PayloadType::U8, &[1]);
        assert!(matches!(
            decode_message(fip_catalog(), &unknown),
            Err(RegistryError::UnknownRegister { address: 99, .. })
        ));
        let wrong_type = HarpMessage::write(36, PayloadType::U16, &[1, 0]);
        assert!(matches!(
            decode_message(fip_catalog(), &wrong_type),
            Err(RegistryError::PayloadTypeMismatch { .. })
        ));
        let short = HarpMessage::write(33, PayloadType::U8, &[1, 2]);
        assert!(matches!(
            decode_message(fip_catalog(), &short),
            Err(RegistryError::TruncatedPayload { .. })
        ));
    }

    #[test]
    fn test_host_time() {
        let msg = HarpMessage::write(35, PayloadType::U8, &[1]);
        let rec = decode_message(fip_catalog(), &msg)
            .unwrap()
            .with_host_time(OffsetDateTime::UNIX_EPOCH);
        assert_eq!(rec.host_ts.as_deref(), Some("1970-01-01T00:00:00Z"));
        assert_eq!(rec.to_string(), "Write ClearAllTasks(35) 1");
    }
}
