use prometheus::{Encoder, IntCounter, Registry, TextEncoder};

#[derive(Clone)]
pub struct DeviceMetrics {
    pub tx_messages: IntCounter,
    pub rx_messages: IntCounter,
    pub decode_errors: IntCounter,
    pub device_errors: IntCounter,
}

#[derive(Clone)]
pub struct MetricsHub {
    pub registry: Registry,
    pub dev: DeviceMetrics,
}

impl MetricsHub {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        let tx_messages = IntCounter::new("cf_harp_tx_messages", "Total Harp messages sent")?;
        let rx_messages =
            IntCounter::new("cf_harp_rx_messages", "Total Harp messages received")?;
        let decode_errors = IntCounter::new(
            "cf_decode_errors",
            "Messages whose payload failed to decode",
        )?;
        let device_errors =
            IntCounter::new("cf_device_errors", "Error replies returned by the device")?;
        let dev = DeviceMetrics {
            tx_messages,
            rx_messages,
            decode_errors,
            device_errors,
        };
        registry.register(Box::new(dev.tx_messages.clone()))?;
        registry.register(Box::new(dev.rx_messages.clone()))?;
        registry.register(Box::new(dev.decode_errors.clone()))?;
        registry.register(Box::new(dev.device_errors.clone()))?;
        Ok(Self { registry, dev })
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}
