use crate::{HarpMessage, MessageType, PortInfo, Result, TransportError};

/// A minimal blocking link to one Harp device.
pub trait HarpLink {
    /// Open a link by name (e.g., "/dev/ttyACM0", "mock0").
    fn open(name: &str) -> Result<Self>
    where
        Self: Sized;

    /// Attempt to list available ports for this backend.
    fn list() -> Result<Vec<PortInfo>>;

    /// Receive one message (blocking with optional timeout in milliseconds).
    fn recv(&mut self, timeout_ms: Option<u64>) -> Result<HarpMessage>;

    /// Send one message.
    fn send(&mut self, msg: &HarpMessage) -> Result<()>;

    /// Timeout used by [`HarpLink::command`] while waiting for a reply.
    fn reply_timeout_ms(&self) -> u64 {
        500
    }

    /// Keep an event that arrived while [`HarpLink::command`] awaited a reply,
    /// so that a later [`HarpLink::recv`] returns it. Links without a queue
    /// drop it.
    fn defer_event(&mut self, msg: HarpMessage) {
        tracing::warn!(
            address = msg.address,
            "dropping event received while awaiting reply"
        );
    }

    /// Send a request and wait for the reply to it.
    ///
    /// The reply is the first message with the request's address and message
    /// type. Events that arrive first are handed to [`HarpLink::defer_event`];
    /// unrelated replies are dropped.
    fn command(&mut self, request: &HarpMessage) -> Result<HarpMessage> {
        self.send(request)?;
        let timeout = self.reply_timeout_ms();
        let mut events = Vec::new();
        let reply = loop {
            match self.recv(Some(timeout)) {
                Ok(msg) if msg.message_type == MessageType::Event => events.push(msg),
                Ok(msg)
                    if msg.address != request.address
                        || msg.message_type != request.message_type =>
                {
                    tracing::warn!(
                        address = msg.address,
                        kind = ?msg.message_type,
                        "dropping unrelated reply"
                    );
                }
                other => break other,
            }
        };
        for event in events {
            self.defer_event(event);
        }
        let msg = reply?;
        if msg.error {
            return Err(TransportError::Device {
                address: msg.address,
                message_type: msg.message_type,
            });
        }
        Ok(msg)
    }
}

/// Reads the device identity from Harp core register 0.
pub fn read_who_am_i<L: HarpLink + ?Sized>(link: &mut L) -> Result<u16> {
    let reply = link.command(&HarpMessage::read(
        crate::WHO_AM_I_ADDRESS,
        crate::PayloadType::U16,
    ))?;
    reply
        .payload_u16()
        .ok_or(TransportError::InvalidFrame("short WhoAmI payload"))
}
