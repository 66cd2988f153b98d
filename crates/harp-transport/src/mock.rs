use crate::{
    HarpLink, HarpMessage, MessageType, PayloadType, PortInfo, Result, Timestamp, TransportError,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Instant;

/// Register contents held by a [`MockLink`].
#[derive(Debug, Default, Clone)]
pub struct RegisterFile {
    regs: BTreeMap<u8, (PayloadType, Vec<u8>)>,
}

impl RegisterFile {
    pub fn get(&self, address: u8) -> Option<&[u8]> {
        self.regs.get(&address).map(|(_, v)| v.as_slice())
    }

    pub fn payload_type(&self, address: u8) -> Option<PayloadType> {
        self.regs.get(&address).map(|(t, _)| *t)
    }

    pub fn set(&mut self, address: u8, payload_type: PayloadType, payload: &[u8]) {
        self.regs.insert(address, (payload_type, payload.to_vec()));
    }
}

/// Handles a write in place of the default store. Returning `false` turns the
/// reply into an error.
pub type WriteHook = Box<dyn FnMut(&[u8], &mut RegisterFile) -> bool + Send>;

/// An in-process Harp device. Each instance is independent.
///
/// Reads and writes are answered from a register file, replies are stamped with
/// the time since the link was opened, and every sent message is recorded.
pub struct MockLink {
    name: String,
    registers: RegisterFile,
    hooks: HashMap<u8, WriteHook>,
    pending: VecDeque<HarpMessage>,
    deferred: VecDeque<HarpMessage>,
    sent: Vec<HarpMessage>,
    epoch: Instant,
}

impl MockLink {
    pub fn with_who_am_i(who_am_i: u16) -> Self {
        let mut registers = RegisterFile::default();
        registers.set(
            crate::WHO_AM_I_ADDRESS,
            PayloadType::U16,
            &who_am_i.to_le_bytes(),
        );
        Self {
            name: "mock0".to_string(),
            registers,
            hooks: HashMap::new(),
            pending: VecDeque::new(),
            deferred: VecDeque::new(),
            sent: Vec::new(),
            epoch: Instant::now(),
        }
    }

    pub fn set_register(&mut self, address: u8, payload_type: PayloadType, payload: &[u8]) {
        self.registers.set(address, payload_type, payload);
    }

    pub fn registers(&self) -> &RegisterFile {
        &self.registers
    }

    pub fn on_write(&mut self, address: u8, hook: WriteHook) {
        self.hooks.insert(address, hook);
    }

    /// Queue an event as if the device had raised it.
    pub fn push_event(&mut self, address: u8, payload_type: PayloadType, payload: &[u8]) {
        let msg = HarpMessage::new(MessageType::Event, address, payload_type, payload)
            .with_timestamp(self.now());
        self.pending.push_back(msg);
    }

    /// Messages sent to this link, oldest first.
    pub fn sent(&self) -> &[HarpMessage] {
        &self.sent
    }

    fn now(&self) -> Timestamp {
        Timestamp(self.epoch.elapsed().as_secs_f64())
    }

    fn reply(
        &self,
        request: &HarpMessage,
        payload_type: PayloadType,
        payload: &[u8],
    ) -> HarpMessage {
        HarpMessage::new(request.message_type, request.address, payload_type, payload)
            .with_timestamp(self.now())
    }

    fn error_reply(&self, request: &HarpMessage) -> HarpMessage {
        let mut msg = self.reply(request, request.payload_type, &[]);
        msg.error = true;
        msg
    }

    fn answer(&mut self, request: &HarpMessage) -> HarpMessage {
        let Some(stored_type) = self.registers.payload_type(request.address) else {
            return self.error_reply(request);
        };
        match request.message_type {
            MessageType::Read => {
                let payload = self
                    .registers
                    .get(request.address)
                    .unwrap_or_default()
                    .to_vec();
                self.reply(request, stored_type, &payload)
            }
            MessageType::Write => {
                if stored_type != request.payload_type {
                    return self.error_reply(request);
                }
                let accepted = match self.hooks.get_mut(&request.address) {
                    Some(hook) => hook(&request.payload, &mut self.registers),
                    None => {
                        self.registers
                            .set(request.address, stored_type, &request.payload);
                        true
                    }
                };
                if accepted {
                    self.reply(request, stored_type, &request.payload)
                } else {
                    self.error_reply(request)
                }
            }
            MessageType::Event => self.error_reply(request),
        }
    }
}

impl HarpLink for MockLink {
    fn open(name: &str) -> Result<Self> {
        let mut link = Self::with_who_am_i(0);
        link.name = name.to_string();
        Ok(link)
    }

    fn list() -> Result<Vec<PortInfo>> {
        Ok(vec![PortInfo {
            name: "mock0".to_string(),
            driver: "mock".to_string(),
        }])
    }

    fn recv(&mut self, _timeout_ms: Option<u64>) -> Result<HarpMessage> {
        self.deferred
            .pop_front()
            .or_else(|| self.pending.pop_front())
            .ok_or(TransportError::Timeout)
    }

    fn defer_event(&mut self, msg: HarpMessage) {
        self.deferred.push_back(msg);
    }

    fn send(&mut self, msg: &HarpMessage) -> Result<()> {
        tracing::trace!(link = %self.name, %msg, "mock send");
        self.sent.push(msg.clone());
        let reply = self.answer(msg);
        self.pending.push_back(reply);
        Ok(())
    }
}
