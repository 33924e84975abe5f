//! Scripted stand-ins for the hardware seams, shared by the unit tests.

use crate::clock::Clock;
use crate::lease::{LeaseEvent, LeaseProtocol, LeaseStep, NetConfigurator, NetworkIdentity};
use crate::sensor::{AnalogSensor, SensorReading};
use crate::transport::{PeerEndpoint, SocketState, Transport, TransportError};
use std::cell::Cell;
use std::collections::VecDeque;
use std::net::Ipv4Addr;

/// Clock that only moves when told to (or when slept on)
pub struct ManualClock {
    now: Cell<u64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self { now: Cell::new(0) }
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }

    fn sleep_ms(&self, ms: u32) {
        self.advance(u64::from(ms));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Open(u16),
    Listen,
    ClearConnectFlag,
    Receive(usize),
    Send(usize),
    Close,
    Disconnect,
}

/// In-memory socket whose status is set by the test
pub struct MockTransport {
    pub state: SocketState,
    pub connect_flag: bool,
    pub peer: Option<PeerEndpoint>,
    pub inbound: Vec<u8>,
    pub sends: Vec<Vec<u8>>,
    pub send_attempts: usize,
    /// Zero-based index of the send attempt that fails
    pub fail_send_at: Option<usize>,
    pub fail_open: bool,
    pub fail_listen: bool,
    pub fail_receive: bool,
    pub fail_close: bool,
    /// Status reported after a graceful disconnect from `Established`
    pub after_disconnect: SocketState,
    pub calls: Vec<Call>,
    pub status_queries: Cell<usize>,
}

impl MockTransport {
    pub fn new(state: SocketState) -> Self {
        Self {
            state,
            connect_flag: false,
            peer: None,
            inbound: Vec::new(),
            sends: Vec::new(),
            send_attempts: 0,
            fail_send_at: None,
            fail_open: false,
            fail_listen: false,
            fail_receive: false,
            fail_close: false,
            after_disconnect: SocketState::Closed,
            calls: Vec::new(),
            status_queries: Cell::new(0),
        }
    }

    /// A freshly accepted connection from 192.168.1.50:51000 carrying `request`.
    pub fn connected_with(request: &[u8]) -> Self {
        let mut transport = Self::new(SocketState::Established);
        transport.connect_flag = true;
        transport.peer = Some(PeerEndpoint {
            address: Ipv4Addr::new(192, 168, 1, 50),
            port: 51000,
        });
        transport.inbound = request.to_vec();
        transport
    }

    pub fn sent_bytes(&self) -> Vec<u8> {
        self.sends.concat()
    }

    pub fn sent_text(&self) -> String {
        String::from_utf8(self.sent_bytes()).unwrap()
    }
}

impl Transport for MockTransport {
    fn socket_id(&self) -> u8 {
        1
    }

    fn status(&self) -> SocketState {
        self.status_queries.set(self.status_queries.get() + 1);
        self.state
    }

    fn open(&mut self, port: u16) -> Result<(), TransportError> {
        self.calls.push(Call::Open(port));
        if self.state != SocketState::Closed {
            return Err(TransportError::NotClosed);
        }
        if self.fail_open {
            return Err(TransportError::Listen);
        }
        self.state = SocketState::Init;
        Ok(())
    }

    fn listen(&mut self) -> Result<(), TransportError> {
        self.calls.push(Call::Listen);
        if self.state != SocketState::Init {
            return Err(TransportError::NotOpened);
        }
        if self.fail_listen {
            self.state = SocketState::Closed;
            return Err(TransportError::Listen);
        }
        self.state = SocketState::Listening;
        Ok(())
    }

    fn connect_flag(&self) -> bool {
        self.connect_flag
    }

    fn clear_connect_flag(&mut self) {
        self.calls.push(Call::ClearConnectFlag);
        self.connect_flag = false;
    }

    fn peer(&self) -> Option<PeerEndpoint> {
        self.peer
    }

    fn receive_available(&self) -> usize {
        self.inbound.len()
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.calls.push(Call::Receive(buf.len()));
        if self.fail_receive {
            return Err(TransportError::Receive);
        }
        let count = buf.len().min(self.inbound.len());
        buf[..count].copy_from_slice(&self.inbound[..count]);
        self.inbound.drain(..count);
        Ok(count)
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let attempt = self.send_attempts;
        self.send_attempts += 1;
        self.calls.push(Call::Send(bytes.len()));
        if self.fail_send_at == Some(attempt) {
            return Err(TransportError::Send);
        }
        self.sends.push(bytes.to_vec());
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.calls.push(Call::Close);
        if self.fail_close {
            return Err(TransportError::ConnectionClosed);
        }
        self.state = SocketState::Closed;
        self.connect_flag = false;
        self.peer = None;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        self.calls.push(Call::Disconnect);
        self.state = match self.state {
            SocketState::Established => self.after_disconnect,
            _ => SocketState::Closed,
        };
        Ok(())
    }
}

/// Sensor that always reports the same value
pub struct FixedSensor {
    pub raw: u16,
    pub samples: usize,
}

impl FixedSensor {
    pub fn new(raw: u16) -> Self {
        Self { raw, samples: 0 }
    }
}

impl AnalogSensor for FixedSensor {
    fn sample(&mut self) -> SensorReading {
        self.samples += 1;
        SensorReading {
            channel: crate::config::SENSOR_CHANNEL,
            raw: self.raw,
        }
    }
}

/// Lease protocol that replays a fixed list of step results
pub struct ScriptedLease {
    script: VecDeque<(LeaseStep, Option<LeaseEvent>)>,
    pending: VecDeque<LeaseEvent>,
    pub runs: usize,
    pub applied: Vec<NetworkIdentity>,
}

impl ScriptedLease {
    pub fn new(script: Vec<(LeaseStep, Option<LeaseEvent>)>) -> Self {
        Self {
            script: script.into(),
            pending: VecDeque::new(),
            runs: 0,
            applied: Vec::new(),
        }
    }

    /// Queue an event outside of any protocol step
    pub fn push_event(&mut self, event: LeaseEvent) {
        self.pending.push_back(event);
    }
}

impl LeaseProtocol for ScriptedLease {
    fn step(&mut self) -> LeaseStep {
        self.runs += 1;
        // an exhausted script keeps the protocol busy forever
        let (step, event) = self.script.pop_front().unwrap_or((LeaseStep::Running, None));
        if let Some(event) = event {
            self.pending.push_back(event);
        }
        step
    }

    fn next_event(&mut self) -> Option<LeaseEvent> {
        self.pending.pop_front()
    }
}

impl NetConfigurator for ScriptedLease {
    fn apply(&mut self, identity: &NetworkIdentity) {
        self.applied.push(*identity);
    }
}
