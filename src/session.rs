//! Session state machine
//!
//! Drives the single server socket through closed -> listening -> established
//! -> half-closed -> closed. The socket status is re-read every tick, so the
//! only state kept between ticks is the receive buffer. Decisions are made by
//! a pure transition table; `Session::drive` carries them out.

use crate::config;
use crate::response;
use crate::sensor::AnalogSensor;
use crate::transport::{SocketState, Transport, TransportError};
use core::fmt;
use heapless::Vec as HeaplessVec;
use log::{debug, info, warn};

/// Maximum number of actions produced by one transition
pub const MAX_ACTIONS: usize = 3;

/// What the transport reported this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollEvent {
    /// Connection-established flag is raised
    pub connected: bool,
    /// Bytes waiting to be received
    pub pending: usize,
}

/// Side effect requested by the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Open the socket on the given port
    Open(u16),
    /// Put the opened socket into listen mode
    Listen,
    /// Log the peer and acknowledge the connect flag
    AnnouncePeer,
    /// Receive `len` bytes and answer with the sensor page
    Serve { len: usize },
    /// Graceful close; `peer_closed` is set when the peer hung up first
    Disconnect { peer_closed: bool },
}

/// Outcome of the transition table for one tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// State the socket is expected to reach once the actions are done
    pub next: SocketState,
    pub actions: HeaplessVec<Action, MAX_ACTIONS>,
}

impl Transition {
    fn stay(state: SocketState) -> Self {
        Self {
            next: state,
            actions: HeaplessVec::new(),
        }
    }

    fn to(next: SocketState, actions: &[Action]) -> Self {
        let mut list = HeaplessVec::new();
        for action in actions {
            // tables below never exceed MAX_ACTIONS
            let _ = list.push(*action);
        }
        Self { next, actions: list }
    }
}

/// Pure transition table for the server socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStateMachine {
    port: u16,
    capacity: usize,
}

impl SessionStateMachine {
    pub fn new(port: u16, capacity: usize) -> Self {
        Self { port, capacity }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Map the observed socket state and poll result to the next step.
    pub fn transition(&self, state: SocketState, event: PollEvent) -> Transition {
        match state {
            SocketState::Closed => Transition::to(SocketState::Init, &[Action::Open(self.port)]),

            SocketState::Init => Transition::to(SocketState::Listening, &[Action::Listen]),

            // The transport moves to Established on its own when a peer connects
            SocketState::Listening => Transition::stay(SocketState::Listening),

            SocketState::Established => {
                let mut actions: HeaplessVec<Action, MAX_ACTIONS> = HeaplessVec::new();
                if event.connected {
                    let _ = actions.push(Action::AnnouncePeer);
                }
                if event.pending == 0 {
                    return Transition {
                        next: SocketState::Established,
                        actions,
                    };
                }
                // anything beyond capacity stays in the transport
                let len = event.pending.min(self.capacity);
                let _ = actions.push(Action::Serve { len });
                let _ = actions.push(Action::Disconnect { peer_closed: false });
                Transition {
                    next: SocketState::Closed,
                    actions,
                }
            }

            SocketState::CloseWait => Transition::to(
                SocketState::Closed,
                &[Action::Disconnect { peer_closed: true }],
            ),

            SocketState::Transitional => Transition::stay(SocketState::Transitional),
        }
    }
}

/// Failures of one `Session::drive` tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    Open(TransportError),
    Listen(TransportError),
    Receive(TransportError),
    Send(TransportError),
    Disconnect(TransportError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Open(e) => write!(f, "open failed: {}", e),
            SessionError::Listen(e) => write!(f, "listen failed: {}", e),
            SessionError::Receive(e) => write!(f, "receive failed: {}", e),
            SessionError::Send(e) => write!(f, "response aborted: {}", e),
            SessionError::Disconnect(e) => write!(f, "disconnect failed: {}", e),
        }
    }
}

/// The one server session bound to the transport's socket
pub struct Session {
    machine: SessionStateMachine,
    buffer: [u8; config::RX_BUFFER_SIZE],
}

impl Session {
    pub fn new(port: u16) -> Self {
        Self {
            machine: SessionStateMachine::new(port, config::RX_BUFFER_SIZE),
            buffer: [0; config::RX_BUFFER_SIZE],
        }
    }

    pub fn machine(&self) -> &SessionStateMachine {
        &self.machine
    }

    /// Run one tick: read the socket status, apply the transition table and
    /// perform its actions.
    ///
    /// Returns the state the socket is expected to be in next. Errors are
    /// local to this tick; on a receive or send failure the socket has already
    /// been reset so the next tick starts from `Closed`.
    pub fn drive<T, S>(&mut self, transport: &mut T, sensor: &mut S) -> Result<SocketState, SessionError>
    where
        T: Transport,
        S: AnalogSensor,
    {
        let state = transport.status();
        let event = match state {
            SocketState::Established => PollEvent {
                connected: transport.connect_flag(),
                pending: transport.receive_available(),
            },
            _ => PollEvent::default(),
        };

        let transition = self.machine.transition(state, event);
        for action in transition.actions.iter() {
            if !self.execute(*action, transport, sensor)? {
                return Ok(state);
            }
        }
        Ok(transition.next)
    }

    /// Returns `Ok(false)` when the rest of this tick should be skipped.
    fn execute<T, S>(&mut self, action: Action, transport: &mut T, sensor: &mut S) -> Result<bool, SessionError>
    where
        T: Transport,
        S: AnalogSensor,
    {
        let sn = transport.socket_id();
        match action {
            Action::Open(port) => {
                transport.open(port).map_err(SessionError::Open)?;
                debug!("[HTTP] {}:Opened on port {}", sn, port);
            }
            Action::Listen => {
                info!("[HTTP] {}:Listen, Web server, port [{}]", sn, self.machine.port());
                transport.listen().map_err(SessionError::Listen)?;
            }
            Action::AnnouncePeer => {
                if let Some(peer) = transport.peer() {
                    info!("[HTTP] {}:Connected - {}", sn, peer);
                }
                transport.clear_connect_flag();
            }
            Action::Serve { len } => {
                let received = match transport.receive(&mut self.buffer[..len]) {
                    Ok(received) => received,
                    Err(e) => {
                        warn!("[HTTP] {}:Receive error: {}", sn, e);
                        reset(sn, transport);
                        return Err(SessionError::Receive(e));
                    }
                };
                if received == 0 {
                    return Ok(false);
                }
                log_request(sn, &self.buffer[..received]);

                let reading = sensor.sample();
                match response::compose(&reading, transport) {
                    Ok(written) => {
                        debug!("[HTTP] {}:Sent {} bytes, sensor={}", sn, written, reading.raw);
                    }
                    Err(e) => {
                        warn!("[HTTP] {}:Response aborted: {}", sn, e);
                        reset(sn, transport);
                        return Err(SessionError::Send(e));
                    }
                }
            }
            Action::Disconnect { peer_closed } => {
                transport.disconnect().map_err(SessionError::Disconnect)?;
                if peer_closed {
                    info!("[HTTP] {}:Socket Closed", sn);
                }
            }
        }
        Ok(true)
    }
}

/// Hard-close after a failed exchange; the caller reports the original error.
fn reset<T: Transport>(sn: u8, transport: &mut T) {
    if let Err(e) = transport.close() {
        warn!("[HTTP] {}:Reset failed: {}", sn, e);
    }
}

/// First line of `request`, cut at the first byte that is not valid UTF-8.
fn request_line(request: &[u8]) -> &str {
    let line = request
        .split(|byte| *byte == b'\r' || *byte == b'\n')
        .next()
        .unwrap_or_default();
    match core::str::from_utf8(line) {
        Ok(text) => text,
        // the prefix up to `valid_up_to` is valid UTF-8 by definition
        Err(e) => core::str::from_utf8(&line[..e.valid_up_to()]).unwrap_or_default(),
    }
}

fn log_request(sn: u8, request: &[u8]) {
    debug!("[HTTP] {}:Request {} ({} bytes)", sn, request_line(request), request.len());
}
