//! Session self test
//!
//! Runs the socket transition table and one complete request against an
//! in-memory socket on the board, printing each check.

#![no_std]
#![no_main]

use core::net::Ipv4Addr;
use esp_hal::clock::CpuClock;
use esp_hal::delay::Delay;
use esp_println::println;
use heapless::Vec;

use sensor_web::config;
use sensor_web::response::{self, FRAGMENT_COUNT, ValueToken};
use sensor_web::sensor::{AnalogSensor, SensorReading};
use sensor_web::session::{Action, PollEvent, Session, SessionStateMachine};
use sensor_web::transport::{PeerEndpoint, SocketState, Transport, TransportError};

// Add app descriptor for espflash compatibility
esp_bootloader_esp_idf::esp_app_desc!();

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    println!("❌ {}", info);
    loop {}
}

const PAGE_CAPACITY: usize = 4096;

/// Socket that lives entirely in RAM
struct MemorySocket {
    state: SocketState,
    connect_flag: bool,
    inbound: &'static [u8],
    outbound: Vec<u8, PAGE_CAPACITY>,
    sends: usize,
}

impl MemorySocket {
    fn new() -> Self {
        Self {
            state: SocketState::Closed,
            connect_flag: false,
            inbound: &[],
            outbound: Vec::new(),
            sends: 0,
        }
    }

    /// Pretend a browser connected and sent `request`
    fn accept(&mut self, request: &'static [u8]) {
        self.state = SocketState::Established;
        self.connect_flag = true;
        self.inbound = request;
    }

    fn page(&self) -> &str {
        core::str::from_utf8(&self.outbound).unwrap_or("")
    }
}

impl Transport for MemorySocket {
    fn socket_id(&self) -> u8 {
        config::SERVER_SOCKET
    }

    fn status(&self) -> SocketState {
        self.state
    }

    fn open(&mut self, _port: u16) -> Result<(), TransportError> {
        if self.state != SocketState::Closed {
            return Err(TransportError::NotClosed);
        }
        self.state = SocketState::Init;
        Ok(())
    }

    fn listen(&mut self) -> Result<(), TransportError> {
        if self.state != SocketState::Init {
            return Err(TransportError::NotOpened);
        }
        self.state = SocketState::Listening;
        Ok(())
    }

    fn connect_flag(&self) -> bool {
        self.connect_flag
    }

    fn clear_connect_flag(&mut self) {
        self.connect_flag = false;
    }

    fn peer(&self) -> Option<PeerEndpoint> {
        Some(PeerEndpoint {
            address: Ipv4Addr::new(192, 168, 1, 50),
            port: 51000,
        })
    }

    fn receive_available(&self) -> usize {
        self.inbound.len()
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let count = buf.len().min(self.inbound.len());
        buf[..count].copy_from_slice(&self.inbound[..count]);
        self.inbound = &self.inbound[count..];
        Ok(count)
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.outbound
            .extend_from_slice(bytes)
            .map_err(|_| TransportError::Send)?;
        self.sends += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.state = SocketState::Closed;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        self.state = SocketState::Closed;
        Ok(())
    }
}

struct FixedSensor(u16);

impl AnalogSensor for FixedSensor {
    fn sample(&mut self) -> SensorReading {
        SensorReading {
            channel: config::SENSOR_CHANNEL,
            raw: self.0,
        }
    }
}

#[esp_hal::main]
fn main() -> ! {
    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let _peripherals = esp_hal::init(config);

    println!("=== Session self test ===");

    println!("\n1. Transition table");
    let machine = SessionStateMachine::new(config::HTTP_PORT, config::RX_BUFFER_SIZE);

    let closed = machine.transition(SocketState::Closed, PollEvent::default());
    assert_eq!(closed.next, SocketState::Init);
    assert_eq!(closed.actions.as_slice(), &[Action::Open(config::HTTP_PORT)]);
    println!("✅ Closed -> {:?}", closed.next);

    let init = machine.transition(SocketState::Init, PollEvent::default());
    assert_eq!(init.next, SocketState::Listening);
    println!("✅ Init -> {:?}", init.next);

    let idle = machine.transition(SocketState::Established, PollEvent::default());
    assert_eq!(idle.next, SocketState::Established);
    assert!(idle.actions.is_empty());
    println!("✅ Established without data stays put");

    let request = PollEvent {
        connected: true,
        pending: 3000,
    };
    let serving = machine.transition(SocketState::Established, request);
    assert_eq!(serving.next, SocketState::Closed);
    assert!(serving.actions.contains(&Action::Serve {
        len: config::RX_BUFFER_SIZE
    }));
    println!("✅ Oversized request capped at {} bytes", config::RX_BUFFER_SIZE);

    let half_closed = machine.transition(SocketState::CloseWait, PollEvent::default());
    assert_eq!(half_closed.next, SocketState::Closed);
    println!("✅ CloseWait -> {:?}", half_closed.next);

    println!("\n2. Value tokens");
    assert_eq!(ValueToken::new(0).as_str(), "0");
    assert_eq!(ValueToken::new(512).as_str(), "512");
    assert_eq!(ValueToken::new(4095).as_str(), "409");
    println!("✅ 0 / 512 / 4095 -> 0 / 512 / 409");

    println!("\n3. Request walkthrough");
    let mut socket = MemorySocket::new();
    let mut sensor = FixedSensor(512);
    let mut session = Session::new(config::HTTP_PORT);

    assert_eq!(session.drive(&mut socket, &mut sensor), Ok(SocketState::Init));
    assert_eq!(session.drive(&mut socket, &mut sensor), Ok(SocketState::Listening));
    assert_eq!(socket.status(), SocketState::Listening);
    println!("✅ Socket listening on port {}", config::HTTP_PORT);

    socket.accept(b"GET / HTTP/1.1\r\nHost: board\r\n\r\n");
    assert_eq!(session.drive(&mut socket, &mut sensor), Ok(SocketState::Closed));
    assert_eq!(socket.sends, FRAGMENT_COUNT);
    assert!(!socket.connect_flag);
    assert!(socket.page().starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(socket.page().contains("content: '512';"));
    assert!(socket.page().contains("#4caf50 0% 256%, #f44336 256% 100%"));
    println!("✅ Page served in {} sends, {} bytes", socket.sends, socket.outbound.len());

    let composed = response::fragments(&sensor.sample())
        .iter()
        .map(|fragment| fragment.as_bytes().len())
        .sum::<usize>();
    assert_eq!(composed, socket.outbound.len());
    println!("✅ Fragment lengths match the streamed page");

    println!("\n=== All checks passed ===");

    let delay = Delay::new();
    loop {
        delay.delay_millis(1000);
    }
}
