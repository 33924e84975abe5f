//! smoltcp-backed network stack
//!
//! Plays the part of a TCP offload chip: one TCP socket exposed through the
//! `Transport` status/command interface, plus the DHCPv4 client exposed as a
//! `LeaseProtocol`. Everything runs from the caller's polling loop; call
//! `poll` once per iteration before looking at the socket.

use crate::clock::{self, Clock};
use crate::config;
use crate::lease::{Lease, LeaseEvent, LeaseMode, LeaseProtocol, LeaseStep, NetConfigurator, NetworkIdentity};
use crate::transport::{PeerEndpoint, SocketState, Transport, TransportError};
use core::net::Ipv4Addr;
use heapless::Deque;
use log::{debug, info, warn};
use smoltcp::iface::{Config as IfaceConfig, Interface, SocketHandle, SocketSet, SocketStorage};
use smoltcp::phy::Device;
use smoltcp::socket::dhcpv4::{Event as DhcpEvent, Socket as DhcpSocket};
use smoltcp::socket::tcp::{
    RecvError, Socket as TcpSocket, SocketBuffer as TcpSocketBuffer, State as TcpState,
};
use smoltcp::wire::{EthernetAddress, HardwareAddress, IpAddress, IpCidr, Ipv4Cidr};

/// Socket slots needed: the server socket and the DHCP client
pub const SOCKET_COUNT: usize = 2;

const EVENT_QUEUE_DEPTH: usize = 4;

/// Network stack driving one TCP server socket and the DHCP client
pub struct NetStack<'a, D: Device, C: Clock> {
    device: D,
    clock: C,
    interface: Interface,
    sockets: SocketSet<'a>,
    socket_id: u8,
    tcp_handle: SocketHandle,
    dhcp_handle: Option<SocketHandle>,
    opened_port: Option<u16>,
    connect_flag: bool,
    last_tcp_state: TcpState,
    leased: Option<Lease>,
    attempt_started_ms: Option<u64>,
    events: Deque<LeaseEvent, EVENT_QUEUE_DEPTH>,
}

impl<'a, D: Device, C: Clock> NetStack<'a, D, C> {
    /// Build the interface for `identity` on top of `device`.
    ///
    /// `storage` needs at least `SOCKET_COUNT` slots; `rx` and `tx` back the
    /// TCP socket.
    pub fn new(
        mut device: D,
        clock: C,
        identity: &NetworkIdentity,
        socket_id: u8,
        storage: &'a mut [SocketStorage<'a>],
        rx: &'a mut [u8],
        tx: &'a mut [u8],
        random_seed: u64,
    ) -> Self {
        let hardware_addr = HardwareAddress::Ethernet(EthernetAddress(identity.mac_address()));
        let mut iface_config = IfaceConfig::new(hardware_addr);
        iface_config.random_seed = random_seed;
        let interface = Interface::new(iface_config, &mut device, clock.instant());

        let mut sockets = SocketSet::new(storage);
        let tcp_socket = TcpSocket::new(TcpSocketBuffer::new(rx), TcpSocketBuffer::new(tx));
        let tcp_handle = sockets.add(tcp_socket);
        let dhcp_handle = match identity.lease_mode {
            LeaseMode::Dhcp => Some(sockets.add(DhcpSocket::new())),
            LeaseMode::Static => None,
        };

        Self {
            device,
            clock,
            interface,
            sockets,
            socket_id,
            tcp_handle,
            dhcp_handle,
            opened_port: None,
            connect_flag: false,
            last_tcp_state: TcpState::Closed,
            leased: None,
            attempt_started_ms: None,
            events: Deque::new(),
        }
    }

    /// Process pending frames and timers, then collect socket and lease changes.
    pub fn poll(&mut self) {
        let now = self.clock.instant();
        let _ = self.interface.poll(now, &mut self.device, &mut self.sockets);
        self.poll_dhcp();
        self.track_connection();
    }

    /// First IPv4 address configured on the interface
    pub fn ipv4_address(&self) -> Option<Ipv4Addr> {
        self.interface.ipv4_addr()
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    fn tcp(&self) -> &TcpSocket<'a> {
        self.sockets.get::<TcpSocket>(self.tcp_handle)
    }

    fn tcp_mut(&mut self) -> &mut TcpSocket<'a> {
        self.sockets.get_mut::<TcpSocket>(self.tcp_handle)
    }

    fn poll_dhcp(&mut self) {
        let Some(handle) = self.dhcp_handle else {
            return;
        };

        let lease = match self.sockets.get_mut::<DhcpSocket>(handle).poll() {
            None => return,
            Some(DhcpEvent::Configured(config)) => Some(Lease {
                ip_address: config.address.address(),
                gateway: config.router.unwrap_or(Ipv4Addr::UNSPECIFIED),
                subnet_mask: config.address.netmask(),
                dns_server: config
                    .dns_servers
                    .first()
                    .copied()
                    .unwrap_or(Ipv4Addr::UNSPECIFIED),
            }),
            Some(DhcpEvent::Deconfigured) => None,
        };

        match lease {
            Some(lease) => self.on_configured(lease),
            None => self.on_deconfigured(),
        }
    }

    fn on_configured(&mut self, lease: Lease) {
        let event = lease_event(self.leased, lease);
        self.leased = Some(lease);
        self.push_event(event);
    }

    fn on_deconfigured(&mut self) {
        if self.leased.take().is_some() {
            warn!("[DHCP] Lease lost, dropping interface address");
            self.push_event(LeaseEvent::Lost);
        }
        self.interface.update_ip_addrs(|addrs| addrs.clear());
        self.interface.routes_mut().remove_default_ipv4_route();
    }

    fn push_event(&mut self, event: LeaseEvent) {
        if self.events.is_full() {
            self.events.pop_front();
        }
        let _ = self.events.push_back(event);
    }

    fn track_connection(&mut self) {
        let state = self.tcp().state();
        if state == TcpState::Established && self.last_tcp_state != TcpState::Established {
            self.connect_flag = true;
        }
        if state == TcpState::Closed {
            self.connect_flag = false;
        }
        self.last_tcp_state = state;
    }
}

/// Event raised when the DHCP client reports `lease` while `held` is current.
fn lease_event(held: Option<Lease>, lease: Lease) -> LeaseEvent {
    match held {
        Some(held) if held == lease => LeaseEvent::Renewed,
        _ => LeaseEvent::Assigned(lease),
    }
}

impl<D: Device, C: Clock> LeaseProtocol for NetStack<'_, D, C> {
    fn step(&mut self) -> LeaseStep {
        let Some(handle) = self.dhcp_handle else {
            return LeaseStep::Leased;
        };

        let started = *self.attempt_started_ms.get_or_insert(self.clock.now_ms());
        self.poll();
        if self.leased.is_some() {
            self.attempt_started_ms = None;
            return LeaseStep::Leased;
        }

        if clock::elapsed(&self.clock, started, config::DHCP_ATTEMPT_TIMEOUT_MS) {
            debug!("[DHCP] No lease after {} ms, restarting discovery", config::DHCP_ATTEMPT_TIMEOUT_MS);
            self.sockets.get_mut::<DhcpSocket>(handle).reset();
            self.attempt_started_ms = None;
            return LeaseStep::Failed;
        }

        self.clock.sleep_ms(config::DHCP_POLL_INTERVAL_MS);
        LeaseStep::Running
    }

    fn next_event(&mut self) -> Option<LeaseEvent> {
        self.events.pop_front()
    }
}

impl<D: Device, C: Clock> NetConfigurator for NetStack<'_, D, C> {
    fn apply(&mut self, identity: &NetworkIdentity) {
        let mac = EthernetAddress(identity.mac_address());
        self.interface.set_hardware_addr(HardwareAddress::Ethernet(mac));

        let address = identity.ip_address;
        let prefix = identity.prefix_len();
        self.interface.update_ip_addrs(|addrs| {
            addrs.clear();
            if !address.is_unspecified() {
                let _ = addrs.push(IpCidr::Ipv4(Ipv4Cidr::new(address, prefix)));
            }
        });

        if identity.gateway.is_unspecified() {
            self.interface.routes_mut().remove_default_ipv4_route();
        } else if self
            .interface
            .routes_mut()
            .add_default_ipv4_route(identity.gateway)
            .is_err()
        {
            warn!("[NET] Route table full, no default gateway");
        }

        debug!("[NET] Interface configured: {}/{}", address, prefix);
    }
}

impl<D: Device, C: Clock> Transport for NetStack<'_, D, C> {
    fn socket_id(&self) -> u8 {
        self.socket_id
    }

    fn status(&self) -> SocketState {
        match self.tcp().state() {
            // TIME-WAIT is not kept; `open` discards it
            TcpState::Closed | TcpState::TimeWait if self.opened_port.is_some() => SocketState::Init,
            TcpState::Closed | TcpState::TimeWait => SocketState::Closed,
            TcpState::Listen => SocketState::Listening,
            TcpState::Established => SocketState::Established,
            TcpState::CloseWait => SocketState::CloseWait,
            _ => SocketState::Transitional,
        }
    }

    fn open(&mut self, port: u16) -> Result<(), TransportError> {
        if self.status() != SocketState::Closed {
            return Err(TransportError::NotClosed);
        }
        if self.tcp().state() == TcpState::TimeWait {
            self.tcp_mut().abort();
        }
        self.opened_port = Some(port);
        Ok(())
    }

    fn listen(&mut self) -> Result<(), TransportError> {
        let port = self.opened_port.ok_or(TransportError::NotOpened)?;
        self.tcp_mut().listen(port).map_err(|e| {
            warn!("[NET] Listen on port {} rejected: {:?}", port, e);
            TransportError::Listen
        })?;
        self.opened_port = None;
        Ok(())
    }

    fn connect_flag(&self) -> bool {
        self.connect_flag
    }

    fn clear_connect_flag(&mut self) {
        self.connect_flag = false;
    }

    fn peer(&self) -> Option<PeerEndpoint> {
        let endpoint = self.tcp().remote_endpoint()?;
        match endpoint.addr {
            IpAddress::Ipv4(address) => Some(PeerEndpoint {
                address,
                port: endpoint.port,
            }),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    fn receive_available(&self) -> usize {
        self.tcp().recv_queue()
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        match self.tcp_mut().recv_slice(buf) {
            Ok(count) => Ok(count),
            Err(RecvError::Finished) => Err(TransportError::ConnectionClosed),
            Err(_) => Err(TransportError::Receive),
        }
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let started = self.clock.now_ms();
        let mut sent = 0;

        while sent < bytes.len() {
            let socket = self.tcp_mut();
            if !socket.may_send() {
                return Err(TransportError::Send);
            }
            sent += socket
                .send_slice(&bytes[sent..])
                .map_err(|_| TransportError::Send)?;

            if sent < bytes.len() {
                // transmit ring is full: let the interface drain it
                if clock::elapsed(&self.clock, started, config::SEND_TIMEOUT_MS) {
                    return Err(TransportError::SendTimeout);
                }
                self.poll();
                self.clock.sleep_ms(1);
            }
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.tcp_mut().abort();
        self.opened_port = None;
        self.connect_flag = false;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        self.tcp_mut().close();
        info!("[NET] {}:Disconnecting", self.socket_id);
        Ok(())
    }
}
