//! Lease manager
//!
//! Owns the board's network identity. At boot it runs the DHCP protocol in a
//! blocking retry loop; afterwards it only reacts to lease events drained from
//! the protocol each main-loop iteration.

use core::fmt;
use core::net::Ipv4Addr;
use log::{debug, info, warn};

/// How the IPv4 configuration is obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseMode {
    Static,
    Dhcp,
}

/// Addresses handed out by a DHCP server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub ip_address: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub subnet_mask: Ipv4Addr,
    pub dns_server: Ipv4Addr,
}

/// Network identity of the board.
///
/// The MAC address is set once at construction. The IPv4 fields are only
/// meaningful after a lease or a static assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkIdentity {
    mac_address: [u8; 6],
    pub ip_address: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub subnet_mask: Ipv4Addr,
    pub dns_server: Ipv4Addr,
    pub lease_mode: LeaseMode,
}

impl NetworkIdentity {
    /// Identity that still has to be filled in by DHCP
    pub const fn dhcp(mac_address: [u8; 6]) -> Self {
        Self {
            mac_address,
            ip_address: Ipv4Addr::UNSPECIFIED,
            gateway: Ipv4Addr::UNSPECIFIED,
            subnet_mask: Ipv4Addr::UNSPECIFIED,
            dns_server: Ipv4Addr::UNSPECIFIED,
            lease_mode: LeaseMode::Dhcp,
        }
    }

    /// Fully configured identity that never talks to a DHCP server
    pub const fn fixed(
        mac_address: [u8; 6],
        ip_address: Ipv4Addr,
        gateway: Ipv4Addr,
        subnet_mask: Ipv4Addr,
        dns_server: Ipv4Addr,
    ) -> Self {
        Self {
            mac_address,
            ip_address,
            gateway,
            subnet_mask,
            dns_server,
            lease_mode: LeaseMode::Static,
        }
    }

    /// Identity described by the `config` module
    pub const fn from_config() -> Self {
        use crate::config;
        match config::LEASE_MODE {
            LeaseMode::Dhcp => Self::dhcp(config::MAC_ADDRESS),
            LeaseMode::Static => Self::fixed(
                config::MAC_ADDRESS,
                config::STATIC_IP,
                config::STATIC_GATEWAY,
                config::STATIC_SUBNET,
                config::STATIC_DNS,
            ),
        }
    }

    /// Same identity on a different interface address
    pub const fn with_mac(mut self, mac_address: [u8; 6]) -> Self {
        self.mac_address = mac_address;
        self
    }

    pub fn mac_address(&self) -> [u8; 6] {
        self.mac_address
    }

    /// True once an address has been assigned
    pub fn has_address(&self) -> bool {
        !self.ip_address.is_unspecified()
    }

    /// Subnet mask expressed as a CIDR prefix length
    pub fn prefix_len(&self) -> u8 {
        u32::from(self.subnet_mask).leading_ones() as u8
    }

    fn clear_lease(&mut self) {
        self.ip_address = Ipv4Addr::UNSPECIFIED;
        self.gateway = Ipv4Addr::UNSPECIFIED;
        self.subnet_mask = Ipv4Addr::UNSPECIFIED;
        self.dns_server = Ipv4Addr::UNSPECIFIED;
    }

    fn apply_lease(&mut self, lease: &Lease) {
        self.ip_address = lease.ip_address;
        self.gateway = lease.gateway;
        self.subnet_mask = lease.subnet_mask;
        self.dns_server = lease.dns_server;
    }
}

/// Lease notifications raised by the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseEvent {
    /// A new or changed lease was granted
    Assigned(Lease),
    /// The existing lease was extended unchanged
    Renewed,
    /// Another host answered for our address
    Conflict,
    /// The server withdrew the lease or it expired
    Lost,
}

/// Result of one protocol step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseStep {
    /// Still negotiating
    Running,
    /// A lease is held
    Leased,
    /// The current attempt gave up; the protocol starts over on the next step
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseError {
    /// More consecutive failures than the retry budget allows
    Exhausted { attempts: u8 },
}

impl fmt::Display for LeaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeaseError::Exhausted { attempts } => {
                write!(f, "DHCP gave up after {} failed attempts", attempts)
            }
        }
    }
}

/// The DHCP client underneath the lease manager
pub trait LeaseProtocol {
    /// Advance the protocol once.
    fn step(&mut self) -> LeaseStep;

    /// Pop the oldest undelivered lease event.
    fn next_event(&mut self) -> Option<LeaseEvent>;
}

/// Hardware side that takes the committed identity
pub trait NetConfigurator {
    fn apply(&mut self, identity: &NetworkIdentity);
}

/// Drives lease acquisition and keeps the identity current
pub struct LeaseManager {
    identity: NetworkIdentity,
}

impl LeaseManager {
    pub fn new(identity: NetworkIdentity) -> Self {
        Self { identity }
    }

    pub fn identity(&self) -> &NetworkIdentity {
        &self.identity
    }

    /// Commit MAC, lease mode and whatever addresses are held to the hardware.
    pub fn initialize<N: NetConfigurator>(&self, net: &mut N) {
        net.apply(&self.identity);
        self.print_identity();
    }

    /// Obtain a lease, blocking until one is held or the retry budget is spent.
    ///
    /// Static identities return immediately. While the protocol only reports
    /// `Running` this never returns.
    pub fn acquire_lease<N>(&mut self, net: &mut N, max_retries: u8) -> Result<NetworkIdentity, LeaseError>
    where
        N: LeaseProtocol + NetConfigurator,
    {
        if self.identity.lease_mode == LeaseMode::Static {
            info!("[DHCP] Static addressing, skipping DHCP");
            return Ok(self.identity);
        }

        info!("[DHCP] Start DHCP");
        let mut failures: u8 = 0;

        loop {
            let step = net.step();
            self.service(net);

            match step {
                LeaseStep::Leased => {
                    info!("[DHCP] DHCP Success");
                    return Ok(self.identity);
                }
                LeaseStep::Failed => {
                    failures = failures.saturating_add(1);
                    debug!("[DHCP] Attempt failed ({} so far)", failures);
                }
                LeaseStep::Running => {}
            }

            if failures > max_retries {
                warn!("[DHCP] DHCP Fail");
                return Err(LeaseError::Exhausted { attempts: failures });
            }
        }
    }

    /// Deliver every pending lease event. Returns how many were handled.
    pub fn service<N>(&mut self, net: &mut N) -> usize
    where
        N: LeaseProtocol + NetConfigurator,
    {
        let mut handled = 0;
        while let Some(event) = net.next_event() {
            self.handle_event(event, net);
            handled += 1;
        }
        handled
    }

    /// React to a single lease event.
    pub fn handle_event<N: NetConfigurator>(&mut self, event: LeaseEvent, net: &mut N) {
        match event {
            LeaseEvent::Assigned(lease) => {
                self.identity.apply_lease(&lease);
                net.apply(&self.identity);
                info!("[DHCP] Lease assigned: {}", self.identity.ip_address);
            }
            LeaseEvent::Renewed => {
                debug!("[DHCP] Lease renewed: {}", self.identity.ip_address);
            }
            LeaseEvent::Conflict => {
                warn!("[DHCP] Address conflict on {}", self.identity.ip_address);
            }
            LeaseEvent::Lost => {
                warn!("[DHCP] Lease on {} lost", self.identity.ip_address);
                self.identity.clear_lease();
                net.apply(&self.identity);
            }
        }
    }

    /// Log the identity the way the boot console shows it
    pub fn print_identity(&self) {
        let id = &self.identity;
        let mac = id.mac_address;
        info!(
            "[NET] MAC: {:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
        );
        info!("[NET] IP: {}", id.ip_address);
        info!("[NET] GW: {}", id.gateway);
        info!("[NET] SN: {}", id.subnet_mask);
        info!("[NET] DNS: {}", id.dns_server);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedLease;

    const MAC: [u8; 6] = [0x00, 0x08, 0xDC, 0x01, 0x02, 0x03];

    fn office_lease() -> Lease {
        Lease {
            ip_address: Ipv4Addr::new(192, 168, 1, 77),
            gateway: Ipv4Addr::new(192, 168, 1, 1),
            subnet_mask: Ipv4Addr::new(255, 255, 255, 0),
            dns_server: Ipv4Addr::new(192, 168, 1, 1),
        }
    }

    #[test]
    fn initialize_commits_identity() {
        let manager = LeaseManager::new(NetworkIdentity::dhcp(MAC));
        let mut net = ScriptedLease::new(vec![]);

        manager.initialize(&mut net);

        assert_eq!(net.applied.len(), 1);
        assert_eq!(net.applied[0].mac_address(), MAC);
        assert_eq!(net.applied[0].lease_mode, LeaseMode::Dhcp);
        assert!(!net.applied[0].has_address());
    }

    #[test]
    fn radio_mac_replaces_configured_mac() {
        let radio = [0x60, 0x55, 0xF9, 0x10, 0x20, 0x30];
        let identity = NetworkIdentity::from_config().with_mac(radio);

        assert_eq!(identity.mac_address(), radio);
        assert_eq!(identity.lease_mode, crate::config::LEASE_MODE);
    }

    #[test]
    fn static_identity_skips_the_protocol() {
        let identity = NetworkIdentity::fixed(
            MAC,
            Ipv4Addr::new(10, 0, 0, 2),
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(255, 0, 0, 0),
            Ipv4Addr::new(10, 0, 0, 1),
        );
        let mut manager = LeaseManager::new(identity);
        let mut net = ScriptedLease::new(vec![(LeaseStep::Failed, None)]);

        assert_eq!(manager.acquire_lease(&mut net, 3), Ok(identity));
        assert_eq!(net.runs, 0);
    }

    #[test]
    fn lease_populates_identity() {
        let mut manager = LeaseManager::new(NetworkIdentity::dhcp(MAC));
        let mut net = ScriptedLease::new(vec![
            (LeaseStep::Running, None),
            (LeaseStep::Running, None),
            (LeaseStep::Leased, Some(LeaseEvent::Assigned(office_lease()))),
        ]);

        let identity = manager.acquire_lease(&mut net, 3).unwrap();

        assert_eq!(net.runs, 3);
        assert_eq!(identity.ip_address, Ipv4Addr::new(192, 168, 1, 77));
        assert_eq!(identity.prefix_len(), 24);
        assert_eq!(identity.mac_address(), MAC);
        assert_eq!(net.applied, vec![identity]);
    }

    #[test]
    fn three_failures_are_tolerated() {
        let mut manager = LeaseManager::new(NetworkIdentity::dhcp(MAC));
        let mut net = ScriptedLease::new(vec![
            (LeaseStep::Failed, None),
            (LeaseStep::Failed, None),
            (LeaseStep::Running, None),
            (LeaseStep::Failed, None),
            (LeaseStep::Leased, Some(LeaseEvent::Assigned(office_lease()))),
        ]);

        assert!(manager.acquire_lease(&mut net, 3).is_ok());
        assert_eq!(net.runs, 5);
    }

    #[test]
    fn fourth_failure_gives_up() {
        let mut manager = LeaseManager::new(NetworkIdentity::dhcp(MAC));
        let mut net = ScriptedLease::new(vec![
            (LeaseStep::Failed, None),
            (LeaseStep::Failed, None),
            (LeaseStep::Failed, None),
            (LeaseStep::Failed, None),
            (LeaseStep::Leased, Some(LeaseEvent::Assigned(office_lease()))),
        ]);

        assert_eq!(
            manager.acquire_lease(&mut net, 3),
            Err(LeaseError::Exhausted { attempts: 4 })
        );
        assert_eq!(net.runs, 4);
        assert!(!manager.identity().has_address());
    }

    #[test]
    fn renew_and_conflict_leave_identity_alone() {
        let mut manager = LeaseManager::new(NetworkIdentity::dhcp(MAC));
        let mut net = ScriptedLease::new(vec![]);
        net.push_event(LeaseEvent::Assigned(office_lease()));
        assert_eq!(manager.service(&mut net), 1);
        let leased = *manager.identity();

        net.push_event(LeaseEvent::Renewed);
        net.push_event(LeaseEvent::Conflict);
        assert_eq!(manager.service(&mut net), 2);

        assert_eq!(*manager.identity(), leased);
        assert_eq!(net.applied.len(), 1);
    }

    #[test]
    fn changed_lease_is_recommitted() {
        let mut manager = LeaseManager::new(NetworkIdentity::dhcp(MAC));
        let mut net = ScriptedLease::new(vec![]);
        net.push_event(LeaseEvent::Assigned(office_lease()));
        manager.service(&mut net);

        let moved = Lease {
            ip_address: Ipv4Addr::new(192, 168, 1, 90),
            ..office_lease()
        };
        net.push_event(LeaseEvent::Assigned(moved));
        manager.service(&mut net);

        assert_eq!(net.applied.len(), 2);
        assert_eq!(net.applied[1].ip_address, Ipv4Addr::new(192, 168, 1, 90));
    }

    #[test]
    fn lost_lease_clears_identity() {
        let mut manager = LeaseManager::new(NetworkIdentity::dhcp(MAC));
        let mut net = ScriptedLease::new(vec![]);
        net.push_event(LeaseEvent::Assigned(office_lease()));
        net.push_event(LeaseEvent::Lost);

        assert_eq!(manager.service(&mut net), 2);

        assert!(!manager.identity().has_address());
        assert_eq!(manager.identity().gateway, Ipv4Addr::UNSPECIFIED);
        assert_eq!(manager.identity().mac_address(), MAC);
        assert_eq!(net.applied.len(), 2);
        assert!(!net.applied[1].has_address());
    }
}
