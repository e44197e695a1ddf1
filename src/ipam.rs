//! Synthetic IP address management.
//!
//! Workloads never route through these addresses; they exist so inspect
//! output looks like a real engine. The default bridge hands out
//! 172.17.0.N; user networks get auto-allocated /16 subnets from
//! 172.18.0.0 upward. MACs are derived from the IP so they stay stable.

use std::collections::{BTreeSet, HashMap};

use crate::error::{Error, Result};

/// Default bridge subnet.
pub const DEFAULT_SUBNET: &str = "172.17.0.0/16";

/// Default bridge gateway.
pub const DEFAULT_GATEWAY: &str = "172.17.0.1";

/// Allocates synthetic IPv4 addresses per subnet.
#[derive(Debug, Default)]
pub struct IpAllocator {
    /// subnet CIDR -> allocation state
    subnets: HashMap<String, SubnetState>,
    /// next second octet for auto-allocated /16 subnets
    next_auto: u8,
}

#[derive(Debug)]
struct SubnetState {
    /// first two octets of the /16
    base: [u8; 2],
    next_host: u16,
    released: BTreeSet<u16>,
}

impl IpAllocator {
    pub fn new() -> Self {
        let mut alloc = IpAllocator {
            subnets: HashMap::new(),
            next_auto: 18,
        };
        // The default bridge always exists.
        alloc.subnets.insert(
            DEFAULT_SUBNET.to_string(),
            SubnetState {
                base: [172, 17],
                next_host: 2,
                released: BTreeSet::new(),
            },
        );
        alloc
    }

    /// Reserves the next auto-allocated /16 subnet for a user network.
    ///
    /// Returns `(subnet_cidr, gateway)`.
    pub fn allocate_subnet(&mut self) -> Result<(String, String)> {
        while self.next_auto < 255 {
            let n = self.next_auto;
            self.next_auto += 1;
            let cidr = format!("172.{n}.0.0/16");
            if self.subnets.contains_key(&cidr) {
                continue;
            }
            self.subnets.insert(
                cidr.clone(),
                SubnetState {
                    base: [172, n],
                    next_host: 2,
                    released: BTreeSet::new(),
                },
            );
            return Ok((cidr, format!("172.{n}.0.1")));
        }
        Err(Error::Internal("subnet space exhausted".into()))
    }

    /// Allocates the next host address in a subnet, reusing released
    /// addresses first.
    pub fn allocate_ip(&mut self, subnet: &str) -> Result<String> {
        let state = self
            .subnets
            .get_mut(subnet)
            .ok_or_else(|| Error::Internal(format!("unknown subnet {subnet}")))?;

        let host = if let Some(&h) = state.released.iter().next() {
            state.released.remove(&h);
            h
        } else {
            let h = state.next_host;
            if h == u16::MAX {
                return Err(Error::Internal(format!("subnet {subnet} exhausted")));
            }
            state.next_host += 1;
            h
        };
        Ok(format!(
            "{}.{}.{}.{}",
            state.base[0],
            state.base[1],
            host >> 8,
            host & 0xff
        ))
    }

    /// Returns an address to its subnet's free pool.
    pub fn release_ip(&mut self, subnet: &str, ip: &str) {
        let Some(state) = self.subnets.get_mut(subnet) else {
            return;
        };
        let octets: Vec<u16> = ip.split('.').filter_map(|o| o.parse().ok()).collect();
        if octets.len() == 4 {
            state.released.insert((octets[2] << 8) | octets[3]);
        }
    }

    /// Frees an auto-allocated subnet when its network is removed.
    pub fn release_subnet(&mut self, subnet: &str) {
        if subnet != DEFAULT_SUBNET {
            self.subnets.remove(subnet);
        }
    }
}

/// Derives a stable MAC address from an IPv4 address.
///
/// Uses the locally-administered 02:42 prefix and the last three octets
/// of the IP, matching the format clients expect from a bridge network.
pub fn mac_from_ip(ip: &str) -> String {
    let octets: Vec<u8> = ip.split('.').filter_map(|o| o.parse().ok()).collect();
    if octets.len() != 4 {
        return "02:42:ac:11:00:02".to_string();
    }
    format!(
        "02:42:{:02x}:{:02x}:{:02x}:{:02x}",
        octets[0], octets[1], octets[2], octets[3]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_bridge_allocates_from_dot_two() {
        let mut alloc = IpAllocator::new();
        assert_eq!(alloc.allocate_ip(DEFAULT_SUBNET).unwrap(), "172.17.0.2");
        assert_eq!(alloc.allocate_ip(DEFAULT_SUBNET).unwrap(), "172.17.0.3");
    }

    #[test]
    fn released_ips_are_reused_first() {
        let mut alloc = IpAllocator::new();
        let a = alloc.allocate_ip(DEFAULT_SUBNET).unwrap();
        let _b = alloc.allocate_ip(DEFAULT_SUBNET).unwrap();
        alloc.release_ip(DEFAULT_SUBNET, &a);
        assert_eq!(
            alloc.allocate_ip(DEFAULT_SUBNET).unwrap(),
            a,
            "released address should be handed out again"
        );
    }

    #[test]
    fn auto_subnets_start_at_172_18() {
        let mut alloc = IpAllocator::new();
        let (cidr, gw) = alloc.allocate_subnet().unwrap();
        assert_eq!(cidr, "172.18.0.0/16");
        assert_eq!(gw, "172.18.0.1");
        let (cidr2, _) = alloc.allocate_subnet().unwrap();
        assert_eq!(cidr2, "172.19.0.0/16");
    }

    #[test]
    fn host_addresses_roll_past_one_octet() {
        let mut alloc = IpAllocator::new();
        let (cidr, _) = alloc.allocate_subnet().unwrap();
        for _ in 0..254 {
            alloc.allocate_ip(&cidr).unwrap();
        }
        // host 256 -> x.y.1.0
        assert_eq!(alloc.allocate_ip(&cidr).unwrap(), "172.18.1.0");
    }

    #[test]
    fn mac_derivation() {
        assert_eq!(mac_from_ip("172.17.0.2"), "02:42:ac:11:00:02");
        assert_eq!(mac_from_ip("garbage"), "02:42:ac:11:00:02");
    }
}
