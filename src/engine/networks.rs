//! Network bookkeeping.
//!
//! Networks are synthetic: endpoints get addresses from [`IpAllocator`]
//! so inspect output is coherent, but no routing ever happens. The
//! default bridge is seeded at engine construction and cannot be removed.

use chrono::Utc;
use tracing::info;

use crate::error::{Error, Result};
use crate::ids;
use crate::ipam::mac_from_ip;
use crate::types::{EndpointSettings, Network};

use super::{Engine, DEFAULT_NETWORK};

impl Engine {
    /// Creates a user network with an auto-allocated /16 subnet.
    pub fn create_network(&self, name: &str, driver: Option<&str>) -> Result<String> {
        if self
            .state
            .list_networks()?
            .iter()
            .any(|n| n.name == name)
        {
            return Err(Error::Conflict(format!(
                "network with name {name} already exists"
            )));
        }

        let (subnet, gateway) = self
            .state
            .ipam
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .allocate_subnet()?;
        let id = ids::generate_id();
        self.state.insert_network(Network {
            id: id.clone(),
            name: name.to_string(),
            driver: driver.unwrap_or("bridge").to_string(),
            subnet: subnet.clone(),
            gateway,
            created: Utc::now(),
            containers: Vec::new(),
        })?;
        info!(network = %name, subnet = %subnet, "network created");
        Ok(id)
    }

    pub fn inspect_network(&self, reference: &str) -> Result<Network> {
        self.state.get_network(reference)
    }

    pub fn list_networks(&self) -> Result<Vec<Network>> {
        self.state.list_networks()
    }

    /// Removes a network. The default bridge refuses; attached
    /// containers must disconnect first.
    pub fn remove_network(&self, reference: &str) -> Result<()> {
        let network = self.state.get_network(reference)?;
        if network.name == DEFAULT_NETWORK {
            return Err(Error::InvalidParameter(format!(
                "{DEFAULT_NETWORK} is a pre-defined network and cannot be removed"
            )));
        }
        if !network.containers.is_empty() {
            return Err(Error::Conflict(format!(
                "network {} has active endpoints",
                network.name
            )));
        }
        self.state.remove_network(&network.id)?;
        self.state
            .ipam
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .release_subnet(&network.subnet);
        Ok(())
    }

    /// Attaches a container to a network, allocating it an address in
    /// the network's subnet.
    pub fn connect_network(&self, network_ref: &str, container_ref: &str) -> Result<()> {
        let network = self.state.get_network(network_ref)?;
        let id = self.state.resolve(container_ref)?;
        let container = self.state.get_container(&id)?;
        if container
            .network_settings
            .networks
            .contains_key(&network.name)
        {
            return Err(Error::Conflict(format!(
                "container is already attached to network {}",
                network.name
            )));
        }

        let ip = self
            .state
            .ipam
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .allocate_ip(&network.subnet)?;
        let endpoint = EndpointSettings {
            network_id: network.id.clone(),
            ip_address: ip.clone(),
            gateway: network.gateway.clone(),
            mac_address: mac_from_ip(&ip),
            ip_prefix_len: 16,
        };
        self.state.update_container(&id, |c| {
            c.network_settings
                .networks
                .insert(network.name.clone(), endpoint);
        })?;
        self.state
            .update_network(&network.id, |n| n.containers.push(id.clone()))?;
        Ok(())
    }

    /// Detaches a container from a network and releases its address.
    pub fn disconnect_network(&self, network_ref: &str, container_ref: &str) -> Result<()> {
        let network = self.state.get_network(network_ref)?;
        let id = self.state.resolve(container_ref)?;
        let container = self.state.get_container(&id)?;
        let Some(endpoint) = container.network_settings.networks.get(&network.name) else {
            return Err(Error::InvalidParameter(format!(
                "container is not connected to network {}",
                network.name
            )));
        };

        self.state
            .ipam
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .release_ip(&network.subnet, &endpoint.ip_address);
        let name = network.name.clone();
        self.state.update_container(&id, |c| {
            c.network_settings.networks.remove(&name);
        })?;
        self.state
            .update_network(&network.id, |n| n.containers.retain(|c| c != &id))?;
        Ok(())
    }
}
