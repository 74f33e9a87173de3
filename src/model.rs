use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The tunnel endpoint itself. One per deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub id: Uuid,
    pub public_address: String,
    pub port: u16,
    pub enable_ipv6: bool,
    /// Server interface address in CIDR form, e.g. `10.8.0.1/24`.
    pub subnet_v4: String,
    /// Empty when no IPv6 subnet is configured.
    #[serde(default)]
    pub subnet_v6: String,
    pub private_key: String,
    pub public_key: String,
}

impl Server {
    pub fn advertises_ipv6(&self) -> bool {
        self.enable_ipv6 && !self.subnet_v6.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub id: Uuid,
    pub ipv4: Option<String>,
    pub ipv6: Option<String>,
    pub private_key: String,
    pub public_key: String,
    pub name: Option<String>,
}

impl Peer {
    pub fn ipv6(&self) -> Option<&str> {
        self.ipv6.as_deref().filter(|addr| !addr.is_empty())
    }
}

/// Everything needed to create the server row except its keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewServer {
    pub public_address: String,
    pub port: u16,
    pub enable_ipv6: bool,
    pub subnet_v4: String,
    pub subnet_v6: String,
}

/// Partial administrative update of the server row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerChanges {
    pub public_address: Option<String>,
    pub port: Option<u16>,
    pub enable_ipv6: Option<bool>,
    pub subnet_v4: Option<String>,
    pub subnet_v6: Option<String>,
}

impl ServerChanges {
    pub fn is_empty(&self) -> bool {
        self.public_address.is_none()
            && self.port.is_none()
            && self.enable_ipv6.is_none()
            && self.subnet_v4.is_none()
            && self.subnet_v6.is_none()
    }

    /// True when a subnet is set to a value different from the current one.
    pub fn changes_subnet(&self, current: &Server) -> bool {
        let v4 = self
            .subnet_v4
            .as_ref()
            .is_some_and(|subnet| *subnet != current.subnet_v4);
        let v6 = self
            .subnet_v6
            .as_ref()
            .is_some_and(|subnet| *subnet != current.subnet_v6);
        v4 || v6
    }

    pub fn apply(&self, server: &mut Server) {
        if let Some(address) = &self.public_address {
            server.public_address = address.clone();
        }
        if let Some(port) = self.port {
            server.port = port;
        }
        if let Some(enable) = self.enable_ipv6 {
            server.enable_ipv6 = enable;
        }
        if let Some(subnet) = &self.subnet_v4 {
            server.subnet_v4 = subnet.clone();
        }
        if let Some(subnet) = &self.subnet_v6 {
            server.subnet_v6 = subnet.clone();
        }
    }
}
