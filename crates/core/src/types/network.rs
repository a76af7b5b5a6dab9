use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a guest network interface is plugged in on the host side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NetworkSource {
    /// Hypervisor-provided NAT.
    Nat,
    /// Existing host bridge device.
    Bridge { name: String },
    /// Named hypervisor-managed virtual network.
    Network { name: String },
}

impl fmt::Display for NetworkSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nat => write!(f, "nat"),
            Self::Bridge { name } => write!(f, "bridge:{name}"),
            Self::Network { name } => write!(f, "network:{name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub source: NetworkSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
}

impl NetworkInterface {
    pub fn new(source: NetworkSource) -> Self {
        Self { source, mac: None }
    }

    pub fn with_mac(mut self, mac: impl Into<String>) -> Self {
        self.mac = Some(mac.into());
        self
    }
}

/// Network attachment for a sandbox. No interfaces means no network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSpec {
    #[serde(default)]
    pub interfaces: Vec<NetworkInterface>,
}

impl NetworkSpec {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn nat() -> Self {
        Self {
            interfaces: vec![NetworkInterface::new(NetworkSource::Nat)],
        }
    }

    pub fn is_none(&self) -> bool {
        self.interfaces.is_empty()
    }
}
