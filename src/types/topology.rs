use crate::db::models::ReplicationInfo;
use std::fmt;

/// Known cluster members, in configuration order.
///
/// Each address gets a short label (its last dotted segment) so log lines read
/// `231(172.16.0.231)` instead of a bare address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterNodes {
    nodes: Vec<(String, String)>,
}

impl ClusterNodes {
    /// Parse a comma separated address list. Blank entries and duplicates are dropped.
    pub fn parse(list: &str) -> Self {
        let mut nodes: Vec<(String, String)> = Vec::new();
        for addr in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            if nodes.iter().any(|(a, _)| a == addr) {
                continue;
            }
            let label = addr.rsplit('.').next().unwrap_or(addr).to_string();
            nodes.push((addr.to_string(), label));
        }
        Self { nodes }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, addr: &str) -> bool {
        self.label(addr).is_some()
    }

    fn label(&self, addr: &str) -> Option<&str> {
        self.nodes
            .iter()
            .find(|(a, _)| a == addr)
            .map(|(_, label)| label.as_str())
    }

    /// `label(addr)` for members, the bare address otherwise.
    pub fn describe(&self, addr: &str) -> String {
        match self.label(addr) {
            Some(label) => format!("{label}({addr})"),
            None => addr.to_string(),
        }
    }

    /// Given the address of an attached standby, the primary is the first
    /// other cluster member. Returns `None` when the standby is not a member.
    pub fn peer_of(&self, standby: &str) -> Option<String> {
        if !self.contains(standby) {
            return None;
        }
        self.nodes
            .iter()
            .find(|(a, _)| a != standby)
            .map(|(addr, _)| self.describe(addr))
    }
}

/// Role of the node a session is connected to, as observed by the probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeRole {
    Primary { node: Option<String> },
    Standby,
    /// Replication status could not be read; carries a short error tag.
    Unknown(String),
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Primary { node: Some(node) } => write!(f, "primary {node}"),
            NodeRole::Primary { node: None } => f.write_str("primary"),
            NodeRole::Standby => f.write_str("standby"),
            NodeRole::Unknown(tag) => write!(f, "unknown({tag})"),
        }
    }
}

/// Role plus the standby it streams to, ready for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeView {
    pub role: NodeRole,
    pub standby: String,
    pub sync_state: String,
}

impl NodeView {
    pub fn unknown(tag: impl Into<String>) -> Self {
        Self {
            role: NodeRole::Unknown(tag.into()),
            standby: "-".to_string(),
            sync_state: "-".to_string(),
        }
    }

    pub fn from_replication(info: &ReplicationInfo, cluster: &ClusterNodes) -> Self {
        let standby_addr = info
            .standby_addr
            .as_deref()
            .filter(|_| info.standby_count > 0);

        let role = if info.in_recovery {
            NodeRole::Standby
        } else {
            let node = standby_addr.map(|addr| {
                cluster
                    .peer_of(addr)
                    .unwrap_or_else(|| format!("unknown({addr})"))
            });
            NodeRole::Primary { node }
        };

        let (standby, sync_state) = if info.standby_count > 0 {
            (
                standby_addr
                    .map(|addr| cluster.describe(addr))
                    .unwrap_or_else(|| "unknown".to_string()),
                info.sync_state
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string()),
            )
        } else {
            ("none".to_string(), "none".to_string())
        };

        Self {
            role,
            standby,
            sync_state,
        }
    }
}
