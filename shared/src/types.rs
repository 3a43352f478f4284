use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::Ipv4Addr;
use serde::{Serialize, Deserialize};

/// One service instance discovered through the registry catalog.
/// This is the canonical data model shared by the fetch, classification,
/// and planning stages; records live for a single reconciliation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EndpointRecord {
    /// Opaque record identity assigned by the registry
    #[serde(rename = "ID", default)]
    pub id: String,

    /// Name of the node the service runs on
    pub node: String,

    /// Datacenter the node belongs to
    #[serde(default)]
    pub datacenter: String,

    /// Node-level metadata tags (keys unique); carries the `env` role tag
    #[serde(default)]
    pub node_meta: HashMap<String, String>,

    /// Registry-side service instance identity
    #[serde(rename = "ServiceID", default)]
    pub service_id: String,

    /// Logical service name the record was queried by
    pub service_name: String,

    /// Network address of the instance; expected to be an IP literal,
    /// validated during classification
    pub service_address: String,

    /// Service port
    pub service_port: u16,
}

/// Logical role of an endpoint, derived from its `env` metadata tag.
/// Roles drive which named set an address lands in and which allow rules
/// reference it; `Unclassified` endpoints take part in no rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    Metrics,
    Backups,
    App,
    Logs,
    Unclassified,
}

impl Role {
    /// Map an `env` tag value to a role. Missing or unknown tags are
    /// `Unclassified`.
    pub fn from_env_tag(tag: Option<&str>) -> Role {
        match tag {
            Some("metrics") => Role::Metrics,
            Some("backups") => Role::Backups,
            Some("app") => Role::App,
            Some("logs") => Role::Logs,
            _ => Role::Unclassified,
        }
    }

    /// Name of the nftables set holding this role's addresses.
    pub fn set_name(&self) -> &'static str {
        match self {
            Role::Metrics => "metrics_servers",
            Role::Backups => "backups_servers",
            Role::App => "app_servers",
            Role::Logs => "logs_servers",
            Role::Unclassified => "unclassified_servers",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            Role::Metrics => "metrics",
            Role::Backups => "backups",
            Role::App => "app",
            Role::Logs => "logs",
            Role::Unclassified => "unclassified",
        };
        write!(f, "{}", tag)
    }
}

/// Deduplicated addresses per role, ordered for deterministic output.
pub type RoleBuckets = BTreeMap<Role, BTreeSet<Ipv4Addr>>;

/// Transport protocol of a planned rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

/// One side of a planned rule: either a named role set or a literal address,
/// depending on the configured rule style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RuleOperand {
    /// Reference to a role's named set, e.g. `@metrics_servers`
    Set(Role),
    /// A single enumerated address
    Addr(Ipv4Addr),
}

/// An engine-independent allow rule: traffic from `source` (any source when
/// `None`) to `dest` on `port`/`protocol` is accepted. Field equality is the
/// unit of deduplication and of diffing against live engine state.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DesiredRule {
    /// Traffic source; `None` means any source
    pub source: Option<RuleOperand>,
    /// Traffic destination
    pub dest: RuleOperand,
    /// Destination port being protected
    pub port: u16,
    /// Transport protocol
    pub protocol: Protocol,
}
