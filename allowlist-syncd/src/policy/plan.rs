use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use serde::Deserialize;

use shared::types::{DesiredRule, Protocol, Role, RoleBuckets, RuleOperand};

/// How planned rules reference their address operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleStyle {
    /// Reference role membership through named sets, one rule per policy row
    Sets,
    /// Enumerate concrete address pairs, one rule per combination
    Addresses,
}

/// One row of the allow policy: traffic from `source` (any source when
/// `None`) to `dest` on `port` is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyEntry {
    pub source: Option<Role>,
    pub dest: Role,
    pub port: u16,
    pub protocol: Protocol,
}

/// The fixed allow policy: which role reaches which protected port.
pub fn default_policy() -> Vec<PolicyEntry> {
    vec![
        // metrics scraper -> exporter
        PolicyEntry {
            source: Some(Role::Metrics),
            dest: Role::App,
            port: 9104,
            protocol: Protocol::Tcp,
        },
        // backup agent -> database
        PolicyEntry {
            source: Some(Role::Backups),
            dest: Role::App,
            port: 3306,
            protocol: Protocol::Tcp,
        },
        // log shipping ingress
        PolicyEntry {
            source: None,
            dest: Role::Logs,
            port: 5141,
            protocol: Protocol::Tcp,
        },
        // host-metrics scraping
        PolicyEntry {
            source: None,
            dest: Role::Metrics,
            port: 9100,
            protocol: Protocol::Tcp,
        },
    ]
}

/// Derives the rules that should exist for a pass from classified role
/// buckets. The policy table is injected at construction so alternative
/// tables can be planned and tested without touching the planner.
pub struct Planner {
    policy: Vec<PolicyEntry>,
    style: RuleStyle,
}

impl Planner {
    pub fn new(policy: Vec<PolicyEntry>, style: RuleStyle) -> Self {
        Self { policy, style }
    }

    /// Every role the policy references; these are the named sets a pass
    /// has to declare or synchronize. Sorted for stable output.
    pub fn set_roles(&self) -> Vec<Role> {
        let mut roles = BTreeSet::new();
        for entry in &self.policy {
            if let Some(source) = entry.source {
                roles.insert(source);
            }
            roles.insert(entry.dest);
        }
        roles.into_iter().collect()
    }

    /// Map role buckets to the ordered sequence of rules that should exist.
    ///
    /// Output order follows the policy table, then address order within a
    /// row, so identical buckets always yield the identical sequence. A row
    /// whose source or destination bucket is empty emits nothing: an empty
    /// set operand is invalid or matches everything depending on the
    /// engine, so absence is the only safe rendering.
    pub fn plan(&self, buckets: &RoleBuckets) -> Vec<DesiredRule> {
        let mut rules = Vec::new();
        let mut seen = BTreeSet::new();

        for entry in &self.policy {
            let Some(dests) = occupied(buckets, entry.dest) else {
                continue;
            };

            match self.style {
                RuleStyle::Sets => {
                    if let Some(source) = entry.source {
                        if occupied(buckets, source).is_none() {
                            continue;
                        }
                    }
                    push_unique(
                        &mut rules,
                        &mut seen,
                        DesiredRule {
                            source: entry.source.map(RuleOperand::Set),
                            dest: RuleOperand::Set(entry.dest),
                            port: entry.port,
                            protocol: entry.protocol,
                        },
                    );
                }
                RuleStyle::Addresses => match entry.source {
                    Some(source) => {
                        let Some(sources) = occupied(buckets, source) else {
                            continue;
                        };
                        for src in sources {
                            for dst in dests {
                                push_unique(
                                    &mut rules,
                                    &mut seen,
                                    DesiredRule {
                                        source: Some(RuleOperand::Addr(*src)),
                                        dest: RuleOperand::Addr(*dst),
                                        port: entry.port,
                                        protocol: entry.protocol,
                                    },
                                );
                            }
                        }
                    }
                    None => {
                        for dst in dests {
                            push_unique(
                                &mut rules,
                                &mut seen,
                                DesiredRule {
                                    source: None,
                                    dest: RuleOperand::Addr(*dst),
                                    port: entry.port,
                                    protocol: entry.protocol,
                                },
                            );
                        }
                    }
                },
            }
        }

        rules
    }
}

fn occupied(buckets: &RoleBuckets, role: Role) -> Option<&BTreeSet<Ipv4Addr>> {
    buckets.get(&role).filter(|bucket| !bucket.is_empty())
}

fn push_unique(rules: &mut Vec<DesiredRule>, seen: &mut BTreeSet<DesiredRule>, rule: DesiredRule) {
    if seen.insert(rule.clone()) {
        rules.push(rule);
    }
}
