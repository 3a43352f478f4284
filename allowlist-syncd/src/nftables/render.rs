use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use shared::types::{DesiredRule, Role, RoleBuckets, RuleOperand};

use crate::policy::plan::RuleStyle;

/// Canonical text of a single allow rule.
///
/// This rendering is used both for rule insertion and for membership tests
/// against the engine's listing, so it has to agree byte-for-byte with what
/// `canonical_line` produces for the listed form of the same rule.
pub fn render_rule(rule: &DesiredRule) -> String {
    match &rule.source {
        Some(source) => format!(
            "ip saddr {} ip daddr {} {} dport {} accept",
            operand(source),
            operand(&rule.dest),
            rule.protocol.as_str(),
            rule.port
        ),
        None => format!(
            "ip daddr {} {} dport {} accept",
            operand(&rule.dest),
            rule.protocol.as_str(),
            rule.port
        ),
    }
}

fn operand(op: &RuleOperand) -> String {
    match op {
        RuleOperand::Set(role) => format!("@{}", role.set_name()),
        RuleOperand::Addr(addr) => addr.to_string(),
    }
}

/// Collapse indentation and runs of whitespace so listed rules compare
/// equal to rendered ones.
pub fn canonical_line(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// An allow rule carries both a destination-port clause and an accept
/// action; everything else in a listing (table and chain headers, set
/// blocks, counters) is left alone.
pub fn is_allow_rule(line: &str) -> bool {
    let mut has_dport = false;
    let mut has_accept = false;
    for token in line.split_whitespace() {
        match token {
            "dport" => has_dport = true,
            "accept" => has_accept = true,
            _ => {}
        }
    }
    has_dport && has_accept
}

/// Extract the canonical allow rules from an engine listing.
pub fn extract_allow_rules(listing: &str) -> BTreeSet<String> {
    listing
        .lines()
        .filter(|line| is_allow_rule(line))
        .map(canonical_line)
        .collect()
}

/// Render the complete replacement ruleset for file mode.
///
/// Every policy set is declared even when its bucket is empty; the
/// `elements` clause is simply omitted then, which the engine accepts,
/// unlike an empty elements block.
pub fn render_ruleset_file(
    set_roles: &[Role],
    buckets: &RoleBuckets,
    rules: &[DesiredRule],
    style: RuleStyle,
    generated_at: DateTime<Utc>,
) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "# Generated by allowlist-syncd at {}",
        generated_at.to_rfc3339()
    ));
    lines.push("table ip filter {".to_string());

    if style == RuleStyle::Sets {
        for role in set_roles {
            lines.push(format!("  set {} {{", role.set_name()));
            lines.push("    type ipv4_addr".to_string());
            if let Some(bucket) = buckets.get(role).filter(|b| !b.is_empty()) {
                let members: Vec<String> = bucket.iter().map(|a| a.to_string()).collect();
                lines.push(format!("    elements = {{ {} }}", members.join(", ")));
            }
            lines.push("  }".to_string());
        }
    }

    lines.push("  chain INPUT {".to_string());
    for rule in rules {
        lines.push(format!("    {}", render_rule(rule)));
    }
    lines.push("  }".to_string());
    lines.push("}".to_string());
    lines.push(String::new());

    lines.join("\n")
}

/// SHA-256 over the canonical rule lines, hex-encoded. Logged once per pass
/// so two passes can be compared for drift from the journal alone.
pub fn ruleset_digest(lines: &[String]) -> String {
    let mut hasher = Sha256::new();
    for line in lines {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use shared::types::Protocol;
    use std::net::Ipv4Addr;

    fn addr(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    fn set_rule(source: Option<Role>, dest: Role, port: u16) -> DesiredRule {
        DesiredRule {
            source: source.map(RuleOperand::Set),
            dest: RuleOperand::Set(dest),
            port,
            protocol: Protocol::Tcp,
        }
    }

    #[test]
    fn test_render_rule_with_set_operands() {
        let rule = set_rule(Some(Role::Metrics), Role::App, 9104);

        assert_eq!(
            render_rule(&rule),
            "ip saddr @metrics_servers ip daddr @app_servers tcp dport 9104 accept"
        );
    }

    #[test]
    fn test_render_rule_any_source() {
        let rule = set_rule(None, Role::Logs, 5141);

        assert_eq!(
            render_rule(&rule),
            "ip daddr @logs_servers tcp dport 5141 accept"
        );
    }

    #[test]
    fn test_render_rule_with_address_operands() {
        let rule = DesiredRule {
            source: Some(RuleOperand::Addr(addr("10.0.0.1"))),
            dest: RuleOperand::Addr(addr("10.0.0.5")),
            port: 9104,
            protocol: Protocol::Tcp,
        };

        assert_eq!(
            render_rule(&rule),
            "ip saddr 10.0.0.1 ip daddr 10.0.0.5 tcp dport 9104 accept"
        );
    }

    #[test]
    fn test_canonical_line_collapses_whitespace() {
        assert_eq!(
            canonical_line("\t\tip daddr  @logs_servers   tcp dport 5141 accept "),
            "ip daddr @logs_servers tcp dport 5141 accept"
        );
    }

    #[test]
    fn test_is_allow_rule_requires_dport_and_accept() {
        assert!(is_allow_rule("ip daddr @logs_servers tcp dport 5141 accept"));
        assert!(!is_allow_rule("type filter hook input priority 0; policy accept;"));
        assert!(!is_allow_rule("tcp dport 22 drop"));
        assert!(!is_allow_rule("elements = { 10.0.0.1, 10.0.0.2 }"));
        assert!(!is_allow_rule("chain INPUT {"));
    }

    #[test]
    fn test_extract_allow_rules_from_engine_listing() {
        // Shaped like `nft list chain` output: tab indentation, header and
        // trailer lines mixed in with the rules.
        let listing = "table ip filter {\n\
                       \tchain INPUT {\n\
                       \t\tip saddr @metrics_servers ip daddr @app_servers tcp dport 9104 accept\n\
                       \t\tip daddr @logs_servers tcp dport 5141 accept\n\
                       \t}\n\
                       }\n";

        let existing = extract_allow_rules(listing);

        assert_eq!(existing.len(), 2);
        assert!(existing.contains("ip saddr @metrics_servers ip daddr @app_servers tcp dport 9104 accept"));
        assert!(existing.contains("ip daddr @logs_servers tcp dport 5141 accept"));
    }

    #[test]
    fn test_rendered_rule_round_trips_through_listing() {
        let rules = vec![
            set_rule(Some(Role::Metrics), Role::App, 9104),
            set_rule(Some(Role::Backups), Role::App, 3306),
            set_rule(None, Role::Logs, 5141),
            set_rule(None, Role::Metrics, 9100),
        ];

        let listing: String = rules
            .iter()
            .map(|r| format!("\t\t{}\n", render_rule(r)))
            .collect();
        let existing = extract_allow_rules(&listing);

        for rule in &rules {
            assert!(existing.contains(&render_rule(rule)));
        }
    }

    #[test]
    fn test_render_ruleset_file_declares_empty_sets_without_elements() {
        let set_roles = vec![Role::Metrics, Role::Backups, Role::App, Role::Logs];
        let mut buckets = RoleBuckets::new();
        buckets
            .entry(Role::Metrics)
            .or_default()
            .extend([addr("10.0.0.1"), addr("10.0.0.2")]);
        buckets.entry(Role::App).or_default().insert(addr("10.0.2.1"));

        let rules = vec![
            set_rule(Some(Role::Metrics), Role::App, 9104),
            set_rule(None, Role::Metrics, 9100),
        ];
        let generated_at = Utc.with_ymd_and_hms(2026, 8, 21, 12, 0, 0).unwrap();

        let file = render_ruleset_file(&set_roles, &buckets, &rules, RuleStyle::Sets, generated_at);

        let expected = "\
# Generated by allowlist-syncd at 2026-08-21T12:00:00+00:00
table ip filter {
  set metrics_servers {
    type ipv4_addr
    elements = { 10.0.0.1, 10.0.0.2 }
  }
  set backups_servers {
    type ipv4_addr
  }
  set app_servers {
    type ipv4_addr
    elements = { 10.0.2.1 }
  }
  set logs_servers {
    type ipv4_addr
  }
  chain INPUT {
    ip saddr @metrics_servers ip daddr @app_servers tcp dport 9104 accept
    ip daddr @metrics_servers tcp dport 9100 accept
  }
}
";
        assert_eq!(file, expected);
    }

    #[test]
    fn test_render_ruleset_file_addresses_style_has_no_sets() {
        let set_roles = vec![Role::Metrics, Role::App];
        let mut buckets = RoleBuckets::new();
        buckets.entry(Role::Metrics).or_default().insert(addr("10.0.0.1"));
        buckets.entry(Role::App).or_default().insert(addr("10.0.2.1"));

        let rules = vec![DesiredRule {
            source: Some(RuleOperand::Addr(addr("10.0.0.1"))),
            dest: RuleOperand::Addr(addr("10.0.2.1")),
            port: 9104,
            protocol: Protocol::Tcp,
        }];

        let file = render_ruleset_file(
            &set_roles,
            &buckets,
            &rules,
            RuleStyle::Addresses,
            Utc::now(),
        );

        assert!(!file.contains("set "));
        assert!(file.contains("    ip saddr 10.0.0.1 ip daddr 10.0.2.1 tcp dport 9104 accept\n"));
    }

    #[test]
    fn test_render_ruleset_file_with_empty_plan() {
        let set_roles = vec![Role::Metrics, Role::Backups, Role::App, Role::Logs];

        let file = render_ruleset_file(
            &set_roles,
            &RoleBuckets::new(),
            &[],
            RuleStyle::Sets,
            Utc::now(),
        );

        assert!(file.contains("  set metrics_servers {\n    type ipv4_addr\n  }\n"));
        assert!(!file.contains("elements"));
        assert!(file.contains("  chain INPUT {\n  }\n"));
    }

    #[test]
    fn test_ruleset_digest_tracks_content() {
        let a = vec!["ip daddr @logs_servers tcp dport 5141 accept".to_string()];
        let b = vec!["ip daddr @logs_servers tcp dport 5142 accept".to_string()];

        assert_eq!(ruleset_digest(&a), ruleset_digest(&a));
        assert_ne!(ruleset_digest(&a), ruleset_digest(&b));
    }
}
