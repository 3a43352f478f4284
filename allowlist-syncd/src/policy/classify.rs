use std::net::IpAddr;

use shared::protocol::META_ENV;
use shared::types::{EndpointRecord, Role, RoleBuckets};

/// Partition endpoint records into per-role address buckets.
///
/// Records whose `env` tag maps to no known role take part in no rule and
/// are skipped. Addresses must be IP literals; the engine tables managed
/// here are IPv4-only, so IPv6 endpoints are skipped as well.
pub fn classify(records: &[EndpointRecord]) -> RoleBuckets {
    let mut buckets = RoleBuckets::new();

    for record in records {
        let env = record.node_meta.get(META_ENV).map(String::as_str);
        let role = Role::from_env_tag(env);
        if role == Role::Unclassified {
            tracing::debug!(
                "Skipping endpoint {} on node {}: no role for env tag {:?}",
                record.service_address,
                record.node,
                env
            );
            continue;
        }

        match record.service_address.parse::<IpAddr>() {
            Ok(IpAddr::V4(addr)) => {
                buckets.entry(role).or_default().insert(addr);
            }
            Ok(IpAddr::V6(_)) => {
                tracing::debug!(
                    "Skipping IPv6 endpoint {} on node {} (role {})",
                    record.service_address,
                    record.node,
                    role
                );
            }
            Err(_) => {
                tracing::warn!(
                    "Skipping endpoint with non-literal address {:?} on node {} (role {})",
                    record.service_address,
                    record.node,
                    role
                );
            }
        }
    }

    buckets
}
