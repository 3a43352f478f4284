use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;

use shared::types::{DesiredRule, Role, RoleBuckets};

use crate::config::RulesConfig;
use crate::nftables::engine::{EngineError, RuleStore};
use crate::nftables::render::{render_rule, render_ruleset_file, ruleset_digest};
use crate::policy::plan::RuleStyle;

/// How a pass reaches the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyMode {
    /// Render the complete ruleset to a file; loading it replaces state
    File,
    /// Mutate live engine state: sync set membership, add missing rules
    Incremental,
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to prepare base table and chain")]
    EnsureBase(#[source] EngineError),

    #[error("failed to list existing rules")]
    ListRuleset(#[source] EngineError),

    #[error("failed to synchronize set '{set}'")]
    SyncSet {
        set: &'static str,
        #[source]
        source: EngineError,
    },

    #[error("failed to apply rule '{rule}'")]
    ApplyRule {
        rule: String,
        #[source]
        source: EngineError,
    },

    #[error("failed to write rules file {path}")]
    WriteRules {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to load rules file {path}")]
    LoadRules {
        path: PathBuf,
        #[source]
        source: EngineError,
    },
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassSummary {
    pub desired: usize,
    pub applied: usize,
    pub skipped: usize,
}

/// Brings engine state in line with a pass's desired rules, either by
/// replacing a rule file or by diffing against the live ruleset.
pub struct Reconciler<S> {
    store: S,
    mode: ApplyMode,
    style: RuleStyle,
    rules_file: PathBuf,
    apply_file: bool,
    set_roles: Vec<Role>,
}

impl<S: RuleStore> Reconciler<S> {
    pub fn new(store: S, config: &RulesConfig, set_roles: Vec<Role>) -> Self {
        Self {
            store,
            mode: config.mode,
            style: config.style,
            rules_file: config.rules_file.clone(),
            apply_file: config.apply_file,
            set_roles,
        }
    }

    pub async fn run(
        &self,
        buckets: &RoleBuckets,
        rules: &[DesiredRule],
    ) -> Result<PassSummary, ReconcileError> {
        let rendered: Vec<String> = rules.iter().map(render_rule).collect();
        tracing::info!(
            "Desired: {} rule(s), digest {}",
            rendered.len(),
            ruleset_digest(&rendered)
        );

        match self.mode {
            ApplyMode::File => self.replace_file(buckets, rules, &rendered).await,
            ApplyMode::Incremental => self.apply_incremental(buckets, &rendered).await,
        }
    }

    async fn replace_file(
        &self,
        buckets: &RoleBuckets,
        rules: &[DesiredRule],
        rendered: &[String],
    ) -> Result<PassSummary, ReconcileError> {
        let contents = render_ruleset_file(&self.set_roles, buckets, rules, self.style, Utc::now());

        tokio::fs::write(&self.rules_file, contents)
            .await
            .map_err(|source| ReconcileError::WriteRules {
                path: self.rules_file.clone(),
                source,
            })?;

        tracing::info!(
            "Wrote {} rule(s) to {}",
            rendered.len(),
            self.rules_file.display()
        );

        if self.apply_file {
            self.store
                .load_file(&self.rules_file)
                .await
                .map_err(|source| ReconcileError::LoadRules {
                    path: self.rules_file.clone(),
                    source,
                })?;
            tracing::info!("Loaded {} into the engine", self.rules_file.display());
        }

        Ok(PassSummary {
            desired: rendered.len(),
            applied: rendered.len(),
            skipped: 0,
        })
    }

    async fn apply_incremental(
        &self,
        buckets: &RoleBuckets,
        rendered: &[String],
    ) -> Result<PassSummary, ReconcileError> {
        // Only a pass with no endpoints at all short-circuits; an empty
        // plan over non-empty buckets must still reach the set sync that
        // flushes departed endpoints out of membership.
        if buckets.values().all(|bucket| bucket.is_empty()) {
            tracing::info!("No endpoints discovered; engine state left untouched");
            return Ok(PassSummary {
                desired: 0,
                applied: 0,
                skipped: 0,
            });
        }

        self.store
            .ensure_base()
            .await
            .map_err(ReconcileError::EnsureBase)?;

        // Fail closed: never add rules without knowing what is already there.
        let existing = self
            .store
            .load_existing()
            .await
            .map_err(ReconcileError::ListRuleset)?;

        if self.style == RuleStyle::Sets {
            // Every policy set is synchronized, not just the ones current
            // rules reference: rules from earlier passes stay in the chain,
            // and flushing a now-empty role's set is what revokes access
            // for its deregistered endpoints.
            let empty = BTreeSet::new();
            for role in &self.set_roles {
                let members = buckets.get(role).unwrap_or(&empty);
                self.store
                    .sync_set(*role, members)
                    .await
                    .map_err(|source| ReconcileError::SyncSet {
                        set: role.set_name(),
                        source,
                    })?;
            }
        }

        let mut applied = 0;
        let mut skipped = 0;
        for rule in rendered {
            if existing.contains(rule) {
                skipped += 1;
                continue;
            }
            self.store
                .add_rule(rule)
                .await
                .map_err(|source| ReconcileError::ApplyRule {
                    rule: rule.clone(),
                    source,
                })?;
            applied += 1;
        }

        tracing::info!("Applied {} rule(s), {} already present", applied, skipped);

        Ok(PassSummary {
            desired: rendered.len(),
            applied,
            skipped,
        })
    }
}
