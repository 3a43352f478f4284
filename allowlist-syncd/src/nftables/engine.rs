use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::path::Path;
use std::process::ExitStatus;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

use shared::types::Role;

use crate::nftables::render::extract_allow_rules;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to start '{command}'")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' exited with {status}: {output}")]
    CommandFailed {
        command: String,
        status: ExitStatus,
        output: String,
    },
}

/// Seam between reconciliation and the firewall engine. The production
/// implementation shells out to the engine's CLI; tests substitute a
/// recording double.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Create the table and chain the allow rules live in, if absent.
    async fn ensure_base(&self) -> Result<(), EngineError>;

    /// List the active allow rules of the managed chain, canonicalized.
    async fn load_existing(&self) -> Result<BTreeSet<String>, EngineError>;

    /// Replace a named set's membership with exactly `addrs`.
    async fn sync_set(&self, role: Role, addrs: &BTreeSet<Ipv4Addr>) -> Result<(), EngineError>;

    /// Append one allow rule to the managed chain.
    async fn add_rule(&self, rule: &str) -> Result<(), EngineError>;

    /// Flush the whole ruleset and load a replacement rule file.
    async fn load_file(&self, path: &Path) -> Result<(), EngineError>;
}

/// Drives the `nft` binary. Each operation is one process invocation;
/// a non-zero exit surfaces the combined stdout/stderr in the error.
pub struct NftCli {
    program: String,
}

impl NftCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String, EngineError> {
        let rendered = format!("{} {}", self.program, args.join(" "));
        tracing::debug!("Running: {}", rendered);

        let output = Command::new(&self.program)
            .args(args)
            .output()
            .await
            .map_err(|source| EngineError::Spawn {
                command: rendered.clone(),
                source,
            })?;

        if !output.status.success() {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(EngineError::CommandFailed {
                command: rendered,
                status: output.status,
                output: combined,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl RuleStore for NftCli {
    async fn ensure_base(&self) -> Result<(), EngineError> {
        // `add` is idempotent for both, and creating the chain without a
        // hook declaration leaves an existing base chain untouched.
        self.run(&["add", "table", "ip", "filter"]).await?;
        self.run(&["add", "chain", "ip", "filter", "INPUT"]).await?;
        Ok(())
    }

    async fn load_existing(&self) -> Result<BTreeSet<String>, EngineError> {
        let listing = self.run(&["list", "chain", "ip", "filter", "INPUT"]).await?;
        Ok(extract_allow_rules(&listing))
    }

    async fn sync_set(&self, role: Role, addrs: &BTreeSet<Ipv4Addr>) -> Result<(), EngineError> {
        let name = role.set_name();

        self.run(&["add", "set", "ip", "filter", name, "{ type ipv4_addr ; }"])
            .await?;
        self.run(&["flush", "set", "ip", "filter", name]).await?;

        if !addrs.is_empty() {
            let members: Vec<String> = addrs.iter().map(|a| a.to_string()).collect();
            let elements = format!("{{ {} }}", members.join(", "));
            self.run(&["add", "element", "ip", "filter", name, &elements])
                .await?;
        }

        Ok(())
    }

    async fn add_rule(&self, rule: &str) -> Result<(), EngineError> {
        let mut args = vec!["add", "rule", "ip", "filter", "INPUT"];
        args.extend(rule.split_whitespace());
        self.run(&args).await?;
        Ok(())
    }

    async fn load_file(&self, path: &Path) -> Result<(), EngineError> {
        let path = path.to_string_lossy();
        self.run(&["flush", "ruleset"]).await?;
        self.run(&["-f", path.as_ref()]).await?;
        Ok(())
    }
}
