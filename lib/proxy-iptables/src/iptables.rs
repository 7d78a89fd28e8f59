//! iptables operations scoped to a network namespace
//!
//! Every call is wrapped in `ip netns exec <netns>` so rules land inside the
//! tenant router's namespace rather than the host's.

use crate::error::{IptablesError, Result};
use crate::exec::{display_command, CommandOutput, CommandRunner};
use std::sync::Arc;
use tracing::{debug, trace};

/// The `ip` command used for namespace probing and `netns exec`
pub const IP_CMD: &str = "ip";

pub const IPTABLES_CMD: &str = "iptables";

pub const IPTABLES_RESTORE_CMD: &str = "iptables-restore";

/// The only table this proxy programs
pub const TABLE_NAT: &str = "nat";

/// Built-in chain the custom chain is linked from
pub const CHAIN_PREROUTING: &str = "PREROUTING";

/// iptables exit status for "rule/chain does not match" and "already exists"
const EXIT_STATUS_ONE: i32 = 1;

/// Idempotent iptables primitives executed inside a network namespace
#[derive(Clone)]
pub struct Iptables {
    runner: Arc<dyn CommandRunner>,
}

impl Iptables {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn run_in_netns(
        &self,
        netns: &str,
        program: &str,
        args: &[String],
        stdin: Option<&[u8]>,
    ) -> Result<CommandOutput> {
        let mut full = Vec::with_capacity(args.len() + 4);
        full.extend(["netns", "exec", netns, program].map(String::from));
        full.extend_from_slice(args);
        self.runner.run(IP_CMD, &full, stdin).await
    }

    fn failed(program: &str, args: &[String], output: &CommandOutput) -> IptablesError {
        IptablesError::CommandFailed {
            command: display_command(program, args),
            exit_code: output.exit_code,
            output: output.combined_output(),
        }
    }

    /// Whether a network namespace with this name exists on the host.
    ///
    /// Any failure, including a probe that could not run, counts as absent.
    pub async fn netns_exists(&self, netns: &str) -> bool {
        let args = vec!["netns".to_string(), "pids".to_string(), netns.to_string()];
        match self.runner.run(IP_CMD, &args, None).await {
            Ok(output) => output.success(),
            Err(e) => {
                debug!(netns, error = %e, "network namespace probe failed");
                false
            }
        }
    }

    /// Create `chain` in `table`. Returns true if it already existed.
    pub async fn ensure_chain(&self, netns: &str, table: &str, chain: &str) -> Result<bool> {
        let args = vec![
            "-w".to_string(),
            "-t".to_string(),
            table.to_string(),
            "-N".to_string(),
            chain.to_string(),
        ];
        let output = self.run_in_netns(netns, IPTABLES_CMD, &args, None).await?;
        match output.exit_code {
            0 => {
                debug!(netns, table, chain, "created chain");
                Ok(false)
            }
            EXIT_STATUS_ONE => {
                trace!(netns, table, chain, "chain already exists");
                Ok(true)
            }
            _ => Err(Self::failed(IPTABLES_CMD, &args, &output)),
        }
    }

    /// Append a rule unless an identical one is already present.
    /// Returns true if it already existed.
    pub async fn ensure_rule(
        &self,
        netns: &str,
        table: &str,
        chain: &str,
        rule: &[String],
    ) -> Result<bool> {
        let mut check = vec![
            "-w".to_string(),
            "-t".to_string(),
            table.to_string(),
            "-C".to_string(),
            chain.to_string(),
        ];
        check.extend_from_slice(rule);
        let output = self.run_in_netns(netns, IPTABLES_CMD, &check, None).await?;
        match output.exit_code {
            0 => return Ok(true),
            EXIT_STATUS_ONE => {}
            _ => return Err(Self::failed(IPTABLES_CMD, &check, &output)),
        }

        let mut add = vec![
            "-w".to_string(),
            "-t".to_string(),
            table.to_string(),
            "-A".to_string(),
            chain.to_string(),
        ];
        add.extend_from_slice(rule);
        let output = self.run_in_netns(netns, IPTABLES_CMD, &add, None).await?;
        if !output.success() {
            return Err(Self::failed(IPTABLES_CMD, &add, &output));
        }
        debug!(netns, table, chain, rule = ?rule, "added rule");
        Ok(false)
    }

    /// Apply an `iptables-restore` script as one transaction.
    ///
    /// Chains not mentioned in the script are left alone.
    pub async fn restore(&self, netns: &str, data: &[u8]) -> Result<()> {
        let args = vec!["--noflush".to_string(), "--counters".to_string()];
        let output = self
            .run_in_netns(netns, IPTABLES_RESTORE_CMD, &args, Some(data))
            .await?;
        if !output.success() {
            return Err(Self::failed(IPTABLES_RESTORE_CMD, &args, &output));
        }
        Ok(())
    }
}
