//! Idempotent firewall rule installation.
//!
//! Rules are checked with the non-mutating form of the command before they
//! are appended, so re-running setup never duplicates them.

use std::fmt;

use async_trait::async_trait;
use tokio::process::Command;

use weave_common::{WeaveError, WeaveResult};

/// Name of the NAT chain the router container manages.
pub const NAT_CHAIN: &str = "WEAVE";

/// An iptables table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    /// The `filter` table.
    Filter,
    /// The `nat` table.
    Nat,
}

impl Table {
    /// Get the table name for iptables.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Filter => "filter",
            Self::Nat => "nat",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A rule: table, chain and match/target arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FirewallRule {
    /// Table holding the chain.
    pub table: Table,
    /// Chain the rule lives in.
    pub chain: String,
    /// Match and target arguments, e.g. `-i weave -j ACCEPT`.
    pub spec: Vec<String>,
}

impl FirewallRule {
    /// Create a rule.
    pub fn new<I, S>(table: Table, chain: impl Into<String>, spec: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            table,
            chain: chain.into(),
            spec: spec.into_iter().map(Into::into).collect(),
        }
    }

    /// Accept traffic forwarded from the bridge back onto itself.
    #[must_use]
    pub fn bridge_forward(bridge: &str) -> Self {
        Self::new(
            Table::Filter,
            "FORWARD",
            ["-i", bridge, "-o", bridge, "-j", "ACCEPT"],
        )
    }

    /// Send all POSTROUTING traffic through the weave NAT chain.
    #[must_use]
    pub fn nat_jump() -> Self {
        Self::new(Table::Nat, "POSTROUTING", ["-j", NAT_CHAIN])
    }

    /// Arguments for iptables with the given operation flag (`-C`, `-A`).
    #[must_use]
    pub fn args(&self, op: &str) -> Vec<String> {
        let mut args = vec![
            "-t".to_string(),
            self.table.as_str().to_string(),
            op.to_string(),
            self.chain.clone(),
        ];
        args.extend(self.spec.iter().cloned());
        args
    }
}

impl fmt::Display for FirewallRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "-t {} {} {}", self.table, self.chain, self.spec.join(" "))
    }
}

/// Outcome of [`ensure_rule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOutcome {
    /// The rule was missing and has been appended.
    Created,
    /// The rule was already installed.
    AlreadyPresent,
}

/// Packet filter backend.
#[async_trait]
pub trait PacketFilter: Send + Sync {
    /// Whether the rule is installed. Never mutates.
    async fn check(&self, rule: &FirewallRule) -> WeaveResult<bool>;

    /// Append the rule to its chain.
    async fn append(&self, rule: &FirewallRule) -> WeaveResult<()>;

    /// Create a user-defined chain. Fails if it already exists.
    async fn new_chain(&self, table: Table, chain: &str) -> WeaveResult<()>;
}

/// Ensure a rule is installed exactly once.
pub async fn ensure_rule(filter: &dyn PacketFilter, rule: &FirewallRule) -> WeaveResult<RuleOutcome> {
    if filter.check(rule).await? {
        tracing::debug!(%rule, "Rule already present");
        return Ok(RuleOutcome::AlreadyPresent);
    }

    filter.append(rule).await?;
    tracing::info!(%rule, "Rule installed");
    Ok(RuleOutcome::Created)
}

/// Ensure a user-defined chain exists.
///
/// Creation failing because the chain exists is the common case on every
/// run after the first, so any failure here is only logged.
pub async fn ensure_chain(filter: &dyn PacketFilter, table: Table, chain: &str) {
    if let Err(e) = filter.new_chain(table, chain).await {
        tracing::debug!(%table, chain, error = %e, "Chain not created (likely exists)");
    }
}

/// Install the rules the overlay fabric needs on top of `bridge`.
pub async fn install_fabric_rules(
    filter: &dyn PacketFilter,
    bridge: &str,
) -> WeaveResult<Vec<(FirewallRule, RuleOutcome)>> {
    let mut outcomes = Vec::with_capacity(2);

    let forward = FirewallRule::bridge_forward(bridge);
    let outcome = ensure_rule(filter, &forward).await?;
    outcomes.push((forward, outcome));

    ensure_chain(filter, Table::Nat, NAT_CHAIN).await;
    let jump = FirewallRule::nat_jump();
    let outcome = ensure_rule(filter, &jump).await?;
    outcomes.push((jump, outcome));

    tracing::info!(bridge, "Fabric rules configured");
    Ok(outcomes)
}

/// [`PacketFilter`] backed by the `iptables` command.
#[derive(Debug, Clone)]
pub struct Iptables {
    binary: String,
}

impl Default for Iptables {
    fn default() -> Self {
        Self::new()
    }
}

impl Iptables {
    /// Use `iptables` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_binary("iptables")
    }

    /// Use a specific iptables binary.
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(&self, args: &[String]) -> WeaveResult<std::process::Output> {
        Command::new(&self.binary)
            .arg("-w")
            .args(args)
            .output()
            .await
            .map_err(|e| WeaveError::NetworkControl {
                message: format!("Failed to execute iptables: {e}"),
            })
    }
}

#[async_trait]
impl PacketFilter for Iptables {
    async fn check(&self, rule: &FirewallRule) -> WeaveResult<bool> {
        let output = self.run(&rule.args("-C")).await?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(WeaveError::creation(
                format!("rule {rule}"),
                format!(
                    "iptables check failed ({}): {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            )),
        }
    }

    async fn append(&self, rule: &FirewallRule) -> WeaveResult<()> {
        let output = self.run(&rule.args("-A")).await?;
        if !output.status.success() {
            return Err(WeaveError::creation(
                format!("rule {rule}"),
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }

    async fn new_chain(&self, table: Table, chain: &str) -> WeaveResult<()> {
        let args = ["-t", table.as_str(), "-N", chain].map(String::from);
        let output = self.run(&args).await?;
        if !output.status.success() {
            return Err(WeaveError::creation(
                format!("chain {table}/{chain}"),
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeFilter;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    /// An iptables stand-in running `body` as a shell script.
    fn scripted_iptables(dir: &Path, body: &str) -> Iptables {
        let path = dir.join("iptables");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        Iptables::with_binary(path.to_string_lossy())
    }

    #[test]
    fn rule_rendering() {
        insta::assert_snapshot!(
            FirewallRule::bridge_forward("weave").to_string(),
            @"-t filter FORWARD -i weave -o weave -j ACCEPT"
        );
        insta::assert_snapshot!(
            FirewallRule::nat_jump().to_string(),
            @"-t nat POSTROUTING -j WEAVE"
        );
    }

    #[test]
    fn check_and_append_args() {
        let rule = FirewallRule::nat_jump();
        assert_eq!(rule.args("-C"), ["-t", "nat", "-C", "POSTROUTING", "-j", "WEAVE"]);
        assert_eq!(rule.args("-A"), ["-t", "nat", "-A", "POSTROUTING", "-j", "WEAVE"]);
    }

    #[tokio::test]
    async fn ensure_rule_appends_once() {
        let filter = FakeFilter::default();
        let rule = FirewallRule::bridge_forward("weave");

        assert_eq!(ensure_rule(&filter, &rule).await.unwrap(), RuleOutcome::Created);
        assert_eq!(
            ensure_rule(&filter, &rule).await.unwrap(),
            RuleOutcome::AlreadyPresent
        );
        assert_eq!(filter.count(&rule), 1);
    }

    #[tokio::test]
    async fn installing_twice_never_duplicates() {
        let filter = FakeFilter::default();

        let first = install_fabric_rules(&filter, "weave").await.unwrap();
        let second = install_fabric_rules(&filter, "weave").await.unwrap();

        assert!(first.iter().all(|(_, o)| *o == RuleOutcome::Created));
        assert!(second.iter().all(|(_, o)| *o == RuleOutcome::AlreadyPresent));
        assert_eq!(filter.count(&FirewallRule::bridge_forward("weave")), 1);
        assert_eq!(filter.count(&FirewallRule::nat_jump()), 1);
        assert!(filter.has_chain(Table::Nat, NAT_CHAIN));
    }

    #[tokio::test]
    async fn existing_chain_is_tolerated() {
        let filter = FakeFilter::default();
        filter.new_chain(Table::Nat, NAT_CHAIN).await.unwrap();

        install_fabric_rules(&filter, "weave").await.unwrap();
        assert_eq!(filter.count(&FirewallRule::nat_jump()), 1);
    }

    #[tokio::test]
    async fn append_failure_is_fatal() {
        let filter = FakeFilter::default();
        filter.fail_appends();

        let err = install_fabric_rules(&filter, "weave").await.unwrap_err();
        assert!(matches!(err, WeaveError::ResourceCreation { .. }));
    }

    #[tokio::test]
    async fn iptables_exit_codes() {
        let rule = FirewallRule::bridge_forward("weave");

        let dir = tempfile::tempdir().unwrap();
        let present = scripted_iptables(dir.path(), "exit 0");
        assert!(present.check(&rule).await.unwrap());

        let dir = tempfile::tempdir().unwrap();
        let absent = scripted_iptables(dir.path(), "exit 1");
        assert!(!absent.check(&rule).await.unwrap());

        let dir = tempfile::tempdir().unwrap();
        let broken = scripted_iptables(
            dir.path(),
            "echo 'iptables: Permission denied' >&2\nexit 2",
        );
        let err = broken.check(&rule).await.unwrap_err();
        assert!(matches!(err, WeaveError::ResourceCreation { .. }));
        assert!(err.to_string().contains("Permission denied"));
    }

    #[tokio::test]
    async fn iptables_checks_before_appending() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("calls");
        let iptables = scripted_iptables(
            dir.path(),
            &format!(
                "echo \"$@\" >> {}\n[ \"$4\" = -C ] && exit 1\nexit 0",
                log.display()
            ),
        );

        let rule = FirewallRule::bridge_forward("weave");
        assert_eq!(ensure_rule(&iptables, &rule).await.unwrap(), RuleOutcome::Created);

        let calls = fs::read_to_string(&log).unwrap();
        assert_eq!(
            calls.lines().collect::<Vec<_>>(),
            vec![
                "-w -t filter -C FORWARD -i weave -o weave -j ACCEPT",
                "-w -t filter -A FORWARD -i weave -o weave -j ACCEPT",
            ]
        );
    }

    #[tokio::test]
    async fn iptables_present_rule_is_not_appended() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("calls");
        let iptables = scripted_iptables(
            dir.path(),
            &format!("echo \"$@\" >> {}\nexit 0", log.display()),
        );

        let rule = FirewallRule::nat_jump();
        assert_eq!(
            ensure_rule(&iptables, &rule).await.unwrap(),
            RuleOutcome::AlreadyPresent
        );
        assert_eq!(fs::read_to_string(&log).unwrap().lines().count(), 1);
    }
}
