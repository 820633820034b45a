//! Checksum offload control.
//!
//! Offloaded checksums are computed by hardware that encapsulated overlay
//! traffic never reaches, so weave switches transmit offload off on every
//! interface it touches. All of it is best-effort.

use weave_common::WeaveResult;

use crate::netctl::{NetworkControl, OffloadOutcome};
use crate::netns::Netns;

/// Per-namespace offload adjustment summary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OffloadReport {
    /// Interfaces with offload now disabled.
    pub disabled: Vec<String>,
    /// Interfaces left untouched because the tool is missing.
    pub skipped: Vec<String>,
    /// Interfaces where the adjustment failed.
    pub failed: Vec<String>,
}

/// Disable offload on one interface, downgrading failure to a warning.
pub async fn disable_offload_best_effort(
    net: &dyn NetworkControl,
    ns: Netns,
    name: &str,
) -> Option<OffloadOutcome> {
    match net.disable_offload(ns, name).await {
        Ok(outcome) => Some(outcome),
        Err(e) => {
            tracing::warn!(%ns, interface = name, error = %e, "Failed to disable offload");
            None
        }
    }
}

/// Disable offload on every interface in `ns`.
///
/// Only listing the namespace can fail; per-interface errors are recorded
/// in the report.
pub async fn disable_offload_all(net: &dyn NetworkControl, ns: Netns) -> WeaveResult<OffloadReport> {
    let mut report = OffloadReport::default();

    for name in net.list_links(ns).await? {
        match disable_offload_best_effort(net, ns, &name).await {
            Some(OffloadOutcome::Disabled) => report.disabled.push(name),
            Some(OffloadOutcome::Skipped) => report.skipped.push(name),
            None => report.failed.push(name),
        }
    }

    tracing::debug!(
        %ns,
        disabled = report.disabled.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "Offload adjusted"
    );
    Ok(report)
}
