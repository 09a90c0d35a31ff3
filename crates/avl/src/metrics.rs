//! Operational counters with Prometheus text exposition.
//!
//! Global counters are lock-free atomics updated on the hot path.
//! Per-anchor gauges and per-kind counters live behind a mutex; they are
//! touched once per append or verify, never inside the storage path.
//! `render` produces the standard exposition format for scraping; the
//! degraded gauge is read live from the store at render time.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, Default)]
struct AnchorGauges {
    chain_length: u64,
    /// Composite trust score scaled by 1000, set on verify.
    trust_millis: Option<u64>,
    last_verified_ms: Option<i64>,
}

/// Ledger-wide counters and per-anchor gauges.
#[derive(Debug, Default)]
pub struct LedgerMetrics {
    /// Records committed.
    appends_total: AtomicU64,
    /// Appends rejected after exhausting compare-and-append retries.
    append_conflicts_total: AtomicU64,
    /// Individual compare-and-append retries.
    append_retries_total: AtomicU64,
    /// Drafts rejected before reaching storage.
    append_rejected_total: AtomicU64,
    /// Appends that failed with a backend error.
    append_backend_errors_total: AtomicU64,
    /// Chain verifications run.
    verifications_total: AtomicU64,
    /// Verifications that found at least one integrity failure.
    verification_failures_total: AtomicU64,
    /// Checkpoints sealed.
    checkpoints_total: AtomicU64,
    /// Inclusion proofs generated.
    proofs_total: AtomicU64,

    /// Per-anchor gauges, keyed by anchor id.
    anchors: Mutex<BTreeMap<String, AnchorGauges>>,
    /// Committed appends keyed by (anchor, kind).
    appends_by_kind: Mutex<BTreeMap<(String, String), u64>>,
}

impl LedgerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Note one committed record and the resulting chain length.
    pub fn record_append(&self, anchor: &str, kind: &str, chain_length: u64) {
        self.appends_total.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut anchors) = self.anchors.lock() {
            anchors.entry(anchor.to_string()).or_default().chain_length = chain_length;
        }
        if let Ok(mut by_kind) = self.appends_by_kind.lock() {
            *by_kind
                .entry((anchor.to_string(), kind.to_string()))
                .or_insert(0) += 1;
        }
    }

    pub fn record_conflict(&self) {
        self.append_conflicts_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.append_retries_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.append_rejected_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_backend_error(&self) {
        self.append_backend_errors_total
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Note one verification and refresh the anchor's gauges.
    pub fn record_verification(
        &self,
        anchor: &str,
        valid: bool,
        chain_length: u64,
        trust_score: Option<f64>,
        verified_at: i64,
    ) {
        self.verifications_total.fetch_add(1, Ordering::Relaxed);
        if !valid {
            self.verification_failures_total
                .fetch_add(1, Ordering::Relaxed);
        }
        if let Ok(mut anchors) = self.anchors.lock() {
            let gauges = anchors.entry(anchor.to_string()).or_default();
            gauges.chain_length = chain_length;
            gauges.trust_millis = trust_score.map(|s| (s * 1000.0).round() as u64);
            gauges.last_verified_ms = Some(verified_at);
        }
    }

    pub fn record_checkpoint(&self) {
        self.checkpoints_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_proof(&self) {
        self.proofs_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn appends(&self) -> u64 {
        self.appends_total.load(Ordering::Relaxed)
    }

    pub fn conflicts(&self) -> u64 {
        self.append_conflicts_total.load(Ordering::Relaxed)
    }

    pub fn verifications(&self) -> u64 {
        self.verifications_total.load(Ordering::Relaxed)
    }

    pub fn checkpoints(&self) -> u64 {
        self.checkpoints_total.load(Ordering::Relaxed)
    }

    /// Render in Prometheus text exposition format.
    pub fn render(&self, degraded: bool) -> String {
        let mut out = String::with_capacity(2048);

        let counter = |out: &mut String, name: &str, help: &str, value: u64| {
            out.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n"
            ));
        };

        counter(
            &mut out,
            "avl_appends_total",
            "Records committed to the ledger.",
            self.appends_total.load(Ordering::Relaxed),
        );
        counter(
            &mut out,
            "avl_append_conflicts_total",
            "Appends that lost the compare-and-append race on every retry.",
            self.append_conflicts_total.load(Ordering::Relaxed),
        );
        counter(
            &mut out,
            "avl_append_retries_total",
            "Individual compare-and-append retries.",
            self.append_retries_total.load(Ordering::Relaxed),
        );
        counter(
            &mut out,
            "avl_append_rejected_total",
            "Drafts rejected before reaching storage.",
            self.append_rejected_total.load(Ordering::Relaxed),
        );
        counter(
            &mut out,
            "avl_append_backend_errors_total",
            "Appends that failed with a backend error.",
            self.append_backend_errors_total.load(Ordering::Relaxed),
        );
        counter(
            &mut out,
            "avl_verifications_total",
            "Chain verifications run.",
            self.verifications_total.load(Ordering::Relaxed),
        );
        counter(
            &mut out,
            "avl_verification_failures_total",
            "Verifications that found an integrity failure.",
            self.verification_failures_total.load(Ordering::Relaxed),
        );
        counter(
            &mut out,
            "avl_checkpoints_total",
            "Checkpoints sealed.",
            self.checkpoints_total.load(Ordering::Relaxed),
        );
        counter(
            &mut out,
            "avl_proofs_total",
            "Inclusion proofs generated.",
            self.proofs_total.load(Ordering::Relaxed),
        );

        if let Ok(by_kind) = self.appends_by_kind.lock() {
            if !by_kind.is_empty() {
                out.push_str(
                    "# HELP avl_appends_by_kind_total Records committed, by anchor and kind.\n\
                     # TYPE avl_appends_by_kind_total counter\n",
                );
                for ((anchor, kind), value) in by_kind.iter() {
                    out.push_str(&format!(
                        "avl_appends_by_kind_total{{anchor=\"{}\",kind=\"{}\"}} {}\n",
                        escape_label(anchor),
                        escape_label(kind),
                        value
                    ));
                }
            }
        }

        if let Ok(anchors) = self.anchors.lock() {
            if !anchors.is_empty() {
                out.push_str(
                    "# HELP avl_chain_length Records in the anchor's chain.\n\
                     # TYPE avl_chain_length gauge\n",
                );
                for (anchor, gauges) in anchors.iter() {
                    out.push_str(&format!(
                        "avl_chain_length{{anchor=\"{}\"}} {}\n",
                        escape_label(anchor),
                        gauges.chain_length
                    ));
                }

                out.push_str(
                    "# HELP avl_trust_score_millis Composite trust score scaled by 1000.\n\
                     # TYPE avl_trust_score_millis gauge\n",
                );
                for (anchor, gauges) in anchors.iter() {
                    if let Some(trust) = gauges.trust_millis {
                        out.push_str(&format!(
                            "avl_trust_score_millis{{anchor=\"{}\"}} {}\n",
                            escape_label(anchor),
                            trust
                        ));
                    }
                }

                out.push_str(
                    "# HELP avl_last_verified_timestamp_ms When the anchor was last verified.\n\
                     # TYPE avl_last_verified_timestamp_ms gauge\n",
                );
                for (anchor, gauges) in anchors.iter() {
                    if let Some(at) = gauges.last_verified_ms {
                        out.push_str(&format!(
                            "avl_last_verified_timestamp_ms{{anchor=\"{}\"}} {}\n",
                            escape_label(anchor),
                            at
                        ));
                    }
                }
            }
        }

        out.push_str(&format!(
            "# HELP avl_storage_degraded Whether the ledger is serving from volatile standby storage.\n\
             # TYPE avl_storage_degraded gauge\n\
             avl_storage_degraded {}\n",
            u8::from(degraded)
        ));

        out
    }
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counters_accumulate() {
        let metrics = LedgerMetrics::new();
        metrics.record_append("a1", "CREATE", 1);
        metrics.record_append("a1", "UPDATE", 2);
        metrics.record_verification("a1", false, 2, Some(0.8), 1_736_870_400_000);
        assert_eq!(metrics.appends(), 2);
        assert_eq!(metrics.verifications(), 1);
    }

    #[test]
    fn test_render_contains_all_series() {
        let metrics = LedgerMetrics::new();
        metrics.record_append("a1", "CREATE", 1);
        metrics.record_verification("a1", true, 1, Some(0.85), 1_736_870_400_000);
        metrics.record_checkpoint();

        let text = metrics.render(true);
        assert!(text.contains("avl_appends_total 1"));
        assert!(text.contains("avl_checkpoints_total 1"));
        assert!(text.contains("avl_appends_by_kind_total{anchor=\"a1\",kind=\"CREATE\"} 1"));
        assert!(text.contains("avl_chain_length{anchor=\"a1\"} 1"));
        assert!(text.contains("avl_trust_score_millis{anchor=\"a1\"} 850"));
        assert!(text.contains("avl_last_verified_timestamp_ms{anchor=\"a1\"} 1736870400000"));
        assert!(text.contains("avl_storage_degraded 1"));
        assert!(text.contains("# TYPE avl_appends_total counter"));
        assert!(text.contains("# TYPE avl_chain_length gauge"));
    }

    #[test]
    fn test_empty_chain_has_no_trust_series() {
        let metrics = LedgerMetrics::new();
        metrics.record_verification("empty", true, 0, None, 1);
        let text = metrics.render(false);
        assert!(text.contains("avl_chain_length{anchor=\"empty\"} 0"));
        assert!(!text.contains("avl_trust_score_millis{anchor=\"empty\"}"));
    }

    #[test]
    fn test_label_escaping() {
        let metrics = LedgerMetrics::new();
        metrics.record_append("an\"chor", "CREATE", 1);
        let text = metrics.render(false);
        assert!(text.contains("anchor=\"an\\\"chor\""));
    }

    #[test]
    fn test_thread_safety() {
        let metrics = Arc::new(LedgerMetrics::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let m = Arc::clone(&metrics);
                std::thread::spawn(move || {
                    for i in 0..1000 {
                        m.record_append(&format!("a{t}"), "UPDATE", i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(metrics.appends(), 8000);
    }
}
