//! Per-cell scheduler metrics (SPEC_FULL §D), grounded on the teacher's
//! `kaos/src/metrics.rs` histogram-plus-counters aggregator.

use hdrhistogram::Histogram;

/// Read-only snapshot returned by [`SchedMetrics::snapshot`].
#[derive(Debug, Clone)]
pub struct SchedMetricsSnapshot {
    pub failed_harq_allocs: u64,
    pub failed_pucch_allocs: u64,
    pub blocked_pdcch_candidates: u64,
    pub malformed_rlc_pdus: u64,
    pub rlc_max_retx_events: u64,
    pub slot_latency_mean_ns: f64,
    pub slot_latency_p99_ns: u64,
}

/// Per-cell metrics aggregator. Never blocks the scheduling critical
/// path (spec §5): every update here is a counter increment or a
/// non-blocking histogram record.
pub struct SchedMetrics {
    failed_harq_allocs: u64,
    failed_pucch_allocs: u64,
    blocked_pdcch_candidates: u64,
    malformed_rlc_pdus: u64,
    rlc_max_retx_events: u64,
    slot_latency_ns: Histogram<u64>,
}

impl SchedMetrics {
    pub fn new() -> Self {
        Self {
            failed_harq_allocs: 0,
            failed_pucch_allocs: 0,
            blocked_pdcch_candidates: 0,
            malformed_rlc_pdus: 0,
            rlc_max_retx_events: 0,
            // 1ns .. 1s at 3 significant digits, matching the teacher's
            // latency-histogram construction.
            slot_latency_ns: Histogram::new_with_bounds(1, 1_000_000_000, 3).expect("valid histogram bounds"),
        }
    }

    pub fn record_failed_harq_alloc(&mut self) {
        self.failed_harq_allocs += 1;
    }

    pub fn record_failed_pucch_alloc(&mut self) {
        self.failed_pucch_allocs += 1;
    }

    pub fn record_blocked_pdcch_candidate(&mut self) {
        self.blocked_pdcch_candidates += 1;
    }

    pub fn record_malformed_rlc_pdu(&mut self) {
        self.malformed_rlc_pdus += 1;
    }

    pub fn record_rlc_max_retx(&mut self) {
        self.rlc_max_retx_events += 1;
    }

    pub fn record_slot_latency_ns(&mut self, ns: u64) {
        let _ = self.slot_latency_ns.record(ns);
    }

    pub fn snapshot(&self) -> SchedMetricsSnapshot {
        SchedMetricsSnapshot {
            failed_harq_allocs: self.failed_harq_allocs,
            failed_pucch_allocs: self.failed_pucch_allocs,
            blocked_pdcch_candidates: self.blocked_pdcch_candidates,
            malformed_rlc_pdus: self.malformed_rlc_pdus,
            rlc_max_retx_events: self.rlc_max_retx_events,
            slot_latency_mean_ns: self.slot_latency_ns.mean(),
            slot_latency_p99_ns: self.slot_latency_ns.value_at_quantile(0.99),
        }
    }
}

impl Default for SchedMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_increment() {
        let mut m = SchedMetrics::new();
        m.record_failed_harq_alloc();
        m.record_failed_harq_alloc();
        assert_eq!(m.snapshot().failed_harq_allocs, 2);
    }

    #[test]
    fn test_latency_histogram_reports_mean() {
        let mut m = SchedMetrics::new();
        m.record_slot_latency_ns(1000);
        m.record_slot_latency_ns(2000);
        let snap = m.snapshot();
        assert!(snap.slot_latency_mean_ns > 0.0);
        assert!(snap.slot_latency_p99_ns >= 1000);
    }
}
