//! Per-UE configuration and scheduling state (spec §4.8, §6).

use std::collections::HashMap;

use serde::{ Deserialize, Serialize };

use crate::grid::CoresetId;
use crate::harq::Rnti;
use crate::time::Scs;

/// TDD UL/DL slot pattern, one entry per slot in the period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SlotDirection {
    Dl,
    Ul,
    Flexible,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TddPattern {
    pub slots: Vec<SlotDirection>,
}

impl TddPattern {
    pub fn fdd() -> Self {
        Self { slots: vec![SlotDirection::Flexible] }
    }

    pub fn is_ul(&self, slot_idx: u32) -> bool {
        matches!(
            self.slots[slot_idx as usize % self.slots.len()],
            SlotDirection::Ul | SlotDirection::Flexible
        )
    }

    pub fn is_dl(&self, slot_idx: u32) -> bool {
        matches!(
            self.slots[slot_idx as usize % self.slots.len()],
            SlotDirection::Dl | SlotDirection::Flexible
        )
    }
}

/// Per-slice RRM bound (spec §4.8: "per-slice RB min/max bounds").
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SliceRrmConfig {
    pub slice_id: u16,
    pub min_rb: u16,
    pub max_rb: u16,
}

/// RACH configuration carried in the cell configuration request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RachConfig {
    pub nof_preambles: u8,
    pub rar_window_slots: u16,
    pub msg3_k2: u8,
}

/// One cell's static configuration (spec §6
/// `handle_cell_configuration_request`, SPEC_FULL §C).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellConfig {
    pub cell_id: u16,
    pub pci: u16,
    pub scs: Scs,
    pub slots_per_frame: u32,
    pub nof_prb: u16,
    pub tdd_pattern: TddPattern,
    pub coreset0: CoresetId,
    pub pucch_guard_rb_lo: u16,
    pub pucch_guard_rb_hi: u16,
    pub rach_config: RachConfig,
    pub slices: Vec<SliceRrmConfig>,
    /// NTN cell-specific K-offset, in slots (0 for terrestrial cells).
    pub ntn_cs_koffset: u16,
}

/// QoS parameters for one logical channel (SPEC_FULL §C).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Qos5qi {
    pub five_qi: u8,
    pub prio: u8,
    pub arp_prio: u8,
    pub pdb_ms: u32,
    pub gbr_dl_kbps: Option<u32>,
    pub gbr_ul_kbps: Option<u32>,
}

/// Per-UE configuration (spec §6 `handle_ue_creation_request` /
/// `handle_ue_reconfiguration_request`, SPEC_FULL §C). Published by
/// pointer swap and immutable thereafter (spec §5); this struct is the
/// value behind that pointer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UeConfig {
    pub rnti: Rnti,
    pub serving_cell_id: u16,
    pub bwp_id: u8,
    pub k1_candidates: Vec<u8>,
    pub k2_candidates: Vec<u8>,
    pub min_k2: u8,
    pub slice_id: u16,
    pub lcid_qos: HashMap<u8, Qos5qi>,
}

/// Per-LCID DL buffer occupancy and per-LCG UL BSR tracked by the
/// feedback dispatcher (spec §4.9).
#[derive(Debug, Default, Clone)]
pub struct LogicalChannelManager {
    dl_bytes_by_lcid: HashMap<u8, u32>,
    ul_bytes_by_lcg: HashMap<u8, u32>,
}

impl LogicalChannelManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// `handle_dl_buffer_state_indication`. In fallback, only LCID 0/1
    /// propagate (spec §4.9).
    pub fn update_dl_buffer_state(&mut self, lcid: u8, bytes: u32, fallback: bool) {
        if fallback && lcid > 1 {
            return;
        }
        if bytes == 0 {
            self.dl_bytes_by_lcid.remove(&lcid);
        } else {
            self.dl_bytes_by_lcid.insert(lcid, bytes);
        }
    }

    pub fn update_ul_bsr(&mut self, lcg: u8, bytes: u32) {
        if bytes == 0 {
            self.ul_bytes_by_lcg.remove(&lcg);
        } else {
            self.ul_bytes_by_lcg.insert(lcg, bytes);
        }
    }

    pub fn total_dl_bytes(&self) -> u32 {
        self.dl_bytes_by_lcid.values().sum()
    }

    pub fn total_ul_bytes(&self) -> u32 {
        self.ul_bytes_by_lcg.values().sum()
    }

    pub fn dl_bytes(&self, lcid: u8) -> u32 {
        self.dl_bytes_by_lcid.get(&lcid).copied().unwrap_or(0)
    }
}

/// Smoothed-rate and CQI estimators plus fallback/deletion lifecycle
/// (spec §4.8, §4.9, §5's "awaiting deletion").
#[derive(Debug, Clone)]
pub struct UeState {
    pub fallback: bool,
    pub awaiting_deletion: bool,
    pub smoothed_rate_bps: f64,
    pub smoothed_cqi: f64,
    pub sr_pending: bool,
    pub hol_age_ms: u32,
    /// First slot index (global slot count) at which a deletion request
    /// was observed, used to bound the "awaiting deletion" grace window
    /// by `max_slot_ul_alloc_delay`.
    pub deletion_requested_at: Option<u32>,
}

impl Default for UeState {
    fn default() -> Self {
        Self {
            fallback: true,
            awaiting_deletion: false,
            smoothed_rate_bps: 1.0,
            smoothed_cqi: 7.0,
            sr_pending: false,
            hol_age_ms: 0,
            deletion_requested_at: None,
        }
    }
}

impl UeState {
    /// Exponential smoothing used for the PF weight denominator, alpha
    /// matching the teacher's EWMA smoothing constant used elsewhere for
    /// latency histograms.
    pub fn observe_scheduled_bytes(&mut self, bytes: u32, slot_duration_ms: f64) {
        const ALPHA: f64 = 0.125;
        let instantaneous_bps = (bytes as f64 * 8.0) / (slot_duration_ms / 1000.0).max(1e-6);
        self.smoothed_rate_bps = (1.0 - ALPHA) * self.smoothed_rate_bps + ALPHA * instantaneous_bps;
    }

    pub fn observe_cqi(&mut self, cqi: u8) {
        const ALPHA: f64 = 0.25;
        self.smoothed_cqi = (1.0 - ALPHA) * self.smoothed_cqi + ALPHA * cqi as f64;
    }
}

/// A UE's full per-cell scheduling state: config snapshot, logical
/// channels, and the PF/QoS bookkeeping the scheduler reads every slot.
pub struct UeEntity {
    pub config: UeConfig,
    pub lc_manager: LogicalChannelManager,
    pub state: UeState,
}

impl UeEntity {
    pub fn new(config: UeConfig) -> Self {
        Self { config, lc_manager: LogicalChannelManager::new(), state: UeState::default() }
    }

    /// Apply a published reconfiguration; clears fallback once RRC
    /// reconfiguration is applied (spec §4.8 `handle_config_applied`).
    pub fn apply_reconfiguration(&mut self, config: UeConfig) {
        self.config = config;
        self.state.fallback = false;
    }

    /// `throughput_target / smoothed_rate` PF weight with the QoS/ARP/PDB
    /// overlay (spec §4.8).
    pub fn pf_weight(&self, lcid: u8) -> f64 {
        let Some(qos) = self.config.lcid_qos.get(&lcid) else {
            return 1.0 / self.state.smoothed_rate_bps.max(1.0);
        };
        let mut target = 1.0;
        if let Some(gbr) = qos.gbr_dl_kbps.or(qos.gbr_ul_kbps) {
            target += gbr as f64 * 1000.0;
        }
        // lower 5QI priority value => higher scheduling weight.
        target *= 1.0 + 1.0 / (qos.prio.max(1) as f64);
        target *= 1.0 + 1.0 / (qos.arp_prio.max(1) as f64);
        let pdb_headroom_ms = (qos.pdb_ms as i64 - self.state.hol_age_ms as i64).max(1) as f64;
        target *= 1.0 + 1.0 / pdb_headroom_ms;
        target / self.state.smoothed_rate_bps.max(1.0)
    }

    pub fn request_deletion(&mut self, now_slot_count: u32) {
        self.state.awaiting_deletion = true;
        self.state.deletion_requested_at = Some(now_slot_count);
    }

    /// Whether the grace window has elapsed and the UE may now be
    /// destroyed (spec §5 cancellation).
    pub fn deletion_grace_elapsed(&self, now_slot_count: u32, max_slot_ul_alloc_delay: u32) -> bool {
        match self.state.deletion_requested_at {
            Some(at) => now_slot_count.saturating_sub(at) >= max_slot_ul_alloc_delay,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qos(prio: u8, gbr: Option<u32>) -> Qos5qi {
        Qos5qi { five_qi: 9, prio, arp_prio: 8, pdb_ms: 300, gbr_dl_kbps: gbr, gbr_ul_kbps: None }
    }

    fn ue_with_lcid(lcid: u8, qos_: Qos5qi) -> UeEntity {
        let mut lcid_qos = HashMap::new();
        lcid_qos.insert(lcid, qos_);
        let cfg = UeConfig {
            rnti: 1,
            serving_cell_id: 0,
            bwp_id: 0,
            k1_candidates: vec![4],
            k2_candidates: vec![4],
            min_k2: 2,
            slice_id: 0,
            lcid_qos,
        };
        UeEntity::new(cfg)
    }

    #[test]
    fn test_gbr_bearer_gets_higher_weight_than_best_effort() {
        let gbr_ue = ue_with_lcid(4, qos(2, Some(100)));
        let be_ue = ue_with_lcid(4, qos(2, None));
        assert!(gbr_ue.pf_weight(4) > be_ue.pf_weight(4));
    }

    #[test]
    fn test_lower_priority_value_yields_higher_weight() {
        let high_prio = ue_with_lcid(4, qos(1, None));
        let low_prio = ue_with_lcid(4, qos(10, None));
        assert!(high_prio.pf_weight(4) > low_prio.pf_weight(4));
    }

    #[test]
    fn test_dl_buffer_state_suppressed_above_lcid_1_in_fallback() {
        let mut lc = LogicalChannelManager::new();
        lc.update_dl_buffer_state(0, 100, true);
        lc.update_dl_buffer_state(4, 500, true);
        assert_eq!(lc.total_dl_bytes(), 100);
    }

    #[test]
    fn test_deletion_grace_window() {
        let mut ue = ue_with_lcid(4, qos(2, None));
        ue.request_deletion(10);
        assert!(!ue.deletion_grace_elapsed(12, 6));
        assert!(ue.deletion_grace_elapsed(16, 6));
    }
}
