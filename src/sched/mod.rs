//! Top-level per-cell scheduler orchestration (spec §2, §4.8, §4.9, §6).
//!
//! [`CellScheduler`] owns the grid, both HARQ managers, the PDCCH/PUCCH
//! allocators, the SI/RA/paging schedulers and the UE registry for one
//! cell — the state a single "pcell executor" would hold (spec §5). DL
//! and UL per-slot sweeps live in `dl.rs`/`ul.rs`; the five feedback
//! indication handlers live in `feedback.rs`.

mod dl;
mod feedback;
mod ul;

use std::collections::HashMap;

use tracing::{ info, warn };

use crate::common_sched::{ PagingScheduler, RaManager, SiScheduler };
use crate::constants::{ DEFAULT_MAX_ACK_WAIT_SLOTS, DEFAULT_MAX_PUCCHS_PER_SLOT, DEFAULT_MAX_UL_GRANTS_PER_SLOT };
use crate::error::{ L2Error, Result };
use crate::grid::{ BwpId, PrbRange, ResourceGrid, SymbolRange };
use crate::harq::{ CellHarqManager, Direction, HarqId, Rnti };
use crate::metrics::SchedMetrics;
use crate::pdcch::{ AggregationLevel, PdcchAllocation, SearchSpaceConfig };
use crate::pucch::{ PucchAllocation, PucchAllocator };
use crate::time::SlotPoint;
use crate::ue::{ CellConfig, UeConfig, UeEntity };

/// The primary BWP (this crate does not model BWP switching, spec §1
/// Non-goals: "bit-level MAC PDU assembly beyond what the scheduler
/// needs to reason about sizes" extends to not modelling multi-BWP UEs).
pub const PRIMARY_BWP: BwpId = 0;

/// One PDCCH grant pointing at either a common RNTI (SI/RAR/paging/ConRes)
/// or a UE's C-RNTI.
#[derive(Debug, Clone)]
pub struct PdcchGrant {
    pub rnti: Rnti,
    pub alloc: PdcchAllocation,
}

/// One PDSCH (DL) or PUSCH (UL) grant.
#[derive(Debug, Clone)]
pub struct DataGrant {
    pub rnti: Rnti,
    pub harq_id: HarqId,
    pub is_retx: bool,
    /// Aggregation level of the PDCCH scheduling this grant (SPEC_FULL
    /// §F: the original's `scheduler_result_logger` records this
    /// alongside each PDSCH/PUSCH for diagnostics, not as scheduling
    /// policy).
    pub aggregation_level: AggregationLevel,
    pub tbs_bytes: u32,
    pub prbs: PrbRange,
    pub symbols: SymbolRange,
}

#[derive(Debug, Clone)]
pub struct FailedAttempt {
    pub rnti: Rnti,
    pub reason: String,
}

/// Everything returned to the PHY for one slot (spec §6 `sched_result`).
#[derive(Debug, Clone, Default)]
pub struct SchedResult {
    pub dl_pdcchs: Vec<PdcchGrant>,
    pub ul_pdcchs: Vec<PdcchGrant>,
    pub pdsch_grants: Vec<DataGrant>,
    pub pusch_grants: Vec<DataGrant>,
    pub pucch_grants: Vec<PucchAllocation>,
    pub failed_attempts: Vec<FailedAttempt>,
}

/// A detected RACH occasion (spec §6 `rach_indication`).
#[derive(Debug, Clone, Copy)]
pub struct RachOccasion {
    pub preamble_id: u8,
    pub slot_rx: SlotPoint,
}

/// A UL CRC result (spec §6 `crc_indication`).
#[derive(Debug, Clone, Copy)]
pub struct CrcInfo {
    pub rnti: Rnti,
    pub harq_id: HarqId,
    pub crc_ok: bool,
}

/// A UCI report, already split by the PHY into its constituent fields
/// (spec §4.9).
#[derive(Debug, Clone)]
pub struct UciInfo {
    pub rnti: Rnti,
    pub harq_ack_bits: Vec<bool>,
    pub dl_harq_ids: Vec<HarqId>,
    pub sr: bool,
    pub cqi: Option<u8>,
}

/// PHY-reported loss of a PUSCH/PUCCH occasion (spec §4.9 error
/// indication).
#[derive(Debug, Clone, Copy)]
pub struct ErrorOutcome {
    pub rnti: Rnti,
}

/// Per-cell scheduler state (spec §5's "pcell executor" contents).
pub struct CellScheduler {
    pub(crate) config: CellConfig,
    pub(crate) grid: ResourceGrid,
    pub(crate) dl_harq: CellHarqManager,
    pub(crate) ul_harq: CellHarqManager,
    pub(crate) common_ss: SearchSpaceConfig,
    pub(crate) pucch: PucchAllocator,
    pub(crate) ra: RaManager,
    pub(crate) si: SiScheduler,
    pub(crate) paging: PagingScheduler,
    pub(crate) ues: HashMap<Rnti, UeEntity>,
    pub(crate) metrics: SchedMetrics,
    pub(crate) current_slot: Option<SlotPoint>,
}

impl CellScheduler {
    /// `handle_cell_configuration_request` (spec §6): the only
    /// constructor path allowed to return a hard `Err` (SPEC_FULL §A).
    pub fn new(config: CellConfig, ring_size: usize, si_messages: Vec<crate::common_sched::SiMessage>) -> Result<Self> {
        if config.nof_prb == 0 {
            return Err(L2Error::config("cell config must have at least one PRB"));
        }
        let mut bwps = HashMap::new();
        bwps.insert(PRIMARY_BWP, (config.nof_prb as usize, 14usize));
        let mut coresets = HashMap::new();
        coresets.insert(config.coreset0, 48usize);
        let grid = ResourceGrid::new(ring_size, bwps, coresets)?;

        let common_ss = SearchSpaceConfig {
            coreset: config.coreset0,
            symbols: SymbolRange::new(0, 2),
            candidates_l1: 0,
            candidates_l2: 0,
            candidates_l4: 4,
            candidates_l8: 2,
            candidates_l16: 1,
        };

        Ok(Self {
            dl_harq: CellHarqManager::new(Direction::Dl, ring_size, DEFAULT_MAX_ACK_WAIT_SLOTS),
            ul_harq: CellHarqManager::new(Direction::Ul, ring_size, DEFAULT_MAX_ACK_WAIT_SLOTS),
            si: SiScheduler::new(si_messages, 2, 32),
            paging: PagingScheduler::new(32, 2),
            ra: RaManager::new(),
            pucch: PucchAllocator::new(),
            ues: HashMap::new(),
            metrics: SchedMetrics::new(),
            current_slot: None,
            common_ss,
            grid,
            config,
        })
    }

    /// `handle_ue_creation_request`.
    pub fn handle_ue_creation_request(&mut self, config: UeConfig) {
        let rnti = config.rnti;
        self.ues.insert(rnti, UeEntity::new(config));
    }

    /// `handle_ue_reconfiguration_request`: publishes a new immutable
    /// config snapshot, swapped in atomically (spec §5, §6).
    pub fn handle_ue_reconfiguration_request(&mut self, config: UeConfig) {
        if let Some(ue) = self.ues.get_mut(&config.rnti) {
            ue.apply_reconfiguration(config);
        }
    }

    /// `handle_ue_removal_request`: transitions the UE to "awaiting
    /// deletion" rather than destroying it immediately (spec §5).
    pub fn handle_ue_removal_request(&mut self, rnti: Rnti) {
        if let Some(ue) = self.ues.get_mut(&rnti) {
            let now = self.current_slot.map(|s| s.count()).unwrap_or(0);
            ue.request_deletion(now);
        }
    }

    /// `rach_indication`.
    pub fn rach_indication(&mut self, occasions: &[RachOccasion]) -> Vec<Rnti> {
        let pairs: Vec<(u8, SlotPoint)> = occasions.iter().map(|o| (o.preamble_id, o.slot_rx)).collect();
        self.ra.handle_rach_indication(&pairs)
    }

    /// The per-slot decision (spec §2's control-flow diagram).
    pub fn slot_indication(&mut self, sl: SlotPoint) -> SchedResult {
        self.current_slot = Some(sl);
        self.grid.slot_indication(sl);

        for event in self.dl_harq.slot_indication(sl) {
            warn!(rnti = event.rnti, harq_id = event.harq_id, "DL HARQ ack-timeout at slot_indication");
        }
        for event in self.ul_harq.slot_indication(sl) {
            warn!(rnti = event.rnti, harq_id = event.harq_id, "UL HARQ ack-timeout at slot_indication");
        }
        self.si.slot_indication(sl.sfn());
        self.ra.slot_indication(sl);
        self.pucch.forget_slot(sl.sub(self.grid.ring_size() as u32));

        let max_slot_ul_alloc_delay = crate::constants::MAX_SLOT_UL_ALLOC_DELAY as u32;
        let destroyable: Vec<Rnti> = self
            .ues
            .iter()
            .filter(|(_, ue)| ue.state.awaiting_deletion && ue.deletion_grace_elapsed(sl.count(), max_slot_ul_alloc_delay))
            .map(|(&rnti, _)| rnti)
            .collect();
        for rnti in destroyable {
            info!(rnti, "UE destroyed after deletion grace window");
            self.ues.remove(&rnti);
        }

        let mut result = SchedResult::default();

        self.dl_sweep(sl, &mut result);
        self.ul_sweep(sl, &mut result);

        if result.pusch_grants.len() > DEFAULT_MAX_UL_GRANTS_PER_SLOT {
            let excess = result.pusch_grants.split_off(DEFAULT_MAX_UL_GRANTS_PER_SLOT);
            for g in excess {
                result.failed_attempts.push(FailedAttempt { rnti: g.rnti, reason: "max_ul_grants_per_slot exceeded".into() });
            }
        }
        if result.pucch_grants.len() > DEFAULT_MAX_PUCCHS_PER_SLOT {
            let excess = result.pucch_grants.split_off(DEFAULT_MAX_PUCCHS_PER_SLOT);
            for g in excess {
                result.failed_attempts.push(FailedAttempt { rnti: g.rnti, reason: "max_pucchs_per_slot exceeded".into() });
            }
        }

        result
    }

    pub fn metrics(&self) -> &SchedMetrics {
        &self.metrics
    }

    /// First-fit contiguous PRB search within `symbols` of `bwp`,
    /// avoiding the grid's used mask (spec §4.8 step 2).
    pub(crate) fn find_first_fit(&self, sl: SlotPoint, bwp: BwpId, symbols: SymbolRange, want_len: usize) -> Option<PrbRange> {
        let total = self.grid.bwp_nof_prb(bwp)?;
        if want_len == 0 || want_len > total {
            return None;
        }
        for start in 0..=(total - want_len) {
            let candidate = PrbRange::new(start, want_len);
            if !self.grid.collides(sl, bwp, symbols, candidate) {
                return Some(candidate);
            }
        }
        None
    }

    /// Deterministic bytes-per-PRB-per-symbol throughput model keyed off
    /// smoothed CQI (a stand-in for the 3GPP MCS/TBS lookup tables, which
    /// this crate does not reproduce — spec §1 Non-goals excludes
    /// "bit-level MAC PDU assembly beyond what the scheduler needs to
    /// reason about sizes").
    pub(crate) fn bytes_for_allocation(cqi: f64, nof_prb: usize, nof_symbols: usize) -> u32 {
        let spectral_efficiency = cqi.clamp(1.0, 15.0);
        ((spectral_efficiency * nof_prb as f64 * nof_symbols as f64).round() as u32).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common_sched::SiMessage;
    use crate::time::Scs;
    use crate::ue::{ RachConfig, SliceRrmConfig, TddPattern };

    fn cell_config() -> CellConfig {
        CellConfig {
            cell_id: 1,
            pci: 10,
            scs: Scs::Khz30,
            slots_per_frame: 20,
            nof_prb: 52,
            tdd_pattern: TddPattern::fdd(),
            coreset0: 0,
            pucch_guard_rb_lo: 0,
            pucch_guard_rb_hi: 0,
            rach_config: RachConfig { nof_preambles: 64, rar_window_slots: 10, msg3_k2: 4 },
            slices: vec![SliceRrmConfig { slice_id: 0, min_rb: 0, max_rb: 52 }],
            ntn_cs_koffset: 0,
        }
    }

    fn sp(slot: u32) -> SlotPoint {
        SlotPoint::new(Scs::Khz30, 0, slot)
    }

    #[test]
    fn test_cell_scheduler_construction_and_empty_slot() {
        let mut sched = CellScheduler::new(cell_config(), 20, vec![SiMessage { payload_size: 200, period_frames: 8 }]).unwrap();
        let result = sched.slot_indication(sp(0));
        assert!(result.pdsch_grants.is_empty());
        assert!(result.failed_attempts.is_empty());
    }

    #[test]
    fn test_zero_prb_config_is_rejected() {
        let mut bad = cell_config();
        bad.nof_prb = 0;
        assert!(CellScheduler::new(bad, 20, vec![]).is_err());
    }
}
