//! DL (PDSCH) per-slot sweep (spec §4.8 steps 1-3).

use tracing::warn;

use crate::grid::SymbolRange;
use crate::harq::GrantParams;
use crate::pdcch::{ AggregationLevel, DciFormat, PdcchAllocator };

use super::{ CellScheduler, DataGrant, FailedAttempt, PdcchGrant, SchedResult, PRIMARY_BWP };
use crate::constants::MAX_NOF_HARQS;
use crate::time::SlotPoint;

const PDSCH_SYMBOLS: SymbolRange = SymbolRange { start: 2, len: 12 };

impl CellScheduler {
    pub(super) fn dl_sweep(&mut self, sl: SlotPoint, result: &mut SchedResult) {
        self.dl_retx_sweep(sl, result);
        self.dl_newtx_sweep(sl, result);
    }

    fn dl_retx_sweep(&mut self, sl: SlotPoint, result: &mut SchedResult) {
        let rntis: Vec<_> = self.ues.keys().copied().collect();
        for rnti in rntis {
            let handles = self.dl_harq.pending_retx_for_ue(rnti);
            for h in handles {
                let grant = self.dl_harq.grant(h);
                let Some(prbs) = self.find_first_fit(sl, PRIMARY_BWP, PDSCH_SYMBOLS, grant.nof_prbs as usize) else {
                    result.failed_attempts.push(FailedAttempt { rnti, reason: "no PRBs free for DL retx".into() });
                    continue;
                };
                let k1 = self.ues[&rnti].config.k1_candidates.first().copied().unwrap_or(4) as u32;
                let ack_slot = sl.add(k1);
                if !self.dl_harq.new_retx(h, sl, ack_slot) {
                    continue;
                }
                let _ = self.grid.fill(sl, PRIMARY_BWP, PDSCH_SYMBOLS, prbs);
                let harq_id = self.harq_id_of(rnti, h);
                let dci_format = if self.ues[&rnti].state.fallback {
                    DciFormat::Fallback1_0
                } else {
                    DciFormat::NonFallback1_1
                };
                let Some(pdcch) = self.allocate_pdcch(sl, rnti, dci_format) else {
                    result.failed_attempts.push(FailedAttempt { rnti, reason: "no PDCCH candidate for DL retx".into() });
                    continue;
                };
                result.dl_pdcchs.push(PdcchGrant { rnti, alloc: pdcch.clone() });
                result.pdsch_grants.push(DataGrant {
                    rnti,
                    harq_id,
                    is_retx: true,
                    aggregation_level: pdcch.aggregation_level,
                    tbs_bytes: grant.tbs_bytes,
                    prbs,
                    symbols: PDSCH_SYMBOLS,
                });
                self.book_harq_ack_pucch(rnti, ack_slot, result);
            }
        }
    }

    fn dl_newtx_sweep(&mut self, sl: SlotPoint, result: &mut SchedResult) {
        let mut candidates: Vec<(u32, crate::harq::Rnti, u8)> = Vec::new();
        for (&rnti, ue) in self.ues.iter() {
            if ue.state.awaiting_deletion {
                continue;
            }
            for lcid in 0u8..=15 {
                let bytes = ue.lc_manager.dl_bytes(lcid);
                if bytes > 0 {
                    let weight = (ue.pf_weight(lcid) * 1_000_000.0) as u32;
                    candidates.push((weight, rnti, lcid));
                }
            }
        }
        candidates.sort_by(|a, b| b.0.cmp(&a.0));

        for (_, rnti, lcid) in candidates {
            let Some(harq_id) = self.free_dl_harq_id(rnti) else {
                result.failed_attempts.push(FailedAttempt { rnti, reason: "no free DL HARQ id".into() });
                continue;
            };
            let bytes_wanted = self.ues[&rnti].lc_manager.dl_bytes(lcid);
            let cqi = self.ues[&rnti].state.smoothed_cqi;
            let wanted_prb = Self::prbs_needed(cqi, bytes_wanted, PDSCH_SYMBOLS.len);
            let nof_prb = match self.slice_max_rb(self.ues[&rnti].config.slice_id) {
                Some(cap) => wanted_prb.min(cap as usize).max(1),
                None => wanted_prb,
            };
            let Some(prbs) = self.find_first_fit(sl, PRIMARY_BWP, PDSCH_SYMBOLS, nof_prb) else {
                continue;
            };
            let k1 = self.ues[&rnti].config.k1_candidates.first().copied().unwrap_or(4) as u32;
            let ack_slot = sl.add(k1);
            let Some(h) = self.dl_harq.alloc_harq(rnti, harq_id, sl, ack_slot, crate::constants::DEFAULT_MAX_HARQ_RETXS, 1) else {
                continue;
            };
            let tbs_bytes = Self::bytes_for_allocation(cqi, prbs.len, PDSCH_SYMBOLS.len);
            self.dl_harq.set_grant(h, GrantParams {
                tbs_bytes,
                mcs: 0,
                nof_prbs: prbs.len as u16,
                nof_layers: 1,
                dci_format_is_fallback: self.ues[&rnti].state.fallback,
            });
            let _ = self.grid.fill(sl, PRIMARY_BWP, PDSCH_SYMBOLS, prbs);
            let dci_format = if self.ues[&rnti].state.fallback {
                DciFormat::Fallback1_0
            } else {
                DciFormat::NonFallback1_1
            };
            let Some(pdcch) = self.allocate_pdcch(sl, rnti, dci_format) else {
                result.failed_attempts.push(FailedAttempt { rnti, reason: "no PDCCH candidate for DL newtx".into() });
                continue;
            };
            result.dl_pdcchs.push(PdcchGrant { rnti, alloc: pdcch.clone() });
            result.pdsch_grants.push(DataGrant {
                rnti,
                harq_id,
                is_retx: false,
                aggregation_level: pdcch.aggregation_level,
                tbs_bytes,
                prbs,
                symbols: PDSCH_SYMBOLS,
            });
            if let Some(ue) = self.ues.get_mut(&rnti) {
                ue.state.observe_scheduled_bytes(tbs_bytes, 0.5);
            }
            self.book_harq_ack_pucch(rnti, ack_slot, result);
        }
    }

    fn harq_id_of(&self, rnti: crate::harq::Rnti, h: crate::harq::HarqHandle) -> crate::harq::HarqId {
        for id in 0..MAX_NOF_HARQS as u8 {
            if self.dl_harq.handle_of(rnti, id) == Some(h) {
                return id;
            }
        }
        0
    }

    fn free_dl_harq_id(&self, rnti: crate::harq::Rnti) -> Option<crate::harq::HarqId> {
        (0..MAX_NOF_HARQS as u8).find(|&id| self.dl_harq.handle_of(rnti, id).is_none())
    }

    /// Per-slice RB cap, if the UE's slice carries one (spec §4.8
    /// "per-slice RB min/max bounds").
    pub(super) fn slice_max_rb(&self, slice_id: u16) -> Option<u16> {
        self.config.slices.iter().find(|s| s.slice_id == slice_id).map(|s| s.max_rb)
    }

    fn prbs_needed(cqi: f64, bytes: u32, nof_symbols: usize) -> usize {
        let per_prb = Self::bytes_for_allocation(cqi, 1, nof_symbols).max(1);
        ((bytes + per_prb - 1) / per_prb).max(1) as usize
    }

    pub(super) fn allocate_pdcch(
        &mut self,
        sl: SlotPoint,
        rnti: crate::harq::Rnti,
        dci_format: DciFormat
    ) -> Option<crate::pdcch::PdcchAllocation> {
        let level = AggregationLevel::L4;
        match PdcchAllocator::allocate(&mut self.grid, sl, &self.common_ss, level, dci_format, rnti) {
            Ok(alloc) => Some(alloc),
            Err(_) => {
                self.metrics.record_blocked_pdcch_candidate();
                warn!(rnti, "PDCCH allocation failed");
                None
            }
        }
    }

    pub(super) fn book_harq_ack_pucch(&mut self, rnti: crate::harq::Rnti, ack_slot: SlotPoint, result: &mut SchedResult) {
        if self.pucch.allocations_for(ack_slot).iter().any(|a| a.rnti == rnti) {
            return;
        }
        match self.pucch.alloc_harq_ack(rnti, ack_slot, 1) {
            Ok(alloc) => result.pucch_grants.push(alloc),
            Err(_) => {
                self.metrics.record_failed_pucch_alloc();
                result.failed_attempts.push(FailedAttempt { rnti, reason: "no PUCCH resource for HARQ-ACK".into() });
            }
        }
    }
}
