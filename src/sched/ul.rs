//! UL (PUSCH) per-slot sweep (spec §4.8 steps 1-2, 4; PUSCH time-domain
//! distribution per §4.8's "ceiling of #UL_slots / #DL_slots" rule).

use crate::grid::SymbolRange;
use crate::harq::GrantParams;
use crate::pdcch::DciFormat;

use super::{ CellScheduler, DataGrant, FailedAttempt, PdcchGrant, SchedResult, PRIMARY_BWP };
use crate::constants::MAX_NOF_HARQS;
use crate::time::SlotPoint;

const PUSCH_SYMBOLS: SymbolRange = SymbolRange { start: 0, len: 12 };

impl CellScheduler {
    pub(super) fn ul_sweep(&mut self, sl: SlotPoint, result: &mut SchedResult) {
        self.ul_retx_sweep(sl, result);
        self.ul_newtx_sweep(sl, result);
    }

    fn ul_retx_sweep(&mut self, sl: SlotPoint, result: &mut SchedResult) {
        let rntis: Vec<_> = self.ues.keys().copied().collect();
        for rnti in rntis {
            let handles = self.ul_harq.pending_retx_for_ue(rnti);
            for h in handles {
                let grant = self.ul_harq.grant(h);
                let k2 = self.ues[&rnti].config.k2_candidates.first().copied().unwrap_or(4).max(self.ues[&rnti].config.min_k2) as u32;
                let pusch_slot = sl.add(k2);
                let Some(prbs) = self.find_first_fit(pusch_slot, PRIMARY_BWP, PUSCH_SYMBOLS, grant.nof_prbs as usize) else {
                    result.failed_attempts.push(FailedAttempt { rnti, reason: "no PRBs free for UL retx".into() });
                    continue;
                };
                if !self.ul_harq.new_retx(h, pusch_slot, pusch_slot) {
                    continue;
                }
                let _ = self.grid.fill(pusch_slot, PRIMARY_BWP, PUSCH_SYMBOLS, prbs);
                let harq_id = (0..MAX_NOF_HARQS as u8).find(|&id| self.ul_harq.handle_of(rnti, id) == Some(h)).unwrap_or(0);
                let dci_format = if self.ues[&rnti].state.fallback {
                    DciFormat::Fallback0_0
                } else {
                    DciFormat::NonFallback0_1
                };
                let Some(pdcch) = self.allocate_pdcch(sl, rnti, dci_format) else {
                    result.failed_attempts.push(FailedAttempt { rnti, reason: "no PDCCH candidate for UL retx".into() });
                    continue;
                };
                result.ul_pdcchs.push(PdcchGrant { rnti, alloc: pdcch.clone() });
                result.pusch_grants.push(DataGrant {
                    rnti,
                    harq_id,
                    is_retx: true,
                    aggregation_level: pdcch.aggregation_level,
                    tbs_bytes: grant.tbs_bytes,
                    prbs,
                    symbols: PUSCH_SYMBOLS,
                });
            }
        }
    }

    fn ul_newtx_sweep(&mut self, sl: SlotPoint, result: &mut SchedResult) {
        let mut candidates: Vec<(u32, crate::harq::Rnti)> = self
            .ues
            .iter()
            .filter(|(_, ue)| !ue.state.awaiting_deletion && ue.lc_manager.total_ul_bytes() > 0)
            .map(|(&rnti, ue)| ((ue.pf_weight(0) * 1_000_000.0) as u32, rnti))
            .collect();
        candidates.sort_by(|a, b| b.0.cmp(&a.0));

        for (_, rnti) in candidates {
            let Some(harq_id) = (0..MAX_NOF_HARQS as u8).find(|&id| self.ul_harq.handle_of(rnti, id).is_none()) else {
                result.failed_attempts.push(FailedAttempt { rnti, reason: "no free UL HARQ id".into() });
                continue;
            };
            let ue = &self.ues[&rnti];
            let k2 = ue.config.k2_candidates.first().copied().unwrap_or(4).max(ue.config.min_k2) as u32;
            let pusch_slot = sl.add(k2);
            let bytes_wanted = ue.lc_manager.total_ul_bytes();
            let cqi = ue.state.smoothed_cqi;
            let nof_prb = (bytes_wanted / Self::bytes_for_allocation(cqi, 1, PUSCH_SYMBOLS.len).max(1)).max(1) as usize;
            let Some(prbs) = self.find_first_fit(pusch_slot, PRIMARY_BWP, PUSCH_SYMBOLS, nof_prb) else {
                continue;
            };
            let Some(h) = self.ul_harq.alloc_harq(rnti, harq_id, pusch_slot, pusch_slot, crate::constants::DEFAULT_MAX_HARQ_RETXS, 1) else {
                continue;
            };
            let tbs_bytes = Self::bytes_for_allocation(cqi, prbs.len, PUSCH_SYMBOLS.len);
            self.ul_harq.set_grant(h, GrantParams {
                tbs_bytes,
                mcs: 0,
                nof_prbs: prbs.len as u16,
                nof_layers: 1,
                dci_format_is_fallback: self.ues[&rnti].state.fallback,
            });
            let _ = self.grid.fill(pusch_slot, PRIMARY_BWP, PUSCH_SYMBOLS, prbs);
            let dci_format = if self.ues[&rnti].state.fallback {
                DciFormat::Fallback0_0
            } else {
                DciFormat::NonFallback0_1
            };
            let Some(pdcch) = self.allocate_pdcch(sl, rnti, dci_format) else {
                result.failed_attempts.push(FailedAttempt { rnti, reason: "no PDCCH candidate for UL newtx".into() });
                continue;
            };
            result.ul_pdcchs.push(PdcchGrant { rnti, alloc: pdcch.clone() });
            result.pusch_grants.push(DataGrant {
                rnti,
                harq_id,
                is_retx: false,
                aggregation_level: pdcch.aggregation_level,
                tbs_bytes,
                prbs,
                symbols: PUSCH_SYMBOLS,
            });
        }
    }

    /// `pusch_td_indices`: for each PDCCH slot in a TDD period, the list
    /// of valid `k2` offsets landing on a UL slot, load-balanced so every
    /// UL slot is reachable and no PDCCH slot gets more than
    /// `ceil(#UL_slots / #DL_slots)` of them (spec §4.8).
    pub fn pusch_td_indices(tdd: &crate::ue::TddPattern, min_k2: u8) -> Vec<Vec<u8>> {
        let period = tdd.slots.len();
        if period == 0 {
            return Vec::new();
        }
        let ul_slots: Vec<usize> = (0..period).filter(|&i| tdd.is_ul(i as u32)).collect();
        let dl_slots: Vec<usize> = (0..period).filter(|&i| tdd.is_dl(i as u32)).collect();
        let load_cap = if dl_slots.is_empty() { ul_slots.len() } else { (ul_slots.len() + dl_slots.len() - 1) / dl_slots.len().max(1) };

        let mut out = vec![Vec::new(); period];
        let mut per_pdcch_load = vec![0usize; period];
        for &ul in &ul_slots {
            let mut best: Option<(usize, u8)> = None;
            for k2 in min_k2..=min_k2.saturating_add(period as u8) {
                let pdcch_slot = (ul + period - (k2 as usize % period)) % period;
                if !dl_slots.contains(&pdcch_slot) {
                    continue;
                }
                if per_pdcch_load[pdcch_slot] >= load_cap {
                    continue;
                }
                best = Some((pdcch_slot, k2));
                break;
            }
            if let Some((pdcch_slot, k2)) = best {
                out[pdcch_slot].push(k2);
                per_pdcch_load[pdcch_slot] += 1;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ue::{ SlotDirection, TddPattern };

    #[test]
    fn test_pusch_td_reaches_every_ul_slot() {
        let tdd = TddPattern {
            slots: vec![
                SlotDirection::Dl,
                SlotDirection::Dl,
                SlotDirection::Ul,
                SlotDirection::Ul,
                SlotDirection::Flexible
            ],
        };
        let distribution = CellScheduler::pusch_td_indices(&tdd, 2);
        let total: usize = distribution.iter().map(|v| v.len()).sum();
        assert_eq!(total, 3); // two UL slots + one flexible (counts as UL-reachable)
    }

    #[test]
    fn test_pusch_td_load_is_balanced() {
        let tdd = TddPattern {
            slots: vec![SlotDirection::Dl, SlotDirection::Ul, SlotDirection::Ul, SlotDirection::Ul],
        };
        let distribution = CellScheduler::pusch_td_indices(&tdd, 1);
        let max_load = distribution.iter().map(|v| v.len()).max().unwrap_or(0);
        assert!(max_load <= 3); // ceil(3 UL / 1 DL) = 3
    }
}
