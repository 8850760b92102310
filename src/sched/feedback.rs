//! Feedback dispatcher (spec §4.9): five non-blocking indication
//! handlers applied to UE and HARQ state.

use tracing::warn;

use crate::constants::MAX_NOF_HARQS;
use crate::harq::AckOutcome;

use super::{ CellScheduler, CrcInfo, ErrorOutcome, UciInfo };

impl CellScheduler {
    /// `handle_dl_buffer_state_indication`.
    pub fn handle_dl_buffer_state_indication(&mut self, rnti: crate::harq::Rnti, lcid: u8, bytes: u32) {
        let Some(ue) = self.ues.get_mut(&rnti) else {
            return; // deleted UE: silently discarded (spec §5)
        };
        let fallback = ue.state.fallback;
        ue.lc_manager.update_dl_buffer_state(lcid, bytes, fallback);
    }

    /// `handle_ul_bsr_indication`.
    pub fn handle_ul_bsr_indication(&mut self, rnti: crate::harq::Rnti, lcg_reports: &[(u8, u32)]) {
        let Some(ue) = self.ues.get_mut(&rnti) else {
            return;
        };
        for &(lcg, bytes) in lcg_reports {
            ue.lc_manager.update_ul_bsr(lcg, bytes);
        }
    }

    /// `crc_indication`: resolves a UL HARQ via `ul_crc_info(ack)`; if
    /// the HARQ is not `waiting_ack`, log and ignore.
    pub fn crc_indication(&mut self, crcs: &[CrcInfo]) {
        for crc in crcs {
            let Some(h) = self.ul_harq.handle_of(crc.rnti, crc.harq_id) else {
                warn!(rnti = crc.rnti, harq_id = crc.harq_id, "CRC for unknown UL HARQ process, ignored");
                continue;
            };
            if self.ul_harq.state(h) != crate::harq::HarqState::WaitingAck {
                warn!(rnti = crc.rnti, harq_id = crc.harq_id, "CRC for UL HARQ not waiting_ack, ignored");
                continue;
            }
            self.ul_harq.ack(h, if crc.crc_ok { AckOutcome::Ack } else { AckOutcome::Nack }, 0);
        }
    }

    /// `uci_indication`: splits HARQ-ACK bits (indexed by
    /// `(uci_slot, harq_bit_idx)` against the UE's DL HARQ table), SR and
    /// CQI.
    pub fn uci_indication(&mut self, ucis: &[UciInfo]) {
        for uci in ucis {
            for (bit, &harq_id) in uci.harq_ack_bits.iter().zip(uci.dl_harq_ids.iter()) {
                let Some(h) = self.dl_harq.handle_of(uci.rnti, harq_id) else {
                    continue;
                };
                if self.dl_harq.state(h) != crate::harq::HarqState::WaitingAck {
                    continue;
                }
                self.dl_harq.ack(h, if *bit { AckOutcome::Ack } else { AckOutcome::Nack }, 0);
            }
            if let Some(ue) = self.ues.get_mut(&uci.rnti) {
                if let Some(cqi) = uci.cqi {
                    ue.state.observe_cqi(cqi);
                }
                if uci.sr {
                    ue.state.sr_pending = true;
                }
            }
        }
    }

    /// `error_indication`: PHY-reported PUSCH/PUCCH loss. Marks every DL
    /// HARQ still `waiting_ack` for the UE as retx-ready (their ACK is
    /// presumed lost) and discards first-transmission UL HARQs (they
    /// never went on-air, so there is nothing to retransmit).
    pub fn error_indication(&mut self, outcomes: &[ErrorOutcome]) {
        for outcome in outcomes {
            for id in 0..MAX_NOF_HARQS as u8 {
                if let Some(h) = self.dl_harq.handle_of(outcome.rnti, id) {
                    if self.dl_harq.state(h) == crate::harq::HarqState::WaitingAck {
                        self.dl_harq.ack(h, AckOutcome::Nack, 0);
                    }
                }
                if let Some(h) = self.ul_harq.handle_of(outcome.rnti, id) {
                    if self.ul_harq.state(h) == crate::harq::HarqState::WaitingAck {
                        self.ul_harq.cancel_retxs(h);
                        self.ul_harq.ack(h, AckOutcome::Nack, 0);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common_sched::SiMessage;
    use crate::time::{ Scs, SlotPoint };
    use crate::ue::{ CellConfig, RachConfig, SliceRrmConfig, TddPattern, UeConfig };
    use std::collections::HashMap;

    fn sched() -> CellScheduler {
        let config = CellConfig {
            cell_id: 1,
            pci: 1,
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
        };
        CellScheduler::new(config, 20, vec![SiMessage { payload_size: 100, period_frames: 8 }]).unwrap()
    }

    #[test]
    fn test_crc_for_non_waiting_harq_is_ignored_not_panicking() {
        let mut s = sched();
        s.crc_indication(&[CrcInfo { rnti: 99, harq_id: 0, crc_ok: true }]);
    }

    #[test]
    fn test_dl_buffer_state_reaches_logical_channel_manager() {
        let mut s = sched();
        s.handle_ue_creation_request(UeConfig {
            rnti: 5,
            serving_cell_id: 1,
            bwp_id: 0,
            k1_candidates: vec![4],
            k2_candidates: vec![4],
            min_k2: 2,
            slice_id: 0,
            lcid_qos: HashMap::new(),
        });
        s.handle_dl_buffer_state_indication(5, 4, 1000);
        assert_eq!(s.ues[&5].lc_manager.dl_bytes(4), 1000);
    }

    #[test]
    fn test_error_indication_frees_first_tx_ul_harq() {
        let mut s = sched();
        let sl = SlotPoint::new(Scs::Khz30, 0, 0);
        s.ul_harq.alloc_harq(7, 0, sl, sl.add(4), 4, 1).unwrap();
        s.error_indication(&[ErrorOutcome { rnti: 7 }]);
        assert!(s.ul_harq.handle_of(7, 0).is_none() || s.ul_harq.state(s.ul_harq.handle_of(7, 0).unwrap()) != crate::harq::HarqState::WaitingAck);
    }
}
