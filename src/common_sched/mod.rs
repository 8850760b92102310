//! SI/RA/paging common-channel scheduling (spec §4.7).

use std::collections::HashMap;

use tracing::warn;

use crate::constants::{
    DEFAULT_CONRES_TIMER_SLOTS,
    DEFAULT_MSG3_MAX_RETXS,
    DEFAULT_RAR_WINDOW_SLOTS,
    TC_RNTI_POOL_SIZE,
};
use crate::harq::{ AckOutcome, CellHarqManager, HarqId, Rnti };
use crate::time::SlotPoint;

/// One configured SI/SIB message.
#[derive(Debug, Clone, Copy)]
pub struct SiMessage {
    pub payload_size: usize,
    pub period_frames: u32,
}

/// SIB1/SI window scheduling (spec §4.7): a pending out-of-band version
/// update only takes effect at a modification-period boundary so every
/// UE observes a consistent snapshot.
pub struct SiScheduler {
    messages: Vec<SiMessage>,
    modification_period_coefficient: u32,
    default_paging_cycle_frames: u32,
    pending_update: bool,
}

impl SiScheduler {
    pub fn new(messages: Vec<SiMessage>, modification_period_coefficient: u32, default_paging_cycle_frames: u32) -> Self {
        Self { messages, modification_period_coefficient, default_paging_cycle_frames, pending_update: false }
    }

    fn window_length_frames(&self) -> u32 {
        self.modification_period_coefficient * self.default_paging_cycle_frames
    }

    /// Whether `sfn` is a modification-period window boundary.
    pub fn is_window_boundary(&self, sfn: u32) -> bool {
        let len = self.window_length_frames();
        len != 0 && sfn % len == 0
    }

    /// Signal that a new SI version is available out-of-band. It only
    /// takes effect at the next window boundary.
    pub fn mark_update_pending(&mut self) {
        self.pending_update = true;
    }

    /// Whether a short-message PDCCH (P-RNTI, flag `0x80`) must be sent
    /// in every paging occasion until the window flips.
    pub fn update_in_flight(&self) -> bool {
        self.pending_update
    }

    /// Apply the pending update if `sfn` lands on a window boundary.
    /// Call once per frame.
    pub fn slot_indication(&mut self, sfn: u32) {
        if self.pending_update && self.is_window_boundary(sfn) {
            self.pending_update = false;
        }
    }

    /// Whether message `idx` must be (re)transmitted in frame `sfn`,
    /// ensuring at least one transmission per its configured period.
    pub fn should_transmit(&self, idx: usize, sfn: u32) -> bool {
        self.messages.get(idx).map_or(false, |m| m.period_frames != 0 && sfn % m.period_frames == 0)
    }

    pub fn messages(&self) -> &[SiMessage] {
        &self.messages
    }
}

/// Paging occasions and the short-message (SI-update) PDCCH.
pub struct PagingScheduler {
    default_paging_cycle_frames: u32,
    nof_po_per_frame: u32,
}

impl PagingScheduler {
    pub fn new(default_paging_cycle_frames: u32, nof_po_per_frame: u32) -> Self {
        Self { default_paging_cycle_frames, nof_po_per_frame: nof_po_per_frame.max(1) }
    }

    /// The (frame, occasion-within-frame) this `ue_id` is paged on,
    /// derived from a UE-ID hash modulo the paging cycle (TS 38.304
    /// §7.1's `UE_ID mod (PF_UE x N)` reduced for this spec's scope).
    fn occasion_of(&self, ue_id: u32) -> (u32, u32) {
        let cycle = self.default_paging_cycle_frames.max(1);
        let frame = ue_id % cycle;
        let po = (ue_id / cycle) % self.nof_po_per_frame;
        (frame, po)
    }

    /// UE ids whose paging occasion falls in frame `sfn`; when an SI
    /// update is in flight, every one of these occasions must also carry
    /// the short-message PDCCH (spec §4.7), each UE id exactly once.
    pub fn occasions_in_frame(&self, ue_ids: &[u32], sfn: u32) -> Vec<u32> {
        let cycle = self.default_paging_cycle_frames.max(1);
        ue_ids.iter().copied().filter(|&id| self.occasion_of(id).0 == sfn % cycle).collect()
    }
}

/// Lifecycle state of a random-access procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaState {
    AwaitingMsg3,
    AwaitingConRes,
    Resolved,
    Expired,
}

/// One in-flight RA procedure, keyed by its TC-RNTI.
#[derive(Debug, Clone)]
pub struct RaProcedure {
    pub tc_rnti: Rnti,
    pub preamble_id: u8,
    pub rar_window_end: SlotPoint,
    pub msg3_slot: Option<SlotPoint>,
    pub nof_msg3_retxs: u8,
    pub state: RaState,
    pub con_res_ce_received: bool,
    pub msg4_sdu_received: bool,
    pub conres_expiry: Option<SlotPoint>,
}

/// Msg3's fixed HARQ process id (conventionally process 0 during RA).
const MSG3_HARQ_ID: HarqId = 0;

/// RACH/RAR/Msg3/ContentionResolution state machine (spec §4.7).
pub struct RaManager {
    free_tc_rntis: Vec<Rnti>,
    procedures: HashMap<Rnti, RaProcedure>,
    rar_window_slots: u16,
    msg3_max_retxs: u8,
    conres_timer_slots: u16,
}

impl RaManager {
    pub fn new() -> Self {
        Self {
            free_tc_rntis: (1..=TC_RNTI_POOL_SIZE as u32).rev().collect(),
            procedures: HashMap::new(),
            rar_window_slots: DEFAULT_RAR_WINDOW_SLOTS,
            msg3_max_retxs: DEFAULT_MSG3_MAX_RETXS,
            conres_timer_slots: DEFAULT_CONRES_TIMER_SLOTS,
        }
    }

    /// Assign a TC-RNTI to each detected preamble. Preambles for which
    /// the pool is exhausted are dropped (recorded as a failed attempt
    /// by the caller), never fatal.
    pub fn handle_rach_indication(&mut self, preambles: &[(u8, SlotPoint)]) -> Vec<Rnti> {
        let mut assigned = Vec::new();
        for &(preamble_id, slot_rx) in preambles {
            let Some(tc_rnti) = self.free_tc_rntis.pop() else {
                warn!(preamble_id, "TC-RNTI pool exhausted, dropping RACH preamble");
                continue;
            };
            self.procedures.insert(tc_rnti, RaProcedure {
                tc_rnti,
                preamble_id,
                rar_window_end: slot_rx.add(self.rar_window_slots as u32),
                msg3_slot: None,
                nof_msg3_retxs: 0,
                state: RaState::AwaitingMsg3,
                con_res_ce_received: false,
                msg4_sdu_received: false,
                conres_expiry: None,
            });
            assigned.push(tc_rnti);
        }
        assigned
    }

    /// Allocate (or reallocate, on retx) the UL HARQ process carrying
    /// Msg3 for `tc_rnti`. Returns `false` if the procedure is unknown or
    /// not awaiting Msg3.
    pub fn alloc_msg3(&mut self, tc_rnti: Rnti, harq: &mut CellHarqManager, tx_slot: SlotPoint, ack_slot: SlotPoint) -> bool {
        let Some(proc_) = self.procedures.get_mut(&tc_rnti) else {
            return false;
        };
        if proc_.state != RaState::AwaitingMsg3 {
            return false;
        }
        let ok = match harq.handle_of(tc_rnti, MSG3_HARQ_ID) {
            Some(h) => harq.new_retx(h, tx_slot, ack_slot),
            None => harq.alloc_harq(tc_rnti, MSG3_HARQ_ID, tx_slot, ack_slot, self.msg3_max_retxs, 1).is_some(),
        };
        if ok {
            proc_.msg3_slot = Some(tx_slot);
        }
        ok
    }

    /// Report Msg3's CRC outcome. On success, moves to
    /// `AwaitingConRes` and arms the contention-resolution timer
    /// (extended by `ntn_koffset_slots` on NTN cells, spec §4.7).
    pub fn on_msg3_crc(&mut self, tc_rnti: Rnti, crc_ok: bool, harq: &mut CellHarqManager, now: SlotPoint, ntn_koffset_slots: u16) {
        let Some(h) = harq.handle_of(tc_rnti, MSG3_HARQ_ID) else {
            return;
        };
        harq.ack(h, if crc_ok { AckOutcome::Ack } else { AckOutcome::Nack }, 0);
        let Some(proc_) = self.procedures.get_mut(&tc_rnti) else {
            return;
        };
        if crc_ok {
            proc_.state = RaState::AwaitingConRes;
            proc_.conres_expiry = Some(now.add((self.conres_timer_slots + ntn_koffset_slots) as u32));
        } else if harq.handle_of(tc_rnti, MSG3_HARQ_ID).is_none() {
            // HARQ manager freed the process: retxs exhausted.
            proc_.state = RaState::Expired;
        } else {
            proc_.nof_msg3_retxs += 1;
            // still AwaitingMsg3: scheduler will call alloc_msg3 again.
        }
    }

    /// Feed a received ConRes CE / Msg4 SDU. Returns `true` once both a
    /// ConRes CE and an SRB0/SRB1 Msg4 SDU have arrived (the procedure is
    /// resolved and a Msg4 PDSCH may be scheduled).
    pub fn handle_conres_input(&mut self, tc_rnti: Rnti, con_res_ce: bool, srb0_msg4: bool, srb1_msg4: bool) -> bool {
        let Some(proc_) = self.procedures.get_mut(&tc_rnti) else {
            return false;
        };
        if proc_.state != RaState::AwaitingConRes {
            return false;
        }
        proc_.con_res_ce_received |= con_res_ce;
        proc_.msg4_sdu_received |= srb0_msg4 || srb1_msg4;
        if proc_.con_res_ce_received && proc_.msg4_sdu_received {
            proc_.state = RaState::Resolved;
            true
        } else {
            false
        }
    }

    /// Advance timers; returns TC-RNTIs whose procedure just expired
    /// (RAR window missed, or ConRes timer elapsed) so the caller can
    /// stop scheduling further Msg3/ConRes PDSCH/PUCCH for them.
    pub fn slot_indication(&mut self, now: SlotPoint) -> Vec<Rnti> {
        let mut expired = Vec::new();
        for (tc_rnti, proc_) in self.procedures.iter_mut() {
            match proc_.state {
                RaState::AwaitingMsg3 if proc_.msg3_slot.is_none() && now.distance(proc_.rar_window_end) > 0 => {
                    proc_.state = RaState::Expired;
                    expired.push(*tc_rnti);
                }
                RaState::AwaitingConRes => {
                    if let Some(expiry) = proc_.conres_expiry {
                        if now.distance(expiry) > 0 {
                            proc_.state = RaState::Expired;
                            expired.push(*tc_rnti);
                        }
                    }
                }
                RaState::Expired => expired.push(*tc_rnti),
                _ => {}
            }
        }
        for tc_rnti in &expired {
            self.procedures.remove(tc_rnti);
            self.free_tc_rntis.push(*tc_rnti);
        }
        expired
    }

    /// Drop a resolved procedure once the caller has scheduled its Msg4.
    pub fn finish_resolved(&mut self, tc_rnti: Rnti) {
        if let Some(proc_) = self.procedures.get(&tc_rnti) {
            if proc_.state == RaState::Resolved {
                self.procedures.remove(&tc_rnti);
                self.free_tc_rntis.push(tc_rnti);
            }
        }
    }

    pub fn procedure(&self, tc_rnti: Rnti) -> Option<&RaProcedure> {
        self.procedures.get(&tc_rnti)
    }
}

impl Default for RaManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harq::Direction;
    use crate::time::Scs;

    fn sp(slot: u32) -> SlotPoint {
        SlotPoint::new(Scs::Khz30, 0, slot)
    }

    #[test]
    fn test_s3_msg3_retx_keeps_harq_id_and_ndi() {
        let mut ra = RaManager::new();
        let mut harq = CellHarqManager::new(Direction::Ul, 20, 8);
        let assigned = ra.handle_rach_indication(&[(5, sp(0))]);
        let tc_rnti = assigned[0];

        assert!(ra.alloc_msg3(tc_rnti, &mut harq, sp(2), sp(4)));
        let handle_before = harq.handle_of(tc_rnti, 0).unwrap();
        let ndi_before = harq.ndi(handle_before);

        ra.on_msg3_crc(tc_rnti, false, &mut harq, sp(6), 0);
        assert!(ra.alloc_msg3(tc_rnti, &mut harq, sp(8), sp(10)));
        let handle_after = harq.handle_of(tc_rnti, 0).unwrap();
        assert_eq!(harq.ndi(handle_after), ndi_before); // retx: NDI unchanged
        assert!(sp(8).distance(sp(2)) <= 16);
    }

    #[test]
    fn test_msg3_exhausted_after_max_retxs_stops_granting() {
        let mut ra = RaManager::new();
        let mut harq = CellHarqManager::new(Direction::Ul, 20, 8);
        let tc_rnti = ra.handle_rach_indication(&[(1, sp(0))])[0];
        ra.alloc_msg3(tc_rnti, &mut harq, sp(2), sp(4));
        for _ in 0..=DEFAULT_MSG3_MAX_RETXS {
            ra.on_msg3_crc(tc_rnti, false, &mut harq, sp(6), 0);
            if ra.procedure(tc_rnti).map(|p| p.state) == Some(RaState::Expired) {
                break;
            }
            ra.alloc_msg3(tc_rnti, &mut harq, sp(8), sp(10));
        }
        assert_eq!(ra.procedure(tc_rnti).map(|p| p.state), Some(RaState::Expired));
        assert!(!ra.alloc_msg3(tc_rnti, &mut harq, sp(20), sp(22)));
    }

    #[test]
    fn test_contention_resolution_requires_both_ce_and_msg4_sdu() {
        let mut ra = RaManager::new();
        let mut harq = CellHarqManager::new(Direction::Ul, 20, 8);
        let tc_rnti = ra.handle_rach_indication(&[(1, sp(0))])[0];
        ra.alloc_msg3(tc_rnti, &mut harq, sp(2), sp(4));
        ra.on_msg3_crc(tc_rnti, true, &mut harq, sp(6), 0);
        assert!(!ra.handle_conres_input(tc_rnti, true, false, false));
        assert!(ra.handle_conres_input(tc_rnti, false, true, false));
    }

    #[test]
    fn test_si_update_applies_only_at_window_boundary() {
        let mut si = SiScheduler::new(vec![SiMessage { payload_size: 100, period_frames: 2 }], 2, 32);
        si.mark_update_pending();
        si.slot_indication(1); // not a boundary (window length = 64)
        assert!(si.update_in_flight());
        si.slot_indication(64);
        assert!(!si.update_in_flight());
    }

    #[test]
    fn test_paging_occasion_hits_each_ue_exactly_once_per_cycle() {
        let paging = PagingScheduler::new(4, 2);
        let ids = vec![0, 1, 2, 3];
        let hits: usize = (0..4).map(|sfn| paging.occasions_in_frame(&ids, sfn).len()).sum();
        assert_eq!(hits, ids.len());
    }
}
