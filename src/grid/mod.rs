//! Slot-indexed circular resource grid.
//!
//! For each of the next `K` slots the grid keeps a 2-D (symbol x PRB)
//! occupancy bitmap per BWP and a used-CCE bitset per CORESET (spec §3,
//! §4.1). `K` is sized with [`crate::constants::get_allocator_ring_size_gt_min`]
//! so that it evenly divides the slot modulus, avoiding index aliasing
//! near the 10240-slot hyperframe boundary. `fill` and `collides` are
//! `O(PRB_count)`; `slot_indication` wipes exactly the slot rotating into
//! view, never touching the other `K - 1` entries.
//!
//! The bitmap storage is grounded on the teacher's cache-aligned,
//! fixed-size `RingBuffer` slot array (`disruptor::ring_buffer`):
//! pre-allocated `Vec` of per-slot state addressed by `sl.ring_index(K)`,
//! no per-slot allocation on the hot path.

use std::collections::HashMap;

use crate::error::{ L2Error, Result };
use crate::time::SlotPoint;

/// Identifies a bandwidth part within a cell.
pub type BwpId = u8;
/// Identifies a CORESET within a cell.
pub type CoresetId = u8;

#[derive(Debug, Clone)]
struct BwpOccupancy {
    nof_prb: usize,
    nof_symbols: usize,
    /// Row-major `[symbol * nof_prb + prb]` occupancy bitmap.
    occ: Vec<bool>,
}

impl BwpOccupancy {
    fn new(nof_prb: usize, nof_symbols: usize) -> Self {
        Self { nof_prb, nof_symbols, occ: vec![false; nof_prb * nof_symbols] }
    }

    fn clear(&mut self) {
        self.occ.iter_mut().for_each(|b| *b = false);
    }

    fn index(&self, symbol: usize, prb: usize) -> usize {
        symbol * self.nof_prb + prb
    }
}

#[derive(Debug, Clone)]
struct CoresetOccupancy {
    cces: Vec<bool>,
}

impl CoresetOccupancy {
    fn new(nof_cces: usize) -> Self {
        Self { cces: vec![false; nof_cces] }
    }

    fn clear(&mut self) {
        self.cces.iter_mut().for_each(|b| *b = false);
    }
}

#[derive(Debug, Clone, Default)]
struct SlotState {
    bwps: HashMap<BwpId, BwpOccupancy>,
    coresets: HashMap<CoresetId, CoresetOccupancy>,
}

/// A contiguous symbol range within a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolRange {
    pub start: usize,
    pub len: usize,
}

impl SymbolRange {
    pub fn new(start: usize, len: usize) -> Self {
        Self { start, len }
    }

    fn iter(self) -> impl Iterator<Item = usize> {
        self.start..self.start + self.len
    }
}

/// A contiguous PRB range within a BWP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrbRange {
    pub start: usize,
    pub len: usize,
}

impl PrbRange {
    pub fn new(start: usize, len: usize) -> Self {
        Self { start, len }
    }

    fn iter(self) -> impl Iterator<Item = usize> {
        self.start..self.start + self.len
    }
}

/// The slot-indexed resource allocator (spec §4.1).
pub struct ResourceGrid {
    ring_size: usize,
    slots: Vec<SlotState>,
    bwp_shapes: HashMap<BwpId, (usize, usize)>, // (nof_prb, nof_symbols)
    coreset_shapes: HashMap<CoresetId, usize>, // nof_cces
    latest: Option<SlotPoint>,
}

impl ResourceGrid {
    /// Construct a grid with `ring_size` slots, each BWP in
    /// `bwp_shapes` (`bwp_id -> (nof_prb, nof_symbols)`) and each
    /// CORESET in `coreset_shapes` (`coreset_id -> nof_cces`)
    /// pre-allocated.
    pub fn new(
        ring_size: usize,
        bwp_shapes: HashMap<BwpId, (usize, usize)>,
        coreset_shapes: HashMap<CoresetId, usize>
    ) -> Result<Self> {
        if ring_size == 0 {
            return Err(L2Error::config("resource grid ring size must be non-zero"));
        }
        let template = |_| {
            let mut s = SlotState::default();
            for (&id, &(nof_prb, nof_symbols)) in &bwp_shapes {
                s.bwps.insert(id, BwpOccupancy::new(nof_prb, nof_symbols));
            }
            for (&id, &nof_cces) in &coreset_shapes {
                s.coresets.insert(id, CoresetOccupancy::new(nof_cces));
            }
            s
        };
        let slots = (0..ring_size).map(template).collect();
        Ok(Self { ring_size, slots, bwp_shapes, coreset_shapes, latest: None })
    }

    /// Ring size (`K`).
    pub fn ring_size(&self) -> usize {
        self.ring_size
    }

    /// Advance the grid to `sl`, wiping the slot rotating into view.
    pub fn slot_indication(&mut self, sl: SlotPoint) {
        let idx = sl.ring_index(self.ring_size);
        let state = &mut self.slots[idx];
        for bwp in state.bwps.values_mut() {
            bwp.clear();
        }
        for cs in state.coresets.values_mut() {
            cs.clear();
        }
        self.latest = Some(sl);
    }

    fn slot_state(&self, sl: SlotPoint) -> &SlotState {
        &self.slots[sl.ring_index(self.ring_size)]
    }

    fn slot_state_mut(&mut self, sl: SlotPoint) -> &mut SlotState {
        let idx = sl.ring_index(self.ring_size);
        &mut self.slots[idx]
    }

    /// Whether any PRB in `prbs` at any symbol in `symbols` of `bwp` in
    /// slot `sl` is already occupied. `O(PRB_count)`.
    pub fn collides(&self, sl: SlotPoint, bwp: BwpId, symbols: SymbolRange, prbs: PrbRange) -> bool {
        let Some(occ) = self.slot_state(sl).bwps.get(&bwp) else {
            return true; // unknown BWP: treat conservatively as occupied
        };
        for s in symbols.iter() {
            for p in prbs.iter() {
                if p >= occ.nof_prb || s >= occ.nof_symbols {
                    return true;
                }
                if occ.occ[occ.index(s, p)] {
                    return true;
                }
            }
        }
        false
    }

    /// Mark `prbs` across `symbols` of `bwp` in slot `sl` as used.
    /// Returns an error if any of those resources are already occupied
    /// (caller should always `collides` first on the hot path and treat
    /// this as a should-not-happen invariant guard).
    pub fn fill(&mut self, sl: SlotPoint, bwp: BwpId, symbols: SymbolRange, prbs: PrbRange) -> Result<()> {
        if self.collides(sl, bwp, symbols, prbs) {
            return Err(L2Error::invariant(format!("grid fill collision on bwp {bwp} at slot {sl}")));
        }
        let occ = self.slot_state_mut(sl).bwps.get_mut(&bwp).expect("checked by collides");
        for s in symbols.iter() {
            for p in prbs.iter() {
                let idx = occ.index(s, p);
                occ.occ[idx] = true;
            }
        }
        Ok(())
    }

    /// Whether every PRB in `prbs` across `symbols` of `bwp` in slot
    /// `sl` is occupied.
    pub fn all_set(&self, sl: SlotPoint, bwp: BwpId, symbols: SymbolRange, prbs: PrbRange) -> bool {
        let Some(occ) = self.slot_state(sl).bwps.get(&bwp) else {
            return false;
        };
        symbols
            .iter()
            .all(|s| prbs.iter().all(|p| p < occ.nof_prb && s < occ.nof_symbols && occ.occ[occ.index(s, p)]))
    }

    /// The set of used common-resource-block indices of `bwp` at slot
    /// `sl`, restricted to `symbols`, as a bitmap read-back.
    pub fn used_crbs(&self, sl: SlotPoint, bwp: BwpId, symbols: SymbolRange) -> Vec<bool> {
        let Some(occ) = self.slot_state(sl).bwps.get(&bwp) else {
            return Vec::new();
        };
        let mut used = vec![false; occ.nof_prb];
        for s in symbols.iter() {
            if s >= occ.nof_symbols {
                continue;
            }
            for p in 0..occ.nof_prb {
                if occ.occ[occ.index(s, p)] {
                    used[p] = true;
                }
            }
        }
        used
    }

    /// Whether `cces` are free within `coreset` at slot `sl`.
    pub fn cce_collides(&self, sl: SlotPoint, coreset: CoresetId, cces: &[usize]) -> bool {
        let Some(cs) = self.slot_state(sl).coresets.get(&coreset) else {
            return true;
        };
        cces.iter().any(|&c| c >= cs.cces.len() || cs.cces[c])
    }

    /// Mark `cces` as used within `coreset` at slot `sl`.
    pub fn cce_fill(&mut self, sl: SlotPoint, coreset: CoresetId, cces: &[usize]) -> Result<()> {
        if self.cce_collides(sl, coreset, cces) {
            return Err(L2Error::invariant(format!("CCE collision on coreset {coreset} at slot {sl}")));
        }
        let cs = self.slot_state_mut(sl).coresets.get_mut(&coreset).expect("checked by cce_collides");
        for &c in cces {
            cs.cces[c] = true;
        }
        Ok(())
    }

    /// Number of CCEs configured for `coreset`, if registered.
    pub fn coreset_size(&self, coreset: CoresetId) -> Option<usize> {
        self.coreset_shapes.get(&coreset).copied()
    }

    /// Number of PRBs configured for `bwp`, if registered.
    pub fn bwp_nof_prb(&self, bwp: BwpId) -> Option<usize> {
        self.bwp_shapes.get(&bwp).map(|(prb, _)| *prb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::Scs;

    fn grid() -> ResourceGrid {
        let mut bwps = HashMap::new();
        bwps.insert(0u8, (52usize, 14usize));
        let mut coresets = HashMap::new();
        coresets.insert(0u8, 48usize);
        ResourceGrid::new(20, bwps, coresets).unwrap()
    }

    #[test]
    fn test_fill_then_collides_is_detected() {
        let mut g = grid();
        let sl = SlotPoint::new(Scs::Khz30, 0, 0);
        g.slot_indication(sl);
        assert!(!g.collides(sl, 0, SymbolRange::new(0, 2), PrbRange::new(0, 10)));
        g.fill(sl, 0, SymbolRange::new(0, 2), PrbRange::new(0, 10)).unwrap();
        assert!(g.collides(sl, 0, SymbolRange::new(1, 1), PrbRange::new(5, 1)));
        assert!(!g.collides(sl, 0, SymbolRange::new(0, 2), PrbRange::new(10, 5)));
    }

    #[test]
    fn test_fill_rejects_overlap() {
        let mut g = grid();
        let sl = SlotPoint::new(Scs::Khz30, 0, 1);
        g.slot_indication(sl);
        g.fill(sl, 0, SymbolRange::new(0, 14), PrbRange::new(0, 52)).unwrap();
        assert!(g.fill(sl, 0, SymbolRange::new(0, 1), PrbRange::new(0, 1)).is_err());
    }

    #[test]
    fn test_slot_indication_only_wipes_its_own_slot() {
        let mut g = grid();
        let sl0 = SlotPoint::new(Scs::Khz30, 0, 0);
        let ring = g.ring_size();
        let sl_next_lap = sl0.add(ring as u32);
        g.slot_indication(sl0);
        g.fill(sl0, 0, SymbolRange::new(0, 1), PrbRange::new(0, 1)).unwrap();
        // a different ring slot is untouched
        let sl1 = sl0.add(1);
        g.slot_indication(sl1);
        assert!(!g.collides(sl1, 0, SymbolRange::new(0, 1), PrbRange::new(0, 1)));
        // once the ring wraps back to sl0's index, slot_indication wipes it
        g.slot_indication(sl_next_lap);
        assert!(!g.collides(sl_next_lap, 0, SymbolRange::new(0, 1), PrbRange::new(0, 1)));
    }

    #[test]
    fn test_cce_allocation_respects_coreset_bounds() {
        let mut g = grid();
        let sl = SlotPoint::new(Scs::Khz30, 0, 0);
        g.slot_indication(sl);
        assert!(g.cce_fill(sl, 0, &[0, 1]).is_ok());
        assert!(g.cce_collides(sl, 0, &[1, 2]));
        assert!(g.cce_fill(sl, 0, &[2, 3]).is_ok());
    }
}
