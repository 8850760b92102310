//! PDCCH candidate allocation (spec §4.6), CCE aggregation per TS 38.213
//! §10.1.
//!
//! Candidate generation and the per-SCS max-candidates ceiling are
//! compile-time constants (spec §9 "Global state"); the allocator itself
//! only ever walks candidates and marks CCEs in the shared
//! [`ResourceGrid`], it owns no per-slot state of its own.

use crate::constants::MAX_PDCCH_CANDIDATES_PER_SLOT;
use crate::error::{ L2Error, Result };
use crate::grid::{ CoresetId, ResourceGrid, SymbolRange };
use crate::time::SlotPoint;

/// DCI formats the allocator can place (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DciFormat {
    Fallback0_0,
    NonFallback0_1,
    Fallback1_0,
    NonFallback1_1,
}

/// PDCCH aggregation level, in CCEs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationLevel {
    L1 = 1,
    L2 = 2,
    L4 = 4,
    L8 = 8,
    L16 = 16,
}

/// A search space within a CORESET: symbol placement plus the candidate
/// counts configured per aggregation level.
#[derive(Debug, Clone, Copy)]
pub struct SearchSpaceConfig {
    pub coreset: CoresetId,
    pub symbols: SymbolRange,
    pub candidates_l1: u8,
    pub candidates_l2: u8,
    pub candidates_l4: u8,
    pub candidates_l8: u8,
    pub candidates_l16: u8,
}

impl SearchSpaceConfig {
    fn nof_candidates(&self, level: AggregationLevel) -> u8 {
        match level {
            AggregationLevel::L1 => self.candidates_l1,
            AggregationLevel::L2 => self.candidates_l2,
            AggregationLevel::L4 => self.candidates_l4,
            AggregationLevel::L8 => self.candidates_l8,
            AggregationLevel::L16 => self.candidates_l16,
        }
    }
}

/// A successfully-allocated PDCCH transmission.
#[derive(Debug, Clone)]
pub struct PdcchAllocation {
    pub coreset: CoresetId,
    pub aggregation_level: AggregationLevel,
    pub first_cce: usize,
    pub dci_format: DciFormat,
}

/// CCE candidate generator, TS 38.213 §10.1's `Y_p` hashing function
/// specialised to a UE-specific or common search space.
///
/// `n_cce` is the CORESET size; `y` is the search-space hash seed (0 for
/// common search spaces, RNTI-derived for UE-specific ones).
fn candidate_start(n_cce: usize, level: AggregationLevel, candidate_idx: u8, y: u32, slot_idx: u32) -> usize {
    let l = level as usize;
    let nof_candidates_at_level = (n_cce / l).max(1);
    let y_p = y.wrapping_mul(39827).wrapping_add(slot_idx.wrapping_mul(983));
    let m = (y_p as usize + candidate_idx as usize) % nof_candidates_at_level;
    (l * m) % n_cce.max(1)
}

/// Allocates PDCCH candidates against the shared resource grid.
pub struct PdcchAllocator;

impl PdcchAllocator {
    /// Walk `ss`'s candidate list at `level` for `y` (the search-space
    /// hash seed) in slot `sl`; mark and return the first free candidate.
    /// Never evaluates more than `MAX_PDCCH_CANDIDATES_PER_SLOT`
    /// candidates across a single search space (spec §4.6).
    pub fn allocate(
        grid: &mut ResourceGrid,
        sl: SlotPoint,
        ss: &SearchSpaceConfig,
        level: AggregationLevel,
        dci_format: DciFormat,
        y: u32
    ) -> Result<PdcchAllocation> {
        let Some(n_cce) = grid.coreset_size(ss.coreset) else {
            return Err(L2Error::invariant(format!("unknown coreset {}", ss.coreset)));
        };
        let nof_candidates = ss.nof_candidates(level).min(MAX_PDCCH_CANDIDATES_PER_SLOT as u8);
        for candidate_idx in 0..nof_candidates {
            let first_cce = candidate_start(n_cce, level, candidate_idx, y, sl.slot_index());
            let cces: Vec<usize> = (first_cce..first_cce + level as usize).collect();
            if cces.iter().any(|&c| c >= n_cce) {
                continue;
            }
            if grid.cce_collides(sl, ss.coreset, &cces) {
                continue;
            }
            grid.cce_fill(sl, ss.coreset, &cces)?;
            return Ok(PdcchAllocation { coreset: ss.coreset, aggregation_level: level, first_cce, dci_format });
        }
        Err(L2Error::exhausted(format!("no free PDCCH candidate at L{} in coreset {}", level as usize, ss.coreset)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::Scs;
    use std::collections::HashMap;

    fn grid_with_coreset(nof_cces: usize) -> ResourceGrid {
        let mut coresets = HashMap::new();
        coresets.insert(0u8, nof_cces);
        ResourceGrid::new(20, HashMap::new(), coresets).unwrap()
    }

    fn ss() -> SearchSpaceConfig {
        SearchSpaceConfig {
            coreset: 0,
            symbols: SymbolRange::new(0, 2),
            candidates_l1: 0,
            candidates_l2: 0,
            candidates_l4: 4,
            candidates_l8: 0,
            candidates_l16: 0,
        }
    }

    #[test]
    fn test_allocation_marks_cces_within_coreset_bounds() {
        let mut g = grid_with_coreset(16);
        let sl = SlotPoint::new(Scs::Khz30, 0, 0);
        g.slot_indication(sl);
        let alloc = PdcchAllocator::allocate(&mut g, sl, &ss(), AggregationLevel::L4, DciFormat::Fallback1_0, 0).unwrap();
        assert!(alloc.first_cce + 4 <= 16);
        assert!(g.cce_collides(sl, 0, &(alloc.first_cce..alloc.first_cce + 4).collect::<Vec<_>>()));
    }

    #[test]
    fn test_exhausted_when_coreset_full() {
        let mut g = grid_with_coreset(8);
        let sl = SlotPoint::new(Scs::Khz30, 0, 0);
        g.slot_indication(sl);
        g.cce_fill(sl, 0, &(0..8).collect::<Vec<_>>()).unwrap();
        let result = PdcchAllocator::allocate(&mut g, sl, &ss(), AggregationLevel::L4, DciFormat::Fallback1_0, 0);
        assert!(result.is_err());
    }

    #[test]
    fn test_never_exceeds_per_scs_candidate_ceiling() {
        let mut ss = ss();
        ss.candidates_l1 = u8::MAX;
        assert!(ss.nof_candidates(AggregationLevel::L1).min(MAX_PDCCH_CANDIDATES_PER_SLOT as u8) as usize <= MAX_PDCCH_CANDIDATES_PER_SLOT);
    }
}
