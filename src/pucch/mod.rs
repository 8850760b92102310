//! PUCCH resource allocation (spec §4.6): per-UE private resource lists
//! carved out of a cell pool at bring-up, collision avoidance on
//! `(PRB, symbols, cyclic_shift, OCC)`, format-1 -> format-2 mixing.

use std::collections::HashMap;

use crate::error::{ L2Error, Result };
use crate::time::SlotPoint;

pub type Rnti = u32;

/// PUCCH format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PucchFormat {
    /// Format 0/1: up to 2 HARQ-ACK bits, or SR alone.
    Format1,
    /// Format 2/3/4: HARQ-ACK plus possibly SR/CSI multiplexed.
    Format2,
}

/// What a PUCCH resource is currently carrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UciPayload {
    HarqAck { nof_bits: u8 },
    Sr,
    Csi,
    HarqAckAndSr { nof_bits: u8 },
}

/// Static description of one resource in a UE's private list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PucchResourceConfig {
    pub format: PucchFormat,
    pub prb: u16,
    pub symbols_start: u8,
    pub symbols_len: u8,
    pub cyclic_shift: u8,
    pub occ_index: u8,
}

impl PucchResourceConfig {
    fn collision_key(&self) -> (u16, u8, u8, u8, u8) {
        (self.prb, self.symbols_start, self.symbols_len, self.cyclic_shift, self.occ_index)
    }
}

/// An allocated PUCCH transmission for one UE in one slot.
#[derive(Debug, Clone)]
pub struct PucchAllocation {
    pub rnti: Rnti,
    pub resource: PucchResourceConfig,
    pub payload: UciPayload,
}

#[derive(Default, Clone)]
struct SlotBookings {
    used: Vec<(u16, u8, u8, u8, u8)>,
    /// rnti -> index into `allocations` with a Format1 HARQ-ACK resource,
    /// so a later SR/CSI in the same slot can be mixed/upgraded.
    harq_by_rnti: HashMap<Rnti, usize>,
    allocations: Vec<PucchAllocation>,
}

/// Per-cell PUCCH allocator: a private resource list per UE, carved out
/// of the cell pool at bring-up (spec §4.6), plus per-slot bookings.
pub struct PucchAllocator {
    ue_resources: HashMap<Rnti, Vec<PucchResourceConfig>>,
    slots: HashMap<u32, SlotBookings>,
}

impl PucchAllocator {
    pub fn new() -> Self {
        Self { ue_resources: HashMap::new(), slots: HashMap::new() }
    }

    /// Register `ue`'s private resource list, built by the cell's
    /// resource-builder partitioning at bring-up.
    pub fn add_ue(&mut self, ue: Rnti, resources: Vec<PucchResourceConfig>) {
        self.ue_resources.insert(ue, resources);
    }

    pub fn remove_ue(&mut self, ue: Rnti) {
        self.ue_resources.remove(&ue);
    }

    fn bookings_mut(&mut self, sl: SlotPoint) -> &mut SlotBookings {
        self.slots.entry(sl.count()).or_default()
    }

    /// Discard bookings for slots the scheduler will never revisit. Call
    /// once per slot_indication with the oldest slot still in scope.
    pub fn forget_slot(&mut self, sl: SlotPoint) {
        self.slots.remove(&sl.count());
    }

    fn try_book(bookings: &mut SlotBookings, ue: Rnti, res: PucchResourceConfig, payload: UciPayload) -> Result<usize> {
        let key = res.collision_key();
        if bookings.used.contains(&key) {
            return Err(L2Error::exhausted("PUCCH collision on (PRB, symbols, cyclic_shift, OCC)"));
        }
        bookings.used.push(key);
        bookings.allocations.push(PucchAllocation { rnti: ue, resource: res, payload });
        Ok(bookings.allocations.len() - 1)
    }

    /// Request a HARQ-ACK resource for `ue` in slot `sl`. If the UE
    /// already has a PUCCH booked in this slot (SR/CSI), the HARQ bits
    /// are mixed into it (upgrading format-1 to format-2 if needed)
    /// rather than opening a second resource.
    pub fn alloc_harq_ack(&mut self, ue: Rnti, sl: SlotPoint, nof_bits: u8) -> Result<PucchAllocation> {
        let Some(resources) = self.ue_resources.get(&ue) else {
            return Err(L2Error::invariant(format!("no PUCCH resources registered for rnti {ue}")));
        };
        let resources = resources.clone();
        let bookings = self.bookings_mut(sl);

        if let Some(&idx) = bookings.harq_by_rnti.get(&ue) {
            let existing = bookings.allocations[idx].clone();
            let upgraded_payload = match existing.payload {
                UciPayload::Sr => UciPayload::HarqAckAndSr { nof_bits },
                other => other,
            };
            bookings.allocations[idx].payload = upgraded_payload;
            return Ok(bookings.allocations[idx].clone());
        }

        let format = if nof_bits <= 2 { PucchFormat::Format1 } else { PucchFormat::Format2 };
        let res = resources
            .iter()
            .find(|r| r.format == format)
            .or_else(|| resources.iter().find(|r| r.format == PucchFormat::Format2))
            .copied()
            .ok_or_else(|| L2Error::exhausted("no PUCCH resource of a usable format for this UE"))?;

        let idx = Self::try_book(bookings, ue, res, UciPayload::HarqAck { nof_bits })?;
        bookings.harq_by_rnti.insert(ue, idx);
        Ok(bookings.allocations[idx].clone())
    }

    /// Book (or mix into an existing HARQ-ACK resource) a scheduling
    /// request for `ue` in slot `sl`.
    pub fn alloc_sr(&mut self, ue: Rnti, sl: SlotPoint) -> Result<PucchAllocation> {
        let Some(resources) = self.ue_resources.get(&ue) else {
            return Err(L2Error::invariant(format!("no PUCCH resources registered for rnti {ue}")));
        };
        let resources = resources.clone();
        let bookings = self.bookings_mut(sl);

        if let Some(&idx) = bookings.harq_by_rnti.get(&ue) {
            if let UciPayload::HarqAck { nof_bits } = bookings.allocations[idx].payload {
                bookings.allocations[idx].payload = UciPayload::HarqAckAndSr { nof_bits };
                return Ok(bookings.allocations[idx].clone());
            }
        }

        let res = resources
            .iter()
            .find(|r| r.format == PucchFormat::Format1)
            .copied()
            .ok_or_else(|| L2Error::exhausted("no format-1 PUCCH resource for SR"))?;
        let idx = Self::try_book(bookings, ue, res, UciPayload::Sr)?;
        bookings.harq_by_rnti.insert(ue, idx);
        Ok(bookings.allocations[idx].clone())
    }

    /// All PUCCH allocations booked for `sl` so far.
    pub fn allocations_for(&self, sl: SlotPoint) -> Vec<PucchAllocation> {
        self.slots.get(&sl.count()).map(|b| b.allocations.clone()).unwrap_or_default()
    }
}

impl Default for PucchAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::Scs;

    fn res(prb: u16, format: PucchFormat) -> PucchResourceConfig {
        PucchResourceConfig { format, prb, symbols_start: 0, symbols_len: 1, cyclic_shift: 0, occ_index: 0 }
    }

    #[test]
    fn test_harq_ack_and_sr_mix_into_one_resource() {
        let mut alloc = PucchAllocator::new();
        alloc.add_ue(1, vec![res(0, PucchFormat::Format1), res(1, PucchFormat::Format2)]);
        let sl = SlotPoint::new(Scs::Khz30, 0, 0);
        alloc.alloc_sr(1, sl).unwrap();
        let a = alloc.alloc_harq_ack(1, sl, 1).unwrap();
        assert!(matches!(a.payload, UciPayload::HarqAckAndSr { nof_bits: 1 }));
        assert_eq!(alloc.allocations_for(sl).len(), 1);
    }

    #[test]
    fn test_no_two_pucchs_share_collision_key() {
        let mut alloc = PucchAllocator::new();
        alloc.add_ue(1, vec![res(0, PucchFormat::Format1)]);
        alloc.add_ue(2, vec![res(0, PucchFormat::Format1)]);
        let sl = SlotPoint::new(Scs::Khz30, 0, 0);
        alloc.alloc_harq_ack(1, sl, 1).unwrap();
        assert!(alloc.alloc_harq_ack(2, sl, 1).is_err());
    }

    #[test]
    fn test_more_than_two_bits_upgrades_to_format2() {
        let mut alloc = PucchAllocator::new();
        alloc.add_ue(1, vec![res(0, PucchFormat::Format1), res(1, PucchFormat::Format2)]);
        let sl = SlotPoint::new(Scs::Khz30, 0, 0);
        let a = alloc.alloc_harq_ack(1, sl, 4).unwrap();
        assert_eq!(a.resource.format, PucchFormat::Format2);
    }
}
