//! Slot clock and cooperative timer wheel.
//!
//! `SlotPoint` is the MAC's monotonic clock: an `(SFN, slot)` pair modulo
//! `1024 * slots_per_frame`, compared circularly per spec §3. The timer
//! wheel ticks once per slot and is shared (in spirit — each owner gets
//! its own instance) by the HARQ manager and the RLC reassembly /
//! status-prohibit / poll-retransmit timers.

mod timer_wheel;

pub use timer_wheel::{ TimerHandle, TimerWheel };

use crate::error::{ L2Error, Result };

/// Subcarrier spacing, which determines slots-per-subframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Scs {
    /// 15 kHz: 1 slot per subframe, 10 slots per frame.
    Khz15,
    /// 30 kHz: 2 slots per subframe, 20 slots per frame.
    Khz30,
    /// 60 kHz: 4 slots per subframe, 40 slots per frame.
    Khz60,
    /// 120 kHz: 8 slots per subframe, 80 slots per frame.
    Khz120,
}

impl Scs {
    /// Slots per 10 ms radio frame for this numerology.
    pub fn slots_per_frame(self) -> u32 {
        match self {
            Scs::Khz15 => 10,
            Scs::Khz30 => 20,
            Scs::Khz60 => 40,
            Scs::Khz120 => 80,
        }
    }
}

/// A monotonic, wrap-aware slot clock value: `(SFN, slot)`.
///
/// Invariant (spec §3): any two `SlotPoint`s compared or subtracted must
/// share the same `Scs` — comparing across numerologies is a logic error
/// caught with a debug assertion rather than silently producing a wrong
/// answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SlotPoint {
    scs: Scs,
    sfn: u32,
    slot: u32,
}

impl SlotPoint {
    /// Build a new slot point, wrapping `sfn`/`slot` into their valid
    /// ranges up front.
    pub fn new(scs: Scs, sfn: u32, slot: u32) -> Self {
        let spf = scs.slots_per_frame();
        let total = (sfn % crate::constants::NOF_SFNS) * spf + (slot % spf);
        Self::from_total(scs, total)
    }

    fn from_total(scs: Scs, total: u32) -> Self {
        let spf = scs.slots_per_frame();
        let modulus = crate::constants::NOF_SFNS * spf;
        let total = total % modulus;
        Self { scs, sfn: total / spf, slot: total % spf }
    }

    /// The configured numerology.
    pub fn scs(self) -> Scs {
        self.scs
    }

    /// System frame number, in `[0, 1024)`.
    pub fn sfn(self) -> u32 {
        self.sfn
    }

    /// Slot index within the frame, in `[0, slots_per_frame)`.
    pub fn slot_index(self) -> u32 {
        self.slot
    }

    /// Total slot modulus for this numerology (`1024 * slots_per_frame`).
    pub fn modulus(self) -> u32 {
        crate::constants::NOF_SFNS * self.scs.slots_per_frame()
    }

    /// This slot's position on the `[0, modulus)` circular counter.
    pub fn count(self) -> u32 {
        self.sfn * self.scs.slots_per_frame() + self.slot
    }

    fn assert_same_scs(self, other: SlotPoint) {
        debug_assert_eq!(
            self.scs.slots_per_frame(),
            other.scs.slots_per_frame(),
            "SlotPoint comparison across mismatched numerologies"
        );
    }

    /// Advance by `n` slots, wrapping at the modulus.
    pub fn add(self, n: u32) -> Self {
        Self::from_total(self.scs, self.count() + n)
    }

    /// Step back by `n` slots, wrapping at the modulus.
    pub fn sub(self, n: u32) -> Self {
        let modulus = self.modulus();
        let n = n % modulus;
        Self::from_total(self.scs, self.count() + modulus - n)
    }

    /// Circular difference `self - other`, in `[0, modulus)`, using a
    /// half-modulus window so that points "behind" `other` come back
    /// negative via [`SlotPoint::is_before`] rather than aliasing as huge
    /// forward distances.
    pub fn distance(self, other: SlotPoint) -> i64 {
        self.assert_same_scs(other);
        let modulus = self.modulus() as i64;
        let raw = self.count() as i64 - other.count() as i64;
        let half = modulus / 2;
        if raw > half {
            raw - modulus
        } else if raw < -half {
            raw + modulus
        } else {
            raw
        }
    }

    /// Whether `self` occurs strictly before `other` on the circular
    /// timeline (using the half-modulus window).
    pub fn is_before(self, other: SlotPoint) -> bool {
        self.distance(other) < 0
    }

    /// Index of this slot into a ring of size `k` (`k` must divide the
    /// slot modulus per spec §3).
    pub fn ring_index(self, k: usize) -> usize {
        (self.count() as usize) % k
    }
}

impl std::ops::Add<u32> for SlotPoint {
    type Output = SlotPoint;
    fn add(self, rhs: u32) -> SlotPoint {
        SlotPoint::add(self, rhs)
    }
}

impl std::ops::Sub<u32> for SlotPoint {
    type Output = SlotPoint;
    fn sub(self, rhs: u32) -> SlotPoint {
        SlotPoint::sub(self, rhs)
    }
}

impl std::fmt::Display for SlotPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.sfn, self.slot)
    }
}

/// Validate that a ring size evenly divides the slot modulus for `scs`,
/// as required by spec §3 before sizing a resource grid or timer wheel.
pub fn validate_ring_size(scs: Scs, k: usize) -> Result<()> {
    let modulus = (crate::constants::NOF_SFNS * scs.slots_per_frame()) as usize;
    if k == 0 || modulus % k != 0 {
        return Err(
            L2Error::config(format!("ring size {k} does not evenly divide slot modulus {modulus}"))
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_at_hyperframe_boundary() {
        let sp = SlotPoint::new(Scs::Khz30, 1023, 19);
        let next = sp.add(1);
        assert_eq!(next.sfn(), 0);
        assert_eq!(next.slot_index(), 0);
    }

    #[test]
    fn test_circular_distance_window() {
        let a = SlotPoint::new(Scs::Khz30, 0, 0);
        let b = a.add(5);
        assert_eq!(b.distance(a), 5);
        assert_eq!(a.distance(b), -5);
    }

    #[test]
    fn test_distance_wraps_through_zero() {
        let scs = Scs::Khz30;
        let modulus = (crate::constants::NOF_SFNS * scs.slots_per_frame()) as i64;
        let near_end = SlotPoint::new(scs, 1023, 18);
        let wrapped = near_end.add(5); // crosses the SFN=1023 -> 0 boundary
        assert_eq!(near_end.distance(wrapped), -5 + modulus * 0); // wrapped is "after"
        assert!(near_end.is_before(wrapped));
    }

    #[test]
    fn test_ring_index_matches_modulo() {
        let sp = SlotPoint::new(Scs::Khz30, 3, 7);
        let k = 20; // divides 20*1024
        assert_eq!(sp.ring_index(k), (sp.count() as usize) % k);
    }

    #[test]
    fn test_validate_ring_size_rejects_non_divisor() {
        assert!(validate_ring_size(Scs::Khz30, 13).is_err());
        assert!(validate_ring_size(Scs::Khz30, 16).is_ok());
    }
}
