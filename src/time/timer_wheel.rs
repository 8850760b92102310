//! A cooperative, slot-ticked timer wheel.
//!
//! One logical wheel exists per cell (spec §5); the HARQ manager and the
//! RLC timers (`t-Reassembly`, `t-StatusProhibit`, poll-retransmit) each
//! own a private instance sized to their own ring. Entries are addressed
//! by small integer handles drawn from an explicit free list (the
//! "arena + index" pattern from spec §9): the wheel never hands out a
//! pointer, so the backing `Vec` is free to reallocate.

/// Opaque handle into a [`TimerWheel`]. Cheap to copy, invalid once the
/// entry it names has fired or been cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(usize);

struct Entry<T> {
    bucket: usize,
    payload: Option<T>,
}

/// Fixed-size ring of timer buckets. `tick(ring_index)` drains and
/// returns every payload armed for that bucket.
pub struct TimerWheel<T> {
    buckets: Vec<Vec<usize>>,
    pool: Vec<Entry<T>>,
    free: Vec<usize>,
}

impl<T> TimerWheel<T> {
    /// Create a wheel with `size` buckets.
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "timer wheel size must be non-zero");
        Self {
            buckets: (0..size).map(|_| Vec::new()).collect(),
            pool: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Number of buckets in the ring.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Arm `payload` to fire when `tick` is next called with
    /// `ring_index`. Returns a handle that can be used to [`cancel`] the
    /// entry before it fires.
    ///
    /// [`cancel`]: TimerWheel::cancel
    pub fn arm(&mut self, ring_index: usize, payload: T) -> TimerHandle {
        let bucket = ring_index % self.buckets.len();
        let idx = if let Some(idx) = self.free.pop() {
            self.pool[idx] = Entry { bucket, payload: Some(payload) };
            idx
        } else {
            self.pool.push(Entry { bucket, payload: Some(payload) });
            self.pool.len() - 1
        };
        self.buckets[bucket].push(idx);
        TimerHandle(idx)
    }

    /// Cancel a previously armed entry. No-op if it already fired.
    pub fn cancel(&mut self, handle: TimerHandle) -> Option<T> {
        let entry = self.pool.get_mut(handle.0)?;
        let payload = entry.payload.take()?;
        let bucket = entry.bucket;
        if let Some(pos) = self.buckets[bucket].iter().position(|&i| i == handle.0) {
            self.buckets[bucket].swap_remove(pos);
        }
        self.free.push(handle.0);
        Some(payload)
    }

    /// Drain every entry armed for `ring_index`, freeing their slots.
    pub fn tick(&mut self, ring_index: usize) -> Vec<T> {
        let bucket = ring_index % self.buckets.len();
        let indices = std::mem::take(&mut self.buckets[bucket]);
        let mut fired = Vec::with_capacity(indices.len());
        for idx in indices {
            if let Some(payload) = self.pool[idx].payload.take() {
                fired.push(payload);
            }
            self.free.push(idx);
        }
        fired
    }

    /// Number of live (armed, not yet fired/cancelled) entries.
    pub fn live_count(&self) -> usize {
        self.pool.len() - self.free.len()
    }
}
