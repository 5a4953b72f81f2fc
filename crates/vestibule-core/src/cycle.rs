//! Cycle scheduling: frame sampling, single-flight gating and stale-result
//! rejection.
//!
//! At most one extraction/match cycle is in flight. A cycle that would start
//! while another is pending is skipped, not queued. Every cycle carries the
//! epoch it started in; stopping the session advances the epoch so a result
//! that lands afterwards is recognised as stale and dropped.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Selects every Nth frame, starting with the first.
#[derive(Debug, Clone)]
pub struct FrameSampler {
    every_n: u64,
    seen: u64,
}

impl FrameSampler {
    /// `every_n` of 0 is treated as 1.
    pub fn new(every_n: u64) -> Self {
        Self {
            every_n: every_n.max(1),
            seen: 0,
        }
    }

    /// Record one captured frame; true if it should be processed.
    pub fn observe(&mut self) -> bool {
        let selected = self.seen % self.every_n == 0;
        self.seen = self.seen.wrapping_add(1);
        selected
    }

    pub fn frames_seen(&self) -> u64 {
        self.seen
    }

    pub fn reset(&mut self) {
        self.seen = 0;
    }
}

/// Proof that a cycle was admitted, tagged with its epoch.
#[derive(Debug, PartialEq, Eq)]
pub struct CycleTicket {
    epoch: u64,
}

impl CycleTicket {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

/// Busy flag plus epoch counter.
#[derive(Debug, Default)]
pub struct CycleGate {
    busy: AtomicBool,
    epoch: AtomicU64,
}

impl CycleGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a cycle, or `None` if one is already in flight.
    pub fn try_begin(&self) -> Option<CycleTicket> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(CycleTicket {
            epoch: self.epoch.load(Ordering::Acquire),
        })
    }

    /// Release the busy flag. Consumes the ticket so it cannot be reused.
    pub fn finish(&self, ticket: CycleTicket) -> CompletedCycle {
        self.busy.store(false, Ordering::Release);
        CompletedCycle {
            epoch: ticket.epoch,
            current: ticket.epoch == self.epoch.load(Ordering::Acquire),
        }
    }

    pub fn is_current(&self, ticket: &CycleTicket) -> bool {
        ticket.epoch == self.epoch.load(Ordering::Acquire)
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Invalidate every ticket issued so far. Returns the new epoch.
    pub fn advance_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// Outcome of [`CycleGate::finish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletedCycle {
    pub epoch: u64,
    /// False when the epoch advanced while the cycle was in flight.
    pub current: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sampler_every_fifth_frame() {
        let mut s = FrameSampler::new(5);
        let picked: Vec<u64> = (0..12).filter(|_| s.observe()).collect();
        assert_eq!(picked, [0, 5, 10]);
        assert_eq!(s.frames_seen(), 12);
    }

    #[test]
    fn test_sampler_zero_means_every_frame() {
        let mut s = FrameSampler::new(0);
        assert!((0..4).all(|_| s.observe()));
    }

    #[test]
    fn test_sampler_reset_restarts_phase() {
        let mut s = FrameSampler::new(3);
        s.observe();
        s.observe();
        s.reset();
        assert!(s.observe());
    }

    #[test]
    fn test_gate_skips_while_busy() {
        let gate = CycleGate::new();
        let ticket = gate.try_begin().unwrap();
        assert!(gate.is_busy());
        assert!(gate.try_begin().is_none());
        let done = gate.finish(ticket);
        assert!(done.current);
        assert!(!gate.is_busy());
        assert!(gate.try_begin().is_some());
    }

    #[test]
    fn test_advance_epoch_makes_inflight_stale() {
        let gate = CycleGate::new();
        let ticket = gate.try_begin().unwrap();
        assert!(gate.is_current(&ticket));
        assert_eq!(gate.advance_epoch(), 1);
        assert!(!gate.is_current(&ticket));
        let done = gate.finish(ticket);
        assert!(!done.current);
        assert_eq!(done.epoch, 0);

        let next = gate.try_begin().unwrap();
        assert_eq!(next.epoch(), 1);
        assert!(gate.finish(next).current);
    }

    #[test]
    fn test_single_flight_across_threads() {
        use std::sync::Arc;
        let gate = Arc::new(CycleGate::new());
        let admitted: usize = (0..8)
            .map(|_| {
                let gate = gate.clone();
                std::thread::spawn(move || gate.try_begin().is_some())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(admitted, 1);
    }
}
