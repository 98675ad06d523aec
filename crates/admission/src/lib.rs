//! This crate implements the admission control used by the inbound
//! SMTP listener: a ceiling on concurrent connections combined with a
//! token bucket that bounds the incoming connection rate.
//! The state is an explicit instance owned by the server and shared
//! with each connection worker; there is no process-wide singleton.
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// Gates new connections on both a concurrency ceiling and a token
/// bucket whose capacity and refill rate are the same configured
/// connections-per-second value.
///
/// `acquire` never blocks; a `false` return is silent backpressure and
/// the caller is expected to drop the socket at the transport layer.
pub struct ConnectionGate {
    max_connections: usize,
    /// tokens per second, and also the bucket capacity
    rate: f64,
    state: Mutex<GateState>,
}

struct GateState {
    current: usize,
    tokens: f64,
    last_refill: Instant,
}

impl ConnectionGate {
    pub fn new(max_connections: usize, rate_per_second: u32) -> Self {
        let rate = rate_per_second as f64;
        Self {
            max_connections,
            rate,
            state: Mutex::new(GateState {
                current: 0,
                // A freshly started gate has a full bucket
                tokens: rate,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Attempt to reserve a connection slot. Consuming a token and
    /// incrementing the in-flight count happen atomically under the
    /// same lock; the lock is never held across IO.
    pub fn acquire(&self) -> bool {
        self.acquire_at(Instant::now())
    }

    fn acquire_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock();

        // Lazy refill, capped at the bucket capacity so that idle
        // periods never bank an unbounded backlog of admissions.
        let elapsed = now
            .saturating_duration_since(state.last_refill)
            .as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.rate);
        state.last_refill = now;

        if state.current >= self.max_connections {
            return false;
        }
        if state.tokens < 1.0 {
            return false;
        }

        state.tokens -= 1.0;
        state.current += 1;
        true
    }

    /// Like [`Self::acquire`], but the slot is held by the returned
    /// guard and returned on drop, so a worker task that panics or is
    /// cancelled cannot leak it.
    pub fn acquire_slot(self: &Arc<Self>) -> Option<ConnectionSlot> {
        if self.acquire() {
            Some(ConnectionSlot {
                gate: Arc::clone(self),
            })
        } else {
            None
        }
    }

    /// Return a previously acquired slot.
    pub fn release(&self) {
        let mut state = self.state.lock();
        state.current = state.current.saturating_sub(1);
    }

    /// The number of connections currently in flight.
    pub fn current(&self) -> usize {
        self.state.lock().current
    }
}

/// An acquired connection slot. Dropping it returns the slot to the
/// gate.
pub struct ConnectionSlot {
    gate: Arc<ConnectionGate>,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.gate.release();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use k9::assert_equal;
    use std::time::Duration;

    #[test]
    fn token_bucket_rate() {
        let gate = ConnectionGate::new(100, 2);
        let start = Instant::now();

        assert!(gate.acquire_at(start));
        assert!(gate.acquire_at(start));
        // Bucket is empty now
        assert!(!gate.acquire_at(start));

        // A second later the bucket has refilled
        assert!(gate.acquire_at(start + Duration::from_secs(1)));
    }

    #[test]
    fn tokens_cap_at_capacity() {
        let gate = ConnectionGate::new(100, 2);
        let start = Instant::now();

        // A long idle period must not bank more than `rate` tokens
        let later = start + Duration::from_secs(3600);
        assert!(gate.acquire_at(later));
        assert!(gate.acquire_at(later));
        assert!(!gate.acquire_at(later));
    }

    #[test]
    fn fractional_refill() {
        let gate = ConnectionGate::new(100, 2);
        let start = Instant::now();

        assert!(gate.acquire_at(start));
        assert!(gate.acquire_at(start));

        // Half a second at 2/sec yields a single token
        let half = start + Duration::from_millis(500);
        assert!(gate.acquire_at(half));
        assert!(!gate.acquire_at(half));
    }

    #[test]
    fn concurrency_ceiling() {
        let gate = ConnectionGate::new(2, 1000);
        let start = Instant::now();

        assert!(gate.acquire_at(start));
        assert!(gate.acquire_at(start));
        assert_equal!(gate.current(), 2);

        // Plenty of tokens remain, but the ceiling is reached
        assert!(!gate.acquire_at(start));

        gate.release();
        assert_equal!(gate.current(), 1);
        assert!(gate.acquire_at(start));
    }

    #[test]
    fn release_does_not_underflow() {
        let gate = ConnectionGate::new(2, 1000);
        gate.release();
        assert_equal!(gate.current(), 0);
    }

    #[test]
    fn slot_guard_releases_on_drop() {
        let gate = Arc::new(ConnectionGate::new(2, 1000));
        let slot = gate.acquire_slot();
        assert!(slot.is_some());
        assert_equal!(gate.current(), 1);
        drop(slot);
        assert_equal!(gate.current(), 0);
    }

    #[test]
    fn slot_guard_releases_during_unwind() {
        let gate = Arc::new(ConnectionGate::new(2, 1000));
        let slot = gate.acquire_slot().unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _slot = slot;
            panic!("worker died");
        }));
        assert!(result.is_err());
        assert_equal!(gate.current(), 0);
    }
}
