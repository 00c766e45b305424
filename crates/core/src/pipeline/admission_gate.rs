use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Counting gate bounding how many videos are processed at once.
///
/// Callers beyond the limit block until a permit is dropped.
pub struct AdmissionGate {
    in_flight: Mutex<usize>,
    released: Condvar,
    limit: usize,
}

impl AdmissionGate {
    /// A limit of zero is treated as one.
    pub fn new(limit: usize) -> Self {
        Self {
            in_flight: Mutex::new(0),
            released: Condvar::new(),
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn in_flight(&self) -> usize {
        *self.lock()
    }

    /// Block until a slot is free and take it.
    pub fn acquire(&self) -> AdmissionPermit<'_> {
        let mut in_flight = self.lock();
        while *in_flight >= self.limit {
            in_flight = self
                .released
                .wait(in_flight)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *in_flight += 1;
        AdmissionPermit { gate: self }
    }

    fn release(&self) {
        let mut in_flight = self.lock();
        *in_flight = in_flight.saturating_sub(1);
        self.released.notify_one();
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Held for the duration of one request; frees its slot on drop.
pub struct AdmissionPermit<'a> {
    gate: &'a AdmissionGate,
}

impl Drop for AdmissionPermit<'_> {
    fn drop(&mut self) {
        self.gate.release();
    }
}
