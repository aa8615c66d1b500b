//! Fallback engine parking using std::sync::Condvar
//!
//! Used on platforms without futex support.

use super::EngineParking;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub struct FallbackParking {
    /// true = wake token posted
    token: Mutex<bool>,
    condvar: Condvar,
}

impl FallbackParking {
    pub fn new() -> Self {
        Self {
            token: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    // The guarded state is a single bool, so a poisoned lock is still
    // consistent.
    fn lock(&self) -> MutexGuard<'_, bool> {
        self.token.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for FallbackParking {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineParking for FallbackParking {
    fn park(&self, timeout: Option<Duration>) -> bool {
        let mut guard = self.lock();
        if !*guard {
            guard = match timeout {
                Some(t) => {
                    self.condvar
                        .wait_timeout(guard, t)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .condvar
                    .wait(guard)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
        std::mem::replace(&mut *guard, false)
    }

    fn unpark(&self) {
        {
            let mut guard = self.lock();
            if *guard {
                return;
            }
            *guard = true;
        }
        self.condvar.notify_one();
    }

    fn has_token(&self) -> bool {
        *self.lock()
    }
}
