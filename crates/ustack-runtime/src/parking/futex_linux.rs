//! Linux futex-based engine parking
//!
//! Futex word semantics:
//! - 0 = no token, `park` sleeps
//! - 1 = token posted, `park` consumes it and returns
//!
//! `unpark` stores the token before FUTEX_WAKE, and FUTEX_WAIT only sleeps
//! while the word is still 0, so a wake racing a park is never lost.

use super::EngineParking;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

const EMPTY: u32 = 0;
const TOKEN: u32 = 1;

pub struct FutexParking {
    futex: AtomicU32,
}

impl FutexParking {
    pub fn new() -> Self {
        Self {
            futex: AtomicU32::new(EMPTY),
        }
    }

    fn take_token(&self) -> bool {
        self.futex.swap(EMPTY, Ordering::AcqRel) == TOKEN
    }
}

impl Default for FutexParking {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineParking for FutexParking {
    fn park(&self, timeout: Option<Duration>) -> bool {
        if self.take_token() {
            return true;
        }

        let timespec = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs() as libc::time_t,
            tv_nsec: d.subsec_nanos() as libc::c_long,
        });
        let timespec_ptr = match &timespec {
            Some(ts) => ts as *const libc::timespec,
            None => std::ptr::null(),
        };

        // Sleeps only while the word is EMPTY. ETIMEDOUT, EAGAIN and EINTR
        // all land on the token check below.
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.futex.as_ptr(),
                libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
                EMPTY,
                timespec_ptr,
                std::ptr::null::<u32>(),
                0u32,
            );
        }

        self.take_token()
    }

    fn unpark(&self) {
        if self.futex.swap(TOKEN, Ordering::AcqRel) == TOKEN {
            // Already posted; whoever posted it issued the wake.
            return;
        }
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.futex.as_ptr(),
                libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
                1i32,
                std::ptr::null::<libc::timespec>(),
                std::ptr::null::<u32>(),
                0u32,
            );
        }
    }

    fn has_token(&self) -> bool {
        self.futex.load(Ordering::Acquire) == TOKEN
    }
}
