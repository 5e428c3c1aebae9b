// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-session serialization.
//!
//! A concurrent map from session id to a mutex handle. Acquisition is
//! scoped to the complete-and-persist critical section of a request and
//! releases on every exit path, including errors, via the guard's drop.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Map of per-session mutexes.
#[derive(Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to the mutex for `session_id`, creating it on first use.
    ///
    /// Callers hold the returned `Arc` and `.lock().await` it; the map
    /// entry itself is never removed, so a session's turns are totally
    /// ordered for the lifetime of the process.
    pub fn lock_for(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .expect("session lock map poisoned")
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_session_shares_a_mutex() {
        let locks = SessionLocks::new();
        let a = locks.lock_for("s1");
        let b = locks.lock_for("s1");
        assert!(Arc::ptr_eq(&a, &b));

        let other = locks.lock_for("s2");
        assert!(!Arc::ptr_eq(&a, &other));
    }

    #[tokio::test]
    async fn serializes_critical_sections() {
        let locks = Arc::new(SessionLocks::new());
        let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut handles = Vec::new();

        for _ in 0..8 {
            let locks = locks.clone();
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                let lock = locks.lock_for("contended");
                let _guard = lock.lock().await;
                let seen = counter.load(std::sync::atomic::Ordering::SeqCst);
                tokio::task::yield_now().await;
                counter.store(seen + 1, std::sync::atomic::Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        // Without mutual exclusion the read-yield-write pattern loses updates.
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 8);
    }
}
