//! Stall watchdog for the consumer and decode paths
//!
//! Low-overhead monitoring using atomic timestamps instead of locks.
//! Each monitored operation stores its start time in an atomic variable,
//! and the watchdog periodically scans these timestamps to report stalls.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

/// Timestamp in milliseconds since UNIX_EPOCH
#[inline(always)]
fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

/// Shared state for one monitored operation
struct OperationState {
    /// Timestamp (ms since epoch) when the current operation started, or 0 if idle
    started_at: AtomicU64,
    /// Set once a stall has been reported for the current operation
    reported: AtomicBool,
    component: String,
    operation: String,
}

/// A stalled operation found by [`Watchdog::check_for_stalls`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stall {
    pub component: String,
    pub operation: String,
    pub blocked_for: Duration,
}

/// Handle to one operation's watchdog state
#[derive(Clone)]
pub struct WatchdogHandle {
    state: Arc<OperationState>,
}

impl WatchdogHandle {
    #[inline(always)]
    pub fn start_operation(&self) {
        self.state.started_at.store(now_millis(), Ordering::Relaxed);
        self.state.reported.store(false, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn finish_operation(&self) {
        if self.state.reported.swap(false, Ordering::Relaxed) {
            info!(
                "[{}] {} resumed after stall",
                self.state.component, self.state.operation
            );
        }
        self.state.started_at.store(0, Ordering::Relaxed);
    }
}

/// Shared watchdog state
#[derive(Clone)]
pub struct Watchdog {
    operations: Arc<Mutex<Vec<Weak<OperationState>>>>,
    running: Arc<AtomicBool>,
    threshold: Duration,
}

impl Watchdog {
    /// Create a watchdog that reports operations blocked longer than `threshold`
    pub fn new(threshold: Duration) -> Self {
        Self {
            operations: Arc::new(Mutex::new(Vec::new())),
            running: Arc::new(AtomicBool::new(true)),
            threshold,
        }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Register an operation for monitoring
    pub fn register(&self, component: &str, operation: &str) -> WatchdogHandle {
        let state = Arc::new(OperationState {
            started_at: AtomicU64::new(0),
            reported: AtomicBool::new(false),
            component: component.to_string(),
            operation: operation.to_string(),
        });

        if let Ok(mut operations) = self.operations.lock() {
            operations.push(Arc::downgrade(&state));
        }

        WatchdogHandle { state }
    }

    /// Scan all live operations and return the newly stalled ones.
    ///
    /// Each stalled operation is reported (and logged) once until it finishes.
    pub fn check_for_stalls(&self) -> Vec<Stall> {
        let now = now_millis();
        let threshold_ms = self.threshold.as_millis() as u64;
        let mut stalls = Vec::new();

        let Ok(mut operations) = self.operations.lock() else {
            return stalls;
        };

        operations.retain(|weak| {
            let Some(state) = weak.upgrade() else {
                return false;
            };
            let start = state.started_at.load(Ordering::Relaxed);
            if start > 0 {
                let blocked_ms = now.saturating_sub(start);
                if blocked_ms > threshold_ms && !state.reported.swap(true, Ordering::Relaxed) {
                    warn!(
                        "[{}] {} blocked for {:.1}s",
                        state.component,
                        state.operation,
                        blocked_ms as f64 / 1000.0
                    );
                    stalls.push(Stall {
                        component: state.component.clone(),
                        operation: state.operation.clone(),
                        blocked_for: Duration::from_millis(blocked_ms),
                    });
                }
            }
            true
        });

        stalls
    }

    /// Start the monitoring thread; it runs until [`Watchdog::stop`]
    pub fn start_monitoring_thread(&self) -> std::io::Result<std::thread::JoinHandle<()>> {
        let watchdog = self.clone();
        let period = (self.threshold / 4).clamp(Duration::from_millis(10), Duration::from_secs(1));
        std::thread::Builder::new()
            .name("dslcap_watchdog".to_string())
            .spawn(move || {
                while watchdog.running.load(Ordering::Relaxed) {
                    std::thread::sleep(period);
                    watchdog.check_for_stalls();
                }
            })
    }

    /// Stop the monitoring thread
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

/// RAII guard for tracking an operation (just atomic stores)
pub struct OperationGuard<'a> {
    handle: &'a WatchdogHandle,
}

impl<'a> OperationGuard<'a> {
    #[inline(always)]
    pub fn new(handle: &'a WatchdogHandle) -> Self {
        handle.start_operation();
        Self { handle }
    }
}

impl Drop for OperationGuard<'_> {
    #[inline(always)]
    fn drop(&mut self) {
        self.handle.finish_operation();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_operations_never_stall() {
        let wd = Watchdog::new(Duration::from_millis(1));
        let _handle = wd.register("decoder", "run");
        std::thread::sleep(Duration::from_millis(5));
        assert!(wd.check_for_stalls().is_empty());
    }

    #[test]
    fn test_stall_reported_once() {
        let wd = Watchdog::new(Duration::from_millis(1));
        let handle = wd.register("consumer", "recv");
        let guard = OperationGuard::new(&handle);
        std::thread::sleep(Duration::from_millis(10));

        let stalls = wd.check_for_stalls();
        assert_eq!(stalls.len(), 1);
        assert_eq!(stalls[0].component, "consumer");
        assert_eq!(stalls[0].operation, "recv");
        assert!(wd.check_for_stalls().is_empty());

        drop(guard);
        assert!(wd.check_for_stalls().is_empty());
    }

    #[test]
    fn test_dropped_handles_are_pruned() {
        let wd = Watchdog::new(Duration::from_millis(1));
        {
            let handle = wd.register("tmp", "op");
            handle.start_operation();
        }
        std::thread::sleep(Duration::from_millis(5));
        assert!(wd.check_for_stalls().is_empty());
        assert!(wd.operations.lock().unwrap().is_empty());
    }
}
