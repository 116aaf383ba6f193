//! Outbound quota enforcement for externally rate-limited operations.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Operation classes subject to platform-imposed quotas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationClass {
    /// Global command registration calls; long window, low ceiling.
    CommandRegistration,
    /// Ephemeral "is composing" indicators; short window.
    PresenceIndicator,
}

/// What a gated caller should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Proceed,
    /// The window is exhausted; the operation could be retried after the
    /// attached duration. Stale-by-nature operations (presence) should be
    /// skipped instead of queued.
    Defer(Duration),
    /// The window is exhausted and the operation must not be attempted
    /// before the attached duration elapses.
    Reject { retry_after: Duration },
}

/// How a class behaves once its window is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overflow {
    Defer,
    Reject,
}

#[derive(Debug, Clone, Copy)]
pub struct QuotaPolicy {
    pub limit: u32,
    pub window: Duration,
    pub overflow: Overflow,
}

struct Ledger {
    window_start: Instant,
    count: u32,
}

/// Tracks a fixed-window ledger per operation class.
///
/// The governor never performs the external call itself; it only authorizes
/// or denies, and it always answers with a `Decision` so callers are never
/// left without a signal.
pub struct RateGovernor {
    policies: HashMap<OperationClass, QuotaPolicy>,
    ledgers: Mutex<HashMap<OperationClass, Ledger>>,
}

impl RateGovernor {
    pub fn new(policies: HashMap<OperationClass, QuotaPolicy>) -> Self {
        Self {
            policies,
            ledgers: Mutex::new(HashMap::new()),
        }
    }

    /// Platform defaults: 200 command registrations per 24 h (rejected on
    /// overflow, the remainder of the window attached for the operator) and
    /// 5 presence indicators per 10 s (deferred on overflow).
    pub fn with_defaults() -> Self {
        let mut policies = HashMap::new();
        policies.insert(
            OperationClass::CommandRegistration,
            QuotaPolicy {
                limit: 200,
                window: Duration::from_secs(24 * 60 * 60),
                overflow: Overflow::Reject,
            },
        );
        policies.insert(
            OperationClass::PresenceIndicator,
            QuotaPolicy {
                limit: 5,
                window: Duration::from_secs(10),
                overflow: Overflow::Defer,
            },
        );
        Self::new(policies)
    }

    pub fn allow(&self, class: OperationClass) -> Decision {
        self.allow_at(class, Instant::now())
    }

    /// Clock-injected entry point; `allow` is a thin wrapper over
    /// `Instant::now()`.
    pub fn allow_at(&self, class: OperationClass, now: Instant) -> Decision {
        let Some(policy) = self.policies.get(&class) else {
            // Ungoverned classes carry no quota.
            return Decision::Proceed;
        };
        let mut ledgers = self
            .ledgers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let ledger = ledgers.entry(class).or_insert(Ledger {
            window_start: now,
            count: 0,
        });
        if now.duration_since(ledger.window_start) >= policy.window {
            ledger.window_start = now;
            ledger.count = 0;
        }
        if ledger.count < policy.limit {
            ledger.count += 1;
            return Decision::Proceed;
        }
        let remaining = policy.window - now.duration_since(ledger.window_start);
        match policy.overflow {
            Overflow::Defer => Decision::Defer(remaining),
            Overflow::Reject => Decision::Reject {
                retry_after: remaining,
            },
        }
    }
}
