//! Owned shared state for the bot system.
//!
//! Every structure here guards its own map with a `std::sync` lock: all
//! critical sections are synchronous map operations and are never held
//! across an `.await` point.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, RwLock};

use teloxide::types::ChatId;
use teloxide::Bot;
use tokio_util::task::TaskTracker;

use crate::audit::ReactionLog;
use crate::config::Config;
use crate::reaction::ReactionClient;

/// Consecutive delivery failures before a connection is flagged.
pub const FAILURE_ALERT_THRESHOLD: u32 = 5;

/// One authenticated bot session, established via `getMe`.
#[derive(Clone)]
pub struct BotConnection {
    pub bot: Bot,
    pub user_id: u64,
    pub username: String,
}

/// Every live connection, in registration order. Connections are never
/// removed for the lifetime of the process.
pub struct ConnectionPool {
    connections: RwLock<Vec<BotConnection>>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(Vec::new()),
        }
    }

    pub fn register(&self, connection: BotConnection) {
        self.connections.write().unwrap().push(connection);
    }

    /// Point-in-time clone of the pool for fan-out; iteration happens
    /// outside the lock.
    pub fn snapshot(&self) -> Vec<BotConnection> {
        self.connections.read().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.connections.read().unwrap().len()
    }
}

/// Chats that have sent at least one message since startup. Membership is
/// monotonic; a broadcast reaches only chats recorded here.
pub struct RecipientRegistry {
    chats: Mutex<HashSet<ChatId>>,
}

impl RecipientRegistry {
    pub fn new() -> Self {
        Self {
            chats: Mutex::new(HashSet::new()),
        }
    }

    /// Returns `true` the first time a chat is seen.
    pub fn record(&self, chat: ChatId) -> bool {
        self.chats.lock().unwrap().insert(chat)
    }

    pub fn all(&self) -> Vec<ChatId> {
        self.chats.lock().unwrap().iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.chats.lock().unwrap().len()
    }
}

/// Per-chat reaction switch. Chats with no explicit entry are enabled;
/// only group chats ever get an entry.
pub struct ReactionToggles {
    flags: RwLock<HashMap<ChatId, bool>>,
}

impl ReactionToggles {
    pub fn new() -> Self {
        Self {
            flags: RwLock::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self, chat: ChatId) -> bool {
        self.flags.read().unwrap().get(&chat).copied().unwrap_or(true)
    }

    pub fn set_enabled(&self, chat: ChatId, enabled: bool) {
        self.flags.write().unwrap().insert(chat, enabled);
    }
}

/// Two-state broadcast machine keyed by principal. Only the trusted
/// principal can arm, cancel, or have its next message consumed as the
/// broadcast payload.
pub struct BroadcastGate {
    trusted: u64,
    armed: Mutex<HashMap<u64, bool>>,
}

impl BroadcastGate {
    pub fn new(trusted: u64) -> Self {
        Self {
            trusted,
            armed: Mutex::new(HashMap::new()),
        }
    }

    /// Arms the gate; returns `false` without any state change for a
    /// non-trusted principal.
    pub fn arm(&self, principal: u64) -> bool {
        if principal != self.trusted {
            return false;
        }
        self.armed.lock().unwrap().insert(principal, true);
        true
    }

    /// Disarms the gate. Idempotent: cancelling while already disarmed
    /// still reports success to the trusted principal.
    pub fn disarm(&self, principal: u64) -> bool {
        if principal != self.trusted {
            return false;
        }
        self.armed.lock().unwrap().insert(principal, false);
        true
    }

    /// Compare-and-clear: returns `true` exactly once per arm event, for
    /// the trusted principal's next message. The flag is cleared in the
    /// same locked section, so two racing messages cannot both consume it.
    pub fn consume(&self, principal: u64) -> bool {
        if principal != self.trusted {
            return false;
        }
        let mut armed = self.armed.lock().unwrap();
        match armed.get_mut(&principal) {
            Some(flag) if *flag => {
                *flag = false;
                true
            }
            _ => false,
        }
    }
}

/// Consecutive delivery failures per connection display name. The count is
/// monotonic for the process lifetime; the alert fires exactly once, when
/// a name first reaches [`FAILURE_ALERT_THRESHOLD`].
pub struct FailureTracker {
    counts: Mutex<HashMap<String, u32>>,
}

impl FailureTracker {
    pub fn new() -> Self {
        Self {
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// Records one failure; returns `true` when this failure is the one
    /// that crosses the alert threshold.
    pub fn record_failure(&self, connection: &str) -> bool {
        let mut counts = self.counts.lock().unwrap();
        let count = counts.entry(connection.to_string()).or_insert(0);
        *count += 1;
        *count == FAILURE_ALERT_THRESHOLD
    }
}

/// Shared application state, one per process. `handlers` tracks every task
/// spawned by the message pipeline so shutdown can wait for in-flight work.
pub struct AppState {
    pub config: Config,
    pub pool: ConnectionPool,
    pub recipients: RecipientRegistry,
    pub toggles: ReactionToggles,
    pub gate: BroadcastGate,
    pub failures: FailureTracker,
    pub reactions: ReactionClient,
    pub audit: ReactionLog,
    pub handlers: TaskTracker,
}

impl AppState {
    pub fn new(config: Config, audit: ReactionLog) -> Self {
        let gate = BroadcastGate::new(config.telegram.owner_id);
        Self {
            config,
            pool: ConnectionPool::new(),
            recipients: RecipientRegistry::new(),
            toggles: ReactionToggles::new(),
            gate,
            failures: FailureTracker::new(),
            reactions: ReactionClient::new(),
            audit,
            handlers: TaskTracker::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn connection(username: &str) -> BotConnection {
        BotConnection {
            bot: Bot::new("123456:TEST"),
            user_id: 1,
            username: username.to_string(),
        }
    }

    #[test]
    fn test_pool_snapshot_reflects_registration_order() {
        let pool = ConnectionPool::new();
        assert_eq!(pool.len(), 0);

        pool.register(connection("alpha"));
        pool.register(connection("beta"));

        let snapshot = pool.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].username, "alpha");
        assert_eq!(snapshot[1].username, "beta");
    }

    #[test]
    fn test_pool_snapshot_is_independent_of_later_registrations() {
        let pool = ConnectionPool::new();
        pool.register(connection("alpha"));

        let snapshot = pool.snapshot();
        pool.register(connection("beta"));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_registry_is_monotonic_and_idempotent() {
        let registry = RecipientRegistry::new();

        assert!(registry.record(ChatId(10)));
        assert!(registry.record(ChatId(-20)));
        assert!(!registry.record(ChatId(10)));

        assert_eq!(registry.len(), 2);
        let all = registry.all();
        assert!(all.contains(&ChatId(10)));
        assert!(all.contains(&ChatId(-20)));
    }

    #[test]
    fn test_toggles_default_to_enabled() {
        let toggles = ReactionToggles::new();
        assert!(toggles.is_enabled(ChatId(-100)));
    }

    #[test]
    fn test_toggles_honor_explicit_settings() {
        let toggles = ReactionToggles::new();

        toggles.set_enabled(ChatId(-100), false);
        assert!(!toggles.is_enabled(ChatId(-100)));
        assert!(toggles.is_enabled(ChatId(-200)));

        toggles.set_enabled(ChatId(-100), true);
        assert!(toggles.is_enabled(ChatId(-100)));
    }

    #[test]
    fn test_gate_ignores_non_trusted_principals() {
        let gate = BroadcastGate::new(42);

        assert!(!gate.arm(7));
        assert!(!gate.consume(7));
        assert!(!gate.consume(42));
        assert!(!gate.disarm(7));
    }

    #[test]
    fn test_gate_consumes_exactly_once_per_arm() {
        let gate = BroadcastGate::new(42);

        assert!(gate.arm(42));
        assert!(gate.consume(42));
        assert!(!gate.consume(42));

        assert!(gate.arm(42));
        assert!(gate.consume(42));
    }

    #[test]
    fn test_gate_disarm_blocks_consumption_and_is_idempotent() {
        let gate = BroadcastGate::new(42);

        assert!(gate.disarm(42));

        gate.arm(42);
        assert!(gate.disarm(42));
        assert!(!gate.consume(42));
    }

    #[test]
    fn test_gate_consume_is_exclusive_under_contention() {
        for _ in 0..200 {
            let gate = Arc::new(BroadcastGate::new(42));
            assert!(gate.arm(42));

            let racers: Vec<_> = (0..8)
                .map(|_| {
                    let gate = Arc::clone(&gate);
                    thread::spawn(move || gate.consume(42))
                })
                .collect();

            let consumed = racers
                .into_iter()
                .map(|handle| handle.join().unwrap())
                .filter(|&won| won)
                .count();
            assert_eq!(consumed, 1);
        }
    }

    #[test]
    fn test_failure_tracker_alerts_exactly_at_threshold() {
        let tracker = FailureTracker::new();

        for _ in 0..FAILURE_ALERT_THRESHOLD - 1 {
            assert!(!tracker.record_failure("alpha"));
        }
        assert!(tracker.record_failure("alpha"));
        assert!(!tracker.record_failure("alpha"));
    }

    #[test]
    fn test_failure_tracker_counts_connections_independently() {
        let tracker = FailureTracker::new();

        for _ in 0..FAILURE_ALERT_THRESHOLD {
            tracker.record_failure("alpha");
        }
        assert!(!tracker.record_failure("beta"));
    }
}
