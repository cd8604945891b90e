//! Inactivity lock - clears the passphrase after an idle timeout or on
//! manual lock.
//!
//! ```text
//!              unlock(passphrase)
//!   Locked  ───────────────────────►  Unlocked ──┐ activity:
//!     ▲                                  │  ▲    │ reset countdown
//!     │     idle timeout / lock()        │  └────┘
//!     └──────────────────────────────────┘
//! ```
//!
//! At most one countdown task is pending at a time. Every reset aborts the
//! previous task and bumps a generation counter; a task that wakes up with a
//! stale generation does nothing.

use crate::config::LockConfig;
use crate::error::Result;
use crate::session::PassphraseSession;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default idle timeout (15 minutes)
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(900);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockState {
    Unlocked,
    Locked,
}

/// User activity that postpones the idle lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityKind {
    PointerDown,
    PointerMove,
    KeyPress,
    Scroll,
    TouchStart,
    Click,
}

impl ActivityKind {
    pub const ALL: [ActivityKind; 6] = [
        ActivityKind::PointerDown,
        ActivityKind::PointerMove,
        ActivityKind::KeyPress,
        ActivityKind::Scroll,
        ActivityKind::TouchStart,
        ActivityKind::Click,
    ];
}

/// Why a transition happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockCause {
    /// Idle timeout elapsed
    Idle,
    /// `lock()` was called in this context
    Manual,
    /// Another context announced a lock
    Remote,
    /// `unlock()` was called in this context
    Unlock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockTransition {
    pub state: LockState,
    pub cause: LockCause,
}

// ============ ACTIVITY SOURCES ============

pub type ActivityHandler = Arc<dyn Fn(ActivityKind) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Something that emits user activity (the host's input event stream).
pub trait ActivitySource: Send + Sync {
    /// Register `handler` for `kind`.
    fn add_listener(&self, kind: ActivityKind, handler: ActivityHandler) -> Result<ListenerId>;

    /// Deregister a listener. Unknown ids are ignored.
    fn remove_listener(&self, id: ListenerId);
}

/// In-process activity source. Host code feeds input events in with
/// [`ActivityHub::emit`].
#[derive(Default)]
pub struct ActivityHub {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(ListenerId, ActivityKind, ActivityHandler)>>,
}

impl ActivityHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `kind` to every listener registered for it.
    pub fn emit(&self, kind: ActivityKind) {
        let handlers: Vec<ActivityHandler> = self
            .listeners
            .read()
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .map(|(_, _, handler)| Arc::clone(handler))
            .collect();
        for handler in handlers {
            handler(kind);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }
}

impl ActivitySource for ActivityHub {
    fn add_listener(&self, kind: ActivityKind, handler: ActivityHandler) -> Result<ListenerId> {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, kind, handler));
        Ok(id)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.listeners.write().retain(|(existing, _, _)| *existing != id);
    }
}

// ============ LOCK TIMER ============

type LockCallback = Arc<dyn Fn() + Send + Sync>;

struct TimerState {
    state: LockState,
    last_activity: Instant,
    pending: Option<JoinHandle<()>>,
    generation: u64,
    listeners: Vec<(Arc<dyn ActivitySource>, ListenerId)>,
    torn_down: bool,
}

struct LockInner {
    session: Arc<PassphraseSession>,
    timeout: Duration,
    timer_enabled: bool,
    timer: Mutex<TimerState>,
    on_lock: RwLock<Vec<LockCallback>>,
    transitions: broadcast::Sender<LockTransition>,
}

/// Idle auto-lock bound to one [`PassphraseSession`]. Cheap to clone.
#[derive(Clone)]
pub struct InactivityLock {
    inner: Arc<LockInner>,
}

impl InactivityLock {
    pub fn new(session: Arc<PassphraseSession>, config: &LockConfig, initial: LockState) -> Self {
        Self::build(session, config.idle_timeout(), config.enabled, initial)
    }

    pub fn with_timeout(
        session: Arc<PassphraseSession>,
        timeout: Duration,
        initial: LockState,
    ) -> Self {
        Self::build(session, timeout, true, initial)
    }

    fn build(
        session: Arc<PassphraseSession>,
        timeout: Duration,
        timer_enabled: bool,
        initial: LockState,
    ) -> Self {
        if initial == LockState::Locked {
            session.clear_passphrase();
        }

        let (transitions, _) = broadcast::channel(16);
        let inner = Arc::new(LockInner {
            session,
            timeout,
            timer_enabled,
            timer: Mutex::new(TimerState {
                state: initial,
                last_activity: Instant::now(),
                pending: None,
                generation: 0,
                listeners: Vec::new(),
                torn_down: false,
            }),
            on_lock: RwLock::new(Vec::new()),
            transitions,
        });

        if initial == LockState::Unlocked {
            let mut timer = inner.timer.lock();
            LockInner::schedule(&inner, &mut timer);
        }

        Self { inner }
    }

    pub fn state(&self) -> LockState {
        self.inner.timer.lock().state
    }

    pub fn is_locked(&self) -> bool {
        self.state() == LockState::Locked
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    pub fn session(&self) -> &Arc<PassphraseSession> {
        &self.inner.session
    }

    /// Receive every state transition from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<LockTransition> {
        self.inner.transitions.subscribe()
    }

    /// Run `callback` whenever this context locks.
    pub fn on_lock(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.inner.on_lock.write().push(Arc::new(callback));
    }

    /// Listen to every [`ActivityKind`] on `source`. Registration failures
    /// are logged and skipped; returns how many listeners were registered.
    pub fn attach(&self, source: Arc<dyn ActivitySource>) -> usize {
        let mut registered = Vec::new();
        for kind in ActivityKind::ALL {
            let weak: Weak<LockInner> = Arc::downgrade(&self.inner);
            let handler: ActivityHandler = Arc::new(move |kind: ActivityKind| {
                if let Some(inner) = weak.upgrade() {
                    LockInner::touch(&inner, kind);
                }
            });
            match source.add_listener(kind, handler) {
                Ok(id) => registered.push((Arc::clone(&source), id)),
                Err(e) => warn!("Cannot register {:?} activity listener: {}", kind, e),
            }
        }

        let count = registered.len();
        let mut timer = self.inner.timer.lock();
        if timer.torn_down {
            drop(timer);
            for (source, id) in registered {
                source.remove_listener(id);
            }
            return 0;
        }
        timer.listeners.extend(registered);
        count
    }

    /// Report user activity. Restarts the countdown while unlocked.
    pub fn record_activity(&self, kind: ActivityKind) {
        LockInner::touch(&self.inner, kind);
    }

    /// Hold `passphrase` and restart the countdown. Does not check that the
    /// passphrase is correct. Announces an `Unlock` transition when the
    /// context was locked or held no passphrase yet.
    pub fn unlock(&self, passphrase: impl Into<String>) {
        // Session and state change together under the timer mutex
        let mut timer = self.inner.timer.lock();
        let had_passphrase = self.inner.session.has_passphrase();
        self.inner.session.set_passphrase(passphrase);
        let was_locked = timer.state == LockState::Locked;
        timer.state = LockState::Unlocked;
        LockInner::schedule(&self.inner, &mut timer);
        drop(timer);

        if was_locked || !had_passphrase {
            info!("Unlocked");
            self.inner.announce(LockTransition {
                state: LockState::Unlocked,
                cause: LockCause::Unlock,
            });
        }
    }

    /// Lock immediately.
    pub fn lock(&self) {
        LockInner::lock_now(&self.inner, LockCause::Manual, None);
    }

    pub(crate) fn lock_with(&self, cause: LockCause) {
        LockInner::lock_now(&self.inner, cause, None);
    }

    /// `max(0, timeout - time since last activity)`; zero while locked.
    pub fn time_remaining(&self) -> Duration {
        let timer = self.inner.timer.lock();
        if timer.state == LockState::Locked {
            return Duration::ZERO;
        }
        self.inner
            .timeout
            .saturating_sub(timer.last_activity.elapsed())
    }

    /// Cancel the pending countdown and deregister all activity listeners.
    /// Safe to call more than once.
    pub fn teardown(&self) {
        let mut timer = self.inner.timer.lock();
        timer.torn_down = true;
        timer.generation += 1;
        if let Some(handle) = timer.pending.take() {
            handle.abort();
        }
        let listeners = std::mem::take(&mut timer.listeners);
        drop(timer);

        for (source, id) in &listeners {
            source.remove_listener(*id);
        }
        if !listeners.is_empty() {
            debug!("Removed {} activity listeners", listeners.len());
        }
    }
}

impl LockInner {
    /// Abort any pending countdown and start a new one from now.
    fn schedule(inner: &Arc<Self>, timer: &mut TimerState) {
        if let Some(handle) = timer.pending.take() {
            handle.abort();
        }
        timer.generation += 1;
        timer.last_activity = Instant::now();

        if !inner.timer_enabled || timer.torn_down || timer.state == LockState::Locked {
            return;
        }

        let generation = timer.generation;
        let Some(deadline) = timer.last_activity.checked_add(inner.timeout) else {
            warn!(
                "Idle timeout of {}s is out of range; idle auto-lock is disabled",
                inner.timeout.as_secs()
            );
            return;
        };
        let weak = Arc::downgrade(inner);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                timer.pending = Some(runtime.spawn(async move {
                    tokio::time::sleep_until(deadline).await;
                    if let Some(inner) = weak.upgrade() {
                        LockInner::lock_now(&inner, LockCause::Idle, Some(generation));
                    }
                }));
            }
            Err(_) => warn!("No async runtime available; idle auto-lock is disabled"),
        }
    }

    fn touch(inner: &Arc<Self>, kind: ActivityKind) {
        let mut timer = inner.timer.lock();
        if timer.state == LockState::Unlocked && !timer.torn_down {
            LockInner::schedule(inner, &mut timer);
            debug!("Activity {:?}; idle countdown restarted", kind);
        }
    }

    /// Transition to `Locked`. With `expected_generation` set (timer firing),
    /// a countdown that was superseded in the meantime is ignored.
    fn lock_now(inner: &Arc<Self>, cause: LockCause, expected_generation: Option<u64>) {
        let mut timer = inner.timer.lock();
        if let Some(generation) = expected_generation {
            if generation != timer.generation {
                return;
            }
        }

        let was_unlocked = timer.state == LockState::Unlocked;
        timer.state = LockState::Locked;
        timer.generation += 1;
        if let Some(handle) = timer.pending.take() {
            // The idle task is the caller; it finishes on its own.
            if cause != LockCause::Idle {
                handle.abort();
            }
        }
        let had_passphrase = inner.session.clear_passphrase();
        drop(timer);

        if !was_unlocked && !had_passphrase {
            return;
        }

        info!("Locked ({:?})", cause);
        let callbacks: Vec<LockCallback> = inner.on_lock.read().iter().cloned().collect();
        for callback in callbacks {
            callback();
        }
        if was_unlocked {
            inner.announce(LockTransition {
                state: LockState::Locked,
                cause,
            });
        }
    }

    fn announce(&self, transition: LockTransition) {
        // No subscribers is fine
        let _ = self.transitions.send(transition);
    }
}

impl Drop for LockInner {
    fn drop(&mut self) {
        if let Some(handle) = self.timer.get_mut().pending.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::AtomicUsize;

    /// Source whose registrations always fail.
    struct BrokenSource;

    impl ActivitySource for BrokenSource {
        fn add_listener(&self, kind: ActivityKind, _handler: ActivityHandler) -> Result<ListenerId> {
            Err(Error::Listener(format!("{kind:?} unsupported")))
        }

        fn remove_listener(&self, _id: ListenerId) {}
    }

    const T: Duration = DEFAULT_IDLE_TIMEOUT;

    /// Let spawned timer tasks observe the advanced clock.
    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    fn unlocked_lock() -> (InactivityLock, Arc<PassphraseSession>) {
        let session = PassphraseSession::shared();
        let lock = InactivityLock::with_timeout(Arc::clone(&session), T, LockState::Locked);
        lock.unlock("p1");
        (lock, session)
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_postpones_idle_lock() {
        let (lock, session) = unlocked_lock();

        tokio::time::advance(T - Duration::from_secs(1)).await;
        settle().await;
        lock.record_activity(ActivityKind::KeyPress);

        tokio::time::advance(T - Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(lock.state(), LockState::Unlocked);
        assert!(session.has_passphrase());

        tokio::time::advance(T).await;
        settle().await;
        assert_eq!(lock.state(), LockState::Locked);
        assert!(!session.has_passphrase());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_runs_on_lock_callback_once() {
        let (lock, _session) = unlocked_lock();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        lock.on_lock(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::advance(T + Duration::from_secs(1)).await;
        settle().await;
        tokio::time::advance(T * 3).await;
        settle().await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_lock_is_immediate() {
        let (lock, session) = unlocked_lock();
        let mut transitions = lock.subscribe();

        lock.lock();

        assert!(lock.is_locked());
        assert!(!session.has_passphrase());
        assert_eq!(lock.time_remaining(), Duration::ZERO);
        assert_eq!(
            transitions.try_recv().ok(),
            Some(LockTransition {
                state: LockState::Locked,
                cause: LockCause::Manual
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlock_restarts_countdown_and_announces() {
        let session = PassphraseSession::shared();
        let lock = InactivityLock::with_timeout(Arc::clone(&session), T, LockState::Locked);
        let mut transitions = lock.subscribe();

        lock.unlock("p1");

        assert_eq!(lock.state(), LockState::Unlocked);
        assert_eq!(lock.time_remaining(), T);
        assert_eq!(
            transitions.try_recv().ok().map(|t| t.cause),
            Some(LockCause::Unlock)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_remaining_counts_down() {
        let (lock, _session) = unlocked_lock();

        tokio::time::advance(Duration::from_secs(300)).await;
        assert_eq!(lock.time_remaining(), Duration::from_secs(600));

        lock.record_activity(ActivityKind::Scroll);
        assert_eq!(lock.time_remaining(), T);
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_while_locked_is_ignored() {
        let session = PassphraseSession::shared();
        let lock = InactivityLock::with_timeout(Arc::clone(&session), T, LockState::Locked);

        lock.record_activity(ActivityKind::Click);

        assert!(lock.is_locked());
        assert_eq!(lock.time_remaining(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attached_source_resets_countdown() {
        let (lock, _session) = unlocked_lock();
        let hub = Arc::new(ActivityHub::new());
        assert_eq!(lock.attach(hub.clone()), ActivityKind::ALL.len());

        tokio::time::advance(T - Duration::from_secs(1)).await;
        settle().await;
        hub.emit(ActivityKind::PointerMove);

        tokio::time::advance(T - Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(lock.state(), LockState::Unlocked);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_cancels_timer_and_listeners() {
        let (lock, session) = unlocked_lock();
        let hub = Arc::new(ActivityHub::new());
        lock.attach(hub.clone());

        lock.teardown();
        lock.teardown();

        assert_eq!(hub.listener_count(), 0);
        tokio::time::advance(T * 2).await;
        settle().await;
        // No firing after teardown
        assert_eq!(lock.state(), LockState::Unlocked);
        assert!(session.has_passphrase());

        // Manual lock still works
        lock.lock();
        assert!(!session.has_passphrase());
    }

    #[tokio::test(start_paused = true)]
    async fn test_listener_failures_are_not_fatal() {
        let (lock, _session) = unlocked_lock();
        assert_eq!(lock.attach(Arc::new(BrokenSource)), 0);
        assert_eq!(lock.state(), LockState::Unlocked);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_timer_never_fires() {
        let session = PassphraseSession::shared();
        let config = LockConfig {
            enabled: false,
            idle_timeout_secs: 1,
        };
        let lock = InactivityLock::new(Arc::clone(&session), &config, LockState::Locked);
        lock.unlock("p");

        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(lock.state(), LockState::Unlocked);
    }

    #[tokio::test(start_paused = true)]
    async fn test_locked_initial_state_clears_session() {
        let session = PassphraseSession::shared();
        session.set_passphrase("stale");

        let lock = InactivityLock::with_timeout(Arc::clone(&session), T, LockState::Locked);

        assert!(lock.is_locked());
        assert!(!session.has_passphrase());
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_range_timeout_disables_timer() {
        let session = PassphraseSession::shared();
        let config = LockConfig {
            enabled: true,
            idle_timeout_secs: u64::MAX,
        };
        let lock = InactivityLock::new(Arc::clone(&session), &config, LockState::Unlocked);

        lock.unlock("p1");
        lock.record_activity(ActivityKind::KeyPress);
        tokio::time::advance(T * 100).await;
        settle().await;

        assert_eq!(lock.state(), LockState::Unlocked);
        assert!(session.has_passphrase());
        lock.lock();
        assert!(lock.is_locked());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_passphrase_announces_unlock() {
        let session = PassphraseSession::shared();
        let lock = InactivityLock::with_timeout(Arc::clone(&session), T, LockState::Unlocked);
        let mut transitions = lock.subscribe();

        lock.unlock("p1");
        assert_eq!(
            transitions.try_recv().ok().map(|t| t.cause),
            Some(LockCause::Unlock)
        );

        // Already unlocked with a passphrase: nothing new to announce
        lock.unlock("p1");
        assert!(transitions.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_racing_lock_and_unlock_keep_session_consistent() {
        let runtime = tokio::runtime::Handle::current();

        for _ in 0..200 {
            let session = PassphraseSession::shared();
            let lock = InactivityLock::with_timeout(Arc::clone(&session), T, LockState::Locked);

            let threads: Vec<_> = (0..2)
                .map(|i| {
                    let lock = lock.clone();
                    let runtime = runtime.clone();
                    std::thread::spawn(move || {
                        let _guard = runtime.enter();
                        for _ in 0..20 {
                            if i == 0 {
                                lock.unlock("p1");
                            } else {
                                lock.lock();
                            }
                        }
                    })
                })
                .collect();
            for thread in threads {
                thread.join().unwrap();
            }

            assert_eq!(lock.state() == LockState::Unlocked, session.has_passphrase());
            lock.teardown();
        }
    }

    #[test]
    fn test_hub_only_delivers_matching_kind() {
        let hub = ActivityHub::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let id = hub
            .add_listener(
                ActivityKind::Click,
                Arc::new(move |_: ActivityKind| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        hub.emit(ActivityKind::Scroll);
        hub.emit(ActivityKind::Click);
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        hub.remove_listener(id);
        hub.emit(ActivityKind::Click);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
