//! Multi-tab sync - relays lock/unlock transitions between contexts that
//! share one storage medium.
//!
//! Messages carry only the sender's tab id and a [`LockSignal`]; nothing
//! derived from the passphrase ever goes over the channel.

use crate::lock::{InactivityLock, LockCause, LockState, LockTransition};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockSignal {
    Lock,
    Unlock,
}

/// Wire message: `{"tab":"<id>","signal":"lock"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMessage {
    pub tab: String,
    pub signal: LockSignal,
}

/// Shared same-origin notification bus. Clone it into every context.
#[derive(Debug, Clone)]
pub struct SyncChannel {
    tx: broadcast::Sender<String>,
}

impl Default for SyncChannel {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }
}

impl SyncChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw messages as posted to the bus.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Post a raw message. Returns how many receivers saw it.
    pub fn send(&self, message: String) -> usize {
        self.tx.send(message).unwrap_or(0)
    }
}

/// One context's membership in a [`SyncChannel`].
pub struct TabSync {
    tab_id: String,
    channel: SyncChannel,
    remote_tx: broadcast::Sender<SyncMessage>,
    forwarder: JoinHandle<()>,
    listener: JoinHandle<()>,
}

impl TabSync {
    /// Join `channel` on behalf of `lock`. Must be called inside a tokio
    /// runtime.
    pub fn join(channel: &SyncChannel, lock: &InactivityLock) -> Self {
        let tab_id = uuid::Uuid::new_v4().to_string();
        let (remote_tx, _) = broadcast::channel(CHANNEL_CAPACITY);

        // Subscribe before spawning so nothing published from here on is missed
        let transitions = lock.subscribe();
        let incoming = channel.subscribe();

        let forwarder = tokio::spawn(forward_local(
            transitions,
            channel.clone(),
            tab_id.clone(),
        ));
        let listener = tokio::spawn(apply_remote(
            incoming,
            lock.clone(),
            remote_tx.clone(),
            tab_id.clone(),
        ));

        debug!("Tab {} joined sync channel", tab_id);
        Self {
            tab_id,
            channel: channel.clone(),
            remote_tx,
            forwarder,
            listener,
        }
    }

    pub fn tab_id(&self) -> &str {
        &self.tab_id
    }

    /// Signals received from other tabs.
    pub fn remote_events(&self) -> broadcast::Receiver<SyncMessage> {
        self.remote_tx.subscribe()
    }

    /// Announce `signal` to other tabs without a local transition.
    pub fn publish(&self, signal: LockSignal) {
        publish(&self.channel, &self.tab_id, signal);
    }

    /// Stop relaying. Safe to call more than once.
    pub fn shutdown(&self) {
        self.forwarder.abort();
        self.listener.abort();
    }
}

impl Drop for TabSync {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn publish(channel: &SyncChannel, tab_id: &str, signal: LockSignal) {
    let message = SyncMessage {
        tab: tab_id.to_string(),
        signal,
    };
    match serde_json::to_string(&message) {
        Ok(raw) => {
            let receivers = channel.send(raw);
            debug!("Tab {} published {:?} to {} receivers", tab_id, signal, receivers);
        }
        Err(e) => warn!("Cannot encode sync message: {}", e),
    }
}

/// Local transitions → channel. Remote-caused locks are not re-broadcast.
async fn forward_local(
    mut transitions: broadcast::Receiver<LockTransition>,
    channel: SyncChannel,
    tab_id: String,
) {
    loop {
        match transitions.recv().await {
            Ok(transition) => {
                let signal = match (transition.state, transition.cause) {
                    (_, LockCause::Remote) => continue,
                    (LockState::Locked, _) => LockSignal::Lock,
                    (LockState::Unlocked, _) => LockSignal::Unlock,
                };
                publish(&channel, &tab_id, signal);
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(missed = n, "lock transition stream lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// Channel → local lock. Own echoes and malformed messages are dropped.
async fn apply_remote(
    mut incoming: broadcast::Receiver<String>,
    lock: InactivityLock,
    remote_tx: broadcast::Sender<SyncMessage>,
    tab_id: String,
) {
    loop {
        let raw = match incoming.recv().await {
            Ok(raw) => raw,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(missed = n, "sync channel lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };

        let message: SyncMessage = match serde_json::from_str(&raw) {
            Ok(message) => message,
            Err(e) => {
                debug!("Ignoring malformed sync message: {}", e);
                continue;
            }
        };
        if message.tab == tab_id {
            continue;
        }

        if message.signal == LockSignal::Lock {
            info!("Tab {} locked; locking this tab", message.tab);
            lock.lock_with(LockCause::Remote);
        }
        let _ = remote_tx.send(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::PassphraseSession;
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    fn tab(channel: &SyncChannel) -> (InactivityLock, TabSync) {
        let lock = InactivityLock::with_timeout(
            PassphraseSession::shared(),
            Duration::from_secs(900),
            LockState::Locked,
        );
        let sync = TabSync::join(channel, &lock);
        (lock, sync)
    }

    #[tokio::test]
    async fn test_lock_propagates_to_other_tab() {
        let channel = SyncChannel::new();
        let (lock_a, _sync_a) = tab(&channel);
        let (lock_b, _sync_b) = tab(&channel);
        lock_a.unlock("p1");
        lock_b.unlock("p1");
        let mut b_transitions = lock_b.subscribe();

        lock_a.lock();

        let transition = timeout(WAIT, b_transitions.recv()).await.unwrap().unwrap();
        assert_eq!(
            transition,
            LockTransition {
                state: LockState::Locked,
                cause: LockCause::Remote
            }
        );
        assert!(!lock_b.session().has_passphrase());
    }

    #[tokio::test]
    async fn test_remote_unlock_is_notification_only() {
        let channel = SyncChannel::new();
        let (lock_a, sync_a) = tab(&channel);
        let (lock_b, sync_b) = tab(&channel);
        let mut b_events = sync_b.remote_events();

        lock_a.unlock("p1");

        let event = timeout(WAIT, b_events.recv()).await.unwrap().unwrap();
        assert_eq!(event.signal, LockSignal::Unlock);
        assert_eq!(event.tab, sync_a.tab_id());
        assert!(lock_b.is_locked());
        assert!(!lock_b.session().has_passphrase());
    }

    #[tokio::test]
    async fn test_messages_never_carry_passphrase() {
        let channel = SyncChannel::new();
        let mut raw = channel.subscribe();
        let (lock, sync) = tab(&channel);

        lock.unlock("correct horse battery staple");

        let message = timeout(WAIT, raw.recv()).await.unwrap().unwrap();
        assert!(!message.contains("correct horse"));
        let parsed: SyncMessage = serde_json::from_str(&message).unwrap();
        assert_eq!(parsed.tab, sync.tab_id());
        assert_eq!(parsed.signal, LockSignal::Unlock);
    }

    #[tokio::test(start_paused = true)]
    async fn test_own_echo_is_ignored() {
        let channel = SyncChannel::new();
        let (lock, sync) = tab(&channel);
        lock.unlock("p1");
        let mut own_events = sync.remote_events();

        sync.publish(LockSignal::Lock);

        assert!(timeout(WAIT, own_events.recv()).await.is_err());
        assert!(!lock.is_locked());
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_message_is_ignored() {
        let channel = SyncChannel::new();
        let (lock, sync) = tab(&channel);
        lock.unlock("p1");
        let mut events = sync.remote_events();

        channel.send("{\"tab\":\"x\",\"signal\":\"passphrase\"}".to_string());
        channel.send("not json".to_string());

        assert!(timeout(WAIT, events.recv()).await.is_err());
        assert!(!lock.is_locked());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_relaying() {
        let channel = SyncChannel::new();
        let (lock_a, _sync_a) = tab(&channel);
        let (lock_b, sync_b) = tab(&channel);
        lock_a.unlock("p1");
        lock_b.unlock("p1");

        sync_b.shutdown();
        lock_a.lock();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(!lock_b.is_locked());
    }

    #[test]
    fn test_wire_format() {
        let message = SyncMessage {
            tab: "t1".to_string(),
            signal: LockSignal::Lock,
        };
        assert_eq!(
            serde_json::to_string(&message).unwrap(),
            r#"{"tab":"t1","signal":"lock"}"#
        );
    }
}
