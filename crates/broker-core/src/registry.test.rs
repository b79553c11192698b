use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use netconf_core::rpc::Rpc;
use netconf_core::{
    Hello, NetconfResult, NetconfSession, NetconfVersion, Notification, RpcReply, SessionStatus,
};

use super::*;

struct StubSession {
    hello: Hello,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl NetconfSession for StubSession {
    fn hello(&self) -> &Hello {
        &self.hello
    }

    fn status(&self) -> SessionStatus {
        SessionStatus::Working
    }

    async fn rpc(&mut self, _rpc: Rpc) -> NetconfResult<RpcReply> {
        Ok(RpcReply::Ok)
    }

    async fn open_side_channel(&mut self) -> NetconfResult<Self> {
        Ok(StubSession {
            hello: self.hello.clone(),
            closed: self.closed.clone(),
        })
    }

    async fn collect_notifications(&mut self, _sink: &mut Vec<Notification>) -> NetconfResult<()> {
        Ok(())
    }

    async fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

fn stub_hello() -> Hello {
    Hello {
        session_id: "1".to_string(),
        version: NetconfVersion::V1_1,
        host: "device".to_string(),
        port: "830".to_string(),
        user: "admin".to_string(),
        capabilities: vec!["urn:ietf:params:netconf:base:1.1".to_string()],
    }
}

fn stub_record(key: &str, closed: &Arc<AtomicUsize>) -> Arc<SessionRecord<StubSession>> {
    let session = StubSession {
        hello: stub_hello(),
        closed: closed.clone(),
    };
    Arc::new(SessionRecord::new(key.to_string(), session, stub_hello()))
}

#[test]
fn session_key_is_the_hex_digest_of_the_triple() {
    assert_eq!(
        session_key("h", "830", "42"),
        "61359b05c77e1f4f23aa9159843be195661a8c5a"
    );
    assert_ne!(session_key("h", "830", "42"), session_key("h", "830", "43"));
}

#[tokio::test]
async fn insert_get_and_remove() {
    let registry = SessionRegistry::new();
    let closed = Arc::new(AtomicUsize::new(0));

    registry.insert(stub_record("a", &closed)).await.unwrap();
    assert_eq!(registry.len().await, 1);
    assert!(registry.get("a").await.is_some());
    assert!(registry.get("b").await.is_none());

    let record = registry.remove("a").await.unwrap();
    assert_eq!(record.key(), "a");
    assert!(registry.get("a").await.is_none());
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn duplicate_keys_are_refused() {
    let registry = SessionRegistry::new();
    let closed = Arc::new(AtomicUsize::new(0));

    registry.insert(stub_record("a", &closed)).await.unwrap();
    let result = registry.insert(stub_record("a", &closed)).await;
    assert!(matches!(result, Err(BrokerError::DuplicateSessionKey(_))));
}

#[tokio::test]
async fn removed_records_never_reappear() {
    let registry = SessionRegistry::new();
    let closed = Arc::new(AtomicUsize::new(0));

    registry.insert(stub_record("a", &closed)).await.unwrap();
    let record = registry.remove("a").await.unwrap();
    record.close().await;

    assert!(registry.get("a").await.is_none());
    assert!(registry.keys().await.is_empty());
    assert!(record.is_closed());
}

#[tokio::test(start_paused = true)]
async fn idle_sessions_are_reaped() {
    let registry = SessionRegistry::new();
    let closed = Arc::new(AtomicUsize::new(0));
    registry.insert(stub_record("a", &closed)).await.unwrap();

    tokio::time::advance(Duration::from_secs(3601)).await;
    registry.cleanup_expired(Duration::from_secs(3600)).await;

    // the teardown runs on a spawned task
    tokio::time::sleep(Duration::from_millis(1)).await;

    assert!(registry.get("a").await.is_none());
    assert_eq!(closed.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn recently_active_sessions_survive_the_reaper() {
    let registry = SessionRegistry::new();
    let closed = Arc::new(AtomicUsize::new(0));
    registry.insert(stub_record("a", &closed)).await.unwrap();

    tokio::time::advance(Duration::from_secs(3000)).await;
    {
        let record = registry.get("a").await.unwrap();
        record.lock().await.touch();
    }
    tokio::time::advance(Duration::from_secs(3000)).await;
    registry.cleanup_expired(Duration::from_secs(3600)).await;

    assert!(registry.get("a").await.is_some());
    assert_eq!(closed.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn records_in_use_are_skipped_by_the_reaper() {
    let registry = SessionRegistry::new();
    let closed = Arc::new(AtomicUsize::new(0));
    registry.insert(stub_record("a", &closed)).await.unwrap();

    let record = registry.get("a").await.unwrap();
    let guard = record.lock().await;

    tokio::time::advance(Duration::from_secs(7200)).await;
    registry.cleanup_expired(Duration::from_secs(3600)).await;

    // the lock is held, so the record counts as active
    assert!(registry.get("a").await.is_some());
    drop(guard);
}

#[tokio::test(start_paused = true)]
async fn activity_timestamps_never_go_backwards() {
    let registry = SessionRegistry::new();
    let closed = Arc::new(AtomicUsize::new(0));
    registry.insert(stub_record("a", &closed)).await.unwrap();

    let record = registry.get("a").await.unwrap();
    let first = record.lock().await.last_activity();

    tokio::time::advance(Duration::from_secs(5)).await;
    record.lock().await.touch();
    let second = record.lock().await.last_activity();

    assert!(second >= first);
    assert_eq!(second.duration_since(first), Duration::from_secs(5));
}

#[tokio::test]
async fn close_all_releases_every_session() {
    let registry = SessionRegistry::new();
    let closed = Arc::new(AtomicUsize::new(0));
    registry.insert(stub_record("a", &closed)).await.unwrap();
    registry.insert(stub_record("b", &closed)).await.unwrap();

    registry.close_all().await;

    assert!(registry.is_empty().await);
    assert_eq!(closed.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn notification_ring_is_bounded() {
    let registry = SessionRegistry::new();
    let closed = Arc::new(AtomicUsize::new(0));
    registry.insert(stub_record("a", &closed)).await.unwrap();

    let record = registry.get("a").await.unwrap();
    let mut state = record.lock().await;
    state.set_subscribed(true);
    for i in 0..(NOTIFICATION_QUEUE_SIZE as i64 + 2) {
        state.push_notification(Notification {
            eventtime: i,
            content: format!("<event>{i}</event>"),
        });
    }

    let pending = state.take_notifications();
    assert_eq!(pending.len(), NOTIFICATION_QUEUE_SIZE);
    assert_eq!(pending[0].eventtime, 2);
    assert!(state.subscribed());
    assert!(state.take_notifications().is_empty());
}
