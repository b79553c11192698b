//! Scripted NETCONF client used by the broker tests.
//!
//! Connects hand out session ids from a queue, RPCs consume scripted replies
//! in order, and every observable interaction (connects, RPC bodies, frees,
//! overlapping use) is recorded for assertions.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use netconf_core::rpc::Rpc;
use netconf_core::{
    ConnectParams, Hello, NetconfClient, NetconfError, NetconfResult, NetconfSession,
    NetconfVersion, Notification, RpcReply, SessionStatus,
};
use secrecy::ExposeSecret;

pub type ScriptedReply = NetconfResult<RpcReply>;

#[derive(Debug, Clone)]
pub struct ConnectRecord {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub capabilities: Vec<String>,
}

#[derive(Default)]
pub struct MockState {
    pub session_ids: Mutex<VecDeque<String>>,
    pub replies: Mutex<VecDeque<ScriptedReply>>,
    pub history: Mutex<Vec<Notification>>,
    pub connects: Mutex<Vec<ConnectRecord>>,
    pub rpc_log: Mutex<Vec<String>>,
    pub freed: AtomicUsize,
    pub refuse_connects: AtomicBool,
    pub rpc_delay_ms: AtomicU64,
    pub in_flight: AtomicBool,
    pub overlapped: AtomicBool,
}

#[derive(Clone)]
pub struct MockClient {
    pub state: Arc<MockState>,
}

impl MockClient {
    pub fn new() -> Self {
        Self {
            state: Arc::new(MockState::default()),
        }
    }

    pub fn with_session_ids<I>(ids: I) -> Self
    where
        I: IntoIterator<Item = &'static str>,
    {
        let client = Self::new();
        client
            .state
            .session_ids
            .lock()
            .unwrap()
            .extend(ids.into_iter().map(str::to_string));
        client
    }

    pub fn script(&self, reply: ScriptedReply) {
        self.state.replies.lock().unwrap().push_back(reply);
    }

    pub fn script_ok(&self) {
        self.script(Ok(RpcReply::Ok));
    }

    pub fn script_data(&self, data: &str) {
        self.script(Ok(RpcReply::Data(data.to_string())));
    }

    pub fn push_history(&self, eventtime: i64, content: &str) {
        self.state.history.lock().unwrap().push(Notification {
            eventtime,
            content: content.to_string(),
        });
    }

    pub fn set_rpc_delay(&self, delay: Duration) {
        self.state
            .rpc_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn refuse_connects(&self) {
        self.state.refuse_connects.store(true, Ordering::SeqCst);
    }

    pub fn freed(&self) -> usize {
        self.state.freed.load(Ordering::SeqCst)
    }

    pub fn overlapped(&self) -> bool {
        self.state.overlapped.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> Vec<ConnectRecord> {
        self.state.connects.lock().unwrap().clone()
    }

    pub fn rpc_log(&self) -> Vec<String> {
        self.state.rpc_log.lock().unwrap().clone()
    }
}

impl Default for MockClient {
    fn default() -> Self {
        Self::new()
    }
}

pub struct MockSession {
    state: Arc<MockState>,
    hello: Hello,
    status: SessionStatus,
}

#[async_trait]
impl NetconfClient for MockClient {
    type Session = MockSession;

    async fn connect(&self, params: ConnectParams) -> NetconfResult<MockSession> {
        if self.state.refuse_connects.load(Ordering::SeqCst) {
            return Err(NetconfError::AuthFailed {
                user: params.user.clone(),
                host: params.host.clone(),
            });
        }

        self.state.connects.lock().unwrap().push(ConnectRecord {
            host: params.host.clone(),
            port: params.port,
            user: params.user.clone(),
            password: params.password.expose_secret().to_string(),
            capabilities: params.capabilities.clone(),
        });

        let session_id = self
            .state
            .session_ids
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| "1".to_string());

        Ok(MockSession {
            state: self.state.clone(),
            hello: Hello {
                session_id,
                version: NetconfVersion::V1_1,
                host: params.host,
                port: params.port.to_string(),
                user: params.user,
                capabilities: vec![
                    "urn:ietf:params:netconf:base:1.0".to_string(),
                    "urn:ietf:params:netconf:base:1.1".to_string(),
                ],
            },
            status: SessionStatus::Working,
        })
    }
}

#[async_trait]
impl NetconfSession for MockSession {
    fn hello(&self) -> &Hello {
        &self.hello
    }

    fn status(&self) -> SessionStatus {
        self.status
    }

    async fn rpc(&mut self, rpc: Rpc) -> NetconfResult<RpcReply> {
        if self.state.in_flight.swap(true, Ordering::SeqCst) {
            self.state.overlapped.store(true, Ordering::SeqCst);
        }
        let delay = self.state.rpc_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.state.rpc_log.lock().unwrap().push(rpc.body().to_string());
        let reply = self
            .state
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(RpcReply::Ok));
        self.state.in_flight.store(false, Ordering::SeqCst);

        if let Err(err) = &reply {
            if err.is_fatal() {
                self.status = SessionStatus::Broken;
            }
        }
        reply
    }

    async fn open_side_channel(&mut self) -> NetconfResult<Self> {
        let mut hello = self.hello.clone();
        hello.session_id = format!("{}-side", hello.session_id);
        hello.capabilities.push("urn:mock:reloaded".to_string());
        Ok(MockSession {
            state: self.state.clone(),
            hello,
            status: SessionStatus::Working,
        })
    }

    async fn collect_notifications(&mut self, sink: &mut Vec<Notification>) -> NetconfResult<()> {
        sink.extend(self.state.history.lock().unwrap().iter().cloned());
        Ok(())
    }

    async fn close(&mut self) {
        self.status = SessionStatus::Broken;
        self.state.freed.fetch_add(1, Ordering::SeqCst);
    }
}
