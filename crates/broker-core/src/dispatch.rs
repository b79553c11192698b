//! Operation dispatch: framed JSON requests in, JSON replies out.
//!
//! Handlers return `Result<Value, ReplyError>` and the envelope assembler
//! serializes whichever side comes back, so success is never encoded as a
//! bare status integer. Session-bound handlers clone the record `Arc` out of
//! the registry, drop the map guard, and only then take the record lock that
//! serializes all use of the underlying NETCONF session.

use std::sync::Arc;

use chrono::{Duration as TimeDelta, Utc};
use ncb_types::message::{self, Operation};
use netconf_core::rpc::{self, CopySource, DefaultOperation, ErrorOption, Store, TestOption, WithDefaults};
use netconf_core::{
    ConnectParams, NetconfClient, NetconfError, NetconfSession, RpcError, RpcReply, SessionStatus,
};
use secrecy::SecretString;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::registry::{self, SessionRecord, SessionRegistry};

/// What the connection loop should do after a request.
#[derive(Debug)]
pub enum Outcome {
    /// Send the reply and keep serving.
    Reply(Value),
    /// Send the reply, then drop the connection.
    ReplyThenClose(Value),
    /// Drop the connection without replying.
    Close,
}

/// A failed operation on its way into the error reply object.
#[derive(Debug)]
pub struct ReplyError {
    message: String,
    rpc: Option<RpcError>,
}

impl ReplyError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            rpc: None,
        }
    }

    fn invalid_session() -> Self {
        Self::new(message::ERR_INVALID_SESSION)
    }

    fn from_netconf(err: NetconfError) -> Self {
        match err {
            NetconfError::Rpc(rpc) => {
                let message = rpc
                    .message
                    .clone()
                    .unwrap_or_else(|| "NETCONF operation failed.".to_string());
                Self {
                    message,
                    rpc: Some(rpc),
                }
            }
            other => Self::new(other.to_string()),
        }
    }

    fn into_value(self) -> Value {
        let mut reply = json!({
            "type": message::REPLY_ERROR,
            "error-message": self.message,
        });
        if let (Some(object), Some(rpc)) = (reply.as_object_mut(), self.rpc) {
            insert_opt(object, "error-tag", rpc.tag);
            insert_opt(object, "error-type", rpc.error_type);
            insert_opt(object, "error-severity", rpc.severity);
            insert_opt(object, "error-app-tag", rpc.app_tag);
            insert_opt(object, "error-path", rpc.path);
            insert_opt(object, "bad-attribute", rpc.bad_attribute);
            insert_opt(object, "bad-element", rpc.bad_element);
            insert_opt(object, "bad-namespace", rpc.bad_namespace);
            insert_opt(object, "session-id", rpc.session_id);
        }
        reply
    }
}

fn insert_opt(object: &mut serde_json::Map<String, Value>, key: &str, value: Option<String>) {
    if let Some(value) = value {
        object.insert(key.to_string(), Value::String(value));
    }
}

fn parse_params<T: DeserializeOwned>(request: &Value) -> Result<T, ReplyError> {
    serde_json::from_value(request.clone()).map_err(|err| {
        debug!(error = %err, "request parameters did not deserialize");
        ReplyError::new("Invalid request parameters.")
    })
}

#[derive(Clone, Copy)]
enum StoreRole {
    Source,
    Target,
}

/// Strict datastore token parsing; anything outside the four known names is
/// refused with the role-specific message.
fn parse_store(token: &str, url: Option<&str>, role: StoreRole) -> Result<Store, ReplyError> {
    match token {
        "running" => Ok(Store::Running),
        "startup" => Ok(Store::Startup),
        "candidate" => Ok(Store::Candidate),
        "url" => Ok(Store::Url(url.unwrap_or_default().to_string())),
        _ => Err(ReplyError::new(match role {
            StoreRole::Source => "Invalid source repository type requested.",
            StoreRole::Target => "Invalid target repository type requested.",
        })),
    }
}

/// Routes decoded requests to the session registry and the NETCONF client.
pub struct Dispatcher<C: NetconfClient> {
    client: Arc<C>,
    registry: SessionRegistry<C::Session>,
}

impl<C: NetconfClient> Dispatcher<C> {
    pub fn new(client: Arc<C>, registry: SessionRegistry<C::Session>) -> Self {
        Self { client, registry }
    }

    pub fn registry(&self) -> &SessionRegistry<C::Session> {
        &self.registry
    }

    /// Handle one framed request payload.
    pub async fn dispatch(&self, raw: &[u8]) -> Outcome {
        let request: Value = match serde_json::from_slice(raw) {
            Ok(request) => request,
            Err(err) => {
                debug!(error = %err, "dropping connection after unparsable request");
                return Outcome::Close;
            }
        };

        let code = request.get("type").and_then(Value::as_i64).unwrap_or(-1);
        if code == Operation::Connect.code() {
            let reply = self
                .handle_connect(&request)
                .await
                .unwrap_or_else(ReplyError::into_value);
            return Outcome::Reply(reply);
        }

        // every other operation must name a session; a caller that cannot is
        // cut off so the slot frees up for somebody else
        let Some(session) = request.get("session").and_then(Value::as_str).map(str::to_string) else {
            return Outcome::ReplyThenClose(message::reply_error(message::ERR_MISSING_SESSION));
        };

        let Some(operation) = Operation::from_code(code) else {
            debug!(code, "unknown operation requested");
            return Outcome::Reply(message::reply_error(message::ERR_UNSUPPORTED));
        };

        debug!(?operation, session = %session, "dispatching request");
        let result = match operation {
            Operation::Connect => Err(ReplyError::new(message::ERR_UNSUPPORTED)),
            Operation::Disconnect => self.handle_disconnect(&session).await,
            Operation::Get => self.handle_get(&session, &request).await,
            Operation::GetConfig => self.handle_get_config(&session, &request).await,
            Operation::EditConfig => self.handle_edit_config(&session, &request).await,
            Operation::CopyConfig => self.handle_copy_config(&session, &request).await,
            Operation::DeleteConfig => self.handle_delete_config(&session, &request).await,
            Operation::Lock => self.handle_lock(&session, &request).await,
            Operation::Unlock => self.handle_unlock(&session, &request).await,
            Operation::Kill => self.handle_kill(&session, &request).await,
            Operation::Info => self.handle_info(&session).await,
            Operation::Generic => self.handle_generic(&session, &request).await,
            Operation::GetSchema => self.handle_get_schema(&session, &request).await,
            Operation::ReloadHello => self.handle_reload_hello(&session).await,
            Operation::NtfGetHistory => self.handle_notification_history(&session, &request).await,
            Operation::Validate => self.handle_validate(&session, &request).await,
        };
        Outcome::Reply(result.unwrap_or_else(ReplyError::into_value))
    }

    async fn handle_connect(&self, request: &Value) -> Result<Value, ReplyError> {
        let params: message::ConnectRequest = parse_params(request)?;
        let (Some(host), Some(user)) = (params.host, params.user) else {
            debug!("connect request without host or user");
            return Err(ReplyError::new("Connecting NETCONF server failed."));
        };
        let port_text = params.port.unwrap_or_else(|| "830".to_string());
        let Ok(port) = port_text.parse::<u16>() else {
            debug!(port = %port_text, "connect request with unusable port");
            return Err(ReplyError::new("Connecting NETCONF server failed."));
        };

        info!(host = %host, port, user = %user, "connecting to NETCONF server");
        let connect = ConnectParams {
            host: host.clone(),
            port,
            user: user.clone(),
            password: SecretString::new(params.pass.unwrap_or_default().into_boxed_str()),
            capabilities: params.capabilities.unwrap_or_default(),
        };

        let session = self.client.connect(connect).await.map_err(|err| match err {
            NetconfError::Rpc(_) => ReplyError::from_netconf(err),
            other => {
                warn!(host = %host, port, error = %other, "connection attempt failed");
                ReplyError::new("Connecting NETCONF server failed.")
            }
        })?;

        let hello = session.hello().clone();
        let key = registry::session_key(&host, &port_text, &hello.session_id);
        let record = Arc::new(SessionRecord::new(key.clone(), session, hello));
        if let Err(err) = self.registry.insert(record.clone()).await {
            warn!(error = %err, "could not register new session");
            record.close().await;
            return Err(ReplyError::new("Internal: Session registration failed."));
        }

        info!(session = %key, "netconf session registered");
        Ok(message::reply_ok_with_session(&key))
    }

    async fn handle_disconnect(&self, key: &str) -> Result<Value, ReplyError> {
        match self.registry.remove(key).await {
            Some(record) => {
                info!(session = %key, "closing netconf session on request");
                record.close().await;
                Ok(message::reply_ok())
            }
            None => Err(ReplyError::invalid_session()),
        }
    }

    async fn handle_get(&self, key: &str, request: &Value) -> Result<Value, ReplyError> {
        let params: message::GetRequest = parse_params(request)?;
        let rpc = rpc::get(params.filter.as_deref(), Some(WithDefaults::ReportAll));
        match self.run_rpc(key, rpc).await? {
            RpcReply::Data(data) => Ok(message::reply_data(&data)),
            RpcReply::Ok => Err(ReplyError::new("Get information failed.")),
        }
    }

    async fn handle_get_config(&self, key: &str, request: &Value) -> Result<Value, ReplyError> {
        let params: message::GetConfigRequest = parse_params(request)?;
        let Some(source) = params.source.as_deref() else {
            return Err(ReplyError::new("Invalid source repository type requested."));
        };
        let source = parse_store(source, None, StoreRole::Source)?;
        let rpc = rpc::get_config(&source, params.filter.as_deref(), Some(WithDefaults::ReportAll));
        match self.run_rpc(key, rpc).await? {
            RpcReply::Data(data) => Ok(message::reply_data(&data)),
            RpcReply::Ok => Err(ReplyError::new("Get configuration operation failed.")),
        }
    }

    async fn handle_edit_config(&self, key: &str, request: &Value) -> Result<Value, ReplyError> {
        let params: message::EditConfigRequest = parse_params(request)?;
        let Some(target) = params.target.as_deref() else {
            return Err(ReplyError::new("Invalid target repository type requested."));
        };
        let target = parse_store(target, None, StoreRole::Target)?;
        let Some(config) = params.config else {
            return Err(ReplyError::new("Invalid config data parameter."));
        };

        let default_operation = match params.default_operation.as_deref() {
            None => None,
            Some("merge") => Some(DefaultOperation::Merge),
            Some("replace") => Some(DefaultOperation::Replace),
            Some("none") => Some(DefaultOperation::None),
            Some(_) => return Err(ReplyError::new("Invalid default-operation parameter.")),
        };
        let error_option = match params.error_option.as_deref() {
            None => None,
            Some("continue-on-error") => Some(ErrorOption::ContinueOnError),
            Some("stop-on-error") => Some(ErrorOption::StopOnError),
            Some("rollback-on-error") => Some(ErrorOption::RollbackOnError),
            Some(_) => return Err(ReplyError::new("Invalid error-option parameter.")),
        };

        let rpc = rpc::edit_config(
            &target,
            &config,
            default_operation,
            error_option,
            Some(TestOption::TestThenSet),
        );
        self.ok_or_data(key, rpc).await
    }

    async fn handle_copy_config(&self, key: &str, request: &Value) -> Result<Value, ReplyError> {
        let params: message::CopyConfigRequest = parse_params(request)?;
        let Some(target_token) = params.target.as_deref() else {
            return Err(ReplyError::new("Invalid target repository type requested."));
        };
        let url = params.url.as_deref();
        let target_is_url = target_token == "url";
        let source_is_url = params.source.as_deref() == Some("url");
        if target_is_url && source_is_url {
            return Err(ReplyError::new("Only one of source and target may be a URL."));
        }

        let target = parse_store(target_token, target_is_url.then_some(url).flatten(), StoreRole::Target)?;
        // an explicit source wins over inline config data
        let source = match params.source.as_deref() {
            Some(token) => CopySource::Store(parse_store(
                token,
                source_is_url.then_some(url).flatten(),
                StoreRole::Source,
            )?),
            None => match params.config {
                Some(config) => CopySource::Config(config),
                None => {
                    return Err(ReplyError::new(
                        "invalid input parameters - source and config is required.",
                    ));
                }
            },
        };

        self.ok_or_data(key, rpc::copy_config(&target, &source)).await
    }

    async fn handle_delete_config(&self, key: &str, request: &Value) -> Result<Value, ReplyError> {
        let params: message::TargetRequest = parse_params(request)?;
        let Some(target_token) = params.target.as_deref() else {
            return Err(ReplyError::new("Invalid target repository type requested."));
        };
        if target_token == "url" && params.url.is_none() {
            return Err(ReplyError::new("Missing url parameter."));
        }
        let target = parse_store(target_token, params.url.as_deref(), StoreRole::Target)?;
        self.ok_or_data(key, rpc::delete_config(&target)).await
    }

    async fn handle_lock(&self, key: &str, request: &Value) -> Result<Value, ReplyError> {
        let target = self.parse_target(request)?;
        self.ok_or_data(key, rpc::lock(&target)).await
    }

    async fn handle_unlock(&self, key: &str, request: &Value) -> Result<Value, ReplyError> {
        let target = self.parse_target(request)?;
        self.ok_or_data(key, rpc::unlock(&target)).await
    }

    async fn handle_validate(&self, key: &str, request: &Value) -> Result<Value, ReplyError> {
        let target = self.parse_target(request)?;
        self.ok_or_data(key, rpc::validate(&target)).await
    }

    fn parse_target(&self, request: &Value) -> Result<Store, ReplyError> {
        let params: message::TargetRequest = parse_params(request)?;
        let Some(target) = params.target.as_deref() else {
            return Err(ReplyError::new("Invalid target repository type requested."));
        };
        parse_store(target, params.url.as_deref(), StoreRole::Target)
    }

    async fn handle_kill(&self, key: &str, request: &Value) -> Result<Value, ReplyError> {
        let params: message::KillRequest = parse_params(request)?;
        let Some(session_id) = params.session_id.as_deref() else {
            return Err(ReplyError::new("Missing session-id parameter."));
        };
        self.ok_or_data(key, rpc::kill_session(session_id)).await
    }

    async fn handle_generic(&self, key: &str, request: &Value) -> Result<Value, ReplyError> {
        let params: message::GenericRequest = parse_params(request)?;
        let Some(content) = params.content.as_deref() else {
            return Err(ReplyError::new("Missing content parameter."));
        };
        self.ok_or_data(key, rpc::generic(content)).await
    }

    async fn handle_get_schema(&self, key: &str, request: &Value) -> Result<Value, ReplyError> {
        let params: message::GetSchemaRequest = parse_params(request)?;
        let Some(identifier) = params.identifier.as_deref() else {
            return Err(ReplyError::new("No identifier for get-schema supplied."));
        };
        let rpc = rpc::get_schema(identifier, params.version.as_deref(), params.format.as_deref());
        match self.run_rpc(key, rpc).await? {
            RpcReply::Data(data) => Ok(message::reply_data(&data)),
            RpcReply::Ok => Err(ReplyError::new("Get models operation failed.")),
        }
    }

    async fn handle_info(&self, key: &str) -> Result<Value, ReplyError> {
        let Some(record) = self.registry.get(key).await else {
            return Err(ReplyError::invalid_session());
        };
        let state = record.lock().await;
        if record.is_closed() {
            return Err(ReplyError::invalid_session());
        }
        // the caller gets a serialized snapshot, never the cached object
        serde_json::to_value(state.hello())
            .map_err(|err| ReplyError::new(format!("Internal: {err}")))
    }

    async fn handle_reload_hello(&self, key: &str) -> Result<Value, ReplyError> {
        let Some(record) = self.registry.get(key).await else {
            return Err(ReplyError::invalid_session());
        };
        let mut state = record.lock().await;
        if record.is_closed() {
            return Err(ReplyError::invalid_session());
        }
        let original_sid = state.hello().session_id.clone();
        let Some(session) = state.session_mut() else {
            return Err(ReplyError::invalid_session());
        };

        let mut side = session
            .open_side_channel()
            .await
            .map_err(|_| ReplyError::new("Reload was unsuccessful, connection failed."))?;
        let mut hello = side.hello().clone();
        side.close().await;

        // the front-end handle was derived from the original device id
        hello.session_id = original_sid;
        state.set_hello(hello);
        serde_json::to_value(state.hello())
            .map_err(|err| ReplyError::new(format!("Internal: {err}")))
    }

    async fn handle_notification_history(&self, key: &str, request: &Value) -> Result<Value, ReplyError> {
        let params: message::HistoryRequest = parse_params(request)?;
        let now = Utc::now();
        let start = now + TimeDelta::seconds(params.from);
        let stop = now + TimeDelta::seconds(params.to);
        debug!(from = params.from, to = params.to, "replaying notification history");

        let Some(record) = self.registry.get(key).await else {
            return Err(ReplyError::invalid_session());
        };
        let mut state = record.lock().await;
        if record.is_closed() {
            return Err(ReplyError::invalid_session());
        }
        let Some(session) = state.session_mut() else {
            return Err(ReplyError::invalid_session());
        };

        let mut side = session.open_side_channel().await.map_err(|_| {
            ReplyError::new("Get history of notification was unsuccessful, connection failed.")
        })?;

        if let Err(err) = side.rpc(rpc::subscribe(None, None, Some(start), Some(stop))).await {
            side.close().await;
            return Err(ReplyError::from_netconf(err));
        }

        let mut sink = Vec::new();
        let outcome = side.collect_notifications(&mut sink).await;
        side.close().await;
        if let Err(err) = outcome {
            return Err(ReplyError::from_netconf(err));
        }

        debug!(count = sink.len(), "notification replay finished");
        Ok(json!({ "notifications": sink }))
    }

    /// Operations whose success is `<ok/>`, tolerating peers that answer
    /// with data instead.
    async fn ok_or_data(&self, key: &str, rpc: rpc::Rpc) -> Result<Value, ReplyError> {
        match self.run_rpc(key, rpc).await? {
            RpcReply::Ok => Ok(message::reply_ok()),
            RpcReply::Data(data) => Ok(message::reply_data(&data)),
        }
    }

    /// Look the session up, serialize on its record lock, run one RPC, and
    /// keep the activity timestamp honest. A broken transport removes the
    /// session from the registry on the way out.
    async fn run_rpc(&self, key: &str, rpc: rpc::Rpc) -> Result<RpcReply, ReplyError> {
        let Some(record) = self.registry.get(key).await else {
            return Err(ReplyError::invalid_session());
        };
        let mut state = record.lock().await;
        if record.is_closed() {
            return Err(ReplyError::invalid_session());
        }
        let Some(session) = state.session_mut() else {
            return Err(ReplyError::invalid_session());
        };

        match session.rpc(rpc).await {
            Ok(reply) => {
                state.touch();
                Ok(reply)
            }
            Err(err) => {
                let broken = err.is_fatal() || session.status() == SessionStatus::Broken;
                drop(state);
                if broken {
                    warn!(session = %key, error = %err, "netconf transport broke, discarding session");
                    self.registry.remove(key).await;
                    record.close().await;
                }
                Err(ReplyError::from_netconf(err))
            }
        }
    }
}
