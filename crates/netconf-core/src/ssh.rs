//! russh-backed NETCONF transport.
//!
//! Drives the `netconf` SSH subsystem: password-first authentication with a
//! keyboard-interactive fallback that answers every prompt with the same
//! password, hello exchange, and version-dependent message framing
//! (`]]>]]>` end-of-message for 1.0, chunked for 1.1).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use russh::client::{self, AuthResult, KeyboardInteractiveAuthResponse};
use russh::keys::PublicKey;
use russh::{ChannelStream, Disconnect};
use secrecy::ExposeSecret;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tracing::{debug, info, warn};

use crate::client::{ConnectParams, NetconfClient, NetconfSession, Notification, RpcReply, SessionStatus};
use crate::error::{NetconfError, NetconfResult};
use crate::frame::{self, FrameError};
use crate::hello::{Hello, NetconfVersion, BASE_1_0, BASE_1_1};
use crate::rpc::{self, Rpc, BASE_NS};
use crate::xml;

const EOM: &[u8] = b"]]>]]>";

type ChannelReader = BufReader<ReadHalf<ChannelStream<client::Msg>>>;
type ChannelWriter = WriteHalf<ChannelStream<client::Msg>>;

/// Client handler that accepts any host key; the brokered model trusts the
/// endpoint named by the caller.
#[derive(Debug, Clone)]
struct AcceptingHandler;

impl client::Handler for AcceptingHandler {
    type Error = NetconfError;

    fn check_server_key(
        &mut self,
        _server_public_key: &PublicKey,
    ) -> impl std::future::Future<Output = Result<bool, Self::Error>> + Send {
        async { Ok(true) }
    }
}

/// `NetconfClient` implementation over russh.
pub struct SshNetconfClient {
    config: Arc<client::Config>,
}

impl SshNetconfClient {
    pub fn new() -> Self {
        let config = client::Config {
            keepalive_interval: Some(Duration::from_secs(30)),
            keepalive_max: 3,
            ..Default::default()
        };
        Self {
            config: Arc::new(config),
        }
    }
}

impl Default for SshNetconfClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NetconfClient for SshNetconfClient {
    type Session = SshNetconfSession;

    async fn connect(&self, params: ConnectParams) -> NetconfResult<Self::Session> {
        debug!(host = %params.host, port = params.port, user = %params.user, "opening SSH transport");
        let mut handle = client::connect(
            self.config.clone(),
            (params.host.as_str(), params.port),
            AcceptingHandler,
        )
        .await
        .map_err(|err| match err {
            NetconfError::Ssh(source) => NetconfError::Connect {
                host: params.host.clone(),
                port: params.port,
                source,
            },
            other => other,
        })?;

        let password = params.password.expose_secret().to_string();
        match handle
            .authenticate_password(params.user.clone(), password.clone())
            .await?
        {
            AuthResult::Success => {}
            AuthResult::Failure { .. } => {
                debug!(user = %params.user, "password rejected, trying keyboard-interactive");
                authenticate_interactive(&mut handle, &params.user, &params.host, &password).await?;
            }
        }

        let handle = Arc::new(handle);
        let session = open_netconf_channel(
            handle,
            &params.host,
            params.port,
            &params.user,
            &params.capabilities,
            true,
        )
        .await?;
        info!(
            host = %params.host,
            port = params.port,
            sid = %session.hello.session_id,
            version = %session.hello.version,
            "netconf session established"
        );
        Ok(session)
    }
}

async fn authenticate_interactive(
    handle: &mut client::Handle<AcceptingHandler>,
    user: &str,
    host: &str,
    password: &str,
) -> NetconfResult<()> {
    let mut response = handle
        .authenticate_keyboard_interactive_start(user.to_string(), Option::<String>::None)
        .await?;
    loop {
        match response {
            KeyboardInteractiveAuthResponse::Success => return Ok(()),
            KeyboardInteractiveAuthResponse::Failure { .. } => {
                return Err(NetconfError::AuthFailed {
                    user: user.to_string(),
                    host: host.to_string(),
                });
            }
            KeyboardInteractiveAuthResponse::InfoRequest { prompts, .. } => {
                // every prompt gets the session password
                let answers = vec![password.to_string(); prompts.len()];
                response = handle.authenticate_keyboard_interactive_respond(answers).await?;
            }
        }
    }
}

async fn open_netconf_channel(
    handle: Arc<client::Handle<AcceptingHandler>>,
    host: &str,
    port: u16,
    user: &str,
    client_capabilities: &[String],
    owns_transport: bool,
) -> NetconfResult<SshNetconfSession> {
    let channel = handle.channel_open_session().await?;
    channel.request_subsystem(true, "netconf").await?;
    let stream = channel.into_stream();
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);
    let mut writer = write_half;

    let capabilities: Vec<String> = if client_capabilities.is_empty() {
        vec![BASE_1_0.to_string(), BASE_1_1.to_string()]
    } else {
        client_capabilities.to_vec()
    };

    let mut client_hello = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><hello xmlns="{BASE_NS}"><capabilities>"#
    );
    for capability in &capabilities {
        client_hello.push_str(&format!(
            "<capability>{}</capability>",
            quick_xml::escape::escape(capability.as_str())
        ));
    }
    client_hello.push_str("</capabilities></hello>");

    // hellos are always end-of-message framed, whatever gets negotiated
    writer.write_all(client_hello.as_bytes()).await?;
    writer.write_all(EOM).await?;
    writer.flush().await?;

    let peer_hello = read_until_eom(&mut reader).await?;
    let peer_hello = String::from_utf8(peer_hello)
        .map_err(|_| NetconfError::Hello("hello is not valid UTF-8".to_string()))?;
    let (session_id, peer_capabilities) = xml::parse_peer_hello(&peer_hello)?;

    let client_1_1 = capabilities.iter().any(|c| c == BASE_1_1);
    let client_1_0 = capabilities.iter().any(|c| c == BASE_1_0);
    let peer_1_1 = peer_capabilities.iter().any(|c| c.starts_with(BASE_1_1));
    let peer_1_0 = peer_capabilities.iter().any(|c| c.starts_with(BASE_1_0));
    let version = if client_1_1 && peer_1_1 {
        NetconfVersion::V1_1
    } else if client_1_0 && peer_1_0 {
        NetconfVersion::V1_0
    } else {
        return Err(NetconfError::Hello("no common base protocol version".to_string()));
    };

    Ok(SshNetconfSession {
        handle,
        reader,
        writer,
        hello: Hello {
            session_id,
            version,
            host: host.to_string(),
            port: port.to_string(),
            user: user.to_string(),
            capabilities: peer_capabilities,
        },
        port,
        client_capabilities: capabilities,
        message_id: 0,
        broken: false,
        owns_transport,
    })
}

/// One NETCONF session over an SSH subsystem channel. Side channels share
/// the SSH connection of the session they were opened from.
pub struct SshNetconfSession {
    handle: Arc<client::Handle<AcceptingHandler>>,
    reader: ChannelReader,
    writer: ChannelWriter,
    hello: Hello,
    port: u16,
    client_capabilities: Vec<String>,
    message_id: u64,
    broken: bool,
    owns_transport: bool,
}

impl SshNetconfSession {
    async fn send(&mut self, payload: &[u8]) -> NetconfResult<()> {
        match self.hello.version {
            NetconfVersion::V1_1 => frame::write_message(&mut self.writer, payload).await?,
            NetconfVersion::V1_0 => {
                self.writer.write_all(payload).await?;
                self.writer.write_all(EOM).await?;
                self.writer.flush().await?;
            }
        }
        Ok(())
    }

    async fn receive(&mut self) -> NetconfResult<String> {
        let raw = match self.hello.version {
            NetconfVersion::V1_1 => frame::read_message(&mut self.reader).await?,
            NetconfVersion::V1_0 => read_until_eom(&mut self.reader).await?,
        };
        String::from_utf8(raw).map_err(|_| NetconfError::Reply("reply is not valid UTF-8".to_string()))
    }
}

#[async_trait]
impl NetconfSession for SshNetconfSession {
    fn hello(&self) -> &Hello {
        &self.hello
    }

    fn status(&self) -> SessionStatus {
        if self.broken {
            SessionStatus::Broken
        } else {
            SessionStatus::Working
        }
    }

    async fn rpc(&mut self, rpc: Rpc) -> NetconfResult<RpcReply> {
        if self.broken {
            return Err(NetconfError::SessionClosed);
        }
        self.message_id += 1;
        let envelope = rpc.into_envelope(self.message_id);

        let outcome = async {
            self.send(envelope.as_bytes()).await?;
            self.receive().await
        }
        .await;

        match outcome {
            Ok(reply) => classify_reply(&reply),
            Err(err) => {
                if err.is_fatal() {
                    self.broken = true;
                }
                Err(err)
            }
        }
    }

    async fn open_side_channel(&mut self) -> NetconfResult<Self> {
        debug!(sid = %self.hello.session_id, "opening side channel");
        open_netconf_channel(
            self.handle.clone(),
            &self.hello.host,
            self.port,
            &self.hello.user,
            &self.client_capabilities,
            false,
        )
        .await
    }

    async fn collect_notifications(&mut self, sink: &mut Vec<Notification>) -> NetconfResult<()> {
        loop {
            let message = match self.receive().await {
                Ok(message) => message,
                Err(NetconfError::Frame(FrameError::Closed)) => break,
                Err(err) => {
                    if err.is_fatal() {
                        self.broken = true;
                    }
                    return Err(err);
                }
            };

            if xml::contains_element(&message, "replayComplete")
                || xml::contains_element(&message, "notificationComplete")
            {
                break;
            }

            if let Some(inner) = xml::element_inner(&message, "notification") {
                let eventtime = xml::element_inner(&message, "eventTime")
                    .and_then(|text| DateTime::parse_from_rfc3339(text.trim()).ok())
                    .map(|time| time.timestamp())
                    .unwrap_or_else(|| Utc::now().timestamp());
                sink.push(Notification {
                    eventtime,
                    content: strip_event_time(&inner),
                });
            }
        }
        Ok(())
    }

    async fn close(&mut self) {
        if !self.broken {
            self.message_id += 1;
            let farewell = rpc::close_session().into_envelope(self.message_id);
            if self.send(farewell.as_bytes()).await.is_ok() {
                let _ = self.receive().await;
            }
        }
        self.broken = true;
        if self.owns_transport {
            if let Err(err) = self.handle.disconnect(Disconnect::ByApplication, "", "").await {
                warn!(error = %err, "disconnect failed");
            }
        }
    }
}

fn classify_reply(reply: &str) -> NetconfResult<RpcReply> {
    if let Some(error) = xml::parse_rpc_error(reply) {
        return Err(NetconfError::Rpc(error));
    }
    if let Some(data) = xml::element_inner(reply, "data") {
        return Ok(RpcReply::Data(data));
    }
    if xml::contains_element(reply, "ok") {
        return Ok(RpcReply::Ok);
    }
    // operation-specific reply content, handed over as-is
    Ok(RpcReply::Data(
        xml::element_inner(reply, "rpc-reply").unwrap_or_else(|| reply.to_string()),
    ))
}

/// Notification content without its `eventTime` child, which travels in the
/// separate `eventtime` field.
fn strip_event_time(inner: &str) -> String {
    match (inner.find("<eventTime"), inner.find("</eventTime>")) {
        (Some(start), Some(end)) if start < end => {
            let mut content = String::with_capacity(inner.len());
            content.push_str(&inner[..start]);
            content.push_str(&inner[end + "</eventTime>".len()..]);
            content.trim().to_string()
        }
        _ => inner.trim().to_string(),
    }
}

async fn read_until_eom<R>(reader: &mut R) -> NetconfResult<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        let byte = match reader.read_u8().await {
            Ok(byte) => byte,
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(NetconfError::Frame(if buf.is_empty() {
                    FrameError::Closed
                } else {
                    FrameError::UnexpectedEof
                }));
            }
            Err(err) => return Err(NetconfError::Io(err)),
        };
        buf.push(byte);
        if buf.ends_with(EOM) {
            buf.truncate(buf.len() - EOM.len());
            return Ok(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_ok_data_and_error_replies() {
        assert_eq!(
            classify_reply(r#"<rpc-reply message-id="1"><ok/></rpc-reply>"#).unwrap(),
            RpcReply::Ok
        );

        assert_eq!(
            classify_reply(r#"<rpc-reply><data><x>1</x></data></rpc-reply>"#).unwrap(),
            RpcReply::Data("<x>1</x>".to_string())
        );

        let err = classify_reply(
            r#"<rpc-reply><rpc-error><error-tag>in-use</error-tag></rpc-error></rpc-reply>"#,
        )
        .unwrap_err();
        match err {
            NetconfError::Rpc(error) => assert_eq!(error.tag.as_deref(), Some("in-use")),
            other => panic!("expected rpc-error, got {other:?}"),
        }
    }

    #[test]
    fn unrecognized_replies_pass_through_as_data() {
        let reply = classify_reply(r#"<rpc-reply><something>7</something></rpc-reply>"#).unwrap();
        assert_eq!(reply, RpcReply::Data("<something>7</something>".to_string()));
    }

    #[tokio::test]
    async fn reads_end_of_message_framing() {
        let mut input: &[u8] = b"<hello/>]]>]]>";
        assert_eq!(read_until_eom(&mut input).await.unwrap(), b"<hello/>");

        let mut truncated: &[u8] = b"<hello/>]]>";
        assert!(matches!(
            read_until_eom(&mut truncated).await,
            Err(NetconfError::Frame(FrameError::UnexpectedEof))
        ));

        let mut empty: &[u8] = b"";
        assert!(matches!(
            read_until_eom(&mut empty).await,
            Err(NetconfError::Frame(FrameError::Closed))
        ));
    }

    #[test]
    fn strips_event_time_from_notification_content() {
        let inner = "<eventTime>2024-05-01T10:00:00Z</eventTime><event><x/></event>";
        assert_eq!(strip_event_time(inner), "<event><x/></event>");
        assert_eq!(strip_event_time("<event/>"), "<event/>");
    }
}
