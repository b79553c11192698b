//! Per-connection request/reply loop.
//!
//! One front-end connection is one task: read a framed request, dispatch it,
//! write the framed reply, repeat. There is no pipelining; replies leave in
//! request order. Framing or JSON violations end the connection without a
//! reply, shutdown ends it after the in-flight operation.

use std::sync::Arc;

use netconf_core::frame::{self, FrameError};
use netconf_core::NetconfClient;
use tokio::io::{AsyncWrite, BufReader};
use tokio::net::UnixStream;
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::dispatch::{Dispatcher, Outcome};

/// Serve one accepted front-end connection until the peer hangs up, a
/// protocol error occurs, or shutdown is signalled.
pub async fn serve<C: NetconfClient>(
    stream: UnixStream,
    dispatcher: Arc<Dispatcher<C>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    loop {
        let payload = tokio::select! {
            _ = shutdown.changed() => {
                debug!("connection closing for shutdown");
                break;
            }
            message = frame::read_message(&mut reader) => match message {
                Ok(payload) => payload,
                Err(FrameError::Closed) => {
                    trace!("peer closed the connection");
                    break;
                }
                Err(err) => {
                    debug!(error = %err, "dropping connection after framing error");
                    break;
                }
            }
        };

        match dispatcher.dispatch(&payload).await {
            Outcome::Reply(reply) => {
                if write_reply(&mut write_half, &reply).await.is_err() {
                    debug!("peer went away while a reply was pending");
                    break;
                }
            }
            Outcome::ReplyThenClose(reply) => {
                let _ = write_reply(&mut write_half, &reply).await;
                break;
            }
            Outcome::Close => break,
        }
    }
}

async fn write_reply<W>(writer: &mut W, reply: &serde_json::Value) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let text = reply.to_string();
    frame::write_message(writer, text.as_bytes()).await
}
