//! Per-connection task.
//!
//! A client must open with `hello`, which the service loop validates.
//! After that the task relays requests to the loop one at a time and
//! interleaves `selection_changed` pushes between responses. The loop
//! always hears about the disconnect, however the task ends.

use futures::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;

use crate::ipc::codec::{CodecError, DecodeResult, FrameCodec, decode_frame};
use crate::ipc::protocol::{Message, Status};

use super::state::ConnectionId;

/// Command sent from a connection task to the service loop.
#[derive(Debug)]
pub struct ServiceCommand {
    pub request: Message,
    pub response_tx: oneshot::Sender<Message>,
    pub connection_id: ConnectionId,
}

/// Notification sent when a connection closes.
#[derive(Debug)]
pub struct DisconnectNotice {
    pub connection_id: ConnectionId,
}

#[derive(Debug, thiserror::Error)]
enum ConnectionError {
    #[error("unexpected EOF during handshake")]
    HandshakeEof,
    #[error("first message must be Hello")]
    NotHello,
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] rmp_serde::decode::Error),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("service loop closed")]
    ServiceGone,
    #[error("response channel closed")]
    ResponseDropped,
}

/// Spawn a connection handler task. A [`DisconnectNotice`] is always
/// sent when it ends.
pub fn spawn_connection(
    stream: UnixStream,
    conn_id: ConnectionId,
    cmd_tx: mpsc::UnboundedSender<ServiceCommand>,
    notify_rx: mpsc::UnboundedReceiver<Message>,
    disconnect_tx: mpsc::UnboundedSender<DisconnectNotice>,
) {
    tokio::spawn(async move {
        if let Err(e) = handle_connection(stream, conn_id, cmd_tx, notify_rx).await {
            tracing::debug!(?conn_id, error = %e, "connection closed");
        }
        let _ = disconnect_tx.send(DisconnectNotice {
            connection_id: conn_id,
        });
    });
}

async fn handle_connection(
    stream: UnixStream,
    conn_id: ConnectionId,
    cmd_tx: mpsc::UnboundedSender<ServiceCommand>,
    mut notify_rx: mpsc::UnboundedReceiver<Message>,
) -> Result<(), ConnectionError> {
    let mut framed = Framed::new(stream, FrameCodec::new());
    if !accept_hello(&mut framed, &cmd_tx, conn_id).await? {
        return Ok(());
    }

    loop {
        tokio::select! {
            incoming = framed.next() => {
                let Some(raw) = incoming.transpose()? else {
                    return Ok(());
                };
                let reply = match decode_frame(&raw) {
                    DecodeResult::Ok(request) => send_command(&cmd_tx, request, conn_id).await?,
                    DecodeResult::UnknownType(envelope) => {
                        tracing::debug!(?conn_id, msg_type = %envelope.msg_type, "unknown message type");
                        Message::error(envelope.id, "unknown_type")
                    }
                    DecodeResult::Malformed(e) => return Err(ConnectionError::MalformedFrame(e)),
                };
                framed.send(reply).await?;
            }
            pushed = notify_rx.recv() => match pushed {
                Some(msg) => framed.send(msg).await?,
                // Service loop dropped our sender: shutting down.
                None => return Ok(()),
            },
        }
    }
}

/// Run the handshake. Returns whether the connection was accepted; a
/// rejected client has already been sent its error `hello_ack`.
async fn accept_hello(
    framed: &mut Framed<UnixStream, FrameCodec>,
    cmd_tx: &mpsc::UnboundedSender<ServiceCommand>,
    conn_id: ConnectionId,
) -> Result<bool, ConnectionError> {
    let first = framed.next().await.ok_or(ConnectionError::HandshakeEof)??;
    let hello = match decode_frame(&first) {
        DecodeResult::Ok(hello @ Message::Hello { .. }) => hello,
        DecodeResult::Ok(_) | DecodeResult::UnknownType(_) => return Err(ConnectionError::NotHello),
        DecodeResult::Malformed(e) => return Err(ConnectionError::MalformedFrame(e)),
    };

    let ack = send_command(cmd_tx, hello, conn_id).await?;
    let accepted = matches!(
        ack,
        Message::HelloAck {
            status: Status::Ok,
            ..
        }
    );
    framed.send(ack).await?;
    Ok(accepted)
}

/// Send a command to the service loop and wait for the response.
async fn send_command(
    cmd_tx: &mpsc::UnboundedSender<ServiceCommand>,
    request: Message,
    conn_id: ConnectionId,
) -> Result<Message, ConnectionError> {
    let (response_tx, response_rx) = oneshot::channel();
    cmd_tx
        .send(ServiceCommand {
            request,
            response_tx,
            connection_id: conn_id,
        })
        .map_err(|_| ConnectionError::ServiceGone)?;
    response_rx
        .await
        .map_err(|_| ConnectionError::ResponseDropped)
}
