//! Clipboard service daemon — one shared clipboard per buffer.
//!
//! The service listens on a Unix domain socket and holds the current
//! content of the copy/paste and selection buffers on behalf of every
//! connected client. It is the platform clipboard behind
//! [`crate::backend::ServiceBackend`].
//!
//! Architecture: channel-based actor. A single service loop owns all
//! mutable state ([`state::ServiceState`]). Per-connection tasks
//! forward requests via mpsc channels. `selection_changed` pushes are
//! routed to the displaced owner through a per-connection channel.

mod connection;
mod handler;
pub mod state;

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};

use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;

use connection::{DisconnectNotice, ServiceCommand};
use handler::Notification;
use state::{ConnectionId, ServiceState};

use crate::ipc::protocol::Message;

/// Service startup/runtime errors.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("$XDG_RUNTIME_DIR is not set")]
    NoRuntimeDir,
    #[error("clipboard service already running at {0}")]
    AlreadyRunning(PathBuf),
    #[error("failed to create directory {path}: {source}")]
    MkdirFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to bind socket {path}: {source}")]
    BindFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// `$XDG_RUNTIME_DIR/clipbridge/service.sock`, if the runtime dir is set.
pub fn default_socket_path() -> Option<PathBuf> {
    let runtime_dir = std::env::var_os("XDG_RUNTIME_DIR")?;
    Some(PathBuf::from(runtime_dir).join("clipbridge").join("service.sock"))
}

/// Run the service until SIGTERM or SIGINT.
///
/// Binds `socket_path` (or the default path), serves clients, and
/// removes the socket file on the way out. All clipboard content is
/// in-memory only.
pub async fn run(socket_path: Option<PathBuf>) -> Result<(), ServiceError> {
    let socket_path = match socket_path {
        Some(path) => path,
        None => default_socket_path().ok_or(ServiceError::NoRuntimeDir)?,
    };
    let listener = bind_socket(&socket_path).await?;
    tracing::info!(path = %socket_path.display(), "clipboard service listening");

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;
    let shutdown = async move {
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
            _ = sigint.recv() => tracing::info!("received SIGINT, shutting down"),
        }
    };

    serve(listener, shutdown).await;

    if let Err(e) = std::fs::remove_file(&socket_path) {
        tracing::warn!(error = %e, path = %socket_path.display(), "failed to remove socket");
    }
    tracing::info!("clipboard service stopped");
    Ok(())
}

/// Serve clients on `listener` until `shutdown` resolves.
pub async fn serve(listener: UnixListener, shutdown: impl Future<Output = ()>) {
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<ServiceCommand>();
    let (disconnect_tx, mut disconnect_rx) = mpsc::unbounded_channel::<DisconnectNotice>();
    let mut notify_senders: HashMap<ConnectionId, mpsc::UnboundedSender<Message>> = HashMap::new();
    let mut state = ServiceState::new();

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        accept_connection(stream, &cmd_tx, &disconnect_tx, &mut notify_senders);
                    }
                    Err(e) => tracing::warn!(error = %e, "accept failed"),
                }
            }

            Some(cmd) = cmd_rx.recv() => {
                let (response, notification) =
                    handler::handle_message(&mut state, cmd.request, cmd.connection_id);
                let _ = cmd.response_tx.send(response);
                if let Some(notification) = notification {
                    dispatch_notification(&notify_senders, notification);
                }
            }

            Some(notice) = disconnect_rx.recv() => {
                let conn_id = notice.connection_id;
                notify_senders.remove(&conn_id);
                let released = state.remove_connection(conn_id);
                tracing::debug!(
                    ?conn_id,
                    ?released,
                    clients = state.connection_count(),
                    "connection cleaned up"
                );
            }

            _ = &mut shutdown => break,
        }
    }
}

fn accept_connection(
    stream: UnixStream,
    cmd_tx: &mpsc::UnboundedSender<ServiceCommand>,
    disconnect_tx: &mpsc::UnboundedSender<DisconnectNotice>,
    notify_senders: &mut HashMap<ConnectionId, mpsc::UnboundedSender<Message>>,
) {
    let conn_id = ConnectionId::new();
    let (notify_tx, notify_rx) = mpsc::unbounded_channel();
    notify_senders.insert(conn_id, notify_tx);

    connection::spawn_connection(
        stream,
        conn_id,
        cmd_tx.clone(),
        notify_rx,
        disconnect_tx.clone(),
    );

    tracing::debug!(?conn_id, "accepted connection");
}

/// Route a notification to the target connection task.
fn dispatch_notification(
    notify_senders: &HashMap<ConnectionId, mpsc::UnboundedSender<Message>>,
    notification: Notification,
) {
    match notify_senders.get(&notification.target_connection) {
        Some(tx) => {
            if tx.send(notification.message).is_err() {
                tracing::debug!(
                    conn_id = ?notification.target_connection,
                    "notification dropped, connection gone"
                );
            }
        }
        None => tracing::debug!(
            conn_id = ?notification.target_connection,
            "notification target not found"
        ),
    }
}

// -- Socket setup --

/// Bind the listener, creating the socket directory with mode 0700 if
/// it does not exist yet.
///
/// If the path is in use, a successful connect means another service is
/// running; otherwise the socket is stale and is replaced.
pub async fn bind_socket(path: &Path) -> Result<UnixListener, ServiceError> {
    if let Some(parent) = path.parent() {
        let mkdir_failed = |source| ServiceError::MkdirFailed {
            path: parent.to_path_buf(),
            source,
        };
        // An existing directory (`--socket /tmp/x.sock`) keeps its mode.
        if !parent.exists() {
            std::fs::create_dir_all(parent).map_err(mkdir_failed)?;
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))
                .map_err(mkdir_failed)?;
        }
    }

    let bind_failed = |source| ServiceError::BindFailed {
        path: path.to_path_buf(),
        source,
    };

    match UnixListener::bind(path) {
        Ok(listener) => Ok(listener),
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            if UnixStream::connect(path).await.is_ok() {
                return Err(ServiceError::AlreadyRunning(path.to_path_buf()));
            }
            tracing::info!(path = %path.display(), "removing stale socket");
            std::fs::remove_file(path).map_err(bind_failed)?;
            UnixListener::bind(path).map_err(bind_failed)
        }
        Err(e) => Err(bind_failed(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use tokio_util::codec::Framed;

    use crate::backend::ClipboardBuffer;
    use crate::ipc::codec::MessageCodec;
    use crate::ipc::protocol::{MimeEntry, PROTOCOL_VERSION, Status};

    const COPY: ClipboardBuffer = ClipboardBuffer::CopyPaste;

    type Client = Framed<UnixStream, MessageCodec>;

    async fn start_service(path: &Path) -> tokio::task::JoinHandle<()> {
        let listener = bind_socket(path).await.unwrap();
        tokio::spawn(serve(listener, std::future::pending()))
    }

    async fn connect(path: &Path) -> Client {
        let stream = UnixStream::connect(path).await.unwrap();
        Framed::new(stream, MessageCodec::new())
    }

    async fn send_recv(client: &mut Client, msg: Message) -> Message {
        client.send(msg).await.unwrap();
        client.next().await.unwrap().unwrap()
    }

    async fn handshake(client: &mut Client) {
        let ack = send_recv(
            client,
            Message::Hello {
                id: 0,
                version: PROTOCOL_VERSION,
            },
        )
        .await;
        assert!(matches!(ack, Message::HelloAck { status: Status::Ok, .. }));
    }

    fn offer(id: u32, text: &str) -> Message {
        Message::Offer {
            id,
            clipboard: COPY,
            entries: vec![MimeEntry {
                mime_type: "text/plain".into(),
                data: text.as_bytes().to_vec(),
            }],
        }
    }

    fn read(id: u32) -> Message {
        Message::Read {
            id,
            clipboard: COPY,
            mime_type: "text/plain".into(),
        }
    }

    #[tokio::test]
    async fn offer_is_visible_to_other_clients() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("service.sock");
        let _service = start_service(&sock).await;

        let mut writer = connect(&sock).await;
        handshake(&mut writer).await;
        assert_eq!(send_recv(&mut writer, offer(1, "shared")).await, Message::ok(1));

        let mut reader = connect(&sock).await;
        handshake(&mut reader).await;
        match send_recv(&mut reader, read(1)).await {
            Message::Response { id, status, data, .. } => {
                assert_eq!(id, 1);
                assert_eq!(status, Status::Ok);
                assert_eq!(data.as_deref(), Some(&b"shared"[..]));
            }
            other => panic!("expected Response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn previous_owner_gets_selection_changed() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("service.sock");
        let _service = start_service(&sock).await;

        let mut first = connect(&sock).await;
        handshake(&mut first).await;
        send_recv(&mut first, offer(1, "first")).await;

        let mut second = connect(&sock).await;
        handshake(&mut second).await;
        send_recv(&mut second, offer(1, "second")).await;

        let pushed = first.next().await.unwrap().unwrap();
        assert_eq!(
            pushed,
            Message::SelectionChanged {
                id: 0,
                clipboard: COPY,
                owned: false
            }
        );
    }

    #[tokio::test]
    async fn content_survives_owner_disconnect() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("service.sock");
        let _service = start_service(&sock).await;

        let mut owner = connect(&sock).await;
        handshake(&mut owner).await;
        send_recv(&mut owner, offer(1, "persist")).await;
        drop(owner);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut reader = connect(&sock).await;
        handshake(&mut reader).await;
        let resp = send_recv(
            &mut reader,
            Message::GetSequenceNumber { id: 2, clipboard: COPY },
        )
        .await;
        assert!(matches!(resp, Message::Response { sequence_number: Some(1), .. }));
        let resp = send_recv(&mut reader, read(3)).await;
        assert!(matches!(resp, Message::Response { data: Some(ref d), .. } if d == b"persist"));
    }

    #[tokio::test]
    async fn version_mismatch_closes_connection() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("service.sock");
        let _service = start_service(&sock).await;

        let mut conn = connect(&sock).await;
        match send_recv(&mut conn, Message::Hello { id: 0, version: 999 }).await {
            Message::HelloAck { status, error, .. } => {
                assert_eq!(status, Status::Error);
                assert_eq!(error.as_deref(), Some("version_mismatch"));
            }
            other => panic!("expected HelloAck error, got {other:?}"),
        }
        assert!(conn.next().await.is_none(), "expected connection closed");
    }

    #[tokio::test]
    async fn non_hello_first_message_closes_connection() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("service.sock");
        let _service = start_service(&sock).await;

        let mut conn = connect(&sock).await;
        conn.send(read(1)).await.unwrap();
        let next = conn.next().await;
        assert!(next.is_none(), "expected connection closed, got {next:?}");
    }

    #[tokio::test]
    async fn unknown_type_returns_error_keeps_connection() {
        use bytes::BufMut;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("service.sock");
        let _service = start_service(&sock).await;

        let mut client = connect(&sock).await;
        handshake(&mut client).await;

        #[derive(serde::Serialize)]
        struct FakeMsg {
            #[serde(rename = "type")]
            msg_type: &'static str,
            id: u32,
        }
        let unknown = rmp_serde::to_vec_named(&FakeMsg {
            msg_type: "watch",
            id: 42,
        })
        .unwrap();
        let mut raw = bytes::BytesMut::new();
        raw.put_u32(unknown.len() as u32);
        raw.extend_from_slice(&unknown);

        let (mut reader, mut writer) = client.into_inner().into_split();
        writer.write_all(&raw).await.unwrap();

        async fn read_frame(reader: &mut tokio::net::unix::OwnedReadHalf) -> Message {
            let mut len_buf = [0u8; 4];
            reader.read_exact(&mut len_buf).await.unwrap();
            let mut payload = vec![0u8; u32::from_be_bytes(len_buf) as usize];
            reader.read_exact(&mut payload).await.unwrap();
            rmp_serde::from_slice(&payload).unwrap()
        }

        assert_eq!(read_frame(&mut reader).await, Message::error(42, "unknown_type"));

        let follow_up = rmp_serde::to_vec_named(&Message::ListMimeTypes { id: 7, clipboard: COPY }).unwrap();
        let mut frame = bytes::BytesMut::new();
        frame.put_u32(follow_up.len() as u32);
        frame.extend_from_slice(&follow_up);
        writer.write_all(&frame).await.unwrap();

        let resp = read_frame(&mut reader).await;
        assert!(
            matches!(resp, Message::Response { id: 7, status: Status::Ok, .. }),
            "expected ok response after unknown_type, got {resp:?}"
        );
    }

    #[tokio::test]
    async fn stale_socket_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("run").join("service.sock");

        let stale = bind_socket(&sock).await.unwrap();
        drop(stale);
        assert!(sock.exists());

        let _listener = bind_socket(&sock).await.unwrap();

        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(sock.parent().unwrap())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[tokio::test]
    async fn existing_socket_dir_keeps_its_mode() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o755)).unwrap();

        let _listener = bind_socket(&dir.path().join("service.sock")).await.unwrap();

        let mode = std::fs::metadata(dir.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[tokio::test]
    async fn live_socket_reports_already_running() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("service.sock");
        let _service = start_service(&sock).await;

        match bind_socket(&sock).await {
            Err(ServiceError::AlreadyRunning(path)) => assert_eq!(path, sock),
            other => panic!("expected AlreadyRunning, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn serve_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("service.sock");
        let listener = bind_socket(&sock).await.unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let service = tokio::spawn(serve(listener, async move {
            let _ = rx.await;
        }));
        tx.send(()).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), service)
            .await
            .expect("serve should return")
            .unwrap();
    }
}
