//! IPC server implementation

use siteguard_api::{ClientInfo, Command, Event, Request, Response};
use siteguard_util::ClientId;
use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{Mutex, RwLock, broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::{IpcError, IpcResult, SOCKET_MODE, decode_line, encode_line, role_for_uid};

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Message from the connection tasks to the service
#[derive(Debug)]
pub enum ServerMessage {
    Request {
        client_id: ClientId,
        request: Request,
    },
    ClientConnected {
        client_id: ClientId,
        info: ClientInfo,
    },
    ClientDisconnected {
        client_id: ClientId,
    },
}

type Clients = Arc<RwLock<HashMap<ClientId, ClientHandle>>>;

/// IPC Server
pub struct IpcServer {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    clients: Clients,
    event_tx: broadcast::Sender<Event>,
    message_tx: mpsc::UnboundedSender<ServerMessage>,
    message_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<ServerMessage>>>>,
}

struct ClientHandle {
    info: ClientInfo,
    response_tx: mpsc::UnboundedSender<String>,
    subscribed: bool,
}

impl IpcServer {
    /// Create a new IPC server
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (message_tx, message_rx) = mpsc::unbounded_channel();

        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            listener: None,
            clients: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
            message_tx,
            message_rx: Arc::new(Mutex::new(Some(message_rx))),
        }
    }

    /// Bind the socket, replacing a stale one
    pub async fn start(&mut self) -> IpcResult<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;

        std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(SOCKET_MODE))?;

        info!(path = %self.socket_path.display(), "IPC server listening");

        self.listener = Some(listener);

        Ok(())
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Get receiver for server messages; only the first call gets it
    pub async fn take_message_receiver(&self) -> Option<mpsc::UnboundedReceiver<ServerMessage>> {
        self.message_rx.lock().await.take()
    }

    /// Accept connections in a loop
    pub async fn run(&self) -> IpcResult<()> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| IpcError::ServerError("Server not started".into()))?;
        let own_uid = nix::unistd::getuid().as_raw();

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let client_id = ClientId::new();
                    let uid = get_peer_uid(&stream);
                    let role = role_for_uid(uid, own_uid);

                    let mut info = ClientInfo::new(role);
                    info.client_id = client_id.clone();
                    if let Some(u) = uid {
                        info = info.with_uid(u);
                    }

                    info!(client_id = %client_id, uid = ?uid, role = ?role, "Client connected");

                    self.handle_client(stream, client_id, info).await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    async fn handle_client(&self, stream: UnixStream, client_id: ClientId, info: ClientInfo) {
        let (read_half, write_half) = stream.into_split();
        let (response_tx, response_rx) = mpsc::unbounded_channel::<String>();

        self.clients.write().await.insert(
            client_id.clone(),
            ClientHandle {
                info: info.clone(),
                response_tx,
                subscribed: false,
            },
        );

        let _ = self.message_tx.send(ServerMessage::ClientConnected {
            client_id: client_id.clone(),
            info,
        });

        tokio::spawn(read_requests(
            read_half,
            client_id.clone(),
            self.clients.clone(),
            self.message_tx.clone(),
        ));

        tokio::spawn(write_messages(
            write_half,
            client_id,
            response_rx,
            self.event_tx.subscribe(),
            self.clients.clone(),
            self.message_tx.clone(),
        ));
    }

    /// Send a response to a specific client
    pub async fn send_response(&self, client_id: &ClientId, response: Response) -> IpcResult<()> {
        let json = encode_line(&response)?;

        let clients = self.clients.read().await;
        if let Some(handle) = clients.get(client_id) {
            handle
                .response_tx
                .send(json)
                .map_err(|_| IpcError::ConnectionClosed)?;
        }

        Ok(())
    }

    /// Broadcast an event to all subscribed clients
    pub fn broadcast_event(&self, event: Event) {
        let _ = self.event_tx.send(event);
    }

    /// Get client info
    pub async fn get_client_info(&self, client_id: &ClientId) -> Option<ClientInfo> {
        let clients = self.clients.read().await;
        clients.get(client_id).map(|h| h.info.clone())
    }

    /// Get connected client count
    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Clients that receive pushed events
    pub async fn subscriber_count(&self) -> usize {
        self.clients
            .read()
            .await
            .values()
            .filter(|h| h.subscribed)
            .count()
    }

    /// Remove the socket file
    pub fn shutdown(&self) {
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn read_requests(
    read_half: OwnedReadHalf,
    client_id: ClientId,
    clients: Clients,
    message_tx: mpsc::UnboundedSender<ServerMessage>,
) {
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!(client_id = %client_id, "Client disconnected (EOF)");
                break;
            }
            Ok(_) => {
                let Some(parsed) = decode_line::<Request>(&line) else {
                    continue;
                };

                match parsed {
                    Ok(request) => {
                        // Subscription state lives here so events are filtered
                        // before the service has answered
                        let subscribed = match request.command {
                            Command::SubscribeEvents => Some(true),
                            Command::UnsubscribeEvents => Some(false),
                            _ => None,
                        };
                        if let Some(subscribed) = subscribed
                            && let Some(handle) = clients.write().await.get_mut(&client_id)
                        {
                            handle.subscribed = subscribed;
                        }

                        let _ = message_tx.send(ServerMessage::Request {
                            client_id: client_id.clone(),
                            request,
                        });
                    }
                    Err(e) => {
                        warn!(client_id = %client_id, error = %e, "Invalid request");
                    }
                }
            }
            Err(e) => {
                debug!(client_id = %client_id, error = %e, "Read error");
                break;
            }
        }
    }

    // Dropping the handle closes the writer's response channel
    clients.write().await.remove(&client_id);
}

async fn write_messages(
    mut writer: OwnedWriteHalf,
    client_id: ClientId,
    mut response_rx: mpsc::UnboundedReceiver<String>,
    mut event_rx: broadcast::Receiver<Event>,
    clients: Clients,
    message_tx: mpsc::UnboundedSender<ServerMessage>,
) {
    loop {
        tokio::select! {
            response = response_rx.recv() => {
                let Some(msg) = response else {
                    break;
                };
                if let Err(e) = writer.write_all(msg.as_bytes()).await {
                    debug!(client_id = %client_id, error = %e, "Write error");
                    break;
                }
            }

            event = event_rx.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(client_id = %client_id, skipped, "Client lagging, events dropped");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                let is_subscribed = clients
                    .read()
                    .await
                    .get(&client_id)
                    .is_some_and(|h| h.subscribed);
                if !is_subscribed {
                    continue;
                }

                if let Ok(msg) = encode_line(&event) {
                    if let Err(e) = writer.write_all(msg.as_bytes()).await {
                        debug!(client_id = %client_id, error = %e, "Event write error");
                        break;
                    }
                }
            }
        }
    }

    let _ = message_tx.send(ServerMessage::ClientDisconnected {
        client_id: client_id.clone(),
    });
    clients.write().await.remove(&client_id);
}

/// Get peer UID from Unix socket
fn get_peer_uid(stream: &UnixStream) -> Option<u32> {
    use std::os::unix::io::AsFd;

    let fd = stream.as_fd();

    match nix::sys::socket::getsockopt(&fd, nix::sys::socket::sockopt::PeerCredentials) {
        Ok(cred) => Some(cred.uid()),
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IpcClient;
    use siteguard_api::{EventPayload, OperationMode, ResponsePayload, ResponseResult};
    use tempfile::tempdir;

    /// Answer every request with `Pong`, or `Subscribed` for subscriptions
    fn spawn_responder(server: Arc<IpcServer>, mut messages: mpsc::UnboundedReceiver<ServerMessage>) {
        tokio::spawn(async move {
            while let Some(message) = messages.recv().await {
                if let ServerMessage::Request { client_id, request } = message {
                    let payload = match request.command {
                        Command::SubscribeEvents => ResponsePayload::Subscribed {
                            client_id: client_id.clone(),
                        },
                        _ => ResponsePayload::Pong,
                    };
                    let _ = server
                        .send_response(&client_id, Response::success(request.request_id, payload))
                        .await;
                }
            }
        });
    }

    async fn running_server(path: &Path) -> Arc<IpcServer> {
        let mut server = IpcServer::new(path);
        server.start().await.unwrap();
        let server = Arc::new(server);

        let messages = server.take_message_receiver().await.unwrap();
        spawn_responder(server.clone(), messages);

        let runner = server.clone();
        tokio::spawn(async move { runner.run().await });
        server
    }

    #[tokio::test]
    async fn server_start_creates_socket() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("nested").join("test.sock");

        let mut server = IpcServer::new(&socket_path);
        server.start().await.unwrap();

        assert!(socket_path.exists());
        assert!(server.take_message_receiver().await.is_some());
        assert!(server.take_message_receiver().await.is_none());

        server.shutdown();
        assert!(!socket_path.exists());
    }

    #[tokio::test]
    async fn request_response_roundtrip() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("test.sock");
        let _server = running_server(&socket_path).await;

        let mut client = IpcClient::connect(&socket_path).await.unwrap();
        let first = client.send(Command::Ping).await.unwrap();
        let second = client.send(Command::GetStatus).await.unwrap();

        assert_eq!(first.request_id, 1);
        assert_eq!(second.request_id, 2);
        assert!(matches!(first.result, ResponseResult::Ok(ResponsePayload::Pong)));
    }

    #[tokio::test]
    async fn subscribers_receive_broadcasts() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("test.sock");
        let server = running_server(&socket_path).await;

        let client = IpcClient::connect(&socket_path).await.unwrap();
        let mut events = client.subscribe().await.unwrap();
        assert_eq!(server.subscriber_count().await, 1);

        server.broadcast_event(Event::new(EventPayload::ModeChanged {
            mode: OperationMode::Strict,
        }));

        let event = events.next().await.unwrap();
        assert!(matches!(
            event.payload,
            EventPayload::ModeChanged {
                mode: OperationMode::Strict
            }
        ));
    }
}
