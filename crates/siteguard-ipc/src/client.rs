//! IPC client implementation

use siteguard_api::{Command, Event, Request, Response, ResponseResult};
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tracing::debug;

use crate::{IpcError, IpcResult, decode_line, encode_line};

/// IPC Client for connecting to siteguardd
pub struct IpcClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    next_request_id: u64,
}

impl IpcClient {
    /// Connect to siteguardd
    pub async fn connect(socket_path: impl AsRef<Path>) -> IpcResult<Self> {
        let stream = UnixStream::connect(socket_path).await?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            next_request_id: 1,
        })
    }

    /// Send a command and wait for its response.
    ///
    /// Pushed events arriving in between are skipped.
    pub async fn send(&mut self, command: Command) -> IpcResult<Response> {
        let request_id = self.next_request_id;
        self.next_request_id += 1;

        let json = encode_line(&Request::new(request_id, command))?;
        self.writer.write_all(json.as_bytes()).await?;

        loop {
            let value = read_value(&mut self.reader).await?;
            if value.get("request_id").is_none() {
                debug!("Skipping pushed event while awaiting a response");
                continue;
            }

            let response: Response = serde_json::from_value(value)?;
            if response.request_id != request_id {
                return Err(IpcError::InvalidMessage(format!(
                    "expected response {}, got {}",
                    request_id, response.request_id
                )));
            }
            return Ok(response);
        }
    }

    /// Subscribe to events and consume this client to return an event stream
    pub async fn subscribe(mut self) -> IpcResult<EventStream> {
        let response = self.send(Command::SubscribeEvents).await?;

        if let ResponseResult::Err(e) = response.result {
            return Err(IpcError::ServerError(e.message));
        }

        Ok(EventStream {
            reader: self.reader,
        })
    }
}

/// Stream of events from siteguardd
pub struct EventStream {
    reader: BufReader<OwnedReadHalf>,
}

impl EventStream {
    /// Wait for the next event
    pub async fn next(&mut self) -> IpcResult<Event> {
        let value = read_value(&mut self.reader).await?;
        Ok(serde_json::from_value(value)?)
    }
}

async fn read_value(reader: &mut BufReader<OwnedReadHalf>) -> IpcResult<serde_json::Value> {
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(IpcError::ConnectionClosed);
        }
        if let Some(value) = decode_line(&line) {
            return value;
        }
    }
}
