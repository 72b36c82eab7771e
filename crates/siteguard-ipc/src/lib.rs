//! Local socket plumbing between siteguardd, its browser bridge and admin tools
//!
//! Every message is one JSON object on its own line. Requests carry a
//! `request_id` that the matching response echoes; pushed events carry none.
//! Peers are trusted by Unix uid only.

mod client;
mod server;

pub use client::*;
pub use server::*;

use serde::Serialize;
use serde::de::DeserializeOwned;
use siteguard_api::ClientRole;
use thiserror::Error;

/// Permissions of the bound socket: owner and group only
pub const SOCKET_MODE: u32 = 0o660;

/// IPC errors
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Unexpected message: {0}")]
    InvalidMessage(String),

    #[error("siteguardd refused the request: {0}")]
    ServerError(String),
}

pub type IpcResult<T> = Result<T, IpcError>;

/// Serialize one message as a newline-terminated line
pub fn encode_line<T: Serialize>(message: &T) -> IpcResult<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Parse one received line; `None` for blank keep-alive lines
pub fn decode_line<T: DeserializeOwned>(line: &str) -> Option<IpcResult<T>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    Some(serde_json::from_str(line).map_err(IpcError::from))
}

/// Role granted to a peer: root and our own user administer, anyone else is a bridge
pub fn role_for_uid(uid: Option<u32>, own_uid: u32) -> ClientRole {
    match uid {
        Some(0) => ClientRole::Admin,
        Some(u) if u == own_uid => ClientRole::Admin,
        _ => ClientRole::Bridge,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use siteguard_api::{Command, Request};

    #[test]
    fn lines_are_newline_terminated() {
        let line = encode_line(&Request::new(3, Command::GetStatus)).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);

        let parsed: Request = decode_line(&line).unwrap().unwrap();
        assert_eq!(parsed.request_id, 3);
    }

    #[test]
    fn blank_and_garbled_lines() {
        assert!(decode_line::<Request>("  \r\n").is_none());
        assert!(matches!(
            decode_line::<Request>("{not json"),
            Some(Err(IpcError::Json(_)))
        ));
    }

    #[test]
    fn roles_from_peer_uid() {
        assert_eq!(role_for_uid(Some(0), 1000), ClientRole::Admin);
        assert_eq!(role_for_uid(Some(1000), 1000), ClientRole::Admin);
        assert_eq!(role_for_uid(Some(1001), 1000), ClientRole::Bridge);
        assert_eq!(role_for_uid(None, 1000), ClientRole::Bridge);
    }
}
