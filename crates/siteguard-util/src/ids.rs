//! Strongly-typed identifiers for siteguardd

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Registrable host a usage record or site rule is keyed by (e.g. `youtube.com`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String")]
pub struct HostName(String);

impl HostName {
    /// Host names are compared case-insensitively, so they are stored lowercased.
    pub fn new(host: impl AsRef<str>) -> Self {
        Self(host.as_ref().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for HostName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for HostName {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for HostName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Browser tab identifier, as reported by the browser bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TabId(pub i64);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Browser window identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowId(pub i64);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a connected IPC client
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn host_name_is_normalized() {
        assert_eq!(HostName::new(" YouTube.com "), HostName::new("youtube.com"));
        assert_eq!(HostName::from("Example.ORG").as_str(), "example.org");
    }

    #[test]
    fn client_id_uniqueness() {
        assert_ne!(ClientId::new(), ClientId::new());
    }

    #[test]
    fn host_name_works_as_json_map_key() {
        let mut map = BTreeMap::new();
        map.insert(HostName::new("a.com"), 1);
        map.insert(HostName::new("b.com"), 2);

        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"a.com":1,"b.com":2}"#);

        let parsed: BTreeMap<HostName, i32> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, map);

        let parsed: HostName = serde_json::from_str(r#""News.BBC.co.uk""#).unwrap();
        assert_eq!(parsed.as_str(), "news.bbc.co.uk");
    }

    #[test]
    fn tab_id_serializes_as_number() {
        assert_eq!(serde_json::to_string(&TabId(42)).unwrap(), "42");
        let parsed: WindowId = serde_json::from_str("7").unwrap();
        assert_eq!(parsed, WindowId(7));
    }
}
