//! Host extraction from browser URLs

use url::Url;

use crate::HostName;

/// Schemes whose URLs are never recorded in the visited-tabs log
const UNRECORDED_SCHEMES: &[&str] = &["chrome-extension", "data"];

/// Derive the registrable host of a URL, or `None` when there is nothing to evaluate.
///
/// Only `http`/`https` URLs have a host. The registrable part is a heuristic:
/// the last two labels, or the last three when the second-to-last label is
/// short (`co.uk`, `com.au`) or the top-level label is a two-letter country code.
pub fn host_from_url(url: &str) -> Option<HostName> {
    let parsed = Url::parse(url).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }

    let hostname = parsed.host_str()?;
    if hostname.is_empty() {
        return None;
    }

    let parts: Vec<&str> = hostname.split('.').collect();
    if parts.len() <= 1 {
        return Some(HostName::new(hostname));
    }

    let n = parts.len();
    let keep = if n > 2 && (parts[n - 2].len() <= 3 || parts[n - 1].len() <= 2) {
        3
    } else {
        2
    };

    Some(HostName::new(parts[n - keep..].join(".")))
}

/// Whether a URL belongs in the visited-tabs diagnostic log
pub fn is_recordable_url(url: &str) -> bool {
    match Url::parse(url) {
        Ok(parsed) => !UNRECORDED_SCHEMES.contains(&parsed.scheme()),
        Err(_) => false,
    }
}
