//! Identity and URL helpers.
//!
//! Everything here is a pure function; the engine and both storage backends
//! depend on these producing identical output for identical input.

use chrono::{DateTime, Utc};
use navgraph_protocol::TabId;
use url::Url;

/// Deterministic node id for a (tab, URL) pair.
///
/// Repeat visits to the same URL in the same tab map to the same node, which
/// is how the engine recognizes an existing visit.
pub fn node_id(tab_id: TabId, url: &str) -> String {
    let digest = md5::compute(format!("{}|{}", tab_id, url));
    format!("node_{:x}", digest)
}

pub fn edge_id(source_id: &str, target_id: &str, timestamp: DateTime<Utc>) -> String {
    format!("{}:{}:{}", source_id, target_id, timestamp.timestamp_millis())
}

/// Reduces a URL to scheme, host, port and path, dropping query, fragment
/// and trailing slash, so that a link observed on a page matches the URL the
/// browser later commits.
pub fn normalize_url(raw: &str) -> String {
    match Url::parse(raw.trim()) {
        Ok(parsed) if parsed.has_host() => {
            let mut normalized = format!(
                "{}://{}",
                parsed.scheme(),
                parsed.host_str().unwrap_or_default()
            );
            if let Some(port) = parsed.port() {
                normalized.push_str(&format!(":{}", port));
            }
            normalized.push_str(parsed.path().trim_end_matches('/'));
            normalized
        }
        _ => strip_query_and_fragment(raw.trim()),
    }
}

fn strip_query_and_fragment(raw: &str) -> String {
    let no_fragment = raw.split('#').next().unwrap_or(raw);
    let no_query = no_fragment.split('?').next().unwrap_or(no_fragment);
    no_query.trim_end_matches('/').to_string()
}

/// True when a URL should produce a node: non-empty and not on an excluded
/// scheme (browser-internal pages, blank pages, inline data).
pub fn is_trackable_url(url: &str, excluded_schemes: &[String]) -> bool {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return false;
    }
    let scheme = match trimmed.split_once(':') {
        Some((scheme, _)) => scheme.to_ascii_lowercase(),
        None => return true,
    };
    !excluded_schemes
        .iter()
        .any(|excluded| excluded.eq_ignore_ascii_case(&scheme))
}
