//! Resource identity normalization.
//!
//! Collapses cosmetic variations of a tab URL (tracking parameters, fragments,
//! alternate hosts and path forms) into one canonical string. Two tabs showing
//! the same content produce the same identity, which is what exclusivity keys on.

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Query parameters that never change what a page shows.
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "dclid", "msclkid", "mc_cid", "mc_eid", "igshid", "ref", "ref_src",
    "si", "feature", "spm", "from", "share_source", "vd_source", "pp", "ab_channel",
];

const YOUTUBE_HOSTS: &[&str] = &[
    "youtube.com",
    "m.youtube.com",
    "music.youtube.com",
    "youtube-nocookie.com",
];

/// Canonical identity of "what is being recorded".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceIdentity(String);

impl ResourceIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Scope an identity to a single tab.
    ///
    /// Used when cross-tab exclusivity is disabled so that different tabs
    /// showing the same content do not collide.
    pub fn scoped_to_tab(&self, tab_id: i64) -> Self {
        Self(format!("tab:{}|{}", tab_id, self.0))
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceIdentity {
    fn from(raw: &str) -> Self {
        normalize(raw)
    }
}

/// Normalize a raw tab URL. Never fails: an unparseable input is returned
/// unchanged as a degraded identity.
pub fn normalize(raw: &str) -> ResourceIdentity {
    let trimmed = raw.trim();
    let url = match Url::parse(trimmed) {
        Ok(url) => url,
        Err(_) => return ResourceIdentity(raw.to_string()),
    };

    if !matches!(url.scheme(), "http" | "https") {
        let mut url = url;
        url.set_fragment(None);
        return ResourceIdentity(url.to_string());
    }

    let host = match url.host_str() {
        Some(host) => host.trim_start_matches("www.").to_ascii_lowercase(),
        None => return ResourceIdentity(raw.to_string()),
    };

    if let Some(video_id) = youtube_video_id(&host, &url) {
        return ResourceIdentity(format!("https://www.youtube.com/watch?v={}", video_id));
    }

    if let Some(canonical) = bilibili_canonical(&host, &url) {
        return ResourceIdentity(canonical);
    }

    ResourceIdentity(generic_canonical(&host, &url))
}

fn youtube_video_id(host: &str, url: &Url) -> Option<String> {
    if host == "youtu.be" {
        return first_segment(url).filter(|id| is_video_id(id));
    }
    if !YOUTUBE_HOSTS.contains(&host) {
        return None;
    }

    let mut segments = url.path_segments()?;
    match segments.next()? {
        "watch" => query_value(url, "v").filter(|id| is_video_id(id)),
        "shorts" | "embed" | "live" | "v" => segments
            .next()
            .map(str::to_string)
            .filter(|id| is_video_id(id)),
        _ => None,
    }
}

fn bilibili_canonical(host: &str, url: &Url) -> Option<String> {
    if host != "bilibili.com" && host != "m.bilibili.com" {
        return None;
    }

    let mut segments = url.path_segments()?;
    if segments.next()? != "video" {
        return None;
    }
    let id = segments.next().filter(|id| !id.is_empty())?;

    // Multi-part uploads keep their part number; part 1 is the default page.
    match query_value(url, "p").filter(|p| p != "1") {
        Some(part) => Some(format!("https://www.bilibili.com/video/{}?p={}", id, part)),
        None => Some(format!("https://www.bilibili.com/video/{}", id)),
    }
}

fn generic_canonical(host: &str, url: &Url) -> String {
    let mut out = format!("{}://{}", url.scheme(), host);
    if let Some(port) = url.port() {
        out.push_str(&format!(":{}", port));
    }

    let path = url.path();
    if path.len() > 1 {
        out.push_str(path.trim_end_matches('/'));
    }

    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    params.sort();

    if !params.is_empty() {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params.iter())
            .finish();
        out.push('?');
        out.push_str(&query);
    }

    out
}

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}

fn first_segment(url: &Url) -> Option<String> {
    url.path_segments()?
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn query_value(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

fn is_video_id(id: &str) -> bool {
    id.len() == 11
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
