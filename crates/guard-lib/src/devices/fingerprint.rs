//! Device identification from client-supplied hints.
//!
//! Matching is substring-based on the lowercased user agent. Order matters
//! everywhere: tablets before phones, mobile operating systems before the
//! desktop ones they imitate, and browsers whose tokens embed other
//! browsers' tokens before those browsers.

use sessionguard_common::DeviceType;
use sha2::{Digest, Sha256};

/// Hex characters kept from the SHA-256 digest
const DEVICE_ID_LEN: usize = 32;

const TABLET_MARKERS: &[&str] = &["ipad", "tablet", "kindle", "silk/", "playbook", "sm-t"];

const MOBILE_MARKERS: &[&str] = &[
    "mobile",
    "iphone",
    "ipod",
    "android",
    "blackberry",
    "bb10",
    "iemobile",
    "opera mini",
    "windows phone",
];

const DESKTOP_MARKERS: &[&str] = &["windows nt", "macintosh", "mac os x", "x11", "linux", "cros"];

/// (marker, name), most specific first
const OS_MARKERS: &[(&str, &str)] = &[
    ("windows phone", "Windows Phone"),
    ("iphone", "iOS"),
    ("ipad", "iOS"),
    ("ipod", "iOS"),
    ("android", "Android"),
    ("cros", "Chrome OS"),
    ("windows", "Windows"),
    ("mac os x", "macOS"),
    ("macintosh", "macOS"),
    ("linux", "Linux"),
];

/// (marker, name), most specific first
const BROWSER_MARKERS: &[(&str, &str)] = &[
    ("edg/", "Edge"),
    ("edga/", "Edge"),
    ("edgios/", "Edge"),
    ("opr/", "Opera"),
    ("opera", "Opera"),
    ("samsungbrowser", "Samsung Internet"),
    ("firefox", "Firefox"),
    ("fxios", "Firefox"),
    ("crios", "Chrome"),
    ("chromium", "Chromium"),
    ("chrome", "Chrome"),
    ("safari", "Safari"),
    ("trident", "Internet Explorer"),
    ("msie", "Internet Explorer"),
];

/// Deterministic device id: digest of the fingerprint when present,
/// otherwise of the user agent and IP address.
pub fn device_id(user_agent: &str, ip_address: &str, fingerprint: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    match fingerprint.filter(|fp| !fp.trim().is_empty()) {
        Some(fp) => {
            hasher.update(b"fp:");
            hasher.update(fp.as_bytes());
        },
        None => {
            hasher.update(b"ua:");
            hasher.update(user_agent.as_bytes());
            hasher.update(b"|ip:");
            hasher.update(ip_address.as_bytes());
        },
    }
    let mut id = hex::encode(hasher.finalize());
    id.truncate(DEVICE_ID_LEN);
    id
}

pub fn detect_device_type(user_agent: &str) -> DeviceType {
    let ua = user_agent.to_ascii_lowercase();
    if ua.trim().is_empty() {
        return DeviceType::Unknown;
    }
    // Android tablets omit "mobile"
    if contains_any(&ua, TABLET_MARKERS) || (ua.contains("android") && !ua.contains("mobile")) {
        DeviceType::Tablet
    } else if contains_any(&ua, MOBILE_MARKERS) {
        DeviceType::Mobile
    } else if contains_any(&ua, DESKTOP_MARKERS) {
        DeviceType::Desktop
    } else {
        DeviceType::Unknown
    }
}

pub fn detect_os(user_agent: &str) -> Option<String> {
    first_match(user_agent, OS_MARKERS)
}

pub fn detect_browser(user_agent: &str) -> Option<String> {
    first_match(user_agent, BROWSER_MARKERS)
}

fn contains_any(haystack: &str, markers: &[&str]) -> bool {
    markers.iter().any(|marker| haystack.contains(marker))
}

fn first_match(user_agent: &str, table: &[(&str, &str)]) -> Option<String> {
    let ua = user_agent.to_ascii_lowercase();
    table
        .iter()
        .find(|(marker, _)| ua.contains(marker))
        .map(|(_, name)| (*name).to_string())
}
