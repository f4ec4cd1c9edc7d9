//! Device fingerprint and client metadata extraction.
//!
//! Pure functions over request headers: no state, same inputs always yield
//! the same outputs. The fingerprint is a weak device-continuity signal —
//! collisions are acceptable, it is a detection heuristic, not an
//! authentication factor. Device/browser parsing is best-effort substring
//! matching and must never drive a security decision on its own.

use crate::state::{DeviceInfo, DeviceType};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::net::IpAddr;

/// Proxy-forwarding headers checked in order for the client address.
const IP_HEADERS: [&str; 5] = [
    "x-forwarded-for",
    "x-real-ip",
    "x-client-ip",
    "cf-connecting-ip",
    "true-client-ip",
];

/// Request metadata the extractor operates on.
///
/// Header names are stored lower-cased; the HTTP layer that builds this is
/// out of scope.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    headers: HashMap<String, String>,
    /// Raw connection address, used when no proxy header matches.
    pub remote_addr: Option<IpAddr>,
}

impl RequestMeta {
    /// Empty metadata.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header, lower-casing the name.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_lowercase(), value.to_string());
        self
    }

    /// Set the raw connection address.
    #[must_use]
    pub const fn with_remote_addr(mut self, addr: IpAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Header value by lower-cased name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    fn header_or_empty(&self, name: &str) -> &str {
        self.header(name).unwrap_or("")
    }
}

/// Derive a stable fingerprint from User-Agent, Accept-Language, and
/// Accept-Encoding. Missing headers are treated as empty strings.
#[must_use]
pub fn generate_fingerprint(meta: &RequestMeta) -> String {
    let mut hasher = Sha256::new();
    hasher.update(meta.header_or_empty("user-agent").as_bytes());
    hasher.update(b"|");
    hasher.update(meta.header_or_empty("accept-language").as_bytes());
    hasher.update(b"|");
    hasher.update(meta.header_or_empty("accept-encoding").as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Parse the User-Agent into device type, OS, and browser metadata.
///
/// A missing User-Agent yields an empty-but-valid [`DeviceInfo`] carrying
/// only the fingerprint-derived device id.
#[must_use]
pub fn extract_device_info(meta: &RequestMeta) -> DeviceInfo {
    // Device id is the fingerprint truncated to 16 chars; enough to group
    // sessions by device without storing the full hash twice.
    let device_id: String = generate_fingerprint(meta).chars().take(16).collect();

    let Some(user_agent) = meta.header("user-agent").filter(|ua| !ua.is_empty()) else {
        return DeviceInfo::unknown(device_id);
    };

    let ua_lower = user_agent.to_lowercase();

    DeviceInfo {
        device_id,
        device_type: classify_device(&ua_lower),
        os_name: parse_os_name(&ua_lower),
        os_version: parse_os_version(&ua_lower),
        browser_name: parse_browser_name(&ua_lower),
        browser_version: parse_browser_version(&ua_lower),
    }
}

/// Resolve the client IP: first non-empty, non-"unknown" proxy header value
/// (first entry of a comma-separated chain), falling back to the raw
/// connection address.
#[must_use]
pub fn client_ip(meta: &RequestMeta) -> Option<IpAddr> {
    for name in IP_HEADERS {
        if let Some(value) = meta.header(name) {
            let first = value.split(',').next().unwrap_or("").trim();
            if first.is_empty() || first.eq_ignore_ascii_case("unknown") {
                continue;
            }
            if let Ok(ip) = first.parse() {
                return Some(ip);
            }
        }
    }
    meta.remote_addr
}

/// Tablet indicators are checked before mobile: an Android tablet UA also
/// contains "android", so the mobile check would otherwise claim it.
fn classify_device(ua_lower: &str) -> DeviceType {
    let is_tablet = ua_lower.contains("ipad") || ua_lower.contains("tablet");
    if is_tablet {
        return DeviceType::Tablet;
    }
    if ua_lower.contains("iphone") || ua_lower.contains("android") || ua_lower.contains("mobile") {
        return DeviceType::Mobile;
    }
    DeviceType::Desktop
}

fn parse_os_name(ua_lower: &str) -> Option<String> {
    let os = if ua_lower.contains("windows") {
        "Windows"
    } else if ua_lower.contains("iphone") || ua_lower.contains("ipad") {
        "iOS"
    } else if ua_lower.contains("mac os") || ua_lower.contains("macos") {
        "macOS"
    } else if ua_lower.contains("android") {
        "Android"
    } else if ua_lower.contains("linux") {
        "Linux"
    } else {
        return None;
    };
    Some(os.to_string())
}

fn parse_os_version(ua_lower: &str) -> Option<String> {
    let markers: [(&str, &str); 4] = [
        ("windows nt ", ";"),
        ("android ", ";"),
        ("iphone os ", " "),
        ("mac os x ", ")"),
    ];
    for (marker, terminator) in markers {
        if let Some(start) = ua_lower.find(marker) {
            let rest = &ua_lower[start + marker.len()..];
            let end = rest.find(terminator).unwrap_or(rest.len());
            let version = rest[..end].trim().replace('_', ".");
            if !version.is_empty() {
                return Some(version);
            }
        }
    }
    None
}

fn parse_browser_name(ua_lower: &str) -> Option<String> {
    // Order matters: Edge and Opera UAs also contain "chrome"; Chrome and
    // Safari UAs both contain "safari".
    let browser = if ua_lower.contains("edg/") || ua_lower.contains("edge/") {
        "Edge"
    } else if ua_lower.contains("opr/") || ua_lower.contains("opera") {
        "Opera"
    } else if ua_lower.contains("firefox/") {
        "Firefox"
    } else if ua_lower.contains("chrome/") {
        "Chrome"
    } else if ua_lower.contains("safari/") {
        "Safari"
    } else {
        return None;
    };
    Some(browser.to_string())
}

fn parse_browser_version(ua_lower: &str) -> Option<String> {
    let markers = ["edg/", "opr/", "firefox/", "chrome/", "version/"];
    for marker in markers {
        if let Some(start) = ua_lower.find(marker) {
            let rest = &ua_lower[start + marker.len()..];
            let end = rest.find(' ').unwrap_or(rest.len());
            let version = &rest[..end];
            if !version.is_empty() {
                return Some(version.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const IPHONE_UA: &str =
        "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) Version/17.0 Safari/604.1";
    const DESKTOP_UA: &str =
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 Chrome/120.0.0.0 Safari/537.36";

    #[test]
    fn test_fingerprint_is_stable() {
        let meta = RequestMeta::new()
            .with_header("User-Agent", DESKTOP_UA)
            .with_header("Accept-Language", "en-US,en;q=0.9")
            .with_header("Accept-Encoding", "gzip, deflate, br");
        assert_eq!(generate_fingerprint(&meta), generate_fingerprint(&meta));
    }

    #[test]
    fn test_fingerprint_differs_across_header_sets() {
        let a = RequestMeta::new().with_header("User-Agent", DESKTOP_UA);
        let b = RequestMeta::new().with_header("User-Agent", IPHONE_UA);
        assert_ne!(generate_fingerprint(&a), generate_fingerprint(&b));
    }

    #[test]
    fn test_fingerprint_missing_headers_are_empty_strings() {
        let empty = RequestMeta::new();
        let explicit = RequestMeta::new()
            .with_header("User-Agent", "")
            .with_header("Accept-Language", "")
            .with_header("Accept-Encoding", "");
        assert_eq!(generate_fingerprint(&empty), generate_fingerprint(&explicit));
    }

    #[test]
    fn test_device_classification() {
        let mobile = RequestMeta::new().with_header("User-Agent", IPHONE_UA);
        assert_eq!(extract_device_info(&mobile).device_type, DeviceType::Mobile);

        let tablet = RequestMeta::new()
            .with_header("User-Agent", "Mozilla/5.0 (iPad; CPU OS 17_0 like Mac OS X)");
        assert_eq!(extract_device_info(&tablet).device_type, DeviceType::Tablet);

        let android_tablet = RequestMeta::new()
            .with_header("User-Agent", "Mozilla/5.0 (Linux; Android 13; Tablet)");
        assert_eq!(
            extract_device_info(&android_tablet).device_type,
            DeviceType::Tablet
        );

        let desktop = RequestMeta::new().with_header("User-Agent", DESKTOP_UA);
        assert_eq!(
            extract_device_info(&desktop).device_type,
            DeviceType::Desktop
        );
    }

    #[test]
    fn test_os_and_browser_parsing() {
        let meta = RequestMeta::new().with_header("User-Agent", DESKTOP_UA);
        let info = extract_device_info(&meta);
        assert_eq!(info.os_name.as_deref(), Some("Windows"));
        assert_eq!(info.os_version.as_deref(), Some("10.0"));
        assert_eq!(info.browser_name.as_deref(), Some("Chrome"));
        assert_eq!(info.browser_version.as_deref(), Some("120.0.0.0"));
    }

    #[test]
    fn test_missing_user_agent_yields_valid_info() {
        let meta = RequestMeta::new();
        let info = extract_device_info(&meta);
        assert!(!info.device_id.is_empty());
        assert_eq!(info.os_name, None);
        assert_eq!(info.browser_name, None);
    }

    #[test]
    fn test_client_ip_prefers_forwarded_chain_head() {
        let meta = RequestMeta::new()
            .with_header("X-Forwarded-For", "203.0.113.7, 10.0.0.1")
            .with_remote_addr(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)));
        assert_eq!(
            client_ip(&meta),
            Some(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7)))
        );
    }

    #[test]
    fn test_client_ip_skips_unknown_values() {
        let meta = RequestMeta::new()
            .with_header("X-Forwarded-For", "unknown")
            .with_header("X-Real-IP", "198.51.100.3")
            .with_remote_addr(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)));
        assert_eq!(
            client_ip(&meta),
            Some(IpAddr::V4(Ipv4Addr::new(198, 51, 100, 3)))
        );
    }

    #[test]
    fn test_client_ip_falls_back_to_remote_addr() {
        let meta =
            RequestMeta::new().with_remote_addr(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10)));
        assert_eq!(client_ip(&meta), Some(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10))));
        assert_eq!(client_ip(&RequestMeta::new()), None);
    }
}
