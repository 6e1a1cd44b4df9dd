//! Signaling URL builder for the `rtc` WebSocket endpoint.
//!
//! Composes `<server_url>[/]rtc?sdk=...&version=...&...&access_token=<token>`.
//! The token is always the last query parameter so logs can be truncated to
//! redact it without parsing the query string.

use crate::error::UrlError;

/// Client protocol version this engine negotiates. Pinned at a version that
/// predates subscriber-primary renegotiation — subscriber primary rooms are
/// not supported by this core.
pub const PROTOCOL_VERSION: u32 = 8;

const SDK_NAME: &str = "rust-embedded";
const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Descriptors identifying this client, appended as query parameters.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub os: String,
    pub os_version: String,
    pub device_model: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            os_version: String::new(),
            device_model: String::new(),
        }
    }
}

/// Build the signaling WebSocket URL for `connect(server_url, token)`.
///
/// `reconnect` appends `&reconnect=true` on a backoff-driven reconnect
/// attempt, distinct from a fresh connect, so the SFU can tell a rejoin
/// apart from a first join at the signaling layer. This flag is an
/// engineering addition to the wire builder, not something recovered from
/// the original device SDK.
pub fn build_signal_url(
    server_url: &str,
    token: &str,
    client_info: &ClientInfo,
    reconnect: bool,
) -> Result<String, UrlError> {
    if server_url.is_empty() {
        return Err(UrlError::Empty);
    }
    if !server_url.starts_with("ws://") && !server_url.starts_with("wss://") {
        return Err(UrlError::UnsupportedScheme);
    }
    if token.is_empty() {
        return Err(UrlError::EmptyToken);
    }

    let mut url = String::with_capacity(server_url.len() + 160);
    url.push_str(server_url);
    if !server_url.ends_with('/') {
        url.push('/');
    }
    url.push_str("rtc?");
    url.push_str("sdk=");
    url.push_str(SDK_NAME);
    url.push_str("&version=");
    url.push_str(SDK_VERSION);
    url.push_str("&os=");
    url.push_str(&client_info.os);
    url.push_str("&os_version=");
    url.push_str(&client_info.os_version);
    url.push_str("&device_model=");
    url.push_str(&client_info.device_model);
    url.push_str("&auto_subscribe=false");
    url.push_str("&protocol=");
    url.push_str(&PROTOCOL_VERSION.to_string());
    if reconnect {
        url.push_str("&reconnect=true");
    }
    url.push_str("&access_token=");
    url.push_str(token);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ci() -> ClientInfo {
        ClientInfo {
            os: "linux".into(),
            os_version: "6.1".into(),
            device_model: "esp32-s3".into(),
        }
    }

    #[test]
    fn empty_url_is_invalid() {
        assert_eq!(
            build_signal_url("", "tok", &ci(), false),
            Err(UrlError::Empty)
        );
    }

    #[test]
    fn http_scheme_is_invalid() {
        assert_eq!(
            build_signal_url("http://host", "tok", &ci(), false),
            Err(UrlError::UnsupportedScheme)
        );
    }

    #[test]
    fn empty_token_is_invalid() {
        assert_eq!(
            build_signal_url("wss://host", "", &ci(), false),
            Err(UrlError::EmptyToken)
        );
    }

    #[test]
    fn token_is_always_last_parameter() {
        let url = build_signal_url("wss://host", "secret-tok", &ci(), false).unwrap();
        assert!(url.ends_with("&access_token=secret-tok"));
    }

    #[test]
    fn no_double_slash_when_base_has_trailing_slash() {
        let url = build_signal_url("wss://host/", "tok", &ci(), false).unwrap();
        assert!(url.starts_with("wss://host/rtc?"));
        assert!(!url.starts_with("wss://host//rtc?"));
    }

    #[test]
    fn adds_slash_when_base_has_none() {
        let url = build_signal_url("wss://host", "tok", &ci(), false).unwrap();
        assert!(url.starts_with("wss://host/rtc?"));
    }

    #[test]
    fn reconnect_flag_is_appended_before_token() {
        let url = build_signal_url("wss://host", "tok", &ci(), true).unwrap();
        assert!(url.contains("&reconnect=true&access_token=tok"));
    }

    #[test]
    fn fixed_parameter_order() {
        let url = build_signal_url("wss://host", "tok", &ci(), false).unwrap();
        let sdk_pos = url.find("sdk=").unwrap();
        let version_pos = url.find("version=").unwrap();
        let os_pos = url.find("os=").unwrap();
        let proto_pos = url.find("protocol=").unwrap();
        let token_pos = url.find("access_token=").unwrap();
        assert!(sdk_pos < version_pos);
        assert!(version_pos < os_pos);
        assert!(proto_pos < token_pos);
    }
}
