//! Plugin Configuration Decoding
//!
//! Configuration bytes delivered with `on_configure` are opaque to the
//! runtime. This helper decodes them for extensions that opt in:
//! JSON when the payload starts with `{` or `[`, TOML otherwise.

use anyhow::{bail, Context as _};
use serde::de::DeserializeOwned;

/// Payload encoding detected by [`decode`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
}

/// Detect the encoding of a configuration payload
pub fn detect_format(bytes: &[u8]) -> Option<ConfigFormat> {
    let first = bytes.iter().find(|b| !b.is_ascii_whitespace())?;
    Some(match *first {
        b'{' | b'[' => ConfigFormat::Json,
        _ => ConfigFormat::Toml,
    })
}

/// Decode a configuration payload into `T`
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> anyhow::Result<T> {
    match detect_format(bytes) {
        Some(ConfigFormat::Json) => {
            serde_json::from_slice(bytes).context("invalid JSON plugin configuration")
        }
        Some(ConfigFormat::Toml) => {
            let text = std::str::from_utf8(bytes).context("TOML plugin configuration is not UTF-8")?;
            toml::from_str(text).context("invalid TOML plugin configuration")
        }
        None => bail!("plugin configuration is empty"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct FilterConfig {
        upstream: String,
        #[serde(default)]
        timeout_ms: u64,
    }

    #[test]
    fn test_decode_json() {
        let config: FilterConfig =
            decode(br#" {"upstream": "auth", "timeout_ms": 250} "#).unwrap();
        assert_eq!(
            config,
            FilterConfig {
                upstream: "auth".to_string(),
                timeout_ms: 250
            }
        );
    }

    #[test]
    fn test_decode_toml() {
        let config: FilterConfig = decode(b"upstream = \"auth\"\n").unwrap();
        assert_eq!(config.upstream, "auth");
        assert_eq!(config.timeout_ms, 0);
    }

    #[test]
    fn test_empty_payload_is_error() {
        assert_eq!(detect_format(b"  \n"), None);
        assert!(decode::<FilterConfig>(b"").is_err());
    }

    #[test]
    fn test_invalid_payload_is_error() {
        let err = decode::<FilterConfig>(b"{\"upstream\":").unwrap_err();
        assert!(err.to_string().contains("JSON"));
        let err = decode::<FilterConfig>(b"upstream = ").unwrap_err();
        assert!(err.to_string().contains("TOML"));
    }
}
