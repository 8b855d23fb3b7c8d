//! Buffer configuration shared by writers and pipes
//!
//! A [`BufferConfig`] is created once and cloned into every writer. It can be
//! built from defaults, with the `with_*` builder methods, from a JSON
//! document, or from `TEXTPIPE_*` environment variables.

use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_BUFFER_SIZE: usize = 1024;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_LINE_TERMINATOR: &str = "\n";

const ENV_PREFIX: &str = "TEXTPIPE_";

// ============================================================================
// Encoding
// ============================================================================

/// Text encoding applied when chunks leave the process as bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum Encoding {
    #[default]
    #[serde(rename = "utf-8", alias = "utf8")]
    Utf8,
    #[serde(rename = "utf-16le")]
    Utf16Le,
    #[serde(rename = "utf-16be")]
    Utf16Be,
}

impl Encoding {
    /// Encode `text` into bytes
    #[must_use]
    pub fn encode(self, text: &str) -> Vec<u8> {
        match self {
            Self::Utf8 => text.as_bytes().to_vec(),
            Self::Utf16Le => text.encode_utf16().flat_map(u16::to_le_bytes).collect(),
            Self::Utf16Be => text.encode_utf16().flat_map(u16::to_be_bytes).collect(),
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Utf8 => "utf-8",
            Self::Utf16Le => "utf-16le",
            Self::Utf16Be => "utf-16be",
        }
    }
}

impl FromStr for Encoding {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Ok(Self::Utf8),
            "utf-16le" | "utf16le" => Ok(Self::Utf16Le),
            "utf-16be" | "utf16be" => Ok(Self::Utf16Be),
            _ => Err(ConfigError::UnknownEncoding(s.to_string())),
        }
    }
}

// ============================================================================
// BufferConfig
// ============================================================================

/// Immutable writer configuration
///
/// A zero flush interval disables the periodic flush timer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BufferConfig {
    buffer_size: usize,
    encoding: Encoding,
    #[serde(rename = "flush_interval_ms", deserialize_with = "duration_from_millis")]
    flush_interval: Duration,
    line_terminator: String,
}

fn duration_from_millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            encoding: Encoding::default(),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            line_terminator: DEFAULT_LINE_TERMINATOR.to_string(),
        }
    }
}

impl BufferConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    #[must_use]
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    #[must_use]
    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    #[must_use]
    pub fn with_line_terminator(mut self, line_terminator: impl Into<String>) -> Self {
        self.line_terminator = line_terminator.into();
        self
    }

    /// Capacity hint for the accumulation buffer, in bytes
    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    #[must_use]
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    #[must_use]
    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    #[must_use]
    pub fn line_terminator(&self) -> &str {
        &self.line_terminator
    }

    /// Read the configuration from a JSON document.
    ///
    /// Missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed, contains unknown keys,
    /// or the reader fails.
    pub fn from_reader(reader: impl std::io::Read) -> Result<Self, ConfigError> {
        Ok(serde_json::from_reader(reader)?)
    }

    /// Build the configuration from an already parsed option map.
    ///
    /// # Errors
    ///
    /// Returns an error if a value has the wrong type or a key is unknown.
    pub fn from_map(opts: HashMap<String, serde_json::Value>) -> Result<Self, ConfigError> {
        let object = opts.into_iter().collect::<serde_json::Map<_, _>>();
        Ok(serde_json::from_value(serde_json::Value::Object(object))?)
    }

    /// Read `TEXTPIPE_BUFFER_SIZE`, `TEXTPIPE_ENCODING`,
    /// `TEXTPIPE_FLUSH_INTERVAL_MS` and `TEXTPIPE_LINE_TERMINATOR`.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars())
    }

    /// Same as [`BufferConfig::from_env`], over an explicit variable list.
    /// Variables without the `TEXTPIPE_` prefix are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if a recognised variable cannot be parsed.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (key, value) in vars {
            let (key, value) = (key.as_ref(), value.as_ref());
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let invalid = || ConfigError::InvalidValue {
                key: key.to_string(),
                value: value.to_string(),
            };
            match name {
                "BUFFER_SIZE" => config.buffer_size = value.trim().parse().map_err(|_| invalid())?,
                "ENCODING" => config.encoding = value.parse()?,
                "FLUSH_INTERVAL_MS" => {
                    let millis: u64 = value.trim().parse().map_err(|_| invalid())?;
                    config.flush_interval = Duration::from_millis(millis);
                }
                "LINE_TERMINATOR" => config.line_terminator = unescape(value),
                _ => tracing::debug!(key, "ignoring unknown configuration variable"),
            }
        }
        Ok(config)
    }
}

/// Expand `\n`, `\r`, `\t` and `\\` so terminators can be given on a shell line
fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BufferConfig::default();
        assert_eq!(config.buffer_size(), 1024);
        assert_eq!(config.encoding(), Encoding::Utf8);
        assert_eq!(config.flush_interval(), Duration::from_secs(1));
        assert_eq!(config.line_terminator(), "\n");
    }

    #[test]
    fn test_from_reader_partial_json() {
        let json = br#"{"flush_interval_ms": 50, "encoding": "utf-16le"}"#;
        let config = BufferConfig::from_reader(&json[..]).unwrap();
        assert_eq!(config.flush_interval(), Duration::from_millis(50));
        assert_eq!(config.encoding(), Encoding::Utf16Le);
        assert_eq!(config.buffer_size(), DEFAULT_BUFFER_SIZE);
    }

    #[test]
    fn test_from_reader_rejects_unknown_key() {
        let json = br#"{"buffer_sise": 10}"#;
        let err = BufferConfig::from_reader(&json[..]).unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }

    #[test]
    fn test_from_map() {
        let mut opts = HashMap::new();
        opts.insert("line_terminator".to_string(), serde_json::json!("\r\n"));
        opts.insert("buffer_size".to_string(), serde_json::json!(16));
        let config = BufferConfig::from_map(opts).unwrap();
        assert_eq!(config.line_terminator(), "\r\n");
        assert_eq!(config.buffer_size(), 16);
    }

    #[test]
    fn test_from_vars() {
        let vars = [
            ("PATH", "/usr/bin"),
            ("TEXTPIPE_BUFFER_SIZE", "64"),
            ("TEXTPIPE_ENCODING", "UTF-16BE"),
            ("TEXTPIPE_FLUSH_INTERVAL_MS", "0"),
            ("TEXTPIPE_LINE_TERMINATOR", "\\r\\n"),
        ];
        let config = BufferConfig::from_vars(vars).unwrap();
        assert_eq!(config.buffer_size(), 64);
        assert_eq!(config.encoding(), Encoding::Utf16Be);
        assert_eq!(config.flush_interval(), Duration::ZERO);
        assert_eq!(config.line_terminator(), "\r\n");
    }

    #[test]
    fn test_from_vars_invalid_number() {
        let err = BufferConfig::from_vars([("TEXTPIPE_BUFFER_SIZE", "lots")]).unwrap_err();
        match err {
            ConfigError::InvalidValue { key, value } => {
                assert_eq!(key, "TEXTPIPE_BUFFER_SIZE");
                assert_eq!(value, "lots");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_encoding() {
        let err = "latin-1".parse::<Encoding>().unwrap_err();
        assert!(err.to_string().contains("latin-1"));
    }

    #[test]
    fn test_encode_utf16() {
        assert_eq!(Encoding::Utf16Le.encode("hi"), vec![b'h', 0, b'i', 0]);
        assert_eq!(Encoding::Utf16Be.encode("hi"), vec![0, b'h', 0, b'i']);
        assert_eq!(Encoding::Utf8.encode("hé"), "hé".as_bytes());
    }
}
