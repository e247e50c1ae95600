//! Application configuration.
//!
//! The config file is YAML with camelCase keys. Unlike most runtime errors,
//! config problems are fatal: [`Config::load`] refuses to return a config
//! that is missing required fields, so the rest of the application can rely
//! on every stream having an id, a name, a URL, and a base timezone.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Default retention window, and therefore the maximum time shift.
pub const DEFAULT_MAX_OFFSET: Duration = Duration::from_secs(24 * 60 * 60);

/// Default ring chunk length for icy streams, in seconds.
pub const DEFAULT_CHUNK_SECS: u32 = 2;

fn default_listen() -> String {
    "localhost:8080".into()
}

fn default_max_offset() -> Duration {
    DEFAULT_MAX_OFFSET
}

fn default_chunk_secs() -> u32 {
    DEFAULT_CHUNK_SECS
}

/// How a stream's upstream is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// HLS media playlist of MPEG-TS segments.
    #[default]
    Hls,
    /// Raw ICY/Shoutcast byte stream at a fixed bitrate.
    Icy,
}

/// A single stream to record and serve.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamConfig {
    /// Unique identifier for this stream; used in URLs and on disk.
    pub id: String,
    /// Display name, surfaced via the index page and `icy-name`.
    pub name: String,
    /// Upstream URL: an m3u8 playlist for hls, the mount URL for icy.
    pub url: String,
    /// IANA name of the stream's native timezone.
    pub base_timezone: String,
    #[serde(default)]
    pub source: SourceKind,
    /// Fixed bitrate in bits/sec; required for icy streams.
    #[serde(default)]
    pub bitrate: Option<u32>,
    /// Ring chunk length in seconds for icy streams.
    #[serde(default = "default_chunk_secs")]
    pub chunk_secs: u32,
}

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Root path on the filesystem where media chunks are stored, in a
    /// per-stream directory.
    pub chunk_dir: PathBuf,
    /// Where the SQLite state DB lives.
    pub db_path: PathBuf,
    /// Address to listen on.
    #[serde(default = "default_listen")]
    pub listen: String,
    /// How long media is kept, i.e. the maximum time one can offset.
    #[serde(
        default = "default_max_offset",
        deserialize_with = "de_duration",
        serialize_with = "ser_duration"
    )]
    pub max_offset: Duration,
    /// Streams to record and serve.
    #[serde(default)]
    pub streams: Vec<StreamConfig>,
}

impl Config {
    /// Deserialize a `Config` from a YAML string and validate it.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let cfg: Config = serde_yaml::from_str(yaml)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Validation(format!("reading {}: {e}", path.display())))?;
        Self::from_yaml(&contents)
    }

    /// Look up a stream by id.
    pub fn stream(&self, id: &str) -> Option<&StreamConfig> {
        self.streams.iter().find(|s| s.id == id)
    }

    /// Check required fields and geometry constraints.
    fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.chunk_dir.as_os_str().is_empty() {
            problems.push("chunkDir must be specified".to_string());
        }
        if self.db_path.as_os_str().is_empty() {
            problems.push("dbPath must be specified".to_string());
        }
        if self.streams.is_empty() {
            problems.push("must specify at least one stream".to_string());
        }

        let mut seen = HashSet::new();
        for s in &self.streams {
            if s.id.is_empty() {
                problems.push("streams must have id".to_string());
                continue;
            }
            if !seen.insert(s.id.as_str()) {
                problems.push(format!("{}: duplicate stream id", s.id));
            }
            if s.name.is_empty() {
                problems.push(format!("{}: stream must have name", s.id));
            }
            if s.url.is_empty() {
                problems.push(format!("{}: stream must have url", s.id));
            }
            if s.base_timezone.is_empty() {
                problems.push(format!("{}: stream must have baseTimezone", s.id));
            }

            if s.source == SourceKind::Icy {
                match s.bitrate {
                    None => problems.push(format!("{}: icy stream must have bitrate", s.id)),
                    Some(br) if br == 0 || br % 8 != 0 => {
                        problems.push(format!("{}: bitrate must be divisible into bytes", s.id))
                    }
                    Some(_) => {}
                }
                if s.chunk_secs == 0 {
                    problems.push(format!("{}: chunkSecs must be positive", s.id));
                } else if self.max_offset.as_secs() % u64::from(s.chunk_secs) != 0 {
                    problems.push(format!(
                        "{}: maxOffset must be divisible into {}s chunks",
                        s.id, s.chunk_secs
                    ));
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(format!(
                "validation error(s) validating config: {}",
                problems.join(", ")
            )))
        }
    }
}

/// Parse a duration string like `24h`, `90m`, `30s`, or `1h30m`.
///
/// Units: `h`, `m`, `s`, `ms`. Bare numbers are rejected so nobody has to
/// remember whether they mean seconds or hours.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration".into());
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits == 0 {
            return Err(format!("invalid duration {s:?}"));
        }
        let (num, tail) = rest.split_at(digits);
        let n: u64 = num.parse().map_err(|_| format!("invalid duration {s:?}"))?;

        let unit_len = tail.chars().take_while(|c| c.is_ascii_alphabetic()).count();
        let (unit, tail) = tail.split_at(unit_len);
        total += match unit {
            "h" => Duration::from_secs(n * 3600),
            "m" => Duration::from_secs(n * 60),
            "s" => Duration::from_secs(n),
            "ms" => Duration::from_millis(n),
            _ => return Err(format!("invalid duration unit in {s:?}")),
        };
        rest = tail;
    }

    Ok(total)
}

fn de_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(serde::de::Error::custom)
}

fn ser_duration<S>(d: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&format!("{}s", d.as_secs()))
}
