use std::path::Path;

use cfgcache_codec::{Compression, SessionOptions};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{CacheError, CacheResult};

/// Prefix of the environment variables read by
/// [`CacheConfig::apply_env_overrides`].
pub const ENV_PREFIX: &str = "CFGCACHE_";

const MIN_STACK_SIZE: usize = 256 * 1024;

/// Engine configuration.
///
/// Only the compression setting reaches the stream (as a header flag); the
/// rest shapes how sessions run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub compression: Compression,
    /// Write buffer flush threshold and read chunk size, in bytes.
    pub buffer_size: usize,
    /// Abort a session after this many problems.
    pub max_problems: Option<usize>,
    /// Encode, reload and re-encode in memory instead of writing the file.
    pub discard_after_store: bool,
    /// Stack size of runtime workers built by [`build_runtime`](crate::build_runtime).
    pub worker_stack_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            compression: Compression::None,
            buffer_size: 64 * 1024,
            max_problems: None,
            discard_after_store: false,
            worker_stack_size: 64 * 1024 * 1024,
        }
    }
}

impl CacheConfig {
    pub fn from_toml_str(text: &str) -> CacheResult<Self> {
        toml::from_str(text).map_err(|e| CacheError::Config(e.to_string()))
    }

    /// Load a TOML file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> CacheResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| CacheError::File {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> CacheResult<String> {
        toml::to_string(self).map_err(|e| CacheError::Config(e.to_string()))
    }

    /// Apply `CFGCACHE_*` variables from the process environment.
    pub fn apply_env_overrides(&mut self) -> CacheResult<()> {
        self.apply_overrides(std::env::vars())
    }

    /// Apply `CFGCACHE_*` overrides from `vars`; other names are ignored.
    ///
    /// | Variable | Values |
    /// |---|---|
    /// | `CFGCACHE_COMPRESSION` | `none`, `zstd`, `zstd:<level>` |
    /// | `CFGCACHE_BUFFER_SIZE` | bytes |
    /// | `CFGCACHE_MAX_PROBLEMS` | count, or `none` |
    /// | `CFGCACHE_DISCARD_AFTER_STORE` | `true`/`false`/`1`/`0` |
    /// | `CFGCACHE_WORKER_STACK_SIZE` | bytes |
    pub fn apply_overrides<I, K, V>(&mut self, vars: I) -> CacheResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let Some(name) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref().trim();
            match name {
                "COMPRESSION" => self.compression = parse_compression(value)?,
                "BUFFER_SIZE" => self.buffer_size = parse_number(key.as_ref(), value)?,
                "MAX_PROBLEMS" => {
                    self.max_problems = if value.eq_ignore_ascii_case("none") {
                        None
                    } else {
                        Some(parse_number(key.as_ref(), value)?)
                    }
                }
                "DISCARD_AFTER_STORE" => self.discard_after_store = parse_bool(key.as_ref(), value)?,
                "WORKER_STACK_SIZE" => self.worker_stack_size = parse_number(key.as_ref(), value)?,
                _ => {
                    tracing::debug!(variable = key.as_ref(), "ignoring unknown cfgcache variable");
                }
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> CacheResult<()> {
        if self.buffer_size == 0 {
            return Err(CacheError::Config("buffer_size must be at least 1".into()));
        }
        if self.worker_stack_size < MIN_STACK_SIZE {
            return Err(CacheError::Config(format!(
                "worker_stack_size must be at least {MIN_STACK_SIZE} bytes"
            )));
        }
        if let Compression::Zstd { level } = self.compression {
            if !(1..=22).contains(&level) {
                return Err(CacheError::Config(format!(
                    "zstd level {level} outside 1..=22"
                )));
            }
        }
        Ok(())
    }

    /// Session options for one store or load.
    pub fn session_options(&self, cancel: CancellationToken) -> SessionOptions {
        SessionOptions {
            compression: self.compression,
            buffer_size: self.buffer_size,
            max_problems: self.max_problems,
            cancel,
        }
    }
}

fn parse_compression(value: &str) -> CacheResult<Compression> {
    match value.split_once(':') {
        None if value.eq_ignore_ascii_case("none") => Ok(Compression::None),
        None if value.eq_ignore_ascii_case("zstd") => Ok(Compression::zstd()),
        Some((codec, level)) if codec.eq_ignore_ascii_case("zstd") => {
            let level = level
                .parse()
                .map_err(|_| CacheError::Config(format!("invalid zstd level `{level}`")))?;
            Ok(Compression::Zstd { level })
        }
        _ => Err(CacheError::Config(format!(
            "unknown compression `{value}`"
        ))),
    }
}

fn parse_number(key: &str, value: &str) -> CacheResult<usize> {
    value
        .parse()
        .map_err(|_| CacheError::Config(format!("{key}: `{value}` is not a number")))
}

fn parse_bool(key: &str, value: &str) -> CacheResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(CacheError::Config(format!(
            "{key}: `{value}` is not a boolean"
        ))),
    }
}
