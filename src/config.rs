use serde::{Deserialize, Serialize};
use std::{fs::File, io::BufReader, path::Path, time::Duration};

use crate::{Error, InternalResult};

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub context: ContextConfig,

    #[serde(default)]
    pub threading: ThreadingConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextConfig {
    #[serde(default = "default_true")]
    pub raise_initialize_event: bool,

    /// Raised once on every new context, before it is handed out.
    #[serde(default = "default_initialize_event")]
    pub initialize_event: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            raise_initialize_event: default_true(),
            initialize_event: default_initialize_event(),
        }
    }
}

/// Order in which several named locks are taken.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum LockOrder {
    /// Caller order. Two callers naming the same locks in different orders
    /// can deadlock.
    #[default]
    AsRequested,
    /// Sorted and deduplicated, so every caller locks in one global order.
    Sorted,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThreadingConfig {
    /// Budget for `wait`; `None` waits forever.
    #[serde(default, with = "duration_ms_opt")]
    pub wait_timeout: Option<Duration>,

    #[serde(default)]
    pub lock_order: LockOrder,

    #[serde(default = "default_worker_name_prefix")]
    pub worker_name_prefix: String,

    /// Event a forked worker raises on its own copy of the lambda.
    #[serde(default = "default_fork_event")]
    pub fork_event: String,
}

impl Default for ThreadingConfig {
    fn default() -> Self {
        Self {
            wait_timeout: None,
            lock_order: LockOrder::default(),
            worker_name_prefix: default_worker_name_prefix(),
            fork_event: default_fork_event(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive used by the binary.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

pub fn from_file<T: for<'de> Deserialize<'de>, P: AsRef<Path>>(path: P) -> InternalResult<T> {
    let file = File::open(path)
        .map_err(|e| Error::Internal(format!("Failed to open config file: {}", e)))?;
    let reader = BufReader::new(file);
    let config = serde_json::from_reader(reader)
        .map_err(|e| Error::Internal(format!("Failed to parse config file: {}", e)))?;
    Ok(config)
}

pub fn from_str<T: for<'de> Deserialize<'de>>(s: &str) -> InternalResult<T> {
    let config = serde_json::from_str(s)
        .map_err(|e| Error::Internal(format!("Failed to parse config: {}", e)))?;
    Ok(config)
}

fn default_true() -> bool {
    true
}
fn default_initialize_event() -> String {
    "core.initialize-application-context".to_string()
}
fn default_worker_name_prefix() -> String {
    "active-events-worker".to_string()
}
fn default_fork_event() -> String {
    "eval".to_string()
}
fn default_log_filter() -> String {
    "info".to_string()
}

mod duration_ms_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
