//! Configuration snapshot validation
//!
//! A backend hands over an ordered list of `(key, value, source)` tuples; the
//! validator walks it against the application's schema, normalizes what it
//! may, and fails fast with a single human-readable message on the first
//! problem. Keys prefixed `local_` belong to the application shell and are
//! delegated to its policy hook.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::redact;

use super::reload;
use super::schema::{schema_for, Schema};
use super::types;
use super::value::Value;

/// Source tag used by the defaults backend. An `Unset` value from this
/// source marks a parameter nobody configured and skips type checking.
pub const SOURCE_DEFAULT: &str = "default";

/// Prefix of keys owned by the application shell rather than the schema.
pub const LOCAL_PREFIX: &str = "local_";

/// One runtime configuration value and the backend it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigEntry {
    pub key: String,
    pub value: Value,
    pub source: String,
}

impl ConfigEntry {
    pub fn new(
        key: impl Into<String>,
        value: Value,
        source: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            value,
            source: source.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadMode {
    /// Re-evaluation of a running system; hard-only parameters must not change.
    Soft,
    /// Full restart; any change is permitted.
    Hard,
}

/// Validation failure, rendered as a single line at the API boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    UnknownKey {
        key: String,
        source: String,
    },
    Invalid {
        key: String,
        index: usize,
        in_list: bool,
        value: String,
        expected: String,
        reason: String,
    },
    RequiredNotSet {
        key: String,
    },
    RequiredEmpty {
        key: String,
    },
    ReloadRefused {
        key: String,
        source: String,
        current: String,
        requested: String,
    },
    LocalReloadRefused {
        key: String,
    },
    Caught {
        key: String,
        kind: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::UnknownKey { key, source } => {
                write!(f, "Unknown configuration parameter {} (source: {})", key, source)
            }
            ConfigError::Invalid {
                key,
                index,
                in_list,
                value,
                expected,
                reason,
            } => {
                if *in_list {
                    write!(
                        f,
                        "parameter '{}' has invalid value (#{} in list ({})) - expected {} : {}",
                        key, index, value, expected, reason
                    )
                } else {
                    write!(
                        f,
                        "parameter '{}' has invalid value ({}) - expected {} : {}",
                        key, value, expected, reason
                    )
                }
            }
            ConfigError::RequiredNotSet { key } => {
                write!(f, "Required parameter '{}' not set", key)
            }
            ConfigError::RequiredEmpty { key } => {
                write!(f, "Required parameter '{}' may not have empty value", key)
            }
            ConfigError::ReloadRefused {
                key,
                source,
                current,
                requested,
            } => write!(
                f,
                "Changing parameter '{}' (source: {}) requires a restart - current value {}, requested {}",
                key, source, current, requested
            ),
            ConfigError::LocalReloadRefused { key } => {
                write!(f, "Local parameter '{}' may not be changed by soft reload", key)
            }
            ConfigError::Caught { key, kind } => write!(
                f,
                "Could not parse configuration (parameter '{}', caught {})",
                key, kind
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Access to the currently live configuration, used to decide whether a
/// hard-only parameter actually changed. Returns None when the parameter is
/// unset or the registry is not up yet.
pub trait LiveValues {
    fn get(&self, key: &str) -> Option<Value>;
}

impl<F> LiveValues for F
where
    F: Fn(&str) -> Option<Value>,
{
    fn get(&self, key: &str) -> Option<Value> {
        self(key)
    }
}

/// Stand-in when no live registry exists, e.g. on first load.
pub struct NoLiveValues;

impl LiveValues for NoLiveValues {
    fn get(&self, _key: &str) -> Option<Value> {
        None
    }
}

/// Application-shell hook owning the `local_*` key namespace.
pub trait LocalPolicy {
    /// Validate and normalize a local key. Errors become validation
    /// failures in the standard message grammar.
    fn validate(&self, key: &str, value: &Value, source: &str) -> anyhow::Result<Value>;

    /// Whether a changed local key may be applied without a restart.
    fn is_soft_reloadable(&self, key: &str, value: &Value) -> bool;
}

/// Default when the shell installs no hook: local keys are refused.
pub struct NoLocalPolicy;

impl LocalPolicy for NoLocalPolicy {
    fn validate(&self, key: &str, _value: &Value, _source: &str) -> anyhow::Result<Value> {
        Err(anyhow::anyhow!("no local configuration policy installed ({})", key))
    }

    fn is_soft_reloadable(&self, _key: &str, _value: &Value) -> bool {
        false
    }
}

/// Validate a snapshot against the schema of `app`.
pub fn check(
    snapshot: &[ConfigEntry],
    app: &str,
    mode: ReloadMode,
    live: &dyn LiveValues,
    local: &dyn LocalPolicy,
) -> Result<Vec<ConfigEntry>, ConfigError> {
    check_against(snapshot, &schema_for(app), mode, live, local)
}

/// Validate a snapshot against an explicit schema.
///
/// On success the returned snapshot has every value normalized and preserves
/// the input order. On failure the first offending entry wins.
pub fn check_against(
    snapshot: &[ConfigEntry],
    schema: &Schema,
    mode: ReloadMode,
    live: &dyn LiveValues,
    local: &dyn LocalPolicy,
) -> Result<Vec<ConfigEntry>, ConfigError> {
    let mut normalized = Vec::with_capacity(snapshot.len());
    for entry in snapshot {
        let value = match schema.get(&entry.key) {
            Some(schema_entry) => {
                if entry.value == Value::Unset && entry.source == SOURCE_DEFAULT {
                    // Nobody set it; there is nothing to type-check.
                    entry.value.clone()
                } else {
                    match types::validate_value(schema_entry, &entry.value) {
                        Ok(value) => {
                            if value != entry.value {
                                debug!(
                                    "normalizing parameter '{}' from {} to {}",
                                    entry.key,
                                    redact::value(schema_entry.no_disclosure, &entry.value),
                                    redact::value(schema_entry.no_disclosure, &value),
                                );
                            }
                            value
                        }
                        Err(failure) => {
                            return Err(ConfigError::Invalid {
                                key: entry.key.clone(),
                                index: failure.index,
                                in_list: failure.in_list,
                                value: redact::truncate_diagnostic(&failure.value),
                                expected: failure.expected,
                                reason: failure.reason,
                            })
                        }
                    }
                }
            }
            None if entry.key.starts_with(LOCAL_PREFIX) => {
                validate_local(local, entry)?
            }
            None => {
                return Err(ConfigError::UnknownKey {
                    key: entry.key.clone(),
                    source: entry.source.clone(),
                })
            }
        };
        normalized.push(ConfigEntry {
            key: entry.key.clone(),
            value,
            source: entry.source.clone(),
        });
    }

    check_required(&normalized, schema)?;
    reload::check_loadable(&normalized, schema, mode, live, local)?;
    Ok(normalized)
}

/// Run the shell's hook, converting both errors and panics into the standard
/// message so a misbehaving hook cannot take the validator down.
fn validate_local(
    local: &dyn LocalPolicy,
    entry: &ConfigEntry,
) -> Result<Value, ConfigError> {
    match catch_unwind(AssertUnwindSafe(|| {
        local.validate(&entry.key, &entry.value, &entry.source)
    })) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(ConfigError::Caught {
            key: entry.key.clone(),
            kind: e.to_string(),
        }),
        Err(panic) => {
            let kind = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic".to_string());
            error!(
                "local validator panicked on parameter '{}': {}",
                entry.key, kind
            );
            Err(ConfigError::Caught {
                key: entry.key.clone(),
                kind: format!("panic: {}", kind),
            })
        }
    }
}

fn check_required(snapshot: &[ConfigEntry], schema: &Schema) -> Result<(), ConfigError> {
    for schema_entry in schema.entries().iter().filter(|e| e.required) {
        match snapshot.iter().find(|e| e.key == schema_entry.key) {
            None => {
                return Err(ConfigError::RequiredNotSet {
                    key: schema_entry.key.clone(),
                })
            }
            Some(entry) if entry.value == Value::Unset => {
                return Err(ConfigError::RequiredNotSet {
                    key: schema_entry.key.clone(),
                })
            }
            Some(entry) if entry.value.is_empty() => {
                return Err(ConfigError::RequiredEmpty {
                    key: schema_entry.key.clone(),
                })
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// Handle to a background sanity-check task.
pub struct BgCheck {
    task: JoinHandle<()>,
    cancel: CancellationToken,
}

impl BgCheck {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn join(self) {
        let _ = self.task.await;
    }
}

/// Start asynchronous sanity checks over an accepted snapshot.
///
/// Reserved surface: the intended checks (policy warnings, DNS resolution of
/// referenced hosts) are not implemented at this layer, so the task finishes
/// immediately. Callers should treat the handle as they would any background
/// job.
pub fn start_bg_check(snapshot: Vec<ConfigEntry>, app: String) -> BgCheck {
    let cancel = CancellationToken::new();
    let task = tokio::spawn(async move {
        debug!(
            "background configuration checks for '{}' over {} entries: nothing to do",
            app,
            snapshot.len()
        );
    });
    BgCheck { task, cancel }
}
