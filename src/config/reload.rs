//! Soft/hard reload classification
//!
//! A hard reload restarts the application, so any change goes. A soft reload
//! keeps the system running, so parameters marked hard-only may only appear
//! with their current live value. Local keys defer to the application shell.

use tracing::debug;

use crate::redact;

use super::check::{ConfigEntry, ConfigError, LiveValues, LocalPolicy, ReloadMode, LOCAL_PREFIX};
use super::schema::Schema;
use super::value::Value;

/// Decide whether an already-validated snapshot may be applied in `mode`.
pub(crate) fn check_loadable(
    snapshot: &[ConfigEntry],
    schema: &Schema,
    mode: ReloadMode,
    live: &dyn LiveValues,
    local: &dyn LocalPolicy,
) -> Result<(), ConfigError> {
    if mode == ReloadMode::Hard {
        return Ok(());
    }

    for entry in snapshot {
        match schema.get(&entry.key) {
            Some(schema_entry) if schema_entry.soft_reload => {}
            Some(schema_entry) => {
                let current = live.get(&entry.key);
                let unchanged = match &current {
                    Some(current) => *current == entry.value,
                    // Never set before; only "still not set" counts as no change.
                    None => entry.value == Value::Unset,
                };
                if !unchanged {
                    return Err(ConfigError::ReloadRefused {
                        key: entry.key.clone(),
                        source: entry.source.clone(),
                        current: redact::optional_value(
                            schema_entry.no_disclosure,
                            current.as_ref(),
                        ),
                        requested: redact::value(schema_entry.no_disclosure, &entry.value),
                    });
                }
                debug!(
                    "hard-only parameter '{}' unchanged, soft reload permitted",
                    entry.key
                );
            }
            None if entry.key.starts_with(LOCAL_PREFIX) => {
                if !local.is_soft_reloadable(&entry.key, &entry.value) {
                    return Err(ConfigError::LocalReloadRefused {
                        key: entry.key.clone(),
                    });
                }
            }
            // Validation walks the snapshot before we do and rejects unknown
            // keys, so reaching one here means the two passes disagree.
            None => panic!(
                "configuration key '{}' escaped validation",
                entry.key
            ),
        }
    }
    Ok(())
}
