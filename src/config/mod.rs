//! Configuration validation engine
//!
//! Type-directed validation and normalization of the proxy's runtime
//! configuration. Backends produce an ordered snapshot of `(key, value,
//! source)` tuples; [`check`] walks it against the application profile's
//! declarative schema and either returns the normalized snapshot or the
//! first problem as a single human-readable message. Soft reloads are
//! refused when a hard-only parameter would change.

pub mod check;
mod reload;
pub mod schema;
mod types;
pub mod value;

pub use check::{
    check, check_against, start_bg_check, BgCheck, ConfigEntry, ConfigError, LiveValues,
    LocalPolicy, NoLiveValues, NoLocalPolicy, ReloadMode, LOCAL_PREFIX, SOURCE_DEFAULT,
};
pub use schema::{
    application_defaults, common_defaults, schema_for, Schema, SchemaEntry, ValueType,
};
pub use value::Value;
