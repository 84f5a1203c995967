//! Declarative configuration schema
//!
//! Every known parameter is described by a `SchemaEntry`; an application
//! profile's schema is the common table merged with its overlay. Schemas are
//! small and change only at compile time, so entries live in a sorted vector
//! and lookups are linear.

use std::fmt;

use super::value::Value;

/// The atomic value types the validator understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Symbol,
    Integer,
    Boolean,
    String,
    /// Accepted unchanged, never fails. For parameters whose shape only the
    /// application shell understands.
    Opaque,
    /// `(pattern, replacement)` string pair; the pattern must compile.
    RegexRewrite,
    /// `(pattern, anything)`; the pattern must compile.
    RegexMatch,
    SipUrl,
    /// URL with `sip:` assumed when no scheme is written.
    SipDefaultedUrl,
    /// URL with `sips:` assumed when no scheme is written.
    SipsDefaultedUrl,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ValueType::Symbol => "symbol",
            ValueType::Integer => "integer",
            ValueType::Boolean => "boolean",
            ValueType::String => "string",
            ValueType::Opaque => "opaque",
            ValueType::RegexRewrite => "regex-rewrite",
            ValueType::RegexMatch => "regex-match",
            ValueType::SipUrl => "sip-url",
            ValueType::SipDefaultedUrl => "sip-defaulted-url",
            ValueType::SipsDefaultedUrl => "sips-defaulted-url",
        })
    }
}

/// Description of one configuration parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaEntry {
    pub key: String,
    pub ty: ValueType,
    /// When true the value must be an ordered list of `ty`.
    pub list: bool,
    pub default: Option<Value>,
    pub required: bool,
    /// Allow the validator to substitute a canonical form.
    pub normalize: bool,
    /// When false, changing this parameter demands a full restart.
    pub soft_reload: bool,
    /// When true, log lines and refusal messages omit the value.
    pub no_disclosure: bool,
}

impl SchemaEntry {
    pub fn new(key: impl Into<String>, ty: ValueType) -> Self {
        Self {
            key: key.into(),
            ty,
            list: false,
            default: None,
            required: false,
            normalize: false,
            soft_reload: true,
            no_disclosure: false,
        }
    }

    pub fn list(mut self) -> Self {
        self.list = true;
        self
    }

    pub fn default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn normalize(mut self) -> Self {
        self.normalize = true;
        self
    }

    pub fn hard_reload(mut self) -> Self {
        self.soft_reload = false;
        self
    }

    pub fn no_disclosure(mut self) -> Self {
        self.no_disclosure = true;
        self
    }
}

/// A set of schema entries, sorted by key, keys unique.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    entries: Vec<SchemaEntry>,
}

impl Schema {
    /// Build a schema from entries. Panics on duplicate keys; the tables are
    /// compile-time data, so a duplicate is a programming error.
    pub fn new(mut entries: Vec<SchemaEntry>) -> Self {
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        for pair in entries.windows(2) {
            assert!(
                pair[0].key != pair[1].key,
                "duplicate schema key '{}'",
                pair[0].key
            );
        }
        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&SchemaEntry> {
        self.entries.iter().find(|e| e.key == key)
    }

    pub fn entries(&self) -> &[SchemaEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Merge an overlay into a base schema: same-key entries replace the base
    /// entry, new keys are appended, and the result is re-sorted.
    pub fn merge(base: &Schema, overlay: &Schema) -> Schema {
        let mut entries = base.entries.clone();
        for entry in &overlay.entries {
            match entries.iter_mut().find(|e| e.key == entry.key) {
                Some(existing) => *existing = entry.clone(),
                None => entries.push(entry.clone()),
            }
        }
        Schema::new(entries)
    }
}

/// Schema shared by every application profile.
pub fn common_defaults() -> Schema {
    use ValueType::*;
    Schema::new(vec![
        SchemaEntry::new("always_verify_homedomain_user", Boolean).default(Value::Bool(true)),
        SchemaEntry::new("databaseservers", Symbol).list().hard_reload(),
        SchemaEntry::new("default_max_forwards", Integer).default(Value::Int(70)),
        SchemaEntry::new("detect_loops", Boolean).default(Value::Bool(true)),
        SchemaEntry::new("e164_to_pstn", RegexRewrite)
            .list()
            .default(Value::list([])),
        SchemaEntry::new("homedomain", String).list().normalize(),
        SchemaEntry::new("internal_to_e164", RegexRewrite)
            .list()
            .default(Value::list([])),
        SchemaEntry::new("ldap_server", String),
        SchemaEntry::new("logger_level", Symbol).default(Value::sym("normal")),
        SchemaEntry::new("logger_logdir", String)
            .default(Value::str("logs"))
            .hard_reload(),
        SchemaEntry::new("max_logfile_size", Integer).default(Value::Int(262_144)),
        SchemaEntry::new("myhostnames", String).list().normalize().required(),
        SchemaEntry::new("record_route", Boolean).default(Value::Bool(false)),
        SchemaEntry::new("record_route_url", SipUrl).normalize(),
        SchemaEntry::new("sipauth_password", String)
            .hard_reload()
            .no_disclosure(),
        SchemaEntry::new("sipauth_realm", String),
        SchemaEntry::new("sipauth_unauth_classlist", Symbol)
            .list()
            .default(Value::list([])),
        SchemaEntry::new("stateless_challenges", Boolean).default(Value::Bool(false)),
        SchemaEntry::new("tcp_port", Integer)
            .default(Value::Int(5060))
            .hard_reload(),
        SchemaEntry::new("timer_t1", Integer).default(Value::Int(500)),
        SchemaEntry::new("timer_t2", Integer).default(Value::Int(4_000)),
        SchemaEntry::new("tls_port", Integer)
            .default(Value::Int(5061))
            .hard_reload(),
        SchemaEntry::new("transaction_expire", Integer).default(Value::Int(900)),
        SchemaEntry::new("udp_port", Integer)
            .default(Value::Int(5060))
            .hard_reload(),
        SchemaEntry::new("userdb_file", String),
        SchemaEntry::new("userdb_modules", Symbol)
            .list()
            .default(Value::list([Value::sym("userdb_file")])),
    ])
}

/// Per-application overlay, or None for an unknown profile.
pub fn application_defaults(app: &str) -> Option<Schema> {
    use ValueType::*;
    match app {
        "incomingproxy" => Some(Schema::new(vec![
            // An incoming proxy cannot route without its home domains.
            SchemaEntry::new("homedomain", String).list().normalize().required(),
            SchemaEntry::new("record_route", Boolean).default(Value::Bool(true)),
            SchemaEntry::new("registrar_max_expire", Integer).default(Value::Int(3_600)),
            SchemaEntry::new("registrar_min_expire", Integer).default(Value::Int(300)),
        ])),
        "pstnproxy" => Some(Schema::new(vec![
            SchemaEntry::new("pstn_allowed_classes", Symbol)
                .list()
                .default(Value::list([Value::sym("internal")])),
            SchemaEntry::new("pstn_classdefs", RegexMatch).list().default(Value::list([])),
            SchemaEntry::new("pstngateway", SipDefaultedUrl).required().normalize(),
        ])),
        "appserver" => Some(Schema::new(vec![
            SchemaEntry::new("appserver_call_timeout", Integer).default(Value::Int(40)),
            SchemaEntry::new("cpl_script_dir", String),
            SchemaEntry::new("forward_policy", Opaque),
        ])),
        "outgoingproxy" => Some(Schema::new(vec![
            SchemaEntry::new("sips_proxy", SipsDefaultedUrl).normalize(),
            SchemaEntry::new("stateless_challenges", Boolean).default(Value::Bool(true)),
        ])),
        _ => None,
    }
}

/// The effective schema for an application profile. Unknown profiles get the
/// common schema only.
pub fn schema_for(app: &str) -> Schema {
    match application_defaults(app) {
        Some(overlay) => Schema::merge(&common_defaults(), &overlay),
        None => common_defaults(),
    }
}
