//! # Table Names
//!
//! Logical table keys, the physical resource names the backend uses for
//! them, and extraction of a table name from a request target.
//!
//! ## Resource Convention
//! ```text
//! <base>/tables/<tableName>[/<recordId>][?query]
//!          ▲          ▲
//!          │          └── extracted table name (query string stripped)
//!          └── marker that introduces table resources
//! ```
//!
//! Extraction never fails: anything that does not name a table degrades to
//! [`UNKNOWN_TABLE`].

use std::collections::HashMap;

/// Path marker that introduces table resources.
pub const TABLES_MARKER: &str = "tables/";

/// Placeholder for targets whose table name cannot be extracted.
pub const UNKNOWN_TABLE: &str = "unknown";

/// Returns the table segment of a request target, if it has one.
///
/// ## Example
/// ```rust
/// use farmshop_core::table::table_segment;
///
/// assert_eq!(table_segment("/api/tables/orders/42?x=1"), Some("orders"));
/// assert_eq!(table_segment("tables/customers?limit=1"), Some("customers"));
/// assert_eq!(table_segment("/api/health"), None);
/// ```
pub fn table_segment(target: &str) -> Option<&str> {
    let rest = after_marker(target)?;
    let segment = rest.split('/').next()?;
    is_valid_table_key(segment).then_some(segment)
}

/// Extracts the table name from a request target, or `"unknown"`.
pub fn extract_table_name(target: &str) -> String {
    table_segment(target).unwrap_or(UNKNOWN_TABLE).to_string()
}

/// Returns true if the target names a table resource.
pub fn is_table_target(target: &str) -> bool {
    table_segment(target).is_some()
}

/// Returns the record id segment following the table name, if present.
///
/// `tables/orders/o-17` yields `o-17`; `tables/orders` yields `None`.
pub fn record_id_segment(target: &str) -> Option<&str> {
    let rest = after_marker(target)?;
    let mut parts = rest.split('/');
    parts.next()?;
    parts.next().filter(|id| !id.is_empty())
}

/// Path of a table (optionally a single record) relative to the backend base.
pub fn table_path(remote_table: &str, record_id: Option<&str>) -> String {
    match record_id {
        Some(id) => format!("{}{}/{}", TABLES_MARKER, remote_table, id),
        None => format!("{}{}", TABLES_MARKER, remote_table),
    }
}

/// Returns true if `key` can be used as a table name.
pub fn is_valid_table_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Path portion after the marker, with query and fragment removed.
fn after_marker(target: &str) -> Option<&str> {
    let path = target.split(['?', '#']).next()?;

    if let Some(rest) = path.strip_prefix(TABLES_MARKER) {
        return Some(rest);
    }

    let needle = format!("/{}", TABLES_MARKER);
    path.find(&needle).map(|idx| &path[idx + needle.len()..])
}

// =============================================================================
// Table Map
// =============================================================================

/// Static mapping from logical table keys to backend resource names.
///
/// Unmapped keys pass through unchanged in both directions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMap {
    aliases: HashMap<String, String>,
}

impl TableMap {
    /// Creates an empty mapping (every key passes through).
    pub fn identity() -> Self {
        TableMap {
            aliases: HashMap::new(),
        }
    }

    /// Creates a mapping from explicit aliases.
    pub fn from_aliases(aliases: HashMap<String, String>) -> Self {
        TableMap { aliases }
    }

    /// Adds an alias.
    pub fn with_alias(mut self, local: impl Into<String>, remote: impl Into<String>) -> Self {
        self.aliases.insert(local.into(), remote.into());
        self
    }

    /// Physical resource name for a logical key.
    pub fn to_remote<'a>(&'a self, local: &'a str) -> &'a str {
        self.aliases.get(local).map(String::as_str).unwrap_or(local)
    }

    /// Logical key for a physical resource name.
    pub fn to_local<'a>(&'a self, remote: &'a str) -> &'a str {
        self.aliases
            .iter()
            .find(|(_, physical)| physical.as_str() == remote)
            .map(|(logical, _)| logical.as_str())
            .unwrap_or(remote)
    }

    /// Logical table key named by a request target, or `"unknown"`.
    pub fn local_table_for_target(&self, target: &str) -> String {
        match table_segment(target) {
            Some(remote) => self.to_local(remote).to_string(),
            None => UNKNOWN_TABLE.to_string(),
        }
    }

    /// Returns the configured aliases.
    pub fn aliases(&self) -> &HashMap<String, String> {
        &self.aliases
    }
}

impl Default for TableMap {
    /// The shop's customer list lives in a prefixed backend table.
    fn default() -> Self {
        TableMap::identity().with_alias("customers", "farm_customers")
    }
}
