//! Table allow-list policy.
//!
//! Reads cover all known business tables by default; writes exclude governed
//! reference tables (`clients`, `campaigns`). Explicit overrides replace the
//! defaults wholesale; a deny list subtracts from the default write set.
//! Policies are computed once at service construction and are immutable for
//! the lifetime of the service instance.

use std::collections::HashSet;

use super::error::Access;

/// All known business tables (schema-derived plus the retained legacy
/// `inquiries`).
pub const ALL_TABLES: &[&str] = &[
    "campaigns",
    "clients",
    "conversations",
    "leads",
    "messages",
    "sequences",
    "staging_leads",
    "inquiries",
];

/// Governed reference tables denied for writes by default.
pub const DEFAULT_WRITE_DENY: &[&str] = &["clients", "campaigns"];

/// Independent read/write allow-lists. `None` means "no restriction"; an
/// explicit non-empty set is exclusive. Comparison is case-insensitive
/// (tables are stored lowercase).
#[derive(Debug, Clone, Default)]
pub struct AllowlistPolicy {
    read: Option<HashSet<String>>,
    write: Option<HashSet<String>>,
}

fn to_set(tables: Option<Vec<String>>) -> Option<HashSet<String>> {
    let tables = tables?;
    let set: HashSet<String> = tables.into_iter().map(|t| t.to_lowercase()).collect();
    if set.is_empty() {
        None
    } else {
        Some(set)
    }
}

impl AllowlistPolicy {
    /// No restriction on either operation class.
    pub fn unrestricted() -> Self {
        Self::default()
    }

    /// Explicit lists; `None` or empty means unrestricted for that class.
    pub fn new(read: Option<Vec<String>>, write: Option<Vec<String>>) -> Self {
        Self {
            read: to_set(read),
            write: to_set(write),
        }
    }

    /// Default platform policy with optional overrides.
    ///
    /// Precedence per class:
    /// 1. explicit list (full override)
    /// 2. defaults — reads: all known tables; writes: all known tables minus
    ///    the built-in deny list minus `extra_write_deny`
    pub fn with_defaults(
        read_override: Option<Vec<String>>,
        write_override: Option<Vec<String>>,
        extra_write_deny: &[String],
    ) -> Self {
        let read = to_set(read_override)
            .unwrap_or_else(|| ALL_TABLES.iter().map(|t| t.to_string()).collect());
        let write = to_set(write_override).unwrap_or_else(|| {
            let deny: HashSet<String> = DEFAULT_WRITE_DENY
                .iter()
                .map(|t| t.to_string())
                .chain(extra_write_deny.iter().map(|t| t.to_lowercase()))
                .collect();
            ALL_TABLES
                .iter()
                .filter(|t| !deny.contains(**t))
                .map(|t| t.to_string())
                .collect()
        });
        Self {
            read: Some(read),
            write: Some(write),
        }
    }

    pub fn allows(&self, table: &str, access: Access) -> bool {
        let list = match access {
            Access::Read => &self.read,
            Access::Write => &self.write,
        };
        match list {
            None => true,
            Some(set) => set.contains(&table.to_lowercase()),
        }
    }
}
