//! Bootstraps per-installation metadata structures and per-namespace storage
//! structures (spec §4.2). Two migration sets exist: **metadata** migrations,
//! applied once per installation against the registry's own store, and
//! **namespace** migrations, applied once per namespace at creation time
//! against that namespace's physical location.
//!
//! Every migration is a named, numbered SQL (or SQL-shaped) template. The
//! namespace placeholder `{{SCHEMA_NAME}}` is substituted with a sanitized
//! identifier before the template is applied; sanitization is a pure
//! function so the registry and every backend agree on the same schema/
//! database name for a given namespace id without round-tripping through
//! storage.

use std::fmt::Write as _;

/// A single ordered migration.
#[derive(Clone, Copy, Debug)]
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub sql: &'static str,
}

/// Metadata migrations: create the tracking table itself, plus anything the
/// registry's own store needs. Kept empty beyond the bootstrap record here
/// because the registry's metadata lives in a sled tree (schemaless); SQL
/// backends that additionally want a metadata migration log run these
/// against their own connection before any namespace exists.
pub const METADATA_MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "create_version_tracking",
    sql: "CREATE TABLE IF NOT EXISTS msgvault_schema_version (\
          version INTEGER PRIMARY KEY, \
          applied_at TIMESTAMPTZ NOT NULL DEFAULT now())",
}];

/// Namespace migrations: the `messages` table/tree layout for a single
/// namespace. `{{SCHEMA_NAME}}` is substituted by [`render_namespace_migration`].
pub const NAMESPACE_MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_messages_table",
        sql: "CREATE TABLE IF NOT EXISTS \"{{SCHEMA_NAME}}\".messages (\
              id UUID NOT NULL UNIQUE, \
              stream_name TEXT NOT NULL, \
              type TEXT NOT NULL, \
              position BIGINT NOT NULL, \
              global_position BIGSERIAL PRIMARY KEY, \
              data JSONB NOT NULL, \
              metadata JSONB, \
              time TIMESTAMPTZ NOT NULL DEFAULT now(), \
              UNIQUE (stream_name, position))",
    },
    Migration {
        version: 2,
        name: "create_category_index",
        sql: "CREATE INDEX IF NOT EXISTS \"{{SCHEMA_NAME}}_category_idx\" \
              ON \"{{SCHEMA_NAME}}\".messages (\
              (split_part(stream_name, '-', 1)), global_position)",
    },
];

/// Substitutes `{{SCHEMA_NAME}}` with `schema_name` in `template`.
pub fn render_namespace_migration(template: &str, schema_name: &str) -> String {
    template.replace("{{SCHEMA_NAME}}", schema_name)
}

/// Sanitizes a namespace id into a schema/database identifier restricted to
/// `[A-Za-z0-9_]`, collapsing every other character to `_`. Deterministic,
/// so the registry and every backend can independently derive the same
/// physical location from a namespace id without consulting each other.
pub fn sanitize_schema_name(namespace_id: &str) -> String {
    let mut out = String::with_capacity(namespace_id.len() + 3);
    // SQL identifiers can't start with a digit; prefix defensively.
    if namespace_id
        .chars()
        .next()
        .map(|c| c.is_ascii_digit())
        .unwrap_or(true)
    {
        out.push('n');
        out.push('_');
    }
    for c in namespace_id.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            let _ = write!(out, "{c}");
        } else {
            out.push('_');
        }
    }
    if out.is_empty() {
        out.push_str("ns");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_is_deterministic() {
        assert_eq!(sanitize_schema_name("acme-corp"), sanitize_schema_name("acme-corp"));
    }

    #[test]
    fn sanitize_restricts_character_set() {
        let sanitized = sanitize_schema_name("acme.corp/prod #1");
        assert!(sanitized.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    }

    #[test]
    fn sanitize_handles_leading_digit() {
        let sanitized = sanitize_schema_name("123abc");
        assert!(!sanitized.chars().next().unwrap().is_ascii_digit());
    }

    #[test]
    fn sanitize_handles_empty() {
        assert_eq!(sanitize_schema_name(""), "ns");
    }

    #[test]
    fn render_substitutes_placeholder() {
        let rendered = render_namespace_migration("CREATE SCHEMA \"{{SCHEMA_NAME}}\"", "acme");
        assert_eq!(rendered, "CREATE SCHEMA \"acme\"");
    }
}
