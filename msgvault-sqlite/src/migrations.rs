//! Per-namespace schema for the embedded backend (spec §4.6): mirrors
//! `msgvault_registry::NAMESPACE_MIGRATIONS`'s `messages` table, but in
//! SQLite's dialect (no schemas, no `JSONB`, no `BIGSERIAL`) and applied
//! against each namespace's own file rather than a shared-database schema,
//! so there is no `{{SCHEMA_NAME}}` placeholder to substitute.

use msgvault_registry::Migration;

pub const SQLITE_MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_messages_table",
        sql: "CREATE TABLE IF NOT EXISTS messages (\
              id TEXT NOT NULL UNIQUE, \
              stream_name TEXT NOT NULL, \
              type TEXT NOT NULL, \
              position INTEGER NOT NULL, \
              global_position INTEGER PRIMARY KEY AUTOINCREMENT, \
              data TEXT NOT NULL, \
              metadata TEXT, \
              time TEXT NOT NULL, \
              UNIQUE (stream_name, position))",
    },
    Migration {
        version: 2,
        name: "create_stream_index",
        sql: "CREATE INDEX IF NOT EXISTS messages_stream_position_idx \
              ON messages (stream_name, position)",
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_are_strictly_increasing() {
        let versions: Vec<u32> = SQLITE_MIGRATIONS.iter().map(|m| m.version).collect();
        let mut sorted = versions.clone();
        sorted.sort();
        assert_eq!(versions, sorted);
    }
}
