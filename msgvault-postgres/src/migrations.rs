//! Schema-scoped stored procedures layered on top of
//! `msgvault_registry::NAMESPACE_MIGRATIONS`'s `messages` table (spec §4.5).
//! Grounded on message-db's own server functions
//! (`category`/`id`/`cardinal_id`/`is_category`/`hash_64`/`acquire_lock`,
//! `write_message`, `get_stream_messages`, `get_category_messages`,
//! `get_last_stream_message`, `stream_version`), reimplemented in plain SQL
//! functions rather than message-db's full PL/pgSQL package, since this
//! schema carries no subscription or snapshot machinery to support.
//!
//! `{{SCHEMA_NAME}}` is substituted the same way as the shared namespace
//! migrations, via [`msgvault_registry::render_namespace_migration`].

use msgvault_registry::Migration;

pub const PROCEDURE_MIGRATIONS: &[Migration] = &[
    Migration {
        version: 3,
        name: "fn_category",
        sql: r#"CREATE OR REPLACE FUNCTION "{{SCHEMA_NAME}}".category(stream_name text)
            RETURNS text AS $$
                SELECT split_part(stream_name, '-', 1)
            $$ LANGUAGE sql IMMUTABLE"#,
    },
    Migration {
        version: 4,
        name: "fn_id",
        sql: r#"CREATE OR REPLACE FUNCTION "{{SCHEMA_NAME}}".id(stream_name text)
            RETURNS text AS $$
                SELECT CASE
                    WHEN strpos(stream_name, '-') = 0 THEN ''
                    ELSE substring(stream_name FROM strpos(stream_name, '-') + 1)
                END
            $$ LANGUAGE sql IMMUTABLE"#,
    },
    Migration {
        version: 5,
        name: "fn_cardinal_id",
        sql: r#"CREATE OR REPLACE FUNCTION "{{SCHEMA_NAME}}".cardinal_id(stream_name text)
            RETURNS text AS $$
                SELECT split_part("{{SCHEMA_NAME}}".id(stream_name), '+', 1)
            $$ LANGUAGE sql IMMUTABLE"#,
    },
    Migration {
        version: 6,
        name: "fn_is_category",
        sql: r#"CREATE OR REPLACE FUNCTION "{{SCHEMA_NAME}}".is_category(stream_name text)
            RETURNS boolean AS $$
                SELECT strpos(stream_name, '-') = 0
            $$ LANGUAGE sql IMMUTABLE"#,
    },
    Migration {
        version: 7,
        name: "fn_hash_64",
        sql: r#"CREATE OR REPLACE FUNCTION "{{SCHEMA_NAME}}".hash_64(value text)
            RETURNS bigint AS $$
                SELECT ('x' || substr(md5(value), 1, 16))::bit(64)::bigint
            $$ LANGUAGE sql IMMUTABLE"#,
    },
    Migration {
        version: 8,
        name: "fn_acquire_lock",
        sql: r#"CREATE OR REPLACE FUNCTION "{{SCHEMA_NAME}}".acquire_lock(stream_name text)
            RETURNS bigint AS $$
            DECLARE
                lock_id bigint;
            BEGIN
                lock_id := "{{SCHEMA_NAME}}".hash_64("{{SCHEMA_NAME}}".category(stream_name));
                PERFORM pg_advisory_xact_lock(lock_id);
                RETURN lock_id;
            END;
            $$ LANGUAGE plpgsql"#,
    },
    Migration {
        version: 9,
        name: "fn_write_message",
        sql: r#"CREATE OR REPLACE FUNCTION "{{SCHEMA_NAME}}".write_message(
                p_id uuid,
                p_stream_name text,
                p_type text,
                p_data jsonb,
                p_metadata jsonb,
                p_expected_version bigint
            ) RETURNS TABLE(position bigint, global_position bigint) AS $$
            DECLARE
                v_current bigint;
                v_position bigint;
                v_global_position bigint;
            BEGIN
                PERFORM "{{SCHEMA_NAME}}".acquire_lock(p_stream_name);

                SELECT max(m.position) INTO v_current
                FROM "{{SCHEMA_NAME}}".messages m
                WHERE m.stream_name = p_stream_name;

                IF p_expected_version IS NOT NULL AND v_current IS DISTINCT FROM (
                    CASE WHEN p_expected_version = -1 THEN NULL ELSE p_expected_version END
                ) THEN
                    RAISE EXCEPTION 'wrong expected version: expected %, actual %', p_expected_version, v_current
                        USING ERRCODE = 'M2001';
                END IF;

                v_position := coalesce(v_current, -1) + 1;

                INSERT INTO "{{SCHEMA_NAME}}".messages (id, stream_name, type, position, data, metadata)
                VALUES (p_id, p_stream_name, p_type, v_position, p_data, p_metadata)
                RETURNING messages.global_position INTO v_global_position;

                RETURN QUERY SELECT v_position, v_global_position;
            END;
            $$ LANGUAGE plpgsql"#,
    },
    Migration {
        version: 10,
        name: "fn_get_stream_messages",
        sql: r#"CREATE OR REPLACE FUNCTION "{{SCHEMA_NAME}}".get_stream_messages(
                p_stream_name text,
                p_position bigint,
                p_global_position bigint,
                p_batch_size bigint
            ) RETURNS SETOF "{{SCHEMA_NAME}}".messages AS $$
                SELECT *
                FROM "{{SCHEMA_NAME}}".messages m
                WHERE m.stream_name = p_stream_name
                  AND m.position >= p_position
                  AND (p_global_position IS NULL OR m.global_position >= p_global_position)
                ORDER BY m.position
                LIMIT (CASE WHEN p_batch_size = -1 THEN NULL ELSE p_batch_size END)
            $$ LANGUAGE sql STABLE"#,
    },
    Migration {
        version: 11,
        name: "fn_get_category_messages",
        sql: r#"CREATE OR REPLACE FUNCTION "{{SCHEMA_NAME}}".get_category_messages(
                p_category text,
                p_starting_global_position bigint,
                p_batch_size bigint,
                p_correlation text,
                p_consumer_group_member bigint,
                p_consumer_group_size bigint
            ) RETURNS SETOF "{{SCHEMA_NAME}}".messages AS $$
                SELECT *
                FROM "{{SCHEMA_NAME}}".messages m
                WHERE "{{SCHEMA_NAME}}".category(m.stream_name) = p_category
                  AND m.global_position >= p_starting_global_position
                  AND (
                    p_correlation IS NULL
                    OR "{{SCHEMA_NAME}}".category(m.metadata ->> 'correlation_stream_name') = p_correlation
                  )
                  AND (
                    p_consumer_group_size IS NULL
                    OR mod(abs("{{SCHEMA_NAME}}".hash_64("{{SCHEMA_NAME}}".cardinal_id(m.stream_name))), p_consumer_group_size)
                       = p_consumer_group_member
                  )
                ORDER BY m.global_position
                LIMIT (CASE WHEN p_batch_size = -1 THEN NULL ELSE p_batch_size END)
            $$ LANGUAGE sql STABLE"#,
    },
    Migration {
        version: 12,
        name: "fn_get_last_stream_message",
        sql: r#"CREATE OR REPLACE FUNCTION "{{SCHEMA_NAME}}".get_last_stream_message(
                p_stream_name text,
                p_type text
            ) RETURNS SETOF "{{SCHEMA_NAME}}".messages AS $$
                SELECT *
                FROM "{{SCHEMA_NAME}}".messages m
                WHERE m.stream_name = p_stream_name
                  AND (p_type IS NULL OR m.type = p_type)
                ORDER BY m.position DESC
                LIMIT 1
            $$ LANGUAGE sql STABLE"#,
    },
    Migration {
        version: 13,
        name: "fn_stream_version",
        sql: r#"CREATE OR REPLACE FUNCTION "{{SCHEMA_NAME}}".stream_version(p_stream_name text)
            RETURNS bigint AS $$
                SELECT max(m.position) FROM "{{SCHEMA_NAME}}".messages m WHERE m.stream_name = p_stream_name
            $$ LANGUAGE sql STABLE"#,
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_continue_after_the_shared_namespace_migrations() {
        let shared_max = msgvault_registry::NAMESPACE_MIGRATIONS
            .iter()
            .map(|m| m.version)
            .max()
            .unwrap_or(0);
        let procedure_min = PROCEDURE_MIGRATIONS.iter().map(|m| m.version).min().unwrap();
        assert!(procedure_min > shared_max);
    }

    #[test]
    fn versions_are_strictly_increasing() {
        let versions: Vec<u32> = PROCEDURE_MIGRATIONS.iter().map(|m| m.version).collect();
        let mut sorted = versions.clone();
        sorted.sort();
        assert_eq!(versions, sorted);
    }
}
