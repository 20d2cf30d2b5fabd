use crate::error::StorageResult;
use duckdb::Connection;

pub(crate) fn initialize(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
            user_id VARCHAR NOT NULL,
            key VARCHAR NOT NULL,
            value BLOB NOT NULL,
            PRIMARY KEY (user_id, key)
        );

        CREATE TABLE IF NOT EXISTS records (
            user_id VARCHAR NOT NULL,
            entity_type VARCHAR NOT NULL,
            id VARCHAR NOT NULL,
            type_tag VARCHAR NOT NULL,
            vault_id VARCHAR,
            category_id VARCHAR,
            ciphertext BLOB NOT NULL,
            integrity_tag VARCHAR NOT NULL,
            created_at BIGINT NOT NULL,
            updated_at BIGINT NOT NULL,
            deleted_at BIGINT,
            PRIMARY KEY (user_id, entity_type, id)
        );

        CREATE TABLE IF NOT EXISTS sync_queue (
            user_id VARCHAR NOT NULL,
            seq BIGINT NOT NULL,
            action VARCHAR NOT NULL,
            entity_type VARCHAR NOT NULL,
            entity_id VARCHAR NOT NULL,
            payload TEXT,
            enqueued_at BIGINT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error VARCHAR,
            state VARCHAR NOT NULL DEFAULT 'pending',
            PRIMARY KEY (user_id, seq)
        );

        CREATE TABLE IF NOT EXISTS activity_log (
            user_id VARCHAR NOT NULL,
            id VARCHAR NOT NULL,
            action VARCHAR NOT NULL,
            device_id VARCHAR NOT NULL,
            entity_type VARCHAR,
            entity_id VARCHAR,
            detail VARCHAR,
            created_at BIGINT NOT NULL,
            PRIMARY KEY (user_id, id)
        );

        CREATE TABLE IF NOT EXISTS devices (
            user_id VARCHAR NOT NULL,
            device_id VARCHAR NOT NULL,
            name VARCHAR NOT NULL,
            platform VARCHAR NOT NULL,
            registered_at BIGINT NOT NULL,
            last_seen_at BIGINT NOT NULL,
            PRIMARY KEY (user_id, device_id)
        );
        "#,
    )?;
    Ok(())
}
