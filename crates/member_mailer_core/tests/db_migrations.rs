use member_mailer_core::db::migrations::{apply_migrations, latest_version};
use member_mailer_core::db::{open_db, open_db_in_memory, DbError};
use rusqlite::Connection;

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "members");
    assert_table_exists(&conn, "stage_members");
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("members.db");

    let conn_first = open_db(&path).unwrap();
    conn_first
        .execute("INSERT INTO members (member_number) VALUES ('1001');", [])
        .unwrap();
    drop(conn_first);

    let conn_second = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    let count: i64 = conn_second
        .query_row("SELECT COUNT(*) FROM members;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 1);
}

#[test]
fn apply_migrations_reports_work_done_once() {
    let mut conn = Connection::open_in_memory().unwrap();

    assert_eq!(apply_migrations(&mut conn).unwrap(), latest_version() as usize);
    assert_eq!(apply_migrations(&mut conn).unwrap(), 0);
}

#[test]
fn version_one_registry_gains_staging_table_and_keeps_members() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("members.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE members (member_number TEXT PRIMARY KEY NOT NULL, welcome_sent INTEGER NOT NULL DEFAULT 0);
         INSERT INTO members (member_number, welcome_sent) VALUES ('1001', 1);
         PRAGMA user_version = 1;",
    )
    .unwrap();
    drop(conn);

    let conn = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "stage_members");
    let welcome_sent: i64 = conn
        .query_row(
            "SELECT welcome_sent FROM members WHERE member_number = '1001';",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(welcome_sent, 1);
}

#[test]
fn new_rows_default_every_flag_to_zero() {
    let conn = open_db_in_memory().unwrap();
    conn.execute("INSERT INTO members (member_number) VALUES ('7');", [])
        .unwrap();

    let flags: (i64, i64, i64, i64) = conn
        .query_row(
            "SELECT email_opt_out, removed, welcome_sent, terminated_notice_sent
             FROM members WHERE member_number = '7';",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .unwrap();
    assert_eq!(flags, (0, 0, 0, 0));
}

#[test]
fn flag_columns_reject_values_other_than_zero_and_one() {
    let conn = open_db_in_memory().unwrap();
    let result = conn.execute(
        "INSERT INTO members (member_number, removed) VALUES ('8', 2);",
        [],
    );
    assert!(result.is_err());
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
