use chrono::{TimeZone, Utc};
use sampledb_core::db::open_db_in_memory;
use sampledb_core::{DbError, RepoError, SqliteVersionRepository, VersionRepository};
use rusqlite::Connection;
use serde_json::{json, Value};

fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "name": {"type": "text"},
            "x": {"type": "quantity"}
        }
    })
}

fn quantity(magnitude: i64) -> Value {
    json!({"_type": "quantity", "units": "g", "magnitude": magnitude})
}

fn row_count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table};"), [], |row| row.get(0))
        .unwrap()
}

#[test]
fn create_then_update_builds_ascending_history() {
    let mut conn = open_db_in_memory().unwrap();
    let mut repo = SqliteVersionRepository::try_new(&mut conn).unwrap();

    let v0 = repo.create_object(&json!({}), &schema(), 7, None).unwrap();
    assert_eq!(v0.version_id, 0);
    assert!(v0.is_initial());

    let v1 = repo
        .update_object(v0.object_id, &json!({"x": quantity(1)}), &schema(), 8, None)
        .unwrap();
    assert_eq!(v1.object_id, v0.object_id);
    assert_eq!(v1.version_id, 1);

    let history = repo.get_object_versions(v0.object_id).unwrap();
    assert_eq!(history, vec![v0.clone(), v1.clone()]);

    let current = repo.get_current_object(v0.object_id).unwrap().unwrap();
    assert_eq!(current, v1);
    assert_eq!(current.user_id, 8);
}

#[test]
fn each_update_moves_exactly_one_row_into_history() {
    let mut conn = open_db_in_memory().unwrap();
    {
        let mut repo = SqliteVersionRepository::try_new(&mut conn).unwrap();
        let created = repo.create_object(&json!({}), &schema(), 1, None).unwrap();
        for magnitude in 1..=3 {
            repo.update_object(created.object_id, &json!({"x": quantity(magnitude)}), &schema(), 1, None)
                .unwrap();
        }
        let versions: Vec<i64> = repo
            .get_object_versions(created.object_id)
            .unwrap()
            .iter()
            .map(|version| version.version_id)
            .collect();
        assert_eq!(versions, vec![0, 1, 2, 3]);
    }

    assert_eq!(row_count(&conn, "objects_current"), 1);
    assert_eq!(row_count(&conn, "objects_previous"), 3);
}

#[test]
fn get_object_version_reads_history_and_current() {
    let mut conn = open_db_in_memory().unwrap();
    let mut repo = SqliteVersionRepository::try_new(&mut conn).unwrap();

    let v0 = repo.create_object(&json!({}), &schema(), 1, None).unwrap();
    let v1 = repo
        .update_object(v0.object_id, &json!({"x": quantity(2)}), &schema(), 1, None)
        .unwrap();

    assert_eq!(repo.get_object_version(v0.object_id, 0).unwrap(), Some(v0.clone()));
    assert_eq!(repo.get_object_version(v0.object_id, 1).unwrap(), Some(v1));
    assert_eq!(repo.get_object_version(v0.object_id, 2).unwrap(), None);
    assert_eq!(repo.get_object_version(v0.object_id + 1, 0).unwrap(), None);
}

#[test]
fn missing_objects_read_as_none_or_empty() {
    let mut conn = open_db_in_memory().unwrap();
    let repo = SqliteVersionRepository::try_new(&mut conn).unwrap();

    assert_eq!(repo.get_current_object(99).unwrap(), None);
    assert!(repo.get_object_versions(99).unwrap().is_empty());
}

#[test]
fn updating_a_missing_object_fails_without_writing() {
    let mut conn = open_db_in_memory().unwrap();
    {
        let mut repo = SqliteVersionRepository::try_new(&mut conn).unwrap();
        let err = repo
            .update_object(5, &json!({}), &schema(), 1, None)
            .unwrap_err();
        assert!(matches!(err, RepoError::NotFound(5)));
    }
    assert_eq!(row_count(&conn, "objects_previous"), 0);
}

#[test]
fn invalid_data_is_rejected_before_any_write() {
    let mut conn = open_db_in_memory().unwrap();
    {
        let mut repo = SqliteVersionRepository::try_new(&mut conn).unwrap();
        let err = repo
            .create_object(&json!({"x": 1}), &schema(), 1, None)
            .unwrap_err();
        match err {
            RepoError::SchemaValidation(err) => assert_eq!(err.path, "$.x"),
            other => panic!("unexpected error: {other}"),
        }

        let created = repo.create_object(&json!({}), &schema(), 1, None).unwrap();
        let err = repo
            .update_object(created.object_id, &json!({"y": quantity(1)}), &schema(), 1, None)
            .unwrap_err();
        assert!(matches!(err, RepoError::SchemaValidation(_)));
    }
    assert_eq!(row_count(&conn, "objects_current"), 1);
    assert_eq!(row_count(&conn, "objects_previous"), 0);
}

#[test]
fn failed_update_rolls_back_the_history_copy() {
    let mut conn = open_db_in_memory().unwrap();
    let object_id = {
        let mut repo = SqliteVersionRepository::try_new(&mut conn).unwrap();
        repo.create_object(&json!({}), &schema(), 1, None)
            .unwrap()
            .object_id
    };
    conn.execute_batch(
        "CREATE TRIGGER block_current_update BEFORE UPDATE ON objects_current
         BEGIN
            SELECT RAISE(ABORT, 'current row is locked');
         END;",
    )
    .unwrap();

    {
        let mut repo = SqliteVersionRepository::try_new(&mut conn).unwrap();
        let err = repo
            .update_object(object_id, &json!({"x": quantity(1)}), &schema(), 1, None)
            .unwrap_err();
        assert!(matches!(err, RepoError::Db(DbError::Sqlite(_))));

        let current = repo.get_current_object(object_id).unwrap().unwrap();
        assert_eq!(current.version_id, 0);
    }
    assert_eq!(row_count(&conn, "objects_previous"), 0);
}

#[test]
fn failed_create_leaves_no_rows() {
    let mut conn = open_db_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TRIGGER block_current_insert BEFORE INSERT ON objects_current
         BEGIN
            SELECT RAISE(ABORT, 'inserts are locked');
         END;",
    )
    .unwrap();

    {
        let mut repo = SqliteVersionRepository::try_new(&mut conn).unwrap();
        let err = repo
            .create_object(&json!({"name": {"_type": "text", "text": "A"}}), &schema(), 1, None)
            .unwrap_err();
        assert!(matches!(err, RepoError::Db(DbError::Sqlite(_))));
        assert!(err.to_string().contains("inserts are locked"));
    }
    assert_eq!(row_count(&conn, "objects_current"), 0);
    assert_eq!(row_count(&conn, "objects_previous"), 0);
}

#[test]
fn explicit_timestamps_are_stored_as_given() {
    let mut conn = open_db_in_memory().unwrap();
    let mut repo = SqliteVersionRepository::try_new(&mut conn).unwrap();
    let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();

    let created = repo.create_object(&json!({}), &schema(), 3, Some(at)).unwrap();
    let loaded = repo.get_current_object(created.object_id).unwrap().unwrap();
    assert_eq!(loaded.utc_datetime, at);
}

#[test]
fn current_objects_are_filtered_by_data() {
    let mut conn = open_db_in_memory().unwrap();
    let mut repo = SqliteVersionRepository::try_new(&mut conn).unwrap();

    let heavy = repo
        .create_object(&json!({"x": quantity(50)}), &schema(), 1, None)
        .unwrap();
    repo.create_object(&json!({"x": quantity(5)}), &schema(), 1, None)
        .unwrap();
    let bare = repo.create_object(&json!({}), &schema(), 1, None).unwrap();

    let all = repo.get_current_objects(&|_| true).unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[2].object_id, bare.object_id);

    let heavy_only = repo
        .get_current_objects(&|data| {
            data.pointer("/x/magnitude")
                .and_then(Value::as_i64)
                .is_some_and(|magnitude| magnitude > 10)
        })
        .unwrap();
    assert_eq!(heavy_only, vec![heavy]);
}

#[test]
fn unmigrated_connection_is_rejected() {
    let mut conn = Connection::open_in_memory().unwrap();
    match SqliteVersionRepository::try_new(&mut conn) {
        Err(RepoError::Db(DbError::Uninitialized { actual_version, .. })) => {
            assert_eq!(actual_version, 0)
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("raw connection must be rejected"),
    }
}

#[test]
fn undecodable_rows_surface_as_invalid_data() {
    let mut conn = open_db_in_memory().unwrap();
    conn.execute(
        "INSERT INTO objects_current (version_id, data, schema, user_id, utc_datetime)
         VALUES (0, 'not json', '{}', 1, '2024-01-01 00:00:00');",
        [],
    )
    .unwrap();

    let repo = SqliteVersionRepository::try_new(&mut conn).unwrap();
    let err = repo.get_current_object(1).unwrap_err();
    assert!(matches!(err, RepoError::InvalidData(_)));
}
