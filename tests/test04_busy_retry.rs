use sql_serial::prelude::*;

fn counter_db(attempts: usize) -> Result<Database, SqlSerialError> {
    let db = Database::builder(":memory:")
        .attempts(attempts)
        .retry_delay_ms(1)
        .open()?;
    db.execute_update("CREATE TABLE hits (id INTEGER PRIMARY KEY)", &[])?;
    Ok(db)
}

fn count_hits(db: &Database) -> Result<i64, SqlSerialError> {
    let mut rs = db.execute_query("SELECT COUNT(*) FROM hits", &[])?;
    Ok(if rs.next_row() {
        rs.int64_for_column_at_index(0)
    } else {
        -1
    })
}

#[test]
fn transient_busy_is_retried_until_it_clears() -> Result<(), Box<dyn std::error::Error>> {
    let db = counter_db(3)?;
    db.force_busy_steps_for_tests(2)?;
    assert_eq!(db.execute_update("INSERT INTO hits DEFAULT VALUES", &[])?, 1);
    assert_eq!(count_hits(&db)?, 1, "a retried statement runs exactly once");
    assert!(!db.has_encountered_error());
    assert_eq!(db.last_error_code(), rusqlite::ffi::SQLITE_OK);
    Ok(())
}

#[test]
fn busy_surfaces_once_attempts_run_out() -> Result<(), Box<dyn std::error::Error>> {
    let db = counter_db(2)?;
    db.force_busy_steps_for_tests(2)?;
    let err = db
        .execute_update("INSERT INTO hits DEFAULT VALUES", &[])
        .unwrap_err();
    assert!(err.is_busy());
    assert_eq!(err.code(), rusqlite::ffi::SQLITE_BUSY);
    assert_eq!(db.last_error_code(), rusqlite::ffi::SQLITE_BUSY);
    assert_eq!(count_hits(&db)?, 0);
    assert_eq!(db.statement_use_count("INSERT INTO hits DEFAULT VALUES")?, Some(0));

    // Raising the budget at runtime takes effect on the next call.
    db.set_number_of_attempts_to_try(5)?;
    db.force_busy_steps_for_tests(4)?;
    assert!(db.try_execute_update("INSERT INTO hits DEFAULT VALUES", &[]));
    assert_eq!(count_hits(&db)?, 1);
    Ok(())
}

#[test]
fn queries_retry_and_failures_are_not_retried() -> Result<(), Box<dyn std::error::Error>> {
    let db = counter_db(3)?;
    db.execute_update("INSERT INTO hits DEFAULT VALUES", &[])?;
    db.force_busy_steps_for_tests(2)?;
    assert_eq!(count_hits(&db)?, 1);

    // A hard error consumes no extra attempts; the pending busy step is still there.
    db.force_busy_steps_for_tests(1)?;
    let err = db.execute_update("INSERT INTO nowhere DEFAULT VALUES", &[]).unwrap_err();
    assert!(matches!(err, SqlSerialError::PrepareError { .. }));
    assert!(!err.is_busy());
    assert_eq!(count_hits(&db)?, 1);

    db.set_number_of_attempts_to_try(0)?;
    assert_eq!(db.number_of_attempts_to_try(), 1);
    Ok(())
}

#[test]
fn real_lock_contention_between_two_handles() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("locked.db");
    let writer = Database::open(&path)?;
    writer.execute_update("CREATE TABLE t (v INTEGER)", &[])?;

    let other = Database::builder(path.to_string_lossy())
        .attempts(1)
        .open()?;

    writer.execute_update("BEGIN IMMEDIATE", &[])?;
    writer.execute_update("INSERT INTO t (v) VALUES (1)", &[])?;
    let err = other.execute_update("INSERT INTO t (v) VALUES (2)", &[]).unwrap_err();
    assert!(err.is_busy(), "expected busy, got {err}");
    writer.commit()?;

    assert_eq!(other.execute_update("INSERT INTO t (v) VALUES (2)", &[])?, 1);
    assert_eq!(writer.largest_integer_for_column("v", "t")?, 2);
    other.close()?;
    writer.close()?;
    Ok(())
}
