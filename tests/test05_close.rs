use sql_serial::prelude::*;

#[test]
fn calls_after_close_fail_and_double_close_is_a_no_op() -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::open_in_memory()?;
    db.execute_update("CREATE TABLE t (v INTEGER)", &[])?;
    let twin = db.clone();

    db.close()?;
    assert!(db.is_closed());
    assert!(twin.is_closed(), "clones share one connection");
    db.close()?;

    assert!(matches!(
        twin.execute_update("INSERT INTO t (v) VALUES (1)", &[]),
        Err(SqlSerialError::UseAfterClose)
    ));
    assert!(matches!(
        db.execute_query("SELECT v FROM t", &[]),
        Err(SqlSerialError::UseAfterClose)
    ));
    assert!(matches!(db.begin_transaction(), Err(SqlSerialError::UseAfterClose)));
    assert!(matches!(db.in_transaction(), Err(SqlSerialError::UseAfterClose)));
    assert!(matches!(db.identifier_of_last_insert(), Err(SqlSerialError::UseAfterClose)));
    assert!(matches!(db.number_of_changes(), Err(SqlSerialError::UseAfterClose)));
    assert!(matches!(
        db.remove_unused_cached_statements(),
        Err(SqlSerialError::UseAfterClose)
    ));
    assert!(matches!(db.set_should_log(true), Err(SqlSerialError::UseAfterClose)));
    assert!(matches!(
        db.set_number_of_attempts_to_try(3),
        Err(SqlSerialError::UseAfterClose)
    ));
    assert!(matches!(
        db.force_busy_steps_for_tests(1),
        Err(SqlSerialError::UseAfterClose)
    ));
    assert!(!db.should_log(), "a refused setter changes nothing");
    assert_eq!(db.number_of_attempts_to_try(), 1);
    assert!(!db.try_commit());
    assert_eq!(db.last_error_code(), rusqlite::ffi::SQLITE_MISUSE);
    Ok(())
}

#[test]
fn close_force_closes_open_result_sets() -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::open_in_memory()?;
    db.execute_update("CREATE TABLE t (v INTEGER)", &[])?;
    for v in 0..3i64 {
        db.execute_update("INSERT INTO t (v) VALUES (?)", &[v.into()])?;
    }

    let mut walking = db.execute_query("SELECT v FROM t ORDER BY v", &[])?;
    let untouched = db.execute_query("SELECT COUNT(*) FROM t", &[])?;
    assert!(walking.next_row());
    assert_eq!(db.open_result_set_count()?, 2);

    db.close()?;

    assert_eq!(walking.state(), CursorState::Closed);
    assert_eq!(untouched.state(), CursorState::Closed);
    assert!(!walking.next_row());
    assert_eq!(walking.int64_for_column("v"), 0);
    assert_eq!(walking.column_count(), 0);
    assert!(matches!(walking.reset(), Err(SqlSerialError::UseAfterClose)));

    // Closing or dropping a force-closed cursor is harmless.
    walking.close();
    drop(untouched);
    Ok(())
}

#[test]
fn work_queued_before_close_still_runs() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("ordered.db");
    {
        let db = Database::open(&path)?;
        db.execute_update("CREATE TABLE t (v INTEGER)", &[])?;
        let mut rs = db.execute_query("SELECT v FROM t", &[])?;
        db.execute_update("INSERT INTO t (v) VALUES (7)", &[])?;
        // A detached release is queued ahead of the shutdown.
        rs.close();
        db.close()?;
    }

    let reopened = Database::open(&path)?;
    assert_eq!(reopened.largest_integer_for_column("v", "t")?, 7);
    assert_eq!(reopened.cached_statement_count()?, 1);
    Ok(())
}

#[test]
fn dropping_the_last_handle_shuts_the_queue_down() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("dropped.db");
    let rs = {
        let db = Database::open(&path)?;
        db.execute_update("CREATE TABLE t (v INTEGER)", &[])?;
        db.execute_update("INSERT INTO t (v) VALUES (1)", &[])?;
        db.execute_query("SELECT v FROM t", &[])?
    };
    let mut rs = rs;
    // The queue winds down on its own; the cursor can no longer reach it.
    assert!(matches!(rs.reset(), Err(SqlSerialError::UseAfterClose)));
    drop(rs);

    let again = Database::open(&path)?;
    assert_eq!(again.largest_integer_for_column("v", "t")?, 1);
    Ok(())
}
