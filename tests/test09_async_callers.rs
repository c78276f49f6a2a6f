use std::thread;

use sql_serial::prelude::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn usable_from_a_multi_thread_runtime() -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::open_in_memory()?;
    db.execute_update("CREATE TABLE t (v INTEGER)", &[])?;

    let writer = db.clone();
    let changed = tokio::spawn(async move {
        writer.execute_update("INSERT INTO t (v) VALUES (?)", &[5i64.into()])
    })
    .await??;
    assert_eq!(changed, 1);

    let mut rs = db.execute_query("SELECT v FROM t", &[])?;
    assert!(rs.next_row());
    assert_eq!(rs.int64_for_column("v"), 5);
    rs.close();
    db.close()?;
    Ok(())
}

#[test]
fn open_inside_block_on() -> Result<(), Box<dyn std::error::Error>> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .build()?;
    let largest = rt.block_on(async {
        let db = Database::open_in_memory()?;
        db.create_table("t", "v INTEGER")?;
        db.execute_update("INSERT INTO t (v) VALUES (3), (8)", &[])?;
        let largest = db.largest_integer_for_column("v", "t")?;
        db.close()?;
        Ok::<_, SqlSerialError>(largest)
    })?;
    assert_eq!(largest, 8);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn current_thread_runtime_gets_an_error_not_a_panic() -> Result<(), Box<dyn std::error::Error>> {
    let err = Database::open_in_memory().unwrap_err();
    assert!(matches!(err, SqlSerialError::ConnectionError(_)));

    // A plain thread is outside the runtime and may block.
    let db = thread::spawn(Database::open_in_memory)
        .join()
        .map_err(|_| "opener panicked")??;
    assert!(matches!(
        db.execute_update("CREATE TABLE t (v INTEGER)", &[]),
        Err(SqlSerialError::ConnectionError(_))
    ));
    assert!(!db.is_closed());

    let from_thread = db.clone();
    thread::spawn(move || from_thread.execute_update("CREATE TABLE t (v INTEGER)", &[]))
        .join()
        .map_err(|_| "writer panicked")??;
    thread::spawn(move || db.close())
        .join()
        .map_err(|_| "closer panicked")??;
    Ok(())
}
