use chrono::NaiveDate;
use serde_json::json;
use sql_serial::prelude::*;

#[test]
fn every_value_kind_round_trips() -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::open_in_memory()?;
    db.execute_update(
        "CREATE TABLE sample (
            flag BOOLEAN, small INTEGER, big INTEGER, ratio REAL,
            label TEXT, stamp TEXT, raw BLOB, doc TEXT, nothing TEXT
        )",
        &[],
    )?;

    let stamp = NaiveDate::from_ymd_opt(2024, 2, 29)
        .and_then(|d| d.and_hms_milli_opt(23, 59, 58, 250))
        .ok_or("bad date")?;
    let params: Vec<RowValues> = vec![
        true.into(),
        (-7i32).into(),
        (i64::from(i32::MAX) * 4).into(),
        2.5f64.into(),
        "héllo".into(),
        stamp.into(),
        vec![0u8, 159, 255].into(),
        json!({"k": [1, 2]}).into(),
        Option::<String>::None.into(),
    ];
    let changed = db.execute_update(
        "INSERT INTO sample VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        &params,
    )?;
    assert_eq!(changed, 1);

    let mut rs = db.execute_query("SELECT * FROM sample", &[])?;
    assert_eq!(rs.column_count(), 9);
    assert!(rs.next_row());
    assert!(rs.bool_for_column("flag"));
    assert_eq!(rs.int32_for_column("small"), -7);
    assert_eq!(rs.int64_for_column("big"), i64::from(i32::MAX) * 4);
    assert!((rs.double_for_column("ratio") - 2.5).abs() < f64::EPSILON);
    assert_eq!(rs.string_for_column("label").as_deref(), Some("héllo"));
    assert_eq!(rs.date_for_column("stamp"), Some(stamp));
    assert_eq!(rs.data_for_column("raw"), Some(vec![0u8, 159, 255]));
    let doc: serde_json::Value =
        serde_json::from_str(&rs.string_for_column("doc").ok_or("missing doc")?)?;
    assert_eq!(doc, json!({"k": [1, 2]}));
    assert!(rs.column_is_null("nothing"));
    assert_eq!(rs.string_for_column("nothing"), None);
    assert_eq!(rs.object_for_column("nothing"), RowValues::Null);
    assert!(!rs.next_row());
    rs.close();
    Ok(())
}

#[test]
fn accessors_convert_loosely_between_storage_classes() -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::open_in_memory()?;
    let mut rs = db.execute_query(
        "SELECT 42 AS n, '17' AS s, 3.75 AS f, 86400 AS epoch, 'x' AS t",
        &[],
    )?;
    assert!(rs.next_row());
    assert_eq!(rs.string_for_column("n").as_deref(), Some("42"));
    assert_eq!(rs.int64_for_column("s"), 17);
    assert_eq!(rs.int64_for_column("f"), 3);
    assert_eq!(rs.integer_for_column("N"), 42);
    assert_eq!(
        rs.date_for_column("epoch"),
        NaiveDate::from_ymd_opt(1970, 1, 2).and_then(|d| d.and_hms_opt(0, 0, 0))
    );
    assert_eq!(rs.int64_for_column("t"), 0);
    assert_eq!(rs.date_for_column("t"), None);

    // Unknown columns and out-of-range indexes read as zero values.
    assert_eq!(rs.index_of_column("missing"), None);
    assert_eq!(rs.int64_for_column("missing"), 0);
    assert!(rs.column_at_index_is_null(99));
    assert_eq!(rs.object_for_column_at_index(0), RowValues::Int(42));
    Ok(())
}

#[test]
fn empty_result_exhausts_on_first_step() -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::open_in_memory()?;
    db.execute_update("CREATE TABLE empty (id INTEGER, name TEXT)", &[])?;

    let mut rs = db.execute_query("SELECT id, name FROM empty", &[])?;
    assert_eq!(rs.state(), CursorState::Created);
    assert_eq!(rs.column_names(), ["id".to_owned(), "name".to_owned()]);
    assert!(!rs.next_row());
    assert_eq!(rs.state(), CursorState::Exhausted);
    assert_eq!(rs.int64_for_column("id"), 0);
    assert_eq!(rs.string_for_column_at_index(1), None);
    assert!(rs.all_values_for_current_row().is_empty());
    assert!(rs.results().is_empty());
    Ok(())
}

#[test]
fn reset_reruns_the_statement_from_the_top() -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::open_in_memory()?;
    db.execute_update("CREATE TABLE nums (n INTEGER)", &[])?;
    for n in 1..=3i64 {
        db.execute_update("INSERT INTO nums (n) VALUES (?)", &[n.into()])?;
    }
    let select = "SELECT n FROM nums WHERE n >= ? ORDER BY n";

    let mut rs = db.execute_query(select, &[2i64.into()])?;
    let first: Vec<i64> = rs
        .results()
        .iter()
        .filter_map(|row| row.get("n").and_then(RowValues::as_int))
        .collect();
    assert_eq!(first, vec![2, 3]);
    assert_eq!(rs.state(), CursorState::Exhausted);

    let statement = db.cached_statement_id(select)?;
    db.execute_update("INSERT INTO nums (n) VALUES (?)", &[4i64.into()])?;
    rs.reset()?;
    assert_eq!(rs.state(), CursorState::Created);
    assert_eq!(db.cached_statement_id(select)?, statement, "reset must not re-prepare");

    let mut second = Vec::new();
    while rs.next_row() {
        second.push(rs.int64_for_column_at_index(0));
    }
    assert_eq!(second, vec![2, 3, 4]);
    assert_eq!(db.statement_use_count(select)?, Some(1));

    rs.close();
    assert!(matches!(rs.reset(), Err(SqlSerialError::UseAfterClose)));
    assert_eq!(db.statement_use_count(select)?, Some(0));
    Ok(())
}

#[test]
fn duplicate_column_names_resolve_to_the_first() -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::open_in_memory()?;
    let mut rs = db.execute_query("SELECT 1 AS v, 2 AS V", &[])?;
    assert!(rs.next_row());
    assert_eq!(rs.index_of_column("v"), Some(0));
    assert_eq!(rs.index_of_column_case_sensitive("V"), Some(1));
    assert_eq!(rs.int64_for_column("V"), 1);
    assert_eq!(rs.int64_for_column_at_index(1), 2);
    assert_eq!(rs.column_name_at_index(1), Some("V"));
    Ok(())
}
