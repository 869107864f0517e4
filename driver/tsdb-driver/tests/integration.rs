///
/// # Integration Tests for tsdb-driver
///
/// End-to-end sessions through the public API: registry construction,
/// login, queries, result retrieval and release, CSV loading and
/// file-backed stores.
///

use std::fs;
use std::time::Duration;

use tempfile::TempDir;

use tsdb_driver::{
    Connection, DataType, DriverConfig, DriverError, Registry, StoreMode, StoredResult, TableLoader,
    Value, TSDB_ML_VERSION, TSDB_ML_VERSION_LOW,
};

fn connect(location: &str) -> Connection {
    let registry = Registry::default();
    let mut conn = registry.new_connection(TSDB_ML_VERSION).unwrap();
    conn.connect(&format!("user=test;passwd=test;servers=mem://{}", location))
        .unwrap();
    conn
}

#[test]
fn test_version_gate() {
    let registry = Registry::default();
    for version in [TSDB_ML_VERSION_LOW, TSDB_ML_VERSION_LOW + 17, TSDB_ML_VERSION] {
        assert!(registry.new_connection(version).is_ok());
        assert!(registry.tls_connection(version).is_ok());
    }
    for version in [0, TSDB_ML_VERSION_LOW - 1, TSDB_ML_VERSION + 1] {
        let err = registry.new_connection(version).err().unwrap();
        assert!(matches!(err, DriverError::VersionMismatch { .. }));
        assert!(!err.is_recoverable());
    }
}

#[test]
fn test_select_one_scenario() {
    let mut conn = connect("it-select-one");
    conn.query(b"SELECT 1", Some("utf8"), Some("testdb")).unwrap();
    let set = conn.store_result_v2().unwrap();
    assert_eq!(set.field_count(), 1);
    assert_eq!(set.row_count(), 1);
    assert_eq!(set.field_count() as usize, set.fields().len());
    assert_eq!(set.row_count() as usize, set.iter().count());
    conn.free_result(set).unwrap();
}

#[test]
fn test_malformed_sql_scenario() {
    let mut conn = connect("it-malformed");
    let err = conn.query(b"SELECT FROM WHERE", None, None).unwrap_err();
    assert_ne!(err.code(), 0);
    assert!(conn.store_result_v2().is_none());
    assert!(conn.is_logined());
}

#[test]
fn test_disconnect_clears_login() {
    let mut conn = connect("it-disconnect");
    assert!(conn.is_logined());
    conn.disconnect().unwrap();
    assert!(!conn.is_logined());
    assert!(matches!(conn.query_str("SELECT 1"), Err(DriverError::NotConnected)));
    conn.connect("user=test;servers=mem://it-disconnect").unwrap();
    assert!(conn.is_logined());
}

#[test]
fn test_typed_result_set() {
    let mut conn = connect("it-typed");
    conn.query_str(
        "CREATE TABLE readings (
            id BIGINT,
            sensor VARCHAR(32),
            ok BOOL,
            temp FLOAT,
            at DATETIME,
            raw BLOB
        )",
    )
    .unwrap();
    conn.query_with_args(
        "INSERT INTO readings VALUES (?, ?, ?, ?, ?, ?), (?, ?, ?, ?, ?, ?)",
        &[
            Value::Int64(1),
            Value::from("north"),
            Value::Bool(true),
            Value::Double(21.5),
            Value::Datetime(1_600_000_000_000),
            Value::Binary(vec![1, 2, 3]),
            Value::Int64(2),
            Value::Null,
            Value::Bool(false),
            Value::Double(-3.25),
            Value::Null,
            Value::Null,
        ],
    )
    .unwrap();
    assert_eq!(conn.affected_rows(), 2);

    conn.query_str("SELECT * FROM readings ORDER BY id").unwrap();
    let fields = conn.fetch_ml_fields().unwrap().to_vec();
    let types: Vec<DataType> = fields.iter().map(|f| f.data_type).collect();
    assert_eq!(
        types,
        vec![
            DataType::Int64,
            DataType::String,
            DataType::Bool,
            DataType::Float,
            DataType::Datetime,
            DataType::Binary
        ]
    );
    assert_eq!(fields[1].length, 32);
    assert_eq!(fields[1].real_length, 5);
    assert!(fields[1].is_nullable);
    assert!(!fields[0].is_nullable);
    for (i, field) in fields.iter().enumerate() {
        assert_eq!(field.field_index as usize, i);
    }

    let set = conn.store_result_v2().unwrap();
    let first = set.rows().head().unwrap();
    assert_eq!(first[0], Value::Int64(1));
    assert_eq!(first[2], Value::Bool(true));
    assert_eq!(first[3], Value::Float(21.5));
    assert_eq!(first[4], Value::Datetime(1_600_000_000_000));
    assert_eq!(first[5], Value::Binary(vec![1, 2, 3]));
    let second = set.rows().get(1).unwrap();
    assert!(second[1].is_null());
    assert!(second[4].is_null());
    conn.free_result(set).unwrap();
}

#[test]
fn test_values_outside_the_column_type_survive() {
    let mut conn = connect("it-widen");
    conn.query_str("CREATE TABLE t (v INT)").unwrap();
    conn.query_str("INSERT INTO t VALUES (5000000000), (7)").unwrap();
    conn.query_str("SELECT v FROM t ORDER BY rowid").unwrap();
    let set = conn.store_result_v2().unwrap();
    assert_eq!(set.fields()[0].data_type, DataType::Int64);
    let values: Vec<Value> = set.iter().map(|row| row[0].clone()).collect();
    assert_eq!(values, vec![Value::Int64(5_000_000_000), Value::Int64(7)]);

    conn.query_str("CREATE TABLE m (v)").unwrap();
    conn.query_str("INSERT INTO m VALUES (1), ('abc'), (NULL), (2.5)").unwrap();
    conn.query_str("SELECT v FROM m ORDER BY rowid").unwrap();
    let set = conn.store_result_v2().unwrap();
    assert_eq!(set.fields()[0].data_type, DataType::String);
    let values: Vec<Value> = set.iter().map(|row| row[0].clone()).collect();
    assert_eq!(
        values,
        vec![Value::from("1"), Value::from("abc"), Value::Null, Value::from("2.5")]
    );
}

#[test]
fn test_last_insert_id_tracks_inserts_only() {
    let mut conn = connect("it-insert-id");
    conn.query_str("CREATE TABLE t (id INTEGER PRIMARY KEY, v INT)").unwrap();
    conn.query_str("INSERT INTO t (v) VALUES (10), (20)").unwrap();
    assert_eq!(conn.last_insert_id(), 2);
    conn.query_str("UPDATE t SET v = 30 WHERE id = 1").unwrap();
    assert_eq!(conn.affected_rows(), 1);
    assert_eq!(conn.last_insert_id(), 0);
    conn.query_str("DELETE FROM t").unwrap();
    assert_eq!(conn.last_insert_id(), 0);
}

#[test]
fn test_dsn_controls_datetime_cells() {
    let registry = Registry::default();
    let mut conn = registry
        .open_dsn("u:p@mem(it-dsn-time)/clock?loc=+02:00&timeout=2000")
        .unwrap();
    assert_eq!(conn.config().connect_timeout(), Duration::from_millis(2000));
    conn.query_str("CREATE TABLE ev (at DATETIME)").unwrap();
    conn.query_with_args("INSERT INTO ev VALUES (?)", &[Value::Datetime(1_704_164_645_678)])
        .unwrap();

    conn.query_str("SELECT at FROM ev").unwrap();
    let set = conn.store_result_v2().unwrap();
    assert_eq!(set.fields()[0].data_type, DataType::String);
    assert_eq!(set.rows().head().unwrap()[0], Value::from("2024-01-02 05:04:05.678"));

    let mut parsed = registry
        .open_dsn("u:p@mem(it-dsn-time)/clock?parseTime=true&loc=+02:00")
        .unwrap();
    parsed.query_str("SELECT at FROM ev").unwrap();
    let set = parsed.store_result_v2().unwrap();
    assert_eq!(set.fields()[0].data_type, DataType::Datetime);
    assert_eq!(set.rows().head().unwrap()[0], Value::Datetime(1_704_164_645_678));
}

#[test]
fn test_streaming_and_materialized_share_release_path() {
    let mut conn = connect("it-release");
    conn.query_str("SELECT 1 AS a UNION ALL SELECT 2 UNION ALL SELECT 3").unwrap();
    let stored = conn.store(StoreMode::Streaming).unwrap();
    assert!(matches!(stored, StoredResult::Reader(_)));
    let mut reader = stored.into_reader();
    let values: Vec<Value> = reader.by_ref().take(2).map(|row| row[0].clone()).collect();
    assert_eq!(values, vec![Value::Int64(1), Value::Int64(2)]);
    conn.free_result(reader).unwrap();

    conn.query_str("SELECT 'x' AS b").unwrap();
    let stored = conn.store(StoreMode::Materialized).unwrap();
    assert_eq!(stored.fields()[0].name, "b");
    conn.free_result(stored).unwrap();
}

#[test]
fn test_databases_are_isolated() {
    let mut conn = connect("it-databases");
    conn.query_str("CREATE DATABASE IF NOT EXISTS alpha").unwrap();
    conn.query_str("CREATE DATABASE IF NOT EXISTS beta").unwrap();
    conn.query(b"CREATE TABLE t (v INT)", None, Some("alpha")).unwrap();
    conn.query(b"INSERT INTO t VALUES (1)", None, Some("alpha")).unwrap();
    assert!(conn.query(b"SELECT v FROM t", None, Some("beta")).is_err());

    conn.query_str("USE alpha").unwrap();
    conn.query_str("SELECT v FROM t").unwrap();
    let set = conn.store_result_v2().unwrap();
    assert_eq!(set.rows().head().unwrap()[0], Value::Int(1));

    conn.query_str("SHOW DATABASES").unwrap();
    let names: Vec<String> = conn
        .store_result_v2()
        .unwrap()
        .iter()
        .filter_map(|row| row[0].as_str().map(str::to_string))
        .collect();
    assert!(names.contains(&"alpha".to_string()));
    assert!(names.contains(&"beta".to_string()));
}

#[test]
fn test_query_timeout() {
    let mut conn = connect("it-timeout");
    conn.set_query_timeout(Some(Duration::from_millis(50)));
    let err = conn
        .query_str("WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) SELECT max(x) FROM c")
        .unwrap_err();
    assert!(matches!(err, DriverError::Timeout(_)));
    assert!(err.is_recoverable());
    conn.set_query_timeout(None);
    conn.query_str("SELECT 1").unwrap();
}

#[test]
fn test_load_csv_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("points.csv");
    fs::write(
        &path,
        "id,name,value,active\n1,alpha,1.5,true\n2,beta,,false\n3,gamma,-7.25,true\n",
    )
    .unwrap();

    let mut conn = connect("it-csv");
    conn.query_str("USE csvdb").unwrap();
    let mut loader = conn.table_new("points").unwrap();
    assert_eq!(conn.load_csv_file(&path, &mut loader).unwrap(), 3);
    assert_eq!(loader.rows_loaded(), 3);

    conn.query_str("SELECT name, value FROM points WHERE value IS NULL").unwrap();
    let set = conn.store_result_v2().unwrap();
    assert_eq!(set.row_count(), 1);
    assert_eq!(set.rows().head().unwrap()[0], Value::from("beta"));

    let missing = dir.path().join("missing.csv");
    assert!(conn.load_csv_file(&missing, &mut loader).is_err());
}

#[test]
fn test_load_csv_without_header() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("plain.tsv");
    fs::write(&path, "10\tx\n20\ty\n").unwrap();

    let mut conn = connect("it-csv-plain");
    let mut loader = TableLoader::new("plain").unwrap().with_delimiter(b'\t').with_header(false);
    assert_eq!(conn.load_csv_file(&path, &mut loader).unwrap(), 2);
    conn.query_str("SELECT sum(c1) FROM plain").unwrap();
    let set = conn.store_result_v2().unwrap();
    assert_eq!(set.rows().head().unwrap()[0].as_i64(), Some(30));
}

#[test]
fn test_file_store_survives_reconnect() {
    let dir = TempDir::new().unwrap();
    let conn_str = format!("user=u;servers=file://{};db=persisted", dir.path().display());
    let registry = Registry::new(DriverConfig::default());
    {
        let mut conn = registry.new_connection(TSDB_ML_VERSION).unwrap();
        conn.connect(&conn_str).unwrap();
        conn.query_str("CREATE TABLE kv (k STRING, v STRING)").unwrap();
        conn.query_str("INSERT INTO kv VALUES ('a', 'b')").unwrap();
        registry.kill_me(conn);
    }
    let mut conn = registry.new_connection(TSDB_ML_VERSION).unwrap();
    conn.connect(&conn_str).unwrap();
    conn.query_str("SELECT v FROM kv WHERE k = 'a'").unwrap();
    let set = conn.store_result_v2().unwrap();
    assert_eq!(set.rows().head().unwrap()[0], Value::from("b"));
}
