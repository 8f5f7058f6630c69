#![allow(dead_code)]

use gongdb_exec::{
    Column, DataType, EngineConfig, Expr, ExprList, LockManager, QueryEngine, StorageEngine,
    TableMeta, Value,
};
use rusqlite::types::ValueRef;
use rusqlite::Connection;

pub type Engine = QueryEngine<StorageEngine, LockManager>;

pub const COUNTRIES: [(&str, &str); 4] = [
    ("USA", "United States"),
    ("CAN", "Canada"),
    ("MEX", "Mexico"),
    ("FRA", "France"),
];

/// Country code of city `i`; every fifth city has none.
pub fn city_country(i: i64) -> Option<&'static str> {
    match i % 5 {
        4 => None,
        n => Some(COUNTRIES[n as usize].0),
    }
}

pub fn city_population(i: i64) -> Option<i64> {
    if i % 7 == 0 {
        None
    } else {
        Some(i * 1000 + 500)
    }
}

pub fn engine() -> Engine {
    QueryEngine::new(
        StorageEngine::new_in_memory(),
        LockManager::new(),
        EngineConfig::default(),
    )
}

/// 55 cities over 4 countries, loaded into both engines.
pub fn world() -> (Engine, Connection) {
    let mut engine = engine();
    let conn = Connection::open_in_memory().expect("open sqlite");
    conn.execute_batch(
        "CREATE TABLE country(short TEXT, name TEXT);
         CREATE TABLE city(name TEXT, population INTEGER, country TEXT);",
    )
    .expect("create sqlite tables");

    let storage = engine.catalog_mut();
    storage
        .create_table(TableMeta::new(
            "country",
            vec![
                Column::new("short", DataType::Text),
                Column::new("name", DataType::Text),
            ],
        ))
        .expect("create country");
    storage
        .create_table(TableMeta::new(
            "city",
            vec![
                Column::new("name", DataType::Text),
                Column::new("population", DataType::Integer),
                Column::new("country", DataType::Text),
            ],
        ))
        .expect("create city");

    for (short, name) in COUNTRIES {
        storage
            .insert_row("country", &[Value::from(short), Value::from(name)])
            .expect("insert country");
        conn.execute(
            "INSERT INTO country VALUES (?1, ?2)",
            rusqlite::params![short, name],
        )
        .expect("insert sqlite country");
    }
    for i in 0..55 {
        let name = format!("city{:02}", i);
        storage
            .insert_row(
                "city",
                &[
                    Value::from(name.as_str()),
                    Value::from(city_population(i)),
                    Value::from(city_country(i)),
                ],
            )
            .expect("insert city");
        conn.execute(
            "INSERT INTO city VALUES (?1, ?2, ?3)",
            rusqlite::params![name, city_population(i), city_country(i)],
        )
        .expect("insert sqlite city");
    }
    (engine, conn)
}

/// Two integer tables `a(id, k)` and `b(id, k)` with overlapping and NULL
/// join keys.
pub fn key_tables(a_keys: &[Option<i64>], b_keys: &[Option<i64>]) -> (Engine, Connection) {
    let mut engine = engine();
    let conn = Connection::open_in_memory().expect("open sqlite");
    conn.execute_batch(
        "CREATE TABLE a(id INTEGER, k INTEGER);
         CREATE TABLE b(id INTEGER, k INTEGER);",
    )
    .expect("create sqlite tables");
    for (table, keys) in [("a", a_keys), ("b", b_keys)] {
        engine
            .catalog_mut()
            .create_table(TableMeta::new(
                table,
                vec![
                    Column::new("id", DataType::Integer),
                    Column::new("k", DataType::Integer),
                ],
            ))
            .expect("create table");
        for (id, key) in keys.iter().enumerate() {
            let id = id as i64;
            engine
                .catalog_mut()
                .insert_row(table, &[Value::from(id), Value::from(*key)])
                .expect("insert row");
            conn.execute(
                &format!("INSERT INTO {} VALUES (?1, ?2)", table),
                rusqlite::params![id, key],
            )
            .expect("insert sqlite row");
        }
    }
    (engine, conn)
}

pub fn select(exprs: Vec<Expr>) -> ExprList {
    exprs.into_iter().collect()
}

pub fn sqlite_rows(conn: &Connection, sql: &str) -> Vec<Vec<Value>> {
    let mut stmt = conn.prepare(sql).expect("prepare sqlite query");
    let column_count = stmt.column_count();
    let mut rows = stmt.query([]).expect("run sqlite query");
    let mut all_rows = Vec::new();
    while let Some(row) = rows.next().expect("sqlite row") {
        let mut values = Vec::with_capacity(column_count);
        for i in 0..column_count {
            let value = match row.get_ref(i).expect("sqlite value") {
                ValueRef::Null => Value::Null,
                ValueRef::Integer(v) => Value::Integer(v),
                ValueRef::Real(v) => Value::Real(v),
                ValueRef::Text(s) => Value::Text(String::from_utf8_lossy(s).to_string()),
                ValueRef::Blob(_) => Value::Null,
            };
            values.push(value);
        }
        all_rows.push(values);
    }
    all_rows
}

/// Rows in a canonical order so results can be compared as bags.
pub fn sorted(mut rows: Vec<Vec<Value>>) -> Vec<Vec<Value>> {
    rows.sort_by(|a, b| {
        a.iter()
            .zip(b)
            .map(|(x, y)| x.sort_cmp(y))
            .find(|ordering| ordering.is_ne())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    rows
}
