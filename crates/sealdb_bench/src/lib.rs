//! Benchmark utilities.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use rand::distributions::Alphanumeric;
use rand::Rng;
use sealdb_codec::Value;
use sealdb_storage::{DbSchema, TableSchema};

/// Generate a random alphanumeric string of the specified length.
pub fn random_text(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Generate a record with an indexed key, an indexed number and a payload.
pub fn random_record(id: usize, payload_size: usize) -> Value {
    let mut rng = rand::thread_rng();
    Value::map([
        ("id", Value::from(format!("{id:08}"))),
        ("rank", Value::from(rng.gen_range(0..1000_i64))),
        ("payload", Value::from(random_text(payload_size))),
        (
            "meta",
            Value::map([
                ("owner", Value::from(random_text(12))),
                ("tags", Value::Array(vec![Value::from("a"), Value::from("b")])),
            ]),
        ),
    ])
}

/// Generate `count` records with the specified payload size.
pub fn generate_records(count: usize, payload_size: usize) -> Vec<Value> {
    (0..count).map(|i| random_record(i, payload_size)).collect()
}

/// Index spec of the benchmark table: primary key `id`, indexes `rank`
/// and `meta.owner`.
pub const BENCH_INDEXES: &str = "&id,rank,meta.owner";

/// Schema with the single `records` benchmark table.
pub fn bench_schema() -> DbSchema {
    DbSchema::parse("bench", 1, &[("records", BENCH_INDEXES)]).expect("benchmark schema is valid")
}

/// The benchmark table's schema.
pub fn bench_table() -> TableSchema {
    TableSchema::parse("records", BENCH_INDEXES).expect("benchmark schema is valid")
}
