//! End-to-end tests for the encryption middleware.

use sealdb_crypto::{
    create_encryption_middleware, reencode_table, CborSerializer, CryptoError, EncryptionOptions,
    CRYPTO_FIELD,
};
use sealdb_storage::{
    CountRequest, Cursor, DbCore, DbCoreTable, DbSchema, GetManyRequest, GetRequest, KeyRange,
    Middleware, MutateRequest, MutateResponse, OpenCursorRequest, Query, QueryRequest,
    QueryResponse, StorageError, StorageFuture, StorageResult, TableSchema, Transaction,
    TransactionMode, Value,
};
use sealdb_testkit::prelude::*;
use std::cell::RefCell;
use std::rc::Rc;

fn foo() -> Value {
    entry("foo", "bar", 1)
}

fn xyz() -> Value {
    entry("xyz", "qwe", 2)
}

fn seeded(db: &TestDb) {
    let core = db.core();
    db.run(async move { put_all(&*core, "entries", vec![foo(), xyz()]).await })
        .unwrap();
}

fn field_names(value: &Value) -> Vec<String> {
    value.as_map().unwrap().keys().cloned().collect()
}

fn crypto_error(err: &StorageError) -> &CryptoError {
    CryptoError::from_storage(err).unwrap_or_else(|| panic!("not an encryption error: {err}"))
}

#[test]
fn writes_plaintext_without_middleware() {
    let db = TestDb::plain(entries_schema());
    seeded(&db);
    assert_eq!(db.engine.raw_get("entries", "foo").unwrap(), Some(foo()));
}

#[test]
fn writes_encrypted_records() {
    let db = TestDb::encrypted(entries_schema(), EncryptionOptions::new());
    seeded(&db);

    let raw = db.engine.raw_get("entries", "foo").unwrap().unwrap();
    assert_eq!(field_names(&raw), vec![CRYPTO_FIELD, "index", "key"]);
    assert_eq!(raw.get("key"), Some(&Value::from("foo")));
    assert_eq!(raw.get("index"), Some(&Value::from(1)));
    assert!(raw.get(CRYPTO_FIELD).and_then(Value::as_bytes).is_some());
}

#[test]
fn reads_encrypted_records() {
    let db = TestDb::encrypted(entries_schema(), EncryptionOptions::new());
    seeded(&db);
    let core = db.core();

    db.run(async move {
        assert_eq!(get(&*core, "entries", Value::from("foo")).await?, Some(foo()));

        let keys = vec![Value::from("foo"), Value::from("missing"), Value::from("xyz")];
        assert_eq!(
            bulk_get(&*core, "entries", keys).await?,
            vec![Some(foo()), None, Some(xyz())]
        );

        assert_eq!(to_array(&*core, "entries").await?, vec![foo(), xyz()]);
        assert_eq!(count(&*core, "entries").await?, 2);
        assert_eq!(where_equals(&*core, "entries", "key", Value::from("xyz")).await?, vec![xyz()]);
        assert_eq!(where_equals(&*core, "entries", "index", Value::from(1)).await?, vec![foo()]);

        let first = filter_count(&*core, "entries", |e| e.get("index") == Some(&Value::from(1)));
        assert_eq!(first.await?, 1);
        let both = filter(&*core, "entries", |e| {
            matches!(e.get("index").and_then(Value::as_integer), Some(1 | 2))
        });
        assert_eq!(both.await?, vec![foo(), xyz()]);
        Ok(())
    })
    .unwrap();
}

#[test]
fn key_only_queries_and_empty_cursors_pass_through() {
    let db = TestDb::encrypted(entries_schema(), EncryptionOptions::new());
    seeded(&db);
    let core = db.core();

    db.run(async move {
        let table = core.table("entries")?;
        let trans = core.transaction(&["entries"], TransactionMode::ReadOnly)?;
        let keys = table.query(QueryRequest {
            trans: Rc::clone(&trans),
            query: Query::index("index", KeyRange::all()),
            values: false,
            limit: None,
        });
        let empty = table.open_cursor(OpenCursorRequest {
            trans,
            query: Query::primary(KeyRange::only("nothing")),
            values: true,
            reverse: false,
        });
        assert_eq!(keys.await?.result, vec![Value::from("foo"), Value::from("xyz")]);
        assert!(empty.await?.is_none());
        Ok(())
    })
    .unwrap();
}

#[test]
fn excluded_tables_stay_plaintext() {
    let schema = DbSchema::parse(
        random_db_name(),
        1,
        &[("entries", "&key,index"), ("settings", "&name")],
    )
    .unwrap();
    let db = TestDb::encrypted(schema, EncryptionOptions::new().exclude_table("settings"));
    let core = db.core();
    let setting = Value::map([("name", "theme"), ("mode", "dark")]);
    let stored = setting.clone();

    db.run(async move {
        put_all(&*core, "settings", vec![stored]).await?;
        put_all(&*core, "entries", vec![foo()]).await
    })
    .unwrap();

    assert_eq!(db.engine.raw_get("settings", "theme").unwrap(), Some(setting));
    let raw = db.engine.raw_get("entries", "foo").unwrap().unwrap();
    assert!(raw.get(CRYPTO_FIELD).is_some());
}

#[test]
fn cursor_matches_bulk_read_with_slow_cipher() {
    let schema = DbSchema::parse(random_db_name(), 1, &[("entries", "&key")]).unwrap();
    let db = TestDb::plain(schema);
    let slow = SlowCipher::new(test_cipher(), &db.handle(), 5);
    db.db.use_middleware(Rc::new(create_encryption_middleware(
        Rc::new(slow),
        EncryptionOptions::new(),
    )));
    let core = db.core();
    let items = numbered_entries(100, 1024);
    let expected = items.clone();

    let (walked, bulk) = db
        .run(async move {
            put_all(&*core, "entries", items).await?;
            let walked = Rc::new(RefCell::new(Vec::new()));
            let sink = Rc::clone(&walked);
            each(&*core, "entries", move |value| sink.borrow_mut().push(value)).await?;
            let bulk = to_array(&*core, "entries").await?;
            let walked = walked.take();
            Ok((walked, bulk))
        })
        .unwrap();

    assert_eq!(walked, bulk);
    assert_eq!(walked, expected);
}

#[test]
fn schema_upgrade_then_reencode() {
    let db = TestDb::encrypted(entries_schema(), EncryptionOptions::new());
    seeded(&db);

    let name = db.engine.schema().name;
    db.engine
        .upgrade(DbSchema::parse(name, 2, &[("entries", "&key,value")]).unwrap())
        .unwrap();

    // Existing records still decode, but the new index has no plaintext
    // copy to read yet.
    let core = db.core();
    let (before, unindexed) = db
        .run(async move {
            let before = to_array(&*core, "entries").await?;
            let unindexed = where_equals(&*core, "entries", "value", Value::from("qwe")).await?;
            Ok((before, unindexed))
        })
        .unwrap();
    assert_eq!(before, vec![foo(), xyz()]);
    assert!(unindexed.is_empty());

    let core = db.core();
    let written = db
        .run(async move {
            let rewritten = reencode_table(&core, "entries", |record| {
                let upper = record
                    .get("value")
                    .and_then(Value::as_text)
                    .map(str::to_uppercase);
                if let Some(upper) = upper {
                    record.insert("value", Value::from(upper)).unwrap();
                }
            });
            rewritten.await.map_err(CryptoError::into_storage)
        })
        .unwrap();
    assert_eq!(written, 2);

    let core = db.core();
    let (all, found) = db
        .run(async move {
            let all = to_array(&*core, "entries").await?;
            let found = where_equals(&*core, "entries", "value", Value::from("QWE")).await?;
            Ok((all, found))
        })
        .unwrap();
    assert_eq!(all, vec![entry("foo", "BAR", 1), entry("xyz", "QWE", 2)]);
    assert_eq!(found, vec![entry("xyz", "QWE", 2)]);

    let raw = db.engine.raw_get("entries", "xyz").unwrap().unwrap();
    assert_eq!(field_names(&raw), vec![CRYPTO_FIELD, "key", "value"]);
}

#[test]
fn wrong_key_is_a_cipher_failure() {
    let db = TestDb::encrypted(entries_schema(), EncryptionOptions::new());
    seeded(&db);
    db.db.use_middleware(Rc::new(create_encryption_middleware(
        random_cipher(),
        EncryptionOptions::new(),
    )));
    let core = db.core();

    let err = db
        .run(async move { get(&*core, "entries", Value::from("foo")).await })
        .unwrap_err();
    assert!(crypto_error(&err).is_cipher());
}

#[test]
fn corrupt_blobs_fail_reads() {
    let db = TestDb::encrypted(entries_schema(), EncryptionOptions::new());
    let base = db.db.base();
    let garbage = Value::map([
        ("key", Value::from("garbage")),
        ("index", Value::from(1)),
        (CRYPTO_FIELD, Value::Bytes(vec![7; 48])),
    ]);
    let mistyped = Value::map([
        ("key", Value::from("mistyped")),
        ("index", Value::from(2)),
        (CRYPTO_FIELD, Value::from("not bytes")),
    ]);
    db.run(async move { put_all(&*base, "entries", vec![garbage, mistyped]).await })
        .unwrap();

    let core = db.core();
    let err = db
        .run(async move { get(&*core, "entries", Value::from("garbage")).await })
        .unwrap_err();
    assert!(crypto_error(&err).is_cipher());

    let core = db.core();
    let err = db
        .run(async move { get(&*core, "entries", Value::from("mistyped")).await })
        .unwrap_err();
    assert!(crypto_error(&err).is_serialization());

    // A cursor fails through the lower cursor's own failure path.
    let core = db.core();
    let err = db
        .run(async move { each(&*core, "entries", |_| {}).await })
        .unwrap_err();
    assert!(crypto_error(&err).is_cipher());
}

#[test]
fn legacy_plain_records_read_unchanged() {
    let db = TestDb::encrypted(entries_schema(), EncryptionOptions::new());
    let base = db.db.base();
    let core = db.core();

    let read = db
        .run(async move {
            put_all(&*base, "entries", vec![foo()]).await?;
            put_all(&*core, "entries", vec![xyz()]).await?;
            to_array(&*core, "entries").await
        })
        .unwrap();
    assert_eq!(read, vec![foo(), xyz()]);
}

#[test]
fn unserializable_record_fails_the_write_only() {
    let db = TestDb::encrypted(entries_schema(), EncryptionOptions::new());
    let core = db.core();
    let blob = Value::map([("key", Value::from("blob")), ("data", Value::Bytes(vec![1, 2]))]);

    let err = db
        .run(async move { put_all(&*core, "entries", vec![blob]).await })
        .unwrap_err();
    assert!(crypto_error(&err).is_serialization());
    assert!(db.engine.raw_values("entries").unwrap().is_empty());
}

#[test]
fn cbor_serializer_keeps_bytes() {
    let options = EncryptionOptions::new().serializer(Rc::new(CborSerializer));
    let db = TestDb::encrypted(entries_schema(), options);
    let core = db.core();
    let blob = Value::map([
        ("key", Value::from("blob")),
        ("index", Value::from(3)),
        ("data", Value::Bytes(vec![0, 1, 254, 255])),
    ]);
    let expected = blob.clone();

    let read = db
        .run(async move {
            put_all(&*core, "entries", vec![blob]).await?;
            get(&*core, "entries", Value::from("blob")).await
        })
        .unwrap();
    assert_eq!(read, Some(expected));
}

// Records what reaches `mutate` at one position of the stack.

type Seen = Rc<RefCell<Vec<Value>>>;

struct Spy {
    level: i32,
    seen: Seen,
}

impl Middleware for Spy {
    fn name(&self) -> &str {
        "spy"
    }

    fn level(&self) -> i32 {
        self.level
    }

    fn create(&self, lower: Rc<dyn DbCore>) -> Rc<dyn DbCore> {
        Rc::new(SpyCore {
            lower,
            seen: Rc::clone(&self.seen),
        })
    }
}

struct SpyCore {
    lower: Rc<dyn DbCore>,
    seen: Seen,
}

impl DbCore for SpyCore {
    fn schema(&self) -> DbSchema {
        self.lower.schema()
    }

    fn table(&self, name: &str) -> StorageResult<Rc<dyn DbCoreTable>> {
        Ok(Rc::new(SpyTable {
            lower: self.lower.table(name)?,
            seen: Rc::clone(&self.seen),
        }))
    }

    fn transaction(&self, stores: &[&str], mode: TransactionMode) -> StorageResult<Transaction> {
        self.lower.transaction(stores, mode)
    }
}

struct SpyTable {
    lower: Rc<dyn DbCoreTable>,
    seen: Seen,
}

impl DbCoreTable for SpyTable {
    fn name(&self) -> &str {
        self.lower.name()
    }

    fn schema(&self) -> TableSchema {
        self.lower.schema()
    }

    fn mutate(&self, mut req: MutateRequest) -> StorageFuture<MutateResponse> {
        if let Some(values) = req.values_mut() {
            self.seen.borrow_mut().extend(values.iter().cloned());
        }
        self.lower.mutate(req)
    }

    fn get(&self, req: GetRequest) -> StorageFuture<Option<Value>> {
        self.lower.get(req)
    }

    fn get_many(&self, req: GetManyRequest) -> StorageFuture<Vec<Option<Value>>> {
        self.lower.get_many(req)
    }

    fn query(&self, req: QueryRequest) -> StorageFuture<QueryResponse> {
        self.lower.query(req)
    }

    fn open_cursor(&self, req: OpenCursorRequest) -> StorageFuture<Option<Cursor>> {
        self.lower.open_cursor(req)
    }

    fn count(&self, req: CountRequest) -> StorageFuture<u64> {
        self.lower.count(req)
    }
}

fn spied(level: i32) -> (TestDb, Seen) {
    let db = TestDb::encrypted(entries_schema(), EncryptionOptions::new());
    let seen = Seen::default();
    db.db.use_middleware(Rc::new(Spy {
        level,
        seen: Rc::clone(&seen),
    }));
    (db, seen)
}

#[test]
fn stage_below_sees_only_ciphertext() {
    let (db, seen) = spied(-1);
    assert_eq!(db.db.middleware_names(), vec!["spy", "encryption"]);
    seeded(&db);

    let below = seen.borrow();
    assert_eq!(below.len(), 2);
    assert!(below.iter().all(|v| v.get(CRYPTO_FIELD).is_some() && v.get("value").is_none()));

    let core = db.core();
    let read = db.run(async move { to_array(&*core, "entries").await }).unwrap();
    assert_eq!(read, vec![foo(), xyz()]);
}

#[test]
fn stage_above_sees_plaintext() {
    let (db, seen) = spied(1);
    assert_eq!(db.db.middleware_names(), vec!["encryption", "spy"]);
    seeded(&db);

    assert_eq!(*seen.borrow(), vec![foo(), xyz()]);
    let raw = db.engine.raw_get("entries", "xyz").unwrap().unwrap();
    assert!(raw.get(CRYPTO_FIELD).is_some());
}
