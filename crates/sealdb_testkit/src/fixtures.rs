//! Test fixtures and database helpers.
//!
//! Provides ciphers with known keys, the schemas used across the test
//! suites and in-memory databases with or without encryption.

use futures::future::{FutureExt, LocalBoxFuture};
use sealdb_crypto::{
    create_encryption_middleware, AesGcmCipher, Cipher, CryptoResult, EncryptionKey,
    EncryptionOptions,
};
use sealdb_storage::{
    Database, DbCore, DbSchema, EventLoop, LoopHandle, MemoryEngine, StorageResult, Value,
};
use std::future::Future;
use std::rc::Rc;

/// Fixed AES-256 key used by [`test_cipher`].
pub const TEST_KEY: [u8; 32] = [
    140, 22, 81, 137, 137, 56, 98, 28, 52, 215, 100, 110, 146, 161, 33, 228, 175, 127, 154, 17,
    189, 218, 72, 67, 182, 57, 17, 81, 245, 199, 172, 231,
];

/// Returns [`TEST_KEY`] as an encryption key.
pub fn test_key() -> EncryptionKey {
    EncryptionKey::from_bytes(&TEST_KEY).expect("TEST_KEY has the right size")
}

/// AES-GCM cipher keyed with [`TEST_KEY`].
pub fn test_cipher() -> Rc<dyn Cipher> {
    Rc::new(AesGcmCipher::new(&test_key()))
}

/// AES-GCM cipher with a freshly generated key.
pub fn random_cipher() -> Rc<dyn Cipher> {
    Rc::new(AesGcmCipher::new(&EncryptionKey::generate()))
}

/// A cipher that sleeps on the event loop before every call.
///
/// Useful to make every encrypt/decrypt span several turns.
pub struct SlowCipher {
    inner: Rc<dyn Cipher>,
    handle: LoopHandle,
    delay_ms: u64,
}

impl SlowCipher {
    /// Wraps `inner`, delaying each call by `delay_ms` virtual milliseconds.
    pub fn new(inner: Rc<dyn Cipher>, handle: &LoopHandle, delay_ms: u64) -> Self {
        Self {
            inner,
            handle: handle.clone(),
            delay_ms,
        }
    }
}

impl Cipher for SlowCipher {
    fn encrypt(&self, data: Vec<u8>) -> LocalBoxFuture<'static, CryptoResult<Vec<u8>>> {
        let sleep = self.handle.sleep(self.delay_ms);
        let inner = Rc::clone(&self.inner);
        async move {
            sleep.await;
            inner.encrypt(data).await
        }
        .boxed_local()
    }

    fn decrypt(&self, data: Vec<u8>) -> LocalBoxFuture<'static, CryptoResult<Vec<u8>>> {
        let sleep = self.handle.sleep(self.delay_ms);
        let inner = Rc::clone(&self.inner);
        async move {
            sleep.await;
            inner.decrypt(data).await
        }
        .boxed_local()
    }
}

/// Generates a unique database name.
pub fn random_db_name() -> String {
    format!("test-{}", uuid::Uuid::new_v4().simple())
}

/// Schema with one table, `entries`, keyed by `key` and indexed on `index`.
pub fn entries_schema() -> DbSchema {
    DbSchema::parse(random_db_name(), 1, &[("entries", "&key,index")])
        .expect("entries schema is valid")
}

/// Builds an `entries` record.
pub fn entry(key: &str, value: &str, index: i64) -> Value {
    Value::map([
        ("key", Value::from(key)),
        ("value", Value::from(value)),
        ("index", Value::from(index)),
    ])
}

/// An event loop, an in-memory engine and a database on top of it.
pub struct TestDb {
    /// The event loop driving everything.
    pub ev: EventLoop,
    /// The engine, for raw inspection.
    pub engine: MemoryEngine,
    /// The database, with whatever middleware the test installed.
    pub db: Rc<Database>,
}

impl TestDb {
    /// Creates a database with no middleware.
    pub fn plain(schema: DbSchema) -> Self {
        let ev = EventLoop::new();
        Self::on_loop(ev, schema)
    }

    /// Creates a database encrypted with [`test_cipher`].
    pub fn encrypted(schema: DbSchema, options: EncryptionOptions) -> Self {
        let db = Self::plain(schema);
        db.db.use_middleware(Rc::new(create_encryption_middleware(test_cipher(), options)));
        db
    }

    /// Creates a database with no middleware on an existing loop.
    pub fn on_loop(ev: EventLoop, schema: DbSchema) -> Self {
        let engine = MemoryEngine::new(&ev.handle(), schema).expect("test schema is valid");
        let db = Rc::new(Database::new(engine.clone().into_core()));
        Self { ev, engine, db }
    }

    /// The loop handle.
    pub fn handle(&self) -> LoopHandle {
        self.ev.handle()
    }

    /// The outermost core, for use inside futures.
    pub fn core(&self) -> Rc<dyn DbCore> {
        Rc::clone(&self.db) as Rc<dyn DbCore>
    }

    /// Drives `future` to completion on the loop.
    pub fn run<T: 'static>(
        &self,
        future: impl Future<Output = StorageResult<T>> + 'static,
    ) -> StorageResult<T> {
        self.ev.run_until(future)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_names_are_unique() {
        assert_ne!(random_db_name(), random_db_name());
    }

    #[test]
    fn test_key_is_stable() {
        assert_eq!(test_key().as_bytes(), &TEST_KEY);
    }
}
