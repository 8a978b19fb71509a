//! The encryption middleware stage.
//!
//! Writes are encoded before they reach the lower core and reads are
//! decoded on the way back up. Every wait on the cipher or serializer is
//! bridged with a [`TransactionKeeper`], so the transaction stays open
//! while records are being encrypted or decrypted.

use crate::cipher::Cipher;
use crate::cursor::CryptoCursor;
use crate::error::{CryptoError, STAGE};
use crate::keepalive::TransactionKeeper;
use crate::options::EncryptionOptions;
use crate::record::RecordCodec;
use futures::channel::oneshot;
use futures::future::{self, FutureExt};
use futures::task::LocalSpawnExt;
use sealdb_storage::{
    CountRequest, Cursor, DbCore, DbCoreTable, DbSchema, GetManyRequest, GetRequest, Middleware,
    MutateRequest, MutateResponse, OpenCursorRequest, QueryRequest, QueryResponse, StorageError,
    StorageFuture, StorageResult, TableSchema, Transaction, TransactionMode, Value,
};
use std::collections::BTreeSet;
use std::future::Future;
use std::rc::Rc;

/// Name under which the stage registers in a middleware stack.
pub const MIDDLEWARE_NAME: &str = "encryption";

/// Creates the encryption middleware.
pub fn create_encryption_middleware(
    cipher: Rc<dyn Cipher>,
    options: EncryptionOptions,
) -> EncryptionMiddleware {
    EncryptionMiddleware::new(cipher, options)
}

/// Middleware that encrypts records of every non-excluded table.
#[derive(Clone, Debug)]
pub struct EncryptionMiddleware {
    codec: RecordCodec,
    excluded: Rc<BTreeSet<String>>,
}

impl EncryptionMiddleware {
    /// Creates the middleware.
    pub fn new(cipher: Rc<dyn Cipher>, options: EncryptionOptions) -> Self {
        let serializer = options.resolve_serializer();
        Self {
            codec: RecordCodec::new(cipher, serializer),
            excluded: Rc::new(options.excluded_tables),
        }
    }

    /// The codec shared by every core this middleware creates.
    pub fn codec(&self) -> &RecordCodec {
        &self.codec
    }
}

impl Middleware for EncryptionMiddleware {
    fn name(&self) -> &str {
        MIDDLEWARE_NAME
    }

    fn create(&self, lower: Rc<dyn DbCore>) -> Rc<dyn DbCore> {
        tracing::debug!(excluded = ?self.excluded, "installing encryption middleware");
        Rc::new(EncryptionCore {
            lower,
            codec: self.codec.clone(),
            keeper: TransactionKeeper::new(),
            excluded: Rc::clone(&self.excluded),
        })
    }
}

/// A storage core whose tables encrypt their records.
pub struct EncryptionCore {
    lower: Rc<dyn DbCore>,
    codec: RecordCodec,
    keeper: TransactionKeeper,
    excluded: Rc<BTreeSet<String>>,
}

impl EncryptionCore {
    /// The keeper bridging this core's cipher and serializer waits.
    pub fn keeper(&self) -> &TransactionKeeper {
        &self.keeper
    }
}

impl DbCore for EncryptionCore {
    fn schema(&self) -> DbSchema {
        self.lower.schema()
    }

    fn table(&self, name: &str) -> StorageResult<Rc<dyn DbCoreTable>> {
        let lower = self.lower.table(name)?;
        if self.excluded.contains(name) {
            return Ok(lower);
        }
        Ok(Rc::new(EncryptedTable {
            lower,
            codec: self.codec.clone(),
            keeper: self.keeper.clone(),
        }))
    }

    fn transaction(&self, stores: &[&str], mode: TransactionMode) -> StorageResult<Transaction> {
        self.lower.transaction(stores, mode)
    }
}

/// Runs `work` on the transaction's spawner right away and returns its
/// outcome.
fn spawn_eager<T: 'static>(
    trans: &Transaction,
    work: impl Future<Output = StorageResult<T>> + 'static,
) -> StorageFuture<T> {
    let (tx, rx) = oneshot::channel();
    let task = async move {
        let _ = tx.send(work.await);
    };
    if let Err(e) = trans.spawner().spawn_local(task) {
        return future::ready(Err(StorageError::interceptor(STAGE, e))).boxed_local();
    }
    let id = trans.id();
    rx.map(move |outcome| {
        outcome.unwrap_or_else(|_| Err(CryptoError::KeepAliveCanceled { id }.into_storage()))
    })
    .boxed_local()
}

struct EncryptedTable {
    lower: Rc<dyn DbCoreTable>,
    codec: RecordCodec,
    keeper: TransactionKeeper,
}

impl DbCoreTable for EncryptedTable {
    fn name(&self) -> &str {
        self.lower.name()
    }

    fn schema(&self) -> TableSchema {
        self.lower.schema()
    }

    fn mutate(&self, mut req: MutateRequest) -> StorageFuture<MutateResponse> {
        let Some(values) = req.values_mut() else {
            return self.lower.mutate(req);
        };
        let records = std::mem::take(values);
        let trans = Rc::clone(req.trans());
        let encode = self.codec.encode_all(records, &self.lower.schema());
        let encoded = self.keeper.keep_try(&trans, encode);
        let lower = Rc::clone(&self.lower);

        spawn_eager(&trans, async move {
            let encoded = encoded.await.map_err(CryptoError::into_storage)?;
            if let Some(values) = req.values_mut() {
                *values = encoded;
            }
            lower.mutate(req).await
        })
    }

    fn get(&self, req: GetRequest) -> StorageFuture<Option<Value>> {
        let trans = Rc::clone(&req.trans);
        let found = self.lower.get(req);
        let codec = self.codec.clone();
        let keeper = self.keeper.clone();

        spawn_eager(&Rc::clone(&trans), async move {
            let found = found.await?;
            keeper
                .keep_try(&trans, codec.decode_opt(found))
                .await
                .map_err(CryptoError::into_storage)
        })
    }

    fn get_many(&self, req: GetManyRequest) -> StorageFuture<Vec<Option<Value>>> {
        let trans = Rc::clone(&req.trans);
        let found = self.lower.get_many(req);
        let codec = self.codec.clone();
        let keeper = self.keeper.clone();

        spawn_eager(&Rc::clone(&trans), async move {
            let found = found.await?;
            keeper
                .keep_try(&trans, codec.decode_all(found))
                .await
                .map_err(CryptoError::into_storage)
        })
    }

    fn query(&self, req: QueryRequest) -> StorageFuture<QueryResponse> {
        if !req.values {
            return self.lower.query(req);
        }
        let trans = Rc::clone(&req.trans);
        let response = self.lower.query(req);
        let codec = self.codec.clone();
        let keeper = self.keeper.clone();

        spawn_eager(&Rc::clone(&trans), async move {
            let mut response = response.await?;
            let values = std::mem::take(&mut response.result);
            response.result = keeper
                .keep_try(&trans, codec.decode_values(values))
                .await
                .map_err(CryptoError::into_storage)?;
            Ok(response)
        })
    }

    fn open_cursor(&self, req: OpenCursorRequest) -> StorageFuture<Option<Cursor>> {
        let codec = self.codec.clone();
        let keeper = self.keeper.clone();
        self.lower
            .open_cursor(req)
            .map(move |opened| {
                opened.map(|cursor| {
                    cursor.map(|inner| Rc::new(CryptoCursor::new(inner, codec, keeper)) as Cursor)
                })
            })
            .boxed_local()
    }

    fn count(&self, req: CountRequest) -> StorageFuture<u64> {
        self.lower.count(req)
    }
}
