//! Table operations and index evaluation for the in-memory engine.

use crate::error::{StorageError, StorageResult};
use crate::request::{
    CountRequest, GetManyRequest, GetRequest, KeyRange, MutateRequest, MutateResponse,
    OpenCursorRequest, QueryRequest, QueryResponse,
};
use crate::schema::{IndexSpec, TableSchema};
use crate::traits::{Cursor, DbCoreTable, StorageFuture};
use sealdb_codec::{compare_keys, Key, KeyPath, Value};
use std::rc::Rc;

use super::cursor::MemoryCursor;
use super::{not_found, EngineInner, TxnShared};

/// One position in an index: index key, primary key and record.
#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub(crate) key: Value,
    pub(crate) primary_key: Value,
    pub(crate) value: Value,
}

/// Keys `index` derives from `record`. Multi-entry indexes yield one key
/// per distinct valid array element; invalid keys yield nothing.
fn index_keys(index: &IndexSpec, record: &Value) -> Vec<Key> {
    let Some(raw) = index.key_path.extract(record) else {
        return Vec::new();
    };
    match raw {
        Value::Array(items) if index.multi_entry => {
            let mut keys: Vec<Key> = items.into_iter().filter_map(|v| Key::new(v).ok()).collect();
            keys.sort();
            keys.dedup();
            keys
        }
        raw => Key::new(raw).ok().into_iter().collect(),
    }
}

fn invalid_key(table: &str, value: Value) -> StorageResult<Key> {
    Key::new(value).map_err(|source| StorageError::InvalidKey {
        table: table.to_string(),
        source,
    })
}

impl EngineInner {
    /// Index entries of `table` within `range`, in index order.
    pub(crate) fn entries(
        &self,
        schema: &TableSchema,
        index: Option<&str>,
        range: &KeyRange,
        reverse: bool,
    ) -> StorageResult<Vec<Entry>> {
        let stores = self.stores.borrow();
        let store = stores.get(&schema.name).ok_or_else(|| not_found(&schema.name))?;

        let mut entries: Vec<Entry> = match index.filter(|name| !schema.is_primary(name)) {
            None => store
                .iter()
                .filter(|(pk, _)| range.contains(pk.as_value()))
                .map(|(pk, record)| Entry {
                    key: pk.as_value().clone(),
                    primary_key: pk.as_value().clone(),
                    value: record.clone(),
                })
                .collect(),
            Some(name) => {
                let spec = schema.index(name).ok_or_else(|| StorageError::IndexNotFound {
                    table: schema.name.clone(),
                    index: name.to_string(),
                })?;
                let mut found = Vec::new();
                for (pk, record) in store {
                    for key in index_keys(spec, record) {
                        if range.contains(key.as_value()) {
                            found.push(Entry {
                                key: key.into_value(),
                                primary_key: pk.as_value().clone(),
                                value: record.clone(),
                            });
                        }
                    }
                }
                found.sort_by(|a, b| {
                    compare_keys(&a.key, &b.key)
                        .then_with(|| compare_keys(&a.primary_key, &b.primary_key))
                });
                found
            }
        };
        if reverse {
            entries.reverse();
        }
        Ok(entries)
    }

    fn read(&self, table: &str, key: Value) -> StorageResult<Option<Value>> {
        let key = invalid_key(table, key)?;
        let stores = self.stores.borrow();
        let store = stores.get(table).ok_or_else(|| not_found(table))?;
        Ok(store.get(&key).cloned())
    }

    fn apply_mutation(
        &self,
        txn: &TxnShared,
        table: &str,
        req: MutateRequest,
    ) -> StorageResult<MutateResponse> {
        let schema = self.table_schema(table)?;
        let mut response = MutateResponse::default();
        match req {
            MutateRequest::Add { values, keys, .. } => {
                self.write_all(txn, &schema, values, keys, false, &mut response);
            }
            MutateRequest::Put { values, keys, .. } => {
                self.write_all(txn, &schema, values, keys, true, &mut response);
            }
            MutateRequest::Delete { keys, .. } => {
                let keys = keys
                    .into_iter()
                    .map(|k| invalid_key(table, k))
                    .collect::<StorageResult<Vec<_>>>()?;
                self.delete_keys(txn, table, keys);
            }
            MutateRequest::DeleteRange { range, .. } => {
                let keys: Vec<Key> = {
                    let stores = self.stores.borrow();
                    let store = stores.get(table).ok_or_else(|| not_found(table))?;
                    store
                        .keys()
                        .filter(|k| range.contains(k.as_value()))
                        .cloned()
                        .collect()
                };
                self.delete_keys(txn, table, keys);
            }
        }
        Ok(response)
    }

    fn write_all(
        &self,
        txn: &TxnShared,
        schema: &TableSchema,
        values: Vec<Value>,
        keys: Option<Vec<Value>>,
        overwrite: bool,
        response: &mut MutateResponse,
    ) {
        for (i, value) in values.into_iter().enumerate() {
            let explicit = keys.as_ref().and_then(|k| k.get(i)).cloned();
            match self.write_one(txn, schema, value, explicit, overwrite) {
                Ok(key) => {
                    response.results.push(Some(key.clone()));
                    response.last_result = Some(key);
                }
                Err(e) => {
                    tracing::trace!(table = %schema.name, item = i, error = %e, "write failed");
                    response.results.push(None);
                    response.failures.insert(i, e);
                }
            }
        }
        response.num_failures = response.failures.len();
    }

    fn write_one(
        &self,
        txn: &TxnShared,
        schema: &TableSchema,
        value: Value,
        explicit: Option<Value>,
        overwrite: bool,
    ) -> StorageResult<Value> {
        let missing = || StorageError::MissingKey {
            table: schema.name.clone(),
        };
        let key = match &schema.primary_key {
            KeyPath::None => explicit.ok_or_else(missing)?,
            path => path.extract(&value).ok_or_else(missing)?,
        };
        let key = invalid_key(&schema.name, key)?;

        let mut stores = self.stores.borrow_mut();
        let store = stores.get_mut(&schema.name).ok_or_else(|| not_found(&schema.name))?;
        if !overwrite && store.contains_key(&key) {
            return Err(StorageError::ConstraintViolation {
                table: schema.name.clone(),
                message: "key already exists".to_string(),
            });
        }
        for index in schema.indexes.iter().filter(|i| i.unique) {
            let new_keys = index_keys(index, &value);
            if new_keys.is_empty() {
                continue;
            }
            let clash = store
                .iter()
                .filter(|(pk, _)| **pk != key)
                .any(|(_, other)| index_keys(index, other).iter().any(|k| new_keys.contains(k)));
            if clash {
                return Err(StorageError::ConstraintViolation {
                    table: schema.name.clone(),
                    message: format!("unique index '{}' already holds this key", index.name),
                });
            }
        }

        let previous = store.insert(key.clone(), value);
        txn.record_undo(&schema.name, key.clone(), previous);
        Ok(key.into_value())
    }

    fn delete_keys(&self, txn: &TxnShared, table: &str, keys: Vec<Key>) {
        let mut stores = self.stores.borrow_mut();
        let Some(store) = stores.get_mut(table) else {
            return;
        };
        for key in keys {
            if let Some(previous) = store.remove(&key) {
                txn.record_undo(table, key, Some(previous));
            }
        }
    }
}

/// Table handle returned by [`super::MemoryEngine`].
pub(crate) struct MemoryTable {
    engine: Rc<EngineInner>,
    name: String,
}

impl MemoryTable {
    pub(crate) fn new(engine: Rc<EngineInner>, name: &str) -> Self {
        Self {
            engine,
            name: name.to_string(),
        }
    }
}

impl DbCoreTable for MemoryTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> TableSchema {
        self.engine
            .table_schema(&self.name)
            .unwrap_or_else(|_| TableSchema::new(self.name.clone(), KeyPath::None))
    }

    fn mutate(&self, req: MutateRequest) -> StorageFuture<MutateResponse> {
        let table = self.name.clone();
        let trans = Rc::clone(req.trans());
        self.engine
            .request(&trans, &self.name, true, move |engine, txn| {
                engine.apply_mutation(txn, &table, req)
            })
    }

    fn get(&self, req: GetRequest) -> StorageFuture<Option<Value>> {
        let table = self.name.clone();
        let GetRequest { trans, key } = req;
        self.engine
            .request(&trans, &self.name, false, move |engine, _| engine.read(&table, key))
    }

    fn get_many(&self, req: GetManyRequest) -> StorageFuture<Vec<Option<Value>>> {
        let table = self.name.clone();
        let GetManyRequest { trans, keys } = req;
        self.engine
            .request(&trans, &self.name, false, move |engine, _| {
                keys.into_iter()
                    .map(|key| engine.read(&table, key))
                    .collect()
            })
    }

    fn query(&self, req: QueryRequest) -> StorageFuture<QueryResponse> {
        let table = self.name.clone();
        let QueryRequest {
            trans,
            query,
            values,
            limit,
        } = req;
        self.engine
            .request(&trans, &self.name, false, move |engine, _| {
                let schema = engine.table_schema(&table)?;
                let entries = engine.entries(&schema, query.index.as_deref(), &query.range, false)?;
                let result = entries
                    .into_iter()
                    .take(limit.unwrap_or(usize::MAX))
                    .map(|e| if values { e.value } else { e.primary_key })
                    .collect();
                Ok(QueryResponse { result })
            })
    }

    fn open_cursor(&self, req: OpenCursorRequest) -> StorageFuture<Option<Cursor>> {
        let table = self.name.clone();
        let trans = Rc::clone(&req.trans);
        self.engine
            .request(&trans, &self.name, false, move |engine, txn| {
                let schema = engine.table_schema(&table)?;
                let first = engine
                    .entries(&schema, req.query.index.as_deref(), &req.query.range, req.reverse)?
                    .into_iter()
                    .next();
                Ok(first.map(|entry| {
                    Rc::new(MemoryCursor::new(engine, txn, req, table, entry)) as Cursor
                }))
            })
    }

    fn count(&self, req: CountRequest) -> StorageFuture<u64> {
        let table = self.name.clone();
        let CountRequest { trans, query } = req;
        self.engine
            .request(&trans, &self.name, false, move |engine, _| {
                let schema = engine.table_schema(&table)?;
                let entries = engine.entries(&schema, query.index.as_deref(), &query.range, false)?;
                Ok(entries.len() as u64)
            })
    }
}
