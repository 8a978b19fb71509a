//! Collection helpers.
//!
//! Each helper opens its own transaction, issues its requests before
//! returning and resolves once the operation is done. They take any
//! [`DbCore`], so the same test can run against a plain engine or through
//! a middleware stack.

use futures::future::{self, FutureExt};
use sealdb_storage::{
    CountRequest, DbCore, DbCoreTable, GetManyRequest, GetRequest, KeyRange, MutateRequest,
    MutateResponse, OpenCursorRequest, Query, QueryRequest, StorageFuture, StorageResult,
    Transaction, TransactionMode, Value,
};
use std::cell::RefCell;
use std::rc::Rc;

fn open(
    core: &dyn DbCore,
    table: &str,
    mode: TransactionMode,
) -> StorageResult<(Rc<dyn DbCoreTable>, Transaction)> {
    let handle = core.table(table)?;
    let trans = core.transaction(&[table], mode)?;
    Ok((handle, trans))
}

macro_rules! open_or_fail {
    ($core:expr, $table:expr, $mode:expr) => {
        match open($core, $table, $mode) {
            Ok(opened) => opened,
            Err(e) => return future::ready(Err(e)).boxed_local(),
        }
    };
}

/// Puts `values` and waits for the commit.
pub fn put_all(
    core: &dyn DbCore,
    table: &str,
    values: Vec<Value>,
) -> StorageFuture<MutateResponse> {
    let (handle, trans) = open_or_fail!(core, table, TransactionMode::ReadWrite);
    let put = handle.mutate(MutateRequest::Put {
        trans: Rc::clone(&trans),
        values,
        keys: None,
    });
    async move {
        let response = put.await?;
        trans.completion().await?;
        Ok(response)
    }
    .boxed_local()
}

/// Reads one record by primary key.
pub fn get(core: &dyn DbCore, table: &str, key: Value) -> StorageFuture<Option<Value>> {
    let (handle, trans) = open_or_fail!(core, table, TransactionMode::ReadOnly);
    handle.get(GetRequest { trans, key })
}

/// Reads several records by primary key.
pub fn bulk_get(
    core: &dyn DbCore,
    table: &str,
    keys: Vec<Value>,
) -> StorageFuture<Vec<Option<Value>>> {
    let (handle, trans) = open_or_fail!(core, table, TransactionMode::ReadOnly);
    handle.get_many(GetManyRequest { trans, keys })
}

/// Reads every record in primary key order.
pub fn to_array(core: &dyn DbCore, table: &str) -> StorageFuture<Vec<Value>> {
    query_values(core, table, Query::all())
}

/// Reads the records whose `index` key equals `key`.
pub fn where_equals(
    core: &dyn DbCore,
    table: &str,
    index: &str,
    key: Value,
) -> StorageFuture<Vec<Value>> {
    query_values(core, table, Query::index(index, KeyRange::only(key)))
}

fn query_values(core: &dyn DbCore, table: &str, query: Query) -> StorageFuture<Vec<Value>> {
    let (handle, trans) = open_or_fail!(core, table, TransactionMode::ReadOnly);
    handle
        .query(QueryRequest {
            trans,
            query,
            values: true,
            limit: None,
        })
        .map(|response| response.map(|r| r.result))
        .boxed_local()
}

/// Counts every record.
pub fn count(core: &dyn DbCore, table: &str) -> StorageFuture<u64> {
    let (handle, trans) = open_or_fail!(core, table, TransactionMode::ReadOnly);
    handle.count(CountRequest {
        trans,
        query: Query::all(),
    })
}

/// Walks every record with a cursor, in primary key order.
pub fn each(
    core: &dyn DbCore,
    table: &str,
    mut visit: impl FnMut(Value) + 'static,
) -> StorageFuture<()> {
    let (handle, trans) = open_or_fail!(core, table, TransactionMode::ReadOnly);
    let opened = handle.open_cursor(OpenCursorRequest {
        trans,
        query: Query::all(),
        values: true,
        reverse: false,
    });
    async move {
        let Some(cursor) = opened.await? else {
            return Ok(());
        };
        let walker = Rc::clone(&cursor);
        cursor
            .start(Box::new(move || {
                if let Some(value) = walker.value() {
                    visit(value);
                }
                walker.continue_key(None);
            }))
            .await
    }
    .boxed_local()
}

/// Collects the records matching `predicate`, walking with a cursor.
pub fn filter(
    core: &dyn DbCore,
    table: &str,
    predicate: impl Fn(&Value) -> bool + 'static,
) -> StorageFuture<Vec<Value>> {
    let found = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&found);
    each(core, table, move |value| {
        if predicate(&value) {
            sink.borrow_mut().push(value);
        }
    })
    .map(move |walked| walked.map(|()| found.take()))
    .boxed_local()
}

/// Counts the records matching `predicate`, walking with a cursor.
pub fn filter_count(
    core: &dyn DbCore,
    table: &str,
    predicate: impl Fn(&Value) -> bool + 'static,
) -> StorageFuture<usize> {
    filter(core, table, predicate)
        .map(|found| found.map(|values| values.len()))
        .boxed_local()
}
