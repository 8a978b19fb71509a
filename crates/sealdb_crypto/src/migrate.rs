//! Re-encoding stored records after a schema change.
//!
//! The plaintext copy of an indexed field is written when a record is
//! encoded. Adding an index to an encrypted table therefore leaves
//! existing records without the new field in plaintext, and the new index
//! stays empty until every record has been written again.

use crate::error::{CryptoError, CryptoResult};
use futures::future::{FutureExt, LocalBoxFuture};
use sealdb_storage::{DbCore, MutateRequest, Query, QueryRequest, TransactionMode, Value};
use std::rc::Rc;

/// Reads every record of `table` through `core`, applies `modify` and
/// writes the records back through `core` in one transaction.
///
/// Pass the outermost core of a stack holding the encryption middleware:
/// records are decoded on the way out and re-encoded with the table's
/// current index set on the way back. Resolves to the number of records
/// written once the transaction has committed.
pub fn reencode_table(
    core: &Rc<dyn DbCore>,
    table: &str,
    mut modify: impl FnMut(&mut Value) + 'static,
) -> LocalBoxFuture<'static, CryptoResult<usize>> {
    let opened = core.table(table).and_then(|t| {
        let trans = core.transaction(&[table], TransactionMode::ReadWrite)?;
        Ok((t, trans))
    });
    let (handle, trans) = match opened {
        Ok(opened) => opened,
        Err(e) => return futures::future::ready(Err(CryptoError::from(e))).boxed_local(),
    };
    let outbound = handle.schema().primary_key.is_none();
    let name = table.to_string();

    let values = handle.query(QueryRequest {
        trans: Rc::clone(&trans),
        query: Query::all(),
        values: true,
        limit: None,
    });
    let keys = outbound.then(|| {
        handle.query(QueryRequest {
            trans: Rc::clone(&trans),
            query: Query::all(),
            values: false,
            limit: None,
        })
    });

    async move {
        let mut values = values.await?.result;
        let keys = match keys {
            Some(keys) => Some(keys.await?.result),
            None => None,
        };
        for value in &mut values {
            modify(value);
        }

        let written = values.len();
        if written > 0 {
            let response = handle
                .mutate(MutateRequest::Put {
                    trans: Rc::clone(&trans),
                    values,
                    keys,
                })
                .await?;
            if let Some((_, failure)) = response.failures.into_iter().next() {
                trans.abort();
                return Err(CryptoError::from(failure));
            }
        }
        trans.completion().await?;
        tracing::debug!(table = %name, records = written, "re-encoded table");
        Ok(written)
    }
    .boxed_local()
}
