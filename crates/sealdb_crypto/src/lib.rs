//! # SealDB Crypto
//!
//! Transparent record encryption for SealDB storage stacks.
//!
//! The crate provides:
//! - [`EncryptionMiddleware`], a middleware stage that encrypts every
//!   record written to a table and decrypts it on the way back, while
//!   keeping indexed fields in plaintext so lookups keep working
//! - [`RecordCodec`], the encode/decode step on its own
//! - [`TransactionKeeper`], which keeps a transaction alive while
//!   arbitrary futures complete
//! - [`AesGcmCipher`], [`JsonSerializer`] and [`CborSerializer`]
//!
//! ## Record Layout
//!
//! ```text
//! { key: "foo", value: "bar", index: 1 }      // what callers see
//! { key: "foo", index: 1, _crypto: <bytes> }  // what the core stores
//! ```
//!
//! ## Example
//!
//! ```rust
//! use sealdb_crypto::{create_encryption_middleware, AesGcmCipher, EncryptionKey, EncryptionOptions};
//! use sealdb_storage::{
//!     Database, DbSchema, EventLoop, GetRequest, MemoryEngine, MutateRequest, TransactionMode,
//!     Value,
//! };
//! use std::rc::Rc;
//!
//! let ev = EventLoop::new();
//! let schema = DbSchema::parse("demo", 1, &[("entries", "&key,index")]).unwrap();
//! let engine = MemoryEngine::new(&ev.handle(), schema).unwrap();
//! let cipher = AesGcmCipher::new(&EncryptionKey::generate());
//! let db = Database::new(engine.clone().into_core())
//!     .with(Rc::new(create_encryption_middleware(Rc::new(cipher), EncryptionOptions::new())));
//!
//! let table = db.table("entries").unwrap();
//! let trans = db.transaction(&["entries"], TransactionMode::ReadWrite).unwrap();
//! let record = Value::map([
//!     ("key", Value::from("foo")),
//!     ("value", Value::from("bar")),
//!     ("index", Value::from(1)),
//! ]);
//!
//! let found = ev
//!     .run_until(async move {
//!         table
//!             .mutate(MutateRequest::Put { trans: trans.clone(), values: vec![record], keys: None })
//!             .await?;
//!         table.get(GetRequest { trans, key: Value::from("foo") }).await
//!     })
//!     .unwrap()
//!     .unwrap();
//! assert_eq!(found.unwrap().get("value"), Some(&Value::from("bar")));
//!
//! // The stored record only shows indexed fields.
//! let raw = engine.raw_get("entries", "foo").unwrap().unwrap();
//! assert_eq!(raw.get("value"), None);
//! assert!(raw.get("_crypto").is_some());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cipher;
mod cursor;
mod error;
mod keepalive;
mod key_paths;
mod middleware;
mod migrate;
mod options;
mod record;
mod serializer;

pub use cipher::{AesGcmCipher, Cipher, EncryptionKey, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
pub use cursor::{CryptoCursor, CursorState};
pub use error::{CryptoError, CryptoResult, STAGE};
pub use keepalive::TransactionKeeper;
pub use key_paths::{table_key_paths, KeyPathCache};
pub use middleware::{
    create_encryption_middleware, EncryptionCore, EncryptionMiddleware, MIDDLEWARE_NAME,
};
pub use migrate::reencode_table;
pub use options::EncryptionOptions;
pub use record::{RecordCodec, CRYPTO_FIELD};
pub use serializer::{CborSerializer, DataSerializer, JsonSerializer};

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use proptest::prelude::*;
    use sealdb_codec::Value;
    use sealdb_storage::TableSchema;
    use std::rc::Rc;

    fn leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Integer),
            "[a-z ]{0,12}".prop_map(Value::Text),
        ]
    }

    fn field() -> impl Strategy<Value = Value> {
        leaf().prop_recursive(2, 16, 3, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..3).prop_map(Value::Array),
                prop::collection::btree_map("[a-c]", inner, 0..3).prop_map(Value::Map),
            ]
        })
    }

    fn record() -> impl Strategy<Value = Value> {
        prop::collection::btree_map("[a-e]{1,2}", field(), 1..6).prop_map(Value::Map)
    }

    fn codec() -> RecordCodec {
        let key = EncryptionKey::from_bytes(&[42u8; KEY_SIZE]).unwrap();
        RecordCodec::new(Rc::new(AesGcmCipher::new(&key)), Rc::new(CborSerializer))
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(record in record()) {
            let schema = TableSchema::parse("t", "&a,b,[c+d],e.a").unwrap();
            let codec = codec();
            let encoded = block_on(codec.encode(record.clone(), &schema)).unwrap();
            prop_assert_eq!(block_on(codec.decode(encoded)).unwrap(), record);
        }

        #[test]
        fn indexed_paths_stay_readable(record in record()) {
            let schema = TableSchema::parse("t", "&a,b,[c+d],e.a").unwrap();
            let encoded = block_on(codec().encode(record.clone(), &schema)).unwrap();
            for path in ["a", "b", "c", "d", "e.a"] {
                prop_assert_eq!(encoded.get_path(path), record.get_path(path));
            }
        }
    }
}
