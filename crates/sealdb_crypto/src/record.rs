//! Record codec: plaintext index fields plus one encrypted blob.
//!
//! An encoded record keeps a plaintext copy of every field path the table
//! indexes, so the storage core can still build its indexes, and stores
//! the whole original record, serialized and encrypted, under
//! [`CRYPTO_FIELD`]:
//!
//! ```text
//! { key: "foo", value: "bar", index: 1 }
//!     => { key: "foo", index: 1, _crypto: <ciphertext> }
//! ```
//!
//! Decoding ignores the plaintext copies and restores the record from the
//! blob. Values without a blob are legacy or unencrypted records and are
//! returned unchanged.

use crate::cipher::Cipher;
use crate::error::{CryptoError, CryptoResult};
use crate::key_paths::KeyPathCache;
use crate::serializer::DataSerializer;
use futures::future::{self, try_join_all, FutureExt, LocalBoxFuture};
use sealdb_codec::Value;
use sealdb_storage::TableSchema;
use std::rc::Rc;

/// Reserved field holding the encrypted record.
///
/// Application records must not use this field name.
pub const CRYPTO_FIELD: &str = "_crypto";

/// Encodes and decodes records with a cipher and a serializer.
#[derive(Clone)]
pub struct RecordCodec {
    cipher: Rc<dyn Cipher>,
    serializer: Rc<dyn DataSerializer>,
    key_paths: Rc<KeyPathCache>,
}

impl RecordCodec {
    /// Creates a codec with an empty key path cache.
    pub fn new(cipher: Rc<dyn Cipher>, serializer: Rc<dyn DataSerializer>) -> Self {
        Self {
            cipher,
            serializer,
            key_paths: Rc::new(KeyPathCache::new()),
        }
    }

    /// The key path cache used by [`RecordCodec::encode`].
    pub fn key_paths(&self) -> &KeyPathCache {
        &self.key_paths
    }

    /// Encodes one record for `schema`. `record` itself is not modified.
    pub fn encode(
        &self,
        record: Value,
        schema: &TableSchema,
    ) -> LocalBoxFuture<'static, CryptoResult<Value>> {
        let paths = self.key_paths.get(schema);
        let mut encoded = record.pick(&*paths);
        let serialized = self.serializer.serialize(&record);
        let cipher = Rc::clone(&self.cipher);

        async move {
            let bytes = serialized.await?;
            let sealed = cipher.encrypt(bytes).await?;
            encoded
                .insert(CRYPTO_FIELD, Value::Bytes(sealed))
                .map_err(|e| CryptoError::serialization(e.to_string()))?;
            Ok(encoded)
        }
        .boxed_local()
    }

    /// Decodes one stored value.
    ///
    /// Values without a [`CRYPTO_FIELD`] (or with a null one) are returned
    /// unchanged.
    pub fn decode(&self, value: Value) -> LocalBoxFuture<'static, CryptoResult<Value>> {
        let sealed = match value.get(CRYPTO_FIELD) {
            None | Some(Value::Null) => return future::ready(Ok(value)).boxed_local(),
            Some(Value::Bytes(bytes)) => bytes.clone(),
            Some(other) => {
                let err = CryptoError::serialization(format!(
                    "'{CRYPTO_FIELD}' holds {} instead of bytes",
                    other.type_name()
                ));
                return future::ready(Err(err)).boxed_local();
            }
        };

        let opened = self.cipher.decrypt(sealed);
        let serializer = Rc::clone(&self.serializer);
        async move {
            let bytes = opened.await?;
            serializer.deserialize(bytes).await
        }
        .boxed_local()
    }

    /// Decodes an optional value; `None` passes through.
    pub fn decode_opt(
        &self,
        value: Option<Value>,
    ) -> LocalBoxFuture<'static, CryptoResult<Option<Value>>> {
        match value {
            None => future::ready(Ok(None)).boxed_local(),
            Some(value) => self.decode(value).map(|r| r.map(Some)).boxed_local(),
        }
    }

    /// Encodes a batch, preserving order.
    pub fn encode_all(
        &self,
        records: Vec<Value>,
        schema: &TableSchema,
    ) -> LocalBoxFuture<'static, CryptoResult<Vec<Value>>> {
        if records.is_empty() {
            return future::ready(Ok(Vec::new())).boxed_local();
        }
        try_join_all(records.into_iter().map(|r| self.encode(r, schema))).boxed_local()
    }

    /// Decodes a batch of optional values, preserving order and gaps.
    pub fn decode_all(
        &self,
        values: Vec<Option<Value>>,
    ) -> LocalBoxFuture<'static, CryptoResult<Vec<Option<Value>>>> {
        if values.is_empty() {
            return future::ready(Ok(Vec::new())).boxed_local();
        }
        try_join_all(values.into_iter().map(|v| self.decode_opt(v))).boxed_local()
    }

    /// Decodes a batch of values, preserving order.
    pub fn decode_values(
        &self,
        values: Vec<Value>,
    ) -> LocalBoxFuture<'static, CryptoResult<Vec<Value>>> {
        if values.is_empty() {
            return future::ready(Ok(Vec::new())).boxed_local();
        }
        try_join_all(values.into_iter().map(|v| self.decode(v))).boxed_local()
    }
}

impl std::fmt::Debug for RecordCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordCodec")
            .field("key_paths", &self.key_paths)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::{AesGcmCipher, EncryptionKey};
    use crate::serializer::{CborSerializer, JsonSerializer};
    use futures::executor::block_on;
    use std::cell::Cell;

    struct CountingCipher {
        inner: AesGcmCipher,
        calls: Rc<Cell<usize>>,
    }

    impl Cipher for CountingCipher {
        fn encrypt(&self, data: Vec<u8>) -> LocalBoxFuture<'static, CryptoResult<Vec<u8>>> {
            self.calls.set(self.calls.get() + 1);
            self.inner.encrypt(data)
        }

        fn decrypt(&self, data: Vec<u8>) -> LocalBoxFuture<'static, CryptoResult<Vec<u8>>> {
            self.calls.set(self.calls.get() + 1);
            self.inner.decrypt(data)
        }
    }

    fn codec() -> RecordCodec {
        let cipher = AesGcmCipher::new(&EncryptionKey::from_bytes(&[3u8; 32]).unwrap());
        RecordCodec::new(Rc::new(cipher), Rc::new(JsonSerializer))
    }

    fn entries() -> TableSchema {
        TableSchema::parse("entries", "&key,index").unwrap()
    }

    fn entry() -> Value {
        Value::map([
            ("key", Value::from("foo")),
            ("value", Value::from("bar")),
            ("index", Value::from(1)),
        ])
    }

    #[test]
    fn encode_keeps_only_indexed_fields_in_plaintext() {
        let encoded = block_on(codec().encode(entry(), &entries())).unwrap();
        let fields: Vec<&String> = encoded.as_map().unwrap().keys().collect();
        assert_eq!(fields, vec!["_crypto", "index", "key"]);
        assert_eq!(encoded.get("key"), Some(&Value::from("foo")));
        assert!(encoded.get(CRYPTO_FIELD).unwrap().as_bytes().is_some());
    }

    #[test]
    fn decode_restores_the_record() {
        let codec = codec();
        let encoded = block_on(codec.encode(entry(), &entries())).unwrap();
        assert_eq!(block_on(codec.decode(encoded)).unwrap(), entry());
    }

    #[test]
    fn nested_and_compound_paths() {
        let schema = TableSchema::parse("people", "&id,address.city,[first+last]").unwrap();
        let record = Value::map([
            ("id", Value::from(9)),
            ("first", Value::from("Ada")),
            ("last", Value::from("Lovelace")),
            ("secret", Value::from("x")),
            ("address", Value::map([("city", "London"), ("street", "St James")])),
        ]);
        let codec = codec();
        let encoded = block_on(codec.encode(record.clone(), &schema)).unwrap();
        assert_eq!(encoded.get_path("address.city"), Some(&Value::from("London")));
        assert_eq!(encoded.get_path("address.street"), None);
        assert_eq!(encoded.get("first"), Some(&Value::from("Ada")));
        assert_eq!(encoded.get("secret"), None);
        assert_eq!(block_on(codec.decode(encoded)).unwrap(), record);
    }

    #[test]
    fn plain_values_pass_through() {
        let codec = codec();
        assert_eq!(block_on(codec.decode(entry())).unwrap(), entry());
        let null_blob = Value::map([("key", Value::from("a")), (CRYPTO_FIELD, Value::Null)]);
        assert_eq!(block_on(codec.decode(null_blob.clone())).unwrap(), null_blob);
        assert_eq!(block_on(codec.decode_opt(None)).unwrap(), None);
    }

    #[test]
    fn non_bytes_blob_is_a_serialization_failure() {
        let bad = Value::map([("key", Value::from("a")), (CRYPTO_FIELD, Value::from("zzz"))]);
        let err = block_on(codec().decode(bad)).unwrap_err();
        assert!(err.is_serialization());
    }

    #[test]
    fn garbage_blob_is_a_cipher_failure() {
        let bad = Value::map([(CRYPTO_FIELD, Value::Bytes(vec![1; 40]))]);
        let err = block_on(codec().decode(bad)).unwrap_err();
        assert!(err.is_cipher());
    }

    #[test]
    fn empty_batches_skip_the_cipher() {
        let calls = Rc::new(Cell::new(0));
        let cipher = CountingCipher {
            inner: AesGcmCipher::new(&EncryptionKey::generate()),
            calls: Rc::clone(&calls),
        };
        let codec = RecordCodec::new(Rc::new(cipher), Rc::new(CborSerializer));
        assert!(block_on(codec.encode_all(vec![], &entries())).unwrap().is_empty());
        assert!(block_on(codec.decode_all(vec![])).unwrap().is_empty());
        assert_eq!(calls.get(), 0);

        block_on(codec.encode_all(vec![entry()], &entries())).unwrap();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn batches_keep_order_and_gaps() {
        let codec = codec();
        let records: Vec<Value> = (0..120)
            .map(|i| {
                Value::map([
                    ("key", Value::from(format!("k{i:03}"))),
                    ("index", Value::from(i)),
                ])
            })
            .collect();
        let encoded = block_on(codec.encode_all(records.clone(), &entries())).unwrap();
        assert_eq!(block_on(codec.decode_values(encoded.clone())).unwrap(), records);

        let with_gap = vec![Some(encoded[0].clone()), None, Some(encoded[2].clone())];
        let decoded = block_on(codec.decode_all(with_gap)).unwrap();
        assert_eq!(decoded, vec![Some(records[0].clone()), None, Some(records[2].clone())]);
    }
}
