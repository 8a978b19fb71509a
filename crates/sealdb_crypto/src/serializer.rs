//! Record serializers.

use crate::error::{CryptoError, CryptoResult};
use futures::future::{self, FutureExt, LocalBoxFuture};
use sealdb_codec::Value;

/// Turns full records into bytes and back.
///
/// Every call is a suspension point for the caller.
pub trait DataSerializer {
    /// Serializes `record`.
    fn serialize(&self, record: &Value) -> LocalBoxFuture<'static, CryptoResult<Vec<u8>>>;

    /// Deserializes bytes produced by [`DataSerializer::serialize`].
    fn deserialize(&self, bytes: Vec<u8>) -> LocalBoxFuture<'static, CryptoResult<Value>>;
}

/// UTF-8 JSON serializer. The default.
///
/// JSON has no byte type, so records holding [`Value::Bytes`] fail to
/// serialize. Use [`CborSerializer`] for such records.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl DataSerializer for JsonSerializer {
    fn serialize(&self, record: &Value) -> LocalBoxFuture<'static, CryptoResult<Vec<u8>>> {
        let result =
            serde_json::to_vec(record).map_err(|e| CryptoError::serialization(e.to_string()));
        future::ready(result).boxed_local()
    }

    fn deserialize(&self, bytes: Vec<u8>) -> LocalBoxFuture<'static, CryptoResult<Value>> {
        let result = serde_json::from_slice::<Value>(&bytes)
            .map_err(|e| CryptoError::serialization(e.to_string()));
        future::ready(result).boxed_local()
    }
}

/// CBOR serializer. Preserves byte strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct CborSerializer;

impl DataSerializer for CborSerializer {
    fn serialize(&self, record: &Value) -> LocalBoxFuture<'static, CryptoResult<Vec<u8>>> {
        let mut buf = Vec::new();
        let result = ciborium::into_writer(record, &mut buf)
            .map(|()| buf)
            .map_err(|e| CryptoError::serialization(e.to_string()));
        future::ready(result).boxed_local()
    }

    fn deserialize(&self, bytes: Vec<u8>) -> LocalBoxFuture<'static, CryptoResult<Value>> {
        let result = ciborium::from_reader::<Value, _>(bytes.as_slice())
            .map_err(|e| CryptoError::serialization(e.to_string()));
        future::ready(result).boxed_local()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    fn record() -> Value {
        Value::map([
            ("key", Value::from("foo")),
            ("nested", Value::map([("n", Value::from(-3))])),
            ("list", Value::Array(vec![Value::Null, Value::Bool(false)])),
        ])
    }

    #[test]
    fn json_roundtrip() {
        let bytes = block_on(JsonSerializer.serialize(&record())).unwrap();
        assert!(std::str::from_utf8(&bytes).is_ok());
        assert_eq!(block_on(JsonSerializer.deserialize(bytes)).unwrap(), record());
    }

    #[test]
    fn json_rejects_bytes() {
        let value = Value::map([("blob", Value::Bytes(vec![1]))]);
        let err = block_on(JsonSerializer.serialize(&value)).unwrap_err();
        assert!(err.is_serialization());
    }

    #[test]
    fn json_rejects_garbage() {
        let err = block_on(JsonSerializer.deserialize(b"{not json".to_vec())).unwrap_err();
        assert!(err.is_serialization());
    }

    #[test]
    fn cbor_keeps_bytes() {
        let value = Value::map([("blob", Value::Bytes(vec![0, 9, 255]))]);
        let bytes = block_on(CborSerializer.serialize(&value)).unwrap();
        assert_eq!(block_on(CborSerializer.deserialize(bytes)).unwrap(), value);
    }

    #[test]
    fn cbor_rejects_truncated_input() {
        let mut bytes = block_on(CborSerializer.serialize(&record())).unwrap();
        bytes.truncate(bytes.len() / 2);
        assert!(block_on(CborSerializer.deserialize(bytes)).is_err());
    }
}
