//! Redis key-value operations.
//!
//! Documents are stored as extended JSON strings so every [`DynValue`] kind
//! survives the round trip; scalars can also be stored natively through the
//! wire mapping in [`encode_value`] / [`decode_value`].
//!
//! Transactions are optimistic. Under `Repeatable` or `Serializable`
//! isolation every key read inside the transaction is `WATCH`ed; writes are
//! buffered and sent in one `MULTI`/`EXEC` at commit. If a watched key
//! changed in between, `EXEC` replies nil and the commit fails with
//! [`DbError::TransactionConflict`], which the coordinator retries. Reads
//! inside a transaction do not see the transaction's own buffered writes.

use fred::prelude::*;
use fred::clients::Transaction;
use fred::types::{ClusterHash, CustomCommand};
use polystore_value::{DynValue, ValueError};

use crate::config::RedisConfig;
use crate::error::DbError;
use crate::transaction::{self, IsolationLevel, TransactionOptions, TransactionState, Transactional};

/// Connection handle to a Redis (or Redis-compatible) server.
#[derive(Clone)]
pub struct RedisPool {
    client: Client,
}

impl RedisPool {
    /// Connect to Redis using the provided configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidConfiguration`] if the URL cannot be parsed.
    /// Returns [`DbError::Redis`] if the connection fails.
    pub async fn connect(config: &RedisConfig) -> Result<Self, DbError> {
        let redis_config = Config::from_url(&config.url)
            .map_err(|e| DbError::InvalidConfiguration(format!("Invalid Redis URL: {e}")))?;

        let client = Builder::from_config(redis_config).build()?;
        client.init().await?;

        tracing::info!("Connected to Redis");
        Ok(Self { client })
    }

    /// Open a session on a dedicated connection.
    ///
    /// `WATCH` is connection state, so sessions never share a connection.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Redis`] if the connection fails.
    pub async fn session(&self) -> Result<RedisSession, DbError> {
        let client = self.client.clone_new();
        client.init().await?;
        Ok(RedisSession {
            client,
            transaction: None,
            watch_reads: false,
            stale_watch: false,
            state: TransactionState::Idle,
        })
    }

    /// Close the connection gracefully.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Redis`] if `QUIT` fails.
    pub async fn close(&self) -> Result<(), DbError> {
        self.client.quit().await?;
        tracing::info!("Redis connection closed");
        Ok(())
    }
}

/// One Redis connection with optional optimistic transaction state.
pub struct RedisSession {
    client: Client,
    transaction: Option<Transaction>,
    watch_reads: bool,
    stale_watch: bool,
    state: TransactionState,
}

impl RedisSession {
    // =========================================================================
    // Documents
    // =========================================================================

    /// Store `value` at `key` as extended JSON.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Serialization`] if serialization fails.
    /// Returns [`DbError::Redis`] if the write fails.
    pub async fn set(&mut self, key: &str, value: &DynValue) -> Result<(), DbError> {
        let json = serde_json::to_string(&value.to_json())?;
        match &self.transaction {
            Some(transaction) => {
                let _: () = transaction.set(key, json, None, None, false).await?;
            }
            None => {
                let _: () = self.client.set(key, json, None, None, false).await?;
            }
        }
        Ok(())
    }

    /// Read the document at `key`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::KeyNotFound`] if the key does not exist.
    /// Returns [`DbError::Serialization`] if the stored text is not JSON.
    /// Returns [`DbError::Redis`] if the read fails.
    pub async fn get(&mut self, key: &str) -> Result<DynValue, DbError> {
        self.watch(key).await?;
        let value: Option<String> = self.client.get(key).await?;
        value.map_or_else(
            || Err(DbError::KeyNotFound(key.to_owned())),
            |s| Ok(DynValue::from_json(serde_json::from_str(&s)?)),
        )
    }

    /// Delete `key`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Redis`] if the delete fails.
    pub async fn delete(&mut self, key: &str) -> Result<(), DbError> {
        match &self.transaction {
            Some(transaction) => {
                let _: () = transaction.del(key).await?;
            }
            None => {
                let _: u32 = self.client.del(key).await?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Scalars
    // =========================================================================

    /// Store a scalar at `key` using the native wire mapping.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Value`] for values with no Redis representation.
    /// Returns [`DbError::Redis`] if the write fails.
    pub async fn set_scalar(&mut self, key: &str, value: &DynValue) -> Result<(), DbError> {
        let value = encode_value(value)?;
        match &self.transaction {
            Some(transaction) => {
                let _: () = transaction.set(key, value, None, None, false).await?;
            }
            None => {
                let _: () = self.client.set(key, value, None, None, false).await?;
            }
        }
        Ok(())
    }

    /// Read the scalar at `key`, `Null` when absent.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Redis`] if the read fails.
    pub async fn get_scalar(&mut self, key: &str) -> Result<DynValue, DbError> {
        self.watch(key).await?;
        let value: Value = self.client.get(key).await?;
        Ok(decode_value(value)?)
    }

    /// Run `body` in a transaction on this session.
    ///
    /// # Errors
    ///
    /// See [`transaction::with_transaction`].
    pub async fn with_transaction<T, F>(
        &mut self,
        options: &TransactionOptions,
        body: F,
    ) -> Result<T, DbError>
    where
        F: for<'c> FnMut(&'c mut Self) -> futures::future::BoxFuture<'c, Result<T, DbError>>,
    {
        transaction::with_transaction(self, options, body).await
    }

    async fn watch(&self, key: &str) -> Result<(), DbError> {
        if self.transaction.is_some() && self.watch_reads {
            let _: Value = self
                .client
                .custom(CustomCommand::new_static("WATCH", ClusterHash::FirstKey, false), vec![key])
                .await?;
        }
        Ok(())
    }

    async fn unwatch(&mut self) -> Result<(), DbError> {
        self.stale_watch = false;
        let _: Value = self
            .client
            .custom(CustomCommand::new_static("UNWATCH", ClusterHash::Random, false), Vec::<Value>::new())
            .await?;
        Ok(())
    }
}

impl Transactional for RedisSession {
    fn transaction_state(&self) -> TransactionState {
        self.state
    }

    async fn begin_transaction(&mut self, isolation: IsolationLevel) -> Result<(), DbError> {
        if self.transaction.is_some() {
            return Err(DbError::TransactionDeadlocks);
        }
        if self.stale_watch {
            self.unwatch().await?;
        }
        self.watch_reads = matches!(
            isolation,
            IsolationLevel::Repeatable | IsolationLevel::Serializable
        );
        self.transaction = Some(self.client.multi());
        self.state = TransactionState::InTransaction;
        tracing::debug!(?isolation, "Redis transaction started");
        Ok(())
    }

    async fn commit_transaction(&mut self) -> Result<(), DbError> {
        let Some(transaction) = self.transaction.take() else {
            return Ok(());
        };
        let reply: Value = match transaction.exec(true).await {
            Ok(reply) => reply,
            Err(error) => {
                self.state = TransactionState::Aborted;
                return Err(error.into());
            }
        };
        if reply.is_null() {
            self.state = TransactionState::Aborted;
            tracing::debug!("Redis transaction aborted by a watched key");
            return Err(DbError::TransactionConflict);
        }
        self.state = TransactionState::Committed;
        tracing::debug!("Redis transaction committed");
        Ok(())
    }

    async fn abort_transaction(&mut self) -> Result<(), DbError> {
        self.state = TransactionState::Aborted;
        if self.transaction.take().is_some() {
            self.unwatch().await?;
            tracing::debug!("Redis transaction discarded");
        }
        Ok(())
    }

    fn discard_transaction(&mut self) {
        // Buffered commands were never sent; the next begin clears the watch.
        if self.transaction.take().is_some() {
            self.stale_watch = true;
        }
        self.state = TransactionState::Aborted;
    }
}

// =============================================================================
// Wire mapping
// =============================================================================

/// Convert a value to a Redis wire value.
///
/// Numbers that do not fit an `i64` and the string-like scalars (decimals,
/// UUIDs, object ids, dates) are sent as their text form.
///
/// # Errors
///
/// Returns [`ValueError::UnsupportedType`] for regexes, timestamps and
/// objects, which have no native Redis form.
pub fn encode_value(value: &DynValue) -> Result<Value, ValueError> {
    let encoded = match value {
        DynValue::Null => Value::Null,
        DynValue::Bool(value) => Value::Boolean(*value),
        DynValue::String(value) => Value::String(value.as_str().into()),
        DynValue::SignedInt(value) => Value::Integer(*value),
        DynValue::UnsignedInt(value) => match i64::try_from(*value) {
            Ok(signed) => Value::Integer(signed),
            Err(_) => Value::String(value.to_string().into()),
        },
        DynValue::Float(value) => Value::Double(*value),
        DynValue::Decimal(value) => Value::String(value.to_string().into()),
        DynValue::Date(value) => Value::String(value.to_rfc3339().into()),
        DynValue::DateComponents(value) => Value::String(value.to_string().into()),
        DynValue::Binary(bytes) => Value::Bytes(bytes.clone().into()),
        DynValue::Uuid(value) => Value::String(value.to_string().into()),
        DynValue::ObjectId(value) => Value::String(value.to_hex().into()),
        DynValue::Array(items) => Value::Array(
            items
                .iter()
                .enumerate()
                .map(|(index, item)| encode_value(item).map_err(|e| e.at(&index.to_string())))
                .collect::<Result<_, _>>()?,
        ),
        DynValue::Regex(_) | DynValue::Timestamp(_) | DynValue::Object(_) => {
            return Err(ValueError::unsupported("Redis scalar", value.kind().name()));
        }
    };
    Ok(encoded)
}

/// Convert a Redis reply to a value.
///
/// # Errors
///
/// Returns [`ValueError::UnsupportedType`] for a `QUEUED` reply and for maps
/// with non-string keys.
pub fn decode_value(value: Value) -> Result<DynValue, ValueError> {
    let decoded = match value {
        Value::Null => DynValue::Null,
        Value::Boolean(value) => DynValue::Bool(value),
        Value::Integer(value) => DynValue::SignedInt(value),
        Value::Double(value) => DynValue::Float(value),
        Value::String(value) => DynValue::String(value.to_string()),
        Value::Bytes(bytes) => DynValue::Binary(bytes.to_vec()),
        Value::Array(items) => DynValue::Array(
            items
                .into_iter()
                .map(decode_value)
                .collect::<Result<_, _>>()?,
        ),
        Value::Map(map) => DynValue::Object(
            map.inner()
                .into_iter()
                .map(|(key, item)| {
                    let key = key
                        .into_string()
                        .ok_or_else(|| ValueError::unsupported("string key", "binary key"))?;
                    Ok((key, decode_value(item)?))
                })
                .collect::<Result<_, ValueError>>()?,
        ),
        Value::Queued => return Err(ValueError::unsupported("reply", "QUEUED")),
    };
    Ok(decoded)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn scalars_map_to_native_replies() {
        assert_eq!(encode_value(&DynValue::from(5_i64)).ok(), Some(Value::Integer(5)));
        assert_eq!(encode_value(&DynValue::Bool(true)).ok(), Some(Value::Boolean(true)));
        assert_eq!(
            encode_value(&DynValue::UnsignedInt(u64::MAX)).ok(),
            Some(Value::String(u64::MAX.to_string().into()))
        );
        assert_eq!(encode_value(&DynValue::Null).ok(), Some(Value::Null));
    }

    #[test]
    fn objects_and_regexes_have_no_scalar_form() {
        let object: DynValue = [("a", 1_i64)].into_iter().collect();
        assert!(encode_value(&object).is_err());
        let regex = DynValue::Regex(polystore_value::Regex::new("^a", "i"));
        assert!(encode_value(&DynValue::Array(vec![regex])).is_err());
    }

    #[test]
    fn replies_decode_recursively() {
        let reply = Value::Array(vec![
            Value::Integer(1),
            Value::String("two".into()),
            Value::Bytes(vec![3_u8].into()),
            Value::Null,
        ]);
        let Ok(decoded) = decode_value(reply) else {
            panic!("array reply should decode");
        };
        assert_eq!(
            decoded,
            DynValue::Array(vec![
                DynValue::SignedInt(1),
                DynValue::from("two"),
                DynValue::Binary(vec![3]),
                DynValue::Null,
            ])
        );
        assert!(decode_value(Value::Queued).is_err());
    }
}
