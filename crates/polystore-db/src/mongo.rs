//! `MongoDB` query launcher.
//!
//! Filters compile to query documents through [`DocumentCompiler`] and
//! updates through [`update_document`]. Values cross the wire as BSON; the
//! conversion is strict: a value BSON cannot hold exactly is an error, never
//! a silently rounded one.

use std::collections::{BTreeMap, BTreeSet};

use futures::TryStreamExt as _;
use mongodb::bson::spec::BinarySubtype;
use mongodb::bson::{self, Bson, Document};
use mongodb::options::{Acknowledgment, ReadConcern, ReturnDocument as MongoReturnDocument, WriteConcern};
use mongodb::{Client, ClientSession, Collection, Database};
use polystore_query::{
    DocumentCompiler, FindOneRequest, FindRequest, Predicate, ReturnDocument, SortOrder,
    TableInfo, Updates, update_document, upsert_document,
};
use polystore_value::{DynValue, ObjectId, Regex, Timestamp, ValueError};
use rust_decimal::Decimal;

use crate::config::MongoConfig;
use crate::error::DbError;
use crate::launcher::{DbObject, QueryLauncher};
use crate::transaction::{self, IsolationLevel, TransactionOptions, TransactionState, Transactional};

/// Field holding a document's primary key.
const ID_FIELD: &str = "_id";

/// Exponent bias of the BID decimal128 encoding.
const DECIMAL128_BIAS: u32 = 6176;

/// Low 113 bits: the coefficient of a decimal128 in its common form.
const DECIMAL128_COEFFICIENT_MASK: u128 = 0x1_FFFF_FFFF_FFFF_FFFF_FFFF_FFFF_FFFF;

/// Largest canonical decimal128 coefficient, `10^34 - 1`.
const DECIMAL128_MAX_COEFFICIENT: u128 = 9_999_999_999_999_999_999_999_999_999_999;

/// Largest scale a [`Decimal`] can carry.
const DECIMAL_MAX_SCALE: u32 = 28;

/// Client handle to a `MongoDB` deployment.
#[derive(Clone)]
pub struct MongoPool {
    client: Client,
    database: Database,
}

impl MongoPool {
    /// Connect to `MongoDB` using the provided configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Mongo`] if the connection string is invalid or the
    /// deployment cannot be reached.
    pub async fn connect(config: &MongoConfig) -> Result<Self, DbError> {
        let client = Client::with_uri_str(&config.url).await?;
        let database = client.database(&config.database);
        database.run_command(bson::doc! { "ping": 1 }).await?;

        tracing::info!(database = config.database.as_str(), "Connected to MongoDB");

        Ok(Self { client, database })
    }

    /// Open a session on this client.
    pub fn session(&self) -> MongoSession {
        MongoSession {
            client: self.client.clone(),
            database: self.database.clone(),
            session: None,
            state: TransactionState::Idle,
        }
    }

    /// Return a reference to the underlying [`Database`].
    pub const fn database(&self) -> &Database {
        &self.database
    }

    /// Shut the client down, waiting for in-flight operations.
    pub async fn close(self) {
        self.client.shutdown().await;
        tracing::info!("MongoDB client closed");
    }
}

/// One logical `MongoDB` session.
///
/// Operations run without a driver session until a transaction begins; from
/// then on every operation is bound to it.
pub struct MongoSession {
    client: Client,
    database: Database,
    session: Option<ClientSession>,
    state: TransactionState,
}

impl MongoSession {
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

    fn collection(&self, name: &str) -> Collection<Document> {
        self.database.collection(name)
    }

    async fn find_documents(
        &mut self,
        collection: &str,
        filter: Document,
        request: &FindRequest,
    ) -> Result<Vec<Document>, DbError> {
        let collection = self.collection(collection);
        let mut action = collection.find(filter).sort(sort_document(&request.sort));
        if let Some(projection) = projection_document(request.includes.as_ref()) {
            action = action.projection(projection);
        }
        if let Some(skip) = request.skip {
            action = action.skip(skip);
        }
        if let Some(limit) = request.limit {
            action = action.limit(i64::try_from(limit).unwrap_or(i64::MAX));
        }
        let documents = match self.session.as_mut() {
            Some(session) => {
                let mut cursor = action.session(&mut *session).await?;
                cursor.stream(session).try_collect().await?
            }
            None => action.await?.try_collect().await?,
        };
        Ok(documents)
    }

    async fn find_first(
        &mut self,
        request: &FindOneRequest,
        filter: Document,
    ) -> Result<Option<DbObject>, DbError> {
        let collection = self.collection(&request.collection);
        let mut action = collection.find_one(filter).sort(sort_document(&request.sort));
        if let Some(projection) = projection_document(request.includes.as_ref()) {
            action = action.projection(projection);
        }
        let document = match self.session.as_mut() {
            Some(session) => action.session(session).await?,
            None => action.await?,
        };
        document.map(decode_document).transpose()
    }

    async fn modify_one(
        &mut self,
        request: &FindOneRequest,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<Option<DbObject>, DbError> {
        let collection = self.collection(&request.collection);
        let mut action = collection
            .find_one_and_update(filter, update)
            .sort(sort_document(&request.sort))
            .return_document(match request.return_document {
                ReturnDocument::Before => MongoReturnDocument::Before,
                ReturnDocument::After => MongoReturnDocument::After,
            })
            .upsert(upsert);
        if let Some(projection) = projection_document(request.includes.as_ref()) {
            action = action.projection(projection);
        }
        let document = match self.session.as_mut() {
            Some(session) => action.session(session).await,
            None => action.await,
        };
        match document {
            Ok(document) => document.map(decode_document).transpose(),
            Err(error) => Err(duplicate_key(error.into())),
        }
    }
}

impl QueryLauncher for MongoSession {
    async fn count(&mut self, request: &FindRequest) -> Result<u64, DbError> {
        let Some(filter) = request_filter(request)? else {
            return Ok(0);
        };
        let collection = self.collection(&request.collection);
        let mut action = collection.count_documents(filter);
        if let Some(skip) = request.skip {
            action = action.skip(skip);
        }
        if let Some(limit) = request.limit {
            action = action.limit(limit);
        }
        let count = match self.session.as_mut() {
            Some(session) => action.session(session).await?,
            None => action.await?,
        };
        Ok(count)
    }

    async fn find(&mut self, request: &FindRequest) -> Result<Vec<DbObject>, DbError> {
        let Some(filter) = request_filter(request)? else {
            return Ok(Vec::new());
        };
        self.find_documents(&request.collection, filter, request)
            .await?
            .into_iter()
            .map(decode_document)
            .collect()
    }

    async fn find_and_delete(&mut self, request: &FindRequest) -> Result<Option<u64>, DbError> {
        let Some(mut filter) = request_filter(request)? else {
            return Ok(None);
        };
        if request.is_windowed() {
            let mut window = request.clone();
            window.includes = Some([ID_FIELD.to_owned()].into());
            let ids: Vec<Bson> = self
                .find_documents(&request.collection, filter, &window)
                .await?
                .into_iter()
                .filter_map(|mut document| document.remove(ID_FIELD))
                .collect();
            if ids.is_empty() {
                return Ok(None);
            }
            filter = bson::doc! { ID_FIELD: { "$in": ids } };
        }

        let collection = self.collection(&request.collection);
        let action = collection.delete_many(filter);
        let result = match self.session.as_mut() {
            Some(session) => action.session(session).await?,
            None => action.await?,
        };
        Ok((result.deleted_count > 0).then_some(result.deleted_count))
    }

    async fn find_one_and_update(
        &mut self,
        request: &FindOneRequest,
        updates: &Updates,
    ) -> Result<Option<DbObject>, DbError> {
        let Some(filter) = compile_filter(&request.collection, &request.filters)? else {
            return Ok(None);
        };
        if updates.is_empty() {
            return self.find_first(request, filter).await;
        }
        let update = encode_document(&update_document(updates)?)?;
        self.modify_one(request, filter, update, false).await
    }

    async fn find_one_and_delete(
        &mut self,
        request: &FindOneRequest,
    ) -> Result<Option<DbObject>, DbError> {
        let Some(filter) = compile_filter(&request.collection, &request.filters)? else {
            return Ok(None);
        };
        let collection = self.collection(&request.collection);
        let mut action = collection
            .find_one_and_delete(filter)
            .sort(sort_document(&request.sort));
        if let Some(projection) = projection_document(request.includes.as_ref()) {
            action = action.projection(projection);
        }
        let document = match self.session.as_mut() {
            Some(session) => action.session(session).await?,
            None => action.await?,
        };
        document.map(decode_document).transpose()
    }

    async fn find_one_and_upsert(
        &mut self,
        request: &FindOneRequest,
        updates: &Updates,
        set_on_insert: &DbObject,
    ) -> Result<Option<DbObject>, DbError> {
        let update = encode_document(&upsert_document(updates, set_on_insert)?)?;
        let filter = compile_filter(&request.collection, &request.filters)?
            .unwrap_or_else(|| bson::doc! { "$expr": false });
        self.modify_one(request, filter, update, true).await
    }

    async fn insert(
        &mut self,
        collection: &str,
        fields: &DbObject,
    ) -> Result<Option<DbObject>, DbError> {
        let document = encode_object(fields)?;
        let handle = self.collection(collection);
        let action = handle.insert_one(document);
        let result = match self.session.as_mut() {
            Some(session) => action.session(session).await,
            None => action.await,
        }
        .map_err(|error| duplicate_key(error.into()))?;

        let mut stored = fields.clone();
        stored.insert(ID_FIELD.to_owned(), decode_bson(result.inserted_id)?);
        Ok(Some(stored))
    }
}

impl Transactional for MongoSession {
    fn transaction_state(&self) -> TransactionState {
        self.state
    }

    async fn begin_transaction(&mut self, isolation: IsolationLevel) -> Result<(), DbError> {
        if self.state == TransactionState::InTransaction {
            return Err(DbError::TransactionDeadlocks);
        }
        let session = match self.session.take() {
            Some(session) => session,
            None => self.client.start_session().await?,
        };
        let session = self.session.insert(session);

        let mut options = mongodb::options::TransactionOptions::default();
        match isolation {
            IsolationLevel::Default => {}
            IsolationLevel::ReadCommitted => options.read_concern = Some(ReadConcern::majority()),
            IsolationLevel::Repeatable => options.read_concern = Some(ReadConcern::snapshot()),
            IsolationLevel::Serializable => {
                options.read_concern = Some(ReadConcern::snapshot());
                options.write_concern = Some(
                    WriteConcern::builder()
                        .w(Acknowledgment::Majority)
                        .build(),
                );
            }
        }
        session.start_transaction().with_options(options).await?;
        self.state = TransactionState::InTransaction;
        tracing::debug!(?isolation, "MongoDB transaction started");
        Ok(())
    }

    async fn commit_transaction(&mut self) -> Result<(), DbError> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        if let Err(error) = session.commit_transaction().await {
            self.state = TransactionState::Aborted;
            return Err(error.into());
        }
        self.state = TransactionState::Committed;
        tracing::debug!("MongoDB transaction committed");
        Ok(())
    }

    async fn abort_transaction(&mut self) -> Result<(), DbError> {
        let in_transaction = self.state == TransactionState::InTransaction;
        self.state = TransactionState::Aborted;
        if let Some(session) = self.session.as_mut().filter(|_| in_transaction) {
            session.abort_transaction().await?;
            tracing::debug!("MongoDB transaction aborted");
        }
        Ok(())
    }

    fn discard_transaction(&mut self) {
        // The driver aborts an open transaction when its session drops.
        self.session = None;
        self.state = TransactionState::Aborted;
    }
}

fn duplicate_key(error: DbError) -> DbError {
    if error.is_unique_violation() {
        DbError::DuplicatedPrimaryKey
    } else {
        error
    }
}

// =============================================================================
// Request documents
// =============================================================================

/// The query document for `filters`, or `None` when nothing can match.
fn compile_filter(collection: &str, filters: &[Predicate]) -> Result<Option<Document>, DbError> {
    let table = TableInfo::schemaless(collection);
    let compiled = DocumentCompiler::new(&table).compile_all(filters)?;
    match compiled.into_document() {
        Some(filter) => Ok(Some(encode_document(&filter)?)),
        None => {
            tracing::trace!(collection, "Filter never matches, skipping round trip");
            Ok(None)
        }
    }
}

/// The query document for a windowed request, or `None` when the request
/// selects nothing.
///
/// The driver reads a zero limit as "no limit", so `limit(0)` is answered
/// here without a round trip.
fn request_filter(request: &FindRequest) -> Result<Option<Document>, DbError> {
    if request.limit == Some(0) {
        tracing::trace!(
            collection = request.collection.as_str(),
            "Zero limit, skipping round trip"
        );
        return Ok(None);
    }
    compile_filter(&request.collection, &request.filters)
}

fn sort_document(sort: &[(String, SortOrder)]) -> Document {
    sort.iter()
        .map(|(field, order)| {
            let direction = match order {
                SortOrder::Ascending => 1,
                SortOrder::Descending => -1,
            };
            (field.clone(), Bson::Int32(direction))
        })
        .collect()
}

fn projection_document(includes: Option<&BTreeSet<String>>) -> Option<Document> {
    includes.map(|fields| {
        fields
            .iter()
            .map(|field| (field.clone(), Bson::Int32(1)))
            .collect()
    })
}

// =============================================================================
// BSON conversion
// =============================================================================

fn encode_document(value: &DynValue) -> Result<Document, DbError> {
    match value {
        DynValue::Object(fields) => encode_object(fields),
        other => Err(ValueError::unsupported("document", other.kind().name()).into()),
    }
}

fn encode_object(fields: &BTreeMap<String, DynValue>) -> Result<Document, DbError> {
    fields
        .iter()
        .map(|(key, value)| {
            encode_value(value)
                .map(|bson| (key.clone(), bson))
                .map_err(|error| error.at(key).into())
        })
        .collect()
}

/// Convert a value to BSON.
///
/// # Errors
///
/// Returns [`ValueError::UnsupportedType`] for civil date components and for
/// instants with sub-millisecond precision, which BSON dates cannot hold.
pub fn encode_value(value: &DynValue) -> Result<Bson, ValueError> {
    let bson = match value {
        DynValue::Null => Bson::Null,
        DynValue::Bool(value) => Bson::Boolean(*value),
        DynValue::String(value) => Bson::String(value.clone()),
        DynValue::Regex(regex) => {
            Bson::RegularExpression(bson::Regex {
                pattern: regex.pattern.clone(),
                options: regex.options.clone(),
            })
        }
        DynValue::SignedInt(value) => Bson::Int64(*value),
        DynValue::UnsignedInt(value) => match i64::try_from(*value) {
            Ok(signed) => Bson::Int64(signed),
            Err(_) => Bson::Decimal128(encode_decimal(Decimal::from(*value))),
        },
        DynValue::Float(value) => Bson::Double(*value),
        DynValue::Decimal(value) => Bson::Decimal128(encode_decimal(*value)),
        DynValue::Date(instant) => {
            if instant.timestamp_subsec_nanos() % 1_000_000 != 0 {
                return Err(ValueError::unsupported(
                    "millisecond-precision date",
                    "sub-millisecond date",
                ));
            }
            Bson::DateTime(bson::DateTime::from_millis(instant.timestamp_millis()))
        }
        DynValue::DateComponents(_) => {
            return Err(ValueError::unsupported("instant", "date components"));
        }
        DynValue::Binary(bytes) => Bson::Binary(bson::Binary {
            subtype: BinarySubtype::Generic,
            bytes: bytes.clone(),
        }),
        DynValue::Uuid(uuid) => Bson::Binary(bson::Binary {
            subtype: BinarySubtype::Uuid,
            bytes: uuid.as_bytes().to_vec(),
        }),
        DynValue::ObjectId(id) => Bson::ObjectId(bson::oid::ObjectId::from_bytes(id.bytes())),
        DynValue::Timestamp(timestamp) => Bson::Timestamp(bson::Timestamp {
            time: timestamp.time,
            increment: timestamp.increment,
        }),
        DynValue::Array(items) => Bson::Array(
            items
                .iter()
                .enumerate()
                .map(|(index, item)| encode_value(item).map_err(|e| e.at(&index.to_string())))
                .collect::<Result<_, _>>()?,
        ),
        DynValue::Object(fields) => Bson::Document(
            fields
                .iter()
                .map(|(key, item)| {
                    encode_value(item)
                        .map(|bson| (key.clone(), bson))
                        .map_err(|e| e.at(key))
                })
                .collect::<Result<_, _>>()?,
        ),
    };
    Ok(bson)
}

fn decode_document(document: Document) -> Result<DbObject, DbError> {
    document
        .into_iter()
        .map(|(key, value)| Ok((key, decode_bson(value)?)))
        .collect()
}

/// Convert BSON to a value.
///
/// # Errors
///
/// Returns [`ValueError::UnsupportedType`] for BSON types with no value
/// counterpart (code, symbols with scope, min/max keys, DB pointers) and for
/// decimals outside the [`Decimal`] range.
pub fn decode_bson(bson: Bson) -> Result<DynValue, ValueError> {
    let value = match bson {
        Bson::Null | Bson::Undefined => DynValue::Null,
        Bson::Boolean(value) => DynValue::Bool(value),
        Bson::String(value) | Bson::Symbol(value) => DynValue::String(value),
        Bson::Int32(value) => DynValue::SignedInt(i64::from(value)),
        Bson::Int64(value) => DynValue::SignedInt(value),
        Bson::Double(value) => DynValue::Float(value),
        Bson::Decimal128(value) => DynValue::Decimal(decode_decimal(value)?),
        Bson::DateTime(date) => chrono::DateTime::from_timestamp_millis(date.timestamp_millis())
            .map_or(DynValue::Null, DynValue::Date),
        Bson::Binary(binary) => match binary.subtype {
            BinarySubtype::Uuid | BinarySubtype::UuidOld => {
                uuid::Uuid::from_slice(&binary.bytes)
                    .map_or(DynValue::Binary(binary.bytes), DynValue::Uuid)
            }
            _ => DynValue::Binary(binary.bytes),
        },
        Bson::ObjectId(id) => DynValue::ObjectId(ObjectId::from_bytes(id.bytes())),
        Bson::RegularExpression(regex) => DynValue::Regex(Regex::new(regex.pattern, &regex.options)),
        Bson::Timestamp(timestamp) => {
            DynValue::Timestamp(Timestamp::new(timestamp.time, timestamp.increment))
        }
        Bson::Array(items) => DynValue::Array(
            items
                .into_iter()
                .map(decode_bson)
                .collect::<Result<_, _>>()?,
        ),
        Bson::Document(document) => DynValue::Object(
            document
                .into_iter()
                .map(|(key, item)| decode_bson(item).map(|value| (key, value)))
                .collect::<Result<_, _>>()?,
        ),
        Bson::JavaScriptCode(_) => return Err(ValueError::unsupported("value", "javascript")),
        Bson::JavaScriptCodeWithScope(_) => {
            return Err(ValueError::unsupported("value", "javascript with scope"));
        }
        Bson::MaxKey => return Err(ValueError::unsupported("value", "max key")),
        Bson::MinKey => return Err(ValueError::unsupported("value", "min key")),
        Bson::DbPointer(_) => return Err(ValueError::unsupported("value", "db pointer")),
    };
    Ok(value)
}

/// Encode a decimal as BID decimal128.
fn encode_decimal(value: Decimal) -> bson::Decimal128 {
    let mantissa = value.mantissa();
    let sign = u128::from(mantissa < 0);
    let coefficient = mantissa.unsigned_abs();
    // Scale is at most 28, so the biased exponent stays in 6148..=6176.
    let exponent = u128::from(DECIMAL128_BIAS.saturating_sub(value.scale()));
    let bits = sign.wrapping_shl(127) | exponent.wrapping_shl(113) | coefficient;
    bson::Decimal128::from_bytes(bits.to_le_bytes())
}

/// Decode a BID decimal128 into a [`Decimal`] without losing precision.
fn decode_decimal(value: bson::Decimal128) -> Result<Decimal, ValueError> {
    let bits = u128::from_le_bytes(value.bytes());
    let negative = bits.wrapping_shr(127) == 1;
    let combination = bits.wrapping_shr(122) & 0b1_1111;
    if combination == 0b1_1110 || combination == 0b1_1111 {
        return Err(ValueError::unsupported("finite decimal", "infinity or NaN"));
    }
    if bits.wrapping_shr(125) & 0b11 == 0b11 {
        // Coefficients in the large form always exceed 10^34 - 1.
        return Ok(Decimal::ZERO);
    }

    let mut coefficient = bits & DECIMAL128_COEFFICIENT_MASK;
    if coefficient > DECIMAL128_MAX_COEFFICIENT {
        return Ok(Decimal::ZERO);
    }
    let biased = u32::try_from(bits.wrapping_shr(113) & 0x3FFF).unwrap_or_default();
    let out_of_range = || ValueError::unsupported("decimal in range", "decimal128");

    let mut scale = DECIMAL128_BIAS.saturating_sub(biased);
    for _ in DECIMAL128_BIAS..biased {
        coefficient = coefficient.checked_mul(10).ok_or_else(out_of_range)?;
    }
    if coefficient == 0 {
        scale = scale.min(DECIMAL_MAX_SCALE);
    }
    while scale > DECIMAL_MAX_SCALE {
        if coefficient % 10 != 0 {
            return Err(out_of_range());
        }
        coefficient /= 10;
        scale = scale.saturating_sub(1);
    }

    let magnitude = i128::try_from(coefficient).ok().ok_or_else(out_of_range)?;
    let mantissa = if negative { magnitude.saturating_neg() } else { magnitude };
    Decimal::try_from_i128_with_scale(mantissa, scale)
        .ok()
        .ok_or_else(out_of_range)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::str::FromStr as _;

    use chrono::{NaiveDate, TimeZone as _, Utc};

    use super::*;

    fn decimal(text: &str) -> Decimal {
        match Decimal::from_str(text) {
            Ok(value) => value,
            Err(error) => panic!("bad decimal {text}: {error}"),
        }
    }

    #[test]
    fn decimal128_uses_bid_layout() {
        let encoded = encode_decimal(decimal("1"));
        let bits = u128::from_le_bytes(encoded.bytes());
        assert_eq!(bits, 0x3040_0000_0000_0000_0000_0000_0000_0001);

        let encoded = encode_decimal(decimal("-0.5"));
        let bits = u128::from_le_bytes(encoded.bytes());
        assert_eq!(bits, 0xB03E_0000_0000_0000_0000_0000_0000_0005);
    }

    #[test]
    fn decimal128_keeps_scale_and_sign() {
        for text in ["0", "12.340", "-7922816251426433759354395033.5", "0.0000000000000000000000000001"] {
            let value = decimal(text);
            let Ok(decoded) = decode_decimal(encode_decimal(value)) else {
                panic!("{text} should decode");
            };
            assert_eq!(decoded, value);
            assert_eq!(decoded.scale(), value.scale());
        }
    }

    #[test]
    fn decimal128_positive_exponent_expands() {
        // 5E+3
        let bits: u128 = 0x3046_0000_0000_0000_0000_0000_0000_0005;
        let Ok(decoded) = decode_decimal(bson::Decimal128::from_bytes(bits.to_le_bytes())) else {
            panic!("5E+3 should decode");
        };
        assert_eq!(decoded, decimal("5000"));
    }

    #[test]
    fn decimal128_rejects_special_values() {
        let infinity: u128 = 0x7800_0000_0000_0000_0000_0000_0000_0000;
        assert!(decode_decimal(bson::Decimal128::from_bytes(infinity.to_le_bytes())).is_err());
        // 1E+40
        let huge: u128 = 0x3090_0000_0000_0000_0000_0000_0000_0001;
        assert!(decode_decimal(bson::Decimal128::from_bytes(huge.to_le_bytes())).is_err());
    }

    #[test]
    fn dates_require_millisecond_precision() {
        let Some(exact) = Utc.timestamp_millis_opt(1_700_000_000_123).single() else {
            panic!("valid instant");
        };
        assert_eq!(
            encode_value(&DynValue::Date(exact)).ok(),
            Some(Bson::DateTime(bson::DateTime::from_millis(1_700_000_000_123)))
        );

        let Some(precise) = Utc.timestamp_opt(1_700_000_000, 123_456_789).single() else {
            panic!("valid instant");
        };
        assert!(encode_value(&DynValue::Date(precise)).is_err());

        let Some(date) = NaiveDate::from_ymd_opt(2024, 2, 29) else {
            panic!("valid date");
        };
        assert!(encode_value(&DynValue::from(date)).is_err());
    }

    #[test]
    fn uuids_and_object_ids_keep_their_type() {
        let uuid = uuid::Uuid::from_u128(0x0123_4567_89ab_cdef_0123_4567_89ab_cdef);
        let Ok(encoded) = encode_value(&DynValue::Uuid(uuid)) else {
            panic!("uuid should encode");
        };
        assert!(matches!(
            &encoded,
            Bson::Binary(binary) if binary.subtype == BinarySubtype::Uuid
        ));
        assert_eq!(decode_bson(encoded).ok(), Some(DynValue::Uuid(uuid)));

        let id = ObjectId::from_bytes([7; 12]);
        let Ok(encoded) = encode_value(&DynValue::ObjectId(id)) else {
            panic!("object id should encode");
        };
        assert_eq!(decode_bson(encoded).ok(), Some(DynValue::ObjectId(id)));
    }

    #[test]
    fn unsigned_beyond_i64_becomes_decimal() {
        let Ok(Bson::Decimal128(encoded)) = encode_value(&DynValue::UnsignedInt(u64::MAX)) else {
            panic!("u64::MAX should encode as decimal128");
        };
        assert_eq!(decode_decimal(encoded).ok(), Some(Decimal::from(u64::MAX)));
    }

    #[test]
    fn nested_errors_carry_their_path() {
        let Some(precise) = Utc.timestamp_opt(0, 1).single() else {
            panic!("valid instant");
        };
        let value: DynValue = [("when", DynValue::Array(vec![DynValue::Date(precise)]))]
            .into_iter()
            .collect();
        let Err(error) = encode_value(&value) else {
            panic!("sub-millisecond date should fail");
        };
        assert!(error.to_string().contains("when"));
    }

    #[test]
    fn never_matching_filter_skips_the_round_trip() {
        let Ok(none) = compile_filter("events", &[polystore_query::value(1_i64).eq(2_i64)]) else {
            panic!("constant filter should compile");
        };
        assert!(none.is_none());

        let Ok(Some(filter)) = compile_filter("events", &[polystore_query::key("a").eq(1_i64)])
        else {
            panic!("field filter should compile to a document");
        };
        assert_eq!(filter, bson::doc! { "a": { "$eq": 1_i64 } });
    }

    #[test]
    fn zero_limit_selects_nothing() {
        let matching = FindRequest::new("events").filter(polystore_query::key("a").eq(1_i64));
        let Ok(empty) = request_filter(&matching.clone().limit(0)) else {
            panic!("zero-limit request should compile");
        };
        assert!(empty.is_none());

        let Ok(Some(filter)) = request_filter(&matching.clone().limit(1)) else {
            panic!("bounded request should compile to a document");
        };
        assert_eq!(filter, bson::doc! { "a": { "$eq": 1_i64 } });

        let Ok(Some(_)) = request_filter(&matching.skip(3)) else {
            panic!("unbounded request should compile to a document");
        };
    }

    #[test]
    fn sort_and_projection_documents() {
        let sort = sort_document(&[
            ("b".to_owned(), SortOrder::Descending),
            ("a".to_owned(), SortOrder::Ascending),
        ]);
        assert_eq!(sort, bson::doc! { "b": -1, "a": 1 });
        assert_eq!(projection_document(None), None);
        let includes = ["x".to_owned()].into();
        assert_eq!(projection_document(Some(&includes)), Some(bson::doc! { "x": 1 }));
    }
}
