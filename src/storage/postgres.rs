//! PostgreSQL pool built on `sqlx::PgPool`.
//!
//! The pool is created lazily: building a handle validates the URL and TLS
//! settings but opens no connection, so startup does not depend on the
//! server being reachable. The first statement (or the reset coordinator's
//! readiness probe) opens the first connection.

use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{FixedOffset, NaiveTime};
use futures::TryStreamExt;
use ipnetwork::IpNetwork;
use log::{debug, info};
use sqlx::postgres::types::{Oid, PgInterval, PgMoney, PgTimeTz};
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPoolOptions, PgRow, PgSslMode};
use sqlx::query::Query;
use sqlx::{Column, Decode, Either, PgPool, Postgres, Row, Type, TypeInfo, ValueRef};

use crate::config::{ConnectionConfig, TlsMode};
use crate::error_handling::{classify_sqlx_error, BoxError, DbError, ErrorKind};
use crate::storage::pool::{PoolConnector, PoolHandle, PoolOccupancy};
use crate::storage::values::{QueryResult, Record, SqlValue};

/// Builds [`PgPoolHandle`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct PgConnector;

#[async_trait]
impl PoolConnector for PgConnector {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn PoolHandle>, DbError> {
        let options = connect_options(config)?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .idle_timeout(Some(config.idle_timeout))
            .acquire_timeout(config.connect_timeout)
            .connect_lazy_with(options);

        debug!(
            "Created lazy PostgreSQL pool (max_connections={}, connect_timeout={:?})",
            config.max_connections, config.connect_timeout
        );
        Ok(Arc::new(PgPoolHandle::new(pool, config.max_connections)))
    }
}

/// Translates the config into driver connect options.
fn connect_options(config: &ConnectionConfig) -> Result<PgConnectOptions, DbError> {
    let ssl_mode = match config.tls {
        TlsMode::Disabled => PgSslMode::Disable,
        // `require` encrypts without verifying the server certificate
        TlsMode::EncryptedUnverified => PgSslMode::Require,
    };

    let options = PgConnectOptions::from_str(&config.url)
        .map_err(|e| DbError::configuration(format!("invalid database URL: {}", e)))?
        .ssl_mode(ssl_mode)
        .application_name(&config.application_name)
        .options([(
            "statement_timeout",
            config.statement_timeout.as_millis().to_string(),
        )]);
    Ok(options)
}

/// A `PgPool` plus the waiter count the driver does not expose.
pub struct PgPoolHandle {
    pool: PgPool,
    max_connections: u32,
    waiting: AtomicU32,
}

/// Keeps `waiting` accurate even when the acquiring future is dropped.
struct WaitingGuard<'a>(&'a AtomicU32);

impl<'a> WaitingGuard<'a> {
    fn enter(counter: &'a AtomicU32) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        WaitingGuard(counter)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl PgPoolHandle {
    pub fn new(pool: PgPool, max_connections: u32) -> Self {
        PgPoolHandle {
            pool,
            max_connections,
            waiting: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl PoolHandle for PgPoolHandle {
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, DbError> {
        let mut conn = {
            let _waiting = WaitingGuard::enter(&self.waiting);
            self.pool.acquire().await.map_err(classify_sqlx_error)?
        };

        let query = params
            .iter()
            .fold(sqlx::query(sql), |query, value| bind_value(query, value));

        let mut rows = Vec::new();
        let mut rows_affected = 0u64;
        // Single statement per call; the deprecation concerns multi-statement strings.
        #[allow(deprecated)]
        let mut stream = query.fetch_many(&mut *conn);
        while let Some(item) = stream.try_next().await.map_err(classify_sqlx_error)? {
            match item {
                Either::Left(done) => rows_affected += done.rows_affected(),
                Either::Right(row) => rows.push(decode_row(&row)?),
            }
        }

        let row_count = if rows.is_empty() {
            rows_affected
        } else {
            rows.len() as u64
        };
        Ok(QueryResult { rows, row_count })
    }

    fn occupancy(&self) -> PoolOccupancy {
        PoolOccupancy::from_counts(
            self.pool.size(),
            u32::try_from(self.pool.num_idle()).unwrap_or(u32::MAX),
            self.waiting.load(Ordering::SeqCst),
            self.max_connections,
        )
    }

    async fn teardown(&self) {
        if self.pool.is_closed() {
            return;
        }
        // `close` waits for checked-out connections to be returned, then
        // closes them; it cannot fail.
        self.pool.close().await;
        info!("Connection pool closed");
    }

    fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

/// Binds one positional parameter.
///
/// `SqlValue::Null` is sent as a text-typed NULL; cast the placeholder
/// (`$1::int`) where the server cannot coerce it.
fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &SqlValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::Int(v) => query.bind(*v),
        SqlValue::Float(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.clone()),
        SqlValue::Json(v) => query.bind(v.clone()),
        SqlValue::Timestamp(v) => query.bind(*v),
        SqlValue::Uuid(v) => query.bind(*v),
        SqlValue::Bytes(v) => query.bind(v.clone()),
    }
}

fn decode_row(row: &PgRow) -> Result<Record, DbError> {
    let mut record = Record::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = decode_column(row, idx, column.type_info().name())?;
        record.push(column.name(), value);
    }
    Ok(record)
}

/// Decodes one column by its PostgreSQL type name.
///
/// Types with no dedicated mapping keep their server representation: text
/// values (enums, `citext`, `xml`) as `Text`, anything else as `Bytes`.
/// Decoding runs after the statement has completed, so a failure here is a
/// non-retryable `Query` error that says so.
fn decode_column(row: &PgRow, idx: usize, type_name: &str) -> Result<SqlValue, DbError> {
    let value = match type_name {
        "BOOL" => row.try_get::<Option<bool>, _>(idx).map(SqlValue::from),
        "INT2" => row.try_get::<Option<i16>, _>(idx).map(SqlValue::from),
        "INT4" => row.try_get::<Option<i32>, _>(idx).map(SqlValue::from),
        "INT8" => row.try_get::<Option<i64>, _>(idx).map(SqlValue::from),
        "OID" => row
            .try_get::<Option<Oid>, _>(idx)
            .map(|v| SqlValue::from(v.map(|oid| i64::from(oid.0)))),
        "FLOAT4" => row.try_get::<Option<f32>, _>(idx).map(SqlValue::from),
        "FLOAT8" => row.try_get::<Option<f64>, _>(idx).map(SqlValue::from),
        "NUMERIC" => return decode_numeric(row, idx),
        // Two fractional digits, as with the default lc_monetary
        "MONEY" => row
            .try_get::<Option<PgMoney>, _>(idx)
            .map(|v| SqlValue::from(v.map(|m| m.to_bigdecimal(2).to_string()))),
        "TEXT" | "VARCHAR" | "CHAR" | "NAME" | "UNKNOWN" => {
            row.try_get::<Option<String>, _>(idx).map(SqlValue::from)
        }
        "JSON" | "JSONB" => row
            .try_get::<Option<serde_json::Value>, _>(idx)
            .map(SqlValue::from),
        "TIMESTAMPTZ" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx)
            .map(SqlValue::from),
        "TIMESTAMP" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(idx)
            .map(|v| SqlValue::from(v.map(|t| t.and_utc()))),
        "DATE" => row
            .try_get::<Option<chrono::NaiveDate>, _>(idx)
            .map(|v| SqlValue::from(v.map(|d| d.to_string()))),
        "TIME" => row
            .try_get::<Option<NaiveTime>, _>(idx)
            .map(|v| SqlValue::from(v.map(|t| t.to_string()))),
        "TIMETZ" => row
            .try_get::<Option<PgTimeTz<NaiveTime, FixedOffset>>, _>(idx)
            .map(|v| SqlValue::from(v.map(|t| format!("{}{}", t.time, t.offset)))),
        "INTERVAL" => row
            .try_get::<Option<PgInterval>, _>(idx)
            .map(|v| SqlValue::from(v.map(interval_to_json))),
        "INET" | "CIDR" => row
            .try_get::<Option<IpNetwork>, _>(idx)
            .map(|v| SqlValue::from(v.map(|net| net.to_string()))),
        "UUID" => row.try_get::<Option<uuid::Uuid>, _>(idx).map(SqlValue::from),
        "BYTEA" => row.try_get::<Option<Vec<u8>>, _>(idx).map(SqlValue::from),
        "VOID" => Ok(SqlValue::Null),
        "BOOL[]" => decode_array::<bool>(row, idx),
        "INT2[]" => decode_array::<i16>(row, idx),
        "INT4[]" => decode_array::<i32>(row, idx),
        "INT8[]" => decode_array::<i64>(row, idx),
        "FLOAT4[]" => decode_array::<f32>(row, idx),
        "FLOAT8[]" => decode_array::<f64>(row, idx),
        "TEXT[]" | "VARCHAR[]" | "CHAR[]" | "NAME[]" => decode_array::<String>(row, idx),
        "JSON[]" | "JSONB[]" => decode_array::<serde_json::Value>(row, idx),
        "TIMESTAMPTZ[]" => decode_array::<chrono::DateTime<chrono::Utc>>(row, idx),
        "UUID[]" => decode_array::<uuid::Uuid>(row, idx),
        "NUMERIC[]" => row.try_get::<Option<Vec<Option<BigDecimal>>>, _>(idx).map(|v| {
            SqlValue::from(v.map(|items| {
                serde_json::Value::Array(
                    items
                        .into_iter()
                        .map(|item| item.map_or(serde_json::Value::Null, |d| d.to_string().into()))
                        .collect(),
                )
            }))
        }),
        _ => return decode_raw(row, idx, type_name),
    };
    value.map_err(|e| decode_error(idx, type_name, e))
}

/// `NUMERIC` as exact decimal text; `NaN` and the infinities pass through by name.
fn decode_numeric(row: &PgRow, idx: usize) -> Result<SqlValue, DbError> {
    match row.try_get::<Option<BigDecimal>, _>(idx) {
        Ok(value) => Ok(SqlValue::from(value.map(|d| d.to_string()))),
        Err(e) => {
            let special = row
                .try_get_raw(idx)
                .ok()
                .and_then(|raw| raw.as_bytes().ok().and_then(numeric_special_value));
            match special {
                Some(name) => Ok(SqlValue::Text(name.to_string())),
                None => Err(decode_error(idx, "NUMERIC", e)),
            }
        }
    }
}

/// Reads the sign word of a binary `NUMERIC` (ndigits, weight, sign, dscale).
fn numeric_special_value(bytes: &[u8]) -> Option<&'static str> {
    let sign = u16::from_be_bytes([*bytes.get(4)?, *bytes.get(5)?]);
    match sign {
        0xC000 => Some("NaN"),
        0xD000 => Some("Infinity"),
        0xF000 => Some("-Infinity"),
        _ => None,
    }
}

fn interval_to_json(interval: PgInterval) -> serde_json::Value {
    serde_json::json!({
        "months": interval.months,
        "days": interval.days,
        "microseconds": interval.microseconds,
    })
}

/// One-dimensional arrays become JSON arrays; `NULL` elements stay `null`.
fn decode_array<T>(row: &PgRow, idx: usize) -> Result<SqlValue, sqlx::Error>
where
    T: Into<SqlValue>,
    Vec<Option<T>>: for<'r> Decode<'r, Postgres> + Type<Postgres>,
{
    let Some(items) = row.try_get::<Option<Vec<Option<T>>>, _>(idx)? else {
        return Ok(SqlValue::Null);
    };
    let items = items
        .into_iter()
        .map(|item| serde_json::to_value(SqlValue::from(item)))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
    Ok(SqlValue::Json(serde_json::Value::Array(items)))
}

fn decode_raw(row: &PgRow, idx: usize, type_name: &str) -> Result<SqlValue, DbError> {
    let raw = row
        .try_get_raw(idx)
        .map_err(|e| decode_error(idx, type_name, e))?;
    if raw.is_null() {
        return Ok(SqlValue::Null);
    }
    let bytes = raw
        .as_bytes()
        .map_err(|e| decode_error(idx, type_name, e))?;
    Ok(match std::str::from_utf8(bytes) {
        Ok(text) if !text.chars().any(|c| c.is_control() && !c.is_whitespace()) => {
            SqlValue::Text(text.to_string())
        }
        _ => SqlValue::Bytes(bytes.to_vec()),
    })
}

fn decode_error(idx: usize, type_name: &str, error: impl Into<BoxError>) -> DbError {
    let error = error.into();
    DbError::new(
        ErrorKind::Query,
        format!(
            "statement completed but column {} ({}) could not be decoded: {}",
            idx, type_name, error
        ),
    )
    .with_source(error)
}
