//! Postgres-backed stores.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `Conflict` | Second active threshold slipped past the advisory lock |
//! | Database (foreign key violation) | `23503` | `NotFound` | Alert referencing an unknown threshold, threshold for an unknown indicator |
//! | Database (other) | Any other | `Backend` | |
//! | PoolClosed / other | N/A | `Backend` | Network errors, connection failures, etc. |
//!
//! Measurement inserts use `ON CONFLICT DO NOTHING` on the natural key, so two
//! overlapping ingestion runs never produce duplicate rows even when they race
//! past the existence lookup.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::{Span, instrument};

use envwatch_core::{AlertId, ThresholdId};
use envwatch_monitoring::{
    Alert, AlertOrigin, AlertThreshold, GeoPoint, Indicator, IndicatorCode, Measurement, MeasurementKey, NewAlert,
    NewThreshold, PollutantComponents, Severity, seed_indicators,
};

use super::{AlertStore, MeasurementStore, StoreError, StoreResult, ThresholdStore};

const SCHEMA: &str = include_str!("../../migrations/0001_envwatch.sql");

/// Rows per INSERT statement (14 binds each, well under the 65535 bind limit).
const INSERT_CHUNK: usize = 1000;

/// Open a connection pool.
pub async fn connect(database_url: &str) -> StoreResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .map_err(|e| map_sqlx_error("connect", e))
}

/// Create the tables if needed and seed the default indicators.
#[instrument(skip(pool), err)]
pub async fn ensure_schema(pool: &PgPool) -> StoreResult<()> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| map_sqlx_error("ensure_schema", e))?;

    for indicator in seed_indicators() {
        sqlx::query(
            r#"
            INSERT INTO indicators (code, label, description)
            VALUES ($1, $2, $3)
            ON CONFLICT (code) DO NOTHING
            "#,
        )
        .bind(indicator.code.as_str())
        .bind(&indicator.label)
        .bind(&indicator.description)
        .execute(pool)
        .await
        .map_err(|e| map_sqlx_error("seed_indicators", e))?;
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct PostgresMeasurementStore {
    pool: PgPool,
}

impl PostgresMeasurementStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MeasurementStore for PostgresMeasurementStore {
    #[instrument(skip(self, keys), fields(keys = keys.len()), err)]
    async fn existing_keys(&self, keys: &[MeasurementKey]) -> StoreResult<HashSet<MeasurementKey>> {
        if keys.is_empty() {
            return Ok(HashSet::new());
        }
        let latitudes: Vec<i64> = keys.iter().map(|k| k.latitude_e6).collect();
        let longitudes: Vec<i64> = keys.iter().map(|k| k.longitude_e6).collect();
        let instants: Vec<DateTime<Utc>> = keys.iter().map(|k| k.observed_at).collect();

        let rows = sqlx::query(
            r#"
            SELECT m.latitude_e6, m.longitude_e6, m.observed_at
            FROM measurements m
            JOIN UNNEST($1::BIGINT[], $2::BIGINT[], $3::TIMESTAMPTZ[]) AS k (latitude_e6, longitude_e6, observed_at)
              ON m.latitude_e6 = k.latitude_e6
             AND m.longitude_e6 = k.longitude_e6
             AND m.observed_at = k.observed_at
            "#,
        )
        .bind(latitudes)
        .bind(longitudes)
        .bind(instants)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("existing_keys", e))?;

        rows.iter()
            .map(|row| -> StoreResult<MeasurementKey> {
                Ok(MeasurementKey {
                    latitude_e6: row.try_get("latitude_e6").map_err(decode_error)?,
                    longitude_e6: row.try_get("longitude_e6").map_err(decode_error)?,
                    observed_at: row.try_get("observed_at").map_err(decode_error)?,
                })
            })
            .collect()
    }

    #[instrument(skip(self, batch), fields(rows = batch.len(), inserted = tracing::field::Empty), err)]
    async fn insert_batch(&self, batch: &[Measurement]) -> StoreResult<usize> {
        let mut inserted = 0u64;
        for chunk in batch.chunks(INSERT_CHUNK) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO measurements (latitude_e6, longitude_e6, observed_at, latitude, longitude, \
                 aqi, co, no, no2, o3, so2, pm2_5, pm10, nh3) ",
            );
            qb.push_values(chunk, |mut row, m| {
                let key = m.key();
                let c = &m.components;
                row.push_bind(key.latitude_e6)
                    .push_bind(key.longitude_e6)
                    .push_bind(m.observed_at)
                    .push_bind(m.location.latitude)
                    .push_bind(m.location.longitude)
                    .push_bind(i16::from(m.aqi))
                    .push_bind(c.co)
                    .push_bind(c.no)
                    .push_bind(c.no2)
                    .push_bind(c.o3)
                    .push_bind(c.so2)
                    .push_bind(c.pm2_5)
                    .push_bind(c.pm10)
                    .push_bind(c.nh3);
            });
            qb.push(" ON CONFLICT (latitude_e6, longitude_e6, observed_at) DO NOTHING");

            let result = qb
                .build()
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("insert_measurements", e))?;
            inserted += result.rows_affected();
        }

        Span::current().record("inserted", inserted);
        Ok(inserted as usize)
    }

    #[instrument(skip(self), err)]
    async fn since(&self, from: DateTime<Utc>) -> StoreResult<Vec<Measurement>> {
        let rows = sqlx::query(
            r#"
            SELECT latitude, longitude, observed_at, aqi, co, no, no2, o3, so2, pm2_5, pm10, nh3
            FROM measurements
            WHERE observed_at >= $1
            ORDER BY observed_at ASC, latitude_e6 ASC, longitude_e6 ASC
            "#,
        )
        .bind(from)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("measurements_since", e))?;

        rows.iter().map(measurement_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn count(&self) -> StoreResult<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM measurements")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_measurements", e))?;
        Ok(count.max(0) as usize)
    }
}

/// Indicators, thresholds and alerts in Postgres.
#[derive(Debug, Clone)]
pub struct PostgresAlertStore {
    pool: PgPool,
}

impl PostgresAlertStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ThresholdStore for PostgresAlertStore {
    #[instrument(skip(self), err)]
    async fn indicators(&self) -> StoreResult<Vec<Indicator>> {
        let rows = sqlx::query("SELECT code, label, description FROM indicators ORDER BY code")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_indicators", e))?;
        rows.iter().map(indicator_from_row).collect()
    }

    #[instrument(skip(self), fields(code = %code), err)]
    async fn indicator(&self, code: &IndicatorCode) -> StoreResult<Option<Indicator>> {
        let row = sqlx::query("SELECT code, label, description FROM indicators WHERE code = $1")
            .bind(code.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_indicator", e))?;
        row.as_ref().map(indicator_from_row).transpose()
    }

    /// Deactivate-then-insert in one transaction, serialised per indicator by an
    /// advisory lock. The partial unique index backs the invariant.
    #[instrument(skip(self), fields(indicator = %request.indicator, deactivated = tracing::field::Empty), err)]
    async fn create_threshold(&self, request: NewThreshold) -> StoreResult<AlertThreshold> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(request.indicator.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_indicator", e))?;

        let known: Option<String> = sqlx::query_scalar("SELECT code FROM indicators WHERE code = $1")
            .bind(request.indicator.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("get_indicator", e))?;
        if known.is_none() {
            tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StoreError::NotFound(format!("indicator {}", request.indicator)));
        }

        let deactivated = sqlx::query("UPDATE alert_thresholds SET active = FALSE WHERE indicator = $1 AND active")
            .bind(request.indicator.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("deactivate_previous", e))?
            .rows_affected();

        let row = sqlx::query(
            r#"
            INSERT INTO alert_thresholds (id, indicator, threshold_value, active, created_at)
            VALUES ($1, $2, $3, TRUE, $4)
            RETURNING id, indicator, threshold_value, active, created_at
            "#,
        )
        .bind(ThresholdId::new().as_uuid())
        .bind(request.indicator.as_str())
        .bind(request.threshold_value)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_threshold", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Span::current().record("deactivated", deactivated);
        threshold_from_row(&row)
    }

    #[instrument(skip(self), err)]
    async fn threshold(&self, id: ThresholdId) -> StoreResult<Option<AlertThreshold>> {
        let row = sqlx::query(
            "SELECT id, indicator, threshold_value, active, created_at FROM alert_thresholds WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_threshold", e))?;
        row.as_ref().map(threshold_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn active_thresholds(&self) -> StoreResult<Vec<AlertThreshold>> {
        let rows = sqlx::query(
            r#"
            SELECT id, indicator, threshold_value, active, created_at
            FROM alert_thresholds
            WHERE active
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("active_thresholds", e))?;
        rows.iter().map(threshold_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn deactivate_threshold(&self, id: ThresholdId) -> StoreResult<AlertThreshold> {
        let row = sqlx::query(
            r#"
            UPDATE alert_thresholds SET active = FALSE
            WHERE id = $1
            RETURNING id, indicator, threshold_value, active, created_at
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("deactivate_threshold", e))?;

        match row {
            Some(row) => threshold_from_row(&row),
            None => Err(StoreError::NotFound(format!("threshold {id}"))),
        }
    }
}

#[async_trait]
impl AlertStore for PostgresAlertStore {
    #[instrument(skip(self, alerts), fields(alerts = alerts.len()), err)]
    async fn append(&self, alerts: Vec<NewAlert>) -> StoreResult<Vec<Alert>> {
        if alerts.is_empty() {
            return Ok(Vec::new());
        }
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let now = Utc::now();
        let mut created = Vec::with_capacity(alerts.len());
        for alert in alerts {
            let alert = alert.into_alert(AlertId::new(), now);
            sqlx::query(
                r#"
                INSERT INTO alerts (id, created_at, threshold_id, value, message, severity, origin)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(alert.id.as_uuid())
            .bind(alert.created_at)
            .bind(alert.threshold_id.map(uuid::Uuid::from))
            .bind(alert.value)
            .bind(&alert.message)
            .bind(alert.severity.as_str())
            .bind(alert.origin.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_alert", e))?;
            created.push(alert);
        }

        tx.commit().await.map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(created)
    }

    #[instrument(skip(self), err)]
    async fn list(&self) -> StoreResult<Vec<Alert>> {
        let rows = sqlx::query(
            r#"
            SELECT id, created_at, threshold_id, value, message, severity, origin
            FROM alerts
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_alerts", e))?;
        rows.iter().map(alert_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn get(&self, id: AlertId) -> StoreResult<Option<Alert>> {
        let row = sqlx::query(
            "SELECT id, created_at, threshold_id, value, message, severity, origin FROM alerts WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_alert", e))?;
        row.as_ref().map(alert_from_row).transpose()
    }
}

// Row decoding

fn decode_error(err: sqlx::Error) -> StoreError {
    StoreError::Backend(format!("failed to decode row: {err}"))
}

fn measurement_from_row(row: &PgRow) -> StoreResult<Measurement> {
    let aqi: i16 = row.try_get("aqi").map_err(decode_error)?;
    let aqi = u8::try_from(aqi).map_err(|_| StoreError::Backend(format!("stored aqi {aqi} out of range")))?;
    Ok(Measurement {
        location: GeoPoint::new(
            row.try_get("latitude").map_err(decode_error)?,
            row.try_get("longitude").map_err(decode_error)?,
        ),
        observed_at: row.try_get("observed_at").map_err(decode_error)?,
        aqi,
        components: PollutantComponents {
            co: row.try_get("co").map_err(decode_error)?,
            no: row.try_get("no").map_err(decode_error)?,
            no2: row.try_get("no2").map_err(decode_error)?,
            o3: row.try_get("o3").map_err(decode_error)?,
            so2: row.try_get("so2").map_err(decode_error)?,
            pm2_5: row.try_get("pm2_5").map_err(decode_error)?,
            pm10: row.try_get("pm10").map_err(decode_error)?,
            nh3: row.try_get("nh3").map_err(decode_error)?,
        },
    })
}

fn indicator_code(raw: &str) -> StoreResult<IndicatorCode> {
    IndicatorCode::parse(raw).map_err(|e| StoreError::Backend(format!("stored indicator code {raw:?}: {e}")))
}

fn indicator_from_row(row: &PgRow) -> StoreResult<Indicator> {
    let code: String = row.try_get("code").map_err(decode_error)?;
    Ok(Indicator::new(
        indicator_code(&code)?,
        row.try_get::<String, _>("label").map_err(decode_error)?,
        row.try_get::<String, _>("description").map_err(decode_error)?,
    ))
}

fn threshold_from_row(row: &PgRow) -> StoreResult<AlertThreshold> {
    let indicator: String = row.try_get("indicator").map_err(decode_error)?;
    Ok(AlertThreshold {
        id: ThresholdId::from_uuid(row.try_get("id").map_err(decode_error)?),
        indicator: indicator_code(&indicator)?,
        threshold_value: row.try_get("threshold_value").map_err(decode_error)?,
        active: row.try_get("active").map_err(decode_error)?,
        created_at: row.try_get("created_at").map_err(decode_error)?,
    })
}

fn alert_from_row(row: &PgRow) -> StoreResult<Alert> {
    let severity: String = row.try_get("severity").map_err(decode_error)?;
    let origin: String = row.try_get("origin").map_err(decode_error)?;
    let threshold_id: Option<uuid::Uuid> = row.try_get("threshold_id").map_err(decode_error)?;
    Ok(Alert {
        id: AlertId::from_uuid(row.try_get("id").map_err(decode_error)?),
        created_at: row.try_get("created_at").map_err(decode_error)?,
        threshold_id: threshold_id.map(ThresholdId::from_uuid),
        value: row.try_get("value").map_err(decode_error)?,
        message: row.try_get("message").map_err(decode_error)?,
        severity: Severity::parse(&severity)
            .ok_or_else(|| StoreError::Backend(format!("stored severity {severity:?}")))?,
        origin: AlertOrigin::parse(&origin).ok_or_else(|| StoreError::Backend(format!("stored origin {origin:?}")))?,
    })
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                Some("23503") => StoreError::NotFound(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => StoreError::Backend(format!("connection pool closed in {operation}")),
        _ => StoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}
