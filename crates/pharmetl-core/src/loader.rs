// crates/pharmetl-core/src/loader.rs

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use sqlx::postgres::{PgArguments, PgConnectOptions};
use sqlx::{Connection, PgConnection};
use tracing::{info, warn};

use crate::config::{check_identifier, WarehouseConfig};
use crate::error::{EtlError, Result};
use crate::table::{ColumnType, ExtractedTable, Value};

/// Rows per INSERT statement. Pages only exist for throughput; every page of
/// one load call shares a single transaction.
pub const INSERT_PAGE_SIZE: usize = 1000;

/// Postgres caps bind parameters per statement at u16::MAX.
const MAX_BIND_PARAMS: usize = 65_535;

type PgQuery<'q> = sqlx::query::Query<'q, sqlx::Postgres, PgArguments>;

#[derive(Debug, Clone, Serialize)]
pub struct DimensionLoadReport {
    pub table: String,
    pub input_rows: usize,
    pub inserted: u64,
    pub skipped_existing: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FactLoadReport {
    pub table: String,
    pub input_rows: usize,
    pub watermark: i64,
    pub inserted: u64,
    pub new_watermark: i64,
}

/// One open warehouse session: a single connection carrying at most one
/// in-flight transaction. Created once per pipeline run and closed exactly
/// once, on every exit path.
#[derive(Debug)]
pub struct WarehouseLoader {
    conn: PgConnection,
    schema: String,
    database: String,
}

impl WarehouseLoader {
    /// Open a session against the configured warehouse.
    pub async fn connect(config: &WarehouseConfig) -> Result<Self> {
        Self::connect_with(config.connect_options(), &config.schema).await
    }

    /// Open a session from raw connect options. Used by integration tests
    /// that carry a full connection URL rather than discrete parameters.
    pub async fn connect_with(options: PgConnectOptions, schema: &str) -> Result<Self> {
        check_identifier("schema", schema)?;
        let database = options.get_database().unwrap_or("postgres").to_string();
        let conn = PgConnection::connect_with(&options)
            .await
            .map_err(|source| EtlError::Connection {
                database: database.clone(),
                source,
            })?;
        info!(database = %database, "Warehouse connection established");
        Ok(Self {
            conn,
            schema: schema.to_string(),
            database,
        })
    }

    /// Release the session. Invoked by the pipeline on every exit path.
    pub async fn close(self) -> Result<()> {
        self.conn
            .close()
            .await
            .map_err(|source| EtlError::Connection {
                database: self.database,
                source,
            })?;
        info!("Warehouse connection closed");
        Ok(())
    }

    /// Insert every row of `table` into the dimension relation `destination`
    /// with upsert-skip semantics: rows colliding with an existing key are
    /// silently dropped, never updated. The whole call is one transaction;
    /// any failure mid-batch rolls back every page.
    pub async fn load_dimension(
        &mut self,
        table: &ExtractedTable,
        destination: &str,
    ) -> Result<DimensionLoadReport> {
        const OPERATION: &str = "dimension load";
        self.check_destination(destination, table)?;

        let mut tx = self
            .conn
            .begin()
            .await
            .map_err(|err| EtlError::load(destination, OPERATION, err))?;

        let mut inserted = 0u64;
        for page in table.rows().chunks(page_size(table.columns().len())) {
            let sql = build_insert(
                &self.schema,
                destination,
                table.columns(),
                page.len(),
                ConflictPolicy::SkipExisting,
            );
            let mut query = sqlx::query(&sql);
            for row in page {
                for (value, column_type) in row.iter().zip(table.column_types()) {
                    query = bind_value(query, value, *column_type);
                }
            }
            match query.execute(&mut *tx).await {
                Ok(result) => inserted += result.rows_affected(),
                Err(err) => {
                    rollback(tx, destination).await;
                    return Err(EtlError::load(destination, OPERATION, err));
                }
            }
        }

        tx.commit()
            .await
            .map_err(|err| EtlError::load(destination, OPERATION, err))?;

        let report = DimensionLoadReport {
            table: destination.to_string(),
            input_rows: table.row_count(),
            inserted,
            skipped_existing: (table.row_count() as u64).saturating_sub(inserted),
        };
        info!(
            table = %report.table,
            input_rows = report.input_rows,
            inserted = report.inserted,
            skipped_existing = report.skipped_existing,
            "Loaded dimension table"
        );
        Ok(report)
    }

    /// Append-only incremental load: read the destination's current
    /// `MAX(key_column)` watermark, then insert only input rows whose key
    /// exceeds it, in one transaction. An empty delta is a successful no-op.
    ///
    /// Duplicate keys *within* one input batch above the watermark are not
    /// deduplicated; upstream extraction is assumed to produce strictly
    /// increasing keys.
    pub async fn incremental_load_facts(
        &mut self,
        table: &ExtractedTable,
        destination: &str,
        key_column: &str,
    ) -> Result<FactLoadReport> {
        const OPERATION: &str = "incremental fact load";
        self.check_destination(destination, table)?;
        check_identifier("column", key_column)?;

        let key_index = table.column_index(key_column).ok_or_else(|| {
            EtlError::load(
                destination,
                OPERATION,
                format!("input has no '{key_column}' column"),
            )
        })?;
        for (index, row) in table.rows().iter().enumerate() {
            if row[key_index].as_integer().is_none() {
                return Err(EtlError::load(
                    destination,
                    OPERATION,
                    format!("row {index}: '{key_column}' is not an integer"),
                ));
            }
        }

        let mut tx = self
            .conn
            .begin()
            .await
            .map_err(|err| EtlError::load(destination, OPERATION, err))?;

        // Cast keeps the scalar decodable as i64 even when the key column is
        // a plain INTEGER.
        let watermark_sql = format!(
            "SELECT COALESCE(MAX({key_column}), 0)::BIGINT FROM {}.{destination}",
            self.schema
        );
        let watermark: i64 = match sqlx::query_scalar(&watermark_sql).fetch_one(&mut *tx).await {
            Ok(value) => value,
            Err(err) => {
                rollback(tx, destination).await;
                return Err(EtlError::load(destination, OPERATION, err));
            }
        };

        let fresh = rows_above_watermark(table, key_index, watermark);
        if fresh.is_empty() {
            tx.commit()
                .await
                .map_err(|err| EtlError::load(destination, OPERATION, err))?;
            info!(
                table = %destination,
                watermark,
                "No new fact rows beyond watermark, nothing to do"
            );
            return Ok(FactLoadReport {
                table: destination.to_string(),
                input_rows: table.row_count(),
                watermark,
                inserted: 0,
                new_watermark: watermark,
            });
        }

        let mut inserted = 0u64;
        for page in fresh.rows().chunks(page_size(fresh.columns().len())) {
            let sql = build_insert(
                &self.schema,
                destination,
                fresh.columns(),
                page.len(),
                ConflictPolicy::Fail,
            );
            let mut query = sqlx::query(&sql);
            for row in page {
                for (value, column_type) in row.iter().zip(fresh.column_types()) {
                    query = bind_value(query, value, *column_type);
                }
            }
            match query.execute(&mut *tx).await {
                Ok(result) => inserted += result.rows_affected(),
                Err(err) => {
                    rollback(tx, destination).await;
                    return Err(EtlError::load(destination, OPERATION, err));
                }
            }
        }

        tx.commit()
            .await
            .map_err(|err| EtlError::load(destination, OPERATION, err))?;

        let new_watermark = max_key(&fresh, key_index).unwrap_or(watermark);
        let report = FactLoadReport {
            table: destination.to_string(),
            input_rows: table.row_count(),
            watermark,
            inserted,
            new_watermark,
        };
        info!(
            table = %report.table,
            input_rows = report.input_rows,
            watermark = report.watermark,
            inserted = report.inserted,
            new_watermark = report.new_watermark,
            "Incrementally loaded fact table"
        );
        Ok(report)
    }

    fn check_destination(&self, destination: &str, table: &ExtractedTable) -> Result<()> {
        check_identifier("table", destination)?;
        for column in table.columns() {
            check_identifier("column", column)?;
        }
        Ok(())
    }
}

async fn rollback(tx: sqlx::Transaction<'_, sqlx::Postgres>, table: &str) {
    if let Err(err) = tx.rollback().await {
        warn!(table = %table, error = %err, "Rollback after failed load did not complete cleanly");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConflictPolicy {
    /// `ON CONFLICT DO NOTHING`: existing keys are skipped per row.
    SkipExisting,
    /// Plain insert; constraint violations abort the batch.
    Fail,
}

fn page_size(column_count: usize) -> usize {
    // Keep each page under the bind-parameter ceiling for wide tables.
    INSERT_PAGE_SIZE.min(MAX_BIND_PARAMS / column_count.max(1)).max(1)
}

fn build_insert(
    schema: &str,
    table: &str,
    columns: &[String],
    row_count: usize,
    policy: ConflictPolicy,
) -> String {
    let column_list = columns.join(", ");
    let mut sql = format!("INSERT INTO {schema}.{table} ({column_list}) VALUES ");
    let mut param = 1usize;
    for row in 0..row_count {
        if row > 0 {
            sql.push_str(", ");
        }
        sql.push('(');
        for position in 0..columns.len() {
            if position > 0 {
                sql.push_str(", ");
            }
            sql.push('$');
            sql.push_str(&param.to_string());
            param += 1;
        }
        sql.push(')');
    }
    if policy == ConflictPolicy::SkipExisting {
        sql.push_str(" ON CONFLICT DO NOTHING");
    }
    sql
}

fn bind_value<'q>(query: PgQuery<'q>, value: &'q Value, column_type: ColumnType) -> PgQuery<'q> {
    match value {
        Value::Integer(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::Bool(v) => query.bind(*v),
        Value::Date(v) => query.bind(*v),
        Value::Timestamp(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.as_str()),
        // Nulls bind with the column's inferred type so the prepared
        // statement's parameter OIDs line up with the destination columns.
        Value::Null => match column_type {
            ColumnType::Integer => query.bind(None::<i64>),
            ColumnType::Float => query.bind(None::<f64>),
            ColumnType::Bool => query.bind(None::<bool>),
            ColumnType::Date => query.bind(None::<NaiveDate>),
            ColumnType::Timestamp => query.bind(None::<NaiveDateTime>),
            ColumnType::Text => query.bind(None::<String>),
        },
    }
}

fn rows_above_watermark(
    table: &ExtractedTable,
    key_index: usize,
    watermark: i64,
) -> ExtractedTable {
    table.filter_rows(|row| {
        row[key_index]
            .as_integer()
            .is_some_and(|key| key > watermark)
    })
}

fn max_key(table: &ExtractedTable, key_index: usize) -> Option<i64> {
    table
        .rows()
        .iter()
        .filter_map(|row| row[key_index].as_integer())
        .max()
}
