use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{parse_date, parse_uuid};
use crate::db::{format_timestamp, parse_timestamp, DatabaseError};
use crate::models::{ModelPerformance, PerformanceMetrics};

const PERFORMANCE_COLUMNS: &str = "id, model_version, evaluation_date, accuracy, precision_score,
     recall, f1_score, total_predictions, correct_predictions, updated_at";

type PerformanceRow = (
    String,
    String,
    String,
    Option<f64>,
    Option<f64>,
    Option<f64>,
    Option<f64>,
    i64,
    i64,
    String,
);

fn performance_row(row: &Row<'_>) -> rusqlite::Result<PerformanceRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
    ))
}

fn performance_from_row(row: PerformanceRow) -> Result<ModelPerformance, DatabaseError> {
    let (id, model_version, day, accuracy, precision, recall, f1_score, total, correct, updated) = row;
    Ok(ModelPerformance {
        id: parse_uuid("ai_model_performance.id", &id)?,
        model_version,
        evaluation_date: parse_date("ai_model_performance.evaluation_date", &day)?,
        accuracy,
        precision,
        recall,
        f1_score,
        total_predictions: total,
        correct_predictions: correct,
        updated_at: parse_timestamp("ai_model_performance.updated_at", &updated)?,
    })
}

fn day_key(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

/// Insert or update the row for `(model_version, day)`.
///
/// Supplied metrics overwrite the stored values; `None` fields keep them.
/// Counters default to zero on first insert.
pub fn upsert_performance(
    conn: &Connection,
    model_version: &str,
    day: NaiveDate,
    metrics: &PerformanceMetrics,
    now: DateTime<Utc>,
) -> Result<ModelPerformance, DatabaseError> {
    conn.execute(
        "INSERT INTO ai_model_performance (id, model_version, evaluation_date, accuracy, precision_score,
         recall, f1_score, total_predictions, correct_predictions, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, COALESCE(?8, 0), COALESCE(?9, 0), ?10)
         ON CONFLICT(model_version, evaluation_date) DO UPDATE SET
            accuracy = COALESCE(?4, accuracy),
            precision_score = COALESCE(?5, precision_score),
            recall = COALESCE(?6, recall),
            f1_score = COALESCE(?7, f1_score),
            total_predictions = COALESCE(?8, total_predictions),
            correct_predictions = COALESCE(?9, correct_predictions),
            updated_at = ?10",
        params![
            Uuid::new_v4().to_string(),
            model_version,
            day_key(day),
            metrics.accuracy,
            metrics.precision,
            metrics.recall,
            metrics.f1_score,
            metrics.total_predictions,
            metrics.correct_predictions,
            format_timestamp(&now),
        ],
    )?;

    get_performance(conn, model_version, day)?.ok_or_else(|| DatabaseError::NotFound {
        entity_type: "ai_model_performance".into(),
        id: format!("{model_version}@{}", day_key(day)),
    })
}

/// Count one more prediction for `(model_version, day)`.
pub fn record_prediction(
    conn: &Connection,
    model_version: &str,
    day: NaiveDate,
    now: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO ai_model_performance (id, model_version, evaluation_date, total_predictions,
         correct_predictions, updated_at)
         VALUES (?1, ?2, ?3, 1, 0, ?4)
         ON CONFLICT(model_version, evaluation_date) DO UPDATE SET
            total_predictions = total_predictions + 1,
            updated_at = ?4",
        params![
            Uuid::new_v4().to_string(),
            model_version,
            day_key(day),
            format_timestamp(&now),
        ],
    )?;
    Ok(())
}

pub fn get_performance(
    conn: &Connection,
    model_version: &str,
    day: NaiveDate,
) -> Result<Option<ModelPerformance>, DatabaseError> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {PERFORMANCE_COLUMNS} FROM ai_model_performance
                 WHERE model_version = ?1 AND evaluation_date = ?2"
            ),
            params![model_version, day_key(day)],
            performance_row,
        )
        .optional()?;
    row.map(performance_from_row).transpose()
}

/// Every stored row, most recent evaluation first.
pub fn list_performance(conn: &Connection) -> Result<Vec<ModelPerformance>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PERFORMANCE_COLUMNS} FROM ai_model_performance
         ORDER BY evaluation_date DESC, model_version ASC"
    ))?;
    let rows = stmt.query_map([], performance_row)?;

    let mut out = Vec::new();
    for row in rows {
        out.push(performance_from_row(row?)?);
    }
    Ok(out)
}
