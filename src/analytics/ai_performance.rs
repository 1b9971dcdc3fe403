//! Model quality view for admins (`GET /api/analytics/ai-performance`).

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;

use super::{month_label, months_ago, TREND_WINDOW_MONTHS};
use crate::db::{list_performance, DatabaseError, SqlFilter};
use crate::models::enums::Condition;
use crate::models::ModelPerformance;

/// Lower bound of the "high" confidence bucket.
pub const HIGH_CONFIDENCE: f64 = 0.9;
/// Lower bound of the "medium" confidence bucket.
pub const MEDIUM_CONFIDENCE: f64 = 0.7;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AiPerformance {
    pub confidence_distribution: ConfidenceDistribution,
    pub condition_stats: Vec<ConditionStats>,
    pub monthly_performance: Vec<MonthlyPerformance>,
    pub model_performance: Vec<ModelPerformance>,
}

/// Buckets over analyses with a recorded confidence. The three counts always
/// add up to the number of such analyses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConfidenceDistribution {
    pub high: i64,
    pub medium: i64,
    pub low: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConditionStats {
    pub condition_detected: Condition,
    pub count: i64,
    pub avg_confidence: Option<f64>,
    pub min_confidence: Option<f64>,
    pub max_confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyPerformance {
    pub month: String,
    pub predictions: i64,
    pub avg_confidence: Option<f64>,
}

pub fn ai_performance(conn: &Connection, now: DateTime<Utc>) -> Result<AiPerformance, DatabaseError> {
    Ok(AiPerformance {
        confidence_distribution: confidence_distribution(conn)?,
        condition_stats: condition_stats(conn)?,
        monthly_performance: monthly_performance(
            conn,
            &SqlFilter::new().bind("a.created_at >= ?", months_ago(now, TREND_WINDOW_MONTHS)),
        )?,
        model_performance: list_performance(conn)?,
    })
}

fn confidence_distribution(conn: &Connection) -> Result<ConfidenceDistribution, DatabaseError> {
    Ok(conn.query_row(
        "SELECT COALESCE(SUM(CASE WHEN confidence_score >= ?1 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN confidence_score >= ?2 AND confidence_score < ?1 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN confidence_score < ?2 THEN 1 ELSE 0 END), 0)
         FROM retinal_analyses
         WHERE confidence_score IS NOT NULL",
        [HIGH_CONFIDENCE, MEDIUM_CONFIDENCE],
        |row| {
            Ok(ConfidenceDistribution {
                high: row.get(0)?,
                medium: row.get(1)?,
                low: row.get(2)?,
            })
        },
    )?)
}

fn condition_stats(conn: &Connection) -> Result<Vec<ConditionStats>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT condition_detected, COUNT(*) AS n,
                AVG(confidence_score), MIN(confidence_score), MAX(confidence_score)
         FROM retinal_analyses
         GROUP BY condition_detected
         ORDER BY n DESC, condition_detected ASC",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, Option<f64>>(2)?,
            row.get::<_, Option<f64>>(3)?,
            row.get::<_, Option<f64>>(4)?,
        ))
    })?;

    let mut out = Vec::new();
    for row in rows {
        let (condition, count, avg, min, max) = row?;
        out.push(ConditionStats {
            condition_detected: Condition::from_str(&condition)?,
            count,
            avg_confidence: avg,
            min_confidence: min,
            max_confidence: max,
        });
    }
    Ok(out)
}

fn monthly_performance(
    conn: &Connection,
    filter: &SqlFilter,
) -> Result<Vec<MonthlyPerformance>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT CAST(strftime('%Y', a.created_at) AS INTEGER) AS y,
                CAST(strftime('%m', a.created_at) AS INTEGER) AS m,
                COUNT(*), AVG(a.confidence_score)
         FROM retinal_analyses a {}
         GROUP BY y, m
         ORDER BY y ASC, m ASC",
        filter.where_sql()
    ))?;
    let rows = stmt.query_map(filter.params(), |row| {
        Ok((
            row.get::<_, i32>(0)?,
            row.get::<_, u32>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, Option<f64>>(3)?,
        ))
    })?;

    let mut out = Vec::new();
    for row in rows {
        let (year, month, predictions, avg_confidence) = row?;
        out.push(MonthlyPerformance {
            month: month_label(year, month),
            predictions,
            avg_confidence,
        });
    }
    Ok(out)
}
