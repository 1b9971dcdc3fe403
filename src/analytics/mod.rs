//! Analytics aggregation.
//!
//! Every dashboard metric is an independent SQL aggregation computed on
//! demand, scoped by a [`Scope`] derived from the caller. Nothing is cached
//! and no metric depends on another; a failing query fails the whole
//! snapshot.
//!
//! Histograms sort by count descending, then by group label ascending.

pub mod ai_performance;
pub mod demographics;
pub mod doctor;
pub mod overview;

pub use ai_performance::{ai_performance, AiPerformance};
pub use demographics::{patient_demographics, PatientDemographics};
pub use doctor::{doctor_analytics, DoctorAnalytics};
pub use overview::{overview, Overview};

use std::str::FromStr;

use chrono::{DateTime, Duration, Months, Utc};
use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use crate::db::{format_timestamp, DatabaseError, SqlFilter};
use crate::models::enums::{Condition, Severity};

/// Trailing window for "recent" counts and daily series.
pub const RECENT_WINDOW_DAYS: i64 = 30;

/// Trailing window for monthly series.
pub const TREND_WINDOW_MONTHS: u32 = 12;

/// Size of leaderboards and "recent patients" lists.
pub const TOP_N: u32 = 10;

/// Which rows an aggregation covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Whole platform (admin view).
    Platform,
    /// Rows belonging to one doctor.
    Doctor(Uuid),
}

impl Scope {
    /// Predicate on `retinal_analyses a`.
    pub(crate) fn analyses(&self) -> SqlFilter {
        match self {
            Scope::Platform => SqlFilter::new(),
            Scope::Doctor(id) => SqlFilter::new().bind("a.doctor_id = ?", id.to_string()),
        }
    }

    /// Predicate on `patients p`.
    pub(crate) fn patients(&self) -> SqlFilter {
        match self {
            Scope::Platform => SqlFilter::new(),
            Scope::Doctor(id) => SqlFilter::new().bind("p.doctor_id = ?", id.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConditionCount {
    pub condition_detected: Condition,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeverityCount {
    pub severity: Severity,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyCount {
    pub month: String,
    pub count: i64,
}

/// `YYYY-MM` bucket label.
pub fn month_label(year: i32, month: u32) -> String {
    format!("{year}-{month:02}")
}

/// Mean confidence as a fixed 4-decimal string; no data reads as zero.
pub fn format_confidence(mean: Option<f64>) -> String {
    format!("{:.4}", mean.unwrap_or(0.0))
}

pub(crate) fn days_ago(now: DateTime<Utc>, days: i64) -> String {
    format_timestamp(&(now - Duration::days(days)))
}

pub(crate) fn months_ago(now: DateTime<Utc>, months: u32) -> String {
    let start = now
        .checked_sub_months(Months::new(months))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    format_timestamp(&start)
}

pub(crate) fn count(conn: &Connection, from: &str, filter: &SqlFilter) -> Result<i64, DatabaseError> {
    let sql = format!("SELECT COUNT(*) FROM {from} {}", filter.where_sql());
    Ok(conn.query_row(&sql, filter.params(), |row| row.get(0))?)
}

pub(crate) fn condition_distribution(
    conn: &Connection,
    filter: &SqlFilter,
) -> Result<Vec<ConditionCount>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT a.condition_detected, COUNT(*) AS n
         FROM retinal_analyses a {}
         GROUP BY a.condition_detected
         ORDER BY n DESC, a.condition_detected ASC",
        filter.where_sql()
    ))?;
    let rows = stmt.query_map(filter.params(), |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;

    let mut out = Vec::new();
    for row in rows {
        let (condition, count) = row?;
        out.push(ConditionCount {
            condition_detected: Condition::from_str(&condition)?,
            count,
        });
    }
    Ok(out)
}

pub(crate) fn severity_distribution(
    conn: &Connection,
    filter: &SqlFilter,
) -> Result<Vec<SeverityCount>, DatabaseError> {
    let filter = filter.clone().raw("a.severity IS NOT NULL");
    let mut stmt = conn.prepare(&format!(
        "SELECT a.severity, COUNT(*) AS n
         FROM retinal_analyses a {}
         GROUP BY a.severity
         ORDER BY n DESC, a.severity ASC",
        filter.where_sql()
    ))?;
    let rows = stmt.query_map(filter.params(), |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;

    let mut out = Vec::new();
    for row in rows {
        let (severity, count) = row?;
        out.push(SeverityCount {
            severity: Severity::from_str(&severity)?,
            count,
        });
    }
    Ok(out)
}

/// Row counts bucketed by calendar month of `column`, oldest bucket first.
/// Months without rows are omitted.
pub(crate) fn monthly_counts(
    conn: &Connection,
    from: &str,
    column: &str,
    filter: &SqlFilter,
) -> Result<Vec<MonthlyCount>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT CAST(strftime('%Y', {column}) AS INTEGER) AS y,
                CAST(strftime('%m', {column}) AS INTEGER) AS m,
                COUNT(*)
         FROM {from} {}
         GROUP BY y, m
         ORDER BY y ASC, m ASC",
        filter.where_sql()
    ))?;
    let rows = stmt.query_map(filter.params(), |row| {
        Ok((row.get::<_, i32>(0)?, row.get::<_, u32>(1)?, row.get::<_, i64>(2)?))
    })?;

    let mut out = Vec::new();
    for row in rows {
        let (year, month, count) = row?;
        out.push(MonthlyCount {
            month: month_label(year, month),
            count,
        });
    }
    Ok(out)
}

pub(crate) fn average_confidence(
    conn: &Connection,
    filter: &SqlFilter,
) -> Result<Option<f64>, DatabaseError> {
    let filter = filter.clone().raw("a.confidence_score IS NOT NULL");
    let sql = format!(
        "SELECT AVG(a.confidence_score) FROM retinal_analyses a {}",
        filter.where_sql()
    );
    Ok(conn.query_row(&sql, filter.params(), |row| row.get(0))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn month_label_zero_pads() {
        assert_eq!(month_label(2026, 3), "2026-03");
        assert_eq!(month_label(2025, 11), "2025-11");
    }

    #[test]
    fn confidence_formats_to_four_places() {
        assert_eq!(format_confidence(Some((0.95 + 0.82) / 2.0)), "0.8850");
        assert_eq!(format_confidence(Some(1.0)), "1.0000");
        assert_eq!(format_confidence(None), "0.0000");
    }

    #[test]
    fn window_starts_are_storage_formatted() {
        let now = Utc.with_ymd_and_hms(2026, 3, 31, 12, 0, 0).unwrap();
        assert_eq!(days_ago(now, 30), "2026-03-01 12:00:00");
        // Month arithmetic clamps to the last valid day
        assert_eq!(months_ago(now, 1), "2026-02-28 12:00:00");
        assert_eq!(months_ago(now, 12), "2025-03-31 12:00:00");
    }

    #[test]
    fn doctor_scope_binds_doctor_id() {
        let id = Uuid::new_v4();
        assert_eq!(Scope::Doctor(id).analyses().where_sql(), "WHERE a.doctor_id = ?");
        assert_eq!(Scope::Doctor(id).patients().where_sql(), "WHERE p.doctor_id = ?");
        assert!(Scope::Platform.analyses().is_empty());
    }
}
