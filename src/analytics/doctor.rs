//! Dashboard for a single doctor (`GET /api/analytics/doctor/:doctorId?`).
//!
//! The caller is resolved and authorized upstream; this module only
//! aggregates rows assigned to the given doctor.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use super::{
    average_confidence, condition_distribution, count, days_ago, format_confidence,
    monthly_counts, months_ago, ConditionCount, MonthlyCount, Scope, RECENT_WINDOW_DAYS, TOP_N,
    TREND_WINDOW_MONTHS,
};
use crate::db::{list_patients, DatabaseError, RecordScope, SqlFilter};
use crate::models::{Patient, User};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DoctorAnalytics {
    pub doctor: DoctorInfo,
    pub total_patients: i64,
    pub total_analyses: i64,
    pub recent_analyses: i64,
    pub condition_distribution: Vec<ConditionCount>,
    pub monthly_trends: Vec<MonthlyCount>,
    pub daily_analyses: Vec<DailyCount>,
    pub average_confidence: String,
    pub recent_patients: Vec<Patient>,
    pub severity_breakdown: SeverityBreakdown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DoctorInfo {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub specialty: Option<String>,
    pub department: Option<String>,
}

impl From<&User> for DoctorInfo {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            specialty: user.specialty.clone(),
            department: user.department.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyCount {
    pub date: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeverityBreakdown {
    pub severe: i64,
    pub moderate: i64,
    pub mild: i64,
    /// Mean consultation length in seconds; `None` when nothing was recorded.
    pub avg_consultation_duration: Option<f64>,
}

pub fn doctor_analytics(
    conn: &Connection,
    doctor: &User,
    now: DateTime<Utc>,
) -> Result<DoctorAnalytics, DatabaseError> {
    let scope = Scope::Doctor(doctor.id);
    let analyses = scope.analyses();
    let recent = analyses
        .clone()
        .bind("a.created_at >= ?", days_ago(now, RECENT_WINDOW_DAYS));

    Ok(DoctorAnalytics {
        doctor: DoctorInfo::from(doctor),
        total_patients: count(conn, "patients p", &scope.patients())?,
        total_analyses: count(conn, "retinal_analyses a", &analyses)?,
        recent_analyses: count(conn, "retinal_analyses a", &recent)?,
        condition_distribution: condition_distribution(conn, &analyses)?,
        monthly_trends: monthly_counts(
            conn,
            "retinal_analyses a",
            "a.created_at",
            &analyses
                .clone()
                .bind("a.created_at >= ?", months_ago(now, TREND_WINDOW_MONTHS)),
        )?,
        daily_analyses: daily_counts(conn, &recent)?,
        average_confidence: format_confidence(average_confidence(conn, &analyses)?),
        recent_patients: list_patients(conn, &RecordScope::AssignedTo(doctor.id), Some(TOP_N))?,
        severity_breakdown: severity_breakdown(conn, &analyses)?,
    })
}

/// Analyses per calendar day, oldest first. Days without rows are omitted.
fn daily_counts(conn: &Connection, filter: &SqlFilter) -> Result<Vec<DailyCount>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT date(a.created_at) AS d, COUNT(*)
         FROM retinal_analyses a {}
         GROUP BY d
         ORDER BY d ASC",
        filter.where_sql()
    ))?;
    let rows = stmt.query_map(filter.params(), |row| {
        Ok(DailyCount {
            date: row.get(0)?,
            count: row.get(1)?,
        })
    })?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn severity_breakdown(
    conn: &Connection,
    filter: &SqlFilter,
) -> Result<SeverityBreakdown, DatabaseError> {
    let sql = format!(
        "SELECT COALESCE(SUM(CASE WHEN a.severity = 'severe' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN a.severity = 'moderate' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN a.severity = 'mild' THEN 1 ELSE 0 END), 0),
                AVG(a.consultation_duration)
         FROM retinal_analyses a {}",
        filter.where_sql()
    );
    Ok(conn.query_row(&sql, filter.params(), |row| {
        Ok(SeverityBreakdown {
            severe: row.get(0)?,
            moderate: row.get(1)?,
            mild: row.get(2)?,
            avg_consultation_duration: row.get(3)?,
        })
    })?)
}
