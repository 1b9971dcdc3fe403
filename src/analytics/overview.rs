//! Platform or per-doctor health snapshot (`GET /api/analytics/overview`).

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use super::{
    average_confidence, condition_distribution, count, days_ago, format_confidence,
    monthly_counts, months_ago, severity_distribution, ConditionCount, MonthlyCount, Scope,
    SeverityCount, RECENT_WINDOW_DAYS, TOP_N, TREND_WINDOW_MONTHS,
};
use crate::db::repository::parse_uuid;
use crate::db::DatabaseError;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub total_patients: i64,
    pub total_analyses: i64,
    pub recent_analyses: i64,
    pub condition_distribution: Vec<ConditionCount>,
    pub severity_distribution: Vec<SeverityCount>,
    pub monthly_trends: Vec<MonthlyCount>,
    pub average_confidence: String,
    /// Platform scope only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_doctors: Option<Vec<DoctorVolume>>,
    /// Platform scope only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_performance: Option<Vec<ModelVersionSummary>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DoctorVolume {
    pub doctor_id: Uuid,
    pub name: String,
    pub specialty: Option<String>,
    pub department: Option<String>,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelVersionSummary {
    pub model_version: String,
    pub total_predictions: i64,
    pub average_accuracy: Option<f64>,
    pub latest_accuracy: Option<f64>,
    pub last_evaluated: String,
}

pub fn overview(
    conn: &Connection,
    scope: &Scope,
    now: DateTime<Utc>,
) -> Result<Overview, DatabaseError> {
    let analyses = scope.analyses();

    let total_patients = count(conn, "patients p", &scope.patients())?;
    let total_analyses = count(conn, "retinal_analyses a", &analyses)?;
    let recent_analyses = count(
        conn,
        "retinal_analyses a",
        &analyses
            .clone()
            .bind("a.created_at >= ?", days_ago(now, RECENT_WINDOW_DAYS)),
    )?;
    let condition_distribution = condition_distribution(conn, &analyses)?;
    let severity_distribution = severity_distribution(conn, &analyses)?;
    let monthly_trends = monthly_counts(
        conn,
        "retinal_analyses a",
        "a.created_at",
        &analyses
            .clone()
            .bind("a.created_at >= ?", months_ago(now, TREND_WINDOW_MONTHS)),
    )?;
    let average_confidence = format_confidence(average_confidence(conn, &analyses)?);

    let (top_doctors, model_performance) = match scope {
        Scope::Platform => (Some(top_doctors(conn)?), Some(model_versions(conn)?)),
        Scope::Doctor(_) => (None, None),
    };

    Ok(Overview {
        total_patients,
        total_analyses,
        recent_analyses,
        condition_distribution,
        severity_distribution,
        monthly_trends,
        average_confidence,
        top_doctors,
        model_performance,
    })
}

/// Doctors ranked by number of recorded analyses.
fn top_doctors(conn: &Connection) -> Result<Vec<DoctorVolume>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT u.id, u.name, u.specialty, u.department, COUNT(a.id) AS n
         FROM retinal_analyses a
         JOIN users u ON u.id = a.doctor_id
         GROUP BY u.id
         ORDER BY n DESC, u.name ASC
         LIMIT ?1",
    )?;
    let rows = stmt.query_map([TOP_N], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Option<String>>(2)?,
            row.get::<_, Option<String>>(3)?,
            row.get::<_, i64>(4)?,
        ))
    })?;

    let mut out = Vec::new();
    for row in rows {
        let (id, name, specialty, department, count) = row?;
        out.push(DoctorVolume {
            doctor_id: parse_uuid("users.id", &id)?,
            name,
            specialty,
            department,
            count,
        });
    }
    Ok(out)
}

/// One summary line per model version over all its daily rows.
fn model_versions(conn: &Connection) -> Result<Vec<ModelVersionSummary>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT m.model_version,
                SUM(m.total_predictions),
                AVG(m.accuracy),
                (SELECT l.accuracy FROM ai_model_performance l
                 WHERE l.model_version = m.model_version
                 ORDER BY l.evaluation_date DESC LIMIT 1),
                MAX(m.evaluation_date) AS last
         FROM ai_model_performance m
         GROUP BY m.model_version
         ORDER BY last DESC, m.model_version ASC",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(ModelVersionSummary {
            model_version: row.get(0)?,
            total_predictions: row.get(1)?,
            average_accuracy: row.get(2)?,
            latest_accuracy: row.get(3)?,
            last_evaluated: row.get(4)?,
        })
    })?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}
