use std::str::FromStr;

use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{parse_opt, parse_uuid, RecordScope};
use crate::db::{format_timestamp, parse_timestamp, DatabaseError, SqlFilter};
use crate::models::enums::{AnalysisStatus, Condition};
use crate::models::RetinalAnalysis;

const ANALYSIS_COLUMNS: &str = "a.id, a.patient_id, a.doctor_id, a.condition_detected,
     a.confidence_score, a.severity, a.recommendations, a.consultation_duration,
     a.model_version, a.status, a.created_at";

struct AnalysisRow {
    id: String,
    patient_id: String,
    doctor_id: String,
    condition_detected: String,
    confidence_score: Option<f64>,
    severity: Option<String>,
    recommendations: Option<String>,
    consultation_duration: Option<f64>,
    model_version: String,
    status: String,
    created_at: String,
}

fn analysis_row(row: &Row<'_>) -> rusqlite::Result<AnalysisRow> {
    Ok(AnalysisRow {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        doctor_id: row.get(2)?,
        condition_detected: row.get(3)?,
        confidence_score: row.get(4)?,
        severity: row.get(5)?,
        recommendations: row.get(6)?,
        consultation_duration: row.get(7)?,
        model_version: row.get(8)?,
        status: row.get(9)?,
        created_at: row.get(10)?,
    })
}

fn analysis_from_row(row: AnalysisRow) -> Result<RetinalAnalysis, DatabaseError> {
    Ok(RetinalAnalysis {
        id: parse_uuid("retinal_analyses.id", &row.id)?,
        patient_id: parse_uuid("retinal_analyses.patient_id", &row.patient_id)?,
        doctor_id: parse_uuid("retinal_analyses.doctor_id", &row.doctor_id)?,
        condition_detected: Condition::from_str(&row.condition_detected)?,
        confidence_score: row.confidence_score,
        severity: parse_opt(row.severity)?,
        recommendations: row.recommendations,
        consultation_duration: row.consultation_duration,
        model_version: row.model_version,
        status: AnalysisStatus::from_str(&row.status)?,
        created_at: parse_timestamp("retinal_analyses.created_at", &row.created_at)?,
    })
}

/// Filter on `retinal_analyses` (alias `a`) for a scope.
pub(crate) fn analysis_scope_filter(scope: &RecordScope) -> SqlFilter {
    match scope {
        RecordScope::All => SqlFilter::new(),
        RecordScope::AssignedTo(doctor) => {
            SqlFilter::new().bind("a.doctor_id = ?", doctor.to_string())
        }
        RecordScope::OwnedBy(user) => SqlFilter::new().bind(
            "a.patient_id IN (SELECT id FROM patients WHERE user_id = ?)",
            user.to_string(),
        ),
    }
}

pub fn insert_analysis(conn: &Connection, analysis: &RetinalAnalysis) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO retinal_analyses (id, patient_id, doctor_id, condition_detected, confidence_score,
         severity, recommendations, consultation_duration, model_version, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            analysis.id.to_string(),
            analysis.patient_id.to_string(),
            analysis.doctor_id.to_string(),
            analysis.condition_detected.as_str(),
            analysis.confidence_score,
            analysis.severity.map(|s| s.as_str()),
            analysis.recommendations,
            analysis.consultation_duration,
            analysis.model_version,
            analysis.status.as_str(),
            format_timestamp(&analysis.created_at),
        ],
    )?;
    Ok(())
}

/// Fetch an analysis only if it is visible within `scope`.
pub fn get_analysis_scoped(
    conn: &Connection,
    id: &Uuid,
    scope: &RecordScope,
) -> Result<Option<RetinalAnalysis>, DatabaseError> {
    let filter = analysis_scope_filter(scope).bind("a.id = ?", id.to_string());
    let row = conn
        .query_row(
            &format!("SELECT {ANALYSIS_COLUMNS} FROM retinal_analyses a {}", filter.where_sql()),
            filter.params(),
            analysis_row,
        )
        .optional()?;
    row.map(analysis_from_row).transpose()
}

/// Analyses visible within `scope`, newest first.
pub fn list_analyses(
    conn: &Connection,
    scope: &RecordScope,
    patient_id: Option<&Uuid>,
    limit: u32,
) -> Result<Vec<RetinalAnalysis>, DatabaseError> {
    let mut filter = analysis_scope_filter(scope);
    if let Some(patient_id) = patient_id {
        filter = filter.bind("a.patient_id = ?", patient_id.to_string());
    }

    let mut stmt = conn.prepare(&format!(
        "SELECT {ANALYSIS_COLUMNS} FROM retinal_analyses a {}
         ORDER BY a.created_at DESC, a.id ASC LIMIT {limit}",
        filter.where_sql()
    ))?;

    let rows = stmt.query_map(filter.params(), analysis_row)?;

    let mut analyses = Vec::new();
    for row in rows {
        analyses.push(analysis_from_row(row?)?);
    }
    Ok(analyses)
}

/// Set the review status. Returns `false` when no such analysis exists.
pub fn update_analysis_status(
    conn: &Connection,
    id: &Uuid,
    status: AnalysisStatus,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE retinal_analyses SET status = ?1 WHERE id = ?2",
        params![status.as_str(), id.to_string()],
    )?;
    Ok(changed > 0)
}
