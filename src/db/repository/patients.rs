use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{parse_date, parse_opt, parse_uuid, patient_scope_filter, RecordScope};
use crate::db::{format_timestamp, parse_timestamp, DatabaseError};
use crate::models::Patient;

const PATIENT_COLUMNS: &str =
    "p.id, p.user_id, p.doctor_id, p.name, p.date_of_birth, p.gender, p.medical_history, p.created_at";

struct PatientRow {
    id: String,
    user_id: Option<String>,
    doctor_id: String,
    name: String,
    date_of_birth: Option<String>,
    gender: Option<String>,
    medical_history: Option<String>,
    created_at: String,
}

fn patient_row(row: &Row<'_>) -> rusqlite::Result<PatientRow> {
    Ok(PatientRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        doctor_id: row.get(2)?,
        name: row.get(3)?,
        date_of_birth: row.get(4)?,
        gender: row.get(5)?,
        medical_history: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn patient_from_row(row: PatientRow) -> Result<Patient, DatabaseError> {
    Ok(Patient {
        id: parse_uuid("patients.id", &row.id)?,
        user_id: row
            .user_id
            .as_deref()
            .map(|id| parse_uuid("patients.user_id", id))
            .transpose()?,
        doctor_id: parse_uuid("patients.doctor_id", &row.doctor_id)?,
        name: row.name,
        date_of_birth: row
            .date_of_birth
            .as_deref()
            .map(|d| parse_date("patients.date_of_birth", d))
            .transpose()?,
        gender: parse_opt(row.gender)?,
        medical_history: row.medical_history,
        created_at: parse_timestamp("patients.created_at", &row.created_at)?,
    })
}

pub fn insert_patient(conn: &Connection, patient: &Patient) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO patients (id, user_id, doctor_id, name, date_of_birth, gender, medical_history, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            patient.id.to_string(),
            patient.user_id.map(|id| id.to_string()),
            patient.doctor_id.to_string(),
            patient.name,
            patient.date_of_birth.map(|d| d.format("%Y-%m-%d").to_string()),
            patient.gender.map(|g| g.as_str()),
            patient.medical_history,
            format_timestamp(&patient.created_at),
        ],
    )?;
    Ok(())
}

pub fn get_patient(conn: &Connection, id: &Uuid) -> Result<Option<Patient>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {PATIENT_COLUMNS} FROM patients p WHERE p.id = ?1"),
            params![id.to_string()],
            patient_row,
        )
        .optional()?;
    row.map(patient_from_row).transpose()
}

/// Fetch a patient only if it is visible within `scope`.
pub fn get_patient_scoped(
    conn: &Connection,
    id: &Uuid,
    scope: &RecordScope,
) -> Result<Option<Patient>, DatabaseError> {
    let filter = patient_scope_filter(scope, "p").bind("p.id = ?", id.to_string());
    let row = conn
        .query_row(
            &format!("SELECT {PATIENT_COLUMNS} FROM patients p {}", filter.where_sql()),
            filter.params(),
            patient_row,
        )
        .optional()?;
    row.map(patient_from_row).transpose()
}

/// Patients visible within `scope`, newest first.
pub fn list_patients(
    conn: &Connection,
    scope: &RecordScope,
    limit: Option<u32>,
) -> Result<Vec<Patient>, DatabaseError> {
    let filter = patient_scope_filter(scope, "p");
    let limit_sql = limit.map(|n| format!("LIMIT {n}")).unwrap_or_default();
    let mut stmt = conn.prepare(&format!(
        "SELECT {PATIENT_COLUMNS} FROM patients p {} ORDER BY p.created_at DESC, p.id ASC {limit_sql}",
        filter.where_sql()
    ))?;

    let rows = stmt.query_map(filter.params(), patient_row)?;

    let mut patients = Vec::new();
    for row in rows {
        patients.push(patient_from_row(row?)?);
    }
    Ok(patients)
}
