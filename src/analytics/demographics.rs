//! Patient population view (`GET /api/analytics/patients`).

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use super::{count, monthly_counts, months_ago, MonthlyCount, Scope, TOP_N, TREND_WINDOW_MONTHS};
use crate::db::repository::{parse_date, parse_opt, parse_uuid};
use crate::db::{format_timestamp, parse_timestamp, DatabaseError, SqlFilter};
use crate::models::enums::Gender;

/// Cohort labels in reporting order.
pub const AGE_COHORTS: [&str; 5] = ["0-17", "18-34", "35-49", "50-64", "65+"];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientDemographics {
    pub age_groups: Vec<AgeGroup>,
    pub gender_distribution: Vec<GenderCount>,
    pub registration_trends: Vec<MonthlyCount>,
    pub total_patients: i64,
    pub patients_with_analyses: i64,
    pub recent_patients: Vec<RecentPatient>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgeGroup {
    pub range: &'static str,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenderCount {
    /// Gender label, `"unknown"` when the record has none.
    pub gender: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentPatient {
    pub id: Uuid,
    pub name: String,
    pub doctor_id: Uuid,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<Gender>,
    /// Display name of the owning account, if any.
    pub user_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub fn patient_demographics(
    conn: &Connection,
    scope: &Scope,
    now: DateTime<Utc>,
) -> Result<PatientDemographics, DatabaseError> {
    let patients = scope.patients();

    Ok(PatientDemographics {
        age_groups: age_groups(conn, &patients, now)?,
        gender_distribution: gender_distribution(conn, &patients)?,
        registration_trends: monthly_counts(
            conn,
            "patients p",
            "p.created_at",
            &patients
                .clone()
                .bind("p.created_at >= ?", months_ago(now, TREND_WINDOW_MONTHS)),
        )?,
        total_patients: count(conn, "patients p", &patients)?,
        patients_with_analyses: count(
            conn,
            "patients p",
            &patients
                .clone()
                .raw("EXISTS (SELECT 1 FROM retinal_analyses a WHERE a.patient_id = p.id)"),
        )?,
        recent_patients: recent_patients(conn, &patients)?,
    })
}

/// Every cohort is reported, zero counts included. Patients without a date
/// of birth are not counted.
fn age_groups(
    conn: &Connection,
    filter: &SqlFilter,
    now: DateTime<Utc>,
) -> Result<Vec<AgeGroup>, DatabaseError> {
    let filter = filter.clone().raw("p.date_of_birth IS NOT NULL");

    let mut stmt = conn.prepare(&format!(
        "SELECT CASE
                    WHEN age < 18 THEN '0-17'
                    WHEN age < 35 THEN '18-34'
                    WHEN age < 50 THEN '35-49'
                    WHEN age < 65 THEN '50-64'
                    ELSE '65+'
                END AS cohort,
                COUNT(*)
         FROM (SELECT CAST((julianday(?) - julianday(p.date_of_birth)) / 365.25 AS INTEGER) AS age
               FROM patients p {})
         GROUP BY cohort",
        filter.where_sql()
    ))?;
    let rows = stmt.query_map(filter.params_with_leading(format_timestamp(&now)), |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;

    let mut counts = [0i64; AGE_COHORTS.len()];
    for row in rows {
        let (cohort, n) = row?;
        if let Some(i) = AGE_COHORTS.iter().position(|c| *c == cohort) {
            counts[i] = n;
        }
    }

    Ok(AGE_COHORTS
        .iter()
        .zip(counts)
        .map(|(range, count)| AgeGroup { range, count })
        .collect())
}

fn gender_distribution(
    conn: &Connection,
    filter: &SqlFilter,
) -> Result<Vec<GenderCount>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT COALESCE(p.gender, 'unknown') AS g, COUNT(*) AS n
         FROM patients p {}
         GROUP BY g
         ORDER BY n DESC, g ASC",
        filter.where_sql()
    ))?;
    let rows = stmt.query_map(filter.params(), |row| {
        Ok(GenderCount {
            gender: row.get(0)?,
            count: row.get(1)?,
        })
    })?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn recent_patients(
    conn: &Connection,
    filter: &SqlFilter,
) -> Result<Vec<RecentPatient>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT p.id, p.name, p.doctor_id, p.date_of_birth, p.gender, u.name, p.created_at
         FROM patients p
         LEFT JOIN users u ON u.id = p.user_id
         {}
         ORDER BY p.created_at DESC, p.id ASC
         LIMIT {TOP_N}",
        filter.where_sql()
    ))?;
    let rows = stmt.query_map(filter.params(), |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, Option<String>>(3)?,
            row.get::<_, Option<String>>(4)?,
            row.get::<_, Option<String>>(5)?,
            row.get::<_, String>(6)?,
        ))
    })?;

    let mut out = Vec::new();
    for row in rows {
        let (id, name, doctor_id, dob, gender, user_name, created_at) = row?;
        out.push(RecentPatient {
            id: parse_uuid("patients.id", &id)?,
            name,
            doctor_id: parse_uuid("patients.doctor_id", &doctor_id)?,
            date_of_birth: dob
                .as_deref()
                .map(|d| parse_date("patients.date_of_birth", d))
                .transpose()?,
            gender: parse_opt(gender)?,
            user_name,
            created_at: parse_timestamp("patients.created_at", &created_at)?,
        });
    }
    Ok(out)
}
