//! Table-level CRUD. One submodule per table; all functions take a borrowed
//! `Connection` so callers control connection lifetime.

mod analyses;
mod model_performance;
mod patients;
mod users;

pub use analyses::*;
pub use model_performance::*;
pub use patients::*;
pub use users::*;

use std::str::FromStr;

use uuid::Uuid;

use super::{DatabaseError, SqlFilter};

/// Which records a caller may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordScope {
    /// Every record (admins).
    All,
    /// Records assigned to this doctor.
    AssignedTo(Uuid),
    /// Records owned by this patient account.
    OwnedBy(Uuid),
}

pub(crate) fn parse_uuid(field: &str, value: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(value).map_err(|_| DatabaseError::InvalidId {
        field: field.into(),
        value: value.into(),
    })
}

pub(crate) fn parse_opt<T: FromStr<Err = DatabaseError>>(
    value: Option<String>,
) -> Result<Option<T>, DatabaseError> {
    value.as_deref().map(T::from_str).transpose()
}

pub(crate) fn parse_date(field: &str, value: &str) -> Result<chrono::NaiveDate, DatabaseError> {
    chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| {
        DatabaseError::InvalidTimestamp {
            field: field.into(),
            value: value.into(),
        }
    })
}

/// Filter on the `patients` table for a scope, with `alias` as the table alias.
pub(crate) fn patient_scope_filter(scope: &RecordScope, alias: &str) -> SqlFilter {
    match scope {
        RecordScope::All => SqlFilter::new(),
        RecordScope::AssignedTo(doctor) => {
            SqlFilter::new().bind(&format!("{alias}.doctor_id = ?"), doctor.to_string())
        }
        RecordScope::OwnedBy(user) => {
            SqlFilter::new().bind(&format!("{alias}.user_id = ?"), user.to_string())
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Seed helpers shared by repository, analytics and API tests.

    use chrono::{DateTime, NaiveDate, Utc};
    use rusqlite::Connection;
    use uuid::Uuid;

    use crate::models::enums::*;
    use crate::models::*;

    pub fn seed_user(conn: &Connection, name: &str, role: Role) -> User {
        seed_user_with(conn, name, role, None, Utc::now())
    }

    pub fn seed_user_with(
        conn: &Connection,
        name: &str,
        role: Role,
        specialty: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> User {
        let new = NewUser {
            name: name.to_string(),
            email: format!("{}@retinascope.test", name.to_lowercase().replace(' ', ".")),
            password_hash: "unused".to_string(),
            role,
            specialty: specialty.map(str::to_string),
            department: None,
        };
        super::insert_user(conn, &new, created_at).unwrap()
    }

    pub fn seed_patient(
        conn: &Connection,
        doctor_id: Uuid,
        name: &str,
        date_of_birth: Option<NaiveDate>,
        gender: Option<Gender>,
        created_at: DateTime<Utc>,
    ) -> Patient {
        let patient = Patient {
            id: Uuid::new_v4(),
            user_id: None,
            doctor_id,
            name: name.to_string(),
            date_of_birth,
            gender,
            medical_history: None,
            created_at,
        };
        super::insert_patient(conn, &patient).unwrap();
        patient
    }

    #[allow(clippy::too_many_arguments)]
    pub fn seed_analysis(
        conn: &Connection,
        patient: &Patient,
        condition: Condition,
        confidence: Option<f64>,
        severity: Option<Severity>,
        consultation_duration: Option<f64>,
        created_at: DateTime<Utc>,
    ) -> RetinalAnalysis {
        let analysis = RetinalAnalysis {
            id: Uuid::new_v4(),
            patient_id: patient.id,
            doctor_id: patient.doctor_id,
            condition_detected: condition,
            confidence_score: confidence,
            severity,
            recommendations: None,
            consultation_duration,
            model_version: "fusion-v1".to_string(),
            status: AnalysisStatus::Completed,
            created_at,
        };
        super::insert_analysis(conn, &analysis).unwrap();
        analysis
    }
}
