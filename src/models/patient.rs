use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::Gender;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub id: Uuid,
    /// Account that owns this record, if the patient has a login.
    pub user_id: Option<Uuid>,
    /// Assigned doctor.
    pub doctor_id: Uuid,
    pub name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<Gender>,
    pub medical_history: Option<String>,
    pub created_at: DateTime<Utc>,
}
