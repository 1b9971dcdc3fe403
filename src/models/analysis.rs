use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{AnalysisStatus, Condition, Severity};

/// One diagnostic result recorded by a doctor for a patient's fundus image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetinalAnalysis {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub condition_detected: Condition,
    pub confidence_score: Option<f64>,
    pub severity: Option<Severity>,
    pub recommendations: Option<String>,
    /// Length of the voice consultation, in seconds.
    pub consultation_duration: Option<f64>,
    pub model_version: String,
    pub status: AnalysisStatus,
    pub created_at: DateTime<Utc>,
}
