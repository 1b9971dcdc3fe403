use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Daily metrics snapshot for one model version.
///
/// At most one row exists per `(model_version, evaluation_date)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPerformance {
    pub id: Uuid,
    pub model_version: String,
    pub evaluation_date: NaiveDate,
    pub accuracy: Option<f64>,
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub f1_score: Option<f64>,
    pub total_predictions: i64,
    pub correct_predictions: i64,
    pub updated_at: DateTime<Utc>,
}

/// Metric fields for an upsert. `None` keeps whatever the stored row holds.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PerformanceMetrics {
    pub accuracy: Option<f64>,
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub f1_score: Option<f64>,
    pub total_predictions: Option<i64>,
    pub correct_predictions: Option<i64>,
}
