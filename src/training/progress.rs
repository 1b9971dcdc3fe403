//! Training script output: `PROGRESS_UPDATE:{json}` lines and the run state
//! they fold into.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::TrainingRequest;

/// Marker that prefixes structured progress lines on stdout.
pub const PROGRESS_PREFIX: &str = "PROGRESS_UPDATE:";

/// Plain output lines kept per run.
pub const MAX_LOG_LINES: usize = 200;

/// Per-epoch metrics reported at `epoch_end`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    #[serde(default)]
    pub train_loss: f64,
    #[serde(default)]
    pub val_loss: f64,
    #[serde(default)]
    pub train_acc: f64,
    #[serde(default)]
    pub val_acc: f64,
    #[serde(default)]
    pub train_f1: f64,
    #[serde(default)]
    pub val_f1: f64,
}

/// Running metrics reported every few batches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchMetrics {
    #[serde(default)]
    pub loss: f64,
    #[serde(default)]
    pub accuracy: f64,
}

/// One structured event emitted by a training script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Initializing {
        message: Option<String>,
    },
    GpuConfigured {
        message: Option<String>,
        gpu_count: Option<u32>,
    },
    GpuWarning {
        message: Option<String>,
    },
    DatasetInfo {
        train_samples: Option<u64>,
        val_samples: Option<u64>,
        #[serde(default)]
        classes: BTreeMap<String, i64>,
        batch_size: Option<u32>,
    },
    ModelCompiled {
        message: Option<String>,
    },
    TrainingStart {
        message: Option<String>,
        epochs: Option<u32>,
        steps_per_epoch: Option<u64>,
    },
    EpochStart {
        epoch: u32,
        total_epochs: u32,
        progress: f64,
    },
    BatchUpdate {
        batch: u64,
        #[serde(default)]
        metrics: BatchMetrics,
    },
    EpochEnd {
        epoch: u32,
        total_epochs: u32,
        progress: f64,
        epoch_time: Option<f64>,
        #[serde(default)]
        metrics: EpochMetrics,
    },
    TrainingComplete {
        message: Option<String>,
        final_accuracy: Option<f64>,
        best_loss: Option<f64>,
        model_path: Option<String>,
    },
    TrainingError {
        message: String,
    },
    /// Any event type this server does not know about.
    #[serde(other)]
    Unknown,
}

/// A classified stdout line.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputLine {
    Progress(ProgressEvent),
    Log(String),
}

/// Split progress events from ordinary output. A prefixed line whose JSON
/// does not parse is kept as a log line.
pub fn classify_line(line: &str) -> OutputLine {
    let Some(payload) = line.strip_prefix(PROGRESS_PREFIX) else {
        return OutputLine::Log(line.to_string());
    };
    match serde_json::from_str::<ProgressEvent>(payload.trim()) {
        Ok(event) => OutputLine::Progress(event),
        Err(e) => {
            tracing::warn!(error = %e, "Unparseable training progress line");
            OutputLine::Log(line.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Idle,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl RunStatus {
    pub fn is_active(self) -> bool {
        self == RunStatus::Running
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpochRecord {
    pub epoch: u32,
    pub epoch_time: Option<f64>,
    pub metrics: EpochMetrics,
}

/// Snapshot of the current (or last) training run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingState {
    pub run_id: Option<Uuid>,
    pub status: RunStatus,
    pub request: Option<TrainingRequest>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub message: Option<String>,
    pub gpu_count: Option<u32>,
    pub train_samples: Option<u64>,
    pub val_samples: Option<u64>,
    pub current_epoch: u32,
    pub total_epochs: u32,
    /// Percent complete, 0-100.
    pub progress: f64,
    pub latest_batch: Option<BatchMetrics>,
    pub history: Vec<EpochRecord>,
    pub final_accuracy: Option<f64>,
    pub best_loss: Option<f64>,
    pub model_path: Option<String>,
    pub error: Option<String>,
    pub logs: VecDeque<String>,
}

impl Default for TrainingState {
    fn default() -> Self {
        Self {
            run_id: None,
            status: RunStatus::Idle,
            request: None,
            started_at: None,
            finished_at: None,
            exit_code: None,
            message: None,
            gpu_count: None,
            train_samples: None,
            val_samples: None,
            current_epoch: 0,
            total_epochs: 0,
            progress: 0.0,
            latest_batch: None,
            history: Vec::new(),
            final_accuracy: None,
            best_loss: None,
            model_path: None,
            error: None,
            logs: VecDeque::new(),
        }
    }
}

impl TrainingState {
    /// Fresh state for a run that was just spawned.
    pub fn started(run_id: Uuid, request: TrainingRequest, now: DateTime<Utc>) -> Self {
        Self {
            run_id: Some(run_id),
            status: RunStatus::Running,
            total_epochs: request.epochs,
            request: Some(request),
            started_at: Some(now),
            ..Self::default()
        }
    }

    /// Fold one progress event into the state.
    pub fn apply(&mut self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Initializing { message }
            | ProgressEvent::ModelCompiled { message } => {
                self.message = message.clone();
            }
            ProgressEvent::GpuConfigured { message, gpu_count } => {
                self.message = message.clone();
                self.gpu_count = *gpu_count;
            }
            ProgressEvent::GpuWarning { message } => {
                self.message = message.clone();
                self.gpu_count = Some(0);
            }
            ProgressEvent::DatasetInfo {
                train_samples,
                val_samples,
                ..
            } => {
                self.train_samples = *train_samples;
                self.val_samples = *val_samples;
            }
            ProgressEvent::TrainingStart { message, epochs, .. } => {
                self.message = message.clone();
                if let Some(epochs) = epochs {
                    self.total_epochs = *epochs;
                }
            }
            ProgressEvent::EpochStart {
                epoch,
                total_epochs,
                progress,
            } => {
                self.current_epoch = *epoch;
                self.total_epochs = *total_epochs;
                self.progress = *progress;
            }
            ProgressEvent::BatchUpdate { metrics, .. } => {
                self.latest_batch = Some(metrics.clone());
            }
            ProgressEvent::EpochEnd {
                epoch,
                total_epochs,
                progress,
                epoch_time,
                metrics,
            } => {
                self.current_epoch = *epoch;
                self.total_epochs = *total_epochs;
                self.progress = *progress;
                self.history.push(EpochRecord {
                    epoch: *epoch,
                    epoch_time: *epoch_time,
                    metrics: metrics.clone(),
                });
            }
            ProgressEvent::TrainingComplete {
                message,
                final_accuracy,
                best_loss,
                model_path,
            } => {
                self.message = message.clone();
                self.final_accuracy = *final_accuracy;
                self.best_loss = *best_loss;
                self.model_path = model_path.clone();
                self.progress = 100.0;
            }
            ProgressEvent::TrainingError { message } => {
                self.error = Some(message.clone());
            }
            ProgressEvent::Unknown => {}
        }
    }

    pub fn push_log(&mut self, line: String) {
        if self.logs.len() == MAX_LOG_LINES {
            self.logs.pop_front();
        }
        self.logs.push_back(line);
    }

    /// Settle the run once its process is gone.
    pub fn finish(&mut self, status: RunStatus, exit_code: Option<i32>, now: DateTime<Utc>) {
        self.status = status;
        self.exit_code = exit_code;
        self.finished_at = Some(now);
        if status == RunStatus::Failed && self.error.is_none() {
            self.error = Some(match exit_code {
                Some(code) => format!("Training process exited with code {code}"),
                None => "Training process terminated by signal".to_string(),
            });
        }
    }
}
