//! Model training runner.
//!
//! One process-wide run at a time. The run is an external Python script
//! whose stdout carries `PROGRESS_UPDATE:` lines; each one is folded into
//! the shared [`TrainingState`] and relayed to admin sockets.
//!
//! Run lifecycle: IDLE → RUNNING → COMPLETED | FAILED | STOPPED → RUNNING ...

pub mod progress;

pub use progress::*;

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::broadcast::{Audience, ConnectionRegistry, WsOutgoing, ADMINS};

/// Script used when `demo_mode` is set.
pub const DEMO_SCRIPT: &str = "demo_training.py";

/// Script used for real training on a dataset.
pub const TRAINER_SCRIPT: &str = "retinal_model_trainer.py";

pub const MAX_EPOCHS: u32 = 500;
pub const MAX_BATCH_SIZE: u32 = 1024;

// ═══════════════════════════════════════════════════════════
// Error type
// ═══════════════════════════════════════════════════════════

#[derive(Debug, thiserror::Error)]
pub enum TrainingError {
    #[error("Invalid training request: {0}")]
    InvalidRequest(String),
    #[error("A training run is already in progress")]
    AlreadyRunning,
    #[error("No training run is in progress")]
    NotRunning,
    #[error("Failed to start training process: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("Training state lock poisoned")]
    LockPoisoned,
}

// ═══════════════════════════════════════════════════════════
// Request
// ═══════════════════════════════════════════════════════════

/// Body of `POST /api/model-training/start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingRequest {
    pub epochs: u32,
    pub batch_size: u32,
    pub model_name: String,
    pub demo_mode: bool,
    pub dataset_path: Option<String>,
    pub learning_rate: Option<f64>,
    /// Trainer architecture; the script's own default applies when absent.
    pub architecture: Option<String>,
}

impl Default for TrainingRequest {
    fn default() -> Self {
        Self {
            epochs: 5,
            batch_size: 32,
            model_name: "retinal_classifier".to_string(),
            demo_mode: true,
            dataset_path: None,
            learning_rate: None,
            architecture: None,
        }
    }
}

impl TrainingRequest {
    pub fn validate(&self) -> Result<(), TrainingError> {
        if !(1..=MAX_EPOCHS).contains(&self.epochs) {
            return Err(TrainingError::InvalidRequest(format!(
                "epochs must be between 1 and {MAX_EPOCHS}"
            )));
        }
        if !(1..=MAX_BATCH_SIZE).contains(&self.batch_size) {
            return Err(TrainingError::InvalidRequest(format!(
                "batch_size must be between 1 and {MAX_BATCH_SIZE}"
            )));
        }
        if !is_identifier(&self.model_name) {
            return Err(TrainingError::InvalidRequest(
                "model_name must be non-empty and use only letters, digits, '_' or '-'".into(),
            ));
        }
        if let Some(architecture) = &self.architecture {
            if !is_identifier(architecture) {
                return Err(TrainingError::InvalidRequest(
                    "architecture must be non-empty and use only letters, digits, '_' or '-'"
                        .into(),
                ));
            }
        }
        if let Some(rate) = self.learning_rate {
            if !(rate > 0.0 && rate.is_finite()) {
                return Err(TrainingError::InvalidRequest(
                    "learning_rate must be a positive number".into(),
                ));
            }
        }
        if !self.demo_mode && self.dataset_path.as_deref().map_or(true, str::is_empty) {
            return Err(TrainingError::InvalidRequest(
                "dataset_path is required when demo_mode is false".into(),
            ));
        }
        Ok(())
    }

    /// Script file name and its arguments.
    pub fn script_args(&self) -> (&'static str, Vec<String>) {
        if self.demo_mode {
            (
                DEMO_SCRIPT,
                vec![
                    "--epochs".into(),
                    self.epochs.to_string(),
                    "--batch-size".into(),
                    self.batch_size.to_string(),
                    "--model-name".into(),
                    self.model_name.clone(),
                    "--demo-mode".into(),
                ],
            )
        } else {
            let mut args = vec![
                "--epochs".into(),
                self.epochs.to_string(),
                "--batch_size".into(),
                self.batch_size.to_string(),
                "--dataset_path".into(),
                self.dataset_path.clone().unwrap_or_default(),
                "--model_name".into(),
                self.model_name.clone(),
            ];
            if let Some(rate) = self.learning_rate {
                args.push("--learning_rate".into());
                args.push(rate.to_string());
            }
            if let Some(architecture) = &self.architecture {
                args.push("--architecture".into());
                args.push(architecture.clone());
            }
            (TRAINER_SCRIPT, args)
        }
    }
}

/// Names passed to the scripts as single argv entries.
fn is_identifier(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

// ═══════════════════════════════════════════════════════════
// TrainingManager
// ═══════════════════════════════════════════════════════════

/// Where the interpreter and scripts live.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub python: PathBuf,
    pub scripts_dir: PathBuf,
}

/// Owns the single training run and its stop handle.
pub struct TrainingManager {
    settings: RunnerSettings,
    registry: Arc<RwLock<ConnectionRegistry>>,
    state: Arc<Mutex<TrainingState>>,
    stop: Mutex<Option<oneshot::Sender<()>>>,
}

impl TrainingManager {
    pub fn new(settings: RunnerSettings, registry: Arc<RwLock<ConnectionRegistry>>) -> Self {
        Self {
            settings,
            registry,
            state: Arc::new(Mutex::new(TrainingState::default())),
            stop: Mutex::new(None),
        }
    }

    pub fn snapshot(&self) -> Result<TrainingState, TrainingError> {
        Ok(lock(&self.state)?.clone())
    }

    /// Spawn a run. Must be called from within a Tokio runtime.
    pub fn start(&self, request: TrainingRequest) -> Result<TrainingState, TrainingError> {
        request.validate()?;

        let mut state = lock(&self.state)?;
        if state.status.is_active() {
            return Err(TrainingError::AlreadyRunning);
        }

        let (script, args) = request.script_args();
        let mut child = Command::new(&self.settings.python)
            .arg(self.settings.scripts_dir.join(script))
            .args(&args)
            .current_dir(&self.settings.scripts_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(TrainingError::Spawn)?;

        let run_id = Uuid::new_v4();
        tracing::info!(
            %run_id,
            script,
            epochs = request.epochs,
            demo_mode = request.demo_mode,
            "Training run started"
        );
        *state = TrainingState::started(run_id, request, Utc::now());
        let snapshot = state.clone();

        let (stop_tx, stop_rx) = oneshot::channel();
        *lock(&self.stop)? = Some(stop_tx);
        drop(state);

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let run = RunHandle {
            run_id,
            state: self.state.clone(),
            registry: self.registry.clone(),
        };
        tokio::spawn(supervise(child, stdout, stderr, stop_rx, run));

        Ok(snapshot)
    }

    /// Kill the running process. The run settles as `stopped`.
    pub fn stop(&self) -> Result<(), TrainingError> {
        if !lock(&self.state)?.status.is_active() {
            return Err(TrainingError::NotRunning);
        }
        let sender = lock(&self.stop)?.take().ok_or(TrainingError::NotRunning)?;
        sender.send(()).map_err(|_| TrainingError::NotRunning)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, TrainingError> {
    mutex.lock().map_err(|_| TrainingError::LockPoisoned)
}

/// Shared handles a run's background tasks need.
#[derive(Clone)]
struct RunHandle {
    run_id: Uuid,
    state: Arc<Mutex<TrainingState>>,
    registry: Arc<RwLock<ConnectionRegistry>>,
}

impl RunHandle {
    fn broadcast(&self, msg: WsOutgoing) {
        match self.registry.read() {
            Ok(registry) => {
                registry.broadcast(&msg, Audience::Roles(ADMINS));
            }
            Err(_) => tracing::error!("Connection registry lock poisoned"),
        }
    }

    fn handle_line(&self, line: String) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        match classify_line(&line) {
            OutputLine::Progress(event) => {
                state.apply(&event);
                drop(state);
                self.broadcast(WsOutgoing::TrainingProgress {
                    run_id: self.run_id,
                    event,
                });
            }
            OutputLine::Log(text) => state.push_log(text),
        }
    }
}

async fn relay_lines<R>(reader: R, run: RunHandle, parse: bool)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if parse => run.handle_line(line),
            Ok(Some(line)) => {
                tracing::debug!(run_id = %run.run_id, "{line}");
                if let Ok(mut state) = run.state.lock() {
                    state.push_log(line);
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(run_id = %run.run_id, error = %e, "Training output read failed");
                break;
            }
        }
    }
}

async fn supervise(
    mut child: Child,
    stdout: Option<tokio::process::ChildStdout>,
    stderr: Option<tokio::process::ChildStderr>,
    stop_rx: oneshot::Receiver<()>,
    run: RunHandle,
) {
    let stdout_task = stdout.map(|out| tokio::spawn(relay_lines(out, run.clone(), true)));
    let stderr_task = stderr.map(|err| tokio::spawn(relay_lines(err, run.clone(), false)));

    let (status, exit_code) = tokio::select! {
        exit = child.wait() => match exit {
            Ok(exit) if exit.success() => (RunStatus::Completed, exit.code()),
            Ok(exit) => (RunStatus::Failed, exit.code()),
            Err(e) => {
                tracing::error!(run_id = %run.run_id, error = %e, "Waiting on training process failed");
                (RunStatus::Failed, None)
            }
        },
        _ = stop_rx => {
            if let Err(e) = child.kill().await {
                tracing::warn!(run_id = %run.run_id, error = %e, "Failed to kill training process");
            }
            (RunStatus::Stopped, None)
        }
    };

    // Drain remaining output so the final events land before settling
    for task in [stdout_task, stderr_task].into_iter().flatten() {
        let _ = task.await;
    }

    if let Ok(mut state) = run.state.lock() {
        state.finish(status, exit_code, Utc::now());
    }
    tracing::info!(run_id = %run.run_id, status = ?status, ?exit_code, "Training run finished");
    run.broadcast(WsOutgoing::TrainingFinished {
        run_id: run.run_id,
        status,
        exit_code,
    });
}
