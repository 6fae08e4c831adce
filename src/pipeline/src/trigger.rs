//! Push-triggered pipeline runner.
//!
//! A push event for the designated branch drives one Build -> Push
//! sequence. Per target tag the trigger is a two-state machine (idle /
//! running), and runs mutating the same tag are serialized behind a keyed
//! async lock: at most one run moves a given tag at a time, while runs for
//! different tags proceed in parallel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::build::{BuildSpec, ImageBuilder};
use crate::error::{PipelineError, Result};
use crate::push::Pusher;

/// A code push as reported by the hosting platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushEvent {
    pub branch: String,
    pub commit: String,
    pub source_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerState {
    Idle,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Build,
    Push,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded {
        manifest_digest: String,
        build_tag: String,
    },
    Failed {
        stage: RunStage,
        error: String,
    },
    Skipped {
        reason: String,
    },
}

/// Terminal report for one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: Uuid,
    pub tag: String,
    pub commit: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
}

impl RunRecord {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, RunOutcome::Succeeded { .. })
    }
}

/// Static pipeline configuration: which branch triggers, what to build and
/// where to point the moving tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Only pushes to this branch run the pipeline
    pub branch: String,
    /// Moving tag the pipeline updates, e.g. "latest"
    pub moving_tag: String,
    pub image_name: String,
    pub base_image: String,
    pub exposed_port: u16,
    pub cmd: Vec<String>,
    #[serde(default)]
    pub env_keys: Vec<String>,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.branch.is_empty() {
            return Err(PipelineError::Trigger("branch is empty".to_string()));
        }
        if self.moving_tag.is_empty() {
            return Err(PipelineError::Trigger("moving tag is empty".to_string()));
        }
        if self.image_name.is_empty() {
            return Err(PipelineError::Trigger("image name is empty".to_string()));
        }
        if self.cmd.is_empty() {
            return Err(PipelineError::Trigger("launch command is empty".to_string()));
        }
        Ok(())
    }
}

pub struct PipelineTrigger {
    config: PipelineConfig,
    pusher: Pusher,
    /// Keyed mutual exclusion: one lock per target tag
    tag_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    states: Mutex<HashMap<String, TriggerState>>,
    history: Mutex<Vec<RunRecord>>,
}

impl PipelineTrigger {
    pub fn new(config: PipelineConfig, pusher: Pusher) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            pusher,
            tag_locks: Mutex::new(HashMap::new()),
            states: Mutex::new(HashMap::new()),
            history: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Handle one push event to completion and return its record. Events
    /// for other branches are recorded as skipped. Failures in either
    /// stage are terminal for the run; the trigger returns to idle and
    /// accepts the next event.
    pub async fn handle_push(&self, event: PushEvent) -> RunRecord {
        let tag = self.config.moving_tag.clone();

        if event.branch != self.config.branch {
            tracing::debug!(
                branch = %event.branch,
                designated = %self.config.branch,
                "[Pipeline] Ignoring push for non-designated branch"
            );
            let now = Utc::now();
            let record = RunRecord {
                id: Uuid::new_v4(),
                tag,
                commit: event.commit,
                started_at: now,
                finished_at: now,
                outcome: RunOutcome::Skipped {
                    reason: format!("branch {} is not designated", event.branch),
                },
            };
            self.history.lock().await.push(record.clone());
            return record;
        }

        let lock = self.tag_lock(&tag).await;
        let _guard = lock.lock().await;

        self.set_state(&tag, TriggerState::Running).await;
        let record = self.execute(&tag, event).await;
        self.set_state(&tag, TriggerState::Idle).await;

        self.history.lock().await.push(record.clone());
        record
    }

    async fn execute(&self, tag: &str, event: PushEvent) -> RunRecord {
        let id = Uuid::new_v4();
        let started_at = Utc::now();
        tracing::info!(
            run = %id,
            commit = %event.commit,
            tag = %tag,
            "[Pipeline] Run started"
        );

        let spec = BuildSpec {
            image_name: self.config.image_name.clone(),
            source_dir: event.source_dir.clone(),
            base_image: self.config.base_image.clone(),
            exposed_port: self.config.exposed_port,
            cmd: self.config.cmd.clone(),
            env_keys: self.config.env_keys.clone(),
        };

        let build_result = tokio::task::spawn_blocking(move || ImageBuilder::build(&spec)).await;
        let artifact = match build_result {
            Ok(Ok(artifact)) => artifact,
            Ok(Err(e)) => {
                tracing::error!(run = %id, "[Pipeline] Build failed: {}", e);
                return self.failed(id, tag, &event.commit, started_at, RunStage::Build, e);
            }
            Err(e) => {
                let e = PipelineError::Build(format!("build task panicked: {}", e));
                tracing::error!(run = %id, "[Pipeline] Build failed: {}", e);
                return self.failed(id, tag, &event.commit, started_at, RunStage::Build, e);
            }
        };

        let outcome = match self.pusher.push(&artifact, tag).await {
            Ok(push) => {
                tracing::info!(
                    run = %id,
                    digest = %push.manifest_digest,
                    build_tag = %push.build_tag,
                    "[Pipeline] Run succeeded"
                );
                RunOutcome::Succeeded {
                    manifest_digest: push.manifest_digest.to_string(),
                    build_tag: push.build_tag,
                }
            }
            Err(e) => {
                tracing::error!(run = %id, "[Pipeline] Push failed: {}", e);
                return self.failed(id, tag, &event.commit, started_at, RunStage::Push, e);
            }
        };

        RunRecord {
            id,
            tag: tag.to_string(),
            commit: event.commit,
            started_at,
            finished_at: Utc::now(),
            outcome,
        }
    }

    fn failed(
        &self,
        id: Uuid,
        tag: &str,
        commit: &str,
        started_at: DateTime<Utc>,
        stage: RunStage,
        error: PipelineError,
    ) -> RunRecord {
        RunRecord {
            id,
            tag: tag.to_string(),
            commit: commit.to_string(),
            started_at,
            finished_at: Utc::now(),
            outcome: RunOutcome::Failed {
                stage,
                error: error.to_string(),
            },
        }
    }

    async fn tag_lock(&self, tag: &str) -> Arc<Mutex<()>> {
        let mut locks = self.tag_locks.lock().await;
        locks
            .entry(tag.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn set_state(&self, tag: &str, state: TriggerState) {
        self.states.lock().await.insert(tag.to_string(), state);
    }

    /// Current state for a tag; a tag never seen is idle.
    pub async fn state(&self, tag: &str) -> TriggerState {
        self.states
            .lock()
            .await
            .get(tag)
            .copied()
            .unwrap_or(TriggerState::Idle)
    }

    /// All finished run records, oldest first.
    pub async fn history(&self) -> Vec<RunRecord> {
        self.history.lock().await.clone()
    }
}
