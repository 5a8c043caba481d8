//! Job entity and its state machine.
//!
//! `Pending → Running → Finished`. Timestamps and the result live inside the
//! lifecycle variant that owns them, so a job can never carry a result while
//! unfinished or a start time while pending.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{JobError, OutputParseError};
use super::value::{Field, Value};

/// Coarse job state, used for filtering and error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Finished,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Finished => "finished",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(JobState::Pending),
            "running" => Ok(JobState::Running),
            "finished" => Ok(JobState::Finished),
            other => Err(format!("unknown job state: {other}")),
        }
    }
}

/// Outcome of one execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum JobResult {
    /// Program exited 0; output parsed positionally against the output schema.
    Success { output: Vec<Value> },
    /// Non-zero exit status, with the combined output stream as message.
    Failure { code: i64, message: String },
}

impl JobResult {
    pub fn is_success(&self) -> bool {
        matches!(self, JobResult::Success { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
enum Lifecycle {
    Pending,
    Running {
        started_at: DateTime<Utc>,
    },
    Finished {
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        result: JobResult,
    },
}

/// One execution attempt of a blueprint against concrete input values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    id: String,
    blueprint_id: String,
    archive_id: String,
    owner_id: String,
    input: Vec<Value>,
    output_schema: Vec<Field>,
    created_at: DateTime<Utc>,
    lifecycle: Lifecycle,
}

impl Job {
    /// Fresh pending job. Input has already been validated by the blueprint.
    pub(super) fn pending(
        blueprint_id: String,
        archive_id: String,
        owner_id: String,
        input: Vec<Value>,
        output_schema: Vec<Field>,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            blueprint_id,
            archive_id,
            owner_id,
            input,
            output_schema,
            created_at: Utc::now(),
            lifecycle: Lifecycle::Pending,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn blueprint_id(&self) -> &str {
        &self.blueprint_id
    }

    pub fn archive_id(&self) -> &str {
        &self.archive_id
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn input(&self) -> &[Value] {
        &self.input
    }

    pub fn output_schema(&self) -> &[Field] {
        &self.output_schema
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> JobState {
        match self.lifecycle {
            Lifecycle::Pending => JobState::Pending,
            Lifecycle::Running { .. } => JobState::Running,
            Lifecycle::Finished { .. } => JobState::Finished,
        }
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        match self.lifecycle {
            Lifecycle::Pending => None,
            Lifecycle::Running { started_at } | Lifecycle::Finished { started_at, .. } => {
                Some(started_at)
            }
        }
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        match self.lifecycle {
            Lifecycle::Finished { finished_at, .. } => Some(finished_at),
            _ => None,
        }
    }

    pub fn result(&self) -> Option<&JobResult> {
        match &self.lifecycle {
            Lifecycle::Finished { result, .. } => Some(result),
            _ => None,
        }
    }

    /// `Pending → Running`.
    pub fn run(&mut self) -> Result<(), JobError> {
        match self.lifecycle {
            Lifecycle::Pending => {
                self.lifecycle = Lifecycle::Running {
                    started_at: Utc::now(),
                };
                Ok(())
            }
            _ => Err(JobError::InvalidStateChange {
                action: "run",
                actual: self.state(),
                expected: JobState::Pending,
            }),
        }
    }

    /// `Running → Finished`.
    ///
    /// Exit status 0 parses `output` line by line against the output schema;
    /// anything else records a failure carrying the whole output verbatim.
    /// On error the job is left untouched.
    pub fn finish(&mut self, exit_status: i64, output: &str) -> Result<(), JobError> {
        let started_at = match self.lifecycle {
            Lifecycle::Running { started_at } => started_at,
            _ => {
                return Err(JobError::InvalidStateChange {
                    action: "finish",
                    actual: self.state(),
                    expected: JobState::Running,
                });
            }
        };

        let result = if exit_status == 0 {
            JobResult::Success {
                output: self.parse_output(output)?,
            }
        } else {
            JobResult::Failure {
                code: exit_status,
                message: output.to_string(),
            }
        };

        self.lifecycle = Lifecycle::Finished {
            started_at,
            finished_at: Utc::now(),
            result,
        };
        Ok(())
    }

    fn parse_output(&self, output: &str) -> Result<Vec<Value>, OutputParseError> {
        let lines: Vec<&str> = output.lines().collect();
        if lines.len() != self.output_schema.len() {
            return Err(OutputParseError::LineCount {
                expected: self.output_schema.len(),
                actual: lines.len(),
            });
        }

        lines
            .into_iter()
            .zip(&self.output_schema)
            .enumerate()
            .map(|(idx, (line, field))| {
                field
                    .parse(line)
                    .map_err(|source| OutputParseError::Line {
                        line: idx + 1,
                        source,
                    })
            })
            .collect()
    }
}
