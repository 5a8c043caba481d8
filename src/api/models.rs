//! Request and response bodies of the operator HTTP surface.
//!
//! Creating a box (blueprint) is a JSON submission:
//!
//! ```json
//! {
//!   "archive_id": "0192f0c4-...",
//!   "name": "sum",
//!   "description": "adds two integers",
//!   "visibility": "public",
//!   "inputs": [
//!     {"name": "A", "type": "integer"},
//!     {"name": "B", "type": "integer"}
//!   ],
//!   "outputs": [{"name": "Sum", "type": "integer", "unit": "apples"}]
//! }
//! ```
//!
//! Running it takes positional input, strings or JSON numbers:
//!
//! ```json
//! {"input": ["1", 2]}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::model::{Blueprint, Field, Job, JobResult, JobState, Value, Visibility};

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ArchiveUploadedResponse {
    pub archive_id: String,
    pub size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateBoxRequest {
    pub archive_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_visibility")]
    pub visibility: Visibility,
    #[serde(default)]
    pub inputs: Vec<Field>,
    #[serde(default)]
    pub outputs: Vec<Field>,
}

fn default_visibility() -> Visibility {
    Visibility::Private
}

/// Blueprint as shown to callers
#[derive(Debug, Serialize, Deserialize)]
pub struct BoxView {
    pub id: String,
    pub owner_id: String,
    pub archive_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub visibility: Visibility,
    pub inputs: Vec<Field>,
    pub outputs: Vec<Field>,
    pub created_at: DateTime<Utc>,
}

impl From<&Blueprint> for BoxView {
    fn from(blueprint: &Blueprint) -> Self {
        Self {
            id: blueprint.id().to_string(),
            owner_id: blueprint.owner_id().to_string(),
            archive_id: blueprint.archive_id().to_string(),
            name: blueprint.name().to_string(),
            description: blueprint.description().map(str::to_string),
            visibility: blueprint.visibility(),
            inputs: blueprint.input_schema().to_vec(),
            outputs: blueprint.output_schema().to_vec(),
            created_at: blueprint.created_at(),
        }
    }
}

/// One positional input; numbers are taken by their JSON text
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawInput {
    Text(String),
    Number(serde_json::Number),
}

impl RawInput {
    pub fn into_text(self) -> String {
        match self {
            RawInput::Text(text) => text,
            RawInput::Number(number) => number.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitJobRequest {
    pub input: Vec<RawInput>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobAcceptedResponse {
    pub job_id: String,
    pub state: JobState,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobView {
    pub id: String,
    pub box_id: String,
    pub owner_id: String,
    pub state: JobState,
    pub input: Vec<Value>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
}

impl From<&Job> for JobView {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id().to_string(),
            box_id: job.blueprint_id().to_string(),
            owner_id: job.owner_id().to_string(),
            state: job.state(),
            input: job.input().to_vec(),
            created_at: job.created_at(),
            started_at: job.started_at(),
            finished_at: job.finished_at(),
            result: job.result().cloned(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct JobListQuery {
    #[serde(default)]
    pub state: Option<JobState>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: HashMap<String, String>,
    pub version: String,
}
