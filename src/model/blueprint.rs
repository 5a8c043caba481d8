use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::InvalidInput;
use super::job::Job;
use super::value::{Field, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

/// An uploaded executable bundle: archive reference plus typed I/O schema.
///
/// Immutable after creation apart from soft deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blueprint {
    id: String,
    owner_id: String,
    archive_id: String,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    visibility: Visibility,
    input_schema: Vec<Field>,
    output_schema: Vec<Field>,
    created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    deleted_at: Option<DateTime<Utc>>,
}

#[bon::bon]
impl Blueprint {
    #[builder]
    pub fn new(
        #[builder(into)] owner_id: String,
        #[builder(into)] archive_id: String,
        #[builder(into)] name: String,
        #[builder(into)] description: Option<String>,
        visibility: Visibility,
        #[builder(default)] input_schema: Vec<Field>,
        #[builder(default)] output_schema: Vec<Field>,
    ) -> Result<Self, InvalidInput> {
        for (code, label, value) in [
            ("blueprint-empty-owner", "owner id", &owner_id),
            ("blueprint-empty-archive", "archive id", &archive_id),
            ("blueprint-empty-name", "name", &name),
        ] {
            if value.trim().is_empty() {
                return Err(InvalidInput::new(code, format!("{label} must not be empty")));
            }
        }

        Ok(Self {
            id: Uuid::now_v7().to_string(),
            owner_id,
            archive_id,
            name,
            description,
            visibility,
            input_schema,
            output_schema,
            created_at: Utc::now(),
            deleted_at: None,
        })
    }
}

impl Blueprint {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn archive_id(&self) -> &str {
        &self.archive_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    pub fn input_schema(&self) -> &[Field] {
        &self.input_schema
    }

    pub fn output_schema(&self) -> &[Field] {
        &self.output_schema
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn soft_delete(&mut self) {
        if self.deleted_at.is_none() {
            self.deleted_at = Some(Utc::now());
        }
    }

    pub fn is_available_for(&self, user_id: &str) -> bool {
        self.visibility == Visibility::Public || self.owner_id == user_id
    }

    /// Type raw positional text with the input schema.
    pub fn typed_input<S: AsRef<str>>(&self, raw: &[S]) -> Result<Vec<Value>, InvalidInput> {
        self.check_input_len(raw.len())?;

        raw.iter()
            .zip(&self.input_schema)
            .enumerate()
            .map(|(idx, (text, field))| {
                field.parse(text.as_ref()).map_err(|err| {
                    InvalidInput::new(
                        "assemble-value-parse-error",
                        format!("input {idx} ({}): {err}", field.name()),
                    )
                })
            })
            .collect()
    }

    /// Build a pending job for `requester_id`.
    ///
    /// The job gets its own copy of the output schema, so later changes to
    /// this blueprint never alter how the job's output is read.
    pub fn assemble_job(
        &self,
        requester_id: &str,
        input: Vec<Value>,
    ) -> Result<Job, InvalidInput> {
        self.check_input_len(input.len())?;

        for (idx, (value, field)) in input.iter().zip(&self.input_schema).enumerate() {
            field.validate(value).map_err(|err| {
                InvalidInput::new(
                    "assemble-value-validation-error",
                    format!("input {idx}: {}", err.message),
                )
            })?;
        }

        Ok(Job::pending(
            self.id.clone(),
            self.archive_id.clone(),
            requester_id.to_string(),
            input,
            self.output_schema.clone(),
        ))
    }

    fn check_input_len(&self, actual: usize) -> Result<(), InvalidInput> {
        let expected = self.input_schema.len();
        if actual != expected {
            return Err(InvalidInput::new(
                "assemble-values-mismatch",
                format!("expected {expected} input values, got {actual}"),
            ));
        }
        Ok(())
    }
}
