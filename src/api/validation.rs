use std::collections::HashSet;
use thiserror::Error;

use super::models::CreateBoxRequest;
use crate::model::Field;

const MAX_NAME_LEN: usize = 128;
const MAX_DESCRIPTION_LEN: usize = 4096;
const MAX_FIELDS: usize = 64;

#[derive(Debug, Error)]
pub enum BoxValidationError {
    #[error("name must be between 1 and {MAX_NAME_LEN} characters")]
    InvalidName,
    #[error("description exceeds {MAX_DESCRIPTION_LEN} characters")]
    DescriptionTooLong,
    #[error("archive_id must not be empty")]
    MissingArchive,
    #[error("{0} must contain at most {MAX_FIELDS} fields")]
    TooManyFields(&'static str),
    #[error("{schema} field '{name}' is declared more than once")]
    DuplicateField { schema: &'static str, name: String },
    #[error("{schema} field '{name}' exceeds {MAX_NAME_LEN} characters")]
    FieldNameTooLong { schema: &'static str, name: String },
}

pub fn validate_box(request: &CreateBoxRequest) -> Result<(), BoxValidationError> {
    let name = request.name.trim();
    if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
        return Err(BoxValidationError::InvalidName);
    }

    if request
        .description
        .as_ref()
        .is_some_and(|d| d.chars().count() > MAX_DESCRIPTION_LEN)
    {
        return Err(BoxValidationError::DescriptionTooLong);
    }

    if request.archive_id.trim().is_empty() {
        return Err(BoxValidationError::MissingArchive);
    }

    validate_schema("inputs", &request.inputs)?;
    validate_schema("outputs", &request.outputs)?;
    Ok(())
}

/// Fields are positional, but names label them in results and must not
/// collide.
fn validate_schema(schema: &'static str, fields: &[Field]) -> Result<(), BoxValidationError> {
    if fields.len() > MAX_FIELDS {
        return Err(BoxValidationError::TooManyFields(schema));
    }

    let mut seen = HashSet::new();
    for field in fields {
        if field.name().chars().count() > MAX_NAME_LEN {
            return Err(BoxValidationError::FieldNameTooLong {
                schema,
                name: field.name().to_string(),
            });
        }
        if !seen.insert(field.name()) {
            return Err(BoxValidationError::DuplicateField {
                schema,
                name: field.name().to_string(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ValueType, Visibility};

    fn sample_request() -> CreateBoxRequest {
        CreateBoxRequest {
            archive_id: "archive-1".to_string(),
            name: "sum".to_string(),
            description: None,
            visibility: Visibility::Public,
            inputs: vec![
                Field::new("A", ValueType::Integer).unwrap(),
                Field::new("B", ValueType::Integer).unwrap(),
            ],
            outputs: vec![Field::new("Sum", ValueType::Integer).unwrap()],
        }
    }

    #[test]
    fn validate_box_accepts_valid_payload() {
        assert!(validate_box(&sample_request()).is_ok());
    }

    #[test]
    fn validate_box_rejects_blank_name() {
        let mut request = sample_request();
        request.name = "   ".to_string();

        let err = validate_box(&request).unwrap_err();
        assert!(matches!(err, BoxValidationError::InvalidName));
    }

    #[test]
    fn validate_box_rejects_duplicate_fields() {
        let mut request = sample_request();
        request.inputs.push(Field::new("A", ValueType::Real).unwrap());

        let err = validate_box(&request).unwrap_err();
        assert!(matches!(
            err,
            BoxValidationError::DuplicateField { schema: "inputs", .. }
        ));
    }

    #[test]
    fn validate_box_limits_field_count() {
        let mut request = sample_request();
        request.outputs = (0..=MAX_FIELDS)
            .map(|i| Field::new(format!("out{i}"), ValueType::String).unwrap())
            .collect();

        let err = validate_box(&request).unwrap_err();
        assert!(matches!(err, BoxValidationError::TooManyFields("outputs")));
    }
}
