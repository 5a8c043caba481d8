use super::models::Config;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("Invalid image prefix '{prefix}': must be non-empty lowercase [a-z0-9._/-]")]
    InvalidImagePrefix { prefix: String },

    #[error(
        "reconcile.stuck_after_secs ({stuck_after}) must exceed build plus run timeout ({budget})"
    )]
    SweepTooEager { stuck_after: u64, budget: u64 },
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_limits(config)?;
    validate_dispatch(config)?;
    validate_runner(config)?;
    validate_reconcile(config)?;
    Ok(())
}

fn non_zero(field: &'static str, value: u64) -> Result<(), ValidationError> {
    if value == 0 {
        return Err(ValidationError::Zero { field });
    }
    Ok(())
}

fn validate_limits(config: &Config) -> Result<(), ValidationError> {
    let api = &config.server.api;
    non_zero("server.api.max_payload_bytes", api.max_payload_bytes.as_u64())?;
    non_zero("server.api.max_archive_bytes", api.max_archive_bytes.as_u64())?;
    Ok(())
}

fn validate_dispatch(config: &Config) -> Result<(), ValidationError> {
    let dispatch = &config.dispatch;
    non_zero("dispatch.max_inflight_jobs", dispatch.max_inflight_jobs as u64)?;
    non_zero("dispatch.channel_size", dispatch.channel_size as u64)?;
    non_zero(
        "dispatch.max_delivery_attempts",
        u64::from(dispatch.max_delivery_attempts),
    )?;
    Ok(())
}

/// Image references must be lowercase; the prefix becomes the repository
/// part of `{prefix}/{blueprint_id}:latest`.
fn validate_runner(config: &Config) -> Result<(), ValidationError> {
    let runner = &config.runner;
    let prefix = &runner.image_prefix;
    let valid = !prefix.is_empty()
        && !prefix.starts_with(['/', '.', '-'])
        && !prefix.ends_with('/')
        && prefix.chars().all(|c| {
            c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '/' | '-')
        });
    if !valid {
        return Err(ValidationError::InvalidImagePrefix {
            prefix: prefix.clone(),
        });
    }

    non_zero("runner.build_timeout_secs", runner.build_timeout_secs)?;
    non_zero("runner.run_timeout_secs", runner.run_timeout_secs)?;
    non_zero("runner.memory_limit_mb", runner.memory_limit_mb)?;
    Ok(())
}

/// A sweep must never expire a job that may still be legitimately executing
fn validate_reconcile(config: &Config) -> Result<(), ValidationError> {
    let reconcile = &config.reconcile;
    if !reconcile.enabled {
        return Ok(());
    }

    non_zero("reconcile.interval_secs", reconcile.interval_secs)?;

    let budget = config
        .runner
        .build_timeout_secs
        .saturating_add(config.runner.run_timeout_secs);
    if reconcile.stuck_after_secs <= budget {
        return Err(ValidationError::SweepTooEager {
            stuck_after: reconcile.stuck_after_secs,
            budget,
        });
    }

    Ok(())
}
