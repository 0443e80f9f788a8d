//! Derivative actions: static catalog and raw identifier parsing.

pub mod catalog;
pub mod parse;

pub use catalog::{BuiltPayload, CatalogEntry, OccupiedIndexes, PayloadSkip, build_payload};
pub use parse::{DEFAULT_RULES, ParseRules, Rule};

use crate::error::MappingError;
use crate::jobs::JobType;

/// Translate raw identifiers, dropping the ones that map to no type.
pub fn translate<S: AsRef<str>>(raw_ids: &[S]) -> Result<Vec<JobType>, MappingError> {
    let mut actions = Vec::with_capacity(raw_ids.len());
    for raw in raw_ids {
        if let Some(job_type) = JobType::from_raw_identifier(raw.as_ref())? {
            actions.push(job_type);
        }
    }
    Ok(actions)
}
