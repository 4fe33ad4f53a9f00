//! OpenMRS wire/boundary support for encounter form submission.
//!
//! This crate provides the **wire models** that the submission core produces and consumes when
//! talking to the OpenMRS REST backend:
//! - encounters with their observations, orders and providers
//! - patient identifiers
//! - program enrollments and the enrollments already on record
//!
//! This crate focuses on:
//! - the JSON shapes the backend accepts (camelCase keys, optional fields omitted)
//! - strict parsing with path-annotated errors for payloads handed in from outside
//!
//! It does NOT assemble payloads from form state. That lives in `encounter-submit-core`.

pub mod encounter;
pub mod obs;
pub mod program;
pub mod reference;

pub use encounter::{Encounter, EncounterProvider};
pub use obs::{Obs, Order};
pub use program::{
    Attachment, PatientIdentifier, PatientProgram, ProgramEnrollmentPayload, ProgramState,
};
pub use reference::Reference;

/// Errors returned by the `openmrs` boundary crate.
#[derive(Debug, thiserror::Error)]
pub enum OpenMrsError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("translation error: {0}")]
    Translation(String),
}

/// Type alias for Results that can fail with an [`OpenMrsError`].
pub type OpenMrsResult<T> = Result<T, OpenMrsError>;

/// Deserialize `json_text` into `T`, reporting the failing path on schema mismatch.
///
/// `what` names the resource in the error message (for example `"Encounter"`).
pub(crate) fn parse_with_path<T>(json_text: &str, what: &str) -> OpenMrsResult<T>
where
    T: serde::de::DeserializeOwned,
{
    let mut deserializer = serde_json::Deserializer::from_str(json_text);
    match serde_path_to_error::deserialize::<_, T>(&mut deserializer) {
        Ok(parsed) => Ok(parsed),
        Err(err) => {
            let path = err.path().to_string();
            let source = err.into_inner();
            let path = if path.is_empty() || path == "." {
                "<root>"
            } else {
                path.as_str()
            };
            Err(OpenMrsError::Translation(format!(
                "{what} schema mismatch at {path}: {source}"
            )))
        }
    }
}
