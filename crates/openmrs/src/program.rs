//! Patient identifier, program enrollment and attachment wire models.

use crate::{parse_with_path, OpenMrsResult, Reference};
use serde::{Deserialize, Serialize};

/// An identifier value submitted for a patient.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientIdentifier {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,

    pub identifier: String,

    pub identifier_type: Reference,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Reference>,

    #[serde(default)]
    pub preferred: bool,
}

/// A state within a program workflow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramState {
    pub state: Reference,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
}

/// The enrollment payload sent to the backend.
///
/// With a `uuid` it updates (closes out) an enrollment on record, without one it enrolls.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramEnrollmentPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,

    #[serde(default)]
    pub states: Vec<ProgramState>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_enrolled: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// An enrollment already on record for a patient.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientProgram {
    pub uuid: String,

    pub program: Reference,

    #[serde(default)]
    pub date_enrolled: Option<String>,

    #[serde(default)]
    pub date_completed: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Reference>,
}

impl PatientProgram {
    /// An enrollment is active until a completion date is recorded.
    pub fn is_active(&self) -> bool {
        self.date_completed.is_none()
    }

    pub fn program_uuid(&self) -> &str {
        self.program.uuid()
    }

    /// Parse a JSON array of enrollments as returned by the backend.
    pub fn parse_list(json_text: &str) -> OpenMrsResult<Vec<Self>> {
        parse_with_path(json_text, "PatientProgram list")
    }
}

/// A stored attachment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub uuid: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_mime_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_caption: Option<String>,
}
