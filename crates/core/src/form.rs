//! Form field model.
//!
//! The external binding layer hands the core a flat JSON list of fields. Each field carries its
//! type name, visibility flags, question options and a `meta` block holding the pending
//! submission (`newValue` / `voidedValue`) and the value the field held when the session started
//! (`previousValue`).
//!
//! Responsibilities:
//! - Define the domain-level [`FormField`] whose [`FieldKind`] is a closed enum, so every
//!   assembler matches field types exhaustively
//! - Parse the loose wire shape into that model, typing each submission by its field type
//! - Normalise "absent", `null` and empty lists to the same absent value
//!
//! Notes:
//! - Group members live in [`FieldKind::ObsGroup`]'s `questions`. The flat list may also repeat
//!   them with a `groupId`; those copies are skipped by the observation assembler.

use crate::constants::{
    FILE_RENDERING, OBS_FIELD_TYPE, OBS_GROUP_FIELD_TYPE, PATIENT_IDENTIFIER_FIELD_TYPE,
    PROGRAM_STATE_FIELD_TYPE, TEST_ORDER_FIELD_TYPE,
};
use crate::error::{CoreError, CoreResult};
use openmrs::{Obs, Order, PatientIdentifier, ProgramState};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Public domain-level types
// ============================================================================

/// A single value or a list of values.
///
/// Multi-select fields submit lists, everything else submits a single value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    pub fn len(&self) -> usize {
        match self {
            OneOrMany::Many(values) => values.len(),
            OneOrMany::One(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        match self {
            OneOrMany::Many(values) => values.iter(),
            OneOrMany::One(value) => std::slice::from_ref(value).iter(),
        }
    }

    pub fn first(&self) -> Option<&T> {
        self.iter().next()
    }

    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(values) => values,
            OneOrMany::One(value) => vec![value],
        }
    }

    /// `None` for an empty list, so absent and empty compare equal downstream.
    fn non_empty(self) -> Option<Self> {
        if self.is_empty() {
            None
        } else {
            Some(self)
        }
    }
}

impl<T> IntoIterator for OneOrMany<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.into_vec().into_iter()
    }
}

impl<T> From<T> for OneOrMany<T> {
    fn from(value: T) -> Self {
        OneOrMany::One(value)
    }
}

/// The pending submission on a field, as set by the binding layer.
#[derive(Clone, Debug, PartialEq)]
pub struct Submission<T> {
    pub new_value: Option<OneOrMany<T>>,
    pub voided_value: Option<OneOrMany<T>>,
}

impl<T> Default for Submission<T> {
    fn default() -> Self {
        Self {
            new_value: None,
            voided_value: None,
        }
    }
}

impl<T> Submission<T> {
    pub fn new(new_value: Option<OneOrMany<T>>, voided_value: Option<OneOrMany<T>>) -> Self {
        Self {
            new_value: new_value.and_then(OneOrMany::non_empty),
            voided_value: voided_value.and_then(OneOrMany::non_empty),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.new_value.is_some() || self.voided_value.is_some()
    }
}

/// Observation state shared by plain and group observation fields.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObsState {
    pub submission: Submission<Obs>,
    /// The persisted value(s) the field held when the session started.
    pub previous_value: Option<OneOrMany<Obs>>,
}

/// Field type with the submission payload that type carries.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldKind {
    Obs(ObsState),
    ObsGroup {
        questions: Vec<FormField>,
        state: ObsState,
    },
    TestOrder(Submission<Order>),
    PatientIdentifier(Submission<PatientIdentifier>),
    ProgramState(Submission<ProgramState>),
    /// Any other field type. Its submission is not assembled by the core.
    Other(String),
}

impl FieldKind {
    pub fn type_name(&self) -> &str {
        match self {
            FieldKind::Obs(_) => OBS_FIELD_TYPE,
            FieldKind::ObsGroup { .. } => OBS_GROUP_FIELD_TYPE,
            FieldKind::TestOrder(_) => TEST_ORDER_FIELD_TYPE,
            FieldKind::PatientIdentifier(_) => PATIENT_IDENTIFIER_FIELD_TYPE,
            FieldKind::ProgramState(_) => PROGRAM_STATE_FIELD_TYPE,
            FieldKind::Other(name) => name.as_str(),
        }
    }
}

/// How a field is rendered. Only file attachments matter to submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rendering {
    File,
    Other(String),
}

impl Rendering {
    fn from_wire(name: String) -> Self {
        if name == FILE_RENDERING {
            Rendering::File
        } else {
            Rendering::Other(name)
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct QuestionOptions {
    pub rendering: Option<Rendering>,
    pub concept: Option<String>,
    pub is_transient: bool,
    /// Marks the field whose value is the program completion date.
    pub is_program_completion: bool,
}

/// A node of the form's field tree.
#[derive(Clone, Debug, PartialEq)]
pub struct FormField {
    pub id: String,
    pub kind: FieldKind,
    pub is_hidden: bool,
    pub is_parent_hidden: bool,
    /// Set when the field is a member of an observation group.
    pub group_id: Option<String>,
    /// The bound value (used for completion dates and attachments).
    pub value: Option<Value>,
    pub options: QuestionOptions,
}

impl FormField {
    /// Hidden directly or because an ancestor is hidden.
    pub fn is_hidden_in_form(&self) -> bool {
        self.is_hidden || self.is_parent_hidden
    }

    pub fn is_file_attachment(&self) -> bool {
        matches!(self.options.rendering, Some(Rendering::File))
    }

    /// True if the field carries a pending new or voided value.
    pub fn has_submission(&self) -> bool {
        match &self.kind {
            FieldKind::Obs(state) | FieldKind::ObsGroup { state, .. } => {
                state.submission.is_pending()
            }
            FieldKind::TestOrder(submission) => submission.is_pending(),
            FieldKind::PatientIdentifier(submission) => submission.is_pending(),
            FieldKind::ProgramState(submission) => submission.is_pending(),
            FieldKind::Other(_) => false,
        }
    }
}

/// Fields rendered as file attachments. These are saved one by one, never as observations.
pub fn attachment_fields(fields: &[FormField]) -> Vec<&FormField> {
    fields
        .iter()
        .filter(|field| field.is_file_attachment())
        .collect()
}

// ============================================================================
// Parsing
// ============================================================================

/// Form field list operations.
///
/// This is a zero-sized type used for namespacing parse operations.
pub struct FormFields;

impl FormFields {
    /// Parse a JSON array of fields.
    ///
    /// Schema mismatches are reported with the failing path (e.g. `[3].meta.submission`).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::FieldTree`] if the JSON does not match the field shape, and
    /// [`CoreError::InvalidField`] if a submission does not fit its field type.
    pub fn parse(json_text: &str) -> CoreResult<Vec<FormField>> {
        let mut deserializer = serde_json::Deserializer::from_str(json_text);
        let wire = path_checked(serde_path_to_error::deserialize::<_, Vec<FormFieldWire>>(
            &mut deserializer,
        ))?;
        wire.into_iter().map(wire_to_domain).collect()
    }

    /// Same as [`FormFields::parse`] for a JSON value already in memory.
    pub fn from_value(value: Value) -> CoreResult<Vec<FormField>> {
        let wire = path_checked(serde_path_to_error::deserialize::<_, Vec<FormFieldWire>>(
            value,
        ))?;
        wire.into_iter().map(wire_to_domain).collect()
    }
}

fn path_checked<T, E: std::fmt::Display>(
    result: Result<T, serde_path_to_error::Error<E>>,
) -> CoreResult<T> {
    result.map_err(|err| {
        let path = err.path().to_string();
        let source = err.into_inner();
        let path = if path.is_empty() || path == "." {
            "<root>"
        } else {
            path.as_str()
        };
        CoreError::FieldTree(format!("Form field schema mismatch at {path}: {source}"))
    })
}

// ============================================================================
// Wire types (internal)
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FormFieldWire {
    id: String,
    #[serde(rename = "type")]
    field_type: String,
    #[serde(default)]
    is_hidden: bool,
    #[serde(default)]
    is_parent_hidden: bool,
    #[serde(default)]
    group_id: Option<String>,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    question_options: QuestionOptionsWire,
    #[serde(default)]
    questions: Vec<FormFieldWire>,
    #[serde(default)]
    meta: MetaWire,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuestionOptionsWire {
    #[serde(default)]
    rendering: Option<String>,
    #[serde(default)]
    concept: Option<String>,
    #[serde(default)]
    is_transient: bool,
    #[serde(default)]
    is_program_completion: bool,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetaWire {
    #[serde(default)]
    submission: Option<SubmissionWire>,
    #[serde(default)]
    previous_value: Option<Value>,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmissionWire {
    #[serde(default)]
    new_value: Option<Value>,
    #[serde(default)]
    voided_value: Option<Value>,
}

// ============================================================================
// Helper functions (internal)
// ============================================================================

fn wire_to_domain(wire: FormFieldWire) -> CoreResult<FormField> {
    let FormFieldWire {
        id,
        field_type,
        is_hidden,
        is_parent_hidden,
        group_id,
        value,
        question_options,
        questions,
        meta,
    } = wire;
    let submission = meta.submission.unwrap_or_default();

    let kind = match field_type.as_str() {
        OBS_FIELD_TYPE => FieldKind::Obs(ObsState {
            submission: typed_submission(&id, submission)?,
            previous_value: typed_value(&id, "previousValue", meta.previous_value)?,
        }),
        OBS_GROUP_FIELD_TYPE => FieldKind::ObsGroup {
            questions: questions
                .into_iter()
                .map(wire_to_domain)
                .collect::<CoreResult<_>>()?,
            state: ObsState {
                submission: typed_submission(&id, submission)?,
                previous_value: typed_value(&id, "previousValue", meta.previous_value)?,
            },
        },
        TEST_ORDER_FIELD_TYPE => FieldKind::TestOrder(typed_submission(&id, submission)?),
        PATIENT_IDENTIFIER_FIELD_TYPE => {
            FieldKind::PatientIdentifier(typed_submission(&id, submission)?)
        }
        PROGRAM_STATE_FIELD_TYPE => FieldKind::ProgramState(typed_submission(&id, submission)?),
        _ => FieldKind::Other(field_type),
    };

    Ok(FormField {
        id,
        kind,
        is_hidden,
        is_parent_hidden,
        group_id,
        value: value.filter(|v| !v.is_null()),
        options: QuestionOptions {
            rendering: question_options.rendering.map(Rendering::from_wire),
            concept: question_options.concept,
            is_transient: question_options.is_transient,
            is_program_completion: question_options.is_program_completion,
        },
    })
}

fn typed_submission<T: DeserializeOwned>(
    field_id: &str,
    wire: SubmissionWire,
) -> CoreResult<Submission<T>> {
    Ok(Submission::new(
        typed_value(field_id, "newValue", wire.new_value)?,
        typed_value(field_id, "voidedValue", wire.voided_value)?,
    ))
}

fn typed_value<T: DeserializeOwned>(
    field_id: &str,
    slot: &str,
    value: Option<Value>,
) -> CoreResult<Option<OneOrMany<T>>> {
    let value = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(value) => value,
    };
    let parsed: OneOrMany<T> =
        serde_json::from_value(value).map_err(|e| CoreError::InvalidField {
            field_id: field_id.to_string(),
            reason: format!("{slot} does not match the field type: {e}"),
        })?;
    Ok(parsed.non_empty())
}
