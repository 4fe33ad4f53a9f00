//! Patient identifier assembly.

use crate::form::{FieldKind, FormField};
use openmrs::PatientIdentifier;

/// Collect the submitted identifiers of every `patientIdentifier` field.
///
/// Identifiers are always new submissions: voided values are not collected.
pub fn prepare_patient_identifiers(fields: &[FormField]) -> Vec<PatientIdentifier> {
    fields
        .iter()
        .filter_map(|field| match &field.kind {
            FieldKind::PatientIdentifier(submission) => submission.new_value.as_ref(),
            _ => None,
        })
        .flat_map(|identifiers| identifiers.iter().cloned())
        .collect()
}
