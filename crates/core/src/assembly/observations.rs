//! Observation assembly.
//!
//! Walks the flat field list in order and collects the observations to submit:
//! - fresh and edited values from each field's pending submission
//! - voids for values the binding layer retracted
//! - voids ("tombstones") for every persisted value of a field the user's path now hides
//! - one group observation per observation group, holding its members' submissions
//!
//! A group's own `newValue` is never sent; only its `voidedValue` or its members are.
//!
//! Transient fields, file attachments and group members listed at the top level are skipped.

use crate::form::{FieldKind, FormField, ObsState, OneOrMany, Submission};
use openmrs::Obs;

/// What a field contributes to the observation list.
enum ObsAction<'a> {
    /// Hidden field with a persisted value: retract every persisted value.
    Tombstone(&'a OneOrMany<Obs>),
    Group {
        questions: &'a [FormField],
        state: &'a ObsState,
    },
    Single(&'a Submission<Obs>),
}

/// Assemble the observations to submit from `fields`.
///
/// The result follows field order, with group members in question order.
pub fn prepare_obs(fields: &[FormField], form_namespace: &str) -> Vec<Obs> {
    let mut obs_for_submission = Vec::new();

    for field in fields {
        let Some(action) = submittable_obs(field) else {
            continue;
        };
        match action {
            ObsAction::Tombstone(previous) => {
                let voids = previous
                    .iter()
                    .filter_map(|obs| tombstone(&field.id, obs))
                    .collect::<Vec<_>>();
                add_obs_to_list(&mut obs_for_submission, Some(voids));
            }
            ObsAction::Group { questions, state } => {
                if let Some(voided) = &state.submission.voided_value {
                    add_obs_to_list(&mut obs_for_submission, Some(mark_voided(&field.id, voided)));
                    continue;
                }
                match build_group(field, questions, state, form_namespace) {
                    Some(group) => obs_for_submission.push(group),
                    None => tracing::debug!(field = %field.id, "dropping empty observation group"),
                }
            }
            ObsAction::Single(submission) => {
                add_obs_to_list(&mut obs_for_submission, submission.new_value.clone());
                if let Some(voided) = &submission.voided_value {
                    add_obs_to_list(&mut obs_for_submission, Some(mark_voided(&field.id, voided)));
                }
            }
        }
    }

    obs_for_submission
}

fn submittable_obs(field: &FormField) -> Option<ObsAction<'_>> {
    if field.options.is_transient || field.is_file_attachment() || field.group_id.is_some() {
        return None;
    }

    let (state, questions) = match &field.kind {
        FieldKind::Obs(state) => (state, None),
        FieldKind::ObsGroup { questions, state } => (state, Some(questions.as_slice())),
        FieldKind::TestOrder(_)
        | FieldKind::PatientIdentifier(_)
        | FieldKind::ProgramState(_)
        | FieldKind::Other(_) => return None,
    };

    if field.is_hidden_in_form() {
        return state.previous_value.as_ref().map(ObsAction::Tombstone);
    }

    match questions {
        Some(questions) => Some(ObsAction::Group { questions, state }),
        None if state.submission.is_pending() => Some(ObsAction::Single(&state.submission)),
        None => None,
    }
}

/// Build the group observation, or `None` if it ends up with no members.
fn build_group(
    field: &FormField,
    questions: &[FormField],
    state: &ObsState,
    form_namespace: &str,
) -> Option<Obs> {
    let mut group = Obs {
        uuid: state
            .previous_value
            .as_ref()
            .and_then(OneOrMany::first)
            .and_then(|previous| previous.uuid.clone()),
        concept: field.options.concept.clone(),
        form_field_namespace: Some(form_namespace.to_string()),
        form_field_path: Some(format!("{form_namespace}-{}", field.id)),
        ..Obs::default()
    };

    for question in questions {
        let submission = match &question.kind {
            FieldKind::Obs(ObsState { submission, .. })
            | FieldKind::ObsGroup {
                state: ObsState { submission, .. },
                ..
            } => submission,
            FieldKind::TestOrder(_)
            | FieldKind::PatientIdentifier(_)
            | FieldKind::ProgramState(_)
            | FieldKind::Other(_) => continue,
        };
        if !submission.is_pending() {
            continue;
        }
        add_obs_to_list(&mut group.group_members, submission.new_value.clone());
        if let Some(voided) = &submission.voided_value {
            add_obs_to_list(&mut group.group_members, Some(mark_voided(&question.id, voided)));
        }
    }

    (!group.group_members.is_empty()).then_some(group)
}

/// Append a single observation or a list of them. Absent and empty are both no-ops.
fn add_obs_to_list<I>(obs_list: &mut Vec<Obs>, candidate: Option<I>)
where
    I: IntoIterator<Item = Obs>,
{
    if let Some(candidate) = candidate {
        obs_list.extend(candidate);
    }
}

/// Retract a persisted observation. Only its identity is sent.
fn tombstone(field_id: &str, previous: &Obs) -> Option<Obs> {
    match &previous.uuid {
        Some(uuid) => Some(Obs::voided(uuid.clone())),
        None => {
            tracing::debug!(field = %field_id, "previous value has no uuid, nothing to void");
            None
        }
    }
}

/// Flag the binding layer's voided values as voids, dropping any without an identity.
fn mark_voided(field_id: &str, voided: &OneOrMany<Obs>) -> Vec<Obs> {
    voided
        .iter()
        .filter_map(|obs| {
            if obs.uuid.is_none() {
                tracing::debug!(field = %field_id, "voided value has no uuid, skipping");
                return None;
            }
            Some(Obs {
                voided: true,
                ..obs.clone()
            })
        })
        .collect()
}
