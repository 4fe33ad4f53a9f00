//! Program enrollment assembly and reconciliation.
//!
//! The payload is built from the `programState` fields and the field flagged as the program
//! completion date. What happens to it depends on the session mode and on whether the patient
//! already has an active enrollment in the program:
//!
//! | mode  | active enrollment | plan |
//! |-------|-------------------|------|
//! | enter | yes               | error, the patient is already enrolled |
//! | enter | no                | enroll |
//! | edit  | yes               | close out the active enrollment, then enroll anew |
//! | edit  | no                | enroll |
//! | view  | any               | skip |
//!
//! The transition is two separate saves with no transaction between them. See
//! [`crate::submission::SubmissionService::commit_program_enrollment`] for how a failure of the
//! second save is surfaced.

use crate::config::CoreConfig;
use crate::context::SessionMode;
use crate::error::{CoreError, CoreResult};
use crate::form::{FieldKind, FormField};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use openmrs::{PatientProgram, ProgramEnrollmentPayload};
use serde::Serialize;
use serde_json::Value;

/// What committing an enrollment payload should do.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum EnrollmentPlan {
    /// Nothing to persist.
    Skip,
    /// Persist the payload as a new enrollment.
    Enroll { payload: ProgramEnrollmentPayload },
    /// Persist `close_out` against the active enrollment, then `new_enrollment`.
    #[serde(rename_all = "camelCase")]
    Transition {
        close_out: ProgramEnrollmentPayload,
        new_enrollment: ProgramEnrollmentPayload,
    },
}

/// Build the enrollment payload from the program state fields.
///
/// `dateEnrolled` is the completion date field's value in canonical form. It is `now` when no
/// field is flagged or the flagged field is empty, and absent when the value is not a date.
pub fn prepare_program_enrollment(
    fields: &[FormField],
    patient: Option<&str>,
    program: Option<&str>,
    location: Option<&str>,
    now: DateTime<Utc>,
    cfg: &CoreConfig,
) -> ProgramEnrollmentPayload {
    let states = fields
        .iter()
        .filter_map(|field| match &field.kind {
            FieldKind::ProgramState(submission) => submission.new_value.as_ref(),
            _ => None,
        })
        .flat_map(|states| states.iter().cloned())
        .collect();

    let completion = fields
        .iter()
        .find(|field| field.options.is_program_completion)
        .and_then(|field| field.value.as_ref().map(|value| (field, value)));

    let date_enrolled = match completion {
        None => Some(cfg.canonical_datetime(&now)),
        Some((field, value)) => {
            let parsed = canonical_date(value, cfg);
            if parsed.is_none() {
                tracing::warn!(
                    field = %field.id,
                    %value,
                    "completion date is not a date, ignoring"
                );
            }
            parsed
        }
    };

    ProgramEnrollmentPayload {
        uuid: None,
        patient: patient.map(str::to_string),
        program: program.map(str::to_string),
        states,
        date_enrolled,
        location: location.map(str::to_string),
    }
}

/// Decide how to commit `payload`.
///
/// `now` stands in for the completion date when the payload has none.
///
/// # Errors
///
/// - [`CoreError::AlreadyEnrolled`] when entering a form for a patient already actively
///   enrolled in the program
/// - [`CoreError::MultipleActiveEnrollments`] when `existing` holds more than one active
///   enrollment in the program
pub fn plan_program_enrollment(
    payload: &ProgramEnrollmentPayload,
    mode: SessionMode,
    existing: &[PatientProgram],
    now: DateTime<Utc>,
    cfg: &CoreConfig,
) -> CoreResult<EnrollmentPlan> {
    let Some(program) = payload.program.as_deref() else {
        tracing::debug!("enrollment payload names no program, nothing to enroll");
        return Ok(EnrollmentPlan::Skip);
    };
    if mode.is_read_only() {
        return Ok(EnrollmentPlan::Skip);
    }

    let plan = match (mode, active_enrollment(existing, program)?) {
        (SessionMode::View | SessionMode::EmbeddedView, _) => EnrollmentPlan::Skip,
        (SessionMode::Enter, Some(_)) => {
            return Err(CoreError::AlreadyEnrolled {
                program: program.to_string(),
            })
        }
        (SessionMode::Edit, Some(active)) => transition(payload, active, now, cfg),
        (SessionMode::Enter | SessionMode::Edit, None) => EnrollmentPlan::Enroll {
            payload: payload.clone(),
        },
    };

    Ok(plan)
}

/// All of the patient's enrollments in `program`, active or not.
pub fn enrollments_for_program<'a>(
    existing: &'a [PatientProgram],
    program: &str,
) -> Vec<&'a PatientProgram> {
    existing
        .iter()
        .filter(|enrollment| enrollment.program_uuid() == program)
        .collect()
}

fn active_enrollment<'a>(
    existing: &'a [PatientProgram],
    program: &str,
) -> CoreResult<Option<&'a PatientProgram>> {
    let active: Vec<_> = enrollments_for_program(existing, program)
        .into_iter()
        .filter(|enrollment| enrollment.is_active())
        .collect();

    match active.as_slice() {
        [] => Ok(None),
        [only] => Ok(Some(*only)),
        many => Err(CoreError::MultipleActiveEnrollments {
            program: program.to_string(),
            count: many.len(),
        }),
    }
}

fn transition(
    payload: &ProgramEnrollmentPayload,
    active: &PatientProgram,
    now: DateTime<Utc>,
    cfg: &CoreConfig,
) -> EnrollmentPlan {
    let completion_date = payload
        .date_enrolled
        .clone()
        .unwrap_or_else(|| cfg.canonical_datetime(&now));

    let mut close_out = payload.clone();
    close_out.uuid = Some(active.uuid.clone());
    if close_out.date_enrolled.is_none() {
        close_out.date_enrolled = active.date_enrolled.clone();
    }
    // Only the first state is closed.
    if let Some(first) = close_out.states.first_mut() {
        first.end_date = Some(completion_date.clone());
    }

    let mut new_enrollment = payload.clone();
    new_enrollment.uuid = None;
    new_enrollment.date_enrolled = Some(completion_date.clone());
    for state in &mut new_enrollment.states {
        state.end_date = None;
        if state.start_date.is_none() {
            state.start_date = Some(completion_date.clone());
        }
    }

    tracing::info!(
        enrollment = %active.uuid,
        program = %active.program_uuid(),
        "planning enrollment transition"
    );

    EnrollmentPlan::Transition {
        close_out,
        new_enrollment,
    }
}

/// Normalise a completion date value to the canonical date-time form.
///
/// Accepts RFC 3339 date-times, local date-times (`2024-03-01T10:00[:00]`) and plain dates;
/// local values are read in the configured offset.
fn canonical_date(value: &Value, cfg: &CoreConfig) -> Option<String> {
    let text = value.as_str()?.trim();

    if let Ok(instant) = DateTime::parse_from_rfc3339(text) {
        return Some(cfg.canonical_datetime(&instant));
    }

    let local = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })?;

    cfg.utc_offset()
        .from_local_datetime(&local)
        .single()
        .map(|instant| cfg.canonical_datetime(&instant))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::FormFields;
    use chrono::FixedOffset;
    use openmrs::{ProgramState, Reference};
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 15, 12, 0, 0).unwrap()
    }

    fn payload(date_enrolled: Option<&str>) -> ProgramEnrollmentPayload {
        ProgramEnrollmentPayload {
            uuid: None,
            patient: Some("pat-1".into()),
            program: Some("P1".into()),
            states: vec![
                ProgramState {
                    state: Reference::new("transferred-in"),
                    start_date: None,
                    end_date: None,
                },
                ProgramState {
                    state: Reference::new("on-art"),
                    start_date: None,
                    end_date: None,
                },
            ],
            date_enrolled: date_enrolled.map(str::to_string),
            location: Some("loc-1".into()),
        }
    }

    fn enrollment(uuid: &str, program: &str, completed: Option<&str>) -> PatientProgram {
        PatientProgram {
            uuid: uuid.into(),
            program: Reference::new(program),
            date_enrolled: Some("2023-01-10T00:00:00+00:00".into()),
            date_completed: completed.map(str::to_string),
            location: None,
        }
    }

    #[test]
    fn builds_payload_from_state_and_completion_fields() {
        let cfg = CoreConfig::new(
            "rfe-forms".into(),
            FixedOffset::east_opt(3 * 3600).unwrap(),
            None,
        )
        .unwrap();
        let fields = FormFields::from_value(json!([
            {
                "id": "hivState",
                "type": "programState",
                "meta": {"submission": {"newValue": {"state": "on-art"}}}
            },
            {
                "id": "completedOn",
                "type": "obs",
                "value": "2024-03-01",
                "questionOptions": {"isProgramCompletion": true}
            }
        ]))
        .unwrap();

        let payload = prepare_program_enrollment(
            &fields,
            Some("pat-1"),
            Some("P1"),
            Some("loc-1"),
            now(),
            &cfg,
        );

        assert_eq!(payload.states.len(), 1);
        assert_eq!(payload.states[0].state.uuid(), "on-art");
        assert_eq!(payload.date_enrolled.as_deref(), Some("2024-03-01T00:00:00+03:00"));
        assert_eq!(payload.location.as_deref(), Some("loc-1"));
        assert!(payload.uuid.is_none());
    }

    #[test]
    fn completion_date_formats_normalise() {
        let cfg = CoreConfig::default();
        let cases = [
            ("2024-03-01T10:30:00.000+02:00", "2024-03-01T08:30:00+00:00"),
            ("2024-03-01T10:30", "2024-03-01T10:30:00+00:00"),
            ("2024-03-01", "2024-03-01T00:00:00+00:00"),
        ];
        for (input, expected) in cases {
            assert_eq!(canonical_date(&json!(input), &cfg).as_deref(), Some(expected));
        }
        assert_eq!(canonical_date(&json!("next tuesday"), &cfg), None);
        assert_eq!(canonical_date(&json!(20240301), &cfg), None);
    }

    #[test]
    fn missing_completion_field_enrolls_as_of_now() {
        let fields = FormFields::from_value(json!([
            {
                "id": "hivState",
                "type": "programState",
                "meta": {"submission": {"newValue": {"state": "on-art"}}}
            },
            {"id": "completedOn", "type": "obs", "questionOptions": {"isProgramCompletion": true}}
        ]))
        .unwrap();
        let cfg = CoreConfig::default();

        let payload =
            prepare_program_enrollment(&fields, Some("pat-1"), Some("P1"), None, now(), &cfg);
        assert_eq!(payload.date_enrolled.as_deref(), Some("2024-07-15T12:00:00+00:00"));

        let plan = plan_program_enrollment(&payload, SessionMode::Enter, &[], now(), &cfg).unwrap();
        match plan {
            EnrollmentPlan::Enroll { payload } => {
                assert_eq!(payload.date_enrolled.as_deref(), Some("2024-07-15T12:00:00+00:00"));
            }
            other => panic!("expected an enrollment, got {other:?}"),
        }
    }

    #[test]
    fn unparseable_completion_date_leaves_date_absent() {
        let fields = FormFields::from_value(json!([{
            "id": "completedOn",
            "type": "obs",
            "value": "next tuesday",
            "questionOptions": {"isProgramCompletion": true}
        }]))
        .unwrap();

        let payload = prepare_program_enrollment(
            &fields,
            Some("pat-1"),
            Some("P1"),
            None,
            now(),
            &CoreConfig::default(),
        );
        assert!(payload.date_enrolled.is_none());
        assert!(payload.states.is_empty());
    }

    #[test]
    fn no_program_is_a_no_op() {
        let mut payload = payload(None);
        payload.program = None;
        let existing = [enrollment("pp-1", "P1", None)];

        for mode in [SessionMode::Enter, SessionMode::Edit] {
            let plan =
                plan_program_enrollment(&payload, mode, &existing, now(), &CoreConfig::default())
                    .unwrap();
            assert_eq!(plan, EnrollmentPlan::Skip);
        }
    }

    #[test]
    fn enter_with_active_enrollment_fails() {
        let existing = [enrollment("pp-1", "P1", None)];
        let err = plan_program_enrollment(
            &payload(None),
            SessionMode::Enter,
            &existing,
            now(),
            &CoreConfig::default(),
        )
        .expect_err("already enrolled");
        assert!(matches!(err, CoreError::AlreadyEnrolled { program } if program == "P1"));
    }

    #[test]
    fn enter_or_edit_without_active_enrollment_enrolls() {
        let existing = [
            enrollment("pp-1", "P1", Some("2023-12-01")),
            enrollment("pp-2", "P2", None),
        ];
        for mode in [SessionMode::Enter, SessionMode::Edit] {
            let plan = plan_program_enrollment(
                &payload(None),
                mode,
                &existing,
                now(),
                &CoreConfig::default(),
            )
            .unwrap();
            assert_eq!(plan, EnrollmentPlan::Enroll { payload: payload(None) });
        }
    }

    #[test]
    fn view_modes_skip_even_when_enrolled() {
        let existing = [enrollment("pp-1", "P1", None)];
        for mode in [SessionMode::View, SessionMode::EmbeddedView] {
            let plan = plan_program_enrollment(
                &payload(None),
                mode,
                &existing,
                now(),
                &CoreConfig::default(),
            )
            .unwrap();
            assert_eq!(plan, EnrollmentPlan::Skip);
        }
    }

    #[test]
    fn view_modes_skip_without_checking_enrollments() {
        let existing = [enrollment("pp-1", "P1", None), enrollment("pp-2", "P1", None)];
        for mode in [SessionMode::View, SessionMode::EmbeddedView] {
            let plan = plan_program_enrollment(
                &payload(None),
                mode,
                &existing,
                now(),
                &CoreConfig::default(),
            )
            .unwrap();
            assert_eq!(plan, EnrollmentPlan::Skip);
        }
    }

    #[test]
    fn edit_with_active_enrollment_plans_close_out_then_new() {
        let existing = [enrollment("pp-1", "P1", None)];
        let plan = plan_program_enrollment(
            &payload(None),
            SessionMode::Edit,
            &existing,
            now(),
            &CoreConfig::default(),
        )
        .unwrap();

        let EnrollmentPlan::Transition {
            close_out,
            new_enrollment,
        } = plan
        else {
            panic!("expected a transition, got {plan:?}");
        };

        assert_eq!(close_out.uuid.as_deref(), Some("pp-1"));
        assert_eq!(close_out.date_enrolled.as_deref(), Some("2023-01-10T00:00:00+00:00"));
        assert_eq!(
            close_out.states[0].end_date.as_deref(),
            Some("2024-07-15T12:00:00+00:00")
        );
        assert_eq!(close_out.states[1].end_date, None);

        assert!(new_enrollment.uuid.is_none());
        assert_eq!(
            new_enrollment.date_enrolled.as_deref(),
            Some("2024-07-15T12:00:00+00:00")
        );
        assert!(new_enrollment.states.iter().all(|s| s.end_date.is_none()));
        assert_eq!(
            new_enrollment.states[0].start_date.as_deref(),
            Some("2024-07-15T12:00:00+00:00")
        );
    }

    #[test]
    fn transition_uses_completion_date_when_present() {
        let existing = [enrollment("pp-1", "P1", None)];
        let plan = plan_program_enrollment(
            &payload(Some("2024-06-30T00:00:00+00:00")),
            SessionMode::Edit,
            &existing,
            now(),
            &CoreConfig::default(),
        )
        .unwrap();

        match plan {
            EnrollmentPlan::Transition { close_out, .. } => {
                assert_eq!(close_out.date_enrolled.as_deref(), Some("2024-06-30T00:00:00+00:00"));
                assert_eq!(
                    close_out.states[0].end_date.as_deref(),
                    Some("2024-06-30T00:00:00+00:00")
                );
            }
            other => panic!("expected a transition, got {other:?}"),
        }
    }

    #[test]
    fn multiple_active_enrollments_violate_precondition() {
        let existing = [enrollment("pp-1", "P1", None), enrollment("pp-2", "P1", None)];
        let err = plan_program_enrollment(
            &payload(None),
            SessionMode::Edit,
            &existing,
            now(),
            &CoreConfig::default(),
        )
        .expect_err("two active enrollments");
        assert!(matches!(err, CoreError::MultipleActiveEnrollments { count: 2, .. }));
    }

    #[test]
    fn enrollments_for_program_keeps_history() {
        let existing = [
            enrollment("pp-1", "P1", Some("2022-01-01")),
            enrollment("pp-2", "P2", None),
            enrollment("pp-3", "P1", None),
        ];
        let uuids: Vec<_> = enrollments_for_program(&existing, "P1")
            .iter()
            .map(|e| e.uuid.as_str())
            .collect();
        assert_eq!(uuids, vec!["pp-1", "pp-3"]);
    }
}
