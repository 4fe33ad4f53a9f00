//! Submission dispatch.
//!
//! [`SubmissionService`] ties assembly to a [`RecordStore`]. Assembly stays synchronous; only
//! the store calls are awaited. Every call checks the caller's cancellation token before it
//! is issued.

use crate::assembly::{self, EnrollmentPlan};
use crate::clock::{Clock, SystemClock};
use crate::config::CoreConfig;
use crate::context::{EncounterContext, EncounterSettings, SessionMode};
use crate::error::{CoreError, CoreResult};
use crate::form::{attachment_fields, FormField};
use crate::store::{AttachmentUpload, RecordStore, StoreError};
use futures::future::join_all;
use openmrs::{
    Attachment, Encounter, PatientIdentifier, PatientProgram, ProgramEnrollmentPayload, Reference,
};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What committing an enrollment did.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum EnrollmentOutcome {
    Skipped,
    Enrolled {
        enrollment: PatientProgram,
    },
    #[serde(rename_all = "camelCase")]
    Transitioned {
        closed_out: PatientProgram,
        enrollment: PatientProgram,
    },
}

/// Result of uploading one file-bearing field.
#[derive(Debug)]
pub struct AttachmentResult {
    pub field_id: String,
    pub result: CoreResult<Attachment>,
}

// ============================================================================
// SUBMISSION SERVICE
// ============================================================================

/// Assembles payloads and hands them to a [`RecordStore`].
pub struct SubmissionService<S> {
    cfg: Arc<CoreConfig>,
    store: S,
    clock: Arc<dyn Clock>,
}

impl<S: RecordStore> SubmissionService<S> {
    pub fn new(cfg: Arc<CoreConfig>, store: S) -> Self {
        Self {
            cfg,
            store,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock used for attachment timestamps and close-out dates.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &CoreConfig {
        &self.cfg
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    // ------------------------------------------------------------------------
    // Assembly
    // ------------------------------------------------------------------------

    pub fn prepare_encounter(
        &self,
        fields: &[FormField],
        context: &EncounterContext,
        settings: &EncounterSettings,
    ) -> Encounter {
        assembly::prepare_encounter(fields, context, settings, &self.cfg)
    }

    pub fn prepare_patient_identifiers(&self, fields: &[FormField]) -> Vec<PatientIdentifier> {
        assembly::prepare_patient_identifiers(fields)
    }

    /// Build the enrollment payload for the patient, program and location in `context`.
    pub fn prepare_program_enrollment(
        &self,
        fields: &[FormField],
        context: &EncounterContext,
    ) -> ProgramEnrollmentPayload {
        assembly::prepare_program_enrollment(
            fields,
            context.patient.as_ref().map(Reference::uuid),
            context.program_uuid.as_deref(),
            context.location.as_ref().map(Reference::uuid),
            self.clock.now(),
            &self.cfg,
        )
    }

    // ------------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------------

    /// Save `encounter`, updating it in place when it already has a uuid.
    pub async fn save_encounter(
        &self,
        encounter: &Encounter,
        cancel: &CancellationToken,
    ) -> CoreResult<Encounter> {
        ensure_live(cancel).map_err(CoreError::Store)?;

        let existing_uuid = encounter.uuid.as_deref();
        tracing::info!(
            encounter = existing_uuid.unwrap_or("new"),
            obs = encounter.obs.len(),
            orders = encounter.orders.len(),
            "saving encounter"
        );

        self.store
            .save_encounter(cancel, encounter, existing_uuid)
            .await
            .map_err(CoreError::Store)
    }

    /// Upload every file-bearing field against the saved `encounter`.
    ///
    /// Uploads run concurrently and fail independently; results come back in field order.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidInput`] if `encounter` has no uuid or no patient, which
    /// means it has not been saved yet.
    pub async fn save_attachments(
        &self,
        fields: &[FormField],
        encounter: &Encounter,
        cancel: &CancellationToken,
    ) -> CoreResult<Vec<AttachmentResult>> {
        let encounter_uuid = encounter.uuid.as_deref().ok_or_else(|| {
            CoreError::InvalidInput("attachments need a saved encounter".into())
        })?;
        let patient_uuid = encounter.patient_uuid().ok_or_else(|| {
            CoreError::InvalidInput("attachments need the encounter's patient".into())
        })?;
        let timestamp = self.cfg.canonical_datetime(&self.clock.now());

        let uploads = attachment_fields(fields).into_iter().map(|field| AttachmentUpload {
            patient_uuid: patient_uuid.to_string(),
            field_id: field.id.clone(),
            value: field.value.clone(),
            concept: field.options.concept.clone(),
            timestamp: timestamp.clone(),
            encounter_uuid: encounter_uuid.to_string(),
        });

        let results = join_all(uploads.map(|upload| async move {
            let result = match ensure_live(cancel) {
                Ok(()) => self.store.save_attachment(&upload, cancel).await,
                Err(err) => Err(err),
            };
            if let Err(err) = &result {
                tracing::warn!(field = %upload.field_id, error = %err, "attachment upload failed");
            }
            AttachmentResult {
                field_id: upload.field_id,
                result: result.map_err(CoreError::Store),
            }
        }))
        .await;

        Ok(results)
    }

    /// Save each identifier separately; results come back in input order.
    pub async fn save_patient_identifiers(
        &self,
        identifiers: &[PatientIdentifier],
        patient_uuid: &str,
        cancel: &CancellationToken,
    ) -> Vec<CoreResult<PatientIdentifier>> {
        join_all(identifiers.iter().map(|identifier| async move {
            ensure_live(cancel).map_err(CoreError::Store)?;
            self.store
                .save_patient_identifier(identifier, patient_uuid)
                .await
                .map_err(|err| {
                    tracing::warn!(
                        identifier_type = %identifier.identifier_type.uuid(),
                        error = %err,
                        "identifier save failed"
                    );
                    CoreError::Store(err)
                })
        }))
        .await
    }

    /// Enroll the patient, or in edit mode move them from their active enrollment to a new
    /// one.
    ///
    /// View modes return [`EnrollmentOutcome::Skipped`] without looking at `existing`.
    ///
    /// # Errors
    ///
    /// Besides the plan's precondition errors:
    /// - [`CoreError::Store`] when a plain enrollment fails
    /// - [`CoreError::EnrollmentCloseOut`] when closing out the active enrollment fails, in
    ///   which case nothing was persisted
    /// - [`CoreError::PartialEnrollmentTransition`] when the close-out was saved but the new
    ///   enrollment was not; the close-out is not rolled back
    pub async fn commit_program_enrollment(
        &self,
        payload: &ProgramEnrollmentPayload,
        mode: SessionMode,
        existing: &[PatientProgram],
        cancel: &CancellationToken,
    ) -> CoreResult<EnrollmentOutcome> {
        if mode.is_read_only() {
            return Ok(EnrollmentOutcome::Skipped);
        }

        let plan = assembly::plan_program_enrollment(
            payload,
            mode,
            existing,
            self.clock.now(),
            &self.cfg,
        )?;

        match plan {
            EnrollmentPlan::Skip => Ok(EnrollmentOutcome::Skipped),
            EnrollmentPlan::Enroll { payload } => {
                ensure_live(cancel).map_err(CoreError::Store)?;
                let enrollment = self
                    .store
                    .save_program_enrollment(&payload, cancel)
                    .await
                    .map_err(CoreError::Store)?;
                tracing::info!(enrollment = %enrollment.uuid, "patient enrolled");
                Ok(EnrollmentOutcome::Enrolled { enrollment })
            }
            EnrollmentPlan::Transition {
                close_out,
                new_enrollment,
            } => {
                ensure_live(cancel).map_err(CoreError::EnrollmentCloseOut)?;
                let closed_out = self
                    .store
                    .save_program_enrollment(&close_out, cancel)
                    .await
                    .map_err(CoreError::EnrollmentCloseOut)?;

                let enrolled = match ensure_live(cancel) {
                    Ok(()) => self.store.save_program_enrollment(&new_enrollment, cancel).await,
                    Err(err) => Err(err),
                };

                match enrolled {
                    Ok(enrollment) => {
                        tracing::info!(
                            closed_out = %closed_out.uuid,
                            enrollment = %enrollment.uuid,
                            "enrollment transitioned"
                        );
                        Ok(EnrollmentOutcome::Transitioned {
                            closed_out,
                            enrollment,
                        })
                    }
                    Err(source) => {
                        tracing::warn!(
                            closed_out = %closed_out.uuid,
                            error = %source,
                            "enrollment closed out but new enrollment not saved"
                        );
                        Err(CoreError::PartialEnrollmentTransition {
                            closed_out: Box::new(closed_out),
                            source,
                        })
                    }
                }
            }
        }
    }
}

fn ensure_live(cancel: &CancellationToken) -> Result<(), StoreError> {
    if cancel.is_cancelled() {
        Err(StoreError::Cancelled)
    } else {
        Ok(())
    }
}
