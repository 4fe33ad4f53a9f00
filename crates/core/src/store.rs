//! Persistence collaborator.
//!
//! The core never talks to the backend itself. Hosts implement [`RecordStore`] over their
//! transport; [`RecordingStore`] is an in-memory implementation that records every call and
//! hands back fresh server identifiers.

use async_trait::async_trait;
use openmrs::{
    Attachment, Encounter, PatientIdentifier, PatientProgram, ProgramEnrollmentPayload, Reference,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("request was cancelled")]
    Cancelled,
    #[error("backend rejected the request: {0}")]
    Rejected(String),
    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// One file-bearing field to upload against a saved encounter.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentUpload {
    pub patient_uuid: String,
    pub field_id: String,
    /// The field's current value, whatever the file widget put there.
    pub value: Option<Value>,
    pub concept: Option<String>,
    pub timestamp: String,
    pub encounter_uuid: String,
}

/// The backend operations a submission needs.
///
/// Each call is an independent unit of work. Implementations should abandon the request and
/// return [`StoreError::Cancelled`] once `cancel` fires.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Save `encounter`, updating `existing_uuid` when given.
    async fn save_encounter(
        &self,
        cancel: &CancellationToken,
        encounter: &Encounter,
        existing_uuid: Option<&str>,
    ) -> StoreResult<Encounter>;

    async fn save_attachment(
        &self,
        upload: &AttachmentUpload,
        cancel: &CancellationToken,
    ) -> StoreResult<Attachment>;

    async fn save_patient_identifier(
        &self,
        identifier: &PatientIdentifier,
        patient_uuid: &str,
    ) -> StoreResult<PatientIdentifier>;

    /// Enroll, or update the enrollment named by `payload.uuid`.
    async fn save_program_enrollment(
        &self,
        payload: &ProgramEnrollmentPayload,
        cancel: &CancellationToken,
    ) -> StoreResult<PatientProgram>;
}

/// A call received by a [`RecordingStore`].
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "call", rename_all = "camelCase")]
pub enum StoreCall {
    #[serde(rename_all = "camelCase")]
    SaveEncounter {
        encounter: Encounter,
        existing_uuid: Option<String>,
    },
    SaveAttachment { upload: AttachmentUpload },
    #[serde(rename_all = "camelCase")]
    SavePatientIdentifier {
        identifier: PatientIdentifier,
        patient_uuid: String,
    },
    SaveProgramEnrollment { payload: ProgramEnrollmentPayload },
}

/// In-memory [`RecordStore`] that accepts everything.
#[derive(Debug, Default)]
pub struct RecordingStore {
    calls: Mutex<Vec<StoreCall>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls received so far, in arrival order.
    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().clone()
    }

    pub fn into_calls(self) -> Vec<StoreCall> {
        self.calls
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<StoreCall>> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, cancel: Option<&CancellationToken>, call: StoreCall) -> StoreResult<()> {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(StoreError::Cancelled);
        }
        self.lock().push(call);
        Ok(())
    }
}

fn fresh_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[async_trait]
impl RecordStore for RecordingStore {
    async fn save_encounter(
        &self,
        cancel: &CancellationToken,
        encounter: &Encounter,
        existing_uuid: Option<&str>,
    ) -> StoreResult<Encounter> {
        self.record(
            Some(cancel),
            StoreCall::SaveEncounter {
                encounter: encounter.clone(),
                existing_uuid: existing_uuid.map(str::to_string),
            },
        )?;

        let mut saved = encounter.clone();
        saved.uuid = Some(existing_uuid.map_or_else(fresh_uuid, str::to_string));
        for obs in &mut saved.obs {
            if obs.uuid.is_none() {
                obs.uuid = Some(fresh_uuid());
            }
        }
        Ok(saved)
    }

    async fn save_attachment(
        &self,
        upload: &AttachmentUpload,
        cancel: &CancellationToken,
    ) -> StoreResult<Attachment> {
        self.record(
            Some(cancel),
            StoreCall::SaveAttachment {
                upload: upload.clone(),
            },
        )?;

        Ok(Attachment {
            uuid: fresh_uuid(),
            bytes_mime_type: None,
            file_caption: Some(upload.field_id.clone()),
        })
    }

    async fn save_patient_identifier(
        &self,
        identifier: &PatientIdentifier,
        patient_uuid: &str,
    ) -> StoreResult<PatientIdentifier> {
        self.record(
            None,
            StoreCall::SavePatientIdentifier {
                identifier: identifier.clone(),
                patient_uuid: patient_uuid.to_string(),
            },
        )?;

        let mut saved = identifier.clone();
        if saved.uuid.is_none() {
            saved.uuid = Some(fresh_uuid());
        }
        Ok(saved)
    }

    async fn save_program_enrollment(
        &self,
        payload: &ProgramEnrollmentPayload,
        cancel: &CancellationToken,
    ) -> StoreResult<PatientProgram> {
        self.record(
            Some(cancel),
            StoreCall::SaveProgramEnrollment {
                payload: payload.clone(),
            },
        )?;

        let program = payload
            .program
            .as_deref()
            .ok_or_else(|| StoreError::Rejected("enrollment payload names no program".into()))?;

        // A payload with a uuid closes out the enrollment it names.
        let date_completed = payload
            .uuid
            .as_ref()
            .and_then(|_| payload.states.first())
            .and_then(|state| state.end_date.clone());

        Ok(PatientProgram {
            uuid: payload.uuid.clone().unwrap_or_else(fresh_uuid),
            program: Reference::new(program),
            date_enrolled: payload.date_enrolled.clone(),
            date_completed,
            location: payload.location.as_deref().map(Reference::new),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openmrs::ProgramState;

    #[tokio::test]
    async fn recording_store_assigns_identifiers_and_records_in_order() {
        let store = RecordingStore::new();
        let cancel = CancellationToken::new();

        let saved = store
            .save_encounter(&cancel, &Encounter::default(), None)
            .await
            .unwrap();
        assert!(saved.uuid.is_some());

        let updated = store
            .save_encounter(&cancel, &Encounter::default(), Some("enc-1"))
            .await
            .unwrap();
        assert_eq!(updated.uuid.as_deref(), Some("enc-1"));

        let calls = store.calls();
        assert_eq!(calls.len(), 2);
        assert!(matches!(
            &calls[1],
            StoreCall::SaveEncounter { existing_uuid: Some(uuid), .. } if uuid == "enc-1"
        ));
    }

    #[tokio::test]
    async fn cancelled_calls_are_not_recorded() {
        let store = RecordingStore::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = store
            .save_program_enrollment(&ProgramEnrollmentPayload::default(), &cancel)
            .await
            .expect_err("cancelled");
        assert!(matches!(err, StoreError::Cancelled));
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn close_out_payload_completes_the_enrollment() {
        let store = RecordingStore::new();
        let payload = ProgramEnrollmentPayload {
            uuid: Some("pp-1".into()),
            program: Some("P1".into()),
            states: vec![ProgramState {
                state: Reference::new("on-art"),
                start_date: None,
                end_date: Some("2024-07-15T12:00:00+00:00".into()),
            }],
            ..ProgramEnrollmentPayload::default()
        };

        let saved = store
            .save_program_enrollment(&payload, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(saved.uuid, "pp-1");
        assert!(!saved.is_active());
    }

    #[test]
    fn recorded_calls_serialize_with_call_tag() {
        let call = StoreCall::SavePatientIdentifier {
            identifier: PatientIdentifier {
                uuid: None,
                identifier: "MRN-1".into(),
                identifier_type: Reference::new("mrn"),
                location: None,
                preferred: true,
            },
            patient_uuid: "pat-1".into(),
        };
        let json = serde_json::to_value(&call).unwrap();
        assert_eq!(json["call"], "savePatientIdentifier");
        assert_eq!(json["patientUuid"], "pat-1");
    }
}
