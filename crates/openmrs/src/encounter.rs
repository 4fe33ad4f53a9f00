//! Encounter wire model and translation helpers.
//!
//! The same [`Encounter`] shape is used for the payload the core builds and for an encounter
//! already on record that an edit session starts from.

use crate::{parse_with_path, Obs, OpenMrsResult, Order, Reference};
use serde::{Deserialize, Serialize};

/// One provider entry on an encounter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncounterProvider {
    pub provider: Reference,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encounter_role: Option<Reference>,
}

/// An encounter with its observations and orders.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Encounter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient: Option<Reference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encounter_datetime: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Reference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encounter_type: Option<Reference>,

    #[serde(default)]
    pub encounter_providers: Vec<EncounterProvider>,

    #[serde(default)]
    pub obs: Vec<Obs>,

    #[serde(default)]
    pub orders: Vec<Order>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form: Option<Reference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visit: Option<Reference>,
}

impl Encounter {
    /// Parse an encounter from JSON text.
    ///
    /// Schema mismatches are reported with the failing path
    /// (e.g. `encounterProviders[0].provider`).
    ///
    /// # Errors
    ///
    /// Returns [`crate::OpenMrsError::Translation`] if the JSON does not match the encounter shape.
    pub fn parse(json_text: &str) -> OpenMrsResult<Self> {
        parse_with_path(json_text, "Encounter")
    }

    /// Render the encounter as pretty JSON.
    pub fn render(&self) -> OpenMrsResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// True if some provider entry references `provider_uuid`.
    pub fn has_provider(&self, provider_uuid: &str) -> bool {
        self.encounter_providers
            .iter()
            .any(|entry| entry.provider.uuid() == provider_uuid)
    }

    /// The patient uuid, if the encounter references a patient.
    pub fn patient_uuid(&self) -> Option<&str> {
        self.patient.as_ref().map(Reference::uuid)
    }
}
