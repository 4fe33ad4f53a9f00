//! Encounter context and session mode.
//!
//! The context is assembled by the host application from the patient chart and the form
//! session. The core reads it, it never validates it.

use chrono::{DateTime, FixedOffset};
use openmrs::{Encounter, Reference};
use serde::{Deserialize, Serialize};

/// The operating mode of a form session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionMode {
    /// A new encounter is being entered.
    #[default]
    #[serde(alias = "create")]
    Enter,
    /// An encounter on record is being edited.
    Edit,
    View,
    EmbeddedView,
}

impl SessionMode {
    pub fn is_read_only(self) -> bool {
        matches!(self, SessionMode::View | SessionMode::EmbeddedView)
    }
}

/// Everything about the encounter that does not come from the field tree.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncounterContext {
    #[serde(default)]
    pub patient: Option<Reference>,

    /// The encounter on record when editing, `None` when entering a new one.
    #[serde(default)]
    pub encounter: Option<Encounter>,

    #[serde(default)]
    pub encounter_date: Option<DateTime<FixedOffset>>,

    /// Uuid of the provider submitting the form.
    #[serde(default)]
    pub encounter_provider: Option<String>,

    #[serde(default)]
    pub location: Option<Reference>,

    #[serde(default)]
    pub session_mode: SessionMode,

    #[serde(default)]
    pub program_uuid: Option<String>,
}

/// Form-level settings of the encounter being built.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncounterSettings {
    #[serde(default)]
    pub encounter_role: Option<Reference>,

    #[serde(default)]
    pub visit: Option<Reference>,

    #[serde(default)]
    pub encounter_type: Option<Reference>,

    pub form_uuid: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn session_mode_accepts_create_alias() {
        let enter: SessionMode = serde_json::from_value(json!("enter")).unwrap();
        let create: SessionMode = serde_json::from_value(json!("create")).unwrap();
        let embedded: SessionMode = serde_json::from_value(json!("embedded-view")).unwrap();

        assert_eq!(enter, SessionMode::Enter);
        assert_eq!(create, SessionMode::Enter);
        assert!(embedded.is_read_only());
        assert!(!SessionMode::Edit.is_read_only());
    }

    #[test]
    fn context_parses_from_host_json() {
        let context: EncounterContext = serde_json::from_value(json!({
            "patient": "pat-1",
            "encounterDate": "2024-06-01T08:00:00+03:00",
            "encounterProvider": "prov-1",
            "location": {"uuid": "loc-1", "display": "Outpatient"},
            "sessionMode": "edit",
            "programUuid": "hiv"
        }))
        .unwrap();

        assert_eq!(context.session_mode, SessionMode::Edit);
        assert!(context.encounter.is_none());
        assert_eq!(context.location.unwrap().uuid(), "loc-1");
    }
}
