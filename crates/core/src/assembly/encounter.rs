//! Encounter assembly.
//!
//! Entering a form builds a fresh encounter. Editing starts from a copy of the encounter on
//! record: the location is overwritten, the submitting provider is added if missing, and the
//! observations and orders are replaced wholesale by the freshly assembled lists. The field
//! tree must therefore represent every observation that should survive the edit.

use super::{observations::prepare_obs, orders::prepare_orders};
use crate::config::CoreConfig;
use crate::context::{EncounterContext, EncounterSettings};
use crate::form::FormField;
use openmrs::{Encounter, EncounterProvider, Obs, Order, Reference};

/// Assemble the encounter payload for `fields`.
///
/// If `settings` names no encounter role, the configured default role is used.
pub fn prepare_encounter(
    fields: &[FormField],
    context: &EncounterContext,
    settings: &EncounterSettings,
    cfg: &CoreConfig,
) -> Encounter {
    let obs = prepare_obs(fields, cfg.form_namespace());
    let orders = prepare_orders(fields);

    let default_role = settings
        .encounter_role
        .is_none()
        .then(|| cfg.default_encounter_role().map(Reference::from))
        .flatten();
    let settings = match default_role {
        Some(role) => EncounterSettings {
            encounter_role: Some(role),
            ..settings.clone()
        },
        None => settings.clone(),
    };

    tracing::debug!(
        obs = obs.len(),
        orders = orders.len(),
        update = context.encounter.is_some(),
        "assembled encounter contents"
    );

    merge_encounter(obs, orders, context, &settings, cfg)
}

/// Merge assembled observations and orders into a new or existing encounter.
///
/// The encounter on record in `context` is copied, never modified.
pub fn merge_encounter(
    obs: Vec<Obs>,
    orders: Vec<Order>,
    context: &EncounterContext,
    settings: &EncounterSettings,
    cfg: &CoreConfig,
) -> Encounter {
    match &context.encounter {
        Some(existing) => {
            let mut encounter = existing.clone();
            encounter.location = context.location.clone();

            if let Some(provider) = context.encounter_provider.as_deref() {
                if !encounter.has_provider(provider) {
                    encounter
                        .encounter_providers
                        .push(provider_entry(provider, settings));
                    encounter.form = Some(Reference::new(settings.form_uuid.as_str()));
                    if let Some(visit) = &settings.visit {
                        encounter.visit = Some(visit.clone());
                    }
                }
            }

            encounter.obs = obs;
            encounter.orders = orders;
            encounter
        }
        None => Encounter {
            uuid: None,
            patient: context.patient.clone(),
            encounter_datetime: context
                .encounter_date
                .as_ref()
                .map(|date| cfg.canonical_datetime(date)),
            location: context.location.clone(),
            encounter_type: settings.encounter_type.clone(),
            encounter_providers: context
                .encounter_provider
                .as_deref()
                .map(|provider| provider_entry(provider, settings))
                .into_iter()
                .collect(),
            obs,
            orders,
            form: Some(Reference::new(settings.form_uuid.as_str())),
            visit: settings.visit.clone(),
        },
    }
}

fn provider_entry(provider: &str, settings: &EncounterSettings) -> EncounterProvider {
    EncounterProvider {
        provider: Reference::new(provider),
        encounter_role: settings.encounter_role.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::FormFields;
    use chrono::{DateTime, FixedOffset};
    use serde_json::json;

    fn fields() -> Vec<FormField> {
        FormFields::from_value(json!([
            {
                "id": "weight",
                "type": "obs",
                "meta": {"submission": {"newValue": {"concept": "5089", "value": 70}}}
            },
            {
                "id": "labs",
                "type": "testOrder",
                "meta": {"submission": {"newValue": {"action": "NEW", "concept": "cd4"}}}
            }
        ]))
        .unwrap()
    }

    fn settings() -> EncounterSettings {
        EncounterSettings {
            encounter_role: Some(Reference::new("clinician")),
            visit: Some(Reference::new("visit-1")),
            encounter_type: Some(Reference::new("adult-initial")),
            form_uuid: "form-1".into(),
        }
    }

    fn context(existing: Option<Encounter>) -> EncounterContext {
        EncounterContext {
            patient: Some(Reference::new("pat-1")),
            encounter: existing,
            encounter_date: Some(
                DateTime::<FixedOffset>::parse_from_rfc3339("2024-06-01T08:00:00+03:00").unwrap(),
            ),
            encounter_provider: Some("prov-2".into()),
            location: Some(Reference::new("loc-2")),
            ..EncounterContext::default()
        }
    }

    fn existing(provider: &str) -> Encounter {
        Encounter {
            uuid: Some("enc-1".into()),
            patient: Some(Reference::new("pat-1")),
            encounter_datetime: Some("2024-05-01T09:00:00.000+0000".into()),
            location: Some(Reference::new("loc-1")),
            encounter_type: Some(Reference::new("adult-initial")),
            encounter_providers: vec![EncounterProvider {
                provider: Reference::new(provider),
                encounter_role: Some(Reference::new("clinician")),
            }],
            obs: vec![Obs {
                uuid: Some("stale".into()),
                ..Obs::default()
            }],
            orders: vec![],
            form: Some(Reference::new("form-0")),
            visit: Some(Reference::new("visit-0")),
        }
    }

    #[test]
    fn create_builds_fresh_encounter() {
        let cfg = CoreConfig::default();
        let encounter = prepare_encounter(&fields(), &context(None), &settings(), &cfg);

        assert!(encounter.uuid.is_none());
        assert_eq!(encounter.patient_uuid(), Some("pat-1"));
        assert_eq!(encounter.encounter_datetime.as_deref(), Some("2024-06-01T05:00:00+00:00"));
        assert_eq!(encounter.location, Some(Reference::new("loc-2")));
        assert_eq!(encounter.encounter_providers.len(), 1);
        assert_eq!(encounter.encounter_providers[0].provider.uuid(), "prov-2");
        assert_eq!(encounter.obs.len(), 1);
        assert_eq!(encounter.orders.len(), 1);
        assert_eq!(encounter.form, Some(Reference::new("form-1")));
        assert_eq!(encounter.visit, Some(Reference::new("visit-1")));
    }

    #[test]
    fn update_appends_missing_provider_and_restamps_form_and_visit() {
        let cfg = CoreConfig::default();
        let on_record = existing("prov-1");
        let encounter =
            prepare_encounter(&fields(), &context(Some(on_record.clone())), &settings(), &cfg);

        let providers: Vec<_> = encounter
            .encounter_providers
            .iter()
            .map(|p| p.provider.uuid())
            .collect();
        assert_eq!(providers, vec!["prov-1", "prov-2"]);
        assert_eq!(encounter.uuid.as_deref(), Some("enc-1"));
        assert_eq!(encounter.location, Some(Reference::new("loc-2")));
        assert_eq!(encounter.form, Some(Reference::new("form-1")));
        assert_eq!(encounter.visit, Some(Reference::new("visit-1")));
        assert_eq!(encounter.encounter_datetime, on_record.encounter_datetime);

        // The caller's copy is untouched.
        assert_eq!(on_record.encounter_providers.len(), 1);
    }

    #[test]
    fn update_with_present_provider_leaves_references_alone() {
        let cfg = CoreConfig::default();
        let encounter = prepare_encounter(
            &fields(),
            &context(Some(existing("prov-2"))),
            &settings(),
            &cfg,
        );

        assert_eq!(encounter.encounter_providers.len(), 1);
        assert_eq!(encounter.form, Some(Reference::new("form-0")));
        assert_eq!(encounter.visit, Some(Reference::new("visit-0")));
        assert_eq!(encounter.location, Some(Reference::new("loc-2")));
    }

    #[test]
    fn update_replaces_obs_and_orders() {
        let cfg = CoreConfig::default();
        let encounter = prepare_encounter(
            &fields(),
            &context(Some(existing("prov-1"))),
            &settings(),
            &cfg,
        );

        assert_eq!(encounter.obs.len(), 1);
        assert!(encounter.obs[0].uuid.is_none());
        assert_eq!(encounter.orders[0].concept.as_deref(), Some("cd4"));
    }

    #[test]
    fn update_never_drops_providers() {
        let mut on_record = existing("prov-1");
        on_record.encounter_providers.push(EncounterProvider {
            provider: Reference::new("prov-3"),
            encounter_role: None,
        });

        for provider in ["prov-1", "prov-3", "prov-9"] {
            let mut ctx = context(Some(on_record.clone()));
            ctx.encounter_provider = Some(provider.into());
            let encounter =
                merge_encounter(vec![], vec![], &ctx, &settings(), &CoreConfig::default());

            for before in &on_record.encounter_providers {
                assert!(encounter.has_provider(before.provider.uuid()));
            }
            assert!(encounter.has_provider(provider));
            assert_eq!(
                encounter.encounter_providers[..2],
                on_record.encounter_providers[..]
            );
        }
    }

    #[test]
    fn default_role_comes_from_config() {
        let cfg = CoreConfig::new(
            "rfe-forms".into(),
            chrono::FixedOffset::east_opt(0).unwrap(),
            Some("default-role".into()),
        )
        .unwrap();
        let settings = EncounterSettings {
            encounter_role: None,
            ..settings()
        };

        let encounter = prepare_encounter(&fields(), &context(None), &settings, &cfg);
        assert_eq!(
            encounter.encounter_providers[0].encounter_role,
            Some(Reference::new("default-role"))
        );
    }

    #[test]
    fn missing_provider_is_passed_through_not_validated() {
        let mut ctx = context(None);
        ctx.encounter_provider = None;
        ctx.location = None;

        let encounter = merge_encounter(vec![], vec![], &ctx, &settings(), &CoreConfig::default());
        assert!(encounter.encounter_providers.is_empty());
        assert!(encounter.location.is_none());
    }
}
