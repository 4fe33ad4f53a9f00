//! Observation and order wire models.

use crate::Reference;
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn is_false(value: &bool) -> bool {
    !*value
}

/// A single clinical observation, possibly a group of member observations.
///
/// A fresh observation has no `uuid`. An edit of, or a void of, a persisted observation
/// carries the persisted `uuid`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Obs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concept: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obs_datetime: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_field_namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_field_path: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_members: Vec<Obs>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub voided: bool,
}

impl Obs {
    /// A retraction of the persisted observation `uuid`.
    pub fn voided(uuid: impl Into<String>) -> Self {
        Self {
            uuid: Some(uuid.into()),
            voided: true,
            ..Self::default()
        }
    }

    /// True for a well-formed void: flagged and carrying the retracted uuid.
    pub fn is_void(&self) -> bool {
        self.voided && self.uuid.is_some()
    }
}

/// A test order, either new or a void of a persisted order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub order_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concept: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orderer: Option<Reference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub care_setting: Option<Reference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encounter: Option<Reference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_order: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_reason: Option<String>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub voided: bool,
}
