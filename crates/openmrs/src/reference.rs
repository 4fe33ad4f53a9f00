//! Resource references.
//!
//! The backend is inconsistent about references: freshly built payloads send a bare uuid
//! string, while resources fetched from the server carry `{ "uuid": ..., "display": ... }`.
//! [`Reference`] accepts both and always renders the bare uuid.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A reference to another backend resource, identified by its uuid.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Reference {
    pub uuid: String,
    pub display: Option<String>,
}

impl Reference {
    pub fn new(uuid: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            display: None,
        }
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }
}

impl From<&str> for Reference {
    fn from(uuid: &str) -> Self {
        Self::new(uuid)
    }
}

impl From<String> for Reference {
    fn from(uuid: String) -> Self {
        Self::new(uuid)
    }
}

impl Serialize for Reference {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.uuid)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ReferenceWire {
    Bare(String),
    Object {
        uuid: String,
        #[serde(default)]
        display: Option<String>,
    },
}

impl<'de> Deserialize<'de> for Reference {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match ReferenceWire::deserialize(deserializer)? {
            ReferenceWire::Bare(uuid) => Ok(Reference::new(uuid)),
            ReferenceWire::Object { uuid, display } => Ok(Reference { uuid, display }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_bare_and_object_forms() {
        let bare: Reference = serde_json::from_str(r#""loc-1""#).unwrap();
        let object: Reference =
            serde_json::from_str(r#"{"uuid":"loc-1","display":"Outpatient"}"#).unwrap();

        assert_eq!(bare.uuid(), "loc-1");
        assert_eq!(object.uuid(), "loc-1");
        assert_eq!(object.display.as_deref(), Some("Outpatient"));
    }

    #[test]
    fn renders_bare_uuid() {
        let reference = Reference {
            uuid: "visit-9".into(),
            display: Some("Facility Visit".into()),
        };
        assert_eq!(serde_json::to_string(&reference).unwrap(), r#""visit-9""#);
    }
}
