//! # Backend Descriptors
//!
//! The self-description a backend publishes at `/ws/info/`, normalized so the
//! user interface always finds every display field populated.
//!
//! Defaults use the JSON shapes existing UI clients already receive:
//! `center` coordinates and `visible` are strings, zoom levels are numbers.
//!
//! Default filling is strictly per field: a backend that only sends `zoom`
//! keeps its `zoom` and receives defaults for everything else. A field that is
//! present, even as `null`, is never overwritten. Fields the relay does not
//! know about are carried through untouched.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use url::Url;

/// # Backend Info
///
/// The display metadata of one backend, serialized verbatim as the body of
/// `add`/`remove` messages and as an element of the listing endpoint.
///
/// The display fields are kept as raw JSON values: backends are independently
/// deployed and the relay forwards what they say rather than reinterpreting
/// it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendInfo {
    /// Stable identity reported by the backend itself.
    pub id: String,
    /// Initial map center, `{"latitude": .., "longitude": ..}`.
    #[serde(default = "default_center")]
    pub center: Value,
    /// Initial zoom level.
    #[serde(default = "default_zoom")]
    pub zoom: Value,
    /// Maximum zoom level.
    #[serde(rename = "maxZoom", default = "default_zoom")]
    pub max_zoom: Value,
    /// Layer type, `cluster` unless stated otherwise.
    #[serde(rename = "type", default = "default_type")]
    pub kind: Value,
    /// Whether the layer starts visible.
    #[serde(default = "default_visible")]
    pub visible: Value,
    /// Data scope.
    #[serde(default = "default_scope")]
    pub scope: Value,
    /// Any other fields the backend reported.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_center() -> Value {
    json!({ "latitude": "0.0", "longitude": "0.0" })
}

fn default_zoom() -> Value {
    json!(1)
}

fn default_type() -> Value {
    json!("cluster")
}

fn default_visible() -> Value {
    json!("true")
}

fn default_scope() -> Value {
    json!("all")
}

/// Why a `/ws/info/` body could not become a [`BackendInfo`].
#[derive(Debug, thiserror::Error)]
pub enum InfoError {
    /// The body is valid JSON but has no `id` field. Such backends are left
    /// out of the registry on purpose.
    #[error("backend info has no 'id' field")]
    MissingId,
    /// The body is not a JSON object, or `id` is not a string.
    #[error("backend info is malformed: {0}")]
    Malformed(String),
}

impl BackendInfo {
    /// Parses a raw `/ws/info/` body, applying the per-field defaults.
    pub fn from_slice(body: &[u8]) -> Result<Self, InfoError> {
        let value: Value =
            serde_json::from_slice(body).map_err(|e| InfoError::Malformed(e.to_string()))?;
        Self::from_value(value)
    }

    /// Builds an info from an already parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self, InfoError> {
        let object = match value {
            Value::Object(object) => object,
            other => {
                return Err(InfoError::Malformed(format!(
                    "expected a JSON object, got {}",
                    type_name(&other)
                )))
            }
        };

        match object.get("id") {
            None => return Err(InfoError::MissingId),
            Some(Value::String(_)) => {}
            Some(other) => {
                return Err(InfoError::Malformed(format!(
                    "'id' must be a string, got {}",
                    type_name(other)
                )))
            }
        }

        serde_json::from_value(Value::Object(object)).map_err(|e| InfoError::Malformed(e.to_string()))
    }

    /// The info as a JSON value, ready to be used as a message body.
    pub fn to_value(&self) -> Value {
        // Serializing a struct of `Value`s and a string map cannot fail.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// # Backend Descriptor
///
/// One discovered backend. Created fresh from a live fetch in each discovery
/// cycle and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendDescriptor {
    /// The backend's own id, also the registry key.
    pub id: String,
    /// The configured address/alias used to reach the backend (`host:port`).
    pub name: String,
    /// Root URL for follow-up requests (`http://host:port/`).
    pub base_url: Url,
    /// Normalized display metadata.
    pub info: BackendInfo,
}

impl BackendDescriptor {
    /// Assembles a descriptor; the id is taken from `info`.
    pub fn new(name: impl Into<String>, base_url: Url, info: BackendInfo) -> Self {
        Self {
            id: info.id.clone(),
            name: name.into(),
            base_url,
            info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_zoom_supplied_gets_every_other_default() {
        let info = BackendInfo::from_slice(br#"{"id":"a1","zoom":7}"#).unwrap();

        assert_eq!(info.id, "a1");
        assert_eq!(info.zoom, json!(7));
        assert_eq!(info.center, json!({"latitude": "0.0", "longitude": "0.0"}));
        assert_eq!(info.max_zoom, json!(1));
        assert_eq!(info.kind, json!("cluster"));
        assert_eq!(info.visible, json!("true"));
        assert_eq!(info.scope, json!("all"));
    }

    #[test]
    fn present_fields_are_never_overwritten() {
        let body = br#"{"id":"b1","center":{"latitude":"-33.8","longitude":"151.2"},
            "zoom":3,"maxZoom":12,"type":"heatmap","visible":false,"scope":"local"}"#;
        let info = BackendInfo::from_slice(body).unwrap();

        assert_eq!(info.center, json!({"latitude": "-33.8", "longitude": "151.2"}));
        assert_eq!(info.max_zoom, json!(12));
        assert_eq!(info.kind, json!("heatmap"));
        assert_eq!(info.visible, json!(false));
        assert_eq!(info.scope, json!("local"));
    }

    #[test]
    fn explicit_null_counts_as_present() {
        let info = BackendInfo::from_slice(br#"{"id":"c1","scope":null}"#).unwrap();
        assert_eq!(info.scope, Value::Null);
    }

    #[test]
    fn unknown_fields_survive_serialization() {
        let info = BackendInfo::from_slice(br#"{"id":"d1","title":"Rivers"}"#).unwrap();
        let value = info.to_value();

        assert_eq!(value["title"], json!("Rivers"));
        assert_eq!(value["maxZoom"], json!(1));
        assert_eq!(value["type"], json!("cluster"));
        assert!(value.get("max_zoom").is_none());
    }

    #[test]
    fn missing_id_is_its_own_outcome() {
        let err = BackendInfo::from_slice(br#"{"zoom":2}"#).unwrap_err();
        assert!(matches!(err, InfoError::MissingId));
    }

    #[test]
    fn non_object_or_bad_id_is_malformed() {
        assert!(matches!(
            BackendInfo::from_slice(b"[1,2]").unwrap_err(),
            InfoError::Malformed(_)
        ));
        assert!(matches!(
            BackendInfo::from_slice(br#"{"id":42}"#).unwrap_err(),
            InfoError::Malformed(_)
        ));
        assert!(matches!(
            BackendInfo::from_slice(b"not json").unwrap_err(),
            InfoError::Malformed(_)
        ));
    }

    #[test]
    fn descriptor_takes_id_from_info() {
        let info = BackendInfo::from_slice(br#"{"id":"e1"}"#).unwrap();
        let base = Url::parse("http://notebook:8080/").unwrap();
        let descriptor = BackendDescriptor::new("notebook:8080", base, info);
        assert_eq!(descriptor.id, "e1");
        assert_eq!(descriptor.name, "notebook:8080");
    }
}
