//! Decode targets for stream records.

use serde::{Deserialize, Deserializer, Serialize, Serializer, de::DeserializeOwned, de::Error as _};
use serde_json::{Map, Value};

/// Name of the field every record uses to say what kind of event it is.
pub const DISCRIMINANT_FIELD: &str = "type";

/// A decoded stream record.
///
/// Implement this for the schema you want the decoder to produce. Decoding
/// goes through `serde`, so a type that fails to deserialize a record causes
/// a per-record decode error rather than a corrupt event.
pub trait Event: DeserializeOwned + Send + 'static {
    /// The discriminant a consumer dispatches on.
    fn kind(&self) -> &str;
}

/// Schema-less event: the discriminant plus the untouched JSON object.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    kind: String,
    payload: Map<String, Value>,
}

impl RawEvent {
    /// Build an event from a JSON object.
    ///
    /// Returns `None` if the object has no string discriminant.
    #[must_use]
    pub fn from_object(payload: Map<String, Value>) -> Option<Self> {
        let kind = payload.get(DISCRIMINANT_FIELD)?.as_str()?.to_owned();
        Some(Self { kind, payload })
    }

    /// The whole record, discriminant included.
    #[must_use]
    pub const fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    #[must_use]
    pub fn into_payload(self) -> Map<String, Value> {
        self.payload
    }

    /// Look up a top-level field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.payload.get(field)
    }

    /// Re-decode the record into a typed shape.
    ///
    /// # Errors
    /// Returns error if the payload does not match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(Value::Object(self.payload.clone()))
    }
}

impl Event for RawEvent {
    fn kind(&self) -> &str {
        &self.kind
    }
}

impl<'de> Deserialize<'de> for RawEvent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let payload = Map::<String, Value>::deserialize(deserializer)?;
        match payload.get(DISCRIMINANT_FIELD) {
            Some(Value::String(_)) => {}
            Some(_) => {
                return Err(D::Error::custom(format!(
                    "field `{DISCRIMINANT_FIELD}` must be a string"
                )));
            }
            None => return Err(D::Error::missing_field(DISCRIMINANT_FIELD)),
        }
        Self::from_object(payload)
            .ok_or_else(|| D::Error::missing_field(DISCRIMINANT_FIELD))
    }
}

impl Serialize for RawEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.payload.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_event_keeps_payload() {
        let ev: RawEvent =
            serde_json::from_str(r#"{"type":"ref-updated","refUpdate":{"refName":"main"}}"#)
                .unwrap();
        assert_eq!(ev.kind(), "ref-updated");
        assert_eq!(ev.get("refUpdate").unwrap()["refName"], "main");
        assert_eq!(ev.payload().len(), 2);
    }

    #[test]
    fn test_raw_event_requires_string_discriminant() {
        let missing = serde_json::from_str::<RawEvent>(r#"{"kind":"x"}"#).unwrap_err();
        assert!(missing.to_string().contains("missing field `type`"));

        let numeric = serde_json::from_str::<RawEvent>(r#"{"type":7}"#).unwrap_err();
        assert!(numeric.to_string().contains("must be a string"));

        assert!(serde_json::from_str::<RawEvent>(r#"["type","x"]"#).is_err());
    }

    #[test]
    fn test_raw_event_redecode() {
        #[derive(Deserialize)]
        struct Typed {
            #[serde(rename = "type")]
            kind: String,
            n: u32,
        }

        let ev: RawEvent = serde_json::from_str(r#"{"type":"x","n":3}"#).unwrap();
        let typed: Typed = ev.decode().unwrap();
        assert_eq!(typed.kind, "x");
        assert_eq!(typed.n, 3);
    }

    #[test]
    fn test_raw_event_serializes_as_object() {
        let ev: RawEvent = serde_json::from_str(r#"{"type":"x","a":1}"#).unwrap();
        let back: Value = serde_json::to_value(&ev).unwrap();
        assert_eq!(back, serde_json::json!({"type": "x", "a": 1}));
    }
}
