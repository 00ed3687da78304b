//! Payload schema for Qdrant points

use qdrant_client::qdrant::{PointId, PointStruct, Value as QdrantValue};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

/// Stable Qdrant point id for a message id
pub fn point_id_for(message_id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, message_id.as_bytes())
}

/// A vector ready to be written to a vector store, keyed by message id
#[derive(Debug, Clone, PartialEq)]
pub struct EmailVector {
    pub message_id: String,
    pub vector: Vec<f32>,
    pub ingestion_id: Option<String>,
}

impl EmailVector {
    pub fn new(message_id: String, vector: Vec<f32>, ingestion_id: Option<String>) -> Self {
        Self {
            message_id,
            vector,
            ingestion_id,
        }
    }

    /// Convert to qdrant-client PointStruct
    pub fn to_point_struct(self) -> PointStruct {
        let id = point_id_for(&self.message_id);
        let payload = EmailPayload {
            message_id: self.message_id,
            ingestion_id: self.ingestion_id,
        };
        PointStruct::new(id.to_string(), self.vector, payload.to_qdrant_payload())
    }
}

/// Payload stored with each point. Only used to map hits back to relational rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmailPayload {
    /// Provider message id (join key into the emails table)
    #[serde(default)]
    pub message_id: String,

    /// Ingestion run that last wrote this vector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingestion_id: Option<String>,
}

impl EmailPayload {
    /// Convert to Qdrant payload format
    pub fn to_qdrant_payload(self) -> HashMap<String, QdrantValue> {
        let mut map = HashMap::new();
        map.insert("message_id".to_string(), string_to_qdrant(&self.message_id));
        if let Some(ref ingestion_id) = self.ingestion_id {
            map.insert("ingestion_id".to_string(), string_to_qdrant(ingestion_id));
        }
        map
    }

    /// Decode a payload returned by search or scroll
    pub fn from_qdrant_payload(payload: HashMap<String, QdrantValue>) -> Self {
        payload
            .into_iter()
            .map(|(k, v)| (k, json_from_qdrant_value(v)))
            .collect::<Map<String, Value>>()
            .into()
    }
}

impl From<Map<String, Value>> for EmailPayload {
    fn from(map: Map<String, Value>) -> Self {
        serde_json::from_value(Value::Object(map)).unwrap_or_default()
    }
}

fn string_to_qdrant(s: &str) -> QdrantValue {
    QdrantValue {
        kind: Some(qdrant_client::qdrant::value::Kind::StringValue(s.to_string())),
    }
}

/// Convert PointId to string
pub(crate) fn point_id_to_string(id: Option<PointId>) -> String {
    match id {
        Some(PointId {
            point_id_options: Some(qdrant_client::qdrant::point_id::PointIdOptions::Uuid(uuid)),
        }) => uuid,
        Some(PointId {
            point_id_options: Some(qdrant_client::qdrant::point_id::PointIdOptions::Num(num)),
        }) => num.to_string(),
        _ => String::new(),
    }
}

/// Convert Qdrant value to serde_json Value
pub(crate) fn json_from_qdrant_value(v: QdrantValue) -> Value {
    use qdrant_client::qdrant::value::Kind;

    match v.kind {
        Some(Kind::NullValue(_)) => Value::Null,
        Some(Kind::BoolValue(b)) => Value::Bool(b),
        Some(Kind::IntegerValue(i)) => Value::Number(i.into()),
        Some(Kind::DoubleValue(d)) => serde_json::Number::from_f64(d)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Some(Kind::StringValue(s)) => Value::String(s),
        Some(Kind::ListValue(list)) => Value::Array(
            list.values
                .into_iter()
                .map(json_from_qdrant_value)
                .collect(),
        ),
        Some(Kind::StructValue(s)) => Value::Object(
            s.fields
                .into_iter()
                .map(|(k, v)| (k, json_from_qdrant_value(v)))
                .collect(),
        ),
        None => Value::Null,
    }
}
