// 📦 Bundle - the ordered set of records touched by one run

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    #[serde(rename = "type")]
    pub kind: String,

    pub id: String,

    pub objects: Vec<Value>,
}

impl Bundle {
    pub fn new(objects: Vec<Value>) -> Self {
        Bundle {
            kind: "bundle".to_string(),
            id: format!("bundle--{}", uuid::Uuid::new_v4()),
            objects,
        }
    }

    pub fn count(&self) -> usize {
        self.objects.len()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.objects
            .iter()
            .filter_map(|o| o.get("id").and_then(Value::as_str))
            .collect()
    }

    /// Objects of one STIX type, in bundle order
    pub fn of_type<'a>(&'a self, type_name: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
        self.objects
            .iter()
            .filter(move |o| o.get("type").and_then(Value::as_str) == Some(type_name))
    }

    pub fn to_pretty_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
