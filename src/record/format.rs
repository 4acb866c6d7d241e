//! Stored record layout.
//!
//! ```text
//! { "type": "Node", "entries": [["name", "a"], ["next", {"*": "01hx..."}]] }
//! ```
//!
//! An entry value is either a literal or a reference token, a JSON object
//! whose only key is `"*"` and whose value is the target pid.

use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::record::error::CodecResult;
use crate::storage::Pid;

/// Key of a reference token.
pub const REF_TOKEN_KEY: &str = "*";

/// Value of one record entry.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordValue {
    Literal(Value),
    Ref(Pid),
}

impl RecordValue {
    pub fn as_ref_pid(&self) -> Option<&Pid> {
        match self {
            RecordValue::Ref(pid) => Some(pid),
            RecordValue::Literal(_) => None,
        }
    }
}

impl Serialize for RecordValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RecordValue::Literal(value) => value.serialize(serializer),
            RecordValue::Ref(pid) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(REF_TOKEN_KEY, pid.as_str())?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for RecordValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        match token_pid(&value) {
            Some(pid) => Pid::new(pid).map(RecordValue::Ref).map_err(D::Error::custom),
            None => Ok(RecordValue::Literal(value)),
        }
    }
}

/// A serialized object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "type")]
    pub type_name: String,
    pub entries: Vec<(String, RecordValue)>,
}

impl Record {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            entries: Vec::new(),
        }
    }

    pub fn with_entry(mut self, slot: impl Into<String>, value: RecordValue) -> Self {
        self.entries.push((slot.into(), value));
        self
    }

    pub fn from_json(json: &str) -> CodecResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> CodecResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// First entry for `slot`.
    pub fn get(&self, slot: &str) -> Option<&RecordValue> {
        self.entries
            .iter()
            .find(|(name, _)| name == slot)
            .map(|(_, value)| value)
    }

    /// Pids of every reference entry, in entry order.
    pub fn ref_pids(&self) -> Vec<Pid> {
        self.entries
            .iter()
            .filter_map(|(_, value)| value.as_ref_pid().cloned())
            .collect()
    }
}

/// True for values that can be stored as-is: null, booleans, numbers,
/// strings and arrays of literals.
pub fn is_literal(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => true,
        Value::Array(items) => items.iter().all(is_literal),
        Value::Object(_) => false,
    }
}

fn token_pid(value: &Value) -> Option<&str> {
    match value {
        Value::Object(map) if map.len() == 1 => map.get(REF_TOKEN_KEY)?.as_str(),
        _ => None,
    }
}

/// Every reference token pid found anywhere in `value`.
///
/// Works on raw record JSON without materializing objects. Tokens naming an
/// invalid pid are skipped.
pub fn ref_pids(value: &Value) -> Vec<Pid> {
    let mut pids = Vec::new();
    let mut stack = vec![value];
    while let Some(value) = stack.pop() {
        if let Some(pid) = token_pid(value) {
            if let Ok(pid) = Pid::new(pid) {
                pids.push(pid);
            }
            continue;
        }
        match value {
            Value::Array(items) => stack.extend(items.iter()),
            Value::Object(map) => stack.extend(map.values()),
            _ => {}
        }
    }
    pids
}

/// Parse raw record JSON and collect its reference pids.
pub fn ref_pids_in_json(json: &str) -> CodecResult<Vec<Pid>> {
    let value: Value = serde_json::from_str(json)?;
    Ok(ref_pids(&value))
}
