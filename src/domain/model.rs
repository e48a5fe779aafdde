use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// One output record: a flat JSON object plus the names of its key fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub key_properties: Vec<String>,
    pub data: Map<String, Value>,
}

impl Record {
    pub fn new(key_properties: &[&str], data: Map<String, Value>) -> Self {
        Self {
            key_properties: key_properties.iter().map(|k| k.to_string()).collect(),
            data,
        }
    }

    /// Values of the key fields, in `key_properties` order. Missing fields are `Null`.
    pub fn primary_key(&self) -> Vec<Value> {
        self.key_properties
            .iter()
            .map(|k| self.data.get(k).cloned().unwrap_or(Value::Null))
            .collect()
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.data.get(field).and_then(Value::as_str)
    }
}

/// An independent extraction unit: one podcast, optionally narrowed to one year.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Partition {
    pub podcast_id: String,
    pub year: Option<i32>,
}

impl Partition {
    pub fn podcast(podcast_id: impl Into<String>) -> Self {
        Self {
            podcast_id: podcast_id.into(),
            year: None,
        }
    }

    pub fn podcast_year(podcast_id: impl Into<String>, year: i32) -> Self {
        Self {
            podcast_id: podcast_id.into(),
            year: Some(year),
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.year {
            Some(year) => write!(f, "podcast_id={} year={}", self.podcast_id, year),
            None => write!(f, "podcast_id={}", self.podcast_id),
        }
    }
}

/// Offset cursor for one page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    pub offset: u64,
    pub limit: u32,
}
