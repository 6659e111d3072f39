use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;

/// A single DynamoDB attribute value, tagged the way the wire tags it.
///
/// `Bs` (binary set) is carried alongside `Ss`/`Ns` even though PartiQL
/// results rarely contain it; the SDK can hand one back for any item that
/// was written through the native API.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    S(String),
    N(String),
    Bool(bool),
    B(Vec<u8>),
    Null,
    Ss(Vec<String>),
    Ns(Vec<String>),
    Bs(Vec<Vec<u8>>),
    L(Vec<AttributeValue>),
    M(HashMap<String, AttributeValue>),
}

impl AttributeValue {
    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }

    /// The wire tag for this value, useful in log lines and error messages.
    pub fn tag(&self) -> &'static str {
        match self {
            AttributeValue::S(_) => "S",
            AttributeValue::N(_) => "N",
            AttributeValue::Bool(_) => "BOOL",
            AttributeValue::B(_) => "B",
            AttributeValue::Null => "NULL",
            AttributeValue::Ss(_) => "SS",
            AttributeValue::Ns(_) => "NS",
            AttributeValue::Bs(_) => "BS",
            AttributeValue::L(_) => "L",
            AttributeValue::M(_) => "M",
        }
    }

    pub fn as_s(&self) -> Option<&str> {
        match self {
            AttributeValue::S(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_n(&self) -> Option<&str> {
        match self {
            AttributeValue::N(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            AttributeValue::B(b) => Some(b),
            _ => None,
        }
    }
}

/// One returned item: attribute name to tagged value.
pub type Item = HashMap<String, AttributeValue>;

/// One page of an `ExecuteStatement` response.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<Item>,
    pub next_token: Option<String>,
    pub consumed_read_units: Option<f64>,
}

/// Parameters for a single `ExecuteStatement` call.
#[derive(Debug, Clone)]
pub struct StatementRequest {
    pub statement: String,
    pub next_token: Option<String>,
    pub limit: Option<u32>,
}

impl StatementRequest {
    pub fn new(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            next_token: None,
            limit: None,
        }
    }

    pub fn with_next_token(mut self, next_token: Option<String>) -> Self {
        self.next_token = next_token;
        self
    }

    pub fn with_limit(mut self, limit: Option<u32>) -> Self {
        self.limit = limit;
        self
    }
}

/// Declared type of a key attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalarAttributeType {
    S,
    N,
    B,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDefinition {
    pub name: String,
    pub attribute_type: ScalarAttributeType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRole {
    /// Partition (HASH) key.
    Hash,
    /// Sort (RANGE) key.
    Range,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyElement {
    pub name: String,
    pub role: KeyRole,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecondaryIndex {
    pub name: String,
    pub key_schema: Vec<KeyElement>,
    /// True for a GSI, false for an LSI.
    pub global: bool,
}

/// The subset of `DescribeTable` the driver consumes: key schema, declared
/// attribute types, secondary indexes, and the (approximate) item count.
#[derive(Debug, Clone, Default)]
pub struct TableDescription {
    pub name: String,
    pub attribute_definitions: Vec<AttributeDefinition>,
    pub key_schema: Vec<KeyElement>,
    pub secondary_indexes: Vec<SecondaryIndex>,
    pub item_count: Option<i64>,
}

impl TableDescription {
    pub fn partition_key(&self) -> Option<&str> {
        self.key_schema
            .iter()
            .find(|k| k.role == KeyRole::Hash)
            .map(|k| k.name.as_str())
    }

    pub fn sort_key(&self) -> Option<&str> {
        self.key_schema
            .iter()
            .find(|k| k.role == KeyRole::Range)
            .map(|k| k.name.as_str())
    }

    pub fn attribute_type(&self, name: &str) -> Option<ScalarAttributeType> {
        self.attribute_definitions
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.attribute_type)
    }
}
