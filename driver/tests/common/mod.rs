//! In-memory DynamoDB stand-in for integration tests.
//!
//! Tables hold ordered items; pagination tokens are stringified item
//! indices. Failures can be injected globally (next-call queue) or per
//! table, and every call is counted so tests can assert wire traffic.

// Each test binary uses a different slice of this helper.
#![allow(dead_code)]

use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use dynosql_client::AttributeDefinition;
use dynosql_client::AttributeValue;
use dynosql_client::DynamoTransport;
use dynosql_client::Item;
use dynosql_client::KeyElement;
use dynosql_client::KeyRole;
use dynosql_client::Page;
use dynosql_client::ScalarAttributeType;
use dynosql_client::StatementRequest;
use dynosql_client::TableDescription;
use dynosql_client::TransportError;

#[derive(Default)]
pub struct FakeDynamo {
    tables: Mutex<HashMap<String, Vec<Item>>>,
    descriptions: Mutex<HashMap<String, TableDescription>>,
    statement_log: Mutex<Vec<StatementRequest>>,
    transactions: Mutex<Vec<Vec<String>>>,
    fail_next: Mutex<VecDeque<TransportError>>,
    failing_tables: Mutex<HashSet<String>>,
    execute_calls: AtomicUsize,
    describe_calls: AtomicUsize,
    unhealthy: AtomicBool,
}

impl FakeDynamo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_numbered_table(self, name: &str, count: usize) -> Self {
        let items = (1..=count as i64).map(numbered_item).collect();
        self.with_table(name, items, keyed_description(name))
    }

    pub fn with_table(self, name: &str, items: Vec<Item>, description: TableDescription) -> Self {
        self.tables
            .lock()
            .unwrap()
            .insert(name.to_string(), items);
        self.descriptions
            .lock()
            .unwrap()
            .insert(name.to_string(), description);
        self
    }

    pub fn fail_next(&self, error: TransportError) {
        self.fail_next.lock().unwrap().push_back(error);
    }

    pub fn fail_table(&self, name: &str) {
        self.failing_tables.lock().unwrap().insert(name.to_string());
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.unhealthy.store(!healthy, Ordering::Relaxed);
    }

    pub fn statements(&self) -> Vec<StatementRequest> {
        self.statement_log.lock().unwrap().clone()
    }

    pub fn transactions(&self) -> Vec<Vec<String>> {
        self.transactions.lock().unwrap().clone()
    }

    pub fn execute_calls(&self) -> usize {
        self.execute_calls.load(Ordering::Relaxed)
    }

    pub fn describe_calls(&self) -> usize {
        self.describe_calls.load(Ordering::Relaxed)
    }

    fn target_table(&self, statement: &str) -> Option<(String, Vec<Item>)> {
        let tables = self.tables.lock().unwrap();
        tables
            .iter()
            .find(|(name, _)| statement.contains(&format!("\"{name}\"")))
            .map(|(name, items)| (name.clone(), items.clone()))
    }
}

#[async_trait]
impl DynamoTransport for FakeDynamo {
    async fn execute_statement(&self, request: StatementRequest) -> Result<Page, TransportError> {
        self.execute_calls.fetch_add(1, Ordering::Relaxed);
        self.statement_log.lock().unwrap().push(request.clone());

        if let Some(error) = self.fail_next.lock().unwrap().pop_front() {
            return Err(error);
        }

        let Some((name, items)) = self.target_table(&request.statement) else {
            return Err(TransportError::ResourceNotFound {
                message: format!("no table referenced by {:?}", request.statement),
            });
        };
        if self.failing_tables.lock().unwrap().contains(&name) {
            return Err(TransportError::ResourceNotFound {
                message: format!("injected failure for {name}"),
            });
        }

        // DML statements have no result pages.
        let head = request.statement.trim_start().to_ascii_uppercase();
        if !head.starts_with("SELECT") {
            return Ok(Page::default());
        }

        let start: usize = request
            .next_token
            .as_deref()
            .map(|token| token.parse().unwrap_or(0))
            .unwrap_or(0);
        let remaining = items.len().saturating_sub(start);
        let page_len = request
            .limit
            .map(|limit| limit as usize)
            .unwrap_or(remaining)
            .min(remaining);
        let end = start + page_len;
        Ok(Page {
            items: items[start..end].to_vec(),
            next_token: (end < items.len()).then(|| end.to_string()),
            consumed_read_units: Some(page_len as f64 * 0.5),
        })
    }

    async fn describe_table(&self, table: &str) -> Result<TableDescription, TransportError> {
        self.describe_calls.fetch_add(1, Ordering::Relaxed);
        if self.failing_tables.lock().unwrap().contains(table) {
            return Err(TransportError::ResourceNotFound {
                message: format!("injected failure for {table}"),
            });
        }
        self.descriptions
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .ok_or_else(|| TransportError::ResourceNotFound {
                message: format!("table {table} does not exist"),
            })
    }

    async fn list_tables(&self) -> Result<Vec<String>, TransportError> {
        let mut names: Vec<String> = self.tables.lock().unwrap().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn execute_transaction(&self, statements: Vec<String>) -> Result<(), TransportError> {
        if let Some(error) = self.fail_next.lock().unwrap().pop_front() {
            return Err(error);
        }
        self.transactions.lock().unwrap().push(statements);
        Ok(())
    }

    async fn healthy(&self) -> bool {
        !self.unhealthy.load(Ordering::Relaxed)
    }
}

/// `{id: N(id), name: S("item-<id>"), flag: BOOL}` test items.
pub fn numbered_item(id: i64) -> Item {
    let mut item = Item::new();
    item.insert("id".to_string(), AttributeValue::N(id.to_string()));
    item.insert(
        "name".to_string(),
        AttributeValue::S(format!("item-{id}")),
    );
    item.insert("flag".to_string(), AttributeValue::Bool(id % 2 == 0));
    item
}

/// A table description with a string HASH key named `id`.
pub fn keyed_description(name: &str) -> TableDescription {
    TableDescription {
        name: name.to_string(),
        attribute_definitions: vec![AttributeDefinition {
            name: "id".to_string(),
            attribute_type: ScalarAttributeType::S,
        }],
        key_schema: vec![KeyElement {
            name: "id".to_string(),
            role: KeyRole::Hash,
        }],
        secondary_indexes: Vec::new(),
        item_count: None,
    }
}

/// A description with no attribute definitions, forcing AUTO discovery
/// down to its sampling fallback.
pub fn bare_description(name: &str) -> TableDescription {
    TableDescription {
        name: name.to_string(),
        attribute_definitions: Vec::new(),
        key_schema: Vec::new(),
        secondary_indexes: Vec::new(),
        item_count: None,
    }
}
