//! Scripted transport for in-crate unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use dynosql_client::AttributeValue;
use dynosql_client::DynamoTransport;
use dynosql_client::Item;
use dynosql_client::Page;
use dynosql_client::StatementRequest;
use dynosql_client::TableDescription;
use dynosql_client::TransportError;

/// Returns pages (or failures) in the order they were scripted and records
/// every statement request it sees.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<Page, TransportError>>>,
    requests: Mutex<Vec<StatementRequest>>,
    unhealthy: std::sync::atomic::AtomicBool,
}

impl ScriptedTransport {
    pub(crate) fn set_healthy(&self, healthy: bool) {
        self.unhealthy
            .store(!healthy, std::sync::atomic::Ordering::Relaxed);
    }

    pub(crate) fn push_page(&self, page: Page) {
        self.responses
            .lock()
            .expect("responses lock")
            .push_back(Ok(page));
    }

    pub(crate) fn push_error(&self, error: TransportError) {
        self.responses
            .lock()
            .expect("responses lock")
            .push_back(Err(error));
    }

    pub(crate) fn requests(&self) -> Vec<StatementRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait]
impl DynamoTransport for ScriptedTransport {
    async fn execute_statement(&self, request: StatementRequest) -> Result<Page, TransportError> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        self.responses
            .lock()
            .expect("responses lock")
            .pop_front()
            .unwrap_or_else(|| panic!("unscripted request: {request:?}"))
    }

    async fn describe_table(&self, table: &str) -> Result<TableDescription, TransportError> {
        Ok(TableDescription {
            name: table.to_string(),
            ..TableDescription::default()
        })
    }

    async fn list_tables(&self) -> Result<Vec<String>, TransportError> {
        Ok(Vec::new())
    }

    async fn execute_transaction(&self, _statements: Vec<String>) -> Result<(), TransportError> {
        Ok(())
    }

    async fn healthy(&self) -> bool {
        !self.unhealthy.load(std::sync::atomic::Ordering::Relaxed)
    }
}

/// A one-attribute item with a numeric `id`.
pub(crate) fn item(id: i64) -> Item {
    let mut item = Item::new();
    item.insert("id".to_string(), AttributeValue::N(id.to_string()));
    item
}
