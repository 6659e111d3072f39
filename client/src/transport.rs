use crate::error::TransportError;
use crate::types::Page;
use crate::types::StatementRequest;
use crate::types::TableDescription;
use async_trait::async_trait;

/// The remote seam the whole driver is written against.
///
/// One implementation talks to DynamoDB through the AWS SDK
/// ([`crate::AwsTransport`]); tests substitute scripted fakes. Retry policy
/// lives above this trait — implementations perform exactly one attempt per
/// call.
#[async_trait]
pub trait DynamoTransport: Send + Sync {
    /// One `ExecuteStatement` round-trip: a single page plus an opaque
    /// continuation token when more data exists.
    async fn execute_statement(&self, request: StatementRequest) -> Result<Page, TransportError>;

    async fn describe_table(&self, table: &str) -> Result<TableDescription, TransportError>;

    /// All table names visible to the caller (paginated underneath).
    async fn list_tables(&self) -> Result<Vec<String>, TransportError>;

    /// Run a batch of PartiQL statements atomically.
    async fn execute_transaction(&self, statements: Vec<String>) -> Result<(), TransportError>;

    /// Cheap liveness probe used by pool validation.
    async fn healthy(&self) -> bool;
}
