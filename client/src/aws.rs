use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_config::Region;
use aws_config::profile::ProfileFileCredentialsProvider;
use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_sdk_dynamodb::config::Credentials;
use aws_sdk_dynamodb::error::ProvideErrorMetadata;
use aws_sdk_dynamodb::error::SdkError;
use aws_sdk_dynamodb::types::ParameterizedStatement;
use tracing::debug;
use tracing::trace;

use crate::error::TransportError;
use crate::transport::DynamoTransport;
use crate::types::AttributeDefinition;
use crate::types::AttributeValue;
use crate::types::Item;
use crate::types::KeyElement;
use crate::types::KeyRole;
use crate::types::Page;
use crate::types::ScalarAttributeType;
use crate::types::SecondaryIndex;
use crate::types::StatementRequest;
use crate::types::TableDescription;

/// How the transport obtains AWS credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AwsCredentials {
    /// The SDK's default provider chain (env, profile, IMDS, …).
    #[default]
    Default,
    Static {
        access_key: String,
        secret_key: String,
        session_token: Option<String>,
    },
    Profile {
        name: String,
    },
}

/// Connection-level options for [`AwsTransport::connect`].
#[derive(Debug, Clone, Default)]
pub struct AwsOptions {
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub credentials: AwsCredentials,
    pub api_call_timeout: Option<Duration>,
    pub api_call_attempt_timeout: Option<Duration>,
}

/// [`DynamoTransport`] over the AWS SDK.
///
/// SDK-internal retries are disabled: the driver's retry engine owns
/// backoff, and double-retrying would multiply worst-case latency.
#[derive(Debug, Clone)]
pub struct AwsTransport {
    client: aws_sdk_dynamodb::Client,
}

impl AwsTransport {
    pub async fn connect(options: &AwsOptions) -> Result<Self, TransportError> {
        let mut timeouts = TimeoutConfig::builder();
        if let Some(timeout) = options.api_call_timeout {
            timeouts = timeouts.operation_timeout(timeout);
        }
        if let Some(timeout) = options.api_call_attempt_timeout {
            timeouts = timeouts.operation_attempt_timeout(timeout);
        }

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .retry_config(RetryConfig::disabled())
            .timeout_config(timeouts.build());

        if let Some(region) = &options.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(endpoint) = &options.endpoint {
            loader = loader.endpoint_url(endpoint.clone());
        }
        match &options.credentials {
            AwsCredentials::Default => {}
            AwsCredentials::Static {
                access_key,
                secret_key,
                session_token,
            } => {
                loader = loader.credentials_provider(Credentials::new(
                    access_key.clone(),
                    secret_key.clone(),
                    session_token.clone(),
                    None,
                    "dynosql-static",
                ));
            }
            AwsCredentials::Profile { name } => {
                loader = loader.credentials_provider(
                    ProfileFileCredentialsProvider::builder()
                        .profile_name(name)
                        .build(),
                );
            }
        }

        let config = loader.load().await;
        debug!(
            region = config.region().map(|r| r.to_string()),
            endpoint = options.endpoint,
            "DynamoDB transport ready"
        );
        Ok(Self {
            client: aws_sdk_dynamodb::Client::new(&config),
        })
    }

    pub fn from_client(client: aws_sdk_dynamodb::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DynamoTransport for AwsTransport {
    async fn execute_statement(&self, request: StatementRequest) -> Result<Page, TransportError> {
        trace!(
            statement = request.statement,
            limit = request.limit,
            has_token = request.next_token.is_some(),
            "ExecuteStatement"
        );
        let output = self
            .client
            .execute_statement()
            .statement(&request.statement)
            .set_next_token(request.next_token)
            .set_limit(request.limit.map(|l| l as i32))
            .send()
            .await
            .map_err(map_sdk_error)?;

        Ok(Page {
            items: output
                .items
                .unwrap_or_default()
                .into_iter()
                .map(from_sdk_item)
                .collect(),
            next_token: output.next_token,
            consumed_read_units: output.consumed_capacity.and_then(|c| c.capacity_units),
        })
    }

    async fn describe_table(&self, table: &str) -> Result<TableDescription, TransportError> {
        let output = self
            .client
            .describe_table()
            .table_name(table)
            .send()
            .await
            .map_err(map_sdk_error)?;
        let description = output.table.ok_or_else(|| TransportError::Service {
            code: "MissingTableDescription".to_string(),
            message: format!("DescribeTable for {table} returned no description"),
        })?;
        Ok(from_sdk_table(table, description))
    }

    async fn list_tables(&self) -> Result<Vec<String>, TransportError> {
        let mut names = Vec::new();
        let mut start: Option<String> = None;
        loop {
            let output = self
                .client
                .list_tables()
                .set_exclusive_start_table_name(start)
                .send()
                .await
                .map_err(map_sdk_error)?;
            names.extend(output.table_names.unwrap_or_default());
            start = output.last_evaluated_table_name;
            if start.is_none() {
                return Ok(names);
            }
        }
    }

    async fn execute_transaction(&self, statements: Vec<String>) -> Result<(), TransportError> {
        let mut parameterized = Vec::with_capacity(statements.len());
        for statement in statements {
            parameterized.push(
                ParameterizedStatement::builder()
                    .statement(statement)
                    .build()
                    .map_err(|err| TransportError::Build(err.to_string()))?,
            );
        }
        self.client
            .execute_transaction()
            .set_transact_statements(Some(parameterized))
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(())
    }

    async fn healthy(&self) -> bool {
        self.client.list_tables().limit(1).send().await.is_ok()
    }
}

fn from_sdk_item(item: HashMap<String, aws_sdk_dynamodb::types::AttributeValue>) -> Item {
    item.into_iter()
        .map(|(name, value)| (name, from_sdk_value(value)))
        .collect()
}

fn from_sdk_value(value: aws_sdk_dynamodb::types::AttributeValue) -> AttributeValue {
    use aws_sdk_dynamodb::types::AttributeValue as Sdk;
    match value {
        Sdk::S(s) => AttributeValue::S(s),
        Sdk::N(n) => AttributeValue::N(n),
        Sdk::Bool(b) => AttributeValue::Bool(b),
        Sdk::B(blob) => AttributeValue::B(blob.into_inner()),
        Sdk::Null(_) => AttributeValue::Null,
        Sdk::Ss(values) => AttributeValue::Ss(values),
        Sdk::Ns(values) => AttributeValue::Ns(values),
        Sdk::Bs(blobs) => {
            AttributeValue::Bs(blobs.into_iter().map(aws_sdk_dynamodb::primitives::Blob::into_inner).collect())
        }
        Sdk::L(values) => AttributeValue::L(values.into_iter().map(from_sdk_value).collect()),
        Sdk::M(map) => AttributeValue::M(from_sdk_item(map)),
        other => {
            debug!(tag = ?other, "unrecognized attribute value tag, treating as NULL");
            AttributeValue::Null
        }
    }
}

fn from_sdk_table(
    name: &str,
    description: aws_sdk_dynamodb::types::TableDescription,
) -> TableDescription {
    let attribute_definitions = description
        .attribute_definitions
        .unwrap_or_default()
        .into_iter()
        .filter_map(|definition| {
            let attribute_type = from_sdk_scalar_type(&definition.attribute_type)?;
            Some(AttributeDefinition {
                name: definition.attribute_name,
                attribute_type,
            })
        })
        .collect();

    let key_schema = from_sdk_key_schema(description.key_schema.unwrap_or_default());

    let mut secondary_indexes = Vec::new();
    for index in description.global_secondary_indexes.unwrap_or_default() {
        if let Some(index_name) = index.index_name {
            secondary_indexes.push(SecondaryIndex {
                name: index_name,
                key_schema: from_sdk_key_schema(index.key_schema.unwrap_or_default()),
                global: true,
            });
        }
    }
    for index in description.local_secondary_indexes.unwrap_or_default() {
        if let Some(index_name) = index.index_name {
            secondary_indexes.push(SecondaryIndex {
                name: index_name,
                key_schema: from_sdk_key_schema(index.key_schema.unwrap_or_default()),
                global: false,
            });
        }
    }

    TableDescription {
        name: description.table_name.unwrap_or_else(|| name.to_string()),
        attribute_definitions,
        key_schema,
        secondary_indexes,
        item_count: description.item_count,
    }
}

fn from_sdk_key_schema(
    elements: Vec<aws_sdk_dynamodb::types::KeySchemaElement>,
) -> Vec<KeyElement> {
    elements
        .into_iter()
        .filter_map(|element| {
            let role = match element.key_type {
                aws_sdk_dynamodb::types::KeyType::Hash => KeyRole::Hash,
                aws_sdk_dynamodb::types::KeyType::Range => KeyRole::Range,
                _ => return None,
            };
            Some(KeyElement {
                name: element.attribute_name,
                role,
            })
        })
        .collect()
}

fn from_sdk_scalar_type(
    scalar: &aws_sdk_dynamodb::types::ScalarAttributeType,
) -> Option<ScalarAttributeType> {
    match scalar {
        aws_sdk_dynamodb::types::ScalarAttributeType::S => Some(ScalarAttributeType::S),
        aws_sdk_dynamodb::types::ScalarAttributeType::N => Some(ScalarAttributeType::N),
        aws_sdk_dynamodb::types::ScalarAttributeType::B => Some(ScalarAttributeType::B),
        _ => None,
    }
}

fn map_sdk_error<E, R>(err: SdkError<E, R>) -> TransportError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    match &err {
        SdkError::TimeoutError(_) => TransportError::Timeout,
        SdkError::DispatchFailure(failure) => {
            if failure.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Network(format!("{err:?}"))
            }
        }
        SdkError::ResponseError(_) => TransportError::Network(format!("{err:?}")),
        SdkError::ServiceError(_) => {
            let code = err.code().unwrap_or("Unknown").to_string();
            let message = err.message().unwrap_or("no message").to_string();
            classify_service_error(code, message)
        }
        _ => TransportError::Network(format!("{err:?}")),
    }
}

fn classify_service_error(code: String, message: String) -> TransportError {
    match code.as_str() {
        "ThrottlingException"
        | "ProvisionedThroughputExceededException"
        | "RequestLimitExceeded"
        | "LimitExceededException" => TransportError::Throttled { code },
        "InternalServerError" | "ServiceUnavailable" | "TransactionConflictException" => {
            TransportError::Internal { message }
        }
        "AccessDeniedException"
        | "UnrecognizedClientException"
        | "MissingAuthenticationTokenException" => TransportError::AccessDenied { message },
        "ResourceNotFoundException" | "TableNotFoundException" | "IndexNotFoundException" => {
            TransportError::ResourceNotFound { message }
        }
        "ValidationException" | "DuplicateItemException" | "ConditionalCheckFailedException" => {
            TransportError::InvalidRequest { message }
        }
        "TransactionCanceledException"
        | "TransactionInProgressException"
        | "IdempotentParameterMismatchException" => TransportError::TransactionCanceled { message },
        _ => TransportError::Service { code, message },
    }
}

#[cfg(test)]
mod tests {
    use super::classify_service_error;
    use crate::error::TransportError;

    #[test]
    fn throughput_exceeded_is_throttling() {
        let error = classify_service_error(
            "ProvisionedThroughputExceededException".to_string(),
            "slow down".to_string(),
        );
        assert!(error.is_throttling());
        assert!(error.is_retryable());
    }

    #[test]
    fn validation_is_permanent() {
        let error = classify_service_error(
            "ValidationException".to_string(),
            "Statement wasn't well formed".to_string(),
        );
        assert!(!error.is_retryable());
    }

    #[test]
    fn unknown_codes_stay_diagnosable() {
        let error =
            classify_service_error("SomethingNew".to_string(), "???".to_string());
        match error {
            TransportError::Service { code, .. } => assert_eq!(code, "SomethingNew"),
            other => panic!("expected Service, got {other:?}"),
        }
    }
}
