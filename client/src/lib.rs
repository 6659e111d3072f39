//! Wire-level model and transport for talking PartiQL to DynamoDB.
//!
//! This crate owns the pieces the driver is written against: the tagged
//! [`AttributeValue`] model, the [`DynamoTransport`] trait, the transport
//! error taxonomy, and the AWS SDK implementation of the transport. The
//! driver crate never touches the AWS SDK directly.

mod aws;
mod error;
mod transport;
mod types;

pub use aws::AwsCredentials;
pub use aws::AwsOptions;
pub use aws::AwsTransport;
pub use error::TransportError;
pub use transport::DynamoTransport;
pub use types::AttributeDefinition;
pub use types::AttributeValue;
pub use types::Item;
pub use types::KeyElement;
pub use types::KeyRole;
pub use types::Page;
pub use types::ScalarAttributeType;
pub use types::SecondaryIndex;
pub use types::StatementRequest;
pub use types::TableDescription;
