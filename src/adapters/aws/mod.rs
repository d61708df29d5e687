//! AWS adapters: S3 stores, SQS queue, DynamoDB ledger, EC2 Auto Scaling fleet.

pub mod autoscaling;
pub mod dynamodb;
pub mod s3;
pub mod sqs;

pub use autoscaling::AsgFleet;
pub use dynamodb::DynamoLedger;
pub use s3::S3Store;
pub use sqs::SqsQueue;

use crate::error::Error;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata};

const THROTTLING_CODES: &[&str] = &[
    "SlowDown",
    "Throttling",
    "ThrottlingException",
    "RequestLimitExceeded",
    "TooManyRequestsException",
    "ProvisionedThroughputExceededException",
];

/// Shared SDK configuration from the default provider chain.
pub async fn load_sdk_config() -> aws_config::SdkConfig {
    aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await
}

/// Map an SDK error to the crate error, sending throttling to `QuotaOrRateLimit`.
pub(crate) fn classify<E>(err: E, fallback: impl FnOnce(String) -> Error) -> Error
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let message = DisplayErrorContext(&err).to_string();
    match err.code() {
        Some(code) if THROTTLING_CODES.contains(&code) => Error::QuotaOrRateLimit(message),
        _ => fallback(message),
    }
}
