use super::classify;
use crate::domain::jobs::JobId;
use crate::error::{Error, Result};
use crate::ports::ledger::JobLedger;
use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use chrono::Utc;
use std::time::Duration;

/// DynamoLedger implements JobLedger with a conditional put per job id.
/// Items carry an `expires_at` epoch attribute for the table's TTL.
#[derive(Clone)]
pub struct DynamoLedger {
    client: Client,
    table_name: String,
    ttl: Duration,
}

impl DynamoLedger {
    pub fn new(client: Client, table_name: String, ttl: Duration) -> Self {
        Self {
            client,
            table_name,
            ttl,
        }
    }
}

#[async_trait]
impl JobLedger for DynamoLedger {
    async fn register(&self, job_id: &JobId) -> Result<bool> {
        let now = Utc::now().timestamp();
        let expires_at = now + self.ttl.as_secs() as i64;
        let result = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .item("job_id", AttributeValue::S(job_id.to_string()))
            .item("registered_at", AttributeValue::N(now.to_string()))
            .item("expires_at", AttributeValue::N(expires_at.to_string()))
            .condition_expression("attribute_not_exists(job_id)")
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(e)
                if e.as_service_error()
                    .is_some_and(|s| s.is_conditional_check_failed_exception()) =>
            {
                Ok(false)
            }
            Err(e) => Err(classify(e, Error::Ledger)),
        }
    }

    async fn release(&self, job_id: &JobId) -> Result<()> {
        self.client
            .delete_item()
            .table_name(&self.table_name)
            .key("job_id", AttributeValue::S(job_id.to_string()))
            .send()
            .await
            .map_err(|e| classify(e, Error::Ledger))?;
        Ok(())
    }
}
