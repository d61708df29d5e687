use super::classify;
use crate::error::{Error, Result};
use crate::ports::fleet::FleetOrchestrator;
use async_trait::async_trait;
use aws_sdk_autoscaling::types::LifecycleState;
use aws_sdk_autoscaling::Client;

/// AsgFleet drives worker count through an EC2 Auto Scaling group.
#[derive(Clone)]
pub struct AsgFleet {
    client: Client,
    group_name: String,
}

impl AsgFleet {
    pub fn new(client: Client, group_name: String) -> Self {
        Self { client, group_name }
    }
}

#[async_trait]
impl FleetOrchestrator for AsgFleet {
    async fn set_desired_count(&self, count: usize) -> Result<()> {
        self.client
            .set_desired_capacity()
            .auto_scaling_group_name(&self.group_name)
            .desired_capacity(count as i32)
            .honor_cooldown(false)
            .send()
            .await
            .map_err(|e| classify(e, Error::Fleet))?;
        Ok(())
    }

    async fn current_count(&self) -> Result<usize> {
        let resp = self
            .client
            .describe_auto_scaling_groups()
            .auto_scaling_group_names(&self.group_name)
            .send()
            .await
            .map_err(|e| classify(e, Error::Fleet))?;

        let group = resp
            .auto_scaling_groups()
            .first()
            .ok_or_else(|| Error::Fleet(format!("auto scaling group {} not found", self.group_name)))?;
        Ok(group
            .instances()
            .iter()
            .filter(|i| i.lifecycle_state() == Some(&LifecycleState::InService))
            .count())
    }
}
