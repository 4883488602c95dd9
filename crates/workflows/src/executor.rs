use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use leadflow_campaigns::CampaignService;
use leadflow_channels::{MessageSender, OutboundMessage};
use leadflow_core::types::{
    DeliveryStatus, Lead, LeadStatus, MessageRecord, UpdateLeadRequest,
};
use leadflow_core::{LeadflowError, LeadflowResult};
use leadflow_store::Store;
use tracing::{debug, warn};
use uuid::Uuid;

/// Side effects a workflow node can have. Each call returns a short outcome
/// written to the run log.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn send_message(&self, lead: &Lead, body: &str) -> LeadflowResult<String>;

    async fn update_status(&self, lead: &Lead, status: LeadStatus) -> LeadflowResult<String>;

    async fn add_tag(&self, lead: &Lead, tag: &str) -> LeadflowResult<String>;

    async fn enroll(&self, lead: &Lead, campaign_id: Uuid) -> LeadflowResult<String>;
}

/// Executes actions against the store and the outbound channel.
pub struct StoreActionExecutor {
    store: Store,
    campaigns: CampaignService,
    sender: Arc<dyn MessageSender>,
}

impl StoreActionExecutor {
    pub fn new(store: Store, campaigns: CampaignService, sender: Arc<dyn MessageSender>) -> Self {
        Self {
            store,
            campaigns,
            sender,
        }
    }
}

#[async_trait]
impl ActionExecutor for StoreActionExecutor {
    async fn send_message(&self, lead: &Lead, body: &str) -> LeadflowResult<String> {
        if lead.opted_out {
            debug!(lead_id = %lead.id, "Workflow message skipped, lead opted out");
            return Ok("skipped: lead opted out".into());
        }
        if self.store.settings.kill_switch_engaged().await? {
            debug!(lead_id = %lead.id, "Workflow message skipped, kill switch engaged");
            return Ok("skipped: kill switch engaged".into());
        }

        let message = OutboundMessage {
            lead_id: lead.id,
            to: lead.phone.clone(),
            body: body.to_string(),
        };
        let mut record = MessageRecord {
            id: Uuid::new_v4(),
            campaign_id: None,
            audience_id: None,
            lead_id: lead.id,
            step_position: None,
            channel: self.sender.channel().to_string(),
            body: body.to_string(),
            status: DeliveryStatus::Sent,
            provider_message_id: None,
            error: None,
            attempt: 1,
            created_at: Utc::now(),
        };

        match self.sender.send(&message).await {
            Ok(receipt) => {
                record.provider_message_id = Some(receipt.provider_message_id.clone());
                self.store.messages.record(&record).await?;
                metrics::counter!("workflow.messages.sent").increment(1);
                Ok(format!("sent {}", receipt.provider_message_id))
            }
            Err(e) => {
                warn!(lead_id = %lead.id, error = %e, "Workflow message failed");
                record.status = DeliveryStatus::Failed;
                record.error = Some(e.to_string());
                self.store.messages.record(&record).await?;
                metrics::counter!("workflow.messages.failed").increment(1);
                Err(LeadflowError::Delivery(e.to_string()))
            }
        }
    }

    async fn update_status(&self, lead: &Lead, status: LeadStatus) -> LeadflowResult<String> {
        if lead.status == status {
            return Ok(format!("already {status}"));
        }
        let (before, _) = self
            .store
            .leads
            .update(
                lead.id,
                UpdateLeadRequest {
                    status: Some(status),
                    ..Default::default()
                },
            )
            .await?;
        Ok(format!("{} -> {status}", before.status))
    }

    async fn add_tag(&self, lead: &Lead, tag: &str) -> LeadflowResult<String> {
        if lead.has_tag(tag) {
            return Ok(format!("already tagged {tag}"));
        }
        self.store.leads.add_tag(lead.id, tag).await?;
        Ok(format!("tagged {tag}"))
    }

    async fn enroll(&self, lead: &Lead, campaign_id: Uuid) -> LeadflowResult<String> {
        let outcome = self.campaigns.enroll(campaign_id, &[lead.id]).await?;
        Ok(if outcome.enrolled > 0 {
            format!("enrolled in {campaign_id}")
        } else if outcome.skipped_opted_out > 0 {
            "skipped: lead opted out".into()
        } else {
            format!("already enrolled in {campaign_id}")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadflow_channels::{RecordingSender, SendError};
    use leadflow_core::types::{CreateLeadRequest, StepKind};

    async fn setup() -> (StoreActionExecutor, Store, Arc<RecordingSender>, Lead) {
        let store = Store::in_memory().await.unwrap();
        let sender = Arc::new(RecordingSender::new());
        let executor = StoreActionExecutor::new(
            store.clone(),
            CampaignService::new(store.clone()),
            sender.clone(),
        );
        let lead = store
            .leads
            .create(CreateLeadRequest {
                name: "Ana Souza".into(),
                phone: "5511900000001".into(),
                email: None,
                status: None,
                source: None,
                tags: vec![],
                notes: None,
            })
            .await
            .unwrap();
        (executor, store, sender, lead)
    }

    #[tokio::test]
    async fn test_send_logs_message_without_campaign() {
        let (executor, store, sender, lead) = setup().await;
        let outcome = executor.send_message(&lead, "Hi Ana").await.unwrap();
        assert!(outcome.starts_with("sent"));
        assert_eq!(sender.sent_to("5511900000001").len(), 1);

        let log = store.messages.list_for_lead(lead.id, 10).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].campaign_id, None);
        assert_eq!(log[0].status, DeliveryStatus::Sent);
    }

    #[tokio::test]
    async fn test_send_respects_kill_switches() {
        let (executor, store, sender, lead) = setup().await;
        store.settings.set_kill_switch(true).await.unwrap();
        let outcome = executor.send_message(&lead, "Hi").await.unwrap();
        assert!(outcome.contains("kill switch"));

        store.settings.set_kill_switch(false).await.unwrap();
        let lead = store.leads.set_opt_out(lead.id, "manual").await.unwrap();
        let outcome = executor.send_message(&lead, "Hi").await.unwrap();
        assert!(outcome.contains("opted out"));
        assert_eq!(sender.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_send_failure_is_logged_and_returned() {
        let (executor, store, sender, lead) = setup().await;
        sender.fail_next(SendError::permanent("invalid number"));
        assert!(executor.send_message(&lead, "Hi").await.is_err());
        let log = store.messages.list_for_lead(lead.id, 10).await.unwrap();
        assert_eq!(log[0].status, DeliveryStatus::Failed);
    }

    #[tokio::test]
    async fn test_status_tag_and_enroll() {
        let (executor, store, _, lead) = setup().await;
        executor.update_status(&lead, LeadStatus::Qualified).await.unwrap();
        executor.add_tag(&lead, "vip").await.unwrap();
        let lead = store.leads.require(lead.id).await.unwrap();
        assert_eq!(lead.status, LeadStatus::Qualified);
        assert!(lead.has_tag("vip"));
        assert_eq!(executor.add_tag(&lead, "vip").await.unwrap(), "already tagged vip");

        let campaign = store
            .campaigns
            .create("Nurture", "", &[StepKind::Message { template: "Hi".into() }])
            .await
            .unwrap();
        let first = executor.enroll(&lead, campaign.id).await.unwrap();
        assert!(first.starts_with("enrolled"));
        let second = executor.enroll(&lead, campaign.id).await.unwrap();
        assert!(second.starts_with("already"));
    }
}
