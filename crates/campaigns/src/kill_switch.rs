//! Opt-out handling, per lead and global.

use std::sync::Arc;

use chrono::Utc;
use leadflow_core::event_bus::{make_event, noop_sink, EventSink};
use leadflow_core::types::{EventType, InboundOutcome, Lead};
use leadflow_core::LeadflowResult;
use leadflow_delivery::is_opt_out_message;
use leadflow_store::Store;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct KillSwitchService {
    store: Store,
    keywords: Vec<String>,
    events: Arc<dyn EventSink>,
}

impl KillSwitchService {
    pub fn new(store: Store, keywords: Vec<String>) -> Self {
        Self {
            store,
            keywords,
            events: noop_sink(),
        }
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Flag the lead and stop every campaign membership still in flight.
    pub async fn opt_out_lead(&self, lead_id: Uuid, reason: &str) -> LeadflowResult<Lead> {
        let lead = self.store.leads.set_opt_out(lead_id, reason).await?;
        let campaigns = self
            .store
            .audience
            .mark_opted_out_for_lead(lead_id, Utc::now())
            .await?;
        info!(
            lead_id = %lead_id,
            reason,
            campaigns = campaigns.len(),
            "Lead opted out"
        );
        metrics::counter!("leads.opted_out").increment(1);
        self.events
            .emit(make_event(EventType::LeadOptedOut, lead_id, Some(lead_id), None));
        Ok(lead)
    }

    /// Clears the flag. Memberships already marked opted out stay terminal;
    /// the lead has to be enrolled again.
    pub async fn opt_in_lead(&self, lead_id: Uuid) -> LeadflowResult<Lead> {
        let lead = self.store.leads.clear_opt_out(lead_id).await?;
        info!(lead_id = %lead_id, "Lead opted back in");
        self.events
            .emit(make_event(EventType::LeadOptedIn, lead_id, Some(lead_id), None));
        Ok(lead)
    }

    /// Opt the sender out when the message is a stop keyword.
    pub async fn handle_inbound(&self, phone: &str, body: &str) -> LeadflowResult<InboundOutcome> {
        let Some(lead) = self.store.leads.find_by_phone(phone).await? else {
            warn!(phone, "Inbound message from unknown number");
            return Ok(InboundOutcome::default());
        };

        let mut outcome = InboundOutcome {
            lead_id: Some(lead.id),
            ..Default::default()
        };
        if !lead.opted_out && is_opt_out_message(body, &self.keywords) {
            let reason = format!("inbound keyword '{}'", body.trim());
            self.opt_out_lead(lead.id, &reason).await?;
            outcome.opted_out = true;
        }
        Ok(outcome)
    }

    pub async fn is_engaged(&self) -> LeadflowResult<bool> {
        self.store.settings.kill_switch_engaged().await
    }

    /// Halt all outbound messages. Members keep their position and resume
    /// once released.
    pub async fn engage(&self) -> LeadflowResult<()> {
        self.store.settings.set_kill_switch(true).await?;
        warn!("Global outbound kill switch engaged");
        self.events
            .emit(make_event(EventType::KillSwitchEngaged, "global", None, None));
        Ok(())
    }

    pub async fn release(&self) -> LeadflowResult<()> {
        self.store.settings.set_kill_switch(false).await?;
        info!("Global outbound kill switch released");
        self.events
            .emit(make_event(EventType::KillSwitchReleased, "global", None, None));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadflow_core::config::OptOutConfig;
    use leadflow_core::event_bus::capture_sink;
    use leadflow_core::types::{AudienceStatus, CreateLeadRequest, StepKind};

    async fn setup() -> (KillSwitchService, Store, Lead) {
        let store = Store::in_memory().await.unwrap();
        let lead = store
            .leads
            .create(CreateLeadRequest {
                name: "Ana".into(),
                phone: "+55 11 90000-0001".into(),
                email: None,
                status: None,
                source: None,
                tags: vec![],
                notes: None,
            })
            .await
            .unwrap();
        let service = KillSwitchService::new(store.clone(), OptOutConfig::default().keywords);
        (service, store, lead)
    }

    #[tokio::test]
    async fn test_inbound_stop_opts_out_and_marks_audience() {
        let (service, store, lead) = setup().await;
        let sink = capture_sink();
        let service = service.with_event_sink(sink.clone());

        let campaign = store
            .campaigns
            .create("Welcome", "", &[StepKind::Message { template: "Hi".into() }])
            .await
            .unwrap();
        store
            .audience
            .enroll(campaign.id, &[lead.id], Utc::now())
            .await
            .unwrap();

        let ignored = service.handle_inbound("5511900000001", "hello there").await.unwrap();
        assert_eq!(ignored.lead_id, Some(lead.id));
        assert!(!ignored.opted_out);

        let outcome = service.handle_inbound("+55 11 90000-0001", " STOP ").await.unwrap();
        assert!(outcome.opted_out);
        assert!(store.leads.require(lead.id).await.unwrap().opted_out);
        let member = store.audience.find(campaign.id, lead.id).await.unwrap().unwrap();
        assert_eq!(member.status, AudienceStatus::OptedOut);
        assert_eq!(sink.count_type(EventType::LeadOptedOut), 1);

        // A second STOP is a no-op.
        let again = service.handle_inbound("5511900000001", "stop").await.unwrap();
        assert!(!again.opted_out);
    }

    #[tokio::test]
    async fn test_unknown_number() {
        let (service, _, _) = setup().await;
        let outcome = service.handle_inbound("5599999999999", "stop").await.unwrap();
        assert_eq!(outcome, InboundOutcome::default());
    }

    #[tokio::test]
    async fn test_global_switch_toggles() {
        let (service, _, lead) = setup().await;
        assert!(!service.is_engaged().await.unwrap());
        service.engage().await.unwrap();
        assert!(service.is_engaged().await.unwrap());
        service.release().await.unwrap();
        assert!(!service.is_engaged().await.unwrap());

        service.opt_out_lead(lead.id, "manual").await.unwrap();
        let back = service.opt_in_lead(lead.id).await.unwrap();
        assert!(!back.opted_out);
    }
}
