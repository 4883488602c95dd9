use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use leadflow_channels::validate_template;
use leadflow_core::event_bus::{make_event, noop_sink, EventSink};
use leadflow_core::types::{
    AudienceMember, AudienceStatus, Campaign, CampaignDetail, CampaignStats, CampaignStatus,
    CampaignStep, CreateCampaignRequest, EnrollOutcome, EnrollRequest, EventType, LeadFilter,
    StepKind, UpdateCampaignRequest, MAX_WAIT_SECS,
};
use leadflow_core::{LeadflowError, LeadflowResult};
use leadflow_store::Store;
use tracing::info;
use uuid::Uuid;

use crate::state_machine::{CampaignStateMachine, CampaignTrigger};

/// Campaign CRUD and lifecycle operations. Every status change goes through
/// [`CampaignStateMachine`] and is persisted with a compare-and-set on the
/// previous status.
#[derive(Clone)]
pub struct CampaignService {
    store: Store,
    machine: Arc<CampaignStateMachine>,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for CampaignService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CampaignService").finish_non_exhaustive()
    }
}

/// Steps must be non-empty messages with renderable templates or waits of
/// one second up to [`MAX_WAIT_SECS`].
pub fn validate_steps(steps: &[StepKind]) -> LeadflowResult<()> {
    for (position, step) in steps.iter().enumerate() {
        match step {
            StepKind::Message { template } => {
                if template.trim().is_empty() {
                    return Err(LeadflowError::Validation(format!(
                        "step {position}: message template must not be empty"
                    )));
                }
                let issues = validate_template(template);
                if !issues.is_empty() {
                    return Err(LeadflowError::Validation(format!(
                        "step {position}: {}",
                        issues.join("; ")
                    )));
                }
            }
            StepKind::Wait { delay_secs } => {
                if *delay_secs == 0 {
                    return Err(LeadflowError::Validation(format!(
                        "step {position}: wait delay must be greater than zero"
                    )));
                }
                if *delay_secs > MAX_WAIT_SECS {
                    return Err(LeadflowError::Validation(format!(
                        "step {position}: wait delay must be at most {MAX_WAIT_SECS} seconds"
                    )));
                }
            }
        }
    }
    Ok(())
}

impl CampaignService {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            machine: Arc::new(CampaignStateMachine::new()),
            events: noop_sink(),
        }
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    pub async fn create(&self, req: CreateCampaignRequest) -> LeadflowResult<Campaign> {
        let name = req.name.trim();
        if name.is_empty() {
            return Err(LeadflowError::Validation("campaign name must not be empty".into()));
        }
        validate_steps(&req.steps)?;
        self.store
            .campaigns
            .create(name, &req.description, &req.steps)
            .await
    }

    pub async fn get(&self, id: Uuid) -> LeadflowResult<CampaignDetail> {
        let campaign = self.store.campaigns.require(id).await?;
        let steps = self.store.campaigns.steps(id).await?;
        Ok(CampaignDetail { campaign, steps })
    }

    pub async fn list(&self, status: Option<CampaignStatus>) -> LeadflowResult<Vec<Campaign>> {
        self.store.campaigns.list(status).await
    }

    pub async fn update(&self, id: Uuid, req: UpdateCampaignRequest) -> LeadflowResult<Campaign> {
        let campaign = self.store.campaigns.require(id).await?;
        ensure_editable(&campaign)?;
        let name = req.name.unwrap_or(campaign.name);
        if name.trim().is_empty() {
            return Err(LeadflowError::Validation("campaign name must not be empty".into()));
        }
        let description = req.description.unwrap_or(campaign.description);
        self.store
            .campaigns
            .update(id, name.trim(), &description)
            .await
    }

    /// Only drafts and finished campaigns can be deleted.
    pub async fn delete(&self, id: Uuid) -> LeadflowResult<()> {
        let campaign = self.store.campaigns.require(id).await?;
        if !(campaign.status == CampaignStatus::Draft || campaign.status.is_terminal()) {
            return Err(LeadflowError::Validation(format!(
                "campaign is {}; cancel it before deleting",
                campaign.status
            )));
        }
        self.store.campaigns.delete(id).await?;
        info!(campaign_id = %id, "Campaign deleted");
        Ok(())
    }

    pub async fn set_steps(&self, id: Uuid, steps: Vec<StepKind>) -> LeadflowResult<Vec<CampaignStep>> {
        let campaign = self.store.campaigns.require(id).await?;
        ensure_editable(&campaign)?;
        validate_steps(&steps)?;
        let stored = self.store.campaigns.replace_steps(id, &steps).await?;
        info!(campaign_id = %id, steps = stored.len(), "Campaign steps replaced");
        Ok(stored)
    }

    pub async fn add_step(&self, id: Uuid, step: StepKind) -> LeadflowResult<CampaignStep> {
        let campaign = self.store.campaigns.require(id).await?;
        ensure_editable(&campaign)?;
        validate_steps(std::slice::from_ref(&step))?;
        self.store.campaigns.add_step(id, &step).await
    }

    pub async fn enroll(&self, id: Uuid, lead_ids: &[Uuid]) -> LeadflowResult<EnrollOutcome> {
        let campaign = self.store.campaigns.require(id).await?;
        if campaign.status.is_terminal() {
            return Err(LeadflowError::Validation(format!(
                "cannot enroll leads into a {} campaign",
                campaign.status
            )));
        }
        let unique: Vec<Uuid> = lead_ids
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let outcome = self.store.audience.enroll(id, &unique, Utc::now()).await?;
        if outcome.enrolled > 0 {
            self.events
                .emit(make_event(EventType::AudienceEnrolled, id, None, Some(id)));
        }
        Ok(outcome)
    }

    pub async fn enroll_filter(&self, id: Uuid, filter: &LeadFilter) -> LeadflowResult<EnrollOutcome> {
        let ids = self.store.leads.ids_matching(filter).await?;
        self.enroll(id, &ids).await
    }

    /// Explicit ids plus everyone matching the optional filter.
    pub async fn enroll_request(&self, id: Uuid, req: EnrollRequest) -> LeadflowResult<EnrollOutcome> {
        let mut ids = req.lead_ids;
        if let Some(filter) = &req.filter {
            ids.extend(self.store.leads.ids_matching(filter).await?);
        }
        if ids.is_empty() {
            return Err(LeadflowError::Validation(
                "provide lead_ids or a filter to enroll".into(),
            ));
        }
        self.enroll(id, &ids).await
    }

    pub async fn audience(
        &self,
        id: Uuid,
        status: Option<AudienceStatus>,
    ) -> LeadflowResult<Vec<AudienceMember>> {
        self.store.campaigns.require(id).await?;
        self.store.audience.list(id, status).await
    }

    pub async fn remove_member(&self, id: Uuid, lead_id: Uuid) -> LeadflowResult<()> {
        if !self.store.audience.remove(id, lead_id).await? {
            return Err(LeadflowError::not_found("audience member", lead_id));
        }
        Ok(())
    }

    pub async fn start(&self, id: Uuid) -> LeadflowResult<Campaign> {
        let steps = self.store.campaigns.steps(id).await?;
        if steps.is_empty() {
            self.store.campaigns.require(id).await?;
            return Err(LeadflowError::Validation(
                "campaign needs at least one step to start".into(),
            ));
        }
        let campaign = self
            .apply(id, CampaignTrigger::Start, |c, now| {
                c.started_at = Some(now);
                c.scheduled_at = None;
            })
            .await?;
        self.events
            .emit(make_event(EventType::CampaignStarted, id, None, Some(id)));
        Ok(campaign)
    }

    pub async fn schedule(&self, id: Uuid, at: DateTime<Utc>) -> LeadflowResult<Campaign> {
        if at <= Utc::now() {
            return Err(LeadflowError::Validation(
                "scheduled time must be in the future".into(),
            ));
        }
        if self.store.campaigns.steps(id).await?.is_empty() {
            self.store.campaigns.require(id).await?;
            return Err(LeadflowError::Validation(
                "campaign needs at least one step to be scheduled".into(),
            ));
        }
        self.apply(id, CampaignTrigger::Schedule, |c, _| c.scheduled_at = Some(at))
            .await
    }

    pub async fn pause(&self, id: Uuid) -> LeadflowResult<Campaign> {
        let campaign = self.apply(id, CampaignTrigger::Pause, |_, _| {}).await?;
        self.events
            .emit(make_event(EventType::CampaignPaused, id, None, Some(id)));
        Ok(campaign)
    }

    pub async fn resume(&self, id: Uuid) -> LeadflowResult<Campaign> {
        let campaign = self.apply(id, CampaignTrigger::Resume, |_, _| {}).await?;
        self.events
            .emit(make_event(EventType::CampaignResumed, id, None, Some(id)));
        Ok(campaign)
    }

    /// Cancel the campaign and every member still in flight.
    pub async fn cancel(&self, id: Uuid) -> LeadflowResult<Campaign> {
        let campaign = self
            .apply(id, CampaignTrigger::Cancel, |c, now| c.completed_at = Some(now))
            .await?;
        let cancelled = self.store.audience.cancel_for_campaign(id, Utc::now()).await?;
        info!(campaign_id = %id, members = cancelled, "Campaign audience cancelled");
        self.events
            .emit(make_event(EventType::CampaignCancelled, id, None, Some(id)));
        Ok(campaign)
    }

    /// Re-queue failed members at the step that failed. A completed
    /// campaign is reopened so the scheduler picks them up again.
    pub async fn retry_failed(&self, id: Uuid) -> LeadflowResult<u64> {
        let campaign = self.store.campaigns.require(id).await?;
        match campaign.status {
            CampaignStatus::Running | CampaignStatus::Paused => {}
            CampaignStatus::Completed => {
                self.apply(id, CampaignTrigger::Reopen, |c, _| c.completed_at = None)
                    .await?;
            }
            other => {
                return Err(LeadflowError::transition(other, "retry_failed"));
            }
        }
        let requeued = self.store.audience.retry_failed(id, Utc::now()).await?;
        info!(campaign_id = %id, requeued, "Failed audience members requeued");
        Ok(requeued)
    }

    pub async fn stats(&self, id: Uuid) -> LeadflowResult<CampaignStats> {
        self.store.campaigns.require(id).await?;
        let steps = self.store.campaigns.steps(id).await?;
        self.store.stats.campaign_stats(id, &steps).await
    }

    async fn apply<F>(&self, id: Uuid, trigger: CampaignTrigger, mutate: F) -> LeadflowResult<Campaign>
    where
        F: FnOnce(&mut Campaign, DateTime<Utc>),
    {
        let mut campaign = self.store.campaigns.require(id).await?;
        let from = campaign.status;
        let to = self.machine.next(from, trigger)?;
        let now = Utc::now();
        campaign.status = to;
        campaign.updated_at = now;
        mutate(&mut campaign, now);

        if !self.store.campaigns.set_status(&campaign, from).await? {
            // Someone else changed the status between our read and write.
            let current = self.store.campaigns.require(id).await?;
            return Err(LeadflowError::transition(current.status, trigger));
        }
        info!(campaign_id = %id, %from, %to, %trigger, "Campaign status changed");
        metrics::counter!("campaign.status_changes", "to" => to.as_str()).increment(1);
        Ok(campaign)
    }
}

fn ensure_editable(campaign: &Campaign) -> LeadflowResult<()> {
    if campaign.status.is_editable() {
        Ok(())
    } else {
        Err(LeadflowError::Validation(format!(
            "campaign is {}; only draft or scheduled campaigns can be edited",
            campaign.status
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadflow_core::event_bus::capture_sink;
    use leadflow_core::types::CreateLeadRequest;

    fn steps() -> Vec<StepKind> {
        vec![
            StepKind::Message {
                template: "Hi {{first_name}}".into(),
            },
            StepKind::Wait { delay_secs: 60 },
        ]
    }

    async fn service() -> (CampaignService, Store) {
        let store = Store::in_memory().await.unwrap();
        (CampaignService::new(store.clone()), store)
    }

    async fn create(service: &CampaignService, steps: Vec<StepKind>) -> Campaign {
        service
            .create(CreateCampaignRequest {
                name: "Welcome".into(),
                description: String::new(),
                steps,
            })
            .await
            .unwrap()
    }

    async fn lead(store: &Store, phone: &str) -> Uuid {
        store
            .leads
            .create(CreateLeadRequest {
                name: "Lead".into(),
                phone: phone.into(),
                email: None,
                status: None,
                source: None,
                tags: vec!["vip".into()],
                notes: None,
            })
            .await
            .unwrap()
            .id
    }

    #[test]
    fn test_validate_steps() {
        assert!(validate_steps(&steps()).is_ok());
        assert!(validate_steps(&[StepKind::Message {
            template: "  ".into()
        }])
        .is_err());
        assert!(validate_steps(&[StepKind::Wait { delay_secs: 0 }]).is_err());
        assert!(validate_steps(&[StepKind::Message {
            template: "Hi {{nickname}}".into()
        }])
        .is_err());
        assert!(validate_steps(&[StepKind::Wait {
            delay_secs: MAX_WAIT_SECS
        }])
        .is_ok());
    }

    #[tokio::test]
    async fn test_oversized_wait_is_rejected() {
        let (service, _) = service().await;
        for delay_secs in [MAX_WAIT_SECS + 1, 10_000_000_000_000, u64::MAX] {
            let err = service
                .create(CreateCampaignRequest {
                    name: "Forever".into(),
                    description: String::new(),
                    steps: vec![StepKind::Wait { delay_secs }],
                })
                .await
                .unwrap_err();
            assert!(matches!(err, LeadflowError::Validation(_)), "{delay_secs}");
        }

        let campaign = create(&service, steps()).await;
        let err = service
            .add_step(campaign.id, StepKind::Wait { delay_secs: u64::MAX })
            .await
            .unwrap_err();
        assert!(matches!(err, LeadflowError::Validation(_)));
        assert_eq!(service.get(campaign.id).await.unwrap().steps.len(), 2);
    }

    #[tokio::test]
    async fn test_start_requires_steps() {
        let (service, _) = service().await;
        let campaign = create(&service, vec![]).await;
        let err = service.start(campaign.id).await.unwrap_err();
        assert!(matches!(err, LeadflowError::Validation(_)));
    }

    #[tokio::test]
    async fn test_lifecycle_and_events() {
        let (service, _) = service().await;
        let sink = capture_sink();
        let service = service.with_event_sink(sink.clone());
        let campaign = create(&service, steps()).await;

        let started = service.start(campaign.id).await.unwrap();
        assert_eq!(started.status, CampaignStatus::Running);
        assert!(started.started_at.is_some());

        // Steps are frozen once running.
        let err = service.set_steps(campaign.id, steps()).await.unwrap_err();
        assert!(matches!(err, LeadflowError::Validation(_)));

        assert_eq!(service.pause(campaign.id).await.unwrap().status, CampaignStatus::Paused);
        let err = service.pause(campaign.id).await.unwrap_err();
        assert!(matches!(err, LeadflowError::InvalidTransition { .. }));
        assert_eq!(service.resume(campaign.id).await.unwrap().status, CampaignStatus::Running);
        assert_eq!(service.cancel(campaign.id).await.unwrap().status, CampaignStatus::Cancelled);
        assert!(service.resume(campaign.id).await.is_err());

        assert_eq!(sink.count_type(EventType::CampaignStarted), 1);
        assert_eq!(sink.count_type(EventType::CampaignCancelled), 1);
    }

    #[tokio::test]
    async fn test_schedule_must_be_future() {
        let (service, _) = service().await;
        let campaign = create(&service, steps()).await;
        let past = Utc::now() - chrono::Duration::minutes(1);
        assert!(service.schedule(campaign.id, past).await.is_err());

        let future = Utc::now() + chrono::Duration::hours(1);
        let scheduled = service.schedule(campaign.id, future).await.unwrap();
        assert_eq!(scheduled.status, CampaignStatus::Scheduled);
        // Scheduled campaigns are still editable.
        service.set_steps(campaign.id, steps()).await.unwrap();
    }

    #[tokio::test]
    async fn test_enroll_by_filter_and_cancel_cascades() {
        let (service, store) = service().await;
        let campaign = create(&service, steps()).await;
        lead(&store, "5511900000001").await;
        lead(&store, "5511900000002").await;

        let outcome = service
            .enroll_request(
                campaign.id,
                EnrollRequest {
                    lead_ids: vec![],
                    filter: Some(LeadFilter {
                        tag: Some("vip".into()),
                        ..Default::default()
                    }),
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.enrolled, 2);

        service.start(campaign.id).await.unwrap();
        service.cancel(campaign.id).await.unwrap();
        let members = service
            .audience(campaign.id, Some(AudienceStatus::Cancelled))
            .await
            .unwrap();
        assert_eq!(members.len(), 2);

        let err = service.enroll(campaign.id, &[Uuid::new_v4()]).await.unwrap_err();
        assert!(matches!(err, LeadflowError::Validation(_)));
    }

    #[tokio::test]
    async fn test_delete_only_draft_or_finished() {
        let (service, _) = service().await;
        let campaign = create(&service, steps()).await;
        service.start(campaign.id).await.unwrap();
        assert!(service.delete(campaign.id).await.is_err());
        service.cancel(campaign.id).await.unwrap();
        service.delete(campaign.id).await.unwrap();
        assert!(matches!(
            service.get(campaign.id).await.unwrap_err(),
            LeadflowError::NotFound { .. }
        ));
    }
}
