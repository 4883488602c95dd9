use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use leadflow_channels::{render_template, MessageSender, OutboundMessage};
use leadflow_core::config::AppConfig;
use leadflow_core::event_bus::{make_event, noop_sink, EventSink};
use leadflow_core::types::{
    AudienceMember, AudienceStatus, CampaignStatus, CampaignStep, DeliveryStatus, EventType, Lead,
    MessageRecord, StepKind, TickReport,
};
use leadflow_core::{LeadflowError, LeadflowResult};
use leadflow_delivery::{BlockReason, DeliveryGate, Gate, RetryPolicy};
use leadflow_store::Store;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::state_machine::{AudienceStateMachine, CampaignStateMachine, CampaignTrigger};

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Lease holder name written to claimed rows; unique per process.
    pub owner: String,
    pub batch_size: u32,
    pub lease: Duration,
    /// How long a member is held back while the global kill switch is on.
    pub hold: Duration,
}

impl EngineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let short = Uuid::new_v4().simple().to_string();
        Self {
            owner: format!("{}-{}", config.node_id, &short[..8]),
            batch_size: config.scheduler.batch_size.max(1),
            lease: Duration::seconds(config.scheduler.lease_secs.max(1) as i64),
            hold: Duration::milliseconds(config.scheduler.tick_interval_ms.max(1000) as i64),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Per-member result, folded into the [`TickReport`].
#[derive(Debug, Default)]
struct MemberOutcome {
    sent: u64,
    failed: u64,
    retried: u64,
    completed: bool,
    opted_out: bool,
    deferred: bool,
    lease_lost: bool,
}

/// Advances campaign audiences one tick at a time.
#[derive(Clone)]
pub struct CampaignEngine {
    store: Store,
    sender: Arc<dyn MessageSender>,
    gate: Arc<DeliveryGate>,
    retry: RetryPolicy,
    settings: EngineSettings,
    machine: Arc<CampaignStateMachine>,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for CampaignEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CampaignEngine")
            .field("owner", &self.settings.owner)
            .field("channel", &self.sender.channel())
            .finish()
    }
}

impl CampaignEngine {
    pub fn new(
        store: Store,
        sender: Arc<dyn MessageSender>,
        gate: DeliveryGate,
        retry: RetryPolicy,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            sender,
            gate: Arc::new(gate),
            retry,
            settings,
            machine: Arc::new(CampaignStateMachine::new()),
            events: noop_sink(),
        }
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// One scheduler pass: start due campaigns, advance due members, close
    /// out campaigns with nobody left to process.
    pub async fn tick(&self, now: DateTime<Utc>) -> LeadflowResult<TickReport> {
        let started = Instant::now();
        let mut report = TickReport {
            promoted: self.promote_scheduled(now).await?,
            ..Default::default()
        };

        let global_kill = self.store.settings.kill_switch_engaged().await?;
        let claimed = self
            .store
            .audience
            .claim_due(now, self.settings.batch_size, &self.settings.owner, self.settings.lease)
            .await?;
        report.claimed = claimed.len() as u64;

        let mut steps_by_campaign: HashMap<Uuid, Vec<CampaignStep>> = HashMap::new();
        for member in claimed {
            if !steps_by_campaign.contains_key(&member.campaign_id) {
                let steps = self.store.campaigns.steps(member.campaign_id).await?;
                steps_by_campaign.insert(member.campaign_id, steps);
            }
            let steps = steps_by_campaign
                .get(&member.campaign_id)
                .map(Vec::as_slice)
                .unwrap_or_default();

            let member_id = member.id;
            match self
                .advance_member(member, steps, global_kill, now, started)
                .await
            {
                Ok(outcome) => {
                    report.sent += outcome.sent;
                    report.failed += outcome.failed;
                    report.retried += outcome.retried;
                    report.completed_members += u64::from(outcome.completed);
                    report.opted_out += u64::from(outcome.opted_out);
                    report.deferred += u64::from(outcome.deferred);
                }
                Err(e) => {
                    report.errors += 1;
                    error!(audience_id = %member_id, error = %e, "Failed to advance audience member");
                    if let Err(e) = self.store.audience.release(member_id, &self.settings.owner).await {
                        warn!(audience_id = %member_id, error = %e, "Failed to release lease");
                    }
                }
            }
        }

        report.campaigns_completed = self.complete_finished(now).await?;

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        metrics::histogram!("scheduler.tick.duration_ms").record(elapsed_ms);
        metrics::counter!("campaign.messages.sent").increment(report.sent);
        metrics::counter!("campaign.messages.failed").increment(report.failed);
        metrics::counter!("campaign.members.completed").increment(report.completed_members);
        Ok(report)
    }

    async fn promote_scheduled(&self, now: DateTime<Utc>) -> LeadflowResult<u64> {
        let mut promoted = 0;
        for mut campaign in self.store.campaigns.due_scheduled(now).await? {
            let from = campaign.status;
            campaign.status = self.machine.next(from, CampaignTrigger::Start)?;
            campaign.started_at = Some(now);
            campaign.updated_at = now;
            if self.store.campaigns.set_status(&campaign, from).await? {
                info!(campaign_id = %campaign.id, "Scheduled campaign started");
                self.events.emit(make_event(
                    EventType::CampaignStarted,
                    campaign.id,
                    None,
                    Some(campaign.id),
                ));
                promoted += 1;
            }
        }
        Ok(promoted)
    }

    async fn complete_finished(&self, now: DateTime<Utc>) -> LeadflowResult<u64> {
        let mut completed = 0;
        for mut campaign in self.store.campaigns.finished_running().await? {
            campaign.status = self.machine.next(CampaignStatus::Running, CampaignTrigger::Complete)?;
            campaign.completed_at = Some(now);
            campaign.updated_at = now;
            if self
                .store
                .campaigns
                .set_status(&campaign, CampaignStatus::Running)
                .await?
            {
                info!(campaign_id = %campaign.id, "Campaign completed");
                self.events.emit(make_event(
                    EventType::CampaignCompleted,
                    campaign.id,
                    None,
                    Some(campaign.id),
                ));
                completed += 1;
            }
        }
        Ok(completed)
    }

    /// Run a claimed member forward until it has to wait, is deferred,
    /// fails or finishes, then persist the result and drop the lease.
    async fn advance_member(
        &self,
        mut member: AudienceMember,
        steps: &[CampaignStep],
        global_kill: bool,
        now: DateTime<Utc>,
        started: Instant,
    ) -> LeadflowResult<MemberOutcome> {
        let mut outcome = MemberOutcome::default();
        let mut log: Vec<MessageRecord> = Vec::new();

        let lead = match self.store.leads.get(member.lead_id).await? {
            Some(lead) if !lead.opted_out => Some(lead),
            _ => None,
        };

        match lead {
            None => {
                set_status(&mut member, AudienceStatus::OptedOut)?;
                member.completed_at = Some(now);
                outcome.opted_out = true;
            }
            Some(lead) => {
                // Each pass either moves the cursor forward or breaks, so
                // one more pass than there are steps reaches the end.
                for _ in 0..=steps.len() {
                    let Some(step) = steps.get(member.current_step as usize) else {
                        set_status(&mut member, AudienceStatus::Completed)?;
                        member.completed_at = Some(now);
                        member.next_run_at = now;
                        outcome.completed = true;
                        break;
                    };

                    match &step.kind {
                        StepKind::Wait { delay_secs } => {
                            member.next_run_at = wait_until(now, *delay_secs)?;
                            set_status(&mut member, AudienceStatus::Waiting)?;
                            member.current_step += 1;
                            member.attempts = 0;
                            break;
                        }
                        StepKind::Message { template } => {
                            let keep_going = self
                                .run_message_step(
                                    &mut member,
                                    &lead,
                                    step.position,
                                    template,
                                    global_kill,
                                    now,
                                    started,
                                    &mut log,
                                    &mut outcome,
                                )
                                .await?;
                            if !keep_going {
                                break;
                            }
                        }
                    }
                }
            }
        }

        if outcome.lease_lost {
            // The row belongs to another claim now; keep only the sends
            // that already happened.
            metrics::counter!("campaign.leases.lost").increment(1);
            warn!(audience_id = %member.id, "Lease taken over before send, member left to its new holder");
            for record in &log {
                self.store.messages.record(record).await?;
            }
            self.emit_member_events(&member, &log, &outcome);
            return Ok(outcome);
        }

        member.updated_at = now;
        let saved = self
            .store
            .audience
            .save_progress(&member, &self.settings.owner, &log)
            .await?;
        self.emit_member_events(&member, &log, &outcome);
        if !saved {
            warn!(audience_id = %member.id, "Progress dropped, lease was taken over");
        }
        Ok(outcome)
    }

    /// Returns whether the member can continue to the next step this tick.
    #[allow(clippy::too_many_arguments)]
    async fn run_message_step(
        &self,
        member: &mut AudienceMember,
        lead: &Lead,
        position: u32,
        template: &str,
        global_kill: bool,
        now: DateTime<Utc>,
        started: Instant,
        log: &mut Vec<MessageRecord>,
        outcome: &mut MemberOutcome,
    ) -> LeadflowResult<bool> {
        if self.store.messages.has_sent(member.id, position).await? {
            debug!(audience_id = %member.id, position, "Step already delivered, skipping send");
            set_status(member, AudienceStatus::InProgress)?;
            member.current_step += 1;
            member.attempts = 0;
            member.last_error = None;
            return Ok(true);
        }

        // The switch may be engaged while this tick is running.
        let global_kill = global_kill || self.store.settings.kill_switch_engaged().await?;
        match self.gate.check(lead, global_kill, now) {
            Gate::Blocked(BlockReason::LeadOptedOut) => {
                set_status(member, AudienceStatus::OptedOut)?;
                member.completed_at = Some(now);
                outcome.opted_out = true;
                return Ok(false);
            }
            Gate::Blocked(BlockReason::GlobalKillSwitch) => {
                member.next_run_at = now + self.settings.hold;
                outcome.deferred = true;
                return Ok(false);
            }
            Gate::Defer(until) => {
                member.next_run_at = until;
                outcome.deferred = true;
                return Ok(false);
            }
            Gate::Allow => {}
        }

        if !self.extend_lease(member, now, started).await? {
            outcome.lease_lost = true;
            return Ok(false);
        }

        let body = render_template(template, lead);
        let message = OutboundMessage {
            lead_id: lead.id,
            to: lead.phone.clone(),
            body: body.clone(),
        };
        let mut record = MessageRecord {
            id: Uuid::new_v4(),
            campaign_id: Some(member.campaign_id),
            audience_id: Some(member.id),
            lead_id: lead.id,
            step_position: Some(position),
            channel: self.sender.channel().to_string(),
            body,
            status: DeliveryStatus::Sent,
            provider_message_id: None,
            error: None,
            attempt: member.attempts + 1,
            created_at: now,
        };

        match self.sender.send(&message).await {
            Ok(receipt) => {
                record.provider_message_id = Some(receipt.provider_message_id);
                log.push(record);
                set_status(member, AudienceStatus::InProgress)?;
                member.current_step += 1;
                member.attempts = 0;
                member.last_sent_at = Some(now);
                member.last_error = None;
                member.next_run_at = now;
                outcome.sent += 1;
                Ok(true)
            }
            Err(e) => {
                record.status = DeliveryStatus::Failed;
                record.error = Some(e.message.clone());
                log.push(record);
                member.attempts += 1;
                member.last_error = Some(e.message.clone());
                outcome.failed += 1;

                if self.retry.should_retry(member.attempts, e.kind) {
                    set_status(member, AudienceStatus::InProgress)?;
                    member.next_run_at = now + self.retry.next_delay(member.attempts);
                    outcome.retried += 1;
                    debug!(
                        audience_id = %member.id,
                        attempts = member.attempts,
                        next_run_at = %member.next_run_at,
                        "Send failed, retry scheduled"
                    );
                } else {
                    set_status(member, AudienceStatus::Failed)?;
                    member.completed_at = Some(now);
                    warn!(
                        audience_id = %member.id,
                        attempts = member.attempts,
                        error = %e,
                        "Send failed permanently"
                    );
                }
                Ok(false)
            }
        }
    }

    /// Renew the member's lease so it outlives the send about to happen.
    async fn extend_lease(
        &self,
        member: &mut AudienceMember,
        now: DateTime<Utc>,
        started: Instant,
    ) -> LeadflowResult<bool> {
        let Some(held) = member.locked_until else {
            return Ok(false);
        };
        let elapsed = Duration::from_std(started.elapsed()).unwrap_or_else(|_| Duration::zero());
        let until = now + elapsed + self.settings.lease;
        let extended = self
            .store
            .audience
            .extend_lease(member.id, &self.settings.owner, held, until)
            .await?;
        if extended {
            member.locked_until = Some(until);
        }
        Ok(extended)
    }

    fn emit_member_events(&self, member: &AudienceMember, log: &[MessageRecord], outcome: &MemberOutcome) {
        let lead_id = Some(member.lead_id);
        let campaign_id = Some(member.campaign_id);
        for record in log {
            let event_type = match record.status {
                DeliveryStatus::Sent => EventType::MessageSent,
                DeliveryStatus::Failed => EventType::MessageFailed,
            };
            self.events
                .emit(make_event(event_type, record.id, lead_id, campaign_id));
        }
        if outcome.retried > 0 {
            self.events.emit(make_event(
                EventType::MessageRetryScheduled,
                member.id,
                lead_id,
                campaign_id,
            ));
        }
        let terminal = match member.status {
            AudienceStatus::Completed => Some(EventType::AudienceCompleted),
            AudienceStatus::Failed => Some(EventType::AudienceFailed),
            _ => None,
        };
        if let Some(event_type) = terminal {
            self.events
                .emit(make_event(event_type, member.id, lead_id, campaign_id));
        }
    }
}

fn wait_until(now: DateTime<Utc>, delay_secs: u64) -> LeadflowResult<DateTime<Utc>> {
    i64::try_from(delay_secs)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|delay| now.checked_add_signed(delay))
        .ok_or_else(|| {
            LeadflowError::Validation(format!("wait of {delay_secs}s is out of range"))
        })
}

fn set_status(member: &mut AudienceMember, to: AudienceStatus) -> LeadflowResult<()> {
    AudienceStateMachine::ensure(member.status, to)?;
    member.status = to;
    Ok(())
}
