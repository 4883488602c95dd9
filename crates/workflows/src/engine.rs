use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use leadflow_channels::render_template;
use leadflow_core::event_bus::{make_event, noop_sink, EventSink};
use leadflow_core::types::{
    EventType, Lead, NodeKind, RunStatus, RunStep, Workflow, WorkflowNode, WorkflowRun,
};
use leadflow_core::LeadflowResult;
use leadflow_store::Store;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::executor::ActionExecutor;
use crate::graph::WorkflowGraph;
use crate::trigger::TriggerEvent;

pub const DEFAULT_MAX_STEPS: usize = 64;

enum Next {
    All,
    Branch(bool),
    Halt,
}

/// Runs active workflows in response to lead events.
///
/// Actions taken by a workflow do not dispatch further triggers, so one
/// workflow tagging a lead never starts a `TagAdded` workflow.
pub struct WorkflowEngine {
    store: Store,
    executor: Arc<dyn ActionExecutor>,
    events: Arc<dyn EventSink>,
    max_steps: usize,
}

impl WorkflowEngine {
    pub fn new(store: Store, executor: Arc<dyn ActionExecutor>) -> Self {
        Self {
            store,
            executor,
            events: noop_sink(),
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    /// Run every active workflow whose trigger matches `event`. Each run is
    /// persisted whether it succeeded or not.
    pub async fn dispatch(&self, event: TriggerEvent) -> LeadflowResult<Vec<WorkflowRun>> {
        let matching: Vec<Workflow> = self
            .store
            .workflows
            .list(true)
            .await?
            .into_iter()
            .filter(|w| event.matches(&w.trigger))
            .collect();
        if matching.is_empty() {
            return Ok(Vec::new());
        }

        let lead_id = event.lead_id();
        let Some(lead) = self.store.leads.get(lead_id).await? else {
            warn!(lead_id = %lead_id, "Workflow trigger for unknown lead");
            return Ok(Vec::new());
        };

        let mut runs = Vec::with_capacity(matching.len());
        for workflow in &matching {
            let started = Instant::now();
            let run = self.execute(workflow, lead.clone()).await;
            self.store.workflows.record_run(&run).await?;

            metrics::histogram!("workflow.run.duration_ms")
                .record(started.elapsed().as_secs_f64() * 1000.0);
            let event_type = match run.status {
                RunStatus::Succeeded => {
                    metrics::counter!("workflow.runs.succeeded").increment(1);
                    EventType::WorkflowRunSucceeded
                }
                RunStatus::Failed => {
                    metrics::counter!("workflow.runs.failed").increment(1);
                    EventType::WorkflowRunFailed
                }
            };
            self.events
                .emit(make_event(event_type, run.id, Some(lead_id), None));
            info!(
                workflow_id = %workflow.id,
                workflow = %workflow.name,
                lead_id = %lead_id,
                status = %run.status,
                steps = run.steps.len(),
                "Workflow run finished"
            );
            runs.push(run);
        }
        Ok(runs)
    }

    /// Breadth-first walk from the trigger. A node reachable along several
    /// paths runs once; a `Stop` node ends the whole run.
    async fn execute(&self, workflow: &Workflow, mut lead: Lead) -> WorkflowRun {
        let mut run = WorkflowRun {
            id: Uuid::new_v4(),
            workflow_id: workflow.id,
            lead_id: Some(lead.id),
            status: RunStatus::Succeeded,
            steps: Vec::new(),
            error: None,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        };

        let graph = WorkflowGraph::new(&workflow.nodes, &workflow.edges);
        let Some(trigger) = graph.trigger() else {
            run.status = RunStatus::Failed;
            run.error = Some("workflow has no trigger node".into());
            run.finished_at = Utc::now();
            return run;
        };

        let mut queue: VecDeque<&str> = graph.successors(&trigger.id, None).into();
        let mut visited = HashSet::new();
        while let Some(id) = queue.pop_front() {
            if !visited.insert(id) {
                continue;
            }
            let Some(node) = graph.node(id) else { continue };
            if run.steps.len() >= self.max_steps {
                run.status = RunStatus::Failed;
                run.error = Some(format!("step limit of {} reached", self.max_steps));
                break;
            }

            match self.run_node(node, &mut lead).await {
                Ok((outcome, next)) => {
                    debug!(workflow_id = %workflow.id, node = %node.id, outcome = %outcome, "Workflow step");
                    run.steps.push(RunStep {
                        node_id: node.id.clone(),
                        action: node.kind.label().to_string(),
                        outcome,
                    });
                    match next {
                        Next::All => queue.extend(graph.successors(id, None)),
                        Next::Branch(taken) => queue.extend(graph.successors(id, Some(taken))),
                        Next::Halt => break,
                    }
                }
                Err(e) => {
                    warn!(workflow_id = %workflow.id, node = %node.id, error = %e, "Workflow step failed");
                    run.steps.push(RunStep {
                        node_id: node.id.clone(),
                        action: node.kind.label().to_string(),
                        outcome: format!("error: {e}"),
                    });
                    run.status = RunStatus::Failed;
                    run.error = Some(e.to_string());
                    break;
                }
            }
        }

        run.finished_at = Utc::now();
        run
    }

    async fn run_node(&self, node: &WorkflowNode, lead: &mut Lead) -> LeadflowResult<(String, Next)> {
        let result = match &node.kind {
            NodeKind::Trigger => ("noop".to_string(), Next::All),
            NodeKind::Stop => ("stopped".to_string(), Next::Halt),
            NodeKind::Condition { condition } => {
                let taken = condition.evaluate(lead);
                (taken.to_string(), Next::Branch(taken))
            }
            NodeKind::SendMessage { template } => {
                let body = render_template(template, lead);
                (self.executor.send_message(lead, &body).await?, Next::All)
            }
            NodeKind::UpdateStatus { status } => {
                let outcome = self.executor.update_status(lead, *status).await?;
                *lead = self.store.leads.require(lead.id).await?;
                (outcome, Next::All)
            }
            NodeKind::AddTag { tag } => {
                let outcome = self.executor.add_tag(lead, tag).await?;
                *lead = self.store.leads.require(lead.id).await?;
                (outcome, Next::All)
            }
            NodeKind::EnrollInCampaign { campaign_id } => {
                (self.executor.enroll(lead, *campaign_id).await?, Next::All)
            }
        };
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::StoreActionExecutor;
    use leadflow_campaigns::CampaignService;
    use leadflow_channels::RecordingSender;
    use leadflow_core::event_bus::capture_sink;
    use leadflow_core::types::{
        AudienceStatus, Condition, CreateLeadRequest, CreateWorkflowRequest, LeadStatus, StepKind,
        WorkflowEdge, WorkflowTrigger,
    };

    struct Harness {
        store: Store,
        sender: Arc<RecordingSender>,
        engine: WorkflowEngine,
    }

    async fn harness() -> Harness {
        let store = Store::in_memory().await.unwrap();
        let sender = Arc::new(RecordingSender::new());
        let executor = StoreActionExecutor::new(
            store.clone(),
            CampaignService::new(store.clone()),
            sender.clone(),
        );
        let engine = WorkflowEngine::new(store.clone(), Arc::new(executor));
        Harness {
            store,
            sender,
            engine,
        }
    }

    async fn lead(store: &Store, tags: Vec<String>) -> Lead {
        store
            .leads
            .create(CreateLeadRequest {
                name: "Ana Souza".into(),
                phone: "5511900000001".into(),
                email: None,
                status: None,
                source: None,
                tags,
                notes: None,
            })
            .await
            .unwrap()
    }

    fn node(id: &str, kind: NodeKind) -> WorkflowNode {
        WorkflowNode {
            id: id.into(),
            kind,
        }
    }

    fn edge(from: &str, to: &str, branch: Option<bool>) -> WorkflowEdge {
        WorkflowEdge {
            from: from.into(),
            to: to.into(),
            branch,
        }
    }

    async fn active_workflow(
        store: &Store,
        trigger: WorkflowTrigger,
        nodes: Vec<WorkflowNode>,
        edges: Vec<WorkflowEdge>,
    ) -> Workflow {
        let wf = store
            .workflows
            .create(CreateWorkflowRequest {
                name: "wf".into(),
                description: String::new(),
                trigger,
                nodes,
                edges,
            })
            .await
            .unwrap();
        store.workflows.set_active(wf.id, true).await.unwrap();
        store.workflows.require(wf.id).await.unwrap()
    }

    #[tokio::test]
    async fn test_branching_run() {
        let h = harness().await;
        let campaign = h
            .store
            .campaigns
            .create("Nurture", "", &[StepKind::Message { template: "Hi".into() }])
            .await
            .unwrap();
        active_workflow(
            &h.store,
            WorkflowTrigger::LeadCreated,
            vec![
                node("start", NodeKind::Trigger),
                node(
                    "vip?",
                    NodeKind::Condition {
                        condition: Condition::HasTag { tag: "vip".into() },
                    },
                ),
                node("qualify", NodeKind::UpdateStatus { status: LeadStatus::Qualified }),
                node("welcome", NodeKind::SendMessage { template: "Welcome {{first_name}}".into() }),
                node("nurture", NodeKind::EnrollInCampaign { campaign_id: campaign.id }),
            ],
            vec![
                edge("start", "vip?", None),
                edge("vip?", "qualify", Some(true)),
                edge("vip?", "welcome", Some(false)),
                edge("welcome", "nurture", None),
            ],
        )
        .await;

        let sink = capture_sink();
        let engine = h.engine.with_event_sink(sink.clone());

        let plain = lead(&h.store, vec![]).await;
        let runs = engine
            .dispatch(TriggerEvent::LeadCreated { lead_id: plain.id })
            .await
            .unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Succeeded);
        let nodes: Vec<&str> = runs[0].steps.iter().map(|s| s.node_id.as_str()).collect();
        assert_eq!(nodes, vec!["vip?", "welcome", "nurture"]);
        assert_eq!(h.sender.sent()[0].body, "Welcome Ana");
        let member = h.store.audience.find(campaign.id, plain.id).await.unwrap().unwrap();
        assert_eq!(member.status, AudienceStatus::Pending);
        assert_eq!(sink.count_type(EventType::WorkflowRunSucceeded), 1);

        let stored = h.store.workflows.runs(runs[0].workflow_id, 10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].steps.len(), 3);
    }

    #[tokio::test]
    async fn test_condition_sees_earlier_mutations() {
        let h = harness().await;
        active_workflow(
            &h.store,
            WorkflowTrigger::TagAdded { tag: "hot".into() },
            vec![
                node("start", NodeKind::Trigger),
                node("tag", NodeKind::AddTag { tag: "vip".into() }),
                node(
                    "vip?",
                    NodeKind::Condition {
                        condition: Condition::HasTag { tag: "vip".into() },
                    },
                ),
                node("win", NodeKind::UpdateStatus { status: LeadStatus::Won }),
            ],
            vec![
                edge("start", "tag", None),
                edge("tag", "vip?", None),
                edge("vip?", "win", Some(true)),
            ],
        )
        .await;

        let l = lead(&h.store, vec!["hot".into()]).await;
        let runs = h
            .engine
            .dispatch(TriggerEvent::TagAdded {
                lead_id: l.id,
                tag: "hot".into(),
            })
            .await
            .unwrap();
        assert_eq!(runs[0].steps.len(), 3);
        assert_eq!(h.store.leads.require(l.id).await.unwrap().status, LeadStatus::Won);
    }

    #[tokio::test]
    async fn test_stop_halts_and_inactive_or_unmatched_skipped() {
        let h = harness().await;
        let wf = active_workflow(
            &h.store,
            WorkflowTrigger::MessageReceived {
                keyword: Some("price".into()),
            },
            vec![
                node("start", NodeKind::Trigger),
                node("end", NodeKind::Stop),
                node("reply", NodeKind::SendMessage { template: "Our prices".into() }),
            ],
            vec![edge("start", "end", None), edge("start", "reply", None)],
        )
        .await;
        let l = lead(&h.store, vec![]).await;

        let none = h
            .engine
            .dispatch(TriggerEvent::MessageReceived {
                lead_id: l.id,
                body: "hello".into(),
            })
            .await
            .unwrap();
        assert!(none.is_empty());

        let runs = h
            .engine
            .dispatch(TriggerEvent::MessageReceived {
                lead_id: l.id,
                body: "price?".into(),
            })
            .await
            .unwrap();
        assert_eq!(runs[0].steps.len(), 1);
        assert_eq!(runs[0].steps[0].outcome, "stopped");
        assert_eq!(h.sender.sent_count(), 0);

        h.store.workflows.set_active(wf.id, false).await.unwrap();
        let runs = h
            .engine
            .dispatch(TriggerEvent::MessageReceived {
                lead_id: l.id,
                body: "price".into(),
            })
            .await
            .unwrap();
        assert!(runs.is_empty());
    }

    #[tokio::test]
    async fn test_failures_are_recorded() {
        let h = harness().await;
        let wf = active_workflow(
            &h.store,
            WorkflowTrigger::LeadCreated,
            vec![
                node("start", NodeKind::Trigger),
                node("a", NodeKind::AddTag { tag: "a".into() }),
                node("b", NodeKind::AddTag { tag: "b".into() }),
                node("c", NodeKind::AddTag { tag: "c".into() }),
                node("ghost", NodeKind::EnrollInCampaign { campaign_id: Uuid::new_v4() }),
            ],
            vec![
                edge("start", "a", None),
                edge("a", "b", None),
                edge("b", "c", None),
                edge("c", "ghost", None),
            ],
        )
        .await;
        let l = lead(&h.store, vec![]).await;

        let runs = h
            .engine
            .dispatch(TriggerEvent::LeadCreated { lead_id: l.id })
            .await
            .unwrap();
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert!(runs[0].steps[3].outcome.starts_with("error"));

        let store = h.store.clone();
        let bounded = h.engine.with_max_steps(2);
        let runs = bounded
            .dispatch(TriggerEvent::LeadCreated { lead_id: l.id })
            .await
            .unwrap();
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert_eq!(runs[0].steps.len(), 2);
        assert!(runs[0].error.as_deref().unwrap().contains("step limit"));

        assert_eq!(store.workflows.runs(wf.id, 10).await.unwrap().len(), 2);
    }
}
