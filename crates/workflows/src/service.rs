use leadflow_core::types::{CreateWorkflowRequest, UpdateWorkflowRequest, Workflow, WorkflowRun};
use leadflow_core::LeadflowResult;
use leadflow_store::Store;
use tracing::info;
use uuid::Uuid;

use crate::graph::validate;

/// CRUD and activation for workflow definitions. Drafts may be saved in any
/// shape; a graph must validate before it can be activated, and an active
/// workflow can only be replaced by one that still validates.
#[derive(Clone)]
pub struct WorkflowService {
    store: Store,
}

impl WorkflowService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn create(&self, req: CreateWorkflowRequest) -> LeadflowResult<Workflow> {
        let workflow = self.store.workflows.create(req).await?;
        info!(workflow_id = %workflow.id, name = %workflow.name, "Workflow created");
        Ok(workflow)
    }

    pub async fn get(&self, id: Uuid) -> LeadflowResult<Workflow> {
        self.store.workflows.require(id).await
    }

    pub async fn list(&self, active_only: bool) -> LeadflowResult<Vec<Workflow>> {
        self.store.workflows.list(active_only).await
    }

    pub async fn update(&self, id: Uuid, req: UpdateWorkflowRequest) -> LeadflowResult<Workflow> {
        let current = self.store.workflows.require(id).await?;
        if current.active {
            let mut candidate = current;
            if let Some(trigger) = &req.trigger {
                candidate.trigger = trigger.clone();
            }
            if let Some(nodes) = &req.nodes {
                candidate.nodes = nodes.clone();
            }
            if let Some(edges) = &req.edges {
                candidate.edges = edges.clone();
            }
            validate(&candidate)?;
        }
        self.store.workflows.update(id, req).await
    }

    pub async fn delete(&self, id: Uuid) -> LeadflowResult<bool> {
        let deleted = self.store.workflows.delete(id).await?;
        if deleted {
            info!(workflow_id = %id, "Workflow deleted");
        }
        Ok(deleted)
    }

    pub async fn activate(&self, id: Uuid) -> LeadflowResult<Workflow> {
        let workflow = self.store.workflows.require(id).await?;
        validate(&workflow)?;
        self.store.workflows.set_active(id, true).await?;
        info!(workflow_id = %id, "Workflow activated");
        self.store.workflows.require(id).await
    }

    pub async fn deactivate(&self, id: Uuid) -> LeadflowResult<Workflow> {
        self.store.workflows.set_active(id, false).await?;
        info!(workflow_id = %id, "Workflow deactivated");
        self.store.workflows.require(id).await
    }

    pub async fn runs(&self, id: Uuid, limit: u32) -> LeadflowResult<Vec<WorkflowRun>> {
        self.store.workflows.require(id).await?;
        self.store.workflows.runs(id, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadflow_core::types::{NodeKind, WorkflowEdge, WorkflowNode, WorkflowTrigger};
    use leadflow_core::LeadflowError;

    fn request() -> CreateWorkflowRequest {
        CreateWorkflowRequest {
            name: "Greet".into(),
            description: String::new(),
            trigger: WorkflowTrigger::LeadCreated,
            nodes: vec![
                WorkflowNode {
                    id: "start".into(),
                    kind: NodeKind::Trigger,
                },
                WorkflowNode {
                    id: "hi".into(),
                    kind: NodeKind::SendMessage {
                        template: "Hi {{first_name}}".into(),
                    },
                },
            ],
            edges: vec![WorkflowEdge {
                from: "start".into(),
                to: "hi".into(),
                branch: None,
            }],
        }
    }

    #[tokio::test]
    async fn test_activation_requires_valid_graph() {
        let service = WorkflowService::new(Store::in_memory().await.unwrap());
        let mut req = request();
        req.edges.clear();
        let draft = service.create(req).await.unwrap();
        assert!(!draft.active);

        let err = service.activate(draft.id).await.unwrap_err();
        assert!(matches!(err, LeadflowError::Validation(_)));

        let fixed = service
            .update(
                draft.id,
                UpdateWorkflowRequest {
                    edges: Some(request().edges),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(fixed.edges.len(), 1);
        assert!(service.activate(draft.id).await.unwrap().active);
        assert_eq!(service.list(true).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_active_workflow_rejects_broken_update() {
        let service = WorkflowService::new(Store::in_memory().await.unwrap());
        let wf = service.create(request()).await.unwrap();
        service.activate(wf.id).await.unwrap();

        let err = service
            .update(
                wf.id,
                UpdateWorkflowRequest {
                    edges: Some(vec![]),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LeadflowError::Validation(_)));

        let renamed = service
            .update(
                wf.id,
                UpdateWorkflowRequest {
                    name: Some("Greet v2".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.name, "Greet v2");

        assert!(!service.deactivate(wf.id).await.unwrap().active);
        assert!(service.runs(wf.id, 10).await.unwrap().is_empty());
        assert!(service.delete(wf.id).await.unwrap());
        assert!(matches!(
            service.get(wf.id).await.unwrap_err(),
            LeadflowError::NotFound { .. }
        ));
    }
}
