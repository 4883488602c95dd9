use chrono::Utc;
use leadflow_core::types::{
    CreateWorkflowRequest, RunStep, UpdateWorkflowRequest, Workflow, WorkflowEdge, WorkflowNode,
    WorkflowRun, WorkflowTrigger,
};
use leadflow_core::{LeadflowError, LeadflowResult};
use sqlx::types::Json;
use sqlx::{FromRow, SqlitePool};
use tracing::info;
use uuid::Uuid;

use crate::db::{db_err, from_ms, parse_text, to_ms};

#[derive(Debug, FromRow)]
struct WorkflowRow {
    id: Uuid,
    name: String,
    description: String,
    active: bool,
    trigger: Json<WorkflowTrigger>,
    nodes: Json<Vec<WorkflowNode>>,
    edges: Json<Vec<WorkflowEdge>>,
    created_at: i64,
    updated_at: i64,
}

impl From<WorkflowRow> for Workflow {
    fn from(row: WorkflowRow) -> Self {
        Workflow {
            id: row.id,
            name: row.name,
            description: row.description,
            active: row.active,
            trigger: row.trigger.0,
            nodes: row.nodes.0,
            edges: row.edges.0,
            created_at: from_ms(row.created_at),
            updated_at: from_ms(row.updated_at),
        }
    }
}

#[derive(Debug, FromRow)]
struct RunRow {
    id: Uuid,
    workflow_id: Uuid,
    lead_id: Option<Uuid>,
    status: String,
    steps: Json<Vec<RunStep>>,
    error: Option<String>,
    started_at: i64,
    finished_at: i64,
}

impl TryFrom<RunRow> for WorkflowRun {
    type Error = LeadflowError;

    fn try_from(row: RunRow) -> LeadflowResult<Self> {
        Ok(WorkflowRun {
            id: row.id,
            workflow_id: row.workflow_id,
            lead_id: row.lead_id,
            status: parse_text("workflow_runs.status", &row.status)?,
            steps: row.steps.0,
            error: row.error,
            started_at: from_ms(row.started_at),
            finished_at: from_ms(row.finished_at),
        })
    }
}

const WORKFLOW_COLUMNS: &str =
    "id, name, description, active, trigger, nodes, edges, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct WorkflowRepo {
    pool: SqlitePool,
}

impl WorkflowRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// New workflows start inactive; activation validates the graph.
    pub async fn create(&self, req: CreateWorkflowRequest) -> LeadflowResult<Workflow> {
        let name = req.name.trim().to_string();
        if name.is_empty() {
            return Err(LeadflowError::Validation("workflow name must not be empty".into()));
        }
        let now = Utc::now();
        let workflow = Workflow {
            id: Uuid::new_v4(),
            name,
            description: req.description,
            active: false,
            trigger: req.trigger,
            nodes: req.nodes,
            edges: req.edges,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO workflows (id, name, description, active, trigger, nodes, edges, created_at, updated_at) \
             VALUES (?, ?, ?, 0, ?, ?, ?, ?, ?)",
        )
        .bind(workflow.id)
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(Json(&workflow.trigger))
        .bind(Json(&workflow.nodes))
        .bind(Json(&workflow.edges))
        .bind(to_ms(now))
        .bind(to_ms(now))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        info!(workflow_id = %workflow.id, name = %workflow.name, "Workflow created");
        Ok(workflow)
    }

    pub async fn get(&self, id: Uuid) -> LeadflowResult<Option<Workflow>> {
        let sql = format!("SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE id = ?");
        Ok(sqlx::query_as::<_, WorkflowRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(Workflow::from))
    }

    pub async fn require(&self, id: Uuid) -> LeadflowResult<Workflow> {
        self.get(id)
            .await?
            .ok_or_else(|| LeadflowError::not_found("workflow", id))
    }

    pub async fn list(&self, active_only: bool) -> LeadflowResult<Vec<Workflow>> {
        let sql = if active_only {
            format!("SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE active = 1 ORDER BY created_at ASC")
        } else {
            format!("SELECT {WORKFLOW_COLUMNS} FROM workflows ORDER BY created_at ASC")
        };
        let rows = sqlx::query_as::<_, WorkflowRow>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows.into_iter().map(Workflow::from).collect())
    }

    pub async fn update(&self, id: Uuid, req: UpdateWorkflowRequest) -> LeadflowResult<Workflow> {
        let mut workflow = self.require(id).await?;
        if let Some(name) = req.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(LeadflowError::Validation("workflow name must not be empty".into()));
            }
            workflow.name = name;
        }
        if let Some(description) = req.description {
            workflow.description = description;
        }
        if let Some(trigger) = req.trigger {
            workflow.trigger = trigger;
        }
        if let Some(nodes) = req.nodes {
            workflow.nodes = nodes;
        }
        if let Some(edges) = req.edges {
            workflow.edges = edges;
        }
        workflow.updated_at = Utc::now();

        sqlx::query(
            "UPDATE workflows SET name = ?, description = ?, trigger = ?, nodes = ?, edges = ?, \
             updated_at = ? WHERE id = ?",
        )
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(Json(&workflow.trigger))
        .bind(Json(&workflow.nodes))
        .bind(Json(&workflow.edges))
        .bind(to_ms(workflow.updated_at))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(workflow)
    }

    pub async fn delete(&self, id: Uuid) -> LeadflowResult<bool> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_active(&self, id: Uuid, active: bool) -> LeadflowResult<()> {
        let result = sqlx::query("UPDATE workflows SET active = ?, updated_at = ? WHERE id = ?")
            .bind(active)
            .bind(to_ms(Utc::now()))
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(LeadflowError::not_found("workflow", id));
        }
        Ok(())
    }

    pub async fn record_run(&self, run: &WorkflowRun) -> LeadflowResult<()> {
        sqlx::query(
            "INSERT INTO workflow_runs (id, workflow_id, lead_id, status, steps, error, started_at, finished_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(run.id)
        .bind(run.workflow_id)
        .bind(run.lead_id)
        .bind(run.status.as_str())
        .bind(Json(&run.steps))
        .bind(&run.error)
        .bind(to_ms(run.started_at))
        .bind(to_ms(run.finished_at))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn runs(&self, workflow_id: Uuid, limit: u32) -> LeadflowResult<Vec<WorkflowRun>> {
        let rows = sqlx::query_as::<_, RunRow>(
            "SELECT id, workflow_id, lead_id, status, steps, error, started_at, finished_at \
             FROM workflow_runs WHERE workflow_id = ? ORDER BY started_at DESC LIMIT ?",
        )
        .bind(workflow_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(WorkflowRun::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use leadflow_core::types::{NodeKind, RunStatus};

    fn request() -> CreateWorkflowRequest {
        CreateWorkflowRequest {
            name: "Tag new leads".into(),
            description: String::new(),
            trigger: WorkflowTrigger::LeadCreated,
            nodes: vec![
                WorkflowNode {
                    id: "start".into(),
                    kind: NodeKind::Trigger,
                },
                WorkflowNode {
                    id: "tag".into(),
                    kind: NodeKind::AddTag { tag: "new".into() },
                },
            ],
            edges: vec![WorkflowEdge {
                from: "start".into(),
                to: "tag".into(),
                branch: None,
            }],
        }
    }

    #[tokio::test]
    async fn test_create_round_trips_graph_and_toggles_active() {
        let db = Database::in_memory().await.unwrap();
        let repo = WorkflowRepo::new(db.pool().clone());

        let created = repo.create(request()).await.unwrap();
        assert!(!created.active);
        assert!(repo.list(true).await.unwrap().is_empty());

        repo.set_active(created.id, true).await.unwrap();
        let active = repo.list(true).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].nodes, created.nodes);
        assert_eq!(active[0].trigger, WorkflowTrigger::LeadCreated);

        let updated = repo
            .update(
                created.id,
                UpdateWorkflowRequest {
                    name: Some("Renamed".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "Renamed");
        assert_eq!(updated.edges.len(), 1);
    }

    #[tokio::test]
    async fn test_record_and_list_runs() {
        let db = Database::in_memory().await.unwrap();
        let repo = WorkflowRepo::new(db.pool().clone());
        let workflow = repo.create(request()).await.unwrap();

        let now = Utc::now();
        repo.record_run(&WorkflowRun {
            id: Uuid::new_v4(),
            workflow_id: workflow.id,
            lead_id: None,
            status: RunStatus::Succeeded,
            steps: vec![RunStep {
                node_id: "tag".into(),
                action: "add_tag".into(),
                outcome: "ok".into(),
            }],
            error: None,
            started_at: now,
            finished_at: now,
        })
        .await
        .unwrap();

        let runs = repo.runs(workflow.id, 10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].steps[0].action, "add_tag");

        assert!(repo.delete(workflow.id).await.unwrap());
        assert!(repo.get(workflow.id).await.unwrap().is_none());
    }
}
