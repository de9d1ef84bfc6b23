//! Plan persistence and mutation surface.

use chrono::Utc;
use libsql::Connection;

use crate::error::DatabaseError;
use crate::model::op::OpKind;
use crate::model::plan::{Plan, PlanBlock, PlanDecision, PlanGoal, PlanPhase, PlanStatus};
use crate::store::LocalStore;
use crate::store::db::{db_err, fmt_opt_ts, fmt_ts, json_text, json_vec, parse_datetime};
use crate::store::outbox::enqueue_op;

const PLAN_COLUMNS: &str = "id, title, subtitle, status, start_date, end_date, goals, blocks, \
     phases, decisions, linked_task_ids, created_at, updated_at, deleted_at";

fn status_to_str(status: PlanStatus) -> &'static str {
    match status {
        PlanStatus::Active => "active",
        PlanStatus::Done => "done",
        PlanStatus::Archived => "archived",
    }
}

fn str_to_status(s: &str) -> PlanStatus {
    match s {
        "done" => PlanStatus::Done,
        "archived" => PlanStatus::Archived,
        _ => PlanStatus::Active,
    }
}

fn row_to_plan(row: &libsql::Row) -> Result<Plan, DatabaseError> {
    let goals_text: String = row.get(6).map_err(db_err)?;
    let blocks_text: String = row.get(7).map_err(db_err)?;
    let phases_text: String = row.get(8).map_err(db_err)?;
    let decisions_text: String = row.get(9).map_err(db_err)?;
    let linked_text: String = row.get(10).map_err(db_err)?;
    let created_text: String = row.get(11).map_err(db_err)?;
    let updated_text: String = row.get(12).map_err(db_err)?;
    let deleted_text: Option<String> = row.get::<String>(13).ok();
    Ok(Plan {
        id: row.get(0).map_err(db_err)?,
        title: row.get(1).map_err(db_err)?,
        subtitle: row.get(2).map_err(db_err)?,
        status: str_to_status(&row.get::<String>(3).map_err(db_err)?),
        start_date: row.get(4).map_err(db_err)?,
        end_date: row.get(5).map_err(db_err)?,
        goals: json_vec(&goals_text),
        blocks: json_vec(&blocks_text),
        phases: json_vec(&phases_text),
        decisions: json_vec(&decisions_text),
        linked_task_ids: json_vec(&linked_text),
        created_at: parse_datetime(&created_text),
        updated_at: parse_datetime(&updated_text),
        deleted_at: deleted_text.as_deref().map(parse_datetime),
    })
}

/// Write a full plan row (insert or whole-row replace).
pub(crate) async fn put_plan(conn: &Connection, plan: &Plan) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR REPLACE INTO plans (id, title, subtitle, status, start_date, end_date, goals, \
         blocks, phases, decisions, linked_task_ids, created_at, updated_at, deleted_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        libsql::params![
            plan.id.as_str(),
            plan.title.as_str(),
            plan.subtitle.as_str(),
            status_to_str(plan.status),
            plan.start_date.as_str(),
            plan.end_date.as_str(),
            json_text(&plan.goals)?,
            json_text(&plan.blocks)?,
            json_text(&plan.phases)?,
            json_text(&plan.decisions)?,
            json_text(&plan.linked_task_ids)?,
            fmt_ts(plan.created_at),
            fmt_ts(plan.updated_at),
            fmt_opt_ts(plan.deleted_at)
        ],
    )
    .await
    .map_err(db_err)?;
    Ok(())
}

/// Partial update for a plan. `None` fields are left unchanged.
#[derive(Debug, Default, Clone)]
pub struct PlanPatch {
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub status: Option<PlanStatus>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub goals: Option<Vec<PlanGoal>>,
    pub blocks: Option<Vec<PlanBlock>>,
    pub phases: Option<Vec<PlanPhase>>,
    pub decisions: Option<Vec<PlanDecision>>,
    pub linked_task_ids: Option<Vec<String>>,
}

impl LocalStore {
    /// Create a plan with the placeholder title.
    pub async fn create_plan(&self) -> Result<Plan, DatabaseError> {
        let plan = Plan::new();
        self.persist_plan(&plan, OpKind::Create).await?;
        Ok(plan)
    }

    /// Fetch a live plan.
    pub async fn get_plan(&self, id: &str) -> Result<Option<Plan>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {PLAN_COLUMNS} FROM plans WHERE id = ?1 AND deleted_at IS NULL"),
                libsql::params![id],
            )
            .await
            .map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_plan(&row)?)),
            None => Ok(None),
        }
    }

    pub(crate) async fn load_plan_any(&self, id: &str) -> Result<Option<Plan>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {PLAN_COLUMNS} FROM plans WHERE id = ?1"),
                libsql::params![id],
            )
            .await
            .map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_plan(&row)?)),
            None => Ok(None),
        }
    }

    /// All live plans, most recently updated first.
    pub async fn list_plans(&self) -> Result<Vec<Plan>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {PLAN_COLUMNS} FROM plans WHERE deleted_at IS NULL \
                     ORDER BY updated_at DESC"
                ),
                (),
            )
            .await
            .map_err(db_err)?;
        let mut plans = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            plans.push(row_to_plan(&row)?);
        }
        Ok(plans)
    }

    /// Apply a partial update.
    pub async fn update_plan(
        &self,
        id: &str,
        patch: PlanPatch,
    ) -> Result<Option<Plan>, DatabaseError> {
        let Some(mut plan) = self.get_plan(id).await? else {
            return Ok(None);
        };
        if let Some(title) = patch.title {
            plan.title = title;
        }
        if let Some(subtitle) = patch.subtitle {
            plan.subtitle = subtitle;
        }
        if let Some(status) = patch.status {
            plan.status = status;
        }
        if let Some(start_date) = patch.start_date {
            plan.start_date = start_date;
        }
        if let Some(end_date) = patch.end_date {
            plan.end_date = end_date;
        }
        if let Some(goals) = patch.goals {
            plan.goals = goals;
        }
        if let Some(blocks) = patch.blocks {
            plan.blocks = blocks;
        }
        if let Some(phases) = patch.phases {
            plan.phases = phases;
        }
        if let Some(decisions) = patch.decisions {
            plan.decisions = decisions;
        }
        if let Some(linked) = patch.linked_task_ids {
            plan.linked_task_ids = linked;
        }
        plan.updated_at = Utc::now();
        self.persist_plan(&plan, OpKind::Update).await?;
        Ok(Some(plan))
    }

    /// Soft-delete a plan.
    pub async fn delete_plan(&self, id: &str) -> Result<(), DatabaseError> {
        let now_text = fmt_ts(Utc::now());
        let marker = serde_json::json!({ "updatedAt": now_text });
        let tx = self.conn().transaction().await.map_err(db_err)?;
        tx.execute(
            "UPDATE plans SET deleted_at = ?1, updated_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
            libsql::params![now_text.as_str(), id],
        )
        .await
        .map_err(db_err)?;
        enqueue_op(&tx, "plan", id, OpKind::Delete, &marker).await?;
        tx.commit().await.map_err(db_err)?;
        self.notify_outbox();
        Ok(())
    }

    pub(crate) async fn persist_plan(&self, plan: &Plan, op: OpKind) -> Result<(), DatabaseError> {
        let payload = serde_json::to_value(plan)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let tx = self.conn().transaction().await.map_err(db_err)?;
        put_plan(&tx, plan).await?;
        enqueue_op(&tx, "plan", &plan.id, op, &payload).await?;
        tx.commit().await.map_err(db_err)?;
        self.notify_outbox();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::op::OpKind;
    use crate::model::plan::PlanPhaseStatus;

    #[tokio::test]
    async fn plan_lifecycle_enqueues_ops() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let plan = store.create_plan().await.unwrap();
        assert_eq!(plan.title, "Novo planejamento");

        let updated = store
            .update_plan(
                &plan.id,
                PlanPatch {
                    title: Some("2026 strategy".into()),
                    phases: Some(vec![PlanPhase {
                        id: "p1".into(),
                        title: "Research".into(),
                        start_date: String::new(),
                        end_date: String::new(),
                        status: PlanPhaseStatus::Active,
                    }]),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.title, "2026 strategy");
        assert_eq!(updated.phases.len(), 1);

        store.delete_plan(&plan.id).await.unwrap();
        assert!(store.get_plan(&plan.id).await.unwrap().is_none());

        let ops = store.pending_ops().await.unwrap();
        let kinds: Vec<_> = ops.iter().map(|o| (o.entity_type.as_str(), o.op_type)).collect();
        assert_eq!(
            kinds,
            vec![
                ("plan", OpKind::Create),
                ("plan", OpKind::Update),
                ("plan", OpKind::Delete)
            ]
        );
    }

    #[tokio::test]
    async fn goals_roundtrip_through_json_columns() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let plan = store.create_plan().await.unwrap();
        store
            .update_plan(
                &plan.id,
                PlanPatch {
                    goals: Some(vec![PlanGoal {
                        id: "g1".into(),
                        label: "MRR".into(),
                        current_value: 30.0,
                        target_value: 50.0,
                        unit: "k".into(),
                    }]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let loaded = store.get_plan(&plan.id).await.unwrap().unwrap();
        assert_eq!(loaded.goals.len(), 1);
        assert_eq!(loaded.goals[0].label, "MRR");
        assert_eq!(loaded.goals[0].target_value, 50.0);
    }
}
