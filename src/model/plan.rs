//! Plan data model — long-running initiatives with goals, phases, and
//! decisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Plan lifecycle status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    #[default]
    Active,
    Done,
    Archived,
}

/// Status of a single phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanPhaseStatus {
    #[default]
    Planned,
    Active,
    Done,
}

/// A numeric goal tracked by the plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanGoal {
    pub id: String,
    pub label: String,
    pub current_value: f64,
    pub target_value: f64,
    #[serde(default)]
    pub unit: String,
}

/// A free-text block of the plan document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanBlock {
    pub id: String,
    pub title: String,
    pub body: String,
}

/// A dated execution phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanPhase {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub start_date: String,
    #[serde(default)]
    pub end_date: String,
    #[serde(default)]
    pub status: PlanPhaseStatus,
}

/// A recorded decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanDecision {
    pub id: String,
    pub summary: String,
    /// `YYYY-MM-DD` of when the decision was made.
    #[serde(default)]
    pub decided_at: String,
}

/// A long-running plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub subtitle: String,
    pub status: PlanStatus,
    /// `YYYY-MM-DD` or empty.
    #[serde(default)]
    pub start_date: String,
    #[serde(default)]
    pub end_date: String,
    #[serde(default)]
    pub goals: Vec<PlanGoal>,
    #[serde(default)]
    pub blocks: Vec<PlanBlock>,
    #[serde(default)]
    pub phases: Vec<PlanPhase>,
    #[serde(default)]
    pub decisions: Vec<PlanDecision>,
    #[serde(default)]
    pub linked_task_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Plan {
    /// Create a plan with the default placeholder title.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: "Novo planejamento".to_string(),
            subtitle: String::new(),
            status: PlanStatus::Active,
            start_date: String::new(),
            end_date: String::new(),
            goals: Vec::new(),
            blocks: Vec::new(),
            phases: Vec::new(),
            decisions: Vec::new(),
            linked_task_ids: Vec::new(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

impl Default for Plan {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_plan_defaults() {
        let plan = Plan::new();
        assert_eq!(plan.status, PlanStatus::Active);
        assert!(plan.goals.is_empty());
        assert!(plan.phases.is_empty());
        assert!(plan.deleted_at.is_none());
    }

    #[test]
    fn plan_serde_roundtrip() {
        let mut plan = Plan::new();
        plan.goals.push(PlanGoal {
            id: "g1".into(),
            label: "MRR".into(),
            current_value: 30.0,
            target_value: 50.0,
            unit: "k".into(),
        });
        plan.phases.push(PlanPhase {
            id: "p1".into(),
            title: "Research".into(),
            start_date: String::new(),
            end_date: String::new(),
            status: PlanPhaseStatus::Active,
        });

        let json = serde_json::to_string(&plan).unwrap();
        assert!(json.contains("\"currentValue\":30.0"));
        assert!(json.contains("\"linkedTaskIds\":[]"));

        let parsed: Plan = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.goals.len(), 1);
        assert_eq!(parsed.phases[0].status, PlanPhaseStatus::Active);
    }
}
