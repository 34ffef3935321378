//! Investment plan catalogue.
//!
//! Plans are never deleted; `is_active = false` withdraws a plan from sale
//! while current holders keep it.

use ledger_core::{Amount, LedgerError, Plan, PlanId, Result};
use serde::Deserialize;
use sqlx::SqliteConnection;
use tracing::info;

use crate::db::{self, PlanRow, PLAN_COLUMNS};
use crate::errors::{storage_error, unique_violation_as};
use crate::platform::Platform;

#[derive(Debug, Clone, Deserialize)]
pub struct NewPlan {
    pub name: String,
    pub investment_amount: Amount,
    pub daily_return: Amount,
    pub duration_days: i64,
    pub description: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// Partial edit; absent fields keep their value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlanUpdate {
    pub name: Option<String>,
    pub investment_amount: Option<Amount>,
    pub daily_return: Option<Amount>,
    pub duration_days: Option<i64>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
}

pub async fn fetch_plan(conn: &mut SqliteConnection, plan_id: PlanId) -> Result<Plan> {
    let row: Option<PlanRow> = sqlx::query_as(&format!(
        "SELECT {PLAN_COLUMNS} FROM investment_plans WHERE id = ?1"
    ))
    .bind(plan_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(storage_error)?;
    row.ok_or(LedgerError::PlanNotFound(plan_id))?.try_into()
}

async fn list_plans(conn: &mut SqliteConnection, only_active: bool) -> Result<Vec<Plan>> {
    let rows: Vec<PlanRow> = sqlx::query_as(&format!(
        r#"
        SELECT {PLAN_COLUMNS}
        FROM   investment_plans
        WHERE  ?1 = 0 OR is_active = 1
        ORDER  BY investment_amount ASC, id ASC
        "#
    ))
    .bind(only_active)
    .fetch_all(&mut *conn)
    .await
    .map_err(storage_error)?;
    db::convert_all(rows)
}

impl Platform {
    /// Plans open for purchase, cheapest first.
    pub async fn list_active_plans(&self) -> Result<Vec<Plan>> {
        self.store
            .unit_of_work("list_active_plans", |conn| {
                Box::pin(async move { list_plans(conn, true).await })
            })
            .await
    }

    /// Every plan, including withdrawn ones.
    pub async fn list_all_plans(&self) -> Result<Vec<Plan>> {
        self.store
            .unit_of_work("list_all_plans", |conn| {
                Box::pin(async move { list_plans(conn, false).await })
            })
            .await
    }

    pub async fn create_plan(&self, new: NewPlan) -> Result<Plan> {
        let name = new.name.trim().to_string();
        Plan::validate_terms(
            &name,
            new.investment_amount,
            new.daily_return,
            new.duration_days,
        )?;
        let now = db::to_millis(self.clock.now());

        let plan: Plan = self
            .store
            .unit_of_work("create_plan", move |conn| {
                let name = name.clone();
                let new = new.clone();
                Box::pin(async move {
                    let row: PlanRow = sqlx::query_as(&format!(
                        r#"
                        INSERT INTO investment_plans
                            (name, investment_amount, daily_return, duration_days,
                             description, is_active, created_at)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                        RETURNING {PLAN_COLUMNS}
                        "#
                    ))
                    .bind(&name)
                    .bind(new.investment_amount.minor())
                    .bind(new.daily_return.minor())
                    .bind(new.duration_days)
                    .bind(&new.description)
                    .bind(new.is_active)
                    .bind(now)
                    .fetch_one(&mut *conn)
                    .await
                    .map_err(unique_violation_as("a plan with this name already exists"))?;
                    row.try_into()
                })
            })
            .await?;

        info!("Created plan {} ({})", plan.id, plan.name);
        Ok(plan)
    }

    /// Apply a partial edit. Holders of the plan are unaffected.
    pub async fn update_plan(&self, plan_id: PlanId, update: PlanUpdate) -> Result<Plan> {
        let plan: Plan = self
            .store
            .unit_of_work("update_plan", move |conn| {
                let update = update.clone();
                Box::pin(async move {
                    let current = fetch_plan(conn, plan_id).await?;
                    let merged = Plan {
                        id: current.id,
                        name: update
                            .name
                            .map(|n| n.trim().to_string())
                            .unwrap_or(current.name),
                        investment_amount: update
                            .investment_amount
                            .unwrap_or(current.investment_amount),
                        daily_return: update.daily_return.unwrap_or(current.daily_return),
                        duration_days: current.duration_days,
                        description: update.description.or(current.description),
                        is_active: update.is_active.unwrap_or(current.is_active),
                    };
                    let duration = update
                        .duration_days
                        .unwrap_or(i64::from(current.duration_days));
                    Plan::validate_terms(
                        &merged.name,
                        merged.investment_amount,
                        merged.daily_return,
                        duration,
                    )?;

                    let row: PlanRow = sqlx::query_as(&format!(
                        r#"
                        UPDATE investment_plans
                        SET    name = ?1, investment_amount = ?2, daily_return = ?3,
                               duration_days = ?4, description = ?5, is_active = ?6
                        WHERE  id = ?7
                        RETURNING {PLAN_COLUMNS}
                        "#
                    ))
                    .bind(&merged.name)
                    .bind(merged.investment_amount.minor())
                    .bind(merged.daily_return.minor())
                    .bind(duration)
                    .bind(&merged.description)
                    .bind(merged.is_active)
                    .bind(plan_id)
                    .fetch_one(&mut *conn)
                    .await
                    .map_err(unique_violation_as("a plan with this name already exists"))?;
                    row.try_into()
                })
            })
            .await?;

        info!("Updated plan {} (active: {})", plan.id, plan.is_active);
        Ok(plan)
    }
}
