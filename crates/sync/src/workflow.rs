use std::time::Duration;

use serde::{Deserialize, Serialize};

use shelfsync_core::config::SyncConfig;
use shelfsync_core::{
    ActivityCall, ActivityOptions, Payload, RetryPolicy, WorkflowContext, WorkflowDefinition,
    WorkflowResult,
};

use crate::activities::{PushedProduct, FETCH_SHEET_ROWS, MAP_AND_VALIDATE, PUSH_PRODUCT};
use crate::model::{ProductDraft, SheetRow};

pub const SHEETS_TO_STOREFRONT: &str = "sheets_to_storefront";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    Skipped,
    Completed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub outcome: SyncOutcome,
    pub message: String,
    pub synced: usize,
    #[serde(default)]
    pub products: Vec<PushedProduct>,
}

impl SyncReport {
    pub fn skipped() -> Self {
        Self {
            outcome: SyncOutcome::Skipped,
            message: "Sync skipped: No data found.".to_string(),
            synced: 0,
            products: Vec::new(),
        }
    }

    pub fn completed(products: Vec<PushedProduct>) -> Self {
        Self {
            outcome: SyncOutcome::Completed,
            message: format!("Sync complete. Synced {} products.", products.len()),
            synced: products.len(),
            products,
        }
    }
}

/// Activity options for each step of the sync.
#[derive(Clone, Debug, PartialEq)]
pub struct SyncSteps {
    pub fetch: ActivityOptions,
    pub map: ActivityOptions,
    pub push: ActivityOptions,
}

impl Default for SyncSteps {
    fn default() -> Self {
        Self {
            fetch: ActivityOptions::with_timeout(Duration::from_secs(120)),
            map: ActivityOptions::with_timeout(Duration::from_secs(30)),
            push: ActivityOptions::with_timeout(Duration::from_secs(60)).retry_policy(
                RetryPolicy::default()
                    .with_initial_interval(Duration::from_secs(3))
                    .with_maximum_attempts(3),
            ),
        }
    }
}

impl SyncSteps {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            fetch: ActivityOptions::with_timeout(Duration::from_secs(config.fetch_timeout_secs)),
            map: ActivityOptions::with_timeout(Duration::from_secs(config.map_timeout_secs)),
            push: ActivityOptions::with_timeout(Duration::from_secs(config.push_timeout_secs))
                .retry_policy(
                    RetryPolicy::default()
                        .with_initial_interval(Duration::from_secs(config.push_retry_initial_secs))
                        .with_maximum_attempts(config.push_retry_max_attempts),
                ),
        }
    }
}

/// Fetch rows, map them to products, then push every product in parallel.
pub struct SheetsToStorefront {
    steps: SyncSteps,
}

impl SheetsToStorefront {
    pub fn new(steps: SyncSteps) -> Self {
        Self { steps }
    }
}

impl Default for SheetsToStorefront {
    fn default() -> Self {
        Self::new(SyncSteps::default())
    }
}

impl WorkflowDefinition for SheetsToStorefront {
    fn workflow_type(&self) -> &'static str {
        SHEETS_TO_STOREFRONT
    }

    fn run(&self, ctx: &mut WorkflowContext<'_>, _input: &Payload) -> WorkflowResult<Payload> {
        let rows: Vec<SheetRow> = ctx.execute_typed(FETCH_SHEET_ROWS, &(), self.steps.fetch.clone())?;
        if rows.is_empty() {
            return Ok(Payload::encode(&SyncReport::skipped())?);
        }

        let products: Vec<ProductDraft> =
            ctx.execute_typed(MAP_AND_VALIDATE, &rows, self.steps.map.clone())?;

        let pushes = products
            .iter()
            .map(|product| {
                Payload::encode(product)
                    .map(|input| ActivityCall::new(PUSH_PRODUCT, input, self.steps.push.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let pushed = ctx
            .execute_all(pushes)?
            .iter()
            .map(Payload::decode)
            .collect::<Result<Vec<PushedProduct>, _>>()?;

        Ok(Payload::encode(&SyncReport::completed(pushed))?)
    }
}
