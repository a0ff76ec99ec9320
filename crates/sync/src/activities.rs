use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use shelfsync_core::{
    decode_input, encode_output, Activity, ActivityContext, ActivityError, Payload,
};

use crate::model::{rows_from_cells, ProductDraft, SheetRow};
use crate::sink::{Storefront, StorefrontError};
use crate::source::{SheetSource, SourceError};

pub const FETCH_SHEET_ROWS: &str = "fetch_sheet_rows";
pub const MAP_AND_VALIDATE: &str = "map_and_validate";
pub const PUSH_PRODUCT: &str = "push_product";

fn source_failure(error: SourceError) -> ActivityError {
    if error.is_retryable() {
        ActivityError::retryable(error.kind(), error.to_string())
    } else {
        ActivityError::non_retryable(error.kind(), error.to_string())
    }
}

fn storefront_failure(error: StorefrontError) -> ActivityError {
    if error.is_retryable() {
        ActivityError::retryable(error.kind(), error.to_string())
    } else {
        ActivityError::non_retryable(error.kind(), error.to_string())
    }
}

pub struct FetchSheetRows {
    source: Arc<dyn SheetSource>,
}

impl FetchSheetRows {
    pub fn new(source: Arc<dyn SheetSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Activity for FetchSheetRows {
    fn activity_type(&self) -> &'static str {
        FETCH_SHEET_ROWS
    }

    async fn execute(&self, ctx: ActivityContext, _input: Payload) -> Result<Payload, ActivityError> {
        info!(
            event_name = "sync.fetch.started",
            workflow_id = %ctx.workflow_id,
            source = %self.source.describe(),
            attempt = ctx.attempt,
            "fetching rows from sheet"
        );
        let cells = self.source.fetch_rows().await.map_err(source_failure)?;
        let rows = rows_from_cells(&cells);
        info!(
            event_name = "sync.fetch.completed",
            workflow_id = %ctx.workflow_id,
            rows = rows.len(),
            skipped = cells.len() - rows.len(),
            "fetched rows from sheet"
        );
        encode_output(&rows)
    }
}

pub struct MapAndValidate;

#[async_trait]
impl Activity for MapAndValidate {
    fn activity_type(&self) -> &'static str {
        MAP_AND_VALIDATE
    }

    async fn execute(&self, ctx: ActivityContext, input: Payload) -> Result<Payload, ActivityError> {
        let rows: Vec<SheetRow> = decode_input(&input)?;
        let products = rows
            .iter()
            .map(ProductDraft::from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|error| ActivityError::non_retryable("validation_failed", error.to_string()))?;
        info!(
            event_name = "sync.map.completed",
            workflow_id = %ctx.workflow_id,
            products = products.len(),
            "mapped and validated products"
        );
        encode_output(&products)
    }
}

/// What a successful push reports back to the workflow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushedProduct {
    pub title: String,
    pub product_id: String,
}

pub struct PushProduct {
    storefront: Arc<dyn Storefront>,
    outage_keyword: Option<String>,
}

impl PushProduct {
    pub fn new(storefront: Arc<dyn Storefront>) -> Self {
        Self { storefront, outage_keyword: None }
    }

    /// Titles containing `keyword` (case-insensitive) fail their first attempt.
    pub fn with_outage_keyword(mut self, keyword: Option<String>) -> Self {
        self.outage_keyword = keyword.map(|keyword| keyword.to_lowercase());
        self
    }

    fn simulates_outage(&self, title: &str, attempt: u32) -> bool {
        attempt == 1
            && self
                .outage_keyword
                .as_deref()
                .map(|keyword| title.to_lowercase().contains(keyword))
                .unwrap_or(false)
    }
}

#[async_trait]
impl Activity for PushProduct {
    fn activity_type(&self) -> &'static str {
        PUSH_PRODUCT
    }

    async fn execute(&self, ctx: ActivityContext, input: Payload) -> Result<Payload, ActivityError> {
        let product: ProductDraft = decode_input(&input)?;
        info!(
            event_name = "sync.push.started",
            workflow_id = %ctx.workflow_id,
            title = %product.title,
            attempt = ctx.attempt,
            storefront = self.storefront.name(),
            "pushing product"
        );

        if self.simulates_outage(&product.title, ctx.attempt) {
            error!(
                event_name = "sync.push.simulated_outage",
                workflow_id = %ctx.workflow_id,
                title = %product.title,
                attempt = ctx.attempt,
                "simulating a temporary storefront failure"
            );
            return Err(storefront_failure(StorefrontError::Outage(
                "Simulating a temporary API outage".to_string(),
            )));
        }

        let product_id =
            self.storefront.create_product(&product).await.map_err(storefront_failure)?;
        info!(
            event_name = "sync.push.completed",
            workflow_id = %ctx.workflow_id,
            title = %product.title,
            product_id = %product_id,
            attempt = ctx.attempt,
            "product pushed"
        );
        encode_output(&PushedProduct { title: product.title, product_id })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use shelfsync_core::{
        Activity, ActivityContext, ActivityTaskId, CommandId, Payload, WorkflowId,
    };

    use super::{FetchSheetRows, MapAndValidate, PushProduct, PushedProduct};
    use crate::model::{ProductDraft, SheetRow};
    use crate::sink::InMemoryStorefront;
    use crate::source::StaticSheetSource;

    fn ctx(activity_type: &str, attempt: u32) -> ActivityContext {
        ActivityContext {
            task_id: ActivityTaskId("run-1:1".to_string()),
            workflow_id: WorkflowId::from("wf-activities"),
            command_id: CommandId(1),
            activity_type: activity_type.to_string(),
            attempt,
        }
    }

    #[tokio::test]
    async fn fetch_drops_short_rows() {
        let source = StaticSheetSource::new(vec![
            vec!["Blue Mug".to_string(), "12.50".to_string()],
            vec!["Orphan".to_string()],
        ]);
        let activity = FetchSheetRows::new(Arc::new(source));

        let output = activity.execute(ctx("fetch_sheet_rows", 1), Payload::empty()).await.expect("fetch");
        let rows: Vec<SheetRow> = output.decode().expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].title, "Blue Mug");
    }

    #[tokio::test]
    async fn invalid_rows_fail_mapping_without_retry() {
        let input = Payload::from(json!([
            { "title": "Blue Mug", "price": "12.50" },
            { "title": "Broken", "price": "n/a" },
        ]));
        let error = MapAndValidate
            .execute(ctx("map_and_validate", 1), input)
            .await
            .expect_err("invalid price");
        assert_eq!(error.kind, "validation_failed");
        assert!(!error.retryable);
        assert!(error.message.contains("Broken"));
    }

    #[tokio::test]
    async fn malformed_input_is_rejected() {
        let error = MapAndValidate
            .execute(ctx("map_and_validate", 1), Payload::from(json!({ "rows": 3 })))
            .await
            .expect_err("not a list");
        assert!(!error.retryable);
    }

    #[tokio::test(start_paused = true)]
    async fn outage_keyword_fails_only_the_first_attempt() {
        let storefront = Arc::new(InMemoryStorefront::new(Duration::from_secs(1)));
        let activity = PushProduct::new(storefront.clone()).with_outage_keyword(Some("CRASH".to_string()));
        let product = Payload::encode(
            &ProductDraft::from_row(&SheetRow {
                title: "Crash Test Dummy".to_string(),
                price: "9.99".to_string(),
            })
            .expect("valid"),
        )
        .expect("encode");

        let first = activity
            .execute(ctx("push_product", 1), product.clone())
            .await
            .expect_err("simulated outage");
        assert!(first.retryable);
        assert_eq!(first.kind, "storefront_outage");
        assert!(storefront.is_empty().await);

        let second = activity.execute(ctx("push_product", 2), product).await.expect("retry succeeds");
        let pushed: PushedProduct = second.decode().expect("receipt");
        assert_eq!(pushed.title, "Crash Test Dummy");
        assert_eq!(storefront.len().await, 1);
    }
}
