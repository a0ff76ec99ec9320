//! Sheets-to-storefront product sync built on the durable engine.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use shelfsync_core::config::{SheetSourceKind, StorefrontKind, SyncConfig};
use shelfsync_core::{ActivityRegistry, WorkflowRegistry};

pub mod activities;
pub mod model;
pub mod sink;
pub mod source;
pub mod workflow;

pub use activities::{FetchSheetRows, MapAndValidate, PushProduct, PushedProduct};
pub use model::{ProductDraft, ProductStatus, SheetRow, ValidationError, Variant};
pub use sink::{InMemoryStorefront, ShopifyStorefront, Storefront, StorefrontError};
pub use source::{JsonFileSheetSource, SheetSource, SheetsApiSource, SourceError, StaticSheetSource};
pub use workflow::{SheetsToStorefront, SyncOutcome, SyncReport, SyncSteps, SHEETS_TO_STOREFRONT};

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("sheet source `{0}` is missing required setting `{1}`")]
    MissingSourceSetting(&'static str, &'static str),
    #[error("storefront `{0}` is missing required setting `{1}`")]
    MissingStorefrontSetting(&'static str, &'static str),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Storefront(#[from] StorefrontError),
}

pub fn sheet_source(config: &SyncConfig) -> Result<Arc<dyn SheetSource>, SetupError> {
    match config.source {
        SheetSourceKind::File => Ok(Arc::new(JsonFileSheetSource::new(config.sheet_path.clone()))),
        SheetSourceKind::SheetsApi => {
            let spreadsheet_id = config
                .spreadsheet_id
                .clone()
                .ok_or(SetupError::MissingSourceSetting("sheets_api", "spreadsheet_id"))?;
            let api_key = config
                .sheets_api_key
                .clone()
                .ok_or(SetupError::MissingSourceSetting("sheets_api", "sheets_api_key"))?;
            let source = SheetsApiSource::new(
                &config.sheets_base_url,
                spreadsheet_id,
                config.sheet_range.clone(),
                api_key,
                Duration::from_secs(config.fetch_timeout_secs),
            )?;
            Ok(Arc::new(source))
        }
    }
}

pub fn storefront(config: &SyncConfig) -> Result<Arc<dyn Storefront>, SetupError> {
    match config.storefront {
        StorefrontKind::Memory => {
            Ok(Arc::new(InMemoryStorefront::new(Duration::from_millis(config.memory_latency_ms))))
        }
        StorefrontKind::Shopify => {
            let base_url = config
                .storefront_base_url
                .as_deref()
                .ok_or(SetupError::MissingStorefrontSetting("shopify", "storefront_base_url"))?;
            let access_token = config
                .storefront_access_token
                .clone()
                .ok_or(SetupError::MissingStorefrontSetting("shopify", "storefront_access_token"))?;
            let storefront = ShopifyStorefront::new(
                base_url,
                config.storefront_api_version.clone(),
                access_token,
                Duration::from_secs(config.push_timeout_secs),
            )?;
            Ok(Arc::new(storefront))
        }
    }
}

pub fn workflow_registry(config: &SyncConfig) -> WorkflowRegistry {
    WorkflowRegistry::new().with(Arc::new(SheetsToStorefront::new(SyncSteps::from_config(config))))
}

pub fn activity_registry(
    source: Arc<dyn SheetSource>,
    storefront: Arc<dyn Storefront>,
    outage_keyword: Option<String>,
) -> ActivityRegistry {
    ActivityRegistry::new()
        .with(Arc::new(FetchSheetRows::new(source)))
        .with(Arc::new(MapAndValidate))
        .with(Arc::new(PushProduct::new(storefront).with_outage_keyword(outage_keyword)))
}

/// Both registries for a worker, with adapters chosen by `config`.
pub fn registries(config: &SyncConfig) -> Result<(WorkflowRegistry, ActivityRegistry), SetupError> {
    let activities =
        activity_registry(sheet_source(config)?, storefront(config)?, config.outage_keyword.clone());
    Ok((workflow_registry(config), activities))
}
