use std::sync::Arc;

use anyhow::{Context, Result};
use flume::Sender;

use crate::config::StudioConfig;
use crate::craft::CraftStudio;
use crate::database::StudioDatabase;
use crate::events::StudioEvent;
use crate::interview::categorize::EntryCategorizer;
use crate::interview::InterviewEngine;
use crate::llm_client::{LlmClient, TextCompletion};
use crate::profile::{ExtractionQueue, TraitExtractor};

/// Fully wired backend: one database handle, one LLM client, and the
/// interview/extraction/craft services that share them.
pub struct BackendRuntime {
    pub config: StudioConfig,
    pub db: Arc<StudioDatabase>,
    pub engine: Arc<InterviewEngine>,
    pub craft: Arc<CraftStudio>,
    pub queue: Arc<ExtractionQueue>,
}

impl BackendRuntime {
    pub fn bootstrap(config: StudioConfig, event_tx: Sender<StudioEvent>) -> Result<Self> {
        let db = Arc::new(StudioDatabase::new(&config.database_path).with_context(|| {
            format!("Failed to open database at '{}'", config.database_path)
        })?);

        let llm: Arc<dyn TextCompletion> = Arc::new(LlmClient::new(
            config.llm_api_url.clone(),
            config.llm_api_key.clone().unwrap_or_default(),
            config.llm_model.clone(),
            config.llm_timeout_secs,
        )?);
        tracing::info!(
            "LLM endpoint: {} (model {})",
            config.llm_api_url,
            config.llm_model
        );
        if let Some(model) = &config.extraction_model {
            tracing::info!("Trait extraction uses override model {}", model);
        }

        let extractor = Arc::new(TraitExtractor::new(
            llm.clone(),
            config.extraction_model.clone(),
        ));
        let queue = Arc::new(ExtractionQueue::new(extractor, db.clone(), event_tx.clone()));
        let categorizer = EntryCategorizer::new(llm.clone(), config.extraction_model.clone());

        let engine = Arc::new(InterviewEngine::new(
            llm.clone(),
            categorizer,
            queue.clone(),
            event_tx.clone(),
        ));
        let craft = Arc::new(CraftStudio::new(llm, None, db.clone(), event_tx));

        Ok(BackendRuntime {
            config,
            db,
            engine,
            craft,
            queue,
        })
    }
}
