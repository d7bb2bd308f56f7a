use std::sync::Arc;

use sqlx::PgPool;

use crate::core::config::Settings;
use crate::engine::optical::identity::QrIdentityDecoder;
use crate::engine::optical::OpticalPipeline;
use crate::services::grading_store::{GradingStore, PgGradingStore};

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    db: PgPool,
    pipeline: Arc<OpticalPipeline>,
    store: Arc<dyn GradingStore>,
}

impl AppState {
    pub(crate) fn new(settings: Settings, db: PgPool) -> Self {
        let pipeline = OpticalPipeline::new(QrIdentityDecoder, settings.recognition().clone());
        let store = Arc::new(PgGradingStore::new(db.clone()));
        Self {
            inner: Arc::new(InnerState { settings, db, pipeline: Arc::new(pipeline), store }),
        }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn db(&self) -> &PgPool {
        &self.inner.db
    }

    /// Shared with blocking tasks, hence the extra `Arc`.
    pub(crate) fn pipeline(&self) -> Arc<OpticalPipeline> {
        self.inner.pipeline.clone()
    }

    pub(crate) fn store(&self) -> Arc<dyn GradingStore> {
        self.inner.store.clone()
    }
}
