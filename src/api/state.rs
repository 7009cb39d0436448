use std::sync::Arc;

use tokio::sync::Mutex;

use crate::alerts::IdemStore;
use crate::chat::retriever::DocRetriever;
use crate::chat::router::EmbeddingCache;
use crate::config::Settings;
use crate::llm::LmClient;

use super::db::Db;

/// Process-wide service aggregate, constructed once at startup and passed
/// explicitly. The trait-object fields (`idem`, `retriever`) are the
/// seams tests swap out.
#[derive(Clone)]
pub struct AppState {
    pub inner: Arc<AppStateInner>,
}

pub struct AppStateInner {
    pub db: Db,
    pub settings: Settings,
    pub llm: LmClient,
    pub idem: Box<dyn IdemStore>,
    pub retriever: Box<dyn DocRetriever>,
    /// Exemplar embeddings for the router, immutable once computed.
    pub embedding_cache: Mutex<EmbeddingCache>,
}

impl AppState {
    pub fn new(
        db: Db,
        settings: Settings,
        idem: Box<dyn IdemStore>,
        retriever: Box<dyn DocRetriever>,
    ) -> Self {
        let llm = LmClient::new(&settings);
        Self {
            inner: Arc::new(AppStateInner {
                db,
                settings,
                llm,
                idem,
                retriever,
                embedding_cache: Mutex::new(EmbeddingCache::default()),
            }),
        }
    }
}
