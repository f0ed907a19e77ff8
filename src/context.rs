use std::sync::Arc;

use crate::{
    database::{BlobStore, Sqlite},
    outside::{HttpTransport, Transport},
    result::Result,
    settings::Settings,
};

/// Everything the requests share: the store, the HTTP transport and the settings.
///
/// Cheap to clone, every request keeps its own copy.
#[derive(Clone)]
pub struct AppContext {
    pub store: Arc<dyn BlobStore>,
    pub transport: Arc<dyn Transport>,
    pub settings: Arc<Settings>,
}

impl AppContext {
    pub fn new(
        store: Arc<dyn BlobStore>,
        transport: Arc<dyn Transport>,
        settings: Settings,
    ) -> Self {
        Self {
            store,
            transport,
            settings: Arc::new(settings),
        }
    }

    /// Open the configured database and build the HTTP client.
    ///
    /// Fails with [crate::result::Error::StorageUnavailable] when the database cannot be used.
    pub fn open(settings: &Settings) -> Result<Self> {
        let store = Sqlite::open(&settings.database)?;
        let transport = HttpTransport::new(settings)?;
        Ok(Self::new(
            Arc::new(store),
            Arc::new(transport),
            settings.clone(),
        ))
    }
}
