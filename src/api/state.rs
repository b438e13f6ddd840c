use std::sync::Arc;

use crate::producer::Producer;
use crate::store::{PayloadStore, ResultStore};

/// Shared handler state; clones share everything.
#[derive(Clone)]
pub struct AppState {
    pub producer: Arc<Producer>,
    pub results: Arc<dyn ResultStore>,
    /// Read by the orphan audit only.
    pub payloads: Arc<dyn PayloadStore>,
}
