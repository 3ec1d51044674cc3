use std::sync::Arc;

use babblefish_config::Settings;
use babblefish_pipeline::{LanguageRegistry, Pipeline};

use crate::room::manager::RoomManager;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub registry: Arc<LanguageRegistry>,
    pub pipeline: Arc<Pipeline>,
    pub rooms: Arc<RoomManager>,
}
