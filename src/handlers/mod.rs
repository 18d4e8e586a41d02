pub mod common;
pub mod management;
pub mod parts;
pub mod reports;
pub mod tracking;
pub mod users;

use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::events::EventBroadcaster;
use crate::services::{
    drawings::DrawingStore, management::ManagementService, notes::NoteService,
    parts::PartService, queries::QueryService, reports::ReportService, users::UserService,
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub parts: Arc<PartService>,
    pub queries: Arc<QueryService>,
    pub management: Arc<ManagementService>,
    pub users: Arc<UserService>,
    pub notes: Arc<NoteService>,
    pub reports: Arc<ReportService>,
}

impl AppServices {
    pub fn new(db: Arc<DatabaseConnection>, events: EventBroadcaster, config: &AppConfig) -> Self {
        let public_base_url = config.public_base_url();
        Self {
            parts: Arc::new(PartService::new(
                db.clone(),
                events,
                DrawingStore::new(config.drawings_dir()),
                public_base_url.clone(),
            )),
            queries: Arc::new(QueryService::new(db.clone(), public_base_url)),
            management: Arc::new(ManagementService::new(db.clone())),
            users: Arc::new(UserService::new(db.clone())),
            notes: Arc::new(NoteService::new(db.clone())),
            reports: Arc::new(ReportService::new(db)),
        }
    }
}
