use crate::state::AppState;
use axum::Router;

pub mod batch;
pub mod collection_center;
pub mod farmer;
pub mod packaging_center;
pub mod processing_facility;

pub fn create_router() -> Router<AppState> {
    Router::new()
        .merge(farmer::router())
        .merge(collection_center::router())
        .merge(processing_facility::router())
        .merge(packaging_center::router())
        .merge(batch::router())
}
