use crate::commands::processing_facility;
use crate::state::AppState;
use axum::{routing::get, Router};

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/processing-facilities/",
            get(processing_facility::get_processing_facility_list)
                .post(processing_facility::create_processing_facility),
        )
        .route(
            "/processing-facilities/:facility_id/",
            get(processing_facility::get_processing_facility)
                .patch(processing_facility::update_processing_facility)
                .delete(processing_facility::delete_processing_facility),
        )
        .route(
            "/processing-facilities/:facility_id",
            get(processing_facility::get_processing_facility)
                .patch(processing_facility::update_processing_facility)
                .delete(processing_facility::delete_processing_facility),
        )
}
