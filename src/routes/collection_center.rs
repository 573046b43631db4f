use crate::commands::collection_center;
use crate::state::AppState;
use axum::{routing::get, Router};

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/collection-centers/",
            get(collection_center::get_collection_center_list)
                .post(collection_center::create_collection_center),
        )
        .route(
            "/collection-centers/:center_id/",
            get(collection_center::get_collection_center)
                .patch(collection_center::update_collection_center)
                .delete(collection_center::delete_collection_center),
        )
        .route(
            "/collection-centers/:center_id",
            get(collection_center::get_collection_center)
                .patch(collection_center::update_collection_center)
                .delete(collection_center::delete_collection_center),
        )
}
