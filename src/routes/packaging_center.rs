use crate::commands::packaging_center;
use crate::state::AppState;
use axum::{routing::get, Router};

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/packaging-centers/",
            get(packaging_center::get_packaging_center_list)
                .post(packaging_center::create_packaging_center),
        )
        .route(
            "/packaging-centers/:center_id/",
            get(packaging_center::get_packaging_center)
                .patch(packaging_center::update_packaging_center)
                .delete(packaging_center::delete_packaging_center),
        )
        .route(
            "/packaging-centers/:center_id",
            get(packaging_center::get_packaging_center)
                .patch(packaging_center::update_packaging_center)
                .delete(packaging_center::delete_packaging_center),
        )
}
