use crate::commands::farmer;
use crate::state::AppState;
use axum::{routing::get, Router};

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/farmers/",
            get(farmer::get_farmer_list).post(farmer::create_farmer),
        )
        .route(
            "/farmers/:farmer_id/",
            get(farmer::get_farmer)
                .patch(farmer::update_farmer)
                .delete(farmer::delete_farmer),
        )
        .route(
            "/farmers/:farmer_id",
            get(farmer::get_farmer)
                .patch(farmer::update_farmer)
                .delete(farmer::delete_farmer),
        )
}
