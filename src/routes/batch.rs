use crate::commands::batch;
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/batches/",
            get(batch::get_batch_list).post(batch::create_batch),
        )
        .route("/generate-batch-number/", post(batch::generate_batch_number))
        .route(
            "/batches/search/batch_number",
            post(batch::search_batch_by_number),
        )
        // Batch numbers embed slashes (KE/2024/001), so detail lookups take
        // the remainder of the path.
        .route(
            "/batches/*batch_number",
            get(batch::get_batch)
                .patch(batch::update_batch)
                .delete(batch::delete_batch),
        )
}
