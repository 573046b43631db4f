use crate::db::DbPool;
use crate::error::{AgriError, AgriResult};

pub mod batch;
pub mod collection_center;
pub mod farmer;
pub mod packaging_center;
pub mod processing_facility;

/// Django-style ordering parameter: a whitelisted column name, with a
/// leading '-' for descending. Unknown fields fall back to insertion order.
pub(crate) fn order_clause(param: Option<&str>, allowed: &[&str]) -> String {
    if let Some(raw) = param {
        let (field, dir) = match raw.strip_prefix('-') {
            Some(f) => (f, "DESC"),
            None => (raw, "ASC"),
        };
        if allowed.contains(&field) {
            return format!("{} {}", field, dir);
        }
    }
    "id ASC".to_string()
}

/// Candidate human-readable id from the current max rowid. Not race-free on
/// its own; the UNIQUE constraint on the natural id column backstops
/// concurrent allocations and callers retry on a violation.
pub(crate) async fn next_entity_id(pool: &DbPool, table: &str, prefix: &str) -> AgriResult<String> {
    let (max_id,): (i64,) =
        sqlx::query_as(&format!("SELECT COALESCE(MAX(id), 0) FROM {}", table))
            .fetch_one(pool)
            .await?;
    Ok(format!("{}{:03}", prefix, max_id + 1))
}

pub(crate) fn is_unique_violation(err: &AgriError) -> bool {
    match err {
        AgriError::Database(sqlx::Error::Database(db)) => db.is_unique_violation(),
        _ => false,
    }
}

pub(crate) fn require_non_negative(value: f64, field: &str) -> AgriResult<()> {
    if value < 0.0 {
        return Err(AgriError::Validation(format!(
            "{} must be non-negative",
            field
        )));
    }
    Ok(())
}

pub(crate) fn require_non_negative_int(value: Option<i64>, field: &str) -> AgriResult<()> {
    if value.map_or(false, |v| v < 0) {
        return Err(AgriError::Validation(format!(
            "{} must be non-negative",
            field
        )));
    }
    Ok(())
}

pub(crate) fn default_status() -> bool {
    true
}
