use crate::commands::{
    default_status, is_unique_violation, next_entity_id, order_clause, require_non_negative,
};
use crate::db::{CollectionCenter, DbPool, DryingMethod};
use crate::error::{AgriError, AgriResult};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State as AxumState},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use sqlx::{QueryBuilder, Sqlite};

#[derive(Debug, Deserialize)]
pub struct CollectionCenterInput {
    pub center_id: Option<String>,
    pub name: String,
    pub location: String,
    pub coordinates: Option<String>,
    pub manager: Option<String>,
    pub contact: Option<String>,
    pub drying_method: DryingMethod,
    pub capacity: f64,
    #[serde(default = "default_status")]
    pub status: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct CollectionCenterUpdate {
    pub center_id: Option<String>,
    pub name: Option<String>,
    pub location: Option<String>,
    pub coordinates: Option<String>,
    pub manager: Option<String>,
    pub contact: Option<String>,
    pub drying_method: Option<DryingMethod>,
    pub capacity: Option<f64>,
    pub status: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CollectionCenterListQuery {
    pub drying_method: Option<DryingMethod>,
    pub status: Option<bool>,
    pub search: Option<String>,
    pub ordering: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn get_collection_center_list_internal(
    pool: &DbPool,
    q: &CollectionCenterListQuery,
) -> AgriResult<Vec<CollectionCenter>> {
    let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM collection_centers WHERE 1=1");
    if let Some(method) = q.drying_method {
        qb.push(" AND drying_method = ").push_bind(method);
    }
    if let Some(status) = q.status {
        qb.push(" AND status = ").push_bind(status);
    }
    if let Some(term) = &q.search {
        let pattern = format!("%{}%", term);
        qb.push(" AND (name LIKE ")
            .push_bind(pattern.clone())
            .push(" OR center_id LIKE ")
            .push_bind(pattern.clone())
            .push(" OR location LIKE ")
            .push_bind(pattern)
            .push(")");
    }
    qb.push(" ORDER BY ")
        .push(order_clause(q.ordering.as_deref(), &["name", "capacity"]));
    if let Some(limit) = q.limit {
        qb.push(" LIMIT ").push_bind(limit);
        if let Some(offset) = q.offset {
            qb.push(" OFFSET ").push_bind(offset);
        }
    }

    Ok(qb
        .build_query_as::<CollectionCenter>()
        .fetch_all(pool)
        .await?)
}

pub async fn create_collection_center_internal(
    pool: &DbPool,
    input: CollectionCenterInput,
) -> AgriResult<CollectionCenter> {
    require_non_negative(input.capacity, "capacity")?;

    let explicit_id = input.center_id.clone().filter(|v| !v.is_empty());
    let now = Utc::now().naive_utc();

    let mut attempt = 0;
    loop {
        let center_id = match &explicit_id {
            Some(v) => v.clone(),
            None => next_entity_id(pool, "collection_centers", "CC").await?,
        };

        let res = sqlx::query_as::<_, CollectionCenter>(
            "INSERT INTO collection_centers (center_id, name, location, coordinates, manager, \
             contact, drying_method, capacity, status, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(&center_id)
        .bind(&input.name)
        .bind(&input.location)
        .bind(&input.coordinates)
        .bind(&input.manager)
        .bind(&input.contact)
        .bind(input.drying_method)
        .bind(input.capacity)
        .bind(input.status)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(AgriError::from);

        match res {
            Ok(center) => return Ok(center),
            Err(e) if is_unique_violation(&e) => {
                if explicit_id.is_some() {
                    return Err(AgriError::Validation(format!(
                        "Collection center with id '{}' already exists",
                        center_id
                    )));
                }
                attempt += 1;
                if attempt >= 3 {
                    return Err(AgriError::Validation(
                        "Could not allocate a unique center id".to_string(),
                    ));
                }
            }
            Err(e) => return Err(e),
        }
    }
}

pub async fn get_collection_center_internal(
    pool: &DbPool,
    center_id: &str,
) -> AgriResult<CollectionCenter> {
    sqlx::query_as::<_, CollectionCenter>("SELECT * FROM collection_centers WHERE center_id = ?")
        .bind(center_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| {
            AgriError::NotFound(format!(
                "Collection center with id '{}' not found",
                center_id
            ))
        })
}

pub async fn update_collection_center_internal(
    pool: &DbPool,
    center_id: &str,
    input: CollectionCenterUpdate,
) -> AgriResult<CollectionCenter> {
    if let Some(v) = input.capacity {
        require_non_negative(v, "capacity")?;
    }

    get_collection_center_internal(pool, center_id).await?;

    let mut qb = QueryBuilder::<Sqlite>::new("UPDATE collection_centers SET updated_at = ");
    qb.push_bind(Utc::now().naive_utc());
    if let Some(v) = &input.center_id {
        qb.push(", center_id = ").push_bind(v);
    }
    if let Some(v) = &input.name {
        qb.push(", name = ").push_bind(v);
    }
    if let Some(v) = &input.location {
        qb.push(", location = ").push_bind(v);
    }
    if let Some(v) = &input.coordinates {
        qb.push(", coordinates = ").push_bind(v);
    }
    if let Some(v) = &input.manager {
        qb.push(", manager = ").push_bind(v);
    }
    if let Some(v) = &input.contact {
        qb.push(", contact = ").push_bind(v);
    }
    if let Some(v) = input.drying_method {
        qb.push(", drying_method = ").push_bind(v);
    }
    if let Some(v) = input.capacity {
        qb.push(", capacity = ").push_bind(v);
    }
    if let Some(v) = input.status {
        qb.push(", status = ").push_bind(v);
    }
    qb.push(" WHERE center_id = ").push_bind(center_id);

    qb.build().execute(pool).await.map_err(|e| {
        if e.as_database_error()
            .map_or(false, |db| db.is_unique_violation())
        {
            AgriError::Validation("Collection center with this id already exists".to_string())
        } else {
            AgriError::Database(e)
        }
    })?;

    let key = input.center_id.as_deref().unwrap_or(center_id);
    get_collection_center_internal(pool, key).await
}

pub async fn delete_collection_center_internal(pool: &DbPool, center_id: &str) -> AgriResult<()> {
    // Referencing batches go with it (ON DELETE CASCADE).
    let result = sqlx::query("DELETE FROM collection_centers WHERE center_id = ?")
        .bind(center_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AgriError::NotFound(format!(
            "Collection center with id '{}' not found",
            center_id
        )));
    }
    Ok(())
}

// Axum handlers

pub async fn get_collection_center_list(
    AxumState(state): AxumState<AppState>,
    Query(q): Query<CollectionCenterListQuery>,
) -> AgriResult<Json<Vec<CollectionCenter>>> {
    Ok(Json(
        get_collection_center_list_internal(&state.pool, &q).await?,
    ))
}

pub async fn create_collection_center(
    AxumState(state): AxumState<AppState>,
    Json(input): Json<CollectionCenterInput>,
) -> AgriResult<(StatusCode, Json<CollectionCenter>)> {
    let center = create_collection_center_internal(&state.pool, input).await?;
    tracing::info!("Created collection center {}", center.center_id);
    Ok((StatusCode::CREATED, Json(center)))
}

pub async fn get_collection_center(
    AxumState(state): AxumState<AppState>,
    Path(center_id): Path<String>,
) -> AgriResult<Json<CollectionCenter>> {
    Ok(Json(
        get_collection_center_internal(&state.pool, &center_id).await?,
    ))
}

pub async fn update_collection_center(
    AxumState(state): AxumState<AppState>,
    Path(center_id): Path<String>,
    Json(input): Json<CollectionCenterUpdate>,
) -> AgriResult<Json<CollectionCenter>> {
    Ok(Json(
        update_collection_center_internal(&state.pool, &center_id, input).await?,
    ))
}

pub async fn delete_collection_center(
    AxumState(state): AxumState<AppState>,
    Path(center_id): Path<String>,
) -> AgriResult<StatusCode> {
    delete_collection_center_internal(&state.pool, &center_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
