use crate::commands::{
    default_status, is_unique_violation, next_entity_id, order_clause, require_non_negative,
};
use crate::db::{DbPool, PackagingCenter};
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
pub struct PackagingCenterInput {
    pub center_id: Option<String>,
    pub name: String,
    pub location: String,
    pub capacity: f64,
    #[serde(default = "default_status")]
    pub status: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct PackagingCenterUpdate {
    pub center_id: Option<String>,
    pub name: Option<String>,
    pub location: Option<String>,
    pub capacity: Option<f64>,
    pub status: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PackagingCenterListQuery {
    pub status: Option<bool>,
    pub search: Option<String>,
    pub ordering: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn get_packaging_center_list_internal(
    pool: &DbPool,
    q: &PackagingCenterListQuery,
) -> AgriResult<Vec<PackagingCenter>> {
    let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM packaging_centers WHERE 1=1");
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
        .build_query_as::<PackagingCenter>()
        .fetch_all(pool)
        .await?)
}

pub async fn create_packaging_center_internal(
    pool: &DbPool,
    input: PackagingCenterInput,
) -> AgriResult<PackagingCenter> {
    require_non_negative(input.capacity, "capacity")?;

    let explicit_id = input.center_id.clone().filter(|v| !v.is_empty());
    let now = Utc::now().naive_utc();

    let mut attempt = 0;
    loop {
        let center_id = match &explicit_id {
            Some(v) => v.clone(),
            None => next_entity_id(pool, "packaging_centers", "PC").await?,
        };

        let res = sqlx::query_as::<_, PackagingCenter>(
            "INSERT INTO packaging_centers (center_id, name, location, capacity, status, \
             created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(&center_id)
        .bind(&input.name)
        .bind(&input.location)
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
                        "Packaging center with id '{}' already exists",
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

pub async fn get_packaging_center_internal(
    pool: &DbPool,
    center_id: &str,
) -> AgriResult<PackagingCenter> {
    sqlx::query_as::<_, PackagingCenter>("SELECT * FROM packaging_centers WHERE center_id = ?")
        .bind(center_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| {
            AgriError::NotFound(format!("Packaging center with id '{}' not found", center_id))
        })
}

pub async fn update_packaging_center_internal(
    pool: &DbPool,
    center_id: &str,
    input: PackagingCenterUpdate,
) -> AgriResult<PackagingCenter> {
    if let Some(v) = input.capacity {
        require_non_negative(v, "capacity")?;
    }

    get_packaging_center_internal(pool, center_id).await?;

    let mut qb = QueryBuilder::<Sqlite>::new("UPDATE packaging_centers SET updated_at = ");
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
            AgriError::Validation("Packaging center with this id already exists".to_string())
        } else {
            AgriError::Database(e)
        }
    })?;

    let key = input.center_id.as_deref().unwrap_or(center_id);
    get_packaging_center_internal(pool, key).await
}

pub async fn delete_packaging_center_internal(pool: &DbPool, center_id: &str) -> AgriResult<()> {
    let result = sqlx::query("DELETE FROM packaging_centers WHERE center_id = ?")
        .bind(center_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AgriError::NotFound(format!(
            "Packaging center with id '{}' not found",
            center_id
        )));
    }
    Ok(())
}

// Axum handlers

pub async fn get_packaging_center_list(
    AxumState(state): AxumState<AppState>,
    Query(q): Query<PackagingCenterListQuery>,
) -> AgriResult<Json<Vec<PackagingCenter>>> {
    Ok(Json(
        get_packaging_center_list_internal(&state.pool, &q).await?,
    ))
}

pub async fn create_packaging_center(
    AxumState(state): AxumState<AppState>,
    Json(input): Json<PackagingCenterInput>,
) -> AgriResult<(StatusCode, Json<PackagingCenter>)> {
    let center = create_packaging_center_internal(&state.pool, input).await?;
    tracing::info!("Created packaging center {}", center.center_id);
    Ok((StatusCode::CREATED, Json(center)))
}

pub async fn get_packaging_center(
    AxumState(state): AxumState<AppState>,
    Path(center_id): Path<String>,
) -> AgriResult<Json<PackagingCenter>> {
    Ok(Json(
        get_packaging_center_internal(&state.pool, &center_id).await?,
    ))
}

pub async fn update_packaging_center(
    AxumState(state): AxumState<AppState>,
    Path(center_id): Path<String>,
    Json(input): Json<PackagingCenterUpdate>,
) -> AgriResult<Json<PackagingCenter>> {
    Ok(Json(
        update_packaging_center_internal(&state.pool, &center_id, input).await?,
    ))
}

pub async fn delete_packaging_center(
    AxumState(state): AxumState<AppState>,
    Path(center_id): Path<String>,
) -> AgriResult<StatusCode> {
    delete_packaging_center_internal(&state.pool, &center_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
