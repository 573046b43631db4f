use crate::commands::{
    default_status, is_unique_violation, next_entity_id, order_clause, require_non_negative,
};
use crate::db::{Certification, DbPool, ProcessingFacility};
use crate::error::{AgriError, AgriResult};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State as AxumState},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use sqlx::types::Json as SqlJson;
use sqlx::{QueryBuilder, Sqlite};

#[derive(Debug, Deserialize)]
pub struct ProcessingFacilityInput {
    pub facility_id: Option<String>,
    pub name: String,
    pub location: String,
    pub coordinates: Option<String>,
    pub manager: Option<String>,
    pub contact: Option<String>,
    pub capacity: f64,
    #[serde(default)]
    pub certifications: Vec<Certification>,
    #[serde(default = "default_status")]
    pub status: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProcessingFacilityUpdate {
    pub facility_id: Option<String>,
    pub name: Option<String>,
    pub location: Option<String>,
    pub coordinates: Option<String>,
    pub manager: Option<String>,
    pub contact: Option<String>,
    pub capacity: Option<f64>,
    pub certifications: Option<Vec<Certification>>,
    pub status: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProcessingFacilityListQuery {
    /// Tag membership filter, e.g. `certification=HACCP`.
    pub certification: Option<Certification>,
    pub status: Option<bool>,
    pub search: Option<String>,
    pub ordering: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn get_processing_facility_list_internal(
    pool: &DbPool,
    q: &ProcessingFacilityListQuery,
) -> AgriResult<Vec<ProcessingFacility>> {
    let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM processing_facilities WHERE 1=1");
    if let Some(tag) = q.certification {
        qb.push(" AND EXISTS (SELECT 1 FROM json_each(certifications) WHERE json_each.value = ")
            .push_bind(tag.as_str())
            .push(")");
    }
    if let Some(status) = q.status {
        qb.push(" AND status = ").push_bind(status);
    }
    if let Some(term) = &q.search {
        let pattern = format!("%{}%", term);
        qb.push(" AND (name LIKE ")
            .push_bind(pattern.clone())
            .push(" OR facility_id LIKE ")
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
        .build_query_as::<ProcessingFacility>()
        .fetch_all(pool)
        .await?)
}

pub async fn create_processing_facility_internal(
    pool: &DbPool,
    input: ProcessingFacilityInput,
) -> AgriResult<ProcessingFacility> {
    require_non_negative(input.capacity, "capacity")?;

    let explicit_id = input.facility_id.clone().filter(|v| !v.is_empty());
    let now = Utc::now().naive_utc();

    let mut attempt = 0;
    loop {
        let facility_id = match &explicit_id {
            Some(v) => v.clone(),
            None => next_entity_id(pool, "processing_facilities", "PF").await?,
        };

        let res = sqlx::query_as::<_, ProcessingFacility>(
            "INSERT INTO processing_facilities (facility_id, name, location, coordinates, \
             manager, contact, capacity, certifications, status, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(&facility_id)
        .bind(&input.name)
        .bind(&input.location)
        .bind(&input.coordinates)
        .bind(&input.manager)
        .bind(&input.contact)
        .bind(input.capacity)
        .bind(SqlJson(input.certifications.clone()))
        .bind(input.status)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(AgriError::from);

        match res {
            Ok(facility) => return Ok(facility),
            Err(e) if is_unique_violation(&e) => {
                if explicit_id.is_some() {
                    return Err(AgriError::Validation(format!(
                        "Processing facility with id '{}' already exists",
                        facility_id
                    )));
                }
                attempt += 1;
                if attempt >= 3 {
                    return Err(AgriError::Validation(
                        "Could not allocate a unique facility id".to_string(),
                    ));
                }
            }
            Err(e) => return Err(e),
        }
    }
}

pub async fn get_processing_facility_internal(
    pool: &DbPool,
    facility_id: &str,
) -> AgriResult<ProcessingFacility> {
    sqlx::query_as::<_, ProcessingFacility>(
        "SELECT * FROM processing_facilities WHERE facility_id = ?",
    )
    .bind(facility_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| {
        AgriError::NotFound(format!(
            "Processing facility with id '{}' not found",
            facility_id
        ))
    })
}

pub async fn update_processing_facility_internal(
    pool: &DbPool,
    facility_id: &str,
    input: ProcessingFacilityUpdate,
) -> AgriResult<ProcessingFacility> {
    if let Some(v) = input.capacity {
        require_non_negative(v, "capacity")?;
    }

    get_processing_facility_internal(pool, facility_id).await?;

    let mut qb = QueryBuilder::<Sqlite>::new("UPDATE processing_facilities SET updated_at = ");
    qb.push_bind(Utc::now().naive_utc());
    if let Some(v) = &input.facility_id {
        qb.push(", facility_id = ").push_bind(v);
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
    if let Some(v) = input.capacity {
        qb.push(", capacity = ").push_bind(v);
    }
    if let Some(v) = &input.certifications {
        qb.push(", certifications = ").push_bind(SqlJson(v.clone()));
    }
    if let Some(v) = input.status {
        qb.push(", status = ").push_bind(v);
    }
    qb.push(" WHERE facility_id = ").push_bind(facility_id);

    qb.build().execute(pool).await.map_err(|e| {
        if e.as_database_error()
            .map_or(false, |db| db.is_unique_violation())
        {
            AgriError::Validation("Processing facility with this id already exists".to_string())
        } else {
            AgriError::Database(e)
        }
    })?;

    let key = input.facility_id.as_deref().unwrap_or(facility_id);
    get_processing_facility_internal(pool, key).await
}

pub async fn delete_processing_facility_internal(
    pool: &DbPool,
    facility_id: &str,
) -> AgriResult<()> {
    let result = sqlx::query("DELETE FROM processing_facilities WHERE facility_id = ?")
        .bind(facility_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AgriError::NotFound(format!(
            "Processing facility with id '{}' not found",
            facility_id
        )));
    }
    Ok(())
}

// Axum handlers

pub async fn get_processing_facility_list(
    AxumState(state): AxumState<AppState>,
    Query(q): Query<ProcessingFacilityListQuery>,
) -> AgriResult<Json<Vec<ProcessingFacility>>> {
    Ok(Json(
        get_processing_facility_list_internal(&state.pool, &q).await?,
    ))
}

pub async fn create_processing_facility(
    AxumState(state): AxumState<AppState>,
    Json(input): Json<ProcessingFacilityInput>,
) -> AgriResult<(StatusCode, Json<ProcessingFacility>)> {
    let facility = create_processing_facility_internal(&state.pool, input).await?;
    tracing::info!("Created processing facility {}", facility.facility_id);
    Ok((StatusCode::CREATED, Json(facility)))
}

pub async fn get_processing_facility(
    AxumState(state): AxumState<AppState>,
    Path(facility_id): Path<String>,
) -> AgriResult<Json<ProcessingFacility>> {
    Ok(Json(
        get_processing_facility_internal(&state.pool, &facility_id).await?,
    ))
}

pub async fn update_processing_facility(
    AxumState(state): AxumState<AppState>,
    Path(facility_id): Path<String>,
    Json(input): Json<ProcessingFacilityUpdate>,
) -> AgriResult<Json<ProcessingFacility>> {
    Ok(Json(
        update_processing_facility_internal(&state.pool, &facility_id, input).await?,
    ))
}

pub async fn delete_processing_facility(
    AxumState(state): AxumState<AppState>,
    Path(facility_id): Path<String>,
) -> AgriResult<StatusCode> {
    delete_processing_facility_internal(&state.pool, &facility_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
