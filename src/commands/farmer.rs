use crate::commands::{
    default_status, is_unique_violation, next_entity_id, order_clause, require_non_negative,
    require_non_negative_int,
};
use crate::db::{DbPool, Farmer, FarmerCertification, Gender};
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
pub struct FarmerInput {
    pub farmer_id: Option<String>,
    pub name: String,
    pub gender: Gender,
    pub age: Option<i64>,
    pub farm_size: f64,
    pub years_in_farming: Option<i64>,
    pub region: String,
    #[serde(default)]
    pub certification: FarmerCertification,
    #[serde(default = "default_status")]
    pub status: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct FarmerUpdate {
    pub farmer_id: Option<String>,
    pub name: Option<String>,
    pub gender: Option<Gender>,
    pub age: Option<i64>,
    pub farm_size: Option<f64>,
    pub years_in_farming: Option<i64>,
    pub region: Option<String>,
    pub certification: Option<FarmerCertification>,
    pub status: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FarmerListQuery {
    pub region: Option<String>,
    pub certification: Option<FarmerCertification>,
    pub status: Option<bool>,
    pub search: Option<String>,
    pub ordering: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn get_farmer_list_internal(
    pool: &DbPool,
    q: &FarmerListQuery,
) -> AgriResult<Vec<Farmer>> {
    let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM farmers WHERE 1=1");
    if let Some(region) = &q.region {
        qb.push(" AND region = ").push_bind(region);
    }
    if let Some(certification) = q.certification {
        qb.push(" AND certification = ").push_bind(certification);
    }
    if let Some(status) = q.status {
        qb.push(" AND status = ").push_bind(status);
    }
    if let Some(term) = &q.search {
        let pattern = format!("%{}%", term);
        qb.push(" AND (name LIKE ")
            .push_bind(pattern.clone())
            .push(" OR farmer_id LIKE ")
            .push_bind(pattern)
            .push(")");
    }
    qb.push(" ORDER BY ").push(order_clause(
        q.ordering.as_deref(),
        &["name", "age", "farm_size", "years_in_farming"],
    ));
    if let Some(limit) = q.limit {
        qb.push(" LIMIT ").push_bind(limit);
        if let Some(offset) = q.offset {
            qb.push(" OFFSET ").push_bind(offset);
        }
    }

    Ok(qb.build_query_as::<Farmer>().fetch_all(pool).await?)
}

pub async fn create_farmer_internal(pool: &DbPool, input: FarmerInput) -> AgriResult<Farmer> {
    require_non_negative(input.farm_size, "farm_size")?;
    require_non_negative_int(input.age, "age")?;
    require_non_negative_int(input.years_in_farming, "years_in_farming")?;

    let explicit_id = input.farmer_id.clone().filter(|v| !v.is_empty());
    let now = Utc::now().naive_utc();

    let mut attempt = 0;
    loop {
        let farmer_id = match &explicit_id {
            Some(v) => v.clone(),
            None => next_entity_id(pool, "farmers", "F").await?,
        };

        let res = sqlx::query_as::<_, Farmer>(
            "INSERT INTO farmers (farmer_id, name, gender, age, farm_size, years_in_farming, \
             region, certification, status, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(&farmer_id)
        .bind(&input.name)
        .bind(input.gender)
        .bind(input.age)
        .bind(input.farm_size)
        .bind(input.years_in_farming)
        .bind(&input.region)
        .bind(input.certification)
        .bind(input.status)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(AgriError::from);

        match res {
            Ok(farmer) => return Ok(farmer),
            Err(e) if is_unique_violation(&e) => {
                if explicit_id.is_some() {
                    return Err(AgriError::Validation(format!(
                        "Farmer with id '{}' already exists",
                        farmer_id
                    )));
                }
                attempt += 1;
                if attempt >= 3 {
                    return Err(AgriError::Validation(
                        "Could not allocate a unique farmer id".to_string(),
                    ));
                }
            }
            Err(e) => return Err(e),
        }
    }
}

pub async fn get_farmer_internal(pool: &DbPool, farmer_id: &str) -> AgriResult<Farmer> {
    sqlx::query_as::<_, Farmer>("SELECT * FROM farmers WHERE farmer_id = ?")
        .bind(farmer_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AgriError::NotFound(format!("Farmer with id '{}' not found", farmer_id)))
}

pub async fn update_farmer_internal(
    pool: &DbPool,
    farmer_id: &str,
    input: FarmerUpdate,
) -> AgriResult<Farmer> {
    if let Some(v) = input.farm_size {
        require_non_negative(v, "farm_size")?;
    }
    require_non_negative_int(input.age, "age")?;
    require_non_negative_int(input.years_in_farming, "years_in_farming")?;

    // 404 before attempting the update
    get_farmer_internal(pool, farmer_id).await?;

    let mut qb = QueryBuilder::<Sqlite>::new("UPDATE farmers SET updated_at = ");
    qb.push_bind(Utc::now().naive_utc());
    if let Some(v) = &input.farmer_id {
        qb.push(", farmer_id = ").push_bind(v);
    }
    if let Some(v) = &input.name {
        qb.push(", name = ").push_bind(v);
    }
    if let Some(v) = input.gender {
        qb.push(", gender = ").push_bind(v);
    }
    if let Some(v) = input.age {
        qb.push(", age = ").push_bind(v);
    }
    if let Some(v) = input.farm_size {
        qb.push(", farm_size = ").push_bind(v);
    }
    if let Some(v) = input.years_in_farming {
        qb.push(", years_in_farming = ").push_bind(v);
    }
    if let Some(v) = &input.region {
        qb.push(", region = ").push_bind(v);
    }
    if let Some(v) = input.certification {
        qb.push(", certification = ").push_bind(v);
    }
    if let Some(v) = input.status {
        qb.push(", status = ").push_bind(v);
    }
    qb.push(" WHERE farmer_id = ").push_bind(farmer_id);

    qb.build().execute(pool).await.map_err(|e| {
        if e.as_database_error()
            .map_or(false, |db| db.is_unique_violation())
        {
            AgriError::Validation("Farmer with this id already exists".to_string())
        } else {
            AgriError::Database(e)
        }
    })?;

    let key = input.farmer_id.as_deref().unwrap_or(farmer_id);
    get_farmer_internal(pool, key).await
}

pub async fn delete_farmer_internal(pool: &DbPool, farmer_id: &str) -> AgriResult<()> {
    let result = sqlx::query("DELETE FROM farmers WHERE farmer_id = ?")
        .bind(farmer_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AgriError::NotFound(format!(
            "Farmer with id '{}' not found",
            farmer_id
        )));
    }
    Ok(())
}

// Axum handlers

pub async fn get_farmer_list(
    AxumState(state): AxumState<AppState>,
    Query(q): Query<FarmerListQuery>,
) -> AgriResult<Json<Vec<Farmer>>> {
    let farmers = get_farmer_list_internal(&state.pool, &q).await?;
    Ok(Json(farmers))
}

pub async fn create_farmer(
    AxumState(state): AxumState<AppState>,
    Json(input): Json<FarmerInput>,
) -> AgriResult<(StatusCode, Json<Farmer>)> {
    let farmer = create_farmer_internal(&state.pool, input).await?;
    tracing::info!("Created farmer {}", farmer.farmer_id);
    Ok((StatusCode::CREATED, Json(farmer)))
}

pub async fn get_farmer(
    AxumState(state): AxumState<AppState>,
    Path(farmer_id): Path<String>,
) -> AgriResult<Json<Farmer>> {
    Ok(Json(get_farmer_internal(&state.pool, &farmer_id).await?))
}

pub async fn update_farmer(
    AxumState(state): AxumState<AppState>,
    Path(farmer_id): Path<String>,
    Json(input): Json<FarmerUpdate>,
) -> AgriResult<Json<Farmer>> {
    Ok(Json(
        update_farmer_internal(&state.pool, &farmer_id, input).await?,
    ))
}

pub async fn delete_farmer(
    AxumState(state): AxumState<AppState>,
    Path(farmer_id): Path<String>,
) -> AgriResult<StatusCode> {
    delete_farmer_internal(&state.pool, &farmer_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
