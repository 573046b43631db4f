use crate::commands::order_clause;
use crate::db::{
    BatchDetail, BatchRow, CollectionCenter, DbPool, Farmer, PackagingCenter, ProcessingFacility,
};
use crate::error::{AgriError, AgriResult};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State as AxumState},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite};

/// Composed batch number: `doa/year/sequence`.
pub fn compose_batch_number(doa: &str, year: &str, sequence: &str) -> String {
    format!("{}/{}/{}", doa, year, sequence)
}

/// Next sequence for a (doa, year) pair given the current latest one.
/// No prior batch, or a sequence that does not parse as a decimal integer,
/// restarts at "001". Past 999 the sequence simply grows a digit.
pub fn next_sequence(latest: Option<&str>) -> String {
    match latest.and_then(|s| s.parse::<u64>().ok()) {
        Some(n) => format!("{:03}", n + 1),
        None => "001".to_string(),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct GenerateBatchNumberRequest {
    pub doa: Option<String>,
    pub year: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedBatchNumber {
    pub batch_number: String,
    pub doa: String,
    pub year: String,
    pub sequence: String,
}

#[derive(Debug, Deserialize)]
pub struct BatchInput {
    pub batch_number: Option<String>,
    pub doa: String,
    pub year: String,
    pub sequence: String,
    /// Human-readable ids of the referenced facilities and farmers.
    pub collection_center: String,
    pub processing_facility: String,
    pub packaging_center: String,
    #[serde(default)]
    pub contributing_farmers: Vec<String>,
    pub packaging_date: NaiveDate,
    pub expiry_date: NaiveDate,
    #[serde(default)]
    pub zero_child_labor: bool,
    #[serde(default)]
    pub zero_deforestation: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct BatchUpdate {
    pub collection_center: Option<String>,
    pub processing_facility: Option<String>,
    pub packaging_center: Option<String>,
    pub contributing_farmers: Option<Vec<String>>,
    pub packaging_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub zero_child_labor: Option<bool>,
    pub zero_deforestation: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BatchListQuery {
    pub collection_center: Option<String>,
    pub processing_facility: Option<String>,
    pub packaging_center: Option<String>,
    pub year: Option<String>,
    pub search: Option<String>,
    pub ordering: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct BatchNumberSearch {
    pub batch_number: String,
}

/// Reads the numerically greatest sequence for (doa, year) and returns the
/// follow-up number. Pure read, nothing is reserved: two concurrent callers
/// can receive the same preview and the UNIQUE constraint on batch_number
/// decides the loser at create time.
pub async fn allocate_batch_number_internal(
    pool: &DbPool,
    doa: &str,
    year: &str,
) -> AgriResult<GeneratedBatchNumber> {
    if doa.is_empty() || year.is_empty() {
        return Err(AgriError::Validation("DOA and year are required".to_string()));
    }

    let latest: Option<(String,)> = sqlx::query_as(
        "SELECT sequence FROM batches WHERE doa = ? AND year = ? \
         ORDER BY CAST(sequence AS INTEGER) DESC LIMIT 1",
    )
    .bind(doa)
    .bind(year)
    .fetch_optional(pool)
    .await?;

    let sequence = next_sequence(latest.as_ref().map(|(s,)| s.as_str()));
    Ok(GeneratedBatchNumber {
        batch_number: compose_batch_number(doa, year, &sequence),
        doa: doa.to_string(),
        year: year.to_string(),
        sequence,
    })
}

async fn resolve_collection_center(
    pool: &DbPool,
    center_id: &str,
) -> AgriResult<CollectionCenter> {
    sqlx::query_as::<_, CollectionCenter>("SELECT * FROM collection_centers WHERE center_id = ?")
        .bind(center_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| {
            AgriError::Validation(format!("Collection center '{}' does not exist", center_id))
        })
}

async fn resolve_processing_facility(
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
        AgriError::Validation(format!(
            "Processing facility '{}' does not exist",
            facility_id
        ))
    })
}

async fn resolve_packaging_center(pool: &DbPool, center_id: &str) -> AgriResult<PackagingCenter> {
    sqlx::query_as::<_, PackagingCenter>("SELECT * FROM packaging_centers WHERE center_id = ?")
        .bind(center_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| {
            AgriError::Validation(format!("Packaging center '{}' does not exist", center_id))
        })
}

async fn resolve_farmers(pool: &DbPool, farmer_ids: &[String]) -> AgriResult<Vec<Farmer>> {
    let mut farmers: Vec<Farmer> = Vec::with_capacity(farmer_ids.len());
    for fid in farmer_ids {
        let farmer: Option<Farmer> = sqlx::query_as("SELECT * FROM farmers WHERE farmer_id = ?")
            .bind(fid)
            .fetch_optional(pool)
            .await?;
        match farmer {
            Some(f) => {
                if !farmers.iter().any(|known| known.id == f.id) {
                    farmers.push(f);
                }
            }
            None => {
                return Err(AgriError::Validation(format!(
                    "Farmer '{}' does not exist",
                    fid
                )))
            }
        }
    }
    Ok(farmers)
}

async fn expand_batch(pool: &DbPool, row: BatchRow) -> AgriResult<BatchDetail> {
    let collection_center: CollectionCenter =
        sqlx::query_as("SELECT * FROM collection_centers WHERE id = ?")
            .bind(row.collection_center_id)
            .fetch_one(pool)
            .await?;
    let processing_facility: ProcessingFacility =
        sqlx::query_as("SELECT * FROM processing_facilities WHERE id = ?")
            .bind(row.processing_facility_id)
            .fetch_one(pool)
            .await?;
    let packaging_center: PackagingCenter =
        sqlx::query_as("SELECT * FROM packaging_centers WHERE id = ?")
            .bind(row.packaging_center_id)
            .fetch_one(pool)
            .await?;
    let contributing_farmers: Vec<Farmer> = sqlx::query_as(
        "SELECT f.* FROM farmers f \
         JOIN batch_farmers bf ON bf.farmer_id = f.id \
         WHERE bf.batch_id = ? ORDER BY f.id",
    )
    .bind(row.id)
    .fetch_all(pool)
    .await?;

    Ok(BatchDetail {
        id: row.id,
        batch_number: row.batch_number,
        doa: row.doa,
        year: row.year,
        sequence: row.sequence,
        collection_center,
        processing_facility,
        packaging_center,
        contributing_farmers,
        packaging_date: row.packaging_date,
        expiry_date: row.expiry_date,
        zero_child_labor: row.zero_child_labor,
        zero_deforestation: row.zero_deforestation,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

pub async fn create_batch_internal(pool: &DbPool, input: BatchInput) -> AgriResult<BatchDetail> {
    // Compliance gates come first, regardless of everything else.
    if !input.zero_child_labor {
        return Err(AgriError::Validation(
            "Batch must be confirmed to be produced with ZERO child labor".to_string(),
        ));
    }
    if !input.zero_deforestation {
        return Err(AgriError::Validation(
            "Batch must be confirmed to be produced with ZERO deforestation".to_string(),
        ));
    }

    let collection_center = resolve_collection_center(pool, &input.collection_center).await?;
    let processing_facility =
        resolve_processing_facility(pool, &input.processing_facility).await?;
    let packaging_center = resolve_packaging_center(pool, &input.packaging_center).await?;
    let contributing_farmers = resolve_farmers(pool, &input.contributing_farmers).await?;
    if contributing_farmers.is_empty() {
        return Err(AgriError::Validation(
            "At least one contributing farmer is required".to_string(),
        ));
    }

    if input.expiry_date < input.packaging_date {
        return Err(AgriError::Validation(
            "Expiry date must be on or after packaging date".to_string(),
        ));
    }

    if input.doa.is_empty() || input.year.is_empty() || input.sequence.is_empty() {
        return Err(AgriError::Validation(
            "doa, year and sequence are required".to_string(),
        ));
    }

    // A caller-supplied sequence is taken at face value, never re-derived
    // from the allocator.
    let batch_number = input
        .batch_number
        .clone()
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| compose_batch_number(&input.doa, &input.year, &input.sequence));

    let now = Utc::now().naive_utc();

    // The batch row and its farmer links land together or not at all.
    let mut tx = pool.begin().await?;

    let inserted = sqlx::query_as::<_, BatchRow>(
        "INSERT INTO batches (batch_number, doa, year, sequence, collection_center_id, \
         processing_facility_id, packaging_center_id, packaging_date, expiry_date, \
         zero_child_labor, zero_deforestation, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING *",
    )
    .bind(&batch_number)
    .bind(&input.doa)
    .bind(&input.year)
    .bind(&input.sequence)
    .bind(collection_center.id)
    .bind(processing_facility.id)
    .bind(packaging_center.id)
    .bind(input.packaging_date)
    .bind(input.expiry_date)
    .bind(input.zero_child_labor)
    .bind(input.zero_deforestation)
    .bind(now)
    .bind(now)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        if e.as_database_error()
            .map_or(false, |db| db.is_unique_violation())
        {
            AgriError::Validation(format!(
                "Batch with number '{}' already exists",
                batch_number
            ))
        } else {
            AgriError::Database(e)
        }
    })?;

    for farmer in &contributing_farmers {
        sqlx::query("INSERT INTO batch_farmers (batch_id, farmer_id) VALUES (?, ?)")
            .bind(inserted.id)
            .bind(farmer.id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    tracing::info!("Created batch {}", inserted.batch_number);

    Ok(BatchDetail {
        id: inserted.id,
        batch_number: inserted.batch_number,
        doa: inserted.doa,
        year: inserted.year,
        sequence: inserted.sequence,
        collection_center,
        processing_facility,
        packaging_center,
        contributing_farmers,
        packaging_date: inserted.packaging_date,
        expiry_date: inserted.expiry_date,
        zero_child_labor: inserted.zero_child_labor,
        zero_deforestation: inserted.zero_deforestation,
        created_at: inserted.created_at,
        updated_at: inserted.updated_at,
    })
}

pub async fn find_batch_by_number_internal(
    pool: &DbPool,
    batch_number: &str,
) -> AgriResult<BatchDetail> {
    let row: Option<BatchRow> = sqlx::query_as("SELECT * FROM batches WHERE batch_number = ?")
        .bind(batch_number)
        .fetch_optional(pool)
        .await?;
    match row {
        Some(row) => expand_batch(pool, row).await,
        None => Err(AgriError::NotFound(format!(
            "Batch with number '{}' not found",
            batch_number
        ))),
    }
}

pub async fn get_batch_list_internal(
    pool: &DbPool,
    q: &BatchListQuery,
) -> AgriResult<Vec<BatchDetail>> {
    let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM batches WHERE 1=1");
    if let Some(center_id) = &q.collection_center {
        qb.push(
            " AND collection_center_id IN \
             (SELECT id FROM collection_centers WHERE center_id = ",
        )
        .push_bind(center_id)
        .push(")");
    }
    if let Some(facility_id) = &q.processing_facility {
        qb.push(
            " AND processing_facility_id IN \
             (SELECT id FROM processing_facilities WHERE facility_id = ",
        )
        .push_bind(facility_id)
        .push(")");
    }
    if let Some(center_id) = &q.packaging_center {
        qb.push(
            " AND packaging_center_id IN \
             (SELECT id FROM packaging_centers WHERE center_id = ",
        )
        .push_bind(center_id)
        .push(")");
    }
    if let Some(year) = &q.year {
        qb.push(" AND year = ").push_bind(year);
    }
    if let Some(term) = &q.search {
        qb.push(" AND batch_number LIKE ")
            .push_bind(format!("%{}%", term));
    }
    qb.push(" ORDER BY ").push(order_clause(
        q.ordering.as_deref(),
        &["packaging_date", "expiry_date", "created_at"],
    ));
    if let Some(limit) = q.limit {
        qb.push(" LIMIT ").push_bind(limit);
        if let Some(offset) = q.offset {
            qb.push(" OFFSET ").push_bind(offset);
        }
    }

    let rows: Vec<BatchRow> = qb.build_query_as::<BatchRow>().fetch_all(pool).await?;

    let mut batches = Vec::with_capacity(rows.len());
    for row in rows {
        batches.push(expand_batch(pool, row).await?);
    }
    Ok(batches)
}

pub async fn update_batch_internal(
    pool: &DbPool,
    batch_number: &str,
    input: BatchUpdate,
) -> AgriResult<BatchDetail> {
    let row: Option<BatchRow> = sqlx::query_as("SELECT * FROM batches WHERE batch_number = ?")
        .bind(batch_number)
        .fetch_optional(pool)
        .await?;
    let row = row.ok_or_else(|| {
        AgriError::NotFound(format!("Batch with number '{}' not found", batch_number))
    })?;

    // Facility assignment is fixed at creation.
    if input.collection_center.is_some() {
        return Err(AgriError::Validation(
            "Collection center assignment cannot be changed after creation".to_string(),
        ));
    }
    if input.processing_facility.is_some() {
        return Err(AgriError::Validation(
            "Processing facility assignment cannot be changed after creation".to_string(),
        ));
    }
    if input.packaging_center.is_some() {
        return Err(AgriError::Validation(
            "Packaging center assignment cannot be changed after creation".to_string(),
        ));
    }

    // A batch cannot be edited into a non-compliant state.
    if input.zero_child_labor == Some(false) {
        return Err(AgriError::Validation(
            "Batch must be confirmed to be produced with ZERO child labor".to_string(),
        ));
    }
    if input.zero_deforestation == Some(false) {
        return Err(AgriError::Validation(
            "Batch must be confirmed to be produced with ZERO deforestation".to_string(),
        ));
    }

    let packaging_date = input.packaging_date.unwrap_or(row.packaging_date);
    let expiry_date = input.expiry_date.unwrap_or(row.expiry_date);
    if expiry_date < packaging_date {
        return Err(AgriError::Validation(
            "Expiry date must be on or after packaging date".to_string(),
        ));
    }

    let new_farmers = match &input.contributing_farmers {
        Some(ids) => {
            let farmers = resolve_farmers(pool, ids).await?;
            if farmers.is_empty() {
                return Err(AgriError::Validation(
                    "At least one contributing farmer is required".to_string(),
                ));
            }
            Some(farmers)
        }
        None => None,
    };

    let zero_child_labor = input.zero_child_labor.unwrap_or(row.zero_child_labor);
    let zero_deforestation = input.zero_deforestation.unwrap_or(row.zero_deforestation);

    let mut tx = pool.begin().await?;

    sqlx::query(
        "UPDATE batches SET packaging_date = ?, expiry_date = ?, zero_child_labor = ?, \
         zero_deforestation = ?, updated_at = ? WHERE id = ?",
    )
    .bind(packaging_date)
    .bind(expiry_date)
    .bind(zero_child_labor)
    .bind(zero_deforestation)
    .bind(Utc::now().naive_utc())
    .bind(row.id)
    .execute(&mut *tx)
    .await?;

    if let Some(farmers) = &new_farmers {
        sqlx::query("DELETE FROM batch_farmers WHERE batch_id = ?")
            .bind(row.id)
            .execute(&mut *tx)
            .await?;
        for farmer in farmers {
            sqlx::query("INSERT INTO batch_farmers (batch_id, farmer_id) VALUES (?, ?)")
                .bind(row.id)
                .bind(farmer.id)
                .execute(&mut *tx)
                .await?;
        }
    }

    tx.commit().await?;

    find_batch_by_number_internal(pool, batch_number).await
}

pub async fn delete_batch_internal(pool: &DbPool, batch_number: &str) -> AgriResult<()> {
    // Farmer links cascade with the row; referenced entities stay.
    let result = sqlx::query("DELETE FROM batches WHERE batch_number = ?")
        .bind(batch_number)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AgriError::NotFound(format!(
            "Batch with number '{}' not found",
            batch_number
        )));
    }
    Ok(())
}

// Axum handlers. Batch numbers contain slashes, so the detail routes use a
// wildcard segment and tolerate a trailing slash.

fn path_batch_number(raw: &str) -> &str {
    raw.trim_end_matches('/')
}

pub async fn get_batch_list(
    AxumState(state): AxumState<AppState>,
    Query(q): Query<BatchListQuery>,
) -> AgriResult<Json<Vec<BatchDetail>>> {
    Ok(Json(get_batch_list_internal(&state.pool, &q).await?))
}

pub async fn create_batch(
    AxumState(state): AxumState<AppState>,
    Json(input): Json<BatchInput>,
) -> AgriResult<(StatusCode, Json<BatchDetail>)> {
    let batch = create_batch_internal(&state.pool, input).await?;
    Ok((StatusCode::CREATED, Json(batch)))
}

pub async fn generate_batch_number(
    AxumState(state): AxumState<AppState>,
    Json(req): Json<GenerateBatchNumberRequest>,
) -> AgriResult<Json<GeneratedBatchNumber>> {
    let doa = req.doa.unwrap_or_default();
    let year = req.year.unwrap_or_default();
    let generated = allocate_batch_number_internal(&state.pool, &doa, &year).await?;
    Ok(Json(generated))
}

pub async fn search_batch_by_number(
    AxumState(state): AxumState<AppState>,
    Json(req): Json<BatchNumberSearch>,
) -> AgriResult<Json<BatchDetail>> {
    Ok(Json(
        find_batch_by_number_internal(&state.pool, &req.batch_number).await?,
    ))
}

pub async fn get_batch(
    AxumState(state): AxumState<AppState>,
    Path(batch_number): Path<String>,
) -> AgriResult<Json<BatchDetail>> {
    Ok(Json(
        find_batch_by_number_internal(&state.pool, path_batch_number(&batch_number)).await?,
    ))
}

pub async fn update_batch(
    AxumState(state): AxumState<AppState>,
    Path(batch_number): Path<String>,
    Json(input): Json<BatchUpdate>,
) -> AgriResult<Json<BatchDetail>> {
    Ok(Json(
        update_batch_internal(&state.pool, path_batch_number(&batch_number), input).await?,
    ))
}

pub async fn delete_batch(
    AxumState(state): AxumState<AppState>,
    Path(batch_number): Path<String>,
) -> AgriResult<StatusCode> {
    delete_batch_internal(&state.pool, path_batch_number(&batch_number)).await?;
    Ok(StatusCode::NO_CONTENT)
}
