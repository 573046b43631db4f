use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::types::Json;
use sqlx::{FromRow, Pool, Sqlite};
use std::str::FromStr;

use crate::error::{AgriError, AgriResult};

pub type DbPool = Pool<Sqlite>;

pub async fn init_pool_with_options(opts: SqliteConnectOptions) -> AgriResult<DbPool> {
    // connect_lazy_with returns the pool immediately without validating the connection.
    Ok(SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(std::time::Duration::from_secs(30))
        .connect_lazy_with(opts))
}

pub async fn init_pool(database_url: &str) -> AgriResult<DbPool> {
    let opts = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| AgriError::Validation(format!("Invalid DB URL: {}", e)))?
        .create_if_missing(true)
        // Referential actions (batch cascade on facility delete) depend on this.
        .foreign_keys(true);

    init_pool_with_options(opts).await
}

pub async fn init_database(pool: &DbPool) -> AgriResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database ready");
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum FarmerCertification {
    Organic,
    FairTrade,
    #[default]
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum DryingMethod {
    SunDried,
    Mechanical,
    ControlledDrying,
}

/// Facility certification tags, stored as a JSON array column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Certification {
    #[serde(rename = "HACCP")]
    Haccp,
    #[serde(rename = "ISO22000")]
    Iso22000,
    #[serde(rename = "FAIR_TRADE")]
    FairTrade,
    #[serde(rename = "ORGANIC")]
    Organic,
}

impl Certification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Certification::Haccp => "HACCP",
            Certification::Iso22000 => "ISO22000",
            Certification::FairTrade => "FAIR_TRADE",
            Certification::Organic => "ORGANIC",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Farmer {
    pub id: i64,
    pub farmer_id: String,
    pub name: String,
    pub gender: Gender,
    pub age: Option<i64>,
    pub farm_size: f64,
    pub years_in_farming: Option<i64>,
    pub region: String,
    pub certification: FarmerCertification,
    pub status: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CollectionCenter {
    pub id: i64,
    pub center_id: String,
    pub name: String,
    pub location: String,
    pub coordinates: Option<String>,
    pub manager: Option<String>,
    pub contact: Option<String>,
    pub drying_method: DryingMethod,
    pub capacity: f64,
    pub status: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProcessingFacility {
    pub id: i64,
    pub facility_id: String,
    pub name: String,
    pub location: String,
    pub coordinates: Option<String>,
    pub manager: Option<String>,
    pub contact: Option<String>,
    pub capacity: f64,
    pub certifications: Json<Vec<Certification>>,
    pub status: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PackagingCenter {
    pub id: i64,
    pub center_id: String,
    pub name: String,
    pub location: String,
    pub capacity: f64,
    pub status: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Batch as stored: facility references are internal row ids, farmer links
/// live in batch_farmers.
#[derive(Debug, Clone, FromRow)]
pub struct BatchRow {
    pub id: i64,
    pub batch_number: String,
    pub doa: String,
    pub year: String,
    pub sequence: String,
    pub collection_center_id: i64,
    pub processing_facility_id: i64,
    pub packaging_center_id: i64,
    pub packaging_date: NaiveDate,
    pub expiry_date: NaiveDate,
    pub zero_child_labor: bool,
    pub zero_deforestation: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Batch as served: related entities expanded into their full records.
/// Presentation only, the stored model keeps references.
#[derive(Debug, Clone, Serialize)]
pub struct BatchDetail {
    pub id: i64,
    pub batch_number: String,
    pub doa: String,
    pub year: String,
    pub sequence: String,
    pub collection_center: CollectionCenter,
    pub processing_facility: ProcessingFacility,
    pub packaging_center: PackagingCenter,
    pub contributing_farmers: Vec<Farmer>,
    pub packaging_date: NaiveDate,
    pub expiry_date: NaiveDate,
    pub zero_child_labor: bool,
    pub zero_deforestation: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}
