#[cfg(test)]
mod tests {
    use crate::commands::batch::{
        self, BatchInput, BatchListQuery, BatchUpdate,
    };
    use crate::commands::collection_center::{self, CollectionCenterInput};
    use crate::commands::farmer::{self, FarmerInput, FarmerListQuery};
    use crate::commands::packaging_center::{self, PackagingCenterInput};
    use crate::commands::processing_facility::{
        self, ProcessingFacilityInput, ProcessingFacilityListQuery,
    };
    use crate::db::{
        self, Certification, CollectionCenter, DbPool, DryingMethod, Farmer, FarmerCertification,
        Gender, PackagingCenter, ProcessingFacility,
    };
    use crate::error::AgriError;
    use chrono::NaiveDate;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use std::str::FromStr;

    async fn setup_test_db() -> DbPool {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .expect("connect options")
            .foreign_keys(true);
        // A single connection keeps every query on the same in-memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .expect("Failed to create pool");
        db::init_database(&pool).await.expect("migrations");
        pool
    }

    fn assert_validation(result: Result<impl std::fmt::Debug, AgriError>, fragment: &str) {
        match result {
            Err(AgriError::Validation(msg)) => {
                assert!(
                    msg.contains(fragment),
                    "expected validation message containing '{}', got '{}'",
                    fragment,
                    msg
                );
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    async fn seed_farmer(pool: &DbPool, name: &str) -> Farmer {
        farmer::create_farmer_internal(
            pool,
            FarmerInput {
                farmer_id: None,
                name: name.to_string(),
                gender: Gender::Female,
                age: Some(41),
                farm_size: 2.5,
                years_in_farming: Some(12),
                region: "Nyeri".to_string(),
                certification: FarmerCertification::Organic,
                status: true,
            },
        )
        .await
        .expect("create farmer")
    }

    async fn seed_collection_center(pool: &DbPool) -> CollectionCenter {
        collection_center::create_collection_center_internal(
            pool,
            CollectionCenterInput {
                center_id: None,
                name: "Nyeri Hills Collection".to_string(),
                location: "Nyeri".to_string(),
                coordinates: None,
                manager: Some("J. Mwangi".to_string()),
                contact: None,
                drying_method: DryingMethod::SunDried,
                capacity: 4.0,
                status: true,
            },
        )
        .await
        .expect("create collection center")
    }

    async fn seed_processing_facility(pool: &DbPool) -> ProcessingFacility {
        processing_facility::create_processing_facility_internal(
            pool,
            ProcessingFacilityInput {
                facility_id: None,
                name: "Thika Processing".to_string(),
                location: "Thika".to_string(),
                coordinates: None,
                manager: None,
                contact: None,
                capacity: 12.0,
                certifications: vec![Certification::Haccp, Certification::Organic],
                status: true,
            },
        )
        .await
        .expect("create processing facility")
    }

    async fn seed_packaging_center(pool: &DbPool) -> PackagingCenter {
        packaging_center::create_packaging_center_internal(
            pool,
            PackagingCenterInput {
                center_id: None,
                name: "Nairobi Packaging".to_string(),
                location: "Nairobi".to_string(),
                capacity: 8.0,
                status: true,
            },
        )
        .await
        .expect("create packaging center")
    }

    async fn seed_chain(
        pool: &DbPool,
    ) -> (Farmer, CollectionCenter, ProcessingFacility, PackagingCenter) {
        let farmer = seed_farmer(pool, "Alice Wanjiku").await;
        let cc = seed_collection_center(pool).await;
        let pf = seed_processing_facility(pool).await;
        let pc = seed_packaging_center(pool).await;
        (farmer, cc, pf, pc)
    }

    fn batch_input(
        sequence: &str,
        cc: &CollectionCenter,
        pf: &ProcessingFacility,
        pc: &PackagingCenter,
        farmer_ids: Vec<String>,
    ) -> BatchInput {
        BatchInput {
            batch_number: None,
            doa: "KE".to_string(),
            year: "2024".to_string(),
            sequence: sequence.to_string(),
            collection_center: cc.center_id.clone(),
            processing_facility: pf.facility_id.clone(),
            packaging_center: pc.center_id.clone(),
            contributing_farmers: farmer_ids,
            packaging_date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            expiry_date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            zero_child_labor: true,
            zero_deforestation: true,
        }
    }

    #[tokio::test]
    async fn test_generate_batch_number_starts_at_001() {
        let pool = setup_test_db().await;

        let generated = batch::allocate_batch_number_internal(&pool, "KE", "2024")
            .await
            .expect("allocate");
        assert_eq!(generated.sequence, "001");
        assert_eq!(generated.batch_number, "KE/2024/001");
    }

    #[tokio::test]
    async fn test_generate_batch_number_increments_after_create() {
        let pool = setup_test_db().await;
        let (f, cc, pf, pc) = seed_chain(&pool).await;

        batch::create_batch_internal(
            &pool,
            batch_input("001", &cc, &pf, &pc, vec![f.farmer_id.clone()]),
        )
        .await
        .expect("create batch");

        let generated = batch::allocate_batch_number_internal(&pool, "KE", "2024")
            .await
            .expect("allocate");
        assert_eq!(generated.sequence, "002");

        // Other (doa, year) pairs are unaffected.
        let other = batch::allocate_batch_number_internal(&pool, "KE", "2025")
            .await
            .expect("allocate");
        assert_eq!(other.sequence, "001");
    }

    #[tokio::test]
    async fn test_generate_batch_number_requires_doa_and_year() {
        let pool = setup_test_db().await;

        assert_validation(
            batch::allocate_batch_number_internal(&pool, "", "2024").await,
            "DOA and year are required",
        );
        assert_validation(
            batch::allocate_batch_number_internal(&pool, "KE", "").await,
            "DOA and year are required",
        );
    }

    #[tokio::test]
    async fn test_allocator_compares_sequences_numerically() {
        let pool = setup_test_db().await;
        let (f, cc, pf, pc) = seed_chain(&pool).await;

        // "9" sorts after "10" as a string; numeric comparison must pick 10.
        batch::create_batch_internal(
            &pool,
            batch_input("9", &cc, &pf, &pc, vec![f.farmer_id.clone()]),
        )
        .await
        .expect("create batch 9");
        batch::create_batch_internal(
            &pool,
            batch_input("10", &cc, &pf, &pc, vec![f.farmer_id.clone()]),
        )
        .await
        .expect("create batch 10");

        let generated = batch::allocate_batch_number_internal(&pool, "KE", "2024")
            .await
            .expect("allocate");
        assert_eq!(generated.sequence, "011");
    }

    #[tokio::test]
    async fn test_create_batch_requires_compliance_flags() {
        let pool = setup_test_db().await;
        let (f, cc, pf, pc) = seed_chain(&pool).await;

        let mut input = batch_input("001", &cc, &pf, &pc, vec![f.farmer_id.clone()]);
        input.zero_child_labor = false;
        assert_validation(
            batch::create_batch_internal(&pool, input).await,
            "ZERO child labor",
        );

        let mut input = batch_input("001", &cc, &pf, &pc, vec![f.farmer_id.clone()]);
        input.zero_deforestation = false;
        assert_validation(
            batch::create_batch_internal(&pool, input).await,
            "ZERO deforestation",
        );
    }

    #[tokio::test]
    async fn test_create_batch_rejects_unknown_references() {
        let pool = setup_test_db().await;
        let (f, cc, pf, pc) = seed_chain(&pool).await;

        let mut input = batch_input("001", &cc, &pf, &pc, vec![f.farmer_id.clone()]);
        input.collection_center = "CC999".to_string();
        assert_validation(
            batch::create_batch_internal(&pool, input).await,
            "Collection center 'CC999' does not exist",
        );

        let input = batch_input("001", &cc, &pf, &pc, vec!["F999".to_string()]);
        assert_validation(
            batch::create_batch_internal(&pool, input).await,
            "Farmer 'F999' does not exist",
        );
    }

    #[tokio::test]
    async fn test_create_batch_requires_farmers_and_valid_dates() {
        let pool = setup_test_db().await;
        let (f, cc, pf, pc) = seed_chain(&pool).await;

        let input = batch_input("001", &cc, &pf, &pc, vec![]);
        assert_validation(
            batch::create_batch_internal(&pool, input).await,
            "At least one contributing farmer",
        );

        let mut input = batch_input("001", &cc, &pf, &pc, vec![f.farmer_id.clone()]);
        input.expiry_date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        assert_validation(
            batch::create_batch_internal(&pool, input).await,
            "Expiry date must be on or after packaging date",
        );
    }

    #[tokio::test]
    async fn test_create_then_find_by_number_round_trip() {
        let pool = setup_test_db().await;
        let (f, cc, pf, pc) = seed_chain(&pool).await;

        let created = batch::create_batch_internal(
            &pool,
            batch_input("003", &cc, &pf, &pc, vec![f.farmer_id.clone()]),
        )
        .await
        .expect("create batch");
        assert_eq!(created.batch_number, "KE/2024/003");

        let found = batch::find_batch_by_number_internal(&pool, "KE/2024/003")
            .await
            .expect("find batch");
        assert_eq!(found.id, created.id);
        assert_eq!(found.batch_number, created.batch_number);
        assert_eq!(found.sequence, "003");
        assert_eq!(found.collection_center.center_id, cc.center_id);
        assert_eq!(found.processing_facility.facility_id, pf.facility_id);
        assert_eq!(found.packaging_center.center_id, pc.center_id);
        assert_eq!(found.contributing_farmers.len(), 1);
        assert_eq!(found.contributing_farmers[0].farmer_id, f.farmer_id);
        assert_eq!(found.packaging_date, created.packaging_date);
        assert_eq!(found.expiry_date, created.expiry_date);
        assert!(found.zero_child_labor);
        assert!(found.zero_deforestation);
    }

    #[tokio::test]
    async fn test_find_by_number_not_found() {
        let pool = setup_test_db().await;

        match batch::find_batch_by_number_internal(&pool, "KE/2024/999").await {
            Err(AgriError::NotFound(msg)) => {
                assert_eq!(msg, "Batch with number 'KE/2024/999' not found");
            }
            other => panic!("expected not found, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_duplicate_batch_number_rejected() {
        let pool = setup_test_db().await;
        let (f, cc, pf, pc) = seed_chain(&pool).await;

        batch::create_batch_internal(
            &pool,
            batch_input("001", &cc, &pf, &pc, vec![f.farmer_id.clone()]),
        )
        .await
        .expect("first create");

        assert_validation(
            batch::create_batch_internal(
                &pool,
                batch_input("001", &cc, &pf, &pc, vec![f.farmer_id.clone()]),
            )
            .await,
            "Batch with number 'KE/2024/001' already exists",
        );
    }

    #[tokio::test]
    async fn test_deleting_collection_center_cascades_to_batches() {
        let pool = setup_test_db().await;
        let (f, cc, pf, pc) = seed_chain(&pool).await;

        batch::create_batch_internal(
            &pool,
            batch_input("001", &cc, &pf, &pc, vec![f.farmer_id.clone()]),
        )
        .await
        .expect("create batch");

        collection_center::delete_collection_center_internal(&pool, &cc.center_id)
            .await
            .expect("delete center");

        let batch_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM batches")
            .fetch_one(&pool)
            .await
            .expect("count");
        assert_eq!(batch_count, 0);

        let link_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM batch_farmers")
            .fetch_one(&pool)
            .await
            .expect("count");
        assert_eq!(link_count, 0);
    }

    #[tokio::test]
    async fn test_deleting_farmer_keeps_batch() {
        let pool = setup_test_db().await;
        let (f, cc, pf, pc) = seed_chain(&pool).await;

        batch::create_batch_internal(
            &pool,
            batch_input("001", &cc, &pf, &pc, vec![f.farmer_id.clone()]),
        )
        .await
        .expect("create batch");

        farmer::delete_farmer_internal(&pool, &f.farmer_id)
            .await
            .expect("delete farmer");

        let found = batch::find_batch_by_number_internal(&pool, "KE/2024/001")
            .await
            .expect("batch still present");
        assert!(found.contributing_farmers.is_empty());
    }

    #[tokio::test]
    async fn test_deleting_batch_leaves_entities() {
        let pool = setup_test_db().await;
        let (f, cc, pf, pc) = seed_chain(&pool).await;

        batch::create_batch_internal(
            &pool,
            batch_input("001", &cc, &pf, &pc, vec![f.farmer_id.clone()]),
        )
        .await
        .expect("create batch");

        batch::delete_batch_internal(&pool, "KE/2024/001")
            .await
            .expect("delete batch");

        farmer::get_farmer_internal(&pool, &f.farmer_id)
            .await
            .expect("farmer survives");
        collection_center::get_collection_center_internal(&pool, &cc.center_id)
            .await
            .expect("center survives");
        processing_facility::get_processing_facility_internal(&pool, &pf.facility_id)
            .await
            .expect("facility survives");
        packaging_center::get_packaging_center_internal(&pool, &pc.center_id)
            .await
            .expect("packaging center survives");
    }

    #[tokio::test]
    async fn test_auto_assigned_entity_ids() {
        let pool = setup_test_db().await;

        let first = seed_farmer(&pool, "Alice Wanjiku").await;
        let second = seed_farmer(&pool, "Beatrice Njeri").await;
        assert_eq!(first.farmer_id, "F001");
        assert_eq!(second.farmer_id, "F002");

        let cc = seed_collection_center(&pool).await;
        assert_eq!(cc.center_id, "CC001");
        let pf = seed_processing_facility(&pool).await;
        assert_eq!(pf.facility_id, "PF001");
        let pc = seed_packaging_center(&pool).await;
        assert_eq!(pc.center_id, "PC001");

        // Explicit ids are honored, and duplicates rejected.
        let explicit = farmer::create_farmer_internal(
            &pool,
            FarmerInput {
                farmer_id: Some("F050".to_string()),
                name: "Cyrus Kimani".to_string(),
                gender: Gender::Male,
                age: None,
                farm_size: 1.0,
                years_in_farming: None,
                region: "Embu".to_string(),
                certification: FarmerCertification::None,
                status: true,
            },
        )
        .await
        .expect("explicit id");
        assert_eq!(explicit.farmer_id, "F050");

        assert_validation(
            farmer::create_farmer_internal(
                &pool,
                FarmerInput {
                    farmer_id: Some("F050".to_string()),
                    name: "Duplicate".to_string(),
                    gender: Gender::Other,
                    age: None,
                    farm_size: 1.0,
                    years_in_farming: None,
                    region: "Embu".to_string(),
                    certification: FarmerCertification::None,
                    status: true,
                },
            )
            .await,
            "already exists",
        );
    }

    #[tokio::test]
    async fn test_farmer_validation_and_filters() {
        let pool = setup_test_db().await;

        assert_validation(
            farmer::create_farmer_internal(
                &pool,
                FarmerInput {
                    farmer_id: None,
                    name: "Bad Farm".to_string(),
                    gender: Gender::Male,
                    age: None,
                    farm_size: -1.0,
                    years_in_farming: None,
                    region: "Embu".to_string(),
                    certification: FarmerCertification::None,
                    status: true,
                },
            )
            .await,
            "farm_size must be non-negative",
        );

        seed_farmer(&pool, "Alice Wanjiku").await;
        let other = farmer::create_farmer_internal(
            &pool,
            FarmerInput {
                farmer_id: None,
                name: "David Otieno".to_string(),
                gender: Gender::Male,
                age: Some(55),
                farm_size: 4.0,
                years_in_farming: Some(30),
                region: "Kisumu".to_string(),
                certification: FarmerCertification::FairTrade,
                status: true,
            },
        )
        .await
        .expect("farmer");

        let by_region = farmer::get_farmer_list_internal(
            &pool,
            &FarmerListQuery {
                region: Some("Kisumu".to_string()),
                ..Default::default()
            },
        )
        .await
        .expect("list");
        assert_eq!(by_region.len(), 1);
        assert_eq!(by_region[0].farmer_id, other.farmer_id);

        let by_search = farmer::get_farmer_list_internal(
            &pool,
            &FarmerListQuery {
                search: Some("Otieno".to_string()),
                ..Default::default()
            },
        )
        .await
        .expect("list");
        assert_eq!(by_search.len(), 1);

        let ordered = farmer::get_farmer_list_internal(
            &pool,
            &FarmerListQuery {
                ordering: Some("-farm_size".to_string()),
                ..Default::default()
            },
        )
        .await
        .expect("list");
        assert_eq!(ordered[0].name, "David Otieno");
    }

    #[tokio::test]
    async fn test_facility_certification_tag_filter() {
        let pool = setup_test_db().await;

        seed_processing_facility(&pool).await; // HACCP + ORGANIC
        processing_facility::create_processing_facility_internal(
            &pool,
            ProcessingFacilityInput {
                facility_id: None,
                name: "Machakos Processing".to_string(),
                location: "Machakos".to_string(),
                coordinates: None,
                manager: None,
                contact: None,
                capacity: 6.0,
                certifications: vec![Certification::FairTrade],
                status: true,
            },
        )
        .await
        .expect("facility");

        let haccp = processing_facility::get_processing_facility_list_internal(
            &pool,
            &ProcessingFacilityListQuery {
                certification: Some(Certification::Haccp),
                ..Default::default()
            },
        )
        .await
        .expect("list");
        assert_eq!(haccp.len(), 1);
        assert_eq!(haccp[0].name, "Thika Processing");

        let iso = processing_facility::get_processing_facility_list_internal(
            &pool,
            &ProcessingFacilityListQuery {
                certification: Some(Certification::Iso22000),
                ..Default::default()
            },
        )
        .await
        .expect("list");
        assert!(iso.is_empty());
    }

    #[tokio::test]
    async fn test_update_batch_cannot_go_non_compliant() {
        let pool = setup_test_db().await;
        let (f, cc, pf, pc) = seed_chain(&pool).await;

        batch::create_batch_internal(
            &pool,
            batch_input("001", &cc, &pf, &pc, vec![f.farmer_id.clone()]),
        )
        .await
        .expect("create batch");

        assert_validation(
            batch::update_batch_internal(
                &pool,
                "KE/2024/001",
                BatchUpdate {
                    zero_child_labor: Some(false),
                    ..Default::default()
                },
            )
            .await,
            "ZERO child labor",
        );

        assert_validation(
            batch::update_batch_internal(
                &pool,
                "KE/2024/001",
                BatchUpdate {
                    zero_deforestation: Some(false),
                    ..Default::default()
                },
            )
            .await,
            "ZERO deforestation",
        );
    }

    #[tokio::test]
    async fn test_update_batch_facilities_are_set_once() {
        let pool = setup_test_db().await;
        let (f, cc, pf, pc) = seed_chain(&pool).await;

        batch::create_batch_internal(
            &pool,
            batch_input("001", &cc, &pf, &pc, vec![f.farmer_id.clone()]),
        )
        .await
        .expect("create batch");

        assert_validation(
            batch::update_batch_internal(
                &pool,
                "KE/2024/001",
                BatchUpdate {
                    collection_center: Some("CC002".to_string()),
                    ..Default::default()
                },
            )
            .await,
            "cannot be changed after creation",
        );
    }

    #[tokio::test]
    async fn test_update_batch_dates_and_farmer_set() {
        let pool = setup_test_db().await;
        let (f, cc, pf, pc) = seed_chain(&pool).await;
        let second = seed_farmer(&pool, "Beatrice Njeri").await;

        batch::create_batch_internal(
            &pool,
            batch_input("001", &cc, &pf, &pc, vec![f.farmer_id.clone()]),
        )
        .await
        .expect("create batch");

        let updated = batch::update_batch_internal(
            &pool,
            "KE/2024/001",
            BatchUpdate {
                expiry_date: NaiveDate::from_ymd_opt(2026, 1, 1),
                contributing_farmers: Some(vec![
                    f.farmer_id.clone(),
                    second.farmer_id.clone(),
                ]),
                ..Default::default()
            },
        )
        .await
        .expect("update batch");

        assert_eq!(
            updated.expiry_date,
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap()
        );
        assert_eq!(updated.contributing_farmers.len(), 2);
        assert!(updated.zero_child_labor && updated.zero_deforestation);

        // A backdated expiry against the existing packaging date is rejected.
        assert_validation(
            batch::update_batch_internal(
                &pool,
                "KE/2024/001",
                BatchUpdate {
                    expiry_date: NaiveDate::from_ymd_opt(2024, 1, 1),
                    ..Default::default()
                },
            )
            .await,
            "Expiry date must be on or after packaging date",
        );
    }

    #[tokio::test]
    async fn test_batch_list_filters_and_ordering() {
        let pool = setup_test_db().await;
        let (f, cc, pf, pc) = seed_chain(&pool).await;

        batch::create_batch_internal(
            &pool,
            batch_input("001", &cc, &pf, &pc, vec![f.farmer_id.clone()]),
        )
        .await
        .expect("batch 1");

        let mut later = batch_input("001", &cc, &pf, &pc, vec![f.farmer_id.clone()]);
        later.year = "2025".to_string();
        later.packaging_date = NaiveDate::from_ymd_opt(2025, 2, 1).unwrap();
        later.expiry_date = NaiveDate::from_ymd_opt(2026, 2, 1).unwrap();
        batch::create_batch_internal(&pool, later)
            .await
            .expect("batch 2");

        let by_year = batch::get_batch_list_internal(
            &pool,
            &BatchListQuery {
                year: Some("2025".to_string()),
                ..Default::default()
            },
        )
        .await
        .expect("list");
        assert_eq!(by_year.len(), 1);
        assert_eq!(by_year[0].batch_number, "KE/2025/001");

        let by_center = batch::get_batch_list_internal(
            &pool,
            &BatchListQuery {
                collection_center: Some(cc.center_id.clone()),
                ..Default::default()
            },
        )
        .await
        .expect("list");
        assert_eq!(by_center.len(), 2);

        let by_search = batch::get_batch_list_internal(
            &pool,
            &BatchListQuery {
                search: Some("2024".to_string()),
                ..Default::default()
            },
        )
        .await
        .expect("list");
        assert_eq!(by_search.len(), 1);
        assert_eq!(by_search[0].batch_number, "KE/2024/001");

        let newest_first = batch::get_batch_list_internal(
            &pool,
            &BatchListQuery {
                ordering: Some("-packaging_date".to_string()),
                ..Default::default()
            },
        )
        .await
        .expect("list");
        assert_eq!(newest_first[0].batch_number, "KE/2025/001");
    }

    #[tokio::test]
    async fn test_entity_detail_not_found() {
        let pool = setup_test_db().await;

        match farmer::get_farmer_internal(&pool, "F404").await {
            Err(AgriError::NotFound(msg)) => assert!(msg.contains("F404")),
            other => panic!("expected not found, got {:?}", other),
        }
        match collection_center::delete_collection_center_internal(&pool, "CC404").await {
            Err(AgriError::NotFound(_)) => {}
            other => panic!("expected not found, got {:?}", other),
        }
    }
}
