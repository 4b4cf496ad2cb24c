//! End-to-end ledger behavior over the in-memory backend.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::BTreeSet;
use std::sync::Arc;

use bytes::Bytes;
use serde_json::{Value, json};

use causa_core::{MemoryBackend, StorageBackend, WritePrecondition};
use causa_ledger::prelude::*;

struct Fixture {
    backend: Arc<dyn StorageBackend>,
    ledger: SubscriptionLedger,
}

impl Fixture {
    fn new() -> Self {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let ledger = SubscriptionLedger::new(Arc::clone(&backend), &LedgerConfig::default())
            .expect("ledger");
        Self { backend, ledger }
    }

    async fn associate(
        &self,
        partition: &str,
        number: &str,
        user: &str,
        folder: &str,
        paid: bool,
    ) -> Result<Association> {
        self.ledger
            .associate_folder(AssociateFolder {
                partition: Partition::resolve(partition)?,
                docket: DocketKey::new(number, "2024")?,
                user_id: UserId::parse(user)?,
                folder_id: FolderId::parse(folder)?,
                has_paid_subscription: paid,
            })
            .await
    }

    async fn case(&self, partition: Partition, id: CaseId) -> CaseRecord {
        self.ledger
            .get_case(partition, id)
            .await
            .unwrap()
            .expect("case exists")
    }

    fn raw_path(partition: Partition, relative: &str) -> String {
        format!("ledger/collection={}/{relative}", partition.collection())
    }

    async fn raw_doc(&self, partition: Partition, relative: &str) -> Value {
        let bytes = self
            .backend
            .get(&Self::raw_path(partition, relative))
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn put_raw_doc(&self, partition: Partition, relative: &str, doc: &Value) {
        self.backend
            .put(
                &Self::raw_path(partition, relative),
                Bytes::from(serde_json::to_vec(doc).unwrap()),
                WritePrecondition::None,
            )
            .await
            .unwrap();
    }
}

fn user(s: &str) -> UserId {
    UserId::parse(s).unwrap()
}

fn folder(s: &str) -> FolderId {
    FolderId::parse(s).unwrap()
}

#[tokio::test]
async fn new_case_then_unpaid_subscriber_then_pause_then_reconcile() {
    let fx = Fixture::new();

    let first = fx.associate("CIV", "12345", "userA", "folderA", true).await.unwrap();
    assert!(first.created);
    assert!(first.needs_sync);

    let record = fx.case(Partition::Civil, first.case_id).await;
    assert_eq!(record.folder_refs().len(), 1);
    assert!(record.has_folder(&folder("folderA")));
    assert_eq!(record.subscription_entries().get(&user("userA")), Some(true));
    assert_eq!(record.source_tag(), Some("app"));

    let second = fx.associate("civil", "12345", "userB", "folderB", false).await.unwrap();
    assert!(!second.created);
    assert_eq!(second.case_id, first.case_id);
    assert!(second.needs_sync, "userA is still enabled");

    let record = fx.case(Partition::Civil, first.case_id).await;
    assert_eq!(record.subscription_entries().get(&user("userB")), Some(false));
    assert_eq!(record.subscriber_user_refs().len(), 2);

    let report = fx
        .ledger
        .set_user_update_preference(&user("userA"), false)
        .await
        .unwrap();
    assert_eq!(report.partition(Partition::Civil).unwrap().updated, 1);
    assert_eq!(report.total_failed(), 0);
    let record = fx.case(Partition::Civil, first.case_id).await;
    assert_eq!(record.subscription_entries().get(&user("userA")), Some(false));
    assert!(!record.needs_sync());

    let roster: BTreeSet<UserId> = [user("userB")].into_iter().collect();
    let report = fx.ledger.reconcile_active_subscribers(&roster).await.unwrap();
    assert_eq!(report.total_updated(), 1);
    let record = fx.case(Partition::Civil, first.case_id).await;
    assert_eq!(record.subscription_entries().get(&user("userA")), Some(false));
    assert_eq!(record.subscription_entries().get(&user("userB")), Some(true));
    assert!(record.needs_sync());

    let again = fx.ledger.reconcile_active_subscribers(&roster).await.unwrap();
    assert_eq!(again.total_updated(), 0, "reconciliation is idempotent");
}

#[tokio::test]
async fn reassociating_same_folder_is_a_duplicate() {
    let fx = Fixture::new();
    let first = fx.associate("CIV", "777", "userA", "folderA", true).await.unwrap();

    let err = fx
        .associate("CIV", "777", "userA", "folderA", true)
        .await
        .unwrap_err();
    match err {
        LedgerError::DuplicateAssociation {
            folder_id,
            case_id,
            needs_sync,
        } => {
            assert_eq!(folder_id, "folderA");
            assert_eq!(case_id, first.case_id.to_string());
            assert!(needs_sync);
        }
        other => panic!("expected duplicate, got {other:?}"),
    }
}

#[tokio::test]
async fn association_never_lowers_enabled_but_can_raise_it() {
    let fx = Fixture::new();
    let created = fx.associate("CNT", "55", "userA", "folderA", false).await.unwrap();
    assert!(!created.needs_sync);

    let raised = fx.associate("CNT", "55", "userA", "folderA", true).await.unwrap();
    assert!(raised.needs_sync, "paid re-association raises enabled");

    let err = fx
        .associate("CNT", "55", "userA", "folderA", false)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::DuplicateAssociation { needs_sync: true, .. }));

    let record = fx.case(Partition::Labor, created.case_id).await;
    assert_eq!(record.subscription_entries().get(&user("userA")), Some(true));
}

#[tokio::test]
async fn dissociation_is_symmetric_idempotent_and_keeps_the_record() {
    let fx = Fixture::new();
    let created = fx.associate("COM", "9", "userA", "folderA", true).await.unwrap();

    let removed = fx
        .ledger
        .dissociate_folder(
            Partition::Commercial,
            created.case_id,
            &folder("folderA"),
            &user("userA"),
        )
        .await
        .unwrap();
    assert!(removed.changed);
    assert!(!removed.needs_sync);

    let record = fx.case(Partition::Commercial, created.case_id).await;
    assert!(record.folder_refs().is_empty());
    assert!(record.subscriber_user_refs().is_empty());
    assert!(record.subscription_entries().is_empty());

    let again = fx
        .ledger
        .dissociate_folder(
            Partition::Commercial,
            created.case_id,
            &folder("folderA"),
            &user("userA"),
        )
        .await
        .unwrap();
    assert!(!again.changed);

    let found = fx
        .ledger
        .find_case_by_folder(Partition::Commercial, &folder("folderA"))
        .await
        .unwrap();
    assert!(found.is_none());
}

#[tokio::test]
async fn dissociating_unknown_case_is_not_found() {
    let fx = Fixture::new();
    fx.associate("CIV", "1", "userA", "folderA", true).await.unwrap();

    let err = fx
        .ledger
        .dissociate_folder(
            Partition::Civil,
            CaseId::generate(),
            &folder("folderA"),
            &user("userA"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::NotFound { entity: "causa", .. }));
}

#[tokio::test]
async fn case_ids_do_not_resolve_across_partitions() {
    let fx = Fixture::new();
    let created = fx.associate("CIV", "1", "userA", "folderA", true).await.unwrap();

    let err = fx
        .ledger
        .dissociate_folder(
            Partition::Labor,
            created.case_id,
            &folder("folderA"),
            &user("userA"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::NotFound { .. }));
    assert!(
        fx.ledger
            .find_case_by_folder(Partition::Labor, &folder("folderA"))
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn find_by_folder_tolerates_identifier_spelling() {
    let fx = Fixture::new();
    let created = fx
        .associate("CSS", "42", "userA", "65A1B2C3D4E5F6A7B8C9D0E1", true)
        .await
        .unwrap();

    let found = fx
        .ledger
        .find_case_by_folder(
            Partition::SocialSecurity,
            &folder("ObjectId(\"65a1b2c3d4e5f6a7b8c9d0e1\")"),
        )
        .await
        .unwrap()
        .expect("found");
    assert_eq!(found.id, created.case_id);

    let missing = fx
        .ledger
        .find_case_by_folder(Partition::SocialSecurity, &folder("nope"))
        .await
        .unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn verified_case_returns_summary_and_keeps_worker_fields() {
    let fx = Fixture::new();
    let created = fx.associate("CIV", "12345", "userA", "folderA", true).await.unwrap();
    assert!(created.summary.is_none());

    let path = "cases/12345-2024.json";
    let mut doc = fx.raw_doc(Partition::Civil, path).await;
    doc["verified"] = json!(true);
    doc["isValid"] = json!(true);
    doc["caption"] = json!("PEREZ C/ GOMEZ S/ DESALOJO");
    doc["movement"] = json!([
        {"date": "2024-06-02T10:00:00Z", "detail": "traslado"},
        {"date": "2024-03-01", "detail": "inicio"}
    ]);
    doc["workerCursor"] = json!(31);
    fx.put_raw_doc(Partition::Civil, path, &doc).await;

    let second = fx.associate("CIV", "12345", "userB", "folderB", false).await.unwrap();
    let summary = second.summary.expect("summary for verified case");
    assert_eq!(summary.docket_number, "12345");
    assert_eq!(summary.caption.as_deref(), Some("PEREZ C/ GOMEZ S/ DESALOJO"));
    assert_eq!(
        summary.earliest_movement.unwrap().to_rfc3339(),
        "2024-03-01T00:00:00+00:00"
    );

    let stored = fx.raw_doc(Partition::Civil, path).await;
    assert_eq!(stored["workerCursor"], json!(31));
    assert_eq!(stored["verified"], json!(true));
    assert_eq!(stored["movement"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn bulk_scan_counts_failures_and_continues() {
    let fx = Fixture::new();
    fx.associate("CIV", "1", "userA", "f1", true).await.unwrap();
    fx.associate("CIV", "2", "userA", "f2", true).await.unwrap();
    fx.associate("CNT", "3", "userA", "f3", true).await.unwrap();

    fx.backend
        .put(
            &Fixture::raw_path(Partition::Civil, "cases/0-2024.json"),
            Bytes::from_static(b"{not json"),
            WritePrecondition::None,
        )
        .await
        .unwrap();

    let report = fx
        .ledger
        .set_user_update_preference(&user("userA"), false)
        .await
        .unwrap();
    let civil = report.partition(Partition::Civil).unwrap();
    assert_eq!(civil.scanned, 3);
    assert_eq!(civil.updated, 2);
    assert_eq!(civil.failed, 1);
    assert_eq!(report.partition(Partition::Labor).unwrap().updated, 1);
    assert_eq!(report.partition(Partition::Commercial).unwrap().scanned, 0);
}

#[tokio::test]
async fn preference_toggle_skips_cases_without_the_user() {
    let fx = Fixture::new();
    let mine = fx.associate("CIV", "1", "userA", "f1", false).await.unwrap();
    let theirs = fx.associate("CIV", "2", "userB", "f2", false).await.unwrap();

    let report = fx
        .ledger
        .set_user_update_preference(&user("userA"), true)
        .await
        .unwrap();
    assert_eq!(report.total_updated(), 1);

    assert!(fx.case(Partition::Civil, mine.case_id).await.needs_sync());
    let other = fx.case(Partition::Civil, theirs.case_id).await;
    assert!(!other.needs_sync());
    assert!(other.subscription_entries().get(&user("userA")).is_none());
}

#[tokio::test]
async fn preference_toggle_does_not_count_repair_only_writes() {
    let fx = Fixture::new();
    let mine = fx.associate("CIV", "1", "userA", "f1", true).await.unwrap();

    // Stale needsSync on a case userA has nothing to do with.
    fx.put_raw_doc(
        Partition::Civil,
        "cases/900-2020.json",
        &json!({
            "id": CaseId::generate(),
            "docketNumber": "900",
            "filingYear": "2020",
            "folderRefs": ["f9"],
            "subscriberUserRefs": ["userZ"],
            "subscriptionEntries": [{"userId": "userZ", "enabled": false}],
            "needsSync": true
        }),
    )
    .await;

    let report = fx
        .ledger
        .set_user_update_preference(&user("userA"), false)
        .await
        .unwrap();
    let civil = report.partition(Partition::Civil).unwrap();
    assert_eq!(civil.scanned, 2);
    assert_eq!(civil.updated, 1);
    assert_eq!(civil.failed, 0);

    assert!(!fx.case(Partition::Civil, mine.case_id).await.needs_sync());
    let repaired = fx.raw_doc(Partition::Civil, "cases/900-2020.json").await;
    assert_eq!(repaired["needsSync"], json!(false), "repair is still persisted");
}

#[tokio::test]
async fn normalize_array_shape_repairs_legacy_records_once() {
    let fx = Fixture::new();
    let clean = fx.associate("CIV", "1", "userA", "f1", true).await.unwrap();

    let legacy_id = CaseId::generate();
    fx.put_raw_doc(
        Partition::Civil,
        "cases/500-2019.json",
        &json!({
            "id": legacy_id,
            "docketNumber": "500",
            "filingYear": "2019",
            "folderRefs": "legacyF",
            "subscriberUserRefs": "userZ",
            "verified": true
        }),
    )
    .await;

    let tally = fx
        .ledger
        .normalize_array_shape(Partition::Civil)
        .await
        .unwrap();
    assert_eq!(tally.scanned, 2);
    assert_eq!(tally.updated, 1);
    assert_eq!(tally.failed, 0);

    let repaired = fx.raw_doc(Partition::Civil, "cases/500-2019.json").await;
    assert_eq!(repaired["folderRefs"], json!(["legacyF"]));
    assert_eq!(repaired["subscriberUserRefs"], json!(["userZ"]));
    assert_eq!(
        repaired["subscriptionEntries"],
        json!([{"userId": "userZ", "enabled": false}])
    );
    assert_eq!(repaired["needsSync"], json!(false));
    assert_eq!(repaired["verified"], json!(true));

    let again = fx
        .ledger
        .normalize_array_shape(Partition::Civil)
        .await
        .unwrap();
    assert_eq!(again.updated, 0, "repair is idempotent");

    let found = fx
        .ledger
        .find_case_by_folder(Partition::Civil, &folder("legacyF"))
        .await
        .unwrap()
        .expect("legacy folder reachable after repair");
    assert_eq!(found.id, legacy_id);

    assert!(fx.case(Partition::Civil, clean.case_id).await.needs_sync());
}

#[tokio::test]
async fn list_cases_pages_and_filters_by_subscriber() {
    let fx = Fixture::new();
    for (n, who) in [("1", "userA"), ("2", "userB"), ("3", "userA"), ("4", "userA")] {
        fx.associate("CIV", n, who, &format!("f{n}"), true).await.unwrap();
    }

    let page = fx
        .ledger
        .list_cases(Partition::Civil, 0, 2, None)
        .await
        .unwrap();
    assert_eq!(page.records.len(), 2);
    assert_eq!(page.next_offset, Some(2));

    let rest = fx
        .ledger
        .list_cases(Partition::Civil, 2, 10, None)
        .await
        .unwrap();
    assert_eq!(rest.records.len(), 2);
    assert_eq!(rest.next_offset, None);

    let mine = fx
        .ledger
        .list_cases(Partition::Civil, 0, 10, Some(&user("userA")))
        .await
        .unwrap();
    let numbers: Vec<&str> = mine.records.iter().map(|r| r.docket_number.as_str()).collect();
    assert_eq!(numbers, vec!["1", "3", "4"]);
}

#[tokio::test]
async fn invalid_inputs_fail_before_storage() {
    let fx = Fixture::new();
    assert!(matches!(
        fx.associate("penal", "1", "userA", "f1", true).await,
        Err(LedgerError::InvalidPartition { .. })
    ));
    assert!(matches!(
        fx.associate("CIV", "", "userA", "f1", true).await,
        Err(LedgerError::Validation { .. })
    ));
    assert!(fx.backend.list("ledger/").await.unwrap().is_empty());
}
