//! Integration tests for concurrent association safety.
//!
//! These tests verify that create-only writes plus CAS merges keep exactly one
//! record per docket and lose no subscriber under contention.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use causa_core::{MemoryBackend, StorageBackend};
use causa_ledger::prelude::*;

fn ledger() -> (Arc<dyn StorageBackend>, SubscriptionLedger) {
    let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    let ledger = SubscriptionLedger::new(
        Arc::clone(&backend),
        &LedgerConfig {
            cas_max_retries: 256,
        },
    )
    .unwrap();
    (backend, ledger)
}

fn request(n: usize, paid: bool) -> AssociateFolder {
    AssociateFolder {
        partition: Partition::Civil,
        docket: DocketKey::new("12345", "2024").unwrap(),
        user_id: UserId::parse(&format!("user-{n}")).unwrap(),
        folder_id: FolderId::parse(&format!("folder-{n}")).unwrap(),
        has_paid_subscription: paid,
    }
}

/// Many first associations for the same docket race - exactly one creates.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_first_associations_create_one_record() {
    let (backend, ledger) = ledger();
    let created = Arc::new(AtomicU32::new(0));
    let merged = Arc::new(AtomicU32::new(0));

    let handles: Vec<_> = (0..16)
        .map(|n| {
            let ledger = ledger.clone();
            let created = Arc::clone(&created);
            let merged = Arc::clone(&merged);
            tokio::spawn(async move {
                let association = ledger.associate_folder(request(n, n % 2 == 0)).await.unwrap();
                if association.created {
                    created.fetch_add(1, Ordering::SeqCst);
                } else {
                    merged.fetch_add(1, Ordering::SeqCst);
                }
                association.case_id
            })
        })
        .collect();

    let mut ids = BTreeSet::new();
    for handle in handles {
        ids.insert(handle.await.unwrap());
    }

    assert_eq!(created.load(Ordering::SeqCst), 1, "exactly one creator");
    assert_eq!(merged.load(Ordering::SeqCst), 15);
    assert_eq!(ids.len(), 1, "every caller sees the same record");

    let records = backend
        .list("ledger/collection=causas-civil/cases/")
        .await
        .unwrap();
    assert_eq!(records.len(), 1);

    let case_id = *ids.iter().next().unwrap();
    let record = ledger
        .get_case(Partition::Civil, case_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.folder_refs().len(), 16, "no folder lost");
    assert_eq!(record.subscription_entries().len(), 16, "no subscriber lost");
    assert!(record.needs_sync());

    let ids_index = backend
        .list("ledger/collection=causas-civil/ids/")
        .await
        .unwrap();
    assert_eq!(ids_index.len(), 1, "losing creators leave no id pointer");
}

/// Concurrent preference flips and associations interleave without losing
/// either kind of write.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bulk_toggle_concurrent_with_associations() {
    let (_, ledger) = ledger();
    let first = ledger.associate_folder(request(0, false)).await.unwrap();

    let toggler = {
        let ledger = ledger.clone();
        tokio::spawn(async move {
            ledger
                .set_user_update_preference(&UserId::parse("user-0").unwrap(), true)
                .await
                .unwrap()
        })
    };
    let associators: Vec<_> = (1..8)
        .map(|n| {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.associate_folder(request(n, false)).await.unwrap() })
        })
        .collect();

    let report = toggler.await.unwrap();
    assert_eq!(report.total_failed(), 0);
    for handle in associators {
        handle.await.unwrap();
    }

    let record = ledger
        .get_case(Partition::Civil, first.case_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.subscription_entries().len(), 8);
    assert_eq!(
        record
            .subscription_entries()
            .get(&UserId::parse("user-0").unwrap()),
        Some(true)
    );
    assert!(record.needs_sync());
}
