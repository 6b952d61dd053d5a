//! End-to-end transfer flows over the in-memory ledger

use std::sync::Arc;

use async_trait::async_trait;
use tokio_test::{assert_err, assert_ok};

use studbook::db::schemas::{
    AccountDoc, AnimalDoc, NotificationDoc, NotificationKind, PrivacyPreferences, SoldStatus,
    TransferDoc, TransferStatus, TransferType,
};
use studbook::notify::{MemoryNotificationSink, NotificationSink};
use studbook::projection::{ProjectionConfig, ProjectionStore, Reconciler};
use studbook::store::{LedgerStore, MemoryLedgerStore};
use studbook::transfer::{ProposeRequest, TransferService};
use studbook::{Result, StudbookError};

struct Harness {
    ledger: Arc<MemoryLedgerStore>,
    inbox: Arc<MemoryNotificationSink>,
    projections: Arc<ProjectionStore>,
    service: Arc<TransferService>,
}

impl Harness {
    async fn new() -> Self {
        Self::with_sink(None).await
    }

    async fn with_sink(sink: Option<Arc<dyn NotificationSink>>) -> Self {
        let ledger = Arc::new(MemoryLedgerStore::new());
        let inbox = Arc::new(MemoryNotificationSink::new());
        let projections = Arc::new(ProjectionStore::new(
            ledger.clone(),
            ProjectionConfig::default(),
        ));
        let notifier: Arc<dyn NotificationSink> = match sink {
            Some(sink) => sink,
            None => inbox.clone(),
        };
        let service = Arc::new(TransferService::new(
            ledger.clone(),
            projections.clone(),
            notifier,
        ));

        for (id, public_id, name) in [
            ("u1", "U1-PUB", "Willow Creek Cattery"),
            ("u2", "U2-PUB", "Harbor Lights"),
            ("u3", "U3-PUB", "Third Party"),
        ] {
            assert_ok!(ledger.insert_account(AccountDoc::new(id, public_id, name)).await);
        }

        let mut x1 = AnimalDoc::new("X1", "cat", "u1", "U1-PUB");
        x1.is_public = true;
        x1.include_remarks = true;
        x1.section_privacy.insert("identity".into(), true);
        x1.details.name = Some("Pepper".into());
        x1.details.remarks = Some("Champion line".into());
        assert_ok!(ledger.insert_animal(x1).await);

        let mut x2 = AnimalDoc::new("X2", "cat", "u1", "U1-PUB");
        x2.is_public = true;
        assert_ok!(ledger.insert_animal(x2).await);

        Self {
            ledger,
            inbox,
            projections,
            service,
        }
    }

    fn reconciler(&self) -> Reconciler {
        Reconciler::new(self.ledger.clone(), self.projections.clone())
    }

    async fn animal(&self, id_public: &str) -> AnimalDoc {
        self.ledger
            .find_animal(id_public)
            .await
            .unwrap()
            .expect("animal exists")
    }

    async fn account(&self, id: &str) -> AccountDoc {
        self.ledger
            .find_account(id)
            .await
            .unwrap()
            .expect("account exists")
    }

    async fn status_of(&self, transfer_id: &str) -> TransferStatus {
        self.ledger
            .find_transfer(transfer_id)
            .await
            .unwrap()
            .expect("transfer exists")
            .status
    }
}

fn proposal(
    to: &str,
    animal: &str,
    transfer_type: TransferType,
    view_only: bool,
) -> ProposeRequest {
    ProposeRequest {
        to_user_id: Some(to.into()),
        to_user_public_id: None,
        animal_id: animal.into(),
        transfer_type,
        offer_view_only: view_only,
        transaction_id: None,
    }
}

fn sale(to: &str, animal: &str) -> ProposeRequest {
    proposal(to, animal, TransferType::Sale, false)
}

/// Sink whose every call fails
struct UnreachableInbox;

#[async_trait]
impl NotificationSink for UnreachableInbox {
    async fn emit(&self, _notification: NotificationDoc) -> Result<()> {
        Err(StudbookError::Database("inbox unreachable".into()))
    }

    async fn resolve(&self, _transfer_id: &str, _status: TransferStatus) -> Result<u64> {
        Err(StudbookError::Database("inbox unreachable".into()))
    }
}

#[tokio::test]
async fn test_sale_moves_ownership_and_reprojects() {
    let h = Harness::new().await;

    let t = assert_ok!(h.service.propose("u1", sale("u2", "X1")).await);
    let accepted = assert_ok!(h.service.accept("u2", &t.id).await);
    assert_eq!(accepted.transfer.status, TransferStatus::Accepted);

    let x1 = h.animal("X1").await;
    assert_eq!(x1.owner_id, "u2");
    assert_eq!(x1.owner_id_public, "U2-PUB");
    assert_eq!(x1.sold_status, SoldStatus::Sold);
    assert!(x1.has_view_only("u1"));
    assert_eq!(x1.original_owner_id.as_deref(), Some("u1"));

    let summary = accepted.animal.expect("summary returned");
    assert_eq!(summary.owner_id, "u2");

    assert!(!h.account("u1").await.owns("X1"));
    assert!(h.account("u2").await.owns("X1"));

    let public = assert_ok!(h.service.public_animal("X1").await);
    assert_eq!(public.owner_id_public, "U2-PUB");
    assert_eq!(public.name.as_deref(), Some("Pepper"));
    // New owner has not opted into public remarks
    assert_eq!(public.remarks, None);

    // Former owner keeps read access
    assert_ok!(h.service.read_animal("u1", "X1").await);
}

#[tokio::test]
async fn test_sold_animal_cannot_be_sold_again() {
    let h = Harness::new().await;
    let t = assert_ok!(h.service.propose("u1", sale("u2", "X1")).await);
    assert_ok!(h.service.accept("u2", &t.id).await);

    let err = assert_err!(h.service.propose("u2", sale("u3", "X1")).await);
    assert!(matches!(err, StudbookError::PreconditionFailed(_)));

    // Former owner has no standing to propose at all
    let err = assert_err!(h.service.propose("u1", sale("u3", "X1")).await);
    assert!(matches!(err, StudbookError::PreconditionFailed(_)));

    let listed = assert_ok!(h.service.list("u3", &Default::default()).await);
    assert!(listed.is_empty());
}

#[tokio::test]
async fn test_concurrent_accepts_resolve_once() {
    let h = Harness::new().await;
    let t = assert_ok!(h.service.propose("u1", sale("u2", "X1")).await);

    let (first, second) = tokio::join!(
        h.service.accept("u2", &t.id),
        h.service.accept("u2", &t.id)
    );

    let (ok, err) = match (first, second) {
        (Ok(ok), Err(err)) | (Err(err), Ok(ok)) => (ok, err),
        other => panic!("expected exactly one success, got {:?}", other),
    };
    assert_eq!(ok.transfer.status, TransferStatus::Accepted);
    assert!(matches!(err, StudbookError::InvalidState(_)));

    let x1 = h.animal("X1").await;
    assert_eq!(x1.owner_id, "u2");
    assert_eq!(x1.view_only_for_users, vec!["u1".to_string()]);
    assert_eq!(h.inbox.notifications_for("u1").await.len(), 1);
}

#[tokio::test]
async fn test_racing_accept_and_decline_resolve_once() {
    let h = Harness::new().await;
    let t = assert_ok!(h.service.propose("u1", sale("u2", "X1")).await);

    let (accepted, declined) = tokio::join!(
        h.service.accept("u2", &t.id),
        h.service.decline("u2", &t.id)
    );

    match (accepted, declined) {
        (Ok(ok), Err(err)) => {
            assert_eq!(ok.transfer.status, TransferStatus::Accepted);
            assert!(matches!(err, StudbookError::InvalidState(_)));
            assert_eq!(h.status_of(&t.id).await, TransferStatus::Accepted);
            assert_eq!(h.animal("X1").await.owner_id, "u2");
        }
        (Err(err), Ok(view)) => {
            assert_eq!(view.status, TransferStatus::Declined);
            assert!(matches!(err, StudbookError::InvalidState(_)));
            assert_eq!(h.status_of(&t.id).await, TransferStatus::Declined);
            assert_eq!(h.animal("X1").await.owner_id, "u1");
        }
        other => panic!("expected exactly one success, got {:?}", other),
    }

    // The sender hears about exactly one outcome
    assert_eq!(h.inbox.notifications_for("u1").await.len(), 1);
}

#[tokio::test]
async fn test_view_only_purchase_back_to_seller() {
    let h = Harness::new().await;

    // u2 buys X2 from u1
    let t = assert_ok!(h.service.propose("u1", sale("u2", "X2")).await);
    assert_ok!(h.service.accept("u2", &t.id).await);

    // u1 was already granted read access by the sale; revoke it so the
    // view-only offer has something to grant
    assert_ok!(h.service.revoke_view_only("u2", "X2", "u1").await);
    assert!(!h.animal("X2").await.has_view_only("u1"));

    let offer = assert_ok!(
        h.service
            .propose("u2", proposal("u1", "X2", TransferType::Purchase, true))
            .await
    );
    let err = assert_err!(h.service.propose("u2", sale("u1", "X2")).await);
    assert!(matches!(err, StudbookError::PreconditionFailed(_)));

    let accepted = assert_ok!(h.service.accept_view_only("u1", &offer.id).await);
    assert_eq!(accepted.transfer.status, TransferStatus::Accepted);

    let x2 = h.animal("X2").await;
    assert_eq!(x2.owner_id, "u2");
    assert!(x2.has_view_only("u1"));
    assert_eq!(x2.sold_status, SoldStatus::Sold);
    assert!(h.account("u2").await.owns("X2"));
    assert!(!h.account("u1").await.owns("X2"));

    let inbox = h.inbox.notifications_for("u2").await;
    assert!(inbox
        .iter()
        .any(|n| n.kind == NotificationKind::ViewOnlyGranted));
}

#[tokio::test]
async fn test_view_only_grant_keeps_sold_marker() {
    let h = Harness::new().await;

    let t = assert_ok!(h.service.propose("u1", sale("u2", "X2")).await);
    assert_ok!(h.service.accept("u2", &t.id).await);
    assert_eq!(h.animal("X2").await.sold_status, SoldStatus::Sold);

    let offer = assert_ok!(
        h.service
            .propose("u2", proposal("u1", "X2", TransferType::Purchase, true))
            .await
    );
    assert_ok!(h.service.accept_view_only("u1", &offer.id).await);
    assert_eq!(h.animal("X2").await.sold_status, SoldStatus::Sold);

    // A sold animal stays unsellable after a view-only grant
    let err = assert_err!(h.service.propose("u2", sale("u3", "X2")).await);
    assert!(matches!(err, StudbookError::PreconditionFailed(_)));
}

#[tokio::test]
async fn test_accept_view_only_is_idempotent() {
    let h = Harness::new().await;
    let offer = assert_ok!(
        h.service
            .propose("u1", proposal("u2", "X1", TransferType::Sale, true))
            .await
    );

    let first = assert_ok!(h.service.accept_view_only("u2", &offer.id).await);
    let second = assert_ok!(h.service.accept_view_only("u2", &offer.id).await);
    assert_eq!(first.transfer.id, second.transfer.id);
    assert_eq!(second.transfer.status, TransferStatus::Accepted);

    let x1 = h.animal("X1").await;
    assert_eq!(x1.owner_id, "u1");
    assert_eq!(x1.view_only_for_users, vec!["u2".to_string()]);
    assert_eq!(x1.sold_status, SoldStatus::None);

    // Only one acceptance notification for the sender
    let inbox = h.inbox.notifications_for("u1").await;
    assert_eq!(inbox.len(), 1);

    let err = assert_err!(h.service.decline("u2", &offer.id).await);
    assert!(matches!(err, StudbookError::InvalidState(_)));
}

#[tokio::test]
async fn test_stale_owner_rolls_back_resolution() {
    let h = Harness::new().await;
    let to_u2 = assert_ok!(h.service.propose("u1", sale("u2", "X1")).await);
    let to_u3 = assert_ok!(h.service.propose("u1", sale("u3", "X1")).await);

    assert_ok!(h.service.accept("u3", &to_u3.id).await);

    let err = assert_err!(h.service.accept("u2", &to_u2.id).await);
    assert!(matches!(err, StudbookError::PreconditionFailed(_)));

    assert_eq!(h.status_of(&to_u2.id).await, TransferStatus::Pending);
    let x1 = h.animal("X1").await;
    assert_eq!(x1.owner_id, "u3");
    assert!(!x1.has_view_only("u2"));
    assert!(!h.account("u2").await.owns("X1"));

    // The stale proposal can still be declined
    assert_ok!(h.service.decline("u2", &to_u2.id).await);
}

#[tokio::test]
async fn test_missing_animal_leaves_transfer_pending() {
    let h = Harness::new().await;
    let orphan = TransferDoc::pending("u1", "u2", "GONE", TransferType::Sale, false);
    assert_ok!(h.ledger.insert_transfer(orphan.clone()).await);

    let err = assert_err!(h.service.accept("u2", &orphan.id).await);
    assert!(matches!(err, StudbookError::NotFound(_)));
    assert_eq!(h.status_of(&orphan.id).await, TransferStatus::Pending);
    assert!(assert_ok!(h.ledger.find_projection("GONE").await).is_none());
}

#[tokio::test]
async fn test_notification_failure_does_not_fail_transfer() {
    let h = Harness::with_sink(Some(Arc::new(UnreachableInbox))).await;

    let t = assert_ok!(h.service.propose("u1", sale("u2", "X1")).await);
    let accepted = assert_ok!(h.service.accept("u2", &t.id).await);
    assert_eq!(accepted.transfer.status, TransferStatus::Accepted);
    assert_eq!(h.animal("X1").await.owner_id, "u2");
}

#[tokio::test]
async fn test_duplicate_pending_proposal_conflicts() {
    let h = Harness::new().await;
    assert_ok!(h.service.propose("u1", sale("u2", "X1")).await);
    let err = assert_err!(h.service.propose("u1", sale("u2", "X1")).await);
    assert!(matches!(err, StudbookError::Conflict(_)));
}

#[tokio::test]
async fn test_list_filters_by_direction_and_status() {
    let h = Harness::new().await;
    let t1 = assert_ok!(h.service.propose("u1", sale("u2", "X1")).await);
    assert_ok!(h.service.propose("u1", sale("u3", "X2")).await);
    assert_ok!(h.service.decline("u2", &t1.id).await);

    let outgoing: studbook::store::TransferFilter =
        serde_urlencoded::from_str("direction=outgoing").unwrap();
    assert_eq!(assert_ok!(h.service.list("u1", &outgoing).await).len(), 2);

    let pending: studbook::store::TransferFilter =
        serde_urlencoded::from_str("status=pending").unwrap();
    let listed = assert_ok!(h.service.list("u1", &pending).await);
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].to_user_id, "u3");

    let incoming: studbook::store::TransferFilter =
        serde_urlencoded::from_str("direction=incoming").unwrap();
    assert!(assert_ok!(h.service.list("u1", &incoming).await).is_empty());
    assert_eq!(assert_ok!(h.service.list("u2", &incoming).await).len(), 1);
}

#[tokio::test]
async fn test_privacy_update_reprojects_owned_animals() {
    let h = Harness::new().await;
    assert_ok!(h.reconciler().reconcile().await);

    let before = assert_ok!(h.service.public_animal("X1").await);
    assert_eq!(before.remarks, None);

    let update = assert_ok!(
        h.service
            .update_privacy(
                "u1",
                PrivacyPreferences {
                    show_remarks_public: true,
                    show_genetic_code_public: false,
                    show_name_public: true,
                },
            )
            .await
    );
    assert_eq!(update.reprojected, 2);
    assert_eq!(update.failed, 0);

    let after = assert_ok!(h.service.public_animal("X1").await);
    assert_eq!(after.remarks.as_deref(), Some("Champion line"));

    let err = assert_err!(
        h.service
            .update_privacy("nobody", PrivacyPreferences::default())
            .await
    );
    assert!(matches!(err, StudbookError::NotFound(_)));
}

#[tokio::test]
async fn test_refresh_after_sale_keeps_new_owner() {
    let h = Harness::new().await;
    assert_ok!(h.reconciler().reconcile().await);
    let before_sale = h.animal("X1").await;
    assert_eq!(before_sale.owner_id_public, "U1-PUB");

    let t = assert_ok!(h.service.propose("u1", sale("u2", "X1")).await);
    assert_ok!(h.service.accept("u2", &t.id).await);

    let refreshed = assert_ok!(h.service.refresh_animal(&before_sale.id_public).await)
        .expect("X1 is public");
    assert_eq!(refreshed.owner_id_public, "U2-PUB");
    let stored = assert_ok!(h.ledger.find_projection("X1").await).expect("X1 projected");
    assert_eq!(stored.owner_id_public, "U2-PUB");
}

#[tokio::test]
async fn test_privacy_update_racing_accept_keeps_new_owner() {
    let h = Harness::new().await;
    assert_ok!(h.reconciler().reconcile().await);
    let t = assert_ok!(h.service.propose("u1", sale("u2", "X1")).await);

    let prefs = PrivacyPreferences {
        show_remarks_public: true,
        ..Default::default()
    };
    let reconciler = h.reconciler();
    let (privacy, accepted, swept) = tokio::join!(
        h.service.update_privacy("u1", prefs),
        h.service.accept("u2", &t.id),
        reconciler.reconcile()
    );
    assert_ok!(privacy);
    assert_ok!(accepted);
    assert_ok!(swept);

    let public = assert_ok!(h.service.public_animal("X1").await);
    assert_eq!(public.owner_id_public, "U2-PUB");
    let stored = assert_ok!(h.ledger.find_projection("X1").await).expect("X1 projected");
    assert_eq!(stored.owner_id_public, "U2-PUB");
    // u2 never opted into public remarks
    assert_eq!(stored.remarks, None);
}

#[tokio::test]
async fn test_reconcile_converges() {
    let h = Harness::new().await;

    let first = assert_ok!(h.reconciler().reconcile().await);
    assert_eq!(first.scanned, 2);
    assert_eq!(first.created, 2);

    let t = assert_ok!(h.service.propose("u1", sale("u2", "X1")).await);
    assert_ok!(h.service.accept("u2", &t.id).await);

    // The resolution already wrote the projection; nothing to repair
    let second = assert_ok!(h.reconciler().reconcile().await);
    assert_eq!(second.repaired(), 0);
    assert_eq!(second.unchanged, 2);

    let stored = assert_ok!(h.ledger.list_projections().await);
    assert_eq!(stored.len(), 2);
    let x1 = stored
        .iter()
        .find(|p| p.id_public == "X1")
        .expect("X1 projected");
    assert_eq!(x1.owner_id_public, "U2-PUB");
}

#[tokio::test]
async fn test_unknown_public_animal_is_not_found() {
    let h = Harness::new().await;
    let err = assert_err!(h.service.public_animal("NOPE").await);
    assert!(matches!(err, StudbookError::NotFound(_)));
}
