//! MongoDB ledger store
//!
//! Transfer resolutions run inside a multi-document transaction:
//!
//! 1. compare-and-swap the transfer from `pending`
//! 2. re-read the animal and check the expected owner
//! 3. mutate the animal (`$set` owner fields, `$addToSet` grants)
//! 4. `$pull` / `$addToSet` the owned-animal sets
//! 5. replace-upsert (or remove) the public projection keyed on the public id
//!
//! Transient transaction errors (write conflicts between racing accepts)
//! retry the whole unit; a retry that finds the transfer no longer pending
//! surfaces `InvalidState`.
//!
//! Out-of-band re-projection (privacy changes, admin refresh, reconcile)
//! runs through the same retry loop: it reads the animal and owner and
//! writes the projection in one transaction, so it write-conflicts with an
//! acceptance touching the same projection instead of overwriting it.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use bson::{doc, Bson, DateTime, Document};
use futures_util::TryStreamExt;
use mongodb::error::{TRANSIENT_TRANSACTION_ERROR, UNKNOWN_TRANSACTION_COMMIT_RESULT};
use mongodb::options::ReplaceOptions;
use mongodb::{ClientSession, Collection};
use tracing::{debug, info, warn};

use crate::db::mongo::{MongoClient, MongoCollection};
use crate::db::schemas::{
    AccountDoc, AnimalDoc, PrivacyPreferences, TransferDoc, ACCOUNT_COLLECTION, ANIMAL_COLLECTION,
    TRANSFER_COLLECTION,
};
use crate::projection::document::{PublicAnimalDoc, PUBLIC_ANIMAL_COLLECTION};
use crate::types::{Result, StudbookError};

use super::{
    apply_effect, project_with, Direction, LedgerStore, Resolution, ResolutionOutcome,
    TransferFilter,
};

/// Failure inside a transaction attempt
enum TxnError {
    /// Business rule violation: abort, never retry
    Domain(StudbookError),
    /// Driver error: retried when labelled transient
    Mongo(mongodb::error::Error),
}

impl From<mongodb::error::Error> for TxnError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Mongo(err)
    }
}

impl From<StudbookError> for TxnError {
    fn from(err: StudbookError) -> Self {
        Self::Domain(err)
    }
}

/// Work run inside one transaction attempt
#[async_trait]
trait TxnUnit: fmt::Display + Send + Sync {
    type Output: Send;

    async fn run(
        &self,
        store: &MongoLedgerStore,
        session: &mut ClientSession,
    ) -> std::result::Result<Self::Output, TxnError>;
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transfer {}", self.transfer_id)
    }
}

#[async_trait]
impl TxnUnit for Resolution {
    type Output = ResolutionOutcome;

    async fn run(
        &self,
        store: &MongoLedgerStore,
        session: &mut ClientSession,
    ) -> std::result::Result<ResolutionOutcome, TxnError> {
        store.resolve_in_session(session, self).await
    }
}

/// Re-projection of one animal
struct Reproject<'a>(&'a str);

impl fmt::Display for Reproject<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "projection {}", self.0)
    }
}

#[async_trait]
impl<'a> TxnUnit for Reproject<'a> {
    type Output = Option<PublicAnimalDoc>;

    async fn run(
        &self,
        store: &MongoLedgerStore,
        session: &mut ClientSession,
    ) -> std::result::Result<Option<PublicAnimalDoc>, TxnError> {
        store.reproject_in_session(session, self.0).await
    }
}

/// Ledger store backed by MongoDB (replica set required for transactions)
pub struct MongoLedgerStore {
    client: MongoClient,
    accounts: MongoCollection<AccountDoc>,
    animals: MongoCollection<AnimalDoc>,
    transfers: MongoCollection<TransferDoc>,
    projections: MongoCollection<PublicAnimalDoc>,
    max_attempts: u32,
}

impl MongoLedgerStore {
    /// Open the collections and apply indexes.
    ///
    /// Duplicate projections left by older writers are collapsed before the
    /// unique projection index is created.
    pub async fn new(client: MongoClient, max_attempts: u32) -> Result<Self> {
        let collapsed = collapse_duplicates(&raw_projections(&client)).await?;
        if collapsed > 0 {
            warn!(removed = collapsed, "Collapsed duplicate projections before indexing");
        }

        let accounts = client.collection::<AccountDoc>(ACCOUNT_COLLECTION).await?;
        let animals = client.collection::<AnimalDoc>(ANIMAL_COLLECTION).await?;
        let transfers = client.collection::<TransferDoc>(TRANSFER_COLLECTION).await?;
        let projections = client
            .collection::<PublicAnimalDoc>(PUBLIC_ANIMAL_COLLECTION)
            .await?;

        info!(db = %client.db_name(), "Ledger collections ready");

        Ok(Self {
            client,
            accounts,
            animals,
            transfers,
            projections,
            max_attempts: max_attempts.max(1),
        })
    }

    /// One transaction attempt. The caller owns start/commit/abort.
    async fn resolve_in_session(
        &self,
        session: &mut ClientSession,
        resolution: &Resolution,
    ) -> std::result::Result<ResolutionOutcome, TxnError> {
        let transfers = self.transfers.inner();

        let cas = transfers
            .update_one(
                doc! { "_id": &resolution.transfer_id, "status": "pending" },
                doc! {
                    "$set": {
                        "status": resolution.status.as_str(),
                        "responded_at": resolution.responded_at,
                        "metadata.updated_at": DateTime::now(),
                    }
                },
            )
            .session(&mut *session)
            .await?;

        if cas.matched_count == 0 {
            let existing = transfers
                .find_one(doc! { "_id": &resolution.transfer_id })
                .session(&mut *session)
                .await?;
            return Err(match existing {
                None => StudbookError::NotFound(format!(
                    "Transfer {} not found",
                    resolution.transfer_id
                )),
                Some(t) => StudbookError::InvalidState(format!(
                    "Transfer {} is already {}",
                    t.id, t.status
                )),
            }
            .into());
        }

        let transfer = transfers
            .find_one(doc! { "_id": &resolution.transfer_id })
            .session(&mut *session)
            .await?
            .ok_or_else(|| {
                StudbookError::Internal(format!(
                    "Transfer {} vanished inside transaction",
                    resolution.transfer_id
                ))
            })?;

        let Some(effect) = &resolution.effect else {
            return Ok(ResolutionOutcome {
                transfer,
                animal: None,
                projection: None,
            });
        };

        let current = self
            .animals
            .inner()
            .find_one(doc! {
                "id_public": &effect.animal_id_public,
                "metadata.is_deleted": { "$ne": true },
            })
            .session(&mut *session)
            .await?
            .ok_or_else(|| {
                StudbookError::NotFound(format!("Animal {} not found", effect.animal_id_public))
            })?;

        if !current.is_owned_by(&effect.expected_owner_id) {
            return Err(StudbookError::PreconditionFailed(format!(
                "Animal {} is no longer owned by {}",
                effect.animal_id_public, effect.expected_owner_id
            ))
            .into());
        }

        let owner_id = effect
            .ownership
            .as_ref()
            .map(|c| c.new_owner_id.as_str())
            .unwrap_or(current.owner_id.as_str());
        let owner = self
            .accounts
            .inner()
            .find_one(doc! { "_id": owner_id })
            .session(&mut *session)
            .await?;

        let mut next = current.clone();
        apply_effect(
            &mut next,
            effect,
            effect.ownership.as_ref().and(owner.as_ref()),
        );

        let mut set = doc! {
            "owner_id": &next.owner_id,
            "owner_id_public": &next.owner_id_public,
            "sold_status": next.sold_status.as_str(),
            "metadata.updated_at": DateTime::now(),
        };
        if let Some(original) = &next.original_owner_id {
            set.insert("original_owner_id", original);
        }
        let mut update = doc! { "$set": set };
        if !effect.grant_view_only.is_empty() {
            update.insert(
                "$addToSet",
                doc! { "view_only_for_users": { "$each": effect.grant_view_only.clone() } },
            );
        }

        let moved = self
            .animals
            .inner()
            .update_one(
                doc! {
                    "id_public": &effect.animal_id_public,
                    "owner_id": &effect.expected_owner_id,
                },
                update,
            )
            .session(&mut *session)
            .await?;
        if moved.matched_count == 0 {
            return Err(StudbookError::PreconditionFailed(format!(
                "Animal {} changed owner during acceptance",
                effect.animal_id_public
            ))
            .into());
        }

        if let Some(change) = &effect.ownership {
            self.accounts
                .inner()
                .update_one(
                    doc! { "_id": &change.previous_owner_id },
                    doc! { "$pull": { "owned_animals": &next.id_public } },
                )
                .session(&mut *session)
                .await?;
            self.accounts
                .inner()
                .update_one(
                    doc! { "_id": &change.new_owner_id },
                    doc! { "$addToSet": { "owned_animals": &next.id_public } },
                )
                .session(&mut *session)
                .await?;
        }

        let projection = project_with(&next, owner.as_ref());
        self.store_projection(session, &next.id_public, projection.as_ref())
            .await?;

        Ok(ResolutionOutcome {
            transfer,
            animal: Some(next),
            projection,
        })
    }

    /// Re-derive one projection from the records visible to the session
    async fn reproject_in_session(
        &self,
        session: &mut ClientSession,
        id_public: &str,
    ) -> std::result::Result<Option<PublicAnimalDoc>, TxnError> {
        let animal = self
            .animals
            .inner()
            .find_one(doc! {
                "id_public": id_public,
                "metadata.is_deleted": { "$ne": true },
            })
            .session(&mut *session)
            .await?;

        let projection = match &animal {
            Some(animal) => {
                let owner = self
                    .accounts
                    .inner()
                    .find_one(doc! { "_id": &animal.owner_id })
                    .session(&mut *session)
                    .await?;
                project_with(animal, owner.as_ref())
            }
            None => None,
        };

        self.store_projection(session, id_public, projection.as_ref())
            .await?;
        Ok(projection)
    }

    /// Replace-upsert keyed on the public id, or remove every document for
    /// it. Legacy documents with another `_id` are dropped on upsert.
    async fn store_projection(
        &self,
        session: &mut ClientSession,
        id_public: &str,
        projection: Option<&PublicAnimalDoc>,
    ) -> mongodb::error::Result<()> {
        let projections = self.projections.inner();
        match projection {
            Some(projected) => {
                projections
                    .delete_many(doc! {
                        "id_public": id_public,
                        "_id": { "$ne": id_public },
                    })
                    .session(&mut *session)
                    .await?;
                projections
                    .replace_one(doc! { "_id": id_public }, stamped(projected))
                    .with_options(ReplaceOptions::builder().upsert(true).build())
                    .session(&mut *session)
                    .await?;
            }
            None => {
                projections
                    .delete_many(doc! { "id_public": id_public })
                    .session(&mut *session)
                    .await?;
            }
        }
        Ok(())
    }

    /// Run a unit in a transaction, retrying transient failures
    async fn in_transaction<U: TxnUnit>(&self, unit: &U) -> Result<U::Output> {
        for attempt in 1..=self.max_attempts {
            let mut session = self.client.start_session().await?;
            session.start_transaction().await?;

            let output = match unit.run(self, &mut session).await {
                Ok(output) => output,
                Err(TxnError::Domain(err)) => {
                    abort(&mut session).await;
                    return Err(err);
                }
                Err(TxnError::Mongo(e)) if e.contains_label(TRANSIENT_TRANSACTION_ERROR) => {
                    abort(&mut session).await;
                    debug!(%unit, attempt, "Transient transaction error, retrying: {}", e);
                    continue;
                }
                Err(TxnError::Mongo(e)) => {
                    abort(&mut session).await;
                    return Err(e.into());
                }
            };

            match commit_with_retry(&mut session, self.max_attempts).await {
                Ok(()) => return Ok(output),
                Err(e) if e.contains_label(TRANSIENT_TRANSACTION_ERROR) => {
                    debug!(%unit, attempt, "Commit failed transiently, retrying: {}", e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(%unit, attempts = self.max_attempts, "Transaction retries exhausted");
        Err(StudbookError::Conflict(format!(
            "Concurrent writes on {}, retry later",
            unit
        )))
    }
}

/// Projection with write timestamps set for storage
fn stamped(projection: &PublicAnimalDoc) -> PublicAnimalDoc {
    let mut stored = projection.clone();
    stored.metadata = crate::db::schemas::Metadata::new();
    stored
}

fn raw_projections(client: &MongoClient) -> Collection<Document> {
    client
        .inner()
        .database(client.db_name())
        .collection::<Document>(PUBLIC_ANIMAL_COLLECTION)
}

/// Keep one document per `id_public`, preferring the one whose `_id` is
/// the public id. Works on raw documents so legacy `_id` types still load.
async fn collapse_duplicates(collection: &Collection<Document>) -> Result<usize> {
    let mut cursor = collection
        .find(doc! {})
        .projection(doc! { "_id": 1, "id_public": 1 })
        .await?;

    let mut groups: HashMap<String, Vec<Bson>> = HashMap::new();
    while let Some(raw) = cursor.try_next().await? {
        let (Ok(id_public), Some(id)) = (raw.get_str("id_public"), raw.get("_id")) else {
            continue;
        };
        groups
            .entry(id_public.to_string())
            .or_default()
            .push(id.clone());
    }

    let mut surplus: Vec<Bson> = Vec::new();
    for (id_public, mut ids) in groups {
        if ids.len() < 2 {
            continue;
        }
        let canonical = Bson::String(id_public.clone());
        let keep = ids.iter().position(|id| *id == canonical).unwrap_or(0);
        ids.remove(keep);
        debug!(id_public = %id_public, surplus = ids.len(), "Duplicate projections found");
        surplus.extend(ids);
    }

    if surplus.is_empty() {
        return Ok(0);
    }
    let removed = collection
        .delete_many(doc! { "_id": { "$in": surplus } })
        .await?;
    Ok(removed.deleted_count as usize)
}

async fn abort(session: &mut ClientSession) {
    if let Err(e) = session.abort_transaction().await {
        debug!("Abort after failed attempt: {}", e);
    }
}

#[async_trait]
impl LedgerStore for MongoLedgerStore {
    async fn insert_account(&self, account: AccountDoc) -> Result<()> {
        self.accounts.insert_one(account).await
    }

    async fn find_account(&self, account_id: &str) -> Result<Option<AccountDoc>> {
        self.accounts.find_one(doc! { "_id": account_id }).await
    }

    async fn find_account_by_public_id(&self, public_id: &str) -> Result<Option<AccountDoc>> {
        self.accounts.find_one(doc! { "public_id": public_id }).await
    }

    async fn update_privacy(
        &self,
        account_id: &str,
        privacy: PrivacyPreferences,
    ) -> Result<Option<AccountDoc>> {
        let result = self
            .accounts
            .update_one(
                doc! { "_id": account_id },
                doc! {
                    "$set": {
                        "privacy": bson::to_bson(&privacy)?,
                        "metadata.updated_at": DateTime::now(),
                    }
                },
            )
            .await?;
        if result.matched_count == 0 {
            return Ok(None);
        }
        self.find_account(account_id).await
    }

    async fn insert_animal(&self, animal: AnimalDoc) -> Result<()> {
        let owner_id = animal.owner_id.clone();
        let id_public = animal.id_public.clone();
        self.animals.insert_one(animal).await?;
        self.accounts
            .update_one(
                doc! { "_id": &owner_id },
                doc! { "$addToSet": { "owned_animals": &id_public } },
            )
            .await?;
        Ok(())
    }

    async fn find_animal(&self, id_public: &str) -> Result<Option<AnimalDoc>> {
        self.animals.find_one(doc! { "id_public": id_public }).await
    }

    async fn animals_owned_by(&self, owner_id: &str) -> Result<Vec<AnimalDoc>> {
        self.animals
            .find_many_sorted(doc! { "owner_id": owner_id }, Some(doc! { "id_public": 1 }))
            .await
    }

    async fn list_animals(&self) -> Result<Vec<AnimalDoc>> {
        self.animals
            .find_many_sorted(doc! {}, Some(doc! { "id_public": 1 }))
            .await
    }

    async fn revoke_view_only(
        &self,
        id_public: &str,
        account_id: &str,
        expected_owner_id: &str,
    ) -> Result<AnimalDoc> {
        let result = self
            .animals
            .update_one(
                doc! {
                    "id_public": id_public,
                    "owner_id": expected_owner_id,
                    "metadata.is_deleted": { "$ne": true },
                },
                doc! {
                    "$pull": { "view_only_for_users": account_id },
                    "$set": { "metadata.updated_at": DateTime::now() },
                },
            )
            .await?;

        let animal = self
            .find_animal(id_public)
            .await?
            .ok_or_else(|| StudbookError::NotFound(format!("Animal {} not found", id_public)))?;
        if result.matched_count == 0 {
            return Err(StudbookError::PreconditionFailed(format!(
                "Animal {} is not owned by {}",
                id_public, expected_owner_id
            )));
        }
        Ok(animal)
    }

    async fn insert_transfer(&self, transfer: TransferDoc) -> Result<()> {
        self.transfers.insert_one(transfer).await.map_err(|e| match e {
            StudbookError::Conflict(_) => StudbookError::Conflict(
                "A pending transfer for this animal and recipient already exists".into(),
            ),
            other => other,
        })
    }

    async fn find_transfer(&self, transfer_id: &str) -> Result<Option<TransferDoc>> {
        self.transfers.find_one(doc! { "_id": transfer_id }).await
    }

    async fn list_transfers(
        &self,
        account_id: &str,
        filter: &TransferFilter,
    ) -> Result<Vec<TransferDoc>> {
        let mut query = match filter.direction {
            Some(Direction::Incoming) => doc! { "to_user_id": account_id },
            Some(Direction::Outgoing) => doc! { "from_user_id": account_id },
            None => doc! {
                "$or": [
                    { "from_user_id": account_id },
                    { "to_user_id": account_id },
                ]
            },
        };
        if let Some(status) = filter.status {
            query.insert("status", status.as_str());
        }
        self.transfers
            .find_many_sorted(query, Some(doc! { "created_at": -1, "_id": -1 }))
            .await
    }

    async fn apply_resolution(&self, resolution: Resolution) -> Result<ResolutionOutcome> {
        self.in_transaction(&resolution).await
    }

    async fn find_projection(&self, id_public: &str) -> Result<Option<PublicAnimalDoc>> {
        self.projections
            .find_one(doc! { "id_public": id_public })
            .await
    }

    async fn reproject(&self, id_public: &str) -> Result<Option<PublicAnimalDoc>> {
        self.in_transaction(&Reproject(id_public)).await
    }

    async fn list_projections(&self) -> Result<Vec<PublicAnimalDoc>> {
        self.projections
            .find_many_sorted(doc! {}, Some(doc! { "id_public": 1 }))
            .await
    }

    async fn collapse_duplicate_projections(&self) -> Result<usize> {
        collapse_duplicates(&raw_projections(&self.client)).await
    }
}

async fn commit_with_retry(
    session: &mut ClientSession,
    max_attempts: u32,
) -> mongodb::error::Result<()> {
    let mut attempt = 1;
    loop {
        match session.commit_transaction().await {
            Ok(()) => return Ok(()),
            Err(e)
                if e.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT) && attempt < max_attempts =>
            {
                debug!(attempt, "Commit result unknown, retrying commit: {}", e);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
