//! Table of the signed-in user's vehicles, driven by the auth session.
//!
//! Rows are filled from `load_for_user` on sign-in and afterwards change only through the
//! store's change feed, so they follow the store's commit order. Notifications that arrive
//! while the load is running win over the loaded snapshot. Signing out cancels the
//! subscription and clears the table.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::Serialize;
use tokio::sync::watch;

use crate::auth::AuthState;
use crate::errors::AppError;
use crate::models::Vehicle;
use crate::sync::{Subscription, VehicleInventorySync};

/// One table row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleRow {
    pub id: String,
    pub name: String,
    pub last_known_odometer: u64,
}

impl From<&Vehicle> for VehicleRow {
    fn from(vehicle: &Vehicle) -> Self {
        Self {
            id: vehicle.id.clone(),
            name: vehicle.name.clone(),
            last_known_odometer: vehicle.last_known_odometer,
        }
    }
}

#[derive(Debug, Default)]
struct Table {
    rows: BTreeMap<String, VehicleRow>,
    /// Ids touched by notifications while a load is in flight.
    loading: Option<BTreeSet<String>>,
}

impl Table {
    fn touch(&mut self, id: &str) {
        if let Some(touched) = &mut self.loading {
            touched.insert(id.to_string());
        }
    }

    fn upsert(&mut self, vehicle: &Vehicle) {
        self.touch(&vehicle.id);
        self.rows.insert(vehicle.id.clone(), VehicleRow::from(vehicle));
    }

    fn remove(&mut self, id: &str) {
        self.touch(id);
        self.rows.remove(id);
    }

    fn begin_load(&mut self) {
        self.loading = Some(BTreeSet::new());
    }

    /// Merge a loaded snapshot, keeping whatever notifications already said about an id.
    fn finish_load(&mut self, vehicles: &[Vehicle]) {
        let touched = self.loading.take().unwrap_or_default();
        for vehicle in vehicles.iter().filter(|v| !touched.contains(&v.id)) {
            self.rows.insert(vehicle.id.clone(), VehicleRow::from(vehicle));
        }
    }

    fn abandon_load(&mut self) {
        self.loading = None;
    }

    fn clear(&mut self) {
        self.rows.clear();
        self.loading = None;
    }
}

type SharedTable = Arc<RwLock<Table>>;

pub struct InventoryView {
    sync: Arc<VehicleInventorySync>,
    table: SharedTable,
    user: RwLock<Option<String>>,
    subscription: Mutex<Option<Subscription>>,
}

impl InventoryView {
    pub fn attach(sync: Arc<VehicleInventorySync>) -> Self {
        Self {
            sync,
            table: Arc::new(RwLock::new(Table::default())),
            user: RwLock::new(None),
            subscription: Mutex::new(None),
        }
    }

    /// Follow auth state changes until the session goes away.
    pub async fn run(&self, mut changes: watch::Receiver<AuthState>) {
        while changes.changed().await.is_ok() {
            let state = changes.borrow_and_update().clone();
            if let Err(e) = self.on_auth_changed(&state).await {
                tracing::warn!("Failed to refresh vehicle table: {}", e);
            }
        }
    }

    pub async fn on_auth_changed(&self, state: &AuthState) -> Result<(), AppError> {
        self.detach();

        let AuthState::SignedIn { user_id, .. } = state else {
            return Ok(());
        };

        *self.user.write().unwrap_or_else(PoisonError::into_inner) = Some(user_id.clone());

        // Subscribe before loading so nothing committed in between is missed.
        self.table
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .begin_load();
        let subscription = {
            let changed_table = self.table.clone();
            let removed_table = self.table.clone();
            let owner = user_id.clone();
            self.sync.subscribe(
                move |vehicle| {
                    let mut table = changed_table
                        .write()
                        .unwrap_or_else(PoisonError::into_inner);
                    if vehicle.owner_id == owner {
                        table.upsert(&vehicle);
                    } else {
                        table.remove(&vehicle.id);
                    }
                },
                move |vehicle| {
                    removed_table
                        .write()
                        .unwrap_or_else(PoisonError::into_inner)
                        .remove(&vehicle.id);
                },
            )
        };
        *self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(subscription);

        match self.sync.load_for_user(user_id).await {
            Ok(vehicles) => {
                self.table
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .finish_load(&vehicles);
                Ok(())
            }
            Err(e) => {
                self.table
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .abandon_load();
                Err(e)
            }
        }
    }

    /// Stop using the inventory: cancel notifications and clear the table.
    fn detach(&self) {
        if let Some(mut subscription) = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            subscription.cancel();
        }
        self.sync.reset();
        self.table
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        *self.user.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Current rows ordered by name.
    pub fn rows(&self) -> Vec<VehicleRow> {
        let mut rows: Vec<VehicleRow> = self
            .table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .rows
            .values()
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        rows
    }

    fn signed_in_user(&self) -> Result<String, AppError> {
        self.user
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| AppError::Unauthenticated("No one is signed in".to_string()))
    }

    pub async fn add(&self, name: &str) -> Result<String, AppError> {
        let user_id = self.signed_in_user()?;
        self.sync.create(&user_id, name).await
    }

    /// Change only the name, keeping the stored odometer reading.
    pub async fn rename(&self, id: &str, name: &str) -> Result<(), AppError> {
        self.signed_in_user()?;
        let current = self.sync.get(id).await?;
        self.sync
            .update(id, name, current.last_known_odometer)
            .await
    }

    pub async fn update(
        &self,
        id: &str,
        name: &str,
        last_known_odometer: u64,
    ) -> Result<(), AppError> {
        self.signed_in_user()?;
        self.sync.update(id, name, last_known_odometer).await
    }

    pub async fn delete(&self, id: &str) -> Result<(), AppError> {
        self.signed_in_user()?;
        self.sync.remove(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthSession;
    use crate::db::{init_database, DocumentStore, SqliteDocumentStore};
    use crate::models::{Document, Fields, Snapshot, StoreEvent, VEHICLES_COLLECTION};
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::broadcast;

    /// Store whose collection read lets another session delete a vehicle right after the
    /// snapshot is taken.
    struct DeleteAfterSnapshot {
        inner: Arc<SqliteDocumentStore>,
        victim: Mutex<Option<String>>,
    }

    #[async_trait]
    impl DocumentStore for DeleteAfterSnapshot {
        async fn fetch_all(&self, collection: &str) -> Result<Snapshot, AppError> {
            let snapshot = self.inner.fetch_all(collection).await?;
            let victim = self.victim.lock().unwrap().take();
            if let Some(id) = victim {
                self.inner.delete(collection, &id).await?;
                // Let the removal reach subscribers before the snapshot is returned.
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Ok(snapshot)
        }

        async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, AppError> {
            self.inner.get(collection, id).await
        }

        async fn insert(&self, collection: &str, fields: Fields) -> Result<String, AppError> {
            self.inner.insert(collection, fields).await
        }

        async fn update_fields(
            &self,
            collection: &str,
            id: &str,
            fields: Fields,
        ) -> Result<(), AppError> {
            self.inner.update_fields(collection, id, fields).await
        }

        async fn delete(&self, collection: &str, id: &str) -> Result<(), AppError> {
            self.inner.delete(collection, id).await
        }

        fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
            self.inner.subscribe()
        }

        async fn revision_id(&self) -> Result<i64, AppError> {
            self.inner.revision_id().await
        }

        async fn health_check(&self) -> Result<(), AppError> {
            self.inner.health_check().await
        }
    }

    async fn shared_sync() -> (Arc<VehicleInventorySync>, Arc<SqliteDocumentStore>, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let pool = init_database(&temp_dir.path().join("view.sqlite"))
            .await
            .expect("Failed to init DB");
        let store = Arc::new(SqliteDocumentStore::new(pool, 64));
        (
            Arc::new(VehicleInventorySync::new(store.clone())),
            store,
            temp_dir,
        )
    }

    async fn wait_for(view: &InventoryView, predicate: impl Fn(&[VehicleRow]) -> bool) {
        for _ in 0..200 {
            if predicate(&view.rows()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("rows never matched: {:?}", view.rows());
    }

    fn signed_in(user_id: &str) -> AuthState {
        AuthState::SignedIn {
            user_id: user_id.to_string(),
            email: format!("{}@example.com", user_id),
        }
    }

    #[tokio::test]
    async fn test_sign_in_loads_rows() {
        let (sync, _store, _dir) = shared_sync().await;
        sync.create("u1", "Truck").await.unwrap();
        sync.create("u1", "Civic").await.unwrap();
        sync.create("u2", "Bike").await.unwrap();

        let view = InventoryView::attach(sync);
        view.on_auth_changed(&signed_in("u1")).await.unwrap();

        let names: Vec<String> = view.rows().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["Civic", "Truck"]);
    }

    #[tokio::test]
    async fn test_intents_update_rows() {
        let (sync, _store, _dir) = shared_sync().await;
        let view = InventoryView::attach(sync);
        view.on_auth_changed(&signed_in("u1")).await.unwrap();

        let id = view.add("Civic").await.unwrap();
        wait_for(&view, |rows| rows.len() == 1 && rows[0].last_known_odometer == 0).await;

        view.update(&id, "Civic", 1200).await.unwrap();
        view.rename(&id, "Civic LX").await.unwrap();
        let expected = VehicleRow {
            id: id.clone(),
            name: "Civic LX".to_string(),
            last_known_odometer: 1200,
        };
        wait_for(&view, |rows| rows == [expected.clone()]).await;

        view.delete(&id).await.unwrap();
        wait_for(&view, |rows| rows.is_empty()).await;
    }

    #[tokio::test]
    async fn test_rows_follow_other_sessions() {
        let (sync, store, _dir) = shared_sync().await;
        let other = VehicleInventorySync::new(store);
        let view = InventoryView::attach(sync);
        view.on_auth_changed(&signed_in("u1")).await.unwrap();

        let id = other.create("u1", "Civic").await.unwrap();
        other.create("u2", "Bike").await.unwrap();
        wait_for(&view, |rows| rows.len() == 1 && rows[0].id == id).await;

        other.remove(&id).await.unwrap();
        wait_for(&view, |rows| rows.is_empty()).await;
    }

    #[tokio::test]
    async fn test_delete_during_load_is_not_resurrected() {
        let (sync, inner, _dir) = shared_sync().await;
        let id = sync.create("u1", "Civic").await.unwrap();
        let kept = sync.create("u1", "Truck").await.unwrap();

        let store = Arc::new(DeleteAfterSnapshot {
            inner: inner.clone(),
            victim: Mutex::new(Some(id.clone())),
        });
        let view = InventoryView::attach(Arc::new(VehicleInventorySync::new(store)));
        view.on_auth_changed(&signed_in("u1")).await.unwrap();

        assert!(inner.get(VEHICLES_COLLECTION, &id).await.unwrap().is_none());
        let ids: Vec<String> = view.rows().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![kept]);
    }

    #[test]
    fn test_notifications_during_load_win_over_snapshot() {
        let vehicle = |id: &str, name: &str, odometer: u64| Vehicle {
            id: id.to_string(),
            owner_id: "u1".to_string(),
            name: name.to_string(),
            last_known_odometer: odometer,
            in_use: false,
        };
        let mut table = Table::default();
        table.begin_load();
        table.remove("gone");
        table.upsert(&vehicle("renamed", "Civic LX", 10));

        table.finish_load(&[
            vehicle("gone", "Bike", 0),
            vehicle("renamed", "Civic", 0),
            vehicle("plain", "Truck", 5),
        ]);

        assert!(table.loading.is_none());
        assert!(!table.rows.contains_key("gone"));
        assert_eq!(table.rows["renamed"].name, "Civic LX");
        assert_eq!(table.rows["plain"].last_known_odometer, 5);

        // Once loaded, changes no longer need tracking.
        table.remove("plain");
        assert!(table.loading.is_none());
    }

    #[tokio::test]
    async fn test_sign_out_clears_and_blocks_intents() {
        let (sync, _store, _dir) = shared_sync().await;
        sync.create("u1", "Civic").await.unwrap();
        let view = InventoryView::attach(sync.clone());
        view.on_auth_changed(&signed_in("u1")).await.unwrap();
        assert_eq!(view.rows().len(), 1);

        view.on_auth_changed(&AuthState::SignedOut).await.unwrap();
        assert!(view.rows().is_empty());
        assert_eq!(sync.state(), crate::sync::LoadState::NotLoaded);
        assert!(matches!(
            view.add("Accord").await,
            Err(AppError::Unauthenticated(_))
        ));
    }

    #[tokio::test]
    async fn test_run_follows_session() {
        let (sync, _store, _dir) = shared_sync().await;
        sync.create("u1", "Civic").await.unwrap();
        let view = Arc::new(InventoryView::attach(sync));
        let session = AuthSession::new();

        let runner = {
            let view = view.clone();
            let changes = session.changes();
            tokio::spawn(async move { view.run(changes).await })
        };

        session.sign_in("u1", "u1@example.com").unwrap();
        wait_for(&view, |rows| rows.len() == 1).await;

        session.sign_out();
        wait_for(&view, |rows| rows.is_empty()).await;

        drop(session);
        tokio::time::timeout(Duration::from_secs(5), runner)
            .await
            .expect("run should end with the session")
            .unwrap();
    }
}
