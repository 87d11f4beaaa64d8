//! Per-user vehicle inventory kept in step with the shared document store.
//!
//! The store stays authoritative. The local copy kept here is advisory and is only used to
//! decide which change notifications belong to the loaded user.

mod subscription;

pub use subscription::Subscription;

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::db::SharedStore;
use crate::errors::AppError;
use crate::models::{update_fields, Vehicle, VehicleDocument, VEHICLES_COLLECTION};

/// Whether a user's vehicles have been loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    NotLoaded,
    Loaded { user_id: String },
}

/// What a change notification means for the loaded view.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Delivery {
    Changed,
    Removed,
    Skip,
}

#[derive(Debug)]
pub(crate) struct Cache {
    state: LoadState,
    vehicles: BTreeMap<String, Vehicle>,
}

impl Cache {
    fn new() -> Self {
        Self {
            state: LoadState::NotLoaded,
            vehicles: BTreeMap::new(),
        }
    }

    fn owns(&self, vehicle: &Vehicle) -> bool {
        self.is_loaded_user(&vehicle.owner_id)
    }

    fn is_loaded_user(&self, owner_id: &str) -> bool {
        match &self.state {
            LoadState::NotLoaded => false,
            LoadState::Loaded { user_id } => owner_id == user_id,
        }
    }

    /// Fold a store notification into the cache and decide whether to forward it.
    ///
    /// `previous_owner` is the owner recorded before an update. The decision depends only on
    /// the event and the loaded user, so every subscription sharing this cache reaches the
    /// same one.
    pub(crate) fn apply(
        &mut self,
        vehicle: &Vehicle,
        previous_owner: Option<&str>,
        removed: bool,
    ) -> Delivery {
        if self.state == LoadState::NotLoaded {
            return if removed {
                Delivery::Removed
            } else {
                Delivery::Changed
            };
        }

        let owned_before = previous_owner.is_some_and(|owner| self.is_loaded_user(owner));
        if self.owns(vehicle) {
            if removed {
                self.vehicles.remove(&vehicle.id);
                Delivery::Removed
            } else {
                self.vehicles.insert(vehicle.id.clone(), vehicle.clone());
                Delivery::Changed
            }
        } else if !removed && owned_before {
            // Reassigned to another owner elsewhere: it left this user's view.
            self.vehicles.remove(&vehicle.id);
            Delivery::Removed
        } else {
            Delivery::Skip
        }
    }
}

pub(crate) type SharedCache = Arc<RwLock<Cache>>;

/// Synchronizes one session's vehicle inventory with the document store.
pub struct VehicleInventorySync {
    store: SharedStore,
    cache: SharedCache,
}

fn require_user(user_id: &str) -> Result<(), AppError> {
    if user_id.trim().is_empty() {
        return Err(AppError::Unauthenticated(
            "No signed-in user".to_string(),
        ));
    }
    Ok(())
}

fn require_name(name: &str) -> Result<(), AppError> {
    if name.trim().is_empty() {
        return Err(AppError::Validation("Vehicle name is required".to_string()));
    }
    Ok(())
}

fn by_name(a: &Vehicle, b: &Vehicle) -> std::cmp::Ordering {
    a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id))
}

impl VehicleInventorySync {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            cache: Arc::new(RwLock::new(Cache::new())),
        }
    }

    /// Fetch the whole collection and keep the records owned by `user_id`.
    ///
    /// Resolves only once the store has delivered its snapshot. A user without vehicles
    /// gets an empty list.
    pub async fn load_for_user(&self, user_id: &str) -> Result<Vec<Vehicle>, AppError> {
        require_user(user_id)?;

        let snapshot = self.store.fetch_all(VEHICLES_COLLECTION).await?;

        let mut vehicles: Vec<Vehicle> = snapshot
            .documents
            .iter()
            .filter_map(|doc| match Vehicle::from_document(&doc.id, &doc.fields) {
                Ok(vehicle) => Some(vehicle),
                Err(e) => {
                    tracing::warn!("Skipping malformed vehicle document {}: {}", doc.id, e);
                    None
                }
            })
            .filter(|vehicle| vehicle.owner_id == user_id)
            .collect();
        vehicles.sort_by(by_name);

        tracing::debug!(
            user_id,
            revision = snapshot.revision_id,
            count = vehicles.len(),
            "Loaded vehicles"
        );

        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        cache.state = LoadState::Loaded {
            user_id: user_id.to_string(),
        };
        cache.vehicles = vehicles
            .iter()
            .map(|vehicle| (vehicle.id.clone(), vehicle.clone()))
            .collect();

        Ok(vehicles)
    }

    /// Add a vehicle for `user_id` and return the identifier the store assigned.
    pub async fn create(&self, user_id: &str, name: &str) -> Result<String, AppError> {
        require_user(user_id)?;
        require_name(name)?;

        let fields = VehicleDocument::new(user_id, name).into_fields()?;
        let id = self.store.insert(VEHICLES_COLLECTION, fields).await?;
        tracing::info!("Vehicle {} added for user {}", id, user_id);

        let vehicle = Vehicle {
            id: id.clone(),
            owner_id: user_id.to_string(),
            name: name.to_string(),
            last_known_odometer: 0,
            in_use: false,
        };
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        if cache.owns(&vehicle) {
            cache.vehicles.insert(id.clone(), vehicle);
        }

        Ok(id)
    }

    /// Overwrite the name and odometer of a vehicle.
    ///
    /// Ownership is not checked: any session may update any vehicle it can name.
    pub async fn update(
        &self,
        id: &str,
        name: &str,
        last_known_odometer: u64,
    ) -> Result<(), AppError> {
        require_name(name)?;

        self.store
            .update_fields(
                VEHICLES_COLLECTION,
                id,
                update_fields(name, last_known_odometer),
            )
            .await
            .map_err(|e| not_found_as_vehicle(e, id))?;
        tracing::info!("Vehicle {} updated", id);

        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(vehicle) = cache.vehicles.get_mut(id) {
            vehicle.name = name.to_string();
            vehicle.last_known_odometer = last_known_odometer;
        }

        Ok(())
    }

    /// Delete a vehicle.
    pub async fn remove(&self, id: &str) -> Result<(), AppError> {
        self.store
            .delete(VEHICLES_COLLECTION, id)
            .await
            .map_err(|e| not_found_as_vehicle(e, id))?;
        tracing::info!("Vehicle {} deleted", id);

        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .vehicles
            .remove(id);

        Ok(())
    }

    /// Read one vehicle straight from the store.
    pub async fn get(&self, id: &str) -> Result<Vehicle, AppError> {
        let doc = self
            .store
            .get(VEHICLES_COLLECTION, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Vehicle {} not found", id)))?;
        Ok(Vehicle::from_document(&doc.id, &doc.fields)?)
    }

    /// Register callbacks for vehicles added or changed, and for vehicles removed, by any
    /// session. While a user is loaded, only that user's vehicles are reported.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn subscribe<C, R>(&self, on_changed: C, on_removed: R) -> Subscription
    where
        C: Fn(Vehicle) + Send + Sync + 'static,
        R: Fn(Vehicle) + Send + Sync + 'static,
    {
        Subscription::spawn(
            self.store.subscribe(),
            self.cache.clone(),
            on_changed,
            on_removed,
        )
    }

    pub fn state(&self) -> LoadState {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .state
            .clone()
    }

    /// Advisory local copy of the loaded user's vehicles. Empty when nothing is loaded.
    pub fn cached(&self) -> Vec<Vehicle> {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        let mut vehicles: Vec<Vehicle> = cache.vehicles.values().cloned().collect();
        vehicles.sort_by(by_name);
        vehicles
    }

    /// Forget the loaded user.
    pub fn reset(&self) {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        *cache = Cache::new();
    }
}

fn not_found_as_vehicle(err: AppError, id: &str) -> AppError {
    match err {
        AppError::NotFound(_) => AppError::NotFound(format!("Vehicle {} not found", id)),
        other => other,
    }
}
