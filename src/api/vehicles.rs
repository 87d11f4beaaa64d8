//! Vehicle API endpoints. The session user comes from the `x-user-id` header.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};

use super::{error, success, ApiResult};
use crate::auth::session_user;
use crate::errors::AppErrorWithRevision;
use crate::models::{CreateVehicleRequest, UpdateVehicleRequest, Vehicle};
use crate::AppState;

/// Revision before handling a request. A store that cannot report it fails the request.
async fn current_revision(state: &AppState) -> Result<i64, AppErrorWithRevision> {
    state
        .store
        .revision_id()
        .await
        .map_err(|e| AppErrorWithRevision {
            error: e,
            revision_id: 0,
        })
}

/// Revision after a committed mutation. The mutation already happened, so a failed read
/// falls back to the revision seen before it.
async fn revision_after(state: &AppState, before: i64) -> i64 {
    match state.store.revision_id().await {
        Ok(revision) => revision,
        Err(e) => {
            tracing::warn!("Failed to read revision after mutation: {}", e);
            before
        }
    }
}

/// GET /api/vehicles - List the session user's vehicles.
pub async fn list_vehicles(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Vec<Vehicle>> {
    let revision_id = current_revision(&state).await?;

    let user_id = match session_user(&headers) {
        Ok(user_id) => user_id,
        Err(e) => return error(e, revision_id),
    };

    match state.inventory().load_for_user(&user_id).await {
        Ok(vehicles) => success(vehicles, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/vehicles - Add a vehicle for the session user.
pub async fn create_vehicle(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateVehicleRequest>,
) -> ApiResult<Vehicle> {
    let revision_id = current_revision(&state).await?;

    let user_id = match session_user(&headers) {
        Ok(user_id) => user_id,
        Err(e) => return error(e, revision_id),
    };

    let inventory = state.inventory();
    let id = match inventory.create(&user_id, &request.name).await {
        Ok(id) => id,
        Err(e) => return error(e, revision_id),
    };

    let new_revision = revision_after(&state, revision_id).await;
    match inventory.get(&id).await {
        Ok(vehicle) => success(vehicle, new_revision),
        Err(e) => error(e, new_revision),
    }
}

/// PUT /api/vehicles/:id - Overwrite a vehicle's name and odometer.
pub async fn update_vehicle(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<UpdateVehicleRequest>,
) -> ApiResult<Vehicle> {
    let revision_id = current_revision(&state).await?;

    if let Err(e) = session_user(&headers) {
        return error(e, revision_id);
    }

    let inventory = state.inventory();
    if let Err(e) = inventory
        .update(&id, &request.name, request.last_known_odometer)
        .await
    {
        return error(e, revision_id);
    }

    let new_revision = revision_after(&state, revision_id).await;
    match inventory.get(&id).await {
        Ok(vehicle) => success(vehicle, new_revision),
        Err(e) => error(e, new_revision),
    }
}

/// DELETE /api/vehicles/:id - Delete a vehicle.
pub async fn delete_vehicle(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<()> {
    let revision_id = current_revision(&state).await?;

    if let Err(e) = session_user(&headers) {
        return error(e, revision_id);
    }

    match state.inventory().remove(&id).await {
        Ok(()) => {
            let new_revision = revision_after(&state, revision_id).await;
            success((), new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}
