//! Admin endpoints
//!
//! - `POST /admin/projections/reconcile` - run a full reconcile sweep
//! - `POST /admin/projections/{id}/refresh` - re-project one animal
//!
//! Callers must be listed in `ADMIN_ACCOUNTS`.

use hyper::{Response, StatusCode};
use tracing::info;

use crate::server::AppState;
use crate::types::{Result, StudbookError};

use super::{json_response, require_account, FullBody};

fn require_admin<'a>(state: &AppState, account: Option<&'a str>) -> Result<&'a str> {
    let actor = require_account(account)?;
    if !state.args.is_admin(actor) {
        return Err(StudbookError::Unauthorized("Admin access required".into()));
    }
    Ok(actor)
}

pub async fn handle_reconcile(
    state: &AppState,
    account: Option<&str>,
) -> Result<Response<FullBody>> {
    let actor = require_admin(state, account)?;
    info!(admin = %actor, "Manual projection reconcile requested");
    let report = state.reconciler.reconcile().await?;
    Ok(json_response(
        StatusCode::OK,
        &serde_json::json!({
            "report": report,
            "cache": state.projections.hot_cache_stats(),
        }),
    ))
}

pub async fn handle_refresh(
    state: &AppState,
    account: Option<&str>,
    id_public: &str,
) -> Result<Response<FullBody>> {
    require_admin(state, account)?;
    let projection = state.transfers.refresh_animal(id_public).await?;
    Ok(json_response(
        StatusCode::OK,
        &serde_json::json!({
            "idPublic": id_public,
            "public": projection.is_some(),
            "projection": projection,
        }),
    ))
}
