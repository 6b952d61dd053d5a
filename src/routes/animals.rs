//! Animal read endpoints and view-only administration
//!
//! - `GET /animals/{id}` - private record (owner or view-only member)
//! - `GET /animals/{id}/public` - public projection, no identity required
//! - `DELETE /animals/{id}/view-only/{accountId}` - owner revokes read access

use hyper::{Response, StatusCode};

use crate::server::AppState;
use crate::types::Result;

use super::{json_response, require_account, FullBody};

pub async fn handle_get_private(
    state: &AppState,
    account: Option<&str>,
    id_public: &str,
) -> Result<Response<FullBody>> {
    let actor = require_account(account)?;
    let animal = state.transfers.read_animal(actor, id_public).await?;
    Ok(json_response(StatusCode::OK, &animal))
}

pub async fn handle_get_public(state: &AppState, id_public: &str) -> Result<Response<FullBody>> {
    let projection = state.transfers.public_animal(id_public).await?;
    Ok(json_response(StatusCode::OK, &projection))
}

pub async fn handle_revoke_view_only(
    state: &AppState,
    account: Option<&str>,
    id_public: &str,
    account_id: &str,
) -> Result<Response<FullBody>> {
    let actor = require_account(account)?;
    let summary = state
        .transfers
        .revoke_view_only(actor, id_public, account_id)
        .await?;
    Ok(json_response(StatusCode::OK, &summary))
}
