//! Transfer endpoints
//!
//! - `POST /transfers` - propose
//! - `GET /transfers?status=&direction=` - caller's transfers, newest first
//! - `GET /transfers/{id}` - one transfer (parties only)
//! - `POST /transfers/{id}/accept`
//! - `POST /transfers/{id}/decline`
//! - `POST /transfers/{id}/accept-view-only`

use bytes::Bytes;
use hyper::{Response, StatusCode};

use crate::server::AppState;
use crate::store::TransferFilter;
use crate::transfer::ProposeRequest;
use crate::types::{Result, StudbookError};

use super::{json_response, parse_body, require_account, FullBody};

pub async fn handle_propose(
    state: &AppState,
    account: Option<&str>,
    body: &Bytes,
) -> Result<Response<FullBody>> {
    let actor = require_account(account)?;
    let req: ProposeRequest = parse_body(body)?;
    let transfer = state.transfers.propose(actor, req).await?;
    Ok(json_response(StatusCode::CREATED, &transfer))
}

pub async fn handle_list(
    state: &AppState,
    account: Option<&str>,
    query: Option<&str>,
) -> Result<Response<FullBody>> {
    let actor = require_account(account)?;
    let filter: TransferFilter = serde_urlencoded::from_str(query.unwrap_or(""))
        .map_err(|e| StudbookError::BadRequest(format!("Invalid query: {}", e)))?;
    let transfers = state.transfers.list(actor, &filter).await?;
    Ok(json_response(
        StatusCode::OK,
        &serde_json::json!({ "transfers": transfers }),
    ))
}

pub async fn handle_get(
    state: &AppState,
    account: Option<&str>,
    transfer_id: &str,
) -> Result<Response<FullBody>> {
    let actor = require_account(account)?;
    let transfer = state.transfers.get(actor, transfer_id).await?;
    Ok(json_response(StatusCode::OK, &transfer))
}

pub async fn handle_accept(
    state: &AppState,
    account: Option<&str>,
    transfer_id: &str,
) -> Result<Response<FullBody>> {
    let actor = require_account(account)?;
    let acceptance = state.transfers.accept(actor, transfer_id).await?;
    Ok(json_response(StatusCode::OK, &acceptance))
}

pub async fn handle_decline(
    state: &AppState,
    account: Option<&str>,
    transfer_id: &str,
) -> Result<Response<FullBody>> {
    let actor = require_account(account)?;
    let transfer = state.transfers.decline(actor, transfer_id).await?;
    Ok(json_response(
        StatusCode::OK,
        &serde_json::json!({ "transfer": transfer }),
    ))
}

pub async fn handle_accept_view_only(
    state: &AppState,
    account: Option<&str>,
    transfer_id: &str,
) -> Result<Response<FullBody>> {
    let actor = require_account(account)?;
    let acceptance = state.transfers.accept_view_only(actor, transfer_id).await?;
    Ok(json_response(StatusCode::OK, &acceptance))
}
