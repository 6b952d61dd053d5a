//! `PUT /accounts/me/privacy` - update owner privacy preferences and
//! re-project the caller's animals

use bytes::Bytes;
use hyper::{Response, StatusCode};

use crate::server::AppState;
use crate::transfer::PrivacySettings;
use crate::types::Result;

use super::{json_response, parse_body, require_account, FullBody};

pub async fn handle_update_privacy(
    state: &AppState,
    account: Option<&str>,
    body: &Bytes,
) -> Result<Response<FullBody>> {
    let actor = require_account(account)?;
    let settings: PrivacySettings = parse_body(body)?;
    let update = state
        .transfers
        .update_privacy(actor, settings.into())
        .await?;
    Ok(json_response(StatusCode::OK, &update))
}
