//
// Sibling message-service RPC client
//
// Two kinds of calls leave this module. Informational notifications
// (send_message) are best-effort: they run after the local transaction has
// committed and a failure is logged and swallowed. Group-channel membership
// calls (create_group, join_group, leave_group) are part of their enclosing
// operation's contract and bubble their failure up to the caller.
//
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::{json, Value};

use crate::api::EmptyResult;
use crate::error::Error;
use crate::util::get_reqwest_client;
use crate::CONFIG;

/// Message-service channel class social groups live in.
pub const GROUP_CLASS: &str = "social-group";
/// Channel class for messages addressed to a single account.
pub const RECIPIENT_CLASS_USER: &str = "user";

pub const MESSAGE_CONNECTION_REQUEST: &str = "connection_request";
pub const MESSAGE_CONNECTION_CREATED: &str = "connection_created";
pub const MESSAGE_CONNECTION_APPROVED: &str = "connection_approved";
pub const MESSAGE_CONNECTION_REJECTED: &str = "connection_rejected";
pub const MESSAGE_CONNECTION_DELETED: &str = "connection_deleted";

pub const MESSAGE_GROUP_PROFILE_UPDATED: &str = "group_profile_updated";
pub const MESSAGE_PARTICIPATION_PROFILE_UPDATED: &str = "participation_profile_updated";
pub const MESSAGE_PERMISSIONS_UPDATED: &str = "permissions_updated";
pub const MESSAGE_OWNERSHIP_TRANSFERRED: &str = "ownership_transferred";
pub const MESSAGE_GROUP_INVITE: &str = "group_invite";
pub const MESSAGE_GROUP_REQUEST: &str = "group_request";
pub const MESSAGE_GROUP_REQUEST_APPROVED: &str = "group_request_approved";
pub const MESSAGE_GROUP_REQUEST_REJECTED: &str = "group_request_rejected";

async fn rpc(method: &str, params: Value) -> Result<(), Error> {
    let url = format!("{}/v1/{}", CONFIG.message_service_url(), method);

    let mut request = get_reqwest_client()
        .post(&url)
        .header(CONTENT_TYPE, "application/json")
        .header(ACCEPT, "application/json")
        .json(&params);

    if let Some(token) = CONFIG.service_token() {
        request = request.bearer_auth(token);
    }

    request.send().await?.error_for_status()?;
    Ok(())
}

/// Best-effort notification; never fails the caller.
#[allow(clippy::too_many_arguments)]
pub async fn send_message(
    gamespace_id: i64,
    sender: i64,
    recipient_class: &str,
    recipient_key: &str,
    message_type: &str,
    payload: &Value,
    flags: &[&str],
    authoritative: bool,
) {
    let params = json!({
        "gamespace": gamespace_id,
        "sender": sender,
        "recipient_class": recipient_class,
        "recipient_key": recipient_key,
        "message_type": message_type,
        "payload": payload,
        "flags": flags,
        "authoritative": authoritative,
    });

    if let Err(e) = rpc("send_message", params).await {
        warn!("Failed to deliver '{message_type}' notification: {e}");
    }
}

/// Creates the message-service channel backing a freshly created group.
/// Failure is fatal to group creation.
pub async fn create_group(
    gamespace_id: i64,
    group_class: &str,
    group_key: &str,
    join_account_id: i64,
    join_role: &str,
) -> EmptyResult {
    rpc(
        "create_group",
        json!({
            "gamespace": gamespace_id,
            "group_class": group_class,
            "group_key": group_key,
            "join_account_id": join_account_id,
            "join_role": join_role,
        }),
    )
    .await
    .map_err(|e| Error::internal(format!("Failed to create in-message group: {e}")))
}

/// Subscribes a new participant to the group channel. Failure is fatal to
/// the enclosing join.
pub async fn join_group(
    gamespace_id: i64,
    group_class: &str,
    group_key: &str,
    account_id: i64,
    role: &str,
    notify: Option<&Value>,
) -> EmptyResult {
    rpc(
        "join_group",
        json!({
            "gamespace": gamespace_id,
            "group_class": group_class,
            "group_key": group_key,
            "account_id": account_id,
            "role": role,
            "notify": notify,
        }),
    )
    .await
    .map_err(|e| Error::internal(format!("Failed to join in-message group: {e}")))
}

/// Unsubscribes a leaving participant from the group channel. Unlike the
/// create/join calls this one is best-effort: the local membership change
/// already committed and stays.
pub async fn leave_group(
    gamespace_id: i64,
    group_class: &str,
    group_key: &str,
    account_id: i64,
    notify: Option<&Value>,
) {
    let result = rpc(
        "leave_group",
        json!({
            "gamespace": gamespace_id,
            "group_class": group_class,
            "group_key": group_key,
            "account_id": account_id,
            "notify": notify,
        }),
    )
    .await;

    if let Err(e) = result {
        warn!("Failed to leave in-message group {group_key}: {e}");
    }
}
