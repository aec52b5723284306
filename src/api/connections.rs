use rocket::serde::json::Json;
use rocket::{Route, State};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::{notify_with, EmptyResult, JsonResult};
use crate::auth::{SocialHeaders, SCOPE_CONNECTION_APPROVAL};
use crate::db::models::{Connection, PendingRequest, RequestKind};
use crate::db::DbConn;
use crate::message;
use crate::profiles;
use crate::social::SocialRegistry;
use crate::util::parse_comma_list;

pub fn routes() -> Vec<Route> {
    routes![
        list_connections,
        request_connection,
        delete_connection,
        approve_connection,
        reject_connection,
        external_friends,
    ]
}

#[get("/connections?<profile_fields>")]
async fn list_connections(profile_fields: Option<String>, headers: SocialHeaders, conn: DbConn) -> JsonResult {
    let SocialHeaders(headers) = headers;
    let fields = parse_comma_list(&profile_fields.unwrap_or_default());

    let connections = Connection::list_for_account(headers.gamespace_id, headers.account_id, &conn).await?;
    let account_profiles = profiles::get_public_profiles(headers.gamespace_id, &connections, &fields).await?;

    Ok(Json(json!({ "connections": profiles::decorate_accounts(&connections, &account_profiles) })))
}

#[derive(Deserialize, Default)]
struct RequestConnectionData {
    approval: Option<bool>,
    notify: Option<Value>,
}

#[post("/connection/<account_id>", data = "<data>")]
async fn request_connection(
    account_id: i64,
    data: Json<RequestConnectionData>,
    headers: SocialHeaders,
    conn: DbConn,
) -> JsonResult {
    let SocialHeaders(headers) = headers;
    let data = data.into_inner();
    let authoritative = headers.authoritative();

    if data.approval.unwrap_or(true) {
        let key = Connection::request(headers.gamespace_id, headers.account_id, account_id, &conn).await?;

        if let Some(notify) = &data.notify {
            message::send_message(
                headers.gamespace_id,
                headers.account_id,
                message::RECIPIENT_CLASS_USER,
                &account_id.to_string(),
                message::MESSAGE_CONNECTION_REQUEST,
                &notify_with(notify, &[("key", json!(key))]),
                &[],
                authoritative,
            )
            .await;
        }

        return Ok(Json(json!({ "key": key })));
    }

    // the unsafe shortcut skips the target's approval entirely
    headers.require_scope(SCOPE_CONNECTION_APPROVAL)?;

    Connection::connect_pair(headers.gamespace_id, headers.account_id, account_id, &conn).await?;

    if let Some(notify) = &data.notify {
        message::send_message(
            headers.gamespace_id,
            headers.account_id,
            message::RECIPIENT_CLASS_USER,
            &account_id.to_string(),
            message::MESSAGE_CONNECTION_CREATED,
            notify,
            &[],
            authoritative,
        )
        .await;
    }

    Ok(Json(json!({})))
}

#[derive(Deserialize, Default)]
struct NotifyData {
    notify: Option<Value>,
}

#[delete("/connection/<account_id>", data = "<data>")]
async fn delete_connection(
    account_id: i64,
    data: Option<Json<NotifyData>>,
    headers: SocialHeaders,
    conn: DbConn,
) -> EmptyResult {
    let SocialHeaders(headers) = headers;

    // cancels a still-pending outgoing request along with the connection
    PendingRequest::delete_by_object(headers.gamespace_id, headers.account_id, RequestKind::Account, account_id, &conn)
        .await?;
    Connection::delete_pair(headers.gamespace_id, headers.account_id, account_id, &conn).await?;

    if let Some(notify) = data.and_then(|d| d.into_inner().notify) {
        message::send_message(
            headers.gamespace_id,
            headers.account_id,
            message::RECIPIENT_CLASS_USER,
            &account_id.to_string(),
            message::MESSAGE_CONNECTION_DELETED,
            &notify,
            &[],
            headers.authoritative(),
        )
        .await;
    }

    Ok(())
}

#[derive(Deserialize)]
struct AnswerConnectionData {
    key: String,
    notify: Option<Value>,
}

#[post("/connection/<account_id>/approve", data = "<data>")]
async fn approve_connection(
    account_id: i64,
    data: Json<AnswerConnectionData>,
    headers: SocialHeaders,
    conn: DbConn,
) -> EmptyResult {
    let SocialHeaders(headers) = headers;
    let data = data.into_inner();

    Connection::approve(headers.gamespace_id, headers.account_id, account_id, &data.key, &conn).await?;

    if let Some(notify) = &data.notify {
        message::send_message(
            headers.gamespace_id,
            headers.account_id,
            message::RECIPIENT_CLASS_USER,
            &account_id.to_string(),
            message::MESSAGE_CONNECTION_APPROVED,
            notify,
            &[],
            headers.authoritative(),
        )
        .await;
    }

    Ok(())
}

#[post("/connection/<account_id>/reject", data = "<data>")]
async fn reject_connection(
    account_id: i64,
    data: Json<AnswerConnectionData>,
    headers: SocialHeaders,
    conn: DbConn,
) -> EmptyResult {
    let SocialHeaders(headers) = headers;
    let data = data.into_inner();

    Connection::reject(headers.gamespace_id, headers.account_id, account_id, &data.key, &conn).await?;

    if let Some(notify) = &data.notify {
        message::send_message(
            headers.gamespace_id,
            headers.account_id,
            message::RECIPIENT_CLASS_USER,
            &account_id.to_string(),
            message::MESSAGE_CONNECTION_REJECTED,
            notify,
            &[],
            headers.authoritative(),
        )
        .await;
    }

    Ok(())
}

#[get("/external?<profile_fields>")]
async fn external_friends(
    profile_fields: Option<String>,
    headers: SocialHeaders,
    registry: &State<SocialRegistry>,
    conn: DbConn,
) -> JsonResult {
    let SocialHeaders(headers) = headers;
    let fields = parse_comma_list(&profile_fields.unwrap_or_default());

    let friends = registry.list_friends(headers.gamespace_id, headers.account_id, &fields, &conn).await?;

    Ok(Json(friends))
}
