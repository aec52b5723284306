use rocket::serde::json::Json;
use rocket::Route;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::{notify_with, ApiResult, EmptyResult, JsonResult};
use crate::auth::{GroupCreateHeaders, GroupHeaders, GroupWriteHeaders, Headers, SocialHeaders};
use crate::db::models::{Group, JoinMethod, Participant, DEFAULT_MAX_MEMBERS, FLAG_MESSAGE_SUPPORT};
use crate::db::DbConn;
use crate::error::Error;
use crate::message;

pub fn routes() -> Vec<Route> {
    routes![
        create_group,
        get_group,
        update_group_summary,
        get_group_profile,
        update_group_profile,
        join_group,
        leave_group,
        join_group_request,
        transfer_ownership,
        invite_to_group,
        approve_join_group,
        reject_join_group,
        get_participation,
        update_participation,
        delete_participation,
        update_participation_permissions,
        search_groups,
    ]
}

/// `me` in a participation path resolves to the authenticated account.
fn resolve_account(param: &str, headers: &Headers) -> ApiResult<i64> {
    if param == "me" {
        Ok(headers.account_id)
    } else {
        param.parse().map_err(|_| Error::bad_input(format!("Invalid account id: '{param}'")))
    }
}

/// Subscribes a freshly seated participant to the group's message channel.
/// The seat is already committed; when the subscription fails the seat is
/// given back and the join reported as failed.
async fn message_join(
    gamespace_id: i64,
    group: &Group,
    account_id: i64,
    notify: Option<&Value>,
    conn: &DbConn,
) -> EmptyResult {
    if !group.has_message_support() {
        return Ok(());
    }

    let result =
        message::join_group(gamespace_id, message::GROUP_CLASS, &group.id.to_string(), account_id, "member", notify)
            .await;

    if let Err(e) = result {
        if let Err(undo) = Group::unseat_participant(gamespace_id, group.id, account_id, conn).await {
            error!("Failed to give back the seat of account {account_id} in group {}: {undo}", group.id);
        }
        return Err(e);
    }

    Ok(())
}

async fn notify_group(gamespace_id: i64, group: &Group, sender: i64, message_type: &str, payload: &Value, authoritative: bool) {
    if !group.has_message_support() {
        return;
    }

    message::send_message(
        gamespace_id,
        sender,
        message::GROUP_CLASS,
        &group.id.to_string(),
        message_type,
        payload,
        &[],
        authoritative,
    )
    .await;
}

//
// Lifecycle
//

#[derive(Deserialize)]
struct CreateGroupData {
    #[serde(default)]
    group_profile: Option<Value>,
    #[serde(default)]
    participation_profile: Option<Value>,
    #[serde(default)]
    join_method: Option<String>,
    #[serde(default)]
    max_members: Option<i64>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    group_messages: bool,
}

#[post("/group/create", data = "<data>")]
async fn create_group(data: Json<CreateGroupData>, headers: GroupCreateHeaders, conn: DbConn) -> JsonResult {
    let GroupCreateHeaders(headers) = headers;
    let data = data.into_inner();

    let join_method = match &data.join_method {
        Some(value) => {
            JoinMethod::from_str(value).ok_or_else(|| Error::bad_input(format!("Unknown join method: '{value}'")))?
        }
        None => JoinMethod::Free,
    };

    let flags: Vec<String> = if data.group_messages {
        vec![FLAG_MESSAGE_SUPPORT.to_string()]
    } else {
        Vec::new()
    };

    let group_id = Group::create(
        headers.gamespace_id,
        data.group_profile.as_ref().unwrap_or(&json!({})),
        &flags,
        join_method,
        data.max_members.unwrap_or(DEFAULT_MAX_MEMBERS),
        headers.account_id,
        data.participation_profile.as_ref().unwrap_or(&json!({})),
        data.name,
        &conn,
    )
    .await?;

    if data.group_messages {
        let created = message::create_group(
            headers.gamespace_id,
            message::GROUP_CLASS,
            &group_id.to_string(),
            headers.account_id,
            "member",
        )
        .await;

        if let Err(e) = created {
            if let Err(undo) = Group::delete(headers.gamespace_id, group_id, &conn).await {
                error!("Failed to undo creation of group {group_id}: {undo}");
            }
            return Err(e);
        }
    }

    Ok(Json(json!({ "id": group_id })))
}

#[get("/group/<group_id>")]
async fn get_group(group_id: i64, headers: GroupHeaders, conn: DbConn) -> JsonResult {
    let GroupHeaders(headers) = headers;

    let group = Group::find_by_id(headers.gamespace_id, group_id, &conn).await?;
    let participants = Participant::list_by_group(headers.gamespace_id, group_id, &conn).await?;

    let me = participants.iter().find(|p| p.account_id == headers.account_id).map(Participant::to_json);

    Ok(Json(json!({
        "group": group.to_json(),
        "participants": participants.iter().map(Participant::to_json).collect::<Vec<_>>(),
        "me": me,
    })))
}

#[derive(Deserialize)]
struct UpdateSummaryData {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    join_method: Option<String>,
}

#[post("/group/<group_id>", data = "<data>")]
async fn update_group_summary(
    group_id: i64,
    data: Json<UpdateSummaryData>,
    headers: GroupWriteHeaders,
    conn: DbConn,
) -> EmptyResult {
    let GroupWriteHeaders(headers) = headers;
    let data = data.into_inner();

    let join_method = match &data.join_method {
        Some(value) => {
            Some(JoinMethod::from_str(value).ok_or_else(|| Error::bad_input(format!("Unknown join method: '{value}'")))?)
        }
        None => None,
    };

    Group::update_summary(headers.gamespace_id, group_id, headers.account_id, join_method, data.name, &conn).await
}

//
// Profiles
//

#[get("/group/<group_id>/profile")]
async fn get_group_profile(group_id: i64, headers: GroupHeaders, conn: DbConn) -> JsonResult {
    let GroupHeaders(headers) = headers;
    let group = Group::find_by_id(headers.gamespace_id, group_id, &conn).await?;
    Ok(Json(json!({ "profile": group.profile_value() })))
}

#[derive(Deserialize)]
struct ProfileUpdateData {
    profile: Value,
    #[serde(default)]
    merge: Option<bool>,
    #[serde(default)]
    notify: Option<Value>,
}

#[post("/group/<group_id>/profile", data = "<data>")]
async fn update_group_profile(
    group_id: i64,
    data: Json<ProfileUpdateData>,
    headers: GroupWriteHeaders,
    conn: DbConn,
) -> JsonResult {
    let GroupWriteHeaders(headers) = headers;
    let data = data.into_inner();

    // only participants may edit the group profile
    if !Participant::exists(headers.gamespace_id, group_id, headers.account_id, &conn).await? {
        err!(not_found, "Player is not participating in this group");
    }

    let group = Group::find_by_id(headers.gamespace_id, group_id, &conn).await?;
    let updated =
        Group::update_profile(headers.gamespace_id, group_id, &data.profile, data.merge.unwrap_or(true), &conn).await?;

    if let Some(notify) = &data.notify {
        notify_group(
            headers.gamespace_id,
            &group,
            headers.account_id,
            message::MESSAGE_GROUP_PROFILE_UPDATED,
            notify,
            headers.authoritative(),
        )
        .await;
    }

    Ok(Json(json!({ "profile": updated })))
}

//
// Join flows
//

#[derive(Deserialize, Default)]
struct JoinData {
    #[serde(default)]
    participation_profile: Option<Value>,
    #[serde(default)]
    notify: Option<Value>,
}

#[post("/group/<group_id>/join", data = "<data>")]
async fn join_group(group_id: i64, data: Json<JoinData>, headers: GroupHeaders, conn: DbConn) -> EmptyResult {
    let GroupHeaders(headers) = headers;
    let data = data.into_inner();

    let group = Group::join(
        headers.gamespace_id,
        group_id,
        headers.account_id,
        data.participation_profile.as_ref().unwrap_or(&json!({})),
        &conn,
    )
    .await?;

    message_join(headers.gamespace_id, &group, headers.account_id, data.notify.as_ref(), &conn).await
}

#[post("/group/<group_id>/leave", data = "<data>")]
async fn leave_group(group_id: i64, data: Json<JoinData>, headers: GroupHeaders, conn: DbConn) -> EmptyResult {
    let GroupHeaders(headers) = headers;
    let data = data.into_inner();

    let group = Group::leave(headers.gamespace_id, group_id, headers.account_id, &conn).await?;

    if group.has_message_support() {
        message::leave_group(
            headers.gamespace_id,
            message::GROUP_CLASS,
            &group_id.to_string(),
            headers.account_id,
            data.notify.as_ref(),
        )
        .await;
    }

    Ok(())
}

#[post("/group/<group_id>/request", data = "<data>")]
async fn join_group_request(group_id: i64, data: Json<JoinData>, headers: GroupHeaders, conn: DbConn) -> JsonResult {
    let GroupHeaders(headers) = headers;
    let data = data.into_inner();

    let (group, key) = Group::join_request(
        headers.gamespace_id,
        group_id,
        headers.account_id,
        data.participation_profile.as_ref().unwrap_or(&json!({})),
        &conn,
    )
    .await?;

    if let Some(notify) = &data.notify {
        notify_group(
            headers.gamespace_id,
            &group,
            headers.account_id,
            message::MESSAGE_GROUP_REQUEST,
            &notify_with(notify, &[("key", json!(key))]),
            headers.authoritative(),
        )
        .await;
    }

    Ok(Json(json!({ "key": key })))
}

#[derive(Deserialize)]
struct TransferData {
    transfer_to: i64,
    #[serde(default)]
    notify: Option<Value>,
}

#[post("/group/<group_id>/ownership", data = "<data>")]
async fn transfer_ownership(group_id: i64, data: Json<TransferData>, headers: GroupHeaders, conn: DbConn) -> EmptyResult {
    let GroupHeaders(headers) = headers;
    let data = data.into_inner();

    Group::transfer_ownership(headers.gamespace_id, group_id, headers.account_id, data.transfer_to, &conn).await?;

    if let Some(notify) = &data.notify {
        let group = Group::find_by_id(headers.gamespace_id, group_id, &conn).await?;
        notify_group(
            headers.gamespace_id,
            &group,
            headers.account_id,
            message::MESSAGE_OWNERSHIP_TRANSFERRED,
            notify,
            headers.authoritative(),
        )
        .await;
    }

    Ok(())
}

#[derive(Deserialize)]
struct InviteData {
    role: i32,
    #[serde(default)]
    permissions: Vec<String>,
    #[serde(default)]
    notify: Option<Value>,
}

#[post("/group/<group_id>/invite/<account_id>", data = "<data>")]
async fn invite_to_group(
    group_id: i64,
    account_id: i64,
    data: Json<InviteData>,
    headers: GroupHeaders,
    conn: DbConn,
) -> JsonResult {
    let GroupHeaders(headers) = headers;
    let data = data.into_inner();

    let (group, key) = Group::invite(
        headers.gamespace_id,
        group_id,
        headers.account_id,
        account_id,
        data.role,
        data.permissions,
        &conn,
    )
    .await?;

    if let Some(notify) = &data.notify {
        if group.has_message_support() {
            // invitations land in the invitee's personal channel, and are
            // withdrawn once delivered
            message::send_message(
                headers.gamespace_id,
                headers.account_id,
                message::RECIPIENT_CLASS_USER,
                &account_id.to_string(),
                message::MESSAGE_GROUP_INVITE,
                &notify_with(notify, &[("invite_group_id", json!(group_id.to_string())), ("key", json!(key))]),
                &["remove_delivered"],
                headers.authoritative(),
            )
            .await;
        }
    }

    Ok(Json(json!({ "key": key })))
}

#[derive(Deserialize)]
struct ApproveJoinData {
    key: String,
    role: i32,
    #[serde(default)]
    permissions: Vec<String>,
    #[serde(default)]
    notify: Option<Value>,
}

#[post("/group/<group_id>/approve/<account_id>", data = "<data>")]
async fn approve_join_group(
    group_id: i64,
    account_id: i64,
    data: Json<ApproveJoinData>,
    headers: GroupHeaders,
    conn: DbConn,
) -> EmptyResult {
    let GroupHeaders(headers) = headers;
    let data = data.into_inner();

    let group = Group::approve_join(
        headers.gamespace_id,
        group_id,
        headers.account_id,
        account_id,
        data.role,
        &data.key,
        data.permissions,
        &conn,
    )
    .await?;

    message_join(headers.gamespace_id, &group, account_id, data.notify.as_ref(), &conn).await?;

    if let Some(notify) = &data.notify {
        notify_group(
            headers.gamespace_id,
            &group,
            account_id,
            message::MESSAGE_GROUP_REQUEST_APPROVED,
            &notify_with(notify, &[("approved_by", json!(headers.account_id.to_string()))]),
            headers.authoritative(),
        )
        .await;
    }

    Ok(())
}

#[derive(Deserialize)]
struct RejectJoinData {
    key: String,
    #[serde(default)]
    notify: Option<Value>,
}

#[post("/group/<group_id>/reject/<account_id>", data = "<data>")]
async fn reject_join_group(
    group_id: i64,
    account_id: i64,
    data: Json<RejectJoinData>,
    headers: GroupHeaders,
    conn: DbConn,
) -> EmptyResult {
    let GroupHeaders(headers) = headers;
    let data = data.into_inner();

    let group =
        Group::reject_join(headers.gamespace_id, group_id, headers.account_id, account_id, &data.key, &conn).await?;

    if let Some(notify) = &data.notify {
        notify_group(
            headers.gamespace_id,
            &group,
            headers.account_id,
            message::MESSAGE_GROUP_REQUEST_REJECTED,
            notify,
            headers.authoritative(),
        )
        .await;
    }

    Ok(())
}

//
// Participations
//

#[get("/group/<group_id>/participation/<account>")]
async fn get_participation(group_id: i64, account: &str, headers: GroupHeaders, conn: DbConn) -> JsonResult {
    let GroupHeaders(headers) = headers;
    let account_id = resolve_account(account, &headers)?;

    let participation = Participant::find(headers.gamespace_id, group_id, account_id, &conn).await?;
    Ok(Json(participation.to_json()))
}

#[post("/group/<group_id>/participation/<account>", data = "<data>")]
async fn update_participation(
    group_id: i64,
    account: &str,
    data: Json<ProfileUpdateData>,
    headers: GroupHeaders,
    conn: DbConn,
) -> JsonResult {
    let GroupHeaders(headers) = headers;
    let account_id = resolve_account(account, &headers)?;
    let data = data.into_inner();

    let group = Group::find_by_id(headers.gamespace_id, group_id, &conn).await?;

    // editing someone else's participation profile needs ownership or a
    // strictly higher role
    if !group.is_owner(headers.account_id) && account_id != headers.account_id {
        let higher =
            Participant::role_higher(headers.gamespace_id, group_id, headers.account_id, account_id, &conn).await?;
        if !higher {
            err!(not_a_member, "Your role should be higher to edit other players' participation profiles");
        }
    }

    let updated = Participant::update_profile(
        headers.gamespace_id,
        group_id,
        account_id,
        &data.profile,
        data.merge.unwrap_or(true),
        &conn,
    )
    .await?;

    if let Some(notify) = &data.notify {
        notify_group(
            headers.gamespace_id,
            &group,
            headers.account_id,
            message::MESSAGE_PARTICIPATION_PROFILE_UPDATED,
            notify,
            headers.authoritative(),
        )
        .await;
    }

    Ok(Json(json!({ "profile": updated })))
}

#[delete("/group/<group_id>/participation/<account>", data = "<data>")]
async fn delete_participation(
    group_id: i64,
    account: &str,
    data: Option<Json<JoinData>>,
    headers: GroupHeaders,
    conn: DbConn,
) -> EmptyResult {
    let GroupHeaders(headers) = headers;
    let account_id = resolve_account(account, &headers)?;
    let notify = data.and_then(|d| d.into_inner().notify);

    // removing yourself is a leave, removing someone else is a kick
    let group = if account_id == headers.account_id {
        Group::leave(headers.gamespace_id, group_id, account_id, &conn).await?
    } else {
        Group::kick(headers.gamespace_id, group_id, headers.account_id, account_id, &conn).await?
    };

    if group.has_message_support() {
        message::leave_group(
            headers.gamespace_id,
            message::GROUP_CLASS,
            &group_id.to_string(),
            account_id,
            notify.as_ref(),
        )
        .await;
    }

    Ok(())
}

#[derive(Deserialize)]
struct PermissionsData {
    role: i32,
    #[serde(default)]
    permissions: Vec<String>,
    #[serde(default)]
    notify: Option<Value>,
}

#[post("/group/<group_id>/participation/<account>/permissions", data = "<data>")]
async fn update_participation_permissions(
    group_id: i64,
    account: &str,
    data: Json<PermissionsData>,
    headers: GroupHeaders,
    conn: DbConn,
) -> EmptyResult {
    let GroupHeaders(headers) = headers;
    let account_id = resolve_account(account, &headers)?;
    let data = data.into_inner();

    Participant::update_role_and_permissions(
        headers.gamespace_id,
        group_id,
        headers.account_id,
        account_id,
        data.role,
        data.permissions,
        &conn,
    )
    .await?;

    if let Some(notify) = &data.notify {
        let group = Group::find_by_id(headers.gamespace_id, group_id, &conn).await?;
        notify_group(
            headers.gamespace_id,
            &group,
            headers.account_id,
            message::MESSAGE_PERMISSIONS_UPDATED,
            notify,
            headers.authoritative(),
        )
        .await;
    }

    Ok(())
}

#[get("/groups/search?<query>")]
async fn search_groups(query: String, headers: SocialHeaders, conn: DbConn) -> JsonResult {
    let SocialHeaders(headers) = headers;

    let groups = Group::search(headers.gamespace_id, &query, &conn).await?;

    Ok(Json(json!({ "groups": groups.iter().map(Group::to_json).collect::<Vec<_>>() })))
}
