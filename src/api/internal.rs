//
// Service-to-service surface, gated behind the `service_internal` scope.
// The login service attaches freshly authenticated external credentials and
// pushes imported tokens through here; account deletion fans in through
// `accounts_deleted`.
//
use rocket::serde::json::Json;
use rocket::{Route, State};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::{EmptyResult, JsonResult};
use crate::auth::InternalHeaders;
use crate::db::models::{Connection, CredentialToken, PendingRequest, UniqueName};
use crate::db::DbConn;
use crate::profiles;
use crate::social::{ImportedAuth, SocialRegistry};
use crate::util::parse_comma_list;

pub fn routes() -> Vec<Route> {
    routes![attach_account, import_social, internal_connections, list_tokens, accounts_deleted]
}

#[derive(Deserialize)]
struct AttachAccountData {
    credential: String,
    username: String,
    account: i64,
}

#[post("/internal/attach", data = "<data>")]
async fn attach_account(
    data: Json<AttachAccountData>,
    headers: InternalHeaders,
    registry: &State<SocialRegistry>,
    conn: DbConn,
) -> JsonResult {
    let InternalHeaders(headers) = headers;
    let data = data.into_inner();

    CredentialToken::attach(headers.gamespace_id, &data.credential, &data.username, data.account, &conn).await?;

    let api = registry.get(&data.credential)?;
    let profile = api.get_social_profile(headers.gamespace_id, &data.username, data.account, &conn).await?;

    Ok(Json(profile))
}

#[derive(Deserialize)]
struct ImportSocialData {
    credential: String,
    username: String,
    auth: ImportedAuth,
}

#[post("/internal/import", data = "<data>")]
async fn import_social(
    data: Json<ImportSocialData>,
    headers: InternalHeaders,
    registry: &State<SocialRegistry>,
    conn: DbConn,
) -> JsonResult {
    let InternalHeaders(headers) = headers;
    let data = data.into_inner();

    let api = registry.get(&data.credential)?;
    let account = api.import_social(headers.gamespace_id, &data.username, &data.auth, &conn).await?;

    Ok(Json(json!({ "account": account })))
}

#[get("/internal/connections?<account>&<profile_fields>")]
async fn internal_connections(
    account: i64,
    profile_fields: Option<String>,
    headers: InternalHeaders,
    conn: DbConn,
) -> JsonResult {
    let InternalHeaders(headers) = headers;
    let fields = parse_comma_list(&profile_fields.unwrap_or_default());

    let connections = Connection::list_for_account(headers.gamespace_id, account, &conn).await?;
    let account_profiles = profiles::get_public_profiles(headers.gamespace_id, &connections, &fields).await?;

    Ok(Json(json!({ "connections": profiles::decorate_accounts(&connections, &account_profiles) })))
}

#[get("/internal/tokens?<account>")]
async fn list_tokens(account: i64, headers: InternalHeaders, conn: DbConn) -> JsonResult {
    let InternalHeaders(headers) = headers;

    let tokens = CredentialToken::list_by_account(headers.gamespace_id, account, &conn).await?;

    Ok(Json(json!({ "tokens": tokens.iter().map(CredentialToken::to_json).collect::<Vec<Value>>() })))
}

#[derive(Deserialize)]
struct AccountsDeletedData {
    accounts: Vec<i64>,
    #[serde(default)]
    gamespace_only: bool,
}

/// Account-deletion fan-in: drops connections, pending requests and unique
/// names owned by the deleted accounts.
#[post("/internal/accounts_deleted", data = "<data>")]
async fn accounts_deleted(data: Json<AccountsDeletedData>, headers: InternalHeaders, conn: DbConn) -> EmptyResult {
    let InternalHeaders(headers) = headers;
    let data = data.into_inner();

    for account in &data.accounts {
        Connection::delete_all_by_account(headers.gamespace_id, *account, &conn).await?;
        PendingRequest::delete_all_by_account(headers.gamespace_id, *account, &conn).await?;
    }

    let gamespace = if data.gamespace_only {
        Some(headers.gamespace_id)
    } else {
        None
    };
    UniqueName::delete_all_by_accounts(gamespace, &data.accounts, &conn).await?;

    Ok(())
}
