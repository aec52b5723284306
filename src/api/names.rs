use rocket::serde::json::Json;
use rocket::Route;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::{EmptyResult, JsonResult};
use crate::auth::SocialHeaders;
use crate::db::models::UniqueName;
use crate::db::DbConn;
use crate::profiles;
use crate::util::parse_comma_list;

pub fn routes() -> Vec<Route> {
    routes![acquire_name, release_name, check_name, search_names]
}

#[derive(Deserialize)]
struct AcquireNameData {
    kind: String,
    name: String,
}

#[post("/name/acquire", data = "<data>")]
async fn acquire_name(data: Json<AcquireNameData>, headers: SocialHeaders, conn: DbConn) -> EmptyResult {
    let SocialHeaders(headers) = headers;
    let data = data.into_inner();

    UniqueName::acquire(headers.gamespace_id, headers.account_id, &data.kind, &data.name, &conn).await
}

#[derive(Deserialize)]
struct ReleaseNameData {
    kind: String,
}

#[post("/name/release", data = "<data>")]
async fn release_name(data: Json<ReleaseNameData>, headers: SocialHeaders, conn: DbConn) -> JsonResult {
    let SocialHeaders(headers) = headers;
    let data = data.into_inner();

    let released = UniqueName::release(headers.gamespace_id, headers.account_id, &data.kind, &conn).await?;
    Ok(Json(json!({ "released": released })))
}

#[get("/name/check?<kind>&<name>")]
async fn check_name(kind: String, name: String, headers: SocialHeaders, conn: DbConn) -> JsonResult {
    let SocialHeaders(headers) = headers;

    let holder = UniqueName::check(headers.gamespace_id, &kind, &name, &conn).await?;
    Ok(Json(json!({ "account": holder })))
}

#[get("/names/search?<kind>&<query>&<profile_fields>")]
async fn search_names(
    kind: String,
    query: String,
    profile_fields: Option<String>,
    headers: SocialHeaders,
    conn: DbConn,
) -> JsonResult {
    let SocialHeaders(headers) = headers;
    let fields = parse_comma_list(&profile_fields.unwrap_or_default());

    let names = UniqueName::search(headers.gamespace_id, &kind, &query, &conn).await?;

    let account_ids: Vec<i64> = names.iter().map(|n| n.account_id).collect();
    let account_profiles = profiles::get_search_profiles(headers.gamespace_id, &account_ids, &fields).await?;

    let entries: Vec<Value> = names
        .iter()
        .map(|entry| {
            json!({
                "account": entry.account_id,
                "name": entry.name,
                "profile": account_profiles.get(&entry.account_id).cloned().unwrap_or_else(|| json!({})),
            })
        })
        .collect();

    Ok(Json(json!({ "names": entries })))
}
