//
// Login-service client: per-gamespace private keys of the social providers
// (API keys, OAuth client secrets). Keys barely ever change, so they sit in
// a 300 second cache.
//
use std::time::Duration;

use moka::future::Cache;
use once_cell::sync::Lazy;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::{json, Value};

use crate::error::Error;
use crate::util::get_reqwest_client;
use crate::CONFIG;

const KEY_CACHE_TTL: Duration = Duration::from_secs(300);

static KEY_CACHE: Lazy<Cache<String, Value>> =
    Lazy::new(|| Cache::builder().max_capacity(1_000).time_to_live(KEY_CACHE_TTL).build());

pub async fn get_key(gamespace_id: i64, key_name: &str) -> Result<Value, Error> {
    let cache_key = format!("{gamespace_id}:{key_name}");
    let key_name = key_name.to_string();

    KEY_CACHE
        .try_get_with(cache_key, fetch_key(gamespace_id, key_name))
        .await
        .map_err(|e| Error::internal(format!("Failed to fetch provider key: {e}")))
}

async fn fetch_key(gamespace_id: i64, key_name: String) -> Result<Value, Error> {
    let url = format!("{}/v1/get_key", CONFIG.login_service_url());

    let mut request = get_reqwest_client()
        .post(&url)
        .header(CONTENT_TYPE, "application/json")
        .header(ACCEPT, "application/json")
        .json(&json!({
            "gamespace": gamespace_id,
            "key_name": key_name,
        }));

    if let Some(token) = CONFIG.service_token() {
        request = request.bearer_auth(token);
    }

    Ok(request.send().await?.error_for_status()?.json::<Value>().await?)
}
