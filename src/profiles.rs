//
// Sibling profile-service client
//
// Read paths decorate account lists with public profiles fetched in bulk.
// Results are cached: 300 seconds for connection/friends decoration, a much
// shorter 20 seconds for search results, which churn faster.
//
use std::collections::HashMap;
use std::time::Duration;

use moka::future::Cache;
use once_cell::sync::Lazy;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::{json, Value};

use crate::error::Error;
use crate::util::{get_reqwest_client, sha256_hex};
use crate::CONFIG;

const PROFILES_CACHE_TTL: Duration = Duration::from_secs(300);
const SEARCH_CACHE_TTL: Duration = Duration::from_secs(20);

static PROFILES_CACHE: Lazy<Cache<String, Value>> =
    Lazy::new(|| Cache::builder().max_capacity(10_000).time_to_live(PROFILES_CACHE_TTL).build());

static SEARCH_CACHE: Lazy<Cache<String, Value>> =
    Lazy::new(|| Cache::builder().max_capacity(10_000).time_to_live(SEARCH_CACHE_TTL).build());

/// Bulk public-profile fetch, cached for the regular decoration paths.
pub async fn get_public_profiles(
    gamespace_id: i64,
    account_ids: &[i64],
    profile_fields: &[String],
) -> Result<HashMap<i64, Value>, Error> {
    fetch_cached(&PROFILES_CACHE, "profiles", gamespace_id, account_ids, profile_fields).await
}

/// Same fetch behind the short-lived cache used by name and group search.
pub async fn get_search_profiles(
    gamespace_id: i64,
    account_ids: &[i64],
    profile_fields: &[String],
) -> Result<HashMap<i64, Value>, Error> {
    fetch_cached(&SEARCH_CACHE, "search", gamespace_id, account_ids, profile_fields).await
}

async fn fetch_cached(
    cache: &Cache<String, Value>,
    prefix: &str,
    gamespace_id: i64,
    account_ids: &[i64],
    profile_fields: &[String],
) -> Result<HashMap<i64, Value>, Error> {
    if account_ids.is_empty() {
        return Ok(HashMap::new());
    }

    // Without requested fields there is nothing to fetch; every account just
    // decorates to an empty profile.
    if profile_fields.is_empty() {
        return Ok(account_ids.iter().map(|id| (*id, json!({}))).collect());
    }

    let mut sorted_ids: Vec<i64> = account_ids.to_vec();
    sorted_ids.sort_unstable();
    sorted_ids.dedup();

    let hash = sha256_hex(
        sorted_ids.iter().map(|id| id.to_string()).chain(profile_fields.iter().cloned()).collect::<Vec<_>>(),
    );
    let cache_key = format!("{prefix}:{gamespace_id}:{hash}");

    let fetched = cache
        .try_get_with(cache_key, mass_profiles(gamespace_id, sorted_ids.clone(), profile_fields.to_vec()))
        .await
        .map_err(|e| Error::internal(format!("Failed to request profiles: {e}")))?;

    let mut result = HashMap::new();
    if let Value::Object(profiles) = fetched {
        for (account, profile) in profiles {
            if let Ok(account) = account.parse::<i64>() {
                result.insert(account, profile);
            }
        }
    }

    // accounts the profile service knows nothing about still decorate
    for id in sorted_ids {
        result.entry(id).or_insert_with(|| json!({}));
    }

    Ok(result)
}

async fn mass_profiles(gamespace_id: i64, account_ids: Vec<i64>, profile_fields: Vec<String>) -> Result<Value, Error> {
    let url = format!("{}/v1/mass_profiles", CONFIG.profile_service_url());

    let mut request = get_reqwest_client()
        .post(&url)
        .header(CONTENT_TYPE, "application/json")
        .header(ACCEPT, "application/json")
        .json(&json!({
            "gamespace": gamespace_id,
            "accounts": account_ids,
            "action": "get_public",
            "profile_fields": profile_fields,
        }));

    if let Some(token) = CONFIG.service_token() {
        request = request.bearer_auth(token);
    }

    Ok(request.send().await?.error_for_status()?.json::<Value>().await?)
}

/// Renders the `[{account, profile}]` decoration shape the listing endpoints
/// respond with.
pub fn decorate_accounts(account_ids: &[i64], profiles: &HashMap<i64, Value>) -> Vec<Value> {
    account_ids
        .iter()
        .map(|id| {
            json!({
                "account": id,
                "profile": profiles.get(id).cloned().unwrap_or_else(|| json!({})),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoration_pairs_accounts_with_profiles() {
        let mut profiles = HashMap::new();
        profiles.insert(1, json!({"name": "ada"}));

        let decorated = decorate_accounts(&[1, 2], &profiles);
        assert_eq!(decorated[0]["account"], 1);
        assert_eq!(decorated[0]["profile"]["name"], "ada");
        assert_eq!(decorated[1]["account"], 2);
        assert_eq!(decorated[1]["profile"], json!({}));
    }
}
