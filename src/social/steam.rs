use serde_json::Value;

use crate::error::Error;
use crate::login;
use crate::util::get_reqwest_client;

const CREDENTIAL: &str = "steam";

const PLAYER_SUMMARIES_URL: &str = "https://api.steampowered.com/ISteamUser/GetPlayerSummaries/v2/";

/// Steam is keyed by a per-gamespace publisher API key rather than by
/// per-player tokens, so only the profile capability exists.
#[derive(Debug)]
pub struct SteamApi;

impl SteamApi {
    pub async fn get_social_profile(&self, gamespace_id: i64, username: &str) -> Result<Value, Error> {
        let key = login::get_key(gamespace_id, CREDENTIAL).await?;
        let Some(api_key) = key["key"].as_str() else {
            err!(internal, "steam provider key is missing the api key");
        };

        let body = get_reqwest_client()
            .get(PLAYER_SUMMARIES_URL)
            .query(&[("key", api_key), ("steamids", username)])
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;

        let player = body["response"]["players"][0].clone();
        if player.is_null() {
            err!(not_found, format!("No steam player: '{username}'"));
        }

        Ok(player)
    }
}
