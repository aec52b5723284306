use std::collections::HashMap;

use chrono::Utc;
use serde_json::{json, Value};

use crate::db::models::CredentialToken;
use crate::db::DbConn;
use crate::error::Error;
use crate::util::get_reqwest_client;

const CREDENTIAL: &str = "vk";

const API_URL: &str = "https://api.vk.com/method";
const API_VERSION: &str = "5.131";

// vk reports "user authorization failed" inside a 200 body
const VK_ERROR_AUTH_FAILED: i64 = 5;

#[derive(Debug)]
pub struct VkApi;

impl VkApi {
    async fn token(&self, gamespace_id: i64, account_id: i64, conn: &DbConn) -> Result<CredentialToken, Error> {
        let token = CredentialToken::find_by_account_and_credential(gamespace_id, account_id, CREDENTIAL, conn)
            .await?
            .ok_or_else(|| Error::reauth_required(CREDENTIAL, None))?;

        // vk tokens may be issued without an expiry
        if let Some(expires_at) = token.expires_at {
            if Utc::now().naive_utc() > expires_at {
                return Err(Error::reauth_required(CREDENTIAL, Some(&token.username)));
            }
        }

        Ok(token)
    }

    async fn call(&self, method: &str, params: &[(&str, &str)], token: &CredentialToken) -> Result<Value, Error> {
        let mut query: Vec<(&str, &str)> = params.to_vec();
        query.push(("access_token", token.access_token.as_str()));
        query.push(("v", API_VERSION));

        let body = get_reqwest_client()
            .get(format!("{API_URL}/{method}"))
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;

        if let Some(error) = body.get("error") {
            if error["error_code"].as_i64() == Some(VK_ERROR_AUTH_FAILED) {
                return Err(Error::reauth_required(CREDENTIAL, Some(&token.username)));
            }
            err!(internal, format!("vk api error: {error}"));
        }

        Ok(body["response"].clone())
    }

    pub async fn list_friends(
        &self,
        gamespace_id: i64,
        account_id: i64,
        conn: &DbConn,
    ) -> Result<HashMap<String, Value>, Error> {
        let token = self.token(gamespace_id, account_id, conn).await?;

        let response =
            self.call("friends.get", &[("fields", "first_name,last_name,photo_200")], &token).await?;

        let mut friends = HashMap::new();
        if let Some(items) = response["items"].as_array() {
            for item in items {
                let Some(id) = item["id"].as_i64() else { continue };
                friends.insert(
                    id.to_string(),
                    json!({
                        "first_name": item["first_name"],
                        "last_name": item["last_name"],
                        "avatar": item["photo_200"],
                    }),
                );
            }
        }

        Ok(friends)
    }

    pub async fn get_social_profile(&self, gamespace_id: i64, account_id: i64, conn: &DbConn) -> Result<Value, Error> {
        let token = self.token(gamespace_id, account_id, conn).await?;
        let response = self.call("users.get", &[("fields", "first_name,last_name,photo_200")], &token).await?;
        Ok(response[0].clone())
    }
}
