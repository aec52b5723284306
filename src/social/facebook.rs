use std::collections::HashMap;

use chrono::Utc;
use serde_json::{json, Value};

use crate::db::models::CredentialToken;
use crate::db::DbConn;
use crate::error::Error;
use crate::util::get_reqwest_client;

const CREDENTIAL: &str = "facebook";

const GRAPH_URL: &str = "https://graph.facebook.com/v12.0";

#[derive(Debug)]
pub struct FacebookApi;

impl FacebookApi {
    // facebook has no refresh flow; an expired token always means a new sign-in
    async fn token(&self, gamespace_id: i64, account_id: i64, conn: &DbConn) -> Result<CredentialToken, Error> {
        let token = CredentialToken::find_by_account_and_credential(gamespace_id, account_id, CREDENTIAL, conn)
            .await?
            .ok_or_else(|| Error::reauth_required(CREDENTIAL, None))?;

        let expired = token.expires_at.map(|at| Utc::now().naive_utc() > at).unwrap_or(false);
        if expired {
            return Err(Error::reauth_required(CREDENTIAL, Some(&token.username)));
        }

        Ok(token)
    }

    pub async fn list_friends(
        &self,
        gamespace_id: i64,
        account_id: i64,
        conn: &DbConn,
    ) -> Result<HashMap<String, Value>, Error> {
        let token = self.token(gamespace_id, account_id, conn).await?;

        let response = get_reqwest_client()
            .get(format!("{GRAPH_URL}/me/friends"))
            .query(&[("fields", "id,name"), ("access_token", token.access_token.as_str())])
            .send()
            .await?;

        if matches!(response.status().as_u16(), 400 | 401) {
            return Err(Error::reauth_required(CREDENTIAL, Some(&token.username)));
        }

        let body = response.error_for_status()?.json::<Value>().await?;

        let mut friends = HashMap::new();
        if let Some(entries) = body["data"].as_array() {
            for entry in entries {
                let Some(id) = entry["id"].as_str() else { continue };
                friends.insert(id.to_string(), json!({ "display_name": entry["name"] }));
            }
        }

        Ok(friends)
    }

    pub async fn get_social_profile(&self, gamespace_id: i64, account_id: i64, conn: &DbConn) -> Result<Value, Error> {
        let token = self.token(gamespace_id, account_id, conn).await?;

        let response = get_reqwest_client()
            .get(format!("{GRAPH_URL}/me"))
            .query(&[("fields", "id,name,email,locale"), ("access_token", token.access_token.as_str())])
            .send()
            .await?;

        if matches!(response.status().as_u16(), 400 | 401) {
            return Err(Error::reauth_required(CREDENTIAL, Some(&token.username)));
        }

        Ok(response.error_for_status()?.json::<Value>().await?)
    }
}
