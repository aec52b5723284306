use std::collections::HashMap;

use chrono::{Duration, Utc};
use serde_json::{json, Value};

use crate::db::models::CredentialToken;
use crate::db::DbConn;
use crate::error::Error;
use crate::login;
use crate::util::get_reqwest_client;

const CREDENTIAL: &str = "google";

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const CONNECTIONS_URL: &str = "https://people.googleapis.com/v1/people/me/connections";
const USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

#[derive(Debug)]
pub struct GoogleApi;

impl GoogleApi {
    async fn token(&self, gamespace_id: i64, account_id: i64, conn: &DbConn) -> Result<CredentialToken, Error> {
        let token = CredentialToken::find_by_account_and_credential(gamespace_id, account_id, CREDENTIAL, conn)
            .await?
            .ok_or_else(|| Error::reauth_required(CREDENTIAL, None))?;

        let expired = token.expires_at.map(|at| Utc::now().naive_utc() > at).unwrap_or(false);
        if expired {
            return self.refresh_token(gamespace_id, &token, conn).await;
        }

        Ok(token)
    }

    /// Trades the stored refresh token for a fresh access token. Without a
    /// refresh token (or when google rejects it) the player has to sign in
    /// through google again.
    async fn refresh_token(
        &self,
        gamespace_id: i64,
        token: &CredentialToken,
        conn: &DbConn,
    ) -> Result<CredentialToken, Error> {
        let payload = token.payload_value();
        let Some(refresh_token) = payload["refresh_token"].as_str() else {
            return Err(Error::reauth_required(CREDENTIAL, Some(&token.username)));
        };

        let key = login::get_key(gamespace_id, CREDENTIAL).await?;
        let (Some(client_id), Some(client_secret)) = (key["client_id"].as_str(), key["client_secret"].as_str()) else {
            err!(internal, "google provider key is missing client_id/client_secret");
        };

        let response = get_reqwest_client()
            .post(TOKEN_URL)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", client_id),
                ("client_secret", client_secret),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::reauth_required(CREDENTIAL, Some(&token.username)));
        }

        let refreshed = response.json::<Value>().await?;
        let Some(access_token) = refreshed["access_token"].as_str() else {
            return Err(Error::reauth_required(CREDENTIAL, Some(&token.username)));
        };
        let expires_at =
            refreshed["expires_in"].as_i64().map(|seconds| Utc::now().naive_utc() + Duration::seconds(seconds));

        CredentialToken::upsert(gamespace_id, CREDENTIAL, &token.username, access_token, expires_at, &json!({}), conn)
            .await?;

        Ok(CredentialToken {
            gamespace_id,
            credential: CREDENTIAL.to_string(),
            username: token.username.clone(),
            account_id: token.account_id,
            access_token: access_token.to_string(),
            expires_at,
            payload: token.payload.clone(),
        })
    }

    pub async fn list_friends(
        &self,
        gamespace_id: i64,
        account_id: i64,
        conn: &DbConn,
    ) -> Result<HashMap<String, Value>, Error> {
        let token = self.token(gamespace_id, account_id, conn).await?;

        match self.fetch_friends(&token).await {
            // the access token may have been revoked server-side; one refresh
            // and retry before demanding a new sign-in
            Err(e) if e.code() == 401 => {
                let refreshed = self.refresh_token(gamespace_id, &token, conn).await?;
                self.fetch_friends(&refreshed).await
            }
            other => other,
        }
    }

    async fn fetch_friends(&self, token: &CredentialToken) -> Result<HashMap<String, Value>, Error> {
        let response = get_reqwest_client()
            .get(CONNECTIONS_URL)
            .query(&[("personFields", "names,photos"), ("pageSize", "200")])
            .bearer_auth(&token.access_token)
            .send()
            .await?;

        if response.status().as_u16() == 401 || response.status().as_u16() == 403 {
            return Err(Error::reauth_required(CREDENTIAL, Some(&token.username)));
        }

        let body = response.error_for_status()?.json::<Value>().await?;

        let mut friends = HashMap::new();
        if let Some(connections) = body["connections"].as_array() {
            for person in connections {
                let Some(resource) = person["resourceName"].as_str() else { continue };
                let username = resource.strip_prefix("people/").unwrap_or(resource).to_string();
                let display_name = person["names"][0]["displayName"].clone();
                let avatar = person["photos"][0]["url"].clone();
                friends.insert(username, json!({ "display_name": display_name, "avatar": avatar }));
            }
        }

        Ok(friends)
    }

    pub async fn get_social_profile(&self, gamespace_id: i64, account_id: i64, conn: &DbConn) -> Result<Value, Error> {
        let token = self.token(gamespace_id, account_id, conn).await?;

        let response = get_reqwest_client().get(USERINFO_URL).bearer_auth(&token.access_token).send().await?;

        if response.status().as_u16() == 401 {
            return Err(Error::reauth_required(CREDENTIAL, Some(&token.username)));
        }

        Ok(response.error_for_status()?.json::<Value>().await?)
    }
}
