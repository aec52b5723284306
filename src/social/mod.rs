//
// External social providers
//
// Each provider is keyed by its credential name and exposes the same
// capability surface: an optional friend list, a public profile read, and a
// token import. The registry is built once at startup and dispatches over a
// tagged variant; the aggregated friends view fans out over every credential
// the account has linked, resolves known externals to platform accounts and
// unions them with internal connections.
//
pub mod facebook;
pub mod google;
pub mod mailru;
pub mod steam;
pub mod vk;

use std::collections::HashMap;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, NaiveDateTime, Utc};
use futures::future::join_all;
use moka::future::Cache;
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::db::models::{Connection, CredentialToken};
use crate::db::DbConn;
use crate::error::Error;
use crate::profiles;
use crate::util::sha256_hex;

const FRIENDS_CACHE_TTL: Duration = Duration::from_secs(300);

static FRIENDS_CACHE: Lazy<Cache<String, Value>> =
    Lazy::new(|| Cache::builder().max_capacity(10_000).time_to_live(FRIENDS_CACHE_TTL).build());

/// Credential material handed over by the login service when a player signs
/// in through an external provider.
#[derive(Debug, Deserialize)]
pub struct ImportedAuth {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl ImportedAuth {
    pub fn expires_at(&self) -> Option<NaiveDateTime> {
        self.expires_in.map(|seconds| Utc::now().naive_utc() + ChronoDuration::seconds(seconds))
    }
}

#[derive(Debug)]
pub enum Provider {
    Google(google::GoogleApi),
    Facebook(facebook::FacebookApi),
    Steam(steam::SteamApi),
    Vk(vk::VkApi),
    MailRu(mailru::MailRuApi),
}

impl Provider {
    pub fn credential(&self) -> &'static str {
        match self {
            Provider::Google(_) => "google",
            Provider::Facebook(_) => "facebook",
            Provider::Steam(_) => "steam",
            Provider::Vk(_) => "vk",
            Provider::MailRu(_) => "mailru",
        }
    }

    pub fn has_friend_list(&self) -> bool {
        matches!(self, Provider::Google(_) | Provider::Facebook(_) | Provider::Vk(_))
    }

    /// Friends as `{username -> social payload}` on the provider side.
    pub async fn list_friends(
        &self,
        gamespace_id: i64,
        account_id: i64,
        conn: &DbConn,
    ) -> Result<HashMap<String, Value>, Error> {
        match self {
            Provider::Google(api) => api.list_friends(gamespace_id, account_id, conn).await,
            Provider::Facebook(api) => api.list_friends(gamespace_id, account_id, conn).await,
            Provider::Vk(api) => api.list_friends(gamespace_id, account_id, conn).await,
            _ => Err(Error::internal(format!("{} has no friend list", self.credential()))),
        }
    }

    pub async fn get_social_profile(
        &self,
        gamespace_id: i64,
        username: &str,
        account_id: i64,
        conn: &DbConn,
    ) -> Result<Value, Error> {
        match self {
            Provider::Google(api) => api.get_social_profile(gamespace_id, account_id, conn).await,
            Provider::Facebook(api) => api.get_social_profile(gamespace_id, account_id, conn).await,
            Provider::Steam(api) => api.get_social_profile(gamespace_id, username).await,
            Provider::Vk(api) => api.get_social_profile(gamespace_id, account_id, conn).await,
            Provider::MailRu(api) => api.get_social_profile(gamespace_id, username).await,
        }
    }

    /// Stores (or refreshes) the imported token; returns the account the
    /// credential was already attached to, if any.
    pub async fn import_social(
        &self,
        gamespace_id: i64,
        username: &str,
        auth: &ImportedAuth,
        conn: &DbConn,
    ) -> Result<Option<i64>, Error> {
        let data = match self {
            // google hands out a refresh token worth keeping around
            Provider::Google(_) => match &auth.refresh_token {
                Some(refresh_token) => json!({ "refresh_token": refresh_token }),
                None => json!({}),
            },
            Provider::Steam(_) => {
                err!(bad_input, "steam credentials cannot be imported");
            }
            _ => json!({}),
        };

        CredentialToken::upsert(
            gamespace_id,
            self.credential(),
            username,
            &auth.access_token,
            auth.expires_at(),
            &data,
            conn,
        )
        .await
    }
}

pub struct SocialRegistry {
    providers: HashMap<&'static str, Provider>,
}

impl Default for SocialRegistry {
    fn default() -> Self {
        Self::build()
    }
}

impl SocialRegistry {
    pub fn build() -> Self {
        let mut registry = Self {
            providers: HashMap::new(),
        };
        registry.register(Provider::Google(google::GoogleApi));
        registry.register(Provider::Facebook(facebook::FacebookApi));
        registry.register(Provider::Vk(vk::VkApi));
        registry.register(Provider::Steam(steam::SteamApi));
        registry.register(Provider::MailRu(mailru::MailRuApi));
        registry
    }

    fn register(&mut self, provider: Provider) {
        self.providers.insert(provider.credential(), provider);
    }

    pub fn get(&self, credential: &str) -> Result<&Provider, Error> {
        self.providers.get(credential).ok_or_else(|| Error::not_found(format!("No such credential: '{credential}'")))
    }

    /// The aggregated friends view: external friend lists of every linked
    /// credential, resolved to platform accounts where known, unioned with
    /// internal connections and decorated with public profiles. The whole
    /// result is cached per (gamespace, account, fields).
    pub async fn list_friends(
        &self,
        gamespace_id: i64,
        account_id: i64,
        profile_fields: &[String],
        conn: &DbConn,
    ) -> Result<Value, Error> {
        let cache_key = format!("friends:{gamespace_id}:{account_id}:{}", sha256_hex(profile_fields));

        FRIENDS_CACHE
            .try_get_with(cache_key, self.aggregate_friends(gamespace_id, account_id, profile_fields, conn))
            .await
            .map_err(|e: std::sync::Arc<Error>| match &*e {
                Error::Unauthorized(payload, msg) => Error::Unauthorized(payload.clone(), msg.clone()),
                other => Error::from_code(other.code(), other.message().to_string()),
            })
    }

    async fn aggregate_friends(
        &self,
        gamespace_id: i64,
        account_id: i64,
        profile_fields: &[String],
        conn: &DbConn,
    ) -> Result<Value, Error> {
        let tokens = CredentialToken::list_by_account(gamespace_id, account_id, conn).await?;

        let apis: Vec<&Provider> = tokens
            .iter()
            .filter_map(|token| self.providers.get(token.credential.as_str()))
            .filter(|provider| provider.has_friend_list())
            .collect();

        // every provider call runs concurrently; provider-level API failures
        // only lose that credential's friends, a demand for re-authentication
        // is surfaced to the caller
        let mut external_friends: HashMap<String, Value> = HashMap::new();
        let results = join_all(
            apis.iter().map(|provider| async move {
                (provider.credential(), provider.list_friends(gamespace_id, account_id, conn).await)
            }),
        )
        .await;

        for (credential, result) in results {
            match result {
                Ok(friends) => {
                    for (username, friend) in friends {
                        external_friends.insert(CredentialToken::merged(credential, &username), friend);
                    }
                }
                Err(e) if e.code() == 401 => return Err(e),
                Err(e) => warn!("Skipping {credential} friends: {e}"),
            }
        }

        let merged: Vec<String> = external_friends.keys().cloned().collect();
        let credentials_to_accounts = CredentialToken::lookup_accounts(gamespace_id, &merged, conn).await?;

        let internal_connections = Connection::list_for_account(gamespace_id, account_id, conn).await?;

        // per platform account, the external credentials it was seen behind
        let mut account_credentials: HashMap<i64, Vec<String>> = HashMap::new();
        for connection in &internal_connections {
            account_credentials.entry(*connection).or_default();
        }
        for (credential, linked_account) in &credentials_to_accounts {
            account_credentials.entry(*linked_account).or_default().push(credential.clone());
        }

        let account_ids: Vec<i64> = account_credentials.keys().copied().collect();
        let account_profiles = profiles::get_public_profiles(gamespace_id, &account_ids, profile_fields).await?;

        let entries: serde_json::Map<String, Value> = account_credentials
            .into_iter()
            .map(|(friend_account, credentials)| {
                let credentials: serde_json::Map<String, Value> = credentials
                    .into_iter()
                    .map(|credential| {
                        let social = external_friends.get(&credential).cloned().unwrap_or_else(|| json!({}));
                        (credential, json!({ "social": social }))
                    })
                    .collect();

                let entry = json!({
                    "credentials": credentials,
                    "profile": account_profiles.get(&friend_account).cloned().unwrap_or_else(|| json!({})),
                });

                (friend_account.to_string(), entry)
            })
            .collect();

        Ok(Value::Object(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_knows_every_provider() {
        let registry = SocialRegistry::build();
        for credential in ["google", "facebook", "steam", "vk", "mailru"] {
            assert!(registry.get(credential).is_ok());
        }
        assert_eq!(registry.get("myspace").unwrap_err().code(), 404);
    }

    #[test]
    fn friend_list_capability() {
        let registry = SocialRegistry::build();
        assert!(registry.get("google").unwrap().has_friend_list());
        assert!(registry.get("facebook").unwrap().has_friend_list());
        assert!(registry.get("vk").unwrap().has_friend_list());
        assert!(!registry.get("steam").unwrap().has_friend_list());
        assert!(!registry.get("mailru").unwrap().has_friend_list());
    }

    #[test]
    fn imported_auth_expiry() {
        let auth = ImportedAuth {
            access_token: "t".into(),
            expires_in: Some(3600),
            refresh_token: None,
        };
        let expires_at = auth.expires_at().unwrap();
        assert!(expires_at > Utc::now().naive_utc());

        let forever = ImportedAuth {
            access_token: "t".into(),
            expires_in: None,
            refresh_token: None,
        };
        assert!(forever.expires_at().is_none());
    }
}
