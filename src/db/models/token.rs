use std::collections::HashMap;

use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde_json::{Map, Value};

use crate::db::schema::credential_tokens;
use crate::db::DbConn;
use crate::error::{Error, MapResult};

#[derive(Identifiable, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = credential_tokens)]
#[diesel(primary_key(gamespace_id, credential, username))]
pub struct CredentialToken {
    pub gamespace_id: i64,
    pub credential: String,
    pub username: String,
    pub account_id: Option<i64>,
    pub access_token: String,
    pub expires_at: Option<NaiveDateTime>,
    pub payload: String,
}

/// Local methods
impl CredentialToken {
    /// The `credential:username` handle external friend entries resolve by.
    pub fn merged(credential: &str, username: &str) -> String {
        format!("{credential}:{username}")
    }

    pub fn payload_value(&self) -> Value {
        serde_json::from_str(&self.payload).unwrap_or_else(|_| serde_json::json!({}))
    }

    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "credential": self.credential,
            "username": self.username,
            "expires_at": self.expires_at.as_ref().map(crate::util::format_date),
            "payload": self.payload_value(),
        })
    }
}

/// Database methods
impl CredentialToken {
    /// Binds a previously imported external credential to a platform account.
    pub async fn attach(
        gamespace_id: i64,
        credential: &str,
        username: &str,
        account_id: i64,
        conn: &DbConn,
    ) -> Result<(), Error> {
        let credential = credential.to_string();
        let username = username.to_string();
        db_run! { conn: {
            diesel::update(
                credential_tokens::table
                    .filter(credential_tokens::gamespace_id.eq(gamespace_id))
                    .filter(credential_tokens::credential.eq(&credential))
                    .filter(credential_tokens::username.eq(&username)),
            )
            .set(credential_tokens::account_id.eq(account_id))
            .execute(conn)
            .map_res("Error attaching account to credential")
            .map(|_| ())
        }}
    }

    pub async fn find_by_account_and_credential(
        gamespace_id: i64,
        account_id: i64,
        credential: &str,
        conn: &DbConn,
    ) -> Result<Option<Self>, Error> {
        let credential = credential.to_string();
        db_run! { conn: {
            credential_tokens::table
                .filter(credential_tokens::gamespace_id.eq(gamespace_id))
                .filter(credential_tokens::account_id.eq(account_id))
                .filter(credential_tokens::credential.eq(&credential))
                .first::<Self>(conn)
                .optional()
                .map_res("Error loading credential token")
        }}
    }

    pub async fn find_by_credential(
        gamespace_id: i64,
        credential: &str,
        username: &str,
        conn: &DbConn,
    ) -> Result<Option<Self>, Error> {
        let credential = credential.to_string();
        let username = username.to_string();
        db_run! { conn: {
            credential_tokens::table
                .filter(credential_tokens::gamespace_id.eq(gamespace_id))
                .filter(credential_tokens::credential.eq(&credential))
                .filter(credential_tokens::username.eq(&username))
                .first::<Self>(conn)
                .optional()
                .map_res("Error loading credential token")
        }}
    }

    pub async fn list_by_account(gamespace_id: i64, account_id: i64, conn: &DbConn) -> Result<Vec<Self>, Error> {
        db_run! { conn: {
            credential_tokens::table
                .filter(credential_tokens::gamespace_id.eq(gamespace_id))
                .filter(credential_tokens::account_id.eq(account_id))
                .load::<Self>(conn)
                .map_res("Error listing credential tokens")
        }}
    }

    /// Resolves `credential:username` handles to the platform accounts they
    /// are attached to. Unknown or unattached handles are simply absent from
    /// the result.
    pub async fn lookup_accounts(
        gamespace_id: i64,
        merged_credentials: &[String],
        conn: &DbConn,
    ) -> Result<HashMap<String, i64>, Error> {
        let pairs: Vec<(String, String)> = merged_credentials
            .iter()
            .filter_map(|merged| {
                merged.split_once(':').map(|(credential, username)| (credential.to_string(), username.to_string()))
            })
            .collect();

        if pairs.is_empty() {
            return Ok(HashMap::new());
        }

        let credentials: Vec<String> = pairs.iter().map(|(c, _)| c.clone()).collect();
        let usernames: Vec<String> = pairs.iter().map(|(_, u)| u.clone()).collect();

        // eq_any narrows on each column; the exact pair match happens here,
        // since a portable tuple IN over two columns is not available.
        let rows: Vec<Self> = db_run! { conn: {
            credential_tokens::table
                .filter(credential_tokens::gamespace_id.eq(gamespace_id))
                .filter(credential_tokens::account_id.is_not_null())
                .filter(credential_tokens::credential.eq_any(&credentials))
                .filter(credential_tokens::username.eq_any(&usernames))
                .load::<Self>(conn)
                .map_res("Error resolving credential accounts")
        }}?;

        let wanted: std::collections::HashSet<(String, String)> = pairs.into_iter().collect();

        Ok(rows
            .into_iter()
            .filter(|t| wanted.contains(&(t.credential.clone(), t.username.clone())))
            .filter_map(|t| t.account_id.map(|account| (Self::merged(&t.credential, &t.username), account)))
            .collect())
    }

    /// Inserts a freshly imported token, or refreshes the existing one while
    /// merging `data` into its payload. Returns the account the credential
    /// was already attached to, if any.
    pub async fn upsert(
        gamespace_id: i64,
        credential: &str,
        username: &str,
        access_token: &str,
        expires_at: Option<NaiveDateTime>,
        data: &Value,
        conn: &DbConn,
    ) -> Result<Option<i64>, Error> {
        match Self::find_by_credential(gamespace_id, credential, username, conn).await? {
            Some(existing) => {
                let mut payload = match existing.payload_value() {
                    Value::Object(fields) => fields,
                    _ => Map::new(),
                };
                if let Value::Object(extra) = data {
                    payload.extend(extra.clone());
                }
                let payload = Value::Object(payload).to_string();
                let access_token = access_token.to_string();
                let credential = credential.to_string();
                let username = username.to_string();

                db_run! { conn: {
                    diesel::update(
                        credential_tokens::table
                            .filter(credential_tokens::gamespace_id.eq(gamespace_id))
                            .filter(credential_tokens::credential.eq(&credential))
                            .filter(credential_tokens::username.eq(&username)),
                    )
                    .set((
                        credential_tokens::access_token.eq(&access_token),
                        credential_tokens::expires_at.eq(expires_at),
                        credential_tokens::payload.eq(&payload),
                    ))
                    .execute(conn)
                    .map_res("Error refreshing credential token")
                }}?;

                Ok(existing.account_id)
            }
            None => {
                let token = Self {
                    gamespace_id,
                    credential: credential.to_string(),
                    username: username.to_string(),
                    account_id: None,
                    access_token: access_token.to_string(),
                    expires_at,
                    payload: data.to_string(),
                };

                db_run! { conn: {
                    diesel::insert_into(credential_tokens::table)
                        .values(&token)
                        .execute(conn)
                        .map_res("Error saving credential token")
                }}?;

                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merged_handle_format() {
        assert_eq!(CredentialToken::merged("google", "105"), "google:105");
    }

    #[test]
    fn payload_parse_tolerates_garbage() {
        let token = CredentialToken {
            gamespace_id: 1,
            credential: "vk".into(),
            username: "u".into(),
            account_id: None,
            access_token: "t".into(),
            expires_at: None,
            payload: "broken".into(),
        };
        assert_eq!(token.payload_value(), serde_json::json!({}));
    }
}
