use chrono::{Duration, NaiveDateTime, Utc};
use diesel::prelude::*;
use serde_json::Value;

use crate::db::schema::requests;
use crate::db::DbConn;
use crate::error::{Error, MapResult};
use crate::CONFIG;

#[derive(Identifiable, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = requests)]
#[diesel(primary_key(gamespace_id, request_key))]
pub struct PendingRequest {
    pub gamespace_id: i64,
    pub request_key: String,
    pub account_id: i64,
    pub kind: String,
    pub object_id: i64,
    pub payload: String,
    pub created_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

/// What a pending request points at: another account (friendship requests)
/// or a group (invitations and join requests).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestKind {
    Account,
    Group,
}

impl RequestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestKind::Account => "account",
            RequestKind::Group => "group",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "account" => Some(RequestKind::Account),
            "group" => Some(RequestKind::Group),
            _ => None,
        }
    }
}

/// Local methods
impl PendingRequest {
    pub fn new(gamespace_id: i64, account_id: i64, kind: RequestKind, object_id: i64, payload: &Value) -> Self {
        let now = Utc::now().naive_utc();

        Self {
            gamespace_id,
            request_key: crate::util::get_uuid(),
            account_id,
            kind: kind.as_str().to_string(),
            object_id,
            payload: payload.to_string(),
            created_at: now,
            expires_at: now + Duration::days(CONFIG.request_ttl_days()),
        }
    }

    pub fn kind(&self) -> Option<RequestKind> {
        RequestKind::from_str(&self.kind)
    }

    pub fn payload_value(&self) -> Value {
        serde_json::from_str(&self.payload).unwrap_or_else(|_| serde_json::json!({}))
    }
}

/// Database methods
impl PendingRequest {
    /// Creates a pending request and returns its opaque key. When the same
    /// account already has a pending request of this kind for this object,
    /// the existing key is returned instead of a second row.
    pub async fn create(
        gamespace_id: i64,
        account_id: i64,
        kind: RequestKind,
        object_id: i64,
        payload: &Value,
        conn: &DbConn,
    ) -> Result<String, Error> {
        if let Some(existing) = Self::find_by_object(gamespace_id, account_id, kind, object_id, conn).await? {
            return Ok(existing.request_key);
        }

        let request = Self::new(gamespace_id, account_id, kind, object_id, payload);
        let key = request.request_key.clone();

        db_run! { conn: {
            diesel::insert_into(requests::table)
                .values(&request)
                .execute(conn)
                .map_res("Error creating pending request")
        }}
        .map_err(|e| {
            if e.is_unique_violation() {
                Error::conflict("A pending request for this object already exists")
            } else {
                e
            }
        })?;

        Ok(key)
    }

    /// Single-use take of a request: reads the row under a lock and deletes
    /// it in the same transaction, so at most one caller ever obtains a
    /// given key. The `account_id` is the owner of the request (the account
    /// that is joining, or that asked for the connection).
    pub async fn acquire(gamespace_id: i64, account_id: i64, key: &str, conn: &DbConn) -> Result<Self, Error> {
        let key = key.to_string();
        db_run! { conn:
            mysql, postgresql {
                conn.transaction::<Self, Error, _>(|conn| {
                    let request = requests::table
                        .filter(requests::gamespace_id.eq(gamespace_id))
                        .filter(requests::account_id.eq(account_id))
                        .filter(requests::request_key.eq(&key))
                        .for_update()
                        .first::<Self>(conn)
                        .optional()
                        .map_res("Error acquiring pending request")?
                        .ok_or_else(|| Error::not_found("No such request"))?;

                    diesel::delete(
                        requests::table
                            .filter(requests::gamespace_id.eq(gamespace_id))
                            .filter(requests::account_id.eq(request.account_id))
                            .filter(requests::kind.eq(&request.kind))
                            .filter(requests::object_id.eq(request.object_id)),
                    )
                    .execute(conn)
                    .map_res("Error consuming pending request")?;

                    Ok(request)
                })
            }
        }
    }

    pub async fn find_by_object(
        gamespace_id: i64,
        account_id: i64,
        kind: RequestKind,
        object_id: i64,
        conn: &DbConn,
    ) -> Result<Option<Self>, Error> {
        db_run! { conn: {
            requests::table
                .filter(requests::gamespace_id.eq(gamespace_id))
                .filter(requests::account_id.eq(account_id))
                .filter(requests::kind.eq(kind.as_str()))
                .filter(requests::object_id.eq(object_id))
                .first::<Self>(conn)
                .optional()
                .map_res("Error looking up pending request")
        }}
    }

    /// Idempotent delete; returns whether a row was removed.
    pub async fn delete_by_object(
        gamespace_id: i64,
        account_id: i64,
        kind: RequestKind,
        object_id: i64,
        conn: &DbConn,
    ) -> Result<bool, Error> {
        db_run! { conn: {
            diesel::delete(
                requests::table
                    .filter(requests::gamespace_id.eq(gamespace_id))
                    .filter(requests::account_id.eq(account_id))
                    .filter(requests::kind.eq(kind.as_str()))
                    .filter(requests::object_id.eq(object_id)),
            )
            .execute(conn)
            .map_res("Error deleting pending request")
            .map(|count| count > 0)
        }}
    }

    /// Removes everything an account requested, used on account deletion.
    pub async fn delete_all_by_account(gamespace_id: i64, account_id: i64, conn: &DbConn) -> Result<(), Error> {
        db_run! { conn: {
            diesel::delete(
                requests::table
                    .filter(requests::gamespace_id.eq(gamespace_id))
                    .filter(requests::account_id.eq(account_id)),
            )
            .execute(conn)
            .map_res("Error purging account requests")
            .map(|_| ())
        }}
    }

    /// Scheduled sweep of expired rows.
    pub async fn purge_expired(conn: &DbConn) -> Result<usize, Error> {
        let now = Utc::now().naive_utc();
        db_run! { conn: {
            diesel::delete(requests::table.filter(requests::expires_at.lt(now)))
                .execute(conn)
                .map_res("Error purging expired requests")
        }}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_kind_round_trips() {
        assert_eq!(RequestKind::from_str("account"), Some(RequestKind::Account));
        assert_eq!(RequestKind::from_str("group"), Some(RequestKind::Group));
        assert_eq!(RequestKind::from_str("clan"), None);
        assert_eq!(RequestKind::Account.as_str(), "account");
        assert_eq!(RequestKind::Group.as_str(), "group");
    }

    #[test]
    fn corrupt_payload_degrades_to_empty_object() {
        let request = PendingRequest {
            gamespace_id: 1,
            request_key: "k".into(),
            account_id: 2,
            kind: "group".into(),
            object_id: 3,
            payload: "{not json".into(),
            created_at: chrono::NaiveDateTime::default(),
            expires_at: chrono::NaiveDateTime::default(),
        };
        assert_eq!(request.payload_value(), serde_json::json!({}));
    }
}
