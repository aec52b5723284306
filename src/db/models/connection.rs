use diesel::prelude::*;
use diesel::Connection as _;
use serde_json::json;

use super::{PendingRequest, RequestKind};
use crate::db::schema::account_connections;
use crate::db::DbConn;
use crate::error::{Error, MapResult};

#[derive(Identifiable, Queryable, Insertable)]
#[diesel(table_name = account_connections)]
#[diesel(primary_key(gamespace_id, account_id, other_id))]
pub struct Connection {
    pub gamespace_id: i64,
    pub account_id: i64,
    pub other_id: i64,
}

/// A friendship is stored as two symmetric rows, written together in one
/// transaction so the (a,b) <=> (b,a) invariant can never be half-applied.
impl Connection {
    pub async fn connect_pair(gamespace_id: i64, account_a: i64, account_b: i64, conn: &DbConn) -> Result<(), Error> {
        if account_a == account_b {
            err!(conflict, "Cannot connect an account to itself");
        }

        db_run! { conn:
            mysql, postgresql {
                conn.transaction::<(), Error, _>(|conn| {
                    diesel::insert_into(account_connections::table)
                        .values(&vec![
                            Connection { gamespace_id, account_id: account_a, other_id: account_b },
                            Connection { gamespace_id, account_id: account_b, other_id: account_a },
                        ])
                        .execute(conn)
                        .map_res("Error creating connection pair")?;
                    Ok(())
                })
            }
        }
        .map_err(|e| {
            if e.is_unique_violation() {
                Error::conflict("These accounts are already connected")
            } else {
                e
            }
        })
    }

    /// Asks `target` for a friendship; returns the single-use key the target
    /// needs to approve or reject it. Issuing the same request twice returns
    /// the original key.
    pub async fn request(gamespace_id: i64, account_id: i64, target_id: i64, conn: &DbConn) -> Result<String, Error> {
        if account_id == target_id {
            err!(conflict, "Cannot request a connection to yourself");
        }

        PendingRequest::create(gamespace_id, account_id, RequestKind::Account, target_id, &json!({}), conn).await
    }

    /// Consumes a connection request addressed to `account_id` and creates
    /// the symmetric pair. `requester_id` is the account that issued the
    /// request (the owner of the key).
    pub async fn approve(
        gamespace_id: i64,
        account_id: i64,
        requester_id: i64,
        key: &str,
        conn: &DbConn,
    ) -> Result<(), Error> {
        let request = Self::take_request(gamespace_id, account_id, requester_id, key, conn).await?;
        Self::connect_pair(gamespace_id, request.account_id, request.object_id, conn).await
    }

    /// Consumes a connection request without creating anything.
    pub async fn reject(
        gamespace_id: i64,
        account_id: i64,
        requester_id: i64,
        key: &str,
        conn: &DbConn,
    ) -> Result<(), Error> {
        Self::take_request(gamespace_id, account_id, requester_id, key, conn).await.map(|_| ())
    }

    async fn take_request(
        gamespace_id: i64,
        account_id: i64,
        requester_id: i64,
        key: &str,
        conn: &DbConn,
    ) -> Result<PendingRequest, Error> {
        let request = PendingRequest::acquire(gamespace_id, requester_id, key, conn).await?;

        if request.kind() != Some(RequestKind::Account) {
            err!(bad_input, "Bad request object");
        }

        if request.object_id != account_id {
            err!(not_a_member, "This key is not addressed to you");
        }

        Ok(request)
    }

    /// Removes both symmetric rows; idempotent.
    pub async fn delete_pair(gamespace_id: i64, account_a: i64, account_b: i64, conn: &DbConn) -> Result<(), Error> {
        db_run! { conn: {
            diesel::delete(
                account_connections::table
                    .filter(account_connections::gamespace_id.eq(gamespace_id))
                    .filter(
                        (account_connections::account_id
                            .eq(account_a)
                            .and(account_connections::other_id.eq(account_b)))
                        .or(account_connections::account_id
                            .eq(account_b)
                            .and(account_connections::other_id.eq(account_a))),
                    ),
            )
            .execute(conn)
            .map_res("Error deleting connection pair")
            .map(|_| ())
        }}
    }

    pub async fn list_for_account(gamespace_id: i64, account_id: i64, conn: &DbConn) -> Result<Vec<i64>, Error> {
        db_run! { conn: {
            account_connections::table
                .filter(account_connections::gamespace_id.eq(gamespace_id))
                .filter(account_connections::account_id.eq(account_id))
                .select(account_connections::other_id)
                .load::<i64>(conn)
                .map_res("Error listing connections")
        }}
    }

    /// Drops every row the account appears in, on either side.
    pub async fn delete_all_by_account(gamespace_id: i64, account_id: i64, conn: &DbConn) -> Result<(), Error> {
        db_run! { conn: {
            diesel::delete(
                account_connections::table
                    .filter(account_connections::gamespace_id.eq(gamespace_id))
                    .filter(
                        account_connections::account_id
                            .eq(account_id)
                            .or(account_connections::other_id.eq(account_id)),
                    ),
            )
            .execute(conn)
            .map_res("Error purging account connections")
            .map(|_| ())
        }}
    }
}
