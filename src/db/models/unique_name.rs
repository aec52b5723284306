use diesel::prelude::*;

use crate::db::schema::unique_names;
use crate::db::DbConn;
use crate::error::{Error, MapResult};
use crate::util::tokenize_search_query;

#[derive(Identifiable, Queryable, Insertable)]
#[diesel(table_name = unique_names)]
#[diesel(primary_key(gamespace_id, account_id, kind))]
pub struct UniqueName {
    pub gamespace_id: i64,
    pub account_id: i64,
    pub kind: String,
    pub name: String,
}

impl UniqueName {
    /// Claims `name` of the given kind for the account, replacing whatever
    /// name it held before. Fails with Conflict when another account already
    /// holds it.
    pub async fn acquire(gamespace_id: i64, account_id: i64, kind: &str, name: &str, conn: &DbConn) -> Result<(), Error> {
        let kind = kind.to_string();
        let name = name.to_string();
        db_run! { conn:
            mysql, postgresql {
                conn.transaction::<(), Error, _>(|conn| {
                    let holder = unique_names::table
                        .filter(unique_names::gamespace_id.eq(gamespace_id))
                        .filter(unique_names::kind.eq(&kind))
                        .filter(unique_names::name.eq(&name))
                        .select(unique_names::account_id)
                        .for_update()
                        .first::<i64>(conn)
                        .optional()
                        .map_res("Error checking name holder")?;

                    match holder {
                        Some(holder) if holder != account_id => {
                            Err(Error::conflict("This name is already taken"))
                        }
                        Some(_) => Ok(()),
                        None => {
                            let updated = diesel::update(
                                unique_names::table
                                    .filter(unique_names::gamespace_id.eq(gamespace_id))
                                    .filter(unique_names::account_id.eq(account_id))
                                    .filter(unique_names::kind.eq(&kind)),
                            )
                            .set(unique_names::name.eq(&name))
                            .execute(conn)
                            .map_res("Error renaming unique name")?;

                            if updated == 0 {
                                diesel::insert_into(unique_names::table)
                                    .values(&UniqueName {
                                        gamespace_id,
                                        account_id,
                                        kind: kind.clone(),
                                        name: name.clone(),
                                    })
                                    .execute(conn)
                                    .map_res("Error acquiring unique name")?;
                            }

                            Ok(())
                        }
                    }
                })
            }
        }
        .map_err(|e| {
            // A concurrent claim of the same fresh name loses the insert race.
            if e.is_unique_violation() {
                Error::conflict("This name is already taken")
            } else {
                e
            }
        })
    }

    /// Gives the name back; returns whether the account held one.
    pub async fn release(gamespace_id: i64, account_id: i64, kind: &str, conn: &DbConn) -> Result<bool, Error> {
        let kind = kind.to_string();
        db_run! { conn: {
            diesel::delete(
                unique_names::table
                    .filter(unique_names::gamespace_id.eq(gamespace_id))
                    .filter(unique_names::account_id.eq(account_id))
                    .filter(unique_names::kind.eq(&kind)),
            )
            .execute(conn)
            .map_res("Error releasing unique name")
            .map(|count| count > 0)
        }}
    }

    /// Which account holds this name, if any.
    pub async fn check(gamespace_id: i64, kind: &str, name: &str, conn: &DbConn) -> Result<Option<i64>, Error> {
        let kind = kind.to_string();
        let name = name.to_string();
        db_run! { conn: {
            unique_names::table
                .filter(unique_names::gamespace_id.eq(gamespace_id))
                .filter(unique_names::kind.eq(&kind))
                .filter(unique_names::name.eq(&name))
                .select(unique_names::account_id)
                .first::<i64>(conn)
                .optional()
                .map_res("Error checking unique name")
        }}
    }

    /// Prefix full-text search over names of a kind, capped at 100 rows.
    pub async fn search(gamespace_id: i64, kind: &str, query: &str, conn: &DbConn) -> Result<Vec<Self>, Error> {
        let tokens = tokenize_search_query(query);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let kind = kind.to_string();
        db_run! { conn:
            mysql {
                let compiled = tokens.iter().map(|t| format!("+{t}*")).collect::<Vec<_>>().join(" ");
                unique_names::table
                    .filter(unique_names::gamespace_id.eq(gamespace_id))
                    .filter(unique_names::kind.eq(&kind))
                    .filter(
                        diesel::dsl::sql::<diesel::sql_types::Bool>("MATCH(`name`) AGAINST (")
                            .bind::<diesel::sql_types::Text, _>(compiled)
                            .sql(" IN BOOLEAN MODE)"),
                    )
                    .limit(100)
                    .load::<Self>(conn)
                    .map_res("Error searching unique names")
            }
            postgresql {
                let compiled = tokens.iter().map(|t| format!("{t}:*")).collect::<Vec<_>>().join(" & ");
                unique_names::table
                    .filter(unique_names::gamespace_id.eq(gamespace_id))
                    .filter(unique_names::kind.eq(&kind))
                    .filter(
                        diesel::dsl::sql::<diesel::sql_types::Bool>("to_tsvector('simple', name) @@ to_tsquery('simple', ")
                            .bind::<diesel::sql_types::Text, _>(compiled)
                            .sql(")"),
                    )
                    .limit(100)
                    .load::<Self>(conn)
                    .map_res("Error searching unique names")
            }
        }
    }

    /// Purge on account deletion; scoped to one gamespace when asked.
    pub async fn delete_all_by_accounts(
        gamespace_id: Option<i64>,
        accounts: &[i64],
        conn: &DbConn,
    ) -> Result<(), Error> {
        if accounts.is_empty() {
            return Ok(());
        }

        let accounts = accounts.to_vec();
        db_run! { conn: {
            match gamespace_id {
                Some(gamespace_id) => diesel::delete(
                    unique_names::table
                        .filter(unique_names::gamespace_id.eq(gamespace_id))
                        .filter(unique_names::account_id.eq_any(&accounts)),
                )
                .execute(conn),
                None => diesel::delete(unique_names::table.filter(unique_names::account_id.eq_any(&accounts)))
                    .execute(conn),
            }
            .map_res("Error purging unique names")
            .map(|_| ())
        }}
    }
}
