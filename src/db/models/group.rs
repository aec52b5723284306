use std::collections::{HashMap, HashSet};

use diesel::prelude::*;
use serde_json::Value;

use super::{PendingRequest, RequestKind};
use crate::db::schema::{group_participants, groups};
use crate::db::DbConn;
use crate::error::{Error, MapResult};
use crate::util::tokenize_search_query;

pub const MAXIMUM_ROLE: i32 = 1000;
pub const MINIMUM_ROLE: i32 = 0;

pub const DEFAULT_MAX_MEMBERS: i64 = 50;
pub const MIN_MEMBERS_LIMIT: i64 = 2;
pub const MAX_MEMBERS_LIMIT: i64 = 1000;

pub const PERMISSION_REQUEST_APPROVAL: &str = "request_approval";
pub const PERMISSION_SEND_INVITE: &str = "send_invite";
pub const PERMISSION_KICK: &str = "kick";

/// Group flag enabling the sibling message-service coupling.
pub const FLAG_MESSAGE_SUPPORT: &str = "messages";

#[derive(Identifiable, Queryable, AsChangeset)]
#[diesel(table_name = groups)]
pub struct Group {
    pub id: i64,
    pub gamespace_id: i64,
    pub profile: String,
    pub flags: String,
    pub join_method: String,
    pub free_members: i32,
    pub owner_id: i64,
    pub name: Option<String>,
}

#[derive(Identifiable, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = group_participants)]
#[diesel(primary_key(gamespace_id, group_id, account_id))]
pub struct Participant {
    pub gamespace_id: i64,
    pub group_id: i64,
    pub account_id: i64,
    pub role: i32,
    pub permissions: String,
    pub profile: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinMethod {
    Free,
    Invite,
    Approve,
}

impl JoinMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            JoinMethod::Free => "free",
            JoinMethod::Invite => "invite",
            JoinMethod::Approve => "approve",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "free" => Some(JoinMethod::Free),
            "invite" => Some(JoinMethod::Invite),
            "approve" => Some(JoinMethod::Approve),
            _ => None,
        }
    }
}

/// Keeps only the permissions the granting participant holds itself. Owners
/// bypass this; everyone else can never hand out more than they have.
pub fn restrict_permissions(requested: &[String], own: &HashSet<String>) -> Vec<String> {
    requested.iter().filter(|p| own.contains(*p)).cloned().collect()
}

fn encode_set(values: &[String]) -> String {
    values.join(",")
}

fn decode_set(value: &str) -> HashSet<String> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect()
}

/// Local methods
impl Group {
    /// Ownership is authoritative through this column, never through roles:
    /// the owner row starts at the maximum role but may be edited later.
    pub fn is_owner(&self, account_id: i64) -> bool {
        self.owner_id == account_id
    }

    pub fn has_message_support(&self) -> bool {
        decode_set(&self.flags).contains(FLAG_MESSAGE_SUPPORT)
    }

    pub fn join_method(&self) -> JoinMethod {
        JoinMethod::from_str(&self.join_method).unwrap_or(JoinMethod::Free)
    }

    pub fn profile_value(&self) -> Value {
        serde_json::from_str(&self.profile).unwrap_or_else(|_| serde_json::json!({}))
    }

    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "group_id": self.id,
            "profile": self.profile_value(),
            "join_method": self.join_method,
            "free_members": self.free_members,
            "owner": self.owner_id,
            "name": self.name,
            "message_support": self.has_message_support(),
        })
    }
}

impl Participant {
    pub fn permission_set(&self) -> HashSet<String> {
        decode_set(&self.permissions)
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permission_set().contains(permission)
    }

    pub fn profile_value(&self) -> Value {
        serde_json::from_str(&self.profile).unwrap_or_else(|_| serde_json::json!({}))
    }

    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "account": self.account_id,
            "role": self.role,
            "permissions": self.permission_set().into_iter().collect::<Vec<_>>(),
            "profile": self.profile_value(),
        })
    }
}

/// Database methods: group lifecycle
impl Group {
    /// Creates the group with its owner already seated; returns the new
    /// group id. The owner occupies one slot, so a group for `max_members`
    /// starts with `max_members - 1` free seats.
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        gamespace_id: i64,
        profile: &Value,
        flags: &[String],
        join_method: JoinMethod,
        max_members: i64,
        owner_id: i64,
        participation_profile: &Value,
        name: Option<String>,
        conn: &DbConn,
    ) -> Result<i64, Error> {
        if max_members < MIN_MEMBERS_LIMIT {
            err!(bad_input, format!("Max members cannot be less than {MIN_MEMBERS_LIMIT}"));
        }
        if max_members > MAX_MEMBERS_LIMIT {
            err!(bad_input, format!("Max members cannot be more than {MAX_MEMBERS_LIMIT}"));
        }

        let profile = profile.to_string();
        let flags = encode_set(flags);
        let free_members = (max_members - 1) as i32;
        let participation_profile = participation_profile.to_string();

        db_run! { conn:
            mysql {
                conn.transaction::<i64, Error, _>(|conn| {
                    diesel::insert_into(groups::table)
                        .values((
                            groups::gamespace_id.eq(gamespace_id),
                            groups::profile.eq(&profile),
                            groups::flags.eq(&flags),
                            groups::join_method.eq(join_method.as_str()),
                            groups::free_members.eq(free_members),
                            groups::owner_id.eq(owner_id),
                            groups::name.eq(&name),
                        ))
                        .execute(conn)
                        .map_res("Error creating group")?;

                    let group_id = diesel::select(diesel::dsl::sql::<diesel::sql_types::Bigint>("LAST_INSERT_ID()"))
                        .get_result::<i64>(conn)
                        .map_res("Error reading new group id")?;

                    diesel::insert_into(group_participants::table)
                        .values((
                            group_participants::gamespace_id.eq(gamespace_id),
                            group_participants::group_id.eq(group_id),
                            group_participants::account_id.eq(owner_id),
                            group_participants::role.eq(MAXIMUM_ROLE),
                            group_participants::permissions.eq(""),
                            group_participants::profile.eq(&participation_profile),
                        ))
                        .execute(conn)
                        .map_res("Error seating group owner")?;

                    Ok(group_id)
                })
            }
            postgresql {
                conn.transaction::<i64, Error, _>(|conn| {
                    let group_id = diesel::insert_into(groups::table)
                        .values((
                            groups::gamespace_id.eq(gamespace_id),
                            groups::profile.eq(&profile),
                            groups::flags.eq(&flags),
                            groups::join_method.eq(join_method.as_str()),
                            groups::free_members.eq(free_members),
                            groups::owner_id.eq(owner_id),
                            groups::name.eq(&name),
                        ))
                        .returning(groups::id)
                        .get_result::<i64>(conn)
                        .map_res("Error creating group")?;

                    diesel::insert_into(group_participants::table)
                        .values((
                            group_participants::gamespace_id.eq(gamespace_id),
                            group_participants::group_id.eq(group_id),
                            group_participants::account_id.eq(owner_id),
                            group_participants::role.eq(MAXIMUM_ROLE),
                            group_participants::permissions.eq(""),
                            group_participants::profile.eq(&participation_profile),
                        ))
                        .execute(conn)
                        .map_res("Error seating group owner")?;

                    Ok(group_id)
                })
            }
        }
    }

    pub async fn find_by_id(gamespace_id: i64, group_id: i64, conn: &DbConn) -> Result<Self, Error> {
        db_run! { conn: {
            groups::table
                .filter(groups::gamespace_id.eq(gamespace_id))
                .filter(groups::id.eq(group_id))
                .first::<Self>(conn)
                .optional()
                .map_res("Error loading group")
        }}?
        .ok_or_else(|| Error::not_found("No such group"))
    }

    /// Deletes the group and its participations.
    pub async fn delete(gamespace_id: i64, group_id: i64, conn: &DbConn) -> Result<(), Error> {
        db_run! { conn:
            mysql, postgresql {
                conn.transaction::<(), Error, _>(|conn| {
                    diesel::delete(
                        group_participants::table
                            .filter(group_participants::gamespace_id.eq(gamespace_id))
                            .filter(group_participants::group_id.eq(group_id)),
                    )
                    .execute(conn)
                    .map_res("Error deleting group participants")?;

                    diesel::delete(
                        groups::table.filter(groups::gamespace_id.eq(gamespace_id)).filter(groups::id.eq(group_id)),
                    )
                    .execute(conn)
                    .map_res("Error deleting group")?;

                    Ok(())
                })
            }
        }
    }

    /// Owner-only edit of the group summary: join policy and searchable name.
    pub async fn update_summary(
        gamespace_id: i64,
        group_id: i64,
        account_id: i64,
        join_method: Option<JoinMethod>,
        name: Option<String>,
        conn: &DbConn,
    ) -> Result<(), Error> {
        let group = Self::find_by_id(gamespace_id, group_id, conn).await?;
        if !group.is_owner(account_id) {
            err!(not_a_member, "Only the group owner can edit the group summary");
        }

        db_run! { conn: {
            diesel::update(groups::table.filter(groups::gamespace_id.eq(gamespace_id)).filter(groups::id.eq(group_id)))
                .set((
                    groups::join_method.eq(join_method.unwrap_or_else(|| group.join_method()).as_str()),
                    groups::name.eq(name.or(group.name)),
                ))
                .execute(conn)
                .map_res("Error updating group summary")
                .map(|_| ())
        }}
    }

    /// Patches the group profile under the row lock; returns the profile as
    /// stored. With `merge` the patch is merged recursively (including the
    /// functional operators), otherwise it replaces the blob wholesale.
    pub async fn update_profile(
        gamespace_id: i64,
        group_id: i64,
        patch: &Value,
        merge: bool,
        conn: &DbConn,
    ) -> Result<Value, Error> {
        let patch = patch.clone();
        db_run! { conn:
            mysql, postgresql {
                conn.transaction::<Value, Error, _>(|conn| {
                    let prior = groups::table
                        .filter(groups::gamespace_id.eq(gamespace_id))
                        .filter(groups::id.eq(group_id))
                        .select(groups::profile)
                        .for_update()
                        .first::<String>(conn)
                        .optional()
                        .map_res("Error loading group profile")?
                        .ok_or_else(|| Error::not_found("No such group"))?;

                    let updated = if merge {
                        let prior: Value = serde_json::from_str(&prior).unwrap_or_else(|_| serde_json::json!({}));
                        crate::profile::merge(prior, &patch)?
                    } else {
                        patch.clone()
                    };

                    diesel::update(
                        groups::table.filter(groups::gamespace_id.eq(gamespace_id)).filter(groups::id.eq(group_id)),
                    )
                    .set(groups::profile.eq(updated.to_string()))
                    .execute(conn)
                    .map_res("Error updating group profile")?;

                    Ok(updated)
                })
            }
        }
    }

    pub async fn transfer_ownership(
        gamespace_id: i64,
        group_id: i64,
        account_id: i64,
        transfer_to: i64,
        conn: &DbConn,
    ) -> Result<(), Error> {
        let group = Self::find_by_id(gamespace_id, group_id, conn).await?;

        if !group.is_owner(account_id) {
            err!(conflict, "You are not an owner of that group");
        }

        if !Participant::exists(gamespace_id, group_id, transfer_to, conn).await? {
            err!(not_a_member, "The new owner is not participating in that group");
        }

        db_run! { conn: {
            diesel::update(groups::table.filter(groups::gamespace_id.eq(gamespace_id)).filter(groups::id.eq(group_id)))
                .set(groups::owner_id.eq(transfer_to))
                .execute(conn)
                .map_res("Error transferring ownership")
                .map(|_| ())
        }}
    }

    /// Prefix full-text search over group names, capped at 100 rows.
    pub async fn search(gamespace_id: i64, query: &str, conn: &DbConn) -> Result<Vec<Self>, Error> {
        let tokens = tokenize_search_query(query);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        db_run! { conn:
            mysql {
                let compiled = tokens.iter().map(|t| format!("+{t}*")).collect::<Vec<_>>().join(" ");
                groups::table
                    .filter(groups::gamespace_id.eq(gamespace_id))
                    .filter(
                        diesel::dsl::sql::<diesel::sql_types::Bool>("MATCH(`name`) AGAINST (")
                            .bind::<diesel::sql_types::Text, _>(compiled)
                            .sql(" IN BOOLEAN MODE)"),
                    )
                    .limit(100)
                    .load::<Self>(conn)
                    .map_res("Error searching groups")
            }
            postgresql {
                let compiled = tokens.iter().map(|t| format!("{t}:*")).collect::<Vec<_>>().join(" & ");
                groups::table
                    .filter(groups::gamespace_id.eq(gamespace_id))
                    .filter(
                        diesel::dsl::sql::<diesel::sql_types::Bool>("to_tsvector('simple', name) @@ to_tsquery('simple', ")
                            .bind::<diesel::sql_types::Text, _>(compiled)
                            .sql(")"),
                    )
                    .limit(100)
                    .load::<Self>(conn)
                    .map_res("Error searching groups")
            }
        }
    }
}

/// Database methods: membership
impl Group {
    /// Seats an account in the group. The capacity check and the decrement
    /// happen in one transaction under a lock on the group row, so two
    /// concurrent joins serialize and only one of them takes the last seat.
    pub(crate) async fn seat_participant(
        gamespace_id: i64,
        group_id: i64,
        account_id: i64,
        role: i32,
        permissions: &[String],
        profile: &Value,
        conn: &DbConn,
    ) -> Result<(), Error> {
        let permissions = encode_set(permissions);
        let profile = profile.to_string();

        db_run! { conn:
            mysql, postgresql {
                conn.transaction::<(), Error, _>(|conn| {
                    let free = groups::table
                        .filter(groups::gamespace_id.eq(gamespace_id))
                        .filter(groups::id.eq(group_id))
                        .select(groups::free_members)
                        .for_update()
                        .first::<i32>(conn)
                        .optional()
                        .map_res("Error locking group row")?
                        .ok_or_else(|| Error::not_found("No such group"))?;

                    if free <= 0 {
                        return Err(Error::gone("The group is full"));
                    }

                    diesel::insert_into(group_participants::table)
                        .values((
                            group_participants::gamespace_id.eq(gamespace_id),
                            group_participants::group_id.eq(group_id),
                            group_participants::account_id.eq(account_id),
                            group_participants::role.eq(role),
                            group_participants::permissions.eq(&permissions),
                            group_participants::profile.eq(&profile),
                        ))
                        .execute(conn)
                        .map_res("Error joining group")?;

                    diesel::update(
                        groups::table.filter(groups::gamespace_id.eq(gamespace_id)).filter(groups::id.eq(group_id)),
                    )
                    .set(groups::free_members.eq(free - 1))
                    .execute(conn)
                    .map_res("Error taking a group seat")?;

                    Ok(())
                })
            }
        }
        .map_err(|e| {
            if e.is_unique_violation() {
                Error::conflict(format!("Account '{account_id}' has already joined the group"))
            } else {
                e
            }
        })
    }

    /// Removes a participation and gives its seat back. Used by leave, kick
    /// and by the compensation path when the message-service join fails.
    pub(crate) async fn unseat_participant(
        gamespace_id: i64,
        group_id: i64,
        account_id: i64,
        conn: &DbConn,
    ) -> Result<(), Error> {
        db_run! { conn:
            mysql, postgresql {
                conn.transaction::<(), Error, _>(|conn| {
                    let deleted = diesel::delete(
                        group_participants::table
                            .filter(group_participants::gamespace_id.eq(gamespace_id))
                            .filter(group_participants::group_id.eq(group_id))
                            .filter(group_participants::account_id.eq(account_id)),
                    )
                    .execute(conn)
                    .map_res("Error leaving group")?;

                    if deleted > 0 {
                        diesel::update(
                            groups::table.filter(groups::gamespace_id.eq(gamespace_id)).filter(groups::id.eq(group_id)),
                        )
                        .set(groups::free_members.eq(groups::free_members + 1))
                        .execute(conn)
                        .map_res("Error returning a group seat")?;
                    }

                    Ok(())
                })
            }
        }
    }

    /// Free-join; the group must use the `free` policy.
    pub async fn join(
        gamespace_id: i64,
        group_id: i64,
        account_id: i64,
        participation_profile: &Value,
        conn: &DbConn,
    ) -> Result<Self, Error> {
        let group = Self::find_by_id(gamespace_id, group_id, conn).await?;

        if group.free_members <= 0 {
            err!(gone, "The group is full");
        }

        if group.join_method() != JoinMethod::Free {
            err!(conflict, format!("This group cannot be joined freely, it is: {}", group.join_method));
        }

        Self::seat_participant(gamespace_id, group_id, account_id, MINIMUM_ROLE, &[], participation_profile, conn)
            .await?;
        Ok(group)
    }

    /// Files a join request against an `approve` group; returns the key an
    /// approver has to consume.
    pub async fn join_request(
        gamespace_id: i64,
        group_id: i64,
        account_id: i64,
        participation_profile: &Value,
        conn: &DbConn,
    ) -> Result<(Self, String), Error> {
        let group = Self::find_by_id(gamespace_id, group_id, conn).await?;

        if group.free_members <= 0 {
            err!(gone, "The group is full");
        }

        if group.join_method() != JoinMethod::Approve {
            err!(conflict, format!("This group join cannot be requested, it is: {}", group.join_method));
        }

        if Participant::exists(gamespace_id, group_id, account_id, conn).await? {
            err!(not_a_member, "Player is already in this group");
        }

        let payload = serde_json::json!({ "participation_profile": participation_profile });
        let key =
            PendingRequest::create(gamespace_id, account_id, RequestKind::Group, group_id, &payload, conn).await?;

        Ok((group, key))
    }

    /// Invites an account into an `invite` group; returns the invitation key.
    /// Non-owner inviters need `send_invite`, can only grant permissions they
    /// hold, and cannot invite above their own role.
    pub async fn invite(
        gamespace_id: i64,
        group_id: i64,
        account_id: i64,
        invite_account_id: i64,
        role: i32,
        permissions: Vec<String>,
        conn: &DbConn,
    ) -> Result<(Self, String), Error> {
        let group = Self::find_by_id(gamespace_id, group_id, conn).await?;

        if group.free_members <= 0 {
            err!(gone, "The group is full");
        }

        if group.join_method() != JoinMethod::Invite {
            err!(conflict, format!("This group is not for invites, it is: {}", group.join_method));
        }

        let participation = Participant::find(gamespace_id, group_id, account_id, conn).await?;

        let permissions = if group.is_owner(account_id) {
            permissions
        } else {
            if !participation.has_permission(PERMISSION_SEND_INVITE) {
                err!(not_a_member, "You have no permission to send invites");
            }

            if role > participation.role {
                err!(conflict, "Invited role cannot be higher than your role");
            }

            restrict_permissions(&permissions, &participation.permission_set())
        };

        let payload = serde_json::json!({ "role": role, "permissions": permissions });
        let key = PendingRequest::create(gamespace_id, invite_account_id, RequestKind::Group, group_id, &payload, conn)
            .await?;

        Ok((group, key))
    }

    /// Redeems an invitation key and seats the invitee with the role and
    /// permissions recorded in the invitation.
    pub async fn accept_invitation(
        gamespace_id: i64,
        group_id: i64,
        account_id: i64,
        participation_profile: &Value,
        key: &str,
        conn: &DbConn,
    ) -> Result<Self, Error> {
        let group = Self::find_by_id(gamespace_id, group_id, conn).await?;

        if group.free_members <= 0 {
            err!(gone, "The group is full");
        }

        if group.join_method() != JoinMethod::Invite {
            err!(conflict, format!("This group is not for invites, it is: {}", group.join_method));
        }

        let request = match PendingRequest::acquire(gamespace_id, account_id, key, conn).await {
            Ok(request) => request,
            Err(e) if e.code() == 404 => return Err(Error::gone("No such invite request")),
            Err(e) => return Err(e),
        };
        Self::check_group_request(&request, group_id)?;

        let payload = request.payload_value();
        let role = payload["role"].as_i64().map(|r| r as i32).unwrap_or(MINIMUM_ROLE);
        let permissions: Vec<String> = payload["permissions"]
            .as_array()
            .map(|list| list.iter().filter_map(Value::as_str).map(String::from).collect())
            .unwrap_or_default();

        Self::seat_participant(gamespace_id, group_id, account_id, role, &permissions, participation_profile, conn)
            .await?;
        Ok(group)
    }

    /// Declines an invitation, consuming its key.
    pub async fn reject_invitation(
        gamespace_id: i64,
        group_id: i64,
        account_id: i64,
        key: &str,
        conn: &DbConn,
    ) -> Result<Self, Error> {
        let group = Self::find_by_id(gamespace_id, group_id, conn).await?;

        let request = match PendingRequest::acquire(gamespace_id, account_id, key, conn).await {
            Ok(request) => request,
            Err(e) if e.code() == 404 => return Err(Error::gone("No such invite request")),
            Err(e) => return Err(e),
        };
        Self::check_group_request(&request, group_id)?;

        Ok(group)
    }

    /// Approves a pending join request. Non-owner approvers need
    /// `request_approval`, can only grant permissions they hold, and cannot
    /// approve above their own role.
    #[allow(clippy::too_many_arguments)]
    pub async fn approve_join(
        gamespace_id: i64,
        group_id: i64,
        account_id: i64,
        approve_account_id: i64,
        role: i32,
        key: &str,
        permissions: Vec<String>,
        conn: &DbConn,
    ) -> Result<Self, Error> {
        let group = Self::find_by_id(gamespace_id, group_id, conn).await?;

        if group.free_members <= 0 {
            err!(gone, "The group is full");
        }

        if group.join_method() != JoinMethod::Approve {
            err!(conflict, format!("This group is not approve-like, it is: {}", group.join_method));
        }

        let permissions = if group.is_owner(account_id) {
            permissions
        } else {
            let participation = Participant::find(gamespace_id, group_id, account_id, conn).await?;

            if !participation.has_permission(PERMISSION_REQUEST_APPROVAL) {
                err!(not_a_member, "You have no permission to approve requests");
            }

            if role > participation.role {
                err!(conflict, "Approved role cannot be higher than your role");
            }

            restrict_permissions(&permissions, &participation.permission_set())
        };

        let request = PendingRequest::acquire(gamespace_id, approve_account_id, key, conn).await?;
        Self::check_group_request(&request, group_id)?;

        let participation_profile = request.payload_value()["participation_profile"].clone();
        let participation_profile = if participation_profile.is_object() {
            participation_profile
        } else {
            serde_json::json!({})
        };

        Self::seat_participant(
            gamespace_id,
            group_id,
            approve_account_id,
            role,
            &permissions,
            &participation_profile,
            conn,
        )
        .await?;
        Ok(group)
    }

    /// Declines a pending join request on behalf of the group.
    pub async fn reject_join(
        gamespace_id: i64,
        group_id: i64,
        account_id: i64,
        reject_account_id: i64,
        key: &str,
        conn: &DbConn,
    ) -> Result<Self, Error> {
        let group = Self::find_by_id(gamespace_id, group_id, conn).await?;

        if !group.is_owner(account_id) {
            let participation = Participant::find(gamespace_id, group_id, account_id, conn).await?;
            if !participation.has_permission(PERMISSION_REQUEST_APPROVAL) {
                err!(not_a_member, "You have no permission to reject requests");
            }
        }

        let request = PendingRequest::acquire(gamespace_id, reject_account_id, key, conn).await?;
        Self::check_group_request(&request, group_id)?;

        Ok(group)
    }

    fn check_group_request(request: &PendingRequest, group_id: i64) -> Result<(), Error> {
        if request.kind() != Some(RequestKind::Group) {
            err!(bad_input, "Bad request object");
        }
        if request.object_id != group_id {
            err!(not_a_member, "This key is not for that group");
        }
        Ok(())
    }

    /// A participant walks out. Owners must transfer ownership first.
    pub async fn leave(gamespace_id: i64, group_id: i64, account_id: i64, conn: &DbConn) -> Result<Self, Error> {
        let group = Self::find_by_id(gamespace_id, group_id, conn).await?;

        if group.is_owner(account_id) {
            err!(conflict, "Group owner cannot leave a group, transfer ownership first");
        }

        Self::unseat_participant(gamespace_id, group_id, account_id, conn).await?;
        Ok(group)
    }

    /// Throws a participant out. The kicker is the owner, or holds `kick`
    /// and outranks the target. The owner can never be kicked.
    pub async fn kick(
        gamespace_id: i64,
        group_id: i64,
        kicker_account_id: i64,
        account_id: i64,
        conn: &DbConn,
    ) -> Result<Self, Error> {
        let group = Self::find_by_id(gamespace_id, group_id, conn).await?;

        if group.is_owner(account_id) {
            err!(not_a_member, "You cannot kick an owner");
        }

        if !group.is_owner(kicker_account_id) {
            let participants =
                Participant::find_all_of(gamespace_id, group_id, &[kicker_account_id, account_id], conn).await?;

            let kicker = &participants[&kicker_account_id];
            let target = &participants[&account_id];

            if !kicker.has_permission(PERMISSION_KICK) {
                err!(not_a_member, "You have no permission to kick");
            }

            if target.role >= kicker.role {
                err!(not_a_member, "You cannot kick a player with a higher role");
            }
        }

        Self::unseat_participant(gamespace_id, group_id, account_id, conn).await?;
        Ok(group)
    }
}

/// Database methods: participations
impl Participant {
    pub async fn find(gamespace_id: i64, group_id: i64, account_id: i64, conn: &DbConn) -> Result<Self, Error> {
        db_run! { conn: {
            group_participants::table
                .filter(group_participants::gamespace_id.eq(gamespace_id))
                .filter(group_participants::group_id.eq(group_id))
                .filter(group_participants::account_id.eq(account_id))
                .first::<Self>(conn)
                .optional()
                .map_res("Error loading participation")
        }}?
        .ok_or_else(|| Error::not_found("No such participation"))
    }

    pub async fn exists(gamespace_id: i64, group_id: i64, account_id: i64, conn: &DbConn) -> Result<bool, Error> {
        db_run! { conn: {
            group_participants::table
                .filter(group_participants::gamespace_id.eq(gamespace_id))
                .filter(group_participants::group_id.eq(group_id))
                .filter(group_participants::account_id.eq(account_id))
                .count()
                .get_result::<i64>(conn)
                .map_res("Error checking participation")
                .map(|count| count > 0)
        }}
    }

    pub async fn list_by_group(gamespace_id: i64, group_id: i64, conn: &DbConn) -> Result<Vec<Self>, Error> {
        db_run! { conn: {
            group_participants::table
                .filter(group_participants::gamespace_id.eq(gamespace_id))
                .filter(group_participants::group_id.eq(group_id))
                .load::<Self>(conn)
                .map_res("Error listing group participants")
        }}
    }

    /// Loads the given subset of participants, keyed by account. Missing
    /// accounts are simply absent.
    pub async fn find_by_accounts(
        gamespace_id: i64,
        group_id: i64,
        account_ids: &[i64],
        conn: &DbConn,
    ) -> Result<HashMap<i64, Self>, Error> {
        if account_ids.is_empty() {
            err!(bad_input, "Empty account list");
        }

        let account_ids = account_ids.to_vec();
        let rows: Vec<Self> = db_run! { conn: {
            group_participants::table
                .filter(group_participants::gamespace_id.eq(gamespace_id))
                .filter(group_participants::group_id.eq(group_id))
                .filter(group_participants::account_id.eq_any(&account_ids))
                .load::<Self>(conn)
                .map_res("Error loading participants")
        }}?;

        Ok(rows.into_iter().map(|p| (p.account_id, p)).collect())
    }

    /// Like `find_by_accounts`, but every requested account must be present.
    pub async fn find_all_of(
        gamespace_id: i64,
        group_id: i64,
        account_ids: &[i64],
        conn: &DbConn,
    ) -> Result<HashMap<i64, Self>, Error> {
        let participants = Self::find_by_accounts(gamespace_id, group_id, account_ids, conn).await?;
        if participants.len() < account_ids.len() {
            err!(not_found, "No such participation");
        }
        Ok(participants)
    }

    /// Whether account `a` outranks account `b` in the group. Accounts
    /// without a participation never outrank anyone.
    pub async fn role_higher(
        gamespace_id: i64,
        group_id: i64,
        account_a: i64,
        account_b: i64,
        conn: &DbConn,
    ) -> Result<bool, Error> {
        let participants = Self::find_by_accounts(gamespace_id, group_id, &[account_a, account_b], conn).await?;

        match (participants.get(&account_a), participants.get(&account_b)) {
            (Some(a), Some(b)) => Ok(a.role > b.role),
            _ => Ok(false),
        }
    }

    /// Patches a participation profile under the row lock; see
    /// `Group::update_profile` for the merge semantics.
    pub async fn update_profile(
        gamespace_id: i64,
        group_id: i64,
        account_id: i64,
        patch: &Value,
        merge: bool,
        conn: &DbConn,
    ) -> Result<Value, Error> {
        let patch = patch.clone();
        db_run! { conn:
            mysql, postgresql {
                conn.transaction::<Value, Error, _>(|conn| {
                    let prior = group_participants::table
                        .filter(group_participants::gamespace_id.eq(gamespace_id))
                        .filter(group_participants::group_id.eq(group_id))
                        .filter(group_participants::account_id.eq(account_id))
                        .select(group_participants::profile)
                        .for_update()
                        .first::<String>(conn)
                        .optional()
                        .map_res("Error loading participation profile")?
                        .ok_or_else(|| Error::not_found("No such participation"))?;

                    let updated = if merge {
                        let prior: Value = serde_json::from_str(&prior).unwrap_or_else(|_| serde_json::json!({}));
                        crate::profile::merge(prior, &patch)?
                    } else {
                        patch.clone()
                    };

                    diesel::update(
                        group_participants::table
                            .filter(group_participants::gamespace_id.eq(gamespace_id))
                            .filter(group_participants::group_id.eq(group_id))
                            .filter(group_participants::account_id.eq(account_id)),
                    )
                    .set(group_participants::profile.eq(updated.to_string()))
                    .execute(conn)
                    .map_res("Error updating participation profile")?;

                    Ok(updated)
                })
            }
        }
    }

    /// The role/permission algebra. Owners may set anything; a participant
    /// may lower (never raise) its own role; editing someone else requires
    /// outranking them, staying below your own role, and only granting
    /// permissions you hold.
    pub async fn update_role_and_permissions(
        gamespace_id: i64,
        group_id: i64,
        updater_account_id: i64,
        account_id: i64,
        role: i32,
        permissions: Vec<String>,
        conn: &DbConn,
    ) -> Result<(), Error> {
        let group = Group::find_by_id(gamespace_id, group_id, conn).await?;

        if group.is_owner(updater_account_id) {
            return Self::set_role_and_permissions(
                gamespace_id,
                group_id,
                account_id,
                role,
                permissions,
                RoleCheck::None,
                conn,
            )
            .await;
        }

        if updater_account_id == account_id {
            let own = Self::find(gamespace_id, group_id, updater_account_id, conn).await?;
            let permissions = restrict_permissions(&permissions, &own.permission_set());

            // you can only downgrade your own role, never upgrade it
            return Self::set_role_and_permissions(
                gamespace_id,
                group_id,
                account_id,
                role,
                permissions,
                RoleCheck::OldAtLeast(role),
                conn,
            )
            .await;
        }

        let updater = Self::find(gamespace_id, group_id, updater_account_id, conn).await?;
        let permissions = restrict_permissions(&permissions, &updater.permission_set());

        if role >= updater.role {
            err!(not_a_member, "You cannot set a role higher than or equal to yours");
        }

        // the target's current role must also be below the updater's
        Self::set_role_and_permissions(
            gamespace_id,
            group_id,
            account_id,
            role,
            permissions,
            RoleCheck::OldBelow(updater.role),
            conn,
        )
        .await
    }

    async fn set_role_and_permissions(
        gamespace_id: i64,
        group_id: i64,
        account_id: i64,
        role: i32,
        permissions: Vec<String>,
        role_check: RoleCheck,
        conn: &DbConn,
    ) -> Result<(), Error> {
        let permissions = encode_set(&permissions);
        db_run! { conn:
            mysql, postgresql {
                conn.transaction::<(), Error, _>(|conn| {
                    let old_role = group_participants::table
                        .filter(group_participants::gamespace_id.eq(gamespace_id))
                        .filter(group_participants::group_id.eq(group_id))
                        .filter(group_participants::account_id.eq(account_id))
                        .select(group_participants::role)
                        .for_update()
                        .first::<i32>(conn)
                        .optional()
                        .map_res("Error locking participation row")?
                        .ok_or_else(|| Error::not_found("No such participation"))?;

                    if !role_check.allows(old_role) {
                        return Err(Error::conflict("Cannot update role"));
                    }

                    diesel::update(
                        group_participants::table
                            .filter(group_participants::gamespace_id.eq(gamespace_id))
                            .filter(group_participants::group_id.eq(group_id))
                            .filter(group_participants::account_id.eq(account_id)),
                    )
                    .set((
                        group_participants::role.eq(role),
                        group_participants::permissions.eq(&permissions),
                    ))
                    .execute(conn)
                    .map_res("Error updating role")?;

                    Ok(())
                })
            }
        }
    }
}

/// Constraint on the target's current role, checked under the row lock right
/// before a role update applies.
#[derive(Clone, Copy)]
enum RoleCheck {
    /// Owner edits: anything goes.
    None,
    /// Self edits: the old role must not be below the new one.
    OldAtLeast(i32),
    /// Edits of others: the old role must be below the updater's.
    OldBelow(i32),
}

impl RoleCheck {
    fn allows(self, old_role: i32) -> bool {
        match self {
            RoleCheck::None => true,
            RoleCheck::OldAtLeast(new_role) => old_role >= new_role,
            RoleCheck::OldBelow(updater_role) => updater_role > old_role,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participant(role: i32, permissions: &str) -> Participant {
        Participant {
            gamespace_id: 1,
            group_id: 1,
            account_id: 2,
            role,
            permissions: permissions.into(),
            profile: "{}".into(),
        }
    }

    #[test]
    fn join_method_round_trips() {
        for method in [JoinMethod::Free, JoinMethod::Invite, JoinMethod::Approve] {
            assert_eq!(JoinMethod::from_str(method.as_str()), Some(method));
        }
        assert_eq!(JoinMethod::from_str("open"), None);
    }

    #[test]
    fn flags_detect_message_support() {
        let group = Group {
            id: 1,
            gamespace_id: 1,
            profile: "{}".into(),
            flags: "messages".into(),
            join_method: "free".into(),
            free_members: 10,
            owner_id: 5,
            name: None,
        };
        assert!(group.has_message_support());
        assert!(group.is_owner(5));
        assert!(!group.is_owner(6));

        let plain = Group {
            flags: "".into(),
            ..group
        };
        assert!(!plain.has_message_support());
    }

    #[test]
    fn permissions_parse_as_a_set() {
        let p = participant(500, "kick, send_invite,,kick");
        assert!(p.has_permission("kick"));
        assert!(p.has_permission("send_invite"));
        assert!(!p.has_permission("request_approval"));
        assert_eq!(p.permission_set().len(), 2);
    }

    #[test]
    fn granted_permissions_are_restricted_to_own() {
        let own: HashSet<String> = ["cat", "dog", "cow"].iter().map(|s| s.to_string()).collect();
        let requested: Vec<String> = ["cow", "cat", "fox"].iter().map(|s| s.to_string()).collect();
        let mut granted = restrict_permissions(&requested, &own);
        granted.sort();
        assert_eq!(granted, vec!["cat", "cow"]);
    }

    #[test]
    fn role_checks_match_the_algebra() {
        // self edits may keep or lower the role
        assert!(RoleCheck::OldAtLeast(500).allows(1000));
        assert!(RoleCheck::OldAtLeast(500).allows(500));
        assert!(!RoleCheck::OldAtLeast(1000).allows(500));

        // edits of others require outranking the target
        assert!(RoleCheck::OldBelow(200).allows(100));
        assert!(!RoleCheck::OldBelow(200).allows(200));
        assert!(!RoleCheck::OldBelow(200).allows(1000));

        // owners skip the check
        assert!(RoleCheck::None.allows(i32::MAX));
    }

    #[test]
    fn malformed_profiles_degrade_to_empty_objects() {
        let p = participant(0, "");
        assert_eq!(p.profile_value(), serde_json::json!({}));
    }
}
