mod connection;
mod group;
mod request;
mod token;
mod unique_name;

pub use self::connection::Connection;
pub use self::group::{Group, JoinMethod, Participant};
pub use self::request::{PendingRequest, RequestKind};
pub use self::token::CredentialToken;
pub use self::unique_name::UniqueName;

pub use self::group::{
    DEFAULT_MAX_MEMBERS, FLAG_MESSAGE_SUPPORT, MAXIMUM_ROLE, MAX_MEMBERS_LIMIT, MINIMUM_ROLE, MIN_MEMBERS_LIMIT,
    PERMISSION_KICK, PERMISSION_REQUEST_APPROVAL, PERMISSION_SEND_INVITE,
};
