//
// Access token handling
//
// The platform's login service issues the tokens; this service only
// validates the signature and consumes the verified identity: the calling
// account, its gamespace, and the granted scope set.
//
use std::collections::HashSet;

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::CONFIG;

pub const SCOPE_SOCIAL: &str = "social";
pub const SCOPE_GROUP: &str = "group";
pub const SCOPE_GROUP_CREATE: &str = "group_create";
pub const SCOPE_GROUP_WRITE: &str = "group_write";
pub const SCOPE_CONNECTION_APPROVAL: &str = "connection_approval";
pub const SCOPE_MESSAGE_AUTHORITATIVE: &str = "message_authoritative";
pub const SCOPE_SERVICE_INTERNAL: &str = "service_internal";

#[derive(Debug, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    // expiration, as seconds since the epoch
    pub exp: i64,
    // the authenticated platform account
    pub account: i64,
    // the tenant this token is valid in
    pub gamespace: i64,
    // space separated scope set
    #[serde(default)]
    pub scopes: String,
}

pub fn decode_access_token(token: &str) -> Result<AccessTokenClaims, Error> {
    decode_access_token_with(token, CONFIG.token_secret().as_bytes())
}

fn decode_access_token_with(token: &str, secret: &[u8]) -> Result<AccessTokenClaims, Error> {
    let validation = Validation::new(Algorithm::HS256);

    decode::<AccessTokenClaims>(token, &DecodingKey::from_secret(secret), &validation)
        .map(|data| data.claims)
        .map_err(|e| Error::bad_input(format!("Invalid access token: {e}")))
}

//
// Request guards
//
use rocket::request::{FromRequest, Outcome, Request};

pub struct Headers {
    pub account_id: i64,
    pub gamespace_id: i64,
    scopes: HashSet<String>,
}

impl Headers {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }

    pub fn require_scope(&self, scope: &str) -> Result<(), Error> {
        if self.has_scope(scope) {
            Ok(())
        } else {
            Err(Error::forbidden(format!("Missing scope: {scope}")))
        }
    }

    /// Whether notifications sent on behalf of this caller may be flagged as
    /// trusted towards the message service.
    pub fn authoritative(&self) -> bool {
        self.has_scope(SCOPE_MESSAGE_AUTHORITATIVE)
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Headers {
    type Error = &'static str;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(auth_header) = request.headers().get_one("Authorization") else {
            err_handler!("No authorization header");
        };

        let Some(token) = auth_header.strip_prefix("Bearer ") else {
            err_handler!("Malformed authorization header");
        };

        let claims = match decode_access_token(token) {
            Ok(claims) => claims,
            Err(_) => err_handler!("Invalid access token"),
        };

        Outcome::Success(Headers {
            account_id: claims.account,
            gamespace_id: claims.gamespace,
            scopes: claims.scopes.split_whitespace().map(String::from).collect(),
        })
    }
}

macro_rules! make_scope_guard {
    ($name:ident, $scope:expr, $err:literal) => {
        pub struct $name(pub Headers);

        #[rocket::async_trait]
        impl<'r> FromRequest<'r> for $name {
            type Error = &'static str;

            async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
                match request.guard::<Headers>().await {
                    Outcome::Forward(f) => Outcome::Forward(f),
                    Outcome::Error(e) => Outcome::Error(e),
                    Outcome::Success(headers) => {
                        if headers.has_scope($scope) {
                            Outcome::Success($name(headers))
                        } else {
                            err_handler!($err)
                        }
                    }
                }
            }
        }
    };
}

make_scope_guard!(SocialHeaders, SCOPE_SOCIAL, "The `social` scope is required");
make_scope_guard!(GroupHeaders, SCOPE_GROUP, "The `group` scope is required");
make_scope_guard!(GroupCreateHeaders, SCOPE_GROUP_CREATE, "The `group_create` scope is required");
make_scope_guard!(InternalHeaders, SCOPE_SERVICE_INTERNAL, "The `service_internal` scope is required");

/// Group summary and profile writes additionally need `group_write`.
pub struct GroupWriteHeaders(pub Headers);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for GroupWriteHeaders {
    type Error = &'static str;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match request.guard::<GroupHeaders>().await {
            Outcome::Forward(f) => Outcome::Forward(f),
            Outcome::Error(e) => Outcome::Error(e),
            Outcome::Success(GroupHeaders(headers)) => {
                if headers.has_scope(SCOPE_GROUP_WRITE) {
                    Outcome::Success(GroupWriteHeaders(headers))
                } else {
                    err_handler!("The `group_write` scope is required")
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &[u8] = b"test-secret";

    fn make_token(scopes: &str, exp: i64) -> String {
        let claims = AccessTokenClaims {
            exp,
            account: 42,
            gamespace: 7,
            scopes: scopes.to_string(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(SECRET)).unwrap()
    }

    fn far_future() -> i64 {
        chrono::Utc::now().timestamp() + 3600
    }

    #[test]
    fn valid_tokens_decode() {
        let token = make_token("social group", far_future());
        let claims = decode_access_token_with(&token, SECRET).unwrap();
        assert_eq!(claims.account, 42);
        assert_eq!(claims.gamespace, 7);
        assert_eq!(claims.scopes, "social group");
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let token = make_token("social", chrono::Utc::now().timestamp() - 3600);
        assert!(decode_access_token_with(&token, SECRET).is_err());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = make_token("social", far_future());
        assert!(decode_access_token_with(&token, b"other-secret").is_err());
    }

    #[test]
    fn scope_checks() {
        let headers = Headers {
            account_id: 1,
            gamespace_id: 1,
            scopes: "social message_authoritative".split_whitespace().map(String::from).collect(),
        };
        assert!(headers.has_scope(SCOPE_SOCIAL));
        assert!(!headers.has_scope(SCOPE_GROUP));
        assert!(headers.authoritative());
        assert!(headers.require_scope(SCOPE_SOCIAL).is_ok());
        assert_eq!(headers.require_scope(SCOPE_GROUP).unwrap_err().code(), 403);
    }
}
