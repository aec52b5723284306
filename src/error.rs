//
// Error generator macro
//
use std::error::Error as StdError;

macro_rules! make_error {
    ( $( $name:ident ( $ty:ty ): $code:literal, $show_cause:expr ),+ $(,)? ) => {
        #[derive(Debug)]
        pub enum Error {
            $($name( $ty, String )),+
        }

        impl Error {
            /// HTTP-style code carried by every variant. The API edge maps it
            /// to a response status verbatim.
            pub fn code(&self) -> u16 {
                match self {$(
                    Error::$name(..) => $code,
                )+}
            }

            pub fn message(&self) -> &str {
                match self {$(
                    Error::$name(_, msg) => msg,
                )+}
            }

            pub fn with_msg<M: Into<String>>(self, msg: M) -> Self {
                match self {$(
                    Error::$name(e, _) => Error::$name(e, msg.into()),
                )+}
            }

            pub fn log(&self) {
                match self {$(
                    Error::$name(e, msg) => {
                        if self.code() >= 500 {
                            error!("{msg}");
                        } else {
                            debug!("{msg}");
                        }
                        if $show_cause {
                            error!("[CAUSE] {e:#?}");
                        }
                    },
                )+}
            }
        }

        impl std::fmt::Display for Error {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}: {}", self.code(), self.message())
            }
        }

        impl StdError for Error {}
    };
}

use diesel::result::{DatabaseErrorKind, Error as DieselError, QueryResult};
use serde_json::{Error as SerdeError, Value};

// Each variant carries two elements: an inner payload kept for logging (the
// unit for purely domain-level errors) and the message rendered to the
// caller. The first expression after the variant is the HTTP-style code, the
// second tells whether the inner payload is worth logging as a cause.
make_error! {
    BadInput(()):              400, false,
    // Social provider demands re-authentication; the payload identifies the
    // credential so the client knows which account to refresh.
    Unauthorized(Value):       401, false,
    Forbidden(()):             403, false,
    NotFound(()):              404, false,
    NotAMember(()):            406, false,
    Conflict(()):              409, false,
    Gone(()):                  410, false,
    Internal(()):              500, false,
    Db(DieselError):           500, true,
    Serde(SerdeError):         500, true,
    Http(reqwest::Error):      500, true,
}

impl Error {
    pub fn bad_input<M: Into<String>>(msg: M) -> Self {
        Error::BadInput((), msg.into())
    }

    pub fn reauth_required(credential: &str, username: Option<&str>) -> Self {
        let payload = serde_json::json!({
            "credential": credential,
            "username": username,
        });
        Error::Unauthorized(payload, format!("{credential} authentication required"))
    }

    pub fn forbidden<M: Into<String>>(msg: M) -> Self {
        Error::Forbidden((), msg.into())
    }

    pub fn not_found<M: Into<String>>(msg: M) -> Self {
        Error::NotFound((), msg.into())
    }

    pub fn not_a_member<M: Into<String>>(msg: M) -> Self {
        Error::NotAMember((), msg.into())
    }

    pub fn conflict<M: Into<String>>(msg: M) -> Self {
        Error::Conflict((), msg.into())
    }

    pub fn gone<M: Into<String>>(msg: M) -> Self {
        Error::Gone((), msg.into())
    }

    pub fn internal<M: Into<String>>(msg: M) -> Self {
        Error::Internal((), msg.into())
    }

    /// Rebuilds a domain error from its code, for places that only hold a
    /// shared reference (e.g. cached results).
    pub fn from_code(code: u16, msg: String) -> Self {
        match code {
            400 => Error::BadInput((), msg),
            401 => Error::Unauthorized(serde_json::json!({}), msg),
            403 => Error::Forbidden((), msg),
            404 => Error::NotFound((), msg),
            406 => Error::NotAMember((), msg),
            409 => Error::Conflict((), msg),
            410 => Error::Gone((), msg),
            _ => Error::Internal((), msg),
        }
    }

    /// True when the underlying store rejected a duplicate row. The engines
    /// turn these into Conflict at the call site, where the message can name
    /// the offending entity.
    pub fn is_unique_violation(&self) -> bool {
        matches!(
            self,
            Error::Db(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _), _)
        )
    }
}

impl From<DieselError> for Error {
    fn from(err: DieselError) -> Self {
        let msg = err.to_string();
        Error::Db(err, msg)
    }
}

impl From<SerdeError> for Error {
    fn from(err: SerdeError) -> Self {
        let msg = err.to_string();
        Error::Serde(err, msg)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let msg = err.to_string();
        Error::Http(err, msg)
    }
}

pub trait MapResult<S> {
    fn map_res(self, msg: &str) -> Result<S, Error>;
}

impl<S> MapResult<S> for QueryResult<S> {
    fn map_res(self, msg: &str) -> Result<S, Error> {
        self.map_err(|e| {
            let full_msg = format!("{msg}: {e}");
            Error::from(e).with_msg(full_msg)
        })
    }
}

//
// Rocket responder impl
//
use std::io::Cursor;

use rocket::http::{ContentType, Status};
use rocket::request::Request;
use rocket::response::{self, Responder, Response};

impl<'r> Responder<'r, 'static> for Error {
    fn respond_to(self, _: &Request<'_>) -> response::Result<'static> {
        self.log();

        let body = match &self {
            Error::Unauthorized(payload, _) => payload.to_string(),
            _ => serde_json::json!({ "error": self.message() }).to_string(),
        };

        Response::build()
            .status(Status::from_code(self.code()).unwrap_or(Status::InternalServerError))
            .header(ContentType::JSON)
            .sized_body(Some(body.len()), Cursor::new(body))
            .ok()
    }
}

///
/// Error return macros
///
#[macro_export]
macro_rules! err {
    ($msg:expr) => {{
        return Err($crate::error::Error::internal($msg));
    }};
    ($kind:ident, $msg:expr) => {{
        return Err($crate::error::Error::$kind($msg));
    }};
}

#[macro_export]
macro_rules! err_handler {
    ($expr:expr) => {{
        log::error!(target: "auth", "Unauthorized Error: {}", $expr);
        return ::rocket::request::Outcome::Error((::rocket::http::Status::Unauthorized, $expr));
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_the_taxonomy() {
        assert_eq!(Error::bad_input("x").code(), 400);
        assert_eq!(Error::reauth_required("google", None).code(), 401);
        assert_eq!(Error::forbidden("x").code(), 403);
        assert_eq!(Error::not_found("x").code(), 404);
        assert_eq!(Error::not_a_member("x").code(), 406);
        assert_eq!(Error::conflict("x").code(), 409);
        assert_eq!(Error::gone("x").code(), 410);
        assert_eq!(Error::internal("x").code(), 500);
    }

    #[test]
    fn store_errors_map_to_internal() {
        let err: Error = DieselError::NotFound.into();
        assert_eq!(err.code(), 500);
        assert!(!err.is_unique_violation());
    }

    #[test]
    fn duplicate_rows_are_detected() {
        let inner = DieselError::DatabaseError(
            DatabaseErrorKind::UniqueViolation,
            Box::new("Duplicate entry".to_string()),
        );
        let err: Error = inner.into();
        assert!(err.is_unique_violation());
    }

    #[test]
    fn reauth_payload_names_the_credential() {
        let err = Error::reauth_required("vk", Some("durov"));
        match err {
            Error::Unauthorized(payload, _) => {
                assert_eq!(payload["credential"], "vk");
                assert_eq!(payload["username"], "durov");
            }
            _ => panic!("expected Unauthorized"),
        }
    }
}
