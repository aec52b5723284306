use std::process::exit;

use once_cell::sync::Lazy;

use crate::error::Error;
use crate::util::{get_env, get_env_str_value};

pub static CONFIG: Lazy<Config> = Lazy::new(|| {
    Config::load().unwrap_or_else(|e| {
        println!("Error loading config:\n  {e:?}\n");
        exit(12)
    })
});

macro_rules! make_config {
    ( $( $(#[doc = $doc:literal])* $name:ident : $ty:ty, $none_action:ident, $default:expr; )+ ) => {
        pub struct Config {
            $( $name: $ty, )+
        }

        impl Config {
            fn load() -> Result<Self, Error> {
                dotenvy::dotenv().ok();

                Ok(Self {
                    $( $name: make_config!(@get $name: $ty, $none_action, $default), )+
                })
            }

            $(
                $(#[doc = $doc])*
                pub fn $name(&self) -> $ty {
                    self.$name.clone()
                }
            )+
        }
    };

    ( @get $name:ident: $ty:ty, required, $default:expr ) => {
        match get_env(&stringify!($name).to_uppercase()) {
            Some(value) => value,
            None => {
                return Err(Error::internal(format!(
                    "`{}` is not set; the service cannot start without it",
                    stringify!($name).to_uppercase()
                )))
            }
        }
    };
    ( @get $name:ident: $ty:ty, option, $default:expr ) => {
        get_env_str_value(&stringify!($name).to_uppercase())
    };
    ( @get $name:ident: $ty:ty, def, $default:expr ) => {
        get_env(&stringify!($name).to_uppercase()).unwrap_or_else(|| $default.into())
    };
}

make_config! {
    /// Database URL of the relational store (mysql:// or postgresql://)
    database_url:             String, required, ();
    /// Database connection pool size
    database_max_conns:       u32,    def,      10u32;
    /// Timeout in seconds when acquiring a database connection
    database_timeout:         u64,    def,      30u64;
    /// Seconds an idle pooled connection is kept open
    database_idle_timeout:    u64,    def,      600u64;
    /// Statements executed on every fresh pooled connection
    database_conn_init:       String, def,      "";

    /// Shared secret validating platform access tokens (HS256)
    token_secret:             String, required, ();

    /// Base URL of the sibling message service
    message_service_url:      String, def,      "http://localhost:9507";
    /// Base URL of the sibling profile service
    profile_service_url:      String, def,      "http://localhost:9502";
    /// Base URL of the login service (per-gamespace provider keys)
    login_service_url:        String, def,      "http://localhost:9500";
    /// Bearer token presented to sibling services, if they require one
    service_token:            Option<String>, option, ();

    /// Cron schedule of the pending-request expiry sweep
    request_purge_schedule:   String, def,      "0 30 * * * *";
    /// Days before a pending request (invite, join request, friend request) expires
    request_ttl_days:         i64,    def,      7i64;
    /// How often the job scheduler thread polls for work, in milliseconds
    job_poll_interval_ms:     u64,    def,      30_000u64;

    /// Log level (trace, debug, info, warn, error)
    log_level:                String, def,      "info";
    /// Optional log file path; stdout when unset
    log_file:                 Option<String>, option, ();
}

#[cfg(test)]
mod tests {
    // Config is read from the process environment, which is shared between
    // test threads; only exercise the pure parsing helpers here.
    use crate::util::try_parse_string;

    #[test]
    fn numeric_defaults_parse() {
        assert_eq!(try_parse_string::<_, u32>(Some("10")), Some(10));
        assert_eq!(try_parse_string::<_, i64>(Some("7")), Some(7));
    }
}
