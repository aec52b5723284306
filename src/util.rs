//
// Small helpers shared across the service
//
use std::{env, str::FromStr, thread::sleep, time::Duration};

use chrono::NaiveDateTime;

pub fn get_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn format_date(dt: &NaiveDateTime) -> String {
    dt.and_utc().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

pub fn try_parse_string<S, T>(string: Option<S>) -> Option<T>
where
    S: AsRef<str>,
    T: FromStr,
{
    if let Some(Ok(value)) = string.map(|s| s.as_ref().parse::<T>()) {
        Some(value)
    } else {
        None
    }
}

pub fn get_env_str_value(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

pub fn get_env<V>(key: &str) -> Option<V>
where
    V: FromStr,
{
    try_parse_string(get_env_str_value(key))
}

/// Splits a comma separated value into its non-empty parts. Used for the
/// `profile_fields` style query arguments and for set-valued columns.
pub fn parse_comma_list(value: &str) -> Vec<String> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect()
}

/// Hex encoded SHA-256 over the parts, used to key TTL caches on variable
/// argument lists without unbounded key growth.
pub fn sha256_hex<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut ctx = ring::digest::Context::new(&ring::digest::SHA256);
    for part in parts {
        ctx.update(part.as_ref().as_bytes());
        ctx.update(b",");
    }
    data_encoding::HEXLOWER.encode(ctx.finish().as_ref())
}

/// Breaks a free-form search query into the tokens fed to the full-text
/// prefix search: whitespace-split, stripped of non-word characters, tokens
/// of length <= 2 discarded, capped at 32 tokens.
pub fn tokenize_search_query(query: &str) -> Vec<String> {
    static WORDS: Lazy<regex::Regex> = Lazy::new(|| regex::Regex::new(r"\S+").unwrap());

    WORDS
        .find_iter(query)
        .map(|word| word.as_str().chars().filter(|c| c.is_alphanumeric() || *c == '_').collect::<String>())
        .filter(|token| token.chars().count() > 2)
        .take(32)
        .collect()
}

pub fn retry_db<F, T, E>(mut func: F, max_tries: u32) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    E: std::error::Error,
{
    let mut tries = 0;

    loop {
        match func() {
            ok @ Ok(_) => return ok,
            Err(e) => {
                tries += 1;

                if tries >= max_tries && max_tries > 0 {
                    return Err(e);
                }

                warn!("Can't connect to database, retrying: {e:?}");

                sleep(Duration::from_millis(1_000));
            }
        }
    }
}

use once_cell::sync::Lazy;
use reqwest::{header, Client, ClientBuilder};

pub fn get_reqwest_client() -> &'static Client {
    static INSTANCE: Lazy<Client> =
        Lazy::new(|| get_reqwest_client_builder().build().expect("Failed to build reqwest client"));
    &INSTANCE
}

pub fn get_reqwest_client_builder() -> ClientBuilder {
    let mut headers = header::HeaderMap::new();
    headers.insert(header::USER_AGENT, header::HeaderValue::from_static("Clanhall"));
    Client::builder().default_headers(headers).timeout(Duration::from_secs(10))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comma_lists_drop_empty_parts() {
        assert_eq!(parse_comma_list("a,b , ,c,"), vec!["a", "b", "c"]);
        assert!(parse_comma_list("").is_empty());
        assert!(parse_comma_list(" , ,").is_empty());
    }

    #[test]
    fn sha256_hex_is_stable_and_order_sensitive() {
        let a = sha256_hex(["name", "level"]);
        let b = sha256_hex(["name", "level"]);
        let c = sha256_hex(["level", "name"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn search_tokens_drop_short_words() {
        assert_eq!(tokenize_search_query("quick brown fox"), vec!["quick", "brown", "fox"]);
        assert_eq!(tokenize_search_query("Lor"), vec!["Lor"]);
        assert_eq!(tokenize_search_query("of it on"), Vec::<String>::new());
        assert_eq!(tokenize_search_query("  the   lazy   dog!  "), vec!["the", "lazy", "dog"]);
    }

    #[test]
    fn search_tokens_strip_punctuation_and_cap() {
        assert_eq!(tokenize_search_query("dog, (end)!"), vec!["dog", "end"]);
        let long_query = (0..50).map(|i| format!("token{i}")).collect::<Vec<_>>().join(" ");
        assert_eq!(tokenize_search_query(&long_query).len(), 32);
    }

    #[test]
    fn env_parsing_ignores_garbage() {
        assert_eq!(try_parse_string::<_, u32>(Some("42")), Some(42));
        assert_eq!(try_parse_string::<_, u32>(Some("forty-two")), None);
        assert_eq!(try_parse_string::<_, u32>(None::<&str>), None);
    }
}
