mod connections;
mod groups;
mod internal;
mod names;

use rocket::serde::json::Json;
use rocket::Route;
use serde_json::Value;

use crate::db::models::PendingRequest;
use crate::db::DbPool;

// Type aliases for API methods results
pub type ApiResult<T> = Result<T, crate::error::Error>;
pub type JsonResult = ApiResult<Json<Value>>;
pub type EmptyResult = ApiResult<()>;

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.append(&mut connections::routes());
    routes.append(&mut groups::routes());
    routes.append(&mut names::routes());
    routes.append(&mut internal::routes());
    routes
}

/// Scheduled sweep dropping pending requests past their expiry.
pub async fn purge_pending_requests(pool: DbPool) {
    debug!("Purging expired pending requests");
    match pool.get().await {
        Ok(conn) => match PendingRequest::purge_expired(&conn).await {
            Ok(count) if count > 0 => info!("Purged {count} expired pending requests"),
            Ok(_) => (),
            Err(e) => error!("Failed to purge expired pending requests: {e}"),
        },
        Err(_) => error!("Failed to get DB connection while purging expired pending requests"),
    }
}

/// Merges the caller-provided notification payload with fields the engine
/// guarantees (e.g. the request key the recipient has to answer with).
pub(crate) fn notify_with(notify: &Value, extra: &[(&str, Value)]) -> Value {
    let mut payload = match notify {
        Value::Object(fields) => fields.clone(),
        _ => serde_json::Map::new(),
    };
    for (key, value) in extra {
        payload.insert((*key).to_string(), value.clone());
    }
    Value::Object(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn notify_payloads_gain_engine_fields() {
        let notify = json!({"text": "hello"});
        let payload = notify_with(&notify, &[("key", json!("abc"))]);
        assert_eq!(payload["text"], "hello");
        assert_eq!(payload["key"], "abc");
    }

    #[test]
    fn non_object_notify_is_replaced() {
        let payload = notify_with(&json!(17), &[("key", json!("abc"))]);
        assert_eq!(payload, json!({"key": "abc"}));
    }
}
