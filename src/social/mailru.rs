use serde_json::Value;

use crate::error::Error;
use crate::login;
use crate::util::get_reqwest_client;

const CREDENTIAL: &str = "mailru";

const API_URL: &str = "https://appsmail.ru/platform/api";

/// Mail.ru games use a per-gamespace application secret; there is no friend
/// list on this platform.
#[derive(Debug)]
pub struct MailRuApi;

impl MailRuApi {
    pub async fn get_social_profile(&self, gamespace_id: i64, username: &str) -> Result<Value, Error> {
        let key = login::get_key(gamespace_id, CREDENTIAL).await?;
        let (Some(app_id), Some(secret)) = (key["app_id"].as_str(), key["secret"].as_str()) else {
            err!(internal, "mailru provider key is missing app_id/secret");
        };

        let body = get_reqwest_client()
            .get(API_URL)
            .query(&[
                ("method", "users.getInfo"),
                ("app_id", app_id),
                ("secure", "1"),
                ("secret_key", secret),
                ("uids", username),
            ])
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;

        let user = body[0].clone();
        if user.is_null() {
            err!(not_found, format!("No mail.ru user: '{username}'"));
        }

        Ok(user)
    }
}
