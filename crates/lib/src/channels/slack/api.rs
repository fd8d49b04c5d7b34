//! Slack Web API calls used by the Socket Mode channel.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use crate::channels::handle::ChannelError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
struct SlackAuthTestResponse {
    ok: bool,
    user_id: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SlackOpenSocketResponse {
    ok: bool,
    url: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SlackOkResponse {
    ok: bool,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SlackUserInfoResponse {
    ok: bool,
    user: Option<SlackUser>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SlackUser {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    real_name: Option<String>,
    #[serde(default)]
    profile: Option<SlackUserProfile>,
}

#[derive(Debug, Deserialize)]
struct SlackUserProfile {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    real_name: Option<String>,
}

impl SlackUser {
    /// Profile display name, then real name, then the legacy user name.
    fn display_name(&self) -> Option<String> {
        let profile = self.profile.as_ref();
        [
            profile.and_then(|p| p.display_name.as_deref()),
            profile.and_then(|p| p.real_name.as_deref()),
            self.real_name.as_deref(),
            self.name.as_deref(),
        ]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
    }
}

fn api_error(method: &'static str, ok: bool, error: Option<String>) -> Result<(), ChannelError> {
    if ok {
        Ok(())
    } else {
        Err(ChannelError::api(
            method,
            error.unwrap_or_else(|| "unknown error".to_string()),
        ))
    }
}

#[derive(Clone)]
pub(crate) struct SlackApiClient {
    http: reqwest::Client,
    api_base: String,
    app_token: String,
    bot_token: String,
}

impl SlackApiClient {
    pub(crate) fn new(
        api_base: &str,
        app_token: &str,
        bot_token: &str,
    ) -> Result<Self, ChannelError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("shellcast/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            app_token: app_token.trim().to_string(),
            bot_token: bot_token.trim().to_string(),
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.api_base, method)
    }

    /// auth.test: the bot's own user id, used to ignore its replies.
    pub(crate) async fn resolve_bot_user_id(&self) -> Result<String, ChannelError> {
        let response: SlackAuthTestResponse = self
            .send_json(
                "auth.test",
                self.http.post(self.url("auth.test")).bearer_auth(&self.bot_token),
            )
            .await?;
        api_error("auth.test", response.ok, response.error)?;
        response
            .user_id
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| ChannelError::api("auth.test", "no user_id in response"))
    }

    /// apps.connections.open: a fresh Socket Mode WebSocket URL (app token).
    pub(crate) async fn open_socket_connection(&self) -> Result<String, ChannelError> {
        let response: SlackOpenSocketResponse = self
            .send_json(
                "apps.connections.open",
                self.http
                    .post(self.url("apps.connections.open"))
                    .bearer_auth(&self.app_token),
            )
            .await?;
        api_error("apps.connections.open", response.ok, response.error)?;
        response
            .url
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| ChannelError::api("apps.connections.open", "no url in response"))
    }

    /// chat.postMessage as the bot.
    pub(crate) async fn post_message(&self, channel: &str, text: &str) -> Result<(), ChannelError> {
        let payload = json!({
            "channel": channel,
            "text": text,
            "unfurl_links": false,
            "unfurl_media": false,
        });
        let response: SlackOkResponse = self
            .send_json(
                "chat.postMessage",
                self.http
                    .post(self.url("chat.postMessage"))
                    .bearer_auth(&self.bot_token)
                    .json(&payload),
            )
            .await?;
        api_error("chat.postMessage", response.ok, response.error)
    }

    /// users.info: a readable name for a user id.
    pub(crate) async fn user_display_name(&self, user_id: &str) -> Result<String, ChannelError> {
        let response: SlackUserInfoResponse = self
            .send_json(
                "users.info",
                self.http
                    .get(self.url("users.info"))
                    .bearer_auth(&self.bot_token)
                    .query(&[("user", user_id)]),
            )
            .await?;
        api_error("users.info", response.ok, response.error)?;
        response
            .user
            .and_then(|u| u.display_name())
            .ok_or_else(|| ChannelError::api("users.info", "user has no name"))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        method: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ChannelError> {
        let res = request.send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ChannelError::api(method, format!("{} {}", status, body)));
        }
        Ok(res.json::<T>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn client(server: &MockServer) -> SlackApiClient {
        SlackApiClient::new(&server.base_url(), "xapp-test", "xoxb-test").expect("client")
    }

    #[tokio::test]
    async fn open_socket_connection_uses_app_token() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/apps.connections.open")
                .header("authorization", "Bearer xapp-test");
            then.status(200)
                .json_body(json!({ "ok": true, "url": "wss://example.test/link" }));
        });
        let url = client(&server).open_socket_connection().await.expect("url");
        assert_eq!(url, "wss://example.test/link");
        mock.assert();
    }

    #[tokio::test]
    async fn post_message_uses_bot_token_and_reports_slack_errors() {
        let server = MockServer::start();
        let ok = server.mock(|when, then| {
            when.method(POST)
                .path("/chat.postMessage")
                .header("authorization", "Bearer xoxb-test")
                .json_body_includes(json!({ "channel": "C1", "text": "```\nhello\n```" }).to_string());
            then.status(200).json_body(json!({ "ok": true, "ts": "1.1" }));
        });
        client(&server)
            .post_message("C1", "```\nhello\n```")
            .await
            .expect("posted");
        ok.assert();

        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/chat.postMessage");
            then.status(200)
                .json_body(json!({ "ok": false, "error": "channel_not_found" }));
        });
        let err = client(&server).post_message("C9", "x").await.unwrap_err();
        assert!(err.to_string().contains("channel_not_found"));
    }

    #[tokio::test]
    async fn post_message_is_not_retried() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/chat.postMessage");
            then.status(429).body("rate limited");
        });
        assert!(client(&server).post_message("C1", "x").await.is_err());
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn user_display_name_falls_back_through_profile_fields() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/users.info").query_param("user", "U1");
            then.status(200).json_body(json!({
                "ok": true,
                "user": {
                    "name": "ada.l",
                    "profile": { "display_name": "", "real_name": "Ada Lovelace" }
                }
            }));
        });
        let name = client(&server).user_display_name("U1").await.expect("name");
        assert_eq!(name, "Ada Lovelace");
    }

    #[tokio::test]
    async fn resolve_bot_user_id_reads_auth_test() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/auth.test");
            then.status(200)
                .json_body(json!({ "ok": true, "user_id": "UBOT" }));
        });
        assert_eq!(client(&server).resolve_bot_user_id().await.unwrap(), "UBOT");
    }
}
