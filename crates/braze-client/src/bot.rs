//! The remote client: one bot identity, one generic `call`, typed wrappers.
//!
//! The remote service exposes hundreds of named operations behind a single
//! calling convention. Rather than reflecting method names at runtime, the
//! client keeps one generic [`Bot::call`] entry point and hand-written typed
//! wrappers for the few operations the dispatch and reply paths use.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use braze_core::{ApiError, ApiResult, Message, Update, User};

use crate::http::{ApiClient, InputFile, multipart_form};

const BASE_URL: &str = "https://api.telegram.org";

/// Default per-request timeout; the long-poll window is derived from it.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(12);

/// One bot identity bound to the shared connection pool.
pub struct Bot {
    token: String,
    id: i64,
    base_url: String,
    timeout: Duration,
    client: ApiClient,
    me: tokio::sync::OnceCell<User>,
}

impl Bot {
    /// Binds a token to the shared pool.
    ///
    /// The token shape is validated here — `<numeric-id>:<secret>` with no
    /// path separators — so a malformed token fails at construction instead
    /// of surfacing as a mystery 404 on the first call.
    pub fn new(client: ApiClient, token: impl Into<String>) -> ApiResult<Self> {
        let token = token.into();
        let id = parse_token(&token)?;
        Ok(Self {
            token,
            id,
            base_url: BASE_URL.to_owned(),
            timeout: DEFAULT_TIMEOUT,
            client,
            me: tokio::sync::OnceCell::new(),
        })
    }

    /// Overrides the request timeout (default [`DEFAULT_TIMEOUT`]).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Points the client at a different service root. Intended for local
    /// gateway setups.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// The numeric id embedded in the token.
    pub fn id(&self) -> i64 {
        self.id
    }

    /// The configured per-request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.base_url, self.token)
    }

    /// Issues one named operation with JSON-encoded parameters.
    pub async fn call(&self, method: &str, params: Value) -> ApiResult<Value> {
        self.call_with_timeout(method, params, self.timeout).await
    }

    async fn call_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> ApiResult<Value> {
        debug!(method, "remote call");
        let response = self
            .client
            .inner()
            .post(self.method_url(method))
            .timeout(timeout)
            .json(&params)
            .send()
            .await
            .map_err(map_transport)?;
        let envelope: Value = response.json().await.map_err(map_transport)?;
        map_envelope(envelope)
    }

    /// Issues one named operation carrying binary attachments.
    ///
    /// Parameters reference attachments through `attach://<name>`
    /// placeholders (see [`InputFile::attach_url`]).
    pub async fn call_multipart(
        &self,
        method: &str,
        params: Value,
        files: Vec<InputFile>,
    ) -> ApiResult<Value> {
        debug!(method, files = files.len(), "remote multipart call");
        let form = multipart_form(params, files)?;
        let response = self
            .client
            .inner()
            .post(self.method_url(method))
            .timeout(self.timeout)
            .multipart(form)
            .send()
            .await
            .map_err(map_transport)?;
        let envelope: Value = response.json().await.map_err(map_transport)?;
        map_envelope(envelope)
    }

    /// This bot's own identity, fetched once and reused for every later
    /// normalization pass.
    pub async fn me(&self) -> ApiResult<User> {
        self.me
            .get_or_try_init(|| async { self.get_me().await })
            .await
            .cloned()
    }

    /// `getMe` — uncached; prefer [`Bot::me`].
    pub async fn get_me(&self) -> ApiResult<User> {
        let result = self.call("getMe", Value::Object(Default::default())).await?;
        serde_json::from_value(result).map_err(|e| ApiError::Transport(e.to_string()))
    }

    /// `getUpdates` — the long-poll operation. `poll_timeout` is the
    /// server-side hold; the HTTP deadline is padded past it so the server,
    /// not the socket, ends a quiet window.
    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        poll_timeout: Duration,
    ) -> ApiResult<Vec<Update>> {
        let mut params = serde_json::Map::new();
        if let Some(offset) = offset {
            params.insert("offset".into(), offset.into());
        }
        params.insert("timeout".into(), poll_timeout.as_secs().into());
        let http_deadline = self.timeout.max(poll_timeout + Duration::from_secs(2));
        let result = self
            .call_with_timeout("getUpdates", Value::Object(params), http_deadline)
            .await?;
        serde_json::from_value(result).map_err(|e| ApiError::Transport(e.to_string()))
    }

    /// `sendMessage`.
    pub async fn send_message(&self, message: &SendMessage) -> ApiResult<Message> {
        let params = serde_json::to_value(message).map_err(|e| ApiError::Transport(e.to_string()))?;
        let result = self.call("sendMessage", params).await?;
        serde_json::from_value(result).map_err(|e| ApiError::Transport(e.to_string()))
    }

    /// `editMessageText`.
    pub async fn edit_message_text(&self, edit: &EditMessageText) -> ApiResult<Value> {
        let params = serde_json::to_value(edit).map_err(|e| ApiError::Transport(e.to_string()))?;
        self.call("editMessageText", params).await
    }

    /// `answerInlineQuery`.
    pub async fn answer_inline_query(
        &self,
        inline_query_id: &str,
        results: Value,
    ) -> ApiResult<Value> {
        self.call(
            "answerInlineQuery",
            serde_json::json!({
                "inline_query_id": inline_query_id,
                "results": results,
            }),
        )
        .await
    }

    /// `answerCallbackQuery` — dismisses the client-side loading spinner.
    pub async fn answer_callback_query(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
    ) -> ApiResult<Value> {
        let mut params = serde_json::Map::new();
        params.insert("callback_query_id".into(), callback_query_id.into());
        if let Some(text) = text {
            params.insert("text".into(), text.into());
        }
        self.call("answerCallbackQuery", Value::Object(params)).await
    }

    /// `sendDocument` — the multipart path.
    pub async fn send_document(
        &self,
        chat_id: i64,
        file: InputFile,
        caption: Option<&str>,
    ) -> ApiResult<Message> {
        let mut params = serde_json::Map::new();
        params.insert("chat_id".into(), chat_id.into());
        params.insert("document".into(), file.attach_url().into());
        if let Some(caption) = caption {
            params.insert("caption".into(), caption.into());
        }
        let result = self
            .call_multipart("sendDocument", Value::Object(params), vec![file])
            .await?;
        serde_json::from_value(result).map_err(|e| ApiError::Transport(e.to_string()))
    }
}

impl std::fmt::Debug for Bot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The token is a credential; show only the public id.
        f.debug_struct("Bot").field("id", &self.id).finish()
    }
}

/// Parameters for [`Bot::send_message`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct SendMessage {
    pub chat_id: i64,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disable_web_page_preview: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_markup: Option<Value>,
}

/// Parameters for [`Bot::edit_message_text`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct EditMessageText {
    pub chat_id: i64,
    pub message_id: i64,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disable_web_page_preview: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_markup: Option<Value>,
}

fn map_transport(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::Timeout
    } else {
        ApiError::Transport(err.to_string())
    }
}

/// Validates the `<numeric-id>:<secret>` token shape and extracts the id.
fn parse_token(token: &str) -> ApiResult<i64> {
    if token.contains('/') {
        return Err(ApiError::InvalidToken);
    }
    let Some((id, secret)) = token.split_once(':') else {
        return Err(ApiError::InvalidToken);
    };
    if secret.contains(':') || secret.is_empty() {
        return Err(ApiError::InvalidToken);
    }
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ApiError::InvalidToken);
    }
    id.parse().map_err(|_| ApiError::InvalidToken)
}

/// Maps a `{ok, result}` / `{ok, error_code, description, parameters?}`
/// envelope to a typed result.
fn map_envelope(mut data: Value) -> ApiResult<Value> {
    if data.get("ok").and_then(Value::as_bool) == Some(true) {
        return Ok(data.get_mut("result").map(Value::take).unwrap_or(Value::Null));
    }

    let error_code = data.get("error_code").and_then(Value::as_i64).unwrap_or(0);
    let description = data
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();

    Err(match error_code {
        401 => ApiError::Unauthorized { description },
        403 => ApiError::Forbidden { description },
        404 => ApiError::NotFound { description },
        409 => ApiError::Conflict { description },
        429 => {
            let retry_after = data
                .get("parameters")
                .and_then(|p| p.get("retry_after"))
                .and_then(Value::as_u64)
                .map(Duration::from_secs);
            ApiError::TooManyRequests {
                description,
                retry_after,
            }
        }
        400 if description.to_ascii_lowercase().contains("message is too long") => {
            ApiError::TooLong { description }
        }
        400 if description.to_ascii_lowercase().contains("message is not modified") => {
            ApiError::Unmodified { description }
        }
        _ => ApiError::Api {
            error_code,
            description,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_shape_is_strict() {
        assert_eq!(parse_token("1234:abcDEF").unwrap(), 1234);
        assert!(parse_token("abcd:efgh").is_err());
        assert!(parse_token("1234").is_err());
        assert!(parse_token("1234:ab:cd").is_err());
        assert!(parse_token("1234:ab/cd").is_err());
        assert!(parse_token("1234:").is_err());
        assert!(parse_token(":secret").is_err());
    }

    #[test]
    fn bot_construction_rejects_bad_tokens() {
        let client = ApiClient::new().unwrap();
        assert!(matches!(
            Bot::new(client.clone(), "not a token"),
            Err(ApiError::InvalidToken)
        ));
        let bot = Bot::new(client, "99:secret").unwrap();
        assert_eq!(bot.id(), 99);
    }

    #[test]
    fn envelope_success_yields_result() {
        let out = map_envelope(serde_json::json!({"ok": true, "result": [1, 2]})).unwrap();
        assert_eq!(out, serde_json::json!([1, 2]));
        assert_eq!(
            map_envelope(serde_json::json!({"ok": true})).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn envelope_maps_error_codes() {
        let err = |code: i64, desc: &str| {
            map_envelope(serde_json::json!({
                "ok": false, "error_code": code, "description": desc
            }))
            .unwrap_err()
        };
        assert!(matches!(err(401, "revoked"), ApiError::Unauthorized { .. }));
        assert!(matches!(err(403, "blocked"), ApiError::Forbidden { .. }));
        assert!(matches!(err(404, "nope"), ApiError::NotFound { .. }));
        assert!(matches!(err(409, "other poller"), ApiError::Conflict { .. }));
        assert!(matches!(err(500, "boom"), ApiError::Api { error_code: 500, .. }));
    }

    #[test]
    fn envelope_maps_bad_request_markers() {
        let err = |desc: &str| {
            map_envelope(serde_json::json!({
                "ok": false, "error_code": 400, "description": desc
            }))
            .unwrap_err()
        };
        assert!(matches!(
            err("Bad Request: message is too long"),
            ApiError::TooLong { .. }
        ));
        assert!(matches!(
            err("Bad Request: message is not modified"),
            ApiError::Unmodified { .. }
        ));
        assert!(matches!(err("Bad Request: chat not found"), ApiError::Api { .. }));
    }

    #[test]
    fn envelope_surfaces_retry_after() {
        let err = map_envelope(serde_json::json!({
            "ok": false,
            "error_code": 429,
            "description": "Too Many Requests: retry after 7",
            "parameters": {"retry_after": 7}
        }))
        .unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));

        let err = map_envelope(serde_json::json!({
            "ok": false, "error_code": 429, "description": "slow down"
        }))
        .unwrap_err();
        assert!(matches!(
            err,
            ApiError::TooManyRequests {
                retry_after: None,
                ..
            }
        ));
    }
}
