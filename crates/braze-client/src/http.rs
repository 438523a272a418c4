//! Shared HTTP connection pool and multipart request assembly.
//!
//! One [`ApiClient`] is constructed at startup and handed to every bot; the
//! underlying pool is reference counted, so cloning is cheap and all bots
//! share the same keep-alive connections. There is deliberately no global
//! client timeout — long-poll requests and ordinary calls need different
//! deadlines, so every request carries its own.

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use serde_json::Value;

use braze_core::{ApiError, ApiResult};

/// How long an idle connection may sit before the OS starts probing it.
/// Long-poll connections idle for the full poll window, so the probe has to
/// kick in before intermediate NATs drop the mapping.
const TCP_KEEPALIVE: Duration = Duration::from_secs(115);

/// A shared HTTP connection pool.
#[derive(Clone, Debug)]
pub struct ApiClient {
    inner: reqwest::Client,
}

impl ApiClient {
    /// Builds the pool. Called once at startup; clones share connections.
    pub fn new() -> ApiResult<Self> {
        let inner = reqwest::Client::builder()
            .tcp_keepalive(TCP_KEEPALIVE)
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(Self { inner })
    }

    pub(crate) fn inner(&self) -> &reqwest::Client {
        &self.inner
    }
}

/// A binary attachment for a multipart call.
///
/// The JSON-eligible fields of the same call reference the attachment via an
/// `attach://<name>` placeholder; see [`attach_url`].
#[derive(Clone, Debug)]
pub struct InputFile {
    /// Form part name, matched by the `attach://` placeholder.
    pub name: String,
    /// File name reported to the remote service.
    pub file_name: String,
    /// Raw content.
    pub bytes: Vec<u8>,
}

impl InputFile {
    pub fn new(
        name: impl Into<String>,
        file_name: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            name: name.into(),
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }

    /// The placeholder that references this attachment from a JSON-eligible
    /// parameter value.
    pub fn attach_url(&self) -> String {
        format!("attach://{}", self.name)
    }
}

/// Assembles a multipart form from named parameters and attachments.
///
/// String scalars travel as plain text fields; every other value is
/// JSON-serialized into its field, which is how structured parameters (reply
/// markup, result lists) ride alongside binary parts.
pub(crate) fn multipart_form(params: Value, files: Vec<InputFile>) -> ApiResult<Form> {
    let mut form = Form::new();
    if let Value::Object(map) = params {
        for (key, value) in map {
            let text = match value {
                Value::String(s) => s,
                other => serde_json::to_string(&other)
                    .map_err(|e| ApiError::Transport(e.to_string()))?,
            };
            form = form.text(key, text);
        }
    }
    for file in files {
        form = form.part(
            file.name.clone(),
            Part::bytes(file.bytes).file_name(file.file_name),
        );
    }
    Ok(form)
}
