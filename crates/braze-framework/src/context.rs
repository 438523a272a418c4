//! The normalized per-event context handed to handlers.
//!
//! A [`Context`] standardizes where the payload text came from (message
//! text, callback data, inline query) and where a reply goes (send, edit, or
//! inline answer). It is created once per inbound event by the
//! [`Preprocessor`](crate::preprocess::Preprocessor), consumed by exactly
//! one dispatch, and discarded.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde_json::Value;

use braze_client::{Bot, EditMessageText, SendMessage};
use braze_core::{ApiError, ApiResult, Chat, InlineKeyboard, MessageEntity, User};
use braze_core::{deeplink, invislink, keyboard};

/// Pending conversation fragments, keyed by user id.
///
/// Entries persist until consumed or overwritten — there is deliberately no
/// expiry. Mutation happens only on the single consumer thread under the
/// serialized-dispatch design; this map is not safe for concurrently
/// executing handlers.
pub type Conversations = Arc<Mutex<HashMap<i64, String>>>;

/// What kind of event this context was normalized from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    /// One or more accounts joined a chat.
    Join,
    /// A message was pinned.
    Pin,
    /// A plain message or channel post.
    Message,
    /// An inline keyboard button press.
    Callback,
    /// A query typed after the bot's name.
    InlineQuery,
}

/// Which remote operation a reply uses.
///
/// Exactly one target exists per context by construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyTarget {
    /// Send a new message, optionally quoting `message_id`.
    Reply { message_id: i64 },
    /// Edit the message the pressed keyboard was attached to.
    Edit { message_id: i64 },
    /// Answer an inline query.
    Answer { query_id: String },
}

/// Normalized presentation of one inbound event.
pub struct Context {
    /// The client used to issue replies.
    pub bot: Arc<Bot>,
    /// The bot's own cached identity.
    pub bot_user: User,
    pub kind: ContextKind,
    /// Sender identity; absent for anonymous channel posts.
    pub user: Option<User>,
    /// Conversation identity; absent for inline queries.
    pub chat: Option<Chat>,
    /// The operative command body after all normalization.
    pub text: String,
    /// Lowercased command token, when the text addressed this bot.
    pub command: Option<String>,
    /// First whitespace-delimited token of `text`.
    pub prefix: String,
    pub target: ReplyTarget,
    pub forwarded: bool,
    /// Original sender of a forwarded message, when visible.
    pub forward_from: Option<User>,
    /// Sender of the message this one replied to.
    pub reply_to_user: Option<User>,
    /// Metadata recovered from invisible links; empty by default.
    pub meta: BTreeMap<String, String>,
    /// Markup entities, cleared whenever normalization rewrote the text.
    pub entities: Vec<MessageEntity>,
    pub document: Option<String>,
    pub photo: Option<String>,
    pub sticker: Option<String>,
    pub(crate) private: AtomicBool,
    pub(crate) conversations: Conversations,
}

/// Reply options beyond plain text.
#[derive(Debug, Clone, Default)]
pub struct Reply {
    pub text: String,
    pub parse_mode: Option<String>,
    pub disable_web_page_preview: Option<bool>,
    /// Inline keyboard; oversized callback payloads are shortened on send.
    pub keyboard: Option<InlineKeyboard>,
    /// Metadata to hide in the outgoing message's markup.
    pub meta: BTreeMap<String, String>,
}

impl Reply {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn html(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            parse_mode: Some("HTML".to_owned()),
            ..Default::default()
        }
    }

    pub fn markdown(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            parse_mode: Some("Markdown".to_owned()),
            ..Default::default()
        }
    }

    pub fn keyboard(mut self, keyboard: InlineKeyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }

    pub fn meta(mut self, meta: BTreeMap<String, String>) -> Self {
        self.meta = meta;
        self
    }
}

/// Where a `Reply`-targeted message physically goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ReplyRoute {
    /// Straight to the user's private chat.
    ToUser { user_id: i64 },
    /// Into the origin chat, quoting the trigger message.
    ToChat { chat_id: i64, reply_to: i64 },
    /// To the user's private chat, falling back to a visible deep-link
    /// message in the origin chat when delivery is forbidden.
    ToUserWithFallback {
        user_id: i64,
        chat_id: i64,
        reply_to: i64,
    },
}

impl Context {
    /// Marks subsequent replies as private: they go to the sender's own
    /// chat even when the trigger came from a group.
    pub fn set_private(&self, private: bool) {
        self.private.store(private, Ordering::Relaxed);
    }

    pub fn is_private(&self) -> bool {
        self.private.load(Ordering::Relaxed)
    }

    /// Stores a pending fragment to prepend to this user's next
    /// non-command message. A bare fragment is re-anchored to the current
    /// command so the continuation resumes the same operation.
    pub fn set_conversation(&self, text: &str) {
        let Some(user) = &self.user else { return };
        let stored = match (&self.command, text.starts_with('/')) {
            (Some(command), false) => format!("/{command} {text}"),
            _ => text.to_owned(),
        };
        self.conversations.lock().insert(user.id, stored);
    }

    /// A deep-link URL back to this bot carrying `command`.
    pub fn encode_url(&self, command: &str) -> String {
        deeplink::encode_url(self.bot_username(), command)
    }

    /// An HTML fragment deep-linking back to this bot.
    pub fn encode_link(&self, command: &str, label: Option<&str>) -> String {
        deeplink::encode_link(self.bot_username(), command, label)
    }

    fn bot_username(&self) -> &str {
        self.bot_user.username.as_deref().unwrap_or_default()
    }

    /// Replies with plain text.
    pub async fn reply_text(&self, text: impl Into<String>) -> ApiResult<Value> {
        self.reply(Reply::new(text)).await
    }

    /// Replies with an HTML fragment.
    pub async fn reply_html(&self, text: impl Into<String>) -> ApiResult<Value> {
        self.reply(Reply::html(text)).await
    }

    /// Replies with a Markdown fragment.
    pub async fn reply_markdown(&self, text: impl Into<String>) -> ApiResult<Value> {
        self.reply(Reply::markdown(text)).await
    }

    /// Answers an inline query with a prebuilt result list.
    pub async fn reply_inline(&self, results: Value) -> ApiResult<Value> {
        match &self.target {
            ReplyTarget::Answer { query_id } => {
                self.bot.answer_inline_query(query_id, results).await
            }
            _ => Ok(Value::Null),
        }
    }

    /// Replies or edits according to this context's target.
    ///
    /// When the reply carries a keyboard, oversized button payloads are
    /// shortened and the prefix table — along with any reply metadata — is
    /// hidden in the message as invisible links, forcing HTML parse mode.
    /// An `Answer` target ignores text replies; use
    /// [`reply_inline`](Self::reply_inline).
    pub async fn reply(&self, reply: Reply) -> ApiResult<Value> {
        let (text, parse_mode, reply_markup) = render_reply(reply);

        match &self.target {
            ReplyTarget::Reply { message_id } => {
                self.send_rendered(*message_id, text, parse_mode, reply_markup)
                    .await
            }
            ReplyTarget::Edit { message_id } => {
                let chat_id = self.chat.as_ref().map(|c| c.id).unwrap_or_default();
                self.bot
                    .edit_message_text(&EditMessageText {
                        chat_id,
                        message_id: *message_id,
                        text,
                        parse_mode,
                        reply_markup,
                        ..Default::default()
                    })
                    .await
            }
            ReplyTarget::Answer { .. } => Ok(Value::Null),
        }
    }

    async fn send_rendered(
        &self,
        message_id: i64,
        text: String,
        parse_mode: Option<String>,
        reply_markup: Option<Value>,
    ) -> ApiResult<Value> {
        let send = |chat_id: i64, reply_to: Option<i64>, text: String, parse_mode: Option<String>, markup: Option<Value>| {
            let bot = &self.bot;
            async move {
                let msg = bot
                    .send_message(&SendMessage {
                        chat_id,
                        text,
                        parse_mode,
                        reply_to_message_id: reply_to,
                        reply_markup: markup,
                        ..Default::default()
                    })
                    .await?;
                serde_json::to_value(msg).map_err(|e| ApiError::Transport(e.to_string()))
            }
        };

        match self.reply_route(message_id) {
            ReplyRoute::ToUser { user_id } => {
                send(user_id, None, text, parse_mode, reply_markup).await
            }
            ReplyRoute::ToChat { chat_id, reply_to } => {
                send(chat_id, Some(reply_to), text, parse_mode, reply_markup).await
            }
            ReplyRoute::ToUserWithFallback {
                user_id,
                chat_id,
                reply_to,
            } => {
                match send(user_id, None, text, parse_mode, reply_markup).await {
                    Err(err) => {
                        let link = self.encode_link(&self.text, Some(PRIVATE_FALLBACK_LABEL));
                        let follow_up = private_reply_fallback(err, link, chat_id, reply_to)?;
                        let msg = self.bot.send_message(&follow_up).await?;
                        serde_json::to_value(msg).map_err(|e| ApiError::Transport(e.to_string()))
                    }
                    ok => ok,
                }
            }
        }
    }

    pub(crate) fn reply_route(&self, message_id: i64) -> ReplyRoute {
        let chat = self.chat.as_ref();
        let chat_id = chat.map(|c| c.id).unwrap_or_default();
        let user_id = self.user.as_ref().map(|u| u.id);

        if chat.is_some_and(Chat::is_private) {
            return ReplyRoute::ToUser {
                user_id: user_id.unwrap_or(chat_id),
            };
        }
        match user_id {
            Some(user_id) if self.is_private() => ReplyRoute::ToUserWithFallback {
                user_id,
                chat_id,
                reply_to: message_id,
            },
            _ => ReplyRoute::ToChat {
                chat_id,
                reply_to: message_id,
            },
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("kind", &self.kind)
            .field("command", &self.command)
            .field("text", &self.text)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

/// Visible label of the hand-off message left in a group chat when a
/// private delivery bounced.
const PRIVATE_FALLBACK_LABEL: &str = "Let's take this to a private chat!";

/// Decides the follow-up for a failed private delivery out of a group-origin
/// context. The user having blocked the bot (`Forbidden`) becomes a visible
/// deep-link hand-off quoted into the origin chat; every other failure
/// propagates unchanged.
fn private_reply_fallback(
    err: ApiError,
    link: String,
    chat_id: i64,
    reply_to: i64,
) -> ApiResult<SendMessage> {
    match err {
        ApiError::Forbidden { .. } => Ok(SendMessage {
            chat_id,
            text: link,
            parse_mode: Some("HTML".to_owned()),
            reply_to_message_id: Some(reply_to),
            ..Default::default()
        }),
        other => Err(other),
    }
}

/// Applies keyboard shortening and invisible-metadata embedding, producing
/// the final text, parse mode, and reply markup for any reply operation.
fn render_reply(reply: Reply) -> (String, Option<String>, Option<Value>) {
    let Reply {
        text,
        parse_mode,
        keyboard: kb,
        meta,
        ..
    } = reply;

    let mut kb = kb;
    let prefixes = kb
        .as_mut()
        .and_then(|grid| keyboard::fix(grid, keyboard::MAX_CALLBACK_DATA));
    let meta = (!meta.is_empty()).then_some(meta);
    let hidden = invislink::encode(prefixes.as_deref(), meta.as_ref());

    let (text, parse_mode) = if hidden.is_empty() {
        (text, parse_mode)
    } else {
        // Hidden links are markup; the body must go out as HTML.
        (format!("{hidden}{text}"), Some("HTML".to_owned()))
    };

    let reply_markup = kb.map(|grid| serde_json::json!({ "inline_keyboard": grid }));
    (text, parse_mode, reply_markup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use braze_client::ApiClient;
    use braze_core::InlineKeyboardButton;

    fn test_context(chat_kind: &str) -> Context {
        let client = ApiClient::new().unwrap();
        let bot = Arc::new(Bot::new(client, "1234:test").unwrap());
        Context {
            bot,
            bot_user: User {
                id: 1234,
                username: Some("mybot".into()),
                ..Default::default()
            },
            kind: ContextKind::Message,
            user: Some(User {
                id: 77,
                ..Default::default()
            }),
            chat: Some(Chat {
                id: -100,
                kind: chat_kind.into(),
                ..Default::default()
            }),
            text: "echo hi".into(),
            command: Some("echo".into()),
            prefix: "hi".into(),
            target: ReplyTarget::Reply { message_id: 5 },
            forwarded: false,
            forward_from: None,
            reply_to_user: None,
            meta: BTreeMap::new(),
            entities: Vec::new(),
            document: None,
            photo: None,
            sticker: None,
            private: AtomicBool::new(false),
            conversations: Conversations::default(),
        }
    }

    #[test]
    fn private_chat_routes_to_user() {
        let ctx = test_context("private");
        assert_eq!(ctx.reply_route(5), ReplyRoute::ToUser { user_id: 77 });
    }

    #[test]
    fn group_chat_routes_to_chat_with_quote() {
        let ctx = test_context("group");
        assert_eq!(
            ctx.reply_route(5),
            ReplyRoute::ToChat {
                chat_id: -100,
                reply_to: 5
            }
        );
    }

    #[test]
    fn private_flag_routes_to_user_with_fallback() {
        let ctx = test_context("group");
        ctx.set_private(true);
        assert_eq!(
            ctx.reply_route(5),
            ReplyRoute::ToUserWithFallback {
                user_id: 77,
                chat_id: -100,
                reply_to: 5
            }
        );
    }

    #[test]
    fn private_flag_without_sender_falls_back_to_chat() {
        let mut ctx = test_context("group");
        ctx.user = None;
        ctx.set_private(true);
        assert_eq!(
            ctx.reply_route(5),
            ReplyRoute::ToChat {
                chat_id: -100,
                reply_to: 5
            }
        );
    }

    #[test]
    fn blocked_private_delivery_becomes_group_handoff() {
        let ctx = test_context("group");
        ctx.set_private(true);

        let link = ctx.encode_link(&ctx.text, Some(PRIVATE_FALLBACK_LABEL));
        let err = ApiError::Forbidden {
            description: "bot was blocked by the user".into(),
        };
        let follow_up = private_reply_fallback(err, link, -100, 5).unwrap();

        assert_eq!(follow_up.chat_id, -100);
        assert_eq!(follow_up.reply_to_message_id, Some(5));
        assert_eq!(follow_up.parse_mode.as_deref(), Some("HTML"));
        // The visible message is a deep link back into a private chat,
        // carrying the original command as its payload.
        assert!(follow_up.text.starts_with("<a href=\"https://t.me/mybot?start="));
        assert!(follow_up.text.contains(PRIVATE_FALLBACK_LABEL));
        let token = follow_up
            .text
            .split("start=")
            .nth(1)
            .and_then(|rest| rest.split('"').next())
            .unwrap();
        assert_eq!(deeplink::decode(token), ctx.text);
    }

    #[test]
    fn non_forbidden_delivery_failures_propagate() {
        let err = ApiError::TooManyRequests {
            description: "slow down".into(),
            retry_after: None,
        };
        assert!(matches!(
            private_reply_fallback(err, String::new(), -100, 5),
            Err(ApiError::TooManyRequests { .. })
        ));

        let err = ApiError::Timeout;
        assert!(matches!(
            private_reply_fallback(err, String::new(), -100, 5),
            Err(ApiError::Timeout)
        ));
    }

    #[test]
    fn set_conversation_anchors_to_current_command() {
        let ctx = test_context("private");
        ctx.set_conversation("pending words");
        assert_eq!(
            ctx.conversations.lock().get(&77).map(String::as_str),
            Some("/echo pending words")
        );

        ctx.set_conversation("/other full command");
        assert_eq!(
            ctx.conversations.lock().get(&77).map(String::as_str),
            Some("/other full command")
        );
    }

    #[test]
    fn render_plain_reply_is_untouched() {
        let (text, parse_mode, markup) = render_reply(Reply::new("hello"));
        assert_eq!(text, "hello");
        assert_eq!(parse_mode, None);
        assert_eq!(markup, None);
    }

    #[test]
    fn render_embeds_hidden_metadata_and_forces_html() {
        let meta: BTreeMap<String, String> = [("page".to_owned(), "2".to_owned())].into();
        let (text, parse_mode, _) = render_reply(Reply::new("body").meta(meta));
        assert!(text.contains(invislink::META_PREFIX));
        assert!(text.ends_with("body"));
        assert_eq!(parse_mode.as_deref(), Some("HTML"));
    }

    #[test]
    fn render_shortens_oversized_keyboard_and_round_trips() {
        let long = format!("/pick {}", "z".repeat(100));
        let grid = vec![vec![InlineKeyboardButton::callback("pick", long.clone())]];
        let (text, _, markup) = render_reply(Reply::new("choose").keyboard(grid));

        // The hidden button-table link is present and decodable.
        let url_start = text.find(invislink::BTN_PREFIX).unwrap();
        let payload: String = text[url_start + invislink::BTN_PREFIX.len()..]
            .chars()
            .take_while(|c| *c != '"')
            .collect();
        let prefixes = invislink::decode_list(&payload).unwrap();

        let markup = markup.unwrap();
        let short = markup["inline_keyboard"][0][0]["callback_data"]
            .as_str()
            .unwrap();
        assert!(short.len() <= keyboard::MAX_CALLBACK_DATA);
        assert_eq!(keyboard::combine(&prefixes, short), long);
    }
}
