//! Inbound update normalization.
//!
//! The [`Preprocessor`] converts each raw heterogeneous [`Update`] into at
//! most one [`Context`]: it classifies the event, resolves addressed-command
//! syntax, probes deep-link payloads, resumes pending conversations, and
//! recovers metadata hidden in markup entities. Besides the conversation
//! map it keeps no state; one update in, at most one context out.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use braze_client::Bot;
use braze_core::{Message, Update, User};
use braze_core::{deeplink, invislink, keyboard};

use crate::context::{Context, ContextKind, Conversations, ReplyTarget};

/// Converts raw updates into normalized contexts.
///
/// Owns the process-wide conversation map. Entries have no expiry: a stale
/// fragment persists until the user's next private message consumes it or a
/// handler overwrites it.
#[derive(Clone, Default)]
pub struct Preprocessor {
    conversations: Conversations,
}

impl Preprocessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalizes one update against a bot and its cached identity.
    ///
    /// Returns `None` for event shapes this library does not dispatch.
    pub fn process(&self, bot: Arc<Bot>, me: &User, update: Update) -> Option<Context> {
        let username = me.username.clone().unwrap_or_default();

        if let Some(msg) = update.message_payload() {
            return Some(self.process_message(bot, me, &username, msg));
        }

        if let Some(query) = update.callback_query {
            let msg = query.message?;
            let (btn, meta) = invislink::decode(&msg.entities);
            let data = query.data.unwrap_or_default();
            let data = match &btn {
                Some(prefixes) => keyboard::combine(prefixes, &data),
                None => data,
            };
            let (command, text) = get_command(&data, &username);
            return Some(Context {
                bot,
                bot_user: me.clone(),
                kind: ContextKind::Callback,
                user: Some(query.from),
                prefix: first_token(&text),
                text,
                command,
                target: ReplyTarget::Edit {
                    message_id: msg.message_id,
                },
                chat: Some(msg.chat),
                forwarded: false,
                forward_from: None,
                reply_to_user: None,
                meta: meta.unwrap_or_default(),
                entities: Vec::new(),
                document: None,
                photo: None,
                sticker: None,
                private: AtomicBool::new(false),
                conversations: self.conversations.clone(),
            });
        }

        if let Some(query) = update.inline_query {
            return Some(Context {
                bot,
                bot_user: me.clone(),
                kind: ContextKind::InlineQuery,
                user: Some(query.from),
                chat: None,
                prefix: first_token(&query.query),
                text: query.query,
                command: None,
                target: ReplyTarget::Answer { query_id: query.id },
                forwarded: false,
                forward_from: None,
                reply_to_user: None,
                meta: BTreeMap::new(),
                entities: Vec::new(),
                document: None,
                photo: None,
                sticker: None,
                private: AtomicBool::new(false),
                conversations: self.conversations.clone(),
            });
        }

        None
    }

    fn process_message(
        &self,
        bot: Arc<Bot>,
        me: &User,
        username: &str,
        msg: &Message,
    ) -> Context {
        let target = ReplyTarget::Reply {
            message_id: msg.message_id,
        };

        let mut ctx = Context {
            bot,
            bot_user: me.clone(),
            kind: ContextKind::Message,
            user: msg.from.clone(),
            chat: Some(msg.chat.clone()),
            text: String::new(),
            command: None,
            prefix: String::new(),
            target,
            forwarded: false,
            forward_from: None,
            reply_to_user: None,
            meta: BTreeMap::new(),
            entities: Vec::new(),
            document: None,
            photo: None,
            sticker: None,
            private: AtomicBool::new(false),
            conversations: self.conversations.clone(),
        };

        if let Some(member) = msg.new_chat_members.first() {
            ctx.kind = ContextKind::Join;
            ctx.user = Some(member.clone());
            return ctx;
        }
        if msg.pinned_message.is_some() {
            ctx.kind = ContextKind::Pin;
            return ctx;
        }

        let raw = msg.text.clone().unwrap_or_default();
        let mut text = raw.clone();

        // Forwarded messages never resume as commands; keep only the
        // provenance. Otherwise remember who the quoted message came from.
        if msg.is_forwarded() {
            ctx.forwarded = true;
            ctx.forward_from = msg.forward_from.clone();
            text.clear();
        } else if let Some(replied) = &msg.reply_to_message {
            ctx.reply_to_user = replied.from.clone();
        }

        // Deep-link entry point: `/start <payload>` delivers the payload as
        // if typed.
        if let Some(rest) = strip_start_command(&text, username) {
            text = rest;
        }

        // A bare deep-link token decodes to the command it carries.
        if !text.starts_with('/') {
            let decoded = deeplink::decode(&text);
            if decoded.starts_with('/') {
                text = decoded;
            }
        }

        // Conversation continuation, private chats only. A command message
        // clears the pending fragment without consuming it.
        if msg.chat.is_private()
            && let Some(user_id) = msg.from.as_ref().map(|u| u.id)
        {
            let pending = self.conversations.lock().remove(&user_id);
            if !text.starts_with('/')
                && let Some(pending) = pending
            {
                text = if text.is_empty() {
                    pending
                } else {
                    format!("{pending} {text}")
                };
            }
        }

        // Entities index into the raw text; once normalization rewrote it
        // they no longer line up.
        if text == raw {
            ctx.entities = msg.entities.clone();
        }

        let (command, text) = get_command(&text, username);
        ctx.prefix = first_token(&text);
        ctx.text = text;
        ctx.command = command;

        ctx.document = msg.document.as_ref().map(|d| d.file_id.clone());
        ctx.photo = msg
            .photo
            .iter()
            .max_by_key(|p| p.width * p.height)
            .map(|p| p.file_id.clone());
        ctx.sticker = msg.sticker.as_ref().map(|s| s.file_id.clone());

        ctx
    }
}

/// Parses the normalized command name when `text` addresses this bot.
///
/// `/Name@Target rest` yields the lowercased `name` and the trimmed rest —
/// unless `Target` names a different bot, in which case the whole text is
/// inert and comes back unchanged with no command.
pub fn get_command(text: &str, username: &str) -> (Option<String>, String) {
    let Some(body) = text.strip_prefix('/') else {
        return (None, text.to_owned());
    };
    let (command, rest) = match body.split_once(' ') {
        Some((command, rest)) => (command, rest),
        None => (body, ""),
    };
    let command = command.to_lowercase();
    let command = match command.split_once('@') {
        Some((name, target)) => {
            if !target.eq_ignore_ascii_case(username) {
                return (None, text.to_owned());
            }
            name.to_owned()
        }
        None => command,
    };
    (Some(command), rest.trim_start().to_owned())
}

/// Strips a leading `/start` or `/start@<botname>` token, returning the
/// payload that follows it.
fn strip_start_command(text: &str, username: &str) -> Option<String> {
    let (token, rest) = text.split_once(char::is_whitespace)?;
    let matches = token.eq_ignore_ascii_case("/start")
        || token
            .strip_prefix("/start@")
            .is_some_and(|target| target.eq_ignore_ascii_case(username));
    matches.then(|| rest.to_owned())
}

fn first_token(text: &str) -> String {
    text.split_whitespace().next().unwrap_or_default().to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use braze_client::ApiClient;
    use serde_json::json;

    fn bot() -> Arc<Bot> {
        Arc::new(Bot::new(ApiClient::new().unwrap(), "1234:test").unwrap())
    }

    fn me() -> User {
        User {
            id: 1234,
            username: Some("MyBot".into()),
            ..Default::default()
        }
    }

    fn private_message(text: &str) -> Update {
        serde_json::from_value(json!({
            "update_id": 1,
            "message": {
                "message_id": 10,
                "chat": {"id": 77, "type": "private"},
                "from": {"id": 77, "first_name": "N"},
                "text": text
            }
        }))
        .unwrap()
    }

    fn process(preproc: &Preprocessor, update: Update) -> Option<Context> {
        preproc.process(bot(), &me(), update)
    }

    #[test]
    fn command_parsing_matches_addressing_rules() {
        assert_eq!(
            get_command("/Foo@MyBot arg", "MyBot"),
            (Some("foo".into()), "arg".into())
        );
        assert_eq!(
            get_command("/foo@otherbot arg", "MyBot"),
            (None, "/foo@otherbot arg".into())
        );
        assert_eq!(get_command("plain text", "MyBot"), (None, "plain text".into()));
        assert_eq!(get_command("/solo", "MyBot"), (Some("solo".into()), "".into()));
        assert_eq!(
            get_command("/cmd   padded", "MyBot"),
            (Some("cmd".into()), "padded".into())
        );
    }

    #[test]
    fn plain_message_normalizes() {
        let ctx = process(&Preprocessor::new(), private_message("/Echo Hello There")).unwrap();
        assert_eq!(ctx.kind, ContextKind::Message);
        assert_eq!(ctx.command.as_deref(), Some("echo"));
        assert_eq!(ctx.text, "Hello There");
        assert_eq!(ctx.prefix, "Hello");
        assert_eq!(ctx.target, ReplyTarget::Reply { message_id: 10 });
    }

    #[test]
    fn start_token_unwraps_deeplink_payload() {
        let payload = deeplink::encode("/cmd data");
        let ctx = process(
            &Preprocessor::new(),
            private_message(&format!("/start {payload}")),
        )
        .unwrap();
        assert_eq!(ctx.command.as_deref(), Some("cmd"));
        assert_eq!(ctx.text, "data");

        // Addressed form, case-insensitive bot name.
        let ctx = process(
            &Preprocessor::new(),
            private_message(&format!("/start@mybot {payload}")),
        )
        .unwrap();
        assert_eq!(ctx.command.as_deref(), Some("cmd"));
    }

    #[test]
    fn bare_deeplink_token_decodes_only_to_commands() {
        let ctx = process(
            &Preprocessor::new(),
            private_message(&deeplink::encode("/hidden arg")),
        )
        .unwrap();
        assert_eq!(ctx.command.as_deref(), Some("hidden"));

        // A token that decodes to non-command text stays as typed.
        let token = deeplink::encode("not a command");
        let ctx = process(&Preprocessor::new(), private_message(&token)).unwrap();
        assert_eq!(ctx.command, None);
        assert_eq!(ctx.text, token);
    }

    #[test]
    fn conversation_fragment_is_consumed_once() {
        let preproc = Preprocessor::new();
        preproc.conversations.lock().insert(77, "/cmd data".into());

        let ctx = process(&preproc, private_message("hello")).unwrap();
        assert_eq!(ctx.command.as_deref(), Some("cmd"));
        assert_eq!(ctx.text, "data hello");

        // Second consecutive message: nothing left to prepend.
        let ctx = process(&preproc, private_message("hello")).unwrap();
        assert_eq!(ctx.command, None);
        assert_eq!(ctx.text, "hello");
    }

    #[test]
    fn command_message_clears_pending_fragment_without_consuming() {
        let preproc = Preprocessor::new();
        preproc.conversations.lock().insert(77, "/cmd data".into());

        let ctx = process(&preproc, private_message("/other thing")).unwrap();
        assert_eq!(ctx.command.as_deref(), Some("other"));
        assert!(preproc.conversations.lock().is_empty());
    }

    #[test]
    fn conversation_ignored_in_group_chats() {
        let preproc = Preprocessor::new();
        preproc.conversations.lock().insert(77, "/cmd data".into());
        let update: Update = serde_json::from_value(json!({
            "update_id": 1,
            "message": {
                "message_id": 10,
                "chat": {"id": -5, "type": "group"},
                "from": {"id": 77, "first_name": "N"},
                "text": "hello"
            }
        }))
        .unwrap();
        let ctx = process(&preproc, update).unwrap();
        assert_eq!(ctx.text, "hello");
        assert_eq!(ctx.command, None);
        assert!(preproc.conversations.lock().contains_key(&77));
    }

    #[test]
    fn forwarded_message_is_inert() {
        let update: Update = serde_json::from_value(json!({
            "update_id": 1,
            "message": {
                "message_id": 10,
                "chat": {"id": 77, "type": "private"},
                "from": {"id": 77, "first_name": "N"},
                "forward_from": {"id": 5, "first_name": "Orig"},
                "forward_date": 1700000000,
                "text": "/cmd should not run"
            }
        }))
        .unwrap();
        let ctx = process(&Preprocessor::new(), update).unwrap();
        assert!(ctx.forwarded);
        assert_eq!(ctx.forward_from.as_ref().unwrap().id, 5);
        assert_eq!(ctx.command, None);
        assert_eq!(ctx.text, "");
    }

    #[test]
    fn entities_cleared_when_text_rewritten() {
        let entity = json!({"type": "bold", "offset": 0, "length": 4});
        let make = |text: &str| -> Update {
            serde_json::from_value(json!({
                "update_id": 1,
                "message": {
                    "message_id": 10,
                    "chat": {"id": 77, "type": "private"},
                    "from": {"id": 77, "first_name": "N"},
                    "text": text,
                    "entities": [entity]
                }
            }))
            .unwrap()
        };

        let ctx = process(&Preprocessor::new(), make("kept as is")).unwrap();
        assert_eq!(ctx.entities.len(), 1);

        let payload = deeplink::encode("/cmd x");
        let ctx = process(&Preprocessor::new(), make(&format!("/start {payload}"))).unwrap();
        assert!(ctx.entities.is_empty());
    }

    #[test]
    fn join_and_pin_classify_before_message() {
        let join: Update = serde_json::from_value(json!({
            "update_id": 1,
            "message": {
                "message_id": 10,
                "chat": {"id": -5, "type": "group"},
                "from": {"id": 77, "first_name": "Adder"},
                "new_chat_members": [{"id": 88, "first_name": "Joined"}]
            }
        }))
        .unwrap();
        let ctx = process(&Preprocessor::new(), join).unwrap();
        assert_eq!(ctx.kind, ContextKind::Join);
        assert_eq!(ctx.user.as_ref().unwrap().id, 88);

        let pin: Update = serde_json::from_value(json!({
            "update_id": 2,
            "message": {
                "message_id": 11,
                "chat": {"id": -5, "type": "group"},
                "from": {"id": 77, "first_name": "N"},
                "pinned_message": {
                    "message_id": 3,
                    "chat": {"id": -5, "type": "group"}
                }
            }
        }))
        .unwrap();
        let ctx = process(&Preprocessor::new(), pin).unwrap();
        assert_eq!(ctx.kind, ContextKind::Pin);
    }

    #[test]
    fn media_ids_extracted_with_best_photo() {
        let update: Update = serde_json::from_value(json!({
            "update_id": 1,
            "message": {
                "message_id": 10,
                "chat": {"id": 77, "type": "private"},
                "from": {"id": 77, "first_name": "N"},
                "document": {"file_id": "doc1"},
                "photo": [
                    {"file_id": "small", "width": 90, "height": 60},
                    {"file_id": "large", "width": 800, "height": 600},
                    {"file_id": "mid", "width": 320, "height": 240}
                ],
                "sticker": {"file_id": "stick1"}
            }
        }))
        .unwrap();
        let ctx = process(&Preprocessor::new(), update).unwrap();
        assert_eq!(ctx.document.as_deref(), Some("doc1"));
        assert_eq!(ctx.photo.as_deref(), Some("large"));
        assert_eq!(ctx.sticker.as_deref(), Some("stick1"));
    }

    #[test]
    fn callback_recovers_hidden_table_and_meta() {
        let long = format!("/pick {}", "z".repeat(100));
        let (prefixes, mapping) = keyboard::shorten_lines(&[long.as_str()], 64);
        let meta: BTreeMap<String, String> = [("page".to_owned(), "3".to_owned())].into();
        let fragment = invislink::encode(Some(&prefixes), Some(&meta));
        let urls: Vec<&str> = fragment
            .split("href=\"")
            .skip(1)
            .map(|part| part.split('"').next().unwrap())
            .collect();
        let entities: Vec<serde_json::Value> = urls
            .iter()
            .map(|u| json!({"type": "text_link", "offset": 0, "length": 1, "url": u}))
            .collect();

        let update: Update = serde_json::from_value(json!({
            "update_id": 1,
            "callback_query": {
                "id": "cbq1",
                "from": {"id": 77, "first_name": "N"},
                "data": mapping[&long],
                "message": {
                    "message_id": 42,
                    "chat": {"id": -5, "type": "group"},
                    "entities": entities
                }
            }
        }))
        .unwrap();

        let ctx = process(&Preprocessor::new(), update).unwrap();
        assert_eq!(ctx.kind, ContextKind::Callback);
        assert_eq!(ctx.command.as_deref(), Some("pick"));
        assert_eq!(ctx.text, long["/pick ".len()..]);
        assert_eq!(ctx.meta.get("page").map(String::as_str), Some("3"));
        assert_eq!(ctx.target, ReplyTarget::Edit { message_id: 42 });
    }

    #[test]
    fn inline_query_sets_only_prefix_and_text() {
        let update: Update = serde_json::from_value(json!({
            "update_id": 1,
            "inline_query": {
                "id": "iq9",
                "from": {"id": 77, "first_name": "N"},
                "query": "search words"
            }
        }))
        .unwrap();
        let ctx = process(&Preprocessor::new(), update).unwrap();
        assert_eq!(ctx.kind, ContextKind::InlineQuery);
        assert_eq!(ctx.text, "search words");
        assert_eq!(ctx.prefix, "search");
        assert_eq!(ctx.command, None);
        assert!(ctx.chat.is_none());
        assert_eq!(
            ctx.target,
            ReplyTarget::Answer {
                query_id: "iq9".into()
            }
        );
    }

    #[test]
    fn empty_update_produces_no_context() {
        let update: Update = serde_json::from_value(json!({"update_id": 1})).unwrap();
        assert!(process(&Preprocessor::new(), update).is_none());
    }
}
