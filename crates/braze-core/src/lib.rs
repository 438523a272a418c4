//! # Braze Core
//!
//! Protocol-level building blocks for the braze bot library: the wire model
//! for inbound updates, the error taxonomy shared by every layer, and the
//! payload codecs that smuggle structured data through the remote service's
//! markup.
//!
//! Nothing in this crate performs I/O; everything here is deterministic and
//! directly testable.
//!
//! ## Modules
//!
//! - [`model`] — serde mirrors of the update stream and reply markup
//! - [`error`] — [`ApiError`] / [`ApiResult`]
//! - [`deeplink`] — `start=` payload codec and deep-link URL builders
//! - [`invislink`] — hidden-link metadata codec over markup entities
//! - [`keyboard`] — shared-prefix compression for oversized button payloads

pub mod deeplink;
pub mod error;
pub mod invislink;
pub mod keyboard;
pub mod model;

pub use error::{ApiError, ApiResult};
pub use model::{
    CallbackQuery, Chat, Document, InlineKeyboard, InlineKeyboardButton, InlineQuery, Message,
    MessageEntity, PhotoSize, Sticker, Update, User,
};
