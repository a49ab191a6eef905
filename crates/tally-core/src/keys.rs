//! Counter-cache key scheme.
//!
//! The format is shared with the external producer that increments the
//! counters, so it must stay byte-for-byte stable:
//!
//! - application chat count: `application:<token>`
//! - chat message count: `application:<token>:chat:<number>`
//!
//! A chat key is composed from its application key, so evicting an
//! application key leaves the chat keys in place. Cascades must evict
//! each chat key on their own.

use crate::token::ApplicationToken;

/// Key holding an application's cached chat count.
pub fn application_key(token: &ApplicationToken) -> String {
    format!("application:{token}")
}

/// Key holding a chat's cached message count.
pub fn chat_key(token: &ApplicationToken, chat_number: i64) -> String {
    format!("{}:chat:{chat_number}", application_key(token))
}

/// Producer-side sequence for the next chat number of an application.
pub fn last_chat_number_key(token: &ApplicationToken) -> String {
    format!("{}:last_chat_number", application_key(token))
}

/// Producer-side sequence for the next message number of a chat.
pub fn last_message_number_key(token: &ApplicationToken, chat_number: i64) -> String {
    format!("{}:last_message_number", chat_key(token, chat_number))
}
