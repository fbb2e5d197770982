//! Collection names established at store-open time. Collections are never
//! created implicitly at runtime; looking up an unconfigured name is an
//! error.

pub const CONVERSATIONS: &str = "conversations";
pub const MESSAGES: &str = "messages";
pub const PENDING_MUTATIONS: &str = "pending_mutations";
pub const API_RESPONSE_CACHE: &str = "api_response_cache";

/// The collections every store opens with, before host-configured extras.
pub fn base_collections() -> Vec<String> {
    vec![
        CONVERSATIONS.to_string(),
        MESSAGES.to_string(),
        PENDING_MUTATIONS.to_string(),
        API_RESPONSE_CACHE.to_string(),
    ]
}
