pub mod conversation;
pub mod message;
pub mod mutation;
pub mod record;

pub use conversation::{ConversationSummary, MessagePreview, CONVERSATION_TYPE};
pub use message::{CachedMessage, MessageDraft, MESSAGE_TYPE};
pub use mutation::{
    LocalRef, MutationDescriptor, MutationKind, PendingMutation, PENDING_MUTATION_TYPE,
};
pub use record::{CollectionFootprint, RecordDraft, StorageFootprint, StoredRecord};
