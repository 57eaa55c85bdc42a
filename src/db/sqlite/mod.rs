mod attachments;
mod common;
mod conversations;
mod entries;
mod memberships;
mod tasks;

pub use attachments::SqliteAttachmentRepo;
pub use conversations::SqliteConversationRepo;
pub use entries::SqliteEntryRepo;
pub use memberships::{SqliteMembershipRepo, SqliteOwnershipTransferRepo};
pub use tasks::SqliteTaskRepo;
