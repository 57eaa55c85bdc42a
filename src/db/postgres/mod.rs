mod attachments;
mod conversations;
mod entries;
mod memberships;
mod tasks;

pub use attachments::PostgresAttachmentRepo;
pub use conversations::PostgresConversationRepo;
pub use entries::PostgresEntryRepo;
pub use memberships::{PostgresMembershipRepo, PostgresOwnershipTransferRepo};
pub use tasks::PostgresTaskRepo;
