//! Cooperative concurrency and resource model.

pub mod mailbox;
pub mod scheduler;

pub use mailbox::{Mailbox, MailboxRef};
pub use scheduler::Scheduler;
