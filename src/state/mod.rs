// Topic state store: last-known payload per topic

mod entry;
mod store;

pub use entry::{EntryOrigin, TopicEntry};
pub use store::TopicStateStore;

#[cfg(test)]
mod tests;
