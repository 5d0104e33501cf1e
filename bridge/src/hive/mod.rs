pub mod broadcast;
pub mod client;
pub mod types;
pub mod watcher;
