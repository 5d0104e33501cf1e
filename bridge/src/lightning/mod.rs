pub mod address;
pub mod client;
pub mod gen;
pub mod payer;
pub mod watcher;
