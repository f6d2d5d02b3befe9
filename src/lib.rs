pub mod bus;
pub mod chat;
pub mod client;
pub mod config;
pub mod entity;
pub mod error;
pub mod server;
pub mod store;

#[cfg(test)]
mod test_helpers;
