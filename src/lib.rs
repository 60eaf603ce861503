pub mod config;
pub mod craft;
pub mod database;
pub mod events;
pub mod interview;
pub mod llm_client;
pub mod profile;
pub mod runtime;
pub mod server;
