pub mod backend;
pub mod chat;
pub mod config;
mod config_env;
pub mod health;
pub mod llm;
pub mod logging;
pub mod models;
pub mod repos;
