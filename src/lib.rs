pub mod auth;
pub mod bot;
pub mod commands;
pub mod config;
pub mod dispatcher;
pub mod events;
pub mod gateway;
pub mod mqtt;
pub mod parser;
pub mod registry;
/// Gateway connection lifecycle: login, logout, delivery and command sync.
pub mod session;
