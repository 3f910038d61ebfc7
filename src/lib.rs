pub mod commands;
pub mod config;
pub mod datastore;
pub mod error;
pub mod plugin;
pub mod plugins;
pub mod protocol;
pub mod proxy;
pub mod state;
pub mod transport;
pub mod web;
