pub mod archive;
pub mod cache;
pub mod checksum;
pub mod cleanup;
pub mod commands;
pub mod config;
pub mod error;
pub mod http;
pub mod installer;
pub mod manifest;
pub mod package;
pub mod publisher;
pub mod registry;
pub mod resolver;
pub mod runtime;
pub mod settings;
pub mod update;

pub use error::BpmError;
