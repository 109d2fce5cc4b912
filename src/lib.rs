pub mod app;
pub mod checksum;
pub mod config;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod fs_util;
pub mod key;
pub mod manifest;
pub mod output;
pub mod registry;
pub mod transport;
pub mod uri;
