#![warn(clippy::all, rust_2018_idioms)]

pub mod atlas;
pub mod config;
pub mod map;
pub mod maps_api;
pub mod server;

pub use atlas::service::AtlasService;
pub use config::Config;
