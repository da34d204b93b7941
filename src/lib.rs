pub mod color_catalog;
pub mod config;
pub mod constants;
pub mod engine;
pub mod host;
pub mod lobby;
pub mod mirror;
pub mod protocol;
pub mod puzzle_module;
pub mod replicated;
pub mod rng;
pub mod session;
pub mod types;
pub mod world;
