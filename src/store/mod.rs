//! Mirror store + full-text index (spec §3, §4.5).

pub mod fts;
pub mod mirror;
pub mod models;
pub mod schema;

pub use fts::FtsIndex;
pub use mirror::MirrorStore;
pub use schema::run_migrations;
