pub mod client;

pub use client::GraphAdapter;
