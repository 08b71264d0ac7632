pub mod backend;
pub mod config;
pub mod live_adapter;
pub mod tools;
