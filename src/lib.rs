pub mod api;
pub mod cli;
pub mod kv;
pub mod objects;
