//! Model Context Protocol surface: one `extract_assets` tool over stdio.

pub mod handler;
pub mod message;
pub mod stdio;
pub mod tools;

pub use handler::ProtocolHandler;
