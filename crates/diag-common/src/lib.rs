pub mod agent;
pub mod error;
pub mod mcp_api;
pub mod redis;
