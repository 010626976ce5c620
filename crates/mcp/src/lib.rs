// MCP (Model Context Protocol) surface for toolgate, plus the toolkits
// shipped with it

pub mod protocol;
pub mod server;
pub mod toolkits;

pub use server::McpServer;
