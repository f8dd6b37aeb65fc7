//! Development HTTP server for kiln.
//!
//! Serves compiled modules straight out of the branch cache, compiling on
//! demand, and keeps browsers honest with etags that follow the source
//! file rather than the compiled artifact. A reload event stream and a
//! static fallback for plain project files round out the surface.

pub mod config;
pub mod error;
pub mod routes;
pub mod server;
pub mod ua;

pub use config::ServerConfig;
pub use error::ErrorBody;
pub use server::{DevServer, RequestId};
pub use ua::{detect_runtime, profile_for_agent};
