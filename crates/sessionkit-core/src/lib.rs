//! sessionkit Core Types and Traits
//!
//! This crate provides the transport-agnostic session layer:
//! - The `Store` trait every backend implements, and its error vocabulary
//! - `MemoryStore`, the in-process backend
//! - `Manager` and `Session`, which resolve a session from a cookie-like token
//! - Session identifier generation and value coercion helpers
//!
//! Backends with buffered commit semantics live in `sessionkit-redis` and
//! `sessionkit-postgres`.

pub mod coerce;
pub mod cookie;
pub mod error;
pub mod id;
pub mod manager;
pub mod memory;
pub mod session;
pub mod store;
pub mod value;

pub use cookie::{Cookie, CookieOptions, SameSite};
pub use error::{Error, ErrorKind, Result};
pub use id::{DEFAULT_ID_LENGTH, IdCodec};
pub use manager::{Manager, ManagerOptions};
pub use memory::MemoryStore;
pub use session::Session;
pub use store::{Store, StoreError, StoreResult};
pub use value::Value;
