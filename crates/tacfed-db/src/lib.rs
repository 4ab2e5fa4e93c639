//! Database layer for the tacfed federation bridge.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode
//! initialization, and embedded SQL migrations. Every table the bridge
//! touches — the peer registry, the mission change log, and the outbound
//! durable queue — is created through versioned migrations managed here.
//!
//! # Design decisions
//!
//! - **SQLite with WAL mode**: the bridge runs alongside the server
//!   process with no external database; WAL allows concurrent readers
//!   with a single writer, which matches the access pattern (many short
//!   status reads, one writer per peer loop).
//! - **`r2d2` connection pool**: bounded connection reuse without manual
//!   lifetime management. Loops check a connection out, do one
//!   read-modify-write, and return it — never holding one across socket
//!   I/O.
//! - **Embedded migrations**: SQL files compiled in via `include_str!`
//!   so the schema ships with the binary and cannot drift from the code.

mod migrations;
mod pool;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
