//! Buffer ownership tracking.
//!
//! Buffer memory itself is allocated and mapped by the driver or a peer
//! element. This module only tracks who owns each buffer at any instant:
//!
//! - [`BufferTable`]: per-port ledger with busy/free state and bounded
//!   blocking find/acquire/remove/drain operations
//! - [`TableStats`]: usage counters for monitoring

mod buffer_table;

pub use buffer_table::{BufferTable, TableStats};
