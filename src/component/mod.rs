//! Component state, ports and the shared per-instance context.
//!
//! | Type | Role |
//! |------|------|
//! | [`ComponentState`] | Driver-confirmed lifecycle state |
//! | [`PortDirection`], [`PortStatus`] | Per-port flags |
//! | [`StateController`] | Bounded waits on status predicates |
//! | [`ComponentContext`] | Callback target owning tables, queue and controller |

mod context;
mod controller;
mod port;
mod state;

pub use context::ComponentContext;
pub use controller::{ComponentStatus, StateController};
pub use port::{PortDirection, PortStatus};
pub use state::ComponentState;
