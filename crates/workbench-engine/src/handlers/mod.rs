//! Event handlers
//!
//! Each handler processes one unit of work (a status event, an account
//! reconciliation request) statelessly; all coordination happens through the
//! record store's conditional writes.

mod account;
mod status;

pub use account::AccountHandler;
pub use status::{ReconcileOutcome, StatusHandler};
