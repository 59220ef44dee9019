//! Plain data records passed between the gateway, its clients and callers.
//!
//! Nothing here is persisted by the gateway itself; records are handed back
//! to the caller, who owns them.

pub mod listing;
pub mod object;
