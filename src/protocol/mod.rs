//! # Protocol Collaborators
//!
//! The boundaries a session talks across: the dispatcher that executes named
//! operations, the policy store that scopes a clearance's entitlements, and
//! the diagnostics sink that swallows out-of-band error reports.
pub mod diagnostics;
pub mod dispatcher;
pub mod policy;
