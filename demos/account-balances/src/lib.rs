//! Account Balances Demo
//!
//! A host process wiring the commit serializer to two projectors over PostgreSQL:
//!
//! ```text
//! InMemoryEventStore ──► CommitSerializer ──┬─► AccountBalances ── balances + checkpoint (one transaction)
//!                                           └─► AuditTrail ──────── audit row; serializer writes checkpoint
//! ```
//!
//! Running the binary twice against the same database shows resumption: the
//! second run finds every checkpoint at the head of the log and applies nothing.

pub mod config;
pub mod projection;
pub mod seed;

pub use config::DemoConfig;
pub use projection::{AccountBalances, AccountEvent, AuditTrail};
pub use seed::seed_commits;
