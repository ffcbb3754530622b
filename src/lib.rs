//! Session booking engine speaking the PostgreSQL wire protocol.
//!
//! Coaches publish availability as whole days carved into a fixed slot
//! catalog; clients book sessions against those slots. State lives in
//! memory behind per-coach locks and survives restarts through a
//! per-tenant write-ahead log. Mutations fan out to LISTEN/NOTIFY
//! subscribers as JSON events.

pub mod catalog;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod reaper;
pub mod sql;
pub mod tenant;
pub mod tls;
pub mod wal;
pub mod wire;
