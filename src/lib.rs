//! Real-time collaborative canvas sync.
//!
//! The server half (`routes`, `services`, `store`) authorizes peers, merges
//! durable updates last-writer-wins, persists them with revision checks and
//! fans the result out to every joined connection. The `client` half is the
//! local board model a drawing surface drives: tools, undo history and the
//! sync adapter that turns board events into protocol frames.

pub mod client;
pub mod config;
pub mod db;
pub mod element;
pub mod frame;
pub mod merge;
pub mod protocol;
pub mod rate_limit;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
