//! Client-side engine: board reducer, undo history, hit testing, and the
//! sync client that ties them to the frame protocol.
//!
//! Nothing here touches a socket or a clock. Callers feed events and
//! timestamps in and send the returned frames themselves.

pub mod board;
pub mod history;
pub mod hit;
pub mod sync;

pub use board::{BoardEvent, BoardState, HistoryPolicy, Origin, Preview, Tool, ToolAction};
pub use sync::{SyncClient, SyncNotice};
