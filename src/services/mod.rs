//! Domain services used by websocket and HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own coordination and persistence concerns so route
//! handlers can stay focused on protocol translation and auth plumbing.

pub mod cache;
pub mod canvas;
pub mod session;
pub mod subscription;
