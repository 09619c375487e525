//! Domain services behind the WebSocket gateway.
//!
//! ARCHITECTURE
//! ============
//! Service modules own business logic and persistence concerns so the
//! gateway can stay focused on frame parsing, dispatch, and delivery.

pub mod chat;
pub mod mutation;
pub mod notify;
pub mod rooms;
