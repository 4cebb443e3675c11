// WebSocket endpoint: presence, message fan-out and soft deletion.

pub mod handler;
pub mod protocol;
pub mod session;

pub use handler::router;
pub use session::ConnectionRegistry;
