//! Resilient duplex streaming client.
//!
//! framelink keeps one logical connection to a streaming endpoint alive over
//! an unreliable session, sends binary payloads out as tagged frames and
//! fans structured JSON messages in to listeners.
//!
//! # Crate Structure
//!
//! - [`transport`]: Session contract, in-memory and WebSocket transports
//! - [`frame`]: Frame encoding, inbound decoding and listener dispatch
//! - [`client`]: Connection manager with bounded automatic reconnect
//!
//! # Example
//!
//! ```no_run
//! use framelink::client::{ClientConfig, ConnectionManager};
//! use framelink::transport::WebSocketTransport;
//!
//! # async fn run() {
//! let mut client = ConnectionManager::new(WebSocketTransport::new(), ClientConfig::default());
//! client.on_message(|message| println!("{message}"));
//! client.connect("ws://127.0.0.1:8000/ws/detect");
//! loop {
//!     client.run_once().await;
//!     if client.is_open() {
//!         client.send_frame(b"payload");
//!     }
//! }
//! # }
//! ```

/// Re-export transport types.
pub mod transport {
    pub use framelink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use framelink_frame::*;
}

/// Re-export client types.
pub mod client {
    pub use framelink_client::*;
}
