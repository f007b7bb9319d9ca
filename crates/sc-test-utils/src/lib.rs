//! # Session Coordinator Test Utilities
//!
//! Mocks for every external collaborator of the coordinator, so the core can
//! be exercised without a signaling server, a backend, or media devices.
//!
//! ## Modules
//!
//! - `mock_backend` - in-memory `BackendAuthority` recording every call
//! - `mock_signaling` - scripted `SignalingConnector` with a server-side view
//!   of each accepted connection
//! - `mock_peer` - `PeerConnection` recording every call
//! - `mock_media` - recorder and speech-recognition capabilities driven by
//!   the test
//! - `fixtures` - configuration and session snapshots
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sc_test_utils::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_example() {
//!     let connector = MockConnector::builder().refuse(2).build();
//!     let backend = MockBackend::builder()
//!         .with_session(TestSession::active("s-1").with_host("host").build())
//!         .build();
//!
//!     // spawn components with the mocks and drive the server side:
//!     let mut server = connector.next_connection().await;
//!     let join = server.next_envelope().await.unwrap();
//! }
//! ```

pub mod fixtures;
pub mod mock_backend;
pub mod mock_media;
pub mod mock_peer;
pub mod mock_signaling;

// Re-export commonly used items
pub use fixtures::*;
pub use mock_backend::*;
pub use mock_media::*;
pub use mock_peer::*;
pub use mock_signaling::*;
