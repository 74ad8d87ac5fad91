//! # Session Module
//!
//! Complete broker session management for mqttscope: connection lifecycle,
//! subscription registry and the feed into the topic tree.
//!
//! ## Why This Module Exists
//!
//! Everything stateful about talking to a broker lives here, behind one
//! owned engine object. The UI layer (or any other consumer) only ever
//! calls the handle and reads immutable snapshots, which keeps the
//! transport, the registry invariants and the failure policy in one place.
//!
//! ## Module Architecture
//!
//! ```text
//! session/
//! ├── config.rs          - Connection settings and rumqttc option building
//! ├── engine.rs          - Lifecycle state, registry and snapshot publishing
//! ├── error.rs           - User-facing error taxonomy and classification
//! ├── session_handle.rs  - Public API: connect/disconnect/(un)subscribe
//! └── session_worker.rs  - Task owning the rumqttc client and event loop
//! ```
//!
//! ## Lifecycle Policy
//!
//! `Disconnected -> Connecting -> Connected -> Disconnected`, nothing else.
//! There is no reconnecting state: every disconnect, whatever its cause,
//! ends the session, clears the registry and resets the tree. Connect
//! attempts are bounded by a 10 second deadline racing the broker's
//! CONNACK and the first transport error; exactly one of the three resolves
//! the pending call. Post-connect failures are never thrown at the caller,
//! they are observable as state only.

pub mod config;
pub mod engine;
pub mod error;
pub mod session_handle;
mod session_worker;

pub use config::{SessionConfig, TransportKind, CONNECT_DEADLINE, KEEP_ALIVE, MQTT_WS_PATH};
pub use engine::{ConnectionState, SessionSnapshot, Subscription};
pub use error::SessionError;
pub use session_handle::SessionHandle;
