// coedit-sync: real-time synchronization of a shared document and its
// presence state through a collaboration hub.

pub mod awareness;
pub mod channel;
pub mod color;
pub mod compaction;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod events;
pub mod hub;
pub mod session;

pub use awareness::{AwarenessChange, AwarenessManager, Participant};
pub use color::ColorPool;
pub use driver::{spawn_session, SessionHandle};
pub use engine::{DocChange, DocumentEngine, YDoc};
pub use error::SyncError;
pub use events::{EventEmitter, SubscriptionId};
pub use hub::{ConnectionState, HubTransport, ReconnectPolicy};
pub use session::{Session, SessionIdentity, SessionOptions};
