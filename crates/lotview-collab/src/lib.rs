pub mod config;
pub mod conflict;
pub mod protocol;
pub mod registry;
pub mod service;
pub mod transport;

pub use config::CollabConfig;
pub use conflict::RecordCache;
pub use protocol::{
    CollaborationUser, ConflictReport, FieldConflict, LiveUpdate, UpdateKind, UpdateOrigin,
    UserIdentity, UserStatus,
};
pub use registry::Subscription;
pub use service::CollaborationService;
pub use transport::{MemoryRemote, MemoryTransport, SupabaseTransport, Transport};
