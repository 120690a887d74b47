//! Persistence layer
//!
//! Two databases: a process-wide registry of known projects and a per
//! working-directory project database holding all tasks. Project access is
//! serialized through a single actor; every transition is one transaction.

mod error;
mod handle;
mod lock;
mod messages;
mod paths;
mod project;
mod registry;

pub use error::{StoreError, StoreResult};
pub use handle::StoreHandle;
pub use lock::ProjectLock;
pub use messages::StoreCommand;
pub use paths::{ORC_DIR, ProjectPaths};
pub use project::{ProjectStore, Snapshot};
pub use registry::{ProjectEntry, Registry};
