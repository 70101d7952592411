//! Storage and operation core of a dual-pane file manager.
//!
//! What lives here:
//! - A polymorphic path facade ([`path::VfsPath`]) over local POSIX, SSH/SFTP,
//!   S3, and archive-content backends, with per-backend capability flags.
//! - An archive virtual filesystem ([`archive`]): ZIP/TAR handlers with cached
//!   member indexes, virtual directory synthesis, and an LRU+TTL handler cache.
//! - An S3 backend with operation-keyed API-call caching ([`path::s3`]).
//! - A background operation framework ([`ops`]): copy/move/delete and archive
//!   create/extract coordinated by a deterministic task state machine with
//!   confirmation, conflict resolution, progress, and cooperative cancellation.
//! - A throttled progress model ([`progress`]).
//!
//! The rendering toolkit, dialogs, and event loop are the host application's
//! business: this crate exposes the [`ops::TaskUi`] trait, progress
//! callbacks, and dirty-redraw signaling instead of implementing any UI.

pub mod archive;
pub mod error;
pub mod format;
pub mod ops;
pub mod path;
pub mod progress;

mod ignore_poison;

pub use error::VfsError;
pub use path::{PathStat, Scheme, SearchStrategy, VfsPath};
pub use progress::{OperationProgress, OperationType, ProgressManager};
