//! Gerrit `stream-events` schema.
//!
//! Provides:
//! - `GerritEvent` - One stream record, decodable by the core decoder
//! - `EventBody` - Per-kind payloads, with a fallback for unknown kinds
//! - The nested JSON records (`Change`, `PatchSet`, `Account`, ...)
//!
//! Field names follow Gerrit's JSON documentation.

pub mod event;
mod lenient;
pub mod records;

pub use event::{EventBody, GerritEvent};
pub use records::{
    Account, Approval, Change, ChangeStatus, Dependency, File, FileType, Label, Message,
    PatchSet, PatchSetComment, PatchSetKind, RefUpdate, SubmitRecord, TrackingId,
};
