//! Edit proposals and their transactional application to project files.
//!
//! A [`PatchSession`] moves a batch of [`EditProposal`]s through preview and
//! confirmation; the [`PatchApplier`] splices each confirmed range under a
//! per-file lock, keeps a `.backup` until the write is promoted, and re-indexes
//! the touched file.

pub mod applier;
pub mod error;
pub mod generate;
pub mod lock;
pub mod proposal;
pub mod session;

pub use applier::{ContentWriter, PatchApplier, Reindexer, RenameWriter};
pub use error::{PatchError, Result};
pub use generate::{GenerationService, LlmGenerator};
pub use proposal::{EditProposal, parse_proposals};
pub use session::{ApplyReport, PatchSession, PatchState, ProposalOutcome};
