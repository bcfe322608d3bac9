//! Serialize and restore a [`crate::run::Run`]'s state.
//!
//! A snapshot carries the backing file paths, the current view mode, each
//! file's scan cursor, and the index built so far — everything needed to
//! reopen a run without rescanning from byte zero. The bounded event
//! cache is deliberately not part of the snapshot: it's cheap to rebuild
//! and keeping it would tie the format to [`crate::event::Event`]'s shape
//! for no real benefit.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::channel::ViewMode;
use crate::index::IndexTable;
use crate::packet::BoardId;

/// Serializable snapshot of a [`crate::run::Run`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    /// Backing file paths, in run order.
    pub paths: Vec<PathBuf>,
    /// View mode at the time of the snapshot.
    pub view: ViewMode,
    /// Per-file scan cursor (`BackingFile::indexed_up_to`), same order as
    /// `paths`.
    pub cursors: Vec<u64>,
    /// The index built so far.
    pub index: IndexTable,
    /// Board id established at snapshot time, if any.
    pub board_id: Option<BoardId>,
}
