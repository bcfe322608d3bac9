//! The `Run` handle: the three entry points external collaborators use —
//! open, get/iterate events, and rebuild the index.

use std::path::PathBuf;

use crate::backing_store::BackingStore;
use crate::cache::EventCache;
use crate::capture::CaptureHandle;
use crate::channel::ViewMode;
use crate::event::Event;
use crate::index::{IndexTable, IndexUpdate, update_index};
use crate::packet::BoardId;
use crate::persistence::RunState;
use crate::reassembler::load_event;
use crate::{Error, Result};

/// A run: the complete collection of packets from one board, possibly
/// split across files and time, indexed and randomly accessible by event
/// number.
pub struct Run {
    store: BackingStore,
    index: IndexTable,
    cache: EventCache,
    board_id: Option<BoardId>,
    view: ViewMode,
    capture: Option<CaptureHandle>,
}

impl Run {
    /// Open a run backed by an ordered list of file paths and build its
    /// initial index.
    pub fn open(paths: &[PathBuf], view: ViewMode) -> Result<Self> {
        let mut store = BackingStore::open(paths)?;
        let mut index = IndexTable::default();
        let mut board_id = None;
        update_index(&mut store, &mut index, &mut board_id)?;
        Ok(Self {
            store,
            index,
            cache: EventCache::new(),
            board_id,
            view,
            capture: None,
        })
    }

    /// Open a run backed by a live UDP endpoint: spawns an in-process
    /// capture thread that binds the socket and appends every datagram
    /// verbatim to a freshly created, timestamped backing file, then opens
    /// that file exactly as [`Run::open`] would.
    pub fn open_live(host: &str, port: u16, view: ViewMode) -> Result<Self> {
        let (handle, backing_file) = crate::capture::spawn(host, port)?;
        let mut run = Self::open(&[backing_file], view)?;
        run.capture = Some(handle);
        Ok(run)
    }

    /// Number of indexed events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// `true` iff no events have been indexed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// The board id established by the first packet indexed, if any.
    #[must_use]
    pub fn board_id(&self) -> Option<BoardId> {
        self.board_id
    }

    /// Current global view mode.
    #[must_use]
    pub fn view(&self) -> ViewMode {
        self.view
    }

    /// Fetch event `event_num`, reassembling it from the backing store on
    /// a cache miss.
    pub fn get(&mut self, event_num: u32) -> Result<Option<&Event>> {
        if self.cache.get(event_num).is_none() {
            let board_id = self.board_id.unwrap_or([0; 6]);
            if let Some(event) = load_event(&self.store, &self.index, self.view, board_id, event_num)? {
                self.cache.insert(event);
            }
        }
        Ok(self.cache.get(event_num))
    }

    /// Iterate every indexed event, in arrival order, reassembling as
    /// needed.
    pub fn iter(&mut self) -> Result<Vec<&Event>> {
        let order: Vec<u32> = self.index.arrival_order().to_vec();
        for event_num in &order {
            if self.cache.get(*event_num).is_none() {
                let board_id = self.board_id.unwrap_or([0; 6]);
                if let Some(event) =
                    load_event(&self.store, &self.index, self.view, board_id, *event_num)?
                {
                    self.cache.insert(event);
                }
            }
        }
        Ok(order
            .into_iter()
            .filter_map(|n| self.cache.get(n))
            .collect())
    }

    /// Rescan every backing file from its saved cursor for newly arrived
    /// events. Idempotent when nothing has grown.
    pub fn update_index(&mut self) -> Result<IndexUpdate> {
        update_index(&mut self.store, &mut self.index, &mut self.board_id)
    }

    /// Switch the global view mode. Rewrites every cached event's masks
    /// and cached views in place (the cache is not purged); subsequent
    /// `get`/`iter` calls pick up the new mode automatically for
    /// newly-loaded events too.
    pub fn set_view(&mut self, view: ViewMode) {
        if view == self.view {
            return;
        }
        self.cache.retarget_view(view);
        self.view = view;
    }

    /// `true` iff this run was opened live and its capture thread is
    /// still running. Always `true` for file-backed runs.
    #[must_use]
    pub fn capture_alive(&self) -> bool {
        self.capture.as_ref().is_none_or(CaptureHandle::is_alive)
    }

    /// Surface `Error::CaptureChildLost` if this run was opened live and
    /// its capture thread has exited. Call this (or rely on a stalled
    /// `update_index`) to notice the capture side going away.
    pub fn check_capture(&self) -> Result<()> {
        if self.capture.is_some() && !self.capture_alive() {
            return Err(Error::CaptureChildLost);
        }
        Ok(())
    }

    /// Paths of all backing files, in run order.
    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        self.store.paths()
    }

    /// Stop a live run's capture thread cleanly (closes the backing file
    /// on the writer side). A no-op for file-backed runs.
    pub fn stop_capture(&mut self) {
        if let Some(handle) = self.capture.take() {
            handle.shutdown();
        }
    }

    /// Snapshot this run's state for later restore via [`Run::restore`].
    /// A live run's capture handle is never part of the snapshot — a
    /// restored run is always file-backed.
    #[must_use]
    pub fn to_state(&self) -> RunState {
        RunState {
            paths: self.store.paths(),
            view: self.view,
            cursors: self.store.iter().map(|(_, f)| f.indexed_up_to).collect(),
            index: self.index.clone(),
            board_id: self.board_id,
        }
    }

    /// Serialize this run's state as JSON, suitable for [`Run::deserialize`].
    pub fn serialize(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.to_state()).map_err(Error::Serde)
    }

    /// Restore a run from a snapshot: reopens each backing file by path
    /// (failing with `Error::MissingFile` if one is gone) and rescans from
    /// each saved cursor for anything appended since the snapshot.
    pub fn restore(state: RunState) -> Result<Self> {
        for path in &state.paths {
            if !path.exists() {
                return Err(Error::MissingFile(path.clone()));
            }
        }
        let mut store = BackingStore::open(&state.paths)?;
        for (i, cursor) in state.cursors.into_iter().enumerate() {
            store.get_mut(i).indexed_up_to = cursor;
        }
        let mut index = state.index;
        let mut board_id = state.board_id;
        update_index(&mut store, &mut index, &mut board_id)?;
        Ok(Self {
            store,
            index,
            cache: EventCache::new(),
            board_id,
            view: state.view,
            capture: None,
        })
    }

    /// Deserialize and restore from JSON bytes produced by
    /// [`Run::serialize`].
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let state: RunState = serde_json::from_slice(bytes).map_err(Error::Serde)?;
        Self::restore(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{PacketHeader, encode_packet};

    fn header(event_num: u32, num_samples: u16) -> PacketHeader {
        PacketHeader {
            board_id: [1, 2, 3, 4, 5, 6],
            rel_offset: 0,
            seqnum: 0,
            event_num,
            trigger_low: 0,
            channel_mask: 1,
            num_samples,
            channel: 0,
            total_samples: num_samples,
            drs4_stop: 10,
        }
    }

    fn write_events(path: &PathBuf, events: &[u32]) {
        let mut bytes = Vec::new();
        for &n in events {
            bytes.extend(encode_packet(&header(n, 4), &[1, 2, 3, 4]));
        }
        std::fs::write(path, bytes).unwrap();
    }

    #[test]
    fn open_then_get_and_iterate() {
        let tmpd = tempfile::tempdir().unwrap();
        let path = tmpd.path().join("run.dat");
        write_events(&path, &[7, 8]);
        let mut run = Run::open(&[path], ViewMode::Time).unwrap();
        assert_eq!(run.len(), 2);
        assert!(run.get(7).unwrap().is_some());
        assert!(run.get(8).unwrap().is_some());
        assert!(run.get(9).unwrap().is_none());
        let events = run.iter().unwrap();
        assert_eq!(events.iter().map(|e| e.event_num).collect::<Vec<_>>(), [
            7, 8
        ]);
    }

    #[test]
    fn live_growth_via_update_index() {
        let tmpd = tempfile::tempdir().unwrap();
        let path = tmpd.path().join("run.dat");
        write_events(&path, &[7]);
        let mut run = Run::open(&[path.clone()], ViewMode::Time).unwrap();
        assert_eq!(run.len(), 1);

        let mut bytes = std::fs::read(&path).unwrap();
        bytes.extend(encode_packet(&header(8, 4), &[5, 6, 7, 8]));
        std::fs::write(&path, bytes).unwrap();

        let update = run.update_index().unwrap();
        assert_eq!(update.new_events, 1);
        assert_eq!(run.len(), 2);
        assert!(run.get(8).unwrap().is_some());
    }

    #[test]
    fn set_view_round_trip_is_identity_on_cached_view() {
        let tmpd = tempfile::tempdir().unwrap();
        let path = tmpd.path().join("run.dat");
        write_events(&path, &[7]);
        let mut run = Run::open(&[path], ViewMode::Time).unwrap();
        let before = {
            let e = run.get(7).unwrap().unwrap();
            let c = e.channel(0).unwrap();
            c.raw_payload().to_vec()
        };
        run.set_view(ViewMode::Sca);
        run.set_view(ViewMode::Time);
        let after = {
            let e = run.get(7).unwrap().unwrap();
            let c = e.channel(0).unwrap();
            c.raw_payload().to_vec()
        };
        assert_eq!(before, after);
    }

    #[test]
    fn serialize_deserialize_round_trip_preserves_index() {
        let tmpd = tempfile::tempdir().unwrap();
        let path = tmpd.path().join("run.dat");
        write_events(&path, &[7, 8]);
        let run = Run::open(&[path], ViewMode::Sca).unwrap();
        assert_eq!(run.len(), 2);

        let bytes = run.serialize().unwrap();
        let mut restored = Run::deserialize(&bytes).unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.view(), ViewMode::Sca);
        assert!(restored.get(7).unwrap().is_some());
    }

    #[test]
    fn restore_fails_if_backing_file_is_gone() {
        let tmpd = tempfile::tempdir().unwrap();
        let path = tmpd.path().join("run.dat");
        write_events(&path, &[7]);
        let run = Run::open(&[path.clone()], ViewMode::Time).unwrap();
        let bytes = run.serialize().unwrap();
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(
            Run::deserialize(&bytes),
            Err(Error::MissingFile(_))
        ));
    }
}
