//! Per-channel raw payload, mask intervals, and the materialized
//! time-/capacitor-ordered cached view.

use crate::flags::{MASKED_DATA, NOT_DATA, SCA_LENGTH};

/// Which coordinate system a channel's cached view is expressed in.
///
/// * `Time`: index `i` maps to raw-payload index `i`. Index 0 is the stop
///   sample; the sequence reads forward in physical time.
/// * `Sca`: index `i` maps to raw-payload index `(i - drs4_stop) mod
///   1024`. Index 0 is capacitor 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ViewMode {
    /// Time-ordered: starts at the DRS4 stop capacitor.
    Time,
    /// Capacitor-ordered (SCA): starts at absolute capacitor 0.
    Sca,
}

/// A half-open mask interval `[low, high)`, normalized so `0 <= low <
/// high <= 1024` with no wraparound (wraparound is expressed as two
/// intervals).
pub type MaskInterval = (u16, u16);

/// One channel's reconstructed waveform within an event.
pub struct Channel {
    /// DRS4 stop capacitor index (0..1023) declared by the first fragment
    /// seen for this channel.
    pub drs4_stop: u16,
    /// Full payload length declared by the first fragment.
    total_samples: u16,
    /// Raw payload, length `total_samples`, indexed in time order. Gaps
    /// left by missing fragments are zero until the cache is built (the
    /// cache, not the raw buffer, carries `NOT_DATA`).
    raw: Vec<i16>,
    /// Which raw positions have actually been written by a fragment.
    written: Vec<bool>,
    masks: Vec<MaskInterval>,
    cached_view: [i16; SCA_LENGTH],
    cache_valid: bool,
    /// View mode the current `cached_view` contents were built for. The
    /// cache must be rebuilt not only when stale but also when a caller
    /// requests a different mode than the one last materialized.
    cached_mode: Option<ViewMode>,
}

impl Channel {
    /// Allocate a new channel on first fragment arrival.
    #[must_use]
    pub fn new(drs4_stop: u16, total_samples: u16) -> Self {
        Self {
            drs4_stop,
            total_samples,
            raw: vec![0i16; total_samples as usize],
            written: vec![false; total_samples as usize],
            masks: Vec::new(),
            cached_view: [NOT_DATA; SCA_LENGTH],
            cache_valid: false,
            cached_mode: None,
        }
    }

    /// Declared full payload length for this (event, channel).
    #[must_use]
    pub fn len(&self) -> usize {
        self.total_samples as usize
    }

    /// `true` iff this channel has zero declared samples (never happens
    /// in practice: the first fragment always carries `total_samples`,
    /// but kept for API symmetry with `len`).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total_samples == 0
    }

    /// Write one fragment's samples at `rel_offset` into the raw buffer.
    ///
    /// Returns `false` (and writes nothing) if `rel_offset + samples.len()
    /// > total_samples`: per spec.md this is documented firmware-bug
    /// territory, and the policy is to drop the fragment and let the
    /// caller log a warning, never to abort the run. Duplicate writes
    /// (overlapping a previous fragment) simply overwrite.
    #[must_use]
    pub fn write_fragment(&mut self, rel_offset: u16, samples: &[i16]) -> bool {
        let start = rel_offset as usize;
        let end = start + samples.len();
        if end > self.raw.len() {
            return false;
        }
        self.raw[start..end].copy_from_slice(samples);
        self.written[start..end].fill(true);
        self.cache_valid = false;
        true
    }

    /// Raw payload buffer, length [`Channel::len`], in time order. Gaps
    /// not yet written read as `0`, not `NOT_DATA` — callers wanting the
    /// flag-bit convention should use [`Channel::cached_view`].
    #[must_use]
    pub fn raw_payload(&self) -> &[i16] {
        &self.raw
    }

    /// The length-1024 materialized view in `mode`, rebuilding it first if
    /// stale or if the cache currently holds a different mode's layout.
    /// Masks are overlaid exactly as currently stored: a caller switching
    /// view modes is expected to have already called
    /// [`Channel::retarget_masks`] (as [`crate::cache::EventCache::retarget_view`]
    /// does), otherwise the overlay is applied in whatever coordinate
    /// system the masks happen to be in.
    pub fn cached_view(&mut self, mode: ViewMode) -> &[i16; SCA_LENGTH] {
        if !self.cache_valid || self.cached_mode != Some(mode) {
            self.build_cache(mode);
        }
        &self.cached_view
    }

    /// Read the already-materialized view without forcing a rebuild.
    ///
    /// Callers that only ever see a `Channel` after the reassembler has
    /// already forced a cache build for the run's active view (e.g.
    /// [`crate::pedestal`], walking events returned by `Run::iter`) can use
    /// this to avoid needing a mutable borrow. Returns `None` if nothing
    /// has been cached yet.
    #[must_use]
    pub fn cached_view_if_built(&self) -> Option<&[i16; SCA_LENGTH]> {
        self.cache_valid.then_some(&self.cached_view)
    }

    /// Append a mask interval. Inputs outside `[0, 1024)` are normalized
    /// into wraparound pairs, matching the original's `mask()` contract.
    /// `low == high` is a silent no-op; `low > high` is rejected outright,
    /// matching the original's `mask()` rejection (`packette_stream.py`) —
    /// the wraparound contract only ever widens an interval, it never
    /// reverses one, so this can never panic on the cache-overlay slice
    /// even on malformed trusted input. A span wider than the ring is a
    /// programming error (trusted engine/firmware input, not user input,
    /// hence `debug_assert!` rather than a `Result`).
    pub fn mask(&mut self, low: i32, high: i32) {
        if low >= high {
            return; // low == high: no-op; low > high: rejected, not reversed
        }
        debug_assert!(
            (high - low).unsigned_abs() as usize <= SCA_LENGTH,
            "mask span exceeds capacitor ring length"
        );
        for interval in normalize_mask(low, high) {
            self.masks.push(interval);
        }
        self.cache_valid = false;
    }

    /// Drop all mask intervals and invalidate the cache.
    pub fn clear_masks(&mut self) {
        self.masks.clear();
        self.cache_valid = false;
    }

    /// Current mask intervals, in the channel's current coordinate
    /// system.
    #[must_use]
    pub fn masks(&self) -> &[MaskInterval] {
        &self.masks
    }

    /// Rewrite every mask interval from one coordinate system to the
    /// other in place, without rebuilding the cache (the caller rebuilds
    /// once after calling this, via [`Channel::cached_view`]).
    ///
    /// `to` is the view the masks are being converted *into*.
    pub fn retarget_masks(&mut self, to: ViewMode) {
        let stop = self.drs4_stop as i32;
        let shift = match to {
            ViewMode::Sca => stop,
            ViewMode::Time => -stop,
        };
        let old = std::mem::take(&mut self.masks);
        for (low, high) in old {
            for interval in normalize_mask(low as i32 + shift, high as i32 + shift) {
                self.masks.push(interval);
            }
        }
        self.cache_valid = false;
    }

    fn build_cache(&mut self, mode: ViewMode) {
        self.cached_view = [NOT_DATA; SCA_LENGTH];
        match mode {
            ViewMode::Time => {
                for (i, (&v, &w)) in self.raw.iter().zip(self.written.iter()).enumerate() {
                    if w {
                        self.cached_view[i] = v;
                    }
                }
            }
            ViewMode::Sca => {
                for (i, (&v, &w)) in self.raw.iter().zip(self.written.iter()).enumerate() {
                    if w {
                        let dest = (i + self.drs4_stop as usize) % SCA_LENGTH;
                        self.cached_view[dest] = v;
                    }
                }
            }
        }
        for &(low, high) in &self.masks {
            for slot in &mut self.cached_view[low as usize..high as usize] {
                *slot = MASKED_DATA;
            }
        }
        self.cache_valid = true;
        self.cached_mode = Some(mode);
    }
}

/// Normalize a possibly out-of-range `[low, high)` span into one or two
/// in-range `(u16, u16)` intervals on the 1024-capacitor ring, matching
/// `packette_stream.py`'s `mask()`/`masksToSCA`/`masksToTime` wraparound
/// handling.
fn normalize_mask(low: i32, high: i32) -> Vec<MaskInterval> {
    const LEN: i32 = SCA_LENGTH as i32;
    debug_assert!(low < high);
    if low < 0 && high <= 0 {
        return normalize_mask(low + LEN, high + LEN);
    }
    if low < 0 {
        // Partial underflow: split at the ring boundary.
        let mut out = normalize_mask(low + LEN, LEN);
        out.extend(normalize_mask(0, high));
        return out;
    }
    if low >= LEN && high >= LEN {
        return normalize_mask(low - LEN, high - LEN);
    }
    if high > LEN {
        let mut out = vec![(low as u16, LEN as u16)];
        out.extend(normalize_mask(0, high - LEN));
        return out;
    }
    vec![(low as u16, high as u16)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_view_starts_at_stop() {
        let mut c = Channel::new(300, 4);
        assert!(c.write_fragment(0, &[10, 11, 12, 13]));
        let v = *c.cached_view(ViewMode::Time);
        assert_eq!(v[0], 10);
        assert_eq!(v[3], 13);
        assert_eq!(v[4] & 0x4, 0x4); // NOT_DATA beyond written range
    }

    #[test]
    fn sca_view_wraps_at_1024() {
        let mut c = Channel::new(1023, 4);
        assert!(c.write_fragment(0, &[10, 11, 12, 13]));
        let v = *c.cached_view(ViewMode::Sca);
        assert_eq!(v[1023], 10);
        assert_eq!(v[0], 11);
        assert_eq!(v[1], 12);
        assert_eq!(v[2], 13);
    }

    #[test]
    fn drs4_stop_zero_and_max_wrap_correctly() {
        let mut c0 = Channel::new(0, 2);
        c0.write_fragment(0, &[5, 6]);
        let v0 = *c0.cached_view(ViewMode::Sca);
        assert_eq!(v0[0], 5);
        assert_eq!(v0[1], 6);

        let mut cmax = Channel::new(1023, 2);
        cmax.write_fragment(0, &[5, 6]);
        let vmax = *cmax.cached_view(ViewMode::Sca);
        assert_eq!(vmax[1023], 5);
        assert_eq!(vmax[0], 6);
    }

    #[test]
    fn fragment_overflow_is_dropped_not_fatal() {
        let mut c = Channel::new(0, 4);
        assert!(!c.write_fragment(2, &[1, 2, 3])); // 2+3 > 4
        let v = *c.cached_view(ViewMode::Time);
        assert!(v.iter().take(4).all(|&x| x & 0x4 == 0x4));
    }

    #[test]
    fn duplicate_fragment_overwrites() {
        let mut c = Channel::new(0, 4);
        c.write_fragment(0, &[1, 2, 3, 4]);
        c.write_fragment(0, &[9, 9, 9, 9]);
        let v = *c.cached_view(ViewMode::Time);
        assert_eq!(&v[0..4], &[9, 9, 9, 9]);
    }

    #[test]
    fn mask_normalizes_negative_span() {
        let mut c = Channel::new(5, 4);
        c.mask(-15, 15);
        assert!(
            c.masks()
                .iter()
                .any(|&(l, h)| l == 1024 - 15 && h == 1024)
        );
        assert!(c.masks().iter().any(|&(l, h)| l == 0 && h == 15));
    }

    #[test]
    fn mask_noop_when_equal() {
        let mut c = Channel::new(0, 4);
        c.mask(5, 5);
        assert!(c.masks().is_empty());
    }

    #[test]
    fn mask_rejects_reversed_span_instead_of_panicking() {
        let mut c = Channel::new(0, 4);
        c.mask(15, 5);
        assert!(c.masks().is_empty());
        // Must not panic on the cache-overlay slice either.
        let _ = c.cached_view(ViewMode::Time);
    }

    #[test]
    fn retarget_masks_round_trip_is_identity() {
        let mut c = Channel::new(300, 4);
        c.mask(-15, 15);
        let before = c.masks().to_vec();
        c.retarget_masks(ViewMode::Sca);
        c.retarget_masks(ViewMode::Time);
        assert_eq!(c.masks(), before);
    }

    #[test]
    fn normalize_mask_always_produces_valid_intervals() {
        use rand::Rng;
        let mut rng = rand::rng();
        for _ in 0..500 {
            let low: i32 = rng.random_range(-2048..2048);
            let span: i32 = rng.random_range(1..=1024);
            let high = low + span;
            for (l, h) in normalize_mask(low, high) {
                assert!(
                    l < h && h as usize <= SCA_LENGTH,
                    "invalid interval ({l}, {h}) from mask({low}, {high})"
                );
            }
        }
    }

    #[test]
    fn mask_overlay_wins_over_data() {
        let mut c = Channel::new(0, 4);
        c.write_fragment(0, &[1, 2, 3, 4]);
        c.mask(1, 3);
        let v = *c.cached_view(ViewMode::Time);
        assert_eq!(v[0], 1);
        assert_eq!(v[1] & 0x8, 0x8);
        assert_eq!(v[2] & 0x8, 0x8);
        assert_eq!(v[3], 4);
    }
}
