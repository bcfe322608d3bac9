//! Pedestal calibration: per-(channel, capacitor) mean and standard
//! deviation aggregated across every event in a set of backing files.
//!
//! One worker per file accumulates sum/sum-of-squares/count in the
//! capacitor-ordered view, mirroring the original calibrator's
//! one-process-per-file design; workers run on rayon's pool instead of
//! `multiprocessing.Pool`, and the per-file partials are folded together
//! the same way the original's main process folded worker results.
//!
//! Unlike the original, a sample only counts toward a capacitor's
//! statistics if it's flag-bit valid (see [`crate::flags::is_valid`]):
//! the stop-sample guard band installed by the reassembler is
//! `MASKED_DATA`, not a real reading, and should never be averaged in.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::warn;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::channel::ViewMode;
use crate::flags::{SCA_LENGTH, is_valid};
use crate::packet::{BoardId, format_board_id};
use crate::run::Run;
use crate::{Error, Result};

#[derive(Clone)]
struct ChannelAccum {
    sum: Vec<i64>,
    sumsq: Vec<i64>,
    count: Vec<u32>,
}

impl ChannelAccum {
    fn new() -> Self {
        Self {
            sum: vec![0; SCA_LENGTH],
            sumsq: vec![0; SCA_LENGTH],
            count: vec![0; SCA_LENGTH],
        }
    }

    fn merge(&mut self, other: &ChannelAccum) {
        for i in 0..SCA_LENGTH {
            self.sum[i] += other.sum[i];
            self.sumsq[i] += other.sumsq[i];
            self.count[i] += other.count[i];
        }
    }
}

/// One file's partial contribution to a pedestal.
struct FileAccumulator {
    board_id: Option<BoardId>,
    channels: BTreeMap<u8, ChannelAccum>,
}

impl FileAccumulator {
    fn merge(&mut self, other: FileAccumulator) {
        for (chan, acc) in other.channels {
            self.channels.entry(chan).or_insert_with(ChannelAccum::new).merge(&acc);
        }
    }
}

fn accumulate_file(path: &Path) -> Result<FileAccumulator> {
    let mut run = Run::open(&[path.to_path_buf()], ViewMode::Sca)?;
    let board_id = run.board_id();
    let mut channels: BTreeMap<u8, ChannelAccum> = BTreeMap::new();
    let events = run.iter()?;
    for event in &events {
        for (chan_idx, channel) in event.channels() {
            let Some(view) = channel.cached_view_if_built() else {
                continue;
            };
            let acc = channels.entry(chan_idx).or_insert_with(ChannelAccum::new);
            for (i, &sample) in view.iter().enumerate() {
                // Skip both unfilled (NOT_DATA) and explicitly masked
                // (MASKED_DATA, e.g. the stop-sample guard band) positions:
                // neither is a real ADC reading.
                if !is_valid(sample) {
                    continue;
                }
                acc.sum[i] += i64::from(sample);
                acc.sumsq[i] += i64::from(sample) * i64::from(sample);
                acc.count[i] += 1;
            }
        }
    }
    Ok(FileAccumulator { board_id, channels })
}

/// Per-channel computed pedestal: mean, standard deviation and sample
/// count at every one of the 1024 capacitors. `Vec` rather than a fixed
/// array so the type stays cleanly (de)serializable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelPedestal {
    /// Mean ADC count per capacitor, `floor(sum / count)`.
    pub mean: Vec<i64>,
    /// Standard deviation per capacitor; `0.0` where `count == 0`.
    pub stdev: Vec<f64>,
    /// Number of samples folded into this capacitor's statistics.
    pub counts: Vec<u32>,
}

/// A completed pedestal: one [`ChannelPedestal`] per channel that
/// appeared in the source files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PedestalArtifact {
    /// Board the pedestal was computed from. `None` if no events were
    /// found in any input file.
    pub board_id: Option<BoardId>,
    /// `(channel index, pedestal)` pairs, sorted by channel index.
    pub channels: Vec<(u8, ChannelPedestal)>,
}

impl PedestalArtifact {
    /// Save as JSON to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self).map_err(Error::Serde)?;
        std::fs::write(path, bytes).map_err(Error::Io)?;
        Ok(())
    }

    /// Load a previously saved pedestal.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = crate::backing_store::read_whole_file(path)?;
        serde_json::from_slice(&bytes).map_err(Error::Serde)
    }

    /// The conventional artifact filename for a board: `<mac>.pedestal`.
    #[must_use]
    pub fn default_filename(board_id: &BoardId) -> String {
        format!("{}.pedestal", format_board_id(board_id).replace(':', ""))
    }

    /// A human-readable per-capacitor dump, one line per `(index, mean,
    /// stdev, channel, count)`, blank line between channels — grounded in
    /// `describe_pedestal.py`'s report format, useful for a quick sanity
    /// check without writing a separate plotting tool.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for (chan, pedestal) in &self.channels {
            out.push_str(&format!("# Channel: {chan}\n"));
            for (i, ((mean, stdev), count)) in pedestal
                .mean
                .iter()
                .zip(&pedestal.stdev)
                .zip(&pedestal.counts)
                .enumerate()
            {
                out.push_str(&format!("{i} {mean} {stdev:.3} {chan} {count}\n"));
            }
            out.push('\n');
        }
        out
    }
}

/// Compute a pedestal from a set of backing files, one rayon worker per
/// file, folded together in file order. All files must belong to the same
/// board (mixed boards return `Error::HeterogeneousBoard`).
pub fn compute(paths: &[PathBuf]) -> Result<PedestalArtifact> {
    let partials: Vec<Result<FileAccumulator>> =
        paths.par_iter().map(|p| accumulate_file(p)).collect();

    let mut merged: Option<FileAccumulator> = None;
    for partial in partials {
        let partial = partial?;
        match &mut merged {
            None => merged = Some(partial),
            Some(acc) => {
                if let (Some(expected), Some(found)) = (acc.board_id, partial.board_id) {
                    if expected != found {
                        return Err(Error::HeterogeneousBoard { expected, found });
                    }
                }
                acc.board_id = acc.board_id.or(partial.board_id);
                acc.merge(partial);
            }
        }
    }

    let merged = merged.unwrap_or(FileAccumulator {
        board_id: None,
        channels: BTreeMap::new(),
    });

    let mut channels = Vec::with_capacity(merged.channels.len());
    for (chan, acc) in merged.channels {
        let mut mean = vec![0i64; SCA_LENGTH];
        let mut stdev = vec![0.0f64; SCA_LENGTH];
        for i in 0..SCA_LENGTH {
            if acc.count[i] == 0 {
                warn!("zero counts for channel {chan}, capacitor {i}");
                continue;
            }
            // floor(sum/count), not truncation: count is always positive, so
            // div_euclid rounds toward negative infinity as spec.md §4.8
            // requires for the fixed-point subtraction downstream.
            let m = acc.sum[i].div_euclid(i64::from(acc.count[i]));
            mean[i] = m;
            let variance =
                acc.sumsq[i] as f64 / f64::from(acc.count[i]) - (m as f64) * (m as f64);
            stdev[i] = variance.max(0.0).sqrt();
        }
        channels.push((
            chan,
            ChannelPedestal {
                mean,
                stdev,
                counts: acc.count,
            },
        ));
    }

    Ok(PedestalArtifact {
        board_id: merged.board_id,
        channels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{PacketHeader, encode_packet};

    // rel_offset is kept well clear of the default +/-15 stop-sample guard
    // band so written samples show up as valid data, not MASKED_DATA. Sample
    // values are multiples of 16 so their low 4 flag bits are clear, matching
    // the hardware convention (spec.md §8's "each sample i<<4").
    fn header(event_num: u32, drs4_stop: u16, samples: &[i16]) -> (PacketHeader, Vec<i16>) {
        (
            PacketHeader {
                board_id: [1, 2, 3, 4, 5, 6],
                rel_offset: 100,
                seqnum: 0,
                event_num,
                trigger_low: 0,
                channel_mask: 1,
                num_samples: samples.len() as u16,
                channel: 0,
                total_samples: 200,
                drs4_stop,
            },
            samples.to_vec(),
        )
    }

    fn write_file(path: &PathBuf, packets: &[(PacketHeader, Vec<i16>)]) {
        let mut bytes = Vec::new();
        for (h, s) in packets {
            bytes.extend(encode_packet(h, s));
        }
        std::fs::write(path, bytes).unwrap();
    }

    #[test]
    fn mean_and_stdev_over_two_events() {
        let tmpd = tempfile::tempdir().unwrap();
        let path = tmpd.path().join("run.dat");
        write_file(
            &path,
            &[
                header(1, 0, &[160, 160, 160, 160]),
                header(2, 0, &[320, 320, 320, 320]),
            ],
        );
        let artifact = compute(&[path]).unwrap();
        assert_eq!(artifact.channels.len(), 1);
        let (_, pedestal) = &artifact.channels[0];
        assert_eq!(pedestal.mean[100], 240);
        assert_eq!(pedestal.counts[100], 2);
        assert!((pedestal.stdev[100] - 80.0).abs() < 1e-6);
    }

    #[test]
    fn mean_rounds_down_not_toward_zero_for_negative_sums() {
        let tmpd = tempfile::tempdir().unwrap();
        let path = tmpd.path().join("run.dat");
        // sum = -16 - 16 + 16 = -16 over 3 events: floor(-16/3) == -6, while
        // truncating division would give -5.
        write_file(
            &path,
            &[
                header(1, 0, &[-16, -16, -16, -16]),
                header(2, 0, &[-16, -16, -16, -16]),
                header(3, 0, &[16, 16, 16, 16]),
            ],
        );
        let artifact = compute(&[path]).unwrap();
        let (_, pedestal) = &artifact.channels[0];
        assert_eq!(pedestal.mean[100], -6);
    }

    #[test]
    fn zero_count_capacitors_report_zero_without_failing() {
        let tmpd = tempfile::tempdir().unwrap();
        let path = tmpd.path().join("run.dat");
        write_file(&path, &[header(1, 0, &[160, 160])]);
        let artifact = compute(&[path]).unwrap();
        let (_, pedestal) = &artifact.channels[0];
        assert_eq!(pedestal.counts[5], 0);
        assert_eq!(pedestal.mean[5], 0);
    }

    #[test]
    fn summary_lists_each_channel() {
        let tmpd = tempfile::tempdir().unwrap();
        let path = tmpd.path().join("run.dat");
        write_file(&path, &[header(1, 0, &[160, 160, 160, 160])]);
        let artifact = compute(&[path]).unwrap();
        let text = artifact.summary();
        assert!(text.contains("# Channel: 0"));
    }
}
