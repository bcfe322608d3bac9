#![warn(missing_docs)]
/*! Acquisition, indexing, and random access for packette waveform runs.

A "packette" run is a stream of waveform events produced by a switched-
capacitor-array digitizer board. Each event is delivered as many small
datagrams ("packets") of a fixed wire protocol, possibly fragmented across
several packets and arriving out of order with respect to other events
still in flight. This crate turns a growing backing file (or a live UDP
feed being written to one) into a seekable, randomly indexable sequence of
fully reconstructed [`Event`]s.

# Architecture overview

```text
  UDP datagram
       |
       v
[ capture thread ] --(raw append)--> [ backing file(s) ]
                                             |
                                             v
                                    [ index builder ]
                                             |
                                  event_num -> (file, offset)
                                             |
                                             v
                                      [ reassembler ]
                                             |
                               fragments -> Channel buffers
                                             |
                                             v
                                   [ channel view cache ]
                                     (time- or SCA-ordered)
                                             |
                                             v
                                       [ event cache ] --> consumer
```

[`Run`] ties the backing store, the index, the reassembler and the bounded
event cache together behind three entry points: open a run, get/iterate
events, and rebuild the index after the backing file has grown.

The [`pedestal`] module shares this data model to compute per-capacitor
mean/variance statistics ("pedestals") across many events in a file.

# Examples

```
use packette::packet::{PacketHeader, HEADER_SIZE};

let mut wire = vec![0u8; HEADER_SIZE];
let header = PacketHeader {
    board_id: [1, 2, 3, 4, 5, 6],
    rel_offset: 0,
    seqnum: 1,
    event_num: 7,
    trigger_low: 0xdead_beef,
    channel_mask: 0b1,
    num_samples: 4,
    channel: 0,
    total_samples: 4,
    drs4_stop: 100,
};
header.encode(&mut wire);
let (decoded, _) = PacketHeader::decode(&wire).unwrap();
assert_eq!(decoded.event_num, 7);
```
*/

pub mod backing_store;
pub mod cache;
pub mod capture;
pub mod channel;
pub mod event;
pub mod flags;
pub mod index;
pub mod packet;
pub mod pedestal;
pub mod persistence;
pub mod reassembler;
pub mod run;

pub use crate::channel::{Channel, ViewMode};
pub use crate::event::Event;
pub use crate::packet::{BoardId, PacketHeader};
pub use crate::run::Run;

/// Errors surfaced at the `Run` API boundary.
///
/// Recoverable, advisory conditions (`ShortRead`, `FragmentOverflow`,
/// `ZeroCount`) are *not* represented here: a short read is a legal "not
/// yet arrived" result, a fragment overflow is a skip-and-log-warning
/// event, and a zero-count pedestal cell is a warning with a documented
/// zero fallback. Promoting any of those to `Error` would force every
/// caller through error handling for conditions the engine is specifically
/// designed to shrug off.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Low-level I/O failure reading or writing a backing file or socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A packet declared a board id different from the run's established
    /// one. Fatal: a run is defined to carry exactly one board.
    #[error(
        "heterogeneous board id in run: expected {}, found {}",
        crate::packet::format_board_id(expected),
        crate::packet::format_board_id(found)
    )]
    HeterogeneousBoard {
        /// Board id established by the first packet indexed.
        expected: BoardId,
        /// Board id found on a later packet.
        found: BoardId,
    },

    /// The index builder found a second, later occurrence of an
    /// `event_num` it had already recorded the start of. Indicates bad
    /// input (e.g. a backing file that was truncated and re-appended to).
    #[error("event number {0} collides with an already-indexed event")]
    EventCollision(u32),

    /// A persisted run's backing file could not be reopened on restore.
    #[error("backing file {0} could not be reopened")]
    MissingFile(std::path::PathBuf),

    /// The live-capture thread exited (panicked or hit an unrecoverable
    /// socket error) while the `Run` still expected it to be appending
    /// data. Surfaced lazily: detected the next time a consumer calls
    /// `Run::update_index` or `Run::capture_alive` and notices the file
    /// has stopped growing and the capture thread has already finished.
    #[error("live-capture thread is no longer running")]
    CaptureChildLost,

    /// Failure encoding/decoding a persisted run or pedestal artifact.
    #[error("(de)serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
