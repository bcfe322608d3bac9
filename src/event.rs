//! A reconstructed event: one trigger's worth of per-channel waveforms.

use std::fmt;

use crate::channel::Channel;
use crate::flags::MAX_CHANNELS;
use crate::packet::{BoardId, format_board_id};

/// One group of packets sharing `event_num`; corresponds to one trigger.
///
/// Channels are stored in a fixed-size array of 64 slots rather than a
/// dynamic map, per spec.md's Design Notes redesign of the original's
/// dictionary-of-channels: membership is driven entirely by the
/// `channel_mask` bit, so a `[Option<Channel>; 64]` is both simpler and
/// avoids a hash map lookup on the hot reassembly path.
pub struct Event {
    /// Event number (trigger identifier).
    pub event_num: u32,
    /// Low word of the 32-bit trigger timestamp.
    pub trigger_low: u32,
    board_id: BoardId,
    channels: Box<[Option<Channel>; MAX_CHANNELS]>,
}

impl Event {
    /// Construct an event shell from a packet header: fixes `event_num`,
    /// `trigger_low`, and which channel slots are present (derived from
    /// `channel_mask`), but allocates no channel buffers yet — those are
    /// allocated lazily on first fragment, by the reassembler.
    #[must_use]
    pub fn new(board_id: BoardId, event_num: u32, trigger_low: u32, channel_mask: u64) -> Self {
        let mut channels: Box<[Option<Channel>; MAX_CHANNELS]> =
            Box::new(std::array::from_fn(|_| None));
        for chan in 0..MAX_CHANNELS {
            if channel_mask & (1u64 << chan) != 0 {
                channels[chan] = Some(Channel::new(0, 0));
            }
        }
        Self {
            event_num,
            trigger_low,
            board_id,
            channels,
        }
    }

    /// Channel `i`, if present in this event's mask.
    #[must_use]
    pub fn channel(&self, i: u8) -> Option<&Channel> {
        self.channels.get(i as usize).and_then(|c| c.as_ref())
    }

    /// Mutable access to channel `i`, if present.
    pub fn channel_mut(&mut self, i: u8) -> Option<&mut Channel> {
        self.channels.get_mut(i as usize).and_then(|c| c.as_mut())
    }

    /// Iterate over `(channel index, &Channel)` for every present channel.
    /// Enumeration order is channel-index order (spec.md leaves it
    /// unspecified; this is a stable, simple choice).
    pub fn channels(&self) -> impl Iterator<Item = (u8, &Channel)> {
        self.channels
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.as_ref().map(|c| (i as u8, c)))
    }

    /// Mutable version of [`Event::channels`].
    pub fn channels_mut(&mut self) -> impl Iterator<Item = (u8, &mut Channel)> {
        self.channels
            .iter_mut()
            .enumerate()
            .filter_map(|(i, c)| c.as_mut().map(|c| (i as u8, c)))
    }

    /// Replace the channel slot at index `i` (used by the reassembler to
    /// install a freshly allocated `Channel` on first fragment).
    pub(crate) fn set_channel(&mut self, i: u8, channel: Channel) {
        self.channels[i as usize] = Some(channel);
    }

    /// `aa:bb:cc:dd:ee:ff`-formatted board id this event belongs to.
    #[must_use]
    pub fn pretty_id(&self) -> String {
        format_board_id(&self.board_id)
    }
}

impl fmt::Display for Event {
    /// A human-readable 8-DRS-chip by 8-channel grid, grounded in the
    /// original `packetteEvent.__str__`'s layout: a quick way to see which
    /// channels arrived without reaching for an external browser tool.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Board MAC:\t{}", self.pretty_id())?;
        writeln!(f, "Event number:\t{}", self.event_num)?;
        writeln!(f, "Timestamp:\t{}", self.trigger_low)?;
        writeln!(f, "Channels:")?;
        for drs in 0..8 {
            write!(f, "\tDRS{}: [", drs + 1)?;
            for chan in 0..8 {
                let idx = drs * 8 + chan;
                if self.channel(idx as u8).is_some() {
                    write!(f, "{idx:3} ")?;
                } else {
                    write!(f, "  . ")?;
                }
            }
            writeln!(f, "]")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_set_derives_from_mask() {
        let e = Event::new([0; 6], 7, 0, 0b10001);
        assert!(e.channel(0).is_some());
        assert!(e.channel(4).is_some());
        assert!(e.channel(1).is_none());
        assert_eq!(e.channels().count(), 2);
    }

    #[test]
    fn pretty_id_formats_as_mac() {
        let e = Event::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff], 1, 0, 0);
        assert_eq!(e.pretty_id(), "aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn display_grid_shows_present_channels() {
        let e = Event::new([0; 6], 1, 0, 0b1);
        let s = format!("{e}");
        assert!(s.contains("DRS1"));
        assert!(s.contains("  0 "));
    }
}
