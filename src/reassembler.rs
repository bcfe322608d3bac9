//! Walk forward through contiguous same-event packets and materialize
//! each enabled channel's payload.

use log::{trace, warn};

use crate::backing_store::BackingStore;
use crate::channel::{Channel, ViewMode};
use crate::event::Event;
use crate::flags::STOP_MASK_WIDTH;
use crate::index::IndexTable;
use crate::packet::{HEADER_SIZE, PacketHeader, SAMPLE_WIDTH, decode_samples};
use crate::{Error, Result};

/// Load event `event_num` from its indexed starting offset, walking
/// forward through packets until the event closes (a strictly greater
/// `event_num` is seen) or the backing data runs out.
///
/// Returns `Error::MissingFile`-free `Ok(None)` if `event_num` isn't in
/// the index at all (nothing to reassemble, not a fatal condition — the
/// caller, `Run::get`, turns that into its own not-found signal).
///
/// A missing fragment (short read on its payload, typical during live
/// growth) simply stops the scan without marking the event complete; the
/// caller may retry after the next `update_index`.
pub fn load_event(
    store: &BackingStore,
    index: &IndexTable,
    view: ViewMode,
    board_id: [u8; 6],
    event_num: u32,
) -> Result<Option<Event>> {
    let Some((file_idx, start_offset)) = index.locate(event_num) else {
        return Ok(None);
    };
    let file = store.get(file_idx);

    let mut cursor = start_offset;
    let mut event: Option<Event> = None;

    loop {
        let header_bytes = file.read_at(cursor, HEADER_SIZE)?;
        let Some((header, _)) = PacketHeader::decode(&header_bytes) else {
            break; // short read: end of what's arrived so far
        };

        if event.is_none() {
            event = Some(Event::new(
                header.board_id,
                header.event_num,
                header.trigger_low,
                header.channel_mask,
            ));
        }
        if header.event_num > event_num {
            break; // a later event has started; this one is complete
        }

        let chan_bit = header.channel_mask & (1u64 << header.channel) != 0;
        if !chan_bit {
            // Channel bit clear but packet claims it anyway: defensive,
            // silently ignore per spec.md §4.4.
            trace!("ignoring packet for unmasked channel {}", header.channel);
        } else {
            let payload_bytes = file.read_at(cursor + HEADER_SIZE as u64, {
                header.num_samples as usize * SAMPLE_WIDTH
            })?;
            let Some(samples) = decode_samples(&payload_bytes, header.num_samples) else {
                break; // payload not fully arrived yet
            };

            let ev = event.as_mut().unwrap();
            if ev.channel(header.channel as u8).is_none_or(|c| c.len() == 0) {
                let mut fresh = Channel::new(header.drs4_stop, header.total_samples);
                install_stop_mask(&mut fresh, header.drs4_stop, view);
                ev.set_channel(header.channel as u8, fresh);
            }
            if let Some(chan) = ev.channel_mut(header.channel as u8) {
                if !chan.write_fragment(header.rel_offset, &samples) {
                    warn!(
                        "fragment overflow: event {} channel {} rel_offset {} + {} samples > total_samples {}",
                        header.event_num,
                        header.channel,
                        header.rel_offset,
                        samples.len(),
                        chan.len()
                    );
                }
            }
        }

        cursor += header.wire_len() as u64;
    }

    let Some(mut event) = event else {
        return Ok(None);
    };
    debug_assert_eq!(event.pretty_id(), crate::packet::format_board_id(&board_id));
    for (_, chan) in event.channels_mut() {
        let _ = chan.cached_view(view); // force a fresh build
    }
    Ok(Some(event))
}

/// Install the default symmetric mask around the stop sample on first
/// fragment of a channel (spec.md §4.4, width resolved to 15 per the Open
/// Questions in §9). Expressed directly in whichever view is currently
/// active, matching the original's `if self.SCAView: ... else: ...`.
fn install_stop_mask(channel: &mut Channel, drs4_stop: u16, view: ViewMode) {
    let w = STOP_MASK_WIDTH as i32;
    match view {
        ViewMode::Sca => channel.mask(drs4_stop as i32 - w, drs4_stop as i32 + w),
        ViewMode::Time => channel.mask(-w, w),
    }
}
