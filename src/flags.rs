//! Sample flag-bit convention.
//!
//! The low 4 bits of a sample are reserved flag bits, set either by the
//! front-end firmware (underflow/overflow) or by this engine
//! (`NOT_DATA`/`MASKED_DATA`). A sample is "valid" iff none of the four
//! low bits is set.
//!
//! The source material had two conflicting conventions for "no data here"
//! (a runtime-typed `-1` sentinel in some scripts, flag bits in others).
//! This crate normalizes on flag bits only, per spec.md's Design Notes.

/// Underflow flag bit (firmware-set).
pub const UNDERFLOW: i16 = 0x1;

/// Overflow flag bit (firmware-set).
pub const OVERFLOW: i16 = 0x2;

/// No fragment ever covered this position. Engine-inserted.
pub const NOT_DATA: i16 = 0x4;

/// Position was explicitly masked out (stop-sample guard band, or an
/// explicit `Channel::mask` call). Engine-inserted.
pub const MASKED_DATA: i16 = 0x8;

const FLAG_MASK: i16 = 0xF;

/// `true` iff none of the four low flag bits is set.
#[must_use]
pub fn is_valid(sample: i16) -> bool {
    sample & FLAG_MASK == 0
}

/// Default symmetric mask half-width (in capacitors) applied around the
/// DRS4 stop sample on first fragment of a channel. spec.md's Open
/// Questions note both 5 and 15 appear in the source; this crate picks 15.
pub const STOP_MASK_WIDTH: u16 = 15;

/// Default capacity of the bounded event cache (spec.md §4.6).
pub const EVENT_CACHE_CAPACITY: usize = 100;

/// Number of capacitors in the switched-capacitor array / ring buffer
/// length of a cached channel view.
pub const SCA_LENGTH: usize = 1024;

/// Maximum number of channels addressable by a 64-bit `channel_mask`.
pub const MAX_CHANNELS: usize = 64;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_iff_no_low_bits() {
        assert!(is_valid(0));
        assert!(is_valid(100));
        assert!(is_valid(-16)); // low 4 bits clear
        assert!(!is_valid(NOT_DATA));
        assert!(!is_valid(MASKED_DATA));
        assert!(!is_valid(UNDERFLOW));
        assert!(!is_valid(OVERFLOW));
        assert!(!is_valid(100 | MASKED_DATA));
    }
}
