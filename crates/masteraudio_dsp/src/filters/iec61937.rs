//! IEC61937 burst framing
//!
//! A burst is four 16-bit preamble words followed by the coded frame and
//! zero padding up to the burst size:
//!
//! ```text
//! | Pa 0xF872 | Pb 0x4E1F | Pc type | Pd bits | payload ... | 0 ... |
//! ```
//!
//! The coded payload is a big-endian byte stream; on a little-endian link
//! every 16-bit word is byte-swapped along with the preamble.

use serde::{Deserialize, Serialize};

use crate::error::{DspError, DspResult};

pub const SYNC_PA: u16 = 0xF872;
pub const SYNC_PB: u16 = 0x4E1F;
/// Pc data type for AC3
pub const DATA_TYPE_AC3: u16 = 1;
/// PCM frames per AC3 burst
pub const AC3_FRAME_SAMPLES: usize = 1536;
/// One AC3 burst: 1536 stereo 16-bit frames
pub const BURST_BYTES: usize = AC3_FRAME_SAMPLES * 4;
pub const PREAMBLE_BYTES: usize = 8;

/// Byte order of 16-bit words on the output link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endianness {
    #[default]
    Little,
    Big,
}

fn put_word(out: &mut [u8], word: u16, endianness: Endianness) {
    let bytes = match endianness {
        Endianness::Little => word.to_le_bytes(),
        Endianness::Big => word.to_be_bytes(),
    };
    out[..2].copy_from_slice(&bytes);
}

/// Frame `payload` into `out` (exactly [`BURST_BYTES`] long)
pub fn frame_burst(
    payload: &[u8],
    bsmod: u8,
    endianness: Endianness,
    out: &mut [u8],
) -> DspResult<()> {
    if out.len() != BURST_BYTES {
        return Err(DspError::BufferTooSmall {
            needed: BURST_BYTES,
            actual: out.len(),
        });
    }
    // Payload is carried in whole 16-bit words
    let padded_len = payload.len() + payload.len() % 2;
    if PREAMBLE_BYTES + padded_len > BURST_BYTES {
        return Err(DspError::BufferTooSmall {
            needed: PREAMBLE_BYTES + padded_len,
            actual: BURST_BYTES,
        });
    }

    let pc = DATA_TYPE_AC3 | ((bsmod as u16 & 0x7) << 8);
    let pd = (payload.len() * 8) as u16;
    put_word(&mut out[0..], SYNC_PA, endianness);
    put_word(&mut out[2..], SYNC_PB, endianness);
    put_word(&mut out[4..], pc, endianness);
    put_word(&mut out[6..], pd, endianness);

    let body = &mut out[PREAMBLE_BYTES..];
    body.fill(0);
    body[..payload.len()].copy_from_slice(payload);
    if endianness == Endianness::Little {
        for word in body[..padded_len].chunks_exact_mut(2) {
            word.swap(0, 1);
        }
    }
    Ok(())
}

/// Preamble fields read back from a burst
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BurstInfo {
    pub data_type: u16,
    pub bsmod: u8,
    pub payload_bits: u16,
}

/// Parse the preamble of `burst`, checking the sync words
pub fn parse_burst(burst: &[u8], endianness: Endianness) -> DspResult<BurstInfo> {
    if burst.len() < PREAMBLE_BYTES {
        return Err(DspError::BufferTooSmall {
            needed: PREAMBLE_BYTES,
            actual: burst.len(),
        });
    }
    let word = |i: usize| {
        let pair = [burst[i], burst[i + 1]];
        match endianness {
            Endianness::Little => u16::from_le_bytes(pair),
            Endianness::Big => u16::from_be_bytes(pair),
        }
    };
    if word(0) != SYNC_PA || word(2) != SYNC_PB {
        return Err(DspError::NotSupported("missing IEC61937 sync words".into()));
    }
    let pc = word(4);
    Ok(BurstInfo {
        data_type: pc & 0x1F,
        bsmod: ((pc >> 8) & 0x7) as u8,
        payload_bits: word(6),
    })
}
