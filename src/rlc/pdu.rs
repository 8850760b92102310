//! RLC wire formats (spec §6), bit-exact per field order and width.
//!
//! UM headers byte-align naturally (3GPP draws them that way); AM
//! headers and the AM status PDU do not, so both are packed through a
//! small MSB-first [`BitWriter`]/[`BitReader`] pair rather than hand
//! rolled per format. Reserved bits are always written as zero and a
//! receiver rejects any PDU where they come back non-zero (spec §6).

use crate::error::{ L2Error, Result };
use crate::rlc::SnSize;

/// Segmentation indicator carried in every UM/AM data PDU header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentInfo {
    Full = 0b00,
    First = 0b01,
    Last = 0b10,
    Middle = 0b11,
}

impl SegmentInfo {
    fn from_bits(bits: u64) -> Result<Self> {
        match bits {
            0b00 => Ok(SegmentInfo::Full),
            0b01 => Ok(SegmentInfo::First),
            0b10 => Ok(SegmentInfo::Last),
            0b11 => Ok(SegmentInfo::Middle),
            _ => Err(L2Error::malformed("unknown SI value")),
        }
    }
}

/// MSB-first bit writer over a growable byte vector.
struct BitWriter {
    bytes: Vec<u8>,
    bit_pos: u8, // next free bit within bytes.last(), 0 == byte not started
}

impl BitWriter {
    fn new() -> Self {
        Self { bytes: Vec::new(), bit_pos: 0 }
    }

    fn write_bits(&mut self, value: u64, width: u8) {
        for i in (0..width).rev() {
            let bit = ((value >> i) & 1) as u8;
            if self.bit_pos == 0 {
                self.bytes.push(0);
            }
            let byte = self.bytes.last_mut().unwrap();
            *byte |= bit << (7 - self.bit_pos);
            self.bit_pos = (self.bit_pos + 1) % 8;
        }
    }

    fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

/// MSB-first bit reader over a borrowed byte slice.
struct BitReader<'a> {
    bytes: &'a [u8],
    bit_pos: usize, // absolute bit offset from start
}

impl<'a> BitReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, bit_pos: 0 }
    }

    fn read_bits(&mut self, width: u8) -> Result<u64> {
        if self.bit_pos + width as usize > self.bytes.len() * 8 {
            return Err(L2Error::malformed("truncated RLC header"));
        }
        let mut value = 0u64;
        for _ in 0..width {
            let byte = self.bytes[self.bit_pos / 8];
            let bit = (byte >> (7 - (self.bit_pos % 8))) & 1;
            value = (value << 1) | (bit as u64);
            self.bit_pos += 1;
        }
        Ok(value)
    }

    fn byte_offset(&self) -> usize {
        debug_assert_eq!(self.bit_pos % 8, 0, "reader is mid-byte");
        self.bit_pos / 8
    }
}

/// A parsed UM data PDU header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UmHeader {
    pub si: SegmentInfo,
    pub sn: Option<u32>, // None for SegmentInfo::Full
    pub so: Option<u16>,
}

impl UmHeader {
    /// Pack a UM header for `sn_size` (6 or 12 bit) into its byte form.
    pub fn pack(self, sn_size: SnSize) -> Vec<u8> {
        let sn_width: u8 = match sn_size {
            SnSize::Bits6 => 6,
            SnSize::Bits12 => 12,
            SnSize::Bits18 => unreachable!("UM never uses 18-bit SN"),
        };
        let mut w = BitWriter::new();
        w.write_bits(self.si as u64, 2);
        match self.si {
            SegmentInfo::Full => {
                w.write_bits(0, sn_width.min(6)); // reserved padding only, no SN on full SDU
            }
            _ => {
                if sn_width == 6 {
                    w.write_bits(self.sn.unwrap_or(0) as u64, 6);
                } else {
                    w.write_bits(0, 2); // reserved
                    w.write_bits(self.sn.unwrap_or(0) as u64, 12);
                }
                if let Some(so) = self.so {
                    w.write_bits(so as u64, 16);
                }
            }
        }
        w.finish()
    }

    /// Parse a UM header for `sn_size`. Drops (returns `Err`) on
    /// unknown SI or truncation, per spec §6/§7.
    pub fn unpack(bytes: &[u8], sn_size: SnSize) -> Result<(Self, usize)> {
        let sn_width: u8 = match sn_size {
            SnSize::Bits6 => 6,
            SnSize::Bits12 => 12,
            SnSize::Bits18 => return Err(L2Error::malformed("UM never uses 18-bit SN")),
        };
        let mut r = BitReader::new(bytes);
        let si = SegmentInfo::from_bits(r.read_bits(2)?)?;
        match si {
            SegmentInfo::Full => {
                let reserved = r.read_bits(sn_width.min(6))?;
                if reserved != 0 {
                    return Err(L2Error::malformed("non-zero reserved bits in full-SDU header"));
                }
                Ok((Self { si, sn: None, so: None }, r.byte_offset()))
            }
            _ => {
                let sn = if sn_width == 6 {
                    r.read_bits(6)? as u32
                } else {
                    let reserved = r.read_bits(2)?;
                    if reserved != 0 {
                        return Err(L2Error::malformed("non-zero reserved bits in UM header"));
                    }
                    r.read_bits(12)? as u32
                };
                let so = match si {
                    SegmentInfo::Middle | SegmentInfo::Last => Some(r.read_bits(16)? as u16),
                    _ => None,
                };
                Ok((Self { si, sn: Some(sn), so }, r.byte_offset()))
            }
        }
    }

    /// Header length in bytes for a full SDU (no SN transmitted).
    pub fn full_header_len() -> usize {
        1
    }

    /// Header length in bytes for a segment without an SO field.
    pub fn no_so_header_len(sn_size: SnSize) -> usize {
        match sn_size {
            SnSize::Bits6 => 1,
            SnSize::Bits12 => 2,
            SnSize::Bits18 => unreachable!(),
        }
    }

    /// Header length in bytes for a segment carrying an SO field.
    pub fn with_so_header_len(sn_size: SnSize) -> usize {
        match sn_size {
            SnSize::Bits6 => 3,
            SnSize::Bits12 => 4,
            SnSize::Bits18 => unreachable!(),
        }
    }
}

/// A parsed AM data PDU header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmHeader {
    pub poll: bool,
    pub si: SegmentInfo,
    pub sn: u32,
    pub so: Option<u16>,
}

impl AmHeader {
    fn sn_width(sn_size: SnSize) -> u8 {
        match sn_size {
            SnSize::Bits12 => 12,
            SnSize::Bits18 => 18,
            SnSize::Bits6 => unreachable!("AM never uses 6-bit SN"),
        }
    }

    /// Pack an AM data PDU header: `D/C:1=1 | P:1 | SI:2 | 0:2 | SN | SO?`.
    pub fn pack(self, sn_size: SnSize) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.write_bits(1, 1); // D/C = 1 (data)
        w.write_bits(self.poll as u64, 1);
        w.write_bits(self.si as u64, 2);
        w.write_bits(0, 2); // reserved
        w.write_bits(self.sn as u64, Self::sn_width(sn_size));
        if let Some(so) = self.so {
            w.write_bits(so as u64, 16);
        }
        w.finish()
    }

    /// Parse an AM data PDU header (caller has already stripped the
    /// D/C discriminator, or equivalently checks it here).
    pub fn unpack(bytes: &[u8], sn_size: SnSize) -> Result<(Self, usize)> {
        let mut r = BitReader::new(bytes);
        let dc = r.read_bits(1)?;
        if dc != 1 {
            return Err(L2Error::malformed("AM data PDU with D/C=0 (control PDU)"));
        }
        let poll = r.read_bits(1)? != 0;
        let si = SegmentInfo::from_bits(r.read_bits(2)?)?;
        let reserved = r.read_bits(2)?;
        if reserved != 0 {
            return Err(L2Error::malformed("non-zero reserved bits in AM header"));
        }
        let sn = r.read_bits(Self::sn_width(sn_size))? as u32;
        let so = match si {
            SegmentInfo::Middle | SegmentInfo::Last => Some(r.read_bits(16)? as u16),
            _ => None,
        };
        Ok((Self { poll, si, sn, so }, r.byte_offset()))
    }

    /// Header length in bytes without an SO field.
    pub fn no_so_header_len(sn_size: SnSize) -> usize {
        match sn_size {
            SnSize::Bits12 => 2,
            SnSize::Bits18 => 3,
            SnSize::Bits6 => unreachable!(),
        }
    }

    /// Header length in bytes with an SO field.
    pub fn with_so_header_len(sn_size: SnSize) -> usize {
        match sn_size {
            SnSize::Bits12 => 4,
            SnSize::Bits18 => 5,
            SnSize::Bits6 => unreachable!(),
        }
    }
}

/// A single NACK entry inside an AM status PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NackEntry {
    pub sn: u32,
    /// `Some((start, end))` partial-SDU byte range, `None` for a
    /// fully-missing SN.
    pub so_range: Option<(u16, u16)>,
    /// When set, SNs `[sn, sn + range)` are all fully missing
    /// (NACK range compression, spec §4.5).
    pub range: Option<u8>,
}

/// A parsed AM status PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPdu {
    pub ack_sn: u32,
    pub nacks: Vec<NackEntry>,
}

impl StatusPdu {
    /// Pack: `D/C:0 | CPT:3=000 | ACK_SN | E1:1 | (NACK_SN | E1 | E2 | E3 | (SO_start|SO_end)? | NACK_range?)*`.
    pub fn pack(&self, sn_size: SnSize) -> Vec<u8> {
        let sn_width = AmHeader::sn_width(sn_size);
        let mut w = BitWriter::new();
        w.write_bits(0, 1); // D/C = 0 (control)
        w.write_bits(0b000, 3); // CPT = STATUS PDU
        w.write_bits(self.ack_sn as u64, sn_width);
        w.write_bits(!self.nacks.is_empty() as u64, 1); // E1
        for (i, nack) in self.nacks.iter().enumerate() {
            let is_last = i + 1 == self.nacks.len();
            w.write_bits(nack.sn as u64, sn_width);
            w.write_bits((!is_last) as u64, 1); // E1: more NACKs follow
            w.write_bits(nack.so_range.is_some() as u64, 1); // E2: SO range present
            w.write_bits(nack.range.is_some() as u64, 1); // E3: NACK range present
            if let Some((start, end)) = nack.so_range {
                w.write_bits(start as u64, 16);
                w.write_bits(end as u64, 16);
            }
            if let Some(range) = nack.range {
                w.write_bits(range as u64, 8);
            }
        }
        w.finish()
    }

    /// Parse a status PDU. A malformed status PDU (reserved CPT,
    /// truncated bytes) is discarded silently per spec §4.5.
    pub fn unpack(bytes: &[u8], sn_size: SnSize) -> Result<Self> {
        let sn_width = AmHeader::sn_width(sn_size);
        let mut r = BitReader::new(bytes);
        let dc = r.read_bits(1)?;
        if dc != 0 {
            return Err(L2Error::malformed("status PDU with D/C=1"));
        }
        let cpt = r.read_bits(3)?;
        if cpt != 0 {
            return Err(L2Error::malformed("reserved CPT in status PDU"));
        }
        let ack_sn = r.read_bits(sn_width)? as u32;
        let mut more = r.read_bits(1)? != 0;
        let mut nacks = Vec::new();
        while more {
            let sn = r.read_bits(sn_width)? as u32;
            more = r.read_bits(1)? != 0;
            let has_so = r.read_bits(1)? != 0;
            let has_range = r.read_bits(1)? != 0;
            let so_range = if has_so {
                let start = r.read_bits(16)? as u16;
                let end = r.read_bits(16)? as u16;
                Some((start, end))
            } else {
                None
            };
            let range = if has_range { Some(r.read_bits(8)? as u8) } else { None };
            nacks.push(NackEntry { sn, so_range, range });
        }
        Ok(Self { ack_sn, nacks })
    }
}
