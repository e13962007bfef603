// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fmt::Debug;
use std::io::Cursor;
use std::marker::PhantomData;
use std::ops::Range;

use anyhow::anyhow;
use anyhow::Context;
use bytes::Buf;

use crate::codec::ParseError;

pub trait Header: Sized {
    /// Parse the NALU header, returning it.
    fn parse<T: AsRef<[u8]>>(cursor: &Cursor<T>) -> anyhow::Result<Self>;
    /// Whether this header type indicates EOS.
    fn is_end(&self) -> bool;
    /// The length of the header.
    fn len(&self) -> usize;
}

/// A NAL unit found in a byte stream, together with the stream it was found
/// in.
#[derive(Clone, Debug)]
pub struct Nalu<'a, U> {
    pub header: U,
    /// The mapping that backs this NALU. Possibly shared with the other NALUs
    /// in the Access Unit.
    pub data: &'a [u8],
    /// Size of the unit, header included.
    pub size: usize,
    /// Offset of the header in `data`.
    pub offset: usize,
    /// Offset of the start code in `data`.
    pub sc_offset: usize,
}

/// Position of the next `00 00 01` pattern at or after `offset`, relative to
/// `offset`.
fn find_start_code(data: &[u8], offset: usize) -> Option<usize> {
    data.get(offset..)?
        .windows(3)
        .position(|window| window == [0x00, 0x00, 0x01])
}

/// Locates the unit following the start code at or after `pos`. Returns the
/// start code offset and the byte range of the unit, trailing_zero_8bits
/// excluded.
fn next_unit(data: &[u8], pos: usize) -> Option<(usize, Range<usize>)> {
    let current_nalu_offset = find_start_code(data, pos)?;
    let mut start_code_offset = pos + current_nalu_offset;

    // If the preceding byte is 00, then we actually have a four byte SC,
    // i.e. 00 00 00 01 Where the first 00 is the "zero_byte()"
    if start_code_offset > pos && data[start_code_offset - 1] == 0x00 {
        start_code_offset -= 1;
    }

    // The NALU offset is its offset + 3 bytes to skip the start code.
    let nalu_offset = pos + current_nalu_offset + 3;

    // Whatever data is left must be part of the current NALU if there is no
    // other start code.
    let mut size = find_start_code(data, nalu_offset).unwrap_or(data.len() - nalu_offset);

    while size > 0 && data[nalu_offset + size - 1] == 0x00 {
        // Discard trailing_zero_8bits
        size -= 1;
    }

    Some((start_code_offset, nalu_offset..nalu_offset + size))
}

/// Returns the byte ranges of all the NAL units of an Annex B byte stream,
/// start codes excluded, in stream order. Units with no bytes between two
/// start codes are skipped.
pub fn scan(stream: &[u8]) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut pos = 0;

    while let Some((_, range)) = next_unit(stream, pos) {
        pos = range.end;
        if !range.is_empty() {
            ranges.push(range);
        }
    }

    ranges
}

impl<'a, U> Nalu<'a, U>
where
    U: Debug + Header,
{
    /// Find the next Annex B encoded NAL unit.
    pub fn next(cursor: &mut Cursor<&'a [u8]>) -> anyhow::Result<Nalu<'a, U>> {
        let bitstream = *cursor.get_ref();
        let pos = usize::try_from(cursor.position())?;

        let (sc_offset, range) = next_unit(bitstream, pos).ok_or(anyhow!("No NAL found"))?;

        // Set the bitstream position to the start of the current NALU
        cursor.set_position(u64::try_from(range.start)?);

        let header = U::parse(cursor)?;

        let size = if header.is_end() {
            header.len()
        } else {
            range.len()
        };

        if size < header.len() {
            return Err(anyhow!("NAL unit of {} bytes is shorter than its header", size));
        }

        // Resume from the end of this unit.
        cursor.set_position(u64::try_from(range.start + size)?);

        Ok(Nalu {
            header,
            data: bitstream,
            size,
            offset: range.start,
            sc_offset,
        })
    }

    /// Wraps a single NAL unit that was already extracted from its framing,
    /// e.g. one of the units of a length-prefixed sample.
    pub fn from_unit(unit: &'a [u8]) -> anyhow::Result<Nalu<'a, U>> {
        let header = U::parse(&Cursor::new(unit)).context("while parsing the NAL unit header")?;

        if unit.len() < header.len() {
            return Err(ParseError::SizeMismatch {
                declared: header.len(),
                available: unit.len(),
            }
            .into());
        }

        Ok(Nalu {
            header,
            data: unit,
            size: unit.len(),
            offset: 0,
            sc_offset: 0,
        })
    }

    /// The RBSP (still containing emulation prevention bytes) following the
    /// header.
    pub fn payload(&self) -> &'a [u8] {
        &self.data[self.offset + self.header.len()..self.offset + self.size]
    }
}

impl<U> AsRef<[u8]> for Nalu<'_, U> {
    fn as_ref(&self) -> &[u8] {
        &self.data[self.offset..self.offset + self.size]
    }
}

/// Iterator over the NAL units of an Annex B byte stream.
pub struct NalIterator<'a, U>(Cursor<&'a [u8]>, PhantomData<U>);

impl<'a, U> NalIterator<'a, U> {
    pub fn new(stream: &'a [u8]) -> Self {
        Self(Cursor::new(stream), PhantomData)
    }
}

impl<'a, U: Debug + Header> Iterator for NalIterator<'a, U> {
    type Item = Nalu<'a, U>;

    fn next(&mut self) -> Option<Self::Item> {
        // Step over empty units like `scan` does.
        loop {
            let pos = usize::try_from(self.0.position()).ok()?;
            let (_, range) = next_unit(self.0.get_ref(), pos)?;
            if !range.is_empty() {
                return Nalu::next(&mut self.0).ok();
            }

            self.0.set_position(u64::try_from(range.end).ok()?);
        }
    }
}

/// Iterator over the NAL units of a sample using 4-byte big endian length
/// prefixes, as stored in MP4 files. Iteration stops at the first prefix that
/// doesn't fit in what is left of the sample.
pub struct LengthPrefixedIterator<'a>(Cursor<&'a [u8]>);

impl<'a> LengthPrefixedIterator<'a> {
    pub fn new(sample: &'a [u8]) -> Self {
        Self(Cursor::new(sample))
    }
}

impl<'a> Iterator for LengthPrefixedIterator<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.0.remaining() < 4 {
            return None;
        }

        let len = self.0.get_u32() as usize;
        if len > self.0.remaining() {
            log::debug!(
                "NAL unit declares {} bytes, sample has {} left",
                len,
                self.0.remaining()
            );
            return None;
        }

        let sample: &'a [u8] = *self.0.get_ref();
        let start = self.0.position() as usize;
        self.0.advance(len);

        Some(&sample[start..start + len])
    }
}

/// Splits a whole length-prefixed sample, failing if the declared lengths
/// don't add up to the sample size.
pub fn split_length_prefixed(sample: &[u8]) -> Result<Vec<&[u8]>, ParseError> {
    let mut cursor = Cursor::new(sample);
    let mut units = Vec::new();

    while cursor.has_remaining() {
        if cursor.remaining() < 4 {
            return Err(ParseError::SizeMismatch {
                declared: 4,
                available: cursor.remaining(),
            });
        }

        let len = cursor.get_u32() as usize;
        if len > cursor.remaining() {
            return Err(ParseError::SizeMismatch {
                declared: len,
                available: cursor.remaining(),
            });
        }

        let start = cursor.position() as usize;
        cursor.advance(len);
        units.push(&sample[start..start + len]);
    }

    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct OneByteHeader(u8);

    impl Header for OneByteHeader {
        fn parse<T: AsRef<[u8]>>(cursor: &Cursor<T>) -> anyhow::Result<Self> {
            if !cursor.has_remaining() {
                return Err(anyhow!("Broken Data"));
            }

            Ok(OneByteHeader(cursor.chunk()[0]))
        }

        fn is_end(&self) -> bool {
            self.0 == 0x0b
        }

        fn len(&self) -> usize {
            1
        }
    }

    const STREAM: [u8; 20] = [
        0x00, 0x00, 0x00, 0x01, 0x67, 0x42, // 4-byte start codes
        0x00, 0x00, 0x00, 0x01, 0x68, 0xce, 0x00, 0x00, // trailing zeros
        0x00, 0x00, 0x01, 0x65, 0x88, 0x84,
    ];

    #[test]
    fn scan_stream() {
        let ranges = scan(&STREAM);
        assert_eq!(ranges, vec![4..6, 10..12, 17..20]);

        // Scanning is pure.
        assert_eq!(scan(&STREAM), ranges);
    }

    #[test]
    fn scan_short_input() {
        assert!(scan(&[]).is_empty());
        assert!(scan(&[0x00]).is_empty());
        assert!(scan(&[0x00, 0x00, 0x01]).is_empty());
        assert!(scan(&[0x00, 0x00, 0x00, 0x01]).is_empty());
        assert!(NalIterator::<OneByteHeader>::new(&[0x00, 0x00, 0x01])
            .next()
            .is_none());
    }

    #[test]
    fn iterate_stream() {
        let nalus: Vec<Nalu<OneByteHeader>> = NalIterator::new(&STREAM).collect();
        assert_eq!(nalus.len(), 3);

        assert_eq!(nalus[0].sc_offset, 0);
        assert_eq!(nalus[0].header.0, 0x67);
        assert_eq!(nalus[0].as_ref(), &[0x67, 0x42]);
        assert_eq!(nalus[0].payload(), &[0x42]);

        assert_eq!(nalus[1].sc_offset, 6);
        assert_eq!(nalus[1].as_ref(), &[0x68, 0xce]);

        assert_eq!(nalus[2].sc_offset, 13);
        assert_eq!(nalus[2].offset, 17);
        assert_eq!(nalus[2].as_ref(), &[0x65, 0x88, 0x84]);
    }

    #[test]
    fn iterate_skips_empty_units() {
        let stream = [
            0x00, 0x00, 0x01, 0x67, 0x42, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00,
            0x01, 0x68, 0xce,
        ];

        let nalus: Vec<Nalu<OneByteHeader>> = NalIterator::new(&stream).collect();
        let units: Vec<&[u8]> = nalus.iter().map(|nalu| nalu.as_ref()).collect();
        assert_eq!(units, vec![&[0x67, 0x42][..], &[0x68, 0xce][..]]);

        let offsets: Vec<usize> = nalus.iter().map(|nalu| nalu.offset).collect();
        let ranges: Vec<usize> = scan(&stream).iter().map(|range| range.start).collect();
        assert_eq!(offsets, ranges);
    }

    #[test]
    fn end_of_stream_is_one_byte() {
        let stream = [0x00, 0x00, 0x01, 0x0b, 0x00, 0x00, 0x01, 0x67, 0x42];
        let nalus: Vec<Nalu<OneByteHeader>> = NalIterator::new(&stream).collect();
        assert_eq!(nalus.len(), 2);
        assert_eq!(nalus[0].size, 1);
        assert_eq!(nalus[1].as_ref(), &[0x67, 0x42]);
    }

    #[test]
    fn length_prefixed() {
        let sample = [0, 0, 0, 2, 9, 2, 0, 0, 0, 3, 7, 5, 4];
        let units: Vec<&[u8]> = LengthPrefixedIterator::new(&sample).collect();
        assert_eq!(units, vec![&[9u8, 2][..], &[7, 5, 4][..]]);
        assert_eq!(split_length_prefixed(&sample).unwrap(), units);

        // The second unit claims more bytes than available.
        let truncated = [0, 0, 0, 1, 9, 0, 0, 0, 5, 7, 5];
        let units: Vec<&[u8]> = LengthPrefixedIterator::new(&truncated).collect();
        assert_eq!(units, vec![&[9u8][..]]);
        assert_eq!(
            split_length_prefixed(&truncated),
            Err(ParseError::SizeMismatch {
                declared: 5,
                available: 2
            })
        );

        assert_eq!(
            split_length_prefixed(&[0, 0, 0]),
            Err(ParseError::SizeMismatch {
                declared: 4,
                available: 3
            })
        );
        assert_eq!(LengthPrefixedIterator::new(&[0, 0, 0]).count(), 0);
    }

    #[test]
    fn from_unit() {
        let nalu = Nalu::<OneByteHeader>::from_unit(&[0x65, 0x88]).unwrap();
        assert_eq!(nalu.header.0, 0x65);
        assert_eq!(nalu.payload(), &[0x88]);
        assert!(Nalu::<OneByteHeader>::from_unit(&[]).is_err());
    }
}
