// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::io::Cursor;
use std::io::ErrorKind;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;

use byteorder::ReadBytesExt;
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ReadBitsError {
    #[error("reader ran out of bits")]
    OutOfBits,
    #[error("more than 32 ({0}) bits were requested")]
    TooManyBitsRequested(usize),
    #[error("failed to convert read input to target type")]
    ConversionFailed,
    #[error("exp-golomb code has more than 31 leading zero bits")]
    InvalidExpGolomb,
    #[error("value {value} out of bounds, expected {min}..={max}")]
    OutOfBounds { value: i64, min: i64, max: i64 },
    #[error("more_rbsp_data() needs a seekable source")]
    NotSeekable,
    #[error("rbsp_trailing_bits don't start with 1")]
    TrailingBitsMissingStopBit,
    #[error("another 1 in rbsp_trailing_bits")]
    TrailingBitsNonZero,
    #[error("alignment_bit_equal_to_one is not set")]
    AlignmentBitNotSet,
    #[error("failed to read from the source: {0}")]
    Io(String),
}

/// Cursor state needed to undo a speculative read.
#[derive(Clone)]
struct Snapshot {
    curr_byte: u32,
    num_remaining_bits_in_curr_byte: usize,
    prev_two_bytes: u32,
    num_epb: usize,
    num_bytes_read: usize,
    error: Option<ReadBitsError>,
    position: u64,
}

/// A bit reader for h264 and h265 bitstreams. It properly handles
/// emulation-prevention bytes and stop bits.
///
/// The first error hit while pulling bits is kept: every later read fails
/// with that same error without touching the source again, so a caller may
/// issue a run of reads and look at [`NaluReader::acc_error`] once.
pub struct NaluReader<R> {
    /// The source of EBSP bytes.
    data: R,
    /// Contents of the current byte. First unread bit starting at position 8 -
    /// num_remaining_bits_in_curr_bytes.
    curr_byte: u32,
    /// Number of bits remaining in `curr_byte`
    num_remaining_bits_in_curr_byte: usize,
    /// Used in epb detection.
    prev_two_bytes: u32,
    /// Number of epbs (i.e. 0x000003) we found.
    num_epb: usize,
    /// Number of bytes pulled from `data`, epbs included.
    num_bytes_read: usize,
    /// First error encountered, if any.
    error: Option<ReadBitsError>,
}

impl<'a> NaluReader<Cursor<&'a [u8]>> {
    pub fn new(data: &'a [u8]) -> Self {
        Self::from_reader(Cursor::new(data))
    }
}

impl<R: Read> NaluReader<R> {
    pub fn from_reader(data: R) -> Self {
        Self {
            data,
            curr_byte: Default::default(),
            num_remaining_bits_in_curr_byte: Default::default(),
            prev_two_bytes: 0xffff,
            num_epb: Default::default(),
            num_bytes_read: Default::default(),
            error: None,
        }
    }

    /// Returns the first error this reader ran into, if any.
    pub fn acc_error(&self) -> Option<&ReadBitsError> {
        self.error.as_ref()
    }

    /// Read a single bit from the stream.
    pub fn read_bit(&mut self) -> Result<bool, ReadBitsError> {
        let bit = self.read_bits::<u32>(1)?;
        Ok(bit == 1)
    }

    /// Read up to 32 bits from the stream.
    pub fn read_bits<U: TryFrom<u32>>(&mut self, num_bits: usize) -> Result<U, ReadBitsError> {
        if let Some(e) = &self.error {
            return Err(e.clone());
        }

        if num_bits > 32 {
            return Err(ReadBitsError::TooManyBitsRequested(num_bits));
        }

        let mut bits_left = num_bits;
        let mut out = 0u64;

        while self.num_remaining_bits_in_curr_byte < bits_left {
            out |= u64::from(self.curr_byte) << (bits_left - self.num_remaining_bits_in_curr_byte);
            bits_left -= self.num_remaining_bits_in_curr_byte;
            self.update_curr_byte()?;
        }

        out |= u64::from(self.curr_byte) >> (self.num_remaining_bits_in_curr_byte - bits_left);
        out &= (1u64 << num_bits) - 1;
        self.num_remaining_bits_in_curr_byte -= bits_left;

        U::try_from(out as u32).map_err(|_| ReadBitsError::ConversionFailed)
    }

    /// Skip `num_bits` bits from the stream.
    pub fn skip_bits(&mut self, mut num_bits: usize) -> Result<(), ReadBitsError> {
        while num_bits > 0 {
            let n = std::cmp::min(num_bits, 32);
            self.read_bits::<u32>(n)?;
            num_bits -= n;
        }

        Ok(())
    }

    /// Returns the number of emulation-prevention bytes read so far.
    pub fn num_epb(&self) -> usize {
        self.num_epb
    }

    /// Returns the number of bytes pulled from the source so far, including
    /// emulation-prevention bytes and the partially consumed current byte.
    pub fn num_bytes_read(&self) -> usize {
        self.num_bytes_read
    }

    /// Returns the number of RBSP bits consumed so far.
    pub fn num_bits_read(&self) -> usize {
        (self.num_bytes_read - self.num_epb) * 8 - self.num_remaining_bits_in_curr_byte
    }

    /// Returns how many bits of the current byte were consumed. A fully
    /// consumed byte counts as 8.
    pub fn num_bits_read_in_curr_byte(&self) -> usize {
        8 - self.num_remaining_bits_in_curr_byte
    }

    pub fn is_byte_aligned(&self) -> bool {
        self.num_remaining_bits_in_curr_byte == 0
    }

    /// Drops whatever is left of the current byte.
    pub fn skip_to_byte_alignment(&mut self) -> Result<(), ReadBitsError> {
        self.skip_bits(self.num_remaining_bits_in_curr_byte)
    }

    /// Reads an unsigned Exp-Golomb code. Corresponds to `ue(v)`.
    pub fn read_ue<U: TryFrom<u32>>(&mut self) -> Result<U, ReadBitsError> {
        let mut num_bits = 0;

        while !self.read_bit()? {
            num_bits += 1;
            if num_bits > 31 {
                return Err(self.fail(ReadBitsError::InvalidExpGolomb));
            }
        }

        let mut value = (1u32 << num_bits) - 1;
        if num_bits > 0 {
            value += self.read_bits::<u32>(num_bits)?;
        }

        U::try_from(value).map_err(|_| ReadBitsError::ConversionFailed)
    }

    pub fn read_ue_bounded<U: TryFrom<u32>>(
        &mut self,
        min: u32,
        max: u32,
    ) -> Result<U, ReadBitsError> {
        let ue = self.read_ue::<u32>()?;
        if ue > max || ue < min {
            return Err(ReadBitsError::OutOfBounds {
                value: i64::from(ue),
                min: i64::from(min),
                max: i64::from(max),
            });
        }

        U::try_from(ue).map_err(|_| ReadBitsError::ConversionFailed)
    }

    pub fn read_ue_max<U: TryFrom<u32>>(&mut self, max: u32) -> Result<U, ReadBitsError> {
        self.read_ue_bounded(0, max)
    }

    /// Reads a signed Exp-Golomb code. Corresponds to `se(v)`.
    pub fn read_se<U: TryFrom<i32>>(&mut self) -> Result<U, ReadBitsError> {
        let ue = i64::from(self.read_ue::<u32>()?);

        let se = if ue % 2 == 0 { -ue / 2 } else { ue / 2 + 1 };

        // |se| <= 2^31 - 1 since ue <= 2^32 - 2.
        U::try_from(se as i32).map_err(|_| ReadBitsError::ConversionFailed)
    }

    pub fn read_se_bounded<U: TryFrom<i32>>(
        &mut self,
        min: i32,
        max: i32,
    ) -> Result<U, ReadBitsError> {
        let se = self.read_se::<i32>()?;
        if se < min || se > max {
            return Err(ReadBitsError::OutOfBounds {
                value: i64::from(se),
                min: i64::from(min),
                max: i64::from(max),
            });
        }

        U::try_from(se).map_err(|_| ReadBitsError::ConversionFailed)
    }

    /// Reads `rbsp_trailing_bits()`: a single 1 followed by 0s up to the end
    /// of the unit.
    pub fn read_rbsp_trailing_bits(&mut self) -> Result<(), ReadBitsError> {
        if !self.read_bit()? {
            return Err(self.fail(ReadBitsError::TrailingBitsMissingStopBit));
        }

        let rest = self.num_remaining_bits_in_curr_byte;
        if rest > 0 && self.read_bits::<u32>(rest)? != 0 {
            return Err(self.fail(ReadBitsError::TrailingBitsNonZero));
        }

        while let Some(byte) = self.next_rbsp_byte()? {
            if byte != 0 {
                return Err(self.fail(ReadBitsError::TrailingBitsNonZero));
            }
        }

        Ok(())
    }

    /// Reads `byte_alignment()` as used by h265 slice segment headers.
    pub fn byte_alignment(&mut self) -> Result<(), ReadBitsError> {
        if !self.read_bit()? {
            return Err(self.fail(ReadBitsError::AlignmentBitNotSet));
        }

        self.skip_to_byte_alignment()
    }

    fn fail(&mut self, e: ReadBitsError) -> ReadBitsError {
        if self.error.is_none() {
            self.error = Some(e.clone());
        }

        e
    }

    /// Pulls the next byte off the source. `None` means the source is
    /// exhausted.
    fn get_byte(&mut self) -> Result<Option<u8>, ReadBitsError> {
        match self.data.read_u8() {
            Ok(byte) => {
                self.num_bytes_read += 1;
                Ok(Some(byte))
            }
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(self.fail(ReadBitsError::Io(e.to_string()))),
        }
    }

    /// Returns the next RBSP byte, dropping emulation-prevention bytes.
    fn next_rbsp_byte(&mut self) -> Result<Option<u8>, ReadBitsError> {
        let mut byte = match self.get_byte()? {
            Some(byte) => byte,
            None => return Ok(None),
        };

        if (self.prev_two_bytes & 0xffff) == 0 && byte == 0x03 {
            // We found an epb
            self.num_epb += 1;
            // Read another byte
            byte = match self.get_byte()? {
                Some(byte) => byte,
                None => return Ok(None),
            };
            // We need another 3 bytes before another epb can happen.
            self.prev_two_bytes = 0xffff;
        }

        self.prev_two_bytes = ((self.prev_two_bytes & 0xff) << 8) | u32::from(byte);
        Ok(Some(byte))
    }

    fn update_curr_byte(&mut self) -> Result<(), ReadBitsError> {
        match self.next_rbsp_byte()? {
            Some(byte) => {
                self.num_remaining_bits_in_curr_byte = 8;
                self.curr_byte = u32::from(byte);
                Ok(())
            }
            None => Err(self.fail(ReadBitsError::OutOfBits)),
        }
    }
}

impl<R: Read + Seek> NaluReader<R> {
    /// Whether the stream still has RBSP data before `rbsp_trailing_bits()`.
    /// Implements more_rbsp_data().
    ///
    /// The check reads ahead and then rewinds the source, so the source must
    /// support seeking. A failing seek is reported as
    /// [`ReadBitsError::NotSeekable`].
    pub fn has_more_rbsp_data(&mut self) -> Result<bool, ReadBitsError> {
        if let Some(e) = &self.error {
            return Err(e.clone());
        }

        let snapshot = self.snapshot()?;
        let peeked = self.peek_more_data();
        self.restore(snapshot)?;

        peeked.map_err(|e| self.fail(e))
    }

    fn peek_more_data(&mut self) -> Result<bool, ReadBitsError> {
        match self.read_bit() {
            Ok(_) => (),
            Err(ReadBitsError::OutOfBits) => return Ok(false),
            Err(e) => return Err(e),
        }

        // Any set bit past the next one means the next bit is not the stop bit.
        let rest = self.num_remaining_bits_in_curr_byte;
        let mut more_data = rest > 0 && self.read_bits::<u32>(rest)? != 0;

        while !more_data {
            match self.next_rbsp_byte()? {
                Some(byte) => more_data = byte != 0,
                None => break,
            }
        }

        Ok(more_data)
    }

    fn snapshot(&mut self) -> Result<Snapshot, ReadBitsError> {
        let position = self
            .data
            .stream_position()
            .map_err(|_| ReadBitsError::NotSeekable)?;

        Ok(Snapshot {
            curr_byte: self.curr_byte,
            num_remaining_bits_in_curr_byte: self.num_remaining_bits_in_curr_byte,
            prev_two_bytes: self.prev_two_bytes,
            num_epb: self.num_epb,
            num_bytes_read: self.num_bytes_read,
            error: self.error.clone(),
            position,
        })
    }

    fn restore(&mut self, snapshot: Snapshot) -> Result<(), ReadBitsError> {
        if self.data.seek(SeekFrom::Start(snapshot.position)).is_err() {
            return Err(self.fail(ReadBitsError::NotSeekable));
        }

        self.curr_byte = snapshot.curr_byte;
        self.num_remaining_bits_in_curr_byte = snapshot.num_remaining_bits_in_curr_byte;
        self.prev_two_bytes = snapshot.prev_two_bytes;
        self.num_epb = snapshot.num_epb;
        self.num_bytes_read = snapshot.num_bytes_read;
        self.error = snapshot.error;

        Ok(())
    }
}
