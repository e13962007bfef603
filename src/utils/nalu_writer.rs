// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::io::Write;

use thiserror::Error;

use crate::bitstream_utils::BitWriter;
use crate::bitstream_utils::BitWriterError;

/// Byte sink inserting `emulation_prevention_three_byte` where the payload
/// would otherwise contain `00 00 0x` with x <= 3.
struct EmulationPrevention<W: Write> {
    out: W,
    /// Trailing run of zero bytes in the output.
    num_zeros: usize,
    ep_enabled: bool,
}

impl<W: Write> EmulationPrevention<W> {
    fn new(writer: W, ep_enabled: bool) -> Self {
        Self {
            out: writer,
            num_zeros: 0,
            ep_enabled,
        }
    }

    fn write_byte(&mut self, curr_byte: u8) -> std::io::Result<()> {
        if self.num_zeros >= 2 && curr_byte <= 0x03 {
            self.out.write_all(&[0x03])?;
            self.num_zeros = 0;
        }

        self.out.write_all(&[curr_byte])?;

        if curr_byte == 0x00 {
            self.num_zeros += 1;
        } else {
            self.num_zeros = 0;
        }

        Ok(())
    }

    /// Writes a 4-byte start code followed by the NAL unit header bytes,
    /// which are never escaped.
    fn write_header(&mut self, header: &[u8]) -> NaluWriterResult<()> {
        self.out.write_all(&[0x00, 0x00, 0x00, 0x01])?;
        self.out.write_all(header)?;
        self.num_zeros = 0;

        Ok(())
    }
}

impl<W: Write> Write for EmulationPrevention<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if !self.ep_enabled {
            self.out.write_all(buf)?;
            return Ok(buf.len());
        }

        for byte in buf {
            self.write_byte(*byte)?;
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.out.flush()
    }
}

#[derive(Error, Debug)]
pub enum NaluWriterError {
    #[error("value increment caused value overflow")]
    Overflow,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    BitWriterError(#[from] BitWriterError),
}

pub type NaluWriterResult<T> = std::result::Result<T, NaluWriterError>;

/// Bit-level writer for H.264 and H.265 NAL units, the counterpart of
/// [`crate::utils::nalu_reader::NaluReader`].
pub struct NaluWriter<W: Write>(BitWriter<EmulationPrevention<W>>);

impl<W: Write> NaluWriter<W> {
    pub fn new(writer: W, ep_enabled: bool) -> Self {
        Self(BitWriter::new(EmulationPrevention::new(writer, ep_enabled)))
    }

    /// `f(n)` for n <= 32.
    pub fn write_f<T: Into<u32>>(&mut self, bits: usize, value: T) -> NaluWriterResult<usize> {
        self.0
            .write_f(bits, value)
            .map_err(NaluWriterError::BitWriterError)
    }

    /// `u(n)`, same bits as `f(n)`.
    pub fn write_u<T: Into<u32>>(&mut self, bits: usize, value: T) -> NaluWriterResult<usize> {
        self.write_f(bits, value)
    }

    fn write_exp_golomb(&mut self, value: u32) -> NaluWriterResult<()> {
        let value = value.checked_add(1).ok_or(NaluWriterError::Overflow)?;
        let bits = 32 - value.leading_zeros() as usize;
        let zeros = bits - 1;

        self.write_f(zeros, 0u32)?;
        self.write_f(bits, value)?;

        Ok(())
    }

    /// `ue(v)`. `u32::MAX` has no code and fails with
    /// [`NaluWriterError::Overflow`].
    pub fn write_ue<T: Into<u32>>(&mut self, value: T) -> NaluWriterResult<()> {
        self.write_exp_golomb(value.into())
    }

    /// `se(v)`, mapping k > 0 to 2k - 1 and k <= 0 to -2k.
    pub fn write_se<T: Into<i32>>(&mut self, value: T) -> NaluWriterResult<()> {
        let value: i32 = value.into();
        let abs_value: u32 = value.unsigned_abs();

        if value <= 0 {
            self.write_ue(abs_value.checked_mul(2).ok_or(NaluWriterError::Overflow)?)
        } else {
            self.write_ue(2 * abs_value - 1)
        }
    }

    /// Starts a new NAL unit: a start code and the given header bytes.
    pub fn write_header(&mut self, header: &[u8]) -> NaluWriterResult<()> {
        self.0.flush()?;
        self.0.inner_mut().write_header(header)?;
        Ok(())
    }

    /// Whether the next bit starts a byte.
    pub fn aligned(&self) -> bool {
        !self.0.has_data_pending()
    }

    /// Pushes out the partially written byte, padded with zeros.
    pub fn flush(&mut self) -> NaluWriterResult<()> {
        self.0.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::nalu_reader::NaluReader;

    #[test]
    fn simple_bits() {
        let mut buf = Vec::<u8>::new();
        {
            let mut writer = NaluWriter::new(&mut buf, false);
            for bit in [true, true, false, true, false, false, false, true] {
                writer.write_f(1, bit).unwrap();
            }
            assert!(writer.aligned());
        }
        assert_eq!(buf, vec![0b1101_0001u8]);
    }

    #[test]
    fn simple_first_few_ue() {
        fn single_ue(value: u32) -> Vec<u8> {
            let mut buf = Vec::<u8>::new();
            {
                let mut writer = NaluWriter::new(&mut buf, false);
                writer.write_ue(value).unwrap();
            }
            buf
        }

        assert_eq!(single_ue(0), vec![0b1000_0000u8]);
        assert_eq!(single_ue(1), vec![0b0100_0000u8]);
        assert_eq!(single_ue(2), vec![0b0110_0000u8]);
        assert_eq!(single_ue(3), vec![0b0010_0000u8]);
        assert_eq!(single_ue(6), vec![0b0011_1000u8]);
        assert_eq!(single_ue(7), vec![0b0001_0000u8]);
        assert_eq!(single_ue(14), vec![0b0001_1110u8]);
        assert_eq!(single_ue(15), vec![0b0000_1000u8, 0b0000_0000u8]);
    }

    #[test]
    fn writer_reader() {
        let mut buf = Vec::<u8>::new();
        {
            let mut writer = NaluWriter::new(&mut buf, false);
            writer.write_ue(17u32).unwrap();
            writer.write_se(-9).unwrap();
            writer.write_f(5, 0b10110u8).unwrap();
            writer.write_se(1024).unwrap();
            writer.write_ue(0u32).unwrap();
        }

        let mut reader = NaluReader::new(&buf);

        assert_eq!(reader.read_ue::<u32>().unwrap(), 17);
        assert_eq!(reader.read_se::<i32>().unwrap(), -9);
        assert_eq!(reader.read_bits::<u8>(5).unwrap(), 0b10110);
        assert_eq!(reader.read_se::<i32>().unwrap(), 1024);
        assert_eq!(reader.read_ue::<u32>().unwrap(), 0);
    }

    #[test]
    fn exp_golomb_law() {
        let mut buf = Vec::<u8>::new();
        {
            let mut writer = NaluWriter::new(&mut buf, true);
            for value in 0..(1u32 << 16) {
                writer.write_ue(value).unwrap();
            }
        }

        let mut reader = NaluReader::new(&buf);
        for value in 0..(1u32 << 16) {
            assert_eq!(reader.read_ue::<u32>().unwrap(), value);
        }

        let signed = [
            0,
            1,
            -1,
            2,
            -2,
            127,
            -128,
            65535,
            -65536,
            i32::MAX,
            i32::MIN + 1,
        ];
        let mut buf = Vec::<u8>::new();
        {
            let mut writer = NaluWriter::new(&mut buf, true);
            for value in signed {
                writer.write_se(value).unwrap();
            }
        }

        let mut reader = NaluReader::new(&buf);
        for value in signed {
            assert_eq!(reader.read_se::<i32>().unwrap(), value);
        }
    }

    #[test]
    fn unencodable_values() {
        let mut writer = NaluWriter::new(Vec::<u8>::new(), false);
        assert!(matches!(
            writer.write_ue(u32::MAX),
            Err(NaluWriterError::Overflow)
        ));
        assert!(matches!(
            writer.write_se(i32::MIN),
            Err(NaluWriterError::Overflow)
        ));
    }

    #[test]
    fn writer_emulation_prevention() {
        fn test(input: &[u8], bitstream: &[u8]) {
            let mut buf = Vec::<u8>::new();
            {
                let mut writer = NaluWriter::new(&mut buf, true);
                for byte in input {
                    writer.write_f(8, *byte).unwrap();
                }
            }
            assert_eq!(buf, bitstream);
            {
                let mut reader = NaluReader::new(&buf);
                for byte in input {
                    assert_eq!(*byte, reader.read_bits::<u8>(8).unwrap());
                }
            }
        }

        test(&[0x00, 0x00, 0x00], &[0x00, 0x00, 0x03, 0x00]);
        test(&[0x00, 0x00, 0x01], &[0x00, 0x00, 0x03, 0x01]);
        test(&[0x00, 0x00, 0x03], &[0x00, 0x00, 0x03, 0x03]);
        test(&[0x00, 0x00, 0x04], &[0x00, 0x00, 0x04]);
        test(&[0x00, 0x01, 0x00, 0x02], &[0x00, 0x01, 0x00, 0x02]);

        test(
            &[0x00, 0x00, 0x00, 0x00, 0x00],
            &[0x00, 0x00, 0x03, 0x00, 0x00, 0x03, 0x00],
        );
        test(
            &[0xff, 0x00, 0x00, 0x02, 0x00],
            &[0xff, 0x00, 0x00, 0x03, 0x02, 0x00],
        );
    }

    #[test]
    fn header_is_not_escaped() {
        let mut buf = Vec::<u8>::new();
        {
            let mut writer = NaluWriter::new(&mut buf, true);
            writer.write_f(8, 0x00u8).unwrap();
            writer.write_header(&[0x40, 0x01]).unwrap();
            writer.write_f(16, 0x0000u16).unwrap();
            writer.write_f(8, 0x01u8).unwrap();
        }
        assert_eq!(
            buf,
            vec![0x00, 0x00, 0x00, 0x00, 0x01, 0x40, 0x01, 0x00, 0x00, 0x03, 0x01]
        );
    }
}
