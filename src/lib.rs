// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Bit-level parsing of H.264 and H.265 elementary streams.
//!
//! [`utils::nalu`] splits Annex B streams and length-prefixed samples into NAL units,
//! [`codec::h264::parser`] and [`codec::h265::parser`] decode their parameter sets and slice
//! headers, and the synthesizers next to them write parameter sets back.

pub mod bitstream_utils;
pub mod codec;
pub mod utils;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl From<(u32, u32)> for Resolution {
    fn from(value: (u32, u32)) -> Self {
        Self {
            width: value.0,
            height: value.1,
        }
    }
}

/// The size of a visible rectangle, `max` being exclusive.
impl From<Rect<u32>> for Resolution {
    fn from(rect: Rect<u32>) -> Self {
        Self {
            width: rect.max.x.saturating_sub(rect.min.x),
            height: rect.max.y.saturating_sub(rect.min.y),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Point<T> {
    pub x: T,
    pub y: T,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Rect<T> {
    pub min: Point<T>,
    pub max: Point<T>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_of_rect() {
        let rect = Rect {
            min: Point { x: 8, y: 0 },
            max: Point { x: 1928, y: 1080 },
        };

        assert_eq!(Resolution::from(rect), Resolution::from((1920, 1080)));
        assert_eq!(
            Resolution::from(Rect {
                min: Point { x: 10, y: 10 },
                max: Point { x: 0, y: 0 },
            }),
            Resolution::default()
        );
    }
}
