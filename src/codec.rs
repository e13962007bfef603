// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Bitstream parsers and synthesizers for the supported codecs.

use thiserror::Error;

pub mod h264;
pub mod h265;

/// Structural errors shared by the parsers of all codecs.
///
/// These travel inside the `anyhow::Error` returned by the parsing entry
/// points; use `downcast_ref::<ParseError>()` to tell a malformed stream
/// apart from missing caller-supplied context.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// A unit refers to a parameter set that is absent from the association
    /// handed to the parser.
    #[error("{kind} {id} is referenced but was not provided")]
    MissingParameterSet { kind: &'static str, id: u8 },
    #[error("{declared} bytes were declared but only {available} are available")]
    SizeMismatch { declared: usize, available: usize },
    #[error("expected a {expected} NAL unit, got type {found}")]
    UnexpectedNaluType { expected: &'static str, found: u8 },
}

/// Ceil(Log2(value)), with 0 for values of 0 and 1. Gives the width of the
/// `u(v)` fields that index into a list of `value` entries.
pub(crate) fn ceil_log2(value: u32) -> usize {
    if value <= 1 {
        0
    } else {
        (32 - (value - 1).leading_zeros()) as usize
    }
}

/// Brings a scaling list delta into the -128..=127 range of the coded
/// `delta_scale` (H.264) or `scaling_list_delta_coef` (H.265). Decoders apply
/// it modulo 256.
pub(crate) fn wrap_delta_scale(delta: i32) -> i32 {
    if delta > 127 {
        delta - 256
    } else if delta < -128 {
        delta + 256
    } else {
        delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceil_log2_values() {
        assert_eq!(ceil_log2(0), 0);
        assert_eq!(ceil_log2(1), 0);
        assert_eq!(ceil_log2(2), 1);
        assert_eq!(ceil_log2(3), 2);
        assert_eq!(ceil_log2(16), 4);
        assert_eq!(ceil_log2(31), 5);
        assert_eq!(ceil_log2(32), 5);
        assert_eq!(ceil_log2(33), 6);
    }

    #[test]
    fn wrapped_deltas() {
        assert_eq!(wrap_delta_scale(0), 0);
        assert_eq!(wrap_delta_scale(127), 127);
        assert_eq!(wrap_delta_scale(128), -128);
        assert_eq!(wrap_delta_scale(247), -9);
        assert_eq!(wrap_delta_scale(-128), -128);
        assert_eq!(wrap_delta_scale(-200), 56);
    }

    #[test]
    fn sentinels_survive_context() {
        use anyhow::Context;

        let err = Err::<(), _>(anyhow::Error::from(ParseError::MissingParameterSet {
            kind: "PPS",
            id: 3,
        }))
        .context("while parsing slice header")
        .unwrap_err();

        assert_eq!(
            err.downcast_ref::<ParseError>(),
            Some(&ParseError::MissingParameterSet { kind: "PPS", id: 3 })
        );
    }
}
