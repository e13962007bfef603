// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! NAL unit plumbing shared by the H.264 and H.265 code: framing, reading and writing.

pub mod nalu;
pub mod nalu_reader;
pub mod nalu_writer;
