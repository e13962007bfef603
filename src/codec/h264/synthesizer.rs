// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Writes [`Sps`] and [`Pps`] records back into Annex B NAL units.

use std::io::Write;

use thiserror::Error;

use crate::codec::ceil_log2;
use crate::codec::wrap_delta_scale;
use crate::codec::h264::parser::profile_has_chroma_info;
use crate::codec::h264::parser::HrdParams;
use crate::codec::h264::parser::NaluType;
use crate::codec::h264::parser::Pps;
use crate::codec::h264::parser::Sps;
use crate::codec::h264::parser::DEFAULT_4X4_INTER;
use crate::codec::h264::parser::DEFAULT_4X4_INTRA;
use crate::codec::h264::parser::DEFAULT_8X8_INTER;
use crate::codec::h264::parser::DEFAULT_8X8_INTRA;
use crate::utils::nalu_writer::NaluWriter;
use crate::utils::nalu_writer::NaluWriterError;

mod private {
    pub trait NaluStruct {}
}

impl private::NaluStruct for Sps {}

impl private::NaluStruct for Pps {}

#[derive(Error, Debug)]
pub enum SynthesizerError {
    #[error("tried to synthesize unsupported settings")]
    Unsupported,
    #[error(transparent)]
    NaluWriter(#[from] NaluWriterError),
}

pub type SynthesizerResult<T> = Result<T, SynthesizerError>;

/// A helper to output typed NALUs to [`std::io::Write`] using [`NaluWriter`].
pub struct Synthesizer<'n, N: private::NaluStruct, W: Write> {
    writer: NaluWriter<W>,
    nalu: &'n N,
}

/// Extended Sample Aspect Ratio - H.264 Table E-1
const EXTENDED_SAR: u8 = 255;

impl<N: private::NaluStruct, W: Write> Synthesizer<'_, N, W> {
    fn u<T: Into<u32>>(&mut self, bits: usize, value: T) -> SynthesizerResult<()> {
        self.writer.write_u(bits, value)?;
        Ok(())
    }

    fn f<T: Into<u32>>(&mut self, bits: usize, value: T) -> SynthesizerResult<()> {
        self.writer.write_f(bits, value)?;
        Ok(())
    }

    fn ue<T: Into<u32>>(&mut self, value: T) -> SynthesizerResult<()> {
        self.writer.write_ue(value)?;
        Ok(())
    }

    fn se<T: Into<i32>>(&mut self, value: T) -> SynthesizerResult<()> {
        self.writer.write_se(value)?;
        Ok(())
    }

    fn header(&mut self, ref_idc: u8, type_: NaluType) -> SynthesizerResult<()> {
        self.writer
            .write_header(&[((ref_idc & 0b11) << 5) | type_ as u8])?;
        Ok(())
    }

    fn scaling_list(&mut self, list: &[u8], default: &[u8]) -> SynthesizerResult<()> {
        // H.264 7.3.2.1.1.1
        if list == default {
            // next_scale of 0 on the first entry selects the default list.
            self.se(-8)?;
            return Ok(());
        }

        // The number of list values we want to encode.
        let mut run = list.len();

        // Check how many values at the end of the matrix are the same,
        // so we can save on encoding those.
        for j in (1..list.len()).rev() {
            if list[j - 1] != list[j] {
                break;
            }
            run -= 1;
        }

        let mut last_scale = 8;
        for scale in &list[0..run] {
            self.se(wrap_delta_scale(i32::from(*scale) - last_scale))?;
            last_scale = i32::from(*scale);
        }

        // A next_scale of zero makes the decoder repeat the last value until
        // the end of the list.
        if run < list.len() {
            self.se(wrap_delta_scale(-last_scale))?;
        }

        Ok(())
    }

    fn default_scaling_list(i: usize) -> &'static [u8] {
        // H.264 Table 7-2
        match i {
            0..=2 => &DEFAULT_4X4_INTRA[..],
            3..=5 => &DEFAULT_4X4_INTER[..],
            _ if i % 2 == 0 => &DEFAULT_8X8_INTRA[..],
            _ => &DEFAULT_8X8_INTER[..],
        }
    }

    fn scaling_lists(
        &mut self,
        num_lists: usize,
        present_flags: &[bool; 12],
        scaling_lists_4x4: &[[u8; 16]; 6],
        scaling_lists_8x8: &[[u8; 64]; 6],
    ) -> SynthesizerResult<()> {
        for (i, present) in present_flags.iter().enumerate().take(num_lists) {
            self.u(1, *present)?;
            if !present {
                continue;
            }

            if i < 6 {
                self.scaling_list(&scaling_lists_4x4[i], Self::default_scaling_list(i))?;
            } else {
                self.scaling_list(&scaling_lists_8x8[i - 6], Self::default_scaling_list(i))?;
            }
        }

        Ok(())
    }

    fn rbsp_trailing_bits(&mut self) -> SynthesizerResult<()> {
        self.f(1, 1u32)?;

        while !self.writer.aligned() {
            self.f(1, 0u32)?;
        }

        Ok(())
    }
}

impl<'n, W: Write> Synthesizer<'n, Sps, W> {
    pub fn synthesize(
        ref_idc: u8,
        sps: &'n Sps,
        writer: W,
        ep_enabled: bool,
    ) -> SynthesizerResult<()> {
        let mut s = Self {
            writer: NaluWriter::<W>::new(writer, ep_enabled),
            nalu: sps,
        };

        s.header(ref_idc, NaluType::Sps)?;
        s.seq_parameter_set_data()?;
        s.rbsp_trailing_bits()
    }

    fn hrd_parameters(&mut self, hrd_params: &HrdParams) -> SynthesizerResult<()> {
        self.ue(hrd_params.cpb_cnt_minus1)?;
        self.u(4, hrd_params.bit_rate_scale)?;
        self.u(4, hrd_params.cpb_size_scale)?;

        for i in 0..=(hrd_params.cpb_cnt_minus1 as usize) {
            self.ue(hrd_params.bit_rate_value_minus1[i])?;
            self.ue(hrd_params.cpb_size_value_minus1[i])?;
            self.u(1, hrd_params.cbr_flag[i])?;
        }

        self.u(5, hrd_params.initial_cpb_removal_delay_length_minus1)?;
        self.u(5, hrd_params.cpb_removal_delay_length_minus1)?;
        self.u(5, hrd_params.dpb_output_delay_length_minus1)?;
        self.u(5, hrd_params.time_offset_length)?;

        Ok(())
    }

    fn vui_parameters(&mut self) -> SynthesizerResult<()> {
        // H.264 E.1.1
        let vui_params = &self.nalu.vui_parameters;

        self.u(1, vui_params.aspect_ratio_info_present_flag)?;
        if vui_params.aspect_ratio_info_present_flag {
            self.u(8, vui_params.aspect_ratio_idc)?;
            if vui_params.aspect_ratio_idc == EXTENDED_SAR {
                self.u(16, vui_params.sar_width)?;
                self.u(16, vui_params.sar_height)?;
            }
        }

        self.u(1, vui_params.overscan_info_present_flag)?;
        if vui_params.overscan_info_present_flag {
            self.u(1, vui_params.overscan_appropriate_flag)?;
        }

        self.u(1, vui_params.video_signal_type_present_flag)?;
        if vui_params.video_signal_type_present_flag {
            self.u(3, vui_params.video_format)?;
            self.u(1, vui_params.video_full_range_flag)?;

            self.u(1, vui_params.colour_description_present_flag)?;
            if vui_params.colour_description_present_flag {
                self.u(8, vui_params.colour_primaries)?;
                self.u(8, vui_params.transfer_characteristics)?;
                self.u(8, vui_params.matrix_coefficients)?;
            }
        }

        self.u(1, vui_params.chroma_loc_info_present_flag)?;
        if vui_params.chroma_loc_info_present_flag {
            self.ue(vui_params.chroma_sample_loc_type_top_field)?;
            self.ue(vui_params.chroma_sample_loc_type_bottom_field)?;
        }

        self.u(1, vui_params.timing_info_present_flag)?;
        if vui_params.timing_info_present_flag {
            self.u(32, vui_params.num_units_in_tick)?;
            self.u(32, vui_params.time_scale)?;
            self.u(1, vui_params.fixed_frame_rate_flag)?;
        }

        self.u(1, vui_params.nal_hrd_parameters_present_flag)?;
        if vui_params.nal_hrd_parameters_present_flag {
            self.hrd_parameters(&vui_params.nal_hrd_parameters)?;
        }
        self.u(1, vui_params.vcl_hrd_parameters_present_flag)?;
        if vui_params.vcl_hrd_parameters_present_flag {
            self.hrd_parameters(&vui_params.vcl_hrd_parameters)?;
        }

        if vui_params.nal_hrd_parameters_present_flag || vui_params.vcl_hrd_parameters_present_flag
        {
            self.u(1, vui_params.low_delay_hrd_flag)?;
        }

        self.u(1, vui_params.pic_struct_present_flag)?;

        self.u(1, vui_params.bitstream_restriction_flag)?;
        if vui_params.bitstream_restriction_flag {
            self.u(1, vui_params.motion_vectors_over_pic_boundaries_flag)?;
            self.ue(vui_params.max_bytes_per_pic_denom)?;
            self.ue(vui_params.max_bits_per_mb_denom)?;
            self.ue(vui_params.log2_max_mv_length_horizontal)?;
            self.ue(vui_params.log2_max_mv_length_vertical)?;
            self.ue(vui_params.max_num_reorder_frames)?;
            self.ue(vui_params.max_dec_frame_buffering)?;
        }

        Ok(())
    }

    fn seq_parameter_set_data(&mut self) -> SynthesizerResult<()> {
        // H.264 7.3.2.1.1
        self.u(8, self.nalu.profile_idc)?;
        self.u(1, self.nalu.constraint_set0_flag)?;
        self.u(1, self.nalu.constraint_set1_flag)?;
        self.u(1, self.nalu.constraint_set2_flag)?;
        self.u(1, self.nalu.constraint_set3_flag)?;
        self.u(1, self.nalu.constraint_set4_flag)?;
        self.u(1, self.nalu.constraint_set5_flag)?;
        self.u(2, /* reserved_zero_2bits */ 0u32)?;
        self.u(8, self.nalu.level_idc as u32)?;
        self.ue(self.nalu.seq_parameter_set_id)?;

        if profile_has_chroma_info(self.nalu.profile_idc) {
            self.ue(self.nalu.chroma_format_idc)?;

            if self.nalu.chroma_format_idc == 3 {
                self.u(1, self.nalu.separate_colour_plane_flag)?;
            }

            self.ue(self.nalu.bit_depth_luma_minus8)?;
            self.ue(self.nalu.bit_depth_chroma_minus8)?;
            self.u(1, self.nalu.qpprime_y_zero_transform_bypass_flag)?;
            self.u(1, self.nalu.seq_scaling_matrix_present_flag)?;

            if self.nalu.seq_scaling_matrix_present_flag {
                let num_lists = if self.nalu.chroma_format_idc != 3 {
                    8
                } else {
                    12
                };

                self.scaling_lists(
                    num_lists,
                    &self.nalu.seq_scaling_list_present_flag,
                    &self.nalu.scaling_lists_4x4,
                    &self.nalu.scaling_lists_8x8,
                )?;
            }
        }

        self.ue(self.nalu.log2_max_frame_num_minus4)?;
        self.ue(self.nalu.pic_order_cnt_type)?;

        if self.nalu.pic_order_cnt_type == 0 {
            self.ue(self.nalu.log2_max_pic_order_cnt_lsb_minus4)?;
        } else if self.nalu.pic_order_cnt_type == 1 {
            if self.nalu.offset_for_ref_frame.len()
                != usize::from(self.nalu.num_ref_frames_in_pic_order_cnt_cycle)
            {
                return Err(SynthesizerError::Unsupported);
            }

            self.u(1, self.nalu.delta_pic_order_always_zero_flag)?;
            self.se(self.nalu.offset_for_non_ref_pic)?;
            self.se(self.nalu.offset_for_top_to_bottom_field)?;
            self.ue(self.nalu.num_ref_frames_in_pic_order_cnt_cycle)?;

            for offset_for_ref_frame in &self.nalu.offset_for_ref_frame {
                self.se(*offset_for_ref_frame)?;
            }
        }

        self.ue(self.nalu.max_num_ref_frames)?;
        self.u(1, self.nalu.gaps_in_frame_num_value_allowed_flag)?;
        self.ue(self.nalu.pic_width_in_mbs_minus1)?;
        self.ue(self.nalu.pic_height_in_map_units_minus1)?;
        self.u(1, self.nalu.frame_mbs_only_flag)?;
        if !self.nalu.frame_mbs_only_flag {
            self.u(1, self.nalu.mb_adaptive_frame_field_flag)?;
        }
        self.u(1, self.nalu.direct_8x8_inference_flag)?;

        self.u(1, self.nalu.frame_cropping_flag)?;
        if self.nalu.frame_cropping_flag {
            self.ue(self.nalu.frame_crop_left_offset)?;
            self.ue(self.nalu.frame_crop_right_offset)?;
            self.ue(self.nalu.frame_crop_top_offset)?;
            self.ue(self.nalu.frame_crop_bottom_offset)?;
        }

        self.u(1, self.nalu.vui_parameters_present_flag)?;
        if self.nalu.vui_parameters_present_flag {
            self.vui_parameters()?;
        }

        Ok(())
    }
}

impl<'n, W: Write> Synthesizer<'n, Pps, W> {
    pub fn synthesize(
        ref_idc: u8,
        pps: &'n Pps,
        writer: W,
        ep_enabled: bool,
    ) -> SynthesizerResult<()> {
        let mut s = Self {
            writer: NaluWriter::<W>::new(writer, ep_enabled),
            nalu: pps,
        };

        s.header(ref_idc, NaluType::Pps)?;
        s.pic_parameter_set_rbsp()?;
        s.rbsp_trailing_bits()
    }

    fn slice_groups(&mut self) -> SynthesizerResult<()> {
        let pps = self.nalu;
        let num_slice_groups = pps.num_slice_groups_minus1 as usize + 1;

        self.ue(pps.slice_group_map_type)?;
        match pps.slice_group_map_type {
            0 => {
                if pps.run_length_minus1.len() != num_slice_groups {
                    return Err(SynthesizerError::Unsupported);
                }

                for run_length_minus1 in &pps.run_length_minus1 {
                    self.ue(*run_length_minus1)?;
                }
            }
            2 => {
                if pps.top_left.len() != num_slice_groups - 1
                    || pps.bottom_right.len() != num_slice_groups - 1
                {
                    return Err(SynthesizerError::Unsupported);
                }

                for (top_left, bottom_right) in pps.top_left.iter().zip(&pps.bottom_right) {
                    self.ue(*top_left)?;
                    self.ue(*bottom_right)?;
                }
            }
            3..=5 => {
                self.u(1, pps.slice_group_change_direction_flag)?;
                self.ue(pps.slice_group_change_rate_minus1)?;
            }
            6 => {
                if pps.slice_group_id.len() != pps.pic_size_in_map_units_minus1 as usize + 1 {
                    return Err(SynthesizerError::Unsupported);
                }

                self.ue(pps.pic_size_in_map_units_minus1)?;
                let bits = ceil_log2(pps.num_slice_groups_minus1 + 1);
                for slice_group_id in &pps.slice_group_id {
                    self.u(bits, *slice_group_id)?;
                }
            }
            _ => (),
        }

        Ok(())
    }

    fn pic_parameter_set_rbsp(&mut self) -> SynthesizerResult<()> {
        // H.264 7.3.2.2
        self.ue(self.nalu.pic_parameter_set_id)?;
        self.ue(self.nalu.seq_parameter_set_id)?;
        self.u(1, self.nalu.entropy_coding_mode_flag)?;
        self.u(1, self.nalu.bottom_field_pic_order_in_frame_present_flag)?;

        self.ue(self.nalu.num_slice_groups_minus1)?;
        if self.nalu.num_slice_groups_minus1 > 0 {
            self.slice_groups()?;
        }

        self.ue(self.nalu.num_ref_idx_l0_default_active_minus1)?;
        self.ue(self.nalu.num_ref_idx_l1_default_active_minus1)?;
        self.u(1, self.nalu.weighted_pred_flag)?;
        self.u(2, self.nalu.weighted_bipred_idc)?;
        self.se(self.nalu.pic_init_qp_minus26)?;
        self.se(self.nalu.pic_init_qs_minus26)?;
        self.se(self.nalu.chroma_qp_index_offset)?;
        self.u(1, self.nalu.deblocking_filter_control_present_flag)?;
        self.u(1, self.nalu.constrained_intra_pred_flag)?;
        self.u(1, self.nalu.redundant_pic_cnt_present_flag)?;

        // The trailing fields take their inferred values when absent.
        if !(self.nalu.transform_8x8_mode_flag
            || self.nalu.pic_scaling_matrix_present_flag
            || self.nalu.second_chroma_qp_index_offset != self.nalu.chroma_qp_index_offset)
        {
            return Ok(());
        }

        self.u(1, self.nalu.transform_8x8_mode_flag)?;
        self.u(1, self.nalu.pic_scaling_matrix_present_flag)?;

        if self.nalu.pic_scaling_matrix_present_flag {
            let num_lists = 6 + match (
                self.nalu.transform_8x8_mode_flag,
                self.nalu.chroma_format_idc,
            ) {
                (false, _) => 0,
                (true, 3) => 6,
                (true, _) => 2,
            };

            self.scaling_lists(
                num_lists,
                &self.nalu.pic_scaling_list_present_flag,
                &self.nalu.scaling_lists_4x4,
                &self.nalu.scaling_lists_8x8,
            )?;
        }

        self.se(self.nalu.second_chroma_qp_index_offset)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::io::Cursor;

    use super::*;
    use crate::codec::h264::parser::Nalu;
    use crate::codec::h264::parser::NaluType;
    use crate::codec::h264::parser::Parser;
    use crate::codec::h264::parser::ParserOptions;
    use crate::codec::h264::parser::Profile;

    fn from_hex(hex: &str) -> Vec<u8> {
        (0..hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).unwrap())
            .collect()
    }

    fn write_to_file(name: &str, buf: &[u8]) {
        let write_to_file = std::option_env!("CROS_BITSTREAM_TEST_WRITE_TO_FILE") == Some("true");
        if write_to_file {
            let mut out = std::fs::File::create(name).unwrap();
            out.write_all(buf).unwrap();
            out.flush().unwrap();
        }
    }

    fn round_trip_sps(sps: &Sps) -> Sps {
        let mut buf = Vec::<u8>::new();
        Synthesizer::<'_, Sps, _>::synthesize(3, sps, &mut buf, true).unwrap();

        let mut cursor = Cursor::new(&buf[..]);
        let nalu = Nalu::next(&mut cursor).unwrap();
        assert_eq!(nalu.header.type_, NaluType::Sps);
        assert_eq!(nalu.header.ref_idc, 3);

        Parser::default().parse_sps(&nalu).unwrap()
    }

    fn round_trip_pps(pps: &Pps, spses: &BTreeMap<u8, Sps>) -> Pps {
        let mut buf = Vec::<u8>::new();
        Synthesizer::<'_, Pps, _>::synthesize(3, pps, &mut buf, true).unwrap();

        let mut cursor = Cursor::new(&buf[..]);
        let nalu = Nalu::next(&mut cursor).unwrap();
        assert_eq!(nalu.header.type_, NaluType::Pps);

        Parser::default().parse_pps(&nalu, Some(spses)).unwrap()
    }

    #[test]
    fn synthesize_sps() {
        let raw_sps_buf = [0x00, 0x00, 0x00, 0x01, 0x07, 0x00, 0x00, 0x0a, 0xfb, 0x88];
        let mut raw_sps = Cursor::new(&raw_sps_buf[..]);

        let nalu = Nalu::next(&mut raw_sps).unwrap();
        assert_eq!(nalu.header.type_, NaluType::Sps);

        let parser = Parser::default();
        let sps = parser.parse_sps(&nalu).unwrap();

        let mut buf = Vec::<u8>::new();
        Synthesizer::<'_, Sps, _>::synthesize(0, &sps, &mut buf, false).unwrap();

        assert_eq!(buf, raw_sps_buf);
        write_to_file("sps.h264", &buf);

        let mut cursor = Cursor::new(&buf[..]);
        let nalu = Nalu::next(&mut cursor).unwrap();
        let sps2 = parser.parse_sps(&nalu).unwrap();

        assert_eq!(sps, sps2);
    }

    #[test]
    fn synthesize_sps_scaling_lists() {
        let sps = Sps {
            profile_idc: Profile::High as u8,
            seq_scaling_matrix_present_flag: true,
            seq_scaling_list_present_flag: [
                true, true, true, true, true, true, true, true, false, false, false, false,
            ],
            scaling_lists_4x4: [[
                11, 20, 10, 20, 10, 22, 10, 20, 10, 20, 13, 20, 10, 20, 10, 24,
            ]; 6],
            scaling_lists_8x8: [
                [
                    33, 20, 10, 21, 33, 20, 12, 20, 33, 23, 10, 20, 33, 20, 10, 20, 33, 24, 10, 20,
                    33, 20, 15, 20, 33, 20, 10, 26, 33, 20, 17, 20, 33, 28, 10, 20, 33, 20, 10, 20,
                    33, 29, 10, 20, 33, 20, 11, 20, 33, 20, 10, 20, 33, 20, 10, 20, 33, 20, 10, 20,
                    33, 20, 10, 20,
                ],
                [
                    10, 77, 11, 20, 10, 77, 12, 20, 10, 77, 13, 20, 10, 77, 14, 20, 10, 77, 15, 20,
                    10, 77, 16, 20, 10, 77, 17, 20, 10, 77, 18, 20, 10, 77, 19, 20, 10, 77, 10, 20,
                    10, 77, 10, 21, 10, 77, 10, 22, 10, 77, 10, 23, 10, 77, 10, 24, 10, 77, 10, 26,
                    10, 77, 10, 28,
                ],
                [16; 64],
                [16; 64],
                [16; 64],
                [16; 64],
            ],
            frame_mbs_only_flag: true,
            ..Default::default()
        };

        let sps2 = round_trip_sps(&sps);

        assert_eq!(sps.scaling_lists_4x4, sps2.scaling_lists_4x4);
        assert_eq!(sps.scaling_lists_8x8[..2], sps2.scaling_lists_8x8[..2]);
        // Lists 8 to 11 are not coded for 4:2:0 and fall back to lists 6 and 7.
        assert_eq!(sps2.scaling_lists_8x8[2], sps.scaling_lists_8x8[0]);
        assert_eq!(sps2.scaling_lists_8x8[3], sps.scaling_lists_8x8[1]);
    }

    #[test]
    fn synthesize_default_and_flat_scaling_lists() {
        let mut sps = Sps {
            profile_idc: Profile::High as u8,
            seq_scaling_matrix_present_flag: true,
            seq_scaling_list_present_flag: [true; 12],
            chroma_format_idc: 3,
            frame_mbs_only_flag: true,
            ..Default::default()
        };

        // Default lists are coded with a single delta, large values need the
        // modulo 256 wrap of delta_scale.
        sps.scaling_lists_4x4[0] = DEFAULT_4X4_INTRA;
        sps.scaling_lists_4x4[1] = [200; 16];
        sps.scaling_lists_4x4[2] = [255; 16];
        sps.scaling_lists_8x8[1] = DEFAULT_8X8_INTER;
        sps.scaling_lists_8x8[5] = [1; 64];

        let sps2 = round_trip_sps(&sps);
        assert_eq!(sps, sps2);
    }

    #[test]
    fn synthesize_pps() {
        let raw_sps_pps = [
            0x00, 0x00, 0x00, 0x01, 0x07, 0x4d, 0x40, 0x0d, 0xa9, 0x18, 0x28, 0x3e, 0x60, 0x0d,
            0x41, 0x80, 0x41, 0xad, 0xb0, 0xad, 0x7b, 0xdf, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08,
            0xde, 0x09, 0x88,
        ];

        let mut buf = Vec::<u8>::new();
        let mut out = Cursor::new(&mut buf);

        let mut cursor = Cursor::new(&raw_sps_pps[..]);
        let parser = Parser::default();
        let mut spses = BTreeMap::new();

        while let Ok(nalu) = Nalu::next(&mut cursor) {
            match nalu.header.type_ {
                NaluType::Sps => {
                    let sps = parser.parse_sps(&nalu).unwrap();
                    Synthesizer::<'_, Sps, _>::synthesize(0, &sps, &mut out, false).unwrap();
                    spses.insert(sps.seq_parameter_set_id, sps);
                }
                NaluType::Pps => {
                    let pps = parser.parse_pps(&nalu, Some(&spses)).unwrap();
                    Synthesizer::<'_, Pps, _>::synthesize(0, &pps, &mut out, false).unwrap();
                }
                _ => panic!(),
            }
        }

        write_to_file("sps_pps.h264", &buf);
        write_to_file("sps_pps_ref.h264", &raw_sps_pps);

        assert_eq!(buf, raw_sps_pps);
    }

    #[test]
    fn round_trip_parameter_sets() {
        let parser = Parser::default();

        for (sps_hex, pps_hexes) in [
            (
                "6764001eacd940a02ff9610000030001000003003c8f162d96",
                &["68ebecb22c"][..],
            ),
            ("6742c01ee540a0fc80", &["68ce3c80", "6851142b1c40"][..]),
        ] {
            let data = from_hex(sps_hex);
            let sps = parser.parse_sps(&Nalu::from_unit(&data).unwrap()).unwrap();
            assert_eq!(round_trip_sps(&sps), sps);

            let mut spses = BTreeMap::new();
            spses.insert(sps.seq_parameter_set_id, sps);

            for pps_hex in pps_hexes {
                let data = from_hex(pps_hex);
                let pps = parser
                    .parse_pps(&Nalu::from_unit(&data).unwrap(), Some(&spses))
                    .unwrap();
                assert_eq!(round_trip_pps(&pps, &spses), pps);
            }
        }
    }

    #[test]
    fn round_trip_pps_without_sps() {
        let parser = Parser::new(ParserOptions {
            allow_missing_sps: true,
        });

        let data = from_hex("68e84332c8b0");
        let pps = parser
            .parse_pps(&Nalu::from_unit(&data).unwrap(), None)
            .unwrap();

        let mut buf = Vec::<u8>::new();
        Synthesizer::<'_, Pps, _>::synthesize(3, &pps, &mut buf, true).unwrap();
        let nalu = Nalu::next(&mut Cursor::new(&buf[..])).unwrap();

        assert_eq!(parser.parse_pps(&nalu, None).unwrap(), pps);
    }

    #[test]
    fn round_trip_complex_sps_and_pps() {
        let _ = env_logger::try_init();

        let mut sps = Sps {
            profile_idc: Profile::High422P as u8,
            chroma_format_idc: 2,
            bit_depth_luma_minus8: 2,
            bit_depth_chroma_minus8: 2,
            pic_order_cnt_type: 1,
            offset_for_non_ref_pic: -3,
            offset_for_top_to_bottom_field: 2,
            num_ref_frames_in_pic_order_cnt_cycle: 3,
            offset_for_ref_frame: vec![4, -4, 8],
            expected_delta_per_pic_order_cnt_cycle: 8,
            max_num_ref_frames: 4,
            pic_width_in_mbs_minus1: 119,
            pic_height_in_map_units_minus1: 33,
            mb_adaptive_frame_field_flag: true,
            frame_cropping_flag: true,
            frame_crop_bottom_offset: 4,
            vui_parameters_present_flag: true,
            ..Default::default()
        };

        let vui = &mut sps.vui_parameters;
        vui.aspect_ratio_info_present_flag = true;
        vui.aspect_ratio_idc = EXTENDED_SAR;
        vui.sar_width = 4;
        vui.sar_height = 3;
        vui.video_signal_type_present_flag = true;
        vui.video_format = 1;
        vui.colour_description_present_flag = true;
        vui.colour_primaries = 1;
        vui.transfer_characteristics = 1;
        vui.matrix_coefficients = 1;
        vui.nal_hrd_parameters_present_flag = true;
        vui.nal_hrd_parameters.cpb_cnt_minus1 = 1;
        vui.nal_hrd_parameters.bit_rate_value_minus1[1] = 1000;
        vui.nal_hrd_parameters.cpb_size_value_minus1[1] = 2000;
        vui.nal_hrd_parameters.cbr_flag[1] = true;
        vui.nal_hrd_parameters.time_offset_length = 24;
        vui.low_delay_hrd_flag = true;

        assert_eq!(round_trip_sps(&sps), sps);

        let mut spses = BTreeMap::new();
        spses.insert(0, sps.clone());

        let mut pps = Pps {
            num_slice_groups_minus1: 2,
            slice_group_map_type: 6,
            pic_size_in_map_units_minus1: 5,
            slice_group_id: vec![0, 1, 2, 2, 1, 0],
            transform_8x8_mode_flag: true,
            pic_scaling_matrix_present_flag: true,
            pic_scaling_list_present_flag: [
                true, false, false, true, false, false, false, true, false, false, false, false,
            ],
            chroma_qp_index_offset: 3,
            second_chroma_qp_index_offset: 3,
            chroma_format_idc: 2,
            ..Default::default()
        };

        // Lists that are not coded fall back to the defaults, as the SPS
        // carries no scaling matrix.
        pps.scaling_lists_4x4 = [
            [7; 16],
            [7; 16],
            [7; 16],
            DEFAULT_4X4_INTER,
            DEFAULT_4X4_INTER,
            DEFAULT_4X4_INTER,
        ];
        pps.scaling_lists_8x8 = [
            DEFAULT_8X8_INTRA,
            [9; 64],
            DEFAULT_8X8_INTRA,
            [9; 64],
            DEFAULT_8X8_INTRA,
            [9; 64],
        ];

        assert_eq!(round_trip_pps(&pps, &spses), pps);
    }

    #[test]
    fn inconsistent_records_are_rejected() {
        let pps = Pps {
            num_slice_groups_minus1: 1,
            slice_group_map_type: 0,
            run_length_minus1: vec![3],
            ..Default::default()
        };

        let mut buf = Vec::<u8>::new();
        assert!(matches!(
            Synthesizer::<'_, Pps, _>::synthesize(0, &pps, &mut buf, true),
            Err(SynthesizerError::Unsupported)
        ));
    }
}
