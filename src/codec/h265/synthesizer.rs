// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Writes [`Vps`], [`Sps`] and [`Pps`] records back into Annex B NAL units.

use std::io::Write;

use thiserror::Error;

use crate::codec::h265::parser::profile_matches;
use crate::codec::h265::parser::HrdParams;
use crate::codec::h265::parser::NaluType;
use crate::codec::h265::parser::Pps;
use crate::codec::h265::parser::ProfileTierLevel;
use crate::codec::h265::parser::ScalingLists;
use crate::codec::h265::parser::ShortTermRefPicSet;
use crate::codec::h265::parser::Sps;
use crate::codec::h265::parser::SublayerHrdParameters;
use crate::codec::h265::parser::VuiParams;
use crate::codec::h265::parser::Vps;
use crate::codec::h265::parser::MAX_SUB_LAYERS;
use crate::codec::wrap_delta_scale;
use crate::utils::nalu_writer::NaluWriter;
use crate::utils::nalu_writer::NaluWriterError;

mod private {
    pub trait NaluStruct {}
}

impl private::NaluStruct for Vps {}

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
///
/// Parameter sets are always written with `nuh_layer_id` 0 and `TemporalId` 0.
pub struct Synthesizer<'n, N: private::NaluStruct, W: Write> {
    writer: NaluWriter<W>,
    nalu: &'n N,
}

/// Extended Sample Aspect Ratio - H.265 Table E-1
const EXTENDED_SAR: u32 = 255;

/// Returns `Unsupported` unless `len` entries are present where the record
/// announces `expected`.
fn check_len(len: usize, expected: usize) -> SynthesizerResult<()> {
    if len != expected {
        return Err(SynthesizerError::Unsupported);
    }

    Ok(())
}

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

    /// Writes `bits` reserved zero bits.
    fn reserved_zero_bits(&mut self, mut bits: usize) -> SynthesizerResult<()> {
        while bits > 0 {
            let chunk = bits.min(32);
            self.f(chunk, 0u32)?;
            bits -= chunk;
        }

        Ok(())
    }

    fn header(&mut self, type_: NaluType) -> SynthesizerResult<()> {
        // forbidden_zero_bit, nal_unit_type, nuh_layer_id and
        // nuh_temporal_id_plus1, 7.3.1.2.
        self.writer.write_header(&[(type_ as u8) << 1, 1])?;
        Ok(())
    }

    /// The flags that follow the profile compatibility flags in 7.3.3.
    /// `flags` holds the nine constraint flags from max_12bit to
    /// lower_bit_rate, in coding order.
    fn profile_constraint_flags(
        &mut self,
        idc: u8,
        compat: &[bool; 32],
        flags: [bool; 9],
        max_14bit_constraint_flag: bool,
        inbld_flag: bool,
    ) -> SynthesizerResult<()> {
        if profile_matches(idc, compat, &[4, 5, 6, 7, 8, 9, 10, 11]) {
            for flag in flags {
                self.u(1, flag)?;
            }

            if profile_matches(idc, compat, &[5, 9, 10, 11]) {
                self.u(1, max_14bit_constraint_flag)?;
                self.reserved_zero_bits(33)?;
            } else {
                self.reserved_zero_bits(34)?;
            }
        } else if profile_matches(idc, compat, &[2]) {
            self.reserved_zero_bits(7)?;
            // one_picture_only_constraint_flag
            self.u(1, flags[7])?;
            self.reserved_zero_bits(35)?;
        } else {
            self.reserved_zero_bits(43)?;
        }

        if profile_matches(idc, compat, &[1, 2, 3, 4, 5, 9, 11]) {
            self.u(1, inbld_flag)?;
        } else {
            self.reserved_zero_bits(1)?;
        }

        Ok(())
    }

    fn profile_tier_level(
        &mut self,
        ptl: &ProfileTierLevel,
        max_sub_layers_minus1: u8,
    ) -> SynthesizerResult<()> {
        // H.265 7.3.3, profilePresentFlag is always 1 for parameter sets.
        self.u(2, ptl.general_profile_space)?;
        self.u(1, ptl.general_tier_flag)?;
        self.u(5, ptl.general_profile_idc)?;

        for flag in ptl.general_profile_compatibility_flag {
            self.u(1, flag)?;
        }

        self.u(1, ptl.general_progressive_source_flag)?;
        self.u(1, ptl.general_interlaced_source_flag)?;
        self.u(1, ptl.general_non_packed_constraint_flag)?;
        self.u(1, ptl.general_frame_only_constraint_flag)?;

        self.profile_constraint_flags(
            ptl.general_profile_idc,
            &ptl.general_profile_compatibility_flag,
            [
                ptl.general_max_12bit_constraint_flag,
                ptl.general_max_10bit_constraint_flag,
                ptl.general_max_8bit_constraint_flag,
                ptl.general_max_422chroma_constraint_flag,
                ptl.general_max_420chroma_constraint_flag,
                ptl.general_max_monochrome_constraint_flag,
                ptl.general_intra_constraint_flag,
                ptl.general_one_picture_only_constraint_flag,
                ptl.general_lower_bit_rate_constraint_flag,
            ],
            ptl.general_max_14bit_constraint_flag,
            ptl.general_inbld_flag,
        )?;

        self.u(8, ptl.general_level_idc)?;

        let max_sub_layers_minus1 = usize::from(max_sub_layers_minus1);

        for i in 0..max_sub_layers_minus1 {
            self.u(1, ptl.sub_layer_profile_present_flag[i])?;
            self.u(1, ptl.sub_layer_level_present_flag[i])?;
        }

        if max_sub_layers_minus1 > 0 {
            self.reserved_zero_bits(2 * (8 - max_sub_layers_minus1))?;
        }

        for i in 0..max_sub_layers_minus1 {
            if ptl.sub_layer_profile_present_flag[i] {
                self.u(2, ptl.sub_layer_profile_space[i])?;
                self.u(1, ptl.sub_layer_tier_flag[i])?;
                self.u(5, ptl.sub_layer_profile_idc[i])?;

                for flag in ptl.sub_layer_profile_compatibility_flag[i] {
                    self.u(1, flag)?;
                }

                self.u(1, ptl.sub_layer_progressive_source_flag[i])?;
                self.u(1, ptl.sub_layer_interlaced_source_flag[i])?;
                self.u(1, ptl.sub_layer_non_packed_constraint_flag[i])?;
                self.u(1, ptl.sub_layer_frame_only_constraint_flag[i])?;

                self.profile_constraint_flags(
                    ptl.sub_layer_profile_idc[i],
                    &ptl.sub_layer_profile_compatibility_flag[i],
                    [
                        ptl.sub_layer_max_12bit_constraint_flag[i],
                        ptl.sub_layer_max_10bit_constraint_flag[i],
                        ptl.sub_layer_max_8bit_constraint_flag[i],
                        ptl.sub_layer_max_422chroma_constraint_flag[i],
                        ptl.sub_layer_max_420chroma_constraint_flag[i],
                        ptl.sub_layer_max_monochrome_constraint_flag[i],
                        ptl.sub_layer_intra_constraint_flag[i],
                        ptl.sub_layer_one_picture_only_constraint_flag[i],
                        ptl.sub_layer_lower_bit_rate_constraint_flag[i],
                    ],
                    ptl.sub_layer_max_14bit_constraint_flag[i],
                    ptl.sub_layer_inbld_flag[i],
                )?;
            }

            if ptl.sub_layer_level_present_flag[i] {
                self.u(8, ptl.sub_layer_level_idc[i])?;
            }
        }

        Ok(())
    }

    fn sub_layer_hrd_parameters(
        &mut self,
        h: &SublayerHrdParameters,
        cpb_cnt: usize,
        sub_pic_hrd_params_present_flag: bool,
    ) -> SynthesizerResult<()> {
        // H.265 E.2.3
        if cpb_cnt > h.cbr_flag.len() {
            return Err(SynthesizerError::Unsupported);
        }

        for i in 0..cpb_cnt {
            self.ue(h.bit_rate_value_minus1[i])?;
            self.ue(h.cpb_size_value_minus1[i])?;
            if sub_pic_hrd_params_present_flag {
                self.ue(h.cpb_size_du_value_minus1[i])?;
                self.ue(h.bit_rate_du_value_minus1[i])?;
            }
            self.u(1, h.cbr_flag[i])?;
        }

        Ok(())
    }

    fn hrd_parameters(
        &mut self,
        hrd: &HrdParams,
        common_inf_present_flag: bool,
        max_sub_layers_minus1: u8,
    ) -> SynthesizerResult<()> {
        // H.265 E.2.2
        if common_inf_present_flag {
            self.u(1, hrd.nal_hrd_parameters_present_flag)?;
            self.u(1, hrd.vcl_hrd_parameters_present_flag)?;

            if hrd.nal_hrd_parameters_present_flag || hrd.vcl_hrd_parameters_present_flag {
                self.u(1, hrd.sub_pic_hrd_params_present_flag)?;
                if hrd.sub_pic_hrd_params_present_flag {
                    self.u(8, hrd.tick_divisor_minus2)?;
                    self.u(5, hrd.du_cpb_removal_delay_increment_length_minus1)?;
                    self.u(1, hrd.sub_pic_cpb_params_in_pic_timing_sei_flag)?;
                    self.u(5, hrd.dpb_output_delay_du_length_minus1)?;
                }

                self.u(4, hrd.bit_rate_scale)?;
                self.u(4, hrd.cpb_size_scale)?;
                if hrd.sub_pic_hrd_params_present_flag {
                    self.u(4, hrd.cpb_size_du_scale)?;
                }

                self.u(5, hrd.initial_cpb_removal_delay_length_minus1)?;
                self.u(5, hrd.au_cpb_removal_delay_length_minus1)?;
                self.u(5, hrd.dpb_output_delay_length_minus1)?;
            }
        }

        for i in 0..=usize::from(max_sub_layers_minus1) {
            self.u(1, hrd.fixed_pic_rate_general_flag[i])?;
            if !hrd.fixed_pic_rate_general_flag[i] {
                self.u(1, hrd.fixed_pic_rate_within_cvs_flag[i])?;
            } else if !hrd.fixed_pic_rate_within_cvs_flag[i] {
                // Inferred to be 1 by the decoder.
                return Err(SynthesizerError::Unsupported);
            }

            if hrd.fixed_pic_rate_within_cvs_flag[i] {
                self.ue(hrd.elemental_duration_in_tc_minus1[i])?;
            } else {
                self.u(1, hrd.low_delay_hrd_flag[i])?;
            }

            if !hrd.low_delay_hrd_flag[i] {
                self.ue(hrd.cpb_cnt_minus1[i])?;
            }

            let cpb_cnt = hrd.cpb_cnt_minus1[i] as usize + 1;

            if hrd.nal_hrd_parameters_present_flag {
                self.sub_layer_hrd_parameters(
                    &hrd.nal_hrd[i],
                    cpb_cnt,
                    hrd.sub_pic_hrd_params_present_flag,
                )?;
            }

            if hrd.vcl_hrd_parameters_present_flag {
                self.sub_layer_hrd_parameters(
                    &hrd.vcl_hrd[i],
                    cpb_cnt,
                    hrd.sub_pic_hrd_params_present_flag,
                )?;
            }
        }

        Ok(())
    }

    fn scaling_list_data(&mut self, sl: &ScalingLists) -> SynthesizerResult<()> {
        // H.265 7.3.4
        for size_id in 0..4 {
            let step = if size_id == 3 { 3 } else { 1 };

            for matrix_id in (0..6).step_by(step) {
                let pred_mode_flag = sl.pred_mode_flag[size_id][matrix_id];
                self.u(1, pred_mode_flag)?;

                if !pred_mode_flag {
                    let delta = sl.pred_matrix_id_delta[size_id][matrix_id];
                    if usize::from(delta) > matrix_id / step {
                        return Err(SynthesizerError::Unsupported);
                    }

                    self.ue(delta)?;
                    continue;
                }

                let mut next_coef = 8;

                if size_id > 1 {
                    let dc_coef_minus8 = sl.dc_coef_minus8(size_id, matrix_id);
                    if !(-7..=247).contains(&dc_coef_minus8) {
                        return Err(SynthesizerError::Unsupported);
                    }

                    self.se(dc_coef_minus8)?;
                    next_coef = i32::from(dc_coef_minus8) + 8;
                }

                for coef in sl.list(size_id, matrix_id) {
                    self.se(wrap_delta_scale(i32::from(*coef) - next_coef))?;
                    next_coef = i32::from(*coef);
                }
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

impl<'n, W: Write> Synthesizer<'n, Vps, W> {
    pub fn synthesize(vps: &'n Vps, writer: W, ep_enabled: bool) -> SynthesizerResult<()> {
        let mut s = Self {
            writer: NaluWriter::<W>::new(writer, ep_enabled),
            nalu: vps,
        };

        s.header(NaluType::VpsNut)?;
        s.video_parameter_set_rbsp()?;
        s.rbsp_trailing_bits()
    }

    fn video_parameter_set_rbsp(&mut self) -> SynthesizerResult<()> {
        // H.265 7.3.2.1
        let vps = self.nalu;

        if usize::from(vps.max_sub_layers_minus1) >= MAX_SUB_LAYERS {
            return Err(SynthesizerError::Unsupported);
        }

        self.u(4, vps.video_parameter_set_id)?;
        self.u(1, vps.base_layer_internal_flag)?;
        self.u(1, vps.base_layer_available_flag)?;
        self.u(6, vps.max_layers_minus1)?;
        self.u(3, vps.max_sub_layers_minus1)?;
        self.u(1, vps.temporal_id_nesting_flag)?;
        // vps_reserved_0xffff_16bits
        self.f(16, 0xffffu32)?;

        self.profile_tier_level(&vps.profile_tier_level, vps.max_sub_layers_minus1)?;

        self.u(1, vps.sub_layer_ordering_info_present_flag)?;

        let max_sub_layer = usize::from(vps.max_sub_layers_minus1);
        let start = if vps.sub_layer_ordering_info_present_flag {
            0
        } else {
            max_sub_layer
        };

        for i in start..=max_sub_layer {
            self.ue(vps.max_dec_pic_buffering_minus1[i])?;
            self.ue(vps.max_num_reorder_pics[i])?;
            self.ue(vps.max_latency_increase_plus1[i])?;
        }

        self.u(6, vps.max_layer_id)?;
        self.ue(vps.num_layer_sets_minus1)?;

        check_len(
            vps.layer_id_included_flag.len(),
            vps.num_layer_sets_minus1 as usize,
        )?;
        for flags in &vps.layer_id_included_flag {
            check_len(flags.len(), usize::from(vps.max_layer_id) + 1)?;
            for flag in flags {
                self.u(1, *flag)?;
            }
        }

        self.u(1, vps.timing_info_present_flag)?;
        if vps.timing_info_present_flag {
            self.u(32, vps.num_units_in_tick)?;
            self.u(32, vps.time_scale)?;
            self.u(1, vps.poc_proportional_to_timing_flag)?;
            if vps.poc_proportional_to_timing_flag {
                self.ue(vps.num_ticks_poc_diff_one_minus1)?;
            }

            let num_hrd_parameters = vps.num_hrd_parameters as usize;
            check_len(vps.hrd_layer_set_idx.len(), num_hrd_parameters)?;
            check_len(vps.hrd_parameters.len(), num_hrd_parameters)?;

            self.ue(vps.num_hrd_parameters)?;
            for (i, hrd) in vps.hrd_parameters.iter().enumerate() {
                self.ue(vps.hrd_layer_set_idx[i])?;

                // cprms_present_flag[0] is inferred to be 1.
                let cprms_present_flag = match vps.cprms_present_flag.get(i) {
                    Some(flag) if i > 0 => *flag,
                    Some(true) => true,
                    _ => return Err(SynthesizerError::Unsupported),
                };

                if i > 0 {
                    self.u(1, cprms_present_flag)?;
                }

                self.hrd_parameters(hrd, cprms_present_flag, vps.max_sub_layers_minus1)?;
            }
        }

        // Extension data is not kept by the parser, only the flag.
        self.u(1, vps.extension_flag)?;

        Ok(())
    }
}

impl<'n, W: Write> Synthesizer<'n, Sps, W> {
    pub fn synthesize(sps: &'n Sps, writer: W, ep_enabled: bool) -> SynthesizerResult<()> {
        let mut s = Self {
            writer: NaluWriter::<W>::new(writer, ep_enabled),
            nalu: sps,
        };

        s.header(NaluType::SpsNut)?;
        s.seq_parameter_set_rbsp()?;
        s.rbsp_trailing_bits()
    }

    fn short_term_ref_pic_set(
        &mut self,
        st: &ShortTermRefPicSet,
        st_rps_idx: u8,
    ) -> SynthesizerResult<()> {
        // H.265 7.3.7
        let num_short_term_ref_pic_sets = self.nalu.num_short_term_ref_pic_sets;

        if st_rps_idx != 0 {
            self.u(1, st.inter_ref_pic_set_prediction_flag)?;
        } else if st.inter_ref_pic_set_prediction_flag {
            return Err(SynthesizerError::Unsupported);
        }

        if st.inter_ref_pic_set_prediction_flag {
            if st_rps_idx == num_short_term_ref_pic_sets {
                self.ue(st.delta_idx_minus1)?;
            }

            self.u(1, st.delta_rps_sign)?;
            self.ue(st.abs_delta_rps_minus1)?;

            check_len(st.use_delta_flag.len(), st.used_by_curr_pic_flag.len())?;
            for (used, use_delta) in st.used_by_curr_pic_flag.iter().zip(&st.use_delta_flag) {
                self.u(1, *used)?;
                if !used {
                    self.u(1, *use_delta)?;
                }
            }

            return Ok(());
        }

        check_len(st.used_by_curr_pic_s0.len(), st.delta_poc_s0.len())?;
        check_len(st.used_by_curr_pic_s1.len(), st.delta_poc_s1.len())?;

        self.ue(st.delta_poc_s0.len() as u32)?;
        self.ue(st.delta_poc_s1.len() as u32)?;

        // S0 is stored in decreasing, S1 in increasing POC order, (7-67) and
        // (7-68).
        let mut prev = 0;
        for (delta_poc, used) in st.delta_poc_s0.iter().zip(&st.used_by_curr_pic_s0) {
            let delta_poc_s0_minus1 = u32::try_from(prev - delta_poc - 1)
                .map_err(|_| SynthesizerError::Unsupported)?;
            self.ue(delta_poc_s0_minus1)?;
            self.u(1, *used)?;
            prev = *delta_poc;
        }

        let mut prev = 0;
        for (delta_poc, used) in st.delta_poc_s1.iter().zip(&st.used_by_curr_pic_s1) {
            let delta_poc_s1_minus1 = u32::try_from(delta_poc - prev - 1)
                .map_err(|_| SynthesizerError::Unsupported)?;
            self.ue(delta_poc_s1_minus1)?;
            self.u(1, *used)?;
            prev = *delta_poc;
        }

        Ok(())
    }

    fn vui_parameters(&mut self, vui: &VuiParams) -> SynthesizerResult<()> {
        // H.265 E.2.1
        self.u(1, vui.aspect_ratio_info_present_flag)?;
        if vui.aspect_ratio_info_present_flag {
            self.u(8, vui.aspect_ratio_idc)?;
            if vui.aspect_ratio_idc == EXTENDED_SAR {
                self.u(16, vui.sar_width)?;
                self.u(16, vui.sar_height)?;
            }
        }

        self.u(1, vui.overscan_info_present_flag)?;
        if vui.overscan_info_present_flag {
            self.u(1, vui.overscan_appropriate_flag)?;
        }

        self.u(1, vui.video_signal_type_present_flag)?;
        if vui.video_signal_type_present_flag {
            self.u(3, vui.video_format)?;
            self.u(1, vui.video_full_range_flag)?;

            self.u(1, vui.colour_description_present_flag)?;
            if vui.colour_description_present_flag {
                self.u(8, vui.colour_primaries)?;
                self.u(8, vui.transfer_characteristics)?;
                self.u(8, vui.matrix_coeffs)?;
            }
        }

        self.u(1, vui.chroma_loc_info_present_flag)?;
        if vui.chroma_loc_info_present_flag {
            self.ue(vui.chroma_sample_loc_type_top_field)?;
            self.ue(vui.chroma_sample_loc_type_bottom_field)?;
        }

        self.u(1, vui.neutral_chroma_indication_flag)?;
        self.u(1, vui.field_seq_flag)?;
        self.u(1, vui.frame_field_info_present_flag)?;

        self.u(1, vui.default_display_window_flag)?;
        if vui.default_display_window_flag {
            self.ue(vui.def_disp_win_left_offset)?;
            self.ue(vui.def_disp_win_right_offset)?;
            self.ue(vui.def_disp_win_top_offset)?;
            self.ue(vui.def_disp_win_bottom_offset)?;
        }

        self.u(1, vui.timing_info_present_flag)?;
        if vui.timing_info_present_flag {
            self.u(32, vui.num_units_in_tick)?;
            self.u(32, vui.time_scale)?;
            self.u(1, vui.poc_proportional_to_timing_flag)?;
            if vui.poc_proportional_to_timing_flag {
                self.ue(vui.num_ticks_poc_diff_one_minus1)?;
            }

            self.u(1, vui.hrd_parameters_present_flag)?;
            if vui.hrd_parameters_present_flag {
                self.hrd_parameters(&vui.hrd, true, self.nalu.max_sub_layers_minus1)?;
            }
        }

        self.u(1, vui.bitstream_restriction_flag)?;
        if vui.bitstream_restriction_flag {
            self.u(1, vui.tiles_fixed_structure_flag)?;
            self.u(1, vui.motion_vectors_over_pic_boundaries_flag)?;
            self.u(1, vui.restricted_ref_pic_lists_flag)?;
            self.ue(vui.min_spatial_segmentation_idc)?;
            self.ue(vui.max_bytes_per_pic_denom)?;
            self.ue(vui.max_bits_per_min_cu_denom)?;
            self.ue(vui.log2_max_mv_length_horizontal)?;
            self.ue(vui.log2_max_mv_length_vertical)?;
        }

        Ok(())
    }

    fn sps_range_extension(&mut self) -> SynthesizerResult<()> {
        // H.265 7.3.2.2.2
        let ext = &self.nalu.range_extension;

        self.u(1, ext.transform_skip_rotation_enabled_flag)?;
        self.u(1, ext.transform_skip_context_enabled_flag)?;
        self.u(1, ext.implicit_rdpcm_enabled_flag)?;
        self.u(1, ext.explicit_rdpcm_enabled_flag)?;
        self.u(1, ext.extended_precision_processing_flag)?;
        self.u(1, ext.intra_smoothing_disabled_flag)?;
        self.u(1, ext.high_precision_offsets_enabled_flag)?;
        self.u(1, ext.persistent_rice_adaptation_enabled_flag)?;
        self.u(1, ext.cabac_bypass_alignment_enabled_flag)?;

        Ok(())
    }

    fn sps_scc_extension(&mut self) -> SynthesizerResult<()> {
        // H.265 7.3.2.2.3
        let sps = self.nalu;
        let scc = &sps.scc_extension;

        self.u(1, scc.curr_pic_ref_enabled_flag)?;
        self.u(1, scc.palette_mode_enabled_flag)?;
        if scc.palette_mode_enabled_flag {
            self.ue(scc.palette_max_size)?;
            self.ue(scc.delta_palette_max_predictor_size)?;
            self.u(1, scc.palette_predictor_initializers_present_flag)?;

            if scc.palette_predictor_initializers_present_flag {
                self.ue(scc.num_palette_predictor_initializers_minus1)?;

                let num_comps = if sps.chroma_format_idc == 0 { 1 } else { 3 };
                let num_entries = usize::from(scc.num_palette_predictor_initializers_minus1) + 1;

                for (comp, entries) in scc
                    .palette_predictor_initializer
                    .iter()
                    .enumerate()
                    .take(num_comps)
                {
                    let num_bits = if comp == 0 {
                        usize::from(sps.bit_depth_luma_minus8) + 8
                    } else {
                        usize::from(sps.bit_depth_chroma_minus8) + 8
                    };

                    check_len(entries.len(), num_entries)?;
                    for entry in entries {
                        self.u(num_bits, *entry)?;
                    }
                }
            }
        }

        self.u(2, scc.motion_vector_resolution_control_idc)?;
        self.u(1, scc.intra_boundary_filtering_disabled_flag)?;

        Ok(())
    }

    fn seq_parameter_set_rbsp(&mut self) -> SynthesizerResult<()> {
        // H.265 7.3.2.2.1
        let sps = self.nalu;

        if usize::from(sps.max_sub_layers_minus1) >= MAX_SUB_LAYERS {
            return Err(SynthesizerError::Unsupported);
        }

        self.u(4, sps.video_parameter_set_id)?;
        self.u(3, sps.max_sub_layers_minus1)?;
        self.u(1, sps.temporal_id_nesting_flag)?;

        self.profile_tier_level(&sps.profile_tier_level, sps.max_sub_layers_minus1)?;

        self.ue(sps.seq_parameter_set_id)?;
        self.ue(sps.chroma_format_idc)?;
        if sps.chroma_format_idc == 3 {
            self.u(1, sps.separate_colour_plane_flag)?;
        }

        self.ue(sps.pic_width_in_luma_samples)?;
        self.ue(sps.pic_height_in_luma_samples)?;

        self.u(1, sps.conformance_window_flag)?;
        if sps.conformance_window_flag {
            self.ue(sps.conf_win_left_offset)?;
            self.ue(sps.conf_win_right_offset)?;
            self.ue(sps.conf_win_top_offset)?;
            self.ue(sps.conf_win_bottom_offset)?;
        }

        self.ue(sps.bit_depth_luma_minus8)?;
        self.ue(sps.bit_depth_chroma_minus8)?;
        self.ue(sps.log2_max_pic_order_cnt_lsb_minus4)?;

        self.u(1, sps.sub_layer_ordering_info_present_flag)?;

        let max_sub_layer = usize::from(sps.max_sub_layers_minus1);
        let start = if sps.sub_layer_ordering_info_present_flag {
            0
        } else {
            max_sub_layer
        };

        for i in start..=max_sub_layer {
            self.ue(sps.max_dec_pic_buffering_minus1[i])?;
            self.ue(sps.max_num_reorder_pics[i])?;
            self.ue(sps.max_latency_increase_plus1[i])?;
        }

        self.ue(sps.log2_min_luma_coding_block_size_minus3)?;
        self.ue(sps.log2_diff_max_min_luma_coding_block_size)?;
        self.ue(sps.log2_min_luma_transform_block_size_minus2)?;
        self.ue(sps.log2_diff_max_min_luma_transform_block_size)?;
        self.ue(sps.max_transform_hierarchy_depth_inter)?;
        self.ue(sps.max_transform_hierarchy_depth_intra)?;

        self.u(1, sps.scaling_list_enabled_flag)?;
        if sps.scaling_list_enabled_flag {
            self.u(1, sps.scaling_list_data_present_flag)?;
            if sps.scaling_list_data_present_flag {
                self.scaling_list_data(&sps.scaling_list)?;
            }
        }

        self.u(1, sps.amp_enabled_flag)?;
        self.u(1, sps.sample_adaptive_offset_enabled_flag)?;

        self.u(1, sps.pcm_enabled_flag)?;
        if sps.pcm_enabled_flag {
            self.u(4, sps.pcm_sample_bit_depth_luma_minus1)?;
            self.u(4, sps.pcm_sample_bit_depth_chroma_minus1)?;
            self.ue(sps.log2_min_pcm_luma_coding_block_size_minus3)?;
            self.ue(sps.log2_diff_max_min_pcm_luma_coding_block_size)?;
            self.u(1, sps.pcm_loop_filter_disabled_flag)?;
        }

        check_len(
            sps.short_term_ref_pic_set.len(),
            usize::from(sps.num_short_term_ref_pic_sets),
        )?;

        self.ue(sps.num_short_term_ref_pic_sets)?;
        for (i, st) in (0u8..).zip(&sps.short_term_ref_pic_set) {
            self.short_term_ref_pic_set(st, i)?;
        }

        self.u(1, sps.long_term_ref_pics_present_flag)?;
        if sps.long_term_ref_pics_present_flag {
            let num_long_term_ref_pics_sps = usize::from(sps.num_long_term_ref_pics_sps);
            check_len(sps.lt_ref_pic_poc_lsb_sps.len(), num_long_term_ref_pics_sps)?;
            check_len(
                sps.used_by_curr_pic_lt_sps_flag.len(),
                num_long_term_ref_pics_sps,
            )?;

            let num_bits = usize::from(sps.log2_max_pic_order_cnt_lsb_minus4) + 4;

            self.ue(sps.num_long_term_ref_pics_sps)?;
            for (lsb, used) in sps
                .lt_ref_pic_poc_lsb_sps
                .iter()
                .zip(&sps.used_by_curr_pic_lt_sps_flag)
            {
                self.u(num_bits, *lsb)?;
                self.u(1, *used)?;
            }
        }

        self.u(1, sps.temporal_mvp_enabled_flag)?;
        self.u(1, sps.strong_intra_smoothing_enabled_flag)?;

        self.u(1, sps.vui_parameters_present_flag)?;
        if sps.vui_parameters_present_flag {
            self.vui_parameters(&sps.vui_parameters)?;
        }

        self.u(1, sps.extension_present_flag)?;
        if sps.extension_present_flag {
            self.u(1, sps.range_extension_flag)?;
            // sps_multilayer_extension_flag and sps_3d_extension_flag
            self.u(1, false)?;
            self.u(1, false)?;
            self.u(1, sps.scc_extension_flag)?;
            self.u(4, sps.extension_4bits)?;

            if sps.range_extension_flag {
                self.sps_range_extension()?;
            }

            if sps.scc_extension_flag {
                self.sps_scc_extension()?;
            }
        }

        Ok(())
    }
}

impl<'n, W: Write> Synthesizer<'n, Pps, W> {
    pub fn synthesize(pps: &'n Pps, writer: W, ep_enabled: bool) -> SynthesizerResult<()> {
        let mut s = Self {
            writer: NaluWriter::<W>::new(writer, ep_enabled),
            nalu: pps,
        };

        s.header(NaluType::PpsNut)?;
        s.pic_parameter_set_rbsp()?;
        s.rbsp_trailing_bits()
    }

    fn pps_range_extension(&mut self) -> SynthesizerResult<()> {
        // H.265 7.3.2.3.2
        let pps = self.nalu;
        let rext = &pps.range_extension;

        if pps.transform_skip_enabled_flag {
            self.ue(rext.log2_max_transform_skip_block_size_minus2)?;
        }

        self.u(1, rext.cross_component_prediction_enabled_flag)?;
        self.u(1, rext.chroma_qp_offset_list_enabled_flag)?;
        if rext.chroma_qp_offset_list_enabled_flag {
            let len = rext.chroma_qp_offset_list_len_minus1 as usize + 1;
            if len > rext.cb_qp_offset_list.len() {
                return Err(SynthesizerError::Unsupported);
            }

            self.ue(rext.diff_cu_chroma_qp_offset_depth)?;
            self.ue(rext.chroma_qp_offset_list_len_minus1)?;
            for i in 0..len {
                self.se(rext.cb_qp_offset_list[i])?;
                self.se(rext.cr_qp_offset_list[i])?;
            }
        }

        self.ue(rext.log2_sao_offset_scale_luma)?;
        self.ue(rext.log2_sao_offset_scale_chroma)?;

        Ok(())
    }

    fn pps_scc_extension(&mut self) -> SynthesizerResult<()> {
        // H.265 7.3.2.3.3
        let scc = &self.nalu.scc_extension;

        self.u(1, scc.curr_pic_ref_enabled_flag)?;
        self.u(1, scc.residual_adaptive_colour_transform_enabled_flag)?;
        if scc.residual_adaptive_colour_transform_enabled_flag {
            self.u(1, scc.slice_act_qp_offsets_present_flag)?;
            self.se(scc.act_y_qp_offset_plus5)?;
            self.se(scc.act_cb_qp_offset_plus5)?;
            self.se(scc.act_cr_qp_offset_plus3)?;
        }

        self.u(1, scc.palette_predictor_initializers_present_flag)?;
        if scc.palette_predictor_initializers_present_flag {
            self.ue(scc.num_palette_predictor_initializers)?;

            if scc.num_palette_predictor_initializers > 0 {
                self.u(1, scc.monochrome_palette_flag)?;
                self.ue(scc.luma_bit_depth_entry_minus8)?;
                if !scc.monochrome_palette_flag {
                    self.ue(scc.chroma_bit_depth_entry_minus8)?;
                }

                let num_comps = if scc.monochrome_palette_flag { 1 } else { 3 };
                for (comp, entries) in scc
                    .palette_predictor_initializer
                    .iter()
                    .enumerate()
                    .take(num_comps)
                {
                    let num_bits = if comp == 0 {
                        usize::from(scc.luma_bit_depth_entry_minus8) + 8
                    } else {
                        usize::from(scc.chroma_bit_depth_entry_minus8) + 8
                    };

                    check_len(
                        entries.len(),
                        usize::from(scc.num_palette_predictor_initializers),
                    )?;
                    for entry in entries {
                        self.u(num_bits, *entry)?;
                    }
                }
            }
        }

        Ok(())
    }

    fn pic_parameter_set_rbsp(&mut self) -> SynthesizerResult<()> {
        // H.265 7.3.2.3.1
        let pps = self.nalu;

        self.ue(pps.pic_parameter_set_id)?;
        self.ue(pps.seq_parameter_set_id)?;
        self.u(1, pps.dependent_slice_segments_enabled_flag)?;
        self.u(1, pps.output_flag_present_flag)?;
        self.u(3, pps.num_extra_slice_header_bits)?;
        self.u(1, pps.sign_data_hiding_enabled_flag)?;
        self.u(1, pps.cabac_init_present_flag)?;
        self.ue(pps.num_ref_idx_l0_default_active_minus1)?;
        self.ue(pps.num_ref_idx_l1_default_active_minus1)?;
        self.se(pps.init_qp_minus26)?;
        self.u(1, pps.constrained_intra_pred_flag)?;
        self.u(1, pps.transform_skip_enabled_flag)?;

        self.u(1, pps.cu_qp_delta_enabled_flag)?;
        if pps.cu_qp_delta_enabled_flag {
            self.ue(pps.diff_cu_qp_delta_depth)?;
        }

        self.se(pps.cb_qp_offset)?;
        self.se(pps.cr_qp_offset)?;
        self.u(1, pps.slice_chroma_qp_offsets_present_flag)?;
        self.u(1, pps.weighted_pred_flag)?;
        self.u(1, pps.weighted_bipred_flag)?;
        self.u(1, pps.transquant_bypass_enabled_flag)?;
        self.u(1, pps.tiles_enabled_flag)?;
        self.u(1, pps.entropy_coding_sync_enabled_flag)?;

        if pps.tiles_enabled_flag {
            self.ue(pps.num_tile_columns_minus1)?;
            self.ue(pps.num_tile_rows_minus1)?;

            self.u(1, pps.uniform_spacing_flag)?;
            if !pps.uniform_spacing_flag {
                check_len(
                    pps.column_width_minus1.len(),
                    usize::from(pps.num_tile_columns_minus1),
                )?;
                check_len(
                    pps.row_height_minus1.len(),
                    usize::from(pps.num_tile_rows_minus1),
                )?;

                for width in &pps.column_width_minus1 {
                    self.ue(*width)?;
                }

                for height in &pps.row_height_minus1 {
                    self.ue(*height)?;
                }
            }

            self.u(1, pps.loop_filter_across_tiles_enabled_flag)?;
        }

        self.u(1, pps.loop_filter_across_slices_enabled_flag)?;

        self.u(1, pps.deblocking_filter_control_present_flag)?;
        if pps.deblocking_filter_control_present_flag {
            self.u(1, pps.deblocking_filter_override_enabled_flag)?;
            self.u(1, pps.deblocking_filter_disabled_flag)?;
            if !pps.deblocking_filter_disabled_flag {
                self.se(pps.beta_offset_div2)?;
                self.se(pps.tc_offset_div2)?;
            }
        }

        self.u(1, pps.scaling_list_data_present_flag)?;
        if pps.scaling_list_data_present_flag {
            self.scaling_list_data(&pps.scaling_list)?;
        }

        self.u(1, pps.lists_modification_present_flag)?;
        self.ue(pps.log2_parallel_merge_level_minus2)?;
        self.u(1, pps.slice_segment_header_extension_present_flag)?;

        self.u(1, pps.extension_present_flag)?;
        if pps.extension_present_flag {
            self.u(1, pps.range_extension_flag)?;
            // pps_multilayer_extension_flag and pps_3d_extension_flag
            self.u(1, false)?;
            self.u(1, false)?;
            self.u(1, pps.scc_extension_flag)?;
            self.u(4, pps.extension_4bits)?;

            if pps.range_extension_flag {
                self.pps_range_extension()?;
            }

            if pps.scc_extension_flag {
                self.pps_scc_extension()?;
            }
        }

        Ok(())
    }
}
