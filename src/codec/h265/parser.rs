// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! H.265 NAL unit classification, parameter set and slice segment header
//! parsing.
//!
//! As for H.264, the [`Parser`] keeps no state: VPSs, SPSs and PPSs are
//! returned by value and handed back by the caller, as `BTreeMap`s keyed by
//! id, whenever a unit depends on them.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::io::Read;

use anyhow::anyhow;
use anyhow::Context;
use bitreader::BitReader;
use bytes::Buf;
use enumn::N;

use crate::codec::ceil_log2;
use crate::codec::ParseError;
use crate::utils::nalu;
use crate::utils::nalu::Header;
use crate::utils::nalu_reader::NaluReader;
use crate::Point;
use crate::Rect;

pub type Nalu<'a> = nalu::Nalu<'a, NaluHeader>;

// Given the max SPS id.
const MAX_SPS_COUNT: u8 = 16;
// Given the max PPS id.
const MAX_PPS_COUNT: u8 = 64;
// 7.4.7.1
const MAX_REF_IDX_ACTIVE: u32 = 15;
// 7.4.3.2.1, num_short_term_ref_pic_sets is in 0..=64.
const MAX_SHORT_TERM_REF_PIC_SETS: u32 = 64;
// 7.4.3.2.1, num_long_term_ref_pics_sps is in 0..=32.
const MAX_LONG_TERM_REF_PICS: u32 = 32;
// sps_max_sub_layers_minus1 is in 0..=6.
pub(super) const MAX_SUB_LAYERS: usize = 7;
// Level limits of Table A.8.
const MAX_TILE_COLUMNS: u32 = 20;
const MAX_TILE_ROWS: u32 = 22;

/// Table 7-5.
pub(super) const DEFAULT_SCALING_LIST_0: [u8; 16] = [16; 16];

/// Table 7-6, intra matrices.
pub(super) const DEFAULT_SCALING_LIST_1: [u8; 64] = [
    16, 16, 16, 16, 16, 16, 16, 16, 16, 16, 17, 16, 17, 16, 17, 18, 17, 18, 18, 17, 18, 21, 19, 20,
    21, 20, 19, 21, 24, 22, 22, 24, 24, 22, 22, 24, 25, 25, 27, 30, 27, 25, 25, 29, 31, 35, 35, 31,
    29, 36, 41, 44, 41, 36, 47, 54, 54, 47, 65, 70, 65, 88, 88, 115,
];

/// Table 7-6, inter matrices.
pub(super) const DEFAULT_SCALING_LIST_2: [u8; 64] = [
    16, 16, 16, 16, 16, 16, 16, 16, 16, 16, 17, 17, 17, 17, 17, 18, 18, 18, 18, 18, 18, 20, 20, 20,
    20, 20, 20, 20, 24, 24, 24, 24, 24, 24, 24, 24, 25, 25, 25, 25, 25, 25, 25, 28, 28, 28, 28, 28,
    28, 33, 33, 33, 33, 33, 41, 41, 41, 41, 54, 54, 54, 71, 71, 91,
];

/// Table 7-1 – NAL unit type codes and NAL unit type classes. Every 6-bit
/// value has a variant.
#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NaluType {
    #[default]
    TrailN = 0,
    TrailR = 1,
    TsaN = 2,
    TsaR = 3,
    StsaN = 4,
    StsaR = 5,
    RadlN = 6,
    RadlR = 7,
    RaslN = 8,
    RaslR = 9,
    RsvVclN10 = 10,
    RsvVclR11 = 11,
    RsvVclN12 = 12,
    RsvVclR13 = 13,
    RsvVclN14 = 14,
    RsvVclR15 = 15,
    BlaWLp = 16,
    BlaWRadl = 17,
    BlaNLp = 18,
    IdrWRadl = 19,
    IdrNLp = 20,
    CraNut = 21,
    RsvIrapVcl22 = 22,
    RsvIrapVcl23 = 23,
    RsvVcl24 = 24,
    RsvVcl25 = 25,
    RsvVcl26 = 26,
    RsvVcl27 = 27,
    RsvVcl28 = 28,
    RsvVcl29 = 29,
    RsvVcl30 = 30,
    RsvVcl31 = 31,
    VpsNut = 32,
    SpsNut = 33,
    PpsNut = 34,
    AudNut = 35,
    EosNut = 36,
    EobNut = 37,
    FdNut = 38,
    PrefixSeiNut = 39,
    SuffixSeiNut = 40,
    RsvNvcl41 = 41,
    RsvNvcl42 = 42,
    RsvNvcl43 = 43,
    RsvNvcl44 = 44,
    RsvNvcl45 = 45,
    RsvNvcl46 = 46,
    RsvNvcl47 = 47,
    Unspec48 = 48,
    Unspec49 = 49,
    Unspec50 = 50,
    Unspec51 = 51,
    Unspec52 = 52,
    Unspec53 = 53,
    Unspec54 = 54,
    Unspec55 = 55,
    Unspec56 = 56,
    Unspec57 = 57,
    Unspec58 = 58,
    Unspec59 = 59,
    Unspec60 = 60,
    Unspec61 = 61,
    Unspec62 = 62,
    Unspec63 = 63,
}

impl NaluType {
    /// Extracts `nal_unit_type` from the first byte of a NAL unit header.
    pub fn from_header_byte(byte: u8) -> Self {
        // A 6-bit value always has a variant.
        NaluType::n((byte >> 1) & 0x3f).unwrap_or(NaluType::Unspec63)
    }

    /// Whether this is a VCL NAL unit, i.e. types 0 to 31.
    pub fn is_video(&self) -> bool {
        *self <= NaluType::RsvVcl31
    }

    /// Whether this is an IDR NALU.
    pub fn is_idr(&self) -> bool {
        matches!(self, Self::IdrWRadl | Self::IdrNLp)
    }

    /// Whether this is an IRAP NALU.
    pub fn is_irap(&self) -> bool {
        (Self::BlaWLp..=Self::RsvIrapVcl23).contains(self)
    }

    /// Whether this is a BLA NALU.
    pub fn is_bla(&self) -> bool {
        (Self::BlaWLp..=Self::BlaNLp).contains(self)
    }

    /// Whether this is a CRA NALU.
    pub fn is_cra(&self) -> bool {
        matches!(self, Self::CraNut)
    }

    /// Whether this is a RADL NALU.
    pub fn is_radl(&self) -> bool {
        matches!(self, Self::RadlN | Self::RadlR)
    }

    /// Whether this is a RASL NALU.
    pub fn is_rasl(&self) -> bool {
        matches!(self, Self::RaslN | Self::RaslR)
    }

    /// Whether this is a sub-layer non-reference picture.
    pub fn is_slnr(&self) -> bool {
        *self <= Self::RsvVclN14 && (*self as u8) % 2 == 0
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NaluHeader {
    /// The NALU type.
    pub type_: NaluType,
    /// Specifies the identifier of the layer to which a VCL NAL unit belongs or
    /// the identifier of a layer to which a non-VCL NAL unit applies.
    pub nuh_layer_id: u8,
    /// Minus 1 specifies a temporal identifier for the NAL unit. The value of
    /// nuh_temporal_id_plus1 shall not be equal to 0.
    pub nuh_temporal_id_plus1: u8,
}

impl NaluHeader {
    pub fn temporal_id(&self) -> u8 {
        self.nuh_temporal_id_plus1.saturating_sub(1)
    }
}

impl Header for NaluHeader {
    fn parse<T: AsRef<[u8]>>(cursor: &Cursor<T>) -> anyhow::Result<Self> {
        if cursor.remaining() < 2 {
            return Err(anyhow!("Broken Data"));
        }

        let data = &cursor.chunk()[0..2];
        let mut r = BitReader::new(data);

        // Skip forbidden_zero_bit
        r.skip(1)?;

        Ok(Self {
            type_: NaluType::n(r.read_u8(6)?).ok_or(anyhow!("Invalid NALU type"))?,
            nuh_layer_id: r.read_u8(6)?,
            nuh_temporal_id_plus1: r.read_u8(3)?,
        })
    }

    fn is_end(&self) -> bool {
        matches!(self.type_, NaluType::EosNut | NaluType::EobNut)
    }

    fn len(&self) -> usize {
        // 7.3.1.2
        2
    }
}

/// General profiles of Annex A, as signalled by `general_profile_idc`.
#[derive(N, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Profile {
    Main = 1,
    Main10 = 2,
    MainStillPicture = 3,
    RangeExtensions = 4,
    HighThroughput = 5,
    MultiviewMain = 6,
    ScalableMain = 7,
    ThreeDMain = 8,
    ScreenContentCoding = 9,
    ScalableRangeExtensions = 10,
    HighThroughputScreenContentCoding = 11,
}

/// H265 levels as defined by table A.8.
/// general_level_idc and sub_layer_level_idc[ OpTid ] shall be set equal to a
/// value of 30 times the level number specified in Table A.8
#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    #[default]
    L1 = 30,
    L2 = 60,
    L2_1 = 63,
    L3 = 90,
    L3_1 = 93,
    L4 = 120,
    L4_1 = 123,
    L5 = 150,
    L5_1 = 153,
    L5_2 = 156,
    L6 = 180,
    L6_1 = 183,
    L6_2 = 186,
}

/// Whether `profile_idc`, or one of the compatibility flags, names one of
/// `profiles`. Used by the conditions of 7.3.3.
pub(super) fn profile_matches(profile_idc: u8, compatibility_flag: &[bool; 32], profiles: &[u8]) -> bool {
    profiles
        .iter()
        .any(|&p| profile_idc == p || compatibility_flag[usize::from(p)])
}

/// profile_tier_level(), 7.3.3.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProfileTierLevel {
    pub general_profile_space: u8,
    pub general_tier_flag: bool,
    pub general_profile_idc: u8,
    pub general_profile_compatibility_flag: [bool; 32],
    pub general_progressive_source_flag: bool,
    pub general_interlaced_source_flag: bool,
    pub general_non_packed_constraint_flag: bool,
    pub general_frame_only_constraint_flag: bool,
    pub general_max_12bit_constraint_flag: bool,
    pub general_max_10bit_constraint_flag: bool,
    pub general_max_8bit_constraint_flag: bool,
    pub general_max_422chroma_constraint_flag: bool,
    pub general_max_420chroma_constraint_flag: bool,
    pub general_max_monochrome_constraint_flag: bool,
    pub general_intra_constraint_flag: bool,
    pub general_one_picture_only_constraint_flag: bool,
    pub general_lower_bit_rate_constraint_flag: bool,
    pub general_max_14bit_constraint_flag: bool,
    pub general_inbld_flag: bool,
    pub general_level_idc: u8,
    pub sub_layer_profile_present_flag: [bool; 6],
    pub sub_layer_level_present_flag: [bool; 6],
    pub sub_layer_profile_space: [u8; 6],
    pub sub_layer_tier_flag: [bool; 6],
    pub sub_layer_profile_idc: [u8; 6],
    pub sub_layer_profile_compatibility_flag: [[bool; 32]; 6],
    pub sub_layer_progressive_source_flag: [bool; 6],
    pub sub_layer_interlaced_source_flag: [bool; 6],
    pub sub_layer_non_packed_constraint_flag: [bool; 6],
    pub sub_layer_frame_only_constraint_flag: [bool; 6],
    pub sub_layer_max_12bit_constraint_flag: [bool; 6],
    pub sub_layer_max_10bit_constraint_flag: [bool; 6],
    pub sub_layer_max_8bit_constraint_flag: [bool; 6],
    pub sub_layer_max_422chroma_constraint_flag: [bool; 6],
    pub sub_layer_max_420chroma_constraint_flag: [bool; 6],
    pub sub_layer_max_monochrome_constraint_flag: [bool; 6],
    pub sub_layer_intra_constraint_flag: [bool; 6],
    pub sub_layer_one_picture_only_constraint_flag: [bool; 6],
    pub sub_layer_lower_bit_rate_constraint_flag: [bool; 6],
    pub sub_layer_max_14bit_constraint_flag: [bool; 6],
    pub sub_layer_inbld_flag: [bool; 6],
    pub sub_layer_level_idc: [u8; 6],
}

impl ProfileTierLevel {
    pub fn profile(&self) -> Option<Profile> {
        Profile::n(self.general_profile_idc)
    }

    pub fn level(&self) -> Option<Level> {
        Level::n(self.general_level_idc)
    }
}

/// sub_layer_hrd_parameters(), E.2.3.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SublayerHrdParameters {
    // NOTE: The value of CpbCnt is cpb_cnt_minus1[i] + 1, and cpb_cnt_minus1
    // ranges from 0..=31
    pub bit_rate_value_minus1: [u32; 32],
    pub cpb_size_value_minus1: [u32; 32],
    pub cpb_size_du_value_minus1: [u32; 32],
    pub bit_rate_du_value_minus1: [u32; 32],
    pub cbr_flag: [bool; 32],
}

/// hrd_parameters(), E.2.2.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HrdParams {
    pub nal_hrd_parameters_present_flag: bool,
    pub vcl_hrd_parameters_present_flag: bool,
    pub sub_pic_hrd_params_present_flag: bool,
    pub tick_divisor_minus2: u8,
    pub du_cpb_removal_delay_increment_length_minus1: u8,
    pub sub_pic_cpb_params_in_pic_timing_sei_flag: bool,
    pub dpb_output_delay_du_length_minus1: u8,
    pub bit_rate_scale: u8,
    pub cpb_size_scale: u8,
    pub cpb_size_du_scale: u8,
    pub initial_cpb_removal_delay_length_minus1: u8,
    pub au_cpb_removal_delay_length_minus1: u8,
    pub dpb_output_delay_length_minus1: u8,
    pub fixed_pic_rate_general_flag: [bool; MAX_SUB_LAYERS],
    /// Inferred to be 1 when `fixed_pic_rate_general_flag` is set.
    pub fixed_pic_rate_within_cvs_flag: [bool; MAX_SUB_LAYERS],
    pub elemental_duration_in_tc_minus1: [u32; MAX_SUB_LAYERS],
    pub low_delay_hrd_flag: [bool; MAX_SUB_LAYERS],
    pub cpb_cnt_minus1: [u32; MAX_SUB_LAYERS],
    pub nal_hrd: [SublayerHrdParameters; MAX_SUB_LAYERS],
    pub vcl_hrd: [SublayerHrdParameters; MAX_SUB_LAYERS],
}

impl Default for HrdParams {
    fn default() -> Self {
        Self {
            nal_hrd_parameters_present_flag: Default::default(),
            vcl_hrd_parameters_present_flag: Default::default(),
            sub_pic_hrd_params_present_flag: Default::default(),
            tick_divisor_minus2: Default::default(),
            du_cpb_removal_delay_increment_length_minus1: Default::default(),
            sub_pic_cpb_params_in_pic_timing_sei_flag: Default::default(),
            dpb_output_delay_du_length_minus1: Default::default(),
            bit_rate_scale: Default::default(),
            cpb_size_scale: Default::default(),
            cpb_size_du_scale: Default::default(),
            initial_cpb_removal_delay_length_minus1: 23,
            au_cpb_removal_delay_length_minus1: 23,
            dpb_output_delay_length_minus1: 23,
            fixed_pic_rate_general_flag: Default::default(),
            fixed_pic_rate_within_cvs_flag: Default::default(),
            elemental_duration_in_tc_minus1: Default::default(),
            low_delay_hrd_flag: Default::default(),
            cpb_cnt_minus1: Default::default(),
            nal_hrd: Default::default(),
            vcl_hrd: Default::default(),
        }
    }
}

/// A H.265 Video Parameter Set, 7.3.2.1.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Vps {
    /// Identifies the VPS for reference by other syntax elements.
    pub video_parameter_set_id: u8,
    pub base_layer_internal_flag: bool,
    pub base_layer_available_flag: bool,
    /// Plus 1 specifies the maximum allowed number of layers in each CVS
    /// referring to the VPS.
    pub max_layers_minus1: u8,
    /// Plus 1 specifies the maximum number of temporal sub-layers that may be
    /// present in each CVS referring to the VPS.
    pub max_sub_layers_minus1: u8,
    pub temporal_id_nesting_flag: bool,
    pub profile_tier_level: ProfileTierLevel,
    pub sub_layer_ordering_info_present_flag: bool,
    /// When the ordering info is not present, the values of the highest
    /// sub-layer are copied to all the others.
    pub max_dec_pic_buffering_minus1: [u32; MAX_SUB_LAYERS],
    pub max_num_reorder_pics: [u32; MAX_SUB_LAYERS],
    pub max_latency_increase_plus1: [u32; MAX_SUB_LAYERS],
    pub max_layer_id: u8,
    pub num_layer_sets_minus1: u32,
    /// layer_id_included_flag[i][j] for the layer sets 1..=num_layer_sets_minus1.
    pub layer_id_included_flag: Vec<Vec<bool>>,
    pub timing_info_present_flag: bool,
    pub num_units_in_tick: u32,
    pub time_scale: u32,
    pub poc_proportional_to_timing_flag: bool,
    pub num_ticks_poc_diff_one_minus1: u32,
    pub num_hrd_parameters: u32,
    pub hrd_layer_set_idx: Vec<u16>,
    /// cprms_present_flag[0] is inferred to be 1.
    pub cprms_present_flag: Vec<bool>,
    pub hrd_parameters: Vec<HrdParams>,
    pub extension_flag: bool,
}

impl Default for Vps {
    fn default() -> Self {
        Self {
            video_parameter_set_id: Default::default(),
            base_layer_internal_flag: Default::default(),
            base_layer_available_flag: Default::default(),
            max_layers_minus1: Default::default(),
            max_sub_layers_minus1: Default::default(),
            temporal_id_nesting_flag: Default::default(),
            profile_tier_level: Default::default(),
            sub_layer_ordering_info_present_flag: Default::default(),
            max_dec_pic_buffering_minus1: Default::default(),
            max_num_reorder_pics: Default::default(),
            max_latency_increase_plus1: Default::default(),
            max_layer_id: Default::default(),
            num_layer_sets_minus1: Default::default(),
            layer_id_included_flag: Default::default(),
            timing_info_present_flag: Default::default(),
            num_units_in_tick: Default::default(),
            time_scale: Default::default(),
            poc_proportional_to_timing_flag: Default::default(),
            num_ticks_poc_diff_one_minus1: Default::default(),
            num_hrd_parameters: Default::default(),
            hrd_layer_set_idx: Default::default(),
            cprms_present_flag: vec![true],
            hrd_parameters: Default::default(),
            extension_flag: Default::default(),
        }
    }
}

/// scaling_list_data(), 7.3.4. Lists are kept in coded (up-right diagonal)
/// order, indexed by `matrixId`. Only matrices 0 and 3 are coded for 32x32.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScalingLists {
    /// scaling_list_pred_mode_flag[sizeId][matrixId].
    pub pred_mode_flag: [[bool; 6]; 4],
    /// scaling_list_pred_matrix_id_delta[sizeId][matrixId]. 0 selects the
    /// default list of Tables 7-5 and 7-6.
    pub pred_matrix_id_delta: [[u8; 6]; 4],
    pub scaling_list_dc_coef_minus8_16x16: [i16; 6],
    pub scaling_list_dc_coef_minus8_32x32: [i16; 6],
    pub scaling_list_4x4: [[u8; 16]; 6],
    pub scaling_list_8x8: [[u8; 64]; 6],
    pub scaling_list_16x16: [[u8; 64]; 6],
    pub scaling_list_32x32: [[u8; 64]; 6],
}

/// Flat lists, in effect when `scaling_list_enabled_flag` is 0.
impl Default for ScalingLists {
    fn default() -> Self {
        Self {
            pred_mode_flag: Default::default(),
            pred_matrix_id_delta: Default::default(),
            scaling_list_dc_coef_minus8_16x16: [8; 6],
            scaling_list_dc_coef_minus8_32x32: [8; 6],
            scaling_list_4x4: [[16; 16]; 6],
            scaling_list_8x8: [[16; 64]; 6],
            scaling_list_16x16: [[16; 64]; 6],
            scaling_list_32x32: [[16; 64]; 6],
        }
    }
}

impl ScalingLists {
    /// The lists of Tables 7-5 and 7-6, used when scaling lists are enabled
    /// but no scaling_list_data() is coded.
    pub fn from_default_tables() -> Self {
        let mut sl = Self::default();

        for size_id in 0..4 {
            for matrix_id in 0..6 {
                sl.fill_default(size_id, matrix_id);
            }
        }

        sl
    }

    /// ScalingList[sizeId][matrixId], 16 entries for 4x4, 64 otherwise.
    pub fn list(&self, size_id: usize, matrix_id: usize) -> &[u8] {
        match size_id {
            0 => &self.scaling_list_4x4[matrix_id],
            1 => &self.scaling_list_8x8[matrix_id],
            2 => &self.scaling_list_16x16[matrix_id],
            _ => &self.scaling_list_32x32[matrix_id],
        }
    }

    fn list_mut(&mut self, size_id: usize, matrix_id: usize) -> &mut [u8] {
        match size_id {
            0 => &mut self.scaling_list_4x4[matrix_id],
            1 => &mut self.scaling_list_8x8[matrix_id],
            2 => &mut self.scaling_list_16x16[matrix_id],
            _ => &mut self.scaling_list_32x32[matrix_id],
        }
    }

    /// scaling_list_dc_coef_minus8 for `size_id` 2 and 3.
    pub fn dc_coef_minus8(&self, size_id: usize, matrix_id: usize) -> i16 {
        match size_id {
            2 => self.scaling_list_dc_coef_minus8_16x16[matrix_id],
            _ => self.scaling_list_dc_coef_minus8_32x32[matrix_id],
        }
    }

    fn dc_coef_minus8_mut(&mut self, size_id: usize, matrix_id: usize) -> &mut i16 {
        match size_id {
            2 => &mut self.scaling_list_dc_coef_minus8_16x16[matrix_id],
            _ => &mut self.scaling_list_dc_coef_minus8_32x32[matrix_id],
        }
    }

    fn fill_default(&mut self, size_id: usize, matrix_id: usize) {
        if size_id == 0 {
            self.scaling_list_4x4[matrix_id] = DEFAULT_SCALING_LIST_0;
            return;
        }

        let src = if matrix_id < 3 {
            &DEFAULT_SCALING_LIST_1
        } else {
            &DEFAULT_SCALING_LIST_2
        };
        self.list_mut(size_id, matrix_id).copy_from_slice(src);

        //  When scaling_list_pred_mode_flag[ sizeId ][ matrixId ] is equal to
        //  0, scaling_list_pred_matrix_id_ delta[ sizeId ][ matrixId ] is equal
        //  to 0 and sizeId is greater than 1, the value of
        //  scaling_list_dc_coef_minus8[ sizeId − 2 ][ matrixId ] is inferred to
        //  be equal to 8.
        if size_id > 1 {
            *self.dc_coef_minus8_mut(size_id, matrix_id) = 8;
        }
    }

    /// Copies the list and DC coefficient of `ref_matrix_id` into `matrix_id`.
    fn copy_from_reference(&mut self, size_id: usize, ref_matrix_id: usize, matrix_id: usize) {
        match size_id {
            0 => self.scaling_list_4x4[matrix_id] = self.scaling_list_4x4[ref_matrix_id],
            1 => self.scaling_list_8x8[matrix_id] = self.scaling_list_8x8[ref_matrix_id],
            2 => {
                self.scaling_list_16x16[matrix_id] = self.scaling_list_16x16[ref_matrix_id];
                self.scaling_list_dc_coef_minus8_16x16[matrix_id] =
                    self.scaling_list_dc_coef_minus8_16x16[ref_matrix_id];
            }
            _ => {
                self.scaling_list_32x32[matrix_id] = self.scaling_list_32x32[ref_matrix_id];
                self.scaling_list_dc_coef_minus8_32x32[matrix_id] =
                    self.scaling_list_dc_coef_minus8_32x32[ref_matrix_id];
            }
        }
    }
}

/// st_ref_pic_set(), 7.3.7, together with the variables it derives.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShortTermRefPicSet {
    pub inter_ref_pic_set_prediction_flag: bool,
    /// Only coded for the set of a slice header.
    pub delta_idx_minus1: u8,
    pub delta_rps_sign: bool,
    pub abs_delta_rps_minus1: u16,
    /// used_by_curr_pic_flag[j] for j in 0..=NumDeltaPocs[RefRpsIdx].
    pub used_by_curr_pic_flag: Vec<bool>,
    /// use_delta_flag[j], 1 where not coded.
    pub use_delta_flag: Vec<bool>,
    pub num_negative_pics: u8,
    pub num_positive_pics: u8,
    /// DeltaPocS0, negative and ordered from the closest picture outwards.
    pub delta_poc_s0: Vec<i32>,
    pub used_by_curr_pic_s0: Vec<bool>,
    /// DeltaPocS1, positive and ordered from the closest picture outwards.
    pub delta_poc_s1: Vec<i32>,
    pub used_by_curr_pic_s1: Vec<bool>,
    pub num_delta_pocs: u32,
}

impl ShortTermRefPicSet {
    /// Number of entries of the set used by the current picture, its share of
    /// NumPicTotalCurr.
    pub fn num_used_by_curr_pic(&self) -> u32 {
        self.used_by_curr_pic_s0
            .iter()
            .chain(self.used_by_curr_pic_s1.iter())
            .filter(|used| **used)
            .count() as u32
    }

    /// Equations 7-61 and 7-62: derives the deltas of an inter predicted set
    /// from `ref_st` and the flags already read into `self`.
    fn predict_from(&mut self, ref_st: &ShortTermRefPicSet, delta_rps: i32) {
        let num_negative = ref_st.delta_poc_s0.len();
        let num_delta_pocs = num_negative + ref_st.delta_poc_s1.len();
        let used = &self.used_by_curr_pic_flag;
        let use_delta = &self.use_delta_flag;

        let mut s0 = Vec::new();
        let mut used_s0 = Vec::new();

        for (j, d_poc) in ref_st.delta_poc_s1.iter().enumerate().rev() {
            let d_poc = d_poc + delta_rps;
            if d_poc < 0 && use_delta[num_negative + j] {
                s0.push(d_poc);
                used_s0.push(used[num_negative + j]);
            }
        }

        if delta_rps < 0 && use_delta[num_delta_pocs] {
            s0.push(delta_rps);
            used_s0.push(used[num_delta_pocs]);
        }

        for (j, d_poc) in ref_st.delta_poc_s0.iter().enumerate() {
            let d_poc = d_poc + delta_rps;
            if d_poc < 0 && use_delta[j] {
                s0.push(d_poc);
                used_s0.push(used[j]);
            }
        }

        let mut s1 = Vec::new();
        let mut used_s1 = Vec::new();

        for (j, d_poc) in ref_st.delta_poc_s0.iter().enumerate().rev() {
            let d_poc = d_poc + delta_rps;
            if d_poc > 0 && use_delta[j] {
                s1.push(d_poc);
                used_s1.push(used[j]);
            }
        }

        if delta_rps > 0 && use_delta[num_delta_pocs] {
            s1.push(delta_rps);
            used_s1.push(used[num_delta_pocs]);
        }

        for (j, d_poc) in ref_st.delta_poc_s1.iter().enumerate() {
            let d_poc = d_poc + delta_rps;
            if d_poc > 0 && use_delta[num_negative + j] {
                s1.push(d_poc);
                used_s1.push(used[num_negative + j]);
            }
        }

        self.delta_poc_s0 = s0;
        self.used_by_curr_pic_s0 = used_s0;
        self.delta_poc_s1 = s1;
        self.used_by_curr_pic_s1 = used_s1;
    }
}

/// sps_range_extension(), 7.3.2.2.2.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpsRangeExtension {
    pub transform_skip_rotation_enabled_flag: bool,
    pub transform_skip_context_enabled_flag: bool,
    pub implicit_rdpcm_enabled_flag: bool,
    pub explicit_rdpcm_enabled_flag: bool,
    pub extended_precision_processing_flag: bool,
    pub intra_smoothing_disabled_flag: bool,
    pub high_precision_offsets_enabled_flag: bool,
    pub persistent_rice_adaptation_enabled_flag: bool,
    pub cabac_bypass_alignment_enabled_flag: bool,
}

/// sps_scc_extension(), 7.3.2.2.3.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpsSccExtension {
    pub curr_pic_ref_enabled_flag: bool,
    pub palette_mode_enabled_flag: bool,
    pub palette_max_size: u8,
    pub delta_palette_max_predictor_size: u8,
    pub palette_predictor_initializers_present_flag: bool,
    pub num_palette_predictor_initializers_minus1: u8,
    /// One list per colour component, a single one for monochrome.
    pub palette_predictor_initializer: [Vec<u16>; 3],
    pub motion_vector_resolution_control_idc: u8,
    pub intra_boundary_filtering_disabled_flag: bool,
}

/// vui_parameters(), E.2.1.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VuiParams {
    pub aspect_ratio_info_present_flag: bool,
    pub aspect_ratio_idc: u32,
    pub sar_width: u32,
    pub sar_height: u32,
    pub overscan_info_present_flag: bool,
    pub overscan_appropriate_flag: bool,
    pub video_signal_type_present_flag: bool,
    pub video_format: u8,
    pub video_full_range_flag: bool,
    pub colour_description_present_flag: bool,
    pub colour_primaries: u32,
    pub transfer_characteristics: u32,
    pub matrix_coeffs: u32,
    pub chroma_loc_info_present_flag: bool,
    pub chroma_sample_loc_type_top_field: u32,
    pub chroma_sample_loc_type_bottom_field: u32,
    pub neutral_chroma_indication_flag: bool,
    pub field_seq_flag: bool,
    pub frame_field_info_present_flag: bool,
    pub default_display_window_flag: bool,
    pub def_disp_win_left_offset: u32,
    pub def_disp_win_right_offset: u32,
    pub def_disp_win_top_offset: u32,
    pub def_disp_win_bottom_offset: u32,
    pub timing_info_present_flag: bool,
    pub num_units_in_tick: u32,
    pub time_scale: u32,
    pub poc_proportional_to_timing_flag: bool,
    pub num_ticks_poc_diff_one_minus1: u32,
    pub hrd_parameters_present_flag: bool,
    pub hrd: HrdParams,
    pub bitstream_restriction_flag: bool,
    pub tiles_fixed_structure_flag: bool,
    pub motion_vectors_over_pic_boundaries_flag: bool,
    pub restricted_ref_pic_lists_flag: bool,
    pub min_spatial_segmentation_idc: u32,
    pub max_bytes_per_pic_denom: u32,
    pub max_bits_per_min_cu_denom: u32,
    pub log2_max_mv_length_horizontal: u32,
    pub log2_max_mv_length_vertical: u32,
}

impl Default for VuiParams {
    fn default() -> Self {
        Self {
            aspect_ratio_info_present_flag: Default::default(),
            aspect_ratio_idc: Default::default(),
            sar_width: Default::default(),
            sar_height: Default::default(),
            overscan_info_present_flag: Default::default(),
            overscan_appropriate_flag: Default::default(),
            video_signal_type_present_flag: Default::default(),
            video_format: 5,
            video_full_range_flag: Default::default(),
            colour_description_present_flag: Default::default(),
            colour_primaries: 2,
            transfer_characteristics: 2,
            matrix_coeffs: 2,
            chroma_loc_info_present_flag: Default::default(),
            chroma_sample_loc_type_top_field: Default::default(),
            chroma_sample_loc_type_bottom_field: Default::default(),
            neutral_chroma_indication_flag: Default::default(),
            field_seq_flag: Default::default(),
            frame_field_info_present_flag: Default::default(),
            default_display_window_flag: Default::default(),
            def_disp_win_left_offset: Default::default(),
            def_disp_win_right_offset: Default::default(),
            def_disp_win_top_offset: Default::default(),
            def_disp_win_bottom_offset: Default::default(),
            timing_info_present_flag: Default::default(),
            num_units_in_tick: Default::default(),
            time_scale: Default::default(),
            poc_proportional_to_timing_flag: Default::default(),
            num_ticks_poc_diff_one_minus1: Default::default(),
            hrd_parameters_present_flag: Default::default(),
            hrd: Default::default(),
            bitstream_restriction_flag: Default::default(),
            tiles_fixed_structure_flag: Default::default(),
            motion_vectors_over_pic_boundaries_flag: true,
            restricted_ref_pic_lists_flag: Default::default(),
            min_spatial_segmentation_idc: Default::default(),
            max_bytes_per_pic_denom: 2,
            max_bits_per_min_cu_denom: 1,
            log2_max_mv_length_horizontal: 15,
            log2_max_mv_length_vertical: 15,
        }
    }
}

/// A H.265 Sequence Parameter Set, 7.3.2.2.1.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Sps {
    /// Specifies the value of the vps_video_parameter_set_id of the active
    /// VPS.
    pub video_parameter_set_id: u8,
    /// `max_sub_layers_minus1` plus 1 specifies the maximum number of temporal
    /// sub-layers that may be present in each CVS referring to the SPS.
    pub max_sub_layers_minus1: u8,
    pub temporal_id_nesting_flag: bool,
    pub profile_tier_level: ProfileTierLevel,
    /// Provides an identifier for the SPS for reference by other syntax
    /// elements.
    pub seq_parameter_set_id: u8,
    /// Specifies the chroma sampling relative to the luma sampling as
    /// specified in clause 6.2.
    pub chroma_format_idc: u8,
    pub separate_colour_plane_flag: bool,
    pub pic_width_in_luma_samples: u32,
    pub pic_height_in_luma_samples: u32,
    pub conformance_window_flag: bool,
    /* if conformance_window_flag */
    pub conf_win_left_offset: u32,
    pub conf_win_right_offset: u32,
    pub conf_win_top_offset: u32,
    pub conf_win_bottom_offset: u32,

    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
    pub log2_max_pic_order_cnt_lsb_minus4: u8,
    pub sub_layer_ordering_info_present_flag: bool,
    pub max_dec_pic_buffering_minus1: [u8; MAX_SUB_LAYERS],
    pub max_num_reorder_pics: [u8; MAX_SUB_LAYERS],
    pub max_latency_increase_plus1: [u32; MAX_SUB_LAYERS],
    pub log2_min_luma_coding_block_size_minus3: u8,
    pub log2_diff_max_min_luma_coding_block_size: u8,
    pub log2_min_luma_transform_block_size_minus2: u8,
    pub log2_diff_max_min_luma_transform_block_size: u8,
    pub max_transform_hierarchy_depth_inter: u8,
    pub max_transform_hierarchy_depth_intra: u8,
    pub scaling_list_enabled_flag: bool,
    /* if scaling_list_enabled_flag */
    pub scaling_list_data_present_flag: bool,
    /// Flat when scaling lists are disabled, the lists of Tables 7-5 and 7-6
    /// when enabled without scaling_list_data().
    pub scaling_list: ScalingLists,
    pub amp_enabled_flag: bool,
    pub sample_adaptive_offset_enabled_flag: bool,
    pub pcm_enabled_flag: bool,

    /* if pcm_enabled_flag */
    pub pcm_sample_bit_depth_luma_minus1: u8,
    pub pcm_sample_bit_depth_chroma_minus1: u8,
    pub log2_min_pcm_luma_coding_block_size_minus3: u8,
    pub log2_diff_max_min_pcm_luma_coding_block_size: u8,
    pub pcm_loop_filter_disabled_flag: bool,

    pub num_short_term_ref_pic_sets: u8,
    pub short_term_ref_pic_set: Vec<ShortTermRefPicSet>,
    pub long_term_ref_pics_present_flag: bool,

    /* if long_term_ref_pics_present_flag */
    pub num_long_term_ref_pics_sps: u8,
    pub lt_ref_pic_poc_lsb_sps: Vec<u32>,
    pub used_by_curr_pic_lt_sps_flag: Vec<bool>,

    pub temporal_mvp_enabled_flag: bool,
    pub strong_intra_smoothing_enabled_flag: bool,
    pub vui_parameters_present_flag: bool,
    pub vui_parameters: VuiParams,
    pub extension_present_flag: bool,

    pub range_extension_flag: bool,
    pub range_extension: SpsRangeExtension,
    pub scc_extension_flag: bool,
    pub scc_extension: SpsSccExtension,
    /// sps_extension_4bits. Extension data signalled by these is skipped.
    pub extension_4bits: u8,
}

impl Sps {
    /// Width of the coded picture in luma samples.
    pub fn width(&self) -> u32 {
        self.pic_width_in_luma_samples
    }

    /// Height of the coded picture in luma samples.
    pub fn height(&self) -> u32 {
        self.pic_height_in_luma_samples
    }

    pub fn chroma_array_type(&self) -> u8 {
        if self.separate_colour_plane_flag {
            0
        } else {
            self.chroma_format_idc
        }
    }

    /// SubWidthC and SubHeightC, Table 6-1.
    pub fn sub_width_height_c(&self) -> (u32, u32) {
        match self.chroma_array_type() {
            1 => (2, 2),
            2 => (2, 1),
            _ => (1, 1),
        }
    }

    // (7-10)
    pub fn min_cb_log2_size_y(&self) -> u32 {
        u32::from(self.log2_min_luma_coding_block_size_minus3) + 3
    }

    // (7-11)
    pub fn ctb_log2_size_y(&self) -> u32 {
        self.min_cb_log2_size_y() + u32::from(self.log2_diff_max_min_luma_coding_block_size)
    }

    // (7-13)
    pub fn ctb_size_y(&self) -> u32 {
        1 << self.ctb_log2_size_y()
    }

    // (7-15)
    pub fn pic_width_in_ctbs_y(&self) -> u32 {
        (self.pic_width_in_luma_samples + self.ctb_size_y() - 1) / self.ctb_size_y()
    }

    // (7-17)
    pub fn pic_height_in_ctbs_y(&self) -> u32 {
        (self.pic_height_in_luma_samples + self.ctb_size_y() - 1) / self.ctb_size_y()
    }

    // (7-19)
    pub fn pic_size_in_ctbs_y(&self) -> u32 {
        self.pic_width_in_ctbs_y() * self.pic_height_in_ctbs_y()
    }

    pub fn min_tb_log2_size_y(&self) -> u32 {
        u32::from(self.log2_min_luma_transform_block_size_minus2) + 2
    }

    pub fn max_tb_log2_size_y(&self) -> u32 {
        self.min_tb_log2_size_y() + u32::from(self.log2_diff_max_min_luma_transform_block_size)
    }

    /// MaxPicOrderCntLsb, (7-8).
    pub fn max_pic_order_cnt_lsb(&self) -> u32 {
        1 << (u32::from(self.log2_max_pic_order_cnt_lsb_minus4) + 4)
    }

    /// WpOffsetHalfRangeY, (7-31).
    pub fn wp_offset_half_range_y(&self) -> u32 {
        if self.range_extension.high_precision_offsets_enabled_flag {
            1 << (u32::from(self.bit_depth_luma_minus8) + 7)
        } else {
            1 << 7
        }
    }

    /// WpOffsetHalfRangeC, (7-33).
    pub fn wp_offset_half_range_c(&self) -> u32 {
        if self.range_extension.high_precision_offsets_enabled_flag {
            1 << (u32::from(self.bit_depth_chroma_minus8) + 7)
        } else {
            1 << 7
        }
    }

    /// Size of the DPB, in pictures, needed by the highest sub-layer.
    pub fn max_dpb_size(&self) -> usize {
        let highest = usize::from(self.max_sub_layers_minus1).min(MAX_SUB_LAYERS - 1);
        usize::from(self.max_dec_pic_buffering_minus1[highest]) + 1
    }

    /// The region of the decoded picture that is meant to be displayed, as
    /// given by the conformance window (7-23 to 7-26).
    pub fn visible_rectangle(&self) -> Rect<u32> {
        if !self.conformance_window_flag {
            return Rect {
                min: Point { x: 0, y: 0 },
                max: Point {
                    x: self.width(),
                    y: self.height(),
                },
            };
        }

        let (sub_width_c, sub_height_c) = self.sub_width_height_c();

        Rect {
            min: Point {
                x: sub_width_c * self.conf_win_left_offset,
                y: sub_height_c * self.conf_win_top_offset,
            },
            max: Point {
                x: self
                    .width()
                    .saturating_sub(sub_width_c * self.conf_win_right_offset),
                y: self
                    .height()
                    .saturating_sub(sub_height_c * self.conf_win_bottom_offset),
            },
        }
    }
}

/// pps_range_extension(), 7.3.2.3.2.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PpsRangeExtension {
    pub log2_max_transform_skip_block_size_minus2: u32,
    pub cross_component_prediction_enabled_flag: bool,
    pub chroma_qp_offset_list_enabled_flag: bool,
    pub diff_cu_chroma_qp_offset_depth: u32,
    pub chroma_qp_offset_list_len_minus1: u32,
    pub cb_qp_offset_list: [i8; 6],
    pub cr_qp_offset_list: [i8; 6],
    pub log2_sao_offset_scale_luma: u32,
    pub log2_sao_offset_scale_chroma: u32,
}

/// pps_scc_extension(), 7.3.2.3.3.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PpsSccExtension {
    pub curr_pic_ref_enabled_flag: bool,
    pub residual_adaptive_colour_transform_enabled_flag: bool,
    pub slice_act_qp_offsets_present_flag: bool,
    pub act_y_qp_offset_plus5: i8,
    pub act_cb_qp_offset_plus5: i8,
    pub act_cr_qp_offset_plus3: i8,
    pub palette_predictor_initializers_present_flag: bool,
    pub num_palette_predictor_initializers: u8,
    pub monochrome_palette_flag: bool,
    pub luma_bit_depth_entry_minus8: u8,
    pub chroma_bit_depth_entry_minus8: u8,
    pub palette_predictor_initializer: [Vec<u16>; 3],
}

/// A H.265 Picture Parameter Set, 7.3.2.3.1.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pps {
    /// Identifies the PPS for reference by other syntax elements.
    pub pic_parameter_set_id: u8,
    /// Specifies the value of sps_seq_parameter_set_id for the active SPS.
    pub seq_parameter_set_id: u8,
    pub dependent_slice_segments_enabled_flag: bool,
    pub output_flag_present_flag: bool,
    pub num_extra_slice_header_bits: u8,
    pub sign_data_hiding_enabled_flag: bool,
    pub cabac_init_present_flag: bool,
    pub num_ref_idx_l0_default_active_minus1: u8,
    pub num_ref_idx_l1_default_active_minus1: u8,
    pub init_qp_minus26: i8,
    pub constrained_intra_pred_flag: bool,
    pub transform_skip_enabled_flag: bool,
    pub cu_qp_delta_enabled_flag: bool,

    /*if cu_qp_delta_enabled_flag */
    pub diff_cu_qp_delta_depth: u8,
    pub cb_qp_offset: i8,
    pub cr_qp_offset: i8,
    pub slice_chroma_qp_offsets_present_flag: bool,
    pub weighted_pred_flag: bool,
    pub weighted_bipred_flag: bool,
    pub transquant_bypass_enabled_flag: bool,
    pub tiles_enabled_flag: bool,
    pub entropy_coding_sync_enabled_flag: bool,

    /* if tiles_enabled_flag */
    pub num_tile_columns_minus1: u8,
    pub num_tile_rows_minus1: u8,
    pub uniform_spacing_flag: bool,
    /// Coded widths, empty with uniform spacing. See
    /// [`Pps::tile_column_widths`] for the derived ones.
    pub column_width_minus1: Vec<u32>,
    pub row_height_minus1: Vec<u32>,
    pub loop_filter_across_tiles_enabled_flag: bool,

    pub loop_filter_across_slices_enabled_flag: bool,
    pub deblocking_filter_control_present_flag: bool,
    pub deblocking_filter_override_enabled_flag: bool,
    pub deblocking_filter_disabled_flag: bool,
    pub beta_offset_div2: i8,
    pub tc_offset_div2: i8,
    pub scaling_list_data_present_flag: bool,
    /// Inherited from the SPS when `scaling_list_data_present_flag` is 0.
    pub scaling_list: ScalingLists,
    pub lists_modification_present_flag: bool,
    pub log2_parallel_merge_level_minus2: u8,
    pub slice_segment_header_extension_present_flag: bool,
    pub extension_present_flag: bool,
    pub range_extension_flag: bool,
    pub range_extension: PpsRangeExtension,
    pub scc_extension_flag: bool,
    pub scc_extension: PpsSccExtension,
    /// pps_extension_4bits. Extension data signalled by these is skipped.
    pub extension_4bits: u8,
}

impl Default for Pps {
    fn default() -> Self {
        Self {
            pic_parameter_set_id: Default::default(),
            seq_parameter_set_id: Default::default(),
            dependent_slice_segments_enabled_flag: Default::default(),
            output_flag_present_flag: Default::default(),
            num_extra_slice_header_bits: Default::default(),
            sign_data_hiding_enabled_flag: Default::default(),
            cabac_init_present_flag: Default::default(),
            num_ref_idx_l0_default_active_minus1: Default::default(),
            num_ref_idx_l1_default_active_minus1: Default::default(),
            init_qp_minus26: Default::default(),
            constrained_intra_pred_flag: Default::default(),
            transform_skip_enabled_flag: Default::default(),
            cu_qp_delta_enabled_flag: Default::default(),
            diff_cu_qp_delta_depth: Default::default(),
            cb_qp_offset: Default::default(),
            cr_qp_offset: Default::default(),
            slice_chroma_qp_offsets_present_flag: Default::default(),
            weighted_pred_flag: Default::default(),
            weighted_bipred_flag: Default::default(),
            transquant_bypass_enabled_flag: Default::default(),
            tiles_enabled_flag: Default::default(),
            entropy_coding_sync_enabled_flag: Default::default(),
            num_tile_columns_minus1: Default::default(),
            num_tile_rows_minus1: Default::default(),
            uniform_spacing_flag: true,
            column_width_minus1: Default::default(),
            row_height_minus1: Default::default(),
            loop_filter_across_tiles_enabled_flag: true,
            loop_filter_across_slices_enabled_flag: Default::default(),
            deblocking_filter_control_present_flag: Default::default(),
            deblocking_filter_override_enabled_flag: Default::default(),
            deblocking_filter_disabled_flag: Default::default(),
            beta_offset_div2: Default::default(),
            tc_offset_div2: Default::default(),
            scaling_list_data_present_flag: Default::default(),
            scaling_list: Default::default(),
            lists_modification_present_flag: Default::default(),
            log2_parallel_merge_level_minus2: Default::default(),
            slice_segment_header_extension_present_flag: Default::default(),
            extension_present_flag: Default::default(),
            range_extension_flag: Default::default(),
            range_extension: Default::default(),
            scc_extension_flag: Default::default(),
            scc_extension: Default::default(),
            extension_4bits: Default::default(),
        }
    }
}

impl Pps {
    /// colWidth[i] of (6-3), in CTBs.
    pub fn tile_column_widths(&self, sps: &Sps) -> Vec<u32> {
        Self::tile_sizes(
            self.uniform_spacing_flag,
            u32::from(self.num_tile_columns_minus1) + 1,
            &self.column_width_minus1,
            sps.pic_width_in_ctbs_y(),
        )
    }

    /// rowHeight[j] of (6-4), in CTBs.
    pub fn tile_row_heights(&self, sps: &Sps) -> Vec<u32> {
        Self::tile_sizes(
            self.uniform_spacing_flag,
            u32::from(self.num_tile_rows_minus1) + 1,
            &self.row_height_minus1,
            sps.pic_height_in_ctbs_y(),
        )
    }

    fn tile_sizes(uniform: bool, count: u32, coded_minus1: &[u32], total: u32) -> Vec<u32> {
        if uniform {
            (0..count)
                .map(|i| ((i + 1) * total) / count - (i * total) / count)
                .collect()
        } else {
            let mut sizes: Vec<u32> = coded_minus1.iter().map(|size| size + 1).collect();
            let used: u32 = sizes.iter().sum();
            sizes.push(total.saturating_sub(used));
            sizes
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RefPicListModification {
    pub ref_pic_list_modification_flag_l0: bool,
    pub list_entry_l0: Vec<u32>,
    pub ref_pic_list_modification_flag_l1: bool,
    pub list_entry_l1: Vec<u32>,
}

/// The weights of one entry of a reference picture list.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WeightingFactors {
    pub luma_weight_flag: bool,
    pub chroma_weight_flag: bool,
    pub delta_luma_weight: i8,
    pub luma_offset: i32,
    pub delta_chroma_weight: [i8; 2],
    pub delta_chroma_offset: [i32; 2],
}

/// pred_weight_table(), 7.3.6.3.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PredWeightTable {
    pub luma_log2_weight_denom: u8,
    pub delta_chroma_log2_weight_denom: i8,
    /// One entry per active reference of list 0.
    pub weights_l0: Vec<WeightingFactors>,
    /// One entry per active reference of list 1, B slices only.
    pub weights_l1: Vec<WeightingFactors>,
}

impl PredWeightTable {
    /// ChromaLog2WeightDenom, (7-56).
    pub fn chroma_log2_weight_denom(&self) -> u8 {
        (i16::from(self.luma_log2_weight_denom) + i16::from(self.delta_chroma_log2_weight_denom))
            as u8
    }
}

/// See table 7-7.
#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SliceType {
    B = 0,
    #[default]
    P = 1,
    I = 2,
}

impl SliceType {
    /// Whether this is a P slice. See table 7-7 of H.265.
    pub fn is_p(&self) -> bool {
        matches!(self, SliceType::P)
    }

    /// Whether this is a B slice. See table 7-7 of H.265.
    pub fn is_b(&self) -> bool {
        matches!(self, SliceType::B)
    }

    /// Whether this is an I slice. See table 7-7 of H.265.
    pub fn is_i(&self) -> bool {
        matches!(self, SliceType::I)
    }
}

/// slice_segment_header(), 7.3.6.1.
///
/// The fields following `dependent_slice_segment_flag` up to the entry points
/// are not coded in dependent slice segments; they keep their defaults and
/// should be taken from the preceding independent segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SliceHeader {
    /// When set, specifies that the slice segment is the first slice segment
    /// of the picture in decoding order.
    pub first_slice_segment_in_pic_flag: bool,
    /// Affects the output of previously-decoded pictures in the decoded
    /// picture buffer after the decoding of an IDR or a BLA picture.
    pub no_output_of_prior_pics_flag: bool,
    /// Specifies the value of pps_pic_parameter_set_id for the PPS in use.
    pub pic_parameter_set_id: u8,
    pub dependent_slice_segment_flag: bool,
    /// Address of the first CTB in the slice segment, in the coding tree block
    /// raster scan of a picture.
    pub segment_address: u32,
    /// slice_reserved_flag[i], `num_extra_slice_header_bits` of them.
    pub slice_reserved_flag: Vec<bool>,
    pub type_: SliceType,
    pub pic_output_flag: bool,
    pub colour_plane_id: u8,
    /// Specifies the picture order count modulo MaxPicOrderCntLsb for the
    /// current picture.
    pub pic_order_cnt_lsb: u16,
    /// When set, the short-term RPS of the current picture is the SPS one
    /// selected by `short_term_ref_pic_set_idx`. Otherwise it is coded in
    /// `short_term_ref_pic_set`.
    pub short_term_ref_pic_set_sps_flag: bool,
    pub short_term_ref_pic_set: ShortTermRefPicSet,
    pub short_term_ref_pic_set_idx: u8,
    pub num_long_term_sps: u8,
    pub num_long_term_pics: u8,
    pub lt_idx_sps: Vec<u8>,
    /// PocLsbLt[i], from the SPS for the first `num_long_term_sps` entries.
    pub poc_lsb_lt: Vec<u32>,
    /// UsedByCurrPicLt[i], from the SPS for the first `num_long_term_sps`
    /// entries.
    pub used_by_curr_pic_lt: Vec<bool>,
    pub delta_poc_msb_present_flag: Vec<bool>,
    pub delta_poc_msb_cycle_lt: Vec<u32>,
    pub temporal_mvp_enabled_flag: bool,
    pub sao_luma_flag: bool,
    pub sao_chroma_flag: bool,
    pub num_ref_idx_active_override_flag: bool,
    pub num_ref_idx_l0_active_minus1: u8,
    pub num_ref_idx_l1_active_minus1: u8,
    pub ref_pic_list_modification: RefPicListModification,
    pub mvd_l1_zero_flag: bool,
    pub cabac_init_flag: bool,
    pub collocated_from_l0_flag: bool,
    pub collocated_ref_idx: u8,
    /// Present for weighted P and B slices.
    pub pred_weight_table: Option<PredWeightTable>,
    pub five_minus_max_num_merge_cand: u8,
    pub use_integer_mv_flag: bool,
    /// Specifies the initial value of QpY to be used for the coding blocks in
    /// the slice until modified by the value of CuQpDeltaVal in the coding
    /// unit layer.
    pub qp_delta: i8,
    pub cb_qp_offset: i8,
    pub cr_qp_offset: i8,
    pub slice_act_y_qp_offset: i8,
    pub slice_act_cb_qp_offset: i8,
    pub slice_act_cr_qp_offset: i8,
    pub cu_chroma_qp_offset_enabled_flag: bool,
    pub deblocking_filter_override_flag: bool,
    /// Inherited from the PPS unless overridden.
    pub deblocking_filter_disabled_flag: bool,
    pub beta_offset_div2: i8,
    pub tc_offset_div2: i8,
    pub loop_filter_across_slices_enabled_flag: bool,
    pub num_entry_point_offsets: u32,
    pub offset_len_minus1: u8,
    pub entry_point_offset_minus1: Vec<u32>,
    pub segment_header_extension_length: u16,
    pub segment_header_extension_data_byte: Vec<u8>,

    /// CurrRpsIdx.
    pub curr_rps_idx: u8,
    /// NumPicTotalCurr, (7-55). Only computed for P and B slices.
    pub num_pic_total_curr: u32,
    /// Size of the NAL unit header and slice_segment_header(), byte_alignment()
    /// included, in bits. Emulation prevention bytes are not counted.
    pub header_bit_size: usize,
    /// Number of emulation prevention bytes (EPB) in this slice_header().
    pub n_emulation_prevention_bytes: usize,
    /// Offset of the slice data in the NAL unit, in bytes. Counts the NAL unit
    /// header and the emulation prevention bytes.
    pub size: usize,
}

impl Default for SliceHeader {
    fn default() -> Self {
        Self {
            first_slice_segment_in_pic_flag: Default::default(),
            no_output_of_prior_pics_flag: Default::default(),
            pic_parameter_set_id: Default::default(),
            dependent_slice_segment_flag: Default::default(),
            segment_address: Default::default(),
            slice_reserved_flag: Default::default(),
            type_: Default::default(),
            pic_output_flag: true,
            colour_plane_id: Default::default(),
            pic_order_cnt_lsb: Default::default(),
            short_term_ref_pic_set_sps_flag: Default::default(),
            short_term_ref_pic_set: Default::default(),
            short_term_ref_pic_set_idx: Default::default(),
            num_long_term_sps: Default::default(),
            num_long_term_pics: Default::default(),
            lt_idx_sps: Default::default(),
            poc_lsb_lt: Default::default(),
            used_by_curr_pic_lt: Default::default(),
            delta_poc_msb_present_flag: Default::default(),
            delta_poc_msb_cycle_lt: Default::default(),
            temporal_mvp_enabled_flag: Default::default(),
            sao_luma_flag: Default::default(),
            sao_chroma_flag: Default::default(),
            num_ref_idx_active_override_flag: Default::default(),
            num_ref_idx_l0_active_minus1: Default::default(),
            num_ref_idx_l1_active_minus1: Default::default(),
            ref_pic_list_modification: Default::default(),
            mvd_l1_zero_flag: Default::default(),
            cabac_init_flag: Default::default(),
            collocated_from_l0_flag: true,
            collocated_ref_idx: Default::default(),
            pred_weight_table: Default::default(),
            five_minus_max_num_merge_cand: Default::default(),
            use_integer_mv_flag: Default::default(),
            qp_delta: Default::default(),
            cb_qp_offset: Default::default(),
            cr_qp_offset: Default::default(),
            slice_act_y_qp_offset: Default::default(),
            slice_act_cb_qp_offset: Default::default(),
            slice_act_cr_qp_offset: Default::default(),
            cu_chroma_qp_offset_enabled_flag: Default::default(),
            deblocking_filter_override_flag: Default::default(),
            deblocking_filter_disabled_flag: Default::default(),
            beta_offset_div2: Default::default(),
            tc_offset_div2: Default::default(),
            loop_filter_across_slices_enabled_flag: Default::default(),
            num_entry_point_offsets: Default::default(),
            offset_len_minus1: Default::default(),
            entry_point_offset_minus1: Default::default(),
            segment_header_extension_length: Default::default(),
            segment_header_extension_data_byte: Default::default(),
            curr_rps_idx: Default::default(),
            num_pic_total_curr: Default::default(),
            header_bit_size: Default::default(),
            n_emulation_prevention_bytes: Default::default(),
            size: Default::default(),
        }
    }
}

impl SliceHeader {
    /// The short-term RPS in use by this slice: either the one coded in the
    /// header or the SPS one it selects.
    pub fn curr_short_term_ref_pic_set<'a>(
        &'a self,
        sps: &'a Sps,
    ) -> Option<&'a ShortTermRefPicSet> {
        if self.short_term_ref_pic_set_sps_flag {
            sps.short_term_ref_pic_set
                .get(usize::from(self.short_term_ref_pic_set_idx))
        } else {
            Some(&self.short_term_ref_pic_set)
        }
    }
}

/// Knobs for the [`Parser`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ParserOptions {
    /// Parse a PPS whose SPS is unknown. Fields bounded by the SPS then accept
    /// their widest legal range, 16-bit 4:2:0 is assumed and the scaling lists
    /// are left flat. Without this option such a PPS is rejected with
    /// [`ParseError::MissingParameterSet`].
    pub allow_missing_sps: bool,
}

/// H.265 parameter set and slice segment header parser.
#[derive(Clone, Copy, Debug, Default)]
pub struct Parser {
    options: ParserOptions,
}

impl Parser {
    pub fn new(options: ParserOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ParserOptions {
        &self.options
    }

    fn check_nalu_type(nalu: &Nalu, expected: NaluType, name: &'static str) -> anyhow::Result<()> {
        if nalu.header.type_ != expected {
            return Err(ParseError::UnexpectedNaluType {
                expected: name,
                found: nalu.header.type_ as u8,
            }
            .into());
        }

        Ok(())
    }

    /// Parses a VPS NAL unit.
    pub fn parse_vps(&self, nalu: &Nalu) -> anyhow::Result<Vps> {
        Parser::check_nalu_type(nalu, NaluType::VpsNut, "VPS")?;
        log::debug!("Parsing VPS of {} bytes", nalu.size);

        let mut r = NaluReader::new(nalu.payload());
        let vps = Parser::parse_vps_data(&mut r).context("while parsing VPS")?;

        log::trace!("Parsed {:?}", vps);
        Ok(vps)
    }

    fn parse_vps_data<R: Read>(r: &mut NaluReader<R>) -> anyhow::Result<Vps> {
        let mut vps = Vps {
            video_parameter_set_id: r.read_bits(4)?,
            base_layer_internal_flag: r.read_bit()?,
            base_layer_available_flag: r.read_bit()?,
            max_layers_minus1: r.read_bits(6)?,
            max_sub_layers_minus1: r.read_bits(3)?,
            temporal_id_nesting_flag: r.read_bit()?,
            ..Default::default()
        };

        if usize::from(vps.max_sub_layers_minus1) >= MAX_SUB_LAYERS {
            return Err(anyhow!(
                "Invalid vps_max_sub_layers_minus1 {}",
                vps.max_sub_layers_minus1
            ));
        }

        r.skip_bits(16)?; // vps_reserved_0xffff_16bits

        Parser::parse_profile_tier_level(
            r,
            &mut vps.profile_tier_level,
            true,
            vps.max_sub_layers_minus1,
        )
        .context("while parsing profile_tier_level")?;

        vps.sub_layer_ordering_info_present_flag = r.read_bit()?;

        let max_sub_layer = usize::from(vps.max_sub_layers_minus1);
        let start = if vps.sub_layer_ordering_info_present_flag {
            0
        } else {
            max_sub_layer
        };

        for i in start..=max_sub_layer {
            vps.max_dec_pic_buffering_minus1[i] = r.read_ue_max(15)?;
            vps.max_num_reorder_pics[i] = r.read_ue_max(vps.max_dec_pic_buffering_minus1[i])?;
            vps.max_latency_increase_plus1[i] = r.read_ue_max(u32::MAX - 1)?;
        }

        // vps_sub_layer_ordering_info_present_flag equal to 0 specifies that
        // the values of vps_max_dec_pic_buffering_minus1[
        // vps_max_sub_layers_minus1 ], vps_max_num_reorder_pics[ vps_max_sub_
        // layers_minus1 ] and vps_max_latency_increase_plus1[
        // vps_max_sub_layers_minus1 ] apply to all sub-layers
        if !vps.sub_layer_ordering_info_present_flag {
            for i in 0..max_sub_layer {
                vps.max_dec_pic_buffering_minus1[i] =
                    vps.max_dec_pic_buffering_minus1[max_sub_layer];
                vps.max_num_reorder_pics[i] = vps.max_num_reorder_pics[max_sub_layer];
                vps.max_latency_increase_plus1[i] = vps.max_latency_increase_plus1[max_sub_layer];
            }
        }

        vps.max_layer_id = r.read_bits(6)?;
        if vps.max_layer_id > 62 {
            return Err(anyhow!("Invalid max_layer_id {}", vps.max_layer_id));
        }

        vps.num_layer_sets_minus1 = r.read_ue_max(1023)?;

        for _ in 1..=vps.num_layer_sets_minus1 {
            let mut layer_id_included_flag = Vec::with_capacity(usize::from(vps.max_layer_id) + 1);
            for _ in 0..=vps.max_layer_id {
                layer_id_included_flag.push(r.read_bit()?);
            }
            vps.layer_id_included_flag.push(layer_id_included_flag);
        }

        vps.timing_info_present_flag = r.read_bit()?;

        if vps.timing_info_present_flag {
            vps.num_units_in_tick = r.read_bits(32)?;
            vps.time_scale = r.read_bits(32)?;

            vps.poc_proportional_to_timing_flag = r.read_bit()?;
            if vps.poc_proportional_to_timing_flag {
                vps.num_ticks_poc_diff_one_minus1 = r.read_ue_max(u32::MAX - 1)?;
            }

            vps.num_hrd_parameters = r.read_ue_max(vps.num_layer_sets_minus1 + 1)?;

            for i in 0..vps.num_hrd_parameters as usize {
                vps.hrd_layer_set_idx.push(r.read_ue_max(vps.num_layer_sets_minus1)?);
                if i > 0 {
                    vps.cprms_present_flag.push(r.read_bit()?);
                }

                let mut hrd = HrdParams::default();
                Parser::parse_hrd_parameters(
                    r,
                    &mut hrd,
                    vps.cprms_present_flag[i],
                    vps.max_sub_layers_minus1,
                )
                .context("while parsing HRD parameters")?;

                vps.hrd_parameters.push(hrd);
            }
        }

        vps.extension_flag = r.read_bit()?;

        Ok(vps)
    }

    fn parse_profile_tier_level<R: Read>(
        r: &mut NaluReader<R>,
        ptl: &mut ProfileTierLevel,
        profile_present_flag: bool,
        max_sub_layers_minus1: u8,
    ) -> anyhow::Result<()> {
        if profile_present_flag {
            ptl.general_profile_space = r.read_bits(2)?;
            ptl.general_tier_flag = r.read_bit()?;
            ptl.general_profile_idc = r.read_bits(5)?;

            for flag in ptl.general_profile_compatibility_flag.iter_mut() {
                *flag = r.read_bit()?;
            }

            ptl.general_progressive_source_flag = r.read_bit()?;
            ptl.general_interlaced_source_flag = r.read_bit()?;
            ptl.general_non_packed_constraint_flag = r.read_bit()?;
            ptl.general_frame_only_constraint_flag = r.read_bit()?;

            let idc = ptl.general_profile_idc;
            let compat = &ptl.general_profile_compatibility_flag;

            if profile_matches(idc, compat, &[4, 5, 6, 7, 8, 9, 10, 11]) {
                ptl.general_max_12bit_constraint_flag = r.read_bit()?;
                ptl.general_max_10bit_constraint_flag = r.read_bit()?;
                ptl.general_max_8bit_constraint_flag = r.read_bit()?;
                ptl.general_max_422chroma_constraint_flag = r.read_bit()?;
                ptl.general_max_420chroma_constraint_flag = r.read_bit()?;
                ptl.general_max_monochrome_constraint_flag = r.read_bit()?;
                ptl.general_intra_constraint_flag = r.read_bit()?;
                ptl.general_one_picture_only_constraint_flag = r.read_bit()?;
                ptl.general_lower_bit_rate_constraint_flag = r.read_bit()?;

                if profile_matches(idc, compat, &[5, 9, 10, 11]) {
                    ptl.general_max_14bit_constraint_flag = r.read_bit()?;
                    // general_reserved_zero_33bits
                    r.skip_bits(33)?;
                } else {
                    // general_reserved_zero_34bits
                    r.skip_bits(34)?;
                }
            } else if profile_matches(idc, compat, &[2]) {
                // general_reserved_zero_7bits
                r.skip_bits(7)?;
                ptl.general_one_picture_only_constraint_flag = r.read_bit()?;
                // general_reserved_zero_35bits
                r.skip_bits(35)?;
            } else {
                // general_reserved_zero_43bits
                r.skip_bits(43)?;
            }

            if profile_matches(idc, compat, &[1, 2, 3, 4, 5, 9, 11]) {
                ptl.general_inbld_flag = r.read_bit()?;
            } else {
                // general_reserved_zero_bit
                r.skip_bits(1)?;
            }
        }

        ptl.general_level_idc = r.read_bits(8)?;

        let max_sub_layers_minus1 = usize::from(max_sub_layers_minus1);

        for i in 0..max_sub_layers_minus1 {
            ptl.sub_layer_profile_present_flag[i] = r.read_bit()?;
            ptl.sub_layer_level_present_flag[i] = r.read_bit()?;
        }

        if max_sub_layers_minus1 > 0 {
            for _ in max_sub_layers_minus1..8 {
                // reserved_zero_2bits
                r.skip_bits(2)?;
            }
        }

        for i in 0..max_sub_layers_minus1 {
            if ptl.sub_layer_profile_present_flag[i] {
                ptl.sub_layer_profile_space[i] = r.read_bits(2)?;
                ptl.sub_layer_tier_flag[i] = r.read_bit()?;
                ptl.sub_layer_profile_idc[i] = r.read_bits(5)?;

                for flag in ptl.sub_layer_profile_compatibility_flag[i].iter_mut() {
                    *flag = r.read_bit()?;
                }

                ptl.sub_layer_progressive_source_flag[i] = r.read_bit()?;
                ptl.sub_layer_interlaced_source_flag[i] = r.read_bit()?;
                ptl.sub_layer_non_packed_constraint_flag[i] = r.read_bit()?;
                ptl.sub_layer_frame_only_constraint_flag[i] = r.read_bit()?;

                let idc = ptl.sub_layer_profile_idc[i];
                let compat = &ptl.sub_layer_profile_compatibility_flag[i];

                if profile_matches(idc, compat, &[4, 5, 6, 7, 8, 9, 10, 11]) {
                    ptl.sub_layer_max_12bit_constraint_flag[i] = r.read_bit()?;
                    ptl.sub_layer_max_10bit_constraint_flag[i] = r.read_bit()?;
                    ptl.sub_layer_max_8bit_constraint_flag[i] = r.read_bit()?;
                    ptl.sub_layer_max_422chroma_constraint_flag[i] = r.read_bit()?;
                    ptl.sub_layer_max_420chroma_constraint_flag[i] = r.read_bit()?;
                    ptl.sub_layer_max_monochrome_constraint_flag[i] = r.read_bit()?;
                    ptl.sub_layer_intra_constraint_flag[i] = r.read_bit()?;
                    ptl.sub_layer_one_picture_only_constraint_flag[i] = r.read_bit()?;
                    ptl.sub_layer_lower_bit_rate_constraint_flag[i] = r.read_bit()?;

                    if profile_matches(idc, compat, &[5, 9, 10, 11]) {
                        ptl.sub_layer_max_14bit_constraint_flag[i] = r.read_bit()?;
                        r.skip_bits(33)?;
                    } else {
                        r.skip_bits(34)?;
                    }
                } else if profile_matches(idc, compat, &[2]) {
                    r.skip_bits(7)?;
                    ptl.sub_layer_one_picture_only_constraint_flag[i] = r.read_bit()?;
                    r.skip_bits(35)?;
                } else {
                    r.skip_bits(43)?;
                }

                if profile_matches(idc, compat, &[1, 2, 3, 4, 5, 9, 11]) {
                    ptl.sub_layer_inbld_flag[i] = r.read_bit()?;
                } else {
                    r.skip_bits(1)?;
                }
            }

            if ptl.sub_layer_level_present_flag[i] {
                ptl.sub_layer_level_idc[i] = r.read_bits(8)?;
            }
        }

        Ok(())
    }

    fn parse_scaling_list_data<R: Read>(
        r: &mut NaluReader<R>,
        sl: &mut ScalingLists,
    ) -> anyhow::Result<()> {
        // 7.3.4
        for size_id in 0..4 {
            let step = if size_id == 3 { 3 } else { 1 };
            for matrix_id in (0..6).step_by(step) {
                let pred_mode_flag = r.read_bit()?;
                sl.pred_mode_flag[size_id][matrix_id] = pred_mode_flag;

                // If scaling_list_pred_matrix_id_delta[ sizeId ][ matrixId ] is
                // equal to 0, the scaling list is inferred from the default
                // scaling list ScalingList[ sizeId ][ matrixId ][ i ] as specified
                // in Table 7-5 and Table 7-6 for i = 0..Min( 63, ( 1 << ( 4 + (
                // sizeId << 1 ) ) ) − 1 ).
                if !pred_mode_flag {
                    let delta: u8 = r.read_ue_max((matrix_id / step) as u32)?;
                    sl.pred_matrix_id_delta[size_id][matrix_id] = delta;

                    if delta == 0 {
                        sl.fill_default(size_id, matrix_id);
                    } else {
                        // Equation 7-42
                        let ref_matrix_id = matrix_id - usize::from(delta) * step;
                        sl.copy_from_reference(size_id, ref_matrix_id, matrix_id);
                    }
                } else {
                    let mut next_coef = 8;

                    if size_id > 1 {
                        let dc_coef_minus8: i16 = r.read_se_bounded(-7, 247)?;
                        *sl.dc_coef_minus8_mut(size_id, matrix_id) = dc_coef_minus8;
                        next_coef = i32::from(dc_coef_minus8) + 8;
                    }

                    for coef in sl.list_mut(size_id, matrix_id) {
                        let scaling_list_delta_coef: i32 = r.read_se_bounded(-128, 127)?;
                        next_coef = (next_coef + scaling_list_delta_coef + 256) % 256;
                        *coef = next_coef as u8;
                    }
                }
            }
        }

        Ok(())
    }

    /// Parses st_ref_pic_set(`st_rps_idx`). `sets` are the sets already parsed
    /// from the SPS, the candidates for inter RPS prediction.
    fn parse_short_term_ref_pic_set<R: Read>(
        r: &mut NaluReader<R>,
        st_rps_idx: u8,
        num_short_term_ref_pic_sets: u8,
        sets: &[ShortTermRefPicSet],
        max_dec_pic_buffering_minus1: u8,
    ) -> anyhow::Result<ShortTermRefPicSet> {
        let mut st = ShortTermRefPicSet::default();

        if st_rps_idx != 0 {
            st.inter_ref_pic_set_prediction_flag = r.read_bit()?;
        }

        if st.inter_ref_pic_set_prediction_flag {
            if st_rps_idx == num_short_term_ref_pic_sets {
                st.delta_idx_minus1 = r.read_ue_max(u32::from(st_rps_idx) - 1)?;
            }

            st.delta_rps_sign = r.read_bit()?;
            // The value of abs_delta_rps_minus1 shall be in the range of 0 to
            // 2^15 − 1, inclusive.
            st.abs_delta_rps_minus1 = r.read_ue_max(32767)?;

            // (7-59)
            let ref_rps_idx = st_rps_idx - (st.delta_idx_minus1 + 1);
            // (7-60)
            let abs_delta_rps = i32::from(st.abs_delta_rps_minus1) + 1;
            let delta_rps = if st.delta_rps_sign {
                -abs_delta_rps
            } else {
                abs_delta_rps
            };

            let ref_st = sets
                .get(usize::from(ref_rps_idx))
                .with_context(|| format!("Invalid RefRpsIdx {}", ref_rps_idx))?;

            let ref_num_delta_pocs = ref_st.delta_poc_s0.len() + ref_st.delta_poc_s1.len();
            for _ in 0..=ref_num_delta_pocs {
                let used_by_curr_pic_flag = r.read_bit()?;
                st.used_by_curr_pic_flag.push(used_by_curr_pic_flag);

                // use_delta_flag is inferred to be 1 when not present.
                let use_delta_flag = used_by_curr_pic_flag || r.read_bit()?;
                st.use_delta_flag.push(use_delta_flag);
            }

            st.predict_from(ref_st, delta_rps);
            st.num_negative_pics = u8::try_from(st.delta_poc_s0.len())?;
            st.num_positive_pics = u8::try_from(st.delta_poc_s1.len())?;
        } else {
            st.num_negative_pics = r.read_ue_max(u32::from(max_dec_pic_buffering_minus1))?;
            st.num_positive_pics = r.read_ue_max(u32::from(
                max_dec_pic_buffering_minus1 - st.num_negative_pics,
            ))?;

            let mut delta_poc = 0;
            for _ in 0..st.num_negative_pics {
                let delta_poc_s0_minus1: i32 = r.read_ue_max(32767)?;
                delta_poc -= delta_poc_s0_minus1 + 1;

                st.delta_poc_s0.push(delta_poc);
                st.used_by_curr_pic_s0.push(r.read_bit()?);
            }

            let mut delta_poc = 0;
            for _ in 0..st.num_positive_pics {
                let delta_poc_s1_minus1: i32 = r.read_ue_max(32767)?;
                delta_poc += delta_poc_s1_minus1 + 1;

                st.delta_poc_s1.push(delta_poc);
                st.used_by_curr_pic_s1.push(r.read_bit()?);
            }
        }

        st.num_delta_pocs = u32::from(st.num_negative_pics) + u32::from(st.num_positive_pics);

        Ok(st)
    }

    fn parse_sublayer_hrd_parameters<R: Read>(
        r: &mut NaluReader<R>,
        h: &mut SublayerHrdParameters,
        cpb_cnt: u32,
        sub_pic_hrd_params_present_flag: bool,
    ) -> anyhow::Result<()> {
        for i in 0..cpb_cnt as usize {
            h.bit_rate_value_minus1[i] = r.read_ue_max(u32::MAX - 1)?;
            h.cpb_size_value_minus1[i] = r.read_ue_max(u32::MAX - 1)?;
            if sub_pic_hrd_params_present_flag {
                h.cpb_size_du_value_minus1[i] = r.read_ue_max(u32::MAX - 1)?;
                h.bit_rate_du_value_minus1[i] = r.read_ue_max(u32::MAX - 1)?;
            }

            h.cbr_flag[i] = r.read_bit()?;
        }

        Ok(())
    }

    fn parse_hrd_parameters<R: Read>(
        r: &mut NaluReader<R>,
        hrd: &mut HrdParams,
        common_inf_present_flag: bool,
        max_num_sub_layers_minus1: u8,
    ) -> anyhow::Result<()> {
        if common_inf_present_flag {
            hrd.nal_hrd_parameters_present_flag = r.read_bit()?;
            hrd.vcl_hrd_parameters_present_flag = r.read_bit()?;
            if hrd.nal_hrd_parameters_present_flag || hrd.vcl_hrd_parameters_present_flag {
                hrd.sub_pic_hrd_params_present_flag = r.read_bit()?;
                if hrd.sub_pic_hrd_params_present_flag {
                    hrd.tick_divisor_minus2 = r.read_bits(8)?;
                    hrd.du_cpb_removal_delay_increment_length_minus1 = r.read_bits(5)?;
                    hrd.sub_pic_cpb_params_in_pic_timing_sei_flag = r.read_bit()?;
                    hrd.dpb_output_delay_du_length_minus1 = r.read_bits(5)?;
                }
                hrd.bit_rate_scale = r.read_bits(4)?;
                hrd.cpb_size_scale = r.read_bits(4)?;
                if hrd.sub_pic_hrd_params_present_flag {
                    hrd.cpb_size_du_scale = r.read_bits(4)?;
                }
                hrd.initial_cpb_removal_delay_length_minus1 = r.read_bits(5)?;
                hrd.au_cpb_removal_delay_length_minus1 = r.read_bits(5)?;
                hrd.dpb_output_delay_length_minus1 = r.read_bits(5)?;
            }
        }

        for i in 0..=usize::from(max_num_sub_layers_minus1) {
            hrd.fixed_pic_rate_general_flag[i] = r.read_bit()?;
            hrd.fixed_pic_rate_within_cvs_flag[i] = if hrd.fixed_pic_rate_general_flag[i] {
                true
            } else {
                r.read_bit()?
            };

            if hrd.fixed_pic_rate_within_cvs_flag[i] {
                hrd.elemental_duration_in_tc_minus1[i] = r.read_ue_max(2047)?;
            } else {
                hrd.low_delay_hrd_flag[i] = r.read_bit()?;
            }

            if !hrd.low_delay_hrd_flag[i] {
                hrd.cpb_cnt_minus1[i] = r.read_ue_max(31)?;
            }

            if hrd.nal_hrd_parameters_present_flag {
                Parser::parse_sublayer_hrd_parameters(
                    r,
                    &mut hrd.nal_hrd[i],
                    hrd.cpb_cnt_minus1[i] + 1,
                    hrd.sub_pic_hrd_params_present_flag,
                )?;
            }

            if hrd.vcl_hrd_parameters_present_flag {
                Parser::parse_sublayer_hrd_parameters(
                    r,
                    &mut hrd.vcl_hrd[i],
                    hrd.cpb_cnt_minus1[i] + 1,
                    hrd.sub_pic_hrd_params_present_flag,
                )?;
            }
        }

        Ok(())
    }

    fn parse_vui_parameters<R: Read>(
        r: &mut NaluReader<R>,
        vui: &mut VuiParams,
        max_sub_layers_minus1: u8,
    ) -> anyhow::Result<()> {
        vui.aspect_ratio_info_present_flag = r.read_bit()?;
        if vui.aspect_ratio_info_present_flag {
            vui.aspect_ratio_idc = r.read_bits(8)?;
            const EXTENDED_SAR: u32 = 255;
            if vui.aspect_ratio_idc == EXTENDED_SAR {
                vui.sar_width = r.read_bits(16)?;
                vui.sar_height = r.read_bits(16)?;
            }
        }

        vui.overscan_info_present_flag = r.read_bit()?;
        if vui.overscan_info_present_flag {
            vui.overscan_appropriate_flag = r.read_bit()?;
        }

        vui.video_signal_type_present_flag = r.read_bit()?;
        if vui.video_signal_type_present_flag {
            vui.video_format = r.read_bits(3)?;
            vui.video_full_range_flag = r.read_bit()?;
            vui.colour_description_present_flag = r.read_bit()?;
            if vui.colour_description_present_flag {
                vui.colour_primaries = r.read_bits(8)?;
                vui.transfer_characteristics = r.read_bits(8)?;
                vui.matrix_coeffs = r.read_bits(8)?;
            }
        }

        vui.chroma_loc_info_present_flag = r.read_bit()?;
        if vui.chroma_loc_info_present_flag {
            vui.chroma_sample_loc_type_top_field = r.read_ue_max(5)?;
            vui.chroma_sample_loc_type_bottom_field = r.read_ue_max(5)?;
        }

        vui.neutral_chroma_indication_flag = r.read_bit()?;
        vui.field_seq_flag = r.read_bit()?;
        vui.frame_field_info_present_flag = r.read_bit()?;
        vui.default_display_window_flag = r.read_bit()?;

        if vui.default_display_window_flag {
            vui.def_disp_win_left_offset = r.read_ue()?;
            vui.def_disp_win_right_offset = r.read_ue()?;
            vui.def_disp_win_top_offset = r.read_ue()?;
            vui.def_disp_win_bottom_offset = r.read_ue()?;
        }

        vui.timing_info_present_flag = r.read_bit()?;
        if vui.timing_info_present_flag {
            vui.num_units_in_tick = r.read_bits(32)?;
            vui.time_scale = r.read_bits(32)?;

            vui.poc_proportional_to_timing_flag = r.read_bit()?;
            if vui.poc_proportional_to_timing_flag {
                vui.num_ticks_poc_diff_one_minus1 = r.read_ue_max(u32::MAX - 1)?;
            }

            vui.hrd_parameters_present_flag = r.read_bit()?;
            if vui.hrd_parameters_present_flag {
                Parser::parse_hrd_parameters(r, &mut vui.hrd, true, max_sub_layers_minus1)
                    .context("while parsing HRD parameters")?;
            }
        }

        vui.bitstream_restriction_flag = r.read_bit()?;
        if vui.bitstream_restriction_flag {
            vui.tiles_fixed_structure_flag = r.read_bit()?;
            vui.motion_vectors_over_pic_boundaries_flag = r.read_bit()?;
            vui.restricted_ref_pic_lists_flag = r.read_bit()?;

            vui.min_spatial_segmentation_idc = r.read_ue_max(4095)?;
            vui.max_bytes_per_pic_denom = r.read_ue_max(16)?;
            vui.max_bits_per_min_cu_denom = r.read_ue_max(16)?;
            vui.log2_max_mv_length_horizontal = r.read_ue_max(15)?;
            vui.log2_max_mv_length_vertical = r.read_ue_max(15)?;
        }

        Ok(())
    }

    fn parse_sps_range_extension<R: Read>(
        r: &mut NaluReader<R>,
        ext: &mut SpsRangeExtension,
    ) -> anyhow::Result<()> {
        ext.transform_skip_rotation_enabled_flag = r.read_bit()?;
        ext.transform_skip_context_enabled_flag = r.read_bit()?;
        ext.implicit_rdpcm_enabled_flag = r.read_bit()?;
        ext.explicit_rdpcm_enabled_flag = r.read_bit()?;
        ext.extended_precision_processing_flag = r.read_bit()?;
        ext.intra_smoothing_disabled_flag = r.read_bit()?;
        ext.high_precision_offsets_enabled_flag = r.read_bit()?;
        ext.persistent_rice_adaptation_enabled_flag = r.read_bit()?;
        ext.cabac_bypass_alignment_enabled_flag = r.read_bit()?;

        Ok(())
    }

    fn parse_sps_scc_extension<R: Read>(
        r: &mut NaluReader<R>,
        sps: &mut Sps,
    ) -> anyhow::Result<()> {
        let num_comps = if sps.chroma_format_idc == 0 { 1 } else { 3 };
        let bit_depths = [
            usize::from(sps.bit_depth_luma_minus8) + 8,
            usize::from(sps.bit_depth_chroma_minus8) + 8,
        ];
        let scc = &mut sps.scc_extension;

        scc.curr_pic_ref_enabled_flag = r.read_bit()?;
        scc.palette_mode_enabled_flag = r.read_bit()?;
        if scc.palette_mode_enabled_flag {
            scc.palette_max_size = r.read_ue_max(64)?;
            scc.delta_palette_max_predictor_size =
                r.read_ue_max(128 - u32::from(scc.palette_max_size))?;
            scc.palette_predictor_initializers_present_flag = r.read_bit()?;
            if scc.palette_predictor_initializers_present_flag {
                // PaletteMaxPredictorSize, (7-35).
                let max_predictor_size = u32::from(scc.palette_max_size)
                    + u32::from(scc.delta_palette_max_predictor_size);
                let max = max_predictor_size
                    .checked_sub(1)
                    .ok_or(anyhow!("Palette predictor initializers with an empty palette"))?;
                scc.num_palette_predictor_initializers_minus1 = r.read_ue_max(max)?;

                for comp in 0..num_comps {
                    let num_bits = bit_depths[comp.min(1)];
                    for _ in 0..=scc.num_palette_predictor_initializers_minus1 {
                        scc.palette_predictor_initializer[comp].push(r.read_bits(num_bits)?);
                    }
                }
            }
        }

        scc.motion_vector_resolution_control_idc = r.read_bits(2)?;
        scc.intra_boundary_filtering_disabled_flag = r.read_bit()?;

        Ok(())
    }

    /// Parses a SPS NAL unit.
    pub fn parse_sps(&self, nalu: &Nalu) -> anyhow::Result<Sps> {
        Parser::check_nalu_type(nalu, NaluType::SpsNut, "SPS")?;
        log::debug!("Parsing SPS of {} bytes", nalu.size);

        let mut r = NaluReader::new(nalu.payload());
        let sps = Parser::parse_sps_data(&mut r).context("while parsing SPS")?;

        log::trace!("Parsed {:?}", sps);
        Ok(sps)
    }

    fn parse_sps_data<R: Read>(r: &mut NaluReader<R>) -> anyhow::Result<Sps> {
        let mut sps = Sps {
            video_parameter_set_id: r.read_bits(4)?,
            max_sub_layers_minus1: r.read_bits(3)?,
            temporal_id_nesting_flag: r.read_bit()?,
            ..Default::default()
        };

        if usize::from(sps.max_sub_layers_minus1) >= MAX_SUB_LAYERS {
            return Err(anyhow!(
                "Invalid sps_max_sub_layers_minus1 {}",
                sps.max_sub_layers_minus1
            ));
        }

        Parser::parse_profile_tier_level(
            r,
            &mut sps.profile_tier_level,
            true,
            sps.max_sub_layers_minus1,
        )
        .context("while parsing profile_tier_level")?;

        sps.seq_parameter_set_id = r.read_ue_max(u32::from(MAX_SPS_COUNT) - 1)?;
        sps.chroma_format_idc = r.read_ue_max(3)?;

        if sps.chroma_format_idc == 3 {
            sps.separate_colour_plane_flag = r.read_bit()?;
        }

        sps.pic_width_in_luma_samples = r.read_ue_bounded(1, 16888)?;
        sps.pic_height_in_luma_samples = r.read_ue_bounded(1, 16888)?;

        sps.conformance_window_flag = r.read_bit()?;
        if sps.conformance_window_flag {
            sps.conf_win_left_offset = r.read_ue()?;
            sps.conf_win_right_offset = r.read_ue()?;
            sps.conf_win_top_offset = r.read_ue()?;
            sps.conf_win_bottom_offset = r.read_ue()?;

            let (sub_width_c, sub_height_c) = sps.sub_width_height_c();
            let horizontal =
                u64::from(sps.conf_win_left_offset) + u64::from(sps.conf_win_right_offset);
            let vertical =
                u64::from(sps.conf_win_top_offset) + u64::from(sps.conf_win_bottom_offset);

            if u64::from(sub_width_c) * horizontal >= u64::from(sps.pic_width_in_luma_samples)
                || u64::from(sub_height_c) * vertical >= u64::from(sps.pic_height_in_luma_samples)
            {
                return Err(anyhow!(
                    "Invalid conformance window {}x{} for {}x{}",
                    horizontal,
                    vertical,
                    sps.pic_width_in_luma_samples,
                    sps.pic_height_in_luma_samples
                ));
            }
        }

        sps.bit_depth_luma_minus8 = r.read_ue_max(8)?;
        sps.bit_depth_chroma_minus8 = r.read_ue_max(8)?;
        sps.log2_max_pic_order_cnt_lsb_minus4 = r.read_ue_max(12)?;
        sps.sub_layer_ordering_info_present_flag = r.read_bit()?;

        let max_sub_layer = usize::from(sps.max_sub_layers_minus1);
        let start = if sps.sub_layer_ordering_info_present_flag {
            0
        } else {
            max_sub_layer
        };

        for i in start..=max_sub_layer {
            sps.max_dec_pic_buffering_minus1[i] = r.read_ue_max(15)?;
            sps.max_num_reorder_pics[i] =
                r.read_ue_max(u32::from(sps.max_dec_pic_buffering_minus1[i]))?;
            sps.max_latency_increase_plus1[i] = r.read_ue_max(u32::MAX - 1)?;
        }

        if !sps.sub_layer_ordering_info_present_flag {
            for i in 0..max_sub_layer {
                sps.max_dec_pic_buffering_minus1[i] =
                    sps.max_dec_pic_buffering_minus1[max_sub_layer];
                sps.max_num_reorder_pics[i] = sps.max_num_reorder_pics[max_sub_layer];
                sps.max_latency_increase_plus1[i] = sps.max_latency_increase_plus1[max_sub_layer];
            }
        }

        sps.log2_min_luma_coding_block_size_minus3 = r.read_ue_max(3)?;
        sps.log2_diff_max_min_luma_coding_block_size = r.read_ue_max(3)?;
        sps.log2_min_luma_transform_block_size_minus2 = r.read_ue_max(3)?;
        sps.log2_diff_max_min_luma_transform_block_size = r.read_ue_max(3)?;

        if sps.ctb_log2_size_y() > 6 {
            return Err(anyhow!("Invalid CtbLog2SizeY {}", sps.ctb_log2_size_y()));
        }

        let min_cb_size_y = 1 << sps.min_cb_log2_size_y();
        if sps.pic_width_in_luma_samples % min_cb_size_y != 0
            || sps.pic_height_in_luma_samples % min_cb_size_y != 0
        {
            return Err(anyhow!(
                "Picture size {}x{} is not a multiple of MinCbSizeY {}",
                sps.pic_width_in_luma_samples,
                sps.pic_height_in_luma_samples,
                min_cb_size_y
            ));
        }

        if sps.min_tb_log2_size_y() >= sps.min_cb_log2_size_y()
            || sps.max_tb_log2_size_y() > std::cmp::min(sps.ctb_log2_size_y(), 5)
        {
            return Err(anyhow!(
                "Invalid transform block sizes: MinTbLog2SizeY {}, MaxTbLog2SizeY {}",
                sps.min_tb_log2_size_y(),
                sps.max_tb_log2_size_y()
            ));
        }

        let max_depth = sps.ctb_log2_size_y() - sps.min_tb_log2_size_y();
        sps.max_transform_hierarchy_depth_inter = r.read_ue_max(max_depth)?;
        sps.max_transform_hierarchy_depth_intra = r.read_ue_max(max_depth)?;

        sps.scaling_list_enabled_flag = r.read_bit()?;
        if sps.scaling_list_enabled_flag {
            sps.scaling_list_data_present_flag = r.read_bit()?;
            if sps.scaling_list_data_present_flag {
                Parser::parse_scaling_list_data(r, &mut sps.scaling_list)
                    .context("while parsing scaling lists")?;
            } else {
                sps.scaling_list = ScalingLists::from_default_tables();
            }
        }

        sps.amp_enabled_flag = r.read_bit()?;
        sps.sample_adaptive_offset_enabled_flag = r.read_bit()?;

        sps.pcm_enabled_flag = r.read_bit()?;
        if sps.pcm_enabled_flag {
            sps.pcm_sample_bit_depth_luma_minus1 = r.read_bits(4)?;
            sps.pcm_sample_bit_depth_chroma_minus1 = r.read_bits(4)?;
            sps.log2_min_pcm_luma_coding_block_size_minus3 = r.read_ue_max(2)?;
            sps.log2_diff_max_min_pcm_luma_coding_block_size = r.read_ue_max(2)?;
            sps.pcm_loop_filter_disabled_flag = r.read_bit()?;
        }

        sps.num_short_term_ref_pic_sets = r.read_ue_max(MAX_SHORT_TERM_REF_PIC_SETS)?;

        let max_dec_pic_buffering_minus1 = sps.max_dec_pic_buffering_minus1[max_sub_layer];
        for i in 0..sps.num_short_term_ref_pic_sets {
            let st = Parser::parse_short_term_ref_pic_set(
                r,
                i,
                sps.num_short_term_ref_pic_sets,
                &sps.short_term_ref_pic_set,
                max_dec_pic_buffering_minus1,
            )
            .with_context(|| format!("while parsing short-term RPS {}", i))?;

            sps.short_term_ref_pic_set.push(st);
        }

        sps.long_term_ref_pics_present_flag = r.read_bit()?;
        if sps.long_term_ref_pics_present_flag {
            sps.num_long_term_ref_pics_sps = r.read_ue_max(MAX_LONG_TERM_REF_PICS)?;
            let num_bits = usize::from(sps.log2_max_pic_order_cnt_lsb_minus4) + 4;
            for _ in 0..sps.num_long_term_ref_pics_sps {
                sps.lt_ref_pic_poc_lsb_sps.push(r.read_bits(num_bits)?);
                sps.used_by_curr_pic_lt_sps_flag.push(r.read_bit()?);
            }
        }

        sps.temporal_mvp_enabled_flag = r.read_bit()?;
        sps.strong_intra_smoothing_enabled_flag = r.read_bit()?;

        sps.vui_parameters_present_flag = r.read_bit()?;
        if sps.vui_parameters_present_flag {
            Parser::parse_vui_parameters(r, &mut sps.vui_parameters, sps.max_sub_layers_minus1)
                .context("while parsing VUI parameters")?;
        }

        sps.extension_present_flag = r.read_bit()?;
        if sps.extension_present_flag {
            sps.range_extension_flag = r.read_bit()?;
            let multilayer_extension_flag = r.read_bit()?;
            let three_d_extension_flag = r.read_bit()?;
            sps.scc_extension_flag = r.read_bit()?;
            sps.extension_4bits = r.read_bits(4)?;

            if multilayer_extension_flag {
                return Err(anyhow!("Multilayer extension not supported."));
            }

            if three_d_extension_flag {
                return Err(anyhow!("3D extension not supported."));
            }

            if sps.range_extension_flag {
                Parser::parse_sps_range_extension(r, &mut sps.range_extension)?;
            }

            if sps.scc_extension_flag {
                Parser::parse_sps_scc_extension(r, &mut sps)?;
            }
        }

        Ok(sps)
    }

    /// An SPS standing in for a missing one, see
    /// [`ParserOptions::allow_missing_sps`].
    fn fallback_sps() -> Sps {
        Sps {
            chroma_format_idc: 1,
            bit_depth_luma_minus8: 8,
            bit_depth_chroma_minus8: 8,
            pic_width_in_luma_samples: 16888,
            pic_height_in_luma_samples: 16888,
            log2_diff_max_min_luma_coding_block_size: 3,
            log2_diff_max_min_luma_transform_block_size: 3,
            ..Default::default()
        }
    }

    fn parse_pps_range_extension<R: Read>(
        r: &mut NaluReader<R>,
        pps: &mut Pps,
        sps: &Sps,
    ) -> anyhow::Result<()> {
        let rext = &mut pps.range_extension;

        if pps.transform_skip_enabled_flag {
            rext.log2_max_transform_skip_block_size_minus2 =
                r.read_ue_max(sps.max_tb_log2_size_y() - 2)?;
        }

        rext.cross_component_prediction_enabled_flag = r.read_bit()?;
        rext.chroma_qp_offset_list_enabled_flag = r.read_bit()?;
        if rext.chroma_qp_offset_list_enabled_flag {
            rext.diff_cu_chroma_qp_offset_depth =
                r.read_ue_max(u32::from(sps.log2_diff_max_min_luma_coding_block_size))?;
            rext.chroma_qp_offset_list_len_minus1 = r.read_ue_max(5)?;
            for i in 0..=rext.chroma_qp_offset_list_len_minus1 as usize {
                rext.cb_qp_offset_list[i] = r.read_se_bounded(-12, 12)?;
                rext.cr_qp_offset_list[i] = r.read_se_bounded(-12, 12)?;
            }
        }

        let bit_depth_y = u32::from(sps.bit_depth_luma_minus8) + 8;
        let bit_depth_c = u32::from(sps.bit_depth_chroma_minus8) + 8;

        rext.log2_sao_offset_scale_luma = r.read_ue_max(bit_depth_y.saturating_sub(10))?;
        rext.log2_sao_offset_scale_chroma = r.read_ue_max(bit_depth_c.saturating_sub(10))?;

        Ok(())
    }

    fn parse_pps_scc_extension<R: Read>(
        r: &mut NaluReader<R>,
        pps: &mut Pps,
        sps: &Sps,
    ) -> anyhow::Result<()> {
        let scc = &mut pps.scc_extension;

        scc.curr_pic_ref_enabled_flag = r.read_bit()?;
        scc.residual_adaptive_colour_transform_enabled_flag = r.read_bit()?;
        if scc.residual_adaptive_colour_transform_enabled_flag {
            scc.slice_act_qp_offsets_present_flag = r.read_bit()?;
            scc.act_y_qp_offset_plus5 = r.read_se_bounded(-7, 17)?;
            scc.act_cb_qp_offset_plus5 = r.read_se_bounded(-7, 17)?;
            scc.act_cr_qp_offset_plus3 = r.read_se_bounded(-9, 15)?;
        }

        scc.palette_predictor_initializers_present_flag = r.read_bit()?;
        if scc.palette_predictor_initializers_present_flag {
            let max = u32::from(sps.scc_extension.palette_max_size)
                + u32::from(sps.scc_extension.delta_palette_max_predictor_size);
            scc.num_palette_predictor_initializers = r.read_ue_max(max)?;
            if scc.num_palette_predictor_initializers > 0 {
                scc.monochrome_palette_flag = r.read_bit()?;
                scc.luma_bit_depth_entry_minus8 = r.read_ue_bounded(
                    sps.bit_depth_luma_minus8.into(),
                    sps.bit_depth_luma_minus8.into(),
                )?;
                if !scc.monochrome_palette_flag {
                    scc.chroma_bit_depth_entry_minus8 = r.read_ue_bounded(
                        sps.bit_depth_chroma_minus8.into(),
                        sps.bit_depth_chroma_minus8.into(),
                    )?;
                }

                let num_comps = if scc.monochrome_palette_flag { 1 } else { 3 };
                for comp in 0..num_comps {
                    let num_bits = if comp == 0 {
                        scc.luma_bit_depth_entry_minus8 + 8
                    } else {
                        scc.chroma_bit_depth_entry_minus8 + 8
                    };
                    for _ in 0..scc.num_palette_predictor_initializers {
                        scc.palette_predictor_initializer[comp].push(r.read_bits(num_bits.into())?);
                    }
                }
            }
        }

        Ok(())
    }

    /// Parses a PPS NAL unit. `spses` are the sequence parameter sets known so
    /// far; the one referenced by the PPS bounds several of its fields.
    pub fn parse_pps(&self, nalu: &Nalu, spses: Option<&BTreeMap<u8, Sps>>) -> anyhow::Result<Pps> {
        Parser::check_nalu_type(nalu, NaluType::PpsNut, "PPS")?;
        log::debug!("Parsing PPS of {} bytes", nalu.size);

        let mut r = NaluReader::new(nalu.payload());
        let pps = self.parse_pps_data(&mut r, spses).context("while parsing PPS")?;

        log::trace!("Parsed {:?}", pps);
        Ok(pps)
    }

    fn parse_pps_data<R: Read>(
        &self,
        r: &mut NaluReader<R>,
        spses: Option<&BTreeMap<u8, Sps>>,
    ) -> anyhow::Result<Pps> {
        let mut pps = Pps {
            pic_parameter_set_id: r.read_ue_max(u32::from(MAX_PPS_COUNT) - 1)?,
            seq_parameter_set_id: r.read_ue_max(u32::from(MAX_SPS_COUNT) - 1)?,
            ..Default::default()
        };

        let fallback_sps;
        let sps = match spses.and_then(|spses| spses.get(&pps.seq_parameter_set_id)) {
            Some(sps) => sps,
            None if self.options.allow_missing_sps => {
                log::debug!(
                    "SPS {} is unknown, parsing PPS {} with default field ranges",
                    pps.seq_parameter_set_id,
                    pps.pic_parameter_set_id
                );
                fallback_sps = Parser::fallback_sps();
                &fallback_sps
            }
            None => {
                return Err(ParseError::MissingParameterSet {
                    kind: "SPS",
                    id: pps.seq_parameter_set_id,
                }
                .into())
            }
        };

        pps.dependent_slice_segments_enabled_flag = r.read_bit()?;
        pps.output_flag_present_flag = r.read_bit()?;
        pps.num_extra_slice_header_bits = r.read_bits(3)?;
        pps.sign_data_hiding_enabled_flag = r.read_bit()?;
        pps.cabac_init_present_flag = r.read_bit()?;

        // 7.4.7.1
        pps.num_ref_idx_l0_default_active_minus1 = r.read_ue_max(MAX_REF_IDX_ACTIVE - 1)?;
        pps.num_ref_idx_l1_default_active_minus1 = r.read_ue_max(MAX_REF_IDX_ACTIVE - 1)?;

        // QpBdOffsetY, (7-4).
        let qp_bd_offset_y = 6 * i32::from(sps.bit_depth_luma_minus8);

        pps.init_qp_minus26 = r.read_se_bounded(-(26 + qp_bd_offset_y), 25)?;
        pps.constrained_intra_pred_flag = r.read_bit()?;
        pps.transform_skip_enabled_flag = r.read_bit()?;
        pps.cu_qp_delta_enabled_flag = r.read_bit()?;

        if pps.cu_qp_delta_enabled_flag {
            pps.diff_cu_qp_delta_depth =
                r.read_ue_max(u32::from(sps.log2_diff_max_min_luma_coding_block_size))?;
        }

        pps.cb_qp_offset = r.read_se_bounded(-12, 12)?;
        pps.cr_qp_offset = r.read_se_bounded(-12, 12)?;

        pps.slice_chroma_qp_offsets_present_flag = r.read_bit()?;
        pps.weighted_pred_flag = r.read_bit()?;
        pps.weighted_bipred_flag = r.read_bit()?;
        pps.transquant_bypass_enabled_flag = r.read_bit()?;
        pps.tiles_enabled_flag = r.read_bit()?;
        pps.entropy_coding_sync_enabled_flag = r.read_bit()?;

        if pps.tiles_enabled_flag {
            let pic_width_in_ctbs_y = sps.pic_width_in_ctbs_y();
            let pic_height_in_ctbs_y = sps.pic_height_in_ctbs_y();

            pps.num_tile_columns_minus1 =
                r.read_ue_max(std::cmp::min(pic_width_in_ctbs_y, MAX_TILE_COLUMNS) - 1)?;
            pps.num_tile_rows_minus1 =
                r.read_ue_max(std::cmp::min(pic_height_in_ctbs_y, MAX_TILE_ROWS) - 1)?;

            pps.uniform_spacing_flag = r.read_bit()?;
            if !pps.uniform_spacing_flag {
                for _ in 0..pps.num_tile_columns_minus1 {
                    pps.column_width_minus1.push(r.read_ue_max(pic_width_in_ctbs_y - 1)?);
                }

                for _ in 0..pps.num_tile_rows_minus1 {
                    pps.row_height_minus1.push(r.read_ue_max(pic_height_in_ctbs_y - 1)?);
                }

                let width: u64 = pps.column_width_minus1.iter().map(|w| u64::from(*w) + 1).sum();
                let height: u64 = pps.row_height_minus1.iter().map(|h| u64::from(*h) + 1).sum();
                if width >= u64::from(pic_width_in_ctbs_y)
                    || height >= u64::from(pic_height_in_ctbs_y)
                {
                    return Err(anyhow!("Tiles do not fit in the picture"));
                }
            }

            pps.loop_filter_across_tiles_enabled_flag = r.read_bit()?;
        }

        pps.loop_filter_across_slices_enabled_flag = r.read_bit()?;
        pps.deblocking_filter_control_present_flag = r.read_bit()?;

        if pps.deblocking_filter_control_present_flag {
            pps.deblocking_filter_override_enabled_flag = r.read_bit()?;
            pps.deblocking_filter_disabled_flag = r.read_bit()?;
            if !pps.deblocking_filter_disabled_flag {
                pps.beta_offset_div2 = r.read_se_bounded(-6, 6)?;
                pps.tc_offset_div2 = r.read_se_bounded(-6, 6)?;
            }
        }

        pps.scaling_list_data_present_flag = r.read_bit()?;
        if pps.scaling_list_data_present_flag {
            Parser::parse_scaling_list_data(r, &mut pps.scaling_list)
                .context("while parsing scaling lists")?;
        } else {
            pps.scaling_list = sps.scaling_list.clone();
        }

        pps.lists_modification_present_flag = r.read_bit()?;
        pps.log2_parallel_merge_level_minus2 = r.read_ue_max(sps.ctb_log2_size_y() - 2)?;
        pps.slice_segment_header_extension_present_flag = r.read_bit()?;

        pps.extension_present_flag = r.read_bit()?;
        if pps.extension_present_flag {
            pps.range_extension_flag = r.read_bit()?;
            let multilayer_extension_flag = r.read_bit()?;
            let three_d_extension_flag = r.read_bit()?;
            pps.scc_extension_flag = r.read_bit()?;
            pps.extension_4bits = r.read_bits(4)?;

            if multilayer_extension_flag {
                return Err(anyhow!("Multilayer extension is not supported"));
            }

            if three_d_extension_flag {
                return Err(anyhow!("3D extension is not supported"));
            }

            if pps.range_extension_flag {
                Parser::parse_pps_range_extension(r, &mut pps, sps)?;
            }

            if pps.scc_extension_flag {
                Parser::parse_pps_scc_extension(r, &mut pps, sps)?;
            }
        }

        Ok(pps)
    }

    /// Reads the weights of `num_refs` entries of one reference list.
    fn parse_weighting_factors<R: Read>(
        r: &mut NaluReader<R>,
        num_refs: usize,
        sps: &Sps,
    ) -> anyhow::Result<Vec<WeightingFactors>> {
        let mut weights = vec![WeightingFactors::default(); num_refs];

        // The flags are also conditioned on the reference being a different
        // picture than the current one, which always holds outside of
        // multi-layer streams and current picture referencing.
        for w in weights.iter_mut() {
            w.luma_weight_flag = r.read_bit()?;
        }

        if sps.chroma_array_type() != 0 {
            for w in weights.iter_mut() {
                w.chroma_weight_flag = r.read_bit()?;
            }
        }

        let half_range_y = sps.wp_offset_half_range_y() as i32;
        let half_range_c = sps.wp_offset_half_range_c() as i32;

        for w in weights.iter_mut() {
            if w.luma_weight_flag {
                w.delta_luma_weight = r.read_se_bounded(-128, 127)?;
                w.luma_offset = r.read_se_bounded(-half_range_y, half_range_y - 1)?;
            }

            if w.chroma_weight_flag {
                for j in 0..2 {
                    w.delta_chroma_weight[j] = r.read_se_bounded(-128, 127)?;
                    w.delta_chroma_offset[j] =
                        r.read_se_bounded(-4 * half_range_c, 4 * half_range_c - 1)?;
                }
            }
        }

        Ok(weights)
    }

    fn parse_pred_weight_table<R: Read>(
        r: &mut NaluReader<R>,
        hdr: &SliceHeader,
        sps: &Sps,
    ) -> anyhow::Result<PredWeightTable> {
        let mut pwt = PredWeightTable {
            luma_log2_weight_denom: r.read_ue_max(7)?,
            ..Default::default()
        };

        if sps.chroma_array_type() != 0 {
            let luma = i32::from(pwt.luma_log2_weight_denom);
            pwt.delta_chroma_log2_weight_denom = r.read_se_bounded(-luma, 7 - luma)?;
        }

        pwt.weights_l0 = Parser::parse_weighting_factors(
            r,
            usize::from(hdr.num_ref_idx_l0_active_minus1) + 1,
            sps,
        )?;

        if hdr.type_.is_b() {
            pwt.weights_l1 = Parser::parse_weighting_factors(
                r,
                usize::from(hdr.num_ref_idx_l1_active_minus1) + 1,
                sps,
            )?;
        }

        Ok(pwt)
    }

    fn parse_list_entries<R: Read>(
        r: &mut NaluReader<R>,
        num_entries: usize,
        num_pic_total_curr: u32,
    ) -> anyhow::Result<Vec<u32>> {
        let num_bits = ceil_log2(num_pic_total_curr);
        let mut entries = Vec::with_capacity(num_entries);

        for _ in 0..num_entries {
            let entry = r.read_bits(num_bits)?;
            if entry >= num_pic_total_curr {
                return Err(anyhow!(
                    "Invalid list_entry {}, expected at max NumPicTotalCurr - 1: {}",
                    entry,
                    num_pic_total_curr - 1
                ));
            }

            entries.push(entry);
        }

        Ok(entries)
    }

    /// ref_pic_lists_modification(), 7.3.6.2.
    fn parse_ref_pic_lists_modification<R: Read>(
        r: &mut NaluReader<R>,
        hdr: &mut SliceHeader,
    ) -> anyhow::Result<()> {
        let rplm = &mut hdr.ref_pic_list_modification;

        rplm.ref_pic_list_modification_flag_l0 = r.read_bit()?;
        if rplm.ref_pic_list_modification_flag_l0 {
            rplm.list_entry_l0 = Parser::parse_list_entries(
                r,
                usize::from(hdr.num_ref_idx_l0_active_minus1) + 1,
                hdr.num_pic_total_curr,
            )?;
        }

        if hdr.type_.is_b() {
            rplm.ref_pic_list_modification_flag_l1 = r.read_bit()?;
            if rplm.ref_pic_list_modification_flag_l1 {
                rplm.list_entry_l1 = Parser::parse_list_entries(
                    r,
                    usize::from(hdr.num_ref_idx_l1_active_minus1) + 1,
                    hdr.num_pic_total_curr,
                )?;
            }
        }

        Ok(())
    }

    /// Parses the header of a slice segment NAL unit (types 0 to 31). The PPS
    /// it refers to must be in `ppses` and that PPS's SPS in `spses`.
    pub fn parse_slice_header(
        &self,
        nalu: &Nalu,
        spses: &BTreeMap<u8, Sps>,
        ppses: &BTreeMap<u8, Pps>,
    ) -> anyhow::Result<SliceHeader> {
        if !nalu.header.type_.is_video() {
            return Err(ParseError::UnexpectedNaluType {
                expected: "slice segment",
                found: nalu.header.type_ as u8,
            }
            .into());
        }

        log::debug!(
            "Parsing slice header of {:?} NAL unit of {} bytes",
            nalu.header.type_,
            nalu.size
        );

        let mut r = NaluReader::new(nalu.payload());
        let hdr = Parser::parse_slice_header_data(&mut r, nalu, spses, ppses)
            .context("while parsing slice header")?;

        log::trace!("Parsed {:?}", hdr);
        Ok(hdr)
    }

    fn parse_long_term_pics<R: Read>(
        r: &mut NaluReader<R>,
        hdr: &mut SliceHeader,
        sps: &Sps,
    ) -> anyhow::Result<()> {
        if sps.num_long_term_ref_pics_sps > 0 {
            hdr.num_long_term_sps = r.read_ue_max(u32::from(sps.num_long_term_ref_pics_sps))?;
        }

        hdr.num_long_term_pics = r.read_ue_max(MAX_LONG_TERM_REF_PICS)?;

        let poc_lsb_bits = usize::from(sps.log2_max_pic_order_cnt_lsb_minus4) + 4;
        let num_lt = usize::from(hdr.num_long_term_sps) + usize::from(hdr.num_long_term_pics);

        for i in 0..num_lt {
            // The variables PocLsbLt[ i ] and UsedByCurrPicLt[ i ] are derived as follows:
            //
            // – If i is less than num_long_term_sps, PocLsbLt[ i ] is set equal to
            // lt_ref_pic_poc_lsb_sps[ lt_idx_sps[ i ] ] and UsedByCurrPicLt[ i ] is set equal
            // to used_by_curr_pic_lt_sps_flag[ lt_idx_sps[ i ] ].
            //
            // – Otherwise, PocLsbLt[ i ]
            // is set equal to poc_lsb_lt[ i ] and UsedByCurrPicLt[ i ] is set equal to
            // used_by_curr_pic_lt_flag[ i ].
            if i < usize::from(hdr.num_long_term_sps) {
                let mut lt_idx_sps = 0;
                if sps.num_long_term_ref_pics_sps > 1 {
                    lt_idx_sps = r.read_bits(ceil_log2(u32::from(sps.num_long_term_ref_pics_sps)))?;
                }

                let idx = usize::from(lt_idx_sps);
                let poc_lsb_lt = sps
                    .lt_ref_pic_poc_lsb_sps
                    .get(idx)
                    .with_context(|| format!("Invalid lt_idx_sps[{}] {}", i, lt_idx_sps))?;
                let used = sps
                    .used_by_curr_pic_lt_sps_flag
                    .get(idx)
                    .with_context(|| format!("Invalid lt_idx_sps[{}] {}", i, lt_idx_sps))?;

                hdr.lt_idx_sps.push(lt_idx_sps);
                hdr.poc_lsb_lt.push(*poc_lsb_lt);
                hdr.used_by_curr_pic_lt.push(*used);
            } else {
                hdr.lt_idx_sps.push(0);
                hdr.poc_lsb_lt.push(r.read_bits(poc_lsb_bits)?);
                hdr.used_by_curr_pic_lt.push(r.read_bit()?);
            }

            let delta_poc_msb_present_flag = r.read_bit()?;
            hdr.delta_poc_msb_present_flag.push(delta_poc_msb_present_flag);

            // The value of delta_poc_msb_cycle_lt[ i ] shall be in the range
            // of 0 to 2^(32 − log2_max_pic_order_cnt_lsb_minus4 − 4 ),
            // inclusive. When delta_poc_msb_cycle_lt[ i ] is not present, it
            // is inferred to be equal to 0.
            let delta_poc_msb_cycle_lt = if delta_poc_msb_present_flag {
                r.read_ue_max(1 << (32 - poc_lsb_bits))?
            } else {
                0
            };
            hdr.delta_poc_msb_cycle_lt.push(delta_poc_msb_cycle_lt);
        }

        Ok(())
    }

    fn parse_slice_header_data<R: Read>(
        r: &mut NaluReader<R>,
        nalu: &Nalu,
        spses: &BTreeMap<u8, Sps>,
        ppses: &BTreeMap<u8, Pps>,
    ) -> anyhow::Result<SliceHeader> {
        let nalu_type = nalu.header.type_;

        let mut hdr = SliceHeader {
            first_slice_segment_in_pic_flag: r.read_bit()?,
            ..Default::default()
        };

        if nalu_type.is_irap() {
            hdr.no_output_of_prior_pics_flag = r.read_bit()?;
        }

        hdr.pic_parameter_set_id = r.read_ue_max(u32::from(MAX_PPS_COUNT) - 1)?;

        let pps = ppses
            .get(&hdr.pic_parameter_set_id)
            .ok_or(ParseError::MissingParameterSet {
                kind: "PPS",
                id: hdr.pic_parameter_set_id,
            })?;

        let sps = spses
            .get(&pps.seq_parameter_set_id)
            .ok_or(ParseError::MissingParameterSet {
                kind: "SPS",
                id: pps.seq_parameter_set_id,
            })?;

        // Defaults that depend on the parameter sets.
        hdr.deblocking_filter_disabled_flag = pps.deblocking_filter_disabled_flag;
        hdr.beta_offset_div2 = pps.beta_offset_div2;
        hdr.tc_offset_div2 = pps.tc_offset_div2;
        hdr.loop_filter_across_slices_enabled_flag = pps.loop_filter_across_slices_enabled_flag;
        hdr.curr_rps_idx = sps.num_short_term_ref_pic_sets;
        hdr.use_integer_mv_flag = sps.scc_extension.motion_vector_resolution_control_idc != 0;

        if !hdr.first_slice_segment_in_pic_flag {
            if pps.dependent_slice_segments_enabled_flag {
                hdr.dependent_slice_segment_flag = r.read_bit()?;
            }

            let pic_size_in_ctbs_y = sps.pic_size_in_ctbs_y();
            hdr.segment_address = r.read_bits(ceil_log2(pic_size_in_ctbs_y))?;

            if hdr.segment_address >= pic_size_in_ctbs_y {
                return Err(anyhow!(
                    "Invalid slice_segment_address {}",
                    hdr.segment_address
                ));
            }
        }

        if !hdr.dependent_slice_segment_flag {
            for _ in 0..pps.num_extra_slice_header_bits {
                hdr.slice_reserved_flag.push(r.read_bit()?);
            }

            let slice_type: u8 = r.read_ue_max(2)?;
            hdr.type_ = SliceType::n(slice_type).ok_or(anyhow!("Invalid slice type"))?;

            if pps.output_flag_present_flag {
                hdr.pic_output_flag = r.read_bit()?;
            }

            if sps.separate_colour_plane_flag {
                hdr.colour_plane_id = r.read_bits(2)?;
            }

            if !nalu_type.is_idr() {
                let num_bits = usize::from(sps.log2_max_pic_order_cnt_lsb_minus4) + 4;
                hdr.pic_order_cnt_lsb = r.read_bits(num_bits)?;

                hdr.short_term_ref_pic_set_sps_flag = r.read_bit()?;

                if !hdr.short_term_ref_pic_set_sps_flag {
                    hdr.short_term_ref_pic_set = Parser::parse_short_term_ref_pic_set(
                        r,
                        sps.num_short_term_ref_pic_sets,
                        sps.num_short_term_ref_pic_sets,
                        &sps.short_term_ref_pic_set,
                        sps.max_dec_pic_buffering_minus1[usize::from(sps.max_sub_layers_minus1)],
                    )
                    .context("while parsing short-term RPS")?;
                } else {
                    if sps.num_short_term_ref_pic_sets == 0 {
                        return Err(anyhow!("SPS short-term RPS selected but the SPS has none"));
                    }

                    if sps.num_short_term_ref_pic_sets > 1 {
                        let num_bits = ceil_log2(u32::from(sps.num_short_term_ref_pic_sets));
                        hdr.short_term_ref_pic_set_idx = r.read_bits(num_bits)?;

                        if hdr.short_term_ref_pic_set_idx >= sps.num_short_term_ref_pic_sets {
                            return Err(anyhow!(
                                "Invalid short_term_ref_pic_set_idx {}",
                                hdr.short_term_ref_pic_set_idx
                            ));
                        }
                    }

                    hdr.curr_rps_idx = hdr.short_term_ref_pic_set_idx;
                }

                if sps.long_term_ref_pics_present_flag {
                    Parser::parse_long_term_pics(r, &mut hdr, sps)?;
                }

                if sps.temporal_mvp_enabled_flag {
                    hdr.temporal_mvp_enabled_flag = r.read_bit()?;
                }
            }

            if sps.sample_adaptive_offset_enabled_flag {
                hdr.sao_luma_flag = r.read_bit()?;
                if sps.chroma_array_type() != 0 {
                    hdr.sao_chroma_flag = r.read_bit()?;
                }
            }

            if hdr.type_.is_p() || hdr.type_.is_b() {
                hdr.num_ref_idx_active_override_flag = r.read_bit()?;
                if hdr.num_ref_idx_active_override_flag {
                    hdr.num_ref_idx_l0_active_minus1 = r.read_ue_max(MAX_REF_IDX_ACTIVE - 1)?;
                    if hdr.type_.is_b() {
                        hdr.num_ref_idx_l1_active_minus1 = r.read_ue_max(MAX_REF_IDX_ACTIVE - 1)?;
                    }
                } else {
                    hdr.num_ref_idx_l0_active_minus1 = pps.num_ref_idx_l0_default_active_minus1;
                    hdr.num_ref_idx_l1_active_minus1 = pps.num_ref_idx_l1_default_active_minus1;
                }

                // (7-55)
                let rps = hdr
                    .curr_short_term_ref_pic_set(sps)
                    .ok_or(anyhow!("Invalid RPS"))?;
                let mut num_pic_total_curr = rps.num_used_by_curr_pic();
                num_pic_total_curr +=
                    hdr.used_by_curr_pic_lt.iter().filter(|used| **used).count() as u32;
                if pps.scc_extension.curr_pic_ref_enabled_flag {
                    num_pic_total_curr += 1;
                }

                hdr.num_pic_total_curr = num_pic_total_curr;

                if pps.lists_modification_present_flag && hdr.num_pic_total_curr > 1 {
                    Parser::parse_ref_pic_lists_modification(r, &mut hdr)?;
                }

                if hdr.type_.is_b() {
                    hdr.mvd_l1_zero_flag = r.read_bit()?;
                }

                if pps.cabac_init_present_flag {
                    hdr.cabac_init_flag = r.read_bit()?;
                }

                if hdr.temporal_mvp_enabled_flag {
                    if hdr.type_.is_b() {
                        hdr.collocated_from_l0_flag = r.read_bit()?;
                    }

                    let max = if hdr.collocated_from_l0_flag {
                        hdr.num_ref_idx_l0_active_minus1
                    } else {
                        hdr.num_ref_idx_l1_active_minus1
                    };

                    if max > 0 {
                        hdr.collocated_ref_idx = r.read_ue_max(u32::from(max))?;
                    }
                }

                if (pps.weighted_pred_flag && hdr.type_.is_p())
                    || (pps.weighted_bipred_flag && hdr.type_.is_b())
                {
                    let pwt = Parser::parse_pred_weight_table(r, &hdr, sps)
                        .context("while parsing prediction weight table")?;
                    hdr.pred_weight_table = Some(pwt);
                }

                hdr.five_minus_max_num_merge_cand = r.read_ue_max(4)?;

                if sps.scc_extension.motion_vector_resolution_control_idc == 2 {
                    hdr.use_integer_mv_flag = r.read_bit()?;
                }
            }

            // SliceQpY = 26 + init_qp_minus26 + slice_qp_delta lies in
            // -QpBdOffsetY..=51, (7-54).
            let qp_bd_offset_y = 6 * i32::from(sps.bit_depth_luma_minus8);
            let init_qp = 26 + i32::from(pps.init_qp_minus26);
            hdr.qp_delta = r.read_se_bounded(-(init_qp + qp_bd_offset_y), 51 - init_qp)?;

            if pps.slice_chroma_qp_offsets_present_flag {
                hdr.cb_qp_offset = r.read_se_bounded(-12, 12)?;

                let qp_offset = pps.cb_qp_offset + hdr.cb_qp_offset;
                if !(-12..=12).contains(&qp_offset) {
                    return Err(anyhow!(
                        "Invalid value for slice_cb_qp_offset: {}",
                        hdr.cb_qp_offset
                    ));
                }

                hdr.cr_qp_offset = r.read_se_bounded(-12, 12)?;

                let qp_offset = pps.cr_qp_offset + hdr.cr_qp_offset;
                if !(-12..=12).contains(&qp_offset) {
                    return Err(anyhow!(
                        "Invalid value for slice_cr_qp_offset: {}",
                        hdr.cr_qp_offset
                    ));
                }
            }

            if pps.scc_extension.slice_act_qp_offsets_present_flag {
                hdr.slice_act_y_qp_offset = r.read_se_bounded(-12, 12)?;
                hdr.slice_act_cb_qp_offset = r.read_se_bounded(-12, 12)?;
                hdr.slice_act_cr_qp_offset = r.read_se_bounded(-12, 12)?;
            }

            if pps.range_extension.chroma_qp_offset_list_enabled_flag {
                hdr.cu_chroma_qp_offset_enabled_flag = r.read_bit()?;
            }

            if pps.deblocking_filter_override_enabled_flag {
                hdr.deblocking_filter_override_flag = r.read_bit()?;
            }

            if hdr.deblocking_filter_override_flag {
                hdr.deblocking_filter_disabled_flag = r.read_bit()?;
                if !hdr.deblocking_filter_disabled_flag {
                    hdr.beta_offset_div2 = r.read_se_bounded(-6, 6)?;
                    hdr.tc_offset_div2 = r.read_se_bounded(-6, 6)?;
                }
            }

            if pps.loop_filter_across_slices_enabled_flag
                && (hdr.sao_luma_flag
                    || hdr.sao_chroma_flag
                    || !hdr.deblocking_filter_disabled_flag)
            {
                hdr.loop_filter_across_slices_enabled_flag = r.read_bit()?;
            }
        }

        if pps.tiles_enabled_flag || pps.entropy_coding_sync_enabled_flag {
            let num_tile_columns = u32::from(pps.num_tile_columns_minus1) + 1;
            let num_tile_rows = u32::from(pps.num_tile_rows_minus1) + 1;

            let max = if !pps.tiles_enabled_flag {
                sps.pic_height_in_ctbs_y() - 1
            } else if !pps.entropy_coding_sync_enabled_flag {
                num_tile_columns * num_tile_rows - 1
            } else {
                num_tile_columns * sps.pic_height_in_ctbs_y() - 1
            };

            hdr.num_entry_point_offsets = r.read_ue_max(max)?;
            if hdr.num_entry_point_offsets > 0 {
                hdr.offset_len_minus1 = r.read_ue_max(31)?;
                let num_bits = usize::from(hdr.offset_len_minus1) + 1;
                for _ in 0..hdr.num_entry_point_offsets {
                    hdr.entry_point_offset_minus1.push(r.read_bits(num_bits)?);
                }
            }
        }

        if pps.slice_segment_header_extension_present_flag {
            hdr.segment_header_extension_length = r.read_ue_max(256)?;
            for _ in 0..hdr.segment_header_extension_length {
                hdr.segment_header_extension_data_byte.push(r.read_bits(8)?);
            }
        }

        r.byte_alignment()?;

        let header_len = nalu.header.len();
        hdr.header_bit_size = header_len * 8 + r.num_bits_read();
        hdr.n_emulation_prevention_bytes = r.num_epb();
        hdr.size = header_len + r.num_bytes_read();

        Ok(hdr)
    }
}

/// Types of the NAL units of a sample, in order. Empty units are skipped.
pub fn find_nalu_types<'a, I>(nalus: I) -> Vec<NaluType>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    nalus
        .into_iter()
        .filter_map(|nalu| nalu.first())
        .map(|byte| NaluType::from_header_byte(*byte))
        .collect()
}

/// Like [`find_nalu_types`] but stops after the first VCL unit, which is
/// included.
pub fn find_nalu_types_up_to_first_video_nalu<'a, I>(nalus: I) -> Vec<NaluType>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut types = Vec::new();

    for type_ in find_nalu_types(nalus) {
        types.push(type_);
        if type_.is_video() {
            break;
        }
    }

    types
}

pub fn contains_nalu_type<'a, I>(nalus: I, type_: NaluType) -> bool
where
    I: IntoIterator<Item = &'a [u8]>,
{
    find_nalu_types(nalus).contains(&type_)
}

/// Whether a sample holds an IDR picture.
pub fn is_idr_sample<'a, I>(nalus: I) -> bool
where
    I: IntoIterator<Item = &'a [u8]>,
{
    find_nalu_types(nalus).iter().any(NaluType::is_idr)
}

/// Whether decoding can start at this sample, i.e. whether it holds an IRAP
/// picture (BLA, IDR or CRA).
pub fn is_rap_sample<'a, I>(nalus: I) -> bool
where
    I: IntoIterator<Item = &'a [u8]>,
{
    find_nalu_types(nalus).iter().any(NaluType::is_irap)
}

/// Whether a sample carries a VPS, a SPS and a PPS.
pub fn has_parameter_sets<'a, I>(nalus: I) -> bool
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let types = find_nalu_types(nalus);
    [NaluType::VpsNut, NaluType::SpsNut, NaluType::PpsNut]
        .iter()
        .all(|type_| types.contains(type_))
}

/// Parameter set NAL units of a sample, header included.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParameterSets<'a> {
    pub vps: Vec<&'a [u8]>,
    pub sps: Vec<&'a [u8]>,
    pub pps: Vec<&'a [u8]>,
}

pub fn get_parameter_sets<'a, I>(nalus: I) -> ParameterSets<'a>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut sets = ParameterSets::default();

    for nalu in nalus {
        match nalu.first().map(|byte| NaluType::from_header_byte(*byte)) {
            Some(NaluType::VpsNut) => sets.vps.push(nalu),
            Some(NaluType::SpsNut) => sets.sps.push(nalu),
            Some(NaluType::PpsNut) => sets.pps.push(nalu),
            _ => (),
        }
    }

    sets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::nalu::LengthPrefixedIterator;
    use crate::utils::nalu::NalIterator;
    use crate::utils::nalu_reader::ReadBitsError;

    fn from_hex(hex: &str) -> Vec<u8> {
        (0..hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).unwrap())
            .collect()
    }

    fn annexb(units: &[&[u8]]) -> Vec<u8> {
        let mut stream = Vec::new();
        for unit in units {
            stream.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]);
            stream.extend_from_slice(unit);
        }
        stream
    }

    /// Main profile, level 3.1, with 1001/60000 timing and one NAL HRD.
    const VPS_MAIN: &str = "40010c01ffff01600000030090000003000003005d95c0c00000fa40003a980b08ef7bf007d2007d12";
    /// 64x64 coded, 64x56 visible, 16x16 CTBs and two short-term RPSs, the
    /// second one predicted from the first.
    const SPS_MAIN: &str = "42010101600000030090000003000003005da0208107cb9657ab499a7aafcb20";
    /// PPS 0: weighted prediction and wavefronts.
    const PPS_WAVEFRONT: &str = "4401c172b46240";
    /// PPS 1: 2x2 uniform tiles, dependent slices, list modification, slice
    /// header extension and a range extension with chroma QP offset lists.
    const PPS_TILES: &str = "44015cb9135525726ae012910a2457";
    /// IDR_N_LP I slice over `PPS_WAVEFRONT`.
    const SLICE_IDR: &str = "2801ef1d44c8";
    /// TRAIL_R P slice over `PPS_WAVEFRONT`, using the second SPS RPS and a
    /// weight table.
    const SLICE_P: &str = "0201d02fc21a28149c30cf62193220";
    /// TRAIL_N B slice over `PPS_TILES`, with its own inter predicted RPS.
    const SLICE_B: &str = "000122e09514ba96647c1859102ac72105362a32c7ceaf36";
    /// Dependent slice segment over `PPS_TILES`.
    const SLICE_DEPENDENT: &str = "00012b70";

    fn parameter_sets(ppses: &[&str]) -> (BTreeMap<u8, Sps>, BTreeMap<u8, Pps>) {
        let parser = Parser::default();

        let sps_data = from_hex(SPS_MAIN);
        let sps = parser.parse_sps(&Nalu::from_unit(&sps_data).unwrap()).unwrap();
        let mut spses = BTreeMap::new();
        spses.insert(sps.seq_parameter_set_id, sps);

        let mut pps_map = BTreeMap::new();
        for pps in ppses {
            let pps_data = from_hex(pps);
            let pps = parser
                .parse_pps(&Nalu::from_unit(&pps_data).unwrap(), Some(&spses))
                .unwrap();
            pps_map.insert(pps.pic_parameter_set_id, pps);
        }

        (spses, pps_map)
    }

    fn parse_slice(slice: &str) -> anyhow::Result<SliceHeader> {
        let (spses, ppses) = parameter_sets(&[PPS_WAVEFRONT, PPS_TILES]);
        let data = from_hex(slice);
        Parser::default().parse_slice_header(&Nalu::from_unit(&data).unwrap(), &spses, &ppses)
    }

    #[test]
    fn nalu_header() {
        let header = NaluHeader::parse(&Cursor::new([0x40, 0x01])).unwrap();
        assert_eq!(header.type_, NaluType::VpsNut);
        assert_eq!(header.nuh_layer_id, 0);
        assert_eq!(header.nuh_temporal_id_plus1, 1);
        assert_eq!(header.temporal_id(), 0);
        assert_eq!(header.len(), 2);

        let header = NaluHeader::parse(&Cursor::new([0x48, 0x03])).unwrap();
        assert_eq!(header.type_, NaluType::EosNut);
        assert_eq!(header.temporal_id(), 2);
        assert!(header.is_end());

        assert!(NaluHeader::parse(&Cursor::new([0x40])).is_err());
    }

    #[test]
    fn nalu_type_classification() {
        assert!(NaluType::TrailN.is_video());
        assert!(NaluType::TrailR.is_video());
        assert!(NaluType::IdrWRadl.is_video());
        assert!(NaluType::RsvVcl31.is_video());
        assert!(!NaluType::VpsNut.is_video());
        assert!(!NaluType::SpsNut.is_video());

        assert!(NaluType::BlaWLp.is_irap());
        assert!(NaluType::CraNut.is_irap());
        assert!(NaluType::RsvIrapVcl23.is_irap());
        assert!(!NaluType::RsvVcl24.is_irap());
        assert!(NaluType::IdrNLp.is_idr());
        assert!(!NaluType::CraNut.is_idr());
        assert!(NaluType::RaslN.is_rasl());
        assert!(NaluType::RadlR.is_radl());
        assert!(NaluType::BlaNLp.is_bla());

        assert!(NaluType::TrailN.is_slnr());
        assert!(NaluType::RsvVclN14.is_slnr());
        assert!(!NaluType::TrailR.is_slnr());
        assert!(!NaluType::BlaWLp.is_slnr());

        assert_eq!(NaluType::from_header_byte(0x40), NaluType::VpsNut);
        assert_eq!(NaluType::from_header_byte(0x26), NaluType::IdrWRadl);
        assert_eq!(NaluType::from_header_byte(0xfe), NaluType::Unspec63);
    }

    #[test]
    fn sample_helpers() {
        let sample = [0, 0, 0, 2, 70, 0];
        assert_eq!(
            find_nalu_types(LengthPrefixedIterator::new(&sample)),
            vec![NaluType::AudNut]
        );

        let sample = [
            0, 0, 0, 2, 70, 0, 0, 0, 0, 3, 64, 1, 1, 0, 0, 0, 3, 66, 2, 2, 0, 0, 0, 3, 68, 3, 3, 0,
            0, 0, 3, 40, 4, 4,
        ];
        assert_eq!(
            find_nalu_types(LengthPrefixedIterator::new(&sample)),
            vec![
                NaluType::AudNut,
                NaluType::VpsNut,
                NaluType::SpsNut,
                NaluType::PpsNut,
                NaluType::IdrNLp
            ]
        );
        assert!(contains_nalu_type(
            LengthPrefixedIterator::new(&sample),
            NaluType::VpsNut
        ));
        assert!(is_rap_sample(LengthPrefixedIterator::new(&sample)));
        assert!(is_idr_sample(LengthPrefixedIterator::new(&sample)));
        assert!(has_parameter_sets(LengthPrefixedIterator::new(&sample)));

        let sets = get_parameter_sets(LengthPrefixedIterator::new(&sample));
        assert_eq!(sets.vps, vec![&[64u8, 1, 1][..]]);
        assert_eq!(sets.sps, vec![&[66u8, 2, 2][..]]);
        assert_eq!(sets.pps, vec![&[68u8, 3, 3][..]]);

        assert!(find_nalu_types(LengthPrefixedIterator::new(&[0, 0, 0])).is_empty());
    }

    #[test]
    fn cra_sample_is_rap_but_not_idr() {
        // AUD, CRA, TRAIL_R.
        let sample = [0, 0, 0, 2, 70, 0, 0, 0, 0, 2, 42, 1, 0, 0, 0, 2, 2, 1];

        assert!(is_rap_sample(LengthPrefixedIterator::new(&sample)));
        assert!(!is_idr_sample(LengthPrefixedIterator::new(&sample)));
        assert!(!has_parameter_sets(LengthPrefixedIterator::new(&sample)));
        assert_eq!(
            find_nalu_types_up_to_first_video_nalu(LengthPrefixedIterator::new(&sample)),
            vec![NaluType::AudNut, NaluType::CraNut]
        );
    }

    #[test]
    fn parse_vps() {
        let data = from_hex(VPS_MAIN);
        let vps = Parser::default()
            .parse_vps(&Nalu::from_unit(&data).unwrap())
            .unwrap();

        assert_eq!(vps.video_parameter_set_id, 0);
        assert!(vps.base_layer_internal_flag);
        assert!(vps.base_layer_available_flag);
        assert_eq!(vps.max_layers_minus1, 0);
        assert_eq!(vps.max_sub_layers_minus1, 0);
        assert!(vps.temporal_id_nesting_flag);

        let ptl = &vps.profile_tier_level;
        assert_eq!(ptl.profile(), Some(Profile::Main));
        assert_eq!(ptl.level(), Some(Level::L3_1));
        assert!(ptl.general_profile_compatibility_flag[1]);
        assert!(ptl.general_profile_compatibility_flag[2]);
        assert!(ptl.general_progressive_source_flag);
        assert!(ptl.general_frame_only_constraint_flag);

        assert!(vps.sub_layer_ordering_info_present_flag);
        assert_eq!(vps.max_dec_pic_buffering_minus1[0], 4);
        assert_eq!(vps.max_num_reorder_pics[0], 2);
        assert_eq!(vps.max_latency_increase_plus1[0], 0);
        assert_eq!(vps.num_layer_sets_minus1, 0);

        assert!(vps.timing_info_present_flag);
        assert_eq!(vps.num_units_in_tick, 1001);
        assert_eq!(vps.time_scale, 60000);
        assert!(!vps.poc_proportional_to_timing_flag);

        assert_eq!(vps.num_hrd_parameters, 1);
        assert_eq!(vps.hrd_layer_set_idx, vec![0]);
        assert_eq!(vps.cprms_present_flag, vec![true]);

        let hrd = &vps.hrd_parameters[0];
        assert!(hrd.nal_hrd_parameters_present_flag);
        assert!(!hrd.vcl_hrd_parameters_present_flag);
        assert_eq!(hrd.bit_rate_scale, 2);
        assert_eq!(hrd.cpb_size_scale, 3);
        assert!(hrd.fixed_pic_rate_general_flag[0]);
        assert!(hrd.fixed_pic_rate_within_cvs_flag[0]);
        assert_eq!(hrd.cpb_cnt_minus1[0], 0);
        assert_eq!(hrd.nal_hrd[0].bit_rate_value_minus1[0], 1000);
        assert_eq!(hrd.nal_hrd[0].cpb_size_value_minus1[0], 2000);
        assert!(!hrd.nal_hrd[0].cbr_flag[0]);

        assert!(!vps.extension_flag);
    }

    #[test]
    fn parse_sps() {
        let data = from_hex(SPS_MAIN);
        let sps = Parser::default()
            .parse_sps(&Nalu::from_unit(&data).unwrap())
            .unwrap();

        assert_eq!(sps.video_parameter_set_id, 0);
        assert_eq!(sps.seq_parameter_set_id, 0);
        assert_eq!(sps.profile_tier_level.profile(), Some(Profile::Main));
        assert_eq!(sps.chroma_format_idc, 1);
        assert_eq!(sps.chroma_array_type(), 1);
        assert_eq!(sps.width(), 64);
        assert_eq!(sps.height(), 64);
        assert_eq!(
            sps.visible_rectangle(),
            Rect {
                min: Point { x: 0, y: 0 },
                max: Point { x: 64, y: 56 },
            }
        );

        assert_eq!(sps.log2_max_pic_order_cnt_lsb_minus4, 4);
        assert_eq!(sps.max_pic_order_cnt_lsb(), 256);
        assert_eq!(sps.max_dec_pic_buffering_minus1[0], 4);
        assert_eq!(sps.max_num_reorder_pics[0], 2);
        assert_eq!(sps.max_dpb_size(), 5);

        assert_eq!(sps.min_cb_log2_size_y(), 3);
        assert_eq!(sps.ctb_log2_size_y(), 4);
        assert_eq!(sps.ctb_size_y(), 16);
        assert_eq!(sps.pic_width_in_ctbs_y(), 4);
        assert_eq!(sps.pic_height_in_ctbs_y(), 4);
        assert_eq!(sps.pic_size_in_ctbs_y(), 16);
        assert_eq!(sps.max_tb_log2_size_y(), 4);
        assert_eq!(sps.max_transform_hierarchy_depth_inter, 1);
        assert_eq!(sps.max_transform_hierarchy_depth_intra, 1);

        assert!(!sps.scaling_list_enabled_flag);
        assert_eq!(sps.scaling_list, ScalingLists::default());
        assert!(sps.amp_enabled_flag);
        assert!(sps.sample_adaptive_offset_enabled_flag);
        assert!(!sps.pcm_enabled_flag);

        assert_eq!(sps.num_short_term_ref_pic_sets, 2);

        let st = &sps.short_term_ref_pic_set[0];
        assert!(!st.inter_ref_pic_set_prediction_flag);
        assert_eq!(st.delta_poc_s0, vec![-1]);
        assert_eq!(st.used_by_curr_pic_s0, vec![true]);
        assert_eq!(st.delta_poc_s1, vec![2, 4]);
        assert_eq!(st.used_by_curr_pic_s1, vec![true, true]);
        assert_eq!(st.num_delta_pocs, 3);

        // Predicted from set 0 with deltaRps = -1, dropping POC +3.
        let st = &sps.short_term_ref_pic_set[1];
        assert!(st.inter_ref_pic_set_prediction_flag);
        assert!(st.delta_rps_sign);
        assert_eq!(st.abs_delta_rps_minus1, 0);
        assert_eq!(st.used_by_curr_pic_flag, vec![true, true, false, true]);
        assert_eq!(st.use_delta_flag, vec![true, true, false, true]);
        assert_eq!(st.delta_poc_s0, vec![-1, -2]);
        assert_eq!(st.used_by_curr_pic_s0, vec![true, true]);
        assert_eq!(st.delta_poc_s1, vec![1]);
        assert_eq!(st.used_by_curr_pic_s1, vec![true]);
        assert_eq!(st.num_negative_pics, 2);
        assert_eq!(st.num_positive_pics, 1);
        assert_eq!(st.num_delta_pocs, 3);

        assert!(!sps.long_term_ref_pics_present_flag);
        assert!(sps.temporal_mvp_enabled_flag);
        assert!(sps.strong_intra_smoothing_enabled_flag);
        assert!(!sps.vui_parameters_present_flag);
        assert!(!sps.extension_present_flag);
    }

    #[test]
    fn parse_pps_wavefront() {
        let (_, ppses) = parameter_sets(&[PPS_WAVEFRONT]);
        let pps = &ppses[&0];

        assert_eq!(pps.seq_parameter_set_id, 0);
        assert!(pps.sign_data_hiding_enabled_flag);
        assert!(pps.cu_qp_delta_enabled_flag);
        assert_eq!(pps.diff_cu_qp_delta_depth, 1);
        assert_eq!(pps.init_qp_minus26, 0);
        assert!(pps.weighted_pred_flag);
        assert!(!pps.weighted_bipred_flag);
        assert!(!pps.tiles_enabled_flag);
        assert!(pps.entropy_coding_sync_enabled_flag);
        assert!(pps.loop_filter_across_slices_enabled_flag);
        assert!(!pps.deblocking_filter_control_present_flag);
        assert!(!pps.extension_present_flag);
    }

    #[test]
    fn parse_pps_tiles() {
        let (spses, ppses) = parameter_sets(&[PPS_TILES]);
        let sps = &spses[&0];
        let pps = &ppses[&1];

        assert!(pps.dependent_slice_segments_enabled_flag);
        assert!(pps.output_flag_present_flag);
        assert_eq!(pps.num_extra_slice_header_bits, 1);
        assert!(pps.cabac_init_present_flag);
        assert_eq!(pps.init_qp_minus26, 2);
        assert!(pps.transform_skip_enabled_flag);
        assert_eq!(pps.cb_qp_offset, -1);
        assert_eq!(pps.cr_qp_offset, 1);
        assert!(pps.slice_chroma_qp_offsets_present_flag);
        assert!(pps.weighted_bipred_flag);

        assert!(pps.tiles_enabled_flag);
        assert_eq!(pps.num_tile_columns_minus1, 1);
        assert_eq!(pps.num_tile_rows_minus1, 1);
        assert!(pps.uniform_spacing_flag);
        assert!(pps.column_width_minus1.is_empty());
        assert_eq!(pps.tile_column_widths(sps), vec![2, 2]);
        assert_eq!(pps.tile_row_heights(sps), vec![2, 2]);
        assert!(!pps.loop_filter_across_tiles_enabled_flag);

        assert!(pps.deblocking_filter_control_present_flag);
        assert!(pps.deblocking_filter_override_enabled_flag);
        assert!(!pps.deblocking_filter_disabled_flag);
        assert_eq!(pps.beta_offset_div2, 1);
        assert_eq!(pps.tc_offset_div2, -1);

        assert!(pps.lists_modification_present_flag);
        assert_eq!(pps.log2_parallel_merge_level_minus2, 1);
        assert!(pps.slice_segment_header_extension_present_flag);

        assert!(pps.range_extension_flag);
        let rext = &pps.range_extension;
        assert_eq!(rext.log2_max_transform_skip_block_size_minus2, 1);
        assert!(rext.chroma_qp_offset_list_enabled_flag);
        assert_eq!(rext.diff_cu_chroma_qp_offset_depth, 1);
        assert_eq!(rext.chroma_qp_offset_list_len_minus1, 1);
        assert_eq!(rext.cb_qp_offset_list[..2], [2, -4]);
        assert_eq!(rext.cr_qp_offset_list[..2], [-2, 5]);
    }

    #[test]
    fn parse_pps_without_sps() {
        let data = from_hex("4401c0f7c0cc90");
        let nalu = Nalu::from_unit(&data).unwrap();

        let err = Parser::default().parse_pps(&nalu, None).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ParseError>(),
            Some(&ParseError::MissingParameterSet { kind: "SPS", id: 0 })
        );

        let parser = Parser::new(ParserOptions {
            allow_missing_sps: true,
        });
        let pps = parser.parse_pps(&nalu, None).unwrap();

        assert!(pps.cabac_init_present_flag);
        assert!(pps.transform_skip_enabled_flag);
        assert!(pps.cu_qp_delta_enabled_flag);
        assert_eq!(pps.diff_cu_qp_delta_depth, 0);
        assert!(pps.loop_filter_across_slices_enabled_flag);
        assert!(pps.deblocking_filter_control_present_flag);
        assert!(!pps.deblocking_filter_override_enabled_flag);
        assert_eq!(pps.scaling_list, ScalingLists::default());

        // diff_cu_qp_delta_depth of 3 needs 64x64 CTBs, accepted without a SPS.
        let data = from_hex("4401c1ac9383b240");
        let pps = parser
            .parse_pps(&Nalu::from_unit(&data).unwrap(), None)
            .unwrap();

        assert_eq!(pps.num_ref_idx_l0_default_active_minus1, 1);
        assert_eq!(pps.diff_cu_qp_delta_depth, 3);
        assert!(pps.deblocking_filter_override_enabled_flag);
        assert!(pps.slice_chroma_qp_offsets_present_flag);
    }

    #[test]
    fn parse_pps_without_sps_high_bit_depth() {
        // init_qp_minus26 of -38 is only legal from 10-bit luma on.
        let data = from_hex("4401c0e04d7c0cc9");
        let nalu = Nalu::from_unit(&data).unwrap();

        let (spses, _) = parameter_sets(&[]);
        let err = Parser::default().parse_pps(&nalu, Some(&spses)).unwrap_err();
        assert!(matches!(
            err.root_cause().downcast_ref::<ReadBitsError>(),
            Some(ReadBitsError::OutOfBounds { value: -38, .. })
        ));

        let pps = Parser::new(ParserOptions {
            allow_missing_sps: true,
        })
        .parse_pps(&nalu, None)
        .unwrap();
        assert_eq!(pps.init_qp_minus26, -38);
        assert!(pps.transform_skip_enabled_flag);
        assert!(pps.cu_qp_delta_enabled_flag);
        assert!(pps.deblocking_filter_control_present_flag);
    }

    #[test]
    fn parse_idr_slice_header() {
        let hdr = parse_slice(SLICE_IDR).unwrap();

        assert!(hdr.first_slice_segment_in_pic_flag);
        assert!(hdr.no_output_of_prior_pics_flag);
        assert_eq!(hdr.pic_parameter_set_id, 0);
        assert!(hdr.type_.is_i());
        assert!(hdr.pic_output_flag);
        assert_eq!(hdr.pic_order_cnt_lsb, 0);
        assert!(hdr.sao_luma_flag);
        assert!(hdr.sao_chroma_flag);
        assert_eq!(hdr.qp_delta, 7);
        assert!(hdr.loop_filter_across_slices_enabled_flag);
        assert_eq!(hdr.num_entry_point_offsets, 1);
        assert_eq!(hdr.offset_len_minus1, 3);
        assert_eq!(hdr.entry_point_offset_minus1, vec![12]);
        assert_eq!(hdr.pred_weight_table, None);

        assert_eq!(hdr.header_bit_size, 48);
        assert_eq!(hdr.n_emulation_prevention_bytes, 0);
        assert_eq!(hdr.size, 6);
    }

    #[test]
    fn slice_qp_delta_range() {
        // With init_qp_minus26 of 0 and 8-bit luma, SliceQpY = 26 + delta
        // must stay in 0..=51.
        assert_eq!(parse_slice("2801ef06544c80").unwrap().qp_delta, 25);
        assert_eq!(parse_slice("2801ef06b44c80").unwrap().qp_delta, -26);

        for slice in ["2801ef06944c80", "2801ef06f44c80", "2801ef0000030001fffffffd44c8"] {
            let err = parse_slice(slice).unwrap_err();
            assert!(matches!(
                err.root_cause().downcast_ref::<ReadBitsError>(),
                Some(ReadBitsError::OutOfBounds { .. })
            ));
        }
    }

    #[test]
    fn parse_p_slice_header() {
        let (spses, _) = parameter_sets(&[]);
        let hdr = parse_slice(SLICE_P).unwrap();

        assert!(hdr.type_.is_p());
        assert_eq!(hdr.pic_order_cnt_lsb, 5);
        assert!(hdr.short_term_ref_pic_set_sps_flag);
        assert_eq!(hdr.short_term_ref_pic_set_idx, 1);
        assert_eq!(hdr.curr_rps_idx, 1);
        assert_eq!(
            hdr.curr_short_term_ref_pic_set(&spses[&0]),
            Some(&spses[&0].short_term_ref_pic_set[1])
        );
        assert_eq!(hdr.num_pic_total_curr, 3);
        assert!(hdr.temporal_mvp_enabled_flag);
        assert!(!hdr.num_ref_idx_active_override_flag);
        assert_eq!(hdr.num_ref_idx_l0_active_minus1, 0);
        assert!(hdr.collocated_from_l0_flag);

        let pwt = hdr.pred_weight_table.as_ref().unwrap();
        assert_eq!(pwt.luma_log2_weight_denom, 7);
        assert_eq!(pwt.delta_chroma_log2_weight_denom, -1);
        assert_eq!(pwt.chroma_log2_weight_denom(), 6);
        assert_eq!(pwt.weights_l0.len(), 1);
        assert!(pwt.weights_l1.is_empty());
        assert_eq!(
            pwt.weights_l0[0],
            WeightingFactors {
                luma_weight_flag: false,
                chroma_weight_flag: true,
                delta_luma_weight: 0,
                luma_offset: 0,
                delta_chroma_weight: [5, -3],
                delta_chroma_offset: [-20, 12],
            }
        );

        assert_eq!(hdr.five_minus_max_num_merge_cand, 2);
        assert_eq!(hdr.qp_delta, -3);
        assert_eq!(hdr.entry_point_offset_minus1, vec![100, 200]);

        assert_eq!(hdr.header_bit_size, 120);
        assert_eq!(hdr.size, 15);
    }

    #[test]
    fn parse_b_slice_header() {
        let hdr = parse_slice(SLICE_B).unwrap();

        assert!(!hdr.first_slice_segment_in_pic_flag);
        assert!(!hdr.dependent_slice_segment_flag);
        assert_eq!(hdr.pic_parameter_set_id, 1);
        assert_eq!(hdr.segment_address, 5);
        assert_eq!(hdr.slice_reserved_flag, vec![true]);
        assert!(hdr.type_.is_b());
        assert!(!hdr.pic_output_flag);
        assert_eq!(hdr.pic_order_cnt_lsb, 9);

        // Predicted from SPS set 0 with deltaRps = +2.
        assert!(!hdr.short_term_ref_pic_set_sps_flag);
        assert_eq!(hdr.curr_rps_idx, 2);
        let st = &hdr.short_term_ref_pic_set;
        assert!(st.inter_ref_pic_set_prediction_flag);
        assert_eq!(st.delta_idx_minus1, 1);
        assert!(!st.delta_rps_sign);
        assert_eq!(st.abs_delta_rps_minus1, 1);
        assert!(st.delta_poc_s0.is_empty());
        assert_eq!(st.delta_poc_s1, vec![1, 2, 6]);
        assert_eq!(st.used_by_curr_pic_s1, vec![true, false, true]);
        assert_eq!(st.num_delta_pocs, 3);
        assert_eq!(hdr.num_pic_total_curr, 2);

        assert!(hdr.temporal_mvp_enabled_flag);
        assert!(hdr.sao_luma_flag);
        assert!(!hdr.sao_chroma_flag);
        assert!(hdr.num_ref_idx_active_override_flag);
        assert_eq!(hdr.num_ref_idx_l0_active_minus1, 1);
        assert_eq!(hdr.num_ref_idx_l1_active_minus1, 1);

        let rplm = &hdr.ref_pic_list_modification;
        assert!(rplm.ref_pic_list_modification_flag_l0);
        assert_eq!(rplm.list_entry_l0, vec![1, 0]);
        assert!(!rplm.ref_pic_list_modification_flag_l1);
        assert!(rplm.list_entry_l1.is_empty());

        assert!(hdr.mvd_l1_zero_flag);
        assert!(hdr.cabac_init_flag);
        assert!(!hdr.collocated_from_l0_flag);
        assert_eq!(hdr.collocated_ref_idx, 1);

        let pwt = hdr.pred_weight_table.as_ref().unwrap();
        assert_eq!(pwt.luma_log2_weight_denom, 6);
        assert_eq!(pwt.chroma_log2_weight_denom(), 6);
        assert_eq!(pwt.weights_l0.len(), 2);
        assert_eq!(pwt.weights_l1.len(), 2);
        assert!(pwt.weights_l0[0].luma_weight_flag);
        assert_eq!(pwt.weights_l0[0].delta_luma_weight, 3);
        assert_eq!(pwt.weights_l0[0].luma_offset, -5);
        assert_eq!(pwt.weights_l0[1], WeightingFactors::default());
        assert!(pwt.weights_l1[0].chroma_weight_flag);
        assert_eq!(pwt.weights_l1[0].delta_chroma_weight, [2, -1]);
        assert_eq!(pwt.weights_l1[0].delta_chroma_offset, [-10, 7]);

        assert_eq!(hdr.five_minus_max_num_merge_cand, 1);
        assert_eq!(hdr.qp_delta, 4);
        assert_eq!(hdr.cb_qp_offset, -2);
        assert_eq!(hdr.cr_qp_offset, 3);
        assert!(hdr.cu_chroma_qp_offset_enabled_flag);
        assert!(hdr.deblocking_filter_override_flag);
        assert!(!hdr.deblocking_filter_disabled_flag);
        assert_eq!(hdr.beta_offset_div2, -2);
        assert_eq!(hdr.tc_offset_div2, 1);
        assert!(!hdr.loop_filter_across_slices_enabled_flag);

        assert_eq!(hdr.num_entry_point_offsets, 2);
        assert_eq!(hdr.offset_len_minus1, 4);
        assert_eq!(hdr.entry_point_offset_minus1, vec![17, 30]);
        assert_eq!(hdr.segment_header_extension_length, 2);
        assert_eq!(hdr.segment_header_extension_data_byte, vec![0xab, 0xcd]);

        assert_eq!(hdr.header_bit_size, 192);
        assert_eq!(hdr.size, 24);
    }

    #[test]
    fn parse_dependent_slice_segment() {
        let hdr = parse_slice(SLICE_DEPENDENT).unwrap();

        assert!(hdr.dependent_slice_segment_flag);
        assert_eq!(hdr.pic_parameter_set_id, 1);
        assert_eq!(hdr.segment_address, 6);
        assert_eq!(hdr.num_entry_point_offsets, 0);
        assert_eq!(hdr.segment_header_extension_length, 0);
        // Not coded, inherited from the PPS.
        assert!(hdr.loop_filter_across_slices_enabled_flag);
        assert_eq!(hdr.beta_offset_div2, 1);
        assert_eq!(hdr.tc_offset_div2, -1);

        assert_eq!(hdr.header_bit_size, 32);
        assert_eq!(hdr.size, 4);
    }

    #[test]
    fn parse_annexb_stream() {
        let _ = env_logger::try_init();

        let units: Vec<Vec<u8>> = [VPS_MAIN, SPS_MAIN, PPS_WAVEFRONT, SLICE_IDR]
            .iter()
            .map(|hex| from_hex(hex))
            .collect();
        let refs: Vec<&[u8]> = units.iter().map(|unit| unit.as_slice()).collect();
        let stream = annexb(&refs);

        let parser = Parser::default();
        let mut spses = BTreeMap::new();
        let mut ppses = BTreeMap::new();
        let mut types = Vec::new();
        let mut slices = Vec::new();

        for nalu in NalIterator::<NaluHeader>::new(&stream) {
            types.push(nalu.header.type_);
            match nalu.header.type_ {
                NaluType::VpsNut => {
                    parser.parse_vps(&nalu).unwrap();
                }
                NaluType::SpsNut => {
                    let sps = parser.parse_sps(&nalu).unwrap();
                    spses.insert(sps.seq_parameter_set_id, sps);
                }
                NaluType::PpsNut => {
                    let pps = parser.parse_pps(&nalu, Some(&spses)).unwrap();
                    ppses.insert(pps.pic_parameter_set_id, pps);
                }
                _ => slices.push(parser.parse_slice_header(&nalu, &spses, &ppses).unwrap()),
            }
        }

        assert_eq!(
            types,
            vec![
                NaluType::VpsNut,
                NaluType::SpsNut,
                NaluType::PpsNut,
                NaluType::IdrNLp
            ]
        );
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].size, 6);
    }

    #[test]
    fn missing_parameter_sets() {
        let data = from_hex(SLICE_IDR);
        let nalu = Nalu::from_unit(&data).unwrap();

        let err = Parser::default()
            .parse_slice_header(&nalu, &BTreeMap::new(), &BTreeMap::new())
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<ParseError>(),
            Some(&ParseError::MissingParameterSet { kind: "PPS", id: 0 })
        );

        let (_, ppses) = parameter_sets(&[PPS_WAVEFRONT]);
        let err = Parser::default()
            .parse_slice_header(&nalu, &BTreeMap::new(), &ppses)
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<ParseError>(),
            Some(&ParseError::MissingParameterSet { kind: "SPS", id: 0 })
        );
    }

    #[test]
    fn unexpected_nalu_type() {
        let data = from_hex(VPS_MAIN);
        let nalu = Nalu::from_unit(&data).unwrap();
        let parser = Parser::default();

        let err = parser.parse_sps(&nalu).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ParseError>(),
            Some(&ParseError::UnexpectedNaluType {
                expected: "SPS",
                found: 32
            })
        );

        let err = parser
            .parse_slice_header(&nalu, &BTreeMap::new(), &BTreeMap::new())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ParseError>(),
            Some(ParseError::UnexpectedNaluType { found: 32, .. })
        ));
    }

    #[test]
    fn truncated_sps() {
        let data = from_hex(SPS_MAIN);
        let err = Parser::default()
            .parse_sps(&Nalu::from_unit(&data[..10]).unwrap())
            .unwrap_err();

        assert_eq!(
            err.downcast_ref::<ReadBitsError>(),
            Some(&ReadBitsError::OutOfBits)
        );
    }

    #[test]
    fn default_scaling_lists() {
        let sl = ScalingLists::from_default_tables();

        assert_eq!(sl.list(0, 0), &DEFAULT_SCALING_LIST_0[..]);
        assert_eq!(sl.list(1, 0), &DEFAULT_SCALING_LIST_1[..]);
        assert_eq!(sl.list(1, 3), &DEFAULT_SCALING_LIST_2[..]);
        assert_eq!(sl.list(3, 3), &DEFAULT_SCALING_LIST_2[..]);
        assert_eq!(sl.dc_coef_minus8(2, 1), 8);
        assert_eq!(sl.dc_coef_minus8(3, 0), 8);
    }
}
