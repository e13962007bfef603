// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! H.264 NAL unit classification, parameter set and slice header parsing.
//!
//! Parameter sets are returned by value. Callers keep them in their own
//! `BTreeMap`s keyed by id and hand those maps back when parsing units that
//! refer to them; the [`Parser`] itself keeps no state.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::io::Read;

use anyhow::anyhow;
use anyhow::Context;
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

/// Table 7-3, Default_4x4_Intra.
pub(super) const DEFAULT_4X4_INTRA: [u8; 16] = [
    6, 13, 13, 20, 20, 20, 28, 28, 28, 28, 32, 32, 32, 37, 37, 42,
];

/// Table 7-3, Default_4x4_Inter.
pub(super) const DEFAULT_4X4_INTER: [u8; 16] = [
    10, 14, 14, 20, 20, 20, 24, 24, 24, 24, 27, 27, 27, 30, 30, 34,
];

/// Table 7-4, Default_8x8_Intra.
pub(super) const DEFAULT_8X8_INTRA: [u8; 64] = [
    6, 10, 10, 13, 11, 13, 16, 16, 16, 16, 18, 18, 18, 18, 18, 23, 23, 23, 23, 23, 23, 25, 25, 25,
    25, 25, 25, 25, 27, 27, 27, 27, 27, 27, 27, 27, 29, 29, 29, 29, 29, 29, 29, 31, 31, 31, 31, 31,
    31, 33, 33, 33, 33, 33, 36, 36, 36, 36, 38, 38, 38, 40, 40, 42,
];

/// Table 7-4, Default_8x8_Inter.
pub(super) const DEFAULT_8X8_INTER: [u8; 64] = [
    9, 13, 13, 15, 13, 15, 17, 17, 17, 17, 19, 19, 19, 19, 19, 21, 21, 21, 21, 21, 21, 22, 22, 22,
    22, 22, 22, 22, 24, 24, 24, 24, 24, 24, 24, 24, 25, 25, 25, 25, 25, 25, 25, 27, 27, 27, 27, 27,
    27, 28, 28, 28, 28, 28, 30, 30, 30, 30, 32, 32, 32, 33, 33, 35,
];

const MAX_PPS_COUNT: u16 = 256;
const MAX_SPS_COUNT: u8 = 32;

/// MaxDpbFrames ceiling, A.3.1 h).
const DPB_MAX_SIZE: usize = 16;

/// Table 7-1. Every 5-bit value has a variant so that classification never
/// fails.
#[derive(N, Debug, PartialEq, Eq, Clone, Copy, PartialOrd, Ord, Hash)]
pub enum NaluType {
    Unknown = 0,
    Slice = 1,
    SliceDpa = 2,
    SliceDpb = 3,
    SliceDpc = 4,
    SliceIdr = 5,
    Sei = 6,
    Sps = 7,
    Pps = 8,
    AuDelimiter = 9,
    SeqEnd = 10,
    StreamEnd = 11,
    FillerData = 12,
    SpsExt = 13,
    PrefixUnit = 14,
    SubsetSps = 15,
    DepthSps = 16,
    Reserved17 = 17,
    Reserved18 = 18,
    SliceAux = 19,
    SliceExt = 20,
    SliceDepth = 21,
    Reserved22 = 22,
    Reserved23 = 23,
    Unspecified24 = 24,
    Unspecified25 = 25,
    Unspecified26 = 26,
    Unspecified27 = 27,
    Unspecified28 = 28,
    Unspecified29 = 29,
    Unspecified30 = 30,
    Unspecified31 = 31,
}

impl NaluType {
    /// Extracts `nal_unit_type` from the first byte of a NAL unit header.
    pub fn from_header_byte(byte: u8) -> Self {
        NaluType::n(byte & 0x1f).unwrap_or(NaluType::Unknown)
    }

    /// Whether this is one of the coded slice types of the primary coded
    /// picture, i.e. types 1 to 5.
    pub fn is_video(&self) -> bool {
        (NaluType::Slice..=NaluType::SliceIdr).contains(self)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RefPicListModification {
    pub modification_of_pic_nums_idc: u8,
    /* if modification_of_pic_nums_idc == 0 || 1 */
    pub abs_diff_pic_num_minus1: u32,
    /* if modification_of_pic_nums_idc == 2 */
    pub long_term_pic_num: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PredWeightTable {
    pub luma_log2_weight_denom: u8,
    pub chroma_log2_weight_denom: u8,

    pub luma_weight_l0: [i16; 32],
    pub luma_offset_l0: [i8; 32],

    /* if seq->ChromaArrayType != 0 */
    pub chroma_weight_l0: [[i16; 2]; 32],
    pub chroma_offset_l0: [[i8; 2]; 32],

    /* if slice->slice_type % 5 == 1 */
    pub luma_weight_l1: [i16; 32],
    pub luma_offset_l1: [i8; 32],

    /* and if seq->ChromaArrayType != 0 */
    pub chroma_weight_l1: [[i16; 2]; 32],
    pub chroma_offset_l1: [[i8; 2]; 32],
}

/// `MaxLongTermFrameIdx`, where a coded `max_long_term_frame_idx_plus1` of 0
/// stands for "no long-term frame indices".
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxLongTermFrameIdx {
    #[default]
    NoLongTermFrameIndices,
    Idx(u32),
}

impl MaxLongTermFrameIdx {
    pub fn from_value_plus1(max_long_term_frame_idx_plus1: u32) -> Self {
        match max_long_term_frame_idx_plus1 {
            0 => Self::NoLongTermFrameIndices,
            i @ 1.. => Self::Idx(i - 1),
        }
    }

    /// The coded `max_long_term_frame_idx_plus1`.
    pub fn to_value_plus1(self) -> u32 {
        match self {
            Self::NoLongTermFrameIndices => 0,
            Self::Idx(i) => i + 1,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RefPicMarkingInner {
    /// Table 7-9. The fields below are only coded for some operations.
    pub memory_management_control_operation: u8,
    /// Operations 1 and 3.
    pub difference_of_pic_nums_minus1: u32,
    /// Operation 2.
    pub long_term_pic_num: u32,
    /// Operations 3 and 6.
    pub long_term_frame_idx: u32,
    /// Operation 4.
    pub max_long_term_frame_idx: MaxLongTermFrameIdx,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RefPicMarking {
    /// IDR pictures only.
    pub no_output_of_prior_pics_flag: bool,
    /// IDR pictures only.
    pub long_term_reference_flag: bool,

    /// Non-IDR pictures: sliding window when unset, `inner` otherwise.
    pub adaptive_ref_pic_marking_mode_flag: bool,

    /// The memory management control operations, terminating operation 0
    /// excluded.
    pub inner: Vec<RefPicMarkingInner>,
}

#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq)]
/// See table 7-6 of H.264.
pub enum SliceType {
    #[default]
    P = 0,
    B = 1,
    I = 2,
    Sp = 3,
    Si = 4,
}

impl SliceType {
    /// Maps a coded `slice_type` (0 to 9) to its base type. Values from 5
    /// upwards additionally signal that all slices of the picture share that
    /// type.
    pub fn from_slice_type(slice_type: u8) -> Option<Self> {
        SliceType::n(slice_type % 5)
    }

    /// Whether this is a P slice. See table 7-6 of H.264.
    pub fn is_p(&self) -> bool {
        matches!(self, SliceType::P)
    }

    /// Whether this is a B slice. See table 7-6 of H.264.
    pub fn is_b(&self) -> bool {
        matches!(self, SliceType::B)
    }

    /// Whether this is an I slice. See table 7-6 of H.264.
    pub fn is_i(&self) -> bool {
        matches!(self, SliceType::I)
    }

    /// Whether this is a SP slice. See table 7-6 of H.264.
    pub fn is_sp(&self) -> bool {
        matches!(self, SliceType::Sp)
    }

    /// Whether this is a SI slice. See table 7-6 of H.264.
    pub fn is_si(&self) -> bool {
        matches!(self, SliceType::Si)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SliceHeader {
    pub first_mb_in_slice: u32,
    /// `raw_slice_type` folded to 0 to 4, Table 7-6.
    pub slice_type: SliceType,

    /// `slice_type` as coded, 0 to 9.
    pub raw_slice_type: u8,

    pub pic_parameter_set_id: u8,
    /// Only coded with `separate_colour_plane_flag`.
    pub colour_plane_id: u8,
    /// `log2_max_frame_num_minus4 + 4` bits wide.
    pub frame_num: u16,

    /// If set, specifies that the slice is a slice of a coded field.
    pub field_pic_flag: bool,

    /// If set, specifies that the slice is part of a coded bottom field.
    pub bottom_field_flag: bool,

    /// Identifies an IDR picture.
    pub idr_pic_id: u16,

    /// POC type 0 only, `log2_max_pic_order_cnt_lsb_minus4 + 4` bits wide.
    pub pic_order_cnt_lsb: u16,
    pub delta_pic_order_cnt_bottom: i32,

    /// The picture order count differences from the expected picture order
    /// count for the top field and for the bottom field, see clause 8.2.1.
    pub delta_pic_order_cnt: [i32; 2],

    /// Size in bits of the picture order count fields above.
    pub pic_order_cnt_bit_size: usize,

    /// Zero for slices belonging to the primary coded picture.
    pub redundant_pic_cnt: u8,

    /// B slices only.
    pub direct_spatial_mv_pred_flag: bool,

    /// Whether `num_ref_idx_l0_active_minus1` (and for B slices
    /// `num_ref_idx_l1_active_minus1`) are coded in the slice header.
    pub num_ref_idx_active_override_flag: bool,

    /// Taken from the PPS default unless overridden.
    pub num_ref_idx_l0_active_minus1: u8,
    pub num_ref_idx_l1_active_minus1: u8,

    pub ref_pic_list_modification_flag_l0: bool,

    /// Terminating `modification_of_pic_nums_idc` 3 excluded.
    pub ref_pic_list_modification_l0: Vec<RefPicListModification>,

    pub ref_pic_list_modification_flag_l1: bool,

    pub ref_pic_list_modification_l1: Vec<RefPicListModification>,

    /// 7.3.3.2, with the inferred default weights filled in.
    pub pred_weight_table: PredWeightTable,

    /// 7.3.3.3, only coded when `nal_ref_idc` is not 0.
    pub dec_ref_pic_marking: RefPicMarking,

    /// Size in bits of `dec_ref_pic_marking()`.
    pub dec_ref_pic_marking_bit_size: usize,

    pub cabac_init_idc: u8,
    /// SliceQPY = 26 + `pic_init_qp_minus26` + `slice_qp_delta`, 7-30.
    pub slice_qp_delta: i8,

    pub sp_for_switch_flag: bool,
    pub slice_qs_delta: i8,

    /// 0 filters all edges, 1 none, 2 all but slice boundaries.
    pub disable_deblocking_filter_idc: u8,

    /// Offset used in accessing the α and tC0 deblocking filter tables, see
    /// 7-32.
    pub slice_alpha_c0_offset_div2: i8,

    /// Offset used in accessing the β deblocking filter table, see 7-33.
    pub slice_beta_offset_div2: i8,

    /// Determines the number of slice group map units in slice group 0 when
    /// `slice_group_map_type` is 3, 4 or 5.
    pub slice_group_change_cycle: u32,

    /// Same as `MaxPicNum` of H.264.
    pub max_pic_num: u32,

    /// Size of the NAL unit header and slice_header() in bits, emulation
    /// prevention bytes excluded.
    pub header_bit_size: usize,

    /// Emulation prevention bytes met while reading the slice header.
    pub n_emulation_prevention_bytes: usize,

    /// Number of bytes of the NAL unit preceding the slice data: the NAL unit
    /// header and the slice header, emulation prevention bytes included. For
    /// CABAC streams this includes the `cabac_alignment_one_bit`s, for CAVLC
    /// streams the last partially used byte.
    pub size: usize,
}

/// `profile_idc` values of Annex A.
#[derive(N, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Profile {
    Baseline = 66,
    Main = 77,
    Extended = 88,
    High = 100,
    High10 = 110,
    High422P = 122,
    High444P = 244,
}

#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    #[default]
    L1 = 10,
    L1B = 9,
    L1_1 = 11,
    L1_2 = 12,
    L1_3 = 13,
    L2_0 = 20,
    L2_1 = 21,
    L2_2 = 22,
    L3 = 30,
    L3_1 = 31,
    L3_2 = 32,
    L4 = 40,
    L4_1 = 41,
    L4_2 = 42,
    L5 = 50,
    L5_1 = 51,
    L5_2 = 52,
    L6 = 60,
    L6_1 = 61,
    L6_2 = 62,
}

/// Whether an SPS of this profile codes `chroma_format_idc`, the bit depths
/// and the sequence scaling matrix, see 7.3.2.1.1.
pub(super) fn profile_has_chroma_info(profile_idc: u8) -> bool {
    matches!(
        profile_idc,
        100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128 | 138 | 139 | 134 | 135
    )
}

/// `seq_parameter_set_data()`, 7.3.2.1.1. Fields not coded for the stream's
/// profile hold their inferred values.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sps {
    pub seq_parameter_set_id: u8,
    /// See [`Profile`] for the common values.
    pub profile_idc: u8,

    /// Retains the same meaning as in H.264. See 7.4.2.1.1
    pub constraint_set0_flag: bool,
    /// Retains the same meaning as in H.264. See 7.4.2.1.1
    pub constraint_set1_flag: bool,
    /// Retains the same meaning as in H.264. See 7.4.2.1.1
    pub constraint_set2_flag: bool,
    /// Retains the same meaning as in H.264. See 7.4.2.1.1
    pub constraint_set3_flag: bool,
    /// Retains the same meaning as in H.264. See 7.4.2.1.1
    pub constraint_set4_flag: bool,
    /// Retains the same meaning as in H.264. See 7.4.2.1.1
    pub constraint_set5_flag: bool,

    pub level_idc: Level,

    /// 0 monochrome, 1 4:2:0, 2 4:2:2, 3 4:4:4. 1 when not coded.
    pub chroma_format_idc: u8,
    /// 4:4:4 only.
    pub separate_colour_plane_flag: bool,

    /// Specifies the bit depth of the samples of the luma array. See 7-3 and
    /// 7-4.
    pub bit_depth_luma_minus8: u8,

    /// Specifies the bit depth of the samples of the chroma arrays. See 7-5
    /// and 7-6.
    pub bit_depth_chroma_minus8: u8,

    /// Whether a transform bypass operation applies when QP′Y is 0.
    pub qpprime_y_zero_transform_bypass_flag: bool,

    /// Without it, all sequence lists are flat 16s.
    pub seq_scaling_matrix_present_flag: bool,

    /// `seq_scaling_list_present_flag[i]`. Lists that are not coded are
    /// derived with fall-back rule A of Table 7-2.
    pub seq_scaling_list_present_flag: [bool; 12],

    /// In zig-zag order, as coded.
    pub scaling_lists_4x4: [[u8; 16]; 6],
    pub scaling_lists_8x8: [[u8; 64]; 6],

    /// MaxFrameNum = 2 ^ (log2_max_frame_num_minus4 + 4)
    pub log2_max_frame_num_minus4: u8,

    /// 0, 1 or 2, selecting the POC fields coded below and in slice headers.
    pub pic_order_cnt_type: u8,

    /// MaxPicOrderCntLsb = 2 ^ (log2_max_pic_order_cnt_lsb_minus4 + 4).
    pub log2_max_pic_order_cnt_lsb_minus4: u8,

    /// If true, `delta_pic_order_cnt[0]` and `delta_pic_order_cnt[1]` are not
    /// present in the slice headers of the sequence and are inferred to be 0.
    pub delta_pic_order_always_zero_flag: bool,

    /// POC type 1 from here on.
    pub offset_for_non_ref_pic: i32,
    pub offset_for_top_to_bottom_field: i32,
    pub num_ref_frames_in_pic_order_cnt_cycle: u8,

    /// `num_ref_frames_in_pic_order_cnt_cycle` offsets used in the decoding
    /// process for picture order count as specified in clause 8.2.1.
    pub offset_for_ref_frame: Vec<i32>,

    /// At most `MaxDpbFrames`.
    pub max_num_ref_frames: u8,
    pub gaps_in_frame_num_value_allowed_flag: bool,

    pub pic_width_in_mbs_minus1: u16,
    /// In map units: macroblock pairs for field-capable streams.
    pub pic_height_in_map_units_minus1: u16,

    /// Progressive only. Doubles the map unit height when unset.
    pub frame_mbs_only_flag: bool,
    pub mb_adaptive_frame_field_flag: bool,
    pub direct_8x8_inference_flag: bool,

    /// If true, specifies that the frame cropping offset parameters follow.
    pub frame_cropping_flag: bool,

    /// Output cropping, in units of `CropUnitX`.
    pub frame_crop_left_offset: u32,
    /// Output cropping, in units of `CropUnitX`.
    pub frame_crop_right_offset: u32,
    /// Output cropping, in units of `CropUnitY`.
    pub frame_crop_top_offset: u32,
    /// Output cropping, in units of `CropUnitY`.
    pub frame_crop_bottom_offset: u32,

    /// Same as ExpectedDeltaPerPicOrderCntCycle, see 7-12 of H.264.
    pub expected_delta_per_pic_order_cnt_cycle: i32,

    pub vui_parameters_present_flag: bool,
    pub vui_parameters: VuiParams,
}

impl Default for Sps {
    fn default() -> Self {
        Self {
            seq_parameter_set_id: Default::default(),
            profile_idc: Default::default(),
            constraint_set0_flag: Default::default(),
            constraint_set1_flag: Default::default(),
            constraint_set2_flag: Default::default(),
            constraint_set3_flag: Default::default(),
            constraint_set4_flag: Default::default(),
            constraint_set5_flag: Default::default(),
            level_idc: Default::default(),
            // Inferred when not present, see 7.4.2.1.1.
            chroma_format_idc: 1,
            separate_colour_plane_flag: Default::default(),
            bit_depth_luma_minus8: Default::default(),
            bit_depth_chroma_minus8: Default::default(),
            qpprime_y_zero_transform_bypass_flag: Default::default(),
            seq_scaling_matrix_present_flag: Default::default(),
            seq_scaling_list_present_flag: Default::default(),
            // Flat_4x4_16 and Flat_8x8_16, (7-8) and (7-9).
            scaling_lists_4x4: [[16; 16]; 6],
            scaling_lists_8x8: [[16; 64]; 6],
            log2_max_frame_num_minus4: Default::default(),
            pic_order_cnt_type: Default::default(),
            log2_max_pic_order_cnt_lsb_minus4: Default::default(),
            delta_pic_order_always_zero_flag: Default::default(),
            offset_for_non_ref_pic: Default::default(),
            offset_for_top_to_bottom_field: Default::default(),
            num_ref_frames_in_pic_order_cnt_cycle: Default::default(),
            offset_for_ref_frame: Default::default(),
            max_num_ref_frames: Default::default(),
            gaps_in_frame_num_value_allowed_flag: Default::default(),
            pic_width_in_mbs_minus1: Default::default(),
            pic_height_in_map_units_minus1: Default::default(),
            frame_mbs_only_flag: Default::default(),
            mb_adaptive_frame_field_flag: Default::default(),
            direct_8x8_inference_flag: Default::default(),
            frame_cropping_flag: Default::default(),
            frame_crop_left_offset: Default::default(),
            frame_crop_right_offset: Default::default(),
            frame_crop_top_offset: Default::default(),
            frame_crop_bottom_offset: Default::default(),
            expected_delta_per_pic_order_cnt_cycle: Default::default(),
            vui_parameters_present_flag: Default::default(),
            vui_parameters: Default::default(),
        }
    }
}

impl Sps {
    /// Returns the coded width of the stream.
    ///
    /// See 7-13 through 7-17 of H.264.
    pub const fn width(&self) -> u32 {
        (self.pic_width_in_mbs_minus1 as u32 + 1) * 16
    }

    /// Returns the coded height of the stream.
    ///
    /// See 7-13 through 7-17 of H.264.
    pub const fn height(&self) -> u32 {
        (self.pic_height_in_map_units_minus1 as u32 + 1)
            * 16
            * (2 - self.frame_mbs_only_flag as u32)
    }

    /// Returns `ChromaArrayType`, as computed by H.264.
    pub const fn chroma_array_type(&self) -> u8 {
        match self.separate_colour_plane_flag {
            false => self.chroma_format_idc,
            true => 0,
        }
    }

    /// Returns `SubWidthC` and `SubHeightC`.
    ///
    /// See table 6-1 of H.264.
    fn sub_width_height_c(&self) -> (u32, u32) {
        match (self.chroma_format_idc, self.separate_colour_plane_flag) {
            (1, false) => (2, 2),
            (2, false) => (2, 1),
            (3, false) => (1, 1),
            // undefined.
            _ => (1, 1),
        }
    }

    /// Returns `CropUnitX` and `CropUnitY`.
    ///
    /// See 7-19 through 7-22 of H.264.
    fn crop_unit_x_y(&self) -> (u32, u32) {
        match self.chroma_array_type() {
            0 => (1, 2 - u32::from(self.frame_mbs_only_flag)),
            _ => {
                let (sub_width_c, sub_height_c) = self.sub_width_height_c();
                (
                    sub_width_c,
                    sub_height_c * (2 - u32::from(self.frame_mbs_only_flag)),
                )
            }
        }
    }

    /// The profile of the stream, if it is one of [`Profile`].
    pub fn profile(&self) -> Option<Profile> {
        Profile::n(self.profile_idc)
    }

    /// Same as MaxFrameNum. See 7-10 of H.264.
    pub fn max_frame_num(&self) -> u32 {
        1 << (self.log2_max_frame_num_minus4 + 4)
    }

    /// Same as MaxPicOrderCntLsb. See 7-11 of H.264.
    pub fn max_pic_order_cnt_lsb(&self) -> u32 {
        1 << (self.log2_max_pic_order_cnt_lsb_minus4 + 4)
    }

    /// Same as PicSizeInMapUnits. See 7-16 of H.264. Wider than the
    /// dimensions since both may reach 2^16.
    pub fn pic_size_in_map_units(&self) -> u64 {
        (u64::from(self.pic_width_in_mbs_minus1) + 1)
            * (u64::from(self.pic_height_in_map_units_minus1) + 1)
    }

    /// The area of the coded picture that is output, i.e. the picture minus
    /// the frame cropping offsets.
    pub fn visible_rectangle(&self) -> Rect<u32> {
        if !self.frame_cropping_flag {
            return Rect {
                min: Point { x: 0, y: 0 },
                max: Point {
                    x: self.width(),
                    y: self.height(),
                },
            };
        }

        let (crop_unit_x, crop_unit_y) = self.crop_unit_x_y();

        let crop_left = crop_unit_x * self.frame_crop_left_offset;
        let crop_right = crop_unit_x * self.frame_crop_right_offset;
        let crop_top = crop_unit_y * self.frame_crop_top_offset;
        let crop_bottom = crop_unit_y * self.frame_crop_bottom_offset;

        Rect {
            min: Point {
                x: crop_left,
                y: crop_top,
            },
            max: Point {
                x: self.width() - crop_right,
                y: self.height() - crop_bottom,
            },
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HrdParams {
    /// Number of CPB specifications minus 1, at most 31. Only that many
    /// entries of the arrays below are meaningful.
    pub cpb_cnt_minus1: u8,
    pub bit_rate_scale: u8,
    pub cpb_size_scale: u8,

    pub bit_rate_value_minus1: [u32; 32],
    pub cpb_size_value_minus1: [u32; 32],
    pub cbr_flag: [bool; 32],

    pub initial_cpb_removal_delay_length_minus1: u8,
    pub cpb_removal_delay_length_minus1: u8,
    pub dpb_output_delay_length_minus1: u8,
    pub time_offset_length: u8,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VuiParams {
    pub aspect_ratio_info_present_flag: bool,
    /// Sample aspect ratio of the luma samples, Table E-1. 255 is
    /// Extended_SAR, given by `sar_width` and `sar_height`.
    pub aspect_ratio_idc: u8,

    /* if aspect_ratio_idc == 255 */
    pub sar_width: u16,
    pub sar_height: u16,

    pub overscan_info_present_flag: bool,
    /* if overscan_info_present_flag */
    pub overscan_appropriate_flag: bool,

    pub video_signal_type_present_flag: bool,
    /// Table E-2. Inferred to be 5 when not present.
    pub video_format: u8,
    pub video_full_range_flag: bool,
    pub colour_description_present_flag: bool,
    /// Table E-3.
    pub colour_primaries: u8,
    /// Table E-4.
    pub transfer_characteristics: u8,
    /// Table E-5.
    pub matrix_coefficients: u8,

    pub chroma_loc_info_present_flag: bool,
    pub chroma_sample_loc_type_top_field: u8,
    pub chroma_sample_loc_type_bottom_field: u8,

    pub timing_info_present_flag: bool,
    /* if timing_info_present_flag */
    /// A clock tick lasts `num_units_in_tick / time_scale` seconds.
    pub num_units_in_tick: u32,
    pub time_scale: u32,
    pub fixed_frame_rate_flag: bool,

    pub nal_hrd_parameters_present_flag: bool,
    /* if nal_hrd_parameters_present_flag */
    pub nal_hrd_parameters: HrdParams,
    pub vcl_hrd_parameters_present_flag: bool,
    /* if vcl_hrd_parameters_present_flag */
    pub vcl_hrd_parameters: HrdParams,

    /// Only coded when one of the HRD parameter sets is.
    pub low_delay_hrd_flag: bool,

    pub pic_struct_present_flag: bool,

    pub bitstream_restriction_flag: bool,
    /*  if bitstream_restriction_flag */
    pub motion_vectors_over_pic_boundaries_flag: bool,
    pub max_bytes_per_pic_denom: u32,
    pub max_bits_per_mb_denom: u32,
    pub log2_max_mv_length_horizontal: u32,
    pub log2_max_mv_length_vertical: u32,
    pub max_num_reorder_frames: u32,
    pub max_dec_frame_buffering: u32,
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
            matrix_coefficients: 2,
            chroma_loc_info_present_flag: Default::default(),
            chroma_sample_loc_type_top_field: Default::default(),
            chroma_sample_loc_type_bottom_field: Default::default(),
            timing_info_present_flag: Default::default(),
            num_units_in_tick: Default::default(),
            time_scale: Default::default(),
            fixed_frame_rate_flag: Default::default(),
            nal_hrd_parameters_present_flag: Default::default(),
            nal_hrd_parameters: Default::default(),
            vcl_hrd_parameters_present_flag: Default::default(),
            vcl_hrd_parameters: Default::default(),
            low_delay_hrd_flag: Default::default(),
            pic_struct_present_flag: Default::default(),
            bitstream_restriction_flag: Default::default(),
            motion_vectors_over_pic_boundaries_flag: Default::default(),
            max_bytes_per_pic_denom: Default::default(),
            max_bits_per_mb_denom: Default::default(),
            log2_max_mv_length_horizontal: Default::default(),
            log2_max_mv_length_vertical: Default::default(),
            max_num_reorder_frames: Default::default(),
            max_dec_frame_buffering: Default::default(),
        }
    }
}

/// `pic_parameter_set_rbsp()`, 7.3.2.2. Field widths and the scaling list
/// fall-back depend on the SPS it names.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pps {
    pub pic_parameter_set_id: u8,
    pub seq_parameter_set_id: u8,

    /// CABAC if set, Exp-Golomb/CAVLC otherwise.
    pub entropy_coding_mode_flag: bool,

    /// Whether `delta_pic_order_cnt_bottom` or `delta_pic_order_cnt[1]` are
    /// present in the slice headers of coded frames.
    pub bottom_field_pic_order_in_frame_present_flag: bool,

    /// Plus 1 specifies the number of slice groups for a picture.
    pub num_slice_groups_minus1: u32,

    /// How the slice group map units are assigned to the slice groups, 0 to 6.
    pub slice_group_map_type: u8,
    /* if slice_group_map_type == 0 */
    pub run_length_minus1: Vec<u32>,
    /* if slice_group_map_type == 2 */
    pub top_left: Vec<u32>,
    pub bottom_right: Vec<u32>,
    /* if slice_group_map_type == 3, 4 or 5 */
    pub slice_group_change_direction_flag: bool,
    pub slice_group_change_rate_minus1: u32,
    /* if slice_group_map_type == 6 */
    pub pic_size_in_map_units_minus1: u32,
    pub slice_group_id: Vec<u32>,

    /// Used by slices that don't override the active reference counts.
    pub num_ref_idx_l0_default_active_minus1: u8,
    pub num_ref_idx_l1_default_active_minus1: u8,

    /// Whether explicit weighted prediction is applied to P and SP slices.
    pub weighted_pred_flag: bool,

    /// 0 for default, 1 for explicit and 2 for implicit weighted prediction
    /// in B slices.
    pub weighted_bipred_idc: u8,

    /// Lower bound -(26 + QpBdOffsetY), so it depends on the luma bit depth.
    pub pic_init_qp_minus26: i8,
    pub pic_init_qs_minus26: i8,

    /// Cb offset, -12 to 12.
    pub chroma_qp_index_offset: i8,

    /// Whether the slice headers carry the deblocking filter controls.
    pub deblocking_filter_control_present_flag: bool,

    /// Whether intra prediction only uses samples from intra macroblocks.
    pub constrained_intra_pred_flag: bool,

    /// Whether `redundant_pic_cnt` is present in the slice headers.
    pub redundant_pic_cnt_present_flag: bool,

    /// First of the trailing fields, coded only if `more_rbsp_data()`.
    pub transform_8x8_mode_flag: bool,

    /// Whether the picture level scaling lists are coded. Otherwise the
    /// lists of the sequence parameter set are in use.
    pub pic_scaling_matrix_present_flag: bool,

    /// `pic_scaling_list_present_flag[i]`.
    pub pic_scaling_list_present_flag: [bool; 12],

    /// The lists in effect for the picture: the SPS ones unless
    /// `pic_scaling_matrix_present_flag`, fall-back rule B otherwise.
    pub scaling_lists_4x4: [[u8; 16]; 6],
    pub scaling_lists_8x8: [[u8; 64]; 6],

    /// Cr offset, equal to `chroma_qp_index_offset` when not coded.
    pub second_chroma_qp_index_offset: i8,

    /// `chroma_format_idc` of the sequence parameter set this PPS was parsed
    /// against. It decides how many 8x8 scaling lists are coded.
    pub chroma_format_idc: u8,
}

impl Default for Pps {
    fn default() -> Self {
        Self {
            pic_parameter_set_id: Default::default(),
            seq_parameter_set_id: Default::default(),
            entropy_coding_mode_flag: Default::default(),
            bottom_field_pic_order_in_frame_present_flag: Default::default(),
            num_slice_groups_minus1: Default::default(),
            slice_group_map_type: Default::default(),
            run_length_minus1: Default::default(),
            top_left: Default::default(),
            bottom_right: Default::default(),
            slice_group_change_direction_flag: Default::default(),
            slice_group_change_rate_minus1: Default::default(),
            pic_size_in_map_units_minus1: Default::default(),
            slice_group_id: Default::default(),
            num_ref_idx_l0_default_active_minus1: Default::default(),
            num_ref_idx_l1_default_active_minus1: Default::default(),
            weighted_pred_flag: Default::default(),
            weighted_bipred_idc: Default::default(),
            pic_init_qp_minus26: Default::default(),
            pic_init_qs_minus26: Default::default(),
            chroma_qp_index_offset: Default::default(),
            deblocking_filter_control_present_flag: Default::default(),
            constrained_intra_pred_flag: Default::default(),
            redundant_pic_cnt_present_flag: Default::default(),
            transform_8x8_mode_flag: Default::default(),
            pic_scaling_matrix_present_flag: Default::default(),
            pic_scaling_list_present_flag: Default::default(),
            scaling_lists_4x4: [[16; 16]; 6],
            scaling_lists_8x8: [[16; 64]; 6],
            second_chroma_qp_index_offset: Default::default(),
            chroma_format_idc: 1,
        }
    }
}

impl Pps {
    /// Same as SliceGroupChangeRate. See 7-38 of H.264.
    pub fn slice_group_change_rate(&self) -> u64 {
        u64::from(self.slice_group_change_rate_minus1) + 1
    }
}

/// Knobs for the [`Parser`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ParserOptions {
    /// Parse a PPS whose SPS is unknown, assuming `chroma_format_idc` 1, the
    /// deepest samples allowed and flat sequence scaling lists. Without this option such a
    /// PPS is rejected with [`ParseError::MissingParameterSet`].
    pub allow_missing_sps: bool,
}

/// H.264 parameter set and slice header parser.
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

    fn fill_default_scaling_list_4x4(scaling_list4x4: &mut [u8; 16], i: usize) {
        // See table 7.2 of H.264.
        if i < 3 {
            *scaling_list4x4 = DEFAULT_4X4_INTRA;
        } else {
            *scaling_list4x4 = DEFAULT_4X4_INTER;
        }
    }

    fn fill_default_scaling_list_8x8(scaling_list8x8: &mut [u8; 64], i: usize) {
        if i % 2 == 0 {
            *scaling_list8x8 = DEFAULT_8X8_INTRA;
        } else {
            *scaling_list8x8 = DEFAULT_8X8_INTER;
        }
    }

    fn fill_fallback_scaling_list_4x4(
        scaling_list4x4: &mut [[u8; 16]; 6],
        i: usize,
        default_scaling_list_intra: &[u8; 16],
        default_scaling_list_inter: &[u8; 16],
    ) {
        // See table 7.2 of H.264.
        scaling_list4x4[i] = match i {
            0 => *default_scaling_list_intra,
            3 => *default_scaling_list_inter,
            _ => scaling_list4x4[i - 1],
        }
    }

    fn fill_fallback_scaling_list_8x8(
        scaling_list8x8: &mut [[u8; 64]; 6],
        i: usize,
        default_scaling_list_intra: &[u8; 64],
        default_scaling_list_inter: &[u8; 64],
    ) {
        // See table 7.2 of H.264.
        scaling_list8x8[i] = match i {
            0 => *default_scaling_list_intra,
            1 => *default_scaling_list_inter,
            _ => scaling_list8x8[i - 2],
        }
    }

    fn parse_scaling_list<R: Read, U: AsMut<[u8]>>(
        r: &mut NaluReader<R>,
        scaling_list: &mut U,
        use_default: &mut bool,
    ) -> anyhow::Result<()> {
        // 7.3.2.1.1.1
        let mut last_scale = 8u8;
        let mut next_scale = 8u8;

        for j in 0..scaling_list.as_mut().len() {
            if next_scale != 0 {
                let delta_scale = r.read_se_bounded::<i32>(-128, 127)?;
                next_scale = ((last_scale as i32 + delta_scale + 256) % 256) as u8;
                *use_default = j == 0 && next_scale == 0;
                if *use_default {
                    return Ok(());
                }
            }

            scaling_list.as_mut()[j] = if next_scale == 0 {
                last_scale
            } else {
                next_scale
            };

            last_scale = scaling_list.as_mut()[j];
        }

        Ok(())
    }

    /// Parses the scaling lists of an SPS (`fallback` is `None`) or of a PPS
    /// (`fallback` is the SPS the PPS refers to). `num_lists` scaling lists
    /// are coded, the others are derived following Table 7-2.
    #[allow(clippy::too_many_arguments)]
    fn parse_scaling_lists<R: Read>(
        r: &mut NaluReader<R>,
        num_lists: usize,
        present_flags: &mut [bool; 12],
        scaling_lists_4x4: &mut [[u8; 16]; 6],
        scaling_lists_8x8: &mut [[u8; 64]; 6],
        fallback: Option<&Sps>,
    ) -> anyhow::Result<()> {
        // Fall-back rule B applies to a PPS whose SPS coded scaling lists.
        let (intra_4x4, inter_4x4, intra_8x8, inter_8x8) = match fallback {
            Some(sps) if sps.seq_scaling_matrix_present_flag => (
                sps.scaling_lists_4x4[0],
                sps.scaling_lists_4x4[3],
                sps.scaling_lists_8x8[0],
                sps.scaling_lists_8x8[1],
            ),
            _ => (
                DEFAULT_4X4_INTRA,
                DEFAULT_4X4_INTER,
                DEFAULT_8X8_INTRA,
                DEFAULT_8X8_INTER,
            ),
        };

        for i in 0..12 {
            present_flags[i] = if i < num_lists { r.read_bit()? } else { false };

            if i < 6 {
                if present_flags[i] {
                    let mut use_default = false;
                    Parser::parse_scaling_list(r, &mut scaling_lists_4x4[i], &mut use_default)?;
                    if use_default {
                        Parser::fill_default_scaling_list_4x4(&mut scaling_lists_4x4[i], i);
                    }
                } else {
                    Parser::fill_fallback_scaling_list_4x4(
                        scaling_lists_4x4,
                        i,
                        &intra_4x4,
                        &inter_4x4,
                    );
                }
            } else if present_flags[i] {
                let mut use_default = false;
                Parser::parse_scaling_list(r, &mut scaling_lists_8x8[i - 6], &mut use_default)?;
                if use_default {
                    Parser::fill_default_scaling_list_8x8(&mut scaling_lists_8x8[i - 6], i - 6);
                }
            } else {
                Parser::fill_fallback_scaling_list_8x8(
                    scaling_lists_8x8,
                    i - 6,
                    &intra_8x8,
                    &inter_8x8,
                );
            }
        }

        Ok(())
    }

    fn parse_hrd<R: Read>(r: &mut NaluReader<R>, hrd: &mut HrdParams) -> anyhow::Result<()> {
        hrd.cpb_cnt_minus1 = r.read_ue_max(31)?;
        hrd.bit_rate_scale = r.read_bits(4)?;
        hrd.cpb_size_scale = r.read_bits(4)?;

        for sched_sel_idx in 0..=usize::from(hrd.cpb_cnt_minus1) {
            hrd.bit_rate_value_minus1[sched_sel_idx] = r.read_ue()?;
            hrd.cpb_size_value_minus1[sched_sel_idx] = r.read_ue()?;
            hrd.cbr_flag[sched_sel_idx] = r.read_bit()?;
        }

        hrd.initial_cpb_removal_delay_length_minus1 = r.read_bits(5)?;
        hrd.cpb_removal_delay_length_minus1 = r.read_bits(5)?;
        hrd.dpb_output_delay_length_minus1 = r.read_bits(5)?;
        hrd.time_offset_length = r.read_bits(5)?;
        Ok(())
    }

    fn parse_vui<R: Read>(r: &mut NaluReader<R>, vui: &mut VuiParams) -> anyhow::Result<()> {
        vui.aspect_ratio_info_present_flag = r.read_bit()?;
        if vui.aspect_ratio_info_present_flag {
            vui.aspect_ratio_idc = r.read_bits(8)?;
            if vui.aspect_ratio_idc == 255 {
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
                vui.matrix_coefficients = r.read_bits(8)?;
            }
        }

        vui.chroma_loc_info_present_flag = r.read_bit()?;
        if vui.chroma_loc_info_present_flag {
            vui.chroma_sample_loc_type_top_field = r.read_ue_max(5)?;
            vui.chroma_sample_loc_type_bottom_field = r.read_ue_max(5)?;
        }

        vui.timing_info_present_flag = r.read_bit()?;
        if vui.timing_info_present_flag {
            vui.num_units_in_tick = r.read_bits(32)?;
            if vui.num_units_in_tick == 0 {
                return Err(anyhow!(
                    "num_units_in_tick == 0, which is not allowed by E.2.1"
                ));
            }

            vui.time_scale = r.read_bits(32)?;
            if vui.time_scale == 0 {
                return Err(anyhow!("time_scale == 0, which is not allowed by E.2.1"));
            }

            vui.fixed_frame_rate_flag = r.read_bit()?;
        }

        vui.nal_hrd_parameters_present_flag = r.read_bit()?;
        if vui.nal_hrd_parameters_present_flag {
            Parser::parse_hrd(r, &mut vui.nal_hrd_parameters)
                .context("while parsing NAL HRD parameters")?;
        }

        vui.vcl_hrd_parameters_present_flag = r.read_bit()?;
        if vui.vcl_hrd_parameters_present_flag {
            Parser::parse_hrd(r, &mut vui.vcl_hrd_parameters)
                .context("while parsing VCL HRD parameters")?;
        }

        if vui.nal_hrd_parameters_present_flag || vui.vcl_hrd_parameters_present_flag {
            vui.low_delay_hrd_flag = r.read_bit()?;
        }

        vui.pic_struct_present_flag = r.read_bit()?;
        vui.bitstream_restriction_flag = r.read_bit()?;

        if vui.bitstream_restriction_flag {
            vui.motion_vectors_over_pic_boundaries_flag = r.read_bit()?;
            vui.max_bytes_per_pic_denom = r.read_ue()?;
            vui.max_bits_per_mb_denom = r.read_ue_max(16)?;
            vui.log2_max_mv_length_horizontal = r.read_ue_max(16)?;
            vui.log2_max_mv_length_vertical = r.read_ue_max(16)?;
            vui.max_num_reorder_frames = r.read_ue()?;
            vui.max_dec_frame_buffering = r.read_ue()?;
        }

        Ok(())
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

    /// Parses a SPS NAL unit.
    pub fn parse_sps(&self, nalu: &Nalu) -> anyhow::Result<Sps> {
        Parser::check_nalu_type(nalu, NaluType::Sps, "SPS")?;
        log::debug!("Parsing SPS of {} bytes", nalu.size);

        let mut r = NaluReader::new(nalu.payload());
        let sps = Parser::parse_sps_data(&mut r).context("while parsing SPS")?;

        log::trace!("Parsed {:?}", sps);
        Ok(sps)
    }

    fn parse_sps_data<R: Read>(r: &mut NaluReader<R>) -> anyhow::Result<Sps> {
        let mut sps = Sps {
            profile_idc: r.read_bits(8)?,
            constraint_set0_flag: r.read_bit()?,
            constraint_set1_flag: r.read_bit()?,
            constraint_set2_flag: r.read_bit()?,
            constraint_set3_flag: r.read_bit()?,
            constraint_set4_flag: r.read_bit()?,
            constraint_set5_flag: r.read_bit()?,
            ..Default::default()
        };

        // skip reserved_zero_2bits
        r.skip_bits(2)?;

        let level: u8 = r.read_bits(8)?;
        sps.level_idc = Level::n(level).with_context(|| format!("Unsupported level {}", level))?;
        sps.seq_parameter_set_id = r.read_ue_max(u32::from(MAX_SPS_COUNT) - 1)?;

        if profile_has_chroma_info(sps.profile_idc) {
            sps.chroma_format_idc = r.read_ue_max(3)?;
            if sps.chroma_format_idc == 3 {
                sps.separate_colour_plane_flag = r.read_bit()?;
            }

            sps.bit_depth_luma_minus8 = r.read_ue_max(6)?;
            sps.bit_depth_chroma_minus8 = r.read_ue_max(6)?;
            sps.qpprime_y_zero_transform_bypass_flag = r.read_bit()?;
            sps.seq_scaling_matrix_present_flag = r.read_bit()?;

            if sps.seq_scaling_matrix_present_flag {
                let num_lists = if sps.chroma_format_idc != 3 { 8 } else { 12 };
                Parser::parse_scaling_lists(
                    r,
                    num_lists,
                    &mut sps.seq_scaling_list_present_flag,
                    &mut sps.scaling_lists_4x4,
                    &mut sps.scaling_lists_8x8,
                    None,
                )
                .context("while parsing SPS scaling lists")?;
            }
        }

        sps.log2_max_frame_num_minus4 = r.read_ue_max(12)?;

        sps.pic_order_cnt_type = r.read_ue_max(2)?;

        if sps.pic_order_cnt_type == 0 {
            sps.log2_max_pic_order_cnt_lsb_minus4 = r.read_ue_max(12)?;
        } else if sps.pic_order_cnt_type == 1 {
            sps.delta_pic_order_always_zero_flag = r.read_bit()?;
            sps.offset_for_non_ref_pic = r.read_se()?;
            sps.offset_for_top_to_bottom_field = r.read_se()?;
            sps.num_ref_frames_in_pic_order_cnt_cycle = r.read_ue_max(254)?;

            let mut offset_acc = 0i32;
            for _ in 0..sps.num_ref_frames_in_pic_order_cnt_cycle {
                let offset = r.read_se::<i32>()?;
                sps.offset_for_ref_frame.push(offset);

                // (7-12)
                offset_acc = offset_acc.wrapping_add(offset);
            }

            sps.expected_delta_per_pic_order_cnt_cycle = offset_acc;
        }

        sps.max_num_ref_frames = r.read_ue_max(DPB_MAX_SIZE as u32)?;
        sps.gaps_in_frame_num_value_allowed_flag = r.read_bit()?;
        sps.pic_width_in_mbs_minus1 = r.read_ue()?;
        sps.pic_height_in_map_units_minus1 = r.read_ue()?;
        sps.frame_mbs_only_flag = r.read_bit()?;

        if !sps.frame_mbs_only_flag {
            sps.mb_adaptive_frame_field_flag = r.read_bit()?;
        }

        sps.direct_8x8_inference_flag = r.read_bit()?;
        sps.frame_cropping_flag = r.read_bit()?;

        if sps.frame_cropping_flag {
            sps.frame_crop_left_offset = r.read_ue()?;
            sps.frame_crop_right_offset = r.read_ue()?;
            sps.frame_crop_top_offset = r.read_ue()?;
            sps.frame_crop_bottom_offset = r.read_ue()?;

            // Validate that cropping info is valid.
            let (crop_unit_x, crop_unit_y) = sps.crop_unit_x_y();

            let _ = sps
                .frame_crop_left_offset
                .checked_add(sps.frame_crop_right_offset)
                .and_then(|r| r.checked_mul(crop_unit_x))
                .and_then(|r| sps.width().checked_sub(r))
                .ok_or(anyhow!("Invalid frame crop width"))?;

            let _ = sps
                .frame_crop_top_offset
                .checked_add(sps.frame_crop_bottom_offset)
                .and_then(|r| r.checked_mul(crop_unit_y))
                .and_then(|r| sps.height().checked_sub(r))
                .ok_or(anyhow!("invalid frame crop height"))?;
        }

        sps.vui_parameters_present_flag = r.read_bit()?;
        if sps.vui_parameters_present_flag {
            Parser::parse_vui(r, &mut sps.vui_parameters).context("while parsing VUI parameters")?;
        }

        Ok(sps)
    }

    /// Parses a PPS NAL unit. `spses` are the sequence parameter sets known so
    /// far; the one referenced by the PPS decides the width of some fields.
    pub fn parse_pps(&self, nalu: &Nalu, spses: Option<&BTreeMap<u8, Sps>>) -> anyhow::Result<Pps> {
        Parser::check_nalu_type(nalu, NaluType::Pps, "PPS")?;
        log::debug!("Parsing PPS of {} bytes", nalu.size);

        let mut r = NaluReader::new(nalu.payload());
        let pps = self.parse_pps_rbsp(&mut r, spses).context("while parsing PPS")?;

        log::trace!("Parsed {:?}", pps);
        Ok(pps)
    }

    /// An SPS standing in for a missing one, see
    /// [`ParserOptions::allow_missing_sps`]. 14-bit samples give the widest
    /// `pic_init_qp_minus26` range.
    fn fallback_sps() -> Sps {
        Sps {
            chroma_format_idc: 1,
            bit_depth_luma_minus8: 6,
            bit_depth_chroma_minus8: 6,
            ..Default::default()
        }
    }

    fn parse_pps_rbsp(
        &self,
        r: &mut NaluReader<Cursor<&[u8]>>,
        spses: Option<&BTreeMap<u8, Sps>>,
    ) -> anyhow::Result<Pps> {
        let pic_parameter_set_id = r.read_ue_max(u32::from(MAX_PPS_COUNT) - 1)?;
        let seq_parameter_set_id = r.read_ue_max(u32::from(MAX_SPS_COUNT) - 1)?;

        let fallback_sps;
        let mut sps_known = true;
        let sps = match spses.and_then(|spses| spses.get(&seq_parameter_set_id)) {
            Some(sps) => sps,
            None if self.options.allow_missing_sps => {
                log::debug!(
                    "SPS {} is unknown, parsing PPS {} with default field widths",
                    seq_parameter_set_id,
                    pic_parameter_set_id
                );
                sps_known = false;
                fallback_sps = Parser::fallback_sps();
                &fallback_sps
            }
            None => {
                return Err(ParseError::MissingParameterSet {
                    kind: "SPS",
                    id: seq_parameter_set_id,
                }
                .into())
            }
        };

        let mut pps = Pps {
            pic_parameter_set_id,
            seq_parameter_set_id,
            chroma_format_idc: sps.chroma_format_idc,
            ..Default::default()
        };

        pps.entropy_coding_mode_flag = r.read_bit()?;
        pps.bottom_field_pic_order_in_frame_present_flag = r.read_bit()?;
        pps.num_slice_groups_minus1 = r.read_ue_max(7)?;

        if pps.num_slice_groups_minus1 > 0 {
            Parser::parse_slice_groups(r, &mut pps).context("while parsing slice groups")?;

            // slice_group_change_rate_minus1 is in 0..PicSizeInMapUnits.
            if sps_known
                && (3..=5).contains(&pps.slice_group_map_type)
                && u64::from(pps.slice_group_change_rate_minus1) >= sps.pic_size_in_map_units()
            {
                return Err(anyhow!(
                    "Invalid slice_group_change_rate_minus1: {}",
                    pps.slice_group_change_rate_minus1
                ));
            }
        }

        pps.num_ref_idx_l0_default_active_minus1 = r.read_ue_max(31)?;
        pps.num_ref_idx_l1_default_active_minus1 = r.read_ue_max(31)?;

        pps.weighted_pred_flag = r.read_bit()?;
        pps.weighted_bipred_idc = r.read_bits(2)?;

        let qp_bd_offset_y = i32::from(6 * (sps.bit_depth_luma_minus8));
        pps.pic_init_qp_minus26 = r.read_se_bounded(-(26 + qp_bd_offset_y), 25)?;
        pps.pic_init_qs_minus26 = r.read_se_bounded(-26, 25)?;

        pps.chroma_qp_index_offset = r.read_se_bounded(-12, 12)?;

        // Overwritten below if the trailing fields are coded.
        pps.second_chroma_qp_index_offset = pps.chroma_qp_index_offset;

        pps.deblocking_filter_control_present_flag = r.read_bit()?;
        pps.constrained_intra_pred_flag = r.read_bit()?;
        pps.redundant_pic_cnt_present_flag = r.read_bit()?;

        if r.has_more_rbsp_data()? {
            pps.transform_8x8_mode_flag = r.read_bit()?;
            pps.pic_scaling_matrix_present_flag = r.read_bit()?;

            if pps.pic_scaling_matrix_present_flag {
                let num_lists = 6 + match (pps.transform_8x8_mode_flag, sps.chroma_format_idc) {
                    (false, _) => 0,
                    (true, 3) => 6,
                    (true, _) => 2,
                };

                Parser::parse_scaling_lists(
                    r,
                    num_lists,
                    &mut pps.pic_scaling_list_present_flag,
                    &mut pps.scaling_lists_4x4,
                    &mut pps.scaling_lists_8x8,
                    Some(sps),
                )
                .context("while parsing PPS scaling lists")?;
            }

            pps.second_chroma_qp_index_offset = r.read_se_bounded(-12, 12)?;
        }

        r.read_rbsp_trailing_bits()?;

        if !pps.pic_scaling_matrix_present_flag {
            // The picture uses the sequence lists.
            pps.scaling_lists_4x4 = sps.scaling_lists_4x4;
            pps.scaling_lists_8x8 = sps.scaling_lists_8x8;
        }

        Ok(pps)
    }

    fn parse_slice_groups<R: Read>(r: &mut NaluReader<R>, pps: &mut Pps) -> anyhow::Result<()> {
        pps.slice_group_map_type = r.read_ue_max(6)?;

        match pps.slice_group_map_type {
            0 => {
                for _ in 0..=pps.num_slice_groups_minus1 {
                    pps.run_length_minus1.push(r.read_ue()?);
                }
            }
            2 => {
                for _ in 0..pps.num_slice_groups_minus1 {
                    pps.top_left.push(r.read_ue()?);
                    pps.bottom_right.push(r.read_ue()?);
                }
            }
            3..=5 => {
                pps.slice_group_change_direction_flag = r.read_bit()?;
                pps.slice_group_change_rate_minus1 = r.read_ue()?;
            }
            6 => {
                pps.pic_size_in_map_units_minus1 = r.read_ue()?;
                let bits = ceil_log2(pps.num_slice_groups_minus1 + 1);
                for _ in 0..=pps.pic_size_in_map_units_minus1 {
                    pps.slice_group_id.push(r.read_bits(bits)?);
                }
            }
            _ => (),
        }

        Ok(())
    }

    fn parse_ref_pic_list_modification<R: Read>(
        r: &mut NaluReader<R>,
        num_ref_idx_active_minus1: u8,
        ref_list_mods: &mut Vec<RefPicListModification>,
    ) -> anyhow::Result<()> {
        if num_ref_idx_active_minus1 >= 32 {
            return Err(anyhow!("Broken Data: num_ref_idx_active_minus1 >= 32"));
        }

        loop {
            let mut pic_num_mod = RefPicListModification {
                modification_of_pic_nums_idc: r.read_ue_max(3)?,
                ..Default::default()
            };

            match pic_num_mod.modification_of_pic_nums_idc {
                0 | 1 => {
                    pic_num_mod.abs_diff_pic_num_minus1 = r.read_ue()?;
                }

                2 => {
                    pic_num_mod.long_term_pic_num = r.read_ue()?;
                }

                _ => {
                    ref_list_mods.push(pic_num_mod);
                    break;
                }
            }

            ref_list_mods.push(pic_num_mod);
        }

        Ok(())
    }

    fn parse_ref_pic_list_modifications<R: Read>(
        r: &mut NaluReader<R>,
        header: &mut SliceHeader,
    ) -> anyhow::Result<()> {
        if !header.slice_type.is_i() && !header.slice_type.is_si() {
            header.ref_pic_list_modification_flag_l0 = r.read_bit()?;
            if header.ref_pic_list_modification_flag_l0 {
                Parser::parse_ref_pic_list_modification(
                    r,
                    header.num_ref_idx_l0_active_minus1,
                    &mut header.ref_pic_list_modification_l0,
                )?;
            }
        }

        if header.slice_type.is_b() {
            header.ref_pic_list_modification_flag_l1 = r.read_bit()?;
            if header.ref_pic_list_modification_flag_l1 {
                Parser::parse_ref_pic_list_modification(
                    r,
                    header.num_ref_idx_l1_active_minus1,
                    &mut header.ref_pic_list_modification_l1,
                )?;
            }
        }

        Ok(())
    }

    fn parse_pred_weight_table<R: Read>(
        r: &mut NaluReader<R>,
        sps: &Sps,
        header: &mut SliceHeader,
    ) -> anyhow::Result<()> {
        let pt = &mut header.pred_weight_table;
        pt.luma_log2_weight_denom = r.read_ue_max(7)?;

        // Entries without a weight flag get 2^denom and offset 0.
        let default_luma_weight = 1 << pt.luma_log2_weight_denom;
        for i in 0..=header.num_ref_idx_l0_active_minus1 {
            pt.luma_weight_l0[usize::from(i)] = default_luma_weight;
        }

        if header.slice_type.is_b() {
            for i in 0..=header.num_ref_idx_l1_active_minus1 {
                pt.luma_weight_l1[usize::from(i)] = default_luma_weight;
            }
        }

        if sps.chroma_array_type() != 0 {
            pt.chroma_log2_weight_denom = r.read_ue_max(7)?;
            let default_chroma_weight = 1 << pt.chroma_log2_weight_denom;

            for i in 0..=header.num_ref_idx_l0_active_minus1 {
                pt.chroma_weight_l0[usize::from(i)] = [default_chroma_weight; 2];
            }

            if header.slice_type.is_b() {
                for i in 0..=header.num_ref_idx_l1_active_minus1 {
                    pt.chroma_weight_l1[usize::from(i)] = [default_chroma_weight; 2];
                }
            }
        }

        for i in 0..=usize::from(header.num_ref_idx_l0_active_minus1) {
            let luma_weight_l0_flag = r.read_bit()?;

            if luma_weight_l0_flag {
                pt.luma_weight_l0[i] = r.read_se_bounded(-128, 127)?;
                pt.luma_offset_l0[i] = r.read_se_bounded(-128, 127)?;
            }

            if sps.chroma_array_type() != 0 {
                let chroma_weight_l0_flag = r.read_bit()?;
                if chroma_weight_l0_flag {
                    for j in 0..2 {
                        pt.chroma_weight_l0[i][j] = r.read_se_bounded(-128, 127)?;
                        pt.chroma_offset_l0[i][j] = r.read_se_bounded(-128, 127)?;
                    }
                }
            }
        }

        if header.slice_type.is_b() {
            for i in 0..=usize::from(header.num_ref_idx_l1_active_minus1) {
                let luma_weight_l1_flag = r.read_bit()?;

                if luma_weight_l1_flag {
                    pt.luma_weight_l1[i] = r.read_se_bounded(-128, 127)?;
                    pt.luma_offset_l1[i] = r.read_se_bounded(-128, 127)?;
                }

                if sps.chroma_array_type() != 0 {
                    let chroma_weight_l1_flag = r.read_bit()?;
                    if chroma_weight_l1_flag {
                        for j in 0..2 {
                            pt.chroma_weight_l1[i][j] = r.read_se_bounded(-128, 127)?;
                            pt.chroma_offset_l1[i][j] = r.read_se_bounded(-128, 127)?;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn parse_dec_ref_pic_marking<R: Read>(
        r: &mut NaluReader<R>,
        nalu: &Nalu,
        header: &mut SliceHeader,
    ) -> anyhow::Result<()> {
        let rpm = &mut header.dec_ref_pic_marking;

        let num_bits_read = r.num_bits_read();
        if nalu.header.idr_pic_flag {
            rpm.no_output_of_prior_pics_flag = r.read_bit()?;
            rpm.long_term_reference_flag = r.read_bit()?;
        } else {
            rpm.adaptive_ref_pic_marking_mode_flag = r.read_bit()?;

            if rpm.adaptive_ref_pic_marking_mode_flag {
                loop {
                    let mut marking = RefPicMarkingInner::default();

                    let mem_mgmt_ctrl_op = r.read_ue_max::<u8>(6)?;
                    marking.memory_management_control_operation = mem_mgmt_ctrl_op;

                    if mem_mgmt_ctrl_op == 0 {
                        break;
                    }

                    if mem_mgmt_ctrl_op == 1 || mem_mgmt_ctrl_op == 3 {
                        marking.difference_of_pic_nums_minus1 = r.read_ue()?;
                    }

                    if mem_mgmt_ctrl_op == 2 {
                        marking.long_term_pic_num = r.read_ue()?;
                    }

                    if mem_mgmt_ctrl_op == 3 || mem_mgmt_ctrl_op == 6 {
                        marking.long_term_frame_idx = r.read_ue()?;
                    }

                    if mem_mgmt_ctrl_op == 4 {
                        marking.max_long_term_frame_idx =
                            MaxLongTermFrameIdx::from_value_plus1(r.read_ue()?);
                    }

                    rpm.inner.push(marking);
                }
            }
        }
        header.dec_ref_pic_marking_bit_size = r.num_bits_read() - num_bits_read;

        Ok(())
    }

    /// Parses the header of a slice NAL unit (types 1 to 5). The PPS it refers
    /// to must be in `ppses` and that PPS's SPS in `spses`.
    pub fn parse_slice_header(
        &self,
        nalu: &Nalu,
        spses: &BTreeMap<u8, Sps>,
        ppses: &BTreeMap<u8, Pps>,
    ) -> anyhow::Result<SliceHeader> {
        if !nalu.header.type_.is_video() {
            return Err(ParseError::UnexpectedNaluType {
                expected: "slice",
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
        let header = Parser::parse_slice_header_data(&mut r, nalu, spses, ppses)
            .context("while parsing slice header")?;

        log::trace!("Parsed {:?}", header);
        Ok(header)
    }

    /// Reads only as far as `slice_type`, which needs no parameter sets.
    pub fn parse_slice_type(&self, nalu: &Nalu) -> anyhow::Result<SliceType> {
        if !nalu.header.type_.is_video() {
            return Err(ParseError::UnexpectedNaluType {
                expected: "slice",
                found: nalu.header.type_ as u8,
            }
            .into());
        }

        let mut r = NaluReader::new(nalu.payload());
        let _first_mb_in_slice = r.read_ue::<u32>()?;
        let slice_type = r.read_ue_max::<u8>(9)?;

        SliceType::from_slice_type(slice_type)
            .with_context(|| format!("Invalid slice type {}", slice_type))
    }

    fn parse_slice_header_data<R: Read>(
        r: &mut NaluReader<R>,
        nalu: &Nalu,
        spses: &BTreeMap<u8, Sps>,
        ppses: &BTreeMap<u8, Pps>,
    ) -> anyhow::Result<SliceHeader> {
        let mut header = SliceHeader {
            first_mb_in_slice: r.read_ue()?,
            ..Default::default()
        };

        header.raw_slice_type = r.read_ue_max(9)?;
        header.slice_type = SliceType::from_slice_type(header.raw_slice_type)
            .with_context(|| format!("Invalid slice type {}", header.raw_slice_type))?;

        header.pic_parameter_set_id = r.read_ue_max(u32::from(MAX_PPS_COUNT) - 1)?;

        let pps = ppses
            .get(&header.pic_parameter_set_id)
            .ok_or(ParseError::MissingParameterSet {
                kind: "PPS",
                id: header.pic_parameter_set_id,
            })?;

        let sps = spses
            .get(&pps.seq_parameter_set_id)
            .ok_or(ParseError::MissingParameterSet {
                kind: "SPS",
                id: pps.seq_parameter_set_id,
            })?;

        if sps.separate_colour_plane_flag {
            header.colour_plane_id = r.read_bits(2)?;
        }

        header.frame_num = r.read_bits(usize::from(sps.log2_max_frame_num_minus4) + 4)?;

        if !sps.frame_mbs_only_flag {
            header.field_pic_flag = r.read_bit()?;
            if header.field_pic_flag {
                header.bottom_field_flag = r.read_bit()?;
            }
        }

        if header.field_pic_flag {
            header.max_pic_num = 2 * sps.max_frame_num();
        } else {
            header.max_pic_num = sps.max_frame_num();
        }

        if nalu.header.idr_pic_flag {
            header.idr_pic_id = r.read_ue_max(0xffff)?;
        }

        let num_bits_read = r.num_bits_read();
        if sps.pic_order_cnt_type == 0 {
            header.pic_order_cnt_lsb =
                r.read_bits(usize::from(sps.log2_max_pic_order_cnt_lsb_minus4) + 4)?;

            if pps.bottom_field_pic_order_in_frame_present_flag && !header.field_pic_flag {
                header.delta_pic_order_cnt_bottom = r.read_se()?;
            }
        }

        if sps.pic_order_cnt_type == 1 && !sps.delta_pic_order_always_zero_flag {
            header.delta_pic_order_cnt[0] = r.read_se()?;
            if pps.bottom_field_pic_order_in_frame_present_flag && !header.field_pic_flag {
                header.delta_pic_order_cnt[1] = r.read_se()?;
            }
        }
        header.pic_order_cnt_bit_size = r.num_bits_read() - num_bits_read;

        if pps.redundant_pic_cnt_present_flag {
            header.redundant_pic_cnt = r.read_ue_max(127)?;
        }

        if header.slice_type.is_b() {
            header.direct_spatial_mv_pred_flag = r.read_bit()?;
        }

        if header.slice_type.is_p() || header.slice_type.is_sp() || header.slice_type.is_b() {
            header.num_ref_idx_active_override_flag = r.read_bit()?;
            if header.num_ref_idx_active_override_flag {
                header.num_ref_idx_l0_active_minus1 = r.read_ue_max(31)?;
                if header.slice_type.is_b() {
                    header.num_ref_idx_l1_active_minus1 = r.read_ue_max(31)?;
                }
            } else {
                header.num_ref_idx_l0_active_minus1 = pps.num_ref_idx_l0_default_active_minus1;
                if header.slice_type.is_b() {
                    header.num_ref_idx_l1_active_minus1 = pps.num_ref_idx_l1_default_active_minus1;
                }
            }
        }

        if header.field_pic_flag {
            if header.num_ref_idx_l0_active_minus1 > 31 || header.num_ref_idx_l1_active_minus1 > 31
            {
                return Err(anyhow!("Broken Data"));
            }
        } else if header.num_ref_idx_l0_active_minus1 > 15
            || header.num_ref_idx_l1_active_minus1 > 15
        {
            return Err(anyhow!("Broken Data"));
        }

        Parser::parse_ref_pic_list_modifications(r, &mut header)
            .context("while parsing ref_pic_list_modification")?;

        if (pps.weighted_pred_flag && (header.slice_type.is_p() || header.slice_type.is_sp()))
            || (pps.weighted_bipred_idc == 1 && header.slice_type.is_b())
        {
            Parser::parse_pred_weight_table(r, sps, &mut header)
                .context("while parsing pred_weight_table")?;
        }

        if nalu.header.ref_idc != 0 {
            Parser::parse_dec_ref_pic_marking(r, nalu, &mut header)
                .context("while parsing dec_ref_pic_marking")?;
        }

        if pps.entropy_coding_mode_flag && !header.slice_type.is_i() && !header.slice_type.is_si() {
            header.cabac_init_idc = r.read_ue_max(2)?;
        }

        header.slice_qp_delta = r.read_se_bounded(-87, 77)?;

        if header.slice_type.is_sp() || header.slice_type.is_si() {
            if header.slice_type.is_sp() {
                header.sp_for_switch_flag = r.read_bit()?;
            }

            header.slice_qs_delta = r.read_se_bounded(-51, 51)?;
        }

        if pps.deblocking_filter_control_present_flag {
            header.disable_deblocking_filter_idc = r.read_ue_max(2)?;

            if header.disable_deblocking_filter_idc != 1 {
                header.slice_alpha_c0_offset_div2 = r.read_se_bounded(-6, 6)?;
                header.slice_beta_offset_div2 = r.read_se_bounded(-6, 6)?;
            }
        }

        if pps.num_slice_groups_minus1 > 0 && (3..=5).contains(&pps.slice_group_map_type) {
            // Ceil(Log2(PicSizeInMapUnits ÷ SliceGroupChangeRate + 1)), 7-35.
            let change_rate = pps.slice_group_change_rate();
            let pic_size = sps.pic_size_in_map_units();
            if change_rate > pic_size {
                return Err(anyhow!(
                    "SliceGroupChangeRate {} exceeds PicSizeInMapUnits {}",
                    change_rate,
                    pic_size
                ));
            }
            let cycles = u32::try_from(pic_size.div_ceil(change_rate) + 1)?;
            header.slice_group_change_cycle = r.read_bits(ceil_log2(cycles))?;
        }

        let header_len = nalu.header.len();
        header.header_bit_size = header_len * 8 + r.num_bits_read();
        header.n_emulation_prevention_bytes = r.num_epb();

        if pps.entropy_coding_mode_flag {
            // cabac_alignment_one_bit, 7.3.4.
            r.skip_to_byte_alignment()?;
        }

        // The last partially read byte still holds slice data for CAVLC.
        header.size = header_len + r.num_bytes_read();

        Ok(header)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NaluHeader {
    pub forbidden_zero_bit: bool,
    pub ref_idc: u8,
    pub type_: NaluType,
    pub idr_pic_flag: bool,
}

impl Header for NaluHeader {
    fn parse<T: AsRef<[u8]>>(cursor: &Cursor<T>) -> anyhow::Result<Self> {
        if !cursor.has_remaining() {
            return Err(anyhow!("Broken Data"));
        }

        let byte = cursor.chunk()[0];
        let type_ = NaluType::from_header_byte(byte);

        Ok(NaluHeader {
            forbidden_zero_bit: byte & 0x80 != 0,
            ref_idc: (byte & 0x60) >> 5,
            type_,
            idr_pic_flag: matches!(type_, NaluType::SliceIdr),
        })
    }

    fn is_end(&self) -> bool {
        matches!(self.type_, NaluType::SeqEnd | NaluType::StreamEnd)
    }

    fn len(&self) -> usize {
        1
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

/// Like [`find_nalu_types`] but stops after the first coded slice, which is
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

/// Whether a sample holds an IDR slice.
pub fn is_idr_sample<'a, I>(nalus: I) -> bool
where
    I: IntoIterator<Item = &'a [u8]>,
{
    contains_nalu_type(nalus, NaluType::SliceIdr)
}

/// Whether decoding can start at this sample. In H.264 only IDR pictures
/// qualify without looking into SEI messages.
pub fn is_rap_sample<'a, I>(nalus: I) -> bool
where
    I: IntoIterator<Item = &'a [u8]>,
{
    is_idr_sample(nalus)
}

/// Whether a sample carries both a SPS and a PPS.
pub fn has_parameter_sets<'a, I>(nalus: I) -> bool
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let types = find_nalu_types(nalus);
    types.contains(&NaluType::Sps) && types.contains(&NaluType::Pps)
}

/// Parameter set NAL units of a sample, header byte included.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParameterSets<'a> {
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
            Some(NaluType::Sps) => sets.sps.push(nalu),
            Some(NaluType::Pps) => sets.pps.push(nalu),
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

    /// High profile, 640x360 with cropping and VUI timing.
    const SPS_HIGH: &str = "6764001eacd940a02ff9610000030001000003003c8f162d96";
    const PPS_HIGH: &str = "68ebecb22c";
    /// P slice with reference list modifications and a weight table.
    const SLICE_P_HIGH: &str = "419a6649e10f2653022fff8700000302c8a32d32";

    /// Baseline profile, 320x240, 8-bit picture order count LSBs.
    const SPS_BASELINE: &str = "6742c01ee540a0fc80";
    /// CAVLC, deblocking filter controls in the slice header.
    const PPS_BASELINE: &str = "68ce3c80";
    /// Black IDR frame.
    const SLICE_IDR_BASELINE: &str = "658884001939ec8884";
    /// PPS 1: two slice groups of map type 4, SliceGroupChangeRate 10.
    const PPS_SLICE_GROUPS: &str = "6851142b1c40";
    /// Non-reference P slice using `PPS_SLICE_GROUPS`.
    const SLICE_P_SLICE_GROUPS: &str = "01d0811ae8aa";

    fn parameter_sets(sps: &str, ppses: &[&str]) -> (BTreeMap<u8, Sps>, BTreeMap<u8, Pps>) {
        let parser = Parser::default();

        let sps_data = from_hex(sps);
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

    #[test]
    fn nalu_type_classification() {
        for byte in 0..=255u8 {
            assert_eq!(NaluType::from_header_byte(byte) as u8, byte & 0x1f);
        }

        assert!(NaluType::from_header_byte(0x41).is_video());
        assert!(NaluType::from_header_byte(0x65).is_video());
        assert!(!NaluType::from_header_byte(0x06).is_video());
        assert!(!NaluType::from_header_byte(0x67).is_video());
        assert!(!NaluType::from_header_byte(0x09).is_video());
        assert!(!NaluType::SliceExt.is_video());

        let header = NaluHeader::parse(&Cursor::new([0x65u8])).unwrap();
        assert_eq!(header.ref_idc, 3);
        assert!(header.idr_pic_flag);
        assert!(!header.forbidden_zero_bit);

        // Extension slices are classified, not rejected.
        let header = NaluHeader::parse(&Cursor::new([0x74u8])).unwrap();
        assert_eq!(header.type_, NaluType::SliceExt);
    }

    #[test]
    fn idr_sample() {
        let sample = [0, 0, 0, 2, 5, 0];

        let types = find_nalu_types(LengthPrefixedIterator::new(&sample));
        assert_eq!(types, vec![NaluType::SliceIdr]);
        assert!(is_idr_sample(LengthPrefixedIterator::new(&sample)));
        assert!(is_rap_sample(LengthPrefixedIterator::new(&sample)));
        assert!(!has_parameter_sets(LengthPrefixedIterator::new(&sample)));
    }

    #[test]
    fn sample_without_pps() {
        let sample = [0, 0, 0, 2, 9, 2, 0, 0, 0, 3, 7, 5, 4];

        let types = find_nalu_types(LengthPrefixedIterator::new(&sample));
        assert_eq!(types, vec![NaluType::AuDelimiter, NaluType::Sps]);
        assert!(!has_parameter_sets(LengthPrefixedIterator::new(&sample)));
        assert!(!is_idr_sample(LengthPrefixedIterator::new(&sample)));

        let sets = get_parameter_sets(LengthPrefixedIterator::new(&sample));
        assert_eq!(sets.sps, vec![&[7u8, 5, 4][..]]);
        assert_eq!(&sets.sps[0][1..], &[5, 4]);
        assert!(sets.pps.is_empty());
    }

    #[test]
    fn annexb_sample_helpers() {
        let sps = from_hex(SPS_BASELINE);
        let pps = from_hex(PPS_BASELINE);
        let idr = from_hex(SLICE_IDR_BASELINE);
        let stream = annexb(&[&[0x09, 0xf0], &sps, &pps, &idr, &idr]);

        let units: Vec<&[u8]> = nalu::scan(&stream)
            .into_iter()
            .map(|range| &stream[range])
            .collect();

        assert!(has_parameter_sets(units.iter().copied()));
        assert!(contains_nalu_type(units.iter().copied(), NaluType::Pps));
        assert!(!contains_nalu_type(units.iter().copied(), NaluType::Sei));
        assert_eq!(
            find_nalu_types_up_to_first_video_nalu(units.iter().copied()),
            vec![
                NaluType::AuDelimiter,
                NaluType::Sps,
                NaluType::Pps,
                NaluType::SliceIdr
            ]
        );

        let sets = get_parameter_sets(units.iter().copied());
        assert_eq!(sets.sps, vec![&sps[..]]);
        assert_eq!(sets.pps, vec![&pps[..]]);
    }

    #[test]
    fn parse_sps_high_profile() {
        let data = from_hex(SPS_HIGH);
        let sps = Parser::default()
            .parse_sps(&Nalu::from_unit(&data).unwrap())
            .unwrap();

        assert_eq!(sps.profile(), Some(Profile::High));
        assert_eq!(sps.level_idc, Level::L3);
        assert_eq!(sps.seq_parameter_set_id, 0);
        assert_eq!(sps.chroma_format_idc, 1);
        assert_eq!(sps.bit_depth_luma_minus8, 0);
        assert!(!sps.seq_scaling_matrix_present_flag);
        assert_eq!(sps.scaling_lists_4x4, [[16; 16]; 6]);
        assert_eq!(sps.pic_order_cnt_type, 0);
        assert_eq!(sps.log2_max_pic_order_cnt_lsb_minus4, 2);
        assert_eq!(sps.max_num_ref_frames, 4);
        assert_eq!(sps.pic_width_in_mbs_minus1, 39);
        assert_eq!(sps.pic_height_in_map_units_minus1, 22);
        assert!(sps.frame_mbs_only_flag);
        assert!(sps.direct_8x8_inference_flag);
        assert!(sps.frame_cropping_flag);
        assert_eq!(sps.frame_crop_bottom_offset, 4);
        assert_eq!(sps.width(), 640);
        assert_eq!(sps.height(), 368);
        assert_eq!(
            sps.visible_rectangle(),
            Rect {
                min: Point { x: 0, y: 0 },
                max: Point { x: 640, y: 360 },
            }
        );

        let vui = &sps.vui_parameters;
        assert!(sps.vui_parameters_present_flag);
        assert!(vui.timing_info_present_flag);
        assert_eq!(vui.num_units_in_tick, 1);
        assert_eq!(vui.time_scale, 60);
        assert!(vui.fixed_frame_rate_flag);
        assert!(vui.bitstream_restriction_flag);
        assert!(vui.motion_vectors_over_pic_boundaries_flag);
        assert_eq!(vui.log2_max_mv_length_horizontal, 10);
        assert_eq!(vui.log2_max_mv_length_vertical, 10);
        assert_eq!(vui.max_num_reorder_frames, 2);
        assert_eq!(vui.max_dec_frame_buffering, 4);
    }

    #[test]
    fn parse_pps_without_sps() {
        let data = from_hex("68e84332c8b0");
        let nalu = Nalu::from_unit(&data).unwrap();

        let err = Parser::default().parse_pps(&nalu, None).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ParseError>(),
            Some(&ParseError::MissingParameterSet { kind: "SPS", id: 0 })
        );

        let err = Parser::default()
            .parse_pps(&nalu, Some(&BTreeMap::new()))
            .unwrap_err();
        assert!(err.downcast_ref::<ParseError>().is_some());

        let parser = Parser::new(ParserOptions {
            allow_missing_sps: true,
        });
        let pps = parser.parse_pps(&nalu, None).unwrap();

        assert_eq!(pps.pic_parameter_set_id, 0);
        assert_eq!(pps.seq_parameter_set_id, 0);
        assert!(pps.entropy_coding_mode_flag);
        assert_eq!(pps.num_ref_idx_l0_default_active_minus1, 15);
        assert!(pps.weighted_pred_flag);
        assert_eq!(pps.chroma_qp_index_offset, -2);
        assert!(pps.deblocking_filter_control_present_flag);
        assert!(pps.transform_8x8_mode_flag);
        assert!(!pps.pic_scaling_matrix_present_flag);
        assert_eq!(pps.second_chroma_qp_index_offset, -2);
        assert_eq!(pps.scaling_lists_8x8, [[16; 64]; 6]);
    }

    #[test]
    fn parse_deep_pps_without_sps() {
        // pic_init_qp_minus26 of -40 needs more than 10-bit luma.
        let data = from_hex("68ce00a3c8");
        let nalu = Nalu::from_unit(&data).unwrap();

        let (spses, _) = parameter_sets(SPS_BASELINE, &[]);
        let err = Parser::default().parse_pps(&nalu, Some(&spses)).unwrap_err();
        assert!(matches!(
            err.root_cause().downcast_ref::<ReadBitsError>(),
            Some(ReadBitsError::OutOfBounds { value: -40, .. })
        ));

        let pps = Parser::new(ParserOptions {
            allow_missing_sps: true,
        })
        .parse_pps(&nalu, None)
        .unwrap();
        assert_eq!(pps.pic_init_qp_minus26, -40);
        assert_eq!(pps.pic_init_qs_minus26, 0);
    }

    #[test]
    fn parse_pps_high_profile() {
        let (_, ppses) = parameter_sets(SPS_HIGH, &[PPS_HIGH]);
        let pps = &ppses[&0];

        assert!(pps.entropy_coding_mode_flag);
        assert_eq!(pps.num_ref_idx_l0_default_active_minus1, 2);
        assert!(pps.weighted_pred_flag);
        assert_eq!(pps.weighted_bipred_idc, 2);
        assert_eq!(pps.chroma_qp_index_offset, -2);
        assert!(pps.deblocking_filter_control_present_flag);
        assert!(pps.transform_8x8_mode_flag);
        assert_eq!(pps.second_chroma_qp_index_offset, -2);
    }

    #[test]
    fn parse_slice_header_length() {
        let (spses, ppses) = parameter_sets(SPS_HIGH, &[PPS_HIGH]);
        let data = from_hex(SLICE_P_HIGH);
        let nalu = Nalu::from_unit(&data).unwrap();
        let hdr = Parser::default()
            .parse_slice_header(&nalu, &spses, &ppses)
            .unwrap();

        assert!(hdr.slice_type.is_p());
        assert_eq!(hdr.raw_slice_type, 5);
        assert_eq!(hdr.frame_num, 3);
        assert_eq!(hdr.pic_order_cnt_lsb, 12);
        assert!(hdr.num_ref_idx_active_override_flag);
        assert_eq!(hdr.num_ref_idx_l0_active_minus1, 3);

        assert!(hdr.ref_pic_list_modification_flag_l0);
        let idcs: Vec<_> = hdr
            .ref_pic_list_modification_l0
            .iter()
            .map(|m| (m.modification_of_pic_nums_idc, m.abs_diff_pic_num_minus1))
            .collect();
        assert_eq!(idcs, vec![(0, 0), (0, 0), (0, 15), (0, 0), (0, 0), (3, 0)]);

        let pwt = &hdr.pred_weight_table;
        assert_eq!(pwt.luma_log2_weight_denom, 0);
        assert_eq!(pwt.chroma_log2_weight_denom, 0);
        assert_eq!(pwt.luma_weight_l0[1], 1);
        assert_eq!(pwt.luma_offset_l0[1], -1);

        assert_eq!(hdr.slice_qp_delta, -5);
        assert_eq!(hdr.disable_deblocking_filter_idc, 0);
        assert_eq!(hdr.size, 11);
        assert_eq!(hdr.n_emulation_prevention_bytes, 0);
    }

    #[test]
    fn parse_black_frame_slice_header() {
        let _ = env_logger::try_init();

        let sps = from_hex(SPS_BASELINE);
        let pps = from_hex(PPS_BASELINE);
        let idr = from_hex(SLICE_IDR_BASELINE);
        let stream = annexb(&[&sps, &pps, &idr]);

        let parser = Parser::default();
        let mut spses = BTreeMap::new();
        let mut ppses = BTreeMap::new();
        let mut headers = Vec::new();

        for nalu in NalIterator::<NaluHeader>::new(&stream) {
            match nalu.header.type_ {
                NaluType::Sps => {
                    let sps = parser.parse_sps(&nalu).unwrap();
                    spses.insert(sps.seq_parameter_set_id, sps);
                }
                NaluType::Pps => {
                    let pps = parser.parse_pps(&nalu, Some(&spses)).unwrap();
                    ppses.insert(pps.pic_parameter_set_id, pps);
                }
                NaluType::SliceIdr => {
                    headers.push(parser.parse_slice_header(&nalu, &spses, &ppses).unwrap());
                }
                _ => (),
            }
        }

        assert_eq!(spses[&0].width(), 320);
        assert_eq!(spses[&0].height(), 240);
        assert_eq!(spses[&0].profile_idc, 66);

        assert_eq!(headers.len(), 1);
        let hdr = &headers[0];
        assert_eq!(hdr.raw_slice_type, 7);
        assert_eq!(hdr.slice_type, SliceType::I);
        assert_eq!(hdr.idr_pic_id, 0);
        assert_eq!(hdr.frame_num, 0);
        assert_eq!(hdr.slice_qp_delta, 6);
        assert_eq!(hdr.disable_deblocking_filter_idc, 0);
        assert_eq!(hdr.slice_alpha_c0_offset_div2, -3);
        assert_eq!(hdr.slice_beta_offset_div2, -3);
        assert_eq!(hdr.dec_ref_pic_marking, RefPicMarking::default());
        assert_eq!(hdr.dec_ref_pic_marking_bit_size, 2);
        assert_eq!(hdr.pic_order_cnt_bit_size, 8);
        assert_eq!(hdr.header_bit_size, 50);
        assert_eq!(hdr.size, 7);
    }

    #[test]
    fn parse_slice_group_change_cycle() {
        let (spses, ppses) = parameter_sets(SPS_BASELINE, &[PPS_BASELINE, PPS_SLICE_GROUPS]);

        let pps = &ppses[&1];
        assert_eq!(pps.num_slice_groups_minus1, 1);
        assert_eq!(pps.slice_group_map_type, 4);
        assert_eq!(pps.slice_group_change_rate(), 10);

        let data = from_hex(SLICE_P_SLICE_GROUPS);
        let hdr = Parser::default()
            .parse_slice_header(&Nalu::from_unit(&data).unwrap(), &spses, &ppses)
            .unwrap();

        assert!(hdr.slice_type.is_p());
        assert_eq!(hdr.pic_parameter_set_id, 1);
        assert_eq!(hdr.frame_num, 1);
        assert_eq!(hdr.pic_order_cnt_lsb, 2);
        assert_eq!(hdr.num_ref_idx_l0_active_minus1, 0);
        assert_eq!(hdr.max_pic_num, 16);
        // Ceil(Log2(300 / 10 + 1)) = 5 bits.
        assert_eq!(hdr.slice_group_change_cycle, 21);
        assert_eq!(hdr.size, 5);
    }

    #[test]
    fn slice_group_change_rate_out_of_range() {
        let (spses, _) = parameter_sets(SPS_BASELINE, &[]);
        assert_eq!(spses[&0].pic_size_in_map_units(), 300);
        let parser = Parser::default();

        // SliceGroupChangeRate may equal PicSizeInMapUnits but not exceed it.
        let data = from_hex("685114012cc710");
        let pps = parser
            .parse_pps(&Nalu::from_unit(&data).unwrap(), Some(&spses))
            .unwrap();
        assert_eq!(pps.slice_group_change_rate(), 300);

        let data = from_hex("685114012dc710");
        assert!(parser
            .parse_pps(&Nalu::from_unit(&data).unwrap(), Some(&spses))
            .is_err());

        // A rate of 2^32 - 1 can't be checked without the SPS, so the slice
        // header has to catch it.
        let data = from_hex("6851140000030003ffffffff1c40");
        let nalu = Nalu::from_unit(&data).unwrap();
        assert!(parser.parse_pps(&nalu, Some(&spses)).is_err());

        let pps = Parser::new(ParserOptions {
            allow_missing_sps: true,
        })
        .parse_pps(&nalu, None)
        .unwrap();
        assert_eq!(pps.slice_group_change_rate_minus1, 0xfffffffe);

        let mut ppses = BTreeMap::new();
        ppses.insert(pps.pic_parameter_set_id, pps);

        let data = from_hex(SLICE_P_SLICE_GROUPS);
        let err = parser
            .parse_slice_header(&Nalu::from_unit(&data).unwrap(), &spses, &ppses)
            .unwrap_err();
        assert!(err
            .root_cause()
            .to_string()
            .contains("exceeds PicSizeInMapUnits 300"));
    }

    #[test]
    fn slice_type_without_parameter_sets() {
        let data = from_hex("25888040ffde08e47a7bff05ab");
        let nalu = Nalu::from_unit(&data).unwrap();
        assert_eq!(
            Parser::default().parse_slice_type(&nalu).unwrap(),
            SliceType::I
        );
    }

    #[test]
    fn missing_parameter_sets() {
        let (spses, ppses) = parameter_sets(SPS_BASELINE, &[PPS_BASELINE]);
        let data = from_hex(SLICE_IDR_BASELINE);
        let nalu = Nalu::from_unit(&data).unwrap();
        let parser = Parser::default();

        let err = parser
            .parse_slice_header(&nalu, &spses, &BTreeMap::new())
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<ParseError>(),
            Some(&ParseError::MissingParameterSet { kind: "PPS", id: 0 })
        );

        let err = parser
            .parse_slice_header(&nalu, &BTreeMap::new(), &ppses)
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<ParseError>(),
            Some(&ParseError::MissingParameterSet { kind: "SPS", id: 0 })
        );

        let sps = from_hex(SPS_BASELINE);
        let err = parser
            .parse_slice_header(&Nalu::from_unit(&sps).unwrap(), &spses, &ppses)
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<ParseError>(),
            Some(&ParseError::UnexpectedNaluType {
                expected: "slice",
                found: 7
            })
        );

        let err = parser.parse_sps(&nalu).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ParseError>(),
            Some(ParseError::UnexpectedNaluType { found: 5, .. })
        ));
    }

    #[test]
    fn truncated_sps() {
        let data = from_hex(SPS_HIGH);
        let err = Parser::default()
            .parse_sps(&Nalu::from_unit(&data[..4]).unwrap())
            .unwrap_err();

        assert_eq!(
            err.downcast_ref::<ReadBitsError>(),
            Some(&ReadBitsError::OutOfBits)
        );
    }

    #[test]
    fn invalid_sps_crop_width() {
        // This SPS contains invalid frame_crop_*_offset settings. The crop
        // window must be rejected rather than underflow.
        let invalid_sps = vec![
            0x00, 0x00, 0x01, 0x07, 0x00, 0x00, 0x0a, 0xfb, 0xb0, 0x32, 0xc0, 0xca, 0x80,
        ];

        let mut cursor = Cursor::new(invalid_sps.as_ref());
        let parser = Parser::default();

        while let Ok(nalu) = Nalu::next(&mut cursor) {
            assert_eq!(nalu.header.type_, NaluType::Sps);
            parser.parse_sps(&nalu).unwrap_err();
        }
    }

    #[test]
    fn max_long_term_frame_idx() {
        assert_eq!(
            MaxLongTermFrameIdx::from_value_plus1(0),
            MaxLongTermFrameIdx::NoLongTermFrameIndices
        );
        assert_eq!(
            MaxLongTermFrameIdx::NoLongTermFrameIndices.to_value_plus1(),
            0
        );

        assert_eq!(
            MaxLongTermFrameIdx::from_value_plus1(1),
            MaxLongTermFrameIdx::Idx(0)
        );
        assert_eq!(MaxLongTermFrameIdx::Idx(0).to_value_plus1(), 1);

        assert_eq!(
            MaxLongTermFrameIdx::from_value_plus1(25),
            MaxLongTermFrameIdx::Idx(24)
        );
        assert_eq!(MaxLongTermFrameIdx::Idx(24).to_value_plus1(), 25);
    }
}
