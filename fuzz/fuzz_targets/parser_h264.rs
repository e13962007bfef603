#![no_main]

use std::collections::BTreeMap;

use cros_bitstream::codec::h264::parser::Nalu;
use cros_bitstream::codec::h264::parser::NaluType;
use cros_bitstream::codec::h264::parser::Parser;
use cros_bitstream::codec::h264::parser::ParserOptions;
use cros_bitstream::codec::h264::parser::Sps;
use cros_bitstream::codec::h264::synthesizer::Synthesizer;
use cros_bitstream::utils::nalu::NalIterator;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let parser = Parser::new(ParserOptions {
        allow_missing_sps: true,
    });
    let mut spses = BTreeMap::new();
    let mut ppses = BTreeMap::new();

    for nalu in NalIterator::<Nalu>::new(data) {
        match nalu.header.type_ {
            NaluType::Sps => {
                if let Ok(sps) = parser.parse_sps(&nalu) {
                    let mut out = Vec::new();
                    let ref_idc = nalu.header.ref_idc;
                    let _ = Synthesizer::<'_, Sps, _>::synthesize(ref_idc, &sps, &mut out, true);
                    spses.insert(sps.seq_parameter_set_id, sps);
                }
            }
            NaluType::Pps => {
                if let Ok(pps) = parser.parse_pps(&nalu, Some(&spses)) {
                    ppses.insert(pps.pic_parameter_set_id, pps);
                }
            }
            type_ if type_.is_video() => {
                let _ = parser.parse_slice_header(&nalu, &spses, &ppses);
            }
            _ => (),
        }
    }
});
