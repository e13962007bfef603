#![no_main]

use std::collections::BTreeMap;

use cros_bitstream::codec::h265::parser::Nalu;
use cros_bitstream::codec::h265::parser::NaluType;
use cros_bitstream::codec::h265::parser::Parser;
use cros_bitstream::codec::h265::parser::Pps;
use cros_bitstream::codec::h265::parser::Sps;
use cros_bitstream::codec::h265::parser::Vps;
use cros_bitstream::codec::h265::synthesizer::Synthesizer;
use cros_bitstream::utils::nalu::NalIterator;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let parser = Parser::default();
    let mut spses = BTreeMap::new();
    let mut ppses = BTreeMap::new();

    for nalu in NalIterator::<Nalu>::new(data) {
        let mut out = Vec::new();

        match nalu.header.type_ {
            NaluType::VpsNut => {
                if let Ok(vps) = parser.parse_vps(&nalu) {
                    let _ = Synthesizer::<'_, Vps, _>::synthesize(&vps, &mut out, true);
                }
            }
            NaluType::SpsNut => {
                if let Ok(sps) = parser.parse_sps(&nalu) {
                    let _ = Synthesizer::<'_, Sps, _>::synthesize(&sps, &mut out, true);
                    spses.insert(sps.seq_parameter_set_id, sps);
                }
            }
            NaluType::PpsNut => {
                if let Ok(pps) = parser.parse_pps(&nalu, Some(&spses)) {
                    let _ = Synthesizer::<'_, Pps, _>::synthesize(&pps, &mut out, true);
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
