// Sigrun
// Copyright (c) 2026 The Project Sigrun Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! SPI bus decoder.
//!
//! Frames words of 4 to 32 bits off a clock line in any of the four CPOL/CPHA modes, with
//! optional chip-select framing and either bit order, decoding the MOSI and MISO lines that
//! are mapped.

use log::debug;

use sigrun_core::support_protocol;

use sigrun_core::annotation::{Annotation, AnnotationBuffer, RawData};
use sigrun_core::decoder::{
    AnnotationDesc, ChannelDesc, ChunkSpan, Decoder, DecoderDescriptor, DecoderParams, OptionDefault,
    OptionDesc, OptionType, Options, RowDesc, PROTOCOL_SPI,
};
use sigrun_core::errors::{bad_config_error, Result};
use sigrun_core::sample::SampleSource;
use sigrun_core::wait::{Conj, Term, WaitCond, WaitMatch, WaitOutcome, Waiter};

pub const ANN_DATA_MOSI: u16 = 0;
pub const ANN_DATA_MISO: u16 = 1;
pub const ANN_FRAME: u16 = 2;
pub const ANN_WARNING: u16 = 3;

const CHANNELS: &[ChannelDesc] = &[
    ChannelDesc { id: "clk", name: "CLK", desc: "Serial clock", required: true, index: 0 },
    ChannelDesc { id: "mosi", name: "MOSI", desc: "Master out, slave in", required: false, index: 1 },
    ChannelDesc { id: "miso", name: "MISO", desc: "Master in, slave out", required: false, index: 2 },
    ChannelDesc { id: "cs", name: "CS#", desc: "Chip select", required: false, index: 3 },
];

const OPTIONS: &[OptionDesc] = &[
    OptionDesc {
        id: "cpol",
        desc: "Clock polarity",
        ty: OptionType::Int,
        default: OptionDefault::Int(0),
        allowed_values: &[],
        min: Some(0),
        max: Some(1),
    },
    OptionDesc {
        id: "cpha",
        desc: "Clock phase",
        ty: OptionType::Int,
        default: OptionDefault::Int(0),
        allowed_values: &[],
        min: Some(0),
        max: Some(1),
    },
    OptionDesc {
        id: "bit_order",
        desc: "Bit order of a word",
        ty: OptionType::Enum,
        default: OptionDefault::Str("msb-first"),
        allowed_values: &["msb-first", "lsb-first"],
        min: None,
        max: None,
    },
    OptionDesc {
        id: "word_size",
        desc: "Bits per word",
        ty: OptionType::Int,
        default: OptionDefault::Int(8),
        allowed_values: &[],
        min: Some(4),
        max: Some(32),
    },
    OptionDesc {
        id: "cs_polarity",
        desc: "Chip select polarity",
        ty: OptionType::Enum,
        default: OptionDefault::Str("active-low"),
        allowed_values: &["active-low", "active-high"],
        min: None,
        max: None,
    },
];

const ANNOTATIONS: &[AnnotationDesc] = &[
    AnnotationDesc { kind: ANN_DATA_MOSI, short: "data-mosi", long: "MOSI data", abbr: None },
    AnnotationDesc { kind: ANN_DATA_MISO, short: "data-miso", long: "MISO data", abbr: None },
    AnnotationDesc { kind: ANN_FRAME, short: "frame", long: "Word frame", abbr: None },
    AnnotationDesc { kind: ANN_WARNING, short: "warning", long: "Warning", abbr: None },
];

const ROWS: &[RowDesc] = &[
    RowDesc { id: "mosi-data", name: "MOSI data", kinds: &[ANN_DATA_MOSI] },
    RowDesc { id: "miso-data", name: "MISO data", kinds: &[ANN_DATA_MISO] },
    RowDesc { id: "frames", name: "Frames", kinds: &[ANN_FRAME] },
    RowDesc { id: "warnings", name: "Warnings", kinds: &[ANN_WARNING] },
];

static DESCRIPTOR: DecoderDescriptor = support_protocol!(
    SpiDecoder,
    id: PROTOCOL_SPI,
    short_name: "spi",
    long_name: "Serial Peripheral Interface",
    description: "Full-duplex, synchronous, serial bus.",
    license: "MPL-2.0",
    inputs: &["logic"],
    outputs: &["spi"],
    tags: &["embedded", "bus"],
    channels: CHANNELS,
    options: OPTIONS,
    annotations: ANNOTATIONS,
    annotation_rows: ROWS,
    warning_kind: Some(ANN_WARNING),
);

// Alternative indices of the in-frame wait.
const MATCH_CLOCK: u64 = 1 << 0;
const MATCH_DEASSERT: u64 = 1 << 1;

/// SPI bus decoder.
pub struct SpiDecoder {
    clk: u16,
    mosi: Option<u16>,
    miso: Option<u16>,
    cs: Option<u16>,

    /// The clock edge data is captured on. Modes 0 and 3 (CPOL == CPHA) capture on the rising
    /// edge, modes 1 and 2 on the falling edge.
    capture_edge: Term,
    msb_first: bool,
    word_size: u32,
    /// The logical level at which chip select is asserted.
    cs_active: u8,

    waiter: Waiter,

    in_frame: bool,
    bit_count: u32,
    word_mosi: u32,
    word_miso: u32,
    first_edge: u64,
    last_edge: u64,
}

impl SpiDecoder {
    fn clear_word(&mut self) {
        self.bit_count = 0;
        self.word_mosi = 0;
        self.word_miso = 0;
    }

    fn step(&mut self, src: &SampleSource<'_>, sink: &mut AnnotationBuffer) -> bool {
        if let Some(cs) = self.cs {
            if !self.in_frame {
                // A level term matches the first asserted sample, covering both a select edge
                // and a chip select already asserted when the capture begins.
                let active = if self.cs_active == 0 { Term::Low } else { Term::High };
                return match self.waiter.wait(src, &WaitCond::single(Conj::new().term(cs, active))) {
                    WaitOutcome::Match(_) => {
                        self.in_frame = true;
                        self.clear_word();
                        true
                    }
                    WaitOutcome::End => false,
                };
            }

            let deassert = if self.cs_active == 0 { Term::Rising } else { Term::Falling };
            let cond = WaitCond::any([
                Conj::new().term(self.clk, self.capture_edge),
                Conj::new().term(cs, deassert),
            ]);

            return match self.waiter.wait(src, &cond) {
                WaitOutcome::Match(m) => {
                    if m.matched & MATCH_DEASSERT != 0 {
                        self.on_deassert(m.at, sink);
                    }
                    else if m.matched & MATCH_CLOCK != 0 {
                        self.on_capture_edge(&m, sink);
                    }
                    true
                }
                WaitOutcome::End => false,
            };
        }

        // No chip select: word boundaries are purely bit count from the start of the stream.
        match self.waiter.wait(src, &WaitCond::single(Conj::new().term(self.clk, self.capture_edge))) {
            WaitOutcome::Match(m) => {
                self.on_capture_edge(&m, sink);
                true
            }
            WaitOutcome::End => false,
        }
    }

    fn on_capture_edge(&mut self, m: &WaitMatch, sink: &mut AnnotationBuffer) {
        if self.bit_count == 0 {
            self.first_edge = m.at;
        }
        self.last_edge = m.at;

        let mosi_bit = self.mosi.map(|ch| m.pins.get(ch)).unwrap_or(0);
        let miso_bit = self.miso.map(|ch| m.pins.get(ch)).unwrap_or(0);

        if self.msb_first {
            self.word_mosi = (self.word_mosi << 1) | u32::from(mosi_bit);
            self.word_miso = (self.word_miso << 1) | u32::from(miso_bit);
        }
        else {
            self.word_mosi |= u32::from(mosi_bit) << self.bit_count;
            self.word_miso |= u32::from(miso_bit) << self.bit_count;
        }

        self.bit_count += 1;
        if self.bit_count == self.word_size {
            self.finish_word(sink);
        }
    }

    fn finish_word(&mut self, sink: &mut AnnotationBuffer) {
        let width = (self.word_size as usize + 3) / 4;
        let start = self.first_edge;
        let end = self.last_edge;

        if self.mosi.is_some() {
            sink.put(Annotation::new(
                start,
                end,
                ANN_DATA_MOSI,
                vec![format!("MOSI: {:0w$X}", self.word_mosi, w = width), format!("{:0w$X}", self.word_mosi, w = width)],
                RawData::Word(self.word_mosi),
            ));
        }
        if self.miso.is_some() {
            sink.put(Annotation::new(
                start,
                end,
                ANN_DATA_MISO,
                vec![format!("MISO: {:0w$X}", self.word_miso, w = width), format!("{:0w$X}", self.word_miso, w = width)],
                RawData::Word(self.word_miso),
            ));
        }

        sink.put(Annotation::new(
            start,
            end,
            ANN_FRAME,
            vec![format!("{}-bit word", self.word_size), "Word".to_string()],
            RawData::None,
        ));

        self.clear_word();
    }

    fn on_deassert(&mut self, at: u64, sink: &mut AnnotationBuffer) {
        if self.bit_count > 0 {
            debug!("spi: chip select deasserted mid-word after {} bit(s)", self.bit_count);
            sink.put(Annotation::new(
                self.first_edge,
                at,
                ANN_WARNING,
                vec![
                    format!("Short word: {} of {} bits", self.bit_count, self.word_size),
                    "Short word".to_string(),
                ],
                RawData::None,
            ));
        }

        self.in_frame = false;
        self.clear_word();
    }
}

impl Decoder for SpiDecoder {
    fn try_new(params: &DecoderParams<'_>) -> Result<Self> {
        params.check(&DESCRIPTOR)?;

        let mosi = params.mapping.get("mosi");
        let miso = params.mapping.get("miso");
        if mosi.is_none() && miso.is_none() {
            return bad_config_error("at least one of MOSI or MISO must be mapped");
        }

        let opts = Options::new(DESCRIPTOR.options, params.options);
        let cpol = opts.int("cpol")?;
        let cpha = opts.int("cpha")?;
        let msb_first = opts.str("bit_order")? == "msb-first";
        let word_size = opts.int("word_size")? as u32;
        let cs_active = if opts.str("cs_polarity")? == "active-high" { 1 } else { 0 };

        Ok(SpiDecoder {
            // The clock role is guaranteed mapped by the check above.
            clk: params.mapping.get("clk").unwrap(),
            mosi,
            miso,
            cs: params.mapping.get("cs"),
            capture_edge: if cpol == cpha { Term::Rising } else { Term::Falling },
            msb_first,
            word_size,
            cs_active,
            waiter: Waiter::new(0),
            in_frame: false,
            bit_count: 0,
            word_mosi: 0,
            word_miso: 0,
            first_edge: 0,
            last_edge: 0,
        })
    }

    fn supported_protocols() -> &'static [DecoderDescriptor] {
        std::slice::from_ref(&DESCRIPTOR)
    }

    fn descriptor(&self) -> &'static DecoderDescriptor {
        &DESCRIPTOR
    }

    fn reset(&mut self) {
        self.waiter.reset();
        self.in_frame = false;
        self.first_edge = 0;
        self.last_edge = 0;
        self.clear_word();
    }

    fn process_chunk(
        &mut self,
        src: &SampleSource<'_>,
        span: ChunkSpan,
        sink: &mut AnnotationBuffer,
    ) -> Result<()> {
        self.waiter.set_limit(span.end.min(src.total_len()));
        while self.step(src, sink) {}

        // Without a chip select edge to judge it by, a partial word at the end of the capture
        // is simply dropped.
        if span.is_last && self.bit_count > 0 {
            debug!("spi: discarding a {}-bit partial word at end of capture", self.bit_count);
        }
        Ok(())
    }
}
