// Sigrun
// Copyright (c) 2026 The Project Sigrun Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! UART serial line decoder.
//!
//! Detects start bits, samples data bits at a configurable point of the bit period, checks
//! parity and stop bits, flags framing errors and break conditions, and groups decoded words
//! into packets. The RX and TX lines decode independently with identical logic; each line owns
//! its own annotation rows.

use log::debug;

use sigrun_core::support_protocol;

use sigrun_core::annotation::{Annotation, AnnotationBuffer, RawData};
use sigrun_core::decoder::{
    AnnotationDesc, ChannelDesc, ChunkSpan, Decoder, DecoderDescriptor, DecoderParams, OptionDefault,
    OptionDesc, OptionType, Options, RowDesc, PROTOCOL_UART,
};
use sigrun_core::errors::{bad_config_error, Result};
use sigrun_core::sample::SampleSource;
use sigrun_core::wait::{Conj, Term, WaitCond, WaitOutcome, Waiter};

pub const ANN_RX_DATA: u16 = 0;
pub const ANN_TX_DATA: u16 = 1;
pub const ANN_RX_START: u16 = 2;
pub const ANN_TX_START: u16 = 3;
pub const ANN_RX_PARITY_OK: u16 = 4;
pub const ANN_TX_PARITY_OK: u16 = 5;
pub const ANN_RX_PARITY_ERR: u16 = 6;
pub const ANN_TX_PARITY_ERR: u16 = 7;
pub const ANN_RX_STOP: u16 = 8;
pub const ANN_TX_STOP: u16 = 9;
pub const ANN_RX_WARNING: u16 = 10;
pub const ANN_TX_WARNING: u16 = 11;
pub const ANN_RX_DATA_BIT: u16 = 12;
pub const ANN_TX_DATA_BIT: u16 = 13;
pub const ANN_RX_BREAK: u16 = 14;
pub const ANN_TX_BREAK: u16 = 15;
pub const ANN_RX_PACKET: u16 = 16;
pub const ANN_TX_PACKET: u16 = 17;

const CHANNELS: &[ChannelDesc] = &[
    ChannelDesc { id: "rx", name: "RX", desc: "Receive line", required: false, index: 0 },
    ChannelDesc { id: "tx", name: "TX", desc: "Transmit line", required: false, index: 1 },
];

const OPTIONS: &[OptionDesc] = &[
    OptionDesc {
        id: "baudrate",
        desc: "Baud rate",
        ty: OptionType::Int,
        default: OptionDefault::Int(115_200),
        allowed_values: &[],
        min: Some(1),
        max: None,
    },
    OptionDesc {
        id: "data_bits",
        desc: "Data bits per frame",
        ty: OptionType::Int,
        default: OptionDefault::Int(8),
        allowed_values: &[],
        min: Some(5),
        max: Some(9),
    },
    OptionDesc {
        id: "parity",
        desc: "Parity mode",
        ty: OptionType::Enum,
        default: OptionDefault::Str("none"),
        allowed_values: &["none", "odd", "even", "zero", "one", "ignore"],
        min: None,
        max: None,
    },
    OptionDesc {
        id: "stop_bits",
        desc: "Stop bits per frame",
        ty: OptionType::Float,
        default: OptionDefault::Float(1.0),
        allowed_values: &[],
        min: None,
        max: None,
    },
    OptionDesc {
        id: "bit_order",
        desc: "Bit order of a data word",
        ty: OptionType::Enum,
        default: OptionDefault::Str("lsb-first"),
        allowed_values: &["lsb-first", "msb-first"],
        min: None,
        max: None,
    },
    OptionDesc {
        id: "invert_rx",
        desc: "Invert the RX line",
        ty: OptionType::Bool,
        default: OptionDefault::Bool(false),
        allowed_values: &[],
        min: None,
        max: None,
    },
    OptionDesc {
        id: "invert_tx",
        desc: "Invert the TX line",
        ty: OptionType::Bool,
        default: OptionDefault::Bool(false),
        allowed_values: &[],
        min: None,
        max: None,
    },
    // Out-of-range sample points clamp to the nearest endpoint with a one-time warning rather
    // than failing the configuration.
    OptionDesc {
        id: "sample_point",
        desc: "Sample point as a percentage of the bit period",
        ty: OptionType::Int,
        default: OptionDefault::Int(50),
        allowed_values: &[],
        min: None,
        max: None,
    },
    OptionDesc {
        id: "packet_words",
        desc: "Words per packet before it is closed",
        ty: OptionType::Int,
        default: OptionDefault::Int(16),
        allowed_values: &[],
        min: Some(1),
        max: Some(1024),
    },
];

const ANNOTATIONS: &[AnnotationDesc] = &[
    AnnotationDesc { kind: ANN_RX_DATA, short: "rx-data", long: "RX data", abbr: None },
    AnnotationDesc { kind: ANN_TX_DATA, short: "tx-data", long: "TX data", abbr: None },
    AnnotationDesc { kind: ANN_RX_START, short: "rx-start", long: "RX start bit", abbr: Some("S") },
    AnnotationDesc { kind: ANN_TX_START, short: "tx-start", long: "TX start bit", abbr: Some("S") },
    AnnotationDesc { kind: ANN_RX_PARITY_OK, short: "rx-parity-ok", long: "RX parity OK", abbr: Some("P") },
    AnnotationDesc { kind: ANN_TX_PARITY_OK, short: "tx-parity-ok", long: "TX parity OK", abbr: Some("P") },
    AnnotationDesc {
        kind: ANN_RX_PARITY_ERR,
        short: "rx-parity-error",
        long: "RX parity error",
        abbr: Some("PE"),
    },
    AnnotationDesc {
        kind: ANN_TX_PARITY_ERR,
        short: "tx-parity-error",
        long: "TX parity error",
        abbr: Some("PE"),
    },
    AnnotationDesc { kind: ANN_RX_STOP, short: "rx-stop", long: "RX stop bit", abbr: Some("T") },
    AnnotationDesc { kind: ANN_TX_STOP, short: "tx-stop", long: "TX stop bit", abbr: Some("T") },
    AnnotationDesc { kind: ANN_RX_WARNING, short: "rx-warning", long: "RX warning", abbr: None },
    AnnotationDesc { kind: ANN_TX_WARNING, short: "tx-warning", long: "TX warning", abbr: None },
    AnnotationDesc { kind: ANN_RX_DATA_BIT, short: "rx-data-bit", long: "RX data bit", abbr: None },
    AnnotationDesc { kind: ANN_TX_DATA_BIT, short: "tx-data-bit", long: "TX data bit", abbr: None },
    AnnotationDesc { kind: ANN_RX_BREAK, short: "rx-break", long: "RX break condition", abbr: None },
    AnnotationDesc { kind: ANN_TX_BREAK, short: "tx-break", long: "TX break condition", abbr: None },
    AnnotationDesc { kind: ANN_RX_PACKET, short: "rx-packet", long: "RX packet", abbr: None },
    AnnotationDesc { kind: ANN_TX_PACKET, short: "tx-packet", long: "TX packet", abbr: None },
];

const ROWS: &[RowDesc] = &[
    RowDesc { id: "rx-bits", name: "RX bits", kinds: &[ANN_RX_DATA_BIT] },
    RowDesc {
        id: "rx-frame",
        name: "RX frame",
        kinds: &[ANN_RX_START, ANN_RX_DATA, ANN_RX_PARITY_OK, ANN_RX_PARITY_ERR, ANN_RX_STOP],
    },
    RowDesc { id: "rx-warnings", name: "RX warnings", kinds: &[ANN_RX_WARNING] },
    RowDesc { id: "rx-breaks", name: "RX breaks", kinds: &[ANN_RX_BREAK] },
    RowDesc { id: "rx-packets", name: "RX packets", kinds: &[ANN_RX_PACKET] },
    RowDesc { id: "tx-bits", name: "TX bits", kinds: &[ANN_TX_DATA_BIT] },
    RowDesc {
        id: "tx-frame",
        name: "TX frame",
        kinds: &[ANN_TX_START, ANN_TX_DATA, ANN_TX_PARITY_OK, ANN_TX_PARITY_ERR, ANN_TX_STOP],
    },
    RowDesc { id: "tx-warnings", name: "TX warnings", kinds: &[ANN_TX_WARNING] },
    RowDesc { id: "tx-breaks", name: "TX breaks", kinds: &[ANN_TX_BREAK] },
    RowDesc { id: "tx-packets", name: "TX packets", kinds: &[ANN_TX_PACKET] },
];

static DESCRIPTOR: DecoderDescriptor = support_protocol!(
    UartDecoder,
    id: PROTOCOL_UART,
    short_name: "uart",
    long_name: "Universal Asynchronous Receiver-Transmitter",
    description: "Asynchronous, serial bus.",
    license: "MPL-2.0",
    inputs: &["logic"],
    outputs: &["uart"],
    tags: &["embedded", "bus"],
    channels: CHANNELS,
    options: OPTIONS,
    annotations: ANNOTATIONS,
    annotation_rows: ROWS,
    warning_kind: Some(ANN_RX_WARNING),
);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Parity {
    None,
    Odd,
    Even,
    Zero,
    One,
    Ignore,
}

impl Parity {
    fn from_str(s: &str) -> Self {
        match s {
            "odd" => Parity::Odd,
            "even" => Parity::Even,
            "zero" => Parity::Zero,
            "one" => Parity::One,
            "ignore" => Parity::Ignore,
            _ => Parity::None,
        }
    }
}

/// Settings shared by both decoded lines.
#[derive(Copy, Clone, Debug)]
struct UartConfig {
    /// Samples per bit period.
    bit_width: f64,
    /// Fraction of the bit period at which a bit is sampled.
    sample_point: f64,
    data_bits: u32,
    parity: Parity,
    stop_bits: f64,
    msb_first: bool,
    /// Samples per frame, rounded up. Also the break detection threshold and the idle gap that
    /// closes a packet.
    frame_len: u64,
    packet_words: usize,
}

impl UartConfig {
    fn n_stop_samples(&self) -> u32 {
        self.stop_bits.ceil() as u32
    }

    fn parity_bits(&self) -> u32 {
        (self.parity != Parity::None) as u32
    }

    fn half_cell(&self) -> u64 {
        (self.bit_width / 2.0).floor() as u64
    }

    fn hex_width(&self) -> usize {
        (self.data_bits as usize + 3) / 4
    }
}

/// The annotation kinds of one line.
#[derive(Copy, Clone, Debug)]
struct LineKinds {
    data: u16,
    start: u16,
    parity_ok: u16,
    parity_err: u16,
    stop: u16,
    warning: u16,
    data_bit: u16,
    brk: u16,
    packet: u16,
}

const RX_KINDS: LineKinds = LineKinds {
    data: ANN_RX_DATA,
    start: ANN_RX_START,
    parity_ok: ANN_RX_PARITY_OK,
    parity_err: ANN_RX_PARITY_ERR,
    stop: ANN_RX_STOP,
    warning: ANN_RX_WARNING,
    data_bit: ANN_RX_DATA_BIT,
    brk: ANN_RX_BREAK,
    packet: ANN_RX_PACKET,
};

const TX_KINDS: LineKinds = LineKinds {
    data: ANN_TX_DATA,
    start: ANN_TX_START,
    parity_ok: ANN_TX_PARITY_OK,
    parity_err: ANN_TX_PARITY_ERR,
    stop: ANN_TX_STOP,
    warning: ANN_TX_WARNING,
    data_bit: ANN_TX_DATA_BIT,
    brk: ANN_TX_BREAK,
    packet: ANN_TX_PACKET,
};

/// The explicit per-frame state table. Each state samples at most one bit position per wait, so
/// a chunk boundary can suspend and resume the machine anywhere.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum FrameState {
    WaitStart,
    GetStart,
    GetData,
    GetParity,
    GetStop,
    /// Skipping over a detected break condition; the annotation is already emitted.
    InBreak { end: u64 },
}

/// One independently decoded line.
struct LineDecoder {
    channel: u16,
    invert: bool,
    kinds: LineKinds,

    waiter: Waiter,
    state: FrameState,

    frame_start: u64,
    frame_valid: bool,
    bit_index: u32,
    stop_index: u32,
    word: u32,
    idle_start: u64,

    packet_words: Vec<u32>,
    packet_start: u64,
    packet_end: u64,
}

impl LineDecoder {
    fn new(channel: u16, invert: bool, kinds: LineKinds) -> Self {
        LineDecoder {
            channel,
            invert,
            kinds,
            waiter: Waiter::new(0),
            state: FrameState::WaitStart,
            frame_start: 0,
            frame_valid: false,
            bit_index: 0,
            stop_index: 0,
            word: 0,
            idle_start: 0,
            packet_words: Vec::new(),
            packet_start: 0,
            packet_end: 0,
        }
    }

    fn reset(&mut self) {
        self.waiter.reset();
        self.state = FrameState::WaitStart;
        self.frame_start = 0;
        self.frame_valid = false;
        self.bit_index = 0;
        self.stop_index = 0;
        self.word = 0;
        self.idle_start = 0;
        self.packet_words.clear();
    }

    /// The logical level of the line at `k`, after option-level inversion.
    fn level(&self, src: &SampleSource<'_>, k: u64) -> u8 {
        src.bit(self.channel, k) ^ u8::from(self.invert)
    }

    /// The logical low level on the wire, for run-length queries.
    fn low_level(&self) -> u8 {
        u8::from(self.invert)
    }

    fn falling(&self) -> Term {
        if self.invert {
            Term::Rising
        }
        else {
            Term::Falling
        }
    }

    /// The rounded sample index of bit position `pos` (in bit periods from the frame start) at
    /// the configured sample point.
    fn target(&self, cfg: &UartConfig, pos: f64) -> u64 {
        self.frame_start + ((pos + cfg.sample_point) * cfg.bit_width).round() as u64
    }

    /// Advance the line's state machine until the chunk is exhausted.
    fn run(&mut self, src: &SampleSource<'_>, limit: u64, cfg: &UartConfig, sink: &mut AnnotationBuffer) {
        self.waiter.set_limit(limit);
        while self.step(src, cfg, sink) {}
    }

    fn step(&mut self, src: &SampleSource<'_>, cfg: &UartConfig, sink: &mut AnnotationBuffer) -> bool {
        match self.state {
            FrameState::WaitStart => self.wait_start(src, cfg, sink),
            FrameState::GetStart => self.get_start(src, cfg, sink),
            FrameState::GetData => self.get_data(src, cfg, sink),
            FrameState::GetParity => self.get_parity(src, cfg, sink),
            FrameState::GetStop => self.get_stop(src, cfg, sink),
            FrameState::InBreak { end } => match self.waiter.wait(src, &WaitCond::skip_to(end)) {
                WaitOutcome::Match(_) => {
                    self.state = FrameState::WaitStart;
                    true
                }
                WaitOutcome::End => false,
            },
        }
    }

    fn wait_start(&mut self, src: &SampleSource<'_>, cfg: &UartConfig, sink: &mut AnnotationBuffer) -> bool {
        let cond = WaitCond::single(Conj::new().term(self.channel, self.falling()));

        match self.waiter.wait(src, &cond) {
            WaitOutcome::Match(m) => {
                // A gap of at least one frame length since the last frame is an idle period;
                // idle closes the running packet but produces no annotation of its own.
                if m.at.saturating_sub(self.idle_start) >= cfg.frame_len {
                    self.close_packet(cfg, sink);
                }

                // The run length is measured on the full capture, so break decisions are
                // independent of chunk boundaries.
                let run = src.level_run(self.channel, m.at, self.low_level());
                if run >= cfg.frame_len {
                    let end = m.at + run;
                    sink.put(Annotation::new(
                        m.at,
                        end - 1,
                        self.kinds.brk,
                        vec!["Break condition".to_string(), "Break".to_string()],
                        RawData::None,
                    ));
                    self.close_packet(cfg, sink);
                    self.idle_start = end;
                    self.state = FrameState::InBreak { end };
                    return true;
                }

                self.frame_start = m.at;
                self.frame_valid = true;
                self.bit_index = 0;
                self.stop_index = 0;
                self.word = 0;
                self.state = FrameState::GetStart;
                true
            }
            WaitOutcome::End => false,
        }
    }

    fn get_start(&mut self, src: &SampleSource<'_>, cfg: &UartConfig, sink: &mut AnnotationBuffer) -> bool {
        let target = self.target(cfg, 0.0);

        match self.waiter.wait(src, &WaitCond::skip_to(target)) {
            WaitOutcome::Match(m) => {
                let bit = self.level(src, m.at);
                if bit != 0 {
                    // The line bounced back high before the sample point: not a real frame.
                    sink.put(Annotation::new(
                        self.frame_start,
                        m.at,
                        self.kinds.warning,
                        vec!["Frame error: start bit not low".to_string(), "Frame error".to_string()],
                        RawData::None,
                    ));
                    self.close_packet(cfg, sink);
                    self.state = FrameState::WaitStart;
                    return true;
                }

                sink.put(Annotation::new(
                    self.frame_start,
                    self.frame_start + cfg.bit_width.round() as u64,
                    self.kinds.start,
                    vec!["Start bit".to_string(), "S".to_string()],
                    RawData::Bit(0),
                ));
                self.state = FrameState::GetData;
                true
            }
            WaitOutcome::End => false,
        }
    }

    fn get_data(&mut self, src: &SampleSource<'_>, cfg: &UartConfig, sink: &mut AnnotationBuffer) -> bool {
        let target = self.target(cfg, f64::from(1 + self.bit_index));

        match self.waiter.wait(src, &WaitCond::skip_to(target)) {
            WaitOutcome::Match(m) => {
                let bit = self.level(src, m.at);

                let half = cfg.half_cell();
                sink.put(Annotation::new(
                    m.at - half,
                    m.at + half,
                    self.kinds.data_bit,
                    vec![bit.to_string()],
                    RawData::Bit(bit),
                ));

                if cfg.msb_first {
                    self.word = (self.word << 1) | u32::from(bit);
                }
                else {
                    self.word |= u32::from(bit) << self.bit_index;
                }

                self.bit_index += 1;
                if self.bit_index == cfg.data_bits {
                    self.emit_data(cfg, sink);
                    self.state = if cfg.parity != Parity::None {
                        FrameState::GetParity
                    }
                    else if cfg.n_stop_samples() > 0 {
                        FrameState::GetStop
                    }
                    else {
                        self.complete_frame(cfg, sink);
                        FrameState::WaitStart
                    };
                }
                true
            }
            WaitOutcome::End => false,
        }
    }

    fn emit_data(&mut self, cfg: &UartConfig, sink: &mut AnnotationBuffer) {
        let start = self.frame_start + cfg.bit_width.round() as u64;
        let end =
            self.frame_start + (f64::from(1 + cfg.data_bits) * cfg.bit_width).round() as u64;

        let raw = if cfg.data_bits <= 8 {
            RawData::Byte(self.word as u8)
        }
        else {
            RawData::Word(self.word)
        };

        sink.put(Annotation::new(
            start,
            end,
            self.kinds.data,
            vec![format!("{:0w$X}", self.word, w = cfg.hex_width()), format!("{}", self.word)],
            raw,
        ));
    }

    fn get_parity(&mut self, src: &SampleSource<'_>, cfg: &UartConfig, sink: &mut AnnotationBuffer) -> bool {
        let target = self.target(cfg, f64::from(1 + cfg.data_bits));

        match self.waiter.wait(src, &WaitCond::skip_to(target)) {
            WaitOutcome::Match(m) => {
                let bit = self.level(src, m.at);

                let ones = self.word.count_ones() + u32::from(bit);
                let ok = match cfg.parity {
                    Parity::None | Parity::Ignore => true,
                    Parity::Even => ones % 2 == 0,
                    Parity::Odd => ones % 2 == 1,
                    Parity::Zero => bit == 0,
                    Parity::One => bit == 1,
                };

                let half = cfg.half_cell();
                let (kind, values) = if ok {
                    (self.kinds.parity_ok, vec!["Parity OK".to_string(), "P".to_string()])
                }
                else {
                    self.frame_valid = false;
                    (self.kinds.parity_err, vec!["Parity error".to_string(), "PE".to_string()])
                };
                sink.put(Annotation::new(m.at - half, m.at + half, kind, values, RawData::Bit(bit)));

                self.state = if cfg.n_stop_samples() > 0 {
                    FrameState::GetStop
                }
                else {
                    self.complete_frame(cfg, sink);
                    FrameState::WaitStart
                };
                true
            }
            WaitOutcome::End => false,
        }
    }

    fn get_stop(&mut self, src: &SampleSource<'_>, cfg: &UartConfig, sink: &mut AnnotationBuffer) -> bool {
        let pos = f64::from(1 + cfg.data_bits + cfg.parity_bits() + self.stop_index);
        let target = self.target(cfg, pos);

        match self.waiter.wait(src, &WaitCond::skip_to(target)) {
            WaitOutcome::Match(m) => {
                let bit = self.level(src, m.at);
                let half = cfg.half_cell();

                if bit != 1 {
                    self.frame_valid = false;
                    sink.put(Annotation::new(
                        m.at - half,
                        m.at + half,
                        self.kinds.warning,
                        vec!["Frame error: stop bit not high".to_string(), "Frame error".to_string()],
                        RawData::None,
                    ));
                }

                sink.put(Annotation::new(
                    m.at - half,
                    m.at + half,
                    self.kinds.stop,
                    vec![format!("Stop bit: {}", bit), bit.to_string()],
                    RawData::Bit(bit),
                ));

                self.stop_index += 1;
                if self.stop_index == cfg.n_stop_samples() {
                    self.complete_frame(cfg, sink);
                    self.state = FrameState::WaitStart;
                }
                true
            }
            WaitOutcome::End => false,
        }
    }

    fn complete_frame(&mut self, cfg: &UartConfig, sink: &mut AnnotationBuffer) {
        let frame_end = self.frame_start + cfg.frame_len;
        self.idle_start = frame_end;

        if self.frame_valid {
            if self.packet_words.is_empty() {
                self.packet_start = self.frame_start;
            }
            self.packet_words.push(self.word);
            self.packet_end = frame_end;

            if self.packet_words.len() >= cfg.packet_words {
                self.close_packet(cfg, sink);
            }
        }
        else {
            debug!("uart: invalid frame at {} closes the running packet", self.frame_start);
            self.close_packet(cfg, sink);
        }
    }

    fn close_packet(&mut self, cfg: &UartConfig, sink: &mut AnnotationBuffer) {
        if self.packet_words.is_empty() {
            return;
        }

        let rendered: Vec<String> =
            self.packet_words.iter().map(|w| format!("{:0w$X}", w, w = cfg.hex_width())).collect();

        sink.put(Annotation::new(
            self.packet_start,
            self.packet_end,
            self.kinds.packet,
            vec![rendered.join(" "), format!("{} words", self.packet_words.len())],
            RawData::None,
        ));

        self.packet_words.clear();
    }
}

/// UART serial line decoder.
pub struct UartDecoder {
    cfg: UartConfig,
    lines: Vec<LineDecoder>,
    /// Set when the configured sample point was clamped into `[1, 99]`; the warning annotation
    /// is emitted once, ahead of any frame output.
    sample_point_clamped: bool,
    config_warn_pending: bool,
}

impl Decoder for UartDecoder {
    fn try_new(params: &DecoderParams<'_>) -> Result<Self> {
        params.check(&DESCRIPTOR)?;

        let rx = params.mapping.get("rx");
        let tx = params.mapping.get("tx");
        if rx.is_none() && tx.is_none() {
            return bad_config_error("at least one of RX or TX must be mapped");
        }

        let opts = Options::new(DESCRIPTOR.options, params.options);
        let baudrate = opts.int("baudrate")?;
        let data_bits = opts.int("data_bits")? as u32;
        let parity = Parity::from_str(&opts.str("parity")?);
        let stop_bits = opts.float("stop_bits")?;
        let msb_first = opts.str("bit_order")? == "msb-first";
        let packet_words = opts.int("packet_words")? as usize;

        if ![0.0, 0.5, 1.0, 1.5, 2.0].contains(&stop_bits) {
            return bad_config_error("stop bits must be one of 0, 0.5, 1, 1.5, 2");
        }

        let raw_sample_point = opts.int("sample_point")?;
        let sample_point = raw_sample_point.clamp(1, 99);
        let sample_point_clamped = sample_point != raw_sample_point;
        if sample_point_clamped {
            debug!("uart: sample point {} clamped to {}", raw_sample_point, sample_point);
        }

        let bit_width = params.sample_rate as f64 / baudrate as f64;
        let parity_bits = if parity != Parity::None { 1.0 } else { 0.0 };
        let frame_len =
            ((1.0 + f64::from(data_bits) + parity_bits + stop_bits) * bit_width).ceil() as u64;

        let cfg = UartConfig {
            bit_width,
            sample_point: f64::from(sample_point as u32) / 100.0,
            data_bits,
            parity,
            stop_bits,
            msb_first,
            frame_len,
            packet_words,
        };

        let mut lines = Vec::new();
        if let Some(ch) = rx {
            lines.push(LineDecoder::new(ch, opts.bool("invert_rx")?, RX_KINDS));
        }
        if let Some(ch) = tx {
            lines.push(LineDecoder::new(ch, opts.bool("invert_tx")?, TX_KINDS));
        }

        Ok(UartDecoder { cfg, lines, sample_point_clamped, config_warn_pending: sample_point_clamped })
    }

    fn supported_protocols() -> &'static [DecoderDescriptor] {
        std::slice::from_ref(&DESCRIPTOR)
    }

    fn descriptor(&self) -> &'static DecoderDescriptor {
        &DESCRIPTOR
    }

    fn reset(&mut self) {
        for line in &mut self.lines {
            line.reset();
        }
        self.config_warn_pending = self.sample_point_clamped;
    }

    fn process_chunk(
        &mut self,
        src: &SampleSource<'_>,
        span: ChunkSpan,
        sink: &mut AnnotationBuffer,
    ) -> Result<()> {
        if self.config_warn_pending {
            let kind = self.lines[0].kinds.warning;
            sink.put(Annotation::new(
                0,
                0,
                kind,
                vec!["Sample point clamped into [1, 99]".to_string(), "Clamped".to_string()],
                RawData::None,
            ));
            self.config_warn_pending = false;
        }

        let limit = span.end.min(src.total_len());
        for line in &mut self.lines {
            line.run(src, limit, &self.cfg, sink);
        }

        if span.is_last {
            for line in &mut self.lines {
                line.close_packet(&self.cfg, sink);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigrun_core::capture::CaptureChannel;
    use sigrun_core::decoder::{ChannelMapping, OptionBindings, Value};
    use sigrun_core::executor::{StreamingConfig, StreamingExecutor};
    use sigrun_core::sample::BitBuffer;

    // 1 MHz capture of a 9600 baud line.
    const SAMPLE_RATE: u64 = 1_000_000;
    const BIT_WIDTH: f64 = SAMPLE_RATE as f64 / 9600.0;

    struct Line {
        levels: Vec<u8>,
    }

    impl Line {
        fn new() -> Self {
            Line { levels: Vec::new() }
        }

        fn idle(&mut self, n: usize) {
            self.levels.extend(std::iter::repeat(1).take(n));
        }

        fn low(&mut self, n: usize) {
            self.levels.extend(std::iter::repeat(0).take(n));
        }

        // Append bits at the baud rate, keeping cumulative sample alignment.
        fn bits(&mut self, bits: &[u8]) {
            let mut edge = 0usize;
            for (i, &b) in bits.iter().enumerate() {
                let next = ((i + 1) as f64 * BIT_WIDTH).round() as usize;
                self.levels.extend(std::iter::repeat(b).take(next - edge));
                edge = next;
            }
        }

        // One 8N1 frame, LSB first.
        fn frame_8n1(&mut self, byte: u8) {
            let mut bits = vec![0u8];
            for i in 0..8 {
                bits.push((byte >> i) & 1);
            }
            bits.push(1);
            self.bits(&bits);
        }

        fn finish(self) -> Vec<CaptureChannel> {
            vec![CaptureChannel::new(0, "RX", BitBuffer::from_levels(&self.levels))]
        }
    }

    fn baud_9600() -> OptionBindings {
        OptionBindings::new().with("baudrate", Value::Int(9600))
    }

    fn decode(channels: &[CaptureChannel], bindings: &OptionBindings) -> Vec<Annotation> {
        let mapping = ChannelMapping::new().with("rx", 0);
        let params =
            DecoderParams { sample_rate: SAMPLE_RATE, channels, options: bindings, mapping: &mapping };

        let mut decoder = UartDecoder::try_new(&params).unwrap();
        let src = SampleSource::new(channels);
        let mut sink = AnnotationBuffer::new(&DESCRIPTOR);
        decoder.reset();
        decoder.decode(&src, &mut sink).unwrap();
        sink.into_annotations()
    }

    fn data_bytes(anns: &[Annotation]) -> Vec<u8> {
        anns.iter()
            .filter(|a| a.kind == ANN_RX_DATA)
            .map(|a| match a.raw {
                RawData::Byte(b) => b,
                _ => panic!("expected a byte payload"),
            })
            .collect()
    }

    #[test]
    fn verify_8n1_frame() {
        let mut line = Line::new();
        line.idle(50);
        line.frame_8n1(0x41);
        line.idle(400);
        let channels = line.finish();

        let anns = decode(&channels, &baud_9600());

        assert_eq!(anns.iter().filter(|a| a.kind == ANN_RX_START).count(), 1);

        let bits: Vec<u8> = anns
            .iter()
            .filter(|a| a.kind == ANN_RX_DATA_BIT)
            .map(|a| match a.raw {
                RawData::Bit(b) => b,
                _ => panic!("expected a bit payload"),
            })
            .collect();
        assert_eq!(bits, vec![1, 0, 0, 0, 0, 0, 1, 0]);

        let data = anns.iter().find(|a| a.kind == ANN_RX_DATA).unwrap();
        assert_eq!(data.values[0], "41");
        assert_eq!(data.raw, RawData::Byte(0x41));

        let stop = anns.iter().find(|a| a.kind == ANN_RX_STOP).unwrap();
        assert_eq!(stop.raw, RawData::Bit(1));

        assert!(anns.iter().all(|a| a.kind != ANN_RX_WARNING));
    }

    #[test]
    fn verify_framing_error_on_bad_stop_bit() {
        let mut line = Line::new();
        line.idle(50);
        // 'A' with the stop bit forced low, then a good frame.
        let mut bits = vec![0u8];
        for i in 0..8 {
            bits.push((0x41u8 >> i) & 1);
        }
        bits.push(0);
        line.bits(&bits);
        line.idle(30);
        line.frame_8n1(0x42);
        line.idle(400);
        let channels = line.finish();

        let anns = decode(&channels, &baud_9600());

        // The bad frame still yields its data annotation, plus a frame error and a stop bit
        // with a low sampled value.
        assert_eq!(data_bytes(&anns), vec![0x41, 0x42]);

        let warning = anns.iter().find(|a| a.kind == ANN_RX_WARNING).unwrap();
        assert!(warning.values[0].contains("stop bit"));

        let stops: Vec<u8> = anns
            .iter()
            .filter(|a| a.kind == ANN_RX_STOP)
            .map(|a| match a.raw {
                RawData::Bit(b) => b,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(stops, vec![0, 1]);
    }

    #[test]
    fn verify_even_parity() {
        let mut line = Line::new();
        line.idle(50);
        // 0x41 has two set bits: even parity bit is 0.
        let mut bits = vec![0u8];
        for i in 0..8 {
            bits.push((0x41u8 >> i) & 1);
        }
        bits.push(0); // parity
        bits.push(1); // stop
        line.bits(&bits);
        line.idle(400);
        let channels = line.finish();

        let bindings = baud_9600().with("parity", Value::Str("even".into()));
        let anns = decode(&channels, &bindings);

        assert!(anns.iter().any(|a| a.kind == ANN_RX_PARITY_OK));
        assert!(anns.iter().all(|a| a.kind != ANN_RX_PARITY_ERR));

        // The same capture read as odd parity is a parity error and invalidates the frame.
        let bindings = baud_9600().with("parity", Value::Str("odd".into()));
        let anns = decode(&channels, &bindings);
        assert!(anns.iter().any(|a| a.kind == ANN_RX_PARITY_ERR));
    }

    #[test]
    fn verify_break_condition() {
        let mut line = Line::new();
        line.idle(50);
        line.frame_8n1(0x55);
        line.idle(20);
        // Hold the line low for well over one frame length.
        line.low(1500);
        line.idle(50);
        line.frame_8n1(0xAA);
        line.idle(400);
        let channels = line.finish();

        let anns = decode(&channels, &baud_9600());

        assert_eq!(data_bytes(&anns), vec![0x55, 0xAA]);
        let brk = anns.iter().find(|a| a.kind == ANN_RX_BREAK).unwrap();
        assert!(brk.end_sample - brk.start_sample >= 1400);
    }

    #[test]
    fn verify_packet_grouping() {
        let mut line = Line::new();
        line.idle(50);
        line.frame_8n1(0x41);
        line.frame_8n1(0x42);
        line.frame_8n1(0x43);
        line.frame_8n1(0x44);
        line.idle(2000);
        let channels = line.finish();

        let bindings = baud_9600().with("packet_words", Value::Int(2));
        let anns = decode(&channels, &bindings);

        let packets: Vec<&Annotation> = anns.iter().filter(|a| a.kind == ANN_RX_PACKET).collect();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].values[0], "41 42");
        assert_eq!(packets[1].values[0], "43 44");
    }

    #[test]
    fn verify_idle_closes_packet() {
        let mut line = Line::new();
        line.idle(50);
        line.frame_8n1(0x41);
        // More than one frame length of idle line.
        line.idle(3000);
        line.frame_8n1(0x42);
        line.idle(2000);
        let channels = line.finish();

        let anns = decode(&channels, &baud_9600());

        let packets: Vec<&Annotation> = anns.iter().filter(|a| a.kind == ANN_RX_PACKET).collect();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].values[0], "41");
        assert_eq!(packets[1].values[0], "42");
    }

    #[test]
    fn verify_nine_bit_data() {
        let mut line = Line::new();
        line.idle(50);
        let word: u16 = 0x1A5;
        let mut bits = vec![0u8];
        for i in 0..9 {
            bits.push(((word >> i) & 1) as u8);
        }
        bits.push(1);
        line.bits(&bits);
        line.idle(400);
        let channels = line.finish();

        let bindings = baud_9600().with("data_bits", Value::Int(9));
        let anns = decode(&channels, &bindings);

        let data = anns.iter().find(|a| a.kind == ANN_RX_DATA).unwrap();
        assert_eq!(data.raw, RawData::Word(0x1A5));
        assert_eq!(data.values[0], "1A5");
    }

    #[test]
    fn verify_msb_first_order() {
        let mut line = Line::new();
        line.idle(50);
        // The wire carries the bit sequence of 0x41 LSB first; read MSB first that is 0x82.
        line.frame_8n1(0x41);
        line.idle(400);
        let channels = line.finish();

        let bindings = baud_9600().with("bit_order", Value::Str("msb-first".into()));
        let anns = decode(&channels, &bindings);

        assert_eq!(data_bytes(&anns), vec![0x82]);
    }

    #[test]
    fn verify_inverted_line() {
        let mut line = Line::new();
        line.idle(50);
        line.frame_8n1(0x41);
        line.idle(400);
        let mut channels = line.finish();

        // Invert the recorded samples and tell the decoder.
        let inverted: Vec<u8> =
            channels[0].samples.to_levels().iter().map(|&b| b ^ 1).collect();
        channels[0].samples = BitBuffer::from_levels(&inverted);

        let bindings = baud_9600().with("invert_rx", Value::Bool(true));
        let anns = decode(&channels, &bindings);

        assert_eq!(data_bytes(&anns), vec![0x41]);
    }

    #[test]
    fn verify_sample_point_clamp_warns_once() {
        let mut line = Line::new();
        line.idle(50);
        line.frame_8n1(0x41);
        line.idle(400);
        let channels = line.finish();

        let bindings = baud_9600().with("sample_point", Value::Int(100));
        let anns = decode(&channels, &bindings);

        let warnings: Vec<&Annotation> =
            anns.iter().filter(|a| a.kind == ANN_RX_WARNING).collect();
        assert_eq!(warnings.len(), 1);
        assert_eq!((warnings[0].start_sample, warnings[0].end_sample), (0, 0));

        // The frame still decodes, sampled at the 99% point.
        assert_eq!(data_bytes(&anns), vec![0x41]);
    }

    #[test]
    fn verify_rx_and_tx_decode_independently() {
        let mut rx = Line::new();
        rx.idle(50);
        rx.frame_8n1(0x41);
        rx.idle(400);

        let mut tx = Line::new();
        tx.idle(150);
        tx.frame_8n1(0x5A);
        tx.idle(300);

        let channels = vec![
            CaptureChannel::new(0, "RX", BitBuffer::from_levels(&rx.levels)),
            CaptureChannel::new(1, "TX", BitBuffer::from_levels(&tx.levels)),
        ];

        let bindings = baud_9600();
        let mapping = ChannelMapping::new().with("rx", 0).with("tx", 1);
        let params = DecoderParams {
            sample_rate: SAMPLE_RATE,
            channels: &channels,
            options: &bindings,
            mapping: &mapping,
        };

        let mut decoder = UartDecoder::try_new(&params).unwrap();
        let src = SampleSource::new(&channels);
        let mut sink = AnnotationBuffer::new(&DESCRIPTOR);
        decoder.reset();
        decoder.decode(&src, &mut sink).unwrap();
        let anns = sink.into_annotations();

        assert_eq!(data_bytes(&anns), vec![0x41]);
        let tx_data = anns.iter().find(|a| a.kind == ANN_TX_DATA).unwrap();
        assert_eq!(tx_data.raw, RawData::Byte(0x5A));
    }

    #[test]
    fn verify_streaming_equivalence() {
        let mut line = Line::new();
        line.idle(50);
        for byte in [0x41u8, 0x42, 0x43] {
            line.frame_8n1(byte);
        }
        line.idle(2000);
        let channels = line.finish();

        let mut single = decode(&channels, &baud_9600());
        single.sort_by_key(|a| (a.start_sample, a.kind));

        let bindings = baud_9600();
        let mapping = ChannelMapping::new().with("rx", 0);
        let params = DecoderParams {
            sample_rate: SAMPLE_RATE,
            channels: &channels,
            options: &bindings,
            mapping: &mapping,
        };
        let src = SampleSource::new(&channels);

        for chunk_size in [256u64, 1000, 4096, 100_000] {
            let mut decoder = UartDecoder::try_new(&params).unwrap();
            let executor = StreamingExecutor::new();
            let config = StreamingConfig { chunk_size, ..Default::default() };

            let outcome =
                executor.streaming_decode(&mut decoder, &src, &config, None, None).unwrap();

            let mut chunked = outcome.annotations;
            chunked.sort_by_key(|a| (a.start_sample, a.kind));
            assert_eq!(chunked, single, "chunk_size {}", chunk_size);
        }
    }

    #[test]
    fn verify_missing_lines_rejected() {
        let channels = Line::new().finish();
        let bindings = baud_9600();
        let mapping = ChannelMapping::new();
        let params = DecoderParams {
            sample_rate: SAMPLE_RATE,
            channels: &channels,
            options: &bindings,
            mapping: &mapping,
        };
        assert!(UartDecoder::try_new(&params).is_err());
    }

    #[test]
    fn verify_invalid_stop_bits_rejected() {
        let channels = Line::new().finish();
        let bindings = baud_9600().with("stop_bits", Value::Float(0.75));
        let mapping = ChannelMapping::new().with("rx", 0);
        let params = DecoderParams {
            sample_rate: SAMPLE_RATE,
            channels: &channels,
            options: &bindings,
            mapping: &mapping,
        };
        assert!(UartDecoder::try_new(&params).is_err());
    }
}
