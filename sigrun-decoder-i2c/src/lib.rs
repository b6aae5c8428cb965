// Sigrun
// Copyright (c) 2026 The Project Sigrun Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! I2C bus decoder.
//!
//! Decodes start and repeated-start conditions, 7- and 10-bit addressing, data bytes, and
//! ACK/NACK handshakes from an SCL/SDA channel pair.

use log::debug;

use sigrun_core::support_protocol;

use sigrun_core::annotation::{Annotation, AnnotationBuffer, RawData};
use sigrun_core::decoder::{
    AnnotationDesc, ChannelDesc, ChunkSpan, Decoder, DecoderDescriptor, DecoderParams, OptionDefault,
    OptionDesc, OptionType, Options, RowDesc, PROTOCOL_I2C,
};
use sigrun_core::errors::Result;
use sigrun_core::sample::SampleSource;
use sigrun_core::wait::{Conj, Term, WaitCond, WaitMatch, WaitOutcome, Waiter};

pub const ANN_START: u16 = 0;
pub const ANN_REPEAT_START: u16 = 1;
pub const ANN_STOP: u16 = 2;
pub const ANN_ACK: u16 = 3;
pub const ANN_NACK: u16 = 4;
pub const ANN_BIT: u16 = 5;
pub const ANN_ADDR_READ: u16 = 6;
pub const ANN_ADDR_WRITE: u16 = 7;
pub const ANN_DATA_READ: u16 = 8;
pub const ANN_DATA_WRITE: u16 = 9;
pub const ANN_WARNING: u16 = 10;

const CHANNELS: &[ChannelDesc] = &[
    ChannelDesc { id: "scl", name: "SCL", desc: "Serial clock line", required: true, index: 0 },
    ChannelDesc { id: "sda", name: "SDA", desc: "Serial data line", required: true, index: 1 },
];

const OPTIONS: &[OptionDesc] = &[OptionDesc {
    id: "address_format",
    desc: "Displayed slave address format",
    ty: OptionType::Enum,
    default: OptionDefault::Str("shifted"),
    allowed_values: &["shifted", "unshifted"],
    min: None,
    max: None,
}];

const ANNOTATIONS: &[AnnotationDesc] = &[
    AnnotationDesc { kind: ANN_START, short: "start", long: "Start condition", abbr: Some("S") },
    AnnotationDesc {
        kind: ANN_REPEAT_START,
        short: "repeat-start",
        long: "Repeated start condition",
        abbr: Some("Sr"),
    },
    AnnotationDesc { kind: ANN_STOP, short: "stop", long: "Stop condition", abbr: Some("P") },
    AnnotationDesc { kind: ANN_ACK, short: "ack", long: "ACK", abbr: Some("A") },
    AnnotationDesc { kind: ANN_NACK, short: "nack", long: "NACK", abbr: Some("N") },
    AnnotationDesc { kind: ANN_BIT, short: "bit", long: "Data/address bit", abbr: None },
    AnnotationDesc { kind: ANN_ADDR_READ, short: "address-read", long: "Address read", abbr: Some("AR") },
    AnnotationDesc { kind: ANN_ADDR_WRITE, short: "address-write", long: "Address write", abbr: Some("AW") },
    AnnotationDesc { kind: ANN_DATA_READ, short: "data-read", long: "Data read", abbr: Some("DR") },
    AnnotationDesc { kind: ANN_DATA_WRITE, short: "data-write", long: "Data write", abbr: Some("DW") },
    AnnotationDesc { kind: ANN_WARNING, short: "warning", long: "Warning", abbr: None },
];

const ROWS: &[RowDesc] = &[
    RowDesc { id: "bits", name: "Bits", kinds: &[ANN_BIT] },
    RowDesc {
        id: "addr-data",
        name: "Address/data",
        kinds: &[
            ANN_START,
            ANN_REPEAT_START,
            ANN_STOP,
            ANN_ACK,
            ANN_NACK,
            ANN_ADDR_READ,
            ANN_ADDR_WRITE,
            ANN_DATA_READ,
            ANN_DATA_WRITE,
        ],
    },
    RowDesc { id: "warnings", name: "Warnings", kinds: &[ANN_WARNING] },
];

static DESCRIPTOR: DecoderDescriptor = support_protocol!(
    I2cDecoder,
    id: PROTOCOL_I2C,
    short_name: "i2c",
    long_name: "Inter-Integrated Circuit",
    description: "Two-wire, multi-master, serial bus.",
    license: "MPL-2.0",
    inputs: &["logic"],
    outputs: &["i2c"],
    tags: &["embedded", "bus"],
    channels: CHANNELS,
    options: OPTIONS,
    annotations: ANNOTATIONS,
    annotation_rows: ROWS,
    warning_kind: Some(ANN_WARNING),
);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum AddressFormat {
    Shifted,
    Unshifted,
}

// Alternative indices of the main wait: clock edge, start, stop.
const MATCH_CLOCK: u64 = 1 << 0;
const MATCH_START: u64 = 1 << 1;
const MATCH_STOP: u64 = 1 << 2;

/// I2C bus decoder.
pub struct I2cDecoder {
    scl: u16,
    sda: u16,
    sample_rate: u64,
    address_format: AddressFormat,

    waiter: Waiter,

    // Transaction state. `active` is false only while idling before a start condition.
    active: bool,
    is_repeat: bool,
    pdu_start: u64,
    pdu_bits: u64,

    // Address phase. `rem_addr_bytes` is unset until the first byte after a start condition has
    // been classified; ACK handling decrements it only once set.
    is_write: Option<bool>,
    rem_addr_bytes: Option<u8>,
    slave_addr_7: u8,
    slave_addr_10: u16,

    // Byte accumulator: one (rising-edge sample, bit) pair per accumulated bit, MSB first.
    byte_bits: Vec<(u64, u8)>,
    bit_width: u64,
    awaiting_ack: bool,
}

impl I2cDecoder {
    fn clear_transaction(&mut self) {
        self.pdu_bits = 0;
        self.is_write = None;
        self.rem_addr_bytes = None;
        self.slave_addr_7 = 0;
        self.slave_addr_10 = 0;
        self.byte_bits.clear();
        self.awaiting_ack = false;
    }

    fn start_cond(&self) -> Conj {
        Conj::new().term(self.scl, Term::High).term(self.sda, Term::Falling)
    }

    /// One wait-dispatch step. Returns false when the chunk (or the stream) is exhausted.
    fn step(&mut self, src: &SampleSource<'_>, sink: &mut AnnotationBuffer) -> bool {
        if !self.active {
            // Idle: nothing but a start condition is of interest.
            return match self.waiter.wait(src, &WaitCond::single(self.start_cond())) {
                WaitOutcome::Match(m) => {
                    self.on_start(m.at, sink);
                    true
                }
                WaitOutcome::End => false,
            };
        }

        // Inside a transaction watch the clock and both bus conditions at once. A start or
        // stop mid-byte discards the partial byte; the clock edge is an address/data bit or,
        // after a complete byte, the ACK/NACK slot.
        let cond = WaitCond::any([
            Conj::new().term(self.scl, Term::Rising),
            self.start_cond(),
            Conj::new().term(self.scl, Term::High).term(self.sda, Term::Rising),
        ]);

        match self.waiter.wait(src, &cond) {
            WaitOutcome::Match(m) => {
                if m.matched & MATCH_START != 0 {
                    self.on_start(m.at, sink);
                }
                else if m.matched & MATCH_STOP != 0 {
                    self.on_stop(m.at, sink);
                }
                else if self.awaiting_ack {
                    self.on_ack(&m, sink);
                }
                else {
                    self.on_bit(&m, sink);
                }
                true
            }
            WaitOutcome::End => false,
        }
    }

    fn on_start(&mut self, at: u64, sink: &mut AnnotationBuffer) {
        if self.byte_bits.len() % 8 != 0 {
            debug!("i2c: start condition at {} discards a partial byte", at);
        }

        let (kind, values) = if self.is_repeat {
            (ANN_REPEAT_START, vec!["Start repeat".to_string(), "Sr".to_string()])
        }
        else {
            (ANN_START, vec!["Start".to_string(), "S".to_string()])
        };
        sink.put(Annotation::new(at, at, kind, values, RawData::None));

        self.active = true;
        self.is_repeat = true;
        self.pdu_start = at;
        self.clear_transaction();
    }

    fn on_stop(&mut self, at: u64, sink: &mut AnnotationBuffer) {
        let elapsed = (at - self.pdu_start + 1) as f64 / self.sample_rate as f64;
        let bitrate = if elapsed > 0.0 { (self.pdu_bits as f64 / elapsed) as u64 } else { 0 };

        sink.put(Annotation::new(
            at,
            at,
            ANN_STOP,
            vec![format!("Stop ({} bps)", bitrate), "Stop".to_string(), "P".to_string()],
            RawData::None,
        ));

        self.active = false;
        self.is_repeat = false;
        self.clear_transaction();
    }

    fn on_bit(&mut self, m: &WaitMatch, sink: &mut AnnotationBuffer) {
        let bit = m.pins.get(self.sda);

        if let Some(&(prev, _)) = self.byte_bits.last() {
            self.bit_width = m.at - prev;
        }

        self.byte_bits.push((m.at, bit));
        self.pdu_bits += 1;

        if self.byte_bits.len() == 8 {
            self.finish_byte(sink);
        }
    }

    fn finish_byte(&mut self, sink: &mut AnnotationBuffer) {
        let byte = self.byte_bits.iter().fold(0u8, |acc, &(_, b)| (acc << 1) | b);

        // Bit cells end one sample before the next rising edge; the final cell extends by the
        // measured bit width.
        for i in 0..8 {
            let (edge, bit) = self.byte_bits[i];
            let end = if i + 1 < 8 { self.byte_bits[i + 1].0 - 1 } else { edge + self.bit_width };
            sink.put(Annotation::new(edge, end, ANN_BIT, vec![bit.to_string()], RawData::Bit(bit)));
        }

        let start = self.byte_bits[0].0;
        let end = self.byte_bits[7].0 + self.bit_width;

        match self.rem_addr_bytes {
            None => self.on_address_first_byte(byte, start, end, sink),
            Some(n) if n > 0 => self.on_address_tail_byte(byte, start, end, sink),
            Some(_) => self.on_data_byte(byte, start, end, sink),
        }

        self.byte_bits.clear();
        self.awaiting_ack = true;
    }

    fn on_address_first_byte(&mut self, byte: u8, start: u64, end: u64, sink: &mut AnnotationBuffer) {
        // Only the first address byte of a transfer carries the direction bit.
        if self.is_write.is_none() {
            self.is_write = Some(byte & 0x01 == 0);
        }
        let read = !self.is_write.unwrap_or(true);
        let kind = if read { ANN_ADDR_READ } else { ANN_ADDR_WRITE };

        if byte >> 3 == 0b11110 {
            // 10-bit addressing: bits 2:1 are address bits 9:8, a second byte follows.
            self.rem_addr_bytes = Some(2);
            self.slave_addr_10 = u16::from(byte & 0x06) << 7;

            let label = if read { "Address read" } else { "Address write" };
            sink.put(Annotation::new(
                start,
                end,
                kind,
                vec![
                    format!("{} (10-bit, byte 1/2): {:02X}", label, byte),
                    format!("{:02X}", byte),
                ],
                RawData::Byte(byte),
            ));
        }
        else {
            self.rem_addr_bytes = Some(1);
            self.slave_addr_7 = byte >> 1;

            let shown = match self.address_format {
                AddressFormat::Shifted => u16::from(self.slave_addr_7),
                AddressFormat::Unshifted => u16::from(byte),
            };
            let label = if read { "Address read" } else { "Address write" };
            let abbr = if read { "AR" } else { "AW" };
            sink.put(Annotation::new(
                start,
                end,
                kind,
                vec![
                    format!("{}: {:02X}", label, shown),
                    format!("{}: {:02X}", abbr, shown),
                    format!("{:02X}", shown),
                ],
                RawData::Addr { addr: u16::from(self.slave_addr_7), read },
            ));
        }
    }

    fn on_address_tail_byte(&mut self, byte: u8, start: u64, end: u64, sink: &mut AnnotationBuffer) {
        self.slave_addr_10 |= u16::from(byte);

        let read = !self.is_write.unwrap_or(true);
        let kind = if read { ANN_ADDR_READ } else { ANN_ADDR_WRITE };
        let label = if read { "Address read" } else { "Address write" };
        let abbr = if read { "AR" } else { "AW" };

        sink.put(Annotation::new(
            start,
            end,
            kind,
            vec![
                format!("{}: {:03X}", label, self.slave_addr_10),
                format!("{}: {:03X}", abbr, self.slave_addr_10),
                format!("{:03X}", self.slave_addr_10),
            ],
            RawData::Addr { addr: self.slave_addr_10, read },
        ));
    }

    fn on_data_byte(&mut self, byte: u8, start: u64, end: u64, sink: &mut AnnotationBuffer) {
        let read = !self.is_write.unwrap_or(true);
        let kind = if read { ANN_DATA_READ } else { ANN_DATA_WRITE };
        let label = if read { "Data read" } else { "Data write" };
        let abbr = if read { "DR" } else { "DW" };

        sink.put(Annotation::new(
            start,
            end,
            kind,
            vec![
                format!("{}: {:02X}", label, byte),
                format!("{}: {:02X}", abbr, byte),
                format!("{:02X}", byte),
            ],
            RawData::Byte(byte),
        ));
    }

    fn on_ack(&mut self, m: &WaitMatch, sink: &mut AnnotationBuffer) {
        let bit = m.pins.get(self.sda);

        let (kind, values) = if bit == 0 {
            (ANN_ACK, vec!["ACK".to_string(), "A".to_string()])
        }
        else {
            (ANN_NACK, vec!["NACK".to_string(), "N".to_string()])
        };
        sink.put(Annotation::new(m.at, m.at + self.bit_width / 2, kind, values, RawData::Bit(bit)));

        // No-op while the address phase has not begun.
        self.rem_addr_bytes = self.rem_addr_bytes.map(|n| n.saturating_sub(1));
        self.awaiting_ack = false;
    }
}

impl Decoder for I2cDecoder {
    fn try_new(params: &DecoderParams<'_>) -> Result<Self> {
        params.check(&DESCRIPTOR)?;

        let opts = Options::new(DESCRIPTOR.options, params.options);
        let address_format = match opts.str("address_format")?.as_str() {
            "unshifted" => AddressFormat::Unshifted,
            _ => AddressFormat::Shifted,
        };

        Ok(I2cDecoder {
            // Required roles are guaranteed mapped by the check above.
            scl: params.mapping.get("scl").unwrap(),
            sda: params.mapping.get("sda").unwrap(),
            sample_rate: params.sample_rate,
            address_format,
            waiter: Waiter::new(0),
            active: false,
            is_repeat: false,
            pdu_start: 0,
            pdu_bits: 0,
            is_write: None,
            rem_addr_bytes: None,
            slave_addr_7: 0,
            slave_addr_10: 0,
            byte_bits: Vec::with_capacity(8),
            bit_width: 0,
            awaiting_ack: false,
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
        self.active = false;
        self.is_repeat = false;
        self.pdu_start = 0;
        self.bit_width = 0;
        self.clear_transaction();
    }

    fn process_chunk(
        &mut self,
        src: &SampleSource<'_>,
        span: ChunkSpan,
        sink: &mut AnnotationBuffer,
    ) -> Result<()> {
        self.waiter.set_limit(span.end.min(src.total_len()));
        while self.step(src, sink) {}

        // A byte cut off by the end of the capture with fewer than eight bits is discarded; a
        // complete byte was already flushed at its final clock edge.
        if span.is_last && !self.byte_bits.is_empty() {
            debug!("i2c: discarding {} bit(s) of a partial byte at end of capture", self.byte_bits.len());
        }
        Ok(())
    }
}
