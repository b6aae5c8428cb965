// Sigrun
// Copyright (c) 2026 The Project Sigrun Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `decoder` module provides the traits and support structures necessary to implement
//! protocol decoders.

use std::collections::HashMap;
use std::fmt;

use crate::annotation::AnnotationBuffer;
use crate::capture::CaptureChannel;
use crate::errors::{bad_config_error, Result};
use crate::sample::SampleSource;

/// A `ProtocolId` is a unique identifier used to identify a specific protocol. Decoders
/// advertising support for a specific `ProtocolId` should be interchangeable in regards to the
/// annotation kinds and rows they produce.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProtocolId(pub u32);

/// Null protocol, matches no decoder.
pub const PROTOCOL_NULL: ProtocolId = ProtocolId(0x0);

/// Inter-Integrated Circuit (I2C) serial bus.
pub const PROTOCOL_I2C: ProtocolId = ProtocolId(0x100);
/// Serial Peripheral Interface (SPI) bus.
pub const PROTOCOL_SPI: ProtocolId = ProtocolId(0x101);
/// Universal Asynchronous Receiver-Transmitter (UART) serial line.
pub const PROTOCOL_UART: ProtocolId = ProtocolId(0x102);

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A channel role a decoder consumes, e.g. the clock line.
#[derive(Copy, Clone, Debug)]
pub struct ChannelDesc {
    /// Stable role identifier, e.g. `"scl"`.
    pub id: &'static str,
    /// Short display name, e.g. `"SCL"`.
    pub name: &'static str,
    /// One-line description of the role.
    pub desc: &'static str,
    /// Whether a decode can run without this role mapped.
    pub required: bool,
    /// Display/auto-assignment ordering index.
    pub index: usize,
}

/// The type of an option value.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OptionType {
    Int,
    Float,
    Bool,
    /// A string constrained to the descriptor's `allowed_values`.
    Enum,
    Str,
}

/// A typed option value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

/// The default of an option, stored in static descriptor tables.
#[derive(Copy, Clone, Debug)]
pub enum OptionDefault {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(&'static str),
}

impl OptionDefault {
    pub fn to_value(self) -> Value {
        match self {
            OptionDefault::Int(v) => Value::Int(v),
            OptionDefault::Float(v) => Value::Float(v),
            OptionDefault::Bool(v) => Value::Bool(v),
            OptionDefault::Str(v) => Value::Str(v.to_string()),
        }
    }
}

/// One entry of a decoder's option schema.
#[derive(Copy, Clone, Debug)]
pub struct OptionDesc {
    pub id: &'static str,
    pub desc: &'static str,
    pub ty: OptionType,
    pub default: OptionDefault,
    /// For `Enum` options, the admissible values. Empty means unconstrained.
    pub allowed_values: &'static [&'static str],
    /// For `Int` options, the inclusive admissible range.
    pub min: Option<i64>,
    pub max: Option<i64>,
}

/// A description of an annotation kind.
#[derive(Copy, Clone, Debug)]
pub struct AnnotationDesc {
    pub kind: u16,
    pub short: &'static str,
    pub long: &'static str,
    pub abbr: Option<&'static str>,
}

/// A named grouping of annotation kinds for layered display. The ordering and non-overlap
/// invariants of a run hold per row.
#[derive(Copy, Clone, Debug)]
pub struct RowDesc {
    pub id: &'static str,
    pub name: &'static str,
    pub kinds: &'static [u16],
}

/// Option values bound for a decoder run, keyed by option id. Unbound options take their
/// schema defaults.
#[derive(Clone, Debug, Default)]
pub struct OptionBindings {
    values: HashMap<String, Value>,
}

impl OptionBindings {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn set(&mut self, id: &str, value: Value) -> &mut Self {
        self.values.insert(id.to_string(), value);
        self
    }

    /// Builder-style `set`.
    pub fn with(mut self, id: &str, value: Value) -> Self {
        self.set(id, value);
        self
    }

    pub fn get(&self, id: &str) -> Option<&Value> {
        self.values.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// A typed, schema-checked reader over option bindings.
pub struct Options<'a> {
    schema: &'static [OptionDesc],
    bindings: &'a OptionBindings,
}

impl<'a> Options<'a> {
    pub fn new(schema: &'static [OptionDesc], bindings: &'a OptionBindings) -> Self {
        Options { schema, bindings }
    }

    /// Check every binding against the schema: unknown ids, type mismatches, enum values
    /// outside `allowed_values`, and int values outside `[min, max]` all fail.
    pub fn validate(&self) -> Result<()> {
        for (id, value) in self.bindings.iter() {
            let desc = match self.schema.iter().find(|o| o.id == id) {
                Some(desc) => desc,
                None => return bad_config_error("unknown option id"),
            };

            match (desc.ty, value) {
                (OptionType::Int, Value::Int(v)) => {
                    if desc.min.is_some_and(|min| *v < min) || desc.max.is_some_and(|max| *v > max) {
                        return bad_config_error("option value out of range");
                    }
                }
                (OptionType::Float, Value::Float(_)) => (),
                // An integer is an acceptable rendition of a float option.
                (OptionType::Float, Value::Int(_)) => (),
                (OptionType::Bool, Value::Bool(_)) => (),
                (OptionType::Str, Value::Str(_)) => (),
                (OptionType::Enum, Value::Str(v)) => {
                    if !desc.allowed_values.is_empty() && !desc.allowed_values.contains(&v.as_str()) {
                        return bad_config_error("option value not in allowed set");
                    }
                }
                _ => return bad_config_error("option value has the wrong type"),
            }
        }
        Ok(())
    }

    fn lookup(&self, id: &str) -> Result<Value> {
        if let Some(value) = self.bindings.get(id) {
            return Ok(value.clone());
        }
        match self.schema.iter().find(|o| o.id == id) {
            Some(desc) => Ok(desc.default.to_value()),
            None => bad_config_error("unknown option id"),
        }
    }

    pub fn int(&self, id: &str) -> Result<i64> {
        match self.lookup(id)? {
            Value::Int(v) => Ok(v),
            _ => bad_config_error("option value has the wrong type"),
        }
    }

    pub fn float(&self, id: &str) -> Result<f64> {
        match self.lookup(id)? {
            Value::Float(v) => Ok(v),
            Value::Int(v) => Ok(v as f64),
            _ => bad_config_error("option value has the wrong type"),
        }
    }

    pub fn bool(&self, id: &str) -> Result<bool> {
        match self.lookup(id)? {
            Value::Bool(v) => Ok(v),
            _ => bad_config_error("option value has the wrong type"),
        }
    }

    pub fn str(&self, id: &str) -> Result<String> {
        match self.lookup(id)? {
            Value::Str(v) => Ok(v),
            _ => bad_config_error("option value has the wrong type"),
        }
    }
}

/// A binding of protocol role ids to concrete channel numbers of a capture.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChannelMapping {
    map: HashMap<String, u16>,
}

impl ChannelMapping {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn assign(&mut self, role: &str, channel: u16) -> &mut Self {
        self.map.insert(role.to_string(), channel);
        self
    }

    /// Builder-style `assign`.
    pub fn with(mut self, role: &str, channel: u16) -> Self {
        self.assign(role, channel);
        self
    }

    pub fn get(&self, role: &str) -> Option<u16> {
        self.map.get(role).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u16)> {
        self.map.iter().map(|(k, &v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// The outcome of validating a channel mapping against a decoder descriptor.
#[derive(Clone, Debug, Default)]
pub struct MappingReport {
    pub ok: bool,
    /// Required roles with no channel assigned.
    pub missing_required: Vec<&'static str>,
    /// Structural violations: duplicate channel assignments and references to channels the
    /// capture does not have.
    pub conflicts: Vec<String>,
    /// Non-fatal observations, e.g. a mapping for a role the decoder does not declare.
    pub warnings: Vec<String>,
}

/// Validate `mapping` against a descriptor and the capture's channel set.
pub fn validate_mapping(
    desc: &DecoderDescriptor,
    mapping: &ChannelMapping,
    channels: &[CaptureChannel],
) -> MappingReport {
    let mut report = MappingReport::default();

    for role in desc.channels.iter().filter(|c| c.required) {
        if mapping.get(role.id).is_none() {
            report.missing_required.push(role.id);
        }
    }

    let mut seen: Vec<(u16, &str)> = Vec::new();
    for (role, channel) in mapping.iter() {
        if desc.channels.iter().all(|c| c.id != role) {
            report.warnings.push(format!("role '{}' is not declared by the decoder", role));
            continue;
        }
        if channels.iter().all(|c| c.channel_number != channel) {
            report.conflicts.push(format!("role '{}' maps to unknown channel {}", role, channel));
        }
        if let Some(&(_, other)) = seen.iter().find(|&&(ch, _)| ch == channel) {
            report.conflicts.push(format!("roles '{}' and '{}' both map to channel {}", other, role, channel));
        }
        seen.push((channel, role));
    }

    report.ok = report.missing_required.is_empty() && report.conflicts.is_empty();
    report
}

/// Everything a decoder is instantiated with.
pub struct DecoderParams<'a> {
    /// The capture's sample rate in Hz. Must be greater than zero.
    pub sample_rate: u64,
    /// The capture's channels; borrowed only for validation.
    pub channels: &'a [CaptureChannel],
    pub options: &'a OptionBindings,
    pub mapping: &'a ChannelMapping,
}

impl DecoderParams<'_> {
    /// The structural checks shared by every decoder: positive sample rate, valid mapping,
    /// schema-conforming options. Decoders call this first in `try_new`.
    pub fn check(&self, desc: &DecoderDescriptor) -> Result<()> {
        if self.sample_rate == 0 {
            return bad_config_error("sample rate must be greater than zero");
        }

        let report = validate_mapping(desc, self.mapping, self.channels);
        if !report.missing_required.is_empty() {
            return bad_config_error("a required channel role is unmapped");
        }
        if !report.conflicts.is_empty() {
            return bad_config_error("channel mapping has conflicting or unknown assignments");
        }

        Options::new(desc.options, self.options).validate()
    }
}

/// A bounded slice of the sample stream handed to a decoder by the streaming executor.
///
/// Decoders carry their own cursor across chunks; `start` documents the overlap-adjusted chunk
/// origin while `end` is the binding scan limit for this call.
#[derive(Copy, Clone, Debug)]
pub struct ChunkSpan {
    pub start: u64,
    pub end: u64,
    /// Zero-based chunk index.
    pub index: u64,
    /// Whether this is the final chunk of the run; decoders flush or discard partial events.
    pub is_last: bool,
}

impl ChunkSpan {
    /// The span of a whole, unchunked run.
    pub fn full(total: u64) -> Self {
        ChunkSpan { start: 0, end: total, index: 0, is_last: true }
    }
}

/// A `Decoder` implements a protocol's decode state machine. It consumes samples through the
/// wait primitive and produces annotations.
pub trait Decoder: Send {
    /// Attempt to instantiate the decoder, validating channel mapping and options against the
    /// descriptor. Fails with `BadConfig` naming the violated constraint.
    fn try_new(params: &DecoderParams<'_>) -> Result<Self>
    where
        Self: Sized;

    /// The descriptors of the protocols supported by this decoder.
    fn supported_protocols() -> &'static [DecoderDescriptor]
    where
        Self: Sized;

    /// The descriptor of the protocol this instance decodes.
    fn descriptor(&self) -> &'static DecoderDescriptor;

    /// Return the decoder to its initial state. After a reset, and before the first wait, the
    /// decoder produces no annotations. Resetting twice is equivalent to resetting once.
    fn reset(&mut self);

    /// Decode samples up to the span's end, carrying state across calls. The streaming
    /// executor feeds consecutive spans of one run to the same instance.
    fn process_chunk(
        &mut self,
        src: &SampleSource<'_>,
        span: ChunkSpan,
        sink: &mut AnnotationBuffer,
    ) -> Result<()>;

    /// Decode the whole capture in one call.
    fn decode(&mut self, src: &SampleSource<'_>, sink: &mut AnnotationBuffer) -> Result<()> {
        self.process_chunk(src, ChunkSpan::full(src.total_len()), sink)
    }
}

/// A `DecoderDescriptor` stores the static description of a single protocol decoder: identity,
/// channel roles, option schema, annotation kinds and rows, and an instantiation function.
#[derive(Copy, Clone)]
pub struct DecoderDescriptor {
    /// The `ProtocolId` identifier.
    pub id: ProtocolId,
    /// A short ASCII-only string identifying the protocol, e.g. `"i2c"`.
    pub short_name: &'static str,
    /// A longer, more descriptive, string identifying the protocol.
    pub long_name: &'static str,
    pub description: &'static str,
    pub license: &'static str,
    /// What the decoder consumes. Here always `["logic"]`.
    pub inputs: &'static [&'static str],
    /// What the decoder produces, conventionally the protocol id.
    pub outputs: &'static [&'static str],
    pub tags: &'static [&'static str],
    pub channels: &'static [ChannelDesc],
    pub options: &'static [OptionDesc],
    pub annotations: &'static [AnnotationDesc],
    pub annotation_rows: &'static [RowDesc],
    /// The kind the annotation buffer uses to surface dropped-annotation diagnostics.
    pub warning_kind: Option<u16>,
    /// An instantiation function for the decoder.
    pub inst_func: fn(&DecoderParams<'_>) -> Result<Box<dyn Decoder>>,
}

/// Convenience macro for declaring a `DecoderDescriptor`.
///
/// Takes the implementing decoder type followed by every descriptor field except `inst_func`,
/// which is generated to box a `try_new` of that type.
#[macro_export]
macro_rules! support_protocol {
    ($decoder:ty, $($field:ident: $value:expr),* $(,)?) => {
        $crate::decoder::DecoderDescriptor {
            $($field: $value,)*
            inst_func: |params| {
                Ok(::std::boxed::Box::new(
                    <$decoder as $crate::decoder::Decoder>::try_new(params)?,
                ))
            },
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::BitBuffer;

    const SCHEMA: &[OptionDesc] = &[
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
            id: "parity",
            desc: "Parity",
            ty: OptionType::Enum,
            default: OptionDefault::Str("none"),
            allowed_values: &["none", "odd", "even"],
            min: None,
            max: None,
        },
    ];

    #[test]
    fn verify_defaults_apply() {
        let bindings = OptionBindings::new();
        let opts = Options::new(SCHEMA, &bindings);

        assert!(opts.validate().is_ok());
        assert_eq!(opts.int("baudrate").unwrap(), 115_200);
        assert_eq!(opts.str("parity").unwrap(), "none");
    }

    #[test]
    fn verify_bad_option_values_fail() {
        let bindings = OptionBindings::new().with("baudrate", Value::Int(0));
        assert!(Options::new(SCHEMA, &bindings).validate().is_err());

        let bindings = OptionBindings::new().with("parity", Value::Str("mark".into()));
        assert!(Options::new(SCHEMA, &bindings).validate().is_err());

        let bindings = OptionBindings::new().with("parity", Value::Int(1));
        assert!(Options::new(SCHEMA, &bindings).validate().is_err());

        let bindings = OptionBindings::new().with("nonsense", Value::Bool(true));
        assert!(Options::new(SCHEMA, &bindings).validate().is_err());
    }

    const ROLES: &[ChannelDesc] = &[
        ChannelDesc { id: "clk", name: "CLK", desc: "Clock", required: true, index: 0 },
        ChannelDesc { id: "cs", name: "CS", desc: "Chip select", required: false, index: 1 },
    ];

    fn test_descriptor() -> DecoderDescriptor {
        DecoderDescriptor {
            id: ProtocolId(0xffff),
            short_name: "test",
            long_name: "Test",
            description: "",
            license: "MPL-2.0",
            inputs: &["logic"],
            outputs: &["test"],
            tags: &[],
            channels: ROLES,
            options: &[],
            annotations: &[],
            annotation_rows: &[],
            warning_kind: None,
            inst_func: |_| crate::errors::unsupported_error("test"),
        }
    }

    fn capture_channels(numbers: &[u16]) -> Vec<CaptureChannel> {
        numbers
            .iter()
            .map(|&n| CaptureChannel {
                channel_number: n,
                name: format!("CH{}", n),
                hidden: false,
                inverted: false,
                samples: BitBuffer::new(),
            })
            .collect()
    }

    #[test]
    fn verify_mapping_missing_required() {
        let desc = test_descriptor();
        let channels = capture_channels(&[0, 1]);

        let report = validate_mapping(&desc, &ChannelMapping::new(), &channels);
        assert!(!report.ok);
        assert_eq!(report.missing_required, vec!["clk"]);
    }

    #[test]
    fn verify_mapping_duplicate_channel() {
        let desc = test_descriptor();
        let channels = capture_channels(&[0, 1]);

        let mapping = ChannelMapping::new().with("clk", 0).with("cs", 0);
        let report = validate_mapping(&desc, &mapping, &channels);
        assert!(!report.ok);
        assert_eq!(report.conflicts.len(), 1);
    }

    #[test]
    fn verify_mapping_unknown_channel() {
        let desc = test_descriptor();
        let channels = capture_channels(&[0]);

        let mapping = ChannelMapping::new().with("clk", 9);
        let report = validate_mapping(&desc, &mapping, &channels);
        assert!(!report.ok);
    }

    #[test]
    fn verify_mapping_undeclared_role_warns() {
        let desc = test_descriptor();
        let channels = capture_channels(&[0, 1]);

        let mapping = ChannelMapping::new().with("clk", 0).with("mosi", 1);
        let report = validate_mapping(&desc, &mapping, &channels);
        assert!(report.ok);
        assert_eq!(report.warnings.len(), 1);
    }
}
