// Sigrun
// Copyright (c) 2026 The Project Sigrun Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Registry for protocol decoders to support lookup and instantiation dynamically at runtime.

use std::collections::HashMap;
use std::time::Instant;

use crate::annotation::{Annotation, AnnotationBuffer};
use crate::capture::CaptureChannel;
use crate::decoder::{
    validate_mapping, ChannelMapping, Decoder, DecoderDescriptor, DecoderParams, MappingReport,
    OptionBindings, ProtocolId,
};
use crate::errors::{bad_config_error, unsupported_error, Result};

/// The result of a registry-driven decode run.
#[derive(Debug)]
pub struct ExecuteOutcome {
    /// All annotations of the run, sorted by `start_sample` (stable).
    pub annotations: Vec<Annotation>,
    pub elapsed_ms: u64,
}

/// A `DecoderRegistry` allows the registration of protocol decoders, and provides methods to
/// look them up, validate channel assignments against their descriptors, and run them.
///
/// Registrations complete before any execution: registering takes `&mut self` while executing
/// takes `&self`, so the two cannot race.
#[derive(Default)]
pub struct DecoderRegistry {
    decoders: HashMap<ProtocolId, DecoderDescriptor>,
}

impl DecoderRegistry {
    /// Instantiate a new `DecoderRegistry`.
    pub fn new() -> Self {
        Default::default()
    }

    /// Gets the `DecoderDescriptor` for a registered protocol.
    pub fn get(&self, id: ProtocolId) -> Option<&DecoderDescriptor> {
        self.decoders.get(&id)
    }

    /// Registers all protocols supported by `Decoder`. If a supported protocol was previously
    /// registered by another decoder it will be replaced within the registry.
    pub fn register_all<D: Decoder>(&mut self) {
        for descriptor in D::supported_protocols() {
            self.register(descriptor);
        }
    }

    /// Register a single protocol decoder.
    pub fn register(&mut self, descriptor: &DecoderDescriptor) {
        self.decoders.insert(descriptor.id, *descriptor);
    }

    /// All registered descriptors, ordered by protocol id.
    pub fn list(&self) -> Vec<&DecoderDescriptor> {
        let mut all: Vec<_> = self.decoders.values().collect();
        all.sort_by_key(|d| d.id.0);
        all
    }

    /// Search descriptors by name substring (case-insensitive over short and long names) and,
    /// optionally, by tags (a descriptor matches if it carries every requested tag).
    pub fn search(&self, query: &str, tags: Option<&[&str]>) -> Vec<&DecoderDescriptor> {
        let query = query.to_ascii_lowercase();

        let mut found: Vec<_> = self
            .decoders
            .values()
            .filter(|d| {
                let name_hit = query.is_empty()
                    || d.short_name.to_ascii_lowercase().contains(&query)
                    || d.long_name.to_ascii_lowercase().contains(&query);

                let tag_hit = tags.map_or(true, |wanted| {
                    wanted.iter().all(|t| d.tags.iter().any(|tag| tag.eq_ignore_ascii_case(t)))
                });

                name_hit && tag_hit
            })
            .collect();

        found.sort_by_key(|d| d.id.0);
        found
    }

    /// Validate a channel mapping against a registered descriptor.
    pub fn validate_mapping(
        &self,
        id: ProtocolId,
        mapping: &ChannelMapping,
        channels: &[CaptureChannel],
    ) -> Result<MappingReport> {
        match self.get(id) {
            Some(desc) => Ok(validate_mapping(desc, mapping, channels)),
            None => unsupported_error("protocol is not registered"),
        }
    }

    /// Assign channels to a descriptor's roles automatically: required roles first, each taking
    /// the lowest channel number in `0..max_channels` that is neither in `used_channels` nor
    /// already assigned; optional roles follow the same rule. Optional roles are left unmapped
    /// once channels run out; running out on a required role is a configuration error.
    pub fn auto_assign(
        &self,
        id: ProtocolId,
        used_channels: &[u16],
        max_channels: u16,
    ) -> Result<ChannelMapping> {
        let desc = match self.get(id) {
            Some(desc) => desc,
            None => return unsupported_error("protocol is not registered"),
        };

        let mut roles: Vec<_> = desc.channels.iter().collect();
        roles.sort_by_key(|r| (!r.required, r.index));

        let mut mapping = ChannelMapping::new();
        let mut taken: Vec<u16> = used_channels.to_vec();

        for role in roles {
            let free = (0..max_channels).find(|ch| !taken.contains(ch));
            match free {
                Some(ch) => {
                    mapping.assign(role.id, ch);
                    taken.push(ch);
                }
                None if role.required => {
                    return bad_config_error("not enough free channels for required roles");
                }
                None => break,
            }
        }

        Ok(mapping)
    }

    /// Instantiate the decoder registered for `id` and run it over the capture in one shot.
    ///
    /// The executor already guarantees chunk-ordered output; this wrapper nevertheless re-sorts
    /// by `start_sample` (stable) before returning.
    pub fn execute(
        &self,
        id: ProtocolId,
        sample_rate: u64,
        channels: &[CaptureChannel],
        options: &OptionBindings,
        mapping: &ChannelMapping,
    ) -> Result<ExecuteOutcome> {
        let desc = match self.get(id) {
            Some(desc) => desc,
            None => return unsupported_error("protocol is not registered"),
        };

        let params = DecoderParams { sample_rate, channels, options, mapping };
        let mut decoder = (desc.inst_func)(&params)?;

        let started = Instant::now();

        let src = crate::sample::SampleSource::new(channels);
        let mut sink = AnnotationBuffer::new(decoder.descriptor());
        decoder.reset();
        decoder.decode(&src, &mut sink)?;

        let mut annotations = sink.into_annotations();
        annotations.sort_by_key(|a| a.start_sample);

        Ok(ExecuteOutcome { annotations, elapsed_ms: started.elapsed().as_millis() as u64 })
    }
}
