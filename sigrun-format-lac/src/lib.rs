// Sigrun
// Copyright (c) 2026 The Project Sigrun Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! LAC capture file persistence.
//!
//! A LAC document is the JSON serialization of a capture session: acquisition settings,
//! trigger, and per-channel sample data. Channel samples are stored one byte per sample under
//! the `{"type": "Buffer", "data": [...]}` tag. Two shapes are accepted when reading: the flat
//! modern document, and the legacy envelope `{"settings": ..., "selectedRegions": [...]}`
//! whose regions are surfaced alongside the session.

use std::io::{Read, Write};

use log::debug;
use serde::{Deserialize, Serialize};

use sigrun_core::capture::{CaptureChannel, CaptureSession, Trigger, TriggerKind};
use sigrun_core::errors::{Error, Result};
use sigrun_core::sample::BitBuffer;

/// A named sample range selected in the capture, carried by legacy documents.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedRegion {
    pub first_sample: u64,
    pub last_sample: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region_name: Option<String>,
}

/// A parsed LAC document: the capture session plus any selected regions the file carried.
#[derive(Debug)]
pub struct LacFile {
    pub session: CaptureSession,
    pub regions: Vec<SelectedRegion>,
}

#[derive(Serialize, Deserialize)]
struct LacSamples {
    #[serde(rename = "type")]
    tag: String,
    data: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LacChannel {
    channel_number: u16,
    channel_name: String,
    #[serde(default)]
    hidden: bool,
    #[serde(default)]
    inverted: bool,
    samples: LacSamples,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LacCapture {
    #[serde(default)]
    name: String,
    frequency: u64,
    pre_trigger_samples: u64,
    post_trigger_samples: u64,
    capture_channels: Vec<LacChannel>,
    trigger_type: u8,
    trigger_channel: u16,
    trigger_inverted: bool,
    trigger_value: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    device_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    device_serial: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LacDocument {
    Envelope {
        settings: LacCapture,
        #[serde(rename = "selectedRegions", default)]
        selected_regions: Option<Vec<SelectedRegion>>,
    },
    Flat(LacCapture),
}

impl From<&CaptureSession> for LacCapture {
    fn from(session: &CaptureSession) -> Self {
        LacCapture {
            name: session.name.clone(),
            frequency: session.sample_rate_hz,
            pre_trigger_samples: session.pre_trigger,
            post_trigger_samples: session.post_trigger,
            capture_channels: session
                .channels
                .iter()
                .map(|ch| LacChannel {
                    channel_number: ch.channel_number,
                    channel_name: ch.name.clone(),
                    hidden: ch.hidden,
                    inverted: ch.inverted,
                    samples: LacSamples { tag: "Buffer".to_string(), data: ch.samples.to_levels() },
                })
                .collect(),
            trigger_type: session.trigger.kind.to_code(),
            trigger_channel: session.trigger.channel,
            trigger_inverted: session.trigger.inverted,
            trigger_value: session.trigger.value,
            device_version: session.device_version.clone(),
            device_serial: session.device_serial.clone(),
        }
    }
}

fn invalid_data(msg: &str) -> Error {
    Error::IoError(std::io::Error::new(std::io::ErrorKind::InvalidData, msg.to_string()))
}

impl LacCapture {
    fn into_session(self) -> Result<CaptureSession> {
        let kind = TriggerKind::from_code(self.trigger_type)
            .ok_or_else(|| invalid_data("lac: unknown trigger type"))?;

        Ok(CaptureSession {
            name: self.name,
            device_version: self.device_version,
            device_serial: self.device_serial,
            sample_rate_hz: self.frequency,
            pre_trigger: self.pre_trigger_samples,
            post_trigger: self.post_trigger_samples,
            trigger: Trigger {
                channel: self.trigger_channel,
                kind,
                inverted: self.trigger_inverted,
                value: self.trigger_value,
            },
            channels: self
                .capture_channels
                .into_iter()
                .map(|ch| CaptureChannel {
                    channel_number: ch.channel_number,
                    name: ch.channel_name,
                    hidden: ch.hidden,
                    inverted: ch.inverted,
                    samples: BitBuffer::from_levels(&ch.samples.data),
                })
                .collect(),
        })
    }
}

/// Serialize a capture session as a flat modern LAC document.
pub fn write_lac<W: Write>(out: &mut W, session: &CaptureSession) -> Result<()> {
    let capture = LacCapture::from(session);
    serde_json::to_writer_pretty(out, &capture)
        .map_err(|e| Error::IoError(std::io::Error::new(std::io::ErrorKind::Other, e)))
}

/// Deserialize a LAC document, accepting both the flat and the legacy envelope shapes.
pub fn read_lac<R: Read>(input: &mut R) -> Result<LacFile> {
    let mut text = String::new();
    input.read_to_string(&mut text)?;

    let document: LacDocument = serde_json::from_str(&text)
        .map_err(|e| Error::IoError(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;

    match document {
        LacDocument::Envelope { settings, selected_regions } => {
            let regions = selected_regions.unwrap_or_default();
            debug!("lac: legacy envelope document, {} selected region(s)", regions.len());
            Ok(LacFile { session: settings.into_session()?, regions })
        }
        LacDocument::Flat(capture) => {
            Ok(LacFile { session: capture.into_session()?, regions: Vec::new() })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_session() -> CaptureSession {
        let mut session = CaptureSession::new("capture-1", 24_000_000);
        session.pre_trigger = 2;
        session.post_trigger = 6;
        session.device_version = Some("V1_3".to_string());
        session.device_serial = Some("A1B2C3".to_string());
        session.trigger =
            Trigger { channel: 1, kind: TriggerKind::Edge, inverted: true, value: 0 };

        session.channels = vec![
            CaptureChannel::new(0, "SCL", BitBuffer::from_levels(&[1, 1, 0, 0, 1, 1, 0, 1])),
            CaptureChannel {
                channel_number: 1,
                name: "SDA".to_string(),
                hidden: true,
                inverted: true,
                samples: BitBuffer::from_levels(&[0, 1, 0, 1, 0, 1, 0, 1]),
            },
        ];
        session
    }

    #[test]
    fn verify_round_trip() {
        let session = sample_session();

        let mut buf = Vec::new();
        write_lac(&mut buf, &session).unwrap();
        let read = read_lac(&mut buf.as_slice()).unwrap();

        assert_eq!(read.session, session);
        assert!(read.regions.is_empty());
    }

    #[test]
    fn verify_field_names_on_the_wire() {
        let session = sample_session();

        let mut buf = Vec::new();
        write_lac(&mut buf, &session).unwrap();
        let text = String::from_utf8(buf).unwrap();

        for field in [
            "\"frequency\"",
            "\"preTriggerSamples\"",
            "\"postTriggerSamples\"",
            "\"captureChannels\"",
            "\"channelNumber\"",
            "\"channelName\"",
            "\"triggerType\"",
            "\"triggerChannel\"",
            "\"triggerInverted\"",
            "\"triggerValue\"",
            "\"type\": \"Buffer\"",
        ] {
            assert!(text.contains(field), "missing {} in {}", field, text);
        }
    }

    #[test]
    fn verify_legacy_envelope_shape() {
        let session = sample_session();

        let mut buf = Vec::new();
        write_lac(&mut buf, &session).unwrap();
        let flat: serde_json::Value = serde_json::from_slice(&buf).unwrap();

        let envelope = serde_json::json!({
            "settings": flat,
            "selectedRegions": [
                { "firstSample": 10, "lastSample": 42, "regionName": "burst" }
            ]
        });

        let text = envelope.to_string();
        let read = read_lac(&mut text.as_bytes()).unwrap();

        assert_eq!(read.session, session);
        assert_eq!(read.regions.len(), 1);
        assert_eq!(read.regions[0].first_sample, 10);
        assert_eq!(read.regions[0].last_sample, 42);
        assert_eq!(read.regions[0].region_name.as_deref(), Some("burst"));
    }

    #[test]
    fn verify_envelope_without_regions() {
        let session = sample_session();

        let mut buf = Vec::new();
        write_lac(&mut buf, &session).unwrap();
        let flat: serde_json::Value = serde_json::from_slice(&buf).unwrap();

        let envelope = serde_json::json!({ "settings": flat }).to_string();
        let read = read_lac(&mut envelope.as_bytes()).unwrap();

        assert_eq!(read.session, session);
        assert!(read.regions.is_empty());
    }

    #[test]
    fn verify_malformed_document_is_an_io_error() {
        let mut garbage = "{ not json".as_bytes();
        assert!(matches!(read_lac(&mut garbage), Err(Error::IoError(_))));

        let unknown_trigger = serde_json::json!({
            "frequency": 1000,
            "preTriggerSamples": 0,
            "postTriggerSamples": 0,
            "captureChannels": [],
            "triggerType": 9,
            "triggerChannel": 0,
            "triggerInverted": false,
            "triggerValue": 0
        })
        .to_string();
        assert!(read_lac(&mut unknown_trigger.as_bytes()).is_err());
    }

    #[test]
    fn verify_hidden_and_inverted_round_trip() {
        let session = sample_session();

        let mut buf = Vec::new();
        write_lac(&mut buf, &session).unwrap();
        let read = read_lac(&mut buf.as_slice()).unwrap();

        assert!(read.session.channels[1].hidden);
        assert!(read.session.channels[1].inverted);
        assert!(!read.session.channels[0].hidden);
    }
}
