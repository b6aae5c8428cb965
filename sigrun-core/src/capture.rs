// Sigrun
// Copyright (c) 2026 The Project Sigrun Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `capture` module carries the capture session aggregate and the change-point extraction
//! feeding waveform export.

use std::ops::Range;

use crate::errors::{bad_config_error, Result};
use crate::sample::BitBuffer;

/// One digital channel of a capture.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureChannel {
    /// Stable, capture-unique channel number.
    pub channel_number: u16,
    pub name: String,
    /// Hidden channels are skipped by display surfaces but decode and export normally.
    pub hidden: bool,
    /// Inverted channels record the complement of the wire level; the sample source resolves
    /// this before decoders see the data.
    pub inverted: bool,
    pub samples: BitBuffer,
}

impl CaptureChannel {
    pub fn new(channel_number: u16, name: &str, samples: BitBuffer) -> Self {
        CaptureChannel { channel_number, name: name.to_string(), hidden: false, inverted: false, samples }
    }
}

/// The trigger variant that armed a capture.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TriggerKind {
    Edge,
    Complex,
    Fast,
    Blast,
}

impl TriggerKind {
    /// The wire encoding used by the LAC capture format.
    pub fn to_code(self) -> u8 {
        match self {
            TriggerKind::Edge => 0,
            TriggerKind::Complex => 1,
            TriggerKind::Fast => 2,
            TriggerKind::Blast => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(TriggerKind::Edge),
            1 => Some(TriggerKind::Complex),
            2 => Some(TriggerKind::Fast),
            3 => Some(TriggerKind::Blast),
            _ => None,
        }
    }
}

/// The trigger condition of a capture.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Trigger {
    /// The channel the trigger observed.
    pub channel: u16,
    pub kind: TriggerKind,
    pub inverted: bool,
    /// Pattern value for the pattern-trigger kinds.
    pub value: u8,
}

impl Default for Trigger {
    fn default() -> Self {
        Trigger { channel: 0, kind: TriggerKind::Edge, inverted: false, value: 0 }
    }
}

/// A capture session: the sample data of one acquisition plus the settings that produced it.
///
/// A session is mutated only before decoding and is frozen (shared immutably) during a run.
#[derive(Clone, Debug, PartialEq)]
pub struct CaptureSession {
    pub name: String,
    /// Identity of the acquiring device; opaque to the decoding core.
    pub device_version: Option<String>,
    pub device_serial: Option<String>,
    /// Sample rate in Hz. Must be greater than zero for any decoding.
    pub sample_rate_hz: u64,
    /// Samples acquired before the trigger point.
    pub pre_trigger: u64,
    /// Samples acquired after the trigger point.
    pub post_trigger: u64,
    pub trigger: Trigger,
    pub channels: Vec<CaptureChannel>,
}

impl CaptureSession {
    pub fn new(name: &str, sample_rate_hz: u64) -> Self {
        CaptureSession {
            name: name.to_string(),
            device_version: None,
            device_serial: None,
            sample_rate_hz,
            pre_trigger: 0,
            post_trigger: 0,
            trigger: Default::default(),
            channels: Vec::new(),
        }
    }

    /// The total sample count of the capture.
    pub fn total_samples(&self) -> u64 {
        self.pre_trigger + self.post_trigger
    }

    pub fn channel(&self, number: u16) -> Option<&CaptureChannel> {
        self.channels.iter().find(|c| c.channel_number == number)
    }

    /// Check the session invariants: a positive sample rate, a trigger referencing an existing
    /// channel, unique channel numbers, and every channel holding exactly
    /// `pre_trigger + post_trigger` samples.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate_hz == 0 {
            return bad_config_error("capture sample rate must be greater than zero");
        }

        if !self.channels.is_empty() && self.channel(self.trigger.channel).is_none() {
            return bad_config_error("trigger references a channel the capture does not have");
        }

        let total = self.total_samples();
        for (i, ch) in self.channels.iter().enumerate() {
            if ch.samples.len() != total {
                return bad_config_error("channel sample count does not match pre + post trigger");
            }
            if self.channels[..i].iter().any(|o| o.channel_number == ch.channel_number) {
                return bad_config_error("duplicate channel number in capture");
            }
        }

        Ok(())
    }
}

/// A sample at which a channel's value differs from the previous sample, or the initial value
/// of a channel at the start of an extraction range.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ChangePoint {
    pub sample: u64,
    pub channel: u16,
    pub value: u8,
}

/// Enumerate the change points of the selected channels over `range` (the whole capture when
/// `None`), in sample order.
///
/// Every selected channel contributes an initial-value point at the first sample of the range;
/// after that a channel contributes a point only where its value changes. The result is ordered
/// by sample, then by position in `selected`.
pub fn extract_changes(
    session: &CaptureSession,
    selected: &[u16],
    range: Option<Range<u64>>,
) -> Vec<ChangePoint> {
    let range = range.unwrap_or(0..session.total_samples());

    let mut points = Vec::new();
    let mut last: Vec<u8> = Vec::with_capacity(selected.len());

    // Initial values.
    for &number in selected {
        let value = channel_bit(session, number, range.start);
        points.push(ChangePoint { sample: range.start, channel: number, value });
        last.push(value);
    }

    for sample in (range.start + 1)..range.end {
        for (i, &number) in selected.iter().enumerate() {
            let value = channel_bit(session, number, sample);
            if value != last[i] {
                points.push(ChangePoint { sample, channel: number, value });
                last[i] = value;
            }
        }
    }

    points
}

fn channel_bit(session: &CaptureSession, number: u16, sample: u64) -> u8 {
    session
        .channel(number)
        .and_then(|ch| ch.samples.get(sample).map(|b| (b ^ ch.inverted) as u8))
        .unwrap_or(0)
}

/// The printable-ASCII alphabet VCD identifiers draw from.
const VCD_ID_FIRST: u8 = b'!';
const VCD_ID_COUNT: usize = 94;

/// The VCD variable identifier of the `i`-th selected channel: a single character from `!` to
/// `~`, widening to two characters once the alphabet is exhausted.
pub fn vcd_ident(i: usize) -> String {
    if i < VCD_ID_COUNT {
        ((VCD_ID_FIRST + i as u8) as char).to_string()
    }
    else {
        let hi = (VCD_ID_FIRST + (i / VCD_ID_COUNT) as u8) as char;
        let lo = (VCD_ID_FIRST + (i % VCD_ID_COUNT) as u8) as char;
        format!("{}{}", hi, lo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_with(levels: &[&[u8]]) -> CaptureSession {
        let mut session = CaptureSession::new("test", 1_000_000);
        session.post_trigger = levels.first().map_or(0, |l| l.len() as u64);
        session.channels = levels
            .iter()
            .enumerate()
            .map(|(i, l)| CaptureChannel::new(i as u16, &format!("CH{}", i), BitBuffer::from_levels(l)))
            .collect();
        session
    }

    #[test]
    fn verify_session_validation() {
        let mut session = session_with(&[&[0, 1, 0]]);
        assert!(session.validate().is_ok());

        session.sample_rate_hz = 0;
        assert!(session.validate().is_err());
        session.sample_rate_hz = 1_000_000;

        session.trigger.channel = 5;
        assert!(session.validate().is_err());
        session.trigger.channel = 0;

        session.post_trigger = 7;
        assert!(session.validate().is_err());
    }

    #[test]
    fn verify_duplicate_channel_numbers_rejected() {
        let mut session = session_with(&[&[0, 1], &[1, 0]]);
        session.channels[1].channel_number = 0;
        assert!(session.validate().is_err());
    }

    #[test]
    fn verify_change_extraction_scenario() {
        // CH0 and CH1 from the VCD change-only scenario.
        let ch0 = [1, 1, 1, 0, 0, 1, 1, 1, 1, 1];
        let ch1 = [0, 0, 1, 1, 1, 1, 0, 0, 0, 0];
        let session = session_with(&[&ch0, &ch1]);

        let points = extract_changes(&session, &[0, 1], None);

        let expected = [
            ChangePoint { sample: 0, channel: 0, value: 1 },
            ChangePoint { sample: 0, channel: 1, value: 0 },
            ChangePoint { sample: 2, channel: 1, value: 1 },
            ChangePoint { sample: 3, channel: 0, value: 0 },
            ChangePoint { sample: 5, channel: 0, value: 1 },
            ChangePoint { sample: 6, channel: 1, value: 0 },
        ];
        assert_eq!(points, expected);
    }

    #[test]
    fn verify_change_extraction_subrange() {
        let ch0 = [1, 1, 0, 0, 1, 1];
        let session = session_with(&[&ch0]);

        let points = extract_changes(&session, &[0], Some(2..6));

        let expected = [
            ChangePoint { sample: 2, channel: 0, value: 0 },
            ChangePoint { sample: 4, channel: 0, value: 1 },
        ];
        assert_eq!(points, expected);
    }

    #[test]
    fn verify_inverted_channel_exports_logical_values() {
        let mut session = session_with(&[&[0, 0, 1]]);
        session.channels[0].inverted = true;

        let points = extract_changes(&session, &[0], None);
        assert_eq!(points[0].value, 1);
        assert_eq!(points[1], ChangePoint { sample: 2, channel: 0, value: 0 });
    }

    #[test]
    fn verify_vcd_ident_assignment() {
        assert_eq!(vcd_ident(0), "!");
        assert_eq!(vcd_ident(1), "\"");
        assert_eq!(vcd_ident(93), "~");
        assert_eq!(vcd_ident(94), "\"!");
        assert_eq!(vcd_ident(95), "\"\"");
        assert_eq!(vcd_ident(94 + 93), "\"~");
        assert_eq!(vcd_ident(2 * 94), "#!");
    }
}
