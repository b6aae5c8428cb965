// Sigrun
// Copyright (c) 2026 The Project Sigrun Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! IEEE 1364 value change dump (VCD) export.
//!
//! Emits the selected channels of a capture session as a change-only VCD document: an initial
//! value per channel inside `$dumpvars`, then one `#<t>` time marker per sample at which at
//! least one channel changed. A time marker is never written without value lines.

use std::io::Write;
use std::ops::Range;
use std::time::{SystemTime, UNIX_EPOCH};

use log::debug;

use sigrun_core::capture::{extract_changes, vcd_ident, CaptureSession, ChangePoint};
use sigrun_core::errors::{bad_config_error, Result};

/// Export `session`'s selected channels as VCD. `region` restricts the export to a sample
/// sub-range; time markers are relative to the region start.
pub fn export_vcd<W: Write>(
    out: &mut W,
    session: &CaptureSession,
    channels: &[u16],
    region: Option<Range<u64>>,
) -> Result<()> {
    if channels.is_empty() {
        return bad_config_error("no channels selected for VCD export");
    }
    session.validate()?;
    if channels.iter().any(|&ch| session.channel(ch).is_none()) {
        return bad_config_error("selected channel is not part of the capture");
    }

    let range = region.unwrap_or(0..session.total_samples());
    let timescale_ns = (1e9 / session.sample_rate_hz as f64).round().max(1.0) as u64;

    let points = extract_changes(session, channels, Some(range.clone()));
    debug!("vcd: exporting {} channels, {} change points", channels.len(), points.len());

    write_header(out, session, channels, timescale_ns)?;
    write_changes(out, channels, range.start, &points)?;

    Ok(())
}

fn write_header<W: Write>(
    out: &mut W,
    session: &CaptureSession,
    channels: &[u16],
    timescale_ns: u64,
) -> Result<()> {
    let epoch_s = SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs());

    writeln!(out, "$date")?;
    writeln!(out, "    {} seconds since the Unix epoch", epoch_s)?;
    writeln!(out, "$end")?;
    writeln!(out, "$version")?;
    writeln!(out, "    sigrun-format-vcd {}", env!("CARGO_PKG_VERSION"))?;
    writeln!(out, "$end")?;
    writeln!(out, "$timescale {}ns $end", timescale_ns)?;
    writeln!(out, "$scope module logic_analyzer $end")?;

    for (i, &ch) in channels.iter().enumerate() {
        // Validated by the caller.
        let name = session.channel(ch).map(|c| c.name.as_str()).unwrap_or("?");
        let name: String =
            name.chars().map(|c| if c.is_whitespace() { '_' } else { c }).collect();
        writeln!(out, "$var wire 1 {} {} $end", vcd_ident(i), name)?;
    }

    writeln!(out, "$upscope $end")?;
    writeln!(out, "$enddefinitions $end")?;
    Ok(())
}

fn write_changes<W: Write>(
    out: &mut W,
    channels: &[u16],
    start_sample: u64,
    points: &[ChangePoint],
) -> Result<()> {
    let ident_of = |channel: u16| {
        let i = channels.iter().position(|&ch| ch == channel).unwrap_or(0);
        vcd_ident(i)
    };

    let mut points = points.iter().peekable();

    // The initial values of every channel live inside the $dumpvars block at time zero.
    writeln!(out, "#0")?;
    writeln!(out, "$dumpvars")?;
    while let Some(p) = points.peek() {
        if p.sample != start_sample {
            break;
        }
        writeln!(out, "{}{}", p.value, ident_of(p.channel))?;
        points.next();
    }
    writeln!(out, "$end")?;

    // Change-only body, grouped per time marker.
    let mut current: Option<u64> = None;
    for p in points {
        if current != Some(p.sample) {
            writeln!(out, "#{}", p.sample - start_sample)?;
            current = Some(p.sample);
        }
        writeln!(out, "{}{}", p.value, ident_of(p.channel))?;
    }

    Ok(())
}
