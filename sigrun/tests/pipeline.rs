// Sigrun
// Copyright (c) 2026 The Project Sigrun Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end pipeline coverage: capture session in, annotations and interchange formats out.

use sigrun::core::capture::{CaptureChannel, CaptureSession};
use sigrun::core::decoder::{ChannelMapping, OptionBindings, PROTOCOL_I2C};
use sigrun::core::sample::BitBuffer;
use sigrun::default;

use sigrun_decoder_i2c as i2c;
use sigrun_format_lac::{read_lac, write_lac};
use sigrun_format_vcd::export_vcd;

// An I2C transaction: start, address 0x50 write, ack, data 0xCA, nack, stop. Clock cells are
// four samples wide with the rising edge on the second sample.
fn i2c_session() -> CaptureSession {
    let mut scl: Vec<u8> = vec![1, 1];
    let mut sda: Vec<u8> = vec![1, 1];

    let mut push = |s: u8, d: u8| {
        scl.push(s);
        sda.push(d);
    };

    // Start.
    push(1, 1);
    push(1, 0);
    push(0, 0);

    // Address 0xA0 (0x50 write), ack, data 0xCA, nack.
    let mut bit = |b: u8| {
        for levels in [(0, b), (1, b), (1, b), (0, b)] {
            scl.push(levels.0);
            sda.push(levels.1);
        }
    };
    for byte in [0xA0u8, 0xCA] {
        for i in (0..8).rev() {
            bit((byte >> i) & 1);
        }
        bit(u8::from(byte == 0xCA)); // ack after the address, nack after the data
    }

    // Stop.
    for levels in [(0u8, 0u8), (1, 0), (1, 1), (1, 1)] {
        scl.push(levels.0);
        sda.push(levels.1);
    }

    let mut session = CaptureSession::new("i2c-write", 1_000_000);
    session.post_trigger = scl.len() as u64;
    session.channels = vec![
        CaptureChannel::new(0, "SCL", BitBuffer::from_levels(&scl)),
        CaptureChannel::new(1, "SDA", BitBuffer::from_levels(&sda)),
    ];
    session.validate().unwrap();
    session
}

#[test]
fn decode_persist_and_export_a_capture() {
    let session = i2c_session();

    // Decode through the default registry.
    let registry = default::get_decoders();
    let mapping = ChannelMapping::new().with("scl", 0).with("sda", 1);
    let outcome = registry
        .execute(PROTOCOL_I2C, session.sample_rate_hz, &session.channels, &OptionBindings::new(), &mapping)
        .unwrap();

    let kinds: Vec<u16> = outcome
        .annotations
        .iter()
        .filter(|a| a.kind != i2c::ANN_BIT)
        .map(|a| a.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            i2c::ANN_START,
            i2c::ANN_ADDR_WRITE,
            i2c::ANN_ACK,
            i2c::ANN_DATA_WRITE,
            i2c::ANN_NACK,
            i2c::ANN_STOP,
        ]
    );

    // Persist and reload the session.
    let mut lac = Vec::new();
    write_lac(&mut lac, &session).unwrap();
    let reloaded = read_lac(&mut lac.as_slice()).unwrap();
    assert_eq!(reloaded.session, session);

    // Decoding the reloaded session yields the same annotations.
    let again = registry
        .execute(
            PROTOCOL_I2C,
            reloaded.session.sample_rate_hz,
            &reloaded.session.channels,
            &OptionBindings::new(),
            &mapping,
        )
        .unwrap();
    assert_eq!(again.annotations, outcome.annotations);

    // The same capture exports as a change-only VCD document.
    let mut vcd = Vec::new();
    export_vcd(&mut vcd, &session, &[0, 1], None).unwrap();
    let vcd = String::from_utf8(vcd).unwrap();

    assert!(vcd.contains("$var wire 1 ! SCL $end"));
    assert!(vcd.contains("$var wire 1 \" SDA $end"));
    assert!(vcd.contains("$dumpvars"));
}
