// Sigrun
// Copyright (c) 2026 The Project Sigrun Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! # Project Sigrun
//!
//! Sigrun is a 100% pure Rust logic-analyzer decoding and capture pipeline.
//!
//! # Support
//!
//! Supported protocol decoders are listed below. All bundled decoders are enabled by default;
//! each can be disabled via its feature flag.
//!
//! | Protocol | Feature Flag | Default |
//! |----------|--------------|---------|
//! | I2C      | `i2c`        | Yes     |
//! | SPI      | `spi`        | Yes     |
//! | UART     | `uart`       | Yes     |
//!
//! # Usage
//!
//! The following steps describe a basic usage of Sigrun:
//!
//! 1.  Instantiate a [`DecoderRegistry`][core::registry::DecoderRegistry] and register all the
//!     decoders that are of interest. Alternatively, you may use [`default::get_decoders`] to
//!     get the default registry with all the enabled decoders pre-registered.
//! 2.  Load or build a [`CaptureSession`][core::capture::CaptureSession] holding the sampled
//!     channels, the sample rate, and the trigger settings.
//! 3.  Bind the decoder's channel roles to capture channels with a
//!     [`ChannelMapping`][core::decoder::ChannelMapping] (or let
//!     [`auto_assign`][core::registry::DecoderRegistry::auto_assign] pick them) and bind
//!     options with [`OptionBindings`][core::decoder::OptionBindings].
//! 4.  Call [`execute`][core::registry::DecoderRegistry::execute] for a one-shot decode, or
//!     drive a decoder instance through a
//!     [`StreamingExecutor`][core::executor::StreamingExecutor] for chunked decoding with
//!     progress and cancellation.
//! 5.  Consume the returned [`Annotation`][core::annotation::Annotation] stream, or persist the
//!     session with `sigrun-format-lac` and export waveforms with `sigrun-format-vcd`.
//!
//! # Adding support for new protocols
//!
//! Simply implement the [`Decoder`][core::decoder::Decoder] trait and register the decoder with
//! the registry!

pub mod default {
    //! The `default` module provides convenience functions and registries to get an implementer
    //! up-and-running as quickly as possible, and to reduce boiler-plate. Using the `default`
    //! module is completely optional and incurs no overhead unless actually used.

    pub mod decoders {
        //! The `decoders` module re-exports all enabled Sigrun protocol decoders.

        #[cfg(feature = "i2c")]
        pub use sigrun_decoder_i2c::I2cDecoder;
        #[cfg(feature = "spi")]
        pub use sigrun_decoder_spi::SpiDecoder;
        #[cfg(feature = "uart")]
        pub use sigrun_decoder_uart::UartDecoder;
    }

    use lazy_static::lazy_static;

    use sigrun_core::registry::DecoderRegistry;

    lazy_static! {
        static ref DECODER_REGISTRY: DecoderRegistry = {
            let mut registry = DecoderRegistry::new();
            register_enabled_decoders(&mut registry);
            registry
        };
    }

    /// Gets the default `DecoderRegistry`. This registry pre-registers all the decoders
    /// selected by the `feature` flags in the includer's `Cargo.toml`. If `features` is not
    /// set, the default set of Sigrun decoders is registered.
    ///
    /// This function is lazy and does not instantiate the `DecoderRegistry` until the first
    /// call to this function.
    pub fn get_decoders() -> &'static DecoderRegistry {
        &DECODER_REGISTRY
    }

    /// Registers all the decoders selected by the `feature` flags in the includer's
    /// `Cargo.toml` on the provided `DecoderRegistry`. If `features` is not set, the default
    /// set of Sigrun decoders is registered.
    ///
    /// Use this function to easily populate a custom registry with all enabled decoders.
    pub fn register_enabled_decoders(registry: &mut DecoderRegistry) {
        #[cfg(feature = "i2c")]
        registry.register_all::<decoders::I2cDecoder>();

        #[cfg(feature = "spi")]
        registry.register_all::<decoders::SpiDecoder>();

        #[cfg(feature = "uart")]
        registry.register_all::<decoders::UartDecoder>();
    }
}

pub use sigrun_core as core;

#[cfg(all(test, feature = "i2c", feature = "spi", feature = "uart"))]
mod tests {
    use super::default;
    use crate::core::decoder::{ChannelMapping, OptionBindings, PROTOCOL_I2C, PROTOCOL_SPI, PROTOCOL_UART};

    #[test]
    fn verify_default_registry_holds_all_decoders() {
        let registry = default::get_decoders();

        assert!(registry.get(PROTOCOL_I2C).is_some());
        assert!(registry.get(PROTOCOL_SPI).is_some());
        assert!(registry.get(PROTOCOL_UART).is_some());
        assert_eq!(registry.list().len(), 3);

        assert_eq!(registry.search("i2c", None).len(), 1);
        assert_eq!(registry.search("", Some(&["bus"])).len(), 3);
    }

    #[test]
    fn verify_auto_assign_against_default_registry() {
        let registry = default::get_decoders();

        let mapping = registry.auto_assign(PROTOCOL_I2C, &[], 8).unwrap();
        assert_eq!(mapping.get("scl"), Some(0));
        assert_eq!(mapping.get("sda"), Some(1));
    }

    #[test]
    fn verify_unknown_option_is_rejected_end_to_end() {
        use crate::core::capture::CaptureChannel;
        use crate::core::decoder::Value;
        use crate::core::sample::BitBuffer;

        let registry = default::get_decoders();
        let channels = vec![
            CaptureChannel::new(0, "SCL", BitBuffer::from_levels(&[1, 1])),
            CaptureChannel::new(1, "SDA", BitBuffer::from_levels(&[1, 1])),
        ];
        let options = OptionBindings::new().with("bogus", Value::Int(1));
        let mapping = ChannelMapping::new().with("scl", 0).with("sda", 1);

        assert!(registry.execute(PROTOCOL_I2C, 1_000_000, &channels, &options, &mapping).is_err());
    }
}
