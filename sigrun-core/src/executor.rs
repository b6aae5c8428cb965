// Sigrun
// Copyright (c) 2026 The Project Sigrun Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `executor` module feeds a decoder in bounded chunks with overlap, reporting progress and
//! honoring cooperative cancellation.
//!
//! Dispatch is a serial cooperative loop: every bundled decoder carries its decode state across
//! chunk boundaries, so chunks of one run are never processed concurrently and annotations reach
//! the sink in chunk order by construction. Suspension points are the inter-chunk pacing sleep
//! and the cancellation poll at chunk boundaries; inside a chunk, processing is synchronous.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::info;

use crate::annotation::{Annotation, AnnotationBuffer};
use crate::decoder::{ChunkSpan, Decoder};
use crate::errors::{bad_config_error, Error, Result};
use crate::sample::SampleSource;

/// Tuning of a streaming decode run.
#[derive(Copy, Clone, Debug)]
pub struct StreamingConfig {
    /// Samples per chunk.
    pub chunk_size: u64,
    /// Minimum delay between successive chunk dispatches, keeping the host cooperative.
    pub processing_interval_ms: u64,
    /// Upper bound on in-flight chunks. Decoders with carried cross-chunk state (all bundled
    /// protocols) are dispatched strictly serially regardless.
    pub max_concurrent_chunks: usize,
    /// Whether to invoke the progress callback after each chunk.
    pub progress_enabled: bool,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        StreamingConfig {
            chunk_size: 65_536,
            processing_interval_ms: 0,
            max_concurrent_chunks: 1,
            progress_enabled: false,
        }
    }
}

/// A progress report, delivered after each completed chunk.
#[derive(Clone, Debug)]
pub struct Progress {
    pub total_samples: u64,
    pub processed_samples: u64,
    pub progress_percent: f64,
    /// One-based index of the chunk just completed.
    pub current_chunk: u64,
    pub total_chunks: u64,
    pub result_count: u64,
    /// Samples per second over the run so far.
    pub processing_speed: f64,
    pub estimated_time_remaining_ms: u64,
}

/// Summary statistics of a completed (or cancelled) streaming run.
#[derive(Clone, Debug, Default)]
pub struct StreamingStats {
    pub total_samples: u64,
    pub total_results: u64,
    pub processing_time_ms: u64,
    /// Samples per second.
    pub average_speed: f64,
    pub chunks_processed: u64,
}

/// The result of a streaming decode: the annotations flushed, run statistics, and whether the
/// run was cut short by cancellation.
#[derive(Debug)]
pub struct StreamingOutcome {
    pub annotations: Vec<Annotation>,
    pub stats: StreamingStats,
    pub cancelled: bool,
}

/// A shared cooperative cancellation flag, polled at chunk boundaries.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Compute the chunk spans of a run: chunk 0 starts at sample 0 with no overlap; every later
/// chunk reaches back `min(1000, chunk_size / 10)` samples so events straddling a boundary can
/// resolve.
pub fn chunk_plan(total_samples: u64, chunk_size: u64) -> Vec<ChunkSpan> {
    debug_assert!(chunk_size > 0);

    if total_samples == 0 {
        return Vec::new();
    }

    let overlap = (chunk_size / 10).min(1000);
    let n_chunks = total_samples.div_ceil(chunk_size);

    (0..n_chunks)
        .map(|i| {
            let base = i * chunk_size;
            ChunkSpan {
                start: if i == 0 { 0 } else { base - overlap },
                end: (base + chunk_size).min(total_samples),
                index: i,
                is_last: i + 1 == n_chunks,
            }
        })
        .collect()
}

/// Drives chunked decode runs. At most one run may be active per executor instance; a
/// concurrent call fails immediately with `Busy`.
#[derive(Default)]
pub struct StreamingExecutor {
    busy: AtomicBool,
}

struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl StreamingExecutor {
    pub fn new() -> Self {
        Default::default()
    }

    /// Run `decoder` over the full sample source in chunks.
    ///
    /// The decoder is reset before the first chunk. On cancellation the annotations flushed so
    /// far are returned with `cancelled` set; configuration problems fail with `BadConfig`
    /// before any chunk is dispatched.
    pub fn streaming_decode(
        &self,
        decoder: &mut dyn Decoder,
        src: &SampleSource<'_>,
        config: &StreamingConfig,
        cancel: Option<&CancelToken>,
        mut on_progress: Option<&mut dyn FnMut(&Progress)>,
    ) -> Result<StreamingOutcome> {
        if config.chunk_size == 0 {
            return bad_config_error("streaming chunk size must be greater than zero");
        }
        if config.max_concurrent_chunks == 0 {
            return bad_config_error("streaming chunk concurrency must be greater than zero");
        }

        if self.busy.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return Err(Error::Busy);
        }
        let _guard = BusyGuard(&self.busy);

        let total_samples = src.total_len();
        let plan = chunk_plan(total_samples, config.chunk_size);
        let total_chunks = plan.len() as u64;

        decoder.reset();
        let mut sink = AnnotationBuffer::new(decoder.descriptor());

        let started = Instant::now();
        let mut cancelled = false;
        let mut chunks_processed = 0u64;
        let mut processed_samples = 0u64;

        for span in plan {
            if cancel.is_some_and(|c| c.is_cancelled()) {
                cancelled = true;
                break;
            }

            decoder.process_chunk(src, span, &mut sink)?;

            chunks_processed += 1;
            processed_samples = span.end;

            if config.progress_enabled {
                if let Some(cb) = on_progress.as_deref_mut() {
                    cb(&progress_report(
                        total_samples,
                        processed_samples,
                        span.index + 1,
                        total_chunks,
                        sink.len() as u64,
                        started.elapsed(),
                    ));
                }
            }

            if config.processing_interval_ms > 0 && !span.is_last {
                std::thread::sleep(Duration::from_millis(config.processing_interval_ms));
            }
        }

        let elapsed = started.elapsed();
        let stats = StreamingStats {
            total_samples,
            total_results: sink.len() as u64,
            processing_time_ms: elapsed.as_millis() as u64,
            average_speed: speed(processed_samples, elapsed),
            chunks_processed,
        };

        info!(
            "streaming decode: {} samples, {} chunks, {} annotations{}",
            stats.total_samples,
            stats.chunks_processed,
            stats.total_results,
            if cancelled { " (cancelled)" } else { "" }
        );

        Ok(StreamingOutcome { annotations: sink.into_annotations(), stats, cancelled })
    }
}

fn speed(samples: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        samples as f64 / secs
    }
    else {
        0.0
    }
}

fn progress_report(
    total_samples: u64,
    processed_samples: u64,
    current_chunk: u64,
    total_chunks: u64,
    result_count: u64,
    elapsed: Duration,
) -> Progress {
    let processing_speed = speed(processed_samples, elapsed);

    let remaining = total_samples - processed_samples;
    let estimated_time_remaining_ms = if processing_speed > 0.0 {
        (remaining as f64 / processing_speed * 1000.0) as u64
    }
    else {
        0
    };

    Progress {
        total_samples,
        processed_samples,
        progress_percent: if total_samples > 0 {
            100.0 * processed_samples as f64 / total_samples as f64
        }
        else {
            100.0
        },
        current_chunk,
        total_chunks,
        result_count,
        processing_speed,
        estimated_time_remaining_ms,
    }
}
