// Sigrun
// Copyright (c) 2026 The Project Sigrun Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `annotation` module defines decoded protocol events and the append-only buffer a
//! decoder run emits them into.

use log::warn;

use crate::decoder::DecoderDescriptor;

/// A typed payload attached to an annotation. Closed per annotation kind; free-form payloads
/// are not representable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RawData {
    None,
    /// A single sampled bit.
    Bit(u8),
    /// A data byte.
    Byte(u8),
    /// A data word wider than one byte.
    Word(u32),
    /// A bus address plus transfer direction.
    Addr { addr: u16, read: bool },
}

/// One decoded event over a sample range.
///
/// `values` renders the event with decreasing verbosity; a display layer picks the longest
/// string that fits. The range is inclusive on both ends and `start_sample <= end_sample`.
#[derive(Clone, Debug, PartialEq)]
pub struct Annotation {
    pub start_sample: u64,
    pub end_sample: u64,
    pub kind: u16,
    pub values: Vec<String>,
    pub raw: RawData,
}

impl Annotation {
    pub fn new(start_sample: u64, end_sample: u64, kind: u16, values: Vec<String>, raw: RawData) -> Self {
        debug_assert!(start_sample <= end_sample);
        Annotation { start_sample, end_sample, kind, values, raw }
    }
}

struct RowState {
    last_end: u64,
    occupied: bool,
}

/// The append-only annotation sink of a single decoder run.
///
/// The buffer knows the decoder's kind-to-row grouping and enforces, per row, that annotation
/// starts are non-decreasing and ranges do not overlap. Two annotations may share exactly one
/// boundary sample; bit cells produced by integer rounding legitimately abut. A violating
/// annotation is a decoder bug: the buffer surfaces a warning annotation in its place (when the
/// descriptor designates a warning kind) and drops the conflicting one rather than erroring.
pub struct AnnotationBuffer {
    anns: Vec<Annotation>,
    rows: Vec<RowState>,
    // Kind to row index, table-indexed by kind.
    kind_rows: Vec<Option<usize>>,
    warning_kind: Option<u16>,
    dropped: u64,
}

impl AnnotationBuffer {
    pub fn new(desc: &DecoderDescriptor) -> Self {
        let max_kind =
            desc.annotation_rows.iter().flat_map(|r| r.kinds.iter()).max().map_or(0, |&k| k as usize + 1);

        let mut kind_rows = vec![None; max_kind];
        for (row, desc) in desc.annotation_rows.iter().enumerate() {
            for &kind in desc.kinds {
                kind_rows[kind as usize] = Some(row);
            }
        }

        AnnotationBuffer {
            anns: Vec::new(),
            rows: desc.annotation_rows.iter().map(|_| RowState { last_end: 0, occupied: false }).collect(),
            kind_rows,
            warning_kind: desc.warning_kind,
            dropped: 0,
        }
    }

    /// Append an annotation, enforcing the per-row ordering and non-overlap invariants.
    pub fn put(&mut self, ann: Annotation) {
        let row = self.kind_rows.get(ann.kind as usize).copied().flatten();

        if let Some(row) = row {
            let state = &mut self.rows[row];

            if state.occupied && ann.start_sample < state.last_end {
                warn!(
                    "annotation kind {} at [{}, {}] overlaps its row (last end {}); dropping",
                    ann.kind, ann.start_sample, ann.end_sample, state.last_end
                );
                self.dropped += 1;

                if let Some(kind) = self.warning_kind {
                    // The surfaced warning starts where the row currently ends, keeping the
                    // warning row itself consistent.
                    let at = state.last_end;
                    self.surface_warning(at, ann.end_sample.max(at), kind);
                }
                return;
            }

            state.last_end = ann.end_sample;
            state.occupied = true;
        }

        self.anns.push(ann);
    }

    fn surface_warning(&mut self, start: u64, end: u64, kind: u16) {
        let row = self.kind_rows.get(kind as usize).copied().flatten();

        if let Some(row) = row {
            let state = &mut self.rows[row];
            if state.occupied && start < state.last_end {
                // The diagnostic itself does not fit; drop it silently rather than recurse.
                return;
            }
            state.last_end = end;
            state.occupied = true;
        }

        self.anns.push(Annotation::new(
            start,
            end,
            kind,
            vec!["Annotation dropped: row overlap".to_string(), "Overlap".to_string()],
            RawData::None,
        ));
    }

    /// All annotations appended so far, in emission order.
    pub fn annotations(&self) -> &[Annotation] {
        &self.anns
    }

    /// Consume the buffer, yielding the annotations of the run.
    pub fn into_annotations(self) -> Vec<Annotation> {
        self.anns
    }

    /// The annotations of a single kind, in emission order.
    pub fn of_kind(&self, kind: u16) -> impl Iterator<Item = &Annotation> {
        self.anns.iter().filter(move |a| a.kind == kind)
    }

    /// The row an annotation kind belongs to, if any.
    pub fn row_of(&self, kind: u16) -> Option<usize> {
        self.kind_rows.get(kind as usize).copied().flatten()
    }

    /// How many conflicting annotations were dropped.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn len(&self) -> usize {
        self.anns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{AnnotationDesc, DecoderDescriptor, ProtocolId, RowDesc};
    use crate::errors::unsupported_error;

    const TEST_ANNOTATIONS: &[AnnotationDesc] = &[
        AnnotationDesc { kind: 0, short: "data", long: "Data", abbr: None },
        AnnotationDesc { kind: 1, short: "warning", long: "Warning", abbr: None },
    ];

    const TEST_ROWS: &[RowDesc] = &[
        RowDesc { id: "data", name: "Data", kinds: &[0] },
        RowDesc { id: "warnings", name: "Warnings", kinds: &[1] },
    ];

    fn test_descriptor() -> DecoderDescriptor {
        DecoderDescriptor {
            id: ProtocolId(0xfffe),
            short_name: "test",
            long_name: "Test",
            description: "",
            license: "MPL-2.0",
            inputs: &["logic"],
            outputs: &["test"],
            tags: &[],
            channels: &[],
            options: &[],
            annotations: TEST_ANNOTATIONS,
            annotation_rows: TEST_ROWS,
            warning_kind: Some(1),
            inst_func: |_| unsupported_error("test"),
        }
    }

    fn ann(start: u64, end: u64, kind: u16) -> Annotation {
        Annotation::new(start, end, kind, vec![], RawData::None)
    }

    #[test]
    fn verify_in_order_appends_are_kept() {
        let desc = test_descriptor();
        let mut buf = AnnotationBuffer::new(&desc);

        buf.put(ann(0, 10, 0));
        buf.put(ann(10, 20, 0));
        buf.put(ann(25, 30, 0));

        assert_eq!(buf.len(), 3);
        assert_eq!(buf.dropped(), 0);
    }

    #[test]
    fn verify_overlap_is_dropped_and_surfaced() {
        let desc = test_descriptor();
        let mut buf = AnnotationBuffer::new(&desc);

        buf.put(ann(0, 10, 0));
        buf.put(ann(5, 15, 0));

        assert_eq!(buf.dropped(), 1);
        // The conflicting annotation is gone; a warning took its place.
        assert_eq!(buf.of_kind(0).count(), 1);
        assert_eq!(buf.of_kind(1).count(), 1);
    }

    #[test]
    fn verify_rows_are_independent() {
        let desc = test_descriptor();
        let mut buf = AnnotationBuffer::new(&desc);

        buf.put(ann(0, 10, 0));
        // A warning inside the data annotation's range is fine: different row.
        buf.put(ann(2, 4, 1));

        assert_eq!(buf.len(), 2);
        assert_eq!(buf.dropped(), 0);
    }

    #[test]
    fn verify_zero_length_annotations_may_stack_boundaries() {
        let desc = test_descriptor();
        let mut buf = AnnotationBuffer::new(&desc);

        buf.put(ann(5, 5, 0));
        buf.put(ann(5, 8, 0));

        assert_eq!(buf.len(), 2);
        assert_eq!(buf.dropped(), 0);
    }
}
