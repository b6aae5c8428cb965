// Sigrun
// Copyright (c) 2026 The Project Sigrun Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `wait` module provides the primitive every decoder is written on top of: advance a
//! sample cursor to the next sample satisfying a condition over channels.
//!
//! A condition is one or more alternative conjunctions of per-channel terms. `wait` returns the
//! smallest index at or past the cursor where at least one alternative holds, which alternatives
//! held, and the pin levels there. Running out of samples is reported as [`WaitOutcome::End`],
//! the decoder loop's termination (or chunk-suspension) signal, not an error.

use smallvec::SmallVec;

use crate::sample::{Edge, SampleSource};

/// A per-channel predicate term.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Term {
    /// The channel is at a high level.
    High,
    /// The channel is at a low level.
    Low,
    /// The channel transitions low to high at this sample.
    Rising,
    /// The channel transitions high to low at this sample.
    Falling,
    /// The channel transitions in either direction at this sample.
    Either,
    /// The channel holds the same level as the previous sample.
    Stable,
}

/// A conjunction of terms over distinct channels. Matches at a sample only if every term holds.
#[derive(Clone, Debug, Default)]
pub struct Conj {
    terms: SmallVec<[(u16, Term); 4]>,
}

impl Conj {
    pub fn new() -> Self {
        Conj { terms: SmallVec::new() }
    }

    /// Add a term for `channel`. Builder-style.
    pub fn term(mut self, channel: u16, term: Term) -> Self {
        self.terms.push((channel, term));
        self
    }

    pub fn terms(&self) -> &[(u16, Term)] {
        &self.terms
    }

    fn holds_at(&self, src: &SampleSource<'_>, k: u64) -> bool {
        self.terms.iter().all(|&(ch, term)| {
            let cur = src.bit(ch, k);
            match term {
                Term::High => cur == 1,
                Term::Low => cur == 0,
                // Transition terms compare against sample k-1 and so cannot hold at sample 0.
                Term::Rising => k > 0 && src.bit(ch, k - 1) == 0 && cur == 1,
                Term::Falling => k > 0 && src.bit(ch, k - 1) == 1 && cur == 0,
                Term::Either => k > 0 && src.bit(ch, k - 1) != cur,
                Term::Stable => k > 0 && src.bit(ch, k - 1) == cur,
            }
        })
    }
}

/// A wait condition: alternatives over conjunctions, or an unconditional cursor skip.
#[derive(Clone, Debug)]
pub enum WaitCond {
    /// Match the first sample at which at least one alternative conjunction holds.
    Any(SmallVec<[Conj; 4]>),
    /// Place the cursor at the absolute sample index. The relative `skip N` form of the decoder
    /// literature is `SkipTo(cursor + N)`; absolute targets re-issue cleanly after a chunk
    /// boundary suspension.
    SkipTo(u64),
}

impl WaitCond {
    /// A condition with a single conjunction.
    pub fn single(conj: Conj) -> Self {
        let mut alts = SmallVec::new();
        alts.push(conj);
        WaitCond::Any(alts)
    }

    /// A condition with several alternative conjunctions. The `matched` bitmask of the result
    /// assigns bit `i` to `alts[i]`.
    pub fn any<I: IntoIterator<Item = Conj>>(alts: I) -> Self {
        WaitCond::Any(alts.into_iter().collect())
    }

    pub fn skip_to(target: u64) -> Self {
        WaitCond::SkipTo(target)
    }
}

/// The pin levels observed at a matched sample, one entry per channel referenced by the
/// condition. Unreferenced channels read as idle-high.
#[derive(Clone, Debug, Default)]
pub struct Pins {
    pins: SmallVec<[(u16, u8); 4]>,
}

impl Pins {
    pub fn get(&self, channel: u16) -> u8 {
        self.pins.iter().find(|&&(ch, _)| ch == channel).map_or(1, |&(_, bit)| bit)
    }
}

/// A successful wait.
#[derive(Clone, Debug)]
pub struct WaitMatch {
    /// The matched sample index. The cursor now rests here.
    pub at: u64,
    /// Pin levels at the matched sample.
    pub pins: Pins,
    /// One bit per alternative conjunction that held at the matched sample. More than one bit
    /// may be set.
    pub matched: u64,
}

/// The outcome of a wait.
#[derive(Clone, Debug)]
pub enum WaitOutcome {
    Match(WaitMatch),
    /// The condition did not hold before the cursor limit. The cursor is parked at the limit;
    /// raising the limit (the next streaming chunk) resumes the scan without rescanning.
    End,
}

/// The sample cursor a decoder advances through a run.
///
/// `pos` is the next index to examine; the spec-level cursor `c` is `pos - 1`. `limit` bounds the
/// scan exclusively and is raised chunk by chunk during streaming decodes.
#[derive(Clone, Debug)]
pub struct Waiter {
    pos: u64,
    limit: u64,
}

impl Waiter {
    pub fn new(limit: u64) -> Self {
        Waiter { pos: 0, limit }
    }

    /// Raise (or set) the exclusive scan limit.
    pub fn set_limit(&mut self, limit: u64) {
        self.limit = limit;
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// The next sample index the cursor will examine.
    pub fn pos(&self) -> u64 {
        self.pos
    }

    /// Reset the cursor to the start of the stream.
    pub fn reset(&mut self) {
        self.pos = 0;
    }

    /// Advance to the next sample satisfying `cond`, per the semantics above.
    ///
    /// For a fixed capture and cursor this is a pure function; the cursor is only updated on
    /// `Match` (to the matched index) or on `End` (to the limit).
    pub fn wait(&mut self, src: &SampleSource<'_>, cond: &WaitCond) -> WaitOutcome {
        match cond {
            WaitCond::SkipTo(target) => self.skip_to(src, *target),
            WaitCond::Any(alts) => self.scan(src, alts),
        }
    }

    fn skip_to(&mut self, src: &SampleSource<'_>, target: u64) -> WaitOutcome {
        // The cursor never moves backward.
        let k = target.max(self.pos.saturating_sub(1));

        if k >= self.limit {
            self.pos = self.limit;
            return WaitOutcome::End;
        }

        self.pos = k + 1;

        WaitOutcome::Match(WaitMatch { at: k, pins: pins_at(src, &[], k), matched: 1 })
    }

    fn scan(&mut self, src: &SampleSource<'_>, alts: &[Conj]) -> WaitOutcome {
        debug_assert!(!alts.is_empty());
        debug_assert!(alts.len() <= 64);

        // Fast path: a lone edge term delegates to the source's edge scan.
        if alts.len() == 1 && alts[0].terms().len() == 1 {
            let (ch, term) = alts[0].terms()[0];
            let polarity = match term {
                Term::Rising => Some(Edge::Rising),
                Term::Falling => Some(Edge::Falling),
                Term::Either => Some(Edge::Either),
                _ => None,
            };
            if let Some(polarity) = polarity {
                return self.scan_edge(src, ch, polarity);
            }
        }

        let mut k = self.pos;
        while k < self.limit {
            let mut matched = 0u64;
            for (i, conj) in alts.iter().enumerate() {
                if conj.holds_at(src, k) {
                    matched |= 1 << i;
                }
            }

            if matched != 0 {
                self.pos = k + 1;
                let channels: SmallVec<[u16; 4]> = collect_channels(alts);
                return WaitOutcome::Match(WaitMatch { at: k, pins: pins_at(src, &channels, k), matched });
            }

            k += 1;
        }

        self.pos = self.limit;
        WaitOutcome::End
    }

    fn scan_edge(&mut self, src: &SampleSource<'_>, ch: u16, polarity: Edge) -> WaitOutcome {
        let from = self.pos.saturating_sub(1);

        match src.edge_after(ch, from, polarity) {
            Some(k) if k >= self.pos && k < self.limit => {
                self.pos = k + 1;
                WaitOutcome::Match(WaitMatch { at: k, pins: pins_at(src, &[ch], k), matched: 1 })
            }
            _ => {
                self.pos = self.limit;
                WaitOutcome::End
            }
        }
    }
}

fn collect_channels(alts: &[Conj]) -> SmallVec<[u16; 4]> {
    let mut channels: SmallVec<[u16; 4]> = SmallVec::new();
    for conj in alts {
        for &(ch, _) in conj.terms() {
            if !channels.contains(&ch) {
                channels.push(ch);
            }
        }
    }
    channels
}

fn pins_at(src: &SampleSource<'_>, channels: &[u16], k: u64) -> Pins {
    Pins { pins: channels.iter().map(|&ch| (ch, src.bit(ch, k))).collect() }
}
