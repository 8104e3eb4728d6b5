//! Diarization segment post-processing
//!
//! Two passes over the segments of one task:
//!
//! - adjacent merge: consecutive segments of the same speaker separated by
//!   less than the merge gap collapse into one
//! - speaker cap: when more distinct speakers than allowed remain, the
//!   longest-speaking ones are kept and renumbered by rank, and every other
//!   speaker is folded onto a kept one round-robin by rank
//!
//! Output is ordered by start time and non-overlapping.

use airecorder_core::{DiarizationConfig, DiarizationSegment};
use std::collections::{BTreeMap, HashMap};

/// Default gap under which same-speaker segments are merged, in seconds
pub const DEFAULT_MERGE_GAP_SECS: f64 = 0.5;

/// Per-speaker totals used for ranking
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeakerStats {
    /// Speaker identifier
    pub speaker: u32,

    /// Sum of segment durations in seconds
    pub total_duration: f64,

    /// Number of segments
    pub segment_count: usize,
}

/// Rank speakers by total speaking time, longest first
///
/// Equal durations keep ascending speaker id order.
pub fn rank_speakers(segments: &[DiarizationSegment]) -> Vec<SpeakerStats> {
    let mut totals: BTreeMap<u32, SpeakerStats> = BTreeMap::new();
    for segment in segments {
        let entry = totals.entry(segment.speaker).or_insert(SpeakerStats {
            speaker: segment.speaker,
            total_duration: 0.0,
            segment_count: 0,
        });
        entry.total_duration += segment.duration();
        entry.segment_count += 1;
    }

    let mut ranking: Vec<SpeakerStats> = totals.into_values().collect();
    ranking.sort_by(|a, b| b.total_duration.total_cmp(&a.total_duration));
    ranking
}

/// Merges and speaker-caps raw diarization output
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentPostProcessor {
    merge_gap: f64,
    max_speakers: Option<usize>,
}

impl Default for SegmentPostProcessor {
    fn default() -> Self {
        Self::new(DEFAULT_MERGE_GAP_SECS, None)
    }
}

impl SegmentPostProcessor {
    /// Create a post-processor
    ///
    /// A `max_speakers` of zero disables the cap.
    pub const fn new(merge_gap: f64, max_speakers: Option<usize>) -> Self {
        let max_speakers = match max_speakers {
            Some(0) => None,
            other => other,
        };
        Self {
            merge_gap,
            max_speakers,
        }
    }

    /// Create a post-processor from the diarization configuration
    pub const fn from_config(config: &DiarizationConfig) -> Self {
        Self::new(config.merge_gap_secs, config.max_speakers)
    }

    /// Configured speaker cap
    pub const fn max_speakers(&self) -> Option<usize> {
        self.max_speakers
    }

    /// Sort, merge and (if configured) cap speakers
    pub fn process(&self, mut segments: Vec<DiarizationSegment>) -> Vec<DiarizationSegment> {
        segments.sort_by(|a, b| a.start.total_cmp(&b.start));
        let merged = self.merge_adjacent(segments);
        match self.max_speakers {
            Some(max_speakers) => self.cap_speakers(merged, max_speakers),
            None => merged,
        }
    }

    /// Merge consecutive same-speaker segments closer than the merge gap
    ///
    /// Expects input ordered by start time. A segment of a different speaker
    /// that overlaps the running one is trimmed to start where the running
    /// segment ends, and dropped if nothing is left of it. Segments that do
    /// not overlap are kept as they are, zero-length ones included.
    pub fn merge_adjacent(&self, segments: Vec<DiarizationSegment>) -> Vec<DiarizationSegment> {
        let mut merged = Vec::with_capacity(segments.len());
        let mut iter = segments.into_iter();
        let Some(mut current) = iter.next() else {
            return merged;
        };

        for mut next in iter {
            if next.speaker == current.speaker && next.start - current.end < self.merge_gap {
                current.end = current.end.max(next.end);
                append_text(&mut current.text, &next.text);
                continue;
            }

            if next.start < current.end {
                // A segment nested inside another speaker's turn has no audio
                // of its own left once trimmed; output segments never overlap.
                if current.end >= next.end {
                    continue;
                }
                next.start = current.end;
            }
            merged.push(std::mem::replace(&mut current, next));
        }

        merged.push(current);
        merged
    }

    /// Reduce the number of distinct speakers to `max_speakers`
    ///
    /// Expects merged input. Speakers are ranked by total duration; rank `i`
    /// becomes speaker `i % max_speakers`, so the kept speakers are renumbered
    /// `0..max_speakers` and the rest are spread over them round-robin. The
    /// result is merged again since the remapping can make neighbours share a
    /// speaker.
    pub fn cap_speakers(
        &self,
        segments: Vec<DiarizationSegment>,
        max_speakers: usize,
    ) -> Vec<DiarizationSegment> {
        if max_speakers == 0 {
            return segments;
        }

        let ranking = rank_speakers(&segments);
        if ranking.len() <= max_speakers {
            return segments;
        }

        let mapping: HashMap<u32, u32> = ranking
            .iter()
            .enumerate()
            .map(|(rank, stats)| (stats.speaker, (rank % max_speakers) as u32))
            .collect();

        let remapped = segments
            .into_iter()
            .map(|mut segment| {
                if let Some(&speaker) = mapping.get(&segment.speaker) {
                    segment.speaker = speaker;
                }
                segment
            })
            .collect();

        self.merge_adjacent(remapped)
    }
}

fn append_text(target: &mut String, text: &str) {
    if text.is_empty() {
        return;
    }
    if !target.is_empty() {
        target.push(' ');
    }
    target.push_str(text);
}
