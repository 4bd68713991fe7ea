//! Exon coordinate normalization.
//!
//! Three coordinate spaces are in play for a transcript:
//! - absolute: positions on the chromosome accession,
//! - local: offsets into the fetched gene window (introns retained),
//!   counted in transcription direction from the first exon start,
//! - spliced: offsets into the concatenated exons.

use crate::error::{DesignError, DesignResult};
use itertools::Itertools;
use labprimer_protocol::Strand;
use serde::{Deserialize, Serialize};

/// One exon interval as reported in NCBI gene records (0-based, inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenomicInterval {
    pub from: i64,
    pub to: i64,
}

impl GenomicInterval {
    pub fn new(from: i64, to: i64) -> Self {
        Self {
            from: from.min(to),
            to: from.max(to),
        }
    }

    /// Boundary pair handed to [`normalize`]: half-open once the minus
    /// strand swap has been applied.
    pub fn boundary_pair(&self, strand: Strand) -> (i64, i64) {
        match strand {
            Strand::Plus => (self.from, self.to + 1),
            Strand::Minus => (self.from - 1, self.to),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExonLayout {
    strand: Strand,
    absolute: Vec<(i64, i64)>,
    local: Vec<(usize, usize)>,
    spliced: Vec<(usize, usize)>,
    cumulative: Vec<usize>,
}

/// Normalizes exon boundary pairs given in genomic order.
///
/// On the minus strand each pair is swapped first so that every pair reads
/// `(start, end)` in transcription direction.
pub fn normalize(exon_coords: &[(i64, i64)], strand: Strand) -> ExonLayout {
    let absolute: Vec<(i64, i64)> = exon_coords
        .iter()
        .map(|&(a, b)| match strand {
            Strand::Plus => (a, b),
            Strand::Minus => (b, a),
        })
        .collect();
    let first_exon_start = absolute.first().map(|e| e.0).unwrap_or(0);
    let local: Vec<(usize, usize)> = absolute
        .iter()
        .map(|&(s, e)| {
            (
                (s - first_exon_start).unsigned_abs() as usize,
                (e - first_exon_start).unsigned_abs() as usize,
            )
        })
        .collect();

    let mut cumulative = Vec::with_capacity(local.len() + 1);
    cumulative.push(0);
    let mut spliced = Vec::with_capacity(local.len());
    for (start, end) in &local {
        let len = end.abs_diff(*start);
        let from = *cumulative.last().unwrap_or(&0);
        spliced.push((from, from + len));
        cumulative.push(from + len);
    }

    ExonLayout {
        strand,
        absolute,
        local,
        spliced,
        cumulative,
    }
}

impl ExonLayout {
    pub fn from_intervals(intervals: &[GenomicInterval], strand: Strand) -> Self {
        let pairs: Vec<(i64, i64)> = intervals.iter().map(|i| i.boundary_pair(strand)).collect();
        normalize(&pairs, strand)
    }

    /// A bare sequence treated as one exon starting at absolute position 0.
    pub fn single_exon(len: usize) -> Self {
        normalize(&[(0, len as i64)], Strand::Plus)
    }

    pub fn strand(&self) -> Strand {
        self.strand
    }

    pub fn exon_count(&self) -> usize {
        self.spliced.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spliced.is_empty()
    }

    /// Strand-corrected absolute boundary pairs.
    pub fn absolute(&self) -> &[(i64, i64)] {
        &self.absolute
    }

    pub fn local(&self) -> &[(usize, usize)] {
        &self.local
    }

    /// Abutting exon ranges of the spliced transcript.
    pub fn spliced(&self) -> &[(usize, usize)] {
        &self.spliced
    }

    pub fn cumulative_lengths(&self) -> &[usize] {
        &self.cumulative
    }

    pub fn spliced_len(&self) -> usize {
        self.cumulative.last().copied().unwrap_or(0)
    }

    /// Length of the gene window covering all exons and introns.
    pub fn local_len(&self) -> usize {
        self.local.iter().map(|(s, e)| (*s).max(*e)).max().unwrap_or(0)
    }

    /// Index of the exon containing a spliced position.
    pub fn exon_index(&self, position: usize) -> Option<usize> {
        (0..self.spliced.len())
            .find(|&i| self.cumulative[i] <= position && position < self.cumulative[i + 1])
    }

    pub fn spliced_to_local(&self, position: usize) -> Option<usize> {
        let i = self.exon_index(position)?;
        Some(self.local[i].0 + (position - self.cumulative[i]))
    }

    /// Maps a spliced position onto the chromosome; `None` past the end.
    pub fn spliced_to_absolute(&self, position: usize) -> Option<i64> {
        let i = self.exon_index(position)?;
        let offset = (position - self.cumulative[i]) as i64;
        Some(match self.strand {
            Strand::Plus => self.absolute[i].0 + offset,
            Strand::Minus => self.absolute[i].0 - offset,
        })
    }

    /// Inverse of [`Self::spliced_to_absolute`]; `None` inside introns.
    pub fn absolute_to_spliced(&self, absolute: i64) -> Option<usize> {
        self.absolute
            .iter()
            .enumerate()
            .find_map(|(i, &(start, end))| {
                let offset = match self.strand {
                    Strand::Plus if start <= absolute && absolute < end => absolute - start,
                    Strand::Minus if end < absolute && absolute <= start => start - absolute,
                    _ => return None,
                };
                Some(self.cumulative[i] + offset as usize)
            })
    }

    /// Exon-pair regions to search, `(i, j)` with `i < j`, or `(0, 0)` for a
    /// single exon. Reverse order starts from the 3' end.
    pub fn exon_pairs(&self, reverse: bool) -> Vec<(usize, usize)> {
        let n = self.spliced.len();
        match n {
            0 => vec![],
            1 => vec![(0, 0)],
            _ if reverse => (0..n)
                .rev()
                .flat_map(|j| (0..j).rev().map(move |i| (i, j)))
                .collect(),
            _ => (0..n).tuple_combinations().collect(),
        }
    }

    /// Concatenates the exons out of the gene window sequence.
    pub fn splice(&self, sequence: &str) -> DesignResult<String> {
        let mut ret = String::with_capacity(self.spliced_len());
        for &(start, end) in &self.local {
            let (lo, hi) = (start.min(end), start.max(end));
            let exon = sequence.get(lo..hi).ok_or_else(|| {
                DesignError::malformed(format!(
                    "Exon {lo}..{hi} lies outside the {} nt gene window",
                    sequence.len()
                ))
            })?;
            ret.push_str(exon);
        }
        Ok(ret)
    }

    /// First and last transcribed base on the chromosome (0-based,
    /// inclusive), in transcription order.
    pub fn transcript_bounds(&self) -> Option<(i64, i64)> {
        let first = self.absolute.first()?;
        let last = self.absolute.last()?;
        Some(match self.strand {
            Strand::Plus => (first.0, last.1 - 1),
            Strand::Minus => (first.0, last.1 + 1),
        })
    }

    /// Whether `[start, end)` in spliced space crosses an exon boundary.
    pub fn spans_junction(&self, start: usize, end: usize) -> bool {
        if end <= start + 1 || self.cumulative.len() < 3 {
            return false;
        }
        self.cumulative[1..self.cumulative.len() - 1]
            .iter()
            .any(|&boundary| start < boundary && boundary < end)
    }
}
