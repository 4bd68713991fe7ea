//! Shared machine-readable contracts for LabPrimer.
//!
//! These records are what a front-end (table view, export, scripting
//! bridge) receives from the design pipeline. They carry no behavior beyond
//! small accessors so that consumers do not need to link the network stack.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const PROTOCOL_VERSION: &str = "1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Strand {
    #[default]
    Plus,
    Minus,
}

impl Strand {
    pub fn from_ncbi_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "plus" | "+" => Some(Self::Plus),
            "minus" | "-" => Some(Self::Minus),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Plus => "plus",
            Self::Minus => "minus",
        }
    }
}

impl fmt::Display for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Outcome of one in-silico PCR check.
///
/// `Fail` means the check ran and found several differently sized products;
/// `NotFound` and `Error` mean the primers could not be confirmed either way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "verdict", content = "detail", rename_all = "snake_case")]
pub enum Verdict {
    #[default]
    NotAttempted,
    Pass,
    Fail,
    NotFound,
    Error(String),
}

impl Verdict {
    pub fn from_consistency(consistent: bool) -> Self {
        if consistent { Self::Pass } else { Self::Fail }
    }

    /// Candidates are only dropped by validation filtering when the check
    /// was skipped or reported conflicting products.
    pub fn passes_filter(&self) -> bool {
        !matches!(self, Self::NotAttempted | Self::Fail)
    }

    pub fn is_attempted(&self) -> bool {
        !matches!(self, Self::NotAttempted)
    }

    pub fn label(&self) -> String {
        match self {
            Self::NotAttempted => String::new(),
            Self::Pass => "True".to_string(),
            Self::Fail => "False".to_string(),
            Self::NotFound => "Not found".to_string(),
            Self::Error(message) => message.clone(),
        }
    }
}

/// One named product reported by a genome-browser in-silico PCR run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcrHit {
    pub name: String,
    pub size: usize,
    pub sequence: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CrossCheckAlignment {
    pub primer: Option<String>,
    pub start: Option<String>,
    pub template: Option<String>,
    pub end: Option<String>,
}

/// One target sequence reported by the primer-specificity search service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossCheckHit {
    pub name: String,
    pub description: String,
    pub product_length: Option<usize>,
    pub forward: CrossCheckAlignment,
    pub reverse: CrossCheckAlignment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ValidationReport {
    pub relative: Verdict,
    pub absolute: Verdict,
    pub relative_hits: Vec<PcrHit>,
    pub absolute_hits: Vec<PcrHit>,
    pub cross_check_hits: Vec<CrossCheckHit>,
}

/// Half-open position range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: i64,
    pub end: i64,
}

impl Span {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        (self.end - self.start).unsigned_abs() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimerCandidate {
    pub sequence: String,
    pub length: usize,
    pub position: Span,
    pub position_abs: Span,
    pub tm: Option<f64>,
    pub gc_percent: Option<f64>,
    pub self_complementarity: Option<f64>,
    pub self_3prime_complementarity: Option<f64>,
    pub template_strand: Strand,
    pub spans_exon_junction: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimerPair {
    pub gene_name: String,
    pub left: PrimerCandidate,
    pub right: PrimerCandidate,
    pub amplicon_size: usize,
    pub amplicon_size_abs: usize,
    pub amplicon_seq: String,
    pub amplicon_tm: Option<f64>,
    pub amplicon_spans_junction: bool,
    pub validation: ValidationReport,
}

impl PrimerPair {
    pub fn key(&self) -> (&str, &str) {
        (&self.left.sequence, &self.right.sequence)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Satisfied,
    Exhausted,
    Cancelled,
    DeadlineReached,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TargetStatus {
    Completed,
    Exhausted { found: usize, requested: usize },
    Failed { code: String, reason: String },
}

impl TargetStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Flat export row, one per primer pair, column names as shown to users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimerRow {
    #[serde(rename = "Gene")]
    pub gene: String,
    #[serde(rename = "Pair")]
    pub pair: usize,
    #[serde(rename = "Product Size (bp)")]
    pub product_size: usize,
    #[serde(rename = "For. Pr.(5'->3')")]
    pub forward_sequence: String,
    #[serde(rename = "For. Len. (bp)")]
    pub forward_length: usize,
    #[serde(rename = "For. Pos.")]
    pub forward_position: String,
    #[serde(rename = "For. Pos. Abs. (bp)")]
    pub forward_position_abs: String,
    #[serde(rename = "For. Tm (°C)")]
    pub forward_tm: Option<f64>,
    #[serde(rename = "For. GC%")]
    pub forward_gc_percent: Option<f64>,
    #[serde(rename = "For. Self Compl.")]
    pub forward_self_complementarity: Option<f64>,
    #[serde(rename = "For. Self 3' Compl.")]
    pub forward_self_3prime_complementarity: Option<f64>,
    #[serde(rename = "Rev. Pr.(5'->3')")]
    pub reverse_sequence: String,
    #[serde(rename = "Rev. Len. (bp)")]
    pub reverse_length: usize,
    #[serde(rename = "Rev. Pos.")]
    pub reverse_position: String,
    #[serde(rename = "Rev. Pos. Abs.")]
    pub reverse_position_abs: String,
    #[serde(rename = "Rev. Tm (°C)")]
    pub reverse_tm: Option<f64>,
    #[serde(rename = "Rev. GC%")]
    pub reverse_gc_percent: Option<f64>,
    #[serde(rename = "Rev. Self Compl.")]
    pub reverse_self_complementarity: Option<f64>,
    #[serde(rename = "Rev. Self 3' Compl.")]
    pub reverse_self_3prime_complementarity: Option<f64>,
    #[serde(rename = "Product Size Abs. (bp)")]
    pub product_size_abs: usize,
    #[serde(rename = "Amplicon Tm (°C)")]
    pub amplicon_tm: Option<f64>,
    #[serde(rename = "Validation (transcripts)")]
    pub validation_relative: String,
    #[serde(rename = "Validation (genome)")]
    pub validation_absolute: String,
}

impl PrimerRow {
    pub fn from_pair(gene: &str, index: usize, pair: &PrimerPair) -> Self {
        Self {
            gene: gene.to_string(),
            pair: index + 1,
            product_size: pair.amplicon_size,
            forward_sequence: pair.left.sequence.clone(),
            forward_length: pair.left.length,
            forward_position: pair.left.position.to_string(),
            forward_position_abs: pair.left.position_abs.to_string(),
            forward_tm: pair.left.tm,
            forward_gc_percent: pair.left.gc_percent,
            forward_self_complementarity: pair.left.self_complementarity,
            forward_self_3prime_complementarity: pair.left.self_3prime_complementarity,
            reverse_sequence: pair.right.sequence.clone(),
            reverse_length: pair.right.length,
            reverse_position: pair.right.position.to_string(),
            reverse_position_abs: pair.right.position_abs.to_string(),
            reverse_tm: pair.right.tm,
            reverse_gc_percent: pair.right.gc_percent,
            reverse_self_complementarity: pair.right.self_complementarity,
            reverse_self_3prime_complementarity: pair.right.self_3prime_complementarity,
            product_size_abs: pair.amplicon_size_abs,
            amplicon_tm: pair.amplicon_tm,
            validation_relative: pair.validation.relative.label(),
            validation_absolute: pair.validation.absolute.label(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_filter_keeps_unconfirmed_but_drops_conflicts() {
        assert!(Verdict::Pass.passes_filter());
        assert!(Verdict::NotFound.passes_filter());
        assert!(Verdict::Error("Error 503".to_string()).passes_filter());
        assert!(!Verdict::Fail.passes_filter());
        assert!(!Verdict::NotAttempted.passes_filter());
    }

    #[test]
    fn test_verdict_serializes_with_detail() {
        let json = serde_json::to_string(&Verdict::Error("Error 500".to_string())).unwrap();
        assert_eq!(json, r#"{"verdict":"error","detail":"Error 500"}"#);
        let back: Verdict = serde_json::from_str(r#"{"verdict":"not_found"}"#).unwrap();
        assert_eq!(back, Verdict::NotFound);
    }

    #[test]
    fn test_strand_labels() {
        assert_eq!(Strand::from_ncbi_label("minus"), Some(Strand::Minus));
        assert_eq!(Strand::from_ncbi_label(" Plus "), Some(Strand::Plus));
        assert_eq!(Strand::from_ncbi_label("both"), None);
        assert_eq!(Strand::Minus.to_string(), "minus");
    }

    #[test]
    fn test_span_display_and_len() {
        let span = Span::new(120, 140);
        assert_eq!(span.to_string(), "120-140");
        assert_eq!(span.len(), 20);
        assert!(!span.is_empty());
    }
}
