//! In-silico PCR validation of primer pairs.
//!
//! The UCSC genome browser is queried once per configured target of the
//! species: the whole genome gives the absolute verdict, a transcript track
//! the relative one. Without transcript hits the relative verdict comes from
//! Primer-BLAST instead.

use crate::config::{PipelineConfig, ServiceEndpoints};
use crate::error::DesignResult;
use crate::http::{HttpTransport, build_url};
use crate::primer_blast::{PrimerBlastClient, html_text};
use crate::search::PairValidator;
use crate::species::{GENOME_TARGET, SpeciesEntry, SpeciesTable};
use labprimer_protocol::{CrossCheckHit, PcrHit, PrimerPair, ValidationReport, Verdict};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Added to the expected product size when searching the genome.
pub const GENOME_SIZE_MARGIN: usize = 100;
/// Added to the maximal product size when searching transcript tracks.
pub const TRANSCRIPT_SIZE_MARGIN: usize = 100;
pub const UNKNOWN_SIZE_CEILING: usize = 2000;
/// Primer-BLAST products at or above `max product + margin` are ignored.
pub const CROSS_CHECK_SIZE_MARGIN: usize = 100;

lazy_static! {
    static ref PRE_BLOCK_RE: Regex = Regex::new(r"(?is)<pre[^>]*>(.*?)</pre>").expect("valid regex");
    static ref HIT_HEADER_RE: Regex = Regex::new(r"^>(.+?)\s+(\d+)bp").expect("valid regex");
}

pub fn size_ceiling(target: &str, amplicon_size_abs: Option<usize>, max_product_size: usize) -> usize {
    match amplicon_size_abs {
        Some(abs) if target == GENOME_TARGET => abs + GENOME_SIZE_MARGIN,
        Some(_) => TRANSCRIPT_SIZE_MARGIN + max_product_size,
        None => UNKNOWN_SIZE_CEILING,
    }
}

/// Hits of an hgPcr result page, `None` without a result block.
pub fn parse_pcr_hits(html: &str) -> Option<Vec<PcrHit>> {
    let block = PRE_BLOCK_RE.captures(html)?;
    let text = html_text(&block[1]);
    let mut hits: Vec<PcrHit> = vec![];
    let mut current: Option<PcrHit> = None;
    for line in text.trim().lines() {
        if let Some(caps) = HIT_HEADER_RE.captures(line) {
            hits.extend(current.take());
            // A header with an unreadable size is dropped with its sequence lines.
            current = caps[2].parse().ok().map(|size| PcrHit {
                name: caps[1].trim().to_string(),
                size,
                sequence: String::new(),
            });
        } else if let Some(hit) = current.as_mut() {
            hit.sequence.push_str(line.trim());
        }
    }
    hits.extend(current);
    Some(hits)
}

/// Pass when every hit has the same size, NotFound without hits.
pub fn hits_verdict(hits: &[PcrHit]) -> Verdict {
    match hits.first() {
        None => Verdict::NotFound,
        Some(first) => Verdict::from_consistency(hits.iter().all(|h| h.size == first.size)),
    }
}

/// Relative verdict from Primer-BLAST targets, with the hits it was based on.
pub fn cross_check_verdict(
    hits: &[CrossCheckHit],
    max_product_size: usize,
) -> (Verdict, Vec<CrossCheckHit>) {
    if hits.is_empty() {
        return (Verdict::Fail, vec![]);
    }
    let kept: Vec<CrossCheckHit> = hits
        .iter()
        .filter(|h| {
            h.product_length
                .is_some_and(|len| len < max_product_size + CROSS_CHECK_SIZE_MARGIN)
        })
        .cloned()
        .collect();
    let sizes: HashSet<usize> = kept.iter().filter_map(|h| h.product_length).collect();
    (Verdict::from_consistency(sizes.len() <= 1), kept)
}

#[derive(Clone)]
pub struct ValidationService {
    transport: Arc<dyn HttpTransport>,
    ucsc_url: String,
    species: Arc<SpeciesTable>,
    cross_check: Option<PrimerBlastClient>,
}

impl ValidationService {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        endpoints: &ServiceEndpoints,
        species: Arc<SpeciesTable>,
    ) -> Self {
        Self {
            transport,
            ucsc_url: endpoints.ucsc_pcr.clone(),
            species,
            cross_check: None,
        }
    }

    /// Service with the configured species table and, when enabled, the
    /// Primer-BLAST fallback.
    pub fn from_config(transport: Arc<dyn HttpTransport>, config: &PipelineConfig) -> DesignResult<Self> {
        let species = Arc::new(SpeciesTable::load(config.species_table.as_deref())?);
        let service = Self::new(transport.clone(), &config.endpoints, species);
        Ok(if config.cross_check.enabled {
            service.with_cross_check(PrimerBlastClient::new(
                transport,
                &config.endpoints,
                config.cross_check.clone(),
            ))
        } else {
            service
        })
    }

    pub fn with_cross_check(mut self, client: PrimerBlastClient) -> Self {
        self.cross_check = Some(client);
        self
    }

    pub fn species_table(&self) -> &SpeciesTable {
        &self.species
    }

    /// One hgPcr query; transport problems become an `Error` verdict.
    pub fn in_silico_pcr(
        &self,
        entry: &SpeciesEntry,
        target: &str,
        forward: &str,
        reverse: &str,
        ceiling: usize,
    ) -> (Verdict, Vec<PcrHit>) {
        let params = [
            ("org", entry.org.clone()),
            ("db", entry.db.clone()),
            ("wp_target", target.to_string()),
            ("wp_f", forward.to_string()),
            ("wp_r", reverse.to_string()),
            ("Submit", "Submit".to_string()),
            ("wp_size", (ceiling * 2).to_string()),
            ("wp_perfect", "15".to_string()),
            ("wp_good", "15".to_string()),
            ("boolshad.wp_flipReverse", "0".to_string()),
            ("wp_append", "on".to_string()),
            ("boolshad.wp_append", "0".to_string()),
        ];
        let url = match build_url(&self.ucsc_url, &params) {
            Ok(url) => url,
            Err(err) => return (Verdict::Error(err.message), vec![]),
        };
        debug!(url = %url, "in-silico PCR on {}/{target}", entry.db);
        match self.transport.get(&url) {
            Ok(response) if response.is_success() => match parse_pcr_hits(&response.body) {
                Some(hits) => (hits_verdict(&hits), hits),
                None => (Verdict::NotFound, vec![]),
            },
            Ok(response) => {
                warn!("in-silico PCR on {}/{target} returned HTTP {}", entry.db, response.status);
                (Verdict::Error(format!("Error {}", response.status)), vec![])
            }
            Err(err) => {
                warn!("in-silico PCR on {}/{target} failed: {}", entry.db, err.message);
                (Verdict::Error(err.message), vec![])
            }
        }
    }

    /// Validates a primer pair for `species` (scientific name).
    ///
    /// Species missing from the table are not validated and no request is
    /// made.
    pub fn check_primers(
        &self,
        forward: &str,
        reverse: &str,
        species: &str,
        amplicon_size_abs: Option<usize>,
        max_product_size: usize,
    ) -> ValidationReport {
        let mut report = ValidationReport::default();
        let Some(entry) = self.species.lookup(species) else {
            debug!("no in-silico PCR database for '{species}', skipping validation");
            return report;
        };

        for target in &entry.targets {
            let ceiling = size_ceiling(target, amplicon_size_abs, max_product_size);
            let (verdict, hits) = self.in_silico_pcr(entry, target, forward, reverse, ceiling);
            if target == GENOME_TARGET {
                report.absolute = verdict;
                report.absolute_hits = hits;
            } else {
                report.relative = verdict;
                report.relative_hits = hits;
            }
        }

        if report.relative_hits.is_empty() {
            if let Some(client) = &self.cross_check {
                match client.search(species, forward, reverse) {
                    Ok(hits) => {
                        let (verdict, kept) = cross_check_verdict(&hits, max_product_size);
                        info!(
                            "Primer-BLAST: {} of {} product(s) below the size limit for {forward} / {reverse}",
                            kept.len(),
                            hits.len()
                        );
                        report.relative = verdict;
                        report.cross_check_hits = kept;
                    }
                    Err(err) => {
                        warn!("Primer-BLAST check failed: {}", err.message);
                        report.relative = Verdict::Error(err.message);
                    }
                }
            }
        }
        report
    }
}

impl PairValidator for ValidationService {
    fn validate(&self, pair: &PrimerPair, species: &str, max_product_size: usize) -> ValidationReport {
        self.check_primers(
            &pair.left.sequence,
            &pair.right.sequence,
            species,
            Some(pair.amplicon_size_abs),
            max_product_size,
        )
    }
}
