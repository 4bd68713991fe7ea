//! Gene resolution and sequence retrieval through NCBI E-utilities.

use crate::config::ServiceEndpoints;
use crate::error::{DesignError, DesignResult};
use crate::exons::{ExonLayout, GenomicInterval};
use crate::gene_xml::{GeneRecord, is_chromosome_accession, is_transcript_accession};
use crate::http::{Attempt, RetryingClient, build_url};
use labprimer_protocol::Strand;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

pub const DEFAULT_SPECIES: &str = "human";
const RAT: &str = "Rattus norvegicus";

lazy_static! {
    static ref LIST_UIDS_RE: Regex = Regex::new(r"list_uids=(\d+)").expect("valid regex");
}

/// A raw gene identifier, classified once at the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GeneIdentifier {
    Numeric(String),
    Accession {
        accession: String,
        version: Option<String>,
    },
    Symbol(String),
}

impl GeneIdentifier {
    pub fn parse(raw: &str) -> DesignResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(DesignError::invalid_input("Gene identifier is empty"));
        }
        if raw.chars().all(|c| c.is_ascii_digit()) {
            return Ok(Self::Numeric(raw.to_string()));
        }
        if is_transcript_accession(raw) {
            let upper = raw.to_ascii_uppercase();
            let (accession, version) = match upper.split_once('.') {
                Some((acc, ver)) => (acc.to_string(), Some(ver.to_string())),
                None => (upper, None),
            };
            return Ok(Self::Accession { accession, version });
        }
        Ok(Self::Symbol(raw.to_string()))
    }

    /// Transcript accession (without version) the caller asked for, if any.
    pub fn specific_transcript(&self) -> Option<&str> {
        match self {
            Self::Accession { accession, .. } => Some(accession),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GenomeVersion {
    #[default]
    Current,
    Previous,
}

/// Which stretch of the chromosome to fetch around a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SequenceWindow {
    #[default]
    Transcript,
    Promoter { upstream: i64, downstream: i64 },
    Terminator { upstream: i64, downstream: i64 },
}

impl SequenceWindow {
    /// 1-based `(from, to)` for efetch given the transcript's first and last
    /// base (`start > stop` on the minus strand). `to < from` asks for the
    /// reverse complement.
    pub fn fetch_range(&self, start: i64, stop: i64) -> (i64, i64) {
        match *self {
            Self::Transcript => (start + 1, stop + 1),
            Self::Promoter {
                upstream,
                downstream,
            } => flank_range(start, stop > start, upstream, downstream),
            Self::Terminator {
                upstream,
                downstream,
            } => flank_range(stop, stop > start, upstream, downstream),
        }
    }

    /// Genomic interval (0-based, inclusive) and orientation of the window.
    pub fn interval(&self, start: i64, stop: i64) -> (GenomicInterval, Strand) {
        let (from, to) = self.fetch_range(start, stop);
        let strand = if to < from { Strand::Minus } else { Strand::Plus };
        (GenomicInterval::new(from - 1, to - 1), strand)
    }
}

fn flank_range(anchor: i64, plus: bool, upstream: i64, downstream: i64) -> (i64, i64) {
    if plus {
        (anchor - upstream + 1, anchor + downstream)
    } else {
        (anchor + upstream + 1, anchor - downstream + 2)
    }
}

/// One gene to resolve. `entrez_id` is filled in by resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneTarget {
    pub identifier: String,
    pub species: String,
    pub all_variants: bool,
    pub genome_version: GenomeVersion,
    pub window: SequenceWindow,
    pub entrez_id: Option<String>,
}

impl Default for GeneTarget {
    fn default() -> Self {
        Self {
            identifier: String::new(),
            species: DEFAULT_SPECIES.to_string(),
            all_variants: false,
            genome_version: GenomeVersion::Current,
            window: SequenceWindow::Transcript,
            entrez_id: None,
        }
    }
}

impl GeneTarget {
    pub fn new(identifier: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            ..Default::default()
        }
    }

    pub fn with_species(mut self, species: &str) -> Self {
        self.species = species.to_string();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptVariant {
    pub accession: String,
    pub entrez_id: String,
    pub gene_name: String,
    pub genomic_info: String,
    pub chromosome: String,
    pub strand: Strand,
    /// Exon intervals in genomic order as reported by NCBI.
    pub exon_intervals: Vec<GenomicInterval>,
    pub species: String,
    pub layout: ExonLayout,
    pub window: SequenceWindow,
    /// Fetched window sequence, empty until [`SequenceRepository::find_sequences`].
    pub sequence: String,
}

impl TranscriptVariant {
    pub fn label(&self) -> String {
        format!("{} {}", self.accession, self.gene_name)
    }

    /// Spliced template for primer design.
    pub fn template(&self) -> DesignResult<String> {
        self.layout.splice(&self.sequence)
    }
}

/// Chromosome accession.version and span chosen for a gene.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenomicLocation {
    pub accession: String,
    pub start: i64,
    pub stop: i64,
}

#[derive(Debug, Deserialize)]
struct EsearchEnvelope {
    esearchresult: Option<EsearchResult>,
}

#[derive(Debug, Deserialize)]
struct EsearchResult {
    count: Option<String>,
    #[serde(default)]
    idlist: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneSummary {
    pub organism: SummaryOrganism,
    pub name: String,
    #[serde(default)]
    pub locationhist: Option<Vec<LocationEntry>>,
    #[serde(default)]
    pub genomicinfo: Vec<LocationEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SummaryOrganism {
    pub scientificname: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocationEntry {
    #[serde(default)]
    pub annotationrelease: Option<String>,
    #[serde(default)]
    pub chraccver: Option<String>,
    #[serde(default)]
    pub chrstart: Option<i64>,
    #[serde(default)]
    pub chrstop: Option<i64>,
}

impl GeneSummary {
    pub fn from_esummary(body: &Value, entrez_id: &str) -> Option<Self> {
        let doc = body.get("result")?.get(entrez_id)?;
        serde_json::from_value(doc.clone()).ok()
    }
}

fn release_number(release: &str) -> Option<i64> {
    release.split('_').nth(1)?.parse().ok()
}

fn accession_version(accver: &str) -> Option<i64> {
    accver.split('.').nth(1)?.parse().ok()
}

/// Picks the genome build location for a gene summary.
pub fn select_genome_build(
    summary: &GeneSummary,
    species: &str,
    version: GenomeVersion,
) -> Option<GenomicLocation> {
    let history = match &summary.locationhist {
        Some(hist) if !hist.is_empty() => hist.as_slice(),
        _ => summary.genomicinfo.as_slice(),
    };

    let mut merged: Vec<(String, i64, i64)> = vec![];
    for loc in history {
        let (Some(accver), Some(start), Some(stop)) = (&loc.chraccver, loc.chrstart, loc.chrstop)
        else {
            continue;
        };
        match merged.iter_mut().find(|(acc, _, _)| acc == accver) {
            Some(entry) => {
                entry.1 = entry.1.min(start);
                entry.2 = entry.2.max(stop);
            }
            None => merged.push((accver.clone(), start, stop)),
        }
    }
    merged.retain(|(acc, _, _)| is_chromosome_accession(acc));

    if let (true, Some(hist)) = (species == RAT, &summary.locationhist) {
        let mut releases: Vec<(i64, &LocationEntry)> = hist
            .iter()
            .filter_map(|loc| {
                let release = loc.annotationrelease.as_deref()?;
                if !release.starts_with("RS_") {
                    return None;
                }
                Some((release_number(release)?, loc))
            })
            .collect();
        releases.sort_by_key(|(n, _)| *n);
        let selected = match version {
            GenomeVersion::Current => releases.last(),
            GenomeVersion::Previous => releases.first(),
        };
        if let Some((_, loc)) = selected {
            if let (Some(accver), Some(start), Some(stop)) =
                (&loc.chraccver, loc.chrstart, loc.chrstop)
            {
                merged = vec![(accver.clone(), start, stop)];
            }
        }
    }

    let first_base = merged.first()?.0.split('.').next()?.to_string();
    merged.retain(|(acc, _, _)| acc.split('.').next() == Some(first_base.as_str()));

    let versioned = merged
        .into_iter()
        .filter_map(|(acc, start, stop)| Some((accession_version(&acc)?, acc, start, stop)));
    let chosen = match version {
        GenomeVersion::Current => versioned.max_by_key(|(v, ..)| *v),
        GenomeVersion::Previous => versioned.min_by_key(|(v, ..)| *v),
    }?;
    Some(GenomicLocation {
        accession: chosen.1,
        start: chosen.2,
        stop: chosen.3,
    })
}

fn strip_version(accession: &str) -> &str {
    accession.split('.').next().unwrap_or(accession)
}

/// Transcript accessions to extract from a gene record.
pub fn select_variants(
    record: &GeneRecord,
    all_variants: bool,
    specific_transcript: Option<&str>,
) -> Vec<String> {
    let variants = record.transcript_accessions();
    if all_variants {
        return variants;
    }
    if let Some(specific) = specific_transcript.map(strip_version) {
        if variants.iter().any(|v| v == specific) {
            return vec![specific.to_string()];
        }
    }
    let labels = record.transcript_labels();
    let first_labelled = labels
        .iter()
        .position(|l| l == "transcript variant 1")
        .and_then(|i| variants.get(i));
    first_labelled
        .or_else(|| variants.first())
        .cloned()
        .into_iter()
        .collect()
}

fn reverse_complement(seq: &str) -> String {
    String::from_utf8_lossy(&bio::alphabets::dna::revcomp(seq.as_bytes())).to_string()
}

fn parse_fasta_body(body: &str) -> Attempt<String> {
    let Some((header, rest)) = body.split_once('\n') else {
        return Attempt::Retry("response is not a FASTA record".to_string());
    };
    if !header.starts_with('>') {
        return Attempt::Retry("response is not a FASTA record".to_string());
    }
    let sequence: String = rest
        .lines()
        .map(|l| l.trim())
        .collect::<String>()
        .to_ascii_uppercase();
    if sequence.is_empty() {
        return Attempt::Fail(DesignError::malformed(format!(
            "Empty sequence for '{}'",
            header.trim_start_matches('>')
        )));
    }
    if let Some(bad) = sequence.chars().find(|c| !matches!(c, 'A' | 'C' | 'G' | 'T' | 'N')) {
        return Attempt::Fail(DesignError::malformed(format!(
            "Unexpected character '{bad}' in fetched sequence"
        )));
    }
    Attempt::Done(sequence)
}

pub struct SequenceRepository {
    client: RetryingClient,
    endpoints: ServiceEndpoints,
}

impl SequenceRepository {
    pub fn new(client: RetryingClient, endpoints: ServiceEndpoints) -> Self {
        Self { client, endpoints }
    }

    /// Resolves any identifier shape to an Entrez gene ID.
    pub fn resolve_identifier(
        &self,
        identifier: &GeneIdentifier,
        species: &str,
    ) -> DesignResult<String> {
        match identifier {
            GeneIdentifier::Numeric(id) => Ok(id.clone()),
            GeneIdentifier::Accession { accession, .. } => self.accession_to_gene_id(accession),
            GeneIdentifier::Symbol(symbol) => self.symbol_to_gene_id(symbol, species),
        }
    }

    fn accession_to_gene_id(&self, accession: &str) -> DesignResult<String> {
        let url = format!(
            "{}/{accession}",
            self.endpoints.nuccore_page.trim_end_matches('/')
        );
        self.client.fetch(&url, "accession lookup", |body| {
            match LIST_UIDS_RE.captures(body).and_then(|c| c.get(1)) {
                Some(uid) => Attempt::Done(uid.as_str().to_string()),
                None => Attempt::Fail(DesignError::not_found(format!(
                    "Please verify {accession} variant"
                ))),
            }
        })
    }

    fn symbol_to_gene_id(&self, symbol: &str, species: &str) -> DesignResult<String> {
        let url = build_url(
            &self.endpoints.eutils("esearch.fcgi"),
            &[
                ("db", "gene".to_string()),
                (
                    "term",
                    format!("\"{symbol}\"[Gene Name] AND {species}[Organism]"),
                ),
                ("retmode", "json".to_string()),
            ],
        )?;
        let id = self.client.fetch(&url, "gene search", |body| {
            let Ok(envelope) = serde_json::from_str::<EsearchEnvelope>(body) else {
                return Attempt::Retry("unparseable esearch response".to_string());
            };
            let Some(result) = envelope.esearchresult else {
                return Attempt::Retry("esearch response lacks a result".to_string());
            };
            match result.count.as_deref() {
                None => Attempt::Retry(format!("Issues for {species} {symbol}")),
                Some("0") => Attempt::Fail(DesignError::not_found(format!(
                    "Please verify if {symbol} exist for {species}"
                ))),
                Some(_) => match result.idlist.into_iter().next() {
                    Some(id) => Attempt::Done(id),
                    None => Attempt::Retry("esearch returned an empty id list".to_string()),
                },
            }
        })?;
        info!("ID found for {species} {symbol}: {id}");
        Ok(id)
    }

    fn gene_summary(&self, entrez_id: &str) -> DesignResult<GeneSummary> {
        let url = build_url(
            &self.endpoints.eutils("esummary.fcgi"),
            &[
                ("db", "gene".to_string()),
                ("id", entrez_id.to_string()),
                ("retmode", "json".to_string()),
            ],
        )?;
        self.client.fetch(&url, "gene summary", |body| {
            let Ok(value) = serde_json::from_str::<Value>(body) else {
                return Attempt::Retry("unparseable esummary response".to_string());
            };
            match GeneSummary::from_esummary(&value, entrez_id) {
                Some(summary) => Attempt::Done(summary),
                None => Attempt::Fail(DesignError::not_found(format!(
                    "Transcript not found(s) for {entrez_id}."
                ))),
            }
        })
    }

    fn chromosome_title(&self, accession: &str) -> DesignResult<String> {
        let url = build_url(
            &self.endpoints.eutils("esummary.fcgi"),
            &[
                ("db", "nuccore".to_string()),
                ("id", accession.to_string()),
                ("retmode", "json".to_string()),
            ],
        )?;
        self.client.fetch(&url, "chromosome summary", |body| {
            let title = serde_json::from_str::<Value>(body).ok().and_then(|v| {
                let result = v.get("result")?;
                let uid = result.get("uids")?.get(0)?.as_str()?;
                Some(result.get(uid)?.get("title")?.as_str()?.to_string())
            });
            match title {
                Some(title) => Attempt::Done(title),
                None => Attempt::Retry(format!("no title for {accession}")),
            }
        })
    }

    fn gene_record(&self, entrez_id: &str) -> DesignResult<GeneRecord> {
        let url = build_url(
            &self.endpoints.eutils("efetch.fcgi"),
            &[
                ("db", "gene".to_string()),
                ("id", entrez_id.to_string()),
                ("retmode", "xml".to_string()),
            ],
        )?;
        self.client
            .fetch(&url, "gene record", |body| match GeneRecord::parse(body) {
                Ok(record) => Attempt::Done(record),
                Err(e) => Attempt::Retry(e.to_string()),
            })
    }

    /// Resolves the transcripts of a gene with their exon structure.
    pub fn fetch_transcript_variants(
        &self,
        entrez_id: &str,
        genome_version: GenomeVersion,
        all_variants: bool,
        specific_transcript: Option<&str>,
    ) -> DesignResult<Vec<TranscriptVariant>> {
        let summary = self.gene_summary(entrez_id)?;
        let species = summary.organism.scientificname.clone();
        let location = select_genome_build(&summary, &species, genome_version).ok_or_else(|| {
            DesignError::not_found(format!("Transcript not found(s) for {entrez_id}."))
        })?;
        let title = self.chromosome_title(&location.accession)?;
        info!(
            "Chromosome {} found for {entrez_id}: {title}",
            location.accession
        );
        let record = self.gene_record(entrez_id)?;

        let base = |accession: String,
                    strand: Strand,
                    exon_intervals: Vec<GenomicInterval>,
                    species: String| {
            let layout = ExonLayout::from_intervals(&exon_intervals, strand);
            TranscriptVariant {
                accession,
                entrez_id: entrez_id.to_string(),
                gene_name: summary.name.clone(),
                genomic_info: title.clone(),
                chromosome: location.accession.clone(),
                strand,
                exon_intervals,
                species,
                layout,
                window: SequenceWindow::Transcript,
                sequence: String::new(),
            }
        };

        if let Some(kind) = record.non_coding_type() {
            debug!("{entrez_id} is a {kind} gene; using the gene span as its only exon");
            let strand = if location.start < location.stop {
                Strand::Plus
            } else {
                Strand::Minus
            };
            let interval = GenomicInterval::new(location.start, location.stop);
            return Ok(vec![base(
                entrez_id.to_string(),
                strand,
                vec![interval],
                species,
            )]);
        }

        let species = record.taxname().map(str::to_string).unwrap_or(species);
        let mut ret = vec![];
        for accession in select_variants(&record, all_variants, specific_transcript) {
            let exons = record.transcript_exons(&accession);
            if exons.intervals.is_empty() {
                debug!("No exons on {} for {accession}", location.accession);
                continue;
            }
            let strand = exons.strand.unwrap_or_else(|| {
                warn!("No strand reported for {accession}; assuming plus");
                Strand::Plus
            });
            ret.push(base(accession, strand, exons.intervals, species.clone()));
        }
        if ret.is_empty() {
            return Err(DesignError::not_found(format!(
                "Transcript not found(s) for {entrez_id}."
            )));
        }
        info!(
            "Transcript(s) found for {entrez_id}: {}",
            ret.iter()
                .map(|v| v.accession.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(ret)
    }

    /// Fetches the window around `[start, stop]` (0-based, `start > stop`
    /// on the minus strand), reverse-complemented where needed.
    pub fn fetch_sequence(
        &self,
        chromosome: &str,
        start: i64,
        stop: i64,
        window: SequenceWindow,
    ) -> DesignResult<String> {
        let (from, to) = window.fetch_range(start, stop);
        let (lo, hi) = (from.min(to), from.max(to));
        if lo < 1 {
            return Err(DesignError::invalid_input(format!(
                "Window {from}..{to} starts before the chromosome on {chromosome}"
            )));
        }
        let url = build_url(
            &self.endpoints.eutils("efetch.fcgi"),
            &[
                ("db", "nuccore".to_string()),
                ("id", chromosome.to_string()),
                ("seq_start", lo.to_string()),
                ("seq_stop", hi.to_string()),
                ("rettype", "fasta".to_string()),
                ("retmode", "text".to_string()),
            ],
        )?;
        let sequence = self.client.fetch(&url, "sequence", parse_fasta_body)?;
        Ok(if to < from {
            reverse_complement(&sequence)
        } else {
            sequence
        })
    }

    /// Resolves a gene target and fetches the sequence of each variant.
    pub fn find_sequences(&self, target: &mut GeneTarget) -> DesignResult<Vec<TranscriptVariant>> {
        let identifier = GeneIdentifier::parse(&target.identifier)?;
        let entrez_id = match &target.entrez_id {
            Some(id) => id.clone(),
            None => self.resolve_identifier(&identifier, &target.species)?,
        };
        target.entrez_id = Some(entrez_id.clone());

        let variants = self.fetch_transcript_variants(
            &entrez_id,
            target.genome_version,
            target.all_variants,
            identifier.specific_transcript(),
        )?;
        let requested = variants.len();
        let mut fetched = Vec::with_capacity(requested);
        let mut last_error = None;
        for mut variant in variants {
            match self.fill_sequence(&mut variant, target.window) {
                Ok(()) => fetched.push(variant),
                Err(err) => {
                    warn!("skipping {}: {}", variant.label(), err.message);
                    last_error = Some(err);
                }
            }
        }
        if fetched.is_empty() {
            if let Some(err) = last_error {
                return Err(err);
            }
        } else if fetched.len() < requested {
            warn!(
                "{} of {requested} variant(s) of {} kept",
                fetched.len(),
                target.identifier
            );
        }
        Ok(fetched)
    }

    fn fill_sequence(
        &self,
        variant: &mut TranscriptVariant,
        window: SequenceWindow,
    ) -> DesignResult<()> {
        let (start, stop) = variant.layout.transcript_bounds().ok_or_else(|| {
            DesignError::not_found(format!("No exons for {}", variant.accession))
        })?;
        variant.sequence = self.fetch_sequence(&variant.chromosome, start, stop, window)?;
        variant.window = window;
        if window != SequenceWindow::Transcript {
            let (interval, strand) = window.interval(start, stop);
            variant.layout = ExonLayout::from_intervals(&[interval], strand);
        }
        debug!(
            "{}: {} nt window, {} exon(s)",
            variant.label(),
            variant.sequence.len(),
            variant.layout.exon_count()
        );
        Ok(())
    }
}
