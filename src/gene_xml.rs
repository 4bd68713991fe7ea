//! NCBI Entrezgene XML (`Entrezgene-Set/Entrezgene`) reader.
//!
//! Gene records nest `Gene-commentary` elements to arbitrary depth, so the
//! document is flattened into its elements in document order and queried
//! positionally: a transcript's exons are the `Seq-interval` pairs that
//! follow its accession inside the chromosome annotation section.

use crate::exons::GenomicInterval;
use anyhow::{Result, anyhow};
use labprimer_protocol::Strand;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

pub const TRANSCRIPT_PREFIXES: [&str; 5] = ["NM_", "XM_", "NR_", "XR_", "YP_"];
pub const CHROMOSOME_PREFIXES: [&str; 2] = ["NC_", "NT_"];
pub const NON_CODING_TYPES: [&str; 3] = ["tRNA", "rRNA", "d-segment"];

const TAG_ACCESSION: &str = "Gene-commentary_accession";
const TAG_LABEL: &str = "Gene-commentary_label";
const TAG_TYPE: &str = "Gene-commentary_type";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GeneXmlDialect {
    EntrezgeneSet,
    Unknown,
}

pub fn detect_gene_xml_dialect(input: &str) -> GeneXmlDialect {
    if input.contains("<Entrezgene-Set") || input.contains("<Entrezgene>") {
        GeneXmlDialect::EntrezgeneSet
    } else {
        GeneXmlDialect::Unknown
    }
}

pub fn is_transcript_accession(raw: &str) -> bool {
    let upper = raw.trim().to_ascii_uppercase();
    TRANSCRIPT_PREFIXES.iter().any(|p| upper.starts_with(p))
}

pub fn is_chromosome_accession(raw: &str) -> bool {
    CHROMOSOME_PREFIXES.iter().any(|p| raw.starts_with(p))
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct XmlElement {
    tag: String,
    text: Option<String>,
    value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptExons {
    pub accession: String,
    pub intervals: Vec<GenomicInterval>,
    pub strand: Option<Strand>,
}

#[derive(Debug, Clone, Default)]
pub struct GeneRecord {
    elements: Vec<XmlElement>,
}

impl GeneRecord {
    pub fn parse(xml: &str) -> Result<Self> {
        if detect_gene_xml_dialect(xml) == GeneXmlDialect::Unknown {
            return Err(anyhow!(
                "Unsupported XML dialect: expected an 'Entrezgene-Set' document"
            ));
        }
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut elements: Vec<XmlElement> = Vec::new();
        let mut open: Vec<usize> = Vec::new();
        loop {
            match reader.read_event() {
                Ok(Event::Start(start)) => {
                    elements.push(element_from_start(&start)?);
                    open.push(elements.len() - 1);
                }
                Ok(Event::Empty(start)) => {
                    elements.push(element_from_start(&start)?);
                }
                Ok(Event::Text(text)) => {
                    let Some(&idx) = open.last() else { continue };
                    let unescaped = text
                        .unescape()
                        .map_err(|e| anyhow!("Malformed gene XML text: {e}"))?;
                    let trimmed = unescaped.trim();
                    if elements[idx].text.is_none() && !trimmed.is_empty() {
                        elements[idx].text = Some(trimmed.to_string());
                    }
                }
                Ok(Event::End(_)) => {
                    open.pop();
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(anyhow!(
                        "Malformed gene XML at byte {}: {e}",
                        reader.buffer_position()
                    ));
                }
            }
        }
        if elements.is_empty() {
            return Err(anyhow!("Malformed gene XML: no elements found"));
        }
        Ok(Self { elements })
    }

    fn texts_of<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.elements
            .iter()
            .filter(move |e| e.tag == tag)
            .filter_map(|e| e.text.as_deref())
    }

    /// Distinct "transcript variant N" labels in document order.
    pub fn transcript_labels(&self) -> Vec<String> {
        let mut ret: Vec<String> = vec![];
        for label in self.texts_of(TAG_LABEL) {
            if label.starts_with("transcript variant") && !ret.iter().any(|l| l == label) {
                ret.push(label.to_string());
            }
        }
        ret
    }

    /// Distinct transcript accessions (unversioned) in document order.
    pub fn transcript_accessions(&self) -> Vec<String> {
        let mut ret: Vec<String> = vec![];
        for accession in self.texts_of(TAG_ACCESSION) {
            if is_transcript_accession(accession) && !ret.iter().any(|a| a == accession) {
                ret.push(accession.to_string());
            }
        }
        ret
    }

    /// tRNA/rRNA/d-segment records have no exon substructure.
    pub fn non_coding_type(&self) -> Option<&str> {
        self.elements
            .iter()
            .filter(|e| e.tag == TAG_TYPE)
            .filter_map(|e| e.value.as_deref())
            .find(|v| NON_CODING_TYPES.contains(v))
    }

    pub fn chromosome_accession(&self) -> Option<&str> {
        self.texts_of(TAG_ACCESSION).find(|a| is_chromosome_accession(a))
    }

    pub fn taxname(&self) -> Option<&str> {
        self.texts_of("Org-ref_taxname").next()
    }

    pub fn locus(&self) -> Option<&str> {
        self.texts_of("Gene-ref_locus").next()
    }

    /// Exon intervals of one transcript on the chromosome annotation.
    ///
    /// Scanning starts once the chromosome accession has been seen, collects
    /// every interval while the current accession is `variant`, and stops at
    /// the first foreign accession after exons were found.
    pub fn transcript_exons(&self, variant: &str) -> TranscriptExons {
        let chromosome = self.chromosome_accession();
        let mut intervals = vec![];
        let mut strand = None;
        let mut in_chromosome = false;
        let mut in_variant = false;
        let mut pending_from: Option<i64> = None;

        for element in &self.elements {
            if element.tag == TAG_ACCESSION {
                let text = element.text.as_deref().unwrap_or_default();
                if text != variant {
                    if chromosome == Some(text) {
                        in_chromosome = true;
                    } else if intervals.is_empty() {
                        continue;
                    } else {
                        break;
                    }
                }
                if in_chromosome {
                    in_variant = text == variant;
                }
                continue;
            }
            if !(in_chromosome && in_variant) {
                continue;
            }
            match element.tag.as_str() {
                "Seq-interval_from" => pending_from = parse_coordinate(element),
                "Seq-interval_to" => {
                    if let (Some(from), Some(to)) = (pending_from.take(), parse_coordinate(element))
                    {
                        intervals.push(GenomicInterval::new(from, to));
                    }
                }
                "Na-strand" if strand.is_none() => {
                    strand = element.value.as_deref().and_then(Strand::from_ncbi_label);
                }
                _ => {}
            }
        }
        TranscriptExons {
            accession: variant.to_string(),
            intervals,
            strand,
        }
    }
}

fn element_from_start(start: &BytesStart<'_>) -> Result<XmlElement> {
    let tag = String::from_utf8_lossy(start.name().as_ref()).to_string();
    let value = start
        .try_get_attribute("value")
        .map_err(|e| anyhow!("Malformed attribute on <{tag}>: {e}"))?
        .map(|attr| {
            attr.unescape_value()
                .map(|v| v.to_string())
                .map_err(|e| anyhow!("Malformed attribute value on <{tag}>: {e}"))
        })
        .transpose()?;
    Ok(XmlElement {
        tag,
        text: None,
        value,
    })
}

fn parse_coordinate(element: &XmlElement) -> Option<i64> {
    element.text.as_deref().and_then(|t| t.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TP53_XML: &str = include_str!("../test_files/fixtures/ncbi/gene_7157.xml");
    const TRNA_XML: &str = include_str!("../test_files/fixtures/ncbi/gene_trna.xml");

    #[test]
    fn test_detect_gene_xml_dialect() {
        assert_eq!(
            detect_gene_xml_dialect(TP53_XML),
            GeneXmlDialect::EntrezgeneSet
        );
        assert_eq!(
            detect_gene_xml_dialect("<GBSet><GBSeq/></GBSet>"),
            GeneXmlDialect::Unknown
        );
        assert!(GeneRecord::parse("<GBSet><GBSeq/></GBSet>").is_err());
    }

    #[test]
    fn test_labels_and_accessions_are_unique_and_ordered() {
        let record = GeneRecord::parse(TP53_XML).unwrap();
        assert_eq!(
            record.transcript_labels(),
            vec!["transcript variant 1", "transcript variant 2"]
        );
        assert_eq!(
            record.transcript_accessions(),
            vec!["NM_000546", "NM_001126112"]
        );
        assert_eq!(record.chromosome_accession(), Some("NC_000017"));
        assert_eq!(record.taxname(), Some("Homo sapiens"));
        assert_eq!(record.locus(), Some("TP53"));
        assert_eq!(record.non_coding_type(), None);
    }

    #[test]
    fn test_transcript_exons_follow_variant_section() {
        let record = GeneRecord::parse(TP53_XML).unwrap();
        let v1 = record.transcript_exons("NM_000546");
        assert_eq!(v1.strand, Some(Strand::Minus));
        assert_eq!(
            v1.intervals,
            vec![
                GenomicInterval::new(7687376, 7687537),
                GenomicInterval::new(7676520, 7676622),
                GenomicInterval::new(7675993, 7676272),
            ]
        );
        let v2 = record.transcript_exons("NM_001126112");
        assert_eq!(v2.intervals.len(), 3);
        assert_eq!(v2.intervals[1], GenomicInterval::new(7676520, 7676594));
    }

    #[test]
    fn test_unknown_variant_has_no_exons() {
        let record = GeneRecord::parse(TP53_XML).unwrap();
        let missing = record.transcript_exons("NM_999999");
        assert!(missing.intervals.is_empty());
        assert_eq!(missing.strand, None);
    }

    #[test]
    fn test_non_coding_record() {
        let record = GeneRecord::parse(TRNA_XML).unwrap();
        assert_eq!(record.non_coding_type(), Some("tRNA"));
        assert!(record.transcript_accessions().is_empty());
    }

    #[test]
    fn test_accession_prefixes() {
        assert!(is_transcript_accession("nm_000546"));
        assert!(is_transcript_accession("XR_001"));
        assert!(!is_transcript_accession("NP_000537"));
        assert!(is_chromosome_accession("NT_187361"));
        assert!(!is_chromosome_accession("NW_001"));
    }
}
