//! NCBI Primer-BLAST specificity check, used when the genome browser has no
//! transcript track for a species.

use crate::config::{CrossCheckSettings, ServiceEndpoints};
use crate::error::{DesignError, DesignResult, ErrorCode};
use crate::http::{HttpTransport, build_url};
use labprimer_protocol::{CrossCheckAlignment, CrossCheckHit};
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

lazy_static! {
    static ref JOB_KEY_INPUT_RE: Regex =
        Regex::new(r#"(?i)<input[^>]*name="job_key"[^>]*value="([^"]+)""#).expect("valid regex");
    static ref JOB_KEY_INPUT_REV_RE: Regex =
        Regex::new(r#"(?i)<input[^>]*value="([^"]+)"[^>]*name="job_key""#).expect("valid regex");
    static ref JOB_KEY_LINK_RE: Regex =
        Regex::new(r"job_key=([A-Za-z0-9_-]+)").expect("valid regex");
    static ref FIRST_PAIR_ANCHOR_RE: Regex =
        Regex::new(r#"(?i)<a\s+name="0""#).expect("valid regex");
    static ref FORWARD_HEADER_RE: Regex =
        Regex::new(r"(?i)<th[^>]*>\s*Forward primer\s*</th>").expect("valid regex");
    static ref REVERSE_HEADER_RE: Regex =
        Regex::new(r"(?i)<th[^>]*>\s*Reverse primer\s*</th>").expect("valid regex");
    static ref ENTRY_RE: Regex = Regex::new(
        r#"(?i)<a[^>]*href="[^"]*viewer\.fcgi\?db=nucleotide[^"]*"[^>]*>([^<]*)</a>([^<]*)"#
    )
    .expect("valid regex");
    static ref PRE_RE: Regex = Regex::new(r"(?is)<pre[^>]*>(.*?)</pre>").expect("valid regex");
    static ref TAG_RE: Regex = Regex::new(r"<[^>]+>").expect("valid regex");
    static ref PRODUCT_LENGTH_RE: Regex =
        Regex::new(r"product length = (\d+)").expect("valid regex");
    static ref FORWARD_PRIMER_RE: Regex =
        Regex::new(r"Forward primer\s+\d+\s+([A-Za-z]+)\s+\d+").expect("valid regex");
    static ref REVERSE_PRIMER_RE: Regex =
        Regex::new(r"Reverse primer\s+\d+\s+([A-Za-z]+)\s+\d+").expect("valid regex");
    static ref TEMPLATE_RE: Regex =
        Regex::new(r"Template\s+(\d+)\s+([A-Za-z.\s]+)\s+(\d+)").expect("valid regex");
}

/// Fixed Primer-BLAST settings of a specificity-only request.
const SUBMIT_PARAMS: &[(&str, &str)] = &[
    ("CMD", "request"),
    ("CON_ANEAL_OLIGO", "50.0"),
    ("CON_DNTPS", "0.6"),
    ("DIVA_CATIONS", "1.5"),
    ("EVALUE", "30000"),
    ("GC_CLAMP", "0"),
    ("HITSIZE", "50000"),
    ("LOW_COMPLEXITY_FILTER", "on"),
    ("MAX_CANDIDATE_PRIMER", "500"),
    ("MAX_INTRON_SIZE", "1000000"),
    ("MAX_TARGET_PER_TEMPLATE", "100"),
    ("MAX_TARGET_SIZE", "4000"),
    ("MIN_INTRON_SIZE", "1000"),
    ("MISMATCH_REGION_LENGTH", "5"),
    ("MONO_CATIONS", "50.0"),
    ("OVERLAP_3END", "4"),
    ("OVERLAP_5END", "7"),
    ("POLYX", "5"),
    ("PRIMER_3END_SPECIFICITY_MISMATCH", "1"),
    ("PRIMER_INTERNAL_OLIGO_MAX_GC", "80.0"),
    ("PRIMER_INTERNAL_OLIGO_MAX_SIZE", "27"),
    ("PRIMER_INTERNAL_OLIGO_MAX_TM", "63.0"),
    ("PRIMER_INTERNAL_OLIGO_MIN_GC", "20.0"),
    ("PRIMER_INTERNAL_OLIGO_MIN_SIZE", "18"),
    ("PRIMER_INTERNAL_OLIGO_MIN_TM", "57.0"),
    ("PRIMER_INTERNAL_OLIGO_OPT_GC_PERCENT", "50"),
    ("PRIMER_INTERNAL_OLIGO_OPT_SIZE", "20"),
    ("PRIMER_INTERNAL_OLIGO_OPT_TM", "60.0"),
    ("PRIMER_MAX_DIFF_TM", "3"),
    ("PRIMER_MAX_END_GC", "5"),
    ("PRIMER_MAX_END_STABILITY", "9"),
    ("PRIMER_MAX_GC", "80.0"),
    ("PRIMER_MAX_HAIRPIN_TH", "24.0"),
    ("PRIMER_MAX_SELF_ANY_TH", "45.0"),
    ("PRIMER_MAX_SELF_END_TH", "35.0"),
    ("PRIMER_MAX_SIZE", "25"),
    ("PRIMER_MAX_TEMPLATE_MISPRIMING", "12.00"),
    ("PRIMER_MAX_TEMPLATE_MISPRIMING_TH", "40.00"),
    ("PRIMER_MAX_TM", "63.0"),
    ("PRIMER_MIN_GC", "20.0"),
    ("PRIMER_MIN_SIZE", "15"),
    ("PRIMER_MIN_TM", "57.0"),
    ("PRIMER_MISPRIMING_LIBRARY", "AUTO"),
    ("PRIMER_NUM_RETURN", "10"),
    ("PRIMER_ON_SPLICE_SITE", "0"),
    ("PRIMER_OPT_SIZE", "20"),
    ("PRIMER_OPT_TM", "60.0"),
    ("PRIMER_PAIR_MAX_COMPL_ANY", "8.00"),
    ("PRIMER_PAIR_MAX_COMPL_ANY_TH", "45.0"),
    ("PRIMER_PAIR_MAX_COMPL_END", "3.00"),
    ("PRIMER_PAIR_MAX_COMPL_END_TH", "35.0"),
    ("PRIMER_PAIR_MAX_TEMPLATE_MISPRIMING", "24.00"),
    ("PRIMER_PAIR_MAX_TEMPLATE_MISPRIMING_TH", "70.00"),
    ("PRIMER_PRODUCT_MAX", "1000"),
    ("PRIMER_PRODUCT_MIN", "70"),
    ("PRIMER_SPECIFICITY_DATABASE", "refseq_mrna"),
    ("SALT_FORMULAR", "1"),
    ("SEARCH_SPECIFIC_PRIMER", "on"),
    ("SEARCHMODE", "0"),
    ("SELF_ANY", "8.00"),
    ("SELF_END", "3.00"),
    ("SHOW_SVIEWER", "on"),
    ("SPLICE_SITE_OVERLAP_3END", "4"),
    ("SPLICE_SITE_OVERLAP_3END_MAX", "8"),
    ("SPLICE_SITE_OVERLAP_5END", "7"),
    ("TM_METHOD", "1"),
    ("TOTAL_MISMATCH_IGNORE", "6"),
    ("TOTAL_PRIMER_SPECIFICITY_MISMATCH", "1"),
    ("UNGAPPED_BLAST", "on"),
    ("USER_TYPE", "2"),
    ("WORD_SIZE", "7"),
];

pub fn submission_params(species: &str, forward: &str, reverse: &str) -> Vec<(&'static str, String)> {
    let mut params: Vec<(&'static str, String)> = SUBMIT_PARAMS
        .iter()
        .map(|(k, v)| (*k, v.to_string()))
        .collect();
    params.push(("PRIMER_LEFT_INPUT", forward.to_string()));
    params.push(("PRIMER_RIGHT_INPUT", reverse.to_string()));
    if !species.trim().is_empty() {
        params.push(("ORGANISM", species.trim().to_string()));
    }
    params
}

pub fn extract_job_key(html: &str) -> Option<String> {
    [&*JOB_KEY_INPUT_RE, &*JOB_KEY_INPUT_REV_RE, &*JOB_KEY_LINK_RE]
        .iter()
        .find_map(|re| re.captures(html))
        .map(|caps| caps[1].trim().to_string())
        .filter(|key| !key.is_empty())
}

/// The result page carries the first pair anchor and both primer headers.
pub fn results_ready(html: &str) -> bool {
    FIRST_PAIR_ANCHOR_RE.is_match(html)
        && FORWARD_HEADER_RE.is_match(html)
        && REVERSE_HEADER_RE.is_match(html)
}

/// Removes markup and decodes entities from an HTML fragment.
pub(crate) fn html_text(fragment: &str) -> String {
    let text = TAG_RE.replace_all(fragment, "").replace("&nbsp;", " ");
    let decoded = quick_xml::escape::unescape(&text)
        .map(|d| d.into_owned())
        .ok();
    decoded.unwrap_or(text)
}

fn alignment(primer: Option<String>, template: Option<(String, String, String)>) -> CrossCheckAlignment {
    let (start, template, end) = match template {
        Some((s, t, e)) => (Some(s), Some(t), Some(e)),
        None => (None, None, None),
    };
    CrossCheckAlignment {
        primer,
        start,
        template,
        end,
    }
}

/// Parses the target table of a finished Primer-BLAST job.
pub fn parse_results(html: &str) -> Vec<CrossCheckHit> {
    let mut hits = vec![];
    for caps in ENTRY_RE.captures_iter(html) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        let name = html_text(&caps[1]).trim().to_string();
        let description = html_text(&caps[2]).trim().to_string();
        let block = PRE_RE
            .captures(&html[whole.end()..])
            .map(|pre| html_text(&pre[1]))
            .unwrap_or_default();
        let block = block.trim();

        let product_length = PRODUCT_LENGTH_RE
            .captures(block)
            .and_then(|c| c[1].parse().ok());
        let primer = |re: &Regex| re.captures(block).map(|c| c[1].to_string());
        let mut templates = TEMPLATE_RE.captures_iter(block).map(|c| {
            (
                c[1].to_string(),
                c[2].trim().to_string(),
                c[3].to_string(),
            )
        });
        let forward = alignment(primer(&*FORWARD_PRIMER_RE), templates.next());
        let reverse = alignment(primer(&*REVERSE_PRIMER_RE), templates.next());

        hits.push(CrossCheckHit {
            name,
            description,
            product_length,
            forward,
            reverse,
        });
    }
    hits
}

#[derive(Clone)]
pub struct PrimerBlastClient {
    transport: Arc<dyn HttpTransport>,
    url: String,
    settings: CrossCheckSettings,
}

impl PrimerBlastClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        endpoints: &ServiceEndpoints,
        settings: CrossCheckSettings,
    ) -> Self {
        Self {
            transport,
            url: endpoints.primer_blast.clone(),
            settings,
        }
    }

    pub fn settings(&self) -> &CrossCheckSettings {
        &self.settings
    }

    /// Submits the primer pair and returns the job key.
    pub fn submit(&self, species: &str, forward: &str, reverse: &str) -> DesignResult<String> {
        let url = build_url(&self.url, &submission_params(species, forward, reverse))?;
        debug!(url = %url, "submitting Primer-BLAST job");
        let response = self.transport.get(&url)?;
        if !response.is_success() {
            return Err(DesignError::new(
                ErrorCode::Service,
                format!("Primer-BLAST submission failed: HTTP {}", response.status),
            ));
        }
        extract_job_key(&response.body).ok_or_else(|| {
            DesignError::malformed("Primer-BLAST did not return a job key".to_string())
        })
    }

    /// Polls the job until its result page is complete.
    pub fn wait_for_results(&self, job_key: &str) -> DesignResult<String> {
        let url = build_url(
            &self.url,
            &[("job_key", job_key.to_string()), ("CMD", "get".to_string())],
        )?;
        let mut polls: u32 = 0;
        loop {
            if self.settings.max_polls.is_some_and(|max| polls >= max) {
                return Err(DesignError::new(
                    ErrorCode::Service,
                    format!("Primer-BLAST job {job_key} did not finish after {polls} polls"),
                ));
            }
            if self.settings.poll_interval_ms > 0 {
                thread::sleep(Duration::from_millis(self.settings.poll_interval_ms));
            }
            polls += 1;
            match self.transport.get(&url) {
                Ok(response) if response.is_success() && results_ready(&response.body) => {
                    return Ok(response.body);
                }
                Ok(response) if response.is_success() => {
                    debug!(job_key, polls, "Primer-BLAST results pending");
                }
                Ok(response) => {
                    warn!(job_key, polls, "Primer-BLAST poll returned HTTP {}", response.status);
                }
                Err(err) => warn!(job_key, polls, "Primer-BLAST poll failed: {}", err.message),
            }
        }
    }

    /// Submit, wait and parse in one go.
    pub fn search(
        &self,
        species: &str,
        forward: &str,
        reverse: &str,
    ) -> DesignResult<Vec<CrossCheckHit>> {
        let job_key = self.submit(species, forward, reverse)?;
        info!(job_key, "Primer-BLAST job submitted for {forward} / {reverse}");
        let page = self.wait_for_results(&job_key)?;
        Ok(parse_results(&page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::ScriptedTransport;

    const SUBMIT_HTML: &str = include_str!("../test_files/fixtures/primer_blast/submit.html");
    const PENDING_HTML: &str = include_str!("../test_files/fixtures/primer_blast/pending.html");
    const RESULT_HTML: &str = include_str!("../test_files/fixtures/primer_blast/result.html");

    fn client(transport: Arc<ScriptedTransport>, max_polls: Option<u32>) -> PrimerBlastClient {
        PrimerBlastClient::new(
            transport,
            &ServiceEndpoints::default(),
            CrossCheckSettings {
                enabled: true,
                poll_interval_ms: 0,
                max_polls,
            },
        )
    }

    #[test]
    fn test_job_key_from_hidden_input_or_link() {
        assert_eq!(extract_job_key(SUBMIT_HTML).as_deref(), Some("k9Xq2_TP53-aa"));
        assert_eq!(
            extract_job_key(r#"<a href="primertool.cgi?job_key=ABC_123&CMD=get">here</a>"#)
                .as_deref(),
            Some("ABC_123")
        );
        assert_eq!(extract_job_key("<html>busy</html>"), None);
    }

    #[test]
    fn test_result_markers() {
        assert!(!results_ready(PENDING_HTML));
        assert!(results_ready(RESULT_HTML));
    }

    #[test]
    fn test_parse_result_table() {
        let hits = parse_results(RESULT_HTML);
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].name, "NM_000546.6");
        assert_eq!(
            hits[0].description,
            "Homo sapiens tumor protein p53 (TP53), transcript variant 1, mRNA"
        );
        assert_eq!(hits[0].product_length, Some(133));
        assert_eq!(hits[0].forward.primer.as_deref(), Some("GAGGTTGGCTCTGACTGTACC"));
        assert_eq!(hits[0].forward.start.as_deref(), Some("96"));
        assert_eq!(hits[0].forward.template.as_deref(), Some("....................."));
        assert_eq!(hits[0].forward.end.as_deref(), Some("116"));
        assert_eq!(hits[0].reverse.primer.as_deref(), Some("TCCGTCCCAGTAGATTACCAC"));
        assert_eq!(hits[0].reverse.start.as_deref(), Some("228"));
        assert_eq!(hits[0].reverse.end.as_deref(), Some("208"));
        assert_eq!(hits[2].product_length, Some(1480));
    }

    #[test]
    fn test_search_submits_then_polls_until_ready() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .respond("CMD=request", 200, SUBMIT_HTML)
                .respond("CMD=get", 200, PENDING_HTML)
                .respond("CMD=get", 503, "")
                .respond("CMD=get", 200, RESULT_HTML),
        );
        let hits = client(transport.clone(), Some(10))
            .search("Homo sapiens", "GAGGTTGGCTCTGACTGTACC", "TCCGTCCCAGTAGATTACCAC")
            .unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(transport.count("CMD=get"), 3);
        let submit = &transport.requests()[0];
        assert!(submit.contains("PRIMER_LEFT_INPUT=GAGGTTGGCTCTGACTGTACC"));
        assert!(submit.contains("PRIMER_SPECIFICITY_DATABASE=refseq_mrna"));
        assert!(submit.contains("ORGANISM=Homo+sapiens"));
        assert!(transport.requests()[1].contains("job_key=k9Xq2_TP53-aa"));
    }

    #[test]
    fn test_poll_limit_and_submit_failures() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .respond("CMD=request", 200, SUBMIT_HTML)
                .respond("CMD=get", 200, PENDING_HTML),
        );
        let err = client(transport.clone(), Some(2))
            .search("Homo sapiens", "ACGT", "TGCA")
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Service);
        assert_eq!(transport.count("CMD=get"), 2);

        let transport = Arc::new(ScriptedTransport::new().respond("CMD=request", 500, ""));
        let err = client(transport, Some(2)).submit("", "ACGT", "TGCA").unwrap_err();
        assert!(err.message.contains("HTTP 500"));

        let transport = Arc::new(ScriptedTransport::new().respond("CMD=request", 200, "<p>oops</p>"));
        let err = client(transport, Some(2)).submit("", "ACGT", "TGCA").unwrap_err();
        assert_eq!(err.code, ErrorCode::Malformed);
    }

    #[test]
    fn test_html_text_decodes_entities() {
        assert_eq!(html_text("<b>a &amp; b</b>&nbsp;&lt;x&gt;"), "a & b <x>");
    }
}
