//! Contract with the primer-design engine.
//!
//! Requests and responses use primer3's Boulder-IO tags so that the
//! production engine and test stubs speak the same language.

use crate::config::DesignConstraints;
use crate::error::DesignResult;
use crate::exons::ExonLayout;
use std::collections::HashMap;
use std::fmt::Write as _;

pub trait PrimerDesignOracle: Send + Sync {
    fn design(&self, request: &OracleRequest<'_>) -> DesignResult<BoulderRecord>;
}

/// `SEQUENCE_PRIMER_PAIR_OK_REGION_LIST` entry: left primer inside the first
/// range, right primer inside the second (spliced coordinates).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OkRegion {
    pub left_start: usize,
    pub left_len: usize,
    pub right_start: usize,
    pub right_len: usize,
}

impl OkRegion {
    pub fn from_exon_pair(layout: &ExonLayout, first: usize, second: usize) -> Option<Self> {
        let (s1, e1) = *layout.spliced().get(first)?;
        let (s2, e2) = *layout.spliced().get(second)?;
        Some(Self {
            left_start: s1,
            left_len: e1 - s1,
            right_start: s2,
            right_len: e2 - s2,
        })
    }

    /// Longest product the region allows.
    pub fn product_len(&self) -> usize {
        (self.right_start + self.right_len).saturating_sub(self.left_start)
    }

    pub fn tag_value(&self) -> String {
        format!(
            "{},{},{},{}",
            self.left_start, self.left_len, self.right_start, self.right_len
        )
    }
}

#[derive(Debug, Clone)]
pub struct OracleRequest<'a> {
    pub sequence_id: &'a str,
    pub template: &'a str,
    pub ok_region: OkRegion,
    pub num_return: usize,
    pub constraints: &'a DesignConstraints,
    pub template_alignment: bool,
}

fn flag(value: bool) -> u8 {
    u8::from(value)
}

impl OracleRequest<'_> {
    /// Serializes the request as one Boulder-IO record.
    pub fn to_boulder_io(&self, thermodynamic_parameters_path: Option<&str>) -> String {
        let c = self.constraints;
        let mut tags: Vec<(&str, String)> = vec![
            ("SEQUENCE_ID", self.sequence_id.to_string()),
            ("SEQUENCE_TEMPLATE", self.template.to_string()),
            (
                "SEQUENCE_PRIMER_PAIR_OK_REGION_LIST",
                self.ok_region.tag_value(),
            ),
            ("PRIMER_TASK", "generic".to_string()),
            ("PRIMER_NUM_RETURN", self.num_return.to_string()),
            ("PRIMER_OPT_SIZE", c.primer_opt_size.to_string()),
            ("PRIMER_MIN_SIZE", c.primer_min_size.to_string()),
            ("PRIMER_MAX_SIZE", c.primer_max_size.to_string()),
            ("PRIMER_OPT_TM", c.primer_opt_tm.to_string()),
            ("PRIMER_MIN_TM", c.primer_min_tm.to_string()),
            ("PRIMER_MAX_TM", c.primer_max_tm.to_string()),
            ("PRIMER_MIN_GC", c.primer_min_gc.to_string()),
            ("PRIMER_MAX_GC", c.primer_max_gc.to_string()),
            ("PRIMER_GC_CLAMP", c.primer_gc_clamp.to_string()),
            ("PRIMER_MAX_POLY_X", c.primer_max_poly_x.to_string()),
            ("PRIMER_MAX_END_STABILITY", c.primer_max_end_stability.to_string()),
            (
                "PRIMER_MAX_TEMPLATE_MISPRIMING_TH",
                c.max_template_mispriming_th.to_string(),
            ),
            (
                "PRIMER_PAIR_MAX_TEMPLATE_MISPRIMING_TH",
                c.pair_max_template_mispriming_th.to_string(),
            ),
            ("PRIMER_MAX_SELF_ANY_TH", c.max_self_any_th.to_string()),
            ("PRIMER_MAX_SELF_END_TH", c.max_self_end_th.to_string()),
            ("PRIMER_PAIR_MAX_COMPL_ANY_TH", c.pair_max_compl_any_th.to_string()),
            ("PRIMER_PAIR_MAX_COMPL_END_TH", c.pair_max_compl_end_th.to_string()),
            ("PRIMER_MAX_HAIRPIN_TH", c.max_hairpin_th.to_string()),
            (
                "PRIMER_MAX_TEMPLATE_MISPRIMING",
                c.max_template_mispriming.to_string(),
            ),
            (
                "PRIMER_PAIR_MAX_TEMPLATE_MISPRIMING",
                c.pair_max_template_mispriming.to_string(),
            ),
            ("PRIMER_MAX_SELF_ANY", c.max_self_any.to_string()),
            ("PRIMER_MAX_SELF_END", c.max_self_end.to_string()),
            ("PRIMER_PAIR_MAX_COMPL_ANY", c.pair_max_compl_any.to_string()),
            ("PRIMER_PAIR_MAX_COMPL_END", c.pair_max_compl_end.to_string()),
            (
                "PRIMER_THERMODYNAMIC_OLIGO_ALIGNMENT",
                flag(c.thermodynamic_oligo_alignment).to_string(),
            ),
            (
                "PRIMER_THERMODYNAMIC_TEMPLATE_ALIGNMENT",
                flag(self.template_alignment).to_string(),
            ),
            (
                "PRIMER_PRODUCT_SIZE_RANGE",
                format!("{}-{}", c.product_size_range.min, c.product_size_range.max),
            ),
            (
                "PRIMER_PICK_INTERNAL_OLIGO",
                flag(c.pick_internal_oligo).to_string(),
            ),
            ("PRIMER_INTERNAL_OPT_SIZE", c.internal_opt_size.to_string()),
            ("PRIMER_INTERNAL_MIN_SIZE", c.internal_min_size.to_string()),
            ("PRIMER_INTERNAL_MAX_SIZE", c.internal_max_size.to_string()),
            ("PRIMER_INTERNAL_OPT_TM", c.internal_opt_tm.to_string()),
            ("PRIMER_INTERNAL_MIN_TM", c.internal_min_tm.to_string()),
            ("PRIMER_INTERNAL_MAX_TM", c.internal_max_tm.to_string()),
            (
                "PRIMER_INTERNAL_OPT_GC_PERCENT",
                c.internal_opt_gc_percent.to_string(),
            ),
            ("PRIMER_INTERNAL_MIN_GC", c.internal_min_gc.to_string()),
            ("PRIMER_INTERNAL_MAX_GC", c.internal_max_gc.to_string()),
            ("PRIMER_SALT_MONOVALENT", c.monovalent_cation_conc.to_string()),
            ("PRIMER_SALT_DIVALENT", c.divalent_cation_conc.to_string()),
            ("PRIMER_DNTP_CONC", c.dntp_conc.to_string()),
            ("PRIMER_DNA_CONC", c.dna_conc.to_string()),
            (
                "PRIMER_TM_FORMULA",
                c.thermodynamic_table.primer3_code().to_string(),
            ),
            (
                "PRIMER_SALT_CORRECTIONS",
                c.salt_correction.primer3_code().to_string(),
            ),
        ];
        if let Some(path) = thermodynamic_parameters_path {
            tags.push(("PRIMER_THERMODYNAMIC_PARAMETERS_PATH", path.to_string()));
        }
        let mut ret = String::new();
        for (key, value) in tags {
            let _ = writeln!(ret, "{key}={value}");
        }
        ret.push_str("=\n");
        ret
    }
}

/// One oligo as reported by the engine. `position` is the 5' base for left
/// primers and the 3'-most template base for right primers.
#[derive(Debug, Clone, PartialEq)]
pub struct OracleOligo {
    pub sequence: String,
    pub position: usize,
    pub length: usize,
    pub tm: Option<f64>,
    pub gc_percent: Option<f64>,
    pub self_any_th: Option<f64>,
    pub self_end_th: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OraclePair {
    pub left: OracleOligo,
    pub right: OracleOligo,
}

/// primer3 `KEY=VALUE` output record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoulderRecord {
    fields: HashMap<String, String>,
}

impl BoulderRecord {
    pub fn parse(text: &str) -> Self {
        let mut fields = HashMap::new();
        for line in text.lines() {
            let line = line.trim_end_matches('\r');
            if line == "=" {
                break;
            }
            if let Some((key, value)) = line.split_once('=') {
                fields.insert(key.trim().to_string(), value.to_string());
            }
        }
        Self { fields }
    }

    pub fn insert(&mut self, key: &str, value: impl ToString) {
        self.fields.insert(key.to_string(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key)?.trim().parse().ok()
    }

    /// `PRIMER_ERROR`, reported when the engine rejected the request.
    pub fn error(&self) -> Option<&str> {
        self.get("PRIMER_ERROR").filter(|e| !e.trim().is_empty())
    }

    pub fn pairs_returned(&self) -> usize {
        self.get("PRIMER_PAIR_NUM_RETURNED")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    fn oligo(&self, side: &str, k: usize) -> Option<OracleOligo> {
        let prefix = format!("PRIMER_{side}_{k}");
        let sequence = self.get(&format!("{prefix}_SEQUENCE"))?.trim().to_string();
        let (position, length) = self.get(&prefix)?.split_once(',')?;
        Some(OracleOligo {
            position: position.trim().parse().ok()?,
            length: length.trim().parse().ok()?,
            tm: self.get_f64(&format!("{prefix}_TM")),
            gc_percent: self.get_f64(&format!("{prefix}_GC_PERCENT")),
            self_any_th: self.get_f64(&format!("{prefix}_SELF_ANY_TH")),
            self_end_th: self.get_f64(&format!("{prefix}_SELF_END_TH")),
            sequence,
        })
    }

    /// Pair `k`, or `None` when any required tag is missing.
    pub fn pair(&self, k: usize) -> Option<OraclePair> {
        Some(OraclePair {
            left: self.oligo("LEFT", k)?,
            right: self.oligo("RIGHT", k)?,
        })
    }

    pub fn pairs(&self) -> Vec<OraclePair> {
        (0..self.pairs_returned())
            .filter_map(|k| self.pair(k))
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Oracle backed by a closure, recording every request it sees.
    pub struct FnOracle<F> {
        respond: F,
        calls: Mutex<Vec<(usize, OkRegion, bool)>>,
    }

    impl<F> FnOracle<F>
    where
        F: Fn(&OracleRequest<'_>) -> DesignResult<BoulderRecord> + Send + Sync,
    {
        pub fn new(respond: F) -> Self {
            Self {
                respond,
                calls: Mutex::new(vec![]),
            }
        }

        /// `(num_return, region, template_alignment)` per call.
        pub fn calls(&self) -> Vec<(usize, OkRegion, bool)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl<F> PrimerDesignOracle for FnOracle<F>
    where
        F: Fn(&OracleRequest<'_>) -> DesignResult<BoulderRecord> + Send + Sync,
    {
        fn design(&self, request: &OracleRequest<'_>) -> DesignResult<BoulderRecord> {
            self.calls.lock().unwrap().push((
                request.num_return,
                request.ok_region,
                request.template_alignment,
            ));
            (self.respond)(request)
        }
    }

    /// A record holding pairs cut straight out of `template`: each entry is
    /// `(left 5' position, right 3' position)` with 20 nt primers.
    pub fn record_from_template(template: &str, pairs: &[(usize, usize)]) -> BoulderRecord {
        let mut record = BoulderRecord::default();
        record.insert("PRIMER_PAIR_NUM_RETURNED", pairs.len());
        for (k, &(left, right)) in pairs.iter().enumerate() {
            let left_seq = &template[left..left + 20];
            let right_seq = String::from_utf8_lossy(&bio::alphabets::dna::revcomp(
                template[right + 1 - 20..=right].as_bytes(),
            ))
            .to_string();
            record.insert(&format!("PRIMER_LEFT_{k}_SEQUENCE"), left_seq);
            record.insert(&format!("PRIMER_LEFT_{k}"), format!("{left},20"));
            record.insert(&format!("PRIMER_LEFT_{k}_TM"), 60.1);
            record.insert(&format!("PRIMER_LEFT_{k}_GC_PERCENT"), 50.0);
            record.insert(&format!("PRIMER_RIGHT_{k}_SEQUENCE"), right_seq);
            record.insert(&format!("PRIMER_RIGHT_{k}"), format!("{right},20"));
            record.insert(&format!("PRIMER_RIGHT_{k}_TM"), 59.8);
            record.insert(&format!("PRIMER_RIGHT_{k}_GC_PERCENT"), 55.0);
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use labprimer_protocol::Strand;

    const PRIMER3_OUTPUT: &str = include_str!("../test_files/fixtures/primer3/two_pairs.boulder");

    #[test]
    fn test_parse_primer3_output() {
        let record = BoulderRecord::parse(PRIMER3_OUTPUT);
        assert_eq!(record.error(), None);
        assert_eq!(record.pairs_returned(), 2);
        let pairs = record.pairs();
        assert_eq!(pairs.len(), 2);
        let first = &pairs[0];
        assert_eq!(first.left.sequence, "GAGGTTGGCTCTGACTGTACC");
        assert_eq!((first.left.position, first.left.length), (96, 21));
        assert_eq!(first.left.tm, Some(60.125));
        assert_eq!(first.right.sequence, "TCCGTCCCAGTAGATTACCAC");
        assert_eq!((first.right.position, first.right.length), (228, 21));
        assert_eq!(first.right.self_end_th, Some(0.0));
        assert!(record.pair(2).is_none());
    }

    #[test]
    fn test_missing_keys_mean_no_pairs() {
        let record = BoulderRecord::parse("PRIMER_LEFT_NUM_RETURNED=0\n=\n");
        assert_eq!(record.pairs_returned(), 0);
        assert!(record.pairs().is_empty());

        let partial = BoulderRecord::parse(
            "PRIMER_PAIR_NUM_RETURNED=1\nPRIMER_LEFT_0_SEQUENCE=ACGT\nPRIMER_LEFT_0=1,4\n=\n",
        );
        assert!(partial.pairs().is_empty());
        let error = BoulderRecord::parse("PRIMER_ERROR=SEQUENCE_TEMPLATE is empty\n=\n");
        assert_eq!(error.error(), Some("SEQUENCE_TEMPLATE is empty"));
    }

    #[test]
    fn test_ok_region_from_exon_pair() {
        let layout = crate::exons::normalize(&[(100, 250), (500, 650), (900, 960)], Strand::Plus);
        let region = OkRegion::from_exon_pair(&layout, 0, 2).unwrap();
        assert_eq!(region.tag_value(), "0,150,300,60");
        assert_eq!(region.product_len(), 360);
        assert!(OkRegion::from_exon_pair(&layout, 0, 3).is_none());
    }

    #[test]
    fn test_request_serializes_primer3_tags() {
        let constraints = DesignConstraints::default();
        let request = OracleRequest {
            sequence_id: "NM_000546 TP53",
            template: "ACGTACGTAC",
            ok_region: OkRegion {
                left_start: 0,
                left_len: 5,
                right_start: 5,
                right_len: 5,
            },
            num_return: 2,
            constraints: &constraints,
            template_alignment: false,
        };
        let text = request.to_boulder_io(Some("/opt/primer3_config/"));
        let record = BoulderRecord::parse(&text);
        assert!(text.ends_with("\n=\n"));
        assert_eq!(record.get("SEQUENCE_PRIMER_PAIR_OK_REGION_LIST"), Some("0,5,5,5"));
        assert_eq!(record.get("PRIMER_NUM_RETURN"), Some("2"));
        assert_eq!(record.get("PRIMER_PRODUCT_SIZE_RANGE"), Some("80-250"));
        assert_eq!(record.get("PRIMER_TM_FORMULA"), Some("1"));
        assert_eq!(record.get("PRIMER_SALT_CORRECTIONS"), Some("1"));
        assert_eq!(record.get("PRIMER_THERMODYNAMIC_TEMPLATE_ALIGNMENT"), Some("0"));
        assert_eq!(record.get("PRIMER_MAX_TEMPLATE_MISPRIMING_TH"), Some("40"));
        assert_eq!(record.get("PRIMER_PAIR_MAX_TEMPLATE_MISPRIMING_TH"), Some("70"));
        assert_eq!(record.get("PRIMER_SALT_DIVALENT"), Some("1.5"));
        assert_eq!(
            record.get("PRIMER_THERMODYNAMIC_PARAMETERS_PATH"),
            Some("/opt/primer3_config/")
        );
    }
}
