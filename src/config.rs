use crate::error::{DesignError, DesignResult};
use crate::http::RetryPolicy;
use crate::thermo::{SaltConditions, SaltCorrection, ThermodynamicTable};
use serde::{Deserialize, Serialize};
use std::fs;
use std::str::FromStr;

pub const DEFAULT_CONFIG_PATH: &str = "labprimer.json";
pub const DEFAULT_USER_AGENT: &str = concat!("labprimer/", env!("CARGO_PKG_VERSION"));
pub const PRIMER3_ENV_BIN: &str = "LABPRIMER_PRIMER3_BIN";

/// Which in-silico PCR verdicts a candidate must survive to be kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    #[default]
    #[serde(alias = "No", alias = "no")]
    Off,
    #[serde(alias = "qPCR", alias = "qpcr")]
    Relative,
    #[serde(alias = "Genome", alias = "genome")]
    Absolute,
    #[serde(alias = "Both")]
    Both,
}

impl FromStr for ValidationMode {
    type Err = DesignError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "no" => Ok(Self::Off),
            "relative" | "qpcr" => Ok(Self::Relative),
            "absolute" | "genome" => Ok(Self::Absolute),
            "both" => Ok(Self::Both),
            other => Err(DesignError::invalid_input(format!(
                "Unknown validation mode '{other}' (expected off, qpcr, genome or both)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSizeRange {
    pub min: usize,
    pub max: usize,
}

impl Default for ProductSizeRange {
    fn default() -> Self {
        Self { min: 80, max: 250 }
    }
}

/// Primer-design constraints for one run.
///
/// Field names follow primer3's tags in snake case. Values are never
/// rejected: an optimum outside its bounds is moved to the midpoint by
/// [`DesignConstraints::repaired`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DesignConstraints {
    pub num_return: usize,

    pub primer_opt_size: usize,
    pub primer_min_size: usize,
    pub primer_max_size: usize,
    pub primer_opt_tm: f64,
    pub primer_min_tm: f64,
    pub primer_max_tm: f64,
    pub primer_min_gc: f64,
    pub primer_max_gc: f64,
    pub primer_gc_clamp: usize,
    pub primer_max_poly_x: usize,
    pub primer_max_end_stability: f64,

    pub max_template_mispriming_th: f64,
    pub pair_max_template_mispriming_th: f64,
    pub max_self_any_th: f64,
    pub max_self_end_th: f64,
    pub pair_max_compl_any_th: f64,
    pub pair_max_compl_end_th: f64,
    pub max_hairpin_th: f64,
    pub max_template_mispriming: f64,
    pub pair_max_template_mispriming: f64,
    pub max_self_any: f64,
    pub max_self_end: f64,
    pub pair_max_compl_any: f64,
    pub pair_max_compl_end: f64,
    pub thermodynamic_oligo_alignment: bool,
    pub thermodynamic_template_alignment: bool,

    pub product_size_range: ProductSizeRange,

    pub pick_internal_oligo: bool,
    pub internal_opt_size: usize,
    pub internal_min_size: usize,
    pub internal_max_size: usize,
    pub internal_opt_tm: f64,
    pub internal_min_tm: f64,
    pub internal_max_tm: f64,
    pub internal_opt_gc_percent: f64,
    pub internal_min_gc: f64,
    pub internal_max_gc: f64,

    pub monovalent_cation_conc: f64,
    pub divalent_cation_conc: f64,
    pub dntp_conc: f64,
    pub dna_conc: f64,
    pub thermodynamic_table: ThermodynamicTable,
    pub salt_correction: SaltCorrection,

    pub validate_in_silico: bool,
    pub only_validated: ValidationMode,
    pub reverse_exon_order: bool,
    pub compute_amplicon_tm: bool,
}

impl Default for DesignConstraints {
    fn default() -> Self {
        Self {
            num_return: 10,
            primer_opt_size: 20,
            primer_min_size: 16,
            primer_max_size: 24,
            primer_opt_tm: 60.0,
            primer_min_tm: 57.0,
            primer_max_tm: 63.0,
            primer_min_gc: 40.0,
            primer_max_gc: 60.0,
            primer_gc_clamp: 0,
            primer_max_poly_x: 5,
            primer_max_end_stability: 9.0,
            max_template_mispriming_th: 40.0,
            pair_max_template_mispriming_th: 70.0,
            max_self_any_th: 45.0,
            max_self_end_th: 35.0,
            pair_max_compl_any_th: 45.0,
            pair_max_compl_end_th: 35.0,
            max_hairpin_th: 24.0,
            max_template_mispriming: 12.0,
            pair_max_template_mispriming: 24.0,
            max_self_any: 8.0,
            max_self_end: 3.0,
            pair_max_compl_any: 8.0,
            pair_max_compl_end: 3.0,
            thermodynamic_oligo_alignment: true,
            thermodynamic_template_alignment: true,
            product_size_range: ProductSizeRange::default(),
            pick_internal_oligo: false,
            internal_opt_size: 20,
            internal_min_size: 18,
            internal_max_size: 24,
            internal_opt_tm: 60.0,
            internal_min_tm: 57.0,
            internal_max_tm: 63.0,
            internal_opt_gc_percent: 50.0,
            internal_min_gc: 20.0,
            internal_max_gc: 80.0,
            monovalent_cation_conc: 50.0,
            divalent_cation_conc: 1.5,
            dntp_conc: 0.6,
            dna_conc: 50.0,
            thermodynamic_table: ThermodynamicTable::SantaLucia1998,
            salt_correction: SaltCorrection::SantaLucia,
            validate_in_silico: false,
            only_validated: ValidationMode::Off,
            reverse_exon_order: false,
            compute_amplicon_tm: true,
        }
    }
}

impl DesignConstraints {
    /// Returns a copy whose optima lie inside their bounds.
    pub fn repaired(&self) -> Self {
        let mut ret = self.clone();
        if !(ret.primer_min_size <= ret.primer_opt_size && ret.primer_opt_size <= ret.primer_max_size)
        {
            ret.primer_opt_size = (ret.primer_max_size + ret.primer_min_size) / 2;
        }
        if !(ret.primer_min_tm <= ret.primer_opt_tm && ret.primer_opt_tm <= ret.primer_max_tm) {
            ret.primer_opt_tm = (ret.primer_max_tm + ret.primer_min_tm) / 2.0;
        }
        if !(ret.internal_min_size <= ret.internal_opt_size
            && ret.internal_opt_size <= ret.internal_max_size)
        {
            ret.internal_opt_size = (ret.internal_max_size + ret.internal_min_size) / 2;
        }
        if !(ret.internal_min_tm <= ret.internal_opt_tm && ret.internal_opt_tm <= ret.internal_max_tm)
        {
            ret.internal_opt_tm = (ret.internal_max_tm + ret.internal_min_tm) / 2.0;
        }
        if !(ret.internal_min_gc <= ret.internal_opt_gc_percent
            && ret.internal_opt_gc_percent <= ret.internal_max_gc)
        {
            ret.internal_opt_gc_percent = (ret.internal_max_gc + ret.internal_min_gc) / 2.0;
        }
        ret
    }

    pub fn salt_conditions(&self) -> SaltConditions {
        SaltConditions {
            monovalent_mm: self.monovalent_cation_conc,
            divalent_mm: self.divalent_cation_conc,
            dntp_mm: self.dntp_conc,
            dna_nm: self.dna_conc,
            correction: self.salt_correction,
        }
    }

    pub fn validation_requested(&self) -> bool {
        self.validate_in_silico || self.only_validated != ValidationMode::Off
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceEndpoints {
    pub eutils_base: String,
    pub nuccore_page: String,
    pub ucsc_pcr: String,
    pub primer_blast: String,
    pub user_agent: String,
}

impl Default for ServiceEndpoints {
    fn default() -> Self {
        Self {
            eutils_base: "https://eutils.ncbi.nlm.nih.gov/entrez/eutils".to_string(),
            nuccore_page: "https://www.ncbi.nlm.nih.gov/nuccore".to_string(),
            ucsc_pcr: "https://genome.ucsc.edu/cgi-bin/hgPcr".to_string(),
            primer_blast: "https://www.ncbi.nlm.nih.gov/tools/primer-blast/primertool.cgi"
                .to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl ServiceEndpoints {
    pub fn eutils(&self, tool: &str) -> String {
        format!("{}/{tool}", self.eutils_base.trim_end_matches('/'))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossCheckSettings {
    pub enabled: bool,
    pub poll_interval_ms: u64,
    pub max_polls: Option<u32>,
}

impl Default for CrossCheckSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: 10_000,
            max_polls: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Primer3Settings {
    pub executable: String,
    pub thermodynamic_parameters_path: Option<String>,
}

impl Default for Primer3Settings {
    fn default() -> Self {
        Self {
            executable: "primer3_core".to_string(),
            thermodynamic_parameters_path: None,
        }
    }
}

impl Primer3Settings {
    /// The configured executable unless overridden through the environment.
    pub fn resolved_executable(&self) -> String {
        std::env::var(PRIMER3_ENV_BIN)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| self.executable.clone())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub endpoints: ServiceEndpoints,
    pub retry: RetryPolicy,
    pub cross_check: CrossCheckSettings,
    pub species_table: Option<String>,
    pub primer3: Primer3Settings,
    pub constraints: DesignConstraints,
}

impl PipelineConfig {
    pub fn from_json_file(path: &str) -> DesignResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            DesignError::new(
                crate::error::ErrorCode::Io,
                format!("Could not read configuration '{path}': {e}"),
            )
        })?;
        serde_json::from_str(&text).map_err(|e| {
            DesignError::malformed(format!("Could not parse configuration '{path}': {e}"))
        })
    }
}
