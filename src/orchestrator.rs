//! Batch driver: resolve each target, then search primers per transcript.
//!
//! Failures are contained per target; a bad identifier never stops the
//! batch.

use crate::config::{DesignConstraints, PipelineConfig};
use crate::error::{DesignError, DesignResult, ErrorCode};
use crate::exons::ExonLayout;
use crate::fasta_input::SequenceTarget;
use crate::http::{HttpTransport, RetryingClient};
use crate::ncbi::{GeneTarget, SequenceRepository, TranscriptVariant};
use crate::oracle::PrimerDesignOracle;
use crate::search::{PrimerSearchEngine, SearchProgress, SearchRequest};
use crate::validation::ValidationService;
use labprimer_protocol::{PrimerPair, PrimerRow, StopReason, TargetStatus};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DesignTarget {
    Gene(GeneTarget),
    Sequence(SequenceTarget),
}

impl DesignTarget {
    pub fn name(&self) -> String {
        match self {
            Self::Gene(gene) => gene.identifier.clone(),
            Self::Sequence(seq) => seq.label(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum BatchEvent<'a> {
    TargetStarted {
        index: usize,
        name: &'a str,
    },
    VariantStarted {
        index: usize,
        label: &'a str,
    },
    PairFound {
        index: usize,
        label: &'a str,
        pair: &'a PrimerPair,
        found: usize,
        requested: usize,
    },
    TargetFinished {
        index: usize,
        report: &'a TargetReport,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantReport {
    pub label: String,
    pub accession: String,
    pub gene_name: String,
    pub species: String,
    pub pairs: Vec<PrimerPair>,
    pub stop: StopReason,
    pub rounds: usize,
    pub rejected_by_validation: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetReport {
    pub target: String,
    pub status: TargetStatus,
    pub variants: Vec<VariantReport>,
}

impl TargetReport {
    fn failed(target: String, err: &DesignError, variants: Vec<VariantReport>) -> Self {
        Self {
            target,
            status: TargetStatus::Failed {
                code: err.code.label().to_string(),
                reason: err.message.clone(),
            },
            variants,
        }
    }

    pub fn pair_count(&self) -> usize {
        self.variants.iter().map(|v| v.pairs.len()).sum()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(&self.status, TargetStatus::Failed { code, .. } if code == ErrorCode::Cancelled.label())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub targets: Vec<TargetReport>,
}

impl BatchReport {
    /// Export rows, numbered per variant.
    pub fn rows(&self) -> Vec<PrimerRow> {
        self.targets
            .iter()
            .flat_map(|t| t.variants.iter())
            .flat_map(|v| {
                v.pairs
                    .iter()
                    .enumerate()
                    .map(|(i, pair)| PrimerRow::from_pair(&v.label, i, pair))
            })
            .collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = &TargetReport> {
        self.targets.iter().filter(|t| t.status.is_failure())
    }
}

/// A transcript ready for the search engine.
struct DesignUnit {
    variant: String,
    gene_name: String,
    species: String,
    accession: String,
    template: String,
    layout: ExonLayout,
    window_len: usize,
}

impl DesignUnit {
    fn from_variant(variant: &TranscriptVariant) -> DesignResult<Self> {
        Ok(Self {
            variant: variant.accession.clone(),
            gene_name: variant.gene_name.clone(),
            species: variant.species.clone(),
            accession: variant.accession.clone(),
            template: variant.template()?,
            layout: variant.layout.clone(),
            window_len: variant.sequence.len(),
        })
    }

    fn from_sequence(target: &SequenceTarget) -> Self {
        Self {
            variant: target.id.clone(),
            gene_name: target.name.clone(),
            species: target.species.clone(),
            accession: target.id.clone(),
            template: target.sequence.clone(),
            layout: ExonLayout::single_exon(target.sequence.len()),
            window_len: target.sequence.len(),
        }
    }

    fn label(&self) -> String {
        format!("{} {}", self.variant, self.gene_name)
    }
}

pub struct PrimerDesignOrchestrator {
    repository: SequenceRepository,
    engine: PrimerSearchEngine,
    constraints: DesignConstraints,
    target_timeout: Option<Duration>,
}

impl PrimerDesignOrchestrator {
    pub fn new(
        repository: SequenceRepository,
        engine: PrimerSearchEngine,
        constraints: DesignConstraints,
    ) -> Self {
        Self {
            repository,
            engine,
            constraints,
            target_timeout: None,
        }
    }

    /// Wires repository, oracle and, if requested by the constraints, the
    /// validation service.
    pub fn from_config(
        config: &PipelineConfig,
        transport: Arc<dyn HttpTransport>,
        oracle: Arc<dyn PrimerDesignOracle>,
    ) -> DesignResult<Self> {
        let client = RetryingClient::new(transport.clone(), config.retry.clone());
        let repository = SequenceRepository::new(client, config.endpoints.clone());
        let mut engine = PrimerSearchEngine::new(oracle);
        if config.constraints.validation_requested() {
            engine = engine.with_validator(Arc::new(ValidationService::from_config(
                transport, config,
            )?));
        }
        Ok(Self::new(repository, engine, config.constraints.clone()))
    }

    /// Per-target time limit for the primer search.
    pub fn with_target_timeout(mut self, timeout: Duration) -> Self {
        self.target_timeout = Some(timeout);
        self
    }

    pub fn constraints(&self) -> &DesignConstraints {
        &self.constraints
    }

    fn design_units(&self, target: &DesignTarget) -> DesignResult<Vec<DesignUnit>> {
        match target {
            DesignTarget::Gene(gene) => {
                let mut gene = gene.clone();
                let variants = self.repository.find_sequences(&mut gene)?;
                if variants.is_empty() {
                    return Err(DesignError::not_found(format!(
                        "No transcript variant found for {}",
                        gene.identifier
                    )));
                }
                variants.iter().map(DesignUnit::from_variant).collect()
            }
            DesignTarget::Sequence(seq) => {
                if seq.sequence.is_empty() {
                    return Err(DesignError::invalid_input(format!(
                        "Sequence {} is empty",
                        seq.label()
                    )));
                }
                Ok(vec![DesignUnit::from_sequence(seq)])
            }
        }
    }

    /// Runs one target; every failure ends up in the report status. The
    /// returned flow is the callback's answer to `TargetFinished`.
    pub fn design_target(
        &self,
        index: usize,
        target: &DesignTarget,
        on_event: &mut dyn FnMut(BatchEvent<'_>) -> ControlFlow<()>,
    ) -> (TargetReport, ControlFlow<()>) {
        let name = target.name();
        let report = self.run_target(index, &name, target, on_event);
        match &report.status {
            TargetStatus::Failed { reason, .. } => warn!("{name}: {reason}"),
            TargetStatus::Exhausted { found, requested } => {
                warn!("{name}: only {found} of {requested} primer pair(s) found")
            }
            TargetStatus::Completed => info!("{name}: {} primer pair(s)", report.pair_count()),
        }
        let flow = on_event(BatchEvent::TargetFinished {
            index,
            report: &report,
        });
        (report, flow)
    }

    fn run_target(
        &self,
        index: usize,
        name: &str,
        target: &DesignTarget,
        on_event: &mut dyn FnMut(BatchEvent<'_>) -> ControlFlow<()>,
    ) -> TargetReport {
        if on_event(BatchEvent::TargetStarted { index, name }).is_break() {
            return TargetReport::failed(name.to_string(), &cancelled(), vec![]);
        }
        let units = match self.design_units(target) {
            Ok(units) => units,
            Err(err) => return TargetReport::failed(name.to_string(), &err, vec![]),
        };
        let deadline = self.target_timeout.map(|t| Instant::now() + t);
        let requested = self.constraints.num_return;

        let mut variants = vec![];
        for unit in &units {
            let label = unit.label();
            if on_event(BatchEvent::VariantStarted {
                index,
                label: &label,
            })
            .is_break()
            {
                return TargetReport::failed(name.to_string(), &cancelled(), variants);
            }
            debug!(
                "{label}: {} nt template, {} exon(s)",
                unit.template.len(),
                unit.layout.exon_count()
            );
            let request = SearchRequest {
                variant: &unit.variant,
                gene_name: &unit.gene_name,
                species: &unit.species,
                template: &unit.template,
                layout: &unit.layout,
                window_len: unit.window_len,
                constraints: &self.constraints,
                deadline,
            };
            let outcome = self.engine.design_primers(&request, &mut |progress| match progress {
                SearchProgress::PairAccepted {
                    pair,
                    found,
                    requested,
                } => on_event(BatchEvent::PairFound {
                    index,
                    label: &label,
                    pair,
                    found,
                    requested,
                }),
                _ => ControlFlow::Continue(()),
            });
            let outcome = match outcome {
                Ok(outcome) => outcome,
                Err(err) => return TargetReport::failed(name.to_string(), &err, variants),
            };
            if outcome.rejected_by_validation > 0 {
                info!(
                    "{label}: {} candidate(s) rejected by in-silico PCR",
                    outcome.rejected_by_validation
                );
            }
            let stop = outcome.stop;
            variants.push(VariantReport {
                label,
                accession: unit.accession.clone(),
                gene_name: unit.gene_name.clone(),
                species: unit.species.clone(),
                pairs: outcome.pairs,
                stop,
                rounds: outcome.rounds,
                rejected_by_validation: outcome.rejected_by_validation,
            });
            if stop == StopReason::Cancelled {
                return TargetReport::failed(name.to_string(), &cancelled(), variants);
            }
        }

        let found: usize = variants.iter().map(|v| v.pairs.len()).sum();
        let status = if variants.iter().all(|v| v.pairs.len() >= requested) {
            TargetStatus::Completed
        } else {
            TargetStatus::Exhausted {
                found,
                requested: requested * variants.len(),
            }
        };
        TargetReport {
            target: name.to_string(),
            status,
            variants,
        }
    }

    /// Processes targets one after another in input order. A callback
    /// returning `Break` cancels the current target and skips the rest;
    /// on `TargetFinished` it keeps the finished target and skips the rest.
    pub fn run_batch(
        &self,
        targets: &[DesignTarget],
        on_event: &mut dyn FnMut(BatchEvent<'_>) -> ControlFlow<()>,
    ) -> BatchReport {
        let mut report = BatchReport::default();
        for (index, target) in targets.iter().enumerate() {
            let (target_report, flow) = self.design_target(index, target, on_event);
            let stop = flow.is_break() || target_report.is_cancelled();
            report.targets.push(target_report);
            if stop {
                warn!(
                    "batch cancelled after {} of {} target(s)",
                    index + 1,
                    targets.len()
                );
                break;
            }
        }
        report
    }

    /// Processes targets on the rayon pool; reports keep input order.
    pub fn run_batch_parallel(&self, targets: &[DesignTarget]) -> BatchReport {
        let targets = targets
            .par_iter()
            .enumerate()
            .map(|(index, target)| {
                self.design_target(index, target, &mut |_| ControlFlow::Continue(()))
                    .0
            })
            .collect();
        BatchReport { targets }
    }
}

fn cancelled() -> DesignError {
    DesignError::new(ErrorCode::Cancelled, "Cancelled by caller")
}
