//! Combinatorial primer search over exon-pair regions.
//!
//! Every sweep visits the exon-pair regions in order and asks the oracle for
//! one more pair per region than the previous sweep did. New pairs are
//! accepted until the requested count is reached, or until two consecutive
//! sweeps add nothing.

use crate::config::{DesignConstraints, ValidationMode};
use crate::error::DesignResult;
use crate::exons::ExonLayout;
use crate::oracle::{OkRegion, OracleOligo, OraclePair, OracleRequest, PrimerDesignOracle};
use crate::thermo;
use labprimer_protocol::{PrimerCandidate, PrimerPair, Span, StopReason, Strand, ValidationReport};
use std::collections::HashSet;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Regions whose longest possible product is shorter are not searched.
pub const MIN_REGION_PRODUCT: usize = 40;
pub const MAX_NO_PROGRESS: usize = 2;
/// Gene windows at least this long skip thermodynamic template alignment.
pub const TEMPLATE_ALIGNMENT_WINDOW_LIMIT: usize = 10_000;

/// In-silico PCR check applied to candidates while they are produced.
pub trait PairValidator: Send + Sync {
    fn validate(&self, pair: &PrimerPair, species: &str, max_product_size: usize)
    -> ValidationReport;
}

pub fn passes_only_validated(mode: ValidationMode, report: &ValidationReport) -> bool {
    match mode {
        ValidationMode::Off => true,
        ValidationMode::Relative => report.relative.passes_filter(),
        ValidationMode::Absolute => report.absolute.passes_filter(),
        ValidationMode::Both => report.relative.passes_filter() && report.absolute.passes_filter(),
    }
}

#[derive(Debug, Clone)]
pub struct SearchRequest<'a> {
    pub variant: &'a str,
    pub gene_name: &'a str,
    pub species: &'a str,
    /// Spliced template.
    pub template: &'a str,
    pub layout: &'a ExonLayout,
    /// Length of the fetched gene window, introns included.
    pub window_len: usize,
    pub constraints: &'a DesignConstraints,
    pub deadline: Option<Instant>,
}

#[derive(Debug, Clone, Copy)]
pub enum SearchProgress<'a> {
    SweepStarted {
        round: usize,
        num_return: usize,
    },
    RegionQueued {
        first_exon: usize,
        second_exon: usize,
    },
    PairAccepted {
        pair: &'a PrimerPair,
        found: usize,
        requested: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    pub pairs: Vec<PrimerPair>,
    pub rounds: usize,
    pub stop: StopReason,
    pub rejected_by_validation: usize,
}

#[derive(Clone)]
pub struct PrimerSearchEngine {
    oracle: Arc<dyn PrimerDesignOracle>,
    validator: Option<Arc<dyn PairValidator>>,
}

impl PrimerSearchEngine {
    pub fn new(oracle: Arc<dyn PrimerDesignOracle>) -> Self {
        Self {
            oracle,
            validator: None,
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn PairValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Runs the sweep loop for one transcript.
    ///
    /// An oracle error aborts the search; a region without usable pairs
    /// does not.
    pub fn design_primers(
        &self,
        request: &SearchRequest<'_>,
        on_progress: &mut dyn FnMut(SearchProgress<'_>) -> ControlFlow<()>,
    ) -> DesignResult<SearchOutcome> {
        let constraints = request.constraints.repaired();
        let requested = constraints.num_return;
        let validate = constraints.validation_requested();
        let template_alignment = constraints.thermodynamic_template_alignment
            && request.window_len < TEMPLATE_ALIGNMENT_WINDOW_LIMIT;
        let label = format!("{} {}", request.variant, request.gene_name);

        let regions: Vec<(usize, usize, OkRegion)> = request
            .layout
            .exon_pairs(constraints.reverse_exon_order)
            .into_iter()
            .filter_map(|(i, j)| {
                let region = OkRegion::from_exon_pair(request.layout, i, j)?;
                (region.product_len() >= MIN_REGION_PRODUCT).then_some((i, j, region))
            })
            .collect();
        debug!(
            "{label}: {} searchable region(s) over {} exon(s)",
            regions.len(),
            request.layout.exon_count()
        );

        let mut pairs: Vec<PrimerPair> = vec![];
        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut rejected: HashSet<(String, String)> = HashSet::new();
        let mut num_return = 1;
        let mut no_progress = 0;
        let mut rounds = 0;

        let stop = 'search: loop {
            if pairs.len() >= requested {
                break StopReason::Satisfied;
            }
            num_return += 1;
            rounds += 1;
            if on_progress(SearchProgress::SweepStarted {
                round: rounds,
                num_return,
            })
            .is_break()
            {
                break StopReason::Cancelled;
            }

            let mut progressed = false;
            for &(first_exon, second_exon, ok_region) in &regions {
                if pairs.len() >= requested {
                    break;
                }
                if request.deadline.is_some_and(|d| Instant::now() >= d) {
                    break 'search StopReason::DeadlineReached;
                }
                if on_progress(SearchProgress::RegionQueued {
                    first_exon,
                    second_exon,
                })
                .is_break()
                {
                    break 'search StopReason::Cancelled;
                }

                let record = self.oracle.design(&OracleRequest {
                    sequence_id: &label,
                    template: request.template,
                    ok_region,
                    num_return,
                    constraints: &constraints,
                    template_alignment,
                })?;

                for candidate in record.pairs() {
                    if pairs.len() >= requested {
                        break;
                    }
                    let key = (
                        candidate.left.sequence.clone(),
                        candidate.right.sequence.clone(),
                    );
                    if seen.contains(&key) || rejected.contains(&key) {
                        continue;
                    }
                    let Some(mut pair) = build_pair(request, &constraints, &label, &candidate)
                    else {
                        debug!("{label}: oracle pair {key:?} lies outside the template");
                        continue;
                    };
                    if validate {
                        pair.validation = match &self.validator {
                            Some(validator) => validator.validate(
                                &pair,
                                request.species,
                                constraints.product_size_range.max,
                            ),
                            None => ValidationReport::default(),
                        };
                        if !passes_only_validated(constraints.only_validated, &pair.validation) {
                            debug!(
                                "{label}: skipped {} / {} ({:?}, {:?})",
                                key.0, key.1, pair.validation.relative, pair.validation.absolute
                            );
                            rejected.insert(key);
                            continue;
                        }
                    }
                    info!(
                        "{label}: accepted {} / {} ({} bp)",
                        pair.left.sequence, pair.right.sequence, pair.amplicon_size
                    );
                    seen.insert(key);
                    pairs.push(pair);
                    progressed = true;
                    let last = pairs.len() - 1;
                    if on_progress(SearchProgress::PairAccepted {
                        pair: &pairs[last],
                        found: pairs.len(),
                        requested,
                    })
                    .is_break()
                    {
                        break 'search StopReason::Cancelled;
                    }
                }
            }

            if progressed {
                no_progress = 0;
            } else {
                no_progress += 1;
            }
            if no_progress >= MAX_NO_PROGRESS && pairs.len() < requested {
                break StopReason::Exhausted;
            }
        };

        if stop == StopReason::Exhausted {
            warn!(
                "{label}: no new primers after {MAX_NO_PROGRESS} sweeps, returning {} of {requested}",
                pairs.len()
            );
        }
        Ok(SearchOutcome {
            pairs,
            rounds,
            stop,
            rejected_by_validation: rejected.len(),
        })
    }
}

/// Ascending half-open absolute range of spliced `[start, end)`.
fn absolute_span(layout: &ExonLayout, start: usize, end: usize) -> Option<Span> {
    let a = layout.spliced_to_absolute(start)?;
    let b = layout.spliced_to_absolute(end.checked_sub(1)?)?;
    Some(Span::new(a.min(b), a.max(b) + 1))
}

fn candidate(
    oligo: &OracleOligo,
    position: Span,
    position_abs: Span,
    template_strand: Strand,
    spans_exon_junction: bool,
) -> PrimerCandidate {
    PrimerCandidate {
        sequence: oligo.sequence.clone(),
        length: oligo.sequence.len(),
        position,
        position_abs,
        tm: oligo.tm,
        gc_percent: oligo.gc_percent,
        self_complementarity: oligo.self_any_th,
        self_3prime_complementarity: oligo.self_end_th,
        template_strand,
        spans_exon_junction,
    }
}

fn build_pair(
    request: &SearchRequest<'_>,
    constraints: &DesignConstraints,
    label: &str,
    oracle_pair: &OraclePair,
) -> Option<PrimerPair> {
    let layout = request.layout;
    let left = oracle_pair.left.position;
    let right = oracle_pair.right.position;
    let left_end = left + oracle_pair.left.length;
    let right_start = (right + 1).checked_sub(oracle_pair.right.length)?;
    if right < left || right >= request.template.len() || left_end > request.template.len() {
        return None;
    }

    let left_abs = layout.spliced_to_absolute(left)?;
    let right_abs = layout.spliced_to_absolute(right)?;
    let amplicon_seq = request.template.get(left..=right)?.to_string();
    let amplicon_tm = if constraints.compute_amplicon_tm {
        thermo::amplicon_tm(&amplicon_seq, &constraints.salt_conditions())
    } else {
        None
    };

    Some(PrimerPair {
        gene_name: label.to_string(),
        left: candidate(
            &oracle_pair.left,
            Span::new(left as i64, left_end as i64),
            absolute_span(layout, left, left_end)?,
            Strand::Plus,
            layout.spans_junction(left, left_end),
        ),
        right: candidate(
            &oracle_pair.right,
            Span::new(right_start as i64, right as i64 + 1),
            absolute_span(layout, right_start, right + 1)?,
            Strand::Minus,
            layout.spans_junction(right_start, right + 1),
        ),
        amplicon_size: right - left + 1,
        amplicon_size_abs: right_abs.abs_diff(left_abs) as usize + 1,
        amplicon_seq,
        amplicon_tm,
        amplicon_spans_junction: layout.spans_junction(left, right + 1),
        validation: ValidationReport::default(),
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use labprimer_protocol::Verdict;
    use rand::{Rng, SeedableRng, rngs::StdRng};
    use std::sync::Mutex;

    /// Deterministic pseudo-random ACGT sequence.
    pub fn synthetic_template(len: usize, seed: u64) -> String {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..len)
            .map(|_| b"ACGT"[rng.gen_range(0..4)] as char)
            .collect()
    }

    /// Fails every pair whose forward primer is listed, passes the rest.
    pub struct ListValidator {
        pub failing: Vec<String>,
        pub seen: Mutex<Vec<String>>,
    }

    impl ListValidator {
        pub fn new(failing: &[&str]) -> Self {
            Self {
                failing: failing.iter().map(|s| s.to_string()).collect(),
                seen: Mutex::new(vec![]),
            }
        }
    }

    impl PairValidator for ListValidator {
        fn validate(&self, pair: &PrimerPair, _: &str, _: usize) -> ValidationReport {
            self.seen.lock().unwrap().push(pair.left.sequence.clone());
            let verdict = Verdict::from_consistency(!self.failing.contains(&pair.left.sequence));
            ValidationReport {
                relative: verdict.clone(),
                absolute: verdict,
                ..Default::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::error::{DesignError, ErrorCode};
    use crate::exons::GenomicInterval;
    use crate::oracle::BoulderRecord;
    use crate::oracle::testing::{FnOracle, record_from_template};
    use std::sync::Mutex;

    fn keep_going(_: SearchProgress<'_>) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }

    fn request<'a>(
        template: &'a str,
        layout: &'a ExonLayout,
        constraints: &'a DesignConstraints,
    ) -> SearchRequest<'a> {
        SearchRequest {
            variant: "NM_000001",
            gene_name: "DEMO",
            species: "Homo sapiens",
            template,
            layout,
            window_len: layout.local_len(),
            constraints,
            deadline: None,
        }
    }

    fn constraints(num_return: usize) -> DesignConstraints {
        DesignConstraints {
            num_return,
            ..Default::default()
        }
    }

    #[test]
    fn test_single_exon_scenario_returns_requested_pairs() {
        let template = synthetic_template(700, 7);
        let layout = ExonLayout::single_exon(700);
        let tpl = template.clone();
        // One more pair becomes available with every increase of num_return.
        let oracle = Arc::new(FnOracle::new(move |req: &OracleRequest<'_>| {
            let pairs: Vec<(usize, usize)> = (0..req.num_return - 1)
                .map(|k| (10 + 30 * k, 160 + 30 * k))
                .collect();
            Ok(record_from_template(&tpl, &pairs))
        }));
        let engine = PrimerSearchEngine::new(oracle.clone());
        let c = constraints(3);
        let outcome = engine
            .design_primers(&request(&template, &layout, &c), &mut keep_going)
            .unwrap();

        assert_eq!(outcome.stop, StopReason::Satisfied);
        assert_eq!(outcome.pairs.len(), 3);
        let keys: HashSet<(&str, &str)> = outcome.pairs.iter().map(|p| p.key()).collect();
        assert_eq!(keys.len(), 3);
        for pair in &outcome.pairs {
            assert_eq!(pair.amplicon_size, 151);
            assert!(pair.amplicon_size >= c.product_size_range.min);
            assert!(pair.amplicon_size <= c.product_size_range.max);
            assert_eq!(pair.left.position_abs, pair.left.position);
            assert_eq!(pair.right.position_abs, pair.right.position);
            assert_eq!(pair.amplicon_size_abs, pair.amplicon_size);
            assert_eq!(pair.gene_name, "NM_000001 DEMO");
            assert_eq!(pair.right.template_strand, Strand::Minus);
            assert!(pair.amplicon_tm.is_some());
        }
        assert_eq!(outcome.pairs[0].left.position, Span::new(10, 30));
        assert_eq!(outcome.pairs[0].right.position, Span::new(141, 161));
        assert_eq!(outcome.pairs[0].amplicon_seq, template[10..=160]);
        let sizes: Vec<usize> = oracle.calls().iter().map(|c| c.0).collect();
        assert_eq!(sizes, vec![2, 3, 4]);
    }

    #[test]
    fn test_stalled_oracle_stops_after_two_sweeps() {
        let template = synthetic_template(300, 3);
        let layout = ExonLayout::single_exon(300);
        let oracle = Arc::new(FnOracle::new(|_: &OracleRequest<'_>| {
            Ok(BoulderRecord::default())
        }));
        let c = constraints(50);
        let outcome = PrimerSearchEngine::new(oracle.clone())
            .design_primers(&request(&template, &layout, &c), &mut keep_going)
            .unwrap();
        assert_eq!(outcome.stop, StopReason::Exhausted);
        assert!(outcome.pairs.is_empty());
        assert_eq!(outcome.rounds, 2);
        assert_eq!(oracle.calls().len(), 2);
    }

    #[test]
    fn test_repeated_pair_is_kept_once_and_search_converges() {
        let template = synthetic_template(900, 11);
        let intervals = [
            GenomicInterval::new(0, 299),
            GenomicInterval::new(1000, 1299),
            GenomicInterval::new(2000, 2299),
        ];
        let layout = ExonLayout::from_intervals(&intervals, Strand::Plus);
        let tpl = template.clone();
        let oracle = Arc::new(FnOracle::new(move |_: &OracleRequest<'_>| {
            Ok(record_from_template(&tpl, &[(250, 400)]))
        }));
        let c = constraints(5);
        let outcome = PrimerSearchEngine::new(oracle.clone())
            .design_primers(&request(&template, &layout, &c), &mut keep_going)
            .unwrap();
        assert_eq!(outcome.pairs.len(), 1);
        assert_eq!(outcome.stop, StopReason::Exhausted);
        assert_eq!(outcome.rounds, 3);
        // Three exon pairs per sweep.
        assert_eq!(oracle.calls().len(), 9);
        assert!(outcome.pairs[0].amplicon_spans_junction);
        assert!(!outcome.pairs[0].left.spans_exon_junction);
        assert_eq!(outcome.pairs[0].amplicon_size, 151);
        assert_eq!(outcome.pairs[0].amplicon_size_abs, 851);
    }

    #[test]
    fn test_regions_below_product_floor_are_skipped() {
        let template = synthetic_template(30, 5);
        let layout = ExonLayout::from_intervals(
            &[GenomicInterval::new(0, 14), GenomicInterval::new(100, 114)],
            Strand::Plus,
        );
        let oracle = Arc::new(FnOracle::new(|_: &OracleRequest<'_>| {
            Ok(BoulderRecord::default())
        }));
        let c = constraints(2);
        let outcome = PrimerSearchEngine::new(oracle.clone())
            .design_primers(&request(&template, &layout, &c), &mut keep_going)
            .unwrap();
        assert!(oracle.calls().is_empty());
        assert_eq!(outcome.stop, StopReason::Exhausted);
    }

    #[test]
    fn test_constraints_are_repaired_before_oracle_call() {
        let template = synthetic_template(300, 9);
        let layout = ExonLayout::single_exon(300);
        let seen_opt = Arc::new(Mutex::new(vec![]));
        let sink = seen_opt.clone();
        let oracle = Arc::new(FnOracle::new(move |req: &OracleRequest<'_>| {
            sink.lock().unwrap().push(req.constraints.primer_opt_size);
            Ok(BoulderRecord::default())
        }));
        let c = DesignConstraints {
            primer_min_size: 60,
            primer_opt_size: 50,
            primer_max_size: 70,
            ..constraints(1)
        };
        PrimerSearchEngine::new(oracle)
            .design_primers(&request(&template, &layout, &c), &mut keep_going)
            .unwrap();
        assert!(!seen_opt.lock().unwrap().is_empty());
        assert!(seen_opt.lock().unwrap().iter().all(|&opt| opt == 65));
    }

    #[test]
    fn test_only_validated_drops_failures_without_revalidating() {
        let template = synthetic_template(700, 21);
        let layout = ExonLayout::single_exon(700);
        let tpl = template.clone();
        let oracle = Arc::new(FnOracle::new(move |req: &OracleRequest<'_>| {
            let pairs: Vec<(usize, usize)> = (0..req.num_return.min(3))
                .map(|k| (20 + 40 * k, 200 + 40 * k))
                .collect();
            Ok(record_from_template(&tpl, &pairs))
        }));
        let failing = template[20..40].to_string();
        let validator = Arc::new(ListValidator::new(&[failing.as_str()]));
        let c = DesignConstraints {
            only_validated: ValidationMode::Relative,
            ..constraints(2)
        };
        let outcome = PrimerSearchEngine::new(oracle)
            .with_validator(validator.clone())
            .design_primers(&request(&template, &layout, &c), &mut keep_going)
            .unwrap();
        assert_eq!(outcome.pairs.len(), 2);
        assert!(outcome.pairs.iter().all(|p| p.left.sequence != failing));
        assert_eq!(outcome.rejected_by_validation, 1);
        let checks = validator.seen.lock().unwrap();
        assert_eq!(checks.iter().filter(|s| **s == failing).count(), 1);
    }

    #[test]
    fn test_missing_verdict_is_dropped_when_filtering() {
        let template = synthetic_template(400, 2);
        let layout = ExonLayout::single_exon(400);
        let tpl = template.clone();
        let oracle = Arc::new(FnOracle::new(move |_: &OracleRequest<'_>| {
            Ok(record_from_template(&tpl, &[(0, 150)]))
        }));
        let c = DesignConstraints {
            only_validated: ValidationMode::Both,
            ..constraints(1)
        };
        let outcome = PrimerSearchEngine::new(oracle)
            .design_primers(&request(&template, &layout, &c), &mut keep_going)
            .unwrap();
        assert!(outcome.pairs.is_empty());
        assert_eq!(outcome.stop, StopReason::Exhausted);
    }

    #[test]
    fn test_oracle_error_aborts_search() {
        let template = synthetic_template(300, 4);
        let layout = ExonLayout::single_exon(300);
        let oracle = Arc::new(FnOracle::new(|_: &OracleRequest<'_>| {
            Err(DesignError::oracle("primer3 crashed"))
        }));
        let err = PrimerSearchEngine::new(oracle)
            .design_primers(&request(&template, &layout, &constraints(2)), &mut keep_going)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Oracle);
    }

    #[test]
    fn test_cancellation_and_deadline_stop_before_oracle_call() {
        let template = synthetic_template(300, 4);
        let layout = ExonLayout::single_exon(300);
        let oracle = Arc::new(FnOracle::new(|_: &OracleRequest<'_>| {
            Ok(BoulderRecord::default())
        }));
        let engine = PrimerSearchEngine::new(oracle.clone());
        let c = constraints(2);

        fn cancel_on_region(progress: SearchProgress<'_>) -> ControlFlow<()> {
            match progress {
                SearchProgress::RegionQueued { .. } => ControlFlow::Break(()),
                _ => ControlFlow::Continue(()),
            }
        }
        let outcome = engine
            .design_primers(&request(&template, &layout, &c), &mut cancel_on_region)
            .unwrap();
        assert_eq!(outcome.stop, StopReason::Cancelled);

        let mut req = request(&template, &layout, &c);
        req.deadline = Some(Instant::now());
        let outcome = engine.design_primers(&req, &mut keep_going).unwrap();
        assert_eq!(outcome.stop, StopReason::DeadlineReached);
        assert!(oracle.calls().is_empty());
    }

    #[test]
    fn test_long_gene_window_disables_template_alignment() {
        let template = synthetic_template(300, 4);
        let layout = ExonLayout::single_exon(300);
        let oracle = Arc::new(FnOracle::new(|_: &OracleRequest<'_>| {
            Ok(BoulderRecord::default())
        }));
        let c = constraints(1);
        let mut req = request(&template, &layout, &c);
        req.window_len = 10_000;
        PrimerSearchEngine::new(oracle.clone())
            .design_primers(&req, &mut keep_going)
            .unwrap();
        assert!(oracle.calls().iter().all(|(_, _, alignment)| !alignment));
    }

    #[test]
    fn test_minus_strand_positions_map_to_chromosome() {
        let template = synthetic_template(200, 8);
        let layout = ExonLayout::from_intervals(
            &[GenomicInterval::new(900, 999), GenomicInterval::new(600, 699)],
            Strand::Minus,
        );
        let tpl = template.clone();
        let oracle = Arc::new(FnOracle::new(move |_: &OracleRequest<'_>| {
            Ok(record_from_template(&tpl, &[(90, 180)]))
        }));
        let outcome = PrimerSearchEngine::new(oracle)
            .design_primers(&request(&template, &layout, &constraints(1)), &mut keep_going)
            .unwrap();
        let pair = &outcome.pairs[0];
        assert!(pair.left.spans_exon_junction);
        assert_eq!(pair.left.position_abs, Span::new(690, 910));
        assert_eq!(pair.right.position, Span::new(161, 181));
        assert_eq!(pair.right.position_abs, Span::new(619, 639));
        assert_eq!(pair.amplicon_size, 91);
        assert_eq!(pair.amplicon_size_abs, 291);
    }
}
