//! Per-variable agreement: metric selection by kind, pairwise and all-rater
//! scopes, report summary, and disagreement listings.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::config::AgreementConfig;
use crate::error::ReconError;
use crate::model::{EntityId, NormalizedRecord, RaterId, Value};
use crate::schema::{SchemaRegistry, VariableDefinition, VariableKind};
use crate::stats::{self, AlphaLevel, StatResult, UndefinedReason};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    PercentAgreement,
    UnanimityRate,
    CohenKappa,
    WeightedKappaLinear,
    GwetAc1,
    FleissKappa,
    KrippendorffAlphaNominal,
    KrippendorffAlphaOrdinal,
    KrippendorffAlphaInterval,
    Icc21,
    MeanTokenAgreement,
}

impl Metric {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PercentAgreement => "percent_agreement",
            Self::UnanimityRate => "unanimity_rate",
            Self::CohenKappa => "cohen_kappa",
            Self::WeightedKappaLinear => "weighted_kappa_linear",
            Self::GwetAc1 => "gwet_ac1",
            Self::FleissKappa => "fleiss_kappa",
            Self::KrippendorffAlphaNominal => "krippendorff_alpha_nominal",
            Self::KrippendorffAlphaOrdinal => "krippendorff_alpha_ordinal",
            Self::KrippendorffAlphaInterval => "krippendorff_alpha_interval",
            Self::Icc21 => "icc_2_1",
            Self::MeanTokenAgreement => "mean_token_agreement",
        }
    }

    /// Proportions are not chance-corrected and get no Landis & Koch label.
    pub fn is_chance_corrected(&self) -> bool {
        !matches!(
            self,
            Self::PercentAgreement | Self::UnanimityRate | Self::MeanTokenAgreement
        )
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Scope {
    /// Rater ids in sorted order.
    Pair { left: RaterId, right: RaterId },
    AllRaters,
}

impl Scope {
    pub fn pair(a: &str, b: &str) -> Self {
        let (left, right) = if a <= b { (a, b) } else { (b, a) };
        Self::Pair {
            left: left.to_string(),
            right: right.to_string(),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pair { left, right } => write!(f, "{left}~{right}"),
            Self::AllRaters => write!(f, "all"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Statistic {
    Defined(f64),
    Undefined(UndefinedReason),
}

impl Statistic {
    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Defined(v) => Some(*v),
            Self::Undefined(_) => None,
        }
    }

    pub fn is_degenerate(&self) -> bool {
        matches!(self, Self::Undefined(UndefinedReason::InsufficientVariance))
    }
}

impl From<StatResult> for Statistic {
    fn from(result: StatResult) -> Self {
        match result {
            Ok(v) => Self::Defined(v),
            Err(reason) => Self::Undefined(reason),
        }
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Defined(v) => write!(f, "{v:.4}"),
            Self::Undefined(reason) => write!(f, "undefined ({reason})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgreementResult {
    pub variable: String,
    pub metric: Metric,
    pub scope: Scope,
    pub statistic: Statistic,
    /// Entities where at least two raters in scope coded the variable.
    pub n_entities: usize,
    /// Entities coded by exactly one rater in scope.
    pub n_excluded: usize,
    /// The headline statistic for this (variable, scope).
    pub primary: bool,
}

impl AgreementResult {
    pub fn interpretation(&self) -> Option<&'static str> {
        if !self.metric.is_chance_corrected() {
            return None;
        }
        self.statistic.value().map(stats::interpret)
    }
}

// ---------------------------------------------------------------------------
// Matrix
// ---------------------------------------------------------------------------

/// Values of one variable: entity -> rater -> value.
struct Ratings<'a> {
    raters: Vec<&'a str>,
    by_entity: BTreeMap<&'a str, BTreeMap<&'a str, &'a Value>>,
}

impl<'a> Ratings<'a> {
    fn collect(variable: &str, records: &'a [NormalizedRecord]) -> Self {
        let mut by_entity: BTreeMap<&str, BTreeMap<&str, &Value>> = BTreeMap::new();
        let mut raters = BTreeSet::new();
        for record in records {
            if let Some(value) = record.values.get(variable) {
                raters.insert(record.rater_id.as_str());
                by_entity
                    .entry(record.entity_id.as_str())
                    .or_default()
                    .insert(record.rater_id.as_str(), value);
            }
        }
        Self {
            raters: raters.into_iter().collect(),
            by_entity,
        }
    }

    /// (entities with >= 2 coders in scope, entities with exactly 1).
    fn coverage(&self, scope: &[&str]) -> (usize, usize) {
        let mut included = 0;
        let mut excluded = 0;
        for values in self.by_entity.values() {
            match scope.iter().filter(|r| values.contains_key(**r)).count() {
                0 => {}
                1 => excluded += 1,
                _ => included += 1,
            }
        }
        (included, excluded)
    }

    fn numeric_units(&self, scope: &[&str]) -> Vec<Vec<Option<f64>>> {
        self.by_entity
            .values()
            .map(|values| {
                scope
                    .iter()
                    .map(|r| values.get(*r).and_then(|v| v.numeric()))
                    .collect()
            })
            .collect()
    }

    /// One presence matrix per token seen in scope.
    fn token_units(&self, scope: &[&str]) -> Vec<Vec<Vec<Option<f64>>>> {
        let mut tokens = BTreeSet::new();
        for values in self.by_entity.values() {
            for rater in scope {
                if let Some(Value::List(set)) = values.get(*rater) {
                    tokens.extend(set.iter().map(String::as_str));
                }
            }
        }
        tokens
            .into_iter()
            .map(|token| {
                self.by_entity
                    .values()
                    .map(|values| {
                        scope
                            .iter()
                            .map(|r| match values.get(*r) {
                                Some(Value::List(set)) => {
                                    Some(if set.contains(token) { 1.0 } else { 0.0 })
                                }
                                _ => None,
                            })
                            .collect()
                    })
                    .collect()
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Metric selection
// ---------------------------------------------------------------------------

fn mean_token_agreement(matrices: &[Vec<Vec<Option<f64>>>]) -> StatResult {
    let values: Vec<f64> = matrices
        .iter()
        .filter_map(|units| stats::percent_agreement(units).ok())
        .collect();
    if values.is_empty() {
        return Err(UndefinedReason::InsufficientSubjects);
    }
    Ok(values.iter().sum::<f64>() / values.len() as f64)
}

/// Binary base rate outside `[t, 1 - t]`.
fn is_skewed(units: &[Vec<Option<f64>>], threshold: f64) -> bool {
    let coded: Vec<f64> = units.iter().flatten().flatten().copied().collect();
    if coded.is_empty() {
        return false;
    }
    let rate = coded.iter().sum::<f64>() / coded.len() as f64;
    rate < threshold || rate > 1.0 - threshold
}

fn metrics_for(
    def: &VariableDefinition,
    ratings: &Ratings<'_>,
    scope: &[&str],
    settings: &AgreementConfig,
) -> Vec<(Metric, StatResult, bool)> {
    let pair = scope.len() == 2;
    let units = ratings.numeric_units(scope);

    let mut out = vec![(
        Metric::PercentAgreement,
        stats::percent_agreement(&units),
        false,
    )];
    if !pair && !matches!(def.kind, VariableKind::List { .. }) {
        out.push((Metric::UnanimityRate, stats::unanimity_rate(&units), false));
    }

    match &def.kind {
        VariableKind::Binary => {
            let skewed = is_skewed(&units, settings.skew_threshold);
            if pair {
                out.push((Metric::CohenKappa, stats::cohen_kappa(&units), !skewed));
            } else {
                out.push((Metric::FleissKappa, stats::fleiss_kappa(&units), !skewed));
            }
            out.push((Metric::GwetAc1, stats::gwet_ac1(&units, 2), skewed));
            out.push((
                Metric::KrippendorffAlphaNominal,
                stats::krippendorff_alpha(&units, AlphaLevel::Nominal),
                false,
            ));
        }
        VariableKind::Ordinal { levels } => {
            if pair {
                out.push((
                    Metric::WeightedKappaLinear,
                    stats::weighted_kappa_linear(&units, levels.len()),
                    true,
                ));
            }
            out.push((
                Metric::KrippendorffAlphaOrdinal,
                stats::krippendorff_alpha(&units, AlphaLevel::Ordinal),
                !pair,
            ));
            out.push((
                Metric::GwetAc1,
                stats::gwet_ac1(&units, levels.len()),
                false,
            ));
        }
        VariableKind::Count => {
            out.push((
                Metric::Icc21,
                stats::icc_2_1(&units, settings.min_icc_subjects),
                true,
            ));
            out.push((
                Metric::KrippendorffAlphaInterval,
                stats::krippendorff_alpha(&units, AlphaLevel::Interval),
                false,
            ));
        }
        VariableKind::List { .. } => {
            // Presence-based percent agreement replaces the value-level one.
            out.clear();
            out.push((
                Metric::MeanTokenAgreement,
                mean_token_agreement(&ratings.token_units(scope)),
                true,
            ));
        }
        VariableKind::FreeText => out.clear(),
    }
    out
}

/// Agreement results for one variable, ordered by (scope, metric).
///
/// Pairwise scopes cover every pair of raters that coded the variable; the
/// all-raters scope is added when three or more raters did. Derived and
/// free-text variables yield no results.
pub fn compute_agreement(
    registry: &SchemaRegistry,
    variable: &str,
    records: &[NormalizedRecord],
    settings: &AgreementConfig,
) -> Result<Vec<AgreementResult>, ReconError> {
    let def = registry.lookup(variable)?;
    if !def.is_measured() {
        debug!(variable, "not measured for agreement");
        return Ok(Vec::new());
    }

    let ratings = Ratings::collect(variable, records);
    let mut scopes: Vec<(Scope, Vec<&str>)> = Vec::new();
    for (i, a) in ratings.raters.iter().enumerate() {
        for b in &ratings.raters[i + 1..] {
            scopes.push((Scope::pair(a, b), vec![*a, *b]));
        }
    }
    if ratings.raters.len() >= 3 {
        scopes.push((Scope::AllRaters, ratings.raters.clone()));
    }

    if scopes.is_empty() {
        let (_, excluded) = ratings.coverage(&ratings.raters);
        return Ok(vec![AgreementResult {
            variable: variable.to_string(),
            metric: Metric::PercentAgreement,
            scope: Scope::AllRaters,
            statistic: Statistic::Undefined(UndefinedReason::InsufficientRaters),
            n_entities: 0,
            n_excluded: excluded,
            primary: true,
        }]);
    }

    let mut results = Vec::new();
    for (scope, raters) in scopes {
        let (n_entities, n_excluded) = ratings.coverage(&raters);
        for (metric, stat, primary) in metrics_for(def, &ratings, &raters, settings) {
            debug!(variable, %scope, %metric, "agreement computed");
            results.push(AgreementResult {
                variable: variable.to_string(),
                metric,
                scope: scope.clone(),
                statistic: stat.into(),
                n_entities,
                n_excluded,
                primary,
            });
        }
    }
    results.sort_by(|a, b| (&a.scope, a.metric).cmp(&(&b.scope, b.metric)));
    Ok(results)
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Mean of one metric across variables within a scope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricMean {
    pub scope: Scope,
    pub metric: Metric,
    pub mean: f64,
    pub n_variables: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interpretation: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LowAgreement {
    pub variable: String,
    pub scope: Scope,
    pub agreement: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Disagreement {
    pub variable: String,
    pub entity_id: EntityId,
    pub left_rater: RaterId,
    pub left_value: String,
    pub right_rater: RaterId,
    pub right_value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AgreementSummary {
    pub means: Vec<MetricMean>,
    pub low_agreement: Vec<LowAgreement>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AgreementReport {
    pub results: Vec<AgreementResult>,
    pub summary: AgreementSummary,
    pub disagreements: Vec<Disagreement>,
}

fn disagreements_for(variable: &str, records: &[NormalizedRecord]) -> Vec<Disagreement> {
    let ratings = Ratings::collect(variable, records);
    let mut out = Vec::new();
    for (entity, values) in &ratings.by_entity {
        let coded: Vec<_> = values.iter().collect();
        for (i, (left_rater, left)) in coded.iter().enumerate() {
            for (right_rater, right) in &coded[i + 1..] {
                if left != right {
                    out.push(Disagreement {
                        variable: variable.to_string(),
                        entity_id: entity.to_string(),
                        left_rater: left_rater.to_string(),
                        left_value: left.render(),
                        right_rater: right_rater.to_string(),
                        right_value: right.render(),
                    });
                }
            }
        }
    }
    out
}

fn summarize(results: &[AgreementResult], settings: &AgreementConfig) -> AgreementSummary {
    let mut buckets: BTreeMap<(Scope, Metric), Vec<f64>> = BTreeMap::new();
    let mut low_agreement = Vec::new();
    for result in results {
        let Some(value) = result.statistic.value() else {
            continue;
        };
        buckets
            .entry((result.scope.clone(), result.metric))
            .or_default()
            .push(value);
        let raw = matches!(
            result.metric,
            Metric::PercentAgreement | Metric::MeanTokenAgreement
        );
        if raw && value < settings.low_agreement_threshold {
            low_agreement.push(LowAgreement {
                variable: result.variable.clone(),
                scope: result.scope.clone(),
                agreement: value,
            });
        }
    }

    let means = buckets
        .into_iter()
        .map(|((scope, metric), values)| {
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            MetricMean {
                interpretation: metric.is_chance_corrected().then(|| stats::interpret(mean)),
                scope,
                metric,
                mean,
                n_variables: values.len(),
            }
        })
        .collect();

    AgreementSummary {
        means,
        low_agreement,
    }
}

/// Agreement over every measured variable, computed in parallel and
/// returned in (declaration order, scope, metric) order.
pub fn build_report(
    registry: &SchemaRegistry,
    records: &[NormalizedRecord],
    settings: &AgreementConfig,
) -> Result<AgreementReport, ReconError> {
    let measured: Vec<&VariableDefinition> =
        registry.variables().filter(|v| v.is_measured()).collect();

    let per_variable: Vec<(Vec<AgreementResult>, Vec<Disagreement>)> = measured
        .par_iter()
        .map(|def| {
            let results = compute_agreement(registry, &def.name, records, settings)?;
            let disagreements = match def.kind {
                VariableKind::List { .. } => Vec::new(),
                _ => disagreements_for(&def.name, records),
            };
            Ok((results, disagreements))
        })
        .collect::<Result<_, ReconError>>()?;

    let mut results = Vec::new();
    let mut disagreements = Vec::new();
    for (r, d) in per_variable {
        results.extend(r);
        disagreements.extend(d);
    }
    let summary = summarize(&results, settings);
    Ok(AgreementReport {
        results,
        summary,
        disagreements,
    })
}
