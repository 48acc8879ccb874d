use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::aggregate::{AggregateReport, FieldTally};
use crate::taxonomy::{FieldKind, Tier};

pub const DEFAULT_TIER1_GATE: f64 = 90.0;
pub const DEFAULT_TIER2_GATE: f64 = 80.0;
pub const DEFAULT_TOP_N: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatePolicy {
    pub tier1_min: f64,
    pub tier2_min: f64,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            tier1_min: DEFAULT_TIER1_GATE,
            tier2_min: DEFAULT_TIER2_GATE,
        }
    }
}

impl GatePolicy {
    pub fn decide(&self, tier1_rate: f64, tier2_rate: f64) -> GateDecision {
        let tier1_pass = tier1_rate >= self.tier1_min;
        let tier2_pass = tier2_rate >= self.tier2_min;
        let verdict = match (tier1_pass, tier2_pass) {
            (false, _) => Verdict::NotReady,
            (true, false) => Verdict::Tier2NeedsWork,
            (true, true) => Verdict::Ready,
        };

        GateDecision {
            tier1_rate,
            tier2_rate,
            tier1_min: self.tier1_min,
            tier2_min: self.tier2_min,
            tier1_pass,
            tier2_pass,
            verdict,
        }
    }

    pub fn evaluate(&self, report: &AggregateReport) -> GateDecision {
        self.decide(report.tiers.tier1.rate, report.tiers.tier2.rate)
    }

    pub fn min_for(&self, tier: Tier) -> Option<f64> {
        match tier {
            Tier::Tier1Critical => Some(self.tier1_min),
            Tier::Tier2Core => Some(self.tier2_min),
            _ => None,
        }
    }

    /// Checks every Tier1 and Tier2 field on its own against its tier's gate,
    /// in taxonomy order.
    pub fn field_gates(&self, report: &AggregateReport) -> Vec<FieldGate> {
        report
            .fields
            .iter()
            .filter_map(|tally| {
                let gate = self.min_for(tally.tier)?;
                let (metric, value) = field_metric(report, tally);
                Some(FieldGate {
                    field: tally.field.clone(),
                    tier: tally.tier,
                    metric,
                    value,
                    gate,
                    passed: value >= gate,
                })
            })
            .collect()
    }

    fn validate(&self) -> Result<()> {
        for (name, value) in [("tier1_min", self.tier1_min), ("tier2_min", self.tier2_min)] {
            if !(0.0..=100.0).contains(&value) {
                bail!("gate {name} must be within 0..=100, got {value}");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Ready,
    Tier2NeedsWork,
    NotReady,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "READY",
            Self::Tier2NeedsWork => "TIER2 IMPROVEMENTS NEEDED",
            Self::NotReady => "NOT READY",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GateDecision {
    pub tier1_rate: f64,
    pub tier2_rate: f64,
    pub tier1_min: f64,
    pub tier2_min: f64,
    pub tier1_pass: bool,
    pub tier2_pass: bool,
    pub verdict: Verdict,
}

impl GateDecision {
    pub fn ready(&self) -> bool {
        self.verdict == Verdict::Ready
    }

    pub fn headline(&self) -> String {
        match self.verdict {
            Verdict::NotReady => format!(
                "Tier 1 pass rate of {:.1}% is below the {:.1}% gate; do not promote this configuration.",
                self.tier1_rate, self.tier1_min
            ),
            Verdict::Tier2NeedsWork => format!(
                "Tier 1 passed ({:.1}%), but the Tier 2 pass rate of {:.1}% is below the {:.1}% gate.",
                self.tier1_rate, self.tier2_rate, self.tier2_min
            ),
            Verdict::Ready => format!(
                "Both gates hold (Tier 1: {:.1}%, Tier 2: {:.1}%).",
                self.tier1_rate, self.tier2_rate
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldMetric {
    Accuracy,
    F1,
    PassRate,
}

impl FieldMetric {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accuracy => "accuracy",
            Self::F1 => "F1",
            Self::PassRate => "pass rate",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldGate {
    pub field: String,
    pub tier: Tier,
    pub metric: FieldMetric,
    /// Percentage in `[0, 100]`.
    pub value: f64,
    pub gate: f64,
    pub passed: bool,
}

/// Scalar fields report accuracy and set fields report F1. Other kinds fall
/// back to the share of records that passed.
fn field_metric(report: &AggregateReport, tally: &FieldTally) -> (FieldMetric, f64) {
    let measured = match tally.kind {
        FieldKind::Scalar => report
            .confusion_for(&tally.field)
            .map(|matrix| (FieldMetric::Accuracy, matrix.accuracy)),
        FieldKind::SetOfStrings => report
            .extraction_for(&tally.field)
            .map(|table| (FieldMetric::F1, table.f1 * 100.0)),
        FieldKind::NumericTolerant | FieldKind::NestedObject => None,
    };
    measured.unwrap_or((FieldMetric::PassRate, 100.0 - tally.failure_rate))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeverityCut {
    pub above: f64,
    pub severity: Severity,
}

/// Failure-rate bands; a rate strictly above a cut takes its severity,
/// the highest matching cut wins, anything else is low.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeverityBands {
    pub cuts: Vec<SeverityCut>,
}

impl Default for SeverityBands {
    fn default() -> Self {
        Self {
            cuts: vec![
                SeverityCut {
                    above: 20.0,
                    severity: Severity::High,
                },
                SeverityCut {
                    above: 10.0,
                    severity: Severity::Medium,
                },
            ],
        }
    }
}

impl SeverityBands {
    pub fn classify(&self, failure_rate: f64) -> Severity {
        self.cuts
            .iter()
            .filter(|cut| failure_rate > cut.above)
            .max_by(|left, right| left.above.total_cmp(&right.above))
            .map(|cut| cut.severity)
            .unwrap_or(Severity::Low)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootCauseRule {
    pub field: String,
    pub threshold_pct: f64,
    pub title: String,
    pub observation: String,
    pub recommendation: String,
}

impl RootCauseRule {
    fn new(field: &str, threshold_pct: f64, title: &str, observation: &str, recommendation: &str) -> Self {
        Self {
            field: field.to_string(),
            threshold_pct,
            title: title.to_string(),
            observation: observation.to_string(),
            recommendation: recommendation.to_string(),
        }
    }
}

pub fn default_root_cause_rules() -> Vec<RootCauseRule> {
    vec![
        RootCauseRule::new(
            "bariatric_context",
            20.0,
            "Bariatric context detection",
            "Surgery context is missed when posts mention symptoms without naming the procedure, in third-person narratives, and in very short posts.",
            "Tighten the bariatric_context rules in the system prompt and add anchor phrases for implicit surgical history.",
        ),
        RootCauseRule::new(
            "relevance_label",
            15.0,
            "Relevance classification",
            "Borderline posts drift between relevant and borderline, and some off-topic posts are marked relevant.",
            "Review the relevance decision tree and state the criteria separating relevant, borderline and not_relevant.",
        ),
        RootCauseRule::new(
            "flags",
            10.0,
            "Flag detection",
            "Flags are added or dropped relative to the fixtures, including misattribution flags on legitimate reports.",
            "Clarify the criteria for each flag in the system prompt.",
        ),
        RootCauseRule::new(
            "audience_label",
            0.0,
            "Audience classification",
            "Audience detection confuses patients, caregivers, clinicians, researchers and media.",
            "Review the audience anchor phrases and classification criteria.",
        ),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RootCauseFinding {
    pub field: String,
    pub title: String,
    pub failed: usize,
    pub evaluated: usize,
    pub failure_rate: f64,
    pub severity: Severity,
    pub observation: String,
    pub recommendation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportPolicy {
    pub gates: GatePolicy,
    pub severity: SeverityBands,
    pub root_causes: Vec<RootCauseRule>,
    pub top_n: usize,
}

impl Default for ReportPolicy {
    fn default() -> Self {
        Self {
            gates: GatePolicy::default(),
            severity: SeverityBands::default(),
            root_causes: default_root_cause_rules(),
            top_n: DEFAULT_TOP_N,
        }
    }
}

impl ReportPolicy {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let policy: Self = serde_json::from_slice(&raw)
            .with_context(|| format!("failed to parse report policy {}", path.display()))?;
        policy
            .validate()
            .with_context(|| format!("invalid report policy {}", path.display()))?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<()> {
        self.gates.validate()?;
        if let Some(cut) = self.severity.cuts.iter().find(|cut| !cut.above.is_finite()) {
            bail!("severity cut point must be finite, got {}", cut.above);
        }
        if let Some(rule) = self
            .root_causes
            .iter()
            .find(|rule| rule.field.trim().is_empty() || !(0.0..=100.0).contains(&rule.threshold_pct))
        {
            bail!(
                "root-cause rule '{}' needs a field name and a threshold within 0..=100",
                rule.title
            );
        }
        Ok(())
    }

    pub fn root_causes(&self, report: &AggregateReport) -> Vec<RootCauseFinding> {
        self.root_causes
            .iter()
            .filter_map(|rule| {
                let tally = report.field(&rule.field)?;
                (tally.evaluated > 0 && tally.failure_rate > rule.threshold_pct).then(|| {
                    RootCauseFinding {
                        field: rule.field.clone(),
                        title: rule.title.clone(),
                        failed: tally.failed,
                        evaluated: tally.evaluated,
                        failure_rate: tally.failure_rate,
                        severity: self.severity.classify(tally.failure_rate),
                        observation: rule.observation.clone(),
                        recommendation: rule.recommendation.clone(),
                    }
                })
            })
            .collect()
    }
}
