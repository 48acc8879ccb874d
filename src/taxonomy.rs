use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod builtin;

pub use builtin::{DEFAULT_VERSION, v5, v6, v7};

pub const DEFAULT_OVERLAP_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Tier1Critical,
    Tier2Core,
    Tier3Enhancement,
    EntityOnly,
    Skip,
}

impl Tier {
    pub const SCORED: [Tier; 4] = [
        Tier::Tier1Critical,
        Tier::Tier2Core,
        Tier::Tier3Enhancement,
        Tier::EntityOnly,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tier1Critical => "tier1_critical",
            Self::Tier2Core => "tier2_core",
            Self::Tier3Enhancement => "tier3_enhancement",
            Self::EntityOnly => "entity_only",
            Self::Skip => "skip",
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Self::Tier1Critical => "T1",
            Self::Tier2Core => "T2",
            Self::Tier3Enhancement => "T3",
            Self::EntityOnly => "ENT",
            Self::Skip => "SKIP",
        }
    }

    pub fn is_core(self) -> bool {
        matches!(self, Self::Tier1Critical | Self::Tier2Core)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    #[default]
    Scalar,
    SetOfStrings,
    NumericTolerant,
    NestedObject,
}

impl FieldKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scalar => "scalar",
            Self::SetOfStrings => "set_of_strings",
            Self::NumericTolerant => "numeric_tolerant",
            Self::NestedObject => "nested_object",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub tier: Tier,
    #[serde(default)]
    pub kind: FieldKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlap_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate: Option<bool>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, tier: Tier, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            tier,
            kind,
            tolerance: None,
            overlap_threshold: None,
            gate: None,
        }
    }

    pub fn skip(name: impl Into<String>) -> Self {
        Self::new(name, Tier::Skip, FieldKind::Scalar)
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = Some(tolerance);
        self
    }

    pub fn with_overlap_threshold(mut self, threshold: f64) -> Self {
        self.overlap_threshold = Some(threshold);
        self
    }

    pub fn with_gate(mut self, gate: bool) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Whether a failure of this field fails `overall_pass`.
    pub fn gates(&self) -> bool {
        match self.tier {
            Tier::Tier1Critical | Tier::Tier2Core => true,
            Tier::EntityOnly => self.gate.unwrap_or(false),
            Tier::Tier3Enhancement | Tier::Skip => false,
        }
    }

    /// Minimum Jaccard score a set field needs to pass.
    pub fn pass_threshold(&self) -> f64 {
        match self.tier {
            Tier::Tier1Critical | Tier::Skip => 1.0,
            Tier::Tier2Core | Tier::EntityOnly => {
                self.overlap_threshold.unwrap_or(DEFAULT_OVERLAP_THRESHOLD)
            }
            Tier::Tier3Enhancement => self.overlap_threshold.unwrap_or(1.0),
        }
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance.unwrap_or(0.0)
    }

    fn validate(&self) -> Result<(), TaxonomyError> {
        let field = || self.name.clone();

        if self.name.trim().is_empty() {
            return Err(TaxonomyError::EmptyFieldName);
        }

        match (self.kind, self.tolerance) {
            (FieldKind::NumericTolerant, None) => {
                return Err(TaxonomyError::MissingTolerance { field: field() });
            }
            (FieldKind::NumericTolerant, Some(value)) if !value.is_finite() || value < 0.0 => {
                return Err(TaxonomyError::InvalidTolerance {
                    field: field(),
                    value,
                });
            }
            (FieldKind::NumericTolerant, Some(_)) | (_, None) => {}
            (_, Some(_)) => return Err(TaxonomyError::ToleranceOnNonNumeric { field: field() }),
        }

        if let Some(value) = self.overlap_threshold {
            if self.kind != FieldKind::SetOfStrings {
                return Err(TaxonomyError::ThresholdOnNonSet { field: field() });
            }
            if self.tier == Tier::Tier1Critical {
                return Err(TaxonomyError::ThresholdOnCriticalField { field: field() });
            }
            if !(0.0..=1.0).contains(&value) {
                return Err(TaxonomyError::InvalidOverlapThreshold {
                    field: field(),
                    value,
                });
            }
        }

        if self.gate == Some(false) && self.tier.is_core() {
            return Err(TaxonomyError::UngatedCoreField {
                field: field(),
                tier: self.tier,
            });
        }
        if self.gate == Some(true) && matches!(self.tier, Tier::Tier3Enhancement | Tier::Skip) {
            return Err(TaxonomyError::GatedUnscoredField {
                field: field(),
                tier: self.tier,
            });
        }

        Ok(())
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum TaxonomyError {
    #[error("field name must not be empty")]
    EmptyFieldName,
    #[error("field `{field}` is assigned to both {first} and {second}")]
    ConflictingTier {
        field: String,
        first: Tier,
        second: Tier,
    },
    #[error("field `{field}` is declared more than once in {tier}")]
    DuplicateField { field: String, tier: Tier },
    #[error("numeric field `{field}` needs a tolerance")]
    MissingTolerance { field: String },
    #[error("field `{field}` has invalid tolerance {value}")]
    InvalidTolerance { field: String, value: f64 },
    #[error("field `{field}` sets a tolerance but is not numeric_tolerant")]
    ToleranceOnNonNumeric { field: String },
    #[error("field `{field}` sets an overlap threshold but is not set_of_strings")]
    ThresholdOnNonSet { field: String },
    #[error("field `{field}` is tier1_critical and always requires an exact set match")]
    ThresholdOnCriticalField { field: String },
    #[error("field `{field}` has overlap threshold {value} outside [0, 1]")]
    InvalidOverlapThreshold { field: String, value: f64 },
    #[error("field `{field}` is {tier} and cannot disable gating")]
    UngatedCoreField { field: String, tier: Tier },
    #[error("field `{field}` is {tier} and never gates overall_pass")]
    GatedUnscoredField { field: String, tier: Tier },
    #[error("taxonomy version `{version}` is already registered")]
    DuplicateVersion { version: String },
    #[error("unknown taxonomy version `{version}` (available: {available})")]
    UnknownVersion { version: String, available: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxonomyConfig {
    pub version: String,
    pub fields: Vec<FieldSpec>,
}

#[derive(Debug, Clone)]
pub struct Taxonomy {
    version: String,
    fields: Vec<FieldSpec>,
    index: HashMap<String, usize>,
}

impl Taxonomy {
    pub fn builder(version: impl Into<String>) -> TaxonomyBuilder {
        TaxonomyBuilder {
            version: version.into(),
            fields: Vec::new(),
        }
    }

    pub fn from_config(config: TaxonomyConfig) -> Result<Self, TaxonomyError> {
        let mut builder = Self::builder(config.version);
        builder.fields = config.fields;
        builder.build()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read(path)
            .with_context(|| format!("failed to read taxonomy: {}", path.display()))?;
        let config: TaxonomyConfig = serde_json::from_slice(&raw)
            .with_context(|| format!("failed to parse taxonomy: {}", path.display()))?;
        Self::from_config(config)
            .with_context(|| format!("invalid taxonomy configuration: {}", path.display()))
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn lookup(&self, name: &str) -> Option<&FieldSpec> {
        self.index.get(name).map(|position| &self.fields[*position])
    }

    pub fn resolve(&self, name: &str) -> FieldSpec {
        self.lookup(name)
            .cloned()
            .unwrap_or_else(|| FieldSpec::skip(name))
    }

    pub fn fields_in(&self, tier: Tier) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(move |spec| spec.tier == tier)
    }

    /// Tier1 then Tier2 fields, each in declaration order.
    pub fn core_fields(&self) -> Vec<&FieldSpec> {
        self.fields_in(Tier::Tier1Critical)
            .chain(self.fields_in(Tier::Tier2Core))
            .collect()
    }

    pub fn to_config(&self) -> TaxonomyConfig {
        TaxonomyConfig {
            version: self.version.clone(),
            fields: self.fields.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaxonomyBuilder {
    version: String,
    fields: Vec<FieldSpec>,
}

impl TaxonomyBuilder {
    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.fields.push(spec);
        self
    }

    pub fn fields<I>(mut self, tier: Tier, kind: FieldKind, names: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.fields.extend(
            names
                .into_iter()
                .map(|name| FieldSpec::new(name, tier, kind)),
        );
        self
    }

    pub fn skip<I>(self, names: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.fields(Tier::Skip, FieldKind::Scalar, names)
    }

    pub fn build(self) -> Result<Taxonomy, TaxonomyError> {
        let mut index = HashMap::<String, usize>::with_capacity(self.fields.len());

        for (position, spec) in self.fields.iter().enumerate() {
            spec.validate()?;
            if let Some(existing) = index.get(&spec.name) {
                let first = self.fields[*existing].tier;
                return Err(if first == spec.tier {
                    TaxonomyError::DuplicateField {
                        field: spec.name.clone(),
                        tier: first,
                    }
                } else {
                    TaxonomyError::ConflictingTier {
                        field: spec.name.clone(),
                        first,
                        second: spec.tier,
                    }
                });
            }
            index.insert(spec.name.clone(), position);
        }

        Ok(Taxonomy {
            version: self.version,
            fields: self.fields,
            index,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaxonomyRegistry {
    versions: BTreeMap<String, Taxonomy>,
}

impl TaxonomyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builtin() -> Result<Self, TaxonomyError> {
        let mut registry = Self::new();
        registry.register(v5()?)?;
        registry.register(v6()?)?;
        registry.register(v7()?)?;
        Ok(registry)
    }

    pub fn register(&mut self, taxonomy: Taxonomy) -> Result<(), TaxonomyError> {
        if self.versions.contains_key(taxonomy.version()) {
            return Err(TaxonomyError::DuplicateVersion {
                version: taxonomy.version().to_string(),
            });
        }
        self.versions
            .insert(taxonomy.version().to_string(), taxonomy);
        Ok(())
    }

    pub fn get(&self, version: &str) -> Result<&Taxonomy, TaxonomyError> {
        self.versions
            .get(version.trim())
            .ok_or_else(|| TaxonomyError::UnknownVersion {
                version: version.to_string(),
                available: self.versions().collect::<Vec<&str>>().join(", "),
            })
    }

    pub fn versions(&self) -> impl Iterator<Item = &str> {
        self.versions.keys().map(String::as_str)
    }
}
