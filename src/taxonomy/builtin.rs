use super::{FieldKind, FieldSpec, Taxonomy, TaxonomyError, Tier};

pub const DEFAULT_VERSION: &str = "v6";

const POST_METADATA_FIELDS: [&str; 14] = [
    "source",
    "source_id",
    "url",
    "permalink",
    "title",
    "text",
    "parent_source",
    "subsource",
    "author",
    "country",
    "published_at",
    "language",
    "metrics",
    "sentiment_raw",
];

const CONFIDENCE_FIELDS: [&str; 4] = [
    "relevance_confidence",
    "audience_confidence",
    "sentiment_confidence",
    "engagement_score",
];

pub fn v5() -> Result<Taxonomy, TaxonomyError> {
    let mut builder = Taxonomy::builder("v5")
        .field(FieldSpec::new("flags", Tier::Tier1Critical, FieldKind::SetOfStrings))
        .fields(
            Tier::Tier1Critical,
            FieldKind::Scalar,
            ["relevance_label", "audience_label", "bariatric_context"],
        )
        .fields(
            Tier::Tier2Core,
            FieldKind::Scalar,
            ["sentiment_label", "engagement_label"],
        )
        .fields(
            Tier::Tier3Enhancement,
            FieldKind::SetOfStrings,
            ["themes", "emotions", "intent"],
        );

    for name in [
        "topics",
        "symptoms",
        "treatments",
        "conditions",
        "companies",
        "debug_matches",
    ] {
        builder = builder.field(
            FieldSpec::new(name, Tier::EntityOnly, FieldKind::SetOfStrings)
                .with_overlap_threshold(0.8)
                .with_gate(true),
        );
    }

    for name in CONFIDENCE_FIELDS {
        builder = builder.field(
            FieldSpec::new(name, Tier::Tier3Enhancement, FieldKind::NumericTolerant)
                .with_tolerance(0.10),
        );
    }

    builder.skip(POST_METADATA_FIELDS).build()
}

pub fn v6() -> Result<Taxonomy, TaxonomyError> {
    let numeric = |name: &str, tier: Tier| {
        FieldSpec::new(name, tier, FieldKind::NumericTolerant).with_tolerance(0.15)
    };

    let mut builder = Taxonomy::builder("v6")
        .field(FieldSpec::new("flags", Tier::Tier1Critical, FieldKind::SetOfStrings))
        .field(FieldSpec::new("relevance_label", Tier::Tier1Critical, FieldKind::Scalar))
        .field(numeric("relevance_confidence", Tier::Tier1Critical))
        .field(FieldSpec::new("bariatric_context", Tier::Tier1Critical, FieldKind::Scalar))
        .field(FieldSpec::new("audience_label", Tier::Tier2Core, FieldKind::Scalar))
        .field(numeric("audience_confidence", Tier::Tier2Core))
        .field(FieldSpec::new("sentiment_label", Tier::Tier2Core, FieldKind::Scalar))
        .field(numeric("sentiment_confidence", Tier::Tier2Core));

    for name in ["themes", "conditions", "treatments", "companies"] {
        builder = builder.field(
            FieldSpec::new(name, Tier::Tier2Core, FieldKind::SetOfStrings)
                .with_overlap_threshold(0.8),
        );
    }

    builder
        .field(FieldSpec::new("engagement_label", Tier::Tier2Core, FieldKind::Scalar))
        .field(numeric("engagement_score", Tier::Tier2Core))
        .fields(
            Tier::Tier3Enhancement,
            FieldKind::SetOfStrings,
            [
                "emotions",
                "intent",
                "key_phrases",
                "symptoms",
                "topics",
                "debug_matches",
            ],
        )
        .field(FieldSpec::new(
            "relevance_reason",
            Tier::Tier3Enhancement,
            FieldKind::Scalar,
        ))
        .skip(POST_METADATA_FIELDS)
        .build()
}

pub fn v7() -> Result<Taxonomy, TaxonomyError> {
    let mut builder = Taxonomy::builder("v7")
        .field(FieldSpec::new("flags", Tier::Tier1Critical, FieldKind::SetOfStrings))
        .fields(
            Tier::Tier1Critical,
            FieldKind::Scalar,
            ["relevance_label", "bariatric_context"],
        )
        .fields(
            Tier::Tier2Core,
            FieldKind::Scalar,
            ["audience_label", "sentiment_label", "engagement_label"],
        );

    for name in [
        "themes",
        "conditions",
        "treatments",
        "companies",
        "symptoms",
        "topics",
        "emotions",
    ] {
        builder = builder.field(
            FieldSpec::new(name, Tier::Tier2Core, FieldKind::SetOfStrings)
                .with_overlap_threshold(1.0),
        );
    }

    builder
        .skip(POST_METADATA_FIELDS)
        .skip(CONFIDENCE_FIELDS)
        .skip(["intent", "key_phrases", "debug_matches", "relevance_reason"])
        .build()
}
