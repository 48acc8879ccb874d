use std::collections::BTreeMap;

pub const UNKNOWN_CATEGORY: &str = "unknown";

const DEFAULT_PREFIXES: [(&str, &str); 6] = [
    ("ae_test", "adverse_events"),
    ("platform_", "platform_coverage"),
    ("edge_", "edge_cases"),
    ("dict_", "dictionary"),
    ("class_", "classification"),
    ("flag_", "flags"),
];

#[derive(Debug, Clone, Default)]
pub struct CategoryResolver {
    explicit: BTreeMap<String, String>,
    prefixes: Vec<(String, String)>,
}

impl CategoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_prefixes() -> Self {
        DEFAULT_PREFIXES
            .iter()
            .fold(Self::new(), |resolver, (prefix, category)| {
                resolver.with_prefix(*prefix, *category)
            })
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>, category: impl Into<String>) -> Self {
        self.prefixes.push((prefix.into(), category.into()));
        self
    }

    pub fn with_explicit(mut self, tags: &BTreeMap<String, String>) -> Self {
        self.explicit.extend(
            tags.iter()
                .filter(|(_, category)| !category.trim().is_empty())
                .map(|(id, category)| (id.clone(), category.trim().to_string())),
        );
        self
    }

    pub fn category_of(&self, id: &str) -> String {
        if let Some(category) = self.explicit.get(id) {
            return category.clone();
        }

        self.prefixes
            .iter()
            .find(|(prefix, _)| id.starts_with(prefix.as_str()))
            .map(|(_, category)| category.clone())
            .unwrap_or_else(|| UNKNOWN_CATEGORY.to_string())
    }
}
