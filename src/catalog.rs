use crate::fuse::CellRecord;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraitCategory {
    Gene,
    TfActivity,
}

impl TraitCategory {
    pub fn heading(self) -> &'static str {
        match self {
            TraitCategory::Gene => "Gene",
            TraitCategory::TfActivity => "TF Activity",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraitDescriptor {
    pub key: String,
    pub label: String,
    pub category: TraitCategory,
}

/// The derived trait set. `defaulted` marks the placeholder catalog injected
/// when no traits were discovered at all.
#[derive(Debug, Default)]
pub struct TraitCatalog {
    pub traits: Vec<TraitDescriptor>,
    pub defaulted: bool,
}

impl TraitCatalog {
    pub fn label_for<'a>(&'a self, key: &'a str) -> &'a str {
        self.traits
            .iter()
            .find(|t| t.key == key)
            .map(|t| t.label.as_str())
            .unwrap_or(key)
    }

    pub fn in_category(&self, category: TraitCategory) -> impl Iterator<Item = &TraitDescriptor> {
        self.traits.iter().filter(move |t| t.category == category)
    }
}

/// Derives the trait catalog from the fused record set. Keys are the union of
/// every record's trait map; identity fields never reach the maps, so no
/// exclusion list is needed here.
pub fn build_catalog(records: &[CellRecord]) -> TraitCatalog {
    let keys: BTreeSet<&str> = records
        .iter()
        .flat_map(|r| r.traits.keys().map(String::as_str))
        .collect();

    let traits: Vec<TraitDescriptor> = keys.into_iter().map(describe).collect();
    log::info!("trait catalog: {} entries", traits.len());
    if traits.is_empty() {
        log::warn!("no traits discovered; injecting the default catalog");
        return default_catalog();
    }
    TraitCatalog { traits, defaulted: false }
}

/// TF-activity keys carry the case-insensitive substring "activity";
/// everything else is gene expression. Labels strip the activity-qualifier
/// suffixes into readable form.
fn describe(key: &str) -> TraitDescriptor {
    let lower = key.to_ascii_lowercase();
    if !lower.contains("activity") {
        return TraitDescriptor {
            key: key.to_string(),
            label: key.to_string(),
            category: TraitCategory::Gene,
        };
    }
    let label = if key.contains(" activity(direct)") {
        key.replace(" activity(direct)", " Activity (Direct)")
    } else if key.contains(" activity(extended)") {
        key.replace(" activity(extended)", " Activity (Extended)")
    } else if lower.contains("(direct)") || lower.contains("(extended)") {
        // qualifier spelled some other way: keep the raw key as the label
        key.to_string()
    } else {
        format!("{key} Activity")
    };
    TraitDescriptor {
        key: key.to_string(),
        label,
        category: TraitCategory::TfActivity,
    }
}

fn default_catalog() -> TraitCatalog {
    let entry = |key: &str, label: &str, category| TraitDescriptor {
        key: key.to_string(),
        label: label.to_string(),
        category,
    };
    TraitCatalog {
        traits: vec![
            entry("GeneA", "Gene A", TraitCategory::Gene),
            entry("GeneB", "Gene B", TraitCategory::Gene),
            entry("TF1_activity", "TF1 Activity", TraitCategory::TfActivity),
            entry("TF2_activity", "TF2 Activity", TraitCategory::TfActivity),
        ],
        defaulted: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn record_with_traits(keys: &[&str]) -> CellRecord {
        CellRecord {
            id: "c1".to_string(),
            x: 0.0,
            y: 0.0,
            slice: "s1".to_string(),
            region: "Unknown".to_string(),
            traits: keys.iter().map(|k| (k.to_string(), 1.0)).collect(),
        }
    }

    #[test]
    fn test_classification_is_case_insensitive() {
        let records = vec![record_with_traits(&["Sox2", "Gata1 Activity", "Smad4_activity"])];
        let catalog = build_catalog(&records);
        let category = |key: &str| {
            catalog.traits.iter().find(|t| t.key == key).unwrap().category
        };
        assert_eq!(category("Sox2"), TraitCategory::Gene);
        assert_eq!(category("Gata1 Activity"), TraitCategory::TfActivity);
        assert_eq!(category("Smad4_activity"), TraitCategory::TfActivity);
    }

    #[test]
    fn test_activity_suffix_labels() {
        let records = vec![record_with_traits(&[
            "Gata1 activity(direct)",
            "Sox9 activity(extended)",
            "Smad4_activity",
        ])];
        let catalog = build_catalog(&records);
        assert_eq!(catalog.label_for("Gata1 activity(direct)"), "Gata1 Activity (Direct)");
        assert_eq!(catalog.label_for("Sox9 activity(extended)"), "Sox9 Activity (Extended)");
        assert_eq!(catalog.label_for("Smad4_activity"), "Smad4_activity Activity");
        // genes keep the raw key
        assert_eq!(catalog.label_for("Sox2"), "Sox2");
    }

    #[test]
    fn test_unmatched_qualifier_keeps_raw_label() {
        // qualifier present but not in the canonical lowercase spelling:
        // still TF activity, but the label stays as-is
        let records = vec![record_with_traits(&["Gata1 Activity(direct)"])];
        let catalog = build_catalog(&records);
        let descriptor = &catalog.traits[0];
        assert_eq!(descriptor.category, TraitCategory::TfActivity);
        assert_eq!(descriptor.label, "Gata1 Activity(direct)");
    }

    #[test]
    fn test_keys_are_union_across_records() {
        let records = vec![record_with_traits(&["A"]), record_with_traits(&["B"])];
        let catalog = build_catalog(&records);
        let keys: Vec<&str> = catalog.traits.iter().map(|t| t.key.as_str()).collect();
        assert_eq!(keys, vec!["A", "B"]);
        assert!(!catalog.defaulted);
    }

    #[test]
    fn test_empty_catalog_gets_defaults() {
        let records = vec![record_with_traits(&[])];
        let catalog = build_catalog(&records);
        assert!(catalog.defaulted);
        assert_eq!(catalog.traits.len(), 4);
        assert_eq!(catalog.in_category(TraitCategory::Gene).count(), 2);
        assert_eq!(catalog.in_category(TraitCategory::TfActivity).count(), 2);
    }
}
