//! Lexical project detection.
//!
//! Finds a known project name literally present in the question. Names are
//! tried longest first so that "Project A" never shadows "Project A Part 2".

use std::collections::BTreeSet;

use crate::models::SourceMapEntry;

/// The project name mentioned in `query`, if any.
///
/// Comparison is case-insensitive. Returns the name as spelled in the first
/// source map entry that carries it.
pub fn identify(query: &str, entries: &[SourceMapEntry]) -> Option<String> {
    let haystack = query.to_lowercase();

    let mut seen = BTreeSet::new();
    let mut names: Vec<&str> = entries
        .iter()
        .map(|e| e.project_name.trim())
        .filter(|n| !n.is_empty())
        .filter(|n| seen.insert(n.to_lowercase()))
        .collect();
    // Stable sort keeps map order among equal lengths.
    names.sort_by_key(|n| std::cmp::Reverse(n.chars().count()));

    names
        .into_iter()
        .find(|n| haystack.contains(&n.to_lowercase()))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(names: &[&str]) -> Vec<SourceMapEntry> {
        names
            .iter()
            .map(|n| SourceMapEntry {
                project_name: n.to_string(),
                category: "Pricing".into(),
                document_reference: format!("ref-{}", n),
                description: String::new(),
            })
            .collect()
    }

    #[test]
    fn longest_name_wins_over_prefix() {
        let map = entries(&["Project A", "Project A Part 2"]);
        assert_eq!(
            identify("status of project a part 2?", &map).as_deref(),
            Some("Project A Part 2")
        );
        assert_eq!(
            identify("status of Project A?", &map).as_deref(),
            Some("Project A")
        );
    }

    #[test]
    fn order_in_map_does_not_matter() {
        let map = entries(&["Project A Part 2", "Project A"]);
        assert_eq!(
            identify("Project A Part 2 budget", &map).as_deref(),
            Some("Project A Part 2")
        );
    }

    #[test]
    fn no_match_is_none() {
        let map = entries(&["Tudor House"]);
        assert_eq!(identify("What tasks does Alice have?", &map), None);
        assert_eq!(identify("anything", &[]), None);
    }

    #[test]
    fn duplicate_and_blank_names_are_ignored() {
        let mut map = entries(&["Tudor House", "TUDOR HOUSE", "  "]);
        map[1].category = "Manufacturing".into();
        assert_eq!(
            identify("tudor house doors", &map).as_deref(),
            Some("Tudor House")
        );
    }
}
