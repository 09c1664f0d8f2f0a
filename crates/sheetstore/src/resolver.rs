//! Logical table name to actual tab title
//!
//! Matching order:
//! 1. exact after collapsing whitespace runs and case folding
//! 2. every whitespace token of the logical name is a case-insensitive
//!    substring of the title
//! 3. exact, case-sensitive
//!
//! The first title in tab order wins within a step. A miss reports every
//! title so callers can say what was available.

use crate::api::TabInfo;
use crate::error::{Result, SheetError};
use diagnostics::*;

/// How a title was matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Normalized,
    TokenSubset,
    Exact,
}

/// Outcome of resolving one logical name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// The matched title, or the logical name unchanged on a miss
    pub actual_title: String,
    pub tab_id: Option<i64>,
    pub all_titles: Vec<String>,
    pub matched: Option<MatchKind>,
}

/// A resolved tab that is known to exist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTab {
    pub title: String,
    pub tab_id: i64,
}

impl Resolution {
    #[must_use]
    pub fn is_match(&self) -> bool {
        self.matched.is_some()
    }

    /// The matched tab, or `TableNotFound` listing the candidates
    pub fn require(self, logical: &str) -> Result<ResolvedTab> {
        match self.tab_id {
            Some(tab_id) if self.matched.is_some() => Ok(ResolvedTab {
                title: self.actual_title,
                tab_id,
            }),
            _ => Err(SheetError::TableNotFound {
                name: logical.to_string(),
                candidates: self.all_titles,
            }),
        }
    }
}

/// Lowercase with whitespace runs collapsed to one space and trimmed
#[must_use]
pub fn normalize(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn tokens_match(tokens: &[String], title: &str) -> bool {
    let title = title.to_lowercase();
    !tokens.is_empty() && tokens.iter().all(|t| title.contains(t.as_str()))
}

/// Find the tab `logical` refers to among `tabs` (in index order)
#[must_use]
pub fn resolve(tabs: &[TabInfo], logical: &str) -> Resolution {
    let all_titles: Vec<String> = tabs.iter().map(|t| t.title.clone()).collect();
    let wanted = normalize(logical);
    let tokens: Vec<String> = logical
        .split_whitespace()
        .map(str::to_lowercase)
        .collect();

    let found = tabs
        .iter()
        .find(|t| !wanted.is_empty() && normalize(&t.title) == wanted)
        .map(|t| (t, MatchKind::Normalized))
        .or_else(|| {
            tabs.iter()
                .find(|t| tokens_match(&tokens, &t.title))
                .map(|t| (t, MatchKind::TokenSubset))
        })
        .or_else(|| {
            tabs.iter()
                .find(|t| t.title == logical)
                .map(|t| (t, MatchKind::Exact))
        });

    match found {
        Some((tab, kind)) => {
            if kind != MatchKind::Normalized {
                let title = &tab.title;
                debug!("Resolved {logical} to {title} by fallback match", logical: logical, title: title);
            }
            Resolution {
                actual_title: tab.title.clone(),
                tab_id: Some(tab.tab_id),
                all_titles,
                matched: Some(kind),
            }
        }
        None => {
            debug!("No tab matches {logical}", logical: logical);
            Resolution {
                actual_title: logical.to_string(),
                tab_id: None,
                all_titles,
                matched: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tabs(titles: &[&str]) -> Vec<TabInfo> {
        titles
            .iter()
            .enumerate()
            .map(|(index, title)| TabInfo {
                title: (*title).to_string(),
                tab_id: 100 + index as i64,
                index,
            })
            .collect()
    }

    #[test]
    fn test_whitespace_and_case_insensitive() {
        let r = resolve(&tabs(&["Notes", "Project List"]), "project list");
        assert_eq!(r.actual_title, "Project List");
        assert_eq!(r.tab_id, Some(101));
        assert_eq!(r.matched, Some(MatchKind::Normalized));

        let r = resolve(&tabs(&["Notes", " Project   List"]), "project list");
        assert_eq!(r.actual_title, " Project   List");
    }

    #[test]
    fn test_token_subset() {
        let r = resolve(&tabs(&["Notes", "ProjectListTab"]), "project list");
        assert_eq!(r.actual_title, "ProjectListTab");
        assert_eq!(r.matched, Some(MatchKind::TokenSubset));

        let r = resolve(&tabs(&["ProjectTab"]), "project list");
        assert!(!r.is_match());
    }

    #[test]
    fn test_normalized_beats_earlier_subset_match() {
        let r = resolve(&tabs(&["Weekly Notes Archive", "notes"]), "Notes");
        assert_eq!(r.actual_title, "notes");
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let listing = tabs(&["Notes", "Project List", "JAN 25"]);
        let first = resolve(&listing, "  project LIST ");
        let second = resolve(&listing, &first.actual_title);
        assert_eq!(first.actual_title, second.actual_title);
        assert_eq!(first.tab_id, second.tab_id);
    }

    #[test]
    fn test_miss_reports_candidates() {
        let r = resolve(&tabs(&["Notes", "JAN 25"]), "projects");
        assert_eq!(r.actual_title, "projects");
        assert_eq!(r.tab_id, None);

        let err = r.require("projects").unwrap_err();
        match err {
            SheetError::TableNotFound { name, candidates } => {
                assert_eq!(name, "projects");
                assert_eq!(candidates, vec!["Notes", "JAN 25"]);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_blank_name_never_matches() {
        assert!(!resolve(&tabs(&["Notes"]), "   ").is_match());
    }
}
