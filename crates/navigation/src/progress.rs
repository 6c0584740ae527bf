//! Progress through a navigator's steps.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Position of a step within its task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    /// 1-based position
    pub current: usize,
    /// Total number of positions
    pub total: usize,
    /// Set when the total depends on navigation not yet taken
    pub is_estimated: bool,
}

/// Progress over curated markers.
///
/// `history` holds the identifiers already shown; `step` is added in case
/// it has not been recorded yet. Returns `None` when no marker has been
/// shown, or when `step` comes after the final marker.
pub fn marker_progress(markers: &[String], history: &[&str], step: &str) -> Option<Progress> {
    let shown = |marker: &String| marker == step || history.contains(&marker.as_str());
    let idx = markers.iter().rposition(shown)?;
    let current = idx + 1;
    if current == markers.len() && !markers.iter().any(|m| m == step) {
        return None;
    }
    Some(Progress {
        current,
        total: markers.len(),
        is_estimated: false,
    })
}

/// Estimated progress from the static step list and the history.
pub fn estimated_progress<'a>(
    steps: impl IntoIterator<Item = &'a str>,
    history: &[&'a str],
    step: &str,
) -> Progress {
    let shown: HashSet<&str> = history.iter().copied().collect();
    let total = steps.into_iter().chain(history.iter().copied()).collect::<HashSet<_>>().len();
    let current = shown.iter().filter(|id| **id != step).count() + 1;
    Progress {
        current,
        total,
        is_estimated: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn markers() -> Vec<String> {
        vec!["a".into(), "b".into(), "c".into()]
    }

    #[test]
    fn test_marker_progress() {
        let p = marker_progress(&markers(), &["a"], "b").unwrap();
        assert_eq!((p.current, p.total, p.is_estimated), (2, 3, false));

        // Unmarked step between markers reports the last marker shown
        let p = marker_progress(&markers(), &["intro", "a"], "a2").unwrap();
        assert_eq!(p.current, 1);
    }

    #[test]
    fn test_marker_progress_none_before_first_and_after_last() {
        assert!(marker_progress(&markers(), &["intro"], "intro2").is_none());
        assert!(marker_progress(&markers(), &["a", "b", "c"], "done").is_none());
        assert_eq!(marker_progress(&markers(), &["a", "b"], "c").unwrap().current, 3);
    }

    #[test]
    fn test_estimated_progress_counts_distinct_identifiers() {
        let steps = ["a", "b", "c"];
        let p = estimated_progress(steps, &["a", "x"], "b");
        assert_eq!((p.current, p.total, p.is_estimated), (3, 4, true));

        let p = estimated_progress(steps, &[], "a");
        assert_eq!((p.current, p.total), (1, 3));
    }
}
