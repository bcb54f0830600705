// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Papers arithmetic and page-range handling.
//
// The backend applies number-up to the whole document before page selection,
// so the count pipeline is: layout, then range selection, then duplex
// folding, then copies.

use druckwerk_core::Sides;
use druckwerk_core::error::{DruckwerkError, Result};

/// One `a` or `a-b` component of a page-ranges string, always ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRange {
    pub start: u32,
    pub end: u32,
}

/// Parse a page-ranges string (`r(,r)*` with `r = \d+(-\d+)?`).
///
/// An empty string parses to an empty list (which selects zero pages);
/// malformed components such as `1-2-3` are rejected.
pub fn parse_page_ranges(ranges: &str) -> Result<Vec<PageRange>> {
    if ranges.is_empty() {
        return Ok(Vec::new());
    }

    let mut parsed = Vec::new();
    for component in ranges.split(',') {
        let range = match component.split_once('-') {
            None => {
                let page = parse_page_number(component)?;
                PageRange {
                    start: page,
                    end: page,
                }
            }
            Some((start, end)) => PageRange {
                start: parse_page_number(start)?,
                end: parse_page_number(end)?,
            },
        };
        parsed.push(range);
    }
    Ok(parsed)
}

fn parse_page_number(text: &str) -> Result<u32> {
    if text.is_empty() || !text.chars().all(|c| c.is_ascii_digit()) {
        return Err(DruckwerkError::InvalidArgument(format!(
            "bad page range component '{text}'"
        )));
    }
    text.parse::<u32>()
        .map_err(|_| DruckwerkError::InvalidArgument(format!("page number '{text}' out of range")))
}

/// Number of pages a range selection keeps out of a `pages`-page document.
///
/// Endpoints are clamped to `[1, pages]`; a descending range contributes
/// nothing. `None` selects the whole document.
pub fn count_of_pages_to_print(pages: i64, page_ranges: Option<&str>) -> Result<u64> {
    if pages < 0 {
        return Err(DruckwerkError::InvalidArgument(
            "pages must be non-negative".into(),
        ));
    }
    let pages = pages as u32;

    let Some(ranges) = page_ranges else {
        return Ok(u64::from(pages));
    };

    let mut total: u64 = 0;
    for range in parse_page_ranges(ranges)? {
        let start = range.start.max(1);
        let end = range.end.min(pages);
        if start <= end {
            total += u64::from(end - start + 1);
        }
    }
    Ok(total)
}

/// Sheets of paper a job will consume, across all copies.
///
/// Layout is applied by the backend to the whole document before page
/// selection: divide by number-up first, count the range selection against
/// the laid-out length, fold for duplex, multiply by copies.
pub fn count_of_papers_to_print(
    pages: i64,
    page_ranges: Option<&str>,
    number_up: u32,
    sides: Sides,
    copies: u32,
) -> Result<u64> {
    if number_up == 0 {
        return Err(DruckwerkError::InvalidArgument(
            "number_up must be positive".into(),
        ));
    }
    if pages < 0 {
        return Err(DruckwerkError::InvalidArgument(
            "pages must be non-negative".into(),
        ));
    }

    let after_layout = (pages as u64).div_ceil(u64::from(number_up));
    let selected = count_of_pages_to_print(after_layout as i64, page_ranges)?;
    let sheets = selected.div_ceil(u64::from(sides.pages_per_sheet()));
    Ok(sheets * u64::from(copies))
}

/// Outcome of normalizing user-typed page ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeCheck {
    /// Input was already in canonical form.
    Valid(String),
    /// Input was repairable; the canonical form is offered back to the user
    /// for confirmation instead of being applied silently.
    Suggestion(String),
}

impl RangeCheck {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Valid(s) | Self::Suggestion(s) => s,
        }
    }
}

/// Normalize a user-typed page-ranges string.
///
/// Strips foreign characters, collapses dash runs, trims dangling dashes,
/// and flips descending ranges to ascending. Inputs that normalize to
/// nothing, or contain components with more than one dash, are rejected.
pub fn normalize_page_ranges(input: &str) -> Result<RangeCheck> {
    let cleaned: String = input
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '-' || *c == ',')
        .collect();

    let mut components = Vec::new();
    for raw in cleaned.split(',') {
        let collapsed = collapse_dashes(raw);
        let trimmed = collapsed.trim_matches('-');
        if trimmed.is_empty() {
            continue;
        }

        let dash_count = trimmed.matches('-').count();
        match dash_count {
            0 => components.push(trimmed.to_string()),
            1 => {
                let (a, b) = trimmed.split_once('-').unwrap_or((trimmed, ""));
                let a_num = parse_page_number(a)?;
                let b_num = parse_page_number(b)?;
                if a_num > b_num {
                    components.push(format!("{b_num}-{a_num}"));
                } else {
                    components.push(format!("{a}-{b}"));
                }
            }
            _ => {
                return Err(DruckwerkError::InvalidArgument(format!(
                    "unintelligible page range '{trimmed}'"
                )));
            }
        }
    }

    if components.is_empty() {
        return Err(DruckwerkError::InvalidArgument(
            "page ranges normalized to nothing".into(),
        ));
    }

    let normalized = components.join(",");
    if normalized == input {
        Ok(RangeCheck::Valid(normalized))
    } else {
        Ok(RangeCheck::Suggestion(normalized))
    }
}

fn collapse_dashes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_dash = false;
    for c in text.chars() {
        if c == '-' {
            if !prev_dash {
                out.push(c);
            }
            prev_dash = true;
        } else {
            out.push(c);
            prev_dash = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn papers(
        pages: i64,
        ranges: Option<&str>,
        number_up: u32,
        sides: Sides,
        copies: u32,
    ) -> Result<u64> {
        count_of_papers_to_print(pages, ranges, number_up, sides, copies)
    }

    #[test]
    fn papers_vectors() {
        use Sides::{OneSided, TwoSidedLongEdge};
        assert_eq!(papers(10, None, 1, OneSided, 1).unwrap(), 10);
        assert_eq!(papers(10, Some("1-4"), 1, OneSided, 1).unwrap(), 4);
        assert_eq!(papers(10, Some("1-4"), 1, TwoSidedLongEdge, 1).unwrap(), 2);
        assert_eq!(papers(10, Some("1-4"), 4, OneSided, 1).unwrap(), 1);
        assert_eq!(papers(10, Some("1-8"), 4, OneSided, 1).unwrap(), 2);
        assert_eq!(papers(10, Some("1-4"), 1, OneSided, 2).unwrap(), 8);
        assert_eq!(papers(10, Some("1-8"), 4, TwoSidedLongEdge, 2).unwrap(), 2);
    }

    #[test]
    fn papers_edge_cases() {
        use Sides::OneSided;
        assert_eq!(papers(10, Some(""), 1, OneSided, 1).unwrap(), 0);
        assert_eq!(papers(10, Some("1"), 1, OneSided, 1).unwrap(), 1);
        assert_eq!(papers(10, Some("1-4"), 1, OneSided, 0).unwrap(), 0);
        assert_eq!(papers(0, None, 1, OneSided, 1).unwrap(), 0);
    }

    #[test]
    fn papers_invalid_inputs() {
        use Sides::OneSided;
        assert!(papers(10, Some("1-4"), 0, OneSided, 1).is_err());
        assert!(papers(-1, None, 1, OneSided, 1).is_err());
        assert!(count_of_pages_to_print(-1, Some("1-5")).is_err());
        assert!(count_of_pages_to_print(10, Some("1-2-3")).is_err());
    }

    #[test]
    fn page_selection_counts() {
        assert_eq!(count_of_pages_to_print(10, None).unwrap(), 10);
        assert_eq!(count_of_pages_to_print(10, Some("1")).unwrap(), 1);
        assert_eq!(count_of_pages_to_print(10, Some("1-5")).unwrap(), 5);
        assert_eq!(count_of_pages_to_print(20, Some("1-5,7,9-12")).unwrap(), 10);
        assert_eq!(
            count_of_pages_to_print(20, Some("1-3,5-7,9,11-13")).unwrap(),
            10
        );
        assert_eq!(count_of_pages_to_print(10, Some("")).unwrap(), 0);
        assert_eq!(count_of_pages_to_print(10, Some("1-15")).unwrap(), 10);
        assert_eq!(count_of_pages_to_print(10, Some("15")).unwrap(), 0);
        assert_eq!(count_of_pages_to_print(10, Some("1-5,15")).unwrap(), 5);
    }

    #[test]
    fn normalization_repairs_input() {
        match normalize_page_ranges("1--3, 5-").unwrap() {
            RangeCheck::Suggestion(s) => assert_eq!(s, "1-3,5"),
            other => panic!("expected suggestion, got {other:?}"),
        }
        match normalize_page_ranges("5-3").unwrap() {
            RangeCheck::Suggestion(s) => assert_eq!(s, "3-5"),
            other => panic!("expected suggestion, got {other:?}"),
        }
        match normalize_page_ranges("1-4,7").unwrap() {
            RangeCheck::Valid(s) => assert_eq!(s, "1-4,7"),
            other => panic!("expected valid, got {other:?}"),
        }
    }

    #[test]
    fn normalization_is_idempotent() {
        for input in ["1--3, 5-", "5-3", "2,4-6", "-7-", "1,,2"] {
            let once = normalize_page_ranges(input).unwrap();
            let twice = normalize_page_ranges(once.as_str()).unwrap();
            assert_eq!(twice, RangeCheck::Valid(once.as_str().to_string()));
        }
    }

    #[test]
    fn normalization_rejects_hopeless_input() {
        assert!(normalize_page_ranges("").is_err());
        assert!(normalize_page_ranges("abc").is_err());
        assert!(normalize_page_ranges(",,-,").is_err());
        assert!(normalize_page_ranges("1-2-3").is_err());
    }
}
