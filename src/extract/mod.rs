//! Multi-strategy expiry-date extraction over a captured page snapshot.
//!
//! The account panel displays the current expiration date somewhere on the
//! post-login page, but neither its position nor its separator style is
//! stable across panel revisions. This module recovers that date with a
//! layered strategy chain that degrades gracefully as structural assumptions
//! fail: table-anchored lookup, leaf-node scan, whole-document scan, and
//! finally a sweep over nested frame documents.
//!
//! All strategies are **synchronous** and operate on an owned [`PageSnapshot`]
//! -- the live page is never touched, so a failed stage can never disturb the
//! renewal flow. The async [`extract_with_retry`] wrapper re-captures the
//! snapshot up to a fixed bound to tolerate asynchronous content population.
//!
//! # Tie-break policy
//!
//! Pages often render the login timestamp in the same date format as the
//! expiry, so every stage prefers a candidate that is not equal to today's
//! date. This is a deliberate heuristic: it assumes the expiry never
//! legitimately falls on the run date.

use crate::browser::PanelPage;
use chrono::{NaiveDate, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::fmt;
use std::time::Duration;

/// Lexical pattern for a date candidate: four digits, two digits, two
/// digits, with the same separator (`-` or `/`) in both positions.
pub const DATE_PATTERN: &str = r"\d{4}(?:-\d{2}-\d{2}|/\d{2}/\d{2})";

/// Structural label anchoring the table-based strategy ("usage period").
pub const EXPIRY_LABEL: &str = "利用期限";

/// Upper bound on snapshot-and-scan attempts against a freshly-navigated page.
pub const EXTRACT_ATTEMPTS: u32 = 5;

/// Spacing between extraction attempts.
pub const EXTRACT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Bound on the best-effort wait for the structural label to appear.
pub const LABEL_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Read-only capture of a rendered document, taken once per attempt.
///
/// `frame_texts` holds the rendered text of every reachable nested frame in
/// document order; cross-origin frames contribute an empty string.
#[derive(Debug, Clone, Default)]
pub struct PageSnapshot {
    /// Full document markup (`outerHTML`).
    pub html: String,
    /// Rendered text of the document body (`innerText`).
    pub body_text: String,
    /// Rendered text of nested frame documents, in document order.
    pub frame_texts: Vec<String>,
}

/// Outcome of one extractor invocation. Exactly one is produced per call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionResult {
    /// A single chosen date candidate, verbatim as it appeared on the page.
    Found(String),
    /// No candidate survived any strategy stage.
    NotFound,
}

impl ExtractionResult {
    pub fn is_found(&self) -> bool {
        matches!(self, ExtractionResult::Found(_))
    }
}

impl fmt::Display for ExtractionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionResult::Found(date) => f.write_str(date),
            ExtractionResult::NotFound => f.write_str("Not Found"),
        }
    }
}

/// Today's calendar date in both separator styles, computed once per
/// invocation and used only as an exclusion filter, never as a match target.
#[derive(Debug, Clone)]
pub struct TodayStamp {
    dashed: String,
    slashed: String,
}

impl TodayStamp {
    /// Today according to process wall-clock time (UTC).
    pub fn now() -> Self {
        Self::from_date(Utc::now().date_naive())
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            dashed: date.format("%Y-%m-%d").to_string(),
            slashed: date.format("%Y/%m/%d").to_string(),
        }
    }

    /// Whether a candidate equals today's date in either separator style.
    pub fn matches(&self, candidate: &str) -> bool {
        candidate == self.dashed || candidate == self.slashed
    }
}

struct StageInput<'a> {
    snapshot: &'a PageSnapshot,
    today: &'a TodayStamp,
    date_re: &'a Regex,
}

type Strategy = fn(&StageInput) -> Option<String>;

/// Ordered strategy chain. Each stage runs only if the previous yielded
/// nothing usable.
const STRATEGIES: &[(&str, Strategy)] = &[
    ("table-anchor", scan_table_anchor),
    ("leaf-nodes", scan_leaf_nodes),
    ("whole-text", scan_whole_text),
    ("nested-frames", scan_nested_frames),
];

/// Run the strategy chain over a snapshot.
///
/// Never fails: internal errors (unparseable markup, absent structure) are
/// treated as "this stage found nothing" and the chain proceeds. Invoking
/// this twice on an unchanged snapshot yields the same result.
pub fn extract_expiry(snapshot: &PageSnapshot, today: &TodayStamp) -> ExtractionResult {
    let Ok(date_re) = Regex::new(DATE_PATTERN) else {
        return ExtractionResult::NotFound;
    };
    let input = StageInput {
        snapshot,
        today,
        date_re: &date_re,
    };

    for (name, strategy) in STRATEGIES {
        if let Some(date) = strategy(&input) {
            tracing::debug!(stage = name, %date, "expiry candidate accepted");
            return ExtractionResult::Found(date);
        }
        tracing::trace!(stage = name, "stage yielded nothing");
    }

    ExtractionResult::NotFound
}

/// Run the chain against a freshly-navigated page, re-capturing the snapshot
/// up to [`EXTRACT_ATTEMPTS`] times at [`EXTRACT_RETRY_DELAY`] spacing.
///
/// Waits (best effort, bounded) for the structural label first so a slow
/// page load does not immediately burn through the attempts. Snapshot
/// capture errors are logged and count as a miss; this function never
/// returns an error to the caller.
pub async fn extract_with_retry(page: &dyn PanelPage, today: &TodayStamp) -> ExtractionResult {
    if let Err(e) = page.wait_for_text(EXPIRY_LABEL, LABEL_WAIT_TIMEOUT).await {
        tracing::debug!(error = %e, "expiry label did not appear within the structural wait");
    }

    for attempt in 1..=EXTRACT_ATTEMPTS {
        match page.snapshot().await {
            Ok(snapshot) => match extract_expiry(&snapshot, today) {
                found @ ExtractionResult::Found(_) => return found,
                ExtractionResult::NotFound => {
                    tracing::debug!(attempt, "no expiry candidate in snapshot");
                }
            },
            Err(e) => tracing::warn!(attempt, error = %e, "snapshot capture failed"),
        }
        if attempt < EXTRACT_ATTEMPTS {
            tokio::time::sleep(EXTRACT_RETRY_DELAY).await;
        }
    }

    ExtractionResult::NotFound
}

// ── Stage 1: table-anchored lookup ───────────────────────────────────────────

/// Locate a header-like cell containing the expiry label and scan its row's
/// data cells, preferring a candidate that is not today's date (the row may
/// also carry a login-timestamp display).
fn scan_table_anchor(input: &StageInput) -> Option<String> {
    let document = Html::parse_document(&input.snapshot.html);
    let header_sel = Selector::parse("th, td, dt").ok()?;
    let cell_sel = Selector::parse("td, dd").ok()?;

    let mut fallback = None;
    for header in document.select(&header_sel) {
        if !element_text(&header).contains(EXPIRY_LABEL) {
            continue;
        }
        let cells: Vec<ElementRef> = match enclosing_row(&header) {
            Some(row) => row.select(&cell_sel).collect(),
            None => header.next_siblings().filter_map(ElementRef::wrap).collect(),
        };
        for cell in cells {
            let text = element_text(&cell);
            for m in input.date_re.find_iter(&text) {
                let candidate = m.as_str().to_string();
                if !input.today.matches(&candidate) {
                    return Some(candidate);
                }
                if fallback.is_none() {
                    fallback = Some(candidate);
                }
            }
        }
    }
    fallback
}

fn enclosing_row<'a>(el: &ElementRef<'a>) -> Option<ElementRef<'a>> {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|a| a.value().name() == "tr")
}

// ── Stage 2: leaf-node scan ──────────────────────────────────────────────────

/// Collect date matches from every leaf element (no element children).
/// With more than one candidate, prefer the first not equal to today; if all
/// are excluded, fall back to the first collected.
fn scan_leaf_nodes(input: &StageInput) -> Option<String> {
    let document = Html::parse_document(&input.snapshot.html);
    let all = Selector::parse("body *").ok()?;

    let mut candidates = Vec::new();
    for el in document.select(&all) {
        if matches!(el.value().name(), "script" | "style" | "noscript") {
            continue;
        }
        if el.children().any(|c| c.value().is_element()) {
            continue;
        }
        let text = element_text(&el);
        for m in input.date_re.find_iter(&text) {
            candidates.push(m.as_str().to_string());
        }
    }

    candidates
        .iter()
        .find(|c| !input.today.matches(c))
        .or_else(|| candidates.first())
        .cloned()
}

// ── Stage 3: whole-document scan ─────────────────────────────────────────────

/// Regex over the full rendered text. The expiry tends to appear after the
/// login timestamp in page order, so with two or more matches the *last*
/// non-today occurrence wins; otherwise the first match is returned as-is.
fn scan_whole_text(input: &StageInput) -> Option<String> {
    let matches: Vec<&str> = input
        .date_re
        .find_iter(&input.snapshot.body_text)
        .map(|m| m.as_str())
        .collect();

    if matches.len() >= 2 {
        if let Some(last) = matches.iter().rev().find(|c| !input.today.matches(c)) {
            return Some((*last).to_string());
        }
    }
    matches.first().map(|c| (*c).to_string())
}

// ── Stage 4: nested-frame fallback ───────────────────────────────────────────

/// First date match across nested frame documents, in document order.
fn scan_nested_frames(input: &StageInput) -> Option<String> {
    for text in &input.snapshot.frame_texts {
        if let Some(m) = input.date_re.find(text) {
            return Some(m.as_str().to_string());
        }
    }
    None
}

fn element_text(el: &ElementRef) -> String {
    el.text().collect::<String>()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> TodayStamp {
        TodayStamp::from_date(NaiveDate::from_ymd_opt(2025, 6, 10).unwrap())
    }

    fn snap(html: &str, body_text: &str) -> PageSnapshot {
        PageSnapshot {
            html: html.to_string(),
            body_text: body_text.to_string(),
            frame_texts: Vec::new(),
        }
    }

    #[test]
    fn date_pattern_requires_matching_separators() {
        let re = Regex::new(DATE_PATTERN).unwrap();
        assert!(re.is_match("2025-03-01"));
        assert!(re.is_match("2025/03/01"));
        assert!(!re.is_match("2025-03/01"));
        assert!(!re.is_match("25/03/01"));
    }

    #[test]
    fn today_stamp_matches_both_separator_styles() {
        let t = today();
        assert!(t.matches("2025-06-10"));
        assert!(t.matches("2025/06/10"));
        assert!(!t.matches("2025/06/11"));
    }

    #[test]
    fn table_anchor_wins_over_later_stages() {
        // Scenario A, plus a decoy date later in the body text that the
        // whole-document scan would otherwise prefer.
        let html = r#"
            <table>
              <tr><th>ご契約内容</th><td>無料VPS</td></tr>
              <tr><th>利用期限</th><td>2025/03/01</td></tr>
            </table>
            <p>footer 2026/12/31</p>
        "#;
        let text = "ご契約内容 無料VPS\n利用期限 2025/03/01\nfooter 2026/12/31";
        assert_eq!(
            extract_expiry(&snap(html, text), &today()),
            ExtractionResult::Found("2025/03/01".to_string())
        );
    }

    #[test]
    fn table_anchor_prefers_non_today_cell() {
        let html = r#"
            <table><tr>
              <th>利用期限</th><td>2025/06/10</td><td>2025/09/30</td>
            </tr></table>
        "#;
        assert_eq!(
            extract_expiry(&snap(html, ""), &today()),
            ExtractionResult::Found("2025/09/30".to_string())
        );
    }

    #[test]
    fn table_anchor_falls_back_to_today_when_alone() {
        let html = r#"<table><tr><th>利用期限</th><td>2025/06/10</td></tr></table>"#;
        assert_eq!(
            extract_expiry(&snap(html, ""), &today()),
            ExtractionResult::Found("2025/06/10".to_string())
        );
    }

    #[test]
    fn table_anchor_reads_definition_lists() {
        let html = r#"<dl><dt>利用期限</dt><dd>2025/08/15</dd></dl>"#;
        assert_eq!(
            extract_expiry(&snap(html, ""), &today()),
            ExtractionResult::Found("2025/08/15".to_string())
        );
    }

    #[test]
    fn leaf_scan_skips_today() {
        // Scenario B: no structural label, two leaf dates, one is today.
        let html = r#"
            <div><span>ログイン: 2025/06/10</span></div>
            <div><span>2024/12/25</span></div>
        "#;
        assert_eq!(
            extract_expiry(&snap(html, ""), &today()),
            ExtractionResult::Found("2024/12/25".to_string())
        );
    }

    #[test]
    fn leaf_scan_prefers_first_non_today() {
        // Distinguishes stage 2 (first non-today) from stage 3 (last
        // non-today): falling through would return 2026/02/02 instead.
        let html = r#"
            <p>2025/06/10</p>
            <p>2026/01/01</p>
            <p>2026/02/02</p>
        "#;
        assert_eq!(
            extract_expiry(&snap(html, ""), &today()),
            ExtractionResult::Found("2026/01/01".to_string())
        );
    }

    #[test]
    fn leaf_scan_falls_back_to_first_when_all_today() {
        let html = r#"<p>2025/06/10</p><p>2025-06-10</p>"#;
        assert_eq!(
            extract_expiry(&snap(html, ""), &today()),
            ExtractionResult::Found("2025/06/10".to_string())
        );
    }

    #[test]
    fn leaf_scan_ignores_script_bodies() {
        let html = r#"
            <script>var build = "2099/01/01";</script>
            <p>2025/04/01</p>
        "#;
        assert_eq!(
            extract_expiry(&snap(html, ""), &today()),
            ExtractionResult::Found("2025/04/01".to_string())
        );
    }

    #[test]
    fn whole_text_prefers_last_non_today() {
        // Scenario C: text-only snapshot, login stamp first, expiry later.
        let text = "ログイン日時 2025/06/10\nご利用期限 2026/01/05";
        assert_eq!(
            extract_expiry(&snap("", text), &today()),
            ExtractionResult::Found("2026/01/05".to_string())
        );
    }

    #[test]
    fn whole_text_single_match_returned_even_if_today() {
        let text = "最終ログイン 2025/06/10";
        assert_eq!(
            extract_expiry(&snap("", text), &today()),
            ExtractionResult::Found("2025/06/10".to_string())
        );
    }

    #[test]
    fn nested_frame_fallback_scans_in_document_order() {
        // Scenario D: nothing in the primary document, second frame hits.
        let snapshot = PageSnapshot {
            html: "<p>no dates</p>".to_string(),
            body_text: "no dates".to_string(),
            frame_texts: vec![
                "billing summary".to_string(),
                "期限 2025/09/09 まで".to_string(),
                "2030/01/01".to_string(),
            ],
        };
        assert_eq!(
            extract_expiry(&snapshot, &today()),
            ExtractionResult::Found("2025/09/09".to_string())
        );
    }

    #[test]
    fn no_candidate_anywhere_is_not_found() {
        let snapshot = PageSnapshot {
            html: "<p>hello</p>".to_string(),
            body_text: "hello".to_string(),
            frame_texts: vec!["nothing here".to_string()],
        };
        let result = extract_expiry(&snapshot, &today());
        assert_eq!(result, ExtractionResult::NotFound);
        assert_eq!(result.to_string(), "Not Found");
    }

    #[test]
    fn extraction_is_idempotent() {
        let snapshot = snap("<p>2025/03/01</p>", "2025/03/01");
        let first = extract_expiry(&snapshot, &today());
        let second = extract_expiry(&snapshot, &today());
        assert_eq!(first, second);
        assert_eq!(first, ExtractionResult::Found("2025/03/01".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_stops_at_first_found_snapshot() {
        use crate::browser::fake::FakePanel;

        let panel = FakePanel::with_snapshots(vec![
            PageSnapshot::default(),
            snap("<p>2025/03/01</p>", "2025/03/01"),
        ]);
        let result = extract_with_retry(&panel, &today()).await;
        assert_eq!(result, ExtractionResult::Found("2025/03/01".to_string()));
        assert_eq!(panel.snapshot_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_exhausts_attempts_then_reports_not_found() {
        use crate::browser::fake::FakePanel;

        let panel = FakePanel::with_snapshots(vec![PageSnapshot::default()]);
        let result = extract_with_retry(&panel, &today()).await;
        assert_eq!(result, ExtractionResult::NotFound);
        assert_eq!(panel.snapshot_calls(), EXTRACT_ATTEMPTS as usize);
    }
}
