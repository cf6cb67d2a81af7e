//! Bytes + content-type → structured decision record.
//!
//! HTML is stripped of tags with a tolerant regex pass; PDF is decoded
//! page-by-page with `pdf-extract` and falls through to the same
//! text-pattern extractors HTML uses. Every extractor is best-effort:
//! a missing field is `None`, never an error — only a fully unreadable
//! input yields the empty structure with confidence 0.0.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Html,
    Pdf,
}

impl ContentKind {
    pub fn from_content_type(content_type: &str) -> Self {
        if content_type.to_ascii_lowercase().contains("pdf") {
            ContentKind::Pdf
        } else {
            ContentKind::Html
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ContentKind::Pdf => "pdf",
            ContentKind::Html => "html",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SectionKind {
    Facts,
    Claims,
    Arguments,
    LawReferences,
    CourtReasoning,
    Decision,
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedSection {
    pub kind: SectionKind,
    pub order_index: i32,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedAmount {
    pub value: f64,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ParsedParties {
    pub plaintiff: Vec<String>,
    pub defendant: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedDocument {
    pub court: Option<String>,
    pub judge: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub case_number: Option<String>,
    pub parties: ParsedParties,
    pub law_references: Vec<String>,
    pub decision: Option<String>,
    pub amounts: Vec<ParsedAmount>,
    pub sections: Vec<ParsedSection>,
    pub confidence: f32,
}

impl ParsedDocument {
    fn empty() -> Self {
        Self {
            court: None,
            judge: None,
            date: None,
            case_number: None,
            parties: ParsedParties::default(),
            law_references: Vec::new(),
            decision: None,
            amounts: Vec::new(),
            sections: Vec::new(),
            confidence: 0.0,
        }
    }
}

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").unwrap());
static CASE_NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)справа\s*№?\s*(\d+[/-]\d+[/-]\d+)").unwrap());
static COURT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([А-ЯІЇЄҐ][а-яіїєґ'\s]+(?:суд|трибунал))").unwrap());
static JUDGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Суддя[:\s]+([А-ЯІЇЄҐ][а-яіїєґ]+\s+[А-ЯІЇЄҐ]\.[А-ЯІЇЄҐ]\.)").unwrap());
static DATE_DOTTED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{2})\.(\d{2})\.(\d{4})\b").unwrap());
static DATE_ISO_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").unwrap());
static LAW_REF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)ст\.\s*(\d+)\s+([А-ЯІЇЄҐ]+)").unwrap());
static AMOUNT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d[\d\s]*[.,]?\d*)\s*(грн|UAH|USD|EUR)").unwrap());

const DECISION_KEYWORDS: &[&str] = &["вирішив", "ухвалив", "постановив"];
const SECTION_KEYWORDS: &[(&str, SectionKind)] = &[
    ("обставини справи", SectionKind::Facts),
    ("позовні вимоги", SectionKind::Claims),
    ("доводи сторін", SectionKind::Arguments),
    ("нормативно-правові акти", SectionKind::LawReferences),
    ("мотивувальна частина", SectionKind::CourtReasoning),
    ("резолютивна частина", SectionKind::Decision),
];

/// Parses raw bytes into a structured record. Never returns `Err`; a
/// fully unreadable input yields [`ParsedDocument::empty`] instead.
pub fn parse(bytes: &[u8], content_type: &str, _url: &str) -> ParsedDocument {
    let kind = ContentKind::from_content_type(content_type);
    let text = match kind {
        ContentKind::Html => strip_html(bytes),
        ContentKind::Pdf => extract_pdf_text(bytes),
    };

    let Some(text) = text else { return ParsedDocument::empty() };
    if text.trim().is_empty() {
        return ParsedDocument::empty();
    }

    parse_text(&text)
}

fn strip_html(bytes: &[u8]) -> Option<String> {
    let raw = String::from_utf8_lossy(bytes);
    let no_tags = TAG_RE.replace_all(&raw, " ");
    let normalized = WS_RE.replace_all(&no_tags, " ");
    Some(normalized.trim().to_string())
}

fn extract_pdf_text(bytes: &[u8]) -> Option<String> {
    pdf_extract::extract_text_from_mem(bytes).ok()
}

fn parse_text(text: &str) -> ParsedDocument {
    let court = extract_court(text);
    let judge = extract_judge(text);
    let date = extract_date(text);
    let case_number = extract_case_number(text);
    let parties = extract_parties(text);
    let law_references = extract_law_references(text);
    let decision = extract_decision(text);
    let amounts = extract_amounts(text);
    let sections = split_into_sections(text);
    let confidence = calculate_confidence(&court, &judge, &date);

    ParsedDocument {
        court,
        judge,
        date,
        case_number,
        parties,
        law_references,
        decision,
        amounts,
        sections,
        confidence,
    }
}

fn extract_case_number(text: &str) -> Option<String> {
    CASE_NUMBER_RE.captures(text).map(|c| c[1].to_string())
}

fn extract_court(text: &str) -> Option<String> {
    COURT_RE.captures(text).map(|c| c[1].trim().to_string())
}

fn extract_judge(text: &str) -> Option<String> {
    JUDGE_RE.captures(text).map(|c| c[1].to_string())
}

fn extract_date(text: &str) -> Option<DateTime<Utc>> {
    if let Some(c) = DATE_DOTTED_RE.captures(text) {
        let (day, month, year) = (c[1].parse().ok()?, c[2].parse().ok()?, c[3].parse().ok()?);
        return NaiveDate::from_ymd_opt(year, month, day).map(|d| Utc.from_utc_datetime(&d.and_hms_opt(0, 0, 0).unwrap()));
    }
    if let Some(c) = DATE_ISO_RE.captures(text) {
        let (year, month, day) = (c[1].parse().ok()?, c[2].parse().ok()?, c[3].parse().ok()?);
        return NaiveDate::from_ymd_opt(year, month, day).map(|d| Utc.from_utc_datetime(&d.and_hms_opt(0, 0, 0).unwrap()));
    }
    None
}

/// Placeholder, matching the source system: party extraction from free
/// text is not yet reliable enough to populate these lists.
fn extract_parties(_text: &str) -> ParsedParties {
    ParsedParties::default()
}

fn extract_law_references(text: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut refs = Vec::new();
    for c in LAW_REF_RE.captures_iter(text) {
        let normalized = format!("{} {}", c[2].to_uppercase(), &c[1]);
        if seen.insert(normalized.clone()) {
            refs.push(normalized);
        }
    }
    refs
}

fn extract_decision(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    let start = DECISION_KEYWORDS.iter().find_map(|kw| lower.find(kw))?;
    let tail = &text[start..];
    let collected: String = tail.lines().take(20).collect::<Vec<_>>().join(" ");
    Some(collected.trim().to_string())
}

fn extract_amounts(text: &str) -> Vec<ParsedAmount> {
    AMOUNT_RE
        .captures_iter(text)
        .filter_map(|c| {
            let raw = c[1].replace(' ', "").replace(',', ".");
            raw.parse::<f64>().ok().map(|value| ParsedAmount { value, currency: c[2].to_uppercase() })
        })
        .collect()
}

fn split_into_sections(text: &str) -> Vec<ParsedSection> {
    let mut sections = Vec::new();
    let mut current_kind = SectionKind::Text;
    let mut current_lines: Vec<&str> = Vec::new();
    let mut order_index = 0;

    let flush = |kind: SectionKind, lines: &mut Vec<&str>, order_index: &mut i32, sections: &mut Vec<ParsedSection>| {
        if lines.is_empty() {
            return;
        }
        let joined = lines.join("\n").trim().to_string();
        if !joined.is_empty() {
            sections.push(ParsedSection { kind, order_index: *order_index, text: joined });
            *order_index += 1;
        }
        lines.clear();
    };

    for line in text.lines() {
        let lower = line.to_lowercase();
        if let Some((_, kind)) = SECTION_KEYWORDS.iter().find(|(kw, _)| lower.contains(kw)) {
            flush(current_kind, &mut current_lines, &mut order_index, &mut sections);
            current_kind = *kind;
        }
        current_lines.push(line);
    }
    flush(current_kind, &mut current_lines, &mut order_index, &mut sections);
    sections
}

fn calculate_confidence(court: &Option<String>, judge: &Option<String>, date: &Option<DateTime<Utc>>) -> f32 {
    let mut score = 0.0;
    if court.is_some() {
        score += 0.3;
    }
    if judge.is_some() {
        score += 0.3;
    }
    if date.is_some() {
        score += 0.4;
    }
    score.min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_is_zero_when_all_fields_absent() {
        let doc = parse(b"<html><body>nothing useful here</body></html>", "text/html", "http://x");
        assert_eq!(doc.confidence, 0.0);
        assert!(doc.court.is_none());
        assert!(doc.judge.is_none());
    }

    #[test]
    fn confidence_is_one_when_court_judge_and_date_present() {
        let html = "<html><body>Справа № 123/456/2024 розглянута Господарський суд. Суддя: Іванов І.І. Дата прийняття 01.01.2024.</body></html>";
        let doc = parse(html.as_bytes(), "text/html", "http://x");
        assert!(doc.court.is_some());
        assert!(doc.judge.is_some());
        assert!(doc.date.is_some());
        assert_eq!(doc.confidence, 1.0);
        assert_eq!(doc.case_number.as_deref(), Some("123/456/2024"));
    }

    #[test]
    fn section_order_matches_input_order() {
        let html = "обставини справи\nblock one\nрезолютивна частина\nblock two";
        let doc = parse(html.as_bytes(), "text/html", "http://x");
        let indices: Vec<i32> = doc.sections.iter().map(|s| s.order_index).collect();
        let sorted = {
            let mut v = indices.clone();
            v.sort();
            v
        };
        assert_eq!(indices, sorted);
    }

    #[test]
    fn law_references_are_deduplicated() {
        let text = "ст. 15 ЦК ст. 15 ЦК ст. 20 КПК";
        let refs = extract_law_references(text);
        assert_eq!(refs, vec!["ЦК 15".to_string(), "КПК 20".to_string()]);
    }

    #[test]
    fn empty_bytes_yield_empty_structure() {
        let doc = parse(b"", "text/html", "http://x");
        assert_eq!(doc.confidence, 0.0);
        assert!(doc.sections.is_empty());
    }
}
