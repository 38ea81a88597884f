//! Homework extraction from the rendered pupil-card page text.
//!
//! The page has no stable markup, so this works on `innerText` line by
//! line. A subject header opens a block, a two-word Hebrew line names the
//! teacher, and a "homework" line carries the assignment after its colon.
//! An assignment is emitted once both a subject and homework text are
//! known. Unexpected text is skipped, never an error.

use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use schoolwatch::HomeworkItem;

/// Subject names that open a lesson block.
const SUBJECTS: &[&str] = &[
    "מדע וטכנולוגיה",
    "חינוך גופני",
    "מתמטיקה",
    "חשבון",
    "גיאומטריה",
    "עברית",
    "שפה",
    "אנגלית",
    "מדעים",
    "מדע",
    "היסטוריה",
    "גאוגרפיה",
    "תנ\"ך",
    "ספרות",
    "אמנות",
    "מוזיקה",
];

/// "Homework".
const HOMEWORK_MARKER: &str = "שיעורי בית";

/// "Not entered", shown when a teacher left the field blank.
const NOT_ENTERED: &str = "לא הוזן";

fn lesson_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^שיעור \d+").expect("lesson regex is valid"))
}

fn teacher_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[א-ת]+['׳]?[א-ת]* [א-ת]+$").expect("teacher regex is valid"))
}

fn is_subject_line(line: &str) -> bool {
    SUBJECTS.iter().any(|s| line.starts_with(s))
}

/// Parse the page text into homework items dated `today`.
pub fn parse_page_text(text: &str, today: NaiveDate) -> Vec<HomeworkItem> {
    let mut items = Vec::new();
    let mut subject: Option<String> = None;
    let mut teacher: Option<String> = None;
    // Set when a homework marker had nothing after it; the next plain
    // line is taken as the assignment.
    let mut awaiting_body = false;

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if is_subject_line(line) {
            subject = Some(line.to_string());
            teacher = None;
            awaiting_body = false;
            continue;
        }

        if lesson_re().is_match(line) {
            awaiting_body = false;
            continue;
        }

        let mut body = None;
        if line.contains(HOMEWORK_MARKER) {
            match line.split_once(':') {
                Some((_, rest)) if !rest.trim().is_empty() => {
                    let rest = rest.trim();
                    awaiting_body = false;
                    if rest != NOT_ENTERED {
                        body = Some(rest.to_string());
                    }
                }
                _ => awaiting_body = true,
            }
        } else if awaiting_body {
            awaiting_body = false;
            if line != NOT_ENTERED {
                body = Some(line.to_string());
            }
        } else if teacher_re().is_match(line) {
            teacher = Some(line.to_string());
            continue;
        }

        if let (Some(body), Some(subject)) = (body, subject.as_deref()) {
            items.push(HomeworkItem::new(
                today,
                subject,
                teacher.as_deref().unwrap_or("Unknown"),
                body,
            ));
        }
    }

    tracing::debug!(count = items.len(), "parsed homework from page text");
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 10).unwrap()
    }

    #[test]
    fn test_parses_blocks() {
        let text = "\
מערכת שעות
מתמטיקה
שיעור 1
דנה כהן
שיעורי בית: עמוד 12 תרגילים 1-4
אנגלית
שיעור 2
ג'ון סמית
שיעורי בית: לא הוזן
מדע וטכנולוגיה
שיעור 3
רונית לוי
שיעורי בית:
להביא מחברת
";
        let items = parse_page_text(text, today());
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].subject, "מתמטיקה");
        assert_eq!(items[0].teacher, "דנה כהן");
        assert_eq!(items[0].body, "עמוד 12 תרגילים 1-4");
        assert_eq!(items[0].date, today());
        assert_eq!(items[1].subject, "מדע וטכנולוגיה");
        assert_eq!(items[1].teacher, "רונית לוי");
        assert_eq!(items[1].body, "להביא מחברת");
    }

    #[test]
    fn test_homework_without_subject_is_dropped() {
        let text = "שיעורי בית: לקרוא פרק 3\nמתמטיקה\n";
        assert!(parse_page_text(text, today()).is_empty());
    }

    #[test]
    fn test_missing_teacher_defaults() {
        let text = "עברית\nשיעורי בית: חיבור";
        let items = parse_page_text(text, today());
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].teacher, "Unknown");
    }

    #[test]
    fn test_garbage_never_panics() {
        let inputs = ["", ":::", "שיעורי בית", "\u{0}\u{202e}abc\n\n::\n", "מתמטיקה:"];
        for input in inputs {
            let _ = parse_page_text(input, today());
        }
    }
}
