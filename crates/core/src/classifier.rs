//! Category and tag derivation from a document's name and a sample of its text.
//!
//! Matching is a plain keyword count: transparent, deterministic and easy to
//! table-test. The classifier holds no state beyond its rule table.

use crate::models::DocumentMetadata;
use chrono::Utc;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::debug;

pub const DEFAULT_CATEGORY: &str = "general";
pub const SAMPLE_CHARS: usize = 2_000;

lazy_static! {
    static ref YEAR_TAG: Regex = Regex::new(r"20\d{2}").expect("year tag regex is valid");
    static ref VERSION_TAG: Regex =
        Regex::new(r"(?i)v(\d+(?:\.\d+)*)").expect("version tag regex is valid");
}

const BUILTIN_RULES: [(&str, &[&str]); 8] = [
    ("hr_policy", &["hr", "human resource", "employee", "leave", "benefits", "onboarding"]),
    ("it_policy", &["it", "security", "password", "network", "vpn", "software"]),
    ("finance", &["finance", "budget", "expense", "invoice", "procurement", "reimbursement"]),
    ("travel", &["travel", "trip", "flight", "hotel", "per diem", "booking"]),
    ("product", &["product", "feature", "specification", "release", "roadmap", "api"]),
    ("troubleshooting", &["troubleshoot", "error", "fix", "issue", "debug", "problem"]),
    ("meeting_notes", &["meeting", "minutes", "agenda", "action item", "standup"]),
    ("knowledge_base", &["how to", "guide", "tutorial", "faq", "instructions", "setup"]),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryRule {
    pub category: String,
    pub keywords: Vec<String>,
}

impl CategoryRule {
    pub fn new(category: impl Into<String>, keywords: &[&str]) -> Self {
        Self {
            category: category.into(),
            keywords: keywords.iter().map(|keyword| keyword.to_lowercase()).collect(),
        }
    }

    fn score(&self, haystack: &str) -> usize {
        self.keywords
            .iter()
            .filter(|keyword| haystack.contains(keyword.as_str()))
            .count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub category: String,
    pub tags: BTreeSet<String>,
}

#[derive(Debug, Clone)]
pub struct DocumentClassifier {
    rules: Vec<CategoryRule>,
}

impl DocumentClassifier {
    pub fn new(rules: Vec<CategoryRule>) -> Self {
        Self { rules }
    }

    pub fn classify(&self, file_name: &str, sample_text: &str) -> Classification {
        Classification {
            category: self.detect_category(file_name, sample_text),
            tags: extract_tags(file_name),
        }
    }

    /// Highest keyword count wins; ties go to the rule declared first and a
    /// zero score falls back to [`DEFAULT_CATEGORY`].
    pub fn detect_category(&self, file_name: &str, sample_text: &str) -> String {
        let name = file_name.to_lowercase().replace(['-', '_'], " ");
        let sample: String = sample_text.chars().take(SAMPLE_CHARS).collect();
        let haystack = format!("{name} {}", sample.to_lowercase());

        let mut best_category = DEFAULT_CATEGORY;
        let mut best_score = 0;
        for rule in &self.rules {
            let score = rule.score(&haystack);
            if score > best_score {
                best_score = score;
                best_category = &rule.category;
            }
        }

        debug!(file_name, category = best_category, score = best_score, "classified document");
        best_category.to_string()
    }
}

impl Default for DocumentClassifier {
    fn default() -> Self {
        Self::new(
            BUILTIN_RULES
                .iter()
                .map(|(category, keywords)| CategoryRule::new(*category, keywords))
                .collect(),
        )
    }
}

/// Classifies with the built-in keyword table.
pub fn classify(file_name: &str, sample_text: &str) -> Classification {
    DocumentClassifier::default().classify(file_name, sample_text)
}

/// `year:`, `version:` and `type:` tags found in the file name. Patterns that
/// do not occur produce no tag.
pub fn extract_tags(file_name: &str) -> BTreeSet<String> {
    let mut tags = BTreeSet::new();

    if let Some(year) = YEAR_TAG.find(file_name) {
        tags.insert(format!("year:{}", year.as_str()));
    }

    if let Some(version) = VERSION_TAG.captures(file_name).and_then(|captures| captures.get(1)) {
        tags.insert(format!("version:{}", version.as_str()));
    }

    if let Some(extension) = Path::new(file_name).extension().and_then(|ext| ext.to_str()) {
        if !extension.is_empty() {
            tags.insert(format!("type:{}", extension.to_lowercase()));
        }
    }

    tags
}

/// Assembles the per-document metadata, stamped with the current UTC time.
pub fn build_metadata(
    classifier: &DocumentClassifier,
    file_name: &str,
    file_path: &str,
    page_count: usize,
    chunk_count: usize,
    sample_text: &str,
    file_size_bytes: u64,
) -> DocumentMetadata {
    let Classification { category, tags } = classifier.classify(file_name, sample_text);

    DocumentMetadata {
        doc_name: file_name.to_string(),
        doc_path: file_path.to_string(),
        category,
        ingestion_date: Utc::now().to_rfc3339(),
        page_count,
        chunk_count,
        file_size_bytes,
        tags,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leave_policy_file_is_hr() {
        assert_eq!(classify("hr-leave-policy-003.md", "").category, "hr_policy");
    }

    #[test]
    fn unknown_documents_are_general() {
        let result = classify("zz-quarterly.txt", "Lorem ipsum dolor sumo.");
        assert_eq!(result.category, DEFAULT_CATEGORY);
    }

    #[test]
    fn builtin_table_maps_each_category() {
        let cases = [
            ("human_resource_handbook.pdf", "hr_policy"),
            ("vpn-password-rules.md", "it_policy"),
            ("expense-reimbursement.md", "finance"),
            ("hotel-booking-guide-for-travel.md", "travel"),
            ("product-roadmap.md", "product"),
            ("debug-error-log.txt", "troubleshooting"),
            ("weekly-meeting-minutes.md", "meeting_notes"),
            ("faq-tutorial.md", "knowledge_base"),
        ];

        for (file_name, expected) in cases {
            assert_eq!(
                DocumentClassifier::default().detect_category(file_name, ""),
                expected,
                "file {file_name}"
            );
        }
    }

    #[test]
    fn content_sample_contributes_to_the_score() {
        let text = "Submit every invoice and expense report before the budget review.";
        assert_eq!(classify("notes.md", text).category, "finance");
    }

    #[test]
    fn only_the_first_2000_chars_are_sampled() {
        let text = format!("{}invoice budget expense", "z".repeat(SAMPLE_CHARS));
        assert_eq!(classify("notes.md", &text).category, DEFAULT_CATEGORY);
    }

    #[test]
    fn ties_go_to_the_first_declared_category() {
        let classifier = DocumentClassifier::new(vec![
            CategoryRule::new("alpha", &["shared"]),
            CategoryRule::new("beta", &["shared"]),
        ]);
        assert_eq!(classifier.detect_category("shared.md", ""), "alpha");
    }

    #[test]
    fn strictly_higher_score_wins() {
        let classifier = DocumentClassifier::new(vec![
            CategoryRule::new("alpha", &["one"]),
            CategoryRule::new("beta", &["one", "two"]),
        ]);
        assert_eq!(classifier.detect_category("one-two.md", ""), "beta");
        assert_eq!(DocumentClassifier::new(Vec::new()).detect_category("x.md", ""), "general");
    }

    #[test]
    fn tags_come_from_the_file_name() {
        let tags = extract_tags("Travel-Policy-2024-V3.1.PDF");
        let expected: BTreeSet<String> = ["type:pdf", "version:3.1", "year:2024"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(tags, expected);
    }

    #[test]
    fn version_tags_ignore_case_and_take_the_first_match() {
        let tags = extract_tags("release-notes-V2.10-v3-2031.md");
        assert!(tags.contains("version:2.10"));
        assert!(!tags.contains("version:3"));
        assert!(tags.contains("year:2031"));
    }

    #[test]
    fn absent_patterns_produce_no_tags() {
        let tags = extract_tags("readme");
        assert!(tags.is_empty());
        assert_eq!(
            extract_tags("hr-leave-policy-003.md"),
            BTreeSet::from(["type:md".to_string()])
        );
    }

    #[test]
    fn metadata_carries_classification() {
        let metadata = build_metadata(
            &DocumentClassifier::default(),
            "hr-leave-policy-2025.md",
            "/docs/hr-leave-policy-2025.md",
            2,
            6,
            "All employees are entitled to annual leave.",
            1_024,
        );

        assert_eq!(metadata.category, "hr_policy");
        assert!(metadata.tags.contains("year:2025"));
        assert_eq!(metadata.page_count, 2);
        assert_eq!(metadata.chunk_count, 6);
        assert!(chrono::DateTime::parse_from_rfc3339(&metadata.ingestion_date).is_ok());
    }
}
