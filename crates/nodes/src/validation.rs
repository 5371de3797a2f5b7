//! Automated content checks used by the Reviewer, and source credibility
//! heuristics used by the Researcher.
//!
//! [`ContentValidator::validate`] averages up to five sub-scores:
//!
//! | Check | Score |
//! |-------|-------|
//! | length | 0.3 below the minimum, 0.8 above the maximum, else 1.0 |
//! | structure | 0.4 with fewer than 3 paragraphs, else 0.6 + 0.2 (intro) + 0.2 (conclusion) |
//! | readability | 1.0 minus penalties for long/short average and very long sentences |
//! | citations | 0.3 with none, 0.7 below 0.5 per 100 words, else 1.0 |
//! | alignment | capitalised-term overlap with the research (only when research is given) |

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use pipeline::ReviewConfig;

static SENTENCE_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?]+").expect("valid regex"));

static CITATION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\[\d+\]",
        r"\([\w\s]+,?\s+\d{4}\)",
        r"(?i)according to",
        r"(?i)research shows",
        r"(?i)study found",
        r"https?://\S+",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

static CAPITALISED_TERM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Z][a-z]+\b").expect("valid regex"));

const INTRO_MARKERS: &[&str] = &["introduction", "overview", "in this", "this article", "this post"];
const CONCLUSION_MARKERS: &[&str] = &["conclusion", "summary", "in conclusion", "to summarize", "overall"];

/// Outcome of [`ContentValidator::validate`].
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    /// Mean of the sub-scores, in `[0, 1]`.
    pub score: f64,
    /// Problems that count against approval.
    pub issues: Vec<String>,
    /// Observations that do not count as issues.
    pub warnings: Vec<String>,
    /// Improvement suggestions.
    pub suggestions: Vec<String>,
}

/// Heuristic quality checks on a draft.
#[derive(Debug, Clone)]
pub struct ContentValidator {
    min_word_count: usize,
    max_word_count: usize,
}

impl Default for ContentValidator {
    fn default() -> Self {
        Self::new(&ReviewConfig::default())
    }
}

impl ContentValidator {
    pub fn new(config: &ReviewConfig) -> Self {
        Self {
            min_word_count: config.min_word_count,
            max_word_count: config.max_word_count,
        }
    }

    /// Runs every check on `content`; `research` enables the alignment check.
    pub fn validate(&self, content: &str, research: Option<&str>) -> ValidationResult {
        let mut result = ValidationResult {
            score: 0.0,
            issues: Vec::new(),
            warnings: Vec::new(),
            suggestions: Vec::new(),
        };

        let mut scores = vec![
            self.check_length(content, &mut result),
            check_structure(content, &mut result),
            check_readability(content, &mut result),
            check_citations(content, &mut result),
        ];
        if let Some(research) = research.filter(|r| !r.trim().is_empty()) {
            scores.push(check_alignment(content, research, &mut result));
        }

        result.score = scores.iter().sum::<f64>() / scores.len() as f64;
        result
    }

    fn check_length(&self, content: &str, result: &mut ValidationResult) -> f64 {
        let words = content.split_whitespace().count();
        if words < self.min_word_count {
            result.issues.push(format!(
                "Content too short: {words} words (minimum: {})",
                self.min_word_count
            ));
            0.3
        } else if words > self.max_word_count {
            result.warnings.push(format!(
                "Content very long: {words} words (maximum: {})",
                self.max_word_count
            ));
            0.8
        } else {
            1.0
        }
    }
}

fn check_structure(content: &str, result: &mut ValidationResult) -> f64 {
    let paragraphs: Vec<&str> = content
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if paragraphs.len() < 3 {
        result
            .issues
            .push("Content lacks proper structure (needs at least 3 paragraphs)".into());
        return 0.4;
    }

    let mut score = 0.6;
    let first = paragraphs[0].to_lowercase();
    if INTRO_MARKERS.iter().any(|m| first.contains(m)) {
        score += 0.2;
    } else {
        result.warnings.push("No clear introduction detected".into());
    }
    let last = paragraphs[paragraphs.len() - 1].to_lowercase();
    if CONCLUSION_MARKERS.iter().any(|m| last.contains(m)) {
        score += 0.2;
    } else {
        result.warnings.push("No clear conclusion detected".into());
    }
    score
}

fn check_readability(content: &str, result: &mut ValidationResult) -> f64 {
    let lengths: Vec<usize> = SENTENCE_END
        .split(content)
        .map(|s| s.split_whitespace().count())
        .filter(|&n| n > 0)
        .collect();
    if lengths.is_empty() {
        return 0.0;
    }

    let average = lengths.iter().sum::<usize>() as f64 / lengths.len() as f64;
    let mut score: f64 = 1.0;
    if average > 25.0 {
        result
            .warnings
            .push(format!("Average sentence length is high ({average:.1} words)"));
        result
            .suggestions
            .push("Consider breaking long sentences into shorter ones".into());
        score -= 0.2;
    } else if average < 8.0 {
        result
            .warnings
            .push(format!("Average sentence length is low ({average:.1} words)"));
        result
            .suggestions
            .push("Consider combining some short sentences for better flow".into());
        score -= 0.1;
    }

    let very_long = lengths.iter().filter(|&&n| n > 40).count();
    if very_long > 0 {
        result
            .warnings
            .push(format!("Found {very_long} very long sentences (>40 words)"));
        score -= 0.1;
    }
    score.max(0.0)
}

fn check_citations(content: &str, result: &mut ValidationResult) -> f64 {
    let count: usize = CITATION_PATTERNS
        .iter()
        .map(|re| re.find_iter(content).count())
        .sum();
    if count == 0 {
        result.issues.push("No citations or sources found".into());
        result
            .suggestions
            .push("Add references to support claims".into());
        return 0.3;
    }

    let words = content.split_whitespace().count().max(1) as f64;
    let per_hundred = count as f64 / (words / 100.0);
    if per_hundred < 0.5 {
        result
            .suggestions
            .push("Consider adding more citations to support claims".into());
        0.7
    } else {
        1.0
    }
}

fn capitalised_terms(text: &str) -> HashSet<&str> {
    CAPITALISED_TERM.find_iter(text).map(|m| m.as_str()).collect()
}

fn check_alignment(content: &str, research: &str, result: &mut ValidationResult) -> f64 {
    let research_terms = capitalised_terms(research);
    if research_terms.is_empty() {
        return 0.8;
    }
    let content_terms = capitalised_terms(content);
    let overlap =
        research_terms.intersection(&content_terms).count() as f64 / research_terms.len() as f64;
    if overlap < 0.3 {
        result
            .issues
            .push("Content may not align well with research data".into());
        0.5
    } else if overlap < 0.5 {
        0.7
    } else {
        1.0
    }
}

// ---------------------------------------------------------------------------
// Source credibility
// ---------------------------------------------------------------------------

const TRUSTED_DOMAINS: &[&str] = &[
    ".edu", ".gov", ".org", "wikipedia.org", "arxiv.org", "nature.com", "science.org",
    "nytimes.com", "wsj.com", "reuters.com", "bbc.com",
];

/// Credibility summary of a source list.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceCredibility {
    pub total: usize,
    pub https: usize,
    pub trusted: usize,
    /// `0.4 * https share + 0.6 * trusted share`.
    pub score: f64,
    pub warnings: Vec<String>,
}

/// Scores source URLs by HTTPS use and domain reputation.
pub fn assess_sources(sources: &[String]) -> SourceCredibility {
    let mut assessment = SourceCredibility {
        total: sources.len(),
        https: 0,
        trusted: 0,
        score: 0.0,
        warnings: Vec::new(),
    };
    if sources.is_empty() {
        assessment.warnings.push("No sources provided".into());
        return assessment;
    }

    for url in sources {
        let Some((scheme, rest)) = url.split_once("://") else {
            assessment.warnings.push(format!("Invalid URL: {url}"));
            continue;
        };
        if scheme.eq_ignore_ascii_case("https") {
            assessment.https += 1;
        } else {
            assessment.warnings.push(format!("Non-HTTPS source: {url}"));
        }
        let host = rest.split(['/', '?', '#']).next().unwrap_or_default().to_lowercase();
        if TRUSTED_DOMAINS.iter().any(|d| host.contains(d)) {
            assessment.trusted += 1;
        }
    }

    let total = sources.len() as f64;
    assessment.score = 0.4 * assessment.https as f64 / total + 0.6 * assessment.trusted as f64 / total;
    assessment
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paragraph(words: usize, seed: &str) -> String {
        let sentence = format!("{seed} explains how Transformers changed language modelling today.");
        let per = sentence.split_whitespace().count();
        vec![sentence; words.div_ceil(per)].join(" ")
    }

    fn good_article() -> String {
        format!(
            "In this article we give an overview of Transformers [1].\n\n{}\n\n{}\n\nIn conclusion, Attention matters [2].",
            paragraph(80, "Research"),
            paragraph(80, "According to Vaswani, attention")
        )
    }

    #[test]
    fn short_unstructured_text_scores_low() {
        let result = ContentValidator::default().validate("Too short.", None);
        assert!(result.issues.iter().any(|i| i.contains("too short")));
        assert!(result.issues.iter().any(|i| i.contains("structure")));
        assert!(result.issues.iter().any(|i| i.contains("No citations")));
        assert!(result.score < 0.6);
    }

    #[test]
    fn structured_cited_article_passes() {
        let result = ContentValidator::default().validate(&good_article(), None);
        assert!(result.issues.is_empty(), "unexpected issues: {:?}", result.issues);
        assert!(result.score > 0.9);
    }

    #[test]
    fn alignment_flags_unrelated_research() {
        let research = "Photosynthesis Chlorophyll Mitochondria Ribosome Enzyme Glucose";
        let result = ContentValidator::default().validate(&good_article(), Some(research));
        assert!(result
            .issues
            .iter()
            .any(|i| i.contains("align well with research")));
    }

    #[test]
    fn alignment_accepts_matching_research() {
        let research = "Transformers rely on Attention, as shown by Vaswani.";
        let result = ContentValidator::default().validate(&good_article(), Some(research));
        assert!(result.issues.is_empty());
    }

    #[test]
    fn long_sentences_are_penalised() {
        let mut result = ValidationResult {
            score: 0.0,
            issues: vec![],
            warnings: vec![],
            suggestions: vec![],
        };
        let sentence = vec!["word"; 45].join(" ") + ".";
        let score = check_readability(&sentence, &mut result);
        assert!((score - 0.7).abs() < 1e-9);
        assert_eq!(result.warnings.len(), 2);
    }

    #[test]
    fn source_credibility_weights_https_and_trust() {
        let sources = vec![
            "https://en.wikipedia.org/wiki/Transformer".to_string(),
            "http://example.com/post".to_string(),
        ];
        let assessment = assess_sources(&sources);
        assert_eq!(assessment.https, 1);
        assert_eq!(assessment.trusted, 1);
        assert!((assessment.score - 0.5).abs() < 1e-9);
        assert!(assessment.warnings.iter().any(|w| w.contains("Non-HTTPS")));
    }
}
