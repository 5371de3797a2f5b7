//! Heuristic extraction of key points, statistics, quotes and named entities
//! from search snippets. The Researcher feeds the result into its synthesis
//! prompt and derives a research-quality score and knowledge gaps from it.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

static SENTENCE_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?]+\s+").expect("valid regex"));
static STATISTIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\$[\d,]+(?:\.\d+)?(?:\s*(?:million|billion|thousand))?|\b\d+(?:\.\d+)?%|\b\d+(?:,\d{3})*(?:\.\d+)?\s*(?:million|billion|thousand)\b",
    )
    .expect("valid regex")
});
static QUOTE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"["“”]([^"“”]+)["“”]"#).expect("valid regex"));
static DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b\d{1,2}/\d{1,2}/\d{2,4}\b|\b\d{4}-\d{2}-\d{2}\b|\b(?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)[a-z]* \d{1,2},? \d{4}\b",
    )
    .expect("valid regex")
});
static NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Z][a-z]+(?:\s+[A-Z][a-z]+)+\b").expect("valid regex"));

const MAX_KEY_POINTS: usize = 10;
const MIN_SENTENCE_CHARS: usize = 20;
const MIN_QUOTE_CHARS: usize = 10;
const MAX_NAMES: usize = 10;
/// Characters of context kept on each side of a statistic.
const STAT_CONTEXT_CHARS: usize = 30;

const SIGNAL_WORDS: &[&str] = &[
    "important", "significant", "key", "critical", "essential", "shows", "demonstrates",
    "reveals", "indicates", "suggests", "according to", "research", "study", "found",
    "discovered",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Category {
    Statistic,
    Quote,
    Contrast,
    Conclusion,
    Enumeration,
    Question,
    General,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Statistic => "statistic",
            Self::Quote => "quote",
            Self::Contrast => "contrast",
            Self::Conclusion => "conclusion",
            Self::Enumeration => "enumeration",
            Self::Question => "question",
            Self::General => "general",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct KeyPoint {
    pub text: String,
    pub category: Category,
    /// In `[0, 1]`.
    pub importance: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Statistic {
    pub value: String,
    pub context: String,
}

/// Everything pulled out of one batch of search results.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Extraction {
    /// Most important first.
    pub key_points: Vec<KeyPoint>,
    pub statistics: Vec<Statistic>,
    pub quotes: Vec<String>,
    pub dates: Vec<String>,
    /// Multi-word capitalised phrases (people, organisations, places).
    pub names: Vec<String>,
}

impl Extraction {
    pub(crate) fn from_text(text: &str) -> Self {
        Self {
            key_points: key_points(text),
            statistics: statistics(text),
            quotes: quotes(text),
            dates: unique(DATE.find_iter(text).map(|m| m.as_str().to_string()), usize::MAX),
            names: unique(NAME.find_iter(text).map(|m| m.as_str().to_string()), MAX_NAMES),
        }
    }

    /// The "extracted information" block of the synthesis prompt.
    pub(crate) fn render_context(&self) -> String {
        let mut parts = Vec::new();
        if !self.key_points.is_empty() {
            parts.push("Key Points:".to_string());
            for (i, point) in self.key_points.iter().take(5).enumerate() {
                parts.push(format!("{}. [{}] {}", i + 1, point.category, point.text));
            }
        }
        if !self.statistics.is_empty() {
            parts.push("\nStatistics:".to_string());
            for stat in self.statistics.iter().take(5) {
                parts.push(format!("- {}: {}", stat.value, stat.context));
            }
        }
        if !self.quotes.is_empty() {
            parts.push("\nRelevant Quotes:".to_string());
            for quote in self.quotes.iter().take(3) {
                parts.push(format!("- \"{quote}\""));
            }
        }
        if !self.names.is_empty() || !self.dates.is_empty() {
            parts.push("\nEntities:".to_string());
            if !self.names.is_empty() {
                parts.push(format!("- Names: {}", self.names.join(", ")));
            }
            if !self.dates.is_empty() {
                parts.push(format!("- Dates: {}", self.dates.join(", ")));
            }
        }
        parts.join("\n")
    }

    /// Research quality in `[0, 1]` from extraction yield, source credibility
    /// and synthesis length.
    pub(crate) fn research_quality(&self, credibility: f64, synthesis_chars: usize) -> f64 {
        let mut score = (self.key_points.len() as f64 * 0.05).min(0.3)
            + (self.statistics.len() as f64 * 0.05).min(0.2)
            + credibility.clamp(0.0, 1.0) * 0.3;
        if synthesis_chars > 500 {
            score += 0.2;
        }
        score.min(1.0)
    }

    pub(crate) fn knowledge_gaps(&self) -> Vec<&'static str> {
        let mut gaps = Vec::new();
        if self.statistics.is_empty() {
            gaps.push("No statistical data found");
        }
        if self.quotes.is_empty() {
            gaps.push("No expert quotes or citations");
        }
        if self.key_points.len() < 5 {
            gaps.push("Limited key insights extracted");
        }
        gaps
    }
}

fn sentences(text: &str) -> Vec<&str> {
    SENTENCE_BREAK
        .split(text)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn key_points(text: &str) -> Vec<KeyPoint> {
    let sentences = sentences(text);
    let total = sentences.len();
    let mut points: Vec<KeyPoint> = sentences
        .iter()
        .enumerate()
        .filter(|(_, s)| s.chars().count() >= MIN_SENTENCE_CHARS)
        .map(|(i, s)| KeyPoint {
            text: s.to_string(),
            category: categorize(s),
            importance: importance(s, i, total),
        })
        .collect();
    points.sort_by(|a, b| b.importance.total_cmp(&a.importance));
    points.truncate(MAX_KEY_POINTS);
    points
}

fn importance(sentence: &str, position: usize, total: usize) -> f64 {
    let mut score = 0.0;
    if STATISTIC.is_match(sentence) {
        score += 0.3;
    }
    if QUOTE.is_match(sentence) {
        score += 0.2;
    }
    match sentence.chars().count() {
        50..=150 => score += 0.2,
        151..=200 => score += 0.1,
        _ => {}
    }
    if position < 3 || position + 3 >= total {
        score += 0.2;
    }
    let lower = sentence.to_lowercase();
    let signals = SIGNAL_WORDS.iter().filter(|w| lower.contains(*w)).count();
    score += (signals as f64 * 0.1).min(0.3);
    score.min(1.0)
}

fn categorize(sentence: &str) -> Category {
    let lower = sentence.to_lowercase();
    let any = |words: &[&str]| words.iter().any(|w| lower.contains(w));
    if STATISTIC.is_match(sentence) {
        Category::Statistic
    } else if QUOTE.is_match(sentence) {
        Category::Quote
    } else if any(&["however", "but", "although", "despite"]) {
        Category::Contrast
    } else if any(&["therefore", "thus", "consequently", "as a result"]) {
        Category::Conclusion
    } else if any(&["first", "second", "third", "finally"]) {
        Category::Enumeration
    } else if sentence.contains('?') {
        Category::Question
    } else {
        Category::General
    }
}

fn statistics(text: &str) -> Vec<Statistic> {
    let mut found: Vec<Statistic> = Vec::new();
    for m in STATISTIC.find_iter(text) {
        let before: String = {
            let head = &text[..m.start()];
            let skip = head.chars().count().saturating_sub(STAT_CONTEXT_CHARS);
            head.chars().skip(skip).collect()
        };
        let after: String = text[m.end()..].chars().take(STAT_CONTEXT_CHARS).collect();
        let window = format!("{before}{}{after}", m.as_str());
        let stat = Statistic {
            value: m.as_str().to_string(),
            context: window.split_whitespace().collect::<Vec<_>>().join(" "),
        };
        if !found.contains(&stat) {
            found.push(stat);
        }
    }
    found
}

fn quotes(text: &str) -> Vec<String> {
    unique(
        QUOTE
            .captures_iter(text)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|q| q.chars().count() > MIN_QUOTE_CHARS),
        usize::MAX,
    )
}

/// First `max` distinct items in order of appearance.
fn unique(items: impl Iterator<Item = String>, max: usize) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        if out.len() == max {
            break;
        }
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SNIPPETS: &str = "\
Transformers now power 90% of new NLP systems, according to a 2023 survey. \
Training GPT-3 reportedly cost $4.6 million in compute. \
\"Attention is all you need,\" wrote Ashish Vaswani and colleagues at Google Brain. \
However, recurrent networks remain common on small devices. \
The architecture was published on June 12, 2017 by researchers in Mountain View.";

    #[test]
    fn pulls_statistics_with_context() {
        let extraction = Extraction::from_text(SNIPPETS);
        let values: Vec<&str> = extraction.statistics.iter().map(|s| s.value.as_str()).collect();
        assert_eq!(values, ["90%", "$4.6 million"]);
        assert!(extraction.statistics[0].context.contains("Transformers now power 90%"));
    }

    #[test]
    fn pulls_quotes_and_names() {
        let extraction = Extraction::from_text(SNIPPETS);
        assert_eq!(extraction.quotes, ["Attention is all you need,"]);
        assert!(extraction.names.contains(&"Ashish Vaswani".to_string()));
        assert!(extraction.names.contains(&"Google Brain".to_string()));
        assert_eq!(extraction.dates, ["June 12, 2017"]);
    }

    #[test]
    fn ranks_informative_sentences_first() {
        let extraction = Extraction::from_text(SNIPPETS);
        let top = &extraction.key_points[0];
        assert_eq!(top.category, Category::Statistic);
        assert!(top.text.starts_with("Transformers now power 90%"));
        assert!(extraction
            .key_points
            .iter()
            .any(|p| p.category == Category::Contrast));
        assert!(extraction.key_points.windows(2).all(|w| w[0].importance >= w[1].importance));
    }

    #[test]
    fn short_fragments_are_not_key_points() {
        let extraction = Extraction::from_text("Too short. Also brief! Tiny?");
        assert!(extraction.key_points.is_empty());
    }

    #[test]
    fn gaps_and_quality_reflect_yield() {
        let empty = Extraction::default();
        assert_eq!(
            empty.knowledge_gaps(),
            [
                "No statistical data found",
                "No expert quotes or citations",
                "Limited key insights extracted"
            ]
        );
        assert!((empty.research_quality(1.0, 600) - 0.5).abs() < 1e-9);

        let rich = Extraction::from_text(SNIPPETS);
        assert!(rich.knowledge_gaps().is_empty());
        // 5 key points, 2 statistics, credibility 0.5, short synthesis.
        assert!((rich.research_quality(0.5, 100) - (0.25 + 0.1 + 0.15)).abs() < 1e-9);
    }

    #[test]
    fn context_lists_each_section() {
        let context = Extraction::from_text(SNIPPETS).render_context();
        assert!(context.starts_with("Key Points:\n1. [statistic]"));
        assert!(context.contains("\nStatistics:\n- 90%:"));
        assert!(context.contains("\nRelevant Quotes:\n- \"Attention is all you need,\""));
        assert!(context.contains("- Names: "));
    }
}
