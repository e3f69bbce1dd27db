//! Two-stage query classification.
//!
//! Stage 1 is a fixed table of case-insensitive patterns, one group per
//! intent, each pattern carrying a base confidence. Stage 2 asks a
//! [`Completer`] for a label when stage 1 is unsure. Classification never
//! fails: any fallback problem leaves the stage-1 result in place.

use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};

use finsight_models::config::ClassifierConfig;
use finsight_models::intent::{ClassificationResult, ClassificationStage, QueryIntent};
use regex::Regex;
use tracing::{debug, warn};

use crate::completion::{CompletionRequest, Completer};
use crate::parser::parse_intent_reply;
use crate::prompts::{classifier_system_prompt, classifier_user_prompt, CLASSIFIER_MAX_TOKENS};

/// Added to the winning confidence when tickers are present and the intent
/// is ticker-relevant.
pub const TICKER_BOOST: f32 = 0.1;

const TICKER_STOPWORDS: &[&str] = &[
    "I", "A", "THE", "AND", "OR", "IS", "IT", "TO", "IN", "ON", "FOR",
];

const CRYPTO_TICKERS: &[&str] = &[
    "BTC", "ETH", "SOL", "XRP", "ADA", "DOGE", "DOT", "AVAX", "MATIC", "LINK", "UNI", "ATOM", "LTC",
    "BCH", "ALGO",
];

static TICKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Z]{1,5})\b|\$([A-Za-z]{1,5})\b").expect("valid ticker regex")
});

struct IntentPattern {
    regex: Regex,
    confidence: f32,
}

static INTENT_PATTERNS: LazyLock<Vec<(QueryIntent, Vec<IntentPattern>)>> = LazyLock::new(|| {
    let table: &[(QueryIntent, &[(&str, f32)])] = &[
        (
            QueryIntent::PriceOnly,
            &[
                (r"\b(price|quote)\b", 0.9),
                (r"\b(how much|worth)\b", 0.7),
                (r"\bcurrent\s+price\b", 0.95),
            ],
        ),
        (
            QueryIntent::TickerInfo,
            &[
                (r"\b(info|about|details)\b", 0.8),
                (r"\btell me about\b", 0.85),
                (r"\bwhat is\s+[A-Z]{1,5}\b", 0.8),
            ],
        ),
        (
            QueryIntent::NewsSummary,
            &[
                (r"\b(news|headlines)\b", 0.9),
                (r"\b(latest|recent)\b", 0.6),
                (r"\bwhat.+happening\b", 0.7),
            ],
        ),
        (
            QueryIntent::TradeDecision,
            &[
                (r"\b(should i|buy|sell|hold)\b", 0.85),
                (r"\b(recommend|analysis|analyze)\b", 0.8),
                (r"\b(invest|position)\b", 0.75),
                (r"\bgood time\b", 0.7),
            ],
        ),
        (
            QueryIntent::UserHistory,
            &[
                (r"\b(what did i|my previous)\b", 0.9),
                (r"\b(earlier|before)\b", 0.6),
                (r"\b(history|past)\s+decisions?\b", 0.85),
            ],
        ),
        (
            QueryIntent::UserPreferences,
            &[
                (r"\b(my preferences?|i prefer)\b", 0.9),
                (r"\brisk tolerance\b", 0.95),
                (r"\b(my style|trading style)\b", 0.85),
                (r"\bwhat do i like\b", 0.8),
            ],
        ),
        (
            QueryIntent::SemanticSearch,
            &[
                (r"\b(similar|like|find)\b", 0.7),
                (r"\b(related|compare)\b", 0.7),
                (r"\b(search|look for)\b", 0.65),
            ],
        ),
        (
            QueryIntent::Conversation,
            &[
                (r"\b(you said|we discussed)\b", 0.85),
                (r"\b(continue|more)\b", 0.6),
                (r"\b(explain|elaborate)\b", 0.65),
            ],
        ),
    ];

    table
        .iter()
        .map(|(intent, patterns)| {
            let compiled = patterns
                .iter()
                .map(|(pattern, confidence)| IntentPattern {
                    regex: Regex::new(&format!("(?i){pattern}")).expect("valid intent regex"),
                    confidence: *confidence,
                })
                .collect();
            (*intent, compiled)
        })
        .collect()
});

/// Extract normalised ticker symbols.
///
/// Candidates are 1-5 upper-case letters or a `$`-prefixed symbol in any
/// case; lower-case words are never candidates. Common short words are
/// dropped unless they are known crypto symbols.
pub fn extract_tickers(query: &str) -> BTreeSet<String> {
    let mut tickers = BTreeSet::new();
    for caps in TICKER_RE.captures_iter(query) {
        let Some(symbol) = caps.get(1).or_else(|| caps.get(2)) else {
            continue;
        };
        let symbol = symbol.as_str().to_ascii_uppercase();
        if CRYPTO_TICKERS.contains(&symbol.as_str())
            || !TICKER_STOPWORDS.contains(&symbol.as_str())
        {
            tickers.insert(symbol);
        }
    }
    tickers
}

/// Query classifier with an optional completion fallback.
pub struct Classifier {
    completer: Option<Arc<dyn Completer>>,
    config: ClassifierConfig,
}

impl Classifier {
    /// Stage 1 only.
    pub fn deterministic() -> Self {
        Self {
            completer: None,
            config: ClassifierConfig {
                fallback_enabled: false,
                ..ClassifierConfig::default()
            },
        }
    }

    pub fn new(config: ClassifierConfig, completer: Option<Arc<dyn Completer>>) -> Self {
        Self { completer, config }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Stage 1: pattern match plus ticker extraction. No I/O.
    ///
    /// Within a group the strongest matching pattern sets the group's
    /// confidence; across groups the strongest wins and the earlier group
    /// wins a tie.
    pub fn classify_deterministic(&self, query: &str) -> ClassificationResult {
        let mut best_intent = QueryIntent::Unknown;
        let mut best_confidence = 0.0f32;
        let mut keywords = Vec::new();

        for (intent, patterns) in INTENT_PATTERNS.iter() {
            for pattern in patterns {
                if let Some(m) = pattern.regex.find(query) {
                    keywords.push(m.as_str().to_string());
                    if pattern.confidence > best_confidence {
                        best_confidence = pattern.confidence;
                        best_intent = *intent;
                    }
                }
            }
        }

        let tickers = extract_tickers(query);
        if !tickers.is_empty() && best_intent.is_ticker_relevant() {
            best_confidence = (best_confidence + TICKER_BOOST).min(1.0);
        }

        ClassificationResult {
            intent: best_intent,
            confidence: best_confidence,
            tickers,
            keywords,
            tiers_needed: best_intent.required_tiers(),
            stage: ClassificationStage::Deterministic,
        }
    }

    /// Stage 1, then stage 2 when stage 1 is below the threshold and a
    /// completer is configured. Tickers and keywords always come from stage 1.
    pub async fn classify(&self, query: &str) -> ClassificationResult {
        let mut result = self.classify_deterministic(query);

        if !self.config.fallback_enabled || result.confidence >= self.config.fallback_threshold {
            return result;
        }
        let Some(completer) = &self.completer else {
            return result;
        };

        let request = CompletionRequest {
            system_prompt: classifier_system_prompt(),
            user_content: classifier_user_prompt(query),
            max_tokens: CLASSIFIER_MAX_TOKENS,
            temperature: 0.0,
        };

        let reply = match completer.complete(&request).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "Classifier fallback failed, keeping stage-1 result");
                return result;
            }
        };

        match parse_intent_reply(&reply) {
            Ok((intent, confidence)) if confidence > result.confidence => {
                debug!(
                    from = %result.intent,
                    to = %intent,
                    confidence,
                    "Classifier fallback overrides stage 1"
                );
                result.intent = intent;
                result.confidence = confidence;
                result.tiers_needed = intent.required_tiers();
                result.stage = ClassificationStage::Fallback;
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Unparseable classifier fallback reply"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finsight_models::tier::TierId;

    fn classify(query: &str) -> ClassificationResult {
        Classifier::deterministic().classify_deterministic(query)
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn price_query() {
        let result = classify("What's the price of AAPL?");
        assert_eq!(result.intent, QueryIntent::PriceOnly);
        assert!(result.confidence >= 0.9);
        assert_eq!(result.tickers, set(&["AAPL"]));
        assert_eq!(result.tiers_needed, BTreeSet::from([TierId::RunCache]));
        assert_eq!(result.keywords, vec!["price"]);
    }

    #[test]
    fn preferences_query() {
        let result = classify("What are my preferences?");
        assert_eq!(result.intent, QueryIntent::UserPreferences);
        assert!(result.tickers.is_empty());
        assert_eq!(
            result.tiers_needed,
            BTreeSet::from([TierId::SessionCache, TierId::DurableStore])
        );
    }

    #[test]
    fn strongest_pattern_wins_across_groups() {
        // "current price" (0.95) beats "should i" (0.85)
        let result = classify("should i check the current price");
        assert_eq!(result.intent, QueryIntent::PriceOnly);
        assert!((result.confidence - 0.95).abs() < 1e-6);
    }

    #[test]
    fn earlier_group_wins_ties() {
        // "similar" (semantic, 0.7) and "good time" (trade, 0.7): trade is declared first
        let result = classify("is it a good time for something similar");
        assert_eq!(result.intent, QueryIntent::TradeDecision);
        assert!((result.confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn ticker_boost_only_for_relevant_intents() {
        let boosted = classify("Should I buy NVDA");
        assert!((boosted.confidence - 0.95).abs() < 1e-6);

        let plain = classify("What did I decide on NVDA");
        assert_eq!(plain.intent, QueryIntent::UserHistory);
        assert!((plain.confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn boost_is_capped() {
        let result = classify("current price of TSLA");
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn unmatched_query_is_unknown() {
        let result = classify("hmm");
        assert_eq!(result.intent, QueryIntent::Unknown);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(
            result.tiers_needed,
            BTreeSet::from([TierId::SessionCache, TierId::RunCache])
        );
    }

    #[test]
    fn ticker_extraction_rules() {
        assert_eq!(extract_tickers("Compare AAPL and MSFT"), set(&["AAPL", "MSFT"]));
        assert_eq!(extract_tickers("is $tsla cheap"), set(&["TSLA"]));
        assert_eq!(extract_tickers("I think A IS fine"), set(&[]));
        assert_eq!(extract_tickers("buy F now"), set(&["F"]));
        assert_eq!(extract_tickers("what about BTC and $eth"), set(&["BTC", "ETH"]));
        assert_eq!(extract_tickers("ABCDEF is too long"), set(&[]));
    }

    #[test]
    fn lowercase_words_are_not_tickers() {
        assert_eq!(
            extract_tickers("find something similar to the uni course on atom physics"),
            set(&[])
        );
        assert_eq!(extract_tickers("sol and ada said the dot was a link"), set(&[]));

        let result = classify("Can you send the link to the latest news?");
        assert!(result.tickers.is_empty());
        assert_eq!(result.intent, QueryIntent::NewsSummary);
        assert!((result.confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn case_insensitive_patterns() {
        assert_eq!(classify("LATEST HEADLINES").intent, QueryIntent::NewsSummary);
    }
}
