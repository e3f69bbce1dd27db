use finsight_models::intent::QueryIntent;

use crate::error::MemoryError;

/// Parse a classifier fallback reply of the form `INTENT_NAME 0.X`.
///
/// Tolerates surrounding quotes, backticks and trailing punctuation and is
/// case-insensitive on the intent name. Confidence is clamped into [0, 1].
pub fn parse_intent_reply(raw: &str) -> Result<(QueryIntent, f32), MemoryError> {
    let line = raw
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| MemoryError::Parse("empty reply".to_string()))?;

    let mut parts = line.split_whitespace().map(|p| {
        p.trim_matches(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '.'))
    });

    let label = parts
        .next()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| MemoryError::Parse(format!("no intent in {line:?}")))?;
    let intent = QueryIntent::from_label(label.trim_matches('.'))
        .ok_or_else(|| MemoryError::Parse(format!("unknown intent {label:?}")))?;

    let raw_confidence = parts
        .next()
        .ok_or_else(|| MemoryError::Parse(format!("no confidence in {line:?}")))?;
    let confidence: f32 = raw_confidence
        .trim_end_matches('.')
        .parse()
        .map_err(|e| MemoryError::Parse(format!("bad confidence {raw_confidence:?}: {e}")))?;
    if !confidence.is_finite() {
        return Err(MemoryError::Parse(format!("bad confidence {raw_confidence:?}")));
    }

    Ok((intent, confidence.clamp(0.0, 1.0)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_reply() {
        let (intent, confidence) = parse_intent_reply("TRADE_DECISION 0.8").unwrap();
        assert_eq!(intent, QueryIntent::TradeDecision);
        assert!((confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn parse_decorated_reply() {
        let (intent, confidence) = parse_intent_reply("  `news_summary 0.75.`\n").unwrap();
        assert_eq!(intent, QueryIntent::NewsSummary);
        assert!((confidence - 0.75).abs() < 1e-6);

        let (intent, _) = parse_intent_reply("\"USER_HISTORY\" 0.9").unwrap();
        assert_eq!(intent, QueryIntent::UserHistory);
    }

    #[test]
    fn confidence_is_clamped() {
        let (_, confidence) = parse_intent_reply("PRICE_ONLY 1.7").unwrap();
        assert_eq!(confidence, 1.0);
    }

    #[test]
    fn reject_malformed_replies() {
        assert!(parse_intent_reply("").is_err());
        assert!(parse_intent_reply("PRICE_ONLY").is_err());
        assert!(parse_intent_reply("PRICE_ONLY high").is_err());
        assert!(parse_intent_reply("BANANAS 0.9").is_err());
        assert!(parse_intent_reply("I think it is a price query").is_err());
    }
}
