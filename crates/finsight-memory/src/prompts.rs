use finsight_models::intent::QueryIntent;

/// Output budget for the fallback reply (`INTENT_NAME 0.X`).
pub const CLASSIFIER_MAX_TOKENS: u32 = 20;

/// System prompt for the classifier fallback.
pub fn classifier_system_prompt() -> String {
    let intents: Vec<&str> = QueryIntent::ROUTABLE.iter().map(|i| i.label()).collect();
    format!(
        "Classify this query's intent. Return ONLY the intent name and confidence (0-1).\n\n\
         Intents: {}\n\n\
         Response format: INTENT_NAME 0.X",
        intents.join(", ")
    )
}

pub fn classifier_user_prompt(query: &str) -> String {
    format!("Query: \"{query}\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_lists_every_routable_intent() {
        let prompt = classifier_system_prompt();
        for intent in QueryIntent::ROUTABLE {
            assert!(prompt.contains(intent.label()), "missing {intent}");
        }
        assert!(!prompt.contains("UNKNOWN"));
        assert!(prompt.ends_with("INTENT_NAME 0.X"));
    }
}
