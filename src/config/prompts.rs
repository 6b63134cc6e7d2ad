//! Prompt templates for the pipeline's two Reasoner calls.
//!
//! Prompts can be customized by placing TOML files in the custom prompts directory.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Collection of all prompt templates.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Prompts {
    /// Prompt-A: transaction boundary/text extraction from a transcript.
    pub extractor: ExtractorPrompts,
    /// Prompt-B: per-transaction grading against the bound menu.
    pub grader: GraderPrompts,
    /// Custom variables from config, available in all prompts.
    #[serde(skip)]
    pub variables: std::collections::HashMap<String, String>,
}

/// Prompts for the TransactionExtractor component (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorPrompts {
    pub system: String,
    pub user: String,
}

impl Default for ExtractorPrompts {
    fn default() -> Self {
        Self {
            system: r#"You are a drive-thru transcript analyst. You are given a transcript of one
chunk of audio from a quick-service restaurant's order lane, already split into
individual customer transactions by a silence detector.

For each transaction, extract the raw ordering dialogue as it occurred. Do not
summarize or paraphrase; preserve the transcript text for each transaction
verbatim, trimmed to its boundaries.

Respond with one JSON object per transaction. Separate consecutive JSON objects
with the literal delimiter `@#&` and nothing else between them. Do not wrap the
output in a JSON array and do not add commentary before or after the objects."#
                .to_string(),

            user: r#"Transcript chunk (transaction boundaries already marked):
{{transcript}}

Number of transactions in this chunk: {{transaction_count}}

For each transaction, output a JSON object with:
- "transaction_index": the 0-based index of the transaction within this chunk
- "text": the verbatim transcript text for that transaction
- "start_seconds": start offset within the chunk
- "end_seconds": end offset within the chunk

Separate each JSON object with `@#&`."#
                .to_string(),
        }
    }
}

/// Prompts for the Grader component (§4.4), bound to a menu template.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraderPrompts {
    pub system: String,
    pub user: String,
}

impl Default for GraderPrompts {
    fn default() -> Self {
        Self {
            system: r#"You are an order-grading analyst for a quick-service restaurant. You are
given the verbatim transcript of a single customer transaction and the
restaurant's menu (items, meals, and add-ons with their upsell/upsize/addon
eligibility flags).

Determine, for this transaction:
- how many upsell opportunities existed, and how many upsell offers the
  worker made, and how many were accepted
- how many upsize opportunities existed, and how many upsize offers the
  worker made, and how many were accepted
- how many addon opportunities existed, and how many addon offers the
  worker made, and how many were accepted
- the list of menu items the customer ultimately ordered

Respond with a single JSON object using numbered string keys as specified in
the user message. Every key must be present. Use 0 or an empty value when a
field does not apply, never omit a key."#
                .to_string(),

            user: r#"Menu:
{{menu}}

Transaction transcript:
{{transcript}}

Respond with a JSON object with exactly these keys:
- "1": num_upsell_opportunities (integer)
- "2": num_upsell_offers (integer) -- always read from key "5" below, key "2" is unused by the grader and may be ignored by readers
- "3": num_upsell_success (integer)
- "4": num_upsize_opportunities (integer)
- "5": num_upsell_offers (integer) -- the binding count of upsell offers made
- "6": num_upsize_offers (integer)
- "7": num_upsize_success (integer)
- "8": num_addon_opportunities (integer)
- "9": num_addon_offers (integer)
- "10": num_addon_success (integer)
- "11": items_ordered (JSON array of "<item_id>_<size_code>" strings, size_code in {0,1,2,3} for none/small/medium/large)
- "12": complete_order (JSON array of "<item_id>_<size_code>" strings reflecting the final order after all upsells/upsizes)"#
                .to_string(),
        }
    }
}

impl Prompts {
    /// Load prompts from the default location, with optional custom directory and variables.
    pub fn load(
        custom_dir: Option<&str>,
        custom_variables: Option<&std::collections::HashMap<String, String>>,
    ) -> crate::error::Result<Self> {
        let mut prompts = Prompts::default();

        if let Some(vars) = custom_variables {
            prompts.variables = vars.clone();
        }

        if let Some(dir) = custom_dir {
            let custom_path = PathBuf::from(shellexpand::tilde(dir).to_string());

            let extractor_path = custom_path.join("extractor.toml");
            if extractor_path.exists() {
                let content = std::fs::read_to_string(&extractor_path)?;
                prompts.extractor = toml::from_str(&content)?;
            }

            let grader_path = custom_path.join("grader.toml");
            if grader_path.exists() {
                let content = std::fs::read_to_string(&grader_path)?;
                prompts.grader = toml::from_str(&content)?;
            }
        }

        Ok(prompts)
    }

    /// Render a prompt template with the given variables.
    pub fn render(template: &str, vars: &std::collections::HashMap<String, String>) -> String {
        let mut result = template.to_string();
        for (key, value) in vars {
            result = result.replace(&format!("{{{{{}}}}}", key), value);
        }
        result
    }

    /// Render a prompt template with both provided variables and custom config variables.
    /// Provided variables take precedence over custom config variables.
    pub fn render_with_custom(
        &self,
        template: &str,
        vars: &std::collections::HashMap<String, String>,
    ) -> String {
        let mut merged = self.variables.clone();
        for (key, value) in vars {
            merged.insert(key.clone(), value.clone());
        }
        Self::render(template, &merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_prompts() {
        let prompts = Prompts::default();
        assert!(!prompts.extractor.system.is_empty());
        assert!(!prompts.grader.system.is_empty());
        assert!(prompts.grader.user.contains("\"5\""));
    }

    #[test]
    fn test_render_template() {
        let template = "Hello {{name}}, you have {{count}} messages.";
        let mut vars = std::collections::HashMap::new();
        vars.insert("name".to_string(), "Alice".to_string());
        vars.insert("count".to_string(), "5".to_string());

        let result = Prompts::render(template, &vars);
        assert_eq!(result, "Hello Alice, you have 5 messages.");
    }
}
