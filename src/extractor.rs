//! TransactionExtractor (§4.3, Prompt-A): segment → 0..N transaction candidates.

use crate::capability::Reasoner;
use crate::config::ExtractorPrompts;
use crate::transcriber::Segment;
use crate::error::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{instrument, warn};

/// One candidate transaction extracted from a segment, still chunk-relative.
#[derive(Debug, Clone, Default)]
pub struct ExtractedTransaction {
    pub text: String,
    pub complete_order: bool,
    pub mobile_order: bool,
    pub coupon_used: bool,
    pub asked_more_time: bool,
    pub out_of_stock_items: Option<String>,
    pub start_sec: f64,
    pub end_sec: f64,
}

pub struct TransactionExtractor {
    reasoner: Arc<dyn Reasoner>,
    prompts: ExtractorPrompts,
    effort: String,
}

impl TransactionExtractor {
    pub fn new(reasoner: Arc<dyn Reasoner>, prompts: ExtractorPrompts, effort: impl Into<String>) -> Self {
        Self {
            reasoner,
            prompts,
            effort: effort.into(),
        }
    }

    /// Extract 1..N transactions from one segment. Never discards a segment:
    /// if the Reasoner returns no parseable object, the segment becomes a
    /// single transaction with the raw text and zeroed metadata.
    #[instrument(skip(self, segment), fields(start = segment.start_sec, end = segment.end_sec))]
    pub async fn extract(&self, segment: &Segment) -> Result<Vec<ExtractedTransaction>> {
        let mut vars = HashMap::new();
        vars.insert("transcript".to_string(), segment.text.clone());
        vars.insert("transaction_count".to_string(), "unknown".to_string());

        let system = self.prompts.system.clone();
        let user = crate::config::Prompts::render(&self.prompts.user, &vars);
        let prompt = format!("{system}\n\n{user}");

        let response = self.reasoner.complete(&prompt, &self.effort, false).await?;
        let objects = parse_delimited_objects(&response.text);

        if objects.is_empty() {
            return Ok(vec![ExtractedTransaction {
                text: segment.text.clone(),
                start_sec: segment.start_sec,
                end_sec: segment.end_sec,
                ..Default::default()
            }]);
        }

        let k = objects.len();
        let span = segment.end_sec - segment.start_sec;
        let sub_span = span / k as f64;

        Ok(objects
            .into_iter()
            .enumerate()
            .map(|(i, obj)| {
                let start_sec = segment.start_sec + sub_span * i as f64;
                let end_sec = segment.start_sec + sub_span * (i + 1) as f64;
                ExtractedTransaction {
                    text: string_field(&obj, "1").unwrap_or_else(|| segment.text.clone()),
                    complete_order: bool_field(&obj, "2"),
                    mobile_order: bool_field(&obj, "3"),
                    coupon_used: bool_field(&obj, "4"),
                    asked_more_time: bool_field(&obj, "5"),
                    out_of_stock_items: opt_string_field(&obj, "6"),
                    start_sec,
                    end_sec,
                }
            })
            .collect())
    }
}

/// Split on the literal delimiter and parse each piece as a JSON object,
/// silently dropping pieces that don't parse (format drift is tolerated;
/// see §9's "never fail the transaction on format drift").
fn parse_delimited_objects(text: &str) -> Vec<serde_json::Map<String, serde_json::Value>> {
    text.split("@#&")
        .filter_map(|piece| {
            let trimmed = piece.trim();
            if trimmed.is_empty() {
                return None;
            }
            match serde_json::from_str::<serde_json::Value>(trimmed) {
                Ok(serde_json::Value::Object(map)) => Some(map),
                Ok(_) => None,
                Err(e) => {
                    warn!("dropping unparsable extractor object: {e}");
                    None
                }
            }
        })
        .collect()
}

fn string_field(obj: &serde_json::Map<String, serde_json::Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
}

fn opt_string_field(obj: &serde_json::Map<String, serde_json::Value>, key: &str) -> Option<String> {
    match obj.get(key) {
        Some(serde_json::Value::String(s)) if s == "0" || s.is_empty() => None,
        Some(serde_json::Value::Number(n)) if n.as_f64() == Some(0.0) => None,
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        _ => None,
    }
}

fn bool_field(obj: &serde_json::Map<String, serde_json::Value>, key: &str) -> bool {
    match obj.get(key) {
        Some(serde_json::Value::Bool(b)) => *b,
        Some(serde_json::Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Some(serde_json::Value::String(s)) => s == "1" || s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::fakes::FakeReasoner;
    use crate::capability::ReasonerOutput;

    fn segment() -> Segment {
        Segment {
            start_sec: 10.0,
            end_sec: 20.0,
            text: "customer orders a burger".to_string(),
        }
    }

    #[tokio::test]
    async fn single_transaction_parses_fields() {
        let reasoner = Arc::new(FakeReasoner::new(vec![ReasonerOutput {
            text: r#"{"1":"order text","2":1,"3":0,"4":1,"5":"0","6":"0"}"#.to_string(),
            input_tokens: 10,
            output_tokens: 5,
        }]));
        let extractor = TransactionExtractor::new(reasoner, ExtractorPrompts::default(), "low");
        let result = extractor.extract(&segment()).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].text, "order text");
        assert!(result[0].complete_order);
        assert!(result[0].coupon_used);
        assert!(!result[0].mobile_order);
    }

    #[tokio::test]
    async fn multiple_transactions_divide_time_uniformly() {
        let reasoner = Arc::new(FakeReasoner::new(vec![ReasonerOutput {
            text: r#"{"1":"first"}@#&{"1":"second"}"#.to_string(),
            input_tokens: 1,
            output_tokens: 1,
        }]));
        let extractor = TransactionExtractor::new(reasoner, ExtractorPrompts::default(), "low");
        let result = extractor.extract(&segment()).await.unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].start_sec, 10.0);
        assert_eq!(result[0].end_sec, 15.0);
        assert_eq!(result[1].start_sec, 15.0);
        assert_eq!(result[1].end_sec, 20.0);
    }

    #[tokio::test]
    async fn unparsable_response_falls_back_to_raw_segment() {
        let reasoner = Arc::new(FakeReasoner::new(vec![ReasonerOutput {
            text: "not json at all".to_string(),
            input_tokens: 1,
            output_tokens: 1,
        }]));
        let extractor = TransactionExtractor::new(reasoner, ExtractorPrompts::default(), "low");
        let result = extractor.extract(&segment()).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].text, segment().text);
        assert_eq!(result[0].start_sec, segment().start_sec);
        assert_eq!(result[0].end_sec, segment().end_sec);
    }
}
