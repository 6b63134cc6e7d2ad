//! Grader (§4.4, Prompt-B): transaction transcript + menu → Grade row.

use crate::capability::Reasoner;
use crate::config::{GraderPrompts, GradingSettings};
use crate::error::Result;
use crate::menu_binder::MenuBinder;
use crate::model::{FunnelCategory, Grade, Id, Menu, MenuRef, TransactionMeta};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{instrument, warn};

pub struct Grader {
    reasoner: Arc<dyn Reasoner>,
    menu_binder: Arc<MenuBinder>,
    prompts: GraderPrompts,
    settings: GradingSettings,
}

/// Which numbered keys feed one funnel category's [`FunnelCategory`] fields.
///
/// The upstream numbering is not uniform across categories (a legacy artifact
/// of the original grader's prompt format); `base_items_alt` captures the one
/// case (upsize) where the spec names two candidate sources for the same
/// field and the more specific one should win.
struct CategoryKeys {
    opportunities: &'static str,
    candidate_items: &'static str,
    base_items: &'static str,
    base_items_alt: Option<&'static str>,
    offers: &'static str,
    offered_items: &'static str,
    successes: &'static str,
    success_items: &'static str,
    base_sold_items: &'static str,
}

const UPSELL_KEYS: CategoryKeys = CategoryKeys {
    opportunities: "3",
    candidate_items: "4",
    base_items: "4_base",
    base_items_alt: None,
    offers: "5",
    offered_items: "6",
    successes: "9",
    success_items: "7",
    base_sold_items: "8_base_sold",
};

const UPSIZE_KEYS: CategoryKeys = CategoryKeys {
    opportunities: "11",
    candidate_items: "12",
    base_items: "11_base",
    base_items_alt: Some("13"),
    offers: "14",
    offered_items: "14_base",
    successes: "15",
    success_items: "16",
    base_sold_items: "16_base_sold",
};

const ADDON_KEYS: CategoryKeys = CategoryKeys {
    opportunities: "18",
    candidate_items: "19",
    base_items: "20",
    base_items_alt: Some("18_base"),
    offers: "21",
    offered_items: "21_base",
    successes: "22",
    success_items: "23",
    base_sold_items: "23_base_sold",
};

impl Grader {
    pub fn new(
        reasoner: Arc<dyn Reasoner>,
        menu_binder: Arc<MenuBinder>,
        prompts: GraderPrompts,
        settings: GradingSettings,
    ) -> Self {
        Self {
            reasoner,
            menu_binder,
            prompts,
            settings,
        }
    }

    #[instrument(skip(self, transcript, meta), fields(transaction_id = %transaction_id))]
    pub async fn grade(
        &self,
        transaction_id: Id,
        location_id: Id,
        transcript: &str,
        meta: &TransactionMeta,
    ) -> Result<Grade> {
        let menu = self.menu_binder.load_menu(location_id).await;
        let prompt = self.menu_binder.render_prompt(&self.prompts, &menu, transcript);

        let response = self
            .reasoner
            .complete(&prompt, &self.settings.reasoning_effort, true)
            .await?;

        let (obj, details) = parse_response(&response.text);

        let upsell = funnel_category(&obj, &UPSELL_KEYS);
        let upsize = funnel_category(&obj, &UPSIZE_KEYS);
        let addon = funnel_category(&obj, &ADDON_KEYS);

        let score = score_from_categories(&upsell, &upsize);
        let gpt_price = response.input_tokens as f64 * self.settings.price_per_input_token
            + response.output_tokens as f64 * self.settings.price_per_output_token;

        let grade = Grade {
            transaction_id,
            transcript: transcript.to_string(),
            score,
            complete_order: meta.complete_order,
            mobile_order: meta.mobile_order,
            coupon_used: meta.coupon_used,
            asked_more_time: meta.asked_more_time,
            out_of_stock_items: meta.out_of_stock_items.clone(),
            items_initial: list_field(&obj, "1"),
            num_items_initial: int_field(&obj, "2"),
            items_after: list_field(&obj, "25"),
            num_items_after: int_field(&obj, "26"),
            upsell,
            upsize,
            addon,
            num_largest_offers: int_field(&obj, "10"),
            feedback: string_field(&obj, "27"),
            issues: string_field(&obj, "28"),
            reasoning_summary: string_field(&obj, "reasoning_summary"),
            gpt_price,
            details,
        };

        check_sanity(&grade);
        verify_menu_references(&grade, &menu);

        Ok(grade)
    }
}

/// Non-fatal sanity checks (§4.4, §7): record via `tracing`, never fail the grade.
fn check_sanity(grade: &Grade) {
    for (name, category) in [
        ("upsell", &grade.upsell),
        ("upsize", &grade.upsize),
        ("addon", &grade.addon),
    ] {
        if category.num_offers > category.num_opportunities {
            warn!(category = name, transaction_id = %grade.transaction_id, "offers exceed opportunities");
        }
        if category.num_successes > category.num_offers {
            warn!(category = name, transaction_id = %grade.transaction_id, "successes exceed offers");
        }
        if category.offered_items.len() as u32 != category.num_offers {
            warn!(category = name, transaction_id = %grade.transaction_id, "declared offer count disagrees with observed list length");
        }
    }
}

fn verify_menu_references(grade: &Grade, menu: &Menu) {
    let all_refs = grade
        .items_initial
        .iter()
        .chain(&grade.items_after)
        .chain(&grade.upsell.candidate_items)
        .chain(&grade.upsize.candidate_items)
        .chain(&grade.addon.candidate_items);
    for r in all_refs {
        if !menu.contains(r) {
            warn!(transaction_id = %grade.transaction_id, reference = %r, "menu reference not found in location's catalog");
        }
    }
}

fn score_from_categories(upsell: &FunnelCategory, upsize: &FunnelCategory) -> f64 {
    let denom = upsell.num_opportunities + upsize.num_opportunities;
    if denom == 0 {
        0.0
    } else {
        ((upsell.num_offers + upsize.num_offers) as f64 / denom as f64).min(1.0)
    }
}

fn funnel_category(obj: &Map<String, Value>, keys: &CategoryKeys) -> FunnelCategory {
    let base_items = if !list_field(obj, keys.base_items).is_empty() {
        list_field(obj, keys.base_items)
    } else if let Some(alt) = keys.base_items_alt {
        list_field(obj, alt)
    } else {
        Vec::new()
    };

    FunnelCategory {
        num_opportunities: int_field(obj, keys.opportunities),
        num_offers: int_field(obj, keys.offers),
        num_successes: int_field(obj, keys.successes),
        candidate_items: list_field(obj, keys.candidate_items),
        base_items,
        offered_items: list_field(obj, keys.offered_items),
        success_items: list_field(obj, keys.success_items),
        base_sold_items: list_field(obj, keys.base_sold_items),
    }
}

/// Parse the Reasoner's response into its top-level JSON object and the
/// `details` blob of keys not consumed by the numbered-key mapping.
fn parse_response(text: &str) -> (Map<String, Value>, std::collections::HashMap<String, Value>) {
    let trimmed = text.trim();
    let obj = match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => map,
        _ => {
            warn!("grader response was not a JSON object; treating as empty");
            Map::new()
        }
    };

    const KNOWN: &[&str] = &[
        "1", "2", "3", "4", "4_base", "5", "6", "7", "8_base_sold", "9", "10", "11", "11_base",
        "12", "13", "14", "14_base", "15", "16", "16_base_sold", "18", "18_base", "19", "20",
        "21", "21_base", "22", "23", "23_base_sold", "25", "26", "27", "28", "reasoning_summary",
    ];
    let details = obj
        .iter()
        .filter(|(k, _)| !KNOWN.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    (obj, details)
}

/// Best-effort integer coercion: JSON number, numeric string, else 0.
fn int_field(obj: &Map<String, Value>, key: &str) -> u32 {
    match obj.get(key) {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0) as u32,
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn string_field(obj: &Map<String, Value>, key: &str) -> String {
    match obj.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(v) => v.to_string(),
    }
}

/// List fields accept a JSON array, a JSON-stringified array, a
/// comma-separated string, or `"0"`/`0` meaning empty (§9 tolerant parser).
fn list_field(obj: &Map<String, Value>, key: &str) -> Vec<MenuRef> {
    match obj.get(key) {
        Some(Value::Array(items)) => items.iter().filter_map(|v| v.as_str().and_then(MenuRef::parse)).collect(),
        Some(Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() || s == "0" {
                return Vec::new();
            }
            if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(s) {
                return items.iter().filter_map(|v| v.as_str().and_then(MenuRef::parse)).collect();
            }
            s.split(',').filter_map(|part| MenuRef::parse(part.trim())).collect()
        }
        Some(Value::Number(n)) if n.as_f64() == Some(0.0) => Vec::new(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::fakes::FakeReasoner;
    use crate::capability::{InMemoryDatabase, ReasonerOutput};
    use uuid::Uuid;

    fn grader_with_response(text: &str) -> (Grader, Id, Id) {
        let transaction_id = Uuid::new_v4();
        let location_id = Uuid::new_v4();
        let reasoner = Arc::new(FakeReasoner::new(vec![ReasonerOutput {
            text: text.to_string(),
            input_tokens: 100,
            output_tokens: 50,
        }]));
        let db = Arc::new(InMemoryDatabase::new());
        let menu_binder = Arc::new(MenuBinder::new(db));
        let grader = Grader::new(reasoner, menu_binder, GraderPrompts::default(), GradingSettings::default());
        (grader, transaction_id, location_id)
    }

    #[tokio::test]
    async fn normalizes_numbered_keys_into_grade() {
        let response = serde_json::json!({
            "1": ["1_0"], "2": 1,
            "3": 2, "4": ["1_0"], "4_base": ["1_0"], "5": 1, "6": ["2_1"], "7": ["2_1"], "8_base_sold": ["1_0"], "9": 1,
            "10": 0,
            "11": 0, "11_base": [], "12": [], "13": [], "14": 0, "14_base": [], "15": 0, "16": [], "16_base_sold": [],
            "18": 0, "18_base": [], "19": [], "20": [], "21": 0, "21_base": [], "22": 0, "23": [], "23_base_sold": [],
            "25": ["1_0", "2_1"], "26": 2,
            "27": "good job", "28": "none"
        })
        .to_string();
        let (grader, tx, loc) = grader_with_response(&response);
        let grade = grader.grade(tx, loc, "hello", &TransactionMeta::default()).await.unwrap();
        assert_eq!(grade.upsell.num_opportunities, 2);
        assert_eq!(grade.upsell.num_offers, 1);
        assert_eq!(grade.upsell.num_successes, 1);
        assert_eq!(grade.num_items_after, 2);
        assert_eq!(grade.feedback, "good job");
        assert!((grade.score - 0.5).abs() < 1e-9);
        assert!(grade.gpt_price > 0.0);
    }

    #[tokio::test]
    async fn sanity_violating_output_is_not_dropped() {
        let response = serde_json::json!({
            "3": 3, "5": 5, "9": 2,
        })
        .to_string();
        let (grader, tx, loc) = grader_with_response(&response);
        let grade = grader.grade(tx, loc, "transcript", &TransactionMeta::default()).await.unwrap();
        assert_eq!(grade.upsell.num_opportunities, 3);
        assert_eq!(grade.upsell.num_offers, 5);
        assert!((grade.score - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn csv_list_field_is_parsed() {
        let response = serde_json::json!({
            "4": "1_0,2_1", "3": 1,
        })
        .to_string();
        let (grader, tx, loc) = grader_with_response(&response);
        let grade = grader.grade(tx, loc, "transcript", &TransactionMeta::default()).await.unwrap();
        assert_eq!(grade.upsell.candidate_items.len(), 2);
    }

    #[tokio::test]
    async fn zero_denominator_score_is_zero() {
        let (grader, tx, loc) = grader_with_response("{}");
        let grade = grader.grade(tx, loc, "transcript", &TransactionMeta::default()).await.unwrap();
        assert_eq!(grade.score, 0.0);
    }

    #[tokio::test]
    async fn unknown_keys_are_preserved_in_details() {
        let response = serde_json::json!({
            "3": 1, "99": "mystery field",
        })
        .to_string();
        let (grader, tx, loc) = grader_with_response(&response);
        let grade = grader.grade(tx, loc, "transcript", &TransactionMeta::default()).await.unwrap();
        assert_eq!(grade.details.get("99").unwrap(), "mystery field");
    }
}
