//! Core data model (§3): the entities the pipeline reads and writes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

pub type Id = Uuid;

/// Size code for a menu item: none/small/medium/large.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SizeCode {
    None = 0,
    Small = 1,
    Medium = 2,
    Large = 3,
}

impl SizeCode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(SizeCode::None),
            1 => Some(SizeCode::Small),
            2 => Some(SizeCode::Medium),
            3 => Some(SizeCode::Large),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// A menu reference in the canonical `"<item_id>_<size_code>"` form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MenuRef {
    pub item_id: String,
    pub size_code: u8,
}

impl MenuRef {
    pub fn new(item_id: impl Into<String>, size_code: u8) -> Self {
        Self {
            item_id: item_id.into(),
            size_code,
        }
    }

    /// Parse `"<item_id>_<size_code>"`. Returns `None` if the trailing
    /// component isn't a valid size code.
    pub fn parse(s: &str) -> Option<Self> {
        let (item_id, size) = s.rsplit_once('_')?;
        let size_code: u8 = size.parse().ok()?;
        Some(Self {
            item_id: item_id.to_string(),
            size_code,
        })
    }
}

impl std::fmt::Display for MenuRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.item_id, self.size_code)
    }
}

/// Display/grouping category for a menu item, derived from its name.
///
/// Keyword-based, display-only — never used by the grader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemCategory {
    Treats,
    Entrees,
    Sides,
    Beverages,
    Other,
}

impl ItemCategory {
    /// Classify a menu item by keywords in its name.
    pub fn categorize(name: &str) -> Self {
        let lower = name.to_lowercase();
        const TREATS: &[&str] = &[
            "cone", "sundae", "shake", "mcflurry", "pie", "cookie", "dessert", "ice cream",
        ];
        const BEVERAGES: &[&str] = &[
            "coffee", "coke", "soda", "tea", "lemonade", "drink", "juice", "water", "shake",
            "smoothie",
        ];
        const SIDES: &[&str] = &["fries", "side", "nuggets", "hashbrown", "salad"];
        const ENTREES: &[&str] = &[
            "burger", "sandwich", "meal", "burrito", "taco", "wrap", "chicken", "pizza",
        ];

        if TREATS.iter().any(|kw| lower.contains(kw)) {
            ItemCategory::Treats
        } else if BEVERAGES.iter().any(|kw| lower.contains(kw)) {
            ItemCategory::Beverages
        } else if SIDES.iter().any(|kw| lower.contains(kw)) {
            ItemCategory::Sides
        } else if ENTREES.iter().any(|kw| lower.contains(kw)) {
            ItemCategory::Entrees
        } else {
            ItemCategory::Other
        }
    }
}

/// Eligibility flags governing whether an item can appear in each funnel category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityFlags {
    pub upsell_eligible: bool,
    pub upsize_eligible: bool,
    pub addon_eligible: bool,
}

/// A menu Item: `{item_id, name, size_ids, prices, flags}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub item_id: String,
    pub name: String,
    pub size_ids: Vec<u8>,
    pub prices: HashMap<u8, f64>,
    pub flags: EligibilityFlags,
    pub category: ItemCategory,
}

impl Item {
    pub fn new(item_id: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        let category = ItemCategory::categorize(&name);
        Self {
            item_id: item_id.into(),
            name,
            size_ids: Vec::new(),
            prices: HashMap::new(),
            flags: EligibilityFlags::default(),
            category,
        }
    }

    pub fn price(&self, size_code: u8) -> Option<f64> {
        self.prices.get(&size_code).copied()
    }
}

/// A Meal: like an Item but carries `inclusions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meal {
    pub item_id: String,
    pub name: String,
    pub inclusions: Vec<String>,
    pub size_ids: Vec<u8>,
    pub prices: HashMap<u8, f64>,
    pub flags: EligibilityFlags,
    pub category: ItemCategory,
}

/// An AddOn: `{item_id, name, price}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddOn {
    pub item_id: String,
    pub name: String,
    pub price: f64,
}

/// A Location's Menu: items, meals, and add-ons.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Menu {
    pub items: Vec<Item>,
    pub meals: Vec<Meal>,
    pub addons: Vec<AddOn>,
}

impl Menu {
    /// Price lookup for any menu reference, across items/meals/addons.
    pub fn price(&self, reference: &MenuRef) -> Option<f64> {
        if let Some(item) = self.items.iter().find(|i| i.item_id == reference.item_id) {
            return item.price(reference.size_code);
        }
        if let Some(meal) = self.meals.iter().find(|m| m.item_id == reference.item_id) {
            return meal.prices.get(&reference.size_code).copied();
        }
        if let Some(addon) = self.addons.iter().find(|a| a.item_id == reference.item_id) {
            return Some(addon.price);
        }
        None
    }

    /// Whether `(item_id, size_code)` exists anywhere in this catalog.
    pub fn contains(&self, reference: &MenuRef) -> bool {
        self.items
            .iter()
            .any(|i| i.item_id == reference.item_id && i.size_ids.contains(&reference.size_code))
            || self.meals.iter().any(|m| {
                m.item_id == reference.item_id && m.size_ids.contains(&reference.size_code)
            })
            || self.addons.iter().any(|a| a.item_id == reference.item_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: Id,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub id: Id,
    pub org_id: Id,
    pub name: String,
    pub timezone: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Uploading,
    Processing,
    Complete,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Id,
    pub org_id: Id,
    pub location_id: Id,
    pub run_date: chrono::NaiveDate,
    pub status: RunStatus,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordingMeta {
    pub is_chunk: bool,
    pub original_id: Option<Id>,
    pub chunk_index: Option<u32>,
    pub chunk_start_sec: Option<f64>,
    pub chunk_end_sec: Option<f64>,
    pub overlap_sec: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordingStatus {
    Pending,
    Uploaded,
    Ready,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recording {
    pub id: Id,
    pub run_id: Id,
    pub location_id: Id,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub ended_at: chrono::DateTime<chrono::Utc>,
    pub object_key: String,
    pub link: Option<String>,
    pub status: RecordingStatus,
    pub meta: RecordingMeta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    Order,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerAssignmentSource {
    Voice,
    Unassigned,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionMeta {
    pub complete_order: bool,
    pub mobile_order: bool,
    pub coupon_used: bool,
    pub asked_more_time: bool,
    pub out_of_stock_items: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Id,
    pub run_id: Id,
    pub recording_id: Id,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub ended_at: chrono::DateTime<chrono::Utc>,
    pub kind: TransactionKind,
    pub meta: TransactionMeta,
    pub clip_ref: Option<String>,
    pub worker_id: Option<Id>,
    pub worker_confidence: Option<f32>,
    pub worker_assignment_source: WorkerAssignmentSource,
    pub voice_processed_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Per-category funnel counters shared by upsell/upsize/addon (§3, §4.4).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunnelCategory {
    pub num_opportunities: u32,
    pub num_offers: u32,
    pub num_successes: u32,
    pub candidate_items: Vec<MenuRef>,
    pub base_items: Vec<MenuRef>,
    pub offered_items: Vec<MenuRef>,
    pub success_items: Vec<MenuRef>,
    pub base_sold_items: Vec<MenuRef>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Grade {
    pub transaction_id: Id,
    pub transcript: String,
    pub score: f64,
    pub complete_order: bool,
    pub mobile_order: bool,
    pub coupon_used: bool,
    pub asked_more_time: bool,
    pub out_of_stock_items: Option<String>,
    pub items_initial: Vec<MenuRef>,
    pub num_items_initial: u32,
    pub items_after: Vec<MenuRef>,
    pub num_items_after: u32,
    pub upsell: FunnelCategory,
    pub upsize: FunnelCategory,
    pub addon: FunnelCategory,
    pub num_largest_offers: u32,
    pub feedback: String,
    pub issues: String,
    pub reasoning_summary: String,
    pub gpt_price: f64,
    /// Unknown Reasoner fields, preserved verbatim for forensic replay.
    pub details: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonthlyFeedback {
    pub month: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: Id,
    pub location_id: Id,
    pub legal_name: String,
    pub display_name: String,
    pub monthly_feedback: Vec<MonthlyFeedback>,
}

/// External reference audio for a worker (FileShare folder + filename).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceSample {
    pub folder: String,
    pub filename: String,
}

impl VoiceSample {
    /// Derive the speaker label from the filename (strip extension, `_` → ` `).
    pub fn label(&self) -> String {
        let stem = self
            .filename
            .rsplit_once('.')
            .map(|(s, _)| s)
            .unwrap_or(&self.filename);
        stem.replace('_', " ")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryAnalytics {
    pub opportunities: u64,
    pub offers: u64,
    pub successes: u64,
    pub offer_rate: f64,
    pub success_rate: f64,
    pub conversion_rate: f64,
    pub largest_offer_rate: f64,
    pub revenue: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SanityDiagnostics {
    pub offers_gt_opportunities: u64,
    pub successes_gt_offers: u64,
    pub declared_vs_observed_list_mismatch: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunAnalytics {
    pub run_id: Id,
    pub upsell: CategoryAnalytics,
    pub upsize: CategoryAnalytics,
    pub addon: CategoryAnalytics,
    pub diagnostics: SanityDiagnostics,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunAnalyticsWorker {
    pub run_id: Id,
    pub worker_id: Id,
    pub display_name: String,
    pub upsell: CategoryAnalytics,
    pub upsize: CategoryAnalytics,
    pub addon: CategoryAnalytics,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn menu_ref_parses_canonical_form() {
        let r = MenuRef::parse("burger_2").unwrap();
        assert_eq!(r.item_id, "burger");
        assert_eq!(r.size_code, 2);
        assert_eq!(r.to_string(), "burger_2");
    }

    #[test]
    fn menu_ref_rejects_non_numeric_suffix() {
        assert!(MenuRef::parse("burger_large").is_none());
    }

    #[test]
    fn categorize_matches_keywords() {
        assert!(matches!(
            ItemCategory::categorize("Hot Fudge Sundae"),
            ItemCategory::Treats
        ));
        assert!(matches!(
            ItemCategory::categorize("Large Fries"),
            ItemCategory::Sides
        ));
        assert!(matches!(
            ItemCategory::categorize("Cheeseburger"),
            ItemCategory::Entrees
        ));
        assert!(matches!(
            ItemCategory::categorize("Bottled Water"),
            ItemCategory::Beverages
        ));
        assert!(matches!(
            ItemCategory::categorize("Gift Card"),
            ItemCategory::Other
        ));
    }

    #[test]
    fn voice_sample_label_replaces_underscores() {
        let sample = VoiceSample {
            folder: "Loc Voice Samples".to_string(),
            filename: "Alex_Kim.wav".to_string(),
        };
        assert_eq!(sample.label(), "Alex Kim");
    }

    #[test]
    fn menu_price_lookup_across_collections() {
        let mut item = Item::new("1", "Burger");
        item.size_ids = vec![0, 1];
        item.prices.insert(0, 3.5);
        let menu = Menu {
            items: vec![item],
            meals: vec![],
            addons: vec![AddOn {
                item_id: "addon1".to_string(),
                name: "Extra Cheese".to_string(),
                price: 0.5,
            }],
        };
        assert_eq!(menu.price(&MenuRef::new("1", 0)), Some(3.5));
        assert_eq!(menu.price(&MenuRef::new("addon1", 0)), Some(0.5));
        assert_eq!(menu.price(&MenuRef::new("missing", 0)), None);
        assert!(menu.contains(&MenuRef::new("1", 0)));
        assert!(!menu.contains(&MenuRef::new("1", 5)));
    }
}
