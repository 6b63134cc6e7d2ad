//! MenuBinder (§4.4): loads a location's menu and assembles Prompt-B's payload.

use crate::capability::Database;
use crate::config::GraderPrompts;
use crate::model::{EligibilityFlags, Id, Item, Meal, Menu, MenuRef};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{instrument, warn};

pub struct MenuBinder {
    database: Arc<dyn Database>,
}

impl MenuBinder {
    pub fn new(database: Arc<dyn Database>) -> Self {
        Self { database }
    }

    /// Load a location's menu, falling back to the bundled defaults (an
    /// empty catalog) if the Database read fails.
    #[instrument(skip(self))]
    pub async fn load_menu(&self, location_id: Id) -> Menu {
        match self.database.get_menu(location_id).await {
            Ok(menu) => menu,
            Err(e) => {
                warn!("menu read for location {location_id} failed, falling back to defaults: {e}");
                Menu::default()
            }
        }
    }

    /// Render Prompt-B's system+user templates against `menu` and `transcript`.
    pub fn render_prompt(&self, prompts: &GraderPrompts, menu: &Menu, transcript: &str) -> String {
        let mut vars = HashMap::new();
        vars.insert("menu".to_string(), build_menu_payload(menu));
        vars.insert("transcript".to_string(), transcript.to_string());
        let user = crate::config::Prompts::render(&prompts.user, &vars);
        format!("{}\n\n{}", prompts.system, user)
    }
}

/// Assemble the four JSON payloads Prompt-B binds: upsell rules, upsize
/// rules, add-on rules, and the items+meals catalogs. Every menu reference
/// in the payload uses the canonical `"<item_id>_<size_code>"` form.
fn build_menu_payload(menu: &Menu) -> String {
    let upsell_rules = eligible_refs(menu, |flags| flags.upsell_eligible);
    let upsize_rules = eligible_refs(menu, |flags| flags.upsize_eligible);
    let addon_rules: Vec<String> = menu
        .addons
        .iter()
        .map(|a| MenuRef::new(a.item_id.clone(), 0).to_string())
        .collect();

    let catalog = serde_json::json!({
        "items": menu.items.iter().map(item_json).collect::<Vec<_>>(),
        "meals": menu.meals.iter().map(meal_json).collect::<Vec<_>>(),
    });

    serde_json::json!({
        "upsell_rules": upsell_rules,
        "upsize_rules": upsize_rules,
        "addon_rules": addon_rules,
        "catalog": catalog,
    })
    .to_string()
}

fn eligible_refs(menu: &Menu, pred: impl Fn(&EligibilityFlags) -> bool) -> Vec<String> {
    let mut refs = Vec::new();
    for item in &menu.items {
        if pred(&item.flags) {
            for size in &item.size_ids {
                refs.push(MenuRef::new(item.item_id.clone(), *size).to_string());
            }
        }
    }
    for meal in &menu.meals {
        if pred(&meal.flags) {
            for size in &meal.size_ids {
                refs.push(MenuRef::new(meal.item_id.clone(), *size).to_string());
            }
        }
    }
    refs
}

fn item_json(item: &Item) -> serde_json::Value {
    serde_json::json!({
        "item_id": item.item_id,
        "name": item.name,
        "refs": item.size_ids.iter().map(|s| MenuRef::new(item.item_id.clone(), *s).to_string()).collect::<Vec<_>>(),
    })
}

fn meal_json(meal: &Meal) -> serde_json::Value {
    serde_json::json!({
        "item_id": meal.item_id,
        "name": meal.name,
        "inclusions": meal.inclusions,
        "refs": meal.size_ids.iter().map(|s| MenuRef::new(meal.item_id.clone(), *s).to_string()).collect::<Vec<_>>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::InMemoryDatabase;
    use crate::model::{AddOn, Item};
    use uuid::Uuid;

    fn sample_menu() -> Menu {
        let mut burger = Item::new("1", "Cheeseburger");
        burger.size_ids = vec![0, 1];
        burger.flags = EligibilityFlags {
            upsell_eligible: true,
            upsize_eligible: false,
            addon_eligible: true,
        };
        Menu {
            items: vec![burger],
            meals: vec![],
            addons: vec![AddOn {
                item_id: "cheese".to_string(),
                name: "Extra Cheese".to_string(),
                price: 0.5,
            }],
        }
    }

    #[test]
    fn menu_payload_includes_canonical_refs() {
        let payload = build_menu_payload(&sample_menu());
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["upsell_rules"], serde_json::json!(["1_0", "1_1"]));
        assert_eq!(value["upsize_rules"], serde_json::json!([]));
        assert_eq!(value["addon_rules"], serde_json::json!(["cheese_0"]));
    }

    #[tokio::test]
    async fn load_menu_falls_back_to_default_when_absent() {
        let location_id = Uuid::new_v4();
        let db = Arc::new(InMemoryDatabase::new());
        let binder = MenuBinder::new(db);
        let menu = binder.load_menu(location_id).await;
        assert!(menu.items.is_empty());
    }

    #[tokio::test]
    async fn load_menu_returns_stored_menu() {
        let location_id = Uuid::new_v4();
        let db = Arc::new(InMemoryDatabase::new().with_menu(location_id, sample_menu()));
        let binder = MenuBinder::new(db);
        let menu = binder.load_menu(location_id).await;
        assert_eq!(menu.items.len(), 1);
    }
}
