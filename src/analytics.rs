//! AnalyticsAggregator (§4.7): pure functions turning a run's Grades into
//! funnel/operator/item reporting. No I/O; callers fetch the inputs and
//! persist the outputs.

use crate::model::{CategoryAnalytics, FunnelCategory, Grade, Id, Menu, MenuRef, RunAnalytics, RunAnalyticsWorker, SanityDiagnostics, Worker};
use std::collections::HashMap;

/// Per-item funnel counts across the candidate/offered/converted stages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemBreakdown {
    pub item: MenuRef,
    pub candidate_count: u64,
    pub offered_count: u64,
    pub converted_count: u64,
    pub offer_rate: f64,
    pub conversion_rate: f64,
    pub revenue: f64,
}

/// The three top-10 rankings over a run's item breakdown.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopItems {
    pub most_frequent_initial: Vec<MenuRef>,
    pub highest_success_rate: Vec<MenuRef>,
    pub most_successes: Vec<MenuRef>,
}

/// One day's funnel totals, for charting.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyFunnel {
    pub date: chrono::NaiveDate,
    pub upsell: CategoryAnalytics,
    pub upsize: CategoryAnalytics,
    pub addon: CategoryAnalytics,
}

/// A Grade paired with the transaction context analytics needs
/// (timestamp for time-series, worker assignment for operator rollups).
#[derive(Debug, Clone)]
pub struct GradedTransaction {
    pub grade: Grade,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub worker_id: Option<Id>,
}

const TOP_N: usize = 10;

/// §4.7: per-category totals/rates/revenue over a run's grades.
///
/// `num_largest_offers` (key "10") is parsed as part of the upsell block
/// (§4.4) — it has no upsize/add-on counterpart, so only the upsell
/// category's `largest_offer_rate` is ever nonzero.
pub fn aggregate_run(grades: &[Grade], menu: &Menu) -> RunAnalytics {
    RunAnalytics {
        run_id: Id::nil(),
        upsell: category_analytics(grades.iter().map(|g| (&g.upsell, g.num_largest_offers as u64)), menu),
        upsize: category_analytics(grades.iter().map(|g| (&g.upsize, 0)), menu),
        addon: category_analytics(grades.iter().map(|g| (&g.addon, 0)), menu),
        diagnostics: sanity_diagnostics(grades),
    }
}

/// Same as [`aggregate_run`] but stamps the given `run_id`.
pub fn aggregate_run_for(run_id: Id, grades: &[Grade], menu: &Menu) -> RunAnalytics {
    RunAnalytics {
        run_id,
        ..aggregate_run(grades, menu)
    }
}

fn category_analytics<'a>(categories: impl Iterator<Item = (&'a FunnelCategory, u64)>, menu: &Menu) -> CategoryAnalytics {
    let mut opportunities = 0u64;
    let mut offers = 0u64;
    let mut successes = 0u64;
    let mut largest_offers = 0u64;
    let mut revenue = 0.0;

    for (c, largest) in categories {
        opportunities += c.num_opportunities as u64;
        offers += c.num_offers as u64;
        successes += c.num_successes as u64;
        largest_offers += largest;
        for item in &c.success_items {
            revenue += menu.price(item).unwrap_or(0.0);
        }
    }

    CategoryAnalytics {
        opportunities,
        offers,
        successes,
        offer_rate: percent_rate(offers, opportunities),
        success_rate: percent_rate(successes, offers),
        conversion_rate: percent_rate(successes, opportunities),
        largest_offer_rate: percent_rate(largest_offers, offers),
        revenue: round2(revenue),
    }
}

fn sanity_diagnostics(grades: &[Grade]) -> SanityDiagnostics {
    let mut diagnostics = SanityDiagnostics::default();
    for grade in grades {
        for category in [&grade.upsell, &grade.upsize, &grade.addon] {
            if category.num_offers > category.num_opportunities {
                diagnostics.offers_gt_opportunities += 1;
            }
            if category.num_successes > category.num_offers {
                diagnostics.successes_gt_offers += 1;
            }
            if category.offered_items.len() as u32 != category.num_offers
                || category.success_items.len() as u32 != category.num_successes
            {
                diagnostics.declared_vs_observed_list_mismatch += 1;
            }
        }
    }
    diagnostics
}

/// §4.7 by-item breakdown: counts and rates across candidate/offered/converted
/// for every menu reference touched by the run's grades.
pub fn item_breakdown(grades: &[Grade], menu: &Menu) -> Vec<ItemBreakdown> {
    let mut counts: HashMap<MenuRef, (u64, u64, u64)> = HashMap::new();
    for grade in grades {
        for category in [&grade.upsell, &grade.upsize, &grade.addon] {
            for item in &category.candidate_items {
                counts.entry(item.clone()).or_default().0 += 1;
            }
            for item in &category.offered_items {
                counts.entry(item.clone()).or_default().1 += 1;
            }
            for item in &category.success_items {
                counts.entry(item.clone()).or_default().2 += 1;
            }
        }
    }

    let mut breakdown: Vec<ItemBreakdown> = counts
        .into_iter()
        .map(|(item, (candidate_count, offered_count, converted_count))| ItemBreakdown {
            offer_rate: percent_rate(offered_count, candidate_count),
            conversion_rate: percent_rate(converted_count, offered_count),
            revenue: round2(menu.price(&item).unwrap_or(0.0) * converted_count as f64),
            item,
            candidate_count,
            offered_count,
            converted_count,
        })
        .collect();
    breakdown.sort_by_key(|a| a.item.to_string());
    breakdown
}

/// §4.7 top-10 rankings: most frequent in initial orders, highest success
/// rate, most total successes.
pub fn top_items(grades: &[Grade], breakdown: &[ItemBreakdown]) -> TopItems {
    let mut initial_counts: HashMap<MenuRef, u64> = HashMap::new();
    for grade in grades {
        for item in &grade.items_initial {
            *initial_counts.entry(item.clone()).or_default() += 1;
        }
    }
    let mut by_frequency: Vec<(MenuRef, u64)> = initial_counts.into_iter().collect();
    by_frequency.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.to_string().cmp(&b.0.to_string())));

    let mut by_success_rate: Vec<&ItemBreakdown> = breakdown.iter().filter(|b| b.offered_count > 0).collect();
    by_success_rate.sort_by(|a, b| {
        b.conversion_rate
            .partial_cmp(&a.conversion_rate)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.item.to_string().cmp(&b.item.to_string()))
    });

    let mut by_successes: Vec<&ItemBreakdown> = breakdown.iter().collect();
    by_successes.sort_by(|a, b| {
        b.converted_count
            .cmp(&a.converted_count)
            .then_with(|| a.item.to_string().cmp(&b.item.to_string()))
    });

    TopItems {
        most_frequent_initial: by_frequency.into_iter().take(TOP_N).map(|(item, _)| item).collect(),
        highest_success_rate: by_success_rate.into_iter().take(TOP_N).map(|b| b.item.clone()).collect(),
        most_successes: by_successes.into_iter().take(TOP_N).map(|b| b.item.clone()).collect(),
    }
}

/// §4.7 operator analytics: per-worker rollups of the same totals/rates.
pub fn operator_analytics(run_id: Id, transactions: &[GradedTransaction], workers: &[Worker], menu: &Menu) -> Vec<RunAnalyticsWorker> {
    let mut by_worker: HashMap<Id, Vec<Grade>> = HashMap::new();
    for t in transactions {
        if let Some(worker_id) = t.worker_id {
            by_worker.entry(worker_id).or_default().push(t.grade.clone());
        }
    }

    let mut rows: Vec<RunAnalyticsWorker> = by_worker
        .into_iter()
        .map(|(worker_id, grades)| {
            let display_name = workers
                .iter()
                .find(|w| w.id == worker_id)
                .map(|w| w.display_name.clone())
                .unwrap_or_else(|| worker_id.to_string());
            RunAnalyticsWorker {
                run_id,
                worker_id,
                display_name,
                upsell: category_analytics(grades.iter().map(|g| (&g.upsell, g.num_largest_offers as u64)), menu),
                upsize: category_analytics(grades.iter().map(|g| (&g.upsize, 0)), menu),
                addon: category_analytics(grades.iter().map(|g| (&g.addon, 0)), menu),
            }
        })
        .collect();
    rows.sort_by(|a, b| a.display_name.cmp(&b.display_name));
    rows
}

/// §4.7 daily time-series, grouped by the transaction's local calendar date.
pub fn time_series(transactions: &[GradedTransaction], menu: &Menu) -> Vec<DailyFunnel> {
    let mut by_day: HashMap<chrono::NaiveDate, Vec<Grade>> = HashMap::new();
    for t in transactions {
        by_day.entry(t.started_at.date_naive()).or_default().push(t.grade.clone());
    }

    let mut series: Vec<DailyFunnel> = by_day
        .into_iter()
        .map(|(date, grades)| DailyFunnel {
            date,
            upsell: category_analytics(grades.iter().map(|g| (&g.upsell, g.num_largest_offers as u64)), menu),
            upsize: category_analytics(grades.iter().map(|g| (&g.upsize, 0)), menu),
            addon: category_analytics(grades.iter().map(|g| (&g.addon, 0)), menu),
        })
        .collect();
    series.sort_by_key(|d| d.date);
    series
}

/// §4.7: deterministic recommendation strings triggered by threshold crossings.
pub fn recommendations(analytics: &RunAnalytics) -> Vec<String> {
    let mut recs = Vec::new();
    if analytics.upsell.opportunities > 0 && analytics.upsell.offer_rate < 50.0 {
        recs.push(format!(
            "Upsell offer rate is {:.1}%, below the 50% target — coach crew to offer an upsell on every eligible order.",
            analytics.upsell.offer_rate
        ));
    }
    if analytics.upsize.opportunities > 0 && analytics.upsize.offer_rate < 50.0 {
        recs.push(format!(
            "Upsize offer rate is {:.1}%, below the 50% target — remind crew to ask before ringing in a meal.",
            analytics.upsize.offer_rate
        ));
    }
    if analytics.addon.opportunities > 0 && analytics.addon.offer_rate < 50.0 {
        recs.push(format!(
            "Add-on offer rate is {:.1}%, below the 50% target — prompt crew to suggest an add-on on every eligible item.",
            analytics.addon.offer_rate
        ));
    }
    if analytics.diagnostics.offers_gt_opportunities > 0 {
        recs.push(format!(
            "{} grade(s) reported more offers than opportunities — review Prompt-B output for this run.",
            analytics.diagnostics.offers_gt_opportunities
        ));
    }
    recs
}

fn percent_rate(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        round1(numerator as f64 / denominator as f64 * 100.0)
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Item;

    fn menu_with_priced_item(item_id: &str, size: u8, price: f64) -> Menu {
        let mut item = Item::new(item_id, item_id);
        item.size_ids = vec![size];
        item.prices.insert(size, price);
        Menu {
            items: vec![item],
            meals: vec![],
            addons: vec![],
        }
    }

    fn grade_with_upsell(opportunities: u32, offers: u32, successes: u32, success_ref: Option<MenuRef>) -> Grade {
        Grade {
            upsell: FunnelCategory {
                num_opportunities: opportunities,
                num_offers: offers,
                num_successes: successes,
                success_items: success_ref.into_iter().collect(),
                offered_items: vec![],
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn category_rates_are_percent_with_one_decimal() {
        let menu = Menu::default();
        let grades = vec![grade_with_upsell(3, 2, 1, None)];
        let analytics = aggregate_run(&grades, &menu);
        assert_eq!(analytics.upsell.offer_rate, 66.7);
        assert_eq!(analytics.upsell.success_rate, 50.0);
        assert_eq!(analytics.upsell.conversion_rate, 33.3);
    }

    #[test]
    fn largest_offer_rate_is_computed_from_upsell_only() {
        let menu = Menu::default();
        let mut grade = grade_with_upsell(3, 2, 1, None);
        grade.num_largest_offers = 1;
        let analytics = aggregate_run(&[grade], &menu);
        assert_eq!(analytics.upsell.largest_offer_rate, 50.0);
        assert_eq!(analytics.upsize.largest_offer_rate, 0.0);
        assert_eq!(analytics.addon.largest_offer_rate, 0.0);
    }

    #[test]
    fn zero_denominator_rates_are_zero() {
        let menu = Menu::default();
        let grades = vec![grade_with_upsell(0, 0, 0, None)];
        let analytics = aggregate_run(&grades, &menu);
        assert_eq!(analytics.upsell.offer_rate, 0.0);
    }

    #[test]
    fn revenue_sums_success_item_prices() {
        let menu = menu_with_priced_item("shake", 1, 2.5);
        let grades = vec![grade_with_upsell(1, 1, 1, Some(MenuRef::new("shake", 1)))];
        let analytics = aggregate_run(&grades, &menu);
        assert_eq!(analytics.upsell.revenue, 2.5);
    }

    #[test]
    fn sanity_diagnostics_tally_violations() {
        let grades = vec![Grade {
            upsell: FunnelCategory {
                num_opportunities: 1,
                num_offers: 3,
                num_successes: 5,
                ..Default::default()
            },
            ..Default::default()
        }];
        let diagnostics = sanity_diagnostics(&grades);
        assert_eq!(diagnostics.offers_gt_opportunities, 1);
        assert_eq!(diagnostics.successes_gt_offers, 1);
    }

    #[test]
    fn top_items_ranks_by_frequency_and_success() {
        let menu = menu_with_priced_item("shake", 1, 2.5);
        let shake = MenuRef::new("shake", 1);
        let grades = vec![
            Grade {
                items_initial: vec![shake.clone()],
                upsell: FunnelCategory {
                    num_opportunities: 1,
                    num_offers: 1,
                    num_successes: 1,
                    candidate_items: vec![shake.clone()],
                    offered_items: vec![shake.clone()],
                    success_items: vec![shake.clone()],
                    ..Default::default()
                },
                ..Default::default()
            },
            Grade {
                items_initial: vec![shake.clone()],
                ..Default::default()
            },
        ];
        let breakdown = item_breakdown(&grades, &menu);
        let top = top_items(&grades, &breakdown);
        assert_eq!(top.most_frequent_initial, vec![shake.clone()]);
        assert_eq!(top.highest_success_rate, vec![shake.clone()]);
        assert_eq!(top.most_successes, vec![shake]);
    }

    #[test]
    fn operator_analytics_groups_by_worker() {
        let menu = Menu::default();
        let worker_id = Id::new_v4();
        let worker = Worker {
            id: worker_id,
            location_id: Id::new_v4(),
            legal_name: "Alex Kim".to_string(),
            display_name: "Alex".to_string(),
            monthly_feedback: vec![],
        };
        let transactions = vec![GradedTransaction {
            grade: grade_with_upsell(2, 1, 1, None),
            started_at: chrono::Utc::now(),
            worker_id: Some(worker_id),
        }];
        let rows = operator_analytics(Id::new_v4(), &transactions, &[worker], &menu);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].display_name, "Alex");
        assert_eq!(rows[0].upsell.offers, 1);
    }

    #[test]
    fn recommendations_trigger_below_threshold() {
        let menu = Menu::default();
        let grades = vec![grade_with_upsell(10, 2, 0, None)];
        let analytics = aggregate_run(&grades, &menu);
        let recs = recommendations(&analytics);
        assert!(recs.iter().any(|r| r.contains("Upsell offer rate")));
    }
}
