//! Marketing insights and recommendations derived from segment statistics

use crate::cluster::Segment;
use crate::schema::{Column, Customer, SegmentId};
use serde::Serialize;
use std::collections::BTreeMap;

/// Suggested marketing strategy for one segment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Insight {
    pub segment_id: SegmentId,
    pub segment_name: String,
    pub strategy: String,
    pub characteristics: String,
    pub recommendations: Vec<String>,
    pub key_metrics: BTreeMap<String, f64>,
}

fn is_premium(segment: &Segment) -> bool {
    segment.avg_income > 75_000.0 && segment.avg_spending > 1_000.0
}

pub fn segment_insight(segment: &Segment) -> Insight {
    let (strategy, recommendations): (&str, &[&str]) = if is_premium(segment) {
        (
            "Premium Product Focus",
            &[
                "Target with premium product campaigns",
                "Offer exclusive deals and loyalty programs",
                "Focus on quality over price in messaging",
            ],
        )
    } else if segment.response_rate < 8.0 {
        (
            "Re-engagement Campaign",
            &[
                "Use stronger promotional discounts",
                "Test different communication channels",
                "Personalize messaging based on past purchases",
            ],
        )
    } else {
        (
            "Standard Marketing Approach",
            &[
                "Continue current marketing strategies",
                "Monitor engagement metrics regularly",
            ],
        )
    };

    let key_metrics = BTreeMap::from([
        ("avg_income".to_string(), segment.avg_income),
        ("avg_spending".to_string(), segment.avg_spending),
        ("response_rate".to_string(), segment.response_rate),
        ("customer_count".to_string(), segment.customer_count as f64),
    ]);

    Insight {
        segment_id: segment.segment_id,
        segment_name: segment.name.clone(),
        strategy: strategy.to_string(),
        characteristics: segment.description.clone(),
        recommendations: recommendations.iter().map(|r| r.to_string()).collect(),
        key_metrics,
    }
}

/// One-line recommendation for a customer predicted into `segment`
pub fn recommend(segment: Option<&Segment>) -> &'static str {
    match segment {
        Some(s) if is_premium(s) => {
            "High-value customer: Offer premium products and exclusive loyalty rewards."
        }
        Some(s) if s.response_rate > 15.0 => {
            "Highly responsive customer: Increase campaign frequency with personalized offers."
        }
        Some(s) if s.response_rate < 5.0 => {
            "Low engagement customer: Re-engage with special introductory offers and surveys."
        }
        Some(s) if s.avg_spending < 200.0 => {
            "Price-sensitive customer: Focus on discounts and value-for-money offers."
        }
        _ => "Continue regular marketing campaigns and monitor engagement.",
    }
}

/// Portfolio-wide summary across all stored customers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dashboard {
    pub total_customers: usize,
    pub avg_spending: f64,
    /// Percentage of campaign offers accepted, 0 to 100
    pub response_rate: f64,
    pub segment_distribution: BTreeMap<SegmentId, usize>,
    /// Income bracket -> segment -> customers
    pub income_by_segment: BTreeMap<String, BTreeMap<SegmentId, usize>>,
    pub education_by_segment: BTreeMap<String, BTreeMap<SegmentId, usize>>,
    pub marital_status_by_segment: BTreeMap<String, BTreeMap<SegmentId, usize>>,
    /// Up to three segments, highest average spending first
    pub top_segments: Vec<Segment>,
}

pub fn income_bracket(income: f64) -> &'static str {
    if income < 20_000.0 {
        "<20k"
    } else if income < 50_000.0 {
        "20k-50k"
    } else if income < 80_000.0 {
        "50k-80k"
    } else {
        "80k+"
    }
}

/// Aggregate customers and segments into a [`Dashboard`].
///
/// Customers without a segment count towards the totals but not the
/// per-segment breakdowns.
pub fn dashboard(customers: &[Customer], segments: &[Segment]) -> Dashboard {
    let avg_spending = mean(customers, |c| c.record.total_spending());
    let response_rate =
        mean(customers, |c| c.record.total_campaigns() / Column::CAMPAIGNS.len() as f64) * 100.0;

    let mut segment_distribution = BTreeMap::new();
    let mut income_by_segment: BTreeMap<String, BTreeMap<SegmentId, usize>> = BTreeMap::new();
    let mut education_by_segment: BTreeMap<String, BTreeMap<SegmentId, usize>> = BTreeMap::new();
    let mut marital_status_by_segment: BTreeMap<String, BTreeMap<SegmentId, usize>> = BTreeMap::new();

    for customer in customers {
        let Some(segment) = customer.segment else {
            continue;
        };
        *segment_distribution.entry(segment).or_insert(0) += 1;

        let bracket = income_bracket(customer.record.number(Column::Income)).to_string();
        let education = category(customer, Column::Education);
        let marital_status = category(customer, Column::MaritalStatus);
        for (table, key) in [
            (&mut income_by_segment, bracket),
            (&mut education_by_segment, education),
            (&mut marital_status_by_segment, marital_status),
        ] {
            *table.entry(key).or_default().entry(segment).or_insert(0) += 1;
        }
    }

    let mut top_segments = segments.to_vec();
    top_segments.sort_by(|a, b| b.avg_spending.total_cmp(&a.avg_spending));
    top_segments.truncate(3);

    Dashboard {
        total_customers: customers.len(),
        avg_spending,
        response_rate,
        segment_distribution,
        income_by_segment,
        education_by_segment,
        marital_status_by_segment,
        top_segments,
    }
}

fn mean(customers: &[Customer], value: impl Fn(&Customer) -> f64) -> f64 {
    if customers.is_empty() {
        return 0.0;
    }
    customers.iter().map(value).sum::<f64>() / customers.len() as f64
}

fn category(customer: &Customer, column: Column) -> String {
    customer
        .record
        .text(column)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| "Unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::CanonicalRecord;
    use chrono::Utc;

    fn segment(avg_income: f64, avg_spending: f64, response_rate: f64) -> Segment {
        numbered_segment(2, avg_income, avg_spending, response_rate)
    }

    fn numbered_segment(segment_id: SegmentId, avg_income: f64, avg_spending: f64, response_rate: f64) -> Segment {
        Segment {
            segment_id,
            name: format!("Segment {segment_id}"),
            description: "test".to_string(),
            customer_count: 10,
            avg_income,
            avg_spending,
            avg_wines: 0.0,
            avg_web_purchases: 0.0,
            response_rate,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_insight_strategies() {
        let premium = segment_insight(&segment(90_000.0, 1_500.0, 3.0));
        assert_eq!(premium.strategy, "Premium Product Focus");
        assert_eq!(premium.recommendations.len(), 3);
        assert_eq!(premium.key_metrics["customer_count"], 10.0);

        let dormant = segment_insight(&segment(30_000.0, 100.0, 2.0));
        assert_eq!(dormant.strategy, "Re-engagement Campaign");

        let steady = segment_insight(&segment(50_000.0, 500.0, 12.0));
        assert_eq!(steady.strategy, "Standard Marketing Approach");
        assert_eq!(steady.recommendations.len(), 2);
    }

    #[test]
    fn test_recommendation_rules() {
        assert!(recommend(Some(&segment(90_000.0, 1_500.0, 3.0))).starts_with("High-value"));
        assert!(recommend(Some(&segment(50_000.0, 500.0, 20.0))).starts_with("Highly responsive"));
        assert!(recommend(Some(&segment(50_000.0, 500.0, 2.0))).starts_with("Low engagement"));
        assert!(recommend(Some(&segment(50_000.0, 100.0, 10.0))).starts_with("Price-sensitive"));
        assert!(recommend(Some(&segment(50_000.0, 500.0, 10.0))).starts_with("Continue"));
        assert!(recommend(None).starts_with("Continue"));
    }

    fn customer(income: f64, wines: f64, accepted: f64, status: &str, segment: Option<SegmentId>) -> Customer {
        Customer {
            id: uuid::Uuid::new_v4().to_string(),
            record: CanonicalRecord::new()
                .with(Column::Income, income)
                .with(Column::MntWines, wines)
                .with(Column::AcceptedCmp1, accepted)
                .with(Column::Education, "Graduation")
                .with(Column::MaritalStatus, status),
            segment,
        }
    }

    #[test]
    fn test_dashboard_aggregates() {
        let customers = vec![
            customer(15_000.0, 100.0, 1.0, "Single", Some(0)),
            customer(45_000.0, 300.0, 0.0, "Married", Some(0)),
            customer(90_000.0, 1_400.0, 1.0, "Married", Some(1)),
            customer(60_000.0, 200.0, 0.0, "", None),
        ];
        let segments = vec![
            numbered_segment(0, 30_000.0, 200.0, 10.0),
            numbered_segment(1, 90_000.0, 1_400.0, 20.0),
            numbered_segment(2, 50_000.0, 600.0, 5.0),
            numbered_segment(3, 40_000.0, 50.0, 0.0),
        ];
        let board = dashboard(&customers, &segments);

        assert_eq!(board.total_customers, 4);
        assert_eq!(board.avg_spending, 500.0);
        // 2 accepted offers out of 4 customers x 5 campaigns
        assert!((board.response_rate - 10.0).abs() < 1e-9);
        assert_eq!(board.segment_distribution, BTreeMap::from([(0, 2), (1, 1)]));

        assert_eq!(board.income_by_segment["<20k"], BTreeMap::from([(0, 1)]));
        assert_eq!(board.income_by_segment["20k-50k"], BTreeMap::from([(0, 1)]));
        assert_eq!(board.income_by_segment["80k+"], BTreeMap::from([(1, 1)]));
        assert!(!board.income_by_segment.contains_key("50k-80k"));
        assert_eq!(board.marital_status_by_segment["Married"], BTreeMap::from([(0, 1), (1, 1)]));
        assert_eq!(board.education_by_segment["Graduation"], BTreeMap::from([(0, 2), (1, 1)]));

        let top: Vec<SegmentId> = board.top_segments.iter().map(|s| s.segment_id).collect();
        assert_eq!(top, vec![1, 2, 0]);
    }

    #[test]
    fn test_empty_dashboard() {
        let board = dashboard(&[], &[]);
        assert_eq!(board.total_customers, 0);
        assert_eq!(board.avg_spending, 0.0);
        assert_eq!(board.response_rate, 0.0);
        assert!(board.segment_distribution.is_empty());
        assert!(board.top_segments.is_empty());
    }

    #[test]
    fn test_income_brackets() {
        assert_eq!(income_bracket(19_999.0), "<20k");
        assert_eq!(income_bracket(20_000.0), "20k-50k");
        assert_eq!(income_bracket(79_999.0), "50k-80k");
        assert_eq!(income_bracket(80_000.0), "80k+");
    }
}
