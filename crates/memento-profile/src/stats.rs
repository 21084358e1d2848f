//! Rule-based aggregation of decision history.
//!
//! Output depends only on the set of decisions, not on their order or on
//! redeliveries: decisions are keyed by `event_id` and every map is ordered.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use memento_core::types::{
    CategoryStats, DecisionEvent, DecisionPayload, EventType, RuleBasedStats, StoredDecision,
    TraitStats, Verdict,
};

/// Computes [`RuleBasedStats`] from stored decisions.
pub struct StatsAggregator;

impl StatsAggregator {
    pub fn compute(decisions: &[StoredDecision]) -> RuleBasedStats {
        let events = unique_events(decisions);
        let mut stats = RuleBasedStats {
            total_decisions: events.len() as u64,
            ..RuleBasedStats::default()
        };

        let mut subjects = BTreeSet::new();
        let mut sessions = BTreeSet::new();
        let mut category_counts: BTreeMap<&'static str, u64> = BTreeMap::new();
        let mut verdicts: u64 = 0;

        for event in &events {
            subjects.insert(event.subject_ref.as_str());
            if !event.session_ref.is_empty() {
                sessions.insert(event.session_ref.as_str());
            }
            *category_counts.entry(event.event_type.as_str()).or_insert(0) += 1;

            match &event.payload {
                DecisionPayload::Verdict { verdict, traits } => {
                    verdicts += 1;
                    match verdict {
                        Verdict::Keep => stats.keep_count += 1,
                        Verdict::Discard => stats.discard_count += 1,
                    }
                    for name in normalized(traits) {
                        let entry = stats.traits.entry(name).or_default();
                        match verdict {
                            Verdict::Keep => entry.keep += 1,
                            Verdict::Discard => entry.discard += 1,
                        }
                    }
                }
                DecisionPayload::Override { traits, .. } => {
                    stats.override_count += 1;
                    for name in normalized(traits) {
                        stats.traits.entry(name).or_default().overrides += 1;
                    }
                }
                DecisionPayload::Caption { style_tags, .. } => {
                    for tag in normalized(style_tags) {
                        *stats.caption_style_tags.entry(tag).or_insert(0) += 1;
                    }
                }
                DecisionPayload::Publish { channel } => {
                    let channel = channel.trim().to_lowercase();
                    if !channel.is_empty() {
                        *stats.publish_channels.entry(channel).or_insert(0) += 1;
                    }
                }
            }
        }

        stats.distinct_subjects = subjects.len() as u64;
        stats.distinct_sessions = sessions.len() as u64;
        stats.keep_rate = ratio(stats.keep_count, stats.keep_count + stats.discard_count);
        stats.override_frequency = ratio(stats.override_count, verdicts);

        for trait_stats in stats.traits.values_mut() {
            trait_stats.keep_rate = ratio(trait_stats.keep, trait_stats.keep + trait_stats.discard);
        }

        stats.categories = category_counts
            .into_iter()
            .map(|(name, count)| {
                let category = CategoryStats {
                    count,
                    share: ratio(count, stats.total_decisions).unwrap_or(0.0),
                };
                (name.to_string(), category)
            })
            .collect();

        stats
    }

    /// Up to `limit` distinct caption texts, most recent first.
    pub fn style_examples(decisions: &[StoredDecision], limit: usize) -> Vec<String> {
        let mut captions: Vec<&DecisionEvent> = unique_events(decisions)
            .into_iter()
            .filter(|e| e.event_type == EventType::CaptionChoice)
            .collect();
        captions.sort_by(|a, b| {
            b.occurred_at
                .cmp(&a.occurred_at)
                .then_with(|| a.event_id.cmp(&b.event_id))
        });

        let mut seen = HashSet::new();
        let mut examples = Vec::new();
        for event in captions {
            if examples.len() >= limit {
                break;
            }
            if let DecisionPayload::Caption { text, .. } = &event.payload {
                let text = text.trim();
                if !text.is_empty() && seen.insert(text) {
                    examples.push(text.to_string());
                }
            }
        }
        examples
    }
}

/// First occurrence of each `event_id`, in event-id order.
fn unique_events(decisions: &[StoredDecision]) -> Vec<&DecisionEvent> {
    let mut by_id: BTreeMap<&str, &DecisionEvent> = BTreeMap::new();
    for decision in decisions {
        by_id
            .entry(decision.event.event_id.as_str())
            .or_insert(&decision.event);
    }
    by_id.into_values().collect()
}

/// Lowercased, trimmed, de-duplicated labels.
fn normalized(labels: &[String]) -> BTreeSet<String> {
    labels
        .iter()
        .map(|l| l.trim().to_lowercase())
        .filter(|l| !l.is_empty())
        .collect()
}

fn ratio(numerator: u64, denominator: u64) -> Option<f64> {
    if denominator == 0 {
        None
    } else {
        Some(numerator as f64 / denominator as f64)
    }
}
