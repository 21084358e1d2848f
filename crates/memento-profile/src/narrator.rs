//! Narrative summaries of preference statistics.
//!
//! A narrative is optional decoration on a profile: the builder runs the
//! generator under a timeout and publishes a stats-only profile when it
//! fails. [`TemplateNarrator`] is the built-in, deterministic generator; a
//! model-backed one can be plugged in through [`NarrativeGenerator`].

use async_trait::async_trait;

use memento_core::types::RuleBasedStats;

use crate::error::ProfileError;

/// Traits reported in each of the "keeps" / "discards" lists.
const MAX_TRAITS: usize = 3;
/// A trait needs this many triage verdicts before it is described.
const MIN_TRAIT_VERDICTS: u64 = 2;

#[async_trait]
pub trait NarrativeGenerator: Send + Sync {
    async fn generate(
        &self,
        stats: &RuleBasedStats,
        style_examples: &[String],
    ) -> Result<String, ProfileError>;

    fn name(&self) -> &'static str;
}

/// Renders a short prose summary straight from the statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateNarrator;

impl TemplateNarrator {
    pub fn new() -> Self {
        Self
    }

    pub fn render(&self, stats: &RuleBasedStats, style_examples: &[String]) -> Result<String, ProfileError> {
        if stats.total_decisions == 0 {
            return Err(ProfileError::InsufficientData(
                "no decisions in scope".to_string(),
            ));
        }

        let mut sentences = Vec::new();
        sentences.push(format!(
            "Based on {} decision{} across {} item{}.",
            stats.total_decisions,
            plural(stats.total_decisions),
            stats.distinct_subjects,
            plural(stats.distinct_subjects),
        ));

        if let Some(rate) = stats.keep_rate {
            sentences.push(format!(
                "Keeps {} of triaged items ({} kept, {} discarded).",
                percent(rate),
                stats.keep_count,
                stats.discard_count
            ));
        }

        let mut rated: Vec<(&String, f64, u64)> = stats
            .traits
            .iter()
            .filter_map(|(name, t)| {
                let verdicts = t.keep + t.discard;
                t.keep_rate
                    .filter(|_| verdicts >= MIN_TRAIT_VERDICTS)
                    .map(|rate| (name, rate, verdicts))
            })
            .collect();

        rated.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.2.cmp(&a.2))
                .then_with(|| a.0.cmp(b.0))
        });
        let favoured: Vec<String> = rated
            .iter()
            .filter(|(_, rate, _)| *rate >= 0.5)
            .take(MAX_TRAITS)
            .map(|(name, rate, _)| format!("{} ({})", name, percent(*rate)))
            .collect();
        if !favoured.is_empty() {
            sentences.push(format!("Tends to keep: {}.", favoured.join(", ")));
        }

        let avoided: Vec<String> = rated
            .iter()
            .rev()
            .filter(|(_, rate, _)| *rate < 0.5)
            .take(MAX_TRAITS)
            .map(|(name, rate, _)| format!("{} ({} kept)", name, percent(*rate)))
            .collect();
        if !avoided.is_empty() {
            sentences.push(format!("Tends to discard: {}.", avoided.join(", ")));
        }

        if let Some(freq) = stats.override_frequency {
            if stats.override_count > 0 {
                sentences.push(format!(
                    "Overrides the suggested pick on {} of triage verdicts.",
                    percent(freq)
                ));
            }
        }

        let tags = top_counts(&stats.caption_style_tags, MAX_TRAITS);
        if !tags.is_empty() {
            sentences.push(format!("Preferred caption styles: {}.", tags.join(", ")));
        }
        if let Some(example) = style_examples.first() {
            sentences.push(format!("Recent caption: \"{}\".", example));
        }

        let channels = top_counts(&stats.publish_channels, MAX_TRAITS);
        if !channels.is_empty() {
            sentences.push(format!("Publishes mostly to {}.", channels.join(", ")));
        }

        Ok(sentences.join(" "))
    }
}

#[async_trait]
impl NarrativeGenerator for TemplateNarrator {
    async fn generate(
        &self,
        stats: &RuleBasedStats,
        style_examples: &[String],
    ) -> Result<String, ProfileError> {
        self.render(stats, style_examples)
    }

    fn name(&self) -> &'static str {
        "template"
    }
}

fn top_counts(counts: &std::collections::BTreeMap<String, u64>, limit: usize) -> Vec<String> {
    let mut sorted: Vec<(&String, &u64)> = counts.iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    sorted
        .into_iter()
        .take(limit)
        .map(|(name, count)| format!("{} ({})", name, count))
        .collect()
}

fn percent(rate: f64) -> String {
    format!("{:.0}%", rate * 100.0)
}

fn plural(n: u64) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memento_core::types::TraitStats;

    fn stats() -> RuleBasedStats {
        let mut stats = RuleBasedStats {
            total_decisions: 12,
            distinct_subjects: 10,
            keep_count: 6,
            discard_count: 4,
            keep_rate: Some(0.6),
            override_count: 2,
            override_frequency: Some(0.2),
            ..RuleBasedStats::default()
        };
        stats.traits.insert(
            "portrait".into(),
            TraitStats {
                keep: 4,
                discard: 0,
                overrides: 0,
                keep_rate: Some(1.0),
            },
        );
        stats.traits.insert(
            "blurry".into(),
            TraitStats {
                keep: 0,
                discard: 3,
                overrides: 1,
                keep_rate: Some(0.0),
            },
        );
        stats.traits.insert(
            "macro".into(),
            TraitStats {
                keep: 1,
                discard: 0,
                overrides: 0,
                keep_rate: Some(1.0),
            },
        );
        stats.caption_style_tags.insert("short".into(), 3);
        stats.caption_style_tags.insert("playful".into(), 1);
        stats.publish_channels.insert("blog".into(), 2);
        stats
    }

    #[tokio::test]
    async fn test_template_narrative() {
        let narrator = TemplateNarrator::new();
        let text = narrator
            .generate(&stats(), &["Golden hour".to_string()])
            .await
            .unwrap();

        assert!(text.starts_with("Based on 12 decisions across 10 items."));
        assert!(text.contains("Keeps 60% of triaged items (6 kept, 4 discarded)."));
        assert!(text.contains("Tends to keep: portrait (100%)."));
        assert!(text.contains("Tends to discard: blurry (0% kept)."));
        assert!(text.contains("Overrides the suggested pick on 20% of triage verdicts."));
        assert!(text.contains("Preferred caption styles: short (3), playful (1)."));
        assert!(text.contains("Recent caption: \"Golden hour\"."));
        assert!(text.contains("Publishes mostly to blog (2)."));
        // Single-verdict traits are not described.
        assert!(!text.contains("macro"));
    }

    #[test]
    fn test_deterministic() {
        let narrator = TemplateNarrator::new();
        assert_eq!(
            narrator.render(&stats(), &[]).unwrap(),
            narrator.render(&stats(), &[]).unwrap()
        );
    }

    #[test]
    fn test_empty_stats_rejected() {
        let err = TemplateNarrator::new()
            .render(&RuleBasedStats::default(), &[])
            .unwrap_err();
        assert!(matches!(err, ProfileError::InsufficientData(_)));
    }

    #[test]
    fn test_singular_wording() {
        let stats = RuleBasedStats {
            total_decisions: 1,
            distinct_subjects: 1,
            ..RuleBasedStats::default()
        };
        let text = TemplateNarrator::new().render(&stats, &[]).unwrap();
        assert_eq!(text, "Based on 1 decision across 1 item.");
    }
}
