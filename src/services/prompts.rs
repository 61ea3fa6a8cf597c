//! Built-in prompt variants and the default prompt experiment.
//!
//! Templates use `{description}`, `{context}` and `{count}` placeholders and
//! all ask for the Genre / Artists / Album / Note block format the parser reads.

use crate::{
    error::ExperimentError,
    models::{Experiment, HistoryEntry, Variant},
};

/// Experiment every request goes through unless configured otherwise
pub const DEFAULT_EXPERIMENT_ID: &str = "prompt_optimization";

/// History entries considered when building user context
const HISTORY_WINDOW: usize = 5;
const TOP_N: usize = 3;

pub const ZERO_SHOT: &str = r#"You are SynthScribe, a music recommendation expert.
{context}
Suggest {count} music genres/artists for: "{description}"
Format each as:
- Genre: [name]
  Artists: [names]
  Album: [one album to start with]
  Note: [reason]"#;

pub const FEW_SHOT: &str = r#"Examples:
Input: "coding late at night"
Output:
- Genre: Lofi Hip Hop
  Artists: Nujabes, J Dilla
  Album: Modal Soul
  Note: Relaxing beats for focus

Input: "morning workout"
Output:
- Genre: Electronic/EDM
  Artists: The Prodigy, Pendulum
  Album: The Fat of the Land
  Note: High energy for motivation

{context}
Now suggest {count} recommendations for: "{description}"
Follow the same format."#;

pub const PERSONA_BASED: &str = r#"You are Nova, an empathetic AI music curator.
{context}

The user needs music for: "{description}"

Provide {count} thoughtful suggestions that balance their preferences with discovery.
Format each as:
- Genre: [name]
  Artists: [names]
  Album: [one album to start with]
  Note: [personalized insight]"#;

/// Fills a variant's template in one pass
///
/// Substituted text is never scanned again, so braces in the user's
/// description or history come through literally. Unknown `{...}` runs are
/// left as they are.
pub fn render(template: &str, description: &str, context: &str, count: usize) -> String {
    let count = count.to_string();
    let mut out = String::with_capacity(template.len() + description.len() + context.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        let value = [
            ("{description}", description.trim()),
            ("{context}", context),
            ("{count}", count.as_str()),
        ]
        .into_iter()
        .find(|(token, _)| tail.starts_with(token));

        match value {
            Some((token, value)) => {
                out.push_str(value);
                rest = &tail[token.len()..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// The three built-in variants with near-equal weights
pub fn default_variants() -> Vec<Variant> {
    vec![
        Variant::new("zero_shot", 0.34, ZERO_SHOT),
        Variant::new("few_shot", 0.33, FEW_SHOT),
        Variant::new("persona_based", 0.33, PERSONA_BASED),
    ]
}

pub fn default_experiment() -> Result<Experiment, ExperimentError> {
    Experiment::new(
        DEFAULT_EXPERIMENT_ID,
        "Compare zero-shot, few-shot and persona prompts",
        default_variants(),
    )
}

/// Summarizes a user's recent history into one line of prompt context
///
/// Looks at the most recent entries and names the top genres and artists by
/// frequency, ties broken by first appearance. Empty when there is nothing to
/// say, so an absent history leaves the prompt unchanged.
pub fn history_context(history: &[HistoryEntry]) -> String {
    let mut recent: Vec<&HistoryEntry> = history.iter().collect();
    recent.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    recent.truncate(HISTORY_WINDOW);

    let mut genres = Tally::default();
    let mut artists = Tally::default();
    for item in recent.iter().flat_map(|entry| &entry.items) {
        genres.add(&item.genre);
        for artist in &item.artists {
            artists.add(artist);
        }
    }

    let mut parts = Vec::new();
    let top_genres = genres.top(TOP_N);
    if !top_genres.is_empty() {
        parts.push(format!(
            "The user previously enjoyed genres like: {}.",
            top_genres.join(", ")
        ));
    }
    let top_artists = artists.top(TOP_N);
    if !top_artists.is_empty() {
        parts.push(format!(
            "They also liked artists such as: {}.",
            top_artists.join(", ")
        ));
    }

    parts.join(" ")
}

/// Frequency count that remembers first-seen order
#[derive(Default)]
struct Tally {
    counts: Vec<(String, usize)>,
}

impl Tally {
    fn add(&mut self, name: &str) {
        let name = name.trim();
        if name.is_empty() {
            return;
        }
        match self.counts.iter_mut().find(|(n, _)| n == name) {
            Some((_, count)) => *count += 1,
            None => self.counts.push((name.to_string(), 1)),
        }
    }

    fn top(&self, n: usize) -> Vec<&str> {
        let mut ranked: Vec<_> = self.counts.iter().collect();
        // Stable sort keeps first-seen order among equal counts
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked.into_iter().take(n).map(|(name, _)| name.as_str()).collect()
    }
}
