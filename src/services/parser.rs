//! Parser for model output.
//!
//! Models are asked to answer in blocks like:
//!
//! ```text
//! - Genre: Lofi Hip Hop
//!   Artists: Nujabes, J Dilla
//!   Album: Modal Soul
//!   Note: Relaxed beats for late-night focus
//! ```
//!
//! Output is untrusted. A strict pass splits it into blocks and keeps the ones
//! carrying all four fields. When that recovers fewer items than requested, a
//! looser pass runs over whatever the strict pass could not use. Nothing is
//! ever filled in: an item either has all four fields from the text or it is dropped.

use crate::error::ParseError;
use crate::models::RecommendationItem;

const STRICT_SEPARATORS: &[char] = &[':'];
const LOOSE_SEPARATORS: &[char] = &[':', '-', '–', '='];

/// Longer labels first so `artists` is not read as `artist` + "s"
const LABELS: &[(&str, Field)] = &[
    ("genre", Field::Genre),
    ("artists", Field::Artists),
    ("artist", Field::Artists),
    ("album", Field::Album),
    ("notes", Field::Note),
    ("note", Field::Note),
];

/// What a parse recovered, including how much was lost
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOutcome {
    /// Valid items in source order
    pub items: Vec<RecommendationItem>,
    /// Blocks with at least one field that the strict pass rejected
    pub discarded: usize,
    /// Items salvaged by the loose pass
    pub loose_recovered: usize,
}

impl ParseOutcome {
    pub fn is_shortfall(&self, expected_count: usize) -> bool {
        self.items.len() < expected_count
    }

    /// Rejected blocks the loose pass did not make up for
    pub fn losses(&self) -> usize {
        self.discarded.saturating_sub(self.loose_recovered)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Genre,
    Artists,
    Album,
    Note,
}

/// Fields collected so far for one candidate item
#[derive(Debug, Default)]
struct Draft {
    genre: Option<String>,
    artists: Option<String>,
    album: Option<String>,
    note: Option<String>,
    last: Option<Field>,
}

impl Draft {
    fn slot(&mut self, field: Field) -> &mut Option<String> {
        match field {
            Field::Genre => &mut self.genre,
            Field::Artists => &mut self.artists,
            Field::Album => &mut self.album,
            Field::Note => &mut self.note,
        }
    }

    fn has(&self, field: Field) -> bool {
        match field {
            Field::Genre => self.genre.is_some(),
            Field::Artists => self.artists.is_some(),
            Field::Album => self.album.is_some(),
            Field::Note => self.note.is_some(),
        }
    }

    fn is_empty(&self) -> bool {
        self.last.is_none()
    }

    fn set(&mut self, field: Field, value: String) {
        *self.slot(field) = Some(value);
        self.last = Some(field);
    }

    /// Appends an unlabelled line to the field it most likely continues
    fn extend_last(&mut self, text: &str) {
        let Some(field) = self.last else {
            return;
        };
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let joiner = if field == Field::Artists { ", " } else { " " };
        if let Some(value) = self.slot(field) {
            if value.is_empty() {
                value.push_str(text);
            } else {
                value.push_str(joiner);
                value.push_str(text);
            }
        }
    }

    fn is_complete(&self) -> bool {
        [&self.genre, &self.artists, &self.album, &self.note]
            .iter()
            .all(|v| v.as_deref().is_some_and(|s| !s.trim().is_empty()))
    }

    fn into_item(self) -> Option<RecommendationItem> {
        let item = RecommendationItem {
            genre: self.genre?.trim().to_string(),
            artists: split_artists(&self.artists?),
            album: self.album?.trim().to_string(),
            note: self.note?.trim().to_string(),
        };
        item.is_valid().then_some(item)
    }
}

#[derive(Debug, Default)]
struct Block<'a> {
    lines: Vec<(usize, &'a str)>,
    draft: Draft,
}

impl Block<'_> {
    fn start(&self) -> usize {
        self.lines.first().map(|(idx, _)| *idx).unwrap_or(0)
    }

    fn end(&self) -> usize {
        self.lines.last().map(|(idx, _)| *idx).unwrap_or(0)
    }
}

/// Parses raw model output into validated recommendations.
///
/// Partial success is not an error: callers compare `items.len()` against
/// `expected_count`. Fails only when no item at all can be recovered.
pub fn parse(raw: &str, expected_count: usize) -> Result<ParseOutcome, ParseError> {
    let text = raw.replace("\\n", "\n").replace("\r\n", "\n");
    let lines: Vec<&str> = text.lines().collect();

    let mut items: Vec<(usize, RecommendationItem)> = Vec::new();
    let mut leftover: Vec<Vec<(usize, &str)>> = Vec::new();
    let mut discarded = 0;
    // End of the previous rejected block when it carried no strict fields
    let mut open_run: Option<usize> = None;

    for block in split_blocks(&lines) {
        let start = block.start();
        let end = block.end();
        let had_fields = !block.draft.is_empty();
        let complete = block.draft.is_complete();

        match complete.then(|| block.draft.into_item()).flatten() {
            Some(item) => {
                items.push((start, item));
                open_run = None;
            }
            None => {
                if had_fields {
                    discarded += 1;
                }
                // Unlabelled lines split only by bullets stay one segment
                let continues_run = !had_fields && open_run.is_some_and(|prev| prev + 1 == start);
                match leftover.last_mut() {
                    Some(segment) if continues_run => segment.extend(block.lines),
                    _ => leftover.push(block.lines),
                }
                open_run = (!had_fields).then_some(end);
            }
        }
    }

    let mut loose_recovered = 0;
    if items.len() < expected_count && !leftover.is_empty() {
        for segment in &leftover {
            let salvaged = parse_loose(segment);
            loose_recovered += salvaged.len();
            items.extend(salvaged);
        }
        items.sort_by_key(|(start, _)| *start);
    }

    if items.is_empty() {
        tracing::debug!(discarded, "No recommendations recovered from model output");
        return Err(ParseError::Empty { discarded });
    }

    if items.len() < expected_count {
        tracing::debug!(
            expected = expected_count,
            recovered = items.len(),
            discarded,
            loose_recovered,
            "Parse shortfall"
        );
    }

    Ok(ParseOutcome {
        items: items.into_iter().map(|(_, item)| item).collect(),
        discarded,
        loose_recovered,
    })
}

/// Strict pass: blank lines end a block, and so does a line that begins a new record
fn split_blocks<'a>(lines: &[&'a str]) -> Vec<Block<'a>> {
    let mut blocks = Vec::new();
    let mut current = Block::default();

    for (idx, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            if !current.lines.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
            continue;
        }

        let (bulleted, body) = strip_marker(line);
        let labelled = split_label(body, STRICT_SEPARATORS);

        let boundary = !current.lines.is_empty()
            && match &labelled {
                Some((field, _)) => {
                    current.draft.has(*field) || (bulleted && *field == Field::Genre)
                }
                None => bulleted,
            };
        if boundary {
            blocks.push(std::mem::take(&mut current));
        }

        current.lines.push((idx, *line));
        match labelled {
            Some((field, value)) => current.draft.set(field, value),
            None => current.draft.extend_last(body),
        }
    }

    if !current.lines.is_empty() {
        blocks.push(current);
    }

    blocks
}

/// Loose pass over one rejected segment: any field order, relaxed
/// separators, several fields per line. Fields never carry across segments.
fn parse_loose(lines: &[(usize, &str)]) -> Vec<(usize, RecommendationItem)> {
    let mut recovered = Vec::new();
    let mut draft = Draft::default();
    let mut start = 0;

    for (idx, line) in lines {
        let (_, body) = strip_marker(line);
        for segment in body.split('|') {
            let (_, segment) = strip_marker(segment);
            if segment.is_empty() {
                continue;
            }

            match split_label(segment, LOOSE_SEPARATORS) {
                Some((field, value)) => {
                    if draft.has(field) {
                        emit_complete(std::mem::take(&mut draft), start, &mut recovered);
                    }
                    if draft.is_empty() {
                        start = *idx;
                    }
                    draft.set(field, value);
                }
                None => draft.extend_last(segment),
            }
        }
    }
    emit_complete(draft, start, &mut recovered);

    if !recovered.is_empty() {
        tracing::debug!(recovered = recovered.len(), "Loose parse recovered items");
    }

    recovered
}

fn emit_complete(draft: Draft, start: usize, recovered: &mut Vec<(usize, RecommendationItem)>) {
    if draft.is_complete() {
        if let Some(item) = draft.into_item() {
            recovered.push((start, item));
        }
    }
}

/// Removes a leading bullet (`-`, `*`, `•`) or list number (`1.`, `2)`)
fn strip_marker(line: &str) -> (bool, &str) {
    let trimmed = line.trim();

    // `**Genre:**` is emphasis, not a bullet
    if !trimmed.starts_with("**") {
        if let Some(rest) = trimmed.strip_prefix(['-', '*', '•']) {
            return (true, rest.trim_start());
        }
    }

    let digits = trimmed.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        if let Some(rest) = trimmed[digits..].strip_prefix(['.', ')']) {
            return (true, rest.trim_start());
        }
    }

    (false, trimmed)
}

/// Matches a field label case-insensitively and returns the value after its separator
fn split_label(text: &str, separators: &[char]) -> Option<(Field, String)> {
    let cleaned = text.trim_start_matches(['*', '_']).trim_start();
    let loose = separators.len() > 1;

    for (label, field) in LABELS {
        let Some(prefix) = cleaned.get(..label.len()) else {
            continue;
        };
        if !prefix.eq_ignore_ascii_case(label) {
            continue;
        }

        let mut rest = cleaned[label.len()..].trim_start_matches(['*', '_']);
        if loose {
            rest = rest.trim_start();
        }
        let Some(value) = rest.strip_prefix(separators) else {
            continue;
        };

        let value = value
            .trim_start_matches(['*', '_'])
            .trim()
            .trim_end_matches(['*', '_'])
            .trim();
        return Some((*field, value.to_string()));
    }

    None
}

fn split_artists(raw: &str) -> Vec<String> {
    raw.split(',')
        .flat_map(|part| part.split(" and "))
        .map(|artist| artist.trim().trim_end_matches('.').trim().to_string())
        .filter(|artist| !artist.is_empty())
        .collect()
}
