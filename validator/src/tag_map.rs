// tag_map.rs — Tag/index/name slot collections
//
// Parses `TAG:index:name` declarations into an ordered slot collection.
// Every stream and side-packet list on a node (and the graph-level input
// and output stream lists) is turned into a `TagMap`; the position of a
// slot in the map is its stable `SlotId`.
//
// Preconditions: none.
// Postconditions: slot ids are dense, ordered by tag then index.
// Failure modes: malformed tags/names/indices, duplicate or missing indices.
// Side effects: none.

use std::collections::BTreeMap;
use std::fmt;

// ── Public types ────────────────────────────────────────────────────────────

/// Dense position of a slot inside one `TagMap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub usize);

/// One parsed `TAG:index:name` declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagIndexName {
    pub tag: String,
    /// `None` when the declaration carried no explicit index.
    pub index: Option<usize>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TagData {
    first_id: usize,
    count: usize,
}

/// Ordered collection of named slots grouped by tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagMap {
    tags: BTreeMap<String, TagData>,
    /// Names indexed by `SlotId`.
    names: Vec<String>,
}

/// A malformed declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagMapError {
    pub entry: String,
    pub reason: String,
}

impl fmt::Display for TagMapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\": {}", self.entry, self.reason)
    }
}

impl std::error::Error for TagMapError {}

// ── Parsing ─────────────────────────────────────────────────────────────────

fn is_valid_tag(tag: &str) -> bool {
    let mut chars = tag.chars();
    match chars.next() {
        Some(c) if c.is_ascii_uppercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

fn parse_index(entry: &str, text: &str) -> Result<usize, TagMapError> {
    let valid = !text.is_empty()
        && text.chars().all(|c| c.is_ascii_digit())
        && (text == "0" || !text.starts_with('0'));
    if !valid {
        return Err(TagMapError {
            entry: entry.to_string(),
            reason: format!("index \"{}\" is not a non-negative integer", text),
        });
    }
    text.parse().map_err(|_| TagMapError {
        entry: entry.to_string(),
        reason: format!("index \"{}\" is out of range", text),
    })
}

fn check_tag(entry: &str, tag: &str) -> Result<(), TagMapError> {
    if is_valid_tag(tag) {
        Ok(())
    } else {
        Err(TagMapError {
            entry: entry.to_string(),
            reason: format!("tag \"{}\" must match [A-Z_][A-Z0-9_]*", tag),
        })
    }
}

/// Parse `name`, `TAG:name` or `TAG:index:name`.
pub fn parse_tag_index_name(entry: &str) -> Result<TagIndexName, TagMapError> {
    let parts: Vec<&str> = entry.split(':').collect();
    let (tag, index, name) = match parts.as_slice() {
        [name] => (String::new(), None, *name),
        [tag, name] => {
            check_tag(entry, tag)?;
            (tag.to_string(), None, *name)
        }
        [tag, index, name] => {
            check_tag(entry, tag)?;
            (tag.to_string(), Some(parse_index(entry, index)?), *name)
        }
        _ => {
            return Err(TagMapError {
                entry: entry.to_string(),
                reason: "expected \"name\", \"TAG:name\" or \"TAG:index:name\"".to_string(),
            })
        }
    };
    if !is_valid_name(name) {
        return Err(TagMapError {
            entry: entry.to_string(),
            reason: format!("name \"{}\" must match [a-z_][a-z0-9_]*", name),
        });
    }
    Ok(TagIndexName {
        tag,
        index,
        name: name.to_string(),
    })
}

/// Parse a `TAG`, `TAG:index` or `:index` reference to an existing slot.
pub fn parse_tag_index(text: &str) -> Result<(String, usize), TagMapError> {
    match text.split_once(':') {
        None if text.is_empty() => Ok((String::new(), 0)),
        None => {
            check_tag(text, text)?;
            Ok((text.to_string(), 0))
        }
        Some(("", index)) => Ok((String::new(), parse_index(text, index)?)),
        Some((tag, index)) => {
            check_tag(text, tag)?;
            Ok((tag.to_string(), parse_index(text, index)?))
        }
    }
}

// ── TagMap ──────────────────────────────────────────────────────────────────

impl TagMap {
    /// Build a map from declarations in source order.
    ///
    /// Untagged entries are indexed in declaration order. A tag used with
    /// explicit indices must cover `0..n` exactly once; a tag used without
    /// an index may appear only once (index 0).
    pub fn create<S: AsRef<str>>(entries: &[S]) -> Result<TagMap, TagMapError> {
        let mut by_tag: BTreeMap<String, Vec<(Option<usize>, String, &str)>> = BTreeMap::new();
        for entry in entries {
            let entry = entry.as_ref();
            let parsed = parse_tag_index_name(entry)?;
            by_tag
                .entry(parsed.tag)
                .or_default()
                .push((parsed.index, parsed.name, entry));
        }

        let mut map = TagMap::default();
        for (tag, items) in by_tag {
            let first_id = map.names.len();
            let count = items.len();
            let explicit = items.iter().filter(|(idx, _, _)| idx.is_some()).count();

            let mut slots: Vec<Option<String>> = vec![None; count];
            if tag.is_empty() {
                // Untagged: implicit indices follow declaration order; explicit
                // `:index:` is not expressible, so every item is implicit.
                for (i, (_, name, _)) in items.into_iter().enumerate() {
                    slots[i] = Some(name);
                }
            } else if explicit == 0 {
                if count > 1 {
                    return Err(TagMapError {
                        entry: items[1].2.to_string(),
                        reason: format!(
                            "tag \"{}\" is used {} times without an index",
                            tag, count
                        ),
                    });
                }
                slots[0] = items.into_iter().next().map(|(_, name, _)| name);
            } else if explicit != count {
                let entry = items
                    .iter()
                    .find(|(idx, _, _)| idx.is_none())
                    .map(|(_, _, e)| e.to_string())
                    .unwrap_or_default();
                return Err(TagMapError {
                    entry,
                    reason: format!("tag \"{}\" mixes indexed and unindexed entries", tag),
                });
            } else {
                for (index, name, entry) in items {
                    let index = index.unwrap_or_default();
                    if index >= count {
                        return Err(TagMapError {
                            entry: entry.to_string(),
                            reason: format!(
                                "index {} is out of range for tag \"{}\" with {} entries",
                                index, tag, count
                            ),
                        });
                    }
                    if slots[index].is_some() {
                        return Err(TagMapError {
                            entry: entry.to_string(),
                            reason: format!("index {} of tag \"{}\" is repeated", index, tag),
                        });
                    }
                    slots[index] = Some(name);
                }
            }

            map.names.extend(slots.into_iter().flatten());
            map.tags.insert(tag, TagData { first_id, count });
        }
        Ok(map)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Names indexed by `SlotId`.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn name(&self, id: SlotId) -> &str {
        &self.names[id.0]
    }

    /// Look up the slot for `tag` and `index`.
    pub fn get_id(&self, tag: &str, index: usize) -> Option<SlotId> {
        let data = self.tags.get(tag)?;
        (index < data.count).then(|| SlotId(data.first_id + index))
    }

    /// Tag and index of a slot.
    pub fn tag_and_index(&self, id: SlotId) -> Option<(&str, usize)> {
        self.tags
            .iter()
            .find(|(_, d)| id.0 >= d.first_id && id.0 < d.first_id + d.count)
            .map(|(tag, d)| (tag.as_str(), id.0 - d.first_id))
    }

    pub fn num_entries_for_tag(&self, tag: &str) -> usize {
        self.tags.get(tag).map(|d| d.count).unwrap_or(0)
    }

    pub fn ids(&self) -> impl Iterator<Item = SlotId> {
        (0..self.names.len()).map(SlotId)
    }
}

/// `TAG:index` label for a slot, used in messages.
pub fn slot_label(map: &TagMap, id: SlotId) -> String {
    match map.tag_and_index(id) {
        Some(("", index)) => format!(":{}", index),
        Some((tag, index)) => format!("{}:{}", tag, index),
        None => format!("#{}", id.0),
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
