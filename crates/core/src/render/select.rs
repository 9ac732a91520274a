//! Weighted entry selection. Simple tables draw one entry by cumulative
//! weight; collections flatten their referenced tables into one pool;
//! composites pick a source table by weight, then recurse.

use crate::{
    collection::{Document, Entry, Table, TableId, TableKind},
    random::Sampler,
    render::error::RollError,
};
use std::collections::HashSet;
use tracing::debug;

/// Identity of an entry within its table: its author-assigned id, or its
/// position when it has none
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum EntryIdent {
    Id(String),
    Index(usize),
}

/// Identity of an entry across tables, for unique-mode exclusion
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct EntryKey {
    pub table: TableId,
    pub ident: EntryIdent,
}

impl EntryKey {
    fn new(table: &Table, entry: &Entry, index: usize) -> Self {
        Self {
            table: table.id.clone(),
            ident: entry
                .id
                .clone()
                .map_or(EntryIdent::Index(index), EntryIdent::Id),
        }
    }
}

/// Entries excluded from selection (unique draws, `again` chains)
pub type ExclusionSet = HashSet<EntryKey>;

/// A drawn entry together with the simple table that owns it. For
/// collections and composites the owning table differs from the requested
/// one; the owner is what sets materialization and `again` operate on.
#[derive(Debug)]
pub struct Selected<'a> {
    pub table: &'a Table,
    pub entry: &'a Entry,
    pub key: EntryKey,
}

/// Pick one entry from a table by weighted random choice. `Ok(None)` means
/// the exclusion set left nothing to draw — the recoverable "pool
/// exhausted" signal for unique multi-rolls. A table with no selectable
/// entries at all is a document error.
pub fn select<'a>(
    document: &'a Document,
    table: &'a Table,
    sampler: &mut dyn Sampler,
    exclude: &ExclusionSet,
) -> Result<Option<Selected<'a>>, RollError> {
    if let TableKind::Composite { sources } = &table.kind {
        let total: f64 = sources.iter().map(|s| s.weight.max(0.0)).sum();
        if total <= 0.0 {
            return Err(RollError::EmptyTable(table.id.clone()));
        }
        let mut draw = sampler.sample(total);
        let mut chosen = None;
        for source in sources {
            let weight = source.weight.max(0.0);
            if weight <= 0.0 {
                continue;
            }
            chosen = Some(source);
            if draw < weight {
                break;
            }
            draw -= weight;
        }
        // The loop always assigns for total > 0; fall through covers
        // floating-point edge draws
        let Some(source) = chosen else {
            return Err(RollError::EmptyTable(table.id.clone()));
        };
        let child = document.table(&source.table_id).ok_or_else(|| {
            RollError::UnknownTable(source.table_id.clone())
        })?;
        return select(document, child, sampler, exclude);
    }

    let mut visited = HashSet::new();
    let pool = flatten(document, table, &mut visited)?;

    let mut total = 0.0;
    let weighted: Vec<(&Table, &Entry, usize, f64)> = pool
        .into_iter()
        .map(|(owner, entry, index)| {
            let weight = if exclude.contains(&EntryKey::new(
                owner, entry, index,
            )) {
                0.0
            } else {
                entry.weight.max(0.0)
            };
            total += weight;
            (owner, entry, index, weight)
        })
        .collect();
    if total <= 0.0 {
        return if exclude.is_empty() {
            Err(RollError::EmptyTable(table.id.clone()))
        } else {
            Ok(None)
        };
    }

    let mut draw = sampler.sample(total);
    let mut last = None;
    for (owner, entry, index, weight) in weighted {
        if weight <= 0.0 {
            continue;
        }
        last = Some((owner, entry, index));
        if draw < weight {
            break;
        }
        draw -= weight;
    }
    // `last` is always set for total > 0; the fall-through covers
    // floating-point edge draws landing exactly on the total
    Ok(last.map(|(owner, entry, index)| Selected {
        table: owner,
        entry,
        key: EntryKey::new(owner, entry, index),
    }))
}

/// Flatten a table into `(owning table, entry, index)` triples. Collections
/// recurse; reference cycles and composite members are skipped.
fn flatten<'a>(
    document: &'a Document,
    table: &'a Table,
    visited: &mut HashSet<&'a str>,
) -> Result<Vec<(&'a Table, &'a Entry, usize)>, RollError> {
    match &table.kind {
        TableKind::Simple { entries } => Ok(entries
            .iter()
            .enumerate()
            .map(|(index, entry)| (table, entry, index))
            .collect()),
        TableKind::Collection { tables } => {
            if !visited.insert(&*table.id) {
                debug!(table = %table.id, "Skipping collection cycle");
                return Ok(Vec::new());
            }
            let mut pool = Vec::new();
            for id in tables {
                let child = document.table(id).ok_or_else(|| {
                    RollError::UnknownTable(id.clone())
                })?;
                if matches!(child.kind, TableKind::Composite { .. }) {
                    debug!(
                        table = %child.id,
                        "Skipping composite member of collection"
                    );
                    continue;
                }
                pool.extend(flatten(document, child, visited)?);
            }
            Ok(pool)
        }
        TableKind::Composite { .. } => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        random::{RngSampler, SequenceSampler},
        test_util::{document, entry, simple, weighted},
    };
    use grimoire_util::{assert_err, assert_matches};
    use rstest::rstest;

    /// A scripted fraction lands on the entry owning that slice of the
    /// cumulative weight
    #[rstest]
    #[case::first(0.0, "goblin")]
    #[case::second(0.3, "orc")]
    #[case::last(0.9, "troll")]
    fn test_weighted_choice(#[case] fraction: f64, #[case] expected: &str) {
        let document = document(
            [simple(
                "enemy",
                [
                    weighted("goblin", 1.0),
                    weighted("orc", 2.0),
                    weighted("troll", 1.0),
                ],
            )],
            [],
        );
        let table = document.table("enemy").unwrap();
        let mut sampler = SequenceSampler::new([fraction]);
        let selected =
            select(&document, table, &mut sampler, &ExclusionSet::new())
                .unwrap()
                .unwrap();
        assert_eq!(selected.entry.value, expected);
    }

    /// Entries with non-positive weight are legal but unreachable
    #[test]
    fn test_zero_weight_unreachable() {
        let document = document(
            [simple(
                "enemy",
                [weighted("ghost", 0.0), weighted("orc", 1.0)],
            )],
            [],
        );
        let table = document.table("enemy").unwrap();
        for fraction in [0.0, 0.5, 0.99] {
            let mut sampler = SequenceSampler::new([fraction]);
            let selected = select(
                &document,
                table,
                &mut sampler,
                &ExclusionSet::new(),
            )
            .unwrap()
            .unwrap();
            assert_eq!(selected.entry.value, "orc");
        }
    }

    /// Excluding every entry yields the recoverable exhaustion signal;
    /// a table that's empty outright is a document error
    #[test]
    fn test_exhaustion() {
        let document =
            document([simple("enemy", [entry("goblin")])], []);
        let table = document.table("enemy").unwrap();
        let mut sampler = SequenceSampler::new([]);

        let mut exclude = ExclusionSet::new();
        exclude.insert(EntryKey {
            table: "enemy".into(),
            ident: EntryIdent::Index(0),
        });
        let selected =
            select(&document, table, &mut sampler, &exclude).unwrap();
        assert_matches!(selected, None);

        let empty = document_empty();
        let table = empty.table("empty").unwrap();
        assert_err!(
            select(&empty, table, &mut sampler, &ExclusionSet::new()),
            "no selectable entries"
        );
    }

    /// Collections flatten their referenced tables into a single pool
    #[test]
    fn test_collection_flattening() {
        let document = document(
            [
                simple("goblins", [entry("Sniv")]),
                simple("orcs", [entry("Gor")]),
                crate::test_util::collection(
                    "humanoid",
                    ["goblins", "orcs"],
                ),
            ],
            [],
        );
        let table = document.table("humanoid").unwrap();
        // Second half of the pooled weight lands in `orcs`, and the owning
        // table follows the entry
        let mut sampler = SequenceSampler::new([0.75]);
        let selected =
            select(&document, table, &mut sampler, &ExclusionSet::new())
                .unwrap()
                .unwrap();
        assert_eq!(selected.entry.value, "Gor");
        assert_eq!(selected.table.id, "orcs".into());
        assert_eq!(selected.key.table, "orcs".into());
    }

    /// Composites pick a source by weight, then roll it
    #[test]
    fn test_composite() {
        let document = document(
            [
                simple("goblins", [entry("Sniv")]),
                simple("dragons", [entry("Smaug")]),
                crate::test_util::composite(
                    "encounter",
                    [("goblins", 3.0), ("dragons", 1.0)],
                ),
            ],
            [],
        );
        let table = document.table("encounter").unwrap();
        // First draw picks the source, second the entry
        let mut sampler = SequenceSampler::new([0.9, 0.0]);
        let selected =
            select(&document, table, &mut sampler, &ExclusionSet::new())
                .unwrap()
                .unwrap();
        assert_eq!(selected.entry.value, "Smaug");
    }

    /// Over many draws, selection frequency converges on weight share
    #[test]
    fn test_weight_law() {
        let document = document(
            [simple(
                "enemy",
                [weighted("goblin", 1.0), weighted("troll", 3.0)],
            )],
            [],
        );
        let table = document.table("enemy").unwrap();
        let mut sampler = RngSampler::seeded(1234);
        let draws = 2000;
        let goblins = (0..draws)
            .filter(|_| {
                let selected = select(
                    &document,
                    table,
                    &mut sampler,
                    &ExclusionSet::new(),
                )
                .unwrap()
                .unwrap();
                selected.entry.value == "goblin"
            })
            .count();
        let share = goblins as f64 / f64::from(draws);
        assert!(
            (share - 0.25).abs() < 0.05,
            "goblin share {share} too far from weight share 0.25"
        );
    }

    fn document_empty() -> crate::collection::Document {
        document([simple("empty", [])], [])
    }
}
