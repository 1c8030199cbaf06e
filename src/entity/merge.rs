use serde_json::Value;
use std::collections::BTreeMap;

/// Which upstream shape a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Legacy,
    Current,
}

/// One upstream record, tagged with its shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Source<L, C> {
    Legacy(L),
    Current(C),
}

impl Shape {
    pub fn as_str(&self) -> &'static str {
        match self {
            Shape::Legacy => "legacy",
            Shape::Current => "current",
        }
    }
}

impl<L, C> Source<L, C> {
    pub fn shape(&self) -> Shape {
        match self {
            Source::Legacy(_) => Shape::Legacy,
            Source::Current(_) => Shape::Current,
        }
    }
}

/// Upstream records addressable by a stable numeric id.
pub trait Keyed {
    fn id(&self) -> u64;
}

impl<L: Keyed, C: Keyed> Keyed for Source<L, C> {
    fn id(&self) -> u64 {
        match self {
            Source::Legacy(record) => record.id(),
            Source::Current(record) => record.id(),
        }
    }
}

/// A merged entity built from any number of tagged records.
///
/// `absorb` follows one rule for every field: a legacy value only fills a
/// blank, a current value always replaces. With at most one record per
/// shape the result is the same whichever arrives first.
pub trait Canonical: Sized {
    type Legacy: Keyed;
    type Current: Keyed;

    /// Entity with only its id set.
    fn empty(id: u64) -> Self;

    fn id(&self) -> u64;

    fn absorb(&mut self, source: Source<Self::Legacy, Self::Current>);

    fn from_source(source: Source<Self::Legacy, Self::Current>) -> Self {
        let mut entity = Self::empty(source.id());
        entity.absorb(source);
        entity
    }
}

/// Merges one legacy and one current record for the same id.
pub fn merge_pair<E: Canonical>(legacy: E::Legacy, current: E::Current) -> E {
    let mut entity = E::from_source(Source::Current(current));
    entity.absorb(Source::Legacy(legacy));
    entity
}

/// Folds tagged records into an id-keyed collection.
pub fn absorb_all<E, I>(into: &mut BTreeMap<u64, E>, sources: I)
where
    E: Canonical,
    I: IntoIterator<Item = Source<E::Legacy, E::Current>>,
{
    for source in sources {
        let id = source.id();
        into.entry(id)
            .or_insert_with(|| E::empty(id))
            .absorb(source);
    }
}

pub(crate) fn fill<T>(slot: &mut Option<T>, incoming: Option<T>, shape: Shape) {
    match (shape, incoming) {
        (_, None) => {}
        (Shape::Current, value) => *slot = value,
        (Shape::Legacy, value) => {
            if slot.is_none() {
                *slot = value;
            }
        }
    }
}

/// Merges unnamed fields.
///
/// A key in `reserved` names a typed field of the canonical struct, so it is
/// kept under a shape prefix (`difficulty` from a legacy record becomes
/// `legacy_difficulty`) and serialization never repeats a key.
pub(crate) fn fill_extra(
    slot: &mut BTreeMap<String, Value>,
    incoming: BTreeMap<String, Value>,
    reserved: &[&str],
    shape: Shape,
) {
    for (key, value) in incoming {
        if value.is_null() {
            continue;
        }
        let key = if reserved.contains(&key.as_str()) {
            format!("{}_{}", shape.as_str(), key)
        } else {
            key
        };
        match shape {
            Shape::Current => {
                slot.insert(key, value);
            }
            Shape::Legacy => {
                slot.entry(key).or_insert(value);
            }
        }
    }
}
