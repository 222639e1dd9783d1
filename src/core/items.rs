//! Ordered, de-duplicated containers shared by hosts, runners and results.
//!
//! Every operation returns a new container; the backing sequence keeps
//! first-seen order. Field paths (`host.ip`, `task.name`, `meta.provider`)
//! address the item's JSON record.

use super::error::{Result, ViperError};
use super::registry::Registry;
use indexmap::IndexSet;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

/// A value that can live in an [`Items`] container.
pub trait Item: Clone + Eq + Hash + Serialize + fmt::Debug + Send + Sync + 'static {
    /// Type name used in error messages.
    const KIND: &'static str;

    /// The item's JSON record. Persistence goes through this.
    fn try_record(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(|e| ViperError::decode(Self::KIND, e))
    }

    /// Record for field lookups and templates; an item that cannot be
    /// serialized reads as `null`, so every field renders empty.
    fn to_record(&self) -> Value {
        self.try_record().unwrap_or(Value::Null)
    }

    fn from_record(record: Value, registry: &Registry) -> Result<Self>;
}

/// Walk a dotted path through a record.
pub fn field_value<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(record, |v, key| match v {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Render a field for comparison or display. Missing and null render empty.
pub fn render_field(record: &Value, path: &str) -> String {
    match field_value(record, path) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Replace `{field.path}` placeholders with rendered fields. `{{` is a literal brace.
pub fn render_template(template: &str, record: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        if let Some(escaped) = after.strip_prefix('{') {
            out.push('{');
            rest = escaped;
            continue;
        }
        match after.find('}') {
            Some(close) => {
                out.push_str(&render_field(record, after[..close].trim()));
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Comparison used by [`Items::where_field`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WhereCondition {
    Is,
    IsNot,
    Contains,
    NotContains,
    StartsWith,
    NotStartsWith,
    EndsWith,
    NotEndsWith,
}

impl WhereCondition {
    pub const ALL: [Self; 8] = [
        Self::Is,
        Self::IsNot,
        Self::Contains,
        Self::NotContains,
        Self::StartsWith,
        Self::NotStartsWith,
        Self::EndsWith,
        Self::NotEndsWith,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Is => "IS",
            Self::IsNot => "IS_NOT",
            Self::Contains => "CONTAINS",
            Self::NotContains => "NOT_CONTAINS",
            Self::StartsWith => "STARTSWITH",
            Self::NotStartsWith => "NOT_STARTSWITH",
            Self::EndsWith => "ENDSWITH",
            Self::NotEndsWith => "NOT_ENDSWITH",
        }
    }

    /// Test one rendered field against one value.
    pub fn matches(&self, field: &str, value: &str) -> bool {
        match self {
            Self::Is => field == value,
            Self::IsNot => field != value,
            Self::Contains => field.contains(value),
            Self::NotContains => !field.contains(value),
            Self::StartsWith => field.starts_with(value),
            Self::NotStartsWith => !field.starts_with(value),
            Self::EndsWith => field.ends_with(value),
            Self::NotEndsWith => !field.ends_with(value),
        }
    }
}

impl fmt::Display for WhereCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WhereCondition {
    type Err = ViperError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| {
                let names: Vec<_> = Self::ALL.iter().map(|c| c.as_str()).collect();
                ViperError::Input(format!(
                    "invalid where condition {:?}, expecting one of {}",
                    s,
                    names.join(", ")
                ))
            })
    }
}

/// Ordered, de-duplicated collection of items.
///
/// Equality is set equality: two containers are equal when they hold the
/// same items, whatever their order.
#[derive(Debug, Clone)]
pub struct Items<T> {
    all: Vec<T>,
}

impl<T> Default for Items<T> {
    fn default() -> Self {
        Self { all: Vec::new() }
    }
}

impl<T: Item> Items<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from items, dropping duplicates and keeping first-seen order.
    pub fn from_items<I: IntoIterator<Item = T>>(items: I) -> Self {
        let unique: IndexSet<T> = items.into_iter().collect();
        Self {
            all: unique.into_iter().collect(),
        }
    }

    /// Build from nested groups of items.
    pub fn flatten<I, J>(groups: I) -> Self
    where
        I: IntoIterator<Item = J>,
        J: IntoIterator<Item = T>,
    {
        Self::from_items(groups.into_iter().flatten())
    }

    pub fn from_list(list: Vec<Value>, registry: &Registry) -> Result<Self> {
        let items = list
            .into_iter()
            .map(|record| T::from_record(record, registry))
            .collect::<Result<Vec<_>>>()
            .map_err(|e| ViperError::Input(format!("invalid input data for {}s: {}", T::KIND, e)))?;
        Ok(Self::from_items(items))
    }

    pub fn to_list(&self) -> Vec<Value> {
        self.all.iter().map(Item::to_record).collect()
    }

    pub fn from_json(json: &str, registry: &Registry) -> Result<Self> {
        let list: Vec<Value> = serde_json::from_str(json)
            .map_err(|e| ViperError::Input(format!("invalid input data for {}s: {}", T::KIND, e)))?;
        Self::from_list(list, registry)
    }

    pub fn to_json(&self) -> String {
        Value::Array(self.to_list()).to_string()
    }

    pub fn count(&self) -> usize {
        self.all.len()
    }

    pub fn len(&self) -> usize {
        self.all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }

    pub fn first(&self) -> Option<&T> {
        self.all.first()
    }

    pub fn last(&self) -> Option<&T> {
        self.all.last()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.all.get(index)
    }

    /// The backing ordered sequence.
    pub fn all(&self) -> &[T] {
        &self.all
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.all.iter()
    }

    pub fn into_vec(self) -> Vec<T> {
        self.all
    }

    pub fn union(&self, other: &Self) -> Self {
        Self::from_items(self.all.iter().chain(other.all.iter()).cloned())
    }

    /// Slice with Python-style bounds: negative indices count from the end,
    /// out-of-range bounds clamp.
    pub fn range(&self, start: Option<isize>, end: Option<isize>) -> Self {
        let len = self.all.len();
        let clamp = |i: isize| -> usize {
            if i < 0 {
                len.saturating_sub(i.unsigned_abs())
            } else {
                (i as usize).min(len)
            }
        };
        let lo = start.map(clamp).unwrap_or(0);
        let hi = end.map(clamp).unwrap_or(len);
        if lo >= hi {
            return Self::new();
        }
        Self {
            all: self.all[lo..hi].to_vec(),
        }
    }

    pub fn head(&self, n: usize) -> Self {
        Self {
            all: self.all.iter().take(n).cloned().collect(),
        }
    }

    pub fn tail(&self, n: usize) -> Self {
        let skip = self.all.len().saturating_sub(n);
        Self {
            all: self.all[skip..].to_vec(),
        }
    }

    /// Stable sort by a derived key.
    pub fn sort_by_key<K, F>(&self, mut key: F, reverse: bool) -> Self
    where
        K: Ord,
        F: FnMut(&T) -> K,
    {
        let mut keyed: Vec<(K, T)> = self.all.iter().map(|i| (key(i), i.clone())).collect();
        if reverse {
            keyed.sort_by(|a, b| b.0.cmp(&a.0));
        } else {
            keyed.sort_by(|a, b| a.0.cmp(&b.0));
        }
        Self {
            all: keyed.into_iter().map(|(_, i)| i).collect(),
        }
    }

    /// Stable sort by rendered field paths, compared left to right.
    pub fn order_by(&self, paths: &[&str], reverse: bool) -> Self {
        self.sort_by_key(
            |item| {
                let record = item.to_record();
                paths
                    .iter()
                    .map(|p| render_field(&record, p))
                    .collect::<Vec<_>>()
            },
            reverse,
        )
    }

    /// Keep items for which `predicate(item, args)` holds.
    pub fn filter<F>(&self, predicate: F, args: &[String]) -> Self
    where
        F: Fn(&T, &[String]) -> bool,
    {
        Self {
            all: self
                .all
                .iter()
                .filter(|i| predicate(i, args))
                .cloned()
                .collect(),
        }
    }

    /// Filter with a predicate looked up in the registry.
    pub fn filter_named(&self, registry: &Registry, path: &str, args: &[String]) -> Result<Self> {
        let predicate = registry.filter::<T>(path)?;
        Ok(self.filter(|item, args| predicate(item, args), args))
    }

    /// The single item matching `predicate`.
    pub fn find_one<F>(&self, predicate: F) -> Result<T>
    where
        F: Fn(&T) -> bool,
    {
        let mut found = self.all.iter().filter(|i| predicate(i));
        match (found.next(), found.next()) {
            (Some(item), None) => Ok(item.clone()),
            (None, _) => Err(ViperError::Input(format!(
                "could not find any {}",
                T::KIND
            ))),
            (Some(_), Some(_)) => Err(ViperError::Input(format!(
                "multiple {}s found",
                T::KIND
            ))),
        }
    }

    /// Keep items whose rendered field satisfies `condition` for any of `values`.
    ///
    /// The negated conditions follow the same any-of rule, so with several
    /// values `IS_NOT` keeps an item unless it equals every one of them.
    pub fn where_field<S: AsRef<str>>(
        &self,
        path: &str,
        condition: WhereCondition,
        values: &[S],
    ) -> Self {
        Self {
            all: self
                .all
                .iter()
                .filter(|item| {
                    let field = render_field(&item.to_record(), path);
                    values
                        .iter()
                        .any(|v| condition.matches(&field, v.as_ref()))
                })
                .cloned()
                .collect(),
        }
    }

    /// Hand the container to a handler together with extra arguments.
    pub fn pipe<R, F>(self, handler: F, args: &[String]) -> R
    where
        F: FnOnce(Self, &[String]) -> R,
    {
        handler(self, args)
    }

    /// Render every item through `template` and join with `sep`.
    pub fn format(&self, template: &str, sep: &str) -> String {
        self.all
            .iter()
            .map(|i| render_template(template, &i.to_record()))
            .collect::<Vec<_>>()
            .join(sep)
    }
}

impl<T: Item + Ord> Items<T> {
    /// Stable sort by the item's natural order.
    pub fn sort(&self, reverse: bool) -> Self {
        self.sort_by_key(|i| i.clone(), reverse)
    }
}

impl<T: Item> PartialEq for Items<T> {
    fn eq(&self, other: &Self) -> bool {
        if self.all.len() != other.all.len() {
            return false;
        }
        let theirs: HashSet<&T> = other.all.iter().collect();
        self.all.iter().all(|i| theirs.contains(i))
    }
}

impl<T: Item> Eq for Items<T> {}

impl<T: Item> FromIterator<T> for Items<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::from_items(iter)
    }
}

impl<T> IntoIterator for Items<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.all.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a Items<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.all.iter()
    }
}
