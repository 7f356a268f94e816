//! Ink lists: named enumerations with an integer value per item, tracked as
//! a sparse set of "currently held" items plus the origin list(s) they came
//! from.
//!
//! Grounded on `inkpy/runtime/ink_list.py` and `list_definition.py`.

use std::collections::HashMap;
use std::fmt;

/// One entry in an ink list: `origin.item`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InkListItem {
    pub origin_name: String,
    pub item_name: String,
}

impl InkListItem {
    pub fn new(origin_name: impl Into<String>, item_name: impl Into<String>) -> Self {
        Self { origin_name: origin_name.into(), item_name: item_name.into() }
    }

    /// Parse `"origin.item"`, as found on the wire as a map key.
    pub fn parse_full_name(full: &str) -> Option<Self> {
        let (origin, item) = full.split_once('.')?;
        Some(Self::new(origin, item))
    }

    pub fn full_name(&self) -> String {
        format!("{}.{}", self.origin_name, self.item_name)
    }
}

impl fmt::Display for InkListItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.item_name)
    }
}

/// The set of named items belonging to one `LIST` declaration, with their
/// integer values.
#[derive(Debug, Clone, PartialEq)]
pub struct ListDefinition {
    pub name: String,
    pub items: HashMap<String, i32>,
}

impl ListDefinition {
    pub fn new(name: impl Into<String>, items: HashMap<String, i32>) -> Self {
        Self { name: name.into(), items }
    }

    pub fn value_for_item(&self, item_name: &str) -> Option<i32> {
        self.items.get(item_name).copied()
    }

    pub fn contains_item_named(&self, item_name: &str) -> bool {
        self.items.contains_key(item_name)
    }
}

/// All `LIST` declarations in a loaded story, keyed by list name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListDefinitions {
    pub lists: HashMap<String, ListDefinition>,
}

impl ListDefinitions {
    pub fn find_item(&self, item: &InkListItem) -> Option<i32> {
        self.lists.get(&item.origin_name).and_then(|l| l.value_for_item(&item.item_name))
    }

    /// Find the single list definition (if exactly one) containing an item
    /// with this bare name — used when an unqualified item name is added to
    /// a list for the first time.
    pub fn find_single_list_containing(&self, item_name: &str) -> Option<&ListDefinition> {
        let mut found = None;
        for def in self.lists.values() {
            if def.contains_item_named(item_name) {
                if found.is_some() {
                    return None;
                }
                found = Some(def);
            }
        }
        found
    }
}

/// A runtime ink list value: a sparse map of held items to their integer
/// value, plus the set of origin list names it may draw new items from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InkList {
    pub items: Vec<(InkListItem, i32)>,
    pub origin_names: Vec<String>,
}

impl InkList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, item: &InkListItem) -> bool {
        self.items.iter().any(|(i, _)| i == item)
    }

    pub fn get(&self, item: &InkListItem) -> Option<i32> {
        self.items.iter().find(|(i, _)| i == item).map(|(_, v)| *v)
    }

    pub fn set(&mut self, item: InkListItem, value: i32) {
        if let Some(entry) = self.items.iter_mut().find(|(i, _)| i == &item) {
            entry.1 = value;
        } else {
            self.items.push((item, value));
        }
    }

    pub fn remove(&mut self, item: &InkListItem) {
        self.items.retain(|(i, _)| i != item);
    }

    /// Items sorted by `(origin_name, value)`, matching `inkpy`'s
    /// `InkList.ordered`.
    pub fn ordered(&self) -> Vec<(InkListItem, i32)> {
        let mut out = self.items.clone();
        out.sort_by(|a, b| (a.0.origin_name.as_str(), a.1).cmp(&(b.0.origin_name.as_str(), b.1)));
        out
    }

    pub fn max(&self) -> Option<(InkListItem, i32)> {
        self.items.iter().cloned().max_by_key(|(_, v)| *v)
    }

    pub fn min(&self) -> Option<(InkListItem, i32)> {
        self.items.iter().cloned().min_by_key(|(_, v)| *v)
    }

    pub fn max_as_list(&self) -> InkList {
        let mut out = InkList { origin_names: self.origin_names.clone(), ..Default::default() };
        if let Some((item, value)) = self.max() {
            out.set(item, value);
        }
        out
    }

    pub fn min_as_list(&self) -> InkList {
        let mut out = InkList { origin_names: self.origin_names.clone(), ..Default::default() };
        if let Some((item, value)) = self.min() {
            out.set(item, value);
        }
        out
    }

    pub fn union(&self, other: &InkList) -> InkList {
        let mut out = self.clone();
        for (item, value) in &other.items {
            out.set(item.clone(), *value);
        }
        out
    }

    pub fn intersect(&self, other: &InkList) -> InkList {
        let mut out = InkList { origin_names: self.origin_names.clone(), ..Default::default() };
        for (item, value) in &self.items {
            if other.contains(item) {
                out.set(item.clone(), *value);
            }
        }
        out
    }

    pub fn has_intersection(&self, other: &InkList) -> bool {
        self.items.iter().any(|(item, _)| other.contains(item))
    }

    pub fn without(&self, other: &InkList) -> InkList {
        let mut out = self.clone();
        for (item, _) in &other.items {
            out.remove(item);
        }
        out
    }

    /// All items from every origin list this list draws from, all "held".
    pub fn all(&self, defs: &ListDefinitions) -> InkList {
        let mut out = InkList { origin_names: self.origin_names.clone(), ..Default::default() };
        for name in &self.origin_names {
            if let Some(def) = defs.lists.get(name) {
                for (item_name, value) in &def.items {
                    out.set(InkListItem::new(name.clone(), item_name.clone()), *value);
                }
            }
        }
        out
    }

    /// Every item from the origin lists *not* currently held.
    pub fn inverse(&self, defs: &ListDefinitions) -> InkList {
        let mut out = InkList { origin_names: self.origin_names.clone(), ..Default::default() };
        for name in &self.origin_names {
            if let Some(def) = defs.lists.get(name) {
                for (item_name, value) in &def.items {
                    let item = InkListItem::new(name.clone(), item_name.clone());
                    if !self.contains(&item) {
                        out.set(item, *value);
                    }
                }
            }
        }
        out
    }

    pub fn list_with_sub_range(&self, min_bound: i32, max_bound: i32) -> InkList {
        let mut out = InkList { origin_names: self.origin_names.clone(), ..Default::default() };
        for (item, value) in self.ordered() {
            if value >= min_bound && value <= max_bound {
                out.set(item, value);
            }
        }
        out
    }

    /// Add a bare item name, resolving it against the known origin list
    /// definitions (or, if it already carries an origin, that definition
    /// directly). Mirrors `InkList.add_item`.
    pub fn add_item_named(&mut self, item_name: &str, defs: &ListDefinitions) -> crate::error::Result<()> {
        if let Some(def) = defs.find_single_list_containing(item_name) {
            let value = def.value_for_item(item_name).unwrap();
            self.set(InkListItem::new(def.name.clone(), item_name.to_string()), value);
            Ok(())
        } else {
            Err(crate::error::Error::Story(format!(
                "could not add the item '{item_name}' to this list because it isn't known to any list definitions previously associated with this list"
            )))
        }
    }

    pub fn set_initial_origin_names(&mut self, names: Vec<String>) {
        self.origin_names = names;
    }
}

impl fmt::Display for InkList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.ordered().into_iter().map(|(item, _)| item.item_name).collect();
        write!(f, "{}", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defs() -> ListDefinitions {
        let mut lists = HashMap::new();
        lists.insert(
            "Colours".to_string(),
            ListDefinition::new(
                "Colours",
                HashMap::from([("red".to_string(), 1), ("green".to_string(), 2), ("blue".to_string(), 3)]),
            ),
        );
        ListDefinitions { lists }
    }

    #[test]
    fn union_and_intersect() {
        let mut a = InkList::new();
        a.set_initial_origin_names(vec!["Colours".into()]);
        a.set(InkListItem::new("Colours", "red"), 1);
        let mut b = InkList::new();
        b.set_initial_origin_names(vec!["Colours".into()]);
        b.set(InkListItem::new("Colours", "green"), 2);

        let u = a.union(&b);
        assert_eq!(u.len(), 2);
        let i = a.intersect(&b);
        assert!(i.is_empty());
    }

    #[test]
    fn all_and_inverse_use_definitions() {
        let defs = defs();
        let mut a = InkList::new();
        a.set_initial_origin_names(vec!["Colours".into()]);
        a.set(InkListItem::new("Colours", "red"), 1);

        assert_eq!(a.all(&defs).len(), 3);
        assert_eq!(a.inverse(&defs).len(), 2);
    }

    #[test]
    fn ordered_sorts_by_origin_then_value() {
        let mut a = InkList::new();
        a.set(InkListItem::new("Colours", "blue"), 3);
        a.set(InkListItem::new("Colours", "red"), 1);
        let ordered = a.ordered();
        assert_eq!(ordered[0].1, 1);
        assert_eq!(ordered[1].1, 3);
    }
}
