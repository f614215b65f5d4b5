//! Location hierarchy.
//!
//! Locations form a parent/child tree stored as an arena keyed by [`LocationId`]. Parents are
//! held as ids on each record; the child index is derived when the tree is built. The data model
//! forbids cycles but every walk tracks visited ids so malformed data cannot loop forever.

use crate::error::{AdtError, AdtResult};
use adt_types::LocationId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub id: LocationId,
    pub name: String,
    #[serde(default)]
    pub parent: Option<LocationId>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl Location {
    pub fn new(id: LocationId, name: impl Into<String>, parent: Option<LocationId>) -> Self {
        Self {
            id,
            name: name.into(),
            parent,
            tags: BTreeSet::new(),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

/// Arena of locations with a derived child index.
#[derive(Clone, Debug, Default)]
pub struct LocationTree {
    locations: BTreeMap<LocationId, Location>,
    children: BTreeMap<LocationId, Vec<LocationId>>,
}

impl LocationTree {
    pub fn new(locations: impl IntoIterator<Item = Location>) -> Self {
        let mut tree = Self::default();
        for location in locations {
            tree.insert(location);
        }
        tree
    }

    /// Adds or replaces a location, keeping the child index in step.
    pub fn insert(&mut self, location: Location) {
        if let Some(previous) = self.locations.get(&location.id) {
            if let Some(old_parent) = previous.parent {
                if let Some(siblings) = self.children.get_mut(&old_parent) {
                    siblings.retain(|c| *c != location.id);
                }
            }
        }
        if let Some(parent) = location.parent {
            let siblings = self.children.entry(parent).or_default();
            if !siblings.contains(&location.id) {
                siblings.push(location.id);
            }
        }
        self.locations.insert(location.id, location);
    }

    pub fn get(&self, id: LocationId) -> Option<&Location> {
        self.locations.get(&id)
    }

    pub fn contains(&self, id: LocationId) -> bool {
        self.locations.contains_key(&id)
    }

    pub fn parent_of(&self, id: LocationId) -> Option<LocationId> {
        self.locations.get(&id).and_then(|l| l.parent)
    }

    pub fn children_of(&self, id: LocationId) -> &[LocationId] {
        self.children.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Location> {
        self.locations.values()
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn has_tag(&self, id: LocationId, tag: &str) -> bool {
        self.locations.get(&id).is_some_and(|l| l.has_tag(tag))
    }

    /// True if the location carries the supports-visits tag.
    pub fn supports_visits(&self, id: LocationId, supports_visits_tag: &str) -> bool {
        self.has_tag(id, supports_visits_tag)
    }

    /// Ids of every location carrying `tag`, in id order.
    pub fn tagged(&self, tag: &str) -> Vec<LocationId> {
        self.locations
            .values()
            .filter(|l| l.has_tag(tag))
            .map(|l| l.id)
            .collect()
    }

    /// Returns `location` if it supports visits, otherwise its nearest ancestor that does.
    ///
    /// # Errors
    ///
    /// Returns [`AdtError::Configuration`] if `location` is `None`, is not in the tree, or neither
    /// it nor any ancestor carries the supports-visits tag.
    pub fn resolve_visit_location(
        &self,
        location: Option<LocationId>,
        supports_visits_tag: &str,
    ) -> AdtResult<LocationId> {
        let Some(start) = location else {
            return Err(AdtError::Configuration(
                "location is required to find a visit location".into(),
            ));
        };

        let mut seen = BTreeSet::new();
        let mut current = Some(start);
        while let Some(id) = current {
            if !seen.insert(id) {
                break;
            }
            let Some(record) = self.locations.get(&id) else {
                break;
            };
            if record.has_tag(supports_visits_tag) {
                return Ok(id);
            }
            current = record.parent;
        }

        Err(AdtError::Configuration(format!(
            "location {start} does not support visits and has no ancestor that does"
        )))
    }

    /// True if `a == b`, or `a` is an ancestor of `b`.
    ///
    /// Two missing locations count as the same place; one missing location matches nothing.
    pub fn is_same_or_ancestor(&self, a: Option<LocationId>, b: Option<LocationId>) -> bool {
        let (a, b) = match (a, b) {
            (None, None) => return true,
            (Some(a), Some(b)) => (a, b),
            _ => return false,
        };

        let mut seen = BTreeSet::new();
        let mut current = Some(b);
        while let Some(id) = current {
            if id == a {
                return true;
            }
            if !seen.insert(id) {
                return false;
            }
            current = self.parent_of(id);
        }
        false
    }

    /// The location itself plus every transitive child, each listed once.
    pub fn descendants(&self, location: LocationId) -> BTreeSet<LocationId> {
        let mut found = BTreeSet::new();
        let mut pending = vec![location];
        while let Some(id) = pending.pop() {
            if found.insert(id) {
                pending.extend(self.children_of(id).iter().copied());
            }
        }
        found
    }
}
