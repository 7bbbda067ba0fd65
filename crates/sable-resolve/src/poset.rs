//! A partially ordered set of operator priority classes.
//!
//! Operators with equal priority share an equivalence class (union-find);
//! classes are related by a strict directed acyclic `<`. Conflicting edges
//! are reported as cycles and dropped, so one bad fixity declaration cannot
//! poison the rest of the table.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// An equivalence class of items with the same priority.
///
/// Class identity is stable only until the next `add_relation` merge; treat
/// it as a short-lived handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassId(u32);

/// A conflicting relation between two classes. Non-fatal: the caller reports
/// it and the edge is dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct PosetCycle<T> {
    pub left: Vec<T>,
    pub right: Vec<T>,
}

/// Union-find equivalence classes with a DAG of priority edges.
#[derive(Debug, Clone, Default)]
pub struct Poset<T> {
    /// Union-find parent per slot; a root points to itself.
    parent: Vec<u32>,
    /// The item stored in each slot.
    items: Vec<T>,
    /// Item to slot lookup.
    index: BTreeMap<T, u32>,
    /// Root -> roots with strictly higher priority.
    above: BTreeMap<u32, BTreeSet<u32>>,
}

impl<T: Ord + Clone> Poset<T> {
    pub fn new() -> Self {
        Self {
            parent: Vec::new(),
            items: Vec::new(),
            index: BTreeMap::new(),
            above: BTreeMap::new(),
        }
    }

    /// The representative class of `item`, creating a singleton class if the
    /// item is new.
    pub fn eq_class(&mut self, item: &T) -> ClassId {
        let slot = match self.index.get(item) {
            Some(&slot) => slot,
            None => {
                let slot = self.parent.len() as u32;
                self.parent.push(slot);
                self.items.push(item.clone());
                self.index.insert(item.clone(), slot);
                slot
            }
        };
        ClassId(self.find(slot))
    }

    /// Enumerate the members of a class, in item order.
    pub fn items(&mut self, class: ClassId) -> Vec<T> {
        let root = self.find(class.0);
        let slots: Vec<u32> = (0..self.parent.len() as u32)
            .filter(|&slot| self.find(slot) == root)
            .collect();
        let mut members: Vec<T> = slots
            .into_iter()
            .map(|slot| self.items[slot as usize].clone())
            .collect();
        members.sort();
        members
    }

    /// Record `left ord right`. `Less` and `Greater` add a directed edge,
    /// `Equal` merges the two classes. A relation that contradicts the
    /// existing order is returned as a [`PosetCycle`] and dropped.
    pub fn add_relation(
        &mut self,
        left: &T,
        right: &T,
        ord: Ordering,
    ) -> Result<(), PosetCycle<T>> {
        let lhs = self.eq_class(left).0;
        let rhs = self.eq_class(right).0;
        match ord {
            Ordering::Equal => self.merge(lhs, rhs),
            Ordering::Less => self.add_edge(lhs, rhs),
            Ordering::Greater => self.add_edge(rhs, lhs),
        }
    }

    /// Classes in ascending priority order; each inner list is one class.
    /// Incomparable classes tie-break on their smallest member.
    pub fn ordered(&mut self) -> Vec<Vec<T>> {
        let roots: BTreeSet<u32> = (0..self.parent.len() as u32)
            .map(|slot| self.find(slot))
            .collect();

        let mut indegree: BTreeMap<u32, usize> = roots.iter().map(|&r| (r, 0)).collect();
        for targets in self.above.values() {
            for &target in targets {
                *indegree.entry(target).or_insert(0) += 1;
            }
        }

        // Ready set keyed by (smallest member, root) for determinism.
        let mut ready: BTreeSet<(T, u32)> = BTreeSet::new();
        for (&root, &degree) in &indegree {
            if degree == 0 {
                ready.insert((self.min_member(root), root));
            }
        }

        let mut layers = Vec::with_capacity(roots.len());
        while let Some(entry) = ready.iter().next().cloned() {
            ready.remove(&entry);
            let (_, root) = entry;
            layers.push(self.items(ClassId(root)));
            if let Some(targets) = self.above.get(&root).cloned() {
                for target in targets {
                    let degree = indegree.get_mut(&target).expect("edge target is a root");
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert((self.min_member(target), target));
                    }
                }
            }
        }
        layers
    }

    fn min_member(&mut self, root: u32) -> T {
        let root = self.find(root);
        let slots: Vec<u32> = (0..self.parent.len() as u32)
            .filter(|&slot| self.find(slot) == root)
            .collect();
        slots
            .into_iter()
            .map(|slot| self.items[slot as usize].clone())
            .min()
            .expect("class has at least one member")
    }

    fn find(&mut self, slot: u32) -> u32 {
        let parent = self.parent[slot as usize];
        if parent == slot {
            return slot;
        }
        let root = self.find(parent);
        self.parent[slot as usize] = root;
        root
    }

    fn cycle(&mut self, lhs: u32, rhs: u32) -> PosetCycle<T> {
        PosetCycle {
            left: self.items(ClassId(lhs)),
            right: self.items(ClassId(rhs)),
        }
    }

    fn add_edge(&mut self, lhs: u32, rhs: u32) -> Result<(), PosetCycle<T>> {
        if lhs == rhs || self.reachable(rhs, lhs) {
            return Err(self.cycle(lhs, rhs));
        }
        self.above.entry(lhs).or_default().insert(rhs);
        Ok(())
    }

    fn merge(&mut self, lhs: u32, rhs: u32) -> Result<(), PosetCycle<T>> {
        if lhs == rhs {
            return Ok(());
        }
        if self.reachable(lhs, rhs) || self.reachable(rhs, lhs) {
            return Err(self.cycle(lhs, rhs));
        }
        self.parent[rhs as usize] = lhs;

        // Rewrite edges so every endpoint is a live root again.
        let mut rewritten: BTreeMap<u32, BTreeSet<u32>> = BTreeMap::new();
        let edges: Vec<(u32, u32)> = self
            .above
            .iter()
            .flat_map(|(&from, tos)| tos.iter().map(move |&to| (from, to)))
            .collect();
        for (from, to) in edges {
            let from = self.find(from);
            let to = self.find(to);
            if from != to {
                rewritten.entry(from).or_default().insert(to);
            }
        }
        self.above = rewritten;
        Ok(())
    }

    /// Whether `to` has strictly higher priority than `from`.
    fn reachable(&mut self, from: u32, to: u32) -> bool {
        let from = self.find(from);
        let to = self.find(to);
        let mut seen = BTreeSet::new();
        let mut work = vec![from];
        while let Some(root) = work.pop() {
            if root == to {
                return true;
            }
            if !seen.insert(root) {
                continue;
            }
            if let Some(targets) = self.above.get(&root) {
                work.extend(targets.iter().copied());
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_items_get_singleton_classes() {
        let mut poset: Poset<&str> = Poset::new();
        let plus = poset.eq_class(&"+");
        let star = poset.eq_class(&"*");
        assert_ne!(plus, star);
        assert_eq!(poset.items(plus), vec!["+"]);
    }

    #[test]
    fn equal_merges_classes() {
        let mut poset: Poset<&str> = Poset::new();
        poset.add_relation(&"+", &"-", Ordering::Equal).unwrap();
        let plus = poset.eq_class(&"+");
        assert_eq!(poset.items(plus), vec!["+", "-"]);
        assert_eq!(plus, poset.eq_class(&"-"));
    }

    #[test]
    fn conflicting_edge_is_a_cycle_and_dropped() {
        let mut poset: Poset<&str> = Poset::new();
        poset.add_relation(&"+", &"*", Ordering::Less).unwrap();
        poset.add_relation(&"*", &"^", Ordering::Less).unwrap();

        let err = poset
            .add_relation(&"^", &"+", Ordering::Less)
            .expect_err("closing the loop must conflict");
        assert_eq!(err.left, vec!["^"]);
        assert_eq!(err.right, vec!["+"]);

        // The edge was dropped: + is still below ^.
        let order = poset.ordered();
        let pos = |op: &str| order.iter().position(|c| c.contains(&op)).unwrap();
        assert!(pos("+") < pos("*"));
        assert!(pos("*") < pos("^"));
    }

    #[test]
    fn merging_ordered_classes_is_a_cycle() {
        let mut poset: Poset<&str> = Poset::new();
        poset.add_relation(&"+", &"*", Ordering::Less).unwrap();
        assert!(poset.add_relation(&"+", &"*", Ordering::Equal).is_err());
    }

    #[test]
    fn ordered_respects_surviving_edges() {
        let mut poset: Poset<&str> = Poset::new();
        poset.add_relation(&"+", &"*", Ordering::Less).unwrap();
        poset.add_relation(&"-", &"+", Ordering::Equal).unwrap();
        poset.add_relation(&"*", &"app", Ordering::Less).unwrap();
        poset.add_relation(&"cmp", &"+", Ordering::Less).unwrap();

        let order = poset.ordered();
        let pos = |op: &str| order.iter().position(|c| c.contains(&op)).unwrap();
        assert!(pos("cmp") < pos("+"));
        assert_eq!(pos("+"), pos("-"));
        assert!(pos("+") < pos("*"));
        assert!(pos("*") < pos("app"));
    }

    #[test]
    fn greater_is_the_flipped_edge() {
        let mut poset: Poset<&str> = Poset::new();
        poset.add_relation(&"*", &"+", Ordering::Greater).unwrap();
        let order = poset.ordered();
        let pos = |op: &str| order.iter().position(|c| c.contains(&op)).unwrap();
        assert!(pos("+") < pos("*"));
    }
}
