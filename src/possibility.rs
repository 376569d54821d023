//! Hierarchical possibility lists: matching and insertion.
//!
//! Lists are loaded from the store into a flat pre-order vector (a node's
//! descendants immediately follow it and carry strictly greater levels);
//! every traversal below depends on that ordering. Matching walks the
//! vector backward exactly once; insertion peels path segments left to
//! right, creating nodes under the best-known owner.

use tracing::debug;

use crate::error::{ImportError, Result};
use crate::parse::ParsedCandidate;
use crate::settings::MatchBy;
use crate::store::{fields, kind, ListId, ObjectId, ObjectStore, Position, Value};

/// Canonical hierarchy separator used in normalized candidate text and in
/// reconstructed full names.
pub const HIER_SEP: char = ':';

/// One item of a possibility list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PossibilityNode {
    pub id: ObjectId,
    /// Hierarchy level, 1 for children of the list root.
    pub level: u32,
    pub name: String,
    pub abbreviation: String,
}

impl PossibilityNode {
    /// The label this list matches by.
    #[must_use]
    pub fn label(&self, match_by: MatchBy) -> &str {
        match match_by {
            MatchBy::Name => &self.name,
            MatchBy::Abbreviation => &self.abbreviation,
        }
    }
}

/// An externally loaded controlled-vocabulary tree, cached per list for the
/// duration of a batch. Nodes are stored in pre-order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PossibilityList {
    pub id: ListId,
    pub name: String,
    /// Closed lists never accept insertions.
    pub closed: bool,
    /// Unmatched values are dropped instead of inserted.
    pub ignore_new: bool,
    pub nodes: Vec<PossibilityNode>,
}

/// Result of inserting one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inserted {
    /// The node now carrying the candidate.
    pub leaf: ObjectId,
    /// Every node created on the way, in creation order.
    pub created: Vec<ObjectId>,
}

/// Resolution of a full candidate set against one list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Resolved node ids, in candidate order.
    pub ids: Vec<ObjectId>,
    /// Newly inserted node ids, for end-of-batch timestamping.
    pub created: Vec<ObjectId>,
    /// Candidate texts dropped by the closed-list / ignore-new escape hatch.
    pub skipped: Vec<String>,
    /// Candidates whose insertion the store rejected, with the reason.
    /// These are surfaced to the user but never abort the batch.
    pub failed: Vec<(String, String)>,
}

impl PossibilityList {
    /// Index of the node with `id`, if present.
    #[must_use]
    pub fn index_of(&self, id: ObjectId) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == id)
    }

    /// End (exclusive) of the subtree rooted at `index`: the first
    /// following node whose level does not exceed the root's.
    #[must_use]
    pub fn subtree_end(&self, index: usize) -> usize {
        let level = self.nodes[index].level;
        self.nodes[index + 1..]
            .iter()
            .position(|n| n.level <= level)
            .map_or(self.nodes.len(), |offset| index + 1 + offset)
    }

    /// Reconstruct the node's full hierarchical name: its own label plus
    /// every strictly-lower-level ancestor found walking backward, in
    /// root-to-leaf order, joined by the canonical separator.
    #[must_use]
    pub fn full_label(&self, index: usize, match_by: MatchBy) -> String {
        let mut parts = vec![self.nodes[index].label(match_by)];
        let mut level = self.nodes[index].level;
        for node in self.nodes[..index].iter().rev() {
            if node.level < level {
                parts.push(node.label(match_by));
                level = node.level;
                if level == 1 {
                    break;
                }
            }
        }
        parts.reverse();
        let sep = HIER_SEP.to_string();
        parts.join(sep.as_str())
    }

    /// Direct children of `parent` (`None` for the list root), in order.
    fn child_indices(&self, parent: Option<ObjectId>) -> Vec<usize> {
        match parent {
            None => (0..self.nodes.len())
                .filter(|&i| self.nodes[i].level == 1)
                .collect(),
            Some(id) => match self.index_of(id) {
                Some(parent_idx) => {
                    let child_level = self.nodes[parent_idx].level + 1;
                    (parent_idx + 1..self.subtree_end(parent_idx))
                        .filter(|&i| self.nodes[i].level == child_level)
                        .collect()
                }
                None => Vec::new(),
            },
        }
    }

    /// Match candidates against the list in a single backward pass.
    ///
    /// Returns resolved node ids parallel to `candidates`; unresolved
    /// entries keep the longest-prefix owner and matched-prefix length
    /// found on the way (ties broken by first encountered).
    pub fn match_candidates(
        &self,
        candidates: &mut [ParsedCandidate],
        match_by: MatchBy,
    ) -> Vec<Option<ObjectId>> {
        let mut resolved: Vec<Option<ObjectId>> = vec![None; candidates.len()];
        let mut open = candidates.len();

        for index in (0..self.nodes.len()).rev() {
            if open == 0 {
                break;
            }
            let node = &self.nodes[index];
            let label = node.label(match_by);
            // Reconstructed lazily; only hierarchical candidates need it.
            let mut full: Option<String> = None;

            for (ci, cand) in candidates.iter_mut().enumerate() {
                if resolved[ci].is_some() {
                    continue;
                }
                if ci_eq(label, &cand.text) {
                    resolved[ci] = Some(node.id);
                    open -= 1;
                    continue;
                }
                if !cand.has_hierarchy {
                    continue;
                }
                let full =
                    full.get_or_insert_with(|| self.full_label(index, match_by));
                if ci_eq(full, &cand.text) {
                    resolved[ci] = Some(node.id);
                    open -= 1;
                    continue;
                }
                let prefix_segments = full.matches(HIER_SEP).count() + 1;
                if prefix_segments > cand.matched_prefix
                    && ci_prefix_with_sep(&cand.text, full)
                {
                    cand.owner = Some(node.id);
                    cand.matched_prefix = prefix_segments;
                }
            }
        }
        resolved
    }

    /// Insert one unmatched candidate, peeling its path segments left to
    /// right under the best-known owner. The caller has already honored
    /// the closed-list / ignore-new escape hatch.
    pub fn insert_candidate(
        &mut self,
        store: &mut dyn ObjectStore,
        cand: &ParsedCandidate,
        match_by: MatchBy,
    ) -> Result<Inserted> {
        let segments: Vec<String> = cand.segments().map(str::to_string).collect();
        let mut owner = cand.owner;
        let mut created = Vec::new();
        let mut leaf = 0;

        for (i, segment) in segments.iter().enumerate().skip(cand.matched_prefix) {
            let is_leaf = i + 1 == segments.len();

            // A segment may already exist under the current owner, matched
            // or created moments ago by a sibling candidate.
            let existing = self
                .child_indices(owner)
                .into_iter()
                .find(|&ci| ci_eq(self.nodes[ci].label(match_by), segment))
                .map(|ci| self.nodes[ci].id);
            if let Some(id) = existing {
                owner = Some(id);
                leaf = id;
                continue;
            }

            let name = if is_leaf {
                self.disambiguate(segment)
            } else {
                segment.clone()
            };
            let id = self.create_node(store, owner, &name)?;
            debug!(list = self.id, node = id, name = %name, "inserted possibility");
            created.push(id);
            owner = Some(id);
            leaf = id;
        }

        Ok(Inserted { leaf, created })
    }

    /// Create one node in the store and mirror it into the pre-order
    /// vector: top-level nodes go to the end of their level (the end of the
    /// vector), children become the last child of their parent.
    fn create_node(
        &mut self,
        store: &mut dyn ObjectStore,
        parent: Option<ObjectId>,
        name: &str,
    ) -> Result<ObjectId> {
        let (owner_id, slot) = match parent {
            None => (self.id, fields::POSSIBILITIES),
            Some(id) => (id, fields::SUB_POSSIBILITIES),
        };
        let id = store
            .create_object(kind::POSSIBILITY, Some(owner_id), slot, Position::Append)
            .map_err(|e| ImportError::ListInsertFailed {
                list: self.id,
                reason: e.to_string(),
            })?;
        store.set_field(id, fields::NAME, Value::Str(name.to_string()))?;
        store.set_field(id, fields::ABBREVIATION, Value::Str(name.to_string()))?;

        let (index, level) = match parent.and_then(|p| self.index_of(p)) {
            None => (self.nodes.len(), 1),
            Some(parent_idx) => (
                self.subtree_end(parent_idx),
                self.nodes[parent_idx].level + 1,
            ),
        };
        self.nodes.insert(
            index,
            PossibilityNode {
                id,
                level,
                name: name.to_string(),
                abbreviation: name.to_string(),
            },
        );
        Ok(id)
    }

    /// Append a parenthetical counter while the name or abbreviation
    /// duplicates an existing node anywhere in the list.
    fn disambiguate(&self, base: &str) -> String {
        let taken = |s: &str| {
            self.nodes
                .iter()
                .any(|n| ci_eq(&n.name, s) || ci_eq(&n.abbreviation, s))
        };
        if !taken(base) {
            return base.to_string();
        }
        let mut counter = 2usize;
        loop {
            let name = format!("{base} ({counter})");
            if !taken(&name) {
                return name;
            }
            counter += 1;
        }
    }

    /// Match then insert a whole candidate set, honoring the closed-list /
    /// ignore-new escape hatch. Resolved ids keep candidate order; a failed
    /// insertion is recorded and the remaining candidates still resolve.
    pub fn resolve(
        &mut self,
        store: &mut dyn ObjectStore,
        mut candidates: Vec<ParsedCandidate>,
        match_by: MatchBy,
    ) -> Resolution {
        let matched = self.match_candidates(&mut candidates, match_by);
        let mut out = Resolution::default();

        for (cand, resolved) in candidates.into_iter().zip(matched) {
            if let Some(id) = resolved {
                out.ids.push(id);
                continue;
            }
            if self.closed || self.ignore_new {
                debug!(list = self.id, text = %cand.text, "unmatched value dropped");
                out.skipped.push(cand.text);
                continue;
            }
            match self.insert_candidate(store, &cand, match_by) {
                Ok(inserted) => {
                    out.ids.push(inserted.leaf);
                    out.created.extend(inserted.created);
                }
                Err(e) => out.failed.push((cand.text, e.to_string())),
            }
        }
        out
    }
}

/// Case-insensitive equality without allocating.
fn ci_eq(a: &str, b: &str) -> bool {
    a.chars()
        .flat_map(char::to_lowercase)
        .eq(b.chars().flat_map(char::to_lowercase))
}

/// True when `prefix` + separator begins `text`, case-insensitively.
fn ci_prefix_with_sep(text: &str, prefix: &str) -> bool {
    let text: String = text.chars().flat_map(char::to_lowercase).collect();
    let mut wanted: String = prefix.chars().flat_map(char::to_lowercase).collect();
    wanted.push(HIER_SEP);
    text.starts_with(&wanted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn node(id: ObjectId, level: u32, name: &str) -> PossibilityNode {
        PossibilityNode {
            id,
            level,
            name: name.to_string(),
            abbreviation: name.to_string(),
        }
    }

    fn cand(text: &str) -> ParsedCandidate {
        ParsedCandidate {
            text: text.to_string(),
            has_hierarchy: text.contains(HIER_SEP),
            owner: None,
            matched_prefix: 0,
        }
    }

    /// Economy > Market, Economy > Trade, Religion — in pre-order.
    fn sample_list() -> PossibilityList {
        PossibilityList {
            id: 10,
            name: "Anthropology Categories".to_string(),
            closed: false,
            ignore_new: false,
            nodes: vec![
                node(11, 1, "Economy"),
                node(12, 2, "Market"),
                node(13, 2, "Trade"),
                node(14, 1, "Religion"),
            ],
        }
    }

    /// A store holding a possibility list that mirrors [`sample_list`].
    fn store_with_list() -> (MemoryStore, ListId) {
        let mut store = MemoryStore::new();
        let list = store.add_possibility_list("Anthropology Categories");
        let economy = store.add_possibility(list, None, "Economy");
        store.add_possibility(list, Some(economy), "Market");
        store.add_possibility(list, Some(economy), "Trade");
        store.add_possibility(list, None, "Religion");
        (store, list)
    }

    fn index_of_name(list: &PossibilityList, name: &str) -> usize {
        list.nodes.iter().position(|n| n.name == name).unwrap()
    }

    #[test]
    fn test_full_label_reconstruction() {
        let list = sample_list();
        assert_eq!(list.full_label(0, MatchBy::Name), "Economy");
        assert_eq!(list.full_label(1, MatchBy::Name), "Economy:Market");
        assert_eq!(list.full_label(3, MatchBy::Name), "Religion");
    }

    #[test]
    fn test_flat_match_is_case_insensitive() {
        let list = sample_list();
        let mut candidates = vec![cand("religion"), cand("MARKET")];
        let resolved = list.match_candidates(&mut candidates, MatchBy::Name);
        assert_eq!(resolved, vec![Some(14), Some(12)]);
    }

    #[test]
    fn test_hierarchical_exact_match() {
        let list = sample_list();
        let mut candidates = vec![cand("Economy:Market")];
        let resolved = list.match_candidates(&mut candidates, MatchBy::Name);
        assert_eq!(resolved, vec![Some(12)]);
    }

    #[test]
    fn test_longest_prefix_recorded_on_partial_match() {
        let list = sample_list();
        let mut candidates = vec![cand("Economy:Market:Prices")];
        let resolved = list.match_candidates(&mut candidates, MatchBy::Name);
        assert_eq!(resolved, vec![None]);
        assert_eq!(candidates[0].owner, Some(12));
        assert_eq!(candidates[0].matched_prefix, 2);
    }

    #[test]
    fn test_insertion_under_matched_prefix() {
        let (mut store, list_id) = store_with_list();
        let mut list = store.load_possibility_list(list_id).unwrap();

        let resolution = list
            .resolve(&mut store, vec![cand("Economy:Market:Prices")], MatchBy::Name);
        assert_eq!(resolution.created.len(), 1);
        assert_eq!(resolution.ids.len(), 1);

        // The new node sits directly under Market at level 3.
        let market = index_of_name(&list, "Market");
        let prices = index_of_name(&list, "Prices");
        assert_eq!(prices, market + 1);
        assert_eq!(list.nodes[prices].level, 3);

        // Idempotence: the same input now matches with zero insertions.
        let again = list
            .resolve(&mut store, vec![cand("Economy:Market:Prices")], MatchBy::Name);
        assert!(again.created.is_empty());
        assert_eq!(again.ids, resolution.ids);

        // And so does a reload from the store.
        let mut reloaded = store.load_possibility_list(list_id).unwrap();
        let third = reloaded
            .resolve(&mut store, vec![cand("Economy:Market:Prices")], MatchBy::Name);
        assert!(third.created.is_empty());
        assert_eq!(third.ids, resolution.ids);
    }

    #[test]
    fn test_unknown_path_creates_full_chain() {
        let (mut store, list_id) = store_with_list();
        let mut list = store.load_possibility_list(list_id).unwrap();

        let resolution = list
            .resolve(&mut store, vec![cand("Kinship:Marriage")], MatchBy::Name);
        assert_eq!(resolution.created.len(), 2);
        let kinship = index_of_name(&list, "Kinship");
        assert_eq!(list.nodes[kinship].level, 1);
        assert_eq!(list.nodes[kinship + 1].name, "Marriage");
        assert_eq!(list.nodes[kinship + 1].level, 2);
    }

    #[test]
    fn test_top_level_insertion_goes_to_end_of_level() {
        let (mut store, list_id) = store_with_list();
        let mut list = store.load_possibility_list(list_id).unwrap();

        list.resolve(&mut store, vec![cand("Politics")], MatchBy::Name);
        assert_eq!(list.nodes.last().unwrap().name, "Politics");
        assert_eq!(list.nodes.last().unwrap().level, 1);
    }

    #[test]
    fn test_closed_list_skips_unmatched() {
        let (mut store, list_id) = store_with_list();
        let mut list = store.load_possibility_list(list_id).unwrap();
        list.closed = true;

        let resolution = list.resolve(
            &mut store,
            vec![cand("Economy"), cand("Unknown")],
            MatchBy::Name,
        );
        assert_eq!(resolution.ids.len(), 1);
        assert_eq!(resolution.skipped, vec!["Unknown".to_string()]);
        assert!(resolution.created.is_empty());
    }

    #[test]
    fn test_duplicate_leaf_name_gets_counter() {
        let (mut store, list_id) = store_with_list();
        let mut list = store.load_possibility_list(list_id).unwrap();

        // "Religion" exists at top level; inserting it under Economy must
        // not collide.
        let resolution = list
            .resolve(&mut store, vec![cand("Economy:Religion")], MatchBy::Name);
        assert_eq!(resolution.created.len(), 1);
        let idx = list
            .nodes
            .iter()
            .position(|n| n.id == resolution.ids[0])
            .unwrap();
        assert_eq!(list.nodes[idx].name, "Religion (2)");
        assert_eq!(list.nodes[idx].level, 2);
    }

    #[test]
    fn test_failed_insertion_is_recorded_not_fatal() {
        let (mut store, list_id) = store_with_list();
        let mut list = store.load_possibility_list(list_id).unwrap();

        store.fail_nth_write(1);
        let resolution = list.resolve(
            &mut store,
            vec![cand("Unknown"), cand("Economy")],
            MatchBy::Name,
        );
        assert_eq!(resolution.failed.len(), 1);
        assert_eq!(resolution.failed[0].0, "Unknown");
        // The matched candidate still resolved.
        assert_eq!(resolution.ids.len(), 1);
    }

    #[test]
    fn test_abbreviation_matching() {
        let mut list = sample_list();
        list.nodes[0].abbreviation = "Econ".to_string();
        let mut candidates = vec![cand("econ")];
        let resolved = list.match_candidates(&mut candidates, MatchBy::Abbreviation);
        assert_eq!(resolved, vec![Some(11)]);
    }
}
