//! Sorted set: an AVL tree ordered by (score, name) co-indexed by a hash
//! map from member name to tree handle.
//!
//! Every member is exactly one tree node; the index and the tree always
//! agree. Range queries seek the smallest pair >= (score, name) and then
//! walk by rank offset.

use ordered_float::OrderedFloat;

use crate::avl::{AvlTree, NodeId};
use crate::hashtable::{str_hash, HMap};

// Tree ordering: score first, then the member name bytewise.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct ZKey {
    score: OrderedFloat<f64>,
    name: Vec<u8>,
}

#[derive(Debug)]
struct MemberRef {
    node: NodeId,
}

#[derive(Debug, Default)]
pub struct ZSet {
    tree: AvlTree<ZKey>,
    index: HMap<MemberRef>,
}

impl ZSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Insert a member or rescore an existing one. Returns true when the
    /// member is new.
    pub fn insert(&mut self, name: &[u8], score: f64) -> bool {
        if let Some(id) = self.lookup(name) {
            self.update(id, score);
            return false;
        }
        let id = self.tree.insert(ZKey {
            score: OrderedFloat(score),
            name: name.to_vec(),
        });
        self.index.insert(str_hash(name), MemberRef { node: id });
        true
    }

    // A rescore moves the node within the tree: detach, rewrite the score,
    // reinsert. The handle survives, so the name index needs no update.
    fn update(&mut self, id: NodeId, score: f64) {
        if self.tree.key(id).score == OrderedFloat(score) {
            return;
        }
        self.tree.detach(id);
        self.tree.key_mut(id).score = OrderedFloat(score);
        self.tree.attach(id);
    }

    /// Find a member by name.
    pub fn lookup(&mut self, name: &[u8]) -> Option<NodeId> {
        let tree = &self.tree;
        self.index
            .get(str_hash(name), |r| tree.key(r.node).name.as_slice() == name)
            .map(|r| r.node)
    }

    /// Remove a member found by [`ZSet::lookup`].
    pub fn remove(&mut self, id: NodeId) {
        let hcode = str_hash(&self.tree.key(id).name);
        let removed = self.index.remove(hcode, |r| r.node == id);
        assert!(removed.is_some(), "member missing from the name index");
        self.tree.remove(id);
    }

    /// The smallest member >= (score, name), or `None` past the end.
    pub fn seek_ge(&self, score: f64, name: &[u8]) -> Option<NodeId> {
        let probe = (OrderedFloat(score), name);
        let mut found = None;
        let mut cur = self.tree.root();
        while let Some(id) = cur {
            let key = self.tree.key(id);
            if (key.score, key.name.as_slice()) < probe {
                cur = self.tree.right(id);
            } else {
                found = Some(id);
                cur = self.tree.left(id);
            }
        }
        found
    }

    /// The member `delta` rank positions away.
    pub fn offset(&self, id: NodeId, delta: i64) -> Option<NodeId> {
        self.tree.offset(id, delta)
    }

    pub fn member(&self, id: NodeId) -> (&[u8], f64) {
        let key = self.tree.key(id);
        (&key.name, key.score.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zset(members: &[(&str, f64)]) -> ZSet {
        let mut z = ZSet::new();
        for &(name, score) in members {
            z.insert(name.as_bytes(), score);
        }
        z
    }

    // Walk the tree in order via rank offsets.
    fn ranked(z: &ZSet) -> Vec<(String, f64)> {
        let mut out = Vec::new();
        let mut cur = z.seek_ge(f64::NEG_INFINITY, b"");
        while let Some(id) = cur {
            let (name, score) = z.member(id);
            out.push((String::from_utf8_lossy(name).into_owned(), score));
            cur = z.offset(id, 1);
        }
        out
    }

    #[test]
    fn orders_by_score_then_name() {
        let z = zset(&[("a", 1.0), ("b", 2.0), ("c", 1.5), ("aa", 1.0)]);
        assert_eq!(z.len(), 4);
        let names: Vec<_> = ranked(&z).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["a", "aa", "c", "b"]);
    }

    #[test]
    fn insert_then_rescore() {
        let mut z = ZSet::new();
        assert!(z.insert(b"m", 1.0));
        assert!(!z.insert(b"m", 1.0)); // same score still counts as an update
        assert!(!z.insert(b"m", 9.0));
        assert_eq!(z.len(), 1);
        let id = z.lookup(b"m").expect("present");
        assert_eq!(z.member(id).1, 9.0);
    }

    #[test]
    fn rescore_moves_the_member() {
        let mut z = zset(&[("a", 1.0), ("b", 2.0), ("c", 3.0)]);
        z.insert(b"a", 10.0);
        let names: Vec<_> = ranked(&z).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["b", "c", "a"]);
        // tree and index stay in step
        assert_eq!(z.len(), 3);
        assert!(z.lookup(b"a").is_some());
    }

    #[test]
    fn remove_members() {
        let mut z = zset(&[("a", 1.0), ("b", 2.0), ("c", 3.0)]);
        let id = z.lookup(b"b").expect("present");
        z.remove(id);
        assert_eq!(z.len(), 2);
        assert!(z.lookup(b"b").is_none());
        let names: Vec<_> = ranked(&z).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["a", "c"]);
    }

    #[test]
    fn seek_ge_finds_the_boundary() {
        let z = zset(&[("a", 1.0), ("c", 1.5), ("b", 2.0)]);
        let hit = z.seek_ge(1.0, b"a").expect("a >= (1, a)");
        assert_eq!(z.member(hit).0, b"a");
        let hit = z.seek_ge(1.0, b"ab").expect("c >= (1, ab)");
        assert_eq!(z.member(hit).0, b"c");
        let hit = z.seek_ge(1.6, b"").expect("b >= (1.6, )");
        assert_eq!(z.member(hit).0, b"b");
        assert!(z.seek_ge(2.0, b"bb").is_none());
    }

    #[test]
    fn offset_bounds() {
        let z = zset(&[("a", 1.0), ("b", 2.0), ("c", 3.0)]);
        let first = z.seek_ge(f64::NEG_INFINITY, b"").expect("non-empty");
        assert_eq!(z.member(z.offset(first, 2).expect("last")).0, b"c");
        assert!(z.offset(first, 3).is_none());
        assert!(z.offset(first, -1).is_none());
    }

    #[test]
    fn many_members_stay_consistent() {
        let mut z = ZSet::new();
        for i in 0..2000u32 {
            let name = format!("member:{i:04}");
            assert!(z.insert(name.as_bytes(), (i % 97) as f64));
        }
        assert_eq!(z.len(), 2000);
        let all = ranked(&z);
        assert_eq!(all.len(), 2000);
        assert!(all
            .windows(2)
            .all(|w| (w[0].1, w[0].0.as_str()) < (w[1].1, w[1].0.as_str())));
        for i in (0..2000u32).step_by(7) {
            let name = format!("member:{i:04}");
            let id = z.lookup(name.as_bytes()).expect("present");
            z.remove(id);
        }
        assert_eq!(z.len(), 2000 - 286);
    }
}
