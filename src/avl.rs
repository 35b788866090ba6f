//! Arena-backed AVL tree with subtree counts.
//!
//! Nodes live in a slab owned by the tree and are referred to by `NodeId`
//! handles, so external indexes can hold on to a node across rebalancing.
//! Every node tracks its height and the size of its subtree; the counts
//! drive [`AvlTree::offset`], which moves a signed number of in-order
//! positions from a starting node.

pub type NodeId = u32;

#[derive(Debug)]
struct AvlNode<K> {
    key: K,
    parent: Option<NodeId>,
    left: Option<NodeId>,
    right: Option<NodeId>,
    height: u32,
    count: u32,
}

#[derive(Debug)]
pub struct AvlTree<K> {
    nodes: Vec<Option<AvlNode<K>>>,
    free: Vec<NodeId>,
    root: Option<NodeId>,
    len: usize,
}

impl<K> Default for AvlTree<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> AvlTree<K> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            root: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn key(&self, id: NodeId) -> &K {
        &self.node(id).key
    }

    /// Mutable access to a key. The caller must not change the ordering of a
    /// node that is currently linked; detach it first.
    pub fn key_mut(&mut self, id: NodeId) -> &mut K {
        &mut self.node_mut(id).key
    }

    pub fn left(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).left
    }

    pub fn right(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).right
    }

    fn node(&self, id: NodeId) -> &AvlNode<K> {
        self.nodes[id as usize].as_ref().expect("live node")
    }

    fn node_mut(&mut self, id: NodeId) -> &mut AvlNode<K> {
        self.nodes[id as usize].as_mut().expect("live node")
    }

    fn height(&self, id: Option<NodeId>) -> u32 {
        id.map_or(0, |id| self.node(id).height)
    }

    fn count(&self, id: Option<NodeId>) -> u32 {
        id.map_or(0, |id| self.node(id).count)
    }

    fn alloc(&mut self, key: K) -> NodeId {
        let node = AvlNode {
            key,
            parent: None,
            left: None,
            right: None,
            height: 1,
            count: 1,
        };
        match self.free.pop() {
            Some(id) => {
                self.nodes[id as usize] = Some(node);
                id
            }
            None => {
                self.nodes.push(Some(node));
                (self.nodes.len() - 1) as NodeId
            }
        }
    }

    // Restore height and count from the children.
    fn update(&mut self, id: NodeId) {
        let (l, r) = (self.node(id).left, self.node(id).right);
        let height = 1 + self.height(l).max(self.height(r));
        let count = 1 + self.count(l) + self.count(r);
        let node = self.node_mut(id);
        node.height = height;
        node.count = count;
    }

    // Rotations relink the subtree and set the pivot's parent pointer, but
    // leave the parent's child link to the caller.
    fn rot_left(&mut self, id: NodeId) -> NodeId {
        let pivot = self.node(id).right.expect("right child must exist");
        let inner = self.node(pivot).left;
        let parent = self.node(id).parent;

        self.node_mut(id).right = inner;
        if let Some(inner) = inner {
            self.node_mut(inner).parent = Some(id);
        }
        self.node_mut(pivot).parent = parent;
        self.node_mut(pivot).left = Some(id);
        self.node_mut(id).parent = Some(pivot);

        self.update(id);
        self.update(pivot);
        pivot
    }

    fn rot_right(&mut self, id: NodeId) -> NodeId {
        let pivot = self.node(id).left.expect("left child must exist");
        let inner = self.node(pivot).right;
        let parent = self.node(id).parent;

        self.node_mut(id).left = inner;
        if let Some(inner) = inner {
            self.node_mut(inner).parent = Some(id);
        }
        self.node_mut(pivot).parent = parent;
        self.node_mut(pivot).right = Some(id);
        self.node_mut(id).parent = Some(pivot);

        self.update(id);
        self.update(pivot);
        pivot
    }

    // The left subtree is taller by two.
    fn fix_left(&mut self, id: NodeId) -> NodeId {
        let left = self.node(id).left.expect("left child must exist");
        if self.height(self.node(left).left) < self.height(self.node(left).right) {
            let new_left = self.rot_left(left);
            self.node_mut(id).left = Some(new_left);
        }
        self.rot_right(id)
    }

    // The right subtree is taller by two.
    fn fix_right(&mut self, id: NodeId) -> NodeId {
        let right = self.node(id).right.expect("right child must exist");
        if self.height(self.node(right).right) < self.height(self.node(right).left) {
            let new_right = self.rot_right(right);
            self.node_mut(id).right = Some(new_right);
        }
        self.rot_left(id)
    }

    // Walk from `id` to the root restoring heights, counts and the balance
    // invariant. Returns the (possibly new) root.
    fn fix(&mut self, mut id: NodeId) -> NodeId {
        loop {
            let parent = self.node(id).parent;
            let from_left = parent.map(|p| self.node(p).left == Some(id));

            self.update(id);
            let l = self.height(self.node(id).left);
            let r = self.height(self.node(id).right);
            let fixed = if l == r + 2 {
                self.fix_left(id)
            } else if l + 2 == r {
                self.fix_right(id)
            } else {
                id
            };

            match parent {
                Some(p) => {
                    if from_left == Some(true) {
                        self.node_mut(p).left = Some(fixed);
                    } else {
                        self.node_mut(p).right = Some(fixed);
                    }
                    id = p;
                }
                None => return fixed,
            }
        }
    }

    // Unlink a node with at most one child and rebalance from its parent.
    fn detach_easy(&mut self, id: NodeId) {
        let node = self.node(id);
        debug_assert!(node.left.is_none() || node.right.is_none());
        let child = node.left.or(node.right);
        let parent = node.parent;

        if let Some(child) = child {
            self.node_mut(child).parent = parent;
        }
        match parent {
            Some(p) => {
                if self.node(p).left == Some(id) {
                    self.node_mut(p).left = child;
                } else {
                    self.node_mut(p).right = child;
                }
                self.root = Some(self.fix(p));
            }
            None => self.root = child,
        }
        self.len -= 1;
    }

    /// Unlink a node from the tree. The slot stays allocated so the handle
    /// remains valid; reinsert with [`AvlTree::attach`] or free it with
    /// [`AvlTree::remove`].
    pub fn detach(&mut self, id: NodeId) {
        let (left, right) = (self.node(id).left, self.node(id).right);
        if left.is_some() && right.is_some() {
            // Two children: detach the in-order successor by the easy case,
            // then substitute it into this node's place. The substitution
            // preserves the tree shape, so no further rebalancing is needed.
            let mut succ = right.expect("right child must exist");
            while let Some(next) = self.node(succ).left {
                succ = next;
            }
            self.detach_easy(succ);

            // The rebalance above may have relinked this node's neighbors;
            // read them only now.
            let n = self.node(id);
            let (l, r, p, h, c) = (n.left, n.right, n.parent, n.height, n.count);
            {
                let s = self.node_mut(succ);
                s.left = l;
                s.right = r;
                s.parent = p;
                s.height = h;
                s.count = c;
            }
            if let Some(l) = l {
                self.node_mut(l).parent = Some(succ);
            }
            if let Some(r) = r {
                self.node_mut(r).parent = Some(succ);
            }
            match p {
                Some(p) => {
                    if self.node(p).left == Some(id) {
                        self.node_mut(p).left = Some(succ);
                    } else {
                        self.node_mut(p).right = Some(succ);
                    }
                }
                None => self.root = Some(succ),
            }
        } else {
            self.detach_easy(id);
        }

        let node = self.node_mut(id);
        node.parent = None;
        node.left = None;
        node.right = None;
        node.height = 1;
        node.count = 1;
    }

    /// Unlink a node and free its slot, returning the key.
    pub fn remove(&mut self, id: NodeId) -> K {
        self.detach(id);
        let node = self.nodes[id as usize].take().expect("live node");
        self.free.push(id);
        node.key
    }

    /// Return the node `delta` in-order positions away, or `None` when the
    /// walk runs off either end of the tree. Subtree counts let the walk
    /// descend directly when the target is below, and climb through the
    /// parent otherwise.
    pub fn offset(&self, from: NodeId, delta: i64) -> Option<NodeId> {
        let mut pos: i64 = 0; // rank of `id` relative to `from`
        let mut id = from;
        while pos != delta {
            let left = self.node(id).left;
            let right = self.node(id).right;
            if pos < delta && pos + self.count(right) as i64 >= delta {
                // target is inside the right subtree
                id = right.expect("right subtree holds the target");
                pos += self.count(self.node(id).left) as i64 + 1;
            } else if pos > delta && pos - (self.count(left) as i64) <= delta {
                // target is inside the left subtree
                id = left.expect("left subtree holds the target");
                pos -= self.count(self.node(id).right) as i64 + 1;
            } else {
                let parent = self.node(id).parent?;
                if self.node(parent).right == Some(id) {
                    pos -= self.count(left) as i64 + 1;
                } else {
                    pos += self.count(right) as i64 + 1;
                }
                id = parent;
            }
        }
        Some(id)
    }
}

impl<K: Ord> AvlTree<K> {
    /// Insert a key, returning the handle of its node.
    pub fn insert(&mut self, key: K) -> NodeId {
        let id = self.alloc(key);
        self.link(id);
        id
    }

    /// Relink a previously detached node, keyed by its current key.
    pub fn attach(&mut self, id: NodeId) {
        debug_assert!(self.node(id).parent.is_none() && self.root != Some(id));
        self.link(id);
    }

    fn link(&mut self, id: NodeId) {
        let mut cur = self.root;
        let mut parent = None;
        let mut go_left = false;
        while let Some(c) = cur {
            parent = Some(c);
            go_left = self.node(id).key < self.node(c).key;
            cur = if go_left {
                self.node(c).left
            } else {
                self.node(c).right
            };
        }
        self.node_mut(id).parent = parent;
        match parent {
            Some(p) => {
                if go_left {
                    self.node_mut(p).left = Some(id);
                } else {
                    self.node_mut(p).right = Some(id);
                }
                self.root = Some(self.fix(id));
            }
            None => self.root = Some(id),
        }
        self.len += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl<K: Ord> AvlTree<K> {
        // Assert heights, counts, balance and parent links; return (h, n).
        fn check_node(&self, id: Option<NodeId>, parent: Option<NodeId>) -> (u32, u32) {
            let Some(id) = id else { return (0, 0) };
            let node = self.node(id);
            assert_eq!(node.parent, parent);
            let (lh, lc) = self.check_node(node.left, Some(id));
            let (rh, rc) = self.check_node(node.right, Some(id));
            assert!(lh.abs_diff(rh) <= 1, "unbalanced at {id}");
            assert_eq!(node.height, 1 + lh.max(rh));
            assert_eq!(node.count, 1 + lc + rc);
            (node.height, node.count)
        }

        fn check(&self) {
            let (_, count) = self.check_node(self.root, None);
            assert_eq!(count as usize, self.len);
            let keys = self.inorder();
            assert!(keys.windows(2).all(|w| w[0] < w[1]));
        }

        fn inorder(&self) -> Vec<&K> {
            let mut out = Vec::new();
            let mut stack = Vec::new();
            let mut cur = self.root;
            while cur.is_some() || !stack.is_empty() {
                while let Some(id) = cur {
                    stack.push(id);
                    cur = self.left(id);
                }
                let id = stack.pop().unwrap();
                out.push(self.key(id));
                cur = self.right(id);
            }
            out
        }
    }

    // Deterministic shuffle, enough to exercise every rotation case.
    fn scrambled(n: u64) -> Vec<u64> {
        (0..n).map(|i| (i * 2_654_435_761) % n).collect()
    }

    #[test]
    fn insert_keeps_invariants() {
        let mut tree = AvlTree::new();
        for k in scrambled(512) {
            tree.insert(k);
            tree.check();
        }
        assert_eq!(tree.len(), 512);
        let keys: Vec<u64> = tree.inorder().into_iter().copied().collect();
        assert_eq!(keys, (0..512).collect::<Vec<_>>());
    }

    #[test]
    fn remove_keeps_invariants() {
        let mut tree = AvlTree::new();
        let mut ids = Vec::new();
        for k in 0..256u64 {
            ids.push((k, tree.insert(k)));
        }
        for (i, &(k, id)) in ids.iter().enumerate() {
            if i % 3 == 0 {
                assert_eq!(tree.remove(id), k);
                tree.check();
            }
        }
        assert_eq!(tree.len(), 256 - 86);
    }

    #[test]
    fn detach_and_attach_preserves_handle() {
        let mut tree = AvlTree::new();
        let ids: Vec<_> = (0..64u64).map(|k| tree.insert(k * 2)).collect();
        // move key 20 to the far end under the same handle
        let id = ids[10];
        tree.detach(id);
        tree.check();
        *tree.key_mut(id) = 1000;
        tree.attach(id);
        tree.check();
        assert_eq!(tree.len(), 64);
        assert_eq!(**tree.inorder().last().unwrap(), 1000);
        assert_eq!(tree.key(id), &1000);
    }

    #[test]
    fn offset_walks_in_order() {
        let mut tree = AvlTree::new();
        let mut ids = Vec::new();
        for k in scrambled(200) {
            ids.push(tree.insert(k));
        }
        ids.sort_by_key(|&id| *tree.key(id));
        for (i, &id) in ids.iter().enumerate() {
            assert_eq!(tree.offset(id, 0), Some(id));
            for (j, &other) in ids.iter().enumerate() {
                let delta = j as i64 - i as i64;
                assert_eq!(tree.offset(id, delta), Some(other));
            }
            assert_eq!(tree.offset(id, ids.len() as i64 - i as i64), None);
            assert_eq!(tree.offset(id, -(i as i64) - 1), None);
        }
    }

    #[test]
    fn slots_are_reused() {
        let mut tree = AvlTree::new();
        let a = tree.insert(1u64);
        tree.remove(a);
        let b = tree.insert(2u64);
        assert_eq!(a, b);
        tree.check();
    }
}
