//! Connected components over pool slots.
//!
//! Uses a union-find data structure; components are reported in the order
//! of their smallest member so that precluster emission is deterministic.

/// Union-Find data structure for connected component detection.
#[derive(Debug)]
pub(crate) struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<usize>,
}

impl UnionFind {
    pub(crate) fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    pub(crate) fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        // Path compression.
        let mut node = x;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    pub(crate) fn union(&mut self, x: usize, y: usize) {
        let px = self.find(x);
        let py = self.find(y);

        if px == py {
            return;
        }

        match self.rank[px].cmp(&self.rank[py]) {
            std::cmp::Ordering::Less => self.parent[px] = py,
            std::cmp::Ordering::Greater => self.parent[py] = px,
            std::cmp::Ordering::Equal => {
                self.parent[py] = px;
                self.rank[px] += 1;
            }
        }
    }

    /// Groups `members` by root.
    ///
    /// Each group keeps the input order of its members and groups are ordered
    /// by their first member.
    pub(crate) fn components(&mut self, members: &[usize]) -> Vec<Vec<usize>> {
        let mut group_of_root: Vec<Option<usize>> = vec![None; self.parent.len()];
        let mut groups: Vec<Vec<usize>> = Vec::new();
        for &m in members {
            let root = self.find(m);
            match group_of_root[root] {
                Some(g) => groups[g].push(m),
                None => {
                    group_of_root[root] = Some(groups.len());
                    groups.push(vec![m]);
                }
            }
        }
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_union_find() {
        let mut uf = UnionFind::new(5);
        uf.union(0, 1);
        uf.union(2, 3);
        uf.union(1, 2);

        assert_eq!(uf.find(0), uf.find(3));
        assert_ne!(uf.find(0), uf.find(4));
    }

    #[test]
    fn test_components_ordered_by_first_member() {
        let mut uf = UnionFind::new(6);
        uf.union(4, 1);
        uf.union(5, 2);
        let groups = uf.components(&[0, 1, 2, 3, 4, 5]);
        assert_eq!(groups, vec![vec![0], vec![1, 4], vec![2, 5], vec![3]]);
    }

    #[test]
    fn test_components_of_subset() {
        let mut uf = UnionFind::new(4);
        uf.union(0, 3);
        let groups = uf.components(&[3, 2]);
        assert_eq!(groups, vec![vec![3], vec![2]]);
    }

    #[test]
    fn test_long_chain_does_not_recurse() {
        let n = 100_000;
        let mut uf = UnionFind::new(n);
        for i in 1..n {
            uf.union(i - 1, i);
        }
        assert_eq!(uf.find(0), uf.find(n - 1));
    }
}
