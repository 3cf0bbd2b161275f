//! Density-based hierarchical clustering
//!
//! HDBSCAN over unit-normalized embeddings with Euclidean distances
//! (equivalent to angular distance up to a monotonic transform):
//!
//! 1. Core distance of each point at `min_samples` (the point counts as its
//!    own first neighbor).
//! 2. Mutual reachability distance `max(core(a), core(b), d(a, b))`.
//! 3. Minimum spanning tree (Prim) over mutual reachability.
//! 4. Single-linkage dendrogram from the sorted MST edges.
//! 5. Condensed tree: splits where both sides reach `min_cluster_size` are
//!    real; smaller sides fall out as points at the split's lambda (1/d).
//! 6. Cluster stability selection by excess of mass; the root is never
//!    selected, so a corpus that never truly splits is all noise.
//! 7. `cluster_selection_epsilon`: clusters born from splits at distances
//!    below epsilon are replaced by their first ancestor born at or above it.
//!
//! Label -1 denotes noise. Given identical input order the output is fully
//! deterministic; equal merge distances resolve by input order.

use promptloom_core::vector::{euclidean_distance, l2_normalize};

/// Clamp for inverting zero distances into finite lambdas.
const MIN_DISTANCE: f64 = 1e-10;

#[derive(Debug, Clone)]
pub struct HdbscanParams {
    pub min_cluster_size: usize,
    pub min_samples: usize,
    pub epsilon: f64,
}

impl Default for HdbscanParams {
    fn default() -> Self {
        Self {
            min_cluster_size: 2,
            min_samples: 1,
            epsilon: 0.15,
        }
    }
}

/// Output of a clustering run.
#[derive(Debug, Clone)]
pub struct ClusterResult {
    /// Per-point cluster label; -1 is noise.
    pub labels: Vec<i32>,
    /// Per-point membership probability in [0, 1]; 0 for noise.
    pub probabilities: Vec<f32>,
    pub num_clusters: usize,
}

impl ClusterResult {
    fn empty(n: usize) -> Self {
        Self {
            labels: vec![-1; n],
            probabilities: vec![0.0; n],
            num_clusters: 0,
        }
    }
}

/// Internal dendrogram node; ids `n..2n-1` map to indices `0..n-1` here.
struct DendroNode {
    left: usize,
    right: usize,
    dist: f64,
    size: usize,
}

/// One row of the condensed tree.
enum CondChild {
    Point(usize),
    Cluster(usize),
}

struct CondRow {
    parent: usize,
    child: CondChild,
    lambda: f64,
    size: usize,
}

/// Run the clustering. Embeddings are normalized internally.
pub fn cluster(embeddings: &[Vec<f32>], params: &HdbscanParams) -> ClusterResult {
    let n = embeddings.len();
    // Clusters of one are not clusters; two is the smallest meaningful size
    let mcs = params.min_cluster_size.max(2);
    if n < 2 || n < mcs {
        return ClusterResult::empty(n);
    }

    let normalized: Vec<Vec<f32>> = embeddings.iter().map(|e| l2_normalize(e)).collect();

    // Pairwise distances
    let mut dist = vec![vec![0.0f64; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let d = euclidean_distance(&normalized[i], &normalized[j]);
            dist[i][j] = d;
            dist[j][i] = d;
        }
    }

    // Core distances at min_samples (self included as neighbor zero)
    let k = params.min_samples.max(1).min(n);
    let mut core = vec![0.0f64; n];
    for i in 0..n {
        let mut row: Vec<f64> = dist[i].clone();
        row.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        core[i] = row[k - 1];
    }

    // Prim MST over mutual reachability
    let mreach = |a: usize, b: usize| dist[a][b].max(core[a]).max(core[b]);
    let mut in_tree = vec![false; n];
    let mut best = vec![f64::INFINITY; n];
    let mut parent = vec![0usize; n];
    let mut edges: Vec<(usize, usize, f64)> = Vec::with_capacity(n - 1);

    in_tree[0] = true;
    for v in 1..n {
        best[v] = mreach(0, v);
        parent[v] = 0;
    }
    for _ in 1..n {
        let mut next = None;
        for v in 0..n {
            if !in_tree[v] {
                match next {
                    Some(u) if best[v] >= best[u] => {}
                    _ => next = Some(v),
                }
            }
        }
        let v = match next {
            Some(v) => v,
            None => break,
        };
        in_tree[v] = true;
        edges.push((parent[v], v, best[v]));
        for u in 0..n {
            if !in_tree[u] {
                let w = mreach(v, u);
                if w < best[u] {
                    best[u] = w;
                    parent[u] = v;
                }
            }
        }
    }

    // Single-linkage dendrogram from sorted edges
    edges.sort_by(|a, b| a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal));

    let mut uf = UnionFind::new(n);
    let mut comp_node: Vec<usize> = (0..n).collect(); // component root -> dendrogram id
    let mut nodes: Vec<DendroNode> = Vec::with_capacity(n - 1);
    let node_size = |id: usize, nodes: &Vec<DendroNode>| if id < n { 1 } else { nodes[id - n].size };

    for (a, b, w) in edges {
        let ra = uf.find(a);
        let rb = uf.find(b);
        if ra == rb {
            continue;
        }
        let left = comp_node[ra];
        let right = comp_node[rb];
        let size = node_size(left, &nodes) + node_size(right, &nodes);
        nodes.push(DendroNode {
            left,
            right,
            dist: w,
            size,
        });
        let merged = uf.union(ra, rb);
        comp_node[merged] = n + nodes.len() - 1;
    }

    if nodes.is_empty() {
        return ClusterResult::empty(n);
    }
    let root = n + nodes.len() - 1;

    // Condense the dendrogram
    let mut rows: Vec<CondRow> = Vec::new();
    let mut next_cluster = 1usize; // 0 is the root cluster
    let mut stack: Vec<(usize, usize)> = vec![(root, 0)]; // (dendrogram id, condensed label)

    while let Some((node_id, label)) = stack.pop() {
        if node_id < n {
            continue;
        }
        let node = &nodes[node_id - n];
        let lambda = 1.0 / node.dist.max(MIN_DISTANCE);
        let (left, right) = (node.left, node.right);
        let left_size = node_size(left, &nodes);
        let right_size = node_size(right, &nodes);

        if left_size >= mcs && right_size >= mcs {
            for &(child, child_size) in &[(left, left_size), (right, right_size)] {
                let child_label = next_cluster;
                next_cluster += 1;
                rows.push(CondRow {
                    parent: label,
                    child: CondChild::Cluster(child_label),
                    lambda,
                    size: child_size,
                });
                stack.push((child, child_label));
            }
        } else {
            for &(child, child_size) in &[(left, left_size), (right, right_size)] {
                if child_size >= mcs {
                    // The surviving side continues under the same label
                    stack.push((child, label));
                } else {
                    for point in leaves_under(child, n, &nodes) {
                        rows.push(CondRow {
                            parent: label,
                            child: CondChild::Point(point),
                            lambda,
                            size: 1,
                        });
                    }
                }
            }
        }
    }

    let num_cond = next_cluster;

    // Birth lambdas, parents, children of condensed clusters
    let mut birth = vec![0.0f64; num_cond];
    let mut cluster_parent = vec![0usize; num_cond];
    let mut cluster_children: Vec<Vec<usize>> = vec![Vec::new(); num_cond];
    for row in &rows {
        if let CondChild::Cluster(c) = row.child {
            birth[c] = row.lambda;
            cluster_parent[c] = row.parent;
            cluster_children[row.parent].push(c);
        }
    }

    // Stability: sum over rows of (lambda - birth(parent)) * size
    let mut stability = vec![0.0f64; num_cond];
    for row in &rows {
        stability[row.parent] += (row.lambda - birth[row.parent]) * row.size as f64;
    }

    // Excess-of-mass selection, bottom-up (children always have higher ids)
    let mut selected = vec![false; num_cond];
    let mut subtree_stability = vec![0.0f64; num_cond];
    for c in (1..num_cond).rev() {
        if cluster_children[c].is_empty() {
            selected[c] = true;
            subtree_stability[c] = stability[c];
        } else {
            let child_sum: f64 = cluster_children[c].iter().map(|&k| subtree_stability[k]).sum();
            if stability[c] >= child_sum {
                selected[c] = true;
                deselect_descendants(c, &cluster_children, &mut selected);
                subtree_stability[c] = stability[c];
            } else {
                subtree_stability[c] = child_sum;
            }
        }
    }

    // Epsilon merge: clusters born from splits below epsilon climb upward
    if params.epsilon > 0.0 {
        let chosen: Vec<usize> = (1..num_cond).filter(|&c| selected[c]).collect();
        for c in chosen {
            if !selected[c] {
                continue; // already merged into an ancestor this pass
            }
            let eps_birth = 1.0 / birth[c].max(MIN_DISTANCE);
            if eps_birth >= params.epsilon {
                continue;
            }
            let mut cur = c;
            loop {
                let p = cluster_parent[cur];
                if p == 0 {
                    break; // never select the root; keep cur
                }
                cur = p;
                if 1.0 / birth[cur].max(MIN_DISTANCE) >= params.epsilon {
                    break;
                }
            }
            if cur != c {
                selected[cur] = true;
                deselect_descendants(cur, &cluster_children, &mut selected);
            }
        }
    }

    // Final label per selected cluster, in id order for determinism
    let mut label_of = vec![-1i32; num_cond];
    let mut num_clusters = 0usize;
    for c in 1..num_cond {
        if selected[c] {
            label_of[c] = num_clusters as i32;
            num_clusters += 1;
        }
    }

    // Per-point departure row -> nearest selected ancestor
    let mut labels = vec![-1i32; n];
    let mut point_lambda = vec![0.0f64; n];
    for row in &rows {
        if let CondChild::Point(p) = row.child {
            point_lambda[p] = row.lambda;
            let mut cur = row.parent;
            loop {
                if selected[cur] {
                    labels[p] = label_of[cur];
                    break;
                }
                if cur == 0 {
                    break;
                }
                cur = cluster_parent[cur];
            }
        }
    }

    // Membership probability relative to the densest point of each cluster
    let mut max_lambda = vec![0.0f64; num_clusters.max(1)];
    for p in 0..n {
        if labels[p] >= 0 {
            let l = labels[p] as usize;
            if point_lambda[p] > max_lambda[l] {
                max_lambda[l] = point_lambda[p];
            }
        }
    }
    let mut probabilities = vec![0.0f32; n];
    for p in 0..n {
        if labels[p] >= 0 {
            let m = max_lambda[labels[p] as usize];
            probabilities[p] = if m > 0.0 {
                (point_lambda[p].min(m) / m) as f32
            } else {
                1.0
            };
        }
    }

    ClusterResult {
        labels,
        probabilities,
        num_clusters,
    }
}

fn deselect_descendants(c: usize, children: &[Vec<usize>], selected: &mut [bool]) {
    let mut stack: Vec<usize> = children[c].to_vec();
    while let Some(k) = stack.pop() {
        selected[k] = false;
        stack.extend(children[k].iter().copied());
    }
}

fn leaves_under(node_id: usize, n: usize, nodes: &[DendroNode]) -> Vec<usize> {
    let mut out = Vec::new();
    let mut stack = vec![node_id];
    while let Some(id) = stack.pop() {
        if id < n {
            out.push(id);
        } else {
            let node = &nodes[id - n];
            stack.push(node.left);
            stack.push(node.right);
        }
    }
    out
}

struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u32>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// Union two roots; returns the surviving root.
    fn union(&mut self, a: usize, b: usize) -> usize {
        if self.rank[a] < self.rank[b] {
            self.parent[a] = b;
            b
        } else if self.rank[a] > self.rank[b] {
            self.parent[b] = a;
            a
        } else {
            self.parent[b] = a;
            self.rank[a] += 1;
            a
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(mcs: usize, eps: f64) -> HdbscanParams {
        HdbscanParams {
            min_cluster_size: mcs,
            min_samples: 1,
            epsilon: eps,
        }
    }

    #[test]
    fn test_degenerate_inputs() {
        let result = cluster(&[], &HdbscanParams::default());
        assert_eq!(result.num_clusters, 0);

        let result = cluster(&[vec![1.0, 0.0]], &HdbscanParams::default());
        assert_eq!(result.num_clusters, 0);
        assert_eq!(result.labels, vec![-1]);
    }

    #[test]
    fn test_two_groups_and_far_outlier() {
        // Two tight pairs on the unit circle plus one distant point
        let embeddings = vec![
            vec![1.0, 0.0],
            vec![0.99, 0.141],
            vec![0.0, 1.0],
            vec![0.141, 0.99],
            vec![-0.7, -0.7],
        ];
        let result = cluster(&embeddings, &params(2, 0.0));

        assert_eq!(result.num_clusters, 2);
        assert_eq!(result.labels[0], result.labels[1]);
        assert_eq!(result.labels[2], result.labels[3]);
        assert_ne!(result.labels[0], result.labels[2]);
        assert_eq!(result.labels[4], -1);
        assert_eq!(result.probabilities[4], 0.0);
        assert!(result.probabilities[0] > 0.0);
    }

    #[test]
    fn test_epsilon_merges_shallow_splits() {
        // Two sub-pairs 0.1 apart (below epsilon 0.15) plus a distant pair.
        // Without epsilon the sub-pairs win selection; with epsilon they
        // merge into one cluster of four.
        let a = vec![1.0f32, 0.0];
        let b = vec![0.9998, 0.02];
        let c = vec![0.995, 0.0999];
        let d = vec![0.9932, 0.1163];
        let e = vec![0.0f32, 1.0];
        let f = vec![0.02, 0.9998];
        let embeddings = vec![a, b, c, d, e, f];

        let split = cluster(&embeddings, &params(2, 0.0));
        assert_eq!(split.num_clusters, 3);

        let merged = cluster(&embeddings, &params(2, 0.15));
        assert_eq!(merged.num_clusters, 2);
        assert_eq!(merged.labels[0], merged.labels[1]);
        assert_eq!(merged.labels[1], merged.labels[2]);
        assert_eq!(merged.labels[2], merged.labels[3]);
        assert_eq!(merged.labels[4], merged.labels[5]);
        assert_ne!(merged.labels[0], merged.labels[4]);
    }

    #[test]
    fn test_three_topic_groups() {
        let mut embeddings = Vec::new();
        // Three well-separated directions in 3-space, slightly jittered
        for i in 0..5 {
            let t = i as f32 * 0.01;
            embeddings.push(vec![1.0, t, 0.0]);
        }
        for i in 0..5 {
            let t = i as f32 * 0.01;
            embeddings.push(vec![0.0, 1.0, t]);
        }
        for i in 0..5 {
            let t = i as f32 * 0.01;
            embeddings.push(vec![t, 0.0, 1.0]);
        }

        let result = cluster(&embeddings, &params(2, 0.15));
        assert_eq!(result.num_clusters, 3);
        for group in 0..3 {
            let base = result.labels[group * 5];
            assert!(base >= 0);
            for i in 0..5 {
                assert_eq!(result.labels[group * 5 + i], base);
            }
        }
    }

    #[test]
    fn test_deterministic() {
        let embeddings = vec![
            vec![1.0, 0.0],
            vec![0.99, 0.141],
            vec![0.0, 1.0],
            vec![0.141, 0.99],
        ];
        let a = cluster(&embeddings, &HdbscanParams::default());
        let b = cluster(&embeddings, &HdbscanParams::default());
        assert_eq!(a.labels, b.labels);
        assert_eq!(a.probabilities, b.probabilities);
    }
}
