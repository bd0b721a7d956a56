//! Morton-ordered quad-tree over a 2-D embedding
//!
//! Points are keyed by the 64-bit interleave of their quantised coordinates,
//! radix sorted into Morton order and split level by level: the quadrant of a
//! node at depth `d` is given by bits `62 - 2d` and `63 - 2d` of the code, so
//! every child is a contiguous sub-range of its parent's points.
//!
//! Nodes are stored breadth first, which makes each depth a contiguous slice
//! of the node array. Summarisation walks those slices from the deepest level
//! up to the root.

use crate::core::{DalError, Result};
use rayon::prelude::*;
use std::ops::Range;

/// Nodes holding at most this many points are not split further
pub const LEAF_SIZE: usize = 4;

/// Depth below which no coordinate bits are left to split on
pub const MAX_DEPTH: usize = 32;

const INTERNAL_FLAG: u32 = 1 << 31;
const CHILD_COUNT_SHIFT: u32 = 29;
const OFFSET_MASK: u32 = (1 << CHILD_COUNT_SHIFT) - 1;

/// Largest number of points or nodes a tree can address
pub const MAX_ENTRIES: usize = OFFSET_MASK as usize + 1;

const RADIX_BITS: u32 = 10;
const RADIX_BUCKETS: usize = 1 << RADIX_BITS;
const HISTOGRAM_CHUNK: usize = 1 << 14;

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: [f64; 2],
    pub max: [f64; 2],
}

impl BoundingBox {
    fn empty() -> Self {
        Self {
            min: [f64::INFINITY; 2],
            max: [f64::NEG_INFINITY; 2],
        }
    }

    fn include(mut self, p: &[f64; 2]) -> Self {
        for d in 0..2 {
            self.min[d] = self.min[d].min(p[d]);
            self.max[d] = self.max[d].max(p[d]);
        }
        self
    }

    fn merge(mut self, other: Self) -> Self {
        for d in 0..2 {
            self.min[d] = self.min[d].min(other.min[d]);
            self.max[d] = self.max[d].max(other.max[d]);
        }
        self
    }

    /// Parallel min/max reduction over `points`
    pub fn of(points: &[[f64; 2]]) -> Self {
        points
            .par_iter()
            .fold(Self::empty, |b, p| b.include(p))
            .reduce(Self::empty, Self::merge)
    }

    /// Side of the enclosing square; 1 for a degenerate box
    pub fn side(&self) -> f64 {
        let side = (self.max[0] - self.min[0]).max(self.max[1] - self.min[1]);
        if side > 0.0 && side.is_finite() {
            side
        } else {
            1.0
        }
    }
}

/// Spread the 32 bits of `v` over the even bits of a `u64`
#[inline]
pub fn spread_bits(v: u32) -> u64 {
    let mut x = v as u64;
    x = (x | (x << 16)) & 0x0000_FFFF_0000_FFFF;
    x = (x | (x << 8)) & 0x00FF_00FF_00FF_00FF;
    x = (x | (x << 4)) & 0x0F0F_0F0F_0F0F_0F0F;
    x = (x | (x << 2)) & 0x3333_3333_3333_3333;
    x = (x | (x << 1)) & 0x5555_5555_5555_5555;
    x
}

/// Interleave quantised coordinates, x in the even bits
#[inline]
pub fn morton_code(qx: u32, qy: u32) -> u64 {
    spread_bits(qx) | (spread_bits(qy) << 1)
}

#[inline]
fn quantize(v: f64, min: f64, side: f64) -> u32 {
    let scaled = (v - min) / side * 4_294_967_296.0;
    if scaled <= 0.0 {
        0
    } else if scaled >= u32::MAX as f64 {
        u32::MAX
    } else {
        scaled as u32
    }
}

/// Sort `codes` ascending, permuting `order` alongside
///
/// Least-significant-digit radix sort with 10-bit digits. Passes whose digit
/// is the same for every key are skipped.
pub fn radix_sort(codes: &mut Vec<u64>, order: &mut Vec<usize>) -> Result<()> {
    let n = codes.len();
    debug_assert_eq!(n, order.len());
    let mut codes_tmp = crate::core::try_zeroed::<u64>(n, "radix sort keys")?;
    let mut order_tmp = crate::core::try_zeroed::<usize>(n, "radix sort permutation")?;

    let mut shift = 0u32;
    while shift < u64::BITS {
        let histogram = codes
            .par_chunks(HISTOGRAM_CHUNK)
            .map(|chunk| {
                let mut local = vec![0usize; RADIX_BUCKETS];
                for &c in chunk {
                    local[digit(c, shift)] += 1;
                }
                local
            })
            .reduce(
                || vec![0usize; RADIX_BUCKETS],
                |mut a, b| {
                    a.iter_mut().zip(&b).for_each(|(x, y)| *x += y);
                    a
                },
            );

        if !histogram.iter().any(|&h| h == n) {
            let mut offsets = histogram;
            let mut running = 0;
            for slot in offsets.iter_mut() {
                let count = *slot;
                *slot = running;
                running += count;
            }
            for (&c, &o) in codes.iter().zip(order.iter()) {
                let bucket = &mut offsets[digit(c, shift)];
                codes_tmp[*bucket] = c;
                order_tmp[*bucket] = o;
                *bucket += 1;
            }
            std::mem::swap(codes, &mut codes_tmp);
            std::mem::swap(order, &mut order_tmp);
        }
        shift += RADIX_BITS;
    }
    Ok(())
}

#[inline]
fn digit(code: u64, shift: u32) -> usize {
    ((code >> shift) as usize) & (RADIX_BUCKETS - 1)
}

/// Packed tree node
///
/// Internal nodes set the sign bit of `fpos`, keep `children - 1` in bits
/// 29-30 and the index of their first child in the low 29 bits. Leaves keep
/// the offset of their first point in the Morton-ordered point array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Node {
    fpos: u32,
    cnt: u32,
}

impl Node {
    pub fn leaf(offset: usize, count: usize) -> Self {
        debug_assert!(offset <= OFFSET_MASK as usize);
        Self {
            fpos: offset as u32,
            cnt: count as u32,
        }
    }

    pub fn internal(first_child: usize, n_children: usize, count: usize) -> Result<Self> {
        if first_child + n_children > MAX_ENTRIES {
            return Err(DalError::MemoryAllocation(format!(
                "quad-tree would exceed {MAX_ENTRIES} nodes"
            )));
        }
        debug_assert!((1..=4).contains(&n_children));
        Ok(Self {
            fpos: INTERNAL_FLAG | (((n_children - 1) as u32) << CHILD_COUNT_SHIFT) | first_child as u32,
            cnt: count as u32,
        })
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.fpos & INTERNAL_FLAG == 0
    }

    /// Number of points below this node
    #[inline]
    pub fn count(&self) -> usize {
        self.cnt as usize
    }

    /// Node indices of the children; empty for a leaf
    #[inline]
    pub fn children(&self) -> Range<usize> {
        if self.is_leaf() {
            return 0..0;
        }
        let first = (self.fpos & OFFSET_MASK) as usize;
        let n = ((self.fpos >> CHILD_COUNT_SHIFT) & 0b11) as usize + 1;
        first..first + n
    }

    /// Positions in the Morton order covered by a leaf; empty for internal nodes
    #[inline]
    pub fn points(&self) -> Range<usize> {
        if self.is_leaf() {
            let start = self.fpos as usize;
            start..start + self.count()
        } else {
            0..0
        }
    }
}

/// Quad-tree over one snapshot of the embedding
#[derive(Debug, Clone)]
pub struct QuadTree {
    nodes: Vec<Node>,
    /// Depth `d` occupies `level_offsets[d]..level_offsets[d + 1]`
    level_offsets: Vec<usize>,
    /// Point indices in Morton order
    order: Vec<usize>,
    /// Morton position of each point; inverse of `order`
    rank: Vec<usize>,
    /// Morton positions covered by each node
    spans: Vec<Range<usize>>,
    centroids: Vec<[f64; 2]>,
    bbox: BoundingBox,
    side: f64,
}

impl QuadTree {
    /// Build the tree for `points`; centroids are filled by [`summarize`](Self::summarize)
    pub fn build(points: &[[f64; 2]]) -> Result<Self> {
        let n = points.len();
        if n == 0 {
            return Err(DalError::EmptyDataset);
        }
        if n > MAX_ENTRIES {
            return Err(DalError::InvalidParameter(format!(
                "quad-tree supports at most {MAX_ENTRIES} points, got {n}"
            )));
        }

        let bbox = BoundingBox::of(points);
        let side = bbox.side();
        let mut codes: Vec<u64> = points
            .par_iter()
            .map(|p| {
                morton_code(
                    quantize(p[0], bbox.min[0], side),
                    quantize(p[1], bbox.min[1], side),
                )
            })
            .collect();
        let mut order: Vec<usize> = (0..n).collect();
        radix_sort(&mut codes, &mut order)?;

        let mut nodes = Vec::new();
        let mut spans: Vec<Range<usize>> = Vec::new();
        grow(&mut nodes, 1)?;
        grow(&mut spans, 1)?;
        nodes.push(Node::leaf(0, n));
        spans.push(0..n);

        let mut level_offsets = vec![0];
        let mut depth = 0;
        loop {
            let (lo, hi) = (level_offsets[depth], nodes.len());
            level_offsets.push(hi);

            let splits: Vec<Option<Vec<Range<usize>>>> = (lo..hi)
                .into_par_iter()
                .map(|k| split(&codes, spans[k].clone(), depth))
                .collect();
            let n_new: usize = splits.iter().flatten().map(Vec::len).sum();
            if n_new == 0 {
                break;
            }
            grow(&mut nodes, n_new)?;
            grow(&mut spans, n_new)?;

            for (k, children) in (lo..hi).zip(splits) {
                let Some(children) = children else { continue };
                let parent = Node::internal(nodes.len(), children.len(), nodes[k].count())?;
                nodes[k] = parent;
                for range in children {
                    nodes.push(Node::leaf(range.start, range.len()));
                    spans.push(range);
                }
            }
            depth += 1;
        }

        let mut rank: Vec<usize> = crate::core::try_zeroed(n, "quad-tree ranks")?;
        for (position, &point) in order.iter().enumerate() {
            rank[point] = position;
        }

        Ok(Self {
            centroids: Vec::new(),
            nodes,
            level_offsets,
            order,
            rank,
            spans,
            bbox,
            side,
        })
    }

    /// Per-node centroids, one parallel pass per level from the deepest up
    pub fn summarize(&mut self, points: &[[f64; 2]]) -> Result<()> {
        let mut centroids = crate::core::try_filled(self.nodes.len(), [0.0; 2], "quad-tree centroids")?;
        for level in (0..self.depth()).rev() {
            let range = self.level(level);
            let values: Vec<[f64; 2]> = range
                .clone()
                .into_par_iter()
                .map(|k| {
                    let node = self.nodes[k];
                    let mut sum = [0.0; 2];
                    if node.is_leaf() {
                        for &p in &self.order[node.points()] {
                            sum[0] += points[p][0];
                            sum[1] += points[p][1];
                        }
                    } else {
                        for c in node.children() {
                            let w = self.nodes[c].count() as f64;
                            sum[0] += w * centroids[c][0];
                            sum[1] += w * centroids[c][1];
                        }
                    }
                    let count = node.count() as f64;
                    [sum[0] / count, sum[1] / count]
                })
                .collect();
            centroids[range].copy_from_slice(&values);
        }
        self.centroids = centroids;
        Ok(())
    }

    pub fn root(&self) -> usize {
        0
    }

    pub fn node(&self, k: usize) -> Node {
        self.nodes[k]
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Number of levels, the root level included
    pub fn depth(&self) -> usize {
        self.level_offsets.len() - 1
    }

    /// Node indices at depth `level`
    pub fn level(&self, level: usize) -> Range<usize> {
        self.level_offsets[level]..self.level_offsets[level + 1]
    }

    /// Original indices of the points stored in leaf `k`
    pub fn leaf_points(&self, k: usize) -> &[usize] {
        &self.order[self.nodes[k].points()]
    }

    /// Whether point `i` lies below node `k`
    #[inline]
    pub fn contains(&self, k: usize, i: usize) -> bool {
        self.spans[k].contains(&self.rank[i])
    }

    pub fn centroid(&self, k: usize) -> [f64; 2] {
        self.centroids[k]
    }

    pub fn bounding_box(&self) -> BoundingBox {
        self.bbox
    }

    /// Side of the square covered by a node at depth `level`
    pub fn cell_size(&self, level: usize) -> f64 {
        self.side / (1u64 << level.min(63)) as f64
    }

    /// Indices of every leaf node
    pub fn leaves(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.nodes.len()).filter(move |&k| self.nodes[k].is_leaf())
    }
}

/// Split a node into its non-empty quadrants, or `None` if it stays a leaf
fn split(codes: &[u64], span: Range<usize>, depth: usize) -> Option<Vec<Range<usize>>> {
    if span.len() <= LEAF_SIZE || depth >= MAX_DEPTH || codes[span.start] == codes[span.end - 1] {
        return None;
    }
    let shift = 62 - 2 * depth as u32;
    let slice = &codes[span.clone()];
    let mut children = Vec::with_capacity(4);
    let mut start = 0;
    for quadrant in 0..4u64 {
        let end = slice.partition_point(|&c| (c >> shift) & 0b11 <= quadrant);
        if end > start {
            children.push(span.start + start..span.start + end);
        }
        start = end;
    }
    Some(children)
}

/// Reserve room for `extra` more entries, doubling the capacity when it runs out
fn grow<T>(buffer: &mut Vec<T>, extra: usize) -> Result<()> {
    let needed = buffer.len() + extra;
    if needed <= buffer.capacity() {
        return Ok(());
    }
    let target = needed.max(2 * buffer.capacity());
    buffer
        .try_reserve_exact(target - buffer.len())
        .map_err(|e| DalError::MemoryAllocation(format!("quad-tree buffer of {target} entries: {e}")))
}
