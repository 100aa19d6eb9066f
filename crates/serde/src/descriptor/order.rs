//! Sibling ordering constraints.
//!
//! [`OrderMatrix`] stores a transitively closed "ordered after" relation. Every insertion
//! propagates to all predecessors of the reference and all successors of the inserted child,
//! so lookups are constant time and a cycle is detected at the insertion that would close it.

/// A side of an ordering constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChildRef {
    Child(usize),
    /// Every sibling not itself constrained against the wildcard.
    Others,
}

/// `before` must precede `after`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OrderConstraint {
    pub before: ChildRef,
    pub after: ChildRef,
}

/// Inserting a constraint would make `first` and `second` precede each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("ordering cycle between children {first} and {second}")]
pub struct OrderCycle {
    pub first: usize,
    pub second: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderMatrix {
    size: usize,
    after: Vec<bool>,
}

impl OrderMatrix {
    pub fn new(size: usize) -> Self {
        OrderMatrix {
            size,
            after: vec![false; size * size],
        }
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// `a` must come after `b`.
    pub fn is_ordered_after(&self, a: usize, b: usize) -> bool {
        self.after[a * self.size + b]
    }

    /// `a` must come before `b`.
    pub fn is_ordered_before(&self, a: usize, b: usize) -> bool {
        self.is_ordered_after(b, a)
    }

    /// Records that `child` comes after `reference`. Returns whether the relation changed.
    pub fn set_ordered_after(
        &mut self,
        child: usize,
        reference: usize,
    ) -> Result<bool, OrderCycle> {
        if child == reference || self.is_ordered_after(reference, child) {
            return Err(OrderCycle {
                first: child,
                second: reference,
            });
        }
        if self.is_ordered_after(child, reference) {
            return Ok(false);
        }

        let predecessors: Vec<usize> = std::iter::once(reference)
            .chain((0..self.size).filter(|&i| self.is_ordered_after(reference, i)))
            .collect();
        let successors: Vec<usize> = std::iter::once(child)
            .chain((0..self.size).filter(|&j| self.is_ordered_after(j, child)))
            .collect();

        for &j in &successors {
            for &i in &predecessors {
                self.after[j * self.size + i] = true;
            }
        }
        Ok(true)
    }

    /// Records that `child` comes before `reference`.
    pub fn set_ordered_before(
        &mut self,
        child: usize,
        reference: usize,
    ) -> Result<bool, OrderCycle> {
        self.set_ordered_after(reference, child)
    }

    /// Stable topological order: each step takes the lowest-index child whose predecessors
    /// have all been placed, preferring children in an earlier `partition`.
    pub fn canonical_order(&self, partition: &[u8]) -> Vec<usize> {
        let mut placed = vec![false; self.size];
        let mut order = Vec::with_capacity(self.size);
        while order.len() < self.size {
            let next = (0..self.size)
                .filter(|&c| !placed[c])
                .filter(|&c| (0..self.size).all(|p| placed[p] || !self.is_ordered_after(c, p)))
                .min_by_key(|&c| (partition.get(c).copied().unwrap_or(0), c));
            match next {
                Some(c) => {
                    placed[c] = true;
                    order.push(c);
                }
                // Unreachable for an acyclic matrix; keep the remainder in declaration order.
                None => {
                    for (c, done) in placed.iter_mut().enumerate() {
                        if !*done {
                            *done = true;
                            order.push(c);
                        }
                    }
                }
            }
        }
        order
    }
}

/// Builds the matrix for `count` siblings. Constraints are only applied between siblings of
/// the same partition (attributes are always written before elements).
pub fn resolve_constraints(
    count: usize,
    constraints: &[OrderConstraint],
    partition: &[u8],
) -> Result<OrderMatrix, OrderCycle> {
    let mut matrix = OrderMatrix::new(count);
    let same_partition =
        |a: usize, b: usize| partition.get(a).copied().unwrap_or(0) == partition.get(b).copied().unwrap_or(0);

    let mut before_others = Vec::new();
    let mut after_others = Vec::new();
    for constraint in constraints {
        match (constraint.before, constraint.after) {
            (ChildRef::Child(before), ChildRef::Child(after)) => {
                if same_partition(before, after) {
                    matrix.set_ordered_after(after, before)?;
                }
            }
            (ChildRef::Child(before), ChildRef::Others) => before_others.push(before),
            (ChildRef::Others, ChildRef::Child(after)) => after_others.push(after),
            (ChildRef::Others, ChildRef::Others) => {}
        }
    }

    for &child in &before_others {
        for other in 0..count {
            if other != child
                && same_partition(child, other)
                && !before_others.contains(&other)
                && !matrix.is_ordered_before(other, child)
            {
                matrix.set_ordered_before(child, other)?;
            }
        }
    }
    for &child in &after_others {
        for other in 0..count {
            if other != child
                && same_partition(child, other)
                && !after_others.contains(&other)
                && !matrix.is_ordered_after(other, child)
            {
                matrix.set_ordered_after(child, other)?;
            }
        }
    }
    Ok(matrix)
}
