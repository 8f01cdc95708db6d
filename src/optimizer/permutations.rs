//! # Permutation Generator
//!
//! Successive `m`-of-`n` permutations in lexicographic index order, produced
//! one at a time into a caller-owned buffer so the join-order search never
//! materializes the full permutation space.
//!
//! With `m == n` this enumerates all `n!` orderings; with `m < n` only the
//! first `m` positions vary, which is what the partial brute-force phase of
//! the optimizer consumes.

/// Generates successive permutations of `m` elements drawn from `items`.
pub struct Permutations<T: Clone> {
    items: Vec<T>,
    index: Vec<usize>,
    m: usize,
    first: bool,
    done: bool,
}

impl<T: Clone> Permutations<T> {
    /// All-elements permutations (`m == n`).
    pub fn create(items: Vec<T>) -> Self {
        let m = items.len();
        Self::create_partial(items, m)
    }

    /// Permutations over the first `m` positions only.
    pub fn create_partial(items: Vec<T>, m: usize) -> Self {
        let m = m.min(items.len());
        Self {
            index: (0..m).collect(),
            items,
            m,
            first: true,
            done: false,
        }
    }

    /// Writes the next permutation into `out`; returns false when the space
    /// is exhausted. `out` is resized to `m` elements.
    pub fn next(&mut self, out: &mut Vec<T>) -> bool {
        if self.done {
            return false;
        }
        if self.first {
            self.first = false;
        } else if !self.advance() {
            self.done = true;
            return false;
        }
        out.clear();
        out.extend(self.index.iter().map(|&i| self.items[i].clone()));
        true
    }

    /// Unused source elements in ascending index order (the complement of
    /// the current selection).
    pub fn remaining(&self) -> Vec<T> {
        let n = self.items.len();
        let mut used = vec![false; n];
        for &i in &self.index {
            used[i] = true;
        }
        (0..n)
            .filter(|&i| !used[i])
            .map(|i| self.items[i].clone())
            .collect()
    }

    fn advance(&mut self) -> bool {
        let n = self.items.len();
        for pos in (0..self.m).rev() {
            let mut used = vec![false; n];
            for &i in &self.index[..pos] {
                used[i] = true;
            }
            // smallest unused index greater than the current one
            let next = ((self.index[pos] + 1)..n).find(|&v| !used[v]);
            if let Some(v) = next {
                self.index[pos] = v;
                used[v] = true;
                // refill the tail with the smallest unused indices
                let mut fill = (0..n).filter(|&c| !used[c]);
                for slot in pos + 1..self.m {
                    let c = fill.next().expect("enough unused indices for the tail");
                    self.index[slot] = c;
                }
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_all<T: Clone>(mut p: Permutations<T>) -> Vec<Vec<T>> {
        let mut out = Vec::new();
        let mut buf = Vec::new();
        while p.next(&mut buf) {
            out.push(buf.clone());
        }
        out
    }

    #[test]
    fn full_permutations_count_is_factorial() {
        let all = collect_all(Permutations::create(vec![0, 1, 2, 3]));
        assert_eq!(all.len(), 24);

        // all distinct
        let mut sorted = all.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), 24);
    }

    #[test]
    fn first_permutation_is_identity() {
        let mut p = Permutations::create(vec!['a', 'b', 'c']);
        let mut buf = Vec::new();
        assert!(p.next(&mut buf));
        assert_eq!(buf, vec!['a', 'b', 'c']);
    }

    #[test]
    fn partial_permutations_fix_only_a_prefix() {
        let all = collect_all(Permutations::create_partial(vec![0, 1, 2, 3], 2));
        // P(4, 2) = 12 arrangements of two positions
        assert_eq!(all.len(), 12);
        assert!(all.iter().all(|p| p.len() == 2));
        assert!(all.contains(&vec![3, 0]));
    }

    #[test]
    fn remaining_is_the_complement() {
        let mut p = Permutations::create_partial(vec![10, 20, 30, 40], 2);
        let mut buf = Vec::new();
        p.next(&mut buf);
        assert_eq!(buf, vec![10, 20]);
        assert_eq!(p.remaining(), vec![30, 40]);
    }

    #[test]
    fn single_element_has_one_permutation() {
        let all = collect_all(Permutations::create(vec![7]));
        assert_eq!(all, vec![vec![7]]);
    }
}
