//! Weighted random selection.
//!
//! Candidates with weight <= 0 are kept (they show up in insertion-order
//! iteration) but can never be drawn.

use crate::rng::RandomSource;

#[derive(Debug, Clone)]
pub struct Picker<T> {
    entries: Vec<(T, i32)>,
}

impl<T> Default for Picker<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> Picker<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, item: T, weight: i32) {
        self.entries.push((item, weight));
    }

    /// Add with weight 1
    pub fn add_one(&mut self, item: T) {
        self.add(item, 1);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all selectable weights
    pub fn total_weight(&self) -> i64 {
        self.entries
            .iter()
            .filter(|(_, w)| *w > 0)
            .map(|(_, w)| *w as i64)
            .sum()
    }

    /// True when nothing can be drawn
    pub fn is_exhausted(&self) -> bool {
        self.total_weight() == 0
    }

    /// Candidates in insertion order, weight ignored
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|(item, _)| item)
    }

    pub fn into_items(self) -> Vec<T> {
        self.entries.into_iter().map(|(item, _)| item).collect()
    }

    fn draw_index<R: RandomSource + ?Sized>(&self, rng: &mut R) -> Option<usize> {
        let total = self.total_weight();
        if total <= 0 {
            return None;
        }
        let mut roll = rng.next_i64_range(0, total);
        for (index, (_, weight)) in self.entries.iter().enumerate() {
            if *weight <= 0 {
                continue;
            }
            let weight = *weight as i64;
            if roll < weight {
                return Some(index);
            }
            roll -= weight;
        }
        None
    }

    /// Remove and return one candidate, proportional to weight
    pub fn pick<R: RandomSource + ?Sized>(&mut self, rng: &mut R) -> Option<T> {
        let index = self.draw_index(rng)?;
        Some(self.entries.remove(index).0)
    }

    /// Return one candidate without removing it
    pub fn sample<R: RandomSource + ?Sized>(&self, rng: &mut R) -> Option<&T> {
        let index = self.draw_index(rng)?;
        self.entries.get(index).map(|(item, _)| item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::GRandom;

    #[test]
    fn test_empty_picker() {
        let mut picker: Picker<u32> = Picker::new();
        let mut rng = GRandom::new(1);
        assert!(picker.pick(&mut rng).is_none());
        assert!(picker.sample(&mut rng).is_none());
        assert!(picker.is_exhausted());
    }

    #[test]
    fn test_zero_weight_never_selected() {
        let mut rng = GRandom::new(5);
        for _ in 0..500 {
            let mut picker = Picker::new();
            picker.add("zero", 0);
            picker.add("negative", -4);
            picker.add("one", 1);
            assert_eq!(picker.pick(&mut rng), Some("one"));
            assert_eq!(picker.pick(&mut rng), None);
            assert_eq!(picker.len(), 2);
        }
    }

    #[test]
    fn test_pick_removes() {
        let mut rng = GRandom::new(3);
        let mut picker = Picker::new();
        for i in 0..5 {
            picker.add_one(i);
        }
        let mut seen: Vec<i32> = Vec::new();
        while let Some(v) = picker.pick(&mut rng) {
            seen.push(v);
        }
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_sample_keeps_candidates() {
        let mut rng = GRandom::new(4);
        let mut picker = Picker::new();
        picker.add('a', 2);
        picker.add('b', 2);
        for _ in 0..10 {
            assert!(picker.sample(&mut rng).is_some());
        }
        assert_eq!(picker.len(), 2);
    }

    #[test]
    fn test_iter_insertion_order_ignores_weight() {
        let mut picker = Picker::new();
        picker.add("c", 0);
        picker.add("a", 50);
        picker.add("b", -1);
        let order: Vec<&str> = picker.iter().copied().collect();
        assert_eq!(order, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_pick_is_deterministic() {
        let build = || {
            let mut p = Picker::new();
            p.add(1, 10);
            p.add(2, 30);
            p.add(3, 60);
            p
        };
        let mut rng_a = GRandom::new(77);
        let mut rng_b = GRandom::new(77);
        for _ in 0..50 {
            assert_eq!(build().pick(&mut rng_a), build().pick(&mut rng_b));
        }
    }

    #[test]
    fn test_frequency_roughly_proportional() {
        let mut rng = GRandom::new(2024);
        let mut picker = Picker::new();
        picker.add(0usize, 10);
        picker.add(1usize, 30);
        picker.add(2usize, 60);
        let mut counts = [0u32; 3];
        let trials = 20_000;
        for _ in 0..trials {
            if let Some(i) = picker.sample(&mut rng) {
                counts[*i] += 1;
            }
        }
        let expected = [0.1, 0.3, 0.6];
        for (count, exp) in counts.iter().zip(expected) {
            let observed = *count as f64 / trials as f64;
            assert!((observed - exp).abs() < 0.02, "observed {observed} expected {exp}");
        }
    }
}
