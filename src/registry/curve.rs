//! Level-indexed value curves.

use serde::{Deserialize, Serialize};

use super::CurveId;

/// Values indexed by an integer position in `[min_position, max_position]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Curve {
    pub id: CurveId,
    #[serde(default)]
    pub name: String,
    pub min_position: i32,
    pub max_position: i32,
    pub values: Vec<f32>,
}

impl Curve {
    pub fn new(id: CurveId, min_position: i32, values: Vec<f32>) -> Self {
        let max_position = min_position + values.len().saturating_sub(1) as i32;
        Self {
            id,
            name: String::new(),
            min_position,
            max_position,
            values,
        }
    }

    pub fn index_in_range(&self, position: i32) -> bool {
        position >= self.min_position && position <= self.max_position
    }

    /// Value at `position`, clamped into the curve's range
    pub fn get_at(&self, position: i32) -> f32 {
        let clamped = position.clamp(self.min_position, self.max_position.max(self.min_position));
        let index = (clamped - self.min_position) as usize;
        match self.values.get(index) {
            Some(v) => *v,
            None => self.values.last().copied().unwrap_or(0.0),
        }
    }

    pub fn get_int_at(&self, position: i32) -> i32 {
        self.get_at(position) as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn curve() -> Curve {
        Curve::new(CurveId(1), 5, vec![10.0, 20.0, 30.0])
    }

    #[test]
    fn test_new_sets_max_position() {
        let c = curve();
        assert_eq!(c.min_position, 5);
        assert_eq!(c.max_position, 7);
    }

    #[test]
    fn test_get_at_in_range() {
        let c = curve();
        assert_eq!(c.get_at(5), 10.0);
        assert_eq!(c.get_at(6), 20.0);
        assert_eq!(c.get_at(7), 30.0);
    }

    #[test]
    fn test_get_at_clamps_to_boundaries() {
        let c = curve();
        assert_eq!(c.get_at(-100), 10.0);
        assert_eq!(c.get_at(1000), 30.0);
        assert!(!c.index_in_range(4));
        assert!(c.index_in_range(7));
    }

    #[test]
    fn test_short_values_fall_back_to_last() {
        let c = Curve {
            id: CurveId(2),
            name: "short".into(),
            min_position: 0,
            max_position: 10,
            values: vec![1.5, 2.5],
        };
        assert_eq!(c.get_at(9), 2.5);
        assert_eq!(c.get_int_at(1), 2);
    }

    #[test]
    fn test_empty_curve_is_zero() {
        let c = Curve::new(CurveId(3), 1, vec![]);
        assert_eq!(c.get_at(1), 0.0);
    }
}
