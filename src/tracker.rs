//! Parameter tracker
//!
//! An append-only ordered log of `(factory_key, theta_delta)` entries, one per
//! training iteration, plus a materialized map from factory key to its
//! cumulative shrunken coefficient vector. The map is always the componentwise
//! sum of every delta logged under that key; [`ParameterTracker::at_iteration`]
//! replays any prefix of the log to reconstruct the map as it stood at an
//! earlier iteration, without touching the live accumulated state.

#![forbid(unsafe_code)]

use std::collections::HashMap;

use nalgebra::DVector;

use crate::error::RangeError;

/// One logged step: the winning factory's key and the shrunken coefficient
/// delta (`nu * s * theta`) it contributed.
#[derive(Debug, Clone)]
pub struct TrackerEntry {
    pub key: String,
    pub delta: DVector<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct ParameterTracker {
    entries: Vec<TrackerEntry>,
    accumulated: HashMap<String, DVector<f64>>,
}

impl ParameterTracker {
    pub fn new() -> Self {
        ParameterTracker { entries: Vec::new(), accumulated: HashMap::new() }
    }

    /// Append `(key, delta)` to the log and fold it into the accumulated map.
    pub fn insert(&mut self, key: String, delta: DVector<f64>) {
        let acc = self
            .accumulated
            .entry(key.clone())
            .or_insert_with(|| DVector::zeros(delta.len()));
        *acc += &delta;
        self.entries.push(TrackerEntry { key, delta });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The raw append-only log, in iteration order.
    pub fn entries_slice(&self) -> &[TrackerEntry] {
        &self.entries
    }

    /// The live accumulated map (componentwise sum of every logged delta).
    pub fn accumulated(&self) -> &HashMap<String, DVector<f64>> {
        &self.accumulated
    }

    /// Fresh walk over the first `k` entries, producing the map that would
    /// have resulted from stopping training after iteration `k`.
    pub fn parameters_at_iteration(&self, k: usize) -> Result<HashMap<String, DVector<f64>>, RangeError> {
        if k > self.entries.len() {
            return Err(RangeError::IterationOutOfRange { k, len: self.entries.len() });
        }
        let mut map: HashMap<String, DVector<f64>> = HashMap::new();
        for entry in &self.entries[..k] {
            let acc = map
                .entry(entry.key.clone())
                .or_insert_with(|| DVector::zeros(entry.delta.len()));
            *acc += &entry.delta;
        }
        Ok(map)
    }

    /// Replace the live accumulated map with the state at iteration `k`.
    /// Subsequent predictions and continued training see only this prefix.
    pub fn set_to_iteration(&mut self, k: usize) -> Result<(), RangeError> {
        self.accumulated = self.parameters_at_iteration(k)?;
        self.entries.truncate(k);
        Ok(())
    }

    /// Iteration-indexed rows (1..=M), columns the concatenation (in a stable
    /// key order) of each factory's coefficient vector as it stood after that
    /// iteration; column names are `key` for length-1 vectors or
    /// `key_x1, key_x2, ...` otherwise.
    pub fn parameter_matrix(&self) -> (Vec<String>, Vec<Vec<f64>>) {
        let mut keys: Vec<String> = self.accumulated.keys().cloned().collect();
        keys.sort();

        let mut column_names = Vec::new();
        let mut widths = Vec::new();
        for key in &keys {
            let width = self.accumulated[key].len();
            widths.push(width);
            if width == 1 {
                column_names.push(key.clone());
            } else {
                for j in 1..=width {
                    column_names.push(format!("{key}_x{j}"));
                }
            }
        }

        let mut rows = Vec::with_capacity(self.entries.len());
        let mut running: HashMap<String, DVector<f64>> = HashMap::new();
        for entry in &self.entries {
            let acc = running
                .entry(entry.key.clone())
                .or_insert_with(|| DVector::zeros(entry.delta.len()));
            *acc += &entry.delta;

            let mut row = Vec::with_capacity(column_names.len());
            for (key, &width) in keys.iter().zip(widths.iter()) {
                match running.get(key) {
                    Some(v) => row.extend(v.iter().copied()),
                    None => row.extend(std::iter::repeat(0.0).take(width)),
                }
            }
            rows.push(row);
        }

        (column_names, rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulated_equals_sum_of_deltas_at_all_times() {
        let mut tracker = ParameterTracker::new();
        tracker.insert("a".to_string(), DVector::from_vec(vec![1.0, 0.0]));
        tracker.insert("b".to_string(), DVector::from_vec(vec![0.5]));
        tracker.insert("a".to_string(), DVector::from_vec(vec![0.2, 0.1]));

        assert_eq!(tracker.accumulated()["a"], DVector::from_vec(vec![1.2, 0.1]));
        assert_eq!(tracker.accumulated()["b"], DVector::from_vec(vec![0.5]));
    }

    #[test]
    fn parameters_at_iteration_matches_fresh_replay() {
        let mut tracker = ParameterTracker::new();
        tracker.insert("a".to_string(), DVector::from_vec(vec![1.0]));
        tracker.insert("a".to_string(), DVector::from_vec(vec![2.0]));
        tracker.insert("a".to_string(), DVector::from_vec(vec![3.0]));

        let at_2 = tracker.parameters_at_iteration(2).unwrap();
        assert_eq!(at_2["a"], DVector::from_vec(vec![3.0]));
        assert_eq!(tracker.accumulated()["a"], DVector::from_vec(vec![6.0]));
    }

    #[test]
    fn parameters_at_iteration_beyond_history_is_range_error() {
        let mut tracker = ParameterTracker::new();
        tracker.insert("a".to_string(), DVector::from_vec(vec![1.0]));
        assert!(tracker.parameters_at_iteration(5).is_err());
    }

    #[test]
    fn set_to_iteration_rewinds_accumulated_and_log() {
        let mut tracker = ParameterTracker::new();
        tracker.insert("a".to_string(), DVector::from_vec(vec![1.0]));
        tracker.insert("a".to_string(), DVector::from_vec(vec![1.0]));
        tracker.insert("a".to_string(), DVector::from_vec(vec![1.0]));
        tracker.set_to_iteration(1).unwrap();
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.accumulated()["a"], DVector::from_vec(vec![1.0]));
    }
}
