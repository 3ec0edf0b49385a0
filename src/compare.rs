//! Tolerance-based numeric comparison of simulator outputs
//!
//! Given one labeled time series per simulator per observable, every
//! distinct simulator pair is compared element-wise under a hybrid
//! absolute+relative tolerance:
//!
//! ```text
//! atol = max(abs_tol_min, max(|a|,|b|) * abs_tol_scale)
//! agree iff |a - b| <= atol + rel_tol * max(|a|,|b|)
//! ```
//!
//! The scale reference is `max(|a|,|b|)`, never a fixed side - reproduced
//! exactly because downstream pass/fail decisions depend on it.
//!
//! Observables missing from some simulators and length mismatches are
//! report content, not faults: a comparison never aborts on bad data.

use crate::cache::ObservableSeries;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Default relative tolerance
pub const DEFAULT_REL_TOL: f64 = 0.0001;

/// Default minimum absolute tolerance
pub const DEFAULT_ABS_TOL_MIN: f64 = 0.001;

/// Default absolute tolerance scale
pub const DEFAULT_ABS_TOL_SCALE: f64 = 0.00001;

/// Settings controlling one comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonSettings {
    /// Caller-supplied description of the verification
    pub description: String,

    /// Attach the raw per-simulator series to the report
    pub include_raw_outputs: bool,

    /// Relative tolerance
    pub rel_tol: f64,

    /// Minimum absolute tolerance
    pub abs_tol_min: f64,

    /// Absolute tolerance scale
    pub abs_tol_scale: f64,

    /// Restrict comparison to these observables (None compares all)
    pub observable_filter: Option<BTreeSet<String>>,
}

impl Default for ComparisonSettings {
    fn default() -> Self {
        Self {
            description: "verification".to_string(),
            include_raw_outputs: false,
            rel_tol: DEFAULT_REL_TOL,
            abs_tol_min: DEFAULT_ABS_TOL_MIN,
            abs_tol_scale: DEFAULT_ABS_TOL_SCALE,
            observable_filter: None,
        }
    }
}

impl ComparisonSettings {
    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set tolerances
    pub fn with_tolerances(mut self, rel_tol: f64, abs_tol_min: f64, abs_tol_scale: f64) -> Self {
        self.rel_tol = rel_tol;
        self.abs_tol_min = abs_tol_min;
        self.abs_tol_scale = abs_tol_scale;
        self
    }

    /// Attach raw outputs to the report
    pub fn with_raw_outputs(mut self) -> Self {
        self.include_raw_outputs = true;
        self
    }

    /// Restrict comparison to the named observables
    pub fn with_observable_filter(
        mut self,
        observables: impl IntoIterator<Item = String>,
    ) -> Self {
        self.observable_filter = Some(observables.into_iter().collect());
        self
    }
}

/// Whether two values agree under the tolerance formula
pub fn values_agree(a: f64, b: f64, settings: &ComparisonSettings) -> bool {
    let scale = a.abs().max(b.abs());
    let atol = settings.abs_tol_min.max(scale * settings.abs_tol_scale);
    (a - b).abs() <= atol + settings.rel_tol * scale
}

/// Element-wise comparison of one simulator pair for one observable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairComparison {
    /// Every element agreed under the tolerance formula
    pub agree: bool,

    /// Largest absolute difference across the series
    pub max_abs_diff: f64,

    /// Largest relative difference, `|a-b| / max(|a|,|b|)` (0 where both 0)
    pub max_rel_diff: f64,
}

/// Per-observable comparison outcome
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservableReport {
    /// Pairwise comparisons, keyed `"simA|simB"`
    pub pairs: BTreeMap<String, PairComparison>,

    /// Simulators whose output lacks this observable. Non-empty means the
    /// observable was not compared and does not count toward overall
    /// agreement.
    pub missing_from: Vec<String>,

    /// Pairs whose series lengths differ, keyed `"simA|simB"`. A hard
    /// per-observable failure.
    pub shape_mismatches: Vec<String>,
}

impl ObservableReport {
    /// Whether this observable participates in overall agreement
    pub fn comparable(&self) -> bool {
        self.missing_from.is_empty()
    }

    /// Whether this observable agrees (shape intact, all pairs agree)
    pub fn agrees(&self) -> bool {
        self.shape_mismatches.is_empty() && self.pairs.values().all(|p| p.agree)
    }
}

/// Aggregated agreement report across all observables and simulator pairs.
///
/// Derived data; never mutated once attached to a terminal verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    /// Per-observable outcomes
    pub observables: BTreeMap<String, ObservableReport>,

    /// True iff every comparable observable agrees across every pair
    pub overall_agreement: bool,

    /// Raw per-simulator series, attached only when
    /// [`ComparisonSettings::include_raw_outputs`] is set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_outputs: Option<BTreeMap<String, ObservableSeries>>,
}

/// Report key for a simulator pair
pub fn pair_key(a: &str, b: &str) -> String {
    format!("{a}|{b}")
}

fn compare_series(a: &[f64], b: &[f64], settings: &ComparisonSettings) -> PairComparison {
    let mut agree = true;
    let mut max_abs_diff: f64 = 0.0;
    let mut max_rel_diff: f64 = 0.0;

    for (&x, &y) in a.iter().zip(b.iter()) {
        let abs_diff = (x - y).abs();
        let scale = x.abs().max(y.abs());
        let rel_diff = if scale > 0.0 { abs_diff / scale } else { 0.0 };

        max_abs_diff = max_abs_diff.max(abs_diff);
        max_rel_diff = max_rel_diff.max(rel_diff);
        if !values_agree(x, y, settings) {
            agree = false;
        }
    }

    PairComparison {
        agree,
        max_abs_diff,
        max_rel_diff,
    }
}

/// Compare every simulator pair over every observable.
///
/// `outputs` maps a simulator key (normally `name:version`) to its labeled
/// series.
pub fn compare(
    outputs: &BTreeMap<String, ObservableSeries>,
    settings: &ComparisonSettings,
) -> ComparisonReport {
    let sims: Vec<&String> = outputs.keys().collect();

    let mut names: BTreeSet<String> = outputs
        .values()
        .flat_map(|series| series.keys().cloned())
        .collect();
    if let Some(filter) = &settings.observable_filter {
        names.retain(|n| filter.contains(n));
    }

    let mut observables = BTreeMap::new();
    let mut overall_agreement = true;

    for name in names {
        let mut report = ObservableReport::default();

        for sim in &sims {
            if !outputs[*sim].contains_key(&name) {
                report.missing_from.push((*sim).clone());
            }
        }

        if report.comparable() {
            for i in 0..sims.len() {
                for j in (i + 1)..sims.len() {
                    let key = pair_key(sims[i], sims[j]);
                    let a = &outputs[sims[i]][&name];
                    let b = &outputs[sims[j]][&name];
                    if a.len() != b.len() {
                        report.shape_mismatches.push(key);
                    } else {
                        report.pairs.insert(key, compare_series(a, b, settings));
                    }
                }
            }
            if !report.agrees() {
                overall_agreement = false;
            }
        } else {
            debug!(
                observable = %name,
                missing_from = ?report.missing_from,
                "Observable not present in all outputs, excluded from overall agreement"
            );
        }

        observables.insert(name, report);
    }

    ComparisonReport {
        observables,
        overall_agreement,
        raw_outputs: settings.include_raw_outputs.then(|| outputs.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(values: &[f64]) -> Vec<f64> {
        values.to_vec()
    }

    fn outputs(entries: &[(&str, &[(&str, &[f64])])]) -> BTreeMap<String, ObservableSeries> {
        entries
            .iter()
            .map(|(sim, obs)| {
                let series_map = obs
                    .iter()
                    .map(|(name, values)| (name.to_string(), values.to_vec()))
                    .collect();
                (sim.to_string(), series_map)
            })
            .collect()
    }

    #[test]
    fn test_tolerance_formula_agrees_within_bounds() {
        // atol = max(0.001, 100.002 * 0.00001), rel term ~= 0.0001 * 100.002;
        // diff 0.002 is inside the envelope
        let settings = ComparisonSettings::default();
        assert!(values_agree(100.0, 100.002, &settings));
    }

    #[test]
    fn test_tolerance_formula_rejects_outside_bounds() {
        let settings = ComparisonSettings::default();
        assert!(!values_agree(100.0, 100.5, &settings));
    }

    #[test]
    fn test_tolerance_formula_scales_with_magnitude() {
        let settings = ComparisonSettings::default();
        // Near zero the minimum absolute tolerance dominates
        assert!(values_agree(0.0, 0.0005, &settings));
        assert!(!values_agree(0.0, 0.01, &settings));
        // At large magnitude the relative term dominates
        assert!(values_agree(1.0e6, 1.0e6 + 50.0, &settings));
        assert!(!values_agree(1.0e6, 1.0e6 + 500.0, &settings));
    }

    #[test]
    fn test_nan_never_agrees() {
        let settings = ComparisonSettings::default();
        assert!(!values_agree(f64::NAN, 1.0, &settings));
        assert!(!values_agree(f64::NAN, f64::NAN, &settings));
    }

    #[test]
    fn test_compare_all_agreeing() {
        let outputs = outputs(&[
            ("copasi:4.45", &[("S1", &[1.0, 2.0, 3.0][..])][..]),
            ("tellurium:2.2", &[("S1", &[1.0, 2.0, 3.0][..])][..]),
        ]);
        let report = compare(&outputs, &ComparisonSettings::default());

        assert!(report.overall_agreement);
        let s1 = &report.observables["S1"];
        let pair = &s1.pairs[&pair_key("copasi:4.45", "tellurium:2.2")];
        assert!(pair.agree);
        assert_eq!(pair.max_abs_diff, 0.0);
        assert!(report.raw_outputs.is_none());
    }

    #[test]
    fn test_compare_disagreement_sets_overall_false() {
        let outputs = outputs(&[
            ("copasi:4.45", &[("S1", &[100.0, 200.0][..])][..]),
            ("tellurium:2.2", &[("S1", &[100.0, 250.0][..])][..]),
        ]);
        let report = compare(&outputs, &ComparisonSettings::default());

        assert!(!report.overall_agreement);
        let pair = &report.observables["S1"].pairs[&pair_key("copasi:4.45", "tellurium:2.2")];
        assert!(!pair.agree);
        assert_eq!(pair.max_abs_diff, 50.0);
        assert!((pair.max_rel_diff - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_missing_observable_reported_and_excluded_from_overall() {
        let outputs = outputs(&[
            ("copasi:4.45", &[("S1", &[1.0][..])][..]),
            (
                "tellurium:2.2",
                &[("S1", &[1.0][..]), ("S2", &[5.0][..])][..],
            ),
        ]);
        let report = compare(&outputs, &ComparisonSettings::default());

        let s2 = &report.observables["S2"];
        assert_eq!(s2.missing_from, vec!["copasi:4.45".to_string()]);
        assert!(s2.pairs.is_empty());
        // S2 is excluded, S1 agrees, so overall agreement holds
        assert!(report.overall_agreement);
    }

    #[test]
    fn test_shape_mismatch_is_hard_failure() {
        let outputs = outputs(&[
            ("copasi:4.45", &[("S1", &[1.0, 2.0][..])][..]),
            ("tellurium:2.2", &[("S1", &[1.0, 2.0, 3.0][..])][..]),
        ]);
        let report = compare(&outputs, &ComparisonSettings::default());

        let s1 = &report.observables["S1"];
        assert_eq!(
            s1.shape_mismatches,
            vec![pair_key("copasi:4.45", "tellurium:2.2")]
        );
        assert!(s1.pairs.is_empty());
        assert!(!report.overall_agreement);
    }

    #[test]
    fn test_observable_filter_restricts_comparison() {
        let outputs = outputs(&[
            (
                "copasi:4.45",
                &[("S1", &[1.0][..]), ("S2", &[100.0][..])][..],
            ),
            (
                "tellurium:2.2",
                &[("S1", &[1.0][..]), ("S2", &[999.0][..])][..],
            ),
        ]);
        let settings =
            ComparisonSettings::default().with_observable_filter(["S1".to_string()]);
        let report = compare(&outputs, &settings);

        assert!(report.observables.contains_key("S1"));
        assert!(!report.observables.contains_key("S2"));
        // The disagreeing S2 was filtered out
        assert!(report.overall_agreement);
    }

    #[test]
    fn test_raw_outputs_attached_on_request() {
        let outputs = outputs(&[
            ("copasi:4.45", &[("S1", &[1.0][..])][..]),
            ("tellurium:2.2", &[("S1", &[1.0][..])][..]),
        ]);
        let report = compare(&outputs, &ComparisonSettings::default().with_raw_outputs());
        let raw = report.raw_outputs.unwrap();
        assert_eq!(raw["copasi:4.45"]["S1"], series(&[1.0]));
    }

    #[test]
    fn test_three_way_pairs() {
        let outputs = outputs(&[
            ("a:1", &[("S1", &[1.0][..])][..]),
            ("b:1", &[("S1", &[1.0][..])][..]),
            ("c:1", &[("S1", &[1.0][..])][..]),
        ]);
        let report = compare(&outputs, &ComparisonSettings::default());
        let s1 = &report.observables["S1"];
        assert_eq!(s1.pairs.len(), 3);
        assert!(s1.pairs.contains_key(&pair_key("a:1", "b:1")));
        assert!(s1.pairs.contains_key(&pair_key("a:1", "c:1")));
        assert!(s1.pairs.contains_key(&pair_key("b:1", "c:1")));
    }
}
