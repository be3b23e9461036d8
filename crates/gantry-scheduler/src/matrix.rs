//! Matrix expansion for parallel job generation.

use gantry_core::pipeline::{JobDefinition, MatrixConfig, matrix_value_string};
use indexmap::IndexMap;
use serde_json::Value;
use thiserror::Error;

/// Upper bound on the combinations a single matrix may produce.
pub const MAX_COMBINATIONS: usize = 256;

/// A single assignment of matrix axes to values.
pub type Assignment = IndexMap<String, Value>;

#[derive(Debug, Error)]
pub enum MatrixError {
    #[error("Job '{job}' declares a matrix without axes")]
    NoAxes { job: String },
    #[error("Job '{job}' has matrix axis '{axis}' with no values")]
    EmptyAxis { job: String, axis: String },
    #[error("Matrix of job '{job}' expands to no instances")]
    NoInstances { job: String },
    #[error("Job '{job}' has max_parallel of zero")]
    ZeroMaxParallel { job: String },
    #[error("Matrix of job '{job}' exceeds {limit} combinations")]
    TooLarge { job: String, limit: usize },
}

/// One concrete instance of a job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobInstance {
    pub job: String,
    pub index: usize,
    pub name: String,
    pub matrix: Assignment,
}

impl JobInstance {
    /// Matrix values rendered as strings, in axis order.
    pub fn matrix_strings(&self) -> IndexMap<String, String> {
        self.matrix
            .iter()
            .map(|(k, v)| (k.clone(), matrix_value_string(v)))
            .collect()
    }
}

/// Lazy Cartesian product over matrix axes.
///
/// The first axis is outermost and the last varies fastest.
pub struct Combinations<'a> {
    axes: Vec<(&'a String, &'a [Value])>,
    cursor: Vec<usize>,
    done: bool,
}

impl<'a> Combinations<'a> {
    pub fn new(axes: &'a IndexMap<String, Vec<Value>>) -> Self {
        let axes: Vec<_> = axes.iter().map(|(k, v)| (k, v.as_slice())).collect();
        let done = axes.is_empty() || axes.iter().any(|(_, values)| values.is_empty());
        Self {
            cursor: vec![0; axes.len()],
            axes,
            done,
        }
    }

    fn advance(&mut self) {
        for position in (0..self.cursor.len()).rev() {
            self.cursor[position] += 1;
            if self.cursor[position] < self.axes[position].1.len() {
                return;
            }
            self.cursor[position] = 0;
        }
        self.done = true;
    }
}

impl Iterator for Combinations<'_> {
    type Item = Assignment;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let combo = self
            .axes
            .iter()
            .zip(&self.cursor)
            .map(|((key, values), &i)| ((*key).clone(), values[i].clone()))
            .collect();
        self.advance();
        Some(combo)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.done {
            return (0, Some(0));
        }
        // Remaining = total - consumed, with the cursor read as a mixed-radix number.
        let mut consumed = 0usize;
        let mut total = 1usize;
        for ((_, values), &i) in self.axes.iter().zip(&self.cursor) {
            let next = consumed
                .checked_mul(values.len())
                .and_then(|c| c.checked_add(i))
                .zip(total.checked_mul(values.len()));
            let Some((c, t)) = next else {
                return (0, None);
            };
            consumed = c;
            total = t;
        }
        let remaining = total - consumed;
        (remaining, Some(remaining))
    }
}

/// Expander for matrix configurations.
pub struct MatrixExpander;

impl MatrixExpander {
    pub fn new() -> Self {
        Self
    }

    /// Expand a job into its instances. A job without a matrix has one.
    pub fn expand(&self, job: &JobDefinition) -> Result<Vec<JobInstance>, MatrixError> {
        let Some(matrix) = job.matrix.as_ref() else {
            return Ok(vec![JobInstance {
                job: job.name.clone(),
                index: 0,
                name: job.name.clone(),
                matrix: Assignment::new(),
            }]);
        };

        self.validate(&job.name, matrix)?;

        let mut combinations: Vec<Assignment> = Combinations::new(&matrix.axes)
            .filter(|combo| {
                !matrix
                    .exclude
                    .iter()
                    .any(|exclude| self.matches_exclude(combo, exclude))
            })
            .collect();

        for include in &matrix.include {
            if !combinations.contains(include) {
                combinations.push(include.clone());
            }
        }

        if combinations.is_empty() {
            return Err(MatrixError::NoInstances {
                job: job.name.clone(),
            });
        }

        Ok(combinations
            .into_iter()
            .enumerate()
            .map(|(index, matrix)| JobInstance {
                job: job.name.clone(),
                index,
                name: self.format_display_name(&job.name, &matrix),
                matrix,
            })
            .collect())
    }

    fn validate(&self, job: &str, matrix: &MatrixConfig) -> Result<(), MatrixError> {
        if matrix.axes.is_empty() {
            return Err(MatrixError::NoAxes {
                job: job.to_string(),
            });
        }
        if let Some((axis, _)) = matrix.axes.iter().find(|(_, values)| values.is_empty()) {
            return Err(MatrixError::EmptyAxis {
                job: job.to_string(),
                axis: axis.clone(),
            });
        }
        if matrix.max_parallel == Some(0) {
            return Err(MatrixError::ZeroMaxParallel {
                job: job.to_string(),
            });
        }
        let product = Combinations::new(&matrix.axes).size_hint().1;
        if product.is_none_or(|n| n > MAX_COMBINATIONS) {
            return Err(MatrixError::TooLarge {
                job: job.to_string(),
                limit: MAX_COMBINATIONS,
            });
        }
        Ok(())
    }

    fn matches_exclude(&self, combo: &Assignment, exclude: &Assignment) -> bool {
        exclude
            .iter()
            .all(|(key, value)| combo.get(key) == Some(value))
    }

    fn format_display_name(&self, job_name: &str, vars: &Assignment) -> String {
        if vars.is_empty() {
            return job_name.to_string();
        }

        let parts: Vec<String> = vars
            .iter()
            .map(|(k, v)| format!("{}={}", k, matrix_value_string(v)))
            .collect();

        format!("{} ({})", job_name, parts.join(", "))
    }
}

impl Default for MatrixExpander {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn matrix_job(matrix: MatrixConfig) -> JobDefinition {
        JobDefinition::new("test").with_matrix(matrix)
    }

    fn assignment(pairs: &[(&str, Value)]) -> Assignment {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_non_matrix_job_has_one_instance() {
        let instances = MatrixExpander::new()
            .expand(&JobDefinition::new("lint"))
            .unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].name, "lint");
        assert!(instances[0].matrix.is_empty());
    }

    #[test]
    fn test_three_by_three_in_stable_order() {
        let job = matrix_job(
            MatrixConfig::new()
                .axis("os", ["ubuntu", "macos", "windows"])
                .axis("rust", ["1.65", "stable", "nightly"]),
        );

        let expander = MatrixExpander::new();
        let instances = expander.expand(&job).unwrap();
        assert_eq!(instances.len(), 9);

        let names: Vec<&str> = instances.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "test (os=ubuntu, rust=1.65)",
                "test (os=ubuntu, rust=stable)",
                "test (os=ubuntu, rust=nightly)",
                "test (os=macos, rust=1.65)",
                "test (os=macos, rust=stable)",
                "test (os=macos, rust=nightly)",
                "test (os=windows, rust=1.65)",
                "test (os=windows, rust=stable)",
                "test (os=windows, rust=nightly)",
            ]
        );
        for (i, instance) in instances.iter().enumerate() {
            assert_eq!(instance.index, i);
        }

        assert_eq!(expander.expand(&job).unwrap(), instances);
    }

    #[test]
    fn test_combinations_is_lazy_and_sized() {
        let axes: IndexMap<String, Vec<Value>> = [
            ("a".to_string(), vec![json!(1), json!(2)]),
            ("b".to_string(), vec![json!("x"), json!("y"), json!("z")]),
        ]
        .into_iter()
        .collect();

        let mut combos = Combinations::new(&axes);
        assert_eq!(combos.size_hint(), (6, Some(6)));
        assert_eq!(
            combos.next().unwrap(),
            assignment(&[("a", json!(1)), ("b", json!("x"))])
        );
        assert_eq!(combos.size_hint(), (5, Some(5)));
        assert_eq!(combos.count(), 5);
    }

    #[test]
    fn test_size_hint_saturates_instead_of_overflowing() {
        // 256^8 = 2^64, one past usize::MAX on 64-bit targets.
        let values: Vec<Value> = (0..256).map(|n| json!(n)).collect();
        let axes: IndexMap<String, Vec<Value>> =
            (0..8).map(|n| (format!("axis{}", n), values.clone())).collect();

        let mut combos = Combinations::new(&axes);
        assert_eq!(combos.size_hint(), (0, None));
        assert_eq!(combos.next().unwrap().len(), 8);
    }

    #[test]
    fn test_oversized_matrix_rejected_before_expansion() {
        let values: Vec<Value> = (0..100).map(|n| json!(n)).collect();
        let job = JobDefinition::new("huge").with_matrix(
            MatrixConfig::new()
                .axis("a", values.clone())
                .axis("b", values.clone())
                .axis("c", values),
        );
        let err = MatrixExpander::new().expand(&job).unwrap_err();
        assert!(matches!(err, MatrixError::TooLarge { limit: MAX_COMBINATIONS, .. }));

        let exact = JobDefinition::new("exact").with_matrix(
            MatrixConfig::new()
                .axis("a", (0..16).map(|n| json!(n)))
                .axis("b", (0..16).map(|n| json!(n))),
        );
        assert_eq!(MatrixExpander::new().expand(&exact).unwrap().len(), 256);
    }

    #[test]
    fn test_exclude_partial_assignment() {
        let mut config = MatrixConfig::new()
            .axis("os", ["linux", "windows"])
            .axis("rust", ["stable", "nightly"]);
        config
            .exclude
            .push(assignment(&[("os", json!("windows")), ("rust", json!("nightly"))]));

        let instances = MatrixExpander::new().expand(&matrix_job(config)).unwrap();
        assert_eq!(instances.len(), 3);
        assert!(
            !instances
                .iter()
                .any(|i| i.name == "test (os=windows, rust=nightly)")
        );
    }

    #[test]
    fn test_include_appended_once() {
        let mut config = MatrixConfig::new().axis("os", ["linux"]);
        config.include.push(assignment(&[("os", json!("linux"))]));
        config.include.push(assignment(&[("os", json!("freebsd"))]));

        let instances = MatrixExpander::new().expand(&matrix_job(config)).unwrap();
        let names: Vec<&str> = instances.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["test (os=linux)", "test (os=freebsd)"]);
    }

    #[test]
    fn test_non_string_values_render_as_json() {
        let job = matrix_job(MatrixConfig::new().axis("version", [json!(1.65), json!(2)]));
        let instances = MatrixExpander::new().expand(&job).unwrap();
        assert_eq!(instances[0].name, "test (version=1.65)");
        assert_eq!(instances[1].matrix_strings()["version"], "2");
    }

    #[test]
    fn test_malformed_matrices_rejected() {
        let expander = MatrixExpander::new();

        let err = expander.expand(&matrix_job(MatrixConfig::new())).unwrap_err();
        assert!(matches!(err, MatrixError::NoAxes { .. }));

        let empty: Vec<Value> = Vec::new();
        let err = expander
            .expand(&matrix_job(MatrixConfig::new().axis("os", empty)))
            .unwrap_err();
        assert!(matches!(err, MatrixError::EmptyAxis { ref axis, .. } if axis == "os"));

        let mut all_excluded = MatrixConfig::new().axis("os", ["linux"]);
        all_excluded
            .exclude
            .push(assignment(&[("os", json!("linux"))]));
        let err = expander.expand(&matrix_job(all_excluded)).unwrap_err();
        assert!(matches!(err, MatrixError::NoInstances { .. }));

        let err = expander
            .expand(&matrix_job(
                MatrixConfig::new().axis("os", ["linux"]).max_parallel(0),
            ))
            .unwrap_err();
        assert!(matches!(err, MatrixError::ZeroMaxParallel { .. }));
    }
}
