//! Runtime configuration from environment variables and an optional `.env` file

use dotenv::dotenv;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::warn;

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub data_dir: PathBuf,  // data/
    pub model_dir: PathBuf, // <data_dir>/models
    pub clusters: usize,
    pub max_iterations: usize,
    pub tolerance: f64,
    pub seed: u64,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = PathBuf::from("data");
        Self {
            model_dir: data_dir.join("models"),
            data_dir,
            clusters: 4,
            max_iterations: 100,
            tolerance: 1e-4,
            seed: 42,
        }
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Invalid value {:?} for {}, using default", raw, key);
            default
        }),
        None => default,
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset or unparsable keys keep their defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let data_dir = lookup("SEGFORGE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let model_dir = lookup("SEGFORGE_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("models"));

        let mut clusters = parse_or(&lookup, "SEGFORGE_CLUSTERS", defaults.clusters);
        if clusters == 0 {
            warn!("SEGFORGE_CLUSTERS must be at least 1, using default");
            clusters = defaults.clusters;
        }
        let mut max_iterations = parse_or(&lookup, "SEGFORGE_MAX_ITERATIONS", defaults.max_iterations);
        if max_iterations == 0 {
            warn!("SEGFORGE_MAX_ITERATIONS must be at least 1, using default");
            max_iterations = defaults.max_iterations;
        }
        let mut tolerance = parse_or(&lookup, "SEGFORGE_TOLERANCE", defaults.tolerance);
        if !(tolerance.is_finite() && tolerance > 0.0) {
            warn!("SEGFORGE_TOLERANCE must be a positive number, using default");
            tolerance = defaults.tolerance;
        }

        Config {
            data_dir,
            model_dir,
            clusters,
            max_iterations,
            tolerance,
            seed: parse_or(&lookup, "SEGFORGE_SEED", defaults.seed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        assert_eq!(Config::from_lookup(lookup(&[])), Config::default());
        assert_eq!(Config::default().model_dir, PathBuf::from("data/models"));
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("SEGFORGE_DATA_DIR", "/tmp/seg"),
            ("SEGFORGE_CLUSTERS", "6"),
            ("SEGFORGE_MAX_ITERATIONS", " 250 "),
            ("SEGFORGE_TOLERANCE", "0.001"),
            ("SEGFORGE_SEED", "7"),
        ]));

        assert_eq!(config.data_dir, PathBuf::from("/tmp/seg"));
        assert_eq!(config.model_dir, PathBuf::from("/tmp/seg/models"));
        assert_eq!(config.clusters, 6);
        assert_eq!(config.max_iterations, 250);
        assert_eq!(config.tolerance, 0.001);
        assert_eq!(config.seed, 7);
    }

    #[test]
    fn test_bad_values_fall_back() {
        let config = Config::from_lookup(lookup(&[
            ("SEGFORGE_MODEL_DIR", "models"),
            ("SEGFORGE_CLUSTERS", "zero"),
            ("SEGFORGE_MAX_ITERATIONS", "0"),
            ("SEGFORGE_TOLERANCE", "-1"),
        ]));

        assert_eq!(config.model_dir, PathBuf::from("models"));
        assert_eq!(config.clusters, 4);
        assert_eq!(config.max_iterations, 100);
        assert_eq!(config.tolerance, 1e-4);
    }
}
