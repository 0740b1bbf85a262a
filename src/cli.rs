//! Command-line interface definitions and argument parsing

use crate::config::Config;
use crate::error::SegmentationError;
use crate::features::Feature;
use crate::model::TrainOptions;
use crate::schema::{CanonicalRecord, Column, CustomerFilter, FieldValue, SegmentId};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Customer segmentation CLI: K-Means segments plus a nearest-centroid predictor
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Directory holding customers, segments, predictions, and models
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Load a CSV or JSON file of customers
    Ingest {
        /// Path to the input file
        file: PathBuf,
    },

    /// Segment all stored customers with K-Means
    Cluster {
        /// Number of clusters
        #[arg(short = 'k', long)]
        clusters: Option<usize>,

        /// Maximum iterations for K-Means algorithm
        #[arg(long)]
        max_iters: Option<usize>,
    },

    /// Train a prediction model on the current segments and activate it
    Train {
        /// Model name
        #[arg(long)]
        name: Option<String>,

        /// Comma-separated feature list, e.g. "Income,MntWines"
        #[arg(long)]
        features: Option<String>,
    },

    /// Predict the segment of one customer
    /// Example: predict "Income=58000,MntWines=635,NumWebPurchases=8"
    Predict {
        values: String,
    },

    /// List segments from the last clustering run
    Segments,

    /// Marketing strategy per segment
    Insights,

    /// List trained models
    Models,

    /// Totals, response rate, and per-segment breakdowns
    Dashboard,

    /// List stored customers matching every given filter
    Customers {
        #[arg(long)]
        segment: Option<SegmentId>,

        #[arg(long)]
        marital_status: Option<String>,

        #[arg(long)]
        education: Option<String>,

        #[arg(long)]
        min_income: Option<f64>,

        #[arg(long)]
        max_income: Option<f64>,
    },

    /// Show one customer by id
    Customer {
        id: String,
    },
}

impl Command {
    /// Filter built from the `customers` flags
    pub fn customer_filter(&self) -> Option<CustomerFilter> {
        match self {
            Command::Customers {
                segment,
                marital_status,
                education,
                min_income,
                max_income,
            } => Some(CustomerFilter {
                segment: *segment,
                marital_status: marital_status.clone(),
                education: education.clone(),
                min_income: *min_income,
                max_income: *max_income,
            }),
            _ => None,
        }
    }
}

impl Args {
    /// Apply command-line overrides on top of the environment config
    pub fn resolve_config(&self, mut config: Config) -> Config {
        if let Some(ref data_dir) = self.data_dir {
            // The model directory follows the data directory unless set explicitly
            if config.model_dir == config.data_dir.join("models") {
                config.model_dir = data_dir.join("models");
            }
            config.data_dir = data_dir.clone();
        }
        config
    }
}

/// Build training options from the `train` flags
pub fn train_options(name: Option<&str>, features: Option<&str>) -> crate::Result<TrainOptions> {
    let mut options = TrainOptions {
        model_name: name.map(str::to_string),
        ..TrainOptions::default()
    };
    if let Some(list) = features {
        options.features = Feature::parse_list(list)?;
    }
    Ok(options)
}

/// Parse customer values from the predict string
/// Expected format: "Column=value,Column=value"
pub fn parse_customer_values(input: &str) -> crate::Result<CanonicalRecord> {
    let mut record = CanonicalRecord::new();

    for part in input.split(',').filter(|p| !p.trim().is_empty()) {
        let (key, value) = part.split_once('=').ok_or_else(|| {
            SegmentationError::InvalidParameter(format!(
                "Predict values must be in format 'Column=value', got: {}",
                part.trim()
            ))
        })?;

        let column = Column::resolve(key)
            .ok_or_else(|| SegmentationError::InvalidParameter(format!("Unknown column: {}", key.trim())))?;

        let value = value.trim();
        let value = match value.parse::<f64>() {
            Ok(number) if !number.is_finite() => {
                return Err(SegmentationError::InvalidParameter(format!(
                    "Value for {} must be a finite number, got: {}",
                    column, value
                )))
            }
            Ok(number) => FieldValue::Number(number),
            Err(_) if value.is_empty() => FieldValue::Null,
            Err(_) => FieldValue::Text(value.to_string()),
        };
        record.insert(column, value);
    }

    if record.is_empty() {
        return Err(SegmentationError::InvalidParameter(
            "Predict values must not be empty".to_string(),
        ));
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_customer_values() {
        let record = parse_customer_values("Income=58000, wines=635 ,Education=PhD").unwrap();
        assert_eq!(record.number(Column::Income), 58_000.0);
        assert_eq!(record.number(Column::MntWines), 635.0);
        assert_eq!(record.text(Column::Education), Some("PhD".to_string()));

        assert!(parse_customer_values("").is_err());
        assert!(parse_customer_values("Income").is_err());
        assert!(parse_customer_values("ShoeSize=42").is_err());
    }

    #[test]
    fn test_parse_customer_values_rejects_non_finite() {
        for input in ["Income=NaN", "Income=inf", "MntWines=-infinity"] {
            let err = parse_customer_values(input).unwrap_err();
            assert_eq!(err.kind(), "invalid_parameter", "{input}");
        }
    }

    #[test]
    fn test_parse_subcommands() {
        let args = Args::try_parse_from(["segforge", "--data-dir", "/tmp/d", "cluster", "-k", "3"]).unwrap();
        assert_eq!(
            args.command,
            Command::Cluster {
                clusters: Some(3),
                max_iters: None
            }
        );

        let args = Args::try_parse_from(["segforge", "train", "--features", "Income,MntWines", "-v"]).unwrap();
        assert!(args.verbose);
        assert!(matches!(args.command, Command::Train { name: None, .. }));

        assert!(Args::try_parse_from(["segforge"]).is_err());
    }

    #[test]
    fn test_parse_query_subcommands() {
        let args = Args::try_parse_from(["segforge", "dashboard"]).unwrap();
        assert_eq!(args.command, Command::Dashboard);
        assert_eq!(args.command.customer_filter(), None);

        let args = Args::try_parse_from([
            "segforge",
            "customers",
            "--segment",
            "2",
            "--marital-status",
            "Single",
            "--min-income",
            "30000",
        ])
        .unwrap();
        assert_eq!(
            args.command.customer_filter(),
            Some(CustomerFilter {
                segment: Some(2),
                marital_status: Some("Single".to_string()),
                min_income: Some(30_000.0),
                ..CustomerFilter::default()
            })
        );

        let args = Args::try_parse_from(["segforge", "customers"]).unwrap();
        assert_eq!(args.command.customer_filter(), Some(CustomerFilter::default()));

        let args = Args::try_parse_from(["segforge", "customer", "C-17"]).unwrap();
        assert_eq!(args.command, Command::Customer { id: "C-17".to_string() });
        assert!(Args::try_parse_from(["segforge", "customer"]).is_err());
        assert!(Args::try_parse_from(["segforge", "customers", "--segment", "rich"]).is_err());
    }

    #[test]
    fn test_data_dir_override_moves_model_dir() {
        let args = Args::try_parse_from(["segforge", "--data-dir", "/tmp/d", "models"]).unwrap();
        let config = args.resolve_config(Config::default());
        assert_eq!(config.data_dir, PathBuf::from("/tmp/d"));
        assert_eq!(config.model_dir, PathBuf::from("/tmp/d/models"));

        let pinned = Config {
            model_dir: PathBuf::from("/srv/models"),
            ..Config::default()
        };
        assert_eq!(args.resolve_config(pinned).model_dir, PathBuf::from("/srv/models"));
    }

    #[test]
    fn test_train_options() {
        let options = train_options(Some("nightly"), Some("Income, TotalSpending")).unwrap();
        assert_eq!(options.model_name.as_deref(), Some("nightly"));
        assert_eq!(options.features, vec![Feature::Income, Feature::TotalSpending]);

        assert_eq!(train_options(None, None).unwrap(), TrainOptions::default());
        assert!(matches!(
            train_options(None, Some("Income,Height")),
            Err(SegmentationError::UnknownFeature(_))
        ));
    }
}
