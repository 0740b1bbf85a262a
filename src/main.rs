//! SegForge command-line entrypoint
//!
//! Wires the environment config and CLI flags to the file-backed
//! segmentation service and prints each command's results.

use anyhow::{bail, Result};
use clap::Parser;
use segforge::cli::{self, Args, Command};
use segforge::{load_dataset, CancelToken, Column, Config, Customer, CustomerFilter, FileService};
use std::path::Path;
use std::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    let default_filter = if args.verbose { "segforge=debug" } else { "segforge=info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = args.resolve_config(Config::from_env());
    if args.verbose {
        println!("SegForge - Customer Segmentation");
        println!("================================\n");
        println!("Data directory: {}", config.data_dir.display());
        println!("Model directory: {}\n", config.model_dir.display());
    }

    let service = FileService::open(&config)?;
    let start_time = Instant::now();

    match &args.command {
        Command::Ingest { file } => run_ingest(&service, file)?,
        Command::Cluster { clusters, max_iters } => run_cluster(
            &service,
            clusters.unwrap_or(config.clusters),
            max_iters.unwrap_or(config.max_iterations),
            args.verbose,
        )?,
        Command::Train { name, features } => {
            let options = cli::train_options(name.as_deref(), features.as_deref())?;
            run_train(&service, &options)?
        }
        Command::Predict { values } => run_predict(&service, values)?,
        Command::Segments => print_segments(&service)?,
        Command::Insights => print_insights(&service)?,
        Command::Models => print_models(&service)?,
        Command::Dashboard => print_dashboard(&service)?,
        Command::Customers { .. } => {
            let filter = args.command.customer_filter().unwrap_or_default();
            print_customers(&service, &filter)?
        }
        Command::Customer { id } => match service.customer(id)? {
            Some(customer) => print_customer(&customer),
            None => bail!("Customer not found: {}", id),
        },
    }

    if args.verbose {
        println!("\nTotal processing time: {:.2}s", start_time.elapsed().as_secs_f64());
    }
    Ok(())
}

fn run_ingest(service: &FileService, file: &Path) -> Result<()> {
    println!("=== Ingest ===");
    let dataset = load_dataset(file)?;
    let report = service.ingest(&dataset)?;

    println!("✓ Data loaded: {} customers", report.records_processed);
    if report.skipped_rows > 0 {
        println!("  Skipped rows with missing required values: {}", report.skipped_rows);
    }
    println!("\nColumn mapping:");
    for (uploaded, column) in report.mapping.iter() {
        println!("  {} -> {}", uploaded, column);
    }
    if !report.validation.missing_optional.is_empty() {
        let missing: Vec<&str> = report.validation.missing_optional.iter().map(|c| c.name()).collect();
        println!("  Missing optional columns (defaulted): {}", missing.join(", "));
    }
    Ok(())
}

fn run_cluster(service: &FileService, k: usize, max_iterations: usize, verbose: bool) -> Result<()> {
    println!("=== Clustering ===\n");
    if verbose {
        println!("  Number of clusters: {}", k);
        println!("  Max iterations: {}", max_iterations);
    }

    let outcome = service.cluster(k, max_iterations)?;
    let total = outcome.customers.len();

    println!("✓ Model fitted successfully");
    println!("\n=== Cluster Statistics ===");
    for (i, &size) in outcome.cluster_sizes.iter().enumerate() {
        let percentage = (size as f64 / total as f64) * 100.0;
        println!("Cluster {}: {} customers ({:.1}%)", i, size, percentage);
    }
    println!("\nSilhouette score (sample): {:.3}", outcome.silhouette);
    println!("Within-cluster sum of squares: {:.2}", outcome.inertia);
    println!("Processing time: {}ms", outcome.processing_time_ms);
    Ok(())
}

fn run_train(service: &FileService, options: &segforge::TrainOptions) -> Result<()> {
    println!("=== Training ===");
    let model = service.train_model(options, &CancelToken::new())?;

    println!("✓ Model trained and activated");
    println!("  Model: {} ({})", model.model_name, model.model_id);
    println!("  Segments: {}", model.num_segments());
    println!("  Training records: {}", model.training_size);
    println!("  Training accuracy: {:.1}%", model.training_accuracy * 100.0);
    println!("  Training time: {}ms", model.training_time_ms);
    Ok(())
}

fn run_predict(service: &FileService, values: &str) -> Result<()> {
    println!("=== Prediction Mode ===");
    let input = cli::parse_customer_values(values)?;
    let prediction = service.predict(&input)?;

    println!("\n✓ Predicted Segment: {} ({})", prediction.segment, prediction.segment_name);
    println!("  {}", prediction.segment_description);
    println!("  Confidence: {:.3}", prediction.confidence);
    println!("\nSegment probabilities:");
    for (segment, probability) in &prediction.probabilities {
        println!("  Segment {}: {:.1}%", segment, probability * 100.0);
    }
    println!("\nFeature importance:");
    for (feature, importance) in &prediction.feature_importance {
        println!("  {}: {:.3}", feature, importance);
    }
    println!("\nRecommendation: {}", prediction.recommendation);
    Ok(())
}

fn print_segments(service: &FileService) -> Result<()> {
    let segments = service.segments()?;
    if segments.is_empty() {
        println!("No segments yet. Run `cluster` first.");
        return Ok(());
    }
    for segment in segments {
        println!("{} ({} customers)", segment.name, segment.customer_count);
        println!("  {}", segment.description);
        println!(
            "  Income: {:.0}  Spending: {:.0}  Wines: {:.0}  Web purchases: {:.1}  Response: {:.1}%",
            segment.avg_income,
            segment.avg_spending,
            segment.avg_wines,
            segment.avg_web_purchases,
            segment.response_rate
        );
    }
    Ok(())
}

fn print_insights(service: &FileService) -> Result<()> {
    for insight in service.insights()? {
        println!("{}: {}", insight.segment_name, insight.strategy);
        println!("  {}", insight.characteristics);
        for recommendation in &insight.recommendations {
            println!("  - {}", recommendation);
        }
    }
    Ok(())
}

fn print_models(service: &FileService) -> Result<()> {
    let models = service.models()?;
    if models.is_empty() {
        println!("No trained models. Run `train` first.");
        return Ok(());
    }
    for model in models {
        let marker = if model.is_active { "*" } else { " " };
        println!(
            "{} {} {}  segments={} records={} accuracy={:.1}% trained={}",
            marker,
            model.model_id,
            model.model_name,
            model.num_segments,
            model.training_size,
            model.training_accuracy * 100.0,
            model.trained_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

fn print_dashboard(service: &FileService) -> Result<()> {
    let dashboard = service.dashboard()?;
    println!("=== Dashboard ===");
    println!("Total customers: {}", dashboard.total_customers);
    println!("Average spending: {:.2}", dashboard.avg_spending);
    println!("Response rate: {:.1}%", dashboard.response_rate);

    println!("\nSegment distribution:");
    for (segment, count) in &dashboard.segment_distribution {
        println!("  Segment {}: {}", segment, count);
    }
    for (title, table) in [
        ("Income by segment", &dashboard.income_by_segment),
        ("Education by segment", &dashboard.education_by_segment),
        ("Marital status by segment", &dashboard.marital_status_by_segment),
    ] {
        println!("\n{}:", title);
        for (category, counts) in table {
            let cells: Vec<String> = counts.iter().map(|(s, n)| format!("segment {}={}", s, n)).collect();
            println!("  {}: {}", category, cells.join(", "));
        }
    }

    println!("\nTop segments by spending:");
    for segment in &dashboard.top_segments {
        println!("  {} ({:.0})", segment.name, segment.avg_spending);
    }
    Ok(())
}

fn print_customers(service: &FileService, filter: &CustomerFilter) -> Result<()> {
    let customers = service.customers_filtered(filter)?;
    println!("{} customers", customers.len());
    for customer in &customers {
        let segment = customer.segment.map_or("-".to_string(), |s| s.to_string());
        println!(
            "  {}  segment={}  income={:.0}  spending={:.0}  {}",
            customer.id,
            segment,
            customer.record.number(Column::Income),
            customer.record.total_spending(),
            customer.record.text(Column::MaritalStatus).unwrap_or_default()
        );
    }
    Ok(())
}

fn print_customer(customer: &Customer) {
    println!("Customer {}", customer.id);
    match customer.segment {
        Some(segment) => println!("  Segment: {}", segment),
        None => println!("  Segment: unassigned"),
    }
    for (column, value) in customer.record.iter() {
        println!("  {}: {}", column, value.as_text().unwrap_or_default());
    }
}
