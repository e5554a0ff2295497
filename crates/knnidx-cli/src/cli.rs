//! CLI definition and command dispatch for knnidx.
//!
//! ## Configuration Precedence
//!
//! Index settings are resolved with the following precedence (highest to
//! lowest):
//! 1. CLI flags (e.g., `--metric`, `--ef`)
//! 2. Environment variables (`KNNIDX_CONFIG`, `KNNIDX_VERBOSE`)
//! 3. Config file (`~/.knnidx/config.yaml` or path from `--config`)
//! 4. Built-in defaults

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::json;

use knnidx_core::{
    inspect_index_file, Index, IndexConfig, IndexFileInfo, KnnService, LabelRef, MetricKind,
    PartitionId,
};

// ============================================================================
// CLI Definition
// ============================================================================

/// knnidx – approximate nearest-neighbor index files
#[derive(Parser, Debug)]
#[command(name = "knnidx")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, env = "KNNIDX_VERBOSE")]
    pub verbose: bool,

    /// Path to configuration file (default: ~/.knnidx/config.yaml)
    #[arg(long, global = true, env = "KNNIDX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build an index file from JSON Lines records
    #[command(after_help = r#"EXAMPLES:
    knnidx build vectors.jsonl -o vectors.knn
    knnidx build vectors.jsonl -o vectors.knn --metric angular --ef-construction 200

Each input line is one record: {"label": 7, "vector": [0.1, 0.2, 0.3]}"#)]
    Build {
        /// JSON Lines file with `label` and `vector` fields
        input: PathBuf,

        /// Index file to write
        #[arg(short, long)]
        output: PathBuf,

        /// Distance metric: euclidean, angular or innerproduct
        #[arg(long)]
        metric: Option<MetricKind>,

        /// Vector dimension (default: length of the first record)
        #[arg(long)]
        dimension: Option<usize>,

        /// Normalize vectors (implied by angular)
        #[arg(long)]
        normalize: bool,

        /// Maximum number of elements (default: grows to fit the input)
        #[arg(long)]
        capacity: Option<usize>,

        /// Graph fan-out
        #[arg(long)]
        m: Option<usize>,

        /// Search breadth while inserting
        #[arg(long)]
        ef_construction: Option<usize>,

        /// Random seed
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Find the nearest neighbors of a vector
    #[command(after_help = r#"EXAMPLES:
    knnidx query vectors.knn --vector 1,0,0
    knnidx query vectors.knn --vector 0.5,-0.5,0 -k 5 --ef 64 --json"#)]
    Query {
        /// Index file
        index: PathBuf,

        /// Query vector, comma separated
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true, required = true)]
        vector: Vec<f32>,

        /// Number of neighbors
        #[arg(short, default_value = "10")]
        k: usize,

        /// Search breadth (default: config efSearch, then the value saved in the file)
        #[arg(long)]
        ef: Option<usize>,
    },

    /// Print the stored vector for a label
    Get {
        /// Index file
        index: PathBuf,

        /// Label to look up
        label: u64,
    },

    /// List every label in an index
    Labels {
        /// Index file
        index: PathBuf,
    },

    /// Distance between two stored labels
    Distance {
        /// Index file
        index: PathBuf,

        /// First label
        first: u64,

        /// Second label
        second: u64,
    },

    /// Show the header of an index file
    Info {
        /// Index file
        index: PathBuf,
    },

    /// List the partitions of a service directory
    #[command(after_help = r#"A service directory holds one index file per part:
    <partition>.<chunk>.knn          searchable part
    <partition>.<chunk>.extra.knn    extra items, fetchable but never searched"#)]
    Partitions {
        /// Service directory
        dir: PathBuf,
    },

    /// Items of a partition closest to a query composed from stored labels
    #[command(after_help = r#"EXAMPLES:
    knnidx closest parts/ --partition 3 --from 3:17,3:42
    knnidx closest parts/ --partition 3 --from 1:7 -k 5 --model average --json"#)]
    Closest {
        /// Service directory
        dir: PathBuf,

        /// Partition to search
        #[arg(long)]
        partition: PartitionId,

        /// Stored labels to compose the query from, as partition:label
        #[arg(long, value_delimiter = ',', required = true)]
        from: Vec<LabelRef>,

        /// Number of items
        #[arg(short, default_value = "10")]
        k: usize,

        /// Query model (default: average)
        #[arg(long)]
        model: Option<String>,

        /// Search breadth (default: config efSearch, then the value saved in each part)
        #[arg(long)]
        ef: Option<usize>,
    },
}

// ============================================================================
// Entry point
// ============================================================================

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    // Always show warnings; debug only with --verbose
    let log_level = if cli.verbose { "debug" } else { "warn" };
    let filter = format!("knnidx_core={},knnidx_cli={}", log_level, log_level);

    tracing_subscriber::fmt()
        .with_env_filter(&filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match &cli.command {
        Command::Build {
            input,
            output,
            metric,
            dimension,
            normalize,
            capacity,
            m,
            ef_construction,
            seed,
        } => {
            let overrides = BuildOverrides {
                metric: *metric,
                dimension: *dimension,
                normalize: *normalize,
                capacity: *capacity,
                m: *m,
                ef_construction: *ef_construction,
                seed: *seed,
            };
            cmd_build(&cli, input, output, &overrides)
        }
        Command::Query { index, vector, k, ef } => cmd_query(&cli, index, vector, *k, *ef),
        Command::Get { index, label } => cmd_get(&cli, index, *label),
        Command::Labels { index } => cmd_labels(&cli, index),
        Command::Distance {
            index,
            first,
            second,
        } => cmd_distance(&cli, index, *first, *second),
        Command::Info { index } => cmd_info(&cli, index),
        Command::Partitions { dir } => cmd_partitions(&cli, dir),
        Command::Closest {
            dir,
            partition,
            from,
            k,
            model,
            ef,
        } => cmd_closest(&cli, dir, *partition, from, *k, model.as_deref(), *ef),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Build flags that override the config file.
#[derive(Debug, Default)]
struct BuildOverrides {
    metric: Option<MetricKind>,
    dimension: Option<usize>,
    normalize: bool,
    capacity: Option<usize>,
    m: Option<usize>,
    ef_construction: Option<usize>,
    seed: Option<u64>,
}

/// Config from `--config`/`KNNIDX_CONFIG`, else `~/.knnidx/config.yaml`.
fn load_config(cli: &Cli) -> Result<Option<IndexConfig>> {
    match &cli.config {
        Some(path) => IndexConfig::from_path(path)
            .map(Some)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => IndexConfig::load_default().context("Failed to load ~/.knnidx/config.yaml"),
    }
}

/// Apply flags over the file config, falling back to `inferred_dimension`.
fn resolve_build_config(
    file_config: Option<IndexConfig>,
    overrides: &BuildOverrides,
    inferred_dimension: usize,
    record_count: usize,
) -> IndexConfig {
    let dimension = overrides
        .dimension
        .or(file_config.as_ref().map(|c| c.dimension))
        .unwrap_or(inferred_dimension);

    let mut config = match file_config {
        Some(config) => IndexConfig { dimension, ..config },
        None => IndexConfig::new(dimension),
    };

    if let Some(metric) = overrides.metric {
        config.metric = metric;
    }
    if overrides.normalize {
        config.normalize = true;
    }
    if let Some(m) = overrides.m {
        config.m = m;
    }
    if let Some(ef_construction) = overrides.ef_construction {
        config.ef_construction = ef_construction;
    }
    if let Some(seed) = overrides.seed {
        config.seed = seed;
    }
    match overrides.capacity {
        Some(capacity) => config.capacity = capacity,
        None if config.capacity < record_count => {
            tracing::debug!(
                "Raising capacity from {} to {} to fit input",
                config.capacity,
                record_count
            );
            config.capacity = record_count;
        }
        None => {}
    }

    config
}

// ============================================================================
// Input
// ============================================================================

/// One line of build input.
#[derive(Debug, Deserialize)]
struct Record {
    label: u64,
    vector: Vec<f32>,
}

fn read_records(path: &Path) -> Result<Vec<Record>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open input {}", path.display()))?;

    let mut records = Vec::new();
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line =
            line.with_context(|| format!("Failed to read {}:{}", path.display(), number + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: Record = serde_json::from_str(&line)
            .with_context(|| format!("Invalid record at {}:{}", path.display(), number + 1))?;
        records.push(record);
    }

    tracing::debug!("Read {} records from {}", records.len(), path.display());
    Ok(records)
}

fn open_index(path: &Path) -> Result<Index> {
    Index::open(path).with_context(|| format!("Failed to open index {}", path.display()))
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ============================================================================
// Commands
// ============================================================================

fn cmd_build(cli: &Cli, input: &Path, output: &Path, overrides: &BuildOverrides) -> Result<()> {
    let records = read_records(input)?;
    let Some(first) = records.first() else {
        bail!("No records in {}", input.display());
    };

    let config = resolve_build_config(
        load_config(cli)?,
        overrides,
        first.vector.len(),
        records.len(),
    );

    let mut index: Index = Index::from_config(&config).context("Invalid index settings")?;
    for record in &records {
        index
            .insert(&record.vector, record.label)
            .with_context(|| format!("Failed to insert label {}", record.label))?;
    }
    index
        .save_to_path(output)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    let count = index.element_count()?;
    if cli.json {
        print_json(&json!({
            "output": output,
            "metric": config.metric,
            "dimension": config.dimension,
            "elements": count,
        }))
    } else {
        println!(
            "Built {} with {} vectors (metric={}, dimension={})",
            output.display(),
            count,
            config.metric,
            config.dimension
        );
        Ok(())
    }
}

fn cmd_query(cli: &Cli, path: &Path, vector: &[f32], k: usize, ef: Option<usize>) -> Result<()> {
    let mut index = open_index(path)?;

    let breadth = match ef {
        Some(ef) => Some(ef),
        None => load_config(cli)?.map(|c| c.ef_search),
    };
    if let Some(breadth) = breadth {
        index.set_search_breadth(breadth)?;
    }

    let hits = index.query(vector, k).context("Query failed")?;

    if cli.json {
        return print_json(&hits);
    }
    for hit in &hits {
        println!("{}\t{}", hit.label, hit.distance);
    }
    Ok(())
}

fn cmd_get(cli: &Cli, path: &Path, label: u64) -> Result<()> {
    let index = open_index(path)?;
    let Some(vector) = index.catalog()?.lookup_vector(label) else {
        bail!("Label {} not found in {}", label, path.display());
    };

    if cli.json {
        return print_json(&json!({ "label": label, "vector": vector }));
    }
    let values: Vec<String> = vector.iter().map(f32::to_string).collect();
    println!("{}", values.join(","));
    Ok(())
}

fn cmd_labels(cli: &Cli, path: &Path) -> Result<()> {
    let index = open_index(path)?;
    let mut labels = index.catalog()?.list_labels();
    labels.sort_unstable();

    if cli.json {
        return print_json(&labels);
    }
    for label in labels {
        println!("{}", label);
    }
    Ok(())
}

fn cmd_distance(cli: &Cli, path: &Path, first: u64, second: u64) -> Result<()> {
    let index = open_index(path)?;
    let distance = index.catalog()?.distance_between(first, second)?;

    if cli.json {
        return print_json(&json!({ "first": first, "second": second, "distance": distance }));
    }
    println!("{}", distance);
    Ok(())
}

fn cmd_info(cli: &Cli, path: &Path) -> Result<()> {
    let info: IndexFileInfo = inspect_index_file(path)
        .with_context(|| format!("Failed to read index {}", path.display()))?;

    if cli.json {
        return print_json(&info);
    }
    println!("File:            {}", path.display());
    println!("Format version:  {}", info.format_version);
    println!("Metric:          {}", info.metric);
    println!("Dimension:       {}", info.dimension);
    println!("Normalize:       {}", info.normalize);
    println!("Elements:        {}", info.element_count);
    println!("Capacity:        {}", info.capacity);
    println!("M:               {}", info.m);
    println!("efConstruction:  {}", info.ef_construction);
    println!("efSearch:        {}", info.ef_search);
    println!("Seed:            {}", info.seed);
    println!("Saved at:        {}", info.saved_at);
    Ok(())
}

fn open_service(dir: &Path) -> Result<KnnService> {
    KnnService::load_dir(dir)
        .with_context(|| format!("Failed to load service directory {}", dir.display()))
}

fn cmd_partitions(cli: &Cli, dir: &Path) -> Result<()> {
    let service = open_service(dir)?;

    let mut rows = Vec::new();
    for id in service.partition_ids() {
        let partition = service.partition(id)?;
        rows.push(json!({
            "partition": id,
            "searchableParts": partition.searchable_parts(),
            "extraParts": partition.extra_parts(),
            "elements": partition.element_count()?,
        }));
    }

    if cli.json {
        return print_json(&rows);
    }
    for row in &rows {
        println!(
            "{}\t{} searchable\t{} extra\t{} elements",
            row["partition"], row["searchableParts"], row["extraParts"], row["elements"]
        );
    }
    Ok(())
}

fn cmd_closest(
    cli: &Cli,
    dir: &Path,
    partition: PartitionId,
    from: &[LabelRef],
    k: usize,
    model: Option<&str>,
    ef: Option<usize>,
) -> Result<()> {
    let mut service = open_service(dir)?;

    let breadth = match ef {
        Some(ef) => Some(ef),
        None => load_config(cli)?.map(|c| c.ef_search),
    };
    if let Some(breadth) = breadth {
        service.set_search_breadth(breadth)?;
    }

    let hits = service
        .get_closest_items(from, partition, k, model)
        .context("Query failed")?;

    if cli.json {
        return print_json(&hits);
    }
    for hit in &hits {
        println!("{}\t{}", hit.label, hit.distance);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_query_vector() {
        let cli = Cli::try_parse_from([
            "knnidx", "query", "idx.knn", "--vector", "-0.5,1,2", "-k", "3",
        ])
        .unwrap();
        match cli.command {
            Command::Query { vector, k, .. } => {
                assert_eq!(vector, vec![-0.5, 1.0, 2.0]);
                assert_eq!(k, 3);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_parses_metric() {
        let cli = Cli::try_parse_from([
            "knnidx", "build", "in.jsonl", "-o", "out.knn", "--metric", "cosine",
        ])
        .unwrap();
        match cli.command {
            Command::Build { metric, .. } => assert_eq!(metric, Some(MetricKind::Angular)),
            other => panic!("unexpected command: {:?}", other),
        }

        assert!(Cli::try_parse_from([
            "knnidx", "build", "in.jsonl", "-o", "out.knn", "--metric", "manhattan",
        ])
        .is_err());
    }

    #[test]
    fn test_cli_parses_closest() {
        let cli = Cli::try_parse_from([
            "knnidx", "closest", "parts", "--partition", "3", "--from", "3:17,1:42", "-k", "4",
        ])
        .unwrap();
        match cli.command {
            Command::Closest {
                partition, from, k, model, ..
            } => {
                assert_eq!(partition, 3);
                assert_eq!(from, vec![LabelRef::new(3, 17), LabelRef::new(1, 42)]);
                assert_eq!(k, 4);
                assert!(model.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }

        assert!(Cli::try_parse_from([
            "knnidx", "closest", "parts", "--partition", "3", "--from", "17",
        ])
        .is_err());
    }

    #[test]
    fn test_resolve_without_file_config() {
        let config = resolve_build_config(None, &BuildOverrides::default(), 4, 20_000);
        assert_eq!(config.dimension, 4);
        assert_eq!(config.metric, MetricKind::Euclidean);
        assert_eq!(config.capacity, 20_000);
    }

    #[test]
    fn test_resolve_flags_win_over_file() {
        let file = IndexConfig::new(8)
            .with_metric(MetricKind::InnerProduct)
            .with_m(12)
            .with_capacity(500);
        let overrides = BuildOverrides {
            metric: Some(MetricKind::Angular),
            capacity: Some(50),
            ..Default::default()
        };

        let config = resolve_build_config(Some(file), &overrides, 3, 10);
        assert_eq!(config.metric, MetricKind::Angular);
        assert_eq!(config.dimension, 8);
        assert_eq!(config.m, 12);
        assert_eq!(config.capacity, 50);
    }
}
