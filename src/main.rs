use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::json;
use std::time::Instant;

use locpack::{
    ClusterLabel, ClusterStore, Container, FieldArray, FieldBundle, PackReader, PackWriter,
    RecordStore,
};

#[derive(Parser)]
#[command(name = "locpack", version, about = "Cluster storage for localization datasets")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import a JSON dataset into a container file
    Import {
        /// JSON dataset (pixel_size + frames and/or tracks)
        input: String,
        /// Container file to create
        output: String,
    },
    /// Partition records into cluster groups from a label file
    Partition {
        /// Container file
        file: String,
        /// JSON array of per-record integer cluster ids
        labels: String,
        /// Short description of how the clustering was done
        #[arg(long)]
        info: Option<String>,
        /// Include z positions when extracting cross-references
        #[arg(long)]
        include_z: bool,
    },
    /// Print a summary of a container file
    Info {
        /// Container file
        file: String,
    },
    /// Export cluster data as JSON
    ExportClusters {
        /// Container file
        file: String,
        /// Output JSON file
        output: String,
        /// Only export clusters larger than this
        #[arg(long, default_value_t = 0)]
        min_size: u64,
        /// Also export the reserved unclustered group
        #[arg(long)]
        with_unclustered: bool,
    },
    /// Bundle a container into a .locpack archive
    Pack {
        /// Container file
        file: String,
        /// Archive to create
        output: String,
    },
    /// Print the manifest of a .locpack archive
    Inspect {
        /// Archive file
        file: String,
    },
}

#[derive(Deserialize)]
struct DatasetFile {
    pixel_size: f64,
    #[serde(default)]
    frames: Vec<RecordGroup>,
    #[serde(default)]
    tracks: Vec<RecordGroup>,
}

#[derive(Deserialize)]
struct RecordGroup {
    #[serde(default)]
    frame: u32,
    x: Vec<f64>,
    y: Vec<f64>,
    #[serde(default)]
    z: Option<Vec<f64>>,
    #[serde(default)]
    category: Option<Vec<i64>>,
}

impl RecordGroup {
    fn to_bundle(&self) -> FieldBundle {
        let n = self.x.len();
        let mut bundle = FieldBundle::new();
        bundle.insert("x", FieldArray::F64(self.x.clone()));
        bundle.insert("y", FieldArray::F64(self.y.clone()));
        bundle.insert(
            "z",
            FieldArray::F64(self.z.clone().unwrap_or_else(|| vec![0.0; n])),
        );
        bundle.insert(
            "category",
            FieldArray::I64(self.category.clone().unwrap_or_else(|| vec![0; n])),
        );
        bundle
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Command::Import { input, output } => import(&input, &output),
        Command::Partition {
            file,
            labels,
            info,
            include_z,
        } => partition(&file, &labels, info.as_deref(), include_z),
        Command::Info { file } => info(&file),
        Command::ExportClusters {
            file,
            output,
            min_size,
            with_unclustered,
        } => export_clusters(&file, &output, min_size, with_unclustered),
        Command::Pack { file, output } => pack(&file, &output),
        Command::Inspect { file } => inspect(&file),
    }
}

fn open_store(file: &str) -> Result<ClusterStore> {
    let container = Container::open(file).context("Failed to open container")?;
    let records = RecordStore::open(container)
        .context(format!("{} is not a locpack container", file))?;
    Ok(ClusterStore::new(records))
}

fn import(input: &str, output: &str) -> Result<()> {
    let start = Instant::now();
    let raw = std::fs::read_to_string(input)
        .context(format!("Failed to read dataset: {}", input))?;
    let dataset: DatasetFile =
        serde_json::from_str(&raw).context("Failed to parse dataset JSON")?;
    if !dataset.frames.is_empty() && !dataset.tracks.is_empty() {
        bail!("a dataset holds either frames or tracks, not both");
    }

    let container = Container::open(output).context("Failed to create container")?;
    let store = RecordStore::create(container, dataset.pixel_size)?;
    for group in &dataset.frames {
        store.add_localizations(group.frame, &group.to_bundle())?;
    }
    for group in &dataset.tracks {
        store.add_track_group(&group.to_bundle())?;
    }

    println!(
        "✓ Imported {} localizations, {} tracks into {} [{:.2}s]",
        store.n_localizations()?,
        store.n_tracks()?,
        output,
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

fn partition(file: &str, labels_path: &str, info: Option<&str>, include_z: bool) -> Result<()> {
    let store = open_store(file)?;

    let step1 = Instant::now();
    println!("Step 1: Reading cluster assignment...");
    let raw = std::fs::read_to_string(labels_path)
        .context(format!("Failed to read labels: {}", labels_path))?;
    let ids: Vec<i64> = serde_json::from_str(&raw).context("Failed to parse label JSON")?;
    let labels = ClusterLabel::from_raw(&ids)?;
    println!(
        "✓ {} records [{:.2}s]\n",
        labels.len(),
        step1.elapsed().as_secs_f64()
    );

    let step2 = Instant::now();
    println!("Step 2: Extracting cross-references...");
    let flat = store.data_for_clustering(include_z)?;
    if flat.record_count() != labels.len() {
        bail!(
            "label file has {} entries but the store holds {} records",
            labels.len(),
            flat.record_count()
        );
    }
    println!("✓ Extracted [{:.2}s]\n", step2.elapsed().as_secs_f64());

    let step3 = Instant::now();
    println!("Step 3: Partitioning...");
    store.add_clusters(&labels, &flat.crossrefs)?;
    if let Some(text) = info {
        store.set_clustering_info(text)?;
    }
    println!(
        "✓ {} clusters written [{:.2}s]",
        store.cluster_count()?,
        step3.elapsed().as_secs_f64()
    );
    Ok(())
}

fn info(file: &str) -> Result<()> {
    let store = open_store(file)?;
    let records = store.records();

    println!("Container: {}", file);
    println!("  Pixel size:     {} nm", records.pixel_size()?);
    println!("  Localizations:  {}", records.n_localizations()?);
    println!("  Frames:         {}", records.n_frames()?);
    println!("  Tracks:         {}", records.n_tracks()?);
    if store.has_clusters()? {
        println!("  Clusters:       {}", store.cluster_count()?);
        if let Some(text) = store.clustering_info()? {
            println!("  Clustering:     {}", text);
        }
        for index in 0..=store.cluster_count()? as usize {
            if let Some(group) = store.cluster_group(index)? {
                let tag = if index == 0 { " (unclustered)" } else { "" };
                println!("    cl_{}: {} records{}", index, group.size(), tag);
            }
        }
    } else {
        println!("  Clusters:       none");
    }
    Ok(())
}

fn export_clusters(
    file: &str,
    output: &str,
    min_size: u64,
    with_unclustered: bool,
) -> Result<()> {
    let store = open_store(file)?;

    let mut exported = Vec::new();
    for item in store.clusters_iter(None, min_size, !with_unclustered)? {
        let (index, data) = item?;
        let fields: serde_json::Map<String, serde_json::Value> = data
            .iter()
            .map(|(name, values)| {
                let value = match values {
                    FieldArray::F64(v) => json!(v),
                    FieldArray::I64(v) => json!(v),
                };
                (name.to_string(), value)
            })
            .collect();
        exported.push(json!({ "index": index, "fields": fields }));
    }

    std::fs::write(output, serde_json::to_string_pretty(&exported)?)
        .context(format!("Failed to write {}", output))?;
    println!("✓ Exported {} clusters to {}", exported.len(), output);
    Ok(())
}

fn pack(file: &str, output: &str) -> Result<()> {
    let store = open_store(file)?;
    let manifest = PackWriter::new(&store).write_to_file(output)?;
    println!(
        "✓ Packed {} ({} localizations, {} clusters)",
        output, manifest.stats.n_localizations, manifest.stats.cluster_count
    );
    Ok(())
}

fn inspect(file: &str) -> Result<()> {
    let reader = PackReader::open(file)?;
    println!("{}", serde_json::to_string_pretty(&reader.manifest)?);
    Ok(())
}
