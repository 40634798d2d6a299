mod manifest;


pub use manifest::{Manifest, ManifestStats};

use anyhow::{bail, Context, Result};
use chrono::{Datelike, Timelike, Utc};
use log::info;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::clusters::ClusterStore;
use crate::container::Container;
use crate::records::RecordStore;

const PACK_VERSION: &str = "1.0.0";
const DB_ENTRY: &str = "locpack.sqlite";
const MANIFEST_ENTRY: &str = "manifest.json";

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Bundles a cluster store into a `.locpack` archive.
pub struct PackWriter<'a> {
    store: &'a ClusterStore,
}

impl<'a> PackWriter<'a> {
    pub fn new(store: &'a ClusterStore) -> Self {
        Self { store }
    }

    fn collect_stats(&self) -> Result<ManifestStats> {
        let records = self.store.records();
        Ok(ManifestStats {
            n_localizations: records.n_localizations()?,
            n_tracks: records.n_tracks()?,
            n_frames: records.n_frames()?,
            cluster_count: self.store.cluster_count()?,
            pixel_size: records.pixel_size()?,
        })
    }

    /// Write the archive; returns the manifest that went into it.
    pub fn write_to_file(&self, output_path: &str) -> Result<Manifest> {
        let stats = self.collect_stats().context("Failed to collect stats")?;

        // Persist the container, then pull the bytes back in to hash them.
        let temp_db_path = format!("{}.tmp.db", output_path);
        self.store
            .container()
            .save_to(&temp_db_path)
            .context("Failed to save container to temporary file")?;
        let mut db_contents = Vec::new();
        File::open(&temp_db_path)
            .context("Failed to open temporary container file")?
            .read_to_end(&mut db_contents)
            .context("Failed to read container contents")?;

        let manifest = Manifest {
            version: PACK_VERSION.to_string(),
            created_at: Utc::now().to_rfc3339(),
            dataset_id: uuid::Uuid::new_v4().to_string(),
            generator: format!("locpack v{}", env!("CARGO_PKG_VERSION")),
            sha256: sha256_hex(&db_contents),
            stats,
        };

        let file = File::create(output_path)
            .context(format!("Failed to create output file: {}", output_path))?;
        let mut zip = ZipWriter::new(file);
        let now = chrono::Local::now();
        let options: FileOptions<'_, ()> = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(0o644)
            .last_modified_time(
                zip::DateTime::from_date_and_time(
                    now.year() as u16,
                    now.month() as u8,
                    now.day() as u8,
                    now.hour() as u8,
                    now.minute() as u8,
                    now.second() as u8,
                )
                .unwrap_or_default(),
            );

        zip.start_file(DB_ENTRY, options)
            .context("Failed to start container entry")?;
        zip.write_all(&db_contents)
            .context("Failed to write container to archive")?;

        zip.start_file(MANIFEST_ENTRY, options)
            .context("Failed to start manifest entry")?;
        let manifest_json =
            serde_json::to_string_pretty(&manifest).context("Failed to serialize manifest")?;
        zip.write_all(manifest_json.as_bytes())
            .context("Failed to write manifest to archive")?;

        zip.start_file("readme.md", options)
            .context("Failed to start readme entry")?;
        zip.write_all(generate_readme(&manifest).as_bytes())
            .context("Failed to write readme to archive")?;

        zip.finish().context("Failed to finalize archive")?;

        std::fs::remove_file(&temp_db_path)
            .context("Failed to remove temporary container file")?;

        info!(
            "wrote {} ({} localizations, {} tracks, {} clusters)",
            output_path,
            manifest.stats.n_localizations,
            manifest.stats.n_tracks,
            manifest.stats.cluster_count
        );
        Ok(manifest)
    }
}

fn generate_readme(manifest: &Manifest) -> String {
    format!(
        r#"# Locpack

A localization dataset packaged by locpack.

- **Version**: {}
- **Created**: {}
- **Dataset**: {}
- **Localizations**: {}
- **Tracks**: {}
- **Clusters**: {}
- **Pixel size**: {} nm

## Structure

```
locpack.sqlite    - Records and cluster groups
manifest.json     - Top-level metadata
readme.md         - This file
```
"#,
        manifest.version,
        manifest.created_at,
        manifest.dataset_id,
        manifest.stats.n_localizations,
        manifest.stats.n_tracks,
        manifest.stats.cluster_count,
        manifest.stats.pixel_size,
    )
}

/// Opens a `.locpack`, verifies its content hash and exposes the store.
pub struct PackReader {
    pub manifest: Manifest,
    store: ClusterStore,
}

impl std::fmt::Debug for PackReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackReader")
            .field("manifest", &self.manifest)
            .finish_non_exhaustive()
    }
}

impl PackReader {
    pub fn open(pack_path: &str) -> Result<Self> {
        let file = File::open(pack_path)
            .context(format!("Failed to open locpack: {}", pack_path))?;
        let mut archive = ZipArchive::new(file).context("Failed to read archive")?;

        let mut manifest_contents = String::new();
        archive
            .by_name(MANIFEST_ENTRY)
            .context("manifest.json not found in locpack")?
            .read_to_string(&mut manifest_contents)
            .context("Failed to read manifest")?;
        let manifest: Manifest =
            serde_json::from_str(&manifest_contents).context("Failed to parse manifest.json")?;

        let mut db_contents = Vec::new();
        archive
            .by_name(DB_ENTRY)
            .context("locpack.sqlite not found in archive")?
            .read_to_end(&mut db_contents)
            .context("Failed to read container from archive")?;

        let actual = sha256_hex(&db_contents);
        if actual != manifest.sha256 {
            bail!(
                "container hash mismatch: manifest says {}, archive holds {}",
                manifest.sha256,
                actual
            );
        }

        let temp_db_path = format!("{}.extracted.db", pack_path);
        File::create(&temp_db_path)
            .context("Failed to create temporary container file")?
            .write_all(&db_contents)
            .context("Failed to write temporary container file")?;

        let container =
            Container::open(&temp_db_path).context("Failed to open extracted container")?;
        let store = ClusterStore::new(
            RecordStore::open(container).context("Not a locpack record store")?,
        );

        info!("opened {} ({} records)", pack_path, manifest.stats.n_localizations);
        Ok(Self { manifest, store })
    }

    pub fn store(&self) -> &ClusterStore {
        &self.store
    }

    pub fn into_store(self) -> ClusterStore {
        self.store
    }
}
