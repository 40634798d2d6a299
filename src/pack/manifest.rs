use serde::{Deserialize, Serialize};

/// Top-level metadata stored as `manifest.json` inside a `.locpack`.
#[derive(Debug, Serialize, Deserialize)]
pub struct Manifest {
    pub version: String,
    pub created_at: String,
    pub dataset_id: String,
    pub generator: String,
    /// SHA-256 of the SQLite payload, verified on open.
    pub sha256: String,
    pub stats: ManifestStats,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ManifestStats {
    pub n_localizations: u64,
    pub n_tracks: u64,
    pub n_frames: u64,
    pub cluster_count: u64,
    pub pixel_size: f64,
}
