#![warn(missing_docs)]
//! Core library entry points for the semdex indexing and retrieval pipeline.

pub mod assets;
pub mod composer;
pub mod config;
pub mod embedder;
pub mod enrich;
pub mod index;
pub mod pipeline;
pub mod record;
pub mod search;

pub use assets::{AssetUploader, UploadReport};
pub use composer::{compose_combined_text, COMBINED_TEXT_FIELDS};
pub use config::{AppConfig, ComputeDevice, ConfigError, DistanceMetric};
pub use embedder::{remote::RemoteEncoder, EmbedError, Embedder, TextEncoder};
pub use enrich::{AssetUrlMap, EnrichReport, Reconciler};
pub use index::{
    qdrant::QdrantIndex, CollectionInfo, CollectionSpec, CountMismatch, FailedBatch, IndexManager,
    IndexPoint, RecordPayload, UpsertReport, VectorIndex,
};
pub use pipeline::{read_dataset, IngestPipeline, IngestReport};
pub use record::{Normalizer, RawRecord, Record};
pub use search::{QueryEngine, SearchHit};
