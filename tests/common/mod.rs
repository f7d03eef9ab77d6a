#![allow(dead_code)]

use async_trait::async_trait;
use sea_orm::{Database, DatabaseConnection};
use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use terrainflow::config::PipelineConfig;
use terrainflow::infrastructure::database;
use terrainflow::services::catalog::{CatalogEntry, CatalogRecord, DatabaseCatalog, ProjectCatalog};
use terrainflow::services::observer::RecordingObserver;
use terrainflow::services::pipeline::ConversionPipeline;
use terrainflow::services::raster::{DecodeError, DecodedRaster, GeoTiffDecoder, RasterDecoder};
use terrainflow::services::storage::StorageService;
use terrainflow::utils::retry::RetryConfig;
use tiff::encoder::{TiffEncoder, colortype};
use tiff::tags::Tag;

pub async fn setup_test_db() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    database::run_migrations(&db).await.unwrap();
    db
}

/// Blob store kept in memory, with failure injection.
#[derive(Default)]
pub struct MockStorageService {
    pub files: Mutex<HashMap<String, Vec<u8>>>,
    puts: AtomicUsize,
    failing_puts: Mutex<HashSet<usize>>,
    unavailable: AtomicBool,
}

impl MockStorageService {
    pub fn new() -> Self {
        Self::default()
    }

    /// The `n`-th upload call (1-based, counting retries) fails.
    pub fn fail_put(self, n: usize) -> Self {
        self.failing_puts.lock().unwrap().insert(n);
        self
    }

    /// Every call fails until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.files.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(key).cloned()
    }

    fn check_available(&self) -> anyhow::Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            anyhow::bail!("storage backend unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl StorageService for MockStorageService {
    async fn upload_file(&self, key: &str, data: Vec<u8>) -> anyhow::Result<()> {
        self.check_available()?;
        let n = self.puts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing_puts.lock().unwrap().contains(&n) {
            anyhow::bail!("injected failure on put #{}", n);
        }
        self.files.lock().unwrap().insert(key.to_string(), data);
        Ok(())
    }

    async fn delete_file(&self, key: &str) -> anyhow::Result<()> {
        self.check_available()?;
        self.files.lock().unwrap().remove(key);
        Ok(())
    }

    async fn file_exists(&self, key: &str) -> anyhow::Result<bool> {
        self.check_available()?;
        Ok(self.files.lock().unwrap().contains_key(key))
    }
}

/// Catalog whose appends always fail; reads go to the wrapped catalog.
pub struct FailingAppendCatalog {
    pub inner: DatabaseCatalog,
}

#[async_trait]
impl ProjectCatalog for FailingAppendCatalog {
    async fn append(&self, _record: CatalogRecord) -> anyhow::Result<bool> {
        anyhow::bail!("catalog write rejected")
    }

    async fn contains(&self, owner_id: &str, artifact_key: &str) -> anyhow::Result<bool> {
        self.inner.contains(owner_id, artifact_key).await
    }

    async fn list(&self, owner_id: &str) -> anyhow::Result<Vec<CatalogEntry>> {
        self.inner.list(owner_id).await
    }
}

/// GeoTIFF decoder that takes its time.
pub struct SlowDecoder {
    pub delay: Duration,
}

impl RasterDecoder for SlowDecoder {
    fn decode(&self, path: &Path) -> Result<DecodedRaster, DecodeError> {
        std::thread::sleep(self.delay);
        GeoTiffDecoder::default().decode(path)
    }
}

/// Single-band f32 GeoTIFF, 0.5 x 0.25 cells, top-left corner at (10, 50).
pub fn geotiff_bytes(width: u32, height: u32, samples: &[f32]) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    {
        let mut encoder = TiffEncoder::new(&mut buf).unwrap();
        let mut image = encoder
            .new_image::<colortype::Gray32Float>(width, height)
            .unwrap();
        image
            .encoder()
            .write_tag(Tag::Unknown(33550), &[0.5f64, 0.25, 0.0][..])
            .unwrap();
        image
            .encoder()
            .write_tag(Tag::Unknown(33922), &[0.0f64, 0.0, 0.0, 10.0, 50.0, 0.0][..])
            .unwrap();
        image.write_data(samples).unwrap();
    }
    buf.into_inner()
}

/// The 4x4 terrain used throughout: elevations 100, 101, ... 115.
pub fn terrain_tif() -> Vec<u8> {
    let samples: Vec<f32> = (0..16).map(|v| 100.0 + v as f32).collect();
    geotiff_bytes(4, 4, &samples)
}

pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::FileOptions::default();
    for (name, data) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

pub fn test_config(work_dir: &Path) -> PipelineConfig {
    PipelineConfig {
        work_dir: Some(work_dir.to_path_buf()),
        upload_retry: RetryConfig::none(),
        jwt_secret: "test_secret".to_string(),
        ..PipelineConfig::development()
    }
}

pub struct Harness {
    pub pipeline: Arc<ConversionPipeline>,
    pub storage: Arc<MockStorageService>,
    pub catalog: Arc<dyn ProjectCatalog>,
    pub observer: Arc<RecordingObserver>,
    pub db: DatabaseConnection,
    pub work_dir: tempfile::TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        Self::build(MockStorageService::new(), |_| {}, None, false).await
    }

    pub async fn with_storage(storage: MockStorageService) -> Self {
        Self::build(storage, |_| {}, None, false).await
    }

    pub async fn with_config(configure: impl FnOnce(&mut PipelineConfig)) -> Self {
        Self::build(MockStorageService::new(), configure, None, false).await
    }

    pub async fn with_storage_and_config(
        storage: MockStorageService,
        configure: impl FnOnce(&mut PipelineConfig),
    ) -> Self {
        Self::build(storage, configure, None, false).await
    }

    pub async fn with_failing_catalog() -> Self {
        Self::build(MockStorageService::new(), |_| {}, None, true).await
    }

    pub async fn with_decoder(
        decoder: Arc<dyn RasterDecoder>,
        configure: impl FnOnce(&mut PipelineConfig),
    ) -> Self {
        Self::build(MockStorageService::new(), configure, Some(decoder), false).await
    }

    async fn build(
        storage: MockStorageService,
        configure: impl FnOnce(&mut PipelineConfig),
        decoder: Option<Arc<dyn RasterDecoder>>,
        failing_catalog: bool,
    ) -> Self {
        let work_dir = tempfile::tempdir().unwrap();
        let mut config = test_config(work_dir.path());
        configure(&mut config);

        let db = setup_test_db().await;
        let storage = Arc::new(storage);
        let catalog: Arc<dyn ProjectCatalog> = if failing_catalog {
            Arc::new(FailingAppendCatalog {
                inner: DatabaseCatalog::new(db.clone()),
            })
        } else {
            Arc::new(DatabaseCatalog::new(db.clone()))
        };
        let observer = Arc::new(RecordingObserver::new());
        let decoder = decoder.unwrap_or_else(|| Arc::new(GeoTiffDecoder::default()));

        let pipeline = Arc::new(ConversionPipeline::new(
            config,
            storage.clone(),
            catalog.clone(),
            decoder,
            observer.clone(),
        ));

        Self {
            pipeline,
            storage,
            catalog,
            observer,
            db,
            work_dir,
        }
    }

    /// Entries left behind in the working directory root.
    pub fn leftovers(&self) -> Vec<String> {
        std::fs::read_dir(self.work_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }
}
