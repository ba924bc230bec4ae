//! Pipeline orchestration: drives each work item through its stages.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::archive::{
    mask_password, unique_output_path, ArchiveFormat, Archiver, ExtractionResult, OutputArchive,
    PasswordCandidates, SevenZip,
};
use crate::config::{resolve_env_var, Config};
use crate::error::{ConfigError, PipelineError, PipelineResult};
use crate::image::{apply_retention, convert_many, Ffmpeg, ImageDiscovery, ImageSettings, Transcoder};
use crate::naming::{natural_sort_key, safe_file_name, title_with_stats};
use crate::remote::{ArticleMetadata, SubmissionClient, SubmissionRecord};
use crate::tools::ToolResolver;
use crate::workspace::{self, ContentStats};

use super::{ItemReport, ItemStatus, ProgressEvent, RunSummary, Stage, WorkItem, WorkQueue};

/// Extensions uploaded as gallery images.
const GALLERY_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "avif"];

/// A pipeline error attributed to the stage that raised it.
#[derive(Debug)]
pub struct StageFailure {
    pub stage: Stage,
    pub error: PipelineError,
}

trait AtStage<T> {
    fn at(self, stage: Stage) -> Result<T, StageFailure>;
}

impl<T> AtStage<T> for PipelineResult<T> {
    fn at(self, stage: Stage) -> Result<T, StageFailure> {
        self.map_err(|error| StageFailure { stage, error })
    }
}

/// Counts from the Converting stage.
#[derive(Debug, Default)]
struct ConversionCounts {
    converted: usize,
    failed: usize,
}

/// The orchestrator.
///
/// Holds one read-only configuration snapshot and the components built from
/// it. Items are processed strictly one at a time.
pub struct Pipeline {
    config: Arc<Config>,
    archiver: Arc<dyn Archiver>,
    transcoder: Arc<dyn Transcoder>,
    client: Option<Arc<SubmissionClient>>,
}

impl Pipeline {
    pub fn new(
        config: Arc<Config>,
        archiver: Arc<dyn Archiver>,
        transcoder: Arc<dyn Transcoder>,
        client: Option<Arc<SubmissionClient>>,
    ) -> Self {
        Self {
            config,
            archiver,
            transcoder,
            client,
        }
    }

    /// Wire up 7-Zip, FFmpeg and (when `api.enabled`) the submission client.
    pub fn from_config(config: Arc<Config>) -> Result<Self, ConfigError> {
        let resolver = Arc::new(ToolResolver::new(&config.tools));
        let archiver = Arc::new(SevenZip::new(
            resolver.clone(),
            config.archive.clone(),
            Duration::from_secs(config.tools.archiver_timeout_secs),
        ));
        let transcoder = Arc::new(Ffmpeg::new(
            resolver,
            Duration::from_secs(config.tools.transcoder_timeout_secs),
        ));
        let client = if config.api.enabled {
            Some(Arc::new(SubmissionClient::new(&config.api)?))
        } else {
            None
        };
        Ok(Self::new(config, archiver, transcoder, client))
    }

    /// Pull items until the queue is closed and drained, or `cancel` fires.
    ///
    /// Item failures are recorded in the queue and never stop the loop.
    pub async fn run(
        &self,
        queue: &WorkQueue,
        events: &mpsc::Sender<ProgressEvent>,
        cancel: &CancellationToken,
    ) -> RunSummary {
        while let Some(mut item) = queue.next(cancel).await {
            tracing::info!("Processing #{}: {:?}", item.id, item.source);
            let started = std::time::Instant::now();

            match self.process_item(&mut item, queue, events, cancel).await {
                Ok(report) => {
                    tracing::info!(
                        "Done #{}: {:?} in {:?}",
                        item.id,
                        report.output.path,
                        started.elapsed()
                    );
                    item.stage = Stage::Done;
                    queue.set_status(item.id, ItemStatus::Done(Box::new(report)));
                    emit(events, &item, None).await;
                    if self.config.general.delete_source && !item.is_dir {
                        remove_source(&item.source);
                    }
                }
                Err(StageFailure { stage, error }) => {
                    tracing::error!("Failed #{} at {stage}: {error}", item.id);
                    let reason = error.to_string();
                    item.stage = Stage::Failed;
                    queue.set_status(
                        item.id,
                        ItemStatus::Failed {
                            stage,
                            reason: reason.clone(),
                        },
                    );
                    emit(events, &item, Some(reason)).await;
                }
            }

            if cancel.is_cancelled() {
                tracing::warn!("Cancelled, not pulling further items");
                break;
            }
        }
        queue.summary()
    }

    /// Run every stage for one item.
    ///
    /// The extraction workspace is dropped (and removed) on return, whatever
    /// the outcome.
    async fn process_item(
        &self,
        item: &mut WorkItem,
        queue: &WorkQueue,
        events: &mpsc::Sender<ProgressEvent>,
        cancel: &CancellationToken,
    ) -> Result<ItemReport, StageFailure> {
        enter(item, Stage::Extracting, queue, events, cancel).await?;
        let extraction = self.extract(item, cancel).await.at(Stage::Extracting)?;
        let root = extraction.root();

        enter(item, Stage::Converting, queue, events, cancel).await?;
        let counts = self.convert(item, root, cancel).await.at(Stage::Converting)?;

        enter(item, Stage::Packaging, queue, events, cancel).await?;
        let (title, stats, output) = self.package(item, root, cancel).await.at(Stage::Packaging)?;

        let submission = match &self.client {
            Some(client) => {
                enter(item, Stage::Uploading, queue, events, cancel).await?;
                let record = self
                    .upload(client, &title, stats, &output, root)
                    .await
                    .at(Stage::Uploading)?;
                Some(record)
            }
            None => None,
        };

        Ok(ItemReport {
            title,
            output,
            stats,
            converted: counts.converted,
            conversion_failures: counts.failed,
            submission,
        })
    }

    async fn extract(
        &self,
        item: &WorkItem,
        cancel: &CancellationToken,
    ) -> PipelineResult<ExtractionResult> {
        if !item.source.exists() {
            return Err(PipelineError::FileNotFound(item.source.clone()));
        }

        let mut extraction = ExtractionResult::allocate(&self.config.temp_dir())?;
        if item.is_dir {
            let bytes = workspace::copy_dir(&item.source, extraction.root())?;
            tracing::debug!("Copied folder {:?} ({bytes} bytes)", item.source);
            extraction.skipped = true;
        } else {
            let candidates = PasswordCandidates::build(&self.config.extract, &item.source);
            let outcome = self
                .archiver
                .probe_and_extract(&item.source, &candidates, extraction.root(), cancel)
                .await?;
            match &outcome.password {
                Some(password) => tracing::info!(
                    "Extracted {:?} with password {} ({} attempts)",
                    item.source,
                    mask_password(password),
                    outcome.attempts
                ),
                None => tracing::info!("Extracted {:?}", item.source),
            }
            extraction.password = outcome.password;
        }

        workspace::prepare(extraction.root(), &self.config.naming)?;
        Ok(extraction)
    }

    async fn convert(
        &self,
        item: &WorkItem,
        root: &Path,
        cancel: &CancellationToken,
    ) -> PipelineResult<ConversionCounts> {
        let settings = ImageSettings::from_config(&self.config.image)?;
        let images: Vec<PathBuf> = ImageDiscovery::new(&self.config.image.supported_formats)
            .discover(root)
            .into_iter()
            .map(|f| f.path)
            .collect();
        if images.is_empty() {
            tracing::info!("No convertible images in {:?}", item.display_name);
            return Ok(ConversionCounts::default());
        }

        let retention = settings.retention;
        let mut batch = convert_many(
            self.transcoder.clone(),
            images,
            settings,
            self.config.image.parallel_workers,
            cancel.clone(),
        )
        .await;

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        // A missing transcoder is not a per-image problem.
        if let Some(pos) = batch
            .failures
            .iter()
            .position(|f| matches!(f.error, PipelineError::ToolMissing { .. }))
        {
            return Err(batch.failures.swap_remove(pos).error);
        }

        let sidecar = retention
            .save_compressed_copy
            .then(|| self.sidecar_dir(&item.display_name));
        let summary = apply_retention(&batch.records, root, sidecar.as_deref())?;
        tracing::debug!(
            "Retention for {:?}: {} copied, {} originals removed, {} converted removed",
            item.display_name,
            summary.copied,
            summary.originals_removed,
            summary.converted_removed
        );

        Ok(ConversionCounts {
            converted: batch.succeeded(),
            failed: batch.failed(),
        })
    }

    async fn package(
        &self,
        item: &WorkItem,
        root: &Path,
        cancel: &CancellationToken,
    ) -> PipelineResult<(String, ContentStats, OutputArchive)> {
        let stats = ContentStats::collect(root);
        let title = if self.config.naming.append_stats {
            title_with_stats(&item.display_name, &stats)
        } else {
            item.display_name.clone()
        };

        let format: ArchiveFormat = self.config.archive.format.parse()?;
        let output_path = unique_output_path(
            &self.config.output_dir(),
            &safe_file_name(&title, self.config.naming.max_name_len),
            format,
        );
        let password = self
            .config
            .archive
            .password
            .as_deref()
            .and_then(resolve_env_var);

        let output = self
            .archiver
            .compress(root, &output_path, format, password.as_deref(), cancel)
            .await?;
        tracing::info!(
            "Packaged {:?} ({} bytes, {}P/{}V)",
            output.path,
            output.size,
            stats.image_count,
            stats.video_count
        );
        Ok((title, stats, output))
    }

    async fn upload(
        &self,
        client: &SubmissionClient,
        title: &str,
        stats: ContentStats,
        output: &OutputArchive,
        root: &Path,
    ) -> PipelineResult<SubmissionRecord> {
        let gallery = if self.config.api.upload_gallery {
            gallery_images(root)
        } else {
            Vec::new()
        };
        let metadata = ArticleMetadata {
            title: title.to_string(),
            stats,
            images: Vec::new(),
            require_membership: true,
        };
        client.submit(&output.path, metadata, &gallery).await
    }

    /// `<output_dir>/<display name>_compressed`
    fn sidecar_dir(&self, display_name: &str) -> PathBuf {
        let name = safe_file_name(display_name, self.config.naming.max_name_len);
        self.config.output_dir().join(format!("{name}_compressed"))
    }
}

/// Record the transition into `stage` and report it.
async fn enter(
    item: &mut WorkItem,
    stage: Stage,
    queue: &WorkQueue,
    events: &mpsc::Sender<ProgressEvent>,
    cancel: &CancellationToken,
) -> Result<(), StageFailure> {
    if cancel.is_cancelled() {
        return Err(StageFailure {
            stage,
            error: PipelineError::Cancelled,
        });
    }
    tracing::debug!("#{} -> {stage}", item.id);
    item.stage = stage;
    queue.set_status(item.id, ItemStatus::Running(stage));
    emit(events, item, None).await;
    Ok(())
}

async fn emit(events: &mpsc::Sender<ProgressEvent>, item: &WorkItem, message: Option<String>) {
    let event = ProgressEvent {
        item_id: item.id,
        display_name: item.display_name.clone(),
        stage: item.stage,
        percent: item.stage.percent(),
        message,
    };
    if events.send(event).await.is_err() {
        tracing::trace!("Progress receiver dropped");
    }
}

fn remove_source(source: &Path) {
    match std::fs::remove_file(source) {
        Ok(()) => tracing::info!("Deleted source {:?}", source),
        Err(e) => tracing::warn!("Could not delete source {:?}: {e}", source),
    }
}

/// Gallery candidates under `root`, in natural order.
fn gallery_images(root: &Path) -> Vec<PathBuf> {
    let mut images: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| GALLERY_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        })
        .collect();
    images.sort_by_cached_key(|p| natural_sort_key(&p.to_string_lossy()));
    images
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ProbeOutcome;
    use crate::config::ApiConfig;
    use crate::image::testing::FakeTranscoder;
    use crate::image::ImageConversionRecord;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Writes a fixed tree on extraction and records what it was asked to pack.
    ///
    /// An archive whose content is `locked` fails every candidate.
    #[derive(Default)]
    struct FakeArchiver {
        probes: Mutex<usize>,
        packed: Mutex<Vec<Vec<String>>>,
        cancel_on_probe: Option<CancellationToken>,
        cancel_on_compress: Option<CancellationToken>,
    }

    #[async_trait]
    impl Archiver for FakeArchiver {
        async fn probe_and_extract(
            &self,
            archive: &Path,
            candidates: &[Option<String>],
            dest: &Path,
            _cancel: &CancellationToken,
        ) -> PipelineResult<ProbeOutcome> {
            *self.probes.lock().unwrap() += 1;
            if let Some(token) = &self.cancel_on_probe {
                token.cancel();
                return Err(PipelineError::Cancelled);
            }
            if std::fs::read(archive).unwrap() == b"locked" {
                return Err(PipelineError::DecryptionFailed {
                    path: archive.to_path_buf(),
                    attempts: candidates.len(),
                });
            }
            let set = dest.join("set");
            std::fs::create_dir_all(&set).unwrap();
            std::fs::write(set.join("b.jpg"), b"image b").unwrap();
            std::fs::write(set.join("a.jpg"), b"image a").unwrap();
            std::fs::write(set.join("clip.mp4"), b"video").unwrap();
            std::fs::write(set.join("readme.txt"), b"junk").unwrap();
            Ok(ProbeOutcome {
                password: None,
                attempts: 1,
            })
        }

        async fn compress(
            &self,
            source_dir: &Path,
            output: &Path,
            format: ArchiveFormat,
            _password: Option<&str>,
            _cancel: &CancellationToken,
        ) -> PipelineResult<OutputArchive> {
            if let Some(token) = &self.cancel_on_compress {
                token.cancel();
                return Err(PipelineError::Cancelled);
            }
            let mut files: Vec<String> = WalkDir::new(source_dir)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .map(|e| {
                    e.path()
                        .strip_prefix(source_dir)
                        .unwrap()
                        .to_string_lossy()
                        .into_owned()
                })
                .collect();
            files.sort();
            self.packed.lock().unwrap().push(files);

            std::fs::create_dir_all(output.parent().unwrap()).unwrap();
            std::fs::write(output, b"archive").unwrap();
            Ok(OutputArchive {
                path: output.to_path_buf(),
                format,
                size: 7,
            })
        }
    }

    /// Fires the run's token from inside a conversion.
    struct CancellingTranscoder {
        cancel: CancellationToken,
    }

    #[async_trait]
    impl Transcoder for CancellingTranscoder {
        async fn convert(
            &self,
            image: &Path,
            _output: &Path,
            _settings: &ImageSettings,
            _cancel: &CancellationToken,
        ) -> PipelineResult<ImageConversionRecord> {
            self.cancel.cancel();
            Err(PipelineError::ConversionFailed {
                path: image.to_path_buf(),
                message: "interrupted".into(),
            })
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        config: Config,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let mut config = Config::default();
            config.general.output_dir = dir.path().join("output");
            config.general.temp_dir = dir.path().join("temp");
            config.archive.format = "zip".into();
            Self { dir, config }
        }

        fn input(&self, name: &str, content: &[u8]) -> PathBuf {
            let path = self.dir.path().join("inbox").join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, content).unwrap();
            path
        }

        fn pipeline(&self, archiver: Arc<FakeArchiver>) -> Pipeline {
            self.pipeline_with_client(archiver, None)
        }

        fn pipeline_with_client(
            &self,
            archiver: Arc<FakeArchiver>,
            client: Option<Arc<SubmissionClient>>,
        ) -> Pipeline {
            Pipeline::new(
                Arc::new(self.config.clone()),
                archiver,
                Arc::new(FakeTranscoder),
                client,
            )
        }

        fn temp_is_empty(&self) -> bool {
            let temp = self.dir.path().join("temp");
            !temp.exists() || std::fs::read_dir(temp).unwrap().next().is_none()
        }

        fn output_files(&self) -> Vec<String> {
            let output = self.dir.path().join("output");
            if !output.exists() {
                return Vec::new();
            }
            let mut names: Vec<String> = std::fs::read_dir(output)
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            names
        }
    }

    async fn run(pipeline: &Pipeline, queue: &WorkQueue) -> (RunSummary, Vec<ProgressEvent>) {
        run_with(pipeline, queue, &CancellationToken::new()).await
    }

    async fn run_with(
        pipeline: &Pipeline,
        queue: &WorkQueue,
        cancel: &CancellationToken,
    ) -> (RunSummary, Vec<ProgressEvent>) {
        let (tx, mut rx) = mpsc::channel(64);
        queue.close();
        let summary = pipeline.run(queue, &tx, cancel).await;
        drop(tx);
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (summary, events)
    }

    fn stages(events: &[ProgressEvent], id: u64) -> Vec<Stage> {
        events
            .iter()
            .filter(|e| e.item_id == id)
            .map(|e| e.stage)
            .collect()
    }

    fn report(summary: &RunSummary, id: u64) -> ItemReport {
        match &summary.items.iter().find(|i| i.id == id).unwrap().status {
            ItemStatus::Done(report) => (**report).clone(),
            other => panic!("item {id} not done: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_archive_happy_path() {
        let fixture = Fixture::new();
        let archiver = Arc::new(FakeArchiver::default());
        let pipeline = fixture.pipeline(archiver.clone());
        let queue = WorkQueue::new();
        let id = queue.push(fixture.input("01_Summer Set 12P.7z", b"payload"));

        let (summary, events) = run(&pipeline, &queue).await;

        assert_eq!(summary.succeeded(), 1);
        assert_eq!(
            stages(&events, id),
            vec![Stage::Extracting, Stage::Converting, Stage::Packaging, Stage::Done]
        );
        let percents: Vec<u8> = events.iter().map(|e| e.percent).collect();
        assert_eq!(percents, vec![10, 35, 65, 100]);

        let report = report(&summary, id);
        assert_eq!(report.title, "Summer Set [2P+1V - 0MB]");
        assert_eq!(
            report.output.path,
            fixture.dir.path().join("output/Summer Set [2P+1V - 0MB].zip")
        );
        assert!(report.output.path.exists());
        assert_eq!(report.converted, 2);
        assert!(report.submission.is_none());

        let packed = archiver.packed.lock().unwrap().clone();
        assert_eq!(
            packed,
            vec![vec![
                "image_001.webp".to_string(),
                "image_002.webp".to_string(),
                "video_001.mp4".to_string(),
            ]]
        );
        assert!(fixture.temp_is_empty());
        assert!(fixture.dir.path().join("inbox/01_Summer Set 12P.7z").exists());
    }

    #[tokio::test]
    async fn test_folder_input_skips_archiver() {
        let fixture = Fixture::new();
        let folder = fixture.dir.path().join("inbox/Beach Day");
        std::fs::create_dir_all(&folder).unwrap();
        std::fs::write(folder.join("IMG_2.jpg"), b"two").unwrap();
        std::fs::write(folder.join("IMG_10.jpg"), b"ten").unwrap();

        let archiver = Arc::new(FakeArchiver::default());
        let pipeline = fixture.pipeline(archiver.clone());
        let queue = WorkQueue::new();
        let id = queue.push(&folder);

        let (summary, _) = run(&pipeline, &queue).await;

        assert_eq!(summary.succeeded(), 1);
        assert_eq!(*archiver.probes.lock().unwrap(), 0);
        assert_eq!(report(&summary, id).title, "Beach Day [2P - 0MB]");

        // The user's folder is untouched
        let mut names: Vec<String> = std::fs::read_dir(&folder)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["IMG_10.jpg", "IMG_2.jpg"]);
        assert_eq!(std::fs::read(folder.join("IMG_2.jpg")).unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_locked_archive_fails_only_that_item() {
        let mut fixture = Fixture::new();
        fixture.config.general.delete_source = true;
        let pipeline = fixture.pipeline(Arc::new(FakeArchiver::default()));
        let queue = WorkQueue::new();
        let locked_path = fixture.input("locked.7z", b"locked");
        let open_path = fixture.input("open.7z", b"payload");
        let locked = queue.push(&locked_path);
        let open = queue.push(&open_path);

        let (summary, events) = run(&pipeline, &queue).await;

        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.succeeded(), 1);
        let (stage, reason) = summary.items[0].failure().unwrap();
        assert_eq!(stage, Stage::Extracting);
        assert!(reason.contains("Could not decrypt"));
        assert_eq!(stages(&events, locked), vec![Stage::Extracting, Stage::Failed]);
        assert!(events.iter().any(|e| e.item_id == locked && e.message.is_some()));
        assert_eq!(*stages(&events, open).last().unwrap(), Stage::Done);

        // Only the finished archive is removed
        assert!(locked_path.exists());
        assert!(!open_path.exists());
        assert!(fixture.temp_is_empty());
    }

    #[tokio::test]
    async fn test_sidecar_only_retention() {
        let mut fixture = Fixture::new();
        fixture.config.image.keep_original = false;
        fixture.config.image.keep_converted = false;
        fixture.config.image.save_compressed_copy = true;
        let archiver = Arc::new(FakeArchiver::default());
        let pipeline = fixture.pipeline(archiver.clone());
        let queue = WorkQueue::new();
        queue.push(fixture.input("Gallery.7z", b"payload"));

        let (summary, _) = run(&pipeline, &queue).await;
        assert_eq!(summary.succeeded(), 1);

        let packed = archiver.packed.lock().unwrap().clone();
        assert_eq!(packed, vec![vec!["video_001.mp4".to_string()]]);

        let sidecar = fixture.dir.path().join("output/Gallery_compressed");
        let mut copied: Vec<String> = std::fs::read_dir(&sidecar)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        copied.sort();
        assert_eq!(copied, vec!["image_001.webp", "image_002.webp"]);
    }

    #[tokio::test]
    async fn test_upload_and_article() {
        let mut server = mockito::Server::new_async().await;
        let _login = server
            .mock("POST", "/login")
            .with_status(200)
            .with_body(r#"{"code":0,"data":{"token":"tok"}}"#)
            .create_async()
            .await;
        let upload = server
            .mock("POST", "/upload")
            .match_header("authorization", "Bearer tok")
            .with_status(200)
            .with_body(r#"{"code":200,"data":{"url":"https://cdn/set.zip"}}"#)
            .expect(1)
            .create_async()
            .await;
        let article = server
            .mock("POST", "/article")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "title": "Set [2P+1V - 0MB]",
                "attachment": "https://cdn/set.zip",
                "imageCount": 2,
                "videoCount": 1
            })))
            .with_status(200)
            .with_body(r#"{"code":200,"data":{"id":7}}"#)
            .expect(1)
            .create_async()
            .await;

        let mut fixture = Fixture::new();
        fixture.config.api = api_config(&server);
        let client = Arc::new(SubmissionClient::new(&fixture.config.api).unwrap());
        let pipeline =
            fixture.pipeline_with_client(Arc::new(FakeArchiver::default()), Some(client));
        let queue = WorkQueue::new();
        let id = queue.push(fixture.input("Set.7z", b"payload"));

        let (summary, events) = run(&pipeline, &queue).await;

        assert_eq!(stages(&events, id)[3], Stage::Uploading);
        let submission = report(&summary, id).submission.unwrap();
        assert_eq!(submission.asset_url, "https://cdn/set.zip");
        assert_eq!(submission.article_id.as_deref(), Some("7"));
        upload.assert_async().await;
        article.assert_async().await;
    }

    #[tokio::test]
    async fn test_repeated_auth_rejection_fails_uploading() {
        let mut server = mockito::Server::new_async().await;
        let _login = server
            .mock("POST", "/login")
            .with_status(200)
            .with_body(r#"{"code":0,"data":{"token":"tok"}}"#)
            .create_async()
            .await;
        let _upload = server
            .mock("POST", "/upload")
            .with_status(401)
            .with_body("expired")
            .create_async()
            .await;

        let mut fixture = Fixture::new();
        fixture.config.api = api_config(&server);
        let client = Arc::new(SubmissionClient::new(&fixture.config.api).unwrap());
        let pipeline =
            fixture.pipeline_with_client(Arc::new(FakeArchiver::default()), Some(client));
        let queue = WorkQueue::new();
        queue.push(fixture.input("first.7z", b"payload"));
        queue.push(fixture.input("second.7z", b"payload"));

        let (summary, _) = run(&pipeline, &queue).await;

        assert_eq!(summary.failed(), 2);
        for item in &summary.items {
            let (stage, reason) = item.failure().unwrap();
            assert_eq!(stage, Stage::Uploading);
            assert!(reason.starts_with("Authentication failed"), "{reason}");
        }
        // The archive was still produced before the upload failed
        assert!(fixture.dir.path().join("output/first [2P+1V - 0MB].zip").exists());
    }

    #[tokio::test]
    async fn test_cancellation_stops_queue() {
        let fixture = Fixture::new();
        let cancel = CancellationToken::new();
        let archiver = Arc::new(FakeArchiver {
            cancel_on_probe: Some(cancel.clone()),
            ..FakeArchiver::default()
        });
        let pipeline = fixture.pipeline(archiver.clone());
        let queue = WorkQueue::new();
        queue.push(fixture.input("one.7z", b"payload"));
        queue.push(fixture.input("two.7z", b"payload"));

        let (summary, _) = run_with(&pipeline, &queue, &cancel).await;

        assert_eq!(*archiver.probes.lock().unwrap(), 1);
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.items[0].failure(), Some((Stage::Extracting, "Cancelled")));
        assert_eq!(summary.unfinished(), 1);
        assert!(fixture.temp_is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_while_converting_cleans_up() {
        let fixture = Fixture::new();
        let cancel = CancellationToken::new();
        let archiver = Arc::new(FakeArchiver::default());
        let pipeline = Pipeline::new(
            Arc::new(fixture.config.clone()),
            archiver.clone(),
            Arc::new(CancellingTranscoder {
                cancel: cancel.clone(),
            }),
            None,
        );
        let queue = WorkQueue::new();
        let first = queue.push(fixture.input("one.7z", b"payload"));
        queue.push(fixture.input("two.7z", b"payload"));

        let (summary, events) = run_with(&pipeline, &queue, &cancel).await;

        assert_eq!(summary.items[0].failure(), Some((Stage::Converting, "Cancelled")));
        assert_eq!(
            stages(&events, first),
            vec![Stage::Extracting, Stage::Converting, Stage::Failed]
        );
        assert_eq!(summary.unfinished(), 1);
        assert_eq!(*archiver.probes.lock().unwrap(), 1);
        assert!(archiver.packed.lock().unwrap().is_empty());
        assert!(fixture.temp_is_empty());
        assert!(fixture.output_files().is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_while_packaging_cleans_up() {
        let fixture = Fixture::new();
        let cancel = CancellationToken::new();
        let archiver = Arc::new(FakeArchiver {
            cancel_on_compress: Some(cancel.clone()),
            ..FakeArchiver::default()
        });
        let pipeline = fixture.pipeline(archiver.clone());
        let queue = WorkQueue::new();
        let first = queue.push(fixture.input("one.7z", b"payload"));
        queue.push(fixture.input("two.7z", b"payload"));

        let (summary, events) = run_with(&pipeline, &queue, &cancel).await;

        assert_eq!(summary.items[0].failure(), Some((Stage::Packaging, "Cancelled")));
        assert_eq!(*stages(&events, first).last().unwrap(), Stage::Failed);
        assert_eq!(summary.unfinished(), 1);
        assert_eq!(*archiver.probes.lock().unwrap(), 1);
        assert!(fixture.temp_is_empty());
        assert!(fixture.output_files().is_empty());
    }

    #[tokio::test]
    async fn test_same_title_gets_distinct_archives() {
        let fixture = Fixture::new();
        let pipeline = fixture.pipeline(Arc::new(FakeArchiver::default()));
        let queue = WorkQueue::new();
        let first = queue.push(fixture.input("a/Set.7z", b"payload"));
        let second = queue.push(fixture.input("b/Set.7z", b"payload"));

        let (summary, _) = run(&pipeline, &queue).await;

        assert_eq!(summary.succeeded(), 2);
        assert_eq!(
            report(&summary, first).output.path,
            fixture.dir.path().join("output/Set [2P+1V - 0MB].zip")
        );
        assert_eq!(
            report(&summary, second).output.path,
            fixture.dir.path().join("output/Set [2P+1V - 0MB] (2).zip")
        );
        assert_eq!(
            fixture.output_files(),
            vec!["Set [2P+1V - 0MB] (2).zip", "Set [2P+1V - 0MB].zip"]
        );
    }

    #[tokio::test]
    async fn test_missing_source_fails_extracting() {
        let fixture = Fixture::new();
        let pipeline = fixture.pipeline(Arc::new(FakeArchiver::default()));
        let queue = WorkQueue::new();
        queue.push(fixture.dir.path().join("inbox/gone.7z"));

        let (summary, _) = run(&pipeline, &queue).await;

        let (stage, reason) = summary.items[0].failure().unwrap();
        assert_eq!(stage, Stage::Extracting);
        assert!(reason.starts_with("File not found"));
    }

    #[test]
    fn test_gallery_images_natural_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["image_010.webp", "image_002.webp", "clip.mp4", "cover.PNG"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let names: Vec<String> = gallery_images(dir.path())
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["cover.PNG", "image_002.webp", "image_010.webp"]);
    }

    fn api_config(server: &mockito::Server) -> ApiConfig {
        ApiConfig {
            enabled: true,
            account: "uploader".into(),
            password: "pw".into(),
            login_endpoint: format!("{}/login", server.url()),
            upload_endpoint: format!("{}/upload", server.url()),
            article_endpoint: format!("{}/article", server.url()),
            ..ApiConfig::default()
        }
    }
}
