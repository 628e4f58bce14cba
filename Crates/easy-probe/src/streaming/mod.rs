// easy-probe/Crates/easy-probe/src/streaming/mod.rs

//! Keeping the probes around the camera resident at runtime.
//!
//! Every frame, [StreamingEngine::update] works out which cells the camera
//! needs, reads the matching rows of each component array from disk into a
//! staging buffer, and copies the staging buffers into the volumes that the
//! [ProbeRenderer] displays. Reads can run on the calling thread, or on a
//! worker pool with completion deferred until the data is needed.

use crate::dataset::{self, DatasetError, DatasetMetadata, ShComponent};
use glam::{IVec3, Vec3};
use log::{debug, error, info};
use serde_derive::{Deserialize, Serialize};
use std::mem;
use std::path::{Path, PathBuf};
use thiserror::Error as Thiserror;
use threadpool::ThreadPool;

pub mod io;
pub mod plan;
pub mod region;
pub mod volume;

pub use self::io::ReadStatus;
pub use self::plan::StreamingRequest;
pub use self::region::{CameraKind, StreamingCamera, StreamingWindow};
pub use self::volume::{ProbeRenderer, ShaderUniforms, VolumeBuffer, VolumeFormat};

use self::io::{FileCache, ReadHandle};

pub const BOUNDING_RADIUS_LOW: f32 = 5.0;
pub const BOUNDING_RADIUS_MEDIUM: f32 = 10.0;
pub const BOUNDING_RADIUS_HIGH: f32 = 15.0;

const IO_THREAD_COUNT: usize = 2;

/// How much of the dataset to keep resident around the camera.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Default, Serialize, Deserialize)]
pub enum MemoryBudget {
    Low,
    #[default]
    Medium,
    High,
}

/// Which SH bands are streamed.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub enum ShBands {
    /// L0 and L1 only.
    #[default]
    L0L1,
    /// L0 through L2.
    L2,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub enum StreamingMode {
    /// Only the window around the camera is resident.
    #[default]
    Streaming,
    /// The whole dataset is loaded once.
    LoadAll,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub enum IoMode {
    /// Reads run to completion inside [StreamingEngine::update].
    #[default]
    Blocking,
    /// Reads run on worker threads and complete before the next upload.
    Async,
}

#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingSettings {
    pub mode: StreamingMode,
    pub bands: ShBands,
    pub budget: MemoryBudget,
    pub io: IoMode,
    /// Scales the lighting in the shader.
    pub intensity: f32,
    pub sampling_noise: f32,
}

/// What happened to the volumes during a frame.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FrameStatus {
    /// Nothing was streamed; the volumes hold what they held before.
    Skipped,
    /// Everything is already resident; only the uniforms were pushed.
    Unchanged,
    /// Reads were issued and will be uploaded once they complete.
    Pending,
    /// New data was uploaded.
    Uploaded,
}

#[derive(Thiserror, Debug)]
pub enum StreamingError {
    #[error("The probe metadata is unavailable: {0}")]
    Metadata(#[from] DatasetError),
    #[error("A volume of {size} probes exceeds the renderer's limit of {max}")]
    VolumeTooLarge { size: IVec3, max: u32 },
    #[error("A read ending at byte {end} overflows a staging buffer of {capacity} bytes")]
    RequestOverflow { end: usize, capacity: usize },
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("The handle for {} was poisoned by a panicking reader", .0.display())]
    Poisoned(PathBuf),
    #[error("The worker reading {} exited without reporting", .0.display())]
    WorkerLost(PathBuf),
    #[error("The read was canceled")]
    Canceled,
}

/// The staging buffer and volume of one component.
struct ComponentSlot {
    component: ShComponent,
    staging: Vec<u8>,
    volume: VolumeBuffer,
}

/// Reads issued by an earlier frame that haven't been uploaded yet.
struct PendingFrame {
    reads: Vec<(usize, ReadHandle)>,
    uniforms: ShaderUniforms,
    loads_everything: bool,
}

/// The runtime side of a baked dataset.
///
/// The engine owns the cached metadata, the open file handles, the I/O
/// workers, and every staging buffer and volume, for as long as it lives or
/// until [StreamingEngine::teardown].
pub struct StreamingEngine {
    dataset_dir: PathBuf,
    settings: StreamingSettings,
    metadata: Option<DatasetMetadata>,
    metadata_dirty: bool,
    files: FileCache,
    pool: ThreadPool,
    slots: Vec<ComponentSlot>,
    buffer_size: Option<IVec3>,
    pending: Option<PendingFrame>,
    loaded_everything: bool,
    last_failure: Option<String>,
}

impl MemoryBudget {
    /// The minimum radius of the streamed sphere, in world units.
    pub fn radius(self) -> f32 {
        match self {
            MemoryBudget::Low => BOUNDING_RADIUS_LOW,
            MemoryBudget::Medium => BOUNDING_RADIUS_MEDIUM,
            MemoryBudget::High => BOUNDING_RADIUS_HIGH,
        }
    }
}

impl ShBands {
    pub fn components(self) -> &'static [ShComponent] {
        match self {
            ShBands::L0L1 => &ShComponent::L0L1,
            ShBands::L2 => &ShComponent::ALL,
        }
    }
}

impl Default for StreamingSettings {
    fn default() -> Self {
        StreamingSettings {
            mode: StreamingMode::Streaming,
            bands: ShBands::L0L1,
            budget: MemoryBudget::Medium,
            io: IoMode::Blocking,
            intensity: 1.0,
            sampling_noise: 0.0,
        }
    }
}

impl StreamingEngine {
    /// Creates an engine for the dataset in `dataset_dir`. Nothing is read
    /// until the first update.
    pub fn new(dataset_dir: impl Into<PathBuf>, settings: StreamingSettings) -> StreamingEngine {
        StreamingEngine {
            dataset_dir: dataset_dir.into(),
            settings,
            metadata: None,
            metadata_dirty: true,
            files: FileCache::new(),
            pool: ThreadPool::with_name("easy-probe-io".to_owned(), IO_THREAD_COUNT),
            slots: vec![],
            buffer_size: None,
            pending: None,
            loaded_everything: false,
            last_failure: None,
        }
    }

    pub fn dataset_dir(&self) -> &Path {
        &self.dataset_dir
    }

    pub fn settings(&self) -> &StreamingSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: StreamingSettings) {
        if settings != self.settings {
            self.settings = settings;
            self.loaded_everything = false;
        }
    }

    /// The metadata of the last successful load.
    pub fn metadata(&self) -> Option<&DatasetMetadata> {
        self.metadata.as_ref()
    }

    /// Forces the metadata to be reloaded on the next update.
    ///
    /// A rebake replaces the dataset files, so pending reads are canceled and
    /// the cached handles closed; the next update reopens them.
    pub fn mark_dirty(&mut self) {
        self.cancel_pending();
        self.files.clear();
        self.metadata_dirty = true;
        self.loaded_everything = false;
    }

    /// Switches to the dataset of a newly loaded scene.
    pub fn on_scene_loaded(&mut self, dataset_dir: impl Into<PathBuf>) {
        self.teardown();
        self.dataset_dir = dataset_dir.into();
    }

    /// Cancels outstanding reads and releases every file handle and buffer.
    ///
    /// The engine stays usable; the next update starts from scratch.
    pub fn teardown(&mut self) {
        self.cancel_pending();
        self.files.clear();
        self.slots.clear();
        self.buffer_size = None;
        self.metadata = None;
        self.metadata_dirty = true;
        self.loaded_everything = false;
        self.last_failure = None;
        debug!("Released probe streaming resources");
    }

    /// The volume holding `component`, if it's allocated.
    pub fn volume(&self, component: ShComponent) -> Option<&VolumeBuffer> {
        self.slots
            .iter()
            .find(|slot| slot.component == component)
            .map(|slot| &slot.volume)
    }

    /// Bytes held by the allocated destination volumes.
    pub fn resident_bytes(&self) -> usize {
        self.slots.iter().map(|slot| slot.volume.byte_len()).sum()
    }

    /// Streams the probes `camera` needs.
    ///
    /// Reads issued by an earlier frame are completed and uploaded first.
    /// Failures are logged, once per distinct failure, and leave the volumes
    /// untouched.
    pub fn update(
        &mut self,
        camera: &StreamingCamera,
        frame_index: u32,
        renderer: &mut dyn ProbeRenderer,
    ) -> FrameStatus {
        if !camera.drives_streaming() {
            return FrameStatus::Skipped;
        }

        if let Err(err) = self.complete_pending(renderer) {
            self.report_failure(&err);
        }

        match self.stream(camera, frame_index, renderer) {
            Ok(status) => {
                if matches!(status, FrameStatus::Uploaded | FrameStatus::Unchanged) {
                    self.last_failure = None;
                }
                status
            }
            Err(err) => {
                self.report_failure(&err);
                FrameStatus::Skipped
            }
        }
    }

    /// The combined state of the pending reads, if there are any.
    pub fn pending_status(&mut self) -> Option<ReadStatus> {
        let pending = self.pending.as_mut()?;
        let mut status = ReadStatus::Complete;
        for (_, handle) in &mut pending.reads {
            match handle.status() {
                ReadStatus::InProgress => return Some(ReadStatus::InProgress),
                ReadStatus::Failed => status = ReadStatus::Failed,
                ReadStatus::Canceled if status == ReadStatus::Complete => {
                    status = ReadStatus::Canceled
                }
                ReadStatus::Canceled | ReadStatus::Complete => {}
            }
        }
        Some(status)
    }

    /// Waits for the pending reads and uploads them.
    ///
    /// Nothing is uploaded unless every component read succeeded. Returns
    /// whether anything was uploaded.
    pub fn complete_pending(
        &mut self,
        renderer: &mut dyn ProbeRenderer,
    ) -> Result<bool, StreamingError> {
        let Some(pending) = self.pending.take() else {
            return Ok(false);
        };

        let mut failure = None;
        for (slot_index, handle) in pending.reads {
            let completed = handle.wait();
            self.return_staging(slot_index, completed.buffer);
            if let Err(err) = completed.result {
                failure.get_or_insert(err);
            }
        }
        if let Some(err) = failure {
            return Err(err);
        }

        self.upload(renderer, &pending.uniforms)?;
        if pending.loads_everything {
            self.loaded_everything = true;
        }
        self.last_failure = None;
        Ok(true)
    }

    /// Cancels the pending reads and waits for the workers to let go of the
    /// staging buffers, which are cleared.
    pub fn cancel_pending(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        for (_, handle) in &pending.reads {
            handle.cancel();
        }
        for (slot_index, handle) in pending.reads {
            let mut buffer = handle.wait().buffer;
            buffer.fill(0);
            self.return_staging(slot_index, buffer);
        }
        debug!("Canceled pending probe reads");
    }

    fn return_staging(&mut self, slot_index: usize, buffer: Vec<u8>) {
        let Some(slot) = self.slots.get_mut(slot_index) else {
            return;
        };
        slot.staging = if buffer.len() == slot.volume.byte_len() {
            buffer
        } else {
            vec![0; slot.volume.byte_len()]
        };
    }

    fn stream(
        &mut self,
        camera: &StreamingCamera,
        frame_index: u32,
        renderer: &mut dyn ProbeRenderer,
    ) -> Result<FrameStatus, StreamingError> {
        let metadata = self.ensure_metadata()?;

        let load_everything = self.settings.mode == StreamingMode::LoadAll;
        let (window, components) = if load_everything {
            (StreamingWindow::whole(&metadata), &ShComponent::ALL[..])
        } else {
            let window =
                StreamingWindow::for_camera(camera, self.settings.budget.radius(), &metadata);
            if window.is_empty() {
                debug!("The camera is outside the probe dataset");
                return Ok(FrameStatus::Skipped);
            }
            (window, self.settings.bands.components())
        };

        let size = window.buffer_size(&metadata);
        let max = renderer.max_volume_extent();
        let limit = IVec3::splat(max.min(i32::MAX as u32) as i32);
        if size.cmpgt(limit).any() || size.cmplt(IVec3::ONE).any() {
            return Err(StreamingError::VolumeTooLarge { size, max });
        }

        let uniforms = self.uniforms(&metadata, &window, camera, frame_index);
        if self.allocate(size, components) {
            self.loaded_everything = false;
        }
        if load_everything && self.loaded_everything {
            renderer.push_uniforms(&uniforms);
            return Ok(FrameStatus::Unchanged);
        }

        let lines = plan::line_requests(&metadata, &window);
        let plans: Vec<(usize, PathBuf, Vec<StreamingRequest>)> = self
            .slots
            .iter()
            .enumerate()
            .map(|(slot_index, slot)| {
                let requests = if load_everything {
                    vec![plan::whole_component_request(&metadata, slot.component)]
                } else {
                    plan::component_requests(&metadata, slot.component, &lines)
                };
                let path = self.dataset_dir.join(slot.component.file_name());
                (slot_index, path, requests)
            })
            .collect();

        for (slot_index, _, requests) in &plans {
            io::validate_requests(requests, self.slots[*slot_index].volume.byte_len())?;
        }
        let files = plans
            .iter()
            .map(|(_, path, _)| self.files.get(path))
            .collect::<Result<Vec<_>, _>>()?;

        match self.settings.io {
            IoMode::Blocking => {
                for ((slot_index, path, requests), file) in plans.iter().zip(files) {
                    let staging = &mut self.slots[*slot_index].staging;
                    io::execute_requests(path, &file, requests, staging, None)?;
                }
                self.upload(renderer, &uniforms)?;
                if load_everything {
                    self.loaded_everything = true;
                }
                Ok(FrameStatus::Uploaded)
            }
            IoMode::Async => {
                let reads = plans
                    .into_iter()
                    .zip(files)
                    .map(|((slot_index, path, requests), file)| {
                        let staging = mem::take(&mut self.slots[slot_index].staging);
                        let handle = ReadHandle::issue(&self.pool, path, file, requests, staging);
                        (slot_index, handle)
                    })
                    .collect();
                self.pending = Some(PendingFrame {
                    reads,
                    uniforms,
                    loads_everything: load_everything,
                });
                Ok(FrameStatus::Pending)
            }
        }
    }

    fn ensure_metadata(&mut self) -> Result<DatasetMetadata, StreamingError> {
        if let (false, Some(metadata)) = (self.metadata_dirty, self.metadata) {
            return Ok(metadata);
        }

        let metadata = dataset::read_metadata(&self.dataset_dir)?;
        self.metadata = Some(metadata);
        self.metadata_dirty = false;
        self.loaded_everything = false;
        info!(
            "Loaded probe metadata from {}: {} probes",
            self.dataset_dir.display(),
            metadata.total_probe_count()
        );
        Ok(metadata)
    }

    fn uniforms(
        &self,
        metadata: &DatasetMetadata,
        window: &StreamingWindow,
        camera: &StreamingCamera,
        frame_index: u32,
    ) -> ShaderUniforms {
        let spacing = metadata.probe_spacing as f32;
        ShaderUniforms {
            volume_size: (window.box_max - window.box_min).as_vec3() + Vec3::splat(spacing),
            world_offset: (window.valid_min.as_vec3() - Vec3::splat(spacing * 0.5))
                .extend(self.settings.intensity),
            noise_frame_index: if camera.temporal_antialiasing {
                frame_index
            } else {
                0
            },
            sampling_noise: self.settings.sampling_noise,
        }
    }

    /// Makes sure there's a slot of `size` probes for each of `components`.
    /// Returns true if the slots were reallocated, which clears them.
    fn allocate(&mut self, size: IVec3, components: &[ShComponent]) -> bool {
        let unchanged = self.buffer_size == Some(size)
            && self.slots.len() == components.len()
            && self
                .slots
                .iter()
                .zip(components)
                .all(|(slot, component)| slot.component == *component);
        if unchanged {
            return false;
        }

        self.slots = components
            .iter()
            .map(|&component| {
                let volume = VolumeBuffer::new(size.as_uvec3(), VolumeFormat::Rgba16Float);
                ComponentSlot {
                    component,
                    staging: vec![0; volume.byte_len()],
                    volume,
                }
            })
            .collect();
        self.buffer_size = Some(size);
        debug!(
            "Allocated {} probe volumes of {} ({} bytes)",
            components.len(),
            size,
            self.resident_bytes()
        );
        true
    }

    fn upload(
        &mut self,
        renderer: &mut dyn ProbeRenderer,
        uniforms: &ShaderUniforms,
    ) -> Result<(), StreamingError> {
        for slot in &mut self.slots {
            slot.volume.update_from_bytes(&slot.staging)?;
            renderer.upload_volume(slot.component, &slot.volume);
        }
        renderer.push_uniforms(uniforms);
        Ok(())
    }

    fn report_failure(&mut self, err: &StreamingError) {
        let message = err.to_string();
        if self.last_failure.as_deref() != Some(message.as_str()) {
            error!("Probe streaming skipped a frame: {}", message);
            self.last_failure = Some(message);
        }
    }

    /// The last failure that was logged, until a frame succeeds.
    pub fn last_failure(&self) -> Option<&str> {
        self.last_failure.as_deref()
    }
}

impl Drop for StreamingEngine {
    fn drop(&mut self) {
        if let Some(pending) = &self.pending {
            for (_, handle) in &pending.reads {
                handle.cancel();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bake::{BakeContext, BakeSettings};
    use crate::grid::{GridSettings, ProbeVolume};
    use crate::light::LightSource;
    use glam::vec3;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingRenderer {
        max_extent: u32,
        uploads: HashMap<ShComponent, Vec<u8>>,
        upload_count: usize,
        uniforms: Vec<ShaderUniforms>,
    }

    impl ProbeRenderer for RecordingRenderer {
        fn max_volume_extent(&self) -> u32 {
            self.max_extent
        }

        fn upload_volume(&mut self, component: ShComponent, volume: &VolumeBuffer) {
            self.uploads.insert(component, volume.data().to_vec());
            self.upload_count += 1;
        }

        fn push_uniforms(&mut self, uniforms: &ShaderUniforms) {
            self.uniforms.push(*uniforms);
        }
    }

    fn renderer() -> RecordingRenderer {
        RecordingRenderer {
            max_extent: 2048,
            ..RecordingRenderer::default()
        }
    }

    fn baked_scene() -> (TempDir, PathBuf) {
        let scene = TempDir::new().unwrap();
        let mut context = BakeContext::new(scene.path(), GridSettings::new(2, 4));
        context.add_volume(ProbeVolume::new(Vec3::ZERO, Vec3::splat(16.0)));
        let light = LightSource::point(vec3(1.0, 3.0, -2.0), Vec3::ONE, 4.0, 20.0);
        let settings = BakeSettings {
            sample_count: 16,
            ..BakeSettings::default()
        };
        let report = context.bake(&[light], &settings).unwrap().unwrap();
        (scene, report.output_dir)
    }

    fn camera() -> StreamingCamera {
        StreamingCamera::looking_at(vec3(0.5, 0.5, 0.5), vec3(0.5, 0.5, -10.0), Vec3::Y)
    }

    #[test]
    fn settings_fill_in_defaults() {
        let settings: StreamingSettings =
            serde_json::from_str(r#"{ "budget": "High", "io": "Async" }"#).unwrap();
        assert_eq!(settings.budget, MemoryBudget::High);
        assert_eq!(settings.io, IoMode::Async);
        assert_eq!(settings.mode, StreamingMode::Streaming);
        assert_eq!(settings.intensity, 1.0);
        assert!(MemoryBudget::Low.radius() < MemoryBudget::Medium.radius());
        assert!(MemoryBudget::Medium.radius() < MemoryBudget::High.radius());
    }

    #[test]
    fn missing_metadata_skips_and_retries() {
        let scene = TempDir::new().unwrap();
        let dir = scene.path().join(crate::OUTPUT_DIR_NAME);
        let mut engine = StreamingEngine::new(&dir, StreamingSettings::default());
        let mut renderer = renderer();

        assert_eq!(engine.update(&camera(), 0, &mut renderer), FrameStatus::Skipped);
        let first_failure = engine.last_failure().map(str::to_owned);
        assert!(first_failure.is_some());
        assert_eq!(engine.update(&camera(), 1, &mut renderer), FrameStatus::Skipped);
        assert_eq!(engine.last_failure().map(str::to_owned), first_failure);
        assert!(renderer.uniforms.is_empty());

        let (_baked, baked_dir) = baked_scene();
        engine.on_scene_loaded(&baked_dir);
        assert_eq!(engine.update(&camera(), 2, &mut renderer), FrameStatus::Uploaded);
        assert!(engine.last_failure().is_none());
        assert_eq!(renderer.uploads.len(), 3);
    }

    #[test]
    fn streaming_uploads_every_frame() {
        let (_scene, dir) = baked_scene();
        let mut engine = StreamingEngine::new(&dir, StreamingSettings::default());
        let mut renderer = renderer();

        assert_eq!(engine.update(&camera(), 0, &mut renderer), FrameStatus::Uploaded);
        assert_eq!(engine.update(&camera(), 1, &mut renderer), FrameStatus::Uploaded);
        assert_eq!(renderer.upload_count, 6);

        let uniforms = renderer.uniforms[0];
        assert_eq!(uniforms.world_offset.w, 1.0);
        assert_eq!(uniforms.noise_frame_index, 0);
        assert_eq!(uniforms.volume_size.x, uniforms.volume_size.y);
        assert_eq!(uniforms.volume_size.y, uniforms.volume_size.z);

        let size = engine.volume(ShComponent::Ar).unwrap().size();
        let per_volume = size.x as usize * size.y as usize * size.z as usize * 8;
        assert_eq!(engine.resident_bytes(), per_volume * 3);
    }

    #[test]
    fn temporal_antialiasing_feeds_the_frame_index() {
        let (_scene, dir) = baked_scene();
        let mut engine = StreamingEngine::new(&dir, StreamingSettings::default());
        let mut renderer = renderer();
        let mut camera = camera();
        camera.temporal_antialiasing = true;
        engine.update(&camera, 42, &mut renderer);
        assert_eq!(renderer.uniforms[0].noise_frame_index, 42);
    }

    #[test]
    fn oversized_volumes_are_not_uploaded() {
        let (_scene, dir) = baked_scene();
        let mut engine = StreamingEngine::new(&dir, StreamingSettings::default());
        let mut renderer = RecordingRenderer {
            max_extent: 4,
            ..RecordingRenderer::default()
        };
        assert_eq!(engine.update(&camera(), 0, &mut renderer), FrameStatus::Skipped);
        assert_eq!(engine.update(&camera(), 1, &mut renderer), FrameStatus::Skipped);
        assert_eq!(renderer.upload_count, 0);
        assert!(renderer.uniforms.is_empty());
        assert!(engine.last_failure().unwrap().contains("limit"));
    }

    #[test]
    fn preview_cameras_are_ignored() {
        let (_scene, dir) = baked_scene();
        let mut engine = StreamingEngine::new(&dir, StreamingSettings::default());
        let mut renderer = renderer();
        let mut camera = camera();
        camera.kind = CameraKind::Preview;
        assert_eq!(engine.update(&camera, 0, &mut renderer), FrameStatus::Skipped);
        camera.kind = CameraKind::Reflection;
        assert_eq!(engine.update(&camera, 0, &mut renderer), FrameStatus::Skipped);
        assert!(engine.metadata().is_none());
    }

    #[test]
    fn load_all_reads_once() {
        let (_scene, dir) = baked_scene();
        let settings = StreamingSettings {
            mode: StreamingMode::LoadAll,
            ..StreamingSettings::default()
        };
        let mut engine = StreamingEngine::new(&dir, settings);
        let mut renderer = renderer();

        assert_eq!(engine.update(&camera(), 0, &mut renderer), FrameStatus::Uploaded);
        assert_eq!(renderer.upload_count, 7);
        assert_eq!(engine.update(&camera(), 1, &mut renderer), FrameStatus::Unchanged);
        assert_eq!(renderer.upload_count, 7);
        assert_eq!(renderer.uniforms.len(), 2);

        let metadata = *engine.metadata().unwrap();
        let size = engine.volume(ShComponent::C).unwrap().size();
        assert_eq!(size.as_ivec3(), metadata.probe_count_per_volume_axis);

        engine.mark_dirty();
        assert_eq!(engine.update(&camera(), 2, &mut renderer), FrameStatus::Uploaded);
        assert_eq!(renderer.upload_count, 14);
    }

    #[test]
    fn rebaked_datasets_are_reread_after_marking_dirty() {
        let (scene, dir) = baked_scene();
        let mut engine = StreamingEngine::new(&dir, StreamingSettings::default());
        let mut renderer = renderer();
        assert_eq!(engine.update(&camera(), 0, &mut renderer), FrameStatus::Uploaded);
        let before = renderer.uploads[&ShComponent::Ar].clone();

        let mut context = BakeContext::new(scene.path(), GridSettings::new(2, 4));
        context.add_volume(ProbeVolume::new(Vec3::ZERO, Vec3::splat(16.0)));
        let light = LightSource::point(vec3(1.0, 3.0, -2.0), Vec3::ONE, 50.0, 20.0);
        let settings = BakeSettings {
            sample_count: 16,
            ..BakeSettings::default()
        };
        context.bake(&[light], &settings).unwrap().unwrap();

        engine.mark_dirty();
        assert_eq!(engine.update(&camera(), 1, &mut renderer), FrameStatus::Uploaded);
        let after = renderer.uploads[&ShComponent::Ar].clone();
        assert_ne!(after, before);

        let mut fresh = StreamingEngine::new(&dir, StreamingSettings::default());
        let mut reference = self::renderer();
        assert_eq!(fresh.update(&camera(), 1, &mut reference), FrameStatus::Uploaded);
        assert_eq!(after, reference.uploads[&ShComponent::Ar]);
    }

    #[test]
    fn async_reads_upload_on_completion() {
        let (_scene, dir) = baked_scene();
        let settings = StreamingSettings {
            io: IoMode::Async,
            bands: ShBands::L2,
            ..StreamingSettings::default()
        };
        let mut engine = StreamingEngine::new(&dir, settings);
        let mut renderer = renderer();

        assert_eq!(engine.update(&camera(), 0, &mut renderer), FrameStatus::Pending);
        assert!(engine.pending_status().is_some());
        assert_eq!(renderer.upload_count, 0);
        assert!(engine.complete_pending(&mut renderer).unwrap());
        assert_eq!(renderer.upload_count, 7);
        assert_eq!(engine.pending_status(), None);

        let mut blocking = StreamingEngine::new(&dir, StreamingSettings {
            io: IoMode::Blocking,
            ..settings
        });
        let mut reference = self::renderer();
        blocking.update(&camera(), 0, &mut reference);
        assert_eq!(renderer.uploads, reference.uploads);
        assert_eq!(renderer.uniforms, reference.uniforms);
    }

    #[test]
    fn teardown_cancels_pending_reads() {
        let (_scene, dir) = baked_scene();
        let settings = StreamingSettings {
            io: IoMode::Async,
            ..StreamingSettings::default()
        };
        let mut engine = StreamingEngine::new(&dir, settings);
        let mut renderer = renderer();

        assert_eq!(engine.update(&camera(), 0, &mut renderer), FrameStatus::Pending);
        engine.teardown();
        assert_eq!(engine.pending_status(), None);
        assert!(!engine.complete_pending(&mut renderer).unwrap());
        assert_eq!(renderer.upload_count, 0);
        assert_eq!(engine.resident_bytes(), 0);
        assert!(engine.metadata().is_none());
    }
}
