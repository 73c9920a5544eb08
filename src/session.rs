//! Versioned layer store shared between a build thread and its readers.
//!
//! The slot holding the current [`LayerStore`] is the only shared mutable
//! state. It is written once per completed build, and only by the build that
//! is still the newest; readers clone the `Arc` and never see a partial store.

use crate::mesh::BuildBounds;
use crate::settings::SlicingSettings;
use crate::slicing::{LayerPipeline, LayerStore, SliceSource};
use crate::{Error, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::JoinHandle;

#[derive(Debug, Default)]
pub struct SliceSession {
    slot: RwLock<Option<Arc<LayerStore>>>,
    generation: AtomicU64,
}

impl SliceSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recently published store, if any.
    pub fn current(&self) -> Option<Arc<LayerStore>> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Generation of the newest build started so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Abandon any in-flight build without touching the published store.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Cancel in-flight builds and drop the published store.
    pub fn invalidate(&self) {
        self.cancel();
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = None;
        log::debug!("Layer store invalidated");
    }

    /// Build a store for `source` and publish it.
    ///
    /// Starting a rebuild supersedes every older build. When the fingerprint
    /// matches the published store, that store is returned as is. A build
    /// that was superseded while running returns [`Error::Cancelled`] and
    /// publishes nothing.
    pub fn rebuild<S: SliceSource + ?Sized>(
        &self,
        source: &S,
        settings: &SlicingSettings,
        bounds: &BuildBounds,
    ) -> Result<Arc<LayerStore>> {
        let pipeline = LayerPipeline::new(settings.clone())?;
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;

        let fingerprint = pipeline.fingerprint(source, bounds);
        if let Some(current) = self.current() {
            if current.fingerprint() == fingerprint {
                log::info!("Layer store unchanged (fingerprint {:016x}), reusing", fingerprint);
                return Ok(current);
            }
        }

        let store = Arc::new(pipeline.build_with_cancel(source, bounds, &self.generation, generation)?);

        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        if self.generation.load(Ordering::Acquire) != generation {
            log::info!("Discarding superseded build (generation {})", generation);
            return Err(Error::Cancelled);
        }
        *slot = Some(Arc::clone(&store));
        log::debug!("Published layer store generation {}", generation);
        Ok(store)
    }

    /// Run [`SliceSession::rebuild`] on a background thread.
    pub fn spawn_rebuild<S>(
        self: &Arc<Self>,
        source: Arc<S>,
        settings: SlicingSettings,
        bounds: BuildBounds,
    ) -> JoinHandle<Result<Arc<LayerStore>>>
    where
        S: SliceSource + ?Sized + 'static,
    {
        let session = Arc::clone(self);
        std::thread::spawn(move || session.rebuild(source.as_ref(), &settings, &bounds))
    }
}
