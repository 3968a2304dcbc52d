use std::collections::HashMap;

use anyhow::{anyhow, Result};
use log::{info, warn};

/// External libraries some renderers depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LibraryId {
    /// Milkdrop-style music visualiser.
    MusicVisualiser,
    /// 3D scene toolkit.
    SceneToolkit,
}

impl LibraryId {
    fn assets(&self) -> &'static [&'static str] {
        match self {
            LibraryId::MusicVisualiser => &["visualiser-core", "visualiser-presets"],
            LibraryId::SceneToolkit => &["scene-toolkit"],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadState {
    NotLoaded,
    Loading,
    Loaded,
}

/// Fetches library assets and answers the capability probe afterwards.
/// The production host plugs its asset pipeline in here.
pub trait AssetProvider: Send {
    fn fetch(&mut self, asset: &str) -> Result<()>;
    /// Capability predicate: did the fetched assets actually expose the
    /// library entry points?
    fn verify(&mut self, id: LibraryId) -> bool;
}

/// Provider for hosts that bundle every library with the build.
pub struct BundledAssets;

impl AssetProvider for BundledAssets {
    fn fetch(&mut self, _asset: &str) -> Result<()> {
        Ok(())
    }
    fn verify(&mut self, _id: LibraryId) -> bool {
        true
    }
}

/// Idempotent on-demand library activation.
///
/// `ensure` is a no-op once a library is loaded; a failed load resets the
/// state so a later call retries. Assets load sequentially and the
/// capability probe gates the `Loaded` state.
pub struct LibraryLoader {
    provider: Box<dyn AssetProvider>,
    states: HashMap<LibraryId, LoadState>,
}

impl LibraryLoader {
    pub fn new(provider: Box<dyn AssetProvider>) -> Self {
        Self {
            provider,
            states: HashMap::new(),
        }
    }

    pub fn bundled() -> Self {
        Self::new(Box::new(BundledAssets))
    }

    pub fn is_loaded(&self, id: LibraryId) -> bool {
        self.states.get(&id) == Some(&LoadState::Loaded)
    }

    pub fn ensure(&mut self, id: LibraryId) -> Result<()> {
        match self.states.get(&id) {
            Some(LoadState::Loaded) => return Ok(()),
            Some(LoadState::Loading) => {
                // Re-entered while a load is in flight; the caller joins it.
                return Err(anyhow!("Library {:?} load already in flight", id));
            }
            _ => {}
        }
        self.states.insert(id, LoadState::Loading);
        for asset in id.assets() {
            if let Err(e) = self.provider.fetch(asset) {
                warn!("Library {:?} asset {} failed: {}", id, asset, e);
                self.states.insert(id, LoadState::NotLoaded);
                return Err(e);
            }
        }
        if !self.provider.verify(id) {
            self.states.insert(id, LoadState::NotLoaded);
            return Err(anyhow!("Library {:?} failed its capability probe", id));
        }
        info!("Library {:?} loaded", id);
        self.states.insert(id, LoadState::Loaded);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct CountingProvider {
        fetches: Arc<Mutex<usize>>,
        fail_first: bool,
    }

    impl AssetProvider for CountingProvider {
        fn fetch(&mut self, _asset: &str) -> Result<()> {
            let mut n = self.fetches.lock().unwrap();
            *n += 1;
            if self.fail_first && *n == 1 {
                return Err(anyhow!("asset store unreachable"));
            }
            Ok(())
        }
        fn verify(&mut self, _id: LibraryId) -> bool {
            true
        }
    }

    #[test]
    fn ensure_is_idempotent() {
        let fetches = Arc::new(Mutex::new(0));
        let mut loader = LibraryLoader::new(Box::new(CountingProvider {
            fetches: fetches.clone(),
            fail_first: false,
        }));
        loader.ensure(LibraryId::MusicVisualiser).unwrap();
        loader.ensure(LibraryId::MusicVisualiser).unwrap();
        assert!(loader.is_loaded(LibraryId::MusicVisualiser));
        // Two assets, fetched once.
        assert_eq!(*fetches.lock().unwrap(), 2);
    }

    #[test]
    fn failed_load_retries_on_next_call() {
        let fetches = Arc::new(Mutex::new(0));
        let mut loader = LibraryLoader::new(Box::new(CountingProvider {
            fetches: fetches.clone(),
            fail_first: true,
        }));
        assert!(loader.ensure(LibraryId::MusicVisualiser).is_err());
        assert!(!loader.is_loaded(LibraryId::MusicVisualiser));
        loader.ensure(LibraryId::MusicVisualiser).unwrap();
        assert!(loader.is_loaded(LibraryId::MusicVisualiser));
    }
}
