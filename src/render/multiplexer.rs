use std::collections::HashMap;

use anyhow::Result;
use log::{info, warn};

use crate::render::backends::create_backend;
use crate::render::library::LibraryLoader;
use crate::render::{Canvas, Renderer, RendererKind};

pub type BackendFactory = Box<dyn FnMut(RendererKind) -> Box<dyn Renderer> + Send>;

/// Exclusive active-renderer policy.
///
/// Backends are constructed lazily on first selection and retained;
/// switching stops everything else, toggles canvas visibility and starts
/// the target. At most one canvas is visible at any time, switch failures
/// included: all fallible work (library activation, construction) happens
/// before the previous renderer is disturbed.
pub struct RendererMux {
    factory: BackendFactory,
    loader: LibraryLoader,
    backends: HashMap<RendererKind, Box<dyn Renderer>>,
    canvases: HashMap<RendererKind, Canvas>,
    active: Option<RendererKind>,
    viewport: (u32, u32),
}

impl RendererMux {
    pub fn new(loader: LibraryLoader) -> Self {
        Self::with_factory(loader, Box::new(create_backend))
    }

    pub fn with_factory(loader: LibraryLoader, factory: BackendFactory) -> Self {
        Self {
            factory,
            loader,
            backends: HashMap::new(),
            canvases: HashMap::new(),
            active: None,
            viewport: (1280, 720),
        }
    }

    pub fn active(&self) -> Option<RendererKind> {
        self.active
    }

    pub fn active_backend(&mut self) -> Option<&mut (dyn Renderer + '_)> {
        let kind = self.active?;
        match self.backends.get_mut(&kind) {
            Some(b) => Some(&mut **b),
            None => None,
        }
    }

    pub fn backend(&mut self, kind: RendererKind) -> Option<&mut (dyn Renderer + '_)> {
        match self.backends.get_mut(&kind) {
            Some(b) => Some(&mut **b),
            None => None,
        }
    }

    pub fn is_constructed(&self, kind: RendererKind) -> bool {
        self.backends.contains_key(&kind)
    }

    /// Canvases currently visible; the invariant holds this at 0 or 1.
    pub fn visible_count(&self) -> usize {
        self.canvases.values().filter(|c| c.visible).count()
    }

    pub fn canvas(&self, kind: RendererKind) -> Option<Canvas> {
        self.canvases.get(&kind).copied()
    }

    /// Switches to `kind`. On failure the previous renderer keeps running
    /// and its canvas stays visible.
    pub fn switch(&mut self, kind: RendererKind) -> Result<()> {
        if self.active == Some(kind) {
            return Ok(());
        }
        if let Some(library) = kind.required_library() {
            if let Err(e) = self.loader.ensure(library) {
                warn!("Keeping {:?} active: {}", self.active, e);
                return Err(e);
            }
        }
        if !self.backends.contains_key(&kind) {
            let mut backend = (self.factory)(kind);
            backend.initialise()?;
            self.backends.insert(kind, backend);
        }

        // Point of no return: everything fallible is done.
        for (k, backend) in self.backends.iter_mut() {
            if *k != kind {
                backend.stop();
            }
        }
        for canvas in self.canvases.values_mut() {
            canvas.visible = false;
        }

        let canvas = self.canvases.entry(kind).or_insert_with(Canvas::hidden);
        canvas.width = self.viewport.0;
        canvas.height = self.viewport.1;
        canvas.visible = true;
        let backend = self.backends.get_mut(&kind).expect("constructed above");
        backend.resize(self.viewport.0, self.viewport.1);
        backend.start();
        self.active = Some(kind);
        info!("Renderer switched to {:?}", kind);
        Ok(())
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.viewport = (width, height);
        if let Some(kind) = self.active {
            if let Some(canvas) = self.canvases.get_mut(&kind) {
                canvas.width = width;
                canvas.height = height;
            }
            if let Some(backend) = self.backends.get_mut(&kind) {
                backend.resize(width, height);
            }
        }
    }

    /// Graphics context lost: halt the active renderer but keep the mode.
    pub fn suspend_active(&mut self) {
        if let Some(kind) = self.active {
            if let Some(backend) = self.backends.get_mut(&kind) {
                backend.stop();
            }
            if let Some(canvas) = self.canvases.get_mut(&kind) {
                canvas.visible = false;
            }
            warn!("Renderer {:?} suspended", kind);
        }
    }

    /// Graphics context restored: reinitialise and restart the active
    /// renderer without changing the mode.
    pub fn resume_active(&mut self) -> Result<()> {
        if let Some(kind) = self.active {
            if let Some(backend) = self.backends.get_mut(&kind) {
                backend.initialise()?;
                backend.resize(self.viewport.0, self.viewport.1);
                backend.start();
            }
            if let Some(canvas) = self.canvases.get_mut(&kind) {
                canvas.visible = true;
            }
            info!("Renderer {:?} resumed", kind);
        }
        Ok(())
    }

    pub fn dispose_all(&mut self) {
        for backend in self.backends.values_mut() {
            backend.stop();
            backend.dispose();
        }
        for canvas in self.canvases.values_mut() {
            canvas.visible = false;
        }
        self.active = None;
    }
}
