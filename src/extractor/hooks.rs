/// Optional lifecycle callbacks for a signal extractor
#[derive(Default)]
pub struct Hooks {
    pub(super) on_start: Option<Box<dyn FnMut()>>,
    pub(super) on_pause: Option<Box<dyn FnMut()>>,
    pub(super) on_end: Option<Box<dyn FnMut()>>,
    pub(super) on_update: Option<Box<dyn FnMut(f32)>>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs on the first transition into playing
    pub fn on_start(mut self, hook: impl FnMut() + 'static) -> Self {
        self.on_start = Some(Box::new(hook));
        self
    }

    pub fn on_pause(mut self, hook: impl FnMut() + 'static) -> Self {
        self.on_pause = Some(Box::new(hook));
        self
    }

    pub fn on_end(mut self, hook: impl FnMut() + 'static) -> Self {
        self.on_end = Some(Box::new(hook));
        self
    }

    /// Receives the level (0..=1) every frame while playing
    pub fn on_update(mut self, hook: impl FnMut(f32) + 'static) -> Self {
        self.on_update = Some(Box::new(hook));
        self
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("on_start", &self.on_start.is_some())
            .field("on_pause", &self.on_pause.is_some())
            .field("on_end", &self.on_end.is_some())
            .field("on_update", &self.on_update.is_some())
            .finish()
    }
}
