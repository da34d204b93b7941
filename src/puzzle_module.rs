use serde::Serialize;

use crate::replicated::Replicated;
use crate::types::{Authority, SlotTransform};

/// Identifies one level of one puzzle group in the pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ModuleKey {
    #[serde(rename = "puzzleIndex")]
    pub puzzle_index: usize,
    #[serde(rename = "levelIndex")]
    pub level_index: usize,
}

impl ModuleKey {
    pub fn new(puzzle_index: usize, level_index: usize) -> Self {
        Self {
            puzzle_index,
            level_index,
        }
    }
}

/// Initialize signal handed to the module's visual and gameplay children.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ModuleInit {
    pub key: ModuleKey,
    #[serde(rename = "routeIndex")]
    pub route_index: usize,
    #[serde(rename = "colorId")]
    pub color_id: String,
}

/// One placed puzzle level carrying its route color.
#[derive(Debug)]
pub struct PuzzleModule {
    key: ModuleKey,
    route_index: Option<usize>,
    transform: Option<SlotTransform>,
    active: bool,
    color: Replicated<String>,
    initialized_with: Option<String>,
}

impl PuzzleModule {
    pub fn new(key: ModuleKey, neutral_color_id: &str) -> Self {
        Self {
            key,
            route_index: None,
            transform: None,
            active: false,
            color: Replicated::new(neutral_color_id.to_string()),
            initialized_with: None,
        }
    }

    pub fn key(&self) -> ModuleKey {
        self.key
    }

    pub fn route_index(&self) -> Option<usize> {
        self.route_index
    }

    pub fn transform(&self) -> Option<SlotTransform> {
        self.transform
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn color_id(&self) -> &str {
        self.color.get()
    }

    pub fn color_version(&self) -> u64 {
        self.color.version()
    }

    /// Moves the module to an absolute slot and activates it.
    pub fn place(&mut self, route_index: usize, transform: SlotTransform) {
        self.route_index = Some(route_index);
        self.transform = Some(transform);
        self.active = true;
    }

    pub fn assign_color(&mut self, authority: Authority, color_id: &str) -> bool {
        self.color.set(authority, color_id.to_string())
    }

    pub fn apply_remote_color(&mut self, color_id: &str, version: u64) -> bool {
        self.color.apply_remote(color_id.to_string(), version)
    }

    /// Emits the initialize signal once the module is placed and colored.
    /// Re-initializing with the color already applied yields nothing.
    pub fn initialize(&mut self) -> Option<ModuleInit> {
        let route_index = self.route_index?;
        if !self.active || self.transform.is_none() {
            return None;
        }
        if self.initialized_with.as_deref() == Some(self.color.get().as_str()) {
            return None;
        }
        self.initialized_with = Some(self.color.get().clone());
        Some(ModuleInit {
            key: self.key,
            route_index,
            color_id: self.color.get().clone(),
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized_with.is_some()
    }

    /// Returns the module to its unplaced state so the world can be rebuilt.
    pub fn reset(&mut self, authority: Authority, neutral_color_id: &str) {
        if !authority.is_server() {
            return;
        }
        self.color.set(authority, neutral_color_id.to_string());
        self.route_index = None;
        self.transform = None;
        self.active = false;
        self.initialized_with = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn placed_module() -> PuzzleModule {
        let mut module = PuzzleModule::new(ModuleKey::new(2, 1), "white");
        module.place(3, SlotTransform::at(1.0, 0.0, 4.0));
        module
    }

    #[test]
    fn unplaced_module_does_not_initialize() {
        let mut module = PuzzleModule::new(ModuleKey::new(0, 0), "white");
        assert!(module.assign_color(Authority::Server, "red"));
        assert_eq!(module.initialize(), None);
    }

    #[test]
    fn initialize_is_idempotent_per_color() {
        let mut module = placed_module();
        module.assign_color(Authority::Server, "red");
        let init = module.initialize().expect("first initialize emits");
        assert_eq!(init.color_id, "red");
        assert_eq!(init.route_index, 3);
        assert_eq!(module.initialize(), None);

        module.assign_color(Authority::Server, "blue");
        let init = module.initialize().expect("new color re-initializes");
        assert_eq!(init.color_id, "blue");
    }

    #[test]
    fn client_cannot_recolor_module() {
        let mut module = placed_module();
        assert!(!module.assign_color(Authority::Client(1), "red"));
        assert_eq!(module.color_id(), "white");
    }

    #[test]
    fn reset_rearms_initialize() {
        let mut module = placed_module();
        module.assign_color(Authority::Server, "green");
        assert!(module.initialize().is_some());

        module.reset(Authority::Server, "white");
        assert!(!module.is_active());
        assert!(!module.is_initialized());
        assert_eq!(module.color_id(), "white");

        module.place(0, SlotTransform::at(0.0, 0.0, 0.0));
        module.assign_color(Authority::Server, "green");
        assert!(module.initialize().is_some());
    }
}
