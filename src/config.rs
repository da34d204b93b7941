use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::color_catalog::ColorCatalog;
use crate::constants::{END_SCREEN_SECONDS, LOBBY_COUNTDOWN_SECONDS, LOBBY_MAX_PLAYERS};
use crate::host::HostOptions;
use crate::types::ColorIdentity;
use crate::world::WorldLayout;

const DEFAULT_PORT: u16 = 8080;

#[derive(Clone, Debug, PartialEq)]
pub struct ServerConfig {
    pub port: u16,
    pub match_seed: Option<u32>,
    pub layout_path: Option<PathBuf>,
    pub palette_path: Option<PathBuf>,
    pub lobby_max_players: usize,
    pub lobby_countdown_seconds: u32,
    pub screen_fades: bool,
    pub end_screen_seconds: u32,
    pub engine_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            match_seed: None,
            layout_path: None,
            palette_path: None,
            lobby_max_players: LOBBY_MAX_PLAYERS,
            lobby_countdown_seconds: LOBBY_COUNTDOWN_SECONDS,
            screen_fades: true,
            end_screen_seconds: END_SCREEN_SECONDS,
            engine_token: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unparseable values fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            port: parse_var(&lookup, "PORT").unwrap_or(defaults.port),
            match_seed: parse_var(&lookup, "MATCH_SEED"),
            layout_path: lookup("WORLD_LAYOUT_PATH").map(PathBuf::from),
            palette_path: lookup("PALETTE_PATH").map(PathBuf::from),
            lobby_max_players: parse_var(&lookup, "LOBBY_MAX_PLAYERS")
                .filter(|value: &usize| *value > 0)
                .unwrap_or(defaults.lobby_max_players),
            lobby_countdown_seconds: parse_var(&lookup, "LOBBY_COUNTDOWN_SECONDS")
                .unwrap_or(defaults.lobby_countdown_seconds),
            screen_fades: lookup("SCREEN_FADES")
                .and_then(|value| parse_flag(&value))
                .unwrap_or(defaults.screen_fades),
            end_screen_seconds: parse_var(&lookup, "END_SCREEN_SECONDS")
                .unwrap_or(defaults.end_screen_seconds),
            engine_token: lookup("ENGINE_TOKEN")
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
        }
    }

    pub fn host_options(&self, seed: u32) -> HostOptions {
        HostOptions {
            seed,
            screen_fades: self.screen_fades,
            lobby_max_players: self.lobby_max_players,
            lobby_countdown_seconds: self.lobby_countdown_seconds,
            end_screen_ms: self.end_screen_seconds as u64 * 1_000,
            engine_token: self.engine_token.clone(),
        }
    }

    pub fn load_layout(&self) -> Result<WorldLayout> {
        match &self.layout_path {
            Some(path) => load_layout(path),
            None => Ok(WorldLayout::builtin()),
        }
    }

    pub fn load_catalog(&self) -> Result<ColorCatalog> {
        match &self.palette_path {
            Some(path) => load_catalog(path),
            None => Ok(ColorCatalog::builtin()),
        }
    }
}

pub fn load_layout(path: &Path) -> Result<WorldLayout> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read world layout {}", path.display()))?;
    let layout: WorldLayout = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse world layout {}", path.display()))?;
    if let Err(err) = layout.validate() {
        warn!(%err, path = %path.display(), "world layout cannot produce a build");
    }
    info!(
        path = %path.display(),
        routes = layout.routes.len(),
        groups = layout.puzzle_groups.len(),
        "world layout loaded"
    );
    Ok(layout)
}

pub fn load_catalog(path: &Path) -> Result<ColorCatalog> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read palette {}", path.display()))?;
    let entries: Vec<ColorIdentity> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse palette {}", path.display()))?;
    let catalog = ColorCatalog::new(entries)
        .with_context(|| format!("invalid palette {}", path.display()))?;
    info!(path = %path.display(), colors = catalog.len(), "palette loaded");
    Ok(catalog)
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|value| value.trim().parse::<T>().ok())
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "between-server-{}-{name}",
            std::process::id()
        ));
        fs::write(&path, contents).expect("temp file written");
        path
    }

    #[test]
    fn empty_environment_uses_defaults() {
        assert_eq!(config_from(&[]), ServerConfig::default());
    }

    #[test]
    fn environment_overrides_are_parsed() {
        let config = config_from(&[
            ("PORT", "9000"),
            ("MATCH_SEED", "1234"),
            ("LOBBY_MAX_PLAYERS", "6"),
            ("LOBBY_COUNTDOWN_SECONDS", "3"),
            ("SCREEN_FADES", "off"),
            ("WORLD_LAYOUT_PATH", "/tmp/layout.json"),
        ]);
        assert_eq!(config.port, 9000);
        assert_eq!(config.match_seed, Some(1234));
        assert_eq!(config.lobby_max_players, 6);
        assert_eq!(config.lobby_countdown_seconds, 3);
        assert!(!config.screen_fades);
        assert_eq!(config.layout_path, Some(PathBuf::from("/tmp/layout.json")));
        assert_eq!(config.host_options(7).end_screen_ms, 10_000);
    }

    #[test]
    fn invalid_values_fall_back() {
        let config = config_from(&[
            ("PORT", "eighty"),
            ("MATCH_SEED", "-1"),
            ("LOBBY_MAX_PLAYERS", "0"),
            ("SCREEN_FADES", "maybe"),
        ]);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.match_seed, None);
        assert_eq!(config.lobby_max_players, LOBBY_MAX_PLAYERS);
        assert!(config.screen_fades);
    }

    #[test]
    fn engine_token_reaches_host_options() {
        let config = config_from(&[("ENGINE_TOKEN", " s3cret ")]);
        assert_eq!(config.engine_token.as_deref(), Some("s3cret"));
        assert_eq!(
            config.host_options(1).engine_token.as_deref(),
            Some("s3cret")
        );
        assert_eq!(config_from(&[("ENGINE_TOKEN", "  ")]).engine_token, None);
    }

    #[test]
    fn palette_file_is_validated() {
        let path = temp_file(
            "palette.json",
            r#"[{"id":"red","rgba":[1,0,0,1],"intensity":2,"meshVariant":"prism"}]"#,
        );
        let err = load_catalog(&path).expect_err("palette without neutral is rejected");
        assert!(format!("{err:#}").contains("no neutral"));
        let _ = fs::remove_file(path);
    }

    #[test]
    fn layout_file_is_parsed() {
        let path = temp_file(
            "layout.json",
            r#"{
                "routes": [],
                "puzzleGroups": [{"name": "maze", "levels": ["a", "b", "c", "d"]}],
                "spawnPoints": [{"position": [0, 0, 5]}],
                "center": {"position": [0, 0, 0], "yawDegrees": 0, "scale": 2}
            }"#,
        );
        let layout = load_layout(&path).expect("layout parses");
        assert_eq!(layout.puzzle_groups.len(), 1);
        assert_eq!(layout.spawn_points[0].scale, 1.0);
        assert_eq!(layout.center.scale, 2.0);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn missing_layout_file_reports_path() {
        let err = load_layout(Path::new("/nonexistent/layout.json")).expect_err("missing file");
        assert!(err.to_string().contains("/nonexistent/layout.json"));
    }
}
