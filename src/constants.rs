pub const TICK_RATE: u32 = 20;
pub const TICK_MS: u64 = 1000 / TICK_RATE as u64;

pub const ROUTE_COUNT: usize = 4;
pub const LEVEL_COUNT: usize = 4;
pub const PLACEMENT_COUNT: usize = ROUTE_COUNT * LEVEL_COUNT;

/// Byte limit of a color id on the wire.
pub const COLOR_ID_MAX_BYTES: usize = 32;

pub const NEUTRAL_COLOR_ID: &str = "white";
pub const DEFAULT_ROUTE_COLOR_IDS: [&str; ROUTE_COUNT] = ["yellow", "blue", "red", "green"];

pub const MENU_SCENE: &str = "MenuScene";
pub const GAME_SCENE: &str = "GameScene";

pub const LOBBY_MAX_PLAYERS: usize = 4;
pub const LOBBY_COUNTDOWN_SECONDS: u32 = 5;

pub const LOCAL_FADE_OUT_DELAY_MS: u64 = 1_000;
pub const END_SCREEN_SECONDS: u32 = 10;

pub const PLAYER_NAME_MAX_CHARS: usize = 16;

pub fn route_name(route_index: usize) -> &'static str {
    match route_index {
        0 => "north",
        1 => "east",
        2 => "south",
        3 => "west",
        _ => "unknown",
    }
}
