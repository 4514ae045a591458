//! Board profiles and toolchain project configuration

/// Toolchain configuration for one board type
#[derive(Debug, Clone, Copy)]
pub struct BoardProfile {
    pub board_type: &'static str,
    pub platform: &'static str,
    pub board: &'static str,
    pub framework: &'static str,
    pub monitor_speed: &'static str,
}

/// Board used when an unrecognized board type is requested
pub const DEFAULT_BOARD: &str = "ESP32-C3";

const PROFILES: [BoardProfile; 3] = [
    BoardProfile {
        board_type: "ESP32-C3",
        platform: "espressif32",
        board: "esp32-c3-devkitm-1",
        framework: "espidf",
        monitor_speed: "115200",
    },
    BoardProfile {
        board_type: "ESP32",
        platform: "espressif32",
        board: "esp32dev",
        framework: "espidf",
        monitor_speed: "115200",
    },
    BoardProfile {
        board_type: "ESP32-S3",
        platform: "espressif32",
        board: "esp32-s3-devkitc-1",
        framework: "espidf",
        monitor_speed: "115200",
    },
];

/// Look up the profile for a board type, falling back to the default
/// profile for unknown boards. Unknown boards are never rejected.
pub fn profile_for(board_type: &str) -> &'static BoardProfile {
    PROFILES
        .iter()
        .find(|p| p.board_type == board_type)
        .or_else(|| PROFILES.iter().find(|p| p.board_type == DEFAULT_BOARD))
        .unwrap_or(&PROFILES[0])
}

/// Toolchain environment name derived from the board type
/// (lowercase, dashes stripped).
pub fn env_name(board_type: &str) -> String {
    board_type.to_lowercase().replace('-', "")
}

/// Render the toolchain project configuration for a board type.
pub fn platformio_ini(board_type: &str) -> String {
    let profile = profile_for(board_type);
    format!(
        "[env:{env}]\n\
         platform = {platform}\n\
         board = {board}\n\
         framework = {framework}\n\
         monitor_speed = {monitor_speed}\n\
         board_build.partitions = default.csv\n",
        env = env_name(board_type),
        platform = profile.platform,
        board = profile.board,
        framework = profile.framework,
        monitor_speed = profile.monitor_speed,
    )
}
