//! Small persisted front-end config: the last `--dskN` disk-image
//! associations and the NTSC/PAL default, keyed the same way the cartridge
//! loader keys its `.ram` sidecar path.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Serialize, Deserialize, Default)]
pub struct Config {
    pub dsk1: Option<String>,
    pub dsk2: Option<String>,
    pub dsk3: Option<String>,
    pub pal: bool,
}

impl Config {
    pub fn load() -> Self {
        let Some(path) = config_path() else {
            return Self::default();
        };
        std::fs::read_to_string(path)
            .ok()
            .and_then(|text| toml::from_str(&text).ok())
            .unwrap_or_default()
    }

    pub fn save(&self) {
        let Some(path) = config_path() else { return };
        if let Ok(text) = toml::to_string_pretty(self) {
            let _ = std::fs::write(path, text);
        }
    }
}

fn config_path() -> Option<PathBuf> {
    let dir = dirs::config_dir()?.join("ti99sim");
    let _ = std::fs::create_dir_all(&dir);
    Some(dir.join("emulator.toml"))
}
