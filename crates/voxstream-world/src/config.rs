use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use voxstream_runtime::RuntimeConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct StreamConfig {
    #[serde(default)]
    pub chunk: ChunkParams,
    #[serde(default)]
    pub streaming: StreamingParams,
    #[serde(default)]
    pub threading: ThreadingParams,
    #[serde(default)]
    pub lod: LodParams,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ChunkParams {
    #[serde(default = "default_chunk_size")]
    pub size: usize,
    #[serde(default = "default_stack_height")]
    pub stack_height: usize,
}
fn default_chunk_size() -> usize {
    16
}
fn default_stack_height() -> usize {
    8
}
impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            size: default_chunk_size(),
            stack_height: default_stack_height(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct StreamingParams {
    #[serde(default = "default_visible_radius")]
    pub visible_radius: i32,
    #[serde(default = "default_cached_radius")]
    pub cached_radius: i32,
    #[serde(default = "default_true")]
    pub infinite_world: bool,
    /// Chunk-grid half extent when `infinite_world` is off.
    #[serde(default = "default_world_radius")]
    pub world_radius: i32,
    #[serde(default = "default_max_new_chunks")]
    pub max_new_chunks_per_tick: usize,
    #[serde(default)]
    pub persistence: bool,
    #[serde(default = "default_save_dir")]
    pub save_dir: PathBuf,
}
fn default_visible_radius() -> i32 {
    6
}
fn default_cached_radius() -> i32 {
    7
}
fn default_true() -> bool {
    true
}
fn default_world_radius() -> i32 {
    32
}
fn default_max_new_chunks() -> usize {
    8
}
fn default_save_dir() -> PathBuf {
    PathBuf::from("world")
}
impl Default for StreamingParams {
    fn default() -> Self {
        Self {
            visible_radius: default_visible_radius(),
            cached_radius: default_cached_radius(),
            infinite_world: true,
            world_radius: default_world_radius(),
            max_new_chunks_per_tick: default_max_new_chunks(),
            persistence: false,
            save_dir: default_save_dir(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ThreadingParams {
    #[serde(default = "default_true")]
    pub multithreading: bool,
    #[serde(default = "default_true")]
    pub io_thread: bool,
    /// 0 = one per logical core, minus one for the driver.
    #[serde(default)]
    pub compute_threads: usize,
}
impl Default for ThreadingParams {
    fn default() -> Self {
        Self {
            multithreading: true,
            io_thread: true,
            compute_threads: 0,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct LodParams {
    #[serde(default)]
    pub forced_lod: Option<u8>,
    #[serde(default = "default_lod_coefficient")]
    pub lod_coefficient: f32,
    /// Only build geometry once every neighbor slot of a section is occupied.
    #[serde(default)]
    pub require_full_neighborhood: bool,
}
fn default_lod_coefficient() -> f32 {
    1.0
}
impl Default for LodParams {
    fn default() -> Self {
        Self {
            forced_lod: None,
            lod_coefficient: default_lod_coefficient(),
            require_full_neighborhood: false,
        }
    }
}

/// The subset of the config that shapes the clipmap; safe to change at runtime.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewParams {
    pub visible_radius: i32,
    pub cached_radius: i32,
    pub forced_lod: Option<u8>,
    pub lod_coefficient: f32,
}

impl StreamConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: StreamConfig = toml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let size = self.chunk.size;
        if !size.is_power_of_two() || !(4..=16).contains(&size) {
            return Err(ConfigError::Invalid(format!(
                "chunk.size must be a power of two between 4 and 16, got {size}"
            )));
        }
        if !(1..=64).contains(&self.chunk.stack_height) {
            return Err(ConfigError::Invalid(format!(
                "chunk.stack_height must be in 1..=64, got {}",
                self.chunk.stack_height
            )));
        }
        self.view().validate(size)?;
        if self.streaming.world_radius < 0 {
            return Err(ConfigError::Invalid(
                "streaming.world_radius must not be negative".into(),
            ));
        }
        if self.streaming.max_new_chunks_per_tick == 0 {
            return Err(ConfigError::Invalid(
                "streaming.max_new_chunks_per_tick must be at least 1".into(),
            ));
        }
        Ok(())
    }

    #[inline]
    pub fn section_volume(&self) -> usize {
        self.chunk.size * self.chunk.size * self.chunk.size
    }

    #[inline]
    pub fn chunk_height(&self) -> usize {
        self.chunk.size * self.chunk.stack_height
    }

    pub fn view(&self) -> ViewParams {
        ViewParams {
            visible_radius: self.streaming.visible_radius,
            cached_radius: self.streaming.cached_radius,
            forced_lod: self.lod.forced_lod,
            lod_coefficient: self.lod.lod_coefficient,
        }
    }

    pub fn runtime(&self) -> RuntimeConfig {
        RuntimeConfig {
            multithreading: self.threading.multithreading,
            io_thread: self.threading.io_thread,
            compute_threads: self.threading.compute_threads,
        }
    }
}

impl ViewParams {
    pub fn validate(&self, chunk_size: usize) -> Result<(), ConfigError> {
        if self.visible_radius < 0 {
            return Err(ConfigError::Invalid(
                "visible_radius must not be negative".into(),
            ));
        }
        if self.cached_radius < self.visible_radius {
            return Err(ConfigError::Invalid(format!(
                "cached_radius ({}) must be at least visible_radius ({})",
                self.cached_radius, self.visible_radius
            )));
        }
        if !(self.lod_coefficient > 0.0) {
            return Err(ConfigError::Invalid(
                "lod_coefficient must be positive".into(),
            ));
        }
        let max_lod = chunk_size.trailing_zeros();
        match self.forced_lod {
            Some(lod) if u32::from(lod) > max_lod => Err(ConfigError::Invalid(format!(
                "forced_lod {lod} exceeds log2(chunk size) = {max_lod}"
            ))),
            _ => Ok(()),
        }
    }
}

pub fn load_config_from_path(path: &Path) -> Result<StreamConfig, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    StreamConfig::from_toml_str(&text)
}
