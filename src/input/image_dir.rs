// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 图片目录视频源 (离线回放)
//!
//! URI 形如 `file:///data/cam1` 或直接给目录路径; 目录内图片按文件名排序循环播放。

use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use image::RgbImage;

use super::source::{FrameSource, SourceConnector};

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

pub struct ImageDirConnector {
    frame_interval: Duration,
    looping: bool,
}

impl ImageDirConnector {
    pub fn new(fps: f64, looping: bool) -> Self {
        let frame_interval = if fps > 0.0 {
            Duration::from_secs_f64(1.0 / fps)
        } else {
            Duration::ZERO
        };
        Self {
            frame_interval,
            looping,
        }
    }
}

impl Default for ImageDirConnector {
    fn default() -> Self {
        Self::new(25.0, true)
    }
}

impl SourceConnector for ImageDirConnector {
    fn open(&self, uri: &str) -> anyhow::Result<Box<dyn FrameSource>> {
        let dir = dir_from_uri(uri)?;
        let files = list_images(&dir)?;
        if files.is_empty() {
            bail!("no images in {}", dir.display());
        }
        Ok(Box::new(ImageDirSource {
            files,
            index: 0,
            looping: self.looping,
            frame_interval: self.frame_interval,
            next_due: None,
        }))
    }
}

fn dir_from_uri(uri: &str) -> anyhow::Result<PathBuf> {
    if let Some(path) = uri.strip_prefix("file://") {
        return Ok(PathBuf::from(path));
    }
    if let Some((scheme, _)) = uri.split_once("://") {
        bail!("unsupported source scheme '{}'", scheme);
    }
    Ok(PathBuf::from(uri))
}

fn list_images(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("cannot read {}", dir.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}

struct ImageDirSource {
    files: Vec<PathBuf>,
    index: usize,
    looping: bool,
    frame_interval: Duration,
    next_due: Option<Instant>,
}

impl FrameSource for ImageDirSource {
    fn read_frame(&mut self) -> anyhow::Result<RgbImage> {
        // 按帧率节拍阻塞, 模拟实时流
        if let Some(due) = self.next_due {
            let now = Instant::now();
            if due > now {
                thread::sleep(due - now);
            }
        }
        self.next_due = Some(Instant::now() + self.frame_interval);

        if self.index >= self.files.len() {
            if !self.looping {
                bail!("end of image sequence");
            }
            self.index = 0;
        }
        let path = &self.files[self.index];
        self.index += 1;
        let img = image::open(path).with_context(|| format!("decode {}", path.display()))?;
        Ok(img.to_rgb8())
    }
}
