// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 标注: 跟踪框 + 标签 + 表头, 以及断线/无信号占位帧

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use chrono::{DateTime, Local};
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut,
};
use imageproc::rect::Rect;
use tracing::{info, warn};

use crate::detection::{LabelSet, TrackView};

const ALERT_COLOR: Rgb<u8> = Rgb([230, 40, 40]);
const NORMAL_COLOR: Rgb<u8> = Rgb([40, 200, 60]);
const UNKNOWN_COLOR: Rgb<u8> = Rgb([150, 150, 150]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const HEADER_BG: Rgb<u8> = Rgb([20, 20, 20]);

const LABEL_SCALE: f32 = 18.0;
const HEADER_SCALE: f32 = 20.0;

pub struct Annotator {
    font: Option<FontVec>,
}

impl Annotator {
    /// 字体加载失败时仍然画框, 只是不写字
    pub fn new(font_path: Option<&Path>) -> Self {
        let font = font_path.and_then(|path| {
            let bytes = match std::fs::read(path) {
                Ok(b) => b,
                Err(e) => {
                    warn!("⚠️  字体读取失败 {}: {}", path.display(), e);
                    return None;
                }
            };
            match FontVec::try_from_vec(bytes) {
                Ok(font) => {
                    info!("🔤 标注字体: {}", path.display());
                    Some(font)
                }
                Err(e) => {
                    warn!("⚠️  字体解析失败 {}: {}", path.display(), e);
                    None
                }
            }
        });
        Self { font }
    }

    pub fn without_font() -> Self {
        Self { font: None }
    }

    /// 在帧的拷贝上画出所有跟踪框与表头
    pub fn annotate(
        &self,
        frame: &RgbImage,
        camera_name: &str,
        fps: f64,
        tracks: &[TrackView],
        labels: &LabelSet,
    ) -> RgbImage {
        let mut canvas = frame.clone();
        for track in tracks {
            let color = fade(label_color(&track.label, labels), track.missed);
            self.draw_track(&mut canvas, track, color);
        }
        self.draw_header(&mut canvas, &format!("{} | {:.1} FPS", camera_name, fps));
        canvas
    }

    fn draw_track(&self, canvas: &mut RgbImage, track: &TrackView, color: Rgb<u8>) {
        let (w, h) = canvas.dimensions();
        let b = &track.bbox;
        let x1 = b.x1.max(0.0).min(w as f32 - 1.0) as i32;
        let y1 = b.y1.max(0.0).min(h as f32 - 1.0) as i32;
        let x2 = b.x2.max(0.0).min(w as f32) as i32;
        let y2 = b.y2.max(0.0).min(h as f32) as i32;
        if x2 - x1 < 2 || y2 - y1 < 2 {
            return;
        }

        // 粗边框: 逐像素向内画多层
        let thickness = box_thickness(track.missed);
        for offset in 0..thickness {
            let bw = x2 - x1 - 2 * offset;
            let bh = y2 - y1 - 2 * offset;
            if bw < 1 || bh < 1 {
                break;
            }
            let rect = Rect::at(x1 + offset, y1 + offset).of_size(bw as u32, bh as u32);
            draw_hollow_rect_mut(canvas, rect, color);
        }

        let text = format!("{} #{} {:.2}", track.label, track.id, track.confidence);
        let tag_h = LABEL_SCALE as i32 + 4;
        let tag_y = if y1 >= tag_h { y1 - tag_h } else { y1 };
        let tag_w = self.text_width(&text, LABEL_SCALE).max(12) + 6;
        draw_filled_rect_mut(
            canvas,
            Rect::at(x1, tag_y).of_size(tag_w as u32, tag_h as u32),
            color,
        );
        if let Some(font) = &self.font {
            draw_text_mut(canvas, TEXT_COLOR, x1 + 3, tag_y + 2, PxScale::from(LABEL_SCALE), font, &text);
        }
    }

    fn draw_header(&self, canvas: &mut RgbImage, text: &str) {
        let width = canvas.width();
        let height = HEADER_SCALE as u32 + 8;
        if canvas.height() <= height || width == 0 {
            return;
        }
        draw_filled_rect_mut(canvas, Rect::at(0, 0).of_size(width, height), HEADER_BG);
        if let Some(font) = &self.font {
            draw_text_mut(canvas, TEXT_COLOR, 6, 4, PxScale::from(HEADER_SCALE), font, text);
        }
    }

    /// 占位帧 ("Camera Disconnected" / "No Signal" + 时间戳)
    pub fn placeholder(&self, width: u32, height: u32, message: &str, at: DateTime<Local>) -> RgbImage {
        let mut canvas = RgbImage::from_pixel(width.max(1), height.max(1), Rgb([32, 32, 32]));
        let (w, h) = (canvas.width() as f32, canvas.height() as f32);
        match &self.font {
            Some(font) => {
                let cy = (h / 2.0) as i32;
                draw_text_mut(&mut canvas, ALERT_COLOR, 20, cy - 30, PxScale::from(32.0), font, message);
                let stamp = at.format("%Y-%m-%d %H:%M:%S").to_string();
                draw_text_mut(&mut canvas, TEXT_COLOR, 20, cy + 10, PxScale::from(20.0), font, &stamp);
            }
            None => {
                draw_line_segment_mut(&mut canvas, (0.0, 0.0), (w - 1.0, h - 1.0), ALERT_COLOR);
                draw_line_segment_mut(&mut canvas, (w - 1.0, 0.0), (0.0, h - 1.0), ALERT_COLOR);
            }
        }
        canvas
    }

    fn text_width(&self, text: &str, scale: f32) -> i32 {
        match &self.font {
            Some(font) => imageproc::drawing::text_size(PxScale::from(scale), font, text).0 as i32,
            None => 0,
        }
    }
}

/// 告警标签红色, 普通标签绿色, 未配置标签灰色
pub fn label_color(label: &str, labels: &LabelSet) -> Rgb<u8> {
    if labels.is_alert(label) {
        ALERT_COLOR
    } else if labels.contains(label) {
        NORMAL_COLOR
    } else {
        UNKNOWN_COLOR
    }
}

/// 丢失越久边框越细
pub fn box_thickness(missed: u32) -> i32 {
    (3 - missed as i32).max(1)
}

/// 丢失越久颜色越暗
fn fade(color: Rgb<u8>, missed: u32) -> Rgb<u8> {
    let k = (1.0 - 0.2 * missed as f32).max(0.4);
    Rgb(color.0.map(|c| (c as f32 * k) as u8))
}
