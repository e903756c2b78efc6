// 该文件是 Poubelle （垃圾桶满溢检测） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::path::Path;

use ab_glyph::{FontArc, FontRef, FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::BoundingBox;

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_OFFSET: i32 = 10; // 文字基线位于框顶上方 10 像素
const BOX_STROKE: i32 = 3;

static DEFAULT_FONT: &[u8] = include_bytes!("../../assets/font.ttf"); // DejaVu Sans

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体无效: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
}

/// 默认使用内嵌字体；字体不可用时只绘制边框
pub struct Draw {
  font: Option<FontArc>,
  font_size: f32,
  label_offset: i32,
  stroke: i32,
}

impl Default for Draw {
  fn default() -> Self {
    let font = match FontRef::try_from_slice(DEFAULT_FONT) {
      Ok(font) => Some(FontArc::new(font)),
      Err(e) => {
        warn!("无法加载内嵌字体，标签将被跳过: {}", e);
        None
      }
    };
    Self {
      font,
      ..Self::boxes_only()
    }
  }
}

impl Draw {
  /// 不绘制文字标签
  pub fn boxes_only() -> Self {
    Self {
      font: None,
      font_size: LABEL_FONT_SIZE,
      label_offset: LABEL_OFFSET,
      stroke: BOX_STROKE,
    }
  }

  pub fn with_font_bytes(data: Vec<u8>) -> Result<Self, DrawError> {
    let font = FontVec::try_from_vec(data)?;
    Ok(Self {
      font: Some(FontArc::new(font)),
      ..Self::boxes_only()
    })
  }

  pub fn with_font_file(path: &Path) -> Result<Self, DrawError> {
    info!("加载标签字体: {:?}", path);
    Self::with_font_bytes(std::fs::read(path)?)
  }

  pub fn font_size(mut self, size: f32) -> Self {
    self.font_size = size;
    self
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  /// 以框线为中心绘制 `stroke` 像素宽的边框，超出图像的部分被裁剪
  pub fn draw_box(&self, image: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>) {
    let half = self.stroke / 2;
    let (w, h) = ((bbox.x2() - bbox.x1()) as i64, (bbox.y2() - bbox.y1()) as i64);
    for t in -half..=(self.stroke - 1 - half) {
      let width = w + 1 + 2 * t as i64;
      let height = h + 1 + 2 * t as i64;
      if width <= 0 || height <= 0 {
        continue;
      }
      let rect = Rect::at(bbox.x1() - t, bbox.y1() - t).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, color);
    }
  }

  /// 文字基线位于框左上角上方；超出图像顶部的部分被裁剪
  pub fn draw_label(&self, image: &mut RgbImage, bbox: &BoundingBox, text: &str, color: Rgb<u8>) {
    let Some(font) = &self.font else {
      debug!("未加载字体，跳过标签: {}", text);
      return;
    };
    if text.is_empty() {
      return;
    }

    let scale = PxScale::from(self.font_size);
    let (_, text_height) = text_size(scale, font, text);
    let baseline = bbox.y1() - self.label_offset;
    draw_text_mut(
      image,
      color,
      bbox.x1(),
      baseline - text_height as i32,
      scale,
      font,
      text,
    );
  }
}
