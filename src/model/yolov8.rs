// 该文件是 Poubelle （垃圾桶满溢检测） 项目的一部分。
// src/model/yolov8.rs - YOLOv8 ONNX 模型
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

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use image::{Rgb, RgbImage, imageops::FilterType};
use ndarray::Array4;
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  config::{ConfidenceThreshold, DEFAULT_IOU_THRESHOLD},
  model::{BoundingBox, ClassNames, ClassNamesError, DetectResult, Model, ModelLoader, RawDetection},
  url_file_path,
};

const YOLOV8_DEFAULT_INPUT_SIZE: u32 = 640;
const YOLOV8_PAD_VALUE: u8 = 114;
const YOLOV8_BOX_FIELDS: usize = 4;
const YOLOV8_SCHEME: &str = "yolov8";

#[derive(Error, Debug)]
pub enum YoloV8Error {
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(#[from] ort::Error),
  #[error("类别名称错误: {0}")]
  ClassNamesError(#[from] ClassNamesError),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("模型输出形状错误: {0:?}")]
  OutputShape(Vec<usize>),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("推理会话锁已损坏")]
  LockPoisoned,
}

pub struct YoloV8 {
  session: Mutex<Session>,
  class_names: ClassNames,
  input_name: String,
  output_name: String,
  input_size: u32,
  iou_threshold: f32,
}

pub struct YoloV8Builder {
  model_path: PathBuf,
  classes_path: Option<PathBuf>,
  input_size: Option<u32>,
  iou_threshold: f32,
  intra_threads: usize,
}

impl FromUrlWithScheme for YoloV8Builder {
  const SCHEME: &'static str = YOLOV8_SCHEME;
}

impl FromUrl for YoloV8Builder {
  type Error = YoloV8Error;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(YoloV8Error::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }
    Ok(Self::new(url_file_path(url)))
  }
}

impl YoloV8Builder {
  pub fn new(model_path: impl Into<PathBuf>) -> Self {
    Self {
      model_path: model_path.into(),
      classes_path: None,
      input_size: None,
      iou_threshold: DEFAULT_IOU_THRESHOLD,
      intra_threads: 1,
    }
  }

  /// 使用类别文件代替模型元数据中的 `names`
  pub fn classes(mut self, path: Option<PathBuf>) -> Self {
    self.classes_path = path;
    self
  }

  pub fn input_size(mut self, size: u32) -> Self {
    self.input_size = Some(size);
    self
  }

  pub fn iou_threshold(mut self, iou: f32) -> Self {
    self.iou_threshold = iou;
    self
  }

  pub fn intra_threads(mut self, threads: usize) -> Self {
    self.intra_threads = threads;
    self
  }

  pub fn build(self) -> Result<YoloV8, YoloV8Error> {
    info!("加载模型文件: {:?}", self.model_path);
    let session = Session::builder()?
      .with_optimization_level(GraphOptimizationLevel::Level3)?
      .with_intra_threads(self.intra_threads)?
      .commit_from_file(&self.model_path)?;

    let (class_names, input_size) = {
      let metadata = session.metadata()?;
      let class_names = match &self.classes_path {
        Some(path) => ClassNames::read_classes_txt_file(path)?,
        None => match metadata.custom("names") {
          Ok(Some(names)) => ClassNames::parse_ultralytics_names(&names)?,
          _ => {
            error!("模型缺少 names 元数据，且未提供类别文件");
            return Err(YoloV8Error::ModelInvalid("缺少类别名称".to_string()));
          }
        },
      };
      let input_size = match self.input_size {
        Some(size) => size,
        None => match metadata.custom("imgsz") {
          Ok(Some(imgsz)) => parse_imgsz(&imgsz).unwrap_or(YOLOV8_DEFAULT_INPUT_SIZE),
          _ => YOLOV8_DEFAULT_INPUT_SIZE,
        },
      };
      (class_names, input_size)
    };

    let input_name = session
      .inputs
      .first()
      .map(|i| i.name.clone())
      .ok_or_else(|| YoloV8Error::ModelInvalid("模型没有输入".to_string()))?;
    let output_name = session
      .outputs
      .first()
      .map(|o| o.name.clone())
      .ok_or_else(|| YoloV8Error::ModelInvalid("模型没有输出".to_string()))?;

    debug!("模型输入: {}, 输出: {}", input_name, output_name);
    debug!("输入尺寸: {}, 类别数量: {}", input_size, class_names.len());
    for (id, name) in class_names.iter() {
      debug!("类别 {}: {}", id, name);
    }

    Ok(YoloV8 {
      session: Mutex::new(session),
      class_names,
      input_name,
      output_name,
      input_size,
      iou_threshold: self.iou_threshold,
    })
  }
}

/// `imgsz` 元数据形如 `[640, 640]`，取第一个维度
fn parse_imgsz(text: &str) -> Option<u32> {
  text
    .trim_matches(|c| c == '[' || c == ']')
    .split(',')
    .next()
    .and_then(|v| v.trim().parse().ok())
}

/// 按模型权重路径构建检测器
pub struct YoloV8Loader {
  pub classes_path: Option<PathBuf>,
  pub iou_threshold: f32,
}

impl Default for YoloV8Loader {
  fn default() -> Self {
    Self {
      classes_path: None,
      iou_threshold: DEFAULT_IOU_THRESHOLD,
    }
  }
}

impl ModelLoader for YoloV8Loader {
  type Model = YoloV8;
  type Error = YoloV8Error;

  fn load(&self, path: &Path) -> Result<YoloV8, YoloV8Error> {
    YoloV8Builder::new(path)
      .classes(self.classes_path.clone())
      .iou_threshold(self.iou_threshold)
      .build()
  }
}

/// 等比缩放并填充到正方形输入
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
  scale: f32,
  pad_x: f32,
  pad_y: f32,
}

impl Letterbox {
  fn new(width: u32, height: u32, size: u32) -> Self {
    let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
    let new_w = (width as f32 * scale).round();
    let new_h = (height as f32 * scale).round();
    Self {
      scale,
      pad_x: ((size as f32 - new_w) / 2.0).floor(),
      pad_y: ((size as f32 - new_h) / 2.0).floor(),
    }
  }

  /// 模型坐标映射回原图坐标
  fn unmap(&self, bbox: [f32; 4]) -> [f32; 4] {
    [
      (bbox[0] - self.pad_x) / self.scale,
      (bbox[1] - self.pad_y) / self.scale,
      (bbox[2] - self.pad_x) / self.scale,
      (bbox[3] - self.pad_y) / self.scale,
    ]
  }
}

fn preprocess(image: &RgbImage, size: u32) -> (Array4<f32>, Letterbox) {
  let letterbox = Letterbox::new(image.width(), image.height(), size);
  let new_w = ((image.width() as f32 * letterbox.scale).round() as u32).clamp(1, size);
  let new_h = ((image.height() as f32 * letterbox.scale).round() as u32).clamp(1, size);
  let resized = image::imageops::resize(image, new_w, new_h, FilterType::Triangle);

  let mut canvas = RgbImage::from_pixel(size, size, Rgb([YOLOV8_PAD_VALUE; 3]));
  image::imageops::replace(
    &mut canvas,
    &resized,
    letterbox.pad_x as i64,
    letterbox.pad_y as i64,
  );

  let side = size as usize;
  let mut input = Array4::<f32>::zeros((1, 3, side, side));
  for (x, y, pixel) in canvas.enumerate_pixels() {
    for c in 0..3 {
      input[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
    }
  }
  (input, letterbox)
}

#[derive(Debug, Clone, PartialEq)]
struct Candidate {
  class_id: u32,
  score: f32,
  bbox: [f32; 4],
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let w = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
  let h = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
  let inter = w * h;
  let area_a = (a[2] - a[0]) * (a[3] - a[1]);
  let area_b = (b[2] - b[0]) * (b[3] - b[1]);
  let union = area_a + area_b - inter;
  if union <= 0.0 { 0.0 } else { inter / union }
}

/// 解码 `[1, 4 + nc, anchors]` 输出，坐标仍为模型输入坐标
fn decode_output(data: &[f32], shape: &[usize], confidence: f32) -> Result<Vec<Candidate>, YoloV8Error> {
  let (fields, anchors) = match shape {
    [1, fields, anchors] if *fields > YOLOV8_BOX_FIELDS => (*fields, *anchors),
    _ => return Err(YoloV8Error::OutputShape(shape.to_vec())),
  };
  if data.len() != fields * anchors {
    return Err(YoloV8Error::OutputShape(shape.to_vec()));
  }

  let at = |field: usize, anchor: usize| data[field * anchors + anchor];
  let mut candidates = Vec::new();
  for anchor in 0..anchors {
    let (class_id, score) = (YOLOV8_BOX_FIELDS..fields)
      .map(|field| (field - YOLOV8_BOX_FIELDS, at(field, anchor)))
      .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });
    if score < confidence {
      continue;
    }
    let (cx, cy, w, h) = (at(0, anchor), at(1, anchor), at(2, anchor), at(3, anchor));
    candidates.push(Candidate {
      class_id: class_id as u32,
      score,
      bbox: [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
    });
  }
  Ok(candidates)
}

/// 按类别分别做非极大值抑制，结果按置信度降序
fn non_maximum_suppression(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
  candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
  let mut keep: Vec<Candidate> = Vec::with_capacity(candidates.len());
  for candidate in candidates {
    let suppressed = keep
      .iter()
      .any(|k| k.class_id == candidate.class_id && iou(&k.bbox, &candidate.bbox) > iou_threshold);
    if !suppressed {
      keep.push(candidate);
    }
  }
  keep
}

impl YoloV8 {
  pub fn input_size(&self) -> u32 {
    self.input_size
  }

  fn run_session(&self, input: Array4<f32>) -> Result<(Vec<f32>, Vec<usize>), YoloV8Error> {
    let tensor = Tensor::from_array(input)?;
    let mut session = self.session.lock().map_err(|_| YoloV8Error::LockPoisoned)?;
    let outputs = session.run(ort::inputs![self.input_name.as_str() => tensor])?;
    let output = outputs
      .get(self.output_name.as_str())
      .ok_or_else(|| YoloV8Error::ModelInvalid(format!("缺少输出 {}", self.output_name)))?;
    let (shape, data) = output.try_extract_tensor::<f32>()?;
    let shape = shape.iter().map(|&d| d.max(0) as usize).collect();
    Ok((data.to_vec(), shape))
  }

  fn postprocess(
    &self,
    data: &[f32],
    shape: &[usize],
    letterbox: Letterbox,
    image: &RgbImage,
    confidence: f32,
  ) -> Result<DetectResult, YoloV8Error> {
    let candidates = decode_output(data, shape, confidence)?;
    debug!("置信度过滤后候选框: {}", candidates.len());
    let kept = non_maximum_suppression(candidates, self.iou_threshold);

    let (w, h) = (image.width() as f32, image.height() as f32);
    let items: Vec<RawDetection> = kept
      .into_iter()
      .filter_map(|c| {
        let b = letterbox.unmap(c.bbox);
        let clipped = [b[0].clamp(0.0, w), b[1].clamp(0.0, h), b[2].clamp(0.0, w), b[3].clamp(0.0, h)];
        BoundingBox::from_f32_truncated(clipped).map(|bbox| RawDetection {
          class_id: c.class_id,
          class_name: self.class_names.name_of(c.class_id).into_owned(),
          confidence: c.score,
          bbox,
        })
      })
      .collect();

    debug!("检测到 {} 个物体", items.len());
    Ok(DetectResult::from(items))
  }
}

impl Model for YoloV8 {
  type Error = YoloV8Error;

  fn infer(
    &self,
    image: &RgbImage,
    confidence: ConfidenceThreshold,
  ) -> Result<DetectResult, Self::Error> {
    debug!("预处理输入图像 {}x{}", image.width(), image.height());
    let (input, letterbox) = preprocess(image, self.input_size);

    debug!("执行模型推理");
    let (data, shape) = self.run_session(input)?;
    debug!("模型输出形状: {:?}", shape);

    self.postprocess(&data, &shape, letterbox, image, confidence.value())
  }

  fn class_names(&self) -> &ClassNames {
    &self.class_names
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn letterbox_wide_image() {
    let lb = Letterbox::new(1280, 640, 640);
    assert_eq!(lb.scale, 0.5);
    assert_eq!(lb.pad_x, 0.0);
    assert_eq!(lb.pad_y, 160.0);
    assert_eq!(lb.unmap([0.0, 160.0, 640.0, 480.0]), [0.0, 0.0, 1280.0, 640.0]);
  }

  #[test]
  fn preprocess_pads_with_gray() {
    let image = RgbImage::from_pixel(64, 32, Rgb([255, 0, 0]));
    let (input, lb) = preprocess(&image, 64);
    assert_eq!(input.shape(), &[1, 3, 64, 64]);
    assert_eq!(lb.pad_y, 16.0);
    // 填充区域
    assert!((input[[0, 0, 0, 0]] - 114.0 / 255.0).abs() < 1e-6);
    // 图像区域
    assert!((input[[0, 0, 32, 32]] - 1.0).abs() < 0.01);
    assert!(input[[0, 1, 32, 32]].abs() < 0.01);
  }

  #[test]
  fn decode_picks_best_class() {
    // 2 个类别，3 个锚点，按字段主序排列
    let shape = [1, 6, 3];
    #[rustfmt::skip]
    let data = [
      10.0, 50.0, 100.0, // cx
      10.0, 50.0, 100.0, // cy
      4.0, 20.0, 10.0,   // w
      4.0, 20.0, 10.0,   // h
      0.9, 0.1, 0.2,     // class 0
      0.2, 0.8, 0.1,     // class 1
    ];
    let candidates = decode_output(&data, &shape, 0.25).unwrap();
    assert_eq!(candidates.len(), 2);
    assert_eq!(candidates[0].class_id, 0);
    assert_eq!(candidates[0].bbox, [8.0, 8.0, 12.0, 12.0]);
    assert_eq!(candidates[1].class_id, 1);
    assert_eq!(candidates[1].score, 0.8);
  }

  #[test]
  fn decode_rejects_bad_shape() {
    assert!(decode_output(&[0.0; 4], &[1, 4, 1], 0.5).is_err());
    assert!(decode_output(&[0.0; 5], &[1, 6, 1], 0.5).is_err());
  }

  #[test]
  fn nms_is_class_wise() {
    let a = Candidate { class_id: 0, score: 0.9, bbox: [0.0, 0.0, 10.0, 10.0] };
    let b = Candidate { class_id: 0, score: 0.8, bbox: [1.0, 1.0, 10.0, 10.0] };
    let c = Candidate { class_id: 1, score: 0.7, bbox: [0.0, 0.0, 10.0, 10.0] };
    let d = Candidate { class_id: 0, score: 0.95, bbox: [20.0, 20.0, 30.0, 30.0] };
    let kept = non_maximum_suppression(vec![a.clone(), b, c.clone(), d.clone()], 0.7);
    assert_eq!(kept, vec![d, a, c]);
  }

  #[test]
  fn imgsz_metadata() {
    assert_eq!(parse_imgsz("[640, 640]"), Some(640));
    assert_eq!(parse_imgsz("320"), Some(320));
    assert_eq!(parse_imgsz("oops"), None);
  }
}
