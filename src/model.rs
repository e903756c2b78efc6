// 该文件是 Poubelle （垃圾桶满溢检测） 项目的一部分。
// src/model.rs - 模型
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

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use image::RgbImage;
use serde::Serialize;
use thiserror::Error;

use crate::config::ConfidenceThreshold;

pub trait Model {
  type Error: std::error::Error + Send + Sync + 'static;

  /// 返回的检测结果已按 `confidence` 过滤
  fn infer(
    &self,
    image: &RgbImage,
    confidence: ConfidenceThreshold,
  ) -> Result<DetectResult, Self::Error>;

  fn class_names(&self) -> &ClassNames;
}

/// 从权重文件加载模型
pub trait ModelLoader {
  type Model: Model;
  type Error: std::error::Error + Send + Sync + 'static;

  fn load(&self, path: &Path) -> Result<Self::Model, Self::Error>;
}

/// 像素坐标边界框，保证 x1 < x2 且 y1 < y2
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BoundingBox {
  x1: i32,
  y1: i32,
  x2: i32,
  y2: i32,
}

impl BoundingBox {
  pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Option<Self> {
    if x1 < x2 && y1 < y2 {
      Some(Self { x1, y1, x2, y2 })
    } else {
      None
    }
  }

  /// 截断（而非四舍五入）浮点坐标
  pub fn from_f32_truncated(bbox: [f32; 4]) -> Option<Self> {
    Self::new(
      bbox[0] as i32,
      bbox[1] as i32,
      bbox[2] as i32,
      bbox[3] as i32,
    )
  }

  pub fn x1(&self) -> i32 {
    self.x1
  }

  pub fn y1(&self) -> i32 {
    self.y1
  }

  pub fn x2(&self) -> i32 {
    self.x2
  }

  pub fn y2(&self) -> i32 {
    self.y2
  }

  pub fn width(&self) -> u32 {
    self.x1.abs_diff(self.x2)
  }

  pub fn height(&self) -> u32 {
    self.y1.abs_diff(self.y2)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawDetection {
  pub class_id: u32,
  pub class_name: String,
  pub confidence: f32,
  pub bbox: BoundingBox,
}

#[derive(Debug, Clone, Default)]
pub struct DetectResult {
  pub items: Box<[RawDetection]>,
}

impl DetectResult {
  pub fn empty() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }
}

impl From<Vec<RawDetection>> for DetectResult {
  fn from(items: Vec<RawDetection>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

#[derive(Error, Debug)]
pub enum ClassNamesError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] io::Error),
  #[error("类别名称格式错误: {0}")]
  InvalidYaml(#[from] serde_yaml::Error),
}

/// 类别编号到名称的只读映射
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassNames {
  names: BTreeMap<u32, String>,
}

impl ClassNames {
  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn get(&self, class_id: u32) -> Option<&str> {
    self.names.get(&class_id).map(String::as_str)
  }

  /// 未知编号显示为 `Classe_{id}`
  pub fn name_of(&self, class_id: u32) -> Cow<'_, str> {
    match self.get(class_id) {
      Some(name) => Cow::Borrowed(name),
      None => Cow::Owned(format!("Classe_{}", class_id)),
    }
  }

  pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
    self.names.iter().map(|(id, name)| (*id, name.as_str()))
  }

  /// 每行一个类别名称，行号即编号
  pub fn from_reader<R: BufRead>(reader: R) -> io::Result<Self> {
    let names = reader
      .lines()
      .enumerate()
      .map(|(id, line)| line.map(|name| (id as u32, name.trim().to_string())))
      .collect::<io::Result<BTreeMap<_, _>>>()?;
    Ok(Self { names })
  }

  pub fn read_classes_txt_file(path: &Path) -> Result<Self, ClassNamesError> {
    Ok(Self::from_reader(BufReader::new(File::open(path)?))?)
  }

  /// 解析 Ultralytics 导出的 `names` 元数据，例如 `{0: 'pleine', 1: 'vide'}`
  pub fn parse_ultralytics_names(text: &str) -> Result<Self, ClassNamesError> {
    let names: BTreeMap<u32, String> = serde_yaml::from_str(text)?;
    Ok(Self { names })
  }
}

impl FromIterator<(u32, String)> for ClassNames {
  fn from_iter<I: IntoIterator<Item = (u32, String)>>(iter: I) -> Self {
    Self {
      names: iter.into_iter().collect(),
    }
  }
}

pub mod store;
pub use self::store::{ModelHandle, ModelIdentity, ModelStore, ModelStoreError};

#[cfg(feature = "model_yolov8")]
mod yolov8;
#[cfg(feature = "model_yolov8")]
pub use self::yolov8::{YoloV8, YoloV8Builder, YoloV8Error, YoloV8Loader};

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn bounding_box_rejects_degenerate() {
    assert!(BoundingBox::new(10, 10, 10, 20).is_none());
    assert!(BoundingBox::new(10, 20, 30, 5).is_none());
    let bbox = BoundingBox::new(1, 2, 11, 22).unwrap();
    assert_eq!((bbox.width(), bbox.height()), (10, 20));
    assert_eq!((bbox.x1(), bbox.y1(), bbox.x2(), bbox.y2()), (1, 2, 11, 22));
  }

  #[test]
  fn bounding_box_serializes_corners() {
    let bbox = BoundingBox::new(-5, 0, 7, 3).unwrap();
    assert_eq!(bbox.width(), 12);
    assert_eq!(
      serde_json::to_string(&bbox).unwrap(),
      r#"{"x1":-5,"y1":0,"x2":7,"y2":3}"#
    );
  }

  #[test]
  fn bounding_box_truncates() {
    let bbox = BoundingBox::from_f32_truncated([3.9, 4.2, 100.99, 50.5]).unwrap();
    assert_eq!(bbox, BoundingBox::new(3, 4, 100, 50).unwrap());
  }

  #[test]
  fn parse_names_metadata() {
    let names =
      ClassNames::parse_ultralytics_names("{0: 'poubelle_pleine', 1: 'poubelle_vide'}").unwrap();
    assert_eq!(names.len(), 2);
    assert_eq!(names.get(0), Some("poubelle_pleine"));
    assert_eq!(names.get(1), Some("poubelle_vide"));
  }

  #[test]
  fn parse_names_with_quotes_and_commas() {
    let names = ClassNames::parse_ultralytics_names(r#"{0: "bac d'ordures", 1: 'a, b'}"#).unwrap();
    assert_eq!(names.get(0), Some("bac d'ordures"));
    assert_eq!(names.get(1), Some("a, b"));
  }

  #[test]
  fn parse_names_rejects_garbage() {
    assert!(ClassNames::parse_ultralytics_names("[0, 1]").is_err());
    assert!(ClassNames::parse_ultralytics_names("{zero: 'x'}").is_err());
    assert!(ClassNames::parse_ultralytics_names("{0: 'x}").is_err());
  }

  #[test]
  fn unknown_class_falls_back() {
    let names: ClassNames = [(0, "vide".to_string())].into_iter().collect();
    assert_eq!(names.name_of(0), "vide");
    assert_eq!(names.name_of(7), "Classe_7");
  }

  #[test]
  fn classes_from_lines() {
    let names = ClassNames::from_reader("pleine\nvide\n".as_bytes()).unwrap();
    assert_eq!(names.get(1), Some("vide"));
    assert_eq!(names.len(), 2);
  }
}
