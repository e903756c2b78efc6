// 该文件是 Poubelle （垃圾桶满溢检测） 项目的一部分。
// src/annotate.rs - 检测结果分类与标注
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

use image::{Rgb, RgbImage};
use serde::Serialize;
use tracing::debug;

use crate::{config::ConfidenceThreshold, model::RawDetection, output::draw::Draw};

mod verdict;
pub use self::verdict::{Verdict, VerdictOutcome, summarize, summarize_categories};

const FULL_KEYWORDS: [&str; 2] = ["plein", "pleine"];
const EMPTY_KEYWORD: &str = "vide";

const FULL_COLOR: [u8; 3] = [0, 255, 0]; // 绿色
const EMPTY_COLOR: [u8; 3] = [255, 0, 0]; // 红色
const OTHER_COLOR: [u8; 3] = [255, 255, 0]; // 黄色

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LabelCategory {
  Full,
  Empty,
  Other,
}

impl LabelCategory {
  pub fn color(&self) -> [u8; 3] {
    match self {
      LabelCategory::Full => FULL_COLOR,
      LabelCategory::Empty => EMPTY_COLOR,
      LabelCategory::Other => OTHER_COLOR,
    }
  }

  /// 界面徽章文字；其他类别没有固定文字
  pub fn badge(&self) -> Option<&'static str> {
    match self {
      LabelCategory::Full => Some("PLEINE"),
      LabelCategory::Empty => Some("VIDE"),
      LabelCategory::Other => None,
    }
  }
}

/// 按类别名称的关键字分类，先匹配“满”再匹配“空”
pub fn classify(class_name: &str) -> (LabelCategory, String) {
  let lower = class_name.to_lowercase();
  let category = if FULL_KEYWORDS.iter().any(|k| lower.contains(k)) {
    LabelCategory::Full
  } else if lower.contains(EMPTY_KEYWORD) {
    LabelCategory::Empty
  } else {
    LabelCategory::Other
  };
  (category, class_name.to_uppercase())
}

/// 类别名称到类别的映射；模型直接输出类别编号时可替换
pub trait CategoryClassifier {
  fn classify(&self, class_name: &str) -> (LabelCategory, String);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordClassifier;

impl CategoryClassifier for KeywordClassifier {
  fn classify(&self, class_name: &str) -> (LabelCategory, String) {
    classify(class_name)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotatedDetection {
  #[serde(flatten)]
  pub detection: RawDetection,
  pub category: LabelCategory,
  pub display_label: String,
  pub color: [u8; 3],
}

impl AnnotatedDetection {
  /// 绘制在框上方的文字
  pub fn label_text(&self) -> String {
    format!("{} {:.2}", self.display_label, self.detection.confidence)
  }
}

#[derive(Debug, Clone)]
pub struct Annotation {
  pub image: RgbImage,
  pub detections: Vec<AnnotatedDetection>,
  pub threshold: String,
}

pub struct DetectionAnnotator<C = KeywordClassifier> {
  classifier: C,
  draw: Draw,
}

impl Default for DetectionAnnotator {
  fn default() -> Self {
    Self::new(Draw::default())
  }
}

impl DetectionAnnotator {
  pub fn new(draw: Draw) -> Self {
    Self::with_classifier(KeywordClassifier, draw)
  }
}

impl<C: CategoryClassifier> DetectionAnnotator<C> {
  pub fn with_classifier(classifier: C, draw: Draw) -> Self {
    Self { classifier, draw }
  }

  pub fn annotate_one(&self, detection: &RawDetection) -> AnnotatedDetection {
    let (category, display_label) = self.classifier.classify(&detection.class_name);
    AnnotatedDetection {
      detection: detection.clone(),
      category,
      display_label,
      color: category.color(),
    }
  }

  /// 在输入图像的副本上绘制检测框，原图不被修改；输出顺序与输入一致
  pub fn annotate(
    &self,
    image: &RgbImage,
    detections: &[RawDetection],
    threshold: ConfidenceThreshold,
  ) -> Annotation {
    let mut canvas = image.clone();
    let annotated: Vec<AnnotatedDetection> = detections
      .iter()
      .map(|detection| {
        let annotated = self.annotate_one(detection);
        let color = Rgb(annotated.color);
        self.draw.draw_box(&mut canvas, &detection.bbox, color);
        self
          .draw
          .draw_label(&mut canvas, &detection.bbox, &annotated.label_text(), color);
        annotated
      })
      .collect();

    debug!(
      "标注 {} 个检测结果，阈值 {}",
      annotated.len(),
      threshold.display()
    );

    Annotation {
      image: canvas,
      detections: annotated,
      threshold: threshold.display(),
    }
  }
}
