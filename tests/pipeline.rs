// 该文件是 Poubelle （垃圾桶满溢检测） 项目的一部分。
// tests/pipeline.rs - 标注、结论与任务的集成测试
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

use std::cell::RefCell;
use std::convert::Infallible;

use image::{Rgb, RgbImage};
use thiserror::Error;

use poubelle::{
  FromUrl,
  annotate::{DetectionAnnotator, LabelCategory, VerdictOutcome, summarize},
  config::{ConfidenceThreshold, ThresholdBounds},
  model::{BoundingBox, ClassNames, DetectResult, Model, RawDetection},
  output::{OutputWrapper, Render, format_report},
  task::{Analysis, AnalysisStatus, Analyzer, OneShotTask, Task},
};

#[derive(Error, Debug)]
#[error("session crashed")]
struct SessionCrashed;

struct FakeModel {
  detections: Vec<RawDetection>,
  fail: bool,
  names: ClassNames,
}

impl FakeModel {
  fn returning(detections: Vec<RawDetection>) -> Self {
    Self {
      detections,
      fail: false,
      names: [(0, "Poubelle_Pleine".to_string()), (1, "Poubelle_Vide".to_string())]
        .into_iter()
        .collect(),
    }
  }

  fn failing() -> Self {
    Self {
      fail: true,
      ..Self::returning(Vec::new())
    }
  }
}

impl Model for FakeModel {
  type Error = SessionCrashed;

  fn infer(&self, _image: &RgbImage, confidence: ConfidenceThreshold) -> Result<DetectResult, SessionCrashed> {
    if self.fail {
      return Err(SessionCrashed);
    }
    Ok(
      self
        .detections
        .iter()
        .filter(|d| d.confidence >= confidence.value())
        .cloned()
        .collect::<Vec<_>>()
        .into(),
    )
  }

  fn class_names(&self) -> &ClassNames {
    &self.names
  }
}

#[derive(Default)]
struct Capture {
  seen: RefCell<Vec<Analysis>>,
}

impl Render<RgbImage, Analysis> for &Capture {
  type Error = Infallible;

  fn render_result(&self, _frame: &RgbImage, result: &Analysis) -> Result<(), Infallible> {
    self.seen.borrow_mut().push(result.clone());
    Ok(())
  }
}

fn detection(class_id: u32, name: &str, confidence: f32, bbox: (i32, i32, i32, i32)) -> RawDetection {
  RawDetection {
    class_id,
    class_name: name.to_string(),
    confidence,
    bbox: BoundingBox::new(bbox.0, bbox.1, bbox.2, bbox.3).unwrap(),
  }
}

fn scene() -> Vec<RawDetection> {
  vec![
    detection(0, "Poubelle_Pleine", 0.91, (10, 10, 60, 80)),
    detection(1, "Poubelle_Vide", 0.55, (100, 20, 150, 90)),
    detection(0, "Poubelle_Pleine", 0.30, (160, 40, 190, 95)),
  ]
}

fn canvas() -> RgbImage {
  RgbImage::from_pixel(200, 100, Rgb([40, 40, 40]))
}

fn analyzer(threshold: f32) -> Analyzer {
  let threshold = ThresholdBounds::default().clamp(threshold);
  Analyzer::new(DetectionAnnotator::default(), threshold)
}

#[test]
fn verdict_does_not_depend_on_detection_order() {
  let annotator = DetectionAnnotator::default();
  let threshold = ConfidenceThreshold::default();
  let image = canvas();

  let forward = annotator.annotate(&image, &scene(), threshold);
  let mut reversed_scene = scene();
  reversed_scene.reverse();
  let reversed = annotator.annotate(&image, &reversed_scene, threshold);

  assert_eq!(summarize(&forward.detections), summarize(&reversed.detections));
  assert_eq!(
    summarize(&forward.detections).outcome,
    VerdictOutcome::Mixed
  );
  assert_eq!(forward.detections[0].category, LabelCategory::Full);
  assert_eq!(reversed.detections[0].category, LabelCategory::Full);
  assert_eq!(reversed.detections[1].category, LabelCategory::Empty);
}

#[test]
fn completed_analysis_reaches_the_output() {
  let model = FakeModel::returning(scene());
  let capture = Capture::default();
  let task = OneShotTask::new(analyzer(0.5));

  let analysis = task
    .run_task(std::iter::once(canvas()), Ok::<_, SessionCrashed>(model), &capture)
    .unwrap();

  assert_eq!(analysis.status, AnalysisStatus::Completed);
  assert_eq!(analysis.threshold, "0.500");
  assert_eq!(analysis.detections.len(), 2);
  assert_eq!(analysis.verdict.full_count, 1);
  assert_eq!(analysis.verdict.empty_count, 1);
  assert_ne!(analysis.annotated, canvas());
  assert_eq!(capture.seen.borrow().len(), 1);
}

#[test]
fn inference_failure_keeps_the_original_image() {
  let capture = Capture::default();
  let task = OneShotTask::new(analyzer(0.25));

  let analysis = task
    .run_task(
      std::iter::once(canvas()),
      Ok::<_, SessionCrashed>(FakeModel::failing()),
      &capture,
    )
    .unwrap();

  assert_eq!(
    analysis.status,
    AnalysisStatus::InferenceFailure("session crashed".to_string())
  );
  assert!(analysis.detections.is_empty());
  assert_eq!(analysis.verdict.outcome, VerdictOutcome::NoneRelevant);
  assert_eq!(analysis.annotated, canvas());
}

#[test]
fn missing_model_is_reported_not_raised() {
  let capture = Capture::default();
  let task = OneShotTask::new(analyzer(0.25));

  let analysis = task
    .run_task(
      std::iter::once(canvas()),
      Err::<FakeModel, _>("aucun modèle disponible"),
      &capture,
    )
    .unwrap();

  assert_eq!(
    analysis.status,
    AnalysisStatus::ModelUnavailable("aucun modèle disponible".to_string())
  );
  assert!(format_report(&canvas(), &analysis).contains("aucun modèle disponible"));
}

#[test]
fn empty_input_is_an_error() {
  let capture = Capture::default();
  let task = OneShotTask::new(analyzer(0.25));
  let result = task.run_task(
    std::iter::empty::<RgbImage>(),
    Ok::<_, SessionCrashed>(FakeModel::returning(scene())),
    &capture,
  );
  assert!(result.is_err());
  assert!(capture.seen.borrow().is_empty());
}

#[test]
fn console_report_lists_detections_and_conclusion() {
  let analysis = analyzer(0.25).analyze(&FakeModel::returning(scene()), &canvas());
  let report = format_report(&canvas(), &analysis);

  assert!(report.contains("[PLEINE] Confiance: 0.910"));
  assert!(report.contains("[VIDE] Confiance: 0.550"));
  assert!(report.contains("RÉSULTAT MIXTE - 2 pleine(s) et 1 vide(s)"));
}

#[test]
fn console_report_suggests_when_nothing_found() {
  let analysis = analyzer(0.95).analyze(&FakeModel::returning(scene()), &canvas());
  let report = format_report(&canvas(), &analysis);

  assert!(report.contains("Aucune poubelle détectée"));
  assert!(report.contains("Baissez le seuil de confiance"));
}

#[cfg(feature = "directory_record")]
#[test]
fn record_lines_end_with_verdict() {
  use poubelle::output::record_lines;

  let analysis = analyzer(0.25).analyze(&FakeModel::returning(scene()), &canvas());
  let lines = record_lines(&analysis);
  let lines: Vec<&str> = lines.lines().collect();

  assert_eq!(lines.len(), 4);
  assert_eq!(lines[0], "POUBELLE_PLEINE, 0.9100, 10, 10, 60, 80");
  assert_eq!(lines[3], "# Mixed");
}

#[test]
fn image_output_writes_the_annotated_image() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("nested").join("annotated.png");
  let url = url::Url::from_file_path(&path)
    .unwrap()
    .as_str()
    .replacen("file://", "image://", 1);
  let output = OutputWrapper::from_url(&url::Url::parse(&url).unwrap()).unwrap();

  let analysis = analyzer(0.25).analyze(&FakeModel::returning(scene()), &canvas());
  output.render_result(&canvas(), &analysis).unwrap();

  let written = image::open(&path).unwrap().to_rgb8();
  assert_eq!(written, analysis.annotated);
}

#[cfg(feature = "json_report")]
#[test]
fn json_output_describes_the_analysis() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("report.json");
  let url = format!("json://{}?pretty", path.display());
  let output = OutputWrapper::from_url(&url::Url::parse(&url).unwrap()).unwrap();

  let analysis = analyzer(0.25).analyze(&FakeModel::returning(scene()), &canvas());
  output.render_result(&canvas(), &analysis).unwrap();

  let report: serde_json::Value =
    serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
  assert_eq!(report["width"], 200);
  assert_eq!(report["threshold"], "0.250");
  assert_eq!(report["status"]["kind"], "COMPLETED");
  assert_eq!(report["verdict"]["outcome"], "MIXED");
  assert_eq!(report["detections"][1]["category"], "EMPTY");
  assert_eq!(report["detections"][1]["display_label"], "POUBELLE_VIDE");
  assert_eq!(report["detections"][0]["bbox"]["x2"], 60);
}

#[cfg(feature = "directory_record")]
#[test]
fn folder_output_skips_empty_analyses_unless_always() {
  let dir = tempfile::tempdir().unwrap();
  let empty = analyzer(0.95).analyze(&FakeModel::returning(scene()), &canvas());

  let lazy = OutputWrapper::from_url(
    &url::Url::parse(&format!("folder://{}/lazy", dir.path().display())).unwrap(),
  )
  .unwrap();
  lazy.render_result(&canvas(), &empty).unwrap();
  assert!(!dir.path().join("lazy").exists());

  let always = OutputWrapper::from_url(
    &url::Url::parse(&format!("folder://{}/always?always", dir.path().display())).unwrap(),
  )
  .unwrap();
  always.render_result(&canvas(), &empty).unwrap();
  assert!(dir.path().join("always").exists());
}

#[cfg(feature = "directory_record")]
fn files_with_suffix(dir: &std::path::Path, suffix: &str) -> Vec<std::path::PathBuf> {
  let mut found = Vec::new();
  for entry in std::fs::read_dir(dir).unwrap() {
    let path = entry.unwrap().path();
    if path.is_dir() {
      found.extend(files_with_suffix(&path, suffix));
    } else if path.to_string_lossy().ends_with(suffix) {
      found.push(path);
    }
  }
  found
}

#[cfg(feature = "directory_record")]
#[test]
fn folder_output_never_overwrites_previous_records() {
  let dir = tempfile::tempdir().unwrap();
  let url = url::Url::parse(&format!("folder://{}/records", dir.path().display())).unwrap();
  let analysis = analyzer(0.25).analyze(&FakeModel::returning(scene()), &canvas());

  // 每次命令行调用都会新建输出，序号从头开始
  for _ in 0..2 {
    let output = OutputWrapper::from_url(&url).unwrap();
    output.render_result(&canvas(), &analysis).unwrap();
  }

  let records = files_with_suffix(&dir.path().join("records"), ".txt");
  assert_eq!(records.len(), 2);
  assert_eq!(files_with_suffix(&dir.path().join("records"), "-annotated.png").len(), 2);
  for record in records {
    assert!(std::fs::read_to_string(record).unwrap().ends_with("# Mixed"));
  }
}

#[test]
fn default_annotator_burns_labels_above_boxes() {
  let image = RgbImage::new(200, 120);
  let detections = [detection(0, "Poubelle_Pleine", 0.91, (20, 60, 150, 110))];
  let annotation =
    DetectionAnnotator::default().annotate(&image, &detections, ConfidenceThreshold::default());

  assert_eq!(annotation.detections[0].label_text(), "POUBELLE_PLEINE 0.91");
  let inked = (25..=50)
    .flat_map(|y| (20..150).map(move |x| (x, y)))
    .filter(|&(x, y)| *annotation.image.get_pixel(x, y) != Rgb([0, 0, 0]))
    .count();
  assert!(inked > 0);
}

#[test]
fn unknown_output_scheme_is_rejected() {
  assert!(OutputWrapper::from_url(&url::Url::parse("ftp://host/x.png").unwrap()).is_err());
}
