// 该文件是 Poubelle （垃圾桶满溢检测） 项目的一部分。
// src/output/console.rs - 终端结果展示
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

use std::convert::Infallible;
use std::fmt::Write;

use image::RgbImage;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{OutputError, Render},
  task::{Analysis, AnalysisStatus},
};

const SUGGESTIONS: [&str; 3] = [
  "Baissez le seuil de confiance",
  "Utilisez une image plus nette",
  "Assurez-vous que la poubelle est bien visible",
];

/// `console://`，将结果打印到标准输出
pub struct ConsoleOutput;

impl FromUrlWithScheme for ConsoleOutput {
  const SCHEME: &'static str = "console";
}

impl FromUrl for ConsoleOutput {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OutputError::SchemeMismatch(url.scheme().to_string()));
    }
    Ok(ConsoleOutput)
  }
}

pub fn format_report(frame: &RgbImage, analysis: &Analysis) -> String {
  let mut out = String::new();
  let _ = writeln!(
    out,
    "Image {}x{} - seuil de confiance {}",
    frame.width(),
    frame.height(),
    analysis.threshold
  );

  match &analysis.status {
    AnalysisStatus::ModelUnavailable(reason) => {
      let _ = writeln!(out, "Modèle non chargé: {}", reason);
      return out;
    }
    AnalysisStatus::InferenceFailure(reason) => {
      let _ = writeln!(out, "Erreur lors de la prédiction: {}", reason);
      return out;
    }
    AnalysisStatus::Completed => {}
  }

  if analysis.detections.is_empty() {
    let _ = writeln!(out, "Aucune poubelle détectée dans l'image");
    let _ = writeln!(out, "Suggestions :");
    for suggestion in SUGGESTIONS {
      let _ = writeln!(out, "  - {}", suggestion);
    }
    return out;
  }

  let _ = writeln!(out, "Résultats de détection");
  for det in &analysis.detections {
    let badge = det.category.badge().unwrap_or(det.display_label.as_str());
    let _ = writeln!(
      out,
      "  [{}] Confiance: {:.3} - Classe: {} (ID: {}) @ ({}, {}, {}, {})",
      badge,
      det.detection.confidence,
      det.detection.class_name,
      det.detection.class_id,
      det.detection.bbox.x1(),
      det.detection.bbox.y1(),
      det.detection.bbox.x2(),
      det.detection.bbox.y2()
    );
  }
  let _ = writeln!(out, "Conclusion: {}", analysis.verdict.conclusion());
  out
}

impl Render<RgbImage, Analysis> for ConsoleOutput {
  type Error = Infallible;

  fn render_result(&self, frame: &RgbImage, result: &Analysis) -> Result<(), Self::Error> {
    print!("{}", format_report(frame, result));
    Ok(())
  }
}
