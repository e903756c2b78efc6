// 该文件是 Poubelle （垃圾桶满溢检测） 项目的一部分。
// src/annotate/verdict.rs - 整张图像的结论
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

use serde::Serialize;

use super::{AnnotatedDetection, LabelCategory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerdictOutcome {
  AllFull,
  AllEmpty,
  Mixed,
  NoneRelevant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Verdict {
  pub full_count: usize,
  pub empty_count: usize,
  pub outcome: VerdictOutcome,
}

impl Verdict {
  pub fn from_counts(full_count: usize, empty_count: usize) -> Self {
    let outcome = match (full_count > 0, empty_count > 0) {
      (true, false) => VerdictOutcome::AllFull,
      (false, true) => VerdictOutcome::AllEmpty,
      (true, true) => VerdictOutcome::Mixed,
      (false, false) => VerdictOutcome::NoneRelevant,
    };
    Self {
      full_count,
      empty_count,
      outcome,
    }
  }

  pub fn none_relevant() -> Self {
    Self::from_counts(0, 0)
  }

  /// 面向用户的结论文字
  pub fn conclusion(&self) -> String {
    match self.outcome {
      VerdictOutcome::AllFull => "TOUTES les poubelles détectées sont PLEINES".to_string(),
      VerdictOutcome::AllEmpty => "TOUTES les poubelles détectées sont VIDES".to_string(),
      VerdictOutcome::Mixed => format!(
        "RÉSULTAT MIXTE - {} pleine(s) et {} vide(s)",
        self.full_count, self.empty_count
      ),
      VerdictOutcome::NoneRelevant => "Autres objets détectés".to_string(),
    }
  }
}

pub fn summarize_categories<I: IntoIterator<Item = LabelCategory>>(categories: I) -> Verdict {
  let (full, empty) = categories
    .into_iter()
    .fold((0, 0), |(full, empty), category| match category {
      LabelCategory::Full => (full + 1, empty),
      LabelCategory::Empty => (full, empty + 1),
      LabelCategory::Other => (full, empty),
    });
  Verdict::from_counts(full, empty)
}

pub fn summarize(detections: &[AnnotatedDetection]) -> Verdict {
  summarize_categories(detections.iter().map(|d| d.category))
}

#[cfg(test)]
mod tests {
  use super::*;
  use LabelCategory::*;

  #[test]
  fn four_way_outcome() {
    assert_eq!(summarize_categories([Full, Full]).outcome, VerdictOutcome::AllFull);
    assert_eq!(summarize_categories([Empty]).outcome, VerdictOutcome::AllEmpty);
    assert_eq!(summarize_categories([Full, Empty]).outcome, VerdictOutcome::Mixed);
    assert_eq!(summarize_categories([Other]).outcome, VerdictOutcome::NoneRelevant);
    assert_eq!(summarize(&[]), Verdict::none_relevant());
  }

  #[test]
  fn other_does_not_change_outcome() {
    let verdict = summarize_categories([Other, Full, Other, Full]);
    assert_eq!(verdict.outcome, VerdictOutcome::AllFull);
    assert_eq!(verdict.full_count, 2);
    assert_eq!(verdict.empty_count, 0);
  }

  #[test]
  fn order_does_not_matter() {
    let a = summarize_categories([Full, Empty, Other, Empty]);
    let b = summarize_categories([Empty, Other, Empty, Full]);
    assert_eq!(a, b);
  }

  #[test]
  fn mixed_conclusion_has_counts() {
    assert_eq!(
      Verdict::from_counts(2, 1).conclusion(),
      "RÉSULTAT MIXTE - 2 pleine(s) et 1 vide(s)"
    );
  }
}
