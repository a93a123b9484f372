// 该文件是 Xuese （血色） 项目的一部分。
// src/output/console_navigator.rs - 终端结果展示
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

use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};

use tracing::warn;

use super::{NavigationEvent, Navigator};
use crate::interpret::Severity;
use crate::outcome::OutcomeRecord;

const DISCLAIMER: &str = "Disclaimer: This is an AI-assisted screening tool and not a medical \
                          diagnosis. Please consult a doctor for professional advice.";
const ANSI_RESET: &str = "\x1b[0m";

fn severity_color(severity: Severity) -> &'static str {
  match severity {
    Severity::Severe => "\x1b[31m",       // 红
    Severity::Moderate => "\x1b[38;5;208m", // 橙
    Severity::Mild => "\x1b[33m",         // 黄
    Severity::NonAnemic => "\x1b[32m",    // 绿
  }
}

/// 在终端中展示结果页或失败提示
pub struct ConsoleNavigator<W: Write> {
  out: Mutex<W>,
  color: bool,
}

impl ConsoleNavigator<io::Stdout> {
  pub fn stdout() -> Self {
    Self::new(io::stdout(), true)
  }
}

impl<W: Write> ConsoleNavigator<W> {
  pub fn new(out: W, color: bool) -> Self {
    Self {
      out: Mutex::new(out),
      color,
    }
  }

  pub fn into_inner(self) -> W {
    self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
  }

  fn paint(&self, text: &str, severity: Severity) -> String {
    if self.color {
      format!("{}{}{}", severity_color(severity), text, ANSI_RESET)
    } else {
      text.to_string()
    }
  }

  fn write_result(&self, out: &mut W, record: &OutcomeRecord) -> io::Result<()> {
    let name = record.subject().name.trim();
    writeln!(out, "Analysis Complete")?;
    if name.is_empty() {
      writeln!(out, "Hello")?;
    } else {
      writeln!(out, "Hello, {}", name)?;
    }
    writeln!(out)?;
    writeln!(out, "  {:.1} Hb g/dL", record.estimated_hb())?;
    writeln!(
      out,
      "  {}",
      self.paint(&record.severity().as_str().to_uppercase(), record.severity())
    )?;
    writeln!(
      out,
      "  Confidence: {}%",
      (record.confidence() * 100.0).round() as u32
    )?;
    writeln!(out, "  Based on palpebral conjunctiva analysis.")?;
    writeln!(out)?;
    writeln!(out, "{}", DISCLAIMER)?;
    out.flush()
  }

  fn write_failure(&self, out: &mut W, remediation: &str, can_retry: bool) -> io::Result<()> {
    writeln!(out, "Scan unsuccessful")?;
    writeln!(out, "  {}", remediation)?;
    if can_retry {
      writeln!(out, "  Run the scan again when you are ready.")?;
    }
    out.flush()
  }
}

impl<W: Write> Navigator for ConsoleNavigator<W> {
  fn navigate(&self, event: NavigationEvent) {
    let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
    let written = match &event {
      NavigationEvent::ShowResult(record) => self.write_result(&mut out, record),
      NavigationEvent::ShowFailure {
        remediation,
        can_retry,
        ..
      } => self.write_failure(&mut out, remediation, *can_retry),
    };
    if let Err(e) = written {
      warn!("结果展示失败: {}", e);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::scan::FailureReason;

  #[test]
  fn result_page_rounds_for_display() {
    let navigator = ConsoleNavigator::new(Vec::new(), false);
    let record = OutcomeRecord::fixture(Severity::Moderate, 8.449, 0.716);
    navigator.navigate(NavigationEvent::ShowResult(record));

    let text = String::from_utf8(navigator.into_inner()).unwrap();
    assert!(text.contains("Hello, Test"));
    assert!(text.contains("8.4 Hb g/dL"));
    assert!(text.contains("MODERATE"));
    assert!(text.contains("Confidence: 72%"));
    assert!(text.contains("not a medical diagnosis"));
  }

  #[test]
  fn severity_is_colored_when_enabled() {
    let navigator = ConsoleNavigator::new(Vec::new(), true);
    navigator.navigate(NavigationEvent::ShowResult(OutcomeRecord::fixture(
      Severity::Severe,
      6.0,
      0.9,
    )));
    let text = String::from_utf8(navigator.into_inner()).unwrap();
    assert!(text.contains("\x1b[31mSEVERE\x1b[0m"));
  }

  #[test]
  fn failure_shows_remediation() {
    let navigator = ConsoleNavigator::new(Vec::new(), false);
    navigator.navigate(NavigationEvent::failure(FailureReason::FrameSourceLost));
    let text = String::from_utf8(navigator.into_inner()).unwrap();
    assert!(text.contains("Scan unsuccessful"));
    assert!(text.contains("camera stopped responding"));
    assert!(text.contains("Run the scan again"));
  }
}
