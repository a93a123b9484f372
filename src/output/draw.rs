// 该文件是 Xuese （血色） 项目的一部分。
// src/output/draw.rs - 扫描预览叠加层绘制
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
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::detector::{BoundingBox, LEFT_EYE, RIGHT_EYE};
use crate::output::ScanView;
use crate::roi::RoiSpec;

const SCANNING_COLOR: [u8; 3] = [0, 255, 0]; // 绿色
const IDLE_COLOR: [u8; 3] = [255, 255, 255]; // 白色
const LANDMARK_COLOR: [u8; 3] = [0, 160, 255];
const ROI_COLOR: [u8; 3] = [255, 0, 255];
const PROGRESS_TRACK_COLOR: [u8; 3] = [64, 64, 64];

pub struct Draw {
  box_thickness: i32,
  landmark_radius: i32,
  progress_height: u32,
  progress_margin: u32,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      box_thickness: 2,
      landmark_radius: 3,
      progress_height: 8,
      progress_margin: 12,
    }
  }
}

impl Draw {
  /// 绘制加粗的矩形边框，超出图像的部分被裁掉
  fn draw_box(&self, image: &mut RgbImage, bbox: &BoundingBox, color: [u8; 3]) {
    let (w, h) = (image.width() as i32, image.height() as i32);

    let x_min = (bbox.top_left.x.floor() as i32).clamp(0, w - 1);
    let y_min = (bbox.top_left.y.floor() as i32).clamp(0, h - 1);
    let x_max = (bbox.bottom_right.x.ceil() as i32).clamp(0, w - 1);
    let y_max = (bbox.bottom_right.y.ceil() as i32).clamp(0, h - 1);

    for thickness in 0..self.box_thickness {
      let width = x_max - x_min - 2 * thickness;
      let height = y_max - y_min - 2 * thickness;
      if width <= 0 || height <= 0 {
        return;
      }
      let rect = Rect::at(x_min + thickness, y_min + thickness).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, Rgb(color));
    }
  }

  fn draw_progress(&self, image: &mut RgbImage, progress: f32, color: [u8; 3]) {
    let (w, h) = image.dimensions();
    if w <= 2 * self.progress_margin || h <= self.progress_height + self.progress_margin {
      return;
    }

    let track_width = w - 2 * self.progress_margin;
    let y = (h - self.progress_margin - self.progress_height) as i32;
    let x = self.progress_margin as i32;
    draw_filled_rect_mut(
      image,
      Rect::at(x, y).of_size(track_width, self.progress_height),
      Rgb(PROGRESS_TRACK_COLOR),
    );

    let filled = (track_width as f32 * progress.clamp(0.0, 100.0) / 100.0).round() as u32;
    if filled > 0 {
      draw_filled_rect_mut(
        image,
        Rect::at(x, y).of_size(filled, self.progress_height),
        Rgb(color),
      );
    }
  }

  /// 在帧上叠加人脸框、眼部关键点、预期 ROI 与进度条
  pub fn draw_scan(&self, image: &mut RgbImage, view: &ScanView<'_>) {
    if image.width() == 0 || image.height() == 0 {
      return;
    }

    let color = if view.state.is_scanning {
      SCANNING_COLOR
    } else {
      IDLE_COLOR
    };

    if let Some(detection) = view.detection {
      self.draw_box(image, &detection.bbox, color);

      for index in [RIGHT_EYE, LEFT_EYE] {
        if let Some(point) = detection.landmarks.get(index) {
          draw_filled_circle_mut(
            image,
            (point.x.round() as i32, point.y.round() as i32),
            self.landmark_radius,
            Rgb(LANDMARK_COLOR),
          );
        }
      }

      if let Ok(roi) = RoiSpec::from_detection(detection) {
        let roi_box = BoundingBox::new(roi.left, roi.top, roi.left + roi.side, roi.top + roi.side);
        self.draw_box(image, &roi_box, ROI_COLOR);
      }
    }

    self.draw_progress(image, view.state.progress, color);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::detector::{Detection, Point};
  use crate::scan::{ScanPhase, ScanState};

  #[test]
  fn scanning_box_is_green_and_progress_is_filled() {
    let mut image = RgbImage::new(320, 240);
    let detection = Detection {
      bbox: BoundingBox::new(40.0, 40.0, 200.0, 200.0),
      landmarks: vec![Point::new(90.0, 100.0), Point::new(150.0, 100.0)],
      score: 0.95,
    };
    let state = ScanState {
      progress: 50.0,
      is_scanning: true,
      phase: ScanPhase::Scanning,
    };

    Draw::default().draw_scan(
      &mut image,
      &ScanView {
        detection: Some(&detection),
        state: &state,
      },
    );

    assert_eq!(image.get_pixel(40, 120), &Rgb(SCANNING_COLOR));
    assert_eq!(image.get_pixel(90, 100), &Rgb(LANDMARK_COLOR));
    // 进度条左半部分已填充，右半部分为底色
    assert_eq!(image.get_pixel(20, 224), &Rgb(SCANNING_COLOR));
    assert_eq!(image.get_pixel(300, 224), &Rgb(PROGRESS_TRACK_COLOR));
  }

  #[test]
  fn box_outside_frame_is_clipped() {
    let mut image = RgbImage::new(32, 32);
    let state = ScanState::default();
    let detection = Detection {
      bbox: BoundingBox::new(-50.0, -50.0, 500.0, 500.0),
      landmarks: Vec::new(),
      score: 0.8,
    };
    Draw::default().draw_scan(
      &mut image,
      &ScanView {
        detection: Some(&detection),
        state: &state,
      },
    );
    assert_eq!(image.get_pixel(0, 5), &Rgb(IDLE_COLOR));
  }
}
