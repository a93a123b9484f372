// 该文件是 Xuese （血色） 项目的一部分。
// src/bin/scan_camera.rs - 摄像头眼部贫血筛查
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

use std::time::Duration;

use anyhow::{Result, bail};
use clap::Parser;
use tracing::{error, info, warn};
use url::Url;

use xuese::{
  FromUrl,
  detector::DetectorWrapper,
  handoff::OutcomeHandoff,
  input::{CaptureOptions, InputWrapper, LatestFrameBuffer},
  interpret::HbScale,
  model::ModelWrapper,
  outcome::{Gender, SubjectContext},
  output::{ConsoleNavigator, PreviewWrapper, StoreWrapper},
  scan::ScanConfig,
  task::{CancelToken, Pipeline, ScanTask, SessionOutcome, Task},
};

/// Xuese 眼部贫血筛查参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 贫血分类模型，例如 onnx:///models/anemia.onnx
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 人脸检测模型，例如 blazeface:///models/blazeface.onnx
  #[arg(long, value_name = "DETECTOR")]
  pub detector: Url,
  /// 输入来源：v4l2:///dev/video0、image:///face.png 或 folder:///frames
  #[arg(long, value_name = "SOURCE", default_value = "v4l2:///dev/video0")]
  pub input: Url,
  /// 结果保存目录
  #[arg(long, value_name = "STORE", default_value = "folder:///tmp/xuese")]
  pub store: Url,
  /// 预览帧记录目录，例如 folder:///tmp/preview?every=5
  #[arg(long, value_name = "PREVIEW")]
  pub preview: Option<Url>,

  /// 受检者姓名
  #[arg(long, default_value = "")]
  pub name: String,
  #[arg(long)]
  pub age: Option<u32>,
  /// male / female / other
  #[arg(long)]
  pub gender: Option<Gender>,
  /// 受检者是否知道自己的血红蛋白值
  #[arg(long)]
  pub known_hb: Option<bool>,
  /// 自报的血红蛋白值（g/dL）
  #[arg(long)]
  pub hb_value: Option<f32>,

  /// 扫描截止时间（毫秒）
  #[arg(long, default_value_t = 20_000)]
  pub timeout_ms: u64,
  /// 640 像素参考帧宽下的最小人脸宽度
  #[arg(long, default_value_t = 80.0)]
  pub min_face_width: f32,
  /// 取帧等待时长（毫秒）
  #[arg(long, default_value_t = 50)]
  pub poll_ms: u64,
  /// 概率为 1 时对应的血红蛋白估计值（g/dL）
  #[arg(long, default_value_t = 5.0)]
  pub hb_min: f32,
  /// 概率为 0 时对应的血红蛋白估计值（g/dL）
  #[arg(long, default_value_t = 15.0)]
  pub hb_max: f32,
  /// 采集期间开启补光
  #[arg(long)]
  pub illumination: bool,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("分类模型: {}", args.model);
  info!("人脸检测模型: {}", args.detector);
  info!("输入来源: {}", args.input);
  info!("结果保存: {}", args.store);

  let localizer = DetectorWrapper::from_url(&args.detector)?;
  let model = ModelWrapper::from_url(&args.model)?;
  let store = StoreWrapper::from_url(&args.store)?;

  let subject = SubjectContext {
    name: args.name.clone(),
    age: args.age,
    gender: args.gender,
    known_hb: args.known_hb,
    hb_value: args.hb_value,
  };
  let handoff = OutcomeHandoff::new(store, ConsoleNavigator::stdout(), subject);

  let cancel = CancelToken::new();
  let handler_token = cancel.clone();
  ctrlc::set_handler(move || {
    warn!("收到中断信号，取消扫描...");
    handler_token.cancel();
  })?;

  let input_url = args.input.clone();
  let feed = match LatestFrameBuffer::spawn(
    move || InputWrapper::from_url(&input_url),
    CaptureOptions {
      illumination: args.illumination,
    },
  ) {
    Ok(feed) => feed,
    Err(e) if e.is_permission_denied() => {
      error!("摄像头权限被拒绝: {}", e);
      bail!("Camera permission denied or not available.");
    }
    Err(e) => return Err(e.into()),
  };
  info!("帧源已就绪: {}x{}", feed.width(), feed.height());

  let config = ScanConfig {
    min_face_width: args.min_face_width,
    timeout: Duration::from_millis(args.timeout_ms),
    ..ScanConfig::default()
  };
  if !(args.hb_min.is_finite() && args.hb_max.is_finite() && args.hb_min < args.hb_max) {
    bail!("血红蛋白范围无效: {} ~ {}", args.hb_min, args.hb_max);
  }
  let mut task = ScanTask::new(config)
    .with_cancel_token(cancel)
    .with_scale(HbScale {
      min_hb: args.hb_min,
      max_hb: args.hb_max,
    })
    .with_poll_interval(Duration::from_millis(args.poll_ms));
  if let Some(preview) = &args.preview {
    task = task.with_preview(Box::new(PreviewWrapper::from_url(preview)?));
  }

  match task.run_task(feed, Pipeline { localizer, model }, &handoff) {
    SessionOutcome::Completed(record) => {
      info!("扫描完成: {}", record);
      Ok(())
    }
    SessionOutcome::Failed(reason) => bail!("扫描失败: {}", reason),
    SessionOutcome::Cancelled => {
      warn!("扫描已取消");
      Ok(())
    }
  }
}
