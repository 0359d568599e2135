// 该文件是 Tianping （天平称量） 项目的一部分。
// src/bin/product_ledger.rs - 称重商品台账
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

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local, NaiveDate, TimeZone};
use clap::{Parser, Subcommand};
use url::Url;

use tianping::{
  FromUrl,
  input::ImageFileInput,
  model::{DetectorConfig, Model},
  product::{Product, format_price},
  repository::{DetectionFailure, LabelSource, open_detector},
  store::{JsonProductStore, ProductStore},
};
use tracing::{info, warn};

/// 称重商品台账
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 台账文件
  #[arg(long, value_name = "FILE", default_value = "products.json")]
  pub store: PathBuf,

  #[command(subcommand)]
  pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// 识别图像中的商品并记入台账
  Weigh {
    /// 模型路径，例如 onnx:///models/yolo.onnx
    #[arg(long, value_name = "MODEL")]
    model: Url,
    /// 标签文件，每行一个标签
    #[arg(long, value_name = "FILE")]
    labels: PathBuf,
    /// 商品图像，例如 image:///tmp/apple.jpg
    #[arg(long, value_name = "SOURCE")]
    input: Url,
    /// 重量（克）
    #[arg(long, value_name = "GRAMS")]
    weight: f32,
    /// 每公斤单价
    #[arg(long, value_name = "PRICE", default_value = "0")]
    price_per_kg: f32,
    /// 置信度阈值 (0.0 - 1.0)
    #[arg(long, default_value = "0.5", value_name = "THRESHOLD")]
    confidence: f32,
    /// NMS IOU 阈值 (0.0 - 1.0)
    #[arg(long, default_value = "0.45", value_name = "THRESHOLD")]
    nms_threshold: f32,
  },
  /// 按时间倒序列出商品
  List {
    /// 起始日期（YYYY-MM-DD）或毫秒时间戳
    #[arg(long, value_name = "SINCE")]
    since: Option<String>,
  },
  /// 显示单条记录
  Show { id: u64 },
  /// 删除单条记录
  Delete { id: u64 },
  /// 清空台账
  Clear,
}

/// 日期按本地时区零点解释，与列表显示的本地时间一致
fn parse_since(since: &str) -> Result<i64> {
  if let Ok(millis) = since.parse::<i64>() {
    return Ok(millis);
  }
  let date = NaiveDate::parse_from_str(since, "%Y-%m-%d")
    .with_context(|| format!("无法解析起始时间: {}", since))?;
  let start = date
    .and_hms_opt(0, 0, 0)
    .context("无效的起始时间")?;
  let start = Local
    .from_local_datetime(&start)
    .earliest()
    .with_context(|| format!("本地时区不存在该时间: {}", since))?;
  Ok(start.timestamp_millis())
}

fn print_product(product: &Product) {
  let recorded_at = product
    .recorded_at()
    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
    .unwrap_or_else(|| "-".into());
  println!(
    "#{:<5} {:<20} {:>10} {:>12}  {:>5.1}%  {}",
    product.id,
    product.name,
    product.formatted_weight(),
    product.formatted_price(),
    product.confidence * 100.0,
    recorded_at
  );
}

fn weigh(
  store: &JsonProductStore,
  model: &Url,
  labels: PathBuf,
  input: &Url,
  weight: f32,
  price_per_kg: f32,
  config: DetectorConfig,
) -> Result<()> {
  let mut source = ImageFileInput::from_url(input)?;
  let frame = source.next().context("没有输入帧")?;
  let detector = open_detector(model, LabelSource::File(labels), config)?;

  let result = match detector.infer(&frame) {
    Ok(result) => result,
    Err(DetectionFailure::NoObjectsDetected) => bail!("图像中未识别到商品"),
    Err(e) => return Err(e.into()),
  };

  let Some(best) = result.best() else {
    bail!("图像中未识别到商品");
  };
  if result.len() > 1 {
    warn!("识别到 {} 个物体，取置信度最高的 {}", result.len(), best.label);
  }

  let product = Product::from_detection(best, weight)
    .with_price_per_kg(price_per_kg)
    .with_image_uri(input.as_str());
  let id = store.insert(product)?;
  info!("商品已入库: {}", id);

  if let Some(product) = store.get(id)? {
    print_product(&product);
  }
  Ok(())
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  let store = JsonProductStore::open(&args.store)
    .with_context(|| format!("无法打开台账文件 {}", args.store.display()))?;

  match args.command {
    Command::Weigh {
      model,
      labels,
      input,
      weight,
      price_per_kg,
      confidence,
      nms_threshold,
    } => {
      if !(weight.is_finite() && weight > 0.0) {
        bail!("重量必须为正数: {}", weight);
      }
      let config = DetectorConfig {
        confidence_threshold: confidence,
        iou_threshold: nms_threshold,
      };
      weigh(&store, &model, labels, &input, weight, price_per_kg, config)?;
    }
    Command::List { since } => {
      let products = match since {
        Some(since) => store.since(parse_since(&since)?)?,
        None => store.all()?,
      };
      for product in &products {
        print_product(product);
      }
      let total: f32 = products.iter().map(Product::total_price).sum();
      println!("共 {} 条, 合计 {}", products.len(), format_price(total));
    }
    Command::Show { id } => match store.get(id)? {
      Some(product) => {
        print_product(&product);
        if let Some(uri) = &product.image_uri {
          println!("图像: {}", uri);
        }
        if let Some(recorded_at) = DateTime::from_timestamp_millis(product.timestamp) {
          println!("UTC: {}", recorded_at.to_rfc3339());
        }
      }
      None => bail!("记录不存在: {}", id),
    },
    Command::Delete { id } => match store.get(id)? {
      Some(product) => {
        store.delete(&product)?;
        info!("已删除记录 {}", id);
      }
      None => bail!("记录不存在: {}", id),
    },
    Command::Clear => store.delete_all()?,
  }

  Ok(())
}
