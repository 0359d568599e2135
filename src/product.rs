// 该文件是 Tianping （天平称量） 项目的一部分。
// src/product.rs - 称重商品记录
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

use chrono::{DateTime, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::model::Detection;

/// 识别并确认后的商品。`id == 0` 表示尚未入库，由存储分配。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
  pub id: u64,
  pub name: String,
  /// 重量（克）
  pub weight: f32,
  pub confidence: f32,
  /// 每公斤单价（CLP）
  pub price_per_kg: f32,
  /// 毫秒时间戳
  pub timestamp: i64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub image_uri: Option<String>,
}

impl Product {
  pub fn new(name: impl Into<String>, weight: f32, confidence: f32) -> Self {
    Self {
      id: 0,
      name: name.into(),
      weight,
      confidence,
      price_per_kg: 0.0,
      timestamp: Utc::now().timestamp_millis(),
      image_uri: None,
    }
  }

  /// 以检测结果的标签和置信度创建商品
  pub fn from_detection(detection: &Detection, weight: f32) -> Self {
    Self::new(detection.label.clone(), weight, detection.confidence)
  }

  pub fn with_price_per_kg(mut self, price_per_kg: f32) -> Self {
    self.price_per_kg = price_per_kg;
    self
  }

  pub fn with_timestamp(mut self, timestamp: i64) -> Self {
    self.timestamp = timestamp;
    self
  }

  pub fn with_image_uri(mut self, image_uri: impl Into<String>) -> Self {
    self.image_uri = Some(image_uri.into());
    self
  }

  pub fn total_price(&self) -> f32 {
    (self.weight / 1000.0) * self.price_per_kg
  }

  /// 1 kg 及以上显示为 `1.25 kg`，否则显示为 `350 g`
  pub fn formatted_weight(&self) -> String {
    if self.weight >= 1000.0 {
      format!("{:.2} kg", self.weight / 1000.0)
    } else {
      format!("{:.0} g", self.weight)
    }
  }

  pub fn formatted_price(&self) -> String {
    format_price(self.total_price())
  }

  pub fn recorded_at(&self) -> Option<DateTime<Local>> {
    Local.timestamp_millis_opt(self.timestamp).single()
  }
}

/// 取整并按千位分组，例如 `$12,345`
pub fn format_price(amount: f32) -> String {
  format!("${}", group_thousands(amount.round() as i64))
}

fn group_thousands(value: i64) -> String {
  let digits = value.unsigned_abs().to_string();
  let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
  if value < 0 {
    grouped.push('-');
  }
  for (i, ch) in digits.chars().enumerate() {
    if i > 0 && (digits.len() - i) % 3 == 0 {
      grouped.push(',');
    }
    grouped.push(ch);
  }
  grouped
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::BoundingBox;

  #[test]
  fn total_price_uses_kilograms() {
    let product = Product::new("apple", 1500.0, 0.9).with_price_per_kg(2000.0);
    assert!((product.total_price() - 3000.0).abs() < 1e-3);
  }

  #[test]
  fn weight_formatting() {
    assert_eq!(Product::new("a", 350.0, 0.9).formatted_weight(), "350 g");
    assert_eq!(Product::new("a", 999.4, 0.9).formatted_weight(), "999 g");
    assert_eq!(Product::new("a", 1000.0, 0.9).formatted_weight(), "1.00 kg");
    assert_eq!(Product::new("a", 1250.0, 0.9).formatted_weight(), "1.25 kg");
  }

  #[test]
  fn price_formatting_groups_thousands() {
    let product = Product::new("beef", 2500.0, 0.9).with_price_per_kg(9990.0);
    assert_eq!(product.formatted_price(), "$24,975");
    assert_eq!(Product::new("x", 100.0, 0.9).formatted_price(), "$0");
    let big = Product::new("x", 1_000_000.0, 0.9).with_price_per_kg(1234.0);
    assert_eq!(big.formatted_price(), "$1,234,000");
  }

  #[test]
  fn group_thousands_handles_sign() {
    assert_eq!(group_thousands(-1234567), "-1,234,567");
    assert_eq!(group_thousands(999), "999");
    assert_eq!(group_thousands(1000), "1,000");
  }

  #[test]
  fn from_detection_copies_label_and_confidence() {
    let detection = Detection {
      label: "banana".into(),
      confidence: 0.87,
      bounding_box: BoundingBox::new(0.0, 0.0, 1.0, 1.0),
    };
    let product = Product::from_detection(&detection, 420.0);
    assert_eq!(product.id, 0);
    assert_eq!(product.name, "banana");
    assert_eq!(product.confidence, 0.87);
    assert_eq!(product.weight, 420.0);
  }
}
