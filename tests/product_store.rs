// 该文件是 Tianping （天平称量） 项目的一部分。
// tests/product_store.rs - 商品台账持久化测试
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

use tianping::{
  model::{BoundingBox, Detection},
  product::Product,
  store::{JsonProductStore, ProductStore, StoreError},
};

fn detection(label: &str, confidence: f32) -> Detection {
  Detection {
    label: label.into(),
    confidence,
    bounding_box: BoundingBox::new(10.0, 10.0, 60.0, 60.0),
  }
}

#[test]
fn ledger_survives_reopen() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("ledger").join("products.json");

  let (apple_id, pear_id) = {
    let store = JsonProductStore::open(&path).unwrap();
    let apple = Product::from_detection(&detection("apple", 0.91), 1250.0)
      .with_price_per_kg(1990.0)
      .with_timestamp(1_700_000_000_000)
      .with_image_uri("image:///tmp/apple.jpg");
    let pear = Product::from_detection(&detection("pear", 0.77), 320.0)
      .with_price_per_kg(2490.0)
      .with_timestamp(1_700_000_500_000);
    (store.insert(apple).unwrap(), store.insert(pear).unwrap())
  };
  assert!(path.exists());

  let store = JsonProductStore::open(&path).unwrap();
  let all = store.all().unwrap();
  assert_eq!(all.len(), 2);
  assert_eq!(all[0].id, pear_id);
  assert_eq!(all[1].id, apple_id);

  let apple = store.get(apple_id).unwrap().unwrap();
  assert_eq!(apple.name, "apple");
  assert_eq!(apple.formatted_weight(), "1.25 kg");
  assert_eq!(apple.formatted_price(), "$2,488");
  assert_eq!(apple.image_uri.as_deref(), Some("image:///tmp/apple.jpg"));

  // 新 id 不与已有记录冲突
  let plum = store
    .insert(Product::new("plum", 100.0, 0.6).with_timestamp(1_700_001_000_000))
    .unwrap();
  assert!(plum > apple_id && plum > pear_id);

  let recent = store.since(1_700_000_500_000).unwrap();
  let names: Vec<_> = recent.iter().map(|p| p.name.as_str()).collect();
  assert_eq!(names, ["plum", "pear"]);
}

#[test]
fn deletions_are_persisted() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("products.json");

  let store = JsonProductStore::open(&path).unwrap();
  let id = store.insert(Product::new("apple", 500.0, 0.9)).unwrap();
  store.insert(Product::new("pear", 500.0, 0.9)).unwrap();
  let apple = store.get(id).unwrap().unwrap();
  store.delete(&apple).unwrap();
  drop(store);

  let store = JsonProductStore::open(&path).unwrap();
  assert!(store.get(id).unwrap().is_none());
  assert_eq!(store.all().unwrap().len(), 1);

  store.delete_all().unwrap();
  drop(store);
  assert!(JsonProductStore::open(&path).unwrap().all().unwrap().is_empty());
}

#[test]
fn corrupt_ledger_is_an_error() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("products.json");
  std::fs::write(&path, "not json").unwrap();
  assert!(matches!(
    JsonProductStore::open(&path),
    Err(StoreError::JsonError(_))
  ));
}
