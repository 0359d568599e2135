// 该文件是 Tianping （天平称量） 项目的一部分。
// src/store.rs - 商品记录存储
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

use std::{
  collections::BTreeMap,
  path::{Path, PathBuf},
  sync::{Mutex, MutexGuard},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::product::Product;

#[derive(Error, Debug)]
pub enum StoreError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("商品编号已用尽: {0}")]
  IdExhausted(u64),
}

/// 商品存储边界
pub trait ProductStore {
  /// 插入商品，`id` 冲突时整体替换；`id == 0` 时分配新 id。返回入库后的 id。
  fn insert(&self, product: Product) -> Result<u64, StoreError>;
  fn get(&self, id: u64) -> Result<Option<Product>, StoreError>;
  /// 全部商品，按时间倒序
  fn all(&self) -> Result<Vec<Product>, StoreError>;
  /// `timestamp >= start` 的商品，按时间倒序
  fn since(&self, start: i64) -> Result<Vec<Product>, StoreError>;
  fn delete(&self, product: &Product) -> Result<(), StoreError>;
  fn delete_all(&self) -> Result<(), StoreError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Ledger {
  next_id: u64,
  products: BTreeMap<u64, Product>,
}

impl Ledger {
  fn newest_first<'a>(&self, products: impl Iterator<Item = &'a Product>) -> Vec<Product> {
    let mut list: Vec<Product> = products.cloned().collect();
    list.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
    list
  }
}

/// JSON 文件存储；`path` 为空时只保存在内存中
pub struct JsonProductStore {
  path: Option<PathBuf>,
  ledger: Mutex<Ledger>,
}

impl JsonProductStore {
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
    let path = path.as_ref().to_path_buf();
    let ledger = if path.exists() {
      let text = std::fs::read_to_string(&path)?;
      let ledger: Ledger = serde_json::from_str(&text)?;
      info!(
        "从 {} 读取了 {} 条商品记录",
        path.display(),
        ledger.products.len()
      );
      ledger
    } else {
      debug!("商品记录文件 {} 不存在，将新建", path.display());
      Ledger::default()
    };

    Ok(Self {
      path: Some(path),
      ledger: Mutex::new(ledger),
    })
  }

  pub fn in_memory() -> Self {
    Self {
      path: None,
      ledger: Mutex::new(Ledger::default()),
    }
  }

  fn lock(&self) -> MutexGuard<'_, Ledger> {
    self.ledger.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// 先写临时文件再重命名，避免写到一半的文件
  fn persist(&self, ledger: &Ledger) -> Result<(), StoreError> {
    let Some(path) = &self.path else {
      return Ok(());
    };

    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(ledger)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
  }
}

impl ProductStore for JsonProductStore {
  fn insert(&self, mut product: Product) -> Result<u64, StoreError> {
    let mut ledger = self.lock();

    let id = match product.id {
      0 => ledger.next_id.max(1),
      id => id,
    };
    // 先检查再修改，失败时台账保持不变
    let next = id.checked_add(1).ok_or(StoreError::IdExhausted(id))?;
    product.id = id;
    ledger.next_id = ledger.next_id.max(next);

    if ledger.products.insert(id, product).is_some() {
      debug!("替换商品记录 {}", id);
    }
    self.persist(&ledger)?;
    Ok(id)
  }

  fn get(&self, id: u64) -> Result<Option<Product>, StoreError> {
    Ok(self.lock().products.get(&id).cloned())
  }

  fn all(&self) -> Result<Vec<Product>, StoreError> {
    let ledger = self.lock();
    Ok(ledger.newest_first(ledger.products.values()))
  }

  fn since(&self, start: i64) -> Result<Vec<Product>, StoreError> {
    let ledger = self.lock();
    Ok(ledger.newest_first(ledger.products.values().filter(|p| p.timestamp >= start)))
  }

  fn delete(&self, product: &Product) -> Result<(), StoreError> {
    let mut ledger = self.lock();
    if ledger.products.remove(&product.id).is_some() {
      self.persist(&ledger)?;
    }
    Ok(())
  }

  fn delete_all(&self) -> Result<(), StoreError> {
    let mut ledger = self.lock();
    ledger.products.clear();
    self.persist(&ledger)?;
    info!("已清空商品记录");
    Ok(())
  }
}
