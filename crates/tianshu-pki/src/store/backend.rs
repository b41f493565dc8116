//! 存储后端
//!
//! 统一的键值接口，内存实现用于测试与嵌入场景，文件系统实现
//! 把每条记录落成一个JSON文件。键是指纹或带前缀的注册表键，
//! 均为文件名安全字符。

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use crate::error::{PkiError, Result};

/// 键值存储接口
pub trait StorageBackend: Send + Sync {
    /// 写入（存在即覆盖）
    fn put(&mut self, key: &str, value: &[u8]) -> Result<()>;

    /// 读取
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// 删除（不存在不报错）
    fn delete(&mut self, key: &str) -> Result<()>;

    /// 是否存在
    fn contains(&self, key: &str) -> Result<bool>;

    /// 列出全部键
    fn list_keys(&self) -> Result<Vec<String>>;
}

/// 内存后端
#[derive(Default)]
pub struct MemoryBackend {
    entries: HashMap<String, Vec<u8>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryBackend {
    fn put(&mut self, key: &str, value: &[u8]) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key).cloned())
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.entries.contains_key(key))
    }

    fn list_keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.keys().cloned().collect())
    }
}

/// 文件系统后端
///
/// 每个键对应 `<root>/<key>.json`，写入用临时文件加重命名保证
/// 不留半写状态。
pub struct FileSystemBackend {
    root: PathBuf,
}

impl FileSystemBackend {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(PkiError::DuplicateOrWrite(format!(
                "invalid storage key: '{key}'"
            )));
        }
        Ok(self.root.join(format!("{key}.json")))
    }
}

impl StorageBackend for FileSystemBackend {
    fn put(&mut self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read(&path)?))
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.path_for(key)?.exists())
    }

    fn list_keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    keys.push(stem.to_string());
                }
            }
        }
        Ok(keys)
    }
}
