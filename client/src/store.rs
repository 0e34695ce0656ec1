//! 安全存储模块职责：
//! 1. 定义客户端依赖的最小键值安全存储接口（get/set/delete）。
//! 2. 提供基于本地 JSON 文件的默认实现，落盘在用户目录下。
//! 3. 提供纯内存实现，覆盖测试与 HOME 缺失的降级场景。

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// 设备 ID 存储键。
pub const DEVICE_ID_KEY: &str = "apiDeviceId";
/// 访问令牌存储键。
pub const ACCESS_TOKEN_KEY: &str = "authToken";
/// 刷新令牌存储键。
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// 安全键值存储接口；实现方负责静态加密等落盘保护。
pub trait SecureStore: Send + Sync {
    /// 读取键值；键不存在返回 `None`。
    fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    /// 写入键值。
    fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;
    /// 删除键值；键不存在视为成功。
    fn delete(&self, key: &str) -> anyhow::Result<()>;
}

/// 存储文件结构。
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    /// 键值对。
    #[serde(default)]
    entries: BTreeMap<String, String>,
}

/// 基于本地 JSON 文件的安全存储。
pub struct FileSecureStore {
    /// 存储文件路径；为空时表示无法落盘（例如 HOME 缺失），退化为纯内存。
    path: Option<PathBuf>,
    /// 内存中的键值镜像。
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileSecureStore {
    /// 从默认路径加载存储；文件缺失或解析失败时回退为空集合。
    pub fn load_default() -> Self {
        Self::load_from(default_store_path())
    }

    /// 从指定路径加载存储。
    pub fn load_from(path: Option<PathBuf>) -> Self {
        let entries = path
            .as_deref()
            .and_then(|path_ref| match fs::read(path_ref) {
                Ok(bytes) => match serde_json::from_slice::<StoreFile>(&bytes) {
                    Ok(parsed) => Some(parsed.entries),
                    Err(err) => {
                        warn!("parse secure store file failed: {err}");
                        None
                    }
                },
                Err(_) => None,
            })
            .unwrap_or_default();

        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    /// 将当前键值全量写回文件。
    fn persist(&self, entries: &BTreeMap<String, String>) -> anyhow::Result<()> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create store dir failed: {}", parent.display()))?;
        }
        let payload = serde_json::to_string_pretty(&StoreFile {
            entries: entries.clone(),
        })
        .context("encode secure store failed")?;
        fs::write(path, format!("{payload}\n"))
            .with_context(|| format!("write secure store failed: {}", path.display()))?;
        restrict_permissions(path);
        Ok(())
    }
}

impl SecureStore for FileSecureStore {
    /// 读取键值。
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let entries = self.entries.lock().expect("secure store lock poisoned");
        Ok(entries.get(key).cloned())
    }

    /// 写入键值并落盘。
    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut entries = self.entries.lock().expect("secure store lock poisoned");
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries)
    }

    /// 删除键值并落盘。
    fn delete(&self, key: &str) -> anyhow::Result<()> {
        let mut entries = self.entries.lock().expect("secure store lock poisoned");
        entries.remove(key);
        self.persist(&entries)
    }
}

/// 纯内存安全存储。
#[derive(Default)]
pub struct MemorySecureStore {
    /// 内存键值对。
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemorySecureStore {
    /// 构造空的内存存储。
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecureStore for MemorySecureStore {
    /// 读取键值。
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let entries = self.entries.lock().expect("memory store lock poisoned");
        Ok(entries.get(key).cloned())
    }

    /// 写入键值。
    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut entries = self.entries.lock().expect("memory store lock poisoned");
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    /// 删除键值。
    fn delete(&self, key: &str) -> anyhow::Result<()> {
        let mut entries = self.entries.lock().expect("memory store lock poisoned");
        entries.remove(key);
        Ok(())
    }
}

/// 返回默认存储文件路径：`~/.storybook-template/secure_store.json`。
fn default_store_path() -> Option<PathBuf> {
    let home = std::env::var("HOME").ok()?;
    if home.trim().is_empty() {
        return None;
    }
    Some(
        Path::new(&home)
            .join(".storybook-template")
            .join("secure_store.json"),
    )
}

/// 收紧落盘文件权限，仅属主可读写。
#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(err) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
        warn!("restrict secure store permissions failed: {err}");
    }
}

/// 非 unix 平台无权限位可收紧。
#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{FileSecureStore, MemorySecureStore, SecureStore};

    fn make_temp_path(prefix: &str) -> PathBuf {
        let mut dir = std::env::temp_dir();
        let suffix: u64 = rand::random();
        dir.push(format!("st-store-{prefix}-{suffix}"));
        dir.join("secure_store.json")
    }

    #[test]
    fn file_store_round_trips_across_reload() {
        let path = make_temp_path("reload");
        let store = FileSecureStore::load_from(Some(path.clone()));
        store.set("authToken", "tok_1").expect("set should succeed");
        store
            .set("refreshToken", "ref_1")
            .expect("set should succeed");

        let reloaded = FileSecureStore::load_from(Some(path.clone()));
        assert_eq!(
            reloaded.get("authToken").expect("get should succeed"),
            Some("tok_1".to_string())
        );
        assert_eq!(
            reloaded.get("refreshToken").expect("get should succeed"),
            Some("ref_1".to_string())
        );

        let _ = std::fs::remove_dir_all(path.parent().expect("path has parent"));
    }

    #[test]
    fn file_store_delete_removes_key() {
        let path = make_temp_path("delete");
        let store = FileSecureStore::load_from(Some(path.clone()));
        store.set("authToken", "tok_1").expect("set should succeed");
        store.delete("authToken").expect("delete should succeed");
        assert_eq!(store.get("authToken").expect("get should succeed"), None);

        let reloaded = FileSecureStore::load_from(Some(path.clone()));
        assert_eq!(reloaded.get("authToken").expect("get should succeed"), None);

        let _ = std::fs::remove_dir_all(path.parent().expect("path has parent"));
    }

    #[test]
    fn pathless_file_store_degrades_to_memory() {
        let store = FileSecureStore::load_from(None);
        store.set("authToken", "tok_1").expect("set should succeed");
        assert_eq!(
            store.get("authToken").expect("get should succeed"),
            Some("tok_1".to_string())
        );
    }

    #[test]
    fn memory_store_get_missing_returns_none() {
        let store = MemorySecureStore::new();
        assert_eq!(store.get("absent").expect("get should succeed"), None);
        store.delete("absent").expect("delete absent is fine");
    }
}
