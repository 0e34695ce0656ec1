//! 设备身份模块职责：
//! 1. 惰性创建并缓存每次安装唯一的设备 ID（16 随机字节的小写 hex）。
//! 2. 优先内存缓存，其次安全存储，最后生成并尽力持久化。
//! 3. 设备 ID 的存储故障只告警不上抛，可用性优先于持久性。

use std::sync::{Arc, Mutex};

use rand::RngCore;
use rand::rngs::OsRng;
use tracing::warn;

use crate::store::{DEVICE_ID_KEY, SecureStore};

/// 设备 ID 随机字节数。
const DEVICE_ID_BYTE_LEN: usize = 16;

/// 设备身份管理器。
pub struct DeviceIdentity {
    /// 安全存储。
    store: Arc<dyn SecureStore>,
    /// 进程内缓存；首个写入者胜出。
    cached: Mutex<Option<String>>,
}

impl DeviceIdentity {
    /// 构造设备身份管理器。
    pub fn new(store: Arc<dyn SecureStore>) -> Self {
        Self {
            store,
            cached: Mutex::new(None),
        }
    }

    /// 获取设备 ID：内存缓存 → 安全存储 → 生成并尽力持久化。
    ///
    /// 同一进程内重复调用返回相同值；跨重启只要存储未被清空也保持稳定。
    pub fn device_id(&self) -> String {
        if let Some(cached) = self
            .cached
            .lock()
            .expect("device id cache lock poisoned")
            .clone()
        {
            return cached;
        }

        match self.store.get(DEVICE_ID_KEY) {
            Ok(Some(stored)) => {
                return self.cache_first_write(stored);
            }
            Ok(None) => {}
            Err(err) => {
                warn!("read device id from secure store failed: {err}");
            }
        }

        let id = random_hex(DEVICE_ID_BYTE_LEN);
        let id = self.cache_first_write(id);

        if let Err(err) = self.store.set(DEVICE_ID_KEY, &id) {
            warn!("persist device id to secure store failed: {err}");
        }
        id
    }

    /// 首个写入者胜出地写缓存，返回最终生效的值。
    ///
    /// 冷存储下并发首访可能各自生成一个 ID：两个值各自内部一致，
    /// 持久化由先 set 者决定，后续调用统一回到缓存值。
    fn cache_first_write(&self, candidate: String) -> String {
        let mut cached = self.cached.lock().expect("device id cache lock poisoned");
        match cached.as_ref() {
            Some(existing) => existing.clone(),
            None => {
                *cached = Some(candidate.clone());
                candidate
            }
        }
    }
}

/// 生成指定字节数的加密随机数并渲染为小写 hex。
pub(crate) fn random_hex(byte_len: usize) -> String {
    let mut bytes = vec![0u8; byte_len];
    OsRng.fill_bytes(&mut bytes);
    bytes_to_hex(&bytes)
}

/// 字节转小写 hex 字符串。
fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        use std::fmt::Write;
        let _ = write!(&mut out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{DeviceIdentity, random_hex};
    use crate::store::{DEVICE_ID_KEY, MemorySecureStore, SecureStore};

    /// 只允许读一次、随后全部失败的存储，模拟存储中途不可用。
    struct FlakyStore {
        inner: MemorySecureStore,
        reads_left: std::sync::Mutex<u32>,
    }

    impl SecureStore for FlakyStore {
        fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
            let mut reads = self.reads_left.lock().expect("lock");
            if *reads == 0 {
                anyhow::bail!("store unavailable");
            }
            *reads -= 1;
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
            self.inner.set(key, value)
        }

        fn delete(&self, key: &str) -> anyhow::Result<()> {
            self.inner.delete(key)
        }
    }

    #[test]
    fn random_hex_has_expected_shape() {
        let id = random_hex(16);
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn device_id_is_stable_within_process() {
        let identity = DeviceIdentity::new(Arc::new(MemorySecureStore::new()));
        let first = identity.device_id();
        let second = identity.device_id();
        assert_eq!(first, second);
    }

    #[test]
    fn device_id_prefers_stored_value() {
        let store = Arc::new(MemorySecureStore::new());
        store
            .set(DEVICE_ID_KEY, "00112233445566778899aabbccddeeff")
            .expect("seed store");
        let identity = DeviceIdentity::new(store);
        assert_eq!(identity.device_id(), "00112233445566778899aabbccddeeff");
    }

    #[test]
    fn device_id_survives_store_outage_after_first_call() {
        let store = Arc::new(FlakyStore {
            inner: MemorySecureStore::new(),
            reads_left: std::sync::Mutex::new(1),
        });
        let identity = DeviceIdentity::new(store);
        let first = identity.device_id();
        // 第二次调用时存储读取已必然失败，仍应命中内存缓存。
        let second = identity.device_id();
        assert_eq!(first, second);
    }

    /// 读写全部失败的存储，模拟安全存储完全不可用。
    struct BrokenStore;

    impl SecureStore for BrokenStore {
        fn get(&self, _key: &str) -> anyhow::Result<Option<String>> {
            anyhow::bail!("store read failed")
        }

        fn set(&self, _key: &str, _value: &str) -> anyhow::Result<()> {
            anyhow::bail!("store write failed")
        }

        fn delete(&self, _key: &str) -> anyhow::Result<()> {
            anyhow::bail!("store delete failed")
        }
    }

    #[test]
    fn device_id_is_generated_and_stable_when_store_is_broken() {
        let identity = DeviceIdentity::new(Arc::new(BrokenStore));
        // 读失败只记警告，仍应生成新 id；写失败同样不中断调用。
        let first = identity.device_id();
        assert_eq!(first.len(), 32);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(identity.device_id(), first);
    }

    #[test]
    fn device_id_persists_to_store_on_generation() {
        let store = Arc::new(MemorySecureStore::new());
        let identity = DeviceIdentity::new(Arc::clone(&store) as Arc<dyn SecureStore>);
        let id = identity.device_id();
        assert_eq!(
            store.get(DEVICE_ID_KEY).expect("get should succeed"),
            Some(id)
        );
    }
}
