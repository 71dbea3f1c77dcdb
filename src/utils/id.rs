//! 标识符生成
//!
//! - 伪模块名：`_pseudo_` 前缀加 10 位 62 进制随机串
//! - 加载集 ID：UUID v4，贯穿该加载集的所有日志

use rand::Rng;

/// 62 进制字符集
const BASE62_CHARS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// 短 ID 长度
const ID_LENGTH: usize = 10;

/// 伪模块名前缀，普通模块不得使用
pub const PSEUDO_MODULE_PREFIX: &str = "_pseudo_";

/// 生成 10 位 62 进制 ID
///
/// ```
/// use chips_modules::utils::id::generate_id;
///
/// let id = generate_id();
/// assert_eq!(id.len(), 10);
/// ```
pub fn generate_id() -> String {
    let mut rng = rand::thread_rng();
    (0..ID_LENGTH)
        .map(|_| BASE62_CHARS[rng.gen_range(0..BASE62_CHARS.len())] as char)
        .collect()
}

/// 生成伪模块名
pub fn pseudo_module_name() -> String {
    format!("{}{}", PSEUDO_MODULE_PREFIX, generate_id())
}

/// 判断名称是否属于伪模块
pub fn is_pseudo_module_name(name: &str) -> bool {
    name.starts_with(PSEUDO_MODULE_PREFIX)
}

/// 生成 UUID v4 格式的 ID
pub fn generate_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generate_id_charset() {
        let id = generate_id();
        assert_eq!(id.len(), ID_LENGTH);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_generate_id_uniqueness() {
        let mut ids = HashSet::new();
        for _ in 0..1000 {
            assert!(ids.insert(generate_id()), "ID collision detected");
        }
    }

    #[test]
    fn test_pseudo_module_name() {
        let name = pseudo_module_name();
        assert!(is_pseudo_module_name(&name));
        assert_eq!(name.len(), PSEUDO_MODULE_PREFIX.len() + ID_LENGTH);
        assert!(!is_pseudo_module_name("logger"));
    }

    #[test]
    fn test_generate_uuid() {
        let uuid = generate_uuid();
        assert_eq!(uuid.len(), 36);
        assert!(uuid.contains('-'));
    }
}
