//! 版本号解析与兼容性判断
//!
//! 版本格式为 `MAJOR.MINOR.PATCH[+BUILD]`，各数字段不允许前导零。
//! 兼容性规则：
//!
//! - 主版本号必须一致；
//! - 主版本号为 0 时次版本号也必须一致（0.x 视为不稳定）；
//! - 其余情况下实际版本不低于要求版本即可。
//!
//! # 示例
//!
//! ```rust
//! use chips_modules::utils::version::Version;
//!
//! let got: Version = "1.5.0".parse().unwrap();
//! let required = Version::new(1, 2, 0);
//! assert!(got.is_compatible_with(&required));
//! assert!(!required.is_compatible_with(&got));
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::utils::{ModuleError, Result};

/// 模块版本号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    /// 主版本号
    pub major: u32,
    /// 次版本号
    pub minor: u32,
    /// 修订号
    pub patch: u32,
    /// 构建号
    pub build: Option<u64>,
}

impl Version {
    /// 创建不带构建号的版本
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            build: None,
        }
    }

    /// 创建带构建号的版本
    pub const fn with_build(major: u32, minor: u32, patch: u32, build: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            build: Some(build),
        }
    }

    /// 解析版本字符串
    ///
    /// 格式错误返回 [`ModuleError::InvalidVersion`]，数值超出范围返回
    /// [`ModuleError::Overflow`]。
    pub fn parse(text: &str) -> Result<Self> {
        let (core, build) = match text.split_once('+') {
            Some((core, build)) => (core, Some(build)),
            None => (text, None),
        };

        let mut parts = core.split('.');
        let major = parse_component::<u32>(text, parts.next())?;
        let minor = parse_component::<u32>(text, parts.next())?;
        let patch = parse_component::<u32>(text, parts.next())?;
        if parts.next().is_some() {
            return Err(ModuleError::InvalidVersion(format!(
                "'{}' 包含多余的版本段",
                text
            )));
        }

        let build = match build {
            Some(b) => Some(parse_component::<u64>(text, Some(b))?),
            None => None,
        };

        Ok(Self {
            major,
            minor,
            patch,
            build,
        })
    }

    /// 比较主、次、修订号，忽略构建号
    pub fn order(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
    }

    /// 比较完整版本，构建号作为最后的比较项（缺省视为 0）
    pub fn order_long(&self, other: &Self) -> Ordering {
        self.order(other)
            .then_with(|| self.build.unwrap_or(0).cmp(&other.build.unwrap_or(0)))
    }

    /// 判断当前版本（实际提供的版本）是否满足 `required`
    pub fn is_compatible_with(&self, required: &Self) -> bool {
        if self.major != required.major {
            return false;
        }
        if self.major == 0 && self.minor != required.minor {
            return false;
        }
        self.order(required) != Ordering::Less
    }
}

/// 解析单个数字段
fn parse_component<T: FromStr>(text: &str, part: Option<&str>) -> Result<T> {
    let part = part.ok_or_else(|| {
        ModuleError::InvalidVersion(format!("'{}' 缺少版本段", text))
    })?;

    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ModuleError::InvalidVersion(format!(
            "'{}' 中的版本段 '{}' 不是十进制数字",
            text, part
        )));
    }
    if part.len() > 1 && part.starts_with('0') {
        return Err(ModuleError::InvalidVersion(format!(
            "'{}' 中的版本段 '{}' 含有前导零",
            text, part
        )));
    }

    // 只剩纯数字，解析失败只可能是超出范围
    part.parse::<T>().map_err(|_| {
        ModuleError::Overflow(format!("'{}' 中的版本段 '{}' 超出范围", text, part))
    })
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(build) = self.build {
            write!(f, "+{}", build)?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = ModuleError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Version {
    type Error = ModuleError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Version> for String {
    fn from(version: Version) -> Self {
        version.to_string()
    }
}
