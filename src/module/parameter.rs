//! 模块参数
//!
//! 参数是模块声明的具名整数值，读写各自带有访问级别：
//!
//! | 级别 | 可访问者 |
//! |------|----------|
//! | `Public` | 任何持有注册表的调用方 |
//! | `Dependency` | 持有指向参数所有者依赖边的模块 |
//! | `Private` | 参数所有者自身 |
//!
//! 参数值以 `AtomicU64` 存储，无锁读取不会读到撕裂的值。

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::utils::{ModuleError, Result};

/// 参数类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    /// 无符号 8 位整数
    U8,
    /// 无符号 16 位整数
    U16,
    /// 无符号 32 位整数
    U32,
    /// 无符号 64 位整数
    U64,
    /// 有符号 8 位整数
    I8,
    /// 有符号 16 位整数
    I16,
    /// 有符号 32 位整数
    I32,
    /// 有符号 64 位整数
    I64,
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParameterType::U8 => "u8",
            ParameterType::U16 => "u16",
            ParameterType::U32 => "u32",
            ParameterType::U64 => "u64",
            ParameterType::I8 => "i8",
            ParameterType::I16 => "i16",
            ParameterType::I32 => "i32",
            ParameterType::I64 => "i64",
        };
        f.write_str(name)
    }
}

/// 带类型标签的参数值
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum ParameterValue {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
}

impl ParameterValue {
    /// 值的类型
    pub fn parameter_type(&self) -> ParameterType {
        match self {
            ParameterValue::U8(_) => ParameterType::U8,
            ParameterValue::U16(_) => ParameterType::U16,
            ParameterValue::U32(_) => ParameterType::U32,
            ParameterValue::U64(_) => ParameterType::U64,
            ParameterValue::I8(_) => ParameterType::I8,
            ParameterValue::I16(_) => ParameterType::I16,
            ParameterValue::I32(_) => ParameterType::I32,
            ParameterValue::I64(_) => ParameterType::I64,
        }
    }

    fn to_bits(self) -> u64 {
        match self {
            ParameterValue::U8(v) => v as u64,
            ParameterValue::U16(v) => v as u64,
            ParameterValue::U32(v) => v as u64,
            ParameterValue::U64(v) => v,
            ParameterValue::I8(v) => v as u8 as u64,
            ParameterValue::I16(v) => v as u16 as u64,
            ParameterValue::I32(v) => v as u32 as u64,
            ParameterValue::I64(v) => v as u64,
        }
    }

    fn from_bits(ty: ParameterType, bits: u64) -> Self {
        match ty {
            ParameterType::U8 => ParameterValue::U8(bits as u8),
            ParameterType::U16 => ParameterValue::U16(bits as u16),
            ParameterType::U32 => ParameterValue::U32(bits as u32),
            ParameterType::U64 => ParameterValue::U64(bits),
            ParameterType::I8 => ParameterValue::I8(bits as u8 as i8),
            ParameterType::I16 => ParameterValue::I16(bits as u16 as i16),
            ParameterType::I32 => ParameterValue::I32(bits as u32 as i32),
            ParameterType::I64 => ParameterValue::I64(bits as i64),
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::U8(v) => write!(f, "{}u8", v),
            ParameterValue::U16(v) => write!(f, "{}u16", v),
            ParameterValue::U32(v) => write!(f, "{}u32", v),
            ParameterValue::U64(v) => write!(f, "{}u64", v),
            ParameterValue::I8(v) => write!(f, "{}i8", v),
            ParameterValue::I16(v) => write!(f, "{}i16", v),
            ParameterValue::I32(v) => write!(f, "{}i32", v),
            ParameterValue::I64(v) => write!(f, "{}i64", v),
        }
    }
}

macro_rules! impl_parameter_conversions {
    ($($prim:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$prim> for ParameterValue {
                fn from(value: $prim) -> Self {
                    ParameterValue::$variant(value)
                }
            }

            impl TryFrom<ParameterValue> for $prim {
                type Error = ModuleError;

                fn try_from(value: ParameterValue) -> Result<Self> {
                    match value {
                        ParameterValue::$variant(v) => Ok(v),
                        other => Err(ModuleError::TypeMismatch {
                            expected: ParameterType::$variant.to_string(),
                            found: other.parameter_type().to_string(),
                        }),
                    }
                }
            }
        )*
    };
}

impl_parameter_conversions! {
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
}

/// 访问级别，按限制程度递增排序
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterAccess {
    /// 任何调用方
    Public,
    /// 持有依赖边的模块
    Dependency,
    /// 仅所有者
    #[default]
    Private,
}

impl fmt::Display for ParameterAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParameterAccess::Public => "public",
            ParameterAccess::Dependency => "dependency",
            ParameterAccess::Private => "private",
        };
        f.write_str(name)
    }
}

/// 参数声明
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterDecl {
    /// 参数名
    pub name: String,
    /// 默认值，同时决定参数类型
    pub default: ParameterValue,
    /// 读取所需级别
    #[serde(default)]
    pub read: ParameterAccess,
    /// 写入所需级别
    #[serde(default)]
    pub write: ParameterAccess,
}

impl ParameterDecl {
    /// 创建参数声明，读写默认均为 `Private`
    pub fn new(name: impl Into<String>, default: impl Into<ParameterValue>) -> Self {
        Self {
            name: name.into(),
            default: default.into(),
            read: ParameterAccess::Private,
            write: ParameterAccess::Private,
        }
    }

    /// 设置读取级别
    pub fn read(mut self, access: ParameterAccess) -> Self {
        self.read = access;
        self
    }

    /// 设置写入级别
    pub fn write(mut self, access: ParameterAccess) -> Self {
        self.write = access;
        self
    }
}

/// 参数查询结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterInfo {
    /// 参数类型
    pub ty: ParameterType,
    /// 读取所需级别
    pub read: ParameterAccess,
    /// 写入所需级别
    pub write: ParameterAccess,
}

/// 参数操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ParameterOp {
    Read,
    Write,
}

impl fmt::Display for ParameterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterOp::Read => f.write_str("读取"),
            ParameterOp::Write => f.write_str("写入"),
        }
    }
}

/// 运行时参数
#[derive(Debug)]
pub(crate) struct Parameter {
    name: String,
    ty: ParameterType,
    read: ParameterAccess,
    write: ParameterAccess,
    bits: AtomicU64,
}

impl Parameter {
    pub(crate) fn from_decl(decl: &ParameterDecl) -> Self {
        Self {
            name: decl.name.clone(),
            ty: decl.default.parameter_type(),
            read: decl.read,
            write: decl.write,
            bits: AtomicU64::new(decl.default.to_bits()),
        }
    }

    pub(crate) fn info(&self) -> ParameterInfo {
        ParameterInfo {
            ty: self.ty,
            read: self.read,
            write: self.write,
        }
    }

    /// 以调用方的级别检查访问权限
    pub(crate) fn check_access(
        &self,
        owner: &str,
        caller_level: ParameterAccess,
        op: ParameterOp,
    ) -> Result<()> {
        let required = match op {
            ParameterOp::Read => self.read,
            ParameterOp::Write => self.write,
        };
        if caller_level >= required {
            Ok(())
        } else {
            Err(ModuleError::AccessDenied {
                module: owner.to_string(),
                parameter: self.name.clone(),
                operation: format!("以 {} 级别{}（需要 {}）", caller_level, op, required),
            })
        }
    }

    pub(crate) fn get(&self) -> ParameterValue {
        ParameterValue::from_bits(self.ty, self.bits.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, value: ParameterValue) -> Result<()> {
        if value.parameter_type() != self.ty {
            return Err(ModuleError::TypeMismatch {
                expected: self.ty.to_string(),
                found: value.parameter_type().to_string(),
            });
        }
        self.bits.store(value.to_bits(), Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_ordering() {
        assert!(ParameterAccess::Public < ParameterAccess::Dependency);
        assert!(ParameterAccess::Dependency < ParameterAccess::Private);
    }

    #[test]
    fn test_signed_values_survive_storage() {
        for value in [
            ParameterValue::I8(-3),
            ParameterValue::I16(i16::MIN),
            ParameterValue::I32(-1),
            ParameterValue::I64(i64::MIN),
            ParameterValue::U64(u64::MAX),
        ] {
            let param = Parameter::from_decl(&ParameterDecl::new("p", value));
            assert_eq!(param.get(), value);
        }
    }

    #[test]
    fn test_set_type_mismatch() {
        let param = Parameter::from_decl(&ParameterDecl::new("level", 3u32));
        let err = param.set(ParameterValue::I32(5)).unwrap_err();
        assert!(matches!(err, ModuleError::TypeMismatch { .. }));
        assert_eq!(param.get(), ParameterValue::U32(3));

        param.set(7u32.into()).unwrap();
        assert_eq!(u32::try_from(param.get()).unwrap(), 7);
        assert!(i64::try_from(param.get()).is_err());
    }

    #[test]
    fn test_check_access() {
        let param = Parameter::from_decl(
            &ParameterDecl::new("threshold", 10u8)
                .read(ParameterAccess::Dependency)
                .write(ParameterAccess::Private),
        );

        assert!(param
            .check_access("m", ParameterAccess::Public, ParameterOp::Read)
            .unwrap_err()
            .is_access_denied());
        assert!(param
            .check_access("m", ParameterAccess::Dependency, ParameterOp::Read)
            .is_ok());
        assert!(param
            .check_access("m", ParameterAccess::Dependency, ParameterOp::Write)
            .is_err());
        assert!(param
            .check_access("m", ParameterAccess::Private, ParameterOp::Write)
            .is_ok());
    }

    #[test]
    fn test_value_serde() {
        let value = ParameterValue::I16(-42);
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, r#"{"type":"i16","value":-42}"#);
        assert_eq!(serde_json::from_str::<ParameterValue>(&json).unwrap(), value);
    }
}
