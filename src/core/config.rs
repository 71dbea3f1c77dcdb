//! 注册表配置
//!
//! 配置文件支持 YAML 与 JSON（按扩展名区分）：
//!
//! ```yaml
//! logging:
//!   level: debug
//!   rotation: hourly
//! loading:
//!   auto_load: [logger, storage]
//!   skip: [experimental]
//!   unload_unused_on_release: true
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::utils::logger::RotationStrategy;
use crate::utils::{ModuleError, Result};

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否输出到文件
    #[serde(default)]
    pub file_output: bool,

    /// 日志目录
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// 是否使用 JSON 格式
    #[serde(default)]
    pub json_format: bool,

    /// 轮转策略（never/minutely/hourly/daily）
    #[serde(default = "default_rotation")]
    pub rotation: String,

    /// 保留文件数
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

fn default_max_files() -> usize {
    7
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: false,
            log_dir: None,
            json_format: false,
            rotation: default_rotation(),
            max_files: default_max_files(),
        }
    }
}

/// 模块加载策略
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadingConfig {
    /// 默认过滤器接受的模块名，为空表示接受全部导出
    #[serde(default)]
    pub auto_load: Vec<String>,

    /// 默认过滤器总是跳过的模块名
    #[serde(default)]
    pub skip: Vec<String>,

    /// 卸载或销毁伪模块后是否顺带卸载无人引用的模块
    #[serde(default)]
    pub unload_unused_on_release: bool,
}

impl LoadingConfig {
    /// 默认过滤器是否接受该模块
    pub fn accepts(&self, name: &str) -> bool {
        if self.skip.iter().any(|s| s == name) {
            return false;
        }
        self.auto_load.is_empty() || self.auto_load.iter().any(|s| s == name)
    }
}

/// 注册表配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// 配置文件路径
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    /// 日志配置
    #[serde(default)]
    pub logging: LogConfig,

    /// 加载策略
    #[serde(default)]
    pub loading: LoadingConfig,
}

impl RegistryConfig {
    /// 创建配置构建器
    pub fn builder() -> RegistryConfigBuilder {
        RegistryConfigBuilder::default()
    }

    /// 从文件加载配置，`.json` 按 JSON 解析，其余按 YAML 解析
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ModuleError::ConfigLoadFailed(format!("读取 '{}' 失败: {}", path.display(), e))
        })?;

        let mut config = if path.extension().map(|e| e == "json").unwrap_or(false) {
            Self::from_json_str(&content)?
        } else {
            Self::from_yaml_str(&content)?
        };

        config.config_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// 从 YAML 字符串解析
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: RegistryConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 从 JSON 字符串解析
    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: RegistryConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 校验配置值
    pub fn validate(&self) -> Result<()> {
        if !RotationStrategy::is_known(&self.logging.rotation) {
            return Err(ModuleError::InvalidConfigValue {
                key: "logging.rotation".to_string(),
                reason: format!("未知的轮转策略 '{}'", self.logging.rotation),
            });
        }
        if self.logging.file_output && self.logging.log_dir.is_none() {
            return Err(ModuleError::InvalidConfigValue {
                key: "logging.log_dir".to_string(),
                reason: "启用文件输出时必须指定日志目录".to_string(),
            });
        }
        if let Some(name) = self
            .loading
            .auto_load
            .iter()
            .find(|name| self.loading.skip.contains(name))
        {
            return Err(ModuleError::InvalidConfigValue {
                key: "loading.skip".to_string(),
                reason: format!("模块 '{}' 同时出现在 auto_load 与 skip 中", name),
            });
        }
        Ok(())
    }

    /// 合并另一份配置，只覆盖非默认值
    pub fn merge(&mut self, other: RegistryConfig) {
        if other.logging.level != default_log_level() {
            self.logging.level = other.logging.level;
        }
        if other.logging.file_output {
            self.logging.file_output = true;
            self.logging.log_dir = other.logging.log_dir;
        }
        if other.logging.json_format {
            self.logging.json_format = true;
        }
        if other.logging.rotation != default_rotation() {
            self.logging.rotation = other.logging.rotation;
        }
        for name in other.loading.auto_load {
            if !self.loading.auto_load.contains(&name) {
                self.loading.auto_load.push(name);
            }
        }
        for name in other.loading.skip {
            if !self.loading.skip.contains(&name) {
                self.loading.skip.push(name);
            }
        }
        if other.loading.unload_unused_on_release {
            self.loading.unload_unused_on_release = true;
        }
        if other.config_path.is_some() {
            self.config_path = other.config_path;
        }
    }
}

/// [`RegistryConfig`] 构建器
#[derive(Debug, Default)]
pub struct RegistryConfigBuilder {
    config: RegistryConfig,
}

impl RegistryConfigBuilder {
    /// 设置日志级别
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// 启用文件日志
    pub fn file_logging(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.config.logging.file_output = true;
        self.config.logging.log_dir = Some(log_dir.into());
        self
    }

    /// 启用 JSON 日志
    pub fn json_logging(mut self) -> Self {
        self.config.logging.json_format = true;
        self
    }

    /// 追加自动加载的模块名
    pub fn auto_load(mut self, name: impl Into<String>) -> Self {
        self.config.loading.auto_load.push(name.into());
        self
    }

    /// 追加跳过的模块名
    pub fn skip(mut self, name: impl Into<String>) -> Self {
        self.config.loading.skip.push(name.into());
        self
    }

    /// 卸载后是否清理无人引用的模块
    pub fn unload_unused_on_release(mut self, enable: bool) -> Self {
        self.config.loading.unload_unused_on_release = enable;
        self
    }

    /// 构建配置
    pub fn build(self) -> RegistryConfig {
        self.config
    }
}
