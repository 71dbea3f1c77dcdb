//! 日志系统
//!
//! 基于 tracing 生态：
//!
//! - `EnvFilter` 过滤，`RUST_LOG` 优先于配置级别
//! - 控制台输出（pretty 或 JSON）
//! - 可选的滚动文件输出（tracing-appender，非阻塞写入）
//!
//! # 示例
//!
//! ```rust,no_run
//! use chips_modules::utils::logger::{Logger, LoggerConfig, RotationStrategy};
//!
//! let _guard = Logger::init(
//!     LoggerConfig::builder()
//!         .level("debug")
//!         .file_output("./logs")
//!         .rotation(RotationStrategy::Hourly)
//!         .build(),
//! )
//! .expect("日志初始化失败");
//!
//! tracing::info!(module = "logger", "模块已加载");
//! ```

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::core::config::LogConfig;
use crate::utils::{ModuleError, Result};

/// 默认日志文件前缀
const DEFAULT_FILE_PREFIX: &str = "chips-modules";

// ============================================================================
// 日志轮转策略
// ============================================================================

/// 日志文件轮转策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationStrategy {
    /// 不轮转
    Never,
    /// 每分钟轮转（主要用于测试）
    Minutely,
    /// 每小时轮转
    Hourly,
    /// 每天轮转
    #[default]
    Daily,
}

impl RotationStrategy {
    fn to_rotation(self) -> Rotation {
        match self {
            RotationStrategy::Never => Rotation::NEVER,
            RotationStrategy::Minutely => Rotation::MINUTELY,
            RotationStrategy::Hourly => Rotation::HOURLY,
            RotationStrategy::Daily => Rotation::DAILY,
        }
    }

    /// 从配置字符串解析，无法识别时回落到 [`RotationStrategy::Daily`]
    pub fn from_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "never" | "none" => RotationStrategy::Never,
            "minutely" | "minute" => RotationStrategy::Minutely,
            "hourly" | "hour" => RotationStrategy::Hourly,
            _ => RotationStrategy::Daily,
        }
    }

    /// 配置字符串是否可识别
    pub fn is_known(name: &str) -> bool {
        matches!(
            name.to_lowercase().as_str(),
            "never" | "none" | "minutely" | "minute" | "hourly" | "hour" | "daily" | "day"
        )
    }
}

impl std::fmt::Display for RotationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RotationStrategy::Never => "never",
            RotationStrategy::Minutely => "minutely",
            RotationStrategy::Hourly => "hourly",
            RotationStrategy::Daily => "daily",
        };
        f.write_str(name)
    }
}

// ============================================================================
// 日志配置
// ============================================================================

/// 日志系统配置
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// 日志级别（trace/debug/info/warn/error）
    pub level: String,
    /// 是否输出 JSON
    pub json_format: bool,
    /// 是否输出到控制台
    pub console_output: bool,
    /// 文件输出目录，`None` 表示不写文件
    pub file_output: Option<PathBuf>,
    /// 日志文件名前缀
    pub file_prefix: String,
    /// 轮转策略
    pub rotation: RotationStrategy,
    /// 保留的文件数
    pub max_files: usize,
    /// 是否显示 target
    pub show_target: bool,
    /// 是否显示线程 ID
    pub show_thread_ids: bool,
    /// 是否显示源文件与行号
    pub show_file_line: bool,
    /// 额外的过滤指令，逗号分隔，例如 `chips_modules::module=trace`
    pub filter_directives: Option<String>,
    /// 控制台是否使用 ANSI 颜色
    pub ansi_colors: bool,
    /// 是否记录 span 关闭事件（带耗时）
    pub span_close_events: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            console_output: true,
            file_output: None,
            file_prefix: DEFAULT_FILE_PREFIX.to_string(),
            rotation: RotationStrategy::Daily,
            max_files: 7,
            show_target: true,
            show_thread_ids: false,
            show_file_line: true,
            filter_directives: None,
            ansi_colors: true,
            span_close_events: false,
        }
    }
}

impl LoggerConfig {
    /// 创建配置构建器
    pub fn builder() -> LoggerConfigBuilder {
        LoggerConfigBuilder::default()
    }

    /// 从配置文件中的日志段构建
    pub fn from_log_config(log_config: &LogConfig) -> Self {
        Self {
            level: log_config.level.clone(),
            json_format: log_config.json_format,
            file_output: if log_config.file_output {
                log_config.log_dir.clone()
            } else {
                None
            },
            rotation: RotationStrategy::from_name(&log_config.rotation),
            max_files: log_config.max_files,
            ..Default::default()
        }
    }

    fn span_events(&self) -> FmtSpan {
        if self.span_close_events {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }
}

/// [`LoggerConfig`] 构建器
#[derive(Debug, Default)]
pub struct LoggerConfigBuilder {
    config: LoggerConfig,
}

impl LoggerConfigBuilder {
    /// 设置日志级别
    pub fn level(mut self, level: impl Into<String>) -> Self {
        self.config.level = level.into();
        self
    }

    /// 是否输出 JSON
    pub fn json_format(mut self, enable: bool) -> Self {
        self.config.json_format = enable;
        self
    }

    /// 是否输出到控制台
    pub fn console_output(mut self, enable: bool) -> Self {
        self.config.console_output = enable;
        self
    }

    /// 设置文件输出目录
    pub fn file_output(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.file_output = Some(dir.into());
        self
    }

    /// 设置日志文件名前缀
    pub fn file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.file_prefix = prefix.into();
        self
    }

    /// 设置轮转策略
    pub fn rotation(mut self, strategy: RotationStrategy) -> Self {
        self.config.rotation = strategy;
        self
    }

    /// 设置保留文件数
    pub fn max_files(mut self, count: usize) -> Self {
        self.config.max_files = count;
        self
    }

    /// 是否显示 target
    pub fn show_target(mut self, enable: bool) -> Self {
        self.config.show_target = enable;
        self
    }

    /// 是否显示线程 ID
    pub fn show_thread_ids(mut self, enable: bool) -> Self {
        self.config.show_thread_ids = enable;
        self
    }

    /// 是否显示源文件与行号
    pub fn show_file_line(mut self, enable: bool) -> Self {
        self.config.show_file_line = enable;
        self
    }

    /// 追加过滤指令
    pub fn filter_directives(mut self, directives: impl Into<String>) -> Self {
        self.config.filter_directives = Some(directives.into());
        self
    }

    /// 是否使用 ANSI 颜色
    pub fn ansi_colors(mut self, enable: bool) -> Self {
        self.config.ansi_colors = enable;
        self
    }

    /// 是否记录 span 关闭事件
    pub fn span_close_events(mut self, enable: bool) -> Self {
        self.config.span_close_events = enable;
        self
    }

    /// 构建配置
    pub fn build(self) -> LoggerConfig {
        self.config
    }
}

// ============================================================================
// 日志守卫
// ============================================================================

/// 日志守卫
///
/// 持有非阻塞写入线程的 guard，drop 时刷新缓冲。必须在程序运行期间保持存活。
#[must_use = "日志守卫被丢弃后缓冲中的日志可能丢失"]
#[derive(Default)]
pub struct LogGuard {
    guards: Vec<WorkerGuard>,
}

impl LogGuard {
    /// 持有的写入线程数
    pub fn worker_count(&self) -> usize {
        self.guards.len()
    }
}

// ============================================================================
// 日志系统
// ============================================================================

static LOGGER_INITIALIZED: AtomicBool = AtomicBool::new(false);

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// 日志系统入口
pub struct Logger;

impl Logger {
    /// 初始化全局日志订阅者
    ///
    /// 每个进程只能成功初始化一次，重复调用返回 [`ModuleError::InitFailed`]。
    pub fn init(config: LoggerConfig) -> Result<LogGuard> {
        if LOGGER_INITIALIZED.swap(true, Ordering::SeqCst) {
            return Err(ModuleError::InitFailed(
                "日志系统已初始化，不能重复初始化".to_string(),
            ));
        }

        let result = Self::install(&config);
        if result.is_err() {
            LOGGER_INITIALIZED.store(false, Ordering::SeqCst);
        }
        result
    }

    /// 尝试初始化，已初始化或失败时返回空守卫
    pub fn try_init(config: LoggerConfig) -> LogGuard {
        Self::init(config).unwrap_or_default()
    }

    /// 日志系统是否已初始化
    pub fn is_initialized() -> bool {
        LOGGER_INITIALIZED.load(Ordering::SeqCst)
    }

    fn install(config: &LoggerConfig) -> Result<LogGuard> {
        let env_filter = Self::create_env_filter(config)?;
        let mut guard = LogGuard::default();
        let mut layers: Vec<BoxedLayer> = Vec::new();

        if config.console_output {
            let (writer, worker) = tracing_appender::non_blocking(io::stdout());
            guard.guards.push(worker);
            layers.push(Self::fmt_layer(config, writer, config.ansi_colors));
        }

        if let Some(ref log_dir) = config.file_output {
            let appender = RollingFileAppender::builder()
                .rotation(config.rotation.to_rotation())
                .filename_prefix(config.file_prefix.as_str())
                .filename_suffix("log")
                .max_log_files(config.max_files.max(1))
                .build(log_dir)
                .map_err(|e| ModuleError::InitFailed(format!("创建日志文件失败: {}", e)))?;
            let (writer, worker) = tracing_appender::non_blocking(appender);
            guard.guards.push(worker);
            layers.push(Self::fmt_layer(config, writer, false));
        }

        tracing_subscriber::registry()
            .with(layers)
            .with(env_filter)
            .try_init()
            .map_err(|e| ModuleError::InitFailed(format!("日志系统初始化失败: {}", e)))?;

        Ok(guard)
    }

    fn fmt_layer<W>(config: &LoggerConfig, writer: W, ansi: bool) -> BoxedLayer
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        let layer = fmt::layer()
            .with_writer(writer)
            .with_target(config.show_target)
            .with_thread_ids(config.show_thread_ids)
            .with_file(config.show_file_line)
            .with_line_number(config.show_file_line)
            .with_span_events(config.span_events());

        if config.json_format {
            // JSON 不使用 ANSI 颜色
            layer.json().with_ansi(false).boxed()
        } else {
            layer.with_ansi(ansi).boxed()
        }
    }

    fn create_env_filter(config: &LoggerConfig) -> Result<EnvFilter> {
        let mut filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
                ModuleError::InitFailed(format!("无效的日志级别 '{}': {}", config.level, e))
            })?,
        };

        if let Some(ref directives) = config.filter_directives {
            for directive in directives.split(',').map(str::trim).filter(|d| !d.is_empty()) {
                let directive = directive.parse().map_err(|e| {
                    ModuleError::InitFailed(format!("无效的过滤指令 '{}': {}", directive, e))
                })?;
                filter = filter.add_directive(directive);
            }
        }

        Ok(filter)
    }
}

// ============================================================================
// 结构化日志字段
// ============================================================================

/// 结构化日志字段名
pub mod fields {
    /// 模块名
    pub const MODULE: &str = "module";
    /// 依赖的模块名
    pub const DEPENDENCY: &str = "dependency";
    /// 命名空间
    pub const NAMESPACE: &str = "namespace";
    /// 符号名
    pub const SYMBOL: &str = "symbol";
    /// 参数名
    pub const PARAMETER: &str = "parameter";
    /// 版本
    pub const VERSION: &str = "version";
    /// 加载集 ID
    pub const SET_ID: &str = "set_id";
    /// 错误码
    pub const ERROR_CODE: &str = "error_code";
    /// 耗时（微秒）
    pub const DURATION_US: &str = "duration_us";
}
