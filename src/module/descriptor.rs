//! 模块描述符
//!
//! [`ModuleDescriptor`] 是模块作者提供的不可变声明：名称、版本、所需命名空间、
//! 依赖、符号导入导出、参数以及可选的构造/析构钩子。描述符构建后以
//! `Arc<ModuleDescriptor>` 共享，之后只读。
//!
//! 代码无关的部分也可以写成 YAML 清单（[`ModuleManifest`]），再在构建器上补充
//! 导出值与钩子。
//!
//! # 示例
//!
//! ```rust
//! use chips_modules::module::descriptor::{ModuleDescriptor, SymbolExport};
//! use chips_modules::utils::Version;
//!
//! let descriptor = ModuleDescriptor::builder("greeter", Version::new(1, 0, 0))
//!     .description("问候模块")
//!     .export(SymbolExport::value("text", "greeting", Version::new(1, 0, 0), "你好"))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(descriptor.name(), "greeter");
//! assert_eq!(descriptor.exports().len(), 1);
//! ```

use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::module::info::Module;
use crate::module::parameter::ParameterDecl;
use crate::utils::id::is_pseudo_module_name;
use crate::utils::{ModuleError, Result, Version};

/// 全局命名空间，对所有模块始终可见
pub const GLOBAL_NAMESPACE: &str = "";

/// 符号值
pub type SymbolValue = Arc<dyn Any + Send + Sync>;

/// 动态导出的构造函数，在模块构造完成后调用
pub type ExportConstructor = Arc<dyn Fn(&Module) -> anyhow::Result<SymbolValue> + Send + Sync>;

// ============================================================================
// 依赖与符号声明
// ============================================================================

/// 按名称声明的模块依赖
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencySpec {
    /// 依赖的模块名
    pub name: String,
    /// 最低要求版本
    pub version: Version,
}

impl DependencySpec {
    /// 创建依赖声明
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

/// 符号导入声明
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SymbolImport {
    /// 命名空间
    #[serde(default)]
    pub namespace: String,
    /// 符号名
    pub name: String,
    /// 最低要求版本
    pub version: Version,
}

impl SymbolImport {
    /// 创建导入声明
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, version: Version) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            version,
        }
    }
}

/// 导出值来源
#[derive(Clone)]
pub enum ExportSource {
    /// 构建时即确定的值
    Static(SymbolValue),
    /// 模块构造后由构造函数生成的值
    Dynamic(ExportConstructor),
}

impl fmt::Debug for ExportSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportSource::Static(_) => f.write_str("Static"),
            ExportSource::Dynamic(_) => f.write_str("Dynamic"),
        }
    }
}

/// 符号导出声明
#[derive(Debug, Clone)]
pub struct SymbolExport {
    /// 命名空间
    pub namespace: String,
    /// 符号名
    pub name: String,
    /// 导出版本
    pub version: Version,
    /// 值来源
    pub source: ExportSource,
}

impl SymbolExport {
    /// 导出一个静态值
    pub fn value<T>(
        namespace: impl Into<String>,
        name: impl Into<String>,
        version: Version,
        value: T,
    ) -> Self
    where
        T: Any + Send + Sync,
    {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            version,
            source: ExportSource::Static(Arc::new(value)),
        }
    }

    /// 导出一个在模块构造后生成的值
    pub fn dynamic<T, F>(
        namespace: impl Into<String>,
        name: impl Into<String>,
        version: Version,
        constructor: F,
    ) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&Module) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        let constructor: ExportConstructor =
            Arc::new(move |module: &Module| -> anyhow::Result<SymbolValue> {
                Ok(Arc::new(constructor(module)?))
            });
        Self {
            namespace: namespace.into(),
            name: name.into(),
            version,
            source: ExportSource::Dynamic(constructor),
        }
    }

    /// 是否为动态导出
    pub fn is_dynamic(&self) -> bool {
        matches!(self.source, ExportSource::Dynamic(_))
    }
}

// ============================================================================
// 钩子
// ============================================================================

/// 模块生命周期钩子
///
/// `construct` 在模块进入注册表后、导出符号发布前调用，返回错误会使整个加载集回滚；
/// `destroy` 在卸载或回滚时调用，此时模块的导出已经不可见。
pub trait ModuleHooks: Send + Sync {
    /// 构造钩子
    fn construct(&self, module: &Module) -> anyhow::Result<()> {
        let _ = module;
        Ok(())
    }

    /// 析构钩子
    fn destroy(&self, module: &Module) {
        let _ = module;
    }
}

type ConstructFn = Box<dyn Fn(&Module) -> anyhow::Result<()> + Send + Sync>;
type DestroyFn = Box<dyn Fn(&Module) + Send + Sync>;

/// 由闭包组成的钩子，供构建器的 `on_construct` / `on_destroy` 使用
#[derive(Default)]
struct ClosureHooks {
    construct: Option<ConstructFn>,
    destroy: Option<DestroyFn>,
}

impl ModuleHooks for ClosureHooks {
    fn construct(&self, module: &Module) -> anyhow::Result<()> {
        match self.construct {
            Some(ref f) => f(module),
            None => Ok(()),
        }
    }

    fn destroy(&self, module: &Module) {
        if let Some(ref f) = self.destroy {
            f(module);
        }
    }
}

// ============================================================================
// 描述符
// ============================================================================

/// 模块描述符
pub struct ModuleDescriptor {
    name: String,
    version: Version,
    description: String,
    author: String,
    license: String,
    namespaces: Vec<String>,
    dependencies: Vec<DependencySpec>,
    imports: Vec<SymbolImport>,
    exports: Vec<SymbolExport>,
    parameters: Vec<ParameterDecl>,
    hooks: Option<Arc<dyn ModuleHooks>>,
}

impl ModuleDescriptor {
    /// 创建描述符构建器
    pub fn builder(name: impl Into<String>, version: Version) -> ModuleDescriptorBuilder {
        ModuleDescriptorBuilder::new(name, version)
    }

    /// 模块名
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 模块版本
    pub fn version(&self) -> Version {
        self.version
    }

    /// 描述
    pub fn description(&self) -> &str {
        &self.description
    }

    /// 作者
    pub fn author(&self) -> &str {
        &self.author
    }

    /// 许可证
    pub fn license(&self) -> &str {
        &self.license
    }

    /// 静态声明的命名空间
    pub fn namespaces(&self) -> &[String] {
        &self.namespaces
    }

    /// 按名称声明的依赖
    pub fn dependencies(&self) -> &[DependencySpec] {
        &self.dependencies
    }

    /// 符号导入
    pub fn imports(&self) -> &[SymbolImport] {
        &self.imports
    }

    /// 符号导出
    pub fn exports(&self) -> &[SymbolExport] {
        &self.exports
    }

    /// 参数声明
    pub fn parameters(&self) -> &[ParameterDecl] {
        &self.parameters
    }

    /// 生命周期钩子
    pub fn hooks(&self) -> Option<&Arc<dyn ModuleHooks>> {
        self.hooks.as_ref()
    }

    /// 是否导出了指定符号
    pub fn exports_symbol(&self, namespace: &str, name: &str) -> Option<&SymbolExport> {
        self.exports
            .iter()
            .find(|e| e.namespace == namespace && e.name == name)
    }

    fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        // 1. 名称
        if !is_valid_module_name(&self.name) {
            errors.push(format!(
                "模块名 '{}' 格式无效，须以字母开头且只包含字母、数字、下划线和连字符",
                self.name
            ));
        }
        if is_pseudo_module_name(&self.name) {
            errors.push(format!("模块名 '{}' 使用了伪模块保留前缀", self.name));
        }

        // 2. 命名空间
        let mut seen = HashSet::new();
        for ns in &self.namespaces {
            if ns.is_empty() {
                errors.push("全局命名空间始终可见，无需声明".to_string());
            } else if !seen.insert(ns.as_str()) {
                errors.push(format!("命名空间 '{}' 重复声明", ns));
            }
        }

        // 3. 依赖
        let mut seen = HashSet::new();
        for dep in &self.dependencies {
            if dep.name == self.name {
                errors.push("模块不能依赖自身".to_string());
            } else if !seen.insert(dep.name.as_str()) {
                errors.push(format!("依赖 '{}' 重复声明", dep.name));
            }
        }

        // 4. 导入必须位于已声明的命名空间中
        let mut seen = HashSet::new();
        for import in &self.imports {
            if import.name.is_empty() {
                errors.push("导入的符号名不能为空".to_string());
            }
            if !import.namespace.is_empty() && !self.namespaces.contains(&import.namespace) {
                errors.push(format!(
                    "导入 '{}::{}' 所在的命名空间未声明",
                    import.namespace, import.name
                ));
            }
            if self.exports_symbol(&import.namespace, &import.name).is_some() {
                errors.push(format!(
                    "模块不能导入自己导出的符号 '{}::{}'",
                    import.namespace, import.name
                ));
            }
            if !seen.insert((import.namespace.as_str(), import.name.as_str())) {
                errors.push(format!(
                    "导入 '{}::{}' 重复声明",
                    import.namespace, import.name
                ));
            }
        }

        // 5. 导出
        let mut seen = HashSet::new();
        for export in &self.exports {
            if export.name.is_empty() {
                errors.push("导出的符号名不能为空".to_string());
            }
            if !seen.insert((export.namespace.as_str(), export.name.as_str())) {
                errors.push(format!(
                    "导出 '{}::{}' 重复声明",
                    export.namespace, export.name
                ));
            }
        }

        // 6. 参数
        let mut seen = HashSet::new();
        for param in &self.parameters {
            if param.name.is_empty() {
                errors.push("参数名不能为空".to_string());
            } else if !seen.insert(param.name.as_str()) {
                errors.push(format!("参数 '{}' 重复声明", param.name));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ModuleError::InvalidArgument(format!(
                "模块 '{}' 描述符无效: {}",
                self.name,
                errors.join("; ")
            )))
        }
    }
}

impl fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("namespaces", &self.namespaces)
            .field("dependencies", &self.dependencies)
            .field("imports", &self.imports)
            .field("exports", &self.exports)
            .field("parameters", &self.parameters)
            .field("has_hooks", &self.hooks.is_some())
            .finish()
    }
}

fn is_valid_module_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

// ============================================================================
// 构建器
// ============================================================================

/// [`ModuleDescriptor`] 构建器
pub struct ModuleDescriptorBuilder {
    descriptor: ModuleDescriptor,
    closures: ClosureHooks,
}

impl ModuleDescriptorBuilder {
    fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            descriptor: ModuleDescriptor {
                name: name.into(),
                version,
                description: String::new(),
                author: String::new(),
                license: String::new(),
                namespaces: Vec::new(),
                dependencies: Vec::new(),
                imports: Vec::new(),
                exports: Vec::new(),
                parameters: Vec::new(),
                hooks: None,
            },
            closures: ClosureHooks::default(),
        }
    }

    /// 设置描述
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.descriptor.description = description.into();
        self
    }

    /// 设置作者
    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.descriptor.author = author.into();
        self
    }

    /// 设置许可证
    pub fn license(mut self, license: impl Into<String>) -> Self {
        self.descriptor.license = license.into();
        self
    }

    /// 声明所需命名空间
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.descriptor.namespaces.push(namespace.into());
        self
    }

    /// 声明模块依赖
    pub fn dependency(mut self, name: impl Into<String>, version: Version) -> Self {
        self.descriptor
            .dependencies
            .push(DependencySpec::new(name, version));
        self
    }

    /// 声明符号导入
    pub fn import(mut self, import: SymbolImport) -> Self {
        self.descriptor.imports.push(import);
        self
    }

    /// 声明符号导出
    pub fn export(mut self, export: SymbolExport) -> Self {
        self.descriptor.exports.push(export);
        self
    }

    /// 声明参数
    pub fn parameter(mut self, decl: ParameterDecl) -> Self {
        self.descriptor.parameters.push(decl);
        self
    }

    /// 设置生命周期钩子，与 `on_construct` / `on_destroy` 互斥
    pub fn hooks(mut self, hooks: Arc<dyn ModuleHooks>) -> Self {
        self.descriptor.hooks = Some(hooks);
        self
    }

    /// 以闭包设置构造钩子
    pub fn on_construct<F>(mut self, f: F) -> Self
    where
        F: Fn(&Module) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.closures.construct = Some(Box::new(f));
        self
    }

    /// 以闭包设置析构钩子
    pub fn on_destroy<F>(mut self, f: F) -> Self
    where
        F: Fn(&Module) + Send + Sync + 'static,
    {
        self.closures.destroy = Some(Box::new(f));
        self
    }

    /// 校验并构建描述符
    pub fn build(self) -> Result<Arc<ModuleDescriptor>> {
        let Self {
            mut descriptor,
            closures,
        } = self;

        let has_closures = closures.construct.is_some() || closures.destroy.is_some();
        if has_closures {
            if descriptor.hooks.is_some() {
                return Err(ModuleError::InvalidArgument(format!(
                    "模块 '{}' 同时设置了钩子对象与钩子闭包",
                    descriptor.name
                )));
            }
            descriptor.hooks = Some(Arc::new(closures));
        }

        descriptor.validate()?;
        Ok(Arc::new(descriptor))
    }
}

// ============================================================================
// YAML 清单
// ============================================================================

/// 模块清单
///
/// 描述符中与代码无关的部分，可从 YAML 解析：
///
/// ```yaml
/// name: storage
/// version: 1.2.0
/// namespaces: [io]
/// dependencies:
///   - name: logger
///     version: 1.0.0
/// imports:
///   - namespace: io
///     name: open
///     version: 1.0.0
/// parameters:
///   - name: cache_size
///     default: { type: u32, value: 64 }
///     read: public
///     write: private
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleManifest {
    /// 模块名
    pub name: String,
    /// 版本
    pub version: Version,
    /// 描述
    #[serde(default)]
    pub description: String,
    /// 作者
    #[serde(default)]
    pub author: String,
    /// 许可证
    #[serde(default)]
    pub license: String,
    /// 所需命名空间
    #[serde(default)]
    pub namespaces: Vec<String>,
    /// 依赖
    #[serde(default)]
    pub dependencies: Vec<DependencySpec>,
    /// 符号导入
    #[serde(default)]
    pub imports: Vec<SymbolImport>,
    /// 参数
    #[serde(default)]
    pub parameters: Vec<ParameterDecl>,
}

impl ModuleManifest {
    /// 从 YAML 字符串解析
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// 转为描述符构建器，导出与钩子在构建器上补充
    pub fn into_builder(self) -> ModuleDescriptorBuilder {
        let mut builder = ModuleDescriptor::builder(self.name, self.version)
            .description(self.description)
            .author(self.author)
            .license(self.license);
        builder.descriptor.namespaces = self.namespaces;
        builder.descriptor.dependencies = self.dependencies;
        builder.descriptor.imports = self.imports;
        builder.descriptor.parameters = self.parameters;
        builder
    }
}
