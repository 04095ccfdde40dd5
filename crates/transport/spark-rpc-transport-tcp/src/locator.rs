//! 基于 `*.svc` 描述文件的服务定位。
//!
//! # 教案背景（Why）
//! - 部署目录中的每个 `*.svc` 文件以 `<%@ ServiceHost Service="Name" %>` 指令声明一个服务；
//!   运维通过增删文件决定对外暴露哪些服务，而不必修改宿主程序；
//! - Rust 没有按名称反射加载类型的能力，因此由宿主预先构建 [`ServiceCatalog`]，
//!   把服务名映射为向 [`MethodTable`] 注册处理器的闭包，定位器只负责“名称 → 注册”的查找。
//!
//! # 契约（What）
//! - 基础目录为空时使用进程当前工作目录；
//! - 描述文件缺少指令或引用了目录中未登记的服务，都会使整体定位失败。

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use spark_rpc_core::{CoreError, MethodTable, codes};
use thiserror::Error;
use tracing::debug;

const DIRECTIVE_OPEN: &str = "<%@";
const DIRECTIVE_CLOSE: &str = "%>";
const SERVICE_HOST: &str = "ServiceHost";
const SERVICE_ATTRIBUTE: &str = "Service";

/// 从一个描述文件中得到的服务声明。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceDescription {
    pub name: String,
    pub source: PathBuf,
}

/// 服务定位失败。
#[derive(Debug, Error)]
pub enum LocatorError {
    #[error("failed to read `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("`{path}` does not contain a ServiceHost directive with a Service attribute")]
    MissingDirective { path: PathBuf },
    #[error("service `{name}` declared in `{path}` is not registered in the catalog")]
    UnknownService { name: String, path: PathBuf },
}

impl From<LocatorError> for CoreError {
    fn from(error: LocatorError) -> Self {
        let code = match error {
            LocatorError::UnknownService { .. } => codes::CONFIG_UNKNOWN_SERVICE,
            LocatorError::Io { .. } | LocatorError::MissingDirective { .. } => {
                codes::CONFIG_INVALID
            }
        };
        CoreError::new(code, error.to_string()).with_cause(error)
    }
}

/// 扫描基础目录中的 `*.svc` 文件。
#[derive(Clone, Debug, Default)]
pub struct FileServiceLocator {
    base_directory: PathBuf,
}

impl FileServiceLocator {
    pub fn new(base_directory: impl Into<PathBuf>) -> Self {
        Self {
            base_directory: base_directory.into(),
        }
    }

    /// 实际扫描的目录。
    pub fn base_directory(&self) -> &Path {
        if self.base_directory.as_os_str().is_empty() {
            Path::new(".")
        } else {
            &self.base_directory
        }
    }

    /// 按文件名顺序返回目录中声明的全部服务。
    pub fn find_services(&self) -> Result<Vec<ServiceDescription>, LocatorError> {
        let base = self.base_directory();
        let entries = fs::read_dir(base).map_err(|source| LocatorError::Io {
            path: base.to_path_buf(),
            source,
        })?;

        let mut files = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|source| LocatorError::Io {
                    path: base.to_path_buf(),
                    source,
                })?
                .path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "svc") {
                files.push(path);
            }
        }
        files.sort();

        files.into_iter().map(describe).collect()
    }
}

fn describe(path: PathBuf) -> Result<ServiceDescription, LocatorError> {
    let text = fs::read_to_string(&path).map_err(|source| LocatorError::Io {
        path: path.clone(),
        source,
    })?;
    let Some(name) = parse_service_directive(&text) else {
        return Err(LocatorError::MissingDirective { path });
    };
    debug!(service = name, source = %path.display(), "service declared");
    Ok(ServiceDescription {
        name: name.to_owned(),
        source: path,
    })
}

/// 解析 `<%@ ServiceHost ... Service="Name" ... %>` 指令中的服务名。
///
/// 属性值可用单引号或双引号包裹；其他指令与属性被忽略。
pub fn parse_service_directive(text: &str) -> Option<&str> {
    let mut rest = text;
    while let Some(open) = rest.find(DIRECTIVE_OPEN) {
        let body_start = open + DIRECTIVE_OPEN.len();
        let close = rest[body_start..].find(DIRECTIVE_CLOSE)? + body_start;
        let body = rest[body_start..close].trim_start();
        if let Some(attributes) = body.strip_prefix(SERVICE_HOST)
            && attributes.starts_with(char::is_whitespace)
            && let Some(service) = find_attribute(attributes, SERVICE_ATTRIBUTE)
        {
            return Some(service);
        }
        rest = &rest[close + DIRECTIVE_CLOSE.len()..];
    }
    None
}

fn find_attribute<'a>(attributes: &'a str, wanted: &str) -> Option<&'a str> {
    let mut rest = attributes.trim_start();
    while !rest.is_empty() {
        let eq = rest.find('=')?;
        let key = rest[..eq].trim();
        let after = rest[eq + 1..].trim_start();
        let quote = after.chars().next().filter(|c| *c == '"' || *c == '\'')?;
        let value_end = after[1..].find(quote)? + 1;
        let value = &after[1..value_end];
        if key.eq_ignore_ascii_case(wanted) {
            return Some(value.trim());
        }
        rest = after[value_end + 1..].trim_start();
    }
    None
}

type Registration = Arc<dyn Fn(&mut MethodTable) + Send + Sync>;

/// 服务名到处理器注册闭包的目录。
#[derive(Clone, Default)]
pub struct ServiceCatalog {
    services: BTreeMap<String, Registration>,
}

impl fmt::Debug for ServiceCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceCatalog")
            .field("services", &self.services.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ServiceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一个服务；同名登记会被替换。
    pub fn register<F>(&mut self, name: impl Into<String>, registration: F) -> &mut Self
    where
        F: Fn(&mut MethodTable) + Send + Sync + 'static,
    {
        self.services.insert(name.into(), Arc::new(registration));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    /// 按服务声明构建方法表。
    pub fn build(&self, services: &[ServiceDescription]) -> Result<MethodTable, LocatorError> {
        let mut table = MethodTable::new();
        for service in services {
            let Some(registration) = self.services.get(&service.name) else {
                return Err(LocatorError::UnknownService {
                    name: service.name.clone(),
                    path: service.source.clone(),
                });
            };
            registration(&mut table);
        }
        Ok(table)
    }

    /// 扫描定位器目录并构建方法表。
    pub fn load(&self, locator: &FileServiceLocator) -> Result<MethodTable, LocatorError> {
        self.build(&locator.find_services()?)
    }
}
