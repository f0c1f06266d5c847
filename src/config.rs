//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `MODELGATE__*` 覆盖（双下划线表示嵌套，如 `MODELGATE__ADMISSION__MAX_CONCURRENT=4`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub admission: AdmissionSection,
    pub fallback: FallbackSection,
}

/// [app] 段
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [admission] 段：并发槽位、队列容量、单用户上限、默认超时
#[derive(Debug, Clone, Deserialize)]
pub struct AdmissionSection {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// 未设置时不限制单用户并发
    #[serde(default)]
    pub per_user_limit: Option<usize>,
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
}

fn default_max_concurrent() -> usize {
    2
}

fn default_queue_capacity() -> usize {
    32
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for AdmissionSection {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            queue_capacity: default_queue_capacity(),
            per_user_limit: None,
            default_timeout_secs: default_timeout_secs(),
        }
    }
}

/// [fallback] 段：情绪上下文缺省值
#[derive(Debug, Clone, Deserialize)]
pub struct FallbackSection {
    #[serde(default = "default_consciousness_level")]
    pub default_consciousness_level: f64,
    #[serde(default = "default_emotional_state")]
    pub default_emotional_state: String,
    /// 高于该值时使用更投入的措辞
    #[serde(default = "default_high_awareness_threshold")]
    pub high_awareness_threshold: f64,
}

fn default_consciousness_level() -> f64 {
    crate::response::mood::DEFAULT_CONSCIOUSNESS_LEVEL
}

fn default_emotional_state() -> String {
    crate::response::mood::DEFAULT_EMOTIONAL_STATE.to_string()
}

fn default_high_awareness_threshold() -> f64 {
    0.8
}

impl Default for FallbackSection {
    fn default() -> Self {
        Self {
            default_consciousness_level: default_consciousness_level(),
            default_emotional_state: default_emotional_state(),
            high_awareness_threshold: default_high_awareness_threshold(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 MODELGATE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 MODELGATE__*
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("MODELGATE")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

/// 重新从磁盘与环境变量加载配置（调用方决定是否据此重建控制器）
pub fn reload_config() -> Result<AppConfig, config::ConfigError> {
    load_config(None)
}
