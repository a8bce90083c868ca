//! 配置持久化模块
//!
//! 提供观察器设置的保存/加载功能

use crate::estats::ConnectionStats;
use crate::Result;
use crate::TcpStatError;
use serde::{Deserialize, Serialize};
use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

/// 新连接出现时自动启用的统计类别
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoEnable {
    pub data: bool,
    pub inbound_bandwidth: bool,
    pub outbound_bandwidth: bool,
    pub fine_rtt: bool,
}

impl AutoEnable {
    pub fn is_empty(&self) -> bool {
        !(self.data || self.inbound_bandwidth || self.outbound_bandwidth || self.fine_rtt)
    }

    /// 对一条连接启用配置中的类别，遇到第一个失败即返回
    pub fn apply(&self, stats: &ConnectionStats<'_>) -> Result<()> {
        if self.data {
            stats.set_data_stats_enabled(true)?;
        }
        if self.inbound_bandwidth {
            stats.set_inbound_bandwidth_enabled(true)?;
        }
        if self.outbound_bandwidth {
            stats.set_outbound_bandwidth_enabled(true)?;
        }
        if self.fine_rtt {
            stats.set_fine_rtt_enabled(true)?;
        }
        Ok(())
    }
}

/// 观察器配置（持久化）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// 刷新间隔（秒）
    pub refresh_interval: u64,

    /// 自动启用的统计
    pub auto_enable: AutoEnable,

    /// 只显示 ESTABLISHED 连接
    pub established_only: bool,

    /// 配置版本（用于迁移）
    pub version: u32,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            refresh_interval: 5,
            auto_enable: AutoEnable::default(),
            established_only: false,
            version: 1,
        }
    }
}

impl WatchConfig {
    /// 获取配置文件路径
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = config_root().unwrap_or_else(|| PathBuf::from("."));
        let app_dir = config_dir.join("tcpstat");
        fs::create_dir_all(&app_dir)?;
        Ok(app_dir.join("config.json"))
    }

    /// 从默认路径加载，文件不存在时返回默认配置
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let config: WatchConfig = serde_json::from_str(&content)
            .map_err(|e| TcpStatError::Config(format!("配置解析失败: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// 保存到默认路径
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| TcpStatError::Config(format!("配置序列化失败: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 验证配置合法性
    pub fn validate(&self) -> Result<()> {
        if self.refresh_interval == 0 {
            return Err(TcpStatError::Config("refresh_interval 必须大于0".into()));
        }
        Ok(())
    }
}

/// 配置根目录
///
/// Windows 为 %APPDATA%；其他平台依次取 $XDG_CONFIG_HOME、$HOME/.config。
fn config_root() -> Option<PathBuf> {
    config_root_with(|key| env::var_os(key), cfg!(windows))
}

fn config_root_with(var: impl Fn(&str) -> Option<OsString>, windows: bool) -> Option<PathBuf> {
    if windows {
        return var("APPDATA").map(PathBuf::from);
    }
    var("XDG_CONFIG_HOME")
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .or_else(|| var("HOME").map(|home| PathBuf::from(home).join(".config")))
}
