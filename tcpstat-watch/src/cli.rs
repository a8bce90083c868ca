//! 命令行参数

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tcpstat_core::config::WatchConfig;

#[derive(Parser, Debug)]
#[command(name = "tcpstat-watch")]
#[command(about = "TCP连接表与扩展统计观察器", long_about = None)]
pub struct Cli {
    /// 刷新间隔（秒），默认取配置文件
    #[arg(short, long, value_name = "SECS")]
    pub interval: Option<u64>,

    /// 对新出现的连接自动启用统计（可重复）
    #[arg(short, long, value_enum)]
    pub enable: Vec<CategoryArg>,

    /// 只显示 ESTABLISHED 连接
    #[arg(long)]
    pub established: bool,

    /// 输出一次快照后退出
    #[arg(long)]
    pub once: bool,

    /// 以 JSON 输出
    #[arg(long)]
    pub json: bool,

    /// 配置文件路径
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// 把合并后的设置写回配置文件
    #[arg(long)]
    pub save_config: bool,

    /// 日志级别（RUST_LOG 优先）
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum CategoryArg {
    Data,
    InboundBandwidth,
    OutboundBandwidth,
    FineRtt,
}

impl Cli {
    /// 命令行参数覆盖配置文件
    pub fn merge_into(&self, config: &mut WatchConfig) {
        if let Some(interval) = self.interval {
            config.refresh_interval = interval;
        }
        if self.established {
            config.established_only = true;
        }
        for category in &self.enable {
            match category {
                CategoryArg::Data => config.auto_enable.data = true,
                CategoryArg::InboundBandwidth => config.auto_enable.inbound_bandwidth = true,
                CategoryArg::OutboundBandwidth => config.auto_enable.outbound_bandwidth = true,
                CategoryArg::FineRtt => config.auto_enable.fine_rtt = true,
            }
        }
    }
}
