//! TcpStat Core - TCP连接表与扩展统计核心库
//!
//! 提供：
//! - 通过 IP Helper API 枚举 IPv4/IPv6 TCP连接表
//! - 按连接启用/禁用/读取扩展统计（数据量、带宽、RTT）
//! - 将多次快照合并为保持身份的实时连接集合

pub mod native;
pub mod table;
pub mod parser;
pub mod record;
pub mod estats;
pub mod monitor;
pub mod process;
pub mod config;
pub mod platform;

#[cfg(test)]
pub(crate) mod testing;

pub use native::{NativeStack, NativeTcp};
pub use record::{ConnectionRecord, ConnectionSummary};
pub use estats::{
    BandwidthCounters, BoolOptional, ConnectionStats, DataCounters, FineRttCounters,
    StatsCategory, StatsReading,
};
pub use monitor::{ChangedField, ConnectionTable, RecordDelta, RefreshReport};
pub use process::{ProcessInfo, ProcessLookup};
pub use config::WatchConfig;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TcpStatError {
    #[error("系统调用 {call} 失败，状态码: {code}")]
    NativeCall { call: &'static str, code: u32 },

    #[error("{family} 连接表格式错误: {reason}")]
    MalformedTable { family: AddressFamily, reason: String },

    #[error("统计类别 {0} 不支持该操作")]
    InvalidCategory(StatsCategory),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("IO错误: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TcpStatError>;

/// 地址族，决定原生调用入口与行结构布局
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    /// Winsock 的 AF_* 取值
    pub fn af_value(&self) -> u32 {
        match self {
            AddressFamily::Ipv4 => 2,
            AddressFamily::Ipv6 => 23,
        }
    }
}

impl std::fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressFamily::Ipv4 => write!(f, "IPv4"),
            AddressFamily::Ipv6 => write!(f, "IPv6"),
        }
    }
}

/// TCP连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum TcpState {
    Closed,
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
    DeleteTcb,
    Unknown,
}

impl TcpState {
    /// 由 MIB_TCP_STATE 数值转换
    pub fn from_native(value: u32) -> Self {
        match value {
            1 => TcpState::Closed,
            2 => TcpState::Listen,
            3 => TcpState::SynSent,
            4 => TcpState::SynReceived,
            5 => TcpState::Established,
            6 => TcpState::FinWait1,
            7 => TcpState::FinWait2,
            8 => TcpState::CloseWait,
            9 => TcpState::Closing,
            10 => TcpState::LastAck,
            11 => TcpState::TimeWait,
            12 => TcpState::DeleteTcb,
            _ => TcpState::Unknown,
        }
    }
}

impl std::fmt::Display for TcpState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TcpState::Closed => write!(f, "CLOSED"),
            TcpState::Listen => write!(f, "LISTEN"),
            TcpState::SynSent => write!(f, "SYN_SENT"),
            TcpState::SynReceived => write!(f, "SYN_RCVD"),
            TcpState::Established => write!(f, "ESTABLISHED"),
            TcpState::FinWait1 => write!(f, "FIN_WAIT_1"),
            TcpState::FinWait2 => write!(f, "FIN_WAIT_2"),
            TcpState::CloseWait => write!(f, "CLOSE_WAIT"),
            TcpState::Closing => write!(f, "CLOSING"),
            TcpState::LastAck => write!(f, "LAST_ACK"),
            TcpState::TimeWait => write!(f, "TIME_WAIT"),
            TcpState::DeleteTcb => write!(f, "DELETE_TCB"),
            TcpState::Unknown => write!(f, "UNKNOWN"),
        }
    }
}
