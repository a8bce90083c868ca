//! 原生调用抽象层
//!
//! 每个地址族一个实现（IPv4 / IPv6），连接表枚举与扩展统计访问
//! 只通过这里的接口发起系统调用。

use crate::estats::StatsCategory;
use crate::AddressFamily;

pub const NO_ERROR: u32 = 0;
pub const ERROR_NOT_SUPPORTED: u32 = 50;
pub const ERROR_INVALID_PARAMETER: u32 = 87;
pub const ERROR_INSUFFICIENT_BUFFER: u32 = 122;
pub const ERROR_NOT_FOUND: u32 = 1168;

/// 单个地址族的原生能力接口
///
/// 所有方法直接返回原生状态码（0 为成功），由调用方决定是致命错误还是软失败。
/// `row` 参数是不含 owning pid 的原生行字节（MIB_TCPROW / MIB_TCP6ROW）。
pub trait NativeTcp {
    /// 该实现对应的地址族
    fn family(&self) -> AddressFamily;

    /// 平台是否支持该地址族
    fn is_supported(&self) -> bool {
        true
    }

    /// GetExtendedTcpTable(TCP_TABLE_OWNER_PID_ALL)
    ///
    /// `buffer` 为 None 时只协商大小，`size` 回写所需字节数。
    fn query_table(&self, buffer: Option<&mut [u8]>, size: &mut u32) -> u32;

    /// GetPerTcp(6)ConnectionEStats，读取 Rw 和/或 Rod 块
    fn get_estats(
        &self,
        row: &[u8],
        category: StatsCategory,
        rw: Option<&mut [u8]>,
        rod: Option<&mut [u8]>,
    ) -> u32;

    /// SetPerTcp(6)ConnectionEStats，写入 Rw 块
    fn set_estats(&self, row: &[u8], category: StatsCategory, rw: &[u8]) -> u32;
}

/// IPv4 与 IPv6 两个实现的组合，按记录的地址族选择
pub struct NativeStack {
    ipv4: Box<dyn NativeTcp>,
    ipv6: Box<dyn NativeTcp>,
}

impl NativeStack {
    pub fn new(ipv4: Box<dyn NativeTcp>, ipv6: Box<dyn NativeTcp>) -> Self {
        Self { ipv4, ipv6 }
    }

    pub fn family(&self, family: AddressFamily) -> &dyn NativeTcp {
        match family {
            AddressFamily::Ipv4 => self.ipv4.as_ref(),
            AddressFamily::Ipv6 => self.ipv6.as_ref(),
        }
    }
}
