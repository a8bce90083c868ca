//! 按连接的扩展统计 (TCP ESTATS)
//!
//! 使用 GetPerTcp(6)ConnectionEStats / SetPerTcp(6)ConnectionEStats。
//! 读取类操作失败一律返回默认值，不向调用方报错；
//! 启用/禁用是用户的显式操作，失败必须返回错误。

use crate::native::{NativeTcp, NO_ERROR};
use crate::record::IdentityToken;
use crate::{AddressFamily, Result, TcpStatError};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::trace;

/// TCP_ESTATS_TYPE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatsCategory {
    SynOpts,
    Data,
    SndCong,
    Path,
    SendBuff,
    Rec,
    ObsRec,
    Bandwidth,
    FineRtt,
}

impl StatsCategory {
    pub fn native_value(&self) -> u32 {
        match self {
            StatsCategory::SynOpts => 0,
            StatsCategory::Data => 1,
            StatsCategory::SndCong => 2,
            StatsCategory::Path => 3,
            StatsCategory::SendBuff => 4,
            StatsCategory::Rec => 5,
            StatsCategory::ObsRec => 6,
            StatsCategory::Bandwidth => 7,
            StatsCategory::FineRtt => 8,
        }
    }

    /// Rw 块中可独立开关的标志个数
    pub fn flag_count(&self) -> usize {
        match self {
            StatsCategory::Bandwidth => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for StatsCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatsCategory::SynOpts => "SynOpts",
            StatsCategory::Data => "Data",
            StatsCategory::SndCong => "SndCong",
            StatsCategory::Path => "Path",
            StatsCategory::SendBuff => "SendBuff",
            StatsCategory::Rec => "Rec",
            StatsCategory::ObsRec => "ObsRec",
            StatsCategory::Bandwidth => "Bandwidth",
            StatsCategory::FineRtt => "FineRtt",
        };
        f.write_str(name)
    }
}

/// TCP_BOOLEAN_OPTIONAL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoolOptional {
    Disabled,
    Enabled,
    /// 写入时保持该槽位不变
    Unchanged,
}

impl BoolOptional {
    pub fn native_value(&self) -> i32 {
        match self {
            BoolOptional::Disabled => 0,
            BoolOptional::Enabled => 1,
            BoolOptional::Unchanged => -1,
        }
    }

    pub fn from_native(value: i32) -> Self {
        match value {
            0 => BoolOptional::Disabled,
            1 => BoolOptional::Enabled,
            _ => BoolOptional::Unchanged,
        }
    }
}

impl From<bool> for BoolOptional {
    fn from(enable: bool) -> Self {
        if enable {
            BoolOptional::Enabled
        } else {
            BoolOptional::Disabled
        }
    }
}

/// 固定布局的 Rod（只读动态）计数器结构
pub trait RodLayout: Sized {
    const CATEGORY: StatsCategory;
    const SIZE: usize;

    /// `bytes` 长度恒为 `SIZE`
    fn decode(bytes: &[u8]) -> Self;
}

fn u64_at(bytes: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_ne_bytes(buf)
}

fn u32_at(bytes: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_ne_bytes(buf)
}

/// TCP_ESTATS_DATA_ROD_v0
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataCounters {
    pub data_bytes_out: u64,
    pub data_segs_out: u64,
    pub data_bytes_in: u64,
    pub data_segs_in: u64,
    pub segs_out: u64,
    pub segs_in: u64,
    pub soft_errors: u32,
    pub soft_error_reason: u32,
    pub snd_una: u32,
    pub snd_nxt: u32,
    pub snd_max: u32,
    pub thru_bytes_acked: u64,
    pub rcv_nxt: u32,
    pub thru_bytes_received: u64,
}

impl RodLayout for DataCounters {
    const CATEGORY: StatsCategory = StatsCategory::Data;
    const SIZE: usize = 96;

    fn decode(bytes: &[u8]) -> Self {
        Self {
            data_bytes_out: u64_at(bytes, 0),
            data_segs_out: u64_at(bytes, 8),
            data_bytes_in: u64_at(bytes, 16),
            data_segs_in: u64_at(bytes, 24),
            segs_out: u64_at(bytes, 32),
            segs_in: u64_at(bytes, 40),
            soft_errors: u32_at(bytes, 48),
            soft_error_reason: u32_at(bytes, 52),
            snd_una: u32_at(bytes, 56),
            snd_nxt: u32_at(bytes, 60),
            snd_max: u32_at(bytes, 64),
            // 68..72 为对齐填充
            thru_bytes_acked: u64_at(bytes, 72),
            rcv_nxt: u32_at(bytes, 80),
            thru_bytes_received: u64_at(bytes, 88),
        }
    }
}

/// TCP_ESTATS_BANDWIDTH_ROD_v0
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandwidthCounters {
    pub outbound_bandwidth: u64,
    pub inbound_bandwidth: u64,
    pub outbound_instability: u64,
    pub inbound_instability: u64,
    pub outbound_bandwidth_peaked: bool,
    pub inbound_bandwidth_peaked: bool,
}

impl RodLayout for BandwidthCounters {
    const CATEGORY: StatsCategory = StatsCategory::Bandwidth;
    const SIZE: usize = 40;

    fn decode(bytes: &[u8]) -> Self {
        Self {
            outbound_bandwidth: u64_at(bytes, 0),
            inbound_bandwidth: u64_at(bytes, 8),
            outbound_instability: u64_at(bytes, 16),
            inbound_instability: u64_at(bytes, 24),
            outbound_bandwidth_peaked: bytes[32] != 0,
            inbound_bandwidth_peaked: bytes[33] != 0,
        }
    }
}

/// TCP_ESTATS_FINE_RTT_ROD_v0，单位微秒
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FineRttCounters {
    pub rtt_var: u32,
    pub max_rtt: u32,
    pub min_rtt: u32,
    pub sum_rtt: u32,
}

impl RodLayout for FineRttCounters {
    const CATEGORY: StatsCategory = StatsCategory::FineRtt;
    const SIZE: usize = 16;

    fn decode(bytes: &[u8]) -> Self {
        Self {
            rtt_var: u32_at(bytes, 0),
            max_rtt: u32_at(bytes, 4),
            min_rtt: u32_at(bytes, 8),
            sum_rtt: u32_at(bytes, 12),
        }
    }
}

/// 刷新时需要重新展示的字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ChangedField {
    DataBytesIn,
    DataBytesOut,
    SegmentsIn,
    SegmentsOut,
    InboundBandwidth,
    OutboundBandwidth,
    FineRtt,
}

/// 一次读取的启用状态与计数器
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsReading {
    pub data_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<DataCounters>,
    pub inbound_bandwidth_enabled: bool,
    pub outbound_bandwidth_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bandwidth: Option<BandwidthCounters>,
    pub fine_rtt_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fine_rtt: Option<FineRttCounters>,
}

impl StatsReading {
    /// 已启用类别对应的字段
    pub fn changed_fields(&self) -> Vec<ChangedField> {
        let mut fields = Vec::new();
        if self.data_enabled {
            fields.extend([
                ChangedField::DataBytesIn,
                ChangedField::DataBytesOut,
                ChangedField::SegmentsIn,
                ChangedField::SegmentsOut,
            ]);
        }
        if self.inbound_bandwidth_enabled {
            fields.push(ChangedField::InboundBandwidth);
        }
        if self.outbound_bandwidth_enabled {
            fields.push(ChangedField::OutboundBandwidth);
        }
        if self.fine_rtt_enabled {
            fields.push(ChangedField::FineRtt);
        }
        fields
    }
}

/// 单条连接的扩展统计访问器
///
/// 只使用地址族对应的原生实现和身份令牌，不使用 pid 或端点。
pub struct ConnectionStats<'a> {
    native: &'a dyn NativeTcp,
    token: &'a IdentityToken,
}

impl<'a> ConnectionStats<'a> {
    pub(crate) fn new(native: &'a dyn NativeTcp, token: &'a IdentityToken) -> Self {
        Self { native, token }
    }

    fn set_call(&self) -> &'static str {
        match self.native.family() {
            AddressFamily::Ipv4 => "SetPerTcpConnectionEStats",
            AddressFamily::Ipv6 => "SetPerTcp6ConnectionEStats",
        }
    }

    /// 读取单标志类别的启用状态，失败返回 false
    pub fn is_category_enabled(&self, category: StatsCategory) -> bool {
        let mut rw = [0u8; 1];
        let status = self
            .native
            .get_estats(self.token.as_bytes(), category, Some(&mut rw), None);
        if status != NO_ERROR {
            trace!("读取 {} 启用状态失败: {}", category, status);
            return false;
        }
        rw[0] != 0
    }

    /// 读取多标志类别的各个标志，失败时全部为 Unchanged
    pub fn boolean_flags(&self, category: StatsCategory, count: usize) -> Vec<BoolOptional> {
        let unchanged = BoolOptional::Unchanged.native_value().to_ne_bytes();
        let mut rw: Vec<u8> = unchanged.iter().copied().cycle().take(count * 4).collect();
        let status = self
            .native
            .get_estats(self.token.as_bytes(), category, Some(&mut rw), None);
        if status != NO_ERROR {
            trace!("读取 {} 标志失败: {}", category, status);
            return vec![BoolOptional::Unchanged; count];
        }
        rw.chunks_exact(4)
            .map(|c| BoolOptional::from_native(i32::from_ne_bytes([c[0], c[1], c[2], c[3]])))
            .collect()
    }

    /// 启用/禁用单标志类别
    pub fn set_enabled(&self, category: StatsCategory, enable: bool) -> Result<()> {
        if category.flag_count() != 1 {
            return Err(TcpStatError::InvalidCategory(category));
        }
        let rw = [enable as u8];
        match self.native.set_estats(self.token.as_bytes(), category, &rw) {
            NO_ERROR => Ok(()),
            code => Err(TcpStatError::NativeCall { call: self.set_call(), code }),
        }
    }

    /// 设置多标志类别，Unchanged 槽位保持原状
    ///
    /// 必须给出该类别的全部槽位。
    pub fn set_flags(&self, category: StatsCategory, flags: &[BoolOptional]) -> Result<()> {
        if category.flag_count() == 1 || flags.len() != category.flag_count() {
            return Err(TcpStatError::InvalidCategory(category));
        }
        let rw: Vec<u8> = flags
            .iter()
            .flat_map(|f| f.native_value().to_ne_bytes())
            .collect();
        match self.native.set_estats(self.token.as_bytes(), category, &rw) {
            NO_ERROR => Ok(()),
            code => Err(TcpStatError::NativeCall { call: self.set_call(), code }),
        }
    }

    /// 读取计数器，失败视为暂无数据
    pub fn read_counters<T: RodLayout>(&self) -> Option<T> {
        let mut rod = vec![0u8; T::SIZE];
        let status = self
            .native
            .get_estats(self.token.as_bytes(), T::CATEGORY, None, Some(&mut rod));
        if status != NO_ERROR {
            trace!("读取 {} 计数器失败: {}", T::CATEGORY, status);
            return None;
        }
        Some(T::decode(&rod))
    }

    // ---- Data ----

    pub fn data_stats_enabled(&self) -> bool {
        self.is_category_enabled(StatsCategory::Data)
    }

    pub fn set_data_stats_enabled(&self, enable: bool) -> Result<()> {
        if enable == self.data_stats_enabled() {
            return Ok(());
        }
        self.set_enabled(StatsCategory::Data, enable)
    }

    /// 未启用时不读取计数器
    pub fn data(&self) -> Option<DataCounters> {
        if !self.data_stats_enabled() {
            return None;
        }
        self.read_counters()
    }

    pub fn data_bytes_in(&self) -> u64 {
        self.data().map(|d| d.data_bytes_in).unwrap_or(0)
    }

    pub fn data_bytes_out(&self) -> u64 {
        self.data().map(|d| d.data_bytes_out).unwrap_or(0)
    }

    pub fn segments_in(&self) -> u64 {
        self.data().map(|d| d.segs_in).unwrap_or(0)
    }

    pub fn segments_out(&self) -> u64 {
        self.data().map(|d| d.segs_out).unwrap_or(0)
    }

    // ---- Bandwidth: 索引0为出站，索引1为入站 ----

    fn bandwidth_flags(&self) -> (bool, bool) {
        let flags = self.boolean_flags(StatsCategory::Bandwidth, 2);
        let outbound = flags.first() == Some(&BoolOptional::Enabled);
        let inbound = flags.get(1) == Some(&BoolOptional::Enabled);
        (outbound, inbound)
    }

    pub fn outbound_bandwidth_enabled(&self) -> bool {
        self.bandwidth_flags().0
    }

    pub fn inbound_bandwidth_enabled(&self) -> bool {
        self.bandwidth_flags().1
    }

    pub fn set_outbound_bandwidth_enabled(&self, enable: bool) -> Result<()> {
        if enable == self.outbound_bandwidth_enabled() {
            return Ok(());
        }
        self.set_flags(
            StatsCategory::Bandwidth,
            &[enable.into(), BoolOptional::Unchanged],
        )
    }

    pub fn set_inbound_bandwidth_enabled(&self, enable: bool) -> Result<()> {
        if enable == self.inbound_bandwidth_enabled() {
            return Ok(());
        }
        self.set_flags(
            StatsCategory::Bandwidth,
            &[BoolOptional::Unchanged, enable.into()],
        )
    }

    pub fn outbound_bandwidth(&self) -> u64 {
        if !self.outbound_bandwidth_enabled() {
            return 0;
        }
        self.read_counters::<BandwidthCounters>()
            .map(|b| b.outbound_bandwidth)
            .unwrap_or(0)
    }

    pub fn inbound_bandwidth(&self) -> u64 {
        if !self.inbound_bandwidth_enabled() {
            return 0;
        }
        self.read_counters::<BandwidthCounters>()
            .map(|b| b.inbound_bandwidth)
            .unwrap_or(0)
    }

    // ---- FineRtt ----

    pub fn fine_rtt_enabled(&self) -> bool {
        self.is_category_enabled(StatsCategory::FineRtt)
    }

    pub fn set_fine_rtt_enabled(&self, enable: bool) -> Result<()> {
        if enable == self.fine_rtt_enabled() {
            return Ok(());
        }
        self.set_enabled(StatsCategory::FineRtt, enable)
    }

    pub fn fine_rtt(&self) -> Option<FineRttCounters> {
        if !self.fine_rtt_enabled() {
            return None;
        }
        self.read_counters()
    }

    /// 读取所有已启用类别的计数器
    pub fn read_enabled(&self) -> StatsReading {
        let data_enabled = self.data_stats_enabled();
        let data = if data_enabled { self.read_counters() } else { None };

        let (outbound_bandwidth_enabled, inbound_bandwidth_enabled) = self.bandwidth_flags();
        let bandwidth = if outbound_bandwidth_enabled || inbound_bandwidth_enabled {
            self.read_counters()
        } else {
            None
        };

        let fine_rtt_enabled = self.fine_rtt_enabled();
        let fine_rtt = if fine_rtt_enabled { self.read_counters() } else { None };

        StatsReading {
            data_enabled,
            data,
            inbound_bandwidth_enabled,
            outbound_bandwidth_enabled,
            bandwidth,
            fine_rtt_enabled,
            fine_rtt,
        }
    }
}
