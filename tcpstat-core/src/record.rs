//! 单条TCP连接记录

use crate::estats::{ConnectionStats, StatsReading};
use crate::native::NativeStack;
use crate::process::{ProcessInfo, ProcessLookup};
use crate::{AddressFamily, TcpState};
use serde::Serialize;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::OnceLock;

/// 连接身份令牌
///
/// 去掉 owning pid 后的原生行（MIB_TCPROW / MIB_TCP6ROW），
/// 原样回传给扩展统计调用，用来定位系统内部的那条连接。
#[derive(Clone, PartialEq, Eq)]
pub(crate) enum IdentityToken {
    V4([u8; 20]),
    V6([u8; 52]),
}

impl IdentityToken {
    pub(crate) fn as_bytes(&self) -> &[u8] {
        match self {
            IdentityToken::V4(bytes) => bytes,
            IdentityToken::V6(bytes) => bytes,
        }
    }
}

impl fmt::Debug for IdentityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityToken::V4(_) => write!(f, "IdentityToken(V4)"),
            IdentityToken::V6(_) => write!(f, "IdentityToken(V6)"),
        }
    }
}

/// 连接表中的一行
///
/// 相等性只看 state、本地端点、远端端点；pid、令牌、进程缓存和统计值都不参与。
#[derive(Debug)]
pub struct ConnectionRecord {
    family: AddressFamily,
    state: TcpState,
    local: SocketAddr,
    remote: SocketAddr,
    pid: u32,
    token: IdentityToken,
    process: OnceLock<ProcessInfo>,
}

impl ConnectionRecord {
    pub(crate) fn new(
        family: AddressFamily,
        state: TcpState,
        local: SocketAddr,
        remote: SocketAddr,
        pid: u32,
        token: IdentityToken,
    ) -> Self {
        Self {
            family,
            state,
            local,
            remote,
            pid,
            token,
            process: OnceLock::new(),
        }
    }

    pub fn process_id(&self) -> u32 {
        self.pid
    }

    pub fn local_endpoint(&self) -> SocketAddr {
        self.local
    }

    pub fn remote_endpoint(&self) -> SocketAddr {
        self.remote
    }

    pub fn state(&self) -> TcpState {
        self.state
    }

    pub fn address_family(&self) -> AddressFamily {
        self.family
    }

    pub fn protocol_version(&self) -> &'static str {
        match self.family {
            AddressFamily::Ipv4 => "V4",
            AddressFamily::Ipv6 => "V6",
        }
    }

    pub(crate) fn token(&self) -> &IdentityToken {
        &self.token
    }

    /// 该连接的扩展统计访问器
    pub fn stats<'a>(&'a self, stack: &'a NativeStack) -> ConnectionStats<'a> {
        ConnectionStats::new(stack.family(self.family), &self.token)
    }

    /// 懒解析所属进程
    ///
    /// 成功一次后永久缓存（即使进程之后退出）；失败不缓存，下次访问重试。
    pub fn process(&self, lookup: &dyn ProcessLookup) -> Option<&ProcessInfo> {
        if self.pid == 0 {
            return None;
        }
        if let Some(info) = self.process.get() {
            return Some(info);
        }
        let info = lookup.lookup(self.pid)?;
        Some(self.process.get_or_init(|| info))
    }

    /// 已缓存的进程信息，不触发解析
    pub fn cached_process(&self) -> Option<&ProcessInfo> {
        self.process.get()
    }

    /// 当场读取统计生成视图，进程名取已缓存的值
    pub fn summary(&self, stack: &NativeStack) -> ConnectionSummary {
        self.summary_with(self.stats(stack).read_enabled(), self.cached_process())
    }

    /// 使用已读取的统计和已解析的进程生成视图（例如刷新结果中的读数）
    pub fn summary_with(
        &self,
        stats: StatsReading,
        process: Option<&ProcessInfo>,
    ) -> ConnectionSummary {
        ConnectionSummary {
            family: self.family,
            state: self.state,
            local: self.local,
            remote: self.remote,
            pid: self.pid,
            process_name: process.map(|p| p.name.clone()),
            stats,
        }
    }
}

impl PartialEq for ConnectionRecord {
    fn eq(&self, other: &Self) -> bool {
        self.state == other.state && self.local == other.local && self.remote == other.remote
    }
}

impl Eq for ConnectionRecord {}

impl Hash for ConnectionRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.state.hash(state);
        self.local.hash(state);
        self.remote.hash(state);
    }
}

impl fmt::Display for ConnectionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} -> {}", self.state, self.local, self.remote)
    }
}

/// 可序列化的连接视图（供输出使用）
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSummary {
    pub family: AddressFamily,
    pub state: TcpState,
    pub local: SocketAddr,
    pub remote: SocketAddr,
    pub pid: u32,
    pub process_name: Option<String>,
    pub stats: StatsReading,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_table;
    use crate::testing::{ipv4_row, stack, table_bytes, FakeNative};
    use std::cell::Cell;
    use std::collections::HashSet;

    fn parse_v4(rows: &[Vec<u8>]) -> Vec<ConnectionRecord> {
        parse_table(AddressFamily::Ipv4, &table_bytes(rows)).unwrap()
    }

    struct CountingLookup {
        calls: Cell<usize>,
        answer: Option<ProcessInfo>,
    }

    impl ProcessLookup for CountingLookup {
        fn lookup(&self, _pid: u32) -> Option<ProcessInfo> {
            self.calls.set(self.calls.get() + 1);
            self.answer.clone()
        }
    }

    #[test]
    fn test_identity_ignores_pid_and_token() {
        let mut a = ipv4_row(5, ([10, 0, 0, 5], 51000), ([93, 184, 216, 34], 443), 1234);
        let b = ipv4_row(5, ([10, 0, 0, 5], 51000), ([93, 184, 216, 34], 443), 9999);
        // 端口的无效字节不同，令牌也就不同
        a[10] = 0x7f;
        let records = parse_v4(&[a, b]);

        assert_ne!(records[0].process_id(), records[1].process_id());
        assert_ne!(records[0].token(), records[1].token());
        assert_eq!(records[0], records[1]);

        let set: HashSet<&ConnectionRecord> = records.iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_state_is_part_of_identity() {
        let records = parse_v4(&[
            ipv4_row(5, ([10, 0, 0, 5], 51000), ([93, 184, 216, 34], 443), 1),
            ipv4_row(8, ([10, 0, 0, 5], 51000), ([93, 184, 216, 34], 443), 1),
        ]);
        assert_ne!(records[0], records[1]);
    }

    #[test]
    fn test_display() {
        let records = parse_v4(&[ipv4_row(5, ([10, 0, 0, 5], 51000), ([93, 184, 216, 34], 443), 1)]);
        assert_eq!(records[0].to_string(), "ESTABLISHED:10.0.0.5:51000 -> 93.184.216.34:443");
        assert_eq!(records[0].protocol_version(), "V4");
    }

    #[test]
    fn test_process_cached_after_success() {
        let records = parse_v4(&[ipv4_row(5, ([1, 1, 1, 1], 1), ([2, 2, 2, 2], 2), 77)]);
        let lookup = CountingLookup {
            calls: Cell::new(0),
            answer: Some(ProcessInfo { pid: 77, name: "svc.exe".into(), exe_path: None }),
        };

        assert_eq!(records[0].process(&lookup).map(|p| p.name.as_str()), Some("svc.exe"));
        assert_eq!(records[0].process(&lookup).map(|p| p.name.as_str()), Some("svc.exe"));
        assert_eq!(lookup.calls.get(), 1);
        assert!(records[0].cached_process().is_some());
    }

    #[test]
    fn test_process_failure_not_cached() {
        let records = parse_v4(&[ipv4_row(5, ([1, 1, 1, 1], 1), ([2, 2, 2, 2], 2), 77)]);
        let lookup = CountingLookup { calls: Cell::new(0), answer: None };

        assert!(records[0].process(&lookup).is_none());
        assert!(records[0].process(&lookup).is_none());
        assert_eq!(lookup.calls.get(), 2);
        assert!(records[0].cached_process().is_none());
    }

    #[test]
    fn test_pid_zero_never_resolved() {
        let records = parse_v4(&[ipv4_row(2, ([0, 0, 0, 0], 445), ([0, 0, 0, 0], 0), 0)]);
        let lookup = CountingLookup {
            calls: Cell::new(0),
            answer: Some(ProcessInfo { pid: 0, name: "Idle".into(), exe_path: None }),
        };
        assert!(records[0].process(&lookup).is_none());
        assert_eq!(lookup.calls.get(), 0);
    }

    #[test]
    fn test_summary_serializes() {
        let v4 = FakeNative::new(AddressFamily::Ipv4);
        let v6 = FakeNative::new(AddressFamily::Ipv6);
        let records = parse_v4(&[ipv4_row(5, ([10, 0, 0, 5], 51000), ([93, 184, 216, 34], 443), 1234)]);

        let summary = records[0].summary(&stack(&v4, &v6));
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["local"], "10.0.0.5:51000");
        assert_eq!(json["state"], "Established");
        assert_eq!(json["pid"], 1234);
        assert_eq!(json["stats"]["data_enabled"], false);
        assert!(json["process_name"].is_null());
    }

    #[test]
    fn test_summary_with_uses_given_reading_and_process() {
        let records = parse_v4(&[ipv4_row(5, ([10, 0, 0, 5], 51000), ([93, 184, 216, 34], 443), 77)]);
        let lookup = CountingLookup {
            calls: Cell::new(0),
            answer: Some(ProcessInfo { pid: 77, name: "svc.exe".into(), exe_path: None }),
        };
        let reading = StatsReading { data_enabled: true, ..Default::default() };

        let summary = records[0].summary_with(reading.clone(), records[0].process(&lookup));
        assert_eq!(summary.process_name.as_deref(), Some("svc.exe"));
        assert_eq!(summary.stats, reading);
        assert_eq!(lookup.calls.get(), 1);

        let unresolved = records[0].summary_with(StatsReading::default(), None);
        assert!(unresolved.process_name.is_none());
    }
}
