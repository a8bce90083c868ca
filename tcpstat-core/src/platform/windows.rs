//! Windows平台实现
//!
//! 使用 IP Helper API (GetExtendedTcpTable, Get/SetPerTcp(6)ConnectionEStats)

use crate::estats::StatsCategory;
use crate::native::{NativeTcp, ERROR_INVALID_PARAMETER};
use crate::process::{exe_name, ProcessInfo, ProcessLookup};
use crate::AddressFamily;
use std::ffi::c_void;
use std::mem::size_of;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use tracing::debug;

use windows::core::PWSTR;
use windows::Win32::Foundation::CloseHandle;
use windows::Win32::NetworkManagement::IpHelper::{
    GetExtendedTcpTable, GetPerTcp6ConnectionEStats, GetPerTcpConnectionEStats,
    SetPerTcp6ConnectionEStats, SetPerTcpConnectionEStats, MIB_TCP6ROW, MIB_TCPROW_LH,
    TCP_ESTATS_TYPE, TCP_TABLE_OWNER_PID_ALL,
};
use windows::Win32::System::Threading::{
    OpenProcess, QueryFullProcessImageNameW, PROCESS_NAME_WIN32,
    PROCESS_QUERY_LIMITED_INFORMATION,
};

/// 检查是否有管理员权限
pub fn is_elevated() -> bool {
    use std::process::Command;
    Command::new("net")
        .args(["session"])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// 单个地址族的 IP Helper 实现
pub struct IpHelperTcp {
    family: AddressFamily,
    supported: bool,
}

impl IpHelperTcp {
    pub fn new(family: AddressFamily) -> Self {
        let supported = os_supports(family);
        if !supported {
            debug!("系统未启用 {} 协议栈，跳过该地址族", family);
        }
        Self { family, supported }
    }
}

/// 能否为该地址族创建套接字（等同于系统是否启用了该协议栈）
pub fn os_supports(family: AddressFamily) -> bool {
    let unspecified: SocketAddr = match family {
        AddressFamily::Ipv4 => (Ipv4Addr::UNSPECIFIED, 0).into(),
        AddressFamily::Ipv6 => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    UdpSocket::bind(unspecified).is_ok()
}

/// 令牌字节按原生结构体重新构造（非对齐读取）
fn read_row<T>(bytes: &[u8]) -> Option<T> {
    if bytes.len() != size_of::<T>() {
        return None;
    }
    Some(unsafe { std::ptr::read_unaligned(bytes.as_ptr() as *const T) })
}

fn estats_type(category: StatsCategory) -> TCP_ESTATS_TYPE {
    TCP_ESTATS_TYPE(category.native_value() as i32)
}

impl NativeTcp for IpHelperTcp {
    fn family(&self) -> AddressFamily {
        self.family
    }

    fn is_supported(&self) -> bool {
        self.supported
    }

    fn query_table(&self, buffer: Option<&mut [u8]>, size: &mut u32) -> u32 {
        let ptr = buffer.map(|b| b.as_mut_ptr() as *mut c_void);
        unsafe {
            GetExtendedTcpTable(
                ptr,
                size,
                false,
                self.family.af_value(),
                TCP_TABLE_OWNER_PID_ALL,
                0,
            )
        }
    }

    fn get_estats(
        &self,
        row: &[u8],
        category: StatsCategory,
        rw: Option<&mut [u8]>,
        rod: Option<&mut [u8]>,
    ) -> u32 {
        let kind = estats_type(category);
        match self.family {
            AddressFamily::Ipv4 => {
                let Some(row) = read_row::<MIB_TCPROW_LH>(row) else {
                    return ERROR_INVALID_PARAMETER;
                };
                unsafe { GetPerTcpConnectionEStats(&row, kind, rw, 0, None, 0, rod, 0) }
            }
            AddressFamily::Ipv6 => {
                let Some(row) = read_row::<MIB_TCP6ROW>(row) else {
                    return ERROR_INVALID_PARAMETER;
                };
                unsafe { GetPerTcp6ConnectionEStats(&row, kind, rw, 0, None, 0, rod, 0) }
            }
        }
    }

    fn set_estats(&self, row: &[u8], category: StatsCategory, rw: &[u8]) -> u32 {
        let kind = estats_type(category);
        match self.family {
            AddressFamily::Ipv4 => {
                let Some(row) = read_row::<MIB_TCPROW_LH>(row) else {
                    return ERROR_INVALID_PARAMETER;
                };
                unsafe { SetPerTcpConnectionEStats(&row, kind, rw, 0, 0) }
            }
            AddressFamily::Ipv6 => {
                let Some(row) = read_row::<MIB_TCP6ROW>(row) else {
                    return ERROR_INVALID_PARAMETER;
                };
                unsafe { SetPerTcp6ConnectionEStats(&row, kind, rw, 0, 0) }
            }
        }
    }
}

/// 通过 OpenProcess + QueryFullProcessImageNameW 获取进程路径
pub struct WindowsProcessLookup;

impl ProcessLookup for WindowsProcessLookup {
    fn lookup(&self, pid: u32) -> Option<ProcessInfo> {
        // System 进程无法打开，但名字是固定的
        if pid == 4 {
            return Some(ProcessInfo { pid, name: "System".into(), exe_path: None });
        }

        unsafe {
            let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid).ok()?;
            let mut buf = [0u16; 1024];
            let mut len = buf.len() as u32;
            let result = QueryFullProcessImageNameW(
                handle,
                PROCESS_NAME_WIN32,
                PWSTR(buf.as_mut_ptr()),
                &mut len,
            );
            let _ = CloseHandle(handle);
            result.ok()?;

            let path = String::from_utf16_lossy(&buf[..len as usize]);
            Some(ProcessInfo {
                pid,
                name: exe_name(&path).to_string(),
                exe_path: Some(path),
            })
        }
    }
}
