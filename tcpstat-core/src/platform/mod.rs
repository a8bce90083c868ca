//! 平台抽象层
//!
//! 提供平台特定的原生连接表/扩展统计实现

#[cfg(target_os = "windows")]
pub mod windows;

#[cfg(not(target_os = "windows"))]
pub mod unsupported;

use crate::native::NativeStack;
use crate::process::ProcessLookup;
use crate::AddressFamily;

/// 创建平台特定的原生层（IPv4 + IPv6）
pub fn create_native_stack() -> NativeStack {
    #[cfg(target_os = "windows")]
    {
        NativeStack::new(
            Box::new(windows::IpHelperTcp::new(AddressFamily::Ipv4)),
            Box::new(windows::IpHelperTcp::new(AddressFamily::Ipv6)),
        )
    }

    #[cfg(not(target_os = "windows"))]
    {
        NativeStack::new(
            Box::new(unsupported::UnsupportedTcp::new(AddressFamily::Ipv4)),
            Box::new(unsupported::UnsupportedTcp::new(AddressFamily::Ipv6)),
        )
    }
}

/// 创建平台特定的进程查询
pub fn create_process_lookup() -> Box<dyn ProcessLookup> {
    #[cfg(target_os = "windows")]
    {
        Box::new(windows::WindowsProcessLookup)
    }

    #[cfg(not(target_os = "windows"))]
    {
        Box::new(crate::process::NoProcessLookup)
    }
}

/// 获取当前平台名称
pub fn platform_name() -> &'static str {
    #[cfg(target_os = "windows")]
    { "Windows" }

    #[cfg(target_os = "macos")]
    { "macOS" }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    { "Unknown" }
}

/// 检查是否有管理员权限（启用扩展统计需要）
pub fn has_admin_privileges() -> bool {
    #[cfg(target_os = "windows")]
    {
        windows::is_elevated()
    }

    #[cfg(not(target_os = "windows"))]
    { false }
}

/// 平台是否提供连接表与扩展统计
pub fn is_supported() -> bool {
    cfg!(target_os = "windows")
}

#[cfg(all(test, not(target_os = "windows")))]
mod tests {
    use super::*;
    use crate::monitor::ConnectionTable;

    #[test]
    fn test_unsupported_platform_yields_empty_table() {
        let stack = create_native_stack();
        let table = ConnectionTable::capture(&stack).unwrap();
        assert!(table.is_empty());
        assert!(!is_supported());
        assert!(create_process_lookup().lookup(1).is_none());
    }
}
