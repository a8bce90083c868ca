//! 按 PID 查询进程信息

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub exe_path: Option<String>,
}

/// 进程查询 trait，失败返回 None（进程已退出、权限不足等）
pub trait ProcessLookup {
    fn lookup(&self, pid: u32) -> Option<ProcessInfo>;
}

/// 不支持进程查询的平台
pub struct NoProcessLookup;

impl ProcessLookup for NoProcessLookup {
    fn lookup(&self, _pid: u32) -> Option<ProcessInfo> {
        None
    }
}

/// 从完整路径中取出可执行文件名
pub fn exe_name(path: &str) -> &str {
    path.rsplit(&['\\', '/'][..]).next().unwrap_or(path)
}
