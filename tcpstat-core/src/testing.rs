//! 测试用的可编程原生层
//!
//! 内部状态通过 `Rc<RefCell<..>>` 共享，测试装入 `NativeStack` 后仍可检查调用次数。

use crate::estats::StatsCategory;
use crate::native::{
    NativeStack, NativeTcp, ERROR_INSUFFICIENT_BUFFER, ERROR_NOT_FOUND, NO_ERROR,
};
use crate::AddressFamily;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

pub(crate) struct FakeState {
    pub supported: bool,
    pub table: Vec<u8>,
    /// 覆盖首次（协商大小）调用的状态码
    pub size_status: Option<u32>,
    /// 覆盖第二次（取数据）调用的状态码
    pub fill_status: Option<u32>,
    pub get_status: u32,
    pub set_status: u32,
    pub rw: HashMap<(Vec<u8>, StatsCategory), Vec<u8>>,
    pub rod: HashMap<(Vec<u8>, StatsCategory), Vec<u8>>,
    pub query_calls: usize,
    pub get_calls: usize,
    pub rod_calls: usize,
    pub set_calls: usize,
    pub rows_seen: Vec<Vec<u8>>,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            supported: true,
            table: table_bytes(&[]),
            size_status: None,
            fill_status: None,
            get_status: NO_ERROR,
            set_status: NO_ERROR,
            rw: HashMap::new(),
            rod: HashMap::new(),
            query_calls: 0,
            get_calls: 0,
            rod_calls: 0,
            set_calls: 0,
            rows_seen: Vec::new(),
        }
    }
}

#[derive(Clone)]
pub(crate) struct FakeNative {
    family: AddressFamily,
    pub state: Rc<RefCell<FakeState>>,
}

impl FakeNative {
    pub fn new(family: AddressFamily) -> Self {
        Self {
            family,
            state: Rc::new(RefCell::new(FakeState::default())),
        }
    }

    pub fn with_rows(family: AddressFamily, rows: &[Vec<u8>]) -> Self {
        let fake = Self::new(family);
        fake.set_rows(rows);
        fake
    }

    pub fn set_rows(&self, rows: &[Vec<u8>]) {
        self.state.borrow_mut().table = table_bytes(rows);
    }

    pub fn native_calls(&self) -> usize {
        let s = self.state.borrow();
        s.query_calls + s.get_calls + s.set_calls
    }

    pub fn set_rw(&self, row: &[u8], category: StatsCategory, rw: Vec<u8>) {
        self.state.borrow_mut().rw.insert((row.to_vec(), category), rw);
    }

    pub fn set_rod(&self, row: &[u8], category: StatsCategory, rod: Vec<u8>) {
        self.state.borrow_mut().rod.insert((row.to_vec(), category), rod);
    }

    pub fn rw_of(&self, row: &[u8], category: StatsCategory) -> Option<Vec<u8>> {
        self.state.borrow().rw.get(&(row.to_vec(), category)).cloned()
    }
}

impl NativeTcp for FakeNative {
    fn family(&self) -> AddressFamily {
        self.family
    }

    fn is_supported(&self) -> bool {
        self.state.borrow().supported
    }

    fn query_table(&self, buffer: Option<&mut [u8]>, size: &mut u32) -> u32 {
        let mut s = self.state.borrow_mut();
        s.query_calls += 1;
        match buffer {
            None => {
                if let Some(status) = s.size_status {
                    return status;
                }
                *size = s.table.len() as u32;
                ERROR_INSUFFICIENT_BUFFER
            }
            Some(buf) => {
                if let Some(status) = s.fill_status {
                    return status;
                }
                if buf.len() < s.table.len() {
                    *size = s.table.len() as u32;
                    return ERROR_INSUFFICIENT_BUFFER;
                }
                buf[..s.table.len()].copy_from_slice(&s.table);
                NO_ERROR
            }
        }
    }

    fn get_estats(
        &self,
        row: &[u8],
        category: StatsCategory,
        rw: Option<&mut [u8]>,
        rod: Option<&mut [u8]>,
    ) -> u32 {
        let mut s = self.state.borrow_mut();
        s.get_calls += 1;
        s.rows_seen.push(row.to_vec());
        if rod.is_some() {
            s.rod_calls += 1;
        }
        if s.get_status != NO_ERROR {
            return s.get_status;
        }
        let key = (row.to_vec(), category);
        if let Some(buf) = rw {
            match s.rw.get(&key) {
                Some(stored) => {
                    let n = stored.len().min(buf.len());
                    buf[..n].copy_from_slice(&stored[..n]);
                }
                None => buf.fill(0),
            }
        }
        if let Some(buf) = rod {
            match s.rod.get(&key) {
                Some(stored) => {
                    let n = stored.len().min(buf.len());
                    buf[..n].copy_from_slice(&stored[..n]);
                }
                None => return ERROR_NOT_FOUND,
            }
        }
        NO_ERROR
    }

    fn set_estats(&self, row: &[u8], category: StatsCategory, rw: &[u8]) -> u32 {
        let mut s = self.state.borrow_mut();
        s.set_calls += 1;
        s.rows_seen.push(row.to_vec());
        if s.set_status != NO_ERROR {
            return s.set_status;
        }
        let key = (row.to_vec(), category);
        if category == StatsCategory::Bandwidth {
            // 多标志类别：Unchanged(-1) 的槽位保持原值
            let mut current = s.rw.get(&key).cloned().unwrap_or_else(|| vec![0u8; rw.len()]);
            current.resize(rw.len(), 0);
            for (slot, chunk) in rw.chunks_exact(4).enumerate() {
                let value = i32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                if value != -1 {
                    current[slot * 4..slot * 4 + 4].copy_from_slice(chunk);
                }
            }
            s.rw.insert(key, current);
        } else {
            s.rw.insert(key, rw.to_vec());
        }
        NO_ERROR
    }
}

pub(crate) fn stack(ipv4: &FakeNative, ipv6: &FakeNative) -> NativeStack {
    NativeStack::new(Box::new(ipv4.clone()), Box::new(ipv6.clone()))
}

pub(crate) fn table_bytes(rows: &[Vec<u8>]) -> Vec<u8> {
    let mut buf = (rows.len() as u32).to_ne_bytes().to_vec();
    for row in rows {
        buf.extend_from_slice(row);
    }
    buf
}

fn port_bytes(port: u16) -> [u8; 4] {
    let [hi, lo] = port.to_be_bytes();
    [hi, lo, 0, 0]
}

/// MIB_TCPROW_OWNER_PID
pub(crate) fn ipv4_row(state: u32, local: ([u8; 4], u16), remote: ([u8; 4], u16), pid: u32) -> Vec<u8> {
    let mut row = Vec::with_capacity(24);
    row.extend_from_slice(&state.to_ne_bytes());
    row.extend_from_slice(&local.0);
    row.extend_from_slice(&port_bytes(local.1));
    row.extend_from_slice(&remote.0);
    row.extend_from_slice(&port_bytes(remote.1));
    row.extend_from_slice(&pid.to_ne_bytes());
    row
}

/// MIB_TCP6ROW_OWNER_PID
pub(crate) fn ipv6_row(
    state: u32,
    local: ([u8; 16], u32, u16),
    remote: ([u8; 16], u32, u16),
    pid: u32,
) -> Vec<u8> {
    let mut row = Vec::with_capacity(56);
    row.extend_from_slice(&local.0);
    row.extend_from_slice(&local.1.to_ne_bytes());
    row.extend_from_slice(&port_bytes(local.2));
    row.extend_from_slice(&remote.0);
    row.extend_from_slice(&remote.1.to_ne_bytes());
    row.extend_from_slice(&port_bytes(remote.2));
    row.extend_from_slice(&state.to_ne_bytes());
    row.extend_from_slice(&pid.to_ne_bytes());
    row
}
