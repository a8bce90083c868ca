//! 连接表获取
//!
//! GetExtendedTcpTable 的两次调用协议：先用空缓冲区取得所需大小
//! （ERROR_INSUFFICIENT_BUFFER），按该大小分配后再取一次数据。

use crate::native::{
    NativeStack, NativeTcp, ERROR_INSUFFICIENT_BUFFER, ERROR_NOT_SUPPORTED, NO_ERROR,
};
use crate::parser::parse_table;
use crate::record::ConnectionRecord;
use crate::{AddressFamily, Result, TcpStatError};
use tracing::debug;

const TABLE_CALL: &str = "GetExtendedTcpTable";

/// 获取单个地址族的原始连接表
///
/// 平台不支持该地址族时返回 `Ok(None)`，其余非成功状态均为致命错误，不重试。
pub fn fetch_table(native: &dyn NativeTcp) -> Result<Option<Vec<u8>>> {
    let family = native.family();
    if !native.is_supported() {
        debug!("{} 不受支持，跳过", family);
        return Ok(None);
    }

    let mut size: u32 = 0;
    match native.query_table(None, &mut size) {
        ERROR_INSUFFICIENT_BUFFER => {}
        NO_ERROR => {
            debug!("{} 连接表为空", family);
            return Ok(Some(0u32.to_ne_bytes().to_vec()));
        }
        ERROR_NOT_SUPPORTED => {
            debug!("{} 不受支持，跳过", family);
            return Ok(None);
        }
        code => return Err(TcpStatError::NativeCall { call: TABLE_CALL, code }),
    }

    let mut buffer = vec![0u8; size as usize];
    match native.query_table(Some(&mut buffer), &mut size) {
        NO_ERROR => {}
        ERROR_NOT_SUPPORTED => return Ok(None),
        code => return Err(TcpStatError::NativeCall { call: TABLE_CALL, code }),
    }

    debug!("{} 连接表 {} 字节", family, buffer.len());
    Ok(Some(buffer))
}

/// 枚举单个地址族的连接
pub fn enumerate_family(native: &dyn NativeTcp) -> Result<Vec<ConnectionRecord>> {
    match fetch_table(native)? {
        Some(buffer) => parse_table(native.family(), &buffer),
        None => Ok(Vec::new()),
    }
}

/// 枚举全部连接：先 IPv4 后 IPv6，合并为一个快照
pub fn enumerate(stack: &NativeStack) -> Result<Vec<ConnectionRecord>> {
    let mut records = enumerate_family(stack.family(AddressFamily::Ipv4))?;
    let ipv6 = enumerate_family(stack.family(AddressFamily::Ipv6))?;
    records.extend(ipv6);
    debug!("快照共 {} 条连接", records.len());
    Ok(records)
}
