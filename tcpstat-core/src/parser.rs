//! 连接表二进制行解析
//!
//! 缓冲区布局: dwNumEntries(4) 后接固定长度的行。
//! - IPv4 MIB_TCPROW_OWNER_PID (24字节):
//!   state | localAddr | localPort[4] | remoteAddr | remotePort[4] | pid
//! - IPv6 MIB_TCP6ROW_OWNER_PID (56字节):
//!   localAddr[16] | localScope | localPort[4] | remoteAddr[16] | remoteScope | remotePort[4] | state | pid

use crate::record::{ConnectionRecord, IdentityToken};
use crate::{AddressFamily, Result, TcpState, TcpStatError};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

const HEADER_SIZE: usize = 4;
pub const IPV4_ROW_SIZE: usize = 24;
pub const IPV6_ROW_SIZE: usize = 56;

/// 端口只有前两个字节有效（网络字节序），后两个字节恒为0
pub fn decode_port(bytes: [u8; 4]) -> u16 {
    ((bytes[0] as u16) << 8) | bytes[1] as u16
}

pub fn row_size(family: AddressFamily) -> usize {
    match family {
        AddressFamily::Ipv4 => IPV4_ROW_SIZE,
        AddressFamily::Ipv6 => IPV6_ROW_SIZE,
    }
}

/// 解析整张连接表，每行产生一条记录，不去重也不过滤
pub fn parse_table(family: AddressFamily, buffer: &[u8]) -> Result<Vec<ConnectionRecord>> {
    if buffer.len() < HEADER_SIZE {
        return Err(TcpStatError::MalformedTable {
            family,
            reason: format!("缓冲区只有 {} 字节", buffer.len()),
        });
    }

    let count = read_u32(buffer, 0) as usize;
    let size = row_size(family);
    let needed = count
        .checked_mul(size)
        .and_then(|n| n.checked_add(HEADER_SIZE))
        .unwrap_or(usize::MAX);
    if buffer.len() < needed {
        return Err(TcpStatError::MalformedTable {
            family,
            reason: format!("{} 行需要 {} 字节，实际 {} 字节", count, needed, buffer.len()),
        });
    }

    let records = buffer[HEADER_SIZE..needed]
        .chunks_exact(size)
        .map(|row| match family {
            AddressFamily::Ipv4 => parse_ipv4_row(row),
            AddressFamily::Ipv6 => parse_ipv6_row(row),
        })
        .collect();
    Ok(records)
}

fn parse_ipv4_row(row: &[u8]) -> ConnectionRecord {
    let state = TcpState::from_native(read_u32(row, 0));
    let local = SocketAddrV4::new(ipv4_at(row, 4), decode_port(bytes4(row, 8)));
    let remote = SocketAddrV4::new(ipv4_at(row, 12), decode_port(bytes4(row, 16)));
    let pid = read_u32(row, 20);

    // MIB_TCPROW 即去掉末尾 owning pid 的前20字节
    let mut token = [0u8; 20];
    token.copy_from_slice(&row[..20]);

    ConnectionRecord::new(
        AddressFamily::Ipv4,
        state,
        SocketAddr::V4(local),
        SocketAddr::V4(remote),
        pid,
        IdentityToken::V4(token),
    )
}

fn parse_ipv6_row(row: &[u8]) -> ConnectionRecord {
    let local = SocketAddrV6::new(
        ipv6_at(row, 0),
        decode_port(bytes4(row, 20)),
        0,
        read_u32(row, 16),
    );
    let remote = SocketAddrV6::new(
        ipv6_at(row, 24),
        decode_port(bytes4(row, 44)),
        0,
        read_u32(row, 40),
    );
    let state_raw = bytes4(row, 48);
    let pid = read_u32(row, 52);

    // MIB_TCP6ROW 的 state 在最前面，其余字段顺序与 owner-pid 行相同
    let mut token = [0u8; 52];
    token[..4].copy_from_slice(&state_raw);
    token[4..].copy_from_slice(&row[..48]);

    ConnectionRecord::new(
        AddressFamily::Ipv6,
        TcpState::from_native(u32::from_ne_bytes(state_raw)),
        SocketAddr::V6(local),
        SocketAddr::V6(remote),
        pid,
        IdentityToken::V6(token),
    )
}

fn bytes4(bytes: &[u8], offset: usize) -> [u8; 4] {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[offset..offset + 4]);
    buf
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_ne_bytes(bytes4(bytes, offset))
}

/// 地址以网络字节序存放，内存中的字节即各段
fn ipv4_at(bytes: &[u8], offset: usize) -> Ipv4Addr {
    Ipv4Addr::from(bytes4(bytes, offset))
}

fn ipv6_at(bytes: &[u8], offset: usize) -> Ipv6Addr {
    let mut buf = [0u8; 16];
    buf.copy_from_slice(&bytes[offset..offset + 16]);
    Ipv6Addr::from(buf)
}
