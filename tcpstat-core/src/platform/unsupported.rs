//! 没有扩展统计接口的平台
//!
//! 所有地址族都报告为不支持：枚举得到空表，统计读取为软失败。

use crate::estats::StatsCategory;
use crate::native::{NativeTcp, ERROR_NOT_SUPPORTED};
use crate::AddressFamily;

pub struct UnsupportedTcp {
    family: AddressFamily,
}

impl UnsupportedTcp {
    pub fn new(family: AddressFamily) -> Self {
        Self { family }
    }
}

impl NativeTcp for UnsupportedTcp {
    fn family(&self) -> AddressFamily {
        self.family
    }

    fn is_supported(&self) -> bool {
        false
    }

    fn query_table(&self, _buffer: Option<&mut [u8]>, _size: &mut u32) -> u32 {
        ERROR_NOT_SUPPORTED
    }

    fn get_estats(
        &self,
        _row: &[u8],
        _category: StatsCategory,
        _rw: Option<&mut [u8]>,
        _rod: Option<&mut [u8]>,
    ) -> u32 {
        ERROR_NOT_SUPPORTED
    }

    fn set_estats(&self, _row: &[u8], _category: StatsCategory, _rw: &[u8]) -> u32 {
        ERROR_NOT_SUPPORTED
    }
}
