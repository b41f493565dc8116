//! 证书序列号源
//!
//! 进程级线程安全的随机序列号生成，并发签发下统计唯一。

use crate::error::{PkiError, Result};

/// 序列号字节长度（128位）
const SERIAL_LEN: usize = 16;

/// 序列号源
///
/// 无内部状态，每次调用独立取随机数；多CA并发签发时直接共享一个实例。
#[derive(Debug, Clone, Default)]
pub struct SerialSource;

impl SerialSource {
    pub fn new() -> Self {
        Self
    }

    /// 生成一个正的随机序列号
    ///
    /// 最高位清零保证DER整数为正，且保证非全零。
    pub fn next_serial(&self) -> Result<Vec<u8>> {
        let mut buf = [0u8; SERIAL_LEN];
        getrandom::fill(&mut buf)
            .map_err(|e| PkiError::Internal(format!("Failed to generate serial number: {e}")))?;
        buf[0] &= 0x7f;
        if buf.iter().all(|b| *b == 0) {
            buf[SERIAL_LEN - 1] = 1;
        }
        Ok(buf.to_vec())
    }

    /// 生成序列号并返回其十六进制形式（存储键用）
    pub fn next_serial_hex(&self) -> Result<(Vec<u8>, String)> {
        let serial = self.next_serial()?;
        let hex = hex::encode(&serial);
        Ok((serial, hex))
    }
}
