use crate::error::DinoError;
use std::io;
use std::net::TcpListener;

/// 从 `base` 开始线性探测可用端口，返回已绑定的监听器与端口
///
/// 端口被占用时尝试下一个；其它绑定错误立即返回。
pub fn find_available_port(
    host: &str,
    base: u16,
    attempts: u32,
) -> Result<(TcpListener, u16), DinoError> {
    probe(base, attempts, |port| TcpListener::bind((host, port)))
}

/// 探测逻辑与实际绑定分离，便于测试
pub(crate) fn probe<T>(
    base: u16,
    attempts: u32,
    mut bind: impl FnMut(u16) -> io::Result<T>,
) -> Result<(T, u16), DinoError> {
    for offset in 0..attempts {
        let Some(port) = u16::try_from(offset).ok().and_then(|o| base.checked_add(o)) else {
            break;
        };
        match bind(port) {
            Ok(bound) => return Ok((bound, port)),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                tracing::debug!("端口 {port} 已被占用，尝试下一个");
            }
            Err(e) => return Err(DinoError::Bind { port, source: e }),
        }
    }
    Err(DinoError::PortsExhausted { base, attempts })
}

/// 探测结果的说明，用于端口变更时的日志
pub fn describe_fallback(base: u16, port: u16) -> Option<String> {
    match port.checked_sub(base)? {
        0 => None,
        1 => Some(format!("端口 {base} 已被占用，改用 {port}")),
        _ => Some(format!("端口 {base}-{} 均已被占用，改用 {port}", port - 1)),
    }
}
