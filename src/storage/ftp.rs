//! FTP 控制连接（RFC 959），数据通道使用 PASV / EPSV
//!
//! 每条命令和每次数据通道读写都受 `command_timeout_secs` 限制。

use super::{Connector, RemoteConnection, Reply};
use crate::config::{PassiveMode, RemoteConfig};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use regex::Regex;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

/// 已登录的 FTP 会话
pub struct FtpConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    host: String,
    passive_mode: PassiveMode,
    command_timeout: Duration,
    closed: bool,
    /// 超时的命令；之后控制通道上的回复无法再对应
    timed_out: Option<String>,
    name: String,
}

impl FtpConnection {
    /// 建立控制连接并登录
    pub async fn connect(config: &RemoteConfig) -> Result<Self> {
        let addr = format!("{}:{}", config.host, config.port);
        let connect_timeout = Duration::from_secs(config.connect_timeout_secs);

        let tcp = timeout(connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| SyncError::Timeout {
                command: format!("connect {}", addr),
            })?
            .map_err(|e| SyncError::protocol(format!("connect {}", addr), e.to_string()))?;
        tcp.set_nodelay(true).ok();

        let (rd, wr) = tcp.into_split();
        let mut conn = Self {
            reader: BufReader::new(rd),
            writer: wr,
            host: config.host.clone(),
            passive_mode: config.passive_mode,
            command_timeout: Duration::from_secs(config.command_timeout_secs),
            closed: false,
            timed_out: None,
            name: format!("ftp://{}@{}", config.username, addr),
        };

        let banner = conn.read_response("greeting").await?;
        if !banner.is_success() {
            return Err(SyncError::rejected("greeting", banner.code, banner.text()));
        }
        debug!("服务器欢迎信息: {}", banner.text());

        conn.login(&config.username, &config.password).await?;
        conn.expect_ok("TYPE I").await?;

        Ok(conn)
    }

    async fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let user = self.execute(&format!("USER {}", username)).await?;
        if user.code == 331 {
            let pass = self.execute(&format!("PASS {}", password)).await?;
            if !pass.is_success() {
                return Err(SyncError::rejected("PASS", pass.code, pass.text()));
            }
        } else if !user.is_success() {
            return Err(SyncError::rejected("USER", user.code, user.text()));
        }
        Ok(())
    }

    /// 为一次操作加上超时限制
    async fn bounded<T, F>(&mut self, command: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match timeout(self.command_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(self.mark_timed_out(command)),
        }
    }

    /// 超时后迟到的回复仍留在控制通道上，连接不再可用
    fn mark_timed_out(&mut self, command: &str) -> SyncError {
        warn!("命令 {} 超时，连接 {} 不再可用", command, self.name);
        self.timed_out = Some(command.to_string());
        SyncError::Timeout {
            command: command.to_string(),
        }
    }

    async fn send_command(&mut self, cmd: &str) -> Result<()> {
        let line = format!("{}\r\n", cmd);
        self.writer.write_all(line.as_bytes()).await?;
        trace!(">>> {}", mask_password(cmd));
        Ok(())
    }

    async fn read_line_raw(reader: &mut BufReader<OwnedReadHalf>) -> Result<String> {
        let mut buf = String::new();
        let n = reader.read_line(&mut buf).await?;
        if n == 0 {
            return Err(SyncError::protocol("read reply", "服务器关闭了连接"));
        }
        Ok(buf.trim_end_matches(|c| c == '\r' || c == '\n').to_string())
    }

    /// 读取一条完整回复（可能是多行）
    async fn read_response_inner(reader: &mut BufReader<OwnedReadHalf>) -> Result<Reply> {
        let first = Self::read_line_raw(reader).await?;
        let code = parse_code(&first)?;
        let mut lines = vec![first.clone()];

        // "NNN-" 表示多行回复，直到 "NNN " 结束
        if first.as_bytes().get(3) == Some(&b'-') {
            let terminator = format!("{} ", code);
            loop {
                let next = Self::read_line_raw(reader).await?;
                let done = next.starts_with(&terminator) || next == code.to_string();
                lines.push(next);
                if done {
                    break;
                }
            }
        }

        let reply = Reply::new(code, lines);
        trace!("<<< {} {}", reply.code, reply.text());
        Ok(reply)
    }

    async fn read_response(&mut self, command: &str) -> Result<Reply> {
        let fut = Self::read_response_inner(&mut self.reader);
        match timeout(self.command_timeout, fut).await {
            Ok(reply) => reply,
            Err(_) => Err(self.mark_timed_out(command)),
        }
    }

    /// 发送命令并读取回复
    async fn execute(&mut self, cmd: &str) -> Result<Reply> {
        let masked = mask_password(cmd);
        if self.closed {
            return Err(SyncError::protocol(masked, "连接已关闭"));
        }
        if let Some(previous) = &self.timed_out {
            return Err(SyncError::protocol(
                masked,
                format!("命令 {} 超时后连接不可用", previous),
            ));
        }
        let sent = timeout(self.command_timeout, self.send_command(cmd)).await;
        match sent {
            Ok(result) => result?,
            Err(_) => return Err(self.mark_timed_out(&masked)),
        }
        self.read_response(&masked).await
    }

    /// 期望 2xx 回复
    async fn expect_ok(&mut self, cmd: &str) -> Result<Reply> {
        let reply = self.execute(cmd).await?;
        if !reply.is_success() {
            return Err(SyncError::rejected(cmd, reply.code, reply.text()));
        }
        Ok(reply)
    }

    /// 打开数据通道
    async fn open_data_channel(&mut self) -> Result<TcpStream> {
        let addr = match self.passive_mode {
            PassiveMode::Passive => {
                let reply = self.expect_ok("PASV").await?;
                parse_pasv_reply(&reply.text())?
            }
            PassiveMode::ExtendedPassive => {
                let reply = self.expect_ok("EPSV").await?;
                let port = parse_epsv_reply(&reply.text())?;
                let ip = self
                    .writer
                    .peer_addr()
                    .map(|a| a.ip())
                    .map_err(SyncError::Io)?;
                debug!("EPSV 数据端口 {}:{}", self.host, port);
                SocketAddr::new(ip, port)
            }
        };

        let stream = timeout(self.command_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| SyncError::Timeout {
                command: format!("data connect {}", addr),
            })?
            .map_err(|e| SyncError::protocol(format!("data connect {}", addr), e.to_string()))?;
        Ok(stream)
    }

    /// 数据通道命令的开始回复：必须是 1xx（少数服务器直接给 2xx）
    async fn begin_transfer(&mut self, cmd: &str) -> Result<bool> {
        let reply = self.execute(cmd).await?;
        if reply.is_preliminary() {
            Ok(true)
        } else if reply.is_success() {
            Ok(false)
        } else {
            Err(SyncError::rejected(cmd, reply.code, reply.text()))
        }
    }

    async fn finish_transfer(&mut self, cmd: &str) -> Result<()> {
        let done = self.read_response(cmd).await?;
        if !done.is_success() {
            return Err(SyncError::rejected(cmd, done.code, done.text()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteConnection for FtpConnection {
    async fn cwd(&mut self, path: &str) -> Result<()> {
        self.expect_ok(&format!("CWD {}", path)).await?;
        Ok(())
    }

    async fn store(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let cmd = format!("STOR {}", name);
        let mut stream = self.open_data_channel().await?;
        let pending = self.begin_transfer(&cmd).await?;

        self.bounded(&cmd, async {
            stream.write_all(data).await?;
            stream.shutdown().await?;
            Ok(())
        })
        .await?;
        drop(stream);

        if pending {
            self.finish_transfer(&cmd).await?;
        }
        Ok(())
    }

    async fn delete(&mut self, name: &str) -> Result<()> {
        self.expect_ok(&format!("DELE {}", name)).await?;
        Ok(())
    }

    async fn command(&mut self, cmd: &str) -> Result<Reply> {
        self.execute(cmd).await
    }

    async fn retrieve_lines(&mut self, cmd: &str) -> Result<Vec<String>> {
        let mut stream = self.open_data_channel().await?;
        let pending = self.begin_transfer(cmd).await?;

        let mut buf = Vec::new();
        self.bounded(cmd, async {
            stream.read_to_end(&mut buf).await?;
            Ok(())
        })
        .await?;
        drop(stream);

        if pending {
            self.finish_transfer(cmd).await?;
        }

        let text = String::from_utf8(buf)
            .map_err(|e| SyncError::protocol(cmd, format!("数据不是 UTF-8: {}", e)))?;
        Ok(text
            .lines()
            .map(|l| l.trim_end_matches('\r'))
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        // 超时后不再发送 QUIT，直接断开
        if self.timed_out.is_none() {
            if let Err(e) = self.execute("QUIT").await {
                warn!("发送 QUIT 失败: {}", e);
            }
        }
        self.closed = true;
        let _ = self.writer.shutdown().await;
        debug!("已关闭连接 {}", self.name);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// 通过 TCP 打开 FTP 连接
#[derive(Debug, Default, Clone, Copy)]
pub struct FtpConnector;

#[async_trait]
impl Connector for FtpConnector {
    async fn connect(&self, config: &RemoteConfig) -> Result<Box<dyn RemoteConnection>> {
        let conn = FtpConnection::connect(config).await?;
        Ok(Box::new(conn))
    }
}

/// 解析三位状态码
fn parse_code(line: &str) -> Result<u16> {
    line.get(..3)
        .and_then(|c| c.parse::<u16>().ok())
        .ok_or_else(|| SyncError::protocol("read reply", format!("无效的回复: '{}'", line)))
}

/// 日志里不输出密码
fn mask_password(cmd: &str) -> String {
    let is_pass = cmd
        .get(..5)
        .map_or(false, |prefix| prefix.eq_ignore_ascii_case("PASS "));
    if is_pass {
        "PASS ****".to_string()
    } else {
        cmd.to_string()
    }
}

/// 解析 `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)`
fn parse_pasv_reply(text: &str) -> Result<SocketAddr> {
    let re = Regex::new(r"(\d+),(\d+),(\d+),(\d+),(\d+),(\d+)")
        .map_err(|e| SyncError::protocol("PASV", e.to_string()))?;
    let caps = re
        .captures(text)
        .ok_or_else(|| SyncError::protocol("PASV", format!("无法解析: {}", text)))?;

    let nums = (1..=6)
        .map(|i| {
            caps[i]
                .parse::<u8>()
                .map_err(|_| SyncError::protocol("PASV", format!("数值越界: {}", text)))
        })
        .collect::<Result<Vec<u8>>>()?;

    let ip = IpAddr::from([nums[0], nums[1], nums[2], nums[3]]);
    let port = (nums[4] as u16) * 256 + nums[5] as u16;
    Ok(SocketAddr::new(ip, port))
}

/// 解析 `229 Entering Extended Passive Mode (|||port|)`
fn parse_epsv_reply(text: &str) -> Result<u16> {
    let re = Regex::new(r"\|\|\|(\d+)\|").map_err(|e| SyncError::protocol("EPSV", e.to_string()))?;
    let caps = re
        .captures(text)
        .ok_or_else(|| SyncError::protocol("EPSV", format!("无法解析: {}", text)))?;
    caps[1]
        .parse::<u16>()
        .map_err(|_| SyncError::protocol("EPSV", format!("端口越界: {}", text)))
}
