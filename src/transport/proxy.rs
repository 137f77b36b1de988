//! HTTP CONNECT proxy chains.
//!
//! A chain is written `host:port[,host:port...]`; IPv6 literals are
//! bracketed (`[::1]:3128`). The TCP connection goes to the first hop, then
//! one `CONNECT` per remaining hop and a final one for the target.

use std::fmt;
use std::io;
use std::str::FromStr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::EppError;

/// Upper bound on a proxy response header.
const MAX_RESPONSE_HEADER: usize = 8 * 1024;

/// One proxy in a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyHop {
    /// Host name or IP literal, without brackets.
    pub host: String,
    /// Port.
    pub port: u16,
}

impl ProxyHop {
    /// Create a hop.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ProxyHop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", authority(&self.host, self.port))
    }
}

impl FromStr for ProxyHop {
    type Err = EppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || EppError::Config(format!("Invalid proxy address: '{}'", s));

        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, rest) = rest.split_once(']').ok_or_else(invalid)?;
            (host, rest.strip_prefix(':').ok_or_else(invalid)?)
        } else {
            let (host, port) = s.rsplit_once(':').ok_or_else(invalid)?;
            if host.contains(':') {
                return Err(invalid());
            }
            (host, port)
        };

        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse().map_err(|_| invalid())?;
        Ok(Self::new(host, port))
    }
}

/// Ordered list of CONNECT proxies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyChain {
    hops: Vec<ProxyHop>,
}

impl ProxyChain {
    /// Chain over the given hops.
    pub fn new(hops: Vec<ProxyHop>) -> Self {
        Self { hops }
    }

    /// The hops, first to last.
    pub fn hops(&self) -> &[ProxyHop] {
        &self.hops
    }

    /// Whether there is no proxy at all.
    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    /// The hop the TCP connection goes to.
    pub fn first(&self) -> Option<&ProxyHop> {
        self.hops.first()
    }

    /// Drive the CONNECT exchanges over a stream already connected to the
    /// first hop, ending with a tunnel to `host:port`.
    pub async fn tunnel<S>(&self, stream: &mut S, host: &str, port: u16) -> io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let onward = self
            .hops
            .iter()
            .skip(1)
            .map(|hop| authority(&hop.host, hop.port))
            .chain(std::iter::once(authority(host, port)));

        for target in onward {
            tracing::debug!(target = %target, "Sending CONNECT");
            http_connect(stream, &target).await?;
        }
        Ok(())
    }
}

impl FromStr for ProxyChain {
    type Err = EppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hops = s
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(str::parse)
            .collect::<Result<Vec<ProxyHop>, _>>()?;
        Ok(Self { hops })
    }
}

impl fmt::Display for ProxyChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.hops.iter().map(ToString::to_string).collect();
        write!(f, "{}", parts.join(","))
    }
}

fn authority(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

async fn http_connect<S>(stream: &mut S, target: &str) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;

    // Byte at a time so nothing past the header is consumed from the tunnel.
    let mut header = Vec::with_capacity(128);
    while !header.ends_with(b"\r\n\r\n") {
        if header.len() >= MAX_RESPONSE_HEADER {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "proxy response header too large",
            ));
        }
        header.push(stream.read_u8().await?);
    }

    let status_line = header
        .split(|b| *b == b'\n')
        .next()
        .map(|line| String::from_utf8_lossy(line).trim().to_string())
        .unwrap_or_default();
    let status = status_line.split_whitespace().nth(1);
    if !status_line.starts_with("HTTP/1.") || status != Some("200") {
        return Err(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            format!("proxy refused CONNECT {target}: {status_line}"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chain() {
        let chain: ProxyChain = "proxy1:3128, [::1]:8080,10.0.0.1:1080".parse().unwrap();
        assert_eq!(
            chain.hops(),
            &[
                ProxyHop::new("proxy1", 3128),
                ProxyHop::new("::1", 8080),
                ProxyHop::new("10.0.0.1", 1080),
            ]
        );
        assert_eq!(chain.to_string(), "proxy1:3128,[::1]:8080,10.0.0.1:1080");
    }

    #[test]
    fn test_parse_invalid() {
        assert!("proxy1".parse::<ProxyChain>().is_err());
        assert!("::1:8080".parse::<ProxyChain>().is_err());
        assert!("[::1]8080".parse::<ProxyChain>().is_err());
        assert!("host:notaport".parse::<ProxyChain>().is_err());
        assert!("".parse::<ProxyChain>().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tunnel_through_two_hops() {
        let chain: ProxyChain = "first:1,second:2".parse().unwrap();
        let (mut client, mut proxy) = tokio::io::duplex(1024);

        let server = tokio::spawn(async move {
            let mut seen = Vec::new();
            for _ in 0..2 {
                let mut buf = Vec::new();
                while !buf.ends_with(b"\r\n\r\n") {
                    buf.push(proxy.read_u8().await.unwrap());
                }
                seen.push(String::from_utf8(buf).unwrap());
                proxy
                    .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
                    .await
                    .unwrap();
            }
            proxy.write_all(b"tail").await.unwrap();
            seen
        });

        chain.tunnel(&mut client, "epp.example", 700).await.unwrap();
        let mut tail = [0u8; 4];
        client.read_exact(&mut tail).await.unwrap();
        assert_eq!(&tail, b"tail");

        let seen = server.await.unwrap();
        assert!(seen[0].starts_with("CONNECT second:2 HTTP/1.1"));
        assert!(seen[1].starts_with("CONNECT epp.example:700 HTTP/1.1"));
    }

    #[tokio::test]
    async fn test_tunnel_refused() {
        let chain: ProxyChain = "first:1".parse().unwrap();
        let (mut client, mut proxy) = tokio::io::duplex(1024);
        tokio::spawn(async move {
            let mut buf = Vec::new();
            while !buf.ends_with(b"\r\n\r\n") {
                buf.push(proxy.read_u8().await.unwrap());
            }
            proxy
                .write_all(b"HTTP/1.1 403 Forbidden\r\n\r\n")
                .await
                .unwrap();
        });

        let err = chain.tunnel(&mut client, "epp.example", 700).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
    }
}
