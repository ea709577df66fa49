//! Minimal passive-mode FTP client: `USER`/`PASS`, `TYPE I`, `PASV`, `RETR`.
//! Enough of RFC 959 to pull a file over the control/data channel pair; no
//! active mode, no FTPS, no directory listing.

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::error::{ChiralError, ChiralResult};

async fn read_response(reader: &mut BufReader<TcpStream>) -> ChiralResult<(u32, String)> {
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    let code: u32 = line
        .get(..3)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ChiralError::ProtocolViolation(format!("malformed FTP response: {line:?}")))?;
    Ok((code, line))
}

async fn expect(reader: &mut BufReader<TcpStream>, expected: u32) -> ChiralResult<String> {
    let (code, line) = read_response(reader).await?;
    if code != expected {
        return Err(ChiralError::ProtocolViolation(format!("expected FTP {expected}, got {line:?}")));
    }
    Ok(line)
}

/// Parse a `PASV` response's `(h1,h2,h3,h4,p1,p2)` tuple into a host/port.
fn parse_pasv(line: &str) -> ChiralResult<(String, u16)> {
    let start = line
        .find('(')
        .ok_or_else(|| ChiralError::ProtocolViolation("PASV response missing '('".to_string()))?;
    let end = line
        .find(')')
        .ok_or_else(|| ChiralError::ProtocolViolation("PASV response missing ')'".to_string()))?;
    let octets: Vec<u16> = line[start + 1..end]
        .split(',')
        .map(|p| p.trim().parse())
        .collect::<Result<_, _>>()
        .map_err(|_| ChiralError::ProtocolViolation("PASV response has non-numeric octets".to_string()))?;
    if octets.len() != 6 {
        return Err(ChiralError::ProtocolViolation("PASV response did not have 6 octets".to_string()));
    }
    let host = format!("{}.{}.{}.{}", octets[0], octets[1], octets[2], octets[3]);
    let port = octets[4] * 256 + octets[5];
    Ok((host, port))
}

/// Retrieve `remote_path` from `host:port` in passive mode, returning the
/// full file contents.
pub async fn retrieve(
    host: &str,
    port: u16,
    username: Option<&str>,
    password: Option<&str>,
    remote_path: &str,
) -> ChiralResult<Vec<u8>> {
    let control = TcpStream::connect((host, port))
        .await
        .map_err(|e| ChiralError::NetworkUnreachable(format!("connect to {host}:{port} failed: {e}")))?;
    let mut reader = BufReader::new(control);
    expect(&mut reader, 220).await?;

    let user = username.unwrap_or("anonymous");
    reader.get_mut().write_all(format!("USER {user}\r\n").as_bytes()).await?;
    let (code, _) = read_response(&mut reader).await?;
    if code == 331 {
        let pass = password.unwrap_or("anonymous@");
        reader.get_mut().write_all(format!("PASS {pass}\r\n").as_bytes()).await?;
        expect(&mut reader, 230).await?;
    } else if code != 230 {
        return Err(ChiralError::Unauthorized(format!("FTP login rejected (code {code})")));
    }

    reader.get_mut().write_all(b"TYPE I\r\n").await?;
    expect(&mut reader, 200).await?;

    reader.get_mut().write_all(b"PASV\r\n").await?;
    let pasv_line = expect(&mut reader, 227).await?;
    let (data_host, data_port) = parse_pasv(&pasv_line)?;

    let mut data_stream = TcpStream::connect((data_host.as_str(), data_port))
        .await
        .map_err(|e| ChiralError::NetworkUnreachable(format!("PASV connect to {data_host}:{data_port} failed: {e}")))?;

    reader.get_mut().write_all(format!("RETR {remote_path}\r\n").as_bytes()).await?;
    let (code, _) = read_response(&mut reader).await?;
    if code != 150 && code != 125 {
        return Err(ChiralError::NotFound(format!("FTP RETR {remote_path} failed (code {code})")));
    }

    let mut data = Vec::new();
    data_stream.read_to_end(&mut data).await?;

    expect(&mut reader, 226).await?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_pasv_reads_host_and_port() {
        let (host, port) = parse_pasv("227 Entering Passive Mode (127,0,0,1,195,80).").unwrap();
        assert_eq!(host, "127.0.0.1");
        assert_eq!(port, 195 * 256 + 80);
    }

    #[test]
    fn parse_pasv_rejects_malformed_response() {
        assert!(parse_pasv("227 nonsense").is_err());
    }
}
